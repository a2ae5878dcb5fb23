use crate::{
    datum::{Datum, DatumKind},
    edge::Edge,
    error::{Error, Result},
    port::PortSet,
    process::{DataChecking, Process, Readiness, State, StepContext},
};
use derivative::Derivative;
use indexmap::IndexMap;
use log::{debug, error, trace, warn};
use pipeflow_config::{ConfigBlock, Ident, IntoIdent};

/// A process instance inside a pipeline together with its lifecycle.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct Node {
    name: Ident,
    kind: String,
    #[derivative(Debug = "ignore")]
    process: Box<dyn Process>,
    config: ConfigBlock,
    ports: PortSet,
    state: State,
    steps: u64,
    finalized: bool,
}

impl Node {
    pub fn new(
        name: impl IntoIdent,
        kind: impl Into<String>,
        process: Box<dyn Process>,
        config: ConfigBlock,
    ) -> Self {
        let name = name.into();
        Self {
            ports: PortSet::new(&name),
            name,
            kind: kind.into(),
            process,
            config,
            state: State::Created,
            steps: 0,
            finalized: false,
        }
    }

    pub fn name(&self) -> &Ident {
        &self.name
    }

    /// The plugin name the process was created from.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn config(&self) -> &ConfigBlock {
        &self.config
    }

    pub fn ports(&self) -> &PortSet {
        &self.ports
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// The number of steps taken so far.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn data_checking(&self) -> DataChecking {
        self.process.data_checking()
    }

    fn expect_state(&self, expected: State, to: State) -> Result<()> {
        if self.state != expected {
            return Err(Error::invalid_transition(&self.name, self.state, to));
        }
        Ok(())
    }

    pub fn configure(&mut self) -> Result<()> {
        self.expect_state(State::Created, State::Configured)?;

        let result = self.process.configure(&self.config, &mut self.ports);
        if let Err(err) = result {
            self.state = State::Failed;
            let err = match err {
                Error::Config(err) => Error::from_config_error(&self.name, err),
                err => err,
            };
            return Err(err);
        }

        trace!("process `{}` configured", self.name);
        self.state = State::Configured;
        Ok(())
    }

    pub(crate) fn connect_input(&mut self, port: &str, edge: Edge) -> Result<()> {
        self.expect_state(State::Configured, State::Configured)?;
        self.ports.connect_input(port, edge)
    }

    pub(crate) fn connect_output(&mut self, port: &str, edge: Edge) -> Result<()> {
        self.expect_state(State::Configured, State::Configured)?;
        self.ports.connect_output(port, edge)
    }

    pub fn initialize(&mut self) -> Result<()> {
        self.expect_state(State::Configured, State::Initialized)?;

        if let Some(info) = self.ports.unconnected_required() {
            self.state = State::Failed;
            return Err(Error::configuration(
                &self.name,
                info.name.as_str(),
                None,
                "required port is not connected",
            ));
        }

        if let Err(err) = self.process.initialize(&mut self.ports) {
            self.state = State::Failed;
            return Err(Error::initialization(&self.name, err));
        }

        debug!("process `{}` initialized", self.name);
        self.state = State::Initialized;
        Ok(())
    }

    /// Whether a step would neither starve nor block.
    ///
    /// Checked processes are ready when every required input has a
    /// datum waiting and no output edge is full. Unchecked processes
    /// only need one connected input with a datum waiting, or no
    /// connected inputs at all. A process may override the input side
    /// through [Process::readiness].
    pub fn is_ready(&self) -> bool {
        if !matches!(self.state, State::Initialized | State::Stepping) {
            return false;
        }

        let inputs_ready = match self.process.readiness() {
            Readiness::Ready => true,
            Readiness::Waiting => false,
            Readiness::Edges => self.inputs_ready(),
        };
        let outputs_ready = self
            .ports
            .outputs()
            .filter(|port| !port.is_completed())
            .flat_map(|port| port.edges())
            .filter(|edge| !edge.is_closed())
            .all(|edge| !edge.is_full());

        inputs_ready && outputs_ready
    }

    fn inputs_ready(&self) -> bool {
        match self.process.data_checking() {
            DataChecking::Sync => self
                .ports
                .inputs()
                .filter(|port| port.info().is_required())
                .all(|port| port.edge().map_or(false, |edge| !edge.is_empty())),
            DataChecking::None => {
                let mut edges = self.ports.inputs().filter_map(|port| port.edge()).peekable();
                edges.peek().is_none() || edges.any(|edge| !edge.is_empty())
            }
        }
    }

    /// Whether the process waits on an event from outside the pipeline.
    pub fn is_waiting(&self) -> bool {
        !self.state.is_terminal() && self.process.readiness() == Readiness::Waiting
    }

    /// Run one step and return the state afterwards.
    ///
    /// An error moves the process to [State::Failed], except for
    /// [Error::Aborted] which leaves the state as it is.
    pub fn step(&mut self) -> Result<State> {
        match self.state {
            State::Initialized => self.state = State::Stepping,
            State::Stepping => {}
            from => return Err(Error::invalid_transition(&self.name, from, State::Stepping)),
        }
        self.steps += 1;

        let result = match self.process.data_checking() {
            DataChecking::Sync => self.step_checked(),
            DataChecking::None => self.step_unchecked(),
        };

        let result = result.and_then(|()| {
            if self.state == State::Stepping && self.ports.outputs_abandoned() {
                debug!("every consumer of process `{}` has finished", self.name);
                self.complete()?;
            }
            Ok(())
        });

        match result {
            Ok(()) => Ok(self.state),
            Err(Error::Aborted) => Err(Error::Aborted),
            Err(err) => {
                error!("process `{}` failed: {}", self.name, err);
                self.state = State::Failed;
                Err(err)
            }
        }
    }

    fn step_checked(&mut self) -> Result<()> {
        let ports: Vec<(Ident, bool)> = self
            .ports
            .inputs()
            .map(|port| (port.info().name.clone(), port.info().is_required()))
            .collect();

        let mut inputs = IndexMap::new();
        let mut dominant = None;
        for (port, required) in ports {
            let datum = if required {
                self.ports.grab(port.as_str())?
            } else {
                match self.ports.try_grab(port.as_str())? {
                    Some(datum) => datum,
                    None => continue,
                }
            };
            if required {
                dominant = dominant.max(Some(datum.kind()));
            }
            inputs.insert(port, datum);
        }

        match dominant {
            Some(DatumKind::Complete) => {
                debug!("process `{}` received Complete", self.name);
                return self.complete();
            }
            Some(DatumKind::Flush) => {
                self.process.flush()?;
                return self.ports.push_all(Datum::Flush);
            }
            Some(DatumKind::Invalid) => {
                return self.ports.push_all(Datum::Invalid);
            }
            Some(DatumKind::Error) => {
                let message = inputs
                    .iter()
                    .find_map(|(port, datum)| match datum {
                        Datum::Error(message) => Some(format!("input `{}`: {}", port, message)),
                        _ => None,
                    })
                    .unwrap_or_default();
                return self.ports.push_all(Datum::Error(message));
            }
            Some(DatumKind::Empty) => {
                return self.ports.push_all(Datum::Empty);
            }
            Some(DatumKind::Data) | None => {}
        }

        self.ports.begin_step();
        let mut ctx = StepContext::new(&self.name, &mut self.ports, inputs);
        self.process.step(&mut ctx)?;

        if ctx.is_complete_marked() {
            return self.complete();
        }

        // every output is written exactly once per step
        if let Some(port) = self.ports.outputs().find(|port| port.pushed() != 1) {
            return Err(Error::step(
                &self.name,
                format!(
                    "output port `{}` was written {} times in one step",
                    port.info().name,
                    port.pushed()
                ),
            ));
        }
        Ok(())
    }

    fn step_unchecked(&mut self) -> Result<()> {
        self.ports.begin_step();
        let mut ctx = StepContext::new(&self.name, &mut self.ports, IndexMap::new());
        self.process.step(&mut ctx)?;

        if ctx.is_complete_marked() {
            return self.complete();
        }
        Ok(())
    }

    /// Emit the remaining `Complete`s and release the producers upstream.
    fn complete(&mut self) -> Result<()> {
        self.ports.complete_all()?;
        self.ports.close_inputs();
        debug!("process `{}` completed after {} steps", self.name, self.steps);
        self.state = State::Complete;
        Ok(())
    }

    /// Release the process resources. Subsequent calls do nothing.
    pub fn finalize(&mut self) -> Result<()> {
        if self.finalized {
            return Ok(());
        }
        self.finalized = true;

        if !self.state.is_terminal() {
            warn!(
                "process `{}` is finalized in state {:?}",
                self.name, self.state
            );
        }
        self.process.finalize()
    }
}
