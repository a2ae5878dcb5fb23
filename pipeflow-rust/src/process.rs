use crate::{
    datum::Datum,
    edge::Edge,
    error::{Error, Result},
    port::PortSet,
};
use indexmap::IndexMap;
use pipeflow_config::{ConfigBlock, Ident};
use serde::{de::DeserializeOwned, Serialize};

/// The lifecycle state of a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    Created,
    Configured,
    Initialized,
    Stepping,
    Complete,
    Failed,
}

impl State {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }
}

/// How much the framework does around each step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataChecking {
    /// The framework reads one datum from every required input
    /// before the step, handles control datums itself and checks that
    /// every output was written exactly once.
    Sync,
    /// The process reads and writes its ports on its own.
    None,
}

/// Readiness a process reports on its own, overriding the port checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Readiness {
    /// Decide from the input and output edges.
    Edges,
    /// A step would not block, whatever the input edges hold.
    Ready,
    /// Nothing to do until an event outside the pipeline arrives.
    /// A waiting process does not count as stalled.
    Waiting,
}

/// A unit of computation in a pipeline.
///
/// The framework drives a process through `configure`, `initialize`,
/// repeated `step` calls and `finalize`. A process declares its ports
/// in `configure`; connections are only made after that.
pub trait Process: Send {
    /// Validate the configuration and declare the ports.
    fn configure(&mut self, config: &ConfigBlock, ports: &mut PortSet) -> Result<()>;

    /// Acquire resources. Every required port is connected at this point.
    fn initialize(&mut self, _ports: &mut PortSet) -> Result<()> {
        Ok(())
    }

    fn step(&mut self, ctx: &mut StepContext<'_>) -> Result<()>;

    /// Drop buffered state on an incoming `Flush`.
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    /// Release resources. Called once after the process stops stepping.
    fn finalize(&mut self) -> Result<()> {
        Ok(())
    }

    fn data_checking(&self) -> DataChecking {
        DataChecking::Sync
    }

    /// Processes fed from outside the pipeline report their pending work here.
    fn readiness(&self) -> Readiness {
        Readiness::Edges
    }
}

/// The view of a process on its ports during one step.
pub struct StepContext<'a> {
    name: &'a Ident,
    ports: &'a mut PortSet,
    inputs: IndexMap<Ident, Datum>,
    complete: bool,
}

impl<'a> StepContext<'a> {
    pub(crate) fn new(name: &'a Ident, ports: &'a mut PortSet, inputs: IndexMap<Ident, Datum>) -> Self {
        Self {
            name,
            ports,
            inputs,
            complete: false,
        }
    }

    /// The name of the stepping process.
    pub fn name(&self) -> &Ident {
        self.name
    }

    /// The datum the framework read from an input before the step.
    pub fn input(&self, port: &str) -> Result<&Datum> {
        self.inputs
            .get(port)
            .ok_or_else(|| Error::step(self.name, format!("no datum on input port `{}`", port)))
    }

    /// Take the datum the framework read from an input before the step.
    pub fn take(&mut self, port: &str) -> Result<Datum> {
        self.inputs
            .remove(port)
            .ok_or_else(|| Error::step(self.name, format!("no datum on input port `{}`", port)))
    }

    /// Decode the JSON payload of the datum read from an input.
    pub fn decode<T>(&self, port: &str) -> Result<T>
    where
        T: DeserializeOwned,
    {
        self.input(port)?
            .decode()
            .map_err(|err| Error::step(self.name, format!("input port `{}`: {}", port, err)))
    }

    /// Receive from an input port, blocking until a datum arrives.
    pub fn grab(&mut self, port: &str) -> Result<Datum> {
        self.ports.grab(port)
    }

    pub fn try_grab(&mut self, port: &str) -> Result<Option<Datum>> {
        self.ports.try_grab(port)
    }

    pub fn input_edge(&self, port: &str) -> Result<Edge> {
        self.ports.input_edge(port)
    }

    pub fn push(&mut self, port: &str, datum: Datum) -> Result<()> {
        self.ports.push(port, datum)
    }

    /// Push a value as a JSON encoded data datum.
    pub fn push_value<T>(&mut self, port: &str, value: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        self.ports.push(port, Datum::encode(value)?)
    }

    /// Finish the process after this step.
    ///
    /// Every output that has not emitted `Complete` yet emits it.
    pub fn mark_complete(&mut self) {
        self.complete = true;
    }

    pub fn is_complete_marked(&self) -> bool {
        self.complete
    }

    pub fn ports(&self) -> &PortSet {
        self.ports
    }
}
