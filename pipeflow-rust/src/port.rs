use crate::{
    datum::Datum,
    edge::Edge,
    error::{Error, Result},
};
use indexmap::IndexMap;
use pipeflow_config::{Ident, IntoIdent};

/// The port type that accepts every other type.
pub const TYPE_ANY: &str = "_any";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortFlag {
    /// The port must be connected before the process initializes.
    Required,
    Optional,
}

/// The declaration of a port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    pub name: Ident,
    pub type_name: String,
    pub flag: PortFlag,
    pub description: String,
}

impl PortInfo {
    pub fn is_required(&self) -> bool {
        self.flag == PortFlag::Required
    }

    /// Whether an edge may connect an output of type `from` to an input of type `to`.
    pub fn types_compatible(from: &str, to: &str) -> bool {
        from == TYPE_ANY || to == TYPE_ANY || from == to
    }
}

#[derive(Debug)]
pub struct InputPort {
    info: PortInfo,
    edge: Option<Edge>,
}

impl InputPort {
    pub fn info(&self) -> &PortInfo {
        &self.info
    }

    pub fn edge(&self) -> Option<&Edge> {
        self.edge.as_ref()
    }

    pub fn is_connected(&self) -> bool {
        self.edge.is_some()
    }
}

#[derive(Debug)]
pub struct OutputPort {
    info: PortInfo,
    edges: Vec<Edge>,
    completed: bool,
    pushed: usize,
}

impl OutputPort {
    pub fn info(&self) -> &PortInfo {
        &self.info
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn is_connected(&self) -> bool {
        !self.edges.is_empty()
    }

    /// Whether `Complete` has been emitted on this port.
    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// The number of datums pushed since the step began.
    pub fn pushed(&self) -> usize {
        self.pushed
    }
}

/// The ports of one process and the edges attached to them.
#[derive(Debug)]
pub struct PortSet {
    process: Ident,
    inputs: IndexMap<Ident, InputPort>,
    outputs: IndexMap<Ident, OutputPort>,
}

impl PortSet {
    pub fn new(process: impl IntoIdent) -> Self {
        Self {
            process: process.into(),
            inputs: IndexMap::new(),
            outputs: IndexMap::new(),
        }
    }

    pub fn process(&self) -> &Ident {
        &self.process
    }

    pub fn declare_input(
        &mut self,
        name: impl IntoIdent,
        type_name: &str,
        flag: PortFlag,
        description: &str,
    ) -> Result<()> {
        let info = self.port_info(name, type_name, flag, description);
        if self.inputs.contains_key(&info.name) {
            return Err(self.declared_twice(&info));
        }
        let name = info.name.clone();
        self.inputs.insert(name, InputPort { info, edge: None });
        Ok(())
    }

    pub fn declare_output(
        &mut self,
        name: impl IntoIdent,
        type_name: &str,
        flag: PortFlag,
        description: &str,
    ) -> Result<()> {
        let info = self.port_info(name, type_name, flag, description);
        if self.outputs.contains_key(&info.name) {
            return Err(self.declared_twice(&info));
        }
        let name = info.name.clone();
        self.outputs.insert(
            name,
            OutputPort {
                info,
                edges: vec![],
                completed: false,
                pushed: 0,
            },
        );
        Ok(())
    }

    fn port_info(
        &self,
        name: impl IntoIdent,
        type_name: &str,
        flag: PortFlag,
        description: &str,
    ) -> PortInfo {
        PortInfo {
            name: name.into(),
            type_name: type_name.to_string(),
            flag,
            description: description.to_string(),
        }
    }

    fn declared_twice(&self, info: &PortInfo) -> Error {
        Error::configuration(
            &self.process,
            info.name.as_str(),
            None,
            "the port is declared twice",
        )
    }

    pub fn input(&self, name: &str) -> Option<&InputPort> {
        self.inputs.get(name)
    }

    pub fn output(&self, name: &str) -> Option<&OutputPort> {
        self.outputs.get(name)
    }

    pub fn inputs(&self) -> impl Iterator<Item = &InputPort> {
        self.inputs.values()
    }

    pub fn outputs(&self) -> impl Iterator<Item = &OutputPort> {
        self.outputs.values()
    }

    pub(crate) fn connect_input(&mut self, name: &str, edge: Edge) -> Result<()> {
        let port = self
            .inputs
            .get_mut(name)
            .ok_or_else(|| Error::input_not_found(&self.process, name))?;
        if port.edge.is_some() {
            return Err(Error::configuration(
                &self.process,
                name,
                None,
                "the input port is already connected",
            ));
        }
        port.edge = Some(edge);
        Ok(())
    }

    pub(crate) fn connect_output(&mut self, name: &str, edge: Edge) -> Result<()> {
        let port = self
            .outputs
            .get_mut(name)
            .ok_or_else(|| Error::output_not_found(&self.process, name))?;
        port.edges.push(edge);
        Ok(())
    }

    /// The first required port that has no edge.
    pub(crate) fn unconnected_required(&self) -> Option<&PortInfo> {
        let inputs = self
            .inputs
            .values()
            .filter(|port| !port.is_connected())
            .map(|port| &port.info);
        let outputs = self
            .outputs
            .values()
            .filter(|port| !port.is_connected())
            .map(|port| &port.info);
        inputs.chain(outputs).find(|info| info.is_required())
    }

    /// A handle to the edge feeding the input port.
    pub fn input_edge(&self, name: &str) -> Result<Edge> {
        let port = self
            .inputs
            .get(name)
            .ok_or_else(|| Error::input_not_found(&self.process, name))?;
        port.edge.clone().ok_or_else(|| {
            Error::step(&self.process, format!("input port `{}` is not connected", name))
        })
    }

    /// Receive from an input port, blocking until a datum arrives.
    pub fn grab(&mut self, name: &str) -> Result<Datum> {
        self.input_edge(name)?.receive()
    }

    /// Receive from an input port if a datum is waiting.
    ///
    /// An unconnected port, or one whose edge already delivered
    /// `Complete`, never has data.
    pub fn try_grab(&mut self, name: &str) -> Result<Option<Datum>> {
        let port = self
            .inputs
            .get(name)
            .ok_or_else(|| Error::input_not_found(&self.process, name))?;
        match &port.edge {
            Some(edge) if !edge.is_closed() => edge.try_receive(),
            _ => Ok(None),
        }
    }

    /// Send a datum to every edge of the output port.
    ///
    /// Edges whose consumer has finished are skipped.
    pub fn push(&mut self, name: &str, datum: Datum) -> Result<()> {
        let port = self
            .outputs
            .get_mut(name)
            .ok_or_else(|| Error::output_not_found(&self.process, name))?;
        if port.completed {
            return Err(Error::output_completed(&self.process, name));
        }

        if datum.is_complete() {
            port.completed = true;
        }
        port.pushed += 1;

        if let Some((last, rest)) = port.edges.split_last() {
            for edge in rest {
                deliver(edge, datum.clone())?;
            }
            deliver(last, datum)?;
        }
        Ok(())
    }

    /// Send a datum to every output port that is not completed.
    pub fn push_all(&mut self, datum: Datum) -> Result<()> {
        let names: Vec<Ident> = self
            .outputs
            .values()
            .filter(|port| !port.completed)
            .map(|port| port.info.name.clone())
            .collect();
        for name in names {
            self.push(name.as_str(), datum.clone())?;
        }
        Ok(())
    }

    /// Emit `Complete` on every output port that has not emitted it yet.
    pub fn complete_all(&mut self) -> Result<()> {
        self.push_all(Datum::Complete)
    }

    /// Whether every connected output edge has lost its consumer.
    ///
    /// A process without connected outputs is never abandoned.
    pub fn outputs_abandoned(&self) -> bool {
        let mut edges = self.outputs.values().flat_map(|port| port.edges.iter()).peekable();
        edges.peek().is_some() && edges.all(|edge| edge.is_closed())
    }

    /// Close every input edge so that producers stop feeding this process.
    pub(crate) fn close_inputs(&mut self) {
        self.inputs
            .values()
            .filter_map(|port| port.edge.as_ref())
            .for_each(|edge| edge.close());
    }

    pub(crate) fn begin_step(&mut self) {
        self.outputs.values_mut().for_each(|port| port.pushed = 0);
    }
}

fn deliver(edge: &Edge, datum: Datum) -> Result<()> {
    match edge.send(datum) {
        Err(Error::EdgeClosed) => Ok(()),
        result => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::ensure;

    fn ports() -> anyhow::Result<PortSet> {
        let mut ports = PortSet::new("proc");
        ports.declare_input("input", TYPE_ANY, PortFlag::Required, "")?;
        ports.declare_input("hint", "integer", PortFlag::Optional, "")?;
        ports.declare_output("output", TYPE_ANY, PortFlag::Required, "")?;
        Ok(ports)
    }

    #[test]
    fn duplicate_port_is_rejected() -> anyhow::Result<()> {
        let mut ports = ports()?;
        let result = ports.declare_input("input", TYPE_ANY, PortFlag::Optional, "");
        ensure!(matches!(result, Err(Error::Configuration { .. })));
        // directions have separate namespaces
        ports.declare_output("input", TYPE_ANY, PortFlag::Optional, "")?;
        Ok(())
    }

    #[test]
    fn fan_out_and_completion() -> anyhow::Result<()> {
        let mut ports = ports()?;
        ensure!(ports.unconnected_required().map(|info| info.name.as_str()) == Some("input"));

        let first = Edge::new(2)?;
        let second = Edge::new(2)?;
        ports.connect_output("output", first.clone())?;
        ports.connect_output("output", second.clone())?;
        ports.connect_input("input", Edge::new(1)?)?;
        ensure!(ports.unconnected_required().is_none());
        ensure!(ports.try_grab("hint")?.is_none());

        ports.push("output", Datum::data("x"))?;
        ports.complete_all()?;
        ensure!(matches!(
            ports.push("output", Datum::Empty),
            Err(Error::OutputCompleted { .. })
        ));

        for edge in [first, second] {
            ensure!(edge.receive()? == Datum::data("x"));
            ensure!(edge.receive()? == Datum::Complete);
        }
        Ok(())
    }

    #[test]
    fn type_compatibility() {
        assert!(PortInfo::types_compatible("integer", "integer"));
        assert!(PortInfo::types_compatible(TYPE_ANY, "integer"));
        assert!(PortInfo::types_compatible("integer", TYPE_ANY));
        assert!(!PortInfo::types_compatible("integer", "string"));
    }

    #[test]
    fn closed_optional_input_has_no_data() -> anyhow::Result<()> {
        let mut ports = ports()?;
        let hint = Edge::new(2)?;
        ports.connect_input("hint", hint.clone())?;

        hint.send(Datum::Complete)?;
        ensure!(ports.try_grab("hint")? == Some(Datum::Complete));
        ensure!(ports.try_grab("hint")?.is_none());
        ensure!(ports.try_grab("hint")?.is_none());
        Ok(())
    }

    #[test]
    fn pushing_to_a_finished_consumer_is_dropped() -> anyhow::Result<()> {
        let mut ports = ports()?;
        let kept = Edge::new(2)?;
        let finished = Edge::new(2)?;
        ports.connect_output("output", kept.clone())?;
        ports.connect_output("output", finished.clone())?;
        ensure!(!ports.outputs_abandoned());

        finished.close();
        ports.push("output", Datum::data("x"))?;
        ensure!(kept.receive()? == Datum::data("x"));
        ensure!(!ports.outputs_abandoned());

        kept.close();
        ensure!(ports.outputs_abandoned());
        Ok(())
    }

    #[test]
    fn unknown_port_names_are_errors() -> anyhow::Result<()> {
        let mut ports = ports()?;
        ensure!(matches!(
            ports.grab("a.b"),
            Err(Error::PortNotFound { ref port, direction: "input", .. }) if port == "a.b"
        ));
        ensure!(matches!(ports.try_grab(""), Err(Error::PortNotFound { .. })));
        ensure!(matches!(
            ports.push("no such port", Datum::Empty),
            Err(Error::PortNotFound { direction: "output", .. })
        ));
        ensure!(matches!(
            ports.input_edge("bad-name!"),
            Err(Error::PortNotFound { .. })
        ));
        Ok(())
    }
}
