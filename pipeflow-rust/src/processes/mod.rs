//! Built-in processes.

mod collector;
mod numbers;
mod passthrough;
mod print_number;

pub use collector::*;
pub use numbers::*;
pub use passthrough::*;
pub use print_number::*;

use crate::{
    error::Result,
    registry::{PluginFactory, PluginModule, Registrar},
    transport::{TransportBridge, TransportReceive, TransportSend},
};

/// Registers the built-in processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinModule;

impl BuiltinModule {
    pub const NAME: &'static str = "pipeflow-builtin";
}

impl PluginModule for BuiltinModule {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn register(&self, registrar: &Registrar<'_>) -> Result<()> {
        let factories = [
            PluginFactory::process("numbers", |_| Ok(Numbers::new()))
                .describe("Emits the integers from `start` up to `end`."),
            PluginFactory::process("print_number", |_| Ok(PrintNumber::new()))
                .describe("Writes integers to the `output` file."),
            PluginFactory::process("passthrough", |_| Ok(Passthrough))
                .describe("Forwards its input unchanged."),
            PluginFactory::process("transport_send", |_| Ok(TransportSend::new()))
                .describe("Publishes its input on a transport."),
            PluginFactory::process("transport_receive", |_| Ok(TransportReceive::new()))
                .describe("Emits the datums received from a transport."),
            PluginFactory::process("transport_bridge", |_| Ok(TransportBridge::new()))
                .describe("Joins two pipelines in both directions."),
        ];

        for factory in factories {
            registrar.register(factory)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        datum::Datum,
        edge::Edge,
        error::Error,
        node::Node,
        process::{Process, State},
        registry::Registry,
    };
    use anyhow::ensure;
    use pipeflow_config::ConfigBlock;

    fn node(name: &str, process: impl Process + 'static, config: ConfigBlock) -> Node {
        Node::new(name, "test", Box::new(process), config)
    }

    #[test]
    fn builtin_module_registers_processes() -> anyhow::Result<()> {
        let registry = Registry::new();
        ensure!(registry.load_module(&BuiltinModule)?);
        let names = registry.names(std::any::type_name::<dyn Process>())?;
        ensure!(
            names
                == [
                    "numbers",
                    "print_number",
                    "passthrough",
                    "transport_send",
                    "transport_receive",
                    "transport_bridge"
                ]
        );
        ensure!(registry
            .lookup_as::<dyn Process>("numbers")?
            .origin()
            == BuiltinModule::NAME);
        Ok(())
    }

    #[test]
    fn numbers_end_caps() -> anyhow::Result<()> {
        let mut numbers = node(
            "numbers",
            Numbers::new(),
            ConfigBlock::new().with("start", 3).with("end", 5),
        );
        numbers.configure()?;
        let edge = Edge::new(4)?;
        numbers.connect_output(NUMBER_PORT, edge.clone())?;
        numbers.initialize()?;

        while !numbers.step()?.is_terminal() {}

        ensure!(numbers.state() == State::Complete);
        ensure!(edge.receive()?.decode::<i64>()? == 3);
        ensure!(edge.receive()?.decode::<i64>()? == 4);
        ensure!(edge.receive()? == Datum::Complete);
        ensure!(edge.is_empty());
        Ok(())
    }

    #[test]
    fn invalid_range_is_a_configuration_error() {
        let mut numbers = node(
            "numbers",
            Numbers::new(),
            ConfigBlock::new().with("start", 5).with("end", 1),
        );
        let err = numbers.configure().unwrap_err();
        assert!(matches!(
            err,
            Error::Configuration { ref process, ref key, .. } if process == "numbers" && key == "end"
        ));
        assert_eq!(numbers.state(), State::Failed);
    }

    #[test]
    fn print_number_rejects_empty_path() {
        let mut print = node(
            "print",
            PrintNumber::new(),
            ConfigBlock::new().with("output", ""),
        );
        assert!(matches!(
            print.configure(),
            Err(Error::Configuration { ref key, .. }) if key == "output"
        ));

        let mut print = node("print", PrintNumber::new(), ConfigBlock::new());
        assert!(matches!(
            print.configure(),
            Err(Error::Configuration { ref key, value: None, .. }) if key == "output"
        ));
    }

    #[test]
    fn print_number_writes_lines() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("numbers.txt");

        let mut print = node(
            "print",
            PrintNumber::new(),
            ConfigBlock::new().with("output", path.to_string_lossy().into_owned()),
        );
        print.configure()?;
        let edge = Edge::new(4)?;
        print.connect_input(NUMBER_PORT, edge.clone())?;
        print.initialize()?;

        edge.send(Datum::encode(&7)?)?;
        edge.send(Datum::encode(&11)?)?;
        edge.send(Datum::Complete)?;
        while !print.step()?.is_terminal() {}
        print.finalize()?;

        ensure!(std::fs::read_to_string(&path)? == "7\n11\n");
        Ok(())
    }
}
