use crate::{
    error::Result,
    port::{PortFlag, PortSet, TYPE_ANY},
    process::{Process, StepContext},
};
use pipeflow_config::ConfigBlock;

/// Forwards its input unchanged.
#[derive(Debug, Default)]
pub struct Passthrough;

impl Process for Passthrough {
    fn configure(&mut self, _config: &ConfigBlock, ports: &mut PortSet) -> Result<()> {
        ports.declare_input("input", TYPE_ANY, PortFlag::Required, "")?;
        ports.declare_output("output", TYPE_ANY, PortFlag::Required, "")?;
        Ok(())
    }

    fn step(&mut self, ctx: &mut StepContext<'_>) -> Result<()> {
        let datum = ctx.take("input")?;
        ctx.push("output", datum)
    }
}
