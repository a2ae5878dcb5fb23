use crate::{
    error::Result,
    port::{PortFlag, PortSet},
    process::{Process, StepContext},
};
use pipeflow_config::{ConfigBlock, ConfigError};

pub const NUMBER_PORT: &str = "number";
pub const INTEGER_TYPE: &str = "integer";

/// Emits the integers in `start..end`, then completes.
#[derive(Debug, Default)]
pub struct Numbers {
    next: i64,
    end: i64,
}

impl Numbers {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Process for Numbers {
    fn configure(&mut self, config: &ConfigBlock, ports: &mut PortSet) -> Result<()> {
        let start: i64 = config.get_or("start", 0)?;
        let end: i64 = config.get_or("end", 100)?;
        if end < start {
            return Err(ConfigError::invalid("end", end, "the end is less than the start").into());
        }
        self.next = start;
        self.end = end;

        ports.declare_output(
            NUMBER_PORT,
            INTEGER_TYPE,
            PortFlag::Required,
            "The numbers, one per step.",
        )?;
        Ok(())
    }

    fn step(&mut self, ctx: &mut StepContext<'_>) -> Result<()> {
        if self.next >= self.end {
            ctx.mark_complete();
            return Ok(());
        }

        ctx.push_value(NUMBER_PORT, &self.next)?;
        self.next += 1;
        Ok(())
    }
}
