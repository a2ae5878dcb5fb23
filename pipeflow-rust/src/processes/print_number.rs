use super::numbers::{INTEGER_TYPE, NUMBER_PORT};
use crate::{
    error::{Error, Result},
    port::{PortFlag, PortSet},
    process::{Process, StepContext},
};
use log::debug;
use pipeflow_config::{ConfigBlock, ConfigError};
use std::{
    fs::File,
    io::{BufWriter, Write},
    path::PathBuf,
};

/// Writes every received integer on its own line to the `output` file.
#[derive(Debug, Default)]
pub struct PrintNumber {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl PrintNumber {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Process for PrintNumber {
    fn configure(&mut self, config: &ConfigBlock, ports: &mut PortSet) -> Result<()> {
        let path: String = config.get("output")?;
        if path.is_empty() {
            return Err(ConfigError::invalid("output", "\"\"", "the path must not be empty").into());
        }
        self.path = path.into();

        ports.declare_input(
            NUMBER_PORT,
            INTEGER_TYPE,
            PortFlag::Required,
            "The numbers to print.",
        )?;
        Ok(())
    }

    fn initialize(&mut self, _ports: &mut PortSet) -> Result<()> {
        let file = File::create(&self.path)?;
        debug!("printing numbers to {}", self.path.display());
        self.writer = Some(BufWriter::new(file));
        Ok(())
    }

    fn step(&mut self, ctx: &mut StepContext<'_>) -> Result<()> {
        let value: i64 = ctx.decode(NUMBER_PORT)?;
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| Error::step(ctx.name(), "the output file is not open"))?;
        writeln!(writer, "{}", value)?;
        Ok(())
    }

    fn finalize(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
        }
        Ok(())
    }
}
