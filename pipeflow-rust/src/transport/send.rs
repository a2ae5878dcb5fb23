use super::{TransportSettings, PORT_NAME};
use crate::{
    codec,
    error::{Error, Result},
    port::{PortFlag, PortSet, TYPE_ANY},
    process::{DataChecking, Process, StepContext},
};
use log::{debug, trace};
use pipeflow_config::ConfigBlock;
use pipeflow_link::Publisher;

/// Publishes every datum of its input to the subscribers on the transport.
///
/// Initialization blocks until `expected_subscribers` have completed
/// the handshake.
#[derive(Debug, Default)]
pub struct TransportSend {
    settings: Option<TransportSettings>,
    publisher: Option<Publisher>,
}

impl TransportSend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Process for TransportSend {
    fn configure(&mut self, config: &ConfigBlock, ports: &mut PortSet) -> Result<()> {
        self.settings = Some(TransportSettings::from_config(config)?);
        ports.declare_input(
            PORT_NAME,
            TYPE_ANY,
            PortFlag::Required,
            "Datums to publish.",
        )?;
        Ok(())
    }

    fn initialize(&mut self, ports: &mut PortSet) -> Result<()> {
        let settings = self
            .settings
            .as_ref()
            .ok_or_else(|| Error::step(ports.process(), "the process is not configured"))?;

        let mut publisher = Publisher::bind(
            &settings.transport,
            settings.port,
            settings.expected_subscribers,
        )?;
        debug!(
            "`{}` waiting for {} subscribers on port {}",
            ports.process(),
            settings.expected_subscribers,
            settings.port
        );
        publisher.wait_for_subscribers()?;

        self.publisher = Some(publisher);
        Ok(())
    }

    fn step(&mut self, ctx: &mut StepContext<'_>) -> Result<()> {
        let datum = ctx.grab(PORT_NAME)?;
        let publisher = self
            .publisher
            .as_mut()
            .ok_or_else(|| Error::step(ctx.name(), "the publisher is not bound"))?;

        let message = codec::encode(&datum);
        trace!("`{}` publishes {:?}", ctx.name(), datum.kind());
        publisher.publish(&message)?;

        if datum.is_complete() {
            ctx.mark_complete();
        }
        Ok(())
    }

    fn finalize(&mut self) -> Result<()> {
        if let Some(mut publisher) = self.publisher.take() {
            publisher.close()?;
        }
        Ok(())
    }

    fn data_checking(&self) -> DataChecking {
        DataChecking::None
    }
}
