use super::{TransportSettings, PORT_NAME};
use crate::{
    codec,
    error::{Error, Result},
    port::{PortFlag, PortSet, TYPE_ANY},
    process::{DataChecking, Process, StepContext},
};
use log::{debug, trace, warn};
use pipeflow_config::ConfigBlock;
use pipeflow_link::Subscriber;

/// Emits the datums published on `connect_host:port`, one per step.
///
/// The subscriber handshake runs during initialization.
#[derive(Debug, Default)]
pub struct TransportReceive {
    settings: Option<TransportSettings>,
    subscriber: Option<Subscriber>,
}

impl TransportReceive {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Process for TransportReceive {
    fn configure(&mut self, config: &ConfigBlock, ports: &mut PortSet) -> Result<()> {
        self.settings = Some(TransportSettings::from_config(config)?);
        ports.declare_output(
            PORT_NAME,
            TYPE_ANY,
            PortFlag::Required,
            "Datums received from the publisher.",
        )?;
        Ok(())
    }

    fn initialize(&mut self, ports: &mut PortSet) -> Result<()> {
        let settings = self
            .settings
            .as_ref()
            .ok_or_else(|| Error::step(ports.process(), "the process is not configured"))?;

        let mut subscriber = Subscriber::connect(
            &settings.transport,
            &settings.connect_host,
            settings.port,
        )?;
        subscriber.handshake()?;
        debug!(
            "`{}` subscribed to {}:{}",
            ports.process(),
            settings.connect_host,
            settings.port
        );

        self.subscriber = Some(subscriber);
        Ok(())
    }

    fn step(&mut self, ctx: &mut StepContext<'_>) -> Result<()> {
        let subscriber = self
            .subscriber
            .as_mut()
            .ok_or_else(|| Error::step(ctx.name(), "the subscriber is not connected"))?;

        let message = loop {
            match subscriber.receive() {
                Ok(Some(message)) => break message,
                Ok(None) => {
                    return Err(Error::step(
                        ctx.name(),
                        "the publisher went away before completing",
                    ))
                }
                Err(err) => warn!("`{}` failed to receive, retrying: {:#}", ctx.name(), err),
            }
        };

        let datum = codec::decode(&message)?;
        trace!("`{}` received {:?}", ctx.name(), datum.kind());

        if datum.is_complete() {
            ctx.mark_complete();
        } else {
            ctx.push(PORT_NAME, datum)?;
        }
        Ok(())
    }

    fn finalize(&mut self) -> Result<()> {
        if let Some(mut subscriber) = self.subscriber.take() {
            subscriber.close()?;
        }
        Ok(())
    }

    fn data_checking(&self) -> DataChecking {
        DataChecking::None
    }
}
