use crate::{
    datum::Datum,
    error::Result,
    port::{PortFlag, PortSet, TYPE_ANY},
    process::{DataChecking, Process, StepContext},
};
use flume::{Receiver, Sender};
use log::trace;
use pipeflow_config::ConfigBlock;

pub const COLLECTOR_PORT: &str = "input";

/// A sink handing every datum it receives, control datums included,
/// to a channel. It completes after forwarding `Complete`.
#[derive(Debug)]
pub struct Collector {
    tx: Sender<Datum>,
}

impl Collector {
    pub fn new() -> (Self, Receiver<Datum>) {
        let (tx, rx) = flume::unbounded();
        (Self { tx }, rx)
    }
}

impl Process for Collector {
    fn configure(&mut self, _config: &ConfigBlock, ports: &mut PortSet) -> Result<()> {
        ports.declare_input(COLLECTOR_PORT, TYPE_ANY, PortFlag::Required, "")?;
        Ok(())
    }

    fn step(&mut self, ctx: &mut StepContext<'_>) -> Result<()> {
        let datum = ctx.grab(COLLECTOR_PORT)?;
        trace!("`{}` collected {:?}", ctx.name(), datum.kind());

        let complete = datum.is_complete();
        // the host may have stopped listening
        let _ = self.tx.send(datum);

        if complete {
            ctx.mark_complete();
        }
        Ok(())
    }

    fn data_checking(&self) -> DataChecking {
        DataChecking::None
    }
}
