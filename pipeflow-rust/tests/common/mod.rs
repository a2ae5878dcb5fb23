#![allow(dead_code)]

use pipeflow::{
    config::ConfigBlock, DataChecking, Datum, PortFlag, PortSet, Process, Result, StepContext,
    TYPE_ANY,
};
use serde_json::json;
use std::collections::VecDeque;

pub const SCRIPT_PORT: &str = "output";

/// A source emitting a fixed sequence of datums, one per step.
///
/// It completes after emitting `Complete` or running out of datums.
#[derive(Debug)]
pub struct Script {
    datums: VecDeque<Datum>,
    type_name: String,
}

impl Script {
    pub fn new(datums: impl IntoIterator<Item = Datum>) -> Self {
        Self {
            datums: datums.into_iter().collect(),
            type_name: TYPE_ANY.to_string(),
        }
    }

    pub fn typed(mut self, type_name: &str) -> Self {
        self.type_name = type_name.to_string();
        self
    }
}

impl Process for Script {
    fn configure(&mut self, _config: &ConfigBlock, ports: &mut PortSet) -> Result<()> {
        ports.declare_output(SCRIPT_PORT, &self.type_name, PortFlag::Required, "")
    }

    fn step(&mut self, ctx: &mut StepContext<'_>) -> Result<()> {
        match self.datums.pop_front() {
            Some(datum) => {
                let complete = datum.is_complete();
                ctx.push(SCRIPT_PORT, datum)?;
                if complete {
                    ctx.mark_complete();
                }
            }
            None => ctx.mark_complete(),
        }
        Ok(())
    }

    fn data_checking(&self) -> DataChecking {
        DataChecking::None
    }
}

/// A source emitting `Empty` until nobody consumes its output.
#[derive(Debug, Default)]
pub struct Endless;

impl Process for Endless {
    fn configure(&mut self, _config: &ConfigBlock, ports: &mut PortSet) -> Result<()> {
        ports.declare_output(SCRIPT_PORT, TYPE_ANY, PortFlag::Required, "")
    }

    fn step(&mut self, ctx: &mut StepContext<'_>) -> Result<()> {
        ctx.push(SCRIPT_PORT, Datum::Empty)
    }

    fn data_checking(&self) -> DataChecking {
        DataChecking::None
    }
}

/// A source that emits `Complete` once its sender is dropped or signals.
#[derive(Debug)]
pub struct Gate {
    open: flume::Receiver<()>,
}

impl Gate {
    pub fn new() -> (Self, flume::Sender<()>) {
        let (tx, open) = flume::bounded(1);
        (Self { open }, tx)
    }
}

impl Process for Gate {
    fn configure(&mut self, _config: &ConfigBlock, ports: &mut PortSet) -> Result<()> {
        ports.declare_output(SCRIPT_PORT, TYPE_ANY, PortFlag::Required, "")
    }

    fn step(&mut self, ctx: &mut StepContext<'_>) -> Result<()> {
        let _ = self.open.recv();
        ctx.push(SCRIPT_PORT, Datum::Complete)?;
        ctx.mark_complete();
        Ok(())
    }

    fn data_checking(&self) -> DataChecking {
        DataChecking::None
    }
}

/// A checked sink with a typed input that drops what it receives.
#[derive(Debug)]
pub struct Discard {
    type_name: String,
}

impl Discard {
    pub fn new(type_name: &str) -> Self {
        Self {
            type_name: type_name.to_string(),
        }
    }
}

impl Process for Discard {
    fn configure(&mut self, _config: &ConfigBlock, ports: &mut PortSet) -> Result<()> {
        ports.declare_input("input", &self.type_name, PortFlag::Required, "")
    }

    fn step(&mut self, _ctx: &mut StepContext<'_>) -> Result<()> {
        Ok(())
    }
}

/// Configuration of a transport process on an in-memory network.
pub fn memory_transport(network: &str, port: u16) -> ConfigBlock {
    ConfigBlock::new()
        .with("port", port)
        .with("transport", json!({ "type": "memory", "network": network }))
}

/// Drain a collector channel until `Complete` or until it disconnects.
pub fn collected(rx: &flume::Receiver<Datum>) -> Vec<Datum> {
    let mut datums = vec![];
    for datum in rx.iter() {
        let complete = datum.is_complete();
        datums.push(datum);
        if complete {
            break;
        }
    }
    datums
}
