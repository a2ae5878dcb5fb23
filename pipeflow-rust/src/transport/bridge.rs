use super::{TransportSettings, PORT_NAME};
use crate::{
    codec,
    datum::{Datum, DatumKind},
    edge::Edge,
    error::{Error, Result},
    port::{PortFlag, PortSet, TYPE_ANY},
    process::{DataChecking, Process, Readiness, StepContext},
};
use anyhow::Context as _;
use flume::{Receiver, Sender};
use log::{debug, error, trace, warn};
use pipeflow_config::ConfigBlock;
use pipeflow_link::{Publisher, Subscriber};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

/// Capacity of the queues between the workers and the step.
pub const HANDOFF_CAPACITY: usize = 5;

const RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Joins two pipelines in both directions.
///
/// Datums arriving on the input port are published on `port`, and the
/// datums published by the remote bridge on `connect_host:connect_port`
/// are emitted on the output port. The network is served by three
/// worker threads:
///
/// - The input worker reads the input edge, encodes each datum and
///   queues it on the outbound hand-off.
/// - The publish worker completes the publisher handshake and then
///   publishes the messages the step passes on, up to `Complete`.
/// - The receive worker completes the subscriber handshake and then
///   decodes every received message onto the inbound hand-off.
///
/// Each step waits until a hand-off has something, moves every
/// outbound message to the publish worker and emits at most one
/// inbound datum. An inbound `Complete` is emitted once, completes the
/// bridge and stops the workers. Local datums that have not reached
/// the publish worker by then are not sent.
#[derive(Debug, Default)]
pub struct TransportBridge {
    settings: Option<TransportSettings>,
    running: Arc<AtomicBool>,
    workers: Option<Workers>,
}

#[derive(Debug)]
struct Workers {
    outbound: Receiver<Vec<u8>>,
    inbound: Receiver<Result<Datum>>,
    wake: Receiver<()>,
    wire: Sender<Vec<u8>>,
    /// Reasons the publish worker gave up.
    failures: Receiver<String>,
    handles: Vec<JoinHandle<()>>,
}

impl Workers {
    fn has_work(&self) -> bool {
        !self.outbound.is_empty() || !self.inbound.is_empty() || !self.failures.is_empty()
    }
}

impl TransportBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the worker threads are allowed to run.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn stop_workers(&mut self) {
        self.running.store(false, Ordering::SeqCst);

        if let Some(workers) = self.workers.take() {
            let Workers { wire, handles, .. } = workers;
            // the publish worker exits once the wire queue is drained
            drop(wire);

            for handle in handles {
                if handle.is_finished() {
                    let _ = handle.join();
                } else {
                    // blocked in a socket call; it exits on its own
                    debug!("detaching a bridge worker");
                }
            }
        }
    }
}

impl Process for TransportBridge {
    fn configure(&mut self, config: &ConfigBlock, ports: &mut PortSet) -> Result<()> {
        self.settings = Some(TransportSettings::from_config(config)?);
        ports.declare_input(
            PORT_NAME,
            TYPE_ANY,
            PortFlag::Required,
            "Datums sent to the remote pipeline.",
        )?;
        ports.declare_output(
            PORT_NAME,
            TYPE_ANY,
            PortFlag::Required,
            "Datums received from the remote pipeline.",
        )?;
        Ok(())
    }

    fn initialize(&mut self, ports: &mut PortSet) -> Result<()> {
        let settings = self
            .settings
            .as_ref()
            .ok_or_else(|| Error::step(ports.process(), "the process is not configured"))?;
        let input = ports.input_edge(PORT_NAME)?;

        // handshakes run on the workers, so that two bridges can start
        // without waiting for each other
        let publisher = Publisher::bind(
            &settings.transport,
            settings.port,
            settings.expected_subscribers,
        )?;
        let subscriber = Subscriber::connect(
            &settings.transport,
            &settings.connect_host,
            settings.connect_port,
        )?;

        let (outbound_tx, outbound_rx) = flume::bounded(HANDOFF_CAPACITY);
        let (inbound_tx, inbound_rx) = flume::bounded(HANDOFF_CAPACITY);
        let (wake_tx, wake_rx) = flume::bounded(1);
        let (wire_tx, wire_rx) = flume::unbounded();
        let (failure_tx, failure_rx) = flume::unbounded();

        self.running.store(true, Ordering::SeqCst);
        let name = ports.process();

        let input_worker = {
            let wake = wake_tx.clone();
            let running = self.running.clone();
            spawn(format!("pipeflow-{}-input", name), move || {
                input_worker(input, outbound_tx, wake, running)
            })?
        };
        let publish_worker = {
            let wake = wake_tx.clone();
            spawn(format!("pipeflow-{}-publish", name), move || {
                publish_worker(publisher, wire_rx, failure_tx, wake)
            })?
        };
        let receive_worker = {
            let running = self.running.clone();
            spawn(format!("pipeflow-{}-receive", name), move || {
                receive_worker(subscriber, inbound_tx, wake_tx, running)
            })?
        };

        debug!(
            "bridge `{}` publishes on port {} and subscribes to {}:{}",
            name, settings.port, settings.connect_host, settings.connect_port
        );

        self.workers = Some(Workers {
            outbound: outbound_rx,
            inbound: inbound_rx,
            wake: wake_rx,
            wire: wire_tx,
            failures: failure_rx,
            handles: vec![input_worker, publish_worker, receive_worker],
        });
        Ok(())
    }

    fn step(&mut self, ctx: &mut StepContext<'_>) -> Result<()> {
        let workers = self
            .workers
            .as_mut()
            .ok_or_else(|| Error::step(ctx.name(), "the bridge is not initialized"))?;

        while !workers.has_work() {
            if workers.wake.recv().is_err() {
                return Err(Error::step(
                    ctx.name(),
                    "the transport workers stopped before the remote completed",
                ));
            }
        }
        if let Ok(reason) = workers.failures.try_recv() {
            return Err(Error::step(ctx.name(), reason));
        }

        for message in workers.outbound.try_iter() {
            if workers.wire.send(message).is_err() {
                let reason = workers
                    .failures
                    .try_recv()
                    .unwrap_or_else(|_| "the publish worker has stopped".to_string());
                return Err(Error::step(ctx.name(), reason));
            }
        }

        let received = match workers.inbound.try_recv() {
            Ok(received) => received?,
            Err(_) => return Ok(()),
        };
        let complete = received.is_complete();
        ctx.push(PORT_NAME, received)?;

        if complete {
            debug!("bridge `{}` received Complete from the remote", ctx.name());
            self.stop_workers();
            ctx.mark_complete();
        }
        Ok(())
    }

    fn finalize(&mut self) -> Result<()> {
        self.stop_workers();
        Ok(())
    }

    fn data_checking(&self) -> DataChecking {
        DataChecking::None
    }

    fn readiness(&self) -> Readiness {
        match &self.workers {
            None => Readiness::Edges,
            // a step reports the workers being gone
            Some(workers) if workers.has_work() || workers.wake.is_disconnected() => {
                Readiness::Ready
            }
            Some(_) => Readiness::Waiting,
        }
    }
}

fn spawn<F>(name: String, f: F) -> Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    Ok(thread::Builder::new().name(name).spawn(f)?)
}

fn input_worker(input: Edge, outbound: Sender<Vec<u8>>, wake: Sender<()>, running: Arc<AtomicBool>) {
    while running.load(Ordering::SeqCst) {
        let datum = match input.receive_timeout(RETRY_INTERVAL) {
            Ok(Some(datum)) => datum,
            Ok(None) => continue,
            Err(err) => {
                debug!("input worker stops: {}", err);
                return;
            }
        };

        let complete = datum.is_complete();
        trace!("input worker queues {:?}", datum.kind());
        if outbound.send(codec::encode(&datum)).is_err() {
            return;
        }
        let _ = wake.try_send(());

        if complete {
            return;
        }
    }
}

fn publish_worker(
    mut publisher: Publisher,
    wire: Receiver<Vec<u8>>,
    failures: Sender<String>,
    wake: Sender<()>,
) {
    if let Err(err) = publish_all(&mut publisher, &wire) {
        error!("publish worker failed: {:#}", err);
        let _ = failures.send(format!("{:#}", err));
        let _ = wake.try_send(());
    }

    if let Err(err) = publisher.close() {
        warn!("unable to close the publisher: {:#}", err);
    }
}

fn publish_all(publisher: &mut Publisher, wire: &Receiver<Vec<u8>>) -> anyhow::Result<()> {
    publisher
        .wait_for_subscribers()
        .context("publisher handshake failed")?;

    for message in wire.iter() {
        let complete = matches!(codec::decode_kind(&message), Ok(DatumKind::Complete));
        publisher
            .publish(&message)
            .context("unable to publish a message")?;
        if complete {
            trace!("publish worker forwarded Complete");
            break;
        }
    }
    Ok(())
}

fn receive_worker(
    mut subscriber: Subscriber,
    inbound: Sender<Result<Datum>>,
    wake: Sender<()>,
    running: Arc<AtomicBool>,
) {
    while running.load(Ordering::SeqCst) {
        if let Err(err) = subscriber.handshake() {
            warn!("subscriber handshake failed, retrying: {:#}", err);
            thread::sleep(RETRY_INTERVAL);
            continue;
        }

        match subscriber.receive() {
            Ok(Some(message)) => {
                let decoded = codec::decode(&message);
                // an undecodable message is fatal to the bridge
                let last = match &decoded {
                    Ok(datum) => datum.is_complete(),
                    Err(_) => true,
                };
                if inbound.send(decoded).is_err() {
                    break;
                }
                let _ = wake.try_send(());
                if last {
                    break;
                }
            }
            Ok(None) => {
                debug!("the remote publisher closed");
                break;
            }
            Err(err) => warn!("unable to receive a message, retrying: {:#}", err),
        }
    }

    if let Err(err) = subscriber.close() {
        warn!("unable to close the subscriber: {:#}", err);
    }
}
