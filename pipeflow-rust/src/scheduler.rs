//! Pipeline execution.
//!
//! [ThreadPerProcess] steps every process on its own thread and relies
//! on edge backpressure for pacing. [SyncScheduler] steps ready
//! processes round-robin on the calling thread.

use crate::{
    edge::AbortHandle,
    error::{Error, Result},
    node::Node,
    pipeline::Pipeline,
    process::State,
};
use derivative::Derivative;
use flume::{Receiver, Sender};
use indexmap::IndexMap;
use itertools::Itertools;
use log::{debug, error, info, warn};
use pipeflow_config::Ident;
use std::{
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

pub trait Scheduler {
    /// Run the pipeline until every process terminates.
    fn run(&self, pipeline: Pipeline) -> Result<RunReport>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessReport {
    pub state: State,
    pub steps: u64,
}

/// The final state of every process after a run.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub processes: IndexMap<Ident, ProcessReport>,
    /// Processes whose threads did not stop and were left behind.
    pub detached: Vec<Ident>,
}

impl RunReport {
    fn from_nodes<'a>(nodes: impl IntoIterator<Item = &'a Node>) -> Self {
        let processes = nodes
            .into_iter()
            .map(|node| {
                let report = ProcessReport {
                    state: node.state(),
                    steps: node.steps(),
                };
                (node.name().clone(), report)
            })
            .collect();
        Self {
            processes,
            detached: vec![],
        }
    }

    pub fn is_complete(&self) -> bool {
        self.detached.is_empty()
            && self
                .processes
                .values()
                .all(|report| report.state == State::Complete)
    }

    fn into_result(self) -> Result<Self> {
        if self.is_complete() {
            return Ok(self);
        }

        let processes = self
            .processes
            .iter()
            .filter(|(_, report)| report.state != State::Complete)
            .map(|(name, _)| name)
            .chain(&self.detached)
            .map(|name| name.to_string())
            .collect_vec();
        Err(Error::IncompleteShutdown { processes })
    }
}

/// Runs each process on a dedicated thread.
#[derive(Debug, Clone, Derivative)]
#[derivative(Default)]
pub struct ThreadPerProcess {
    /// How long to wait for threads to stop after an abort.
    #[derivative(Default(value = "Duration::from_secs(1)"))]
    join_timeout: Duration,
}

impl ThreadPerProcess {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = timeout;
        self
    }

    /// Initialize the pipeline and start a thread per process.
    pub fn start(&self, mut pipeline: Pipeline) -> Result<RunningPipeline> {
        pipeline.setup()?;
        let (nodes, abort) = pipeline.into_parts();
        let (failure_tx, failure_rx) = flume::unbounded();

        let mut workers = IndexMap::new();
        for (name, mut node) in nodes {
            let failures = failure_tx.clone();
            let handle = thread::Builder::new()
                .name(format!("pipeflow-{}", name))
                .spawn(move || {
                    run_node(&mut node, &failures);
                    node
                })?;
            workers.insert(name, handle);
        }
        // workers hold the remaining senders
        drop(failure_tx);

        info!("started {} process threads", workers.len());
        Ok(RunningPipeline {
            workers,
            failures: failure_rx,
            abort,
            join_timeout: self.join_timeout,
        })
    }
}

impl Scheduler for ThreadPerProcess {
    fn run(&self, pipeline: Pipeline) -> Result<RunReport> {
        self.start(pipeline)?.wait()
    }
}

fn run_node(node: &mut Node, failures: &Sender<(Ident, Error)>) {
    loop {
        match node.step() {
            Ok(state) if state.is_terminal() => break,
            Ok(_) => {}
            Err(Error::Aborted) => {
                debug!("process `{}` aborted", node.name());
                break;
            }
            Err(err) => {
                let _ = failures.send((node.name().clone(), err));
                break;
            }
        }
    }

    if let Err(err) = node.finalize() {
        warn!("unable to finalize process `{}`: {}", node.name(), err);
    }
}

/// A pipeline running under [ThreadPerProcess].
#[derive(Debug)]
pub struct RunningPipeline {
    workers: IndexMap<Ident, JoinHandle<Node>>,
    failures: Receiver<(Ident, Error)>,
    abort: AbortHandle,
    join_timeout: Duration,
}

impl RunningPipeline {
    /// Wait until every process terminates.
    ///
    /// The first failing process aborts the others and its error is
    /// returned.
    pub fn wait(mut self) -> Result<RunReport> {
        // returns an error once every worker has exited without failure
        let failure = self.failures.recv().ok();

        if let Some((name, _)) = &failure {
            warn!("process `{}` failed, aborting the pipeline", name);
            self.abort.trigger();
        }
        let report = self.join();

        match failure {
            Some((_, err)) => Err(err),
            None => report.into_result(),
        }
    }

    /// Abort the pipeline and wait for the processes to stop.
    ///
    /// Processes that had not completed are reported as an
    /// [Error::IncompleteShutdown].
    pub fn stop(mut self) -> Result<RunReport> {
        info!("stopping the pipeline");
        self.abort.trigger();
        let report = self.join();

        if let Ok((_, err)) = self.failures.try_recv() {
            return Err(err);
        }
        report.into_result()
    }

    fn join(&mut self) -> RunReport {
        let deadline = Instant::now() + self.join_timeout;
        let mut report = RunReport::default();

        for (name, handle) in self.workers.drain(..) {
            if self.abort.is_triggered() {
                // threads blocked in a transport call are left behind
                while !handle.is_finished() && Instant::now() < deadline {
                    thread::sleep(Duration::from_millis(10));
                }
                if !handle.is_finished() {
                    warn!("process `{}` did not stop, detaching its thread", name);
                    report.detached.push(name);
                    continue;
                }
            }

            let process = match handle.join() {
                Ok(node) => ProcessReport {
                    state: node.state(),
                    steps: node.steps(),
                },
                Err(_) => {
                    error!("process `{}` panicked", name);
                    ProcessReport {
                        state: State::Failed,
                        steps: 0,
                    }
                }
            };
            report.processes.insert(name, process);
        }

        report
    }
}

/// Steps ready processes round-robin on the calling thread.
///
/// A pass that finds no ready process while some have not terminated
/// fails with [Error::Stalled], unless one of them waits on an event
/// from outside the pipeline.
#[derive(Debug, Clone, Default)]
pub struct SyncScheduler;

impl Scheduler for SyncScheduler {
    fn run(&self, mut pipeline: Pipeline) -> Result<RunReport> {
        pipeline.setup()?;
        let (mut nodes, _abort) = pipeline.into_parts();

        let result = run_rounds(&mut nodes);

        for node in nodes.values_mut() {
            if let Err(err) = node.finalize() {
                warn!("unable to finalize process `{}`: {}", node.name(), err);
            }
        }
        result?;

        RunReport::from_nodes(nodes.values()).into_result()
    }
}

/// The pause between passes while only external events can make progress.
const IDLE_INTERVAL: Duration = Duration::from_millis(1);

fn run_rounds(nodes: &mut IndexMap<Ident, Node>) -> Result<()> {
    let mut round = 0u64;

    loop {
        let mut active = false;
        let mut progressed = false;

        for node in nodes.values_mut() {
            if node.state().is_terminal() {
                continue;
            }
            active = true;

            if node.is_ready() {
                node.step()?;
                progressed = true;
            }
        }

        if !active {
            debug!("every process terminated after {} rounds", round);
            return Ok(());
        }
        if !progressed && nodes.values().any(|node| node.is_waiting()) {
            thread::sleep(IDLE_INTERVAL);
            continue;
        }
        if !progressed {
            let processes: Vec<String> = nodes
                .values()
                .filter(|node| !node.state().is_terminal())
                .map(|node| node.name().to_string())
                .collect();
            warn!(
                "pipeline stalled after {} rounds, waiting: {}",
                round,
                processes.iter().join(", ")
            );
            return Err(Error::Stalled { processes });
        }
        round += 1;
    }
}
