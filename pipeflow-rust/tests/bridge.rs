mod common;

use anyhow::{ensure, Result};
use common::{collected, memory_transport, Endless, Gate, Script};
use pipeflow::{
    codec,
    config::ConfigBlock,
    link::{self, Publisher, Subscriber},
    processes::Collector,
    scheduler::{Scheduler, SyncScheduler, ThreadPerProcess},
    transport::{TransportBridge, PORT_NAME},
    Datum, Error, Pipeline, Process,
};
use std::{
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

fn bridge_pipeline(
    source: Box<dyn Process>,
    config: ConfigBlock,
) -> Result<(Pipeline, flume::Receiver<Datum>)> {
    let (collector, rx) = Collector::new();
    let bridge_in = format!("bridge.{}", PORT_NAME);

    let mut pipeline = Pipeline::new();
    pipeline.add_process("source", "script", source, ConfigBlock::new())?;
    pipeline.add_process("bridge", "transport_bridge", Box::new(TransportBridge::new()), config)?;
    pipeline.add_process("sink", "collector", Box::new(collector), ConfigBlock::new())?;
    pipeline.connect("source.output", bridge_in.as_str(), 4)?;
    pipeline.connect(bridge_in.as_str(), "sink.input", 4)?;
    Ok((pipeline, rx))
}

/// A raw publisher standing in for a remote bridge. It publishes
/// `messages` once the bridge has subscribed and hands itself back
/// without closing.
fn remote(network: &str, port: u16, messages: &[&[u8]]) -> Result<JoinHandle<Result<Publisher>>> {
    let transport = link::Config::Memory(link::memory::Config::new(network));
    let mut publisher = Publisher::bind(&transport, port, 1)?;
    let messages: Vec<Vec<u8>> = messages.iter().map(|message| message.to_vec()).collect();

    Ok(thread::spawn(move || {
        publisher.wait_for_subscribers()?;
        for message in &messages {
            publisher.publish(message)?;
        }
        Ok(publisher)
    }))
}

fn join<T>(handle: JoinHandle<Result<T>>) -> Result<T> {
    handle
        .join()
        .map_err(|_| anyhow::anyhow!("thread panicked"))?
}

#[test]
fn bridge_delivers_datums_to_the_remote() -> Result<()> {
    const NETWORK: &str = "bridge-end-to-end";

    let (pipeline_a, collected_a) = bridge_pipeline(
        Box::new(Script::new(vec![
            Datum::data("frame1"),
            Datum::data("frame2"),
            Datum::Complete,
        ])),
        memory_transport(NETWORK, 9000)
            .with("connect_port", 9002)
            .with("expected_subscribers", 2),
    )?;
    // B sends nothing of its own until it has seen everything from A
    let (gate, open_gate) = Gate::new();
    let (pipeline_b, collected_b) = bridge_pipeline(
        Box::new(gate),
        memory_transport(NETWORK, 9002).with("connect_port", 9000),
    )?;

    // an extra subscriber watching what bridge A publishes
    let tap = thread::spawn(|| -> anyhow::Result<Vec<Vec<u8>>> {
        let transport = link::Config::Memory(link::memory::Config::new(NETWORK));
        let mut subscriber = Subscriber::connect(&transport, "localhost", 9000)?;
        subscriber.handshake()?;

        let mut messages = vec![];
        while let Some(message) = subscriber.receive()? {
            messages.push(message);
        }
        Ok(messages)
    });

    let running_a = ThreadPerProcess::new().start(pipeline_a)?;
    let running_b = ThreadPerProcess::new().start(pipeline_b)?;

    ensure!(
        collected(&collected_b)
            == [
                Datum::data("frame1"),
                Datum::data("frame2"),
                Datum::Complete
            ]
    );
    drop(open_gate);
    let report_b = running_b.wait()?;
    ensure!(report_b.is_complete());

    // B stopped its workers on A's Complete without sending one back,
    // so A sees its remote publisher go away
    let result_a = running_a.wait();
    ensure!(matches!(result_a, Err(Error::Step { ref process, .. }) if process.as_str() == "bridge"));
    ensure!(collected(&collected_a).is_empty());

    let messages = join(tap)?;
    ensure!(messages == [b"dataframe1".to_vec(), b"dataframe2".to_vec(), b"comp".to_vec()]);
    ensure!(codec::decode(&messages[2])? == Datum::Complete);
    Ok(())
}

#[test]
fn remote_complete_finishes_the_bridge() -> Result<()> {
    const NETWORK: &str = "bridge-remote-complete";
    let transport = link::memory::Config::new(NETWORK);

    // the local side never completes on its own
    let (pipeline, rx) = bridge_pipeline(
        Box::new(Endless),
        memory_transport(NETWORK, 9100)
            .with("connect_port", 9102)
            .with("expected_subscribers", 0),
    )?;
    let remote = remote(NETWORK, 9102, &[b"dataframe1", b"comp"])?;

    let running = ThreadPerProcess::new().start(pipeline)?;
    let mut publisher = join(remote)?;
    let report = running.wait()?;
    ensure!(report.is_complete());
    ensure!(collected(&rx) == [Datum::data("frame1"), Datum::Complete]);
    ensure!(rx.try_recv().is_err());

    // the receive worker drops its subscription after Complete
    let deadline = Instant::now() + Duration::from_secs(5);
    while transport.subscriber_count(9102) > 0 {
        ensure!(
            Instant::now() < deadline,
            "the receive worker is still subscribed"
        );
        thread::sleep(Duration::from_millis(10));
    }
    publisher.close()?;
    Ok(())
}

#[test]
fn sync_scheduler_waits_for_the_network() -> Result<()> {
    const NETWORK: &str = "bridge-sync-scheduler";

    let (pipeline, rx) = bridge_pipeline(
        Box::new(Script::new(vec![Datum::data("local"), Datum::Complete])),
        memory_transport(NETWORK, 9200)
            .with("connect_port", 9202)
            .with("expected_subscribers", 0),
    )?;
    let remote = remote(NETWORK, 9202, &[b"dataframe1", b"dataframe2", b"comp"])?;

    let report = SyncScheduler.run(pipeline)?;
    ensure!(report.is_complete());
    ensure!(
        collected(&rx)
            == [
                Datum::data("frame1"),
                Datum::data("frame2"),
                Datum::Complete
            ]
    );

    join(remote)?.close()?;
    Ok(())
}
