mod common;

use anyhow::{ensure, Result};
use common::{collected, memory_transport};
use pipeflow::{
    processes::{BuiltinModule, Collector},
    scheduler::{Scheduler, ThreadPerProcess},
    transport::PORT_NAME,
    Datum, Error, Pipeline, Registry,
};
use std::thread;

fn registry() -> Result<Registry> {
    let registry = Registry::new();
    registry.load_module(&BuiltinModule)?;
    Ok(registry)
}

#[test]
fn every_subscriber_receives_the_stream() -> Result<()> {
    const NETWORK: &str = "transport-fan-out";
    let registry = registry()?;

    let mut sender = Pipeline::new();
    sender.create_process(
        "source",
        "numbers",
        pipeflow::config::ConfigBlock::new().with("end", 5),
        &registry,
    )?;
    sender.create_process(
        "send",
        "transport_send",
        memory_transport(NETWORK, 9100).with("expected_subscribers", 2),
        &registry,
    )?;
    sender.connect("source.number", format!("send.{}", PORT_NAME), 2)?;

    let mut receivers = vec![];
    for _ in 0..2 {
        let (collector, rx) = Collector::new();
        let mut receiver = Pipeline::new();
        receiver.create_process(
            "receive",
            "transport_receive",
            memory_transport(NETWORK, 9100),
            &registry,
        )?;
        receiver.add_process(
            "sink",
            "collector",
            Box::new(collector),
            pipeflow::config::ConfigBlock::new(),
        )?;
        receiver.connect(format!("receive.{}", PORT_NAME), "sink.input", 2)?;
        receivers.push((receiver, rx));
    }

    // the publisher and the subscribers block on each other while initializing
    let handles: Vec<_> = receivers
        .into_iter()
        .map(|(receiver, rx)| {
            let handle = thread::spawn(move || ThreadPerProcess::new().run(receiver));
            (handle, rx)
        })
        .collect();
    let report = ThreadPerProcess::new().run(sender)?;
    ensure!(report.is_complete());

    for (handle, rx) in handles {
        let report = handle
            .join()
            .map_err(|_| anyhow::anyhow!("receiver panicked"))??;
        ensure!(report.is_complete());

        let datums = collected(&rx);
        ensure!(datums.last() == Some(&Datum::Complete));
        let numbers: Vec<i64> = datums[..datums.len() - 1]
            .iter()
            .map(|datum| datum.decode::<i64>())
            .collect::<Result<_, _>>()?;
        ensure!(numbers == [0, 1, 2, 3, 4]);
    }
    Ok(())
}

#[test]
fn receiving_from_a_closed_publisher_fails() -> Result<()> {
    const NETWORK: &str = "transport-closed";
    let registry = registry()?;

    let transport = pipeflow::link::Config::Memory(pipeflow::link::memory::Config::new(NETWORK));
    let mut publisher = pipeflow::link::Publisher::bind(&transport, 9200, 1)?;

    let publisher = thread::spawn(move || -> anyhow::Result<()> {
        publisher.wait_for_subscribers()?;
        // goes away without sending Complete
        publisher.publish(b"empt")?;
        publisher.close()
    });

    let (collector, _rx) = Collector::new();
    let mut receiver = Pipeline::new();
    receiver.create_process(
        "receive",
        "transport_receive",
        memory_transport(NETWORK, 9200),
        &registry,
    )?;
    receiver.add_process(
        "sink",
        "collector",
        Box::new(collector),
        pipeflow::config::ConfigBlock::new(),
    )?;
    receiver.connect(format!("receive.{}", PORT_NAME), "sink.input", 2)?;

    let result = ThreadPerProcess::new().run(receiver);
    ensure!(matches!(result, Err(Error::Step { ref process, .. }) if process.as_str() == "receive"));

    publisher
        .join()
        .map_err(|_| anyhow::anyhow!("publisher panicked"))??;
    Ok(())
}
