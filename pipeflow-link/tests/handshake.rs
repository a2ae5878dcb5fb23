use anyhow::{anyhow, bail, ensure, Result};
use pipeflow_link::{memory, Config, Publisher, Role, Subscriber};
use std::{thread, time::Duration};

#[test]
fn publisher_waits_for_expected_subscribers() -> Result<()> {
    let transport = Config::Memory(memory::Config::new("handshake-two"));
    let mut publisher = Publisher::bind(&transport, 6000, 2)?;
    ensure!(!publisher.is_synced());

    let (synced_tx, synced_rx) = flume::unbounded();
    let publisher_thread = thread::spawn(move || -> Result<()> {
        publisher.wait_for_subscribers()?;
        synced_tx.send(())?;
        publisher.publish(b"dataframe1")?;
        Ok(())
    });

    let mut first = Subscriber::connect(&transport, "localhost", 6000)?;
    first.handshake()?;
    ensure!(first.is_synced());

    // one acknowledgment does not release the publisher
    ensure!(synced_rx
        .recv_timeout(Duration::from_millis(200))
        .is_err());

    let mut second = Subscriber::connect(&transport, "localhost", 6000)?;
    second.handshake()?;
    synced_rx.recv_timeout(Duration::from_secs(5))?;

    publisher_thread
        .join()
        .map_err(|_| anyhow!("publisher panicked"))??;

    ensure!(first.receive()? == Some(b"dataframe1".to_vec()));
    ensure!(second.receive()? == Some(b"dataframe1".to_vec()));
    Ok(())
}

#[test]
fn zero_expected_subscribers_publishes_immediately() -> Result<()> {
    let transport = Config::Memory(memory::Config::new("handshake-zero"));
    let mut publisher = Publisher::bind(&transport, 6000, 0)?;
    ensure!(publisher.is_synced());

    // nobody is connected, so this message is dropped
    publisher.publish(b"lost")?;

    let mut subscriber = transport.connect(Role::Subscribe, "localhost", 6000)?;
    publisher.publish(b"kept")?;
    ensure!(subscriber.receive()? == Some(b"kept".to_vec()));

    publisher.close()?;
    ensure!(subscriber.receive()?.is_none());
    Ok(())
}

#[cfg(feature = "tcp")]
fn free_port_pair() -> Result<u16> {
    for _ in 0..100 {
        let listener = std::net::TcpListener::bind(("127.0.0.1", 0))?;
        let port = listener.local_addr()?.port();
        drop(listener);

        if port < u16::MAX && std::net::TcpListener::bind(("127.0.0.1", port + 1)).is_ok() {
            return Ok(port);
        }
    }
    bail!("no pair of adjacent free ports")
}

#[cfg(feature = "tcp")]
#[test]
fn tcp_first_message_after_handshake_is_delivered() -> Result<()> {
    use pipeflow_link::tcp;

    let transport = Config::Tcp(tcp::Config {
        connect_timeout: Some(Duration::from_secs(10)),
    });

    for _ in 0..20 {
        let port = free_port_pair()?;
        let mut publisher = Publisher::bind(&transport, port, 1)?;

        let subscriber = {
            let transport = transport.clone();
            thread::spawn(move || -> Result<Option<Vec<u8>>> {
                let mut subscriber = Subscriber::connect(&transport, "127.0.0.1", port)?;
                subscriber.handshake()?;
                subscriber.receive()
            })
        };

        // publish as soon as the handshake returns
        publisher.wait_for_subscribers()?;
        publisher.publish(b"dataframe1")?;

        let received = subscriber
            .join()
            .map_err(|_| anyhow!("subscriber panicked"))??;
        ensure!(received == Some(b"dataframe1".to_vec()));
        publisher.close()?;
    }
    Ok(())
}
