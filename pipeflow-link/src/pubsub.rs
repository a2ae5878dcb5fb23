//! Publisher and subscriber with a synchronization handshake.
//!
//! A publisher binds two ports: `port` carries the data and
//! `port + 1` answers handshake requests. A subscriber connects its
//! data socket first and then announces itself with an empty request
//! on the sync port. The publisher acknowledges each announcement
//! with [ACK] and does not publish before it has seen the expected
//! number of subscribers, so that no subscriber misses the first
//! messages.

use crate::{common::*, generic::Config, generic::Socket};

/// The literal acknowledgment sent by the publisher.
pub const ACK: &[u8] = b"ACK";

/// How long an announced subscriber's data stream may take to be accepted.
const DATA_ATTACH_TIMEOUT: Duration = Duration::from_secs(10);

fn sync_port(port: u16) -> Result<u16> {
    port.checked_add(1)
        .ok_or_else(|| anyhow!("port {} has no successor for the sync socket", port))
}

#[derive(Debug)]
pub struct Publisher {
    data: Socket,
    sync: Socket,
    expected_subscribers: usize,
    synced: bool,
}

impl Publisher {
    /// Bind the data socket on `port` and the sync socket on `port + 1`.
    ///
    /// With `expected_subscribers == 0` the publisher publishes
    /// immediately without waiting.
    pub fn bind(transport: &Config, port: u16, expected_subscribers: usize) -> Result<Self> {
        let sync_port = sync_port(port)?;
        let data = transport.bind(Role::Publish, port)?;
        let sync = transport.bind(Role::Reply, sync_port)?;

        Ok(Self {
            data,
            sync,
            expected_subscribers,
            synced: expected_subscribers == 0,
        })
    }

    pub fn expected_subscribers(&self) -> usize {
        self.expected_subscribers
    }

    /// Whether the handshake has completed.
    pub fn is_synced(&self) -> bool {
        self.synced
    }

    /// Block until every expected subscriber has announced itself.
    ///
    /// A failed exchange with one subscriber is logged and does not
    /// count towards the expected number.
    pub fn wait_for_subscribers(&mut self) -> Result<()> {
        if self.synced {
            return Ok(());
        }

        let expected = self.expected_subscribers;
        let mut subscribers = 0;
        trace!("entering sync loop, waiting for {} subscribers", expected);

        while subscribers < expected {
            match self.sync.receive() {
                Ok(Some(_)) => {}
                Ok(None) => bail!(
                    "sync socket closed after {} of {} subscribers",
                    subscribers,
                    expected
                ),
                Err(err) => {
                    warn!("handshake with a subscriber failed: {:#}", err);
                    continue;
                }
            }

            // the data stream of the announced subscriber must be
            // attached before it is released
            if let Err(err) = self
                .data
                .wait_for_subscribers(subscribers + 1, DATA_ATTACH_TIMEOUT)
            {
                warn!("announced subscriber has no data stream: {:#}", err);
                continue;
            }

            if let Err(err) = self.sync.send(ACK) {
                warn!("unable to acknowledge a subscriber: {:#}", err);
                continue;
            }

            subscribers += 1;
            trace!(
                "sync loop acknowledged subscriber {} of {}",
                subscribers,
                expected
            );
        }

        debug!("all {} subscribers synchronized", subscribers);
        self.synced = true;
        Ok(())
    }

    /// Publish one message, completing the handshake first if needed.
    pub fn publish(&mut self, message: &[u8]) -> Result<()> {
        self.wait_for_subscribers()?;
        self.data.send(message)
    }

    pub fn close(&mut self) -> Result<()> {
        self.data.close()?;
        self.sync.close()?;
        Ok(())
    }
}

#[derive(Debug)]
pub struct Subscriber {
    data: Socket,
    sync: Socket,
    synced: bool,
}

impl Subscriber {
    /// Connect the data socket to `host:port` and the sync socket to `host:port+1`.
    pub fn connect(transport: &Config, host: &str, port: u16) -> Result<Self> {
        let sync_port = sync_port(port)?;
        // data first, so that it is attached before the publisher is released
        let data = transport.connect(Role::Subscribe, host, port)?;
        let sync = transport.connect(Role::Request, host, sync_port)?;

        Ok(Self {
            data,
            sync,
            synced: false,
        })
    }

    pub fn is_synced(&self) -> bool {
        self.synced
    }

    /// Announce this subscriber and wait for the acknowledgment.
    pub fn handshake(&mut self) -> Result<()> {
        if self.synced {
            return Ok(());
        }

        self.sync.send(&[])?;
        trace!("waiting for sync reply");
        let reply = self
            .sync
            .receive()?
            .ok_or_else(|| anyhow!("publisher closed the sync socket before acknowledging"))?;
        ensure!(
            reply.is_empty() || reply == ACK,
            "unexpected handshake reply {:?}",
            String::from_utf8_lossy(&reply)
        );
        trace!("sync reply received");

        self.synced = true;
        Ok(())
    }

    /// Receive one message, completing the handshake first if needed.
    ///
    /// Returns `Ok(None)` when the publisher is gone.
    pub fn receive(&mut self) -> Result<Option<Vec<u8>>> {
        self.handshake()?;
        self.data.receive()
    }

    pub fn close(&mut self) -> Result<()> {
        self.data.close()?;
        self.sync.close()?;
        Ok(())
    }
}
