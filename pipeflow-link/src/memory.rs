//! In-process transport.
//!
//! Sockets on the same named network talk to each other through
//! channels. The host part of an address is ignored. It follows the
//! semantics of the network transports, including that a publisher
//! drops messages sent while no subscriber is connected.

use crate::common::*;
use dashmap::DashMap;
use derivative::Derivative;
use global::NETWORKS;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

mod global {
    use super::Network;
    use dashmap::DashMap;
    use once_cell::sync::Lazy;
    use std::sync::Arc;

    pub static NETWORKS: Lazy<DashMap<String, Arc<Network>>> = Lazy::new(DashMap::new);
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Derivative)]
#[derivative(Default)]
pub struct Config {
    #[serde(default = "default_network")]
    #[derivative(Default(value = "default_network()"))]
    pub network: String,
}

fn default_network() -> String {
    "default".into()
}

impl Config {
    pub fn new(network: impl Into<String>) -> Self {
        Self {
            network: network.into(),
        }
    }

    /// The number of subscribers attached to the publisher on `port`.
    pub fn subscriber_count(&self, port: u16) -> usize {
        self.network().endpoint(port).subscribers.len()
    }

    fn network(&self) -> Arc<Network> {
        NETWORKS.entry(self.network.clone()).or_default().clone()
    }

    pub fn bind(&self, role: Role, port: u16) -> Result<Socket> {
        let endpoint = self.network().endpoint(port);
        let already_bound = endpoint.bound.swap(true, Ordering::SeqCst);
        ensure!(
            !already_bound,
            "port {} is already bound on memory network '{}'",
            port,
            self.network
        );

        let inner = match role {
            Role::Publish => Inner::Publish {
                endpoint: endpoint.clone(),
            },
            Role::Reply => Inner::Reply {
                endpoint: endpoint.clone(),
                pending: None,
            },
            Role::Subscribe | Role::Request => {
                endpoint.bound.store(false, Ordering::SeqCst);
                bail!("a {} socket cannot bind", role);
            }
        };

        Ok(Socket { role, inner })
    }

    pub fn connect(&self, role: Role, _host: &str, port: u16) -> Result<Socket> {
        let endpoint = self.network().endpoint(port);

        let inner = match role {
            Role::Subscribe => {
                let (tx, rx) = flume::unbounded();
                let id = endpoint.next_id.fetch_add(1, Ordering::SeqCst);
                endpoint.subscribers.insert(id, tx);
                Inner::Subscribe { rx, endpoint, id }
            }
            Role::Request => Inner::Request {
                endpoint,
                reply: None,
            },
            Role::Publish | Role::Reply => bail!("a {} socket cannot connect", role),
        };

        Ok(Socket { role, inner })
    }
}

/// A named set of endpoints.
#[derive(Debug, Default)]
pub struct Network {
    endpoints: DashMap<u16, Arc<Endpoint>>,
}

impl Network {
    fn endpoint(&self, port: u16) -> Arc<Endpoint> {
        self.endpoints.entry(port).or_default().clone()
    }
}

#[derive(Debug)]
struct Endpoint {
    bound: AtomicBool,
    next_id: AtomicUsize,
    subscribers: DashMap<usize, flume::Sender<Vec<u8>>>,
    requests_tx: flume::Sender<Request>,
    requests_rx: flume::Receiver<Request>,
}

impl Default for Endpoint {
    fn default() -> Self {
        let (requests_tx, requests_rx) = flume::unbounded();
        Self {
            bound: AtomicBool::new(false),
            next_id: AtomicUsize::new(0),
            subscribers: DashMap::new(),
            requests_tx,
            requests_rx,
        }
    }
}

#[derive(Debug)]
struct Request {
    payload: Vec<u8>,
    reply: flume::Sender<Vec<u8>>,
}

#[derive(Debug)]
pub struct Socket {
    role: Role,
    inner: Inner,
}

#[derive(Debug)]
enum Inner {
    Publish {
        endpoint: Arc<Endpoint>,
    },
    Subscribe {
        rx: flume::Receiver<Vec<u8>>,
        endpoint: Arc<Endpoint>,
        id: usize,
    },
    Reply {
        endpoint: Arc<Endpoint>,
        pending: Option<flume::Sender<Vec<u8>>>,
    },
    Request {
        endpoint: Arc<Endpoint>,
        reply: Option<flume::Receiver<Vec<u8>>>,
    },
    Closed,
}

impl Socket {
    pub fn role(&self) -> Role {
        self.role
    }

    pub fn subscriber_count(&self) -> usize {
        match &self.inner {
            Inner::Publish { endpoint } => endpoint.subscribers.len(),
            _ => 0,
        }
    }

    /// Subscribers attach while connecting, so there is nothing to wait for.
    pub fn wait_for_subscribers(&self, count: usize, _timeout: Duration) -> Result<()> {
        ensure!(
            matches!(self.inner, Inner::Publish { .. }),
            "a {} socket has no subscribers",
            self.role
        );
        let connected = self.subscriber_count();
        ensure!(
            connected >= count,
            "{} of {} subscribers connected",
            connected,
            count
        );
        Ok(())
    }

    pub fn send(&mut self, payload: &[u8]) -> Result<()> {
        match &mut self.inner {
            Inner::Publish { endpoint } => {
                // subscribers that went away are forgotten
                endpoint
                    .subscribers
                    .retain(|_, tx| tx.send(payload.to_vec()).is_ok());
            }
            Inner::Reply { pending, .. } => {
                let reply = pending
                    .take()
                    .ok_or_else(|| anyhow!("no request is waiting for a reply"))?;
                // the requester may have given up; that is not our failure
                let _ = reply.send(payload.to_vec());
            }
            Inner::Request { endpoint, reply } => {
                ensure!(reply.is_none(), "the previous request is not answered yet");
                let (tx, rx) = flume::bounded(1);
                endpoint
                    .requests_tx
                    .send(Request {
                        payload: payload.to_vec(),
                        reply: tx,
                    })
                    .map_err(|_| anyhow!("the reply endpoint is gone"))?;
                *reply = Some(rx);
            }
            Inner::Subscribe { .. } => bail!("a subscribe socket cannot send"),
            Inner::Closed => bail!("the socket is closed"),
        }
        Ok(())
    }

    pub fn receive(&mut self) -> Result<Option<Vec<u8>>> {
        match &mut self.inner {
            Inner::Subscribe { rx, .. } => Ok(rx.recv().ok()),
            Inner::Reply { endpoint, pending } => {
                let request = endpoint
                    .requests_rx
                    .recv()
                    .map_err(|_| anyhow!("the request channel is gone"))?;
                *pending = Some(request.reply);
                Ok(Some(request.payload))
            }
            Inner::Request { reply, .. } => {
                let rx = reply
                    .take()
                    .ok_or_else(|| anyhow!("a request must be sent before receiving"))?;
                Ok(rx.recv().ok())
            }
            Inner::Publish { .. } => bail!("a publish socket cannot receive"),
            Inner::Closed => Ok(None),
        }
    }

    pub fn close(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.inner, Inner::Closed) {
            Inner::Publish { endpoint } => {
                // disconnects every subscriber
                endpoint.subscribers.clear();
                endpoint.bound.store(false, Ordering::SeqCst);
            }
            Inner::Reply { endpoint, .. } => {
                endpoint.bound.store(false, Ordering::SeqCst);
            }
            Inner::Subscribe { endpoint, id, .. } => {
                endpoint.subscribers.remove(&id);
            }
            Inner::Request { .. } | Inner::Closed => {}
        }
        Ok(())
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn publish_fans_out_and_drops_early_messages() -> Result<()> {
        let config = Config::new("memory-fan-out");
        let mut publisher = config.bind(Role::Publish, 7000)?;

        // nobody listens yet; the message is lost
        publisher.send(b"early")?;

        let mut first = config.connect(Role::Subscribe, "localhost", 7000)?;
        let mut second = config.connect(Role::Subscribe, "localhost", 7000)?;
        publisher.send(b"late")?;

        ensure!(first.receive()? == Some(b"late".to_vec()));
        ensure!(second.receive()? == Some(b"late".to_vec()));

        ensure!(publisher.subscriber_count() == 2);
        second.close()?;
        ensure!(publisher.subscriber_count() == 1);
        ensure!(config.subscriber_count(7000) == 1);

        publisher.close()?;
        ensure!(first.receive()?.is_none());
        Ok(())
    }

    #[test]
    fn request_reply_round_trip() -> Result<()> {
        let config = Config::new("memory-req-rep");
        let mut reply = config.bind(Role::Reply, 7001)?;
        ensure!(config.bind(Role::Reply, 7001).is_err());

        let requester = thread::spawn(move || -> Result<Option<Vec<u8>>> {
            let mut request = config.connect(Role::Request, "localhost", 7001)?;
            request.send(b"")?;
            request.receive()
        });

        ensure!(reply.receive()? == Some(vec![]));
        reply.send(b"ACK")?;

        let answer = requester
            .join()
            .map_err(|_| anyhow!("requester panicked"))??;
        ensure!(answer == Some(b"ACK".to_vec()));
        Ok(())
    }
}
