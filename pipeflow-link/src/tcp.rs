#![cfg(feature = "tcp")]

use crate::common::*;
use async_std::{
    net::{TcpListener, TcpStream},
    task::{self, JoinHandle},
};
use dashmap::DashMap;
use derivative::Derivative;
use std::{
    net::{Shutdown, SocketAddr},
    time::Instant,
};

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Config {
    /// Give up connecting after this long. Retry forever if absent.
    #[serde(with = "humantime_serde", default)]
    pub connect_timeout: Option<Duration>,
}

impl Config {
    pub fn bind(&self, role: Role, port: u16) -> Result<Socket> {
        task::block_on(async move {
            let listener = TcpListener::bind(("0.0.0.0", port))
                .await
                .with_context(|| format!("unable to bind port {}", port))?;

            let inner = match role {
                Role::Publish => {
                    let subscribers = Arc::new(DashMap::new());
                    let (accepted_tx, accepted) = flume::unbounded();
                    let accept = task::spawn(accept_subscribers(
                        listener,
                        subscribers.clone(),
                        accepted_tx,
                    ));
                    Inner::Publish {
                        subscribers,
                        accepted,
                        accept: Some(accept),
                    }
                }
                Role::Reply => Inner::Reply {
                    listener,
                    peer: None,
                },
                Role::Subscribe | Role::Request => bail!("a {} socket cannot bind", role),
            };

            anyhow::Ok(Socket { role, inner })
        })
    }

    pub fn connect(&self, role: Role, host: &str, port: u16) -> Result<Socket> {
        let inner = match role {
            Role::Subscribe => Inner::Subscribe {
                stream: self.connect_stream(host, port)?,
            },
            Role::Request => Inner::Request {
                stream: self.connect_stream(host, port)?,
            },
            Role::Publish | Role::Reply => bail!("a {} socket cannot connect", role),
        };
        Ok(Socket { role, inner })
    }

    fn connect_stream(&self, host: &str, port: u16) -> Result<TcpStream> {
        let deadline = self
            .connect_timeout
            .map(|duration| Instant::now() + duration);

        task::block_on(async move {
            loop {
                if let Some(deadline) = deadline {
                    ensure!(
                        Instant::now() < deadline,
                        "connection to {}:{} timed out",
                        host,
                        port
                    );
                }

                match TcpStream::connect((host, port)).await {
                    Ok(stream) => break anyhow::Ok(stream),
                    Err(err) if err.kind() == io::ErrorKind::ConnectionRefused => {
                        debug!("{}:{} is not listening yet. retrying ...", host, port);
                        task::sleep(Duration::from_millis(100)).await;
                    }
                    Err(err) => {
                        return Err(Error::new(err)
                            .context(format!("unable to connect to {}:{}", host, port)))
                    }
                }
            }
        })
    }
}

async fn accept_subscribers(
    listener: TcpListener,
    subscribers: Arc<DashMap<SocketAddr, TcpStream>>,
    accepted: flume::Sender<()>,
) {
    let mut incoming = listener.incoming();

    while let Some(stream) = incoming.next().await {
        let conn = stream.and_then(|stream| {
            let addr = stream.peer_addr()?;
            Ok((addr, stream))
        });

        match conn {
            Ok((addr, stream)) => {
                debug!("subscriber {} connected", addr);
                subscribers.insert(addr, stream);
                // nobody may be waiting for the count
                let _ = accepted.send(());
            }
            Err(err) => warn!("unable to accept a subscriber: {}", err),
        }
    }
}

/// The largest payload a frame may announce.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Write a frame: the payload length as little-endian `u64`, then the payload.
async fn write_frame(stream: &mut TcpStream, payload: &[u8]) -> io::Result<()> {
    let len = payload.len() as u64;
    stream.write_all(&len.to_le_bytes()).await?;
    stream.write_all(payload).await?;
    stream.flush().await
}

/// Read a frame. Returns `None` if the peer closed the stream on a frame boundary.
async fn read_frame(stream: &mut TcpStream) -> io::Result<Option<Vec<u8>>> {
    let len = {
        let mut len_buf = [0u8; 8];
        let mut len_ref = len_buf.as_mut();

        while !len_ref.is_empty() {
            let num_bytes = stream.read(len_ref).await?;
            if num_bytes == 0 {
                break;
            }
            len_ref = &mut len_ref[num_bytes..];
        }

        match len_ref.len() {
            0 => u64::from_le_bytes(len_buf),
            len if len == len_buf.len() => return Ok(None),
            _ => return Err(io::Error::from(io::ErrorKind::UnexpectedEof)),
        }
    };

    let len = match usize::try_from(len) {
        Ok(len) if len <= MAX_FRAME_LEN => len,
        _ => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "frame of {} bytes exceeds the limit of {} bytes",
                    len, MAX_FRAME_LEN
                ),
            ))
        }
    };

    let mut payload = vec![0; len];
    stream.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

#[derive(Debug)]
pub struct Socket {
    role: Role,
    inner: Inner,
}

#[derive(Derivative)]
#[derivative(Debug)]
enum Inner {
    Publish {
        subscribers: Arc<DashMap<SocketAddr, TcpStream>>,
        accepted: flume::Receiver<()>,
        #[derivative(Debug = "ignore")]
        accept: Option<JoinHandle<()>>,
    },
    Subscribe {
        stream: TcpStream,
    },
    Reply {
        listener: TcpListener,
        peer: Option<TcpStream>,
    },
    Request {
        stream: TcpStream,
    },
    Closed,
}

impl Socket {
    pub fn role(&self) -> Role {
        self.role
    }

    /// The number of subscriber streams a publish socket has accepted.
    pub fn subscriber_count(&self) -> usize {
        match &self.inner {
            Inner::Publish { subscribers, .. } => subscribers.len(),
            _ => 0,
        }
    }

    /// Block until a publish socket has accepted `count` subscriber streams.
    pub fn wait_for_subscribers(&self, count: usize, timeout: Duration) -> Result<()> {
        let (subscribers, accepted) = match &self.inner {
            Inner::Publish {
                subscribers,
                accepted,
                ..
            } => (subscribers, accepted),
            _ => bail!("a {} socket has no subscribers", self.role),
        };

        let deadline = Instant::now() + timeout;
        while subscribers.len() < count {
            let remaining = deadline.saturating_duration_since(Instant::now());
            accepted.recv_timeout(remaining).map_err(|_| {
                anyhow!(
                    "{} of {} subscribers connected within {:?}",
                    subscribers.len(),
                    count,
                    timeout
                )
            })?;
        }
        Ok(())
    }

    pub fn send(&mut self, payload: &[u8]) -> Result<()> {
        match &mut self.inner {
            Inner::Publish { subscribers, .. } => {
                let targets: Vec<_> = subscribers
                    .iter()
                    .map(|entry| (*entry.key(), entry.value().clone()))
                    .collect();

                for (addr, mut stream) in targets {
                    let result = task::block_on(write_frame(&mut stream, payload));
                    if let Err(err) = result {
                        warn!("dropping subscriber {}: {}", addr, err);
                        subscribers.remove(&addr);
                    }
                }
            }
            Inner::Reply { peer, .. } => {
                let mut stream = peer
                    .take()
                    .ok_or_else(|| anyhow!("no request is waiting for a reply"))?;
                task::block_on(write_frame(&mut stream, payload))?;
            }
            Inner::Request { stream } => {
                task::block_on(write_frame(stream, payload))?;
            }
            Inner::Subscribe { .. } => bail!("a subscribe socket cannot send"),
            Inner::Closed => bail!("the socket is closed"),
        }
        Ok(())
    }

    pub fn receive(&mut self) -> Result<Option<Vec<u8>>> {
        match &mut self.inner {
            Inner::Subscribe { stream } | Inner::Request { stream } => {
                Ok(task::block_on(read_frame(stream))?)
            }
            Inner::Reply { listener, peer } => task::block_on(async move {
                let (mut stream, addr) = listener.accept().await?;
                let payload = read_frame(&mut stream)
                    .await?
                    .ok_or_else(|| anyhow!("requester {} hung up before sending", addr))?;
                *peer = Some(stream);
                anyhow::Ok(Some(payload))
            }),
            Inner::Publish { .. } => bail!("a publish socket cannot receive"),
            Inner::Closed => Ok(None),
        }
    }

    pub fn close(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.inner, Inner::Closed) {
            Inner::Publish {
                subscribers,
                accept,
                ..
            } => {
                if let Some(accept) = accept {
                    task::block_on(accept.cancel());
                }
                for entry in subscribers.iter() {
                    let _ = entry.value().shutdown(Shutdown::Both);
                }
                subscribers.clear();
            }
            Inner::Subscribe { stream } | Inner::Request { stream } => {
                let _ = stream.shutdown(Shutdown::Both);
            }
            Inner::Reply { peer, .. } => {
                if let Some(peer) = peer {
                    let _ = peer.shutdown(Shutdown::Both);
                }
            }
            Inner::Closed => {}
        }
        Ok(())
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!("unable to close {} socket: {:?}", self.role, err);
        }
    }
}
