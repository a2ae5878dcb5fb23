use crate::common::*;
use crate::memory;
#[cfg(feature = "tcp")]
use crate::tcp;
use std::fmt;

/// The role a socket plays in a publish/subscribe or request/reply pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Binds a port and sends every message to all connected subscribers.
    Publish,
    /// Connects to a publisher and receives its messages.
    Subscribe,
    /// Binds a port, receives a request and answers it.
    Reply,
    /// Connects to a replier, sends a request and receives the answer.
    Request,
}

impl Role {
    /// Whether a socket of this role is created by binding a port.
    pub fn binds(self) -> bool {
        matches!(self, Self::Publish | Self::Reply)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Publish => "publish",
            Self::Subscribe => "subscribe",
            Self::Reply => "reply",
            Self::Request => "request",
        };
        name.fmt(f)
    }
}

/// Transport selection and its parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Config {
    #[cfg(feature = "tcp")]
    Tcp(tcp::Config),
    Memory(memory::Config),
}

impl Default for Config {
    #[cfg(feature = "tcp")]
    fn default() -> Self {
        Self::Tcp(tcp::Config::default())
    }

    #[cfg(not(feature = "tcp"))]
    fn default() -> Self {
        Self::Memory(memory::Config::default())
    }
}

impl Config {
    /// Create a socket that binds `port` on all interfaces.
    pub fn bind(&self, role: Role, port: u16) -> Result<Socket> {
        ensure!(role.binds(), "a {} socket cannot bind, it connects", role);

        let socket = match self {
            #[cfg(feature = "tcp")]
            Self::Tcp(config) => config.bind(role, port)?.into(),
            Self::Memory(config) => config.bind(role, port)?.into(),
        };
        debug!("{} socket bound to port {}", role, port);
        Ok(socket)
    }

    /// Create a socket that connects to `host:port`.
    pub fn connect(&self, role: Role, host: &str, port: u16) -> Result<Socket> {
        ensure!(!role.binds(), "a {} socket cannot connect, it binds", role);

        let socket = match self {
            #[cfg(feature = "tcp")]
            Self::Tcp(config) => config.connect(role, host, port)?.into(),
            Self::Memory(config) => config.connect(role, host, port)?.into(),
        };
        debug!("{} socket connected to {}:{}", role, host, port);
        Ok(socket)
    }
}

#[derive(Debug)]
pub enum Socket {
    #[cfg(feature = "tcp")]
    Tcp(tcp::Socket),
    Memory(memory::Socket),
}

impl Socket {
    pub fn role(&self) -> Role {
        match self {
            #[cfg(feature = "tcp")]
            Self::Tcp(socket) => socket.role(),
            Self::Memory(socket) => socket.role(),
        }
    }

    /// The number of subscribers a publish socket is attached to.
    pub fn subscriber_count(&self) -> usize {
        match self {
            #[cfg(feature = "tcp")]
            Self::Tcp(socket) => socket.subscriber_count(),
            Self::Memory(socket) => socket.subscriber_count(),
        }
    }

    /// Block until a publish socket is attached to `count` subscribers.
    pub fn wait_for_subscribers(&self, count: usize, timeout: Duration) -> Result<()> {
        match self {
            #[cfg(feature = "tcp")]
            Self::Tcp(socket) => socket.wait_for_subscribers(count, timeout),
            Self::Memory(socket) => socket.wait_for_subscribers(count, timeout),
        }
    }

    /// Send one message.
    ///
    /// A publish socket drops the message if no subscriber is connected.
    pub fn send(&mut self, payload: &[u8]) -> Result<()> {
        trace!("{} socket sends {} bytes", self.role(), payload.len());
        match self {
            #[cfg(feature = "tcp")]
            Self::Tcp(socket) => socket.send(payload),
            Self::Memory(socket) => socket.send(payload),
        }
    }

    /// Block until one message arrives.
    ///
    /// Returns `Ok(None)` once the socket or its peer is closed. An
    /// error is a failure of this call only; the socket stays usable.
    pub fn receive(&mut self) -> Result<Option<Vec<u8>>> {
        match self {
            #[cfg(feature = "tcp")]
            Self::Tcp(socket) => socket.receive(),
            Self::Memory(socket) => socket.receive(),
        }
    }

    /// Release the underlying resources. Closing twice is a no-op.
    pub fn close(&mut self) -> Result<()> {
        match self {
            #[cfg(feature = "tcp")]
            Self::Tcp(socket) => socket.close(),
            Self::Memory(socket) => socket.close(),
        }
    }
}

#[cfg(feature = "tcp")]
impl From<tcp::Socket> for Socket {
    fn from(from: tcp::Socket) -> Self {
        Self::Tcp(from)
    }
}

impl From<memory::Socket> for Socket {
    fn from(from: memory::Socket) -> Self {
        Self::Memory(from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_transport_config() -> Result<()> {
        let config: Config = json5::from_str(r#"{ type: "memory", network: "lab" }"#)?;
        ensure!(
            config
                == Config::Memory(memory::Config {
                    network: "lab".into()
                })
        );

        #[cfg(feature = "tcp")]
        {
            let config: Config = json5::from_str(r#"{ type: "tcp", connect_timeout: "2s" }"#)?;
            ensure!(
                config
                    == Config::Tcp(tcp::Config {
                        connect_timeout: Some(Duration::from_secs(2))
                    })
            );
        }

        Ok(())
    }

    #[test]
    fn roles_bind_or_connect() {
        let config = Config::Memory(memory::Config {
            network: "roles".into(),
        });
        assert!(config.bind(Role::Subscribe, 1).is_err());
        assert!(config.connect(Role::Publish, "localhost", 1).is_err());
    }
}
