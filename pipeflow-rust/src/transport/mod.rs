//! Processes that join pipelines over a [pipeflow_link] transport.
//!
//! Datums cross the wire in the [codec](crate::codec) encoding.
//! [TransportSend] and [TransportReceive] carry one direction each;
//! [TransportBridge] carries both and decouples the network from the
//! pipeline with worker threads.
//!
//! Configuration keys:
//!
//! | key | default | |
//! |---|---|---|
//! | `port` | 5550 | the publisher binds `port` and `port + 1` |
//! | `connect_host` | `localhost` | host of the remote publisher |
//! | `connect_port` | `port + 2` | port of the remote publisher (bridge only) |
//! | `expected_subscribers` | 1 | handshakes to wait for before publishing |
//! | `transport` | `{ "type": "tcp" }` | the [transport](pipeflow_link::Config) |

mod bridge;
mod receive;
mod send;

pub use bridge::*;
pub use receive::*;
pub use send::*;

use pipeflow_config::{ConfigBlock, ConfigError};

/// The name of the input and output port of the transport processes.
pub const PORT_NAME: &str = "serialized_message";

pub const DEFAULT_PORT: u16 = 5550;
pub const DEFAULT_CONNECT_HOST: &str = "localhost";
pub const DEFAULT_EXPECTED_SUBSCRIBERS: usize = 1;

/// Parsed transport process configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportSettings {
    pub port: u16,
    pub connect_host: String,
    pub connect_port: u16,
    pub expected_subscribers: usize,
    pub transport: pipeflow_link::Config,
}

impl TransportSettings {
    pub fn from_config(config: &ConfigBlock) -> Result<Self, ConfigError> {
        let port: u16 = config.get_or("port", DEFAULT_PORT)?;
        if port == u16::MAX {
            return Err(ConfigError::invalid(
                "port",
                port,
                "the synchronization socket needs the next port",
            ));
        }

        let connect_port = match config.get_opt::<u16>("connect_port")? {
            Some(connect_port) => connect_port,
            None => port.checked_add(2).ok_or_else(|| {
                ConfigError::invalid("port", port, "no room for the default connect_port")
            })?,
        };
        if connect_port == u16::MAX {
            return Err(ConfigError::invalid(
                "connect_port",
                connect_port,
                "the synchronization socket needs the next port",
            ));
        }

        let connect_host: String =
            config.get_or("connect_host", DEFAULT_CONNECT_HOST.to_string())?;
        if connect_host.is_empty() {
            return Err(ConfigError::invalid(
                "connect_host",
                "\"\"",
                "the host must not be empty",
            ));
        }

        Ok(Self {
            port,
            connect_host,
            connect_port,
            expected_subscribers: config
                .get_or("expected_subscribers", DEFAULT_EXPECTED_SUBSCRIBERS)?,
            transport: config.get_or("transport", pipeflow_link::Config::default())?,
        })
    }
}
