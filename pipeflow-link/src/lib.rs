//! Byte-level transports joining separately running pipelines.
//!
//! A transport hands out [Socket]s in one of four [Role]s. Publish
//! and reply sockets bind a port; subscribe and request sockets
//! connect to a host and port. The [pubsub] module builds the
//! publisher/subscriber pair with its synchronization handshake on
//! top of them.

mod common;
pub mod generic;
pub mod memory;
pub mod pubsub;
#[cfg(feature = "tcp")]
pub mod tcp;

pub use generic::{Config, Role, Socket};
pub use pubsub::{Publisher, Subscriber, ACK};
