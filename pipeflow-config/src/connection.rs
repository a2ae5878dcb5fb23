use crate::port_addr::PortAddr;
use serde::{Deserialize, Serialize};

/// An edge from an output port to an input port.
///
/// Fan-out is expressed by several connections sharing the same
/// `from` address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    /// The output port the datums are coming from.
    pub from: PortAddr,
    /// The input port the datums are going into.
    pub to: PortAddr,
    /// Edge capacity. Falls back to the graph default if absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<usize>,
}

impl Connection {
    pub fn new(from: PortAddr, to: PortAddr) -> Self {
        Self {
            from,
            to,
            capacity: None,
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }
}
