//! Pipeline graph configuration.
//!
//! The crate defines the configuration format that describes a
//! pipeline: the declared *processes*, the plugin each of them is
//! created from together with its configuration block, and the
//! *connections* between output and input ports.
//!
//! ```json5
//! {
//!     // The version number is mandatory.
//!     "version": "0.1.0",
//!
//!     "default_capacity": 4,
//!
//!     "processes": {
//!         "source": { "type": "numbers", "config": { "start": 1, "end": 5 } },
//!         "sink": { "type": "print_number", "config": { "output": "numbers.txt" } },
//!     },
//!
//!     "connections": [
//!         { "from": "source.number", "to": "sink.number" },
//!     ],
//! }
//! ```

mod block;
mod connection;
mod error;
mod graph;
mod ident;
mod into_ident;
mod port_addr;

pub use block::*;
pub use connection::*;
pub use error::*;
pub use graph::*;
pub use ident::*;
pub use into_ident::*;
pub use port_addr::*;
