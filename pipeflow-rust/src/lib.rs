//! Dataflow pipeline engine.
//!
//! Processes exchange [datums](Datum) over bounded [edges](Edge) and
//! are stepped by a [scheduler]. Processes are created by name from a
//! [plugin registry](Registry), and [transport] processes join
//! pipelines running in separate programs.
//!
//! # Pipeline Configuration Format
//!
//! A pipeline is described in JSON5 (see [pipeflow_config]):
//!
//! ```json5
//! {
//!     "version": "0.1.0",
//!     "processes": {
//!         "source": { "type": "numbers", "config": { "start": 1, "end": 10 } },
//!         "sink": { "type": "print_number", "config": { "output": "numbers.txt" } },
//!     },
//!     "connections": [
//!         { "from": "source.number", "to": "sink.number", "capacity": 4 },
//!     ],
//! }
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use pipeflow::{processes::BuiltinModule, scheduler::{Scheduler, ThreadPerProcess}, Pipeline, Registry};
//!
//! let registry = Registry::new();
//! registry.load_module(&BuiltinModule)?;
//!
//! let pipeline = Pipeline::open("numbers.json5", &registry)?;
//! let report = ThreadPerProcess::new().run(pipeline)?;
//! assert!(report.is_complete());
//! # Ok::<(), pipeflow::Error>(())
//! ```

pub mod codec;
mod datum;
mod edge;
mod error;
mod node;
mod pipeline;
mod port;
mod process;
pub mod processes;
pub mod registry;
pub mod scheduler;
pub mod transport;

pub use datum::*;
pub use edge::*;
pub use error::{Error, Result};
pub use node::Node;
pub use pipeline::*;
pub use port::*;
pub use process::*;
pub use registry::{PluginFactory, PluginFilter, PluginModule, Registrar, Registry};

pub use pipeflow_config as config;
pub use pipeflow_link as link;
