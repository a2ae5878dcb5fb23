use crate::process::State;
use pipeflow_config::{ConfigError, Ident, IntoIdent};
use std::io;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("process `{process}`: invalid configuration for `{key}`{}: {reason}", display_value(.value))]
    Configuration {
        process: String,
        key: String,
        value: Option<String>,
        reason: String,
    },
    #[error("process `{process}` failed to initialize: {error}")]
    Initialization {
        process: Ident,
        #[source]
        error: Box<Error>,
    },
    #[error("unexpected datum type encoding \"{}\"", String::from_utf8_lossy(.tag))]
    ProtocolDecode { tag: Vec<u8> },
    #[error(
        "factory for \"{interface_type}\" : \"{concrete_type}\" named `{name}` has already been registered by {existing_origin}; \
         this factory from {origin} will not be registered"
    )]
    DuplicatePlugin {
        interface_type: String,
        concrete_type: String,
        name: String,
        origin: String,
        existing_origin: String,
    },
    #[error("factory `{name}` was refused: {reason}")]
    PluginRejected { name: String, reason: String },
    #[error("no plugin `{name}` implements \"{interface_type}\"")]
    NotFound { interface_type: String, name: String },
    #[error("process `{process}` failed to step: {reason}")]
    Step { process: Ident, reason: String },
    #[error("process `{process}` not found")]
    ProcessNotFound { process: Ident },
    #[error("process `{process}` has no {direction} port `{port}`")]
    PortNotFound {
        process: Ident,
        port: String,
        direction: &'static str,
    },
    #[error("output port `{port}` of process `{process}` already emitted Complete")]
    OutputCompleted { process: Ident, port: String },
    #[error("process `{process}` cannot move from {from:?} to {to:?}")]
    InvalidTransition { process: Ident, from: State, to: State },
    #[error("invalid datum: {0}")]
    InvalidDatum(String),
    #[error("the edge is closed")]
    EdgeClosed,
    #[error("the edge is full")]
    EdgeFull,
    #[error("the pipeline was aborted")]
    Aborted,
    #[error("no process can make progress; waiting: {}", .processes.join(", "))]
    Stalled { processes: Vec<String> },
    #[error("pipeline torn down before completion of: {}", .processes.join(", "))]
    IncompleteShutdown { processes: Vec<String> },
    #[error("{0}")]
    Config(#[from] ConfigError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("internal error: {0:#}")]
    Other(#[from] anyhow::Error),
}

fn display_value(value: &Option<String>) -> String {
    match value {
        Some(value) => format!(" (value {})", value),
        None => String::new(),
    }
}

impl Error {
    pub fn configuration(
        process: impl ToString,
        key: impl Into<String>,
        value: Option<String>,
        reason: impl ToString,
    ) -> Self {
        Self::Configuration {
            process: process.to_string(),
            key: key.into(),
            value,
            reason: reason.to_string(),
        }
    }

    /// Attach the process name to a configuration block error.
    pub fn from_config_error(process: impl ToString, err: ConfigError) -> Self {
        let reason = match &err {
            ConfigError::Missing { .. } => "missing required key".to_string(),
            ConfigError::Invalid { reason, .. } => reason.clone(),
        };
        Self::configuration(process, err.key(), err.value().map(String::from), reason)
    }

    pub fn initialization(process: impl IntoIdent, error: Error) -> Self {
        Self::Initialization {
            process: process.into(),
            error: Box::new(error),
        }
    }

    pub fn protocol_decode(tag: &[u8]) -> Self {
        Self::ProtocolDecode { tag: tag.to_vec() }
    }

    pub fn plugin_rejected(name: impl Into<String>, reason: impl ToString) -> Self {
        Self::PluginRejected {
            name: name.into(),
            reason: reason.to_string(),
        }
    }

    pub fn not_found(interface_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            interface_type: interface_type.into(),
            name: name.into(),
        }
    }

    pub fn step(process: impl IntoIdent, reason: impl ToString) -> Self {
        Self::Step {
            process: process.into(),
            reason: reason.to_string(),
        }
    }

    pub fn process_not_found(process: impl IntoIdent) -> Self {
        Self::ProcessNotFound {
            process: process.into(),
        }
    }

    /// The port name is kept verbatim; it need not be a valid identifier.
    pub fn input_not_found(process: impl IntoIdent, port: impl ToString) -> Self {
        Self::PortNotFound {
            process: process.into(),
            port: port.to_string(),
            direction: "input",
        }
    }

    pub fn output_not_found(process: impl IntoIdent, port: impl ToString) -> Self {
        Self::PortNotFound {
            process: process.into(),
            port: port.to_string(),
            direction: "output",
        }
    }

    pub fn output_completed(process: impl IntoIdent, port: impl ToString) -> Self {
        Self::OutputCompleted {
            process: process.into(),
            port: port.to_string(),
        }
    }

    pub fn invalid_transition(process: impl IntoIdent, from: State, to: State) -> Self {
        Self::InvalidTransition {
            process: process.into(),
            from,
            to,
        }
    }

    /// Whether the error is fatal to pipeline construction or start.
    pub fn is_setup_error(&self) -> bool {
        matches!(
            self,
            Self::Configuration { .. } | Self::Initialization { .. } | Self::Config(_)
        )
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
