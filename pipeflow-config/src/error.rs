/// Failure to read a value out of a [ConfigBlock](crate::ConfigBlock).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required configuration key `{key}`")]
    Missing { key: String },
    #[error("invalid value `{value}` for configuration key `{key}`: {reason}")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    pub fn missing(key: impl Into<String>) -> Self {
        Self::Missing { key: key.into() }
    }

    pub fn invalid(key: impl Into<String>, value: impl ToString, reason: impl ToString) -> Self {
        Self::Invalid {
            key: key.into(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }

    /// The configuration key the error is about.
    pub fn key(&self) -> &str {
        match self {
            Self::Missing { key } => key,
            Self::Invalid { key, .. } => key,
        }
    }

    /// The offending value, if the key was present.
    pub fn value(&self) -> Option<&str> {
        match self {
            Self::Missing { .. } => None,
            Self::Invalid { value, .. } => Some(value),
        }
    }
}
