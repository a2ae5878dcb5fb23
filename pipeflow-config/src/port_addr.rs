use crate::ident::Ident;
use anyhow::Result;
use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};
use std::{fmt, fmt::Display, hash::Hash, str::FromStr};

/// Address of a port on a named process.
///
/// It is parsed from the dotted notation `process.port`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PortAddr {
    process: Ident,
    port: Ident,
}

impl PortAddr {
    pub fn new(process: Ident, port: Ident) -> Self {
        Self { process, port }
    }

    /// The process name.
    pub fn process(&self) -> &Ident {
        &self.process
    }

    /// The port name.
    pub fn port(&self) -> &Ident {
        &self.port
    }
}

impl FromStr for PortAddr {
    type Err = String;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let (process, port) = text
            .split_once('.')
            .ok_or_else(|| format!("'{}' is not a port address of form 'process.port'", text))?;
        let process: Ident = process.parse()?;
        Ok(process.port(port.parse()?))
    }
}

impl Display for PortAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}", self.process, self.port)
    }
}

impl Serialize for PortAddr {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.to_string().serialize(serializer)
    }
}

impl<'a> Deserialize<'a> for PortAddr {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'a>,
    {
        let text = String::deserialize(deserializer)?;
        PortAddr::from_str(&text).map_err(D::Error::custom)
    }
}
