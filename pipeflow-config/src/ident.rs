use crate::port_addr::PortAddr;
use anyhow::Result;
use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};
use std::{borrow::Borrow, borrow::Cow, fmt, fmt::Display, hash::Hash, str::FromStr};

/// Process or port name that consists of ASCII alphanumeric and '-', '_' characters.
///
/// The name must not be empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ident(String);

impl Ident {
    /// Create an identifier from a string.
    ///
    /// Returns `None` if the string is empty or contains a character
    /// outside of the allowed set.
    pub fn new<'a, S>(name: S) -> Option<Self>
    where
        S: Into<Cow<'a, str>>,
    {
        let name = name.into().into_owned();
        let ok = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || "-_".contains(c));
        ok.then_some(Self(name))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Address the port `port` on the process named by this identifier.
    pub fn port(self, port: Ident) -> PortAddr {
        PortAddr::new(self, port)
    }
}

impl Borrow<str> for Ident {
    fn borrow(&self) -> &str {
        self.as_str()
    }
}

impl AsRef<str> for Ident {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl FromStr for Ident {
    type Err = String;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Ident::new(name).ok_or_else(|| format!("invalid name '{}'", name))
    }
}

impl Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl Serialize for Ident {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.as_str().serialize(serializer)
    }
}

impl<'a> Deserialize<'a> for Ident {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'a>,
    {
        let name = String::deserialize(deserializer)?;
        Ident::from_str(&name).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ident_charset() {
        assert!(Ident::new("frame-source_2").is_some());
        assert!(Ident::new("").is_none());
        assert!(Ident::new("a.b").is_none());
        assert!(Ident::new("a/b").is_none());
    }
}
