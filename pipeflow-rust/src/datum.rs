use crate::error::{Error, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::{fmt, ops::Deref, sync::Arc};

/// The kind of a [Datum].
///
/// The declaration order is the priority used when a process reads
/// several inputs in one step: `Complete` dominates everything, `Data`
/// nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DatumKind {
    Data,
    Empty,
    Error,
    Invalid,
    Flush,
    Complete,
}

/// The unit of flow on an edge.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Datum {
    /// A value. The payload is opaque to the pipeline.
    Data(Payload),
    /// No value this step.
    Empty,
    /// The upstream step failed with the message.
    Error(String),
    /// The value could not be produced from the inputs.
    Invalid,
    /// Drop buffered state and pass the flush downstream.
    Flush,
    /// End of stream. Nothing follows on the edge.
    Complete,
}

impl Datum {
    pub fn data(payload: impl Into<Payload>) -> Self {
        Self::Data(payload.into())
    }

    pub fn error(message: impl ToString) -> Self {
        Self::Error(message.to_string())
    }

    /// Serialize `value` as the JSON payload of a data datum.
    pub fn encode<T>(value: &T) -> Result<Self>
    where
        T: Serialize + ?Sized,
    {
        let bytes = serde_json::to_vec(value)
            .map_err(|err| Error::InvalidDatum(format!("unable to encode value: {}", err)))?;
        Ok(Self::Data(bytes.into()))
    }

    /// Deserialize the JSON payload of a data datum.
    pub fn decode<T>(&self) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let payload = self.payload().ok_or_else(|| {
            Error::InvalidDatum(format!("expected a data datum, found {:?}", self.kind()))
        })?;
        serde_json::from_slice(payload)
            .map_err(|err| Error::InvalidDatum(format!("unable to decode payload: {}", err)))
    }

    pub fn kind(&self) -> DatumKind {
        match self {
            Self::Data(_) => DatumKind::Data,
            Self::Empty => DatumKind::Empty,
            Self::Error(_) => DatumKind::Error,
            Self::Invalid => DatumKind::Invalid,
            Self::Flush => DatumKind::Flush,
            Self::Complete => DatumKind::Complete,
        }
    }

    pub fn payload(&self) -> Option<&Payload> {
        match self {
            Self::Data(payload) => Some(payload),
            _ => None,
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete)
    }
}

/// Shared, immutable bytes carried by a data datum.
///
/// Cloning a datum for fan-out shares the bytes.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct Payload(Arc<[u8]>);

impl Payload {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Payload")
            .field(&String::from_utf8_lossy(&self.0))
            .finish()
    }
}

impl Deref for Payload {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<[u8]> for Payload {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes.into())
    }
}

impl From<&[u8]> for Payload {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.into())
    }
}

impl<const N: usize> From<&[u8; N]> for Payload {
    fn from(bytes: &[u8; N]) -> Self {
        Self(bytes.as_slice().into())
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Self(text.as_bytes().into())
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        text.into_bytes().into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::ensure;

    #[test]
    fn kind_priority() {
        let mut kinds = vec![
            DatumKind::Empty,
            DatumKind::Complete,
            DatumKind::Data,
            DatumKind::Flush,
            DatumKind::Error,
            DatumKind::Invalid,
        ];
        kinds.sort();
        assert_eq!(
            kinds,
            [
                DatumKind::Data,
                DatumKind::Empty,
                DatumKind::Error,
                DatumKind::Invalid,
                DatumKind::Flush,
                DatumKind::Complete,
            ]
        );
    }

    #[test]
    fn json_payload() -> anyhow::Result<()> {
        let datum = Datum::encode(&42i64)?;
        ensure!(datum.payload().map(|p| p.as_bytes()) == Some(&b"42"[..]));
        ensure!(datum.decode::<i64>()? == 42);
        ensure!(Datum::Empty.decode::<i64>().is_err());
        ensure!(Datum::data("not json").decode::<i64>().is_err());
        Ok(())
    }

    #[test]
    fn clones_share_bytes() {
        let payload = Payload::from(vec![1, 2, 3]);
        let copy = payload.clone();
        assert!(std::ptr::eq(payload.as_bytes(), copy.as_bytes()));
    }
}
