use crate::error::ConfigError;
use indexmap::IndexMap;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

/// Key/value configuration of a single process.
///
/// Values are kept as JSON values and converted to the requested type
/// on access, so that a process reports the offending key and value
/// when it is configured.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigBlock(IndexMap<String, Value>);

impl ConfigBlock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style [set](Self::set).
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    /// Set a value, replacing the previous one.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Get the raw JSON value.
    pub fn raw(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Get a required value.
    pub fn get<T>(&self, key: &str) -> Result<T, ConfigError>
    where
        T: DeserializeOwned,
    {
        self.get_opt(key)?.ok_or_else(|| ConfigError::missing(key))
    }

    /// Get a value or the given default if the key is absent.
    pub fn get_or<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: DeserializeOwned,
    {
        Ok(self.get_opt(key)?.unwrap_or(default))
    }

    /// Get an optional value. An explicit `null` counts as absent.
    pub fn get_opt<T>(&self, key: &str) -> Result<Option<T>, ConfigError>
    where
        T: DeserializeOwned,
    {
        let value = match self.0.get(key) {
            None | Some(Value::Null) => return Ok(None),
            Some(value) => value,
        };
        let parsed = T::deserialize(value).map_err(|err| ConfigError::invalid(key, value, err))?;
        Ok(Some(parsed))
    }
}

impl FromIterator<(String, Value)> for ConfigBlock {
    fn from_iter<I>(iter: I) -> Self
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        Self(iter.into_iter().collect())
    }
}
