//! Host Runtime - Dynamic Object Model, Global Lock and Diagnostics
//!
//! Handlers live in the host runtime: they exchange dynamically typed
//! [`HostValue`]s with the bridge and may only run while the calling thread
//! holds the host lock (see [`lock`]). Failures the bridge has to swallow are
//! written to the [`diagnostics`] sink.

pub mod diagnostics;
pub mod lock;

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

use crate::bridge::{AsyncWrite, Pv};

pub use lock::HostGuard;

/// Attribute mapping exchanged with PV handlers (`value`, `status`, ...).
pub type Attributes = BTreeMap<String, HostValue>;

/// A member of one of the symbolic enumerations published by the bridge.
///
/// Symbols are resolved by name against the process-wide enumeration
/// registry, see [`crate::bridge::symbols`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Symbol {
    family: Cow<'static, str>,
    name: Cow<'static, str>,
}

impl Symbol {
    pub fn new(family: impl Into<Cow<'static, str>>, name: impl Into<Cow<'static, str>>) -> Self {
        Self {
            family: family.into(),
            name: name.into(),
        }
    }

    /// Enumeration the symbol claims to belong to (e.g. `"Type"`).
    pub fn family(&self) -> &str {
        &self.family
    }

    /// Member name (e.g. `"DOUBLE"`).
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.family, self.name)
    }
}

/// A dynamically typed host value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum HostValue {
    #[default]
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Bytes(Vec<u8>),
    Str(String),
    Seq(Vec<HostValue>),
    Map(Attributes),
    Symbol(Symbol),
    /// Reference to a bridged PV object.
    Pv(Pv),
    /// Reference to an asynchronous write completion token.
    AsyncWrite(AsyncWrite),
}

impl HostValue {
    /// Build a mapping from `(key, value)` pairs.
    pub fn map<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, HostValue)>,
    {
        Self::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Short name of the value's kind, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Bytes(_) => "bytes",
            Self::Str(_) => "str",
            Self::Seq(_) => "sequence",
            Self::Map(_) => "mapping",
            Self::Symbol(_) => "symbol",
            Self::Pv(_) => "PV",
            Self::AsyncWrite(_) => "AsyncWrite",
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Truth value following the host runtime's rules: `None`, `false`, zero
    /// and empty containers are falsy, everything else is truthy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::None => false,
            Self::Bool(b) => *b,
            Self::Int(i) => *i != 0,
            Self::Float(f) => *f != 0.0,
            Self::Bytes(b) => !b.is_empty(),
            Self::Str(s) => !s.is_empty(),
            Self::Seq(s) => !s.is_empty(),
            Self::Map(m) => !m.is_empty(),
            Self::Symbol(_) | Self::Pv(_) | Self::AsyncWrite(_) => true,
        }
    }

    pub fn as_map(&self) -> Option<&Attributes> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Convert a JSON document into a host value.
    ///
    /// Integers that fit `i64` become [`HostValue::Int`], every other number
    /// becomes [`HostValue::Float`].
    pub fn from_json(value: &serde_json::Value) -> Self {
        use serde_json::Value;

        match value {
            Value::Null => Self::None,
            Value::Bool(b) => Self::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => Self::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => Self::Str(s.clone()),
            Value::Array(items) => Self::Seq(items.iter().map(Self::from_json).collect()),
            Value::Object(entries) => Self::Map(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), Self::from_json(v)))
                    .collect(),
            ),
        }
    }
}

impl From<bool> for HostValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for HostValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for HostValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for HostValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_owned())
    }
}

impl From<Vec<u8>> for HostValue {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl From<Symbol> for HostValue {
    fn from(v: Symbol) -> Self {
        Self::Symbol(v)
    }
}

impl From<Attributes> for HostValue {
    fn from(v: Attributes) -> Self {
        Self::Map(v)
    }
}

impl From<Pv> for HostValue {
    fn from(v: Pv) -> Self {
        Self::Pv(v)
    }
}

impl From<AsyncWrite> for HostValue {
    fn from(v: AsyncWrite) -> Self {
        Self::AsyncWrite(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truthiness() {
        assert!(!HostValue::None.is_truthy());
        assert!(!HostValue::Bool(false).is_truthy());
        assert!(!HostValue::Int(0).is_truthy());
        assert!(!HostValue::Seq(vec![]).is_truthy());
        assert!(HostValue::Int(-3).is_truthy());
        assert!(HostValue::Str("x".into()).is_truthy());
        assert!(HostValue::Symbol(Symbol::new("Type", "DOUBLE")).is_truthy());
    }

    #[test]
    fn test_from_json() {
        let json = serde_json::json!({
            "value": [1, 2.5, "three"],
            "status": null,
        });
        let value = HostValue::from_json(&json);
        let map = value.as_map().unwrap();
        assert_eq!(
            map["value"],
            HostValue::Seq(vec![
                HostValue::Int(1),
                HostValue::Float(2.5),
                HostValue::Str("three".into())
            ])
        );
        assert!(map["status"].is_none());
    }

    #[test]
    fn test_symbol_display() {
        assert_eq!(Symbol::new("Events", "VALUE").to_string(), "Events.VALUE");
    }
}
