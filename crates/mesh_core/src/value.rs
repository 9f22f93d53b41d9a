//! Property values carried by mesh objects and property changes.

use crate::types::TimeStamp;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A property value.
///
/// The mesh does not validate values against a type system; it only stores
/// them, records them in changes and hands them to projected-property
/// updaters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PropertyValue {
    /// A boolean.
    Boolean(bool),
    /// A signed integer.
    Integer(i64),
    /// A UTF-8 string.
    Text(String),
    /// Opaque bytes.
    Blob(Vec<u8>),
    /// A point in time.
    Timestamp(TimeStamp),
}

impl PropertyValue {
    /// Returns the integer payload, if this is an integer.
    #[must_use]
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the text payload, if this is text.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boolean(v) => write!(f, "{v}"),
            Self::Integer(v) => write!(f, "{v}"),
            Self::Text(v) => write!(f, "{v:?}"),
            Self::Blob(v) => write!(f, "<{} bytes>", v.len()),
            Self::Timestamp(v) => write!(f, "{v}"),
        }
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accessors() {
        assert_eq!(PropertyValue::from(7).as_integer(), Some(7));
        assert_eq!(PropertyValue::from("x").as_text(), Some("x"));
        assert_eq!(PropertyValue::from(true).as_integer(), None);
    }

    #[test]
    fn display() {
        assert_eq!(PropertyValue::Blob(vec![1, 2]).to_string(), "<2 bytes>");
        assert_eq!(PropertyValue::from("a").to_string(), "\"a\"");
    }
}
