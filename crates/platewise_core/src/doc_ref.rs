//! Opaque document references.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A globally unique, content-addressed document reference
/// (e.g. `doc:grp-1`).
///
/// The value is opaque to Platewise; only its shape is checked.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DocRef(String);

/// Returned when a string cannot be used as a [`DocRef`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid document reference {0:?}")]
pub struct InvalidDocRef(pub String);

impl DocRef {
    /// Validate and wrap a reference.
    pub fn new(value: impl Into<String>) -> Result<Self, InvalidDocRef> {
        let value = value.into();
        if value.is_empty()
            || value
                .chars()
                .any(|c| c.is_whitespace() || c.is_control())
        {
            return Err(InvalidDocRef(value));
        }
        Ok(Self(value))
    }

    /// The raw reference string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for DocRef {
    type Err = InvalidDocRef;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for DocRef {
    type Error = InvalidDocRef;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<DocRef> for String {
    fn from(value: DocRef) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_opaque_references() {
        let r = DocRef::new("doc:grp-1").unwrap();
        assert_eq!(r.as_str(), "doc:grp-1");
        assert_eq!(r.to_string(), "doc:grp-1");
        assert!("automerge:4Wz9bH2".parse::<DocRef>().is_ok());
    }

    #[test]
    fn rejects_empty_and_whitespace() {
        assert!(DocRef::new("").is_err());
        assert!(DocRef::new("doc: 1").is_err());
        assert!(DocRef::new("doc:\n1").is_err());
    }

    #[test]
    fn deserialization_validates() {
        let ok: DocRef = serde_json::from_str("\"doc:a\"").unwrap();
        assert_eq!(ok.as_str(), "doc:a");
        assert!(serde_json::from_str::<DocRef>("\"\"").is_err());
    }
}
