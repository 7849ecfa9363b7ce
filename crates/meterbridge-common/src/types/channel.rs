//! Channel - opaque identifier of one logical connection/session

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque channel identifier handed out by the billing controller
///
/// Unique while active. The same identifier is only reused after a full
/// stop/cleanup cycle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Channel(String);

impl Channel {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Channel {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for Channel {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl AsRef<str> for Channel {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
