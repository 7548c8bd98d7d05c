//! Opaque settings documents.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::error::Result;

/// A settings payload passed through to the store untouched.
///
/// The document keeps the exact JSON text it was loaded from, key order and
/// formatting included. Nothing in the crate looks inside it.
#[derive(Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SettingsDocument(Box<RawValue>);

impl SettingsDocument {
    /// Wrap a JSON text. Fails only when the text is not valid JSON.
    pub fn from_json(text: impl Into<String>) -> Result<Self> {
        Ok(Self(RawValue::from_string(text.into())?))
    }

    pub fn as_str(&self) -> &str {
        self.0.get()
    }

    pub fn as_raw(&self) -> &RawValue {
        &self.0
    }
}

impl PartialEq for SettingsDocument {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Eq for SettingsDocument {}

impl fmt::Debug for SettingsDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SettingsDocument").field(&self.as_str()).finish()
    }
}

impl fmt::Display for SettingsDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
