//! SourceUnit: an immutable fragment of input text.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable identifier of a [`SourceUnit`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceUnitId(pub String);

impl SourceUnitId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceUnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SourceUnitId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for SourceUnitId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A quotation fragment. Never mutated by the workflow, only referenced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceUnit {
    pub id: SourceUnitId,
    pub text: String,
    /// Who said or wrote the quotation, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribution: Option<String>,
}

impl SourceUnit {
    pub fn new(id: impl Into<SourceUnitId>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            attribution: None,
        }
    }

    pub fn with_attribution(mut self, attribution: impl Into<String>) -> Self {
        self.attribution = Some(attribution.into());
        self
    }
}
