use std::fmt;

/// Errors produced when constructing a normalized path key.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathKeyError {
    #[error("path key cannot be empty")]
    Empty,
}

/// Normalized filesystem path used as the identity key of a document row.
///
/// The canonical form is absolute, NFC-normalized Unicode with forward-slash
/// separators. Construction of the canonical string lives in
/// `markbase-core::fs::paths`; this wrapper exists so call sites cannot pass
/// an arbitrary string where a normalized path is required.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[derive(serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct NormalizedPathKey(String);

impl NormalizedPathKey {
    pub fn new(value: impl Into<String>) -> Result<Self, PathKeyError> {
        let value = value.into();
        if value.is_empty() {
            return Err(PathKeyError::Empty);
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for NormalizedPathKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
