//! Dotted method paths (`a.b.c`) and their two navigation vocabularies.
//!
//! Client-side transports (HTTP batch, composite) surface navigation
//! failures as [`RpcError::invalid_path`]; the local binding transport
//! distinguishes a bad namespace segment (`UnknownNamespace`) from a bad
//! final segment (`UnknownMethod`), since it walks a concrete object graph
//! rather than an opaque remote session.

use std::fmt;
use std::str::FromStr;

use crate::error::RpcError;

/// A validated, non-empty dotted path with at least one segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodPath {
    raw: String,
    segments: Vec<String>,
}

impl MethodPath {
    /// Parse and validate a dotted path. Fails if the path is empty or any
    /// segment is empty (leading/trailing/double dots).
    pub fn parse(path: impl Into<String>) -> Result<Self, RpcError> {
        let raw = path.into();
        if raw.is_empty() {
            return Err(RpcError::invalid_path(&raw));
        }
        let segments: Vec<String> = raw.split('.').map(str::to_string).collect();
        if segments.iter().any(String::is_empty) {
            return Err(RpcError::invalid_path(&raw));
        }
        Ok(Self { raw, segments })
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// All segments but the last — the namespace chain leading to the call.
    pub fn namespace_segments(&self) -> &[String] {
        &self.segments[..self.segments.len() - 1]
    }

    /// The final, callable segment.
    pub fn method_segment(&self) -> &str {
        self.segments.last().expect("segments is never empty")
    }
}

impl fmt::Display for MethodPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

impl FromStr for MethodPath {
    type Err = RpcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for MethodPath {
    fn as_ref(&self) -> &str {
        &self.raw
    }
}

/// Split a dotted path, failing with `InvalidPath` if any segment is empty.
/// Used by transports that classify failures uniformly as `RpcError`
/// (HTTP batch, composite) rather than the namespace/method vocabulary.
pub fn split_for_invalid_path(path: &str) -> Result<Vec<&str>, RpcError> {
    if path.is_empty() {
        return Err(RpcError::invalid_path(path));
    }
    let segments: Vec<&str> = path.split('.').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(RpcError::invalid_path(path));
    }
    Ok(segments)
}

/// Join segments back into a dotted path. `join(split(p)) == p` for any
/// non-empty `p` with no empty segments (§8 round-trip law).
pub fn join(segments: &[impl AsRef<str>]) -> String {
    segments
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join(".")
}
