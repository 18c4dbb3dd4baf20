use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::pipeline::orchestrator::RunState;

/// Canonical lead fields a normalization failure can point at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalField {
    Source,
    Street,
    City,
    State,
    AddressLine,
}

impl CanonicalField {
    pub fn as_str(&self) -> &'static str {
        match self {
            CanonicalField::Source => "source",
            CanonicalField::Street => "street",
            CanonicalField::City => "city",
            CanonicalField::State => "state",
            CanonicalField::AddressLine => "address_line",
        }
    }
}

impl fmt::Display for CanonicalField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum NormalizationFailure {
    Missing,
    Unparseable(String),
    UnknownSource,
}

impl fmt::Display for NormalizationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NormalizationFailure::Missing => f.write_str("missing required value"),
            NormalizationFailure::Unparseable(detail) => write!(f, "unparseable: {}", detail),
            NormalizationFailure::UnknownSource => f.write_str("no mapping configured for source"),
        }
    }
}

/// Record-level failure. The record is dropped; the run continues.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[error("{source_id} record {reference}: field `{field}` {reason}")]
pub struct NormalizationError {
    pub source_id: String,
    pub reference: String,
    pub field: CanonicalField,
    pub reason: NormalizationFailure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionFailureKind {
    Error,
    Timeout,
    Panicked,
}

/// Source-level failure. That source's batch is treated as empty.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[error("collection from {source_id} failed ({kind:?}): {reason}")]
pub struct CollectionFailure {
    pub source_id: String,
    pub kind: CollectionFailureKind,
    pub reason: String,
}

impl CollectionFailure {
    pub fn error(source_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            kind: CollectionFailureKind::Error,
            reason: reason.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum HistoryStoreError {
    #[error("history store unavailable: {0}")]
    Unavailable(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("corrupt history entry for {fingerprint}: {detail}")]
    Corrupt { fingerprint: String, detail: String },

    #[error("history store lock poisoned")]
    Poisoned,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScoringError {
    #[error("scoring weight `{name}` is invalid: {value}")]
    InvalidWeight { name: String, value: f64 },

    #[error("score computed as non-finite value {0}")]
    NonFinite(f64),
}

/// Run-level errors. Only these abort a run.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("history store unavailable at run start: {0}")]
    HistoryStoreUnavailable(#[source] HistoryStoreError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("illegal run state transition {from:?} -> {to:?}")]
    InvalidTransition { from: RunState, to: RunState },

    #[error("worker task failed during {stage}: {reason}")]
    Worker { stage: &'static str, reason: String },
}

pub type Result<T> = std::result::Result<T, PipelineError>;
