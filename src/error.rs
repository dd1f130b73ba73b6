//! Error types for the cleaning engine.
//!
//! Data-quality findings (duplicates, bad barcodes, out-of-range dates) are never
//! errors: they are reported through the excluded table. The variants below are
//! reserved for conditions that must halt a run.

use thiserror::Error;

use crate::schema::FieldType;

pub type Result<T, E = CleanError> = std::result::Result<T, E>;

/// Coarse classification used by callers deciding whether a stage may be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    SchemaMismatch,
    TransientStore,
}

#[derive(Debug, Error)]
pub enum CleanError {
    // === Configuration errors ===
    /// The requested dataset type has no rule configuration.
    #[error("unknown dataset type '{dataset_type}' (configured: {known})")]
    UnknownDatasetType { dataset_type: String, known: String },

    /// A rule name that no rule implementation answers to.
    #[error("unknown rule '{name}' (supported: {supported})")]
    UnknownRule { name: String, supported: String },

    /// A rule is active but its structural precondition does not hold.
    #[error("rule '{rule}' cannot run: {reason}")]
    RulePrecondition { rule: String, reason: String },

    /// Configuration values that are inconsistent on their own.
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    // === Schema errors ===
    /// A value whose type does not fit the declared field type.
    #[error("field '{field}' is declared {expected} but holds a {found} value")]
    TypeMismatch {
        field: String,
        expected: FieldType,
        found: &'static str,
    },

    /// A referenced field does not exist in the schema.
    #[error("field '{field}' does not exist in the schema")]
    UnknownField { field: String },

    /// Any other structural disagreement between records and their schema.
    #[error("schema mismatch: {reason}")]
    SchemaMismatch { reason: String },

    // === Store errors ===
    /// The external store failed while reading or writing a table.
    #[error("store operation on '{table}' failed: {source}")]
    Store {
        table: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Another run already holds the destination lock.
    #[error("destination is locked by run {holder}; pass --break-lock if that run is no longer active")]
    Locked { holder: String },
}

impl CleanError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CleanError::UnknownDatasetType { .. }
            | CleanError::UnknownRule { .. }
            | CleanError::RulePrecondition { .. }
            | CleanError::InvalidConfig { .. } => ErrorKind::Configuration,
            CleanError::TypeMismatch { .. }
            | CleanError::UnknownField { .. }
            | CleanError::SchemaMismatch { .. } => ErrorKind::SchemaMismatch,
            CleanError::Store { .. } | CleanError::Locked { .. } => ErrorKind::TransientStore,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::TransientStore
    }

    pub(crate) fn store<E>(table: &str, source: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        CleanError::Store {
            table: table.to_string(),
            source: source.into(),
        }
    }

    pub(crate) fn precondition(rule: &str, reason: impl Into<String>) -> Self {
        CleanError::RulePrecondition {
            rule: rule.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn mismatch(reason: impl Into<String>) -> Self {
        CleanError::SchemaMismatch {
            reason: reason.into(),
        }
    }
}
