//! Closed error taxonomy (§7 of SPEC_FULL.md). Kept as a plain enum
//! rather than `thiserror` derives to stay aligned with the teacher's
//! dependency stack, which hand-rolls its error types and converts to
//! `anyhow::Error` at task boundaries.

use std::fmt;

#[derive(Debug)]
pub enum EngineError {
    /// Recoverable I/O failure: dropped connection, timeout, DNS hiccup.
    /// The caller should retry, typically with backoff.
    Transient { context: String, source: String },
    /// Malformed or semantically invalid input that was rejected before
    /// it reached shared state.
    Validation { kind: String, detail: String },
    /// A bounded queue or channel was full; the unit of work was dropped.
    Capacity { resource: String },
    /// An invariant the engine relies on was violated. Indicates a bug,
    /// not bad input.
    Programming { detail: String },
    /// Unrecoverable: the process cannot continue meaningfully.
    Fatal { detail: String },
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Transient { context, source } => {
                write!(f, "transient error in {context}: {source}")
            }
            EngineError::Validation { kind, detail } => {
                write!(f, "validation failed ({kind}): {detail}")
            }
            EngineError::Capacity { resource } => {
                write!(f, "capacity exceeded: {resource}")
            }
            EngineError::Programming { detail } => {
                write!(f, "programming error: {detail}")
            }
            EngineError::Fatal { detail } => write!(f, "fatal: {detail}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl EngineError {
    pub fn transient(context: impl Into<String>, source: impl fmt::Display) -> Self {
        EngineError::Transient {
            context: context.into(),
            source: source.to_string(),
        }
    }

    pub fn validation(kind: impl Into<String>, detail: impl Into<String>) -> Self {
        EngineError::Validation {
            kind: kind.into(),
            detail: detail.into(),
        }
    }

    pub fn capacity(resource: impl Into<String>) -> Self {
        EngineError::Capacity {
            resource: resource.into(),
        }
    }

    pub fn programming(detail: impl Into<String>) -> Self {
        EngineError::Programming {
            detail: detail.into(),
        }
    }

    /// Whether a caller driving a reconnect/retry loop should keep going.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Transient { .. } | EngineError::Capacity { .. })
    }
}
