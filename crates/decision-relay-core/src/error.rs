//! Error taxonomy for the context pipeline.
//!
//! Every failure the core can observe falls into one of these categories.
//! The orchestrator maps each category to a recovery policy: extraction
//! errors move to the next strategy, storage errors are logged and counted,
//! inconsistencies skip the offending record. None of them abort ingest.

use thiserror::Error;

/// Convenience alias used across the core crate.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Error category for structured logging and stats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Extraction,
    Storage,
    Inconsistency,
    Transition,
    Embedding,
    Config,
}

impl ErrorCategory {
    /// Machine-readable code for logging.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Extraction => "EXTRACTION_ERROR",
            Self::Storage => "STORAGE_ERROR",
            Self::Inconsistency => "DATA_INCONSISTENCY",
            Self::Transition => "INVALID_TRANSITION",
            Self::Embedding => "EMBEDDING_ERROR",
            Self::Config => "CONFIG_ERROR",
        }
    }
}

#[derive(Debug, Error)]
pub enum CoreError {
    /// A single extraction strategy failed (timeout, malformed payload,
    /// provider unavailable). Callers fall through to the next strategy.
    #[error("extraction failed: {0}")]
    Extraction(String),

    /// The buffer or persistent store could not be reached or rejected
    /// the operation.
    #[error("storage error: {message}")]
    Storage {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A record references something that does not exist, or a stored
    /// payload could not be decoded.
    #[error("data inconsistency: {0}")]
    Inconsistency(String),

    /// An embedding status change that the state machine does not allow.
    #[error("invalid embedding transition for {decision_id}: {from} -> {to}")]
    InvalidTransition {
        decision_id: String,
        from: &'static str,
        to: &'static str,
    },

    /// The semantic backend failed to produce a vector.
    #[error("embedding error: {0}")]
    Embedding(String),

    #[error("config error: {0}")]
    Config(String),
}

impl CoreError {
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    pub fn storage_with<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Extraction(_) => ErrorCategory::Extraction,
            Self::Storage { .. } => ErrorCategory::Storage,
            Self::Inconsistency(_) => ErrorCategory::Inconsistency,
            Self::InvalidTransition { .. } => ErrorCategory::Transition,
            Self::Embedding(_) => ErrorCategory::Embedding,
            Self::Config(_) => ErrorCategory::Config,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_codes() {
        let err = CoreError::storage("buffer unreachable");
        assert_eq!(err.category(), ErrorCategory::Storage);
        assert_eq!(err.category().as_str(), "STORAGE_ERROR");

        let err = CoreError::InvalidTransition {
            decision_id: "d1".into(),
            from: "embedded",
            to: "failed",
        };
        assert_eq!(err.category().as_str(), "INVALID_TRANSITION");
        assert!(err.to_string().contains("embedded -> failed"));
    }
}
