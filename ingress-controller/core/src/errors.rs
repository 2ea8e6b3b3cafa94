//! Retryability classification for reconcile errors.
//!
//! The reconciler inspects errors once at its boundary: an error carrying a
//! [`RetryableError`] with `retryable == true` is requeued, everything else
//! is dropped.

use std::fmt;

#[derive(Debug)]
pub struct RetryableError {
    source: anyhow::Error,
    retryable: bool,
}

impl RetryableError {
    pub fn is_retryable(&self) -> bool {
        self.retryable
    }
}

impl fmt::Display for RetryableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.source.fmt(f)
    }
}

impl std::error::Error for RetryableError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}

/// Wraps an error so the reconciler requeues the work item.
pub fn retryable(error: impl Into<anyhow::Error>) -> anyhow::Error {
    anyhow::Error::new(RetryableError {
        source: error.into(),
        retryable: true,
    })
}

/// Wraps an error so the reconciler drops the work item.
pub fn unretryable(error: impl Into<anyhow::Error>) -> anyhow::Error {
    anyhow::Error::new(RetryableError {
        source: error.into(),
        retryable: false,
    })
}

/// True when `error` carries a retryable classification. Unclassified errors
/// are treated as non-retryable.
pub fn is_retryable(error: &anyhow::Error) -> bool {
    error
        .downcast_ref::<RetryableError>()
        .is_some_and(RetryableError::is_retryable)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn classification_survives_the_wrapper() {
        assert!(is_retryable(&retryable(anyhow!("transient"))));
        assert!(!is_retryable(&unretryable(anyhow!("structural"))));
    }

    #[test]
    fn unclassified_errors_are_not_retried() {
        assert!(!is_retryable(&anyhow!("plain")));
    }

    #[test]
    fn message_passes_through() {
        let error = retryable(anyhow!("listing services: timed out"));
        assert_eq!(error.to_string(), "listing services: timed out");
    }
}
