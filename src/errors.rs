//! Structured error types.
//!
//! `ProducerError` is the error surfaced to consumers through
//! [`crate::types::EndpointState::error`]; it wraps whatever error the async
//! producer returned without forcing producers onto a single concrete error
//! type. `CoreError` covers failures internal to the crate's own plumbing
//! (cache backends, serialization) which are always handled fail-soft and
//! never returned to a subscriber.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// The error a producer failed with, captured in a type-erased but
/// `Display`/`Error`-compatible form.
///
/// Producers return `Result<T, E>` for an arbitrary `E: std::error::Error`;
/// `ProducerError` lets the registry store one error type per endpoint
/// regardless of what each producer's `E` actually is.
#[derive(Clone)]
pub struct ProducerError {
    message: Arc<str>,
    source: Option<Arc<dyn std::error::Error + Send + Sync + 'static>>,
}

impl ProducerError {
    /// Build a producer error from a plain message, with no underlying cause.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: Arc::from(message.into()),
            source: None,
        }
    }

    /// Wrap a concrete producer error, preserving it as the `source()`.
    pub fn wrap<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            message: Arc::from(error.to_string()),
            source: Some(Arc::new(error)),
        }
    }
}

impl fmt::Debug for ProducerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProducerError")
            .field("message", &self.message)
            .finish()
    }
}

impl fmt::Display for ProducerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ProducerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_deref().map(|e| e as &(dyn std::error::Error + 'static))
    }
}

impl PartialEq for ProducerError {
    /// Two producer errors are equal when their rendered messages match.
    /// The wrapped `source` is not comparable in general, so it is ignored.
    fn eq(&self, other: &Self) -> bool {
        self.message == other.message
    }
}

impl From<String> for ProducerError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for ProducerError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// Internal failures from the crate's own plumbing: cache backends,
/// (de)serialization of cached records.
///
/// These never reach a subscriber. Call sites log them via `tracing` and fall
/// back to behaving as though the cache were empty, per the cache provider
/// contract's fail-soft requirement.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    #[error("cache backend unavailable for key `{key}`: {message}")]
    CacheUnavailable { key: String, message: String },

    #[error("failed to serialize cached value for key `{key}`: {message}")]
    Serialization { key: String, message: String },

    #[error("cached entry for key `{key}` could not be deserialized: {message}")]
    Deserialization { key: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn producer_error_displays_message() {
        let err = ProducerError::new("network unreachable");
        assert_eq!(err.to_string(), "network unreachable");
    }

    #[test]
    fn producer_error_wraps_source() {
        #[derive(Debug)]
        struct Inner;
        impl fmt::Display for Inner {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "inner failure")
            }
        }
        impl std::error::Error for Inner {}

        let err = ProducerError::wrap(Inner);
        assert_eq!(err.to_string(), "inner failure");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn producer_errors_compare_by_message() {
        assert_eq!(ProducerError::new("x"), ProducerError::new("x"));
        assert_ne!(ProducerError::new("x"), ProducerError::new("y"));
    }

    #[test]
    fn core_error_messages() {
        let err = CoreError::CacheUnavailable {
            key: "user:1".into(),
            message: "lock poisoned".into(),
        };
        assert_eq!(
            err.to_string(),
            "cache backend unavailable for key `user:1`: lock poisoned"
        );
    }
}
