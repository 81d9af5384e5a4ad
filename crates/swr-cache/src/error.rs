use std::fmt;
use std::sync::Arc;

use serde::{Serialize, Serializer};
use thiserror::Error;

/// Errors surfaced by the [`SwrCache`](crate::SwrCache).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SwrError {
    /// The construction options are invalid.
    ///
    /// The attached string describes which option was rejected.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// The cache was destroyed and cannot start any new work.
    #[error("cache instance has been destroyed")]
    Destroyed,
    /// The value-producing operation failed.
    #[error(transparent)]
    Producer(ProducerError),
}

impl From<ProducerError> for SwrError {
    fn from(err: ProducerError) -> Self {
        Self::Producer(err)
    }
}

/// A failure of the value-producing operation.
///
/// The original error is kept behind an [`Arc`] so that it can be handed out to every caller
/// awaiting the same operation, and to the `rejected` notification.
#[derive(Clone)]
pub struct ProducerError(Arc<anyhow::Error>);

impl ProducerError {
    pub(crate) fn new(err: anyhow::Error) -> Self {
        Self(Arc::new(err))
    }

    /// Returns the underlying error.
    pub fn inner(&self) -> &anyhow::Error {
        &self.0
    }
}

impl fmt::Debug for ProducerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl fmt::Display for ProducerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.0, f)
    }
}

impl std::error::Error for ProducerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source()
    }
}

/// Two producer errors are equal if they are the very same failure.
impl PartialEq for ProducerError {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Serialize for ProducerError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&format_args!("{:#}", self.0))
    }
}
