use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};

use crate::error::{ProducerError, SwrError};

type SharedOperation<V> = Shared<BoxFuture<'static, Result<V, ProducerError>>>;

/// The observable state of an [`OperationHandle`].
#[derive(Debug, Clone, PartialEq)]
pub enum HandleStatus<V> {
    /// The operation has not settled yet.
    Pending,
    /// The operation resolved with a value.
    Fulfilled(V),
    /// The operation failed.
    Rejected(ProducerError),
}

impl<V> HandleStatus<V> {
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    pub fn is_fulfilled(&self) -> bool {
        matches!(self, Self::Fulfilled(_))
    }
}

/// A handle to one invocation of the value-producing operation.
///
/// The handle is a shared future: it can be cloned and awaited by any number of callers, and it
/// can be inspected with [`status`](Self::status) without awaiting it. Once settled, a handle
/// never changes. Refreshing an entry creates a new handle instead.
pub struct OperationHandle<V> {
    ticket: u64,
    operation: SharedOperation<V>,
}

impl<V> Clone for OperationHandle<V> {
    fn clone(&self) -> Self {
        Self {
            ticket: self.ticket,
            operation: self.operation.clone(),
        }
    }
}

impl<V> fmt::Debug for OperationHandle<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match self.operation.peek() {
            None => "pending",
            Some(Ok(_)) => "fulfilled",
            Some(Err(_)) => "rejected",
        };
        f.debug_struct("OperationHandle")
            .field("ticket", &self.ticket)
            .field("status", &status)
            .finish()
    }
}

impl<V> OperationHandle<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Wraps a producer invocation into a new handle.
    ///
    /// The `produce` closure is not invoked until the handle is first polled. A panic inside the
    /// producer is turned into a rejection.
    pub(crate) fn new<F, Fut>(ticket: u64, produce: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
    {
        let operation = async move {
            match AssertUnwindSafe(async move { produce().await })
                .catch_unwind()
                .await
            {
                Ok(result) => result.map_err(ProducerError::new),
                Err(_) => Err(ProducerError::new(anyhow::anyhow!(
                    "value producer panicked"
                ))),
            }
        }
        .boxed()
        .shared();

        Self { ticket, operation }
    }

    /// Creates a handle that has already resolved to `value`.
    pub fn resolved(value: V) -> Self {
        Self::settled(Ok(value))
    }

    /// Creates a handle that has already failed with `error`.
    pub fn rejected(error: anyhow::Error) -> Self {
        Self::settled(Err(ProducerError::new(error)))
    }

    fn settled(result: Result<V, ProducerError>) -> Self {
        let operation = futures::future::ready(result).boxed().shared();
        // a `Shared` only records its output once it has been polled
        let _ = operation.clone().now_or_never();
        Self {
            ticket: 0,
            operation,
        }
    }

    /// Inspects the current state of the operation without awaiting it.
    ///
    /// Note that a handle which was itself awaited to completion reports `Pending`; inspect a
    /// clone instead.
    pub fn status(&self) -> HandleStatus<V> {
        match self.operation.peek() {
            None => HandleStatus::Pending,
            Some(Ok(value)) => HandleStatus::Fulfilled(value.clone()),
            Some(Err(err)) => HandleStatus::Rejected(err.clone()),
        }
    }

    /// Returns the resolved value, if the operation has fulfilled.
    pub fn value(&self) -> Option<V> {
        match self.operation.peek() {
            Some(Ok(value)) => Some(value.clone()),
            _ => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.operation.peek().is_none()
    }

    pub fn is_fulfilled(&self) -> bool {
        matches!(self.operation.peek(), Some(Ok(_)))
    }

    pub(crate) fn ticket(&self) -> u64 {
        self.ticket
    }

    /// Drives the operation to completion, yielding the raw producer outcome.
    pub(crate) async fn settle(self) -> Result<V, ProducerError> {
        self.operation.await
    }
}

impl<V> Future for OperationHandle<V>
where
    V: Clone + Send + Sync + 'static,
{
    type Output = Result<V, SwrError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.operation.poll_unpin(cx).map_err(SwrError::Producer)
    }
}
