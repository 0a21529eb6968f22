//! The result of scheduling a chunk stage.
//!
//! Expected failures, like a neighbour that was unloaded while generation was in
//! flight, travel as [`ChunkResult::Fail`] instead of errors or panics so the
//! generation task can cancel itself and release what it holds.

use std::sync::Arc;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};

use crate::chunk::chunk_access::ChunkAccess;

/// Reason used when a holder is no longer allowed to reach a status.
pub const UNLOADED_CHUNK: &str = "Unloaded chunk";

/// Success with a value, or failure with a reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkResult<T> {
    /// The step produced a value.
    Success(T),
    /// The step could not complete.
    Fail(Arc<str>),
}

impl<T> ChunkResult<T> {
    /// Wraps a value.
    #[must_use]
    pub const fn success(value: T) -> Self {
        Self::Success(value)
    }

    /// Creates a failure with the given reason.
    #[must_use]
    pub fn fail(reason: impl Into<Arc<str>>) -> Self {
        Self::Fail(reason.into())
    }

    /// Returns true for [`ChunkResult::Success`].
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// The failure reason, if any.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Success(_) => None,
            Self::Fail(reason) => Some(reason.as_ref()),
        }
    }

    /// Maps the success value. A failure keeps its reason untouched.
    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> ChunkResult<U> {
        match self {
            Self::Success(value) => ChunkResult::Success(f(value)),
            Self::Fail(reason) => ChunkResult::Fail(reason),
        }
    }

    /// The success value, or `default` on failure.
    pub fn or_else(self, default: T) -> T {
        match self {
            Self::Success(value) => value,
            Self::Fail(_) => default,
        }
    }

    /// Runs `callback` on the success value and returns `self` unchanged.
    #[must_use]
    pub fn if_success<F: FnOnce(&T)>(self, callback: F) -> Self {
        if let Self::Success(value) = &self {
            callback(value);
        }
        self
    }

    /// Converts into a `Result`, building the error from the reason only on failure.
    ///
    /// # Errors
    /// Returns the error produced by `error` if this is a failure.
    pub fn ok_or_else<E, F: FnOnce(&str) -> E>(self, error: F) -> Result<T, E> {
        match self {
            Self::Success(value) => Ok(value),
            Self::Fail(reason) => Err(error(&reason)),
        }
    }
}

impl<T> From<anyhow::Result<T>> for ChunkResult<T> {
    fn from(result: anyhow::Result<T>) -> Self {
        match result {
            Ok(value) => Self::Success(value),
            Err(err) => Self::fail(format!("{err:#}")),
        }
    }
}

/// A shared future resolving to the chunk once a stage step finishes.
pub type ChunkStepFuture = Shared<BoxFuture<'static, ChunkResult<Arc<ChunkAccess>>>>;

/// A step future that is already resolved.
#[must_use]
pub fn completed_future(result: ChunkResult<Arc<ChunkAccess>>) -> ChunkStepFuture {
    futures::future::ready(result).boxed().shared()
}

/// Polls a shared future once without blocking. `None` while it is still pending.
#[must_use]
pub fn get_now<T: Clone>(future: &Shared<BoxFuture<'static, T>>) -> Option<T> {
    if let Some(output) = future.peek() {
        return Some(output.clone());
    }
    future.clone().now_or_never()
}
