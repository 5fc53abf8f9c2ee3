//! Cancellation and deadline context for one unit of processing.
//!
//! A [`Context`] is passed to every collaborator call. [`Context::run`] races
//! the call against cancellation and the deadline, so a stuck repository never
//! holds a message hostage.
//!
//! # Example
//!
//! ```rust,ignore
//! use appointment_creator::Context;
//! use std::time::Duration;
//!
//! let root = Context::new(shutdown.token());
//! let ctx = root.with_timeout(Duration::from_secs(10));
//! let event = ctx.run(repository.get_by_message_id(&ctx, "msg-1")).await?;
//! ```

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{ProcessError, ProcessResult};

/// Cancellation token plus an optional deadline.
#[derive(Debug, Clone)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Context {
    /// Context bound to an existing token, without deadline.
    pub fn new(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// A context that is never cancelled by anyone else.
    pub fn background() -> Self {
        Self::new(CancellationToken::new())
    }

    /// Derive a child context that expires after `timeout`.
    ///
    /// Cancelling the parent cancels the child; the child keeps the earlier
    /// of the two deadlines.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        Self {
            token: self.token.child_token(),
            deadline: Some(self.deadline.map_or(deadline, |d| d.min(deadline))),
        }
    }

    /// Cancel this context and all contexts derived from it.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Fail fast if the context is already done.
    pub fn check(&self) -> ProcessResult<()> {
        if self.token.is_cancelled() {
            return Err(ProcessError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(ProcessError::DeadlineExceeded),
            _ => Ok(()),
        }
    }

    /// Drive `fut` to completion unless the context is cancelled or expires first.
    pub async fn run<F, T, E>(&self, fut: F) -> ProcessResult<T>
    where
        F: Future<Output = Result<T, E>>,
        E: Into<ProcessError>,
    {
        self.check()?;

        let expired = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(ProcessError::Cancelled),
            _ = expired => Err(ProcessError::DeadlineExceeded),
            result = fut => result.map_err(Into::into),
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}
