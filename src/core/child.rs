//! # Parent-side handle to a child task with a private inbox.
//!
//! Every coordination unit (run, spec, node) is a tokio task draining one
//! unbounded mpsc inbox in order. The parent keeps a [`Child`] with the inbox
//! sender and the join handle.
//!
//! ```text
//! parent                         child task
//!   │ send(cmd) ───────────────► inbox (FIFO, never blocks the sender)
//!   │ request(make, deadline) ─► inbox ── reply via oneshot ──┐
//!   │ ◄──────────── timeout_at(deadline, reply) ──────────────┘
//!   │ stop(grace): drop sender ─► inbox closed, loop ends
//!   └── timeout(grace, join) ──► Graceful | abort() → Aborted
//! ```
//!
//! ## Rules
//! - an elapsed deadline never cancels the work on the child side; a late reply is discarded
//! - `stop` always reclaims the task: join within the grace window or abort
//! - dropping a [`Child`] aborts its task, so children never outlive their parent

use std::future::Future;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::task::AbortOnDropHandle;

/// Failure of a bounded request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RequestError {
    /// The deadline elapsed before the reply arrived.
    Timeout,
    /// The child is gone or dropped the reply channel.
    Closed,
}

/// How a child ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Stopped {
    Graceful,
    Aborted,
}

pub(crate) struct Child<C> {
    tx: mpsc::UnboundedSender<C>,
    join: AbortOnDropHandle<()>,
}

impl<C: Send + 'static> Child<C> {
    /// Spawns `run` with the receiving end of a fresh inbox.
    pub(crate) fn spawn<F, Fut>(run: F) -> Self
    where
        F: FnOnce(mpsc::UnboundedReceiver<C>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let join = AbortOnDropHandle::new(tokio::spawn(run(rx)));
        Self { tx, join }
    }

    /// Fire-and-forget; returns `false` when the child no longer accepts messages.
    pub(crate) fn send(&self, cmd: C) -> bool {
        self.tx.send(cmd).is_ok()
    }

    /// Sends a request and waits for the reply until `deadline`.
    pub(crate) async fn request<R>(
        &self,
        make: impl FnOnce(oneshot::Sender<R>) -> C,
        deadline: Instant,
    ) -> Result<R, RequestError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.tx.send(make(reply_tx)).is_err() {
            return Err(RequestError::Closed);
        }
        match tokio::time::timeout_at(deadline, reply_rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(RequestError::Closed),
            Err(_) => Err(RequestError::Timeout),
        }
    }

    /// Closes the inbox and waits up to `grace` for the task; aborts it afterwards.
    pub(crate) async fn stop(self, grace: Duration) -> Stopped {
        let Child { tx, mut join } = self;
        drop(tx);

        if grace > Duration::ZERO && tokio::time::timeout(grace, &mut join).await.is_ok() {
            return Stopped::Graceful;
        }
        join.abort();
        Stopped::Aborted
    }
}

/// Stops every child concurrently; returns how many had to be aborted.
pub(crate) async fn stop_all<C: Send + 'static>(
    children: impl IntoIterator<Item = Child<C>>,
    grace: Duration,
) -> usize {
    join_all(children.into_iter().map(|child| child.stop(grace)))
        .await
        .into_iter()
        .filter(|stopped| *stopped == Stopped::Aborted)
        .count()
}
