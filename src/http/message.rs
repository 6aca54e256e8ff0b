//! Request/response pair shared between a connection and its handler.
//!
//! A [`Message`] is reference counted: the connection keeps one handle while
//! the request is being served, and a handler may clone it onto a worker
//! thread. The worker freezes the message while it works and thaws it when the
//! response is ready. The last `thaw` hands the message back to the owning
//! connection over a channel, so the connection itself is only ever touched
//! from its own task. If the connection has gone away in the meantime, the
//! hand-back is silently dropped.

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard, MappedMutexGuard};
use tokio::sync::mpsc::UnboundedSender;

use crate::http::request::Request;
use crate::http::response::Response;

/// Per-connection position of a request, used to order responses.
pub type SequenceId = u16;

#[derive(Debug, Clone)]
pub struct Message {
    inner: Arc<Shared>,
}

#[derive(Debug)]
struct Shared {
    seq: SequenceId,
    request: Request,
    state: Mutex<State>,
}

#[derive(Debug)]
struct State {
    /// `None` once the connection has taken the response for writing.
    response: Option<Response>,
    freeze_count: u32,
    on_thaw: Option<UnboundedSender<Message>>,
}

impl Message {
    pub fn new(seq: SequenceId, request: Request, response: Response) -> Self {
        Self {
            inner: Arc::new(Shared {
                seq,
                request,
                state: Mutex::new(State {
                    response: Some(response),
                    freeze_count: 0,
                    on_thaw: None,
                }),
            }),
        }
    }

    pub fn seq(&self) -> SequenceId {
        self.inner.seq
    }

    pub fn request(&self) -> &Request {
        &self.inner.request
    }

    /// Locks the response for editing.
    ///
    /// Returns `None` after the message has been sent.
    pub fn response(&self) -> Option<MappedMutexGuard<'_, Response>> {
        MutexGuard::try_map(self.inner.state.lock(), |state| state.response.as_mut()).ok()
    }

    /// Marks the response as incomplete. Every call must be matched by one
    /// [`thaw`](Self::thaw).
    pub fn freeze(&self) {
        let mut state = self.inner.state.lock();
        state.freeze_count += 1;
        tracing::trace!(seq = self.inner.seq, count = state.freeze_count, "Message frozen");
    }

    /// Releases one freeze. When the count reaches zero and the connection is
    /// waiting for this message, the message is handed back to it.
    pub fn thaw(&self) {
        let waiter = {
            let mut state = self.inner.state.lock();
            if state.freeze_count == 0 {
                tracing::warn!(seq = self.inner.seq, "Unbalanced thaw ignored");
                return;
            }
            state.freeze_count -= 1;
            tracing::trace!(seq = self.inner.seq, count = state.freeze_count, "Message thawed");
            if state.freeze_count == 0 {
                state.on_thaw.take()
            } else {
                None
            }
        };

        if let Some(waiter) = waiter {
            if waiter.send(self.clone()).is_err() {
                tracing::debug!(seq = self.inner.seq, "Connection gone before response was ready");
            }
        }
    }

    pub fn is_frozen(&self) -> bool {
        self.inner.state.lock().freeze_count > 0
    }

    /// Drops any outstanding freezes, e.g. after a handler failed midway.
    pub(crate) fn reset_freeze(&self) {
        let mut state = self.inner.state.lock();
        state.freeze_count = 0;
        state.on_thaw = None;
    }

    /// Takes the response if the message is not frozen. Otherwise registers
    /// `waiter` to receive the message once it thaws and returns `None`.
    pub(crate) fn take_or_wait(&self, waiter: &UnboundedSender<Message>) -> Option<Response> {
        let mut state = self.inner.state.lock();
        if state.freeze_count > 0 {
            state.on_thaw = Some(waiter.clone());
            None
        } else {
            state.response.take()
        }
    }
}
