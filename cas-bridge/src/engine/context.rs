//! Per-request context and the engine's completion queue

use std::fmt;
use std::sync::Arc;

use crossbeam_channel::Sender;
use parking_lot::Mutex;

use super::types::CaStatus;
use super::CasAsyncIo;

/// Result of an asynchronous request, posted to the engine's queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    pub request_id: u64,
    pub status: CaStatus,
}

/// The engine's completion queue has been shut down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueClosed;

/// Thread-safe handle for posting completions.
#[derive(Clone)]
pub struct CompletionSender {
    tx: Sender<Completion>,
}

impl CompletionSender {
    pub(crate) fn new(tx: Sender<Completion>) -> Self {
        Self { tx }
    }

    pub fn post(&self, completion: Completion) -> Result<(), QueueClosed> {
        self.tx.send(completion).map_err(|_| QueueClosed)
    }
}

impl fmt::Debug for CompletionSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionSender").finish_non_exhaustive()
    }
}

/// Context of one engine request.
///
/// A context only lives for the duration of the callback it is passed to.
/// An application that wants to finish a request later registers an
/// asynchronous I/O object through [`CasCtx::register_async_io`] before the
/// callback returns.
pub struct CasCtx {
    request_id: u64,
    completions: CompletionSender,
    async_io: Mutex<Option<Arc<dyn CasAsyncIo>>>,
}

impl CasCtx {
    pub fn new(request_id: u64, completions: CompletionSender) -> Self {
        Self {
            request_id,
            completions,
            async_io: Mutex::new(None),
        }
    }

    pub fn request_id(&self) -> u64 {
        self.request_id
    }

    pub fn completion_sender(&self) -> &CompletionSender {
        &self.completions
    }

    /// Hand an asynchronous I/O object to the engine. Only one may be
    /// registered per request; returns `false` if the slot is taken.
    pub fn register_async_io(&self, io: Arc<dyn CasAsyncIo>) -> bool {
        let mut slot = self.async_io.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(io);
        true
    }

    pub(crate) fn take_async_io(&self) -> Option<Arc<dyn CasAsyncIo>> {
        self.async_io.lock().take()
    }
}

impl fmt::Debug for CasCtx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CasCtx")
            .field("request_id", &self.request_id)
            .finish_non_exhaustive()
    }
}
