//! Asynchronous write completion token
//!
//! A `write` handler that cannot finish inside the callback builds an
//! [`AsyncWrite`] from its [`ContextCapsule`] and returns it. The bridge then
//! hands the token to the engine, which keeps it until the completion has
//! been processed. Host code finishes the write later, from any thread, with
//! exactly one of [`AsyncWrite::complete`] or [`AsyncWrite::fail`].

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::engine::{CaStatus, CasAsyncIo, Completion, CompletionSender};
use crate::error::{BridgeError, Result};
use crate::host::lock;

use super::capsule::ContextCapsule;
use super::pv::Pv;

pub(crate) struct AsyncCore {
    request_id: u64,
    pv_name: Arc<str>,
    completions: CompletionSender,
    posted: AtomicBool,
    engine_hold: Mutex<Option<Arc<AsyncCore>>>,
    io: Arc<AsyncIoProxy>,
}

/// The engine's handle on a token.
struct AsyncIoProxy {
    request_id: u64,
    core: Weak<AsyncCore>,
}

impl CasAsyncIo for AsyncIoProxy {
    fn request_id(&self) -> u64 {
        self.request_id
    }

    fn destroy(&self) {
        let Some(core) = self.core.upgrade() else {
            return;
        };
        let _guard = lock::ensure();
        if core.engine_hold.lock().take().is_some() {
            trace!(pv = %core.pv_name, request = self.request_id, "Engine released async write");
        }
    }
}

/// Completion token for one pending write.
#[derive(Clone)]
pub struct AsyncWrite(Arc<AsyncCore>);

impl AsyncWrite {
    /// Bind a token to the write request `capsule` belongs to.
    ///
    /// Fails with [`BridgeError::InvalidContext`] when the capsule has
    /// expired, was issued for another PV, or already produced a token.
    pub fn new(pv: &Pv, capsule: &ContextCapsule) -> Result<Self> {
        let (request_id, completions) = capsule.claim(pv)?;
        let core = Arc::new_cyclic(|core| AsyncCore {
            request_id,
            pv_name: pv.name_arc(),
            completions,
            posted: AtomicBool::new(false),
            engine_hold: Mutex::new(None),
            io: Arc::new(AsyncIoProxy {
                request_id,
                core: core.clone(),
            }),
        });
        debug!(pv = %core.pv_name, request = request_id, "Async write created");
        Ok(Self(core))
    }

    /// Report success to the client.
    pub fn complete(&self) -> Result<()> {
        self.post(CaStatus::Success)
    }

    /// Report failure to the client.
    pub fn fail(&self) -> Result<()> {
        self.post(CaStatus::NoSupport)
    }

    fn post(&self, status: CaStatus) -> Result<()> {
        if self.0.posted.swap(true, Ordering::AcqRel) {
            return Err(BridgeError::RedundantCompletion);
        }
        debug!(pv = %self.0.pv_name, request = self.0.request_id, %status, "Posting write completion");
        self.0
            .completions
            .post(Completion {
                request_id: self.0.request_id,
                status,
            })
            .map_err(|_| BridgeError::EngineGone)
    }

    pub fn is_posted(&self) -> bool {
        self.0.posted.load(Ordering::Acquire)
    }

    pub fn request_id(&self) -> u64 {
        self.0.request_id
    }

    pub fn pv_name(&self) -> &str {
        &self.0.pv_name
    }

    pub fn is_held_by_engine(&self) -> bool {
        self.0.engine_hold.lock().is_some()
    }

    /// Number of strong references to the token, the engine's hold included.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    /// Hand the token to the engine. The hold is taken at most once.
    pub(crate) fn give_to_engine(&self) -> Arc<dyn CasAsyncIo> {
        let _guard = lock::ensure();
        let mut hold = self.0.engine_hold.lock();
        if hold.is_none() {
            *hold = Some(self.0.clone());
        }
        self.0.io.clone()
    }

    /// Undo [`give_to_engine`](Self::give_to_engine) when the engine refused
    /// the token.
    pub(crate) fn revoke_engine_hold(&self) {
        let _guard = lock::ensure();
        self.0.engine_hold.lock().take();
    }
}

impl fmt::Debug for AsyncWrite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncWrite")
            .field("pv", &self.0.pv_name)
            .field("request_id", &self.0.request_id)
            .field("posted", &self.is_posted())
            .finish()
    }
}

impl PartialEq for AsyncWrite {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}
