//! Call-scoped view of an engine request context

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use crate::engine::CompletionSender;
use crate::error::{BridgeError, Result};

use super::pv::{Pv, PvCore};

struct CapsuleState {
    live: AtomicBool,
    claimed: AtomicBool,
    request_id: u64,
    completions: CompletionSender,
    pv: Weak<PvCore>,
}

/// Handle to the request a `write` handler is serving.
///
/// The capsule is only valid while the handler call that received it is
/// running. Handlers may clone it, but every use after the call returned
/// fails with [`BridgeError::InvalidContext`]. Its only purpose is to build
/// an [`AsyncWrite`](super::AsyncWrite) for the request.
#[derive(Clone)]
pub struct ContextCapsule {
    state: Arc<CapsuleState>,
}

/// Expires the capsule when dropped.
pub(crate) struct CapsuleScope {
    state: Arc<CapsuleState>,
}

impl Drop for CapsuleScope {
    fn drop(&mut self) {
        self.state.live.store(false, Ordering::Release);
    }
}

impl ContextCapsule {
    pub(crate) fn open(request_id: u64, completions: CompletionSender, pv: Weak<PvCore>) -> (Self, CapsuleScope) {
        let state = Arc::new(CapsuleState {
            live: AtomicBool::new(true),
            claimed: AtomicBool::new(false),
            request_id,
            completions,
            pv,
        });
        let scope = CapsuleScope {
            state: state.clone(),
        };
        (Self { state }, scope)
    }

    pub fn is_live(&self) -> bool {
        self.state.live.load(Ordering::Acquire)
    }

    pub fn request_id(&self) -> u64 {
        self.state.request_id
    }

    /// The PV whose write produced this capsule, while the call lasts.
    pub fn pv(&self) -> Option<Pv> {
        if !self.is_live() {
            return None;
        }
        self.state.pv.upgrade().map(Pv::from_core)
    }

    /// Take the request for an asynchronous completion on `pv`.
    ///
    /// Succeeds once per capsule, while it is live and only for the PV it was
    /// issued for.
    pub(crate) fn claim(&self, pv: &Pv) -> Result<(u64, CompletionSender)> {
        if !self.is_live() || !pv.is_core(&self.state.pv) {
            return Err(BridgeError::InvalidContext);
        }
        if self.state.claimed.swap(true, Ordering::AcqRel) {
            return Err(BridgeError::InvalidContext);
        }
        Ok((self.state.request_id, self.state.completions.clone()))
    }
}

impl fmt::Debug for ContextCapsule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextCapsule")
            .field("request_id", &self.state.request_id)
            .field("live", &self.is_live())
            .finish()
    }
}
