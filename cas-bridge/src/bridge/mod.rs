//! Bridge module - Host Handlers behind the Engine's Virtual Interfaces
//!
//! This is where host-side handlers meet the engine:
//! - [`pv`]: the PV proxy and the [`PvHandler`] capability set
//! - [`server`]: the server proxy and [`ServerHandler`]
//! - [`async_write`]: completion tokens for writes that finish later
//! - [`capsule`]: the call-scoped context handed to `write` handlers
//! - [`convert`] and [`symbols`]: value and enumeration conversion
//!
//! Every call from the engine into a handler goes through [`reenter`], which
//! takes the host lock and converts panics into [`HandlerError::Panicked`] so
//! nothing unwinds into engine code.

pub mod async_write;
pub mod capsule;
pub mod convert;
pub mod pv;
pub mod server;
pub mod symbols;

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use tracing::trace;

use crate::engine::{CasEngine, CasPv};
use crate::error::{BridgeError, HandlerError, HandlerResult, Result};
use crate::host::{lock, HostGuard, HostValue};

pub use async_write::AsyncWrite;
pub use capsule::ContextCapsule;
pub use pv::{Pv, PvHandler, PvProxy, WeakPv};
pub use server::{ClientAddress, Server, ServerHandler};
pub use symbols::{AlarmSeverity, AlarmStatus, AttachResponse, Events, ExistsResponse, FieldType, HostEnum};

/// Run a handler call under the host lock, catching panics.
pub(crate) fn reenter<R>(call: impl FnOnce() -> HandlerResult<R>) -> HandlerResult<R> {
    let _guard = lock::ensure();
    match panic::catch_unwind(AssertUnwindSafe(call)) {
        Ok(result) => result,
        Err(payload) => Err(HandlerError::Panicked(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}

/// Service engine I/O for up to `timeout_secs` with the host lock released.
///
/// Returns after the timeout, or as soon as a batch of queued work has been
/// handled, with the number of items serviced. The timeout must be finite
/// and non-negative. The caller must hold the host lock exactly once.
pub fn process(guard: &mut HostGuard, engine: &CasEngine, timeout_secs: f64) -> Result<usize> {
    if !timeout_secs.is_finite() || timeout_secs < 0.0 {
        return Err(BridgeError::InvalidTimeout(timeout_secs));
    }
    let timeout = Duration::try_from_secs_f64(timeout_secs)
        .map_err(|_| BridgeError::InvalidTimeout(timeout_secs))?;
    if !engine.is_running() {
        return Err(BridgeError::EngineGone);
    }

    let serviced = guard.allow_threads(|| engine.process(timeout))?;
    if serviced > 0 {
        trace!(serviced, "Engine work processed");
    }
    Ok(serviced)
}

/// Hand a host object to the engine. Only PVs can be given.
pub fn give_to_server(object: &HostValue) -> Result<Arc<dyn CasPv>> {
    match object {
        HostValue::Pv(pv) => Ok(pv.give_to_server()),
        _ => Err(BridgeError::NotAPv),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_reenter_catches_panics() {
        let result: HandlerResult<()> = reenter(|| panic!("handler blew up"));
        assert_eq!(result, Err(HandlerError::Panicked("handler blew up".into())));
        assert!(!lock::is_held());

        let formatted: HandlerResult<()> = reenter(|| panic!("code {}", 7));
        assert_eq!(formatted, Err(HandlerError::Panicked("code 7".into())));
    }

    #[test]
    fn test_reenter_holds_lock() {
        let held = reenter(|| Ok(lock::is_held())).unwrap();
        assert!(held);
        assert!(!lock::is_held());
    }

    #[test]
    fn test_process_zero_timeout_returns_promptly() {
        let engine = CasEngine::new();
        let mut guard = lock::ensure();
        let start = Instant::now();
        assert_eq!(process(&mut guard, &engine, 0.0), Ok(0));
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn test_process_rejects_bad_timeouts() {
        let engine = CasEngine::new();
        let mut guard = lock::ensure();
        for bad in [-1.0, f64::NAN, f64::INFINITY, 1e300] {
            assert!(matches!(
                process(&mut guard, &engine, bad),
                Err(BridgeError::InvalidTimeout(_))
            ));
        }
    }

    #[test]
    fn test_process_refuses_nested_lock() {
        let engine = CasEngine::new();
        let _outer = lock::ensure();
        let mut inner = lock::ensure();
        assert_eq!(process(&mut inner, &engine, 0.0), Err(BridgeError::NestedHostLock));
    }

    #[test]
    fn test_give_to_server_requires_pv() {
        assert_eq!(give_to_server(&HostValue::Int(1)).err(), Some(BridgeError::NotAPv));
    }
}
