//! PV proxy
//!
//! A [`Pv`] pairs a fixed name with a [`PvHandler`]. The engine sees it
//! through a [`PvProxy`], which implements [`CasPv`] by re-entering the
//! handler under the host lock.
//!
//! # Ownership
//! Host code owns `Pv` handles. When a server attaches the PV the engine
//! takes one extra retaining reference ([`Pv::give_to_server`]); the engine
//! releases it through [`CasPv::destroy`]. The hold is taken at most once and
//! released at most once, under the host lock. The proxy itself only keeps a
//! weak reference back, so a PV nobody holds is dropped.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace, warn};

use crate::engine::{AitEnum, CaStatus, CasCtx, CasEngine, CasPv, Gdd};
use crate::error::{BridgeError, ConvertError, HandlerResult, Result};
use crate::host::diagnostics::write_unraisable;
use crate::host::{lock, Attributes, HostValue};

use super::capsule::ContextCapsule;
use super::convert;
use super::reenter;
use super::symbols::{FieldType, HostEnum};

/// Behaviour of a served PV.
///
/// Every method has a default, so handlers override only what they need.
/// The defaults describe a scalar string PV that has no data, rejects
/// writes and refuses subscriptions.
pub trait PvHandler: Send + Sync {
    /// The engine no longer uses the PV.
    fn destroy(&self) -> HandlerResult<()> {
        Ok(())
    }

    /// Element type, a `Type` symbol (or its name or code).
    fn field_type(&self) -> HandlerResult<HostValue> {
        Ok(FieldType::String.to_host())
    }

    /// Number of elements.
    fn count(&self) -> HandlerResult<HostValue> {
        Ok(HostValue::Int(1))
    }

    /// Current attributes, or `None` when no data is available.
    fn read(&self) -> HandlerResult<HostValue> {
        Ok(HostValue::None)
    }

    /// Apply a client write.
    ///
    /// `timestamp` is a `(seconds, nanoseconds)` pair relative to the EPICS
    /// epoch. Return a truthy value to accept, a falsy one to reject, or an
    /// [`AsyncWrite`](super::AsyncWrite) built from `context` to finish later.
    fn write(&self, value: &HostValue, timestamp: &HostValue, context: &ContextCapsule) -> HandlerResult<HostValue> {
        let _ = (value, timestamp, context);
        Ok(HostValue::Bool(false))
    }

    /// A client subscribed. Truthy to accept.
    fn interest_register(&self) -> HandlerResult<HostValue> {
        Ok(HostValue::Bool(false))
    }

    /// The last subscription is gone.
    fn interest_delete(&self) -> HandlerResult<()> {
        Ok(())
    }
}

pub(crate) struct PvCore {
    name: Arc<str>,
    handler: Arc<dyn PvHandler>,
    proxy: Arc<PvProxy>,
    engine_hold: Mutex<Option<Arc<PvCore>>>,
    engine: RwLock<Weak<CasEngine>>,
}

impl PvCore {
    fn field_type(&self) -> Result<FieldType> {
        let value = reenter(|| self.handler.field_type())?;
        Ok(FieldType::from_host(&value)?)
    }

    fn count(&self) -> Result<u32> {
        match reenter(|| self.handler.count())? {
            HostValue::Int(n) => u32::try_from(n)
                .map_err(|_| ConvertError::mismatch("count", "element count", n.to_string()).into()),
            other => Err(ConvertError::mismatch("count", "element count", other.kind()).into()),
        }
    }

    fn report(&self, origin: &str, err: &dyn fmt::Display) {
        write_unraisable(origin, &self.name, err);
    }
}

/// Host handle on a served PV.
#[derive(Clone)]
pub struct Pv(Arc<PvCore>);

impl Pv {
    /// Create a PV named `name`. The name is fixed for the PV's lifetime; it
    /// must be non-empty and must not contain NUL bytes.
    pub fn new(name: impl Into<String>, handler: Arc<dyn PvHandler>) -> Result<Self> {
        let name: String = name.into();
        if name.is_empty() || name.contains('\0') {
            return Err(BridgeError::InvalidName(name));
        }
        let name: Arc<str> = name.into();
        let core = Arc::new_cyclic(|core| PvCore {
            name: name.clone(),
            handler,
            proxy: Arc::new(PvProxy {
                name,
                core: core.clone(),
            }),
            engine_hold: Mutex::new(None),
            engine: RwLock::new(Weak::new()),
        });
        Ok(Self(core))
    }

    pub(crate) fn from_core(core: Arc<PvCore>) -> Self {
        Self(core)
    }

    /// A handle that does not keep the PV alive.
    pub fn downgrade(&self) -> WeakPv {
        WeakPv(Arc::downgrade(&self.0))
    }

    pub(crate) fn downgrade_core(&self) -> Weak<PvCore> {
        Arc::downgrade(&self.0)
    }

    pub(crate) fn is_core(&self, core: &Weak<PvCore>) -> bool {
        std::ptr::eq(Arc::as_ptr(&self.0), core.as_ptr())
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub(crate) fn name_arc(&self) -> Arc<str> {
        self.0.name.clone()
    }

    pub fn handler(&self) -> &Arc<dyn PvHandler> {
        &self.0.handler
    }

    /// The engine-facing proxy.
    pub fn proxy(&self) -> Arc<PvProxy> {
        self.0.proxy.clone()
    }

    /// Whether the engine currently holds the PV.
    pub fn is_registered(&self) -> bool {
        self.0.engine_hold.lock().is_some()
    }

    /// Number of strong references to the PV, the engine's hold included.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    /// Hand the PV to the engine, taking the engine's retaining reference
    /// unless it already holds one.
    pub fn give_to_server(&self) -> Arc<dyn CasPv> {
        let _guard = lock::ensure();
        let mut hold = self.0.engine_hold.lock();
        if hold.is_none() {
            *hold = Some(self.0.clone());
            debug!(pv = %self.0.name, "PV registered with engine");
        }
        self.0.proxy.clone()
    }

    pub(crate) fn bind_engine(&self, engine: Weak<CasEngine>) {
        *self.0.engine.write() = engine;
    }

    /// The engine the PV is attached to, if any.
    pub fn engine(&self) -> Option<Arc<CasEngine>> {
        self.0.engine.read().upgrade()
    }

    /// Post events for this PV to subscribed clients.
    ///
    /// `events` selects the event categories (see
    /// [`convert::event_mask`]); `attributes` carry the new value and
    /// properties. Fails on the first problem; the event value is released
    /// before returning on every path. Returns the number of monitors that
    /// received the event.
    pub fn post_event(&self, events: &HostValue, attributes: &Attributes) -> Result<usize> {
        let field_type = self.0.field_type()?;
        let engine = self
            .engine()
            .ok_or_else(|| BridgeError::NotAttached(self.name().to_owned()))?;
        if !engine.is_running() {
            return Err(BridgeError::PostFailed("engine is shut down".to_owned()));
        }
        let mask = convert::event_mask(events, engine.vocabulary())?;

        let mut value = engine.new_value(field_type.to_ait());
        value.assign(convert::attributes_to_value(attributes, field_type)?);
        let value = Arc::new(value);
        let delivered = engine.post_event(self.name(), mask, &value);
        drop(value);

        trace!(pv = self.name(), %mask, delivered, "Events posted");
        Ok(delivered)
    }
}

impl fmt::Debug for Pv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pv")
            .field("name", &self.0.name)
            .field("registered", &self.is_registered())
            .finish()
    }
}

impl PartialEq for Pv {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// Non-owning PV handle.
#[derive(Clone, Default)]
pub struct WeakPv(Weak<PvCore>);

impl WeakPv {
    pub fn upgrade(&self) -> Option<Pv> {
        self.0.upgrade().map(Pv)
    }
}

impl fmt::Debug for WeakPv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("WeakPv")
    }
}

/// The engine's view of a [`Pv`].
pub struct PvProxy {
    name: Arc<str>,
    core: Weak<PvCore>,
}

impl PvProxy {
    fn core(&self) -> Option<Arc<PvCore>> {
        let core = self.core.upgrade();
        if core.is_none() {
            warn!(pv = %self.name, "Engine called a PV that no longer exists");
        }
        core
    }
}

impl CasPv for PvProxy {
    fn get_name(&self) -> &str {
        &self.name
    }

    fn best_external_type(&self) -> AitEnum {
        let Some(core) = self.core() else {
            return AitEnum::String;
        };
        match core.field_type() {
            Ok(field_type) => field_type.to_ait(),
            Err(err) => {
                core.report("PV.type", &err);
                AitEnum::String
            }
        }
    }

    fn max_dimension(&self) -> u32 {
        let Some(core) = self.core() else {
            return 0;
        };
        match core.count() {
            Ok(count) => convert::dimensions(count).0,
            Err(err) => {
                core.report("PV.count", &err);
                0
            }
        }
    }

    fn max_bound(&self, _dimension: u32) -> u32 {
        let Some(core) = self.core() else {
            return 0;
        };
        match core.count() {
            Ok(count) => convert::dimensions(count).1,
            Err(err) => {
                core.report("PV.count", &err);
                0
            }
        }
    }

    fn read(&self, _ctx: &CasCtx, prototype: &mut Gdd) -> CaStatus {
        let Some(core) = self.core() else {
            return CaStatus::NoSupport;
        };
        let field_type = match core.field_type() {
            Ok(field_type) => field_type,
            Err(err) => {
                core.report("PV.type", &err);
                return CaStatus::NoSupport;
            }
        };

        let attributes = match reenter(|| core.handler.read()) {
            Ok(HostValue::None) => return CaStatus::NoSupport,
            Ok(HostValue::Map(attributes)) => attributes,
            Ok(other) => {
                let err = ConvertError::mismatch("read", "attribute mapping", other.kind());
                core.report("PV.read", &err);
                return CaStatus::NoSupport;
            }
            Err(err) => {
                core.report("PV.read", &err);
                return CaStatus::NoSupport;
            }
        };

        match convert::attributes_to_value(&attributes, field_type) {
            Ok(value) => {
                prototype.assign(value);
                CaStatus::Success
            }
            Err(ConvertError::MissingValue) => CaStatus::NoSupport,
            Err(err) => {
                core.report("PV.read", &err);
                CaStatus::NoSupport
            }
        }
    }

    fn write(&self, ctx: &CasCtx, value: &Gdd) -> CaStatus {
        let Some(core) = self.core() else {
            return CaStatus::NoSupport;
        };
        let mut attributes = match convert::value_to_attributes(value) {
            Ok(attributes) => attributes,
            Err(err) => {
                core.report("PV.write", &err);
                return CaStatus::NoSupport;
            }
        };
        let new_value = attributes.remove("value").unwrap_or_default();
        let timestamp = attributes.remove("timestamp").unwrap_or_default();

        let (capsule, scope) = ContextCapsule::open(
            ctx.request_id(),
            ctx.completion_sender().clone(),
            Arc::downgrade(&core),
        );
        let result = reenter(|| core.handler.write(&new_value, &timestamp, &capsule));
        drop(scope);

        match result {
            Ok(HostValue::AsyncWrite(token)) => {
                if token.request_id() != ctx.request_id() {
                    core.report(
                        "PV.write",
                        &format_args!(
                            "async write for request {} returned from request {}",
                            token.request_id(),
                            ctx.request_id()
                        ),
                    );
                    return CaStatus::NoSupport;
                }
                let io = token.give_to_engine();
                if !ctx.register_async_io(io) {
                    token.revoke_engine_hold();
                    core.report("PV.write", &"request already has an asynchronous completion");
                    return CaStatus::NoSupport;
                }
                debug!(pv = %core.name, request = ctx.request_id(), "Write completes asynchronously");
                CaStatus::AsyncCompletion
            }
            Ok(answer) if answer.is_truthy() => CaStatus::Success,
            Ok(_) => CaStatus::NoSupport,
            Err(err) => {
                core.report("PV.write", &err);
                CaStatus::NoSupport
            }
        }
    }

    fn interest_register(&self) -> CaStatus {
        let Some(core) = self.core() else {
            return CaStatus::NoSupport;
        };
        match reenter(|| core.handler.interest_register()) {
            Ok(answer) if answer.is_truthy() => CaStatus::Success,
            Ok(_) => CaStatus::NoSupport,
            Err(err) => {
                core.report("PV.interestRegister", &err);
                CaStatus::NoSupport
            }
        }
    }

    fn interest_delete(&self) {
        let Some(core) = self.core() else {
            return;
        };
        if let Err(err) = reenter(|| core.handler.interest_delete()) {
            core.report("PV.interestDelete", &err);
        }
    }

    fn destroy(&self) {
        let Some(core) = self.core() else {
            return;
        };
        if let Err(err) = reenter(|| core.handler.destroy()) {
            core.report("PV.destroy", &err);
        }

        let _guard = lock::ensure();
        *core.engine.write() = Weak::new();
        if core.engine_hold.lock().take().is_some() {
            debug!(pv = %core.name, "Engine released PV");
        }
        // The last strong reference may go here, while the lock is held.
        drop(core);
    }
}
