//! Engine module - The Native Server Contract
//!
//! This module describes the protocol engine the bridge plugs into: the
//! virtual PV and server interfaces it calls ([`CasPv`], [`CaServer`]), the
//! asynchronous I/O interface it accepts for late completions
//! ([`CasAsyncIo`]), its value container ([`Gdd`]) and an in-process engine
//! ([`CasEngine`]) that services requests, channels, monitors and the
//! completion queue on behalf of clients.
//!
//! # Threading contract
//! The engine invokes every callback from its own threads without holding
//! the host lock, and expects each one to run to completion before it
//! proceeds. Callbacks must never unwind into engine code.

pub mod client;
pub mod context;
pub mod events;
pub mod gdd;
pub mod server;
pub mod types;

pub use client::{CaClient, ClientError};
pub use context::{CasCtx, Completion, CompletionSender, QueueClosed};
pub use events::{CasEventMask, EventVocabulary};
pub use gdd::{Gdd, GddData, Limits, ValueLedger};
pub use server::{CasEngine, EngineEvent, Subscription, WriteOutcome};
pub use types::{AitEnum, CaNetAddr, CaStatus, EpicsTime, PvAttachReturn, PvExistReturn};

/// The engine's view of a served process variable.
pub trait CasPv: Send + Sync {
    /// Canonical name. Must be constant for the lifetime of the object and
    /// must not block.
    fn get_name(&self) -> &str;

    /// Native type clients get when they do not ask for a specific one.
    fn best_external_type(&self) -> AitEnum;

    /// Number of dimensions (0 for scalars).
    fn max_dimension(&self) -> u32;

    /// Element bound of `dimension`.
    fn max_bound(&self, dimension: u32) -> u32;

    /// Fill `prototype` with the PV's current value and attributes.
    fn read(&self, ctx: &CasCtx, prototype: &mut Gdd) -> CaStatus;

    /// Apply a client write. Returning [`CaStatus::AsyncCompletion`] requires
    /// an I/O object registered on `ctx`.
    fn write(&self, ctx: &CasCtx, value: &Gdd) -> CaStatus;

    /// A client subscribed; events should be posted from now on.
    fn interest_register(&self) -> CaStatus;

    /// The last subscription is gone.
    fn interest_delete(&self);

    /// The engine no longer references this PV.
    fn destroy(&self);
}

/// The engine's view of the server application.
pub trait CaServer: Send + Sync {
    fn pv_exist_test(&self, ctx: &CasCtx, client: &CaNetAddr, pv_name: &str) -> PvExistReturn;

    fn pv_attach(&self, ctx: &CasCtx, pv_name: &str) -> PvAttachReturn;
}

/// An outstanding asynchronous request.
pub trait CasAsyncIo: Send + Sync {
    /// Request this object completes.
    fn request_id(&self) -> u64;

    /// Called once the engine has processed the completion and dropped its
    /// interest in the object.
    fn destroy(&self);
}
