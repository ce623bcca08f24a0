//! cas-bridge - Host PV Handlers Served Through a Channel Access Engine
//!
//! This crate connects dynamically dispatched host handlers to a Channel
//! Access server engine. The engine calls fixed virtual interfaces
//! ([`engine::CasPv`], [`engine::CaServer`]); the bridge implements them by
//! re-entering host [`PvHandler`]s and [`ServerHandler`]s under the host
//! lock, converting values both ways.
//!
//! # Layout:
//! - [`host`]: dynamic values, the host lock and the diagnostic sink
//! - [`engine`]: the in-process protocol engine and its value model
//! - [`bridge`]: PV and server proxies, completion tokens, conversion
//! - [`catalog`]: ready-made attribute-backed PVs and a name directory
//! - [`config`]: configuration for the `cas-bridge` binary

pub mod bridge;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod host;

pub use bridge::{
    AlarmSeverity, AlarmStatus, AsyncWrite, ContextCapsule, Events, FieldType, HostEnum, Pv, PvHandler, Server,
    ServerHandler,
};
pub use catalog::{PvDirectory, PvOptions, SimplePv};
pub use config::BridgeConfig;
pub use engine::{CaClient, CasEngine};
pub use error::{BridgeError, ConvertError, HandlerError};
pub use host::{Attributes, HostValue};

use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Install logging and publish the symbolic enumerations.
///
/// `default_level` applies when `RUST_LOG` is unset. Calling `init` again is
/// harmless; an already installed subscriber is kept.
pub fn init(default_level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(default_level))?;
    // Fails only when a subscriber is already installed.
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();

    let registry = bridge::symbols::publish();
    info!(
        version = env!("CARGO_PKG_VERSION"),
        families = registry.families().count(),
        "cas-bridge initialized"
    );
    Ok(())
}

/// Withdraw the symbolic enumerations published by [`init`].
pub fn shutdown() {
    bridge::symbols::clear();
    info!("cas-bridge shut down");
}
