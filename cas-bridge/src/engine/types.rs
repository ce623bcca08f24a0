//! Engine-side value types: type codes, status codes, timestamps, addresses

use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use super::CasPv;

/// Primitive type codes of the engine's value containers.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AitEnum {
    Invalid = 0,
    Int8 = 1,
    Uint8 = 2,
    Int16 = 3,
    Uint16 = 4,
    Enum16 = 5,
    Int32 = 6,
    Uint32 = 7,
    Float32 = 8,
    Float64 = 9,
    FixedString = 10,
    String = 11,
    Container = 12,
}

impl AitEnum {
    const ALL: [AitEnum; 13] = [
        AitEnum::Invalid,
        AitEnum::Int8,
        AitEnum::Uint8,
        AitEnum::Int16,
        AitEnum::Uint16,
        AitEnum::Enum16,
        AitEnum::Int32,
        AitEnum::Uint32,
        AitEnum::Float32,
        AitEnum::Float64,
        AitEnum::FixedString,
        AitEnum::String,
        AitEnum::Container,
    ];

    pub fn code(self) -> u16 {
        self as u16
    }

    pub fn from_code(code: i64) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| i64::from(t.code()) == code)
    }
}

/// Status returned by the server application interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CaStatus {
    Success,
    NoMemory,
    PvNotFound,
    NoSupport,
    /// The request will complete later through the completion queue.
    AsyncCompletion,
}

impl CaStatus {
    pub fn code(self) -> u32 {
        match self {
            CaStatus::Success => 0,
            CaStatus::NoMemory => 1,
            CaStatus::PvNotFound => 2,
            CaStatus::NoSupport => 4,
            CaStatus::AsyncCompletion => 5,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        [
            CaStatus::Success,
            CaStatus::NoMemory,
            CaStatus::PvNotFound,
            CaStatus::NoSupport,
            CaStatus::AsyncCompletion,
        ]
        .into_iter()
        .find(|s| i64::from(s.code()) == code)
    }

    pub fn is_success(self) -> bool {
        self == CaStatus::Success
    }
}

impl fmt::Display for CaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            CaStatus::Success => "success",
            CaStatus::NoMemory => "no memory",
            CaStatus::PvNotFound => "PV not found",
            CaStatus::NoSupport => "not supported",
            CaStatus::AsyncCompletion => "asynchronous completion",
        };
        f.write_str(text)
    }
}

/// Answer to a PV existence test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PvExistReturn {
    ExistsHere = 0,
    DoesNotExistHere = 1,
}

/// Answer to an attach request: either the PV to serve or a failure status.
#[derive(Clone)]
pub enum PvAttachReturn {
    Pv(Arc<dyn CasPv>),
    Status(CaStatus),
}

impl fmt::Debug for PvAttachReturn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PvAttachReturn::Pv(pv) => f.debug_tuple("Pv").field(&pv.get_name()).finish(),
            PvAttachReturn::Status(s) => f.debug_tuple("Status").field(s).finish(),
        }
    }
}

/// Seconds between the POSIX epoch and the EPICS epoch (1990-01-01 UTC).
pub const EPICS_EPOCH_OFFSET: u64 = 631_152_000;

/// Timestamp relative to the EPICS epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EpicsTime {
    pub sec: u32,
    pub nsec: u32,
}

impl EpicsTime {
    pub fn new(sec: u32, nsec: u32) -> Self {
        Self { sec, nsec }
    }

    pub fn now() -> Self {
        Self::from_system_time(SystemTime::now())
    }

    /// Times before the EPICS epoch saturate to zero.
    pub fn from_system_time(time: SystemTime) -> Self {
        let since_unix = time.duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO);
        let sec = since_unix.as_secs().saturating_sub(EPICS_EPOCH_OFFSET);
        Self {
            sec: u32::try_from(sec).unwrap_or(u32::MAX),
            nsec: since_unix.subsec_nanos(),
        }
    }

    pub fn to_system_time(self) -> SystemTime {
        UNIX_EPOCH + Duration::new(u64::from(self.sec) + EPICS_EPOCH_OFFSET, self.nsec)
    }
}

/// Network address of a client, as seen by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CaNetAddr(SocketAddrV4);

impl CaNetAddr {
    pub fn new(host: Ipv4Addr, port: u16) -> Self {
        Self(SocketAddrV4::new(host, port))
    }

    pub fn host(&self) -> Ipv4Addr {
        *self.0.ip()
    }

    pub fn port(&self) -> u16 {
        self.0.port()
    }
}

impl From<SocketAddrV4> for CaNetAddr {
    fn from(addr: SocketAddrV4) -> Self {
        Self(addr)
    }
}

impl fmt::Display for CaNetAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
