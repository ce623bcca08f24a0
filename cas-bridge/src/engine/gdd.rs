//! Tagged-union value container exchanged with the engine
//!
//! A [`Gdd`] carries a typed scalar or one-dimensional array payload together
//! with alarm status, severity, timestamp and the display properties clients
//! may request (enum strings, units, precision, limits).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::types::{AitEnum, EpicsTime};

/// Typed payload. Scalars are stored as one-element vectors.
#[derive(Debug, Clone, PartialEq)]
pub enum GddData {
    Uint8(Vec<u8>),
    Int16(Vec<i16>),
    Uint16(Vec<u16>),
    Enum16(Vec<u16>),
    Int32(Vec<i32>),
    Uint32(Vec<u32>),
    Float32(Vec<f32>),
    Float64(Vec<f64>),
    String(Vec<Vec<u8>>),
}

impl GddData {
    pub fn primitive(&self) -> AitEnum {
        match self {
            GddData::Uint8(_) => AitEnum::Uint8,
            GddData::Int16(_) => AitEnum::Int16,
            GddData::Uint16(_) => AitEnum::Uint16,
            GddData::Enum16(_) => AitEnum::Enum16,
            GddData::Int32(_) => AitEnum::Int32,
            GddData::Uint32(_) => AitEnum::Uint32,
            GddData::Float32(_) => AitEnum::Float32,
            GddData::Float64(_) => AitEnum::Float64,
            GddData::String(_) => AitEnum::String,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            GddData::Uint8(v) => v.len(),
            GddData::Int16(v) => v.len(),
            GddData::Uint16(v) | GddData::Enum16(v) => v.len(),
            GddData::Int32(v) => v.len(),
            GddData::Uint32(v) => v.len(),
            GddData::Float32(v) => v.len(),
            GddData::Float64(v) => v.len(),
            GddData::String(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Lower/upper pair used for display, control, warning and alarm limits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Limits {
    pub lower: f64,
    pub upper: f64,
}

/// Counts live containers allocated through it.
///
/// The engine hands out tracked containers for transient values such as
/// posted events, so leaks show up as a non-zero [`ValueLedger::live`].
#[derive(Debug, Clone, Default)]
pub struct ValueLedger(Arc<AtomicUsize>);

impl ValueLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn live(&self) -> usize {
        self.0.load(Ordering::Acquire)
    }

    fn acquire(&self) {
        self.0.fetch_add(1, Ordering::AcqRel);
    }

    fn release(&self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// The engine's value container.
#[derive(Debug)]
pub struct Gdd {
    primitive: AitEnum,
    dimension: u32,
    bound: u32,
    data: Option<GddData>,
    pub status: u16,
    pub severity: u16,
    pub timestamp: EpicsTime,
    pub enum_strings: Option<Vec<Vec<u8>>>,
    pub units: Option<Vec<u8>>,
    pub precision: Option<i16>,
    pub display_limits: Option<Limits>,
    pub control_limits: Option<Limits>,
    pub warning_limits: Option<Limits>,
    pub alarm_limits: Option<Limits>,
    ledger: Option<ValueLedger>,
}

impl Gdd {
    /// An empty container of the given primitive type.
    pub fn new(primitive: AitEnum) -> Self {
        Self {
            primitive,
            dimension: 0,
            bound: 0,
            data: None,
            status: 0,
            severity: 0,
            timestamp: EpicsTime::default(),
            enum_strings: None,
            units: None,
            precision: None,
            display_limits: None,
            control_limits: None,
            warning_limits: None,
            alarm_limits: None,
            ledger: None,
        }
    }

    /// An empty container counted by `ledger` until dropped.
    pub fn tracked(primitive: AitEnum, ledger: &ValueLedger) -> Self {
        ledger.acquire();
        let mut gdd = Self::new(primitive);
        gdd.ledger = Some(ledger.clone());
        gdd
    }

    /// A zero-dimensional container; `data` holds a single element.
    pub fn scalar(data: GddData) -> Self {
        let mut gdd = Self::new(data.primitive());
        gdd.set_scalar(data);
        gdd
    }

    /// A one-dimensional container holding `data`.
    pub fn array(data: GddData) -> Self {
        let mut gdd = Self::new(data.primitive());
        gdd.set_array(data);
        gdd
    }

    pub fn set_scalar(&mut self, data: GddData) {
        self.primitive = data.primitive();
        self.dimension = 0;
        self.bound = 0;
        self.data = Some(data);
    }

    pub fn set_array(&mut self, data: GddData) {
        self.primitive = data.primitive();
        self.dimension = 1;
        self.bound = u32::try_from(data.len()).unwrap_or(u32::MAX);
        self.data = Some(data);
    }

    pub fn primitive(&self) -> AitEnum {
        self.primitive
    }

    pub fn dimension(&self) -> u32 {
        self.dimension
    }

    /// Element bound of dimension 0 (zero for scalars).
    pub fn bound(&self) -> u32 {
        self.bound
    }

    pub fn is_scalar(&self) -> bool {
        self.dimension == 0
    }

    pub fn data(&self) -> Option<&GddData> {
        self.data.as_ref()
    }

    /// Copy payload and attributes from `other`, keeping this container's
    /// allocation tracking.
    pub fn assign(&mut self, mut other: Gdd) {
        if let Some(theirs) = other.ledger.take() {
            theirs.release();
        }
        let ledger = self.ledger.take();
        *self = other;
        self.ledger = ledger;
    }
}

impl Clone for Gdd {
    fn clone(&self) -> Self {
        if let Some(ledger) = &self.ledger {
            ledger.acquire();
        }
        Self {
            primitive: self.primitive,
            dimension: self.dimension,
            bound: self.bound,
            data: self.data.clone(),
            status: self.status,
            severity: self.severity,
            timestamp: self.timestamp,
            enum_strings: self.enum_strings.clone(),
            units: self.units.clone(),
            precision: self.precision,
            display_limits: self.display_limits,
            control_limits: self.control_limits,
            warning_limits: self.warning_limits,
            alarm_limits: self.alarm_limits,
            ledger: self.ledger.clone(),
        }
    }
}

impl PartialEq for Gdd {
    fn eq(&self, other: &Self) -> bool {
        self.primitive == other.primitive
            && self.dimension == other.dimension
            && self.bound == other.bound
            && self.data == other.data
            && self.status == other.status
            && self.severity == other.severity
            && self.timestamp == other.timestamp
            && self.enum_strings == other.enum_strings
            && self.units == other.units
            && self.precision == other.precision
            && self.display_limits == other.display_limits
            && self.control_limits == other.control_limits
            && self.warning_limits == other.warning_limits
            && self.alarm_limits == other.alarm_limits
    }
}

impl Drop for Gdd {
    fn drop(&mut self) {
        if let Some(ledger) = self.ledger.take() {
            ledger.release();
        }
    }
}
