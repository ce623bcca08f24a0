//! Symbolic enumerations shared with host code
//!
//! Host code names element types, alarm conditions, event categories and the
//! server's answers through [`Symbol`]s such as `Type.DOUBLE`. Each family is
//! a small closed enumeration with a native integer code. The process-wide
//! [`EnumRegistry`] resolves symbols to codes and back; it is published by
//! [`crate::init`] and withdrawn by [`crate::shutdown`].

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{const_rwlock, RwLock};
use tracing::debug;

use crate::engine::{AitEnum, CaStatus, PvExistReturn};
use crate::error::ConvertError;
use crate::host::{HostValue, Symbol};

/// A closed enumeration published to host code.
pub trait HostEnum: Copy + Eq + Sized + 'static {
    /// Family name used in symbols, e.g. `"Type"`.
    const FAMILY: &'static str;

    /// Canonical member names, in code order.
    const MEMBERS: &'static [(&'static str, Self)];

    fn code(self) -> i64;

    fn name(self) -> &'static str {
        Self::MEMBERS
            .iter()
            .find(|(_, member)| *member == self)
            .map_or("?", |(name, _)| name)
    }

    fn to_symbol(self) -> Symbol {
        Symbol::new(Self::FAMILY, self.name())
    }

    fn to_host(self) -> HostValue {
        HostValue::Symbol(self.to_symbol())
    }

    fn from_code(code: i64) -> Option<Self> {
        Self::MEMBERS
            .iter()
            .map(|(_, member)| *member)
            .find(|member| member.code() == code)
    }

    /// Resolve a symbol of this family through the registry.
    fn from_symbol(symbol: &Symbol) -> Result<Self, ConvertError> {
        if symbol.family() != Self::FAMILY {
            return Err(unknown(symbol.family(), symbol.name()));
        }
        let code = registry().code(symbol)?;
        Self::from_code(code).ok_or_else(|| unknown(Self::FAMILY, symbol.name()))
    }

    /// Accept a symbol, a member name or a raw native code.
    fn from_host(value: &HostValue) -> Result<Self, ConvertError> {
        match value {
            HostValue::Symbol(symbol) => Self::from_symbol(symbol),
            HostValue::Str(name) => Self::from_symbol(&Symbol::new(Self::FAMILY, name.clone())),
            HostValue::Int(code) => {
                Self::from_code(*code).ok_or_else(|| unknown(Self::FAMILY, &code.to_string()))
            }
            other => Err(ConvertError::mismatch("symbol", Self::FAMILY, other.kind())),
        }
    }
}

fn unknown(family: &str, name: &str) -> ConvertError {
    ConvertError::UnknownEnumValue {
        family: family.to_owned(),
        name: name.to_owned(),
    }
}

macro_rules! host_enum {
    (
        $(#[$meta:meta])*
        $name:ident as $family:literal {
            $($variant:ident = $label:literal => $code:expr),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant),+
        }

        impl HostEnum for $name {
            const FAMILY: &'static str = $family;
            const MEMBERS: &'static [(&'static str, Self)] = &[$(($label, Self::$variant)),+];

            fn code(self) -> i64 {
                match self {
                    $(Self::$variant => $code),+
                }
            }
        }
    };
}

host_enum! {
    /// Element type of a PV. Codes are the engine's primitive type codes.
    FieldType as "Type" {
        String = "STRING" => AitEnum::String.code() as i64,
        Enum = "ENUM" => AitEnum::Enum16.code() as i64,
        Char = "CHAR" => AitEnum::Uint8.code() as i64,
        Short = "SHORT" => AitEnum::Int16.code() as i64,
        UShort = "USHORT" => AitEnum::Uint16.code() as i64,
        Long = "LONG" => AitEnum::Int32.code() as i64,
        ULong = "ULONG" => AitEnum::Uint32.code() as i64,
        Float = "FLOAT" => AitEnum::Float32.code() as i64,
        Double = "DOUBLE" => AitEnum::Float64.code() as i64,
    }
}

host_enum! {
    /// EPICS alarm conditions.
    AlarmStatus as "Status" {
        NoAlarm = "NO_ALARM" => 0,
        Read = "READ" => 1,
        Write = "WRITE" => 2,
        HiHi = "HIHI" => 3,
        High = "HIGH" => 4,
        LoLo = "LOLO" => 5,
        Low = "LOW" => 6,
        State = "STATE" => 7,
        Cos = "COS" => 8,
        Comm = "COMM" => 9,
        Timeout = "TIMEOUT" => 10,
        HwLimit = "HWLIMIT" => 11,
        Calc = "CALC" => 12,
        Scan = "SCAN" => 13,
        Link = "LINK" => 14,
        Soft = "SOFT" => 15,
        BadSub = "BAD_SUB" => 16,
        Udf = "UDF" => 17,
        Disable = "DISABLE" => 18,
        Simm = "SIMM" => 19,
        ReadAccess = "READ_ACCESS" => 20,
        WriteAccess = "WRITE_ACCESS" => 21,
    }
}

host_enum! {
    AlarmSeverity as "Severity" {
        NoAlarm = "NO_ALARM" => 0,
        Minor = "MINOR" => 1,
        Major = "MAJOR" => 2,
        Invalid = "INVALID" => 3,
    }
}

host_enum! {
    /// Event categories. Codes are single bits; `LOG` is an alias of
    /// `ARCHIVE`.
    Events as "Events" {
        Value = "VALUE" => 1,
        Archive = "ARCHIVE" => 2,
        Alarm = "ALARM" => 4,
        Property = "PROPERTY" => 8,
    }
}

host_enum! {
    ExistsResponse as "ExistsResponse" {
        ExistsHere = "EXISTS_HERE" => 0,
        NotExistsHere = "NOT_EXISTS_HERE" => 1,
    }
}

host_enum! {
    AttachResponse as "AttachResponse" {
        NoMemory = "NO_MEMORY" => CaStatus::NoMemory.code() as i64,
        NotFound = "NOT_FOUND" => CaStatus::PvNotFound.code() as i64,
    }
}

impl FieldType {
    pub fn to_ait(self) -> AitEnum {
        match self {
            FieldType::String => AitEnum::String,
            FieldType::Enum => AitEnum::Enum16,
            FieldType::Char => AitEnum::Uint8,
            FieldType::Short => AitEnum::Int16,
            FieldType::UShort => AitEnum::Uint16,
            FieldType::Long => AitEnum::Int32,
            FieldType::ULong => AitEnum::Uint32,
            FieldType::Float => AitEnum::Float32,
            FieldType::Double => AitEnum::Float64,
        }
    }

    pub fn from_ait(ait: AitEnum) -> Result<Self, ConvertError> {
        Self::from_code(i64::from(ait.code()))
            .ok_or(ConvertError::UnsupportedNativeType(i64::from(ait.code())))
    }

    pub fn is_float(self) -> bool {
        matches!(self, FieldType::Float | FieldType::Double)
    }

    /// Numeric types other than `ENUM`, i.e. those with limits and units.
    pub fn is_numeric(self) -> bool {
        !matches!(self, FieldType::String | FieldType::Enum)
    }
}

impl Events {
    /// Name of the engine event this category maps to.
    pub fn engine_event(self) -> &'static str {
        use crate::engine::events::{ALARM_EVENT, LOG_EVENT, PROPERTY_EVENT, VALUE_EVENT};
        match self {
            Events::Value => VALUE_EVENT,
            Events::Archive => LOG_EVENT,
            Events::Alarm => ALARM_EVENT,
            Events::Property => PROPERTY_EVENT,
        }
    }

    /// Members whose bit is set in `bits`.
    pub fn from_bits(bits: i64) -> Vec<Events> {
        Self::MEMBERS
            .iter()
            .map(|(_, member)| *member)
            .filter(|member| bits & member.code() != 0)
            .collect()
    }
}

impl From<ExistsResponse> for PvExistReturn {
    fn from(response: ExistsResponse) -> Self {
        match response {
            ExistsResponse::ExistsHere => PvExistReturn::ExistsHere,
            ExistsResponse::NotExistsHere => PvExistReturn::DoesNotExistHere,
        }
    }
}

impl From<AttachResponse> for CaStatus {
    fn from(response: AttachResponse) -> Self {
        match response {
            AttachResponse::NoMemory => CaStatus::NoMemory,
            AttachResponse::NotFound => CaStatus::PvNotFound,
        }
    }
}

struct Family {
    canonical: Vec<(&'static str, i64)>,
    by_name: HashMap<&'static str, i64>,
}

impl Family {
    fn of<E: HostEnum>() -> (&'static str, Self) {
        let canonical: Vec<_> = E::MEMBERS.iter().map(|(n, m)| (*n, m.code())).collect();
        let by_name = canonical.iter().copied().collect();
        (E::FAMILY, Self { canonical, by_name })
    }

    fn alias(mut self, alias: &'static str, target: &str) -> Self {
        if let Some(code) = self.by_name.get(target).copied() {
            self.by_name.insert(alias, code);
        }
        self
    }
}

/// Lookup tables for every published enumeration family.
pub struct EnumRegistry {
    families: HashMap<&'static str, Family>,
}

impl EnumRegistry {
    fn build() -> Self {
        let (events, family) = Family::of::<Events>();
        let families = [
            Family::of::<FieldType>(),
            Family::of::<AlarmStatus>(),
            Family::of::<AlarmSeverity>(),
            (events, family.alias("LOG", "ARCHIVE")),
            Family::of::<ExistsResponse>(),
            Family::of::<AttachResponse>(),
        ]
        .into_iter()
        .collect();
        Self { families }
    }

    /// Native code of `symbol`.
    pub fn code(&self, symbol: &Symbol) -> Result<i64, ConvertError> {
        self.families
            .get(symbol.family())
            .and_then(|family| family.by_name.get(symbol.name()).copied())
            .ok_or_else(|| unknown(symbol.family(), symbol.name()))
    }

    /// Canonical symbol for `code` in `family`.
    pub fn symbol(&self, family: &str, code: i64) -> Option<Symbol> {
        let (family_name, members) = self.families.get_key_value(family)?;
        members
            .canonical
            .iter()
            .find(|(_, c)| *c == code)
            .map(|(name, _)| Symbol::new(*family_name, *name))
    }

    /// Canonical members of `family`, in code order.
    pub fn members(&self, family: &str) -> Vec<Symbol> {
        match self.families.get_key_value(family) {
            Some((name, f)) => f.canonical.iter().map(|(n, _)| Symbol::new(*name, *n)).collect(),
            None => Vec::new(),
        }
    }

    pub fn families(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.families.keys().copied()
    }
}

static REGISTRY: RwLock<Option<Arc<EnumRegistry>>> = const_rwlock(None);

/// Build and publish the registry. Publishing again is a no-op.
pub fn publish() -> Arc<EnumRegistry> {
    let mut slot = REGISTRY.write();
    if let Some(registry) = slot.as_ref() {
        return registry.clone();
    }
    let registry = Arc::new(EnumRegistry::build());
    debug!(families = registry.families.len(), "Enumeration registry published");
    *slot = Some(registry.clone());
    registry
}

/// Withdraw the registry. Holders of an `Arc` keep a usable copy.
pub fn clear() {
    if REGISTRY.write().take().is_some() {
        debug!("Enumeration registry cleared");
    }
}

pub fn is_published() -> bool {
    REGISTRY.read().is_some()
}

/// The published registry, publishing it on first use.
pub fn registry() -> Arc<EnumRegistry> {
    if let Some(registry) = REGISTRY.read().as_ref() {
        return registry.clone();
    }
    publish()
}

/// Native code of an enumeration symbol.
pub fn symbol_to_native_code(symbol: &Symbol) -> Result<i64, ConvertError> {
    registry().code(symbol)
}

/// Symbol for a native code. Element type codes outside the supported subset
/// fail with [`ConvertError::UnsupportedNativeType`].
pub fn native_code_to_symbol(family: &str, code: i64) -> Result<Symbol, ConvertError> {
    match registry().symbol(family, code) {
        Some(symbol) => Ok(symbol),
        None if family == FieldType::FAMILY => Err(ConvertError::UnsupportedNativeType(code)),
        None => Err(unknown(family, &code.to_string())),
    }
}
