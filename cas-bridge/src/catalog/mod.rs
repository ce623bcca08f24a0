//! PV Catalog - Attribute-Backed PVs and a Name Directory
//!
//! The bridge forwards engine callbacks to arbitrary handlers. The catalog
//! supplies the handlers most servers need:
//! - [`SimplePv`]: a PV that keeps its attributes in memory, clamps writes to
//!   its control limits, derives alarms from its warning and alarm limits and
//!   posts change events to subscribed clients
//! - [`PvDirectory`]: a [`ServerHandler`](crate::bridge::ServerHandler) that
//!   resolves names and aliases to PVs

pub mod directory;
pub mod simple;

use crate::bridge::convert;
use crate::bridge::{AlarmSeverity, AlarmStatus, FieldType, HostEnum};
use crate::engine::EpicsTime;
use crate::host::{Attributes, HostValue};

pub use directory::PvDirectory;
pub use simple::{PvOptions, SimplePv, WriteDecision, WriteHook};

/// Attributes of a freshly created PV.
///
/// The value is zero (or the empty string) and the alarm state is
/// `UDF`/`INVALID` until the first update. Numeric PVs also get an empty
/// unit and all-zero limits, floating point PVs a precision and `ENUM` PVs
/// a single empty state string.
pub fn default_attributes(field_type: FieldType, count: u32) -> Attributes {
    let mut attributes = Attributes::new();
    attributes.insert("status".into(), AlarmStatus::Udf.to_host());
    attributes.insert("severity".into(), AlarmSeverity::Invalid.to_host());
    attributes.insert("timestamp".into(), convert::timestamp_to_host(EpicsTime::now()));

    if field_type == FieldType::String {
        attributes.insert("value".into(), HostValue::Str(String::new()));
        return attributes;
    }

    let zero = if field_type.is_float() {
        HostValue::Float(0.0)
    } else {
        HostValue::Int(0)
    };
    let value = if count > 1 {
        HostValue::Seq(vec![zero; count as usize])
    } else {
        zero
    };
    attributes.insert("value".into(), value);
    if field_type.is_numeric() {
        attributes.insert("unit".into(), HostValue::Str(String::new()));
        for key in ["control_limits", "display_limits", "alarm_limits", "warning_limits"] {
            attributes.insert(key.into(), HostValue::Seq(vec![HostValue::Int(0), HostValue::Int(0)]));
        }
    }
    if field_type.is_float() {
        attributes.insert("precision".into(), HostValue::Int(0));
    }
    if field_type == FieldType::Enum {
        attributes.insert("enum_strings".into(), HostValue::Seq(vec![HostValue::Str(String::new())]));
    }
    attributes
}
