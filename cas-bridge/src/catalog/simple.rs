//! Attribute-backed PV
//!
//! A [`SimplePv`] stores its attributes behind a mutex and implements
//! [`PvHandler`] on top of them. Every update computes the events it causes;
//! they are posted once the update is complete and only while a client has
//! registered interest.

use std::fmt;
use std::sync::{Arc, OnceLock};

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, trace, warn};

use crate::bridge::convert;
use crate::bridge::{
    AlarmSeverity, AlarmStatus, AsyncWrite, ContextCapsule, Events, FieldType, HostEnum, Pv, PvHandler, WeakPv,
};
use crate::engine::EpicsTime;
use crate::error::{ConvertError, HandlerResult, Result};
use crate::host::{Attributes, HostValue};

use super::default_attributes;

/// Attributes that describe the PV rather than its current reading.
const META_KEYS: [&str; 7] = [
    "precision",
    "enum_strings",
    "unit",
    "control_limits",
    "display_limits",
    "alarm_limits",
    "warning_limits",
];

const RELATIVE_TOLERANCE: f64 = 1e-5;
const ABSOLUTE_TOLERANCE: f64 = 1e-8;

/// What to do with a client write.
#[derive(Debug)]
pub enum WriteDecision {
    /// Store the written value.
    Accept,
    /// Refuse the write; the PV is unchanged.
    Reject,
    /// Store this value instead.
    Replace(HostValue),
    /// Store the written value and report completion later through the
    /// token.
    Defer(AsyncWrite),
}

/// Inspects client writes before they are stored.
pub type WriteHook = Arc<dyn Fn(&HostValue, &ContextCapsule) -> WriteDecision + Send + Sync>;

/// Optional settings for [`SimplePv::with_options`].
#[derive(Clone, Default)]
pub struct PvOptions {
    /// Initial attributes, applied over [`default_attributes`].
    pub attributes: Attributes,
    /// Minimum change of a numeric value that fires a value event.
    pub value_deadband: f64,
    /// Minimum change of a numeric value that fires an archive event.
    pub archive_deadband: f64,
    pub write_hook: Option<WriteHook>,
}

impl fmt::Debug for PvOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PvOptions")
            .field("attributes", &self.attributes)
            .field("value_deadband", &self.value_deadband)
            .field("archive_deadband", &self.archive_deadband)
            .field("write_hook", &self.write_hook.is_some())
            .finish()
    }
}

#[derive(Default)]
struct State {
    attributes: Attributes,
    /// `Events` bits not yet posted.
    outstanding: i64,
    publish: bool,
}

struct Shared {
    field_type: FieldType,
    count: u32,
    value_deadband: f64,
    archive_deadband: f64,
    write_hook: Option<WriteHook>,
    state: Mutex<State>,
    pv: OnceLock<WeakPv>,
}

impl Shared {
    /// Check `incoming` against the current attributes and normalise it.
    ///
    /// Status and severity become symbols, string values become `str`, and
    /// keys the PV does not know are dropped. The merged attribute set, with
    /// its value clamped to the control limits, must convert to the PV's type.
    fn prepare(&self, state: &State, incoming: Attributes) -> Result<Attributes> {
        let mut prepared = Attributes::new();
        for (key, value) in incoming {
            let value = match key.as_str() {
                "status" => AlarmStatus::from_host(&value)?.to_host(),
                "severity" => AlarmSeverity::from_host(&value)?.to_host(),
                "timestamp" => convert::timestamp_to_host(convert::timestamp_from_host(&value)?),
                "value" => self.normalize_value(value),
                known if META_KEYS.contains(&known) => value,
                _ => {
                    debug!(key = %key, "Ignoring unknown attribute");
                    continue;
                }
            };
            prepared.insert(key, value);
        }

        let mut merged = state.attributes.clone();
        merged.extend(prepared.iter().map(|(k, v)| (k.clone(), v.clone())));
        if let Some(value) = merged.remove("value") {
            let value = self.constrain(&merged, value);
            merged.insert("value".to_owned(), value);
        }
        convert::attributes_to_value(&merged, self.field_type)?;
        Ok(prepared)
    }

    fn normalize_value(&self, value: HostValue) -> HostValue {
        if self.field_type != FieldType::String {
            return value;
        }
        match value {
            HostValue::Bytes(bytes) => HostValue::Str(String::from_utf8_lossy(&bytes).into_owned()),
            HostValue::Seq(items) => HostValue::Seq(items.into_iter().map(|v| self.normalize_value(v)).collect()),
            other => other,
        }
    }

    fn update_attributes(&self, state: &mut State, mut incoming: Attributes) {
        let mut limits_changed = false;
        for key in META_KEYS {
            let Some(value) = incoming.remove(key) else {
                continue;
            };
            if state.attributes.get(key) != Some(&value) {
                state.attributes.insert(key.to_owned(), value);
                state.outstanding |= Events::Property.code();
                limits_changed |= key.ends_with("_limits");
            }
        }

        // Status and severity go first so a value update can override them.
        let status = incoming.remove("status");
        let severity = incoming.remove("severity");
        if status.is_some() || severity.is_some() {
            let status = status.or_else(|| state.attributes.get("status").cloned());
            let severity = severity.or_else(|| state.attributes.get("severity").cloned());
            update_status_severity(state, status.unwrap_or_default(), severity.unwrap_or_default());
        }

        if let Some(timestamp) = incoming.remove("timestamp") {
            state.attributes.insert("timestamp".to_owned(), timestamp);
        }

        match incoming.remove("value") {
            Some(value) => self.update_value(state, value),
            None if limits_changed => {
                let current = state.attributes.get("value").cloned().unwrap_or_default();
                self.update_value(state, current);
            }
            None => {}
        }
    }

    fn update_value(&self, state: &mut State, value: HostValue) {
        let value = self.constrain(&state.attributes, value);
        let (status, severity) = self.alarm_state(&state.attributes, &value);

        let old = state.attributes.get("value").cloned().unwrap_or_default();
        if self.value_changed(&old, &value) {
            if self.field_type.is_numeric() {
                let diff = max_difference(&old, &value);
                if diff >= self.value_deadband {
                    state.outstanding |= Events::Value.code();
                }
                if diff >= self.archive_deadband {
                    state.outstanding |= Events::Archive.code();
                }
            } else {
                state.outstanding |= Events::Value.code() | Events::Archive.code();
            }
            state.attributes.insert("value".to_owned(), value);
        }
        update_status_severity(state, status.to_host(), severity.to_host());
    }

    /// Clamp to the control limits when they describe a non-empty range.
    fn constrain(&self, attributes: &Attributes, value: HostValue) -> HostValue {
        if self.field_type == FieldType::String {
            return value;
        }
        let Some((lower, upper)) = limit_range(attributes.get("control_limits")) else {
            return value;
        };
        let integral = !self.field_type.is_float();
        let clamp = |element: HostValue| -> HostValue {
            let Some(number) = as_number(&element) else {
                return element;
            };
            if number < lower {
                limit_value(lower.ceil(), lower, integral)
            } else if number > upper {
                limit_value(upper.floor(), upper, integral)
            } else {
                element
            }
        };
        match value {
            HostValue::Seq(items) => HostValue::Seq(items.into_iter().map(clamp).collect()),
            scalar => clamp(scalar),
        }
    }

    /// Alarm state implied by the warning and alarm limits. For arrays the
    /// extreme elements are checked; when both sides of a range are violated
    /// the larger violation wins.
    fn alarm_state(&self, attributes: &Attributes, value: &HostValue) -> (AlarmStatus, AlarmSeverity) {
        let mut state = (AlarmStatus::NoAlarm, AlarmSeverity::NoAlarm);
        if self.field_type == FieldType::String {
            return state;
        }
        let Some(numbers) = as_numbers(value).filter(|n| !n.is_empty()) else {
            return state;
        };
        let lowest = numbers.iter().copied().fold(f64::INFINITY, f64::min);
        let highest = numbers.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        let checks = [
            ("warning_limits", AlarmSeverity::Minor, AlarmStatus::Low, AlarmStatus::High),
            ("alarm_limits", AlarmSeverity::Major, AlarmStatus::LoLo, AlarmStatus::HiHi),
        ];
        for (key, severity, low, high) in checks {
            let Some((lower, upper)) = limit_range(attributes.get(key)) else {
                continue;
            };
            let below = lowest < lower;
            let above = highest > upper;
            let status = match (below, above) {
                (true, true) if (lowest - lower).abs() > (highest - upper).abs() => Some(low),
                (true, true) => Some(high),
                (true, false) => Some(low),
                (false, true) => Some(high),
                (false, false) => None,
            };
            if let Some(status) = status {
                state = (status, severity);
            }
        }
        state
    }

    fn value_changed(&self, old: &HostValue, new: &HostValue) -> bool {
        if !self.field_type.is_float() {
            return old != new;
        }
        match (as_numbers(old), as_numbers(new)) {
            (Some(old), Some(new)) if old.len() == new.len() => {
                !old.iter().zip(&new).all(|(a, b)| is_close(*a, *b))
            }
            _ => old != new,
        }
    }

    /// Hand the outstanding events to the engine. Releases the state lock
    /// before posting, so handlers called back by the engine can take it.
    fn publish(&self, mut state: MutexGuard<'_, State>) {
        let events = std::mem::take(&mut state.outstanding);
        if !state.publish || events == 0 {
            return;
        }
        let snapshot = state.attributes.clone();
        drop(state);

        let Some(pv) = self.pv.get().and_then(WeakPv::upgrade) else {
            return;
        };
        match pv.post_event(&HostValue::Int(events), &snapshot) {
            Ok(delivered) => trace!(pv = pv.name(), events, delivered, "Published events"),
            Err(err) => warn!(pv = pv.name(), error = %err, "Failed to publish events"),
        }
    }

    fn apply(&self, attributes: Attributes) -> Result<()> {
        let mut state = self.state.lock();
        let prepared = self.prepare(&state, attributes)?;
        self.update_attributes(&mut state, prepared);
        self.publish(state);
        Ok(())
    }
}

fn update_status_severity(state: &mut State, status: HostValue, severity: HostValue) {
    let mut changed = false;
    if state.attributes.get("status") != Some(&status) {
        state.attributes.insert("status".to_owned(), status);
        changed = true;
    }
    if state.attributes.get("severity") != Some(&severity) {
        state.attributes.insert("severity".to_owned(), severity);
        changed = true;
    }
    if changed {
        state.outstanding |= Events::Alarm.code();
    }
}

fn as_number(value: &HostValue) -> Option<f64> {
    match value {
        HostValue::Int(i) => Some(*i as f64),
        HostValue::Float(f) => Some(*f),
        HostValue::Bool(b) => Some(f64::from(u8::from(*b))),
        _ => None,
    }
}

fn as_numbers(value: &HostValue) -> Option<Vec<f64>> {
    match value {
        HostValue::Seq(items) => items.iter().map(as_number).collect(),
        scalar => as_number(scalar).map(|n| vec![n]),
    }
}

/// `(lower, upper)` of a limits attribute, if it describes a non-empty range.
fn limit_range(limits: Option<&HostValue>) -> Option<(f64, f64)> {
    match limits? {
        HostValue::Seq(pair) if pair.len() == 2 => {
            let lower = as_number(&pair[0])?;
            let upper = as_number(&pair[1])?;
            (lower < upper).then_some((lower, upper))
        }
        _ => None,
    }
}

fn limit_value(rounded: f64, exact: f64, integral: bool) -> HostValue {
    if integral {
        HostValue::Int(rounded as i64)
    } else {
        HostValue::Float(exact)
    }
}

fn is_close(a: f64, b: f64) -> bool {
    if a == b {
        return true;
    }
    let tolerance = (RELATIVE_TOLERANCE * a.abs().max(b.abs())).max(ABSOLUTE_TOLERANCE);
    (a - b).abs() <= tolerance
}

/// Largest element-wise difference. Unknown shapes count as an unbounded
/// change.
fn max_difference(old: &HostValue, new: &HostValue) -> f64 {
    match (as_numbers(old), as_numbers(new)) {
        (Some(old), Some(new)) if old.len() == new.len() => old
            .iter()
            .zip(&new)
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f64::max),
        _ => f64::INFINITY,
    }
}

struct SimpleHandler {
    shared: Arc<Shared>,
}

impl PvHandler for SimpleHandler {
    fn field_type(&self) -> HandlerResult<HostValue> {
        Ok(self.shared.field_type.to_host())
    }

    fn count(&self) -> HandlerResult<HostValue> {
        Ok(HostValue::Int(i64::from(self.shared.count)))
    }

    fn read(&self) -> HandlerResult<HostValue> {
        Ok(HostValue::Map(self.shared.state.lock().attributes.clone()))
    }

    fn write(&self, value: &HostValue, timestamp: &HostValue, context: &ContextCapsule) -> HandlerResult<HostValue> {
        let mut deferred = None;
        let value = match self.shared.write_hook.as_ref().map(|hook| hook(value, context)) {
            None | Some(WriteDecision::Accept) => value.clone(),
            Some(WriteDecision::Reject) => return Ok(HostValue::Bool(false)),
            Some(WriteDecision::Replace(replacement)) => replacement,
            Some(WriteDecision::Defer(token)) => {
                deferred = Some(token);
                value.clone()
            }
        };
        let timestamp = match convert::timestamp_from_host(timestamp) {
            Ok(time) if time.sec != 0 => time,
            _ => EpicsTime::now(),
        };

        let update = Attributes::from([
            ("value".to_owned(), value),
            ("timestamp".to_owned(), convert::timestamp_to_host(timestamp)),
        ]);
        match self.shared.apply(update) {
            Ok(()) => Ok(deferred.map_or(HostValue::Bool(true), HostValue::from)),
            Err(err) => {
                debug!(error = %err, "Write rejected");
                Ok(HostValue::Bool(false))
            }
        }
    }

    fn interest_register(&self) -> HandlerResult<HostValue> {
        self.shared.state.lock().publish = true;
        Ok(HostValue::Bool(true))
    }

    fn interest_delete(&self) -> HandlerResult<()> {
        self.shared.state.lock().publish = false;
        Ok(())
    }
}

/// A PV whose attributes live in memory.
///
/// Cloning yields another handle on the same PV.
#[derive(Clone)]
pub struct SimplePv {
    pv: Pv,
    shared: Arc<Shared>,
}

impl SimplePv {
    pub fn new(name: impl Into<String>, field_type: FieldType, count: u32) -> Result<Self> {
        Self::with_options(name, field_type, count, PvOptions::default())
    }

    pub fn with_options(name: impl Into<String>, field_type: FieldType, count: u32, options: PvOptions) -> Result<Self> {
        if count == 0 {
            return Err(ConvertError::mismatch("count", "positive element count", "0").into());
        }
        let shared = Arc::new(Shared {
            field_type,
            count,
            value_deadband: options.value_deadband,
            archive_deadband: options.archive_deadband,
            write_hook: options.write_hook,
            state: Mutex::new(State {
                attributes: default_attributes(field_type, count),
                ..State::default()
            }),
            pv: OnceLock::new(),
        });
        if !options.attributes.is_empty() {
            let mut state = shared.state.lock();
            let prepared = shared.prepare(&state, options.attributes)?;
            shared.update_attributes(&mut state, prepared);
        }

        let pv = Pv::new(name, Arc::new(SimpleHandler { shared: shared.clone() }))?;
        // Freshly created, so the cell is empty.
        let _ = shared.pv.set(pv.downgrade());
        debug!(pv = pv.name(), kind = field_type.name(), count, "Created PV");
        Ok(Self { pv, shared })
    }

    /// The bridged PV, for handing to a server.
    pub fn pv(&self) -> &Pv {
        &self.pv
    }

    pub fn name(&self) -> &str {
        self.pv.name()
    }

    pub fn field_type(&self) -> FieldType {
        self.shared.field_type
    }

    pub fn count(&self) -> u32 {
        self.shared.count
    }

    /// Snapshot of all attributes.
    pub fn attributes(&self) -> Attributes {
        self.shared.state.lock().attributes.clone()
    }

    pub fn attribute(&self, key: &str) -> Option<HostValue> {
        self.shared.state.lock().attributes.get(key).cloned()
    }

    pub fn value(&self) -> HostValue {
        self.attribute("value").unwrap_or_default()
    }

    pub fn timestamp(&self) -> Option<EpicsTime> {
        self.attribute("timestamp")
            .and_then(|t| convert::timestamp_from_host(&t).ok())
    }

    pub fn status(&self) -> AlarmStatus {
        self.attribute("status")
            .and_then(|s| AlarmStatus::from_host(&s).ok())
            .unwrap_or(AlarmStatus::Udf)
    }

    pub fn severity(&self) -> AlarmSeverity {
        self.attribute("severity")
            .and_then(|s| AlarmSeverity::from_host(&s).ok())
            .unwrap_or(AlarmSeverity::Invalid)
    }

    /// Whether a client currently subscribes to the PV.
    pub fn is_publishing(&self) -> bool {
        self.shared.state.lock().publish
    }

    /// Store a new value stamped with the current time.
    pub fn set_value(&self, value: impl Into<HostValue>) -> Result<()> {
        self.set_value_timestamp(value, EpicsTime::now())
    }

    pub fn set_value_timestamp(&self, value: impl Into<HostValue>, timestamp: EpicsTime) -> Result<()> {
        self.shared.apply(Attributes::from([
            ("value".to_owned(), value.into()),
            ("timestamp".to_owned(), convert::timestamp_to_host(timestamp)),
        ]))
    }

    pub fn set_status_severity(&self, status: AlarmStatus, severity: AlarmSeverity) -> Result<()> {
        self.shared.apply(Attributes::from([
            ("status".to_owned(), status.to_host()),
            ("severity".to_owned(), severity.to_host()),
        ]))
    }

    pub fn set_attribute(&self, key: &str, value: impl Into<HostValue>) -> Result<()> {
        self.set_attributes(Attributes::from([(key.to_owned(), value.into())]))
    }

    /// Update several attributes at once. Nothing changes if any of them is
    /// invalid for the PV's type.
    pub fn set_attributes(&self, attributes: Attributes) -> Result<()> {
        self.shared.apply(attributes)
    }
}

impl fmt::Debug for SimplePv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimplePv")
            .field("name", &self.pv.name())
            .field("type", &self.shared.field_type)
            .field("count", &self.shared.count)
            .finish()
    }
}

impl From<SimplePv> for HostValue {
    fn from(pv: SimplePv) -> Self {
        HostValue::Pv(pv.pv)
    }
}

impl From<&SimplePv> for Pv {
    fn from(pv: &SimplePv) -> Self {
        pv.pv.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BridgeError;

    fn limits(lower: i64, upper: i64) -> HostValue {
        HostValue::Seq(vec![HostValue::Int(lower), HostValue::Int(upper)])
    }

    fn take_outstanding(pv: &SimplePv) -> i64 {
        std::mem::take(&mut pv.shared.state.lock().outstanding)
    }

    #[test]
    fn test_new_pv_is_undefined() {
        let pv = SimplePv::new("SIM:NEW", FieldType::Double, 1).unwrap();
        assert_eq!(pv.value(), HostValue::Float(0.0));
        assert_eq!(pv.status(), AlarmStatus::Udf);
        assert_eq!(pv.severity(), AlarmSeverity::Invalid);
        assert!(!pv.is_publishing());
        assert!(SimplePv::new("SIM:EMPTY", FieldType::Double, 0).is_err());
    }

    #[test]
    fn test_value_update_clears_alarm() {
        let pv = SimplePv::new("SIM:VALUE", FieldType::Long, 1).unwrap();
        take_outstanding(&pv);
        pv.set_value(5i64).unwrap();
        assert_eq!(pv.value(), HostValue::Int(5));
        assert_eq!(pv.status(), AlarmStatus::NoAlarm);
        assert_eq!(pv.severity(), AlarmSeverity::NoAlarm);
    }

    #[test]
    fn test_control_limits_clamp() {
        let options = PvOptions {
            attributes: Attributes::from([("control_limits".to_owned(), limits(-10, 10))]),
            ..PvOptions::default()
        };
        let pv = SimplePv::with_options("SIM:CLAMP", FieldType::Long, 1, options).unwrap();
        pv.set_value(42i64).unwrap();
        assert_eq!(pv.value(), HostValue::Int(10));
        pv.set_value(-42i64).unwrap();
        assert_eq!(pv.value(), HostValue::Int(-10));
    }

    #[test]
    fn test_clamp_applies_before_range_check() {
        let options = PvOptions {
            attributes: Attributes::from([("control_limits".to_owned(), limits(0, 100))]),
            ..PvOptions::default()
        };
        let pv = SimplePv::with_options("SIM:SHORT:CLAMP", FieldType::Short, 1, options).unwrap();
        pv.set_value(70_000i64).unwrap();
        assert_eq!(pv.value(), HostValue::Int(100));

        // New limits in the same update clamp the new value.
        pv.set_attributes(Attributes::from([
            ("value".to_owned(), HostValue::Int(-70_000)),
            ("control_limits".to_owned(), limits(-20, 20)),
        ]))
        .unwrap();
        assert_eq!(pv.value(), HostValue::Int(-20));
    }

    #[test]
    fn test_alarm_limits_set_status() {
        let options = PvOptions {
            attributes: Attributes::from([
                ("warning_limits".to_owned(), limits(-5, 5)),
                ("alarm_limits".to_owned(), limits(-10, 10)),
            ]),
            ..PvOptions::default()
        };
        let pv = SimplePv::with_options("SIM:ALARM", FieldType::Double, 1, options).unwrap();

        pv.set_value(7.0).unwrap();
        assert_eq!((pv.status(), pv.severity()), (AlarmStatus::High, AlarmSeverity::Minor));
        pv.set_value(-12.0).unwrap();
        assert_eq!((pv.status(), pv.severity()), (AlarmStatus::LoLo, AlarmSeverity::Major));
        pv.set_value(0.0).unwrap();
        assert_eq!((pv.status(), pv.severity()), (AlarmStatus::NoAlarm, AlarmSeverity::NoAlarm));
    }

    #[test]
    fn test_array_alarm_uses_larger_violation() {
        let options = PvOptions {
            attributes: Attributes::from([("warning_limits".to_owned(), limits(0, 10))]),
            ..PvOptions::default()
        };
        let pv = SimplePv::with_options("SIM:ARRAY", FieldType::Long, 2, options).unwrap();
        pv.set_value(HostValue::Seq(vec![HostValue::Int(-1), HostValue::Int(20)]))
            .unwrap();
        assert_eq!(pv.status(), AlarmStatus::High);
        pv.set_value(HostValue::Seq(vec![HostValue::Int(-30), HostValue::Int(11)]))
            .unwrap();
        assert_eq!(pv.status(), AlarmStatus::Low);
    }

    #[test]
    fn test_deadbands_select_events() {
        let options = PvOptions {
            value_deadband: 1.0,
            archive_deadband: 5.0,
            ..PvOptions::default()
        };
        let pv = SimplePv::with_options("SIM:DEADBAND", FieldType::Double, 1, options).unwrap();
        pv.set_value(0.0).unwrap();
        take_outstanding(&pv);

        pv.shared.update_value(&mut pv.shared.state.lock(), HostValue::Float(0.5));
        assert_eq!(take_outstanding(&pv), 0);

        pv.shared.update_value(&mut pv.shared.state.lock(), HostValue::Float(2.0));
        assert_eq!(take_outstanding(&pv), Events::Value.code());

        pv.shared.update_value(&mut pv.shared.state.lock(), HostValue::Float(10.0));
        assert_eq!(take_outstanding(&pv), Events::Value.code() | Events::Archive.code());
    }

    #[test]
    fn test_float_noise_is_not_a_change() {
        let pv = SimplePv::new("SIM:NOISE", FieldType::Double, 1).unwrap();
        pv.set_value(1.0).unwrap();
        take_outstanding(&pv);
        pv.shared.update_value(&mut pv.shared.state.lock(), HostValue::Float(1.0 + 1e-9));
        assert_eq!(take_outstanding(&pv), 0);
        assert_eq!(pv.value(), HostValue::Float(1.0));
    }

    #[test]
    fn test_property_change_fires_property_event() {
        let pv = SimplePv::new("SIM:UNIT", FieldType::Double, 1).unwrap();
        take_outstanding(&pv);
        pv.shared
            .update_attributes(&mut pv.shared.state.lock(), Attributes::from([("unit".to_owned(), "mm".into())]));
        assert_eq!(take_outstanding(&pv), Events::Property.code());
    }

    #[test]
    fn test_invalid_update_changes_nothing() {
        let pv = SimplePv::new("SIM:SHORT", FieldType::Short, 1).unwrap();
        pv.set_value(3i64).unwrap();
        let err = pv
            .set_attributes(Attributes::from([
                ("value".to_owned(), HostValue::Int(70_000)),
                ("unit".to_owned(), "V".into()),
            ]))
            .unwrap_err();
        assert!(matches!(err, BridgeError::Convert(ConvertError::TypeMismatch { .. })));
        assert_eq!(pv.value(), HostValue::Int(3));
        assert_eq!(pv.attribute("unit"), Some(HostValue::Str(String::new())));
    }

    #[test]
    fn test_status_accepts_names() {
        let pv = SimplePv::new("SIM:STATUS", FieldType::String, 1).unwrap();
        pv.set_attributes(Attributes::from([
            ("status".to_owned(), "COMM".into()),
            ("severity".to_owned(), AlarmSeverity::Major.to_host()),
        ]))
        .unwrap();
        assert_eq!((pv.status(), pv.severity()), (AlarmStatus::Comm, AlarmSeverity::Major));
        assert!(pv.set_attribute("status", "NOT_A_STATUS").is_err());
    }

    #[test]
    fn test_string_write_decodes_bytes() {
        let pv = SimplePv::new("SIM:TEXT", FieldType::String, 1).unwrap();
        pv.set_value(HostValue::Bytes(b"hello".to_vec())).unwrap();
        assert_eq!(pv.value(), HostValue::Str("hello".into()));
    }

    #[test]
    fn test_interest_toggles_publishing() {
        let pv = SimplePv::new("SIM:INTEREST", FieldType::Double, 1).unwrap();
        let handler = pv.pv().handler().clone();
        assert_eq!(handler.interest_register(), Ok(HostValue::Bool(true)));
        assert!(pv.is_publishing());
        handler.interest_delete().unwrap();
        assert!(!pv.is_publishing());
    }

    #[test]
    fn test_publish_without_server_is_harmless() {
        let pv = SimplePv::new("SIM:DETACHED", FieldType::Double, 1).unwrap();
        pv.shared.state.lock().publish = true;
        pv.set_value(1.5).unwrap();
        assert_eq!(pv.value(), HostValue::Float(1.5));
        assert_eq!(pv.shared.state.lock().outstanding, 0);
    }
}
