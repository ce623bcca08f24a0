//! Conversion between host attribute mappings and engine values
//!
//! All functions here are pure: they allocate what they return and have no
//! other effect. Integer coercion is range-checked against the declared
//! element type and never wraps.

use tracing::trace;

use crate::engine::{CasEventMask, EpicsTime, EventVocabulary, Gdd, GddData, Limits};
use crate::error::ConvertError;
use crate::host::{Attributes, HostValue};

use super::symbols::{AlarmSeverity, AlarmStatus, Events, FieldType, HostEnum};

pub use super::symbols::{native_code_to_symbol, symbol_to_native_code};

/// Exported shape for an element count: `(max_dimension, max_bound)`.
///
/// Counts above one are exported as a single dimension.
pub fn dimensions(count: u32) -> (u32, u32) {
    (u32::from(count > 1), count)
}

/// Build an engine value of the declared type from a handler's attributes.
pub fn attributes_to_value(attrs: &Attributes, declared: FieldType) -> Result<Gdd, ConvertError> {
    let value = match attrs.get("value") {
        None | Some(HostValue::None) => return Err(ConvertError::MissingValue),
        Some(value) => value,
    };

    let mut gdd = Gdd::new(declared.to_ait());
    match value {
        HostValue::Seq(items) => gdd.set_array(elements(items, declared)?),
        scalar => gdd.set_scalar(elements(std::slice::from_ref(scalar), declared)?),
    }

    if let Some(status) = present(attrs, "status") {
        gdd.status = AlarmStatus::from_host(status)?.code() as u16;
    }
    if let Some(severity) = present(attrs, "severity") {
        gdd.severity = AlarmSeverity::from_host(severity)?.code() as u16;
    }
    if let Some(timestamp) = present(attrs, "timestamp") {
        gdd.timestamp = timestamp_from_host(timestamp)?;
    }
    if let Some(strings) = present(attrs, "enum_strings") {
        gdd.enum_strings = Some(string_list("enum_strings", strings)?);
    }
    check_enum_indices(&gdd)?;
    if let Some(unit) = present(attrs, "unit") {
        gdd.units = Some(text("unit", unit)?);
    }
    if let Some(precision) = present(attrs, "precision") {
        gdd.precision = Some(int_in::<i16>("precision", precision, "16-bit integer")?);
    }
    gdd.display_limits = limits(attrs, "display_limits")?;
    gdd.control_limits = limits(attrs, "control_limits")?;
    gdd.warning_limits = limits(attrs, "warning_limits")?;
    gdd.alarm_limits = limits(attrs, "alarm_limits")?;

    trace!(kind = ?declared, elements = gdd.data().map_or(0, GddData::len), "Converted attributes");
    Ok(gdd)
}

/// Reconstruct `value` and `timestamp` attributes from an engine value.
pub fn value_to_attributes(gdd: &Gdd) -> Result<Attributes, ConvertError> {
    let data = gdd.data().ok_or(ConvertError::MissingValue)?;
    let mut items: Vec<HostValue> = match data {
        GddData::Uint8(v) => v.iter().map(|x| HostValue::Int(i64::from(*x))).collect(),
        GddData::Int16(v) => v.iter().map(|x| HostValue::Int(i64::from(*x))).collect(),
        GddData::Uint16(v) | GddData::Enum16(v) => {
            v.iter().map(|x| HostValue::Int(i64::from(*x))).collect()
        }
        GddData::Int32(v) => v.iter().map(|x| HostValue::Int(i64::from(*x))).collect(),
        GddData::Uint32(v) => v.iter().map(|x| HostValue::Int(i64::from(*x))).collect(),
        GddData::Float32(v) => v.iter().map(|x| HostValue::Float(f64::from(*x))).collect(),
        GddData::Float64(v) => v.iter().map(|x| HostValue::Float(*x)).collect(),
        GddData::String(v) => v.iter().map(|x| HostValue::Bytes(x.clone())).collect(),
    };

    let value = if gdd.is_scalar() {
        items.pop().ok_or(ConvertError::MissingValue)?
    } else {
        HostValue::Seq(items)
    };

    let mut attrs = Attributes::new();
    attrs.insert("value".to_owned(), value);
    attrs.insert("timestamp".to_owned(), timestamp_to_host(gdd.timestamp));
    Ok(attrs)
}

/// `(seconds, nanoseconds)` relative to the EPICS epoch.
pub fn timestamp_to_host(time: EpicsTime) -> HostValue {
    HostValue::Seq(vec![
        HostValue::Int(i64::from(time.sec)),
        HostValue::Int(i64::from(time.nsec)),
    ])
}

pub fn timestamp_from_host(value: &HostValue) -> Result<EpicsTime, ConvertError> {
    match value {
        HostValue::Seq(parts) if parts.len() == 2 => {
            let sec = int_in::<u32>("timestamp", &parts[0], "seconds since 1990")?;
            let nsec = int_in::<u32>("timestamp", &parts[1], "nanoseconds")?;
            if nsec >= 1_000_000_000 {
                return Err(ConvertError::mismatch("timestamp", "nanoseconds", nsec.to_string()));
            }
            Ok(EpicsTime::new(sec, nsec))
        }
        other => Err(ConvertError::mismatch("timestamp", "(seconds, nanoseconds)", describe(other))),
    }
}

/// Resolve host event designators to an engine mask.
///
/// Accepts an `Events` symbol or member name, a sequence of those, or an
/// integer bit set of `Events` codes. A designator that selects nothing is
/// an error.
pub fn event_mask(events: &HostValue, vocabulary: &EventVocabulary) -> Result<CasEventMask, ConvertError> {
    let selected = match events {
        HostValue::Seq(items) => {
            let mut selected = Vec::with_capacity(items.len());
            for item in items {
                selected.extend(event_members(item)?);
            }
            selected
        }
        single => event_members(single)?,
    };

    let mut mask = CasEventMask::empty();
    for event in selected {
        let name = event.engine_event();
        mask |= vocabulary.mask(name).ok_or_else(|| ConvertError::UnknownEnumValue {
            family: Events::FAMILY.to_owned(),
            name: name.to_owned(),
        })?;
    }
    if mask.is_empty() {
        return Err(ConvertError::EmptyEventMask);
    }
    Ok(mask)
}

fn event_members(value: &HostValue) -> Result<Vec<Events>, ConvertError> {
    match value {
        HostValue::Int(bits) => {
            let known = Events::MEMBERS.iter().fold(0, |acc, (_, e)| acc | e.code());
            if *bits < 0 || bits & !known != 0 {
                return Err(ConvertError::mismatch("events", "Events bit set", bits.to_string()));
            }
            Ok(Events::from_bits(*bits))
        }
        HostValue::Symbol(_) | HostValue::Str(_) => Ok(vec![Events::from_host(value)?]),
        other => Err(ConvertError::mismatch("events", "Events", other.kind())),
    }
}

fn present<'a>(attrs: &'a Attributes, key: &str) -> Option<&'a HostValue> {
    attrs.get(key).filter(|v| !v.is_none())
}

fn describe(value: &HostValue) -> String {
    match value {
        HostValue::Int(i) => i.to_string(),
        HostValue::Float(f) => f.to_string(),
        other => other.kind().to_owned(),
    }
}

fn int_in<T: TryFrom<i64>>(field: &'static str, value: &HostValue, expected: &'static str) -> Result<T, ConvertError> {
    let raw = match value {
        HostValue::Int(i) => *i,
        HostValue::Bool(b) => i64::from(*b),
        other => return Err(ConvertError::mismatch(field, expected, describe(other))),
    };
    T::try_from(raw).map_err(|_| ConvertError::mismatch(field, expected, raw.to_string()))
}

fn float(field: &'static str, value: &HostValue) -> Result<f64, ConvertError> {
    match value {
        HostValue::Float(f) => Ok(*f),
        HostValue::Int(i) => Ok(*i as f64),
        HostValue::Bool(b) => Ok(f64::from(u8::from(*b))),
        other => Err(ConvertError::mismatch(field, "number", describe(other))),
    }
}

fn float32(field: &'static str, value: &HostValue) -> Result<f32, ConvertError> {
    let wide = float(field, value)?;
    if wide.is_finite() && wide.abs() > f64::from(f32::MAX) {
        return Err(ConvertError::mismatch(field, "32-bit float", wide.to_string()));
    }
    Ok(wide as f32)
}

fn text(field: &'static str, value: &HostValue) -> Result<Vec<u8>, ConvertError> {
    match value {
        HostValue::Bytes(b) => Ok(b.clone()),
        HostValue::Str(s) => Ok(s.as_bytes().to_vec()),
        other => Err(ConvertError::mismatch(field, "string", describe(other))),
    }
}

fn string_list(field: &'static str, value: &HostValue) -> Result<Vec<Vec<u8>>, ConvertError> {
    match value {
        HostValue::Seq(items) => items.iter().map(|item| text(field, item)).collect(),
        other => Err(ConvertError::mismatch(field, "sequence of strings", describe(other))),
    }
}

fn limits(attrs: &Attributes, field: &'static str) -> Result<Option<Limits>, ConvertError> {
    match present(attrs, field) {
        None => Ok(None),
        Some(HostValue::Seq(pair)) if pair.len() == 2 => Ok(Some(Limits {
            lower: float(field, &pair[0])?,
            upper: float(field, &pair[1])?,
        })),
        Some(other) => Err(ConvertError::mismatch(field, "(lower, upper)", describe(other))),
    }
}

/// ENUM indices must name one of the state strings, when any are given.
fn check_enum_indices(gdd: &Gdd) -> Result<(), ConvertError> {
    let (Some(strings), Some(GddData::Enum16(indices))) = (&gdd.enum_strings, gdd.data()) else {
        return Ok(());
    };
    if strings.is_empty() {
        return Ok(());
    }
    match indices.iter().find(|index| usize::from(**index) >= strings.len()) {
        Some(index) => Err(ConvertError::mismatch(
            "value",
            "index into enum_strings",
            index.to_string(),
        )),
        None => Ok(()),
    }
}

fn elements(items: &[HostValue], declared: FieldType) -> Result<GddData, ConvertError> {
    const FIELD: &str = "value";
    fn each<T>(items: &[HostValue], f: impl Fn(&HostValue) -> Result<T, ConvertError>) -> Result<Vec<T>, ConvertError> {
        items.iter().map(f).collect()
    }

    Ok(match declared {
        FieldType::String => GddData::String(each(items, |v| text(FIELD, v))?),
        FieldType::Enum => GddData::Enum16(each(items, |v| int_in(FIELD, v, "enum index"))?),
        FieldType::Char => GddData::Uint8(each(items, |v| int_in(FIELD, v, "8-bit unsigned integer"))?),
        FieldType::Short => GddData::Int16(each(items, |v| int_in(FIELD, v, "16-bit integer"))?),
        FieldType::UShort => GddData::Uint16(each(items, |v| int_in(FIELD, v, "16-bit unsigned integer"))?),
        FieldType::Long => GddData::Int32(each(items, |v| int_in(FIELD, v, "32-bit integer"))?),
        FieldType::ULong => GddData::Uint32(each(items, |v| int_in(FIELD, v, "32-bit unsigned integer"))?),
        FieldType::Float => GddData::Float32(each(items, |v| float32(FIELD, v))?),
        FieldType::Double => GddData::Float64(each(items, |v| float(FIELD, v))?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::AitEnum;

    fn attrs(entries: Vec<(&str, HostValue)>) -> Attributes {
        entries.into_iter().map(|(k, v)| (k.to_owned(), v)).collect()
    }

    #[test]
    fn test_ushort_scalar_with_alarm_fields() {
        let input = attrs(vec![
            ("value", HostValue::Int(42)),
            ("status", AlarmStatus::NoAlarm.to_host()),
            ("severity", AlarmSeverity::NoAlarm.to_host()),
        ]);
        let gdd = attributes_to_value(&input, FieldType::UShort).unwrap();
        assert_eq!(gdd.primitive(), AitEnum::Uint16);
        assert!(gdd.is_scalar());
        assert_eq!(gdd.data(), Some(&GddData::Uint16(vec![42])));
        assert_eq!((gdd.status, gdd.severity), (0, 0));
    }

    #[test]
    fn test_out_of_range_is_rejected() {
        let input = attrs(vec![("value", HostValue::Int(70_000))]);
        let err = attributes_to_value(&input, FieldType::Short).unwrap_err();
        assert!(matches!(err, ConvertError::TypeMismatch { field: "value", .. }));

        let input = attrs(vec![("value", HostValue::Int(-1))]);
        assert!(attributes_to_value(&input, FieldType::UShort).is_err());

        let input = attrs(vec![("value", HostValue::Float(1e300))]);
        assert!(attributes_to_value(&input, FieldType::Float).is_err());
    }

    #[test]
    fn test_missing_value() {
        assert_eq!(
            attributes_to_value(&Attributes::new(), FieldType::Double).unwrap_err(),
            ConvertError::MissingValue
        );
        let input = attrs(vec![("value", HostValue::None)]);
        assert_eq!(
            attributes_to_value(&input, FieldType::Double).unwrap_err(),
            ConvertError::MissingValue
        );
    }

    #[test]
    fn test_value_round_trip_per_kind() {
        let cases = [
            (FieldType::String, HostValue::Bytes(b"hello".to_vec())),
            (FieldType::Enum, HostValue::Int(3)),
            (FieldType::Char, HostValue::Int(255)),
            (FieldType::Short, HostValue::Int(-32768)),
            (FieldType::UShort, HostValue::Int(65535)),
            (FieldType::Long, HostValue::Int(i64::from(i32::MIN))),
            (FieldType::ULong, HostValue::Int(i64::from(u32::MAX))),
            (FieldType::Float, HostValue::Float(0.5)),
            (FieldType::Double, HostValue::Float(-1.25e10)),
        ];
        for (kind, value) in cases {
            let gdd = attributes_to_value(&attrs(vec![("value", value.clone())]), kind).unwrap();
            let back = value_to_attributes(&gdd).unwrap();
            assert_eq!(back["value"], value, "{kind:?}");
        }
    }

    #[test]
    fn test_enum_index_must_name_a_state() {
        let states = HostValue::Seq(vec!["Off".into(), "On".into()]);
        let input = attrs(vec![("value", HostValue::Int(1)), ("enum_strings", states.clone())]);
        let gdd = attributes_to_value(&input, FieldType::Enum).unwrap();
        assert_eq!(gdd.data(), Some(&GddData::Enum16(vec![1])));

        let input = attrs(vec![("value", HostValue::Int(2)), ("enum_strings", states)]);
        assert!(matches!(
            attributes_to_value(&input, FieldType::Enum).unwrap_err(),
            ConvertError::TypeMismatch { field: "value", .. }
        ));
    }

    #[test]
    fn test_arrays_and_metadata() {
        let input = attrs(vec![
            ("value", HostValue::Seq(vec![HostValue::Int(1), HostValue::Float(2.5)])),
            ("timestamp", HostValue::Seq(vec![HostValue::Int(100), HostValue::Int(5)])),
            ("unit", HostValue::Str("mm".into())),
            ("precision", HostValue::Int(3)),
            ("control_limits", HostValue::Seq(vec![HostValue::Int(0), HostValue::Int(10)])),
        ]);
        let gdd = attributes_to_value(&input, FieldType::Double).unwrap();
        assert_eq!(gdd.dimension(), 1);
        assert_eq!(gdd.bound(), 2);
        assert_eq!(gdd.timestamp, EpicsTime::new(100, 5));
        assert_eq!(gdd.units.as_deref(), Some(&b"mm"[..]));
        assert_eq!(gdd.precision, Some(3));
        assert_eq!(gdd.control_limits, Some(Limits { lower: 0.0, upper: 10.0 }));

        let back = value_to_attributes(&gdd).unwrap();
        assert_eq!(back["timestamp"], timestamp_to_host(EpicsTime::new(100, 5)));
        assert_eq!(
            back["value"],
            HostValue::Seq(vec![HostValue::Float(1.0), HostValue::Float(2.5)])
        );
    }

    #[test]
    fn test_string_value_rejects_numbers() {
        let input = attrs(vec![("value", HostValue::Int(1))]);
        assert!(attributes_to_value(&input, FieldType::String).is_err());
        let input = attrs(vec![("value", HostValue::Float(1.5))]);
        assert!(attributes_to_value(&input, FieldType::Long).is_err());
    }

    #[test]
    fn test_event_mask_resolution() {
        let vocabulary = EventVocabulary::new();
        let value = vocabulary.value_event_mask();
        let alarm = vocabulary.alarm_event_mask();

        let single = event_mask(&Events::Value.to_host(), &vocabulary).unwrap();
        assert_eq!(single, value);

        let many = HostValue::Seq(vec![Events::Value.to_host(), HostValue::Str("ALARM".into())]);
        assert_eq!(event_mask(&many, &vocabulary).unwrap(), value | alarm);

        let log = event_mask(&HostValue::Str("LOG".into()), &vocabulary).unwrap();
        assert_eq!(log, vocabulary.log_event_mask());

        assert_eq!(event_mask(&HostValue::Int(1 | 4), &vocabulary).unwrap(), value | alarm);
    }

    #[test]
    fn test_event_mask_rejects_empty_and_garbage() {
        let vocabulary = EventVocabulary::new();
        assert_eq!(
            event_mask(&HostValue::Seq(vec![]), &vocabulary),
            Err(ConvertError::EmptyEventMask)
        );
        assert_eq!(event_mask(&HostValue::Int(0), &vocabulary), Err(ConvertError::EmptyEventMask));
        assert!(event_mask(&HostValue::Int(64), &vocabulary).is_err());
        assert!(event_mask(&HostValue::Str("SOMETIMES".into()), &vocabulary).is_err());
        assert!(event_mask(&HostValue::Float(1.0), &vocabulary).is_err());
    }

    #[test]
    fn test_dimensions() {
        assert_eq!(dimensions(0), (0, 0));
        assert_eq!(dimensions(1), (0, 1));
        assert_eq!(dimensions(16), (1, 16));
    }
}
