//! Parsing of the Tello state-channel telemetry line into a typed snapshot.
//!
//! `port 8890` emits lines shaped like `pitch:1;roll:-2;...;agz:9.8\r\n`
//! (or the literal `ok`). [`parse_state`] is pure and total: it never fails,
//! it only ever produces a (possibly empty, possibly partial) [`StateSnapshot`].

use std::collections::HashMap;
use std::time::Instant;

/// A single decoded telemetry value.
#[derive(Debug, Clone, PartialEq)]
pub enum StateValue {
    Int(i64),
    Float(f64),
    Raw(String),
}

impl StateValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            StateValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            StateValue::Int(v) => Some(*v as f64),
            StateValue::Float(v) => Some(*v),
            StateValue::Raw(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            StateValue::Raw(v) => Some(v.as_str()),
            _ => None,
        }
    }
}

/// One telemetry field's declared wire type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldType {
    Int,
    Float,
}

fn field_type(key: &str) -> Option<FieldType> {
    match key {
        "mid" | "x" | "y" | "z" | "pitch" | "roll" | "yaw" | "vgx" | "vgy" | "vgz" | "templ"
        | "temph" | "tof" | "h" | "bat" | "time" => Some(FieldType::Int),
        "baro" | "agx" | "agy" | "agz" => Some(FieldType::Float),
        _ => None,
    }
}

/// Latest telemetry snapshot for a drone: a typed field map plus the instant
/// it was received at. `mpry` and any unrecognized key are kept as raw strings.
#[derive(Debug, Clone, Default)]
pub struct StateSnapshot {
    pub fields: HashMap<String, StateValue>,
    pub received_at: Option<Instant>,
}

impl StateSnapshot {
    pub fn get(&self, key: &str) -> Option<&StateValue> {
        self.fields.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Parse a raw state-channel datagram into a [`StateSnapshot`]'s field map.
///
/// `"ok"` (after trimming) parses to an empty map. Fields with fewer than two
/// `:`-separated parts are skipped. A value that fails to parse for a known
/// numeric field is logged and the field is omitted, without failing the rest
/// of the packet.
pub fn parse_state(raw: &str) -> HashMap<String, StateValue> {
    let trimmed = raw.trim();
    log::debug!("raw state data: {}", trimmed);

    if trimmed == "ok" {
        return HashMap::new();
    }

    let mut fields = HashMap::new();
    for entry in trimmed.split(';') {
        if entry.is_empty() {
            continue;
        }
        let mut parts = entry.splitn(2, ':');
        let key = match parts.next() {
            Some(k) if !k.is_empty() => k,
            _ => continue,
        };
        let value = match parts.next() {
            Some(v) => v,
            None => continue,
        };

        let parsed = match field_type(key) {
            Some(FieldType::Int) => match value.parse::<i64>() {
                Ok(v) => StateValue::Int(v),
                Err(e) => {
                    log::debug!("error parsing state value for {}: {} ({})", key, value, e);
                    continue;
                }
            },
            Some(FieldType::Float) => match value.parse::<f64>() {
                Ok(v) => StateValue::Float(v),
                Err(e) => {
                    log::debug!("error parsing state value for {}: {} ({})", key, value, e);
                    continue;
                }
            },
            None => StateValue::Raw(value.to_string()),
        };

        fields.insert(key.to_string(), parsed);
    }

    fields
}

#[test]
fn parses_ok_as_empty_map() {
    assert!(parse_state("ok\r\n").is_empty());
}

#[test]
fn parses_known_and_unknown_fields() {
    let raw = "pitch:1;roll:-2;yaw:3;vgx:0;vgy:0;vgz:0;templ:60;temph:70;tof:100;h:50;bat:87;baro:100.25;time:12;agx:0.1;agy:0.2;agz:9.8;mpry:0,0,0\r\n";
    let fields = parse_state(raw);

    assert_eq!(fields.get("pitch"), Some(&StateValue::Int(1)));
    assert_eq!(fields.get("bat"), Some(&StateValue::Int(87)));
    assert_eq!(fields.get("baro"), Some(&StateValue::Float(100.25)));
    assert_eq!(fields.get("mpry"), Some(&StateValue::Raw("0,0,0".to_string())));
}

#[test]
fn skips_malformed_numeric_fields_without_failing_packet() {
    let raw = "bat:not_a_number;h:50";
    let fields = parse_state(raw);

    assert_eq!(fields.get("bat"), None);
    assert_eq!(fields.get("h"), Some(&StateValue::Int(50)));
}

#[test]
fn skips_fields_with_no_colon() {
    let raw = "garbage;h:50";
    let fields = parse_state(raw);

    assert_eq!(fields.len(), 1);
    assert_eq!(fields.get("h"), Some(&StateValue::Int(50)));
}
