// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Conversion between loosely typed message payloads and OPC UA [`Variant`]s.
//!
//! Payloads arrive from the flow host as JSON values. A message may declare a `datatype` tag
//! which picks the variant type that gets written to the server. Coercion follows the lenient
//! rules of the flow runtime: numbers are parsed from the leading part of strings, unsigned
//! 16-bit values wrap, booleans follow truthiness, and an unknown tag yields `Float(0.0)`.

use std::fmt;

use opcua::types::{UAString, Variant};
use serde_json::{Number, Value};

/// The data type tags a message may declare in its `datatype` property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataTypeTag {
    Float,
    Double,
    UInt16,
    /// Parsed as an integer, written as a `UInt16`.
    Integer,
    Boolean,
    String,
}

impl DataTypeTag {
    pub fn from_tag(tag: &str) -> Option<DataTypeTag> {
        match tag {
            "Float" => Some(DataTypeTag::Float),
            "Double" => Some(DataTypeTag::Double),
            "UInt16" => Some(DataTypeTag::UInt16),
            "Integer" => Some(DataTypeTag::Integer),
            "Boolean" => Some(DataTypeTag::Boolean),
            "String" => Some(DataTypeTag::String),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DataTypeTag::Float => "Float",
            DataTypeTag::Double => "Double",
            DataTypeTag::UInt16 => "UInt16",
            DataTypeTag::Integer => "Integer",
            DataTypeTag::Boolean => "Boolean",
            DataTypeTag::String => "String",
        }
    }
}

impl fmt::Display for DataTypeTag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Builds the variant to write for a payload and its declared type tag. An absent or
/// unrecognised tag produces `Float(0.0)` rather than an error.
pub fn encode(tag: Option<&str>, payload: &Value) -> Variant {
    match tag.and_then(DataTypeTag::from_tag) {
        Some(DataTypeTag::Float) => Variant::Float(parse_float(payload) as f32),
        Some(DataTypeTag::Double) => Variant::Double(parse_float(payload)),
        Some(DataTypeTag::UInt16) => Variant::UInt16(wrap_u16(to_number(payload))),
        Some(DataTypeTag::Integer) => Variant::UInt16(wrap_u16(parse_int(payload))),
        Some(DataTypeTag::Boolean) => Variant::Boolean(is_truthy(payload)),
        Some(DataTypeTag::String) => Variant::String(match payload {
            Value::Null => UAString::null(),
            Value::String(s) => UAString::from(s.as_str()),
            other => UAString::from(other.to_string()),
        }),
        None => Variant::Float(0.0),
    }
}

/// Turns a variant received from the server back into a message payload.
pub fn decode(value: &Variant) -> Value {
    match value {
        Variant::Empty => Value::Null,
        Variant::Boolean(v) => Value::Bool(*v),
        Variant::SByte(v) => Value::from(*v),
        Variant::Byte(v) => Value::from(*v),
        Variant::Int16(v) => Value::from(*v),
        Variant::UInt16(v) => Value::from(*v),
        Variant::Int32(v) => Value::from(*v),
        Variant::UInt32(v) => Value::from(*v),
        Variant::Int64(v) => Value::from(*v),
        Variant::UInt64(v) => Value::from(*v),
        // Go through the shortest decimal form so 0.1f32 decodes as 0.1 and not 0.10000000149
        Variant::Float(v) => v
            .to_string()
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map_or(Value::Null, Value::Number),
        Variant::Double(v) => Number::from_f64(*v).map_or(Value::Null, Value::Number),
        Variant::String(v) => v
            .value()
            .as_ref()
            .map_or(Value::Null, |s| Value::String(s.clone())),
        Variant::QualifiedName(v) => Value::String(v.name.as_ref().to_string()),
        Variant::LocalizedText(v) => Value::String(v.text.as_ref().to_string()),
        Variant::DateTime(v) => Value::String(v.as_chrono().to_rfc3339()),
        other => Value::String(other.to_string()),
    }
}

/// The name of the variant's data type, as it appears in event payloads.
pub fn type_name(value: &Variant) -> &'static str {
    match value {
        Variant::Empty => "Null",
        Variant::Boolean(_) => "Boolean",
        Variant::SByte(_) => "SByte",
        Variant::Byte(_) => "Byte",
        Variant::Int16(_) => "Int16",
        Variant::UInt16(_) => "UInt16",
        Variant::Int32(_) => "Int32",
        Variant::UInt32(_) => "UInt32",
        Variant::Int64(_) => "Int64",
        Variant::UInt64(_) => "UInt64",
        Variant::Float(_) => "Float",
        Variant::Double(_) => "Double",
        Variant::String(_) => "String",
        Variant::DateTime(_) => "DateTime",
        Variant::Guid(_) => "Guid",
        Variant::StatusCode(_) => "StatusCode",
        Variant::ByteString(_) => "ByteString",
        Variant::XmlElement(_) => "XmlElement",
        Variant::QualifiedName(_) => "QualifiedName",
        Variant::LocalizedText(_) => "LocalizedText",
        Variant::NodeId(_) => "NodeId",
        Variant::ExpandedNodeId(_) => "ExpandedNodeId",
        Variant::ExtensionObject(_) => "ExtensionObject",
        _ => "Variant",
    }
}

/// Plain text form of a variant's value, used when composing event payloads.
pub fn display_value(value: &Variant) -> String {
    match value {
        Variant::Empty => "null".to_string(),
        Variant::QualifiedName(v) => v.name.as_ref().to_string(),
        Variant::LocalizedText(v) => v.text.as_ref().to_string(),
        other => other.to_string(),
    }
}

/// Reinterprets an unsigned 16-bit value as signed. Only used for diagnostics of `UInt16`
/// reads, the payload itself is never altered.
pub fn to_signed_16(x: u16) -> i32 {
    let x = i32::from(x);
    if x >= 32768 {
        x - 65536
    } else {
        x
    }
}

/// Wraps a number into the unsigned 16-bit range. Non-finite values become 0.
fn wrap_u16(n: f64) -> u16 {
    if n.is_finite() {
        n.trunc().rem_euclid(65536.0) as u16
    } else {
        0
    }
}

/// Numeric conversion of a whole payload, NaN when it isn't numeric.
fn to_number(payload: &Value) -> f64 {
    match payload {
        Value::Null => 0.0,
        Value::Bool(b) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        Value::Number(n) => n.as_f64().unwrap_or(f64::NAN),
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                0.0
            } else {
                s.parse::<f64>().unwrap_or(f64::NAN)
            }
        }
        Value::Array(_) | Value::Object(_) => f64::NAN,
    }
}

/// Parses the leading decimal number of a payload, NaN when there isn't one.
fn parse_float(payload: &Value) -> f64 {
    match payload {
        Value::Number(n) => n.as_f64().unwrap_or(f64::NAN),
        Value::String(s) => float_prefix(s.trim_start()),
        _ => f64::NAN,
    }
}

/// Parses the leading integer of a payload, NaN when there isn't one.
fn parse_int(payload: &Value) -> f64 {
    match payload {
        Value::Number(n) => n.as_f64().map_or(f64::NAN, f64::trunc),
        Value::String(s) => int_prefix(s.trim_start()),
        _ => f64::NAN,
    }
}

fn float_prefix(s: &str) -> f64 {
    let bytes = s.as_bytes();
    let mut end = 0;
    if matches!(bytes.first(), Some(b'+') | Some(b'-')) {
        end = 1;
    }
    if s[end..].starts_with("Infinity") {
        return if s.starts_with('-') {
            f64::NEG_INFINITY
        } else {
            f64::INFINITY
        };
    }
    let mut digits = 0;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
        digits += 1;
    }
    if end < bytes.len() && bytes[end] == b'.' {
        end += 1;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
            digits += 1;
        }
    }
    if digits == 0 {
        return f64::NAN;
    }
    // An exponent only counts when at least one digit follows it
    if end < bytes.len() && (bytes[end] == b'e' || bytes[end] == b'E') {
        let mut exp_end = end + 1;
        if exp_end < bytes.len() && (bytes[exp_end] == b'+' || bytes[exp_end] == b'-') {
            exp_end += 1;
        }
        let exp_digits_start = exp_end;
        while exp_end < bytes.len() && bytes[exp_end].is_ascii_digit() {
            exp_end += 1;
        }
        if exp_end > exp_digits_start {
            end = exp_end;
        }
    }
    s[..end].trim_end_matches('.').parse::<f64>().unwrap_or(f64::NAN)
}

fn int_prefix(s: &str) -> f64 {
    let (negative, rest) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };
    let (radix, rest) = if rest.starts_with("0x") || rest.starts_with("0X") {
        (16, &rest[2..])
    } else {
        (10, rest)
    };
    let digits: String = rest.chars().take_while(|c| c.is_digit(radix)).collect();
    if digits.is_empty() {
        return f64::NAN;
    }
    let magnitude = digits
        .chars()
        .filter_map(|c| c.to_digit(radix))
        .fold(0f64, |acc, d| acc * f64::from(radix) + f64::from(d));
    if negative {
        -magnitude
    } else {
        magnitude
    }
}

/// Truthiness of a payload in the flow runtime's sense.
fn is_truthy(payload: &Value) -> bool {
    match payload {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(false, |n| n != 0.0 && !n.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
