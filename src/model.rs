//! Data types shared by the store, the protocol registry, and the viewer.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Which way a packet travelled through the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Clientbound,
    Serverbound,
}

impl Direction {
    pub fn label(self) -> &'static str {
        match self {
            Direction::Clientbound => "clientbound",
            Direction::Serverbound => "serverbound",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Numeric scalar inside a decoded packet.
///
/// Construct through the `From` impls: non-negative integers normalize to
/// `UInt`, so two numbers are equal exactly when their value and type agree,
/// the same rule the capture side applies when it encodes JSON.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Number {
    Int(i64),
    UInt(u64),
    Float(f64),
}

impl From<i64> for Number {
    fn from(v: i64) -> Number {
        if v >= 0 {
            Number::UInt(v as u64)
        } else {
            Number::Int(v)
        }
    }
}

impl From<u64> for Number {
    fn from(v: u64) -> Number {
        Number::UInt(v)
    }
}

impl From<f64> for Number {
    fn from(v: f64) -> Number {
        Number::Float(v)
    }
}

/// Decoded packet payload. Object keys are kept sorted, so every traversal
/// of the same value visits fields in the same order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }

    /// Conversion used for pretty display and test fixtures.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(Number::Int(v)) => serde_json::Value::from(*v),
            Value::Number(Number::UInt(v)) => serde_json::Value::from(*v),
            Value::Number(Number::Float(v)) => serde_json::Number::from_f64(*v)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Object(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }

    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(v) = n.as_u64() {
                    Value::Number(Number::UInt(v))
                } else if let Some(v) = n.as_i64() {
                    Value::Number(Number::Int(v))
                } else {
                    Value::Number(Number::Float(n.as_f64().unwrap_or(0.0)))
                }
            }
            serde_json::Value::String(s) => Value::String(s.clone()),
            serde_json::Value::Array(items) => {
                Value::Array(items.iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect(),
            ),
        }
    }
}

impl From<&serde_json::Value> for Value {
    fn from(json: &serde_json::Value) -> Value {
        Value::from_json(json)
    }
}

impl From<&Value> for serde_json::Value {
    fn from(value: &Value) -> serde_json::Value {
        value.to_json()
    }
}

/// One packet as loaded from a session log, ready for display. Owned by the
/// store layer; the interaction state reads it in place.
#[derive(Debug, Clone, PartialEq)]
pub struct PacketRecord {
    /// Monotonic per session, assigned by the relay at capture time.
    pub packet_number: u64,
    /// Wall-clock capture time, milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
    /// Milliseconds since the first packet of the session.
    pub offset_ms: i64,
    pub direction: Direction,
    /// Name recorded at capture time, when the relay knew it.
    pub name: Option<String>,
    pub value: Value,
    /// Original bytes, kept for hex display and id extraction.
    pub raw: Option<Vec<u8>>,
}

/// What the session list shows before a log is opened.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    /// File stem of the session log; doubles as the session id.
    pub id: String,
    pub path: PathBuf,
    pub packet_count: usize,
    pub started_at_ms: i64,
    pub protocol_version: Option<String>,
}
