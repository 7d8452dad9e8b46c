//! Network values and the value reader/writer

use serde::{Deserialize, Serialize};

use crate::kernel::NetworkTrace;
use crate::runtime::memory::{Heap, HeapValue, Table};
use crate::runtime::value::Value;

/// Typed value carried by signals and device calls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NetValue {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Trace(NetworkTrace),
    Array(Vec<NetValue>),
}

impl NetValue {
    /// Parse a CLI literal: integers, floats, `true`/`false`/`nil`, anything else is a string
    pub fn parse_literal(text: &str) -> Self {
        match text {
            "nil" => NetValue::Nil,
            "true" => NetValue::Bool(true),
            "false" => NetValue::Bool(false),
            _ => {
                if let Ok(i) = text.parse::<i64>() {
                    NetValue::Int(i)
                } else if let Ok(f) = text.parse::<f64>() {
                    NetValue::Float(f)
                } else {
                    NetValue::Str(text.to_string())
                }
            }
        }
    }
}

impl From<&str> for NetValue {
    fn from(s: &str) -> Self {
        NetValue::Str(s.to_string())
    }
}

impl From<i64> for NetValue {
    fn from(i: i64) -> Self {
        NetValue::Int(i)
    }
}

impl From<f64> for NetValue {
    fn from(f: f64) -> Self {
        NetValue::Float(f)
    }
}

impl From<bool> for NetValue {
    fn from(b: bool) -> Self {
        NetValue::Bool(b)
    }
}

/// Value reader: network value into a guest value, allocating as needed
pub fn read_value(
    heap: &mut Heap,
    value: &NetValue,
) -> Value {
    match value {
        NetValue::Nil => Value::Nil,
        NetValue::Bool(b) => Value::Bool(*b),
        NetValue::Int(i) => Value::Int(*i),
        NetValue::Float(f) => Value::Float(*f),
        NetValue::Str(s) => Value::str(s),
        NetValue::Trace(trace) => Value::Object(heap.allocate(HeapValue::Object(trace.clone()))),
        NetValue::Array(items) => {
            let values = items.iter().map(|v| read_value(heap, v)).collect();
            Value::Table(heap.allocate(HeapValue::Table(Table::from_list(values))))
        }
    }
}

/// Value writer: guest value into a network value
///
/// Tables become arrays of their sequence part; functions, coroutines and
/// files cannot leave the processor.
pub fn write_value(
    heap: &Heap,
    value: &Value,
) -> Result<NetValue, String> {
    write_depth(heap, value, 0)
}

fn write_depth(
    heap: &Heap,
    value: &Value,
    depth: usize,
) -> Result<NetValue, String> {
    if depth > 32 {
        return Err("value nested too deeply".to_string());
    }
    Ok(match value {
        Value::Nil => NetValue::Nil,
        Value::Bool(b) => NetValue::Bool(*b),
        Value::Int(i) => NetValue::Int(*i),
        Value::Float(f) => NetValue::Float(*f),
        Value::Str(s) => NetValue::Str(s.to_string()),
        Value::Object(h) => NetValue::Trace(heap.object(*h).map_err(|e| e.to_string())?.clone()),
        Value::Table(h) => {
            let table = heap.table(*h).map_err(|e| e.to_string())?;
            let mut items = Vec::with_capacity(table.len());
            for item in table.list() {
                items.push(write_depth(heap, item, depth + 1)?);
            }
            NetValue::Array(items)
        }
        other => return Err(format!("unsupported type '{}'", other.type_name())),
    })
}
