//! Runtime value representation for guest programs
//!
//! `Value` is the unified representation of every guest-visible value. Scalars
//! are stored inline; tables, closures, coroutines and host objects live in the
//! processor heap and are referenced by [`Handle`].
//!
//! Every variant is plain serde data so that a suspended execution context can
//! be written out and read back without special casing.

use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::runtime::memory::Handle;

/// Index of a native function in the processor's native registry.
///
/// Native ids are assigned in registration order, which is deterministic
/// for every freshly built execution context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NativeId(pub u16);

/// A guest value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Absence of a value
    #[default]
    Nil,
    /// Boolean
    Bool(bool),
    /// Integer number
    Int(i64),
    /// Floating point number
    Float(f64),
    /// Immutable string
    Str(Rc<str>),
    /// Table reference
    Table(Handle),
    /// Guest closure reference
    Function(Handle),
    /// Built-in function
    Native(NativeId),
    /// Coroutine reference
    Thread(Handle),
    /// Open file handle reference
    File(Handle),
    /// Network object reference (a trace to a remote component)
    Object(Handle),
    /// Pending host operation
    Future(Handle),
    /// Heap cell of a captured local. Only ever stored in a local slot, never seen by guest code.
    Cell(Handle),
}

impl Value {
    /// Build a string value
    pub fn str(s: &str) -> Self {
        Value::Str(Rc::from(s))
    }

    /// Lua truthiness: only `nil` and `false` are falsy
    #[inline]
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false))
    }

    #[inline]
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Guest-visible type name, as returned by `type()`
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "boolean",
            Value::Int(_) | Value::Float(_) => "number",
            Value::Str(_) => "string",
            Value::Table(_) => "table",
            Value::Function(_) | Value::Native(_) => "function",
            Value::Thread(_) => "thread",
            Value::File(_) | Value::Object(_) | Value::Future(_) => "userdata",
            Value::Cell(_) => "upvalue",
        }
    }

    /// Heap handle referenced by this value, if any
    pub fn handle(&self) -> Option<Handle> {
        match self {
            Value::Table(h)
            | Value::Function(h)
            | Value::Thread(h)
            | Value::File(h)
            | Value::Object(h)
            | Value::Future(h)
            | Value::Cell(h) => Some(*h),
            _ => None,
        }
    }

    /// Mutable access to the heap handle referenced by this value, if any
    pub fn handle_mut(&mut self) -> Option<&mut Handle> {
        match self {
            Value::Table(h)
            | Value::Function(h)
            | Value::Thread(h)
            | Value::File(h)
            | Value::Object(h)
            | Value::Future(h)
            | Value::Cell(h) => Some(h),
            _ => None,
        }
    }

    /// Raw equality (no metamethods). Integers and floats compare by value.
    pub fn raw_eq(
        &self,
        other: &Value,
    ) -> bool {
        match (self, other) {
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                (*a as f64) == *b
            }
            _ => self == other,
        }
    }

    /// Numeric view of the value, coercing numeric strings like Lua does
    pub fn to_number(&self) -> Option<Value> {
        match self {
            Value::Int(_) | Value::Float(_) => Some(self.clone()),
            Value::Str(s) => parse_number(s),
            _ => None,
        }
    }

    /// Float view of a numeric value
    pub fn as_f64(&self) -> Option<f64> {
        match self.to_number()? {
            Value::Int(i) => Some(i as f64),
            Value::Float(f) => Some(f),
            _ => None,
        }
    }

    /// Integer view of a numeric value; floats must have an exact integer representation
    pub fn as_i64(&self) -> Option<i64> {
        match self.to_number()? {
            Value::Int(i) => Some(i),
            Value::Float(f) => float_to_int(f),
            _ => None,
        }
    }
}

/// Convert a float to an integer if it has an exact representation
pub fn float_to_int(f: f64) -> Option<i64> {
    if f.fract() == 0.0 && f >= -9.223_372_036_854_776e18 && f < 9.223_372_036_854_776e18 {
        Some(f as i64)
    } else {
        None
    }
}

/// Parse a Lua numeric literal (decimal, float or hexadecimal), ignoring surrounding whitespace
pub fn parse_number(text: &str) -> Option<Value> {
    let s = text.trim();
    if s.is_empty() {
        return None;
    }
    let (negative, body) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };
    if let Some(hex) = body.strip_prefix("0x").or_else(|| body.strip_prefix("0X")) {
        if hex.is_empty() || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        // 十六进制整数按 Lua 规则回绕
        let mut acc: i64 = 0;
        for c in hex.chars() {
            let digit = c.to_digit(16)? as i64;
            acc = acc.wrapping_mul(16).wrapping_add(digit);
        }
        return Some(Value::Int(if negative { acc.wrapping_neg() } else { acc }));
    }
    if !body.starts_with(|c: char| c.is_ascii_digit() || c == '.') {
        return None;
    }
    let is_float = body.contains(['.', 'e', 'E']);
    if !is_float {
        if let Ok(i) = s.parse::<i64>() {
            return Some(Value::Int(i));
        }
    }
    s.parse::<f64>().ok().map(Value::Float)
}

/// Format a float the way Lua's `%.14g` does, keeping a trailing `.0` for integral values
pub fn format_float(f: f64) -> String {
    if f.is_nan() {
        return if f.is_sign_negative() { "-nan".into() } else { "nan".into() };
    }
    if f.is_infinite() {
        return if f > 0.0 { "inf".into() } else { "-inf".into() };
    }
    let mut out = format_general(f, 14);
    if !out.contains(['.', 'e', 'n', 'i']) {
        out.push_str(".0");
    }
    out
}

/// `%.{precision}g` formatting
pub fn format_general(
    f: f64,
    precision: usize,
) -> String {
    if f == 0.0 {
        return if f.is_sign_negative() { "-0".into() } else { "0".into() };
    }
    let precision = precision.max(1);
    let sci = format!("{:.*e}", precision - 1, f);
    let (mantissa, exponent) = match sci.split_once('e') {
        Some(parts) => parts,
        None => return sci,
    };
    let exponent: i32 = exponent.parse().unwrap_or(0);
    if exponent < -4 || exponent >= precision as i32 {
        let mantissa = trim_fraction(mantissa);
        let sign = if exponent < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", mantissa, sign, exponent.abs())
    } else {
        let decimals = (precision as i32 - 1 - exponent).max(0) as usize;
        trim_fraction(&format!("{:.*}", decimals, f)).to_string()
    }
}

fn trim_fraction(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}

impl fmt::Display for Value {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", format_float(*x)),
            Value::Str(s) => write!(f, "{}", s),
            Value::Table(h) => write!(f, "table: 0x{:08x}", h.raw()),
            Value::Function(h) => write!(f, "function: 0x{:08x}", h.raw()),
            Value::Native(id) => write!(f, "function: builtin: 0x{:08x}", id.0),
            Value::Thread(h) => write!(f, "thread: 0x{:08x}", h.raw()),
            Value::File(h) => write!(f, "File: 0x{:08x}", h.raw()),
            Value::Object(h) => write!(f, "Object: 0x{:08x}", h.raw()),
            Value::Future(h) => write!(f, "Future: 0x{:08x}", h.raw()),
            Value::Cell(h) => write!(f, "upvalue: 0x{:08x}", h.raw()),
        }
    }
}

/// Hashable form of a value used as a table key.
///
/// Floats with an integral value are normalised to integers so that
/// `t[1]` and `t[1.0]` address the same slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TableKey {
    Bool(bool),
    Int(i64),
    /// Bit pattern of a non-integral, non-NaN float
    Float(u64),
    Str(Rc<str>),
    Native(NativeId),
    /// Reference type: the variant tag is kept so the key converts back losslessly
    Ref(RefKind, Handle),
}

/// Which heap-referencing value variant a [`TableKey::Ref`] came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RefKind {
    Table,
    Function,
    Thread,
    File,
    Object,
    Future,
    Cell,
}

/// Reasons a value cannot be used as a table key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyError {
    Nil,
    NaN,
}

impl TableKey {
    /// Convert a value into a key
    pub fn from_value(value: &Value) -> Result<Self, KeyError> {
        Ok(match value {
            Value::Nil => return Err(KeyError::Nil),
            Value::Bool(b) => TableKey::Bool(*b),
            Value::Int(i) => TableKey::Int(*i),
            Value::Float(f) => {
                if f.is_nan() {
                    return Err(KeyError::NaN);
                }
                match float_to_int(*f) {
                    Some(i) => TableKey::Int(i),
                    None => TableKey::Float(f.to_bits()),
                }
            }
            Value::Str(s) => TableKey::Str(s.clone()),
            Value::Native(id) => TableKey::Native(*id),
            Value::Table(h) => TableKey::Ref(RefKind::Table, *h),
            Value::Function(h) => TableKey::Ref(RefKind::Function, *h),
            Value::Thread(h) => TableKey::Ref(RefKind::Thread, *h),
            Value::File(h) => TableKey::Ref(RefKind::File, *h),
            Value::Object(h) => TableKey::Ref(RefKind::Object, *h),
            Value::Future(h) => TableKey::Ref(RefKind::Future, *h),
            Value::Cell(h) => TableKey::Ref(RefKind::Cell, *h),
        })
    }

    /// Convert the key back into the value it was made from
    pub fn to_value(&self) -> Value {
        match self {
            TableKey::Bool(b) => Value::Bool(*b),
            TableKey::Int(i) => Value::Int(*i),
            TableKey::Float(bits) => Value::Float(f64::from_bits(*bits)),
            TableKey::Str(s) => Value::Str(s.clone()),
            TableKey::Native(id) => Value::Native(*id),
            TableKey::Ref(kind, h) => match kind {
                RefKind::Table => Value::Table(*h),
                RefKind::Function => Value::Function(*h),
                RefKind::Thread => Value::Thread(*h),
                RefKind::File => Value::File(*h),
                RefKind::Object => Value::Object(*h),
                RefKind::Future => Value::Future(*h),
                RefKind::Cell => Value::Cell(*h),
            },
        }
    }

    /// String key shortcut
    pub fn str(s: &str) -> Self {
        TableKey::Str(Rc::from(s))
    }
}
