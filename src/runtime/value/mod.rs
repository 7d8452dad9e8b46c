//! Guest value types

mod runtime_value;

pub use runtime_value::{
    float_to_int, format_float, format_general, parse_number, KeyError, NativeId, RefKind,
    TableKey, Value,
};
