//! Base library, installed as globals

use crate::runtime::memory::InvalidNextKey;
use crate::runtime::value::{parse_number, Value};
use crate::std::{arg, check_table, opt_int, to_display, NativeContext, NativeExport, NativeOutcome, StdModule};
use crate::vm::{bad_argument, VMError, VMResult};

// ============================================================================
// BaseModule - StdModule Implementation
// ============================================================================

pub struct BaseModule;

impl StdModule for BaseModule {
    fn module_path(&self) -> &str {
        "_G"
    }

    fn exports(&self) -> Vec<NativeExport> {
        vec![
            NativeExport::new("print", "print", "(...) -> ()", native_print),
            NativeExport::new("type", "type", "(v) -> string", native_type),
            NativeExport::new("tostring", "tostring", "(v) -> string", native_tostring),
            NativeExport::new(
                "tonumber",
                "tonumber",
                "(v, base?) -> number | nil",
                native_tonumber,
            ),
            NativeExport::new("next", "next", "(t, k?) -> (k, v)", native_next),
            NativeExport::new("pairs", "pairs", "(t) -> (next, t, nil)", native_pairs),
            NativeExport::new("ipairs", "ipairs", "(t) -> (iter, t, 0)", native_ipairs),
            NativeExport::new(
                "ipairs_iter",
                "ipairs.iter",
                "(t, i) -> (i, v)",
                native_ipairs_iter,
            ),
            NativeExport::new("error", "error", "(msg, level?) -> !", native_error),
            NativeExport::new("assert", "assert", "(v, msg?) -> ...", native_assert),
            NativeExport::new("rawequal", "rawequal", "(a, b) -> boolean", native_rawequal),
            NativeExport::new("rawlen", "rawlen", "(v) -> integer", native_rawlen),
            NativeExport::new("rawget", "rawget", "(t, k) -> v", native_rawget),
            NativeExport::new("rawset", "rawset", "(t, k, v) -> t", native_rawset),
        ]
    }
}

/// Singleton instance for the base library.
pub const BASE_MODULE: BaseModule = BaseModule;

// ============================================================================
// Native Function Implementations
// ============================================================================

/// Print to the serial output; host side effect, so it returns through the gate
fn native_print(
    args: &[Value],
    ctx: &mut NativeContext<'_, '_>,
) -> VMResult<NativeOutcome> {
    let line = args.iter().map(to_display).collect::<Vec<_>>().join(" ");
    ctx.host.kernel.serial_write(&line).map_err(VMError::Runtime)?;
    Ok(NativeOutcome::ApiReturn(Vec::new()))
}

fn native_type(
    args: &[Value],
    _ctx: &mut NativeContext<'_, '_>,
) -> VMResult<NativeOutcome> {
    match args.first() {
        Some(v) => Ok(NativeOutcome::Return(vec![Value::str(v.type_name())])),
        None => Err(bad_argument(1, "type", "value expected")),
    }
}

fn native_tostring(
    args: &[Value],
    _ctx: &mut NativeContext<'_, '_>,
) -> VMResult<NativeOutcome> {
    match args.first() {
        Some(v) => Ok(NativeOutcome::Return(vec![Value::str(&to_display(v))])),
        None => Err(bad_argument(1, "tostring", "value expected")),
    }
}

fn native_tonumber(
    args: &[Value],
    _ctx: &mut NativeContext<'_, '_>,
) -> VMResult<NativeOutcome> {
    let value = arg(args, 0);
    let base = match args.get(1) {
        None | Some(Value::Nil) => None,
        Some(_) => Some(opt_int(args, 1, "tonumber", 10)?),
    };
    let result = match base {
        None => match &value {
            Value::Int(_) | Value::Float(_) => value.clone(),
            Value::Str(s) => parse_number(s).unwrap_or_default(),
            Value::Nil if args.is_empty() => {
                return Err(bad_argument(1, "tonumber", "value expected"))
            }
            _ => Value::Nil,
        },
        Some(base) => {
            if !(2..=36).contains(&base) {
                return Err(bad_argument(2, "tonumber", "base out of range"));
            }
            let Value::Str(s) = &value else {
                return Err(bad_argument(
                    1,
                    "tonumber",
                    &format!("string expected, got {}", value.type_name()),
                ));
            };
            let text = s.trim().to_ascii_lowercase();
            let (negative, digits) = match text.strip_prefix('-') {
                Some(rest) => (true, rest),
                None => (false, text.as_str()),
            };
            match i64::from_str_radix(digits, base as u32) {
                Ok(n) if !digits.is_empty() => Value::Int(if negative { -n } else { n }),
                _ => Value::Nil,
            }
        }
    };
    Ok(NativeOutcome::Return(vec![result]))
}

fn native_next(
    args: &[Value],
    ctx: &mut NativeContext<'_, '_>,
) -> VMResult<NativeOutcome> {
    let table = check_table(args, 0, "next")?;
    let key = arg(args, 1);
    match ctx.heap.table(table)?.next(&key) {
        Ok(Some((k, v))) => Ok(NativeOutcome::Return(vec![k, v])),
        Ok(None) => Ok(NativeOutcome::Return(vec![Value::Nil])),
        Err(InvalidNextKey) => Err(VMError::runtime("invalid key to 'next'")),
    }
}

fn native_pairs(
    args: &[Value],
    ctx: &mut NativeContext<'_, '_>,
) -> VMResult<NativeOutcome> {
    let table = check_table(args, 0, "pairs")?;
    Ok(NativeOutcome::Return(vec![
        Value::Native(ctx.registry.next),
        Value::Table(table),
        Value::Nil,
    ]))
}

fn native_ipairs(
    args: &[Value],
    ctx: &mut NativeContext<'_, '_>,
) -> VMResult<NativeOutcome> {
    let table = check_table(args, 0, "ipairs")?;
    Ok(NativeOutcome::Return(vec![
        Value::Native(ctx.registry.ipairs_iter),
        Value::Table(table),
        Value::Int(0),
    ]))
}

fn native_ipairs_iter(
    args: &[Value],
    ctx: &mut NativeContext<'_, '_>,
) -> VMResult<NativeOutcome> {
    let table = check_table(args, 0, "ipairs")?;
    let i = opt_int(args, 1, "ipairs", 0)? + 1;
    let value = ctx.heap.table(table)?.get(&Value::Int(i));
    if value.is_nil() {
        Ok(NativeOutcome::Return(vec![Value::Nil]))
    } else {
        Ok(NativeOutcome::Return(vec![Value::Int(i), value]))
    }
}

fn native_error(
    args: &[Value],
    _ctx: &mut NativeContext<'_, '_>,
) -> VMResult<NativeOutcome> {
    let message = match args.first() {
        None | Some(Value::Nil) => "nil".to_string(),
        Some(v) => to_display(v),
    };
    let level = opt_int(args, 1, "error", 1)?;
    if level == 0 || !matches!(args.first(), Some(Value::Str(_))) {
        Err(VMError::Raw(message))
    } else {
        Err(VMError::Runtime(message))
    }
}

fn native_assert(
    args: &[Value],
    _ctx: &mut NativeContext<'_, '_>,
) -> VMResult<NativeOutcome> {
    match args.first() {
        None => Err(bad_argument(1, "assert", "value expected")),
        Some(v) if v.is_truthy() => Ok(NativeOutcome::Return(args.to_vec())),
        Some(_) => match args.get(1) {
            None | Some(Value::Nil) => Err(VMError::runtime("assertion failed!")),
            Some(msg) => Err(VMError::Raw(to_display(msg))),
        },
    }
}

fn native_rawequal(
    args: &[Value],
    _ctx: &mut NativeContext<'_, '_>,
) -> VMResult<NativeOutcome> {
    if args.len() < 2 {
        return Err(bad_argument(2, "rawequal", "value expected"));
    }
    Ok(NativeOutcome::Return(vec![Value::Bool(args[0].raw_eq(&args[1]))]))
}

fn native_rawlen(
    args: &[Value],
    ctx: &mut NativeContext<'_, '_>,
) -> VMResult<NativeOutcome> {
    let len = match args.first() {
        Some(Value::Table(h)) => ctx.heap.table(*h)?.len(),
        Some(Value::Str(s)) => s.len(),
        _ => return Err(bad_argument(1, "rawlen", "table or string expected")),
    };
    Ok(NativeOutcome::Return(vec![Value::Int(len as i64)]))
}

fn native_rawget(
    args: &[Value],
    ctx: &mut NativeContext<'_, '_>,
) -> VMResult<NativeOutcome> {
    let table = check_table(args, 0, "rawget")?;
    let value = ctx.heap.table(table)?.get(&arg(args, 1));
    Ok(NativeOutcome::Return(vec![value]))
}

fn native_rawset(
    args: &[Value],
    ctx: &mut NativeContext<'_, '_>,
) -> VMResult<NativeOutcome> {
    let table = check_table(args, 0, "rawset")?;
    ctx.heap
        .table_mut(table)?
        .set(&arg(args, 1), arg(args, 2))
        .map_err(|_| VMError::runtime("table index is nil or NaN"))?;
    Ok(NativeOutcome::Return(vec![Value::Table(table)]))
}
