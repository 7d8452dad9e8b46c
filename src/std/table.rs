//! Table library

use crate::runtime::value::Value;
use crate::std::{check_int, check_str, check_table, opt_int, NativeContext, NativeExport, NativeOutcome, StdModule};
use crate::vm::{bad_argument, VMError, VMResult};

// ============================================================================
// TableModule - StdModule Implementation
// ============================================================================

pub struct TableModule;

impl StdModule for TableModule {
    fn module_path(&self) -> &str {
        "table"
    }

    fn exports(&self) -> Vec<NativeExport> {
        vec![
            NativeExport::new(
                "insert",
                "table.insert",
                "(t, [pos,] v) -> ()",
                native_insert,
            ),
            NativeExport::new("remove", "table.remove", "(t, pos?) -> v", native_remove),
            NativeExport::new(
                "concat",
                "table.concat",
                "(t, sep?, i?, j?) -> string",
                native_concat,
            ),
            NativeExport::new(
                "unpack",
                "table.unpack",
                "(t, i?, j?) -> ...",
                native_unpack,
            ),
        ]
    }
}

/// Singleton instance for the table library.
pub const TABLE_MODULE: TableModule = TableModule;

// ============================================================================
// Native Function Implementations
// ============================================================================

fn native_insert(
    args: &[Value],
    ctx: &mut NativeContext<'_, '_>,
) -> VMResult<NativeOutcome> {
    let handle = check_table(args, 0, "insert")?;
    let table = ctx.heap.table_mut(handle)?;
    let len = table.len();
    match args.len() {
        2 => table.insert(len + 1, args[1].clone()),
        3 => {
            let pos = check_int(args, 1, "insert")?;
            if pos < 1 || pos as usize > len + 1 {
                return Err(bad_argument(2, "insert", "position out of bounds"));
            }
            table.insert(pos as usize, args[2].clone());
        }
        _ => return Err(VMError::runtime("wrong number of arguments to 'insert'")),
    }
    Ok(NativeOutcome::Return(Vec::new()))
}

fn native_remove(
    args: &[Value],
    ctx: &mut NativeContext<'_, '_>,
) -> VMResult<NativeOutcome> {
    let handle = check_table(args, 0, "remove")?;
    let len = ctx.heap.table(handle)?.len();
    let pos = opt_int(args, 1, "remove", len as i64)?;
    if len == 0 && (pos == 0 || pos == len as i64) {
        return Ok(NativeOutcome::Return(vec![Value::Nil]));
    }
    if pos < 1 || pos as usize > len + 1 {
        return Err(bad_argument(2, "remove", "position out of bounds"));
    }
    let removed = ctx.heap.table_mut(handle)?.remove(pos as usize);
    Ok(NativeOutcome::Return(vec![removed]))
}

fn native_concat(
    args: &[Value],
    ctx: &mut NativeContext<'_, '_>,
) -> VMResult<NativeOutcome> {
    let handle = check_table(args, 0, "concat")?;
    let sep = match args.get(1) {
        None | Some(Value::Nil) => String::new(),
        Some(_) => check_str(args, 1, "concat")?,
    };
    let table = ctx.heap.table(handle)?;
    let i = opt_int(args, 2, "concat", 1)?;
    let j = opt_int(args, 3, "concat", table.len() as i64)?;

    let mut parts = Vec::new();
    let mut k = i;
    while k <= j {
        match table.get(&Value::Int(k)) {
            v @ (Value::Str(_) | Value::Int(_) | Value::Float(_)) => parts.push(v.to_string()),
            _ => {
                return Err(VMError::Runtime(format!(
                    "invalid value (at index {}) in table for 'concat'",
                    k
                )))
            }
        }
        k += 1;
    }
    Ok(NativeOutcome::Return(vec![Value::str(&parts.join(&sep))]))
}

fn native_unpack(
    args: &[Value],
    ctx: &mut NativeContext<'_, '_>,
) -> VMResult<NativeOutcome> {
    let handle = check_table(args, 0, "unpack")?;
    let table = ctx.heap.table(handle)?;
    let i = opt_int(args, 1, "unpack", 1)?;
    let j = opt_int(args, 2, "unpack", table.len() as i64)?;
    if j >= i && (j - i) >= 1_000_000 {
        return Err(VMError::runtime("too many results to unpack"));
    }
    let values = (i..=j).map(|k| table.get(&Value::Int(k))).collect();
    Ok(NativeOutcome::Return(values))
}
