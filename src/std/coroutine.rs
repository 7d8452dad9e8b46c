//! Coroutine library
//!
//! `resume` and `yield` only describe the transfer; the executor performs it
//! and applies the yield cascade rules.

use crate::runtime::memory::HeapValue;
use crate::runtime::value::Value;
use crate::std::{check_thread, NativeContext, NativeExport, NativeOutcome, StdModule};
use crate::vm::{bad_argument, Thread, VMResult};

// ============================================================================
// CoroutineModule - StdModule Implementation
// ============================================================================

pub struct CoroutineModule;

impl StdModule for CoroutineModule {
    fn module_path(&self) -> &str {
        "coroutine"
    }

    fn exports(&self) -> Vec<NativeExport> {
        vec![
            NativeExport::new(
                "create",
                "coroutine.create",
                "(f) -> thread",
                native_create,
            ),
            NativeExport::new(
                "resume",
                "coroutine.resume",
                "([propagate: boolean,] co, ...) -> ...",
                native_resume,
            ),
            NativeExport::new("yield", "coroutine.yield", "(...) -> ...", native_yield),
            NativeExport::new(
                "status",
                "coroutine.status",
                "(co) -> string",
                native_status,
            ),
            NativeExport::new(
                "running",
                "coroutine.running",
                "() -> (thread, boolean)",
                native_running,
            ),
            NativeExport::new(
                "isyieldable",
                "coroutine.isyieldable",
                "() -> boolean",
                native_isyieldable,
            ),
        ]
    }
}

/// Singleton instance for the coroutine library.
pub const COROUTINE_MODULE: CoroutineModule = CoroutineModule;

// ============================================================================
// Native Function Implementations
// ============================================================================

fn native_create(
    args: &[Value],
    ctx: &mut NativeContext<'_, '_>,
) -> VMResult<NativeOutcome> {
    let body = match args.first() {
        Some(f @ (Value::Function(_) | Value::Native(_))) => f.clone(),
        other => {
            return Err(bad_argument(
                1,
                "create",
                &format!(
                    "function expected, got {}",
                    other.map(|v| v.type_name()).unwrap_or("no value")
                ),
            ))
        }
    };
    let thread = ctx.heap.allocate(HeapValue::Thread(Box::new(Thread::new(body))));
    Ok(NativeOutcome::Return(vec![Value::Thread(thread)]))
}

/// `coroutine.resume([true,] co, ...)`
///
/// With the leading `true` a host interruption inside `co` is not re-driven
/// transparently; `resume` itself yields and returns whatever the next resume
/// of the caller passes in.
fn native_resume(
    args: &[Value],
    _ctx: &mut NativeContext<'_, '_>,
) -> VMResult<NativeOutcome> {
    let (propagate, rest) = match args.first() {
        Some(Value::Bool(flag)) => (*flag, &args[1..]),
        _ => (false, args),
    };
    let thread = check_thread(rest, 0, "resume")?;
    Ok(NativeOutcome::Resume {
        thread,
        args: rest[1..].to_vec(),
        propagate,
    })
}

fn native_yield(
    args: &[Value],
    _ctx: &mut NativeContext<'_, '_>,
) -> VMResult<NativeOutcome> {
    Ok(NativeOutcome::Yield(args.to_vec()))
}

fn native_status(
    args: &[Value],
    ctx: &mut NativeContext<'_, '_>,
) -> VMResult<NativeOutcome> {
    let thread = check_thread(args, 0, "status")?;
    let status = ctx.heap.thread(thread)?.status;
    Ok(NativeOutcome::Return(vec![Value::str(status.as_str())]))
}

fn native_running(
    _args: &[Value],
    ctx: &mut NativeContext<'_, '_>,
) -> VMResult<NativeOutcome> {
    Ok(NativeOutcome::Return(vec![
        Value::Thread(ctx.current),
        Value::Bool(ctx.is_main),
    ]))
}

/// Every coroutine, the main thread included, can yield to its resumer or the host
fn native_isyieldable(
    _args: &[Value],
    _ctx: &mut NativeContext<'_, '_>,
) -> VMResult<NativeOutcome> {
    Ok(NativeOutcome::Return(vec![Value::Bool(true)]))
}
