//! Component library and future methods
//!
//! Device calls go through [`Kernel::invoke`](crate::kernel::Kernel::invoke).
//! A device that cannot answer in the same tick defers: the guest gets a
//! `Future` object that the processor resolves before each resume.

use tracing::trace;

use crate::kernel::{read_value, write_value, Future, Invocation, NetValue};
use crate::runtime::memory::{Handle, HeapValue};
use crate::runtime::value::Value;
use crate::std::{check_str, NativeContext, NativeExport, NativeOutcome, StdModule};
use crate::vm::{bad_argument, VMError, VMResult};

// ============================================================================
// ComponentModule - StdModule Implementation
// ============================================================================

pub struct ComponentModule;

impl StdModule for ComponentModule {
    fn module_path(&self) -> &str {
        "component"
    }

    fn exports(&self) -> Vec<NativeExport> {
        vec![NativeExport::new(
            "invoke",
            "component.invoke",
            "(method: string, ...) -> ... | Future",
            native_invoke,
        )]
    }
}

/// Singleton instance for the component library.
pub const COMPONENT_MODULE: ComponentModule = ComponentModule;

// ============================================================================
// FutureMethods - StdModule Implementation
// ============================================================================

pub struct FutureMethods;

impl StdModule for FutureMethods {
    fn module_path(&self) -> &str {
        "Future"
    }

    fn exports(&self) -> Vec<NativeExport> {
        vec![
            NativeExport::new("await", "Future.await", "(self) -> ...", native_await),
            NativeExport::new("get", "Future.get", "(self) -> ... | nil", native_get),
            NativeExport::new("canGet", "Future.canGet", "(self) -> boolean", native_can_get),
        ]
    }

    fn is_method_table(&self) -> bool {
        true
    }
}

/// Singleton instance for the future methods.
pub const FUTURE_METHODS: FutureMethods = FutureMethods;

// ============================================================================
// Native Function Implementations
// ============================================================================

fn native_invoke(
    args: &[Value],
    ctx: &mut NativeContext<'_, '_>,
) -> VMResult<NativeOutcome> {
    let method = check_str(args, 0, "invoke")?;
    let mut input = Vec::with_capacity(args.len().saturating_sub(1));
    for (i, value) in args.iter().enumerate().skip(1) {
        let value = write_value(ctx.heap, value).map_err(|msg| bad_argument(i + 1, "invoke", &msg))?;
        input.push(value);
    }

    match ctx.host.kernel.invoke(&method, input.clone()).map_err(VMError::Runtime)? {
        Invocation::Ready(output) => {
            let values = output.iter().map(|v| read_value(ctx.heap, v)).collect();
            Ok(NativeOutcome::ApiReturn(values))
        }
        Invocation::Deferred => {
            trace!(method = %method, "device call deferred");
            let future = ctx.heap.allocate(HeapValue::Future(Future::new(method, input)));
            Ok(NativeOutcome::ApiReturn(vec![Value::Future(future)]))
        }
    }
}

fn check_future(
    args: &[Value],
    fname: &str,
) -> VMResult<Handle> {
    match args.first() {
        Some(Value::Future(h)) => Ok(*h),
        other => Err(bad_argument(
            1,
            fname,
            &format!(
                "Future expected, got {}",
                other.map(|v| v.type_name()).unwrap_or("no value")
            ),
        )),
    }
}

/// Retrieve side of a future: `None` while pending
fn retrieve(
    ctx: &mut NativeContext<'_, '_>,
    future: Handle,
) -> VMResult<Option<Vec<Value>>> {
    let output: Option<Result<Vec<NetValue>, String>> = ctx.heap.future(future)?.output.clone();
    match output {
        Some(Ok(values)) => Ok(Some(values.iter().map(|v| read_value(ctx.heap, v)).collect())),
        Some(Err(message)) => Err(VMError::Runtime(message)),
        None => Ok(None),
    }
}

fn native_await(
    args: &[Value],
    ctx: &mut NativeContext<'_, '_>,
) -> VMResult<NativeOutcome> {
    let future = check_future(args, "await")?;
    match retrieve(ctx, future)? {
        Some(values) => Ok(NativeOutcome::Return(values)),
        None => Ok(NativeOutcome::Await(future)),
    }
}

fn native_get(
    args: &[Value],
    ctx: &mut NativeContext<'_, '_>,
) -> VMResult<NativeOutcome> {
    let future = check_future(args, "get")?;
    match retrieve(ctx, future)? {
        Some(values) => Ok(NativeOutcome::Return(values)),
        None => Ok(NativeOutcome::Return(vec![Value::Nil])),
    }
}

fn native_can_get(
    args: &[Value],
    ctx: &mut NativeContext<'_, '_>,
) -> VMResult<NativeOutcome> {
    let future = check_future(args, "canGet")?;
    let ready = ctx.heap.future(future)?.is_resolved();
    Ok(NativeOutcome::Return(vec![Value::Bool(ready)]))
}
