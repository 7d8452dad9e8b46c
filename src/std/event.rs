//! Event library
//!
//! `event.pull` is the guest side of the signal pull: a queued signal is
//! returned right away, otherwise the pull state is armed and the coroutine
//! suspends to the host, which resumes it with the next signal or with no
//! values once the timeout elapses.

use crate::kernel::{read_value, NetworkTrace, Signal};
use crate::runtime::memory::{Heap, HeapValue};
use crate::runtime::value::Value;
use crate::std::{check_f64, NativeContext, NativeExport, NativeOutcome, StdModule};
use crate::vm::{VMError, VMResult};

// ============================================================================
// EventModule - StdModule Implementation
// ============================================================================

pub struct EventModule;

impl StdModule for EventModule {
    fn module_path(&self) -> &str {
        "event"
    }

    fn exports(&self) -> Vec<NativeExport> {
        vec![NativeExport::new(
            "pull",
            "event.pull",
            "(timeout?: number) -> (name, sender, ...)",
            native_pull,
        )]
    }
}

/// Singleton instance for the event library.
pub const EVENT_MODULE: EventModule = EventModule;

/// Values a pulled signal produces: name, sender object, then the parameters
pub(crate) fn signal_values(
    heap: &mut Heap,
    signal: Signal,
    sender: NetworkTrace,
) -> Vec<Value> {
    let mut values = Vec::with_capacity(signal.params.len() + 2);
    values.push(Value::str(&signal.name));
    values.push(Value::Object(heap.allocate(HeapValue::Object(sender))));
    for param in &signal.params {
        values.push(read_value(heap, param));
    }
    values
}

// ============================================================================
// Native Function Implementations
// ============================================================================

fn native_pull(
    args: &[Value],
    ctx: &mut NativeContext<'_, '_>,
) -> VMResult<NativeOutcome> {
    let timeout = match args.first() {
        None | Some(Value::Nil) => None,
        Some(_) => Some(check_f64(args, 0, "pull")?.max(0.0)),
    };

    let network = ctx.host.kernel.network();
    if network.signal_count() > 0 {
        let (signal, sender) = network.pop_signal().ok_or(VMError::MalformedSignal)?;
        let values = signal_values(ctx.heap, signal, sender);
        return Ok(NativeOutcome::ApiReturn(values));
    }
    if timeout == Some(0.0) {
        return Ok(NativeOutcome::ApiReturn(Vec::new()));
    }

    let now = ctx.host.clock.now_ms();
    ctx.host.pull.begin(timeout, now);
    Ok(NativeOutcome::HostYield)
}
