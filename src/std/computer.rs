//! Computer library

use crate::runtime::value::Value;
use crate::std::{NativeContext, NativeExport, NativeOutcome, StdModule};
use crate::vm::VMResult;

// ============================================================================
// ComputerModule - StdModule Implementation
// ============================================================================

pub struct ComputerModule;

impl StdModule for ComputerModule {
    fn module_path(&self) -> &str {
        "computer"
    }

    fn exports(&self) -> Vec<NativeExport> {
        vec![
            NativeExport::new("skip", "computer.skip", "() -> ()", native_skip),
            NativeExport::new("millis", "computer.millis", "() -> integer", native_millis),
            NativeExport::new("time", "computer.time", "() -> number", native_time),
            NativeExport::new("memory", "computer.memory", "() -> integer", native_memory),
        ]
    }
}

/// Singleton instance for the computer library.
pub const COMPUTER_MODULE: ComputerModule = ComputerModule;

// ============================================================================
// Native Function Implementations
// ============================================================================

/// Give up the rest of this tick
fn native_skip(
    _args: &[Value],
    _ctx: &mut NativeContext<'_, '_>,
) -> VMResult<NativeOutcome> {
    Ok(NativeOutcome::HostYield)
}

/// 自上下文构建以来的毫秒数（墙钟）
fn native_millis(
    _args: &[Value],
    ctx: &mut NativeContext<'_, '_>,
) -> VMResult<NativeOutcome> {
    let elapsed = ctx.host.clock.now_ms().saturating_sub(ctx.host.built_ms);
    Ok(NativeOutcome::Return(vec![Value::Int(elapsed as i64)]))
}

fn native_time(
    _args: &[Value],
    ctx: &mut NativeContext<'_, '_>,
) -> VMResult<NativeOutcome> {
    Ok(NativeOutcome::Return(vec![Value::Float(ctx.host.uptime)]))
}

fn native_memory(
    _args: &[Value],
    ctx: &mut NativeContext<'_, '_>,
) -> VMResult<NativeOutcome> {
    Ok(NativeOutcome::Return(vec![Value::Int(ctx.heap.estimated_size() as i64)]))
}
