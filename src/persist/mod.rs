//! State snapshot codec
//!
//! 快照编解码：挂起的执行上下文 → 两段 base64 文本（全局表、主协程）。
//!
//! A snapshot is only taken while the context is suspended at a yield. The
//! globals section carries the compiled program so restored closures resolve
//! their prototypes; the thread section links into the globals section for
//! shared objects. Each section is bincode-encoded, then base64 text-encoded.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use thiserror::Error;
use tracing::debug;

use crate::runtime::memory::{Handle, HeapError};
use crate::runtime::value::Value;
use crate::vm::{VMStatus, VM};

mod graph;
mod perm;

pub use perm::{Permanent, PermanentTable};

use graph::{decode, Encoder, Section};

/// Persistence errors, always recovered by the processor
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("execution context is not suspended")]
    NotSuspended,
    #[error("encoding failed: {0}")]
    Codec(#[from] bincode::Error),
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("{0}")]
    Heap(#[from] HeapError),
    #[error("dangling reference to {0}")]
    Dangling(Handle),
    #[error("unknown permanent object '{0}'")]
    UnknownPermanent(String),
    #[error("built-in '{0}' does not match the registered libraries")]
    NativeMismatch(String),
    #[error("reference to missing globals entry {0}")]
    DanglingShared(u32),
    #[error("malformed snapshot: {0}")]
    Malformed(String),
}

/// The two text sections of a snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub globals: String,
    pub thread: String,
}

/// Whether a stored section holds nothing worth restoring
pub fn is_trivial(section: &str) -> bool {
    STANDARD
        .decode(section.trim())
        .map(|bytes| bytes.len() <= 1)
        .unwrap_or(section.trim().is_empty())
}

/// Encode the suspended context
pub fn snapshot(vm: &mut VM) -> Result<Snapshot, PersistError> {
    if vm.status() != VMStatus::Yielded {
        return Err(PersistError::NotSuspended);
    }

    // `_G` points back at the globals table; keep it out of the graph
    let globals = vm.globals;
    let self_ref = vm.heap.table_mut(globals)?.get_str("_G");
    vm.heap.table_mut(globals)?.set_str("_G", Value::Nil);
    let result = encode_sections(vm);
    vm.heap.table_mut(globals)?.set_str("_G", self_ref);

    let (globals_section, thread_section) = result?;
    let snapshot = Snapshot {
        globals: STANDARD.encode(bincode::serialize(&globals_section)?),
        thread: STANDARD.encode(bincode::serialize(&thread_section)?),
    };
    debug!(
        globals = snapshot.globals.len(),
        thread = snapshot.thread.len(),
        "snapshot encoded"
    );
    Ok(snapshot)
}

fn encode_sections(vm: &VM) -> Result<(Section, Section), PersistError> {
    let (globals_section, shared) = Encoder::new(&vm.heap, &vm.perms, None).encode(
        &Value::Table(vm.globals),
        &vm.natives,
        Some((*vm.program).clone()),
    )?;
    let (thread_section, _) = Encoder::new(&vm.heap, &vm.perms, Some(&shared)).encode(
        &Value::Thread(vm.main),
        &vm.natives,
        None,
    )?;
    Ok((globals_section, thread_section))
}

/// Free decoded objects again, leaving the permanent built-ins alone
fn release(
    vm: &mut VM,
    handles: &[Handle],
) {
    let perms: Vec<Handle> = vm.perms.handles().collect();
    for handle in handles {
        if !perms.contains(handle) {
            vm.heap.deallocate(*handle);
        }
    }
}

/// Restore a snapshot into a freshly built context
///
/// Either both sections are installed or the context is left as it was.
pub fn restore(
    vm: &mut VM,
    globals: &str,
    thread: &str,
) -> Result<(), PersistError> {
    let globals_section: Section = bincode::deserialize(&STANDARD.decode(globals.trim())?)?;
    let thread_section: Section = bincode::deserialize(&STANDARD.decode(thread.trim())?)?;
    let program = globals_section
        .program
        .clone()
        .ok_or_else(|| PersistError::Malformed("globals section carries no program".into()))?;
    let proto_count = program.protos.len();

    let (shared, globals_root) = decode(
        &mut vm.heap,
        &vm.perms,
        &vm.natives,
        globals_section,
        None,
        proto_count,
    )?;
    let thread_result = decode(
        &mut vm.heap,
        &vm.perms,
        &vm.natives,
        thread_section,
        Some(&shared),
        proto_count,
    );
    let (thread_map, thread_root) = match thread_result {
        Ok(decoded) => decoded,
        Err(err) => {
            release(vm, &shared);
            return Err(err);
        }
    };

    let roots = match (globals_root, thread_root) {
        (Value::Table(globals), Value::Thread(main)) if vm.heap.thread(main).is_ok() => {
            Ok((globals, main))
        }
        (Value::Table(_), _) => Err("thread section root is not a coroutine"),
        _ => Err("globals section root is not a table"),
    };
    let (globals, main) = match roots {
        Ok(roots) => roots,
        Err(message) => {
            release(vm, &thread_map);
            release(vm, &shared);
            return Err(PersistError::Malformed(message.into()));
        }
    };

    vm.heap.table_mut(globals)?.set_str("_G", Value::Table(globals));
    vm.install_snapshot(globals, main, program);
    debug!(objects = vm.heap.len(), "snapshot restored");
    Ok(())
}

#[cfg(test)]
mod tests;
