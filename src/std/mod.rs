//! Guest libraries
//!
//! 标准库：每个库实现 [`StdModule`]，导出一组原生函数。
//!
//! Libraries are installed in [`MODULES`] order every time an execution
//! context is built. A native's [`NativeId`] is its index in that sequence and
//! every native and library table is entered into the permanent-object table
//! under its qualified name, so snapshots resolve built-ins by name.

use rand::rngs::StdRng;

use crate::persist::PermanentTable;
use crate::processor::HostContext;
use crate::runtime::memory::{Handle, Heap, HeapValue, Table};
use crate::runtime::value::{NativeId, Value};
use crate::vm::{bad_argument, VMError, VMResult};

pub mod base;
pub mod component;
pub mod computer;
pub mod coroutine;
pub mod event;
pub mod filesystem;
pub mod math;
pub mod string;
pub mod table;

#[cfg(test)]
mod tests;

/// Native function handler
pub type NativeHandler = fn(&[Value], &mut NativeContext<'_, '_>) -> VMResult<NativeOutcome>;

/// How a native call completes
#[derive(Debug, Clone, PartialEq)]
pub enum NativeOutcome {
    /// Plain return
    Return(Vec<Value>),
    /// Return through the API-return gate; parked across the tick boundary
    /// once the tick is exhausted
    ApiReturn(Vec<Value>),
    /// User yield with these values
    Yield(Vec<Value>),
    /// Resume a nested coroutine
    Resume {
        thread: Handle,
        args: Vec<Value>,
        /// Leading `true` flag: cascading host yields are returned to the caller
        propagate: bool,
    },
    /// Suspend to the host; the next resume's arguments become the results
    HostYield,
    /// Suspend until the future is resolved
    Await(Handle),
}

/// Represents a function exported from a library.
#[derive(Debug, Clone)]
pub struct NativeExport {
    /// Short name (e.g., "print")
    pub short_name: &'static str,
    /// Fully qualified name, the permanent-object key (e.g., "string.format")
    pub qualified_name: &'static str,
    /// Signature shown by `tickcore natives`
    pub signature: &'static str,
    pub func: NativeHandler,
}

impl NativeExport {
    pub fn new(
        short_name: &'static str,
        qualified_name: &'static str,
        signature: &'static str,
        func: NativeHandler,
    ) -> Self {
        Self {
            short_name,
            qualified_name,
            signature,
            func,
        }
    }
}

/// A guest library
pub trait StdModule {
    /// Name of the library table; `_G` installs the exports as globals
    fn module_path(&self) -> &str;

    fn exports(&self) -> Vec<NativeExport>;

    /// Non-function fields of the library table
    fn constants(&self) -> Vec<(&'static str, Value)> {
        Vec::new()
    }

    /// Method tables are kept in the registry instead of the globals
    fn is_method_table(&self) -> bool {
        false
    }
}

/// Library tables the executor needs for method lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registry {
    /// `string` library, indexed by string values
    pub string: Handle,
    /// Methods of file handles
    pub file: Handle,
    /// Methods of futures
    pub future: Handle,
    /// Iterator returned by `pairs`
    pub next: NativeId,
    /// Iterator returned by `ipairs`
    pub ipairs_iter: NativeId,
}

/// Execution context handed to every native call
pub struct NativeContext<'a, 'h> {
    pub heap: &'a mut Heap,
    pub registry: &'a Registry,
    pub globals: Handle,
    /// Coroutine making the call
    pub current: Handle,
    /// Whether the caller is the main thread
    pub is_main: bool,
    pub host: &'a mut HostContext<'h>,
    pub rng: &'a mut StdRng,
}

/// Installation order, fixed
pub const MODULES: &[&dyn StdModule] = &[
    &base::BASE_MODULE,
    &coroutine::COROUTINE_MODULE,
    &math::MATH_MODULE,
    &string::STRING_MODULE,
    &table::TABLE_MODULE,
    &event::EVENT_MODULE,
    &computer::COMPUTER_MODULE,
    &filesystem::FILESYSTEM_MODULE,
    &component::COMPONENT_MODULE,
    &filesystem::FILE_METHODS,
    &component::FUTURE_METHODS,
];

/// Register every library into a fresh heap
pub fn install(
    heap: &mut Heap,
    globals: Handle,
    perms: &mut PermanentTable,
) -> VMResult<(Vec<NativeExport>, Registry)> {
    let mut natives: Vec<NativeExport> = Vec::new();
    let mut string = None;
    let mut file = None;
    let mut future = None;

    for module in MODULES {
        let path = module.module_path();
        let target = if path == "_G" {
            globals
        } else {
            heap.allocate(HeapValue::Table(Table::new()))
        };

        for export in module.exports() {
            let id = NativeId(natives.len() as u16);
            heap.table_mut(target)?.set_str(export.short_name, Value::Native(id));
            perms.insert_native(export.qualified_name, id);
            natives.push(export);
        }
        for (name, value) in module.constants() {
            heap.table_mut(target)?.set_str(name, value);
        }

        if path == "_G" {
            continue;
        }
        perms.insert_object(path, target);
        if !module.is_method_table() {
            heap.table_mut(globals)?.set_str(path, Value::Table(target));
        }
        match path {
            "string" => string = Some(target),
            "File" => file = Some(target),
            "Future" => future = Some(target),
            _ => {}
        }
    }

    let missing = |name: &str| VMError::InvalidState(format!("'{}' not installed", name));
    let native = |name: &str| {
        natives
            .iter()
            .position(|e| e.qualified_name == name)
            .map(|i| NativeId(i as u16))
            .ok_or_else(|| missing(name))
    };
    let registry = Registry {
        string: string.ok_or_else(|| missing("string"))?,
        file: file.ok_or_else(|| missing("File"))?,
        future: future.ok_or_else(|| missing("Future"))?,
        next: native("next")?,
        ipairs_iter: native("ipairs.iter")?,
    };
    Ok((natives, registry))
}

/// Every export in installation order, without building a context
pub fn all_exports() -> Vec<NativeExport> {
    MODULES.iter().flat_map(|m| m.exports()).collect()
}

// ============================================================================
// Argument helpers
// ============================================================================

pub(crate) fn arg(
    args: &[Value],
    n: usize,
) -> Value {
    args.get(n).cloned().unwrap_or_default()
}

pub(crate) fn check_table(
    args: &[Value],
    n: usize,
    fname: &str,
) -> VMResult<Handle> {
    match args.get(n) {
        Some(Value::Table(h)) => Ok(*h),
        other => Err(bad_argument(
            n + 1,
            fname,
            &format!("table expected, got {}", type_of(other)),
        )),
    }
}

pub(crate) fn check_int(
    args: &[Value],
    n: usize,
    fname: &str,
) -> VMResult<i64> {
    match args.get(n) {
        Some(v) => match v.to_number() {
            Some(Value::Int(i)) => Ok(i),
            Some(Value::Float(f)) => crate::runtime::value::float_to_int(f)
                .ok_or_else(|| bad_argument(n + 1, fname, "number has no integer representation")),
            _ => Err(bad_argument(
                n + 1,
                fname,
                &format!("number expected, got {}", v.type_name()),
            )),
        },
        None => Err(bad_argument(n + 1, fname, "number expected, got no value")),
    }
}

pub(crate) fn opt_int(
    args: &[Value],
    n: usize,
    fname: &str,
    default: i64,
) -> VMResult<i64> {
    match args.get(n) {
        None | Some(Value::Nil) => Ok(default),
        Some(_) => check_int(args, n, fname),
    }
}

pub(crate) fn check_number(
    args: &[Value],
    n: usize,
    fname: &str,
) -> VMResult<Value> {
    match args.get(n).and_then(|v| v.to_number()) {
        Some(v) => Ok(v),
        None => Err(bad_argument(
            n + 1,
            fname,
            &format!("number expected, got {}", type_of(args.get(n))),
        )),
    }
}

pub(crate) fn check_f64(
    args: &[Value],
    n: usize,
    fname: &str,
) -> VMResult<f64> {
    check_number(args, n, fname).map(|v| v.as_f64().unwrap_or(f64::NAN))
}

pub(crate) fn check_str(
    args: &[Value],
    n: usize,
    fname: &str,
) -> VMResult<String> {
    match args.get(n) {
        Some(Value::Str(s)) => Ok(s.to_string()),
        Some(v @ (Value::Int(_) | Value::Float(_))) => Ok(v.to_string()),
        other => Err(bad_argument(
            n + 1,
            fname,
            &format!("string expected, got {}", type_of(other)),
        )),
    }
}

pub(crate) fn check_thread(
    args: &[Value],
    n: usize,
    fname: &str,
) -> VMResult<Handle> {
    match args.get(n) {
        Some(Value::Thread(h)) => Ok(*h),
        other => Err(bad_argument(
            n + 1,
            fname,
            &format!("coroutine expected, got {}", type_of(other)),
        )),
    }
}

fn type_of(value: Option<&Value>) -> &'static str {
    value.map(|v| v.type_name()).unwrap_or("no value")
}

/// `tostring` without metatables
pub(crate) fn to_display(value: &Value) -> String {
    value.to_string()
}
