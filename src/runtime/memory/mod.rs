//! Heap storage with handle-based allocation
//!
//! Every guest object that has identity (tables, closures, coroutines, host
//! objects) lives in the processor's `Heap` and is addressed by a [`Handle`].
//! Handles are plain integers, which keeps the whole object graph serde data:
//! the snapshot codec walks the heap and renumbers handles instead of chasing
//! pointers.

mod table;

pub use table::{InvalidNextKey, Table};

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::kernel::{Future, NetValue, NetworkTrace, SharedFile};
use crate::runtime::value::Value;
use crate::vm::Thread;

/// Handle to a value stored in the heap
///
/// Handles are opaque references that allow mutation of heap-allocated
/// values without cloning. Each handle uniquely identifies a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Handle(pub usize);

impl Handle {
    /// Create a new handle from a raw value
    pub fn new(value: usize) -> Self {
        Self(value)
    }

    /// Get the raw handle value
    pub fn raw(&self) -> usize {
        self.0
    }
}

impl fmt::Display for Handle {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "handle@{}", self.0)
    }
}

/// Heap access error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HeapError {
    /// Attempted to access an invalid handle
    #[error("invalid handle: {0}")]
    InvalidHandle(Handle),
    /// The handle points at an object of another kind
    #[error("{handle} is not a {expected}")]
    WrongKind {
        handle: Handle,
        expected: &'static str,
    },
}

/// A guest closure: a function prototype plus its captured cells
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Closure {
    /// Index into the program's prototype list
    pub proto: u32,
    /// Cell handles, one per upvalue descriptor
    pub upvalues: Vec<Handle>,
}

/// Heap value - storage for every object with identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum HeapValue {
    Table(Table),
    Closure(Closure),
    /// Storage of a captured local
    Cell(Value),
    Thread(Box<Thread>),
    File(SharedFile),
    Object(NetworkTrace),
    Future(Future),
}

impl HeapValue {
    /// Short kind name used in error messages
    pub fn kind(&self) -> &'static str {
        match self {
            HeapValue::Table(_) => "table",
            HeapValue::Closure(_) => "function",
            HeapValue::Cell(_) => "cell",
            HeapValue::Thread(_) => "thread",
            HeapValue::File(_) => "file",
            HeapValue::Object(_) => "object",
            HeapValue::Future(_) => "future",
        }
    }

    /// Visit every handle this object references
    pub fn for_each_ref(
        &self,
        f: &mut impl FnMut(Handle),
    ) {
        match self {
            HeapValue::Table(t) => t.for_each_value(&mut |v: &Value| {
                if let Some(h) = v.handle() {
                    f(h)
                }
            }),
            HeapValue::Closure(c) => {
                for h in &c.upvalues {
                    f(*h);
                }
            }
            HeapValue::Cell(v) => {
                if let Some(h) = v.handle() {
                    f(h)
                }
            }
            HeapValue::Thread(th) => th.for_each_ref(f),
            HeapValue::File(_) | HeapValue::Object(_) | HeapValue::Future(_) => {}
        }
    }

    /// Rewrite every handle this object references
    pub fn remap_refs<E>(
        &mut self,
        f: &mut impl FnMut(Handle) -> Result<Handle, E>,
    ) -> Result<(), E> {
        match self {
            HeapValue::Table(t) => t.map_values(&mut |v: &mut Value| remap_value(v, f)),
            HeapValue::Closure(c) => {
                for h in c.upvalues.iter_mut() {
                    *h = f(*h)?;
                }
                Ok(())
            }
            HeapValue::Cell(v) => remap_value(v, f),
            HeapValue::Thread(th) => th.remap_refs(f),
            HeapValue::File(_) | HeapValue::Object(_) | HeapValue::Future(_) => Ok(()),
        }
    }

    /// Rough byte footprint used for memory accounting
    pub fn estimated_size(&self) -> usize {
        match self {
            HeapValue::Table(t) => t.estimated_size(),
            HeapValue::Closure(c) => 32 + c.upvalues.len() * 8,
            HeapValue::Cell(_) => 32,
            HeapValue::Thread(th) => th.estimated_size(),
            HeapValue::File(_) => 128,
            HeapValue::Object(trace) => 32 + trace.path.iter().map(String::len).sum::<usize>(),
            HeapValue::Future(fut) => 64 + fut.method.len(),
        }
    }
}

/// Rewrite the handle inside a value, if it holds one
pub fn remap_value<E>(
    value: &mut Value,
    f: &mut impl FnMut(Handle) -> Result<Handle, E>,
) -> Result<(), E> {
    if let Some(h) = value.handle_mut() {
        *h = f(*h)?;
    }
    Ok(())
}

/// Heap storage for guest objects
#[derive(Debug, Default)]
pub struct Heap {
    /// Handle generator for allocation
    next_handle: usize,
    /// Handle to value mapping
    values: HashMap<Handle, HeapValue>,
    /// Free list for handle reuse
    free_list: Vec<Handle>,
    /// 尚未完成的 future，每 tick 只轮询这些
    pending_futures: BTreeSet<Handle>,
}

impl Heap {
    /// Create a new empty heap
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a heap value and return a handle
    pub fn allocate(
        &mut self,
        value: HeapValue,
    ) -> Handle {
        let handle = if let Some(h) = self.free_list.pop() {
            h
        } else {
            let h = Handle(self.next_handle);
            self.next_handle = self.next_handle.wrapping_add(1);
            h
        };
        self.track_future(handle, &value);
        self.values.insert(handle, value);
        handle
    }

    fn track_future(
        &mut self,
        handle: Handle,
        value: &HeapValue,
    ) {
        match value {
            HeapValue::Future(fut) if fut.output.is_none() => {
                self.pending_futures.insert(handle);
            }
            _ => {
                self.pending_futures.remove(&handle);
            }
        }
    }

    /// Get an immutable reference to a heap value by handle
    pub fn get(
        &self,
        handle: Handle,
    ) -> Option<&HeapValue> {
        self.values.get(&handle)
    }

    /// Get a mutable reference to a heap value by handle
    pub fn get_mut(
        &mut self,
        handle: Handle,
    ) -> Option<&mut HeapValue> {
        self.values.get_mut(&handle)
    }

    /// Write a heap value to an existing handle
    pub fn write(
        &mut self,
        handle: Handle,
        value: HeapValue,
    ) -> Result<(), HeapError> {
        match self.values.get_mut(&handle) {
            Some(slot) => {
                *slot = value;
                if let Some(HeapValue::Future(fut)) = self.values.get(&handle) {
                    if fut.output.is_none() {
                        self.pending_futures.insert(handle);
                        return Ok(());
                    }
                }
                self.pending_futures.remove(&handle);
                Ok(())
            }
            None => Err(HeapError::InvalidHandle(handle)),
        }
    }

    /// Deallocate a value by handle
    pub fn deallocate(
        &mut self,
        handle: Handle,
    ) -> Option<HeapValue> {
        let value = self.values.remove(&handle)?;
        self.pending_futures.remove(&handle);
        self.free_list.push(handle);
        Some(value)
    }

    /// Check if a handle is valid
    pub fn is_valid(
        &self,
        handle: Handle,
    ) -> bool {
        self.values.contains_key(&handle)
    }

    /// Get the number of allocated values
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if the heap is empty
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// All live handles
    pub fn handles(&self) -> impl Iterator<Item = Handle> + '_ {
        self.values.keys().copied()
    }

    /// Futures still waiting for their output, in handle order
    pub fn pending_futures(&self) -> impl Iterator<Item = Handle> + '_ {
        self.pending_futures.iter().copied()
    }

    /// Store the output of a future and stop tracking it
    pub fn complete_future(
        &mut self,
        handle: Handle,
        output: Result<Vec<NetValue>, String>,
    ) -> Result<(), HeapError> {
        self.future_mut(handle)?.output = Some(output);
        self.pending_futures.remove(&handle);
        Ok(())
    }

    /// Sum of per-object size estimates
    pub fn estimated_size(&self) -> usize {
        self.values.values().map(HeapValue::estimated_size).sum()
    }

    pub fn table(
        &self,
        handle: Handle,
    ) -> Result<&Table, HeapError> {
        match self.values.get(&handle) {
            Some(HeapValue::Table(t)) => Ok(t),
            Some(_) => Err(HeapError::WrongKind {
                handle,
                expected: "table",
            }),
            None => Err(HeapError::InvalidHandle(handle)),
        }
    }

    pub fn table_mut(
        &mut self,
        handle: Handle,
    ) -> Result<&mut Table, HeapError> {
        match self.values.get_mut(&handle) {
            Some(HeapValue::Table(t)) => Ok(t),
            Some(_) => Err(HeapError::WrongKind {
                handle,
                expected: "table",
            }),
            None => Err(HeapError::InvalidHandle(handle)),
        }
    }

    pub fn closure(
        &self,
        handle: Handle,
    ) -> Result<&Closure, HeapError> {
        match self.values.get(&handle) {
            Some(HeapValue::Closure(c)) => Ok(c),
            Some(_) => Err(HeapError::WrongKind {
                handle,
                expected: "function",
            }),
            None => Err(HeapError::InvalidHandle(handle)),
        }
    }

    pub fn cell(
        &self,
        handle: Handle,
    ) -> Result<&Value, HeapError> {
        match self.values.get(&handle) {
            Some(HeapValue::Cell(v)) => Ok(v),
            Some(_) => Err(HeapError::WrongKind {
                handle,
                expected: "cell",
            }),
            None => Err(HeapError::InvalidHandle(handle)),
        }
    }

    pub fn cell_mut(
        &mut self,
        handle: Handle,
    ) -> Result<&mut Value, HeapError> {
        match self.values.get_mut(&handle) {
            Some(HeapValue::Cell(v)) => Ok(v),
            Some(_) => Err(HeapError::WrongKind {
                handle,
                expected: "cell",
            }),
            None => Err(HeapError::InvalidHandle(handle)),
        }
    }

    pub fn thread(
        &self,
        handle: Handle,
    ) -> Result<&Thread, HeapError> {
        match self.values.get(&handle) {
            Some(HeapValue::Thread(th)) => Ok(th),
            Some(_) => Err(HeapError::WrongKind {
                handle,
                expected: "thread",
            }),
            None => Err(HeapError::InvalidHandle(handle)),
        }
    }

    pub fn thread_mut(
        &mut self,
        handle: Handle,
    ) -> Result<&mut Thread, HeapError> {
        match self.values.get_mut(&handle) {
            Some(HeapValue::Thread(th)) => Ok(th),
            Some(_) => Err(HeapError::WrongKind {
                handle,
                expected: "thread",
            }),
            None => Err(HeapError::InvalidHandle(handle)),
        }
    }

    /// Move a thread out of the heap, leaving an empty running placeholder behind
    pub fn take_thread(
        &mut self,
        handle: Handle,
    ) -> Result<Box<Thread>, HeapError> {
        match self.values.get_mut(&handle) {
            Some(HeapValue::Thread(th)) => {
                Ok(std::mem::replace(th, Box::new(Thread::placeholder())))
            }
            Some(_) => Err(HeapError::WrongKind {
                handle,
                expected: "thread",
            }),
            None => Err(HeapError::InvalidHandle(handle)),
        }
    }

    /// Put a thread taken with [`Heap::take_thread`] back
    pub fn put_thread(
        &mut self,
        handle: Handle,
        thread: Box<Thread>,
    ) -> Result<(), HeapError> {
        self.write(handle, HeapValue::Thread(thread))
    }

    pub fn future(
        &self,
        handle: Handle,
    ) -> Result<&Future, HeapError> {
        match self.values.get(&handle) {
            Some(HeapValue::Future(fut)) => Ok(fut),
            Some(_) => Err(HeapError::WrongKind {
                handle,
                expected: "future",
            }),
            None => Err(HeapError::InvalidHandle(handle)),
        }
    }

    pub fn future_mut(
        &mut self,
        handle: Handle,
    ) -> Result<&mut Future, HeapError> {
        match self.values.get_mut(&handle) {
            Some(HeapValue::Future(fut)) => Ok(fut),
            Some(_) => Err(HeapError::WrongKind {
                handle,
                expected: "future",
            }),
            None => Err(HeapError::InvalidHandle(handle)),
        }
    }

    pub fn file(
        &self,
        handle: Handle,
    ) -> Result<&SharedFile, HeapError> {
        match self.values.get(&handle) {
            Some(HeapValue::File(file)) => Ok(file),
            Some(_) => Err(HeapError::WrongKind {
                handle,
                expected: "file",
            }),
            None => Err(HeapError::InvalidHandle(handle)),
        }
    }

    pub fn object(
        &self,
        handle: Handle,
    ) -> Result<&NetworkTrace, HeapError> {
        match self.values.get(&handle) {
            Some(HeapValue::Object(trace)) => Ok(trace),
            Some(_) => Err(HeapError::WrongKind {
                handle,
                expected: "object",
            }),
            None => Err(HeapError::InvalidHandle(handle)),
        }
    }

    /// Clear all allocated values
    pub fn clear(&mut self) {
        self.values.clear();
        self.free_list.clear();
        self.next_handle = 0;
    }
}

#[cfg(test)]
mod tests;
