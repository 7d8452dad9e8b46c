//! VM call frames and coroutines
//!
//! A coroutine keeps its whole execution state as data: a value stack, the
//! call frames on top of it and a [`Pending`] continuation saying what the
//! coroutine waits for while it is not running. Suspending never leaves
//! anything on the host stack, which is what makes a suspended processor
//! serializable.

use serde::{Deserialize, Serialize};

use crate::runtime::memory::{remap_value, Handle};
use crate::runtime::value::Value;

/// Call frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Running closure
    pub closure: Handle,
    /// Prototype index of the closure
    pub proto: u32,
    /// Next instruction
    pub ip: usize,
    /// Stack index of local slot 0
    pub base: usize,
    /// Results the caller expects, `None` for all
    pub want: Option<u8>,
    /// Open multi-value marks (absolute stack heights)
    pub marks: Vec<usize>,
}

impl Frame {
    /// 创建新的调用帧
    pub fn new(
        closure: Handle,
        proto: u32,
        base: usize,
        want: Option<u8>,
    ) -> Self {
        Self {
            closure,
            proto,
            ip: 0,
            base,
            want,
            marks: Vec::new(),
        }
    }

    /// Line-table index of the instruction currently executing
    pub fn current_ip(&self) -> usize {
        self.ip.saturating_sub(1)
    }
}

/// Coroutine status as reported by `coroutine.status`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThreadStatus {
    Suspended,
    Running,
    /// Resumed another coroutine and waits for it
    Normal,
    Dead,
}

impl ThreadStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ThreadStatus::Suspended => "suspended",
            ThreadStatus::Running => "running",
            ThreadStatus::Normal => "normal",
            ThreadStatus::Dead => "dead",
        }
    }
}

/// What a coroutine that is not running waits for.
///
/// This is the continuation of the suspended host call; resuming the
/// coroutine first completes that call according to the variant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum Pending {
    /// Running, or dead
    #[default]
    None,
    /// Not started; the body function receives the first resume's arguments
    Start(Value),
    /// Inside `coroutine.yield`; resume arguments become its results
    Yield { want: Option<u8> },
    /// Host call interrupted at the API-return gate; its results are returned
    /// as they are, resume arguments are ignored
    ApiReturn { values: Vec<Value>, want: Option<u8> },
    /// Waiting for the host (signal pull, tick skip); resume arguments become the results
    HostYield { want: Option<u8> },
    /// Inside `coroutine.resume(inner, ...)`. While `inner` runs this thread is
    /// `Normal`; if it is suspended in this state the yield cascaded through
    /// it, and resuming re-drives `inner` with the new arguments.
    Resume {
        inner: Handle,
        want: Option<u8>,
        /// Resumed with the leading `true` flag: a cascading yield is returned
        /// to the guest instead of being re-driven
        propagate: bool,
    },
    /// Inside `future:await()`
    Await { future: Handle, want: Option<u8> },
}

/// A coroutine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thread {
    pub status: ThreadStatus,
    pub stack: Vec<Value>,
    pub frames: Vec<Frame>,
    pub pending: Pending,
}

impl Thread {
    /// A suspended coroutine that will call `body` on its first resume
    pub fn new(body: Value) -> Self {
        Self {
            status: ThreadStatus::Suspended,
            stack: Vec::new(),
            frames: Vec::new(),
            pending: Pending::Start(body),
        }
    }

    /// Stand-in left in the heap while the real thread executes
    pub fn placeholder() -> Self {
        Self {
            status: ThreadStatus::Running,
            stack: Vec::new(),
            frames: Vec::new(),
            pending: Pending::None,
        }
    }

    /// Push values adjusted to `want`
    pub fn push_results(
        &mut self,
        mut values: Vec<Value>,
        want: Option<u8>,
    ) {
        if let Some(n) = want {
            values.resize(n as usize, Value::Nil);
        }
        self.stack.extend(values);
    }

    /// Visit every handle this thread references
    pub fn for_each_ref(
        &self,
        f: &mut impl FnMut(Handle),
    ) {
        for value in &self.stack {
            if let Some(h) = value.handle() {
                f(h);
            }
        }
        for frame in &self.frames {
            f(frame.closure);
        }
        match &self.pending {
            Pending::Start(v) => {
                if let Some(h) = v.handle() {
                    f(h);
                }
            }
            Pending::ApiReturn { values, .. } => {
                for v in values {
                    if let Some(h) = v.handle() {
                        f(h);
                    }
                }
            }
            Pending::Resume { inner, .. } => f(*inner),
            Pending::Await { future, .. } => f(*future),
            Pending::None | Pending::Yield { .. } | Pending::HostYield { .. } => {}
        }
    }

    /// Rewrite every handle this thread references
    pub fn remap_refs<E>(
        &mut self,
        f: &mut impl FnMut(Handle) -> Result<Handle, E>,
    ) -> Result<(), E> {
        for value in self.stack.iter_mut() {
            remap_value(value, f)?;
        }
        for frame in self.frames.iter_mut() {
            frame.closure = f(frame.closure)?;
        }
        match &mut self.pending {
            Pending::Start(v) => remap_value(v, f)?,
            Pending::ApiReturn { values, .. } => {
                for v in values.iter_mut() {
                    remap_value(v, f)?;
                }
            }
            Pending::Resume { inner, .. } => *inner = f(*inner)?,
            Pending::Await { future, .. } => *future = f(*future)?,
            Pending::None | Pending::Yield { .. } | Pending::HostYield { .. } => {}
        }
        Ok(())
    }

    pub fn estimated_size(&self) -> usize {
        96 + self.stack.capacity() * 24 + self.frames.capacity() * 64
    }
}
