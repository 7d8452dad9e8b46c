//! Host collaborator interfaces
//!
//! 宿主接口：处理器只通过这些 trait 与外部世界交互。
//!
//! The processor never owns the machine it runs in. Everything outside the
//! script core (power state, the network, file systems, devices, the serial
//! console) is reached through [`Kernel`], so the core can be embedded in any
//! host and tested against [`sim::SimKernel`].

use std::cell::{Cell, RefCell};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

pub mod fs;
pub mod future;
pub mod net;
pub mod sim;

pub use fs::{FileContainer, FileMode, FileRef, FileStream, FileSystem, FileTransfer, FsError, SeekWhence, SharedFile};
pub use future::Future;
pub use net::{read_value, write_value, NetValue};
pub use sim::{MemoryFileSystem, SimKernel};

/// Power state of the owning machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KernelState {
    Shutoff,
    Running,
    Crashed,
}

/// A crash reported to the owning machine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelCrash {
    pub message: String,
}

impl KernelCrash {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for KernelCrash {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Resource classes the owning machine accounts for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Processor,
    Memory,
}

/// Route a signal took through the network, sender first
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkTrace {
    pub path: Vec<String>,
}

impl NetworkTrace {
    pub fn new(path: Vec<String>) -> Self {
        Self { path }
    }

    pub fn from_sender(sender: &str) -> Self {
        Self {
            path: vec![sender.to_string()],
        }
    }

    /// Originating component
    pub fn sender(&self) -> Option<&str> {
        self.path.first().map(String::as_str)
    }
}

impl fmt::Display for NetworkTrace {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "Trace({})", self.path.join(" -> "))
    }
}

/// An asynchronous signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub name: String,
    pub params: Vec<NetValue>,
}

impl Signal {
    pub fn new(
        name: impl Into<String>,
        params: Vec<NetValue>,
    ) -> Self {
        Self {
            name: name.into(),
            params,
        }
    }
}

/// Signal queue of the surrounding network model
pub trait SignalSource {
    fn signal_count(&self) -> usize;

    /// Pop the oldest signal; `None` when the queued entry could not be decoded
    fn pop_signal(&mut self) -> Option<(Signal, NetworkTrace)>;
}

/// Answer of a device invocation
#[derive(Debug, Clone, PartialEq)]
pub enum Invocation {
    Ready(Vec<NetValue>),
    /// Completed later through [`Kernel::resolve_future`]
    Deferred,
}

/// Program source provider
pub trait Eeprom {
    fn code(&self) -> Option<String>;
}

impl Eeprom for String {
    fn code(&self) -> Option<String> {
        Some(self.clone())
    }
}

impl Eeprom for RefCell<String> {
    fn code(&self) -> Option<String> {
        Some(self.borrow().clone())
    }
}

/// The machine a processor is mounted in
pub trait Kernel {
    fn state(&self) -> KernelState;

    fn crash(
        &mut self,
        crash: KernelCrash,
    );

    fn stop(&mut self);

    /// Resource accounting sink
    fn recalculate_resources(
        &mut self,
        kind: ResourceKind,
    );

    fn network(&mut self) -> &mut dyn SignalSource;

    fn filesystem(&mut self) -> Option<&mut dyn FileSystem>;

    fn serial_write(
        &mut self,
        line: &str,
    ) -> Result<(), String>;

    fn invoke(
        &mut self,
        method: &str,
        args: Vec<NetValue>,
    ) -> Result<Invocation, String>;

    /// Completion of a deferred invocation, `None` while still pending
    fn resolve_future(
        &mut self,
        method: &str,
        args: &[NetValue],
    ) -> Option<Result<Vec<NetValue>, String>>;
}

/// Wall clock, milliseconds since the UNIX epoch
pub trait Clock {
    fn now_ms(&self) -> u64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Clock advanced by hand, for tests and simulations
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Cell<u64>,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: Cell::new(start_ms),
        }
    }

    pub fn advance(
        &self,
        ms: u64,
    ) {
        self.now.set(self.now.get() + ms);
    }

    pub fn set(
        &self,
        ms: u64,
    ) {
        self.now.set(ms);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.get()
    }
}
