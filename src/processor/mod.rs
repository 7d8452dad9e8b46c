//! Processor and tick scheduler
//!
//! 处理器：每个宿主 tick 调用一次 [`Processor::tick`]，在预算内恢复客户程序。
//!
//! A processor owns one execution context. The host drives it through
//! [`Processor::reset`], [`Processor::tick`] and the three-phase save/load
//! contract ([`Processor::pre_serialize`], [`Processor::serialize`],
//! [`Processor::post_serialize`]). Guest-facing failures crash the owning
//! kernel; persistence failures are only logged.

use std::rc::Rc;

use tracing::{debug, error, info, warn};

use crate::frontend;
use crate::kernel::{Clock, Eeprom, Kernel, KernelCrash, KernelState, ResourceKind, SystemClock};
use crate::persist;
use crate::util::config::ProcessorConfig;
use crate::vm::{ResumeStatus, VMStatus, VM};

pub mod files;
pub mod storage;

pub use files::FileTracker;
pub use storage::ProcessorStateStorage;

// ============================================================================
// Pull state
// ============================================================================

/// Signal pull state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PullState {
    #[default]
    None,
    /// Pulling with a timeout
    Timed,
    /// Pulling without a timeout
    Unbounded,
}

impl PullState {
    pub fn as_u8(self) -> u8 {
        match self {
            PullState::None => 0,
            PullState::Timed => 1,
            PullState::Unbounded => 2,
        }
    }

    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => PullState::Timed,
            2 => PullState::Unbounded,
            _ => PullState::None,
        }
    }
}

/// A pending signal pull
#[derive(Debug, Clone, PartialEq)]
pub struct PullSlot {
    pub state: PullState,
    /// Seconds; -1 when unbounded
    pub timeout: f64,
    /// Wall-clock start, milliseconds since the UNIX epoch
    pub start_ms: u64,
}

impl Default for PullSlot {
    fn default() -> Self {
        Self {
            state: PullState::None,
            timeout: -1.0,
            start_ms: 0,
        }
    }
}

impl PullSlot {
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn begin(
        &mut self,
        timeout: Option<f64>,
        now_ms: u64,
    ) {
        match timeout {
            Some(secs) => {
                self.state = PullState::Timed;
                self.timeout = secs;
            }
            None => {
                self.state = PullState::Unbounded;
                self.timeout = -1.0;
            }
        }
        self.start_ms = now_ms;
    }

    pub fn is_pulling(&self) -> bool {
        self.state != PullState::None
    }

    /// Whether a timed pull has waited at least its timeout, in wall-clock time
    pub fn timed_out(
        &self,
        now_ms: u64,
    ) -> bool {
        match self.state {
            PullState::Timed => {
                let elapsed = now_ms.saturating_sub(self.start_ms) as f64 / 1000.0;
                elapsed >= self.timeout
            }
            PullState::None | PullState::Unbounded => false,
        }
    }
}

// ============================================================================
// Host context
// ============================================================================

/// What host-boundary natives may touch during one resume
pub struct HostContext<'h> {
    pub kernel: &'h mut dyn Kernel,
    pub pull: &'h mut PullSlot,
    pub files: &'h mut FileTracker,
    pub clock: &'h dyn Clock,
    /// Accumulated simulation seconds
    pub uptime: f64,
    /// Wall-clock time the context was built
    pub built_ms: u64,
}

fn crash(
    kernel: &mut dyn Kernel,
    message: impl Into<String>,
) {
    let crash = KernelCrash::new(message);
    warn!("processor crashed: {}", crash.message);
    kernel.crash(crash);
}

// ============================================================================
// Processor
// ============================================================================

pub struct Processor {
    config: ProcessorConfig,
    eeprom: Option<Rc<dyn Eeprom>>,
    vm: Option<VM>,
    pull: PullSlot,
    files: FileTracker,
    clock: Rc<dyn Clock>,
    uptime: f64,
    built_ms: u64,
    /// Storage read during load, restored in post-serialize
    restore: Option<ProcessorStateStorage>,
}

impl std::fmt::Debug for Processor {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Processor")
            .field("status", &self.status())
            .field("pull", &self.pull)
            .field("files", &self.files.len())
            .finish()
    }
}

impl Processor {
    pub fn new(config: ProcessorConfig) -> Self {
        Self::with_clock(config, Rc::new(SystemClock))
    }

    pub fn with_clock(
        config: ProcessorConfig,
        clock: Rc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            eeprom: None,
            vm: None,
            pull: PullSlot::default(),
            files: FileTracker::new(),
            clock,
            uptime: 0.0,
            built_ms: 0,
            restore: None,
        }
    }

    pub fn set_eeprom(
        &mut self,
        eeprom: Option<Rc<dyn Eeprom>>,
    ) {
        self.eeprom = eeprom;
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    pub fn vm(&self) -> Option<&VM> {
        self.vm.as_ref()
    }

    /// Status of the execution context, `None` before the first reset
    pub fn status(&self) -> Option<VMStatus> {
        self.vm.as_ref().map(VM::status)
    }

    pub fn pull(&self) -> &PullSlot {
        &self.pull
    }

    pub fn open_files(&self) -> usize {
        self.files.len()
    }

    /// Heap usage estimate of the execution context
    pub fn memory_usage(&self) -> usize {
        self.vm.as_ref().map(VM::memory_usage).unwrap_or(0)
    }

    /// Rebuild the execution context from the program source
    pub fn reset(
        &mut self,
        kernel: &mut dyn Kernel,
    ) {
        if kernel.state() != KernelState::Running {
            debug!("reset skipped, kernel not running");
            return;
        }

        self.files.close_all();
        self.pull.clear();
        self.vm = None;
        self.uptime = 0.0;
        self.built_ms = self.clock.now_ms();

        let Some(code) = self.eeprom.as_ref().and_then(|e| e.code()) else {
            crash(kernel, "No Valid EEPROM set");
            return;
        };
        let program = match frontend::compile(&code) {
            Ok(program) => program,
            Err(err) => {
                crash(kernel, err.to_string());
                return;
            }
        };
        match VM::new(program, (&self.config).into()) {
            Ok(vm) => {
                debug!(speed = self.config.speed, "execution context ready");
                self.vm = Some(vm);
            }
            Err(err) => crash(kernel, err.to_string()),
        }
    }

    /// Advance by one host tick
    pub fn tick(
        &mut self,
        kernel: &mut dyn Kernel,
        delta: f64,
    ) {
        if kernel.state() != KernelState::Running {
            return;
        }
        self.uptime += delta;
        self.run_tick(kernel);
        self.files.reconcile();
    }

    fn run_tick(
        &mut self,
        kernel: &mut dyn Kernel,
    ) {
        let Some(vm) = self.vm.as_mut() else {
            return;
        };
        if !vm.is_resumable() {
            return;
        }

        let now = self.clock.now_ms();
        let args = if self.pull.is_pulling() {
            if kernel.network().signal_count() > 0 {
                self.pull.clear();
                match kernel.network().pop_signal() {
                    Some((signal, sender)) => vm.signal_values(signal, sender),
                    None => {
                        vm.mark_crashed();
                        crash(kernel, "malformed signal");
                        return;
                    }
                }
            } else if self.pull.timed_out(now) {
                self.pull.clear();
                Vec::new()
            } else {
                return;
            }
        } else {
            Vec::new()
        };

        vm.begin_tick();
        vm.resolve_futures(kernel);
        let result = {
            let mut host = HostContext {
                kernel: &mut *kernel,
                pull: &mut self.pull,
                files: &mut self.files,
                clock: &*self.clock,
                uptime: self.uptime,
                built_ms: self.built_ms,
            };
            vm.resume(&mut host, args)
        };

        match result {
            Ok(ResumeStatus::Yielded) => {
                if self.config.gc_after_yield {
                    let stats = vm.collect_garbage();
                    debug!(live = stats.live, freed = stats.freed, "collected");
                }
                if let Some(limit) = self.config.memory_limit {
                    if vm.memory_usage() > limit {
                        vm.mark_crashed();
                        crash(kernel, "not enough memory");
                        return;
                    }
                }
                kernel.recalculate_resources(ResourceKind::Processor);
            }
            Ok(ResumeStatus::Finished) => {
                info!("program finished");
                kernel.stop();
            }
            Err(err) => crash(kernel, err.to_string()),
        }
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// First save/load phase: park open files before a save
    pub fn pre_serialize(
        &mut self,
        loading: bool,
    ) {
        if !loading {
            self.files.park_all();
        }
    }

    /// Second phase: write the snapshot into `storage`, or stash it for loading
    ///
    /// A failed snapshot leaves `storage` untouched.
    pub fn serialize(
        &mut self,
        storage: &mut ProcessorStateStorage,
        loading: bool,
    ) {
        if loading {
            self.restore = Some(storage.clone());
            return;
        }

        let Some(vm) = self.vm.as_mut() else {
            return;
        };
        if vm.status() != VMStatus::Yielded {
            debug!(status = ?vm.status(), "no snapshot, context not suspended");
            return;
        }
        match persist::snapshot(vm) {
            Ok(snapshot) => {
                storage.pull_state = self.pull.state.as_u8();
                storage.timeout = self.pull.timeout;
                storage.pull_start = self.pull.start_ms;
                storage.globals = snapshot.globals;
                storage.thread = snapshot.thread;
            }
            Err(err) => error!("failed to snapshot processor state: {}", err),
        }
    }

    /// Third phase: on load, rebuild the context and restore the stashed snapshot
    pub fn post_serialize(
        &mut self,
        kernel: &mut dyn Kernel,
        loading: bool,
    ) {
        if !loading {
            return;
        }
        let Some(storage) = self.restore.take() else {
            return;
        };

        self.reset(kernel);
        if persist::is_trivial(&storage.globals) && persist::is_trivial(&storage.thread) {
            return;
        }
        let Some(vm) = self.vm.as_mut() else {
            return;
        };
        match persist::restore(vm, &storage.globals, &storage.thread) {
            Ok(()) => {
                self.pull.state = PullState::from_u8(storage.pull_state);
                self.pull.timeout = storage.timeout;
                self.pull.start_ms = storage.pull_start;
                self.files.adopt(vm.heap());
                info!("processor state restored");
            }
            Err(err) => error!("failed to restore processor state: {}", err),
        }
    }

    /// Run the full save sequence
    pub fn save(&mut self) -> ProcessorStateStorage {
        let mut storage = ProcessorStateStorage::default();
        self.pre_serialize(false);
        self.serialize(&mut storage, false);
        storage
    }

    /// Run the full load sequence
    pub fn load(
        &mut self,
        kernel: &mut dyn Kernel,
        storage: &ProcessorStateStorage,
    ) {
        let mut storage = storage.clone();
        self.pre_serialize(true);
        self.serialize(&mut storage, true);
        self.post_serialize(kernel, true);
    }

    // ========================================================================
    // File system listeners
    // ========================================================================

    /// A file system was unmounted: close handles that are no longer persistable
    pub fn on_unmounted(
        &mut self,
        kernel: &mut dyn Kernel,
        path: &str,
    ) {
        let fs = kernel.filesystem();
        let closed = self.files.close_where(|c| match &fs {
            Some(fs) => !fs.check_unpersist_path(&c.path),
            None => true,
        });
        debug!(path, closed, "unmount handled");
    }

    /// A file system node was removed: close handles on exactly that path
    pub fn on_node_removed(
        &mut self,
        kernel: &mut dyn Kernel,
        path: &str,
    ) {
        let removed = match kernel.filesystem() {
            Some(fs) => fs.unpersist_path(path),
            None => path.to_string(),
        };
        let closed = self.files.close_where(|c| c.path == removed);
        debug!(path, closed, "node removal handled");
    }
}
