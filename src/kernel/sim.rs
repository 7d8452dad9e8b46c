//! In-memory reference host
//!
//! [`SimKernel`] implements every collaborator interface with plain data: a
//! signal FIFO, a memory file system with mount points, a serial log and a
//! table of scripted devices. The CLI and the tests drive processors with it.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use tracing::{debug, info, warn};

use crate::kernel::{
    FileMode, FileStream, FileSystem, FsError, Invocation, Kernel, KernelCrash, KernelState, NetValue, NetworkTrace,
    ResourceKind, SeekWhence, Signal, SignalSource,
};

// ============================================================================
// Signals
// ============================================================================

/// FIFO signal queue; a `None` entry models a signal that fails to decode
#[derive(Debug, Default)]
pub struct SimNetwork {
    queue: VecDeque<Option<(Signal, NetworkTrace)>>,
}

impl SimNetwork {
    pub fn push(
        &mut self,
        signal: Signal,
        sender: NetworkTrace,
    ) {
        self.queue.push_back(Some((signal, sender)));
    }

    pub fn push_malformed(&mut self) {
        self.queue.push_back(None);
    }
}

impl SignalSource for SimNetwork {
    fn signal_count(&self) -> usize {
        self.queue.len()
    }

    fn pop_signal(&mut self) -> Option<(Signal, NetworkTrace)> {
        self.queue.pop_front().flatten()
    }
}

// ============================================================================
// Memory file system
// ============================================================================

type Files = Rc<RefCell<HashMap<String, Vec<u8>>>>;

/// File system kept in memory; paths outside every mount point cannot be persisted
#[derive(Debug, Clone)]
pub struct MemoryFileSystem {
    files: Files,
    mounts: Vec<String>,
}

impl Default for MemoryFileSystem {
    fn default() -> Self {
        Self {
            files: Rc::default(),
            mounts: vec!["/".to_string()],
        }
    }
}

impl MemoryFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mount(
        &mut self,
        prefix: &str,
    ) {
        self.mounts.push(normalize(prefix));
    }

    pub fn unmount(
        &mut self,
        prefix: &str,
    ) {
        let prefix = normalize(prefix);
        self.mounts.retain(|m| *m != prefix);
    }

    pub fn contents(
        &self,
        path: &str,
    ) -> Option<String> {
        self.files
            .borrow()
            .get(&normalize(path))
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }

    pub fn put(
        &mut self,
        path: &str,
        contents: &str,
    ) {
        self.files
            .borrow_mut()
            .insert(normalize(path), contents.as_bytes().to_vec());
    }

    pub fn remove(
        &mut self,
        path: &str,
    ) {
        self.files.borrow_mut().remove(&normalize(path));
    }
}

/// Collapse `.`/`..` segments and duplicate slashes into an absolute path
pub fn normalize(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    format!("/{}", parts.join("/"))
}

fn under(
    path: &str,
    prefix: &str,
) -> bool {
    prefix == "/" || path == prefix || path.starts_with(&format!("{}/", prefix))
}

impl FileSystem for MemoryFileSystem {
    fn open(
        &mut self,
        path: &str,
        mode: FileMode,
    ) -> Result<Box<dyn FileStream>, FsError> {
        let path = normalize(path);
        let mut files = self.files.borrow_mut();
        let pos = match files.get_mut(&path) {
            Some(data) => {
                if mode.contains(FileMode::TRUNC) {
                    data.clear();
                }
                if mode.contains(FileMode::APPEND) {
                    data.len()
                } else {
                    0
                }
            }
            None if mode.contains(FileMode::WRITE) => {
                files.insert(path.clone(), Vec::new());
                0
            }
            None => return Err(FsError::NotFound(path)),
        };
        Ok(Box::new(MemoryStream {
            files: Rc::clone(&self.files),
            path,
            mode,
            pos,
            open: true,
        }))
    }

    fn exists(
        &self,
        path: &str,
    ) -> bool {
        self.files.borrow().contains_key(&normalize(path))
    }

    fn check_unpersist_path(
        &self,
        path: &str,
    ) -> bool {
        let path = normalize(path);
        self.mounts.iter().any(|m| under(&path, m))
    }

    fn unpersist_path(
        &self,
        path: &str,
    ) -> String {
        normalize(path)
    }
}

struct MemoryStream {
    files: Files,
    path: String,
    mode: FileMode,
    pos: usize,
    open: bool,
}

impl MemoryStream {
    fn check(
        &self,
        need: FileMode,
        what: &'static str,
    ) -> Result<(), FsError> {
        if !self.open {
            return Err(FsError::Closed);
        }
        if !self.mode.contains(need) {
            return Err(FsError::BadMode(what));
        }
        Ok(())
    }
}

impl FileStream for MemoryStream {
    fn read(
        &mut self,
        n: usize,
    ) -> Result<String, FsError> {
        self.check(FileMode::READ, "reading")?;
        let files = self.files.borrow();
        let data = files.get(&self.path).ok_or_else(|| FsError::NotFound(self.path.clone()))?;
        let start = self.pos.min(data.len());
        let end = (start + n).min(data.len());
        self.pos = end;
        Ok(String::from_utf8_lossy(&data[start..end]).into_owned())
    }

    fn read_all(&mut self) -> Result<String, FsError> {
        self.read(usize::MAX / 2)
    }

    fn write(
        &mut self,
        text: &str,
    ) -> Result<(), FsError> {
        self.check(FileMode::WRITE, "writing")?;
        let mut files = self.files.borrow_mut();
        let data = files.entry(self.path.clone()).or_default();
        if self.mode.contains(FileMode::APPEND) {
            self.pos = data.len();
        }
        let bytes = text.as_bytes();
        let end = self.pos + bytes.len();
        if data.len() < end {
            data.resize(end, 0);
        }
        data[self.pos..end].copy_from_slice(bytes);
        self.pos = end;
        Ok(())
    }

    fn seek(
        &mut self,
        whence: SeekWhence,
        offset: i64,
    ) -> Result<u64, FsError> {
        if !self.open {
            return Err(FsError::Closed);
        }
        let len = self.files.borrow().get(&self.path).map(Vec::len).unwrap_or(0) as i64;
        let base = match whence {
            SeekWhence::Set => 0,
            SeekWhence::Cur => self.pos as i64,
            SeekWhence::End => len,
        };
        let target = base + offset;
        if target < 0 {
            return Err(FsError::InvalidSeek);
        }
        self.pos = target as usize;
        Ok(self.pos as u64)
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn mode(&self) -> FileMode {
        self.mode
    }
}

// ============================================================================
// Devices
// ============================================================================

pub type DeviceHandler = Box<dyn Fn(&[NetValue]) -> Result<Vec<NetValue>, String>>;

/// A scripted device method
pub struct SimDevice {
    handler: DeviceHandler,
    /// Resolve polls a deferred call waits before completing; `None` answers synchronously
    defer: Option<u32>,
}

// ============================================================================
// SimKernel
// ============================================================================

pub struct SimKernel {
    state: KernelState,
    crash: Option<KernelCrash>,
    stops: usize,
    resource_updates: usize,
    serial: Vec<String>,
    network: SimNetwork,
    fs: Option<MemoryFileSystem>,
    devices: HashMap<String, SimDevice>,
    /// Polls seen per pending call, keyed by method and arguments
    polls: HashMap<String, u32>,
}

impl Default for SimKernel {
    fn default() -> Self {
        Self::new()
    }
}

impl SimKernel {
    /// A running machine with a memory file system and the `echo`/`echo_async` devices
    pub fn new() -> Self {
        let mut kernel = Self {
            state: KernelState::Running,
            crash: None,
            stops: 0,
            resource_updates: 0,
            serial: Vec::new(),
            network: SimNetwork::default(),
            fs: Some(MemoryFileSystem::new()),
            devices: HashMap::new(),
            polls: HashMap::new(),
        };
        kernel.add_device("echo", |args| Ok(args.to_vec()));
        kernel.add_deferred_device("echo_async", 1, |args| Ok(args.to_vec()));
        kernel
    }

    pub fn without_filesystem(mut self) -> Self {
        self.fs = None;
        self
    }

    pub fn add_device(
        &mut self,
        method: &str,
        handler: impl Fn(&[NetValue]) -> Result<Vec<NetValue>, String> + 'static,
    ) {
        self.devices.insert(
            method.to_string(),
            SimDevice {
                handler: Box::new(handler),
                defer: None,
            },
        );
    }

    pub fn add_deferred_device(
        &mut self,
        method: &str,
        polls: u32,
        handler: impl Fn(&[NetValue]) -> Result<Vec<NetValue>, String> + 'static,
    ) {
        self.devices.insert(
            method.to_string(),
            SimDevice {
                handler: Box::new(handler),
                defer: Some(polls),
            },
        );
    }

    pub fn push_signal(
        &mut self,
        signal: Signal,
        sender: NetworkTrace,
    ) {
        self.network.push(signal, sender);
    }

    pub fn push_malformed_signal(&mut self) {
        self.network.push_malformed();
    }

    pub fn set_state(
        &mut self,
        state: KernelState,
    ) {
        self.state = state;
    }

    /// Power on again after a crash or stop
    pub fn boot(&mut self) {
        self.state = KernelState::Running;
        self.crash = None;
    }

    pub fn serial(&self) -> &[String] {
        &self.serial
    }

    pub fn take_serial(&mut self) -> Vec<String> {
        std::mem::take(&mut self.serial)
    }

    pub fn crash_report(&self) -> Option<&KernelCrash> {
        self.crash.as_ref()
    }

    pub fn stops(&self) -> usize {
        self.stops
    }

    pub fn resource_updates(&self) -> usize {
        self.resource_updates
    }

    pub fn memory_fs(&mut self) -> Option<&mut MemoryFileSystem> {
        self.fs.as_mut()
    }

    fn poll_key(
        method: &str,
        args: &[NetValue],
    ) -> String {
        format!("{}{:?}", method, args)
    }
}

impl Kernel for SimKernel {
    fn state(&self) -> KernelState {
        self.state
    }

    fn crash(
        &mut self,
        crash: KernelCrash,
    ) {
        warn!("kernel crashed: {}", crash.message);
        self.state = KernelState::Crashed;
        self.crash = Some(crash);
    }

    fn stop(&mut self) {
        info!("kernel stopped");
        self.state = KernelState::Shutoff;
        self.stops += 1;
    }

    fn recalculate_resources(
        &mut self,
        kind: ResourceKind,
    ) {
        debug!(?kind, "resources recalculated");
        self.resource_updates += 1;
    }

    fn network(&mut self) -> &mut dyn SignalSource {
        &mut self.network
    }

    fn filesystem(&mut self) -> Option<&mut dyn FileSystem> {
        self.fs.as_mut().map(|fs| fs as &mut dyn FileSystem)
    }

    fn serial_write(
        &mut self,
        line: &str,
    ) -> Result<(), String> {
        self.serial.push(line.to_string());
        Ok(())
    }

    fn invoke(
        &mut self,
        method: &str,
        args: Vec<NetValue>,
    ) -> Result<Invocation, String> {
        let device = self
            .devices
            .get(method)
            .ok_or_else(|| format!("no such method '{}'", method))?;
        match device.defer {
            None => (device.handler)(&args).map(Invocation::Ready),
            Some(_) => Ok(Invocation::Deferred),
        }
    }

    fn resolve_future(
        &mut self,
        method: &str,
        args: &[NetValue],
    ) -> Option<Result<Vec<NetValue>, String>> {
        let Some(device) = self.devices.get(method) else {
            return Some(Err(format!("no such method '{}'", method)));
        };
        let wait = device.defer.unwrap_or(0);
        let key = Self::poll_key(method, args);
        let seen = self.polls.entry(key.clone()).or_insert(0);
        *seen += 1;
        if *seen < wait {
            return None;
        }
        self.polls.remove(&key);
        Some((device.handler)(args))
    }
}
