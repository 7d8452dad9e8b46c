//! File system interface and tracked file handles

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// File system errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FsError {
    #[error("no such file: {0}")]
    NotFound(String),
    #[error("file is closed")]
    Closed,
    #[error("file not opened for {0}")]
    BadMode(&'static str),
    #[error("invalid mode '{0}'")]
    InvalidMode(String),
    #[error("invalid seek position")]
    InvalidSeek,
    #[error("no file system available")]
    Unavailable,
}

/// Open-mode flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileMode(u8);

impl FileMode {
    pub const READ: FileMode = FileMode(0b0001);
    pub const WRITE: FileMode = FileMode(0b0010);
    pub const APPEND: FileMode = FileMode(0b0100);
    pub const TRUNC: FileMode = FileMode(0b1000);

    pub fn empty() -> Self {
        FileMode(0)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(
        self,
        other: FileMode,
    ) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn without(
        self,
        other: FileMode,
    ) -> FileMode {
        FileMode(self.0 & !other.0)
    }

    /// Parse a Lua mode string: `r w a r+ w+ a+`, an optional `b` is ignored
    pub fn parse(mode: &str) -> Result<FileMode, FsError> {
        let trimmed: String = mode.chars().filter(|c| *c != 'b').collect();
        let flags = match trimmed.as_str() {
            "r" => Self::READ,
            "w" => Self::WRITE | Self::TRUNC,
            "a" => Self::WRITE | Self::APPEND,
            "r+" => Self::READ | Self::WRITE,
            "w+" => Self::READ | Self::WRITE | Self::TRUNC,
            "a+" => Self::READ | Self::WRITE | Self::APPEND,
            _ => return Err(FsError::InvalidMode(mode.to_string())),
        };
        Ok(flags)
    }
}

impl std::ops::BitOr for FileMode {
    type Output = FileMode;

    fn bitor(
        self,
        rhs: FileMode,
    ) -> FileMode {
        FileMode(self.0 | rhs.0)
    }
}

impl fmt::Display for FileMode {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let names = [
            (Self::READ, "read"),
            (Self::WRITE, "write"),
            (Self::APPEND, "append"),
            (Self::TRUNC, "trunc"),
        ];
        let set: Vec<&str> = names
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        write!(f, "{}", set.join("|"))
    }
}

/// Origin of a seek
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekWhence {
    Set,
    Cur,
    End,
}

impl SeekWhence {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "set" => Some(SeekWhence::Set),
            "cur" => Some(SeekWhence::Cur),
            "end" => Some(SeekWhence::End),
            _ => None,
        }
    }
}

/// An open stream of the host file system
pub trait FileStream {
    /// Read up to `n` bytes
    fn read(
        &mut self,
        n: usize,
    ) -> Result<String, FsError>;

    /// Read to the end
    fn read_all(&mut self) -> Result<String, FsError>;

    fn write(
        &mut self,
        data: &str,
    ) -> Result<(), FsError>;

    /// Returns the new absolute position
    fn seek(
        &mut self,
        whence: SeekWhence,
        offset: i64,
    ) -> Result<u64, FsError>;

    fn close(&mut self);

    fn is_open(&self) -> bool;

    fn mode(&self) -> FileMode;
}

/// Host file system
pub trait FileSystem {
    fn open(
        &mut self,
        path: &str,
        mode: FileMode,
    ) -> Result<Box<dyn FileStream>, FsError>;

    fn exists(
        &self,
        path: &str,
    ) -> bool;

    /// Whether an open handle on `path` may survive a save
    fn check_unpersist_path(
        &self,
        path: &str,
    ) -> bool;

    /// Canonical form of `path` used across save and load
    fn unpersist_path(
        &self,
        path: &str,
    ) -> String;
}

/// Saved state of a handle while its stream is closed for persistence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileTransfer {
    pub open: bool,
    pub mode: FileMode,
    pub pos: u64,
}

/// A guest file handle
///
/// Holds the live stream while the processor runs. Across a save the stream
/// is closed and replaced by a [`FileTransfer`] record; the next access
/// reopens it.
pub struct FileContainer {
    pub path: String,
    pub mode: FileMode,
    pub stream: Option<Box<dyn FileStream>>,
    pub transfer: Option<FileTransfer>,
}

impl FileContainer {
    pub fn new(
        path: String,
        mode: FileMode,
        stream: Box<dyn FileStream>,
    ) -> Self {
        Self {
            path,
            mode,
            stream: Some(stream),
            transfer: None,
        }
    }

    /// Open either live or pending reopen
    pub fn is_open(&self) -> bool {
        match (&self.stream, &self.transfer) {
            (Some(stream), _) => stream.is_open(),
            (None, Some(transfer)) => transfer.open,
            (None, None) => false,
        }
    }

    /// Capture position and mode, then close the stream
    pub fn park(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let open = stream.is_open();
            let pos = if open {
                stream.seek(SeekWhence::Cur, 0).unwrap_or(0)
            } else {
                0
            };
            stream.close();
            self.transfer = Some(FileTransfer {
                open,
                mode: self.mode,
                pos,
            });
        }
    }

    /// Force-close, dropping any pending reopen
    pub fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.close();
        }
        self.transfer = None;
    }

    fn record(&self) -> FileRecord {
        let transfer = match (&self.transfer, &self.stream) {
            (Some(t), _) => Some(*t),
            (None, Some(stream)) => Some(FileTransfer {
                open: stream.is_open(),
                mode: self.mode,
                pos: 0,
            }),
            (None, None) => None,
        };
        FileRecord {
            path: self.path.clone(),
            mode: self.mode,
            transfer,
        }
    }
}

impl fmt::Debug for FileContainer {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("FileContainer")
            .field("path", &self.path)
            .field("mode", &self.mode)
            .field("live", &self.stream.is_some())
            .field("transfer", &self.transfer)
            .finish()
    }
}

pub type FileRef = Rc<RefCell<FileContainer>>;

/// Heap-side owner of a file handle
///
/// The processor only keeps weak references, so a handle the guest drops is
/// released when the collector frees this object.
#[derive(Clone)]
pub struct SharedFile(pub FileRef);

impl SharedFile {
    pub fn new(container: FileContainer) -> Self {
        SharedFile(Rc::new(RefCell::new(container)))
    }
}

impl fmt::Debug for SharedFile {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self.0.try_borrow() {
            Ok(container) => container.fmt(f),
            Err(_) => write!(f, "FileContainer(<borrowed>)"),
        }
    }
}

/// Serialized form of a file handle; the stream itself never persists
#[derive(Serialize, Deserialize)]
struct FileRecord {
    path: String,
    mode: FileMode,
    transfer: Option<FileTransfer>,
}

impl Serialize for SharedFile {
    fn serialize<S: Serializer>(
        &self,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let record = self
            .0
            .try_borrow()
            .map(|c| c.record())
            .map_err(serde::ser::Error::custom)?;
        record.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SharedFile {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let record = FileRecord::deserialize(deserializer)?;
        Ok(SharedFile::new(FileContainer {
            path: record.path,
            mode: record.mode,
            stream: None,
            transfer: record.transfer,
        }))
    }
}
