//! Filesystem library and file handle methods
//!
//! 文件句柄：流属于宿主文件系统，处理器只跟踪弱引用。
//!
//! A handle saved while open comes back with its stream closed and a transfer
//! record of mode and position. The first access afterwards reopens it, as
//! long as the host still considers the path persistable.

use tracing::{debug, warn};

use crate::kernel::{FileContainer, FileMode, FsError, SeekWhence, SharedFile};
use crate::runtime::memory::{Handle, HeapValue};
use crate::runtime::value::Value;
use crate::std::{check_str, opt_int, to_display, NativeContext, NativeExport, NativeOutcome, StdModule};
use crate::vm::{bad_argument, VMError, VMResult};

// ============================================================================
// FilesystemModule - StdModule Implementation
// ============================================================================

pub struct FilesystemModule;

impl StdModule for FilesystemModule {
    fn module_path(&self) -> &str {
        "filesystem"
    }

    fn exports(&self) -> Vec<NativeExport> {
        vec![
            NativeExport::new(
                "open",
                "filesystem.open",
                "(path: string, mode?: string) -> File",
                native_open,
            ),
            NativeExport::new(
                "exists",
                "filesystem.exists",
                "(path: string) -> boolean",
                native_exists,
            ),
        ]
    }
}

/// Singleton instance for the filesystem library.
pub const FILESYSTEM_MODULE: FilesystemModule = FilesystemModule;

// ============================================================================
// FileMethods - StdModule Implementation
// ============================================================================

/// Methods of file handle values
pub struct FileMethods;

impl StdModule for FileMethods {
    fn module_path(&self) -> &str {
        "File"
    }

    fn exports(&self) -> Vec<NativeExport> {
        vec![
            NativeExport::new(
                "read",
                "File.read",
                "(self, n: integer | \"a\") -> string | nil",
                native_read,
            ),
            NativeExport::new("write", "File.write", "(self, ...) -> File", native_write),
            NativeExport::new(
                "seek",
                "File.seek",
                "(self, whence?: string, offset?: integer) -> integer",
                native_seek,
            ),
            NativeExport::new("close", "File.close", "(self) -> ()", native_close),
        ]
    }

    fn is_method_table(&self) -> bool {
        true
    }
}

/// Singleton instance for the file methods.
pub const FILE_METHODS: FileMethods = FileMethods;

fn fs_error(err: FsError) -> VMError {
    VMError::Runtime(err.to_string())
}

// ============================================================================
// Native Function Implementations
// ============================================================================

fn native_open(
    args: &[Value],
    ctx: &mut NativeContext<'_, '_>,
) -> VMResult<NativeOutcome> {
    let path = check_str(args, 0, "open")?;
    let mode = match args.get(1) {
        None | Some(Value::Nil) => FileMode::READ,
        Some(_) => FileMode::parse(&check_str(args, 1, "open")?).map_err(|e| bad_argument(2, "open", &e.to_string()))?,
    };

    let fs = ctx.host.kernel.filesystem().ok_or(FsError::Unavailable).map_err(fs_error)?;
    let path = fs.unpersist_path(&path);
    let stream = fs.open(&path, mode).map_err(fs_error)?;
    debug!(path = %path, mode = %mode, "file opened");

    let shared = SharedFile::new(FileContainer::new(path, mode, stream));
    ctx.host.files.track(&shared.0);
    let handle = ctx.heap.allocate(HeapValue::File(shared));
    Ok(NativeOutcome::ApiReturn(vec![Value::File(handle)]))
}

fn native_exists(
    args: &[Value],
    ctx: &mut NativeContext<'_, '_>,
) -> VMResult<NativeOutcome> {
    let path = check_str(args, 0, "exists")?;
    let exists = match ctx.host.kernel.filesystem() {
        Some(fs) => fs.exists(&path),
        None => false,
    };
    Ok(NativeOutcome::Return(vec![Value::Bool(exists)]))
}

fn check_file(
    args: &[Value],
    fname: &str,
) -> VMResult<Handle> {
    match args.first() {
        Some(Value::File(h)) => Ok(*h),
        other => Err(bad_argument(
            1,
            fname,
            &format!(
                "File expected, got {}",
                other.map(|v| v.type_name()).unwrap_or("no value")
            ),
        )),
    }
}

/// Mode a parked handle is reopened with
///
/// Truncating write modes drop TRUNC so the saved content survives. A handle
/// that carries both APPEND and TRUNC keeps its flags.
pub(crate) fn reopen_mode(mode: FileMode) -> FileMode {
    if mode.contains(FileMode::APPEND | FileMode::TRUNC) {
        warn!(mode = %mode, "reopening append+truncate handle with unchanged flags");
        mode
    } else {
        mode.without(FileMode::TRUNC)
    }
}

/// Make sure the handle has a live stream, reopening a parked one
fn ensure_open(
    ctx: &mut NativeContext<'_, '_>,
    handle: Handle,
) -> VMResult<SharedFile> {
    let shared = ctx.heap.file(handle)?.clone();
    let mut container = shared.0.borrow_mut();
    if container.stream.is_some() {
        return Ok(shared.clone());
    }

    let Some(transfer) = container.transfer.take() else {
        return Err(fs_error(FsError::Closed));
    };
    if !transfer.open {
        return Err(fs_error(FsError::Closed));
    }
    let fs = ctx.host.kernel.filesystem().ok_or(FsError::Unavailable).map_err(fs_error)?;
    if !fs.check_unpersist_path(&container.path) {
        debug!(path = %container.path, "parked handle no longer persistable");
        return Err(fs_error(FsError::Closed));
    }

    let path = fs.unpersist_path(&container.path);
    let mode = reopen_mode(transfer.mode);
    let mut stream = fs.open(&path, mode).map_err(fs_error)?;
    if transfer.pos > 0 {
        stream.seek(SeekWhence::Set, transfer.pos as i64).map_err(fs_error)?;
    }
    debug!(path = %path, pos = transfer.pos, "parked handle reopened");
    container.path = path;
    container.mode = mode;
    container.stream = Some(stream);
    drop(container);

    ctx.host.files.track(&shared.0);
    Ok(shared)
}

fn native_read(
    args: &[Value],
    ctx: &mut NativeContext<'_, '_>,
) -> VMResult<NativeOutcome> {
    let handle = check_file(args, "read")?;
    let shared = ensure_open(ctx, handle)?;
    let mut container = shared.0.borrow_mut();
    let stream = container.stream.as_mut().ok_or(FsError::Closed).map_err(fs_error)?;

    let data = match args.get(1) {
        None | Some(Value::Nil) => stream.read_all(),
        Some(Value::Str(s)) if matches!(s.as_ref(), "a" | "*a") => stream.read_all(),
        Some(_) => {
            let n = opt_int(args, 1, "read", 0)?;
            if n < 0 {
                return Err(bad_argument(2, "read", "invalid byte count"));
            }
            let data = stream.read(n as usize).map_err(fs_error)?;
            if data.is_empty() && n > 0 {
                return Ok(NativeOutcome::ApiReturn(vec![Value::Nil]));
            }
            Ok(data)
        }
    }
    .map_err(fs_error)?;
    Ok(NativeOutcome::ApiReturn(vec![Value::str(&data)]))
}

fn native_write(
    args: &[Value],
    ctx: &mut NativeContext<'_, '_>,
) -> VMResult<NativeOutcome> {
    let handle = check_file(args, "write")?;
    let shared = ensure_open(ctx, handle)?;
    let mut container = shared.0.borrow_mut();
    let stream = container.stream.as_mut().ok_or(FsError::Closed).map_err(fs_error)?;

    for (i, value) in args.iter().enumerate().skip(1) {
        match value {
            Value::Str(_) | Value::Int(_) | Value::Float(_) => {
                stream.write(&to_display(value)).map_err(fs_error)?;
            }
            other => {
                return Err(bad_argument(
                    i + 1,
                    "write",
                    &format!("string expected, got {}", other.type_name()),
                ))
            }
        }
    }
    Ok(NativeOutcome::ApiReturn(vec![Value::File(handle)]))
}

fn native_seek(
    args: &[Value],
    ctx: &mut NativeContext<'_, '_>,
) -> VMResult<NativeOutcome> {
    let handle = check_file(args, "seek")?;
    let whence = match args.get(1) {
        None | Some(Value::Nil) => SeekWhence::Cur,
        Some(_) => {
            let name = check_str(args, 1, "seek")?;
            SeekWhence::parse(&name).ok_or_else(|| bad_argument(2, "seek", &format!("invalid option '{}'", name)))?
        }
    };
    let offset = opt_int(args, 2, "seek", 0)?;

    let shared = ensure_open(ctx, handle)?;
    let mut container = shared.0.borrow_mut();
    let stream = container.stream.as_mut().ok_or(FsError::Closed).map_err(fs_error)?;
    let pos = stream.seek(whence, offset).map_err(fs_error)?;
    Ok(NativeOutcome::ApiReturn(vec![Value::Int(pos as i64)]))
}

fn native_close(
    args: &[Value],
    ctx: &mut NativeContext<'_, '_>,
) -> VMResult<NativeOutcome> {
    let handle = check_file(args, "close")?;
    let shared = ctx.heap.file(handle)?.clone();
    shared.0.borrow_mut().close();
    Ok(NativeOutcome::ApiReturn(Vec::new()))
}
