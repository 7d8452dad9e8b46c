//! VM errors

use thiserror::Error;

use crate::runtime::memory::HeapError;

/// VM result
pub type VMResult<T> = Result<T, VMError>;

/// VM errors
///
/// Everything except [`VMError::Guest`] and [`VMError::InvalidState`] is raised
/// while guest code runs; the executor turns those into a `Guest` error carrying
/// the source position and a traceback before it leaves the VM.
#[derive(Debug, Error)]
pub enum VMError {
    /// Guest-level runtime error, position gets prefixed
    #[error("{0}")]
    Runtime(String),

    /// Guest error raised with level 0 (`error(msg, 0)`), no position prefix
    #[error("{0}")]
    Raw(String),

    /// Raised by the execution budgeter on the second interrupt of a tick
    #[error("out of time")]
    OutOfTime,

    #[error("stack overflow")]
    StackOverflow,

    #[error("malformed signal")]
    MalformedSignal,

    #[error("{0}")]
    Heap(#[from] HeapError),

    /// Fully decorated guest failure, the processor crashes with it
    #[error("{message}\n{traceback}")]
    Guest { message: String, traceback: String },

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl VMError {
    /// Shorthand for a guest runtime error
    pub fn runtime(msg: impl Into<String>) -> Self {
        VMError::Runtime(msg.into())
    }

    /// Whether the source position of the failing instruction should be prefixed
    pub fn wants_position(&self) -> bool {
        matches!(
            self,
            VMError::Runtime(_)
                | VMError::OutOfTime
                | VMError::StackOverflow
                | VMError::MalformedSignal
                | VMError::Heap(_)
        )
    }

    /// Message without traceback
    pub fn message(&self) -> String {
        match self {
            VMError::Guest { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

/// `bad argument #n to 'fname' (msg)`
pub fn bad_argument(
    n: usize,
    fname: &str,
    msg: &str,
) -> VMError {
    VMError::Runtime(format!("bad argument #{} to '{}' ({})", n, fname, msg))
}
