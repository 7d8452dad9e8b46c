//! Virtual Machine and bytecode execution
//!
//! This module contains the bytecode interpreter, its coroutine frames and
//! the instruction budgeter that bounds how long one tick may run.

pub use budget::Budget;
pub use errors::{bad_argument, VMError, VMResult};
pub use executor::{binary, ResumeStatus, VMConfig, VMStatus, VM};
pub use frames::{Frame, Pending, Thread, ThreadStatus};
pub use opcode::{BinOp, Instr, Program, Proto, UnOp, UpvalDesc};

mod budget;
mod errors;
mod executor;
mod frames;
mod opcode;

#[cfg(test)]
mod tests;
