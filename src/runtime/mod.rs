//! Runtime system
//!
//! Guest values, the handle-indexed heap and the garbage collector.

pub mod gc;
pub mod memory;
pub mod value;
