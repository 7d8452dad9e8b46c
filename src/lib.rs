//! tickcore
//!
//! Tick-driven script processor for in-world virtual computers.
//!
//! A [`processor::Processor`] runs one guest program (a small Lua dialect)
//! under a per-tick instruction budget, suspends it at every tick boundary,
//! and can snapshot the suspended state into a save record and restore it
//! later in a fresh context.
//!
//! # Example
//!
//! ```no_run
//! use tickcore::{run, RunOptions, Result};
//!
//! fn main() -> Result<()> {
//!     let report = run("print('hello')", &RunOptions::default())?;
//!     assert_eq!(report.serial, vec!["hello".to_string()]);
//!     Ok(())
//! }
//! ```

#![doc(html_root_url = "https://docs.rs/tickcore")]
#![warn(rust_2018_idioms)]

// Public modules
pub mod frontend;
pub mod kernel;
pub mod persist;
pub mod processor;
pub mod runtime;
pub mod std;
pub mod vm;

// Utility modules
pub mod util;

// Re-exports
pub use anyhow::{Context, Result};

use ::std::fs;
use ::std::path::Path;
use ::std::rc::Rc;

use tracing::{debug, info};

use crate::kernel::{Kernel, KernelCrash, KernelState, NetworkTrace, Signal, SimKernel};
use crate::processor::{Processor, ProcessorStateStorage};
use crate::util::config::ProcessorConfig;
use crate::vm::VMStatus;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const NAME: &str = "tickcore";

/// How [`run`] drives a processor
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Upper bound on host ticks
    pub ticks: u32,
    /// Simulation seconds added per tick
    pub delta: f64,
    pub config: ProcessorConfig,
    /// Signals queued before the first tick, delivered in order
    pub signals: Vec<Signal>,
    /// Save record restored before the first tick
    pub load: Option<ProcessorStateStorage>,
    /// Take a save record after the last tick
    pub save: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            ticks: 1000,
            delta: 0.05,
            config: ProcessorConfig::default(),
            signals: Vec::new(),
            load: None,
            save: false,
        }
    }
}

/// Outcome of [`run`]
#[derive(Debug, Clone)]
pub struct RunReport {
    pub ticks: u32,
    pub state: KernelState,
    pub status: Option<VMStatus>,
    pub crash: Option<KernelCrash>,
    /// Lines written by the guest
    pub serial: Vec<String>,
    pub memory: usize,
    pub storage: Option<ProcessorStateStorage>,
}

/// Run a program on a [`SimKernel`] until it stops, crashes or runs out of ticks
pub fn run(
    source: &str,
    options: &RunOptions,
) -> Result<RunReport> {
    let mut kernel = SimKernel::new();
    for signal in &options.signals {
        kernel.push_signal(signal.clone(), NetworkTrace::from_sender("cli"));
    }

    let mut processor = Processor::new(options.config.clone());
    processor.set_eeprom(Some(Rc::new(source.to_string())));
    match &options.load {
        Some(storage) => processor.load(&mut kernel, storage),
        None => processor.reset(&mut kernel),
    }

    let mut ticks = 0;
    while ticks < options.ticks && kernel.state() == KernelState::Running {
        processor.tick(&mut kernel, options.delta);
        ticks += 1;
    }
    info!(ticks, state = ?kernel.state(), "run finished");

    let storage = options.save.then(|| processor.save());
    Ok(RunReport {
        ticks,
        state: kernel.state(),
        status: processor.status(),
        crash: kernel.crash_report().cloned(),
        serial: kernel.take_serial(),
        memory: processor.memory_usage(),
        storage,
    })
}

/// Run a program file
pub fn run_file(
    path: &Path,
    options: &RunOptions,
) -> Result<RunReport> {
    debug!("Running file: {}", path.display());
    let source = fs::read_to_string(path)
        .with_context(|| format!("Failed to read file: {}", path.display()))?;
    run(&source, options)
}

/// Dump bytecode for debugging
pub fn dump_bytecode(path: &Path) -> Result<()> {
    let source = fs::read_to_string(path)
        .with_context(|| format!("Failed to read file: {}", path.display()))?;
    let program = frontend::compile(&source)?;

    println!("=== Bytecode Dump for {} ===\n", path.display());
    for (i, proto) in program.protos.iter().enumerate() {
        let name = proto.name.as_deref().unwrap_or("main chunk");
        println!(
            "Function {}: {} (line {}), params={}, slots={}, upvals={}, instructions={}",
            i,
            name,
            proto.line,
            proto.params,
            proto.slots,
            proto.upvals.len(),
            proto.code.len()
        );
        for (j, constant) in proto.constants.iter().enumerate() {
            println!("  K{:<4} {:?}", j, constant);
        }
        for (ip, instr) in proto.code.iter().enumerate() {
            println!("  {:04} [{:>4}] {}", ip, proto.line_at(ip), instr);
        }
        println!();
    }
    Ok(())
}

/// Every guest library function with its signature
pub fn native_listing() -> Vec<(&'static str, &'static str)> {
    crate::std::all_exports()
        .into_iter()
        .map(|e| (e.qualified_name, e.signature))
        .collect()
}
