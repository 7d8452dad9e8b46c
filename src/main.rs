//! tickcore - CLI

use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tickcore::kernel::{KernelState, NetValue, Signal};
use tickcore::processor::ProcessorStateStorage;
use tickcore::util::config::load_or_default;
use tickcore::util::logger;
use tickcore::util::span::SourceFile;
use tickcore::{dump_bytecode, native_listing, run_file, RunOptions, NAME, VERSION};

/// Tick-driven script processor
#[derive(Parser, Debug)]
#[command(name = "tickcore")]
#[command(version = VERSION)]
#[command(about = NAME, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run an EEPROM program on a simulated machine
    Run {
        /// Program source
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Maximum number of ticks
        #[arg(long, default_value_t = 1000)]
        ticks: u32,

        /// Seconds per tick
        #[arg(long, default_value_t = 0.05)]
        delta: f64,

        /// Instructions between budget interrupts, overrides the config file
        #[arg(long)]
        speed: Option<u32>,

        /// Queue a signal before the first tick: `name=v1,v2,...`
        #[arg(long, value_name = "NAME=VALUES")]
        signal: Vec<String>,

        /// Write the save record here after the last tick
        #[arg(long, value_name = "OUT.json")]
        save: Option<PathBuf>,

        /// Restore this save record before the first tick
        #[arg(long, value_name = "IN.json")]
        load: Option<PathBuf>,

        /// Processor configuration (TOML)
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,
    },

    /// List the guest library functions
    Natives,

    /// Print the compiled bytecode of a program
    Disasm {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
}

/// `name=v1,v2` → signal; values are parsed as literals
fn parse_signal(text: &str) -> Result<Signal> {
    let (name, values) = match text.split_once('=') {
        Some((name, values)) => (name, values),
        None => (text, ""),
    };
    if name.is_empty() {
        bail!("signal name missing in '{}'", text);
    }
    let params = if values.is_empty() {
        Vec::new()
    } else {
        values.split(',').map(NetValue::parse_literal).collect()
    };
    Ok(Signal::new(name, params))
}

/// Show the offending source line under a guest error
fn print_source_line(
    file: &SourceFile,
    message: &str,
) {
    if let Some((line, text)) = file.line_of_message("EEPROM", message) {
        eprintln!("  {:>4} | {}", line, text);
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    logger::init_cli(args.verbose);

    match args.command {
        Commands::Run {
            file,
            ticks,
            delta,
            speed,
            signal,
            save,
            load,
            config,
        } => {
            let mut config = load_or_default(config.as_deref()).context("Failed to load config")?;
            if let Some(speed) = speed {
                config.speed = speed;
            }
            let signals = signal
                .iter()
                .map(String::as_str)
                .map(parse_signal)
                .collect::<Result<Vec<_>>>()?;
            let load = match &load {
                Some(path) => {
                    let text = fs::read_to_string(path)
                        .with_context(|| format!("Failed to read save record: {}", path.display()))?;
                    Some(ProcessorStateStorage::from_json(&text).context("Invalid save record")?)
                }
                None => None,
            };
            let options = RunOptions {
                ticks,
                delta,
                config,
                signals,
                load,
                save: save.is_some(),
            };

            let report = run_file(&file, &options)
                .with_context(|| format!("Failed to run: {}", file.display()))?;
            for line in &report.serial {
                println!("{}", line);
            }
            if let (Some(path), Some(storage)) = (&save, &report.storage) {
                fs::write(path, storage.to_json()?)
                    .with_context(|| format!("Failed to write save record: {}", path.display()))?;
            }
            if args.verbose {
                eprintln!(
                    "ticks: {}, state: {:?}, memory: {} bytes",
                    report.ticks, report.state, report.memory
                );
            }
            if let Some(crash) = &report.crash {
                eprintln!("crashed: {}", crash.message);
                let source = fs::read_to_string(&file).unwrap_or_default();
                print_source_line(&SourceFile::new(file.display().to_string(), source), &crash.message);
                std::process::exit(1);
            }
            if report.state == KernelState::Running {
                eprintln!("still running after {} ticks", report.ticks);
            }
        }
        Commands::Natives => {
            for (name, signature) in native_listing() {
                println!("{:<24} {}", name, signature);
            }
        }
        Commands::Disasm { file } => {
            dump_bytecode(&file).with_context(|| format!("Failed to compile: {}", file.display()))?;
        }
    }

    Ok(())
}
