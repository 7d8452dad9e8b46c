//! Tick scheduler tests
//!
//! Lifecycle of a processor driven tick by tick on the simulated kernel.

use std::rc::Rc;

use tickcore::kernel::{Kernel, KernelState, ManualClock, SimKernel};
use tickcore::processor::{PullState, Processor};
use tickcore::util::config::ProcessorConfig;
use tickcore::vm::VMStatus;

fn processor(
    source: &str,
    config: ProcessorConfig,
) -> Processor {
    let mut processor = Processor::with_clock(config, Rc::new(ManualClock::new(0)));
    processor.set_eeprom(Some(Rc::new(source.to_string())));
    processor
}

#[test]
fn test_program_without_yield_stops_after_one_tick() {
    let mut kernel = SimKernel::new();
    let mut p = processor("x = 1\nprint('done')", ProcessorConfig::default());
    p.reset(&mut kernel);
    assert_eq!(p.status(), Some(VMStatus::Loaded));

    p.tick(&mut kernel, 0.05);
    assert_eq!(kernel.state(), KernelState::Shutoff);
    assert_eq!(kernel.stops(), 1);
    assert!(kernel.crash_report().is_none());
    assert_eq!(kernel.serial(), ["done".to_string()].as_slice());

    // A stopped kernel takes no more ticks
    p.tick(&mut kernel, 0.05);
    assert_eq!(kernel.stops(), 1);
}

#[test]
fn test_program_stops_after_exactly_the_ticks_it_needs() {
    let mut kernel = SimKernel::new();
    let mut p = processor("computer.skip()\ncomputer.skip()\nprint('end')", ProcessorConfig::default());
    p.reset(&mut kernel);

    p.tick(&mut kernel, 0.05);
    p.tick(&mut kernel, 0.05);
    assert_eq!(kernel.state(), KernelState::Running);
    assert_eq!(p.status(), Some(VMStatus::Yielded));
    assert_eq!(kernel.resource_updates(), 2);

    p.tick(&mut kernel, 0.05);
    assert_eq!(kernel.state(), KernelState::Shutoff);
    assert_eq!(p.status(), Some(VMStatus::Finished));
}

#[test]
fn test_budget_overrun_crashes_on_that_tick() {
    let mut kernel = SimKernel::new();
    let config = ProcessorConfig {
        speed: 500,
        ..ProcessorConfig::default()
    };
    let mut p = processor("local n = 0\nwhile true do n = n + 1 end", config);
    p.reset(&mut kernel);
    p.tick(&mut kernel, 0.05);

    assert_eq!(kernel.state(), KernelState::Crashed);
    let crash = kernel.crash_report().unwrap();
    assert!(crash.message.contains("out of time"), "{}", crash.message);
    assert_eq!(p.status(), Some(VMStatus::Crashed));
}

#[test]
fn test_runtime_error_crashes_with_traceback() {
    let mut kernel = SimKernel::new();
    let mut p = processor("local t = nil\nlocal v = t.x", ProcessorConfig::default());
    p.reset(&mut kernel);
    p.tick(&mut kernel, 0.05);

    let crash = kernel.crash_report().unwrap();
    assert!(crash.message.starts_with("EEPROM:2:"), "{}", crash.message);
    assert!(crash.message.contains("stack traceback:"));
}

#[test]
fn test_crashed_processor_waits_for_reset() {
    let mut kernel = SimKernel::new();
    let mut p = processor("error('first')", ProcessorConfig::default());
    p.reset(&mut kernel);
    p.tick(&mut kernel, 0.05);
    assert_eq!(kernel.state(), KernelState::Crashed);

    kernel.boot();
    p.tick(&mut kernel, 0.05);
    assert_eq!(p.status(), Some(VMStatus::Crashed));
    assert_eq!(kernel.state(), KernelState::Running);

    p.set_eeprom(Some(Rc::new("print('fixed')".to_string())));
    p.reset(&mut kernel);
    p.tick(&mut kernel, 0.05);
    assert_eq!(kernel.state(), KernelState::Shutoff);
    assert_eq!(kernel.serial(), ["fixed".to_string()].as_slice());
}

#[test]
fn test_missing_program_source_crashes() {
    let mut kernel = SimKernel::new();
    let mut p = Processor::new(ProcessorConfig::default());
    p.reset(&mut kernel);
    assert_eq!(kernel.state(), KernelState::Crashed);
    assert_eq!(kernel.crash_report().unwrap().message, "No Valid EEPROM set");
}

#[test]
fn test_compile_error_crashes_with_position() {
    let mut kernel = SimKernel::new();
    let mut p = processor("local x = 1\nif x then", ProcessorConfig::default());
    p.reset(&mut kernel);
    let crash = kernel.crash_report().unwrap();
    assert!(crash.message.starts_with("EEPROM:2:"), "{}", crash.message);
    assert!(p.status().is_none());
}

#[test]
fn test_reset_is_skipped_when_not_running() {
    let mut kernel = SimKernel::new();
    kernel.set_state(KernelState::Shutoff);
    let mut p = processor("x = 1", ProcessorConfig::default());
    p.reset(&mut kernel);
    assert!(p.status().is_none());
    assert!(kernel.crash_report().is_none());
}

#[test]
fn test_reset_twice_leaves_no_residue() {
    let mut kernel = SimKernel::new();
    let mut p = processor(
        "counter = 7
         local f = filesystem.open('/log.txt', 'w')
         f:write('x')
         event.pull(5)",
        ProcessorConfig::default(),
    );
    p.reset(&mut kernel);
    p.tick(&mut kernel, 0.05);
    assert_eq!(p.open_files(), 1);
    assert_eq!(p.pull().state, PullState::Timed);

    for _ in 0..2 {
        p.reset(&mut kernel);
        assert_eq!(p.open_files(), 0);
        assert_eq!(p.pull().state, PullState::None);
        assert_eq!(p.status(), Some(VMStatus::Loaded));
        assert!(p.vm().unwrap().global("counter").is_nil());
    }
}

#[test]
fn test_memory_limit_crashes() {
    let mut kernel = SimKernel::new();
    let config = ProcessorConfig {
        memory_limit: Some(1),
        ..ProcessorConfig::default()
    };
    let mut p = processor("local t = {}\nfor i = 1, 100 do t[i] = i end\ncomputer.skip()", config);
    p.reset(&mut kernel);
    p.tick(&mut kernel, 0.05);
    assert_eq!(kernel.crash_report().unwrap().message, "not enough memory");
}

#[test]
fn test_uptime_follows_tick_delta() {
    let mut kernel = SimKernel::new();
    let mut p = processor("computer.skip()\nprint(computer.time())", ProcessorConfig::default());
    p.reset(&mut kernel);
    p.tick(&mut kernel, 0.5);
    p.tick(&mut kernel, 0.25);
    assert_eq!(kernel.serial(), ["0.75".to_string()].as_slice());
}

#[test]
fn test_files_dropped_by_guest_are_reconciled() {
    let mut kernel = SimKernel::new();
    let mut p = processor(
        "local f = filesystem.open('/a.txt', 'w')
         f:close()
         computer.skip()",
        ProcessorConfig::default(),
    );
    p.reset(&mut kernel);
    p.tick(&mut kernel, 0.05);
    assert_eq!(p.open_files(), 0);
}

#[test]
fn test_deeply_nested_source_crashes_the_kernel_not_the_host() {
    let mut kernel = SimKernel::new();
    let source = format!("local x = {}1{}\nprint(x)", "(".repeat(1000), ")".repeat(1000));
    let mut p = processor(&source, ProcessorConfig::default());
    p.reset(&mut kernel);
    assert_eq!(kernel.state(), KernelState::Crashed);
    let crash = kernel.crash_report().unwrap();
    assert_eq!(crash.message, "EEPROM:1: chunk has too many syntax levels");
}

#[test]
fn test_long_sum_runs_to_completion() {
    let mut kernel = SimKernel::new();
    let source = format!("print({})", vec!["1"; 2000].join(" + "));
    let mut p = processor(&source, ProcessorConfig::default());
    p.reset(&mut kernel);
    p.tick(&mut kernel, 0.05);
    assert!(kernel.crash_report().is_none(), "{:?}", kernel.crash_report());
    assert_eq!(kernel.serial(), ["2000".to_string()].as_slice());
}
