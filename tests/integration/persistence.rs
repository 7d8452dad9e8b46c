//! Save/load tests
//!
//! A processor saved at a yield point and loaded into a fresh processor must
//! behave exactly like the original left running.

use std::rc::Rc;

use tickcore::kernel::{Kernel, KernelState, ManualClock, NetValue, NetworkTrace, Signal, SimKernel};
use tickcore::processor::{Processor, ProcessorStateStorage, PullState};
use tickcore::util::config::ProcessorConfig;
use tickcore::vm::VMStatus;

const ACCUMULATOR: &str = "
    local total = 0
    local history = {}
    while true do
        local name, sender, value = event.pull()
        total = total + value
        history[#history + 1] = name
        print(name .. '=' .. total .. ' after ' .. table.concat(history, ','))
    end
";

fn processor(
    source: &str,
    clock: &Rc<ManualClock>,
) -> Processor {
    let mut processor = Processor::with_clock(ProcessorConfig::default(), clock.clone());
    processor.set_eeprom(Some(Rc::new(source.to_string())));
    processor
}

fn signal(
    name: &str,
    value: i64,
) -> Signal {
    Signal::new(name, vec![NetValue::Int(value)])
}

#[test]
fn test_restored_processor_matches_original() {
    let clock = Rc::new(ManualClock::new(5_000));
    let mut kernel_a = SimKernel::new();
    let mut a = processor(ACCUMULATOR, &clock);
    a.reset(&mut kernel_a);
    a.tick(&mut kernel_a, 0.05);
    kernel_a.push_signal(signal("first", 1), NetworkTrace::from_sender("net"));
    a.tick(&mut kernel_a, 0.05);
    assert_eq!(a.pull().state, PullState::Unbounded);

    let storage = a.save();
    assert_eq!(storage.pull_state, 2);
    let text = storage.to_json().unwrap();

    let mut kernel_b = SimKernel::new();
    let mut b = processor(ACCUMULATOR, &clock);
    b.load(&mut kernel_b, &ProcessorStateStorage::from_json(&text).unwrap());
    assert_eq!(b.status(), Some(VMStatus::Yielded));
    assert_eq!(b.pull().state, PullState::Unbounded);

    kernel_a.take_serial();
    for (name, value) in [("second", 2), ("third", 3)] {
        kernel_a.push_signal(signal(name, value), NetworkTrace::from_sender("net"));
        kernel_b.push_signal(signal(name, value), NetworkTrace::from_sender("net"));
    }
    for _ in 0..4 {
        a.tick(&mut kernel_a, 0.05);
        b.tick(&mut kernel_b, 0.05);
    }

    let expected = vec![
        "second=3 after first,second".to_string(),
        "third=6 after first,second,third".to_string(),
    ];
    assert_eq!(kernel_a.serial(), expected.as_slice());
    assert_eq!(kernel_b.serial(), expected.as_slice());
    assert!(kernel_b.crash_report().is_none());
}

#[test]
fn test_timed_pull_survives_with_its_start_time() {
    let clock = Rc::new(ManualClock::new(1_000));
    let mut kernel = SimKernel::new();
    let source = "local name = event.pull(3)\nprint(tostring(name))";
    let mut a = processor(source, &clock);
    a.reset(&mut kernel);
    a.tick(&mut kernel, 0.05);
    let storage = a.save();
    assert_eq!(storage.pull_state, 1);
    assert_eq!(storage.timeout, 3.0);
    assert_eq!(storage.pull_start, 1_000);

    let mut b = processor(source, &clock);
    b.load(&mut kernel, &storage);
    clock.advance(2_000);
    b.tick(&mut kernel, 0.05);
    assert!(kernel.serial().is_empty());
    clock.advance(1_000);
    b.tick(&mut kernel, 0.05);
    assert_eq!(kernel.serial(), ["nil".to_string()].as_slice());
    assert_eq!(kernel.state(), KernelState::Shutoff);
}

#[test]
fn test_unsuspended_processor_saves_nothing() {
    let clock = Rc::new(ManualClock::new(0));
    let mut kernel = SimKernel::new();
    let mut p = processor("computer.skip()", &clock);
    p.reset(&mut kernel);
    assert_eq!(p.save(), ProcessorStateStorage::default());

    p.tick(&mut kernel, 0.05);
    p.tick(&mut kernel, 0.05);
    assert_eq!(p.status(), Some(VMStatus::Finished));
    assert_eq!(p.save(), ProcessorStateStorage::default());
}

#[test]
fn test_empty_record_loads_a_fresh_context() {
    let clock = Rc::new(ManualClock::new(0));
    let mut kernel = SimKernel::new();
    let mut p = processor("print('from the start')", &clock);
    p.load(&mut kernel, &ProcessorStateStorage::default());
    assert_eq!(p.status(), Some(VMStatus::Loaded));
    p.tick(&mut kernel, 0.05);
    assert_eq!(kernel.serial(), ["from the start".to_string()].as_slice());
}

#[test]
fn test_corrupt_record_starts_over_without_crashing() {
    let clock = Rc::new(ManualClock::new(0));
    let mut kernel = SimKernel::new();
    let storage = ProcessorStateStorage {
        pull_state: 2,
        globals: "bm90IGEgc25hcHNob3Q=".to_string(),
        thread: "!!!".to_string(),
        ..ProcessorStateStorage::default()
    };
    let mut p = processor("print('fresh')", &clock);
    p.load(&mut kernel, &storage);

    assert!(kernel.crash_report().is_none());
    assert_eq!(p.status(), Some(VMStatus::Loaded));
    assert_eq!(p.pull().state, PullState::None);
    p.tick(&mut kernel, 0.05);
    assert_eq!(kernel.serial(), ["fresh".to_string()].as_slice());
}

#[test]
fn test_open_file_continues_after_load() {
    let clock = Rc::new(ManualClock::new(0));
    let mut kernel = SimKernel::new();
    let source = "
        local f = filesystem.open('/data.txt', 'w')
        f:write('one ')
        computer.skip()
        f:write('two')
        f:close()
    ";
    let mut a = processor(source, &clock);
    a.reset(&mut kernel);
    a.tick(&mut kernel, 0.05);
    let storage = a.save();
    drop(a);

    let mut b = processor(source, &clock);
    b.load(&mut kernel, &storage);
    assert_eq!(b.open_files(), 1);
    b.tick(&mut kernel, 0.05);

    assert!(kernel.crash_report().is_none(), "{:?}", kernel.crash_report());
    let contents = kernel.memory_fs().and_then(|fs| fs.contents("/data.txt"));
    assert_eq!(contents.as_deref(), Some("one two"));
    assert_eq!(b.open_files(), 0);
}

#[test]
fn test_deferred_future_resolves_after_load() {
    let clock = Rc::new(ManualClock::new(0));
    let mut kernel = SimKernel::new();
    kernel.add_deferred_device("slow", 3, |args| Ok(args.to_vec()));
    let source = "
        local f = component.invoke('slow', 'payload')
        print(f:await())
    ";
    let mut a = processor(source, &clock);
    a.reset(&mut kernel);
    a.tick(&mut kernel, 0.05);
    let storage = a.save();

    let mut b = processor(source, &clock);
    b.load(&mut kernel, &storage);
    for _ in 0..5 {
        b.tick(&mut kernel, 0.05);
    }
    assert_eq!(kernel.serial(), ["payload".to_string()].as_slice());
    assert_eq!(kernel.state(), KernelState::Shutoff);
}
