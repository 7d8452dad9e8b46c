//! Signal pull tests

use std::rc::Rc;

use tickcore::kernel::{Kernel, KernelState, ManualClock, NetValue, NetworkTrace, Signal, SimKernel};
use tickcore::processor::{Processor, PullState};
use tickcore::util::config::ProcessorConfig;
use tickcore::vm::VMStatus;

fn processor(
    source: &str,
    clock: &Rc<ManualClock>,
) -> Processor {
    let mut processor = Processor::with_clock(ProcessorConfig::default(), clock.clone());
    processor.set_eeprom(Some(Rc::new(source.to_string())));
    processor
}

#[test]
fn test_pull_times_out_on_wall_clock_not_ticks() {
    let clock = Rc::new(ManualClock::new(10_000));
    let mut kernel = SimKernel::new();
    let mut p = processor("local name = event.pull(2)\nprint(tostring(name))", &clock);
    p.reset(&mut kernel);
    p.tick(&mut kernel, 0.05);
    assert_eq!(p.pull().state, PullState::Timed);

    for _ in 0..200 {
        p.tick(&mut kernel, 0.05);
    }
    assert!(kernel.serial().is_empty());
    assert_eq!(p.status(), Some(VMStatus::Yielded));

    clock.advance(1_999);
    p.tick(&mut kernel, 0.05);
    assert!(kernel.serial().is_empty());

    clock.advance(1);
    p.tick(&mut kernel, 0.05);
    assert_eq!(kernel.serial(), ["nil".to_string()].as_slice());
    assert_eq!(p.pull().state, PullState::None);
    assert_eq!(kernel.state(), KernelState::Shutoff);
}

#[test]
fn test_unbounded_pull_waits_for_a_signal() {
    let clock = Rc::new(ManualClock::new(0));
    let mut kernel = SimKernel::new();
    let mut p = processor(
        "local name, sender, a, b = event.pull()\nprint(name, a, b)",
        &clock,
    );
    p.reset(&mut kernel);
    p.tick(&mut kernel, 0.05);
    clock.advance(1_000_000);
    p.tick(&mut kernel, 0.05);
    assert!(kernel.serial().is_empty());

    kernel.push_signal(
        Signal::new("pong", vec![NetValue::Int(4), NetValue::Str("ok".into())]),
        NetworkTrace::from_sender("relay"),
    );
    p.tick(&mut kernel, 0.05);
    assert_eq!(kernel.serial(), ["pong 4 ok".to_string()].as_slice());
}

#[test]
fn test_one_signal_per_tick_in_queue_order() {
    let clock = Rc::new(ManualClock::new(0));
    let mut kernel = SimKernel::new();
    let mut p = processor(
        "while true do print((event.pull())) computer.skip() end",
        &clock,
    );
    p.reset(&mut kernel);
    p.tick(&mut kernel, 0.05);

    for name in ["a", "b", "c"] {
        kernel.push_signal(Signal::new(name, Vec::new()), NetworkTrace::from_sender("x"));
    }
    p.tick(&mut kernel, 0.05);
    assert_eq!(kernel.serial(), ["a".to_string()].as_slice());
    p.tick(&mut kernel, 0.05);
    p.tick(&mut kernel, 0.05);
    assert_eq!(
        kernel.take_serial(),
        vec!["a".to_string(), "b".to_string(), "c".to_string()]
    );
}

#[test]
fn test_malformed_signal_crashes() {
    let clock = Rc::new(ManualClock::new(0));
    let mut kernel = SimKernel::new();
    let mut p = processor("event.pull()", &clock);
    p.reset(&mut kernel);
    p.tick(&mut kernel, 0.05);

    kernel.push_malformed_signal();
    p.tick(&mut kernel, 0.05);
    assert_eq!(kernel.state(), KernelState::Crashed);
    assert_eq!(kernel.crash_report().unwrap().message, "malformed signal");
    assert_eq!(p.status(), Some(VMStatus::Crashed));
}

#[test]
fn test_sender_object_describes_trace() {
    let clock = Rc::new(ManualClock::new(0));
    let mut kernel = SimKernel::new();
    kernel.push_signal(Signal::new("hi", Vec::new()), NetworkTrace::from_sender("door"));
    let mut p = processor("local _, sender = event.pull(0)\nprint(type(sender))", &clock);
    p.reset(&mut kernel);
    p.tick(&mut kernel, 0.05);
    assert_eq!(kernel.serial(), ["userdata".to_string()].as_slice());
}
