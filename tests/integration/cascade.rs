//! Yield cascade tests
//!
//! Host interruptions inside nested coroutines unwind to the processor and
//! come back down on the next tick, invisible to the guest frames between.

use std::rc::Rc;

use tickcore::kernel::{Kernel, KernelState, ManualClock, SimKernel};
use tickcore::processor::Processor;
use tickcore::util::config::ProcessorConfig;

fn run_to_end(
    source: &str,
    speed: u32,
) -> (SimKernel, u32) {
    let mut kernel = SimKernel::new();
    let config = ProcessorConfig {
        speed,
        ..ProcessorConfig::default()
    };
    let mut processor = Processor::with_clock(config, Rc::new(ManualClock::new(0)));
    processor.set_eeprom(Some(Rc::new(source.to_string())));
    processor.reset(&mut kernel);

    let mut ticks = 0;
    while kernel.state() == KernelState::Running && ticks < 500 {
        processor.tick(&mut kernel, 0.05);
        ticks += 1;
    }
    (kernel, ticks)
}

#[test]
fn test_interrupt_in_third_level_resumes_every_level() {
    let source = "
        local c = coroutine.create(function()
            for i = 1, 40 do print(i) end
            coroutine.yield('inner', 3)
            return 'unreached'
        end)
        local b = coroutine.create(function()
            local tag, n = coroutine.resume(c)
            return tag, n + 1
        end)
        local a = coroutine.create(function()
            local tag, n = coroutine.resume(b)
            return tag .. ':' .. n
        end)
        print(coroutine.resume(a))
    ";
    let (kernel, ticks) = run_to_end(source, 150);

    assert!(kernel.crash_report().is_none(), "{:?}", kernel.crash_report());
    assert_eq!(kernel.state(), KernelState::Shutoff);
    assert!(ticks >= 2, "budget never interrupted the program");

    let serial = kernel.serial();
    let expected: Vec<String> = (1..=40).map(|i| i.to_string()).collect();
    assert_eq!(&serial[..40], expected.as_slice());
    assert_eq!(serial[40], "inner:4");
    assert_eq!(serial.len(), 41);
}

#[test]
fn test_host_calls_are_not_repeated_across_interrupts() {
    let source = "
        local co = coroutine.create(function()
            for i = 1, 25 do
                component.invoke('log', i)
            end
        end)
        coroutine.resume(co)
    ";
    let calls = Rc::new(std::cell::RefCell::new(Vec::new()));
    let mut kernel = SimKernel::new();
    let seen = calls.clone();
    kernel.add_device("log", move |args| {
        seen.borrow_mut().push(args.to_vec());
        Ok(Vec::new())
    });

    let config = ProcessorConfig {
        speed: 80,
        ..ProcessorConfig::default()
    };
    let mut processor = Processor::with_clock(config, Rc::new(ManualClock::new(0)));
    processor.set_eeprom(Some(Rc::new(source.to_string())));
    processor.reset(&mut kernel);
    let mut ticks = 0;
    while kernel.state() == KernelState::Running && ticks < 500 {
        processor.tick(&mut kernel, 0.05);
        ticks += 1;
    }

    assert!(kernel.crash_report().is_none(), "{:?}", kernel.crash_report());
    assert!(ticks > 1);
    assert_eq!(calls.borrow().len(), 25);
}

#[test]
fn test_user_yield_values_reach_only_the_direct_resumer() {
    let source = "
        local gen = coroutine.create(function()
            for i = 1, 3 do
                computer.skip()
                coroutine.yield(i * 10)
            end
        end)
        local sum = 0
        for _ = 1, 3 do
            sum = sum + coroutine.resume(gen)
        end
        print(sum)
    ";
    let (kernel, ticks) = run_to_end(source, 15000);
    assert!(kernel.crash_report().is_none(), "{:?}", kernel.crash_report());
    assert_eq!(kernel.serial(), ["60".to_string()].as_slice());
    assert_eq!(ticks, 4);
}

#[test]
fn test_resuming_after_the_first_interrupt_parks_until_next_tick() {
    let source = "
        local gen = coroutine.create(function(x)
            local total = 0
            while true do
                total = total + x
                x = coroutine.yield(total)
            end
        end)
        local last
        for n = 1, 1000 do
            last = coroutine.resume(gen, n)
        end
        print(last)
    ";
    let (kernel, ticks) = run_to_end(source, 300);
    assert!(kernel.crash_report().is_none(), "{:?}", kernel.crash_report());
    assert_eq!(kernel.serial(), ["500500".to_string()].as_slice());
    assert!(ticks >= 2);
}
