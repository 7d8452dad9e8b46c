//! VM 模块测试
//!
//! 从源码编译并在模拟主机上执行

use crate::frontend::compile;
use crate::kernel::{ManualClock, SimKernel};
use crate::processor::{FileTracker, HostContext, PullSlot};
use crate::runtime::value::Value;
use crate::vm::{ResumeStatus, VMConfig, VMError, VMResult, VMStatus, VM};

struct Host {
    kernel: SimKernel,
    pull: PullSlot,
    files: FileTracker,
    clock: ManualClock,
}

impl Host {
    fn new() -> Self {
        Self {
            kernel: SimKernel::new(),
            pull: PullSlot::default(),
            files: FileTracker::new(),
            clock: ManualClock::new(0),
        }
    }

    fn resume(
        &mut self,
        vm: &mut VM,
        args: Vec<Value>,
    ) -> VMResult<ResumeStatus> {
        vm.begin_tick();
        let mut host = HostContext {
            kernel: &mut self.kernel,
            pull: &mut self.pull,
            files: &mut self.files,
            clock: &self.clock,
            uptime: 0.0,
            built_ms: 0,
        };
        vm.resume(&mut host, args)
    }
}

fn load(source: &str) -> VM {
    VM::new(compile(source).unwrap(), VMConfig::default()).unwrap()
}

/// Resume until the program finishes, failing on errors
fn run(source: &str) -> (VM, Host) {
    let mut vm = load(source);
    let mut host = Host::new();
    for _ in 0..100 {
        match host.resume(&mut vm, Vec::new()) {
            Ok(ResumeStatus::Finished) => return (vm, host),
            Ok(ResumeStatus::Yielded) => continue,
            Err(e) => panic!("guest failed: {}", e),
        }
    }
    panic!("program did not finish");
}

fn run_err(source: &str) -> VMError {
    let mut vm = load(source);
    let mut host = Host::new();
    for _ in 0..100 {
        match host.resume(&mut vm, Vec::new()) {
            Ok(ResumeStatus::Finished) => panic!("program finished without error"),
            Ok(ResumeStatus::Yielded) => continue,
            Err(e) => {
                assert_eq!(vm.status(), VMStatus::Crashed);
                return e;
            }
        }
    }
    panic!("program did not fail");
}

fn str(s: &str) -> Value {
    Value::Str(s.into())
}

#[cfg(test)]
mod executor_tests {
    use super::*;

    #[test]
    fn test_arithmetic_and_globals() {
        let (vm, _) = run("a = 1 + 2 * 3\nb = 7 // 2\nc = 7 / 2\nd = 2 ^ 10\ne = -7 % 3");
        assert_eq!(vm.global("a"), Value::Int(7));
        assert_eq!(vm.global("b"), Value::Int(3));
        assert_eq!(vm.global("c"), Value::Float(3.5));
        assert_eq!(vm.global("d"), Value::Float(1024.0));
        assert_eq!(vm.global("e"), Value::Int(2));
        assert_eq!(vm.status(), VMStatus::Finished);
    }

    #[test]
    fn test_string_concat_and_methods() {
        let (vm, _) = run("s = 'ab' .. 1 .. 'c'\nu = ('xy'):upper()\nn = #s");
        assert_eq!(vm.global("s"), str("ab1c"));
        assert_eq!(vm.global("u"), str("XY"));
        assert_eq!(vm.global("n"), Value::Int(4));
    }

    #[test]
    fn test_short_circuit() {
        let (vm, _) = run("a = nil and error('x')\nb = 1 or error('y')\nc = false or 'z'");
        assert_eq!(vm.global("a"), Value::Nil);
        assert_eq!(vm.global("b"), Value::Int(1));
        assert_eq!(vm.global("c"), str("z"));
    }

    #[test]
    fn test_control_flow() {
        let (vm, _) = run(
            "local n = 0
             for i = 1, 10 do
                 if i % 2 == 0 then n = n + i elseif i == 5 then n = n + 100 end
             end
             local w = 0
             while true do w = w + 1 if w >= 3 then break end end
             local r = 0
             repeat local done = r > 4; r = r + 1 until done
             total, wcount, rcount = n, w, r",
        );
        assert_eq!(vm.global("total"), Value::Int(130));
        assert_eq!(vm.global("wcount"), Value::Int(3));
        assert_eq!(vm.global("rcount"), Value::Int(6));
    }

    #[test]
    fn test_numeric_for_float_and_negative_step() {
        let (vm, _) = run(
            "local s = 0
             for x = 1, 0, -0.25 do s = s + x end
             local c = 0
             for i = 3, 1 do c = c + 1 end
             sum, count = s, c",
        );
        assert_eq!(vm.global("sum"), Value::Float(2.5));
        assert_eq!(vm.global("count"), Value::Int(0));
    }

    #[test]
    fn test_generic_for_over_pairs_and_ipairs() {
        let (vm, _) = run(
            "local t = {10, 20, 30, x = 1}
             local s = 0
             for i, v in ipairs(t) do s = s + i * v end
             local keys = 0
             for k in pairs(t) do keys = keys + 1 end
             sum, keys_seen = s, keys",
        );
        assert_eq!(vm.global("sum"), Value::Int(140));
        assert_eq!(vm.global("keys_seen"), Value::Int(4));
    }

    #[test]
    fn test_closures_share_cells() {
        let (vm, _) = run(
            "local function counter()
                 local n = 0
                 return function() n = n + 1 return n end
             end
             local a, b = counter(), counter()
             a() a()
             first, second = a(), b()",
        );
        assert_eq!(vm.global("first"), Value::Int(3));
        assert_eq!(vm.global("second"), Value::Int(1));
    }

    #[test]
    fn test_loop_closures_capture_fresh_variables() {
        let (vm, _) = run(
            "local fs = {}
             for i = 1, 3 do fs[i] = function() return i end end
             result = fs[1]() + fs[2]() * 10 + fs[3]() * 100",
        );
        assert_eq!(vm.global("result"), Value::Int(321));
    }

    #[test]
    fn test_recursion_and_multiple_returns() {
        let (vm, _) = run(
            "local function fib(n) if n < 2 then return n end return fib(n - 1) + fib(n - 2) end
             local function two() return 1, 2 end
             local t = {two(), two()}
             f10, len = fib(10), #t
             x, y, z = two()",
        );
        assert_eq!(vm.global("f10"), Value::Int(55));
        assert_eq!(vm.global("len"), Value::Int(3));
        assert_eq!(vm.global("z"), Value::Nil);
        assert_eq!(vm.global("y"), Value::Int(2));
    }

    #[test]
    fn test_method_calls_and_swap() {
        let (vm, _) = run(
            "local obj = {v = 5}
             function obj:get(k) return self.v * k end
             local a, b = 1, 2
             a, b = b, a
             r, sa, sb = obj:get(3), a, b",
        );
        assert_eq!(vm.global("r"), Value::Int(15));
        assert_eq!(vm.global("sa"), Value::Int(2));
        assert_eq!(vm.global("sb"), Value::Int(1));
    }

    #[test]
    fn test_print_goes_to_serial() {
        let (_, host) = run("print('hello', 1, nil, true)");
        assert_eq!(host.kernel.serial(), ["hello 1 nil true".to_string()].as_slice());
    }

    #[test]
    fn test_skip_yields_to_host() {
        let mut vm = load("n = 1\ncomputer.skip()\nn = 2");
        let mut host = Host::new();
        assert_eq!(host.resume(&mut vm, Vec::new()).unwrap(), ResumeStatus::Yielded);
        assert_eq!(vm.global("n"), Value::Int(1));
        assert_eq!(vm.status(), VMStatus::Yielded);
        assert_eq!(host.resume(&mut vm, Vec::new()).unwrap(), ResumeStatus::Finished);
        assert_eq!(vm.global("n"), Value::Int(2));
    }
}

#[cfg(test)]
mod coroutine_tests {
    use super::*;

    #[test]
    fn test_resume_and_yield_values() {
        let (vm, _) = run(
            "local co = coroutine.create(function(a)
                 local b = coroutine.yield(a + 1, 'mid')
                 return b * 2
             end)
             v1, tag = coroutine.resume(co, 1)
             v2 = coroutine.resume(co, 10)
             st = coroutine.status(co)",
        );
        assert_eq!(vm.global("v1"), Value::Int(2));
        assert_eq!(vm.global("tag"), str("mid"));
        assert_eq!(vm.global("v2"), Value::Int(20));
        assert_eq!(vm.global("st"), str("dead"));
    }

    #[test]
    fn test_error_inside_coroutine_reaches_host() {
        let err = run_err(
            "local co = coroutine.create(function() error('boom') end)
             coroutine.resume(co)",
        );
        assert!(err.to_string().contains("boom"), "{}", err);
    }

    #[test]
    fn test_resume_dead_coroutine_fails() {
        let err = run_err(
            "local co = coroutine.create(function() end)
             coroutine.resume(co)
             coroutine.resume(co)",
        );
        assert!(err.to_string().contains("cannot resume dead coroutine"), "{}", err);
    }

    #[test]
    fn test_host_yield_inside_nested_coroutine() {
        let mut vm = load(
            "local inner = coroutine.create(function()
                 computer.skip()
                 coroutine.yield('inner')
             end)
             local outer = coroutine.create(function()
                 return coroutine.resume(inner)
             end)
             got = coroutine.resume(outer)",
        );
        let mut host = Host::new();
        assert_eq!(host.resume(&mut vm, Vec::new()).unwrap(), ResumeStatus::Yielded);
        assert_eq!(vm.global("got"), Value::Nil);
        assert_eq!(host.resume(&mut vm, Vec::new()).unwrap(), ResumeStatus::Finished);
        assert_eq!(vm.global("got"), str("inner"));
    }
}

#[cfg(test)]
mod error_tests {
    use super::*;

    #[test]
    fn test_runtime_error_has_position_and_traceback() {
        let err = run_err("local x = 1\nlocal function f() return nil + 1 end\nf()");
        let text = err.to_string();
        assert!(text.starts_with("EEPROM:2: attempt to perform arithmetic"), "{}", text);
        assert!(text.contains("stack traceback:"));
        assert!(text.contains("in function 'f'"));
        assert!(text.contains("in main chunk"));
    }

    #[test]
    fn test_error_builtin_message() {
        let err = run_err("error('custom failure')");
        assert!(err.to_string().contains("custom failure"));
    }

    #[test]
    fn test_stack_overflow() {
        let err = run_err("local function f() return 1 + f() end\nf()");
        assert!(err.to_string().contains("stack overflow"), "{}", err);
    }

    #[test]
    fn test_out_of_time() {
        let mut vm = VM::new(
            compile("while true do end").unwrap(),
            VMConfig {
                speed: 100,
                ..VMConfig::default()
            },
        )
        .unwrap();
        let mut host = Host::new();
        let err = host.resume(&mut vm, Vec::new()).unwrap_err();
        assert!(err.to_string().contains("out of time"), "{}", err);
        assert_eq!(vm.status(), VMStatus::Crashed);
    }

    #[test]
    fn test_crashed_context_cannot_resume() {
        let mut vm = load("error('x')");
        let mut host = Host::new();
        assert!(host.resume(&mut vm, Vec::new()).is_err());
        assert!(matches!(
            host.resume(&mut vm, Vec::new()),
            Err(VMError::InvalidState(_))
        ));
    }
}
