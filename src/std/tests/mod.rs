//! 标准库测试
//!
//! 通过完整的执行上下文调用每个库的原生函数

use crate::frontend::compile;
use crate::kernel::{ManualClock, NetValue, NetworkTrace, Signal, SimKernel};
use crate::processor::{FileTracker, HostContext, PullSlot, PullState};
use crate::runtime::value::Value;
use crate::std::{all_exports, MODULES};
use crate::vm::{ResumeStatus, VMConfig, VMError, VMResult, VM};

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
            clock: ManualClock::new(1_000),
        }
    }

    fn resume(
        &mut self,
        vm: &mut VM,
        args: Vec<Value>,
    ) -> VMResult<ResumeStatus> {
        vm.begin_tick();
        vm.resolve_futures(&mut self.kernel);
        let mut host = HostContext {
            kernel: &mut self.kernel,
            pull: &mut self.pull,
            files: &mut self.files,
            clock: &self.clock,
            uptime: 2.5,
            built_ms: 400,
        };
        vm.resume(&mut host, args)
    }
}

fn load(source: &str) -> VM {
    VM::new(compile(source).unwrap(), VMConfig::default()).unwrap()
}

fn run_with(
    host: &mut Host,
    source: &str,
) -> VM {
    let mut vm = load(source);
    for _ in 0..20 {
        match host.resume(&mut vm, Vec::new()) {
            Ok(ResumeStatus::Finished) => return vm,
            Ok(ResumeStatus::Yielded) => continue,
            Err(e) => panic!("guest failed: {}", e),
        }
    }
    panic!("program did not finish");
}

fn run(source: &str) -> VM {
    run_with(&mut Host::new(), source)
}

fn run_err(source: &str) -> VMError {
    let mut vm = load(source);
    let mut host = Host::new();
    match host.resume(&mut vm, Vec::new()) {
        Err(e) => e,
        Ok(status) => panic!("expected failure, got {:?}", status),
    }
}

fn str(s: &str) -> Value {
    Value::Str(s.into())
}

#[cfg(test)]
mod registry_tests {
    use super::*;

    #[test]
    fn test_export_names_are_unique() {
        let exports = all_exports();
        let mut names: Vec<&str> = exports.iter().map(|e| e.qualified_name).collect();
        let total = names.len();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), total);
        assert!(MODULES.len() >= 9);
    }

    #[test]
    fn test_natives_keep_registration_order() {
        let a = load("");
        let b = load("return 1");
        let names_a: Vec<&str> = a.natives().iter().map(|e| e.qualified_name).collect();
        let names_b: Vec<&str> = b.natives().iter().map(|e| e.qualified_name).collect();
        assert_eq!(names_a, names_b);
    }
}

#[cfg(test)]
mod base_tests {
    use super::*;

    #[test]
    fn test_type_and_conversions() {
        let vm = run(
            "a = type(1)
             b = type('x')
             c = type({})
             d = type(print)
             e = tostring(12)
             f = tonumber('0x10')
             g = tonumber('z', 36)
             h = tonumber('nope')",
        );
        assert_eq!(vm.global("a"), str("number"));
        assert_eq!(vm.global("b"), str("string"));
        assert_eq!(vm.global("c"), str("table"));
        assert_eq!(vm.global("d"), str("function"));
        assert_eq!(vm.global("e"), str("12"));
        assert_eq!(vm.global("f"), Value::Int(16));
        assert_eq!(vm.global("g"), Value::Int(35));
        assert_eq!(vm.global("h"), Value::Nil);
    }

    #[test]
    fn test_assert_and_error_level() {
        let err = run_err("assert(false, 'nope')");
        assert!(err.to_string().contains("nope"));
        let err = run_err("error('plain', 0)");
        assert!(err.to_string().starts_with("plain"), "{}", err);
    }

    #[test]
    fn test_raw_access() {
        let vm = run("local t = {}\nrawset(t, 'k', 3)\nv = rawget(t, 'k')\nn = rawlen({1, 2})");
        assert_eq!(vm.global("v"), Value::Int(3));
        assert_eq!(vm.global("n"), Value::Int(2));
    }
}

#[cfg(test)]
mod string_tests {
    use super::*;

    #[test]
    fn test_basic_functions() {
        let vm = run(
            "a = string.sub('hello', 2, -2)
             b = string.rep('ab', 3, '-')
             c = string.reverse('abc')
             d = string.byte('A')
             e = string.char(72, 105)
             f = ('MiXeD'):lower()",
        );
        assert_eq!(vm.global("a"), str("ell"));
        assert_eq!(vm.global("b"), str("ab-ab-ab"));
        assert_eq!(vm.global("c"), str("cba"));
        assert_eq!(vm.global("d"), Value::Int(65));
        assert_eq!(vm.global("e"), str("Hi"));
        assert_eq!(vm.global("f"), str("mixed"));
    }

    #[test]
    fn test_rep_of_empty_strings_is_empty() {
        let vm = run(
            "a = #(''):rep(1000000000000000000)
             b = string.rep('', 1000000000000000000, '')
             c = string.rep('', 3, ',')",
        );
        assert_eq!(vm.global("a"), Value::Int(0));
        assert_eq!(vm.global("b"), str(""));
        assert_eq!(vm.global("c"), str(",,"));
    }

    #[test]
    fn test_rep_too_large_is_an_error() {
        let err = run_err("local s = ('x'):rep(1000000000000000000)");
        assert!(err.to_string().contains("resulting string too large"), "{}", err);
        let err = run_err("local s = string.rep('', 1000000000000000000, ',')");
        assert!(err.to_string().contains("resulting string too large"), "{}", err);
    }

    #[test]
    fn test_format() {
        let vm = run("s = string.format('%d-%5.2f-%s-%x-%%', 7, 3.14159, 'ok', 255)");
        assert_eq!(vm.global("s"), str("7- 3.14-ok-ff-%"));
    }
}

#[cfg(test)]
mod table_tests {
    use super::*;

    #[test]
    fn test_insert_remove_concat() {
        let vm = run(
            "local t = {1, 2, 3}
             table.insert(t, 4)
             table.insert(t, 1, 0)
             removed = table.remove(t)
             joined = table.concat(t, ',')",
        );
        assert_eq!(vm.global("removed"), Value::Int(4));
        assert_eq!(vm.global("joined"), str("0,1,2,3"));
    }

    #[test]
    fn test_unpack() {
        let vm = run("a, b, c = table.unpack({5, 6, 7})");
        assert_eq!(vm.global("a"), Value::Int(5));
        assert_eq!(vm.global("c"), Value::Int(7));
    }
}

#[cfg(test)]
mod math_tests {
    use super::*;

    #[test]
    fn test_math_functions() {
        let vm = run(
            "a = math.floor(3.7)
             b = math.ceil(3.2)
             c = math.max(1, 9, 4)
             d = math.abs(-2)
             e = math.tointeger(4.0)
             f = math.huge > 1e308
             g = math.pi > 3.14",
        );
        assert_eq!(vm.global("a"), Value::Int(3));
        assert_eq!(vm.global("b"), Value::Int(4));
        assert_eq!(vm.global("c"), Value::Int(9));
        assert_eq!(vm.global("d"), Value::Int(2));
        assert_eq!(vm.global("e"), Value::Int(4));
        assert_eq!(vm.global("f"), Value::Bool(true));
        assert_eq!(vm.global("g"), Value::Bool(true));
    }

    #[test]
    fn test_random_in_range() {
        let vm = run("r = math.random(1, 6)\nok = r >= 1 and r <= 6");
        assert_eq!(vm.global("ok"), Value::Bool(true));
    }
}

#[cfg(test)]
mod computer_tests {
    use super::*;

    #[test]
    fn test_clock_functions() {
        let vm = run("ms = computer.millis()\nt = computer.time()\nmem = computer.memory()");
        assert_eq!(vm.global("ms"), Value::Int(600));
        assert_eq!(vm.global("t"), Value::Float(2.5));
        assert!(matches!(vm.global("mem"), Value::Int(n) if n > 0));
    }
}

#[cfg(test)]
mod event_tests {
    use super::*;

    #[test]
    fn test_pull_returns_queued_signal() {
        let mut host = Host::new();
        host.kernel.push_signal(
            Signal::new("ping", vec![NetValue::Int(5), NetValue::Str("x".into())]),
            NetworkTrace::from_sender("sensor"),
        );
        let vm = run_with(&mut host, "name, sender, a, b = event.pull()");
        assert_eq!(vm.global("name"), str("ping"));
        assert!(matches!(vm.global("sender"), Value::Object(_)));
        assert_eq!(vm.global("a"), Value::Int(5));
        assert_eq!(vm.global("b"), str("x"));
        assert_eq!(host.pull.state, PullState::None);
    }

    #[test]
    fn test_pull_zero_timeout_returns_nothing() {
        let vm = run("local s = event.pull(0)\nempty = s == nil");
        assert_eq!(vm.global("empty"), Value::Bool(true));
    }

    #[test]
    fn test_pull_without_signal_suspends_to_host() {
        let mut vm = load("name = event.pull(2)");
        let mut host = Host::new();
        assert_eq!(host.resume(&mut vm, Vec::new()).unwrap(), ResumeStatus::Yielded);
        assert_eq!(host.pull.state, PullState::Timed);
        assert_eq!(host.pull.timeout, 2.0);
        assert_eq!(host.pull.start_ms, 1_000);

        let status = host.resume(&mut vm, vec![str("late")]).unwrap();
        assert_eq!(status, ResumeStatus::Finished);
        assert_eq!(vm.global("name"), str("late"));
    }

    #[test]
    fn test_pull_without_timeout_is_unbounded() {
        let mut vm = load("event.pull()");
        let mut host = Host::new();
        host.resume(&mut vm, Vec::new()).unwrap();
        assert_eq!(host.pull.state, PullState::Unbounded);
    }
}

#[cfg(test)]
mod component_tests {
    use super::*;

    #[test]
    fn test_invoke_ready_device() {
        let vm = run("a, b = component.invoke('echo', 1, 'two')");
        assert_eq!(vm.global("a"), Value::Int(1));
        assert_eq!(vm.global("b"), str("two"));
    }

    #[test]
    fn test_invoke_unknown_method_fails() {
        let err = run_err("component.invoke('missing')");
        assert!(err.to_string().contains("no such method 'missing'"), "{}", err);
    }

    #[test]
    fn test_deferred_future_awaits_across_ticks() {
        let mut vm = load(
            "local f = component.invoke('echo_async', 42)
             ready = f:canGet()
             early = f:get()
             value = f:await()",
        );
        let mut host = Host::new();
        assert_eq!(host.resume(&mut vm, Vec::new()).unwrap(), ResumeStatus::Yielded);
        assert_eq!(vm.global("ready"), Value::Bool(false));
        assert_eq!(vm.global("early"), Value::Nil);
        assert_eq!(host.resume(&mut vm, Vec::new()).unwrap(), ResumeStatus::Finished);
        assert_eq!(vm.global("value"), Value::Int(42));
    }
}

#[cfg(test)]
mod filesystem_tests {
    use super::*;

    #[test]
    fn test_write_then_read() {
        let mut host = Host::new();
        let vm = run_with(
            &mut host,
            "local f = filesystem.open('/notes.txt', 'w')
             f:write('hello ', 'world')
             f:close()
             local g = filesystem.open('/notes.txt')
             first = g:read(5)
             rest = g:read('a')
             eof = g:read(1)
             g:close()
             there = filesystem.exists('/notes.txt')",
        );
        assert_eq!(vm.global("first"), str("hello"));
        assert_eq!(vm.global("rest"), str(" world"));
        assert_eq!(vm.global("eof"), Value::Nil);
        assert_eq!(vm.global("there"), Value::Bool(true));
    }

    #[test]
    fn test_closed_file_rejects_io() {
        let err = run_err(
            "local f = filesystem.open('/a.txt', 'w')
             f:close()
             f:write('x')",
        );
        assert!(err.to_string().contains("file is closed"), "{}", err);
    }

    #[test]
    fn test_missing_filesystem() {
        let mut vm = load("filesystem.open('/x', 'w')");
        let mut host = Host::new();
        host.kernel = SimKernel::new().without_filesystem();
        assert!(host.resume(&mut vm, Vec::new()).is_err());
    }
}
