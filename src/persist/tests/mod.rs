//! 快照编解码测试
//!
//! 在挂起点编码，恢复到新建的执行上下文后继续运行

use crate::frontend::compile;
use crate::kernel::{ManualClock, SimKernel};
use crate::persist::{is_trivial, restore, snapshot, PersistError, Snapshot};
use crate::processor::{FileTracker, HostContext, PullSlot};
use crate::runtime::value::Value;
use crate::vm::{ResumeStatus, VMConfig, VMResult, VMStatus, VM};

fn resume(
    vm: &mut VM,
    kernel: &mut SimKernel,
) -> VMResult<ResumeStatus> {
    let mut pull = PullSlot::default();
    let mut files = FileTracker::new();
    let clock = ManualClock::new(0);
    vm.begin_tick();
    let mut host = HostContext {
        kernel,
        pull: &mut pull,
        files: &mut files,
        clock: &clock,
        uptime: 0.0,
        built_ms: 0,
    };
    vm.resume(&mut host, Vec::new())
}

fn load(source: &str) -> VM {
    VM::new(compile(source).unwrap(), VMConfig::default()).unwrap()
}

/// Run until the first suspension, snapshot, and restore into a fresh context
fn suspend_and_move(source: &str) -> (VM, VM, SimKernel) {
    let mut kernel = SimKernel::new();
    let mut original = load(source);
    assert_eq!(resume(&mut original, &mut kernel).unwrap(), ResumeStatus::Yielded);
    let snap = snapshot(&mut original).unwrap();

    let mut restored = load(source);
    restore(&mut restored, &snap.globals, &snap.thread).unwrap();
    assert_eq!(restored.status(), VMStatus::Yielded);
    (original, restored, kernel)
}

fn finish(
    vm: &mut VM,
    kernel: &mut SimKernel,
) {
    for _ in 0..20 {
        if resume(vm, kernel).unwrap() == ResumeStatus::Finished {
            return;
        }
    }
    panic!("program did not finish");
}

#[cfg(test)]
mod round_trip_tests {
    use super::*;

    #[test]
    fn test_restored_context_continues_like_the_original() {
        let source = "local count = 0
             local function step(k) count = count + k return count end
             step(2)
             computer.skip()
             result = step(3) * 10";
        let (mut original, mut restored, mut kernel) = suspend_and_move(source);
        finish(&mut original, &mut kernel);
        finish(&mut restored, &mut kernel);
        assert_eq!(original.global("result"), Value::Int(50));
        assert_eq!(restored.global("result"), Value::Int(50));
    }

    #[test]
    fn test_identity_shared_between_sections_survives() {
        let source = "local t = {n = 1}
             shared = t
             computer.skip()
             t.n = t.n + 1
             same = shared == t
             n = shared.n";
        let (_, mut restored, mut kernel) = suspend_and_move(source);
        finish(&mut restored, &mut kernel);
        assert_eq!(restored.global("same"), Value::Bool(true));
        assert_eq!(restored.global("n"), Value::Int(2));
    }

    #[test]
    fn test_cascade_inside_nested_coroutine_survives() {
        let source = "local inner = coroutine.create(function(a)
                 computer.skip()
                 return a * 2
             end)
             local outer = coroutine.create(function(x)
                 return coroutine.resume(inner, x) + 1
             end)
             got = coroutine.resume(outer, 20)
             st = coroutine.status(inner)";
        let (_, mut restored, mut kernel) = suspend_and_move(source);
        finish(&mut restored, &mut kernel);
        assert_eq!(restored.global("got"), Value::Int(41));
        assert_eq!(restored.global("st"), Value::Str("dead".into()));
    }

    #[test]
    fn test_builtins_resolve_by_name() {
        let source = "local p = print
             local lib = string
             computer.skip()
             same_print = p == print
             same_lib = lib == string
             up = lib.upper('ok')";
        let (_, mut restored, mut kernel) = suspend_and_move(source);
        finish(&mut restored, &mut kernel);
        assert_eq!(restored.global("same_print"), Value::Bool(true));
        assert_eq!(restored.global("same_lib"), Value::Bool(true));
        assert_eq!(restored.global("up"), Value::Str("OK".into()));
    }

    #[test]
    fn test_globals_self_reference_restored() {
        let (_, restored, _) = suspend_and_move("computer.skip()");
        assert_eq!(restored.global("_G"), Value::Table(restored.globals()));
    }
}

#[cfg(test)]
mod failure_tests {
    use super::*;

    #[test]
    fn test_snapshot_requires_suspension() {
        let mut vm = load("x = 1");
        assert!(matches!(snapshot(&mut vm), Err(PersistError::NotSuspended)));

        let mut kernel = SimKernel::new();
        finish(&mut vm, &mut kernel);
        assert!(matches!(snapshot(&mut vm), Err(PersistError::NotSuspended)));
    }

    #[test]
    fn test_corrupt_input_leaves_context_untouched() {
        let mut vm = load("computer.skip()");
        let objects = vm.heap().len();
        let globals = vm.globals();

        let err = restore(&mut vm, "%%% not base64", "AAAA").unwrap_err();
        assert!(matches!(err, PersistError::Base64(_)));
        assert!(matches!(
            restore(&mut vm, "AAAAAAAA", "AAAAAAAA"),
            Err(PersistError::Codec(_))
        ));

        assert_eq!(vm.heap().len(), objects);
        assert_eq!(vm.globals(), globals);
        assert_eq!(vm.status(), VMStatus::Loaded);
    }

    #[test]
    fn test_swapped_sections_are_rejected() {
        let mut kernel = SimKernel::new();
        let mut original = load("local t = {}\ncomputer.skip()");
        resume(&mut original, &mut kernel).unwrap();
        let Snapshot { globals, thread } = snapshot(&mut original).unwrap();

        let mut target = load("local t = {}\ncomputer.skip()");
        let objects = target.heap().len();
        assert!(restore(&mut target, &thread, &globals).is_err());
        assert_eq!(target.heap().len(), objects);
        assert_eq!(target.status(), VMStatus::Loaded);
    }

    #[test]
    fn test_trivial_sections() {
        assert!(is_trivial(""));
        assert!(is_trivial("  "));
        assert!(is_trivial("AA=="));
        assert!(!is_trivial("AAAAAAAA"));
    }
}
