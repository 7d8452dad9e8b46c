//! Run driver tests

use tickcore::kernel::{KernelState, NetValue, Signal};
use tickcore::util::config::ProcessorConfig;
use tickcore::vm::VMStatus;
use tickcore::{native_listing, run, run_file, RunOptions};

#[test]
fn test_run_collects_serial_output() {
    let report = run("for i = 1, 3 do print('line', i) end", &RunOptions::default()).unwrap();
    assert_eq!(report.ticks, 1);
    assert_eq!(report.state, KernelState::Shutoff);
    assert_eq!(report.status, Some(VMStatus::Finished));
    assert_eq!(report.serial, vec!["line 1", "line 2", "line 3"]);
    assert!(report.crash.is_none());
}

#[test]
fn test_run_stops_at_tick_limit() {
    let options = RunOptions {
        ticks: 5,
        ..RunOptions::default()
    };
    let report = run("while true do computer.skip() end", &options).unwrap();
    assert_eq!(report.ticks, 5);
    assert_eq!(report.state, KernelState::Running);
}

#[test]
fn test_run_reports_crash() {
    let options = RunOptions {
        config: ProcessorConfig {
            speed: 100,
            ..ProcessorConfig::default()
        },
        ..RunOptions::default()
    };
    let report = run("while true do end", &options).unwrap();
    assert_eq!(report.state, KernelState::Crashed);
    assert!(report.crash.unwrap().message.contains("out of time"));
}

#[test]
fn test_save_then_load_continues() {
    let source = "local n = 0\nwhile true do n = n + 1\nlocal _, _, v = event.pull()\nprint(n + v) end";
    let first = RunOptions {
        ticks: 2,
        signals: vec![Signal::new("s", vec![NetValue::Int(10)])],
        save: true,
        ..RunOptions::default()
    };
    let report = run(source, &first).unwrap();
    assert_eq!(report.serial, vec!["11"]);
    let storage = report.storage.unwrap();
    assert_eq!(storage.pull_state, 2);

    let second = RunOptions {
        ticks: 3,
        signals: vec![Signal::new("s", vec![NetValue::Int(100)])],
        load: Some(storage),
        ..RunOptions::default()
    };
    let report = run(source, &second).unwrap();
    assert_eq!(report.serial, vec!["102"]);
}

#[test]
fn test_run_file_reads_source() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("main.lua");
    std::fs::write(&path, "print(1 + 1)").unwrap();
    let report = run_file(&path, &RunOptions::default()).unwrap();
    assert_eq!(report.serial, vec!["2"]);

    assert!(run_file(&dir.path().join("missing.lua"), &RunOptions::default()).is_err());
}

#[test]
fn test_native_listing_has_core_libraries() {
    let names: Vec<&str> = native_listing().into_iter().map(|(name, _)| name).collect();
    for expected in ["print", "coroutine.resume", "event.pull", "computer.skip", "filesystem.open"] {
        assert!(names.contains(&expected), "missing {}", expected);
    }
}
