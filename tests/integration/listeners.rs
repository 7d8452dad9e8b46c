//! File system listener tests
//!
//! Unmounting a file system or removing a node closes the guest handles that
//! depended on it; the guest sees a closed file on its next access.

use std::rc::Rc;

use tickcore::kernel::{Kernel, KernelState, ManualClock, MemoryFileSystem, SimKernel};
use tickcore::processor::Processor;
use tickcore::util::config::ProcessorConfig;

const TWO_DISKS: &str = "
    local a = filesystem.open('/disk1/a.txt', 'w')
    local b = filesystem.open('/disk2/b.txt', 'w')
    a:write('1')
    b:write('2')
    computer.skip()
    b:write('3')
    print('disk2 still open')
    computer.skip()
    b:write('4')
    print('unreachable')
";

fn two_disk_kernel() -> SimKernel {
    let mut kernel = SimKernel::new();
    if let Some(fs) = kernel.memory_fs() {
        fs.unmount("/");
        fs.mount("/disk1");
        fs.mount("/disk2");
    }
    kernel
}

fn processor(source: &str) -> Processor {
    let mut processor = Processor::with_clock(ProcessorConfig::default(), Rc::new(ManualClock::new(0)));
    processor.set_eeprom(Some(Rc::new(source.to_string())));
    processor
}

#[test]
fn test_unmount_then_node_removal_close_handles() {
    let mut kernel = two_disk_kernel();
    let mut p = processor(TWO_DISKS);
    p.reset(&mut kernel);
    p.tick(&mut kernel, 0.05);
    assert_eq!(p.open_files(), 2);

    kernel.memory_fs().unwrap().unmount("/disk1");
    p.on_unmounted(&mut kernel, "/disk1");
    assert_eq!(p.open_files(), 1);

    p.tick(&mut kernel, 0.05);
    assert!(kernel.crash_report().is_none(), "{:?}", kernel.crash_report());
    assert_eq!(kernel.serial(), ["disk2 still open".to_string()].as_slice());

    kernel.memory_fs().unwrap().remove("/disk2/b.txt");
    p.on_node_removed(&mut kernel, "/disk2/b.txt");
    assert_eq!(p.open_files(), 0);

    p.tick(&mut kernel, 0.05);
    assert_eq!(kernel.state(), KernelState::Crashed);
    let crash = kernel.crash_report().unwrap();
    assert!(crash.message.contains("file is closed"), "{}", crash.message);
    assert_eq!(kernel.serial().len(), 1);
}

#[test]
fn test_unmounted_handle_is_closed_for_the_guest() {
    let mut kernel = two_disk_kernel();
    let mut p = processor(
        "local a = filesystem.open('/disk1/a.txt', 'w')
         computer.skip()
         a:write('late')",
    );
    p.reset(&mut kernel);
    p.tick(&mut kernel, 0.05);
    assert_eq!(p.open_files(), 1);

    kernel.memory_fs().unwrap().unmount("/disk1");
    p.on_unmounted(&mut kernel, "/disk1");
    assert_eq!(p.open_files(), 0);

    p.tick(&mut kernel, 0.05);
    let crash = kernel.crash_report().unwrap();
    assert!(crash.message.contains("file is closed"), "{}", crash.message);
}

#[test]
fn test_removing_another_node_keeps_handles_open() {
    let mut kernel = two_disk_kernel();
    let mut p = processor(TWO_DISKS);
    p.reset(&mut kernel);
    p.tick(&mut kernel, 0.05);

    kernel.memory_fs().unwrap().put("/disk2/other.txt", "x");
    kernel.memory_fs().unwrap().remove("/disk2/other.txt");
    p.on_node_removed(&mut kernel, "/disk2/other.txt");
    assert_eq!(p.open_files(), 2);

    kernel.memory_fs().unwrap().mount("/disk3");
    kernel.memory_fs().unwrap().unmount("/disk3");
    p.on_unmounted(&mut kernel, "/disk3");
    assert_eq!(p.open_files(), 2);
}

#[test]
fn test_memory_file_system_keeps_contents_across_unmount() {
    let mut fs = MemoryFileSystem::new();
    fs.mount("/disk1");
    fs.put("/disk1/a.txt", "kept");
    fs.unmount("/disk1");
    assert_eq!(fs.contents("/disk1/a.txt").as_deref(), Some("kept"));
    assert_eq!(fs.contents("/disk1/missing.txt"), None);
}
