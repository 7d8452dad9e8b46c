//! Open file handle tracking
//!
//! The heap owns file handles; the tracker only holds weak references so it
//! can force-close them on unmount, node removal, reset and before a save.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use tracing::debug;

use crate::kernel::{FileContainer, FileRef};
use crate::runtime::memory::{Heap, HeapValue};

#[derive(Debug, Default)]
pub struct FileTracker {
    handles: Vec<Weak<RefCell<FileContainer>>>,
}

impl FileTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(
        &mut self,
        file: &FileRef,
    ) {
        let weak = Rc::downgrade(file);
        if !self.handles.iter().any(|h| h.ptr_eq(&weak)) {
            self.handles.push(weak);
        }
    }

    /// Drop handles whose stream reference is no longer valid
    pub fn reconcile(&mut self) {
        self.handles.retain(|h| match h.upgrade() {
            Some(file) => file.try_borrow().map(|c| c.is_open()).unwrap_or(true),
            None => false,
        });
    }

    /// Force-close every tracked handle
    pub fn close_all(&mut self) {
        for file in self.live() {
            file.borrow_mut().close();
        }
        self.handles.clear();
    }

    /// Capture position and mode of every open handle and close its stream
    pub fn park_all(&mut self) {
        for file in self.live() {
            file.borrow_mut().park();
        }
    }

    /// Force-close the handles matching `pred`; returns how many were closed
    pub fn close_where(
        &mut self,
        mut pred: impl FnMut(&FileContainer) -> bool,
    ) -> usize {
        let mut closed = 0;
        for file in self.live() {
            let mut container = file.borrow_mut();
            if container.is_open() && pred(&container) {
                debug!(path = %container.path, "force-closing file handle");
                container.close();
                closed += 1;
            }
        }
        self.reconcile();
        closed
    }

    /// Track every file handle living in `heap`, after a restore
    pub fn adopt(
        &mut self,
        heap: &Heap,
    ) {
        for handle in heap.handles() {
            if let Some(HeapValue::File(shared)) = heap.get(handle) {
                self.track(&shared.0);
            }
        }
        self.reconcile();
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    fn live(&self) -> Vec<FileRef> {
        self.handles.iter().filter_map(Weak::upgrade).collect()
    }
}
