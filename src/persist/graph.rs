//! Deep-graph codec
//!
//! A section is every heap object reachable from one root, renumbered densely
//! in discovery order. A reference inside the section points at an entry:
//! either an object stored by value, a permanent built-in stored by name, or
//! (thread section only) an object of the globals section, so identity shared
//! between both graphs survives a round trip.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::persist::{PermanentTable, PersistError};
use crate::runtime::memory::{remap_value, Handle, Heap, HeapValue};
use crate::runtime::value::Value;
use crate::std::NativeExport;
use crate::vm::Program;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) enum Entry {
    Local(HeapValue),
    Perm(String),
    /// Entry id in the globals section
    Shared(u32),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Section {
    /// Qualified native names in id order at encode time
    pub natives: Vec<String>,
    pub entries: Vec<Entry>,
    pub root: Value,
    pub program: Option<Program>,
}

/// Encoder state for one section
pub(crate) struct Encoder<'a> {
    heap: &'a Heap,
    perms: &'a PermanentTable,
    shared: Option<&'a HashMap<Handle, u32>>,
    ids: HashMap<Handle, u32>,
    entries: Vec<Option<Entry>>,
    queue: Vec<Handle>,
}

impl<'a> Encoder<'a> {
    pub fn new(
        heap: &'a Heap,
        perms: &'a PermanentTable,
        shared: Option<&'a HashMap<Handle, u32>>,
    ) -> Self {
        Self {
            heap,
            perms,
            shared,
            ids: HashMap::new(),
            entries: Vec::new(),
            queue: Vec::new(),
        }
    }

    fn id_for(
        &mut self,
        handle: Handle,
    ) -> Handle {
        if let Some(id) = self.ids.get(&handle) {
            return Handle::new(*id as usize);
        }
        let id = self.entries.len() as u32;
        let entry = if let Some(name) = self.perms.name_of(handle) {
            Some(Entry::Perm(name.to_string()))
        } else if let Some(shared) = self.shared.and_then(|m| m.get(&handle)) {
            Some(Entry::Shared(*shared))
        } else {
            self.queue.push(handle);
            None
        };
        self.ids.insert(handle, id);
        self.entries.push(entry);
        Handle::new(id as usize)
    }

    /// Encode everything reachable from `root`
    ///
    /// Returns the section and the handle → entry id map, which the thread
    /// section uses to link into this one.
    pub fn encode(
        mut self,
        root: &Value,
        natives: &[NativeExport],
        program: Option<Program>,
    ) -> Result<(Section, HashMap<Handle, u32>), PersistError> {
        let mut root = root.clone();
        remap_value(&mut root, &mut |h| Ok::<_, PersistError>(self.id_for(h)))?;

        let heap = self.heap;
        while let Some(handle) = self.queue.pop() {
            let mut object = heap.get(handle).cloned().ok_or(PersistError::Dangling(handle))?;
            object.remap_refs(&mut |h| Ok::<_, PersistError>(self.id_for(h)))?;
            let id = self.ids[&handle] as usize;
            self.entries[id] = Some(Entry::Local(object));
        }

        let entries = self
            .entries
            .into_iter()
            .enumerate()
            .map(|(id, e)| e.ok_or(PersistError::Malformed(format!("entry {} never encoded", id))))
            .collect::<Result<Vec<_>, _>>()?;
        let section = Section {
            natives: natives.iter().map(|n| n.qualified_name.to_string()).collect(),
            entries,
            root,
            program,
        };
        Ok((section, self.ids))
    }
}

/// Rebuild a section in `heap`
///
/// Returns the entry id → handle map and the remapped root. On failure every
/// object allocated so far is released again.
pub(crate) fn decode(
    heap: &mut Heap,
    perms: &PermanentTable,
    natives: &[NativeExport],
    section: Section,
    shared: Option<&[Handle]>,
    proto_count: usize,
) -> Result<(Vec<Handle>, Value), PersistError> {
    for (id, name) in section.natives.iter().enumerate() {
        match natives.get(id) {
            Some(export) if export.qualified_name == name => {}
            _ => return Err(PersistError::NativeMismatch(name.clone())),
        }
    }

    let mut allocated = Vec::new();
    let result = decode_into(heap, perms, section, shared, proto_count, &mut allocated);
    if result.is_err() {
        for handle in allocated {
            heap.deallocate(handle);
        }
    }
    result
}

fn decode_into(
    heap: &mut Heap,
    perms: &PermanentTable,
    section: Section,
    shared: Option<&[Handle]>,
    proto_count: usize,
    allocated: &mut Vec<Handle>,
) -> Result<(Vec<Handle>, Value), PersistError> {
    let mut map = Vec::with_capacity(section.entries.len());
    for entry in &section.entries {
        let handle = match entry {
            Entry::Local(_) => {
                let handle = heap.allocate(HeapValue::Cell(Value::Nil));
                allocated.push(handle);
                handle
            }
            Entry::Perm(name) => perms
                .object(name)
                .ok_or_else(|| PersistError::UnknownPermanent(name.clone()))?,
            Entry::Shared(id) => *shared
                .and_then(|s| s.get(*id as usize))
                .ok_or(PersistError::DanglingShared(*id))?,
        };
        map.push(handle);
    }

    let mut resolve = |h: Handle| -> Result<Handle, PersistError> {
        map.get(h.raw())
            .copied()
            .ok_or_else(|| PersistError::Malformed(format!("reference to missing entry {}", h.raw())))
    };

    for (id, entry) in section.entries.into_iter().enumerate() {
        if let Entry::Local(mut object) = entry {
            if let HeapValue::Closure(closure) = &object {
                if closure.proto as usize >= proto_count {
                    return Err(PersistError::Malformed(format!(
                        "closure refers to missing prototype {}",
                        closure.proto
                    )));
                }
            }
            object.remap_refs(&mut resolve)?;
            heap.write(map[id], object)?;
        }
    }

    let mut root = section.root;
    remap_value(&mut root, &mut resolve)?;
    Ok((map, root))
}
