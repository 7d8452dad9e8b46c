//! Permanent-object table

use std::collections::HashMap;

use indexmap::IndexMap;

use crate::runtime::memory::Handle;
use crate::runtime::value::NativeId;

/// A built-in referenced by name instead of by value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permanent {
    Native(NativeId),
    Object(Handle),
}

/// Stable name ↔ built-in mapping
///
/// Filled in installation order on every context build, so two contexts built
/// from the same library set map every name to the same native id.
#[derive(Debug, Clone, Default)]
pub struct PermanentTable {
    entries: IndexMap<String, Permanent>,
    by_handle: HashMap<Handle, usize>,
}

impl PermanentTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_native(
        &mut self,
        name: &str,
        id: NativeId,
    ) {
        self.entries.insert(name.to_string(), Permanent::Native(id));
    }

    pub fn insert_object(
        &mut self,
        name: &str,
        handle: Handle,
    ) {
        let (index, _) = self.entries.insert_full(name.to_string(), Permanent::Object(handle));
        self.by_handle.insert(handle, index);
    }

    /// Encode direction: name of a permanent heap object
    pub fn name_of(
        &self,
        handle: Handle,
    ) -> Option<&str> {
        let index = *self.by_handle.get(&handle)?;
        self.entries.get_index(index).map(|(name, _)| name.as_str())
    }

    /// Decode direction
    pub fn get(
        &self,
        name: &str,
    ) -> Option<Permanent> {
        self.entries.get(name).copied()
    }

    pub fn object(
        &self,
        name: &str,
    ) -> Option<Handle> {
        match self.get(name)? {
            Permanent::Object(handle) => Some(handle),
            Permanent::Native(_) => None,
        }
    }

    /// Heap objects in the table, collector roots
    pub fn handles(&self) -> impl Iterator<Item = Handle> + '_ {
        self.entries.values().filter_map(|p| match p {
            Permanent::Object(handle) => Some(*handle),
            Permanent::Native(_) => None,
        })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
