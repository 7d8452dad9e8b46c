//! Guest tables
//!
//! A table has an array part holding the keys `1..=n` and an insertion-ordered
//! hash part for everything else. Assigning `nil` to a hash entry leaves a
//! tombstone so that `next` keeps working while a loop clears fields; the
//! tombstones are dropped the next time a new key is inserted.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::runtime::value::{KeyError, TableKey, Value};

/// Result of a failed `next` lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidNextKey;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Table {
    array: Vec<Value>,
    hash: IndexMap<TableKey, Value>,
    tombstones: usize,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a table from a list of values stored at `1..=n`
    pub fn from_list(values: Vec<Value>) -> Self {
        let mut table = Self::new();
        for (i, value) in values.into_iter().enumerate() {
            let _ = table.set(&Value::Int(i as i64 + 1), value);
        }
        table
    }

    pub fn get(
        &self,
        key: &Value,
    ) -> Value {
        match TableKey::from_value(key) {
            Ok(key) => self.get_key(&key),
            Err(_) => Value::Nil,
        }
    }

    pub fn get_key(
        &self,
        key: &TableKey,
    ) -> Value {
        if let TableKey::Int(i) = key {
            if let Some(slot) = self.array_slot(*i) {
                return self.array[slot].clone();
            }
        }
        self.hash.get(key).cloned().unwrap_or_default()
    }

    /// Field lookup by string name
    pub fn get_str(
        &self,
        name: &str,
    ) -> Value {
        self.get_key(&TableKey::str(name))
    }

    pub fn set(
        &mut self,
        key: &Value,
        value: Value,
    ) -> Result<(), KeyError> {
        let key = TableKey::from_value(key)?;
        self.set_key(key, value);
        Ok(())
    }

    pub fn set_str(
        &mut self,
        name: &str,
        value: Value,
    ) {
        self.set_key(TableKey::str(name), value);
    }

    pub fn set_key(
        &mut self,
        key: TableKey,
        value: Value,
    ) {
        if let TableKey::Int(i) = key {
            if let Some(slot) = self.array_slot(i) {
                self.array[slot] = value;
                if slot + 1 == self.array.len() {
                    while matches!(self.array.last(), Some(Value::Nil)) {
                        self.array.pop();
                    }
                }
                return;
            }
            if i == self.array.len() as i64 + 1 {
                if value.is_nil() {
                    self.remove_hash(&key);
                    return;
                }
                self.remove_hash(&key);
                self.array.push(value);
                self.migrate_from_hash();
                return;
            }
        }
        match self.hash.get_mut(&key) {
            Some(slot) => {
                if value.is_nil() && !slot.is_nil() {
                    self.tombstones += 1;
                } else if !value.is_nil() && slot.is_nil() {
                    self.tombstones = self.tombstones.saturating_sub(1);
                }
                *slot = value;
            }
            None => {
                if value.is_nil() {
                    return;
                }
                if self.tombstones > 0 {
                    self.hash.retain(|_, v| !v.is_nil());
                    self.tombstones = 0;
                }
                self.hash.insert(key, value);
            }
        }
    }

    /// Length border (`#t`)
    pub fn len(&self) -> usize {
        self.array.len()
    }

    pub fn is_empty(&self) -> bool {
        self.array.is_empty() && self.hash.values().all(Value::is_nil)
    }

    /// Number of live entries in both parts
    pub fn entry_count(&self) -> usize {
        self.array.iter().filter(|v| !v.is_nil()).count()
            + self.hash.values().filter(|v| !v.is_nil()).count()
    }

    /// Insert into the array part at `pos` (1-based), shifting following elements up
    pub fn insert(
        &mut self,
        pos: usize,
        value: Value,
    ) {
        let idx = pos.saturating_sub(1).min(self.array.len());
        if value.is_nil() {
            return;
        }
        self.array.insert(idx, value);
        self.migrate_from_hash();
    }

    /// Remove from the array part at `pos` (1-based), shifting following elements down
    pub fn remove(
        &mut self,
        pos: usize,
    ) -> Value {
        if pos == 0 || pos > self.array.len() {
            return Value::Nil;
        }
        let value = self.array.remove(pos - 1);
        while matches!(self.array.last(), Some(Value::Nil)) {
            self.array.pop();
        }
        value
    }

    /// Iteration step for `next`: the entry following `key`, or `None` at the end
    pub fn next(
        &self,
        key: &Value,
    ) -> Result<Option<(Value, Value)>, InvalidNextKey> {
        let mut array_start = 0usize;
        let mut hash_start = 0usize;
        match key {
            Value::Nil => {}
            other => {
                let key = TableKey::from_value(other).map_err(|_| InvalidNextKey)?;
                let slot = match &key {
                    TableKey::Int(i) => self.array_slot(*i),
                    _ => None,
                };
                match slot {
                    Some(slot) => array_start = slot + 1,
                    None => {
                        array_start = self.array.len();
                        hash_start = self.hash.get_index_of(&key).ok_or(InvalidNextKey)? + 1;
                    }
                }
            }
        }
        for i in array_start..self.array.len() {
            if !self.array[i].is_nil() {
                return Ok(Some((Value::Int(i as i64 + 1), self.array[i].clone())));
            }
        }
        for i in hash_start..self.hash.len() {
            if let Some((k, v)) = self.hash.get_index(i) {
                if !v.is_nil() {
                    return Ok(Some((k.to_value(), v.clone())));
                }
            }
        }
        Ok(None)
    }

    /// All live entries in iteration order
    pub fn entries(&self) -> impl Iterator<Item = (Value, &Value)> + '_ {
        let array = self
            .array
            .iter()
            .enumerate()
            .filter(|(_, v)| !v.is_nil())
            .map(|(i, v)| (Value::Int(i as i64 + 1), v));
        let hash = self
            .hash
            .iter()
            .filter(|(_, v)| !v.is_nil())
            .map(|(k, v)| (k.to_value(), v));
        array.chain(hash)
    }

    /// The array part, in order
    pub fn list(&self) -> &[Value] {
        &self.array
    }

    /// Visit every key and value
    pub fn for_each_value(
        &self,
        f: &mut impl FnMut(&Value),
    ) {
        for value in &self.array {
            f(value);
        }
        for (key, value) in &self.hash {
            f(&key.to_value());
            f(value);
        }
    }

    /// Rewrite every key and value; the hash part is rebuilt since keys may change
    pub fn map_values<E>(
        &mut self,
        f: &mut impl FnMut(&mut Value) -> Result<(), E>,
    ) -> Result<(), E> {
        for value in self.array.iter_mut() {
            f(value)?;
        }
        let hash = std::mem::take(&mut self.hash);
        let mut rebuilt = IndexMap::with_capacity(hash.len());
        for (key, mut value) in hash {
            if value.is_nil() {
                continue;
            }
            let mut key_value = key.to_value();
            f(&mut key_value)?;
            f(&mut value)?;
            if let Ok(key) = TableKey::from_value(&key_value) {
                rebuilt.insert(key, value);
            }
        }
        self.hash = rebuilt;
        self.tombstones = 0;
        Ok(())
    }

    /// Rough byte footprint used for memory accounting
    pub fn estimated_size(&self) -> usize {
        64 + self.array.capacity() * 24 + self.hash.capacity() * 56
    }

    fn array_slot(
        &self,
        i: i64,
    ) -> Option<usize> {
        if i >= 1 && (i as u64) <= self.array.len() as u64 {
            Some(i as usize - 1)
        } else {
            None
        }
    }

    fn remove_hash(
        &mut self,
        key: &TableKey,
    ) {
        if let Some(old) = self.hash.shift_remove(key) {
            if old.is_nil() {
                self.tombstones = self.tombstones.saturating_sub(1);
            }
        }
    }

    fn migrate_from_hash(&mut self) {
        loop {
            let next = TableKey::Int(self.array.len() as i64 + 1);
            match self.hash.shift_remove(&next) {
                Some(Value::Nil) => {
                    self.tombstones = self.tombstones.saturating_sub(1);
                    break;
                }
                Some(value) => self.array.push(value),
                None => break,
            }
        }
    }
}
