//! Per-function local scopes and slot allocation

use super::ast::{Block, FunctionBody, LocalId, LocalInfo};
use crate::vm::UpvalDesc;

/// Upper bound on simultaneously live locals in one function
const MAX_LOCALS: u16 = 200;

/// Local bookkeeping for one function under construction
#[derive(Debug)]
pub struct FunctionScope {
    name: Option<String>,
    line: u32,
    params: Vec<LocalId>,
    locals: Vec<LocalInfo>,
    /// Visible locals, innermost last
    active: Vec<LocalId>,
    /// `(active.len(), next_slot)` at each open block
    blocks: Vec<(usize, u16)>,
    next_slot: u16,
    max_slots: u16,
    upvals: Vec<UpvalDesc>,
    /// Enclosing loops, for `break`
    pub loops: usize,
}

impl FunctionScope {
    pub fn new(
        name: Option<String>,
        line: u32,
    ) -> Self {
        Self {
            name,
            line,
            params: Vec::new(),
            locals: Vec::new(),
            active: Vec::new(),
            blocks: Vec::new(),
            next_slot: 0,
            max_slots: 0,
            upvals: Vec::new(),
            loops: 0,
        }
    }

    /// Allocate the next slot for `name`; `None` once the frame is full
    pub fn declare(
        &mut self,
        name: String,
    ) -> Option<LocalId> {
        if self.next_slot >= MAX_LOCALS {
            return None;
        }
        let id = self.locals.len();
        self.locals.push(LocalInfo {
            name,
            slot: self.next_slot,
            captured: false,
        });
        self.active.push(id);
        self.next_slot += 1;
        self.max_slots = self.max_slots.max(self.next_slot);
        Some(id)
    }

    pub fn add_param(
        &mut self,
        id: LocalId,
    ) {
        self.params.push(id);
    }

    /// Innermost visible local with this name
    pub fn find(
        &self,
        name: &str,
    ) -> Option<LocalId> {
        self.active
            .iter()
            .rev()
            .copied()
            .find(|&id| self.locals[id].name == name)
    }

    /// Mark a local as captured and return its slot
    pub fn capture(
        &mut self,
        id: LocalId,
    ) -> u16 {
        let local = &mut self.locals[id];
        local.captured = true;
        local.slot
    }

    /// Index of an upvalue, registering it on first use
    pub fn upvalue(
        &mut self,
        desc: UpvalDesc,
    ) -> usize {
        match self.upvals.iter().position(|u| *u == desc) {
            Some(idx) => idx,
            None => {
                self.upvals.push(desc);
                self.upvals.len() - 1
            }
        }
    }

    pub fn enter_block(&mut self) {
        self.blocks.push((self.active.len(), self.next_slot));
    }

    /// Close the innermost block, freeing its slots
    pub fn leave_block(&mut self) {
        if let Some((active, next_slot)) = self.blocks.pop() {
            self.active.truncate(active);
            self.next_slot = next_slot;
        }
    }

    pub fn finish(
        self,
        body: Block,
    ) -> FunctionBody {
        FunctionBody {
            name: self.name,
            line: self.line,
            params: self.params,
            locals: self.locals,
            upvals: self.upvals,
            slots: self.max_slots,
            body,
        }
    }
}
