//! 字节码生成
//!
//! Lowers the resolved AST into stack-machine [`Proto`]s. Every nested
//! function is compiled before the function that creates it, so the main
//! chunk is always the last prototype of the [`Program`].

use std::rc::Rc;

use indexmap::IndexSet;
use tracing::trace;

use super::parser::ast::*;
use super::CompileError;
use crate::vm::{Instr, Program, Proto};

/// Compile the main chunk and everything nested in it
pub fn compile_program(main: &FunctionBody) -> Result<Program, CompileError> {
    let mut protos = Vec::new();
    let main = compile_function(&mut protos, main)?;
    Ok(Program { protos, main })
}

fn compile_function(
    protos: &mut Vec<Proto>,
    func: &FunctionBody,
) -> Result<u32, CompileError> {
    let mut builder = FunctionBuilder::new(protos, func);
    builder.prologue();
    builder.block(&func.body)?;
    builder.emit(Instr::Mark);
    builder.emit(Instr::Return);
    let proto = builder.finish()?;

    trace!(
        name = proto.name.as_deref().unwrap_or("main"),
        instructions = proto.code.len(),
        "compiled prototype"
    );
    let idx = u32::try_from(protos.len()).map_err(|_| CompileError::Codegen {
        line: func.line,
        message: "too many functions".into(),
    })?;
    protos.push(proto);
    Ok(idx)
}

/// Code generator for one function
struct FunctionBuilder<'c, 'f> {
    protos: &'c mut Vec<Proto>,
    func: &'f FunctionBody,
    code: Vec<Instr>,
    lines: Vec<u32>,
    constants: IndexSet<Rc<str>>,
    /// Line attached to emitted instructions
    line: u32,
    /// Pending `break` jumps, one list per enclosing loop
    breaks: Vec<Vec<usize>>,
    /// Scratch slots past the locals, for multiple assignment
    temps: u16,
}

impl<'c, 'f> FunctionBuilder<'c, 'f> {
    fn new(
        protos: &'c mut Vec<Proto>,
        func: &'f FunctionBody,
    ) -> Self {
        Self {
            protos,
            func,
            code: Vec::new(),
            lines: Vec::new(),
            constants: IndexSet::new(),
            line: func.line,
            breaks: Vec::new(),
            temps: 0,
        }
    }

    fn finish(self) -> Result<Proto, CompileError> {
        let slots = self
            .func
            .slots
            .checked_add(self.temps)
            .ok_or_else(|| CompileError::Codegen {
                line: self.func.line,
                message: "function uses too many slots".into(),
            })?;
        Ok(Proto {
            name: self.func.name.clone(),
            line: self.func.line,
            params: self.func.params.len() as u16,
            slots,
            upvals: self.func.upvals.clone(),
            code: self.code,
            lines: self.lines,
            constants: self.constants.into_iter().collect(),
        })
    }

    // ========================================================================
    // Emission helpers
    // ========================================================================

    fn emit(
        &mut self,
        instr: Instr,
    ) -> usize {
        self.code.push(instr);
        self.lines.push(self.line);
        self.code.len() - 1
    }

    fn here(&self) -> u32 {
        self.code.len() as u32
    }

    /// Point the jump at `at` to `target`
    fn patch(
        &mut self,
        at: usize,
        target: u32,
    ) {
        self.code[at] = match self.code[at] {
            Instr::Jump(_) => Instr::Jump(target),
            Instr::JumpIfFalse(_) => Instr::JumpIfFalse(target),
            Instr::AndJump(_) => Instr::AndJump(target),
            Instr::OrJump(_) => Instr::OrJump(target),
            Instr::ForPrep { base, .. } => Instr::ForPrep { base, exit: target },
            Instr::TForCheck { ctl, nvars, .. } => Instr::TForCheck {
                ctl,
                nvars,
                exit: target,
            },
            other => other,
        };
    }

    fn constant(
        &mut self,
        s: &str,
    ) -> u32 {
        let (idx, _) = self.constants.insert_full(Rc::from(s));
        idx as u32
    }

    /// Slot of a local and whether it lives in a cell
    fn var(
        &self,
        id: LocalId,
    ) -> (u16, bool) {
        let local = self.func.local(id);
        (local.slot, local.captured)
    }

    fn slot(
        &self,
        id: LocalId,
    ) -> u16 {
        self.var(id).0
    }

    /// Box captured parameters into cells on entry
    fn prologue(&mut self) {
        let func = self.func;
        for &id in &func.params {
            if let (slot, true) = self.var(id) {
                self.emit(Instr::LoadLocal(slot));
                self.emit(Instr::NewCell(slot));
            }
        }
    }

    // ========================================================================
    // Statements
    // ========================================================================

    fn block(
        &mut self,
        block: &[Stmt],
    ) -> Result<(), CompileError> {
        for stmt in block {
            self.stmt(stmt)?;
        }
        Ok(())
    }

    fn stmt(
        &mut self,
        stmt: &Stmt,
    ) -> Result<(), CompileError> {
        self.line = stmt.line;
        match &stmt.kind {
            StmtKind::Call(call) => self.call(call, Some(0))?,
            StmtKind::Local { targets, values } => self.local(targets, values)?,
            StmtKind::LocalFunction { local, func } => {
                let idx = compile_function(self.protos, func)?;
                let (slot, captured) = self.var(*local);
                if captured {
                    self.emit(Instr::Nil);
                    self.emit(Instr::NewCell(slot));
                    self.emit(Instr::Closure(idx));
                    self.emit(Instr::StoreCell(slot));
                } else {
                    self.emit(Instr::Closure(idx));
                    self.emit(Instr::StoreLocal(slot));
                }
            }
            StmtKind::Assign { targets, values } => self.assign(targets, values)?,
            StmtKind::Do(body) => self.block(body)?,
            StmtKind::While { cond, body } => {
                let top = self.here();
                self.expr(cond)?;
                let exit = self.emit(Instr::JumpIfFalse(0));
                self.loop_body(body, |b| {
                    b.emit(Instr::Jump(top));
                    Ok(())
                })?;
                let end = self.here();
                self.patch(exit, end);
            }
            StmtKind::Repeat { body, cond } => {
                let top = self.here();
                self.loop_body(body, |b| {
                    b.expr(cond)?;
                    b.emit(Instr::JumpIfFalse(top));
                    Ok(())
                })?;
            }
            StmtKind::If {
                branches,
                else_block,
            } => {
                let mut ends = Vec::new();
                for (i, (cond, body)) in branches.iter().enumerate() {
                    self.expr(cond)?;
                    let next = self.emit(Instr::JumpIfFalse(0));
                    self.block(body)?;
                    if i + 1 < branches.len() || else_block.is_some() {
                        ends.push(self.emit(Instr::Jump(0)));
                    }
                    let target = self.here();
                    self.patch(next, target);
                }
                if let Some(body) = else_block {
                    self.block(body)?;
                }
                let end = self.here();
                for at in ends {
                    self.patch(at, end);
                }
            }
            StmtKind::NumericFor {
                state,
                var,
                start,
                limit,
                step,
                body,
            } => {
                let base = self.slot(*state);
                self.expr(start)?;
                self.emit(Instr::StoreLocal(base));
                self.expr(limit)?;
                self.emit(Instr::StoreLocal(base + 1));
                match step {
                    Some(step) => self.expr(step)?,
                    None => {
                        self.emit(Instr::Int(1));
                    }
                }
                self.emit(Instr::StoreLocal(base + 2));

                let prep = self.emit(Instr::ForPrep { base, exit: 0 });
                let top = self.here();
                self.emit(Instr::LoadLocal(base));
                self.store_new_local(*var);
                self.loop_body(body, |b| {
                    b.emit(Instr::ForLoop { base, body: top });
                    Ok(())
                })?;
                let exit = self.here();
                self.patch(prep, exit);
            }
            StmtKind::GenericFor {
                state,
                vars,
                exprs,
                body,
            } => {
                let base = self.slot(*state);
                let nvars = u8::try_from(vars.len()).map_err(|_| CompileError::Codegen {
                    line: stmt.line,
                    message: "too many loop variables".into(),
                })?;
                self.emit(Instr::Mark);
                self.expr_list(exprs)?;
                self.emit(Instr::Adjust(3));
                self.emit(Instr::StoreLocal(base + 2));
                self.emit(Instr::StoreLocal(base + 1));
                self.emit(Instr::StoreLocal(base));

                let top = self.here();
                self.emit(Instr::Mark);
                self.emit(Instr::LoadLocal(base));
                self.emit(Instr::LoadLocal(base + 1));
                self.emit(Instr::LoadLocal(base + 2));
                self.emit(Instr::Call(Some(nvars)));
                let check = self.emit(Instr::TForCheck {
                    ctl: base + 2,
                    nvars: nvars as u16,
                    exit: 0,
                });
                for var in vars.iter().rev() {
                    self.store_new_local(*var);
                }
                self.loop_body(body, |b| {
                    b.emit(Instr::Jump(top));
                    Ok(())
                })?;
                let exit = self.here();
                self.patch(check, exit);
            }
            StmtKind::Return(values) => {
                self.emit(Instr::Mark);
                self.expr_list(values)?;
                self.emit(Instr::Return);
            }
            StmtKind::Break => {
                let jump = self.emit(Instr::Jump(0));
                if let Some(pending) = self.breaks.last_mut() {
                    pending.push(jump);
                }
            }
        }
        Ok(())
    }

    /// Loop body, then `tail`, then resolve `break`s to just past the tail
    fn loop_body(
        &mut self,
        body: &[Stmt],
        tail: impl FnOnce(&mut Self) -> Result<(), CompileError>,
    ) -> Result<(), CompileError> {
        self.breaks.push(Vec::new());
        self.block(body)?;
        tail(self)?;
        let exit = self.here();
        for at in self.breaks.pop().unwrap_or_default() {
            self.patch(at, exit);
        }
        Ok(())
    }

    fn local(
        &mut self,
        targets: &[LocalId],
        values: &[Expr],
    ) -> Result<(), CompileError> {
        if let ([target], [value]) = (targets, values) {
            self.expr(value)?;
            self.store_new_local(*target);
            return Ok(());
        }
        self.emit(Instr::Mark);
        self.expr_list(values)?;
        self.emit(Instr::Adjust(targets.len() as u16));
        for target in targets.iter().rev() {
            self.store_new_local(*target);
        }
        Ok(())
    }

    fn assign(
        &mut self,
        targets: &[Expr],
        values: &[Expr],
    ) -> Result<(), CompileError> {
        if let ([target], [value]) = (targets, values) {
            if let ExprKind::Index(obj, key) = &target.kind {
                self.expr(obj)?;
                self.expr(key)?;
                self.expr(value)?;
                self.emit(Instr::SetIndex);
            } else {
                self.expr(value)?;
                self.store_var(target)?;
            }
            return Ok(());
        }

        let count = targets.len() as u16;
        self.emit(Instr::Mark);
        self.expr_list(values)?;
        self.emit(Instr::Adjust(count));

        if targets.iter().all(|t| !matches!(t.kind, ExprKind::Index(..))) {
            for target in targets.iter().rev() {
                self.store_var(target)?;
            }
            return Ok(());
        }

        // Table targets need the value below their object and key
        self.temps = self.temps.max(count);
        let first = self.func.slots;
        for i in (0..count).rev() {
            self.emit(Instr::StoreLocal(first + i));
        }
        for (i, target) in targets.iter().enumerate() {
            let temp = first + i as u16;
            if let ExprKind::Index(obj, key) = &target.kind {
                self.expr(obj)?;
                self.expr(key)?;
                self.emit(Instr::LoadLocal(temp));
                self.emit(Instr::SetIndex);
            } else {
                self.emit(Instr::LoadLocal(temp));
                self.store_var(target)?;
            }
        }
        Ok(())
    }

    /// Pop the top value into a freshly declared local
    fn store_new_local(
        &mut self,
        id: LocalId,
    ) {
        let (slot, captured) = self.var(id);
        if captured {
            self.emit(Instr::NewCell(slot));
        } else {
            self.emit(Instr::StoreLocal(slot));
        }
    }

    /// Pop the top value into a variable
    fn store_var(
        &mut self,
        target: &Expr,
    ) -> Result<(), CompileError> {
        match &target.kind {
            ExprKind::Local(id) => {
                let (slot, captured) = self.var(*id);
                if captured {
                    self.emit(Instr::StoreCell(slot));
                } else {
                    self.emit(Instr::StoreLocal(slot));
                }
            }
            ExprKind::Upval(idx) => {
                self.emit(Instr::StoreUpval(*idx));
            }
            ExprKind::Global(name) => {
                let k = self.constant(name);
                self.emit(Instr::SetGlobal(k));
            }
            _ => {
                return Err(CompileError::Codegen {
                    line: target.line,
                    message: "cannot assign to this expression".into(),
                })
            }
        }
        Ok(())
    }

    // ========================================================================
    // Expressions
    // ========================================================================

    /// Push every value of `exprs`, expanding a trailing call
    fn expr_list(
        &mut self,
        exprs: &[Expr],
    ) -> Result<(), CompileError> {
        for (i, expr) in exprs.iter().enumerate() {
            if i + 1 == exprs.len() && expr.is_multi() {
                self.call(expr, None)?;
            } else {
                self.expr(expr)?;
            }
        }
        Ok(())
    }

    /// Emit a call keeping `want` results (`None` keeps all)
    fn call(
        &mut self,
        expr: &Expr,
        want: Option<u8>,
    ) -> Result<(), CompileError> {
        let saved = self.line;
        self.line = expr.line;
        match &expr.kind {
            ExprKind::Call(func, args) => {
                self.emit(Instr::Mark);
                self.expr(func)?;
                self.expr_list(args)?;
            }
            ExprKind::Method(obj, name, args) => {
                self.emit(Instr::Mark);
                self.expr(obj)?;
                self.emit(Instr::Dup);
                let k = self.constant(name);
                self.emit(Instr::Const(k));
                self.emit(Instr::GetIndex);
                self.emit(Instr::Swap);
                self.expr_list(args)?;
            }
            _ => {
                self.expr(expr)?;
                self.line = saved;
                return Ok(());
            }
        }
        self.line = expr.line;
        self.emit(Instr::Call(want));
        self.line = saved;
        Ok(())
    }

    /// Push exactly one value
    fn expr(
        &mut self,
        expr: &Expr,
    ) -> Result<(), CompileError> {
        let saved = self.line;
        self.line = expr.line;
        match &expr.kind {
            ExprKind::Nil => {
                self.emit(Instr::Nil);
            }
            ExprKind::True => {
                self.emit(Instr::True);
            }
            ExprKind::False => {
                self.emit(Instr::False);
            }
            ExprKind::Int(i) => {
                self.emit(Instr::Int(*i));
            }
            ExprKind::Float(f) => {
                self.emit(Instr::Float(*f));
            }
            ExprKind::Str(s) => {
                let k = self.constant(s);
                self.emit(Instr::Const(k));
            }
            ExprKind::Local(id) => {
                let (slot, captured) = self.var(*id);
                if captured {
                    self.emit(Instr::LoadCell(slot));
                } else {
                    self.emit(Instr::LoadLocal(slot));
                }
            }
            ExprKind::Upval(idx) => {
                self.emit(Instr::LoadUpval(*idx));
            }
            ExprKind::Global(name) => {
                let k = self.constant(name);
                self.emit(Instr::GetGlobal(k));
            }
            ExprKind::Paren(inner) => self.expr(inner)?,
            ExprKind::Index(obj, key) => {
                self.expr(obj)?;
                self.expr(key)?;
                self.emit(Instr::GetIndex);
            }
            ExprKind::Call(..) | ExprKind::Method(..) => self.call(expr, Some(1))?,
            ExprKind::Function(body) => {
                let idx = compile_function(self.protos, body)?;
                self.emit(Instr::Closure(idx));
            }
            ExprKind::Table(items) => self.table(items)?,
            ExprKind::Binary(..) | ExprKind::And(..) | ExprKind::Or(..) => self.operator_chain(expr)?,
            ExprKind::Unary(op, operand) => {
                self.expr(operand)?;
                self.line = expr.line;
                self.emit(Instr::Unary(*op));
            }
        }
        self.line = saved;
        Ok(())
    }

    /// Left-associative operators nest on the left; walk that spine in a loop
    fn operator_chain(
        &mut self,
        expr: &Expr,
    ) -> Result<(), CompileError> {
        let mut spine = Vec::new();
        let mut leftmost = expr;
        while let ExprKind::Binary(_, lhs, _) | ExprKind::And(lhs, _) | ExprKind::Or(lhs, _) = &leftmost.kind {
            spine.push(leftmost);
            leftmost = lhs.as_ref();
        }
        self.expr(leftmost)?;

        for node in spine.into_iter().rev() {
            self.line = node.line;
            match &node.kind {
                ExprKind::Binary(op, _, rhs) => {
                    self.expr(rhs)?;
                    self.emit(Instr::Binary(*op));
                }
                ExprKind::And(_, rhs) => {
                    let jump = self.emit(Instr::AndJump(0));
                    self.expr(rhs)?;
                    let end = self.here();
                    self.patch(jump, end);
                }
                ExprKind::Or(_, rhs) => {
                    let jump = self.emit(Instr::OrJump(0));
                    self.expr(rhs)?;
                    let end = self.here();
                    self.patch(jump, end);
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn table(
        &mut self,
        items: &[TableItem],
    ) -> Result<(), CompileError> {
        self.emit(Instr::NewTable);
        let mut next: i64 = 1;
        for (i, item) in items.iter().enumerate() {
            match item {
                TableItem::Positional(value) if i + 1 == items.len() && value.is_multi() => {
                    self.emit(Instr::Mark);
                    self.call(value, None)?;
                    self.emit(Instr::SetList(next as u32));
                }
                TableItem::Positional(value) => {
                    self.emit(Instr::Int(next));
                    self.expr(value)?;
                    self.emit(Instr::InitField);
                    next += 1;
                }
                TableItem::Keyed(key, value) => {
                    self.expr(key)?;
                    self.expr(value)?;
                    self.emit(Instr::InitField);
                }
            }
        }
        Ok(())
    }
}
