//! Virtual Machine executor
//!
//! 字节码执行器：一个处理器对应一个 VM 实例，拥有堆、全局表和主协程。
//!
//! The executor never recurses on the host stack for guest calls or coroutine
//! switches. The coroutine currently executing is moved out of the heap into
//! an [`Active`] slot; every other coroutine stays in the heap with its
//! [`Pending`] continuation, so whenever control returns to the host the whole
//! execution context is plain data again.
//!
//! Coroutine transfers follow the yield cascade: a coroutine suspended for the
//! host hands an empty value list to its resumer, which re-suspends itself with
//! a `Pending::Resume` continuation, level by level, up to the main thread. On
//! the next resume the chain is walked back down and the innermost coroutine
//! continues where it stopped.

use std::rc::Rc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, trace};

use crate::kernel::{read_value, Kernel, NetworkTrace, Signal};
use crate::persist::PermanentTable;
use crate::processor::HostContext;
use crate::runtime::gc::{GCStats, GC};
use crate::runtime::memory::{Closure, Handle, Heap, HeapValue, Table};
use crate::runtime::value::{float_to_int, KeyError, TableKey, Value};
use crate::std::{NativeContext, NativeExport, NativeOutcome, Registry};
use crate::vm::budget::Budget;
use crate::vm::errors::{VMError, VMResult};
use crate::vm::frames::{Frame, Pending, Thread, ThreadStatus};
use crate::vm::opcode::{BinOp, Instr, Program, UnOp, UpvalDesc};

/// VM 配置
#[derive(Debug, Clone)]
pub struct VMConfig {
    /// Instructions between budget interrupts
    pub speed: u32,
    /// 最大调用深度
    pub max_call_depth: usize,
}

impl Default for VMConfig {
    fn default() -> Self {
        Self {
            speed: 15000,
            max_call_depth: 200,
        }
    }
}

/// Lifecycle of one execution context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VMStatus {
    /// Program loaded, never resumed
    Loaded,
    Running,
    /// Suspended at a yield point; the only persistable state
    Yielded,
    Finished,
    Crashed,
}

/// Result of one resume
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeStatus {
    Yielded,
    Finished,
}

/// The coroutine currently executing, moved out of the heap
struct Active {
    handle: Handle,
    thread: Box<Thread>,
}

/// Control transfer between coroutines
enum Transfer {
    /// The active coroutine resumes `target`
    Resume { target: Handle, args: Vec<Value> },
    /// The active coroutine suspended; values go to its resumer
    Suspended(Vec<Value>),
    /// The active coroutine's body returned
    Finished(Vec<Value>),
}

/// 虚拟机
pub struct VM {
    /// 配置
    config: VMConfig,
    /// 状态
    status: VMStatus,
    pub(crate) heap: Heap,
    pub(crate) globals: Handle,
    pub(crate) main: Handle,
    pub(crate) program: Rc<Program>,
    pub(crate) natives: Vec<NativeExport>,
    pub(crate) perms: PermanentTable,
    pub(crate) registry: Registry,
    budget: Budget,
    gc: GC,
    /// Resume chain while running, main thread first
    chain: Vec<Handle>,
    rng: StdRng,
}

impl std::fmt::Debug for VM {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("VM")
            .field("status", &self.status)
            .field("objects", &self.heap.len())
            .field("natives", &self.natives.len())
            .finish()
    }
}

impl VM {
    /// Build a fresh execution context for `program`
    ///
    /// The libraries and the permanent-object table are registered in the same
    /// order every time, so a snapshot taken from one context resolves its
    /// built-in references in any other.
    pub fn new(
        program: Program,
        config: VMConfig,
    ) -> VMResult<Self> {
        let mut heap = Heap::new();
        let globals = heap.allocate(HeapValue::Table(Table::new()));
        let mut perms = PermanentTable::new();
        let (natives, registry) = crate::std::install(&mut heap, globals, &mut perms)?;

        let closure = heap.allocate(HeapValue::Closure(Closure {
            proto: program.main,
            upvalues: Vec::new(),
        }));
        let main = heap.allocate(HeapValue::Thread(Box::new(Thread::new(Value::Function(
            closure,
        )))));
        heap.table_mut(globals)?.set_str("_G", Value::Table(globals));

        let budget = Budget::new(config.speed);
        debug!(natives = natives.len(), objects = heap.len(), "execution context built");
        Ok(Self {
            config,
            status: VMStatus::Loaded,
            heap,
            globals,
            main,
            program: Rc::new(program),
            natives,
            perms,
            registry,
            budget,
            gc: GC::new(),
            chain: Vec::new(),
            rng: StdRng::from_os_rng(),
        })
    }

    pub fn status(&self) -> VMStatus {
        self.status
    }

    pub fn is_resumable(&self) -> bool {
        matches!(self.status, VMStatus::Loaded | VMStatus::Yielded)
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn globals(&self) -> Handle {
        self.globals
    }

    pub fn main_thread(&self) -> Handle {
        self.main
    }

    pub fn natives(&self) -> &[NativeExport] {
        &self.natives
    }

    pub fn budget(&self) -> &Budget {
        &self.budget
    }

    /// Read a global variable
    pub fn global(
        &self,
        name: &str,
    ) -> Value {
        self.heap
            .table(self.globals)
            .map(|t| t.get_str(name))
            .unwrap_or_default()
    }

    /// Re-arm the execution budget for a new tick
    pub fn begin_tick(&mut self) {
        self.budget.install();
    }

    pub fn set_speed(
        &mut self,
        speed: u32,
    ) {
        self.budget.set_speed(speed);
    }

    pub fn memory_usage(&self) -> usize {
        self.heap.estimated_size()
    }

    pub fn mark_crashed(&mut self) {
        self.status = VMStatus::Crashed;
    }

    /// Replace the global table and main thread with restored ones
    pub(crate) fn install_snapshot(
        &mut self,
        globals: Handle,
        main: Handle,
        program: Program,
    ) {
        self.globals = globals;
        self.main = main;
        self.program = Rc::new(program);
        self.status = VMStatus::Yielded;
    }

    /// Full mark-and-sweep from the context roots
    pub fn collect_garbage(&mut self) -> GCStats {
        let mut roots = vec![self.globals, self.main];
        roots.extend(self.perms.handles());
        self.gc.collect(&mut self.heap, roots)
    }

    /// Convert a popped signal into the values handed to the pulling guest:
    /// name, sender object, then the parameters
    pub fn signal_values(
        &mut self,
        signal: Signal,
        sender: NetworkTrace,
    ) -> Vec<Value> {
        crate::std::event::signal_values(&mut self.heap, signal, sender)
    }

    /// Resolve every pending future through the host
    pub fn resolve_futures(
        &mut self,
        kernel: &mut dyn Kernel,
    ) -> usize {
        let pending: Vec<Handle> = self.heap.pending_futures().collect();
        let mut resolved = 0;
        for handle in pending {
            let Ok(future) = self.heap.future(handle) else {
                continue;
            };
            if let Some(output) = kernel.resolve_future(&future.method, &future.input) {
                if self.heap.complete_future(handle, output).is_ok() {
                    resolved += 1;
                }
            }
        }
        if resolved > 0 {
            trace!(resolved, "futures resolved");
        }
        resolved
    }

    /// Resume the main thread with `args`
    ///
    /// Returns when the main thread suspends to the host or finishes. Any error
    /// is fatal for the context and comes back as [`VMError::Guest`].
    pub fn resume(
        &mut self,
        host: &mut HostContext<'_>,
        args: Vec<Value>,
    ) -> VMResult<ResumeStatus> {
        if !self.is_resumable() {
            return Err(VMError::InvalidState(format!(
                "cannot resume a context in state {:?}",
                self.status
            )));
        }
        self.status = VMStatus::Running;
        let result = self.drive(host, args);
        self.status = match &result {
            Ok(ResumeStatus::Yielded) => VMStatus::Yielded,
            Ok(ResumeStatus::Finished) => VMStatus::Finished,
            Err(_) => VMStatus::Crashed,
        };
        result
    }

    fn drive(
        &mut self,
        host: &mut HostContext<'_>,
        args: Vec<Value>,
    ) -> VMResult<ResumeStatus> {
        self.chain.clear();
        let main = self.main;
        let mut act = Active {
            handle: main,
            thread: self.heap.take_thread(main)?,
        };
        act.thread.status = ThreadStatus::Running;
        self.chain.push(main);

        let mut incoming = Some(args);
        let mut queued: Option<Transfer> = None;
        loop {
            let transfer = match queued.take() {
                Some(transfer) => transfer,
                None => {
                    let step = match incoming.take() {
                        Some(args) => self.wake(host, &mut act, args),
                        None => self.interpret(host, &mut act).map(Some),
                    };
                    match step {
                        Ok(Some(transfer)) => transfer,
                        Ok(None) => continue,
                        Err(err) => return Err(self.fail(act, err)),
                    }
                }
            };

            match transfer {
                Transfer::Resume { target, args } => {
                    if let Err(err) = self.switch(&mut act, target, ThreadStatus::Normal) {
                        return Err(self.fail(act, err));
                    }
                    self.chain.push(target);
                    incoming = Some(args);
                }
                Transfer::Suspended(values) => {
                    if self.chain.len() <= 1 {
                        act.thread.status = ThreadStatus::Suspended;
                        self.heap.put_thread(act.handle, act.thread)?;
                        self.chain.clear();
                        return Ok(ResumeStatus::Yielded);
                    }
                    self.chain.pop();
                    let resumer = self.chain[self.chain.len() - 1];
                    let step = self
                        .switch(&mut act, resumer, ThreadStatus::Suspended)
                        .and_then(|_| self.deliver(&mut act, values, true));
                    match step {
                        Ok(next) => queued = next,
                        Err(err) => return Err(self.fail(act, err)),
                    }
                }
                Transfer::Finished(values) => {
                    act.thread.pending = Pending::None;
                    if self.chain.len() <= 1 {
                        act.thread.status = ThreadStatus::Dead;
                        self.heap.put_thread(act.handle, act.thread)?;
                        self.chain.clear();
                        return Ok(ResumeStatus::Finished);
                    }
                    self.chain.pop();
                    let resumer = self.chain[self.chain.len() - 1];
                    let step = self
                        .switch(&mut act, resumer, ThreadStatus::Dead)
                        .and_then(|_| self.deliver(&mut act, values, false));
                    match step {
                        Ok(next) => queued = next,
                        Err(err) => return Err(self.fail(act, err)),
                    }
                }
            }
        }
    }

    /// Swap the active coroutine for `target`, leaving the old one in the heap with `leave`
    fn switch(
        &mut self,
        act: &mut Active,
        target: Handle,
        leave: ThreadStatus,
    ) -> VMResult<()> {
        let thread = self.heap.take_thread(target)?;
        let mut old = std::mem::replace(&mut act.thread, thread);
        old.status = leave;
        if leave == ThreadStatus::Dead {
            old.stack.clear();
            old.frames.clear();
        }
        self.heap.put_thread(act.handle, old)?;
        act.handle = target;
        act.thread.status = ThreadStatus::Running;
        Ok(())
    }

    /// Complete the active coroutine's pending continuation with `args`
    fn wake(
        &mut self,
        host: &mut HostContext<'_>,
        act: &mut Active,
        args: Vec<Value>,
    ) -> VMResult<Option<Transfer>> {
        match std::mem::take(&mut act.thread.pending) {
            Pending::Start(body) => self.call_value(host, act, body, args, None),
            // 恢复值同样经过 API 返回闸门，耗尽的 tick 里不会继续运行
            Pending::Yield { want } | Pending::HostYield { want } => {
                Ok(self.api_return(act, args, want))
            }
            Pending::ApiReturn { values, want } => {
                act.thread.push_results(values, want);
                Ok(None)
            }
            Pending::Resume {
                inner,
                want,
                propagate,
            } => {
                // 级联恢复：用同样的参数重新驱动内层协程
                self.check_resumable(act.handle, inner)?;
                act.thread.pending = Pending::Resume {
                    inner,
                    want,
                    propagate,
                };
                Ok(Some(Transfer::Resume {
                    target: inner,
                    args,
                }))
            }
            Pending::Await { future, want } => {
                let output = self.heap.future(future)?.output.clone();
                match output {
                    Some(Ok(values)) => {
                        let values = values.iter().map(|v| read_value(&mut self.heap, v)).collect();
                        act.thread.push_results(values, want);
                        Ok(None)
                    }
                    Some(Err(message)) => Err(VMError::Runtime(message)),
                    None => {
                        act.thread.pending = Pending::Await { future, want };
                        Ok(Some(Transfer::Suspended(Vec::new())))
                    }
                }
            }
            Pending::None => Err(VMError::InvalidState(
                "resumed a coroutine that is not suspended".to_string(),
            )),
        }
    }

    /// Hand the values of a suspended or finished coroutine to its resumer,
    /// which is now active and sits inside `coroutine.resume`
    fn deliver(
        &mut self,
        act: &mut Active,
        mut values: Vec<Value>,
        suspended: bool,
    ) -> VMResult<Option<Transfer>> {
        let (inner, want, propagate) = match std::mem::take(&mut act.thread.pending) {
            Pending::Resume {
                inner,
                want,
                propagate,
            } => (inner, want, propagate),
            other => {
                return Err(VMError::InvalidState(format!(
                    "resumer is not waiting in coroutine.resume: {:?}",
                    other
                )))
            }
        };

        if suspended && values.is_empty() {
            // 无返回值的挂起来自宿主中断，继续向外级联
            act.thread.pending = if propagate {
                Pending::Yield { want }
            } else {
                Pending::Resume {
                    inner,
                    want,
                    propagate,
                }
            };
            return Ok(Some(Transfer::Suspended(Vec::new())));
        }

        if suspended {
            // drop the user-yield marker
            values.remove(0);
        }
        Ok(self.api_return(act, values, want))
    }

    /// API-return gate: once the tick is exhausted, results of host calls are
    /// parked in the continuation and handed back on the next resume
    fn api_return(
        &mut self,
        act: &mut Active,
        values: Vec<Value>,
        want: Option<u8>,
    ) -> Option<Transfer> {
        if self.budget.end_of_tick() {
            act.thread.pending = Pending::ApiReturn { values, want };
            Some(Transfer::Suspended(Vec::new()))
        } else {
            act.thread.push_results(values, want);
            None
        }
    }

    fn check_resumable(
        &self,
        current: Handle,
        target: Handle,
    ) -> VMResult<()> {
        if target == current || self.chain.contains(&target) {
            return Err(VMError::runtime("cannot resume non-suspended coroutine"));
        }
        match self.heap.thread(target)?.status {
            ThreadStatus::Suspended => Ok(()),
            ThreadStatus::Dead => Err(VMError::runtime("cannot resume dead coroutine")),
            _ => Err(VMError::runtime("cannot resume non-suspended coroutine")),
        }
    }

    fn call_value(
        &mut self,
        host: &mut HostContext<'_>,
        act: &mut Active,
        func: Value,
        args: Vec<Value>,
        want: Option<u8>,
    ) -> VMResult<Option<Transfer>> {
        match func {
            Value::Function(closure) => {
                self.push_frame(&mut act.thread, closure, args, want)?;
                Ok(None)
            }
            Value::Native(id) => {
                let export = self
                    .natives
                    .get(id.0 as usize)
                    .ok_or_else(|| VMError::InvalidState(format!("unknown native {}", id.0)))?;
                let func = export.func;
                let outcome = {
                    let mut ctx = NativeContext {
                        heap: &mut self.heap,
                        registry: &self.registry,
                        globals: self.globals,
                        current: act.handle,
                        is_main: self.chain.len() <= 1,
                        host,
                        rng: &mut self.rng,
                    };
                    func(&args, &mut ctx)?
                };
                self.complete_native(act, outcome, want)
            }
            other => Err(VMError::Runtime(format!(
                "attempt to call a {} value",
                other.type_name()
            ))),
        }
    }

    fn complete_native(
        &mut self,
        act: &mut Active,
        outcome: NativeOutcome,
        want: Option<u8>,
    ) -> VMResult<Option<Transfer>> {
        match outcome {
            NativeOutcome::Return(values) => {
                act.thread.push_results(values, want);
                Ok(None)
            }
            NativeOutcome::ApiReturn(values) => Ok(self.api_return(act, values, want)),
            NativeOutcome::Yield(values) => {
                act.thread.pending = Pending::Yield { want };
                let mut tagged = Vec::with_capacity(values.len() + 1);
                tagged.push(Value::Bool(true));
                tagged.extend(values);
                Ok(Some(Transfer::Suspended(tagged)))
            }
            NativeOutcome::Resume {
                thread,
                args,
                propagate,
            } => {
                self.check_resumable(act.handle, thread)?;
                act.thread.pending = Pending::Resume {
                    inner: thread,
                    want,
                    propagate,
                };
                Ok(Some(Transfer::Resume {
                    target: thread,
                    args,
                }))
            }
            NativeOutcome::HostYield => {
                act.thread.pending = Pending::HostYield { want };
                Ok(Some(Transfer::Suspended(Vec::new())))
            }
            NativeOutcome::Await(future) => {
                act.thread.pending = Pending::Await { future, want };
                Ok(Some(Transfer::Suspended(Vec::new())))
            }
        }
    }

    fn push_frame(
        &mut self,
        thread: &mut Thread,
        closure: Handle,
        mut args: Vec<Value>,
        want: Option<u8>,
    ) -> VMResult<()> {
        if thread.frames.len() >= self.config.max_call_depth {
            return Err(VMError::StackOverflow);
        }
        let proto_idx = self.heap.closure(closure)?.proto;
        let proto = self
            .program
            .proto(proto_idx)
            .ok_or_else(|| VMError::InvalidState(format!("missing prototype {}", proto_idx)))?;
        let base = thread.stack.len();
        args.resize(proto.params as usize, Value::Nil);
        thread.stack.extend(args);
        thread.stack.resize(base + proto.slots as usize, Value::Nil);
        thread.frames.push(Frame::new(closure, proto_idx, base, want));
        Ok(())
    }

    /// Run the active coroutine until it transfers control
    fn interpret(
        &mut self,
        host: &mut HostContext<'_>,
        act: &mut Active,
    ) -> VMResult<Transfer> {
        let program = Rc::clone(&self.program);
        loop {
            if act.thread.frames.is_empty() {
                let values = std::mem::take(&mut act.thread.stack);
                return Ok(Transfer::Finished(values));
            }
            self.budget.step()?;

            let th = &mut *act.thread;
            let Some(frame) = th.frames.last_mut() else {
                continue;
            };
            let proto = program
                .proto(frame.proto)
                .ok_or_else(|| VMError::InvalidState(format!("missing prototype {}", frame.proto)))?;
            let instr = *proto
                .code
                .get(frame.ip)
                .ok_or_else(|| VMError::InvalidState("instruction pointer out of range".into()))?;
            frame.ip += 1;
            let base = frame.base;

            match instr {
                Instr::Nil => th.stack.push(Value::Nil),
                Instr::True => th.stack.push(Value::Bool(true)),
                Instr::False => th.stack.push(Value::Bool(false)),
                Instr::Int(i) => th.stack.push(Value::Int(i)),
                Instr::Float(f) => th.stack.push(Value::Float(f)),
                Instr::Const(idx) => {
                    let s = constant(proto, idx)?;
                    th.stack.push(Value::Str(s));
                }
                Instr::Pop => {
                    th.stack.pop();
                }
                Instr::Dup => {
                    let top = peek(&th.stack)?.clone();
                    th.stack.push(top);
                }
                Instr::Swap => {
                    let n = th.stack.len();
                    if n < 2 {
                        return Err(stack_underflow());
                    }
                    th.stack.swap(n - 1, n - 2);
                }
                Instr::LoadLocal(slot) => {
                    let value = slot_ref(&th.stack, base, slot)?.clone();
                    th.stack.push(value);
                }
                Instr::StoreLocal(slot) => {
                    let value = pop(&mut th.stack)?;
                    *slot_mut(&mut th.stack, base, slot)? = value;
                }
                Instr::NewCell(slot) => {
                    let value = pop(&mut th.stack)?;
                    let cell = self.heap.allocate(HeapValue::Cell(value));
                    *slot_mut(&mut th.stack, base, slot)? = Value::Cell(cell);
                }
                Instr::LoadCell(slot) => {
                    let cell = cell_in_slot(&th.stack, base, slot)?;
                    let value = self.heap.cell(cell)?.clone();
                    th.stack.push(value);
                }
                Instr::StoreCell(slot) => {
                    let value = pop(&mut th.stack)?;
                    let cell = cell_in_slot(&th.stack, base, slot)?;
                    *self.heap.cell_mut(cell)? = value;
                }
                Instr::LoadUpval(idx) => {
                    let cell = self.upvalue(frame.closure, idx)?;
                    let value = self.heap.cell(cell)?.clone();
                    th.stack.push(value);
                }
                Instr::StoreUpval(idx) => {
                    let value = pop(&mut th.stack)?;
                    let cell = self.upvalue(frame.closure, idx)?;
                    *self.heap.cell_mut(cell)? = value;
                }
                Instr::GetGlobal(idx) => {
                    let name = constant(proto, idx)?;
                    let value = self.heap.table(self.globals)?.get_key(&TableKey::Str(name));
                    th.stack.push(value);
                }
                Instr::SetGlobal(idx) => {
                    let name = constant(proto, idx)?;
                    let value = pop(&mut th.stack)?;
                    self.heap.table_mut(self.globals)?.set_key(TableKey::Str(name), value);
                }
                Instr::NewTable => {
                    let table = self.heap.allocate(HeapValue::Table(Table::new()));
                    th.stack.push(Value::Table(table));
                }
                Instr::GetIndex => {
                    let key = pop(&mut th.stack)?;
                    let target = pop(&mut th.stack)?;
                    let value = self.index(&target, &key)?;
                    th.stack.push(value);
                }
                Instr::SetIndex => {
                    let value = pop(&mut th.stack)?;
                    let key = pop(&mut th.stack)?;
                    let target = pop(&mut th.stack)?;
                    self.set_index(&target, &key, value)?;
                }
                Instr::InitField => {
                    let value = pop(&mut th.stack)?;
                    let key = pop(&mut th.stack)?;
                    let target = peek(&th.stack)?.clone();
                    self.set_index(&target, &key, value)?;
                }
                Instr::SetList(start) => {
                    let mark = pop_mark(frame)?;
                    let values = th.stack.split_off(mark);
                    let target = peek(&th.stack)?.clone();
                    for (i, value) in values.into_iter().enumerate() {
                        self.set_index(&target, &Value::Int(start as i64 + i as i64), value)?;
                    }
                }
                Instr::Binary(op) => {
                    let rhs = pop(&mut th.stack)?;
                    let lhs = pop(&mut th.stack)?;
                    th.stack.push(binary(op, &lhs, &rhs)?);
                }
                Instr::Unary(op) => {
                    let operand = pop(&mut th.stack)?;
                    let value = match op {
                        UnOp::Not => Value::Bool(!operand.is_truthy()),
                        UnOp::Neg => negate(&operand)?,
                        UnOp::Len => self.length(&operand)?,
                    };
                    th.stack.push(value);
                }
                Instr::Jump(target) => frame.ip = target as usize,
                Instr::JumpIfFalse(target) => {
                    if !pop(&mut th.stack)?.is_truthy() {
                        frame.ip = target as usize;
                    }
                }
                Instr::AndJump(target) => {
                    if peek(&th.stack)?.is_truthy() {
                        th.stack.pop();
                    } else {
                        frame.ip = target as usize;
                    }
                }
                Instr::OrJump(target) => {
                    if peek(&th.stack)?.is_truthy() {
                        frame.ip = target as usize;
                    } else {
                        th.stack.pop();
                    }
                }
                Instr::Closure(idx) => {
                    let descs = &program
                        .proto(idx)
                        .ok_or_else(|| VMError::InvalidState(format!("missing prototype {}", idx)))?
                        .upvals;
                    let mut upvalues = Vec::with_capacity(descs.len());
                    for desc in descs {
                        upvalues.push(match *desc {
                            UpvalDesc::Local(slot) => cell_in_slot(&th.stack, base, slot)?,
                            UpvalDesc::Upval(i) => self.upvalue(frame.closure, i)?,
                        });
                    }
                    let closure = self.heap.allocate(HeapValue::Closure(Closure {
                        proto: idx,
                        upvalues,
                    }));
                    th.stack.push(Value::Function(closure));
                }
                Instr::Mark => frame.marks.push(th.stack.len()),
                Instr::Adjust(n) => {
                    let mark = pop_mark(frame)?;
                    th.stack.resize(mark + n as usize, Value::Nil);
                }
                Instr::Call(want) => {
                    let mark = pop_mark(frame)?;
                    if mark >= th.stack.len() {
                        return Err(stack_underflow());
                    }
                    let args = th.stack.split_off(mark + 1);
                    let func = pop(&mut th.stack)?;
                    if let Some(transfer) = self.call_value(host, act, func, args, want)? {
                        return Ok(transfer);
                    }
                }
                Instr::Return => {
                    let mark = pop_mark(frame)?;
                    let values = th.stack.split_off(mark);
                    let Some(done) = th.frames.pop() else {
                        return Err(VMError::InvalidState("return without frame".into()));
                    };
                    th.stack.truncate(done.base);
                    if th.frames.is_empty() {
                        return Ok(Transfer::Finished(values));
                    }
                    th.push_results(values, done.want);
                }
                Instr::ForPrep { base: slot, exit } => {
                    if !for_prep(&mut th.stack, base + slot as usize)? {
                        frame.ip = exit as usize;
                    }
                }
                Instr::ForLoop { base: slot, body } => {
                    if for_step(&mut th.stack, base + slot as usize)? {
                        frame.ip = body as usize;
                    }
                }
                Instr::TForCheck { ctl, nvars, exit } => {
                    let n = nvars as usize;
                    if th.stack.len() < n {
                        return Err(stack_underflow());
                    }
                    let first = th.stack[th.stack.len() - n].clone();
                    if first.is_nil() {
                        let len = th.stack.len();
                        th.stack.truncate(len - n);
                        frame.ip = exit as usize;
                    } else {
                        *slot_mut(&mut th.stack, base, ctl)? = first;
                    }
                }
            }
        }
    }

    fn upvalue(
        &self,
        closure: Handle,
        idx: u16,
    ) -> VMResult<Handle> {
        self.heap
            .closure(closure)?
            .upvalues
            .get(idx as usize)
            .copied()
            .ok_or_else(|| VMError::InvalidState(format!("missing upvalue {}", idx)))
    }

    /// `target[key]`; strings and host objects index their method tables
    fn index(
        &self,
        target: &Value,
        key: &Value,
    ) -> VMResult<Value> {
        let table = match target {
            Value::Table(h) => *h,
            Value::Str(_) => self.registry.string,
            Value::File(_) => self.registry.file,
            Value::Future(_) => self.registry.future,
            other => {
                return Err(VMError::Runtime(format!(
                    "attempt to index a {} value",
                    other.type_name()
                )))
            }
        };
        Ok(self.heap.table(table)?.get(key))
    }

    fn set_index(
        &mut self,
        target: &Value,
        key: &Value,
        value: Value,
    ) -> VMResult<()> {
        match target {
            Value::Table(h) => self.heap.table_mut(*h)?.set(key, value).map_err(|e| match e {
                KeyError::Nil => VMError::runtime("table index is nil"),
                KeyError::NaN => VMError::runtime("table index is NaN"),
            }),
            other => Err(VMError::Runtime(format!(
                "attempt to index a {} value",
                other.type_name()
            ))),
        }
    }

    fn length(
        &self,
        value: &Value,
    ) -> VMResult<Value> {
        match value {
            Value::Str(s) => Ok(Value::Int(s.len() as i64)),
            Value::Table(h) => Ok(Value::Int(self.heap.table(*h)?.len() as i64)),
            other => Err(VMError::Runtime(format!(
                "attempt to get length of a {} value",
                other.type_name()
            ))),
        }
    }

    /// Turn a raw error into a guest failure: position prefix, traceback over
    /// the resume chain, and every coroutine on the chain marked dead
    fn fail(
        &mut self,
        mut act: Active,
        err: VMError,
    ) -> VMError {
        let mut frames_text = Vec::new();
        let mut line = None;
        for frame in act.thread.frames.iter().rev() {
            if let Some(proto) = self.program.proto(frame.proto) {
                let at = proto.line_at(frame.current_ip());
                line.get_or_insert(at);
                frames_text.push(format!("\tEEPROM:{}: {}", at, proto.describe()));
            }
        }
        for handle in self.chain.iter().rev().skip(1) {
            if let Ok(thread) = self.heap.thread(*handle) {
                for frame in thread.frames.iter().rev() {
                    if let Some(proto) = self.program.proto(frame.proto) {
                        let at = proto.line_at(frame.current_ip());
                        line.get_or_insert(at);
                        frames_text.push(format!("\tEEPROM:{}: {}", at, proto.describe()));
                    }
                }
            }
        }

        let message = match err {
            VMError::Guest { message, .. } => message,
            other if other.wants_position() => match line {
                Some(line) => format!("EEPROM:{}: {}", line, other),
                None => other.to_string(),
            },
            other => other.to_string(),
        };
        let mut traceback = String::from("stack traceback:");
        for entry in &frames_text {
            traceback.push('\n');
            traceback.push_str(entry);
        }

        act.thread.status = ThreadStatus::Dead;
        act.thread.pending = Pending::None;
        let _ = self.heap.put_thread(act.handle, act.thread);
        for handle in std::mem::take(&mut self.chain) {
            if let Ok(thread) = self.heap.thread_mut(handle) {
                thread.status = ThreadStatus::Dead;
                thread.pending = Pending::None;
            }
        }
        debug!(%message, "guest execution failed");
        VMError::Guest { message, traceback }
    }
}

fn stack_underflow() -> VMError {
    VMError::InvalidState("stack underflow".to_string())
}

#[inline]
fn pop(stack: &mut Vec<Value>) -> VMResult<Value> {
    stack.pop().ok_or_else(stack_underflow)
}

#[inline]
fn peek(stack: &[Value]) -> VMResult<&Value> {
    stack.last().ok_or_else(stack_underflow)
}

#[inline]
fn pop_mark(frame: &mut Frame) -> VMResult<usize> {
    frame
        .marks
        .pop()
        .ok_or_else(|| VMError::InvalidState("missing stack mark".to_string()))
}

#[inline]
fn slot_ref(
    stack: &[Value],
    base: usize,
    slot: u16,
) -> VMResult<&Value> {
    stack
        .get(base + slot as usize)
        .ok_or_else(|| VMError::InvalidState(format!("local slot {} out of range", slot)))
}

#[inline]
fn slot_mut(
    stack: &mut [Value],
    base: usize,
    slot: u16,
) -> VMResult<&mut Value> {
    stack
        .get_mut(base + slot as usize)
        .ok_or_else(|| VMError::InvalidState(format!("local slot {} out of range", slot)))
}

fn cell_in_slot(
    stack: &[Value],
    base: usize,
    slot: u16,
) -> VMResult<Handle> {
    match slot_ref(stack, base, slot)? {
        Value::Cell(h) => Ok(*h),
        other => Err(VMError::InvalidState(format!(
            "slot {} holds {} instead of a cell",
            slot,
            other.type_name()
        ))),
    }
}

fn constant(
    proto: &crate::vm::opcode::Proto,
    idx: u32,
) -> VMResult<Rc<str>> {
    proto
        .constants
        .get(idx as usize)
        .cloned()
        .ok_or_else(|| VMError::InvalidState(format!("missing constant {}", idx)))
}

/// Numeric operand for arithmetic, coercing numeric strings
fn arith_operand(value: &Value) -> VMResult<Value> {
    value.to_number().ok_or_else(|| {
        VMError::Runtime(format!(
            "attempt to perform arithmetic on a {} value",
            value.type_name()
        ))
    })
}

fn negate(value: &Value) -> VMResult<Value> {
    Ok(match arith_operand(value)? {
        Value::Int(i) => Value::Int(i.wrapping_neg()),
        Value::Float(f) => Value::Float(-f),
        other => other,
    })
}

/// Evaluate a binary operator
pub fn binary(
    op: BinOp,
    lhs: &Value,
    rhs: &Value,
) -> VMResult<Value> {
    match op {
        BinOp::Eq => return Ok(Value::Bool(lhs.raw_eq(rhs))),
        BinOp::Ne => return Ok(Value::Bool(!lhs.raw_eq(rhs))),
        BinOp::Lt => return compare(lhs, rhs, |o| o.is_lt()),
        BinOp::Le => return compare(lhs, rhs, |o| o.is_le()),
        BinOp::Gt => return compare(lhs, rhs, |o| o.is_gt()),
        BinOp::Ge => return compare(lhs, rhs, |o| o.is_ge()),
        BinOp::Concat => return concat(lhs, rhs),
        _ => {}
    }

    let a = arith_operand(lhs)?;
    let b = arith_operand(rhs)?;
    if let (Value::Int(x), Value::Int(y)) = (&a, &b) {
        let (x, y) = (*x, *y);
        match op {
            BinOp::Add => return Ok(Value::Int(x.wrapping_add(y))),
            BinOp::Sub => return Ok(Value::Int(x.wrapping_sub(y))),
            BinOp::Mul => return Ok(Value::Int(x.wrapping_mul(y))),
            BinOp::IDiv => {
                if y == 0 {
                    return Err(VMError::runtime("attempt to perform 'n//0'"));
                }
                let q = x.wrapping_div(y);
                let q = if x.wrapping_rem(y) != 0 && ((x ^ y) < 0) { q - 1 } else { q };
                return Ok(Value::Int(q));
            }
            BinOp::Mod => {
                if y == 0 {
                    return Err(VMError::runtime("attempt to perform 'n%%0'"));
                }
                let m = x.wrapping_rem(y);
                let m = if m != 0 && ((m ^ y) < 0) { m + y } else { m };
                return Ok(Value::Int(m));
            }
            _ => {}
        }
    }

    let x = a.as_f64().unwrap_or(f64::NAN);
    let y = b.as_f64().unwrap_or(f64::NAN);
    Ok(Value::Float(match op {
        BinOp::Add => x + y,
        BinOp::Sub => x - y,
        BinOp::Mul => x * y,
        BinOp::Div => x / y,
        BinOp::Pow => x.powf(y),
        BinOp::IDiv => (x / y).floor(),
        BinOp::Mod => {
            let m = x % y;
            if m != 0.0 && (m * y) < 0.0 {
                m + y
            } else {
                m
            }
        }
        _ => unreachable_op(op)?,
    }))
}

fn unreachable_op(op: BinOp) -> VMResult<f64> {
    Err(VMError::InvalidState(format!("operator {} is not arithmetic", op.symbol())))
}

fn compare(
    lhs: &Value,
    rhs: &Value,
    accept: impl Fn(std::cmp::Ordering) -> bool,
) -> VMResult<Value> {
    let ordering = match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
            let a = lhs.as_f64().unwrap_or(f64::NAN);
            let b = rhs.as_f64().unwrap_or(f64::NAN);
            a.partial_cmp(&b)
        }
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        _ => {
            let (a, b) = (lhs.type_name(), rhs.type_name());
            return Err(VMError::Runtime(if a == b {
                format!("attempt to compare two {} values", a)
            } else {
                format!("attempt to compare {} with {}", a, b)
            }));
        }
    };
    Ok(Value::Bool(ordering.map(accept).unwrap_or(false)))
}

fn concat(
    lhs: &Value,
    rhs: &Value,
) -> VMResult<Value> {
    let piece = |v: &Value| -> VMResult<String> {
        match v {
            Value::Str(s) => Ok(s.to_string()),
            Value::Int(_) | Value::Float(_) => Ok(v.to_string()),
            other => Err(VMError::Runtime(format!(
                "attempt to concatenate a {} value",
                other.type_name()
            ))),
        }
    };
    let mut out = piece(lhs)?;
    out.push_str(&piece(rhs)?);
    Ok(Value::str(&out))
}

fn for_number(
    value: &Value,
    what: &str,
) -> VMResult<Value> {
    match value {
        Value::Int(_) | Value::Float(_) => Ok(value.clone()),
        _ => Err(VMError::Runtime(format!("'for' {} must be a number", what))),
    }
}

/// Normalise the numeric loop slots; false when the loop body must not run
fn for_prep(
    stack: &mut [Value],
    at: usize,
) -> VMResult<bool> {
    if stack.len() < at + 3 {
        return Err(stack_underflow());
    }
    let init = for_number(&stack[at], "initial value")?;
    let limit = for_number(&stack[at + 1], "limit")?;
    let step = for_number(&stack[at + 2], "step")?;

    if let (Value::Int(i), Value::Int(s)) = (&init, &step) {
        let (i, s) = (*i, *s);
        if s == 0 {
            return Err(VMError::runtime("'for' step is zero"));
        }
        let l = match limit {
            Value::Int(l) => l,
            Value::Float(f) => {
                if f.is_nan() {
                    return Ok(false);
                }
                let f = if s > 0 { f.floor() } else { f.ceil() };
                float_to_int(f).unwrap_or(if f > 0.0 { i64::MAX } else { i64::MIN })
            }
            _ => return Err(stack_underflow()),
        };
        stack[at] = Value::Int(i);
        stack[at + 1] = Value::Int(l);
        stack[at + 2] = Value::Int(s);
        return Ok(if s > 0 { i <= l } else { i >= l });
    }

    let i = init.as_f64().unwrap_or(f64::NAN);
    let l = limit.as_f64().unwrap_or(f64::NAN);
    let s = step.as_f64().unwrap_or(f64::NAN);
    if s == 0.0 {
        return Err(VMError::runtime("'for' step is zero"));
    }
    stack[at] = Value::Float(i);
    stack[at + 1] = Value::Float(l);
    stack[at + 2] = Value::Float(s);
    Ok(if s > 0.0 { i <= l } else { i >= l })
}

/// Advance the numeric loop; true when the body runs again
fn for_step(
    stack: &mut [Value],
    at: usize,
) -> VMResult<bool> {
    if stack.len() < at + 3 {
        return Err(stack_underflow());
    }
    match (&stack[at], &stack[at + 1], &stack[at + 2]) {
        (Value::Int(i), Value::Int(l), Value::Int(s)) => {
            let (l, s) = (*l, *s);
            match i.checked_add(s) {
                Some(next) if (s > 0 && next <= l) || (s < 0 && next >= l) => {
                    stack[at] = Value::Int(next);
                    Ok(true)
                }
                _ => Ok(false),
            }
        }
        (Value::Float(i), Value::Float(l), Value::Float(s)) => {
            let (next, l, s) = (i + s, *l, *s);
            if (s > 0.0 && next <= l) || (s < 0.0 && next >= l) {
                stack[at] = Value::Float(next);
                Ok(true)
            } else {
                Ok(false)
            }
        }
        _ => Err(VMError::InvalidState("corrupted 'for' loop state".to_string())),
    }
}
