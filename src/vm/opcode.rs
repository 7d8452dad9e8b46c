//! 字节码指令定义
//!
//! The interpreter is stack based. Every instruction is a small `Copy` value;
//! string constants live in the owning prototype's constant pool.
//!
//! Multi-value sequences (argument lists, return lists, table constructors)
//! are delimited by marks: `Mark` records the current stack height and the
//! consuming instruction (`Call`, `Return`, `Adjust`, `SetList`) takes every
//! value above the most recent mark.

use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    IDiv,
    Mod,
    Pow,
    Concat,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinOp {
    /// Lua spelling, used in error messages
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::IDiv => "//",
            BinOp::Mod => "%",
            BinOp::Pow => "^",
            BinOp::Concat => "..",
            BinOp::Eq => "==",
            BinOp::Ne => "~=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
        }
    }
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnOp {
    Neg,
    Not,
    Len,
}

/// A single VM instruction
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Instr {
    // 常量
    Nil,
    True,
    False,
    Int(i64),
    Float(f64),
    /// Push string constant
    Const(u32),

    // 栈操作
    Pop,
    Dup,
    Swap,

    // 变量
    LoadLocal(u16),
    StoreLocal(u16),
    /// Pop a value and store it in a fresh cell bound to the slot
    NewCell(u16),
    LoadCell(u16),
    StoreCell(u16),
    LoadUpval(u16),
    StoreUpval(u16),
    /// Global read; the operand is a constant index holding the name
    GetGlobal(u32),
    SetGlobal(u32),

    // 表
    NewTable,
    /// `[t, k] -> [t[k]]`
    GetIndex,
    /// `[t, k, v] -> []`
    SetIndex,
    /// `[t, k, v] -> [t]`, used by table constructors
    InitField,
    /// Store every value above the mark into `t[start..]`; `t` sits just below the mark
    SetList(u32),

    // 运算
    Binary(BinOp),
    Unary(UnOp),

    // 跳转
    Jump(u32),
    /// Pop the condition and jump when it is falsy
    JumpIfFalse(u32),
    /// Short-circuit `and`: jump keeping the value when falsy, otherwise pop it
    AndJump(u32),
    /// Short-circuit `or`: jump keeping the value when truthy, otherwise pop it
    OrJump(u32),

    // 函数
    Closure(u32),
    Mark,
    /// Pad or truncate the values above the mark to exactly n
    Adjust(u16),
    /// Call the function just above the mark; `None` keeps every result
    Call(Option<u8>),
    Return,

    // 循环
    /// Validate numeric loop slots `base..base+3`, jump to `exit` if the loop does not run
    ForPrep { base: u16, exit: u32 },
    /// Step the numeric loop and jump back to `body` while it continues
    ForLoop { base: u16, body: u32 },
    /// Generic-for check: the `nvars` iterator results are on the stack; exit on nil,
    /// otherwise copy the first into the control slot
    TForCheck { ctl: u16, nvars: u16, exit: u32 },
}

/// How a closure captures one upvalue at creation time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpvalDesc {
    /// Cell in a local slot of the enclosing function
    Local(u16),
    /// Upvalue of the enclosing closure
    Upval(u16),
}

/// A compiled function
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proto {
    /// Name for tracebacks, `None` for the main chunk
    pub name: Option<String>,
    /// Line the function was defined on
    pub line: u32,
    /// Declared parameter count
    pub params: u16,
    /// Local slot count, parameters included
    pub slots: u16,
    pub upvals: Vec<UpvalDesc>,
    pub code: Vec<Instr>,
    /// Source line of every instruction
    pub lines: Vec<u32>,
    pub constants: Vec<Rc<str>>,
}

impl Proto {
    /// Source line of the instruction at `ip`
    pub fn line_at(
        &self,
        ip: usize,
    ) -> u32 {
        self.lines.get(ip).copied().unwrap_or(self.line)
    }

    /// Traceback label
    pub fn describe(&self) -> String {
        match &self.name {
            None => "in main chunk".to_string(),
            Some(name) => format!("in function '{}'", name),
        }
    }
}

/// A compiled guest program
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub protos: Vec<Proto>,
    /// Index of the main chunk
    pub main: u32,
}

impl Program {
    pub fn proto(
        &self,
        idx: u32,
    ) -> Option<&Proto> {
        self.protos.get(idx as usize)
    }

    pub fn main_proto(&self) -> Option<&Proto> {
        self.proto(self.main)
    }
}

impl fmt::Display for Instr {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            Instr::Binary(op) => write!(f, "Binary({})", op.symbol()),
            other => write!(f, "{:?}", other),
        }
    }
}

impl fmt::Display for Proto {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        writeln!(
            f,
            "function {} (line {}, {} params, {} slots)",
            self.name.as_deref().unwrap_or("<main>"),
            self.line,
            self.params,
            self.slots
        )?;
        for (ip, instr) in self.code.iter().enumerate() {
            writeln!(f, "  {:04} [{:>3}] {}", ip, self.line_at(ip), instr)?;
        }
        Ok(())
    }
}
