//! Activation and control frames used by the interpreter.

use crate::model::{ValType, Value};

/// Structured control construct a label belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Block,
    Loop,
    If,
}

/// Runtime label pushed by `block`, `loop` and `if`.
#[derive(Debug, Clone)]
pub struct Label {
    pub kind: BlockKind,
    /// Byte offset of the opening opcode.
    pub start: usize,
    /// Byte offset of the matching `end` opcode.
    pub end: usize,
    /// Stack height below the construct's parameters.
    pub height: usize,
    /// Values a branch to this label carries: params for loops, results otherwise.
    pub arity: usize,
    pub results: Vec<ValType>,
    /// Loop only: frame contents and effect count when the loop was entered.
    pub snapshot: Vec<Value>,
    pub effects: u64,
}

/// Region of the operand stack owned by one activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    /// Absolute index of local 0.
    pub offset: usize,
    /// Parameters plus declared locals.
    pub locals: usize,
}

impl Frame {
    pub fn new(offset: usize, locals: usize) -> Self {
        Self { offset, locals }
    }

    /// Absolute stack index of local `index`, if it exists.
    pub fn slot(&self, index: u32) -> Option<usize> {
        let index = index as usize;
        (index < self.locals).then_some(self.offset + index)
    }
}
