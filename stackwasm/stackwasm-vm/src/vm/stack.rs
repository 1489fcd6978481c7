//! Operand stack shared by every activation of a module.
//! Each activation addresses its locals relative to a frame offset.

use std::ops::Range;

use crate::error::Trap;
use crate::model::{ValType, Value};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperandStack {
    stack: Vec<Value>,
}

impl OperandStack {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.stack.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    #[inline]
    pub fn push(&mut self, v: impl Into<Value>) {
        self.stack.push(v.into());
    }

    pub fn extend(&mut self, values: impl IntoIterator<Item = Value>) {
        self.stack.extend(values);
    }

    #[inline]
    pub fn pop(&mut self) -> Result<Value, Trap> {
        self.stack.pop().ok_or(Trap::StackUnderflow)
    }

    fn pop_typed(&mut self, expected: ValType) -> Result<Value, Trap> {
        let v = self.pop()?;
        if v.ty() != expected {
            return Err(Trap::TypeMismatch {
                expected,
                found: v.ty(),
            });
        }
        Ok(v)
    }

    pub fn pop_i32(&mut self) -> Result<i32, Trap> {
        match self.pop_typed(ValType::I32)? {
            Value::I32(v) => Ok(v),
            _ => Err(Trap::StackUnderflow),
        }
    }

    pub fn pop_i64(&mut self) -> Result<i64, Trap> {
        match self.pop_typed(ValType::I64)? {
            Value::I64(v) => Ok(v),
            _ => Err(Trap::StackUnderflow),
        }
    }

    pub fn pop_f32(&mut self) -> Result<f32, Trap> {
        match self.pop_typed(ValType::F32)? {
            Value::F32(bits) => Ok(f32::from_bits(bits)),
            _ => Err(Trap::StackUnderflow),
        }
    }

    pub fn pop_f64(&mut self) -> Result<f64, Trap> {
        match self.pop_typed(ValType::F64)? {
            Value::F64(bits) => Ok(f64::from_bits(bits)),
            _ => Err(Trap::StackUnderflow),
        }
    }

    /// Value at an absolute index.
    pub fn get(&self, index: usize) -> Result<Value, Trap> {
        self.stack.get(index).copied().ok_or(Trap::OutOfBounds {
            what: "stack",
            index: index as u64,
        })
    }

    /// Overwrite the value at an absolute index.
    pub fn set(&mut self, index: usize, v: Value) -> Result<(), Trap> {
        let slot = self.stack.get_mut(index).ok_or(Trap::OutOfBounds {
            what: "stack",
            index: index as u64,
        })?;
        *slot = v;
        Ok(())
    }

    /// The top `n` values, bottom first, without popping.
    pub fn top(&self, n: usize) -> Result<&[Value], Trap> {
        let start = self.stack.len().checked_sub(n).ok_or(Trap::StackUnderflow)?;
        Ok(&self.stack[start..])
    }

    /// Pop the top `n` values, returned bottom first.
    pub fn pop_n(&mut self, n: usize) -> Result<Vec<Value>, Trap> {
        let start = self.stack.len().checked_sub(n).ok_or(Trap::StackUnderflow)?;
        Ok(self.stack.split_off(start))
    }

    pub fn truncate(&mut self, height: usize) {
        self.stack.truncate(height);
    }

    /// Remove the slots in `range`, shifting everything above it down.
    pub fn remove_range(&mut self, range: Range<usize>) -> Result<(), Trap> {
        if range.start > range.end || range.end > self.stack.len() {
            return Err(Trap::StackUnderflow);
        }
        self.stack.drain(range);
        Ok(())
    }

    pub fn as_slice(&self) -> &[Value] {
        &self.stack
    }
}
