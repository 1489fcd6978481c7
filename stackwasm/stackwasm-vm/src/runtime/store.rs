//! Module-wide mutable state shared by every function activation.
//! Owns the operand stack, memories, globals and retained data segments.

use super::{global::GlobalSlot, memory::Memory};
use crate::config::ExecutionOptions;
use crate::error::Trap;
use crate::model::Value;
use crate::vm::stack::OperandStack;

#[derive(Debug, Clone, Default)]
pub struct Store {
    pub stack: OperandStack,
    pub memories: Vec<Memory>,
    pub globals: Vec<GlobalSlot>,
    /// Segment bytes for `memory.init`; dropped segments are empty.
    pub data: Vec<Vec<u8>>,
    /// Bumped by every memory write, global write and host call.
    pub effects: u64,
    /// Activations currently on the call chain.
    pub depth: usize,
    /// True while computing jump tables against a disposable copy.
    pub shadow: bool,
    pub options: ExecutionOptions,
}

impl Store {
    pub fn new(options: ExecutionOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    /// Disposable copy used by the jump-table pass; never written back.
    pub fn shadow_copy(&self) -> Self {
        Self {
            stack: self.stack.clone(),
            memories: self.memories.clone(),
            globals: self.globals.clone(),
            data: Vec::new(),
            effects: 0,
            depth: 0,
            shadow: true,
            options: self.options.clone(),
        }
    }

    pub fn memory(&self, index: u32) -> Result<&Memory, Trap> {
        self.memories
            .get(index as usize)
            .ok_or(Trap::MissingMemory { index })
    }

    pub fn memory_mut(&mut self, index: u32) -> Result<&mut Memory, Trap> {
        self.memories
            .get_mut(index as usize)
            .ok_or(Trap::MissingMemory { index })
    }

    pub fn global(&self, index: u32) -> Result<Value, Trap> {
        self.globals
            .get(index as usize)
            .map(GlobalSlot::get)
            .ok_or(Trap::UnknownGlobal { index })
    }

    /// Write a global, refusing constants and differently-typed values.
    pub fn set_global(&mut self, index: u32, value: Value) -> Result<(), Trap> {
        let slot = self
            .globals
            .get_mut(index as usize)
            .ok_or(Trap::UnknownGlobal { index })?;
        if slot.is_constant {
            return Err(Trap::ConstantGlobal { index });
        }
        if slot.ty() != value.ty() {
            return Err(Trap::TypeMismatch {
                expected: slot.ty(),
                found: value.ty(),
            });
        }
        slot.value = value;
        self.effects += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Limits, ValType};

    #[test]
    fn constant_globals_reject_writes() {
        let mut store = Store::default();
        store.globals.push(GlobalSlot::new(Value::I32(1), true));
        store.globals.push(GlobalSlot::new(Value::I64(2), false));

        assert_eq!(store.set_global(0, Value::I32(5)), Err(Trap::ConstantGlobal { index: 0 }));
        assert_eq!(
            store.set_global(1, Value::I32(5)),
            Err(Trap::TypeMismatch { expected: ValType::I64, found: ValType::I32 })
        );
        store.set_global(1, Value::I64(5)).unwrap();
        assert_eq!(store.global(1), Ok(Value::I64(5)));
        assert_eq!(store.effects, 1);
        assert_eq!(store.global(2), Err(Trap::UnknownGlobal { index: 2 }));
    }

    #[test]
    fn shadow_copy_is_detached() {
        let mut store = Store::default();
        store.memories.push(Memory::new(Limits::new(1, None)).unwrap());
        store.stack.push(3i32);

        let mut shadow = store.shadow_copy();
        assert!(shadow.shadow);
        shadow.stack.push(4i32);
        shadow.memory_mut(0).unwrap().store(0, &[9]).unwrap();

        assert_eq!(store.stack.len(), 1);
        assert_eq!(store.memory(0).unwrap().read(0, 1).unwrap(), &[0]);
        assert!(store.memory(1).is_err());
    }
}
