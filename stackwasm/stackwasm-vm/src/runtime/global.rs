//! Global slot: one typed value plus its mutability.

use crate::model::{ValType, Value};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalSlot {
    pub value: Value,
    /// Set at decode time from the declared mutability; never changes.
    pub is_constant: bool,
    /// Export name, when the module exports this global.
    pub name: Option<String>,
}

impl GlobalSlot {
    pub fn new(value: Value, is_constant: bool) -> Self {
        Self {
            value,
            is_constant,
            name: None,
        }
    }

    pub fn get(&self) -> Value {
        self.value
    }

    pub fn ty(&self) -> ValType {
        self.value.ty()
    }
}
