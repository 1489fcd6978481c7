//! Value-level model shared by the decoder and the interpreter.

pub mod types;

pub use types::{BlockType, FuncType, Limits, ValType, Value};
