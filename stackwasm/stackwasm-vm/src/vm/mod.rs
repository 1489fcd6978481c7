//! Execution engine: operand stack, opcode set, frames, jump tables and the
//! interpreter loop behind `Function::invoke`.

pub mod frames;
pub mod function;
pub mod instructions;
pub mod interpreter;
pub mod jumps;
pub mod stack;

pub use function::{Body, Env, Function};
pub use jumps::JumpTable;
pub use stack::OperandStack;
