//! stackwasm-vm: WebAssembly binary decoder and stack interpreter.
//!
//! A [`Module`] owns every function, memory and global of one decoded binary
//! plus the operand stack they share. Hosts call exports by name:
//!
//! ```no_run
//! use stackwasm_vm::{Module, Value};
//!
//! let mut module = Module::from_path("add.wasm")?;
//! let results = module.call("add", &[Value::I32(3), Value::I32(4)])?;
//! assert_eq!(results, vec![Value::I32(7)]);
//! # Ok::<(), stackwasm_vm::Error>(())
//! ```

pub mod binary;
pub mod config;
pub mod error;
pub mod host;
pub mod model;
pub mod module;
pub mod runtime;
pub mod vm;

pub use binary::{BinaryReadError, ByteStream, Cursor};
pub use config::ExecutionOptions;
pub use error::{Error, Trap};
pub use host::{HostFunc, ImportResolver, Imports};
pub use model::{FuncType, Limits, ValType, Value};
pub use module::Module;
pub use runtime::{GlobalSlot, Memory};
pub use vm::{Function, JumpTable};
