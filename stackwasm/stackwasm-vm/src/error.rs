//! Crate-level error types for stackwasm-vm.

use std::path::PathBuf;

use thiserror::Error;

use crate::binary::BinaryReadError;
use crate::model::ValType;

/// Execution failure raised while running a function body.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Trap {
    /// Unrecognised opcode; prefixed opcodes are reported as `0xFC00 | sub`.
    #[error("unsupported opcode {opcode:#04x}")]
    FunctionFault { opcode: u32 },

    #[error("{what} access out of bounds at index {index}")]
    OutOfBounds { what: &'static str, index: u64 },

    #[error("integer divide by zero")]
    DivideByZero,

    #[error("integer overflow")]
    IntegerOverflow,

    #[error("invalid conversion to integer")]
    InvalidConversion,

    #[error("operand stack underflow")]
    StackUnderflow,

    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: ValType, found: ValType },

    #[error("global {index} is constant")]
    ConstantGlobal { index: u32 },

    #[error("unreachable executed")]
    Unreachable,

    #[error("unknown function {index}")]
    UnknownFunction { index: u32 },

    #[error("unknown global {index}")]
    UnknownGlobal { index: u32 },

    #[error("unknown local {index}")]
    UnknownLocal { index: u32 },

    #[error("memory {index} is not defined")]
    MissingMemory { index: u32 },

    #[error("function {index} has no body")]
    MissingBody { index: u32 },

    #[error("unbound import {module}.{name}")]
    UnboundImport { module: String, name: String },

    #[error("expected {expected} arguments, found {found}")]
    ArgumentCount { expected: usize, found: usize },

    #[error("call stack exhausted (limit {limit})")]
    CallStackExhausted { limit: usize },

    #[error("unbalanced block structure at offset {offset}")]
    UnbalancedBlock { offset: usize },

    #[error("branch depth {depth} exceeds enclosing blocks")]
    BranchDepth { depth: u32 },

    #[error("host function failed: {0}")]
    Host(String),

    #[error(transparent)]
    Binary(#[from] BinaryReadError),
}

impl Trap {
    /// Failures that describe the code itself rather than the values it ran on.
    pub(crate) fn is_structural(&self) -> bool {
        matches!(
            self,
            Trap::FunctionFault { .. } | Trap::Binary(_) | Trap::UnbalancedBlock { .. }
        )
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed module at offset {offset}: {reason}")]
    MalformedModule { offset: usize, reason: String },

    #[error("no exported function named `{name}`")]
    LookupFailure { name: String },

    #[error(transparent)]
    Trap(#[from] Trap),

    #[error("failed to read {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub(crate) fn malformed(offset: usize, reason: impl Into<String>) -> Self {
        Error::MalformedModule {
            offset,
            reason: reason.into(),
        }
    }
}

impl From<BinaryReadError> for Error {
    fn from(err: BinaryReadError) -> Self {
        Error::MalformedModule {
            offset: err.offset(),
            reason: err.to_string(),
        }
    }
}
