//! Functions: signature, locals, raw body and the lazily built jump table.

use std::cell::OnceCell;
use std::fmt;
use std::sync::Arc;

use tracing::{trace, warn};

use crate::binary::Cursor;
use crate::error::Trap;
use crate::host::HostFunc;
use crate::model::{FuncType, Value};
use crate::runtime::Store;
use crate::vm::frames::Frame;
use crate::vm::interpreter::{execute, settle, Activation};
use crate::vm::jumps::JumpTable;

/// Read-only module tables visible to every activation.
#[derive(Clone, Copy)]
pub struct Env<'m> {
    pub functions: &'m [Function],
    pub types: &'m [FuncType],
}

impl<'m> Env<'m> {
    pub fn function(&self, index: u32) -> Result<&'m Function, Trap> {
        self.functions
            .get(index as usize)
            .ok_or(Trap::UnknownFunction { index })
    }
}

/// Where a function's behaviour comes from.
pub enum Body {
    /// Declared in the function section; code not attached yet.
    Pending,
    /// Instruction bytes, undecoded until first use.
    Code(Vec<u8>),
    /// Imported; `func` is `None` when the host supplied no binding.
    Host {
        module: String,
        field: String,
        func: Option<Arc<HostFunc>>,
    },
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Pending => f.write_str("Pending"),
            Body::Code(code) => write!(f, "Code({} bytes)", code.len()),
            Body::Host { module, field, func } => f
                .debug_struct("Host")
                .field("module", module)
                .field("field", field)
                .field("bound", &func.is_some())
                .finish(),
        }
    }
}

#[derive(Debug)]
pub struct Function {
    /// Export name, if any.
    pub name: Option<String>,
    pub signature: FuncType,
    /// Declared locals, appended after the parameters in the frame.
    pub locals: Vec<crate::model::ValType>,
    pub body: Body,
    jumps: OnceCell<JumpTable>,
}

impl Function {
    pub fn new(signature: FuncType) -> Self {
        Self {
            name: None,
            signature,
            locals: Vec::new(),
            body: Body::Pending,
            jumps: OnceCell::new(),
        }
    }

    pub fn imported(signature: FuncType, module: String, field: String, func: Option<Arc<HostFunc>>) -> Self {
        Self {
            body: Body::Host { module, field, func },
            ..Self::new(signature)
        }
    }

    pub fn is_imported(&self) -> bool {
        matches!(self.body, Body::Host { .. })
    }

    /// Attach declared locals and instruction bytes from the code section.
    pub fn attach(&mut self, locals: Vec<crate::model::ValType>, code: Vec<u8>) {
        self.locals = locals;
        self.body = Body::Code(code);
    }

    /// The jump table, built on first request against a shadow of `store`.
    pub fn jump_table(&self, index: u32, env: Env<'_>, store: &Store) -> Result<&JumpTable, Trap> {
        if let Some(table) = self.jumps.get() {
            return Ok(table);
        }
        let Body::Code(code) = &self.body else {
            return Err(Trap::MissingBody { index });
        };
        let table = JumpTable::build(self, index, code, env, store)?;
        Ok(self.jumps.get_or_init(|| table))
    }

    /// Run the function. Its arguments occupy the stack from `frame_offset` to
    /// the top; on success they are replaced by exactly the declared results.
    pub(crate) fn invoke(
        &self,
        index: u32,
        env: Env<'_>,
        store: &mut Store,
        frame_offset: usize,
    ) -> Result<(), Trap> {
        let limit = store.options.max_call_depth;
        if store.depth >= limit {
            warn!(target: "stackwasm::guard", function = index, limit, "call depth limit reached");
            return Err(Trap::CallStackExhausted { limit });
        }
        store.depth += 1;
        let outcome = self.run(index, env, store, frame_offset);
        store.depth -= 1;
        outcome
    }

    fn run(&self, index: u32, env: Env<'_>, store: &mut Store, frame_offset: usize) -> Result<(), Trap> {
        let params = self.signature.params.len();
        if frame_offset + params > store.stack.len() {
            return Err(Trap::StackUnderflow);
        }

        match &self.body {
            Body::Pending => Err(Trap::MissingBody { index }),
            Body::Host { module, field, func } => {
                let func = func.as_ref().ok_or_else(|| Trap::UnboundImport {
                    module: module.clone(),
                    name: field.clone(),
                })?;
                trace!(target: "stackwasm::invoke", function = index, module = %module, field = %field, "host call");
                let args = store.stack.pop_n(params)?;
                store.effects += 1;
                let results = func(&args)?;
                self.check_results(&results)?;
                store.stack.truncate(frame_offset);
                store.stack.extend(results);
                Ok(())
            }
            Body::Code(code) => {
                let jumps = self.jump_table(index, env, store)?;
                trace!(target: "stackwasm::invoke", function = index, frame_offset, depth = store.depth, "invoke");

                let entry_args = if store.options.recursion_guard {
                    store.stack.as_slice()[frame_offset..frame_offset + params].to_vec()
                } else {
                    Vec::new()
                };
                store
                    .stack
                    .extend(self.locals.iter().map(|ty| Value::default_for(*ty)));

                let mut act = Activation {
                    index,
                    cur: Cursor::new(code),
                    jumps,
                    frame: Frame::new(frame_offset, params + self.locals.len()),
                    labels: Vec::new(),
                    entry_args,
                    entry_effects: store.effects,
                };
                execute(&mut act, env, store)?;

                settle(&mut store.stack, frame_offset, self.signature.results.len())
            }
        }
    }

    fn check_results(&self, results: &[Value]) -> Result<(), Trap> {
        if results.len() != self.signature.results.len() {
            return Err(Trap::Host(format!(
                "expected {} results, got {}",
                self.signature.results.len(),
                results.len()
            )));
        }
        for (value, expected) in results.iter().zip(&self.signature.results) {
            if value.ty() != *expected {
                return Err(Trap::TypeMismatch {
                    expected: *expected,
                    found: value.ty(),
                });
            }
        }
        Ok(())
    }
}
