//! Module: decodes the binary container straight into runtime tables and
//! exposes name-based invocation to the host.

use std::path::Path;

use tracing::{debug, warn};

use crate::binary::sections::{
    self, read_section_header, ConstExpr, DataMode, ImportKind, SectionId,
};
use crate::binary::{self, ByteStream, Cursor};
use crate::config::ExecutionOptions;
use crate::error::{Error, Trap};
use crate::host::ImportResolver;
use crate::model::{FuncType, Value};
use crate::runtime::{GlobalSlot, Memory, Store};
use crate::vm::{Env, Function, JumpTable};

const MAGIC: [u8; 4] = [0x00, 0x61, 0x73, 0x6D];
const VERSION: [u8; 4] = [0x01, 0x00, 0x00, 0x00];

/// A decoded module together with the state its functions share.
#[derive(Debug)]
pub struct Module {
    functions: Vec<Function>,
    types: Vec<FuncType>,
    store: Store,
    start: Option<u32>,
}

/// Attach the section's file offset to a payload-relative read failure.
fn at<T>(base: usize, result: binary::Result<T>) -> Result<T, Error> {
    result.map_err(|err| err.rebase(base).into())
}

/// Bookkeeping carried across sections while decoding.
#[derive(Default)]
struct Progress {
    last_key: u8,
    /// Index of the first function declared in the function section.
    first_local: usize,
    declared: usize,
    bodies: usize,
}

impl Module {
    /// Decode with default options and no host imports.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        Self::with_options(bytes, ExecutionOptions::default(), &())
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let stream = ByteStream::from_path(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_bytes(stream.as_bytes())
    }

    /// Decode, bind function imports through `imports`, then run the start
    /// function if the module declares one.
    pub fn with_options(
        bytes: &[u8],
        options: ExecutionOptions,
        imports: &impl ImportResolver,
    ) -> Result<Self, Error> {
        let mut module = Self::decode(bytes, options, imports)?;
        if let Some(start) = module.start {
            debug!(target: "stackwasm::decode", function = start, "running start function");
            module.invoke_index(start, &[])?;
        }
        Ok(module)
    }

    fn decode(bytes: &[u8], options: ExecutionOptions, imports: &impl ImportResolver) -> Result<Self, Error> {
        let mut cur = Cursor::new(bytes);
        let magic: [u8; 4] = cur
            .read_array()
            .map_err(|_| Error::malformed(0, "truncated header"))?;
        if magic != MAGIC {
            return Err(Error::malformed(0, "bad magic header"));
        }
        let version: [u8; 4] = cur
            .read_array()
            .map_err(|_| Error::malformed(4, "truncated header"))?;
        if version != VERSION {
            return Err(Error::malformed(4, "unsupported version"));
        }

        let mut module = Module {
            functions: Vec::new(),
            types: Vec::new(),
            store: Store::new(options),
            start: None,
        };
        let mut progress = Progress::default();

        while !cur.is_eof() {
            let header = read_section_header(&mut cur)?;
            let base = header.payload_offset;
            let payload = cur.read_bytes(header.payload_len as usize)?;
            debug!(
                target: "stackwasm::decode",
                section = ?header.id,
                len = header.payload_len,
                offset = base,
                "section"
            );

            if header.id != SectionId::Custom {
                let key = header.id.ordering_key();
                if key <= progress.last_key {
                    return Err(Error::malformed(base, "section out of order or repeated"));
                }
                progress.last_key = key;
            }

            let mut sub = Cursor::new(payload);
            module.decode_section(header.id, &mut sub, base, imports, &mut progress)?;
            if !sub.is_eof() {
                return Err(Error::malformed(
                    base + sub.offset(),
                    "section payload not fully consumed",
                ));
            }
        }

        if progress.declared != progress.bodies {
            return Err(Error::malformed(
                bytes.len(),
                "function and code section counts differ",
            ));
        }
        Ok(module)
    }

    fn signature(&self, index: u32, offset: usize) -> Result<FuncType, Error> {
        self.types
            .get(index as usize)
            .cloned()
            .ok_or_else(|| Error::malformed(offset, format!("type index {index} out of range")))
    }

    fn const_value(&self, expr: ConstExpr, offset: usize) -> Result<Value, Error> {
        match expr {
            ConstExpr::Value(v) => Ok(v),
            ConstExpr::GlobalGet(index) => self.store.global(index).map_err(|_| {
                Error::malformed(offset, format!("initializer reads unknown global {index}"))
            }),
        }
    }

    fn decode_section(
        &mut self,
        id: SectionId,
        cur: &mut Cursor<'_>,
        base: usize,
        imports: &impl ImportResolver,
        progress: &mut Progress,
    ) -> Result<(), Error> {
        match id {
            SectionId::Custom | SectionId::Table | SectionId::Element => {
                debug!(target: "stackwasm::decode", section = ?id, "skipped");
                cur.skip(cur.remaining()).map_err(Error::from)?;
            }
            SectionId::Type => {
                self.types = at(base, sections::read_type_section(cur))?;
            }
            SectionId::Import => {
                for entry in at(base, sections::read_import_section(cur))? {
                    match entry.kind {
                        ImportKind::Func(type_index) => {
                            let ty = self.signature(type_index, base)?;
                            let bound = imports.resolve_func(&entry.module, &entry.name, &ty);
                            if bound.is_none() {
                                debug!(
                                    target: "stackwasm::decode",
                                    module = %entry.module,
                                    name = %entry.name,
                                    "function import left unbound"
                                );
                            }
                            self.functions
                                .push(Function::imported(ty, entry.module, entry.name, bound));
                        }
                        ImportKind::Table => {
                            debug!(target: "stackwasm::decode", name = %entry.name, "table import ignored");
                        }
                        ImportKind::Memory(limits) => self.store.memories.push(Memory::new(limits)?),
                        ImportKind::Global { ty, mutable } => self
                            .store
                            .globals
                            .push(GlobalSlot::new(Value::default_for(ty), !mutable)),
                    }
                }
            }
            SectionId::Function => {
                let indices = at(base, sections::read_function_section(cur))?;
                progress.first_local = self.functions.len();
                progress.declared = indices.len();
                for type_index in indices {
                    let ty = self.signature(type_index, base)?;
                    self.functions.push(Function::new(ty));
                }
            }
            SectionId::Memory => {
                for limits in at(base, sections::read_memory_section(cur))? {
                    self.store.memories.push(Memory::new(limits)?);
                }
            }
            SectionId::Global => {
                for entry in at(base, sections::read_global_section(cur))? {
                    let value = self.const_value(entry.init, base)?;
                    if value.ty() != entry.ty {
                        return Err(Error::malformed(
                            base,
                            format!("global of type {} initialised with {value}", entry.ty),
                        ));
                    }
                    self.store.globals.push(GlobalSlot::new(value, !entry.mutable));
                }
            }
            SectionId::Export => {
                for entry in at(base, sections::read_export_section(cur))? {
                    let index = entry.index as usize;
                    let slot = match entry.kind {
                        0x00 => self.functions.get_mut(index).map(|f| &mut f.name),
                        0x02 => self.store.memories.get_mut(index).map(|m| &mut m.name),
                        0x03 => self.store.globals.get_mut(index).map(|g| &mut g.name),
                        _ => {
                            warn!(
                                target: "stackwasm::decode",
                                name = %entry.name,
                                kind = entry.kind,
                                "export kind not supported; ignored"
                            );
                            continue;
                        }
                    };
                    let slot = slot.ok_or_else(|| {
                        Error::malformed(base, format!("export `{}` index {index} out of range", entry.name))
                    })?;
                    *slot = Some(entry.name);
                }
            }
            SectionId::Start => {
                self.start = Some(at(base, sections::read_start_section(cur))?);
            }
            SectionId::DataCount => {
                let count = at(base, sections::read_data_count_section(cur))?;
                debug!(target: "stackwasm::decode", count, "data count");
            }
            SectionId::Code => {
                let entries = at(base, sections::read_code_section(cur))?;
                if entries.len() != progress.declared {
                    return Err(Error::malformed(base, "function and code section counts differ"));
                }
                progress.bodies = entries.len();
                for (i, entry) in entries.into_iter().enumerate() {
                    let function = self
                        .functions
                        .get_mut(progress.first_local + i)
                        .ok_or_else(|| Error::malformed(base, "code body without a declared function"))?;
                    function.attach(entry.locals, entry.body.to_vec());
                }
            }
            SectionId::Data => {
                for entry in at(base, sections::read_data_section(cur))? {
                    match entry.mode {
                        DataMode::Passive => self.store.data.push(entry.bytes.to_vec()),
                        DataMode::Active { memory, offset } => {
                            let offset = match self.const_value(offset, base)? {
                                Value::I32(v) => v as u32 as usize,
                                other => {
                                    return Err(Error::malformed(
                                        base,
                                        format!("data offset must be i32, found {other}"),
                                    ))
                                }
                            };
                            self.store
                                .memory_mut(memory)
                                .map_err(|_| Error::malformed(base, format!("data segment targets missing memory {memory}")))?
                                .write_data(offset, entry.bytes)?;
                            // Active segments count as dropped once written.
                            self.store.data.push(Vec::new());
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Push `args`, run function `index` with its frame at the arguments, and
    /// leave its results on the stack. A trap restores the stack height.
    fn invoke_index(&mut self, index: u32, args: &[Value]) -> Result<(), Trap> {
        let function = self
            .functions
            .get(index as usize)
            .ok_or(Trap::UnknownFunction { index })?;
        let params = &function.signature.params;
        if params.len() != args.len() {
            return Err(Trap::ArgumentCount {
                expected: params.len(),
                found: args.len(),
            });
        }
        for (arg, ty) in args.iter().zip(params) {
            if arg.ty() != *ty {
                return Err(Trap::TypeMismatch {
                    expected: *ty,
                    found: arg.ty(),
                });
            }
        }

        let frame_offset = self.store.stack.len();
        self.store.stack.extend(args.iter().copied());
        let env = Env {
            functions: &self.functions,
            types: &self.types,
        };
        let outcome = function.invoke(index, env, &mut self.store, frame_offset);
        if outcome.is_err() {
            self.store.stack.truncate(frame_offset);
        }
        outcome
    }

    fn lookup(&self, name: &str) -> Result<u32, Error> {
        self.functions
            .iter()
            .position(|f| f.name.as_deref() == Some(name))
            .map(|i| i as u32)
            .ok_or_else(|| Error::LookupFailure {
                name: name.to_string(),
            })
    }

    /// Run the exported function `name`; its results stay on the stack for
    /// `read_results`.
    pub fn invoke(&mut self, name: &str, args: &[Value]) -> Result<(), Error> {
        let index = self.lookup(name)?;
        self.invoke_index(index, args)?;
        Ok(())
    }

    /// Run the exported function `name` and pop its results.
    pub fn call(&mut self, name: &str, args: &[Value]) -> Result<Vec<Value>, Error> {
        let index = self.lookup(name)?;
        self.invoke_index(index, args)?;
        let arity = self.functions[index as usize].signature.results.len();
        Ok(self.store.stack.pop_n(arity)?)
    }

    /// Top `n` stack values, bottom first, without popping them.
    pub fn read_results(&self, n: usize) -> Result<&[Value], Error> {
        Ok(self.store.stack.top(n)?)
    }

    /// Jump table of function `index`, built on first request.
    pub fn jump_table(&self, index: u32) -> Result<&JumpTable, Error> {
        let function = self
            .functions
            .get(index as usize)
            .ok_or(Trap::UnknownFunction { index })?;
        let env = Env {
            functions: &self.functions,
            types: &self.types,
        };
        Ok(function.jump_table(index, env, &self.store)?)
    }

    pub fn functions(&self) -> &[Function] {
        &self.functions
    }

    pub fn types(&self) -> &[FuncType] {
        &self.types
    }

    /// Exported functions as (name, signature), in index order.
    pub fn exports(&self) -> impl Iterator<Item = (&str, &FuncType)> {
        self.functions
            .iter()
            .filter_map(|f| f.name.as_deref().map(|name| (name, &f.signature)))
    }

    pub fn memory(&self, name: &str) -> Option<&Memory> {
        self.store
            .memories
            .iter()
            .find(|m| m.name.as_deref() == Some(name))
    }

    pub fn memory_mut(&mut self, name: &str) -> Option<&mut Memory> {
        self.store
            .memories
            .iter_mut()
            .find(|m| m.name.as_deref() == Some(name))
    }

    pub fn global(&self, name: &str) -> Option<Value> {
        self.store
            .globals
            .iter()
            .find(|g| g.name.as_deref() == Some(name))
            .map(GlobalSlot::get)
    }

    pub fn stack_len(&self) -> usize {
        self.store.stack.len()
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn options(&self) -> &ExecutionOptions {
        &self.store.options
    }
}
