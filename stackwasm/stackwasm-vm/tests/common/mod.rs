//! Byte-level module builder for tests that need exact control over bodies.
#![allow(dead_code)]

use stackwasm_vm::{ByteStream, ValType};

pub struct Func {
    pub params: Vec<ValType>,
    pub results: Vec<ValType>,
    pub locals: Vec<ValType>,
    /// Instruction bytes including the final `end`.
    pub body: Vec<u8>,
    pub export: Option<&'static str>,
}

impl Func {
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            params: Vec::new(),
            results: Vec::new(),
            locals: Vec::new(),
            body: body.into(),
            export: None,
        }
    }

    pub fn params(mut self, params: impl Into<Vec<ValType>>) -> Self {
        self.params = params.into();
        self
    }

    pub fn results(mut self, results: impl Into<Vec<ValType>>) -> Self {
        self.results = results.into();
        self
    }

    pub fn locals(mut self, locals: impl Into<Vec<ValType>>) -> Self {
        self.locals = locals.into();
        self
    }

    pub fn export(mut self, name: &'static str) -> Self {
        self.export = Some(name);
        self
    }
}

/// One type entry per function, then function/export/code sections.
#[derive(Default)]
pub struct ModuleBuilder {
    funcs: Vec<Func>,
    memory_pages: Option<u32>,
}

impl ModuleBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn func(mut self, func: Func) -> Self {
        self.funcs.push(func);
        self
    }

    pub fn memory(mut self, pages: u32) -> Self {
        self.memory_pages = Some(pages);
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = ByteStream::new();
        out.write_bytes(&[0x00, 0x61, 0x73, 0x6D, 0x01, 0x00, 0x00, 0x00]);

        section(&mut out, 1, |s| {
            counted(s, self.funcs.len(), |s| {
                for f in &self.funcs {
                    s.write_byte(0x60);
                    val_types(s, &f.params);
                    val_types(s, &f.results);
                }
            })
        });
        section(&mut out, 3, |s| {
            counted(s, self.funcs.len(), |s| {
                for i in 0..self.funcs.len() {
                    s.write_u32(i as u32);
                }
            })
        });
        if let Some(pages) = self.memory_pages {
            section(&mut out, 5, |s| {
                s.write_u32(1);
                s.write_byte(0x00);
                s.write_u32(pages);
            });
        }
        let exported: Vec<_> = self
            .funcs
            .iter()
            .enumerate()
            .filter_map(|(i, f)| f.export.map(|name| (i, name)))
            .collect();
        section(&mut out, 7, |s| {
            counted(s, exported.len(), |s| {
                for (i, name) in &exported {
                    s.write_name(name);
                    s.write_byte(0x00);
                    s.write_u32(*i as u32);
                }
            })
        });
        section(&mut out, 10, |s| {
            counted(s, self.funcs.len(), |s| {
                for f in &self.funcs {
                    let mut body = ByteStream::new();
                    body.write_u32(f.locals.len() as u32);
                    for ty in &f.locals {
                        body.write_u32(1);
                        body.write_byte(ty.to_byte());
                    }
                    body.write_bytes(&f.body);
                    s.write_u32(body.len() as u32);
                    s.write_bytes(body.as_bytes());
                }
            })
        });
        out.into_bytes()
    }
}

fn section(out: &mut ByteStream, id: u8, fill: impl FnOnce(&mut ByteStream)) {
    let mut payload = ByteStream::new();
    fill(&mut payload);
    out.write_byte(id);
    out.write_u32(payload.len() as u32);
    out.write_bytes(payload.as_bytes());
}

/// Vector with a single-byte count patched in after the elements are written.
fn counted(s: &mut ByteStream, count: usize, fill: impl FnOnce(&mut ByteStream)) {
    assert!(count < 0x80, "count must fit one LEB128 byte");
    let slot = s.reserve_byte();
    fill(s);
    s.fix_up_byte(slot, count as u8).expect("reserved slot exists");
}

fn val_types(s: &mut ByteStream, tys: &[ValType]) {
    s.write_u32(tys.len() as u32);
    for ty in tys {
        s.write_byte(ty.to_byte());
    }
}
