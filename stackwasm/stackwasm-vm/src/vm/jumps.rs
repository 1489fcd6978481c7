//! Jump tables: structural targets of every `if`, `block` and `loop` in a body,
//! computed once by a dry run over a disposable copy of the module state.

use std::collections::HashMap;

use tracing::trace;

use crate::binary::{leb128, reader::read_vec, Cursor};
use crate::error::Trap;
use crate::model::Value;
use crate::runtime::Store;
use crate::vm::frames::{BlockKind, Frame};
use crate::vm::function::{Env, Function};
use crate::vm::instructions::{read_block_type, Opcode as Op};
use crate::vm::interpreter::dispatch;

/// All offsets are byte offsets of opcodes within the function body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JumpTable {
    /// `if` offset -> (`else` offset, or `end` offset when there is no `else`; `end` offset).
    pub ifs: HashMap<usize, (usize, usize)>,
    /// `block` offset -> `end` offset.
    pub blocks: HashMap<usize, usize>,
    /// Loop `end` offset -> `loop` offset, for backward branches.
    pub loops: HashMap<usize, usize>,
    /// `loop` offset -> `end` offset.
    pub loop_ends: HashMap<usize, usize>,
}

#[derive(Debug)]
struct Open {
    kind: BlockKind,
    at: usize,
    else_at: Option<usize>,
}

impl JumpTable {
    pub fn if_targets(&self, at: usize) -> Result<(usize, usize), Trap> {
        self.ifs.get(&at).copied().ok_or(Trap::UnbalancedBlock { offset: at })
    }

    pub fn block_end(&self, at: usize) -> Result<usize, Trap> {
        self.blocks.get(&at).copied().ok_or(Trap::UnbalancedBlock { offset: at })
    }

    pub fn loop_end(&self, at: usize) -> Result<usize, Trap> {
        self.loop_ends.get(&at).copied().ok_or(Trap::UnbalancedBlock { offset: at })
    }

    /// Loop start for the `end` at `end`.
    pub fn loop_start(&self, end: usize) -> Option<usize> {
        self.loops.get(&end).copied()
    }

    /// Dry-run `code` against a shadow copy of `live`. Structured control is
    /// recorded instead of executed; everything else goes through `dispatch`
    /// so the shadow stack stays well-typed. Traps caused by the meaningless
    /// shadow values are ignored; malformed code is not.
    pub(crate) fn build(
        function: &Function,
        index: u32,
        code: &[u8],
        env: Env<'_>,
        live: &Store,
    ) -> Result<Self, Trap> {
        let mut shadow = live.shadow_copy();
        let frame = Frame::new(
            shadow.stack.len(),
            function.signature.params.len() + function.locals.len(),
        );
        shadow.stack.extend(
            function
                .signature
                .params
                .iter()
                .chain(&function.locals)
                .map(|ty| Value::default_for(*ty)),
        );

        let mut table = JumpTable::default();
        let mut open: Vec<Open> = Vec::new();
        let mut cur = Cursor::new(code);

        loop {
            let at = cur.offset();
            let byte = cur
                .read_u8()
                .map_err(|_| Trap::UnbalancedBlock { offset: at })?;
            let op = Op::from_byte(byte).ok_or(Trap::FunctionFault { opcode: byte as u32 })?;

            match op {
                Op::Block | Op::Loop | Op::If => {
                    read_block_type(&mut cur)?;
                    let kind = match op {
                        Op::Block => BlockKind::Block,
                        Op::Loop => BlockKind::Loop,
                        _ => {
                            let _ = shadow.stack.pop_i32();
                            BlockKind::If
                        }
                    };
                    open.push(Open {
                        kind,
                        at,
                        else_at: None,
                    });
                }
                Op::Else => match open.last_mut() {
                    Some(o) if o.kind == BlockKind::If && o.else_at.is_none() => o.else_at = Some(at),
                    _ => return Err(Trap::UnbalancedBlock { offset: at }),
                },
                Op::End => match open.pop() {
                    Some(o) => match o.kind {
                        BlockKind::If => {
                            table.ifs.insert(o.at, (o.else_at.unwrap_or(at), at));
                        }
                        BlockKind::Block => {
                            table.blocks.insert(o.at, at);
                        }
                        BlockKind::Loop => {
                            table.loops.insert(at, o.at);
                            table.loop_ends.insert(o.at, at);
                        }
                    },
                    // Function-level `end` must close the body.
                    None if cur.is_eof() => break,
                    None => return Err(Trap::UnbalancedBlock { offset: at }),
                },
                Op::Br => {
                    leb128::read_uleb_u32(&mut cur)?;
                }
                Op::BrIf => {
                    leb128::read_uleb_u32(&mut cur)?;
                    let _ = shadow.stack.pop_i32();
                }
                Op::BrTable => {
                    read_vec(&mut cur, leb128::read_uleb_u32)?;
                    leb128::read_uleb_u32(&mut cur)?;
                    let _ = shadow.stack.pop_i32();
                }
                Op::Return => {}
                Op::Call => {
                    let callee = leb128::read_uleb_u32(&mut cur)?;
                    if let Some(f) = env.functions.get(callee as usize) {
                        for _ in &f.signature.params {
                            let _ = shadow.stack.pop();
                        }
                        shadow
                            .stack
                            .extend(f.signature.results.iter().map(|ty| Value::default_for(*ty)));
                    }
                }
                _ => match dispatch(op, &mut cur, frame, &mut shadow) {
                    Ok(()) => {}
                    Err(trap) if trap.is_structural() => return Err(trap),
                    Err(_) => {}
                },
            }
        }

        trace!(
            target: "stackwasm::jumps",
            function = index,
            ifs = table.ifs.len(),
            blocks = table.blocks.len(),
            loops = table.loops.len(),
            "jump table built"
        );
        Ok(table)
    }
}
