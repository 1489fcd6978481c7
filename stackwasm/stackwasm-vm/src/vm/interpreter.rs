//! Interpreter core: structured control flow over precomputed jump tables and
//! the shared dispatch for every other opcode.
//!
//! `dispatch` is also what the jump-table pass runs against its shadow store,
//! so every arm reads all of its immediates before the first fallible pop.

use tracing::warn;

use crate::binary::{leb128, reader::read_vec, BinaryReadError, Cursor};
use crate::error::Trap;
use crate::model::{BlockType, ValType, Value};
use crate::runtime::Store;
use crate::vm::frames::{BlockKind, Frame, Label};
use crate::vm::function::Env;
use crate::vm::instructions::{block_arity, read_block_type, read_memarg, BulkOp, Opcode as Op};
use crate::vm::jumps::JumpTable;
use crate::vm::stack::OperandStack;

/// What the activation loop does after one instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    Call(u32),
    Return,
}

/// One running function body.
pub(crate) struct Activation<'f> {
    pub index: u32,
    pub cur: Cursor<'f>,
    pub jumps: &'f JumpTable,
    pub frame: Frame,
    pub labels: Vec<Label>,
    /// Arguments as received; compared by the recursion guard.
    pub entry_args: Vec<Value>,
    pub entry_effects: u64,
}

/// Run an activation until its body returns.
pub(crate) fn execute(act: &mut Activation<'_>, env: Env<'_>, store: &mut Store) -> Result<(), Trap> {
    loop {
        match step(act, env, store)? {
            Flow::Continue => {}
            Flow::Return => return Ok(()),
            Flow::Call(callee) => call(act, callee, env, store)?,
        }
    }
}

fn call(act: &Activation<'_>, callee: u32, env: Env<'_>, store: &mut Store) -> Result<(), Trap> {
    let function = env.function(callee)?;
    let params = function.signature.params.len();

    if callee == act.index
        && store.options.recursion_guard
        && store.effects == act.entry_effects
        && store.stack.top(params)? == act.entry_args.as_slice()
    {
        warn!(
            target: "stackwasm::guard",
            function = callee,
            "self-call repeats its arguments with no intervening effect; skipping"
        );
        store.stack.pop_n(params)?;
        store
            .stack
            .extend(function.signature.results.iter().map(|ty| Value::default_for(*ty)));
        return Ok(());
    }

    let frame_offset = store
        .stack
        .len()
        .checked_sub(params)
        .ok_or(Trap::StackUnderflow)?;
    function.invoke(callee, env, store, frame_offset)
}

fn step(act: &mut Activation<'_>, env: Env<'_>, store: &mut Store) -> Result<Flow, Trap> {
    let at = act.cur.offset();
    let byte = act.cur.read_u8()?;
    let op = Op::from_byte(byte).ok_or(Trap::FunctionFault { opcode: byte as u32 })?;

    match op {
        Op::Block | Op::Loop => {
            let bt = read_block_type(&mut act.cur)?;
            let (params, results) = block_signature(bt, env, at)?;
            let height = store.stack.len().checked_sub(params).ok_or(Trap::StackUnderflow)?;
            let label = if op == Op::Loop {
                let end = act.jumps.loop_end(at)?;
                let snapshot = if store.options.loop_guard {
                    store
                        .stack
                        .as_slice()
                        .get(act.frame.offset..)
                        .map(<[Value]>::to_vec)
                        .unwrap_or_default()
                } else {
                    Vec::new()
                };
                Label {
                    kind: BlockKind::Loop,
                    start: at,
                    end,
                    height,
                    arity: params,
                    results,
                    snapshot,
                    effects: store.effects,
                }
            } else {
                Label {
                    kind: BlockKind::Block,
                    start: at,
                    end: act.jumps.block_end(at)?,
                    height,
                    arity: results.len(),
                    results,
                    snapshot: Vec::new(),
                    effects: store.effects,
                }
            };
            act.labels.push(label);
        }
        Op::If => {
            let bt = read_block_type(&mut act.cur)?;
            let (params, results) = block_signature(bt, env, at)?;
            let cond = store.stack.pop_i32()?;
            let (else_or_end, end) = act.jumps.if_targets(at)?;
            let height = store.stack.len().checked_sub(params).ok_or(Trap::StackUnderflow)?;
            act.labels.push(Label {
                kind: BlockKind::If,
                start: at,
                end,
                height,
                arity: results.len(),
                results,
                snapshot: Vec::new(),
                effects: store.effects,
            });
            if cond == 0 {
                if else_or_end == end {
                    act.cur.set_offset(end)?;
                } else {
                    act.cur.set_offset(else_or_end + 1)?;
                }
            }
        }
        Op::Else => {
            // Reached only by falling out of the then-arm.
            let label = act
                .labels
                .last()
                .filter(|label| label.kind == BlockKind::If)
                .ok_or(Trap::UnbalancedBlock { offset: at })?;
            act.cur.set_offset(label.end)?;
        }
        Op::End => match act.labels.pop() {
            None => return Ok(Flow::Return),
            Some(label) => settle(&mut store.stack, label.height, label.results.len())?,
        },
        Op::Br => {
            let depth = leb128::read_uleb_u32(&mut act.cur)?;
            return branch(act, store, depth, false);
        }
        Op::BrIf => {
            let depth = leb128::read_uleb_u32(&mut act.cur)?;
            if store.stack.pop_i32()? != 0 {
                return branch(act, store, depth, true);
            }
        }
        Op::BrTable => {
            let targets = read_vec(&mut act.cur, leb128::read_uleb_u32)?;
            let default = leb128::read_uleb_u32(&mut act.cur)?;
            let index = store.stack.pop_i32()? as u32 as usize;
            let depth = targets.get(index).copied().unwrap_or(default);
            return branch(act, store, depth, false);
        }
        Op::Return => return Ok(Flow::Return),
        Op::Call => {
            let callee = leb128::read_uleb_u32(&mut act.cur)?;
            return Ok(Flow::Call(callee));
        }
        _ => dispatch(op, &mut act.cur, act.frame, store)?,
    }
    Ok(Flow::Continue)
}

fn block_signature(bt: BlockType, env: Env<'_>, at: usize) -> Result<(usize, Vec<ValType>), Trap> {
    block_arity(bt, env.types).map_err(|_| {
        Trap::Binary(BinaryReadError::Malformed {
            offset: at,
            msg: "block type index out of range",
        })
    })
}

/// Leave exactly the top `arity` values above `height`.
pub(crate) fn settle(stack: &mut OperandStack, height: usize, arity: usize) -> Result<(), Trap> {
    let kept_from = stack
        .len()
        .checked_sub(arity)
        .filter(|&from| from >= height)
        .ok_or(Trap::StackUnderflow)?;
    stack.remove_range(height..kept_from)
}

/// True when branching back to `label` would re-enter the loop exactly as it was entered.
fn reenters_unchanged(label: &Label, frame: Frame, stack: &OperandStack) -> bool {
    let Some(base) = stack.as_slice().get(frame.offset..label.height) else {
        return false;
    };
    let Ok(carried) = stack.top(label.arity) else {
        return false;
    };
    label.snapshot.len() == base.len() + carried.len()
        && label.snapshot[..base.len()] == *base
        && label.snapshot[base.len()..] == *carried
}

fn branch(act: &mut Activation<'_>, store: &mut Store, depth: u32, conditional: bool) -> Result<Flow, Trap> {
    let labels = act.labels.len();
    if depth as usize == labels {
        return Ok(Flow::Return);
    }
    let target = labels
        .checked_sub(depth as usize + 1)
        .ok_or(Trap::BranchDepth { depth })?;
    let label = &act.labels[target];

    if label.kind == BlockKind::Loop
        && store.options.loop_guard
        && label.effects == store.effects
        && reenters_unchanged(label, act.frame, &store.stack)
    {
        warn!(
            target: "stackwasm::guard",
            function = act.index,
            offset = label.start,
            "loop would repeat with unchanged state; leaving it"
        );
        if conditional {
            return Ok(Flow::Continue);
        }
        let (end, height) = (label.end, label.height);
        let zeroed: Vec<Value> = label.results.iter().map(|ty| Value::default_for(*ty)).collect();
        store.stack.truncate(height);
        store.stack.extend(zeroed);
        act.labels.truncate(target);
        act.cur.set_offset(end + 1)?;
        return Ok(Flow::Continue);
    }

    let (kind, end, height, arity) = (label.kind, label.end, label.height, label.arity);
    settle(&mut store.stack, height, arity)?;
    act.labels.truncate(target);
    let resume = match kind {
        BlockKind::Loop => act
            .jumps
            .loop_start(end)
            .ok_or(Trap::UnbalancedBlock { offset: end })?,
        BlockKind::Block | BlockKind::If => end + 1,
    };
    act.cur.set_offset(resume)?;
    Ok(Flow::Continue)
}

/* ===== Non-structural dispatch ===== */

fn i32_bool(b: bool) -> Value {
    Value::I32(b as i32)
}

fn binop_i32<F>(stack: &mut OperandStack, f: F) -> Result<(), Trap>
where
    F: Fn(i32, i32) -> Result<i32, Trap>,
{
    let rhs = stack.pop_i32()?;
    let lhs = stack.pop_i32()?;
    stack.push(f(lhs, rhs)?);
    Ok(())
}

fn binop_i64<F>(stack: &mut OperandStack, f: F) -> Result<(), Trap>
where
    F: Fn(i64, i64) -> Result<i64, Trap>,
{
    let rhs = stack.pop_i64()?;
    let lhs = stack.pop_i64()?;
    stack.push(f(lhs, rhs)?);
    Ok(())
}

fn binop_f32<F>(stack: &mut OperandStack, f: F) -> Result<(), Trap>
where
    F: Fn(f32, f32) -> f32,
{
    let rhs = stack.pop_f32()?;
    let lhs = stack.pop_f32()?;
    stack.push(f(lhs, rhs));
    Ok(())
}

fn binop_f64<F>(stack: &mut OperandStack, f: F) -> Result<(), Trap>
where
    F: Fn(f64, f64) -> f64,
{
    let rhs = stack.pop_f64()?;
    let lhs = stack.pop_f64()?;
    stack.push(f(lhs, rhs));
    Ok(())
}

fn cmpop_i32<F>(stack: &mut OperandStack, f: F) -> Result<(), Trap>
where
    F: Fn(i32, i32) -> bool,
{
    let rhs = stack.pop_i32()?;
    let lhs = stack.pop_i32()?;
    stack.push(i32_bool(f(lhs, rhs)));
    Ok(())
}

fn cmpop_i64<F>(stack: &mut OperandStack, f: F) -> Result<(), Trap>
where
    F: Fn(i64, i64) -> bool,
{
    let rhs = stack.pop_i64()?;
    let lhs = stack.pop_i64()?;
    stack.push(i32_bool(f(lhs, rhs)));
    Ok(())
}

fn cmpop_f32<F>(stack: &mut OperandStack, f: F) -> Result<(), Trap>
where
    F: Fn(f32, f32) -> bool,
{
    let rhs = stack.pop_f32()?;
    let lhs = stack.pop_f32()?;
    stack.push(i32_bool(f(lhs, rhs)));
    Ok(())
}

fn cmpop_f64<F>(stack: &mut OperandStack, f: F) -> Result<(), Trap>
where
    F: Fn(f64, f64) -> bool,
{
    let rhs = stack.pop_f64()?;
    let lhs = stack.pop_f64()?;
    stack.push(i32_bool(f(lhs, rhs)));
    Ok(())
}

fn unop_i32(stack: &mut OperandStack, f: impl Fn(i32) -> i32) -> Result<(), Trap> {
    let v = stack.pop_i32()?;
    stack.push(f(v));
    Ok(())
}

fn unop_i64(stack: &mut OperandStack, f: impl Fn(i64) -> i64) -> Result<(), Trap> {
    let v = stack.pop_i64()?;
    stack.push(f(v));
    Ok(())
}

fn unop_f32(stack: &mut OperandStack, f: impl Fn(f32) -> f32) -> Result<(), Trap> {
    let v = stack.pop_f32()?;
    stack.push(f(v));
    Ok(())
}

fn unop_f64(stack: &mut OperandStack, f: impl Fn(f64) -> f64) -> Result<(), Trap> {
    let v = stack.pop_f64()?;
    stack.push(f(v));
    Ok(())
}

fn div_s32(a: i32, b: i32) -> Result<i32, Trap> {
    match (a, b) {
        (_, 0) => Err(Trap::DivideByZero),
        (i32::MIN, -1) => Err(Trap::IntegerOverflow),
        _ => Ok(a / b),
    }
}

fn div_s64(a: i64, b: i64) -> Result<i64, Trap> {
    match (a, b) {
        (_, 0) => Err(Trap::DivideByZero),
        (i64::MIN, -1) => Err(Trap::IntegerOverflow),
        _ => Ok(a / b),
    }
}

fn nonzero<T: PartialEq + Default>(b: T) -> Result<T, Trap> {
    if b == T::default() {
        Err(Trap::DivideByZero)
    } else {
        Ok(b)
    }
}

fn min_f32(a: f32, b: f32) -> f32 {
    if a.is_nan() || b.is_nan() {
        f32::NAN
    } else if a == b {
        if a.is_sign_negative() { a } else { b }
    } else {
        a.min(b)
    }
}

fn max_f32(a: f32, b: f32) -> f32 {
    if a.is_nan() || b.is_nan() {
        f32::NAN
    } else if a == b {
        if a.is_sign_positive() { a } else { b }
    } else {
        a.max(b)
    }
}

fn min_f64(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() {
        f64::NAN
    } else if a == b {
        if a.is_sign_negative() { a } else { b }
    } else {
        a.min(b)
    }
}

fn max_f64(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() {
        f64::NAN
    } else if a == b {
        if a.is_sign_positive() { a } else { b }
    } else {
        a.max(b)
    }
}

/// Checked float-to-int truncation; f32 sources widen to f64 exactly.
fn trunc_checked(x: f64, lower_exclusive: f64, upper_exclusive: f64) -> Result<f64, Trap> {
    if x.is_nan() {
        return Err(Trap::InvalidConversion);
    }
    let t = x.trunc();
    if t <= lower_exclusive || t >= upper_exclusive {
        return Err(Trap::IntegerOverflow);
    }
    Ok(t)
}

fn trunc_i32(x: f64) -> Result<i32, Trap> {
    trunc_checked(x, -2_147_483_649.0, 2_147_483_648.0).map(|t| t as i32)
}

fn trunc_u32(x: f64) -> Result<i32, Trap> {
    trunc_checked(x, -1.0, 4_294_967_296.0).map(|t| t as u32 as i32)
}

fn trunc_i64(x: f64) -> Result<i64, Trap> {
    // -2^63 - 1 is not representable, so the lower bound is inclusive here.
    let t = trunc_checked(x, f64::NEG_INFINITY, 9_223_372_036_854_775_808.0)?;
    if t < -9_223_372_036_854_775_808.0 {
        return Err(Trap::IntegerOverflow);
    }
    Ok(t as i64)
}

fn trunc_u64(x: f64) -> Result<i64, Trap> {
    trunc_checked(x, -1.0, 18_446_744_073_709_551_616.0).map(|t| t as u64 as i64)
}

fn effective_address(base: i32, offset: u32) -> Result<usize, Trap> {
    let addr = base as u32 as u64 + offset as u64;
    usize::try_from(addr).map_err(|_| Trap::OutOfBounds {
        what: "memory",
        index: addr,
    })
}

fn load<const N: usize>(cur: &mut Cursor<'_>, store: &mut Store) -> Result<[u8; N], Trap> {
    let arg = read_memarg(cur)?;
    let base = store.stack.pop_i32()?;
    let addr = effective_address(base, arg.offset)?;
    store.memory(0)?.load::<N>(addr)
}

fn store_bytes<const N: usize, F>(cur: &mut Cursor<'_>, store: &mut Store, pop: F) -> Result<(), Trap>
where
    F: FnOnce(&mut OperandStack) -> Result<[u8; N], Trap>,
{
    let arg = read_memarg(cur)?;
    let bytes = pop(&mut store.stack)?;
    let base = store.stack.pop_i32()?;
    let addr = effective_address(base, arg.offset)?;
    if store.shadow {
        return Ok(());
    }
    store.memory_mut(0)?.store(addr, &bytes)?;
    store.effects += 1;
    Ok(())
}

fn pop_len(stack: &mut OperandStack) -> Result<usize, Trap> {
    Ok(stack.pop_i32()? as u32 as usize)
}

/// Execute one non-structural instruction. Structured control, branches and
/// calls are handled by the caller.
pub(crate) fn dispatch(op: Op, cur: &mut Cursor<'_>, frame: Frame, store: &mut Store) -> Result<(), Trap> {
    match op {
        Op::Unreachable => return Err(Trap::Unreachable),
        Op::Nop => {}

        Op::Drop => {
            store.stack.pop()?;
        }
        Op::Select | Op::SelectTyped => {
            if op == Op::SelectTyped {
                read_vec(cur, |c| c.read_u8())?;
            }
            let cond = store.stack.pop_i32()?;
            let b = store.stack.pop()?;
            let a = store.stack.pop()?;
            store.stack.push(if cond != 0 { a } else { b });
        }

        Op::LocalGet => {
            let index = leb128::read_uleb_u32(cur)?;
            let slot = frame.slot(index).ok_or(Trap::UnknownLocal { index })?;
            let v = store.stack.get(slot)?;
            store.stack.push(v);
        }
        Op::LocalSet | Op::LocalTee => {
            let index = leb128::read_uleb_u32(cur)?;
            let slot = frame.slot(index).ok_or(Trap::UnknownLocal { index })?;
            let v = store.stack.pop()?;
            let declared = store.stack.get(slot)?.ty();
            if declared != v.ty() {
                return Err(Trap::TypeMismatch {
                    expected: declared,
                    found: v.ty(),
                });
            }
            store.stack.set(slot, v)?;
            if op == Op::LocalTee {
                store.stack.push(v);
            }
        }
        Op::GlobalGet => {
            let index = leb128::read_uleb_u32(cur)?;
            let v = store.global(index)?;
            store.stack.push(v);
        }
        Op::GlobalSet => {
            let index = leb128::read_uleb_u32(cur)?;
            let v = store.stack.pop()?;
            store.set_global(index, v)?;
        }

        // loads
        Op::I32Load => {
            let b = load::<4>(cur, store)?;
            store.stack.push(i32::from_le_bytes(b));
        }
        Op::I64Load => {
            let b = load::<8>(cur, store)?;
            store.stack.push(i64::from_le_bytes(b));
        }
        Op::F32Load => {
            let b = load::<4>(cur, store)?;
            store.stack.push(Value::F32(u32::from_le_bytes(b)));
        }
        Op::F64Load => {
            let b = load::<8>(cur, store)?;
            store.stack.push(Value::F64(u64::from_le_bytes(b)));
        }
        Op::I32Load8S => {
            let [b] = load::<1>(cur, store)?;
            store.stack.push(b as i8 as i32);
        }
        Op::I32Load8U => {
            let [b] = load::<1>(cur, store)?;
            store.stack.push(b as i32);
        }
        Op::I32Load16S => {
            let b = load::<2>(cur, store)?;
            store.stack.push(i16::from_le_bytes(b) as i32);
        }
        Op::I32Load16U => {
            let b = load::<2>(cur, store)?;
            store.stack.push(u16::from_le_bytes(b) as i32);
        }
        Op::I64Load8S => {
            let [b] = load::<1>(cur, store)?;
            store.stack.push(b as i8 as i64);
        }
        Op::I64Load8U => {
            let [b] = load::<1>(cur, store)?;
            store.stack.push(b as i64);
        }
        Op::I64Load16S => {
            let b = load::<2>(cur, store)?;
            store.stack.push(i16::from_le_bytes(b) as i64);
        }
        Op::I64Load16U => {
            let b = load::<2>(cur, store)?;
            store.stack.push(u16::from_le_bytes(b) as i64);
        }
        Op::I64Load32S => {
            let b = load::<4>(cur, store)?;
            store.stack.push(i32::from_le_bytes(b) as i64);
        }
        Op::I64Load32U => {
            let b = load::<4>(cur, store)?;
            store.stack.push(u32::from_le_bytes(b) as i64);
        }

        // stores
        Op::I32Store => store_bytes(cur, store, |s| Ok(s.pop_i32()?.to_le_bytes()))?,
        Op::I64Store => store_bytes(cur, store, |s| Ok(s.pop_i64()?.to_le_bytes()))?,
        Op::F32Store => store_bytes(cur, store, |s| Ok(s.pop_f32()?.to_bits().to_le_bytes()))?,
        Op::F64Store => store_bytes(cur, store, |s| Ok(s.pop_f64()?.to_bits().to_le_bytes()))?,
        Op::I32Store8 => store_bytes(cur, store, |s| Ok([s.pop_i32()? as u8]))?,
        Op::I32Store16 => store_bytes(cur, store, |s| Ok((s.pop_i32()? as u16).to_le_bytes()))?,
        Op::I64Store8 => store_bytes(cur, store, |s| Ok([s.pop_i64()? as u8]))?,
        Op::I64Store16 => store_bytes(cur, store, |s| Ok((s.pop_i64()? as u16).to_le_bytes()))?,
        Op::I64Store32 => store_bytes(cur, store, |s| Ok((s.pop_i64()? as u32).to_le_bytes()))?,

        Op::MemorySize => {
            cur.read_u8()?;
            let pages = store.memory(0)?.size_pages();
            store.stack.push(pages as i32);
        }
        Op::MemoryGrow => {
            cur.read_u8()?;
            let delta = store.stack.pop_i32()? as u32;
            if store.shadow {
                store.stack.push(-1i32);
                return Ok(());
            }
            let grown = store.memory_mut(0)?.grow(delta);
            if grown.is_some() {
                store.effects += 1;
            }
            store.stack.push(grown.map_or(-1, |prev| prev as i32));
        }

        // constants
        Op::I32Const => {
            let v = leb128::read_sleb_i32(cur)?;
            store.stack.push(v);
        }
        Op::I64Const => {
            let v = leb128::read_sleb_i64(cur)?;
            store.stack.push(v);
        }
        Op::F32Const => {
            let bits = cur.read_u32_le()?;
            store.stack.push(Value::F32(bits));
        }
        Op::F64Const => {
            let bits = cur.read_u64_le()?;
            store.stack.push(Value::F64(bits));
        }

        // i32 comparisons
        Op::I32Eqz => {
            let v = store.stack.pop_i32()?;
            store.stack.push(i32_bool(v == 0));
        }
        Op::I32Eq => cmpop_i32(&mut store.stack, |a, b| a == b)?,
        Op::I32Ne => cmpop_i32(&mut store.stack, |a, b| a != b)?,
        Op::I32LtS => cmpop_i32(&mut store.stack, |a, b| a < b)?,
        Op::I32LtU => cmpop_i32(&mut store.stack, |a, b| (a as u32) < (b as u32))?,
        Op::I32GtS => cmpop_i32(&mut store.stack, |a, b| a > b)?,
        Op::I32GtU => cmpop_i32(&mut store.stack, |a, b| (a as u32) > (b as u32))?,
        Op::I32LeS => cmpop_i32(&mut store.stack, |a, b| a <= b)?,
        Op::I32LeU => cmpop_i32(&mut store.stack, |a, b| (a as u32) <= (b as u32))?,
        Op::I32GeS => cmpop_i32(&mut store.stack, |a, b| a >= b)?,
        Op::I32GeU => cmpop_i32(&mut store.stack, |a, b| (a as u32) >= (b as u32))?,

        // i64 comparisons
        Op::I64Eqz => {
            let v = store.stack.pop_i64()?;
            store.stack.push(i32_bool(v == 0));
        }
        Op::I64Eq => cmpop_i64(&mut store.stack, |a, b| a == b)?,
        Op::I64Ne => cmpop_i64(&mut store.stack, |a, b| a != b)?,
        Op::I64LtS => cmpop_i64(&mut store.stack, |a, b| a < b)?,
        Op::I64LtU => cmpop_i64(&mut store.stack, |a, b| (a as u64) < (b as u64))?,
        Op::I64GtS => cmpop_i64(&mut store.stack, |a, b| a > b)?,
        Op::I64GtU => cmpop_i64(&mut store.stack, |a, b| (a as u64) > (b as u64))?,
        Op::I64LeS => cmpop_i64(&mut store.stack, |a, b| a <= b)?,
        Op::I64LeU => cmpop_i64(&mut store.stack, |a, b| (a as u64) <= (b as u64))?,
        Op::I64GeS => cmpop_i64(&mut store.stack, |a, b| a >= b)?,
        Op::I64GeU => cmpop_i64(&mut store.stack, |a, b| (a as u64) >= (b as u64))?,

        // float comparisons
        Op::F32Eq => cmpop_f32(&mut store.stack, |a, b| a == b)?,
        Op::F32Ne => cmpop_f32(&mut store.stack, |a, b| a != b)?,
        Op::F32Lt => cmpop_f32(&mut store.stack, |a, b| a < b)?,
        Op::F32Gt => cmpop_f32(&mut store.stack, |a, b| a > b)?,
        Op::F32Le => cmpop_f32(&mut store.stack, |a, b| a <= b)?,
        Op::F32Ge => cmpop_f32(&mut store.stack, |a, b| a >= b)?,
        Op::F64Eq => cmpop_f64(&mut store.stack, |a, b| a == b)?,
        Op::F64Ne => cmpop_f64(&mut store.stack, |a, b| a != b)?,
        Op::F64Lt => cmpop_f64(&mut store.stack, |a, b| a < b)?,
        Op::F64Gt => cmpop_f64(&mut store.stack, |a, b| a > b)?,
        Op::F64Le => cmpop_f64(&mut store.stack, |a, b| a <= b)?,
        Op::F64Ge => cmpop_f64(&mut store.stack, |a, b| a >= b)?,

        // i32 arithmetic
        Op::I32Clz => unop_i32(&mut store.stack, |v| v.leading_zeros() as i32)?,
        Op::I32Ctz => unop_i32(&mut store.stack, |v| v.trailing_zeros() as i32)?,
        Op::I32Popcnt => unop_i32(&mut store.stack, |v| v.count_ones() as i32)?,
        Op::I32Add => binop_i32(&mut store.stack, |a, b| Ok(a.wrapping_add(b)))?,
        Op::I32Sub => binop_i32(&mut store.stack, |a, b| Ok(a.wrapping_sub(b)))?,
        Op::I32Mul => binop_i32(&mut store.stack, |a, b| Ok(a.wrapping_mul(b)))?,
        Op::I32DivS => binop_i32(&mut store.stack, div_s32)?,
        Op::I32DivU => binop_i32(&mut store.stack, |a, b| {
            Ok(((a as u32) / nonzero(b as u32)?) as i32)
        })?,
        Op::I32RemS => binop_i32(&mut store.stack, |a, b| Ok(a.wrapping_rem(nonzero(b)?)))?,
        Op::I32RemU => binop_i32(&mut store.stack, |a, b| {
            Ok(((a as u32) % nonzero(b as u32)?) as i32)
        })?,
        Op::I32And => binop_i32(&mut store.stack, |a, b| Ok(a & b))?,
        Op::I32Or => binop_i32(&mut store.stack, |a, b| Ok(a | b))?,
        Op::I32Xor => binop_i32(&mut store.stack, |a, b| Ok(a ^ b))?,
        Op::I32Shl => binop_i32(&mut store.stack, |a, b| Ok(a.wrapping_shl(b as u32)))?,
        Op::I32ShrS => binop_i32(&mut store.stack, |a, b| Ok(a.wrapping_shr(b as u32)))?,
        Op::I32ShrU => binop_i32(&mut store.stack, |a, b| {
            Ok((a as u32).wrapping_shr(b as u32) as i32)
        })?,
        Op::I32Rotl => binop_i32(&mut store.stack, |a, b| Ok(a.rotate_left(b as u32 & 31)))?,
        Op::I32Rotr => binop_i32(&mut store.stack, |a, b| Ok(a.rotate_right(b as u32 & 31)))?,

        // i64 arithmetic
        Op::I64Clz => unop_i64(&mut store.stack, |v| v.leading_zeros() as i64)?,
        Op::I64Ctz => unop_i64(&mut store.stack, |v| v.trailing_zeros() as i64)?,
        Op::I64Popcnt => unop_i64(&mut store.stack, |v| v.count_ones() as i64)?,
        Op::I64Add => binop_i64(&mut store.stack, |a, b| Ok(a.wrapping_add(b)))?,
        Op::I64Sub => binop_i64(&mut store.stack, |a, b| Ok(a.wrapping_sub(b)))?,
        Op::I64Mul => binop_i64(&mut store.stack, |a, b| Ok(a.wrapping_mul(b)))?,
        Op::I64DivS => binop_i64(&mut store.stack, div_s64)?,
        Op::I64DivU => binop_i64(&mut store.stack, |a, b| {
            Ok(((a as u64) / nonzero(b as u64)?) as i64)
        })?,
        Op::I64RemS => binop_i64(&mut store.stack, |a, b| Ok(a.wrapping_rem(nonzero(b)?)))?,
        Op::I64RemU => binop_i64(&mut store.stack, |a, b| {
            Ok(((a as u64) % nonzero(b as u64)?) as i64)
        })?,
        Op::I64And => binop_i64(&mut store.stack, |a, b| Ok(a & b))?,
        Op::I64Or => binop_i64(&mut store.stack, |a, b| Ok(a | b))?,
        Op::I64Xor => binop_i64(&mut store.stack, |a, b| Ok(a ^ b))?,
        Op::I64Shl => binop_i64(&mut store.stack, |a, b| Ok(a.wrapping_shl(b as u32)))?,
        Op::I64ShrS => binop_i64(&mut store.stack, |a, b| Ok(a.wrapping_shr(b as u32)))?,
        Op::I64ShrU => binop_i64(&mut store.stack, |a, b| {
            Ok((a as u64).wrapping_shr(b as u32) as i64)
        })?,
        Op::I64Rotl => binop_i64(&mut store.stack, |a, b| Ok(a.rotate_left((b & 63) as u32)))?,
        Op::I64Rotr => binop_i64(&mut store.stack, |a, b| Ok(a.rotate_right((b & 63) as u32)))?,

        // f32 arithmetic
        Op::F32Abs => unop_f32(&mut store.stack, f32::abs)?,
        Op::F32Neg => unop_f32(&mut store.stack, |v| -v)?,
        Op::F32Ceil => unop_f32(&mut store.stack, f32::ceil)?,
        Op::F32Floor => unop_f32(&mut store.stack, f32::floor)?,
        Op::F32Trunc => unop_f32(&mut store.stack, f32::trunc)?,
        Op::F32Nearest => unop_f32(&mut store.stack, f32::round_ties_even)?,
        Op::F32Sqrt => unop_f32(&mut store.stack, f32::sqrt)?,
        Op::F32Add => binop_f32(&mut store.stack, |a, b| a + b)?,
        Op::F32Sub => binop_f32(&mut store.stack, |a, b| a - b)?,
        Op::F32Mul => binop_f32(&mut store.stack, |a, b| a * b)?,
        Op::F32Div => binop_f32(&mut store.stack, |a, b| a / b)?,
        Op::F32Min => binop_f32(&mut store.stack, min_f32)?,
        Op::F32Max => binop_f32(&mut store.stack, max_f32)?,
        Op::F32Copysign => binop_f32(&mut store.stack, f32::copysign)?,

        // f64 arithmetic
        Op::F64Abs => unop_f64(&mut store.stack, f64::abs)?,
        Op::F64Neg => unop_f64(&mut store.stack, |v| -v)?,
        Op::F64Ceil => unop_f64(&mut store.stack, f64::ceil)?,
        Op::F64Floor => unop_f64(&mut store.stack, f64::floor)?,
        Op::F64Trunc => unop_f64(&mut store.stack, f64::trunc)?,
        Op::F64Nearest => unop_f64(&mut store.stack, f64::round_ties_even)?,
        Op::F64Sqrt => unop_f64(&mut store.stack, f64::sqrt)?,
        Op::F64Add => binop_f64(&mut store.stack, |a, b| a + b)?,
        Op::F64Sub => binop_f64(&mut store.stack, |a, b| a - b)?,
        Op::F64Mul => binop_f64(&mut store.stack, |a, b| a * b)?,
        Op::F64Div => binop_f64(&mut store.stack, |a, b| a / b)?,
        Op::F64Min => binop_f64(&mut store.stack, min_f64)?,
        Op::F64Max => binop_f64(&mut store.stack, max_f64)?,
        Op::F64Copysign => binop_f64(&mut store.stack, f64::copysign)?,

        // conversions
        Op::I32WrapI64 => {
            let v = store.stack.pop_i64()?;
            store.stack.push(v as i32);
        }
        Op::I32TruncF32S => {
            let v = store.stack.pop_f32()?;
            store.stack.push(trunc_i32(v as f64)?);
        }
        Op::I32TruncF32U => {
            let v = store.stack.pop_f32()?;
            store.stack.push(trunc_u32(v as f64)?);
        }
        Op::I32TruncF64S => {
            let v = store.stack.pop_f64()?;
            store.stack.push(trunc_i32(v)?);
        }
        Op::I32TruncF64U => {
            let v = store.stack.pop_f64()?;
            store.stack.push(trunc_u32(v)?);
        }
        Op::I64ExtendI32S => {
            let v = store.stack.pop_i32()?;
            store.stack.push(v as i64);
        }
        Op::I64ExtendI32U => {
            let v = store.stack.pop_i32()?;
            store.stack.push(v as u32 as i64);
        }
        Op::I64TruncF32S => {
            let v = store.stack.pop_f32()?;
            store.stack.push(trunc_i64(v as f64)?);
        }
        Op::I64TruncF32U => {
            let v = store.stack.pop_f32()?;
            store.stack.push(trunc_u64(v as f64)?);
        }
        Op::I64TruncF64S => {
            let v = store.stack.pop_f64()?;
            store.stack.push(trunc_i64(v)?);
        }
        Op::I64TruncF64U => {
            let v = store.stack.pop_f64()?;
            store.stack.push(trunc_u64(v)?);
        }
        Op::F32ConvertI32S => {
            let v = store.stack.pop_i32()?;
            store.stack.push(v as f32);
        }
        Op::F32ConvertI32U => {
            let v = store.stack.pop_i32()?;
            store.stack.push(v as u32 as f32);
        }
        Op::F32ConvertI64S => {
            let v = store.stack.pop_i64()?;
            store.stack.push(v as f32);
        }
        Op::F32ConvertI64U => {
            let v = store.stack.pop_i64()?;
            store.stack.push(v as u64 as f32);
        }
        Op::F32DemoteF64 => {
            let v = store.stack.pop_f64()?;
            store.stack.push(v as f32);
        }
        Op::F64ConvertI32S => {
            let v = store.stack.pop_i32()?;
            store.stack.push(v as f64);
        }
        Op::F64ConvertI32U => {
            let v = store.stack.pop_i32()?;
            store.stack.push(v as u32 as f64);
        }
        Op::F64ConvertI64S => {
            let v = store.stack.pop_i64()?;
            store.stack.push(v as f64);
        }
        Op::F64ConvertI64U => {
            let v = store.stack.pop_i64()?;
            store.stack.push(v as u64 as f64);
        }
        Op::F64PromoteF32 => {
            let v = store.stack.pop_f32()?;
            store.stack.push(v as f64);
        }
        Op::I32ReinterpretF32 => {
            let v = store.stack.pop_f32()?;
            store.stack.push(v.to_bits() as i32);
        }
        Op::I64ReinterpretF64 => {
            let v = store.stack.pop_f64()?;
            store.stack.push(v.to_bits() as i64);
        }
        Op::F32ReinterpretI32 => {
            let v = store.stack.pop_i32()?;
            store.stack.push(Value::F32(v as u32));
        }
        Op::F64ReinterpretI64 => {
            let v = store.stack.pop_i64()?;
            store.stack.push(Value::F64(v as u64));
        }

        // sign extension
        Op::I32Extend8S => unop_i32(&mut store.stack, |v| v as i8 as i32)?,
        Op::I32Extend16S => unop_i32(&mut store.stack, |v| v as i16 as i32)?,
        Op::I64Extend8S => unop_i64(&mut store.stack, |v| v as i8 as i64)?,
        Op::I64Extend16S => unop_i64(&mut store.stack, |v| v as i16 as i64)?,
        Op::I64Extend32S => unop_i64(&mut store.stack, |v| v as i32 as i64)?,

        Op::Prefix => {
            let sub = leb128::read_uleb_u32(cur)?;
            let bulk = BulkOp::from_u32(sub).ok_or(Trap::FunctionFault {
                opcode: 0xFC00 | sub,
            })?;
            prefixed(bulk, cur, store)?;
        }

        Op::Block
        | Op::Loop
        | Op::If
        | Op::Else
        | Op::End
        | Op::Br
        | Op::BrIf
        | Op::BrTable
        | Op::Return
        | Op::Call => return Err(Trap::FunctionFault { opcode: op as u32 }),
    }
    Ok(())
}

/// 0xFC-prefixed instructions: saturating truncation and bulk memory.
fn prefixed(op: BulkOp, cur: &mut Cursor<'_>, store: &mut Store) -> Result<(), Trap> {
    let stack = &mut store.stack;
    match op {
        BulkOp::I32TruncSatF32S => {
            let v = stack.pop_f32()?;
            stack.push(v as i32);
        }
        BulkOp::I32TruncSatF32U => {
            let v = stack.pop_f32()?;
            stack.push(v as u32 as i32);
        }
        BulkOp::I32TruncSatF64S => {
            let v = stack.pop_f64()?;
            stack.push(v as i32);
        }
        BulkOp::I32TruncSatF64U => {
            let v = stack.pop_f64()?;
            stack.push(v as u32 as i32);
        }
        BulkOp::I64TruncSatF32S => {
            let v = stack.pop_f32()?;
            stack.push(v as i64);
        }
        BulkOp::I64TruncSatF32U => {
            let v = stack.pop_f32()?;
            stack.push(v as u64 as i64);
        }
        BulkOp::I64TruncSatF64S => {
            let v = stack.pop_f64()?;
            stack.push(v as i64);
        }
        BulkOp::I64TruncSatF64U => {
            let v = stack.pop_f64()?;
            stack.push(v as u64 as i64);
        }
        BulkOp::MemoryInit => {
            let segment = leb128::read_uleb_u32(cur)?;
            cur.read_u8()?;
            let len = pop_len(stack)?;
            let src = pop_len(stack)?;
            let dst = pop_len(stack)?;
            if store.shadow {
                return Ok(());
            }
            let bytes = store
                .data
                .get(segment as usize)
                .and_then(|seg| seg.get(src..src.checked_add(len)?))
                .ok_or(Trap::OutOfBounds {
                    what: "data segment",
                    index: segment as u64,
                })?
                .to_vec();
            store.memory_mut(0)?.store(dst, &bytes)?;
            store.effects += 1;
        }
        BulkOp::DataDrop => {
            let segment = leb128::read_uleb_u32(cur)?;
            if store.shadow {
                return Ok(());
            }
            store
                .data
                .get_mut(segment as usize)
                .ok_or(Trap::OutOfBounds {
                    what: "data segment",
                    index: segment as u64,
                })?
                .clear();
        }
        BulkOp::MemoryCopy => {
            cur.read_u8()?;
            cur.read_u8()?;
            let len = pop_len(stack)?;
            let src = pop_len(stack)?;
            let dst = pop_len(stack)?;
            if store.shadow {
                return Ok(());
            }
            store.memory_mut(0)?.copy(dst, src, len)?;
            store.effects += 1;
        }
        BulkOp::MemoryFill => {
            cur.read_u8()?;
            let len = pop_len(stack)?;
            let byte = stack.pop_i32()? as u8;
            let dst = pop_len(stack)?;
            if store.shadow {
                return Ok(());
            }
            store.memory_mut(0)?.fill(dst, byte, len)?;
            store.effects += 1;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Limits;
    use crate::runtime::Memory;

    fn run(code: &[u8], store: &mut Store) -> Result<(), Trap> {
        let mut cur = Cursor::new(code);
        let frame = Frame::new(0, 0);
        while !cur.is_eof() {
            let op = Op::from_byte(cur.read_u8()?).ok_or(Trap::FunctionFault { opcode: 0 })?;
            dispatch(op, &mut cur, frame, store)?;
        }
        Ok(())
    }

    fn with_memory() -> Store {
        let mut store = Store::default();
        store.memories.push(Memory::new(Limits::new(1, None)).unwrap());
        store
    }

    #[test]
    fn i32_arithmetic_pops_rhs_first() {
        let mut store = Store::default();
        // i32.const 10, i32.const 3, i32.sub
        run(&[0x41, 0x0A, 0x41, 0x03, 0x6B], &mut store).unwrap();
        assert_eq!(store.stack.pop(), Ok(Value::I32(7)));
    }

    #[test]
    fn division_traps() {
        let mut store = Store::default();
        assert_eq!(run(&[0x41, 0x01, 0x41, 0x00, 0x6D], &mut store), Err(Trap::DivideByZero));

        let mut store = Store::default();
        let mut code = vec![0x41];
        leb128::write_sleb(&mut code, i32::MIN as i64);
        code.extend([0x41, 0x7F, 0x6D]);
        assert_eq!(run(&code, &mut store), Err(Trap::IntegerOverflow));

        let mut store = Store::default();
        code.pop();
        code.push(0x6F); // i32.rem_s
        run(&code, &mut store).unwrap();
        assert_eq!(store.stack.pop(), Ok(Value::I32(0)));
    }

    #[test]
    fn float_truncation_traps() {
        let mut store = Store::default();
        store.stack.push(f32::NAN);
        assert_eq!(run(&[0xA8], &mut store), Err(Trap::InvalidConversion));

        let mut store = Store::default();
        store.stack.push(3.0e9f64);
        assert_eq!(run(&[0xAA], &mut store), Err(Trap::IntegerOverflow));

        let mut store = Store::default();
        store.stack.push(-0.75f64);
        run(&[0xAB], &mut store).unwrap();
        assert_eq!(store.stack.pop(), Ok(Value::I32(0)));

        let mut store = Store::default();
        store.stack.push(-2147483648.9f64);
        run(&[0xAA], &mut store).unwrap();
        assert_eq!(store.stack.pop(), Ok(Value::I32(i32::MIN)));
    }

    #[test]
    fn saturating_truncation() {
        let mut store = Store::default();
        store.stack.push(f64::NAN);
        store.stack.push(1.0e20f64);
        // i64.trunc_sat_f64_s, then i32.trunc_sat_f64_s
        run(&[0xFC, 0x06], &mut store).unwrap();
        assert_eq!(store.stack.pop(), Ok(Value::I64(i64::MAX)));
        run(&[0xFC, 0x02], &mut store).unwrap();
        assert_eq!(store.stack.pop(), Ok(Value::I32(0)));
    }

    #[test]
    fn float_min_max_nearest() {
        assert!(min_f32(f32::NAN, 1.0).is_nan());
        assert!(min_f64(0.0, -0.0).is_sign_negative());
        assert!(max_f64(-0.0, 0.0).is_sign_positive());
        assert_eq!(max_f32(1.0, 2.0), 2.0);

        let mut store = Store::default();
        store.stack.push(2.5f64);
        run(&[0x9E], &mut store).unwrap();
        assert_eq!(store.stack.pop_f64(), Ok(2.0));
    }

    #[test]
    fn narrow_loads_and_stores() {
        let mut store = with_memory();
        // i32.const 4, i32.const -1, i32.store8 align=0 offset=0
        run(&[0x41, 0x04, 0x41, 0x7F, 0x3A, 0x00, 0x00], &mut store).unwrap();
        // i32.const 0, i32.load8_s offset=4 ; i32.const 0, i32.load8_u offset=4
        run(&[0x41, 0x00, 0x2C, 0x00, 0x04, 0x41, 0x00, 0x2D, 0x00, 0x04], &mut store).unwrap();
        assert_eq!(store.stack.pop(), Ok(Value::I32(255)));
        assert_eq!(store.stack.pop(), Ok(Value::I32(-1)));
        assert_eq!(store.effects, 1);
    }

    #[test]
    fn loads_past_memory_trap() {
        let mut store = with_memory();
        let mut code = vec![0x41];
        leb128::write_sleb(&mut code, 65_535);
        code.extend([0x28, 0x02, 0x00]);
        assert_eq!(
            run(&code, &mut store),
            Err(Trap::OutOfBounds { what: "memory", index: 65_535 })
        );
        let mut empty = Store::default();
        assert_eq!(
            run(&[0x41, 0x00, 0x28, 0x02, 0x00], &mut empty),
            Err(Trap::MissingMemory { index: 0 })
        );
    }

    #[test]
    fn bulk_fill_and_copy() {
        let mut store = with_memory();
        // memory.fill(dst=2, val=7, len=3)
        run(&[0x41, 0x02, 0x41, 0x07, 0x41, 0x03, 0xFC, 0x0B, 0x00], &mut store).unwrap();
        // memory.copy(dst=10, src=2, len=3)
        run(&[0x41, 0x0A, 0x41, 0x02, 0x41, 0x03, 0xFC, 0x0A, 0x00, 0x00], &mut store).unwrap();
        let mem = store.memory(0).unwrap();
        assert_eq!(mem.read(0, 6).unwrap(), &[0, 0, 7, 7, 7, 0]);
        assert_eq!(mem.read(10, 3).unwrap(), &[7, 7, 7]);
    }

    #[test]
    fn shadow_store_skips_memory_writes() {
        let mut store = with_memory().shadow_copy();
        run(&[0x41, 0x00, 0x41, 0x2A, 0x36, 0x02, 0x00], &mut store).unwrap();
        assert_eq!(store.memory(0).unwrap().read(0, 4).unwrap(), &[0, 0, 0, 0]);
        assert_eq!(store.effects, 0);
    }

    #[test]
    fn settle_keeps_only_the_carried_values() {
        let mut stack = OperandStack::new();
        stack.extend([Value::I32(1), Value::I32(2), Value::I32(3), Value::I64(4)]);
        settle(&mut stack, 1, 1).unwrap();
        assert_eq!(stack.as_slice(), &[Value::I32(1), Value::I64(4)]);
        settle(&mut stack, 2, 0).unwrap();
        assert_eq!(stack.len(), 2);
        assert_eq!(settle(&mut stack, 1, 2), Err(Trap::StackUnderflow));
    }

    #[test]
    fn unknown_prefixed_opcode_is_a_fault() {
        let mut store = Store::default();
        assert_eq!(
            run(&[0xFC, 0x11], &mut store),
            Err(Trap::FunctionFault { opcode: 0xFC11 })
        );
    }

    #[test]
    fn locals_are_frame_relative() {
        let mut store = Store::default();
        store.stack.push(99i32);
        store.stack.push(5i32);
        store.stack.push(0i32);
        let frame = Frame::new(1, 2);
        let code = [0x20, 0x00, 0x21, 0x01, 0x20, 0x02];
        let mut cur = Cursor::new(&code);
        for _ in 0..2 {
            let op = Op::from_byte(cur.read_u8().unwrap()).unwrap();
            dispatch(op, &mut cur, frame, &mut store).unwrap();
        }
        assert_eq!(store.stack.as_slice(), &[Value::I32(99), Value::I32(5), Value::I32(5)]);
        let op = Op::from_byte(cur.read_u8().unwrap()).unwrap();
        assert_eq!(
            dispatch(op, &mut cur, frame, &mut store),
            Err(Trap::UnknownLocal { index: 2 })
        );
    }
}
