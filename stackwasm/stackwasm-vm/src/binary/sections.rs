//! Section ids, headers and the per-section record decoders.
//! Offsets reported here are relative to the cursor handed in; the module
//! decoder rebases them onto the file.

use super::{
    cursor::Cursor,
    leb128,
    reader::{read_len_prefixed_bytes, read_name, read_vec},
    BinaryReadError, Result,
};
use crate::model::{FuncType, Limits, ValType, Value};

/// Upper bound on declared locals per function; a body claiming more is malformed.
pub const MAX_LOCALS: u64 = 50_000;

/// Section identifiers, including the bulk-memory DataCount section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionId {
    Custom = 0,
    Type = 1,
    Import = 2,
    Function = 3,
    Table = 4,
    Memory = 5,
    Global = 6,
    Export = 7,
    Start = 8,
    Element = 9,
    Code = 10,
    Data = 11,
    DataCount = 12,
}

impl SectionId {
    pub fn from_byte(b: u8) -> Option<Self> {
        Some(match b {
            0 => SectionId::Custom,
            1 => SectionId::Type,
            2 => SectionId::Import,
            3 => SectionId::Function,
            4 => SectionId::Table,
            5 => SectionId::Memory,
            6 => SectionId::Global,
            7 => SectionId::Export,
            8 => SectionId::Start,
            9 => SectionId::Element,
            10 => SectionId::Code,
            11 => SectionId::Data,
            12 => SectionId::DataCount,
            _ => return None,
        })
    }

    /// Position in the required section order. DataCount sits between
    /// Element and Code, so the wire id cannot be used directly.
    pub fn ordering_key(self) -> u8 {
        match self {
            SectionId::Custom => 0,
            SectionId::Type => 1,
            SectionId::Import => 2,
            SectionId::Function => 3,
            SectionId::Table => 4,
            SectionId::Memory => 5,
            SectionId::Global => 6,
            SectionId::Export => 7,
            SectionId::Start => 8,
            SectionId::Element => 9,
            SectionId::DataCount => 10,
            SectionId::Code => 11,
            SectionId::Data => 12,
        }
    }
}

/// Section id, payload length, and the payload start offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionHeader {
    pub id: SectionId,
    pub payload_len: u32,
    pub payload_offset: usize,
}

pub fn read_section_header(cur: &mut Cursor) -> Result<SectionHeader> {
    let at = cur.offset();
    let id_byte = cur.read_u8()?;
    let id = SectionId::from_byte(id_byte).ok_or(BinaryReadError::Malformed {
        offset: at,
        msg: "unknown section id",
    })?;
    let payload_len = leb128::read_uleb_u32(cur)?;
    Ok(SectionHeader {
        id,
        payload_len,
        payload_offset: cur.offset(),
    })
}

/* ---------- Type-level readers ---------- */

pub fn read_val_type(cur: &mut Cursor) -> Result<ValType> {
    let at = cur.offset();
    let b = cur.read_u8()?;
    ValType::from_byte(b).ok_or(BinaryReadError::Malformed {
        offset: at,
        msg: "invalid value type",
    })
}

pub fn read_limits(cur: &mut Cursor) -> Result<Limits> {
    let at = cur.offset();
    match cur.read_u8()? {
        0x00 => Ok(Limits::new(leb128::read_uleb_u32(cur)?, None)),
        0x01 => {
            let min = leb128::read_uleb_u32(cur)?;
            let max = leb128::read_uleb_u32(cur)?;
            if max < min {
                return Err(BinaryReadError::Malformed {
                    offset: at,
                    msg: "limits max < min",
                });
            }
            Ok(Limits::new(min, Some(max)))
        }
        _ => Err(BinaryReadError::Malformed {
            offset: at,
            msg: "invalid limits flag",
        }),
    }
}

pub fn read_func_type(cur: &mut Cursor) -> Result<FuncType> {
    let at = cur.offset();
    if cur.read_u8()? != 0x60 {
        return Err(BinaryReadError::Malformed {
            offset: at,
            msg: "expected function type (0x60)",
        });
    }
    let params = read_vec(cur, read_val_type)?;
    let results = read_vec(cur, read_val_type)?;
    Ok(FuncType::new(params, results))
}

fn read_mutability(cur: &mut Cursor) -> Result<bool> {
    let at = cur.offset();
    match cur.read_u8()? {
        0x00 => Ok(false),
        0x01 => Ok(true),
        _ => Err(BinaryReadError::Malformed {
            offset: at,
            msg: "invalid global mutability",
        }),
    }
}

/// Table type: reference type byte plus limits. Only checked for shape.
fn skip_table_type(cur: &mut Cursor) -> Result<()> {
    let at = cur.offset();
    match cur.read_u8()? {
        0x70 | 0x6F => read_limits(cur).map(drop),
        _ => Err(BinaryReadError::Malformed {
            offset: at,
            msg: "invalid reference type",
        }),
    }
}

/// Initializer expression: one constant or `global.get`, then `end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstExpr {
    Value(Value),
    GlobalGet(u32),
}

pub fn read_const_expr(cur: &mut Cursor) -> Result<ConstExpr> {
    let at = cur.offset();
    let expr = match cur.read_u8()? {
        0x41 => ConstExpr::Value(Value::I32(leb128::read_sleb_i32(cur)?)),
        0x42 => ConstExpr::Value(Value::I64(leb128::read_sleb_i64(cur)?)),
        0x43 => ConstExpr::Value(Value::F32(cur.read_u32_le()?)),
        0x44 => ConstExpr::Value(Value::F64(cur.read_u64_le()?)),
        0x23 => ConstExpr::GlobalGet(leb128::read_uleb_u32(cur)?),
        _ => {
            return Err(BinaryReadError::Malformed {
                offset: at,
                msg: "unsupported initializer opcode",
            })
        }
    };
    let end = cur.offset();
    if cur.read_u8()? != 0x0B {
        return Err(BinaryReadError::Malformed {
            offset: end,
            msg: "initializer not terminated by end",
        });
    }
    Ok(expr)
}

/* ---------- Section records ---------- */

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportKind {
    /// Signature index.
    Func(u32),
    Table,
    Memory(Limits),
    Global { ty: ValType, mutable: bool },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportEntry {
    pub module: String,
    pub name: String,
    pub kind: ImportKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalEntry {
    pub ty: ValType,
    pub mutable: bool,
    pub init: ConstExpr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportEntry {
    pub name: String,
    pub kind: u8,
    pub index: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeEntry<'a> {
    pub locals: Vec<ValType>,
    pub body: &'a [u8],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataMode {
    Active { memory: u32, offset: ConstExpr },
    Passive,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataEntry<'a> {
    pub mode: DataMode,
    pub bytes: &'a [u8],
}

/* ---------- Section readers ---------- */

pub fn read_type_section(cur: &mut Cursor) -> Result<Vec<FuncType>> {
    read_vec(cur, read_func_type)
}

pub fn read_import_section(cur: &mut Cursor) -> Result<Vec<ImportEntry>> {
    read_vec(cur, |c| {
        let module = read_name(c)?;
        let name = read_name(c)?;
        let at = c.offset();
        let kind = match c.read_u8()? {
            0x00 => ImportKind::Func(leb128::read_uleb_u32(c)?),
            0x01 => {
                skip_table_type(c)?;
                ImportKind::Table
            }
            0x02 => ImportKind::Memory(read_limits(c)?),
            0x03 => {
                let ty = read_val_type(c)?;
                let mutable = read_mutability(c)?;
                ImportKind::Global { ty, mutable }
            }
            _ => {
                return Err(BinaryReadError::Malformed {
                    offset: at,
                    msg: "invalid import kind",
                })
            }
        };
        Ok(ImportEntry { module, name, kind })
    })
}

pub fn read_function_section(cur: &mut Cursor) -> Result<Vec<u32>> {
    read_vec(cur, leb128::read_uleb_u32)
}

pub fn read_memory_section(cur: &mut Cursor) -> Result<Vec<Limits>> {
    read_vec(cur, read_limits)
}

pub fn read_global_section(cur: &mut Cursor) -> Result<Vec<GlobalEntry>> {
    read_vec(cur, |c| {
        let ty = read_val_type(c)?;
        let mutable = read_mutability(c)?;
        let init = read_const_expr(c)?;
        Ok(GlobalEntry { ty, mutable, init })
    })
}

pub fn read_export_section(cur: &mut Cursor) -> Result<Vec<ExportEntry>> {
    read_vec(cur, |c| {
        let name = read_name(c)?;
        let at = c.offset();
        let kind = c.read_u8()?;
        if kind > 0x03 {
            return Err(BinaryReadError::Malformed {
                offset: at,
                msg: "invalid export kind",
            });
        }
        let index = leb128::read_uleb_u32(c)?;
        Ok(ExportEntry { name, kind, index })
    })
}

pub fn read_start_section(cur: &mut Cursor) -> Result<u32> {
    leb128::read_uleb_u32(cur)
}

pub fn read_data_count_section(cur: &mut Cursor) -> Result<u32> {
    leb128::read_uleb_u32(cur)
}

/// Code bodies as (expanded locals, instruction bytes). Body offsets are
/// kept relative to `cur`.
pub fn read_code_section<'a>(cur: &mut Cursor<'a>) -> Result<Vec<CodeEntry<'a>>> {
    read_vec(cur, |c| {
        let size = leb128::read_uleb_u32(c)? as usize;
        let base = c.offset();
        let bytes = c.read_bytes(size)?;
        read_code_entry(bytes).map_err(|e| e.rebase(base))
    })
}

fn read_code_entry(bytes: &[u8]) -> Result<CodeEntry<'_>> {
    let mut sub = Cursor::new(bytes);
    let groups = read_vec(&mut sub, |c| {
        let count = leb128::read_uleb_u32(c)?;
        let ty = read_val_type(c)?;
        Ok((count, ty))
    })?;
    let total: u64 = groups.iter().map(|(n, _)| *n as u64).sum();
    if total > MAX_LOCALS {
        return Err(BinaryReadError::Malformed {
            offset: 0,
            msg: "too many locals",
        });
    }
    let locals = groups
        .into_iter()
        .flat_map(|(n, ty)| std::iter::repeat(ty).take(n as usize))
        .collect();
    let body = sub.read_bytes(sub.remaining())?;
    Ok(CodeEntry { locals, body })
}

pub fn read_data_section<'a>(cur: &mut Cursor<'a>) -> Result<Vec<DataEntry<'a>>> {
    read_vec(cur, |c| {
        let at = c.offset();
        let mode = match leb128::read_uleb_u32(c)? {
            0 => DataMode::Active {
                memory: 0,
                offset: read_const_expr(c)?,
            },
            1 => DataMode::Passive,
            2 => {
                let memory = leb128::read_uleb_u32(c)?;
                DataMode::Active {
                    memory,
                    offset: read_const_expr(c)?,
                }
            }
            _ => {
                return Err(BinaryReadError::Malformed {
                    offset: at,
                    msg: "invalid data segment flags",
                })
            }
        };
        let bytes = read_len_prefixed_bytes(c)?;
        Ok(DataEntry { mode, bytes })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_ok() {
        // id=Type(1), payload_len=3, then three bytes (ignored)
        let data = [1u8, 0x03, 0xAA, 0xBB, 0xCC];
        let mut c = Cursor::new(&data);
        let h = read_section_header(&mut c).unwrap();
        assert_eq!(h.id, SectionId::Type);
        assert_eq!(h.payload_len, 3);
        assert_eq!(h.payload_offset, 2);
    }

    #[test]
    fn unknown_section_id_reports_its_offset() {
        let data = [0x00, 0x00, 0x0D, 0x00];
        let mut c = Cursor::new(&data);
        read_section_header(&mut c).unwrap();
        assert_eq!(
            read_section_header(&mut c),
            Err(BinaryReadError::Malformed { offset: 2, msg: "unknown section id" })
        );
    }

    #[test]
    fn data_count_orders_before_code() {
        assert!(SectionId::DataCount.ordering_key() < SectionId::Code.ordering_key());
        assert!(SectionId::Element.ordering_key() < SectionId::DataCount.ordering_key());
    }

    #[test]
    fn function_type_record() {
        // 0x60, params [i32 f64], results [i64]
        let data = [0x60, 0x02, 0x7F, 0x7C, 0x01, 0x7E];
        let ty = read_func_type(&mut Cursor::new(&data)).unwrap();
        assert_eq!(ty, FuncType::new([ValType::I32, ValType::F64], [ValType::I64]));

        let bad = [0x60, 0x01, 0x7B, 0x00];
        assert_eq!(
            read_func_type(&mut Cursor::new(&bad)),
            Err(BinaryReadError::Malformed { offset: 2, msg: "invalid value type" })
        );
    }

    #[test]
    fn const_exprs() {
        let data = [0x41, 0x7F, 0x0B, 0x23, 0x02, 0x0B];
        let mut c = Cursor::new(&data);
        assert_eq!(read_const_expr(&mut c).unwrap(), ConstExpr::Value(Value::I32(-1)));
        assert_eq!(read_const_expr(&mut c).unwrap(), ConstExpr::GlobalGet(2));

        let unterminated = [0x41, 0x00, 0x01];
        assert!(read_const_expr(&mut Cursor::new(&unterminated)).is_err());
        let unsupported = [0x6A, 0x0B];
        assert_eq!(
            read_const_expr(&mut Cursor::new(&unsupported)),
            Err(BinaryReadError::Malformed { offset: 0, msg: "unsupported initializer opcode" })
        );
    }

    #[test]
    fn code_entry_expands_local_groups() {
        // one body: size 7, 2 groups (2 x i32, 1 x f32), body [nop, end]
        let data = [0x01, 0x07, 0x02, 0x02, 0x7F, 0x01, 0x7D, 0x01, 0x0B];
        let entries = read_code_section(&mut Cursor::new(&data)).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].locals, vec![ValType::I32, ValType::I32, ValType::F32]);
        assert_eq!(entries[0].body, &[0x01, 0x0B]);
    }

    #[test]
    fn code_entry_errors_are_rebased() {
        // size 3: one group of one local whose value type byte is 0x00
        let data = [0x01, 0x03, 0x01, 0x01, 0x00];
        assert_eq!(
            read_code_section(&mut Cursor::new(&data)),
            Err(BinaryReadError::Malformed { offset: 4, msg: "invalid value type" })
        );
    }

    #[test]
    fn data_segment_modes() {
        // active(0) at i32.const 4, bytes "hi"; passive(1), bytes "x"
        let data = [0x02, 0x00, 0x41, 0x04, 0x0B, 0x02, b'h', b'i', 0x01, 0x01, b'x'];
        let entries = read_data_section(&mut Cursor::new(&data)).unwrap();
        assert_eq!(
            entries[0].mode,
            DataMode::Active { memory: 0, offset: ConstExpr::Value(Value::I32(4)) }
        );
        assert_eq!(entries[0].bytes, b"hi");
        assert_eq!(entries[1].mode, DataMode::Passive);
        assert_eq!(entries[1].bytes, b"x");
    }
}
