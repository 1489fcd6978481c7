//! Linear memory (32-bit index space).
//! Byte-addressed, little-endian. Stores past the current length grow the
//! region page-wise up to the declared maximum; loads past it trap.

use crate::error::Trap;
use crate::model::{Limits, ValType, Value};

/// WASM page size in bytes (64 KiB).
pub const PAGE_SIZE: usize = 64 * 1024;

/// Pages addressable with a 32-bit index.
pub const MAX_PAGES: u32 = 65_536;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Memory {
    buf: Vec<u8>,
    limits: Limits,
    /// Export name, when the module exports this memory.
    pub name: Option<String>,
}

impl Memory {
    /// Create a memory holding `limits.min` zeroed pages. Fails with
    /// `OutOfBounds` when the host cannot allocate them.
    pub fn new(limits: Limits) -> Result<Self, Trap> {
        let len = (limits.min.min(MAX_PAGES) as usize) * PAGE_SIZE;
        let mut buf = Vec::new();
        if !resize_zeroed(&mut buf, len) {
            return Err(Self::out_of_bounds(len));
        }
        Ok(Self {
            buf,
            limits,
            name: None,
        })
    }

    pub fn limits(&self) -> Limits {
        self.limits
    }

    /// Current size in pages.
    pub fn size_pages(&self) -> u32 {
        self.buf.len().div_ceil(PAGE_SIZE) as u32
    }

    /// Current size in bytes.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Grow by delta pages. Returns the previous size on success, or None when
    /// the maximum would be exceeded or the pages cannot be allocated.
    pub fn grow(&mut self, delta_pages: u32) -> Option<u32> {
        let prev = self.size_pages();
        let new = prev.checked_add(delta_pages)?;
        if new > self.max_pages() {
            return None;
        }
        resize_zeroed(&mut self.buf, (new as usize) * PAGE_SIZE).then_some(prev)
    }

    pub fn data(&self) -> &[u8] {
        &self.buf
    }

    fn max_pages(&self) -> u32 {
        self.limits.max.unwrap_or(MAX_PAGES).min(MAX_PAGES)
    }

    fn out_of_bounds(addr: usize) -> Trap {
        Trap::OutOfBounds {
            what: "memory",
            index: addr as u64,
        }
    }

    /// Make `[addr, addr + len)` writable, growing to the next page boundary.
    fn ensure_writable(&mut self, addr: usize, len: usize) -> Result<(), Trap> {
        let end = addr.checked_add(len).ok_or_else(|| Self::out_of_bounds(addr))?;
        if end <= self.buf.len() {
            return Ok(());
        }
        let pages = end.div_ceil(PAGE_SIZE);
        if pages > self.max_pages() as usize {
            return Err(Self::out_of_bounds(addr));
        }
        if !resize_zeroed(&mut self.buf, pages * PAGE_SIZE) {
            return Err(Self::out_of_bounds(addr));
        }
        Ok(())
    }

    /// Borrow `len` bytes starting at `addr`.
    pub fn read(&self, addr: usize, len: usize) -> Result<&[u8], Trap> {
        let end = addr.checked_add(len).ok_or_else(|| Self::out_of_bounds(addr))?;
        self.buf.get(addr..end).ok_or_else(|| Self::out_of_bounds(addr))
    }

    pub fn load<const N: usize>(&self, addr: usize) -> Result<[u8; N], Trap> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read(addr, N)?);
        Ok(out)
    }

    pub fn store(&mut self, addr: usize, bytes: &[u8]) -> Result<(), Trap> {
        self.ensure_writable(addr, bytes.len())?;
        self.buf[addr..addr + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Full-width load of a value of type `ty`.
    pub fn load_value(&self, addr: usize, ty: ValType) -> Result<Value, Trap> {
        Ok(match ty {
            ValType::I32 => Value::I32(i32::from_le_bytes(self.load(addr)?)),
            ValType::I64 => Value::I64(i64::from_le_bytes(self.load(addr)?)),
            ValType::F32 => Value::F32(u32::from_le_bytes(self.load(addr)?)),
            ValType::F64 => Value::F64(u64::from_le_bytes(self.load(addr)?)),
        })
    }

    /// Full-width store; floats are written as their raw bits.
    pub fn store_value(&mut self, addr: usize, value: Value) -> Result<(), Trap> {
        match value {
            Value::I32(v) => self.store(addr, &v.to_le_bytes()),
            Value::I64(v) => self.store(addr, &v.to_le_bytes()),
            Value::F32(bits) => self.store(addr, &bits.to_le_bytes()),
            Value::F64(bits) => self.store(addr, &bits.to_le_bytes()),
        }
    }

    /// Fill `len` bytes at `dst` with `byte`.
    pub fn fill(&mut self, dst: usize, byte: u8, len: usize) -> Result<(), Trap> {
        self.ensure_writable(dst, len)?;
        self.buf[dst..dst + len].fill(byte);
        Ok(())
    }

    /// Copy `len` bytes from `src` to `dst`; the ranges may overlap.
    pub fn copy(&mut self, dst: usize, src: usize, len: usize) -> Result<(), Trap> {
        self.read(src, len)?;
        self.ensure_writable(dst, len)?;
        self.buf.copy_within(src..src + len, dst);
        Ok(())
    }

    /// Initialise memory from a data segment.
    pub fn write_data(&mut self, offset: usize, bytes: &[u8]) -> Result<(), Trap> {
        self.store(offset, bytes)
    }
}

/// Extend `buf` with zeroes to `len` bytes. Returns false, leaving `buf`
/// untouched, when the allocation is refused.
fn resize_zeroed(buf: &mut Vec<u8>, len: usize) -> bool {
    let extra = len.saturating_sub(buf.len());
    if buf.try_reserve_exact(extra).is_err() {
        return false;
    }
    buf.resize(len.max(buf.len()), 0);
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grow_and_bounds() {
        let mut mem = Memory::new(Limits::new(1, Some(2))).unwrap();
        assert_eq!(mem.size_pages(), 1);
        assert!(mem.load::<1>(PAGE_SIZE - 1).is_ok());
        assert!(mem.load::<1>(PAGE_SIZE).is_err());
        assert_eq!(mem.grow(1), Some(1));
        assert_eq!(mem.size_pages(), 2);
        assert!(mem.load::<1>(2 * PAGE_SIZE - 1).is_ok());
        assert!(mem.grow(1).is_none());
    }

    #[test]
    fn le_load_store() {
        let mut mem = Memory::new(Limits::new(1, None)).unwrap();

        mem.store(0, &0x11223344u32.to_le_bytes()).unwrap();
        assert_eq!(mem.load::<1>(0).unwrap(), [0x44]);
        assert_eq!(u16::from_le_bytes(mem.load(0).unwrap()), 0x3344);

        mem.store_value(32, Value::F32(0x7FC0_0001)).unwrap();
        assert_eq!(mem.load_value(32, ValType::F32).unwrap(), Value::F32(0x7FC0_0001));

        mem.store_value(40, Value::F64(0x7FF8_0000_0000_0001)).unwrap();
        assert_eq!(
            mem.load_value(40, ValType::F64).unwrap(),
            Value::F64(0x7FF8_0000_0000_0001)
        );
    }

    #[test]
    fn store_grows_up_to_maximum() {
        let mut mem = Memory::new(Limits::new(0, Some(1))).unwrap();
        assert!(mem.is_empty());
        mem.store_value(8, Value::I64(-5)).unwrap();
        assert_eq!(mem.size_pages(), 1);
        assert_eq!(mem.load_value(8, ValType::I64).unwrap(), Value::I64(-5));
        assert_eq!(
            mem.store_value(PAGE_SIZE, Value::I32(1)),
            Err(Trap::OutOfBounds { what: "memory", index: PAGE_SIZE as u64 })
        );
    }

    #[test]
    fn fill_and_overlapping_copy() {
        let mut mem = Memory::new(Limits::new(1, None)).unwrap();
        mem.store(0, &[1, 2, 3, 4, 5]).unwrap();
        mem.copy(2, 0, 3).unwrap();
        assert_eq!(mem.read(0, 5).unwrap(), &[1, 2, 1, 2, 3]);
        mem.fill(1, 0xEE, 2).unwrap();
        assert_eq!(mem.read(0, 4).unwrap(), &[1, 0xEE, 0xEE, 2]);
        assert!(mem.copy(0, PAGE_SIZE - 1, 2).is_err());
    }

    #[test]
    fn refused_allocations_leave_memory_unchanged() {
        let mut buf = vec![1u8, 2];
        assert!(!resize_zeroed(&mut buf, usize::MAX));
        assert_eq!(buf, [1, 2]);
        assert!(resize_zeroed(&mut buf, 4));
        assert_eq!(buf, [1, 2, 0, 0]);
    }

    #[test]
    fn grow_past_the_index_space_fails_without_allocating() {
        let mut mem = Memory::new(Limits::new(1, None)).unwrap();
        assert_eq!(mem.grow(MAX_PAGES), None);
        assert_eq!(mem.size_pages(), 1);
        assert_eq!(
            mem.store(usize::MAX - 1, &[1, 2, 3]),
            Err(Trap::OutOfBounds { what: "memory", index: (usize::MAX - 1) as u64 })
        );
        assert_eq!(mem.len(), PAGE_SIZE);
    }
}
