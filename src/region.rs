//! Byte regions that hold trees.
//!
//! A region is a contiguous block of bytes with a base address. Everything
//! the engine stores in it (tree roots, node links, payload references) is a
//! [`RelPtr`], so the block can be copied, reallocated or remapped freely.
//! Fields are little-endian.

use crate::addr::{Addr, Pos};
use crate::relptr::RelPtr;

pub trait Region {
    /// Address of byte 0 in the current mapping.
    fn base(&self) -> Addr;

    fn bytes(&self) -> &[u8];

    fn bytes_mut(&mut self) -> &mut [u8];

    #[inline]
    fn addr_of(&self, pos: Pos) -> Addr {
        self.base().wrapping_add(pos.get())
    }

    /// # Panics
    /// Panics if `addr` lies outside the region.
    #[inline]
    fn pos_of(&self, addr: Addr) -> Pos {
        let pos = addr.wrapping_sub(self.base());
        if pos >= self.bytes().len() as u64 {
            outside_region(addr, self.bytes().len());
        }
        Pos::new(pos)
    }

    #[inline]
    fn read_u64(&self, pos: Pos) -> u64 {
        let at = pos.as_usize();
        let mut b = [0u8; 8];
        b.copy_from_slice(&self.bytes()[at..at + 8]);
        u64::from_le_bytes(b)
    }

    #[inline]
    fn write_u64(&mut self, pos: Pos, v: u64) {
        let at = pos.as_usize();
        self.bytes_mut()[at..at + 8].copy_from_slice(&v.to_le_bytes());
    }

    #[inline]
    fn read_i8(&self, pos: Pos) -> i8 {
        self.bytes()[pos.as_usize()] as i8
    }

    #[inline]
    fn write_i8(&mut self, pos: Pos, v: i8) {
        self.bytes_mut()[pos.as_usize()] = v as u8;
    }

    /// Resolves the relative reference stored at `pos`.
    ///
    /// # Panics
    /// Panics if the stored reference points outside the region, which only
    /// happens when the bytes are corrupt.
    #[inline]
    fn load_ref(&self, pos: Pos) -> Option<Pos> {
        let raw = self.read_u64(pos);
        let target = RelPtr::<u8>::from_raw(raw).resolve(self.addr_of(pos))?;
        let len = self.bytes().len() as u64;
        let target = target.wrapping_sub(self.base());
        if target >= len {
            dangling_reference(pos, raw, len);
        }
        Some(Pos::new(target))
    }

    /// Stores a relative reference to `target` at `pos`.
    #[inline]
    fn store_ref(&mut self, pos: Pos, target: Option<Pos>) {
        let at = self.addr_of(pos);
        let target = target.map(|t| self.addr_of(t));
        self.write_u64(pos, RelPtr::<u8>::new(target, at).into_raw());
    }
}

#[cold]
#[track_caller]
fn outside_region(addr: Addr, len: usize) -> ! {
    panic!("{addr:?} lies outside the region ({len} bytes)")
}

#[cold]
#[track_caller]
fn dangling_reference(field: Pos, raw: u64, len: u64) -> ! {
    panic!("reference at {field} (offset {raw:#x}) points outside the region ({len} bytes)")
}

impl Region for Vec<u8> {
    #[inline]
    fn base(&self) -> Addr {
        Addr::from_ptr(self.as_ptr())
    }

    #[inline]
    fn bytes(&self) -> &[u8] {
        self
    }

    #[inline]
    fn bytes_mut(&mut self) -> &mut [u8] {
        self
    }
}
