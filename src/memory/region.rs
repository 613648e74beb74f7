//! Backing stores mapped into the physical address space.
//!
//! A [`MemoryRegion`] is a byte-addressable store of a fixed size; the
//! [`MemoryController`](super::controller::MemoryController) is responsible
//! for routing physical addresses to the region that covers them. Two
//! concrete kinds exist: [`RamRegion`] (read-write) and [`RomRegion`]
//! (rejects writes).

use crate::error::{Result, VmError};

/// A byte-addressable backing store of fixed size.
///
/// All multi-byte accesses are little-endian, matching the x86 memory
/// model. Every access is bounds-checked against `size()`; an out-of-range
/// offset is a fatal error, never a partial or silently-ignored access.
pub trait MemoryRegion {
    /// Size of the region in bytes.
    fn size(&self) -> u64;

    /// Whether writes to this region are permitted.
    fn writable(&self) -> bool;

    /// Read `buf.len()` bytes starting at `offset`.
    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Write `buf` starting at `offset`.
    ///
    /// Callers must check [`writable`](Self::writable) themselves; regions
    /// return [`VmError::RomWrite`] here only as a last-resort guard.
    fn write(&mut self, offset: u64, buf: &[u8]) -> Result<()>;
}

fn check_bounds(size: u64, offset: u64, len: usize) -> Result<()> {
    let end = offset.checked_add(len as u64);
    match end {
        Some(end) if end <= size => Ok(()),
        _ => Err(VmError::OutOfBoundsMemory {
            addr: offset,
            len: len as u64,
        }),
    }
}

/// Read-write RAM backed by a zeroed byte vector.
pub struct RamRegion {
    data: Vec<u8>,
}

impl RamRegion {
    /// Allocate `size` bytes of zeroed RAM.
    pub fn new(size: u64) -> Self {
        RamRegion {
            data: vec![0u8; size as usize],
        }
    }

    /// Copy `src` into the region starting at `offset`.
    pub fn load_at(&mut self, offset: u64, src: &[u8]) -> Result<()> {
        check_bounds(self.data.len() as u64, offset, src.len())?;
        let start = offset as usize;
        self.data[start..start + src.len()].copy_from_slice(src);
        Ok(())
    }
}

impl MemoryRegion for RamRegion {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn writable(&self) -> bool {
        true
    }

    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        check_bounds(self.size(), offset, buf.len())?;
        let start = offset as usize;
        buf.copy_from_slice(&self.data[start..start + buf.len()]);
        Ok(())
    }

    fn write(&mut self, offset: u64, buf: &[u8]) -> Result<()> {
        check_bounds(self.size(), offset, buf.len())?;
        let start = offset as usize;
        self.data[start..start + buf.len()].copy_from_slice(buf);
        Ok(())
    }
}

/// Read-only ROM. Writes always fail fatally.
pub struct RomRegion {
    data: Vec<u8>,
}

impl RomRegion {
    /// Build a ROM region from its contents; its size is `contents.len()`.
    pub fn new(contents: Vec<u8>) -> Self {
        RomRegion { data: contents }
    }
}

impl MemoryRegion for RomRegion {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn writable(&self) -> bool {
        false
    }

    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        check_bounds(self.size(), offset, buf.len())?;
        let start = offset as usize;
        buf.copy_from_slice(&self.data[start..start + buf.len()]);
        Ok(())
    }

    fn write(&mut self, offset: u64, _buf: &[u8]) -> Result<()> {
        Err(VmError::RomWrite { addr: offset })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ram_round_trips() {
        let mut ram = RamRegion::new(16);
        ram.write(4, &[1, 2, 3, 4]).unwrap();
        let mut buf = [0u8; 4];
        ram.read(4, &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3, 4]);
    }

    #[test]
    fn ram_out_of_bounds_is_fatal() {
        let ram = RamRegion::new(8);
        let mut buf = [0u8; 4];
        assert!(matches!(
            ram.read(6, &mut buf),
            Err(VmError::OutOfBoundsMemory { .. })
        ));
    }

    #[test]
    fn rom_rejects_writes() {
        let mut rom = RomRegion::new(vec![0xAA; 8]);
        assert!(matches!(rom.write(0, &[1]), Err(VmError::RomWrite { .. })));
    }
}
