//! Physical memory controller.
//!
//! Maps disjoint physical address ranges to [`MemoryRegion`] backing stores
//! and dispatches width-specific reads/writes to the mapping that contains
//! the address. Mappings are kept sorted by `start` and are never allowed
//! to overlap.

use crate::error::{Result, VmError};

use super::region::MemoryRegion;

/// A `[start, start+length)` window bound to a backing store.
struct Mapping {
    start: u64,
    length: u64,
    region: Box<dyn MemoryRegion>,
}

impl Mapping {
    #[inline]
    fn contains(&self, addr: u64) -> bool {
        addr >= self.start && addr < self.start + self.length
    }

    #[inline]
    fn end(&self) -> u64 {
        self.start + self.length
    }
}

/// Routes physical addresses to mapped [`MemoryRegion`]s.
///
/// `lock()`/`unlock()` are no-ops here (the core is single-threaded) but are
/// preserved as a contract so `LOCK`-prefixed instructions and `XCHG` can
/// serialize bus access if this is ever made concurrent.
pub struct MemoryController {
    mappings: Vec<Mapping>,
    locked: bool,
}

impl MemoryController {
    /// Build an empty controller with no mapped regions.
    pub fn new() -> Self {
        MemoryController {
            mappings: Vec::new(),
            locked: false,
        }
    }

    /// Map `region` at physical address `start`.
    ///
    /// Fails fatally if the new range overlaps any existing mapping. The
    /// mapping list is kept sorted by `start` after insertion.
    pub fn add_region(&mut self, start: u64, region: Box<dyn MemoryRegion>) -> Result<()> {
        let length = region.size();
        let new_end = start + length;
        for m in &self.mappings {
            if start < m.end() && m.start < new_end {
                return Err(VmError::OverlappingRegion {
                    start,
                    end: new_end,
                });
            }
        }
        self.mappings.push(Mapping {
            start,
            length,
            region,
        });
        self.mappings.sort_by_key(|m| m.start);
        Ok(())
    }

    /// Serialize bus access for the duration of a `LOCK`-prefixed
    /// instruction or an `XCHG`. No-op in this single-threaded core.
    pub fn lock(&mut self) {
        self.locked = true;
    }

    /// Release a prior [`lock`](Self::lock).
    pub fn unlock(&mut self) {
        self.locked = false;
    }

    /// Whether the bus is currently held locked (diagnostic only).
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    fn find(&self, addr: u64) -> Result<&Mapping> {
        self.mappings
            .iter()
            .find(|m| m.contains(addr))
            .ok_or(VmError::OutOfBoundsMemory { addr, len: 1 })
    }

    fn find_mut(&mut self, addr: u64) -> Result<&mut Mapping> {
        self.mappings
            .iter_mut()
            .find(|m| m.contains(addr))
            .ok_or(VmError::OutOfBoundsMemory { addr, len: 1 })
    }

    /// Read a single byte at `phys`.
    pub fn read_u8(&self, phys: u64) -> Result<u8> {
        let m = self.find(phys)?;
        let mut buf = [0u8; 1];
        m.region.read(phys - m.start, &mut buf)?;
        Ok(buf[0])
    }

    /// Read a little-endian 16-bit value at `phys`.
    pub fn read_u16(&self, phys: u64) -> Result<u16> {
        let m = self.find(phys)?;
        let mut buf = [0u8; 2];
        m.region.read(phys - m.start, &mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    /// Read a little-endian 32-bit value at `phys`.
    pub fn read_u32(&self, phys: u64) -> Result<u32> {
        let m = self.find(phys)?;
        let mut buf = [0u8; 4];
        m.region.read(phys - m.start, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    /// Read a little-endian 64-bit value at `phys`.
    pub fn read_u64(&self, phys: u64) -> Result<u64> {
        let m = self.find(phys)?;
        let mut buf = [0u8; 8];
        m.region.read(phys - m.start, &mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    /// Write a single byte at `phys`.
    pub fn write_u8(&mut self, phys: u64, val: u8) -> Result<()> {
        let m = self.find_mut(phys)?;
        if !m.region.writable() {
            return Err(VmError::RomWrite { addr: phys });
        }
        m.region.write(phys - m.start, &[val])
    }

    /// Write a little-endian 16-bit value at `phys`.
    pub fn write_u16(&mut self, phys: u64, val: u16) -> Result<()> {
        let m = self.find_mut(phys)?;
        if !m.region.writable() {
            return Err(VmError::RomWrite { addr: phys });
        }
        m.region.write(phys - m.start, &val.to_le_bytes())
    }

    /// Write a little-endian 32-bit value at `phys`.
    pub fn write_u32(&mut self, phys: u64, val: u32) -> Result<()> {
        let m = self.find_mut(phys)?;
        if !m.region.writable() {
            return Err(VmError::RomWrite { addr: phys });
        }
        m.region.write(phys - m.start, &val.to_le_bytes())
    }

    /// Write a little-endian 64-bit value at `phys`.
    pub fn write_u64(&mut self, phys: u64, val: u64) -> Result<()> {
        let m = self.find_mut(phys)?;
        if !m.region.writable() {
            return Err(VmError::RomWrite { addr: phys });
        }
        m.region.write(phys - m.start, &val.to_le_bytes())
    }

    /// Read `buf.len()` bytes starting at `phys`, which may span adjacent
    /// mappings. Fails fatally on any gap between mappings.
    pub fn read_bytes(&self, phys: u64, buf: &mut [u8]) -> Result<()> {
        let mut addr = phys;
        let mut filled = 0usize;
        while filled < buf.len() {
            let m = self.find(addr)?;
            let region_off = addr - m.start;
            let avail = (m.length - region_off) as usize;
            let take = avail.min(buf.len() - filled);
            m.region.read(region_off, &mut buf[filled..filled + take])?;
            filled += take;
            addr += take as u64;
        }
        Ok(())
    }

    /// Write `buf` starting at `phys`, which may span adjacent mappings.
    /// Fails fatally on any gap or if any spanned region is read-only.
    pub fn write_bytes(&mut self, phys: u64, buf: &[u8]) -> Result<()> {
        let mut addr = phys;
        let mut written = 0usize;
        while written < buf.len() {
            let m = self.find_mut(addr)?;
            if !m.region.writable() {
                return Err(VmError::RomWrite { addr });
            }
            let region_off = addr - m.start;
            let avail = (m.length - region_off) as usize;
            let take = avail.min(buf.len() - written);
            m.region
                .write(region_off, &buf[written..written + take])?;
            written += take;
            addr += take as u64;
        }
        Ok(())
    }

    /// Return the sorted list of mapping start addresses (diagnostic/test use).
    pub fn mapping_starts(&self) -> Vec<u64> {
        self.mappings.iter().map(|m| m.start).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::region::{RamRegion, RomRegion};

    #[test]
    fn read_write_round_trip() {
        let mut ctl = MemoryController::new();
        ctl.add_region(0, Box::new(RamRegion::new(0x1000))).unwrap();
        ctl.write_u32(0x10, 0xDEAD_BEEF).unwrap();
        assert_eq!(ctl.read_u32(0x10).unwrap(), 0xDEAD_BEEF);
    }

    #[test]
    fn overlap_is_fatal() {
        let mut ctl = MemoryController::new();
        ctl.add_region(0, Box::new(RamRegion::new(0x100))).unwrap();
        let err = ctl.add_region(0x80, Box::new(RamRegion::new(0x100)));
        assert!(matches!(err, Err(VmError::OverlappingRegion { .. })));
    }

    #[test]
    fn out_of_bounds_read_is_fatal() {
        let mut ctl = MemoryController::new();
        ctl.add_region(0, Box::new(RamRegion::new(0x100))).unwrap();
        assert!(matches!(
            ctl.read_u8(0x200),
            Err(VmError::OutOfBoundsMemory { .. })
        ));
    }

    #[test]
    fn rom_write_is_fatal() {
        let mut ctl = MemoryController::new();
        ctl.add_region(0, Box::new(RomRegion::new(vec![0; 0x10])))
            .unwrap();
        assert!(matches!(
            ctl.write_u8(0, 1),
            Err(VmError::RomWrite { .. })
        ));
    }

    #[test]
    fn mappings_stay_sorted() {
        let mut ctl = MemoryController::new();
        ctl.add_region(0x1000, Box::new(RamRegion::new(0x100)))
            .unwrap();
        ctl.add_region(0, Box::new(RamRegion::new(0x100))).unwrap();
        assert_eq!(ctl.mapping_starts(), vec![0, 0x1000]);
    }

    #[test]
    fn bytes_span_adjacent_regions() {
        let mut ctl = MemoryController::new();
        ctl.add_region(0, Box::new(RamRegion::new(4))).unwrap();
        ctl.add_region(4, Box::new(RamRegion::new(4))).unwrap();
        ctl.write_bytes(2, &[1, 2, 3, 4]).unwrap();
        let mut buf = [0u8; 4];
        ctl.read_bytes(2, &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3, 4]);
    }
}
