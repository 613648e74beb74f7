//! Segmented addressing: segment-relative offset → linear address.
//!
//! Loading a segment register recomputes its hidden descriptor according to
//! the current CPU mode; `resolve` then applies the cached base to an
//! offset. Protected/long-mode descriptor-table lookups are stubbed (see the
//! crate-level design notes) -- no privilege or presence checks are
//! performed, since this core models no fault-delivery path.

use crate::cpu::Mode;
use crate::memory::MemoryBus;
use crate::registers::{RegisterFile, SegReg, SegmentDescriptor};

/// Load `selector` into `seg`, recomputing its hidden descriptor for the
/// current CPU mode.
///
/// - **Real mode:** `base = selector * 16`, `limit = 0xFFFF_FFFF`.
/// - **Protected/Long mode:** the GDT entry at `GDTR.base + (selector &
///   0xFFF8)` is read and decoded. LDT selectors (TI=1) are not supported
///   and fall back to the GDT as if TI were 0.
pub fn load(
    regs: &mut RegisterFile,
    mem: &dyn MemoryBus,
    mode: Mode,
    seg: SegReg,
    selector: u16,
) {
    match mode {
        Mode::Real => regs.load_segment_real(seg, selector),
        Mode::Protected | Mode::Long => {
            let index = (selector & 0xFFF8) as u64;
            let addr = regs.gdtr.base.wrapping_add(index);
            let raw = mem.read_u64(addr).unwrap_or(0);
            regs.load_segment(seg, selector, raw);
        }
    }
}

/// Resolve a segment-relative `offset` to a linear address.
#[inline]
pub fn resolve(desc: &SegmentDescriptor, offset: u64) -> u64 {
    desc.base.wrapping_add(offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryController;

    #[test]
    fn real_mode_load_sets_base_and_full_limit() {
        let mut regs = RegisterFile::new();
        let ctl = MemoryController::new();
        load(&mut regs, &ctl, Mode::Real, SegReg::Ds, 0x1234);
        let desc = regs.segment(SegReg::Ds);
        assert_eq!(desc.base, 0x1234 * 16);
        assert_eq!(desc.limit, 0xFFFF_FFFF);
    }

    #[test]
    fn resolve_adds_base_to_offset() {
        let desc = SegmentDescriptor::real_mode(0x1000);
        assert_eq!(resolve(&desc, 0x20), 0x1000 * 16 + 0x20);
    }
}
