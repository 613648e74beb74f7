//! Property-based tests for the round-trip invariants the core is
//! expected to hold for every input, not just the hand-picked boundary
//! cases covered elsewhere.

use proptest::prelude::*;

use z86::memory::{MemoryController, RamRegion};
use z86::registers::{GprIndex, SegReg};
use z86::{flags, Cpu};

fn vm_with_program(bytes: &[u8]) -> (Cpu, MemoryController) {
    let mut cpu = Cpu::new();
    let mut mem = MemoryController::new();
    mem.add_region(0, Box::new(RamRegion::new(0x10000))).unwrap();
    cpu.regs.load_segment_real(SegReg::Cs, 0);
    cpu.regs.rip = 0;
    mem.write_bytes(0, bytes).unwrap();
    (cpu, mem)
}

proptest! {
    /// PUSH then POP hands back exactly what was pushed and leaves the
    /// stack pointer where it started.
    #[test]
    fn push_pop_round_trips_any_word(value: u16) {
        let lo = (value & 0xFF) as u8;
        let hi = (value >> 8) as u8;
        // BC 00 20    mov sp, 0x2000
        // B8 lo hi    mov ax, value
        // 50          push ax
        // 5B          pop bx
        // F4          hlt
        let program = [0xBC, 0x00, 0x20, 0xB8, lo, hi, 0x50, 0x5B, 0xF4];
        let (mut cpu, mut mem) = vm_with_program(&program);
        let sp_before = 0x2000u64;
        cpu.run(&mut mem, Some(20)).unwrap();
        prop_assert_eq!(cpu.regs.sp(), sp_before);
        prop_assert_eq!(cpu.regs.read_gpr16(GprIndex::Rbx as u8), value);
    }

    /// Two CMC's in a row are the identity on RFLAGS.
    #[test]
    fn cmc_cmc_is_identity(flags_byte: u8) {
        // F5 F5 F4    cmc; cmc; hlt
        let (mut cpu, mut mem) = vm_with_program(&[0xF5, 0xF5, 0xF4]);
        let initial = (flags_byte as u64) | flags::RFLAGS_FIXED;
        cpu.regs.rflags = initial;
        cpu.run(&mut mem, Some(10)).unwrap();
        prop_assert_eq!(cpu.regs.rflags, initial);
    }

    /// `write_u16` followed by `read_u16` at the same address returns the
    /// value just written, for any in-bounds address and any value.
    #[test]
    fn memory_write_then_read_u16_round_trips(offset in 0u64..0xFFFE, value: u16) {
        let mut mem = MemoryController::new();
        mem.add_region(0, Box::new(RamRegion::new(0x10000))).unwrap();
        mem.write_u16(offset, value).unwrap();
        prop_assert_eq!(mem.read_u16(offset).unwrap(), value);
    }
}
