//! Whole-program integration tests: raw byte sequences run through the
//! full fetch-decode-execute loop, checked against architectural state
//! afterward. Each program is placed at CS:IP = 0:0 in a flat RAM region.

use z86::memory::{MemoryController, RamRegion};
use z86::registers::{GprIndex, SegReg};
use z86::{Cpu, ExitReason};

fn vm_with_program(bytes: &[u8]) -> (Cpu, MemoryController) {
    let mut cpu = Cpu::new();
    let mut mem = MemoryController::new();
    mem.add_region(0, Box::new(RamRegion::new(0x10000))).unwrap();
    cpu.regs.load_segment_real(SegReg::Cs, 0);
    cpu.regs.rip = 0;
    mem.write_bytes(0, bytes).unwrap();
    (cpu, mem)
}

#[test]
fn mov_ax_immediate() {
    // B8 34 12          mov ax, 0x1234
    // F4                hlt
    let (mut cpu, mut mem) = vm_with_program(&[0xB8, 0x34, 0x12, 0xF4]);
    let reason = cpu.run(&mut mem, Some(10)).unwrap();
    assert_eq!(reason, ExitReason::Halted);
    assert_eq!(cpu.regs.read_gpr16(GprIndex::Rax as u8), 0x1234);
}

#[test]
fn xor_ax_ax_clears_register_and_sets_zf() {
    // B8 34 12          mov ax, 0x1234
    // 31 C0             xor ax, ax
    // F4                hlt
    let (mut cpu, mut mem) = vm_with_program(&[0xB8, 0x34, 0x12, 0x31, 0xC0, 0xF4]);
    cpu.run(&mut mem, Some(10)).unwrap();
    assert_eq!(cpu.regs.read_gpr16(GprIndex::Rax as u8), 0);
    assert_ne!(cpu.regs.rflags & z86::flags::ZF, 0);
}

#[test]
fn push_pop_round_trip_preserves_stack_pointer() {
    // BB 00 20          mov bx, 0x2000
    // 89 DC             mov sp, bx      (seed SP inside the mapped region)
    // B8 EF BE          mov ax, 0xBEEF
    // 50                push ax
    // 5B                pop bx
    // F4                hlt
    let program = [
        0xBB, 0x00, 0x20, 0x89, 0xDC, 0xB8, 0xEF, 0xBE, 0x50, 0x5B, 0xF4,
    ];
    let (mut cpu, mut mem) = vm_with_program(&program);
    cpu.run(&mut mem, Some(20)).unwrap();
    assert_eq!(cpu.regs.sp(), 0x2000);
    assert_eq!(cpu.regs.read_gpr16(GprIndex::Rbx as u8), 0xBEEF);
}

#[test]
fn conditional_jump_not_taken_falls_through() {
    // 31 C0             xor ax, ax        (ZF=1, SF=0 -> JL condition false)
    // 7C 02             jl +2             (not taken)
    // B8 01 00          mov ax, 1
    // F4                hlt
    let program = [0x31, 0xC0, 0x7C, 0x02, 0xB8, 0x01, 0x00, 0xF4];
    let (mut cpu, mut mem) = vm_with_program(&program);
    cpu.run(&mut mem, Some(20)).unwrap();
    assert_eq!(cpu.regs.read_gpr16(GprIndex::Rax as u8), 1);
}

#[test]
fn conditional_jump_taken_skips_the_fallthrough() {
    // B0 00             mov al, 0
    // 3C 01             cmp al, 1        (al - 1 < 0 -> CF=1 -> JB taken)
    // 72 03             jb +3
    // B8 FF FF          mov ax, 0xFFFF   (skipped)
    // F4                hlt
    let program = [0xB0, 0x00, 0x3C, 0x01, 0x72, 0x03, 0xB8, 0xFF, 0xFF, 0xF4];
    let (mut cpu, mut mem) = vm_with_program(&program);
    cpu.run(&mut mem, Some(20)).unwrap();
    assert_eq!(cpu.regs.read_gpr16(GprIndex::Rax as u8), 0);
}

#[test]
fn call_then_ret_returns_to_the_instruction_after_call() {
    // BC 00 20          mov sp, 0x2000
    // E8 01 00          call +1           -> targets the mov ax,1 below
    // F4                hlt
    // B8 01 00          mov ax, 1
    // C3                ret
    let program = [
        0xBC, 0x00, 0x20, 0xE8, 0x01, 0x00, 0xF4, 0xB8, 0x01, 0x00, 0xC3,
    ];
    let (mut cpu, mut mem) = vm_with_program(&program);
    cpu.run(&mut mem, Some(20)).unwrap();
    assert_eq!(cpu.regs.read_gpr16(GprIndex::Rax as u8), 1);
    // `ret` pops the return address (6, the instruction after `call`) and
    // lands on the `hlt` at offset 6; `Cpu::step` has already advanced rip
    // past it by the time the run loop reports halted, so the final rip is 7.
    assert_eq!(cpu.regs.rip, 7);
}
