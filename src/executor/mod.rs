//! Top-level instruction executor and dispatch.
//!
//! [`execute`] is the entry point called once per step by `Cpu::step`. RIP
//! has already been advanced past the instruction by the caller, so no
//! handler here ever adds `inst.length`; branch/call/return handlers treat
//! `cpu.regs.rip` on entry as "the address of the next sequential
//! instruction" and only overwrite it when control actually transfers.

pub mod arith;
pub mod control;
pub mod data;
pub mod logic;
pub mod stack;

use crate::cpu::{Cpu, Mode};
use crate::error::{Result, VmError};
use crate::flags::{self, OperandSize};
use crate::instruction::{DecodedInst, Operand};
use crate::memory::MemoryBus;
use crate::operand;
use crate::registers::SegReg;

/// Execute a single decoded instruction.
///
/// # Errors
///
/// Returns a `VmError` if the instruction has no handler (`ud`, or a
/// mnemonic this core doesn't implement) or a memory access faults.
///
/// `XCHG` asserts the bus lock unconditionally for its duration (see
/// `executor::data::exec_xchg`); any other `LOCK`-prefixed instruction
/// asserts it here, around the whole dispatch.
pub fn execute(cpu: &mut Cpu, mem: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<()> {
    if inst.modifiers.lock && inst.mnemonic != "xchg" {
        return with_lock(mem, |mem| dispatch(cpu, mem, inst));
    }
    dispatch(cpu, mem, inst)
}

fn dispatch(cpu: &mut Cpu, mem: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<()> {
    match inst.mnemonic {
        "add" => arith::exec_add(cpu, mem, inst),
        "adc" => arith::exec_adc(cpu, mem, inst),
        "sub" => arith::exec_sub(cpu, mem, inst),
        "sbb" => arith::exec_sbb(cpu, mem, inst),
        "cmp" => arith::exec_cmp(cpu, mem, inst),
        "inc" => arith::exec_inc(cpu, mem, inst),
        "dec" => arith::exec_dec(cpu, mem, inst),
        "aaa" => arith::exec_aaa(cpu),
        "aas" => arith::exec_aas(cpu),
        "aam" => arith::exec_aam(cpu, inst),
        "aad" => arith::exec_aad(cpu, inst),
        "daa" => arith::exec_daa(cpu),
        "das" => arith::exec_das(cpu),

        "and" => logic::exec_and(cpu, mem, inst),
        "or" => logic::exec_or(cpu, mem, inst),
        "xor" => logic::exec_xor(cpu, mem, inst),
        "test" => logic::exec_test(cpu, mem, inst),

        "mov" => data::exec_mov(cpu, mem, inst),
        "xchg" => data::exec_xchg(cpu, mem, inst),
        "sahf" => data::exec_sahf(cpu),
        "lahf" => data::exec_lahf(cpu),

        "push" => stack::exec_push(cpu, mem, inst),
        "pop" => stack::exec_pop(cpu, mem, inst),
        "pushf" => stack::exec_pushf(cpu, mem, inst),
        "popf" => stack::exec_popf(cpu, mem, inst),

        "jcc" => control::exec_jcc(cpu, inst),
        "jcxz" => control::exec_jcxz(cpu, inst),
        "jmp" => control::exec_jmp(cpu, mem, inst),
        "jmpf" => control::exec_jmp_far_indirect(cpu, mem, inst),
        "call" => control::exec_call(cpu, mem, inst),
        "callf" => control::exec_call_far_indirect(cpu, mem, inst),
        "ret" => control::exec_ret(cpu, mem, inst),
        "retf" => control::exec_retf(cpu, mem, inst),
        "hlt" => {
            cpu.halt();
            Ok(())
        }

        "nop" => Ok(()),
        "clc" => {
            cpu.regs.rflags &= !flags::CF;
            Ok(())
        }
        "stc" => {
            cpu.regs.rflags |= flags::CF;
            Ok(())
        }
        "cmc" => {
            cpu.regs.rflags ^= flags::CF;
            Ok(())
        }
        "cli" => {
            cpu.regs.rflags &= !flags::IF;
            Ok(())
        }
        "sti" => {
            cpu.regs.rflags |= flags::IF;
            Ok(())
        }
        "cld" => {
            cpu.regs.rflags &= !flags::DF;
            Ok(())
        }
        "std" => {
            cpu.regs.rflags |= flags::DF;
            Ok(())
        }

        _ => Err(VmError::InvalidOpcode {
            opcode_id: inst.opcode_id,
            mnemonic: inst.mnemonic.to_string(),
            ip: cpu.regs.rip,
        }),
    }
}

/// Assert the bus lock for the duration of `f`, releasing it whether `f`
/// succeeds or faults partway through.
pub(crate) fn with_lock<T>(
    mem: &mut dyn MemoryBus,
    f: impl FnOnce(&mut dyn MemoryBus) -> Result<T>,
) -> Result<T> {
    mem.lock();
    let result = f(mem);
    mem.unlock();
    result
}

/// Read operand 0 ("destination") at the instruction's operand size.
pub(crate) fn read_dst(cpu: &Cpu, mem: &dyn MemoryBus, inst: &DecodedInst) -> Result<u64> {
    operand::read_operand_sized(cpu, mem, inst.dst(), inst.operand_size, inst.modifiers.has_rex())
}

/// Read operand 1 ("source") at the instruction's operand size.
pub(crate) fn read_src(cpu: &Cpu, mem: &dyn MemoryBus, inst: &DecodedInst) -> Result<u64> {
    operand::read_operand_sized(cpu, mem, inst.src(), inst.operand_size, inst.modifiers.has_rex())
}

/// Write `value` back to operand 0 at the instruction's operand size.
pub(crate) fn write_dst(
    cpu: &mut Cpu,
    mem: &mut dyn MemoryBus,
    inst: &DecodedInst,
    value: u64,
) -> Result<()> {
    operand::write_operand_sized(
        cpu,
        mem,
        inst.dst(),
        inst.operand_size,
        inst.modifiers.has_rex(),
        value,
    )
}

/// Mask a branch/call target to the address width implied by the current
/// mode (16-bit IP in real mode, 32-bit EIP in protected mode, full 64-bit
/// RIP in long mode -- CS.D is not modeled separately from the CPU mode).
pub(crate) fn mask_target(mode: Mode, value: u64) -> u64 {
    match mode {
        Mode::Real => value & 0xFFFF,
        Mode::Protected => value & 0xFFFF_FFFF,
        Mode::Long => value,
    }
}

/// Compute a relative branch target from the already-advanced `cpu.regs.rip`.
pub(crate) fn branch_target(cpu: &Cpu, rel: i64) -> u64 {
    mask_target(cpu.mode, cpu.regs.rip.wrapping_add(rel as u64))
}

/// Read the indirect target of a Group 5 far call/jmp (`callf`/`jmpf`):
/// offset first, at `size`, then a 16-bit selector immediately after it.
/// Only a memory operand is architecturally valid here.
pub(crate) fn read_far_indirect(
    cpu: &Cpu,
    mem: &dyn MemoryBus,
    op: &Operand,
    size: OperandSize,
) -> Result<(u16, u64)> {
    match op {
        Operand::Memory(m) => {
            let linear = operand::effective_address(cpu, m);
            let phys = cpu.pipeline.translate(&cpu.regs, m.segment, linear)?;
            let offset = match size {
                OperandSize::Word => mem.read_u16(phys)? as u64,
                OperandSize::Dword => mem.read_u32(phys)? as u64,
                _ => mem.read_u64(phys)?,
            };
            let sel_addr = phys.wrapping_add(size.bytes() as u64);
            let selector = mem.read_u16(sel_addr)?;
            Ok((selector, offset))
        }
        _ => Err(VmError::InvalidOperandKind { ip: cpu.regs.rip }),
    }
}

/// Push `value` onto the stack at `size`, decrementing RSP/ESP/SP first.
pub(crate) fn push_val(
    cpu: &mut Cpu,
    mem: &mut dyn MemoryBus,
    value: u64,
    size: OperandSize,
) -> Result<()> {
    let new_sp = cpu.regs.sp().wrapping_sub(size.bytes() as u64);
    cpu.regs.set_sp(new_sp & stack_addr_mask(cpu.mode));
    let phys = cpu.pipeline.translate(&cpu.regs, SegReg::Ss, cpu.regs.sp())?;
    match size {
        OperandSize::Word => mem.write_u16(phys, value as u16),
        OperandSize::Dword => mem.write_u32(phys, value as u32),
        _ => mem.write_u64(phys, value),
    }
}

/// Pop a value of `size` off the stack, incrementing RSP/ESP/SP after.
pub(crate) fn pop_val(cpu: &mut Cpu, mem: &dyn MemoryBus, size: OperandSize) -> Result<u64> {
    let phys = cpu.pipeline.translate(&cpu.regs, SegReg::Ss, cpu.regs.sp())?;
    let value = match size {
        OperandSize::Word => mem.read_u16(phys)? as u64,
        OperandSize::Dword => mem.read_u32(phys)? as u64,
        _ => mem.read_u64(phys)?,
    };
    let new_sp = cpu.regs.sp().wrapping_add(size.bytes() as u64);
    cpu.regs.set_sp(new_sp & stack_addr_mask(cpu.mode));
    Ok(value)
}

fn stack_addr_mask(mode: Mode) -> u64 {
    match mode {
        Mode::Real => 0xFFFF,
        Mode::Protected => 0xFFFF_FFFF,
        Mode::Long => u64::MAX,
    }
}

/// The operand size that PUSH/POP/CALL/RET use for the stack slot itself:
/// follows the instruction's operand size, defaulting to stack width in
/// 64-bit mode where pushes/pops are always 64-bit unless a 66h prefix
/// requests 16-bit (the decoder already reflects this in `operand_size`).
pub(crate) fn stack_operand_size(inst: &DecodedInst) -> OperandSize {
    inst.operand_size
}
