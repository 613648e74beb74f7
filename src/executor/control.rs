//! Control flow instruction handlers: JMP, Jcc, JCXZ, CALL, RET, RETF.
//!
//! Every branch here reads `cpu.regs.rip` as "address of the next
//! sequential instruction" -- `Cpu::step` has already advanced it past the
//! current instruction's bytes before calling into the executor.

use crate::cpu::Cpu;
use crate::error::{Result, VmError};
use crate::flags;
use crate::instruction::{DecodedInst, Operand};
use crate::memory::MemoryBus;
use crate::operand;
use crate::registers::{GprIndex, SegReg};

use super::{
    branch_target, mask_target, pop_val, push_val, read_far_indirect, stack_operand_size,
};

fn branch_offset(cpu: &Cpu, op: &Operand) -> Result<i64> {
    match op {
        Operand::RelativeOffset(off) => Ok(*off),
        _ => Err(VmError::InvalidOperandKind { ip: cpu.regs.rip }),
    }
}

/// JMP: relative, near-indirect, or far-indirect depending on the decoded
/// operand shape (the decoder reuses the `jmp` mnemonic for all three).
pub fn exec_jmp(cpu: &mut Cpu, mem: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<()> {
    match inst.dst() {
        Operand::RelativeOffset(off) => {
            cpu.regs.rip = branch_target(cpu, *off);
            Ok(())
        }
        Operand::FarPointer { segment, offset } => {
            jump_far(cpu, mem, *segment, *offset)
        }
        _ => {
            let target = operand::read_operand_sized(
                cpu,
                mem,
                inst.dst(),
                inst.operand_size,
                inst.modifiers.has_rex(),
            )?;
            cpu.regs.rip = mask_target(cpu.mode, target);
            Ok(())
        }
    }
}

/// JMP far, indirect through a memory operand (Group 5 `/5`).
pub fn exec_jmp_far_indirect(
    cpu: &mut Cpu,
    mem: &mut dyn MemoryBus,
    inst: &DecodedInst,
) -> Result<()> {
    let (selector, offset) = read_far_indirect(cpu, mem, inst.dst(), inst.operand_size)?;
    jump_far(cpu, mem, selector, offset)
}

fn jump_far(cpu: &mut Cpu, mem: &mut dyn MemoryBus, selector: u16, offset: u64) -> Result<()> {
    crate::memory::segment::load(&mut cpu.regs, mem, cpu.mode, SegReg::Cs, selector);
    cpu.regs.rip = mask_target(cpu.mode, offset);
    Ok(())
}

/// Jcc: branch if the condition encoded in the low nibble of `opcode_id`
/// holds against the current RFLAGS.
pub fn exec_jcc(cpu: &mut Cpu, inst: &DecodedInst) -> Result<()> {
    let cc = (inst.opcode_id as u8) & 0x0F;
    if flags::eval_cc(cc, cpu.regs.rflags) {
        let off = branch_offset(cpu, inst.dst())?;
        cpu.regs.rip = branch_target(cpu, off);
    }
    Ok(())
}

/// JCXZ/JECXZ/JRCXZ: branch if the address-size-appropriate counter
/// register is zero.
pub fn exec_jcxz(cpu: &mut Cpu, inst: &DecodedInst) -> Result<()> {
    let counter = cpu
        .regs
        .read_gpr(GprIndex::Rcx as u8, inst.address_size, inst.modifiers.has_rex());
    if counter == 0 {
        let off = branch_offset(cpu, inst.dst())?;
        cpu.regs.rip = branch_target(cpu, off);
    }
    Ok(())
}

/// CALL: relative, near-indirect, or far-immediate, mirroring `exec_jmp`'s
/// dispatch on the decoded operand shape.
pub fn exec_call(cpu: &mut Cpu, mem: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<()> {
    let size = stack_operand_size(inst);
    match inst.dst() {
        Operand::RelativeOffset(off) => {
            let target = branch_target(cpu, *off);
            push_val(cpu, mem, cpu.regs.rip, size)?;
            cpu.regs.rip = target;
            Ok(())
        }
        Operand::FarPointer { segment, offset } => {
            call_far(cpu, mem, size, *segment, *offset)
        }
        _ => {
            let target = operand::read_operand_sized(
                cpu,
                mem,
                inst.dst(),
                inst.operand_size,
                inst.modifiers.has_rex(),
            )?;
            let target = mask_target(cpu.mode, target);
            push_val(cpu, mem, cpu.regs.rip, size)?;
            cpu.regs.rip = target;
            Ok(())
        }
    }
}

/// CALL far, indirect through a memory operand (Group 5 `/3`).
pub fn exec_call_far_indirect(
    cpu: &mut Cpu,
    mem: &mut dyn MemoryBus,
    inst: &DecodedInst,
) -> Result<()> {
    let size = stack_operand_size(inst);
    let (selector, offset) = read_far_indirect(cpu, mem, inst.dst(), inst.operand_size)?;
    call_far(cpu, mem, size, selector, offset)
}

fn call_far(
    cpu: &mut Cpu,
    mem: &mut dyn MemoryBus,
    size: flags::OperandSize,
    selector: u16,
    offset: u64,
) -> Result<()> {
    let old_cs = cpu.regs.segment(SegReg::Cs).selector as u64;
    let return_rip = cpu.regs.rip;
    push_val(cpu, mem, old_cs, size)?;
    push_val(cpu, mem, return_rip, size)?;
    crate::memory::segment::load(&mut cpu.regs, mem, cpu.mode, SegReg::Cs, selector);
    cpu.regs.rip = mask_target(cpu.mode, offset);
    Ok(())
}

/// RET near, with an optional imm16 stack-pointer adjustment.
pub fn exec_ret(cpu: &mut Cpu, mem: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<()> {
    let size = stack_operand_size(inst);
    let rip = pop_val(cpu, mem, size)?;
    if let Operand::Immediate { value, .. } = inst.dst() {
        let sp = cpu.regs.sp().wrapping_add(*value);
        cpu.regs.set_sp(sp);
    }
    cpu.regs.rip = mask_target(cpu.mode, rip);
    Ok(())
}

/// RETF: pop RIP, then pop CS at the same operand size and reload its
/// descriptor, then apply any imm16 stack adjustment.
pub fn exec_retf(cpu: &mut Cpu, mem: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<()> {
    let size = stack_operand_size(inst);
    let rip = pop_val(cpu, mem, size)?;
    let cs = pop_val(cpu, mem, size)? as u16;
    if let Operand::Immediate { value, .. } = inst.dst() {
        let sp = cpu.regs.sp().wrapping_add(*value);
        cpu.regs.set_sp(sp);
    }
    crate::memory::segment::load(&mut cpu.regs, mem, cpu.mode, SegReg::Cs, cs);
    cpu.regs.rip = mask_target(cpu.mode, rip);
    Ok(())
}
