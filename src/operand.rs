//! Operand sizing and resolution.
//!
//! Shared between the decoder (which needs operand/address size before it
//! can read a ModR/M's displacement or immediate) and the executor (which
//! needs to turn a decoded [`Operand`] into a value, or write a value back
//! into one). Keeping both here avoids the two copies drifting apart.

use crate::cpu::{Cpu, Mode};
use crate::error::{Result, VmError};
use crate::flags::OperandSize;
use crate::instruction::{MemOperand, Modifiers, Operand, RegOperand};
use crate::memory::MemoryBus;
use crate::registers::SegReg;

/// Resolve the effective operand size for an instruction.
///
/// - Real mode: 16-bit, unless the 0x66 prefix flips it to 32.
/// - Protected mode: 32-bit, unless 0x66 flips it to 16 (CS.D assumed 1;
///   16-bit default code segments are not modeled).
/// - Long mode: 32-bit by default, 16-bit under 0x66, 64-bit under REX.W,
///   or a fixed 64-bit for opcodes that default to it regardless of REX.W
///   (near branches, stack operations) when `default_64` is set.
pub fn operand_size(mode: Mode, modifiers: &Modifiers, default_64: bool) -> OperandSize {
    match mode {
        Mode::Real => {
            if modifiers.operand_size_override {
                OperandSize::Dword
            } else {
                OperandSize::Word
            }
        }
        Mode::Protected => {
            if modifiers.operand_size_override {
                OperandSize::Word
            } else {
                OperandSize::Dword
            }
        }
        Mode::Long => {
            if modifiers.rex_w() || default_64 {
                OperandSize::Qword
            } else if modifiers.operand_size_override {
                OperandSize::Word
            } else {
                OperandSize::Dword
            }
        }
    }
}

/// Resolve the effective address size for an instruction's memory operands.
pub fn address_size(mode: Mode, modifiers: &Modifiers) -> OperandSize {
    match mode {
        Mode::Real => {
            if modifiers.address_size_override {
                OperandSize::Dword
            } else {
                OperandSize::Word
            }
        }
        Mode::Protected => {
            if modifiers.address_size_override {
                OperandSize::Word
            } else {
                OperandSize::Dword
            }
        }
        Mode::Long => {
            if modifiers.address_size_override {
                OperandSize::Dword
            } else {
                OperandSize::Qword
            }
        }
    }
}

/// Compute the linear effective address of a memory operand (base + scaled
/// index + displacement), not yet translated through segmentation/paging.
/// Base/index registers are always read at full 64-bit width regardless of
/// addressing mode -- the upper bits are simply zero for 16/32-bit
/// addressing, since `write_gpr32` zero-extends and 16-bit writes preserve
/// upper bits that reset already cleared to zero.
///
/// The sum is masked to the current mode's default address width before
/// being returned, so a 16-bit computation (e.g. `base=0xFFFF,
/// disp=0x10`) wraps within the segment instead of leaking into the upper
/// bits of the linear address.
pub fn effective_address(cpu: &Cpu, mem: &MemOperand) -> u64 {
    let mut addr: u64 = 0;
    if let Some(base) = mem.base {
        addr = addr.wrapping_add(cpu.regs.read_gpr(base, OperandSize::Qword, true));
    }
    if let Some(index) = mem.index {
        let scaled = cpu
            .regs
            .read_gpr(index, OperandSize::Qword, true)
            .wrapping_mul(mem.scale as u64);
        addr = addr.wrapping_add(scaled);
    }
    let addr = addr.wrapping_add(mem.displacement as u64);
    addr & mode_address_mask(cpu.mode)
}

fn mode_address_mask(mode: Mode) -> u64 {
    match mode {
        Mode::Real => 0xFFFF,
        Mode::Protected => 0xFFFF_FFFF,
        Mode::Long => u64::MAX,
    }
}

/// Read an operand at an explicit width (register operands don't carry
/// their own width, so the caller always supplies the instruction's
/// `operand_size`; memory/immediate operands already know their own size
/// but are still read at `size` for consistency with Group1-style opcodes
/// where the destination's size governs the access).
pub fn read_operand_sized(
    cpu: &Cpu,
    mem_bus: &dyn MemoryBus,
    op: &Operand,
    size: OperandSize,
    has_rex: bool,
) -> Result<u64> {
    match op {
        Operand::Register(RegOperand::Gpr(idx)) => Ok(cpu.regs.read_gpr(*idx, size, has_rex)),
        Operand::Register(RegOperand::Seg(seg)) => Ok(cpu.regs.segment(*seg).selector as u64),
        Operand::Memory(mem) => {
            let linear = effective_address(cpu, mem);
            let phys = cpu.pipeline.translate(&cpu.regs, mem.segment, linear)?;
            read_sized(mem_bus, phys, size)
        }
        Operand::Immediate { value, .. } => Ok(*value & size.mask()),
        Operand::RelativeOffset(v) => Ok(*v as u64),
        Operand::FarPointer { offset, .. } => Ok(*offset),
        Operand::FarPointerIndirect(mem) => {
            let linear = effective_address(cpu, mem);
            let phys = cpu.pipeline.translate(&cpu.regs, mem.segment, linear)?;
            read_sized(mem_bus, phys, size)
        }
        Operand::None => Err(VmError::InvalidOperandKind { ip: cpu.regs.rip }),
    }
}

/// Write a value to an operand at an explicit width. Only register and
/// memory operands are valid write targets.
pub fn write_operand_sized(
    cpu: &mut Cpu,
    mem_bus: &mut dyn MemoryBus,
    op: &Operand,
    size: OperandSize,
    has_rex: bool,
    value: u64,
) -> Result<()> {
    match op {
        Operand::Register(RegOperand::Gpr(idx)) => {
            cpu.regs.write_gpr(*idx, size, has_rex, value);
            Ok(())
        }
        Operand::Register(RegOperand::Seg(seg)) => {
            let mode = cpu.mode;
            crate::memory::segment::load(&mut cpu.regs, mem_bus, mode, *seg, value as u16);
            Ok(())
        }
        Operand::Memory(mem) => {
            let linear = effective_address(cpu, mem);
            let phys = cpu.pipeline.translate(&cpu.regs, mem.segment, linear)?;
            write_sized(mem_bus, phys, size, value)
        }
        _ => Err(VmError::InvalidOperandKind { ip: cpu.regs.rip }),
    }
}

fn read_sized(mem_bus: &dyn MemoryBus, addr: u64, size: OperandSize) -> Result<u64> {
    Ok(match size {
        OperandSize::Byte => mem_bus.read_u8(addr)? as u64,
        OperandSize::Word => mem_bus.read_u16(addr)? as u64,
        OperandSize::Dword => mem_bus.read_u32(addr)? as u64,
        OperandSize::Qword => mem_bus.read_u64(addr)?,
    })
}

fn write_sized(mem_bus: &mut dyn MemoryBus, addr: u64, size: OperandSize, value: u64) -> Result<()> {
    match size {
        OperandSize::Byte => mem_bus.write_u8(addr, value as u8),
        OperandSize::Word => mem_bus.write_u16(addr, value as u16),
        OperandSize::Dword => mem_bus.write_u32(addr, value as u32),
        OperandSize::Qword => mem_bus.write_u64(addr, value),
    }
}
