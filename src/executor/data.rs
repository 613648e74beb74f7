//! Data movement instruction handlers: MOV, XCHG, SAHF, LAHF.

use crate::cpu::Cpu;
use crate::error::Result;
use crate::flags;
use crate::instruction::DecodedInst;
use crate::memory::MemoryBus;
use crate::registers::GprIndex;

use super::{read_dst, read_src, with_lock, write_dst};

/// MOV: simple data transfer. No flags modified.
///
/// Covers every MOV encoding the decoder produces (register/memory,
/// moffs, and the immediate forms) -- they all reduce to "read operand 1,
/// write operand 0" once the decoder has sized both sides.
pub fn exec_mov(cpu: &mut Cpu, mem: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<()> {
    let src = read_src(cpu, mem, inst)?;
    write_dst(cpu, mem, inst, src)
}

/// XCHG: swap two operands. No flags modified.
///
/// Asserts the bus lock for the duration of the swap unconditionally, not
/// only when a `LOCK` prefix is present -- matching real hardware, which
/// always treats `XCHG` with a memory operand as a locked access.
pub fn exec_xchg(cpu: &mut Cpu, mem: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<()> {
    with_lock(mem, |mem| {
        let dst = read_dst(cpu, mem, inst)?;
        let src = read_src(cpu, mem, inst)?;
        write_dst(cpu, mem, inst, src)?;
        crate::operand::write_operand_sized(
            cpu,
            mem,
            inst.src(),
            inst.operand_size,
            inst.modifiers.has_rex(),
            dst,
        )
    })
}

/// SAHF: load SF:ZF:0:AF:0:PF:1:CF from AH into the low byte of RFLAGS.
pub fn exec_sahf(cpu: &mut Cpu) -> Result<()> {
    let ah = cpu.regs.read_gpr8(4, false);
    let mask = flags::SF | flags::ZF | flags::AF | flags::PF | flags::CF;
    cpu.regs.rflags = (cpu.regs.rflags & !mask) | ((ah as u64) & mask);
    cpu.regs.rflags |= flags::RFLAGS_FIXED;
    Ok(())
}

/// LAHF: store the low byte of RFLAGS into AH.
pub fn exec_lahf(cpu: &mut Cpu) -> Result<()> {
    let byte = (cpu.regs.rflags & 0xFF) as u8;
    cpu.regs.write_gpr8(4, false, byte);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::OperandSize;
    use crate::instruction::{Modifiers, Operand, RegOperand};
    use crate::memory::MemoryController;

    #[test]
    fn mov_copies_immediate_into_register() {
        let mut cpu = Cpu::new();
        let mut mem = MemoryController::new();
        let inst = DecodedInst {
            length: 3,
            opcode_id: 0xB8,
            mnemonic: "mov",
            operand_size: OperandSize::Word,
            address_size: OperandSize::Word,
            operands: [
                Operand::Register(RegOperand::Gpr(GprIndex::Rax as u8)),
                Operand::Immediate { value: 0x1234, size: OperandSize::Word },
                Operand::None,
                Operand::None,
            ],
            operand_count: 2,
            modifiers: Modifiers::default(),
            displacement: 0,
        };
        exec_mov(&mut cpu, &mut mem, &inst).unwrap();
        assert_eq!(cpu.regs.read_gpr16(GprIndex::Rax as u8), 0x1234);
    }

    #[test]
    fn xchg_swaps_both_registers() {
        let mut cpu = Cpu::new();
        cpu.regs.write_gpr16(GprIndex::Rax as u8, 1);
        cpu.regs.write_gpr16(GprIndex::Rbx as u8, 2);
        let mut mem = MemoryController::new();
        let inst = DecodedInst {
            length: 2,
            opcode_id: 0x93,
            mnemonic: "xchg",
            operand_size: OperandSize::Word,
            address_size: OperandSize::Word,
            operands: [
                Operand::Register(RegOperand::Gpr(GprIndex::Rax as u8)),
                Operand::Register(RegOperand::Gpr(GprIndex::Rbx as u8)),
                Operand::None,
                Operand::None,
            ],
            operand_count: 2,
            modifiers: Modifiers::default(),
            displacement: 0,
        };
        exec_xchg(&mut cpu, &mut mem, &inst).unwrap();
        assert_eq!(cpu.regs.read_gpr16(GprIndex::Rax as u8), 2);
        assert_eq!(cpu.regs.read_gpr16(GprIndex::Rbx as u8), 1);
    }

    #[test]
    fn lahf_then_sahf_round_trips_flags() {
        let mut cpu = Cpu::new();
        cpu.regs.rflags = flags::ZF | flags::CF | flags::RFLAGS_FIXED;
        exec_lahf(&mut cpu).unwrap();
        cpu.regs.rflags = 0;
        exec_sahf(&mut cpu).unwrap();
        assert_ne!(cpu.regs.rflags & flags::ZF, 0);
        assert_ne!(cpu.regs.rflags & flags::CF, 0);
    }
}
