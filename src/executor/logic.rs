//! Bitwise logic instruction handlers: AND, OR, XOR, TEST.

use crate::cpu::Cpu;
use crate::error::Result;
use crate::flags;
use crate::instruction::DecodedInst;
use crate::memory::MemoryBus;

use super::{read_dst, read_src, write_dst};

/// AND: `dst = dst & src`. CF=OF=0, PF/ZF/SF from result.
pub fn exec_and(cpu: &mut Cpu, mem: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<()> {
    let dst = read_dst(cpu, mem, inst)?;
    let src = read_src(cpu, mem, inst)?;
    let result = (dst & src) & inst.operand_size.mask();
    write_dst(cpu, mem, inst, result)?;
    let f = flags::flags_logic(result, inst.operand_size);
    flags::update_flags(&mut cpu.regs.rflags, f);
    Ok(())
}

/// OR: `dst = dst | src`. CF=OF=0, PF/ZF/SF from result.
pub fn exec_or(cpu: &mut Cpu, mem: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<()> {
    let dst = read_dst(cpu, mem, inst)?;
    let src = read_src(cpu, mem, inst)?;
    let result = (dst | src) & inst.operand_size.mask();
    write_dst(cpu, mem, inst, result)?;
    let f = flags::flags_logic(result, inst.operand_size);
    flags::update_flags(&mut cpu.regs.rflags, f);
    Ok(())
}

/// XOR: `dst = dst ^ src`. CF=OF=0, PF/ZF/SF from result.
pub fn exec_xor(cpu: &mut Cpu, mem: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<()> {
    let dst = read_dst(cpu, mem, inst)?;
    let src = read_src(cpu, mem, inst)?;
    let result = (dst ^ src) & inst.operand_size.mask();
    write_dst(cpu, mem, inst, result)?;
    let f = flags::flags_logic(result, inst.operand_size);
    flags::update_flags(&mut cpu.regs.rflags, f);
    Ok(())
}

/// TEST: `dst & src`, flags only, no writeback.
pub fn exec_test(cpu: &mut Cpu, mem: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<()> {
    let dst = read_dst(cpu, mem, inst)?;
    let src = read_src(cpu, mem, inst)?;
    let result = (dst & src) & inst.operand_size.mask();
    let f = flags::flags_logic(result, inst.operand_size);
    flags::update_flags(&mut cpu.regs.rflags, f);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::OperandSize;
    use crate::instruction::{Modifiers, Operand, RegOperand};
    use crate::memory::MemoryController;
    use crate::registers::GprIndex;

    #[test]
    fn xor_self_clears_register_and_sets_zf() {
        let mut cpu = Cpu::new();
        cpu.regs.write_gpr16(GprIndex::Rax as u8, 0x1234);
        let mut mem = MemoryController::new();
        let inst = DecodedInst {
            length: 2,
            opcode_id: 0x31,
            mnemonic: "xor",
            operand_size: OperandSize::Word,
            address_size: OperandSize::Word,
            operands: [
                Operand::Register(RegOperand::Gpr(GprIndex::Rax as u8)),
                Operand::Register(RegOperand::Gpr(GprIndex::Rax as u8)),
                Operand::None,
                Operand::None,
            ],
            operand_count: 2,
            modifiers: Modifiers::default(),
            displacement: 0,
        };
        exec_xor(&mut cpu, &mut mem, &inst).unwrap();
        assert_eq!(cpu.regs.read_gpr16(GprIndex::Rax as u8), 0);
        assert_ne!(cpu.regs.rflags & flags::ZF, 0);
    }

    #[test]
    fn test_does_not_modify_destination() {
        let mut cpu = Cpu::new();
        cpu.regs.write_gpr16(GprIndex::Rax as u8, 0x00FF);
        let mut mem = MemoryController::new();
        let inst = DecodedInst {
            length: 2,
            opcode_id: 0x85,
            mnemonic: "test",
            operand_size: OperandSize::Word,
            address_size: OperandSize::Word,
            operands: [
                Operand::Register(RegOperand::Gpr(GprIndex::Rax as u8)),
                Operand::Immediate { value: 0x00FF, size: OperandSize::Word },
                Operand::None,
                Operand::None,
            ],
            operand_count: 2,
            modifiers: Modifiers::default(),
            displacement: 0,
        };
        exec_test(&mut cpu, &mut mem, &inst).unwrap();
        assert_eq!(cpu.regs.read_gpr16(GprIndex::Rax as u8), 0x00FF);
        assert_eq!(cpu.regs.rflags & flags::ZF, 0);
    }
}
