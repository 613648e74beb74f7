//! Stack instruction handlers: PUSH, POP, PUSHF, POPF.

use crate::cpu::Cpu;
use crate::error::Result;
use crate::flags;
use crate::instruction::DecodedInst;
use crate::memory::MemoryBus;

use super::{pop_val, push_val, read_dst, stack_operand_size, write_dst};

/// PUSH: decrement the stack pointer, then store the operand.
pub fn exec_push(cpu: &mut Cpu, mem: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<()> {
    let size = stack_operand_size(inst);
    let value = read_dst(cpu, mem, inst)?;
    push_val(cpu, mem, value, size)
}

/// POP: load from the stack, then increment the stack pointer.
pub fn exec_pop(cpu: &mut Cpu, mem: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<()> {
    let size = stack_operand_size(inst);
    let value = pop_val(cpu, mem, size)?;
    write_dst(cpu, mem, inst, value)
}

/// PUSHF: push RFLAGS, with VM and RF forced clear in the pushed image.
pub fn exec_pushf(cpu: &mut Cpu, mem: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<()> {
    let size = stack_operand_size(inst);
    let value = (cpu.regs.rflags & !(flags::VM | flags::RF)) & size.mask();
    push_val(cpu, mem, value, size)
}

/// POPF: pop into RFLAGS, keeping the always-1 reserved bits set.
///
/// This core has no CPL/IOPL model, so unlike real hardware POPF never
/// gates IF or IOPL behind a privilege check -- every flag bit the popped
/// value carries is applied.
pub fn exec_popf(cpu: &mut Cpu, mem: &mut dyn MemoryBus, inst: &DecodedInst) -> Result<()> {
    let size = stack_operand_size(inst);
    let popped = pop_val(cpu, mem, size)?;
    let mask = size.mask();
    cpu.regs.rflags = (cpu.regs.rflags & !mask) | (popped & mask);
    cpu.regs.rflags |= flags::RFLAGS_FIXED;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::OperandSize;
    use crate::instruction::{Modifiers, Operand, RegOperand};
    use crate::memory::{MemoryController, RamRegion};
    use crate::registers::GprIndex;

    fn cpu_with_stack() -> (Cpu, MemoryController) {
        let mut cpu = Cpu::new();
        let mut mem = MemoryController::new();
        mem.add_region(0, Box::new(RamRegion::new(0x10000))).unwrap();
        cpu.regs.set_sp(0x2000);
        (cpu, mem)
    }

    #[test]
    fn push_then_pop_round_trips_value() {
        let (mut cpu, mut mem) = cpu_with_stack();
        cpu.regs.write_gpr16(GprIndex::Rax as u8, 0xBEEF);
        let push_inst = DecodedInst {
            length: 1,
            opcode_id: 0x50,
            mnemonic: "push",
            operand_size: OperandSize::Word,
            address_size: OperandSize::Word,
            operands: [
                Operand::Register(RegOperand::Gpr(GprIndex::Rax as u8)),
                Operand::None,
                Operand::None,
                Operand::None,
            ],
            operand_count: 1,
            modifiers: Modifiers::default(),
            displacement: 0,
        };
        exec_push(&mut cpu, &mut mem, &push_inst).unwrap();
        assert_eq!(cpu.regs.sp(), 0x1FFE);

        let pop_inst = DecodedInst {
            length: 1,
            opcode_id: 0x58,
            mnemonic: "pop",
            operand_size: OperandSize::Word,
            address_size: OperandSize::Word,
            operands: [
                Operand::Register(RegOperand::Gpr(GprIndex::Rbx as u8)),
                Operand::None,
                Operand::None,
                Operand::None,
            ],
            operand_count: 1,
            modifiers: Modifiers::default(),
            displacement: 0,
        };
        exec_pop(&mut cpu, &mut mem, &pop_inst).unwrap();
        assert_eq!(cpu.regs.sp(), 0x2000);
        assert_eq!(cpu.regs.read_gpr16(GprIndex::Rbx as u8), 0xBEEF);
    }

    #[test]
    fn pushf_clears_vm_and_rf_in_pushed_image() {
        let (mut cpu, mut mem) = cpu_with_stack();
        cpu.regs.rflags = flags::VM | flags::RF | flags::ZF | flags::RFLAGS_FIXED;
        let inst = DecodedInst {
            length: 1,
            opcode_id: 0x9C,
            mnemonic: "pushf",
            operand_size: OperandSize::Word,
            address_size: OperandSize::Word,
            operands: [Operand::None, Operand::None, Operand::None, Operand::None],
            operand_count: 0,
            modifiers: Modifiers::default(),
            displacement: 0,
        };
        exec_pushf(&mut cpu, &mut mem, &inst).unwrap();
        let popped = pop_val(&mut cpu, &mem, OperandSize::Word).unwrap();
        assert_eq!(popped & flags::VM, 0);
        assert_eq!(popped & flags::RF, 0);
        assert_ne!(popped & flags::ZF, 0);
    }
}
