//! CPU state and the fetch-decode-execute loop.
//!
//! `Cpu` owns architectural state only (registers, mode, the segmentation +
//! paging pipeline); guest memory is owned by the caller and threaded
//! through as a [`MemoryBus`] on every step, the same split the executor
//! handlers use.

use crate::decoder::{self, ByteSource};
use crate::error::Result;
use crate::executor;
use crate::memory::{MemoryBus, MemoryPipeline};
use crate::registers::{RegisterFile, SegReg};

/// CPU execution mode, driving operand/address size defaults and segment
/// loading semantics. There is no mode-transition machinery here (no
/// CR0/EFER modeling) -- a caller sets `cpu.mode` directly when it wants to
/// simulate having already entered protected or long mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// 16-bit real mode (power-on default).
    Real,
    /// 32-bit protected mode.
    Protected,
    /// 64-bit long mode.
    Long,
}

/// Why [`Cpu::run`] stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// HLT executed.
    Halted,
    /// The instruction-count limit passed to `run` was reached.
    InstructionLimit,
    /// `request_stop` was called from outside the loop.
    StopRequested,
}

/// The virtual CPU. Holds registers, current mode, and the
/// segmentation/paging translation stage; does not own guest memory.
pub struct Cpu {
    pub regs: RegisterFile,
    pub pipeline: MemoryPipeline,
    pub mode: Mode,
    pub instruction_count: u64,
    halted: bool,
    stop_requested: bool,
}

impl Cpu {
    /// Build a CPU in its power-on reset state.
    pub fn new() -> Self {
        Cpu {
            regs: RegisterFile::new(),
            pipeline: MemoryPipeline::new(),
            mode: Mode::Real,
            instruction_count: 0,
            halted: false,
            stop_requested: false,
        }
    }

    /// Reset to power-on state: registers back to their architectural
    /// defaults, mode back to real mode, run-state flags cleared.
    pub fn reset(&mut self) {
        self.regs = RegisterFile::new();
        self.pipeline = MemoryPipeline::new();
        self.mode = Mode::Real;
        self.instruction_count = 0;
        self.halted = false;
        self.stop_requested = false;
    }

    /// Ask the run loop to stop at the next instruction boundary.
    pub fn request_stop(&mut self) {
        self.stop_requested = true;
    }

    /// Whether the CPU is halted (HLT executed since the last reset/run).
    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Fetch, decode, and execute exactly one instruction.
    pub fn step(&mut self, mem: &mut dyn MemoryBus) -> Result<()> {
        let phys_base = self.pipeline.translate(&self.regs, SegReg::Cs, self.regs.rip)?;
        let inst = {
            let mem_ref: &dyn MemoryBus = &*mem;
            let mut cursor = FetchCursor {
                mem: mem_ref,
                base: phys_base,
                pos: 0,
            };
            decoder::decode(&mut cursor, self.mode)?
        };
        self.regs.rip = self.regs.rip.wrapping_add(inst.length as u64);
        self.instruction_count += 1;
        executor::execute(self, mem, &inst)
    }

    /// Run until HLT, an instruction-count limit, or a stop request.
    /// `max_instructions = None` means unbounded.
    pub fn run(&mut self, mem: &mut dyn MemoryBus, max_instructions: Option<u64>) -> Result<ExitReason> {
        self.halted = false;
        self.stop_requested = false;
        loop {
            if self.stop_requested {
                return Ok(ExitReason::StopRequested);
            }
            if let Some(max) = max_instructions {
                if self.instruction_count >= max {
                    return Ok(ExitReason::InstructionLimit);
                }
            }
            self.step(mem)?;
            if self.halted {
                return Ok(ExitReason::Halted);
            }
        }
    }

    /// Called by the HLT handler.
    pub(crate) fn halt(&mut self) {
        self.halted = true;
    }
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}

/// Adapts a physical base address plus a running offset into the
/// decoder's [`ByteSource`]. Each `step` builds one of these over the
/// instruction's starting `CS:IP` physical address.
struct FetchCursor<'m> {
    mem: &'m dyn MemoryBus,
    base: u64,
    pos: u64,
}

impl ByteSource for FetchCursor<'_> {
    fn peek(&mut self) -> Result<u8> {
        self.mem.read_u8(self.base.wrapping_add(self.pos))
    }
    fn pop(&mut self) -> Result<u8> {
        let b = self.peek()?;
        self.pos += 1;
        Ok(b)
    }
    fn position(&self) -> u64 {
        self.pos
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryController, RamRegion};

    fn vm_with_program(bytes: &[u8]) -> (Cpu, MemoryController) {
        let mut cpu = Cpu::new();
        let mut mem = MemoryController::new();
        mem.add_region(0, Box::new(RamRegion::new(0x10000))).unwrap();
        // CS:IP resets to F000:FFF0 -> physical 0xFFFF0; point CS at 0 so a
        // short test program can live at IP 0 instead.
        cpu.regs.load_segment_real(SegReg::Cs, 0);
        cpu.regs.rip = 0;
        mem.write_bytes(0, bytes).unwrap();
        (cpu, mem)
    }

    #[test]
    fn hlt_stops_the_run_loop() {
        let (mut cpu, mut mem) = vm_with_program(&[0xF4]);
        let reason = cpu.run(&mut mem, Some(10)).unwrap();
        assert_eq!(reason, ExitReason::Halted);
        assert_eq!(cpu.instruction_count, 1);
    }

    #[test]
    fn instruction_limit_stops_an_infinite_loop() {
        // EB FE = JMP $-0 (jump to self): an infinite loop.
        let (mut cpu, mut mem) = vm_with_program(&[0xEB, 0xFE]);
        let reason = cpu.run(&mut mem, Some(5)).unwrap();
        assert_eq!(reason, ExitReason::InstructionLimit);
        assert_eq!(cpu.instruction_count, 5);
    }

    #[test]
    fn reset_clears_halted_state() {
        let (mut cpu, mut mem) = vm_with_program(&[0xF4]);
        cpu.run(&mut mem, Some(10)).unwrap();
        assert!(cpu.is_halted());
        cpu.reset();
        assert!(!cpu.is_halted());
        assert_eq!(cpu.regs.rip, 0xFFF0);
    }
}
