//! `z86` command-line entry point.
//!
//! ```text
//! z86 --rom <path> --program <path>
//! ```
//!
//! Loads a ROM image at physical `0xFFFF0000` and a program image at the
//! conventional boot-sector address `0x7C00`, then runs the CPU from its
//! power-on reset state until HLT or a fatal error.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use z86::{Cpu, ExitReason, MemoryBus, MemoryController, RamRegion, RomRegion};

/// 1 MiB of conventional RAM, mapped at physical address 0.
const RAM_SIZE: u64 = 1 << 20;
/// Physical base of the ROM region (top of the 32-bit address space minus 64 KiB).
const ROM_BASE: u64 = 0xFFFF_0000;
/// Conventional boot-sector load address for the program image.
const PROGRAM_BASE: u64 = 0x7C00;

#[derive(Parser, Debug)]
#[command(name = "z86", about = "A software emulator of an x86-family processor")]
struct Args {
    /// Path to the ROM image, mapped read-only at 0xFFFF0000.
    #[arg(long)]
    rom: PathBuf,

    /// Path to the program image, loaded at physical 0x7C00.
    #[arg(long)]
    program: PathBuf,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if let Err(err) = run() {
        error!("{err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args = Args::parse();

    let rom_bytes = fs::read(&args.rom)
        .with_context(|| format!("reading rom image {:?}", args.rom))?;
    if rom_bytes.is_empty() {
        anyhow::bail!("rom image {:?} is empty", args.rom);
    }

    let program_bytes = fs::read(&args.program)
        .with_context(|| format!("reading program image {:?}", args.program))?;
    if program_bytes.is_empty() {
        anyhow::bail!("program image {:?} is empty", args.program);
    }

    let mut mem = MemoryController::new();
    mem.add_region(0, Box::new(RamRegion::new(RAM_SIZE)))
        .context("mapping conventional RAM")?;
    mem.add_region(ROM_BASE, Box::new(RomRegion::new(rom_bytes)))
        .context("mapping rom image")?;
    mem.write_bytes(PROGRAM_BASE, &program_bytes)
        .context("loading program image")?;

    info!("z86 starting: rom={:?} program={:?}", args.rom, args.program);

    let mut cpu = Cpu::new();
    let reason = cpu.run(&mut mem, None)?;

    match reason {
        ExitReason::Halted => {
            info!(
                "halted after {} instructions at rip={:#x}",
                cpu.instruction_count, cpu.regs.rip
            );
            Ok(())
        }
        ExitReason::StopRequested => {
            info!("stopped after {} instructions", cpu.instruction_count);
            Ok(())
        }
        ExitReason::InstructionLimit => {
            unreachable!("run() was called with no instruction limit")
        }
    }
}
