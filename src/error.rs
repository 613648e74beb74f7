//! Error types for the z86 core.
//!
//! Every variant here is fatal: the processor model described in this crate
//! has no recoverable-fault surface. The CPU's fetch-decode-execute loop
//! propagates a `VmError` out to the caller (the `z86` binary), which prints
//! a diagnostic naming the subsystem and current IP, then exits nonzero.

use thiserror::Error;

/// Errors produced anywhere in the memory, decode, or execution pipeline.
///
/// All variants are terminal. There is no guest-visible exception delivery
/// modeled here (see the crate-level Non-goals) -- a `VmError` always means
/// the emulation run is over.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VmError {
    /// Access to a physical address not covered by any mapped region.
    #[error("out-of-bounds memory access at physical address {addr:#x} (len {len})")]
    OutOfBoundsMemory { addr: u64, len: u64 },

    /// A stack push/pop touched an address outside any mapped region.
    #[error("unaligned stack access underflowed into unmapped memory at {addr:#x}")]
    UnalignedStackUnderflow { addr: u64 },

    /// `MemoryController::add_region` would overlap an existing mapping.
    #[error("region [{start:#x}, {end:#x}) overlaps an existing mapping")]
    OverlappingRegion { start: u64, end: u64 },

    /// A write landed on a read-only (ROM) region.
    #[error("write to read-only region at physical address {addr:#x}")]
    RomWrite { addr: u64 },

    /// The executor has no handler for this opcode.
    #[error("invalid opcode {mnemonic} (id {opcode_id:#x}) at ip {ip:#x}")]
    InvalidOpcode {
        opcode_id: u16,
        mnemonic: String,
        ip: u64,
    },

    /// `set_operand` was asked to write to something other than a register
    /// or memory location (e.g. an immediate or relative-offset operand).
    #[error("invalid operand kind for write at ip {ip:#x}")]
    InvalidOperandKind { ip: u64 },

    /// The decoder could not make sense of the byte stream.
    #[error("decoder error at ip {ip:#x}: {reason}")]
    DecoderError { ip: u64, reason: String },

    /// AAM with an immediate divisor of zero (architectural #DE).
    #[error("AAM by zero at ip {ip:#x}")]
    DivideByZero { ip: u64 },
}

/// Convenience result alias used throughout the core.
pub type Result<T> = core::result::Result<T, VmError>;
