//! Decoded x86 instruction representation.
//!
//! The decoder (`crate::decoder`) produces a `DecodedInst`, which fully
//! describes one instruction: opcode identity, modifier flags, up to four
//! operands, and encoded length. The executor consumes it without ever
//! looking back at the raw bytes.

use crate::flags::OperandSize;
use crate::registers::SegReg;

/// An x86 instruction fully decoded from its byte encoding.
#[derive(Debug, Clone)]
pub struct DecodedInst {
    /// Length of the encoded instruction in bytes.
    pub length: u8,

    /// Opcode identity used for dispatch in the executor.
    pub opcode_id: u16,

    /// Mnemonic, used only for diagnostics (`InvalidOpcode`, disassembly).
    pub mnemonic: &'static str,

    /// Operand size (determined by mode + prefixes + REX.W).
    pub operand_size: OperandSize,

    /// Address size for memory operands.
    pub address_size: OperandSize,

    /// Decoded operands, in encoding order. Unused trailing slots are
    /// `Operand::None`.
    pub operands: [Operand; 4],

    /// Number of valid operands (0-4).
    pub operand_count: u8,

    /// Prefix/modifier state.
    pub modifiers: Modifiers,

    /// Displacement, sign-extended to 64 bits (0 if none encoded).
    pub displacement: i64,
}

impl DecodedInst {
    /// Operand 0 (destination, by convention).
    #[inline]
    pub fn dst(&self) -> &Operand {
        &self.operands[0]
    }

    /// Operand 1 (source, by convention).
    #[inline]
    pub fn src(&self) -> &Operand {
        &self.operands[1]
    }

    /// Operand 2, used by instructions with a third explicit operand
    /// (shift/rotate-by-immediate forms, three-operand IMUL).
    #[inline]
    pub fn ext(&self) -> &Operand {
        &self.operands[2]
    }

    /// Operand 3, used only by the rare four-operand encodings.
    #[inline]
    pub fn op4(&self) -> &Operand {
        &self.operands[3]
    }
}

/// Prefix/modifier state captured while scanning the instruction's prefix
/// bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct Modifiers {
    /// Segment override (`None` = use the operand's default segment).
    pub seg_override: Option<SegReg>,
    /// Operand-size override (0x66 prefix).
    pub operand_size_override: bool,
    /// Address-size override (0x67 prefix).
    pub address_size_override: bool,
    /// REX prefix byte (0 if absent). Bits: [3]=W, [2]=R, [1]=X, [0]=B.
    pub rex: u8,
    /// LOCK prefix (0xF0).
    pub lock: bool,
    /// REP/REPE prefix (0xF3).
    pub rep: bool,
    /// REPNE prefix (0xF2).
    pub repnz: bool,
}

impl Modifiers {
    /// REX.W — promotes operand size to 64-bit.
    #[inline]
    pub fn rex_w(&self) -> bool {
        self.rex & 0x08 != 0
    }

    /// REX.R — extends the ModR/M reg field to 4 bits.
    #[inline]
    pub fn rex_r(&self) -> bool {
        self.rex & 0x04 != 0
    }

    /// REX.X — extends the SIB index field to 4 bits.
    #[inline]
    pub fn rex_x(&self) -> bool {
        self.rex & 0x02 != 0
    }

    /// REX.B — extends the ModR/M r/m, SIB base, or opcode reg field.
    #[inline]
    pub fn rex_b(&self) -> bool {
        self.rex & 0x01 != 0
    }

    /// Whether any REX prefix is present (changes 8-bit register encoding).
    #[inline]
    pub fn has_rex(&self) -> bool {
        self.rex != 0
    }
}

/// An instruction operand: a tagged union over the forms an x86 encoding
/// can select. The resolver dispatches on this tag; there is no operand
/// inheritance hierarchy.
#[derive(Debug, Clone, Copy)]
pub enum Operand {
    /// Unused operand slot.
    None,
    /// Register operand.
    Register(RegOperand),
    /// Memory operand (address from ModR/M + SIB + displacement).
    Memory(MemOperand),
    /// Immediate value, carried at its own width.
    Immediate { value: u64, size: OperandSize },
    /// Relative branch offset (sign-extended displacement); only branch
    /// handlers interpret this.
    RelativeOffset(i64),
    /// Far pointer (segment:offset), immediate form.
    FarPointer { segment: u16, offset: u64 },
    /// Far pointer read indirectly through a memory operand: offset first,
    /// then a 16-bit selector immediately following it.
    FarPointerIndirect(MemOperand),
}

/// Register operand sub-types supported by this core.
#[derive(Debug, Clone, Copy)]
pub enum RegOperand {
    /// General-purpose register (0-15, with REX extension already applied).
    Gpr(u8),
    /// Segment register.
    Seg(SegReg),
}

/// Memory operand (effective-address components, pre-computation).
#[derive(Debug, Clone, Copy)]
pub struct MemOperand {
    /// Base register index (`None` = no base register).
    pub base: Option<u8>,
    /// Index register index (`None` = no index register).
    pub index: Option<u8>,
    /// Scale factor (1, 2, 4, or 8).
    pub scale: u8,
    /// Displacement, sign-extended.
    pub displacement: i64,
    /// Segment register this access goes through.
    pub segment: SegReg,
    /// Width of the memory access.
    pub size: OperandSize,
}
