//! x86 instruction decoder.
//!
//! Decodes a byte stream into a [`DecodedInst`] the executor can consume.
//! The decoder never touches guest memory directly -- it is handed a
//! [`ByteSource`], a small cursor abstraction (`peek`/`pop`/`matches`/
//! `position`) that the CPU adapts from `CS:IP`. This keeps the decoder
//! testable against plain byte slices and keeps it logically separate from
//! the rest of the core, which is how this crate treats it: a pluggable
//! collaborator behind a narrow interface rather than something wired
//! directly into the executor.
//!
//! Decoding proceeds in four phases, same as the order a real decoder reads
//! the byte stream in:
//!
//! 1. **Prefixes** -- legacy (segment override, size override, lock, rep)
//!    and REX prefixes.
//! 2. **Opcode** -- the single opcode byte (this instruction set has no
//!    two-byte escape members).
//! 3. **Sizes** -- operand/address size from mode + prefixes + REX.W.
//! 4. **Operands** -- ModR/M, SIB, displacement, and immediate fields.

use crate::cpu::Mode;
use crate::error::{Result, VmError};
use crate::flags::OperandSize;
use crate::instruction::{DecodedInst, MemOperand, Modifiers, Operand, RegOperand};
use crate::operand::{address_size, operand_size};
use crate::registers::SegReg;

/// Byte-stream cursor the decoder reads through.
///
/// Implementations are expected to be backed by `CS:IP + position()`; the
/// decoder only ever moves forward.
pub trait ByteSource {
    /// Look at the next byte without consuming it.
    fn peek(&mut self) -> Result<u8>;
    /// Consume and return the next byte.
    fn pop(&mut self) -> Result<u8>;
    /// If the next byte equals `b`, consume it and return `true`; otherwise
    /// leave the cursor untouched and return `false`.
    fn matches(&mut self, b: u8) -> Result<bool> {
        if self.peek()? == b {
            self.pop()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }
    /// Number of bytes consumed so far.
    fn position(&self) -> u64;
}

/// Decode one instruction from `src` under CPU mode `mode`.
pub fn decode(src: &mut dyn ByteSource, mode: Mode) -> Result<DecodedInst> {
    let mut st = DecodeState {
        modifiers: Modifiers::default(),
        mode,
    };
    let start = src.position();

    st.phase1_prefixes(src)?;
    let (opcode, mnemonic, form) = st.phase2_opcode(src)?;
    let (operand_size, address_size) = st.phase3_sizes(form);
    let operands = st.phase4_operands(src, opcode, form, operand_size, address_size)?;

    let length = (src.position() - start) as u8;
    Ok(DecodedInst {
        length,
        opcode_id: opcode as u16,
        mnemonic,
        operand_size,
        address_size,
        operands,
        operand_count: form.operand_count(),
        modifiers: st.modifiers,
        displacement: 0,
    })
}

struct DecodeState {
    modifiers: Modifiers,
    mode: Mode,
}

impl DecodeState {
    /// Scan legacy and REX prefix bytes. Stops at the first byte that is
    /// not a recognized prefix -- that byte is the opcode.
    fn phase1_prefixes(&mut self, src: &mut dyn ByteSource) -> Result<()> {
        loop {
            let b = src.peek()?;
            match b {
                0x26 => { src.pop()?; self.modifiers.seg_override = Some(SegReg::Es); }
                0x2E => { src.pop()?; self.modifiers.seg_override = Some(SegReg::Cs); }
                0x36 => { src.pop()?; self.modifiers.seg_override = Some(SegReg::Ss); }
                0x3E => { src.pop()?; self.modifiers.seg_override = Some(SegReg::Ds); }
                0x64 => { src.pop()?; self.modifiers.seg_override = Some(SegReg::Fs); }
                0x65 => { src.pop()?; self.modifiers.seg_override = Some(SegReg::Gs); }
                0x66 => { src.pop()?; self.modifiers.operand_size_override = true; }
                0x67 => { src.pop()?; self.modifiers.address_size_override = true; }
                0xF0 => { src.pop()?; self.modifiers.lock = true; }
                0xF2 => { src.pop()?; self.modifiers.repnz = true; }
                0xF3 => { src.pop()?; self.modifiers.rep = true; }
                0x40..=0x4F if self.mode == Mode::Long => {
                    self.modifiers.rex = src.pop()?;
                }
                _ => return Ok(()),
            }
        }
    }

    /// Read the opcode byte and resolve it to a mnemonic and operand form.
    ///
    /// A handful of opcodes (the Group1 ALU-immediate forms, and the
    /// Group4/Group5 INC/DEC/CALL/JMP/PUSH forms) carry their real
    /// identity in the ModR/M reg field rather than the opcode byte; for
    /// those this peeks the still-unconsumed ModR/M byte to resolve the
    /// mnemonic before operand decoding consumes it for real.
    fn phase2_opcode(&mut self, src: &mut dyn ByteSource) -> Result<(u8, &'static str, OpForm)> {
        let op = src.pop()?;
        if is_group_opcode(op) {
            let modrm = src.peek()?;
            let (mnemonic, form) = resolve_group(op, modrm);
            return Ok((op, mnemonic, form));
        }
        let entry = opcode_table(op, self.mode).ok_or(VmError::DecoderError {
            ip: 0,
            reason: format!("unsupported opcode {:#04x}", op),
        })?;
        Ok((op, entry.0, entry.1))
    }

    fn phase3_sizes(&self, form: OpForm) -> (OperandSize, OperandSize) {
        let osz = operand_size(self.mode, &self.modifiers, form.default_64());
        let asz = address_size(self.mode, &self.modifiers);
        (osz, asz)
    }

    fn phase4_operands(
        &mut self,
        src: &mut dyn ByteSource,
        opcode: u8,
        form: OpForm,
        osz: OperandSize,
        asz: OperandSize,
    ) -> Result<[Operand; 4]> {
        form.decode_operands(src, &mut self.modifiers, self.mode, opcode, osz, asz)
    }
}

/// Operand-encoding shape for one opcode. Kept small and explicit rather
/// than as a function pointer table -- the shapes repeat across many
/// opcodes (the six-opcode ALU pattern, for instance) so a flat match over
/// `OpForm` in `decode_operands` covers the whole instruction set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpForm {
    /// No operands (CLC, STI, HLT, ...).
    None,
    /// `Eb, Gb` -- r/m8, r8.
    EbGb,
    /// `Ev, Gv` -- r/m(opsize), r(opsize).
    EvGv,
    /// `Gb, Eb` -- r8, r/m8.
    GbEb,
    /// `Gv, Ev` -- r(opsize), r/m(opsize).
    GvEv,
    /// `AL, Ib` -- accumulator byte, imm8.
    AlIb,
    /// `eAX, Iz` -- accumulator(opsize), imm(opsize capped at 32 bits).
    AccIz,
    /// Group 1 ALU immediate: `Eb, Ib` or `Ev, Iz`/`Ev, Ib` (sign-extended),
    /// selected by the ModR/M reg field -- handled by the executor.
    Group1Eb,
    Group1EvIz,
    Group1EvIb,
    /// `Eb` or `Ev` alone (NOT/NEG/INC/DEC/PUSH r/m forms at the ModR/M).
    Eb,
    Ev,
    /// Register encoded in the low 3 bits of the opcode (+REX.B): INC/DEC,
    /// PUSH/POP reg, XCHG acc,reg, MOV r,imm.
    RegInOpcodeNoImm,
    RegInOpcodeImm8,
    RegInOpcodeImmFull,
    /// `moffs` forms of MOV (direct-addressed memory, no ModR/M).
    AlMoffs,
    MoffsAl,
    AccMoffs,
    MoffsAcc,
    /// `Eb, Ib` / `Ev, Iz` for MOV r/m, imm (reg field must be 0).
    MovEbIb,
    MovEvIz,
    /// `Jb` / `Jz` -- relative branch displacement.
    Jb,
    Jz,
    /// `Iz` / `Ib` -- PUSH imm.
    PushIz,
    PushIb,
    /// Far branch, immediate form: `Ap` -- imm(opsize):imm16.
    FarImm,
    /// `Iw` -- RET/RETF imm16.
    Iw,
    /// `Ib` -- AAM/AAD.
    Ib,
    /// Group 5 (`FF`): INC/DEC/CALL/CALL far/JMP/JMP far/PUSH, ModR/M
    /// selects sub-operation; operand form depends on the reg field, so the
    /// decoder always decodes an `Ev`-shaped ModR/M and leaves
    /// reg-dependent reinterpretation (e.g. far vs near) to the executor.
    Group5,
}

impl OpForm {
    fn operand_count(self) -> u8 {
        use OpForm::*;
        match self {
            None => 0,
            EbGb | EvGv | GbEb | GvEv | AlIb | AccIz | Group1Eb | Group1EvIz | Group1EvIb
            | MovEbIb | MovEvIz | AlMoffs | MoffsAl | AccMoffs | MoffsAcc => 2,
            Eb | Ev | RegInOpcodeNoImm | RegInOpcodeImm8 | RegInOpcodeImmFull | Jb | Jz
            | PushIz | PushIb | FarImm | Iw | Ib | Group5 => 1,
        }
    }

    /// Whether this opcode defaults to a 64-bit operand size in long mode
    /// regardless of REX.W (near branches, stack ops).
    fn default_64(self) -> bool {
        matches!(
            self,
            RegInOpcodeNoImm | Jb | Jz | PushIz | PushIb | Iw | Group5
        )
    }

    fn decode_operands(
        self,
        src: &mut dyn ByteSource,
        modifiers: &mut Modifiers,
        mode: Mode,
        opcode: u8,
        osz: OperandSize,
        asz: OperandSize,
    ) -> Result<[Operand; 4]> {
        let mut ops = [Operand::None; 4];
        use OpForm::*;
        match self {
            None => {}
            EbGb => {
                let (rm, reg) = decode_modrm_pair(src, modifiers, mode, asz, OperandSize::Byte)?;
                ops[0] = rm;
                ops[1] = reg;
            }
            EvGv => {
                let (rm, reg) = decode_modrm_pair(src, modifiers, mode, asz, osz)?;
                ops[0] = rm;
                ops[1] = reg;
            }
            GbEb => {
                let (rm, reg) = decode_modrm_pair(src, modifiers, mode, asz, OperandSize::Byte)?;
                ops[0] = reg;
                ops[1] = rm;
            }
            GvEv => {
                let (rm, reg) = decode_modrm_pair(src, modifiers, mode, asz, osz)?;
                ops[0] = reg;
                ops[1] = rm;
            }
            AlIb => {
                ops[0] = Operand::Register(RegOperand::Gpr(0));
                ops[1] = Operand::Immediate {
                    value: src.pop()? as u64,
                    size: OperandSize::Byte,
                };
            }
            AccIz => {
                ops[0] = Operand::Register(RegOperand::Gpr(0));
                ops[1] = Operand::Immediate {
                    value: fetch_iz(src, osz)?,
                    size: osz,
                };
            }
            Group1Eb => {
                let rm = decode_modrm_rm_only(src, modifiers, mode, asz, OperandSize::Byte)?;
                let imm = src.pop()? as u64;
                ops[0] = rm;
                ops[1] = Operand::Immediate {
                    value: imm,
                    size: OperandSize::Byte,
                };
            }
            Group1EvIz => {
                let rm = decode_modrm_rm_only(src, modifiers, mode, asz, osz)?;
                let imm = fetch_iz(src, osz)?;
                ops[0] = rm;
                ops[1] = Operand::Immediate { value: imm, size: osz };
            }
            Group1EvIb => {
                let rm = decode_modrm_rm_only(src, modifiers, mode, asz, osz)?;
                let imm = src.pop()? as i8 as i64 as u64 & osz.mask();
                ops[0] = rm;
                ops[1] = Operand::Immediate { value: imm, size: osz };
            }
            Eb => {
                ops[0] = decode_modrm_rm_only(src, modifiers, mode, asz, OperandSize::Byte)?;
            }
            Ev => {
                ops[0] = decode_modrm_rm_only(src, modifiers, mode, asz, osz)?;
            }
            RegInOpcodeNoImm => {
                ops[0] = Operand::Register(RegOperand::Gpr(opcode_reg(opcode, modifiers)));
            }
            RegInOpcodeImm8 => {
                ops[0] = Operand::Register(RegOperand::Gpr(opcode_reg(opcode, modifiers)));
                ops[1] = Operand::Immediate {
                    value: src.pop()? as u64,
                    size: OperandSize::Byte,
                };
            }
            RegInOpcodeImmFull => {
                ops[0] = Operand::Register(RegOperand::Gpr(opcode_reg(opcode, modifiers)));
                let imm = fetch_full_imm(src, osz)?;
                ops[1] = Operand::Immediate { value: imm, size: osz };
            }
            AlMoffs => {
                ops[0] = Operand::Register(RegOperand::Gpr(0));
                ops[1] = moffs_operand(src, modifiers, asz, OperandSize::Byte)?;
            }
            MoffsAl => {
                ops[0] = moffs_operand(src, modifiers, asz, OperandSize::Byte)?;
                ops[1] = Operand::Register(RegOperand::Gpr(0));
            }
            AccMoffs => {
                ops[0] = Operand::Register(RegOperand::Gpr(0));
                ops[1] = moffs_operand(src, modifiers, asz, osz)?;
            }
            MoffsAcc => {
                ops[0] = moffs_operand(src, modifiers, asz, osz)?;
                ops[1] = Operand::Register(RegOperand::Gpr(0));
            }
            MovEbIb => {
                let rm = decode_modrm_rm_only(src, modifiers, mode, asz, OperandSize::Byte)?;
                let imm = src.pop()? as u64;
                ops[0] = rm;
                ops[1] = Operand::Immediate {
                    value: imm,
                    size: OperandSize::Byte,
                };
            }
            MovEvIz => {
                let rm = decode_modrm_rm_only(src, modifiers, mode, asz, osz)?;
                let imm = fetch_iz(src, osz)?;
                ops[0] = rm;
                ops[1] = Operand::Immediate { value: imm, size: osz };
            }
            Jb => {
                let rel = src.pop()? as i8 as i64;
                ops[0] = Operand::RelativeOffset(rel);
            }
            Jz => {
                let rel = fetch_iz(src, osz)? as i32 as i64;
                ops[0] = Operand::RelativeOffset(rel);
            }
            PushIz => {
                ops[0] = Operand::Immediate {
                    value: fetch_iz(src, osz)?,
                    size: osz,
                };
            }
            PushIb => {
                let imm = src.pop()? as i8 as i64 as u64;
                ops[0] = Operand::Immediate { value: imm, size: osz };
            }
            FarImm => {
                let offset = fetch_full_imm(src, osz)?;
                let segment = fetch_u16(src)?;
                ops[0] = Operand::FarPointer { segment, offset };
            }
            Iw => {
                ops[0] = Operand::Immediate {
                    value: fetch_u16(src)? as u64,
                    size: OperandSize::Word,
                };
            }
            Ib => {
                ops[0] = Operand::Immediate {
                    value: src.pop()? as u64,
                    size: OperandSize::Byte,
                };
            }
            Group5 => {
                ops[0] = decode_modrm_rm_only(src, modifiers, mode, asz, osz)?;
            }
        }
        Ok(ops)
    }
}

/// Register index for opcodes that encode it in their own low 3 bits
/// (PUSH/POP reg, INC/DEC reg, MOV r,imm, XCHG acc,reg), extended by
/// REX.B.
fn opcode_reg(opcode: u8, modifiers: &Modifiers) -> u8 {
    (opcode & 0x7) | if modifiers.rex_b() { 8 } else { 0 }
}

fn fetch_u16(src: &mut dyn ByteSource) -> Result<u16> {
    let lo = src.pop()? as u16;
    let hi = src.pop()? as u16;
    Ok(lo | (hi << 8))
}

fn fetch_u32(src: &mut dyn ByteSource) -> Result<u32> {
    let lo = fetch_u16(src)? as u32;
    let hi = fetch_u16(src)? as u32;
    Ok(lo | (hi << 16))
}

/// Fetch `Iz`: imm16 at 16-bit operand size, otherwise imm32 (used for both
/// 32- and 64-bit operand sizes; the latter is sign-extended by the
/// caller's masking where the architecture calls for it).
fn fetch_iz(src: &mut dyn ByteSource, osz: OperandSize) -> Result<u64> {
    match osz {
        OperandSize::Byte | OperandSize::Word => Ok(fetch_u16(src)? as u64),
        OperandSize::Dword => Ok(fetch_u32(src)? as u64),
        OperandSize::Qword => Ok(fetch_u32(src)? as i32 as i64 as u64),
    }
}

/// Fetch a full-width immediate matching `osz` exactly (`MOV r, imm`).
fn fetch_full_imm(src: &mut dyn ByteSource, osz: OperandSize) -> Result<u64> {
    match osz {
        OperandSize::Byte => Ok(src.pop()? as u64),
        OperandSize::Word => Ok(fetch_u16(src)? as u64),
        OperandSize::Dword => Ok(fetch_u32(src)? as u64),
        OperandSize::Qword => {
            let lo = fetch_u32(src)? as u64;
            let hi = fetch_u32(src)? as u64;
            Ok(lo | (hi << 32))
        }
    }
}

/// Decode a `moffs` memory operand: a bare address-sized displacement with
/// no ModR/M byte, always through the default (or overridden) segment.
fn moffs_operand(
    src: &mut dyn ByteSource,
    modifiers: &Modifiers,
    asz: OperandSize,
    size: OperandSize,
) -> Result<Operand> {
    let disp = fetch_full_imm(src, asz)? as i64;
    Ok(Operand::Memory(MemOperand {
        base: None,
        index: None,
        scale: 1,
        displacement: disp,
        segment: modifiers.seg_override.unwrap_or(SegReg::Ds),
        size,
    }))
}

/// Decode a ModR/M byte into `(rm_operand, reg_operand)`, both carrying
/// `size`. `reg_operand` is always a register; `rm_operand` is a register
/// or memory operand depending on the mod field.
fn decode_modrm_pair(
    src: &mut dyn ByteSource,
    modifiers: &mut Modifiers,
    mode: Mode,
    asz: OperandSize,
    size: OperandSize,
) -> Result<(Operand, Operand)> {
    let modrm = src.pop()?;
    let md = (modrm >> 6) & 0x3;
    let reg_field = ((modrm >> 3) & 0x7) | if modifiers.rex_r() { 8 } else { 0 };
    let rm_field = modrm & 0x7;

    let reg = Operand::Register(RegOperand::Gpr(reg_field));
    let rm = if md == 0b11 {
        let idx = rm_field | if modifiers.rex_b() { 8 } else { 0 };
        Operand::Register(RegOperand::Gpr(idx))
    } else {
        decode_memory(src, modifiers, mode, md, rm_field, asz, size)?
    };
    Ok((rm, reg))
}

/// Like [`decode_modrm_pair`] but only the r/m operand is needed (the reg
/// field selects a sub-opcode instead of a register operand).
fn decode_modrm_rm_only(
    src: &mut dyn ByteSource,
    modifiers: &mut Modifiers,
    mode: Mode,
    asz: OperandSize,
    size: OperandSize,
) -> Result<Operand> {
    let (rm, _reg) = decode_modrm_pair(src, modifiers, mode, asz, size)?;
    Ok(rm)
}

/// Decode the memory-addressing part of a ModR/M byte (mod != 11), including
/// any SIB byte and displacement.
fn decode_memory(
    src: &mut dyn ByteSource,
    modifiers: &Modifiers,
    mode: Mode,
    md: u8,
    rm_field: u8,
    asz: OperandSize,
    size: OperandSize,
) -> Result<Operand> {
    let segment = modifiers.seg_override.unwrap_or(SegReg::Ds);

    if asz == OperandSize::Word {
        // 16-bit addressing: fixed base/index register pairs, no SIB.
        let (base, index) = match rm_field {
            0 => (Some(GprIdx::RBX), Some(GprIdx::RSI)),
            1 => (Some(GprIdx::RBX), Some(GprIdx::RDI)),
            2 => (Some(GprIdx::RBP), Some(GprIdx::RSI)),
            3 => (Some(GprIdx::RBP), Some(GprIdx::RDI)),
            4 => (Some(GprIdx::RSI), None),
            5 => (Some(GprIdx::RDI), None),
            6 => {
                if md == 0 {
                    (None, None) // disp16 only
                } else {
                    (Some(GprIdx::RBP), None)
                }
            }
            7 => (Some(GprIdx::RBX), None),
            _ => unreachable!(),
        };
        let disp = match (md, rm_field) {
            (0, 6) => fetch_u16(src)? as i16 as i64,
            (0, _) => 0,
            (1, _) => src.pop()? as i8 as i64,
            (2, _) => fetch_u16(src)? as i16 as i64,
            _ => unreachable!(),
        };
        return Ok(Operand::Memory(MemOperand {
            base,
            index,
            scale: 1,
            displacement: disp,
            segment,
            size,
        }));
    }

    // 32/64-bit addressing, possibly via SIB.
    let (mut base, mut index, mut scale) = (Some(rm_field), None, 1u8);
    if rm_field == 4 {
        let sib = src.pop()?;
        let ss = (sib >> 6) & 0x3;
        let idx_field = ((sib >> 3) & 0x7) | if modifiers.rex_x() { 8 } else { 0 };
        let base_field = (sib & 0x7) | if modifiers.rex_b() { 8 } else { 0 };
        scale = 1 << ss;
        index = if idx_field == 4 { None } else { Some(idx_field) };
        base = if (sib & 0x7) == 5 && md == 0 {
            None
        } else {
            Some(base_field)
        };
    } else if rm_field == 5 && md == 0 {
        base = None; // disp32 only (RIP-relative in long mode, not modeled)
    } else {
        base = Some(rm_field | if modifiers.rex_b() { 8 } else { 0 });
    }

    let disp = match md {
        0 if rm_field == 5 || (rm_field == 4 && base.is_none()) => fetch_u32(src)? as i32 as i64,
        0 => 0,
        1 => src.pop()? as i8 as i64,
        2 => fetch_u32(src)? as i32 as i64,
        _ => unreachable!(),
    };

    Ok(Operand::Memory(MemOperand {
        base,
        index,
        scale,
        displacement: disp,
        segment,
        size,
    }))
}

/// 16-bit addressing uses fixed register pairs rather than a free base
/// field; this is just shorthand for those constant indices.
struct GprIdx;
impl GprIdx {
    const RBX: u8 = 3;
    const RSI: u8 = 6;
    const RDI: u8 = 7;
    const RBP: u8 = 5;
}

/// (mnemonic, operand form) for every supported opcode, keyed by the raw
/// opcode byte. `mode` only matters for the 0x40-0x4F range, which is
/// INC/DEC in real/protected mode and consumed as REX prefixes (never
/// reaching here) in long mode.
fn opcode_table(op: u8, mode: Mode) -> Option<(&'static str, OpForm)> {
    use OpForm::*;
    Some(match op {
        0x00 => ("add", EbGb),
        0x01 => ("add", EvGv),
        0x02 => ("add", GbEb),
        0x03 => ("add", GvEv),
        0x04 => ("add", AlIb),
        0x05 => ("add", AccIz),

        0x08 => ("or", EbGb),
        0x09 => ("or", EvGv),
        0x0A => ("or", GbEb),
        0x0B => ("or", GvEv),
        0x0C => ("or", AlIb),
        0x0D => ("or", AccIz),

        0x10 => ("adc", EbGb),
        0x11 => ("adc", EvGv),
        0x12 => ("adc", GbEb),
        0x13 => ("adc", GvEv),
        0x14 => ("adc", AlIb),
        0x15 => ("adc", AccIz),

        0x18 => ("sbb", EbGb),
        0x19 => ("sbb", EvGv),
        0x1A => ("sbb", GbEb),
        0x1B => ("sbb", GvEv),
        0x1C => ("sbb", AlIb),
        0x1D => ("sbb", AccIz),

        0x20 => ("and", EbGb),
        0x21 => ("and", EvGv),
        0x22 => ("and", GbEb),
        0x23 => ("and", GvEv),
        0x24 => ("and", AlIb),
        0x25 => ("and", AccIz),

        0x27 => ("daa", None),

        0x28 => ("sub", EbGb),
        0x29 => ("sub", EvGv),
        0x2A => ("sub", GbEb),
        0x2B => ("sub", GvEv),
        0x2C => ("sub", AlIb),
        0x2D => ("sub", AccIz),

        0x2F => ("das", None),

        0x30 => ("xor", EbGb),
        0x31 => ("xor", EvGv),
        0x32 => ("xor", GbEb),
        0x33 => ("xor", GvEv),
        0x34 => ("xor", AlIb),
        0x35 => ("xor", AccIz),

        0x37 => ("aaa", None),

        0x38 => ("cmp", EbGb),
        0x39 => ("cmp", EvGv),
        0x3A => ("cmp", GbEb),
        0x3B => ("cmp", GvEv),
        0x3C => ("cmp", AlIb),
        0x3D => ("cmp", AccIz),

        0x3F => ("aas", None),

        0x40..=0x47 if mode != Mode::Long => ("inc", RegInOpcodeNoImm),
        0x48..=0x4F if mode != Mode::Long => ("dec", RegInOpcodeNoImm),

        0x50..=0x57 => ("push", RegInOpcodeNoImm),
        0x58..=0x5F => ("pop", RegInOpcodeNoImm),

        0x68 => ("push", PushIz),
        0x6A => ("push", PushIb),

        0x70..=0x7F => ("jcc", Jb),

        0x84 => ("test", EbGb),
        0x85 => ("test", EvGv),

        0x86 | 0x87 => ("xchg", EvGv),

        0x88 => ("mov", EbGb),
        0x89 => ("mov", EvGv),
        0x8A => ("mov", GbEb),
        0x8B => ("mov", GvEv),

        0x8F => ("pop", Ev),

        0x90 => ("nop", None),
        0x91..=0x97 => ("xchg", RegInOpcodeNoImm),

        0x9A => ("call", FarImm),

        0x9C => ("pushf", None),
        0x9D => ("popf", None),
        0x9E => ("sahf", None),
        0x9F => ("lahf", None),

        0xA0 => ("mov", AlMoffs),
        0xA1 => ("mov", AccMoffs),
        0xA2 => ("mov", MoffsAl),
        0xA3 => ("mov", MoffsAcc),

        0xA8 => ("test", AlIb),
        0xA9 => ("test", AccIz),

        0xB0..=0xB7 => ("mov", RegInOpcodeImm8),
        0xB8..=0xBF => ("mov", RegInOpcodeImmFull),

        0xC2 => ("ret", Iw),
        0xC3 => ("ret", None),

        0xC6 => ("mov", MovEbIb),
        0xC7 => ("mov", MovEvIz),

        0xCA => ("retf", Iw),
        0xCB => ("retf", None),

        0xD4 => ("aam", Ib),
        0xD5 => ("aad", Ib),

        0xE3 => ("jcxz", Jb),

        0xE8 => ("call", Jz),
        0xE9 => ("jmp", Jz),
        0xEA => ("jmp", FarImm),
        0xEB => ("jmp", Jb),

        0xF4 => ("hlt", None),
        0xF5 => ("cmc", None),

        0xF8 => ("clc", None),
        0xF9 => ("stc", None),
        0xFA => ("cli", None),
        0xFB => ("sti", None),
        0xFC => ("cld", None),
        0xFD => ("std", None),

        _ => return None,
    })
}

/// Opcodes whose real operation is carried in the ModR/M reg field rather
/// than the opcode byte.
fn is_group_opcode(op: u8) -> bool {
    matches!(op, 0x80 | 0x81 | 0x82 | 0x83 | 0xFE | 0xFF)
}

const ALU_MNEMONICS: [&str; 8] = ["add", "or", "adc", "sbb", "and", "sub", "xor", "cmp"];

/// Resolve a group opcode's mnemonic and operand form from its still-
/// unconsumed ModR/M byte.
fn resolve_group(op: u8, modrm: u8) -> (&'static str, OpForm) {
    let reg = ((modrm >> 3) & 0x7) as usize;
    match op {
        0x80 => (ALU_MNEMONICS[reg], OpForm::Group1Eb),
        0x81 => (ALU_MNEMONICS[reg], OpForm::Group1EvIz),
        // 0x82 is an undocumented alias of 0x80 (Eb, Ib) on real silicon;
        // invalid in long mode, but harmless to keep decoding uniformly.
        0x82 => (ALU_MNEMONICS[reg], OpForm::Group1Eb),
        0x83 => (ALU_MNEMONICS[reg], OpForm::Group1EvIb),
        0xFE => (if reg == 0 { "inc" } else { "dec" }, OpForm::Eb),
        0xFF => {
            let mnemonic = match reg {
                0 => "inc",
                1 => "dec",
                2 => "call",
                3 => "callf",
                4 => "jmp",
                5 => "jmpf",
                6 => "push",
                _ => "ud",
            };
            (mnemonic, OpForm::Group5)
        }
        _ => unreachable!("is_group_opcode gates this"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A [`ByteSource`] over a plain in-memory byte slice, for decoder unit
    /// tests that don't need a live CPU/memory pipeline.
    struct SliceSource<'a> {
        bytes: &'a [u8],
        pos: usize,
    }

    impl<'a> SliceSource<'a> {
        fn new(bytes: &'a [u8]) -> Self {
            SliceSource { bytes, pos: 0 }
        }
    }

    impl<'a> ByteSource for SliceSource<'a> {
        fn peek(&mut self) -> Result<u8> {
            self.bytes
                .get(self.pos)
                .copied()
                .ok_or(VmError::DecoderError {
                    ip: self.pos as u64,
                    reason: "ran off the end of the instruction stream".into(),
                })
        }
        fn pop(&mut self) -> Result<u8> {
            let b = self.peek()?;
            self.pos += 1;
            Ok(b)
        }
        fn position(&self) -> u64 {
            self.pos as u64
        }
    }

    #[test]
    fn decodes_mov_ax_imm16() {
        let mut src = SliceSource::new(&[0xB8, 0x34, 0x12]);
        let inst = decode(&mut src, Mode::Real).unwrap();
        assert_eq!(inst.length, 3);
        assert_eq!(inst.mnemonic, "mov");
        match inst.operands[1] {
            Operand::Immediate { value, .. } => assert_eq!(value, 0x1234),
            _ => panic!("expected immediate"),
        }
    }

    #[test]
    fn decodes_xor_ax_ax_modrm() {
        let mut src = SliceSource::new(&[0x31, 0xC0]);
        let inst = decode(&mut src, Mode::Real).unwrap();
        assert_eq!(inst.length, 2);
        assert_eq!(inst.mnemonic, "xor");
        assert!(matches!(inst.operands[0], Operand::Register(RegOperand::Gpr(0))));
        assert!(matches!(inst.operands[1], Operand::Register(RegOperand::Gpr(0))));
    }

    #[test]
    fn decodes_cmp_bx_dx_then_jl() {
        let mut src = SliceSource::new(&[0x39, 0xD3]);
        let inst = decode(&mut src, Mode::Real).unwrap();
        assert_eq!(inst.mnemonic, "cmp");
        assert_eq!(inst.length, 2);
    }

    #[test]
    fn unknown_opcode_is_fatal() {
        let mut src = SliceSource::new(&[0x0F]);
        assert!(decode(&mut src, Mode::Real).is_err());
    }
}
