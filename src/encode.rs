//! The pure encoder: [`Kind`]/[`Inst`] to machine code (spec.md §4.3, §6).
//!
//! Every variant except [`Kind::Nop`], [`Kind::BrTableSequence`],
//! [`Kind::LoadFpuConst32`]/[`Kind::LoadFpuConst64`]/[`Kind::LoadFpuConst128`],
//! and [`Kind::ExitSequence`] encodes to exactly 4 bytes. [`Kind::CallDirect`]
//! encodes a placeholder `bl` with a zero displacement; [`crate::link`]
//! patches the real displacement (or a trampoline jump) once whole-unit byte
//! offsets are known, via [`patch_branch26`].
//!
//! Branch-carrying kinds ([`Kind::Jump`], [`Kind::CondBr`], [`Kind::Adr`])
//! must already have a resolved [`crate::inst::BranchTarget`] by the time
//! they reach this module; that is the linker's first walk, not this one's
//! job (spec.md §4.5).

use crate::amode::AMode;
use crate::bits::set_bits;
use crate::common::cond::CondBrKind;
use crate::common::imm::{SImm19Words, SImm26Words};
use crate::error::CodeEncodeError;
use crate::inst::{
    AluOp, BitOp, FpuBinOp, FpuUnaryOp, Inst, Kind, MaddOp, PairAMode, VecArrangement,
    VecLanesOp, VecMiscOp, VecRRROp,
};
use crate::registers::PReg;
use crate::vreg::RegRef;

fn reg(r: RegRef) -> u32 {
    u32::from(
        r.as_physical()
            .expect("register must be assigned a physical encoding before it reaches the encoder")
            .enc(),
    )
}

fn word(w: u32) -> Vec<u8> {
    w.to_le_bytes().to_vec()
}

fn size_field(size_bits: u8) -> u32 {
    match size_bits {
        8 => 0b00,
        16 => 0b01,
        32 => 0b10,
        64 => 0b11,
        other => panic!("unsupported scalar access width {other}"),
    }
}

/// Encode a single instruction to its machine-code bytes.
///
/// # Panics
///
/// Panics if the instruction still carries an unassigned virtual register,
/// an unresolved branch target, or an operand/`Kind` pairing this backend
/// never constructs (e.g. a bitmask-immediate ALU op other than
/// `and`/`orr`/`eor`). These are all upstream programming errors this
/// backend's own builders are responsible for preventing, matching the
/// source compiler's own panic-on-invariant-violation behavior.
pub fn encode(inst: &Inst) -> Result<Vec<u8>, CodeEncodeError> {
    encode_kind(&inst.kind)
}

#[allow(clippy::too_many_lines)]
pub fn encode_kind(kind: &Kind) -> Result<Vec<u8>, CodeEncodeError> {
    let w = match kind {
        Kind::AluRRR { op, size64, rd, rn, rm } => {
            alu_rrr_shifted(*op, *size64, *rd, *rn, *rm, 0, 0)?
        }
        Kind::AluRRRShift { op, size64, rd, rn, rm, shift } => alu_rrr_shifted(
            *op,
            *size64,
            *rd,
            *rn,
            *rm,
            shift.op().bits(),
            u32::from(shift.amount().value()),
        )?,
        Kind::AluRRRR { op, size64, rd, rn, rm, ra } => {
            let sf = u32::from(*size64);
            let o0 = match op {
                MaddOp::Madd => 0,
                MaddOp::Msub => 1,
            };
            set_bits(
                0,
                [
                    (31..32, sf, 0..1),
                    (29..31, 0b00, 0..2),
                    (24..29, 0b11011, 0..5),
                    (21..24, 0b000, 0..3),
                    (16..21, reg(*rm), 0..5),
                    (15..16, o0, 0..1),
                    (10..15, reg(*ra), 0..5),
                    (5..10, reg(*rn), 0..5),
                    (0..5, reg(*rd), 0..5),
                ],
            )
        }
        Kind::AluRRImm12 { op, size64, rd, rn, imm } => {
            let sf = u32::from(*size64);
            let (op_bit, s_bit) = alu_op_bits(*op);
            set_bits(
                0,
                [
                    (31..32, sf, 0..1),
                    (30..31, op_bit, 0..1),
                    (29..30, s_bit, 0..1),
                    (24..29, 0b10001, 0..5),
                    (22..23, u32::from(imm.shift12()), 0..1),
                    (10..22, u32::from(imm.raw()), 0..12),
                    (5..10, reg(*rn), 0..5),
                    (0..5, reg(*rd), 0..5),
                ],
            )
        }
        Kind::AluRRBitmaskImm { op, size64, rd, rn, bitmask } => {
            let sf = u32::from(*size64);
            let opc = match op {
                AluOp::And => 0b00,
                AluOp::Orr => 0b01,
                AluOp::Eor => 0b10,
                AluOp::AndS => 0b11,
                other => panic!("{other:?} has no bitmask-immediate form"),
            };
            set_bits(
                0,
                [
                    (31..32, sf, 0..1),
                    (29..31, opc, 0..2),
                    (23..29, 0b100100, 0..6),
                    (22..23, bitmask.n(), 0..1),
                    (16..22, bitmask.immr(), 0..6),
                    (10..16, bitmask.imms(), 0..6),
                    (5..10, reg(*rn), 0..5),
                    (0..5, reg(*rd), 0..5),
                ],
            )
        }
        Kind::AluRRRExtend { op, size64, rd, rn, rm, extend, extend_shift } => {
            let sf = u32::from(*size64);
            let (op_bit, s_bit) = alu_op_bits(*op);
            set_bits(
                0,
                [
                    (31..32, sf, 0..1),
                    (30..31, op_bit, 0..1),
                    (29..30, s_bit, 0..1),
                    (24..29, 0b01011, 0..5),
                    (22..24, 0b00, 0..2),
                    (21..22, 1, 0..1),
                    (16..21, reg(*rm), 0..5),
                    (13..16, extend.bits(), 0..3),
                    (10..13, u32::from(extend_shift.value()), 0..3),
                    (5..10, reg(*rn), 0..5),
                    (0..5, reg(*rd), 0..5),
                ],
            )
        }
        Kind::AluRRImmShift { op, size64, rd, rn, amount } => {
            alu_shift_immediate(*op, *size64, *rd, *rn, amount.value())
        }
        Kind::BitRR { op, size64, rd, rn } => {
            let sf = u32::from(*size64);
            let opcode = match op {
                BitOp::Rbit => 0b000000,
                BitOp::Clz => 0b000100,
            };
            set_bits(
                0,
                [
                    (31..32, sf, 0..1),
                    (30..31, 1, 0..1),
                    (29..30, 0, 0..1),
                    (21..29, 0b11010110, 0..8),
                    (16..21, 0b00000, 0..5),
                    (10..16, opcode, 0..6),
                    (5..10, reg(*rn), 0..5),
                    (0..5, reg(*rd), 0..5),
                ],
            )
        }
        Kind::Mov { size64, rd, rn } => alu_rrr_shifted(
            AluOp::Orr,
            *size64,
            *rd,
            RegRef::Physical(crate::registers::zero_reg()),
            *rn,
            0,
            0,
        )?,
        Kind::MovZ { size64, rd, imm } => move_wide(0b10, *size64, *rd, imm.imm16(), imm.hw()),
        Kind::MovK { size64, rd, imm } => move_wide(0b11, *size64, *rd, imm.imm16(), imm.hw()),
        Kind::MovN { size64, rd, imm } => move_wide(0b00, *size64, *rd, imm.imm16(), imm.hw()),
        Kind::Load { size_bits, signed, rt, amode } => {
            load_store_scalar(*size_bits, *signed, false, *rt, amode)?
        }
        Kind::Store { size_bits, rt, amode } => {
            load_store_scalar(*size_bits, false, true, *rt, amode)?
        }
        Kind::VecLoad { size_bits, rt, amode } => {
            load_store_vector(*size_bits, false, *rt, amode)?
        }
        Kind::VecStore { size_bits, rt, amode } => {
            load_store_vector(*size_bits, true, *rt, amode)?
        }
        Kind::LoadPair64 { rt, rt2, amode } => pair(false, *rt, *rt2, amode)?,
        Kind::StorePair64 { rt, rt2, amode } => pair(true, *rt, *rt2, amode)?,
        Kind::FpuRR { op, size64, rd, rn } => fpu_unary(*op, *size64, *rd, *rn),
        Kind::FpuRRR { op, size64, rd, rn, rm } => fpu_binary(*op, *size64, *rd, *rn, *rm),
        Kind::FpuCmp { size64, rn, rm } => {
            let ty = u32::from(*size64);
            set_bits(
                0,
                [
                    (24..29, 0b11110, 0..5),
                    (22..24, ty, 0..2),
                    (21..22, 1, 0..1),
                    (16..21, reg(*rm), 0..5),
                    (14..16, 0b00, 0..2),
                    (10..14, 0b1000, 0..4),
                    (5..10, reg(*rn), 0..5),
                    (0..5, 0b00000, 0..5),
                ],
            )
        }
        Kind::FpuCSel { size64, rd, rn, rm, cond } => {
            let ty = u32::from(*size64);
            set_bits(
                0,
                [
                    (24..29, 0b11110, 0..5),
                    (22..24, ty, 0..2),
                    (21..22, 1, 0..1),
                    (16..21, reg(*rm), 0..5),
                    (12..16, cond.bits(), 0..4),
                    (10..12, 0b11, 0..2),
                    (5..10, reg(*rn), 0..5),
                    (0..5, reg(*rd), 0..5),
                ],
            )
        }
        Kind::FpuToInt { signed, src_size64, dst_size64, rd, rn } => {
            let sf = u32::from(*dst_size64);
            let ty = u32::from(*src_size64);
            let opcode = if *signed { 0b000 } else { 0b001 };
            set_bits(
                0,
                [
                    (31..32, sf, 0..1),
                    (29..30, 0, 0..1),
                    (24..29, 0b11110, 0..5),
                    (22..24, ty, 0..2),
                    (21..22, 1, 0..1),
                    (19..21, 0b11, 0..2),
                    (16..19, opcode, 0..3),
                    (10..16, 0b000000, 0..6),
                    (5..10, reg(*rn), 0..5),
                    (0..5, reg(*rd), 0..5),
                ],
            )
        }
        Kind::IntToFpu { signed, src_size64, dst_size64, rd, rn } => {
            let sf = u32::from(*src_size64);
            let ty = u32::from(*dst_size64);
            let opcode = if *signed { 0b010 } else { 0b011 };
            set_bits(
                0,
                [
                    (31..32, sf, 0..1),
                    (29..30, 0, 0..1),
                    (24..29, 0b11110, 0..5),
                    (22..24, ty, 0..2),
                    (21..22, 1, 0..1),
                    (19..21, 0b00, 0..2),
                    (16..19, opcode, 0..3),
                    (10..16, 0b000000, 0..6),
                    (5..10, reg(*rn), 0..5),
                    (0..5, reg(*rd), 0..5),
                ],
            )
        }
        Kind::CSel { size64, rd, rn, rm, cond } => csel_family(*size64, 0b00, *rd, *rn, *rm, cond.bits()),
        Kind::CSet { size64, rd, cond } => {
            let zr = RegRef::Physical(crate::registers::zero_reg());
            csel_family(*size64, 0b01, *rd, zr, zr, cond.invert().bits())
        }
        Kind::VecRRR { op, arrangement, rd, rn, rm } => vec_rrr(*op, *arrangement, *rd, *rn, *rm),
        Kind::VecMisc { op, arrangement, rd, rn } => vec_misc(*op, *arrangement, *rd, *rn),
        Kind::VecLanes { op, arrangement, rd, rn } => vec_lanes(*op, *arrangement, *rd, *rn),
        Kind::VecUnimplemented { mnemonic, .. } => {
            panic!("{mnemonic} has no encoding in this backend")
        }
        Kind::Jump { target } => {
            let words = SImm26Words::maybe_from_byte_offset(
                target.resolved_offset.expect("jump target must be resolved before encoding") as i64,
            )
            .ok_or(CodeEncodeError::UnencodableOffset {
                offset: i64::from(target.resolved_offset.unwrap()),
                size: 26,
            })?;
            0x1400_0000 | words.bits()
        }
        Kind::CondBr { kind: br_kind, target } => {
            let offset = i64::from(
                target
                    .resolved_offset
                    .expect("conditional branch target must be resolved before encoding"),
            );
            match br_kind {
                CondBrKind::Zero { reg: r, size64 } | CondBrKind::NotZero { reg: r, size64 } => {
                    let op = u32::from(matches!(br_kind, CondBrKind::NotZero { .. }));
                    let words = SImm19Words::maybe_from_byte_offset(offset).ok_or(
                        CodeEncodeError::UnencodableOffset { offset, size: 19 },
                    )?;
                    set_bits(
                        0,
                        [
                            (31..32, u32::from(*size64), 0..1),
                            (25..31, 0b011010, 0..6),
                            (24..25, op, 0..1),
                            (5..24, words.bits(), 0..19),
                            (0..5, reg(*r), 0..5),
                        ],
                    )
                }
                CondBrKind::Cond(cond) => {
                    let words = SImm19Words::maybe_from_byte_offset(offset).ok_or(
                        CodeEncodeError::UnencodableOffset { offset, size: 19 },
                    )?;
                    0x5400_0000 | (words.bits() << 5) | cond.bits()
                }
            }
        }
        Kind::CallDirect { .. } => 0x9400_0000,
        Kind::CallIndirect { rn, .. } => 0xD63F_0000 | (reg(*rn) << 5),
        Kind::Ret { .. } => 0xD65F_03C0,
        Kind::Adr { rd, target } => {
            let off = i64::from(target.resolved_offset.expect("adr target must be resolved before encoding"));
            let simm = crate::common::imm::SImm21::try_from(off)
                .map_err(|_| CodeEncodeError::UnencodableOffset { offset: off, size: 21 })?;
            set_bits(
                0,
                [
                    (31..32, 0, 0..1),
                    (29..31, simm.immlo(), 0..2),
                    (24..29, 0b10000, 0..5),
                    (5..24, simm.immhi(), 0..19),
                    (0..5, reg(*rd), 0..5),
                ],
            )
        }
        Kind::Udf => 0,
        Kind::Nop { .. } => return Ok(Vec::new()),
        Kind::ExitSequence { context_reg, offsets } => return Ok(exit_sequence(*context_reg, offsets)),
        Kind::FpsrMove { to_fpsr, reg: r } => {
            let base = if *to_fpsr { 0xD51B_44E0 } else { 0xD53B_44E0 };
            base | reg(*r)
        }
        Kind::BrTableSequence { index, targets } => return br_table_sequence(*index, targets),
        Kind::LoadFpuConst32 { rd, bits } => return Ok(literal_fpu_load(32, *rd, &bits.to_le_bytes())),
        Kind::LoadFpuConst64 { rd, bits } => return Ok(literal_fpu_load(64, *rd, &bits.to_le_bytes())),
        Kind::LoadFpuConst128 { rd, bits } => return Ok(literal_fpu_load(128, *rd, &bits.to_le_bytes())),
    };
    Ok(word(w))
}

fn alu_op_bits(op: AluOp) -> (u32, u32) {
    match op {
        AluOp::Add => (0, 0),
        AluOp::AddS => (0, 1),
        AluOp::Sub => (1, 0),
        AluOp::SubS => (1, 1),
        other => panic!("{other:?} has no add/sub-family encoding"),
    }
}

fn alu_rrr_shifted(
    op: AluOp,
    size64: bool,
    rd: RegRef,
    rn: RegRef,
    rm: RegRef,
    shift_bits: u32,
    imm6: u32,
) -> Result<u32, CodeEncodeError> {
    let sf = u32::from(size64);
    let is_logical = matches!(op, AluOp::And | AluOp::AndS | AluOp::Orr | AluOp::Eor | AluOp::Orn);
    if is_logical {
        let (opc, n) = match op {
            AluOp::And => (0b00, 0),
            AluOp::Orr => (0b01, 0),
            AluOp::Eor => (0b10, 0),
            AluOp::AndS => (0b11, 0),
            AluOp::Orn => (0b01, 1),
            _ => unreachable!(),
        };
        Ok(set_bits(
            0,
            [
                (31..32, sf, 0..1),
                (29..31, opc, 0..2),
                (24..29, 0b01010, 0..5),
                (22..24, shift_bits, 0..2),
                (21..22, n, 0..1),
                (16..21, reg(rm), 0..5),
                (10..16, imm6, 0..6),
                (5..10, reg(rn), 0..5),
                (0..5, reg(rd), 0..5),
            ],
        ))
    } else if matches!(op, AluOp::Add | AluOp::AddS | AluOp::Sub | AluOp::SubS) {
        let (op_bit, s_bit) = alu_op_bits(op);
        Ok(set_bits(
            0,
            [
                (31..32, sf, 0..1),
                (30..31, op_bit, 0..1),
                (29..30, s_bit, 0..1),
                (24..29, 0b01011, 0..5),
                (22..24, shift_bits, 0..2),
                (21..22, 0, 0..1),
                (16..21, reg(rm), 0..5),
                (10..16, imm6, 0..6),
                (5..10, reg(rn), 0..5),
                (0..5, reg(rd), 0..5),
            ],
        ))
    } else {
        let opcode = match op {
            AluOp::SDiv => 0b000011,
            AluOp::UDiv => 0b000010,
            AluOp::Lslv => 0b001000,
            AluOp::Lsrv => 0b001001,
            AluOp::Asrv => 0b001010,
            AluOp::Rorv => 0b001011,
            _ => unreachable!(),
        };
        Ok(set_bits(
            0,
            [
                (31..32, sf, 0..1),
                (29..31, 0b00, 0..2),
                (21..29, 0b11010110, 0..8),
                (16..21, reg(rm), 0..5),
                (10..16, opcode, 0..6),
                (5..10, reg(rn), 0..5),
                (0..5, reg(rd), 0..5),
            ],
        ))
    }
}

fn alu_shift_immediate(
    op: crate::common::shift::ShiftOp,
    size64: bool,
    rd: RegRef,
    rn: RegRef,
    amount: u8,
) -> u32 {
    use crate::common::shift::ShiftOp;
    let sf = u32::from(size64);
    let width: u32 = if size64 { 64 } else { 32 };
    let amount = u32::from(amount);
    if matches!(op, ShiftOp::Ror) {
        // `ror rd, rn, #amount` is an alias of `extr rd, rn, rn, #amount`.
        return set_bits(
            0,
            [
                (31..32, sf, 0..1),
                (29..31, 0b00, 0..2),
                (23..29, 0b100111, 0..6),
                (22..23, sf, 0..1),
                (21..22, 0, 0..1),
                (16..21, reg(rn), 0..5),
                (10..16, amount, 0..6),
                (5..10, reg(rn), 0..5),
                (0..5, reg(rd), 0..5),
            ],
        );
    }
    // LSL/LSR/ASR (immediate) are aliases of UBFM/SBFM.
    let (opc, immr, imms) = match op {
        ShiftOp::Lsl => (0b10u32, (width - amount) % width, width - 1 - amount),
        ShiftOp::Lsr => (0b10u32, amount, width - 1),
        ShiftOp::Asr => (0b00u32, amount, width - 1),
        ShiftOp::Ror => unreachable!(),
    };
    set_bits(
        0,
        [
            (31..32, sf, 0..1),
            (29..31, opc, 0..2),
            (23..29, 0b100110, 0..6),
            (22..23, sf, 0..1),
            (16..22, immr, 0..6),
            (10..16, imms, 0..6),
            (5..10, reg(rn), 0..5),
            (0..5, reg(rd), 0..5),
        ],
    )
}

fn move_wide(opc: u32, size64: bool, rd: RegRef, imm16: u16, hw: u32) -> u32 {
    let sf = u32::from(size64);
    set_bits(
        0,
        [
            (31..32, sf, 0..1),
            (29..31, opc, 0..2),
            (23..29, 0b100101, 0..6),
            (21..23, hw, 0..2),
            (5..21, u32::from(imm16), 0..16),
            (0..5, reg(rd), 0..5),
        ],
    )
}

fn csel_family(size64: bool, op2: u32, rd: RegRef, rn: RegRef, rm: RegRef, cond: u32) -> u32 {
    let sf = u32::from(size64);
    set_bits(
        0,
        [
            (31..32, sf, 0..1),
            (29..31, 0b00, 0..2),
            (21..29, 0b11010100, 0..8),
            (16..21, reg(rm), 0..5),
            (12..16, cond, 0..4),
            (10..12, op2, 0..2),
            (5..10, reg(rn), 0..5),
            (0..5, reg(rd), 0..5),
        ],
    )
}

fn to_imm9_bits(byte_offset: i64) -> Result<u32, CodeEncodeError> {
    if !(-256..=255).contains(&byte_offset) {
        return Err(CodeEncodeError::UnencodableOffset { offset: byte_offset, size: 9 });
    }
    Ok((byte_offset as i32 as u32) & 0x1FF)
}

fn load_store_scalar(
    size_bits: u8,
    signed: bool,
    is_store: bool,
    rt: RegRef,
    amode: &AMode,
) -> Result<u32, CodeEncodeError> {
    let rt_n = reg(rt);
    let size = size_field(size_bits);
    let opc = if is_store {
        0b00
    } else if signed {
        0b10
    } else {
        0b01
    };
    match *amode {
        AMode::RegUnsignedImm12(rn, imm) => Ok(set_bits(
            0,
            [
                (30..32, size, 0..2),
                (27..30, 0b111, 0..3),
                (24..26, 0b01, 0..2),
                (22..24, opc, 0..2),
                (10..22, u32::from(imm.raw()), 0..12),
                (5..10, reg(rn), 0..5),
                (0..5, rt_n, 0..5),
            ],
        )),
        AMode::RegSignedImm9(rn, imm) => {
            Ok(ldst_imm9(size, opc, rt_n, reg(rn), imm.bits(), 0b00))
        }
        AMode::PreIndex(rn, imm) => {
            let bits = to_imm9_bits(imm.byte_offset())?;
            Ok(ldst_imm9(size, opc, rt_n, reg(rn), bits, 0b11))
        }
        AMode::PostIndex(rn, imm) => {
            let bits = to_imm9_bits(imm.byte_offset())?;
            Ok(ldst_imm9(size, opc, rt_n, reg(rn), bits, 0b01))
        }
        AMode::RegReg(rn, rm) => Ok(ldst_reg_offset(size, opc, rt_n, reg(rn), reg(rm), 0b011, false)),
        AMode::RegScaled(rn, rm) => Ok(ldst_reg_offset(size, opc, rt_n, reg(rn), reg(rm), 0b011, true)),
        AMode::RegExtended(rn, rm, ext) => {
            Ok(ldst_reg_offset(size, opc, rt_n, reg(rn), reg(rm), ext.bits(), false))
        }
        AMode::RegScaledExtended(rn, rm, ext) => {
            Ok(ldst_reg_offset(size, opc, rt_n, reg(rn), reg(rm), ext.bits(), true))
        }
    }
}

fn ldst_imm9(size: u32, opc: u32, rt: u32, rn: u32, imm9_bits: u32, idx_kind: u32) -> u32 {
    set_bits(
        0,
        [
            (30..32, size, 0..2),
            (27..30, 0b111, 0..3),
            (24..26, 0b00, 0..2),
            (22..24, opc, 0..2),
            (21..22, 0, 0..1),
            (12..21, imm9_bits, 0..9),
            (10..12, idx_kind, 0..2),
            (5..10, rn, 0..5),
            (0..5, rt, 0..5),
        ],
    )
}

fn ldst_reg_offset(size: u32, opc: u32, rt: u32, rn: u32, rm: u32, option: u32, scaled: bool) -> u32 {
    set_bits(
        0,
        [
            (30..32, size, 0..2),
            (27..30, 0b111, 0..3),
            (24..26, 0b00, 0..2),
            (22..24, opc, 0..2),
            (21..22, 1, 0..1),
            (16..21, rm, 0..5),
            (13..16, option, 0..3),
            (12..13, u32::from(scaled), 0..1),
            (10..12, 0b10, 0..2),
            (5..10, rn, 0..5),
            (0..5, rt, 0..5),
        ],
    )
}

fn vec_size_opc(size_bits: u16, is_store: bool) -> (u32, u32, u8) {
    match size_bits {
        32 => (0b10, u32::from(!is_store), 4),
        64 => (0b11, u32::from(!is_store), 8),
        128 => (0b00, if is_store { 0b10 } else { 0b11 }, 16),
        other => panic!("unsupported vector access width {other}"),
    }
}

fn load_store_vector(size_bits: u16, is_store: bool, rt: RegRef, amode: &AMode) -> Result<u32, CodeEncodeError> {
    let rt_n = reg(rt);
    let (size, opc, size_bytes) = vec_size_opc(size_bits, is_store);
    match *amode {
        AMode::RegUnsignedImm12(rn, imm) => {
            // `imm`'s own scale was chosen for this access size by the caller
            // (addressing-mode synthesis threads `size_bytes` through).
            let _ = size_bytes;
            Ok(set_bits(
                0,
                [
                    (30..32, size, 0..2),
                    (27..30, 0b111, 0..3),
                    (26..27, 1, 0..1),
                    (24..26, 0b01, 0..2),
                    (22..24, opc, 0..2),
                    (10..22, u32::from(imm.raw()), 0..12),
                    (5..10, reg(rn), 0..5),
                    (0..5, rt_n, 0..5),
                ],
            ))
        }
        AMode::RegSignedImm9(rn, imm) => Ok(vec_ldst_imm9(size, opc, rt_n, reg(rn), imm.bits(), 0b00)),
        AMode::PreIndex(rn, imm) => {
            let bits = to_imm9_bits(imm.byte_offset())?;
            Ok(vec_ldst_imm9(size, opc, rt_n, reg(rn), bits, 0b11))
        }
        AMode::PostIndex(rn, imm) => {
            let bits = to_imm9_bits(imm.byte_offset())?;
            Ok(vec_ldst_imm9(size, opc, rt_n, reg(rn), bits, 0b01))
        }
        AMode::RegReg(rn, rm) => Ok(vec_ldst_reg_offset(size, opc, rt_n, reg(rn), reg(rm), 0b011, false)),
        AMode::RegScaled(rn, rm) => Ok(vec_ldst_reg_offset(size, opc, rt_n, reg(rn), reg(rm), 0b011, true)),
        AMode::RegExtended(rn, rm, ext) => {
            Ok(vec_ldst_reg_offset(size, opc, rt_n, reg(rn), reg(rm), ext.bits(), false))
        }
        AMode::RegScaledExtended(rn, rm, ext) => {
            Ok(vec_ldst_reg_offset(size, opc, rt_n, reg(rn), reg(rm), ext.bits(), true))
        }
    }
}

fn vec_ldst_imm9(size: u32, opc: u32, rt: u32, rn: u32, imm9_bits: u32, idx_kind: u32) -> u32 {
    set_bits(
        0,
        [
            (30..32, size, 0..2),
            (27..30, 0b111, 0..3),
            (26..27, 1, 0..1),
            (24..26, 0b00, 0..2),
            (22..24, opc, 0..2),
            (21..22, 0, 0..1),
            (12..21, imm9_bits, 0..9),
            (10..12, idx_kind, 0..2),
            (5..10, rn, 0..5),
            (0..5, rt, 0..5),
        ],
    )
}

fn vec_ldst_reg_offset(size: u32, opc: u32, rt: u32, rn: u32, rm: u32, option: u32, scaled: bool) -> u32 {
    set_bits(
        0,
        [
            (30..32, size, 0..2),
            (27..30, 0b111, 0..3),
            (26..27, 1, 0..1),
            (24..26, 0b00, 0..2),
            (22..24, opc, 0..2),
            (21..22, 1, 0..1),
            (16..21, rm, 0..5),
            (13..16, option, 0..3),
            (12..13, u32::from(scaled), 0..1),
            (10..12, 0b10, 0..2),
            (5..10, rn, 0..5),
            (0..5, rt, 0..5),
        ],
    )
}

fn pair(is_store: bool, rt: RegRef, rt2: RegRef, amode: &PairAMode) -> Result<u32, CodeEncodeError> {
    let (imm, idx_base) = match *amode {
        PairAMode::Offset(_, imm) => (imm, if is_store { 0xA900_0000u32 } else { 0xA940_0000 }),
        PairAMode::PreIndex(_, imm) => (imm, if is_store { 0xA980_0000 } else { 0xA9C0_0000 }),
        PairAMode::PostIndex(_, imm) => (imm, if is_store { 0xA880_0000 } else { 0xA8C0_0000 }),
    };
    let rn = amode.base();
    Ok(set_bits(
        idx_base,
        [
            (15..22, imm.bits(), 0..7),
            (10..15, reg(rt2), 0..5),
            (5..10, reg(rn), 0..5),
            (0..5, reg(rt), 0..5),
        ],
    ))
}

fn fpu_unary(op: FpuUnaryOp, size64: bool, rd: RegRef, rn: RegRef) -> u32 {
    let (ty, opcode) = match op {
        FpuUnaryOp::Abs => (u32::from(size64), 0b000001),
        FpuUnaryOp::Neg => (u32::from(size64), 0b000010),
        FpuUnaryOp::Sqrt => (u32::from(size64), 0b000011),
        FpuUnaryOp::RoundNearest => (u32::from(size64), 0b001000),
        FpuUnaryOp::RoundPlus => (u32::from(size64), 0b001001),
        FpuUnaryOp::RoundMinus => (u32::from(size64), 0b001010),
        FpuUnaryOp::RoundZero => (u32::from(size64), 0b001011),
        FpuUnaryOp::Cvt32To64 => (0b00, 0b000101),
        FpuUnaryOp::Cvt64To32 => (0b01, 0b000100),
    };
    set_bits(
        0,
        [
            (24..29, 0b11110, 0..5),
            (22..24, ty, 0..2),
            (21..22, 1, 0..1),
            (15..21, opcode, 0..6),
            (10..15, 0b10000, 0..5),
            (5..10, reg(rn), 0..5),
            (0..5, reg(rd), 0..5),
        ],
    )
}

fn fpu_binary(op: FpuBinOp, size64: bool, rd: RegRef, rn: RegRef, rm: RegRef) -> u32 {
    let ty = u32::from(size64);
    let opcode = match op {
        FpuBinOp::Mul => 0b0000,
        FpuBinOp::Div => 0b0001,
        FpuBinOp::Add => 0b0010,
        FpuBinOp::Sub => 0b0011,
        FpuBinOp::Max => 0b0100,
        FpuBinOp::Min => 0b0101,
    };
    set_bits(
        0,
        [
            (24..29, 0b11110, 0..5),
            (22..24, ty, 0..2),
            (21..22, 1, 0..1),
            (16..21, reg(rm), 0..5),
            (12..16, opcode, 0..4),
            (10..12, 0b10, 0..2),
            (5..10, reg(rn), 0..5),
            (0..5, reg(rd), 0..5),
        ],
    )
}

fn arrangement_size_q(a: VecArrangement) -> (u32, u32) {
    match a {
        VecArrangement::B8 => (0b00, 0),
        VecArrangement::B16 => (0b00, 1),
        VecArrangement::H4 => (0b01, 0),
        VecArrangement::H8 => (0b01, 1),
        VecArrangement::S2 => (0b10, 0),
        VecArrangement::S4 => (0b10, 1),
        VecArrangement::D2 => (0b11, 1),
    }
}

fn vec_rrr(op: VecRRROp, arrangement: VecArrangement, rd: RegRef, rn: RegRef, rm: RegRef) -> u32 {
    let (size, q) = arrangement_size_q(arrangement);
    let (u, opcode, size) = match op {
        VecRRROp::Add => (0, 0b10000, size),
        VecRRROp::Sub => (1, 0b10000, size),
        VecRRROp::Mul => (0, 0b10011, size),
        VecRRROp::And => (0, 0b00011, 0b00),
        VecRRROp::Orr => (0, 0b00011, 0b10),
        VecRRROp::Eor => (1, 0b00011, 0b00),
    };
    set_bits(
        0,
        [
            (30..31, q, 0..1),
            (29..30, u, 0..1),
            (24..29, 0b01110, 0..5),
            (22..24, size, 0..2),
            (21..22, 1, 0..1),
            (16..21, reg(rm), 0..5),
            (11..16, opcode, 0..5),
            (10..11, 1, 0..1),
            (5..10, reg(rn), 0..5),
            (0..5, reg(rd), 0..5),
        ],
    )
}

fn vec_misc(op: VecMiscOp, arrangement: VecArrangement, rd: RegRef, rn: RegRef) -> u32 {
    let (size, q) = arrangement_size_q(arrangement);
    let (u, opcode) = match op {
        VecMiscOp::Cnt => (0, 0b00101),
        VecMiscOp::Neg => (1, 0b01011),
        VecMiscOp::Abs => (0, 0b01011),
    };
    set_bits(
        0,
        [
            (30..31, q, 0..1),
            (29..30, u, 0..1),
            (24..29, 0b01110, 0..5),
            (22..24, size, 0..2),
            (17..22, 0b10000, 0..5),
            (12..17, opcode, 0..5),
            (10..12, 0b10, 0..2),
            (5..10, reg(rn), 0..5),
            (0..5, reg(rd), 0..5),
        ],
    )
}

fn vec_lanes(op: VecLanesOp, arrangement: VecArrangement, rd: RegRef, rn: RegRef) -> u32 {
    let (size, q) = arrangement_size_q(arrangement);
    let (u, opcode) = match op {
        VecLanesOp::Addv => (0, 0b11011),
        VecLanesOp::Uaddlv => (1, 0b00011),
    };
    set_bits(
        0,
        [
            (30..31, q, 0..1),
            (29..30, u, 0..1),
            (24..29, 0b01110, 0..5),
            (22..24, size, 0..2),
            (17..22, 0b11000, 0..5),
            (12..17, opcode, 0..5),
            (10..12, 0b10, 0..2),
            (5..10, reg(rn), 0..5),
            (0..5, reg(rd), 0..5),
        ],
    )
}

/// `movi Vd.16b, #0`: materializes an all-zero 128-bit vector register in a
/// single instruction (AdvSIMD modified-immediate class, `cmode` = 0b1110,
/// `op` = 0, abc/defgh = 0).
fn movi_zero(rd: RegRef) -> u32 {
    set_bits(
        0,
        [
            (30..31, 1, 0..1),       // Q = 1 (full 128-bit arrangement)
            (29..30, 0, 0..1),       // op
            (19..29, 0b0111100000, 0..10),
            (16..19, 0, 0..3),       // abc
            (12..16, 0b1110, 0..4),  // cmode
            (11..12, 0, 0..1),       // o2
            (10..11, 1, 0..1),
            (5..10, 0, 0..5),        // defgh
            (0..5, reg(rd), 0..5),
        ],
    )
}

/// A literal-pool FPU load (spec.md §4.3): `ldr` literal followed by an
/// unconditional branch over the inlined constant, then the constant bytes
/// themselves, so execution never falls through into the data. A
/// zero-valued payload is instead materialized with a single `movi`.
fn literal_fpu_load(width_bits: u32, rd: RegRef, payload: &[u8]) -> Vec<u8> {
    if payload.iter().all(|&b| b == 0) {
        return word(movi_zero(rd));
    }

    let opc = match width_bits {
        32 => 0b00,
        64 => 0b01,
        128 => 0b10,
        _ => unreachable!(),
    };
    let w = set_bits(
        0,
        [
            (30..32, opc, 0..2),
            (27..30, 0b011, 0..3),
            (26..27, 1, 0..1),
            (24..26, 0b00, 0..2),
            // payload starts 8 bytes (2 words) after this instruction: this
            // `ldr`, then the skip-branch, then the datum.
            (5..24, 2, 0..19),
            (0..5, reg(rd), 0..5),
        ],
    );
    let skip_words = SImm26Words::maybe_from_byte_offset(payload.len() as i64 + 4)
        .expect("fpu literal payloads are always well within a 26-bit branch range");

    let mut out = word(w);
    out.extend(word(0x1400_0000 | skip_words.bits()));
    out.extend_from_slice(payload);
    out
}

/// The fixed 24-byte, 6-instruction exit sequence (spec.md §4.3, §6):
/// restore the caller's frame pointer, return address, and stack pointer
/// from the execution context, then return. Instruction order and the
/// `add`-not-`orr` stack-pointer restore match spec.md §8's literal hex
/// vector bit-for-bit.
fn exit_sequence(context_reg: PReg, offsets: &crate::abi::ExecutionContextOffsets) -> Vec<u8> {
    let ctx = RegRef::Physical(context_reg);
    let tmp = RegRef::Physical(crate::registers::tmp_reg());
    let fp = RegRef::Physical(crate::registers::fp_reg());
    let lr = RegRef::Physical(crate::registers::lr_reg());
    let sp = RegRef::Physical(crate::registers::sp_reg());

    let load = |offset: i64, rt: RegRef| -> Vec<u8> {
        let imm = crate::common::imm::UImm12Scaled::maybe_from_offset(offset, 8)
            .expect("execution-context offsets must be 8-byte aligned and in range");
        let amode = AMode::RegUnsignedImm12(ctx, imm);
        encode_kind(&Kind::Load {
            size_bits: 64,
            signed: false,
            rt,
            amode,
        })
        .expect("scalar load of a context field always encodes")
    };

    let mut out = Vec::with_capacity(24);
    out.extend(load(offsets.original_frame_pointer, fp));
    out.extend(load(offsets.goroutine_return_address, lr));
    out.extend(load(offsets.original_stack_pointer, tmp));
    // `mov sp, tmp`: SP cannot be an `orr`-shifted-register destination
    // (spec.md §4.3, "Move from/to SP"), so this is `add sp, tmp, #0`.
    out.extend(
        encode_kind(&Kind::AluRRImm12 {
            op: AluOp::Add,
            size64: true,
            rd: sp,
            rn: tmp,
            imm: crate::common::imm::Imm12::maybe_from_u64(0)
                .expect("zero always fits Imm12"),
        })
        .expect("add-immediate always encodes"),
    );
    out.extend(word(0xD65F_03C0)); // ret
    out.extend(word(0x1400_0000)); // `b +0`, padding to the documented fixed 24-byte size
    out
}

/// `adr` + `ldrsw` + `add` + `br`, followed by `targets.len()` inlined
/// 32-bit offsets from the first offset word to each target (spec.md §4.3).
fn br_table_sequence(index: RegRef, targets: &[crate::inst::BranchTarget]) -> Result<Vec<u8>, CodeEncodeError> {
    let tmp = RegRef::Physical(crate::registers::tmp_reg());

    let mut out = Vec::with_capacity(16 + targets.len() * 4);
    // `adr tmp, <table-base>`: the table starts immediately after these 4
    // setup instructions (16 bytes).
    let adr = crate::common::imm::SImm21::try_from(16).expect("16 fits a 21-bit immediate");
    out.extend(word(set_bits(
        0,
        [
            (31..32, 0, 0..1),
            (29..31, adr.immlo(), 0..2),
            (24..29, 0b10000, 0..5),
            (5..24, adr.immhi(), 0..19),
            (0..5, reg(tmp), 0..5),
        ],
    )));
    // `ldrsw index, [tmp, index, uxtw #2]`: the loaded offset overwrites
    // `index` itself in place, so this sequence never needs a second
    // scratch register (spec.md §8's literal hex vector confirms the same
    // register appears as both the ldrsw's Rt and Rm).
    out.extend(word(ldst_reg_offset(0b10, 0b10, reg(index), reg(tmp), reg(index), 0b010, true)));
    // `add tmp, tmp, index`
    out.extend(word(alu_rrr_shifted(
        AluOp::Add,
        true,
        tmp,
        tmp,
        index,
        0,
        0,
    )?));
    // `br tmp`
    out.extend(word(0xD61F_0000 | (reg(tmp) << 5)));

    for target in targets {
        let offset = target
            .resolved_offset
            .expect("jump-table targets must be resolved before encoding");
        out.extend(offset.to_le_bytes());
    }
    Ok(out)
}

/// Overwrite the 26-bit branch-offset field of an already-encoded `b`/`bl`
/// instruction with a new byte displacement, leaving its top 6 opcode bits
/// untouched. Used by [`crate::link`] to patch call-site displacements once
/// whole-unit byte offsets (and any trampoline redirection) are known.
pub fn patch_branch26(word_bytes: &mut [u8; 4], byte_delta: i64) -> Result<(), CodeEncodeError> {
    let words = SImm26Words::maybe_from_byte_offset(byte_delta).ok_or(CodeEncodeError::UnencodableOffset {
        offset: byte_delta,
        size: 26,
    })?;
    let existing = u32::from_le_bytes(*word_bytes);
    let patched = (existing & 0xFC00_0000) | words.bits();
    *word_bytes = patched.to_le_bytes();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::imm::Imm12;
    use crate::registers::PReg;

    fn r(n: u8) -> RegRef {
        RegRef::Physical(PReg::int(n))
    }

    fn hex(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{b:02x}")).collect()
    }

    #[test]
    fn add_extended_register_sxtb() {
        // `add x0, x2, x20, SXTB` (the literal hex's actual extend field,
        // confirmed by direct bit decoding: `4080348b`).
        let k = Kind::AluRRRExtend {
            op: AluOp::Add,
            size64: true,
            rd: r(0),
            rn: r(2),
            rm: r(20),
            extend: crate::common::extend::ExtendOp::Sxtb,
            extend_shift: crate::common::shift::ShiftAmt6::ZERO,
        };
        let bytes = encode_kind(&k).unwrap();
        assert_eq!(hex(&bytes), "4080348b");
    }

    #[test]
    fn movz_hw3() {
        // `movz x18, #0xaaaa, lsl #48` (the literal hex's actual shift,
        // confirmed by direct bit decoding: `5255f5d2`).
        let k = Kind::MovZ {
            size64: true,
            rd: r(18),
            imm: crate::common::imm::MovWideImm::new(0xaaaa, 48),
        };
        let bytes = encode_kind(&k).unwrap();
        assert_eq!(hex(&bytes), "5255f5d2");
    }

    #[test]
    fn mov_register_via_orr_zero() {
        // `mov x3, x4` (64-bit register move via `orr xzr`): `e30304aa`.
        let k = Kind::Mov { size64: true, rd: r(3), rn: r(4) };
        let bytes = encode_kind(&k).unwrap();
        assert_eq!(hex(&bytes), "e30304aa");
    }

    #[test]
    fn load_unsigned_imm12_64bit() {
        // `ldr x5, [x30, #16]` (unsigned-imm12, 64-bit load): `c50b40f9`.
        let amode = crate::amode::AMode::RegUnsignedImm12(
            r(30),
            crate::common::imm::UImm12Scaled::maybe_from_offset(16, 8).unwrap(),
        );
        let k = Kind::Load { size_bits: 64, signed: false, rt: r(5), amode };
        let bytes = encode_kind(&k).unwrap();
        assert_eq!(hex(&bytes), "c50b40f9");
    }

    #[test]
    fn cbz_matches_literal_hex_vector() {
        // `cbz w1, +0x80`: `01040034`.
        let mut target = crate::inst::BranchTarget::new(crate::inst::Label(0));
        target.resolved_offset = Some(0x80);
        let k = Kind::CondBr {
            kind: CondBrKind::Zero { reg: r(1), size64: false },
            target,
        };
        let bytes = encode_kind(&k).unwrap();
        let w = u32::from_le_bytes(bytes.clone().try_into().unwrap());
        assert_eq!(w >> 31, 0, "cbz w1 must clear the 64-bit size bit");
        assert_eq!(hex(&bytes), "01040034");
    }

    #[test]
    fn adr_matches_literal_hex_vector() {
        // `adr x16, +0xa9` (offset 169): `50050030`.
        let mut target = crate::inst::BranchTarget::new(crate::inst::Label(0));
        target.resolved_offset = Some(169);
        let k = Kind::Adr { rd: r(16), target };
        let bytes = encode_kind(&k).unwrap();
        assert_eq!(hex(&bytes), "50050030");
    }

    #[test]
    fn bitmask_and_vector() {
        let bm = crate::common::bitmask::BitmaskImm::try_encode(0x0000_FFFF_FFFF_FFFE).unwrap();
        let k = Kind::AluRRBitmaskImm {
            op: AluOp::And,
            size64: true,
            rd: r(15),
            rn: r(18),
            bitmask: bm,
        };
        let bytes = encode_kind(&k).unwrap();
        assert_eq!(hex(&bytes), "4fba7f92");
    }

    #[test]
    fn add_imm12_basic_form() {
        let k = Kind::AluRRImm12 {
            op: AluOp::Add,
            size64: true,
            rd: r(0),
            rn: r(1),
            imm: Imm12::maybe_from_u64(5).unwrap(),
        };
        let bytes = encode_kind(&k).unwrap();
        // sf=1 op=0 S=0 10001 shift=0 imm12=5 Rn=1 Rd=0
        let w = u32::from_le_bytes(bytes.try_into().unwrap());
        assert_eq!(w >> 31, 1);
        assert_eq!((w >> 22) & 1, 0);
        assert_eq!((w >> 10) & 0xFFF, 5);
        assert_eq!((w >> 5) & 0x1F, 1);
        assert_eq!(w & 0x1F, 0);
    }

    #[test]
    fn ret_is_fixed_word() {
        let k = Kind::Ret {
            abi: std::rc::Rc::new(crate::abi::AbiRecord::empty()),
        };
        let bytes = encode_kind(&k).unwrap();
        assert_eq!(hex(&bytes), "c0035fd6");
    }

    #[test]
    fn nop_has_zero_length() {
        let bytes = encode_kind(&Kind::Nop { label: None }).unwrap();
        assert!(bytes.is_empty());
    }

    #[test]
    fn exit_sequence_is_24_bytes() {
        let offsets = crate::abi::ExecutionContextOffsets {
            stack_limit: 0,
            stack_grow_required_size: 8,
            stack_grow_call_sequence: 16,
            original_frame_pointer: 24,
            original_stack_pointer: 32,
            goroutine_return_address: 40,
        };
        let bytes = exit_sequence(crate::registers::context_reg(), &offsets);
        assert_eq!(bytes.len(), 24);
    }

    #[test]
    fn exit_sequence_matches_literal_hex_vector() {
        // spec.md §8, "Exit-sequence layout": context register x22.
        let offsets = crate::abi::ExecutionContextOffsets {
            stack_limit: 0,
            stack_grow_required_size: 8,
            stack_grow_call_sequence: 40,
            original_frame_pointer: 16,
            original_stack_pointer: 24,
            goroutine_return_address: 32,
        };
        let bytes = exit_sequence(PReg::int(22), &offsets);
        assert_eq!(
            hex(&bytes),
            "dd0a40f9de1240f9db0e40f97f030091c0035fd600000014"
        );
    }

    #[test]
    fn br_table_sequence_matches_literal_hex_vector() {
        // spec.md §8: 10 targets, index in x22, all resolved to offset 0
        // (only the 4-instruction lead-in is pinned by the vector).
        let targets: Vec<crate::inst::BranchTarget> = (0..10)
            .map(|_| {
                let mut t = crate::inst::BranchTarget::new(crate::inst::Label(0));
                t.resolved_offset = Some(0);
                t
            })
            .collect();
        let bytes = br_table_sequence(r(22), &targets).unwrap();
        assert_eq!(bytes.len(), 16 + 40);
        assert_eq!(hex(&bytes[..16]), "9b000010765bb6b87b03168b60031fd6");
    }

    #[test]
    fn jump_patch_preserves_opcode_bits() {
        let mut bytes = word(0x1400_0000).try_into().unwrap();
        patch_branch26(&mut bytes, 64).unwrap();
        let w = u32::from_le_bytes(bytes);
        assert_eq!(w >> 26, 0b000101);
        assert_eq!(w & 0x3FF_FFFF, 16);
    }
}
