//! A disassembly-style `Display` impl for [`Inst`]/[`Kind`] (spec.md §4.1:
//! "a formatter producing a human-readable textual form used by the
//! disassembler-style test harness").
//!
//! This is not a general decoder — it only ever renders instructions this
//! crate itself constructed, and is exercised by the encoding test suite to
//! make failures readable.

use core::fmt;
use std::fmt::Display;

use super::{Inst, Kind, PairAMode};

impl Display for PairAMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PairAMode::Offset(rn, imm) => write!(f, "[{rn}, {imm}]"),
            PairAMode::PreIndex(rn, imm) => write!(f, "[{rn}, {imm}]!"),
            PairAMode::PostIndex(rn, imm) => write!(f, "[{rn}], {imm}"),
        }
    }
}

impl Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Kind::AluRRR { op, rd, rn, rm, .. } => write!(f, "{op:?} {rd}, {rn}, {rm}"),
            Kind::AluRRRR { op, rd, rn, rm, ra, .. } => {
                write!(f, "{op:?} {rd}, {rn}, {rm}, {ra}")
            }
            Kind::AluRRImm12 { op, rd, rn, imm, .. } => write!(f, "{op:?} {rd}, {rn}, {imm}"),
            Kind::AluRRBitmaskImm { op, rd, rn, bitmask, .. } => {
                write!(f, "{op:?} {rd}, {rn}, #{:#x}", bitmask.decode().unwrap_or(0))
            }
            Kind::AluRRRShift { op, rd, rn, rm, shift, .. } => {
                write!(f, "{op:?} {rd}, {rn}, {rm}, {shift}")
            }
            Kind::AluRRRExtend { op, rd, rn, rm, extend, extend_shift, .. } => {
                if extend_shift.value() == 0 {
                    write!(f, "{op:?} {rd}, {rn}, {rm}, {extend}")
                } else {
                    write!(f, "{op:?} {rd}, {rn}, {rm}, {extend} #{}", extend_shift.value())
                }
            }
            Kind::AluRRImmShift { op, rd, rn, amount, .. } => {
                write!(f, "{op} {rd}, {rn}, #{}", amount.value())
            }
            Kind::BitRR { op, rd, rn, .. } => write!(f, "{op:?} {rd}, {rn}"),
            Kind::Mov { rd, rn, .. } => write!(f, "mov {rd}, {rn}"),
            Kind::MovZ { rd, imm, .. } => write!(f, "movz {rd}, {imm}"),
            Kind::MovK { rd, imm, .. } => write!(f, "movk {rd}, {imm}"),
            Kind::MovN { rd, imm, .. } => write!(f, "movn {rd}, {imm}"),
            Kind::Load { rt, amode, signed, size_bits, .. } => {
                let prefix = if *signed { "ldrs" } else { "ldr" };
                write!(f, "{prefix}{size_bits} {rt}, {amode}")
            }
            Kind::Store { rt, amode, size_bits, .. } => write!(f, "str{size_bits} {rt}, {amode}"),
            Kind::VecLoad { rt, amode, size_bits, .. } => write!(f, "ldr{size_bits} {rt}, {amode}"),
            Kind::VecStore { rt, amode, size_bits, .. } => write!(f, "str{size_bits} {rt}, {amode}"),
            Kind::LoadPair64 { rt, rt2, amode } => write!(f, "ldp {rt}, {rt2}, {amode}"),
            Kind::StorePair64 { rt, rt2, amode } => write!(f, "stp {rt}, {rt2}, {amode}"),
            Kind::FpuRR { op, rd, rn, .. } => write!(f, "{op:?} {rd}, {rn}"),
            Kind::FpuRRR { op, rd, rn, rm, .. } => write!(f, "{op:?} {rd}, {rn}, {rm}"),
            Kind::FpuCmp { rn, rm, .. } => write!(f, "fcmp {rn}, {rm}"),
            Kind::FpuCSel { rd, rn, rm, cond, .. } => {
                write!(f, "fcsel {rd}, {rn}, {rm}, {cond}")
            }
            Kind::FpuToInt { rd, rn, signed, .. } => {
                let op = if *signed { "fcvtzs" } else { "fcvtzu" };
                write!(f, "{op} {rd}, {rn}")
            }
            Kind::IntToFpu { rd, rn, signed, .. } => {
                let op = if *signed { "scvtf" } else { "ucvtf" };
                write!(f, "{op} {rd}, {rn}")
            }
            Kind::CSel { rd, rn, rm, cond, .. } => write!(f, "csel {rd}, {rn}, {rm}, {cond}"),
            Kind::CSet { rd, cond, .. } => write!(f, "cset {rd}, {cond}"),
            Kind::VecRRR { op, rd, rn, rm, .. } => write!(f, "{op:?} {rd}, {rn}, {rm}"),
            Kind::VecMisc { op, rd, rn, .. } => write!(f, "{op:?} {rd}, {rn}"),
            Kind::VecLanes { op, rd, rn, .. } => write!(f, "{op:?} {rd}, {rn}"),
            Kind::VecUnimplemented { mnemonic, rd, rn } => write!(f, "{mnemonic} {rd}, {rn}"),
            Kind::Jump { .. } => write!(f, "b <label>"),
            Kind::CondBr { kind, .. } => match kind {
                crate::common::cond::CondBrKind::Zero { reg, .. } => write!(f, "cbz {reg}, <label>"),
                crate::common::cond::CondBrKind::NotZero { reg, .. } => write!(f, "cbnz {reg}, <label>"),
                crate::common::cond::CondBrKind::Cond(c) => write!(f, "b.{c} <label>"),
            },
            Kind::CallDirect { callee, .. } => write!(f, "bl func{}", callee.0),
            Kind::CallIndirect { rn, .. } => write!(f, "blr {rn}"),
            Kind::Ret { .. } => write!(f, "ret"),
            Kind::Adr { rd, .. } => write!(f, "adr {rd}, <label>"),
            Kind::Udf => write!(f, "udf #0"),
            Kind::Nop { label: Some(l) } => write!(f, "nop ; label{}", l.0),
            Kind::Nop { label: None } => write!(f, "nop"),
            Kind::ExitSequence { .. } => write!(f, "<exit-sequence>"),
            Kind::FpsrMove { to_fpsr: true, reg } => write!(f, "msr fpsr, {reg}"),
            Kind::FpsrMove { to_fpsr: false, reg } => write!(f, "mrs {reg}, fpsr"),
            Kind::BrTableSequence { index, targets } => {
                write!(f, "br_table {index}, [{} targets]", targets.len())
            }
            Kind::LoadFpuConst32 { rd, bits } => write!(f, "ldr {rd}, ={bits:#010x}"),
            Kind::LoadFpuConst64 { rd, bits } => write!(f, "ldr {rd}, ={bits:#018x}"),
            Kind::LoadFpuConst128 { rd, bits } => write!(f, "ldr {rd}, ={bits:#034x}"),
        }
    }
}

impl Display for Inst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.kind, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inst::AluOp;
    use crate::registers::PReg;
    use crate::vreg::RegRef;

    fn reg(n: u8) -> RegRef {
        RegRef::Physical(PReg::int(n))
    }

    #[test]
    fn alu_rrr_renders_operands_in_order() {
        let k = Kind::AluRRR {
            op: AluOp::Add,
            size64: true,
            rd: reg(0),
            rn: reg(1),
            rm: reg(2),
        };
        assert_eq!(k.to_string(), "Add x0, x1, x2");
    }

    #[test]
    fn ret_has_no_operands() {
        let k = Kind::Ret {
            abi: std::rc::Rc::new(crate::abi::AbiRecord::empty()),
        };
        assert_eq!(k.to_string(), "ret");
    }
}
