//! The register-lifetime query contract (spec.md §4.2): `defs`, `uses`,
//! `assign_use`, `assign_def`.
//!
//! Positional `uses()` entries that are already physical (an ABI-fixed
//! argument or return register) are never rewritten — `assign_use` panics if
//! asked to touch one, which is how this crate enforces spec.md §4.2's
//! "calls and returns are rejected as unassignable" without a separate
//! tag per slot.

use smallvec::SmallVec;

use crate::registers::PReg;
use crate::vreg::RegRef;

use super::{AluOp, Kind};

/// One positional use slot. A thin wrapper rather than a bare `RegRef` so
/// `assign_use` can report a clear panic message naming the slot's role.
pub type UseSlot = RegRef;

/// The positional, ordered list of registers an instruction uses (spec.md
/// §4.2, `uses(inst)`).
pub type Uses = SmallVec<[UseSlot; 4]>;

fn phys(r: PReg) -> RegRef {
    RegRef::Physical(r)
}

impl Kind {
    /// The set of virtual/physical registers this instruction defines
    /// (spec.md §4.2, `defs(inst)`): zero, one (`RD`), or — for calls — every
    /// real return-value register on the ABI record.
    #[must_use]
    pub fn defs(&self) -> Defs {
        match self {
            Kind::AluRRR { rd, .. }
            | Kind::AluRRRR { rd, .. }
            | Kind::AluRRImm12 { rd, .. }
            | Kind::AluRRBitmaskImm { rd, .. }
            | Kind::AluRRRShift { rd, .. }
            | Kind::AluRRRExtend { rd, .. }
            | Kind::AluRRImmShift { rd, .. }
            | Kind::BitRR { rd, .. }
            | Kind::Mov { rd, .. }
            | Kind::MovZ { rd, .. }
            | Kind::MovK { rd, .. }
            | Kind::MovN { rd, .. }
            | Kind::Load { rt: rd, .. }
            | Kind::VecLoad { rt: rd, .. }
            | Kind::FpuRR { rd, .. }
            | Kind::FpuRRR { rd, .. }
            | Kind::FpuCSel { rd, .. }
            | Kind::FpuToInt { rd, .. }
            | Kind::IntToFpu { rd, .. }
            | Kind::CSel { rd, .. }
            | Kind::CSet { rd, .. }
            | Kind::VecRRR { rd, .. }
            | Kind::VecMisc { rd, .. }
            | Kind::VecLanes { rd, .. }
            | Kind::VecUnimplemented { rd, .. }
            | Kind::Adr { rd, .. }
            | Kind::LoadFpuConst32 { rd, .. }
            | Kind::LoadFpuConst64 { rd, .. }
            | Kind::LoadFpuConst128 { rd, .. } => Defs::One(*rd),

            Kind::LoadPair64 { rt, rt2, .. } => Defs::Pair(*rt, *rt2),

            Kind::CallDirect { abi, .. } | Kind::CallIndirect { abi, .. } => {
                Defs::Call(abi.ret_regs.clone())
            }

            Kind::FpsrMove { to_fpsr: false, reg } => Defs::One(*reg),

            Kind::Store { .. }
            | Kind::VecStore { .. }
            | Kind::StorePair64 { .. }
            | Kind::FpuCmp { .. }
            | Kind::Jump { .. }
            | Kind::CondBr { .. }
            | Kind::Ret { .. }
            | Kind::Udf
            | Kind::Nop { .. }
            | Kind::ExitSequence { .. }
            | Kind::FpsrMove { to_fpsr: true, .. }
            | Kind::BrTableSequence { .. } => Defs::None,
        }
    }

    /// The positional, ordered sequence of registers this instruction uses
    /// (spec.md §4.2, `uses(inst)`).
    #[must_use]
    pub fn uses(&self) -> Uses {
        let mut out = Uses::new();
        match self {
            Kind::AluRRR { rn, rm, .. } | Kind::AluRRRShift { rn, rm, .. } => {
                out.push(*rn);
                out.push(*rm);
            }
            Kind::AluRRRExtend { rn, rm, .. } => {
                out.push(*rn);
                out.push(*rm);
            }
            Kind::AluRRRR { rn, rm, ra, .. } => {
                out.push(*rn);
                out.push(*rm);
                out.push(*ra);
            }
            Kind::AluRRImm12 { rn, .. } | Kind::AluRRBitmaskImm { rn, .. } => out.push(*rn),
            Kind::AluRRImmShift { rn, .. } => out.push(*rn),
            Kind::BitRR { rn, .. } => out.push(*rn),
            Kind::Mov { rn, .. } => out.push(*rn),
            Kind::MovZ { .. } | Kind::MovK { .. } | Kind::MovN { .. } => {}
            Kind::Load { amode, .. } | Kind::VecLoad { amode, .. } | Kind::Store { amode, .. }
            | Kind::VecStore { amode, .. } => {
                out.push(amode.base());
                if let Some(idx) = amode.index() {
                    out.push(idx);
                }
                if let Kind::Store { rt, .. } | Kind::VecStore { rt, .. } = self {
                    out.push(*rt);
                }
            }
            Kind::LoadPair64 { amode, .. } => out.push(amode.base()),
            Kind::StorePair64 { rt, rt2, amode } => {
                out.push(amode.base());
                out.push(*rt);
                out.push(*rt2);
            }
            Kind::FpuRR { rn, .. } => out.push(*rn),
            Kind::FpuRRR { rn, rm, .. } => {
                out.push(*rn);
                out.push(*rm);
            }
            Kind::FpuCmp { rn, rm, .. } => {
                out.push(*rn);
                out.push(*rm);
            }
            Kind::FpuCSel { rn, rm, .. } | Kind::CSel { rn, rm, .. } => {
                out.push(*rn);
                out.push(*rm);
            }
            Kind::CSet { .. } => {}
            Kind::FpuToInt { rn, .. } | Kind::IntToFpu { rn, .. } => out.push(*rn),
            Kind::VecRRR { rn, rm, .. } => {
                out.push(*rn);
                out.push(*rm);
            }
            Kind::VecMisc { rn, .. } | Kind::VecLanes { rn, .. } | Kind::VecUnimplemented { rn, .. } => {
                out.push(*rn);
            }
            Kind::Jump { .. } | Kind::Adr { .. } | Kind::Udf | Kind::Nop { .. } => {}
            Kind::CondBr { kind, .. } => {
                if let Some(r) = kind.tested_reg() {
                    out.push(r);
                }
            }
            Kind::CallDirect { abi, .. } => {
                out.extend(abi.arg_regs.iter().copied().map(phys));
            }
            Kind::CallIndirect { rn, abi } => {
                out.extend(abi.arg_regs.iter().copied().map(phys));
                out.push(*rn);
            }
            Kind::Ret { abi } => {
                out.extend(abi.ret_regs.iter().copied().map(phys));
            }
            Kind::ExitSequence { .. } => {}
            Kind::FpsrMove { to_fpsr: true, reg } => out.push(*reg),
            Kind::FpsrMove { to_fpsr: false, .. } => {}
            Kind::BrTableSequence { index, .. } => out.push(*index),
            Kind::LoadFpuConst32 { .. }
            | Kind::LoadFpuConst64 { .. }
            | Kind::LoadFpuConst128 { .. } => {}
        }
        out
    }

    /// Rewrite the `position`-th use slot to `phys_reg`. Panics if
    /// `position` is out of range, if the slot's class does not match
    /// `phys_reg`, or if the slot already held a fixed physical register
    /// (a call argument or return-live register: spec.md §4.2, "calls and
    /// returns are rejected as unassignable").
    pub fn assign_use(&mut self, position: usize, phys_reg: PReg) {
        let current = self.uses().get(position).copied().unwrap_or_else(|| {
            panic!("use position {position} out of range for {self:?}");
        });
        assert!(
            current.as_virtual().is_some(),
            "position {position} is a fixed real register, not assignable"
        );
        assert_eq!(current.class(), phys_reg.class(), "register class mismatch");
        self.write_use(position, phys_reg);
    }

    fn write_use(&mut self, position: usize, phys_reg: PReg) {
        let mut seen = 0usize;
        macro_rules! maybe_assign {
            ($slot:expr) => {
                if seen == position {
                    $slot.assign(phys_reg);
                    return;
                }
                seen += 1;
            };
        }
        match self {
            Kind::AluRRR { rn, rm, .. } | Kind::AluRRRShift { rn, rm, .. } | Kind::AluRRRExtend { rn, rm, .. } => {
                maybe_assign!(rn);
                maybe_assign!(rm);
            }
            Kind::AluRRRR { rn, rm, ra, .. } => {
                maybe_assign!(rn);
                maybe_assign!(rm);
                maybe_assign!(ra);
            }
            Kind::AluRRImm12 { rn, .. } | Kind::AluRRBitmaskImm { rn, .. } | Kind::AluRRImmShift { rn, .. } => {
                maybe_assign!(rn);
            }
            Kind::BitRR { rn, .. } | Kind::Mov { rn, .. } => maybe_assign!(rn),
            Kind::Load { amode, .. } | Kind::VecLoad { amode, .. } => {
                if position == 0 {
                    assign_amode_base(amode, phys_reg);
                } else if position == 1 {
                    assign_amode_index(amode, phys_reg);
                }
            }
            Kind::Store { amode, rt, .. } | Kind::VecStore { amode, rt, .. } => {
                if position == 0 {
                    assign_amode_base(amode, phys_reg);
                    return;
                }
                if amode.index().is_some() {
                    if position == 1 {
                        assign_amode_index(amode, phys_reg);
                        return;
                    }
                    if position == 2 {
                        rt.assign(phys_reg);
                        return;
                    }
                } else if position == 1 {
                    rt.assign(phys_reg);
                    return;
                }
            }
            Kind::LoadPair64 { amode, .. } => {
                if position == 0 {
                    assign_amode_base(amode, phys_reg);
                }
            }
            Kind::StorePair64 { amode, rt, rt2, .. } => match position {
                0 => assign_amode_base(amode, phys_reg),
                1 => rt.assign(phys_reg),
                2 => rt2.assign(phys_reg),
                _ => {}
            },
            Kind::FpuRR { rn, .. } | Kind::FpuToInt { rn, .. } | Kind::IntToFpu { rn, .. } => {
                maybe_assign!(rn);
            }
            Kind::FpuRRR { rn, rm, .. } | Kind::FpuCmp { rn, rm, .. } | Kind::FpuCSel { rn, rm, .. } | Kind::CSel { rn, rm, .. } | Kind::VecRRR { rn, rm, .. } => {
                maybe_assign!(rn);
                maybe_assign!(rm);
            }
            Kind::VecMisc { rn, .. } | Kind::VecLanes { rn, .. } | Kind::VecUnimplemented { rn, .. } => {
                maybe_assign!(rn);
            }
            Kind::CondBr { kind, .. } => {
                if let crate::common::cond::CondBrKind::Zero { reg, .. }
                | crate::common::cond::CondBrKind::NotZero { reg, .. } = kind
                {
                    if position == 0 {
                        reg.assign(phys_reg);
                    }
                }
            }
            Kind::CallIndirect { rn, abi } => {
                if position == abi.arg_regs.len() {
                    rn.assign(phys_reg);
                }
            }
            Kind::FpsrMove { to_fpsr: true, reg } => maybe_assign!(reg),
            Kind::BrTableSequence { index, .. } => maybe_assign!(index),
            _ => {}
        }
    }

    /// Rewrite this instruction's single `RD`-category definition to
    /// `phys_reg`. Panics if the instruction has no assignable definition
    /// (no def at all, or a `Call`-category set of fixed ABI return
    /// registers: spec.md §4.2).
    pub fn assign_def(&mut self, phys_reg: PReg) {
        match self.defs() {
            Defs::None => panic!("instruction defines no register: {self:?}"),
            Defs::Call(_) => panic!("call/return registers are not assignable: {self:?}"),
            Defs::Pair(..) => panic!("pair-def instructions are assigned through assign_def_pair"),
            Defs::One(_) => {}
        }
        assert_eq!(self.defs().one_class(), Some(phys_reg.class()));
        self.write_def(phys_reg);
    }

    fn write_def(&mut self, phys_reg: PReg) {
        match self {
            Kind::AluRRR { rd, .. }
            | Kind::AluRRRR { rd, .. }
            | Kind::AluRRImm12 { rd, .. }
            | Kind::AluRRBitmaskImm { rd, .. }
            | Kind::AluRRRShift { rd, .. }
            | Kind::AluRRRExtend { rd, .. }
            | Kind::AluRRImmShift { rd, .. }
            | Kind::BitRR { rd, .. }
            | Kind::Mov { rd, .. }
            | Kind::MovZ { rd, .. }
            | Kind::MovK { rd, .. }
            | Kind::MovN { rd, .. }
            | Kind::Load { rt: rd, .. }
            | Kind::VecLoad { rt: rd, .. }
            | Kind::FpuRR { rd, .. }
            | Kind::FpuRRR { rd, .. }
            | Kind::FpuCSel { rd, .. }
            | Kind::FpuToInt { rd, .. }
            | Kind::IntToFpu { rd, .. }
            | Kind::CSel { rd, .. }
            | Kind::CSet { rd, .. }
            | Kind::VecRRR { rd, .. }
            | Kind::VecMisc { rd, .. }
            | Kind::VecLanes { rd, .. }
            | Kind::VecUnimplemented { rd, .. }
            | Kind::Adr { rd, .. }
            | Kind::LoadFpuConst32 { rd, .. }
            | Kind::LoadFpuConst64 { rd, .. }
            | Kind::LoadFpuConst128 { rd, .. } => rd.assign(phys_reg),
            Kind::FpsrMove { to_fpsr: false, reg } => reg.assign(phys_reg),
            _ => {}
        }
    }
}

fn assign_amode_base(amode: &mut crate::amode::AMode, phys_reg: PReg) {
    use crate::amode::AMode;
    match amode {
        AMode::RegScaledExtended(rn, ..)
        | AMode::RegScaled(rn, _)
        | AMode::RegExtended(rn, ..)
        | AMode::RegReg(rn, _)
        | AMode::RegSignedImm9(rn, _)
        | AMode::RegUnsignedImm12(rn, _)
        | AMode::PreIndex(rn, _)
        | AMode::PostIndex(rn, _) => rn.assign(phys_reg),
    }
}

fn assign_amode_index(amode: &mut crate::amode::AMode, phys_reg: PReg) {
    use crate::amode::AMode;
    match amode {
        AMode::RegScaledExtended(_, rm, _)
        | AMode::RegScaled(_, rm)
        | AMode::RegExtended(_, rm, _)
        | AMode::RegReg(_, rm) => rm.assign(phys_reg),
        _ => panic!("addressing mode has no index register"),
    }
}

/// The result of [`Kind::defs`].
#[derive(Debug, Clone)]
pub enum Defs {
    /// No definition.
    None,
    /// A single assignable definition (the `RD` slot).
    One(RegRef),
    /// A pair-def instruction (64-bit pair load), both assignable.
    Pair(RegRef, RegRef),
    /// Every real return-value register on a call's ABI record; fixed, not
    /// assignable.
    Call(Vec<PReg>),
}

impl Defs {
    fn one_class(&self) -> Option<crate::registers::RegClass> {
        match self {
            Defs::One(r) => Some(r.class()),
            _ => None,
        }
    }
}

#[allow(dead_code)]
fn _unused_alu_op_reference(_: AluOp) {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registers::{PReg, RegClass};
    use crate::vreg::VReg;

    fn vreg(i: u32) -> RegRef {
        RegRef::Virtual(VReg::new(i, RegClass::Int))
    }

    #[test]
    fn alurrr_uses_rn_and_rm_in_order() {
        let k = Kind::AluRRR {
            op: AluOp::Add,
            size64: true,
            rd: vreg(0),
            rn: vreg(1),
            rm: vreg(2),
        };
        let uses = k.uses();
        assert_eq!(uses.len(), 2);
        assert_eq!(uses[0], vreg(1));
        assert_eq!(uses[1], vreg(2));
    }

    #[test]
    fn assign_use_rewrites_the_right_slot() {
        let mut k = Kind::AluRRR {
            op: AluOp::Add,
            size64: true,
            rd: vreg(0),
            rn: vreg(1),
            rm: vreg(2),
        };
        k.assign_use(1, PReg::int(5));
        assert_eq!(k.uses()[1], RegRef::Physical(PReg::int(5)));
    }

    #[test]
    #[should_panic(expected = "not assignable")]
    fn assign_use_panics_on_fixed_call_argument_register() {
        let abi = std::rc::Rc::new(crate::abi::AbiRecord {
            arg_regs: vec![PReg::int(0)],
            ret_regs: vec![],
        });
        let mut k = Kind::CallDirect {
            callee: super::super::FuncRef(0),
            abi,
        };
        k.assign_use(0, PReg::int(9));
    }

    #[test]
    fn assign_def_rewrites_rd() {
        let mut k = Kind::AluRRR {
            op: AluOp::Add,
            size64: true,
            rd: vreg(0),
            rn: vreg(1),
            rm: vreg(2),
        };
        k.assign_def(PReg::int(7));
        assert!(matches!(k.defs(), Defs::One(r) if r == RegRef::Physical(PReg::int(7))));
    }
}
