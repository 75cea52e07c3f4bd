//! The `Operand` tagged union (spec.md §3) and its textual formatter.
//!
//! An operand slot on an instruction holds one of five shapes. Which shapes
//! are legal at a given slot is a property of the instruction `Kind`, not of
//! `Operand` itself — the constructors in [`crate::inst`] enforce that.

use core::fmt;
use std::fmt::Display;

use crate::common::extend::ExtendOp;
use crate::common::imm::Imm12;
use crate::common::shift::{ShiftAmt6, ShiftOp};
use crate::vreg::RegRef;

/// A register or register-derived value usable as an ALU or move-like
/// instruction's source operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    /// Plain register reference.
    Nr(RegRef),
    /// Register shifted by a constant amount.
    Sr(RegRef, ShiftOp, ShiftAmt6),
    /// Register extended (and optionally shifted by a `0..=4` amount, the
    /// "extend-with-scale" form used by the scaled-extended addressing
    /// mode's index operand and by extended-register ALU operands).
    Er(RegRef, ExtendOp, ShiftAmt6),
    /// 12-bit unsigned immediate, optionally shifted left by 12.
    Imm12(Imm12),
    /// Bare shift-amount immediate, used by shift-by-immediate ALU forms.
    ShiftImm(ShiftAmt6),
}

impl Operand {
    /// Plain register reference.
    #[must_use]
    pub const fn nr(r: RegRef) -> Self {
        Operand::Nr(r)
    }

    /// Register shifted by a constant amount.
    #[must_use]
    pub const fn sr(r: RegRef, op: ShiftOp, amount: ShiftAmt6) -> Self {
        Operand::Sr(r, op, amount)
    }

    /// Register extended, with an optional fused shift amount (`0` when
    /// unused).
    #[must_use]
    pub const fn er(r: RegRef, ext: ExtendOp, amount: ShiftAmt6) -> Self {
        Operand::Er(r, ext, amount)
    }

    /// 12-bit unsigned immediate operand.
    #[must_use]
    pub const fn imm12(imm: Imm12) -> Self {
        Operand::Imm12(imm)
    }

    /// Bare shift-amount immediate operand.
    #[must_use]
    pub const fn shift_imm(amount: ShiftAmt6) -> Self {
        Operand::ShiftImm(amount)
    }

    /// The underlying register, if this operand carries one.
    #[must_use]
    pub const fn reg(self) -> Option<RegRef> {
        match self {
            Operand::Nr(r) | Operand::Sr(r, ..) | Operand::Er(r, ..) => Some(r),
            Operand::Imm12(_) | Operand::ShiftImm(_) => None,
        }
    }
}

impl Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Nr(r) => Display::fmt(r, f),
            Operand::Sr(r, op, amount) => write!(f, "{r}, {op} #{}", amount.value()),
            Operand::Er(r, ext, amount) if amount.value() == 0 => write!(f, "{r}, {ext}"),
            Operand::Er(r, ext, amount) => write!(f, "{r}, {ext} #{}", amount.value()),
            Operand::Imm12(imm) => Display::fmt(imm, f),
            Operand::ShiftImm(amount) => write!(f, "#{}", amount.value()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registers::PReg;

    #[test]
    fn display_plain_register() {
        let op = Operand::nr(RegRef::Physical(PReg::int(3)));
        assert_eq!(op.to_string(), "x3");
    }

    #[test]
    fn display_shifted_register() {
        let op = Operand::sr(
            RegRef::Physical(PReg::int(1)),
            ShiftOp::Lsl,
            ShiftAmt6::try_from(4u8).unwrap(),
        );
        assert_eq!(op.to_string(), "x1, LSL #4");
    }

    #[test]
    fn display_extended_register_without_amount_omits_hash() {
        let op = Operand::er(
            RegRef::Physical(PReg::int(2)),
            ExtendOp::Sxth,
            ShiftAmt6::ZERO,
        );
        assert_eq!(op.to_string(), "x2, SXTH");
    }

    #[test]
    fn reg_extracts_underlying_register_only_for_register_variants() {
        assert!(Operand::imm12(Imm12::ZERO).reg().is_none());
        assert!(Operand::nr(RegRef::Physical(PReg::int(0))).reg().is_some());
    }
}
