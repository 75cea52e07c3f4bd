//! Condition codes (NZCV flag combinations) and conditional-branch kinds.

use core::fmt;
use std::fmt::Display;

use crate::vreg::RegRef;

/// One of the 16 AArch64 condition-flag combinations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Cond {
    /// Equal.
    Eq = 0,
    /// Not equal.
    Ne = 1,
    /// Unsigned higher or same (carry set).
    Hs = 2,
    /// Unsigned lower (carry clear).
    Lo = 3,
    /// Minus / negative.
    Mi = 4,
    /// Plus / positive or zero.
    Pl = 5,
    /// Overflow set.
    Vs = 6,
    /// Overflow clear.
    Vc = 7,
    /// Unsigned higher.
    Hi = 8,
    /// Unsigned lower or same.
    Ls = 9,
    /// Signed greater or equal.
    Ge = 10,
    /// Signed less than.
    Lt = 11,
    /// Signed greater than.
    Gt = 12,
    /// Signed less or equal.
    Le = 13,
    /// Always.
    Al = 14,
    /// Never (rarely used; reserved encoding slot).
    Nv = 15,
}

impl Cond {
    /// All 16 condition codes, in encoding order.
    pub const ALL: [Cond; 16] = [
        Cond::Eq,
        Cond::Ne,
        Cond::Hs,
        Cond::Lo,
        Cond::Mi,
        Cond::Pl,
        Cond::Vs,
        Cond::Vc,
        Cond::Hi,
        Cond::Ls,
        Cond::Ge,
        Cond::Lt,
        Cond::Gt,
        Cond::Le,
        Cond::Al,
        Cond::Nv,
    ];

    /// The 4-bit machine encoding of this condition.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self as u32
    }

    /// The logically inverted condition (used when a branch is flipped to
    /// fall through instead of taken).
    #[must_use]
    pub const fn invert(self) -> Cond {
        match self {
            Cond::Eq => Cond::Ne,
            Cond::Ne => Cond::Eq,
            Cond::Hs => Cond::Lo,
            Cond::Lo => Cond::Hs,
            Cond::Mi => Cond::Pl,
            Cond::Pl => Cond::Mi,
            Cond::Vs => Cond::Vc,
            Cond::Vc => Cond::Vs,
            Cond::Hi => Cond::Ls,
            Cond::Ls => Cond::Hi,
            Cond::Ge => Cond::Lt,
            Cond::Lt => Cond::Ge,
            Cond::Gt => Cond::Le,
            Cond::Le => Cond::Gt,
            Cond::Al => Cond::Nv,
            Cond::Nv => Cond::Al,
        }
    }
}

impl Display for Cond {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Cond::Eq => "eq",
            Cond::Ne => "ne",
            Cond::Hs => "hs",
            Cond::Lo => "lo",
            Cond::Mi => "mi",
            Cond::Pl => "pl",
            Cond::Vs => "vs",
            Cond::Vc => "vc",
            Cond::Hi => "hi",
            Cond::Ls => "ls",
            Cond::Ge => "ge",
            Cond::Lt => "lt",
            Cond::Gt => "gt",
            Cond::Le => "le",
            Cond::Al => "al",
            Cond::Nv => "nv",
        };
        f.write_str(s)
    }
}

/// The three sub-forms of a conditional branch distinguished by spec.md
/// §4.2: compare-zero/non-zero against a register (common, cheaper to
/// encode) or a generic condition-flag test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CondBrKind {
    /// `cbz`: branch if the register is zero (`size64` selects `w`/`x`).
    Zero { reg: RegRef, size64: bool },
    /// `cbnz`: branch if the register is nonzero (`size64` selects `w`/`x`).
    NotZero { reg: RegRef, size64: bool },
    /// `b.cond`: branch if the condition-code test holds.
    Cond(Cond),
}

impl CondBrKind {
    /// Invert this branch's sense (used to flip taken/fallthrough).
    #[must_use]
    pub fn invert(self) -> CondBrKind {
        match self {
            CondBrKind::Zero { reg, size64 } => CondBrKind::NotZero { reg, size64 },
            CondBrKind::NotZero { reg, size64 } => CondBrKind::Zero { reg, size64 },
            CondBrKind::Cond(c) => CondBrKind::Cond(c.invert()),
        }
    }

    /// The register tested, if this is a compare-zero/non-zero form.
    #[must_use]
    pub const fn tested_reg(self) -> Option<RegRef> {
        match self {
            CondBrKind::Zero { reg, .. } | CondBrKind::NotZero { reg, .. } => Some(reg),
            CondBrKind::Cond(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invert_is_involutive_for_all_16_conditions() {
        for cond in Cond::ALL {
            assert_eq!(cond.invert().invert(), cond);
        }
    }

    #[test]
    fn invert_pairs_match_arm_semantics() {
        assert_eq!(Cond::Eq.invert(), Cond::Ne);
        assert_eq!(Cond::Ge.invert(), Cond::Lt);
        assert_eq!(Cond::Al.invert(), Cond::Nv);
    }

    #[test]
    fn low_nibble_of_bits_matches_encoding_index() {
        for (i, cond) in Cond::ALL.iter().enumerate() {
            assert_eq!(cond.bits(), i as u32);
        }
    }
}
