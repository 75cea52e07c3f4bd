//! Extension operators for `ER` operands and extended-register addressing
//! modes.

use core::fmt;
use std::fmt::Display;

/// An extension kind: zero- or sign-extend a narrower register to 32 or 64
/// bits, optionally fused into an ALU or load/store operand (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExtendOp {
    /// Zero-extend from 8 bits.
    Uxtb = 0b000,
    /// Zero-extend from 16 bits.
    Uxth = 0b001,
    /// Zero-extend from 32 bits.
    Uxtw = 0b010,
    /// No-op zero extend (64 -> 64); valid as an encoding slot even though
    /// it extends nothing.
    Uxtx = 0b011,
    /// Sign-extend from 8 bits.
    Sxtb = 0b100,
    /// Sign-extend from 16 bits.
    Sxth = 0b101,
    /// Sign-extend from 32 bits.
    Sxtw = 0b110,
    /// No-op sign extend (64 -> 64); valid as an encoding slot.
    Sxtx = 0b111,
}

impl ExtendOp {
    /// The 3-bit encoding of this extend kind.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self as u32
    }

    /// Whether this extension targets a 64-bit result (`UXTX`/`SXTX`), as
    /// opposed to `UXTW`/`SXTW` and the sub-word forms which target 32
    /// bits when used to widen a 32-bit source.
    #[must_use]
    pub const fn is_64(self) -> bool {
        matches!(self, ExtendOp::Uxtx | ExtendOp::Sxtx)
    }

    /// Whether this extension sign-extends (as opposed to zero-extends).
    #[must_use]
    pub const fn is_signed(self) -> bool {
        matches!(
            self,
            ExtendOp::Sxtb | ExtendOp::Sxth | ExtendOp::Sxtw | ExtendOp::Sxtx
        )
    }
}

impl Display for ExtendOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExtendOp::Uxtb => "UXTB",
            ExtendOp::Uxth => "UXTH",
            ExtendOp::Uxtw => "UXTW",
            ExtendOp::Uxtx => "UXTX",
            ExtendOp::Sxtb => "SXTB",
            ExtendOp::Sxth => "SXTH",
            ExtendOp::Sxtw => "SXTW",
            ExtendOp::Sxtx => "SXTX",
        };
        f.write_str(s)
    }
}
