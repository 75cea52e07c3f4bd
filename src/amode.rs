//! The seven-variant addressing-mode union and its synthesis algorithm
//! (spec.md §3, §4.1).

use core::fmt;
use std::collections::VecDeque;
use std::fmt::Display;

use crate::common::extend::ExtendOp;
use crate::common::imm::{SImm7Scaled, SImm9, UImm12Scaled};
use crate::vreg::RegRef;

/// One of the seven addressing-mode shapes a load/store instruction can
/// carry (spec.md §3, "Addressing mode").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AMode {
    /// `base + (index sign/zero-extended) << log2(size/8)`.
    RegScaledExtended(RegRef, RegRef, ExtendOp),
    /// `base + index << log2(size/8)`.
    RegScaled(RegRef, RegRef),
    /// `base + extended index`, no scale.
    RegExtended(RegRef, RegRef, ExtendOp),
    /// `base + index`.
    RegReg(RegRef, RegRef),
    /// `base + signed 9-bit immediate`, unscaled.
    RegSignedImm9(RegRef, SImm9),
    /// `base + unsigned 12-bit immediate`, scaled by the access size.
    RegUnsignedImm12(RegRef, UImm12Scaled),
    /// As `RegSignedImm9`, but `rn` is updated to the new address *before*
    /// the access.
    PreIndex(RegRef, SImm7Scaled),
    /// As `RegSignedImm9`, but `rn` is updated to the new address *after*
    /// the access.
    PostIndex(RegRef, SImm7Scaled),
}

impl AMode {
    /// The base register every variant carries.
    #[must_use]
    pub const fn base(self) -> RegRef {
        match self {
            AMode::RegScaledExtended(rn, ..)
            | AMode::RegScaled(rn, _)
            | AMode::RegExtended(rn, ..)
            | AMode::RegReg(rn, _)
            | AMode::RegSignedImm9(rn, _)
            | AMode::RegUnsignedImm12(rn, _)
            | AMode::PreIndex(rn, _)
            | AMode::PostIndex(rn, _) => rn,
        }
    }

    /// The index register, for the register-register variants.
    #[must_use]
    pub const fn index(self) -> Option<RegRef> {
        match self {
            AMode::RegScaledExtended(_, rm, _)
            | AMode::RegScaled(_, rm)
            | AMode::RegExtended(_, rm, _)
            | AMode::RegReg(_, rm) => Some(rm),
            _ => None,
        }
    }
}

impl Display for AMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AMode::RegScaledExtended(rn, rm, ext) => write!(f, "[{rn}, {rm}, {ext} #scale]"),
            AMode::RegScaled(rn, rm) => write!(f, "[{rn}, {rm}, lsl #scale]"),
            AMode::RegExtended(rn, rm, ext) => write!(f, "[{rn}, {rm}, {ext}]"),
            AMode::RegReg(rn, rm) => write!(f, "[{rn}, {rm}]"),
            AMode::RegSignedImm9(rn, imm) => write!(f, "[{rn}, {imm}]"),
            AMode::RegUnsignedImm12(rn, imm) => write!(f, "[{rn}, {imm}]"),
            AMode::PreIndex(rn, imm) => write!(f, "[{rn}, {imm}]!"),
            AMode::PostIndex(rn, imm) => write!(f, "[{rn}], {imm}"),
        }
    }
}

/// A node of the pointer's definition chain that addressing-mode synthesis
/// walks (spec.md §4.1, step 1). The front end builds this tree from its own
/// SSA IR; it is the only view of that IR this backend needs.
#[derive(Debug, Clone)]
pub enum PtrExpr {
    /// A leaf value already held in a register.
    Value(RegRef),
    /// A compile-time-known constant.
    Const(i64),
    /// Sum of two sub-expressions (`iadd`).
    Add(Box<PtrExpr>, Box<PtrExpr>),
    /// Zero-extend a 32-bit leaf (register or constant) to 64 bits.
    Uextend32(Box<PtrExpr>),
    /// Sign-extend a 32-bit leaf (register or constant) to 64 bits.
    Sextend32(Box<PtrExpr>),
}

/// An `add`/`add`-extended instruction the caller must emit, chaining into
/// the base register of the synthesized mode, to absorb addends that did not
/// fit the mode itself (spec.md §4.1, step 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtraAdd {
    /// `dst = lhs + rhs` (plain 64-bit add).
    Reg { dst: RegRef, lhs: RegRef, rhs: RegRef },
    /// `dst = lhs + extend(rhs)`.
    Extended {
        dst: RegRef,
        lhs: RegRef,
        rhs: RegRef,
        ext: ExtendOp,
    },
    /// `dst = lhs + imm` (the immediate is materialized by the caller if it
    /// does not fit an `Imm12` operand; that concern is the ALU encoder's,
    /// not this module's).
    Imm { dst: RegRef, lhs: RegRef, imm: i64 },
}

/// Result of addressing-mode synthesis: the mode itself, plus any
/// instructions the caller must splice in *before* the load/store that uses
/// it.
#[derive(Debug, Clone)]
pub struct Synthesized {
    /// The addressing mode to attach to the load/store instruction.
    pub mode: AMode,
    /// Extra `add` instructions to emit first, in order, each writing into
    /// the next one's `lhs` (or the mode's base, for the last).
    pub extra_adds: Vec<ExtraAdd>,
}

struct Addends {
    a64: VecDeque<RegRef>,
    a32: VecDeque<(RegRef, ExtendOp)>,
    offset: i64,
}

fn collect(expr: &PtrExpr, out: &mut Addends) {
    match expr {
        PtrExpr::Value(r) => out.a64.push_back(*r),
        PtrExpr::Const(c) => out.offset += c,
        PtrExpr::Add(lhs, rhs) => {
            collect(lhs, out);
            collect(rhs, out);
        }
        PtrExpr::Uextend32(inner) => match inner.as_ref() {
            PtrExpr::Const(c) => out.offset += i64::from(*c as u32),
            PtrExpr::Value(r) => out.a32.push_back((*r, ExtendOp::Uxtw)),
            _ => panic!("uextend32 operand must be a value or a constant leaf"),
        },
        PtrExpr::Sextend32(inner) => match inner.as_ref() {
            PtrExpr::Const(c) => out.offset += i64::from(*c as i32),
            PtrExpr::Value(r) => out.a32.push_back((*r, ExtendOp::Sxtw)),
            _ => panic!("sextend32 operand must be a value or a constant leaf"),
        },
    }
}

/// Synthesize an addressing mode for an access of `size_bits` bits (one of
/// 8/16/32/64/128) at static offset folded from `expr`'s definition chain
/// (spec.md §4.1).
///
/// `fresh_reg` mints a new virtual register when the algorithm must
/// materialize a value (the pure-constant case, or a widened 64-bit base
/// built from an `A32` addend).
pub fn synthesize(
    expr: &PtrExpr,
    size_bits: u32,
    mut fresh_reg: impl FnMut() -> RegRef,
) -> Synthesized {
    let size_bytes = (size_bits / 8).max(1) as u8;
    let mut addends = Addends {
        a64: VecDeque::new(),
        a32: VecDeque::new(),
        offset: 0,
    };
    collect(expr, &mut addends);

    let mut extra_adds = Vec::new();

    if !addends.a64.is_empty() && !addends.a32.is_empty() {
        let base = addends.a64.pop_front().unwrap();
        let (idx, ext) = addends.a32.pop_front().unwrap();
        let mode = AMode::RegExtended(base, idx, ext);
        return fold_remaining(mode, addends, size_bytes, extra_adds, fresh_reg);
    }

    if !addends.a64.is_empty() {
        // Mode selection requires a strictly positive offset here (spec.md
        // §4.1, §8): `O' == 0` falls through to the register-pair or
        // single-base cases below rather than claiming a trivial `+0`
        // unsigned-imm12 slot, so two bare-register addends still combine
        // into `RegReg` instead of one of them being stranded.
        if addends.offset > 0 {
            if let Some(imm) = UImm12Scaled::maybe_from_offset(addends.offset, size_bytes) {
                let base = addends.a64.pop_front().unwrap();
                let mode = AMode::RegUnsignedImm12(base, imm);
                addends.offset = 0;
                return fold_remaining(mode, addends, size_bytes, extra_adds, fresh_reg);
            }
        }
        if addends.offset != 0 {
            if let Ok(imm) = SImm9::try_from(addends.offset) {
                let base = addends.a64.pop_front().unwrap();
                let mode = AMode::RegSignedImm9(base, imm);
                addends.offset = 0;
                return fold_remaining(mode, addends, size_bytes, extra_adds, fresh_reg);
            }
        }
        if addends.a64.len() >= 2 {
            let base = addends.a64.pop_front().unwrap();
            let idx = addends.a64.pop_front().unwrap();
            let mode = AMode::RegReg(base, idx);
            return fold_remaining(mode, addends, size_bytes, extra_adds, fresh_reg);
        }
        let base = addends.a64.pop_front().unwrap();
        let mode = AMode::RegUnsignedImm12(base, UImm12Scaled::zero(size_bytes));
        return fold_remaining(mode, addends, size_bytes, extra_adds, fresh_reg);
    }

    if !addends.a32.is_empty() {
        let (first, first_ext) = addends.a32.pop_front().unwrap();
        let base = fresh_reg();
        extra_adds.push(ExtraAdd::Extended {
            dst: base,
            lhs: RegRef::Physical(crate::registers::zero_reg()),
            rhs: first,
            ext: first_ext,
        });
        let mode = if let Some((idx, ext)) = addends.a32.pop_front() {
            AMode::RegExtended(base, idx, ext)
        } else {
            AMode::RegUnsignedImm12(base, UImm12Scaled::zero(size_bytes))
        };
        return fold_remaining(mode, addends, size_bytes, extra_adds, fresh_reg);
    }

    // Pure constant: materialize the offset into a fresh register.
    let tmp = fresh_reg();
    extra_adds.push(ExtraAdd::Imm {
        dst: tmp,
        lhs: RegRef::Physical(crate::registers::zero_reg()),
        imm: addends.offset,
    });
    Synthesized {
        mode: AMode::RegUnsignedImm12(tmp, UImm12Scaled::zero(size_bytes)),
        extra_adds,
    }
}

/// Absorb anything `synthesize`'s mode selection left behind (residual
/// `A64`/`A32` entries or a nonzero offset) into explicit `add` instructions
/// chaining into the mode's base register (spec.md §4.1, step 3).
fn fold_remaining(
    mode: AMode,
    mut addends: Addends,
    size_bytes: u8,
    mut extra_adds: Vec<ExtraAdd>,
    mut fresh_reg: impl FnMut() -> RegRef,
) -> Synthesized {
    let mut base = mode.base();
    let mut cur_mode = mode;

    while let Some(r) = addends.a64.pop_front() {
        let dst = fresh_reg();
        extra_adds.push(ExtraAdd::Reg {
            dst,
            lhs: base,
            rhs: r,
        });
        base = dst;
        cur_mode = rebase(cur_mode, base);
    }
    while let Some((r, ext)) = addends.a32.pop_front() {
        let dst = fresh_reg();
        extra_adds.push(ExtraAdd::Extended {
            dst,
            lhs: base,
            rhs: r,
            ext,
        });
        base = dst;
        cur_mode = rebase(cur_mode, base);
    }
    if addends.offset != 0 {
        // A mode with an index register has no room for an offset: always
        // fold into an explicit add. A bare single-base mode (no index) can
        // still repurpose its own immediate slot directly.
        match cur_mode {
            AMode::RegUnsignedImm12(rn, existing) if existing.byte_offset() == 0 => {
                if let Some(imm) = UImm12Scaled::maybe_from_offset(addends.offset, size_bytes) {
                    cur_mode = AMode::RegUnsignedImm12(rn, imm);
                } else if let Ok(imm) = SImm9::try_from(addends.offset) {
                    cur_mode = AMode::RegSignedImm9(rn, imm);
                } else {
                    let dst = fresh_reg();
                    extra_adds.push(ExtraAdd::Imm {
                        dst,
                        lhs: base,
                        imm: addends.offset,
                    });
                    cur_mode = AMode::RegUnsignedImm12(dst, UImm12Scaled::zero(size_bytes));
                }
            }
            _ => {
                let dst = fresh_reg();
                extra_adds.push(ExtraAdd::Imm {
                    dst,
                    lhs: base,
                    imm: addends.offset,
                });
                cur_mode = rebase(cur_mode, dst);
            }
        }
    }

    Synthesized {
        mode: cur_mode,
        extra_adds,
    }
}

fn rebase(mode: AMode, new_base: RegRef) -> AMode {
    match mode {
        AMode::RegScaledExtended(_, rm, ext) => AMode::RegScaledExtended(new_base, rm, ext),
        AMode::RegScaled(_, rm) => AMode::RegScaled(new_base, rm),
        AMode::RegExtended(_, rm, ext) => AMode::RegExtended(new_base, rm, ext),
        AMode::RegReg(_, rm) => AMode::RegReg(new_base, rm),
        AMode::RegSignedImm9(_, imm) => AMode::RegSignedImm9(new_base, imm),
        AMode::RegUnsignedImm12(_, imm) => AMode::RegUnsignedImm12(new_base, imm),
        AMode::PreIndex(_, imm) => AMode::PreIndex(new_base, imm),
        AMode::PostIndex(_, imm) => AMode::PostIndex(new_base, imm),
    }
}
