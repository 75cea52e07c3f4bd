//! The ABI surface: per-call argument/return register sets, the function-
//! level ABI descriptor, and prologue/epilogue/stack-bounds-check synthesis
//! (spec.md §4.4, §6).

use crate::common::cond::Cond;
use crate::common::imm::SImm7Scaled;
use crate::inst::{AluOp, Inst, Kind, PairAMode};
use crate::registers::{
    context_reg, lr_reg, sp_reg, tmp_reg, zero_reg, PReg, RegClass, CALLEE_SAVED_INT,
    CALLEE_SAVED_VECTOR,
};
use crate::vreg::RegRef;

/// The set of real (physical) registers one call site binds, carried on
/// [`crate::inst::Kind::CallDirect`]/[`crate::inst::Kind::CallIndirect`]/
/// [`crate::inst::Kind::Ret`] (spec.md §3, "a reference to the per-call ABI
/// record").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbiRecord {
    /// Real registers holding the callee's arguments, in order.
    pub arg_regs: Vec<PReg>,
    /// Real registers holding the callee's return values, in order.
    pub ret_regs: Vec<PReg>,
}

impl AbiRecord {
    /// An ABI record with no arguments and no return values (e.g. a `ret`
    /// from a void function).
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            arg_regs: Vec::new(),
            ret_regs: Vec::new(),
        }
    }
}

/// The function-level ABI descriptor supplied by the embedder (spec.md §6,
/// "Input to the core"): argument/return register sets plus the stack-area
/// sizes the caller reserves above this function's own frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionAbi {
    /// Real registers this function's arguments arrive in.
    pub arg_regs: Vec<PReg>,
    /// Real registers this function's return values leave in.
    pub ret_regs: Vec<PReg>,
    /// Bytes of stack space the caller reserves for arguments that do not
    /// fit in registers.
    pub arg_stack_size: u32,
    /// Bytes of stack space the caller reserves for returns that do not fit
    /// in registers.
    pub ret_stack_size: u32,
}

impl FunctionAbi {
    /// This function's call-site view: the registers alone, without the
    /// caller's stack-area bookkeeping.
    #[must_use]
    pub fn as_call_record(&self) -> AbiRecord {
        AbiRecord {
            arg_regs: self.arg_regs.clone(),
            ret_regs: self.ret_regs.clone(),
        }
    }
}

fn preg_ref(p: PReg) -> RegRef {
    RegRef::Physical(p)
}

fn mov_sp_delta(rd: PReg, rn: PReg, delta: i64) -> Inst {
    // The AArch64 `add`/`sub` (immediate) class permits `sp` as both `rd`
    // and `rn` directly (unlike the shifted- or extended-register forms,
    // which cannot name `sp` at all), so a plain `Imm12`-carrying
    // `aluRRImm12` suffices whenever the delta fits a 12-bit field.
    let imm = crate::common::imm::Imm12::maybe_from_u64(delta.unsigned_abs())
        .expect("stack-frame deltas must fit a 12-bit (optionally <<12) immediate");
    let op = if delta >= 0 { AluOp::Add } else { AluOp::Sub };
    Inst::new(Kind::AluRRImm12 {
        op,
        size64: true,
        rd: preg_ref(rd),
        rn: preg_ref(rn),
        imm,
    })
}

fn store_pair(rt: PReg, rt2: PReg, rn: PReg, pre_index_bytes: i64) -> Inst {
    let imm = SImm7Scaled::maybe_from_byte_offset(pre_index_bytes)
        .expect("prologue/epilogue pair offsets always fit the scaled imm7 field");
    Inst::new(Kind::StorePair64 {
        rt: preg_ref(rt),
        rt2: preg_ref(rt2),
        amode: PairAMode::PreIndex(preg_ref(rn), imm),
    })
}

fn load_pair(rt: PReg, rt2: PReg, rn: PReg, post_index_bytes: i64) -> Inst {
    let imm = SImm7Scaled::maybe_from_byte_offset(post_index_bytes)
        .expect("prologue/epilogue pair offsets always fit the scaled imm7 field");
    Inst::new(Kind::LoadPair64 {
        rt: preg_ref(rt),
        rt2: preg_ref(rt2),
        amode: PairAMode::PostIndex(preg_ref(rn), imm),
    })
}

/// The callee-saved registers a function actually clobbered, in the fixed
/// deterministic push order the prologue uses: vector registers first, then
/// integer registers, each ascending by encoding (spec.md §4.4, step 3).
#[derive(Debug, Clone, Default)]
pub struct ClobberedRegs {
    /// Clobbered callee-saved vector registers, `v8..=v15`.
    pub vector: Vec<PReg>,
    /// Clobbered callee-saved integer registers, `x19..=x28`.
    pub int: Vec<PReg>,
}

impl ClobberedRegs {
    /// Build from an unordered set of clobbered physical registers, keeping
    /// only those that are actually callee-saved and sorting each class by
    /// encoding.
    #[must_use]
    pub fn from_used(used: &[PReg]) -> Self {
        let mut vector: Vec<PReg> = used
            .iter()
            .copied()
            .filter(|r| r.class() == RegClass::Vector && CALLEE_SAVED_VECTOR.contains(&r.enc()))
            .collect();
        let mut int: Vec<PReg> = used
            .iter()
            .copied()
            .filter(|r| r.class() == RegClass::Int && CALLEE_SAVED_INT.contains(&r.enc()))
            .collect();
        vector.sort_by_key(PReg::enc);
        int.sort_by_key(PReg::enc);
        Self { vector, int }
    }

    /// Total bytes the clobbered-register area occupies: one 16-byte slot
    /// per register (spec.md §4.4, step 3).
    #[must_use]
    pub fn stack_bytes(&self) -> u32 {
        ((self.vector.len() + self.int.len()) as u32) * 16
    }

    fn push_order(&self) -> Vec<PReg> {
        self.vector.iter().chain(self.int.iter()).copied().collect()
    }
}

/// Emit the function prologue (spec.md §4.4). `spill_slot_bytes` is the
/// total spill-slot area size the register allocator reported;
/// `arg_ret_stack_size` is `abi.arg_stack_size + abi.ret_stack_size`.
#[must_use]
pub fn emit_prologue(abi: &FunctionAbi, spill_slot_bytes: u32, clobbered: &ClobberedRegs) -> Vec<Inst> {
    let mut insts = Vec::new();
    let sp = sp_reg();
    let tmp = tmp_reg();

    let arg_ret_size = abi.arg_stack_size + abi.ret_stack_size;
    if arg_ret_size > 0 {
        // spec.md §4.4 step 1: materialize the size into `tmp`, then
        // subtract from `sp` via the extended-register (UXTX) form — the
        // shifted-register form cannot name `sp` as a source (spec.md §4.3).
        insts.extend(crate::inst::materialize_imm64(preg_ref(tmp), u64::from(arg_ret_size), true));
        insts.push(Inst::new(Kind::AluRRRExtend {
            op: AluOp::Sub,
            size64: true,
            rd: preg_ref(sp),
            rn: preg_ref(sp),
            rm: preg_ref(tmp),
            extend: crate::common::extend::ExtendOp::Uxtx,
            extend_shift: crate::common::shift::ShiftAmt6::ZERO,
        }));
    }

    insts.push(store_pair(lr_reg(), tmp, sp, -16));

    for reg in clobbered.push_order() {
        insts.push(store_pair(reg, tmp, sp, -16));
    }

    if spill_slot_bytes > 0 {
        insts.push(mov_sp_delta(sp, sp, -i64::from(spill_slot_bytes)));
    }

    // The frame-size word is a plain 64-bit value, not a register; encoding
    // it through `store_pair`'s register-pair shape needs the value
    // materialized into a scratch register first (spec.md §8, "Stack-walk
    // duality": the unwinder must read the true frame size, not whatever
    // this scratch register last held).
    let frame_size = u64::from(spill_slot_bytes + clobbered.stack_bytes());
    insts.extend(crate::inst::materialize_imm64(preg_ref(tmp), frame_size, true));
    insts.push(store_pair(tmp, zero_reg(), sp, -16));

    let _ = context_reg();
    insts
}

/// Emit the function epilogue (spec.md §4.4): the exact mirror of
/// [`emit_prologue`], popping in reverse order.
#[must_use]
pub fn emit_epilogue(abi: &FunctionAbi, spill_slot_bytes: u32, clobbered: &ClobberedRegs) -> Vec<Inst> {
    let mut insts = Vec::new();
    let sp = sp_reg();
    let tmp = tmp_reg();

    // Mirrors the prologue's final push: the frame-size word is read into
    // `tmp` (unused afterward — only the stack walker needs it) and the
    // padding slot is discarded into the zero register.
    insts.push(load_pair(tmp, zero_reg(), sp, 16));

    if spill_slot_bytes > 0 {
        insts.push(mov_sp_delta(sp, sp, i64::from(spill_slot_bytes)));
    }

    for reg in clobbered.push_order().into_iter().rev() {
        insts.push(load_pair(reg, tmp, sp, 16));
    }

    insts.push(load_pair(lr_reg(), tmp, sp, 16));

    let arg_ret_size = abi.arg_stack_size + abi.ret_stack_size;
    if arg_ret_size > 0 {
        insts.extend(crate::inst::materialize_imm64(preg_ref(tmp), u64::from(arg_ret_size), true));
        insts.push(Inst::new(Kind::AluRRRExtend {
            op: AluOp::Add,
            size64: true,
            rd: preg_ref(sp),
            rn: preg_ref(sp),
            rm: preg_ref(tmp),
            extend: crate::common::extend::ExtendOp::Uxtx,
            extend_shift: crate::common::shift::ShiftAmt6::ZERO,
        }));
    }

    insts.push(Inst::new(Kind::Ret {
        abi: std::rc::Rc::new(abi.as_call_record()),
    }));
    insts
}

/// Fixed byte offsets into the execution-context structure the stack-bounds
/// check and exit sequence read from. The concrete values are ABI-defined
/// by the host runtime (spec.md §9, second open question) and must be
/// supplied by the embedder rather than guessed; these are a conservative,
/// documented placeholder layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionContextOffsets {
    /// Offset of the current stack-limit field.
    pub stack_limit: i64,
    /// Offset of the "required additional stack size" field written before
    /// calling the grow-stack runtime entry.
    pub stack_grow_required_size: i64,
    /// Offset of the grow-stack runtime entry pointer.
    pub stack_grow_call_sequence: i64,
    /// Offset of the saved original frame pointer, read by the exit
    /// sequence.
    pub original_frame_pointer: i64,
    /// Offset of the saved original stack pointer, read by the exit
    /// sequence.
    pub original_stack_pointer: i64,
    /// Offset of the saved host return address, read by the exit sequence.
    pub goroutine_return_address: i64,
}

/// Emit the stack-bounds check inserted before the prologue (spec.md §4.4).
/// `required_size` is the total frame size the prologue is about to
/// allocate (spill slots + clobbered-register area + fixed overhead).
#[must_use]
pub fn emit_stack_bounds_check(offsets: &ExecutionContextOffsets, required_size: u32) -> Vec<Inst> {
    tracing::trace!(required_size, "emitting stack-bounds check");
    let ctx = context_reg();
    let tmp = tmp_reg();
    let sp = sp_reg();

    let mut insts = Vec::new();

    // This backend has only the one designated scratch register (spec.md
    // §3), so `required_sp < stack_limit` is tested as
    // `(sp - stack_limit) < required_size` instead: `tmp` holds the current
    // stack limit and then, in place, the headroom above it, without ever
    // needing a second register live at the same time.
    let limit_amode = crate::amode::AMode::RegUnsignedImm12(
        preg_ref(ctx),
        crate::common::imm::UImm12Scaled::maybe_from_offset(offsets.stack_limit, 8)
            .expect("context offsets must be 8-byte aligned and in range"),
    );
    insts.push(Inst::new(Kind::Load {
        size_bits: 64,
        signed: false,
        rt: preg_ref(tmp),
        amode: limit_amode,
    }));

    insts.push(Inst::new(Kind::AluRRRExtend {
        op: AluOp::Sub,
        size64: true,
        rd: preg_ref(tmp),
        rn: preg_ref(sp),
        rm: preg_ref(tmp),
        extend: crate::common::extend::ExtendOp::Uxtx,
        extend_shift: crate::common::shift::ShiftAmt6::ZERO,
    }));

    let imm = crate::common::imm::Imm12::maybe_from_u64(u64::from(required_size))
        .expect("stack-bounds check requires a compact frame size");
    insts.push(Inst::new(Kind::AluRRImm12 {
        op: AluOp::SubS,
        size64: true,
        rd: preg_ref(zero_reg()),
        rn: preg_ref(tmp),
        imm,
    }));

    insts.push(Inst::new(Kind::CondBr {
        kind: crate::common::cond::CondBrKind::Cond(Cond::Lo),
        target: crate::inst::BranchTarget::unresolved_forward(),
    }));

    let size_amode = crate::amode::AMode::RegUnsignedImm12(
        preg_ref(ctx),
        crate::common::imm::UImm12Scaled::maybe_from_offset(
            offsets.stack_grow_required_size,
            8,
        )
        .expect("context offsets must be 8-byte aligned and in range"),
    );
    let sized_imm = crate::common::imm::Imm12::maybe_from_u64(u64::from(required_size))
        .expect("stack-bounds check requires a compact frame size");
    insts.push(Inst::new(Kind::AluRRImm12 {
        op: AluOp::Add,
        size64: true,
        rd: preg_ref(tmp),
        rn: preg_ref(zero_reg()),
        imm: sized_imm,
    }));
    insts.push(Inst::new(Kind::Store {
        size_bits: 64,
        rt: preg_ref(tmp),
        amode: size_amode,
    }));

    let grow_amode = crate::amode::AMode::RegUnsignedImm12(
        preg_ref(ctx),
        crate::common::imm::UImm12Scaled::maybe_from_offset(
            offsets.stack_grow_call_sequence,
            8,
        )
        .expect("context offsets must be 8-byte aligned and in range"),
    );
    insts.push(Inst::new(Kind::Load {
        size_bits: 64,
        signed: false,
        rt: preg_ref(tmp),
        amode: grow_amode,
    }));
    insts.push(Inst::new(Kind::CallIndirect {
        rn: preg_ref(tmp),
        abi: std::rc::Rc::new(AbiRecord::empty()),
    }));

    insts
}

/// Emit the fixed 24-byte exit sequence (spec.md §4.3, §6): restore the
/// caller's frame pointer, stack pointer, and return address from the
/// execution context, then return.
#[must_use]
pub fn emit_exit_sequence(offsets: &ExecutionContextOffsets) -> Inst {
    Inst::new(Kind::ExitSequence {
        context_reg: context_reg(),
        offsets: *offsets,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn abi() -> FunctionAbi {
        FunctionAbi {
            arg_regs: vec![PReg::int(0), PReg::int(1)],
            ret_regs: vec![PReg::int(0)],
            arg_stack_size: 0,
            ret_stack_size: 0,
        }
    }

    #[test]
    fn prologue_and_epilogue_have_matching_instruction_counts() {
        let clobbered = ClobberedRegs::from_used(&[
            PReg::vector(18),
            PReg::vector(19),
            PReg::int(18),
            PReg::int(25),
        ]);
        // v18/v19 are not callee-saved (callee-saved vectors stop at v15);
        // only x25 survives the filter alongside whichever of v8..=v15 was
        // passed. This call passes none in range, so only x25 remains.
        assert_eq!(clobbered.int.len(), 1);
        let prologue = emit_prologue(&abi(), 320, &clobbered);
        let epilogue = emit_epilogue(&abi(), 320, &clobbered);
        assert_eq!(prologue.len(), epilogue.len());
    }

    #[test]
    fn clobbered_set_is_sorted_vector_then_integer() {
        let clobbered = ClobberedRegs::from_used(&[
            PReg::int(20),
            PReg::int(19),
            PReg::vector(9),
            PReg::vector(8),
        ]);
        assert_eq!(clobbered.vector, vec![PReg::vector(8), PReg::vector(9)]);
        assert_eq!(clobbered.int, vec![PReg::int(19), PReg::int(20)]);
    }
}
