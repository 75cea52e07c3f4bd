//! End-to-end scenarios from spec.md §8 that span more than one encoded
//! instruction or more than one module: prologue/epilogue symmetry, the
//! out-of-range call fix-up, addressing-mode synthesis with constant
//! folding, and a full sweep of the 16 condition-flag branches.

use std::rc::Rc;

use aarch64_codegen::abi::{AbiRecord, ClobberedRegs, FunctionAbi};
use aarch64_codegen::amode::{AMode, ExtraAdd, PtrExpr};
use aarch64_codegen::common::extend::ExtendOp;
use aarch64_codegen::encode::encode;
use aarch64_codegen::flags::CodegenFlags;
use aarch64_codegen::inst::{AluOp, FuncRef, Inst, Kind};
use aarch64_codegen::link::{self, FunctionBody};
use aarch64_codegen::registers::PReg;
use aarch64_codegen::vreg::{RegRef, VRegBuilder};

fn preg(n: u8) -> PReg {
    PReg::int(n)
}

fn encoded_len(insts: &[Inst]) -> usize {
    insts.iter().map(|i| encode(i).unwrap().len()).sum()
}

#[test]
fn prologue_and_epilogue_mirror_each_other() {
    let abi = FunctionAbi {
        arg_regs: vec![preg(0), preg(1)],
        ret_regs: vec![preg(0)],
        arg_stack_size: 0,
        ret_stack_size: 0,
    };
    let clobbered = ClobberedRegs::from_used(&[preg(18), preg(25), preg(19)]);
    // x18 is the platform register, outside CALLEE_SAVED_INT (19..=28); it
    // must be silently dropped rather than appear in the clobbered set.
    assert_eq!(clobbered.int, vec![preg(19), preg(25)]);

    let prologue = aarch64_codegen::abi::emit_prologue(&abi, 320, &clobbered);
    let epilogue = aarch64_codegen::abi::emit_epilogue(&abi, 320, &clobbered);

    assert_eq!(
        encoded_len(&prologue),
        encoded_len(&epilogue),
        "prologue and epilogue must occupy the same number of bytes"
    );
}

#[test]
fn out_of_range_call_routes_through_a_nearby_trampoline() {
    // A tiny `trampoline_island_interval` stands in for a callee that sits
    // well beyond `bl`'s +-128 MiB reach: linking must still succeed by
    // redirecting the `bl` through a nearby trampoline island rather than
    // failing or emitting an unencodable displacement.
    let far_body: Vec<Inst> = (0..40)
        .map(|_| {
            Inst::new(Kind::AluRRR {
                op: AluOp::Add,
                size64: true,
                rd: RegRef::Physical(preg(0)),
                rn: RegRef::Physical(preg(0)),
                rm: RegRef::Physical(preg(0)),
            })
        })
        .collect();
    let abi = Rc::new(AbiRecord::empty());
    let mut functions = vec![
        FunctionBody {
            id: 0,
            insts: vec![Inst::new(Kind::CallDirect { callee: FuncRef(1), abi: abi.clone() })],
        },
        FunctionBody { id: 1, insts: far_body },
    ];
    let flags = CodegenFlags {
        trampoline_island_interval: 32,
        max_trampolines_per_island: 4,
        ..CodegenFlags::default()
    };
    let linked = link::link(&mut functions, &flags, 0x1000).expect("linking must succeed");

    let w = u32::from_le_bytes(linked.code[0..4].try_into().unwrap());
    assert_eq!(w >> 26, 0b100101, "call site must still be a `bl`");
    let displacement_words = (w & 0x3FF_FFFF) as i32;
    assert!(
        displacement_words.unsigned_abs() < 16,
        "call must redirect to a nearby island slot, not the true (far) callee"
    );
}

#[test]
fn addressing_mode_synthesis_folds_constants_into_extended_mode() {
    // `(p + 2 + sext32(v) - 1)` lowers to RegExtended(p', v, SXTW) with the
    // residual `+1` absorbed by one explicit `add` ahead of the load/store.
    let p = RegRef::Physical(preg(3));
    let v = RegRef::Physical(preg(5));
    let expr = PtrExpr::Add(
        Box::new(PtrExpr::Add(Box::new(PtrExpr::Value(p)), Box::new(PtrExpr::Const(2)))),
        Box::new(PtrExpr::Add(
            Box::new(PtrExpr::Sextend32(Box::new(PtrExpr::Value(v)))),
            Box::new(PtrExpr::Const(-1)),
        )),
    );
    let mut vregs = VRegBuilder::new();
    let out = aarch64_codegen::amode::synthesize(&expr, 32, || RegRef::Virtual(vregs.new_int_vreg()));

    assert_eq!(out.extra_adds.len(), 1);
    let rebased = match out.extra_adds[0] {
        ExtraAdd::Imm { dst, lhs, imm } => {
            assert_eq!(lhs, p);
            assert_eq!(imm, 1);
            dst
        }
        other => panic!("expected a plain immediate add folding +1, got {other:?}"),
    };
    match out.mode {
        AMode::RegExtended(base, idx, ext) => {
            assert_eq!(base, rebased);
            assert_eq!(idx, v);
            assert_eq!(ext, ExtendOp::Sxtw);
        }
        other => panic!("expected RegExtended, got {other:?}"),
    }
}

#[test]
fn all_sixteen_condition_codes_round_trip_through_a_linked_unit() {
    use aarch64_codegen::common::cond::{Cond, CondBrKind};
    use aarch64_codegen::inst::{BranchTarget, Label};

    for (i, cond) in Cond::ALL.iter().enumerate() {
        let label = Label(0);
        let mut functions = vec![FunctionBody {
            id: 0,
            insts: vec![
                Inst::new(Kind::CondBr {
                    kind: CondBrKind::Cond(*cond),
                    target: BranchTarget::new(label),
                }),
                Inst::new(Kind::Nop { label: Some(label) }),
                Inst::new(Kind::Ret { abi: Rc::new(AbiRecord::empty()) }),
            ],
        }];
        let flags = CodegenFlags::default();
        let linked = link::link(&mut functions, &flags, 0).unwrap();
        let w = u32::from_le_bytes(linked.code[0..4].try_into().unwrap());
        assert_eq!(w >> 24, 0b0101_0100, "condition {i} must keep the b.cond opcode family");
        assert_eq!(w & 0xF, cond.bits());
    }
}
