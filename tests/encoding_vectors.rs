//! Bit-exact encoding vectors from spec.md §8, exercised through the public
//! API (`encode::encode_kind`) the way an embedder would drive this crate.
//!
//! A handful of these are also covered as `#[cfg(test)]` unit tests next to
//! the encoder functions they pin down most tightly; they are repeated here
//! because this suite is meant to stand on its own as the published
//! contract, independent of internal module layout.

use aarch64_codegen::abi::ExecutionContextOffsets;
use aarch64_codegen::common::bitmask::BitmaskImm;
use aarch64_codegen::common::cond::{Cond, CondBrKind};
use aarch64_codegen::common::extend::ExtendOp;
use aarch64_codegen::common::imm::{MovWideImm, UImm12Scaled};
use aarch64_codegen::common::shift::ShiftAmt6;
use aarch64_codegen::encode::encode_kind;
use aarch64_codegen::inst::{AluOp, BranchTarget, Kind, Label};
use aarch64_codegen::registers::PReg;
use aarch64_codegen::vreg::RegRef;

fn reg(n: u8) -> RegRef {
    RegRef::Physical(PReg::int(n))
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[test]
fn add_extended_register() {
    let k = Kind::AluRRRExtend {
        op: AluOp::Add,
        size64: true,
        rd: reg(0),
        rn: reg(2),
        rm: reg(20),
        extend: ExtendOp::Sxtb,
        extend_shift: ShiftAmt6::ZERO,
    };
    assert_eq!(hex(&encode_kind(&k).unwrap()), "4080348b");
}

#[test]
fn mov_register() {
    let k = Kind::Mov { size64: true, rd: reg(3), rn: reg(4) };
    assert_eq!(hex(&encode_kind(&k).unwrap()), "e30304aa");
}

#[test]
fn load_unsigned_imm12() {
    let amode = aarch64_codegen::amode::AMode::RegUnsignedImm12(
        reg(30),
        UImm12Scaled::maybe_from_offset(16, 8).unwrap(),
    );
    let k = Kind::Load { size_bits: 64, signed: false, rt: reg(5), amode };
    assert_eq!(hex(&encode_kind(&k).unwrap()), "c50b40f9");
}

#[test]
fn cbz_32bit() {
    let mut target = BranchTarget::new(Label(0));
    target.resolved_offset = Some(0x80);
    let k = Kind::CondBr {
        kind: CondBrKind::Zero { reg: reg(1), size64: false },
        target,
    };
    assert_eq!(hex(&encode_kind(&k).unwrap()), "01040034");
}

#[test]
fn movz_with_shift() {
    let k = Kind::MovZ {
        size64: true,
        rd: reg(18),
        imm: MovWideImm::new(0xaaaa, 48),
    };
    assert_eq!(hex(&encode_kind(&k).unwrap()), "5255f5d2");
}

#[test]
fn adr_positive_offset() {
    let mut target = BranchTarget::new(Label(0));
    target.resolved_offset = Some(169);
    let k = Kind::Adr { rd: reg(16), target };
    assert_eq!(hex(&encode_kind(&k).unwrap()), "50050030");
}

#[test]
fn exit_sequence_layout() {
    let offsets = ExecutionContextOffsets {
        stack_limit: 0,
        stack_grow_required_size: 8,
        stack_grow_call_sequence: 40,
        original_frame_pointer: 16,
        original_stack_pointer: 24,
        goroutine_return_address: 32,
    };
    let k = Kind::ExitSequence { context_reg: PReg::int(22), offsets };
    let bytes = encode_kind(&k).unwrap();
    assert_eq!(hex(&bytes), "dd0a40f9de1240f9db0e40f97f030091c0035fd600000014");
}

#[test]
fn br_table_sequence_layout() {
    let targets: Vec<BranchTarget> = (0..10)
        .map(|_| {
            let mut t = BranchTarget::new(Label(0));
            t.resolved_offset = Some(0);
            t
        })
        .collect();
    let k = Kind::BrTableSequence { index: reg(22), targets };
    let bytes = encode_kind(&k).unwrap();
    assert_eq!(bytes.len(), 16 + 40);
    assert_eq!(hex(&bytes[..16]), "9b000010765bb6b87b03168b60031fd6");
}

#[test]
fn bitmask_immediate_round_trips_through_and() {
    let bm = BitmaskImm::try_encode(0x0000_FFFF_FFFF_FFFE).expect("must be encodable");
    let k = Kind::AluRRBitmaskImm {
        op: AluOp::And,
        size64: true,
        rd: reg(15),
        rn: reg(18),
        bitmask: bm,
    };
    assert_eq!(hex(&encode_kind(&k).unwrap()), "4fba7f92");
}

#[test]
fn conditional_branch_low_nibble_matches_condition_code() {
    for cond in Cond::ALL {
        let mut target = BranchTarget::new(Label(0));
        target.resolved_offset = Some(0xf0);
        let k = Kind::CondBr { kind: CondBrKind::Cond(cond), target };
        let bytes = encode_kind(&k).unwrap();
        let w = u32::from_le_bytes(bytes.try_into().unwrap());
        assert_eq!(w & 0xF, cond.bits(), "condition {cond} mismatched in encoded word");
    }
}
