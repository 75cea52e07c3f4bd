//! The linker passes that turn a compilation unit's per-function
//! instruction streams into one executable byte buffer (spec.md §4.5):
//! byte-offset assignment, intra-function branch resolution, and call
//! relocation through direct `bl` patching or a trampoline island.
//!
//! [`crate::encode`] only ever encodes one instruction at a time and knows
//! nothing about other functions; everything here is the whole-unit pass
//! that makes that possible — resolving [`crate::inst::BranchTarget`]s
//! before handing instructions to the encoder, then patching call-site
//! displacements (or redirecting them through an island) once every
//! function's final position is known.

use std::collections::HashMap;

use crate::bits::set_bits;
use crate::common::imm::SImm26Words;
use crate::encode;
use crate::error::CodegenError;
use crate::flags::{CodegenFlags, TRAMPOLINE_ISLAND_SLOT_SIZE};
use crate::inst::{FuncRef, Inst, Kind};

/// One function's instruction stream, tagged with the id [`Kind::CallDirect`]
/// references it by.
#[derive(Debug, Clone)]
pub struct FunctionBody {
    /// Identifier [`crate::inst::FuncRef`] values in other functions' calls
    /// refer to.
    pub id: u32,
    /// The instructions, in order, pre-regalloc-cleared and fully assigned.
    pub insts: Vec<Inst>,
}

/// The result of linking a whole compilation unit.
#[derive(Debug, Clone)]
pub struct LinkedUnit {
    /// The concatenated machine code for every function plus any
    /// interleaved trampoline islands.
    pub code: Vec<u8>,
    /// Each function's start offset within `code`, keyed by its id.
    pub function_offsets: HashMap<u32, u32>,
}

fn inst_len(kind: &Kind) -> u32 {
    match kind {
        Kind::Nop { .. } => 0,
        Kind::ExitSequence { .. } => 24,
        Kind::BrTableSequence { targets, .. } => 16 + (targets.len() as u32) * 4,
        // A zero payload collapses to a single `movi`; otherwise it's
        // `ldr` literal + skip-branch + the inlined datum (encode.rs's
        // `literal_fpu_load`).
        Kind::LoadFpuConst32 { bits, .. } => if *bits == 0 { 4 } else { 12 },
        Kind::LoadFpuConst64 { bits, .. } => if *bits == 0 { 4 } else { 16 },
        Kind::LoadFpuConst128 { bits, .. } => if *bits == 0 { 4 } else { 24 },
        _ => 4,
    }
}

/// Walk every function in order, assigning each instruction's
/// [`Inst::byte_offset`] (spec.md §4.5, first pass). A trampoline island of
/// `flags.max_trampolines_per_island` reserved [`TRAMPOLINE_ISLAND_SLOT_SIZE`]
/// slots is inserted every time the running offset crosses a
/// `trampoline_island_interval` boundary, so no out-of-range direct call
/// ends up more than half that interval from a reachable redirect.
fn assign_offsets(functions: &mut [FunctionBody], flags: &CodegenFlags) -> (HashMap<u32, u32>, Vec<u32>, u32) {
    let mut cursor = 0u32;
    let mut function_offsets = HashMap::new();
    let mut island_offsets = Vec::new();
    let mut next_island_boundary = flags.trampoline_island_interval;
    let island_capacity_bytes = flags.max_trampolines_per_island * TRAMPOLINE_ISLAND_SLOT_SIZE;

    for function in functions.iter_mut() {
        function_offsets.insert(function.id, cursor);
        for inst in &mut function.insts {
            if cursor >= next_island_boundary {
                tracing::trace!(offset = cursor, capacity_bytes = island_capacity_bytes, "placing trampoline island");
                island_offsets.push(cursor);
                cursor += island_capacity_bytes;
                next_island_boundary += flags.trampoline_island_interval;
            }
            inst.byte_offset = Some(cursor);
            cursor += inst_len(&inst.kind);
        }
    }
    (function_offsets, island_offsets, cursor)
}

/// Fill in every [`crate::inst::BranchTarget::resolved_offset`] within a
/// function from that function's own `Nop`-with-label markers (spec.md
/// §4.5, second pass). Call relocations are handled separately in
/// [`patch_calls`] since they can cross function boundaries.
fn resolve_branches(functions: &mut [FunctionBody]) {
    for function in functions.iter_mut() {
        let mut labels: HashMap<u32, u32> = HashMap::new();
        for inst in &function.insts {
            if let Kind::Nop { label: Some(l) } = &inst.kind {
                labels.insert(l.0, inst.byte_offset.expect("offsets assigned before branch resolution"));
            }
        }
        for inst in &mut function.insts {
            let this_offset = inst.byte_offset.expect("offsets assigned before branch resolution");
            match &mut inst.kind {
                Kind::Jump { target } | Kind::Adr { target, .. } | Kind::CondBr { target, .. } => {
                    let label_offset = labels[&target.label().0];
                    target.resolved_offset = Some(label_offset as i32 - this_offset as i32);
                }
                Kind::BrTableSequence { targets, .. } => {
                    // `encode::encode` assumes the jump table's data words
                    // begin 16 bytes into this sequence (after its 4 setup
                    // instructions); resolve each target relative to there,
                    // not to the sequence's own start.
                    let table_base = this_offset + 16;
                    for t in targets.iter_mut() {
                        let label_offset = labels[&t.label().0];
                        t.resolved_offset = Some(label_offset as i32 - table_base as i32);
                    }
                }
                _ => {}
            }
        }
    }
}

fn island_slot_ldr_br(rd_enc: u32) -> [u32; 2] {
    // `ldr xRd, #8` (PC-relative literal load of the 8-byte address that
    // immediately follows this two-instruction pair), then `br xRd`.
    let ldr = set_bits(
        0,
        [
            (30..32, 0b01, 0..2),
            (27..30, 0b011, 0..3),
            (26..27, 0, 0..1),
            (24..26, 0b00, 0..2),
            (5..24, 2, 0..19),
            (0..5, rd_enc, 0..5),
        ],
    );
    let br = 0xD61F_0000 | (rd_enc << 5);
    [ldr, br]
}

/// Locate the nearest island to `call_offset` (binary search over the
/// sorted `island_offsets`) that both lies within `bl`'s ±128 MiB reach of
/// the call site and still has a free slot for `callee`, reusing an
/// existing slot already allocated to that callee in a given island.
fn nearest_island_with_capacity(
    island_offsets: &[u32],
    island_next_free: &[u32],
    capacity: u32,
    call_offset: u32,
) -> Option<usize> {
    if island_offsets.is_empty() {
        return None;
    }
    let start = island_offsets.partition_point(|&off| off < call_offset);
    let mut radius = 0usize;
    loop {
        let backward = (start >= radius && start - radius < island_offsets.len()).then_some(start - radius);
        let forward = (radius > 0 && start + radius < island_offsets.len()).then_some(start + radius);
        let candidates = [backward, forward];
        let mut any_in_range = false;
        for idx in candidates.into_iter().flatten() {
            let delta = i64::from(island_offsets[idx]) - i64::from(call_offset);
            if SImm26Words::maybe_from_byte_offset(delta).is_some() {
                any_in_range = true;
                if island_next_free[idx] < capacity {
                    return Some(idx);
                }
            }
        }
        if !any_in_range {
            return None;
        }
        radius += 1;
        if radius > island_offsets.len() {
            return None;
        }
    }
}

/// Patch every [`Kind::CallDirect`] in place: a direct `bl` when the true
/// callee is in range, otherwise a `bl` to a shared island slot that loads
/// the callee's absolute address and tail-jumps to it (spec.md §4.5,
/// "Call relocations").
fn patch_calls(
    code: &mut [u8],
    functions: &[FunctionBody],
    function_offsets: &HashMap<u32, u32>,
    island_offsets: &[u32],
    flags: &CodegenFlags,
    code_base: u64,
) -> Result<(), CodegenError> {
    let mut island_slots: Vec<HashMap<u32, u32>> = vec![HashMap::new(); island_offsets.len()];
    let mut island_next_free: Vec<u32> = vec![0; island_offsets.len()];

    for function in functions {
        for inst in &function.insts {
            let Kind::CallDirect { callee, .. } = &inst.kind else {
                continue;
            };
            let call_offset = inst.byte_offset.expect("offsets assigned before relocation pass");
            let callee_offset = *function_offsets
                .get(&callee.0)
                .ok_or(CodegenError::UnresolvedRelocation {
                    caller_function_id: function.id,
                    offset: call_offset,
                })?;

            let direct_delta = i64::from(callee_offset) - i64::from(call_offset);
            if let Some(words) = SImm26Words::maybe_from_byte_offset(direct_delta) {
                patch_word(code, call_offset, |w| (w & 0xFC00_0000) | words.bits());
                continue;
            }

            tracing::debug!(
                caller = function.id,
                callee = callee.0,
                call_offset,
                callee_offset,
                "call out of bl range, redirecting through a trampoline island"
            );
            let island_idx = nearest_island_with_capacity(
                island_offsets,
                &island_next_free,
                flags.max_trampolines_per_island,
                call_offset,
            )
            .ok_or_else(|| CodegenError::IslandCapacityExceeded {
                island_offset: island_offsets.last().copied().unwrap_or(0),
                capacity: flags.max_trampolines_per_island as usize,
            })?;

            let slot_offset = *island_slots[island_idx].entry(callee.0).or_insert_with(|| {
                let slot = island_offsets[island_idx]
                    + island_next_free[island_idx] * TRAMPOLINE_ISLAND_SLOT_SIZE;
                island_next_free[island_idx] += 1;

                let [ldr, br] = island_slot_ldr_br(u32::from(crate::registers::tmp_reg().enc()));
                code[slot as usize..slot as usize + 4].copy_from_slice(&ldr.to_le_bytes());
                code[slot as usize + 4..slot as usize + 8].copy_from_slice(&br.to_le_bytes());
                let absolute = code_base + u64::from(callee_offset);
                code[slot as usize + 8..slot as usize + 16].copy_from_slice(&absolute.to_le_bytes());
                slot
            });

            let island_delta = i64::from(slot_offset) - i64::from(call_offset);
            let words = SImm26Words::maybe_from_byte_offset(island_delta).expect(
                "an island chosen by nearest_island_with_capacity is always within bl's reach",
            );
            patch_word(code, call_offset, |w| (w & 0xFC00_0000) | words.bits());
        }
    }
    Ok(())
}

fn patch_word(code: &mut [u8], offset: u32, f: impl FnOnce(u32) -> u32) {
    let at = offset as usize;
    let existing = u32::from_le_bytes(code[at..at + 4].try_into().unwrap());
    code[at..at + 4].copy_from_slice(&f(existing).to_le_bytes());
}

/// Link a whole compilation unit: assign offsets, resolve intra-function
/// branches, encode every instruction, and patch call-site displacements
/// (spec.md §4.5). `code_base` is the address the embedder will ultimately
/// map `code`'s bytes to; it is only consumed by the absolute addresses
/// baked into trampoline-island slots, never by `bl`/`b`/`adr`, which stay
/// self-relative.
pub fn link(functions: &mut [FunctionBody], flags: &CodegenFlags, code_base: u64) -> Result<LinkedUnit, CodegenError> {
    let (function_offsets, island_offsets, total_len) = assign_offsets(functions, flags);
    resolve_branches(functions);

    let mut code = vec![0u8; total_len as usize];
    for function in functions.iter() {
        for inst in &function.insts {
            let bytes = encode::encode(inst)?;
            let off = inst.byte_offset.expect("offsets assigned before encoding") as usize;
            code[off..off + bytes.len()].copy_from_slice(&bytes);
        }
    }

    patch_calls(&mut code, functions, &function_offsets, &island_offsets, flags, code_base)?;

    Ok(LinkedUnit { code, function_offsets })
}

/// Build a placeholder [`Kind::CallDirect`] referencing `callee`, useful for
/// embedders assembling a call before the callee's own body exists yet.
#[must_use]
pub fn call_direct(callee: FuncRef, abi: std::rc::Rc<crate::abi::AbiRecord>) -> Inst {
    Inst::new(Kind::CallDirect { callee, abi })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::AbiRecord;
    use crate::inst::{AluOp, BranchTarget, Label};
    use crate::registers::PReg;
    use crate::vreg::RegRef;
    use std::rc::Rc;

    fn nop(label: Option<Label>) -> Inst {
        Inst::new(Kind::Nop { label })
    }

    fn ret() -> Inst {
        Inst::new(Kind::Ret { abi: Rc::new(AbiRecord::empty()) })
    }

    #[test]
    fn adjacent_functions_get_distinct_increasing_offsets() {
        let mut functions = vec![
            FunctionBody { id: 0, insts: vec![ret()] },
            FunctionBody { id: 1, insts: vec![ret(), ret()] },
        ];
        let flags = CodegenFlags::default();
        let (offsets, islands, total) = assign_offsets(&mut functions, &flags);
        assert_eq!(offsets[&0], 0);
        assert_eq!(offsets[&1], 4);
        assert!(islands.is_empty());
        assert_eq!(total, 12);
    }

    #[test]
    fn direct_call_in_range_patches_to_callee_offset() {
        let abi = Rc::new(AbiRecord::empty());
        let mut functions = vec![
            FunctionBody {
                id: 0,
                insts: vec![Inst::new(Kind::CallDirect { callee: FuncRef(1), abi: abi.clone() })],
            },
            FunctionBody { id: 1, insts: vec![ret()] },
        ];
        let flags = CodegenFlags::default();
        let linked = link(&mut functions, &flags, 0).unwrap();
        let w = u32::from_le_bytes(linked.code[0..4].try_into().unwrap());
        assert_eq!(w >> 26, 0b100101); // bl
        assert_eq!(w & 0x3FF_FFFF, 1); // one word forward
    }

    #[test]
    fn forward_branch_to_label_resolves_to_positive_offset() {
        let l = Label(0);
        let mut functions = vec![FunctionBody {
            id: 0,
            insts: vec![
                Inst::new(Kind::Jump { target: BranchTarget::new(l) }),
                nop(Some(l)),
                ret(),
            ],
        }];
        resolve_branches(&mut functions);
        // byte offsets haven't been assigned yet in this unit test, so do it directly.
        let flags = CodegenFlags::default();
        let (_, _, _) = assign_offsets(&mut functions, &flags);
        resolve_branches(&mut functions);
        let Kind::Jump { target } = &functions[0].insts[0].kind else {
            unreachable!()
        };
        assert_eq!(target.resolved_offset, Some(4));
    }

    #[test]
    fn out_of_range_call_routes_through_an_island() {
        let abi = Rc::new(AbiRecord::empty());
        let far_body: Vec<Inst> = (0..40).map(|_| {
            Inst::new(Kind::AluRRR {
                op: AluOp::Add,
                size64: true,
                rd: RegRef::Physical(PReg::int(0)),
                rn: RegRef::Physical(PReg::int(0)),
                rm: RegRef::Physical(PReg::int(0)),
            })
        }).collect();
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
        let linked = link(&mut functions, &flags, 0x1000).unwrap();
        let w = u32::from_le_bytes(linked.code[0..4].try_into().unwrap());
        assert_eq!(w >> 26, 0b100101); // still a `bl`, just a short one to the island
        assert!((w & 0x3FF_FFFF) < 16); // well within the nearby island, not the true callee
    }
}
