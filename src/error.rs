//! Error taxonomy for the backend core.
//!
//! Most failure modes named in the spec are programming errors (wrong
//! operand variant for an instruction kind, a virtual register reaching the
//! encoder unassigned) and stay as `panic!`/`debug_assert!` at the call
//! site, matching the source compiler's behavior. The two error types here
//! cover the conditions that a caller is expected to recover from.

use thiserror::Error;

/// Failure to encode a single value into a fixed-width instruction field.
///
/// These are never meant to reach the encoder: the addressing-mode
/// synthesizer and constant-pool emitter check fitness up front and
/// materialize a temporary register instead. A [`CodeEncodeError`] surfacing
/// from [`crate::encode::encode`] indicates an upstream layer failed to do
/// that check.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodeEncodeError {
    /// A 64-bit constant has no `(immr, imms, N)` bitmask-immediate encoding.
    #[error("{0:#018x} is not encodable as an AArch64 bitmask immediate")]
    UnencodableBitmaskImmediate(u64),
    /// A load/store offset fits neither `RegUnsignedImm12` nor `RegSignedImm9`
    /// for the given access size.
    #[error("offset {offset} does not fit any scalar addressing mode for a {size}-bit access")]
    UnencodableOffset {
        /// The offending byte offset.
        offset: i64,
        /// Access size in bits (8/16/32/64/128).
        size: u8,
    },
    /// A jump-table or constant-pool payload does not fit its reserved slot.
    #[error("payload of {len} bytes does not fit the reserved {capacity}-byte slot")]
    PayloadTooLarge {
        /// Payload length in bytes.
        len: usize,
        /// Capacity of the slot the payload must fit, in bytes.
        capacity: usize,
    },
}

/// Failure that aborts code generation for an entire function or
/// compilation unit.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CodegenError {
    /// A call relocation's callee was never assigned a byte offset.
    #[error("relocation at offset {offset:#x} in function {caller_function_id} refers to an unresolved callee")]
    UnresolvedRelocation {
        /// The function that contains the unresolved call.
        caller_function_id: u32,
        /// Byte offset of the `bl` instruction within that function.
        offset: u32,
    },
    /// A trampoline island ran out of call slots.
    #[error("trampoline island at offset {island_offset:#x} has no free slot (capacity {capacity})")]
    IslandCapacityExceeded {
        /// Byte offset of the island that overflowed.
        island_offset: u32,
        /// Configured slot capacity of each island.
        capacity: usize,
    },
    /// A low-level encoding failure escaped an upstream layer that should
    /// have prevented it.
    #[error(transparent)]
    Encode(#[from] CodeEncodeError),
}
