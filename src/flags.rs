//! Embedder-supplied tunables for the linker passes.
//!
//! This core reads no configuration file of its own; the embedding compiler
//! constructs a [`CodegenFlags`] once per compilation and passes it through.

/// Tunables for trampoline-island placement and optional safety checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodegenFlags {
    /// Byte distance between consecutive trampoline islands in a large
    /// compilation unit. Must satisfy
    /// `max_trampolines_per_island * TRAMPOLINE_CALL_SIZE < trampoline_island_interval / 2`.
    pub trampoline_island_interval: u32,
    /// Maximum number of trampoline slots per island.
    pub max_trampolines_per_island: u32,
    /// Whether the platform-reserved ("pinned") register is in use and must
    /// be excluded from the allocatable set.
    pub use_pinned_register: bool,
    /// Whether to emit the stack-bounds check at function entry.
    pub emit_stack_bounds_check: bool,
}

/// Size in bytes of one reserved trampoline call slot: `movz` + three
/// `movk` + `blr` + `b` back to the call site, per spec.md §4.5.
pub const TRAMPOLINE_CALL_SIZE: u32 = 24;

/// Size in bytes of one trampoline-island entry: literal-load + skip +
/// inlined 8-byte absolute address, per spec.md §4.5.
pub const TRAMPOLINE_ISLAND_SLOT_SIZE: u32 = 16;

impl Default for CodegenFlags {
    fn default() -> Self {
        Self {
            trampoline_island_interval: 100 * 1024 * 1024,
            max_trampolines_per_island: 2000,
            use_pinned_register: false,
            emit_stack_bounds_check: true,
        }
    }
}

impl CodegenFlags {
    /// Validate the island-sizing constraints from spec.md §4.5:
    /// `max_trampolines_per_island * TRAMPOLINE_CALL_SIZE < trampoline_island_interval / 2`
    /// and an analogous bound on the largest single function body.
    #[must_use]
    pub fn islands_fit(&self, max_function_executable_size: u32) -> bool {
        let trampolines_budget = self.max_trampolines_per_island * TRAMPOLINE_CALL_SIZE;
        trampolines_budget < self.trampoline_island_interval / 2
            && max_function_executable_size < self.trampoline_island_interval / 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_satisfy_their_own_constraint() {
        let flags = CodegenFlags::default();
        assert!(flags.islands_fit(16 * 1024 * 1024));
    }

    #[test]
    fn oversized_island_budget_is_rejected() {
        let flags = CodegenFlags {
            trampoline_island_interval: 1000,
            max_trampolines_per_island: 100,
            ..CodegenFlags::default()
        };
        assert!(!flags.islands_fit(16 * 1024 * 1024));
    }
}
