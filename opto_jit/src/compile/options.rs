//! Compilation and inlining configuration.
//!
//! Every heuristic threshold used by the inlining policy lives here, so a
//! driver can trade compile time for code quality without touching the
//! graph logic.

// =============================================================================
// Inline Configuration
// =============================================================================

/// Configuration for the inlining heuristics.
#[derive(Debug, Clone, PartialEq)]
pub struct InlineConfig {
    /// Maximum bytecode size of a callee inlined regardless of frequency.
    pub max_inline_size: u32,
    /// Maximum bytecode size of a frequently executed callee.
    pub freq_inline_size: u32,
    /// Maximum inlining depth.
    pub max_inline_level: u32,
    /// Maximum recursive inlining of the same method.
    pub max_recursive_inline_level: u32,
    /// Invocation count at which a callee counts as hot.
    pub inline_small_code: u32,
    /// Minimum call-site frequency relative to the caller's entry count.
    pub min_inline_frequency_ratio: f32,
    /// Share of profiled receivers (percent) a class needs to be
    /// predicted.
    pub type_profile_major_receiver_percent: u32,
    /// Use receiver profiles to predict virtual calls.
    pub use_type_profile: bool,
    /// Resolve and inline through constant method handles.
    pub inline_method_handles: bool,
    /// Replace known library methods by intrinsics.
    pub intrinsics_enabled: bool,
}

impl Default for InlineConfig {
    fn default() -> Self {
        Self {
            max_inline_size: 35,
            freq_inline_size: 325,
            max_inline_level: 15,
            max_recursive_inline_level: 1,
            inline_small_code: 2500,
            min_inline_frequency_ratio: 0.0085,
            type_profile_major_receiver_percent: 90,
            use_type_profile: true,
            inline_method_handles: true,
            intrinsics_enabled: true,
        }
    }
}

impl InlineConfig {
    /// Create a conservative inlining configuration for faster compilation.
    pub fn conservative() -> Self {
        Self {
            max_inline_size: 15,
            freq_inline_size: 100,
            max_inline_level: 4,
            max_recursive_inline_level: 0,
            use_type_profile: false,
            ..Default::default()
        }
    }

    /// Create an aggressive inlining configuration for maximum optimization.
    pub fn aggressive() -> Self {
        Self {
            max_inline_size: 100,
            freq_inline_size: 1000,
            max_inline_level: 25,
            max_recursive_inline_level: 2,
            type_profile_major_receiver_percent: 75,
            ..Default::default()
        }
    }

    /// Create configuration optimized for tier-1 JIT (fast compile, limited inline).
    pub fn tier1() -> Self {
        Self {
            max_inline_size: 8,
            freq_inline_size: 35,
            max_inline_level: 1,
            max_recursive_inline_level: 0,
            use_type_profile: false,
            inline_method_handles: false,
            ..Default::default()
        }
    }

    /// Create configuration optimized for tier-2 JIT (thorough optimization).
    pub fn tier2() -> Self {
        Self::default()
    }
}

// =============================================================================
// Compile Options
// =============================================================================

/// Per-compilation limits and switches.
#[derive(Debug, Clone, PartialEq)]
pub struct CompileOptions {
    /// Live node count at which the compile gives up.
    pub max_node_limit: usize,
    /// Headroom kept below the limit when deciding to grow the graph.
    pub node_limit_fudge_factor: usize,
    /// Live node count above which eager inlining is deferred.
    pub live_node_count_inlining_cutoff: usize,
    /// Allow deferring inlining decisions past the initial parse.
    pub incremental_inline: bool,
    /// Defer every inlining decision.
    pub always_incremental_inline: bool,
    /// Virtual calls may be devirtualized after parsing.
    pub incremental_inline_virtual: bool,
    /// Method handle calls may be resolved after parsing.
    pub incremental_inline_mh: bool,
    /// Let the hardware trap on null receivers instead of testing.
    pub implicit_null_checks: bool,
    /// Null-check traps at a site above which an explicit test is used.
    pub implicit_null_check_threshold: u32,
    /// Dispatch virtual calls through inline caches.
    pub use_inline_caches: bool,
    /// Traps per bytecode before recompilation stops being requested.
    pub per_bytecode_recompilation_cutoff: u32,
    /// Recompilations of a method after which no trap may request
    /// another one.
    pub per_method_recompilation_cutoff: u32,
    /// Traps of one reason per method before a site stops being
    /// speculated on.
    pub per_method_trap_limit: u32,
    /// Give late-inline calls distinct exceptional memory and io
    /// projections.
    pub separate_io_proj_for_late_inline: bool,
    pub inline: InlineConfig,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            max_node_limit: 80_000,
            node_limit_fudge_factor: 2_000,
            live_node_count_inlining_cutoff: 40_000,
            incremental_inline: true,
            always_incremental_inline: false,
            incremental_inline_virtual: true,
            incremental_inline_mh: true,
            implicit_null_checks: true,
            implicit_null_check_threshold: 3,
            use_inline_caches: true,
            per_bytecode_recompilation_cutoff: 200,
            per_method_recompilation_cutoff: 400,
            per_method_trap_limit: 100,
            separate_io_proj_for_late_inline: true,
            inline: InlineConfig::default(),
        }
    }
}

impl CompileOptions {
    /// Fast compiles: eager decisions only, small graphs.
    pub fn tier1() -> Self {
        Self {
            max_node_limit: 20_000,
            live_node_count_inlining_cutoff: 10_000,
            incremental_inline: false,
            incremental_inline_virtual: false,
            incremental_inline_mh: false,
            inline: InlineConfig::tier1(),
            ..Default::default()
        }
    }

    /// Full optimization.
    pub fn tier2() -> Self {
        Self::default()
    }

    /// Defer every call so post-parse inlining is always exercised.
    pub fn stress_incremental() -> Self {
        Self {
            always_incremental_inline: true,
            ..Default::default()
        }
    }

    /// Node budget left before the compile must bail out.
    pub fn node_budget(&self, live: usize) -> usize {
        self.max_node_limit.saturating_sub(live)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_order_sizes() {
        let c = InlineConfig::conservative();
        let d = InlineConfig::default();
        let a = InlineConfig::aggressive();
        assert!(c.max_inline_size < d.max_inline_size);
        assert!(d.max_inline_size < a.max_inline_size);
        assert!(InlineConfig::tier1().max_inline_level <= c.max_inline_level);
        assert_eq!(InlineConfig::tier2(), d);
    }

    #[test]
    fn test_compile_presets() {
        assert!(!CompileOptions::tier1().incremental_inline);
        assert!(CompileOptions::stress_incremental().always_incremental_inline);
        let o = CompileOptions::default();
        assert!(o.live_node_count_inlining_cutoff < o.max_node_limit);
        assert_eq!(o.node_budget(o.max_node_limit + 5), 0);
    }
}
