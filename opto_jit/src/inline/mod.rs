//! Call Generators
//!
//! A call generator answers one question for one call site: given the
//! JVM state just before the invoke, produce the state just after it. The
//! answer may be an inlined body, an out-of-line call, a guarded split
//! over both, a deoptimization, or a placeholder call that is revisited
//! once the rest of the method is in the graph.
//!
//! # Contract
//!
//! `generate` returns the exit state, or `None` to decline. A declining
//! generator leaves the input state untouched: generators that can
//! decline work on a fork of the map and drop it on decline. On success:
//!
//! - control, memory and io of the exit map describe the state after the
//!   call (control is top when the call never returns)
//! - a returned value is pushed on the exit state's expression stack
//! - exceptional paths travel as exception states chained on the exit map
//!
//! # Layout
//!
//! - **Parse** (`parse.rs`): inline by parsing the callee's bytecode
//! - **Direct / Virtual** (`direct.rs`): emit one Java call node
//! - **Late inline** (`late.rs`): emit a placeholder call, inline it later
//! - **Method handles** (`mh.rs`): resolve linker calls to their targets
//! - **Intrinsics** (`intrinsic.rs`, `predicated.rs`): hand-written bodies
//! - **Predicted** (`predicted.rs`): split on a profiled receiver class
//! - **Uncommon trap** (`trap.rs`): deoptimize at the call
//! - **Driver** (`driver.rs`): generator selection and the incremental
//!   inlining loop
//! - **Log** (`log.rs`): the record of inlining decisions

mod direct;
mod driver;
mod intrinsic;
mod late;
mod log;
mod mh;
mod parse;
mod predicated;
mod predicted;
mod trap;

pub use log::{InlineLog, InlineOutcome, InlineRecord};
pub use mh::is_consistent_info;

use crate::ci::{DeoptAction, DeoptReason, KlassId, MethodId, MethodInfo};
use crate::compile::Compile;
use crate::ir::arena::Id;
use crate::ir::node::NodeId;
use crate::ir::types::TypeFunc;
use crate::jvms::JvmsId;

/// Handle of a generator held in the compile's side table.
pub type GenId = Id<CallGenerator>;

// =============================================================================
// Collaborators
// =============================================================================

/// Bytecode parser used to inline a callee's body.
pub trait BytecodeParser: Send + Sync {
    /// Parse `method` as called from the frame `caller`.
    ///
    /// The arguments sit on `caller`'s expression stack above its stack
    /// pointer. Returns the caller's state after the call, with the
    /// result pushed, or `None` when the body cannot be parsed.
    fn parse(&self, c: &mut Compile, caller: JvmsId, method: MethodId, expected_uses: f32) -> Option<JvmsId>;
}

/// Hand-written implementations of well-known methods.
pub trait IntrinsicLibrary: Send + Sync {
    fn has_intrinsic(&self, method: &MethodInfo, is_virtual: bool) -> bool;

    /// Number of runtime preconditions guarding the fast path.
    fn predicates_count(&self, _method: &MethodInfo) -> u32 {
        0
    }

    /// Whether the intrinsic selects the receiver's implementation itself.
    fn does_virtual_dispatch(&self, _method: &MethodInfo) -> bool {
        false
    }

    /// Emit the fast path at `jvms`; same contract as
    /// [`CallGenerator::generate`].
    fn generate(&self, c: &mut Compile, jvms: JvmsId, method: MethodId, is_virtual: bool) -> Option<JvmsId>;

    /// Emit test `predicate` at `jvms`.
    ///
    /// The map continues on the passing path. Returns the control of the
    /// failing path, if any.
    fn generate_predicate(&self, c: &mut Compile, jvms: JvmsId, method: MethodId, predicate: u32) -> Option<NodeId>;
}

// =============================================================================
// Generators
// =============================================================================

/// Deferred-inline flavor of a placeholder call.
#[derive(Debug, Clone, PartialEq)]
pub enum LateFlavor {
    /// Inline the wrapped generator during incremental inlining.
    Generic,
    /// Method-handle linker call whose target may become constant.
    MethodHandle {
        input_not_const: bool,
        attempted: bool,
    },
    /// Virtual call whose receiver may become exact.
    Virtual {
        vtable_index: Option<u32>,
        prof_factor: f32,
        /// Target the receiver binds to, once known.
        callee: Option<MethodId>,
        attempted: bool,
    },
    /// String-builder chain, inlined after string optimizations.
    String,
    /// Box `valueOf`, inlined after box elimination.
    Boxing,
}

/// One strategy for one call site.
#[derive(Debug, Clone, PartialEq)]
pub enum CallGenerator {
    /// Parse the callee's bytecode in place of the call.
    Parse { method: MethodId, expected_uses: f32 },
    /// Statically bound call.
    Direct { method: MethodId, separate_io_proj: bool },
    /// Call dispatched on the receiver's class.
    Virtual {
        method: MethodId,
        vtable_index: Option<u32>,
        separate_io_proj: bool,
    },
    /// Placeholder call revisited by the incremental inliner.
    LateInline {
        method: MethodId,
        flavor: LateFlavor,
        inline_cg: Option<Box<CallGenerator>>,
    },
    Intrinsic {
        method: MethodId,
        is_virtual: bool,
        predicates: u32,
        does_virtual_dispatch: bool,
    },
    /// Intrinsic fast paths behind predicates, with a fallback.
    PredicatedIntrinsic {
        intrinsic: Box<CallGenerator>,
        fallback: Box<CallGenerator>,
    },
    /// Split on the receiver's exact class.
    Predicted {
        receiver: KlassId,
        hit_prob: f32,
        if_hit: Box<CallGenerator>,
        if_missed: Box<CallGenerator>,
    },
    UncommonTrap {
        method: MethodId,
        reason: DeoptReason,
        action: DeoptAction,
    },
}

impl CallGenerator {
    // =========================================================================
    // Construction
    // =========================================================================

    pub fn for_inline(method: MethodId, expected_uses: f32) -> Self {
        CallGenerator::Parse { method, expected_uses }
    }

    pub fn for_direct_call(method: MethodId, separate_io_proj: bool) -> Self {
        CallGenerator::Direct {
            method,
            separate_io_proj,
        }
    }

    pub fn for_virtual_call(method: MethodId, vtable_index: Option<u32>) -> Self {
        CallGenerator::Virtual {
            method,
            vtable_index,
            separate_io_proj: false,
        }
    }

    /// Emit a call now and inline it with `inline_cg` later.
    pub fn for_late_inline(method: MethodId, inline_cg: CallGenerator) -> Self {
        CallGenerator::LateInline {
            method,
            flavor: LateFlavor::Generic,
            inline_cg: Some(Box::new(inline_cg)),
        }
    }

    pub fn for_mh_late_inline(method: MethodId, input_not_const: bool) -> Self {
        CallGenerator::LateInline {
            method,
            flavor: LateFlavor::MethodHandle {
                input_not_const,
                attempted: false,
            },
            inline_cg: None,
        }
    }

    pub fn for_late_inline_virtual(method: MethodId, vtable_index: Option<u32>, prof_factor: f32) -> Self {
        CallGenerator::LateInline {
            method,
            flavor: LateFlavor::Virtual {
                vtable_index,
                prof_factor,
                callee: None,
                attempted: false,
            },
            inline_cg: None,
        }
    }

    pub fn for_string_late_inline(method: MethodId, inline_cg: CallGenerator) -> Self {
        CallGenerator::LateInline {
            method,
            flavor: LateFlavor::String,
            inline_cg: Some(Box::new(inline_cg)),
        }
    }

    pub fn for_boxing_late_inline(method: MethodId, inline_cg: CallGenerator) -> Self {
        CallGenerator::LateInline {
            method,
            flavor: LateFlavor::Boxing,
            inline_cg: Some(Box::new(inline_cg)),
        }
    }

    /// Use `if_hit` when the receiver's class is exactly `receiver`,
    /// `if_missed` otherwise.
    pub fn for_predicted_call(
        receiver: KlassId,
        if_missed: CallGenerator,
        if_hit: CallGenerator,
        hit_prob: f32,
    ) -> Self {
        CallGenerator::Predicted {
            receiver,
            hit_prob,
            if_hit: Box::new(if_hit),
            if_missed: Box::new(if_missed),
        }
    }

    pub fn for_predicated_intrinsic(intrinsic: CallGenerator, fallback: CallGenerator) -> Self {
        CallGenerator::PredicatedIntrinsic {
            intrinsic: Box::new(intrinsic),
            fallback: Box::new(fallback),
        }
    }

    pub fn for_intrinsic(method: MethodId, is_virtual: bool, predicates: u32, does_virtual_dispatch: bool) -> Self {
        CallGenerator::Intrinsic {
            method,
            is_virtual,
            predicates,
            does_virtual_dispatch,
        }
    }

    pub fn for_uncommon_trap(method: MethodId, reason: DeoptReason, action: DeoptAction) -> Self {
        CallGenerator::UncommonTrap { method, reason, action }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// The method this generator stands for.
    pub fn method(&self) -> MethodId {
        match self {
            CallGenerator::Parse { method, .. }
            | CallGenerator::Direct { method, .. }
            | CallGenerator::Virtual { method, .. }
            | CallGenerator::LateInline { method, .. }
            | CallGenerator::Intrinsic { method, .. }
            | CallGenerator::UncommonTrap { method, .. } => *method,
            CallGenerator::PredicatedIntrinsic { intrinsic, .. } => intrinsic.method(),
            CallGenerator::Predicted { if_missed, .. } => if_missed.method(),
        }
    }

    /// Whether the call's body ends up in the graph.
    pub fn is_inline(&self) -> bool {
        match self {
            CallGenerator::Parse { .. } | CallGenerator::PredicatedIntrinsic { .. } => true,
            CallGenerator::Predicted { if_hit, .. } => if_hit.is_inline(),
            _ => false,
        }
    }

    pub fn is_virtual(&self) -> bool {
        match self {
            CallGenerator::Virtual { .. }
            | CallGenerator::Predicted { .. }
            | CallGenerator::PredicatedIntrinsic { .. } => true,
            CallGenerator::Intrinsic { is_virtual, .. } => *is_virtual,
            CallGenerator::LateInline { flavor, .. } => matches!(flavor, LateFlavor::Virtual { .. }),
            _ => false,
        }
    }

    pub fn is_late_inline(&self) -> bool {
        matches!(self, CallGenerator::LateInline { .. })
    }

    pub fn is_mh_late_inline(&self) -> bool {
        self.late_flavor()
            .is_some_and(|f| matches!(f, LateFlavor::MethodHandle { .. }))
    }

    pub fn is_virtual_late_inline(&self) -> bool {
        self.late_flavor()
            .is_some_and(|f| matches!(f, LateFlavor::Virtual { .. }))
    }

    pub fn is_string_late_inline(&self) -> bool {
        self.late_flavor().is_some_and(|f| matches!(f, LateFlavor::String))
    }

    pub fn is_boxing_late_inline(&self) -> bool {
        self.late_flavor().is_some_and(|f| matches!(f, LateFlavor::Boxing))
    }

    pub fn late_flavor(&self) -> Option<&LateFlavor> {
        match self {
            CallGenerator::LateInline { flavor, .. } => Some(flavor),
            _ => None,
        }
    }

    pub fn is_intrinsic(&self) -> bool {
        matches!(
            self,
            CallGenerator::Intrinsic { .. } | CallGenerator::PredicatedIntrinsic { .. }
        )
    }

    pub fn is_predicated(&self) -> bool {
        self.predicates_count() > 0
    }

    pub fn predicates_count(&self) -> u32 {
        match self {
            CallGenerator::Intrinsic { predicates, .. } => *predicates,
            CallGenerator::PredicatedIntrinsic { intrinsic, .. } => intrinsic.predicates_count(),
            _ => 0,
        }
    }

    pub fn is_trap(&self) -> bool {
        matches!(self, CallGenerator::UncommonTrap { .. })
    }

    pub fn does_virtual_dispatch(&self) -> bool {
        match self {
            CallGenerator::Intrinsic {
                does_virtual_dispatch,
                ..
            } => *does_virtual_dispatch,
            CallGenerator::PredicatedIntrinsic { intrinsic, .. } => intrinsic.does_virtual_dispatch(),
            _ => false,
        }
    }

    /// The call can be dropped when its result is unused.
    pub fn is_pure_call(&self) -> bool {
        self.is_boxing_late_inline()
    }

    // =========================================================================
    // Generation
    // =========================================================================

    /// Produce the state after the call from the state `jvms` before it.
    ///
    /// Returns `None` to decline, leaving `jvms` untouched, or when the
    /// compile is failing.
    pub fn generate(&self, c: &mut Compile, jvms: JvmsId) -> Option<JvmsId> {
        if c.failing() {
            return None;
        }
        match self {
            CallGenerator::Parse {
                method,
                expected_uses,
            } => parse::generate(c, jvms, *method, *expected_uses),
            CallGenerator::Direct {
                method,
                separate_io_proj,
            } => direct::emit_direct(c, jvms, *method, *separate_io_proj).map(|(exit, _)| exit),
            CallGenerator::Virtual {
                method,
                vtable_index,
                separate_io_proj,
            } => direct::emit_virtual(c, jvms, *method, *vtable_index, *separate_io_proj).map(|(exit, _)| exit),
            CallGenerator::LateInline { .. } => late::generate(c, jvms, self),
            CallGenerator::Intrinsic {
                method, is_virtual, ..
            } => intrinsic::generate(c, jvms, *method, *is_virtual),
            CallGenerator::PredicatedIntrinsic { intrinsic, fallback } => {
                predicated::generate(c, jvms, intrinsic, fallback)
            }
            CallGenerator::Predicted {
                receiver,
                hit_prob,
                if_hit,
                if_missed,
            } => predicted::generate(c, jvms, *receiver, *hit_prob, if_hit, if_missed),
            CallGenerator::UncommonTrap {
                method,
                reason,
                action,
            } => trap::generate(c, jvms, *method, *reason, *action),
        }
    }
}

// =============================================================================
// Shared Helpers
// =============================================================================

/// Call signature of `info`, receiver included.
pub(crate) fn method_tf(info: &MethodInfo) -> TypeFunc {
    let params = info.signature.with_receiver(info.is_static());
    TypeFunc::new(&params, info.signature.ret)
}

/// Private copy of the state at `jvms` for a generator that may decline.
fn fork_state(c: &mut Compile, jvms: JvmsId) -> Option<JvmsId> {
    c.clone_map(jvms)
}

/// Drop a fork whose generator declined.
fn discard_fork(c: &mut Compile, fork: JvmsId) {
    if let Some(map) = c.jvms.get(fork).map() {
        if !c.graph.is_dead(map) {
            c.graph.disconnect_inputs(map);
        }
    }
}

/// Append the exception states pending on `from`'s map to those on
/// `to`'s map.
fn join_exceptions(c: &mut Compile, from: JvmsId, to: JvmsId) {
    let (Some(from_map), Some(to_map)) = (c.jvms.get(from).map(), c.jvms.get(to).map()) else {
        return;
    };
    if from_map == to_map {
        return;
    }
    let Some(pending) = c.graph.sfpt_mut(from_map).next_exception.take() else {
        return;
    };
    let mut tail = to_map;
    while let Some(next) = c.graph.sfpt(tail).next_exception {
        tail = next;
    }
    c.graph.sfpt_mut(tail).next_exception = Some(pending);
}

// =============================================================================
// Tests
// =============================================================================
