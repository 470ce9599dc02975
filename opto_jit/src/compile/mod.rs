//! Per-compilation context.
//!
//! [`Compile`] owns everything one compilation mutates: the node graph, the
//! JVM state arena, the bookkeeping lists that must track live nodes, the
//! call generators parked on call sites, and the sticky failure flag. It is
//! threaded by `&mut` through every graph-mutating routine; nothing is
//! reached ambiently.
//!
//! # Architecture
//!
//! - **Failure**: [`Compile::record_failure`] keeps the first
//!   [`Bailout`]; every phase polls [`Compile::failing`]
//! - **Node lists** (`worklist.rs`): macro nodes, expensive nodes, the
//!   late-inline queues and the parked-call table
//! - **Liveness** (`useful.rs`): reachability sweep and pruning of every
//!   list against it
//! - **Replacement** (`replace.rs`): global replace-by-use with
//!   value-numbering brackets
//!
//! # Example
//!
//! ```ignore
//! let mut c = Compile::new(oracle, method, CompileOptions::default());
//! let entry = c.entry_state()?;
//! // ... parse, generate calls ...
//! c.inline_incrementally();
//! if let Some(reason) = c.failure() {
//!     // fall back to a lower tier
//! }
//! ```

mod error;
mod options;
mod replace;
mod useful;
mod worklist;

pub use error::Bailout;
pub use options::{CompileOptions, InlineConfig};

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::ci::{DeoptReason, MethodId, MethodInfo, MethodOracle};
use crate::inline::{BytecodeParser, CallGenerator, GenId, InlineLog, IntrinsicLibrary};
use crate::ir::arena::Arena;
use crate::ir::graph::Graph;
use crate::ir::node::{NodeFlags, NodeId};
use crate::ir::operators::NodeKind;
use crate::ir::types::{AliasTable, Type, TypeFunc};
use crate::ir::worklist::UniqueNodeList;
use crate::jvms::{JvmState, JvmsArena, JvmsId, Reexecute};

// =============================================================================
// Compile
// =============================================================================

/// State of one compilation of one method.
pub struct Compile {
    pub graph: Graph,
    pub jvms: JvmsArena,
    pub options: CompileOptions,
    pub alias: AliasTable,
    /// Nodes whose inputs changed and deserve another rewrite pass.
    pub igvn_worklist: UniqueNodeList,

    oracle: Arc<dyn MethodOracle>,
    parser: Option<Arc<dyn BytecodeParser>>,
    intrinsics: Option<Arc<dyn IntrinsicLibrary>>,
    method: MethodId,
    failure: Option<Bailout>,

    macro_nodes: UniqueNodeList,
    expensive_nodes: UniqueNodeList,

    /// Generators that may revisit the call they emitted.
    generators: Arena<CallGenerator>,
    /// Call node to the generator that emitted it.
    call_generators: FxHashMap<NodeId, GenId>,
    /// Calls waiting for an input to become constant or exact before they
    /// are queued for late inlining.
    parked_calls: UniqueNodeList,
    late_inlines: Vec<NodeId>,
    late_inlines_pos: usize,
    string_late_inlines: Vec<NodeId>,
    boxing_late_inlines: Vec<NodeId>,

    inline_log: InlineLog,
    inlining_incrementally: bool,
    inlining_progress: bool,
    do_cleanup: bool,
    has_boxed_value: bool,
    has_stringbuilder: bool,
}

impl Compile {
    /// Start compiling `method`.
    pub fn new(oracle: Arc<dyn MethodOracle>, method: MethodId, options: CompileOptions) -> Self {
        tracing::debug!(method = %method, "new compile");
        Compile {
            graph: Graph::new(),
            jvms: JvmsArena::new(),
            options,
            alias: AliasTable::new(),
            igvn_worklist: UniqueNodeList::new(),
            oracle,
            parser: None,
            intrinsics: None,
            method,
            failure: None,
            macro_nodes: UniqueNodeList::new(),
            expensive_nodes: UniqueNodeList::new(),
            generators: Arena::new(),
            call_generators: FxHashMap::default(),
            parked_calls: UniqueNodeList::new(),
            late_inlines: Vec::new(),
            late_inlines_pos: 0,
            string_late_inlines: Vec::new(),
            boxing_late_inlines: Vec::new(),
            inline_log: InlineLog::default(),
            inlining_incrementally: false,
            inlining_progress: false,
            do_cleanup: false,
            has_boxed_value: false,
            has_stringbuilder: false,
        }
    }

    /// Parser used to inline bytecoded callees.
    pub fn with_parser(mut self, parser: Arc<dyn BytecodeParser>) -> Self {
        self.parser = Some(parser);
        self
    }

    /// Library of hand-written intrinsic bodies.
    pub fn with_intrinsics(mut self, intrinsics: Arc<dyn IntrinsicLibrary>) -> Self {
        self.intrinsics = Some(intrinsics);
        self
    }

    // =========================================================================
    // Collaborators
    // =========================================================================

    /// Method being compiled.
    #[inline]
    pub fn method(&self) -> MethodId {
        self.method
    }

    pub fn oracle(&self) -> &Arc<dyn MethodOracle> {
        &self.oracle
    }

    pub fn parser(&self) -> Option<Arc<dyn BytecodeParser>> {
        self.parser.clone()
    }

    pub fn intrinsics(&self) -> Option<Arc<dyn IntrinsicLibrary>> {
        self.intrinsics.clone()
    }

    /// Metadata of `m`. A method the oracle does not know fails the
    /// compile.
    pub fn method_info(&mut self, m: MethodId) -> Option<Arc<MethodInfo>> {
        let info = self.oracle.method(m);
        if info.is_none() {
            self.record_failure(Bailout::Other(format!("no metadata for {}", m)));
        }
        info
    }

    pub fn inline_log(&self) -> &InlineLog {
        &self.inline_log
    }

    pub fn inline_log_mut(&mut self) -> &mut InlineLog {
        &mut self.inline_log
    }

    // =========================================================================
    // Failure
    // =========================================================================

    /// Mark the compile as failing. Only the first reason is kept, and the
    /// graph is cut off from the root so nothing downstream mistakes it
    /// for a finished one.
    pub fn record_failure(&mut self, reason: Bailout) {
        if self.failure.is_some() {
            tracing::trace!(%reason, "ignoring secondary failure");
            return;
        }
        tracing::warn!(method = %self.method, %reason, "compilation failed");
        self.failure = Some(reason);
        let root = self.graph.root();
        self.graph.set_req_count(root, 1);
    }

    #[inline]
    pub fn failing(&self) -> bool {
        self.failure.is_some()
    }

    pub fn failure(&self) -> Option<&Bailout> {
        self.failure.as_ref()
    }

    /// Fail the compile if adding `need` nodes would exceed the node limit.
    pub fn check_node_count(&mut self, need: usize) -> bool {
        let live = self.live_nodes();
        let limit = self.options.max_node_limit;
        if live + need > limit {
            self.record_failure(Bailout::NodeLimitExceeded {
                live: live + need,
                limit,
            });
            return true;
        }
        false
    }

    // =========================================================================
    // Node Accounting
    // =========================================================================

    #[inline]
    pub fn unique(&self) -> usize {
        self.graph.unique()
    }

    #[inline]
    pub fn live_nodes(&self) -> usize {
        self.graph.live_nodes()
    }

    #[inline]
    pub fn top(&self) -> NodeId {
        self.graph.top()
    }

    #[inline]
    pub fn root(&self) -> NodeId {
        self.graph.root()
    }

    pub fn record_for_igvn(&mut self, n: NodeId) {
        self.igvn_worklist.push(n);
    }

    /// Over the live-node budget for eager inlining.
    pub fn over_inlining_cutoff(&self) -> bool {
        let cutoff = self.options.live_node_count_inlining_cutoff;
        if self.inlining_incrementally {
            // Leave some room so incremental inlining does not thrash
            // around the limit.
            self.live_nodes() > cutoff * 11 / 10
        } else {
            self.live_nodes() > cutoff
        }
    }

    // =========================================================================
    // Inlining State
    // =========================================================================

    #[inline]
    pub fn inlining_incrementally(&self) -> bool {
        self.inlining_incrementally
    }

    pub fn set_inlining_incrementally(&mut self, yes: bool) {
        self.inlining_incrementally = yes;
    }

    #[inline]
    pub fn inlining_progress(&self) -> bool {
        self.inlining_progress
    }

    pub fn set_inlining_progress(&mut self, yes: bool) {
        self.inlining_progress = yes;
    }

    #[inline]
    pub fn do_cleanup(&self) -> bool {
        self.do_cleanup
    }

    pub fn set_do_cleanup(&mut self, yes: bool) {
        self.do_cleanup = yes;
    }

    pub fn has_boxed_value(&self) -> bool {
        self.has_boxed_value
    }

    pub fn set_has_boxed_value(&mut self, yes: bool) {
        self.has_boxed_value = yes;
    }

    pub fn has_stringbuilder(&self) -> bool {
        self.has_stringbuilder
    }

    pub fn set_has_stringbuilder(&mut self, yes: bool) {
        self.has_stringbuilder = yes;
    }

    // =========================================================================
    // Trap History
    // =========================================================================

    /// The site at `bci` trapped for `reason`, or the method has trapped
    /// for it too often overall.
    pub fn too_many_traps(&self, method: &MethodInfo, bci: i32, reason: DeoptReason) -> bool {
        if bci >= 0 && method.trap_count(bci as u32, reason) > 0 {
            return true;
        }
        method.trap_count_total(reason) >= self.options.per_method_trap_limit
    }

    /// Traps at `bci` already caused too many recompilations.
    pub fn too_many_recompiles(&self, method: &MethodInfo, bci: i32, reason: DeoptReason) -> bool {
        let bc_cutoff = self.options.per_bytecode_recompilation_cutoff / 8;
        let m_cutoff = self.options.per_method_recompilation_cutoff / 2 + 1;
        let trapped_here = bci >= 0 && method.trap_count(bci as u32, reason) > 0;
        (trapped_here && method.recompiles >= bc_cutoff) || method.recompiles >= m_cutoff
    }

    // =========================================================================
    // Node Cloning and Destruction
    // =========================================================================

    /// Copy `n` along with the state it carries outside the graph.
    ///
    /// A safepoint's JVM state chain is deep-copied and rebound to the
    /// copy; a parked call generator is copied and parked on the clone;
    /// macro and expensive nodes are registered.
    pub fn clone_node(&mut self, n: NodeId) -> NodeId {
        let copy = self.graph.clone_node(n);
        if let Some(j) = self.graph.node(copy).jvms() {
            let deep = self.jvms.clone_deep(j);
            self.jvms.set_map_deep(deep, Some(copy));
            self.graph.sfpt_mut(copy).jvms = Some(deep);
        }
        if self.graph.node(copy).is_call() && self.parked_calls.member(n) {
            if let Some(&gid) = self.call_generators.get(&n) {
                let generator = self.generators[gid].clone();
                self.park_call(copy, generator);
            }
        }
        let flags = self.graph.node(copy).flags;
        if flags.contains(NodeFlags::MACRO) {
            self.add_macro_node(copy);
        }
        if flags.contains(NodeFlags::EXPENSIVE) {
            self.add_expensive_node(copy);
        }
        copy
    }

    /// Copy of the map bound to `jvms`, on a shallow copy of the state.
    ///
    /// The copy has its own split memory and no exception states.
    pub fn clone_map(&mut self, jvms: JvmsId) -> Option<JvmsId> {
        let map = self.jvms.get(jvms).map()?;
        let mem = self.graph.memory(map);
        let mm = self.graph.make_merge_mem(mem);
        let clone = self.graph.clone_node(map);
        let cj = self.jvms.clone_shallow(jvms);
        self.graph.set_memory(clone, Some(mm));
        self.jvms.bind_map(&mut self.graph, cj, clone);
        self.graph.sfpt_mut(clone).next_exception = None;
        self.record_for_igvn(clone);
        Some(cj)
    }

    /// Destroy `n` (which has no uses) and forget it in every list.
    pub fn destruct_node(&mut self, n: NodeId) {
        self.forget_node(n);
        self.graph.destruct(n);
    }

    // =========================================================================
    // Method Entry
    // =========================================================================

    /// Build the method entry and the parse state at bci 0.
    ///
    /// The map holds the incoming arguments in the first locals, top in
    /// every other local and stack slot, and a split memory state.
    pub fn entry_state(&mut self) -> Option<JvmsId> {
        let info = self.method_info(self.method)?;
        let params = info.signature.with_receiver(info.is_static());
        let tf = TypeFunc::new(&params, info.signature.ret);

        let mut fields = vec![
            Type::Control,
            Type::Abio,
            Type::Memory,
            Type::RawPtr,
            Type::ReturnAddress,
        ];
        fields.extend(tf.domain.iter().cloned());
        let root = self.root();
        let start = self.graph.add_node(
            NodeKind::Start,
            Type::Tuple(fields.into_boxed_slice()),
            &[None, Some(root)],
        );
        self.graph.init_req(start, 0, Some(start));

        let max_locals = (info.max_locals as u32).max(tf.arg_slots() as u32);
        let j = self
            .jvms
            .new_method_state(self.method, None, max_locals, info.max_stack as u32);
        {
            let state = self.jvms.get_mut(j);
            state.set_bci(0);
            state.set_reexecute(Reexecute::Undefined);
        }
        let size = self.jvms.get(j).endoff() as usize;
        let map = self.graph.make_safepoint(size, j);
        self.jvms.bind_map(&mut self.graph, j, map);

        let ctrl = self.graph.make_proj(start, TypeFunc::CONTROL as u32, false, Type::Control);
        let io = self.graph.make_proj(start, TypeFunc::I_O as u32, false, Type::Abio);
        let mem = self.graph.make_proj(start, TypeFunc::MEMORY as u32, false, Type::Memory);
        let fp = self.graph.make_proj(start, TypeFunc::FRAME_PTR as u32, false, Type::RawPtr);
        let ra = self
            .graph
            .make_proj(start, TypeFunc::RETURN_ADR as u32, false, Type::ReturnAddress);
        let mm = self.graph.make_merge_mem(Some(mem));
        let top = self.top();
        let state: JvmState = *self.jvms.get(j);

        self.graph.set_req(map, TypeFunc::CONTROL, Some(ctrl));
        self.graph.set_req(map, TypeFunc::I_O, Some(io));
        self.graph.set_req(map, TypeFunc::MEMORY, Some(mm));
        self.graph.set_req(map, TypeFunc::FRAME_PTR, Some(fp));
        self.graph.set_req(map, TypeFunc::RETURN_ADR, Some(ra));
        for i in 0..state.loc_size() {
            let value = match tf.domain.get(i as usize) {
                Some(Type::Half) | None => top,
                Some(ty) => self.graph.make_proj(
                    start,
                    (TypeFunc::PARMS as u32) + i,
                    false,
                    ty.clone(),
                ),
            };
            self.graph.set_local(map, &state, i, Some(value));
        }
        for i in state.stkoff()..state.endoff() {
            self.graph.set_req(map, i as usize, Some(top));
        }
        tracing::debug!(method = %self.method, map = %map, "entry state");
        Some(j)
    }

    // =========================================================================
    // Debug Info Contract
    // =========================================================================

    /// Check that `call` can be handed to the debug-info writer: every
    /// frame's reexecute decision is made and every debug slot is filled.
    pub fn verify_debug_info(&self, call: NodeId) -> Result<(), Bailout> {
        let Some(j) = self.graph.node(call).jvms() else {
            return Ok(());
        };
        self.jvms
            .verify(j)
            .map_err(|e| Bailout::Invariant(e.to_string()))?;
        for frame in self.jvms.chain(j) {
            let s = self.jvms.get(frame);
            if s.is_reexecute_undefined() {
                return Err(Bailout::Invariant(format!(
                    "{} has an unresolved reexecute state at depth {}",
                    call,
                    s.depth()
                )));
            }
            if s.map() != Some(call) {
                return Err(Bailout::Invariant(format!(
                    "frame at depth {} of {} is not bound to it",
                    s.depth(),
                    call
                )));
            }
            for slot in s.locoff()..s.endoff() {
                if self.graph.input(call, slot as usize).is_none() {
                    return Err(Bailout::Invariant(format!(
                        "{} debug slot {} is empty",
                        call, slot
                    )));
                }
            }
        }
        if self.jvms.debug_start(j) + self.jvms.debug_depth(j) != self.graph.req(call) as u32 {
            return Err(Bailout::Invariant(format!(
                "{} debug info does not end at its last input",
                call
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
