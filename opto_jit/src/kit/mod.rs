//! Graph construction cursor.
//!
//! A [`GraphKit`] walks a JVM state forward while building nodes: it holds
//! the current map (a safepoint whose inputs are the frame's control, io,
//! memory, locals, stack and monitors), the stack pointer, and the list of
//! exceptional states raised so far. Generators receive a JVM state, build
//! on it through a kit, and hand back the exit state with its exception
//! states chained on the map.
//!
//! # Stack Pointer
//!
//! The kit's `sp` and the JVM state's `sp` are separate. Arguments of the
//! call being generated live just above the state's `sp` and are read with
//! [`GraphKit::argument`]; the kit's `sp` is written back into the state by
//! [`GraphKit::sync_jvms`] whenever debug info is taken.
//!
//! # Submodules
//!
//! - **guards**: null checks, receiver class checks, uncommon traps
//! - **calls**: argument and debug-info wiring of Java calls, call
//!   replacement
//! - **exceptions**: exception-state bookkeeping

mod calls;
mod exceptions;
mod guards;

use crate::ci::{MethodId, MethodInfo};
use crate::compile::Compile;
use crate::ir::node::NodeId;
use crate::ir::operators::NodeKind;
use crate::ir::types::{AdrType, BasicType, Type, TypeFunc, ALIAS_IDX_BOT};
use crate::jvms::{JvmState, JvmsId};

use std::sync::Arc;

/// Saved cursor position, restored by [`GraphKit::restore`].
#[derive(Debug, Clone, Copy)]
#[must_use = "a preserved state must be restored"]
pub struct Preserved {
    map: Option<NodeId>,
    jvms: JvmsId,
    sp: u32,
}

// =============================================================================
// GraphKit
// =============================================================================

/// Cursor over one JVM state.
pub struct GraphKit<'c> {
    pub c: &'c mut Compile,
    jvms: JvmsId,
    map: Option<NodeId>,
    sp: u32,
    exceptions: Vec<NodeId>,
}

impl<'c> GraphKit<'c> {
    /// Start building at `jvms`, taking over the exception states chained
    /// on its map.
    pub fn new(c: &'c mut Compile, jvms: JvmsId) -> Self {
        let state = *c.jvms.get(jvms);
        let map = state.map();
        let mut exceptions = Vec::new();
        if let Some(m) = map {
            debug_assert_eq!(c.graph.sfpt(m).jvms, Some(jvms), "map and state out of sync");
            let mut next = c.graph.sfpt_mut(m).next_exception.take();
            while let Some(ex) = next {
                exceptions.push(ex);
                next = c.graph.sfpt_mut(ex).next_exception.take();
            }
        }
        GraphKit {
            c,
            jvms,
            map,
            sp: state.sp(),
            exceptions,
        }
    }

    // =========================================================================
    // State
    // =========================================================================

    #[inline]
    pub fn jvms(&self) -> JvmsId {
        self.jvms
    }

    /// Copy of the current frame.
    #[inline]
    pub fn state(&self) -> JvmState {
        *self.c.jvms.get(self.jvms)
    }

    #[inline]
    pub fn map(&self) -> Option<NodeId> {
        self.map
    }

    /// The current map.
    ///
    /// # Panics
    ///
    /// If the kit has stopped.
    #[track_caller]
    pub fn map_not_null(&self) -> NodeId {
        match self.map {
            Some(m) => m,
            None => panic!("graph kit has no map"),
        }
    }

    pub fn method(&self) -> Option<MethodId> {
        self.state().method()
    }

    pub fn bci(&self) -> i32 {
        self.state().bci()
    }

    /// Metadata of the method being parsed at this frame.
    pub fn method_info(&self) -> Option<Arc<MethodInfo>> {
        self.method().and_then(|m| self.c.oracle().method(m))
    }

    /// Slot count of the arguments as declared at the current call site.
    pub fn declared_arg_size(&self, callee: &MethodInfo) -> u32 {
        let site = self
            .method()
            .zip(u32::try_from(self.bci()).ok())
            .and_then(|(m, bci)| self.c.oracle().call_site(m, bci));
        let Some(site) = site else {
            return callee.arg_size() as u32;
        };
        let Some(declared) = self.c.oracle().method(site.callee) else {
            return callee.arg_size() as u32;
        };
        match &site.declared_signature {
            Some(sig) => sig.arg_size(declared.is_static()) as u32,
            None => declared.arg_size() as u32,
        }
    }

    /// Replace the map. The JVM state follows the new map.
    pub fn set_map(&mut self, map: Option<NodeId>) {
        self.map = map;
        if let Some(m) = map {
            if let Some(j) = self.c.graph.sfpt(m).jvms {
                self.jvms = j;
            }
        }
    }

    /// Move the cursor to `jvms` and its map.
    pub fn set_jvms(&mut self, jvms: JvmsId) {
        let state = *self.c.jvms.get(jvms);
        self.jvms = jvms;
        self.map = state.map();
        self.sp = state.sp();
    }

    /// Write the kit's stack pointer into the JVM state.
    pub fn sync_jvms(&mut self) -> JvmsId {
        self.c.jvms.get_mut(self.jvms).set_sp(self.sp);
        self.jvms
    }

    /// No map, or control is dead.
    pub fn stopped(&self) -> bool {
        match self.map {
            None => true,
            Some(m) => self.c.graph.control(m).map_or(true, |c| self.c.graph.is_top(c)),
        }
    }

    /// Give up the map.
    pub fn stop(&mut self) -> Option<NodeId> {
        self.map.take()
    }

    /// Give up the map and sever it from the graph.
    pub fn stop_and_kill_map(&mut self) {
        if let Some(dead) = self.stop() {
            self.c.graph.disconnect_inputs(dead);
        }
    }

    /// Copy of the map on a shallow copy of the JVM state, with its own
    /// split memory.
    pub fn clone_map(&mut self) -> Option<NodeId> {
        let map = self.map?;
        debug_assert_eq!(self.state().map(), Some(map), "map and state out of sync");
        let cj = self.c.clone_map(self.jvms)?;
        self.c.jvms.get(cj).map()
    }

    /// Save the cursor and continue on a copy of the map (or on no map).
    pub fn preserve(&mut self, clone: bool) -> Preserved {
        let saved = Preserved {
            map: self.map,
            jvms: self.jvms,
            sp: self.sp,
        };
        let next = if clone { self.clone_map() } else { None };
        self.set_map(next);
        saved
    }

    pub fn restore(&mut self, saved: Preserved) {
        self.map = saved.map;
        self.jvms = saved.jvms;
        self.sp = saved.sp;
    }

    // =========================================================================
    // Stack Pointer
    // =========================================================================

    #[inline]
    pub fn sp(&self) -> u32 {
        self.sp
    }

    pub fn set_sp(&mut self, sp: u32) {
        self.sp = sp;
    }

    pub fn inc_sp(&mut self, n: u32) {
        self.sp += n;
    }

    pub fn dec_sp(&mut self, n: u32) {
        debug_assert!(self.sp >= n, "stack underflow");
        self.sp -= n;
    }

    // =========================================================================
    // Fixed Slots
    // =========================================================================

    pub fn top(&self) -> NodeId {
        self.c.graph.top()
    }

    pub fn control(&self) -> NodeId {
        let map = self.map_not_null();
        self.c.graph.control(map).unwrap_or_else(|| self.top())
    }

    pub fn set_control(&mut self, ctrl: NodeId) {
        let map = self.map_not_null();
        self.c.graph.set_control(map, Some(ctrl));
    }

    pub fn i_o(&self) -> NodeId {
        let map = self.map_not_null();
        self.c.graph.i_o(map).unwrap_or_else(|| self.top())
    }

    pub fn set_i_o(&mut self, io: NodeId) {
        let map = self.map_not_null();
        self.c.graph.set_i_o(map, Some(io));
    }

    /// The whole memory state.
    pub fn memory(&self) -> NodeId {
        let map = self.map_not_null();
        self.c.graph.memory(map).unwrap_or_else(|| self.top())
    }

    /// Memory state for alias `alias`.
    pub fn memory_at(&self, alias: usize) -> NodeId {
        let mem = Some(self.memory());
        self.c.graph.memory_at(mem, alias).unwrap_or_else(|| self.top())
    }

    /// The split memory of the map.
    pub fn merged_memory(&self) -> NodeId {
        let mem = self.memory();
        debug_assert!(self.c.graph.node(mem).is_merge_mem(), "map memory must be split");
        mem
    }

    /// Hand out the memory state to a node that consumes all of it.
    pub fn reset_memory(&mut self) -> NodeId {
        self.memory()
    }

    /// Make `mem` the whole memory state.
    pub fn set_all_memory(&mut self, mem: NodeId) {
        let map = self.map_not_null();
        let mm = self.c.graph.make_merge_mem(Some(mem));
        self.c.graph.set_memory(map, Some(mm));
    }

    /// Memory continues from `call`'s memory projection.
    pub fn set_all_memory_call(&mut self, call: NodeId, separate_io_proj: bool) {
        let mem = self
            .c
            .graph
            .make_proj(call, TypeFunc::MEMORY as u32, separate_io_proj, Type::Memory);
        self.set_all_memory(mem);
    }

    pub fn frameptr(&self) -> NodeId {
        let map = self.map_not_null();
        self.c.graph.input(map, TypeFunc::FRAME_PTR).unwrap_or_else(|| self.top())
    }

    pub fn returnadr(&self) -> NodeId {
        let map = self.map_not_null();
        self.c.graph.input(map, TypeFunc::RETURN_ADR).unwrap_or_else(|| self.top())
    }

    // =========================================================================
    // Locals, Stack and Arguments
    // =========================================================================

    pub fn local(&self, i: u32) -> NodeId {
        let state = self.state();
        self.c
            .graph
            .local(self.map_not_null(), &state, i)
            .unwrap_or_else(|| self.top())
    }

    pub fn set_local(&mut self, i: u32, v: NodeId) {
        let state = self.state();
        let map = self.map_not_null();
        self.c.graph.set_local(map, &state, i, Some(v));
    }

    pub fn push(&mut self, n: NodeId) {
        let map = self.map_not_null();
        let state = self.state();
        debug_assert!(self.sp < state.stk_size(), "stack overflow");
        self.c.graph.set_stack(map, &state, self.sp, Some(n));
        self.sp += 1;
    }

    pub fn pop(&mut self) -> NodeId {
        let map = self.map_not_null();
        let state = self.state();
        self.dec_sp(1);
        self.c
            .graph
            .stack(map, &state, self.sp)
            .unwrap_or_else(|| self.top())
    }

    /// Push a two-slot value: the value, then top.
    pub fn push_pair(&mut self, n: NodeId) {
        self.push(n);
        let top = self.top();
        self.push(top);
    }

    pub fn pop_pair(&mut self) -> NodeId {
        self.pop();
        self.pop()
    }

    /// Push a value of basic type `bt`; void pushes nothing.
    pub fn push_node(&mut self, bt: BasicType, n: NodeId) {
        match bt.size() {
            0 => {}
            1 => self.push(n),
            _ => self.push_pair(n),
        }
    }

    pub fn pop_node(&mut self, bt: BasicType) -> NodeId {
        match bt.size() {
            0 => self.top(),
            1 => self.pop(),
            _ => self.pop_pair(),
        }
    }

    /// Argument `i` of the call being generated.
    pub fn argument(&self, i: u32) -> NodeId {
        let state = self.state();
        self.c
            .graph
            .argument(self.map_not_null(), &state, i)
            .unwrap_or_else(|| self.top())
    }

    pub fn set_argument(&mut self, i: u32, v: NodeId) {
        let state = self.state();
        let map = self.map_not_null();
        self.c.graph.set_argument(map, &state, i, Some(v));
    }

    /// Use `new` wherever the frame held `old`, and remember the
    /// substitution for the caller.
    pub fn replace_in_map(&mut self, old: NodeId, new: NodeId) {
        if old == new {
            return;
        }
        let map = self.map_not_null();
        self.c.graph.replace_edge(map, old, Some(new));
        self.c.graph.sfpt_mut(map).replaced_nodes.record(old, new);
    }

    // =========================================================================
    // Node Helpers
    // =========================================================================

    #[inline]
    pub fn ty(&self, n: NodeId) -> Type {
        self.c.graph.ty(n).clone()
    }

    #[inline]
    pub fn transform(&mut self, n: NodeId) -> NodeId {
        self.c.graph.transform(n)
    }

    pub fn intcon(&mut self, v: i32) -> NodeId {
        self.c.graph.intcon(v)
    }

    pub fn makecon(&mut self, ty: Type) -> NodeId {
        self.c.graph.makecon(ty)
    }

    /// Build and value-number a node.
    pub fn make(&mut self, kind: NodeKind, ty: Type, inputs: &[Option<NodeId>]) -> NodeId {
        let n = self.c.graph.add_node(kind, ty, inputs);
        self.c.graph.transform(n)
    }

    // =========================================================================
    // Method Exit
    // =========================================================================

    /// Return `value` (or nothing) from the method and stop.
    pub fn return_current(&mut self, value: Option<NodeId>) -> NodeId {
        let mut inputs = vec![
            Some(self.control()),
            Some(self.i_o()),
            Some(self.reset_memory()),
            Some(self.frameptr()),
            Some(self.returnadr()),
        ];
        if let Some(v) = value {
            inputs.push(Some(v));
        }
        let ret = self.c.graph.add_node(NodeKind::Return, Type::Control, &inputs);
        let root = self.c.root();
        self.c.graph.add_req(root, Some(ret));
        self.stop();
        ret
    }

    // =========================================================================
    // Path Merging
    // =========================================================================

    /// Join the current path with the paths ending in `others`.
    ///
    /// A region collects the controls; io, memory slices and every frame
    /// slot that differs between the paths get a phi. Unused stack slots
    /// above the current stack pointer are skipped.
    pub fn merge_paths(&mut self, others: &[NodeId]) {
        if others.is_empty() {
            return;
        }
        let map = self.map_not_null();
        let mut paths = Vec::with_capacity(others.len() + 1);
        paths.push(map);
        paths.extend_from_slice(others);

        let preds: Vec<Option<NodeId>> = paths.iter().map(|&m| self.c.graph.control(m)).collect();
        let region = self.c.graph.make_region(&preds);
        self.set_control(region);

        let io: Vec<Option<NodeId>> = paths.iter().map(|&m| self.c.graph.i_o(m)).collect();
        if let Some(phi) = self.merge_values(region, Type::Abio, None, &io) {
            self.set_i_o(phi);
        }
        self.merge_memory(region, &paths);

        let state = self.state();
        let tos = state.stkoff() + self.sp;
        let limit = paths
            .iter()
            .map(|&m| self.c.graph.req(m))
            .min()
            .unwrap_or(0) as u32;
        let mut i = TypeFunc::PARMS as u32;
        while i < limit {
            if i == tos {
                i = state.monoff();
                if i >= limit {
                    break;
                }
            }
            let values: Vec<Option<NodeId>> = paths
                .iter()
                .map(|&m| self.c.graph.input(m, i as usize))
                .collect();
            let ty = self.meet_types(&values);
            if let Some(phi) = self.merge_values(region, ty, None, &values) {
                self.c.graph.set_req(map, i as usize, Some(phi));
            }
            i += 1;
        }
        tracing::trace!(region = %region, paths = paths.len(), "merged paths");
    }

    fn meet_types(&self, values: &[Option<NodeId>]) -> Type {
        values
            .iter()
            .flatten()
            .map(|&v| self.c.graph.ty(v).clone())
            .reduce(|a, b| a.meet(&b))
            .unwrap_or(Type::Top)
    }

    /// A phi of `values` at `region`, or `None` if they are all the same.
    fn merge_values(
        &mut self,
        region: NodeId,
        ty: Type,
        adr: Option<AdrType>,
        values: &[Option<NodeId>],
    ) -> Option<NodeId> {
        if values.windows(2).all(|w| w[0] == w[1]) {
            return None;
        }
        let phi = self.c.graph.make_phi(region, ty, adr, values);
        self.c.record_for_igvn(phi);
        Some(phi)
    }

    /// Merge the memory states of `paths` (the first is the current map)
    /// slice by slice into the current map's split memory.
    fn merge_memory(&mut self, region: NodeId, paths: &[NodeId]) {
        let mine = self.merged_memory();
        let mems: Vec<Option<NodeId>> = paths.iter().map(|&m| self.c.graph.memory(m)).collect();

        let mut aliases = Vec::new();
        for mem in mems.iter().flatten() {
            if self.c.graph.node(*mem).is_merge_mem() {
                for (alias, _) in self.c.graph.mm_slices(*mem) {
                    if !aliases.contains(&alias) {
                        aliases.push(alias);
                    }
                }
            }
        }
        aliases.sort_unstable();

        let bases: Vec<Option<NodeId>> = mems
            .iter()
            .map(|&m| self.c.graph.memory_at(m, ALIAS_IDX_BOT))
            .collect();
        let slices: Vec<(usize, Vec<Option<NodeId>>)> = aliases
            .into_iter()
            .map(|alias| {
                let values = mems.iter().map(|&m| self.c.graph.memory_at(m, alias)).collect();
                (alias, values)
            })
            .collect();

        if let Some(phi) = self.merge_values(region, Type::Memory, Some(AdrType::Bottom), &bases) {
            self.c.graph.mm_set_memory_at(mine, ALIAS_IDX_BOT, Some(phi));
        }
        for (alias, values) in slices {
            if values == bases {
                continue;
            }
            let adr = self.c.alias.adr_type(alias).cloned();
            let merged = match self.merge_values(region, Type::Memory, adr, &values) {
                Some(phi) => Some(phi),
                None => values[0],
            };
            self.c.graph.mm_set_memory_at(mine, alias, merged);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
