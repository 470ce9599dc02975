//! Safepoint payload and the map slot accessors.
//!
//! A safepoint (or call) node's inputs are laid out as
//!
//! ```text
//!   0 ctrl | 1 i_o | 2 memory | 3 frameptr | 4 returnadr | 5.. debug info
//! ```
//!
//! where the debug info region is described by the node's [`JvmState`].
//! The accessors here take the state by reference so callers can hold
//! the JVM state arena and the graph separately.

use smallvec::SmallVec;

use super::{JvmState, JvmsId, MONITOR_EDGES};
use crate::ir::graph::Graph;
use crate::ir::node::NodeId;
use crate::ir::operators::NodeKind;
use crate::ir::types::{AdrType, Type, TypeFunc};

// =============================================================================
// Replaced Nodes
// =============================================================================

/// Nodes of a map replaced by improved versions (e.g. a value replaced by
/// its not-null cast) while parsing a callee, so the improvement can be
/// carried back into the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplacedNodes {
    pairs: SmallVec<[(NodeId, NodeId); 2]>,
}

impl ReplacedNodes {
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// Remember that `initial` was replaced by `improved`.
    pub fn record(&mut self, initial: NodeId, improved: NodeId) {
        if !self.pairs.contains(&(initial, improved)) {
            self.pairs.push((initial, improved));
        }
    }

    /// Add every replacement of `other`.
    pub fn transfer_from(&mut self, other: &ReplacedNodes) {
        for &(a, b) in &other.pairs {
            self.record(a, b);
        }
    }

    /// Keep only replacements both paths agree on.
    pub fn merge_with(&mut self, other: &ReplacedNodes) {
        self.pairs.retain(|p| other.pairs.contains(p));
    }

    pub fn reset(&mut self) {
        self.pairs.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, NodeId)> + '_ {
        self.pairs.iter().copied()
    }
}

// =============================================================================
// Safepoint Data
// =============================================================================

/// Payload of a safepoint or call node.
#[derive(Debug, Clone)]
pub struct SafePointData {
    /// Youngest frame of the attached state chain; leaf runtime calls
    /// have none.
    pub jvms: Option<JvmsId>,
    /// Memory a safepoint observes.
    pub adr_type: AdrType,
    /// Next map on a pending-exception list.
    pub next_exception: Option<NodeId>,
    pub replaced_nodes: ReplacedNodes,
}

impl SafePointData {
    pub fn new(jvms: Option<JvmsId>) -> Self {
        SafePointData {
            jvms,
            adr_type: AdrType::Bottom,
            next_exception: None,
            replaced_nodes: ReplacedNodes::default(),
        }
    }
}

// =============================================================================
// Graph Accessors
// =============================================================================

impl Graph {
    /// A map of `size` inputs for frame `jvms`. The caller binds the state
    /// back to the node.
    pub fn make_safepoint(&mut self, size: usize, jvms: JvmsId) -> NodeId {
        let inputs = vec![None; size];
        self.add_node(
            NodeKind::SafePoint(Box::new(SafePointData::new(Some(jvms)))),
            Type::Control,
            &inputs,
        )
    }

    /// Payload of safepoint `n`.
    ///
    /// # Panics
    ///
    /// If `n` is not a safepoint or call.
    pub fn sfpt(&self, n: NodeId) -> &SafePointData {
        match self.node(n).as_safepoint() {
            Some(s) => s,
            None => panic!("{} is not a safepoint", n),
        }
    }

    pub fn sfpt_mut(&mut self, n: NodeId) -> &mut SafePointData {
        match self.node_mut(n).as_safepoint_mut() {
            Some(s) => s,
            None => panic!("safepoint payload requested of a non-safepoint"),
        }
    }

    // =========================================================================
    // Fixed Slots
    // =========================================================================

    #[inline]
    pub fn control(&self, map: NodeId) -> Option<NodeId> {
        self.input(map, TypeFunc::CONTROL)
    }

    #[inline]
    pub fn i_o(&self, map: NodeId) -> Option<NodeId> {
        self.input(map, TypeFunc::I_O)
    }

    #[inline]
    pub fn memory(&self, map: NodeId) -> Option<NodeId> {
        self.input(map, TypeFunc::MEMORY)
    }

    pub fn set_control(&mut self, map: NodeId, c: Option<NodeId>) {
        self.set_req(map, TypeFunc::CONTROL, c);
    }

    pub fn set_i_o(&mut self, map: NodeId, io: Option<NodeId>) {
        self.set_req(map, TypeFunc::I_O, io);
    }

    pub fn set_memory(&mut self, map: NodeId, mem: Option<NodeId>) {
        self.set_req(map, TypeFunc::MEMORY, mem);
    }

    // =========================================================================
    // Locals, Stack and Arguments
    // =========================================================================

    pub fn local(&self, map: NodeId, jvms: &JvmState, i: u32) -> Option<NodeId> {
        debug_assert!(i < jvms.loc_size(), "local {} out of range", i);
        self.input(map, (jvms.locoff() + i) as usize)
    }

    pub fn set_local(&mut self, map: NodeId, jvms: &JvmState, i: u32, v: Option<NodeId>) {
        debug_assert!(i < jvms.loc_size(), "local {} out of range", i);
        self.set_req(map, (jvms.locoff() + i) as usize, v);
    }

    pub fn stack(&self, map: NodeId, jvms: &JvmState, i: u32) -> Option<NodeId> {
        debug_assert!(i < jvms.stk_size(), "stack slot {} out of range", i);
        self.input(map, (jvms.stkoff() + i) as usize)
    }

    pub fn set_stack(&mut self, map: NodeId, jvms: &JvmState, i: u32, v: Option<NodeId>) {
        debug_assert!(i < jvms.stk_size(), "stack slot {} out of range", i);
        self.set_req(map, (jvms.stkoff() + i) as usize, v);
    }

    /// Argument `i` of the call about to be made: the slots just above `sp`.
    pub fn argument(&self, map: NodeId, jvms: &JvmState, i: u32) -> Option<NodeId> {
        self.input(map, (jvms.argoff() + i) as usize)
    }

    pub fn set_argument(&mut self, map: NodeId, jvms: &JvmState, i: u32, v: Option<NodeId>) {
        self.set_req(map, (jvms.argoff() + i) as usize, v);
    }

    // =========================================================================
    // Monitors
    // =========================================================================

    pub fn monitor_box(&self, map: NodeId, jvms: &JvmState, idx: u32) -> Option<NodeId> {
        debug_assert!(idx < jvms.nof_monitors(), "monitor {} out of range", idx);
        self.input(map, jvms.monitor_box_offset(idx) as usize)
    }

    pub fn monitor_obj(&self, map: NodeId, jvms: &JvmState, idx: u32) -> Option<NodeId> {
        debug_assert!(idx < jvms.nof_monitors(), "monitor {} out of range", idx);
        self.input(map, jvms.monitor_obj_offset(idx) as usize)
    }

    pub fn set_monitor_box(&mut self, map: NodeId, jvms: &JvmState, idx: u32, v: Option<NodeId>) {
        self.set_req(map, jvms.monitor_box_offset(idx) as usize, v);
    }

    pub fn set_monitor_obj(&mut self, map: NodeId, jvms: &JvmState, idx: u32, v: Option<NodeId>) {
        self.set_req(map, jvms.monitor_obj_offset(idx) as usize, v);
    }

    /// Append a monitor (box, locked object) after the existing ones.
    ///
    /// The map must end exactly at the frame's `endoff`.
    pub fn push_monitor(&mut self, map: NodeId, jvms: &mut JvmState, lock_box: NodeId, obj: NodeId) {
        debug_assert_eq!(self.req(map), jvms.endoff() as usize, "map must end at endoff");
        let next = jvms.scloff() as usize;
        self.ins_req(map, next, Some(lock_box));
        self.ins_req(map, next + 1, Some(obj));
        jvms.set_scloff(next as u32 + MONITOR_EDGES);
        jvms.set_endoff(self.req(map) as u32);
    }

    /// Drop the youngest monitor.
    pub fn pop_monitor(&mut self, map: NodeId, jvms: &mut JvmState) {
        debug_assert!(jvms.nof_monitors() > 0, "no monitor to pop");
        let mut scloff = jvms.scloff();
        let new_scloff = scloff - MONITOR_EDGES;
        jvms.set_scloff(new_scloff);
        jvms.set_endoff(jvms.endoff() - MONITOR_EDGES);
        while scloff > new_scloff {
            scloff -= 1;
            self.del_req_ordered(map, scloff as usize);
        }
    }

    pub fn peek_monitor_box(&self, map: NodeId, jvms: &JvmState) -> Option<NodeId> {
        let last = jvms.nof_monitors().checked_sub(1)?;
        self.monitor_box(map, jvms, last)
    }

    pub fn peek_monitor_obj(&self, map: NodeId, jvms: &JvmState) -> Option<NodeId> {
        let last = jvms.nof_monitors().checked_sub(1)?;
        self.monitor_obj(map, jvms, last)
    }

    // =========================================================================
    // Stack Growth
    // =========================================================================

    /// Insert `grow_by` top slots at the end of the stack region.
    pub fn grow_stack(&mut self, map: NodeId, jvms: &mut JvmState, grow_by: u32) {
        debug_assert!(grow_by > 0, "nothing to grow");
        debug_assert_eq!(self.req(map), jvms.endoff() as usize, "no other states after me");
        let top = self.top();
        let monoff = jvms.monoff();
        for _ in 0..grow_by {
            self.ins_req(map, monoff as usize, Some(top));
        }
        jvms.set_monoff(monoff + grow_by);
        jvms.set_scloff(jvms.scloff() + grow_by);
        jvms.set_endoff(jvms.endoff() + grow_by);
    }

    /// Make the stack region at least `stk_size` slots.
    pub fn ensure_stack(&mut self, map: NodeId, jvms: &mut JvmState, stk_size: u32) {
        let cur = jvms.stk_size();
        if stk_size > cur {
            self.grow_stack(map, jvms, stk_size - cur);
        }
    }

    // =========================================================================
    // Saved Exception Oop
    // =========================================================================

    /// Whether an exception map carries its thrown oop past `endoff`.
    pub fn has_saved_ex_oop(&self, map: NodeId, jvms: &JvmState) -> bool {
        self.req(map) == jvms.endoff() as usize + 1
    }

    pub fn set_saved_ex_oop(&mut self, map: NodeId, jvms: &JvmState, ex_oop: NodeId) {
        debug_assert!(!self.has_saved_ex_oop(map, jvms), "clear before setting again");
        self.add_req(map, Some(ex_oop));
    }

    pub fn saved_ex_oop(&self, map: NodeId, jvms: &JvmState) -> Option<NodeId> {
        if !self.has_saved_ex_oop(map, jvms) {
            return None;
        }
        self.input(map, self.req(map) - 1)
    }

    /// Remove and return the saved exception oop.
    pub fn clear_saved_ex_oop(&mut self, map: NodeId, jvms: &JvmState) -> Option<NodeId> {
        let ex = self.saved_ex_oop(map, jvms)?;
        let last = self.req(map) - 1;
        self.del_req(map, last);
        Some(ex)
    }

    // =========================================================================
    // Scalar-Replaced Objects
    // =========================================================================

    /// Describe `obj` by its field values in the scalar region of `sfpt`
    /// and redirect this frame's debug uses of `obj` to the description.
    pub fn add_scalar_object(
        &mut self,
        sfpt: NodeId,
        jvms: &mut JvmState,
        obj: NodeId,
        fields: &[NodeId],
    ) -> NodeId {
        let first_index = self.req(sfpt) as u32 - jvms.scloff();
        let root = self.root();
        let ty = self.ty(obj).clone();
        let sobj = self.add_node(
            NodeKind::ScalarObject {
                first_index,
                n_fields: fields.len() as u32,
            },
            ty,
            &[Some(root)],
        );
        for &f in fields {
            self.add_req(sfpt, Some(f));
        }
        jvms.set_endoff(self.req(sfpt) as u32);
        self.replace_edges_in_range(
            sfpt,
            obj,
            Some(sobj),
            jvms.locoff() as usize,
            jvms.scloff() as usize,
        );
        sobj
    }

    // =========================================================================
    // Replaced Nodes
    // =========================================================================

    /// Apply the map's recorded replacements to its own inputs.
    pub fn apply_replaced_nodes(&mut self, map: NodeId) {
        let pairs: SmallVec<[(NodeId, NodeId); 2]> = self.sfpt(map).replaced_nodes.iter().collect();
        for (initial, improved) in pairs {
            if self.contains(initial) && self.contains(improved) {
                self.replace_edge(map, initial, Some(improved));
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ci::MethodId;
    use crate::jvms::JvmsArena;

    /// A bound map for a frame with `locals` and `stack` slots, every
    /// slot set to top.
    fn frame(g: &mut Graph, arena: &mut JvmsArena, locals: u32, stack: u32) -> (NodeId, JvmsId) {
        let j = arena.new_method_state(MethodId(0), None, locals, stack);
        let size = arena.get(j).endoff() as usize;
        let map = g.make_safepoint(size, j);
        let top = g.top();
        for i in 0..size {
            g.set_req(map, i, Some(top));
        }
        arena.bind_map(g, j, map);
        (map, j)
    }

    #[test]
    fn test_monitor_round_trip() {
        let mut g = Graph::new();
        let mut arena = JvmsArena::new();
        let (map, j) = frame(&mut g, &mut arena, 2, 1);
        let lock_box = g.intcon(1);
        let obj = g.null_con();

        let mut s = *arena.get(j);
        g.push_monitor(map, &mut s, lock_box, obj);
        assert_eq!(s.nof_monitors(), 1);
        assert_eq!(g.peek_monitor_box(map, &s), Some(lock_box));
        assert_eq!(g.peek_monitor_obj(map, &s), Some(obj));
        assert!(s.partition_ok());

        g.pop_monitor(map, &mut s);
        assert_eq!(s.nof_monitors(), 0);
        assert_eq!(g.req(map), s.endoff() as usize);
        assert_eq!(g.outcnt(lock_box), 0);
        assert!(g.verify().is_ok());
    }

    #[test]
    fn test_apply_replaced_nodes() {
        let mut g = Graph::new();
        let mut arena = JvmsArena::new();
        let (map, j) = frame(&mut g, &mut arena, 2, 0);
        let s = *arena.get(j);
        let initial = g.intcon(3);
        let improved = g.intcon(4);
        g.set_local(map, &s, 0, Some(initial));
        g.set_local(map, &s, 1, Some(initial));

        g.sfpt_mut(map).replaced_nodes.record(initial, improved);
        g.apply_replaced_nodes(map);

        assert_eq!(g.local(map, &s, 0), Some(improved));
        assert_eq!(g.local(map, &s, 1), Some(improved));
        assert_eq!(g.outcnt(initial), 0);
        assert!(g.verify().is_ok());
    }

    #[test]
    fn test_push_monitor_keeps_scalar_region() {
        let mut g = Graph::new();
        let mut arena = JvmsArena::new();
        let (map, j) = frame(&mut g, &mut arena, 1, 1);
        let mut s = *arena.get(j);
        let field = g.intcon(42);
        g.add_req(map, Some(field));
        s.set_endoff(g.req(map) as u32);

        let (b, o) = (g.intcon(1), g.intcon(2));
        g.push_monitor(map, &mut s, b, o);
        assert_eq!(s.scl_size(), 1);
        assert_eq!(g.input(map, s.scloff() as usize), Some(field));
    }

    #[test]
    fn test_arguments_sit_above_sp() {
        let mut g = Graph::new();
        let mut arena = JvmsArena::new();
        let (map, j) = frame(&mut g, &mut arena, 1, 3);
        let mut s = *arena.get(j);
        s.set_sp(1);
        let a = g.intcon(5);
        g.set_argument(map, &s, 0, Some(a));
        assert_eq!(g.stack(map, &s, 1), Some(a));
        assert_eq!(g.argument(map, &s, 0), Some(a));
    }

    #[test]
    fn test_ensure_stack_grows_with_top() {
        let mut g = Graph::new();
        let mut arena = JvmsArena::new();
        let (map, j) = frame(&mut g, &mut arena, 2, 1);
        let mut s = *arena.get(j);
        g.ensure_stack(map, &mut s, 4);
        assert_eq!(s.stk_size(), 4);
        assert_eq!(g.req(map), s.endoff() as usize);
        assert!(g.is_top_or_null(g.stack(map, &s, 3)));
        g.ensure_stack(map, &mut s, 2);
        assert_eq!(s.stk_size(), 4);
    }

    #[test]
    fn test_saved_ex_oop() {
        let mut g = Graph::new();
        let mut arena = JvmsArena::new();
        let (map, j) = frame(&mut g, &mut arena, 1, 1);
        let s = *arena.get(j);
        let ex = g.null_con();
        assert!(!g.has_saved_ex_oop(map, &s));
        g.set_saved_ex_oop(map, &s, ex);
        assert_eq!(g.saved_ex_oop(map, &s), Some(ex));
        assert_eq!(g.clear_saved_ex_oop(map, &s), Some(ex));
        assert_eq!(g.req(map), s.endoff() as usize);
    }

    #[test]
    fn test_add_scalar_object_redirects_debug_uses() {
        let mut g = Graph::new();
        let mut arena = JvmsArena::new();
        let (map, j) = frame(&mut g, &mut arena, 2, 0);
        let mut s = *arena.get(j);
        let obj = g.null_con();
        g.set_local(map, &s, 1, Some(obj));
        let f = g.intcon(9);
        let sobj = g.add_scalar_object(map, &mut s, obj, &[f]);
        assert_eq!(g.local(map, &s, 1), Some(sobj));
        assert_eq!(s.scl_size(), 1);
        assert!(matches!(
            g.kind(sobj),
            NodeKind::ScalarObject { first_index: 0, n_fields: 1 }
        ));
    }

    #[test]
    fn test_replaced_nodes_merge() {
        let mut g = Graph::new();
        let (a, b, c) = (g.intcon(1), g.intcon(2), g.intcon(3));
        let mut x = ReplacedNodes::default();
        x.record(a, b);
        x.record(a, c);
        x.record(a, b);
        assert_eq!(x.len(), 2);
        let mut y = ReplacedNodes::default();
        y.record(a, c);
        x.merge_with(&y);
        assert_eq!(x.iter().collect::<Vec<_>>(), vec![(a, c)]);
    }
}
