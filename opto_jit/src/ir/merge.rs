//! Merge points: regions, phis and split memory.
//!
//! # MergeMem Layout
//!
//! ```text
//!   slot 0                 unused (no control)
//!   slot ALIAS_IDX_TOP     the empty-memory sentinel (top)
//!   slot ALIAS_IDX_BOT     base memory: every slice not listed below
//!   slot ALIAS_IDX_RAW..   per-alias slices; top means "same as base"
//! ```
//!
//! A MergeMem whose base is the empty-memory sentinel only shows up on a
//! dead path.

use super::graph::Graph;
use super::node::NodeId;
use super::operators::NodeKind;
use super::types::{AdrType, Type, ALIAS_IDX_BOT, ALIAS_IDX_RAW, ALIAS_IDX_TOP};

impl Graph {
    // =========================================================================
    // Regions and Phis
    // =========================================================================

    /// A region with `preds` control inputs (slots 1..), self at slot 0.
    pub fn make_region(&mut self, preds: &[Option<NodeId>]) -> NodeId {
        let mut inputs = Vec::with_capacity(preds.len() + 1);
        inputs.push(None);
        inputs.extend_from_slice(preds);
        let r = self.add_node(NodeKind::Region, Type::Control, &inputs);
        self.init_req(r, 0, Some(r));
        r
    }

    /// A phi at `region` merging `values` (one per region predecessor).
    pub fn make_phi(
        &mut self,
        region: NodeId,
        ty: Type,
        adr: Option<AdrType>,
        values: &[Option<NodeId>],
    ) -> NodeId {
        let mut inputs = Vec::with_capacity(values.len() + 1);
        inputs.push(Some(region));
        inputs.extend_from_slice(values);
        self.add_node(NodeKind::Phi { adr }, ty, &inputs)
    }

    // =========================================================================
    // MergeMem
    // =========================================================================

    /// The empty-memory sentinel.
    #[inline]
    pub fn empty_memory(&self) -> NodeId {
        self.top()
    }

    /// Split view of memory state `mem`.
    ///
    /// A MergeMem input is flattened: its base and slices are copied.
    pub fn make_merge_mem(&mut self, mem: Option<NodeId>) -> NodeId {
        let empty = self.empty_memory();
        let (base, slices) = match mem {
            Some(m) if self.node(m).is_merge_mem() => (self.mm_base(m), self.mm_slices(m)),
            other => (other, Vec::new()),
        };
        let mm = self.add_node(NodeKind::MergeMem, Type::Memory, &[None, Some(empty), base]);
        for (alias, slice) in slices {
            self.mm_set_memory_at(mm, alias, Some(slice));
        }
        mm
    }

    /// Base memory of a MergeMem.
    #[inline]
    pub fn mm_base(&self, mm: NodeId) -> Option<NodeId> {
        self.input(mm, ALIAS_IDX_BOT)
    }

    /// Whether the MergeMem's base is the empty-memory sentinel.
    pub fn mm_base_is_empty(&self, mm: NodeId) -> bool {
        self.is_top_or_null(self.mm_base(mm))
    }

    /// Memory state for alias `alias`.
    pub fn mm_memory_at(&self, mm: NodeId, alias: usize) -> Option<NodeId> {
        if alias >= ALIAS_IDX_RAW && alias < self.req(mm) {
            let slice = self.input(mm, alias);
            if slice.is_some() && slice != Some(self.empty_memory()) {
                return slice;
            }
        }
        self.mm_base(mm)
    }

    /// Set the memory state for `alias`; setting it to the base collapses
    /// the slice back to the default.
    pub fn mm_set_memory_at(&mut self, mm: NodeId, alias: usize, mem: Option<NodeId>) {
        debug_assert!(alias >= ALIAS_IDX_TOP, "bad alias index");
        if alias == ALIAS_IDX_BOT {
            self.set_req(mm, ALIAS_IDX_BOT, mem);
            return;
        }
        let empty = self.empty_memory();
        let mem = if mem == self.mm_base(mm) { Some(empty) } else { mem };
        if self.req(mm) <= alias {
            if mem == Some(empty) {
                return;
            }
            while self.req(mm) <= alias {
                self.add_req(mm, Some(empty));
            }
        }
        self.set_req(mm, alias, mem);
    }

    /// Non-default slices as `(alias, memory)` pairs.
    pub fn mm_slices(&self, mm: NodeId) -> Vec<(usize, NodeId)> {
        let empty = self.empty_memory();
        (ALIAS_IDX_RAW..self.req(mm))
            .filter_map(|alias| {
                self.input(mm, alias)
                    .filter(|&s| s != empty)
                    .map(|s| (alias, s))
            })
            .collect()
    }

    /// Memory state for alias `alias` of any memory node.
    pub fn memory_at(&self, mem: Option<NodeId>, alias: usize) -> Option<NodeId> {
        match mem {
            Some(m) if self.node(m).is_merge_mem() => self.mm_memory_at(m, alias),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mem_state(g: &mut Graph) -> NodeId {
        let root = g.root();
        g.add_node(NodeKind::Opaque, Type::Memory, &[Some(root)])
    }

    #[test]
    fn test_merge_mem_defaults_to_base() {
        let mut g = Graph::new();
        let base = mem_state(&mut g);
        let mm = g.make_merge_mem(Some(base));
        assert_eq!(g.mm_base(mm), Some(base));
        assert_eq!(g.mm_memory_at(mm, 7), Some(base));
        assert!(!g.mm_base_is_empty(mm));
        assert!(g.mm_slices(mm).is_empty());
    }

    #[test]
    fn test_merge_mem_slice_set_and_collapse() {
        let mut g = Graph::new();
        let base = mem_state(&mut g);
        let raw = mem_state(&mut g);
        let mm = g.make_merge_mem(Some(base));
        g.mm_set_memory_at(mm, 5, Some(raw));
        assert_eq!(g.req(mm), 6);
        assert_eq!(g.mm_memory_at(mm, 5), Some(raw));
        assert_eq!(g.mm_memory_at(mm, 4), Some(base));
        assert_eq!(g.mm_slices(mm), vec![(5, raw)]);
        g.mm_set_memory_at(mm, 5, Some(base));
        assert!(g.mm_slices(mm).is_empty());
        assert!(g.verify().is_ok());
    }

    #[test]
    fn test_merge_mem_flattens() {
        let mut g = Graph::new();
        let base = mem_state(&mut g);
        let raw = mem_state(&mut g);
        let inner = g.make_merge_mem(Some(base));
        g.mm_set_memory_at(inner, ALIAS_IDX_RAW, Some(raw));
        let outer = g.make_merge_mem(Some(inner));
        assert_eq!(g.mm_base(outer), Some(base));
        assert_eq!(g.mm_memory_at(outer, ALIAS_IDX_RAW), Some(raw));
    }

    #[test]
    fn test_empty_base_detected() {
        let mut g = Graph::new();
        let top = g.top();
        let mm = g.make_merge_mem(Some(top));
        assert!(g.mm_base_is_empty(mm));
    }

    #[test]
    fn test_region_self_edge() {
        let mut g = Graph::new();
        let root = g.root();
        let r = g.make_region(&[Some(root), None]);
        assert_eq!(g.input(r, 0), Some(r));
        assert_eq!(g.req(r), 3);
        assert!(!g.is_dead(r));
    }
}
