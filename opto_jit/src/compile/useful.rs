//! Dead-code removal by reachability.
//!
//! A node is useful if it is reachable from the root by walking inputs
//! (precedence edges included). Everything else is dead: its index is
//! recorded, the use edges that point into the dead region from useful
//! nodes are dropped, every compile-wide list is pruned, and the dead
//! nodes are freed.

use crate::ir::node::NodeId;
use crate::ir::worklist::UniqueNodeList;

use super::Compile;

impl Compile {
    /// Breadth-first closure of the root (and top) over input edges.
    pub fn identify_useful_nodes(&self) -> UniqueNodeList {
        let mut useful = UniqueNodeList::new();
        useful.push(self.graph.root());
        useful.push(self.graph.top());

        let mut next = 0;
        while next < useful.len() {
            let n = useful.at(next);
            next += 1;
            for m in self.graph.node(n).inputs().iter().flatten() {
                useful.push(*m);
            }
        }
        useful
    }

    /// Record every index below `unique()` that is not useful as dead.
    pub fn update_dead_node_list(&mut self, useful: &UniqueNodeList) {
        for idx in 0..self.graph.unique() {
            if !useful.member_idx(idx) {
                self.graph.record_dead_node(idx);
            }
        }
    }

    /// Remove everything unreachable from the root.
    ///
    /// Returns the number of nodes freed.
    pub fn remove_useless_nodes(&mut self) -> usize {
        let useful = self.identify_useful_nodes();
        self.remove_useless_nodes_with(&useful)
    }

    /// Remove everything outside `useful`, visiting it in list order.
    pub(crate) fn remove_useless_nodes_with(&mut self, useful: &UniqueNodeList) -> usize {
        self.update_dead_node_list(useful);
        self.igvn_worklist.remove_useless_nodes(useful.member_set());
        self.disconnect_useless_nodes(useful);

        let freed = self.graph.reclaim_unreachable(useful.member_set());
        tracing::debug!(
            freed,
            live = self.graph.live_nodes(),
            "removed useless nodes"
        );
        freed
    }

    /// Cut every use edge that leads from a useful node into the dead
    /// region, then prune the compile-wide lists.
    fn disconnect_useless_nodes(&mut self, useful: &UniqueNodeList) {
        for next in 0..useful.len() {
            let n = useful.at(next);
            if let Some(sfpt) = self.graph.node_mut(n).as_safepoint_mut() {
                // Replacements recorded while parsing are stale past this
                // point.
                sfpt.replaced_nodes.reset();
            }
            let mut j = 0;
            while j < self.graph.outcnt(n) {
                let child = self.graph.outs(n)[j];
                if useful.member(child) {
                    j += 1;
                } else {
                    self.graph.raw_del_out(n, j);
                }
            }
            if self.graph.outcnt(n) == 1 && self.graph.has_special_unique_user(n) {
                if let Some(u) = self.graph.unique_out(n) {
                    self.igvn_worklist.push(u);
                }
            }
        }

        let set = useful.member_set();
        self.macro_nodes.remove_useless_nodes(set);
        self.expensive_nodes.remove_useless_nodes(set);
        self.parked_calls.remove_useless_nodes(set);
        Self::remove_useless_late_inlines(&mut self.late_inlines, useful);
        Self::remove_useless_late_inlines(&mut self.string_late_inlines, useful);
        Self::remove_useless_late_inlines(&mut self.boxing_late_inlines, useful);
        self.late_inlines_pos = self.late_inlines_pos.min(self.late_inlines.len());

        let dead_calls: Vec<NodeId> = self
            .call_generators
            .keys()
            .copied()
            .filter(|c| !useful.member(*c))
            .collect();
        for call in dead_calls {
            self.take_generator(call);
        }
    }

    /// Keep only the entries whose call is useful, in their original order.
    pub(crate) fn remove_useless_late_inlines(inlines: &mut Vec<NodeId>, useful: &UniqueNodeList) {
        inlines.retain(|c| useful.member(*c));
    }

    /// Forget a node that has just died.
    ///
    /// Constants are not counted dead: a later rewrite may find them
    /// again through the value-numbering table.
    pub fn remove_useless_node(&mut self, dead: NodeId) {
        if !self.graph.node(dead).is_con() {
            self.graph.record_dead_node(dead.as_usize());
        }
        self.forget_node(dead);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ci::{MethodId, MethodRegistry};
    use crate::compile::CompileOptions;
    use crate::inline::CallGenerator;
    use crate::ir::operators::NodeKind;
    use crate::ir::types::{BasicType, Type, TypeFunc};
    use std::sync::Arc;

    fn compile() -> Compile {
        Compile::new(Arc::new(MethodRegistry::new()), MethodId(0), CompileOptions::default())
    }

    #[test]
    fn test_unreachable_nodes_are_freed() {
        let mut c = compile();
        let root = c.root();
        let live = c.graph.add_node(NodeKind::Halt, Type::Control, &[Some(root)]);
        c.graph.add_req(root, Some(live));
        let x = c.graph.intcon(1);
        let y = c.graph.intcon(2);
        let dead = c.graph.add_node(NodeKind::AddI, Type::INT, &[None, Some(x), Some(y)]);

        let freed = c.remove_useless_nodes();
        assert!(freed >= 3);
        assert!(!c.graph.contains(dead));
        assert!(c.graph.contains(live));
        assert!(c.graph.is_dead_index(dead.as_usize()));
        assert!(c.graph.verify().is_ok());
    }

    #[test]
    fn test_useful_node_loses_edges_into_dead_region() {
        let mut c = compile();
        let root = c.root();
        let x = c.graph.intcon(3);
        let keep = c.graph.add_node(NodeKind::Halt, Type::Control, &[Some(x)]);
        c.graph.add_req(root, Some(keep));
        let dead_use = c.graph.add_node(NodeKind::ConvL2I, Type::INT, &[None, Some(x)]);
        assert_eq!(c.graph.outcnt(x), 2);

        c.remove_useless_nodes();
        assert_eq!(c.graph.outs(x), &[keep]);
        assert!(!c.graph.contains(dead_use));
    }

    #[test]
    fn test_lists_pruned_in_order() {
        let mut c = compile();
        let root = c.root();
        let tf = TypeFunc::new(&[], BasicType::Void);
        let mut calls = Vec::new();
        for _ in 0..3 {
            calls.push(c.graph.make_static_java_call(tf.clone(), MethodId(0)));
        }
        c.graph.add_req(root, Some(calls[0]));
        c.graph.add_req(root, Some(calls[2]));
        let g = CallGenerator::for_direct_call(MethodId(0), true);
        for &call in &calls {
            c.add_late_inline(call, g.clone());
        }
        c.add_macro_node(calls[1]);

        c.remove_useless_nodes();
        assert_eq!(c.late_inlines(), &[calls[0], calls[2]]);
        assert_eq!(c.macro_count(), 0);
        assert_eq!(c.generator_count(), 2);
    }

    /// Root returning `(x + y) - y`, plus a dead chain hanging off the
    /// useful values.
    fn rooted_with_dead_users() -> Compile {
        let mut c = compile();
        let g = &mut c.graph;
        let x = g.intcon(1);
        let y = g.intcon(2);
        let u1 = g.add_node(NodeKind::AddI, Type::INT, &[None, Some(x), Some(y)]);
        let d1 = g.add_node(NodeKind::AddI, Type::INT, &[None, Some(x), Some(u1)]);
        let u2 = g.add_node(NodeKind::SubI, Type::INT, &[None, Some(u1), Some(y)]);
        let d2 = g.add_node(NodeKind::SubI, Type::INT, &[None, Some(d1), Some(u2)]);
        g.add_node(NodeKind::AddI, Type::INT, &[None, Some(d2), Some(y)]);
        g.add_node(NodeKind::Halt, Type::Control, &[Some(u2)]);
        let root = g.root();
        let ret = g.add_node(NodeKind::Return, Type::Control, &[None, None, None, None, None, Some(u2)]);
        g.add_req(root, Some(ret));
        c
    }

    type Topology = Vec<(NodeId, Vec<Option<NodeId>>, Vec<NodeId>)>;

    fn topology(c: &Compile) -> Topology {
        c.graph
            .iter()
            .map(|(n, node)| {
                let mut outs = c.graph.outs(n).to_vec();
                outs.sort();
                (n, node.inputs().to_vec(), outs)
            })
            .collect()
    }

    #[test]
    fn test_useless_removal_ignores_visitation_order() {
        let reference = {
            let mut c = rooted_with_dead_users();
            c.remove_useless_nodes();
            c.graph.verify().unwrap();
            topology(&c)
        };

        let base: Vec<NodeId> = rooted_with_dead_users().identify_useful_nodes().iter().collect();
        let mut orders = vec![base.iter().rev().copied().collect::<Vec<_>>()];
        let mut seed = 0x9e37_79b9_u64;
        for _ in 0..6 {
            let mut order = base.clone();
            for i in (1..order.len()).rev() {
                seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                order.swap(i, (seed >> 33) as usize % (i + 1));
            }
            orders.push(order);
        }

        for order in orders {
            let mut c = rooted_with_dead_users();
            let mut useful = UniqueNodeList::new();
            for &n in &order {
                useful.push(n);
            }
            assert_eq!(useful.len(), base.len());
            c.remove_useless_nodes_with(&useful);
            c.graph.verify().unwrap();
            assert_eq!(topology(&c), reference, "order {:?}", order);
        }
    }

    #[test]
    fn test_remove_useless_node_keeps_constants_uncounted() {
        let mut c = compile();
        let k = c.graph.intcon(9);
        c.remove_useless_node(k);
        assert!(!c.graph.is_dead_index(k.as_usize()));
    }
}
