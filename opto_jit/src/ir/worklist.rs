//! Ordered node list with O(1) membership.

use super::arena::BitSet;
use super::node::NodeId;

/// A list of distinct nodes keeping insertion order, with a membership set
/// keyed by node index.
///
/// Membership also checks the handle's generation, so a stale handle
/// whose index was reused is not a member.
#[derive(Debug, Clone, Default)]
pub struct UniqueNodeList {
    nodes: Vec<NodeId>,
    members: BitSet,
    generations: Vec<u32>,
}

impl UniqueNodeList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `n` unless already present. Returns whether it was added.
    pub fn push(&mut self, n: NodeId) -> bool {
        let idx = n.as_usize();
        if self.members.contains(idx) {
            if self.generations[idx] == n.generation() {
                return false;
            }
            // A stale handle holds the index.
            self.nodes.retain(|&x| x.as_usize() != idx);
        }
        self.members.insert(idx);
        if self.generations.len() <= idx {
            self.generations.resize(idx + 1, 0);
        }
        self.generations[idx] = n.generation();
        self.nodes.push(n);
        true
    }

    /// Remove and return the last node.
    pub fn pop(&mut self) -> Option<NodeId> {
        let n = self.nodes.pop()?;
        self.members.remove(n.as_usize());
        Some(n)
    }

    #[inline]
    pub fn member(&self, n: NodeId) -> bool {
        let idx = n.as_usize();
        self.members.contains(idx) && self.generations.get(idx) == Some(&n.generation())
    }

    /// Whether node index `idx` is a member.
    #[inline]
    pub fn member_idx(&self, idx: usize) -> bool {
        self.members.contains(idx)
    }

    /// Remove `n`, preserving the order of the rest.
    pub fn remove(&mut self, n: NodeId) -> bool {
        if !self.member(n) {
            return false;
        }
        self.members.remove(n.as_usize());
        self.nodes.retain(|&x| x != n);
        true
    }

    /// Drop every node whose index is not in `useful`.
    pub fn remove_useless_nodes(&mut self, useful: &BitSet) {
        let members = &mut self.members;
        self.nodes.retain(|&n| {
            let keep = useful.contains(n.as_usize());
            if !keep {
                members.remove(n.as_usize());
            }
            keep
        });
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[inline]
    pub fn at(&self, i: usize) -> NodeId {
        self.nodes[i]
    }

    pub fn iter(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.iter().copied()
    }

    /// Membership set keyed by node index.
    pub fn member_set(&self) -> &BitSet {
        &self.members
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.members.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::graph::Graph;
    use crate::ir::operators::NodeKind;
    use crate::ir::types::Type;

    #[test]
    fn test_push_is_unique_and_ordered() {
        let mut g = Graph::new();
        let (a, b) = (g.intcon(1), g.intcon(2));
        let mut list = UniqueNodeList::new();
        assert!(list.push(a));
        assert!(list.push(b));
        assert!(!list.push(a));
        assert_eq!(list.iter().collect::<Vec<_>>(), vec![a, b]);
        assert_eq!(list.pop(), Some(b));
        assert!(!list.member(b));
    }

    #[test]
    fn test_remove_useless_keeps_order() {
        let mut g = Graph::new();
        let ids: Vec<_> = (0..4).map(|i| g.makecon(Type::int_con(i))).collect();
        let mut list = UniqueNodeList::new();
        for &n in &ids {
            list.push(n);
        }
        let mut useful = BitSet::new();
        useful.insert(ids[0].as_usize());
        useful.insert(ids[2].as_usize());
        list.remove_useless_nodes(&useful);
        assert_eq!(list.iter().collect::<Vec<_>>(), vec![ids[0], ids[2]]);
        assert!(!list.member(ids[1]));
    }

    #[test]
    fn test_reused_index_is_not_a_member() {
        let mut g = Graph::new();
        let (a, b) = (g.intcon(1), g.intcon(2));
        let old = g.add_node(NodeKind::AddI, Type::INT, &[None, Some(a), Some(b)]);
        let mut list = UniqueNodeList::new();
        list.push(old);

        g.destruct(old);
        let new = g.add_node(NodeKind::SubI, Type::INT, &[None, Some(a), Some(b)]);
        assert_eq!(new.as_usize(), old.as_usize());
        assert!(!list.member(new));
        assert!(list.member(old));

        // The stale entry gives way to the live node.
        assert!(list.push(new));
        assert!(list.member(new));
        assert!(!list.member(old));
        assert_eq!(list.iter().collect::<Vec<_>>(), vec![new]);
    }
}
