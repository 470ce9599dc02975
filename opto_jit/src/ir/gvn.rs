//! Value numbering for pure nodes.
//!
//! Pure nodes (constants, arithmetic, compares, casts, projections) are
//! hash-consed by their shape: opcode, kind payload, type for the kinds
//! whose type is part of their identity, and required inputs. Since the
//! key depends on the inputs, a hashed node must be removed from the table
//! before any of its edges change and reinserted afterwards.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use super::graph::Graph;
use super::node::{NodeFlags, NodeId};
use super::operators::{NodeKind, Opcode};
use super::types::Type;

/// Shape of a pure node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeKey {
    op: Opcode,
    aux: u32,
    ty: Option<Type>,
    inputs: SmallVec<[Option<NodeId>; 4]>,
}

/// Hash-consing table of pure nodes.
#[derive(Debug, Clone, Default)]
pub struct NodeHash {
    table: FxHashMap<NodeKey, NodeId>,
}

impl NodeHash {
    /// Whether `n` is registered under its current key.
    pub fn contains(&self, g: &Graph, n: NodeId) -> bool {
        g.hash_key(n)
            .is_some_and(|key| self.table.get(&key) == Some(&n))
    }

    /// Number of registered nodes.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

impl Graph {
    /// Value-numbering key of `n`, `None` if it is not hashable.
    pub fn hash_key(&self, n: NodeId) -> Option<NodeKey> {
        let node = self.node(n);
        if !node.kind().is_pure() {
            return None;
        }
        let ty = matches!(
            node.kind(),
            NodeKind::Con | NodeKind::CastPP | NodeKind::CheckCastPP
        )
        .then(|| node.ty().clone());
        Some(NodeKey {
            op: node.opcode(),
            aux: node.kind().hash_aux(),
            ty,
            inputs: node.required().iter().copied().collect(),
        })
    }

    /// Find a node equal to `n`, or register `n` if there is none.
    pub fn hash_find_insert(&mut self, n: NodeId) -> Option<NodeId> {
        let key = self.hash_key(n)?;
        if let Some(&existing) = self.hash.table.get(&key) {
            if existing != n && self.contains(existing) {
                return Some(existing);
            }
        }
        self.hash.table.insert(key, n);
        self.node_mut(n).flags.insert(NodeFlags::HASHED);
        None
    }

    /// Register `n` under its current key.
    pub fn hash_insert(&mut self, n: NodeId) {
        if let Some(key) = self.hash_key(n) {
            self.hash.table.insert(key, n);
            self.node_mut(n).flags.insert(NodeFlags::HASHED);
        }
    }

    /// Remove `n` from the table. Returns whether it was registered.
    pub fn hash_delete(&mut self, n: NodeId) -> bool {
        if !self.node(n).flags.contains(NodeFlags::HASHED) {
            return false;
        }
        self.node_mut(n).flags.remove(NodeFlags::HASHED);
        match self.hash_key(n) {
            Some(key) if self.hash.table.get(&key) == Some(&n) => {
                self.hash.table.remove(&key);
                true
            }
            _ => false,
        }
    }

    /// Value-number a freshly built node.
    ///
    /// Returns an existing equal node (destroying `n`) or `n` itself.
    pub fn transform(&mut self, n: NodeId) -> NodeId {
        match self.hash_find_insert(n) {
            Some(existing) if self.outcnt(n) == 0 => {
                self.destruct(n);
                existing
            }
            _ => n,
        }
    }

    // =========================================================================
    // Constants
    // =========================================================================

    /// Constant of type `ty`, shared with any equal constant.
    pub fn makecon(&mut self, ty: Type) -> NodeId {
        if ty.is_top() {
            return self.top();
        }
        let root = self.root();
        let n = self.add_node(NodeKind::Con, ty, &[Some(root)]);
        self.transform(n)
    }

    pub fn intcon(&mut self, v: i32) -> NodeId {
        self.makecon(Type::int_con(v))
    }

    pub fn longcon(&mut self, v: i64) -> NodeId {
        self.makecon(Type::long_con(v))
    }

    pub fn null_con(&mut self) -> NodeId {
        self.makecon(Type::null())
    }

    /// Projection `con` of multi-node `n`, shared if it already exists.
    pub fn make_proj(&mut self, n: NodeId, con: u32, io_use: bool, ty: Type) -> NodeId {
        let p = self.add_node(NodeKind::Proj { con, io_use }, ty, &[Some(n)]);
        self.transform(p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants_are_shared() {
        let mut g = Graph::new();
        let a = g.intcon(7);
        let unique = g.unique();
        let b = g.intcon(7);
        assert_eq!(a, b);
        assert_eq!(g.unique(), unique);
        assert_ne!(g.intcon(8), a);
        assert_eq!(g.makecon(Type::Top), g.top());
        assert!(g.verify().is_ok());
    }

    #[test]
    fn test_hash_delete_brackets_mutation() {
        let mut g = Graph::new();
        let (x, y, z) = (g.intcon(1), g.intcon(2), g.intcon(3));
        let add = g.add_node(NodeKind::AddI, Type::INT, &[None, Some(x), Some(y)]);
        let add = g.transform(add);
        assert!(g.hash_delete(add));
        assert!(!g.hash_delete(add));
        g.set_req(add, 2, Some(z));
        g.hash_insert(add);
        assert!(g.verify().is_ok());

        let again = g.add_node(NodeKind::AddI, Type::INT, &[None, Some(x), Some(z)]);
        assert_eq!(g.transform(again), add);
    }

    #[test]
    fn test_impure_nodes_not_hashed() {
        let mut g = Graph::new();
        let a = g.add_node(NodeKind::Region, Type::Control, &[None]);
        assert_eq!(g.transform(a), a);
        assert!(g.hash_key(a).is_none());
    }
}
