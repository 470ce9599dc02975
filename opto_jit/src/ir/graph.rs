//! Sea-of-nodes graph structure.
//!
//! The graph provides:
//! - **Arena-based storage**: nodes addressed by generation-tagged handles
//! - **Def-use reciprocity**: every input edge is mirrored by one output
//!   entry on the defining node, with matching multiplicity
//! - **Edge mutation**: required and precedence edges can be appended,
//!   inserted, deleted and replaced without breaking the input layout
//! - **Dead-index ledger**: indices known dead between liveness sweeps
//!
//! # Sentinels
//!
//! - **Root** has itself as input 0; graph exits hang off its other inputs.
//! - **Top** is the unique "no value" node. It has no inputs and never
//!   records outputs, so edges *to* top are one-directional.
//!
//! # Invariants
//!
//! After every mutation, for every node the precedence suffix
//! `[req, len)` is a run of non-null, distinct edges followed only by
//! nulls, and for every pair of nodes (`def` not top) the number of
//! times `def` appears among `user`'s inputs equals the number of times
//! `user` appears among `def`'s outputs. [`Graph::verify`] checks both.

use std::fmt;

use rustc_hash::FxHashMap;
use thiserror::Error;

use super::arena::{Arena, BitSet};
use super::gvn::NodeHash;
use super::node::{Node, NodeFlags, NodeId};
use super::operators::{NodeKind, Opcode};
use super::types::Type;

// =============================================================================
// Verification Errors
// =============================================================================

/// A broken structural invariant found by [`Graph::verify`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    #[error("{user} uses {def} {uses} time(s) but {def} records {outs} output(s) to it")]
    Reciprocity {
        def: NodeId,
        user: NodeId,
        uses: usize,
        outs: usize,
    },
    #[error("{node} has a gap in its precedence edges at slot {slot}")]
    PrecedenceGap { node: NodeId, slot: usize },
    #[error("{node} has duplicate precedence edge to {def}")]
    DuplicatePrecedence { node: NodeId, def: NodeId },
    #[error("{node} is dead but still has {outcnt} use(s)")]
    DeadWithUses { node: NodeId, outcnt: usize },
    #[error("{node} input {slot} refers to a freed node")]
    StaleInput { node: NodeId, slot: usize },
    #[error("{node} output refers to a freed node")]
    StaleOutput { node: NodeId },
    #[error("top has edges")]
    TopHasEdges,
    #[error("{node} is marked hashed but is not in the value-numbering table")]
    StaleHash { node: NodeId },
}

// =============================================================================
// Graph Structure
// =============================================================================

/// A sea-of-nodes graph for one compilation.
#[derive(Clone)]
pub struct Graph {
    nodes: Arena<Node>,
    root: NodeId,
    top: NodeId,
    /// Indices recorded dead since creation.
    dead: BitSet,
    dead_count: usize,
    pub(crate) hash: NodeHash,
}

impl Graph {
    /// Create a graph holding only the root and top sentinels.
    pub fn new() -> Self {
        let mut nodes = Arena::with_capacity(256);
        let root = nodes.alloc(Node::new(NodeKind::Root, Type::Bottom, 1));
        let top = nodes.alloc(Node::new(NodeKind::Top, Type::Top, 0));
        nodes[root].idx = root.index();
        nodes[top].idx = top.index();
        let mut graph = Graph {
            nodes,
            root,
            top,
            dead: BitSet::new(),
            dead_count: 0,
            hash: NodeHash::default(),
        };
        graph.init_req(root, 0, Some(root));
        graph
    }

    #[inline]
    pub fn root(&self) -> NodeId {
        self.root
    }

    #[inline]
    pub fn top(&self) -> NodeId {
        self.top
    }

    #[inline]
    pub fn is_top(&self, n: NodeId) -> bool {
        n == self.top
    }

    /// Treats a null edge like top.
    #[inline]
    pub fn is_top_or_null(&self, n: Option<NodeId>) -> bool {
        n.map_or(true, |n| n == self.top)
    }

    // =========================================================================
    // Node Access
    // =========================================================================

    #[inline]
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    #[inline]
    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id]
    }

    /// Get a node by ID, `None` if the handle is stale.
    #[inline]
    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    #[inline]
    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains(id)
    }

    /// Live node handle at a dense index.
    #[inline]
    pub fn id_at(&self, idx: usize) -> Option<NodeId> {
        self.nodes.id_at(idx)
    }

    /// Input `i` of `n`.
    #[inline]
    pub fn input(&self, n: NodeId, i: usize) -> Option<NodeId> {
        self.nodes[n].input(i)
    }

    #[inline]
    pub fn req(&self, n: NodeId) -> usize {
        self.nodes[n].req
    }

    #[inline]
    pub fn outs(&self, n: NodeId) -> &[NodeId] {
        self.nodes[n].outs()
    }

    #[inline]
    pub fn outcnt(&self, n: NodeId) -> usize {
        self.nodes[n].outcnt()
    }

    #[inline]
    pub fn kind(&self, n: NodeId) -> &NodeKind {
        &self.nodes[n].kind
    }

    #[inline]
    pub fn opcode(&self, n: NodeId) -> Opcode {
        self.nodes[n].opcode()
    }

    #[inline]
    pub fn ty(&self, n: NodeId) -> &Type {
        &self.nodes[n].ty
    }

    /// One past the largest index handed out.
    #[inline]
    pub fn unique(&self) -> usize {
        self.nodes.len()
    }

    /// Nodes not known to be dead.
    #[inline]
    pub fn live_nodes(&self) -> usize {
        self.unique() - self.dead_count
    }

    /// Iterate over every allocated node.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes.iter()
    }

    /// The only use of `n`, if it has exactly one.
    pub fn unique_out(&self, n: NodeId) -> Option<NodeId> {
        match self.outs(n) {
            [only] => Some(*only),
            _ => None,
        }
    }

    /// The only control use of `n`, if it has exactly one.
    pub fn unique_ctrl_out(&self, n: NodeId) -> Option<NodeId> {
        let mut found = None;
        for &u in self.outs(n) {
            if self.nodes[u].is_cfg() || (self.nodes[u].opcode() == Opcode::Proj && self.ty(u) == &Type::Control) {
                if found.is_some_and(|f| f != u) {
                    return None;
                }
                found = Some(u);
            }
        }
        found
    }

    /// Projection `con` hanging off multi-node `n`.
    pub fn proj_out(&self, n: NodeId, con: u32) -> Option<NodeId> {
        self.outs(n).iter().copied().find(|&u| {
            let node = &self.nodes[u];
            node.input(0) == Some(n) && node.proj_con() == Some(con)
        })
    }

    // =========================================================================
    // Node Creation
    // =========================================================================

    /// Add a node with the given required inputs.
    pub fn add_node(&mut self, kind: NodeKind, ty: Type, inputs: &[Option<NodeId>]) -> NodeId {
        let id = self.alloc(Node::new(kind, ty, inputs.len()));
        for (i, &def) in inputs.iter().enumerate() {
            if def.is_some() {
                self.init_req(id, i, def);
            }
        }
        id
    }

    fn alloc(&mut self, node: Node) -> NodeId {
        let id = self.nodes.alloc(node);
        self.nodes[id].idx = id.index();
        self.dead.remove(id.as_usize());
        id
    }

    /// Raw copy of `n` with a fresh index and no uses.
    ///
    /// Every input edge of the copy registers a reciprocal use on the
    /// shared input. Payload that lives outside the graph (JVM states,
    /// call generators) is the caller's to duplicate.
    pub fn clone_node(&mut self, n: NodeId) -> NodeId {
        let mut copy = self.nodes[n].clone();
        copy.outputs = Default::default();
        copy.flags.remove(NodeFlags::HASHED);
        let inputs = copy.inputs.clone();
        let id = self.alloc(copy);
        for def in inputs.into_iter().flatten() {
            self.add_out(def, id);
        }
        tracing::trace!(orig = %n, clone = %id, "clone node");
        id
    }

    // =========================================================================
    // Reciprocal Outputs
    // =========================================================================

    #[inline]
    fn add_out(&mut self, def: NodeId, user: NodeId) {
        if def == self.top {
            return;
        }
        self.nodes[def].add_out(user);
    }

    #[inline]
    fn del_out(&mut self, def: NodeId, user: NodeId) {
        if def == self.top {
            return;
        }
        let removed = self.nodes[def].del_out(user);
        debug_assert!(removed, "{} missing output to {}", def, user);
    }

    /// Remove output slot `j` of `n` without touching the user's inputs.
    ///
    /// Only for boundary disconnection of unreachable users; leaves the
    /// user's input array pointing at `n`.
    pub fn raw_del_out(&mut self, n: NodeId, j: usize) {
        self.nodes[n].outputs.swap_remove(j);
    }

    #[inline]
    fn check_unhashed(&self, n: NodeId) {
        debug_assert!(
            !self.nodes[n].flags.contains(NodeFlags::HASHED),
            "remove {} from the hash table before modifying it",
            n
        );
    }

    // =========================================================================
    // Required Edges
    // =========================================================================

    /// Set required input `i`, which must currently be null.
    pub fn init_req(&mut self, n: NodeId, i: usize, def: Option<NodeId>) {
        debug_assert!(i < self.nodes[n].req, "oob");
        debug_assert!(self.nodes[n].inputs[i].is_none(), "must be null");
        self.nodes[n].inputs[i] = def;
        if let Some(d) = def {
            self.add_out(d, n);
        }
    }

    /// Replace required input `i`.
    pub fn set_req(&mut self, n: NodeId, i: usize, def: Option<NodeId>) {
        self.check_unhashed(n);
        debug_assert!(i < self.nodes[n].req, "oob: i={}, req={}", i, self.nodes[n].req);
        let old = std::mem::replace(&mut self.nodes[n].inputs[i], def);
        if let Some(o) = old {
            self.del_out(o, n);
        }
        if let Some(d) = def {
            self.add_out(d, n);
        }
    }

    /// Append a required input, displacing a precedence edge if one
    /// occupies the claimed slot.
    pub fn add_req(&mut self, n: NodeId, def: Option<NodeId>) {
        self.check_unhashed(n);
        let node = &mut self.nodes[n];
        let len = node.len();
        if node.req >= len || node.inputs[len - 1].is_some() {
            node.grow(len + 1);
        }
        let req = node.req;
        if node.inputs[req].is_some() {
            let i = (req..node.len())
                .find(|&i| node.inputs[i].is_none())
                .unwrap_or(node.len() - 1);
            node.inputs[i] = node.inputs[req];
        }
        node.inputs[req] = def;
        node.req += 1;
        if let Some(d) = def {
            self.add_out(d, n);
        }
    }

    /// Append `m` copies of `def` as required inputs.
    pub fn add_req_batch(&mut self, n: NodeId, def: Option<NodeId>, m: usize) {
        if m <= 1 {
            if m == 1 {
                self.add_req(n, def);
            }
            return;
        }
        self.check_unhashed(n);
        let node = &mut self.nodes[n];
        let len = node.len();
        if node.req + m > len || node.inputs[len - m].is_some() {
            node.grow(len + m);
        }
        let req = node.req;
        let len = node.len();
        if node.inputs[req].is_some() {
            for i in (req..len - m).rev() {
                node.inputs[i + m] = node.inputs[i];
            }
        }
        for k in 0..m {
            node.inputs[req + k] = def;
        }
        node.req += m;
        if let Some(d) = def {
            for _ in 0..m {
                self.add_out(d, n);
            }
        }
    }

    /// Delete required input `idx`, moving the last required input into
    /// its slot.
    pub fn del_req(&mut self, n: NodeId, idx: usize) {
        self.check_unhashed(n);
        let node = &mut self.nodes[n];
        debug_assert!(idx < node.req, "oob");
        let old = node.inputs[idx];
        node.req -= 1;
        let last = node.req;
        node.inputs[idx] = node.inputs[last];
        self.close_prec_gap_at(n, last);
        if let Some(o) = old {
            self.del_out(o, n);
        }
    }

    /// Delete required input `idx`, preserving the order of the rest.
    pub fn del_req_ordered(&mut self, n: NodeId, idx: usize) {
        self.check_unhashed(n);
        let node = &mut self.nodes[n];
        debug_assert!(idx < node.req, "oob");
        let old = node.inputs[idx];
        node.req -= 1;
        let req = node.req;
        for i in idx..req {
            node.inputs[i] = node.inputs[i + 1];
        }
        self.close_prec_gap_at(n, req);
        if let Some(o) = old {
            self.del_out(o, n);
        }
    }

    /// Insert a required input at `idx`, shifting later ones right.
    pub fn ins_req(&mut self, n: NodeId, idx: usize, def: Option<NodeId>) {
        self.add_req(n, None);
        let node = &mut self.nodes[n];
        debug_assert!(idx < node.req, "oob");
        for i in (idx..node.req - 1).rev() {
            node.inputs[i + 1] = node.inputs[i];
        }
        node.inputs[idx] = def;
        if let Some(d) = def {
            self.add_out(d, n);
        }
    }

    /// Truncate the required inputs to `new_req`.
    pub fn set_req_count(&mut self, n: NodeId, new_req: usize) {
        while self.nodes[n].req > new_req {
            let last = self.nodes[n].req - 1;
            self.del_req(n, last);
        }
    }

    // =========================================================================
    // Precedence Edges
    // =========================================================================

    /// Move the last precedence edge into the empty slot `gap`.
    ///
    /// Returns the index of the slot that became null.
    pub fn close_prec_gap_at(&mut self, n: NodeId, gap: usize) -> usize {
        let node = &mut self.nodes[n];
        debug_assert!(node.req <= gap && gap < node.len(), "no valid prec edge");
        let mut i = gap;
        let mut last = None;
        while i + 1 < node.len() {
            match node.inputs[i + 1] {
                Some(next) => last = Some(next),
                None => break,
            }
            i += 1;
        }
        node.inputs[gap] = last;
        node.inputs[i] = None;
        i
    }

    /// Add a precedence edge; no-op if already present.
    pub fn add_prec(&mut self, n: NodeId, def: NodeId) {
        let node = &mut self.nodes[n];
        let len = node.len();
        if node.req >= len || node.inputs[len - 1].is_some() {
            node.grow(len + 1);
        }
        let mut i = node.req;
        while let Some(existing) = node.inputs[i] {
            if existing == def {
                return;
            }
            i += 1;
        }
        node.inputs[i] = Some(def);
        self.add_out(def, n);
    }

    /// Remove precedence edge `j` and close the gap.
    pub fn rm_prec(&mut self, n: NodeId, j: usize) {
        debug_assert!(j >= self.nodes[n].req, "not a precedence edge");
        let Some(old) = self.nodes[n].inputs.get(j).copied().flatten() else {
            return;
        };
        self.del_out(old, n);
        self.close_prec_gap_at(n, j);
    }

    /// Overwrite precedence slot `i`; `None` removes it.
    pub fn set_prec(&mut self, n: NodeId, i: usize, def: Option<NodeId>) {
        let Some(def) = def else {
            self.rm_prec(n, i);
            return;
        };
        debug_assert!(i >= self.nodes[n].req, "not a precedence edge");
        debug_assert!(i <= self.nodes[n].prec_end(), "would leave a gap");
        self.nodes[n].grow(i + 1);
        let old = std::mem::replace(&mut self.nodes[n].inputs[i], Some(def));
        if let Some(o) = old {
            self.del_out(o, n);
        }
        self.add_out(def, n);
    }

    // =========================================================================
    // Edge Search and Replacement
    // =========================================================================

    /// First input slot (required or precedence) holding `def`.
    pub fn find_edge(&self, n: NodeId, def: NodeId) -> Option<usize> {
        self.nodes[n].inputs.iter().position(|&e| e == Some(def))
    }

    /// Precedence slot holding `def`.
    pub fn find_prec_edge(&self, n: NodeId, def: NodeId) -> Option<usize> {
        let node = &self.nodes[n];
        (node.req..node.len()).find(|&i| node.inputs[i] == Some(def))
    }

    /// Replace every input occurrence of `old` with `new`.
    ///
    /// Returns the number of edges replaced.
    pub fn replace_edge(&mut self, n: NodeId, old: NodeId, new: Option<NodeId>) -> usize {
        let len = self.nodes[n].len();
        self.replace_edges_in_range(n, old, new, 0, len)
    }

    /// Replace occurrences of `old` in input slots `[start, end)`.
    pub fn replace_edges_in_range(
        &mut self,
        n: NodeId,
        old: NodeId,
        new: Option<NodeId>,
        start: usize,
        end: usize,
    ) -> usize {
        if Some(old) == new {
            return 0;
        }
        let mut nrep = 0;
        let mut i = start;
        while i < end.min(self.nodes[n].len()) {
            if self.nodes[n].inputs[i] == Some(old) {
                if i < self.nodes[n].req {
                    self.set_req(n, i, new);
                } else if new.is_some_and(|d| self.find_prec_edge(n, d).is_some()) {
                    self.rm_prec(n, i);
                    nrep += 1;
                    continue;
                } else {
                    self.set_prec(n, i, new);
                    if new.is_none() {
                        nrep += 1;
                        continue;
                    }
                }
                nrep += 1;
            }
            i += 1;
        }
        nrep
    }

    // =========================================================================
    // Death and Reclamation
    // =========================================================================

    /// All inputs are null and the node is not the top sentinel.
    pub fn is_dead(&self, n: NodeId) -> bool {
        let node = &self.nodes[n];
        !node.is_top() && node.inputs.iter().all(Option::is_none)
    }

    /// Record `idx` in the dead-index ledger.
    pub fn record_dead_node(&mut self, idx: usize) {
        if self.dead.test_set(idx) {
            return;
        }
        self.dead_count += 1;
    }

    /// Whether `idx` is recorded dead.
    #[inline]
    pub fn is_dead_index(&self, idx: usize) -> bool {
        self.dead.contains(idx)
    }

    /// Sever every input of `n` and record it dead.
    pub fn disconnect_inputs(&mut self, n: NodeId) {
        self.hash_delete(n);
        for i in 0..self.nodes[n].req {
            if self.nodes[n].inputs[i].is_some() {
                self.set_req(n, i, None);
            }
        }
        let req = self.nodes[n].req;
        let mut i = self.nodes[n].len();
        while i > req {
            i -= 1;
            self.rm_prec(n, i);
        }
        self.record_dead_node(n.as_usize());
    }

    /// Destroy a node with no uses.
    ///
    /// Severs its inputs and frees it. The index is given back if it was the
    /// most recently created one, otherwise it is recorded dead.
    pub fn destruct(&mut self, n: NodeId) {
        debug_assert_eq!(self.outcnt(n), 0, "deleting {} would leave a dangling use", n);
        debug_assert!(n != self.top && n != self.root, "cannot destroy a sentinel");
        self.hash_delete(n);
        let inputs = self.nodes[n].inputs.clone();
        for def in inputs.into_iter().flatten() {
            if def != n {
                self.del_out(def, n);
            }
        }
        if n.as_usize() + 1 == self.unique() {
            self.nodes.pop_last(n);
            tracing::trace!(node = %n, "reclaimed last index");
        } else {
            self.record_dead_node(n.as_usize());
            self.nodes.free(n);
        }
    }

    /// Free every node whose index is not in `useful`.
    ///
    /// The caller has already disconnected the useless region from the
    /// useful one, so only edges internal to the dead region remain.
    pub(crate) fn reclaim_unreachable(&mut self, useful: &BitSet) -> usize {
        let doomed: Vec<NodeId> = self
            .nodes
            .ids()
            .filter(|id| !useful.contains(id.as_usize()))
            .collect();
        for &id in &doomed {
            self.hash_delete(id);
        }
        for &id in &doomed {
            self.record_dead_node(id.as_usize());
            self.nodes.free(id);
        }
        doomed.len()
    }

    // =========================================================================
    // Special Unique Users
    // =========================================================================

    /// `n`'s only use has a shape that may fold once `n` loses its other
    /// uses.
    pub fn has_special_unique_user(&self, n: NodeId) -> bool {
        let Some(u) = self.unique_out(n) else {
            return false;
        };
        let op = self.opcode(n);
        let uop = self.opcode(u);
        match op {
            // Back-to-back stores to the same address.
            Opcode::Store => uop == op && self.input(u, 1) == Some(n),
            // Load followed by an acquire barrier.
            Opcode::Load | Opcode::DecodeN | Opcode::Phi => uop == Opcode::MemBarAcquire,
            // (ConvL2I (AddL x y)) distributes the truncation.
            Opcode::AddL => uop == Opcode::ConvL2I && self.input(u, 1) == Some(n),
            // (x - (y - z)) rotates.
            Opcode::SubI | Opcode::SubL => uop == op && self.input(u, 2) == Some(n),
            // If with only one projection folds away.
            Opcode::If => matches!(uop, Opcode::IfTrue | Opcode::IfFalse),
            // A projection whose If was just simplified.
            Opcode::IfTrue | Opcode::IfFalse => uop == Opcode::If,
            _ => false,
        }
    }

    // =========================================================================
    // Verification
    // =========================================================================

    /// Check def-use reciprocity, the precedence layout, input liveness,
    /// dead-node closure and the hash table.
    pub fn verify(&self) -> Result<(), VerifyError> {
        let top = &self.nodes[self.top];
        if top.inputs.iter().any(Option::is_some) || top.outcnt() != 0 {
            return Err(VerifyError::TopHasEdges);
        }
        let mut balance: FxHashMap<(NodeId, NodeId), (usize, usize)> = FxHashMap::default();
        for (id, node) in self.nodes.iter() {
            for (slot, def) in node.inputs.iter().enumerate() {
                let Some(def) = *def else { continue };
                if !self.nodes.contains(def) {
                    return Err(VerifyError::StaleInput { node: id, slot });
                }
                if def != self.top {
                    balance.entry((def, id)).or_default().0 += 1;
                }
            }
            for &user in node.outs() {
                if !self.nodes.contains(user) {
                    return Err(VerifyError::StaleOutput { node: id });
                }
                balance.entry((id, user)).or_default().1 += 1;
            }
            self.verify_precedence(id, node)?;
            if self.is_dead(id) && node.outcnt() != 0 {
                return Err(VerifyError::DeadWithUses {
                    node: id,
                    outcnt: node.outcnt(),
                });
            }
            if node.flags.contains(NodeFlags::HASHED) && !self.hash.contains(self, id) {
                return Err(VerifyError::StaleHash { node: id });
            }
        }
        let mut mismatches: Vec<_> = balance.into_iter().filter(|(_, (u, o))| u != o).collect();
        mismatches.sort_by_key(|((d, u), _)| (*d, *u));
        match mismatches.first() {
            Some(&((def, user), (uses, outs))) => Err(VerifyError::Reciprocity {
                def,
                user,
                uses,
                outs,
            }),
            None => Ok(()),
        }
    }

    fn verify_precedence(&self, id: NodeId, node: &Node) -> Result<(), VerifyError> {
        let mut seen_null = false;
        for slot in node.req..node.len() {
            match node.inputs[slot] {
                None => seen_null = true,
                Some(_) if seen_null => return Err(VerifyError::PrecedenceGap { node: id, slot }),
                Some(def) => {
                    if node.inputs[node.req..slot].contains(&Some(def)) {
                        return Err(VerifyError::DuplicatePrecedence { node: id, def });
                    }
                }
            }
        }
        Ok(())
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Graph {{")?;
        writeln!(f, "  root: {}, top: {}", self.root, self.top)?;
        writeln!(f, "  nodes ({} live of {}):", self.live_nodes(), self.unique())?;
        for (id, node) in self.nodes.iter() {
            write!(f, "    {}: {}", id, node.kind.name())?;
            let inputs: Vec<String> = node
                .required()
                .iter()
                .map(|e| e.map_or_else(|| "_".to_string(), |d| d.to_string()))
                .collect();
            write!(f, "({})", inputs.join(", "))?;
            let precs: Vec<String> = node.precs().map(|p| p.to_string()).collect();
            if !precs.is_empty() {
                write!(f, " | {}", precs.join(", "))?;
            }
            writeln!(f, " : {:?}", node.ty)?;
        }
        write!(f, "}}")
    }
}

// =============================================================================
// Tests
// =============================================================================
