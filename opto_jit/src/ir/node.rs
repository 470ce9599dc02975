//! IR node envelope for the sea-of-nodes graph.
//!
//! Every node, whatever its kind, shares the same envelope:
//! - **Kind**: what the node computes ([`NodeKind`]), with per-kind payload
//! - **Inputs**: use-def edges, a *required* prefix followed by *precedence*
//!   edges
//! - **Outputs**: def-use back-edges, unordered
//! - **Type**: the values the node may produce
//! - **Flags**: coarse classification driving bookkeeping
//!
//! # Input Layout
//!
//! ```text
//!   0            req                       len
//!   +------------+----------------+---------+
//!   | required   | precedence     | null    |
//!   | (ordered,  | (unordered,    | padding |
//!   |  may hold  |  no dups,      |         |
//!   |  nulls)    |  never null)   |         |
//!   +------------+----------------+---------+
//! ```
//!
//! The layout is only mutated through [`Graph`](super::graph::Graph), which
//! keeps every input edge mirrored by exactly one output entry on the
//! defining node.

use smallvec::SmallVec;

use crate::call::CallData;
use crate::jvms::{JvmsId, SafePointData};

use super::arena::Id;
use super::operators::{NodeKind, Opcode};
use super::types::{IdealReg, Type};

// =============================================================================
// Node ID Type Alias
// =============================================================================

/// Unique identifier for a node in the graph.
pub type NodeId = Id<Node>;

/// Inline edge capacity before spilling to the heap.
const INLINE_EDGES: usize = 4;

/// Smallest backing array handed out on first growth.
const MIN_EDGE_CAPACITY: usize = 4;

pub(crate) type InputArray = SmallVec<[Option<NodeId>; INLINE_EDGES]>;
pub(crate) type OutputArray = SmallVec<[NodeId; INLINE_EDGES]>;

/// Capacity a backing array grows to when it must hold `len` entries.
#[inline]
pub(crate) fn grown_capacity(len: usize) -> usize {
    len.next_power_of_two().max(MIN_EDGE_CAPACITY)
}

// =============================================================================
// Node Flags
// =============================================================================

bitflags::bitflags! {
    /// Coarse classification bits.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct NodeFlags: u16 {
        /// Participates in control flow.
        const CONTROL = 0b0000_0000_0001;
        /// Expanded into a low-level sequence by a later pass.
        const MACRO = 0b0000_0000_0010;
        /// Compile-time constant.
        const CON = 0b0000_0000_0100;
        /// Costly to compute; tracked so it can be commoned late.
        const EXPENSIVE = 0b0000_0000_1000;
        /// Cannot form a dead data loop.
        const DEAD_LOOP_SAFE = 0b0000_0001_0000;
        /// Carries a JVM state.
        const SAFEPOINT = 0b0000_0010_0000;
        /// Is a call site.
        const CALL = 0b0000_0100_0000;
        /// Produces a tuple consumed through projections.
        const MULTI = 0b0000_1000_0000;
        /// Currently registered in the value-numbering table.
        const HASHED = 0b0001_0000_0000;
    }
}

impl NodeFlags {
    /// Default classification for a node of `kind`.
    pub fn for_kind(kind: &NodeKind) -> NodeFlags {
        let mut flags = NodeFlags::empty();
        if kind.is_cfg() {
            flags |= NodeFlags::CONTROL;
        }
        if kind.is_multi() {
            flags |= NodeFlags::MULTI;
        }
        match kind {
            NodeKind::Con => flags |= NodeFlags::CON | NodeFlags::DEAD_LOOP_SAFE,
            NodeKind::SafePoint(_) => flags |= NodeFlags::SAFEPOINT,
            NodeKind::Call(call) => {
                flags |= NodeFlags::SAFEPOINT | NodeFlags::CALL;
                if call.kind.is_macro() {
                    flags |= NodeFlags::MACRO;
                }
            }
            NodeKind::Proj { .. }
            | NodeKind::CatchProj { .. }
            | NodeKind::IfTrue
            | NodeKind::IfFalse
            | NodeKind::Region
            | NodeKind::Top
            | NodeKind::CreateEx => flags |= NodeFlags::DEAD_LOOP_SAFE,
            _ => {}
        }
        flags
    }
}

impl Default for NodeFlags {
    fn default() -> Self {
        NodeFlags::empty()
    }
}

// =============================================================================
// Node Structure
// =============================================================================

/// A sea-of-nodes IR node.
#[derive(Debug, Clone)]
pub struct Node {
    pub(crate) kind: NodeKind,
    /// Backing array; its length is the edge capacity.
    pub(crate) inputs: InputArray,
    /// Number of required inputs.
    pub(crate) req: usize,
    pub(crate) outputs: OutputArray,
    pub(crate) ty: Type,
    pub flags: NodeFlags,
    pub(crate) idx: u32,
}

impl Node {
    /// Create an unattached node with `req` null required inputs.
    pub(crate) fn new(kind: NodeKind, ty: Type, req: usize) -> Self {
        let flags = NodeFlags::for_kind(&kind);
        let mut inputs = InputArray::new();
        inputs.resize(req, None);
        Node {
            kind,
            inputs,
            req,
            outputs: OutputArray::new(),
            ty,
            flags,
            idx: u32::MAX,
        }
    }

    /// Dense index of this node.
    #[inline]
    pub fn idx(&self) -> u32 {
        self.idx
    }

    #[inline]
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    #[inline]
    pub fn kind_mut(&mut self) -> &mut NodeKind {
        &mut self.kind
    }

    #[inline]
    pub fn opcode(&self) -> Opcode {
        self.kind.opcode()
    }

    #[inline]
    pub fn ty(&self) -> &Type {
        &self.ty
    }

    #[inline]
    pub fn set_ty(&mut self, ty: Type) {
        self.ty = ty;
    }

    // =========================================================================
    // Edges
    // =========================================================================

    /// Number of required inputs.
    #[inline]
    pub fn req(&self) -> usize {
        self.req
    }

    /// Capacity of the input array (required + precedence + padding).
    #[inline]
    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    /// Input `i`, or `None` if null or out of range.
    #[inline]
    pub fn input(&self, i: usize) -> Option<NodeId> {
        self.inputs.get(i).copied().flatten()
    }

    /// The whole input array including padding.
    #[inline]
    pub fn inputs(&self) -> &[Option<NodeId>] {
        &self.inputs
    }

    /// The required prefix.
    #[inline]
    pub fn required(&self) -> &[Option<NodeId>] {
        &self.inputs[..self.req]
    }

    /// Non-null precedence edges.
    pub fn precs(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.inputs[self.req..].iter().map_while(|e| *e)
    }

    /// Index of the first null precedence slot, or `len()` if full.
    pub fn prec_end(&self) -> usize {
        self.req + self.precs().count()
    }

    /// Number of recorded uses.
    #[inline]
    pub fn outcnt(&self) -> usize {
        self.outputs.len()
    }

    /// Recorded uses, in no particular order.
    #[inline]
    pub fn outs(&self) -> &[NodeId] {
        &self.outputs
    }

    /// Ensure the input array can hold `len` entries.
    pub(crate) fn grow(&mut self, len: usize) {
        if len <= self.inputs.len() {
            return;
        }
        let new_max = grown_capacity(len);
        self.inputs.resize(new_max, None);
    }

    /// Ensure the output array can hold `len` entries.
    pub(crate) fn out_grow(&mut self, len: usize) {
        if len <= self.outputs.capacity() {
            return;
        }
        let cap = grown_capacity(len);
        self.outputs.reserve_exact(cap - self.outputs.len());
    }

    pub(crate) fn add_out(&mut self, user: NodeId) {
        self.out_grow(self.outputs.len() + 1);
        self.outputs.push(user);
    }

    /// Remove one occurrence of `user` from the outputs.
    pub(crate) fn del_out(&mut self, user: NodeId) -> bool {
        match self.outputs.iter().rposition(|&u| u == user) {
            Some(pos) => {
                self.outputs.swap_remove(pos);
                true
            }
            None => false,
        }
    }

    // =========================================================================
    // Classification
    // =========================================================================

    #[inline]
    pub fn is_top(&self) -> bool {
        matches!(self.kind, NodeKind::Top)
    }

    #[inline]
    pub fn is_con(&self) -> bool {
        self.flags.contains(NodeFlags::CON)
    }

    #[inline]
    pub fn is_cfg(&self) -> bool {
        self.flags.contains(NodeFlags::CONTROL)
    }

    #[inline]
    pub fn is_macro(&self) -> bool {
        self.flags.contains(NodeFlags::MACRO)
    }

    #[inline]
    pub fn is_safepoint(&self) -> bool {
        self.flags.contains(NodeFlags::SAFEPOINT)
    }

    #[inline]
    pub fn is_call(&self) -> bool {
        self.flags.contains(NodeFlags::CALL)
    }

    #[inline]
    pub fn is_multi(&self) -> bool {
        self.flags.contains(NodeFlags::MULTI)
    }

    #[inline]
    pub fn is_region(&self) -> bool {
        matches!(self.kind, NodeKind::Region)
    }

    #[inline]
    pub fn is_phi(&self) -> bool {
        matches!(self.kind, NodeKind::Phi { .. })
    }

    #[inline]
    pub fn is_merge_mem(&self) -> bool {
        matches!(self.kind, NodeKind::MergeMem)
    }

    /// Projection number for `Proj`, `CatchProj` and branch projections.
    pub fn proj_con(&self) -> Option<u32> {
        match self.kind {
            NodeKind::Proj { con, .. } | NodeKind::CatchProj { con, .. } => Some(con),
            NodeKind::IfFalse => Some(0),
            NodeKind::IfTrue => Some(1),
            _ => None,
        }
    }

    /// Safepoint payload, also present on calls.
    pub fn as_safepoint(&self) -> Option<&SafePointData> {
        match &self.kind {
            NodeKind::SafePoint(sfpt) => Some(sfpt),
            NodeKind::Call(call) => Some(&call.sfpt),
            _ => None,
        }
    }

    pub fn as_safepoint_mut(&mut self) -> Option<&mut SafePointData> {
        match &mut self.kind {
            NodeKind::SafePoint(sfpt) => Some(sfpt),
            NodeKind::Call(call) => Some(&mut call.sfpt),
            _ => None,
        }
    }

    pub fn as_call(&self) -> Option<&CallData> {
        match &self.kind {
            NodeKind::Call(call) => Some(call),
            _ => None,
        }
    }

    pub fn as_call_mut(&mut self) -> Option<&mut CallData> {
        match &mut self.kind {
            NodeKind::Call(call) => Some(call),
            _ => None,
        }
    }

    /// JVM state attached to a safepoint or call.
    pub fn jvms(&self) -> Option<JvmsId> {
        self.as_safepoint().and_then(|s| s.jvms)
    }

    /// Register class of this node's result.
    pub fn ideal_reg(&self) -> IdealReg {
        match &self.kind {
            NodeKind::CmpI | NodeKind::CmpP => IdealReg::RegFlags,
            NodeKind::Bool(_) => IdealReg::None,
            _ if self.is_multi() => IdealReg::None,
            _ => self.ty.ideal_reg(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
