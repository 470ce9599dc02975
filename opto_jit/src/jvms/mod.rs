//! JVM state snapshots.
//!
//! A [`JvmState`] describes the interpreter frame at one inlining depth:
//! which method, which bytecode, and how the input edges of its *map* (a
//! safepoint or call node) are partitioned into debug info.
//!
//! # Partition
//!
//! ```text
//!   locoff        stkoff        monoff         scloff          endoff
//!     | locals      | stack       | monitors     | scalar fields |
//!     |             |<-- sp -->|  | box obj box..|               |
//! ```
//!
//! Only `sp` stack slots are live, so the debug size of a frame is
//! `loc_size + sp + mon_size + scl_size`. Frames link to their caller,
//! forming the inlining chain; a call node's chain lays every frame's
//! debug info out back to back, oldest frame first.
//!
//! States live in a compile-scoped [`JvmsArena`] and are never freed.

mod safepoint;

pub use safepoint::{ReplacedNodes, SafePointData};

use std::fmt;

use thiserror::Error;

use crate::ci::MethodId;
use crate::ir::arena::{Arena, Id};
use crate::ir::graph::Graph;
use crate::ir::node::NodeId;
use crate::ir::types::TypeFunc;

/// Handle of a JVM state.
pub type JvmsId = Id<JvmState>;

/// Bci of a method's entry, before the first bytecode.
pub const INVOCATION_ENTRY_BCI: i32 = -1;

/// Slots a monitor takes: the box then the locked object.
pub const MONITOR_EDGES: u32 = 2;

// =============================================================================
// Reexecute
// =============================================================================

/// Whether the interpreter must redo the bytecode at `bci` on resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reexecute {
    /// Not decided yet; must be resolved before debug info is emitted.
    Undefined,
    False,
    True,
}

// =============================================================================
// JVM State
// =============================================================================

/// One interpreter frame snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JvmState {
    caller: Option<JvmsId>,
    depth: u32,
    locoff: u32,
    stkoff: u32,
    monoff: u32,
    scloff: u32,
    endoff: u32,
    sp: u32,
    bci: i32,
    reexecute: Reexecute,
    method: Option<MethodId>,
    map: Option<NodeId>,
}

impl JvmState {
    /// Frame of `method` with room for its locals and stack, laid out from
    /// the first parameter slot of its map.
    pub fn for_method(method: MethodId, caller: Option<(JvmsId, &JvmState)>, max_locals: u32, max_stack: u32) -> Self {
        let locoff = TypeFunc::PARMS as u32;
        let stkoff = locoff + max_locals;
        let monoff = stkoff + max_stack;
        JvmState {
            caller: caller.map(|(id, _)| id),
            depth: 1 + caller.map_or(0, |(_, c)| c.depth),
            locoff,
            stkoff,
            monoff,
            scloff: monoff,
            endoff: monoff,
            sp: 0,
            bci: INVOCATION_ENTRY_BCI,
            reexecute: Reexecute::Undefined,
            method: Some(method),
            map: None,
        }
    }

    /// Method-less root state with only an expression stack.
    pub fn synthetic(stack_size: u32) -> Self {
        let off = TypeFunc::PARMS as u32;
        JvmState {
            caller: None,
            depth: 1,
            locoff: off,
            stkoff: off,
            monoff: off + stack_size,
            scloff: off + stack_size,
            endoff: off + stack_size,
            sp: 0,
            bci: INVOCATION_ENTRY_BCI,
            reexecute: Reexecute::Undefined,
            method: None,
            map: None,
        }
    }

    #[inline]
    pub fn caller(&self) -> Option<JvmsId> {
        self.caller
    }

    #[inline]
    pub fn depth(&self) -> u32 {
        self.depth
    }

    #[inline]
    pub fn method(&self) -> Option<MethodId> {
        self.method
    }

    #[inline]
    pub fn has_method(&self) -> bool {
        self.method.is_some()
    }

    #[inline]
    pub fn map(&self) -> Option<NodeId> {
        self.map
    }

    #[inline]
    pub fn set_map(&mut self, map: Option<NodeId>) {
        self.map = map;
    }

    #[inline]
    pub fn bci(&self) -> i32 {
        self.bci
    }

    /// Move to another bytecode. Changing the bci forgets any reexecute
    /// decision.
    pub fn set_bci(&mut self, bci: i32) {
        if bci != self.bci {
            self.reexecute = Reexecute::Undefined;
        }
        self.bci = bci;
    }

    #[inline]
    pub fn reexecute(&self) -> Reexecute {
        self.reexecute
    }

    #[inline]
    pub fn is_reexecute_undefined(&self) -> bool {
        self.reexecute == Reexecute::Undefined
    }

    pub fn set_reexecute(&mut self, r: Reexecute) {
        self.reexecute = r;
    }

    pub fn set_should_reexecute(&mut self, yes: bool) {
        self.reexecute = if yes { Reexecute::True } else { Reexecute::False };
    }

    /// Resolved reexecute decision. Asking before it is decided is a bug.
    pub fn should_reexecute(&self) -> bool {
        debug_assert!(
            self.reexecute != Reexecute::Undefined,
            "reexecute state queried before it was resolved"
        );
        self.reexecute == Reexecute::True
    }

    // =========================================================================
    // Partition
    // =========================================================================

    #[inline]
    pub fn locoff(&self) -> u32 {
        self.locoff
    }
    #[inline]
    pub fn stkoff(&self) -> u32 {
        self.stkoff
    }
    #[inline]
    pub fn monoff(&self) -> u32 {
        self.monoff
    }
    #[inline]
    pub fn scloff(&self) -> u32 {
        self.scloff
    }
    #[inline]
    pub fn endoff(&self) -> u32 {
        self.endoff
    }
    #[inline]
    pub fn sp(&self) -> u32 {
        self.sp
    }

    /// First argument slot of a call about to be made from this frame.
    #[inline]
    pub fn argoff(&self) -> u32 {
        self.stkoff + self.sp
    }

    pub fn set_locoff(&mut self, off: u32) {
        self.locoff = off;
    }
    pub fn set_stkoff(&mut self, off: u32) {
        self.stkoff = off;
    }
    pub fn set_monoff(&mut self, off: u32) {
        self.monoff = off;
    }
    pub fn set_scloff(&mut self, off: u32) {
        self.scloff = off;
    }
    pub fn set_endoff(&mut self, off: u32) {
        self.endoff = off;
    }
    pub fn set_sp(&mut self, sp: u32) {
        self.sp = sp;
    }

    /// Collapse every partition to start at `off`.
    pub fn set_offsets(&mut self, off: u32) {
        self.locoff = off;
        self.stkoff = off;
        self.monoff = off;
        self.scloff = off;
        self.endoff = off;
    }

    #[inline]
    pub fn loc_size(&self) -> u32 {
        self.stkoff - self.locoff
    }
    #[inline]
    pub fn stk_size(&self) -> u32 {
        self.monoff - self.stkoff
    }
    #[inline]
    pub fn mon_size(&self) -> u32 {
        self.scloff - self.monoff
    }
    #[inline]
    pub fn scl_size(&self) -> u32 {
        self.endoff - self.scloff
    }

    /// Map inputs of this frame that are debug info.
    #[inline]
    pub fn debug_size(&self) -> u32 {
        self.loc_size() + self.sp + self.mon_size() + self.scl_size()
    }

    #[inline]
    pub fn debug_end(&self) -> u32 {
        self.endoff
    }

    pub fn is_loc(&self, i: u32) -> bool {
        self.locoff <= i && i < self.stkoff
    }
    pub fn is_stk(&self, i: u32) -> bool {
        self.stkoff <= i && i < self.monoff
    }
    pub fn is_mon(&self, i: u32) -> bool {
        self.monoff <= i && i < self.scloff
    }
    pub fn is_scl(&self, i: u32) -> bool {
        self.scloff <= i && i < self.endoff
    }

    // =========================================================================
    // Monitors
    // =========================================================================

    #[inline]
    pub fn nof_monitors(&self) -> u32 {
        self.mon_size() / MONITOR_EDGES
    }

    #[inline]
    pub fn monitor_box_offset(&self, idx: u32) -> u32 {
        self.monoff + idx * MONITOR_EDGES
    }

    #[inline]
    pub fn monitor_obj_offset(&self, idx: u32) -> u32 {
        self.monitor_box_offset(idx) + 1
    }

    pub fn is_monitor_box(&self, off: u32) -> bool {
        self.is_mon(off) && (off - self.monoff) % MONITOR_EDGES == 0
    }

    pub fn is_monitor_use(&self, off: u32) -> bool {
        self.is_mon(off) && (off - self.monoff) % MONITOR_EDGES == 1
    }

    /// Partition offsets are ordered.
    pub fn partition_ok(&self) -> bool {
        self.locoff <= self.stkoff
            && self.stkoff <= self.monoff
            && self.monoff <= self.scloff
            && self.scloff <= self.endoff
            && self.sp <= self.stk_size()
            && self.mon_size() % MONITOR_EDGES == 0
    }
}

// =============================================================================
// Errors
// =============================================================================

/// A malformed JVM state chain.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JvmsError {
    #[error("frame at depth {depth} has unordered offsets")]
    Partition { depth: u32 },
    #[error("frame at depth {depth} does not follow its caller's depth")]
    Depth { depth: u32 },
    #[error("frame at depth {depth} has no method but a caller")]
    MissingMethod { depth: u32 },
}

// =============================================================================
// Arena
// =============================================================================

/// Compile-lifetime storage of JVM states.
#[derive(Debug, Clone, Default)]
pub struct JvmsArena {
    states: Arena<JvmState>,
}

impl JvmsArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, state: JvmState) -> JvmsId {
        self.states.alloc(state)
    }

    #[inline]
    pub fn get(&self, id: JvmsId) -> &JvmState {
        &self.states[id]
    }

    #[inline]
    pub fn get_mut(&mut self, id: JvmsId) -> &mut JvmState {
        &mut self.states[id]
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Frame for `method` called from `caller`.
    pub fn new_method_state(
        &mut self,
        method: MethodId,
        caller: Option<JvmsId>,
        max_locals: u32,
        max_stack: u32,
    ) -> JvmsId {
        let caller = caller.map(|c| (c, *self.get(c)));
        let state = JvmState::for_method(method, caller.as_ref().map(|(id, s)| (*id, s)), max_locals, max_stack);
        self.alloc(state)
    }

    /// Frames from `id` out to the root.
    pub fn chain(&self, id: JvmsId) -> impl Iterator<Item = JvmsId> + '_ {
        std::iter::successors(Some(id), move |&j| self.get(j).caller)
    }

    /// The ancestor (or self) at depth `d`.
    pub fn of_depth(&self, id: JvmsId, d: u32) -> Option<JvmsId> {
        self.chain(id).find(|&j| self.get(j).depth == d)
    }

    /// Sum of debug sizes over the whole chain.
    pub fn debug_depth(&self, id: JvmsId) -> u32 {
        self.chain(id).map(|j| self.get(j).debug_size()).sum()
    }

    /// First debug slot of the chain: the root frame's locals.
    pub fn debug_start(&self, id: JvmsId) -> u32 {
        self.chain(id).last().map_or(0, |j| self.get(j).locoff)
    }

    /// Monitors held by this frame and all its callers.
    pub fn monitor_depth(&self, id: JvmsId) -> u32 {
        self.chain(id).map(|j| self.get(j).nof_monitors()).sum()
    }

    /// Same depth, and at every depth the same method and bci.
    pub fn same_calls_as(&self, a: JvmsId, b: JvmsId) -> bool {
        let (mut p, mut q) = (Some(a), Some(b));
        loop {
            match (p, q) {
                (None, None) => return true,
                (Some(x), Some(y)) => {
                    if x == y {
                        return true;
                    }
                    let (sx, sy) = (self.get(x), self.get(y));
                    if sx.depth != sy.depth || sx.method != sy.method || sx.bci != sy.bci {
                        return false;
                    }
                    p = sx.caller;
                    q = sy.caller;
                }
                _ => return false,
            }
        }
    }

    /// New link with the same fields and the same caller.
    pub fn clone_shallow(&mut self, id: JvmsId) -> JvmsId {
        let copy = *self.get(id);
        self.alloc(copy)
    }

    /// Duplicate the whole chain.
    pub fn clone_deep(&mut self, id: JvmsId) -> JvmsId {
        let head = self.clone_shallow(id);
        let mut p = head;
        while let Some(caller) = self.get(p).caller {
            let c = self.clone_shallow(caller);
            self.get_mut(p).caller = Some(c);
            p = c;
        }
        head
    }

    /// Point every frame of the chain at `map`.
    pub fn set_map_deep(&mut self, id: JvmsId, map: Option<NodeId>) {
        let frames: Vec<_> = self.chain(id).collect();
        for j in frames {
            self.get_mut(j).map = map;
        }
    }

    /// Shift every frame's partition by `delta` slots.
    pub fn adapt_position(&mut self, id: JvmsId, delta: i32) {
        let frames: Vec<_> = self.chain(id).collect();
        let shift = |v: u32| (v as i64 + delta as i64) as u32;
        for j in frames {
            let s = self.get_mut(j);
            s.locoff = shift(s.locoff);
            s.stkoff = shift(s.stkoff);
            s.monoff = shift(s.monoff);
            s.scloff = shift(s.scloff);
            s.endoff = shift(s.endoff);
        }
    }

    /// Attach `id` to safepoint `map` and `map` to `id`.
    pub fn bind_map(&mut self, graph: &mut Graph, id: JvmsId, map: NodeId) {
        if let Some(sfpt) = graph.node_mut(map).as_safepoint_mut() {
            sfpt.jvms = Some(id);
        }
        self.get_mut(id).map = Some(map);
    }

    /// Check every frame's partition and depth linkage.
    pub fn verify(&self, id: JvmsId) -> Result<(), JvmsError> {
        for j in self.chain(id) {
            let s = self.get(j);
            if !s.partition_ok() {
                return Err(JvmsError::Partition { depth: s.depth });
            }
            match s.caller {
                Some(c) => {
                    if self.get(c).depth + 1 != s.depth {
                        return Err(JvmsError::Depth { depth: s.depth });
                    }
                    if s.method.is_none() {
                        return Err(JvmsError::MissingMethod { depth: s.depth });
                    }
                }
                None if s.depth != 1 => return Err(JvmsError::Depth { depth: s.depth }),
                None => {}
            }
        }
        Ok(())
    }

    /// Printable view of a chain, youngest frame first.
    pub fn display(&self, id: JvmsId) -> ChainDisplay<'_> {
        ChainDisplay { arena: self, id }
    }
}

/// Display adapter for a JVM state chain.
pub struct ChainDisplay<'a> {
    arena: &'a JvmsArena,
    id: JvmsId,
}

impl fmt::Display for ChainDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for j in self.arena.chain(self.id) {
            let s = self.arena.get(j);
            match s.method {
                Some(m) => write!(f, "{} @ bci:{}", m, s.bci)?,
                None => write!(f, "<synthetic>")?,
            }
            match s.reexecute {
                Reexecute::True => write!(f, " (reexecute)")?,
                Reexecute::Undefined => write!(f, " (reexecute?)")?,
                Reexecute::False => {}
            }
            if s.caller.is_some() {
                writeln!(f)?;
            }
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
