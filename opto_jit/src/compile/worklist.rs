//! Compile-wide node lists.
//!
//! Macro and expensive nodes are kept in insertion order. Calls that a
//! generator may revisit are tracked in three late-inline queues plus the
//! parked set; each such call maps to its generator through
//! `call_generators`. A call is in at most one queue or the parked set.

use crate::inline::{CallGenerator, GenId};
use crate::ir::node::NodeId;

use super::Compile;

impl Compile {
    // =========================================================================
    // Macro and Expensive Nodes
    // =========================================================================

    pub fn add_macro_node(&mut self, n: NodeId) {
        self.macro_nodes.push(n);
    }

    pub fn remove_macro_node(&mut self, n: NodeId) {
        self.macro_nodes.remove(n);
    }

    pub fn macro_count(&self) -> usize {
        self.macro_nodes.len()
    }

    pub fn macro_nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.macro_nodes.iter()
    }

    pub fn add_expensive_node(&mut self, n: NodeId) {
        self.expensive_nodes.push(n);
    }

    pub fn remove_expensive_node(&mut self, n: NodeId) {
        self.expensive_nodes.remove(n);
    }

    pub fn expensive_count(&self) -> usize {
        self.expensive_nodes.len()
    }

    // =========================================================================
    // Generator Side Table
    // =========================================================================

    fn register_generator(&mut self, call: NodeId, generator: CallGenerator) -> GenId {
        if let Some(old) = self.call_generators.remove(&call) {
            self.generators.free(old);
        }
        let gid = self.generators.alloc(generator);
        self.call_generators.insert(call, gid);
        gid
    }

    /// Generator recorded for `call`.
    pub fn generator_of(&self, call: NodeId) -> Option<&CallGenerator> {
        self.call_generators.get(&call).map(|&gid| &self.generators[gid])
    }

    pub fn generator_of_mut(&mut self, call: NodeId) -> Option<&mut CallGenerator> {
        let gid = *self.call_generators.get(&call)?;
        self.generators.get_mut(gid)
    }

    /// Forget the generator of `call` and hand it back.
    pub fn take_generator(&mut self, call: NodeId) -> Option<CallGenerator> {
        let gid = self.call_generators.remove(&call)?;
        self.parked_calls.remove(call);
        self.generators.free(gid)
    }

    pub fn generator_count(&self) -> usize {
        self.call_generators.len()
    }

    // =========================================================================
    // Late-Inline Queues
    // =========================================================================

    /// Queue `call` right after the call currently being processed.
    pub fn add_late_inline(&mut self, call: NodeId, generator: CallGenerator) {
        self.register_generator(call, generator);
        let pos = self.late_inlines_pos.min(self.late_inlines.len());
        self.late_inlines.insert(pos, call);
        self.late_inlines_pos = pos + 1;
    }

    /// Move a parked call to the front of the late-inline queue.
    pub fn prepend_late_inline(&mut self, call: NodeId) {
        debug_assert!(self.call_generators.contains_key(&call), "{} has no generator", call);
        self.parked_calls.remove(call);
        self.late_inlines.insert(0, call);
    }

    pub fn add_string_late_inline(&mut self, call: NodeId, generator: CallGenerator) {
        self.register_generator(call, generator);
        self.string_late_inlines.push(call);
    }

    pub fn add_boxing_late_inline(&mut self, call: NodeId, generator: CallGenerator) {
        self.register_generator(call, generator);
        self.boxing_late_inlines.push(call);
    }

    /// Leave `call` waiting for its inputs to sharpen.
    pub fn park_call(&mut self, call: NodeId, generator: CallGenerator) {
        self.register_generator(call, generator);
        self.parked_calls.push(call);
    }

    /// Park a call whose generator is already registered.
    pub(crate) fn repark_call(&mut self, call: NodeId) {
        debug_assert!(self.call_generators.contains_key(&call), "{} has no generator", call);
        self.parked_calls.push(call);
    }

    pub fn late_inline_count(&self) -> usize {
        self.late_inlines.len()
    }

    pub fn late_inlines(&self) -> &[NodeId] {
        &self.late_inlines
    }

    pub fn string_late_inline_count(&self) -> usize {
        self.string_late_inlines.len()
    }

    pub fn boxing_late_inline_count(&self) -> usize {
        self.boxing_late_inlines.len()
    }

    pub fn parked_calls(&self) -> Vec<NodeId> {
        self.parked_calls.iter().collect()
    }

    pub fn is_parked(&self, call: NodeId) -> bool {
        self.parked_calls.member(call)
    }

    pub(crate) fn late_inline_at(&self, i: usize) -> Option<NodeId> {
        self.late_inlines.get(i).copied()
    }

    pub(crate) fn set_late_inlines_pos(&mut self, pos: usize) {
        self.late_inlines_pos = pos;
    }

    /// Drop the first `pos` queue entries and rewind the cursor.
    pub(crate) fn retire_late_inlines(&mut self, pos: usize) {
        let pos = pos.min(self.late_inlines.len());
        self.late_inlines.drain(..pos);
        self.late_inlines_pos = 0;
    }

    pub(crate) fn pop_string_late_inline(&mut self) -> Option<NodeId> {
        self.string_late_inlines.pop()
    }

    pub(crate) fn pop_boxing_late_inline(&mut self) -> Option<NodeId> {
        self.boxing_late_inlines.pop()
    }

    // =========================================================================
    // Forgetting Nodes
    // =========================================================================

    /// Drop `n` from every list and the side table.
    pub(crate) fn forget_node(&mut self, n: NodeId) {
        self.macro_nodes.remove(n);
        self.expensive_nodes.remove(n);
        self.igvn_worklist.remove(n);
        if self.call_generators.contains_key(&n) {
            self.take_generator(n);
            self.late_inlines.retain(|&c| c != n);
            self.string_late_inlines.retain(|&c| c != n);
            self.boxing_late_inlines.retain(|&c| c != n);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ci::{MethodId, MethodRegistry};
    use crate::compile::CompileOptions;
    use crate::ir::types::{BasicType, TypeFunc};
    use std::sync::Arc;

    fn compile() -> Compile {
        Compile::new(Arc::new(MethodRegistry::new()), MethodId(0), CompileOptions::default())
    }

    fn call(c: &mut Compile) -> NodeId {
        let tf = TypeFunc::new(&[], BasicType::Void);
        c.graph.make_static_java_call(tf, MethodId(0))
    }

    #[test]
    fn test_add_late_inline_follows_cursor() {
        let mut c = compile();
        let (a, b, d) = (call(&mut c), call(&mut c), call(&mut c));
        let g = CallGenerator::for_direct_call(MethodId(0), true);
        c.add_late_inline(a, g.clone());
        c.add_late_inline(b, g.clone());
        assert_eq!(c.late_inlines(), &[a, b]);

        // Processing `a`: a new entry lands right after it.
        c.set_late_inlines_pos(1);
        c.add_late_inline(d, g);
        assert_eq!(c.late_inlines(), &[a, d, b]);
        c.retire_late_inlines(2);
        assert_eq!(c.late_inlines(), &[b]);
    }

    #[test]
    fn test_prepend_unparks() {
        let mut c = compile();
        let (a, b) = (call(&mut c), call(&mut c));
        let g = CallGenerator::for_direct_call(MethodId(0), true);
        c.add_late_inline(a, g.clone());
        c.park_call(b, g);
        assert!(c.is_parked(b));
        c.prepend_late_inline(b);
        assert!(!c.is_parked(b));
        assert_eq!(c.late_inlines(), &[b, a]);
        assert_eq!(c.generator_count(), 2);
    }

    #[test]
    fn test_forget_node_clears_everything() {
        let mut c = compile();
        let a = call(&mut c);
        c.add_macro_node(a);
        c.add_boxing_late_inline(a, CallGenerator::for_direct_call(MethodId(0), false));
        c.record_for_igvn(a);
        c.forget_node(a);
        assert_eq!(c.macro_count(), 0);
        assert_eq!(c.boxing_late_inline_count(), 0);
        assert_eq!(c.generator_count(), 0);
        assert!(!c.igvn_worklist.member(a));
    }
}
