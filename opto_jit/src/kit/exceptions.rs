//! Exception states.
//!
//! An exception state is a stopped map whose control is the throwing path
//! and whose thrown oop is saved as one extra input past the debug info.
//! States with the same exception type are merged as they are added.

use crate::ir::node::NodeId;
use crate::ir::types::Type;
use crate::jvms::JvmsId;

use super::GraphKit;

impl GraphKit<'_> {
    pub fn has_exceptions(&self) -> bool {
        !self.exceptions.is_empty()
    }

    pub fn exception_count(&self) -> usize {
        self.exceptions.len()
    }

    /// Turn the current map into an exception state throwing `ex_oop`.
    ///
    /// The kit stops.
    pub fn make_exception_state(&mut self, ex_oop: NodeId) -> Option<NodeId> {
        self.sync_jvms();
        let ex_map = self.stop()?;
        let state = *self.c.jvms.get(self.jvms);
        self.c.graph.set_saved_ex_oop(ex_map, &state, ex_oop);
        Some(ex_map)
    }

    /// Record a pending exception state.
    ///
    /// A state whose control is dead is dropped. A state throwing the same
    /// exception type as a pending one is merged into it.
    pub fn add_exception_state(&mut self, ex_map: Option<NodeId>) {
        let Some(ex_map) = ex_map else {
            return;
        };
        if self
            .c
            .graph
            .control(ex_map)
            .map_or(true, |c| self.c.graph.is_top(c))
        {
            return;
        }
        let ex_type = self.saved_ex_type(ex_map);
        let same = self
            .exceptions
            .iter()
            .position(|&e| self.saved_ex_type(e) == ex_type);
        match same {
            Some(i) => {
                let phi_map = self.exceptions[i];
                self.combine_exception_states(ex_map, phi_map);
            }
            None => self.exceptions.push(ex_map),
        }
    }

    fn saved_ex_type(&self, ex_map: NodeId) -> Option<Type> {
        let j = self.c.graph.sfpt(ex_map).jvms?;
        let state = self.c.jvms.get(j);
        self.c
            .graph
            .saved_ex_oop(ex_map, state)
            .map(|ex| self.c.graph.ty(ex).clone())
    }

    /// Take over the exception states chained on the map of `jvms`.
    pub fn add_exception_states_from(&mut self, jvms: JvmsId) {
        let Some(map) = self.c.jvms.get(jvms).map() else {
            return;
        };
        let mut next = self.c.graph.sfpt_mut(map).next_exception.take();
        while let Some(ex) = next {
            next = self.c.graph.sfpt_mut(ex).next_exception.take();
            self.add_exception_state(Some(ex));
        }
    }

    pub fn pop_exception_state(&mut self) -> Option<NodeId> {
        self.exceptions.pop()
    }

    /// Merge `ex_map` into `phi_map`: a region joins the two throwing
    /// paths and phis join every slot that differs, saved oop included.
    /// `ex_map` dies.
    pub fn combine_exception_states(&mut self, ex_map: NodeId, phi_map: NodeId) {
        let saved = self.preserve(false);
        self.set_map(Some(phi_map));
        self.sp = self.state().sp();
        self.merge_paths(&[ex_map]);

        let ex_replaced = self.c.graph.sfpt(ex_map).replaced_nodes.clone();
        self.c
            .graph
            .sfpt_mut(phi_map)
            .replaced_nodes
            .merge_with(&ex_replaced);
        self.c.graph.disconnect_inputs(ex_map);
        self.restore(saved);
    }

    /// Merge every pending state into one and hand it out.
    pub fn combine_and_pop_all_exception_states(&mut self) -> Option<NodeId> {
        let phi_map = self.pop_exception_state()?;
        while let Some(ex_map) = self.pop_exception_state() {
            self.combine_exception_states(ex_map, phi_map);
        }
        Some(phi_map)
    }

    /// Continue on exception state `phi_map` and return its thrown oop.
    pub fn use_exception_state(&mut self, phi_map: NodeId) -> NodeId {
        if self.c.failing() {
            self.stop();
            return self.top();
        }
        self.set_map(Some(phi_map));
        let state = self.state();
        self.sp = state.sp();
        self.c
            .graph
            .clear_saved_ex_oop(phi_map, &state)
            .unwrap_or_else(|| self.top())
    }

    /// Hand back the exit state with the pending exception states chained
    /// on its map.
    ///
    /// With no map left, a scratch map is made from one of the exception
    /// states, or from scratch, with dead control.
    pub fn transfer_exceptions_into_jvms(&mut self) -> JvmsId {
        if self.map.is_none() {
            if let Some(&first) = self.exceptions.first() {
                self.set_map(Some(first));
                let scratch = self.clone_map();
                self.set_map(scratch);
                if let Some(m) = scratch {
                    let state = self.state();
                    self.sp = state.sp();
                    self.c.graph.clear_saved_ex_oop(m, &state);
                }
            } else {
                let j = self.c.jvms.clone_shallow(self.jvms);
                let size = self.c.jvms.get(j).endoff() as usize;
                let map = self.c.graph.make_safepoint(size, j);
                let top = self.top();
                for i in 0..size {
                    self.c.graph.init_req(map, i, Some(top));
                }
                self.c.jvms.bind_map(&mut self.c.graph, j, map);
                self.set_jvms(j);
                self.set_all_memory(top);
            }
            let top = self.top();
            self.set_control(top);
        }

        let jvms = self.sync_jvms();
        let map = self.map_not_null();
        debug_assert!(
            self.c.graph.sfpt(map).next_exception.is_none(),
            "exit map already carries exceptions"
        );
        let mut next = None;
        for ex in self.exceptions.drain(..).rev() {
            self.c.graph.sfpt_mut(ex).next_exception = next;
            next = Some(ex);
        }
        self.c.graph.sfpt_mut(map).next_exception = next;
        jvms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::operators::NodeKind;
    use crate::kit::tests::entry_compile;

    /// Throw `ex` from a copy of the current path.
    fn throw(kit: &mut GraphKit<'_>, ex: NodeId) {
        let saved = kit.preserve(true);
        let ex_state = kit.make_exception_state(ex);
        kit.add_exception_state(ex_state);
        kit.restore(saved);
    }

    #[test]
    fn test_same_type_states_combine() {
        let (mut c, j, _) = entry_compile();
        let mut kit = GraphKit::new(&mut c, j);
        let ex = kit.local(1);
        throw(&mut kit, ex);
        let k = kit.intcon(3);
        kit.set_local(0, k);
        throw(&mut kit, ex);
        assert_eq!(kit.exception_count(), 1);

        let phi_map = kit.combine_and_pop_all_exception_states().unwrap();
        let oop = kit.use_exception_state(phi_map);
        assert_eq!(oop, ex);
        assert!(kit.c.graph.node(kit.control()).is_region());
        assert!(kit.c.graph.node(kit.local(0)).is_phi());
    }

    #[test]
    fn test_different_types_stay_apart() {
        let (mut c, j, _) = entry_compile();
        let mut kit = GraphKit::new(&mut c, j);
        let a = kit.local(1);
        throw(&mut kit, a);
        let b = kit.make(NodeKind::CastPP, Type::oop(None).cast_to_not_null(), &[None, Some(a)]);
        throw(&mut kit, b);
        assert_eq!(kit.exception_count(), 2);
    }

    #[test]
    fn test_exceptions_travel_on_exit_state() {
        let (mut c, j, _) = entry_compile();
        let exit = {
            let mut kit = GraphKit::new(&mut c, j);
            let ex = kit.local(1);
            throw(&mut kit, ex);
            kit.transfer_exceptions_into_jvms()
        };
        let kit = GraphKit::new(&mut c, exit);
        assert_eq!(kit.exception_count(), 1);
        assert!(!kit.stopped());
    }

    #[test]
    fn test_transfer_without_map_builds_scratch_state() {
        let (mut c, j, _) = entry_compile();
        let mut kit = GraphKit::new(&mut c, j);
        kit.stop();
        let exit = kit.transfer_exceptions_into_jvms();
        let map = kit.c.jvms.get(exit).map().unwrap();
        assert!(kit.stopped());
        assert_eq!(kit.c.graph.req(map), kit.c.jvms.get(exit).endoff() as usize);
    }
}
