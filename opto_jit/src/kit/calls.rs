//! Wiring of Java calls: fixed inputs, arguments, debug info, result
//! projections, and splicing an inlined body in place of a call.

use crate::ir::node::NodeId;
use crate::ir::types::{Type, TypeFunc};
use crate::jvms::{ReplacedNodes, Reexecute};

use super::GraphKit;

impl GraphKit<'_> {
    // =========================================================================
    // Call Inputs
    // =========================================================================

    /// Copy the outgoing arguments into the call's parameter slots.
    pub fn set_arguments_for_java_call(&mut self, call: NodeId) {
        let nargs = self.c.graph.call(call).tf.arg_slots();
        for i in 0..nargs {
            let arg = self.argument(i as u32);
            self.c.graph.init_req(call, TypeFunc::PARMS + i, Some(arg));
        }
    }

    /// Hook `call` into the current control, io and memory, attach debug
    /// info, and continue from the call's projections.
    pub fn set_edges_for_java_call(&mut self, call: NodeId, separate_io_proj: bool) {
        let ctrl = self.control();
        let io = self.i_o();
        let mem = self.reset_memory();
        let fp = self.frameptr();
        let top = self.top();
        self.c.graph.init_req(call, TypeFunc::CONTROL, Some(ctrl));
        self.c.graph.init_req(call, TypeFunc::I_O, Some(io));
        self.c.graph.init_req(call, TypeFunc::MEMORY, Some(mem));
        self.c.graph.init_req(call, TypeFunc::FRAME_PTR, Some(fp));
        self.c.graph.init_req(call, TypeFunc::RETURN_ADR, Some(top));

        self.add_safepoint_edges(call, false);

        let ctrl = self
            .c
            .graph
            .make_proj(call, TypeFunc::CONTROL as u32, false, Type::Control);
        self.set_control(ctrl);
        let io = self
            .c
            .graph
            .make_proj(call, TypeFunc::I_O as u32, separate_io_proj, Type::Abio);
        self.set_i_o(io);
        self.set_all_memory_call(call, separate_io_proj);
    }

    /// Append the debug info of every frame to `call`.
    ///
    /// The call gets a deep copy of the JVM state chain whose partitions
    /// index into the call's own inputs, laid out from the outermost frame.
    /// Each frame's values come from that frame's map, top where the map
    /// is gone. Only the live part of each expression stack is kept.
    /// With `reexecute_youngest` the youngest frame re-executes its
    /// bytecode; every other undecided frame does not.
    pub fn add_safepoint_edges(&mut self, call: NodeId, reexecute_youngest: bool) {
        let youngest = self.sync_jvms();
        let depth = self.c.jvms.debug_depth(youngest);
        let top = self.top();
        let debug_start = self.c.graph.req(call);
        self.c.graph.add_req_batch(call, Some(top), depth as usize);

        let out = self.c.jvms.clone_deep(youngest);
        let frames_in: Vec<_> = self.c.jvms.chain(youngest).collect();
        let frames_out: Vec<_> = self.c.jvms.chain(out).collect();

        let mut p = debug_start as u32;
        for (&jin, &jout) in frames_in.iter().zip(&frames_out).rev() {
            let s = *self.c.jvms.get(jin);
            let in_map = if jin == youngest { self.map } else { s.map() };
            let mut o = *self.c.jvms.get(jout);

            o.set_locoff(p);
            p = self.copy_debug_slots(call, in_map, s.locoff(), s.loc_size(), p);
            o.set_stkoff(p);
            p = self.copy_debug_slots(call, in_map, s.stkoff(), s.sp(), p);
            o.set_monoff(p);
            p = self.copy_debug_slots(call, in_map, s.monoff(), s.mon_size(), p);
            o.set_scloff(p);
            p = self.copy_debug_slots(call, in_map, s.scloff(), s.scl_size(), p);
            o.set_endoff(p);

            if jin == youngest && reexecute_youngest {
                o.set_reexecute(Reexecute::True);
            } else if o.is_reexecute_undefined() {
                o.set_reexecute(Reexecute::False);
            }
            *self.c.jvms.get_mut(jout) = o;
        }
        debug_assert_eq!(p as usize, self.c.graph.req(call), "debug info does not fill the call");

        self.c.jvms.set_map_deep(out, Some(call));
        self.c.graph.sfpt_mut(call).jvms = Some(out);
    }

    fn copy_debug_slots(&mut self, call: NodeId, map: Option<NodeId>, from: u32, count: u32, to: u32) -> u32 {
        let top = self.top();
        for k in 0..count {
            let v = map
                .and_then(|m| self.c.graph.input(m, (from + k) as usize))
                .unwrap_or(top);
            self.c.graph.set_req(call, (to + k) as usize, Some(v));
        }
        to + count
    }

    // =========================================================================
    // Call Results
    // =========================================================================

    /// Take the call's result and split off its exceptional path.
    ///
    /// Returns the result projection, or top for a void call.
    pub fn set_results_for_java_call(&mut self, call: NodeId, separate_io_proj: bool) -> NodeId {
        if self.stopped() {
            return self.top();
        }
        let range = self.c.graph.call(call).tf.range.clone();
        let ret = match range {
            Some(ty) => self
                .c
                .graph
                .make_proj(call, TypeFunc::PARMS as u32, false, ty),
            None => self.top(),
        };

        self.make_slow_call_ex(call, separate_io_proj);

        if separate_io_proj {
            // The fall-through path gets its own io and memory.
            let io = self
                .c
                .graph
                .make_proj(call, TypeFunc::I_O as u32, false, Type::Abio);
            self.set_i_o(io);
            self.set_all_memory_call(call, false);
        }
        ret
    }

    /// Split control after `call` into the normal path, where the kit
    /// continues, and an exceptional path that becomes an exception state.
    pub fn make_slow_call_ex(&mut self, call: NodeId, separate_io_proj: bool) {
        if self.stopped() {
            return;
        }
        let ctrl = self.control();
        let io = self
            .c
            .graph
            .make_proj(call, TypeFunc::I_O as u32, separate_io_proj, Type::Abio);
        let ex_type = Type::oop(None).cast_to_not_null();
        let shape = self.c.graph.make_catch_shape(ctrl, io, ex_type);

        let saved = self.preserve(true);
        self.set_control(shape.catch_all);
        self.set_i_o(io);
        let ex_state = self.make_exception_state(shape.ex_oop);
        self.add_exception_state(ex_state);
        self.restore(saved);

        self.set_control(shape.fall_through);
    }

    // =========================================================================
    // Call Replacement
    // =========================================================================

    /// Splice the state the kit ends in over `call`.
    ///
    /// The call's fall-through projections are redirected to the final
    /// control, memory and io; its result to `result`. Its exceptional
    /// projections take the combined exception state, or top when the
    /// body cannot throw. The call is then cut out of the graph. With
    /// `do_replaced_nodes`, improvements the body recorded are pushed to
    /// the uses sitting on each exit.
    pub fn replace_call(&mut self, call: NodeId, result: Option<NodeId>, do_replaced_nodes: bool) {
        let top = self.top();
        let exceptions = std::mem::take(&mut self.exceptions);
        let final_state = self.stop();
        let mut replaced = ReplacedNodes::default();
        let (final_ctl, final_mem, final_io) = match final_state {
            Some(m) => {
                replaced = self.c.graph.sfpt(m).replaced_nodes.clone();
                (
                    self.c.graph.control(m).unwrap_or(top),
                    self.c.graph.memory(m).unwrap_or(top),
                    self.c.graph.i_o(m).unwrap_or(top),
                )
            }
            None => (top, top, top),
        };

        let projs = self.c.graph.extract_projections(call, true, false);
        if let Some(p) = projs.fallthrough_catchproj {
            self.c.gvn_replace_by(p, final_ctl);
        }
        if let Some(p) = projs.fallthrough_memproj {
            self.c.gvn_replace_by(p, final_mem);
        }
        if let Some(p) = projs.fallthrough_ioproj {
            self.c.gvn_replace_by(p, final_io);
        }
        if let (Some(p), Some(r)) = (projs.resproj, result) {
            self.c.gvn_replace_by(p, r);
        }

        let mut replaced_ex = ReplacedNodes::default();
        let mut ex_ctl = top;
        if exceptions.is_empty() {
            for p in [
                projs.catchall_catchproj,
                projs.catchall_memproj,
                projs.catchall_ioproj,
                projs.exobj,
            ]
            .into_iter()
            .flatten()
            {
                self.c.gvn_replace_by(p, top);
            }
        } else {
            self.exceptions = exceptions;
            if let Some(ex_map) = self.combine_and_pop_all_exception_states() {
                replaced_ex = self.c.graph.sfpt(ex_map).replaced_nodes.clone();
                let ex_oop = self.use_exception_state(ex_map);
                if let Some(p) = projs.catchall_catchproj {
                    ex_ctl = self.control();
                    self.c.gvn_replace_by(p, ex_ctl);
                }
                if let Some(p) = projs.catchall_memproj {
                    let mem = self.reset_memory();
                    self.c.gvn_replace_by(p, mem);
                }
                if let Some(p) = projs.catchall_ioproj {
                    let io = self.i_o();
                    self.c.gvn_replace_by(p, io);
                }
                if let Some(p) = projs.exobj {
                    self.c.gvn_replace_by(p, ex_oop);
                }
                self.stop();
            }
        }

        self.c.graph.disconnect_inputs(call);
        self.c.gvn_replace_by(call, top);
        self.c.remove_macro_node(call);

        if do_replaced_nodes {
            self.apply_replaced_nodes_at(&replaced, final_ctl);
            self.apply_replaced_nodes_at(&replaced_ex, ex_ctl);
        }
        tracing::trace!(call = %call, "replaced call");
    }

    /// Redirect uses of each replaced node that hang directly off `ctl`.
    fn apply_replaced_nodes_at(&mut self, replaced: &ReplacedNodes, ctl: NodeId) {
        if self.c.graph.is_top(ctl) {
            return;
        }
        for (initial, improved) in replaced.iter() {
            if !self.c.graph.contains(initial) || !self.c.graph.contains(improved) {
                continue;
            }
            let users: Vec<NodeId> = self.c.graph.outs(initial).to_vec();
            for u in users {
                if u == improved
                    || self.c.graph.input(u, 0) != Some(ctl)
                    || self.c.graph.find_edge(improved, u).is_some()
                {
                    continue;
                }
                let was_hashed = self.c.graph.hash_delete(u);
                self.c.graph.replace_edge(u, initial, Some(improved));
                if was_hashed {
                    self.c.graph.hash_find_insert(u);
                }
                self.c.record_for_igvn(u);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ci::MethodId;
    use crate::ir::operators::NodeKind;
    use crate::ir::types::BasicType;
    use crate::kit::tests::entry_compile;

    /// Push the two locals as arguments and emit a static call taking them.
    fn emit_call(kit: &mut GraphKit<'_>, separate_io_proj: bool) -> (NodeId, NodeId) {
        let a = kit.local(0);
        let b = kit.local(1);
        kit.push(a);
        kit.push(b);
        kit.dec_sp(2);
        let tf = TypeFunc::new(&[BasicType::Int, BasicType::Object], BasicType::Int);
        let call = kit.c.graph.make_static_java_call(tf, MethodId(0));
        kit.set_arguments_for_java_call(call);
        kit.set_edges_for_java_call(call, separate_io_proj);
        let ret = kit.set_results_for_java_call(call, separate_io_proj);
        (call, ret)
    }

    #[test]
    fn test_call_debug_info_is_complete() {
        let (mut c, j, _) = entry_compile();
        let mut kit = GraphKit::new(&mut c, j);
        let a = kit.local(0);
        let (call, ret) = emit_call(&mut kit, false);

        assert_eq!(kit.c.graph.input(call, TypeFunc::PARMS), Some(a));
        assert!(matches!(kit.c.graph.kind(ret), NodeKind::Proj { con: 5, .. }));
        let cj = kit.c.graph.node(call).jvms().unwrap();
        assert_ne!(cj, j);
        let s = *kit.c.jvms.get(cj);
        assert_eq!(s.locoff() as usize, TypeFunc::PARMS + 2);
        assert_eq!(s.stk_size(), 0);
        assert!(!s.should_reexecute());
        assert!(kit.c.verify_debug_info(call).is_ok());
        // The kit's own state is untouched.
        assert!(kit.state().is_reexecute_undefined());
    }

    #[test]
    fn test_call_splits_exception_path() {
        let (mut c, j, _) = entry_compile();
        let mut kit = GraphKit::new(&mut c, j);
        emit_call(&mut kit, true);

        assert!(kit.has_exceptions());
        assert!(matches!(
            kit.c.graph.kind(kit.control()),
            NodeKind::CatchProj { con: 0, .. }
        ));
        // The fall-through path has plain projections.
        let io = kit.i_o();
        assert!(matches!(kit.c.graph.kind(io), NodeKind::Proj { io_use: false, .. }));
        assert!(kit.c.graph.verify().is_ok());
    }

    #[test]
    fn test_replace_call_splices_body() {
        let (mut c, j, _) = entry_compile();
        let (call, ret, user, halt, before) = {
            let mut kit = GraphKit::new(&mut c, j);
            // The body will continue from the state before the call.
            let pre = kit.clone_map().unwrap();
            let before = kit.c.graph.sfpt(pre).jvms.unwrap();
            let (call, ret) = emit_call(&mut kit, true);
            let user = kit.make(NodeKind::ConvL2I, Type::INT, &[None, Some(ret)]);
            let ctrl = kit.control();
            let halt = kit.c.graph.add_node(NodeKind::Halt, Type::Control, &[Some(ctrl)]);
            let root = kit.c.root();
            kit.c.graph.add_req(root, Some(halt));
            (call, ret, user, halt, before)
        };
        assert_eq!(c.graph.input(user, 1), Some(ret));
        let entry_ctrl = c.graph.control(c.jvms.get(before).map().unwrap());

        let mut kit = GraphKit::new(&mut c, before);
        let value = kit.intcon(11);
        kit.replace_call(call, Some(value), true);

        assert_eq!(c.graph.input(user, 1), Some(value));
        assert_eq!(c.graph.input(halt, 0), entry_ctrl);
        assert!(c.graph.is_dead(call));
        assert_eq!(c.graph.outcnt(call), 0);
    }
}
