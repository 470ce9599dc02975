//! Placeholder calls inlined after parsing.
//!
//! At parse time a late-inline generator emits an ordinary call and
//! records itself against it. Later, [`Compile::do_late_inline`] rebuilds
//! the JVM state the call was made from out of the call's own inputs, runs
//! the wrapped generator on it and splices the result over the call. When
//! anything declines, the call stays as a real out-of-line call.

use std::cmp::max;
use std::sync::Arc;

use crate::ci::{MethodFlags, MethodId, MethodInfo};
use crate::compile::Compile;
use crate::ir::node::NodeId;
use crate::ir::types::{Type, TypeFunc};
use crate::jvms::JvmsId;
use crate::kit::GraphKit;

use super::{direct, CallGenerator, InlineOutcome, LateFlavor};

/// Emit the placeholder call for `cg` and queue or park it.
pub(super) fn generate(c: &mut Compile, jvms: JvmsId, cg: &CallGenerator) -> Option<JvmsId> {
    let CallGenerator::LateInline { method, flavor, .. } = cg else {
        return None;
    };
    let separate_io_proj = c.options.separate_io_proj_for_late_inline;
    let (exit, call) = match flavor {
        LateFlavor::Virtual { vtable_index, .. } => {
            direct::emit_virtual(c, jvms, *method, *vtable_index, separate_io_proj)?
        }
        _ => direct::emit_direct(c, jvms, *method, separate_io_proj)?,
    };
    let Some(call) = call else {
        // The receiver check already ended the path.
        return Some(exit);
    };

    match flavor {
        LateFlavor::Generic => c.add_late_inline(call, cg.clone()),
        LateFlavor::MethodHandle {
            input_not_const: true,
            ..
        } => c.park_call(call, cg.clone()),
        LateFlavor::MethodHandle { .. } => c.add_late_inline(call, cg.clone()),
        LateFlavor::Virtual { .. } => c.park_call(call, cg.clone()),
        LateFlavor::String => c.add_string_late_inline(call, cg.clone()),
        LateFlavor::Boxing => c.add_boxing_late_inline(call, cg.clone()),
    }
    tracing::trace!(call = %call, method = %method, flavor = ?flavor, "late inline placeholder");
    Some(exit)
}

impl Compile {
    /// Inline the placeholder `call` with the generator recorded for it.
    ///
    /// Returns whether the call was removed from the graph. A call that is
    /// dead, sits on a dead path or whose generator declines is left in
    /// place; method-handle and virtual placeholders are parked again.
    pub fn do_late_inline(&mut self, call: NodeId) -> bool {
        let Some(CallGenerator::LateInline { method, flavor, .. }) = self.generator_of(call) else {
            return false;
        };
        let method = *method;
        let reparks = matches!(flavor, LateFlavor::MethodHandle { .. } | LateFlavor::Virtual { .. });

        let Some((info, jvms, map)) = self.prepare_late_inline(call, method) else {
            if reparks {
                self.repark_call(call);
            } else {
                self.take_generator(call);
            }
            return false;
        };
        let Some(CallGenerator::LateInline {
            mut flavor, inline_cg, ..
        }) = self.take_generator(call)
        else {
            return false;
        };

        let projs = self.graph.extract_projections(call, true, false);
        let pure = matches!(flavor, LateFlavor::Boxing) || info.flags.contains(MethodFlags::PURE);
        if pure && projs.resproj.is_none() {
            // Nothing reads the result.
            let top = self.top();
            GraphKit::new(self, jvms).replace_call(call, Some(top), false);
            tracing::debug!(call = %call, method = %method, "pure call with unused result removed");
            return true;
        }

        let inline_cg = match &mut flavor {
            LateFlavor::MethodHandle {
                input_not_const,
                attempted,
            } => {
                *attempted = true;
                let allow_inline = self.inlining_incrementally();
                let (cg, not_const) = CallGenerator::for_method_handle_inline(self, jvms, method, allow_inline);
                *input_not_const = not_const;
                cg
            }
            LateFlavor::Virtual {
                vtable_index,
                prof_factor,
                callee,
                attempted,
            } => {
                *attempted = true;
                self.late_devirtualize(jvms, method, *callee, *vtable_index, *prof_factor)
            }
            LateFlavor::Generic | LateFlavor::String | LateFlavor::Boxing => inline_cg.map(|cg| *cg),
        };

        let exit = match inline_cg {
            Some(cg) => cg.generate(self, jvms).filter(|_| !self.failing()),
            None => None,
        };
        let Some(exit) = exit else {
            self.graph.disconnect_inputs(map);
            if matches!(flavor, LateFlavor::MethodHandle { .. } | LateFlavor::Virtual { .. }) {
                self.park_call(
                    call,
                    CallGenerator::LateInline {
                        method,
                        flavor,
                        inline_cg: None,
                    },
                );
            }
            tracing::trace!(call = %call, method = %method, "late inline declined");
            return false;
        };

        let is_boxing = matches!(flavor, LateFlavor::Boxing);
        let mut kit = GraphKit::new(self, exit);
        let mut result = kit.top();
        if !kit.stopped() {
            result = kit.pop_node(info.signature.ret);
            if is_boxing {
                result = kit.cast_not_null(result);
            }
        }
        let stopped = kit.stopped();
        kit.c.set_inlining_progress(true);
        // The path is dead and needs cleanup.
        kit.c.set_do_cleanup(stopped);
        kit.replace_call(call, Some(result), true);
        tracing::debug!(call = %call, method = %method, "late inlined");
        true
    }

    /// Callee metadata and a fresh state for a call that is ready to be
    /// inlined.
    fn prepare_late_inline(&mut self, call: NodeId, method: MethodId) -> Option<(Arc<MethodInfo>, JvmsId, NodeId)> {
        if self.failing() || !self.late_inline_ready(call) {
            return None;
        }
        let info = self.method_info(method)?;
        let jvms = self.resynthesize_state(call)?;
        let map = self.jvms.get(jvms).map()?;
        Some((info, jvms, map))
    }

    /// The call is live, on a live path, with real memory and arguments,
    /// and none of its projections loops back into it.
    fn late_inline_ready(&self, call: NodeId) -> bool {
        let g = &self.graph;
        if !g.contains(call) || !g.is_call(call) || g.outcnt(call) == 0 {
            return false;
        }
        let ctrl = g.control(call);
        if g.is_top_or_null(ctrl) {
            return false;
        }

        let tf = &g.call(call).tf;
        for (i, ty) in tf.domain.iter().enumerate() {
            if g.is_top_or_null(g.input(call, TypeFunc::PARMS + i)) && *ty != Type::Half {
                return false;
            }
        }

        let mem = g.memory(call);
        match mem {
            None => return false,
            Some(m) if g.is_top(m) => return false,
            Some(m) if g.node(m).is_merge_mem() && g.mm_base_is_empty(m) => return false,
            _ => {}
        }

        // An unreachable loop through the call's own projections.
        let projs = g.extract_projections(call, true, false);
        let feeds = |p: Option<NodeId>, input: Option<NodeId>| p.is_some() && p == input;
        let io = g.i_o(call);
        if feeds(projs.fallthrough_catchproj, ctrl)
            || feeds(projs.catchall_catchproj, ctrl)
            || feeds(projs.fallthrough_memproj, mem)
            || feeds(projs.catchall_memproj, mem)
            || feeds(projs.fallthrough_ioproj, io)
            || feeds(projs.catchall_ioproj, io)
            || projs.resproj.is_some_and(|p| g.find_edge(call, p).is_some())
            || projs.exobj.is_some_and(|p| g.find_edge(call, p).is_some())
        {
            return false;
        }
        true
    }

    /// Rebuild the state just before `call` from its inputs.
    ///
    /// The new map copies every input of the call, gets its own split
    /// memory, and holds the call's arguments on the expression stack above
    /// the frame's stack pointer.
    fn resynthesize_state(&mut self, call: NodeId) -> Option<JvmsId> {
        let old_jvms = self.graph.node(call).jvms()?;
        let nargs = self.graph.call(call).tf.arg_slots();
        let size = self.graph.req(call);

        let jvms = self.jvms.clone_shallow(old_jvms);
        let map = self.graph.make_safepoint(size, jvms);
        for i in 0..size {
            let v = self.graph.input(call, i);
            self.graph.set_req(map, i, v);
        }
        let mem = self.graph.memory(call);
        let mm = self.graph.make_merge_mem(mem);
        self.graph.set_memory(map, Some(mm));

        let top = self.top();
        for i in 0..nargs {
            self.graph.set_req(map, TypeFunc::PARMS + i, Some(top));
        }
        self.jvms.bind_map(&mut self.graph, jvms, map);

        let mut state = *self.jvms.get(jvms);
        let max_stack = state
            .method()
            .and_then(|m| self.oracle().method(m))
            .map_or(0, |m| m.max_stack as u32);
        let needed = max(max_stack, state.sp() + nargs as u32);
        self.graph.ensure_stack(map, &mut state, needed);
        *self.jvms.get_mut(jvms) = state;

        for i in 0..nargs {
            let v = self.graph.input(call, TypeFunc::PARMS + i);
            self.graph.set_argument(map, &state, i as u32, v);
        }
        tracing::trace!(call = %call, map = %map, "late inline state");
        Some(jvms)
    }

    /// Generator for a virtual placeholder whose receiver now binds to
    /// `callee`, if the call may be strength-reduced.
    fn late_devirtualize(
        &mut self,
        jvms: JvmsId,
        method: MethodId,
        callee: Option<MethodId>,
        vtable_index: Option<u32>,
        prof_factor: f32,
    ) -> Option<CallGenerator> {
        let Some(callee) = callee else {
            self.print_inlining(
                method,
                jvms,
                InlineOutcome::Failure,
                "late call devirtualization failed (receiver not exact)",
            );
            return None;
        };
        let state = *self.jvms.get(jvms);
        let receiver = state.map().and_then(|m| self.graph.argument(m, &state, 0))?;
        if self.graph.ty(receiver).maybe_null() {
            // Implicit null checks break when exception states are combined.
            self.print_inlining(
                method,
                jvms,
                InlineOutcome::Failure,
                "late call devirtualization failed (receiver may be null)",
            );
            return None;
        }

        // Without inlining the call still becomes a direct one.
        let allow_inline = self.inlining_incrementally();
        let target = self.method_info(callee)?;
        let holder_is_interface = self
            .oracle()
            .klass(target.holder)
            .is_some_and(|k| k.is_interface);
        if !allow_inline && holder_is_interface {
            self.print_inlining(
                method,
                jvms,
                InlineOutcome::Failure,
                "late call devirtualization failed (interface call)",
            );
            return None;
        }
        Some(self.call_generator(callee, vtable_index, false, jvms, allow_inline, prof_factor, None, true))
    }
}

#[cfg(test)]
mod tests {
    use crate::ci::{MethodFlags, MethodId};
    use crate::compile::{Compile, CompileOptions};
    use crate::inline::tests::{call_state, fixture, Doubler};
    use crate::inline::{CallGenerator, LateFlavor};
    use crate::ir::node::NodeId;
    use crate::ir::operators::NodeKind;
    use std::sync::Arc;

    fn call_to(c: &Compile, m: MethodId) -> NodeId {
        c.graph
            .iter()
            .find(|(n, node)| node.is_call() && c.graph.call(*n).kind.method() == Some(m))
            .map(|(n, _)| n)
            .unwrap()
    }

    #[test]
    fn test_generic_placeholder_is_inlined() {
        let f = fixture();
        let (c, j) = call_state(&f, CompileOptions::default(), 1, &[0]);
        let mut c = c.with_parser(Arc::new(Doubler));
        let cg = CallGenerator::for_late_inline(f.twice, CallGenerator::for_inline(f.twice, 1.0));
        let exit = cg.generate(&mut c, j).unwrap();
        let call = call_to(&c, f.twice);
        assert_eq!(c.late_inlines(), &[call]);

        assert!(c.do_late_inline(call));
        assert!(c.inlining_progress());
        assert_eq!(c.graph.outcnt(call), 0);
        assert!(c.generator_of(call).is_none());

        // The caller's stack now holds the inlined body's value.
        let state = *c.jvms.get(exit);
        let map = state.map().unwrap();
        let r = c.graph.stack(map, &state, state.sp() - 1).unwrap();
        assert!(matches!(c.graph.kind(r), NodeKind::AddI));
    }

    #[test]
    fn test_declined_body_leaves_valid_call() {
        let f = fixture();
        let (mut c, j) = call_state(&f, CompileOptions::default(), 1, &[0]);
        let cg = CallGenerator::for_late_inline(f.twice, CallGenerator::for_inline(f.twice, 1.0));
        cg.generate(&mut c, j).unwrap();
        let call = call_to(&c, f.twice);

        assert!(!c.do_late_inline(call));
        assert!(c.graph.outcnt(call) > 0);
        assert!(c.verify_debug_info(call).is_ok());
        let projs = c.graph.extract_projections(call, true, true);
        assert!(projs.fallthrough_catchproj.is_some());
        assert!(projs.catchall_catchproj.is_some());
        assert!(projs.resproj.is_some());
        assert!(!c.failing());
    }

    #[test]
    fn test_unused_boxing_result_removes_call() {
        let f = fixture();
        f.reg.update_method(f.twice, |m| m.flags |= MethodFlags::BOXING);
        let (mut c, j) = call_state(&f, CompileOptions::default(), 1, &[0]);
        let cg = CallGenerator::for_boxing_late_inline(f.twice, CallGenerator::for_inline(f.twice, 1.0));
        let exit = cg.generate(&mut c, j).unwrap();
        let call = call_to(&c, f.twice);
        assert_eq!(c.macro_count(), 1);
        assert_eq!(c.boxing_late_inline_count(), 1);

        // Drop the only use of the boxed value.
        let state = *c.jvms.get(exit);
        let map = state.map().unwrap();
        let top = c.top();
        c.graph.set_stack(map, &state, state.sp() - 1, Some(top));

        assert!(c.do_late_inline(call));
        assert_eq!(c.graph.outcnt(call), 0);
        assert_eq!(c.macro_count(), 0);
    }

    #[test]
    fn test_virtual_placeholder_parks_again_after_failed_attempt() {
        let f = fixture();
        let (mut c, j) = call_state(&f, CompileOptions::default(), 2, &[1]);
        let cg = CallGenerator::for_late_inline_virtual(f.get, Some(3), 1.0);
        cg.generate(&mut c, j).unwrap();
        let call = call_to(&c, f.get);
        assert!(c.is_parked(call));
        assert_eq!(c.late_inline_count(), 0);

        assert!(!c.do_late_inline(call));
        assert!(c.is_parked(call));
        let flavor = c.generator_of(call).and_then(|cg| cg.late_flavor()).cloned();
        assert!(matches!(flavor, Some(LateFlavor::Virtual { attempted: true, .. })));
        assert!(c.verify_debug_info(call).is_ok());
    }

    #[test]
    fn test_placeholder_on_dead_path_keeps_its_generator() {
        let f = fixture();
        let (mut c, j) = call_state(&f, CompileOptions::default(), 2, &[1]);
        let cg = CallGenerator::for_late_inline_virtual(f.get, Some(3), 1.0);
        cg.generate(&mut c, j).unwrap();
        let call = call_to(&c, f.get);
        c.prepend_late_inline(call);
        assert!(!c.is_parked(call));

        let top = c.top();
        c.graph.set_req(call, 0, Some(top));
        assert!(!c.do_late_inline(call));

        // Parked again without counting as an attempt.
        assert!(c.is_parked(call));
        let flavor = c.generator_of(call).and_then(|cg| cg.late_flavor()).cloned();
        assert!(matches!(flavor, Some(LateFlavor::Virtual { attempted: false, .. })));
    }

    #[test]
    fn test_generic_placeholder_on_dead_path_drops_its_generator() {
        let f = fixture();
        let (mut c, j) = call_state(&f, CompileOptions::default(), 1, &[0]);
        let cg = CallGenerator::for_late_inline(f.twice, CallGenerator::for_inline(f.twice, 1.0));
        cg.generate(&mut c, j).unwrap();
        let call = call_to(&c, f.twice);

        let top = c.top();
        c.graph.set_req(call, 0, Some(top));
        assert!(!c.do_late_inline(call));
        assert!(c.generator_of(call).is_none());
        assert!(!c.is_parked(call));
    }
}
