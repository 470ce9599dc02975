//! Inlining Driver
//!
//! Picks a generator for each call site and runs the deferred work once
//! parsing is done.
//!
//! # Selection
//!
//! [`Compile::call_generator`] tries, in order: method-handle linkers,
//! intrinsics, inlining (eager or deferred), a receiver-class prediction
//! for dispatching calls, and finally a plain call. The last step always
//! produces a generator, so a call site is never left without one.
//!
//! # Deferred work
//!
//! After parsing, [`Compile::inline_late_calls`] drains the string and
//! boxing queues, then alternates rounds of late inlining with cleanup
//! until the queue is empty or the graph outgrows the live-node cutoff.
//! Cleanup removes unreachable nodes and revisits parked calls whose
//! inputs may have sharpened.

use crate::ci::{CallSiteInfo, DeoptAction, DeoptReason, KlassId, MethodFlags, MethodId, MethodInfo, MhIntrinsic};
use crate::compile::{Bailout, Compile};
use crate::ir::types::{Type, TypeFunc};
use crate::jvms::JvmsId;

use super::{CallGenerator, InlineOutcome, LateFlavor};

impl Compile {
    // =========================================================================
    // Queries
    // =========================================================================

    /// Inlining decisions are deferred past parsing.
    pub fn should_delay_inlining(&self) -> bool {
        self.options.incremental_inline && (self.options.always_incremental_inline || self.over_inlining_cutoff())
    }

    /// Call site of the frame at `jvms`.
    pub fn call_site_at(&self, jvms: JvmsId) -> Option<CallSiteInfo> {
        let state = self.jvms.get(jvms);
        let method = state.method()?;
        let bci = u32::try_from(state.bci()).ok()?;
        self.oracle().call_site(method, bci)
    }

    /// The single implementation `callee` dispatches to for receivers of
    /// type `receiver`, if there is one.
    pub fn optimize_virtual_call(&self, callee: &MethodInfo, receiver: &Type) -> Option<MethodId> {
        if callee.can_be_statically_bound() {
            return Some(callee.id);
        }
        let ptr = receiver.ptr()?;
        match ptr.klass {
            Some(klass) if ptr.exact => self.oracle().resolve_invoke(klass, callee.id),
            Some(klass) => self.oracle().unique_concrete_method(klass, callee.id),
            None => self.oracle().unique_concrete_method(callee.holder, callee.id),
        }
    }

    // =========================================================================
    // Generator Selection
    // =========================================================================

    /// Generator for a call to `callee` at `jvms`.
    ///
    /// `call_does_dispatch` marks a call that must select the receiver's
    /// implementation; `vtable_index` is then its dispatch slot.
    /// `prof_factor` scales the site's profiled frequency, and
    /// `speculative_receiver` is a receiver class to predict even without
    /// a profile.
    #[allow(clippy::too_many_arguments)]
    pub fn call_generator(
        &mut self,
        callee: MethodId,
        vtable_index: Option<u32>,
        call_does_dispatch: bool,
        jvms: JvmsId,
        allow_inline: bool,
        prof_factor: f32,
        speculative_receiver: Option<KlassId>,
        allow_intrinsics: bool,
    ) -> CallGenerator {
        let Some(info) = self.method_info(callee) else {
            return CallGenerator::for_direct_call(callee, false);
        };

        if info.is_method_handle_intrinsic() {
            return CallGenerator::for_method_handle_call(self, jvms, callee, allow_inline);
        }

        if allow_intrinsics {
            if let Some(cg) = self.find_intrinsic(&info, jvms, vtable_index, call_does_dispatch, allow_inline, prof_factor) {
                if !call_does_dispatch || cg.does_virtual_dispatch() {
                    return cg;
                }
            }
        }

        let site = self.call_site_at(jvms);
        let site_count = site.as_ref().map_or(0, |s| s.profile.count);

        if allow_inline && !call_does_dispatch {
            match self.ok_to_inline(&info, jvms, site_count) {
                Ok(msg) => {
                    let expected_uses = site_count.max(1) as f32 * prof_factor;
                    let cg = CallGenerator::for_inline(callee, expected_uses);
                    if info.is_boxing_method() {
                        self.set_has_boxed_value(true);
                        return CallGenerator::for_boxing_late_inline(callee, cg);
                    }
                    if info.flags.contains(MethodFlags::STRING_OPT) {
                        self.set_has_stringbuilder(true);
                        return CallGenerator::for_string_late_inline(callee, cg);
                    }
                    if self.should_delay_inlining() {
                        return CallGenerator::for_late_inline(callee, cg);
                    }
                    self.print_inlining(callee, jvms, InlineOutcome::Success, msg);
                    return cg;
                }
                Err(msg) => self.print_inlining(callee, jvms, InlineOutcome::Failure, msg),
            }
        }

        if call_does_dispatch && self.options.inline.use_type_profile {
            if let Some(cg) = self.predicted_generator(
                &info,
                vtable_index,
                jvms,
                allow_inline,
                prof_factor,
                speculative_receiver,
                site.as_ref(),
            ) {
                return cg;
            }
        }

        if call_does_dispatch {
            self.print_inlining(callee, jvms, InlineOutcome::Failure, "virtual call");
            self.virtual_generator(callee, vtable_index, allow_inline, prof_factor)
        } else {
            CallGenerator::for_direct_call(callee, self.should_delay_inlining())
        }
    }

    fn find_intrinsic(
        &mut self,
        info: &MethodInfo,
        jvms: JvmsId,
        vtable_index: Option<u32>,
        call_does_dispatch: bool,
        allow_inline: bool,
        prof_factor: f32,
    ) -> Option<CallGenerator> {
        if !self.options.inline.intrinsics_enabled {
            return None;
        }
        let library = self.intrinsics()?;
        if !library.has_intrinsic(info, call_does_dispatch) {
            return None;
        }
        let predicates = library.predicates_count(info);
        let dispatch = library.does_virtual_dispatch(info);
        let cg = CallGenerator::for_intrinsic(info.id, call_does_dispatch, predicates, dispatch);
        if predicates == 0 {
            return Some(cg);
        }
        let fallback = self.call_generator(
            info.id,
            vtable_index,
            call_does_dispatch,
            jvms,
            allow_inline,
            prof_factor,
            None,
            false,
        );
        Some(CallGenerator::for_predicated_intrinsic(cg, fallback))
    }

    /// Size, depth and recursion policy for inlining `info` at `jvms`.
    fn ok_to_inline(&self, info: &MethodInfo, jvms: JvmsId, site_count: u32) -> Result<&'static str, &'static str> {
        let cfg = &self.options.inline;
        if info.flags.contains(MethodFlags::NATIVE) {
            return Err("native method");
        }
        if info.flags.contains(MethodFlags::ABSTRACT) {
            return Err("abstract method");
        }
        if info.flags.contains(MethodFlags::DONT_INLINE) {
            return Err("disallowed by annotation");
        }
        if !info.can_be_parsed() {
            return Err("cannot be parsed");
        }

        let state = self.jvms.get(jvms);
        if state.depth() > cfg.max_inline_level {
            return Err("inlining too deep");
        }
        let recursion = self
            .jvms
            .chain(jvms)
            .filter(|&j| self.jvms.get(j).method() == Some(info.id))
            .count() as u32;
        if recursion > cfg.max_recursive_inline_level {
            return Err("recursive inlining is too deep");
        }
        if info.flags.contains(MethodFlags::FORCE_INLINE) {
            return Ok("force inline by annotation");
        }

        if info.code_size <= cfg.max_inline_size {
            return Ok("inline");
        }
        let caller_count = state
            .method()
            .and_then(|m| self.oracle().method(m))
            .map_or(0, |m| m.invocation_count)
            .max(1);
        let freq = site_count as f32 / caller_count as f32;
        let hot = info.invocation_count >= cfg.inline_small_code || (site_count > 0 && freq >= cfg.min_inline_frequency_ratio);
        if !hot {
            return Err("too big");
        }
        if info.code_size > cfg.freq_inline_size {
            return Err("hot method too big");
        }
        Ok("inline (hot)")
    }

    /// Split on the receiver class the profile or speculation points at.
    #[allow(clippy::too_many_arguments)]
    fn predicted_generator(
        &mut self,
        info: &MethodInfo,
        vtable_index: Option<u32>,
        jvms: JvmsId,
        allow_inline: bool,
        prof_factor: f32,
        speculative_receiver: Option<KlassId>,
        site: Option<&CallSiteInfo>,
    ) -> Option<CallGenerator> {
        let profile = site.map(|s| &s.profile);
        let percent = self.options.inline.type_profile_major_receiver_percent;
        let (klass, hit_prob) = match speculative_receiver {
            Some(k) => (k, 0.9),
            None => profile?.dominant_receiver(percent)?,
        };
        let monomorphic = speculative_receiver.is_none() && profile.is_some_and(|p| p.receivers.len() == 1);

        let target = self.oracle().resolve_invoke(klass, info.id)?;
        let hit = self.call_generator(
            target,
            vtable_index,
            false,
            jvms,
            allow_inline,
            hit_prob * prof_factor,
            None,
            true,
        );
        if self.failing() {
            return None;
        }

        let state = *self.jvms.get(jvms);
        let caller = state.method().and_then(|m| self.oracle().method(m));
        let trap_ok = caller.is_some_and(|m| {
            !self.too_many_traps(&m, state.bci(), DeoptReason::ClassCheck)
                && !self.too_many_recompiles(&m, state.bci(), DeoptReason::ClassCheck)
        });
        let miss = if monomorphic && trap_ok {
            CallGenerator::for_uncommon_trap(info.id, DeoptReason::ClassCheck, DeoptAction::MaybeRecompile)
        } else {
            self.virtual_generator(info.id, vtable_index, allow_inline, prof_factor)
        };
        tracing::debug!(
            method = %info.id,
            klass = %klass,
            hit_prob,
            monomorphic,
            "predicted receiver"
        );
        Some(CallGenerator::for_predicted_call(klass, miss, hit, hit_prob))
    }

    fn virtual_generator(&self, callee: MethodId, vtable_index: Option<u32>, allow_inline: bool, prof_factor: f32) -> CallGenerator {
        if allow_inline && self.options.incremental_inline && self.options.incremental_inline_virtual {
            return CallGenerator::for_late_inline_virtual(callee, vtable_index, prof_factor);
        }
        let vtable_index = if self.options.use_inline_caches { None } else { vtable_index };
        CallGenerator::for_virtual_call(callee, vtable_index)
    }

    // =========================================================================
    // Call Sites
    // =========================================================================

    /// Emit the invoke at `jvms`, whose arguments sit on the expression
    /// stack above the stack pointer.
    ///
    /// The declared callee comes from the site's metadata. A dispatching
    /// call whose receiver type binds to one implementation becomes a
    /// direct one. A generator that declines is replaced by a plain call.
    pub fn do_call(&mut self, jvms: JvmsId) -> Option<JvmsId> {
        let Some(site) = self.call_site_at(jvms) else {
            let state = self.jvms.get(jvms);
            let reason = format!("no call site at bci {}", state.bci());
            self.record_failure(Bailout::Other(reason));
            return None;
        };
        let info = self.method_info(site.callee)?;

        let mut callee = info.id;
        let mut dispatch = !info.is_static() && !info.can_be_statically_bound() && !info.is_method_handle_intrinsic();
        if dispatch {
            let state = *self.jvms.get(jvms);
            let receiver = state.map().and_then(|m| self.graph.argument(m, &state, 0));
            let receiver_ty = receiver.map_or(Type::Bottom, |r| self.graph.ty(r).clone());
            if let Some(target) = self.optimize_virtual_call(&info, &receiver_ty) {
                callee = target;
                dispatch = false;
            }
        }
        let vtable_index = if dispatch { info.vtable_index } else { None };

        let cg = self.call_generator(callee, vtable_index, dispatch, jvms, true, 1.0, None, true);
        if self.failing() {
            return None;
        }
        match cg.generate(self, jvms) {
            Some(exit) => Some(exit),
            None if !self.failing() => {
                let fallback = if dispatch {
                    CallGenerator::for_virtual_call(callee, vtable_index)
                } else {
                    CallGenerator::for_direct_call(callee, false)
                };
                fallback.generate(self, jvms)
            }
            None => None,
        }
    }

    // =========================================================================
    // Post-Parse Devirtualization
    // =========================================================================

    /// Queue the parked calls whose inputs now allow a decision.
    ///
    /// A dispatching call whose receiver binds to one implementation gets
    /// that callee recorded. A linker call whose handle became constant is
    /// queued as is. Calls already attempted stay parked. Returns the
    /// number of calls queued.
    pub fn devirtualize_calls(&mut self) -> usize {
        let mut queued = 0;
        for call in self.parked_calls() {
            if !self.graph.contains(call) || !self.graph.is_call(call) || self.graph.outcnt(call) == 0 {
                continue;
            }
            let Some(CallGenerator::LateInline { method, flavor, .. }) = self.generator_of(call).cloned() else {
                continue;
            };
            let Some(info) = self.oracle().method(method) else {
                continue;
            };
            match flavor {
                LateFlavor::Virtual { attempted: false, .. } => {
                    let receiver = self.graph.input(call, TypeFunc::PARMS);
                    let Some(receiver) = receiver.filter(|&r| !self.graph.is_top(r)) else {
                        continue;
                    };
                    let receiver_ty = self.graph.ty(receiver).clone();
                    let Some(target) = self.optimize_virtual_call(&info, &receiver_ty) else {
                        continue;
                    };
                    if let Some(CallGenerator::LateInline {
                        flavor: LateFlavor::Virtual { callee, .. },
                        ..
                    }) = self.generator_of_mut(call)
                    {
                        *callee = Some(target);
                    }
                    tracing::debug!(call = %call, method = %method, target = %target, "devirtualized");
                }
                LateFlavor::MethodHandle { attempted: false, .. } => {
                    let handle_arg = match info.mh_intrinsic {
                        Some(MhIntrinsic::InvokeBasic) => 0,
                        Some(_) => info.arg_size().saturating_sub(1),
                        None => continue,
                    };
                    let handle = self.graph.input(call, TypeFunc::PARMS + handle_arg);
                    let constant = handle.is_some_and(|h| self.graph.ty(h).ptr().is_some_and(|p| p.constant.is_some()));
                    if !constant {
                        continue;
                    }
                    tracing::debug!(call = %call, method = %method, "method handle became constant");
                }
                _ => continue,
            }
            self.prepend_late_inline(call);
            queued += 1;
        }
        queued
    }

    // =========================================================================
    // Deferred Inlining
    // =========================================================================

    /// Run every deferred inlining phase.
    ///
    /// Returns the compile's failure, if any phase failed it.
    pub fn inline_late_calls(&mut self) -> Result<(), Bailout> {
        if self.has_stringbuilder() {
            self.inline_string_calls();
        }
        if self.has_boxed_value() && !self.failing() {
            self.inline_boxing_calls();
        }
        if self.options.incremental_inline && !self.failing() {
            self.inline_incrementally();
        }
        if !self.failing() {
            self.process_late_inline_calls_no_inline();
        }
        match self.failure() {
            Some(reason) => Err(reason.clone()),
            None => Ok(()),
        }
    }

    /// One pass over the late-inline queue.
    ///
    /// Stops after the first call that inlines so the graph can be
    /// cleaned before the next one. Calls that were visited are retired
    /// from the queue; calls queued by the inlined body are kept. Returns
    /// whether another pass may make progress.
    pub fn inline_incrementally_one(&mut self) -> bool {
        self.set_inlining_progress(false);
        self.set_do_cleanup(false);

        let mut processed = 0;
        let mut i = 0;
        while let Some(call) = self.late_inline_at(i) {
            self.set_late_inlines_pos(i + 1);
            processed = i + 1;
            let does_dispatch = self
                .generator_of(call)
                .is_some_and(|cg| cg.is_virtual_late_inline() || cg.is_mh_late_inline());
            if self.inlining_incrementally() || does_dispatch {
                self.do_late_inline(call);
                if self.failing() {
                    return false;
                }
                if self.inlining_progress() {
                    break;
                }
            } else {
                // Inlining is off: the placeholder stays an ordinary call.
                self.take_generator(call);
            }
            i += 1;
        }
        self.retire_late_inlines(processed);
        self.late_inline_count() > 0 && !self.failing() && self.inlining_progress()
    }

    /// Remove dead nodes and queue parked calls that can now bind.
    pub fn inline_incrementally_cleanup(&mut self) {
        let freed = self.remove_useless_nodes();
        let queued = self.devirtualize_calls();
        self.set_do_cleanup(false);
        tracing::trace!(freed, queued, live = self.live_nodes(), "incremental inlining cleanup");
    }

    /// Inline queued calls round by round until the queue drains.
    ///
    /// When the graph grows past the live-node cutoff even after cleanup,
    /// every remaining call is reported as not inlined and stays a call.
    pub fn inline_incrementally(&mut self) {
        self.set_inlining_incrementally(true);
        let cutoff = self.options.live_node_count_inlining_cutoff;
        let mut low_live_nodes = 0;

        while self.late_inline_count() > 0 {
            if self.live_nodes() > cutoff {
                if low_live_nodes < cutoff * 8 / 10 {
                    // Dead nodes may bring the count back under.
                    self.inline_incrementally_cleanup();
                    low_live_nodes = self.live_nodes();
                }
                if self.live_nodes() > cutoff {
                    self.report_late_inline_cutoff();
                    break;
                }
            }

            while self.inline_incrementally_one() {}
            if self.failing() {
                break;
            }
            self.inline_incrementally_cleanup();
            if self.failing() {
                break;
            }
        }
        self.set_inlining_incrementally(false);
        tracing::debug!(
            remaining = self.late_inline_count(),
            live = self.live_nodes(),
            "incremental inlining done"
        );
    }

    fn report_late_inline_cutoff(&mut self) {
        let pending: Vec<_> = self.late_inlines().to_vec();
        for call in pending {
            let method = self.generator_of(call).map(|cg| cg.method());
            let jvms = self.graph.node(call).jvms();
            if let (Some(method), Some(jvms)) = (method, jvms) {
                self.print_inlining(
                    method,
                    jvms,
                    InlineOutcome::Failure,
                    "live nodes > live_node_count_inlining_cutoff",
                );
            }
        }
    }

    /// Strength-reduce parked and queued dispatching calls without
    /// inlining anything.
    pub fn process_late_inline_calls_no_inline(&mut self) {
        debug_assert!(!self.inlining_incrementally(), "inlining is on");
        self.inline_incrementally_cleanup();
        while self.late_inline_count() > 0 {
            while self.inline_incrementally_one() {}
            if self.failing() {
                return;
            }
            self.inline_incrementally_cleanup();
        }
    }

    /// Inline the string-builder placeholder calls.
    pub fn inline_string_calls(&mut self) {
        self.set_inlining_progress(false);
        self.set_do_cleanup(false);
        while let Some(call) = self.pop_string_late_inline() {
            self.do_late_inline(call);
            if self.failing() {
                return;
            }
        }
    }

    /// Inline the boxing placeholder calls, then clean up.
    pub fn inline_boxing_calls(&mut self) {
        if self.boxing_late_inline_count() == 0 {
            return;
        }
        self.set_inlining_progress(false);
        self.set_do_cleanup(false);
        let pos = self.late_inline_count();
        self.set_late_inlines_pos(pos);
        while let Some(call) = self.pop_boxing_late_inline() {
            self.do_late_inline(call);
            if self.failing() {
                return;
            }
        }
        self.inline_incrementally_cleanup();
    }
}

#[cfg(test)]
mod tests {
    use crate::ci::{CallSiteInfo, CallSiteProfile, MethodFlags, ObjectId};
    use crate::compile::{Compile, CompileOptions};
    use crate::inline::tests::{call_state, fixture, Doubler, Fixture};
    use crate::inline::{CallGenerator, InlineOutcome, LateFlavor};
    use crate::ir::node::NodeId;
    use crate::ir::operators::NodeKind;
    use crate::ir::types::{Type, TypeFunc};
    use crate::jvms::JvmsId;
    use crate::kit::GraphKit;
    use std::sync::Arc;

    fn live_calls_to(c: &Compile, m: crate::ci::MethodId) -> Vec<NodeId> {
        c.graph
            .iter()
            .filter(|(n, node)| node.is_call() && c.graph.call(*n).kind.method() == Some(m) && c.graph.outcnt(*n) > 0)
            .map(|(n, _)| n)
            .collect()
    }

    /// Return the value on top of the stack so the path stays reachable.
    fn finish(c: &mut Compile, exit: JvmsId) -> NodeId {
        let mut kit = GraphKit::new(c, exit);
        let r = kit.pop();
        kit.return_current(Some(r))
    }

    fn profile_get(f: &Fixture, receivers: Vec<(crate::ci::KlassId, u32)>) {
        f.reg.set_call_site(
            f.caller,
            2,
            CallSiteInfo {
                callee: f.get,
                declared_signature: None,
                profile: CallSiteProfile { count: 100, receivers },
            },
        );
    }

    #[test]
    fn test_small_static_callee_inlines_eagerly() {
        let f = fixture();
        let (mut c, j) = call_state(&f, CompileOptions::default(), 1, &[0]);
        let cg = c.call_generator(f.twice, None, false, j, true, 1.0, None, true);
        assert!(cg.is_inline());
        assert!(!cg.is_late_inline());
        let rec = c.inline_log().find(f.twice).unwrap();
        assert_eq!(rec.outcome, InlineOutcome::Success);
    }

    #[test]
    fn test_stress_mode_delays_inlining() {
        let f = fixture();
        let (mut c, j) = call_state(&f, CompileOptions::stress_incremental(), 1, &[0]);
        assert!(c.should_delay_inlining());
        let cg = c.call_generator(f.twice, None, false, j, true, 1.0, None, true);
        assert!(matches!(cg.late_flavor(), Some(LateFlavor::Generic)));
    }

    #[test]
    fn test_large_cold_callee_becomes_call() {
        let f = fixture();
        f.reg.update_method(f.twice, |m| m.code_size = 1000);
        let (mut c, j) = call_state(&f, CompileOptions::default(), 1, &[0]);
        let cg = c.call_generator(f.twice, None, false, j, true, 1.0, None, true);
        assert!(matches!(cg, CallGenerator::Direct { .. }));
        let rec = c.inline_log().find(f.twice).unwrap();
        assert_eq!(rec.outcome, InlineOutcome::Failure);
        assert_eq!(rec.msg, "too big");
    }

    #[test]
    fn test_boxing_and_string_methods_get_their_queues() {
        let f = fixture();
        f.reg.update_method(f.twice, |m| m.flags |= MethodFlags::BOXING);
        let (mut c, j) = call_state(&f, CompileOptions::default(), 1, &[0]);
        let cg = c.call_generator(f.twice, None, false, j, true, 1.0, None, true);
        assert!(cg.is_boxing_late_inline());
        assert!(c.has_boxed_value());

        f.reg.update_method(f.twice, |m| {
            m.flags.remove(MethodFlags::BOXING);
            m.flags |= MethodFlags::STRING_OPT;
        });
        let cg = c.call_generator(f.twice, None, false, j, true, 1.0, None, true);
        assert!(cg.is_string_late_inline());
        assert!(c.has_stringbuilder());
    }

    #[test]
    fn test_monomorphic_profile_predicts_with_trap() {
        let f = fixture();
        profile_get(&f, vec![(f.b, 100)]);
        let (mut c, j) = call_state(&f, CompileOptions::default(), 2, &[1]);
        let cg = c.call_generator(f.get, Some(3), true, j, true, 1.0, None, true);
        let CallGenerator::Predicted {
            receiver,
            if_hit,
            if_missed,
            ..
        } = &cg
        else {
            panic!("expected a predicted call, got {:?}", cg);
        };
        assert_eq!(*receiver, f.b);
        assert_eq!(if_hit.method(), f.b_get);
        assert!(if_hit.is_inline());
        assert!(if_missed.is_trap());
    }

    #[test]
    fn test_polymorphic_profile_misses_to_virtual_call() {
        let f = fixture();
        profile_get(&f, vec![(f.b, 95), (f.a, 5)]);
        let (mut c, j) = call_state(&f, CompileOptions::default(), 2, &[1]);
        let cg = c.call_generator(f.get, Some(3), true, j, true, 1.0, None, true);
        let CallGenerator::Predicted { if_missed, .. } = &cg else {
            panic!("expected a predicted call, got {:?}", cg);
        };
        assert!(if_missed.is_virtual_late_inline());
    }

    #[test]
    fn test_unprofiled_dispatch_falls_back_to_virtual_call() {
        let f = fixture();
        let (mut c, j) = call_state(&f, CompileOptions::default(), 2, &[1]);
        let cg = c.call_generator(f.get, Some(3), true, j, true, 1.0, None, true);
        assert!(cg.is_virtual_late_inline());
        assert_eq!(c.inline_log().find(f.get).map(|r| r.msg.as_str()), Some("virtual call"));

        let (mut c, j) = call_state(&f, CompileOptions::tier1(), 2, &[1]);
        let cg = c.call_generator(f.get, Some(3), true, j, true, 1.0, None, true);
        assert!(matches!(cg, CallGenerator::Virtual { vtable_index: None, .. }));
    }

    #[test]
    fn test_exact_receiver_binds_at_call_site() {
        let f = fixture();
        let (mut c, j) = call_state(&f, CompileOptions::default(), 2, &[1]);
        let b_obj = c.graph.makecon(Type::oop_con(ObjectId(9), Some(f.b)));
        let state = *c.jvms.get(j);
        let map = state.map().unwrap();
        c.graph.set_argument(map, &state, 0, Some(b_obj));

        let get = c.oracle().method(f.get).unwrap();
        assert_eq!(c.optimize_virtual_call(&get, &c.graph.ty(b_obj).clone()), Some(f.b_get));
        assert_eq!(c.optimize_virtual_call(&get, &Type::oop(Some(f.a))), None);
    }

    #[test]
    fn test_parked_virtual_call_devirtualizes_after_parse() {
        let f = fixture();
        let (mut c, j) = call_state(&f, CompileOptions::default(), 2, &[1]);
        let exit = c.do_call(j).unwrap();
        finish(&mut c, exit);
        let call = live_calls_to(&c, f.get)[0];
        assert!(c.is_parked(call));

        // The receiver sharpens to an exact B.
        let b_obj = c.graph.makecon(Type::oop_con(ObjectId(9), Some(f.b)));
        c.graph.set_req(call, TypeFunc::PARMS, Some(b_obj));
        assert_eq!(c.devirtualize_calls(), 1);
        assert_eq!(c.late_inlines(), &[call]);

        c.process_late_inline_calls_no_inline();
        assert!(!c.failing());
        assert!(live_calls_to(&c, f.get).is_empty());
        assert_eq!(live_calls_to(&c, f.b_get).len(), 1);
    }

    #[test]
    fn test_incremental_inlining_replaces_placeholder() {
        let f = fixture();
        let (c, j) = call_state(&f, CompileOptions::stress_incremental(), 1, &[0]);
        let mut c = c.with_parser(Arc::new(Doubler));
        let exit = c.do_call(j).unwrap();
        let ret = finish(&mut c, exit);
        assert_eq!(c.late_inline_count(), 1);

        c.inline_late_calls().unwrap();
        assert_eq!(c.late_inline_count(), 0);
        assert!(live_calls_to(&c, f.twice).is_empty());
        let r = c.graph.input(ret, TypeFunc::PARMS).unwrap();
        assert!(matches!(c.graph.kind(r), NodeKind::AddI));
    }

    #[test]
    fn test_live_node_cutoff_keeps_calls() {
        let f = fixture();
        let options = CompileOptions {
            live_node_count_inlining_cutoff: 1,
            ..CompileOptions::stress_incremental()
        };
        let (c, j) = call_state(&f, options, 1, &[0]);
        let mut c = c.with_parser(Arc::new(Doubler));
        let exit = c.do_call(j).unwrap();
        finish(&mut c, exit);

        c.inline_late_calls().unwrap();
        assert_eq!(live_calls_to(&c, f.twice).len(), 1);
        let failed = c
            .inline_log()
            .failures()
            .any(|r| r.method == f.twice && r.msg.starts_with("live nodes"));
        assert!(failed);
    }

    #[test]
    fn test_string_calls_drain_first() {
        let f = fixture();
        let (c, j) = call_state(&f, CompileOptions::tier1(), 1, &[0]);
        let mut c = c.with_parser(Arc::new(Doubler));
        let cg = CallGenerator::for_string_late_inline(f.twice, CallGenerator::for_inline(f.twice, 1.0));
        let exit = cg.generate(&mut c, j).unwrap();
        finish(&mut c, exit);
        c.set_has_stringbuilder(true);
        assert_eq!(c.string_late_inline_count(), 1);

        c.inline_late_calls().unwrap();
        assert_eq!(c.string_late_inline_count(), 0);
        assert!(live_calls_to(&c, f.twice).is_empty());
    }

    #[test]
    fn test_missing_call_site_fails_compile() {
        let f = fixture();
        let (mut c, j) = call_state(&f, CompileOptions::default(), 7, &[0]);
        assert!(c.do_call(j).is_none());
        assert!(c.failing());
    }
}
