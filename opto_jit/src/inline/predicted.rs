//! Calls split on a profiled receiver class.

use crate::ci::KlassId;
use crate::compile::Compile;
use crate::jvms::JvmsId;
use crate::kit::GraphKit;

use super::CallGenerator;

/// Test the receiver against `receiver_klass`: `if_hit` runs with the
/// receiver cast to that exact class, `if_missed` everywhere else.
///
/// When both paths return, their states merge at a region. A miss that
/// always traps leaves the hit path as the only continuation.
pub(super) fn generate(
    c: &mut Compile,
    jvms: JvmsId,
    receiver_klass: KlassId,
    hit_prob: f32,
    if_hit: &CallGenerator,
    if_missed: &CallGenerator,
) -> Option<JvmsId> {
    let method = if_missed.method();
    let callee = c.method_info(method)?;
    debug_assert!(!callee.is_static(), "predicted static call");
    let mut kit = GraphKit::new(c, jvms);

    let receiver = kit.null_check_receiver_before_call(&callee);
    if kit.stopped() {
        return Some(kit.transfer_exceptions_into_jvms());
    }

    // The exact cast below only holds on the hit path.
    let map = kit.map_not_null();
    let replaced_nodes = kit.c.graph.sfpt(map).replaced_nodes.clone();

    let (slow_ctl, casted) = kit.type_check_receiver(receiver, receiver_klass, hit_prob);

    let mut slow_map = None;
    let mut slow_jvms = None;
    {
        let saved = kit.preserve(true);
        kit.set_control(slow_ctl);
        if !kit.stopped() {
            let j = kit.sync_jvms();
            let exit = match if_missed.generate(kit.c, j) {
                Some(exit) => Some(exit),
                None if !kit.c.failing() => CallGenerator::for_virtual_call(method, None).generate(kit.c, j),
                None => None,
            };
            let exit = exit?;
            kit.add_exception_states_from(exit);
            kit.set_jvms(exit);
            if !kit.stopped() {
                slow_jvms = Some(exit);
                slow_map = kit.stop();
            }
        }
        kit.restore(saved);
    }

    if kit.stopped() {
        // The class test folded to the miss path.
        if let Some(j) = slow_jvms {
            kit.set_jvms(j);
        }
        return Some(kit.transfer_exceptions_into_jvms());
    }

    kit.replace_in_map(receiver, casted);
    let j = kit.sync_jvms();
    let exit = match if_hit.generate(kit.c, j) {
        Some(exit) => Some(exit),
        None if !kit.c.failing() => CallGenerator::for_direct_call(if_hit.method(), false).generate(kit.c, j),
        None => None,
    };
    let exit = exit?;
    kit.add_exception_states_from(exit);
    kit.set_jvms(exit);

    let Some(slow_map) = slow_map else {
        tracing::trace!(method = %method, klass = %receiver_klass, "predicted call, miss traps");
        return Some(kit.transfer_exceptions_into_jvms());
    };
    if kit.stopped() {
        if let Some(j) = slow_jvms {
            kit.set_jvms(j);
        }
        return Some(kit.transfer_exceptions_into_jvms());
    }

    let map = kit.map_not_null();
    kit.c.graph.sfpt_mut(map).replaced_nodes = replaced_nodes;
    kit.merge_paths(&[slow_map]);
    tracing::trace!(method = %method, klass = %receiver_klass, "predicted call, paths merged");
    Some(kit.transfer_exceptions_into_jvms())
}

#[cfg(test)]
mod tests {
    use crate::ci::{DeoptAction, DeoptReason};
    use crate::compile::{Compile, CompileOptions};
    use crate::inline::tests::{call_state, fixture, Fixture};
    use crate::inline::CallGenerator;
    use crate::ir::operators::NodeKind;
    use crate::ir::types::TypeFunc;
    use crate::kit::GraphKit;

    fn calls_to(c: &Compile, f: &Fixture) -> (usize, usize) {
        let mut hit = 0;
        let mut miss = 0;
        for (n, node) in c.graph.iter() {
            if !node.is_call() {
                continue;
            }
            match c.graph.call(n).kind.method() {
                Some(m) if m == f.b_get => hit += 1,
                Some(m) if m == f.get => miss += 1,
                _ => {}
            }
        }
        (hit, miss)
    }

    #[test]
    fn test_hit_and_miss_merge() {
        let f = fixture();
        let (mut c, j) = call_state(&f, CompileOptions::default(), 2, &[1]);
        let cg = CallGenerator::for_predicted_call(
            f.b,
            CallGenerator::for_virtual_call(f.get, None),
            CallGenerator::for_direct_call(f.b_get, false),
            0.9,
        );
        let exit = cg.generate(&mut c, j).unwrap();
        assert_eq!(calls_to(&c, &f), (1, 1));

        let mut kit = GraphKit::new(&mut c, exit);
        assert!(kit.c.graph.node(kit.control()).is_region());
        let r = kit.pop();
        assert!(kit.c.graph.node(r).is_phi());
    }

    #[test]
    fn test_hit_call_sees_exact_receiver() {
        let f = fixture();
        let (mut c, j) = call_state(&f, CompileOptions::default(), 2, &[1]);
        let cg = CallGenerator::for_predicted_call(
            f.b,
            CallGenerator::for_uncommon_trap(f.get, DeoptReason::ClassCheck, DeoptAction::MaybeRecompile),
            CallGenerator::for_direct_call(f.b_get, false),
            0.9,
        );
        let exit = cg.generate(&mut c, j).unwrap();
        assert_eq!(calls_to(&c, &f), (1, 0));

        let call = c
            .graph
            .iter()
            .find(|(n, node)| node.is_call() && c.graph.call(*n).kind.method() == Some(f.b_get))
            .map(|(n, _)| n)
            .unwrap();
        let recv = c.graph.input(call, TypeFunc::PARMS).unwrap();
        assert!(matches!(c.graph.kind(recv), NodeKind::CheckCastPP));
        assert_eq!(c.graph.ty(recv).ptr().and_then(|p| p.klass), Some(f.b));

        // Only the hit path continues.
        let mut kit = GraphKit::new(&mut c, exit);
        assert!(!kit.c.graph.node(kit.control()).is_region());
        let r = kit.pop();
        assert!(matches!(kit.c.graph.kind(r), NodeKind::Proj { .. }));
    }

    #[test]
    fn test_declining_hit_falls_back_to_call() {
        let f = fixture();
        // No parser is attached, so inlining the hit path declines.
        let (mut c, j) = call_state(&f, CompileOptions::default(), 2, &[1]);
        let cg = CallGenerator::for_predicted_call(
            f.b,
            CallGenerator::for_virtual_call(f.get, None),
            CallGenerator::for_inline(f.b_get, 1.0),
            0.9,
        );
        let exit = cg.generate(&mut c, j);
        assert!(exit.is_some());
        assert!(!c.failing());
        assert_eq!(calls_to(&c, &f), (1, 1));
    }
}
