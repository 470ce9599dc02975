//! Intrinsics guarded by runtime predicates.
//!
//! The emitted shape is a chain of tests, each guarding one copy of the
//! intrinsic's fast path:
//!
//! ```text
//! if (receiver == null) trap
//! if (predicate 0) fast path 0
//! else if (predicate 1) fast path 1
//! ...
//! else fallback
//! ```
//!
//! A fast path the library refuses joins the fallback's region. All
//! surviving exits are merged with phis.

use smallvec::SmallVec;

use crate::compile::Compile;
use crate::ir::node::NodeId;
use crate::jvms::JvmsId;
use crate::kit::GraphKit;

use super::{intrinsic, CallGenerator};

pub(super) fn generate(
    c: &mut Compile,
    jvms: JvmsId,
    intrinsic: &CallGenerator,
    fallback: &CallGenerator,
) -> Option<JvmsId> {
    let method = intrinsic.method();
    let info = c.method_info(method)?;
    let mut kit = GraphKit::new(c, jvms);

    if !info.is_static() {
        // Predicates inspect the receiver.
        kit.null_check_receiver_before_call(&info);
        if kit.stopped() {
            return Some(kit.transfer_exceptions_into_jvms());
        }
    }

    let n_predicates = intrinsic.predicates_count();
    debug_assert!(n_predicates > 0, "predicated intrinsic without predicates");

    let mut results: SmallVec<[JvmsId; 4]> = SmallVec::new();
    let mut slow_ctrls: SmallVec<[Option<NodeId>; 4]> = SmallVec::new();

    let mut predicate = 0;
    while predicate < n_predicates && !kit.stopped() {
        let j = kit.sync_jvms();
        let else_ctrl = intrinsic::generate_predicate(kit.c, j, method, predicate);
        kit.set_jvms(j);
        if !kit.stopped() {
            let saved = kit.preserve(true);
            let j = kit.sync_jvms();
            match intrinsic.generate(kit.c, j) {
                None => slow_ctrls.push(Some(kit.control())),
                Some(exit) => {
                    kit.add_exception_states_from(exit);
                    kit.set_jvms(exit);
                    if !kit.stopped() {
                        results.push(exit);
                    }
                }
            }
            kit.restore(saved);
        }
        let else_ctrl = else_ctrl.unwrap_or_else(|| kit.top());
        kit.set_control(else_ctrl);
        predicate += 1;
    }
    if !kit.stopped() {
        // Every predicate failed.
        slow_ctrls.push(Some(kit.control()));
    }

    if !slow_ctrls.is_empty() {
        let saved = kit.preserve(true);
        let region = kit.c.graph.make_region(&slow_ctrls);
        kit.set_control(region);
        let j = kit.sync_jvms();
        let exit = match fallback.generate(kit.c, j) {
            Some(exit) => Some(exit),
            None if !kit.c.failing() => CallGenerator::for_direct_call(method, false).generate(kit.c, j),
            None => None,
        };
        // The fallback only gives up when the compile does.
        let exit = exit?;
        kit.add_exception_states_from(exit);
        kit.set_jvms(exit);
        if !kit.stopped() {
            results.push(exit);
        }
        kit.restore(saved);
    }

    match results.as_slice() {
        [] => {
            // Every path ended in a trap.
            kit.stop();
        }
        [only] => kit.set_jvms(*only),
        [first, rest @ ..] => {
            let others: SmallVec<[NodeId; 4]> = rest
                .iter()
                .filter_map(|&j| kit.c.jvms.get(j).map())
                .collect();
            kit.set_jvms(*first);
            kit.merge_paths(&others);
        }
    }
    tracing::trace!(method = %method, paths = results.len(), "predicated intrinsic");
    Some(kit.transfer_exceptions_into_jvms())
}
