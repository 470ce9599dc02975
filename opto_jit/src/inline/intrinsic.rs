//! Intrinsic bodies.

use crate::ci::MethodId;
use crate::compile::Compile;
use crate::ir::node::NodeId;
use crate::jvms::JvmsId;

use super::{discard_fork, fork_state, join_exceptions, InlineOutcome};

/// Emit the library's fast path for `method` at `jvms`.
pub(super) fn generate(c: &mut Compile, jvms: JvmsId, method: MethodId, is_virtual: bool) -> Option<JvmsId> {
    let Some(library) = c.intrinsics() else {
        c.print_inlining(method, jvms, InlineOutcome::Failure, "no intrinsic library");
        return None;
    };
    let fork = fork_state(c, jvms)?;
    match library.generate(c, fork, method, is_virtual) {
        Some(exit) if !c.failing() => {
            join_exceptions(c, jvms, exit);
            c.print_inlining(method, jvms, InlineOutcome::Success, "(intrinsic)");
            Some(exit)
        }
        _ => {
            discard_fork(c, fork);
            c.print_inlining(method, jvms, InlineOutcome::Failure, "failed to inline (intrinsic)");
            None
        }
    }
}

/// Emit predicate `predicate` of `method`'s intrinsic in place at `jvms`.
///
/// Returns the control where the predicate fails.
pub(super) fn generate_predicate(c: &mut Compile, jvms: JvmsId, method: MethodId, predicate: u32) -> Option<NodeId> {
    let library = c.intrinsics()?;
    library.generate_predicate(c, jvms, method, predicate)
}

#[cfg(test)]
mod tests {
    use crate::compile::CompileOptions;
    use crate::inline::tests::{call_state, fixture, map_inputs, NegLibrary};
    use crate::inline::{CallGenerator, InlineOutcome};
    use crate::ir::operators::NodeKind;
    use crate::kit::GraphKit;
    use std::sync::Arc;

    #[test]
    fn test_intrinsic_emits_fast_path() {
        let f = fixture();
        let (c, j) = call_state(&f, CompileOptions::default(), 1, &[0]);
        let mut c = c.with_intrinsics(Arc::new(NegLibrary {
            predicates: 0,
            decline: false,
        }));
        let exit = CallGenerator::for_intrinsic(f.twice, false, 0, false)
            .generate(&mut c, j)
            .unwrap();
        let mut kit = GraphKit::new(&mut c, exit);
        let r = kit.pop();
        assert!(matches!(kit.c.graph.kind(r), NodeKind::SubI));
        let rec = c.inline_log().find(f.twice).unwrap();
        assert_eq!(rec.outcome, InlineOutcome::Success);
    }

    #[test]
    fn test_refused_intrinsic_declines_cleanly() {
        let f = fixture();
        let (c, j) = call_state(&f, CompileOptions::default(), 1, &[0]);
        let mut c = c.with_intrinsics(Arc::new(NegLibrary {
            predicates: 0,
            decline: true,
        }));
        let before = map_inputs(&c, j);
        let cg = CallGenerator::for_intrinsic(f.twice, false, 0, false);
        assert!(cg.generate(&mut c, j).is_none());
        assert_eq!(map_inputs(&c, j), before);
        assert_eq!(c.inline_log().failures().count(), 1);
    }
}
