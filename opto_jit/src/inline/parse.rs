//! Inlining by parsing the callee's bytecode.

use crate::ci::MethodId;
use crate::compile::Compile;
use crate::jvms::JvmsId;

use super::{discard_fork, fork_state, join_exceptions, InlineOutcome};

/// Parse `method` into the graph at `jvms`.
///
/// The parser works on a fork of the caller's map; when it declines the
/// fork is dropped and `jvms` is left as it was.
pub(super) fn generate(c: &mut Compile, jvms: JvmsId, method: MethodId, expected_uses: f32) -> Option<JvmsId> {
    let Some(parser) = c.parser() else {
        c.print_inlining(method, jvms, InlineOutcome::Failure, "no bytecode parser");
        return None;
    };
    let fork = fork_state(c, jvms)?;
    match parser.parse(c, fork, method, expected_uses) {
        Some(exit) if !c.failing() => {
            debug_assert!(
                c.jvms.same_calls_as(exit, jvms),
                "inlined body returned to a different frame"
            );
            join_exceptions(c, jvms, exit);
            tracing::trace!(method = %method, expected_uses, "parsed inline");
            Some(exit)
        }
        _ => {
            discard_fork(c, fork);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::compile::CompileOptions;
    use crate::inline::tests::{call_state, fixture, map_inputs, Doubler};
    use crate::inline::CallGenerator;
    use crate::ir::operators::NodeKind;
    use crate::kit::GraphKit;
    use std::sync::Arc;

    #[test]
    fn test_inline_pushes_body_result() {
        let f = fixture();
        let (c, j) = call_state(&f, CompileOptions::default(), 1, &[0]);
        let mut c = c.with_parser(Arc::new(Doubler));
        let exit = CallGenerator::for_inline(f.twice, 1.0).generate(&mut c, j).unwrap();
        assert_ne!(exit, j);

        let mut kit = GraphKit::new(&mut c, exit);
        let sum = kit.pop();
        assert!(matches!(kit.c.graph.kind(sum), NodeKind::AddI));
        assert_eq!(kit.c.graph.input(sum, 1), Some(kit.local(0)));
        assert!(!kit.has_exceptions());
    }

    #[test]
    fn test_decline_leaves_state_untouched() {
        let f = fixture();
        let (c, j) = call_state(&f, CompileOptions::default(), 2, &[1]);
        let mut c = c.with_parser(Arc::new(Doubler));
        let before = map_inputs(&c, j);
        let sp = c.jvms.get(j).sp();
        assert!(CallGenerator::for_inline(f.get, 1.0).generate(&mut c, j).is_none());
        assert_eq!(map_inputs(&c, j), before);
        assert_eq!(c.jvms.get(j).sp(), sp);
    }

    #[test]
    fn test_missing_parser_declines_and_logs() {
        let f = fixture();
        let (mut c, j) = call_state(&f, CompileOptions::default(), 1, &[0]);
        assert!(CallGenerator::for_inline(f.twice, 1.0).generate(&mut c, j).is_none());
        let rec = c.inline_log().find(f.twice).unwrap();
        assert_eq!(rec.msg, "no bytecode parser");
        assert!(!c.failing());
    }

    #[test]
    fn test_pending_exceptions_follow_the_exit() {
        let f = fixture();
        let (c, j) = call_state(&f, CompileOptions::default(), 1, &[0]);
        let mut c = c.with_parser(Arc::new(Doubler));
        // An earlier path threw.
        let ex = c.clone_map(j).unwrap();
        let ex_map = c.jvms.get(ex).map().unwrap();
        let map = c.jvms.get(j).map().unwrap();
        c.graph.sfpt_mut(map).next_exception = Some(ex_map);

        let exit = CallGenerator::for_inline(f.twice, 1.0).generate(&mut c, j).unwrap();
        let exit_map = c.jvms.get(exit).map().unwrap();
        assert_eq!(c.graph.sfpt(exit_map).next_exception, Some(ex_map));
    }
}
