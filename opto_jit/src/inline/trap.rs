//! Deoptimizing call sites.

use crate::ci::{DeoptAction, DeoptReason, MethodId};
use crate::compile::Compile;
use crate::jvms::JvmsId;
use crate::kit::GraphKit;

/// End the path at the invoke in an uncommon trap.
///
/// The call-site arguments go back on the stack so the interpreter
/// re-executes the invoke. A class-check trap asking for recompilation
/// keeps that action even when the site already recompiled often.
pub(super) fn generate(
    c: &mut Compile,
    jvms: JvmsId,
    method: MethodId,
    reason: DeoptReason,
    action: DeoptAction,
) -> Option<JvmsId> {
    let info = c.method_info(method)?;
    let mut kit = GraphKit::new(c, jvms);
    let nargs = kit.declared_arg_size(&info);
    kit.inc_sp(nargs);
    let keep_exact_action = reason == DeoptReason::ClassCheck && action == DeoptAction::MaybeRecompile;
    kit.uncommon_trap(reason, action, keep_exact_action);
    Some(kit.transfer_exceptions_into_jvms())
}
