//! Out-of-line Java calls.

use crate::call::{CallKind, EntryPoint};
use crate::ci::{DeoptAction, DeoptReason, MethodId, MethodInfo};
use crate::compile::Compile;
use crate::ir::node::{NodeFlags, NodeId};
use crate::jvms::JvmsId;
use crate::kit::GraphKit;

use super::method_tf;

/// The site's symbolic callee is a method-handle linker but the call
/// goes straight to `callee`, so the runtime must resolve against the
/// attached method.
fn overrides_symbolic_info(kit: &GraphKit<'_>, callee: &MethodInfo) -> bool {
    if callee.is_method_handle_intrinsic() {
        return false;
    }
    let oracle = kit.c.oracle();
    kit.method()
        .zip(u32::try_from(kit.bci()).ok())
        .and_then(|(m, bci)| oracle.call_site(m, bci))
        .and_then(|site| oracle.method(site.callee))
        .is_some_and(|declared| declared.is_method_handle_intrinsic())
}

/// Emit a statically bound call to `method` at `jvms`.
///
/// Returns the exit state and the call, which is missing when the
/// receiver null check already ended the path.
pub(super) fn emit_direct(
    c: &mut Compile,
    jvms: JvmsId,
    method: MethodId,
    separate_io_proj: bool,
) -> Option<(JvmsId, Option<NodeId>)> {
    let info = c.method_info(method)?;
    let mut kit = GraphKit::new(c, jvms);
    let is_static = info.is_static();
    let override_symbolic_info = overrides_symbolic_info(&kit, &info);

    if !is_static {
        // The map is shared with the caller, so its state sees the cast.
        kit.null_check_receiver_before_call(&info);
        if kit.stopped() {
            return Some((kit.transfer_exceptions_into_jvms(), None));
        }
    }

    let entry = if is_static {
        EntryPoint::ResolveStatic
    } else {
        EntryPoint::ResolveOptVirtual
    };
    let kind = CallKind::StaticJava {
        method: Some(method),
        optimized_virtual: !is_static,
        method_handle_invoke: !is_static && info.is_method_handle_intrinsic(),
        override_symbolic_info,
        is_boxing: info.is_boxing_method(),
        trap_request: None,
    };
    let call = kit.c.graph.make_call(kind, method_tf(&info), entry, None);
    if info.is_boxing_method() {
        kit.c.graph.node_mut(call).flags |= NodeFlags::MACRO;
        kit.c.add_macro_node(call);
    }

    kit.set_arguments_for_java_call(call);
    kit.set_edges_for_java_call(call, separate_io_proj);
    let ret = kit.set_results_for_java_call(call, separate_io_proj);
    if !kit.stopped() {
        kit.push_node(info.signature.ret, ret);
    }
    tracing::trace!(call = %call, method = %method, "direct call");
    Some((kit.transfer_exceptions_into_jvms(), Some(call)))
}

/// Emit a call to `method` dispatched on the receiver's class.
pub(super) fn emit_virtual(
    c: &mut Compile,
    jvms: JvmsId,
    method: MethodId,
    vtable_index: Option<u32>,
    separate_io_proj: bool,
) -> Option<(JvmsId, Option<NodeId>)> {
    let info = c.method_info(method)?;
    debug_assert!(!info.is_static(), "virtual call to a static method");
    let mut kit = GraphKit::new(c, jvms);

    let mut receiver = kit.argument(0);
    if kit.ty(receiver).is_null() {
        // Re-execute the invoke in the interpreter with its arguments.
        let nargs = kit.declared_arg_size(&info);
        kit.inc_sp(nargs);
        kit.uncommon_trap(DeoptReason::NullCheck, DeoptAction::None, false);
        return Some((kit.transfer_exceptions_into_jvms(), None));
    }

    let options = &kit.c.options;
    let (use_inline_caches, implicit, threshold) = (
        options.use_inline_caches,
        options.implicit_null_checks,
        options.implicit_null_check_threshold,
    );
    let site_traps = kit
        .method_info()
        .map_or(0, |m| m.trap_count_total(DeoptReason::NullCheck));
    if !use_inline_caches || !implicit || (threshold > 0 && site_traps >= threshold) {
        receiver = kit.null_check_receiver_before_call(&info);
        if kit.stopped() {
            return Some((kit.transfer_exceptions_into_jvms(), None));
        }
    }

    let kind = CallKind::DynamicJava {
        method,
        vtable_index: if use_inline_caches { None } else { vtable_index },
        override_symbolic_info: overrides_symbolic_info(&kit, &info),
    };
    let call = kit
        .c
        .graph
        .make_call(kind, method_tf(&info), EntryPoint::ResolveVirtual, None);

    kit.set_arguments_for_java_call(call);
    kit.set_edges_for_java_call(call, separate_io_proj);
    let ret = kit.set_results_for_java_call(call, separate_io_proj);
    if !kit.stopped() {
        kit.push_node(info.signature.ret, ret);
        // The call itself null-checks the receiver.
        kit.cast_not_null(receiver);
    }
    tracing::trace!(call = %call, method = %method, "virtual call");
    Some((kit.transfer_exceptions_into_jvms(), Some(call)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::CompileOptions;
    use crate::inline::tests::{call_state, fixture};
    use crate::inline::CallGenerator;
    use crate::ir::operators::NodeKind;

    fn returned_value(c: &mut Compile, exit: JvmsId) -> NodeId {
        let mut kit = GraphKit::new(c, exit);
        kit.pop()
    }

    #[test]
    fn test_static_call_pushes_result() {
        let f = fixture();
        let (mut c, j) = call_state(&f, CompileOptions::default(), 1, &[0]);
        let sp = c.jvms.get(j).sp();
        let (exit, call) = emit_direct(&mut c, j, f.twice, false).unwrap();
        let call = call.unwrap();

        let data = c.graph.call(call);
        assert_eq!(data.entry, EntryPoint::ResolveStatic);
        assert!(matches!(
            data.kind,
            CallKind::StaticJava {
                optimized_virtual: false,
                ..
            }
        ));
        assert_eq!(c.jvms.get(exit).sp(), sp + 1);
        let ret = returned_value(&mut c, exit);
        assert!(matches!(c.graph.kind(ret), NodeKind::Proj { .. }));
        assert_eq!(c.graph.input(ret, 0), Some(call));
        assert!(c.verify_debug_info(call).is_ok());
    }

    #[test]
    fn test_call_may_throw() {
        let f = fixture();
        let (mut c, j) = call_state(&f, CompileOptions::default(), 1, &[0]);
        let exit = CallGenerator::for_direct_call(f.twice, false)
            .generate(&mut c, j)
            .unwrap();
        let kit = GraphKit::new(&mut c, exit);
        assert!(kit.has_exceptions());
    }

    #[test]
    fn test_instance_direct_call_is_optimized_virtual() {
        let f = fixture();
        let (mut c, j) = call_state(&f, CompileOptions::default(), 2, &[1]);
        let (_, call) = emit_direct(&mut c, j, f.b_get, false).unwrap();
        let data = c.graph.call(call.unwrap());
        assert_eq!(data.entry, EntryPoint::ResolveOptVirtual);
        assert!(matches!(
            data.kind,
            CallKind::StaticJava {
                optimized_virtual: true,
                ..
            }
        ));
        // The receiver argument was null-checked first.
        let recv = c.graph.input(call.unwrap(), crate::ir::types::TypeFunc::PARMS).unwrap();
        assert!(!c.graph.ty(recv).maybe_null());
    }

    #[test]
    fn test_virtual_call_with_inline_caches() {
        let f = fixture();
        let (mut c, j) = call_state(&f, CompileOptions::default(), 2, &[1]);
        let (exit, call) = emit_virtual(&mut c, j, f.get, Some(3), false).unwrap();
        let call = call.unwrap();
        assert!(matches!(
            c.graph.call(call).kind,
            CallKind::DynamicJava {
                vtable_index: None,
                ..
            }
        ));
        // After the call the receiver is known non-null.
        let map = c.jvms.get(exit).map().unwrap();
        let state = *c.jvms.get(exit);
        let local = c.graph.local(map, &state, 1).unwrap();
        assert!(!c.graph.ty(local).maybe_null());
    }

    #[test]
    fn test_vtable_call_without_inline_caches() {
        let f = fixture();
        let options = CompileOptions {
            use_inline_caches: false,
            ..Default::default()
        };
        let (mut c, j) = call_state(&f, options, 2, &[1]);
        let (_, call) = emit_virtual(&mut c, j, f.get, Some(3), false).unwrap();
        assert!(matches!(
            c.graph.call(call.unwrap()).kind,
            CallKind::DynamicJava {
                vtable_index: Some(3),
                ..
            }
        ));
    }

    #[test]
    fn test_null_receiver_traps() {
        let f = fixture();
        let (mut c, j) = call_state(&f, CompileOptions::default(), 2, &[1]);
        {
            let null = c.graph.null_con();
            let map = c.jvms.get(j).map().unwrap();
            let state = *c.jvms.get(j);
            c.graph.set_argument(map, &state, 0, Some(null));
        }
        let (exit, call) = emit_virtual(&mut c, j, f.get, None, false).unwrap();
        assert!(call.is_none());
        let kit = GraphKit::new(&mut c, exit);
        assert!(kit.stopped());
    }
}
