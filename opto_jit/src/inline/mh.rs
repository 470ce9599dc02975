//! Method-handle linker calls.
//!
//! A linker (`invokeBasic`, `linkTo*`) takes its real target from an
//! argument: the method handle receiver for `invokeBasic`, a trailing
//! MemberName for the others. Once that argument is a constant the call
//! binds to the target directly and can be inlined like any other.

use crate::ci::{MethodId, MethodInfo, MhIntrinsic};
use crate::compile::{Bailout, Compile};
use crate::ir::operators::NodeKind;
use crate::ir::types::{BasicType, Nullness, PtrType, Type};
use crate::jvms::JvmsId;

use super::{CallGenerator, InlineOutcome};

/// Basic type after erasure to the linker's calling convention.
fn erased(bt: BasicType) -> BasicType {
    match bt {
        bt if bt.is_int_like() => BasicType::Int,
        BasicType::Array => BasicType::Object,
        bt => bt,
    }
}

/// Whether `resolved` can stand in for `declared` at a call site.
///
/// An ordinary method must match by name and signature. A linker must
/// pass its arguments through unchanged: after dropping the trailing
/// MemberName, the linker's parameters erase to the target's (receiver
/// included), and a non-void return erases to the target's return.
pub fn is_consistent_info(declared: &MethodInfo, resolved: &MethodInfo) -> bool {
    let Some(linker) = declared.mh_intrinsic else {
        return declared.name == resolved.name && declared.signature == resolved.signature;
    };
    if resolved.is_method_handle_intrinsic() {
        return declared.name == resolved.name && declared.signature == resolved.signature;
    }
    match linker {
        MhIntrinsic::LinkToStatic if !resolved.is_static() => return false,
        MhIntrinsic::LinkToVirtual | MhIntrinsic::LinkToInterface | MhIntrinsic::LinkToSpecial
            if resolved.is_static() =>
        {
            return false
        }
        _ => {}
    }

    let appendix = usize::from(linker.has_member_arg());
    if declared.arg_size() != resolved.arg_size() + appendix {
        return false;
    }
    let mut linker_params = declared.signature.with_receiver(declared.is_static());
    if linker.has_member_arg() {
        match linker_params.pop() {
            Some(bt) if bt.is_reference() => {}
            _ => return false,
        }
    }
    let target_params = resolved.signature.with_receiver(resolved.is_static());
    if linker_params.len() != target_params.len() {
        return false;
    }
    let params_match = linker_params
        .iter()
        .zip(&target_params)
        .all(|(&l, &t)| erased(l) == erased(t));
    if !params_match {
        return false;
    }
    declared.signature.ret == BasicType::Void || erased(declared.signature.ret) == erased(resolved.signature.ret)
}

impl CallGenerator {
    /// Generator for a call to the linker `callee` at `jvms`.
    ///
    /// Binds to the target now when the handle is constant. Otherwise the
    /// call is emitted and revisited once the handle may have become
    /// constant, or emitted as a plain call when the site never ran.
    pub fn for_method_handle_call(c: &mut Compile, jvms: JvmsId, callee: MethodId, allow_inline: bool) -> CallGenerator {
        let (cg, input_not_const) = Self::for_method_handle_inline(c, jvms, callee, allow_inline);
        let should_delay = c.should_delay_inlining();
        if let Some(cg) = cg {
            return if should_delay {
                CallGenerator::for_late_inline(callee, cg)
            } else {
                cg
            };
        }
        let site_count = c.call_site_at(jvms).map_or(0, |site| site.profile.count);
        if c.options.incremental_inline_mh
            && site_count > 0
            && (should_delay || input_not_const || !c.inlining_incrementally() || c.over_inlining_cutoff())
        {
            CallGenerator::for_mh_late_inline(callee, input_not_const)
        } else {
            CallGenerator::for_direct_call(callee, false)
        }
    }

    /// Generator for the target of the linker `callee`, if the handle at
    /// `jvms` is constant.
    ///
    /// The flag reports that the handle was not constant, so the call is
    /// worth revisiting. A target whose signature does not fit the call
    /// site fails the compile.
    pub fn for_method_handle_inline(
        c: &mut Compile,
        jvms: JvmsId,
        callee: MethodId,
        allow_inline: bool,
    ) -> (Option<CallGenerator>, bool) {
        let Some(info) = c.method_info(callee) else {
            return (None, false);
        };
        let Some(linker) = info.mh_intrinsic else {
            return (None, false);
        };
        let state = *c.jvms.get(jvms);
        let Some(map) = state.map() else {
            return (None, false);
        };
        let allow_inline = allow_inline && c.options.inline.inline_method_handles;

        // The argument holding the target.
        let handle_arg = match linker {
            MhIntrinsic::InvokeBasic => 0,
            _ => (info.arg_size() as u32).saturating_sub(1),
        };
        let Some(handle) = c.graph.argument(map, &state, handle_arg) else {
            return (None, false);
        };
        let handle_ty = c.graph.ty(handle).clone();
        let Some(obj) = handle_ty.ptr().and_then(|p| p.constant) else {
            if handle_ty.is_null() {
                c.print_inlining(callee, jvms, InlineOutcome::Failure, "receiver is always null");
                return (None, false);
            }
            let msg = match linker {
                MhIntrinsic::InvokeBasic => "receiver not constant",
                _ => "member_name not constant",
            };
            c.print_inlining(callee, jvms, InlineOutcome::Failure, msg);
            return (None, true);
        };

        let oracle = c.oracle().clone();
        let target = match linker {
            MhIntrinsic::InvokeBasic => oracle.method_handle_target(obj),
            _ => oracle.member_name_target(obj),
        };
        let Some(target) = target.and_then(|t| oracle.method(t)) else {
            c.print_inlining(callee, jvms, InlineOutcome::Failure, "unknown method handle target");
            return (None, false);
        };

        if !is_consistent_info(&info, &target) {
            c.print_inlining(callee, jvms, InlineOutcome::Failure, "signatures mismatch");
            c.record_failure(Bailout::SignatureMismatch {
                callee: info.name.clone(),
                target: target.name.clone(),
            });
            return (None, false);
        }

        let mut target_id = target.id;
        let mut vtable_index = None;
        let mut call_does_dispatch = false;
        if linker.has_member_arg() && !target.is_static() {
            // Give the receiver the type the target expects.
            if let Some(recv) = c.graph.argument(map, &state, 0) {
                let recv_ty = c.graph.ty(recv).clone();
                let known = recv_ty
                    .ptr()
                    .and_then(|p| p.klass)
                    .is_some_and(|k| oracle.is_subclass_of(k, target.holder));
                if !known {
                    let nullness = recv_ty.ptr().map_or(Nullness::MaybeNull, |p| p.nullness);
                    let cast_ty = Type::Ptr(PtrType {
                        nullness,
                        ..PtrType::of(Some(target.holder))
                    });
                    let ctrl = c.graph.control(map);
                    let cast = c.graph.add_node(NodeKind::CheckCastPP, cast_ty, &[ctrl, Some(recv)]);
                    let cast = c.graph.transform(cast);
                    c.graph.set_argument(map, &state, 0, Some(cast));
                }
            }

            if matches!(linker, MhIntrinsic::LinkToVirtual | MhIntrinsic::LinkToInterface) {
                let recv_ty = c
                    .graph
                    .argument(map, &state, 0)
                    .map_or(Type::Bottom, |r| c.graph.ty(r).clone());
                match c.optimize_virtual_call(&target, &recv_ty) {
                    Some(bound) => target_id = bound,
                    None => {
                        call_does_dispatch = true;
                        vtable_index = target.vtable_index;
                    }
                }
            }
        }

        tracing::debug!(linker = ?linker, target = %target_id, "method handle bound");
        let cg = c.call_generator(
            target_id,
            vtable_index,
            call_does_dispatch,
            jvms,
            allow_inline,
            1.0,
            None,
            true,
        );
        (Some(cg), false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ci::{KlassId, MethodFlags, ObjectId, Signature};
    use crate::compile::CompileOptions;
    use crate::inline::tests::{call_state, fixture, Fixture};

    fn linker(name: &str, params: &[BasicType], ret: BasicType, mh: MhIntrinsic) -> MethodInfo {
        let flags = match mh {
            MhIntrinsic::InvokeBasic => MethodFlags::NATIVE,
            _ => MethodFlags::STATIC | MethodFlags::NATIVE,
        };
        MethodInfo::new(name, KlassId(0), Signature::new(params, ret), flags).with_mh_intrinsic(mh)
    }

    fn method(name: &str, params: &[BasicType], ret: BasicType, flags: MethodFlags) -> MethodInfo {
        MethodInfo::new(name, KlassId(0), Signature::new(params, ret), flags)
    }

    /// State at the `linkToStatic` site with `member` as the MemberName.
    fn linker_site(f: &Fixture, member: Type) -> (Compile, JvmsId) {
        let (mut c, j) = call_state(f, CompileOptions::default(), 3, &[0, 1]);
        let state = *c.jvms.get(j);
        let map = state.map().unwrap();
        let con = c.graph.makecon(member);
        c.graph.set_argument(map, &state, 1, Some(con));
        (c, j)
    }

    #[test]
    fn test_linker_consistency() {
        let link_static = linker(
            "linkToStatic",
            &[BasicType::Int, BasicType::Object],
            BasicType::Int,
            MhIntrinsic::LinkToStatic,
        );
        let st = method("f", &[BasicType::Short], BasicType::Boolean, MethodFlags::STATIC);
        assert!(is_consistent_info(&link_static, &st));
        let virt = method("f", &[], BasicType::Int, MethodFlags::empty());
        assert!(!is_consistent_info(&link_static, &virt));
        let wide = method("f", &[BasicType::Long], BasicType::Int, MethodFlags::STATIC);
        assert!(!is_consistent_info(&link_static, &wide));

        let link_virtual = linker(
            "linkToVirtual",
            &[BasicType::Object, BasicType::Object],
            BasicType::Void,
            MhIntrinsic::LinkToVirtual,
        );
        assert!(is_consistent_info(&link_virtual, &virt));

        let invoke_basic = linker("invokeBasic", &[BasicType::Int], BasicType::Int, MhIntrinsic::InvokeBasic);
        let lambda_form = method(
            "lf",
            &[BasicType::Object, BasicType::Int],
            BasicType::Int,
            MethodFlags::STATIC,
        );
        assert!(is_consistent_info(&invoke_basic, &lambda_form));
    }

    #[test]
    fn test_plain_methods_match_by_name_and_signature() {
        let a = method("f", &[BasicType::Int], BasicType::Int, MethodFlags::empty());
        let b = method("f", &[BasicType::Int], BasicType::Int, MethodFlags::FINAL);
        let c = method("g", &[BasicType::Int], BasicType::Int, MethodFlags::empty());
        assert!(is_consistent_info(&a, &b));
        assert!(!is_consistent_info(&a, &c));
    }

    #[test]
    fn test_constant_member_name_binds_target() {
        let f = fixture();
        f.reg.bind_member_name(ObjectId(1), f.twice);
        let (mut c, j) = linker_site(&f, Type::oop_con(ObjectId(1), None));
        let (cg, input_not_const) = CallGenerator::for_method_handle_inline(&mut c, j, f.link_static, true);
        assert!(!input_not_const);
        assert_eq!(cg.map(|cg| cg.method()), Some(f.twice));
        assert!(!c.failing());
    }

    #[test]
    fn test_unknown_member_name_defers_call() {
        let f = fixture();
        let (mut c, j) = call_state(&f, CompileOptions::default(), 3, &[0, 1]);
        let (cg, input_not_const) = CallGenerator::for_method_handle_inline(&mut c, j, f.link_static, true);
        assert!(cg.is_none());
        assert!(input_not_const);
        assert_eq!(
            c.inline_log().find(f.link_static).map(|r| r.msg.as_str()),
            Some("member_name not constant")
        );

        let cg = CallGenerator::for_method_handle_call(&mut c, j, f.link_static, true);
        assert!(cg.is_mh_late_inline());
    }

    #[test]
    fn test_mismatched_target_fails_compile() {
        let f = fixture();
        f.reg.bind_member_name(ObjectId(2), f.get);
        let (mut c, j) = linker_site(&f, Type::oop_con(ObjectId(2), None));
        let (cg, _) = CallGenerator::for_method_handle_inline(&mut c, j, f.link_static, true);
        assert!(cg.is_none());
        assert!(matches!(c.failure(), Some(Bailout::SignatureMismatch { .. })));
    }
}
