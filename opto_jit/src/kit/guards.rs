//! Runtime checks that split off a failing path.
//!
//! The failing path of every check ends in an uncommon trap: a call into
//! the deoptimization blob that transfers the frame to the interpreter
//! and never returns.

use crate::ci::{make_trap_request, DeoptAction, DeoptReason, KlassId, MethodInfo};
use crate::ir::node::NodeId;
use crate::ir::operators::{BoolTest, NodeKind};
use crate::ir::types::{Type, TypeFunc, ALIAS_IDX_BOT};

use super::GraphKit;

/// Probability that a null check passes when the site never failed one.
const PROB_NOT_NULL: f32 = 0.999_999;

/// Probability used when the site already trapped on this check.
const PROB_NOT_NULL_TRAPPED: f32 = 0.999;

impl GraphKit<'_> {
    // =========================================================================
    // Null Checks
    // =========================================================================

    /// Ensure `value` is not null; on the null path the frame deoptimizes.
    ///
    /// Returns `value` cast to not-null, substituted in the map, or
    /// `value` itself when its type already excludes null.
    pub fn null_check(&mut self, value: NodeId) -> NodeId {
        self.null_check_common(value, DeoptReason::NullCheck)
    }

    pub fn null_check_receiver(&mut self) -> NodeId {
        let receiver = self.argument(0);
        self.null_check(receiver)
    }

    /// Null-check the receiver of the call to `callee` with the call's
    /// arguments still on the stack, so a trap re-executes the invoke.
    pub fn null_check_receiver_before_call(&mut self, callee: &MethodInfo) -> NodeId {
        debug_assert!(!callee.is_static(), "null check of a static call's receiver");
        let nargs = self.declared_arg_size(callee);
        self.inc_sp(nargs);
        let n = self.null_check_receiver();
        self.dec_sp(nargs);
        n
    }

    fn null_check_common(&mut self, value: NodeId, reason: DeoptReason) -> NodeId {
        if self.stopped() {
            return self.top();
        }
        let ty = self.ty(value);
        if !ty.maybe_null() {
            return value;
        }

        let too_many = self
            .method_info()
            .is_some_and(|m| self.c.too_many_traps(&m, self.bci(), reason));
        let action = if too_many {
            DeoptAction::None
        } else {
            DeoptAction::MakeNotEntrant
        };

        if ty.is_null() {
            tracing::debug!(value = %value, "null check of a constant null");
            self.uncommon_trap(reason, action, false);
            return self.top();
        }

        let prob = if too_many {
            PROB_NOT_NULL_TRAPPED
        } else {
            PROB_NOT_NULL
        };
        let null = self.c.graph.null_con();
        let cmp = self.make(NodeKind::CmpP, Type::INT, &[None, Some(value), Some(null)]);
        let bol = self.make(NodeKind::Bool(BoolTest::Ne), Type::INT, &[None, Some(cmp)]);
        let (not_null_ctrl, null_ctrl) = self.make_if(bol, prob);

        let saved = self.preserve(true);
        self.set_control(null_ctrl);
        self.uncommon_trap(reason, action, false);
        self.restore(saved);

        self.set_control(not_null_ctrl);
        self.cast_not_null(value)
    }

    /// Pin a not-null view of `value` at the current control and use it
    /// in the map from here on.
    pub fn cast_not_null(&mut self, value: NodeId) -> NodeId {
        let ty = self.ty(value);
        if !ty.maybe_null() || self.stopped() {
            return value;
        }
        let ctrl = self.control();
        let cast = self.make(NodeKind::CastPP, ty.cast_to_not_null(), &[Some(ctrl), Some(value)]);
        self.replace_in_map(value, cast);
        cast
    }

    /// Two-way branch on `bol` at the current control.
    ///
    /// Returns the (true, false) projections.
    pub fn make_if(&mut self, bol: NodeId, prob: f32) -> (NodeId, NodeId) {
        let ctrl = self.control();
        let iff = self.c.graph.add_node(
            NodeKind::If {
                prob,
                cnt: crate::call::COUNT_UNKNOWN,
            },
            Type::Tuple(vec![Type::Control, Type::Control].into_boxed_slice()),
            &[Some(ctrl), Some(bol)],
        );
        let t = self.make(NodeKind::IfTrue, Type::Control, &[Some(iff)]);
        let f = self.make(NodeKind::IfFalse, Type::Control, &[Some(iff)]);
        (t, f)
    }

    // =========================================================================
    // Receiver Class Checks
    // =========================================================================

    /// Test whether `receiver`'s class is exactly `klass`.
    ///
    /// Continues on the hit path and returns the miss control together
    /// with `receiver` cast to the exact class. The caller decides whether
    /// to put the cast in the map.
    pub fn type_check_receiver(&mut self, receiver: NodeId, klass: KlassId, prob: f32) -> (NodeId, NodeId) {
        let mem = self.memory_at(ALIAS_IDX_BOT);
        let recv_klass = self.make(
            NodeKind::LoadKlass,
            Type::KlassPtr(None),
            &[None, Some(mem), Some(receiver)],
        );
        let want = self.makecon(Type::KlassPtr(Some(klass)));
        let cmp = self.make(NodeKind::CmpP, Type::INT, &[None, Some(recv_klass), Some(want)]);
        let bol = self.make(NodeKind::Bool(BoolTest::Eq), Type::INT, &[None, Some(cmp)]);
        let (hit, miss) = self.make_if(bol, prob);
        self.set_control(hit);

        let exact = self.ty(receiver).cast_to_exact(klass).cast_to_not_null();
        let casted = self.make(NodeKind::CheckCastPP, exact, &[Some(hit), Some(receiver)]);
        (miss, casted)
    }

    // =========================================================================
    // Uncommon Traps
    // =========================================================================

    /// End the current path in a deoptimization.
    ///
    /// A recompiling action is downgraded to [`DeoptAction::None`] when
    /// the site already caused too many recompilations, unless
    /// `keep_exact_action` is set. The youngest frame re-executes its
    /// bytecode in the interpreter.
    pub fn uncommon_trap(
        &mut self,
        reason: DeoptReason,
        action: DeoptAction,
        keep_exact_action: bool,
    ) {
        if self.stopped() {
            return;
        }
        let mut action = action;
        if matches!(action, DeoptAction::MaybeRecompile | DeoptAction::Reinterpret) && !keep_exact_action {
            let too_many = self
                .method_info()
                .is_some_and(|m| self.c.too_many_recompiles(&m, self.bci(), reason));
            if too_many {
                tracing::debug!(reason = reason.name(), bci = self.bci(), "too many recompiles, trap only");
                action = DeoptAction::None;
            }
        }
        let request = make_trap_request(reason, action);

        let call = self.c.graph.make_uncommon_trap_call(request);
        let ctrl = self.control();
        let io = self.i_o();
        let mem = self.reset_memory();
        let fp = self.frameptr();
        let ra = self.returnadr();
        let arg = self.intcon(request);
        self.c.graph.init_req(call, TypeFunc::CONTROL, Some(ctrl));
        self.c.graph.init_req(call, TypeFunc::I_O, Some(io));
        self.c.graph.init_req(call, TypeFunc::MEMORY, Some(mem));
        self.c.graph.init_req(call, TypeFunc::FRAME_PTR, Some(fp));
        self.c.graph.init_req(call, TypeFunc::RETURN_ADR, Some(ra));
        self.c.graph.init_req(call, TypeFunc::PARMS, Some(arg));
        self.add_safepoint_edges(call, true);

        let call_ctrl = self
            .c
            .graph
            .make_proj(call, TypeFunc::CONTROL as u32, false, Type::Control);
        let halt = self
            .c
            .graph
            .add_node(NodeKind::Halt, Type::Control, &[Some(call_ctrl), Some(fp)]);
        let root = self.c.root();
        self.c.graph.add_req(root, Some(halt));
        tracing::debug!(
            call = %call,
            reason = reason.name(),
            action = ?action,
            bci = self.bci(),
            "uncommon trap"
        );
        self.stop_and_kill_map();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kit::tests::entry_compile;

    #[test]
    fn test_null_check_splits_and_casts() {
        let (mut c, j, _) = entry_compile();
        let mut kit = GraphKit::new(&mut c, j);
        let obj = kit.local(1);
        let before = kit.c.graph.req(kit.c.root());
        let cast = kit.null_check(obj);
        assert_ne!(cast, obj);
        assert!(!kit.ty(cast).maybe_null());
        assert_eq!(kit.local(1), cast);
        assert!(!kit.stopped());
        assert!(matches!(kit.c.graph.kind(kit.control()), NodeKind::IfTrue));
        // The null path ends in a trap that halts.
        assert_eq!(kit.c.graph.req(kit.c.root()), before + 1);
    }

    #[test]
    fn test_null_check_of_non_null_is_free() {
        let (mut c, j, _) = entry_compile();
        let mut kit = GraphKit::new(&mut c, j);
        let i = kit.local(0);
        let unique = kit.c.unique();
        assert_eq!(kit.null_check(i), i);
        assert_eq!(kit.c.unique(), unique);
    }

    #[test]
    fn test_null_constant_stops() {
        let (mut c, j, _) = entry_compile();
        let mut kit = GraphKit::new(&mut c, j);
        let null = kit.c.graph.null_con();
        let r = kit.null_check(null);
        assert!(kit.c.graph.is_top(r));
        assert!(kit.stopped());
    }

    #[test]
    fn test_uncommon_trap_debug_info() {
        let (mut c, j, _) = entry_compile();
        let mut kit = GraphKit::new(&mut c, j);
        kit.uncommon_trap(DeoptReason::ClassCheck, DeoptAction::MaybeRecompile, true);
        assert!(kit.stopped());
        let root = kit.c.root();
        let halt = kit.c.graph.input(root, kit.c.graph.req(root) - 1).unwrap();
        let proj = kit.c.graph.input(halt, 0).unwrap();
        let call = kit.c.graph.input(proj, 0).unwrap();
        assert_eq!(
            kit.c.graph.uncommon_trap_parts(call),
            Some((DeoptReason::ClassCheck as u8, DeoptAction::MaybeRecompile as u8))
        );
        let cj = kit.c.graph.node(call).jvms().unwrap();
        assert!(kit.c.jvms.get(cj).should_reexecute());
        assert!(kit.c.verify_debug_info(call).is_ok());
    }

    #[test]
    fn test_type_check_receiver() {
        let (mut c, j, _) = entry_compile();
        let mut kit = GraphKit::new(&mut c, j);
        let obj = kit.local(1);
        let (miss, casted) = kit.type_check_receiver(obj, KlassId(0), 0.9);
        assert!(matches!(kit.c.graph.kind(miss), NodeKind::IfFalse));
        assert!(matches!(kit.c.graph.kind(kit.control()), NodeKind::IfTrue));
        let ptr = kit.ty(casted);
        assert_eq!(ptr.ptr().and_then(|p| p.klass), Some(KlassId(0)));
        assert!(ptr.ptr().is_some_and(|p| p.exact));
    }
}
