//! Call-site nodes.
//!
//! Every call is a safepoint with a signature, an entry point and a
//! flavor. The flavors mirror how the call is dispatched or expanded:
//!
//! ```text
//!   Call
//!   ├── Java
//!   │   ├── StaticJava     static, special, optimized virtual, traps
//!   │   └── DynamicJava    vtable / itable dispatch
//!   ├── Runtime            VM runtime entry with a safepoint
//!   ├── Leaf / LeafNoFp    runtime entry without a safepoint
//!   └── Macro
//!       ├── Allocate
//!       └── Lock / Unlock
//! ```
//!
//! A call produces a tuple consumed by projections at the fixed
//! [`TypeFunc`] positions; exceptional control leaves through a
//! `Catch` built by [`Graph::make_catch_shape`].

pub mod convention;
pub mod projections;

pub use convention::{CallingConvention, Convention, VmReg};
pub use projections::CallProjections;

use crate::ci::{trap_request_parts, MethodId};
use crate::ir::graph::Graph;
use crate::ir::node::NodeId;
use crate::ir::operators::{NodeKind, Opcode};
use crate::ir::types::{AdrType, Type, TypeFunc};
use crate::jvms::{JvmsId, SafePointData};

/// Invocation count of a call with no profile.
pub const COUNT_UNKNOWN: f32 = -1.0;

/// Handler bci of a catch projection with no specific handler.
pub const NO_HANDLER_BCI: i32 = -1;

/// `CatchProj` number of the normal path.
pub const FALL_THROUGH_INDEX: u32 = 0;

/// `CatchProj` number of the exceptional path.
pub const CATCH_ALL_INDEX: u32 = 1;

// =============================================================================
// Entry Points
// =============================================================================

/// Where a call jumps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryPoint {
    /// Static or special call, resolved on first execution.
    ResolveStatic,
    /// Optimized virtual call bound to one target, resolved on first
    /// execution.
    ResolveOptVirtual,
    /// Inline-cache or vtable dispatch.
    ResolveVirtual,
    /// A known code address.
    Resolved(u64),
    /// A named VM runtime stub.
    Runtime(&'static str),
}

// =============================================================================
// Call Kinds
// =============================================================================

/// Flavor of a call node.
#[derive(Debug, Clone, PartialEq)]
pub enum CallKind {
    /// Statically bound Java call.
    StaticJava {
        method: Option<MethodId>,
        /// A virtual call proven to have a single target.
        optimized_virtual: bool,
        /// Call through a method handle.
        method_handle_invoke: bool,
        /// The linker must use the attached method rather than the
        /// call-site's symbolic reference.
        override_symbolic_info: bool,
        /// Call to a box-valueOf method, removable when its result is unused.
        is_boxing: bool,
        /// Encoded trap request when this is an uncommon trap.
        trap_request: Option<i32>,
    },
    /// Virtual or interface Java call.
    DynamicJava {
        method: MethodId,
        vtable_index: Option<u32>,
        override_symbolic_info: bool,
    },
    /// Runtime call that may safepoint.
    Runtime { name: &'static str },
    /// Runtime call that never safepoints.
    Leaf { name: &'static str },
    /// Leaf call that does not touch floating point state.
    LeafNoFp { name: &'static str },
    /// Object or array allocation, expanded later.
    Allocate { array: bool },
    /// Monitor enter, expanded later.
    Lock,
    /// Monitor exit, expanded later.
    Unlock,
}

impl CallKind {
    /// A plain static Java call to `method`.
    pub fn static_java(method: MethodId) -> Self {
        CallKind::StaticJava {
            method: Some(method),
            optimized_virtual: false,
            method_handle_invoke: false,
            override_symbolic_info: false,
            is_boxing: false,
            trap_request: None,
        }
    }

    pub fn opcode(&self) -> Opcode {
        match self {
            CallKind::StaticJava { .. } => Opcode::CallStaticJava,
            CallKind::DynamicJava { .. } => Opcode::CallDynamicJava,
            CallKind::Runtime { .. } => Opcode::CallRuntime,
            CallKind::Leaf { .. } => Opcode::CallLeaf,
            CallKind::LeafNoFp { .. } => Opcode::CallLeafNoFp,
            CallKind::Allocate { array: false } => Opcode::Allocate,
            CallKind::Allocate { array: true } => Opcode::AllocateArray,
            CallKind::Lock => Opcode::Lock,
            CallKind::Unlock => Opcode::Unlock,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CallKind::StaticJava { .. } => "CallStaticJava",
            CallKind::DynamicJava { .. } => "CallDynamicJava",
            CallKind::Runtime { .. } => "CallRuntime",
            CallKind::Leaf { .. } => "CallLeaf",
            CallKind::LeafNoFp { .. } => "CallLeafNoFP",
            CallKind::Allocate { array: false } => "Allocate",
            CallKind::Allocate { array: true } => "AllocateArray",
            CallKind::Lock => "Lock",
            CallKind::Unlock => "Unlock",
        }
    }

    /// Expanded into a low-level sequence by macro expansion.
    pub fn is_macro(&self) -> bool {
        matches!(
            self,
            CallKind::Allocate { .. } | CallKind::Lock | CallKind::Unlock
        )
    }

    pub fn is_java(&self) -> bool {
        matches!(self, CallKind::StaticJava { .. } | CallKind::DynamicJava { .. })
    }

    pub fn is_static_java(&self) -> bool {
        matches!(self, CallKind::StaticJava { .. })
    }

    pub fn is_dynamic_java(&self) -> bool {
        matches!(self, CallKind::DynamicJava { .. })
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, CallKind::Leaf { .. } | CallKind::LeafNoFp { .. })
    }

    /// Java method being called.
    pub fn method(&self) -> Option<MethodId> {
        match *self {
            CallKind::StaticJava { method, .. } => method,
            CallKind::DynamicJava { method, .. } => Some(method),
            _ => None,
        }
    }

    pub fn is_boxing_method(&self) -> bool {
        matches!(self, CallKind::StaticJava { is_boxing: true, .. })
    }

    pub fn is_uncommon_trap(&self) -> bool {
        matches!(
            self,
            CallKind::StaticJava {
                trap_request: Some(_),
                ..
            }
        )
    }

    /// Stops at a safepoint on every path.
    ///
    /// Leaf calls and macro nodes, whose fast paths never reach the VM, do
    /// not.
    pub fn guaranteed_safepoint(&self) -> bool {
        matches!(
            self,
            CallKind::StaticJava { .. } | CallKind::DynamicJava { .. } | CallKind::Runtime { .. }
        )
    }
}

// =============================================================================
// Call Data
// =============================================================================

/// Payload of a call node.
#[derive(Debug, Clone)]
pub struct CallData {
    pub sfpt: SafePointData,
    pub tf: TypeFunc,
    pub entry: EntryPoint,
    /// Profiled invocation count, [`COUNT_UNKNOWN`] if none.
    pub cnt: f32,
    pub kind: CallKind,
}

/// The control shape hanging off a call that may throw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatchShape {
    pub catch: NodeId,
    /// Normal continuation.
    pub fall_through: NodeId,
    /// Exceptional continuation.
    pub catch_all: NodeId,
    /// Thrown exception, created on the catch-all path.
    pub ex_oop: NodeId,
}

// =============================================================================
// Construction
// =============================================================================

impl Graph {
    /// A call of flavor `kind`. Inputs are sized to the signature and left
    /// empty.
    pub fn make_call(
        &mut self,
        kind: CallKind,
        tf: TypeFunc,
        entry: EntryPoint,
        jvms: Option<JvmsId>,
    ) -> NodeId {
        let inputs = vec![None; tf.domain_cnt()];
        let ty = tf.range_tuple();
        let data = CallData {
            sfpt: SafePointData::new(jvms),
            tf,
            entry,
            cnt: COUNT_UNKNOWN,
            kind,
        };
        let call = self.add_node(NodeKind::Call(Box::new(data)), ty, &inputs);
        tracing::trace!(call = %call, kind = self.kind(call).name(), "new call");
        call
    }

    pub fn make_static_java_call(&mut self, tf: TypeFunc, method: MethodId) -> NodeId {
        self.make_call(CallKind::static_java(method), tf, EntryPoint::ResolveStatic, None)
    }

    pub fn make_dynamic_java_call(
        &mut self,
        tf: TypeFunc,
        method: MethodId,
        vtable_index: Option<u32>,
    ) -> NodeId {
        self.make_call(
            CallKind::DynamicJava {
                method,
                vtable_index,
                override_symbolic_info: false,
            },
            tf,
            EntryPoint::ResolveVirtual,
            None,
        )
    }

    /// Static call into the uncommon-trap blob carrying `trap_request`.
    pub fn make_uncommon_trap_call(&mut self, trap_request: i32) -> NodeId {
        let tf = TypeFunc::new(&[crate::ir::types::BasicType::Int], crate::ir::types::BasicType::Void);
        self.make_call(
            CallKind::StaticJava {
                method: None,
                optimized_virtual: false,
                method_handle_invoke: false,
                override_symbolic_info: false,
                is_boxing: false,
                trap_request: Some(trap_request),
            },
            tf,
            EntryPoint::Runtime("uncommon_trap"),
            None,
        )
    }

    /// Runtime call of flavor `Runtime`, `Leaf` or `LeafNoFp`.
    pub fn make_runtime_call(&mut self, kind: CallKind, tf: TypeFunc) -> NodeId {
        let name = match kind {
            CallKind::Runtime { name } | CallKind::Leaf { name } | CallKind::LeafNoFp { name } => name,
            _ => "runtime",
        };
        debug_assert!(!kind.is_java() && !kind.is_macro(), "not a runtime call");
        self.make_call(kind, tf, EntryPoint::Runtime(name), None)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Payload of call `n`.
    ///
    /// # Panics
    ///
    /// If `n` is not a call.
    pub fn call(&self, n: NodeId) -> &CallData {
        match self.node(n).as_call() {
            Some(c) => c,
            None => panic!("{} is not a call", n),
        }
    }

    pub fn call_mut(&mut self, n: NodeId) -> &mut CallData {
        match self.node_mut(n).as_call_mut() {
            Some(c) => c,
            None => panic!("call payload requested of a non-call"),
        }
    }

    pub fn is_call(&self, n: NodeId) -> bool {
        self.node(n).is_call()
    }

    pub fn guaranteed_safepoint(&self, call: NodeId) -> bool {
        self.call(call).kind.guaranteed_safepoint()
    }

    /// The call returns an object reference.
    pub fn returns_pointer(&self, call: NodeId) -> bool {
        matches!(self.call(call).tf.range, Some(Type::Ptr(_)))
    }

    /// Decoded `(reason, action)` of an uncommon-trap call.
    pub fn uncommon_trap_parts(&self, call: NodeId) -> Option<(u8, u8)> {
        match self.call(call).kind {
            CallKind::StaticJava {
                trap_request: Some(r),
                ..
            } => Some(trap_request_parts(r)),
            _ => None,
        }
    }

    // =========================================================================
    // Memory Effects
    // =========================================================================

    /// Whether `call` may write memory of category `adr`.
    ///
    /// Conservative: `true` unless the call provably leaves `adr` alone.
    pub fn may_modify(&self, call: NodeId, adr: &AdrType) -> bool {
        let data = self.call(call);
        if data.kind.is_macro() {
            return false;
        }
        match adr {
            AdrType::Bottom => true,
            AdrType::Raw => true,
            AdrType::Klass => !data.kind.is_java(),
            AdrType::Field { .. } | AdrType::Array { .. } => {
                if data.kind.is_leaf() {
                    // Leaf stubs only write through pointers they are given.
                    return self.call_has_pointer_arg(call);
                }
                if let Some(id) = adr.instance_id() {
                    return self.call_passes_instance(call, id);
                }
                if data.kind.is_boxing_method() {
                    return self.boxing_call_may_modify(call, adr);
                }
                true
            }
        }
    }

    fn call_args(&self, call: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        (TypeFunc::PARMS..self.req(call)).filter_map(move |i| self.input(call, i))
    }

    fn call_has_pointer_arg(&self, call: NodeId) -> bool {
        self.call(call)
            .tf
            .domain
            .iter()
            .any(|t| matches!(t, Type::Ptr(_) | Type::RawPtr))
    }

    fn call_passes_instance(&self, call: NodeId, instance_id: u32) -> bool {
        self.call_args(call)
            .filter_map(|a| self.ty(a).ptr())
            .any(|p| p.instance_id == Some(instance_id))
    }

    /// A box-valueOf call writes only the box it returns.
    fn boxing_call_may_modify(&self, call: NodeId, adr: &AdrType) -> bool {
        let AdrType::Field { holder, .. } = adr else {
            return false;
        };
        match self.proj_out(call, TypeFunc::PARMS as u32) {
            Some(res) => self
                .ty(res)
                .ptr()
                .is_some_and(|p| p.klass.is_none() || p.klass == Some(*holder)),
            None => false,
        }
    }

    // =========================================================================
    // Exception Shape
    // =========================================================================

    /// Split the control after `call` into normal and exceptional paths.
    ///
    /// `ctrl` is the call's control projection and `io` the io projection
    /// feeding the exceptional path.
    pub fn make_catch_shape(&mut self, ctrl: NodeId, io: NodeId, ex_type: Type) -> CatchShape {
        let catch = self.add_node(NodeKind::Catch, Type::Control, &[Some(ctrl), Some(io)]);
        let fall_through = self.add_node(
            NodeKind::CatchProj {
                con: FALL_THROUGH_INDEX,
                handler_bci: NO_HANDLER_BCI,
            },
            Type::Control,
            &[Some(catch)],
        );
        let fall_through = self.transform(fall_through);
        let catch_all = self.add_node(
            NodeKind::CatchProj {
                con: CATCH_ALL_INDEX,
                handler_bci: NO_HANDLER_BCI,
            },
            Type::Control,
            &[Some(catch)],
        );
        let catch_all = self.transform(catch_all);
        let ex_oop = self.add_node(NodeKind::CreateEx, ex_type, &[Some(catch_all), Some(io)]);
        CatchShape {
            catch,
            fall_through,
            catch_all,
            ex_oop,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ci::{make_trap_request, DeoptAction, DeoptReason, KlassId};
    use crate::ir::types::{BasicType, PtrType};

    fn tf_obj_int() -> TypeFunc {
        TypeFunc::new(&[BasicType::Object, BasicType::Int], BasicType::Object)
    }

    #[test]
    fn test_call_sized_by_signature() {
        let mut g = Graph::new();
        let c = g.make_static_java_call(tf_obj_int(), MethodId(3));
        assert_eq!(g.req(c), TypeFunc::PARMS + 2);
        assert_eq!(g.opcode(c), Opcode::CallStaticJava);
        assert!(g.node(c).is_call());
        assert!(g.node(c).is_safepoint());
        assert!(g.guaranteed_safepoint(c));
        assert!(g.returns_pointer(c));
        assert_eq!(g.call(c).kind.method(), Some(MethodId(3)));
        assert_eq!(g.call(c).entry, EntryPoint::ResolveStatic);
    }

    #[test]
    fn test_wide_params_take_two_inputs() {
        let mut g = Graph::new();
        let tf = TypeFunc::new(&[BasicType::Long, BasicType::Double], BasicType::Void);
        let c = g.make_dynamic_java_call(tf, MethodId(1), Some(4));
        assert_eq!(g.req(c), TypeFunc::PARMS + 4);
        assert!(!g.returns_pointer(c));
    }

    #[test]
    fn test_guaranteed_safepoint_by_kind() {
        assert!(!CallKind::Leaf { name: "x" }.guaranteed_safepoint());
        assert!(!CallKind::LeafNoFp { name: "x" }.guaranteed_safepoint());
        assert!(!CallKind::Lock.guaranteed_safepoint());
        assert!(!CallKind::Allocate { array: true }.guaranteed_safepoint());
        assert!(CallKind::Runtime { name: "x" }.guaranteed_safepoint());
        assert!(CallKind::Lock.is_macro());
        assert_eq!(CallKind::Allocate { array: true }.opcode(), Opcode::AllocateArray);
    }

    #[test]
    fn test_macro_calls_modify_nothing() {
        let mut g = Graph::new();
        let tf = TypeFunc::new(&[BasicType::Object], BasicType::Void);
        for kind in [CallKind::Allocate { array: false }, CallKind::Lock, CallKind::Unlock] {
            let c = g.make_call(kind, tf.clone(), EntryPoint::Runtime("stub"), None);
            assert!(!g.may_modify(c, &AdrType::Bottom));
            assert!(!g.may_modify(c, &AdrType::Raw));
        }
    }

    #[test]
    fn test_known_instance_only_if_passed() {
        let mut g = Graph::new();
        let c = g.make_static_java_call(tf_obj_int(), MethodId(0));
        let field = AdrType::Field {
            holder: KlassId(1),
            offset: 12,
            instance_id: Some(7),
        };
        assert!(!g.may_modify(c, &field));

        let mut p = PtrType::of(Some(KlassId(1)));
        p.instance_id = Some(7);
        let arg = g.makecon(Type::Ptr(p));
        g.set_req(c, TypeFunc::PARMS, Some(arg));
        assert!(g.may_modify(c, &field));
        assert!(g.may_modify(c, &AdrType::Bottom));
    }

    #[test]
    fn test_uncommon_trap_call() {
        let mut g = Graph::new();
        let req = make_trap_request(DeoptReason::ClassCheck, DeoptAction::MaybeRecompile);
        let c = g.make_uncommon_trap_call(req);
        assert!(g.call(c).kind.is_uncommon_trap());
        assert_eq!(
            g.uncommon_trap_parts(c),
            Some((DeoptReason::ClassCheck as u8, DeoptAction::MaybeRecompile as u8))
        );
    }

    #[test]
    fn test_catch_shape() {
        let mut g = Graph::new();
        let c = g.make_static_java_call(tf_obj_int(), MethodId(0));
        let ctrl = g.make_proj(c, TypeFunc::CONTROL as u32, false, Type::Control);
        let io = g.make_proj(c, TypeFunc::I_O as u32, true, Type::Abio);
        let shape = g.make_catch_shape(ctrl, io, Type::oop(None).cast_to_not_null());
        assert_eq!(g.unique_ctrl_out(ctrl), Some(shape.catch));
        assert_eq!(g.node(shape.fall_through).proj_con(), Some(FALL_THROUGH_INDEX));
        assert_eq!(g.node(shape.catch_all).proj_con(), Some(CATCH_ALL_INDEX));
        assert_eq!(g.input(shape.ex_oop, 0), Some(shape.catch_all));
        assert!(g.verify().is_ok());
    }
}
