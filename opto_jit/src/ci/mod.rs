//! Read-only view of class and method metadata.
//!
//! The inliner never owns or mutates metadata. It asks a [`MethodOracle`]
//! about methods (modifiers, signature, size, intrinsic identity), classes
//! (hierarchy, method resolution), per-call-site profiles and the
//! deoptimization history of each bytecode.
//!
//! [`MethodRegistry`] is an in-memory oracle that compile drivers and tests
//! populate up front.

mod registry;

pub use registry::MethodRegistry;

use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::ir::types::BasicType;

// =============================================================================
// Identifiers
// =============================================================================

macro_rules! define_id {
    ($(#[$doc:meta])* $name:ident, $prefix:literal) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub u32);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

define_id!(
    /// A method known to the oracle.
    MethodId,
    "m"
);
define_id!(
    /// A class known to the oracle.
    KlassId,
    "k"
);
define_id!(
    /// A constant heap object (method handles, member names, strings).
    ObjectId,
    "o"
);

// =============================================================================
// Method Properties
// =============================================================================

bitflags::bitflags! {
    /// Method modifiers and inliner-relevant properties.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct MethodFlags: u16 {
        const STATIC = 1 << 0;
        const FINAL = 1 << 1;
        const PRIVATE = 1 << 2;
        const ABSTRACT = 1 << 3;
        const NATIVE = 1 << 4;
        const SYNCHRONIZED = 1 << 5;
        /// Has verified bytecode the parser can consume.
        const PARSEABLE = 1 << 6;
        /// A `valueOf` boxing method.
        const BOXING = 1 << 7;
        /// A string-builder method handled by the string-concat pass.
        const STRING_OPT = 1 << 8;
        /// Annotated to always inline.
        const FORCE_INLINE = 1 << 9;
        /// Annotated to never inline.
        const DONT_INLINE = 1 << 10;
        /// Declared in an interface.
        const INTERFACE = 1 << 11;
        /// Has no side effects; calls with unused results can be dropped.
        const PURE = 1 << 12;
    }
}

/// Method-handle linkage intrinsics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MhIntrinsic {
    /// `MethodHandle.invokeBasic`: target comes from the receiver.
    InvokeBasic,
    /// `linkToVirtual`: target comes from the trailing MemberName.
    LinkToVirtual,
    /// `linkToStatic`.
    LinkToStatic,
    /// `linkToSpecial`.
    LinkToSpecial,
    /// `linkToInterface`.
    LinkToInterface,
}

impl MhIntrinsic {
    /// The target is read from a trailing MemberName argument.
    pub fn has_member_arg(self) -> bool {
        !matches!(self, MhIntrinsic::InvokeBasic)
    }
}

/// Identity of a method with a hand-written compiled body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IntrinsicId(pub u16);

/// Java method signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signature {
    pub params: Vec<BasicType>,
    pub ret: BasicType,
}

impl Signature {
    pub fn new(params: &[BasicType], ret: BasicType) -> Self {
        Signature {
            params: params.to_vec(),
            ret,
        }
    }

    /// Slots taken by the declared parameters (no receiver).
    pub fn size(&self) -> usize {
        self.params.iter().map(|bt| bt.size()).sum()
    }

    /// Interpreter argument slots, counting the receiver unless static.
    pub fn arg_size(&self, is_static: bool) -> usize {
        self.size() + usize::from(!is_static)
    }

    /// Parameter types with the receiver prepended unless static.
    pub fn with_receiver(&self, is_static: bool) -> Vec<BasicType> {
        let mut all = Vec::with_capacity(self.params.len() + 1);
        if !is_static {
            all.push(BasicType::Object);
        }
        all.extend_from_slice(&self.params);
        all
    }
}

// =============================================================================
// Deoptimization
// =============================================================================

/// Why compiled code gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DeoptReason {
    None = 0,
    NullCheck,
    NullAssert,
    RangeCheck,
    ClassCheck,
    ArrayCheck,
    Intrinsic,
    Bimorphic,
    Unloaded,
    Uninitialized,
    Unreached,
    Unhandled,
    Constraint,
    Div0Check,
    Predicate,
    SpeculateClassCheck,
    UnstableIf,
}

impl DeoptReason {
    pub fn name(self) -> &'static str {
        match self {
            DeoptReason::None => "none",
            DeoptReason::NullCheck => "null_check",
            DeoptReason::NullAssert => "null_assert",
            DeoptReason::RangeCheck => "range_check",
            DeoptReason::ClassCheck => "class_check",
            DeoptReason::ArrayCheck => "array_check",
            DeoptReason::Intrinsic => "intrinsic",
            DeoptReason::Bimorphic => "bimorphic",
            DeoptReason::Unloaded => "unloaded",
            DeoptReason::Uninitialized => "uninitialized",
            DeoptReason::Unreached => "unreached",
            DeoptReason::Unhandled => "unhandled",
            DeoptReason::Constraint => "constraint",
            DeoptReason::Div0Check => "div0_check",
            DeoptReason::Predicate => "predicate",
            DeoptReason::SpeculateClassCheck => "speculate_class_check",
            DeoptReason::UnstableIf => "unstable_if",
        }
    }
}

/// What the runtime does after a trap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DeoptAction {
    /// Just interpret; keep the compiled code.
    None = 0,
    /// Recompile once the trap has fired often enough.
    MaybeRecompile,
    /// Invalidate and reprofile.
    Reinterpret,
    /// Invalidate the compiled code.
    MakeNotEntrant,
    /// Never compile the method again.
    MakeNotCompilable,
}

const TRAP_ACTION_BITS: i32 = 3;

/// Encode a trap request as passed to the uncommon-trap runtime stub.
pub fn make_trap_request(reason: DeoptReason, action: DeoptAction) -> i32 {
    !(((reason as i32) << TRAP_ACTION_BITS) | action as i32)
}

/// Decode a trap request.
pub fn trap_request_parts(request: i32) -> (u8, u8) {
    let raw = !request;
    ((raw >> TRAP_ACTION_BITS) as u8, (raw & ((1 << TRAP_ACTION_BITS) - 1)) as u8)
}

// =============================================================================
// Profiles
// =============================================================================

/// Profile of one call site.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallSiteProfile {
    /// Times the call executed.
    pub count: u32,
    /// Receiver classes seen, with counts.
    pub receivers: Vec<(KlassId, u32)>,
}

impl CallSiteProfile {
    /// Receiver seen in at least `percent`% of profiled calls.
    pub fn dominant_receiver(&self, percent: u32) -> Option<(KlassId, f32)> {
        let total: u64 = self.receivers.iter().map(|&(_, c)| c as u64).sum();
        let total = total.max(self.count as u64);
        if total == 0 {
            return None;
        }
        let &(klass, hits) = self.receivers.iter().max_by_key(|(_, c)| *c)?;
        let ratio = hits as f32 / total as f32;
        (hits as u64 * 100 >= percent as u64 * total).then_some((klass, ratio))
    }
}

/// What the bytecode says about one call site.
#[derive(Debug, Clone, PartialEq)]
pub struct CallSiteInfo {
    /// Symbolic (declared) target.
    pub callee: MethodId,
    /// Call-site signature when it differs from the callee's (signature
    /// polymorphic sites).
    pub declared_signature: Option<Signature>,
    pub profile: CallSiteProfile,
}

// =============================================================================
// Methods and Classes
// =============================================================================

/// Properties of one method.
#[derive(Debug, Clone)]
pub struct MethodInfo {
    pub id: MethodId,
    pub name: String,
    pub holder: KlassId,
    pub signature: Signature,
    pub flags: MethodFlags,
    /// Bytecode size.
    pub code_size: u32,
    pub max_locals: u16,
    pub max_stack: u16,
    pub invocation_count: u32,
    pub vtable_index: Option<u32>,
    pub intrinsic: Option<IntrinsicId>,
    pub mh_intrinsic: Option<MhIntrinsic>,
    /// Call sites by bci.
    pub call_sites: FxHashMap<u32, CallSiteInfo>,
    /// Trap counts by (bci, reason).
    pub traps: FxHashMap<(u32, DeoptReason), u32>,
    /// Times this method was recompiled after traps.
    pub recompiles: u32,
}

impl MethodInfo {
    /// A parseable method with no profile data yet.
    pub fn new(name: impl Into<String>, holder: KlassId, signature: Signature, flags: MethodFlags) -> Self {
        let max_locals = (signature.arg_size(flags.contains(MethodFlags::STATIC)) as u16).max(1);
        MethodInfo {
            id: MethodId(u32::MAX),
            name: name.into(),
            holder,
            signature,
            flags,
            code_size: 16,
            max_locals,
            max_stack: 4,
            invocation_count: 0,
            vtable_index: None,
            intrinsic: None,
            mh_intrinsic: None,
            call_sites: FxHashMap::default(),
            traps: FxHashMap::default(),
            recompiles: 0,
        }
    }

    pub fn with_code_size(mut self, size: u32) -> Self {
        self.code_size = size;
        self
    }

    pub fn with_frame(mut self, max_locals: u16, max_stack: u16) -> Self {
        self.max_locals = max_locals;
        self.max_stack = max_stack;
        self
    }

    pub fn with_invocation_count(mut self, count: u32) -> Self {
        self.invocation_count = count;
        self
    }

    pub fn with_vtable_index(mut self, index: u32) -> Self {
        self.vtable_index = Some(index);
        self
    }

    pub fn with_intrinsic(mut self, id: IntrinsicId) -> Self {
        self.intrinsic = Some(id);
        self
    }

    pub fn with_mh_intrinsic(mut self, mh: MhIntrinsic) -> Self {
        self.mh_intrinsic = Some(mh);
        self
    }

    #[inline]
    pub fn is_static(&self) -> bool {
        self.flags.contains(MethodFlags::STATIC)
    }

    /// Dispatch can be bound statically.
    pub fn can_be_statically_bound(&self) -> bool {
        self.flags
            .intersects(MethodFlags::STATIC | MethodFlags::FINAL | MethodFlags::PRIVATE)
    }

    pub fn is_method_handle_intrinsic(&self) -> bool {
        self.mh_intrinsic.is_some()
    }

    pub fn is_boxing_method(&self) -> bool {
        self.flags.contains(MethodFlags::BOXING)
    }

    /// Has bytecode the parser can inline.
    pub fn can_be_parsed(&self) -> bool {
        self.flags.contains(MethodFlags::PARSEABLE)
            && !self
                .flags
                .intersects(MethodFlags::ABSTRACT | MethodFlags::NATIVE)
    }

    /// Interpreter argument slots including the receiver.
    pub fn arg_size(&self) -> usize {
        self.signature.arg_size(self.is_static())
    }

    pub fn trap_count(&self, bci: u32, reason: DeoptReason) -> u32 {
        self.traps.get(&(bci, reason)).copied().unwrap_or(0)
    }

    /// Traps of `reason` anywhere in the method.
    pub fn trap_count_total(&self, reason: DeoptReason) -> u32 {
        self.traps
            .iter()
            .filter(|((_, r), _)| *r == reason)
            .map(|(_, c)| *c)
            .sum()
    }
}

/// Properties of one class.
#[derive(Debug, Clone)]
pub struct KlassInfo {
    pub id: KlassId,
    pub name: String,
    pub super_klass: Option<KlassId>,
    pub interfaces: Vec<KlassId>,
    pub is_interface: bool,
    /// No loaded subclasses.
    pub is_leaf: bool,
    /// Methods declared here, by name and signature.
    pub methods: Vec<MethodId>,
}

impl KlassInfo {
    pub fn new(name: impl Into<String>, super_klass: Option<KlassId>) -> Self {
        KlassInfo {
            id: KlassId(u32::MAX),
            name: name.into(),
            super_klass,
            interfaces: Vec::new(),
            is_interface: false,
            is_leaf: true,
            methods: Vec::new(),
        }
    }

    pub fn interface(name: impl Into<String>) -> Self {
        KlassInfo {
            is_interface: true,
            is_leaf: false,
            ..KlassInfo::new(name, None)
        }
    }
}

// =============================================================================
// Oracle Interface
// =============================================================================

/// Read-only metadata queries made by the inliner.
pub trait MethodOracle: Send + Sync {
    fn method(&self, m: MethodId) -> Option<Arc<MethodInfo>>;

    fn klass(&self, k: KlassId) -> Option<Arc<KlassInfo>>;

    /// Call site at `bci` of `caller`.
    fn call_site(&self, caller: MethodId, bci: u32) -> Option<CallSiteInfo>;

    /// Implementation of `m` selected for receivers of exact class `receiver`.
    fn resolve_invoke(&self, receiver: KlassId, m: MethodId) -> Option<MethodId>;

    /// Single implementation of `m` across all loaded subclasses of
    /// `receiver`, if there is exactly one.
    fn unique_concrete_method(&self, receiver: KlassId, m: MethodId) -> Option<MethodId>;

    /// Target method of a constant method handle.
    fn method_handle_target(&self, mh: ObjectId) -> Option<MethodId>;

    /// Target method of a constant MemberName.
    fn member_name_target(&self, member: ObjectId) -> Option<MethodId>;

    fn is_subclass_of(&self, sub: KlassId, sup: KlassId) -> bool;
}

// =============================================================================
// Tests
// =============================================================================
