//! Type system for the sea-of-nodes IR.
//!
//! Every node carries a [`Type`] describing the values it may produce. The
//! types form a lattice used when merging paths and when narrowing a value
//! after a check:
//!
//! ```text
//!                         Top (no value / dead)
//!          /       /       |        \          \
//!   Int[lo,hi]  Long[lo,hi]  Float  Double   Ptr{nullness, klass, exact}
//!          \       \       |        /          /
//!                         Bottom (any value)
//! ```
//!
//! Control, memory, io and return-address values are distinct singleton
//! types; multi-result nodes (start, calls, ifs) produce a [`Type::Tuple`].
//!
//! Also defined here: Java basic types, ideal register classes, the fixed
//! input layout of call-shaped nodes ([`TypeFunc`]) and memory alias
//! categories ([`AdrType`], [`AliasTable`]).

use std::fmt;

use rustc_hash::FxHashMap;

use crate::ci::{KlassId, ObjectId};

// =============================================================================
// Basic Types
// =============================================================================

/// Java-level basic type of a value, field or signature slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BasicType {
    /// `boolean`.
    Boolean,
    /// `char`.
    Char,
    /// `float`.
    Float,
    /// `double` (two slots).
    Double,
    /// `byte`.
    Byte,
    /// `short`.
    Short,
    /// `int`.
    Int,
    /// `long` (two slots).
    Long,
    /// Object reference.
    Object,
    /// Array reference.
    Array,
    /// No value.
    Void,
    /// Raw machine address.
    Address,
    /// Compressed object reference.
    NarrowOop,
    /// Upper half of a two-slot value.
    Half,
}

impl BasicType {
    /// Number of interpreter slots a value of this type occupies.
    #[inline]
    pub const fn size(self) -> usize {
        match self {
            BasicType::Long | BasicType::Double => 2,
            BasicType::Void => 0,
            _ => 1,
        }
    }

    /// Long and double occupy a slot pair.
    #[inline]
    pub const fn is_wide(self) -> bool {
        matches!(self, BasicType::Long | BasicType::Double)
    }

    /// Object or array reference.
    #[inline]
    pub const fn is_reference(self) -> bool {
        matches!(self, BasicType::Object | BasicType::Array)
    }

    /// Types the interpreter widens to `int` on the stack.
    #[inline]
    pub const fn is_int_like(self) -> bool {
        matches!(
            self,
            BasicType::Boolean | BasicType::Char | BasicType::Byte | BasicType::Short | BasicType::Int
        )
    }

    /// Signature descriptor character.
    pub const fn descriptor(self) -> char {
        match self {
            BasicType::Boolean => 'Z',
            BasicType::Char => 'C',
            BasicType::Float => 'F',
            BasicType::Double => 'D',
            BasicType::Byte => 'B',
            BasicType::Short => 'S',
            BasicType::Int => 'I',
            BasicType::Long => 'J',
            BasicType::Object => 'L',
            BasicType::Array => '[',
            BasicType::Void => 'V',
            BasicType::Address => 'A',
            BasicType::NarrowOop => 'N',
            BasicType::Half => '_',
        }
    }
}

// =============================================================================
// Ideal Registers
// =============================================================================

/// Physical register class a node's result needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum IdealReg {
    /// Produces no register value (control, memory, tuples).
    None = 0,
    /// Compressed oop.
    RegN,
    /// 32-bit integer.
    RegI,
    /// Pointer.
    RegP,
    /// Single-precision float.
    RegF,
    /// Double-precision float.
    RegD,
    /// 64-bit integer.
    RegL,
    /// Condition flags.
    RegFlags,
}

impl IdealReg {
    /// Register class for a value of basic type `bt`.
    pub const fn for_basic_type(bt: BasicType) -> IdealReg {
        match bt {
            BasicType::Boolean
            | BasicType::Char
            | BasicType::Byte
            | BasicType::Short
            | BasicType::Int => IdealReg::RegI,
            BasicType::Long => IdealReg::RegL,
            BasicType::Float => IdealReg::RegF,
            BasicType::Double => IdealReg::RegD,
            BasicType::Object | BasicType::Array | BasicType::Address => IdealReg::RegP,
            BasicType::NarrowOop => IdealReg::RegN,
            BasicType::Void | BasicType::Half => IdealReg::None,
        }
    }
}

// =============================================================================
// Pointer Types
// =============================================================================

/// Whether a reference may be null.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Nullness {
    /// Always null.
    Null,
    /// Never null.
    NotNull,
    /// Unknown.
    MaybeNull,
}

impl Nullness {
    fn meet(self, other: Nullness) -> Nullness {
        if self == other {
            self
        } else {
            Nullness::MaybeNull
        }
    }
}

/// An object reference type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PtrType {
    pub nullness: Nullness,
    /// Static class bound, `None` for `java.lang.Object` or unknown.
    pub klass: Option<KlassId>,
    /// The class bound is the exact runtime class.
    pub exact: bool,
    /// A known constant heap object.
    pub constant: Option<ObjectId>,
    /// Identity of a non-escaping allocation, for alias precision.
    pub instance_id: Option<u32>,
}

impl PtrType {
    /// An unknown, possibly null reference of class `klass`.
    pub const fn of(klass: Option<KlassId>) -> Self {
        PtrType {
            nullness: Nullness::MaybeNull,
            klass,
            exact: false,
            constant: None,
            instance_id: None,
        }
    }

    /// The null constant.
    pub const NULL: PtrType = PtrType {
        nullness: Nullness::Null,
        klass: None,
        exact: false,
        constant: None,
        instance_id: None,
    };

    fn meet(&self, other: &PtrType) -> PtrType {
        if self.nullness == Nullness::Null {
            return PtrType {
                nullness: other.nullness.meet(Nullness::Null),
                constant: None,
                ..*other
            };
        }
        if other.nullness == Nullness::Null {
            return other.meet(self);
        }
        let same_klass = self.klass == other.klass;
        PtrType {
            nullness: self.nullness.meet(other.nullness),
            klass: if same_klass { self.klass } else { None },
            exact: same_klass && self.exact && other.exact,
            constant: if self.constant == other.constant {
                self.constant
            } else {
                None
            },
            instance_id: if self.instance_id == other.instance_id {
                self.instance_id
            } else {
                None
            },
        }
    }
}

// =============================================================================
// Type Lattice
// =============================================================================

/// The type of values produced by a node.
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum Type {
    /// No value: dead code or an unused slot.
    Top,
    /// Any value.
    Bottom,
    /// Control token.
    Control,
    /// Memory state.
    Memory,
    /// I/O state.
    Abio,
    /// Return address of the current frame.
    ReturnAddress,
    /// Upper half of a long or double.
    Half,
    /// 32-bit integer range.
    Int { lo: i32, hi: i32 },
    /// 64-bit integer range.
    Long { lo: i64, hi: i64 },
    /// Float, with constant bits if known.
    Float(Option<u32>),
    /// Double, with constant bits if known.
    Double(Option<u64>),
    /// Object reference.
    Ptr(PtrType),
    /// Raw machine pointer.
    RawPtr,
    /// Class metadata pointer.
    KlassPtr(Option<KlassId>),
    /// Compressed reference.
    NarrowOop(PtrType),
    /// Result of a multi-output node.
    Tuple(Box<[Type]>),
}

impl Type {
    /// Full `int` range.
    pub const INT: Type = Type::Int {
        lo: i32::MIN,
        hi: i32::MAX,
    };

    /// Full `long` range.
    pub const LONG: Type = Type::Long {
        lo: i64::MIN,
        hi: i64::MAX,
    };

    /// `int` constant.
    pub const fn int_con(v: i32) -> Type {
        Type::Int { lo: v, hi: v }
    }

    /// `long` constant.
    pub const fn long_con(v: i64) -> Type {
        Type::Long { lo: v, hi: v }
    }

    /// Any reference of class `klass`.
    pub const fn oop(klass: Option<KlassId>) -> Type {
        Type::Ptr(PtrType::of(klass))
    }

    /// The null reference.
    pub const fn null() -> Type {
        Type::Ptr(PtrType::NULL)
    }

    /// A non-null constant object of class `klass`.
    pub const fn oop_con(obj: ObjectId, klass: Option<KlassId>) -> Type {
        Type::Ptr(PtrType {
            nullness: Nullness::NotNull,
            klass,
            exact: true,
            constant: Some(obj),
            instance_id: None,
        })
    }

    /// Type for a signature slot of basic type `bt`.
    pub fn for_basic_type(bt: BasicType) -> Type {
        match bt {
            BasicType::Boolean => Type::Int { lo: 0, hi: 1 },
            BasicType::Char => Type::Int { lo: 0, hi: 0xFFFF },
            BasicType::Byte => Type::Int {
                lo: i8::MIN as i32,
                hi: i8::MAX as i32,
            },
            BasicType::Short => Type::Int {
                lo: i16::MIN as i32,
                hi: i16::MAX as i32,
            },
            BasicType::Int => Type::INT,
            BasicType::Long => Type::LONG,
            BasicType::Float => Type::Float(None),
            BasicType::Double => Type::Double(None),
            BasicType::Object | BasicType::Array => Type::oop(None),
            BasicType::Address => Type::RawPtr,
            BasicType::NarrowOop => Type::NarrowOop(PtrType::of(None)),
            BasicType::Void => Type::Top,
            BasicType::Half => Type::Half,
        }
    }

    #[inline]
    pub fn is_top(&self) -> bool {
        matches!(self, Type::Top)
    }

    /// The type denotes exactly one value.
    pub fn is_con(&self) -> bool {
        match self {
            Type::Int { lo, hi } => lo == hi,
            Type::Long { lo, hi } => lo == hi,
            Type::Float(c) => c.is_some(),
            Type::Double(c) => c.is_some(),
            Type::Ptr(p) => p.nullness == Nullness::Null || p.constant.is_some(),
            Type::KlassPtr(k) => k.is_some(),
            _ => false,
        }
    }

    /// Constant value of an `int` type.
    pub fn get_int_con(&self) -> Option<i32> {
        match *self {
            Type::Int { lo, hi } if lo == hi => Some(lo),
            _ => None,
        }
    }

    /// The pointer part of a reference type.
    pub fn ptr(&self) -> Option<&PtrType> {
        match self {
            Type::Ptr(p) | Type::NarrowOop(p) => Some(p),
            _ => None,
        }
    }

    /// Reference that could be null.
    pub fn maybe_null(&self) -> bool {
        self.ptr().is_some_and(|p| p.nullness != Nullness::NotNull)
    }

    /// The null reference.
    pub fn is_null(&self) -> bool {
        self.ptr().is_some_and(|p| p.nullness == Nullness::Null)
    }

    /// The same reference type with null excluded.
    pub fn cast_to_not_null(&self) -> Type {
        match self {
            Type::Ptr(p) => Type::Ptr(PtrType {
                nullness: Nullness::NotNull,
                ..*p
            }),
            other => other.clone(),
        }
    }

    /// The same reference type narrowed to exactly `klass`.
    pub fn cast_to_exact(&self, klass: KlassId) -> Type {
        match self {
            Type::Ptr(p) => Type::Ptr(PtrType {
                nullness: Nullness::NotNull,
                klass: Some(klass),
                exact: true,
                ..*p
            }),
            other => other.clone(),
        }
    }

    /// Field of a tuple type.
    pub fn field(&self, i: usize) -> Option<&Type> {
        match self {
            Type::Tuple(fields) => fields.get(i),
            _ => None,
        }
    }

    /// Lattice meet: the most precise type covering both.
    pub fn meet(&self, other: &Type) -> Type {
        match (self, other) {
            (Type::Top, t) | (t, Type::Top) => t.clone(),
            (a, b) if a == b => a.clone(),
            (Type::Int { lo: l1, hi: h1 }, Type::Int { lo: l2, hi: h2 }) => Type::Int {
                lo: *l1.min(l2),
                hi: *h1.max(h2),
            },
            (Type::Long { lo: l1, hi: h1 }, Type::Long { lo: l2, hi: h2 }) => Type::Long {
                lo: *l1.min(l2),
                hi: *h1.max(h2),
            },
            (Type::Float(_), Type::Float(_)) => Type::Float(None),
            (Type::Double(_), Type::Double(_)) => Type::Double(None),
            (Type::Ptr(a), Type::Ptr(b)) => Type::Ptr(a.meet(b)),
            (Type::NarrowOop(a), Type::NarrowOop(b)) => Type::NarrowOop(a.meet(b)),
            (Type::KlassPtr(_), Type::KlassPtr(_)) => Type::KlassPtr(None),
            (Type::Tuple(a), Type::Tuple(b)) if a.len() == b.len() => {
                Type::Tuple(a.iter().zip(b.iter()).map(|(x, y)| x.meet(y)).collect())
            }
            _ => Type::Bottom,
        }
    }

    /// Register class needed to hold a value of this type.
    pub fn ideal_reg(&self) -> IdealReg {
        match self {
            Type::Int { .. } => IdealReg::RegI,
            Type::Long { .. } => IdealReg::RegL,
            Type::Float(_) => IdealReg::RegF,
            Type::Double(_) => IdealReg::RegD,
            Type::Ptr(_) | Type::RawPtr | Type::KlassPtr(_) | Type::ReturnAddress => IdealReg::RegP,
            Type::NarrowOop(_) => IdealReg::RegN,
            _ => IdealReg::None,
        }
    }
}

impl Default for Type {
    fn default() -> Self {
        Type::Bottom
    }
}

impl fmt::Debug for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Top => write!(f, "top"),
            Type::Bottom => write!(f, "bottom"),
            Type::Control => write!(f, "control"),
            Type::Memory => write!(f, "memory"),
            Type::Abio => write!(f, "abio"),
            Type::ReturnAddress => write!(f, "return_address"),
            Type::Half => write!(f, "half"),
            Type::Int { lo, hi } if lo == hi => write!(f, "int:{}", lo),
            Type::Int { lo, hi } => write!(f, "int:{}..{}", lo, hi),
            Type::Long { lo, hi } if lo == hi => write!(f, "long:{}", lo),
            Type::Long { lo, hi } => write!(f, "long:{}..{}", lo, hi),
            Type::Float(_) => write!(f, "float"),
            Type::Double(_) => write!(f, "double"),
            Type::Ptr(p) | Type::NarrowOop(p) => {
                let null = match p.nullness {
                    Nullness::Null => return write!(f, "null"),
                    Nullness::NotNull => ":NotNull",
                    Nullness::MaybeNull => "",
                };
                match p.klass {
                    Some(k) => write!(f, "{}{}{}", k, if p.exact { ":exact" } else { "" }, null),
                    None => write!(f, "oop{}", null),
                }
            }
            Type::RawPtr => write!(f, "rawptr"),
            Type::KlassPtr(_) => write!(f, "klass"),
            Type::Tuple(fields) => f.debug_list().entries(fields.iter()).finish(),
        }
    }
}

// =============================================================================
// Call Signatures
// =============================================================================

/// Signature of a call-shaped node and its fixed input layout.
///
/// Every call and safepoint starts with the same five inputs; the callee's
/// parameters follow from [`TypeFunc::PARMS`]. Two-slot parameters are
/// followed by a [`Type::Half`] entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeFunc {
    /// Parameter types, receiver first for instance methods.
    pub domain: Vec<Type>,
    /// Result type, `None` for void.
    pub range: Option<Type>,
}

impl TypeFunc {
    pub const CONTROL: usize = 0;
    pub const I_O: usize = 1;
    pub const MEMORY: usize = 2;
    pub const FRAME_PTR: usize = 3;
    pub const RETURN_ADR: usize = 4;
    pub const PARMS: usize = 5;

    /// Build a signature from parameter basic types.
    pub fn new(params: &[BasicType], ret: BasicType) -> Self {
        let mut domain = Vec::with_capacity(params.len());
        for &bt in params {
            domain.push(Type::for_basic_type(bt));
            if bt.is_wide() {
                domain.push(Type::Half);
            }
        }
        let range = (ret != BasicType::Void).then(|| Type::for_basic_type(ret));
        TypeFunc { domain, range }
    }

    /// Total input count of a node with this signature.
    #[inline]
    pub fn domain_cnt(&self) -> usize {
        Self::PARMS + self.domain.len()
    }

    /// Number of parameter slots.
    #[inline]
    pub fn arg_slots(&self) -> usize {
        self.domain.len()
    }

    /// Whether the call produces a value.
    #[inline]
    pub fn returns_value(&self) -> bool {
        self.range.is_some()
    }

    /// Slot count of the returned value.
    pub fn return_slots(&self) -> usize {
        match &self.range {
            Some(Type::Long { .. }) | Some(Type::Double(_)) => 2,
            Some(_) => 1,
            None => 0,
        }
    }

    /// Tuple type of the call's projections.
    pub fn range_tuple(&self) -> Type {
        let mut fields = vec![
            Type::Control,
            Type::Abio,
            Type::Memory,
            Type::RawPtr,
            Type::ReturnAddress,
        ];
        if let Some(r) = &self.range {
            fields.push(r.clone());
        }
        Type::Tuple(fields.into_boxed_slice())
    }
}

// =============================================================================
// Memory Aliasing
// =============================================================================

/// Memory alias category of an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdrType {
    /// All of memory.
    Bottom,
    /// Raw (non-heap-object) memory.
    Raw,
    /// Class metadata.
    Klass,
    /// An instance field.
    Field {
        holder: KlassId,
        offset: i32,
        instance_id: Option<u32>,
    },
    /// Array elements.
    Array {
        elem: BasicType,
        instance_id: Option<u32>,
    },
}

impl AdrType {
    /// Identity of the allocation this address is known to point into.
    pub fn instance_id(&self) -> Option<u32> {
        match self {
            AdrType::Field { instance_id, .. } | AdrType::Array { instance_id, .. } => *instance_id,
            _ => None,
        }
    }

    /// A field of a known non-escaping instance.
    pub fn is_known_instance_field(&self) -> bool {
        matches!(
            self,
            AdrType::Field {
                instance_id: Some(_),
                ..
            }
        )
    }
}

/// Alias index of the pseudo-slice no memory belongs to.
pub const ALIAS_IDX_TOP: usize = 1;
/// Alias index of all of memory.
pub const ALIAS_IDX_BOT: usize = 2;
/// Alias index of raw memory.
pub const ALIAS_IDX_RAW: usize = 3;

/// Assigns dense alias indices to address categories.
#[derive(Debug, Clone)]
pub struct AliasTable {
    index: FxHashMap<AdrType, usize>,
    types: Vec<Option<AdrType>>,
}

impl AliasTable {
    pub fn new() -> Self {
        let mut table = AliasTable {
            index: FxHashMap::default(),
            types: vec![None, None],
        };
        table.index_of(&AdrType::Bottom);
        table.index_of(&AdrType::Raw);
        table
    }

    /// Alias index of `adr`, allocating a fresh one on first sight.
    pub fn index_of(&mut self, adr: &AdrType) -> usize {
        if let Some(&idx) = self.index.get(adr) {
            return idx;
        }
        let idx = self.types.len();
        self.types.push(Some(*adr));
        self.index.insert(*adr, idx);
        idx
    }

    /// Alias index of `adr` if it was seen before.
    pub fn find(&self, adr: &AdrType) -> Option<usize> {
        self.index.get(adr).copied()
    }

    /// Address type of a slice.
    pub fn adr_type(&self, idx: usize) -> Option<&AdrType> {
        self.types.get(idx).and_then(Option::as_ref)
    }

    /// One past the largest alias index.
    pub fn num_alias_types(&self) -> usize {
        self.types.len()
    }
}

impl Default for AliasTable {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
