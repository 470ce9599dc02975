//! Node kinds for the sea-of-nodes IR.
//!
//! Kinds are organized by category:
//! - **Sentinels**: root, start, top
//! - **Control**: regions, branches, projections, catch shapes, exits
//! - **Safepoints and calls**: nodes carrying a JVM state
//! - **Values**: constants, arithmetic, compares, casts
//! - **Memory**: loads, stores, barriers, merged memory
//!
//! [`NodeKind`] is the per-node payload. [`Opcode`] is its fieldless tag,
//! used for fast dispatch and as part of the value-numbering key.

use crate::call::CallData;
use crate::jvms::SafePointData;

use super::types::{AdrType, BasicType};

// =============================================================================
// Operator Categories
// =============================================================================

/// Coarse category for fast dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCategory {
    /// Root, start and top.
    Sentinel = 0,
    /// Control-flow nodes.
    Control = 1,
    /// Projections out of multi-output nodes.
    Projection = 2,
    /// Merges of values at regions.
    Phi = 3,
    /// Safepoints and calls.
    Call = 4,
    /// Constants.
    Constant = 5,
    /// Pure value computations.
    Value = 6,
    /// Memory operations.
    Memory = 7,
}

// =============================================================================
// Comparison Tests
// =============================================================================

/// Condition tested by a `Bool` node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BoolTest {
    /// Equal.
    Eq = 0,
    /// Not equal.
    Ne = 1,
    /// Less than.
    Lt = 2,
    /// Less or equal.
    Le = 3,
    /// Greater than.
    Gt = 4,
    /// Greater or equal.
    Ge = 5,
}

impl BoolTest {
    /// The condition that holds exactly when this one does not.
    pub const fn negate(self) -> BoolTest {
        match self {
            BoolTest::Eq => BoolTest::Ne,
            BoolTest::Ne => BoolTest::Eq,
            BoolTest::Lt => BoolTest::Ge,
            BoolTest::Le => BoolTest::Gt,
            BoolTest::Gt => BoolTest::Le,
            BoolTest::Ge => BoolTest::Lt,
        }
    }
}

// =============================================================================
// Opcodes
// =============================================================================

/// Fieldless tag of a [`NodeKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Root,
    Start,
    Top,
    Con,
    Region,
    Phi,
    Proj,
    If,
    IfTrue,
    IfFalse,
    Catch,
    CatchProj,
    CreateEx,
    MergeMem,
    Halt,
    Return,
    Rethrow,
    SafePoint,
    CallStaticJava,
    CallDynamicJava,
    CallRuntime,
    CallLeaf,
    CallLeafNoFp,
    Allocate,
    AllocateArray,
    Lock,
    Unlock,
    ScalarObject,
    AddI,
    AddL,
    SubI,
    SubL,
    ConvL2I,
    CmpI,
    CmpP,
    Bool,
    CastPP,
    CheckCastPP,
    Load,
    LoadKlass,
    Store,
    MemBarAcquire,
    DecodeN,
    Opaque,
}

// =============================================================================
// Node Kinds
// =============================================================================

/// What a node computes, with any per-kind payload.
#[derive(Debug, Clone)]
pub enum NodeKind {
    /// Graph root: inputs are the graph's exits, input 0 is itself.
    Root,
    /// Method entry, a multi-output node with one projection per parameter.
    Start,
    /// The unique "no value / unreachable" sentinel.
    Top,
    /// A constant; the value is the node's type.
    Con,
    /// Control merge.
    Region,
    /// Value merge at a region; memory phis carry their slice.
    Phi { adr: Option<AdrType> },
    /// Field `con` of a multi-output node.
    Proj { con: u32, io_use: bool },
    /// Two-way branch with taken probability and execution count.
    If { prob: f32, cnt: f32 },
    /// Taken branch of an `If`.
    IfTrue,
    /// Fall-through branch of an `If`.
    IfFalse,
    /// Exception dispatch after a call.
    Catch,
    /// Branch of a `Catch`: 0 is fall-through, 1 is catch-all.
    CatchProj { con: u32, handler_bci: i32 },
    /// Exception oop on the catch-all path.
    CreateEx,
    /// Memory state split by alias index.
    MergeMem,
    /// Control that never continues.
    Halt,
    /// Method exit.
    Return,
    /// Exceptional method exit.
    Rethrow,
    /// A polling point carrying a JVM state.
    SafePoint(Box<SafePointData>),
    /// A call site.
    Call(Box<CallData>),
    /// Description of a scalar-replaced object in a safepoint's debug info.
    ScalarObject { first_index: u32, n_fields: u32 },
    /// 32-bit add.
    AddI,
    /// 64-bit add.
    AddL,
    /// 32-bit subtract.
    SubI,
    /// 64-bit subtract.
    SubL,
    /// Long to int truncation.
    ConvL2I,
    /// 32-bit compare.
    CmpI,
    /// Pointer compare.
    CmpP,
    /// Condition test of a compare.
    Bool(BoolTest),
    /// Pointer narrowed by a dominating check (e.g. not-null).
    CastPP,
    /// Pointer narrowed by a type check.
    CheckCastPP,
    /// Memory load.
    Load { bt: BasicType, adr: AdrType },
    /// Load of an object's class pointer.
    LoadKlass,
    /// Memory store.
    Store { bt: BasicType, adr: AdrType },
    /// Acquire barrier following a volatile load.
    MemBarAcquire,
    /// Compressed-oop decode.
    DecodeN,
    /// Opaque wrapper hiding a value from folding.
    Opaque,
}

impl NodeKind {
    /// Fieldless tag for this kind.
    pub fn opcode(&self) -> Opcode {
        match self {
            NodeKind::Root => Opcode::Root,
            NodeKind::Start => Opcode::Start,
            NodeKind::Top => Opcode::Top,
            NodeKind::Con => Opcode::Con,
            NodeKind::Region => Opcode::Region,
            NodeKind::Phi { .. } => Opcode::Phi,
            NodeKind::Proj { .. } => Opcode::Proj,
            NodeKind::If { .. } => Opcode::If,
            NodeKind::IfTrue => Opcode::IfTrue,
            NodeKind::IfFalse => Opcode::IfFalse,
            NodeKind::Catch => Opcode::Catch,
            NodeKind::CatchProj { .. } => Opcode::CatchProj,
            NodeKind::CreateEx => Opcode::CreateEx,
            NodeKind::MergeMem => Opcode::MergeMem,
            NodeKind::Halt => Opcode::Halt,
            NodeKind::Return => Opcode::Return,
            NodeKind::Rethrow => Opcode::Rethrow,
            NodeKind::SafePoint(_) => Opcode::SafePoint,
            NodeKind::Call(call) => call.kind.opcode(),
            NodeKind::ScalarObject { .. } => Opcode::ScalarObject,
            NodeKind::AddI => Opcode::AddI,
            NodeKind::AddL => Opcode::AddL,
            NodeKind::SubI => Opcode::SubI,
            NodeKind::SubL => Opcode::SubL,
            NodeKind::ConvL2I => Opcode::ConvL2I,
            NodeKind::CmpI => Opcode::CmpI,
            NodeKind::CmpP => Opcode::CmpP,
            NodeKind::Bool(_) => Opcode::Bool,
            NodeKind::CastPP => Opcode::CastPP,
            NodeKind::CheckCastPP => Opcode::CheckCastPP,
            NodeKind::Load { .. } => Opcode::Load,
            NodeKind::LoadKlass => Opcode::LoadKlass,
            NodeKind::Store { .. } => Opcode::Store,
            NodeKind::MemBarAcquire => Opcode::MemBarAcquire,
            NodeKind::DecodeN => Opcode::DecodeN,
            NodeKind::Opaque => Opcode::Opaque,
        }
    }

    /// Dispatch category.
    pub fn category(&self) -> OpCategory {
        match self {
            NodeKind::Root | NodeKind::Start | NodeKind::Top => OpCategory::Sentinel,
            NodeKind::Region
            | NodeKind::If { .. }
            | NodeKind::IfTrue
            | NodeKind::IfFalse
            | NodeKind::Catch
            | NodeKind::CatchProj { .. }
            | NodeKind::Halt
            | NodeKind::Return
            | NodeKind::Rethrow => OpCategory::Control,
            NodeKind::Proj { .. } => OpCategory::Projection,
            NodeKind::Phi { .. } => OpCategory::Phi,
            NodeKind::SafePoint(_) | NodeKind::Call(_) => OpCategory::Call,
            NodeKind::Con => OpCategory::Constant,
            NodeKind::Load { .. }
            | NodeKind::LoadKlass
            | NodeKind::Store { .. }
            | NodeKind::MemBarAcquire
            | NodeKind::MergeMem => OpCategory::Memory,
            _ => OpCategory::Value,
        }
    }

    /// Node produces a tuple consumed through projections.
    pub fn is_multi(&self) -> bool {
        matches!(
            self,
            NodeKind::Start
                | NodeKind::If { .. }
                | NodeKind::Catch
                | NodeKind::Call(_)
                | NodeKind::MemBarAcquire
        )
    }

    /// Node takes part in control flow.
    pub fn is_cfg(&self) -> bool {
        matches!(
            self.category(),
            OpCategory::Control | OpCategory::Call
        ) || matches!(self, NodeKind::Root | NodeKind::Start)
    }

    /// Node can be value-numbered: its identity is fully determined by its
    /// kind, type and inputs.
    pub fn is_pure(&self) -> bool {
        matches!(
            self,
            NodeKind::Con
                | NodeKind::AddI
                | NodeKind::AddL
                | NodeKind::SubI
                | NodeKind::SubL
                | NodeKind::ConvL2I
                | NodeKind::CmpI
                | NodeKind::CmpP
                | NodeKind::Bool(_)
                | NodeKind::CastPP
                | NodeKind::CheckCastPP
                | NodeKind::LoadKlass
                | NodeKind::DecodeN
                | NodeKind::Proj { .. }
                | NodeKind::IfTrue
                | NodeKind::IfFalse
                | NodeKind::CatchProj { .. }
        )
    }

    /// Extra payload that distinguishes otherwise equal pure nodes.
    pub fn hash_aux(&self) -> u32 {
        match *self {
            NodeKind::Proj { con, io_use } => (con << 1) | io_use as u32,
            NodeKind::CatchProj { con, handler_bci } => (con << 16) ^ handler_bci as u32,
            NodeKind::Bool(test) => test as u32,
            _ => 0,
        }
    }

    /// Short display name.
    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::Call(call) => call.kind.name(),
            _ => match self.opcode() {
                Opcode::Root => "Root",
                Opcode::Start => "Start",
                Opcode::Top => "Top",
                Opcode::Con => "Con",
                Opcode::Region => "Region",
                Opcode::Phi => "Phi",
                Opcode::Proj => "Proj",
                Opcode::If => "If",
                Opcode::IfTrue => "IfTrue",
                Opcode::IfFalse => "IfFalse",
                Opcode::Catch => "Catch",
                Opcode::CatchProj => "CatchProj",
                Opcode::CreateEx => "CreateEx",
                Opcode::MergeMem => "MergeMem",
                Opcode::Halt => "Halt",
                Opcode::Return => "Return",
                Opcode::Rethrow => "Rethrow",
                Opcode::SafePoint => "SafePoint",
                Opcode::ScalarObject => "SafePointScalarObject",
                Opcode::AddI => "AddI",
                Opcode::AddL => "AddL",
                Opcode::SubI => "SubI",
                Opcode::SubL => "SubL",
                Opcode::ConvL2I => "ConvL2I",
                Opcode::CmpI => "CmpI",
                Opcode::CmpP => "CmpP",
                Opcode::Bool => "Bool",
                Opcode::CastPP => "CastPP",
                Opcode::CheckCastPP => "CheckCastPP",
                Opcode::Load => "Load",
                Opcode::LoadKlass => "LoadKlass",
                Opcode::Store => "Store",
                Opcode::MemBarAcquire => "MemBarAcquire",
                Opcode::DecodeN => "DecodeN",
                Opcode::Opaque => "Opaque",
                _ => "Call",
            },
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bool_test_negate_is_involution() {
        for t in [
            BoolTest::Eq,
            BoolTest::Ne,
            BoolTest::Lt,
            BoolTest::Le,
            BoolTest::Gt,
            BoolTest::Ge,
        ] {
            assert_eq!(t.negate().negate(), t);
            assert_ne!(t.negate(), t);
        }
    }

    #[test]
    fn test_categories() {
        assert_eq!(NodeKind::Region.category(), OpCategory::Control);
        assert_eq!(NodeKind::Con.category(), OpCategory::Constant);
        assert!(NodeKind::If { prob: 0.5, cnt: 1.0 }.is_multi());
        assert!(NodeKind::Start.is_cfg());
        assert!(!NodeKind::AddI.is_cfg());
    }

    #[test]
    fn test_hash_aux_separates_projections() {
        let a = NodeKind::Proj {
            con: 0,
            io_use: false,
        };
        let b = NodeKind::Proj {
            con: 0,
            io_use: true,
        };
        assert_ne!(a.hash_aux(), b.hash_aux());
        assert!(a.is_pure());
        assert!(!NodeKind::Store {
            bt: BasicType::Int,
            adr: AdrType::Raw
        }
        .is_pure());
    }
}
