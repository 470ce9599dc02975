//! Sea-of-nodes intermediate representation.
//!
//! # Core Components
//!
//! - **Arena** (`arena.rs`): generation-tagged node storage
//! - **Types** (`types.rs`): value type lattice, signatures, alias categories
//! - **Operators** (`operators.rs`): node kinds and opcodes
//! - **Node** (`node.rs`): the shared node envelope
//! - **Graph** (`graph.rs`): edge mutation, death, verification
//! - **GVN** (`gvn.rs`): value numbering of pure nodes
//! - **Merge** (`merge.rs`): regions, phis, split memory
//! - **Worklist** (`worklist.rs`): ordered unique node lists

pub mod arena;
pub mod graph;
pub mod gvn;
pub mod merge;
pub mod node;
pub mod operators;
pub mod types;
pub mod worklist;

pub use arena::{Arena, BitSet, Id};
pub use graph::{Graph, VerifyError};
pub use gvn::{NodeHash, NodeKey};
pub use node::{Node, NodeFlags, NodeId};
pub use operators::{BoolTest, NodeKind, OpCategory, Opcode};
pub use types::{
    AdrType, AliasTable, BasicType, IdealReg, Nullness, PtrType, Type, TypeFunc, ALIAS_IDX_BOT,
    ALIAS_IDX_RAW, ALIAS_IDX_TOP,
};
pub use worklist::UniqueNodeList;
