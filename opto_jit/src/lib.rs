//! Optimizing JIT core for a JVM-style runtime.
//!
//! The graph side of a method compiler, with:
//! - Sea-of-Nodes IR with value numbering and def-use maintenance
//! - JVM state snapshots for deoptimization
//! - Java call nodes and their projections
//! - Call generators: eager, late, virtual, predicted and intrinsic inlining
//! - Post-parse devirtualization and incremental inlining
#![deny(unsafe_op_in_unsafe_fn)]
pub mod call;
pub mod ci;
pub mod compile;
pub mod inline;
pub mod ir;
pub mod jvms;
pub mod kit;

pub use compile::{Bailout, Compile, CompileOptions, InlineConfig};
pub use inline::{BytecodeParser, CallGenerator, IntrinsicLibrary};
pub use kit::GraphKit;
