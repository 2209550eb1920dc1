//! Sparse flow-sensitive points-to analysis library.
//!
//! Given a program lowered to pointer-manipulating primitive statements,
//! this crate computes, for every pointer-typed value and every relevant
//! program point, the set of abstract memory objects the pointer may refer
//! to, and answers may-alias queries over the result. The pipeline:
//!
//! 1. lower the IR into primitive constraints and an interprocedural CFG,
//! 2. merge pointer-equivalent top-level values offline,
//! 3. resolve indirect calls against a flow-insensitive auxiliary solve,
//! 4. condense the CFG with Ramalingam's sparse-evaluation transforms,
//! 5. partition address-taken objects by access equivalence and build
//!    per-partition SSA over a def-use graph,
//! 6. run a worklist fixed point with sparse-bitset points-to sets.

#![deny(missing_docs, trivial_numeric_casts, unused_extern_crates)]
#![warn(unused_import_braces)]

#[macro_use]
pub mod entity;

pub mod alias;
pub mod andersen;
pub mod bitset;
pub mod cfg;
pub mod cfg_printer;
pub mod constraint;
pub mod context;
pub mod dug;
pub mod extinfo;
pub mod hu;
pub mod ir;
pub mod objects;
pub mod partition;
pub mod ptsto;
pub mod seg;
pub mod settings;
pub mod solve;
pub mod timing;
pub mod translate;

mod result;

pub use crate::alias::{AliasResult, Analysis};
pub use crate::context::Context;
pub use crate::result::{AnalysisError, AnalysisResult};
pub use crate::settings::Flags;

/// Version number of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
