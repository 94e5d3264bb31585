//! vm16 code generation library.
//!
//! This crate owns everything between a front-end-supplied [`ir::Procedure`]
//! and a string of target assembly text: control-flow graph construction,
//! iterative data-flow analyses, SSA construction, graph-coloring register
//! allocation, target lowering and peephole optimization. The lexer,
//! parser, assembler and linker are collaborators that live outside this
//! crate (the linker lives in `vm16-asm`).

#![deny(missing_docs, trivial_numeric_casts, unused_extern_crates)]
#![warn(unused_import_braces)]

pub use cranelift_bforest as bforest;
pub use cranelift_entity as entity;

pub mod dataflow;
pub mod dominator_tree;
pub mod flowgraph;
pub mod ir;
pub mod isa;
pub mod liveness;
pub mod lower;
pub mod peephole;
pub mod regalloc;
pub mod result;
pub mod ssa;

pub use crate::result::{CodegenError, CodegenResult};

/// Version number of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
