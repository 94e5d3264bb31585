//! Graph-coloring register allocation (spec §4.7): live-range discovery,
//! interference graph construction, and simplify/select with spill.

pub mod allocator;
pub mod interference;

pub use allocator::{allocate, Color, RegisterAllocation};
