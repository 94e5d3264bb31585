//! The single vm16 target: its register bank and calling convention.

pub mod registers;

pub use registers::{Register, ALLOCATABLE, CALLEE_SAVED, CALLER_SAVED, FRAME_BASE_REGISTER, NUM_COLORS, RETURN_REGISTER};
