//! The fixed vm16 register bank and calling convention (spec glossary
//! "stackcall"; spec §4.8).
//!
//! Unlike a retargetable backend's `isa::registers` (which enumerates
//! register *classes* parameterized over several targets), this backend has
//! exactly one target, so the bank is a closed, fully-named enum rather
//! than an index into a target-specific table.

use core::fmt;

/// One of the seven general-purpose registers, or the base pointer `J`.
/// Only the seven GPRs are ever handed out as a color; `J` exists in this
/// enum so callers can talk about the frame base uniformly with the rest
/// of the bank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum Register {
    A,
    B,
    C,
    X,
    Y,
    Z,
    I,
    J,
}

/// Every colorable register, in the fixed order the allocator assigns
/// colors `0..ALLOCATABLE.len()` to. `J` is deliberately excluded: it is
/// reserved as the frame base pointer and is never handed out as a color,
/// which is why the processor's eight registers give a color budget of
/// only seven (spec glossary "K").
pub const ALLOCATABLE: [Register; 7] = [
    Register::A,
    Register::B,
    Register::C,
    Register::X,
    Register::Y,
    Register::Z,
    Register::I,
];

/// The number of colors the allocator may use (spec's `K`).
pub const NUM_COLORS: u32 = ALLOCATABLE.len() as u32;

/// Registers the stackcall convention treats as caller-saved: a callee may
/// clobber them freely, so a caller that needs their value live across a
/// `CALL`/`ASSIGN_CALL` must save it itself.
pub const CALLER_SAVED: [Register; 3] = [Register::A, Register::B, Register::C];

/// Registers the stackcall convention treats as callee-saved: a callee that
/// writes one of these must restore it before returning. `J` is callee-saved
/// too, but it is never colored (see [`ALLOCATABLE`]) and is instead saved
/// unconditionally by the prologue/epilogue, so it is omitted here.
pub const CALLEE_SAVED: [Register; 4] = [Register::X, Register::Y, Register::Z, Register::I];

/// The register a `RET`/`ASSIGN_CALL` result is returned in.
pub const RETURN_REGISTER: Register = Register::A;

/// The base pointer used to address parameters and spill slots relative to
/// the current call frame.
pub const FRAME_BASE_REGISTER: Register = Register::J;

impl Register {
    /// Looks up the color this register was assigned, if it appears in
    /// [`ALLOCATABLE`] (it always does; this is a convenience inverse of
    /// indexing `ALLOCATABLE` by color).
    pub fn color(self) -> u32 {
        ALLOCATABLE
            .iter()
            .position(|&r| r == self)
            .expect("every Register variant appears in ALLOCATABLE") as u32
    }

    /// The register assigned color `c` by the allocator. Panics if
    /// `c >= NUM_COLORS`.
    pub fn from_color(c: u32) -> Register {
        ALLOCATABLE[c as usize]
    }

    /// Whether the stackcall convention treats this register as
    /// caller-saved.
    pub fn is_caller_saved(self) -> bool {
        CALLER_SAVED.contains(&self)
    }

    /// Whether the stackcall convention treats this register as
    /// callee-saved.
    pub fn is_callee_saved(self) -> bool {
        CALLEE_SAVED.contains(&self)
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Register::A => "A",
            Register::B => "B",
            Register::C => "C",
            Register::X => "X",
            Register::Y => "Y",
            Register::Z => "Z",
            Register::I => "I",
            Register::J => "J",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn color_and_from_color_are_inverses() {
        for c in 0..NUM_COLORS {
            assert_eq!(Register::from_color(c).color(), c);
        }
    }

    #[test]
    fn caller_and_callee_saved_partition_every_allocatable_register() {
        for r in ALLOCATABLE {
            assert_ne!(r.is_caller_saved(), r.is_callee_saved());
        }
        assert_eq!(CALLER_SAVED.len() + CALLEE_SAVED.len(), ALLOCATABLE.len());
    }
}
