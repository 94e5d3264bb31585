//! Opcode taxonomy.
//!
//! Opcodes are grouped into *classes* that describe their operand shape.
//! `operand_count`, `is_assign` and `has_extras` are total functions over
//! every variant, including the three pseudo-opcodes (`Load`, `Store`,
//! `Unload`) that escape the class machinery because their "live range"
//! payload travels in the extras list rather than in a fixed operand slot.

use core::fmt;

/// The shape of an opcode's fixed operand slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpcodeClass {
    /// No operands (`RETN`).
    None,
    /// `r = op? a` — one write, one read.
    Assign2,
    /// `r = a op b` — one write, two reads.
    Assign3,
    /// One read-only operand (jumps, `RET`, `UNLOAD`).
    Use1,
    /// Two read-only operands (`CMP`, `WRITE`).
    Use2,
    /// `r = call target (args...)`.
    AssignCall,
    /// `r = phi(args...)` — a fixed-arity assign whose extras list carries
    /// one operand per predecessor rather than call arguments.
    AssignFixedCall,
    /// `call target (args...)`, no destination.
    Call,
}

/// A vm16 IR opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum Opcode {
    // Arithmetic, three-operand, signed and unsigned.
    AssignAdd,
    AssignSub,
    AssignMul,
    AssignDiv,
    AssignMod,
    AssignAddU,
    AssignSubU,
    AssignMulU,
    AssignDivU,
    AssignModU,
    AssignOr,
    AssignAnd,
    AssignXor,

    // Memory / copy, two-operand.
    Assign,
    AssignRead,
    AssignAddrOf,
    Write,
    Cmp,

    // Control flow, one-operand.
    Jmp,
    Je,
    Jne,
    Jl,
    Jle,
    Jg,
    Jge,
    Ret,

    // Control flow, zero-operand.
    Retn,

    // Calls.
    Call,
    AssignCall,

    // Phi.
    AssignPhi,

    // Pseudo-opcodes: spill management. Not part of the class system below
    // — their payload (the spilled live range's member list) rides in
    // `extras`, not in a numbered operand slot.
    Load,
    Store,
    Unload,
}

impl Opcode {
    /// The opcode's class, or `None` for the three pseudo-opcodes that live
    /// outside the class system.
    pub fn class(self) -> Option<OpcodeClass> {
        use Opcode::*;
        Some(match self {
            AssignAdd | AssignSub | AssignMul | AssignDiv | AssignMod | AssignAddU
            | AssignSubU | AssignMulU | AssignDivU | AssignModU | AssignOr | AssignAnd
            | AssignXor => OpcodeClass::Assign3,
            Assign | AssignRead | AssignAddrOf => OpcodeClass::Assign2,
            Write | Cmp => OpcodeClass::Use2,
            Jmp | Je | Jne | Jl | Jle | Jg | Jge | Ret => OpcodeClass::Use1,
            Retn => OpcodeClass::None,
            Call => OpcodeClass::Call,
            AssignCall => OpcodeClass::AssignCall,
            AssignPhi => OpcodeClass::AssignFixedCall,
            Load | Store | Unload => return None,
        })
    }

    /// Whether the first operand slot is a write (destination) rather than
    /// a read.
    pub fn is_assign(self) -> bool {
        matches!(
            self,
            Opcode::AssignAdd
                | Opcode::AssignSub
                | Opcode::AssignMul
                | Opcode::AssignDiv
                | Opcode::AssignMod
                | Opcode::AssignAddU
                | Opcode::AssignSubU
                | Opcode::AssignMulU
                | Opcode::AssignDivU
                | Opcode::AssignModU
                | Opcode::AssignOr
                | Opcode::AssignAnd
                | Opcode::AssignXor
                | Opcode::Assign
                | Opcode::AssignRead
                | Opcode::AssignAddrOf
                | Opcode::AssignCall
                | Opcode::AssignPhi
                | Opcode::Load
        )
    }

    /// How many of the three fixed operand slots this opcode uses.
    pub fn operand_count(self) -> usize {
        match self {
            Opcode::Retn => 0,
            Opcode::Write
            | Opcode::Cmp
            | Opcode::Assign
            | Opcode::AssignRead
            | Opcode::AssignAddrOf
            | Opcode::AssignCall => 2,
            Opcode::AssignAdd
            | Opcode::AssignSub
            | Opcode::AssignMul
            | Opcode::AssignDiv
            | Opcode::AssignMod
            | Opcode::AssignAddU
            | Opcode::AssignSubU
            | Opcode::AssignMulU
            | Opcode::AssignDivU
            | Opcode::AssignModU
            | Opcode::AssignOr
            | Opcode::AssignAnd
            | Opcode::AssignXor => 3,
            Opcode::Jmp
            | Opcode::Je
            | Opcode::Jne
            | Opcode::Jl
            | Opcode::Jle
            | Opcode::Jg
            | Opcode::Jge
            | Opcode::Ret
            | Opcode::Call
            | Opcode::Load
            | Opcode::Store
            | Opcode::Unload => 1,
            Opcode::AssignPhi => 1,
        }
    }

    /// Whether this opcode also carries a variable-length extras list
    /// (call arguments, phi inputs, or a spilled live range's members).
    pub fn has_extras(self) -> bool {
        matches!(
            self,
            Opcode::Call
                | Opcode::AssignCall
                | Opcode::AssignPhi
                | Opcode::Load
                | Opcode::Store
                | Opcode::Unload
        )
    }

    /// Whether this is one of the conditional/unconditional branch
    /// opcodes that, in CFG form, carry a `BlockRef` in operand 0.
    pub fn is_branch(self) -> bool {
        matches!(
            self,
            Opcode::Jmp
                | Opcode::Je
                | Opcode::Jne
                | Opcode::Jl
                | Opcode::Jle
                | Opcode::Jg
                | Opcode::Jge
        )
    }

    /// Whether this opcode ends a basic block without falling through
    /// (unconditional jump or either return form).
    pub fn is_terminator(self) -> bool {
        matches!(self, Opcode::Jmp | Opcode::Ret | Opcode::Retn)
    }

    /// Whether control can fall through to the next instruction (true for
    /// every opcode except the unconditional terminators).
    pub fn falls_through(self) -> bool {
        !self.is_terminator()
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Opcode::AssignAdd => "ASSIGN_ADD",
            Opcode::AssignSub => "ASSIGN_SUB",
            Opcode::AssignMul => "ASSIGN_MUL",
            Opcode::AssignDiv => "ASSIGN_DIV",
            Opcode::AssignMod => "ASSIGN_MOD",
            Opcode::AssignAddU => "ASSIGN_ADD_U",
            Opcode::AssignSubU => "ASSIGN_SUB_U",
            Opcode::AssignMulU => "ASSIGN_MUL_U",
            Opcode::AssignDivU => "ASSIGN_DIV_U",
            Opcode::AssignModU => "ASSIGN_MOD_U",
            Opcode::AssignOr => "ASSIGN_OR",
            Opcode::AssignAnd => "ASSIGN_AND",
            Opcode::AssignXor => "ASSIGN_XOR",
            Opcode::Assign => "ASSIGN",
            Opcode::AssignRead => "ASSIGN_READ",
            Opcode::AssignAddrOf => "ASSIGN_ADDROF",
            Opcode::Write => "WRITE",
            Opcode::Cmp => "CMP",
            Opcode::Jmp => "JMP",
            Opcode::Je => "JE",
            Opcode::Jne => "JNE",
            Opcode::Jl => "JL",
            Opcode::Jle => "JLE",
            Opcode::Jg => "JG",
            Opcode::Jge => "JGE",
            Opcode::Ret => "RET",
            Opcode::Retn => "RETN",
            Opcode::Call => "CALL",
            Opcode::AssignCall => "ASSIGN_CALL",
            Opcode::AssignPhi => "ASSIGN_PHI",
            Opcode::Load => "LOAD",
            Opcode::Store => "STORE",
            Opcode::Unload => "UNLOAD",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operand_count_matches_class() {
        assert_eq!(Opcode::AssignAdd.operand_count(), 3);
        assert_eq!(Opcode::Assign.operand_count(), 2);
        assert_eq!(Opcode::Jmp.operand_count(), 1);
        assert_eq!(Opcode::Retn.operand_count(), 0);
    }

    #[test]
    fn is_assign_excludes_pure_uses() {
        assert!(Opcode::AssignAdd.is_assign());
        assert!(Opcode::Load.is_assign());
        assert!(!Opcode::Write.is_assign());
        assert!(!Opcode::Store.is_assign());
        assert!(!Opcode::Jmp.is_assign());
    }

    #[test]
    fn extras_are_limited_to_variadic_opcodes() {
        assert!(Opcode::Call.has_extras());
        assert!(Opcode::AssignPhi.has_extras());
        assert!(Opcode::Store.has_extras());
        assert!(!Opcode::AssignAdd.has_extras());
    }

    #[test]
    fn branch_and_terminator_disjoint_from_fallthrough() {
        assert!(Opcode::Je.is_branch());
        assert!(!Opcode::Je.is_terminator());
        assert!(Opcode::Jmp.is_terminator());
        assert!(!Opcode::Jmp.falls_through());
        assert!(Opcode::AssignAdd.falls_through());
    }
}
