//! Instruction shape: a fixed 3-slot operand array plus an optional
//! variable-length extras list.

use crate::ir::{Opcode, Operand};
use smallvec::SmallVec;

/// A single IR instruction.
#[derive(Debug, Clone)]
pub struct Instruction {
    /// The opcode.
    pub op: Opcode,
    /// Up to three fixed operand slots. Unused slots (beyond
    /// `op.operand_count()`) are left as `None`.
    pub operands: [Option<Operand>; 3],
    /// Variable-length extras: call arguments, phi inputs, or (for
    /// `LOAD`/`STORE`/`UNLOAD`) the member list of the spilled live range,
    /// which serves as a stable witness of which spill slot is meant.
    pub extras: SmallVec<[Operand; 4]>,
}

impl Instruction {
    /// Builds an instruction with no operands set yet; callers fill in
    /// slots with `set_operand`.
    pub fn new(op: Opcode) -> Instruction {
        Instruction {
            op,
            operands: [None, None, None],
            extras: SmallVec::new(),
        }
    }

    /// Convenience constructor for fixed-arity opcodes.
    pub fn with_operands(op: Opcode, operands: &[Operand]) -> Instruction {
        let mut inst = Instruction::new(op);
        for (slot, value) in inst.operands.iter_mut().zip(operands.iter()) {
            *slot = Some(value.clone());
        }
        inst
    }

    /// Sets operand slot `i`.
    pub fn set_operand(&mut self, i: usize, operand: Operand) {
        self.operands[i] = Some(operand);
    }

    /// Reads operand slot `i`.
    pub fn operand(&self, i: usize) -> Option<&Operand> {
        self.operands[i].as_ref()
    }

    /// Appends a value to the extras list.
    pub fn push_extra(&mut self, operand: Operand) {
        self.extras.push(operand);
    }

    /// The instruction's write (destination), if `op.is_assign()`.
    pub fn dest(&self) -> Option<&Operand> {
        if self.op.is_assign() {
            self.operand(0)
        } else {
            None
        }
    }

    /// The operand slots that are *reads*: every fixed slot in use, minus
    /// operand 0 when `op.is_assign()` (since that slot is a write there),
    /// plus the extras list (extras are always reads — call arguments and
    /// phi inputs are never themselves destinations).
    pub fn reads(&self) -> impl Iterator<Item = &Operand> {
        let first_read_slot = if self.op.is_assign() { 1 } else { 0 };
        let count = self.op.operand_count();
        self.operands[first_read_slot..count]
            .iter()
            .filter_map(Option::as_ref)
            .chain(self.extras.iter())
    }

    /// All variable ids read by this instruction.
    pub fn read_vars(&self) -> impl Iterator<Item = crate::ir::VarId> + '_ {
        self.reads().filter_map(Operand::as_var)
    }

    /// The destination's variable id, if any.
    pub fn dest_var(&self) -> Option<crate::ir::VarId> {
        self.dest().and_then(Operand::as_var)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::VarId;

    #[test]
    fn assign3_reads_exclude_destination() {
        let r = Operand::Var(VarId::from_base(1));
        let a = Operand::Var(VarId::from_base(2));
        let b = Operand::Const(3);
        let inst = Instruction::with_operands(Opcode::AssignAdd, &[r.clone(), a.clone(), b]);
        assert_eq!(inst.dest(), Some(&r));
        let reads: Vec<_> = inst.reads().cloned().collect();
        assert_eq!(reads, vec![a, Operand::Const(3)]);
    }

    #[test]
    fn use2_has_no_destination() {
        let a = Operand::Var(VarId::from_base(1));
        let b = Operand::Var(VarId::from_base(2));
        let inst = Instruction::with_operands(Opcode::Cmp, &[a.clone(), b.clone()]);
        assert_eq!(inst.dest(), None);
        let reads: Vec<_> = inst.reads().cloned().collect();
        assert_eq!(reads, vec![a, b]);
    }

    #[test]
    fn extras_are_always_reads() {
        let mut inst = Instruction::new(Opcode::AssignPhi);
        inst.set_operand(0, Operand::Var(VarId::from_base(5)));
        inst.push_extra(Operand::Var(VarId::from_base(1)));
        inst.push_extra(Operand::Var(VarId::from_base(2)));
        assert_eq!(inst.reads().count(), 2);
    }
}
