//! IR assembler: builds a linear instruction stream with forward-label
//! support, the way a front end emits IR for a single procedure body.
//!
//! Positions are recorded as instruction indices. `make_label` reserves a
//! label id; `mark_label` records the position it currently points at;
//! `fix_labels` patches every outstanding branch that targeted a label once
//! its position becomes known, turning the placeholder `Operand::Label`
//! into a resolved `Operand::Offset` relative to the branch.

use crate::ir::{Instruction, Opcode, Operand};

struct LabelUse {
    label: u32,
    pos: usize,
}

/// Emits a linear [`Instruction`] stream for one procedure body.
pub struct Assembler {
    insts: Vec<Instruction>,
    pos: usize,
    next_label: u32,
    label_positions: std::collections::HashMap<u32, usize>,
    label_uses: Vec<LabelUse>,
}

impl Assembler {
    /// Creates a fresh, empty assembler.
    pub fn new() -> Assembler {
        Assembler {
            insts: Vec::new(),
            pos: 0,
            next_label: 1,
            label_positions: std::collections::HashMap::new(),
            label_uses: Vec::new(),
        }
    }

    /// Consumes the assembler, returning the finished instruction stream.
    /// Callers must call `fix_labels` first if any forward labels were
    /// used.
    pub fn finish(self) -> Vec<Instruction> {
        self.insts
    }

    /// The instructions emitted so far.
    pub fn instructions(&self) -> &[Instruction] {
        &self.insts
    }

    /// The current emission cursor position.
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Moves the emission cursor, enabling in-place patching of
    /// already-emitted instructions.
    pub fn set_pos(&mut self, pos: usize) {
        self.pos = pos;
    }

    /// Reserves a new, as-yet-unpositioned label id.
    pub fn make_label(&mut self) -> u32 {
        let id = self.next_label;
        self.next_label += 1;
        id
    }

    /// Records the current position as where `label` points.
    pub fn mark_label(&mut self, label: u32) {
        self.label_positions.insert(label, self.pos);
    }

    /// `make_label` followed by `mark_label`, for the common case of a
    /// label marking "here".
    pub fn make_and_mark_label(&mut self) -> u32 {
        let label = self.make_label();
        self.mark_label(label);
        label
    }

    /// Patches every branch that referenced a now-positioned label,
    /// rewriting its operand 0 from `Label` to a resolved `Offset`.
    pub fn fix_labels(&mut self) {
        let mut remaining = Vec::new();
        for use_ in self.label_uses.drain(..) {
            match self.label_positions.get(&use_.label) {
                Some(&target) => {
                    let delta = target as i64 - (use_.pos as i64 + 1);
                    self.insts[use_.pos].operands[0] = Some(Operand::Offset(delta));
                }
                None => remaining.push(use_),
            }
        }
        self.label_uses = remaining;
    }

    fn put_instruction(&mut self) -> &mut Instruction {
        if self.pos < self.insts.len() {
            let idx = self.pos;
            self.pos += 1;
            &mut self.insts[idx]
        } else {
            self.pos += 1;
            self.insts.push(Instruction::new(Opcode::Retn));
            self.insts.last_mut().unwrap()
        }
    }

    /// Appends an already-built instruction without going through the
    /// emit helpers (used when copying instructions wholesale, e.g. during
    /// spill-code insertion).
    pub fn push_instruction(&mut self, inst: Instruction) {
        self.pos += 1;
        self.insts.push(inst);
    }

    fn emit3(&mut self, op: Opcode, r: Operand, a: Operand, b: Operand) {
        let inst = self.put_instruction();
        inst.op = op;
        inst.operands = [Some(r), Some(a), Some(b)];
        inst.extras.clear();
    }

    fn emit2(&mut self, op: Opcode, a: Operand, b: Operand) {
        let inst = self.put_instruction();
        inst.op = op;
        inst.operands = [Some(a), Some(b), None];
        inst.extras.clear();
    }

    fn emit1(&mut self, op: Opcode, a: Operand) {
        let pos = self.pos;
        if let Operand::Label(id) = a {
            self.label_uses.push(LabelUse { label: id, pos });
        }
        let inst = self.put_instruction();
        inst.op = op;
        inst.operands = [Some(a), None, None];
        inst.extras.clear();
    }

    fn emit0(&mut self, op: Opcode) {
        let inst = self.put_instruction();
        inst.op = op;
        inst.operands = [None, None, None];
        inst.extras.clear();
    }

    /// `r = a + b`.
    pub fn emit_assign_add(&mut self, r: Operand, a: Operand, b: Operand) {
        self.emit3(Opcode::AssignAdd, r, a, b);
    }
    /// `r = a - b`.
    pub fn emit_assign_sub(&mut self, r: Operand, a: Operand, b: Operand) {
        self.emit3(Opcode::AssignSub, r, a, b);
    }
    /// `r = a * b`.
    pub fn emit_assign_mul(&mut self, r: Operand, a: Operand, b: Operand) {
        self.emit3(Opcode::AssignMul, r, a, b);
    }
    /// `r = a / b`.
    pub fn emit_assign_div(&mut self, r: Operand, a: Operand, b: Operand) {
        self.emit3(Opcode::AssignDiv, r, a, b);
    }
    /// `r = a % b`.
    pub fn emit_assign_mod(&mut self, r: Operand, a: Operand, b: Operand) {
        self.emit3(Opcode::AssignMod, r, a, b);
    }
    /// `r = [a]`.
    pub fn emit_assign_read(&mut self, r: Operand, a: Operand) {
        self.emit2(Opcode::AssignRead, r, a);
    }
    /// `[r] = a`.
    pub fn emit_write(&mut self, r: Operand, a: Operand) {
        self.emit2(Opcode::Write, r, a);
    }
    /// `r = &a`.
    pub fn emit_assign_addrof(&mut self, r: Operand, a: Operand) {
        self.emit2(Opcode::AssignAddrOf, r, a);
    }
    /// `a = b`.
    pub fn emit_assign(&mut self, a: Operand, b: Operand) {
        self.emit2(Opcode::Assign, a, b);
    }
    /// `cmp a, b`.
    pub fn emit_cmp(&mut self, a: Operand, b: Operand) {
        self.emit2(Opcode::Cmp, a, b);
    }
    /// Unconditional jump.
    pub fn emit_jmp(&mut self, target: Operand) {
        self.emit1(Opcode::Jmp, target);
    }
    /// Jump if the last comparison was equal.
    pub fn emit_je(&mut self, target: Operand) {
        self.emit1(Opcode::Je, target);
    }
    /// Jump if the last comparison was not equal.
    pub fn emit_jne(&mut self, target: Operand) {
        self.emit1(Opcode::Jne, target);
    }
    /// Jump if less.
    pub fn emit_jl(&mut self, target: Operand) {
        self.emit1(Opcode::Jl, target);
    }
    /// Jump if less or equal.
    pub fn emit_jle(&mut self, target: Operand) {
        self.emit1(Opcode::Jle, target);
    }
    /// Jump if greater.
    pub fn emit_jg(&mut self, target: Operand) {
        self.emit1(Opcode::Jg, target);
    }
    /// Jump if greater or equal.
    pub fn emit_jge(&mut self, target: Operand) {
        self.emit1(Opcode::Jge, target);
    }
    /// Return a value.
    pub fn emit_ret(&mut self, value: Operand) {
        self.emit1(Opcode::Ret, value);
    }
    /// Release a spilled value's register without writing memory.
    pub fn emit_unload(&mut self, value: Operand) {
        self.emit1(Opcode::Unload, value);
    }
    /// Return with no value.
    pub fn emit_retn(&mut self) {
        self.emit0(Opcode::Retn);
    }

    /// `call target(args...)`, no destination. Returns the instruction
    /// index so the caller can append extras.
    pub fn emit_call(&mut self, target: Operand) -> usize {
        let pos = self.pos;
        let inst = self.put_instruction();
        inst.op = Opcode::Call;
        inst.operands = [Some(target), None, None];
        inst.extras.clear();
        pos
    }

    /// `dest = call target(args...)`. Returns the instruction index.
    pub fn emit_assign_call(&mut self, dest: Operand, target: Operand) -> usize {
        let pos = self.pos;
        let inst = self.put_instruction();
        inst.op = Opcode::AssignCall;
        inst.operands = [Some(dest), Some(target), None];
        inst.extras.clear();
        pos
    }

    /// `dest = phi(...)`. Returns the instruction index so the caller can
    /// append one extra per predecessor.
    pub fn emit_assign_phi(&mut self, dest: Operand) -> usize {
        let pos = self.pos;
        let inst = self.put_instruction();
        inst.op = Opcode::AssignPhi;
        inst.operands = [Some(dest), None, None];
        inst.extras.clear();
        pos
    }

    /// `store <opr>`, extras filled in by the caller with the spilled live
    /// range's members.
    pub fn emit_store(&mut self, opr: Operand) -> usize {
        let pos = self.pos;
        let inst = self.put_instruction();
        inst.op = Opcode::Store;
        inst.operands = [Some(opr), None, None];
        inst.extras.clear();
        pos
    }

    /// `dest = load`, extras filled in by the caller.
    pub fn emit_load(&mut self, dest: Operand) -> usize {
        let pos = self.pos;
        let inst = self.put_instruction();
        inst.op = Opcode::Load;
        inst.operands = [Some(dest), None, None];
        inst.extras.clear();
        pos
    }

    /// Appends an extra operand to the instruction at `pos`.
    pub fn push_extra_at(&mut self, pos: usize, operand: Operand) {
        self.insts[pos].extras.push(operand);
    }
}

impl Default for Assembler {
    fn default() -> Assembler {
        Assembler::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::VarId;

    #[test]
    fn forward_label_is_fixed_up_to_a_relative_offset() {
        let mut asm = Assembler::new();
        let t = Operand::Var(VarId::from_base(1));
        asm.emit_assign(t.clone(), Operand::Const(1));
        let label = asm.make_label();
        asm.emit_jmp(Operand::Label(label));
        asm.emit_assign(t, Operand::Const(2));
        asm.mark_label(label);
        asm.emit_retn();
        asm.fix_labels();

        let insts = asm.finish();
        match insts[1].operand(0) {
            Some(Operand::Offset(delta)) => assert_eq!(*delta, 1),
            other => panic!("expected resolved offset, got {:?}", other),
        }
    }

    #[test]
    fn put_instruction_overwrites_when_repositioned() {
        let mut asm = Assembler::new();
        asm.emit_retn();
        asm.emit_retn();
        asm.set_pos(0);
        asm.emit_assign(Operand::Var(VarId::from_base(0)), Operand::Const(9));
        let insts = asm.finish();
        assert_eq!(insts.len(), 2);
        assert!(matches!(insts[0].op, Opcode::Assign));
    }
}
