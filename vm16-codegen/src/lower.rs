//! Target lowering (spec §4.8): walks an allocated SSA CFG and prints vm16
//! target assembly text under the stackcall calling convention.
//!
//! This is grounded on `original_source/target/lower.py`'s per-opcode
//! emission table, adapted from Python string formatting to a small
//! `AsmWriter` line buffer, and on the teacher's own target lowering style
//! of one emission method per opcode family (see the now-removed
//! `isa/x86/abi.rs`, read for its prologue/epilogue and save-set shape
//! before this module's own version was written).

use crate::flowgraph::Cfg;
use crate::ir::{Instruction, Opcode, Operand, Procedure, VarId};
use crate::isa::{Register, CALLEE_SAVED, RETURN_REGISTER};
use crate::regalloc::RegisterAllocation;
use std::collections::HashSet;

/// An operand's rendered form: either a register name, the literal text of
/// an immediate/symbol, or a memory reference that must be written inside
/// `[...]` by the caller when used as a destination for `ASSIGN_READ`.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Rendered {
    Register(Register),
    Text(String),
    Memory(String),
}

impl Rendered {
    fn text(&self) -> String {
        match self {
            Rendered::Register(r) => r.to_string(),
            Rendered::Text(t) => t.clone(),
            Rendered::Memory(addr) => format!("[{}]", addr),
        }
    }

    fn is_memory(&self) -> bool {
        matches!(self, Rendered::Memory(_))
    }
}

/// Lowering context for one procedure: the allocation, which spill slot
/// each spilled live range landed in, and whether a prologue was emitted.
struct Lowerer<'a> {
    proc: &'a Procedure,
    colors: &'a RegisterAllocation,
    has_prologue: bool,
    stored_lrs: Vec<Vec<VarId>>,
    callee_saved_used: Vec<Register>,
    lines: Vec<String>,
}

fn slot_index(stored_lrs: &[Vec<VarId>], members: &[VarId]) -> usize {
    let mut sorted: Vec<VarId> = members.to_vec();
    sorted.sort();
    stored_lrs
        .iter()
        .position(|lr| lr == &sorted)
        .expect("STORE/LOAD must reference a slot recorded by the pre-pass")
}

/// Collects the ordered, deduplicated list of spilled live ranges (the
/// "stored-lrs list" spec §4.8 resolves `LOAD`/`STORE` slot indices
/// against), in first-appearance order across blocks.
fn collect_stored_lrs(cfg: &Cfg) -> Vec<Vec<VarId>> {
    let mut stored = Vec::new();
    for block in cfg.block_ids() {
        for inst in &cfg.block(block).instructions {
            if inst.op == Opcode::Store {
                let mut members: Vec<VarId> =
                    inst.extras.iter().filter_map(Operand::as_var).collect();
                members.sort();
                if !stored.contains(&members) {
                    stored.push(members);
                }
            }
        }
    }
    stored
}

fn has_any_store(cfg: &Cfg) -> bool {
    cfg.block_ids()
        .any(|b| cfg.block(b).instructions.iter().any(|i| i.op == Opcode::Store))
}

/// Which callee-saved registers the allocation actually colors a variable
/// into, in the fixed `CALLEE_SAVED` order (stable regardless of hash
/// iteration over the color map).
fn callee_saved_in_use(cfg: &Cfg, colors: &RegisterAllocation) -> Vec<Register> {
    let mut used = HashSet::new();
    for block in cfg.block_ids() {
        for inst in &cfg.block(block).instructions {
            if let Some(d) = inst.dest_var() {
                if colors.has_color(d) {
                    used.insert(Register::from_color(colors.get_color(d)));
                }
            }
        }
    }
    CALLEE_SAVED
        .iter()
        .copied()
        .filter(|r| used.contains(r))
        .collect()
}

impl<'a> Lowerer<'a> {
    /// Emits an instruction line, tab-indented per spec §6 ("tab-indented,
    /// with labels in column 0").
    fn emit(&mut self, line: impl Into<String>) {
        self.lines.push(format!("\t{}", line.into()));
    }

    /// Emits a label definition in column 0, unindented.
    fn emit_label(&mut self, label: impl Into<String>) {
        self.lines.push(format!("{}:", label.into()));
    }

    /// A block's label: the procedure name followed by its block-local
    /// label (spec §6's `_blkN` form; [`crate::flowgraph::BlockId`]'s
    /// `Display` already supplies the leading underscore).
    fn label_for(&self, block: crate::flowgraph::BlockId) -> String {
        format!("{}{}", self.proc.name(), block)
    }

    /// Resolves a variable operand to a register, a parameter's memory
    /// address, or a spill slot's memory address.
    fn render_var(&self, v: VarId) -> Rendered {
        if self.colors.has_color(v) {
            return Rendered::Register(Register::from_color(self.colors.get_color(v)));
        }
        if let Some(idx) = self
            .proc
            .parameters()
            .iter()
            .position(|p| p.base() == v.base())
        {
            let offset = idx + 1;
            return if self.has_prologue {
                Rendered::Memory(format!("J+{}", offset))
            } else {
                Rendered::Memory(format!("SP+{}", offset))
            };
        }
        panic!(
            "variable {:?} has neither a color nor a parameter slot; allocation is incomplete",
            v
        );
    }

    fn render(&self, op: &Operand) -> Rendered {
        match op {
            Operand::Var(v) => self.render_var(*v),
            Operand::Const(c) => Rendered::Text(c.to_string()),
            Operand::Name(n) => Rendered::Text(n.clone()),
            Operand::Label(_) | Operand::Offset(_) | Operand::BlockRef(_) => {
                panic!("branch-shaped operand passed to general operand rendering")
            }
        }
    }

    /// `SET dest, src` unless `dest` already names the same register/memory
    /// text as `src` (the common "already there" case after `ASSIGN`-chain
    /// simplification below).
    fn set_if_needed(&mut self, dest: &Rendered, src: &Rendered) {
        if dest.text() != src.text() {
            self.emit(format!("SET {}, {}", dest.text(), src.text()));
        }
    }

    fn lower_binary(&mut self, mnemonic: &str, commutative: bool, inst: &Instruction) {
        let dest = self.render(inst.operand(0).unwrap());
        let mut left = self.render(inst.operand(1).unwrap());
        let mut right = self.render(inst.operand(2).unwrap());
        if commutative && right.text() == dest.text() {
            std::mem::swap(&mut left, &mut right);
        }
        if !commutative && right.text() == dest.text() {
            // The allocator colored the right operand's live range the same
            // as dest (legal: nothing forces an interference edge between
            // them here). `SET dest, left` would clobber `right` before
            // it's read, and unlike the commutative case there's no operand
            // swap that fixes it. Stash the pre-clobber value on the stack
            // and read it back as the instruction's second operand.
            self.emit(format!("SET PUSH, {}", right.text()));
            self.set_if_needed(&dest, &left);
            self.emit(format!("{} {}, POP", mnemonic, dest.text()));
            return;
        }
        self.set_if_needed(&dest, &left);
        self.emit(format!("{} {}, {}", mnemonic, dest.text(), right.text()));
    }

    /// Signed multiplication (`MLI`) elides entirely when either operand is
    /// the literal `1`: the allocator having colored `dest` the same as the
    /// non-literal operand (the usual case for `x = x * 1`) means there is
    /// nothing left to do at the assembly level.
    fn lower_signed_mul(&mut self, inst: &Instruction) {
        let left = self.render(inst.operand(1).unwrap());
        let right = self.render(inst.operand(2).unwrap());
        if left.text() == "1" || right.text() == "1" {
            return;
        }
        self.lower_binary("MLI", true, inst);
    }

    fn lower_assign_read(&mut self, inst: &Instruction) {
        let dest = self.render(inst.operand(0).unwrap());
        let src = self.render(inst.operand(1).unwrap());
        if src.is_memory() {
            self.emit(format!("SET {}, {}", dest.text(), src.text()));
            self.emit(format!("SET {}, [{}]", dest.text(), dest.text()));
        } else {
            self.emit(format!("SET {}, [{}]", dest.text(), src.text()));
        }
    }

    fn lower_write(&mut self, inst: &Instruction) {
        let dest = self.render(inst.operand(0).unwrap());
        let src = self.render(inst.operand(1).unwrap());
        assert!(!dest.is_memory(), "WRITE destination must not itself be a memory operand");
        self.emit(format!("SET [{}], {}", dest.text(), src.text()));
    }

    fn lower_addrof(&mut self, inst: &Instruction) {
        let dest = self.render(inst.operand(0).unwrap());
        let src_op = inst.operand(1).unwrap();
        match src_op {
            Operand::Name(n) => self.emit(format!("SET {}, {}", dest.text(), n)),
            Operand::Var(v) => {
                if let Some(idx) = self.proc.parameters().iter().position(|p| p.base() == v.base()) {
                    let base_reg = if self.has_prologue { "J" } else { "SP" };
                    self.emit(format!("SET {}, {}", dest.text(), base_reg));
                    self.emit(format!("ADD {}, {}", dest.text(), idx + 1));
                } else {
                    panic!("ASSIGN_ADDROF source must be a parameter or a named global");
                }
            }
            _ => panic!("ASSIGN_ADDROF source must be a Var or Name operand"),
        }
    }

    fn lower_addrof_spill_slot(&mut self, dest: &Rendered, slot: usize) {
        self.emit(format!("SET {}, J", dest.text()));
        self.emit(format!("SUB {}, {}", dest.text(), slot + 1));
    }

    fn comparison_mnemonic(op: Opcode) -> &'static str {
        match op {
            Opcode::Je => "IFE",
            Opcode::Jne => "IFN",
            Opcode::Jl => "IFL",
            Opcode::Jg => "IFG",
            // JGE/JLE are expanded by their own two-guard callers below.
            _ => unreachable!(),
        }
    }

    fn lower_branch(&mut self, inst: &Instruction, cmp: Option<&Instruction>, target_label: &str) {
        if inst.op == Opcode::Jmp {
            self.emit(format!("SET PC, {}", target_label));
            return;
        }
        let cmp = cmp.expect("conditional branch must be preceded by CMP");
        let a = self.render(cmp.operand(0).unwrap());
        let b = self.render(cmp.operand(1).unwrap());
        match inst.op {
            Opcode::Je | Opcode::Jne | Opcode::Jl | Opcode::Jg => {
                self.emit(format!(
                    "{} {}, {}",
                    Self::comparison_mnemonic(inst.op),
                    a.text(),
                    b.text()
                ));
                self.emit(format!("SET PC, {}", target_label));
            }
            Opcode::Jge => {
                self.emit(format!("IFE {}, {}", a.text(), b.text()));
                self.emit(format!("SET PC, {}", target_label));
                self.emit(format!("IFG {}, {}", a.text(), b.text()));
                self.emit(format!("SET PC, {}", target_label));
            }
            Opcode::Jle => {
                self.emit(format!("IFE {}, {}", a.text(), b.text()));
                self.emit(format!("SET PC, {}", target_label));
                self.emit(format!("IFL {}, {}", a.text(), b.text()));
                self.emit(format!("SET PC, {}", target_label));
            }
            _ => unreachable!("lower_branch called with a non-branch opcode"),
        }
    }

    /// Pops this lowerer's epilogue sequence, shared between `RET` and
    /// `RETN` lowering.
    fn emit_epilogue(&mut self) {
        for r in self.callee_saved_used.clone().iter().rev() {
            self.emit(format!("SET {}, POP", r));
        }
        if self.has_prologue {
            self.emit("SET SP, J");
            self.emit("SET J, POP");
        }
        self.emit("SET PC, POP");
    }

    fn lower_ret(&mut self, inst: &Instruction) {
        let v = self.render(inst.operand(0).unwrap());
        let ret = Rendered::Register(RETURN_REGISTER);
        self.set_if_needed(&ret, &v);
        self.emit_epilogue();
    }

    fn lower_retn(&mut self) {
        self.emit_epilogue();
    }

    /// Forward usage analysis for one caller-saved register live across a
    /// `CALL`/`ASSIGN_CALL` (spec §4.8): walk successor instructions/blocks
    /// from just after the call, insertion order, until a read (save), a
    /// write (no save), or every path terminates without either (no save).
    fn register_used_after(&self, cfg: &Cfg, block: crate::flowgraph::BlockId, from_idx: usize, reg: Register) -> bool {
        let mut visited = HashSet::new();
        self.register_used_after_rec(cfg, block, from_idx, reg, &mut visited)
    }

    fn register_used_after_rec(
        &self,
        cfg: &Cfg,
        block: crate::flowgraph::BlockId,
        from_idx: usize,
        reg: Register,
        visited: &mut HashSet<crate::flowgraph::BlockId>,
    ) -> bool {
        let insts = &cfg.block(block).instructions;
        for inst in insts.iter().skip(from_idx) {
            let reads_reg = inst
                .reads()
                .filter_map(Operand::as_var)
                .any(|v| self.colors.has_color(v) && Register::from_color(self.colors.get_color(v)) == reg);
            if reads_reg {
                return true;
            }
            let writes_reg = inst
                .dest_var()
                .map_or(false, |d| self.colors.has_color(d) && Register::from_color(self.colors.get_color(d)) == reg);
            if writes_reg {
                return false;
            }
        }
        if !visited.insert(block) {
            return false;
        }
        let successors = cfg.block(block).next.clone();
        successors
            .iter()
            .any(|&succ| self.register_used_after_rec(cfg, succ, 0, reg, visited))
    }

    fn lower_call(
        &mut self,
        cfg: &Cfg,
        block: crate::flowgraph::BlockId,
        idx: usize,
        inst: &Instruction,
        dest: Option<&Operand>,
    ) {
        use crate::isa::CALLER_SAVED;

        let save_set: Vec<Register> = CALLER_SAVED
            .iter()
            .copied()
            .filter(|&r| self.register_used_after(cfg, block, idx + 1, r))
            .collect();
        for r in &save_set {
            self.emit(format!("SET PUSH, {}", r));
        }

        for arg in inst.extras.iter().rev() {
            let rendered = self.render(arg);
            self.emit(format!("SET PUSH, {}", rendered.text()));
        }

        let target = self.render(inst.operand(if dest.is_some() { 1 } else { 0 }).unwrap());
        self.emit(format!("JSR {}", target.text()));
        if !inst.extras.is_empty() {
            self.emit(format!("SUB SP, {}", inst.extras.len()));
        }

        for r in save_set.iter().rev() {
            self.emit(format!("SET {}, POP", r));
        }

        if let Some(d) = dest {
            let dest_r = self.render(d);
            let call_result = Rendered::Register(RETURN_REGISTER);
            self.set_if_needed(&dest_r, &call_result);
        }
    }

    fn lower_load(&mut self, inst: &Instruction) {
        let dest = self.render(inst.operand(0).unwrap());
        let members: Vec<VarId> = inst.extras.iter().filter_map(Operand::as_var).collect();
        let slot = slot_index(&self.stored_lrs, &members);
        self.emit(format!("SET {}, [J-{}]", dest.text(), slot + 1));
    }

    fn lower_store(&mut self, inst: &Instruction) {
        let v = self.render(inst.operand(0).unwrap());
        let members: Vec<VarId> = inst.extras.iter().filter_map(Operand::as_var).collect();
        let slot = slot_index(&self.stored_lrs, &members);
        self.emit(format!("SET [J-{}], {}", slot + 1, v.text()));
    }
}

/// Lowers an allocated SSA CFG into target assembly text (spec §4.8).
/// `proc` supplies the procedure's name and parameter list; `colors` is the
/// allocation produced by [`crate::regalloc::allocate`] over the same
/// (possibly spill-patched) `cfg`.
pub fn lower(cfg: &Cfg, proc: &Procedure, colors: &RegisterAllocation) -> String {
    let has_prologue = has_any_store(cfg);
    let stored_lrs = collect_stored_lrs(cfg);
    let callee_saved_used = callee_saved_in_use(cfg, colors);

    let mut lowerer = Lowerer {
        proc,
        colors,
        has_prologue,
        stored_lrs,
        callee_saved_used: callee_saved_used.clone(),
        lines: Vec::new(),
    };

    if proc.is_exported() {
        let name = proc.name().to_string();
        lowerer.emit_label(name);
    } else {
        let label = lowerer.label_for(cfg.root());
        lowerer.emit_label(label);
    }

    if has_prologue {
        lowerer.emit("SET PUSH, J");
        lowerer.emit("SET J, SP");
        let slot_count = lowerer.stored_lrs.len();
        if slot_count > 0 {
            lowerer.emit(format!("SUB SP, {}", slot_count));
        }
    }
    for r in &callee_saved_used {
        lowerer.emit(format!("SET PUSH, {}", r));
    }

    for block in cfg.block_ids() {
        if block != cfg.root() {
            let label = lowerer.label_for(block);
            lowerer.emit_label(label);
        }

        let insts = cfg.block(block).instructions.clone();
        let mut i = 0;
        while i < insts.len() {
            let inst = &insts[i];
            match inst.op {
                Opcode::AssignAdd | Opcode::AssignAddU => lowerer.lower_binary("ADD", true, inst),
                Opcode::AssignSub | Opcode::AssignSubU => lowerer.lower_binary("SUB", false, inst),
                Opcode::AssignMul => lowerer.lower_signed_mul(inst),
                Opcode::AssignDiv | Opcode::AssignDivU => lowerer.lower_binary("DIV", false, inst),
                Opcode::AssignMod => lowerer.lower_binary("MDI", false, inst),
                Opcode::AssignMulU => lowerer.lower_binary("MUL", true, inst),
                Opcode::AssignModU => lowerer.lower_binary("MOD", false, inst),
                Opcode::AssignOr => lowerer.lower_binary("BOR", true, inst),
                Opcode::AssignAnd => lowerer.lower_binary("AND", true, inst),
                Opcode::AssignXor => lowerer.lower_binary("XOR", true, inst),
                Opcode::Assign => {
                    let dest = lowerer.render(inst.operand(0).unwrap());
                    let src = lowerer.render(inst.operand(1).unwrap());
                    lowerer.set_if_needed(&dest, &src);
                }
                Opcode::AssignRead => lowerer.lower_assign_read(inst),
                Opcode::Write => lowerer.lower_write(inst),
                Opcode::AssignAddrOf => {
                    if matches!(inst.operand(1), None) {
                        let dest = lowerer.render(inst.operand(0).unwrap());
                        // No source operand: address of this destination's
                        // own spill slot.
                        let members: Vec<VarId> =
                            inst.extras.iter().filter_map(Operand::as_var).collect();
                        let slot = slot_index(&lowerer.stored_lrs, &members);
                        lowerer.lower_addrof_spill_slot(&dest, slot);
                    } else {
                        lowerer.lower_addrof(inst);
                    }
                }
                Opcode::Cmp => {} // comparands are read directly by the following branch.
                Opcode::Jmp | Opcode::Je | Opcode::Jne | Opcode::Jl | Opcode::Jle | Opcode::Jg
                | Opcode::Jge => {
                    let cmp = if inst.op == Opcode::Jmp {
                        None
                    } else {
                        let c = &insts[i - 1];
                        debug_assert_eq!(c.op, Opcode::Cmp, "conditional branch must be preceded by CMP");
                        Some(c)
                    };
                    let target_block = inst
                        .operand(0)
                        .and_then(Operand::as_block_ref)
                        .expect("branch operand must be a BlockRef once in CFG form");
                    let label = lowerer.label_for(target_block);
                    lowerer.lower_branch(inst, cmp, &label);
                }
                Opcode::Ret => lowerer.lower_ret(inst),
                Opcode::Retn => lowerer.lower_retn(),
                Opcode::Call => lowerer.lower_call(cfg, block, i, inst, None),
                Opcode::AssignCall => {
                    let dest = inst.operand(0).cloned();
                    lowerer.lower_call(cfg, block, i, inst, dest.as_ref());
                }
                Opcode::AssignPhi => {}
                Opcode::Load => lowerer.lower_load(inst),
                Opcode::Store => lowerer.lower_store(inst),
                Opcode::Unload => {}
            }
            i += 1;
        }
    }

    lowerer.lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dominator_tree;
    use crate::flowgraph::build_cfg;
    use crate::ir::{Assembler, VarId};
    use crate::regalloc;

    fn var(base: u32) -> Operand {
        Operand::Var(VarId::from_base(base))
    }

    /// Spec §8 end-to-end scenario 1: `int f(int a, int b){ return a+b; }`.
    #[test]
    fn two_parameter_sum_addresses_both_off_the_stack_pointer() {
        let mut proc = Procedure::new("f");
        proc.set_exported();
        proc.push_parameter(VarId::from_base(0));
        proc.push_parameter(VarId::from_base(1));

        let mut asm = Assembler::new();
        asm.emit_assign_add(var(2), var(0), var(1));
        asm.emit_ret(var(2));
        proc.extend_body(asm.finish());

        let mut cfg = build_cfg(proc.body());
        let dom = dominator_tree::analyze(&cfg);
        let parameters: Vec<u32> = proc.parameters().iter().map(|p| p.base()).collect();
        crate::ssa::construct(&mut cfg, &dom, &parameters);
        let colors = regalloc::allocate(&mut cfg, crate::isa::NUM_COLORS, &dom).unwrap();

        let text = lower(&cfg, &proc, &colors);

        assert_eq!(
            text,
            ["f:", "\tSET A, [SP+1]", "\tADD A, [SP+2]", "\tSET PC, POP"].join("\n")
        );
    }

    /// Regression test for a hazard the allocator can legally produce: a
    /// non-commutative binary op whose right operand shares a color with
    /// its destination (no interference edge is required between them,
    /// since the right operand's live range can end exactly at this
    /// instruction). Colors are set by hand rather than obtained from
    /// `regalloc::allocate`, since which of several equally valid
    /// colorings that allocator picks depends on `HashMap` iteration
    /// order and isn't something a test should pin down.
    #[test]
    fn non_commutative_op_stashes_right_operand_when_it_shares_dests_color() {
        let proc = Procedure::new("f");
        let dest = VarId::from_base(2);
        let left = VarId::from_base(0);
        let right = VarId::from_base(1);

        let mut colors = regalloc::RegisterAllocation::default();
        colors.set_color(left, 1);
        colors.set_color(right, 0);
        colors.set_color(dest, 0);

        let mut lowerer = Lowerer {
            proc: &proc,
            colors: &colors,
            has_prologue: false,
            stored_lrs: Vec::new(),
            callee_saved_used: Vec::new(),
            lines: Vec::new(),
        };

        let mut inst = Instruction::new(Opcode::AssignSub);
        inst.set_operand(0, Operand::Var(dest));
        inst.set_operand(1, Operand::Var(left));
        inst.set_operand(2, Operand::Var(right));
        lowerer.lower_binary("SUB", false, &inst);

        assert_eq!(
            lowerer.lines,
            vec!["\tSET PUSH, A", "\tSET A, B", "\tSUB A, POP"],
            "right operand (A) must be pushed before dest (also A) is overwritten with left (B)"
        );
    }

    /// Spec §8 boundary behavior: a procedure whose only instruction is
    /// `RETN`.
    #[test]
    fn retn_only_procedure_emits_label_and_bare_return() {
        let proc = Procedure::new("noop");

        let mut asm = Assembler::new();
        asm.emit_retn();
        let body = asm.finish();

        let cfg = build_cfg(&body);
        let dom = dominator_tree::analyze(&cfg);
        let mut cfg = cfg;
        crate::ssa::construct(&mut cfg, &dom, &[]);
        let colors = regalloc::allocate(&mut cfg, crate::isa::NUM_COLORS, &dom).unwrap();

        let text = lower(&cfg, &proc, &colors);

        assert_eq!(text, ["noop_blk0:", "\tSET PC, POP"].join("\n"));
    }
}
