//! SSA construction (spec §4.5): minimal/semi-pruned phi placement at
//! dominance frontiers, followed by renaming via a dominator-tree preorder
//! walk with per-base subscript stacks.

use crate::dominator_tree::DominanceResult;
use crate::flowgraph::{BlockId, Cfg, CfgKind};
use crate::ir::{Instruction, Opcode, Operand, VarId};
use std::collections::{HashMap, HashSet, VecDeque};
use log::debug;

/// Discovers every "global" variable: one whose read, somewhere in the
/// procedure, is not preceded by a definition in the same block. Also
/// returns, for each base variable, the set of blocks that define it.
///
/// Procedure parameters are seeded as if defined in the root block: their
/// value is live on entry without any instruction writing them, so the
/// phi-placement and renaming walk below must see root as a defining block
/// for each one, exactly as if a normal assignment had put it there.
fn find_globals(cfg: &Cfg, parameters: &[u32]) -> (HashSet<u32>, HashMap<u32, HashSet<BlockId>>) {
    let mut globals = HashSet::new();
    let mut def_blocks: HashMap<u32, HashSet<BlockId>> = HashMap::new();
    for &base in parameters {
        def_blocks.entry(base).or_default().insert(cfg.root());
    }

    for block in cfg.block_ids() {
        let mut killed_in_block: HashSet<u32> = HashSet::new();
        for inst in &cfg.block(block).instructions {
            for v in inst.read_vars() {
                if !killed_in_block.contains(&v.base()) {
                    globals.insert(v.base());
                }
            }
            if let Some(v) = inst.dest_var() {
                killed_in_block.insert(v.base());
                def_blocks.entry(v.base()).or_default().insert(block);
            }
        }
    }

    (globals, def_blocks)
}

/// Inserts phi functions for every global at the dominance frontier of its
/// defining blocks, iterating to closure (Cytron et al.'s standard
/// worklist formulation).
fn insert_phi_functions(
    cfg: &mut Cfg,
    dom: &DominanceResult,
    globals: &HashSet<u32>,
    def_blocks: &HashMap<u32, HashSet<BlockId>>,
) {
    for &base in globals {
        let defining = match def_blocks.get(&base) {
            Some(d) => d.clone(),
            None => continue,
        };
        let mut worklist: VecDeque<BlockId> = defining.iter().copied().collect();
        let mut has_phi_for_base: HashSet<BlockId> = HashSet::new();
        let mut enqueued: HashSet<BlockId> = defining.iter().copied().collect();

        while let Some(block) = worklist.pop_front() {
            for &df_block in dom.df(block) {
                if has_phi_for_base.contains(&df_block) {
                    continue;
                }
                let num_preds = cfg.block(df_block).prev.len();
                let mut phi = Instruction::new(Opcode::AssignPhi);
                phi.set_operand(0, Operand::Var(VarId::from_base(base)));
                for _ in 0..num_preds {
                    phi.push_extra(Operand::Var(VarId::from_base(base)));
                }
                cfg.block_mut(df_block).instructions.insert(0, phi);
                has_phi_for_base.insert(df_block);

                if enqueued.insert(df_block) {
                    worklist.push_back(df_block);
                }
            }
        }
    }
}

struct Renamer {
    counters: HashMap<u32, u32>,
    stacks: HashMap<u32, Vec<u32>>,
}

impl Renamer {
    fn new() -> Renamer {
        Renamer {
            counters: HashMap::new(),
            stacks: HashMap::new(),
        }
    }

    fn current(&self, base: u32) -> u32 {
        *self
            .stacks
            .get(&base)
            .and_then(|s| s.last())
            .unwrap_or_else(|| panic!("variable base {} used before being defined", base))
    }

    fn push_new(&mut self, base: u32) -> u32 {
        let counter = self.counters.entry(base).or_insert(0);
        *counter += 1;
        let subscript = *counter;
        self.stacks.entry(base).or_default().push(subscript);
        subscript
    }

    fn pop(&mut self, base: u32) {
        self.stacks.get_mut(&base).unwrap().pop();
    }
}

fn rename_operand(renamer: &Renamer, operand: &mut Operand) {
    if let Operand::Var(id) = operand {
        let subscript = renamer.current(id.base());
        *id = id.with_subscript(subscript);
    }
}

fn rename_block(cfg: &mut Cfg, dom: &DominanceResult, renamer: &mut Renamer, block: BlockId) {
    let mut pushed_here: Vec<u32> = Vec::new();

    let num_insts = cfg.block(block).instructions.len();
    for i in 0..num_insts {
        let is_phi = cfg.block(block).instructions[i].op == Opcode::AssignPhi;
        if is_phi {
            let base = cfg.block(block).instructions[i]
                .dest_var()
                .expect("phi must have a destination")
                .base();
            let subscript = renamer.push_new(base);
            pushed_here.push(base);
            let dest = &mut cfg.block_mut(block).instructions[i].operands[0];
            *dest = Some(Operand::Var(VarId::make(base, subscript, 0)));
            continue;
        }

        // Non-phi: rename reads first, using the stack as it stood before
        // this instruction's own write (if any).
        {
            let inst = &mut cfg.block_mut(block).instructions[i];
            let first_read_slot = if inst.op.is_assign() { 1 } else { 0 };
            let count = inst.op.operand_count();
            for slot in &mut inst.operands[first_read_slot..count] {
                if let Some(op) = slot {
                    rename_operand(renamer, op);
                }
            }
            for extra in &mut inst.extras {
                rename_operand(renamer, extra);
            }
        }

        if cfg.block(block).instructions[i].op.is_assign() {
            let base = cfg.block(block).instructions[i]
                .dest_var()
                .expect("assign opcode must carry a destination")
                .base();
            let subscript = renamer.push_new(base);
            pushed_here.push(base);
            let dest = &mut cfg.block_mut(block).instructions[i].operands[0];
            *dest = Some(Operand::Var(VarId::make(base, subscript, 0)));
        }
    }

    // Patch this block's own index into each successor's phi inputs.
    let successors = cfg.block(block).next.clone();
    for succ in successors {
        let idx = cfg
            .block(succ)
            .predecessor_index(block)
            .expect("block must be listed as its successor's predecessor");
        for inst in &mut cfg.block_mut(succ).instructions {
            if inst.op != Opcode::AssignPhi {
                continue;
            }
            let base = match inst.extras.get(idx) {
                Some(Operand::Var(v)) => v.base(),
                _ => continue,
            };
            inst.extras[idx] = Operand::Var(VarId::make(base, renamer.current(base), 0));
        }
    }

    for &child in dom.children(block) {
        rename_block(cfg, dom, renamer, child);
    }

    for base in pushed_here {
        renamer.pop(base);
    }
}

/// Transforms `cfg` into SSA form in place (spec §4.5): phi placement,
/// then a dominator-tree preorder renaming walk. Sets the CFG's kind to
/// `Ssa` on completion.
///
/// `parameters` lists the procedure's parameter variable bases. Each is
/// seeded with subscript 0 before renaming starts, standing in for the
/// implicit definition every parameter receives on entry — without this,
/// reading a parameter before any write to it would find an empty
/// subscript stack.
pub fn construct(cfg: &mut Cfg, dom: &DominanceResult, parameters: &[u32]) {
    let (globals, def_blocks) = find_globals(cfg, parameters);
    debug!("ssa: {} global variable(s) need phi placement", globals.len());
    insert_phi_functions(cfg, dom, &globals, &def_blocks);

    let mut renamer = Renamer::new();
    for &base in parameters {
        renamer.stacks.entry(base).or_default().push(0);
    }
    rename_block(cfg, dom, &mut renamer, cfg.root());

    cfg.set_ssa();
    debug_assert_eq!(cfg.kind(), CfgKind::Ssa);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Operand;

    fn var(n: u32) -> Operand {
        Operand::Var(VarId::from_base(n))
    }

    #[test]
    fn diamond_join_gets_a_phi_with_one_arg_per_predecessor() {
        let mut asm = crate::ir::Assembler::new();
        asm.emit_cmp(var(0), Operand::Const(1));
        let right = asm.make_label();
        asm.emit_je(Operand::Label(right));
        asm.emit_assign(var(1), Operand::Const(10));
        let join = asm.make_label();
        asm.emit_jmp(Operand::Label(join));
        asm.mark_label(right);
        asm.emit_assign(var(1), Operand::Const(20));
        asm.mark_label(join);
        asm.emit_ret(var(1));
        asm.fix_labels();
        let body = asm.finish();

        let mut cfg = crate::flowgraph::build_cfg(&body);
        let dom = crate::dominator_tree::analyze(&cfg);
        construct(&mut cfg, &dom, &[]);

        let join_block = cfg
            .block_ids()
            .find(|&b| cfg.block(b).prev.len() == 2)
            .unwrap();
        let phi = &cfg.block(join_block).instructions[0];
        assert_eq!(phi.op, Opcode::AssignPhi);
        assert_eq!(phi.extras.len(), 2);
    }

    #[test]
    fn every_variable_id_is_written_at_most_once() {
        let mut asm = crate::ir::Assembler::new();
        asm.emit_assign(var(0), Operand::Const(1));
        asm.emit_assign(var(0), Operand::Const(2));
        asm.emit_ret(var(0));
        asm.fix_labels();
        let body = asm.finish();

        let mut cfg = crate::flowgraph::build_cfg(&body);
        let dom = crate::dominator_tree::analyze(&cfg);
        construct(&mut cfg, &dom, &[]);

        let mut seen = HashSet::new();
        for b in cfg.block_ids() {
            for inst in &cfg.block(b).instructions {
                if let Some(v) = inst.dest_var() {
                    assert!(seen.insert(v), "variable {:?} written twice", v);
                }
            }
        }
    }
}
