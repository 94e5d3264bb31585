//! Live-variable analysis (spec §4.4): upward-exposed uses, kills and
//! live-out sets per block, with the spill-pseudo-op bookkeeping
//! (`LOAD`/`STORE`/`UNLOAD`) that tracks which variables are currently
//! "in memory" rather than in a register.

use crate::dataflow::DataflowAnalysis;
use crate::flowgraph::{BlockId, Cfg};
use crate::ir::{Opcode, VarId};
use std::collections::HashSet;

/// Per-block upward-exposed uses and kills, computed once before the
/// fixed-point sweep.
struct BlockFacts {
    ue_use: HashSet<VarId>,
    var_kill: HashSet<VarId>,
}

fn compute_block_facts(cfg: &Cfg, block: BlockId) -> BlockFacts {
    let mut ue_use = HashSet::new();
    let mut var_kill = HashSet::new();
    let mut in_memory: HashSet<VarId> = HashSet::new();

    for inst in &cfg.block(block).instructions {
        match inst.op {
            Opcode::Store => {
                // STORE does not kill: the value is still available in
                // its register as well as in memory.
                if let Some(v) = inst.operand(0).and_then(|o| o.as_var()) {
                    var_kill.remove(&v);
                    in_memory.remove(&v);
                }
                continue;
            }
            Opcode::Unload => {
                if let Some(v) = inst.operand(0).and_then(|o| o.as_var()) {
                    in_memory.remove(&v);
                }
                continue;
            }
            Opcode::Load => {
                if let Some(v) = inst.dest_var() {
                    in_memory.insert(v);
                    var_kill.insert(v);
                }
                continue;
            }
            _ => {}
        }

        for v in inst.read_vars() {
            if !in_memory.contains(&v) && !var_kill.contains(&v) {
                ue_use.insert(v);
            }
        }
        if let Some(v) = inst.dest_var() {
            var_kill.insert(v);
        }
    }

    BlockFacts { ue_use, var_kill }
}

struct Liveness<'a> {
    facts: &'a std::collections::HashMap<BlockId, BlockFacts>,
}

impl<'a> DataflowAnalysis for Liveness<'a> {
    type Fragment = HashSet<VarId>;

    fn init_fragment(&self, _cfg: &Cfg, _block: BlockId) -> HashSet<VarId> {
        HashSet::new()
    }

    fn transfer(
        &self,
        cfg: &Cfg,
        block: BlockId,
        fragment: &mut HashSet<VarId>,
        get: &dyn Fn(BlockId) -> &HashSet<VarId>,
    ) -> bool {
        let mut new_live_out = HashSet::new();
        for &succ in &cfg.block(block).next {
            let succ_facts = &self.facts[&succ];
            new_live_out.extend(succ_facts.ue_use.iter().copied());
            for &v in get(succ) {
                if !succ_facts.var_kill.contains(&v) {
                    new_live_out.insert(v);
                }
            }
        }
        if &new_live_out != fragment {
            *fragment = new_live_out;
            true
        } else {
            false
        }
    }
}

/// Per-block live-out sets.
#[derive(Debug, Clone)]
pub struct LivenessResult {
    live_out: std::collections::HashMap<BlockId, HashSet<VarId>>,
}

impl LivenessResult {
    /// The set of variables live on exit from `block`.
    pub fn live_out(&self, block: BlockId) -> &HashSet<VarId> {
        &self.live_out[&block]
    }
}

/// Runs live-variable analysis on `cfg` (spec §4.4).
pub fn analyze(cfg: &Cfg) -> LivenessResult {
    let facts: std::collections::HashMap<BlockId, BlockFacts> = cfg
        .block_ids()
        .map(|b| (b, compute_block_facts(cfg, b)))
        .collect();
    let analysis = Liveness { facts: &facts };
    let live_out = crate::dataflow::solve(cfg, &analysis);
    LivenessResult { live_out }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Operand, VarId};

    fn var(n: u32) -> Operand {
        Operand::Var(VarId::from_base(n))
    }

    #[test]
    fn loop_carried_variables_are_live_on_every_loop_edge() {
        // preheader: i = 0
        // header: cmp i, n; jge exit
        // body: i = i + 1; jmp header
        // exit: retn
        let mut asm = crate::ir::Assembler::new();
        asm.emit_assign(var(0), Operand::Const(0));
        let header = asm.make_and_mark_label();
        asm.emit_cmp(var(0), var(1));
        let exit_label = asm.make_label();
        asm.emit_jge(Operand::Label(exit_label));
        asm.emit_assign_add(var(0), var(0), Operand::Const(1));
        asm.emit_jmp(Operand::Label(header));
        asm.mark_label(exit_label);
        asm.emit_retn();
        asm.fix_labels();
        let body = asm.finish();

        let cfg = crate::flowgraph::build_cfg(&body);
        let live = analyze(&cfg);
        let header_block = cfg
            .block_ids()
            .find(|&b| cfg.block(b).prev.len() == 2)
            .unwrap();
        let i = VarId::from_base(0);
        let n = VarId::from_base(1);
        // `i` and `n` are both live out of the body block, since the loop
        // continues to compare them again in the header.
        let body_block = cfg
            .block_ids()
            .find(|&b| cfg.block(b).next.contains(&header_block) && b != header_block)
            .unwrap();
        assert!(live.live_out(body_block).contains(&i));
        assert!(live.live_out(body_block).contains(&n));
    }

    #[test]
    fn store_does_not_kill_the_stored_variable() {
        // block 0: x = 1; jmp block 1
        // block 1: store x; y = x; ret y
        //
        // If STORE killed x the way a normal def does, the read of x in
        // block 1 (after the store) would not register as an
        // upward-exposed use, live_in(block 1) would be empty, and
        // live_out(block 0) would be empty too. Since STORE must not kill
        // x, the read does register, and x is live out of block 0.
        let mut asm = crate::ir::Assembler::new();
        asm.emit_assign(var(0), Operand::Const(1));
        let block1 = asm.make_label();
        asm.emit_jmp(Operand::Label(block1));
        asm.mark_label(block1);
        asm.emit_store(var(0));
        asm.emit_assign(var(1), var(0));
        asm.emit_ret(var(1));
        asm.fix_labels();
        let body = asm.finish();

        let cfg = crate::flowgraph::build_cfg(&body);
        let live = analyze(&cfg);
        let x = VarId::from_base(0);
        let entry = cfg.root();
        assert!(
            live.live_out(entry).contains(&x),
            "x must still be considered live across the store, since STORE keeps it available in its register too"
        );
    }
}
