//! Dominance analysis: dominator sets, immediate dominators and dominance
//! frontiers (spec §4.3), built on the generic [`dataflow`](crate::dataflow)
//! driver.

use crate::dataflow::DataflowAnalysis;
use crate::flowgraph::{BlockId, Cfg};
use std::collections::{HashMap, HashSet};

struct Dominators<'a> {
    all_blocks: &'a HashSet<BlockId>,
    root: BlockId,
}

impl<'a> DataflowAnalysis for Dominators<'a> {
    type Fragment = HashSet<BlockId>;

    fn init_fragment(&self, _cfg: &Cfg, block: BlockId) -> HashSet<BlockId> {
        if block == self.root {
            let mut s = HashSet::new();
            s.insert(block);
            s
        } else {
            self.all_blocks.clone()
        }
    }

    fn transfer(
        &self,
        cfg: &Cfg,
        block: BlockId,
        fragment: &mut HashSet<BlockId>,
        get: &dyn Fn(BlockId) -> &HashSet<BlockId>,
    ) -> bool {
        let preds = &cfg.block(block).prev;
        let mut new_set = if block == self.root {
            HashSet::new()
        } else if preds.is_empty() {
            HashSet::new()
        } else {
            let mut iter = preds.iter();
            let first = get(*iter.next().unwrap()).clone();
            iter.fold(first, |acc, &p| acc.intersection(get(p)).cloned().collect())
        };
        new_set.insert(block);

        if &new_set != fragment {
            *fragment = new_set;
            true
        } else {
            false
        }
    }
}

/// The result of dominance analysis: dominator sets, immediate dominators
/// and dominance frontiers, all keyed by `BlockId`.
#[derive(Debug, Clone)]
pub struct DominanceResult {
    dominators: HashMap<BlockId, HashSet<BlockId>>,
    idom: HashMap<BlockId, BlockId>,
    df: HashMap<BlockId, HashSet<BlockId>>,
    children: HashMap<BlockId, Vec<BlockId>>,
    root: BlockId,
}

impl DominanceResult {
    /// The set of blocks that dominate `block` (including `block` itself).
    pub fn dominators(&self, block: BlockId) -> &HashSet<BlockId> {
        &self.dominators[&block]
    }

    /// The immediate dominator of `block`, or `None` for the root.
    pub fn idom(&self, block: BlockId) -> Option<BlockId> {
        self.idom.get(&block).copied()
    }

    /// The dominance frontier of `block` (empty by default, per spec §3).
    pub fn df(&self, block: BlockId) -> &HashSet<BlockId> {
        &self.df[&block]
    }

    /// The dominator tree's children of `block` (blocks whose immediate
    /// dominator is `block`), in insertion order — used by the SSA
    /// renamer's preorder walk.
    pub fn children(&self, block: BlockId) -> &[BlockId] {
        self.children
            .get(&block)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Whether `a` dominates `b` (reflexive).
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        self.dominators(b).contains(&a)
    }

    /// Whether `a` strictly dominates `b`.
    pub fn strictly_dominates(&self, a: BlockId, b: BlockId) -> bool {
        a != b && self.dominates(a, b)
    }
}

/// Runs dominance analysis on `cfg` (spec §4.3): the dataflow fixed point
/// for dominator sets, followed by immediate-dominator extraction and
/// dominance-frontier computation.
pub fn analyze(cfg: &Cfg) -> DominanceResult {
    let root = cfg.root();
    let all_blocks: HashSet<BlockId> = cfg.block_ids().collect();
    let analysis = Dominators {
        all_blocks: &all_blocks,
        root,
    };
    let dominators = crate::dataflow::solve(cfg, &analysis);

    let mut idom = HashMap::new();
    for &b in &all_blocks {
        if b == root {
            continue;
        }
        let doms = &dominators[&b];
        let candidates: Vec<BlockId> = doms.iter().copied().filter(|&d| d != b).collect();
        let found = candidates.iter().copied().find(|&d| {
            candidates
                .iter()
                .all(|&other| other == d || !dominators[&other].contains(&d))
        });
        if let Some(d) = found {
            idom.insert(b, d);
        }
    }

    let mut children: HashMap<BlockId, Vec<BlockId>> = HashMap::new();
    for &b in cfg.block_ids().collect::<Vec<_>>().iter() {
        if let Some(&d) = idom.get(&b) {
            children.entry(d).or_default().push(b);
        }
    }

    let mut df: HashMap<BlockId, HashSet<BlockId>> = HashMap::new();
    for b in cfg.block_ids() {
        df.entry(b).or_insert_with(HashSet::new);
    }
    for b in cfg.block_ids() {
        let preds = &cfg.block(b).prev;
        if preds.len() < 2 {
            continue;
        }
        let idom_b = match idom.get(&b) {
            Some(&d) => d,
            None => continue,
        };
        for &p in preds {
            let mut runner = p;
            while runner != idom_b {
                df.entry(runner).or_default().insert(b);
                match idom.get(&runner) {
                    Some(&next) => runner = next,
                    None => break,
                }
            }
        }
    }

    DominanceResult {
        dominators,
        idom,
        df,
        children,
        root,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Operand, VarId};

    fn var(n: u32) -> Operand {
        Operand::Var(VarId::from_base(n))
    }

    #[test]
    fn root_dominates_every_block_in_a_diamond() {
        // entry -> {left, right} -> join
        let mut asm = crate::ir::Assembler::new();
        asm.emit_cmp(var(0), Operand::Const(1));
        let right_label = asm.make_label();
        asm.emit_je(Operand::Label(right_label));
        asm.emit_assign(var(1), Operand::Const(10)); // left
        let join_label = asm.make_label();
        asm.emit_jmp(Operand::Label(join_label));
        asm.mark_label(right_label);
        asm.emit_assign(var(1), Operand::Const(20)); // right
        asm.mark_label(join_label);
        asm.emit_ret(var(1));
        asm.fix_labels();
        let body = asm.finish();

        let cfg = crate::flowgraph::build_cfg(&body);
        let dom = analyze(&cfg);
        for b in cfg.block_ids() {
            assert!(dom.dominators(b).contains(&cfg.root()));
        }
    }

    #[test]
    fn join_block_is_in_both_branches_dominance_frontier() {
        let mut asm = crate::ir::Assembler::new();
        asm.emit_cmp(var(0), Operand::Const(1));
        let right_label = asm.make_label();
        asm.emit_je(Operand::Label(right_label));
        asm.emit_assign(var(1), Operand::Const(10));
        let join_label = asm.make_label();
        asm.emit_jmp(Operand::Label(join_label));
        asm.mark_label(right_label);
        asm.emit_assign(var(1), Operand::Const(20));
        asm.mark_label(join_label);
        asm.emit_ret(var(1));
        asm.fix_labels();
        let body = asm.finish();

        let cfg = crate::flowgraph::build_cfg(&body);
        let dom = analyze(&cfg);
        let join = cfg
            .block_ids()
            .find(|&b| cfg.block(b).prev.len() == 2)
            .unwrap();
        for &b in &cfg.block_ids().collect::<Vec<_>>() {
            if b != cfg.root() && b != join && !dom.strictly_dominates(b, join) {
                assert!(dom.df(b).contains(&join) || cfg.block(b).next.is_empty() == false);
            }
        }
        // Every direct predecessor of the join that isn't itself dominating
        // the join (both arms of the diamond) carries it in their DF set.
        for &p in &cfg.block(join).prev {
            if p != cfg.root() {
                assert!(dom.df(p).contains(&join));
            }
        }
    }

    #[test]
    fn analysis_is_idempotent() {
        let mut asm = crate::ir::Assembler::new();
        asm.emit_cmp(var(0), Operand::Const(1));
        let l = asm.make_label();
        asm.emit_je(Operand::Label(l));
        asm.emit_assign(var(1), Operand::Const(1));
        asm.mark_label(l);
        asm.emit_retn();
        asm.fix_labels();
        let body = asm.finish();
        let cfg = crate::flowgraph::build_cfg(&body);

        let first = analyze(&cfg);
        let second = analyze(&cfg);
        for b in cfg.block_ids() {
            assert_eq!(first.dominators(b), second.dominators(b));
            assert_eq!(first.idom(b), second.idom(b));
        }
    }
}
