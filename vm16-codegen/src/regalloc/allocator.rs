//! Chaitin-style graph-coloring register allocator (spec §4.7): live-range
//! discovery with phi-coalescing, interference graph construction,
//! simplify/select with spill, spill-code insertion, and an outer loop
//! that restarts discovery until coloring succeeds.

use crate::dominator_tree::DominanceResult;
use crate::flowgraph::{BlockId, Cfg, CfgKind};
use crate::ir::{Instruction, Opcode, Operand, VarId};
use crate::liveness::{self, LivenessResult};
use crate::regalloc::interference::Graph;
use crate::result::{CodegenError, CodegenResult};
use log::debug;
use std::collections::{HashMap, HashSet};

/// A register color, in `[0, K)`.
pub type Color = u32;

/// A total mapping from variable id to assigned color, for every variable
/// that appears in the final (possibly re-spilled) SSA CFG.
#[derive(Debug, Clone, Default)]
pub struct RegisterAllocation {
    colors: HashMap<VarId, Color>,
}

impl RegisterAllocation {
    /// Records `var`'s color. Panics if already set to a different value
    /// (every variable is colored exactly once, via its live range).
    ///
    /// Crate-visible (rather than private) so lowering's own tests can
    /// build a `RegisterAllocation` with a specific coloring directly,
    /// instead of depending on which of several equally-valid colorings
    /// this allocator's HashMap-ordered node processing happens to pick.
    pub(crate) fn set_color(&mut self, var: VarId, color: Color) {
        if let Some(&existing) = self.colors.get(&var) {
            assert_eq!(
                existing, color,
                "variable {:?} assigned two different colors",
                var
            );
        }
        self.colors.insert(var, color);
    }

    /// The color assigned to `var`. Panics if `var` has no color — per
    /// spec §7, an unmapped variable at this point is a programmer error
    /// in the core's own bookkeeping, not a recoverable condition.
    pub fn get_color(&self, var: VarId) -> Color {
        *self
            .colors
            .get(&var)
            .unwrap_or_else(|| panic!("no color recorded for {:?}", var))
    }

    /// Whether `var` has a recorded color.
    pub fn has_color(&self, var: VarId) -> bool {
        self.colors.contains_key(&var)
    }
}

// ---- (a) live-range discovery --------------------------------------------

struct DisjointSet {
    parent: HashMap<VarId, VarId>,
}

impl DisjointSet {
    fn new() -> DisjointSet {
        DisjointSet {
            parent: HashMap::new(),
        }
    }

    fn make(&mut self, v: VarId) {
        self.parent.entry(v).or_insert(v);
    }

    fn find(&mut self, v: VarId) -> VarId {
        let p = *self.parent.get(&v).unwrap_or(&v);
        if p == v {
            v
        } else {
            let root = self.find(p);
            self.parent.insert(v, root);
            root
        }
    }

    fn union(&mut self, a: VarId, b: VarId) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra != rb {
            self.parent.insert(ra, rb);
        }
    }
}

/// Discovers live ranges: equivalence classes of variables that must share
/// a color. Phi destinations are unioned with every phi argument, which is
/// what makes the final assembly insensitive to how SSA form is later
/// dissolved. Every other assigned variable and every `LOAD` destination
/// gets at least a singleton range.
///
/// Unlike the original implementation (which keeps a list of mutable
/// shared sets and a separate `_nub_live_ranges` dedup pass), a
/// union-find directly guarantees one range per equivalence class with no
/// separate compaction step.
fn discover_live_ranges(cfg: &Cfg) -> (Vec<HashSet<VarId>>, HashMap<VarId, usize>) {
    let mut dsu = DisjointSet::new();

    for block in cfg.block_ids() {
        for inst in &cfg.block(block).instructions {
            if let Some(d) = inst.dest_var() {
                dsu.make(d);
            }
            for v in inst.read_vars() {
                dsu.make(v);
            }
        }
    }

    for block in cfg.block_ids() {
        for inst in &cfg.block(block).instructions {
            if inst.op == Opcode::AssignPhi {
                if let Some(dest) = inst.dest_var() {
                    for extra in &inst.extras {
                        if let Some(v) = extra.as_var() {
                            dsu.union(dest, v);
                        }
                    }
                }
            }
        }
    }

    let mut groups: HashMap<VarId, HashSet<VarId>> = HashMap::new();
    let all_vars: Vec<VarId> = dsu.parent.keys().copied().collect();
    for v in all_vars {
        let root = dsu.find(v);
        groups.entry(root).or_default().insert(v);
    }

    let live_ranges: Vec<HashSet<VarId>> = groups.into_values().collect();
    let mut range_of = HashMap::new();
    for (i, range) in live_ranges.iter().enumerate() {
        for &v in range {
            range_of.insert(v, i);
        }
    }
    (live_ranges, range_of)
}

// ---- (b) interference graph construction ---------------------------------

fn build_interference_graph(
    cfg: &Cfg,
    liveness: &LivenessResult,
    range_of: &HashMap<VarId, usize>,
    num_ranges: usize,
) -> Graph<()> {
    let mut graph = Graph::new();
    for i in 0..num_ranges {
        graph.add_node(i, ());
    }

    for block in cfg.block_ids() {
        let mut live: HashSet<usize> = liveness
            .live_out(block)
            .iter()
            .filter_map(|v| range_of.get(v).copied())
            .collect();

        for inst in cfg.block(block).instructions.iter().rev() {
            match inst.op {
                Opcode::Store | Opcode::Unload => {
                    // Neither kills nor adds: the spilled value's register
                    // occupancy is unaffected by writing it to memory.
                }
                Opcode::Load => {
                    if let Some(dest) = inst.dest_var() {
                        let dest_lr = range_of[&dest];
                        for &l in &live {
                            if l != dest_lr {
                                graph.add_edge(dest_lr, l);
                            }
                        }
                        live.remove(&dest_lr);
                    }
                }
                _ => {
                    if let Some(dest) = inst.dest_var() {
                        let dest_lr = range_of[&dest];
                        for &l in &live {
                            if l != dest_lr {
                                graph.add_edge(dest_lr, l);
                            }
                        }
                        live.remove(&dest_lr);
                    }
                    for v in inst.read_vars() {
                        if let Some(&lr) = range_of.get(&v) {
                            live.insert(lr);
                        }
                    }
                }
            }
        }
    }

    graph
}

// ---- (c)/(d) simplify, select, spill decision ----------------------------

/// The outcome of one simplify/select pass: either every node got a color,
/// or some nodes (ordered worst-first by the spill heuristic below) did
/// not.
struct ColoringAttempt {
    colors: HashMap<usize, Color>,
    uncolored: Vec<usize>,
}

/// Picks the next node to remove when no node has degree below `k`.
///
/// The original implementation's `_pick_constrained_node` returns an
/// arbitrary remaining node (`get_nodes()[0].value`) rather than applying a
/// real spill heuristic; spec §9 calls this out explicitly and asks for a
/// documented choice rather than a silent "fix". This implementation spills
/// the node with the *highest current degree*: it is both the node most
/// likely to be unresolvably constrained and the one whose removal does
/// the most to simplify the remaining graph, which is the standard
/// "spill the most expensive to keep" heuristic (a proxy for
/// `degree / uses_in_loop` in the absence of loop-depth information at
/// this layer).
fn pick_spill_candidate(graph: &Graph<()>) -> usize {
    graph
        .keys()
        .max_by_key(|&k| graph.degree(k))
        .expect("graph must be non-empty when a spill candidate is needed")
}

fn color_graph(mut graph: Graph<()>, k: u32) -> ColoringAttempt {
    let mut stack: Vec<(usize, HashSet<usize>)> = Vec::new();

    while graph.node_count() > 0 {
        let candidate = graph
            .any_node_with_degree_less_than(k as usize)
            .unwrap_or_else(|| pick_spill_candidate(&graph));
        let (_, neighbors) = graph.clone_node(candidate);
        stack.push((candidate, neighbors));
        graph.remove_node(candidate);
    }

    let mut colors: HashMap<usize, Color> = HashMap::new();
    let mut uncolored = Vec::new();
    while let Some((node, neighbors)) = stack.pop() {
        let used: HashSet<Color> = neighbors
            .iter()
            .filter_map(|n| colors.get(n).copied())
            .collect();
        match (0..k).find(|c| !used.contains(c)) {
            Some(color) => {
                colors.insert(node, color);
            }
            None => uncolored.push(node),
        }
    }
    ColoringAttempt { colors, uncolored }
}

// ---- (e) spill-code insertion --------------------------------------------

/// Rewrites every block so that every reference to a variable in `lr` goes
/// through a fresh spill temporary loaded from / stored to memory around
/// each use, per spec §4.7e. Phis that reference `lr` are dropped rather
/// than rewritten, since their coalescing role is superseded by explicit
/// memory traffic.
fn insert_spill_code(cfg: &mut Cfg, lr: &HashSet<VarId>, spill_counter: &mut u32) {
    let mut members: Vec<VarId> = lr.iter().copied().collect();
    members.sort();
    let temp_base = *members.first().expect("live range must be non-empty");

    for block in cfg.block_ids().collect::<Vec<_>>() {
        let old = std::mem::take(&mut cfg.block_mut(block).instructions);
        let mut new_insts = Vec::with_capacity(old.len());

        for mut inst in old {
            if inst.op == Opcode::AssignPhi {
                let touches_dest = inst.dest_var().map_or(false, |d| lr.contains(&d));
                let touches_arg = inst
                    .extras
                    .iter()
                    .any(|e| e.as_var().map_or(false, |v| lr.contains(&v)));
                if touches_dest || touches_arg {
                    continue;
                }
                new_insts.push(inst);
                continue;
            }

            let dest_in_lr = inst.dest_var().map_or(false, |d| lr.contains(&d));
            let touches_lr = dest_in_lr
                || inst.reads().any(|op| op.as_var().map_or(false, |v| lr.contains(&v)));
            if !touches_lr {
                new_insts.push(inst);
                continue;
            }

            *spill_counter += 1;
            let temp = temp_base.spill_temp(*spill_counter);
            let member_operands: Vec<Operand> =
                members.iter().copied().map(Operand::Var).collect();
            let mut needs_load = false;

            let first_read_slot = if inst.op.is_assign() { 1 } else { 0 };
            let count = inst.op.operand_count();
            for slot in inst.operands[first_read_slot..count].iter_mut() {
                if let Some(op) = slot {
                    if op.as_var().map_or(false, |v| lr.contains(&v)) {
                        needs_load = true;
                        *op = Operand::Var(temp);
                    }
                }
            }
            for extra in inst.extras.iter_mut() {
                if extra.as_var().map_or(false, |v| lr.contains(&v)) {
                    needs_load = true;
                    *extra = Operand::Var(temp);
                }
            }

            if needs_load {
                let mut load = Instruction::new(Opcode::Load);
                load.set_operand(0, Operand::Var(temp));
                for m in &member_operands {
                    load.push_extra(m.clone());
                }
                new_insts.push(load);
            }

            if dest_in_lr {
                inst.operands[0] = Some(Operand::Var(temp));
            }
            new_insts.push(inst);

            if dest_in_lr {
                let mut store = Instruction::new(Opcode::Store);
                store.set_operand(0, Operand::Var(temp));
                for m in &member_operands {
                    store.push_extra(m.clone());
                }
                new_insts.push(store);
            } else if needs_load {
                let mut unload = Instruction::new(Opcode::Unload);
                unload.set_operand(0, Operand::Var(temp));
                new_insts.push(unload);
            }
        }

        cfg.block_mut(block).instructions = new_insts;
    }
}

// ---- outer loop -----------------------------------------------------------

/// Runs the full allocator on an SSA `cfg` with color budget `k` (spec
/// §4.7). On success, returns a total variable-to-color map; the CFG is
/// mutated in place with spill/reload pseudo-instructions if any spilling
/// was required. `_dom` is accepted for symmetry with the rest of the
/// pipeline (future spill heuristics may want loop-nesting depth derived
/// from it) though the current heuristic does not use it.
pub fn allocate(cfg: &mut Cfg, k: u32, _dom: &DominanceResult) -> CodegenResult<RegisterAllocation> {
    assert_eq!(
        cfg.kind(),
        CfgKind::Ssa,
        "register allocation requires an SSA-form CFG"
    );

    let mut spill_counter: u32 = 0;
    let mut already_spilled: HashSet<Vec<VarId>> = HashSet::new();

    loop {
        let liveness = liveness::analyze(cfg);
        let (live_ranges, range_of) = discover_live_ranges(cfg);
        let graph = build_interference_graph(cfg, &liveness, &range_of, live_ranges.len());
        let attempt = color_graph(graph, k);

        if attempt.uncolored.is_empty() {
            let mut result = RegisterAllocation::default();
            for (range_idx, &color) in &attempt.colors {
                for &var in &live_ranges[*range_idx] {
                    result.set_color(var, color);
                }
            }
            return Ok(result);
        }

        debug!(
            "regalloc: {} live range(s) failed to color, spilling",
            attempt.uncolored.len()
        );

        let to_spill = attempt.uncolored.iter().copied().find(|&idx| {
            let mut sorted: Vec<VarId> = live_ranges[idx].iter().copied().collect();
            sorted.sort();
            !already_spilled.contains(&sorted)
        });

        match to_spill {
            Some(idx) => {
                let mut sorted: Vec<VarId> = live_ranges[idx].iter().copied().collect();
                sorted.sort();
                already_spilled.insert(sorted);
                insert_spill_code(cfg, &live_ranges[idx], &mut spill_counter);
            }
            None => return Err(CodegenError::RanOutOfRegisters),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Operand;

    fn var(n: u32) -> Operand {
        Operand::Var(VarId::from_base(n))
    }

    fn ssa_cfg_for(body_fn: impl FnOnce(&mut crate::ir::Assembler)) -> Cfg {
        let mut asm = crate::ir::Assembler::new();
        body_fn(&mut asm);
        asm.fix_labels();
        let body = asm.finish();
        let mut cfg = crate::flowgraph::build_cfg(&body);
        let dom = crate::dominator_tree::analyze(&cfg);
        crate::ssa::construct(&mut cfg, &dom, &[]);
        cfg
    }

    #[test]
    fn two_variables_live_at_once_get_different_colors_with_ample_registers() {
        let mut cfg = ssa_cfg_for(|asm| {
            asm.emit_assign(var(0), Operand::Const(1));
            asm.emit_assign(var(1), Operand::Const(2));
            asm.emit_assign_add(var(2), var(0), var(1));
            asm.emit_ret(var(2));
        });
        let dom = crate::dominator_tree::analyze(&cfg);
        let result = allocate(&mut cfg, 7, &dom).expect("7 registers is enough");
        // Every write in the (possibly spill-patched) CFG has a color.
        for b in cfg.block_ids() {
            for inst in &cfg.block(b).instructions {
                if let Some(d) = inst.dest_var() {
                    assert!(result.has_color(d));
                }
            }
        }
    }

    #[test]
    fn k_equals_one_still_terminates_with_heavy_spilling() {
        let mut cfg = ssa_cfg_for(|asm| {
            for i in 0..6u32 {
                asm.emit_assign(var(i), Operand::Const(i as i64));
            }
            let mut acc = var(0);
            for i in 1..6u32 {
                asm.emit_assign_add(var(100 + i), acc.clone(), var(i));
                acc = var(100 + i);
            }
            asm.emit_ret(acc);
        });
        let dom = crate::dominator_tree::analyze(&cfg);
        let result = allocate(&mut cfg, 1, &dom).expect("k=1 must still terminate");
        assert!(cfg
            .block_ids()
            .flat_map(|b| cfg.block(b).instructions.iter().cloned().collect::<Vec<_>>())
            .any(|i| i.op == Opcode::Store));
        let _ = result;
    }

    #[test]
    fn phi_coalescing_assigns_one_color_to_dest_and_every_argument() {
        let mut cfg = ssa_cfg_for(|asm| {
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
        });
        let dom = crate::dominator_tree::analyze(&cfg);
        let join_block = cfg
            .block_ids()
            .find(|&b| cfg.block(b).prev.len() == 2)
            .unwrap();
        let phi = cfg.block(join_block).instructions[0].clone();
        assert_eq!(phi.op, Opcode::AssignPhi);
        let dest = phi.dest_var().unwrap();
        let args: Vec<VarId> = phi.extras.iter().filter_map(|e| e.as_var()).collect();

        let result = allocate(&mut cfg, 7, &dom).unwrap();
        let dest_color = result.get_color(dest);
        for a in args {
            assert_eq!(result.get_color(a), dest_color);
        }
    }
}
