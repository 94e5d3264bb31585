//! Control-flow graph construction (leader detection) and the `Cfg`/
//! `BasicBlock` types that every later pass operates on.
//!
//! Blocks are kept in an insertion-ordered [`PrimaryMap`] keyed by
//! [`BlockId`]; predecessor and successor lists hold ids rather than owning
//! references, so the owned object graph (CFG -> blocks -> instructions ->
//! operands) has no cycles, matching the arena-plus-index style the
//! dominance, liveness and SSA passes below all rely on for stable
//! iteration order.

use crate::entity::{entity_impl, PrimaryMap};
use crate::ir::{Instruction, Opcode, Operand};
use core::fmt;

/// An opaque reference to a basic block, stable across the lifetime of its
/// owning [`Cfg`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(u32);
entity_impl!(BlockId);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "_blk{}", self.0)
    }
}

/// A maximal straight-line run of instructions with one entry and one
/// exit.
#[derive(Debug, Clone)]
pub struct BasicBlock {
    id: BlockId,
    /// The block's own instructions, in order.
    pub instructions: Vec<Instruction>,
    /// Predecessor blocks, in the stable order their edges were added —
    /// phi-argument indexing and the caller-save forward walk both depend
    /// on this order being insertion order, not hash order.
    pub prev: Vec<BlockId>,
    /// Successor blocks, in the order branches/fallthrough were linked.
    pub next: Vec<BlockId>,
    /// The index in the original linear instruction stream this block's
    /// first instruction came from, kept only for pretty-printing.
    pub base: Option<usize>,
}

impl BasicBlock {
    fn new(id: BlockId) -> BasicBlock {
        BasicBlock {
            id,
            instructions: Vec::new(),
            prev: Vec::new(),
            next: Vec::new(),
            base: None,
        }
    }

    /// This block's own id.
    pub fn id(&self) -> BlockId {
        self.id
    }

    /// The index of `pred` in this block's predecessor list, used to pick
    /// out the matching phi argument (spec §4.5 step 3 and §8's phi
    /// discipline invariant).
    pub fn predecessor_index(&self, pred: BlockId) -> Option<usize> {
        self.prev.iter().position(|&p| p == pred)
    }
}

/// Whether a CFG's instructions are still in normal (non-SSA) form or have
/// been through SSA construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CfgKind {
    /// Branch operands are `BlockRef`s but variables are not yet versioned.
    Normal,
    /// Every variable id has been renamed to a unique (base, subscript)
    /// pair and phi functions have been inserted at join points.
    Ssa,
}

/// A control-flow graph: an insertion-ordered collection of basic blocks
/// plus the entry block id.
pub struct Cfg {
    kind: CfgKind,
    root: BlockId,
    blocks: PrimaryMap<BlockId, BasicBlock>,
}

impl Cfg {
    /// This CFG's form.
    pub fn kind(&self) -> CfgKind {
        self.kind
    }

    /// Marks this CFG as SSA-form. Called once by the SSA builder after
    /// phi placement and renaming both complete.
    pub fn set_ssa(&mut self) {
        self.kind = CfgKind::Ssa;
    }

    /// The entry block.
    pub fn root(&self) -> BlockId {
        self.root
    }

    /// Looks up a block by id.
    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id]
    }

    /// Mutably looks up a block by id.
    pub fn block_mut(&mut self, id: BlockId) -> &mut BasicBlock {
        &mut self.blocks[id]
    }

    /// Iterates over every block id, in insertion order.
    pub fn block_ids(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.blocks.keys()
    }

    /// The number of blocks in this CFG.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Whether this CFG has no blocks (never true for a CFG built by
    /// `build_cfg`, which always produces at least a root; exposed for
    /// generic callers).
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    fn add_edge(&mut self, from: BlockId, to: BlockId) {
        self.blocks[from].next.push(to);
        self.blocks[to].prev.push(from);
    }

    /// Checks the CFG well-formedness invariant from spec §8: for every
    /// block B and every S in `next(B)`, B is in `prev(S)`.
    pub fn is_well_formed(&self) -> bool {
        for (id, block) in self.blocks.iter() {
            for &succ in &block.next {
                if !self.blocks[succ].prev.contains(&id) {
                    return false;
                }
            }
        }
        true
    }
}

/// Builds a `Normal`-form CFG from a front end's linear instruction list
/// via leader detection (spec §4.1).
///
/// 1. Mark leaders: index 0; every index immediately after a branch or
///    return; the target index of each branch.
/// 2. Form basic blocks: each maximal run starting at a leader becomes one
///    block, in traversal order.
/// 3. Link successors, rewriting branch operand 0 from `Offset` to
///    `BlockRef` and recording fallthrough edges for blocks that don't end
///    in an unconditional jump or return.
///
/// A branch target that does not land on a leader is a front-end bug and
/// is asserted against rather than reported, per spec §4.1's "errors: none
/// at design level" and §7's programmer-error bucket.
pub fn build_cfg(body: &[Instruction]) -> Cfg {
    let mut blocks = PrimaryMap::new();

    if body.is_empty() {
        let root = blocks.push(BasicBlock::new(BlockId::new(0)));
        return Cfg {
            kind: CfgKind::Normal,
            root,
            blocks,
        };
    }

    // Step 1: leaders.
    let mut is_leader = vec![false; body.len()];
    is_leader[0] = true;
    for (i, inst) in body.iter().enumerate() {
        if inst.op.is_branch() || inst.op.is_terminator() {
            if i + 1 < body.len() {
                is_leader[i + 1] = true;
            }
            if inst.op.is_branch() {
                if let Some(Operand::Offset(delta)) = inst.operand(0) {
                    let target = i as i64 + 1 + delta;
                    assert!(
                        target >= 0 && (target as usize) < body.len(),
                        "branch target {} out of range at instruction {}",
                        target,
                        i
                    );
                    is_leader[target as usize] = true;
                }
            }
        }
    }

    // Step 2: form blocks, recording which leader index starts each block.
    let mut leader_indices = Vec::new();
    for (i, &leader) in is_leader.iter().enumerate() {
        if leader {
            leader_indices.push(i);
        }
    }

    let mut index_to_block = std::collections::HashMap::new();
    for (order, &start) in leader_indices.iter().enumerate() {
        let id = BlockId::new(order as u32);
        index_to_block.insert(start, id);
        let mut block = BasicBlock::new(id);
        block.base = Some(start);
        let end = leader_indices
            .get(order + 1)
            .copied()
            .unwrap_or(body.len());
        block.instructions = body[start..end].to_vec();
        let pushed = blocks.push(block);
        debug_assert_eq!(pushed, id);
    }

    let root = BlockId::new(0);
    let mut cfg = Cfg {
        kind: CfgKind::Normal,
        root,
        blocks,
    };

    // Step 3: link edges, rewriting branch operands in place.
    for (order, &start) in leader_indices.iter().enumerate() {
        let end = leader_indices
            .get(order + 1)
            .copied()
            .unwrap_or(body.len());
        let this_id = BlockId::new(order as u32);
        let last_inst_global_idx = end - 1;
        let last_op = body[last_inst_global_idx].op;

        if last_op.is_branch() {
            let delta = match body[last_inst_global_idx].operand(0) {
                Some(Operand::Offset(d)) => *d,
                other => panic!("branch instruction missing Offset operand: {:?}", other),
            };
            let target_idx = (last_inst_global_idx as i64 + 1 + delta) as usize;
            let target_block = *index_to_block
                .get(&target_idx)
                .expect("branch target must be a leader");
            cfg.add_edge(this_id, target_block);
            let local_last = cfg.blocks[this_id].instructions.len() - 1;
            cfg.blocks[this_id].instructions[local_last].operands[0] =
                Some(Operand::BlockRef(target_block));
        }

        if last_op.falls_through() {
            if let Some(&next_start) = leader_indices.get(order + 1) {
                let fallthrough_block = *index_to_block.get(&next_start).unwrap();
                cfg.add_edge(this_id, fallthrough_block);
            }
        }
    }

    cfg
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::VarId;

    fn var(n: u32) -> Operand {
        Operand::Var(VarId::from_base(n))
    }

    #[test]
    fn empty_body_yields_single_empty_root() {
        let cfg = build_cfg(&[]);
        assert_eq!(cfg.len(), 1);
        assert!(cfg.block(cfg.root()).instructions.is_empty());
    }

    #[test]
    fn straight_line_program_is_one_block() {
        let mut asm = crate::ir::Assembler::new();
        asm.emit_assign(var(0), crate::ir::Operand::Const(1));
        asm.emit_assign(var(1), crate::ir::Operand::Const(2));
        asm.emit_retn();
        let body = asm.finish();
        let cfg = build_cfg(&body);
        assert_eq!(cfg.len(), 1);
        assert_eq!(cfg.block(cfg.root()).instructions.len(), 3);
    }

    #[test]
    fn branch_splits_into_blocks_and_is_well_formed() {
        let mut asm = crate::ir::Assembler::new();
        asm.emit_cmp(var(0), crate::ir::Operand::Const(1));
        let label = asm.make_label();
        asm.emit_je(Operand::Label(label));
        asm.emit_assign(var(1), crate::ir::Operand::Const(0));
        asm.emit_retn();
        asm.mark_label(label);
        asm.emit_assign(var(1), crate::ir::Operand::Const(1));
        asm.emit_retn();
        asm.fix_labels();
        let body = asm.finish();

        let cfg = build_cfg(&body);
        assert!(cfg.is_well_formed());
        assert_eq!(cfg.len(), 3);
        // Block 0 falls through to block 1 and branches to block 2.
        assert_eq!(cfg.block(cfg.root()).next.len(), 2);
    }

    #[test]
    fn loop_header_has_two_predecessors_in_stable_order() {
        // preheader -> header -> body -> header (back edge), header -> exit
        let mut asm = crate::ir::Assembler::new();
        asm.emit_assign(var(0), crate::ir::Operand::Const(0)); // preheader
        let header = asm.make_and_mark_label();
        asm.emit_cmp(var(0), var(1));
        let exit_label = asm.make_label();
        asm.emit_jge(Operand::Label(exit_label));
        asm.emit_assign_add(var(0), var(0), crate::ir::Operand::Const(1)); // body
        asm.emit_jmp(Operand::Label(header));
        asm.mark_label(exit_label);
        asm.emit_retn();
        asm.fix_labels();
        let body = asm.finish();

        let cfg = build_cfg(&body);
        assert!(cfg.is_well_formed());
        // Find the header block: the one with two predecessors.
        let header_block = cfg
            .block_ids()
            .find(|&id| cfg.block(id).prev.len() == 2)
            .expect("expected a join block");
        assert_eq!(cfg.block(header_block).prev.len(), 2);
    }
}
