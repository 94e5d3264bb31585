//! Generic iterative worklist/fixed-point data-flow framework (spec §4.2).
//!
//! Implementors provide `init_fragment` and `transfer`; the driver
//! initializes every block's fragment, then repeatedly sweeps blocks in
//! insertion order until a full pass makes no changes. Termination relies
//! on the transfer function being monotone over a finite lattice, which
//! holds for every analysis built on top of this (dominator sets under
//! intersection, live sets under union — both bounded by the finite set of
//! block ids / variable ids in the procedure).

use crate::flowgraph::{BlockId, Cfg};
use log::trace;

/// A per-block analysis fragment plus the transfer function that updates
/// it from its neighbors.
pub trait DataflowAnalysis {
    /// The value tracked per block (a dominator set, a live-out set, ...).
    type Fragment;

    /// The fragment value for `block` before any iteration.
    fn init_fragment(&self, cfg: &Cfg, block: BlockId) -> Self::Fragment;

    /// Recomputes `fragment` in place from its neighbors' current
    /// fragments (looked up via `get`); returns whether it changed.
    fn transfer(
        &self,
        cfg: &Cfg,
        block: BlockId,
        fragment: &mut Self::Fragment,
        get: &dyn Fn(BlockId) -> &Self::Fragment,
    ) -> bool;
}

/// Runs `analysis` to a fixed point over every block of `cfg`, returning
/// the final fragment for each block in insertion order.
pub fn solve<A: DataflowAnalysis>(
    cfg: &Cfg,
    analysis: &A,
) -> std::collections::HashMap<BlockId, A::Fragment> {
    let mut fragments: std::collections::HashMap<BlockId, A::Fragment> = cfg
        .block_ids()
        .map(|id| (id, analysis.init_fragment(cfg, id)))
        .collect();

    let mut pass = 0;
    loop {
        pass += 1;
        let mut changed_any = false;
        for id in cfg.block_ids() {
            // Take the fragment out so we can hand the rest of the map to
            // `transfer` as a read-only neighbor lookup without aliasing
            // the entry being updated.
            let mut fragment = fragments.remove(&id).expect("fragment must exist");
            let get = |b: BlockId| fragments.get(&b).expect("neighbor fragment must exist");
            let changed = analysis.transfer(cfg, id, &mut fragment, &get);
            fragments.insert(id, fragment);
            changed_any |= changed;
        }
        trace!("dataflow pass {} changed={}", pass, changed_any);
        if !changed_any {
            break;
        }
    }
    fragments
}
