//! Offline pointer-equivalence optimization (hash-based unification).
//!
//! Before the expensive flow-sensitive phases run, top-level values that
//! provably have identical points-to sets are merged. Every value gets a
//! label: a bitset seeded by its address-of constraints and propagated
//! along copy edges; loads and field offsets contribute fresh opaque bits
//! since their targets aren't known offline. Values with identical
//! non-empty labels collapse into one representative; values with empty
//! labels are not pointers at all and their constraints are deleted.
//! Objects are never merged.

use crate::bitset::SparseBitSet;
use crate::constraint::{ConstraintGraph, ConstraintId, ConstraintKind};
use crate::entity::EntityRef;
use crate::objects::{ObjectId, ObjectMap};
use crate::seg::{Seg, SegNode};
use log::debug;
use std::collections::BTreeMap;

/// An opaque reference to a node of the label graph.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HuId(u32);
entity_impl!(HuId, "hu");

#[derive(Clone, Default)]
struct HuNode {
    label: SparseBitSet,
}

impl SegNode for HuNode {
    fn unite(&mut self, other: Self) {
        self.label.union_with(&other.label);
    }
}

/// Run the optimization over `cg`, recording merges in `omap`'s
/// representative table and rewriting the constraints accordingly.
pub fn optimize(cg: &mut ConstraintGraph, omap: &mut ObjectMap) {
    let before = cg.len();

    // One label node per issued id; copy edges run source → destination.
    let mut g: Seg<HuId, HuNode> = Seg::new();
    for _ in 0..omap.len() {
        g.add_node(HuNode::default());
    }
    let hu = |id: ObjectId| HuId::new(id.index());

    // Fresh opaque bits live above the id space.
    let mut next_token = omap.len() as u32;

    for (_, c) in cg.iter() {
        match c.kind {
            ConstraintKind::AddrOf => {
                g.node_mut(hu(c.dst)).label.insert(c.src.as_u32());
            }
            ConstraintKind::Copy => {
                g.add_edge(hu(c.src), hu(c.dst));
            }
            ConstraintKind::Gep | ConstraintKind::Load => {
                g.node_mut(hu(c.dst)).label.insert(next_token);
                next_token += 1;
            }
            ConstraintKind::Store => {}
        }
    }

    // Copy cycles share one label; then a topological sweep pushes labels
    // through the remaining DAG.
    g.create_scc();
    for id in g.topo() {
        for p in g.pred_reps(id) {
            let plabel = g.node(p).label.clone();
            g.node_mut(id).label.union_with(&plabel);
        }
    }

    // Group values by label. Objects and synthetics stay untouched.
    let mut groups: BTreeMap<SparseBitSet, ObjectId> = BTreeMap::new();
    let mut dead = SparseBitSet::new();
    for idx in 0..omap.len() {
        let id = ObjectId::new(idx);
        if id.is_special() || omap.is_object(id) {
            continue;
        }
        let label = &g.node(hu(id)).label;
        if label.is_empty() {
            // Pinned values may still receive definitions from call
            // resolution; an empty label does not retire them.
            if !omap.is_pinned(id) {
                dead.insert(id.as_u32());
            }
            continue;
        }
        match groups.get(label) {
            Some(&rep) => omap.merge_into(rep, id),
            None => {
                groups.insert(label.clone(), id);
            }
        }
    }

    cg.rewrite_and_dedup(|id| omap.rep(id));

    // Drop constraints touching non-pointer values, and copies that became
    // self-assignments through merging.
    let remove: Vec<ConstraintId> = cg
        .iter()
        .filter(|(_, c)| match c.kind {
            ConstraintKind::AddrOf => false,
            ConstraintKind::Copy => {
                dead.contains(c.dst.as_u32())
                    || dead.contains(c.src.as_u32())
                    || c.dst == c.src
            }
            ConstraintKind::Gep | ConstraintKind::Load | ConstraintKind::Store => {
                dead.contains(c.dst.as_u32()) || dead.contains(c.src.as_u32())
            }
        })
        .map(|(id, _)| id)
        .collect();
    for id in remove {
        cg.remove(id);
    }

    debug!(
        "HU: {} constraints -> {}, {} merged groups, {} non-pointer values",
        before,
        cg.len(),
        groups.len(),
        dead.len()
    );
}
