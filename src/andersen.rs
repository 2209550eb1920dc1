//! The auxiliary flow-insensitive solver.
//!
//! A classic inclusion-based (Andersen-style) worklist over the same
//! constraint graph the flow-sensitive phases consume. The result is an
//! over-approximation used exactly twice: to resolve indirect call targets
//! before the condensation, and to bound the objects each load and store
//! may access when partitioning. It is released as soon as partitioning is
//! done.

use crate::constraint::{ConstraintGraph, ConstraintKind};
use crate::objects::{ObjectId, ObjectMap};
use crate::ptsto::PtstoSet;
use crate::timing;
use log::debug;
use std::collections::{HashMap, HashSet, VecDeque};

/// Over-approximate points-to results, as the later phases consume them.
pub trait AuxPtsto {
    /// The set `id` may point to, or `None` when `id` is never assigned.
    fn points_to(&self, id: ObjectId) -> Option<&PtstoSet>;
}

/// The solved flow-insensitive points-to map.
pub struct AndersenSolution {
    pts: HashMap<ObjectId, PtstoSet>,
}

impl AuxPtsto for AndersenSolution {
    fn points_to(&self, id: ObjectId) -> Option<&PtstoSet> {
        self.pts.get(&id)
    }
}

/// Solve the constraint graph flow-insensitively.
pub fn solve(cg: &ConstraintGraph, omap: &ObjectMap) -> AndersenSolution {
    let _tt = timing::andersen();
    let structs = omap.struct_info();

    let mut pts: HashMap<ObjectId, PtstoSet> = HashMap::new();
    let mut edges: HashMap<ObjectId, Vec<(ObjectId, u32)>> = HashMap::new();
    let mut edge_set: HashSet<(ObjectId, ObjectId, u32)> = HashSet::new();
    let mut loads: HashMap<ObjectId, Vec<ObjectId>> = HashMap::new();
    let mut stores: HashMap<ObjectId, Vec<ObjectId>> = HashMap::new();

    let mut worklist: VecDeque<ObjectId> = VecDeque::new();
    let mut on_queue: HashSet<ObjectId> = HashSet::new();
    let push = |wl: &mut VecDeque<ObjectId>, oq: &mut HashSet<ObjectId>, id: ObjectId| {
        if oq.insert(id) {
            wl.push_back(id);
        }
    };

    for (_, c) in cg.iter() {
        match c.kind {
            ConstraintKind::AddrOf => {
                pts.entry(c.dst).or_insert_with(PtstoSet::new).set(c.src);
                push(&mut worklist, &mut on_queue, c.dst);
            }
            ConstraintKind::Copy => {
                if edge_set.insert((c.src, c.dst, 0)) {
                    edges.entry(c.src).or_insert_with(Vec::new).push((c.dst, 0));
                    push(&mut worklist, &mut on_queue, c.src);
                }
            }
            ConstraintKind::Gep => {
                if edge_set.insert((c.src, c.dst, c.offs)) {
                    edges
                        .entry(c.src)
                        .or_insert_with(Vec::new)
                        .push((c.dst, c.offs));
                    push(&mut worklist, &mut on_queue, c.src);
                }
            }
            ConstraintKind::Load => {
                loads.entry(c.src).or_insert_with(Vec::new).push(c.dst);
                push(&mut worklist, &mut on_queue, c.src);
            }
            ConstraintKind::Store => {
                stores.entry(c.dst).or_insert_with(Vec::new).push(c.src);
                push(&mut worklist, &mut on_queue, c.dst);
            }
        }
    }

    let mut iterations = 0usize;
    while let Some(n) = worklist.pop_front() {
        on_queue.remove(&n);
        iterations += 1;
        let n_pts = match pts.get(&n) {
            Some(set) => set.clone(),
            None => continue,
        };

        // Loads through n read every object n may point to.
        if let Some(dsts) = loads.get(&n) {
            for &d in dsts {
                for o in n_pts.iter() {
                    if edge_set.insert((o, d, 0)) {
                        edges.entry(o).or_insert_with(Vec::new).push((d, 0));
                        push(&mut worklist, &mut on_queue, o);
                    }
                }
            }
        }
        // Stores through n write every object n may point to.
        if let Some(srcs) = stores.get(&n) {
            for &s in srcs {
                for o in n_pts.iter() {
                    if edge_set.insert((s, o, 0)) {
                        edges.entry(s).or_insert_with(Vec::new).push((o, 0));
                        push(&mut worklist, &mut on_queue, s);
                    }
                }
            }
        }
        // Propagate along the copy edges.
        if let Some(out) = edges.get(&n) {
            let out = out.clone();
            for (d, offs) in out {
                let changed = pts
                    .entry(d)
                    .or_insert_with(PtstoSet::new)
                    .or_offs(&n_pts, offs, &structs);
                if changed {
                    push(&mut worklist, &mut on_queue, d);
                }
            }
        }
    }

    debug!(
        "andersen: {} iterations, {} tracked ids",
        iterations,
        pts.len()
    );
    AndersenSolution { pts }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::Cfg;
    use crate::entity::EntityRef;
    use crate::ir;
    use crate::objects::AllocKind;

    fn value(omap: &mut ObjectMap, n: usize, name: &str) -> ObjectId {
        omap.get_or_make_value(ir::Value::new(n), name)
    }

    #[test]
    fn copies_propagate() {
        let mut omap = ObjectMap::new();
        let mut cg = ConstraintGraph::new();
        let p = value(&mut omap, 0, "p");
        let q = value(&mut omap, 1, "q");
        let o = omap.make_object(ir::Value::new(2), AllocKind::Stack, 1, "o");

        cg.add_addr_of(p, o);
        cg.add_copy(q, p);

        let sol = solve(&cg, &omap);
        assert!(sol.points_to(q).unwrap().contains(o));
    }

    #[test]
    fn loads_and_stores_flow_through_memory() {
        let mut omap = ObjectMap::new();
        let mut cg = ConstraintGraph::new();
        let p = value(&mut omap, 0, "p");
        let q = value(&mut omap, 1, "q");
        let r = value(&mut omap, 2, "r");
        let slot = omap.make_object(ir::Value::new(3), AllocKind::Stack, 1, "slot");
        let o = omap.make_object(ir::Value::new(4), AllocKind::Stack, 1, "x");

        let node = Cfg::new().init;
        // p = &slot; q = &x; *p = q; r = *p.
        cg.add_addr_of(p, slot);
        cg.add_addr_of(q, o);
        cg.add_store(p, q, node);
        cg.add_load(r, p, node);

        let sol = solve(&cg, &omap);
        assert!(sol.points_to(slot).unwrap().contains(o));
        assert!(sol.points_to(r).unwrap().contains(o));
    }

    #[test]
    fn gep_offsets_fields() {
        let mut omap = ObjectMap::new();
        let mut cg = ConstraintGraph::new();
        let s = value(&mut omap, 0, "s");
        let f = value(&mut omap, 1, "f");
        let obj = omap.make_object(ir::Value::new(2), AllocKind::Stack, 3, "agg");

        cg.add_addr_of(s, obj);
        cg.add_gep(f, s, 2);

        let sol = solve(&cg, &omap);
        assert!(sol.points_to(f).unwrap().contains(obj.offset(2)));
        assert!(!sol.points_to(f).unwrap().contains(obj));
    }
}
