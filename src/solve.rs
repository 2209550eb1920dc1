//! The worklist fixed-point solver.
//!
//! A FIFO worklist with an on-queue bitset suppressing duplicate enqueues
//! drives per-node transfer functions over the def-use graph. Top-level
//! state lives in one `TopLevelPtsto`; address-taken state lives in the
//! nodes' own graphs and is pushed producer → consumer along the
//! address-taken edges. All sets grow monotonically over finite lattices,
//! which is what terminates the loop. A re-popped node whose inputs did
//! not change is cheap: transfers read current state and report no change.

pub use crate::andersen::AuxPtsto;
use crate::bitset::SparseBitSet;
use crate::dug::{Dug, DugId, DugKind};
use crate::objects::{ObjectId, ObjectMap};
use crate::ptsto::{PtstoSet, TopLevelPtsto};
use crate::timing;
use log::info;
use std::collections::{BTreeMap, VecDeque};

// FIFO plus an on-queue filter. A priority queue would converge faster and
// can drop in here.
struct Worklist {
    q: VecDeque<DugId>,
    on_queue: SparseBitSet,
}

impl Worklist {
    fn new() -> Self {
        Self {
            q: VecDeque::new(),
            on_queue: SparseBitSet::new(),
        }
    }

    fn push(&mut self, id: DugId) {
        if self.on_queue.insert(id.as_u32()) {
            self.q.push_back(id);
        }
    }

    fn pop(&mut self) -> Option<DugId> {
        let id = self.q.pop_front()?;
        self.on_queue.remove(id.as_u32());
        Some(id)
    }
}

/// The solved points-to state.
pub struct Solution {
    /// Top-level sets per value, indexed by field offset.
    pub pts_top: TopLevelPtsto,
    /// What each object element may hold: the union of everything ever
    /// stored into it. Backs queries on object ids.
    pub mem: BTreeMap<ObjectId, PtstoSet>,
}

/// The solver: owns the mutable points-to state, borrows the graph.
pub struct Solver<'a> {
    dug: &'a mut Dug,
    omap: &'a ObjectMap,
    pts_top: TopLevelPtsto,
    mem: BTreeMap<ObjectId, PtstoSet>,
}

impl<'a> Solver<'a> {
    /// Create a solver over `dug`.
    pub fn new(dug: &'a mut Dug, omap: &'a ObjectMap) -> Self {
        Self {
            dug,
            omap,
            pts_top: TopLevelPtsto::new(),
            mem: BTreeMap::new(),
        }
    }

    /// Run to a fixed point. Returns the number of transfers that changed
    /// anything; on an already-solved graph that is zero.
    pub fn solve(&mut self) -> usize {
        let _tt = timing::solve();
        let mut wl = Worklist::new();
        for id in self.dug.ids() {
            wl.push(id);
        }

        let structs = self.dug.structs.clone();
        let mut changes = 0usize;
        while let Some(n) = wl.pop() {
            let changed = match self.dug.node(n).kind.clone() {
                DugKind::AddrOf { dst, obj } => {
                    let changed = self.pts_top.at(dst, 0).set(obj);
                    if changed {
                        self.push_top_succs(n, &mut wl);
                    }
                    changed
                }
                DugKind::Copy { dst, src, offs } => {
                    let src_set = self.top_set(src);
                    let changed = self.pts_top.at(dst, 0).or_offs(&src_set, offs, &structs);
                    if changed {
                        self.push_top_succs(n, &mut wl);
                    }
                    changed
                }
                DugKind::Load { dst, src, .. } => {
                    let ptr = self.top_set(src);
                    let mut changed = false;
                    {
                        let input = &self.dug.node(n).input;
                        let dst_set = self.pts_top.at(dst, 0);
                        for o in ptr.iter() {
                            if o == ObjectId::UNIVERSAL_VALUE {
                                // Loading through an unbounded pointer
                                // yields the unbounded value.
                                changed |= dst_set.set(ObjectId::UNIVERSAL_VALUE);
                                continue;
                            }
                            if let Some(s) = input.get(o) {
                                changed |= dst_set.or(s);
                            }
                        }
                    }
                    if changed {
                        self.push_top_succs(n, &mut wl);
                    }
                    changed
                }
                DugKind::Store { dst, src, .. } => {
                    let ptr = self.top_set(dst);
                    let val = self.top_set(src);
                    let changed = self.transfer_store(n, &ptr, &val);
                    if changed {
                        self.propagate(n, false, &mut wl);
                    }
                    changed
                }
                DugKind::Phi { .. } => {
                    self.propagate(n, true, &mut wl);
                    false
                }
            };
            if changed {
                changes += 1;
            }
        }

        self.log_statistics();
        changes
    }

    /// Consume the solver, yielding the final state.
    pub fn finish(self) -> Solution {
        Solution {
            pts_top: self.pts_top,
            mem: self.mem,
        }
    }

    fn top_set(&self, id: ObjectId) -> PtstoSet {
        self.pts_top.get(id, 0).cloned().unwrap_or_default()
    }

    fn push_top_succs(&self, n: DugId, wl: &mut Worklist) {
        for &s in &self.dug.node(n).top_succs {
            wl.push(s);
        }
    }

    // out = in, except that the stored value replaces (singleton pointer to
    // a strong-update-eligible object) or joins (everything else) the
    // contents of the written objects.
    fn transfer_store(&mut self, n: DugId, ptr: &PtstoSet, val: &PtstoSet) -> bool {
        let mut out = self.dug.take_output(n);
        let mut changed = false;
        {
            let input = &self.dug.node(n).input;
            let strong_target = if ptr.len() == 1 {
                // `out.get` tests membership in this node's partition
                // domain, not whether the slot already has contents.
                ptr.iter().next().filter(|&o| {
                    self.omap.strong_update_ok(o) && out.get(o).is_some()
                })
            } else {
                None
            };
            match strong_target {
                Some(o) => {
                    changed |= out.or_except(input, o);
                    changed |= out.assign_element(o, val);
                    self.mem.entry(o).or_insert_with(PtstoSet::new).or(val);
                }
                None => {
                    changed |= out.or_graph(input);
                    for o in ptr.iter() {
                        if o == ObjectId::UNIVERSAL_VALUE {
                            continue;
                        }
                        changed |= out.or_element(o, val);
                        if out.get(o).is_some() {
                            self.mem.entry(o).or_insert_with(PtstoSet::new).or(val);
                        }
                    }
                }
            }
        }
        self.dug.replace_output(n, out);
        changed
    }

    // Push a node's outgoing address-taken state into its successors'
    // inputs, restricted to each receiver's partition. Phis forward their
    // input; stores forward their output.
    fn propagate(&mut self, n: DugId, from_input: bool, wl: &mut Worklist) {
        let state = if from_input {
            self.dug.take_input(n)
        } else {
            self.dug.take_output(n)
        };
        let succs = self.dug.node(n).at_succs.clone();
        for succ in succs {
            let part = match &self.dug.node(succ).kind {
                DugKind::Load { part, .. } | DugKind::Store { part, .. } => *part,
                DugKind::Phi { part } => Some(*part),
                _ => None,
            };
            let mut si = self.dug.take_input(succ);
            let changed = match part {
                Some(part) => si.or_part(&state, &self.dug.parts, part),
                // A receiver the partitioner never reached has an empty
                // domain; the plain union is a no-op there.
                None => si.or_graph(&state),
            };
            self.dug.replace_input(succ, si);
            if changed {
                wl.push(succ);
            }
        }
        if from_input {
            self.dug.replace_input(n, state);
        } else {
            self.dug.replace_output(n, state);
        }
    }

    fn log_statistics(&self) {
        let mut total_variables: u64 = 0;
        let mut total_ptstos: u64 = 0;
        let mut num_objects = [0u32; 10];
        let mut max_objects: usize = 0;
        let mut num_max: u32 = 0;

        for (_, sets) in self.pts_top.iter() {
            for set in sets {
                let size = set.len();
                total_variables += 1;
                total_ptstos += size as u64;
                if size < 10 {
                    num_objects[size] += 1;
                }
                if size > max_objects {
                    max_objects = size;
                    num_max = 0;
                }
                if size == max_objects {
                    num_max += 1;
                }
            }
        }

        info!("Number tracked values: {}", total_variables);
        info!("Number tracked ptstos: {}", total_ptstos);
        info!("Max ptsto is: {}, with num_max: {}", max_objects, num_max);
        info!("lowest ptsto counts:");
        for (i, count) in num_objects.iter().enumerate() {
            info!("  [{}]:  {}", i, count);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::Cfg;
    use crate::constraint::ConstraintGraph;
    use crate::entity::EntityRef;
    use crate::ir;
    use crate::objects::AllocKind;

    fn top_only_setup() -> (Dug, ObjectMap, ObjectId, ObjectId, ObjectId) {
        let mut omap = ObjectMap::new();
        let p = omap.get_or_make_value(ir::Value::new(0), "p");
        let q = omap.get_or_make_value(ir::Value::new(1), "q");
        let o = omap.make_object(ir::Value::new(2), AllocKind::Stack, 1, "o");

        let mut cg = ConstraintGraph::new();
        cg.add_addr_of(p, o);
        cg.add_copy(q, p);

        let mut dug = Dug::new();
        dug.structs = omap.struct_info();
        dug.fill_top_level(&cg);
        (dug, omap, p, q, o)
    }

    #[test]
    fn top_level_propagation() {
        let (mut dug, omap, p, q, o) = top_only_setup();
        let mut solver = Solver::new(&mut dug, &omap);
        solver.solve();
        let solution = solver.finish();

        assert!(solution.pts_top.get(p, 0).unwrap().contains(o));
        assert!(solution.pts_top.get(q, 0).unwrap().contains(o));
    }

    #[test]
    fn second_solve_does_no_work() {
        let (mut dug, omap, ..) = top_only_setup();
        let mut solver = Solver::new(&mut dug, &omap);
        let first = solver.solve();
        assert!(first > 0);
        let second = solver.solve();
        assert_eq!(second, 0);
    }

    #[test]
    fn load_through_universal_yields_universal() {
        let mut omap = ObjectMap::new();
        let p = omap.get_or_make_value(ir::Value::new(0), "p");
        let d = omap.get_or_make_value(ir::Value::new(1), "d");

        let mut cg = ConstraintGraph::new();
        cg.add_copy(p, ObjectId::UNIVERSAL_VALUE);
        cg.add_addr_of(ObjectId::UNIVERSAL_VALUE, ObjectId::UNIVERSAL_VALUE);
        let node = Cfg::new().init;
        cg.add_load(d, p, node);

        let mut dug = Dug::new();
        dug.structs = omap.struct_info();
        dug.fill_top_level(&cg);

        let mut solver = Solver::new(&mut dug, &omap);
        solver.solve();
        let solution = solver.finish();
        assert!(solution
            .pts_top
            .get(d, 0)
            .unwrap()
            .contains(ObjectId::UNIVERSAL_VALUE));
    }
}
