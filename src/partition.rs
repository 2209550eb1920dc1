//! Access-equivalence partitioning and per-partition SSA.
//!
//! Two address-taken objects are access-equivalent when they are loaded and
//! stored at exactly the same set of program points with the same tags;
//! each equivalence class becomes one partition, the unit of per-object
//! SSA. For every partition the CFG is cloned, re-attributed with respect
//! to that partition's accesses alone, condensed with the Ramalingam
//! transforms, and spliced into the def-use graph: stores and phis become
//! the defs, loads hang off their node's def, and address-taken edges
//! follow the condensed control flow.

use crate::andersen::AuxPtsto;
use crate::bitset::SparseBitSet;
use crate::cfg::{ramalingam, Cfg, CfgId, CfgNode};
use crate::cfg_printer::DotDumper;
use crate::dug::{Dug, DugId, DugKind};
use crate::objects::{ObjectId, ObjectMap};
use crate::ptsto::{PartitionId, PartitionMap};
use crate::timing;
use log::debug;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

/// The partitioner's result: the object → partition map plus the access
/// information the SSA splice needs.
pub struct PartitionInfo {
    /// The object → partition assignment.
    pub parts: PartitionMap,
    /// Objects of each partition, sorted.
    pub part_objs: HashMap<PartitionId, Vec<ObjectId>>,
    /// The partitioned objects each access node may touch.
    pub access_objs: HashMap<DugId, Vec<ObjectId>>,
}

// Address-taken state is tracked for real objects and for the library's
// static memory synthetics. The null object and the universal set carry no
// per-point state.
fn is_partitioned(omap: &ObjectMap, o: ObjectId) -> bool {
    omap.is_object(o)
        || o == ObjectId::ERRNO_OBJECT
        || o == ObjectId::LOCALE_OBJECT
        || o == ObjectId::CTYPE_OBJECT
        || o == ObjectId::ARGV_OBJECT
}

/// Group the address-taken objects by access fingerprint.
pub fn compute_partitions(dug: &Dug, aux: &dyn AuxPtsto, omap: &ObjectMap) -> PartitionInfo {
    let _tt = timing::compute_partitions();

    // The fingerprint of an object: one bit per (program point, tag) pair
    // that may access it.
    const LOAD_TAG: u32 = 1;
    const STORE_TAG: u32 = 2;
    let mut prints: BTreeMap<ObjectId, SparseBitSet> = BTreeMap::new();
    let mut access_objs: HashMap<DugId, Vec<ObjectId>> = HashMap::new();

    for id in dug.ids() {
        let (ptr, node, tag) = match &dug.node(id).kind {
            DugKind::Load { src, node, .. } => (*src, *node, LOAD_TAG),
            DugKind::Store { dst, node, .. } => (*dst, *node, STORE_TAG),
            _ => continue,
        };
        let set = match aux.points_to(omap.rep(ptr)) {
            Some(s) => s,
            None => continue,
        };
        for o in set.iter() {
            if !is_partitioned(omap, o) {
                continue;
            }
            prints
                .entry(o)
                .or_insert_with(SparseBitSet::new)
                .insert((node.as_u32() << 2) | tag);
            access_objs.entry(id).or_insert_with(Vec::new).push(o);
        }
    }

    // Objects with identical fingerprints share a partition.
    let mut groups: BTreeMap<SparseBitSet, PartitionId> = BTreeMap::new();
    let mut parts = PartitionMap::new();
    let mut part_objs: HashMap<PartitionId, Vec<ObjectId>> = HashMap::new();
    let mut next = 0u32;
    for (o, print) in &prints {
        let part = match groups.get(print) {
            Some(&p) => p,
            None => {
                let p = PartitionId::from_u32(next);
                next += 1;
                groups.insert(print.clone(), p);
                p
            }
        };
        parts.insert(*o, part);
        part_objs.entry(part).or_insert_with(Vec::new).push(*o);
    }
    for objs in part_objs.values_mut() {
        objs.sort_unstable();
        objs.dedup();
    }
    for objs in access_objs.values_mut() {
        objs.sort_unstable();
        objs.dedup();
    }

    debug!(
        "partitioning: {} objects in {} partitions",
        parts.len(),
        part_objs.len()
    );
    PartitionInfo {
        parts,
        part_objs,
        access_objs,
    }
}

/// Run the per-partition condensation and splice the results into the DUG.
/// `cfg` is the already-condensed program CFG; each partition refines a
/// clone of it against its own access set.
pub fn add_partitions_to_dug(dug: &mut Dug, cfg: &Cfg, info: &PartitionInfo) {
    let _tt = timing::add_partitions();

    // Accesses per partition, in partition order.
    let mut part_access: BTreeMap<PartitionId, Vec<DugId>> = BTreeMap::new();
    for (&id, objs) in &info.access_objs {
        let parts: BTreeSet<PartitionId> = objs
            .iter()
            .filter_map(|o| info.parts.get(o).copied())
            .collect();
        for part in parts {
            part_access.entry(part).or_insert_with(Vec::new).push(id);
        }
    }

    // An access node covers one partition; additional partitions get
    // sibling nodes sharing the top-level operands.
    let mut assigned: HashSet<DugId> = HashSet::new();

    for (&part, accesses) in &part_access {
        let objs = &info.part_objs[&part];
        let mut accesses = accesses.clone();
        accesses.sort_unstable();

        let mut realized: Vec<(DugId, CfgId, bool)> = Vec::new();
        for &a in &accesses {
            let (node, is_store) = match &dug.node(a).kind {
                DugKind::Load { node, .. } => (*node, false),
                DugKind::Store { node, .. } => (*node, true),
                _ => continue,
            };
            let did = if assigned.insert(a) {
                dug.set_part(a, part);
                a
            } else {
                dug.clone_access(a, part)
            };
            realized.push((did, node, is_store));
        }

        // Clone the condensed CFG and re-attribute it for this partition:
        // a node modifies iff it stores some object of the partition, and
        // is required iff it loads one.
        let mut g = cfg.seg.clone();
        let const_nodes: HashSet<CfgId> = g
            .nodes()
            .filter(|(_, n)| n.c)
            .map(|(id, _)| id)
            .collect();
        for id in g.node_ids() {
            *g.node_mut(id) = CfgNode::preserving();
        }
        // Exits stay required so stores nothing loads still survive to the
        // end of the program.
        for &e in &cfg.exits {
            if let Some(rep) = g.try_rep(e) {
                g.node_mut(rep).r = true;
            }
        }
        for &(_, node, is_store) in &realized {
            let rep = match g.try_rep(node) {
                Some(r) => r,
                None => continue,
            };
            let nd = g.node_mut(rep);
            if is_store {
                nd.m = true;
                nd.p = false;
                nd.c |= const_nodes.contains(&rep);
            } else {
                nd.r = true;
            }
        }

        ramalingam(&mut g, &DotDumper::disabled());

        // Collect the surviving accesses per condensed node.
        let mut stores_at: HashMap<CfgId, Vec<DugId>> = HashMap::new();
        let mut loads_at: HashMap<CfgId, Vec<DugId>> = HashMap::new();
        for &(did, node, is_store) in &realized {
            let rep = match g.try_rep(node) {
                Some(r) => r,
                // A store nothing in this partition observes was pruned;
                // its node keeps an empty domain and transfers nothing.
                None => continue,
            };
            dug.init_graphs(did, objs);
            if is_store {
                stores_at.entry(rep).or_insert_with(Vec::new).push(did);
            } else {
                loads_at.entry(rep).or_insert_with(Vec::new).push(did);
            }
        }

        // Every surviving node gets a local def: its store, or a join.
        // entry receives the predecessors, exit is what successors and
        // loads read.
        let mut entry_of: HashMap<CfgId, DugId> = HashMap::new();
        let mut exit_of: HashMap<CfgId, DugId> = HashMap::new();
        for rep in g.node_ids() {
            match stores_at.get(&rep) {
                Some(stores) => {
                    debug_assert_eq!(stores.len(), 1, "condensation merged two stores");
                    let mut tail = stores[0];
                    for &s in &stores[1..] {
                        dug.add_at_edge(tail, s);
                        tail = s;
                    }
                    entry_of.insert(rep, stores[0]);
                    exit_of.insert(rep, tail);
                }
                None => {
                    let phi = dug.add_phi(part);
                    dug.init_graphs(phi, objs);
                    entry_of.insert(rep, phi);
                    exit_of.insert(rep, phi);
                }
            }
        }

        for rep in g.node_ids() {
            let entry = entry_of[&rep];
            for pred in g.pred_reps(rep) {
                dug.add_at_edge(exit_of[&pred], entry);
            }
            if let Some(loads) = loads_at.get(&rep) {
                let exit = exit_of[&rep];
                for &l in loads {
                    dug.add_at_edge(exit, l);
                }
            }
        }
    }

    dug.parts = info.parts.clone();
    dug.rebuild_top_edges();
    debug!("DUG: {} nodes after partition splice", dug.len());
}
