//! The def-use graph the solver runs on.
//!
//! One node per surviving constraint, as a closed set of tagged variants.
//! Top-level def-use edges connect value definitions to their uses;
//! address-taken edges connect stores and phis to the loads, stores, and
//! phis downstream of them inside one partition. The DUG exclusively owns
//! the per-node points-to state, the partition map, and the aggregate side
//! table; the constraint graph is released once the fill is done.

use crate::cfg::CfgId;
use crate::constraint::{ConstraintGraph, ConstraintKind};
use crate::entity::PrimaryMap;
use crate::objects::{ObjectId, StructInfo};
use crate::ptsto::{PartitionId, PartitionMap, PtstoGraph};
use crate::timing;
use log::debug;
use smallvec::SmallVec;
use std::collections::HashMap;

/// An opaque reference to a DUG node.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DugId(u32);
entity_impl!(DugId, "dug");

/// What a node computes.
#[derive(Clone, Debug)]
pub enum DugKind {
    /// `dst ⊇ {obj}`.
    AddrOf {
        /// Defined value.
        dst: ObjectId,
        /// The object whose address is taken.
        obj: ObjectId,
    },
    /// `dst ⊇ src` shifted by `offs` (copies and field offsets).
    Copy {
        /// Defined value.
        dst: ObjectId,
        /// Used value.
        src: ObjectId,
        /// Field offset; zero for plain copies.
        offs: u32,
    },
    /// `dst ⊇ in[o]` for every `o` in `pts(src)`.
    Load {
        /// Defined value.
        dst: ObjectId,
        /// The pointer loaded through.
        src: ObjectId,
        /// Program point.
        node: CfgId,
        /// The partition this node covers, assigned by the partitioner.
        part: Option<PartitionId>,
    },
    /// `out[o] ⊇ pts(src)` for every `o` in `pts(dst)`.
    Store {
        /// The pointer stored through.
        dst: ObjectId,
        /// The stored value.
        src: ObjectId,
        /// Program point.
        node: CfgId,
        /// The partition this node covers, assigned by the partitioner.
        part: Option<PartitionId>,
    },
    /// A join point of one partition's address-taken state.
    Phi {
        /// The partition joined.
        part: PartitionId,
    },
}

/// A DUG node: its kind, its edges, and its address-taken state.
pub struct DugNode {
    /// What the node computes.
    pub kind: DugKind,
    /// Top-level successors (value def → use).
    pub top_succs: SmallVec<[DugId; 4]>,
    /// Address-taken successors within the node's partition.
    pub at_succs: SmallVec<[DugId; 2]>,
    /// Incoming address-taken state.
    pub input: PtstoGraph,
    /// Outgoing address-taken state (stores only; phis forward `input`).
    pub output: PtstoGraph,
}

impl DugNode {
    fn new(kind: DugKind) -> Self {
        Self {
            kind,
            top_succs: SmallVec::new(),
            at_succs: SmallVec::new(),
            input: PtstoGraph::default(),
            output: PtstoGraph::default(),
        }
    }
}

/// The def-use graph.
pub struct Dug {
    nodes: PrimaryMap<DugId, DugNode>,
    defs: HashMap<ObjectId, Vec<DugId>>,
    uses: HashMap<ObjectId, Vec<DugId>>,
    /// The object → partition assignment.
    pub parts: PartitionMap,
    /// The aggregate side table, for offset-aware propagation.
    pub structs: StructInfo,
}

impl Dug {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self {
            nodes: PrimaryMap::new(),
            defs: HashMap::new(),
            uses: HashMap::new(),
            parts: PartitionMap::new(),
            structs: StructInfo::new(),
        }
    }

    /// Create one node per surviving constraint and install the top-level
    /// def-use edges.
    pub fn fill_top_level(&mut self, cg: &ConstraintGraph) {
        let _tt = timing::fill_top_level();
        for (_, c) in cg.iter() {
            let kind = match c.kind {
                ConstraintKind::AddrOf => DugKind::AddrOf {
                    dst: c.dst,
                    obj: c.src,
                },
                ConstraintKind::Copy => DugKind::Copy {
                    dst: c.dst,
                    src: c.src,
                    offs: 0,
                },
                ConstraintKind::Gep => DugKind::Copy {
                    dst: c.dst,
                    src: c.src,
                    offs: c.offs,
                },
                ConstraintKind::Load => DugKind::Load {
                    dst: c.dst,
                    src: c.src,
                    node: c.cfg.expect("load constraint carries its program point"),
                    part: None,
                },
                ConstraintKind::Store => DugKind::Store {
                    dst: c.dst,
                    src: c.src,
                    node: c.cfg.expect("store constraint carries its program point"),
                    part: None,
                },
            };
            self.add_node(kind);
        }
        self.rebuild_top_edges();
        debug!("DUG: {} nodes from constraints", self.nodes.len());
    }

    /// Add a node, registering its defs and uses.
    pub fn add_node(&mut self, kind: DugKind) -> DugId {
        let id = self.nodes.push(DugNode::new(kind));
        match &self.nodes[id].kind {
            DugKind::AddrOf { dst, .. } => {
                self.defs.entry(*dst).or_insert_with(Vec::new).push(id);
            }
            DugKind::Copy { dst, src, .. } => {
                self.defs.entry(*dst).or_insert_with(Vec::new).push(id);
                self.uses.entry(*src).or_insert_with(Vec::new).push(id);
            }
            DugKind::Load { dst, src, .. } => {
                self.defs.entry(*dst).or_insert_with(Vec::new).push(id);
                self.uses.entry(*src).or_insert_with(Vec::new).push(id);
            }
            DugKind::Store { dst, src, .. } => {
                self.uses.entry(*src).or_insert_with(Vec::new).push(id);
                self.uses.entry(*dst).or_insert_with(Vec::new).push(id);
            }
            DugKind::Phi { .. } => {}
        }
        id
    }

    /// Add a join node for `part`.
    pub fn add_phi(&mut self, part: PartitionId) -> DugId {
        self.nodes.push(DugNode::new(DugKind::Phi { part }))
    }

    /// Clone the load/store node `orig` to cover an additional partition.
    /// The sibling shares the original's top-level operands.
    pub fn clone_access(&mut self, orig: DugId, part: PartitionId) -> DugId {
        let kind = match &self.nodes[orig].kind {
            DugKind::Load {
                dst, src, node, ..
            } => DugKind::Load {
                dst: *dst,
                src: *src,
                node: *node,
                part: Some(part),
            },
            DugKind::Store {
                dst, src, node, ..
            } => DugKind::Store {
                dst: *dst,
                src: *src,
                node: *node,
                part: Some(part),
            },
            _ => panic!("only access nodes have partition siblings"),
        };
        self.add_node(kind)
    }

    /// Assign `part` to the load/store node `id`.
    pub fn set_part(&mut self, id: DugId, part: PartitionId) {
        match &mut self.nodes[id].kind {
            DugKind::Load { part: p, .. } | DugKind::Store { part: p, .. } => *p = Some(part),
            _ => panic!("only access nodes carry a partition"),
        }
    }

    /// Give `id` address-taken state over the object domain `objs`.
    pub fn init_graphs(&mut self, id: DugId, objs: &[ObjectId]) {
        let node = &mut self.nodes[id];
        node.input = PtstoGraph::with_objects(objs);
        if let DugKind::Store { .. } = node.kind {
            node.output = PtstoGraph::with_objects(objs);
        }
    }

    /// Add an address-taken edge.
    pub fn add_at_edge(&mut self, from: DugId, to: DugId) {
        if from == to {
            return;
        }
        let succs = &mut self.nodes[from].at_succs;
        if !succs.contains(&to) {
            succs.push(to);
        }
    }

    /// Recompute every top-level def → use edge from the def/use maps.
    /// Safe to run again after partition siblings are added.
    pub fn rebuild_top_edges(&mut self) {
        let mut edges: Vec<(DugId, DugId)> = Vec::new();
        for (val, users) in &self.uses {
            if let Some(defs) = self.defs.get(val) {
                for &d in defs {
                    for &u in users {
                        if d != u {
                            edges.push((d, u));
                        }
                    }
                }
            }
        }
        for node in self.nodes.values_mut() {
            node.top_succs.clear();
        }
        for (d, u) in edges {
            let succs = &mut self.nodes[d].top_succs;
            if !succs.contains(&u) {
                succs.push(u);
            }
        }
    }

    /// The node `id`.
    pub fn node(&self, id: DugId) -> &DugNode {
        &self.nodes[id]
    }

    /// The node `id`, mutable version.
    pub fn node_mut(&mut self, id: DugId) -> &mut DugNode {
        &mut self.nodes[id]
    }

    /// Detach a node's state for split-borrow processing; put it back with
    /// `replace_input`.
    pub fn take_input(&mut self, id: DugId) -> PtstoGraph {
        std::mem::replace(&mut self.nodes[id].input, PtstoGraph::default())
    }

    /// Restore state taken with `take_input`.
    pub fn replace_input(&mut self, id: DugId, g: PtstoGraph) {
        self.nodes[id].input = g;
    }

    /// Detach a store's output state; put it back with `replace_output`.
    pub fn take_output(&mut self, id: DugId) -> PtstoGraph {
        std::mem::replace(&mut self.nodes[id].output, PtstoGraph::default())
    }

    /// Restore state taken with `take_output`.
    pub fn replace_output(&mut self, id: DugId, g: PtstoGraph) {
        self.nodes[id].output = g;
    }

    /// All node ids.
    pub fn ids(&self) -> Vec<DugId> {
        self.nodes.keys().collect()
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::Cfg;
    use crate::entity::EntityRef;

    fn obj(n: usize) -> ObjectId {
        ObjectId::new(n)
    }

    #[test]
    fn fill_installs_def_use_edges() {
        let mut cg = ConstraintGraph::new();
        let node = Cfg::new().init;
        // p = &o; q = p; r = *q.
        cg.add_addr_of(obj(10), obj(20));
        cg.add_copy(obj(11), obj(10));
        cg.add_load(obj(12), obj(11), node);

        let mut dug = Dug::new();
        dug.fill_top_level(&cg);
        assert_eq!(dug.len(), 3);

        let ids = dug.ids();
        let addr = ids[0];
        let copy = ids[1];
        let load = ids[2];
        assert!(dug.node(addr).top_succs.contains(&copy));
        assert!(dug.node(copy).top_succs.contains(&load));
        assert!(dug.node(load).top_succs.is_empty());
    }

    #[test]
    fn store_uses_both_operands() {
        let mut cg = ConstraintGraph::new();
        let node = Cfg::new().init;
        // p = &slot; q = &x; *p = q.
        cg.add_addr_of(obj(10), obj(20));
        cg.add_addr_of(obj(11), obj(21));
        cg.add_store(obj(10), obj(11), node);

        let mut dug = Dug::new();
        dug.fill_top_level(&cg);
        let ids = dug.ids();
        let store = ids[2];
        assert!(dug.node(ids[0]).top_succs.contains(&store));
        assert!(dug.node(ids[1]).top_succs.contains(&store));
    }

    #[test]
    fn siblings_share_operand_edges() {
        let mut cg = ConstraintGraph::new();
        let node = Cfg::new().init;
        cg.add_addr_of(obj(10), obj(20));
        cg.add_load(obj(12), obj(10), node);

        let mut dug = Dug::new();
        dug.fill_top_level(&cg);
        let load = dug.ids()[1];

        let sib = dug.clone_access(load, PartitionId::new(1));
        dug.rebuild_top_edges();
        let addr = dug.ids()[0];
        assert!(dug.node(addr).top_succs.contains(&load));
        assert!(dug.node(addr).top_succs.contains(&sib));
    }
}
