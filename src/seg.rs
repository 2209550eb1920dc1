//! Sparse evaluation graph.
//!
//! `Seg` is the generic directed graph underpinning the control-flow graph,
//! the condensation passes, and the pointer-equivalence optimization. Nodes
//! live in an arena indexed by a dense entity reference; edges are id
//! vectors on each node. Two nodes can be united into one: the loser's slot
//! becomes a forwarder to the representative, and lookups follow forwarder
//! chains. Ids therefore stay stable across unions, which is what lets a
//! clone of the graph (condensed differently) be indexed with the original
//! ids.
//!
//! Only mutating entry points compress forwarder chains; shared lookups
//! walk them without writing.

use crate::entity::{EntityRef, PrimaryMap};
use smallvec::SmallVec;
use std::fmt;
use std::mem;

/// A node payload that knows how to merge with another instance of itself
/// when the containing nodes are united.
pub trait SegNode: Clone {
    /// Merge `other`'s payload into `self`.
    fn unite(&mut self, other: Self);
}

type EdgeList<K> = SmallVec<[K; 4]>;

#[derive(Clone)]
struct NodeData<K: EntityRef, N> {
    preds: EdgeList<K>,
    succs: EdgeList<K>,
    data: N,
}

#[derive(Clone)]
enum Slot<K: EntityRef, N> {
    /// A live representative node.
    Node(NodeData<K, N>),
    /// United into another node.
    Forward(K),
    /// Removed from the graph.
    Vacant,
}

/// A directed graph with node union, keyed by the entity type `K`.
#[derive(Clone)]
pub struct Seg<K, N>
where
    K: EntityRef + Ord + fmt::Display,
    N: SegNode,
{
    slots: PrimaryMap<K, Slot<K, N>>,
}

impl<K, N> Seg<K, N>
where
    K: EntityRef + Ord + fmt::Display,
    N: SegNode,
{
    /// Create an empty graph.
    pub fn new() -> Self {
        Self {
            slots: PrimaryMap::new(),
        }
    }

    /// Add a node with the given payload, returning its id.
    pub fn add_node(&mut self, data: N) -> K {
        self.slots.push(Slot::Node(NodeData {
            preds: EdgeList::new(),
            succs: EdgeList::new(),
            data,
        }))
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.slots
            .values()
            .filter(|s| match s {
                Slot::Node(_) => true,
                _ => false,
            })
            .count()
    }

    /// Is the graph empty?
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Follow forwarder chains to the representative of `id`, or `None` if
    /// the node was removed or never issued.
    pub fn try_rep(&self, id: K) -> Option<K> {
        let mut cur = id;
        loop {
            match self.slots.get(cur)? {
                Slot::Node(_) => return Some(cur),
                Slot::Forward(next) => cur = *next,
                Slot::Vacant => return None,
            }
        }
    }

    /// The representative of `id`. Panics if the node was removed or never
    /// issued; that is a programming error, not an input error.
    pub fn rep(&self, id: K) -> K {
        match self.try_rep(id) {
            Some(r) => r,
            None => panic!("no SEG node for {}", id),
        }
    }

    /// The payload of `id`'s representative.
    pub fn node(&self, id: K) -> &N {
        let rep = self.rep(id);
        match &self.slots[rep] {
            Slot::Node(nd) => &nd.data,
            _ => unreachable!(),
        }
    }

    /// The payload of `id`'s representative, mutable version.
    pub fn node_mut(&mut self, id: K) -> &mut N {
        let rep = self.rep(id);
        match &mut self.slots[rep] {
            Slot::Node(nd) => &mut nd.data,
            _ => unreachable!(),
        }
    }

    /// The payload of `id`'s representative, or `None` if the node is gone.
    pub fn try_node(&self, id: K) -> Option<&N> {
        let rep = self.try_rep(id)?;
        match &self.slots[rep] {
            Slot::Node(nd) => Some(&nd.data),
            _ => None,
        }
    }

    fn data(&self, rep: K) -> &NodeData<K, N> {
        match &self.slots[rep] {
            Slot::Node(nd) => nd,
            _ => panic!("no SEG node for {}", rep),
        }
    }

    fn data_mut(&mut self, rep: K) -> &mut NodeData<K, N> {
        match &mut self.slots[rep] {
            Slot::Node(nd) => nd,
            _ => panic!("no SEG node for {}", rep),
        }
    }

    /// The raw predecessor list of `id`'s representative. Entries may need
    /// representative resolution; `clean_graph` canonicalizes them.
    pub fn preds(&self, id: K) -> &[K] {
        &self.data(self.rep(id)).preds
    }

    /// The raw successor list of `id`'s representative.
    pub fn succs(&self, id: K) -> &[K] {
        &self.data(self.rep(id)).succs
    }

    /// Resolved, deduplicated predecessors of `id`.
    pub fn pred_reps(&self, id: K) -> Vec<K> {
        self.resolved(self.preds(self.rep(id)), self.rep(id))
    }

    /// Resolved, deduplicated successors of `id`.
    pub fn succ_reps(&self, id: K) -> Vec<K> {
        self.resolved(self.succs(self.rep(id)), self.rep(id))
    }

    fn resolved(&self, raw: &[K], exclude: K) -> Vec<K> {
        let mut out: Vec<K> = raw
            .iter()
            .filter_map(|&e| self.try_rep(e))
            .filter(|&e| e != exclude)
            .collect();
        out.sort_unstable();
        out.dedup();
        out
    }

    /// Add an edge `from → to`. Idempotent on the deduplicated edge sets;
    /// self-loops are not inserted.
    pub fn add_edge(&mut self, from: K, to: K) {
        let from = self.rep(from);
        let to = self.rep(to);
        if from == to {
            return;
        }
        let to_nd = self.data_mut(to);
        if !to_nd.preds.contains(&from) {
            to_nd.preds.push(from);
        }
        let from_nd = self.data_mut(from);
        if !from_nd.succs.contains(&to) {
            from_nd.succs.push(to);
        }
    }

    /// Remove every edge `from → to`, in both edge sets.
    pub fn remove_edge(&mut self, from: K, to: K) {
        let from = self.rep(from);
        let to = self.rep(to);
        let mut preds = mem::replace(&mut self.data_mut(to).preds, EdgeList::new());
        retain_edges(&mut preds, |e| self.try_rep(e) != Some(from));
        self.data_mut(to).preds = preds;

        let mut succs = mem::replace(&mut self.data_mut(from).succs, EdgeList::new());
        retain_edges(&mut succs, |e| self.try_rep(e) != Some(to));
        self.data_mut(from).succs = succs;
    }

    /// Remove the edges between `a` and `b` in both directions.
    pub fn remove_bidir_edge(&mut self, a: K, b: K) {
        self.remove_edge(a, b);
        self.remove_edge(b, a);
    }

    /// Unite `b` into `a`: `a`'s representative absorbs `b`'s predecessors,
    /// successors, and payload, and `b` forwards to it. Edges between the
    /// two are dropped rather than becoming self-loops. Idempotent. Returns
    /// the surviving representative.
    pub fn unite(&mut self, a: K, b: K) -> K {
        let ra = self.rep(a);
        let rb = self.rep(b);
        if ra == rb {
            return ra;
        }

        let b_data = match mem::replace(&mut self.slots[rb], Slot::Forward(ra)) {
            Slot::Node(nd) => nd,
            _ => unreachable!(),
        };

        let mut preds = b_data.preds;
        retain_edges(&mut preds, |e| self.try_rep(e) != Some(ra));
        let mut succs = b_data.succs;
        retain_edges(&mut succs, |e| self.try_rep(e) != Some(ra));

        let mut a_preds = mem::replace(&mut self.data_mut(ra).preds, EdgeList::new());
        retain_edges(&mut a_preds, |e| self.try_rep(e) != Some(ra));
        a_preds.extend(preds);
        let mut a_succs = mem::replace(&mut self.data_mut(ra).succs, EdgeList::new());
        retain_edges(&mut a_succs, |e| self.try_rep(e) != Some(ra));
        a_succs.extend(succs);

        let nd = self.data_mut(ra);
        nd.preds = a_preds;
        nd.succs = a_succs;
        nd.data.unite(b_data.data);
        ra
    }

    /// Remove `id` from the graph, detaching all incident edges. Returns
    /// `false` if the node was already gone.
    pub fn try_remove_node(&mut self, id: K) -> bool {
        let rep = match self.try_rep(id) {
            Some(r) => r,
            None => return false,
        };
        let preds = self.pred_reps(rep);
        let succs = self.succ_reps(rep);
        for p in preds {
            let mut list = mem::replace(&mut self.data_mut(p).succs, EdgeList::new());
            retain_edges(&mut list, |e| self.try_rep(e) != Some(rep));
            self.data_mut(p).succs = list;
        }
        for s in succs {
            let mut list = mem::replace(&mut self.data_mut(s).preds, EdgeList::new());
            retain_edges(&mut list, |e| self.try_rep(e) != Some(rep));
            self.data_mut(s).preds = list;
        }
        self.slots[rep] = Slot::Vacant;
        true
    }

    /// Remove `id` from the graph. Panics if the node is already gone.
    pub fn remove_node(&mut self, id: K) {
        if !self.try_remove_node(id) {
            panic!("removing nonexistent SEG node {}", id);
        }
    }

    /// Canonicalize every edge list: resolve entries through
    /// representatives, drop self-loops, dangling edges, and duplicates.
    pub fn clean_graph(&mut self) {
        for id in self.node_ids() {
            let preds = self.resolved(&self.data(id).preds, id);
            self.data_mut(id).preds = preds.into_iter().collect();
            let succs = self.resolved(&self.data(id).succs, id);
            self.data_mut(id).succs = succs.into_iter().collect();
        }
    }

    /// Rebuild every successor set from the predecessor sets. The
    /// condensation transforms maintain predecessors only; this
    /// rematerializes the other direction (and cleans predecessors as a
    /// side effect).
    pub fn rebuild_succs(&mut self) {
        let ids = self.node_ids();
        for &id in &ids {
            let preds = self.resolved(&self.data(id).preds, id);
            self.data_mut(id).preds = preds.into_iter().collect();
            self.data_mut(id).succs = EdgeList::new();
        }
        for &id in &ids {
            let preds: Vec<K> = self.data(id).preds.iter().cloned().collect();
            for p in preds {
                let succs = &mut self.data_mut(p).succs;
                if !succs.contains(&id) {
                    succs.push(id);
                }
            }
        }
    }

    /// Ids of all live representatives, in increasing order.
    pub fn node_ids(&self) -> Vec<K> {
        self.slots
            .iter()
            .filter_map(|(k, s)| match s {
                Slot::Node(_) => Some(k),
                _ => None,
            })
            .collect()
    }

    /// Iterate over all live representatives and their payloads.
    pub fn nodes(&self) -> impl Iterator<Item = (K, &N)> {
        self.slots.iter().filter_map(|(k, s)| match s {
            Slot::Node(nd) => Some((k, &nd.data)),
            _ => None,
        })
    }

    /// Collapse every strongly connected component onto its lowest-id
    /// member by repeated union.
    pub fn create_scc(&mut self) {
        // Iterative Tarjan over the (resolved) predecessor edges; the SCCs
        // of a graph and of its reverse are the same components.
        let cap = self.slots.len();
        let mut index: Vec<Option<u32>> = vec![None; cap];
        let mut low: Vec<u32> = vec![0; cap];
        let mut on_stack: Vec<bool> = vec![false; cap];
        let mut stack: Vec<K> = Vec::new();
        let mut next_index = 0u32;
        let mut components: Vec<Vec<K>> = Vec::new();

        for root in self.node_ids() {
            if index[root.index()].is_some() {
                continue;
            }
            // Explicit DFS frame: (node, neighbors, next neighbor index).
            let mut frames: Vec<(K, Vec<K>, usize)> = Vec::new();
            frames.push((root, self.pred_reps(root), 0));
            index[root.index()] = Some(next_index);
            low[root.index()] = next_index;
            next_index += 1;
            stack.push(root);
            on_stack[root.index()] = true;

            loop {
                let (v, next) = {
                    let frame = match frames.last_mut() {
                        Some(f) => f,
                        None => break,
                    };
                    let v = frame.0;
                    if frame.2 < frame.1.len() {
                        let w = frame.1[frame.2];
                        frame.2 += 1;
                        (v, Some(w))
                    } else {
                        (v, None)
                    }
                };
                match next {
                    Some(w) => match index[w.index()] {
                        None => {
                            index[w.index()] = Some(next_index);
                            low[w.index()] = next_index;
                            next_index += 1;
                            stack.push(w);
                            on_stack[w.index()] = true;
                            frames.push((w, self.pred_reps(w), 0));
                        }
                        Some(wi) => {
                            if on_stack[w.index()] {
                                low[v.index()] = low[v.index()].min(wi);
                            }
                        }
                    },
                    None => {
                        frames.pop();
                        if let Some(parent) = frames.last() {
                            let p = parent.0;
                            low[p.index()] = low[p.index()].min(low[v.index()]);
                        }
                        if Some(low[v.index()]) == index[v.index()] {
                            let mut comp = Vec::new();
                            loop {
                                let w = stack.pop().expect("tarjan stack underflow");
                                on_stack[w.index()] = false;
                                comp.push(w);
                                if w == v {
                                    break;
                                }
                            }
                            if comp.len() > 1 {
                                components.push(comp);
                            }
                        }
                    }
                }
            }
        }

        for mut comp in components {
            comp.sort_unstable();
            let winner = comp[0];
            for &other in &comp[1..] {
                self.unite(winner, other);
            }
        }
    }

    /// Forward topological order of the current representatives, following
    /// successor edges. The order is only meaningful on an acyclic graph;
    /// collapse SCCs first.
    pub fn topo(&self) -> Vec<K> {
        let mut order = Vec::new();
        let mut visited = vec![false; self.slots.len()];
        for root in self.node_ids() {
            self.postorder(root, &mut visited, &mut order, false);
        }
        order.reverse();
        order
    }

    /// Reverse topological order of the nodes reachable from `from` along
    /// predecessor edges, `from` included.
    pub fn rtopo_from(&self, from: K) -> Vec<K> {
        let mut order = Vec::new();
        let mut visited = vec![false; self.slots.len()];
        self.postorder(self.rep(from), &mut visited, &mut order, true);
        order
    }

    // Iterative DFS postorder. `backward` walks predecessor edges.
    fn postorder(&self, root: K, visited: &mut [bool], order: &mut Vec<K>, backward: bool) {
        if visited[root.index()] {
            return;
        }
        visited[root.index()] = true;
        let neighbors = |g: &Self, n: K| {
            if backward {
                g.pred_reps(n)
            } else {
                g.succ_reps(n)
            }
        };
        let mut frames: Vec<(K, Vec<K>, usize)> = vec![(root, neighbors(self, root), 0)];
        loop {
            let (v, next) = {
                let frame = match frames.last_mut() {
                    Some(f) => f,
                    None => break,
                };
                let v = frame.0;
                if frame.2 < frame.1.len() {
                    let w = frame.1[frame.2];
                    frame.2 += 1;
                    (v, Some(w))
                } else {
                    (v, None)
                }
            };
            match next {
                Some(w) => {
                    if !visited[w.index()] {
                        visited[w.index()] = true;
                        frames.push((w, neighbors(self, w), 0));
                    }
                }
                None => {
                    order.push(v);
                    frames.pop();
                }
            }
        }
    }
}

// SmallVec-friendly retain.
fn retain_edges<K: EntityRef, F: FnMut(K) -> bool>(list: &mut EdgeList<K>, mut keep: F) {
    let mut i = 0;
    while i < list.len() {
        if keep(list[i]) {
            i += 1;
        } else {
            list.remove(i);
        }
    }
}
