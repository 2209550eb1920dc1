//! The constraint graph: the program reduced to primitive pointer
//! statements.
//!
//! Constraints accumulate while the IR is walked, one graph per function,
//! and the per-function graphs merge into the program graph before call
//! resolution. Address-taken constraints (loads and stores) carry the CFG
//! node of their program point; top-level constraints do not need one.

use crate::cfg::CfgId;
use crate::entity::PrimaryMap;
use crate::ir;
use crate::objects::ObjectId;
use std::collections::HashSet;

/// An opaque reference to a constraint.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConstraintId(u32);
entity_impl!(ConstraintId, "con");

/// The five primitive constraint kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConstraintKind {
    /// `dst ← &src`.
    AddrOf,
    /// `dst ← src`.
    Copy,
    /// `dst ← *src`.
    Load,
    /// `*dst ← src`.
    Store,
    /// `dst ← src + offs`.
    Gep,
}

/// One primitive constraint.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Constraint {
    /// What this constraint does.
    pub kind: ConstraintKind,
    /// Destination id (the stored-through pointer for `Store`).
    pub dst: ObjectId,
    /// Source id (the object for `AddrOf`).
    pub src: ObjectId,
    /// Field offset, used by `Gep` only.
    pub offs: u32,
    /// The program point of an address-taken constraint.
    pub cfg: Option<CfgId>,
}

/// What a call site calls.
#[derive(Clone, Debug)]
pub enum CallTarget {
    /// A known function.
    Direct(ir::FuncId),
    /// The id of the function-pointer value.
    Indirect(ObjectId),
}

/// A pending call site, spliced during call resolution.
#[derive(Clone, Debug)]
pub struct CallSite {
    /// The callee.
    pub callee: CallTarget,
    /// Argument value ids, positionally aligned with the callee's
    /// parameters; `None` for non-pointer arguments.
    pub args: Vec<Option<ObjectId>>,
    /// The call result's value id, if the result is a pointer.
    pub dst: Option<ObjectId>,
    /// The IR value behind `dst`; allocator summaries key their heap
    /// object off it.
    pub dst_value: Option<ir::Value>,
    /// The IR value of the function pointer for indirect calls; the
    /// speculative profile is keyed by it.
    pub fp_value: Option<ir::Value>,
    /// The CFG node of the call itself.
    pub node: CfgId,
    /// The CFG node control returns to.
    pub cont: CfgId,
}

/// The set of constraints plus the call sites awaiting resolution.
pub struct ConstraintGraph {
    constraints: PrimaryMap<ConstraintId, Option<Constraint>>,
    /// Call sites not yet spliced.
    pub calls: Vec<CallSite>,
    /// Indirect call sites deferred until auxiliary results exist.
    pub indirect_calls: Vec<CallSite>,
}

impl ConstraintGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self {
            constraints: PrimaryMap::new(),
            calls: Vec::new(),
            indirect_calls: Vec::new(),
        }
    }

    fn add(&mut self, c: Constraint) -> ConstraintId {
        self.constraints.push(Some(c))
    }

    /// `dst ← &obj`.
    pub fn add_addr_of(&mut self, dst: ObjectId, obj: ObjectId) -> ConstraintId {
        self.add(Constraint {
            kind: ConstraintKind::AddrOf,
            dst,
            src: obj,
            offs: 0,
            cfg: None,
        })
    }

    /// `dst ← src`.
    pub fn add_copy(&mut self, dst: ObjectId, src: ObjectId) -> ConstraintId {
        self.add(Constraint {
            kind: ConstraintKind::Copy,
            dst,
            src,
            offs: 0,
            cfg: None,
        })
    }

    /// `dst ← src + offs`.
    pub fn add_gep(&mut self, dst: ObjectId, src: ObjectId, offs: u32) -> ConstraintId {
        self.add(Constraint {
            kind: ConstraintKind::Gep,
            dst,
            src,
            offs,
            cfg: None,
        })
    }

    /// `dst ← *src` at program point `node`.
    pub fn add_load(&mut self, dst: ObjectId, src: ObjectId, node: CfgId) -> ConstraintId {
        self.add(Constraint {
            kind: ConstraintKind::Load,
            dst,
            src,
            offs: 0,
            cfg: Some(node),
        })
    }

    /// `*dst ← src` at program point `node`.
    pub fn add_store(&mut self, dst: ObjectId, src: ObjectId, node: CfgId) -> ConstraintId {
        self.add(Constraint {
            kind: ConstraintKind::Store,
            dst,
            src,
            offs: 0,
            cfg: Some(node),
        })
    }

    /// Merge `other` into `self`. The object id space is shared through the
    /// common object map; constraint ids from `other` are re-based by the
    /// append.
    pub fn merge(&mut self, other: ConstraintGraph) {
        for c in other.constraints.values() {
            if let Some(c) = c {
                self.add(c.clone());
            }
        }
        self.calls.extend(other.calls);
        self.indirect_calls.extend(other.indirect_calls);
    }

    /// Iterate the live constraints.
    pub fn iter(&self) -> impl Iterator<Item = (ConstraintId, &Constraint)> {
        self.constraints
            .iter()
            .filter_map(|(id, c)| c.as_ref().map(|c| (id, c)))
    }

    /// Number of live constraints.
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// Delete the constraint `id`.
    pub fn remove(&mut self, id: ConstraintId) {
        self.constraints[id] = None;
    }

    /// Rewrite every operand through `map` and drop duplicate constraints.
    pub fn rewrite_and_dedup<F: FnMut(ObjectId) -> ObjectId>(&mut self, mut map: F) {
        let mut seen: HashSet<Constraint> = HashSet::new();
        for slot in self.constraints.values_mut() {
            let dup = match slot {
                Some(c) => {
                    c.dst = map(c.dst);
                    c.src = map(c.src);
                    !seen.insert(c.clone())
                }
                None => false,
            };
            if dup {
                *slot = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityRef;

    fn obj(n: usize) -> ObjectId {
        ObjectId::new(n)
    }

    #[test]
    fn merge_appends_constraints() {
        let mut a = ConstraintGraph::new();
        a.add_copy(obj(10), obj(11));

        let mut b = ConstraintGraph::new();
        b.add_addr_of(obj(12), obj(13));
        b.add_copy(obj(12), obj(10));

        a.merge(b);
        assert_eq!(a.len(), 3);
    }

    #[test]
    fn rewrite_dedups_merged_operands() {
        let mut cg = ConstraintGraph::new();
        cg.add_copy(obj(20), obj(10));
        cg.add_copy(obj(20), obj(11));

        // Merging 11 into 10 makes the two copies identical.
        cg.rewrite_and_dedup(|id| if id == obj(11) { obj(10) } else { id });
        assert_eq!(cg.len(), 1);
    }

    #[test]
    fn remove_leaves_other_ids_valid() {
        let mut cg = ConstraintGraph::new();
        let a = cg.add_copy(obj(20), obj(10));
        let b = cg.add_copy(obj(21), obj(10));
        cg.remove(a);
        assert_eq!(cg.len(), 1);
        assert_eq!(cg.iter().next().unwrap().0, b);
    }
}
