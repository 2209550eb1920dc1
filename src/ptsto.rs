//! Points-to sets and the maps of them the solver works on.

use crate::bitset::SparseBitSet;
use crate::entity::SecondaryMap;
use crate::objects::{ObjectId, StructInfo};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// An opaque reference to an access-equivalence partition.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartitionId(u32);
entity_impl!(PartitionId, "part");

/// The object → partition assignment, immutable after partitioning.
pub type PartitionMap = HashMap<ObjectId, PartitionId>;

/// A set of objects a pointer may refer to.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct PtstoSet {
    bits: SparseBitSet,
}

impl PtstoSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `id`. Returns `true` if the set changed.
    pub fn set(&mut self, id: ObjectId) -> bool {
        self.bits.insert(id.as_u32())
    }

    /// Is `id` a member?
    pub fn contains(&self, id: ObjectId) -> bool {
        self.bits.contains(id.as_u32())
    }

    /// Union `rhs` into `self`. Returns `true` if the set changed.
    pub fn or(&mut self, rhs: &PtstoSet) -> bool {
        self.bits.union_with(&rhs.bits)
    }

    /// Union `rhs` into `self`, adding `min(offs, remaining - 1)` to every
    /// member that is a struct element and adding other members verbatim.
    /// Returns `true` if the set changed.
    pub fn or_offs(&mut self, rhs: &PtstoSet, offs: u32, structs: &StructInfo) -> bool {
        if offs == 0 {
            return self.or(rhs);
        }
        let mut changed = false;
        for id in rhs.iter() {
            let add = match structs.get(&id) {
                Some(&remaining) => offs.min(remaining - 1),
                None => 0,
            };
            changed |= self.set(id.offset(add));
        }
        changed
    }

    /// Replace the contents with `rhs`. Returns `true` if the value
    /// changed.
    pub fn assign(&mut self, rhs: &PtstoSet) -> bool {
        if self == rhs {
            return false;
        }
        self.bits = rhs.bits.clone();
        true
    }

    /// Do the two sets share a member other than `ignore`?
    pub fn intersects_ignoring(&self, rhs: &PtstoSet, ignore: ObjectId) -> bool {
        self.bits.intersects_ignoring(&rhs.bits, ignore.as_u32())
    }

    /// Is `self` a subset of `rhs`?
    pub fn is_subset(&self, rhs: &PtstoSet) -> bool {
        self.bits.is_subset(&rhs.bits)
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.bits.len()
    }

    /// Is the set empty?
    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    /// Iterate the members in increasing id order.
    pub fn iter(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.bits.iter().map(ObjectId::from_u32)
    }
}

impl fmt::Debug for PtstoSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{{")?;
        for id in self.iter() {
            write!(f, " {}", id)?;
        }
        write!(f, " }}")
    }
}

/// The top-level points-to state: one vector of sets per value, indexed by
/// field offset. Offset slots grow on demand and missing offsets read as
/// empty.
pub struct TopLevelPtsto {
    data: SecondaryMap<ObjectId, Vec<PtstoSet>>,
}

impl TopLevelPtsto {
    /// Create an empty map.
    pub fn new() -> Self {
        Self {
            data: SecondaryMap::new(),
        }
    }

    /// The set for `id` at `offs`, growing the slot vector as needed.
    pub fn at(&mut self, id: ObjectId, offs: u32) -> &mut PtstoSet {
        let vec = &mut self.data[id];
        if vec.len() < offs as usize + 1 {
            vec.resize(offs as usize + 1, PtstoSet::new());
        }
        &mut vec[offs as usize]
    }

    /// The set for `id` at `offs`, if that slot was ever written.
    pub fn get(&self, id: ObjectId, offs: u32) -> Option<&PtstoSet> {
        self.data.get(id).and_then(|v| v.get(offs as usize))
    }

    /// Iterate over every id's slot vector.
    pub fn iter(&self) -> impl Iterator<Item = (ObjectId, &Vec<PtstoSet>)> {
        self.data.iter()
    }
}

/// The address-taken points-to state a def-use node carries: one set per
/// object live at that program point.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct PtstoGraph {
    data: BTreeMap<ObjectId, PtstoSet>,
}

impl PtstoGraph {
    /// Create a graph over the given object domain.
    pub fn with_objects(objs: &[ObjectId]) -> Self {
        Self {
            data: objs.iter().map(|&o| (o, PtstoSet::new())).collect(),
        }
    }

    /// The set for `id`, if it is in this graph's domain.
    pub fn get(&self, id: ObjectId) -> Option<&PtstoSet> {
        self.data.get(&id)
    }

    /// Union `rhs` into `self` over `self`'s domain. Returns `true` if
    /// anything changed.
    pub fn or_graph(&mut self, rhs: &PtstoGraph) -> bool {
        let mut changed = false;
        for (id, set) in self.data.iter_mut() {
            if let Some(r) = rhs.data.get(id) {
                changed |= set.or(r);
            }
        }
        changed
    }

    /// Union `rhs` into `self`, restricted to the objects of `part`.
    pub fn or_part(&mut self, rhs: &PtstoGraph, parts: &PartitionMap, part: PartitionId) -> bool {
        let mut changed = false;
        for (id, set) in self.data.iter_mut() {
            if parts.get(id) != Some(&part) {
                continue;
            }
            if let Some(r) = rhs.data.get(id) {
                changed |= set.or(r);
            }
        }
        changed
    }

    /// Union the set `rhs` into the single element `elm`. No-op when `elm`
    /// is outside the domain.
    pub fn or_element(&mut self, elm: ObjectId, rhs: &PtstoSet) -> bool {
        match self.data.get_mut(&elm) {
            Some(set) => set.or(rhs),
            None => false,
        }
    }

    /// Replace the single element `elm` with `rhs`. Returns `true` if the
    /// element changed.
    pub fn assign_element(&mut self, elm: ObjectId, rhs: &PtstoSet) -> bool {
        match self.data.get_mut(&elm) {
            Some(set) => set.assign(rhs),
            None => false,
        }
    }

    /// Union `rhs` into `self` over the whole domain except `except`. The
    /// strong-update helper.
    pub fn or_except(&mut self, rhs: &PtstoGraph, except: ObjectId) -> bool {
        let mut changed = false;
        for (id, set) in self.data.iter_mut() {
            if *id == except {
                continue;
            }
            if let Some(r) = rhs.data.get(id) {
                changed |= set.or(r);
            }
        }
        changed
    }

    /// Iterate the domain with its sets.
    pub fn iter(&self) -> impl Iterator<Item = (ObjectId, &PtstoSet)> {
        self.data.iter().map(|(&id, set)| (id, set))
    }

    /// Is the domain empty?
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl fmt::Debug for PtstoGraph {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "(")?;
        for (i, (id, set)) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}->{:?}", id, set)?;
        }
        write!(f, ")")
    }
}
