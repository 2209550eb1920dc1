//! Densely numbered entity references and the maps keyed by them.
//!
//! Every id space in the analysis (objects, constraints, graph nodes,
//! partitions, IR entities) is a struct wrapping a `u32` index. There is a
//! separate index type per entity so the spaces can't be mixed up, and the
//! arenas indexed by them are plain vectors.

use std::marker::PhantomData;
use std::ops::{Index, IndexMut};

/// A type wrapping a small integer index should implement `EntityRef` so it
/// can be used as the key of a `PrimaryMap` or `SecondaryMap`.
pub trait EntityRef: Copy + Eq {
    /// Create a new entity reference from a small integer.
    /// This should crash if the requested index is not representable.
    fn new(_: usize) -> Self;

    /// Get the index that was used to create this entity reference.
    fn index(self) -> usize;
}

/// Macro which provides the common implementation of a 32-bit entity
/// reference: `EntityRef`, `Display`, and `Debug`.
macro_rules! entity_impl {
    ($entity:ident) => {
        impl crate::entity::EntityRef for $entity {
            fn new(index: usize) -> Self {
                debug_assert!(index < (u32::max_value() as usize));
                $entity(index as u32)
            }

            fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl $entity {
            /// Create a new instance from a `u32`.
            #[allow(dead_code)]
            pub fn from_u32(x: u32) -> Self {
                debug_assert!(x < u32::max_value());
                $entity(x)
            }

            /// Return the underlying index value as a `u32`.
            #[allow(dead_code)]
            pub fn as_u32(self) -> u32 {
                self.0
            }
        }
    };

    ($entity:ident, $display_prefix:expr) => {
        entity_impl!($entity);

        impl std::fmt::Display for $entity {
            fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                write!(f, concat!($display_prefix, "{}"), self.0)
            }
        }

        impl std::fmt::Debug for $entity {
            fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                (self as &dyn std::fmt::Display).fmt(f)
            }
        }
    };
}

/// Iterate over all keys in order.
pub struct Keys<K: EntityRef> {
    pos: usize,
    rev_pos: usize,
    unused: PhantomData<K>,
}

impl<K: EntityRef> Keys<K> {
    /// Create a `Keys` iterator that visits `len` entities starting from 0.
    pub fn with_len(len: usize) -> Self {
        Self {
            pos: 0,
            rev_pos: len,
            unused: PhantomData,
        }
    }
}

impl<K: EntityRef> Iterator for Keys<K> {
    type Item = K;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos < self.rev_pos {
            let k = K::new(self.pos);
            self.pos += 1;
            Some(k)
        } else {
            None
        }
    }
}

/// A primary mapping `K -> V` allocating dense entity references.
///
/// The `PrimaryMap` data structure allocates the entity references: `push`
/// hands out the next key. It is the arena behind every id space in the
/// analysis.
#[derive(Debug, Clone)]
pub struct PrimaryMap<K, V>
where
    K: EntityRef,
{
    elems: Vec<V>,
    unused: PhantomData<K>,
}

impl<K, V> PrimaryMap<K, V>
where
    K: EntityRef,
{
    /// Create a new empty map.
    pub fn new() -> Self {
        Self {
            elems: Vec::new(),
            unused: PhantomData,
        }
    }

    /// Check if `k` is a valid key in the map.
    pub fn is_valid(&self, k: K) -> bool {
        k.index() < self.elems.len()
    }

    /// Get the element at `k` if it exists.
    pub fn get(&self, k: K) -> Option<&V> {
        self.elems.get(k.index())
    }

    /// Get the element at `k` if it exists, mutable version.
    pub fn get_mut(&mut self, k: K) -> Option<&mut V> {
        self.elems.get_mut(k.index())
    }

    /// Is this map completely empty?
    pub fn is_empty(&self) -> bool {
        self.elems.is_empty()
    }

    /// Get the total number of entity references created.
    pub fn len(&self) -> usize {
        self.elems.len()
    }

    /// Iterate over all the keys in this map.
    pub fn keys(&self) -> Keys<K> {
        Keys::with_len(self.elems.len())
    }

    /// Iterate over all the values in this map.
    pub fn values(&self) -> std::slice::Iter<V> {
        self.elems.iter()
    }

    /// Iterate over all the values in this map, mutable edition.
    pub fn values_mut(&mut self) -> std::slice::IterMut<V> {
        self.elems.iter_mut()
    }

    /// Iterate over all the keys and values in this map.
    pub fn iter(&self) -> impl Iterator<Item = (K, &V)> {
        self.elems.iter().enumerate().map(|(i, v)| (K::new(i), v))
    }

    /// Iterate over all the keys and values in this map, mutable edition.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (K, &mut V)> {
        self.elems
            .iter_mut()
            .enumerate()
            .map(|(i, v)| (K::new(i), v))
    }

    /// Remove all entries from this map.
    pub fn clear(&mut self) {
        self.elems.clear()
    }

    /// Get the key that will be assigned to the next pushed value.
    pub fn next_key(&self) -> K {
        K::new(self.elems.len())
    }

    /// Append `v` to the mapping, assigning a new key which is returned.
    pub fn push(&mut self, v: V) -> K {
        let k = self.next_key();
        self.elems.push(v);
        k
    }
}

/// Immutable indexing into a `PrimaryMap`.
/// The indexed value must be in the map.
impl<K, V> Index<K> for PrimaryMap<K, V>
where
    K: EntityRef,
{
    type Output = V;

    fn index(&self, k: K) -> &V {
        &self.elems[k.index()]
    }
}

/// Mutable indexing into a `PrimaryMap`.
impl<K, V> IndexMut<K> for PrimaryMap<K, V>
where
    K: EntityRef,
{
    fn index_mut(&mut self, k: K) -> &mut V {
        &mut self.elems[k.index()]
    }
}

/// A secondary mapping `K -> V`, for facts attached to existing entities.
///
/// Secondary maps never hand out keys; a `PrimaryMap` somewhere else did
/// that. Reading a key that was never written yields the fallback value,
/// so the map behaves as if every key carried the fallback from the start,
/// and writing past the high-water mark grows the backing vector to cover
/// the key.
#[derive(Debug, Clone)]
pub struct SecondaryMap<K, V>
where
    K: EntityRef,
    V: Clone,
{
    values: Vec<V>,
    fallback: V,
    unused: PhantomData<K>,
}

impl<K, V> SecondaryMap<K, V>
where
    K: EntityRef,
    V: Clone + Default,
{
    /// Create an empty map whose fallback is `V::default()`.
    pub fn new() -> Self {
        Self {
            values: Vec::new(),
            fallback: V::default(),
            unused: PhantomData,
        }
    }

    // Make sure the backing vector covers `k`.
    fn grow_for(&mut self, k: K) {
        if self.values.len() <= k.index() {
            let want = k.index() + 1;
            self.values.resize(want, self.fallback.clone());
        }
    }

    /// The slot for `k`, if one was ever allocated. A written map also
    /// allocates every slot below its high-water mark, so `Some` does not
    /// mean `k` itself was written.
    pub fn get(&self, k: K) -> Option<&V> {
        self.values.get(k.index())
    }

    /// Visit every allocated slot with its key.
    pub fn iter(&self) -> impl Iterator<Item = (K, &V)> {
        self.values.iter().enumerate().map(|(i, v)| (K::new(i), v))
    }
}

/// Shared indexing accepts any key: unallocated slots read the fallback.
impl<K, V> Index<K> for SecondaryMap<K, V>
where
    K: EntityRef,
    V: Clone + Default,
{
    type Output = V;

    fn index(&self, k: K) -> &V {
        self.get(k).unwrap_or(&self.fallback)
    }
}

/// Mutable indexing allocates up to the key before handing out the slot.
impl<K, V> IndexMut<K> for SecondaryMap<K, V>
where
    K: EntityRef,
    V: Clone + Default,
{
    fn index_mut(&mut self, k: K) -> &mut V {
        self.grow_for(k);
        &mut self.values[k.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraint::ConstraintId;
    use crate::objects::ObjectId;

    #[test]
    fn primary_maps_allocate_dense_keys() {
        let mut names: PrimaryMap<ObjectId, &str> = PrimaryMap::new();
        let a = names.push("slot");
        let b = names.push("heap.0");

        assert_eq!(names[a], "slot");
        assert_eq!(names[b], "heap.0");
        assert_eq!(names.keys().collect::<Vec<_>>(), vec![a, b]);
        assert_eq!(names.next_key().index(), 2);
    }

    #[test]
    fn secondary_reads_fallback_until_written() {
        let mut hits: SecondaryMap<ConstraintId, u32> = SecondaryMap::new();
        let early = ConstraintId::new(1);
        let late = ConstraintId::new(9);

        hits[late] += 4;
        assert_eq!(hits[late], 4);

        // Writing `late` allocated everything below it with the fallback;
        // keys above the high-water mark read the fallback without being
        // allocated.
        assert_eq!(hits.get(early), Some(&0));
        assert!(hits.get(ConstraintId::new(10)).is_none());
        assert_eq!(hits[ConstraintId::new(10)], 0);
        assert_eq!(hits[early], 0);
    }

    #[test]
    fn secondary_iter_covers_allocated_slots() {
        let mut hits: SecondaryMap<ConstraintId, u32> = SecondaryMap::new();
        hits[ConstraintId::new(2)] = 7;

        let collected: Vec<(ConstraintId, u32)> =
            hits.iter().map(|(k, &v)| (k, v)).collect();
        assert_eq!(collected.len(), 3);
        assert_eq!(collected[2], (ConstraintId::new(2), 7));
    }
}
