//! Generational arena for IR nodes and JVM states.
//!
//! The arena provides:
//! - **Dense indices**: every item gets the next unused index, so an index
//!   doubles as a recency cue and a table key
//! - **Generation tags**: a handle remembers the generation of the slot it
//!   was issued for, so a handle to a freed (or reused) slot is detected
//!   instead of silently aliasing a newer item
//! - **Last-index reclamation**: the most recently allocated item can be
//!   popped, giving its index back to the next allocation
//!
//! Freed slots in the middle of the arena are never reused; liveness sweeps
//! walk the dense index space instead.

use std::marker::PhantomData;
use std::ops::{Index, IndexMut};

// =============================================================================
// Typed ID
// =============================================================================

/// A type-safe, generation-tagged identifier for arena-allocated items.
///
/// Traits are implemented by hand so `Id<T>` is always `Copy`/`Eq`/`Hash`
/// regardless of what `T` implements.
pub struct Id<T> {
    index: u32,
    generation: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Copy for Id<T> {}

impl<T> Clone for Id<T> {
    #[inline]
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> PartialEq for Id<T> {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}

impl<T> Eq for Id<T> {}

impl<T> PartialOrd for Id<T> {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Id<T> {
    #[inline]
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.index, self.generation).cmp(&(other.index, other.generation))
    }
}

impl<T> std::hash::Hash for Id<T> {
    #[inline]
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.index.hash(state);
        self.generation.hash(state);
    }
}

impl<T> Id<T> {
    #[inline]
    const fn with_generation(index: u32, generation: u32) -> Self {
        Id {
            index,
            generation,
            _marker: PhantomData,
        }
    }

    /// Get the raw index.
    #[inline]
    pub const fn index(self) -> u32 {
        self.index
    }

    /// Get the index as usize.
    #[inline]
    pub const fn as_usize(self) -> usize {
        self.index as usize
    }

    /// Generation of the slot this handle was issued for.
    #[inline]
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

impl<T> std::fmt::Debug for Id<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.generation == 0 {
            write!(f, "#{}", self.index)
        } else {
            write!(f, "#{}g{}", self.index, self.generation)
        }
    }
}

impl<T> std::fmt::Display for Id<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.index)
    }
}

// =============================================================================
// Arena
// =============================================================================

/// A generational arena for homogeneous items.
#[derive(Debug, Clone)]
pub struct Arena<T> {
    items: Vec<Option<T>>,
    /// Never shrinks, so a popped index keeps its generation history.
    generations: Vec<u32>,
    live: usize,
}

impl<T> Arena<T> {
    /// Create a new empty arena.
    #[inline]
    pub fn new() -> Self {
        Arena {
            items: Vec::new(),
            generations: Vec::new(),
            live: 0,
        }
    }

    /// Create a new arena with the given initial capacity.
    #[inline]
    pub fn with_capacity(capacity: usize) -> Self {
        Arena {
            items: Vec::with_capacity(capacity),
            generations: Vec::with_capacity(capacity),
            live: 0,
        }
    }

    /// Allocate a new item at the next index and return its ID.
    pub fn alloc(&mut self, item: T) -> Id<T> {
        let index = self.items.len();
        let generation = match self.generations.get_mut(index) {
            Some(g) => {
                *g = g.wrapping_add(1);
                *g
            }
            None => {
                self.generations.push(0);
                0
            }
        };
        self.items.push(Some(item));
        self.live += 1;
        Id::with_generation(index as u32, generation)
    }

    /// Check whether `id` still names a live item.
    #[inline]
    pub fn contains(&self, id: Id<T>) -> bool {
        self.get(id).is_some()
    }

    /// Get a reference to an item by ID.
    #[inline]
    pub fn get(&self, id: Id<T>) -> Option<&T> {
        if self.generations.get(id.as_usize()) != Some(&id.generation) {
            return None;
        }
        self.items.get(id.as_usize()).and_then(Option::as_ref)
    }

    /// Get a mutable reference to an item by ID.
    #[inline]
    pub fn get_mut(&mut self, id: Id<T>) -> Option<&mut T> {
        if self.generations.get(id.as_usize()) != Some(&id.generation) {
            return None;
        }
        self.items.get_mut(id.as_usize()).and_then(Option::as_mut)
    }

    /// Current handle for a live index, if any.
    #[inline]
    pub fn id_at(&self, index: usize) -> Option<Id<T>> {
        match self.items.get(index) {
            Some(Some(_)) => Some(Id::with_generation(index as u32, self.generations[index])),
            _ => None,
        }
    }

    /// Remove an item, leaving a hole at its index.
    pub fn free(&mut self, id: Id<T>) -> Option<T> {
        let index = id.as_usize();
        if self.generations.get(index) != Some(&id.generation) {
            return None;
        }
        let item = self.items.get_mut(index)?.take()?;
        self.generations[index] = self.generations[index].wrapping_add(1);
        self.live -= 1;
        Some(item)
    }

    /// Remove the most recently allocated item, giving its index back.
    ///
    /// Returns `None` if `id` is not the last index.
    pub fn pop_last(&mut self, id: Id<T>) -> Option<T> {
        if id.as_usize() + 1 != self.items.len() || !self.contains(id) {
            return None;
        }
        let item = self.items.pop().flatten()?;
        self.live -= 1;
        Some(item)
    }

    /// Number of indices handed out so far (including holes).
    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Number of live items.
    #[inline]
    pub fn live(&self) -> usize {
        self.live
    }

    /// Check if the arena holds no live items.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Iterate over all live items with their IDs.
    pub fn iter(&self) -> impl Iterator<Item = (Id<T>, &T)> {
        self.items.iter().enumerate().filter_map(move |(i, item)| {
            item.as_ref()
                .map(|item| (Id::with_generation(i as u32, self.generations[i]), item))
        })
    }

    /// Iterate over all live IDs.
    pub fn ids(&self) -> impl Iterator<Item = Id<T>> + '_ {
        self.iter().map(|(id, _)| id)
    }
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Index<Id<T>> for Arena<T> {
    type Output = T;

    #[inline]
    fn index(&self, id: Id<T>) -> &Self::Output {
        match self.get(id) {
            Some(item) => item,
            None => panic!("stale arena handle {:?}", id),
        }
    }
}

impl<T> IndexMut<Id<T>> for Arena<T> {
    #[inline]
    fn index_mut(&mut self, id: Id<T>) -> &mut Self::Output {
        match self.get_mut(id) {
            Some(item) => item,
            None => panic!("stale arena handle {:?}", id),
        }
    }
}

// =============================================================================
// Bit Set
// =============================================================================

/// A compact bit set keyed by node index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BitSet {
    bits: Vec<u64>,
}

impl BitSet {
    /// Create a new empty bit set.
    pub fn new() -> Self {
        BitSet { bits: Vec::new() }
    }

    /// Create a new bit set with capacity for `n` bits.
    pub fn with_capacity(n: usize) -> Self {
        BitSet {
            bits: vec![0; n.div_ceil(64)],
        }
    }

    /// Set a bit. Returns `true` if it was already set.
    #[inline]
    pub fn test_set(&mut self, index: usize) -> bool {
        let word = index / 64;
        if word >= self.bits.len() {
            self.bits.resize(word + 1, 0);
        }
        let mask = 1u64 << (index % 64);
        let was = self.bits[word] & mask != 0;
        self.bits[word] |= mask;
        was
    }

    /// Set a bit.
    #[inline]
    pub fn insert(&mut self, index: usize) {
        self.test_set(index);
    }

    /// Clear a bit.
    #[inline]
    pub fn remove(&mut self, index: usize) {
        if let Some(word) = self.bits.get_mut(index / 64) {
            *word &= !(1u64 << (index % 64));
        }
    }

    /// Check if a bit is set.
    #[inline]
    pub fn contains(&self, index: usize) -> bool {
        self.bits
            .get(index / 64)
            .is_some_and(|w| w & (1u64 << (index % 64)) != 0)
    }

    /// Clear all bits.
    pub fn clear(&mut self) {
        self.bits.iter_mut().for_each(|w| *w = 0);
    }

    /// Count the number of set bits.
    pub fn count(&self) -> usize {
        self.bits.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Iterate over set bit indices.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.bits.iter().enumerate().flat_map(|(word_idx, &word)| {
            (0..64).filter_map(move |bit| (word & (1u64 << bit) != 0).then_some(word_idx * 64 + bit))
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    struct Item {
        value: i32,
    }

    #[test]
    fn test_arena_alloc() {
        let mut arena: Arena<Item> = Arena::new();
        let a = arena.alloc(Item { value: 10 });
        let b = arena.alloc(Item { value: 20 });
        assert_eq!(a.index(), 0);
        assert_eq!(b.index(), 1);
        assert_eq!(arena[a].value, 10);
        arena[b].value = 200;
        assert_eq!(arena[b].value, 200);
        assert_eq!(arena.live(), 2);
    }

    #[test]
    fn test_free_leaves_hole() {
        let mut arena: Arena<Item> = Arena::new();
        let a = arena.alloc(Item { value: 1 });
        let b = arena.alloc(Item { value: 2 });
        assert_eq!(arena.free(a).map(|i| i.value), Some(1));
        assert!(arena.get(a).is_none());
        assert_eq!(arena.len(), 2);
        assert_eq!(arena.live(), 1);
        assert_eq!(arena.ids().collect::<Vec<_>>(), vec![b]);
        assert!(arena.free(a).is_none());
    }

    #[test]
    fn test_pop_last_detects_stale_handle() {
        let mut arena: Arena<Item> = Arena::new();
        let _a = arena.alloc(Item { value: 1 });
        let b = arena.alloc(Item { value: 2 });
        assert!(arena.pop_last(b).is_some());
        let c = arena.alloc(Item { value: 3 });
        assert_eq!(c.index(), b.index());
        assert_ne!(c, b);
        assert!(arena.get(b).is_none());
        assert_eq!(arena[c].value, 3);
    }

    #[test]
    fn test_pop_last_rejects_non_last() {
        let mut arena: Arena<Item> = Arena::new();
        let a = arena.alloc(Item { value: 1 });
        arena.alloc(Item { value: 2 });
        assert!(arena.pop_last(a).is_none());
        assert!(arena.contains(a));
    }

    #[test]
    #[should_panic(expected = "stale arena handle")]
    fn test_index_stale_panics() {
        let mut arena: Arena<Item> = Arena::new();
        let a = arena.alloc(Item { value: 1 });
        arena.free(a);
        let _ = arena[a].value;
    }

    #[test]
    fn test_bitset_ops() {
        let mut bits = BitSet::new();
        assert!(!bits.test_set(3));
        assert!(bits.test_set(3));
        bits.insert(130);
        assert!(bits.contains(130));
        assert_eq!(bits.count(), 2);
        assert_eq!(bits.iter().collect::<Vec<_>>(), vec![3, 130]);
        bits.remove(3);
        assert!(!bits.contains(3));
        bits.clear();
        assert_eq!(bits.count(), 0);
    }
}
