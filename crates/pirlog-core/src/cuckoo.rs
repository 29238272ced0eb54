//! Two-choice cuckoo table with fixed-depth buckets
//!
//! Every entry names two candidate buckets. Insertion takes a free slot in
//! either one; when both are full a random occupant is evicted and pushed to
//! its own alternate bucket, repeating up to a displacement bound. If the
//! bound is hit, every move is rolled back so the table is exactly as it was
//! before the call and the caller gets its entry back.

use std::fmt;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// A placed item and its two candidate buckets
#[derive(Debug, Clone)]
pub struct Entry<T> {
    pub bucket1: usize,
    pub bucket2: usize,
    pub data: T,
}

impl<T> Entry<T> {
    pub fn new(bucket1: usize, bucket2: usize, data: T) -> Self {
        Self {
            bucket1,
            bucket2,
            data,
        }
    }

    /// The candidate bucket that is not `bucket`
    fn alternate(&self, bucket: usize) -> usize {
        if self.bucket1 == bucket {
            self.bucket2
        } else {
            self.bucket1
        }
    }
}

/// Payloads must match and bucket pairs must match as unordered sets
impl<T: PartialEq> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data
            && ((self.bucket1 == other.bucket1 && self.bucket2 == other.bucket2)
                || (self.bucket1 == other.bucket2 && self.bucket2 == other.bucket1))
    }
}

/// Outcome of a successful insert
#[derive(Debug, Clone, PartialEq)]
pub enum Insertion<T> {
    /// Placed into a free slot of one of its buckets
    Inserted,
    /// An equal entry was already resident; the table is unchanged
    Resident,
    /// Placed after evicting `evicted`, which was rehomed along a chain of
    /// `moves` displacements
    Displaced { evicted: Entry<T>, moves: usize },
}

#[derive(Debug)]
pub enum CuckooError<T> {
    BucketOutOfRange { bucket: usize, num_buckets: usize },
    /// Displacement bound reached. The table is unchanged and `entry` is the
    /// rejected entry; the table needs to be resized or rebuilt.
    CapacityExceeded { displacements: usize, entry: Entry<T> },
}

impl<T> fmt::Display for CuckooError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CuckooError::BucketOutOfRange {
                bucket,
                num_buckets,
            } => write!(f, "Bucket {} out of range ({} buckets)", bucket, num_buckets),
            CuckooError::CapacityExceeded { displacements, .. } => write!(
                f,
                "Max displacements ({}) reached, table must be rebuilt",
                displacements
            ),
        }
    }
}

impl<T: fmt::Debug> std::error::Error for CuckooError<T> {}

impl<T> From<CuckooError<T>> for crate::Error {
    fn from(err: CuckooError<T>) -> Self {
        match err {
            CuckooError::BucketOutOfRange { .. } => crate::Error::Validation(err.to_string()),
            CuckooError::CapacityExceeded { displacements, .. } => {
                crate::Error::Capacity { displacements }
            }
        }
    }
}

/// Cuckoo table of `num_buckets` buckets holding `depth` entries each
#[derive(Debug)]
pub struct CuckooTable<T> {
    num_buckets: usize,
    depth: usize,
    /// Row-major: slot `s` of bucket `b` is `slots[b * depth + s]`
    slots: Vec<Option<Entry<T>>>,
    len: usize,
    max_displacements: usize,
    rng: StdRng,
}

impl<T: Clone + PartialEq> CuckooTable<T> {
    /// Create an empty table with a randomly seeded eviction policy
    pub fn new(num_buckets: usize, depth: usize, max_displacements: usize) -> Self {
        Self::with_rng(num_buckets, depth, max_displacements, StdRng::from_entropy())
    }

    /// Create an empty table whose victim choices are reproducible
    pub fn with_seed(num_buckets: usize, depth: usize, max_displacements: usize, seed: u64) -> Self {
        Self::with_rng(
            num_buckets,
            depth,
            max_displacements,
            StdRng::seed_from_u64(seed),
        )
    }

    fn with_rng(num_buckets: usize, depth: usize, max_displacements: usize, rng: StdRng) -> Self {
        Self {
            num_buckets,
            depth,
            slots: vec![None; num_buckets * depth],
            len: 0,
            max_displacements,
            rng,
        }
    }

    pub fn num_buckets(&self) -> usize {
        self.num_buckets
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Number of resident entries
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.num_buckets * self.depth
    }

    pub fn load_factor(&self) -> f64 {
        if self.capacity() == 0 {
            return 0.0;
        }
        self.len as f64 / self.capacity() as f64
    }

    /// True if an equal entry sits in either of `entry`'s buckets
    pub fn contains(&self, entry: &Entry<T>) -> bool {
        self.find(entry.bucket1, entry).is_some() || self.find(entry.bucket2, entry).is_some()
    }

    /// Insert `entry`, displacing residents if both its buckets are full.
    /// An entry already in the table is never stored twice.
    pub fn insert(&mut self, entry: Entry<T>) -> Result<Insertion<T>, CuckooError<T>> {
        for bucket in [entry.bucket1, entry.bucket2] {
            if bucket >= self.num_buckets {
                return Err(CuckooError::BucketOutOfRange {
                    bucket,
                    num_buckets: self.num_buckets,
                });
            }
        }
        if self.contains(&entry) {
            return Ok(Insertion::Resident);
        }

        for bucket in [entry.bucket1, entry.bucket2] {
            if let Some(slot) = self.free_slot(bucket) {
                self.slots[slot] = Some(entry);
                self.len += 1;
                return Ok(Insertion::Inserted);
            }
        }

        self.displace(entry)
    }

    /// Evict-and-reinsert loop. Both buckets of `entry` are full on entry.
    fn displace(&mut self, entry: Entry<T>) -> Result<Insertion<T>, CuckooError<T>> {
        let mut path: Vec<usize> = Vec::with_capacity(self.max_displacements);
        let mut first_evicted: Option<Entry<T>> = None;
        let mut bucket = if self.rng.gen_bool(0.5) {
            entry.bucket1
        } else {
            entry.bucket2
        };
        let mut current = entry;

        for moves in 1..=self.max_displacements {
            let slot = bucket * self.depth + self.rng.gen_range(0..self.depth);
            let victim = match self.slots[slot].replace(current) {
                Some(victim) => victim,
                None => {
                    // Only full buckets are chosen, so this cannot happen.
                    self.len += 1;
                    return Ok(Insertion::Inserted);
                }
            };
            path.push(slot);

            let next = victim.alternate(bucket);
            if let Some(free) = self.free_slot(next) {
                let evicted = first_evicted.take().unwrap_or_else(|| victim.clone());
                self.slots[free] = Some(victim);
                self.len += 1;
                return Ok(Insertion::Displaced { evicted, moves });
            }

            if first_evicted.is_none() {
                first_evicted = Some(victim.clone());
            }
            current = victim;
            bucket = next;
        }

        // Undo the chain: swap the homeless entry back through every slot
        // in reverse until the original entry falls out.
        let rolled_back = path.len();
        for slot in path.into_iter().rev() {
            if let Some(occupant) = self.slots[slot].as_mut() {
                std::mem::swap(occupant, &mut current);
            }
        }
        tracing::debug!(
            displacements = self.max_displacements,
            rolled_back,
            len = self.len,
            "Cuckoo insertion rolled back"
        );

        Err(CuckooError::CapacityExceeded {
            displacements: self.max_displacements,
            entry: current,
        })
    }

    /// Remove every copy of `entry` from its two buckets. Returns whether
    /// anything was removed; removing an absent entry is a no-op.
    pub fn remove(&mut self, entry: &Entry<T>) -> bool {
        let mut removed = false;
        for bucket in [entry.bucket1, entry.bucket2] {
            while let Some(slot) = self.find(bucket, entry) {
                self.slots[slot] = None;
                self.len -= 1;
                removed = true;
            }
        }
        removed
    }

    /// Entry at `slot` of `bucket`, if occupied
    pub fn get(&self, bucket: usize, slot: usize) -> Option<&Entry<T>> {
        if bucket >= self.num_buckets || slot >= self.depth {
            return None;
        }
        self.slots[bucket * self.depth + slot].as_ref()
    }

    /// Occupied slot count of `bucket`
    pub fn bucket_len(&self, bucket: usize) -> usize {
        self.bucket_slots(bucket).iter().filter(|s| s.is_some()).count()
    }

    /// Every slot in layout order (`bucket * depth + slot`)
    pub fn slots(&self) -> impl Iterator<Item = Option<&Entry<T>>> {
        self.slots.iter().map(Option::as_ref)
    }

    fn bucket_slots(&self, bucket: usize) -> &[Option<Entry<T>>] {
        let start = bucket * self.depth;
        &self.slots[start..start + self.depth]
    }

    fn free_slot(&self, bucket: usize) -> Option<usize> {
        self.bucket_slots(bucket)
            .iter()
            .position(Option::is_none)
            .map(|s| bucket * self.depth + s)
    }

    fn find(&self, bucket: usize, target: &Entry<T>) -> Option<usize> {
        if bucket >= self.num_buckets {
            return None;
        }
        self.bucket_slots(bucket)
            .iter()
            .position(|s| s.as_ref() == Some(target))
            .map(|s| bucket * self.depth + s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: u64, b1: usize, b2: usize) -> Entry<u64> {
        Entry::new(b1, b2, id)
    }

    #[test]
    fn test_entry_equality_is_unordered() {
        assert_eq!(entry(1, 2, 3), entry(1, 3, 2));
        assert_ne!(entry(1, 2, 3), entry(2, 2, 3));
        assert_ne!(entry(1, 2, 3), entry(1, 2, 4));
    }

    #[test]
    fn test_insert_contains_remove() {
        let mut table = CuckooTable::with_seed(16, 2, 32, 1);
        let e = entry(7, 3, 9);

        assert!(!table.contains(&e));
        assert_eq!(table.insert(e.clone()).unwrap(), Insertion::Inserted);
        assert!(table.contains(&e));
        assert!(table.contains(&entry(7, 9, 3)));
        assert_eq!(table.len(), 1);

        assert!(table.remove(&e));
        assert!(!table.contains(&e));
        assert!(table.is_empty());

        // idempotent
        assert!(!table.remove(&e));
        assert!(table.is_empty());
    }

    #[test]
    fn test_reinsert_keeps_single_copy() {
        let mut table = CuckooTable::with_seed(8, 2, 16, 1);
        let e = entry(4, 2, 5);
        assert_eq!(table.insert(e.clone()).unwrap(), Insertion::Inserted);
        assert_eq!(table.insert(entry(4, 5, 2)).unwrap(), Insertion::Resident);
        assert_eq!(table.len(), 1);
        assert_eq!(table.slots().flatten().filter(|s| **s == e).count(), 1);

        assert!(table.remove(&e));
        assert!(table.is_empty());
    }

    #[test]
    fn test_fills_second_bucket_before_displacing() {
        let mut table = CuckooTable::with_seed(4, 1, 8, 1);
        table.insert(entry(1, 0, 1)).unwrap();
        assert_eq!(table.insert(entry(2, 0, 1)).unwrap(), Insertion::Inserted);
        assert_eq!(table.bucket_len(0), 1);
        assert_eq!(table.bucket_len(1), 1);
    }

    #[test]
    fn test_displacement_rehomes_victim() {
        let mut table = CuckooTable::with_seed(4, 1, 8, 3);
        table.insert(entry(1, 0, 2)).unwrap();
        table.insert(entry(2, 1, 3)).unwrap();
        // buckets 0 and 1 are full; both residents have a free alternate
        let outcome = table.insert(entry(3, 0, 1)).unwrap();
        match outcome {
            Insertion::Displaced { evicted, moves } => {
                assert_eq!(moves, 1);
                assert!(evicted == entry(1, 0, 2) || evicted == entry(2, 1, 3));
            }
            other => panic!("expected displacement, got {:?}", other),
        }
        for e in [entry(1, 0, 2), entry(2, 1, 3), entry(3, 0, 1)] {
            assert!(table.contains(&e));
        }
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn test_capacity_failure_leaves_table_unchanged() {
        // Three entries competing for the same two single-slot buckets
        let mut table = CuckooTable::with_seed(2, 1, 10, 5);
        table.insert(entry(1, 0, 1)).unwrap();
        table.insert(entry(2, 0, 1)).unwrap();
        let before: Vec<Option<u64>> = table.slots().map(|s| s.map(|e| e.data)).collect();

        match table.insert(entry(3, 0, 1)) {
            Err(CuckooError::CapacityExceeded {
                displacements,
                entry: rejected,
            }) => {
                assert_eq!(displacements, 10);
                assert_eq!(rejected, entry(3, 0, 1));
            }
            other => panic!("expected capacity failure, got {:?}", other),
        }

        let after: Vec<Option<u64>> = table.slots().map(|s| s.map(|e| e.data)).collect();
        assert_eq!(before, after);
        assert!(table.contains(&entry(1, 0, 1)));
        assert!(table.contains(&entry(2, 0, 1)));
        assert!(!table.contains(&entry(3, 0, 1)));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_out_of_range_bucket() {
        let mut table: CuckooTable<u64> = CuckooTable::with_seed(4, 2, 8, 1);
        assert!(matches!(
            table.insert(entry(1, 0, 4)),
            Err(CuckooError::BucketOutOfRange { bucket: 4, .. })
        ));
        assert!(!table.contains(&entry(1, 0, 4)));
    }

    #[test]
    fn test_membership_preserved_under_load() {
        let num_buckets = 64;
        let depth = 4;
        let mut table = CuckooTable::with_seed(num_buckets, depth, 48, 42);
        let mut rng = StdRng::seed_from_u64(7);
        let mut inserted = Vec::new();

        // Fill to ~85% load, tracking only the entries the table accepted
        for id in 0..(num_buckets * depth * 85 / 100) as u64 {
            let e = entry(id, rng.gen_range(0..num_buckets), rng.gen_range(0..num_buckets));
            match table.insert(e.clone()) {
                Ok(_) => inserted.push(e),
                Err(CuckooError::CapacityExceeded { entry: back, .. }) => assert_eq!(back, e),
                Err(other) => panic!("unexpected error: {}", other),
            }
            for resident in &inserted {
                assert!(table.contains(resident), "lost entry {:?}", resident);
            }
        }

        assert_eq!(table.len(), inserted.len());
        for bucket in 0..num_buckets {
            assert!(table.bucket_len(bucket) <= depth);
        }
    }

    #[test]
    fn test_each_entry_occupies_one_slot() {
        let mut table = CuckooTable::with_seed(8, 2, 24, 9);
        let mut rng = StdRng::seed_from_u64(11);
        for id in 0..12u64 {
            let _ = table.insert(entry(id, rng.gen_range(0..8), rng.gen_range(0..8)));
        }
        let mut seen = std::collections::HashSet::new();
        for slot in table.slots().flatten() {
            assert!(seen.insert(slot.data), "entry {} stored twice", slot.data);
        }
        assert_eq!(seen.len(), table.len());
    }
}
