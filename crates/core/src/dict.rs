//! Open-addressing hash directory.
//!
//! Both server roles keep their live-object directories in this table: the
//! control plane maps session id → session state, the data plane maps
//! ssrc → worker handle. Linear probing, with the table size kept odd so the
//! probe sequence is not at the mercy of the hash function's low bits.
//!
//! Sizing rules:
//! - grow to `size * 2 + 1` when occupancy/size > 0.75
//! - shrink to `max(size / 2, minsize)` (rounded up to odd) when
//!   occupancy/size < 0.25, never below `minsize`
//!
//! Deletion repairs the probe sequence by backward shifting (see
//! [`Directory::remove`]); without it, entries that collided with the
//! deleted key would become unreachable.

use std::fmt;

/// Hashing contract for directory keys.
///
/// Integer keys hash to themselves; string keys use djb2. Equality comes
/// from `Eq`. Implement this to use another key type.
pub trait DirKey: Eq {
    fn dir_hash(&self) -> u64;
}

impl DirKey for u32 {
    fn dir_hash(&self) -> u64 {
        *self as u64
    }
}

impl DirKey for u64 {
    fn dir_hash(&self) -> u64 {
        *self
    }
}

impl DirKey for String {
    /// djb2: `hash * 33 + byte`.
    fn dir_hash(&self) -> u64 {
        let mut hash: u64 = 5381;
        for b in self.as_bytes() {
            hash = hash.wrapping_mul(33).wrapping_add(*b as u64);
        }
        hash
    }
}

/// Outcome of the rebalance check that runs after a mutation.
///
/// Reported separately from the mutation result: the insert/remove itself
/// has already succeeded by the time the table considers resizing, and a
/// resize that cannot run leaves the table correct but unrebalanced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rebalance {
    /// No threshold was crossed.
    Unchanged,
    /// The table grew to `size * 2 + 1`.
    Grew,
    /// The table shrank towards `minsize`.
    Shrank,
    /// A shrink was due but the table is already at `minsize`.
    AtMinimum,
}

/// Open-addressing hash table with linear probing.
pub struct Directory<K, V> {
    cells: Vec<Option<(K, V)>>,
    occupied: usize,
    minsize: usize,
}

fn round_odd(n: usize) -> usize {
    if n % 2 == 0 { n + 1 } else { n }
}

fn empty_cells<K, V>(n: usize) -> Vec<Option<(K, V)>> {
    std::iter::repeat_with(|| None).take(n).collect()
}

impl<K: DirKey, V> Directory<K, V> {
    /// Create a table with the given minimum size (rounded up to odd, at
    /// least 3). The table never shrinks below this size.
    pub fn new(minsize: usize) -> Self {
        let minsize = round_odd(minsize.max(3));
        Directory {
            cells: empty_cells(minsize),
            occupied: 0,
            minsize,
        }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.occupied
    }

    pub fn is_empty(&self) -> bool {
        self.occupied == 0
    }

    /// Current table size (always odd, ≥ minsize).
    pub fn capacity(&self) -> usize {
        self.cells.len()
    }

    fn home(&self, key: &K) -> usize {
        (key.dir_hash() % self.cells.len() as u64) as usize
    }

    /// Probe for `key`: `Ok(slot)` when present, `Err(first_free_slot)`
    /// when absent. Occupancy is capped below the table size, so the scan
    /// always terminates.
    fn probe(&self, key: &K) -> std::result::Result<usize, usize> {
        let size = self.cells.len();
        let mut idx = self.home(key);
        loop {
            match &self.cells[idx] {
                None => return Err(idx),
                Some((k, _)) if k == key => return Ok(idx),
                Some(_) => idx = (idx + 1) % size,
            }
        }
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        let idx = self.probe(key).ok()?;
        self.cells[idx].as_ref().map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        let idx = self.probe(key).ok()?;
        self.cells[idx].as_mut().map(|(_, v)| v)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.probe(key).is_ok()
    }

    /// Insert or overwrite. Returns the previous value for the key (if any)
    /// together with the rebalance outcome.
    pub fn insert(&mut self, key: K, value: V) -> (Option<V>, Rebalance) {
        match self.probe(&key) {
            Ok(idx) => {
                let old = self.cells[idx].replace((key, value));
                (old.map(|(_, v)| v), Rebalance::Unchanged)
            }
            Err(idx) => {
                self.cells[idx] = Some((key, value));
                self.occupied += 1;
                let rebalance = if self.occupied * 4 > self.cells.len() * 3 {
                    self.rehash(self.cells.len() * 2 + 1);
                    Rebalance::Grew
                } else {
                    Rebalance::Unchanged
                };
                (None, rebalance)
            }
        }
    }

    /// Remove a key. Returns the removed value (if any) and the rebalance
    /// outcome.
    ///
    /// After the slot is emptied, subsequent entries are shifted backward
    /// when the gap lies on the cyclic path between their home slot and
    /// their current slot, so later lookups never stop at a false empty.
    pub fn remove(&mut self, key: &K) -> (Option<V>, Rebalance) {
        let Ok(idx) = self.probe(key) else {
            return (None, Rebalance::Unchanged);
        };
        let Some((_, value)) = self.cells[idx].take() else {
            return (None, Rebalance::Unchanged);
        };
        self.occupied -= 1;

        let size = self.cells.len();
        let mut gap = idx;
        let mut scan = idx;
        loop {
            scan = (scan + 1) % size;
            let Some((k, _)) = &self.cells[scan] else {
                break;
            };
            let home = (k.dir_hash() % size as u64) as usize;
            let shift = if scan > gap {
                home <= gap || home > scan
            } else {
                home <= gap && home > scan
            };
            if shift {
                self.cells[gap] = self.cells[scan].take();
                gap = scan;
            }
        }

        let rebalance = if self.occupied * 4 < self.cells.len() {
            self.shrink()
        } else {
            Rebalance::Unchanged
        };
        (Some(value), rebalance)
    }

    fn shrink(&mut self) -> Rebalance {
        if self.cells.len() == self.minsize {
            return Rebalance::AtMinimum;
        }
        let target = round_odd((self.cells.len() / 2).max(self.minsize));
        self.rehash(target);
        Rebalance::Shrank
    }

    fn rehash(&mut self, new_size: usize) {
        let old = std::mem::replace(&mut self.cells, empty_cells(new_size));
        for (key, value) in old.into_iter().flatten() {
            if let Err(slot) = self.probe(&key) {
                self.cells[slot] = Some((key, value));
            }
        }
    }

    /// Drop every entry. The table size is left as-is.
    pub fn clear(&mut self) {
        for cell in &mut self.cells {
            *cell = None;
        }
        self.occupied = 0;
    }

    /// Iterate over entries in table order.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.cells.iter().filter_map(|c| c.as_ref().map(|(k, v)| (k, v)))
    }

    /// Remove and return every entry, leaving the table empty.
    pub fn drain(&mut self) -> Vec<(K, V)> {
        self.occupied = 0;
        self.cells.iter_mut().filter_map(|c| c.take()).collect()
    }
}

impl<K: DirKey + fmt::Debug, V: fmt::Debug> fmt::Debug for Directory<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}
