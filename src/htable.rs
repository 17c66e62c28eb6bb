//! Open-addressed codepoint interner: linear probing, power-of-two capacity,
//! load-factor ceiling of 0.7, optional stats and boost-on-get.

use std::sync::Mutex;

const LOAD_FACTOR_CEILING: f64 = 0.7;
const INITIAL_CAPACITY: usize = 16;

/// Diagnostic counters, present only when the `htable_stats` feature is on.
#[derive(Debug, Default, Clone, Copy)]
pub struct Stats {
    pub probes: u64,
    pub inserts: u64,
    pub resizes: u64,
    pub gets: u64,
}

#[derive(Clone)]
struct Slot<K> {
    key: K,
    value: u32,
}

struct Inner<K> {
    slots: Vec<Option<Slot<K>>>,
    len: usize,
    stats: Stats,
}

/// An open-addressed hash map from an interned key to a dense codepoint
/// index. Thread-safe via an internal mutex: the critical section is
/// O(probe-length), short enough to hold across a miss-path insert too.
pub struct HTable<K> {
    inner: Mutex<Inner<K>>,
}

impl<K> HTable<K>
where
    K: Eq + std::hash::Hash + Clone,
{
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                slots: vec_of_none(INITIAL_CAPACITY),
                len: 0,
                stats: Stats::default(),
            }),
        }
    }

    fn ideal_slot(key: &K, capacity: usize) -> usize {
        use std::hash::Hasher;
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) & (capacity - 1)
    }

    /// Looks up `key`, inserting `make_value()` on a miss. Returns the
    /// index and whether an insert occurred. `make_value` is invoked at
    /// most once, only on a genuine miss, with the lock held.
    pub fn lookup_or_insert(&self, key: &K, make_value: impl FnOnce() -> u32) -> (u32, bool) {
        let mut inner = self.inner.lock().unwrap();
        if (inner.len + 1) as f64 > inner.slots.len() as f64 * LOAD_FACTOR_CEILING {
            Self::grow(&mut inner);
        }
        let capacity = inner.slots.len();
        let ideal = Self::ideal_slot(key, capacity);
        let mut probe_len: u32 = 0;
        let mut idx = ideal;
        loop {
            match &inner.slots[idx] {
                Some(slot) if &slot.key == key => {
                    let value = slot.value;
                    inner.stats.gets += 1;
                    inner.stats.probes += probe_len as u64;
                    if cfg!(feature = "htable_boost") && probe_len > 0 {
                        Self::boost(&mut inner, idx, ideal);
                    }
                    return (value, false);
                }
                Some(_) => {
                    idx = (idx + 1) & (capacity - 1);
                    probe_len += 1;
                }
                None => {
                    let value = make_value();
                    inner.slots[idx] = Some(Slot {
                        key: key.clone(),
                        value,
                    });
                    inner.len += 1;
                    inner.stats.inserts += 1;
                    inner.stats.probes += probe_len as u64;
                    return (value, true);
                }
            }
        }
    }

    /// Swaps a found entry at `idx` with the one at its ideal slot `ideal`,
    /// shrinking the probe distance for the hot key to zero. The displaced
    /// entry remains reachable: every slot between `ideal` and `idx` is
    /// occupied (that's how linear probing found the hot key there), and the
    /// swap only permutes contents among occupied slots, so the occupied/empty
    /// structure every other key's probe sequence relies on is unchanged.
    fn boost(inner: &mut Inner<K>, idx: usize, ideal: usize) {
        if idx == ideal {
            return;
        }
        inner.slots.swap(ideal, idx);
    }

    fn grow(inner: &mut Inner<K>) {
        let old_slots = std::mem::take(&mut inner.slots);
        let new_capacity = (old_slots.len() * 2).max(INITIAL_CAPACITY);
        inner.slots = vec_of_none(new_capacity);
        inner.len = 0;
        inner.stats.resizes += 1;
        for slot in old_slots.into_iter().flatten() {
            Self::reinsert(inner, slot);
        }
    }

    fn reinsert(inner: &mut Inner<K>, slot: Slot<K>) {
        let capacity = inner.slots.len();
        let mut idx = Self::ideal_slot(&slot.key, capacity);
        loop {
            if inner.slots[idx].is_none() {
                inner.slots[idx] = Some(slot);
                inner.len += 1;
                return;
            }
            idx = (idx + 1) & (capacity - 1);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().unwrap().slots.len()
    }

    pub fn stats(&self) -> Stats {
        self.inner.lock().unwrap().stats
    }
}

impl<K> Default for HTable<K>
where
    K: Eq + std::hash::Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

fn vec_of_none<K>(capacity: usize) -> Vec<Option<Slot<K>>> {
    let mut v = Vec::with_capacity(capacity);
    for _ in 0..capacity {
        v.push(None);
    }
    v
}
