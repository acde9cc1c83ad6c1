use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::{Arc, Mutex};

/// Bounded adaptive cache of repository handles.
///
/// Implements the classic ARC policy: two resident lists (`t1` recently
/// seen once, `t2` seen more than once) plus two ghost lists of evicted
/// keys (`b1`, `b2`) that steer the adaptation target `p`. A linear scan
/// of cold keys grows `b1` hits and shifts capacity back toward the hot
/// set in `t2` instead of flushing it.
///
/// `get`/`put` are safe to call concurrently; the cache does not serialize
/// use of the values it hands out.
#[derive(Debug, Clone)]
pub struct RepoCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    inner: Arc<Mutex<ArcState<K, V>>>,
}

#[derive(Debug)]
struct ArcState<K, V> {
    capacity: usize,
    /// Adaptation target: preferred size of `t1`.
    p: usize,
    /// Resident, seen once. Front is LRU, back is MRU.
    t1: VecDeque<K>,
    /// Resident, seen at least twice.
    t2: VecDeque<K>,
    /// Ghosts evicted from `t1`.
    b1: VecDeque<K>,
    /// Ghosts evicted from `t2`.
    b2: VecDeque<K>,
    values: HashMap<K, V>,
}

fn remove_key<K: Eq>(list: &mut VecDeque<K>, key: &K) -> bool {
    match list.iter().position(|k| k == key) {
        Some(index) => {
            list.remove(index);
            true
        }
        None => false,
    }
}

impl<K, V> RepoCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create a cache holding at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ArcState {
                capacity: capacity.max(1),
                p: 0,
                t1: VecDeque::new(),
                t2: VecDeque::new(),
                b1: VecDeque::new(),
                b2: VecDeque::new(),
                values: HashMap::new(),
            })),
        }
    }

    /// Look up a key, promoting it to the frequent list on a hit.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut state = self.inner.lock().unwrap();
        if remove_key(&mut state.t1, key) || remove_key(&mut state.t2, key) {
            state.t2.push_back(key.clone());
            return state.values.get(key).cloned();
        }
        None
    }

    /// Insert a key, evicting per the adaptive policy to honor capacity.
    pub fn put(&self, key: K, value: V) {
        let mut state = self.inner.lock().unwrap();

        // Resident: refresh the value and promote.
        if state.values.contains_key(&key) {
            remove_key(&mut state.t1, &key);
            remove_key(&mut state.t2, &key);
            state.t2.push_back(key.clone());
            state.values.insert(key, value);
            return;
        }

        // Ghost hit in b1: recency is winning, grow p.
        if state.b1.contains(&key) {
            let delta = (state.b2.len() / state.b1.len()).max(1);
            state.p = (state.p + delta).min(state.capacity);
            remove_key(&mut state.b1, &key);
            state.evict(false);
            state.t2.push_back(key.clone());
            state.values.insert(key, value);
            return;
        }

        // Ghost hit in b2: frequency is winning, shrink p.
        if state.b2.contains(&key) {
            let delta = (state.b1.len() / state.b2.len()).max(1);
            state.p = state.p.saturating_sub(delta);
            remove_key(&mut state.b2, &key);
            state.evict(true);
            state.t2.push_back(key.clone());
            state.values.insert(key, value);
            return;
        }

        // Brand new key.
        let l1 = state.t1.len() + state.b1.len();
        if l1 == state.capacity {
            if state.t1.len() < state.capacity {
                state.b1.pop_front();
                state.evict(false);
            } else if let Some(victim) = state.t1.pop_front() {
                // b1 is empty and t1 is full: drop the LRU entry outright.
                state.values.remove(&victim);
            }
        } else {
            let total = l1 + state.t2.len() + state.b2.len();
            if total >= state.capacity {
                if total == 2 * state.capacity {
                    state.b2.pop_front();
                }
                state.evict(false);
            }
        }
        state.t1.push_back(key.clone());
        state.values.insert(key, value);
    }

    /// Number of resident entries.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().values.len()
    }

    /// True when no entries are resident.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Configured capacity.
    pub fn capacity(&self) -> usize {
        self.inner.lock().unwrap().capacity
    }
}

impl<K, V> ArcState<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Move one resident entry to the appropriate ghost list.
    ///
    /// `from_b2` marks the caller as a b2 ghost hit, which tips the
    /// boundary case toward evicting from `t1`.
    fn evict(&mut self, from_b2: bool) {
        if self.t1.len() + self.t2.len() < self.capacity {
            return;
        }
        let take_t1 = !self.t1.is_empty()
            && (self.t1.len() > self.p || (from_b2 && self.t1.len() == self.p));
        if take_t1 {
            if let Some(victim) = self.t1.pop_front() {
                self.values.remove(&victim);
                self.b1.push_back(victim);
            }
        } else if let Some(victim) = self.t2.pop_front() {
            self.values.remove(&victim);
            self.b2.push_back(victim);
        }
    }
}
