//! Eviction-ordered multimap.
//!
//! Every key holds an ordered list of values (newest first), and one recency
//! list runs across all values of all keys, so eviction always removes the
//! globally least recently written value.
//!
//! Slots live in an arena and are linked by index. Reads never change the
//! recency order; only writes do.

use std::collections::HashMap;
use std::hash::Hash;

type Listener<V> = Box<dyn FnMut(&V) + Send>;

struct Slot<K, V> {
    key: K,
    value: V,
    prev: Option<usize>,
    next: Option<usize>,
}

pub struct LruMultimap<K, V> {
    slots: Vec<Option<Slot<K, V>>>,
    free: Vec<usize>,
    index: HashMap<K, Vec<usize>>,
    /// Most recently written
    head: Option<usize>,
    /// Least recently written
    tail: Option<usize>,
    len: usize,
    max_size: usize,
    listeners: Vec<Listener<V>>,
}

impl<K, V> LruMultimap<K, V>
where
    K: Hash + Eq + Clone,
{
    /// Create a multimap holding at most `max_size` values in total.
    pub fn new(max_size: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            index: HashMap::new(),
            head: None,
            tail: None,
            len: 0,
            max_size,
            listeners: Vec::new(),
        }
    }

    /// Total number of values.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of keys.
    pub fn map_len(&self) -> usize {
        self.index.len()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Register a callback run for every value leaving the map.
    ///
    /// Listeners run in registration order.
    pub fn add_eviction_listener<F>(&mut self, listener: F)
    where
        F: FnMut(&V) + Send + 'static,
    {
        self.listeners.push(Box::new(listener));
    }

    /// Read the value `selector` picks from the key's list, newest first.
    pub fn get_single<F>(&self, key: &K, selector: F) -> Option<&V>
    where
        F: FnOnce(&[&V]) -> Option<usize>,
    {
        let slot = self.select(key, selector)?;
        self.slots[slot].as_ref().map(|s| &s.value)
    }

    /// Insert `value` under `key`.
    ///
    /// When `selector` picks an existing value, that value is replaced in
    /// place and reported to the listeners. Otherwise the value is prepended
    /// to the key's list, and if the map grows past `max_size` the globally
    /// eldest value is evicted. Either way the written slot becomes the most
    /// recent.
    pub fn put_single<F>(&mut self, key: K, value: V, selector: F)
    where
        F: FnOnce(&[&V]) -> Option<usize>,
    {
        if let Some(idx) = self.select(&key, selector) {
            let old = match self.slots[idx].as_mut() {
                Some(slot) => std::mem::replace(&mut slot.value, value),
                None => return,
            };
            self.notify(&old);
            self.unlink(idx);
            self.push_front(idx);
            return;
        }

        let slot = Slot {
            key: key.clone(),
            value,
            prev: None,
            next: None,
        };
        let idx = match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(slot);
                idx
            }
            None => {
                self.slots.push(Some(slot));
                self.slots.len() - 1
            }
        };
        self.push_front(idx);
        self.index.entry(key).or_default().insert(0, idx);
        self.len += 1;

        if self.len > self.max_size {
            self.evict_eldest();
        }
    }

    /// Remove the value `selector` picks, reporting it to the listeners.
    pub fn remove<F>(&mut self, key: &K, selector: F) -> Option<V>
    where
        F: FnOnce(&[&V]) -> Option<usize>,
    {
        let idx = self.select(key, selector)?;
        let value = self.take(idx)?;
        self.notify(&value);
        Some(value)
    }

    /// Evict the globally least recently written value.
    ///
    /// Returns `false` when the map is empty.
    pub fn evict_eldest(&mut self) -> bool {
        match self.tail {
            Some(idx) => {
                if let Some(value) = self.take(idx) {
                    self.notify(&value);
                }
                true
            }
            None => false,
        }
    }

    /// Remove every value of `key`, oldest first.
    pub fn evict_all(&mut self, key: &K) {
        let Some(slots) = self.index.get(key).cloned() else {
            return;
        };
        for idx in slots.into_iter().rev() {
            if let Some(value) = self.take(idx) {
                self.notify(&value);
            }
        }
    }

    /// Remove every value in eviction order.
    pub fn clear(&mut self) {
        while self.evict_eldest() {}
    }

    /// Values of `key`, newest first.
    pub fn values<'a>(&'a self, key: &K) -> impl Iterator<Item = &'a V> + 'a {
        self.index
            .get(key)
            .into_iter()
            .flatten()
            .filter_map(|&idx| self.slots[idx].as_ref().map(|s| &s.value))
    }

    /// Every value, most recently written first.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> + '_ {
        let mut cursor = self.head;
        std::iter::from_fn(move || {
            let slot = self.slots[cursor?].as_ref()?;
            cursor = slot.next;
            Some((&slot.key, &slot.value))
        })
    }

    fn select<F>(&self, key: &K, selector: F) -> Option<usize>
    where
        F: FnOnce(&[&V]) -> Option<usize>,
    {
        let slots = self.index.get(key)?;
        let values: Vec<&V> = slots
            .iter()
            .filter_map(|&idx| self.slots[idx].as_ref().map(|s| &s.value))
            .collect();
        let pos = selector(&values)?;
        slots.get(pos).copied()
    }

    /// Detach a slot from every structure and hand back its value.
    fn take(&mut self, idx: usize) -> Option<V> {
        self.unlink(idx);
        let slot = self.slots.get_mut(idx)?.take()?;
        self.free.push(idx);
        self.len -= 1;

        if let Some(list) = self.index.get_mut(&slot.key) {
            list.retain(|&i| i != idx);
            if list.is_empty() {
                self.index.remove(&slot.key);
            }
        }
        Some(slot.value)
    }

    fn notify(&mut self, value: &V) {
        for listener in self.listeners.iter_mut() {
            listener(value);
        }
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = match self.slots[idx].as_mut() {
            Some(slot) => (slot.prev.take(), slot.next.take()),
            None => return,
        };

        match prev {
            Some(p) => {
                if let Some(slot) = self.slots[p].as_mut() {
                    slot.next = next;
                }
            }
            None if self.head == Some(idx) => self.head = next,
            None => {}
        }
        match next {
            Some(n) => {
                if let Some(slot) = self.slots[n].as_mut() {
                    slot.prev = prev;
                }
            }
            None if self.tail == Some(idx) => self.tail = prev,
            None => {}
        }
    }

    fn push_front(&mut self, idx: usize) {
        let old_head = self.head;
        if let Some(slot) = self.slots[idx].as_mut() {
            slot.prev = None;
            slot.next = old_head;
        }
        if let Some(h) = old_head {
            if let Some(slot) = self.slots[h].as_mut() {
                slot.prev = Some(idx);
            }
        }
        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
    }
}

impl<K, V> std::fmt::Debug for LruMultimap<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LruMultimap")
            .field("len", &self.len)
            .field("keys", &self.index.len())
            .field("max_size", &self.max_size)
            .finish()
    }
}
