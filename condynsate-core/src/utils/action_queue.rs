/*!
Thread safe coalescing buffer of pending actions.

Producers (the main thread) [`enqueue`](GuardedActionQueue::enqueue) keyed
actions, a consumer (a worker thread) [`drain`](GuardedActionQueue::drain)s
them all at once and executes them after the lock is released.

An action enqueued with a key that is already pending replaces the pending one
in place: the consumer only ever sees the latest intent for a key, and the
buffer never holds more entries than there are distinct keys. Keys keep the
position of their first insertion, so an object creation queued before a
transform of the same object is still executed first.

Lock order: the queue lock is a leaf, nothing else is locked while holding it.
*/

use std::{collections::HashMap, hash::Hash};

use log::debug;
use parking_lot::Mutex;

use crate::logger::{is_enabled, InternalLog};

#[derive(Debug)]
struct QueueBuffer<K, A> {
    slots: Vec<(K, A)>,
    index: HashMap<K, usize>,
}

impl<K, A> Default for QueueBuffer<K, A> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            index: HashMap::new(),
        }
    }
}

#[derive(Debug)]
pub struct GuardedActionQueue<K, A> {
    buffer: Mutex<QueueBuffer<K, A>>,
}

impl<K, A> Default for GuardedActionQueue<K, A>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, A> GuardedActionQueue<K, A>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self {
            buffer: Mutex::new(QueueBuffer::default()),
        }
    }

    /// Queues `action` under `key`.
    ///
    /// ## Return
    /// `true` if a pending action with the same key was replaced.
    pub fn enqueue(&self, key: K, action: A) -> bool {
        let mut buffer = self.buffer.lock();
        if let Some(&slot) = buffer.index.get(&key) {
            buffer.slots[slot].1 = action;
            return true;
        }
        let slot = buffer.slots.len();
        buffer.index.insert(key.clone(), slot);
        buffer.slots.push((key, action));
        false
    }

    /// Takes every pending action, in first insertion order, and leaves the
    /// buffer empty.
    pub fn drain(&self) -> Vec<(K, A)> {
        let taken = {
            let mut buffer = self.buffer.lock();
            buffer.index.clear();
            std::mem::take(&mut buffer.slots)
        };
        if is_enabled(InternalLog::ActionQueue) && !taken.is_empty() {
            debug!("Drained {} pending actions", taken.len());
        }
        taken
    }

    pub fn len(&self) -> usize {
        self.buffer.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.lock().slots.is_empty()
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.buffer.lock().index.contains_key(key)
    }
}
