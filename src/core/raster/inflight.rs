//! In-flight deduplication of expensive work.

use crate::core::timeout::Deadline;
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Map from key to the callers waiting on that key's work
///
/// The first caller for a key runs the work. Callers arriving while it runs
/// register a channel and wait on it, each bounded by its own deadline, then
/// receive a clone of the leader's value. The slot is removed once the work
/// completes, so later callers start fresh (and will normally be served by
/// the cache the work populated).
///
/// If the leader unwinds without a value its slot is dropped, and waiting
/// callers start over; one of them becomes the new leader.
pub struct InFlight<K, V> {
    slots: Mutex<HashMap<K, Vec<Sender<V>>>>,
}

/// How a caller obtained its value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Participation {
    /// This caller ran the work
    Led,
    /// Another caller ran the work and this one waited for it
    Joined,
}

/// A joining caller's deadline passed before the leader finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitExpired {
    pub waited: Duration,
}

/// Removes the leader's slot on every exit path, unwinding included
struct Lead<'a, K: Eq + Hash, V> {
    owner: &'a InFlight<K, V>,
    key: Option<K>,
}

impl<K: Eq + Hash, V> Lead<'_, K, V> {
    fn finish(mut self) -> Vec<Sender<V>> {
        match self.key.take() {
            Some(key) => self.owner.lock().remove(&key).unwrap_or_default(),
            None => Vec::new(),
        }
    }
}

impl<K: Eq + Hash, V> Drop for Lead<'_, K, V> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            // Dropping the senders wakes the waiters
            self.owner.lock().remove(&key);
        }
    }
}

impl<K: Eq + Hash, V> InFlight<K, V> {
    fn lock(&self) -> MutexGuard<'_, HashMap<K, Vec<Sender<V>>>> {
        // The map holds no invariant a panicking holder could break
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<K, V> InFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Run `work` for `key` unless an identical run is already in flight
    ///
    /// A caller that joins another's run waits at most until `deadline`.
    pub fn run<F>(&self, key: K, deadline: Deadline, work: F) -> Result<(V, Participation), WaitExpired>
    where
        F: FnOnce() -> V,
    {
        let started = Instant::now();
        loop {
            let joined = {
                let mut slots = self.lock();
                if let Some(waiters) = slots.get_mut(&key) {
                    let (sender, receiver) = bounded(1);
                    waiters.push(sender);
                    Some(receiver)
                } else {
                    slots.insert(key.clone(), Vec::new());
                    None
                }
            };
            let Some(receiver) = joined else {
                return Ok((self.lead(key, work), Participation::Led));
            };

            let received = match deadline.remaining() {
                Some(left) => receiver.recv_timeout(left),
                None => receiver.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };
            match received {
                Ok(value) => return Ok((value, Participation::Joined)),
                Err(RecvTimeoutError::Timeout) => {
                    return Err(WaitExpired {
                        waited: started.elapsed(),
                    })
                }
                Err(RecvTimeoutError::Disconnected) => {
                    if deadline.is_expired() {
                        return Err(WaitExpired {
                            waited: started.elapsed(),
                        });
                    }
                }
            }
        }
    }

    fn lead<F>(&self, key: K, work: F) -> V
    where
        F: FnOnce() -> V,
    {
        let lead = Lead {
            owner: self,
            key: Some(key),
        };
        let value = work();
        for waiter in lead.finish() {
            // A waiter whose deadline passed has already hung up
            let _ = waiter.send(value.clone());
        }
        value
    }

    /// Number of keys with work currently in flight
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K, V> Default for InFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}
