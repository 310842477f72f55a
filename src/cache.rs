//! C4 — a bounded adaptive-replacement (ARC) cache mapping round → [`Beacon`].
//!
//! Grounded on `forest_beacon::DrandBeacon`'s `local_cache` (an
//! `ahash::AHashMap` guarded by a single lock, keyed by round) generalized
//! from a plain map to the two recency/frequency lists ARC needs. Ghost
//! lists `b1`/`b2` record evicted keys (not values) so a re-add can detect
//! whether a round was recently evicted for being cold (`b1`, shift the
//! balance towards recency) or warm (`b2`, shift towards frequency).

use std::collections::VecDeque;
use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;

use crate::model::{Beacon, Round};

struct ArcState {
    t1: LruCache<Round, Beacon>,
    t2: LruCache<Round, Beacon>,
    b1: VecDeque<Round>,
    b2: VecDeque<Round>,
    /// Target size of `t1`, adapted on every ghost hit. Bounded to
    /// `[0, capacity]`.
    p: usize,
    capacity: usize,
}

impl ArcState {
    fn new(capacity: NonZeroUsize) -> Self {
        Self {
            t1: LruCache::new(capacity),
            t2: LruCache::new(capacity),
            b1: VecDeque::new(),
            b2: VecDeque::new(),
            p: 0,
            capacity: capacity.get(),
        }
    }

    fn get(&mut self, round: Round) -> Option<Beacon> {
        if let Some(v) = self.t1.pop(&round) {
            // promote: a second touch makes it frequent, not just recent.
            self.t2.put(round, v.clone());
            return Some(v);
        }
        if let Some(v) = self.t2.get(&round).cloned() {
            // re-insert to refresh LRU order inside t2.
            self.t2.put(round, v.clone());
            return Some(v);
        }
        None
    }

    fn replace(&mut self, round_in_b2: bool) {
        let t1_len = self.t1.len();
        if t1_len > 0 && (t1_len > self.p || (round_in_b2 && t1_len == self.p)) {
            if let Some((k, _)) = self.t1.pop_lru() {
                self.b1.push_back(k);
            }
        } else if let Some((k, _)) = self.t2.pop_lru() {
            self.b2.push_back(k);
        }
    }

    fn trim_ghost(list: &mut VecDeque<Round>, max_len: usize) {
        while list.len() > max_len {
            list.pop_front();
        }
    }

    fn add(&mut self, round: Round, beacon: Beacon) {
        if self.t1.contains(&round) {
            self.t1.put(round, beacon);
            return;
        }
        if self.t2.contains(&round) {
            self.t2.put(round, beacon);
            return;
        }

        if let Some(pos) = self.b1.iter().position(|r| *r == round) {
            self.b1.remove(pos);
            let delta = (self.b2.len().max(1) / self.b1.len().max(1)).max(1);
            self.p = (self.p + delta).min(self.capacity);
            self.replace(false);
            self.t2.put(round, beacon);
            return;
        }

        if let Some(pos) = self.b2.iter().position(|r| *r == round) {
            self.b2.remove(pos);
            let delta = (self.b1.len().max(1) / self.b2.len().max(1)).max(1);
            self.p = self.p.saturating_sub(delta);
            self.replace(true);
            self.t2.put(round, beacon);
            return;
        }

        // Brand new key: not present anywhere, including the ghost lists.
        let total = self.t1.len() + self.b1.len();
        if total == self.capacity {
            if self.t1.len() < self.capacity {
                self.b1.pop_front();
                self.replace(false);
            } else if let Some((k, _)) = self.t1.pop_lru() {
                // b1 is empty here by ARC's invariant; the evicted key is
                // simply dropped rather than ghosted.
                let _ = k;
            }
        } else if total < self.capacity
            && total + self.t2.len() + self.b2.len() >= self.capacity
        {
            let full = total + self.t2.len() + self.b2.len() == 2 * self.capacity;
            if full {
                self.b2.pop_front();
            }
            self.replace(false);
        }
        Self::trim_ghost(&mut self.b1, self.capacity);
        Self::trim_ghost(&mut self.b2, self.capacity);
        self.t1.put(round, beacon);
    }
}

/// Bounded cache of verified [`Beacon`]s, keyed by round. A capacity of
/// zero constructs a no-op sentinel: [`Cache::try_get`] always misses and
/// [`Cache::add`] is a no-op, per spec §4.2.
pub struct Cache {
    inner: Option<Mutex<ArcState>>,
}

impl Cache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: NonZeroUsize::new(capacity).map(|cap| Mutex::new(ArcState::new(cap))),
        }
    }

    pub fn is_disabled(&self) -> bool {
        self.inner.is_none()
    }

    pub fn try_get(&self, round: Round) -> Option<Beacon> {
        self.inner.as_ref()?.lock().get(round)
    }

    /// Inserts under `beacon.round`, never under a caller-supplied round
    /// argument — see spec §4.7 and the builder's "cache under the
    /// resolved round" decision in `DESIGN.md`.
    pub fn add(&self, beacon: Beacon) {
        if let Some(inner) = &self.inner {
            inner.lock().add(beacon.round, beacon);
        }
    }
}
