//! Bounded, prioritized experience store.
//!
//! Transitions are sampled with probability proportional to their priority
//! (with replacement). When the store is full, the lowest-priority
//! transition is evicted, oldest first among ties.
//!
//! Priorities never drop below the configured floor, so every stored
//! transition keeps a non-zero chance of being replayed.
//!
//! The store uses interior mutability with `RwLock` so the orchestrator and
//! the outcome analyzer can share it behind a plain reference.

use std::collections::BTreeSet;
use std::sync::RwLock;

use rand::Rng;
use rustc_hash::FxHashMap;

use crate::rl::config::ReplayConfig;
use crate::rl::error::{Error, Result};
use crate::rl::types::{EpisodeId, Transition};

/// Binary sum tree over slot priorities for O(log n) proportional sampling.
#[derive(Debug)]
struct SumTree {
    leaves: usize,
    nodes: Vec<f64>,
}

impl SumTree {
    fn new(capacity: usize) -> Self {
        let leaves = capacity.max(1).next_power_of_two();
        Self {
            leaves,
            nodes: vec![0.0; 2 * leaves],
        }
    }

    fn total(&self) -> f64 {
        self.nodes[1]
    }

    fn set(&mut self, slot: usize, value: f64) {
        let mut i = self.leaves + slot;
        self.nodes[i] = value;
        while i > 1 {
            i /= 2;
            self.nodes[i] = self.nodes[2 * i] + self.nodes[2 * i + 1];
        }
    }

    /// Leaf whose cumulative range contains `target`.
    fn find(&self, mut target: f64) -> usize {
        let mut i = 1;
        while i < self.leaves {
            let left = 2 * i;
            if target < self.nodes[left] || self.nodes[left + 1] <= 0.0 {
                i = left;
            } else {
                target -= self.nodes[left];
                i = left + 1;
            }
        }
        i - self.leaves
    }
}

#[derive(Debug)]
struct Entry {
    seq: u64,
    transition: Transition,
}

#[derive(Debug)]
struct Inner {
    slots: Vec<Option<Entry>>,
    free: Vec<usize>,
    tree: SumTree,
    /// (priority bits, insertion seq, slot). Positive finite f64 bits order like the values.
    by_priority: BTreeSet<(u64, u64, usize)>,
    by_episode: FxHashMap<EpisodeId, Vec<usize>>,
    next_seq: u64,
    len: usize,
}

impl Inner {
    fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            free: (0..capacity).rev().collect(),
            tree: SumTree::new(capacity),
            by_priority: BTreeSet::new(),
            by_episode: FxHashMap::default(),
            next_seq: 0,
            len: 0,
        }
    }

    fn evict_lowest(&mut self) -> Option<Transition> {
        let &(bits, seq, slot) = self.by_priority.iter().next()?;
        self.by_priority.remove(&(bits, seq, slot));
        let entry = self.slots[slot].take()?;
        self.tree.set(slot, 0.0);
        self.free.push(slot);
        self.len -= 1;

        let episode = entry.transition.episode;
        if let Some(list) = self.by_episode.get_mut(&episode) {
            list.retain(|&s| s != slot);
            if list.is_empty() {
                self.by_episode.remove(&episode);
            }
        }
        Some(entry.transition)
    }

    fn set_priority(&mut self, slot: usize, priority: f64) {
        let Some(entry) = self.slots[slot].as_mut() else {
            return;
        };
        let old = entry.transition.priority;
        self.by_priority.remove(&(old.to_bits(), entry.seq, slot));
        self.by_priority.insert((priority.to_bits(), entry.seq, slot));
        entry.transition.priority = priority;
        self.tree.set(slot, priority);
    }
}

/// Prioritized replay buffer.
#[derive(Debug)]
pub struct ExperienceStore {
    config: ReplayConfig,
    inner: RwLock<Inner>,
}

impl ExperienceStore {
    /// Create an empty store sized by `config.capacity`.
    pub fn new(config: ReplayConfig) -> Self {
        let inner = Inner::new(config.capacity);
        Self {
            config,
            inner: RwLock::new(inner),
        }
    }

    /// Maximum number of stored transitions.
    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    /// Number of stored transitions.
    pub fn len(&self) -> usize {
        self.inner.read().unwrap().len
    }

    /// True if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sum of all stored priorities.
    pub fn total_priority(&self) -> f64 {
        self.inner.read().unwrap().tree.total()
    }

    /// Clamp a priority to the floor. Non-finite values fall back to the floor.
    pub fn sanitize(&self, priority: f64) -> f64 {
        if priority.is_finite() {
            priority.max(self.config.priority_floor)
        } else {
            self.config.priority_floor
        }
    }

    /// Priority for a fresh transition: larger for high-magnitude rewards,
    /// boosted for terminal steps.
    pub fn initial_priority(&self, reward: f64, done: bool) -> f64 {
        let c = &self.config;
        let mut priority = c.base_priority + c.reward_priority_weight * reward.abs();
        if done {
            priority *= c.terminal_priority_boost;
        }
        self.sanitize(priority)
    }

    /// Insert a transition, evicting the lowest-priority one when full.
    ///
    /// # Returns
    /// The evicted transition, if any.
    pub fn add(&self, mut transition: Transition) -> Option<Transition> {
        transition.priority = self.sanitize(transition.priority);
        let mut inner = self.inner.write().unwrap();

        let evicted = if inner.free.is_empty() {
            inner.evict_lowest()
        } else {
            None
        };
        let Some(slot) = inner.free.pop() else {
            return evicted;
        };

        let seq = inner.next_seq;
        inner.next_seq += 1;
        let priority = transition.priority;
        inner.by_priority.insert((priority.to_bits(), seq, slot));
        inner.by_episode.entry(transition.episode).or_default().push(slot);
        inner.tree.set(slot, priority);
        inner.slots[slot] = Some(Entry { seq, transition });
        inner.len += 1;
        evicted
    }

    /// Draw `batch_size` transitions with probability proportional to priority.
    ///
    /// Fails with [`Error::InsufficientData`] when fewer than `batch_size`
    /// transitions are stored.
    pub fn sample<R: Rng + ?Sized>(&self, batch_size: usize, rng: &mut R) -> Result<Vec<Transition>> {
        let inner = self.inner.read().unwrap();
        if inner.len < batch_size {
            return Err(Error::InsufficientData {
                available: inner.len,
                requested: batch_size,
            });
        }

        let total = inner.tree.total();
        let mut batch = Vec::with_capacity(batch_size);
        while batch.len() < batch_size {
            let target = rng.gen::<f64>() * total;
            let slot = inner.tree.find(target);
            if let Some(entry) = inner.slots.get(slot).and_then(|s| s.as_ref()) {
                batch.push(entry.transition.clone());
            }
        }
        Ok(batch)
    }

    /// Multiply the priority of every stored transition of `episode`.
    ///
    /// # Returns
    /// Number of transitions updated (evicted ones are skipped).
    pub fn reprioritize(&self, episode: EpisodeId, multiplier: f64) -> usize {
        self.reprioritize_with(episode, |_| multiplier)
    }

    /// Multiply each stored transition of `episode` by a per-step factor.
    pub fn reprioritize_with<F>(&self, episode: EpisodeId, multiplier: F) -> usize
    where
        F: Fn(u32) -> f64,
    {
        let mut inner = self.inner.write().unwrap();
        let Some(slots) = inner.by_episode.get(&episode).cloned() else {
            return 0;
        };
        let mut updated = 0;
        for slot in slots {
            let current = match inner.slots[slot].as_ref() {
                Some(entry) => (entry.transition.step, entry.transition.priority),
                None => continue,
            };
            let (step, old) = current;
            let priority = self.sanitize(old * multiplier(step));
            inner.set_priority(slot, priority);
            updated += 1;
        }
        updated
    }

    /// `(step, priority)` of the stored transitions of an episode, by step.
    pub fn episode_priorities(&self, episode: EpisodeId) -> Vec<(u32, f64)> {
        let inner = self.inner.read().unwrap();
        let mut out: Vec<(u32, f64)> = inner
            .by_episode
            .get(&episode)
            .map(|slots| {
                slots
                    .iter()
                    .filter_map(|&s| inner.slots[s].as_ref())
                    .map(|e| (e.transition.step, e.transition.priority))
                    .collect()
            })
            .unwrap_or_default();
        out.sort_by_key(|&(step, _)| step);
        out
    }

    /// Smallest stored priority.
    pub fn min_priority(&self) -> Option<f64> {
        let inner = self.inner.read().unwrap();
        inner.by_priority.iter().next().map(|&(bits, _, _)| f64::from_bits(bits))
    }

    /// Drop every transition.
    pub fn clear(&self) {
        let mut inner = self.inner.write().unwrap();
        *inner = Inner::new(self.config.capacity);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::rl::types::{Action, Observation};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::Arc;

    pub(crate) fn transition(episode: u64, step: u32, reward: f64, priority: f64) -> Transition {
        let obs = Arc::new(Observation::blank(4, 3, 2));
        Transition {
            episode: EpisodeId(episode),
            step,
            observation: obs.clone(),
            action: Action::new(0, 2, 1),
            reward,
            next_observation: obs,
            done: false,
            priority,
        }
    }

    fn store(capacity: usize) -> ExperienceStore {
        ExperienceStore::new(ReplayConfig {
            capacity,
            ..Default::default()
        })
    }

    #[test]
    fn test_size_never_exceeds_capacity() {
        let store = store(8);
        for i in 0..50 {
            store.add(transition(i / 5, (i % 5) as u32, 0.0, 1.0 + i as f64));
            assert!(store.len() <= 8);
        }
        assert_eq!(store.len(), 8);
    }

    #[test]
    fn test_evicts_lowest_priority_oldest_first() {
        let store = store(3);
        store.add(transition(0, 0, 0.0, 1.0));
        store.add(transition(0, 1, 0.0, 5.0));
        store.add(transition(0, 2, 0.0, 1.0));

        let evicted = store.add(transition(1, 0, 0.0, 3.0)).unwrap();
        assert_eq!(evicted.step, 0);
        let evicted = store.add(transition(1, 1, 0.0, 3.0)).unwrap();
        assert_eq!((evicted.episode, evicted.step), (EpisodeId(0), 2));
        assert_eq!(store.episode_priorities(EpisodeId(0)), vec![(1, 5.0)]);
    }

    #[test]
    fn test_insufficient_data() {
        let store = store(100);
        for i in 0..10 {
            store.add(transition(0, i, 0.0, 1.0));
        }
        let mut rng = StdRng::seed_from_u64(1);
        match store.sample(32, &mut rng) {
            Err(Error::InsufficientData { available, requested }) => {
                assert_eq!((available, requested), (10, 32));
            }
            other => panic!("expected InsufficientData, got {:?}", other.map(|b| b.len())),
        }
        assert_eq!(store.sample(10, &mut rng).unwrap().len(), 10);
    }

    #[test]
    fn test_sampling_monotone_in_priority() {
        let store = store(16);
        store.add(transition(0, 0, 0.0, 1.0));
        store.add(transition(0, 1, 0.0, 4.0));
        store.add(transition(0, 2, 0.0, 16.0));

        let mut rng = StdRng::seed_from_u64(42);
        let mut counts = [0usize; 3];
        for _ in 0..3000 {
            for t in store.sample(3, &mut rng).unwrap() {
                counts[t.step as usize] += 1;
            }
        }
        assert!(counts[0] < counts[1] && counts[1] < counts[2], "{:?}", counts);
        assert!(counts[0] > 0);
    }

    #[test]
    fn test_priority_floor_enforced() {
        let store = store(4);
        store.add(transition(0, 0, 0.0, 0.0));
        store.add(transition(0, 1, 0.0, f64::NAN));
        store.add(transition(0, 2, 0.0, -3.0));
        assert_eq!(store.min_priority(), Some(ReplayConfig::default().priority_floor));

        store.reprioritize(EpisodeId(0), 0.0);
        for (_, p) in store.episode_priorities(EpisodeId(0)) {
            assert!(p >= ReplayConfig::default().priority_floor);
        }
    }

    #[test]
    fn test_reprioritize_episode() {
        let store = store(10);
        for step in 0..4 {
            store.add(transition(3, step, 0.0, 1.0));
        }
        store.add(transition(4, 0, 0.0, 1.0));

        let updated = store.reprioritize_with(EpisodeId(3), |step| if step >= 2 { 3.0 } else { 1.5 });
        assert_eq!(updated, 4);
        assert_eq!(
            store.episode_priorities(EpisodeId(3)),
            vec![(0, 1.5), (1, 1.5), (2, 3.0), (3, 3.0)]
        );
        assert_eq!(store.episode_priorities(EpisodeId(4)), vec![(0, 1.0)]);
        assert!((store.total_priority() - 10.0).abs() < 1e-9);
        assert_eq!(store.reprioritize(EpisodeId(99), 2.0), 0);
    }

    #[test]
    fn test_initial_priority_favours_large_rewards_and_terminals() {
        let store = store(4);
        let quiet = store.initial_priority(0.0, false);
        let loud = store.initial_priority(-40.0, false);
        let terminal = store.initial_priority(0.0, true);
        assert!(loud > quiet);
        assert!(terminal > quiet);
    }
}
