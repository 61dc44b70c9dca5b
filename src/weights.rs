//! Weight state with lazily maintained averages
//!
//! The averaged weights after `T` processed examples are `(1/T) Σ w_t`, where
//! `w_t` is the raw weight state after example `t`. Neither representation
//! touches unchanged weights per example: the explicit vector keeps a running
//! sum and a timestamp per feature, and each support example knows when it
//! was added.

use crate::kernel::KernelFunction;
use crate::types::FeatureVector;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Which weights to score with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreMode {
    Raw,
    Averaged,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
struct Accumulator {
    sum: f64,
    /// Last example index folded into `sum`.
    stamp: u64,
}

/// Explicit sparse weight vector.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinearWeights {
    weights: FeatureVector,
    averaged: FeatureVector,
    accumulators: BTreeMap<u32, Accumulator>,
}

impl LinearWeights {
    pub fn raw(&self) -> &FeatureVector {
        &self.weights
    }

    pub fn averaged(&self) -> &FeatureVector {
        &self.averaged
    }

    /// `w += step * (gold - competitor)` during example `now`.
    pub fn update(&mut self, gold: &FeatureVector, competitor: &FeatureVector, step: f64, now: u64) {
        let delta = gold.diff(competitor);
        for (id, value) in delta.iter() {
            let current = self.weights.get(id);
            let acc = self.accumulators.entry(id).or_default();
            // `current` has been in place for every example since the last stamp.
            let held = now.saturating_sub(1).saturating_sub(acc.stamp);
            acc.sum += current * held as f64;
            acc.stamp = now.saturating_sub(1);
            self.weights.set(id, current + step * value);
        }
    }

    /// Fold everything up to example `now` and recompute the averages.
    pub fn materialize(&mut self, now: u64) {
        if now == 0 {
            self.averaged = self.weights.clone();
            return;
        }
        let mut averaged = FeatureVector::new();
        for (&id, acc) in self.accumulators.iter_mut() {
            let held = now.saturating_sub(acc.stamp);
            acc.sum += self.weights.get(id) * held as f64;
            acc.stamp = now;
            averaged.set(id, acc.sum / now as f64);
        }
        self.averaged = averaged;
    }

    fn score(&self, kernel: &dyn KernelFunction, features: &FeatureVector, mode: ScoreMode) -> f64 {
        match mode {
            ScoreMode::Raw => kernel.apply(&self.weights, features),
            ScoreMode::Averaged => kernel.apply(&self.averaged, features),
        }
    }

    fn feature_ids(&self, ids: &mut BTreeSet<u32>) {
        ids.extend(self.weights.ids());
        ids.extend(self.averaged.ids());
        ids.extend(self.accumulators.keys().copied());
    }

    fn remap(&mut self, old_to_new: &BTreeMap<u32, u32>) {
        self.weights.remap(old_to_new);
        self.averaged.remap(old_to_new);
        self.accumulators = std::mem::take(&mut self.accumulators)
            .into_iter()
            .filter_map(|(id, acc)| old_to_new.get(&id).map(|&new| (new, acc)))
            .collect();
    }
}

/// One retained training example of a kernelized model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupportVector {
    pub features: FeatureVector,
    pub coefficient: f64,
    /// Example index at which this vector was added.
    pub born: u64,
    pub averaged: f64,
}

/// Retained `(features, coefficient)` pairs, optionally bounded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SupportSet {
    vectors: Vec<SupportVector>,
    capacity: Option<usize>,
}

impl SupportSet {
    pub fn with_capacity(capacity: Option<usize>) -> Self {
        Self {
            vectors: Vec::new(),
            capacity,
        }
    }

    pub fn vectors(&self) -> &[SupportVector] {
        &self.vectors
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Append `(gold, +step)` and `(competitor, -step)` at example `now`.
    ///
    /// Returns how many vectors were evicted to stay within capacity.
    pub fn update(&mut self, gold: &FeatureVector, competitor: &FeatureVector, step: f64, now: u64) -> usize {
        for (features, coefficient) in [(gold, step), (competitor, -step)] {
            self.vectors.push(SupportVector {
                features: features.clone(),
                coefficient,
                born: now,
                averaged: 0.0,
            });
        }
        self.evict()
    }

    fn evict(&mut self) -> usize {
        let capacity = match self.capacity {
            Some(capacity) if self.vectors.len() > capacity => capacity,
            _ => return 0,
        };
        let excess = self.vectors.len() - capacity;
        // Smallest |coefficient| first; ties go to the oldest.
        let mut order: Vec<usize> = (0..self.vectors.len()).collect();
        order.sort_by(|&a, &b| {
            let ca = self.vectors[a].coefficient.abs();
            let cb = self.vectors[b].coefficient.abs();
            ca.total_cmp(&cb).then(a.cmp(&b))
        });
        let doomed: BTreeSet<usize> = order.into_iter().take(excess).collect();
        let mut index = 0;
        self.vectors.retain(|_| {
            let keep = !doomed.contains(&index);
            index += 1;
            keep
        });
        excess
    }

    pub fn materialize(&mut self, now: u64) {
        for v in &mut self.vectors {
            v.averaged = if now == 0 {
                v.coefficient
            } else {
                let alive = (now + 1).saturating_sub(v.born);
                v.coefficient * alive as f64 / now as f64
            };
        }
    }

    fn score(&self, kernel: &dyn KernelFunction, features: &FeatureVector, mode: ScoreMode) -> f64 {
        self.vectors
            .iter()
            .map(|v| {
                let weight = match mode {
                    ScoreMode::Raw => v.coefficient,
                    ScoreMode::Averaged => v.averaged,
                };
                if weight == 0.0 {
                    0.0
                } else {
                    weight * kernel.apply(&v.features, features)
                }
            })
            .sum()
    }

    fn feature_ids(&self, ids: &mut BTreeSet<u32>) {
        for v in &self.vectors {
            ids.extend(v.features.ids());
        }
    }

    fn remap(&mut self, old_to_new: &BTreeMap<u32, u32>) {
        for v in &mut self.vectors {
            v.features.remap(old_to_new);
        }
    }
}

/// The two model variants share all training logic and differ only here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Weights {
    Linear(LinearWeights),
    Kernel(SupportSet),
}

impl Weights {
    pub fn variant(&self) -> &'static str {
        match self {
            Weights::Linear(_) => "linear",
            Weights::Kernel(_) => "kernel",
        }
    }

    pub fn score(&self, kernel: &dyn KernelFunction, features: &FeatureVector, mode: ScoreMode) -> f64 {
        match self {
            Weights::Linear(w) => w.score(kernel, features, mode),
            Weights::Kernel(s) => s.score(kernel, features, mode),
        }
    }

    /// Apply one perceptron update; returns the number of evicted support vectors.
    pub fn update(&mut self, gold: &FeatureVector, competitor: &FeatureVector, step: f64, now: u64) -> usize {
        match self {
            Weights::Linear(w) => {
                w.update(gold, competitor, step, now);
                0
            }
            Weights::Kernel(s) => s.update(gold, competitor, step, now),
        }
    }

    pub fn materialize(&mut self, now: u64) {
        match self {
            Weights::Linear(w) => w.materialize(now),
            Weights::Kernel(s) => s.materialize(now),
        }
    }

    /// Every feature id the weights refer to.
    pub fn feature_ids(&self) -> BTreeSet<u32> {
        let mut ids = BTreeSet::new();
        match self {
            Weights::Linear(w) => w.feature_ids(&mut ids),
            Weights::Kernel(s) => s.feature_ids(&mut ids),
        }
        ids
    }

    pub fn remap(&mut self, old_to_new: &BTreeMap<u32, u32>) {
        match self {
            Weights::Linear(w) => w.remap(old_to_new),
            Weights::Kernel(s) => s.remap(old_to_new),
        }
    }
}
