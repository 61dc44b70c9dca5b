//! Core type definitions for candidate reranking

use crate::features::FeatureExtractor;
use crate::symbols::Symbols;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Sparse feature vector keyed by symbol id. Zero entries are never stored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    entries: BTreeMap<u32, f64>,
}

impl FeatureVector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: u32) -> f64 {
        self.entries.get(&id).copied().unwrap_or(0.0)
    }

    pub fn set(&mut self, id: u32, value: f64) {
        if value == 0.0 {
            self.entries.remove(&id);
        } else {
            self.entries.insert(id, value);
        }
    }

    /// Add `delta` to feature `id`.
    pub fn increment(&mut self, id: u32, delta: f64) {
        let value = self.get(id) + delta;
        self.set(id, value);
    }

    /// `self += scale * other`
    pub fn add_scaled(&mut self, other: &FeatureVector, scale: f64) {
        for (&id, &value) in &other.entries {
            self.increment(id, scale * value);
        }
    }

    /// `self - other` as a new vector.
    pub fn diff(&self, other: &FeatureVector) -> FeatureVector {
        let mut out = self.clone();
        out.add_scaled(other, -1.0);
        out
    }

    pub fn dot(&self, other: &FeatureVector) -> f64 {
        // Walk the shorter vector.
        let (small, large) = if self.len() <= other.len() {
            (self, other)
        } else {
            (other, self)
        };
        small
            .entries
            .iter()
            .map(|(&id, &value)| value * large.get(id))
            .sum()
    }

    pub fn l2_norm_sq(&self) -> f64 {
        self.entries.values().map(|v| v * v).sum()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, f64)> + '_ {
        self.entries.iter().map(|(&id, &value)| (id, value))
    }

    pub fn ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.entries.keys().copied()
    }

    /// Rewrite ids through `old_to_new`; ids missing from the map are dropped.
    pub fn remap(&mut self, old_to_new: &BTreeMap<u32, u32>) {
        self.entries = std::mem::take(&mut self.entries)
            .into_iter()
            .filter_map(|(id, value)| old_to_new.get(&id).map(|&new| (new, value)))
            .collect();
    }
}

impl FromIterator<(u32, f64)> for FeatureVector {
    fn from_iter<I: IntoIterator<Item = (u32, f64)>>(iter: I) -> Self {
        let mut fv = FeatureVector::new();
        for (id, value) in iter {
            fv.increment(id, value);
        }
        fv
    }
}

/// One candidate output for a training instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub features: FeatureVector,
    /// Named features not yet compiled to ids by a model.
    #[serde(default)]
    pub symbolic_features: Vec<(String, f64)>,
    pub is_reference: bool,
    pub raw_score: Option<f64>, // upstream system's score, if any
    pub text: Option<String>,
    pub loss: f64, // 0.0 for the reference
}

impl Candidate {
    pub fn new(features: FeatureVector, is_reference: bool) -> Self {
        Self {
            features,
            symbolic_features: Vec::new(),
            is_reference,
            raw_score: None,
            text: None,
            loss: if is_reference { 0.0 } else { 1.0 },
        }
    }

    /// Candidate whose features are still names.
    pub fn symbolic(features: Vec<(String, f64)>, is_reference: bool) -> Self {
        let mut c = Self::new(FeatureVector::new(), is_reference);
        c.symbolic_features = features;
        c
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_loss(mut self, loss: f64) -> Self {
        self.loss = loss;
        self
    }

    pub fn with_raw_score(mut self, score: f64) -> Self {
        self.raw_score = Some(score);
        self
    }

    pub fn has_pending_features(&self) -> bool {
        !self.symbolic_features.is_empty()
    }

    /// Move pending named features into `features` through `symbols`.
    pub fn compile_features(&mut self, symbols: &mut Symbols) {
        for (name, value) in self.symbolic_features.drain(..) {
            let id = symbols.index(&name);
            self.features.increment(id, value);
        }
    }
}

/// The candidates for one training instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateSet {
    pub training_key: String,
    pub candidates: Vec<Candidate>,
    pub reference_text: Option<String>,
    #[serde(default = "default_loss_weight")]
    pub loss_weight: f64, // scales this set's loss under weighted evaluation
}

fn default_loss_weight() -> f64 {
    1.0
}

impl CandidateSet {
    pub fn new(training_key: impl Into<String>, candidates: Vec<Candidate>) -> Self {
        Self {
            training_key: training_key.into(),
            candidates,
            reference_text: None,
            loss_weight: 1.0,
        }
    }

    pub fn with_loss_weight(mut self, loss_weight: f64) -> Self {
        self.loss_weight = loss_weight;
        self
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn num_references(&self) -> usize {
        self.candidates.iter().filter(|c| c.is_reference).count()
    }

    pub fn compile_features(&mut self, symbols: &mut Symbols) {
        for candidate in &mut self.candidates {
            candidate.compile_features(symbols);
        }
    }

    /// Run `extractor` over every candidate's text, queueing the results as
    /// pending named features. Candidates without text are left alone.
    pub fn extract_features(&mut self, extractor: &dyn FeatureExtractor) {
        for candidate in &mut self.candidates {
            if let Some(text) = &candidate.text {
                extractor.extract(text, &mut candidate.symbolic_features);
            }
        }
    }
}

/// Training clock: epoch, index within the epoch, and index across all epochs.
///
/// `index` and `absolute_index` count processed examples and are 1-based once
/// the first example has been seen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Time {
    pub epoch: u32,
    pub index: u64,
    pub absolute_index: u64,
}

impl Time {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance by one processed example.
    pub fn tick(&mut self) {
        self.index += 1;
        self.absolute_index += 1;
    }

    pub fn new_epoch(&mut self) {
        self.epoch += 1;
        self.index = 0;
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.epoch, self.index, self.absolute_index)
    }
}
