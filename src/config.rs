//! Training configuration: defaults, optional JSON file, environment overrides

use crate::model::{ReadErrorPolicy, TrainOptions};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub epochs: u32,
    pub min_epochs: u32,
    pub max_epochs_in_decline: u32, // 0 disables early stopping
    pub read_error_policy: ReadErrorPolicy,
    pub max_candidates: Option<usize>, // None or 0: keep every candidate
    pub reporting_interval: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 10,
            min_epochs: 0,
            max_epochs_in_decline: 0,
            read_error_policy: ReadErrorPolicy::Abort,
            max_candidates: None,
            reporting_interval: 1000,
        }
    }
}

impl TrainingConfig {
    /// Defaults, then `path` if given, then `RERANKER_*` environment variables.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file {}", path.display()))?;
                serde_json::from_str(&text)
                    .with_context(|| format!("Failed to parse config file {}", path.display()))?
            }
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.normalize();
        Ok(config)
    }

    /// Override fields from `lookup(VAR)`. Unparsable values are ignored with a warning.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        override_with(&lookup, "RERANKER_EPOCHS", &mut self.epochs);
        override_with(&lookup, "RERANKER_MIN_EPOCHS", &mut self.min_epochs);
        override_with(&lookup, "RERANKER_MAX_EPOCHS_IN_DECLINE", &mut self.max_epochs_in_decline);
        override_with(&lookup, "RERANKER_READ_ERROR_POLICY", &mut self.read_error_policy);
        if let Some(raw) = lookup("RERANKER_MAX_CANDIDATES") {
            match raw.trim().parse::<usize>() {
                Ok(0) => self.max_candidates = None,
                Ok(n) => self.max_candidates = Some(n),
                Err(_) => warn!("ignoring RERANKER_MAX_CANDIDATES={}: not a number", raw),
            }
        }
    }

    /// A zero candidate limit means unbounded, wherever it came from.
    pub fn normalize(&mut self) {
        if self.max_candidates == Some(0) {
            self.max_candidates = None;
        }
    }

    /// Options for [`crate::PerceptronModel::train`]; devtest and cancellation are left unset.
    pub fn train_options<'a>(&self) -> TrainOptions<'a> {
        TrainOptions {
            devtest: None,
            cancel: None,
            read_error_policy: self.read_error_policy,
            min_epochs: self.min_epochs,
            max_epochs_in_decline: self.max_epochs_in_decline,
        }
    }
}

fn override_with<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, field: &mut T) {
    if let Some(raw) = lookup(key) {
        match raw.trim().parse::<T>() {
            Ok(value) => *field = value,
            Err(_) => warn!("ignoring {}={}: invalid value", key, raw),
        }
    }
}
