//! Averaged perceptron reranking models
//!
//! Both `Linear` and `KernelPerceptron` are a [`PerceptronModel`]; they differ
//! only in how [`Weights`] are represented.

use crate::error::{SpecError, TrainError};
use crate::kernel::{DotProduct, KernelFamily, KernelFunction};
use crate::reader::CandidateSetSource;
use crate::registry::{Family, FactoryConstructible, Initializers};
use crate::symbols::Symbols;
use crate::types::{Candidate, CandidateSet, FeatureVector, Time};
use crate::update::{
    Fixed, Misranked, StepContext, StepSchedule, StepScheduleFamily, UpdatePredicate,
    UpdatePredicateFamily, UpdateSignal,
};
use crate::value::{quoted, Shared};
use crate::weights::{LinearWeights, ScoreMode, SupportSet, Weights};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    TrainingEpoch,
    Converged,
}

/// What to do when the reader reports a malformed record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadErrorPolicy {
    #[default]
    Abort,
    Skip,
}

impl FromStr for ReadErrorPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "abort" => Ok(ReadErrorPolicy::Abort),
            "skip" => Ok(ReadErrorPolicy::Skip),
            other => Err(format!("unknown read error policy \"{}\" (expected abort or skip)", other)),
        }
    }
}

#[derive(Default)]
pub struct TrainOptions<'a> {
    /// Evaluated with the averaged weights after every epoch.
    pub devtest: Option<&'a dyn CandidateSetSource>,
    /// Checked between examples and between epochs.
    pub cancel: Option<&'a AtomicBool>,
    pub read_error_policy: ReadErrorPolicy,
    /// Never stop early before the model has trained this many epochs in
    /// total, counting epochs from before a resume.
    pub min_epochs: u32,
    /// Stop after this many consecutive devtest epochs without improvement;
    /// 0 disables early stopping.
    pub max_epochs_in_decline: u32,
}

impl TrainOptions<'_> {
    fn cancelled(&self) -> bool {
        self.cancel.map_or(false, |flag| flag.load(Ordering::Relaxed))
    }
}

/// Result of presenting one candidate set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExampleOutcome {
    /// No reference candidate; time advanced, weights untouched.
    NoReference,
    /// The update predicate did not fire.
    Correct,
    Updated { step: f64, evicted: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub enum TrainingWarning {
    RetainedSetOverflow {
        epoch: u32,
        evicted: usize,
        capacity: usize,
    },
}

impl fmt::Display for TrainingWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrainingWarning::RetainedSetOverflow {
                epoch,
                evicted,
                capacity,
            } => write!(
                f,
                "epoch {}: evicted {} support vectors to stay within capacity {}",
                epoch, evicted, capacity
            ),
        }
    }
}

/// Summary of one `train` call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingReport {
    pub epochs_completed: u32,
    pub examples: u64,
    pub updates: u64,
    pub no_reference: u64,
    pub skipped_records: u64,
    pub devtest: Vec<EvalReport>,
    pub warnings: Vec<TrainingWarning>,
    pub converged: bool,
    pub cancelled: bool,
}

/// Losses are means weighted by each set's `loss_weight` when the model
/// uses weighted loss, plain means otherwise.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EvalReport {
    pub num_sets: u64,
    pub total_weight: f64,
    /// Sets where the top-ranked candidate is not a reference.
    pub num_errors: u64,
    /// Loss of the top-ranked candidate.
    pub loss: f64,
    /// Lowest loss available in each set.
    pub oracle_loss: f64,
    /// Loss of the first candidate in each set.
    pub baseline_loss: f64,
}

/// Counters that persist with the model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelStats {
    pub num_updates: u64,
    pub num_training_errors: u64,
    pub training_errors_per_epoch: Vec<u64>,
    pub devtest_loss_per_epoch: Vec<f64>,
    pub best_epoch: Option<u32>,
    pub best_loss: Option<f64>,
    pub epochs_in_decline: u32,
}

#[derive(Debug, Clone)]
pub struct PerceptronModel {
    name: String,
    factory: &'static str,
    kernel: Arc<dyn KernelFunction>,
    update_predicate: Arc<dyn UpdatePredicate>,
    step: Arc<dyn StepSchedule>,
    use_weighted_loss: bool,
    pub(crate) weights: Weights,
    /// Weights as of the best devtest epoch so far.
    pub(crate) best_weights: Option<Weights>,
    pub(crate) symbols: Symbols,
    pub(crate) time: Time,
    pub(crate) phase: Phase,
    pub(crate) stats: ModelStats,
}

pub struct ModelFamily;

impl Family for ModelFamily {
    const NAME: &'static str = "Model";
    type Object = PerceptronModel;
}

impl PerceptronModel {
    /// Linear model with an explicit weight vector.
    pub fn linear(name: impl Into<String>, kernel: Arc<dyn KernelFunction>) -> Self {
        Self::with_parts(
            "Linear",
            ModelParts {
                name: name.into(),
                kernel: Some(kernel),
                ..ModelParts::default()
            },
            Weights::Linear(LinearWeights::default()),
        )
    }

    /// Kernelized model retaining at most `max_retained` support vectors.
    pub fn kernelized(name: impl Into<String>, kernel: Arc<dyn KernelFunction>, max_retained: Option<usize>) -> Self {
        Self::with_parts(
            "KernelPerceptron",
            ModelParts {
                name: name.into(),
                kernel: Some(kernel),
                ..ModelParts::default()
            },
            Weights::Kernel(SupportSet::with_capacity(max_retained)),
        )
    }

    fn with_parts(factory: &'static str, parts: ModelParts, weights: Weights) -> Self {
        Self {
            name: parts.name,
            factory,
            kernel: parts.kernel.unwrap_or_else(|| Arc::new(DotProduct)),
            update_predicate: parts.update_predicate.unwrap_or_else(|| Arc::new(Misranked)),
            step: parts.step.unwrap_or_else(|| Arc::new(Fixed::default())),
            use_weighted_loss: parts.use_weighted_loss,
            weights,
            best_weights: None,
            symbols: Symbols::new(),
            time: Time::new(),
            phase: Phase::Idle,
            stats: ModelStats::default(),
        }
    }

    pub fn with_update_predicate(mut self, predicate: Arc<dyn UpdatePredicate>) -> Self {
        self.update_predicate = predicate;
        self
    }

    pub fn with_step(mut self, step: Arc<dyn StepSchedule>) -> Self {
        self.step = step;
        self
    }

    /// Weight each devtest set's loss by its `loss_weight` during evaluation.
    pub fn with_weighted_loss(mut self, use_weighted_loss: bool) -> Self {
        self.use_weighted_loss = use_weighted_loss;
        self
    }

    pub fn use_weighted_loss(&self) -> bool {
        self.use_weighted_loss
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kernel(&self) -> &dyn KernelFunction {
        self.kernel.as_ref()
    }

    pub fn time(&self) -> Time {
        self.time
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn weights(&self) -> &Weights {
        &self.weights
    }

    pub fn best_weights(&self) -> Option<&Weights> {
        self.best_weights.as_ref()
    }

    pub fn symbols(&self) -> &Symbols {
        &self.symbols
    }

    pub fn stats(&self) -> &ModelStats {
        &self.stats
    }

    /// Canonical spec text that rebuilds this model's configuration.
    pub fn spec(&self) -> String {
        let mut spec = format!(
            "{}(name={}, kernel={}, update_predicate={}, step={}",
            self.factory,
            quoted(&self.name),
            self.kernel.spec(),
            self.update_predicate.spec(),
            self.step.spec()
        );
        if self.use_weighted_loss {
            spec.push_str(", use_weighted_loss=true");
        }
        if let Weights::Kernel(support) = &self.weights {
            let capacity = support.capacity().unwrap_or(0);
            spec.push_str(&format!(", max_retained={}", capacity));
        }
        spec.push(')');
        spec
    }

    /// Present one training example.
    ///
    /// Pending named features are compiled through the model's symbols and
    /// candidates are scored with the raw weights.
    pub fn train_on_example(&mut self, set: &mut CandidateSet) -> Result<ExampleOutcome, TrainError> {
        if set.is_empty() {
            return Err(TrainError::EmptyCandidateSet {
                key: set.training_key.clone(),
                absolute_index: self.time.absolute_index,
            });
        }
        set.compile_features(&mut self.symbols);
        self.time.tick();
        self.phase = Phase::TrainingEpoch;

        let scores: Vec<f64> = set
            .candidates
            .iter()
            .map(|c| self.weights.score(self.kernel.as_ref(), &c.features, ScoreMode::Raw))
            .collect();

        let gold = best_index(&scores, |i| set.candidates[i].is_reference);
        let gold = match gold {
            Some(gold) => gold,
            None => {
                debug!("{}: {} has no reference candidate", self.time, set.training_key);
                return Ok(ExampleOutcome::NoReference);
            }
        };
        let top = best_index(&scores, |_| true).unwrap_or(gold);
        let top_is_reference = set.candidates[top].is_reference;
        if !top_is_reference {
            self.stats.num_training_errors += 1;
        }

        // A set made only of references has nothing to push away from.
        let competitor = match best_index(&scores, |i| !set.candidates[i].is_reference) {
            Some(competitor) => competitor,
            None => return Ok(ExampleOutcome::Correct),
        };

        let signal = UpdateSignal {
            top_is_reference,
            gold_score: scores[gold],
            competitor_score: scores[competitor],
        };
        if !self.update_predicate.need_to_update(&signal) {
            return Ok(ExampleOutcome::Correct);
        }

        let gold_c = &set.candidates[gold];
        let competitor_c = &set.candidates[competitor];
        let k = self.kernel.as_ref();
        let distance_sq = k.apply(&gold_c.features, &gold_c.features)
            - 2.0 * k.apply(&gold_c.features, &competitor_c.features)
            + k.apply(&competitor_c.features, &competitor_c.features);
        let ctx = StepContext {
            time: self.time,
            gold_score: scores[gold],
            competitor_score: scores[competitor],
            gold_loss: gold_c.loss,
            competitor_loss: competitor_c.loss,
            distance_sq,
        };
        let step = self.step.step_size(&ctx);
        if step == 0.0 || !step.is_finite() {
            return Ok(ExampleOutcome::Correct);
        }

        let evicted = self.weights.update(
            &gold_c.features,
            &competitor_c.features,
            step,
            self.time.absolute_index,
        );
        self.stats.num_updates += 1;
        debug!(
            "{}: updated on {} (gold {} vs competitor {}, step {})",
            self.time, set.training_key, gold, competitor, step
        );
        Ok(ExampleOutcome::Updated { step, evicted })
    }

    /// Bring the averaged weights up to date and leave the training phase.
    pub fn checkpoint(&mut self) {
        self.weights.materialize(self.time.absolute_index);
        if self.phase == Phase::TrainingEpoch {
            self.phase = Phase::Idle;
        }
    }

    /// Train for up to `num_epochs` passes over `source`.
    ///
    /// When a devtest source is given and a later epoch did worse than the
    /// best one, the best epoch's weights are restored before returning.
    pub fn train(
        &mut self,
        source: &dyn CandidateSetSource,
        num_epochs: u32,
        options: &TrainOptions<'_>,
    ) -> Result<TrainingReport, TrainError> {
        let mut report = TrainingReport::default();
        if self.phase == Phase::Converged {
            self.phase = Phase::Idle;
        }

        for _ in 0..num_epochs {
            if options.cancelled() {
                report.cancelled = true;
                break;
            }
            self.time.new_epoch();
            let errors_before = self.stats.num_training_errors;
            let result = self.train_one_epoch(source, options, &mut report);
            // Keep the model consistent even when the epoch failed.
            self.checkpoint();
            self.stats
                .training_errors_per_epoch
                .push(self.stats.num_training_errors - errors_before);
            let evicted = result?;

            if let Some(warning) = self.overflow_warning(evicted) {
                warn!("{}", warning);
                report.warnings.push(warning);
            }
            if report.cancelled {
                info!("epoch {}: cancelled after {} examples", self.time.epoch, self.time.index);
                break;
            }
            report.epochs_completed += 1;
            info!(
                "epoch {}: {} examples, {} training errors, {} updates so far",
                self.time.epoch,
                self.time.index,
                self.stats.training_errors_per_epoch.last().copied().unwrap_or(0),
                self.stats.num_updates
            );

            if let Some(devtest) = options.devtest {
                let eval = self.evaluate(devtest)?;
                info!(
                    "epoch {}: devtest loss {:.4} (oracle {:.4}, baseline {:.4}), {} errors in {} sets",
                    self.time.epoch, eval.loss, eval.oracle_loss, eval.baseline_loss, eval.num_errors, eval.num_sets
                );
                self.track_devtest(eval.loss);
                report.devtest.push(eval);

                if options.max_epochs_in_decline > 0
                    && self.time.epoch >= options.min_epochs
                    && self.stats.epochs_in_decline >= options.max_epochs_in_decline
                {
                    info!(
                        "converged: {} epochs without devtest improvement, best epoch {:?}",
                        self.stats.epochs_in_decline, self.stats.best_epoch
                    );
                    self.phase = Phase::Converged;
                    report.converged = true;
                    break;
                }
            }
        }
        if !report.devtest.is_empty() {
            self.restore_best_weights();
        }
        Ok(report)
    }

    fn restore_best_weights(&mut self) {
        if self.stats.best_epoch == Some(self.time.epoch) {
            return;
        }
        if let Some(best) = &self.best_weights {
            info!(
                "restoring weights from epoch {:?} (devtest loss {:?})",
                self.stats.best_epoch, self.stats.best_loss
            );
            self.weights = best.clone();
        }
    }

    /// One pass over `source`; returns how many support vectors were evicted.
    fn train_one_epoch(
        &mut self,
        source: &dyn CandidateSetSource,
        options: &TrainOptions<'_>,
        report: &mut TrainingReport,
    ) -> Result<usize, TrainError> {
        let mut evicted = 0;
        let reader = source.open()?;
        for next in reader {
            if options.cancelled() {
                report.cancelled = true;
                break;
            }
            let mut set = match next {
                Ok(set) => set,
                Err(e) if options.read_error_policy == ReadErrorPolicy::Skip => {
                    warn!("skipping record: {}", e);
                    report.skipped_records += 1;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            report.examples += 1;
            match self.train_on_example(&mut set)? {
                ExampleOutcome::NoReference => report.no_reference += 1,
                ExampleOutcome::Correct => {}
                ExampleOutcome::Updated { evicted: n, .. } => {
                    report.updates += 1;
                    evicted += n;
                }
            }
        }
        Ok(evicted)
    }

    fn overflow_warning(&self, evicted: usize) -> Option<TrainingWarning> {
        match (&self.weights, evicted) {
            (_, 0) => None,
            (Weights::Kernel(support), _) => Some(TrainingWarning::RetainedSetOverflow {
                epoch: self.time.epoch,
                evicted,
                capacity: support.capacity().unwrap_or(0),
            }),
            _ => None,
        }
    }

    fn track_devtest(&mut self, loss: f64) {
        self.stats.devtest_loss_per_epoch.push(loss);
        let improved = match self.stats.best_loss {
            Some(best) => loss < best,
            None => true,
        };
        if improved {
            self.stats.best_loss = Some(loss);
            self.stats.best_epoch = Some(self.time.epoch);
            self.stats.epochs_in_decline = 0;
            self.best_weights = Some(self.weights.clone());
        } else {
            self.stats.epochs_in_decline += 1;
        }
    }

    /// Score with the raw weights while training, the averaged ones otherwise.
    pub fn score(&self, features: &FeatureVector) -> f64 {
        let mode = match self.phase {
            Phase::TrainingEpoch => ScoreMode::Raw,
            Phase::Idle | Phase::Converged => ScoreMode::Averaged,
        };
        self.score_with(features, mode)
    }

    pub fn score_with(&self, features: &FeatureVector, mode: ScoreMode) -> f64 {
        self.weights.score(self.kernel.as_ref(), features, mode)
    }

    /// Score a candidate whose named features may not be compiled yet.
    /// Names the model has never seen contribute nothing.
    pub fn score_candidate(&self, candidate: &Candidate, mode: ScoreMode) -> f64 {
        self.score_with(&self.known_features(candidate), mode)
    }

    fn known_features<'c>(&self, candidate: &'c Candidate) -> Cow<'c, FeatureVector> {
        if !candidate.has_pending_features() {
            return Cow::Borrowed(&candidate.features);
        }
        let mut features = candidate.features.clone();
        for (name, value) in &candidate.symbolic_features {
            if let Some(id) = self.symbols.get(name) {
                features.increment(id, *value);
            }
        }
        Cow::Owned(features)
    }

    /// Candidate indices best-first under the averaged weights; ties keep input order.
    pub fn rank(&self, set: &CandidateSet) -> Vec<usize> {
        let scores: Vec<f64> = set
            .candidates
            .iter()
            .map(|c| self.score_candidate(c, ScoreMode::Averaged))
            .collect();
        let mut order: Vec<usize> = (0..scores.len()).collect();
        order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]).then(a.cmp(&b)));
        order
    }

    /// Ranking quality on `source` with the averaged weights.
    pub fn evaluate(&self, source: &dyn CandidateSetSource) -> Result<EvalReport, TrainError> {
        let mut report = EvalReport::default();
        let (mut loss, mut oracle, mut baseline, mut total_weight) = (0.0, 0.0, 0.0, 0.0);
        for next in source.open()? {
            let set = next?;
            if set.is_empty() {
                warn!("devtest set {} has no candidates, ignoring it", set.training_key);
                continue;
            }
            let top = self.rank(&set)[0];
            report.num_sets += 1;
            if !set.candidates[top].is_reference {
                report.num_errors += 1;
            }
            let weight = if self.use_weighted_loss { set.loss_weight } else { 1.0 };
            total_weight += weight;
            loss += weight * set.candidates[top].loss;
            oracle += weight
                * set
                    .candidates
                    .iter()
                    .map(|c| c.loss)
                    .fold(f64::INFINITY, f64::min);
            baseline += weight * set.candidates[0].loss;
        }
        report.total_weight = total_weight;
        if report.num_sets == 0 {
            warn!("devtest source produced no candidate sets");
        } else if total_weight <= 0.0 {
            warn!("devtest loss weights sum to {}, reporting zero loss", total_weight);
        } else {
            report.loss = loss / total_weight;
            report.oracle_loss = oracle / total_weight;
            report.baseline_loss = baseline / total_weight;
        }
        Ok(report)
    }

    /// Renumber every feature id in use to a dense range, in id order, and
    /// shrink the symbol table to match. Returns the old → new mapping.
    pub fn compactify_feature_ids(&mut self) -> BTreeMap<u32, u32> {
        let mut ids = self.weights.feature_ids();
        if let Some(best) = &self.best_weights {
            ids.extend(best.feature_ids());
        }
        let mapping: BTreeMap<u32, u32> = ids
            .into_iter()
            .enumerate()
            .map(|(new, old)| (old, new as u32))
            .collect();
        self.weights.remap(&mapping);
        if let Some(best) = &mut self.best_weights {
            best.remap(&mapping);
        }
        self.symbols = self.symbols.remapped(&mapping);
        info!("compacted feature ids: {} in use", mapping.len());
        mapping
    }
}

/// First index with the highest score among those accepted by `keep`.
fn best_index(scores: &[f64], keep: impl Fn(usize) -> bool) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (i, &score) in scores.iter().enumerate() {
        if !keep(i) {
            continue;
        }
        match best {
            Some(b) if scores[b] >= score => {}
            _ => best = Some(i),
        }
    }
    best
}

/// Members shared by both model factories.
#[derive(Default)]
struct ModelParts {
    name: String,
    kernel: Option<Arc<dyn KernelFunction>>,
    update_predicate: Option<Arc<dyn UpdatePredicate>>,
    step: Option<Arc<dyn StepSchedule>>,
    use_weighted_loss: bool,
}

fn register_model_parts<T: 'static>(init: &mut Initializers<T>, parts: fn(&mut T) -> &mut ModelParts) {
    init.add("name", false, move |t: &mut T, v: String| parts(t).name = v)
        .add("kernel", false, move |t: &mut T, v: Shared<KernelFamily>| {
            parts(t).kernel = Some(v.into_inner())
        })
        .add(
            "update_predicate",
            false,
            move |t: &mut T, v: Shared<UpdatePredicateFamily>| parts(t).update_predicate = Some(v.into_inner()),
        )
        .add("step", false, move |t: &mut T, v: Shared<StepScheduleFamily>| {
            parts(t).step = Some(v.into_inner())
        })
        .add("use_weighted_loss", false, move |t: &mut T, v: bool| {
            parts(t).use_weighted_loss = v
        });
}

fn default_parts() -> ModelParts {
    ModelParts {
        name: "model".to_string(),
        ..ModelParts::default()
    }
}

fn linear_parts(b: &mut LinearModelBuilder) -> &mut ModelParts {
    &mut b.parts
}

fn kernel_parts(b: &mut KernelPerceptronBuilder) -> &mut ModelParts {
    &mut b.parts
}

/// Factory for `Linear(...)`.
pub struct LinearModelBuilder {
    parts: ModelParts,
}

impl Default for LinearModelBuilder {
    fn default() -> Self {
        Self { parts: default_parts() }
    }
}

impl FactoryConstructible for LinearModelBuilder {
    type Family = ModelFamily;

    fn register_initializers(init: &mut Initializers<Self>) {
        register_model_parts(init, linear_parts);
    }

    fn finish(self) -> Result<Arc<PerceptronModel>, SpecError> {
        Ok(Arc::new(PerceptronModel::with_parts(
            "Linear",
            self.parts,
            Weights::Linear(LinearWeights::default()),
        )))
    }
}

/// Factory for `KernelPerceptron(...)`.
pub struct KernelPerceptronBuilder {
    parts: ModelParts,
    max_retained: i64,
}

impl Default for KernelPerceptronBuilder {
    fn default() -> Self {
        Self {
            parts: default_parts(),
            max_retained: 0,
        }
    }
}

impl FactoryConstructible for KernelPerceptronBuilder {
    type Family = ModelFamily;

    fn register_initializers(init: &mut Initializers<Self>) {
        register_model_parts(init, kernel_parts);
        init.add("max_retained", false, |b: &mut Self, v: i64| b.max_retained = v);
    }

    fn finish(self) -> Result<Arc<PerceptronModel>, SpecError> {
        let capacity = match self.max_retained {
            0 => None,
            n if n >= 2 => Some(n as usize),
            n => {
                return Err(SpecError::InvalidConfiguration {
                    factory: "KernelPerceptron".to_string(),
                    message: format!("max_retained must be 0 (unbounded) or at least 2, got {}", n),
                })
            }
        };
        Ok(Arc::new(PerceptronModel::with_parts(
            "KernelPerceptron",
            self.parts,
            Weights::Kernel(SupportSet::with_capacity(capacity)),
        )))
    }
}
