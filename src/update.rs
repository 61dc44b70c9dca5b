//! When to update the weights, and by how much

use crate::error::SpecError;
use crate::registry::{Family, FactoryConstructible, Initializers};
use crate::types::Time;
use std::fmt::Debug;
use std::sync::Arc;

/// What a predicate sees about one scored candidate set.
#[derive(Debug, Clone, Copy)]
pub struct UpdateSignal {
    pub top_is_reference: bool,
    /// Score of the best reference candidate.
    pub gold_score: f64,
    /// Score of the best non-reference candidate.
    pub competitor_score: f64,
}

pub trait UpdatePredicate: Debug + Send + Sync {
    fn need_to_update(&self, signal: &UpdateSignal) -> bool;
    fn spec(&self) -> String;
}

pub struct UpdatePredicateFamily;

impl Family for UpdatePredicateFamily {
    const NAME: &'static str = "UpdatePredicate";
    type Object = dyn UpdatePredicate;
}

/// Update only when a non-reference candidate is ranked first.
#[derive(Debug, Clone, Default)]
pub struct Misranked;

impl UpdatePredicate for Misranked {
    fn need_to_update(&self, signal: &UpdateSignal) -> bool {
        !signal.top_is_reference
    }

    fn spec(&self) -> String {
        "Misranked()".to_string()
    }
}

impl FactoryConstructible for Misranked {
    type Family = UpdatePredicateFamily;

    fn register_initializers(_initializers: &mut Initializers<Self>) {}

    fn finish(self) -> Result<Arc<dyn UpdatePredicate>, SpecError> {
        let p: Arc<dyn UpdatePredicate> = Arc::new(self);
        Ok(p)
    }
}

/// Also update when the reference wins by less than `margin`.
#[derive(Debug, Clone)]
pub struct Margin {
    pub margin: f64,
}

impl Default for Margin {
    fn default() -> Self {
        Self { margin: 1.0 }
    }
}

impl UpdatePredicate for Margin {
    fn need_to_update(&self, signal: &UpdateSignal) -> bool {
        !signal.top_is_reference || signal.gold_score - signal.competitor_score < self.margin
    }

    fn spec(&self) -> String {
        format!("Margin(margin={:?})", self.margin)
    }
}

impl FactoryConstructible for Margin {
    type Family = UpdatePredicateFamily;

    fn register_initializers(init: &mut Initializers<Self>) {
        init.add("margin", false, |p: &mut Self, v: f64| p.margin = v)
            .positional(&["margin"]);
    }

    fn finish(self) -> Result<Arc<dyn UpdatePredicate>, SpecError> {
        if self.margin < 0.0 || !self.margin.is_finite() {
            return Err(SpecError::InvalidConfiguration {
                factory: "Margin".to_string(),
                message: format!("margin must be non-negative, got {}", self.margin),
            });
        }
        let p: Arc<dyn UpdatePredicate> = Arc::new(self);
        Ok(p)
    }
}

/// Inputs available when choosing a step size.
#[derive(Debug, Clone, Copy)]
pub struct StepContext {
    pub time: Time,
    pub gold_score: f64,
    pub competitor_score: f64,
    pub gold_loss: f64,
    pub competitor_loss: f64,
    /// Squared distance between gold and competitor in kernel space.
    pub distance_sq: f64,
}

pub trait StepSchedule: Debug + Send + Sync {
    fn step_size(&self, ctx: &StepContext) -> f64;
    fn spec(&self) -> String;
}

pub struct StepScheduleFamily;

impl Family for StepScheduleFamily {
    const NAME: &'static str = "StepSchedule";
    type Object = dyn StepSchedule;
}

#[derive(Debug, Clone)]
pub struct Fixed {
    pub rate: f64,
}

impl Default for Fixed {
    fn default() -> Self {
        Self { rate: 1.0 }
    }
}

impl StepSchedule for Fixed {
    fn step_size(&self, _ctx: &StepContext) -> f64 {
        self.rate
    }

    fn spec(&self) -> String {
        format!("Fixed(rate={:?})", self.rate)
    }
}

impl FactoryConstructible for Fixed {
    type Family = StepScheduleFamily;

    fn register_initializers(init: &mut Initializers<Self>) {
        init.add("rate", false, |s: &mut Self, v: f64| s.rate = v)
            .positional(&["rate"]);
    }

    fn finish(self) -> Result<Arc<dyn StepSchedule>, SpecError> {
        check_rate("Fixed", self.rate)?;
        let s: Arc<dyn StepSchedule> = Arc::new(self);
        Ok(s)
    }
}

/// `rate / (1 + decay * (absolute_index - 1))`
#[derive(Debug, Clone)]
pub struct Decaying {
    pub rate: f64,
    pub decay: f64,
}

impl Default for Decaying {
    fn default() -> Self {
        Self {
            rate: 1.0,
            decay: 0.0,
        }
    }
}

impl StepSchedule for Decaying {
    fn step_size(&self, ctx: &StepContext) -> f64 {
        let elapsed = ctx.time.absolute_index.saturating_sub(1) as f64;
        self.rate / (1.0 + self.decay * elapsed)
    }

    fn spec(&self) -> String {
        format!("Decaying(rate={:?}, decay={:?})", self.rate, self.decay)
    }
}

impl FactoryConstructible for Decaying {
    type Family = StepScheduleFamily;

    fn register_initializers(init: &mut Initializers<Self>) {
        init.add("rate", false, |s: &mut Self, v: f64| s.rate = v)
            .add("decay", false, |s: &mut Self, v: f64| s.decay = v)
            .positional(&["rate", "decay"]);
    }

    fn finish(self) -> Result<Arc<dyn StepSchedule>, SpecError> {
        check_rate("Decaying", self.rate)?;
        if self.decay < 0.0 || !self.decay.is_finite() {
            return Err(SpecError::InvalidConfiguration {
                factory: "Decaying".to_string(),
                message: format!("decay must be non-negative, got {}", self.decay),
            });
        }
        let s: Arc<dyn StepSchedule> = Arc::new(self);
        Ok(s)
    }
}

/// Passive-aggressive step: the smallest step that fixes the ranking with a
/// margin equal to the loss difference, capped at `clip`.
#[derive(Debug, Clone)]
pub struct Mira {
    pub clip: f64,
}

impl Default for Mira {
    fn default() -> Self {
        Self { clip: 0.1 }
    }
}

impl StepSchedule for Mira {
    fn step_size(&self, ctx: &StepContext) -> f64 {
        if ctx.distance_sq <= 0.0 {
            return 0.0;
        }
        let loss_gap = ctx.competitor_loss - ctx.gold_loss;
        let score_gap = ctx.competitor_score - ctx.gold_score;
        ((loss_gap + score_gap) / ctx.distance_sq).clamp(0.0, self.clip)
    }

    fn spec(&self) -> String {
        format!("Mira(clip={:?})", self.clip)
    }
}

impl FactoryConstructible for Mira {
    type Family = StepScheduleFamily;

    fn register_initializers(init: &mut Initializers<Self>) {
        init.add("clip", false, |s: &mut Self, v: f64| s.clip = v)
            .positional(&["clip"]);
    }

    fn finish(self) -> Result<Arc<dyn StepSchedule>, SpecError> {
        check_rate("Mira", self.clip)?;
        let s: Arc<dyn StepSchedule> = Arc::new(self);
        Ok(s)
    }
}

fn check_rate(factory: &str, rate: f64) -> Result<(), SpecError> {
    if rate > 0.0 && rate.is_finite() {
        Ok(())
    } else {
        Err(SpecError::InvalidConfiguration {
            factory: factory.to_string(),
            message: format!("step must be positive, got {}", rate),
        })
    }
}
