//! Kernel functions over sparse feature vectors

use crate::error::SpecError;
use crate::registry::{Family, FactoryConstructible, Initializers};
use crate::types::FeatureVector;
use std::fmt::Debug;
use std::sync::Arc;

/// Similarity between two feature vectors.
pub trait KernelFunction: Debug + Send + Sync {
    fn apply(&self, a: &FeatureVector, b: &FeatureVector) -> f64;

    /// Canonical spec text that rebuilds this kernel.
    fn spec(&self) -> String;

    /// True when `apply` is the plain inner product, so weights can be kept
    /// as one explicit vector.
    fn is_linear(&self) -> bool {
        false
    }
}

pub struct KernelFamily;

impl Family for KernelFamily {
    const NAME: &'static str = "KernelFunction";
    type Object = dyn KernelFunction;
}

#[derive(Debug, Clone, Default)]
pub struct DotProduct;

impl KernelFunction for DotProduct {
    fn apply(&self, a: &FeatureVector, b: &FeatureVector) -> f64 {
        a.dot(b)
    }

    fn spec(&self) -> String {
        "Dot()".to_string()
    }

    fn is_linear(&self) -> bool {
        true
    }
}

impl FactoryConstructible for DotProduct {
    type Family = KernelFamily;

    fn register_initializers(_initializers: &mut Initializers<Self>) {}

    fn finish(self) -> Result<Arc<dyn KernelFunction>, SpecError> {
        let kernel: Arc<dyn KernelFunction> = Arc::new(self);
        Ok(kernel)
    }
}

/// `(scale * a.b + coefficient) ^ degree`
#[derive(Debug, Clone)]
pub struct Polynomial {
    pub degree: i64,
    pub coefficient: f64,
    pub scale: f64,
}

impl Default for Polynomial {
    fn default() -> Self {
        Self {
            degree: 2,
            coefficient: 1.0,
            scale: 1.0,
        }
    }
}

impl KernelFunction for Polynomial {
    fn apply(&self, a: &FeatureVector, b: &FeatureVector) -> f64 {
        (self.scale * a.dot(b) + self.coefficient).powi(self.degree as i32)
    }

    fn spec(&self) -> String {
        format!(
            "Polynomial(degree={}, coefficient={:?}, scale={:?})",
            self.degree, self.coefficient, self.scale
        )
    }
}

impl FactoryConstructible for Polynomial {
    type Family = KernelFamily;

    fn register_initializers(init: &mut Initializers<Self>) {
        init.add("degree", false, |k: &mut Self, v: i64| k.degree = v)
            .add("coefficient", false, |k: &mut Self, v: f64| k.coefficient = v)
            .add("scale", false, |k: &mut Self, v: f64| k.scale = v)
            .positional(&["degree", "coefficient", "scale"]);
    }

    fn finish(self) -> Result<Arc<dyn KernelFunction>, SpecError> {
        if self.degree < 1 || self.degree > i32::MAX as i64 {
            return Err(SpecError::InvalidConfiguration {
                factory: "Polynomial".to_string(),
                message: format!("degree must be a positive integer, got {}", self.degree),
            });
        }
        if !self.coefficient.is_finite() || !self.scale.is_finite() {
            return Err(SpecError::InvalidConfiguration {
                factory: "Polynomial".to_string(),
                message: format!(
                    "coefficient and scale must be finite, got {} and {}",
                    self.coefficient, self.scale
                ),
            });
        }
        let kernel: Arc<dyn KernelFunction> = Arc::new(self);
        Ok(kernel)
    }
}

/// Gaussian kernel `exp(-gamma * |a - b|^2)`
#[derive(Debug, Clone)]
pub struct Rbf {
    pub gamma: f64,
}

impl Default for Rbf {
    fn default() -> Self {
        Self { gamma: 1.0 }
    }
}

impl KernelFunction for Rbf {
    fn apply(&self, a: &FeatureVector, b: &FeatureVector) -> f64 {
        // |a-b|^2 = a.a - 2a.b + b.b, clamped against rounding below zero.
        let dist_sq = (a.l2_norm_sq() - 2.0 * a.dot(b) + b.l2_norm_sq()).max(0.0);
        (-self.gamma * dist_sq).exp()
    }

    fn spec(&self) -> String {
        format!("Rbf(gamma={:?})", self.gamma)
    }
}

impl FactoryConstructible for Rbf {
    type Family = KernelFamily;

    fn register_initializers(init: &mut Initializers<Self>) {
        init.add("gamma", false, |k: &mut Self, v: f64| k.gamma = v)
            .positional(&["gamma"]);
    }

    fn finish(self) -> Result<Arc<dyn KernelFunction>, SpecError> {
        if self.gamma <= 0.0 || !self.gamma.is_finite() {
            return Err(SpecError::InvalidConfiguration {
                factory: "Rbf".to_string(),
                message: format!("gamma must be positive, got {}", self.gamma),
            });
        }
        let kernel: Arc<dyn KernelFunction> = Arc::new(self);
        Ok(kernel)
    }
}
