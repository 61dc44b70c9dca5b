//! Model persistence
//!
//! A persisted model is its canonical spec text plus its learned state. The
//! spec is re-interpreted on load, so anything registered in the factory
//! registry can be restored.

use crate::environment::Environment;
use crate::error::CodecError;
use crate::interpreter::Interpreter;
use crate::model::{ModelFamily, ModelStats, Phase, PerceptronModel};
use crate::registry::FactoryRegistry;
use crate::symbols::Symbols;
use crate::types::Time;
use crate::weights::Weights;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub const FORMAT: &str = "reranker-model/1";

pub trait ModelCodec {
    fn write(&self, model: &PerceptronModel) -> Result<Vec<u8>, CodecError>;
    fn read(&self, bytes: &[u8]) -> Result<PerceptronModel, CodecError>;
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ModelState {
    pub format: String,
    pub spec: String,
    pub name: String,
    pub time: Time,
    pub phase: Phase,
    pub stats: ModelStats,
    pub symbols: Symbols,
    pub weights: Weights,
    /// Snapshot from the best devtest epoch, if one was evaluated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub best_weights: Option<Weights>,
}

pub struct JsonModelCodec<'r> {
    registry: &'r FactoryRegistry,
    pretty: bool,
}

impl<'r> JsonModelCodec<'r> {
    pub fn new(registry: &'r FactoryRegistry) -> Self {
        Self {
            registry,
            pretty: false,
        }
    }

    pub fn pretty(mut self) -> Self {
        self.pretty = true;
        self
    }
}

impl ModelCodec for JsonModelCodec<'_> {
    fn write(&self, model: &PerceptronModel) -> Result<Vec<u8>, CodecError> {
        let state = ModelState {
            format: FORMAT.to_string(),
            spec: model.spec(),
            name: model.name().to_string(),
            time: model.time,
            phase: model.phase,
            stats: model.stats.clone(),
            symbols: model.symbols.clone(),
            weights: model.weights.clone(),
            best_weights: model.best_weights.clone(),
        };
        let bytes = if self.pretty {
            serde_json::to_vec_pretty(&state)?
        } else {
            serde_json::to_vec(&state)?
        };
        debug!("encoded {} at {} into {} bytes", state.name, state.time, bytes.len());
        Ok(bytes)
    }

    fn read(&self, bytes: &[u8]) -> Result<PerceptronModel, CodecError> {
        let state: ModelState = serde_json::from_slice(bytes)?;
        if state.format != FORMAT {
            return Err(CodecError::Format(format!(
                "unsupported model format \"{}\" (expected \"{}\")",
                state.format, FORMAT
            )));
        }

        let mut env = Environment::new();
        let component = Interpreter::new(self.registry).parse_and_build(&state.spec, &mut env)?;
        let family = component.family();
        let mut model = component.to_owned_object::<ModelFamily>().ok_or_else(|| {
            CodecError::Format(format!("spec \"{}\" builds a {}, not a model", state.spec, family))
        })?;

        if model.weights.variant() != state.weights.variant() {
            return Err(CodecError::Format(format!(
                "spec \"{}\" builds a {} model but the stored weights are {}",
                state.spec,
                model.weights.variant(),
                state.weights.variant()
            )));
        }
        if model.name() != state.name {
            return Err(CodecError::Format(format!(
                "stored name \"{}\" does not match spec name \"{}\"",
                state.name,
                model.name()
            )));
        }

        if let Some(best) = &state.best_weights {
            if best.variant() != state.weights.variant() {
                return Err(CodecError::Format(format!(
                    "best weights are {} but the stored weights are {}",
                    best.variant(),
                    state.weights.variant()
                )));
            }
        }

        model.weights = state.weights;
        model.best_weights = state.best_weights;
        model.symbols = state.symbols;
        model.time = state.time;
        model.phase = state.phase;
        model.stats = state.stats;
        info!("restored {} at {}", model.name(), model.time);
        Ok(model)
    }
}
