//! Reranker - averaged perceptron training over candidate sets
//!
//! Two halves:
//! - A small construction language that builds typed component graphs from
//!   spec text such as `Linear(kernel=Polynomial(degree=3), step=Fixed(0.5))`
//! - Linear and kernelized averaged perceptron models trained online over
//!   sets of scored candidates

pub mod error;
pub mod tokenizer;
pub mod value;
pub mod registry;
pub mod environment;
pub mod interpreter;
pub mod types;
pub mod symbols;
pub mod kernel;
pub mod update;
pub mod weights;
pub mod model;
pub mod features;
pub mod reader;
pub mod codec;
pub mod config;

pub use error::{CodecError, ReadError, SpecError, TrainError};
pub use tokenizer::{Token, TokenKind, Tokenizer};
pub use value::{coerce, MemberType, Shared, Value, ValueType};
pub use registry::{
    Component, Family, FactoryConstructible, FactoryRegistry, FactoryRegistryBuilder, Initializers,
    MemberSpec, Registration,
};
pub use environment::Environment;
pub use interpreter::{Evaluation, Interpreter};
pub use types::*;
pub use symbols::Symbols;
pub use kernel::{DotProduct, KernelFamily, KernelFunction, Polynomial, Rbf};
pub use update::{
    Decaying, Fixed, Margin, Mira, Misranked, StepContext, StepSchedule, StepScheduleFamily,
    UpdatePredicate, UpdatePredicateFamily, UpdateSignal,
};
pub use weights::{ScoreMode, Weights};
pub use model::{
    EvalReport, ExampleOutcome, ModelFamily, ModelStats, PerceptronModel, Phase, ReadErrorPolicy,
    TrainOptions, TrainingReport, TrainingWarning,
};
pub use features::{ExecutiveExtractor, FeatureExtractor, FeatureExtractorFamily, NgramExtractor, TokenCountExtractor};
pub use reader::{CandidateSetReader, CandidateSetSource, ExtractingSource, InMemorySource, JsonLinesReader, JsonLinesSource, JsonLinesWriter};
pub use codec::{JsonModelCodec, ModelCodec, ModelState};
pub use config::TrainingConfig;

#[cfg(test)]
mod tests;
