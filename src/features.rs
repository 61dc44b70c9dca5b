//! Feature extraction from candidate text
//!
//! Extractors emit named features; the model that consumes a candidate set
//! compiles the names into ids through its own symbol table.

use crate::error::SpecError;
use crate::registry::{Family, FactoryConstructible, Initializers};
use crate::value::Shared;
use std::fmt::Debug;
use std::sync::Arc;

pub trait FeatureExtractor: Debug + Send + Sync {
    /// Append features of `raw_input` to `out`. Repeated names add up.
    fn extract(&self, raw_input: &str, out: &mut Vec<(String, f64)>);
}

pub struct FeatureExtractorFamily;

impl Family for FeatureExtractorFamily {
    const NAME: &'static str = "FeatureExtractor";
    type Object = dyn FeatureExtractor;
}

const SENTENCE_START: &str = "<s>";
const SENTENCE_END: &str = "</s>";

/// Every n-gram of order 1..=n over whitespace tokens padded with `<s>` and
/// `</s>`, named `prefix{tok,tok,...}`.
#[derive(Debug, Clone)]
pub struct NgramExtractor {
    pub n: i64,
    pub prefix: String,
    pub lowercase: bool,
}

impl Default for NgramExtractor {
    fn default() -> Self {
        Self {
            n: 2,
            prefix: "ng".to_string(),
            lowercase: true,
        }
    }
}

impl FeatureExtractor for NgramExtractor {
    fn extract(&self, raw_input: &str, out: &mut Vec<(String, f64)>) {
        let text = if self.lowercase {
            raw_input.to_lowercase()
        } else {
            raw_input.to_string()
        };
        let mut tokens = vec![SENTENCE_START];
        tokens.extend(text.split_whitespace());
        tokens.push(SENTENCE_END);

        let n = self.n as usize;
        let last = tokens.len() - 1;
        for end in 1..tokens.len() {
            for start in (end + 1).saturating_sub(n)..=end {
                // A lone "</s>" says nothing.
                if start == end && end == last {
                    continue;
                }
                let name = format!("{}{{{}}}", self.prefix, tokens[start..=end].join(","));
                out.push((name, 1.0));
            }
        }
    }
}

impl FactoryConstructible for NgramExtractor {
    type Family = FeatureExtractorFamily;

    fn register_initializers(init: &mut Initializers<Self>) {
        init.add("n", false, |e: &mut Self, v: i64| e.n = v)
            .add("prefix", false, |e: &mut Self, v: String| e.prefix = v)
            .add("lowercase", false, |e: &mut Self, v: bool| e.lowercase = v)
            .positional(&["n", "prefix"]);
    }

    fn finish(self) -> Result<Arc<dyn FeatureExtractor>, SpecError> {
        if self.n < 1 {
            return Err(SpecError::InvalidConfiguration {
                factory: "Ngram".to_string(),
                message: format!("n must be at least 1, got {}", self.n),
            });
        }
        let e: Arc<dyn FeatureExtractor> = Arc::new(self);
        Ok(e)
    }
}

/// Single feature holding the number of whitespace tokens.
#[derive(Debug, Clone)]
pub struct TokenCountExtractor {
    pub name: String,
}

impl Default for TokenCountExtractor {
    fn default() -> Self {
        Self {
            name: "num_tokens".to_string(),
        }
    }
}

impl FeatureExtractor for TokenCountExtractor {
    fn extract(&self, raw_input: &str, out: &mut Vec<(String, f64)>) {
        let count = raw_input.split_whitespace().count();
        if count > 0 {
            out.push((self.name.clone(), count as f64));
        }
    }
}

impl FactoryConstructible for TokenCountExtractor {
    type Family = FeatureExtractorFamily;

    fn register_initializers(init: &mut Initializers<Self>) {
        init.add("name", false, |e: &mut Self, v: String| e.name = v);
    }

    fn finish(self) -> Result<Arc<dyn FeatureExtractor>, SpecError> {
        let e: Arc<dyn FeatureExtractor> = Arc::new(self);
        Ok(e)
    }
}

/// Runs a suite of extractors in order.
#[derive(Debug, Default)]
pub struct ExecutiveExtractor {
    pub extractors: Vec<Arc<dyn FeatureExtractor>>,
}

impl FeatureExtractor for ExecutiveExtractor {
    fn extract(&self, raw_input: &str, out: &mut Vec<(String, f64)>) {
        for extractor in &self.extractors {
            extractor.extract(raw_input, out);
        }
    }
}

impl FactoryConstructible for ExecutiveExtractor {
    type Family = FeatureExtractorFamily;

    fn register_initializers(init: &mut Initializers<Self>) {
        init.add(
            "extractors",
            true,
            |e: &mut Self, v: Vec<Shared<FeatureExtractorFamily>>| {
                e.extractors = v.into_iter().map(Shared::into_inner).collect();
            },
        )
        .positional(&["extractors"]);
    }

    fn finish(self) -> Result<Arc<dyn FeatureExtractor>, SpecError> {
        let e: Arc<dyn FeatureExtractor> = Arc::new(self);
        Ok(e)
    }
}
