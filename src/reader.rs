//! Candidate set sources
//!
//! A source can be opened any number of times; each [`CandidateSetReader`]
//! it returns is a single pass in storage order.

use crate::error::ReadError;
use crate::features::FeatureExtractor;
use crate::symbols::Symbols;
use crate::types::{Candidate, CandidateSet};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

pub trait CandidateSetReader: Iterator<Item = Result<CandidateSet, ReadError>> {
    /// Candidate sets successfully produced so far.
    fn total_num_read(&self) -> u64;
}

pub trait CandidateSetSource {
    fn open(&self) -> Result<Box<dyn CandidateSetReader + '_>, ReadError>;
}

/// Candidate sets held in memory, cloned out on every pass.
#[derive(Debug, Clone, Default)]
pub struct InMemorySource {
    sets: Vec<CandidateSet>,
}

impl InMemorySource {
    pub fn new(sets: Vec<CandidateSet>) -> Self {
        Self { sets }
    }

    pub fn sets(&self) -> &[CandidateSet] {
        &self.sets
    }
}

pub struct InMemoryReader<'a> {
    sets: std::slice::Iter<'a, CandidateSet>,
    num_read: u64,
}

impl Iterator for InMemoryReader<'_> {
    type Item = Result<CandidateSet, ReadError>;

    fn next(&mut self) -> Option<Self::Item> {
        let set = self.sets.next()?.clone();
        self.num_read += 1;
        Some(Ok(set))
    }
}

impl CandidateSetReader for InMemoryReader<'_> {
    fn total_num_read(&self) -> u64 {
        self.num_read
    }
}

impl CandidateSetSource for InMemorySource {
    fn open(&self) -> Result<Box<dyn CandidateSetReader + '_>, ReadError> {
        Ok(Box::new(InMemoryReader {
            sets: self.sets.iter(),
            num_read: 0,
        }))
    }
}

/// One line of a candidate set file.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SetRecord {
    key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    loss_weight: Option<f64>,
    candidates: Vec<CandidateRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CandidateRecord {
    #[serde(default)]
    features: BTreeMap<String, f64>,
    #[serde(default)]
    reference: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    loss: Option<f64>,
}

impl From<SetRecord> for CandidateSet {
    fn from(record: SetRecord) -> Self {
        let candidates = record
            .candidates
            .into_iter()
            .map(|c| {
                let mut candidate = Candidate::symbolic(c.features.into_iter().collect(), c.reference);
                candidate.raw_score = c.score;
                candidate.text = c.text;
                if let Some(loss) = c.loss {
                    candidate.loss = loss;
                }
                candidate
            })
            .collect();
        CandidateSet {
            training_key: record.key,
            candidates,
            reference_text: record.reference,
            loss_weight: record.loss_weight.unwrap_or(1.0),
        }
    }
}

/// Reads one JSON candidate set per line from any buffered input.
pub struct JsonLinesReader<R> {
    input: R,
    line_number: usize,
    num_read: u64,
    max_candidates: Option<usize>,
    reporting_interval: u64,
    buf: Vec<u8>,
}

impl<R: BufRead> JsonLinesReader<R> {
    pub fn new(input: R) -> Self {
        Self {
            input,
            line_number: 0,
            num_read: 0,
            max_candidates: None,
            reporting_interval: 1000,
            buf: Vec::new(),
        }
    }

    /// Keep only the first `max` candidates of each set.
    pub fn with_max_candidates(mut self, max: Option<usize>) -> Self {
        self.max_candidates = max;
        self
    }

    /// Log progress every `interval` sets; 0 disables it.
    pub fn with_reporting_interval(mut self, interval: u64) -> Self {
        self.reporting_interval = interval;
        self
    }
}

impl<R: BufRead> Iterator for JsonLinesReader<R> {
    type Item = Result<CandidateSet, ReadError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.buf.clear();
            match self.input.read_until(b'\n', &mut self.buf) {
                Ok(0) => return None,
                Ok(_) => {}
                Err(e) => return Some(Err(ReadError::Io(e))),
            }
            // The line is consumed even when it cannot be decoded.
            self.line_number += 1;
            let line = match std::str::from_utf8(&self.buf) {
                Ok(text) => text.trim(),
                Err(e) => {
                    return Some(Err(ReadError::Malformed {
                        line: self.line_number,
                        message: format!("invalid UTF-8: {}", e),
                    }))
                }
            };
            if line.is_empty() {
                continue;
            }

            let record: SetRecord = match serde_json::from_str(line) {
                Ok(record) => record,
                Err(e) => {
                    return Some(Err(ReadError::Malformed {
                        line: self.line_number,
                        message: e.to_string(),
                    }))
                }
            };
            let mut set = CandidateSet::from(record);
            if let Some(max) = self.max_candidates {
                set.candidates.truncate(max);
            }
            self.num_read += 1;
            if self.reporting_interval > 0 && self.num_read % self.reporting_interval == 0 {
                info!("read {} candidate sets", self.num_read);
            }
            return Some(Ok(set));
        }
    }
}

impl<R: BufRead> CandidateSetReader for JsonLinesReader<R> {
    fn total_num_read(&self) -> u64 {
        self.num_read
    }
}

/// A JSON-lines candidate set file, reopened on every pass.
#[derive(Debug, Clone)]
pub struct JsonLinesSource {
    path: PathBuf,
    max_candidates: Option<usize>,
    reporting_interval: u64,
}

impl JsonLinesSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_candidates: None,
            reporting_interval: 1000,
        }
    }

    pub fn with_max_candidates(mut self, max: Option<usize>) -> Self {
        self.max_candidates = max;
        self
    }

    pub fn with_reporting_interval(mut self, interval: u64) -> Self {
        self.reporting_interval = interval;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CandidateSetSource for JsonLinesSource {
    fn open(&self) -> Result<Box<dyn CandidateSetReader + '_>, ReadError> {
        let file = File::open(&self.path)?;
        let reader = JsonLinesReader::new(BufReader::new(file))
            .with_max_candidates(self.max_candidates)
            .with_reporting_interval(self.reporting_interval);
        Ok(Box::new(reader))
    }
}

/// Runs a feature extractor over every set produced by another source.
pub struct ExtractingSource<S> {
    inner: S,
    extractor: Arc<dyn FeatureExtractor>,
}

impl<S: CandidateSetSource> ExtractingSource<S> {
    pub fn new(inner: S, extractor: Arc<dyn FeatureExtractor>) -> Self {
        Self { inner, extractor }
    }
}

struct ExtractingReader<'a> {
    inner: Box<dyn CandidateSetReader + 'a>,
    extractor: &'a dyn FeatureExtractor,
}

impl Iterator for ExtractingReader<'_> {
    type Item = Result<CandidateSet, ReadError>;

    fn next(&mut self) -> Option<Self::Item> {
        let next = self.inner.next()?;
        Some(next.map(|mut set| {
            set.extract_features(self.extractor);
            set
        }))
    }
}

impl CandidateSetReader for ExtractingReader<'_> {
    fn total_num_read(&self) -> u64 {
        self.inner.total_num_read()
    }
}

impl<S: CandidateSetSource> CandidateSetSource for ExtractingSource<S> {
    fn open(&self) -> Result<Box<dyn CandidateSetReader + '_>, ReadError> {
        Ok(Box::new(ExtractingReader {
            inner: self.inner.open()?,
            extractor: self.extractor.as_ref(),
        }))
    }
}

/// Writes candidate sets in the format [`JsonLinesReader`] reads.
///
/// Features are written by name: compiled features are named through
/// `symbols` when given, or by their numeric id otherwise.
pub struct JsonLinesWriter<W> {
    output: W,
    num_written: u64,
}

impl<W: Write> JsonLinesWriter<W> {
    pub fn new(output: W) -> Self {
        Self {
            output,
            num_written: 0,
        }
    }

    pub fn write(&mut self, set: &CandidateSet, symbols: Option<&Symbols>) -> Result<(), ReadError> {
        let candidates = set
            .candidates
            .iter()
            .map(|c| {
                let mut features: BTreeMap<String, f64> = BTreeMap::new();
                for (id, value) in c.features.iter() {
                    let name = symbols
                        .and_then(|s| s.symbol(id))
                        .map(str::to_string)
                        .unwrap_or_else(|| id.to_string());
                    *features.entry(name).or_insert(0.0) += value;
                }
                for (name, value) in &c.symbolic_features {
                    *features.entry(name.clone()).or_insert(0.0) += value;
                }
                CandidateRecord {
                    features,
                    reference: c.is_reference,
                    score: c.raw_score,
                    text: c.text.clone(),
                    loss: Some(c.loss),
                }
            })
            .collect();
        let record = SetRecord {
            key: set.training_key.clone(),
            reference: set.reference_text.clone(),
            loss_weight: (set.loss_weight != 1.0).then_some(set.loss_weight),
            candidates,
        };
        let line = serde_json::to_string(&record).map_err(std::io::Error::from)?;
        writeln!(self.output, "{}", line)?;
        self.num_written += 1;
        Ok(())
    }

    pub fn num_written(&self) -> u64 {
        self.num_written
    }

    pub fn into_inner(self) -> W {
        self.output
    }
}
