/// Trace sources: deterministic sequences of request descriptors parsed
/// from dataset files, one record in memory at a time.
pub mod rate;
pub mod timestamped;

use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use rate::{RateIter, RateTrace};
use timestamped::{TimestampedIter, TimestampedTrace};

/// One request to be replayed against the backend. Immutable once
/// produced by a trace source.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestDescriptor {
    /// Position in the trace, assigned in dataset order.
    pub id: u64,
    /// Prompt length in tokens.
    pub input_tokens: u64,
    /// Requested completion length in tokens.
    pub output_tokens: u64,
    /// Synthesized prompt text sized from `input_tokens`.
    pub prompt: String,
    /// Arrival timestamp from the trace, in milliseconds from trace
    /// start. Present only for timestamped traces.
    pub timestamp_ms: Option<u64>,
}

/// Dataset format, selected once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum TraceKind {
    /// Newline-delimited JSON records carrying their own arrival
    /// timestamps; replayed as captured.
    Timestamped,
    /// CSV records carrying only token lengths; arrival timing is
    /// synthesized by the scheduler.
    Rate,
}

/// A trace file plus its declared kind. Parsing is lazy and restartable:
/// `records` re-opens the file each time it is called.
pub enum TraceSource {
    Timestamped(TimestampedTrace),
    Rate(RateTrace),
}

impl TraceSource {
    pub fn open(kind: TraceKind, path: &Path) -> Result<Self, ConfigError> {
        match kind {
            TraceKind::Timestamped => TimestampedTrace::open(path).map(Self::Timestamped),
            TraceKind::Rate => RateTrace::open(path).map(Self::Rate),
        }
    }

    pub fn kind(&self) -> TraceKind {
        match self {
            Self::Timestamped(_) => TraceKind::Timestamped,
            Self::Rate(_) => TraceKind::Rate,
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            Self::Timestamped(t) => t.path(),
            Self::Rate(t) => t.path(),
        }
    }

    /// Stream through the whole file once, surfacing the first malformed
    /// record as a fatal error. Returns the record count. Runs before any
    /// traffic is generated.
    pub fn validate(&self) -> Result<usize, ConfigError> {
        let mut count = 0usize;
        for record in self.records()? {
            record?;
            count += 1;
        }
        if count == 0 {
            return Err(ConfigError::EmptyTrace(self.path().to_path_buf()));
        }
        Ok(count)
    }

    /// Lazy iterator over request descriptors in dataset order.
    pub fn records(&self) -> Result<TraceRecords, ConfigError> {
        match self {
            Self::Timestamped(t) => t.records().map(TraceRecords::Timestamped),
            Self::Rate(t) => t.records().map(TraceRecords::Rate),
        }
    }
}

pub enum TraceRecords {
    Timestamped(TimestampedIter),
    Rate(RateIter),
}

impl Iterator for TraceRecords {
    type Item = Result<RequestDescriptor, ConfigError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            Self::Timestamped(it) => it.next(),
            Self::Rate(it) => it.next(),
        }
    }
}

const FILLER_WORDS: &[&str] = &[
    "the", "quick", "brown", "fox", "jumps", "over", "lazy", "dogs", "while", "counting", "tokens",
    "under", "heavy", "load",
];

/// Deterministic filler prompt of roughly `tokens` whitespace-separated
/// words. Real tokenizer-backed prompt construction is delegated to
/// external tooling; the backend only needs plausible text of the right
/// magnitude.
pub(crate) fn synthesize_prompt(tokens: u64) -> String {
    let mut prompt = String::with_capacity(tokens as usize * 6);
    for i in 0..tokens {
        if i > 0 {
            prompt.push(' ');
        }
        prompt.push_str(FILLER_WORDS[i as usize % FILLER_WORDS.len()]);
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthesized_prompt_has_requested_word_count() {
        assert_eq!(synthesize_prompt(0), "");
        assert_eq!(synthesize_prompt(1), "the");
        let prompt = synthesize_prompt(100);
        assert_eq!(prompt.split_whitespace().count(), 100);
    }
}
