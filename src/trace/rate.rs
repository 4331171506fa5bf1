/// Tabular CSV trace for synthetic-rate mode. Rows carry token lengths
/// only; the scheduler owns arrival timing.
use std::fs::File;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::{synthesize_prompt, RequestDescriptor};
use crate::error::ConfigError;

/// One CSV row: `timestamp,input_token_length,output_token_length`. The
/// timestamp column is accepted for compatibility with generated traces
/// but ignored; timing is resampled at the configured rate.
#[derive(Debug, Clone, Deserialize)]
struct RateRecord {
    #[serde(rename = "timestamp")]
    _timestamp: f64,
    input_token_length: u64,
    output_token_length: u64,
}

pub struct RateTrace {
    path: PathBuf,
}

impl RateTrace {
    pub fn open(path: &Path) -> Result<Self, ConfigError> {
        File::open(path).map_err(|source| ConfigError::TraceOpen {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records(&self) -> Result<RateIter, ConfigError> {
        let reader =
            csv::Reader::from_path(&self.path).map_err(|e| ConfigError::TraceRecord {
                line: 1,
                reason: e.to_string(),
            })?;
        Ok(RateIter {
            rows: reader.into_deserialize(),
            line: 1,
            next_id: 0,
        })
    }
}

pub struct RateIter {
    rows: csv::DeserializeRecordsIntoIter<File, RateRecord>,
    line: usize,
    next_id: u64,
}

impl Iterator for RateIter {
    type Item = Result<RequestDescriptor, ConfigError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.line += 1;
        let row = self.rows.next()?;
        let record = match row {
            Ok(record) => record,
            Err(e) => {
                return Some(Err(ConfigError::TraceRecord {
                    line: self.line,
                    reason: e.to_string(),
                }))
            }
        };
        let id = self.next_id;
        self.next_id += 1;
        Some(Ok(RequestDescriptor {
            id,
            input_tokens: record.input_token_length,
            output_tokens: record.output_token_length,
            prompt: synthesize_prompt(record.input_token_length),
            timestamp_ms: None,
        }))
    }
}
