/// Newline-delimited JSON trace with captured arrival timestamps.
use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::{synthesize_prompt, RequestDescriptor};
use crate::error::ConfigError;

/// One trace line. Timestamps are milliseconds from trace start and must
/// be non-decreasing in file order.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TimestampedRecord {
    timestamp: f64,
    input_length: u64,
    output_length: u64,
}

#[derive(Debug)]
pub struct TimestampedTrace {
    path: PathBuf,
}

impl TimestampedTrace {
    pub fn open(path: &Path) -> Result<Self, ConfigError> {
        // Probe now so a bad path fails at setup, not mid-run.
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

    pub fn records(&self) -> Result<TimestampedIter, ConfigError> {
        let file = File::open(&self.path).map_err(|source| ConfigError::TraceOpen {
            path: self.path.clone(),
            source,
        })?;
        Ok(TimestampedIter {
            lines: BufReader::new(file).lines(),
            line: 0,
            next_id: 0,
            prev_timestamp: 0.0,
        })
    }
}

pub struct TimestampedIter {
    lines: Lines<BufReader<File>>,
    line: usize,
    next_id: u64,
    prev_timestamp: f64,
}

impl TimestampedIter {
    fn parse(&mut self, line: String) -> Result<RequestDescriptor, ConfigError> {
        let record: TimestampedRecord =
            serde_json::from_str(&line).map_err(|e| ConfigError::TraceRecord {
                line: self.line,
                reason: e.to_string(),
            })?;
        if !record.timestamp.is_finite() || record.timestamp < 0.0 {
            return Err(ConfigError::TraceRecord {
                line: self.line,
                reason: format!("invalid timestamp {}", record.timestamp),
            });
        }
        if record.timestamp < self.prev_timestamp {
            return Err(ConfigError::TraceRecord {
                line: self.line,
                reason: format!(
                    "timestamp {} decreases below previous {}",
                    record.timestamp, self.prev_timestamp
                ),
            });
        }
        self.prev_timestamp = record.timestamp;

        let id = self.next_id;
        self.next_id += 1;
        Ok(RequestDescriptor {
            id,
            input_tokens: record.input_length,
            output_tokens: record.output_length,
            prompt: synthesize_prompt(record.input_length),
            timestamp_ms: Some(record.timestamp as u64),
        })
    }
}

impl Iterator for TimestampedIter {
    type Item = Result<RequestDescriptor, ConfigError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.line += 1;
            match self.lines.next()? {
                Ok(line) if line.trim().is_empty() => continue,
                Ok(line) => return Some(self.parse(line)),
                Err(e) => {
                    return Some(Err(ConfigError::TraceRecord {
                        line: self.line,
                        reason: e.to_string(),
                    }))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_trace(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("temp file");
        file.write_all(content.as_bytes()).expect("write trace");
        file
    }

    #[test]
    fn parses_records_in_order() {
        let file = write_trace(concat!(
            "{\"timestamp\": 0, \"input_length\": 32, \"output_length\": 8}\n",
            "\n",
            "{\"timestamp\": 1500.5, \"input_length\": 64, \"output_length\": 16}\n",
        ));
        let trace = TimestampedTrace::open(file.path()).expect("open");
        let records: Vec<_> = trace
            .records()
            .expect("records")
            .collect::<Result<_, _>>()
            .expect("parse");

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, 0);
        assert_eq!(records[0].timestamp_ms, Some(0));
        assert_eq!(records[0].input_tokens, 32);
        assert_eq!(records[1].id, 1);
        assert_eq!(records[1].timestamp_ms, Some(1500));
        assert_eq!(records[1].output_tokens, 16);
        assert_eq!(records[1].prompt.split_whitespace().count(), 64);
    }

    #[test]
    fn malformed_record_reports_line_number() {
        let file = write_trace(concat!(
            "{\"timestamp\": 0, \"input_length\": 32, \"output_length\": 8}\n",
            "{\"timestamp\": \"not a number\"}\n",
        ));
        let trace = TimestampedTrace::open(file.path()).expect("open");
        let err = trace
            .records()
            .expect("records")
            .collect::<Result<Vec<_>, _>>()
            .unwrap_err();
        match err {
            ConfigError::TraceRecord { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn rejects_decreasing_timestamps() {
        let file = write_trace(concat!(
            "{\"timestamp\": 2000, \"input_length\": 32, \"output_length\": 8}\n",
            "{\"timestamp\": 1000, \"input_length\": 32, \"output_length\": 8}\n",
        ));
        let trace = TimestampedTrace::open(file.path()).expect("open");
        let err = trace
            .records()
            .expect("records")
            .collect::<Result<Vec<_>, _>>()
            .unwrap_err();
        assert!(matches!(err, ConfigError::TraceRecord { line: 2, .. }));
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let err = TimestampedTrace::open(Path::new("/nonexistent/trace.jsonl")).unwrap_err();
        assert!(matches!(err, ConfigError::TraceOpen { .. }));
    }
}
