/// Per-request samples, channel-based collection, and end-of-run
/// aggregation.
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Terminal state of one admitted request. Set exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Completed { tokens_emitted: u64 },
    Failed { kind: String, message: String },
    Cancelled,
}

/// One record per terminal request. Appended once, never mutated.
/// All offsets are milliseconds from run start on the monotonic clock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSample {
    pub id: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Scheduled release offset.
    pub released_ms: u64,
    /// When the request was actually handed to the protocol adapter;
    /// `submitted_ms - released_ms` is queueing delay under backpressure.
    pub submitted_ms: u64,
    pub first_token_ms: Option<u64>,
    pub completed_ms: Option<u64>,
    #[serde(flatten)]
    pub outcome: Outcome,
}

impl MetricsSample {
    pub fn queue_delay_ms(&self) -> u64 {
        self.submitted_ms.saturating_sub(self.released_ms)
    }

    pub fn ttft_ms(&self) -> Option<u64> {
        self.first_token_ms
            .map(|t| t.saturating_sub(self.submitted_ms))
    }

    pub fn e2e_ms(&self) -> Option<u64> {
        self.completed_ms
            .map(|t| t.saturating_sub(self.submitted_ms))
    }

    pub fn is_completed(&self) -> bool {
        matches!(self.outcome, Outcome::Completed { .. })
    }
}

/// Handle workers use to report their terminal sample.
pub type SampleSender = mpsc::UnboundedSender<MetricsSample>;

/// Single-consumer accumulator for samples produced by concurrent
/// workers. The channel is the only synchronization: no sample is lost
/// or duplicated, and completion order does not matter.
pub struct MetricsCollector {
    rx: mpsc::UnboundedReceiver<MetricsSample>,
}

pub fn sample_channel() -> (SampleSender, MetricsCollector) {
    let (tx, rx) = mpsc::unbounded_channel();
    (tx, MetricsCollector { rx })
}

impl MetricsCollector {
    /// Drain samples until every sender is dropped, optionally feeding a
    /// live progress readout.
    pub async fn collect(
        mut self,
        progress: Option<Arc<indicatif::ProgressBar>>,
    ) -> Vec<MetricsSample> {
        let started = Instant::now();
        let mut samples = Vec::new();
        let mut completed = 0usize;
        let mut failed = 0usize;
        let mut cancelled = 0usize;

        while let Some(sample) = self.rx.recv().await {
            match sample.outcome {
                Outcome::Completed { .. } => completed += 1,
                Outcome::Failed { .. } => failed += 1,
                Outcome::Cancelled => cancelled += 1,
            }
            samples.push(sample);

            if let Some(ref pb) = progress {
                let elapsed = started.elapsed().as_secs_f64();
                let throughput = if elapsed > 0.0 {
                    completed as f64 / elapsed
                } else {
                    0.0
                };
                pb.set_message(format!(
                    "Completed: {} | Failed: {} | Cancelled: {} | Throughput: {:.1} req/s",
                    completed, failed, cancelled, throughput
                ));
                pb.set_position(samples.len() as u64);
            }
        }
        samples
    }
}

/// Latency distribution over one timing series, milliseconds.
#[derive(Debug, Clone, Serialize)]
pub struct LatencyStats {
    pub mean_ms: f64,
    pub p50_ms: u64,
    pub p90_ms: u64,
    pub p95_ms: u64,
    pub p99_ms: u64,
    pub max_ms: u64,
}

impl LatencyStats {
    /// One pass for the mean plus one sort for the percentiles.
    fn from_values(mut values: Vec<u64>) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let mean_ms = values.iter().sum::<u64>() as f64 / values.len() as f64;
        values.sort_unstable();
        Some(Self {
            mean_ms,
            p50_ms: percentile(&values, 0.50),
            p90_ms: percentile(&values, 0.90),
            p95_ms: percentile(&values, 0.95),
            p99_ms: percentile(&values, 0.99),
            max_ms: values[values.len() - 1],
        })
    }
}

fn percentile(sorted: &[u64], q: f64) -> u64 {
    let index = ((sorted.len() as f64) * q).ceil() as usize;
    let index = index.saturating_sub(1).min(sorted.len() - 1);
    sorted[index]
}

/// End-of-run aggregates over all terminal samples.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub total_requests: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub failure_kinds: BTreeMap<String, usize>,
    pub wall_clock_secs: f64,
    /// Completed requests per wall-clock second.
    pub request_throughput: f64,
    /// Emitted tokens per wall-clock second, over completed requests.
    pub token_throughput: f64,
    pub queue_delay: Option<LatencyStats>,
    pub time_to_first_token: Option<LatencyStats>,
    pub e2e_latency: Option<LatencyStats>,
}

impl RunSummary {
    pub fn from_samples(samples: &[MetricsSample], wall_clock: Duration) -> Self {
        let mut completed = 0usize;
        let mut failed = 0usize;
        let mut cancelled = 0usize;
        let mut tokens_emitted = 0u64;
        let mut failure_kinds: BTreeMap<String, usize> = BTreeMap::new();
        let mut queue_delays = Vec::with_capacity(samples.len());
        let mut ttfts = Vec::new();
        let mut e2es = Vec::new();

        for sample in samples {
            queue_delays.push(sample.queue_delay_ms());
            match &sample.outcome {
                Outcome::Completed { tokens_emitted: n } => {
                    completed += 1;
                    tokens_emitted += n;
                    if let Some(ttft) = sample.ttft_ms() {
                        ttfts.push(ttft);
                    }
                    if let Some(e2e) = sample.e2e_ms() {
                        e2es.push(e2e);
                    }
                }
                Outcome::Failed { kind, .. } => {
                    failed += 1;
                    *failure_kinds.entry(kind.clone()).or_default() += 1;
                }
                Outcome::Cancelled => cancelled += 1,
            }
        }

        let wall_clock_secs = wall_clock.as_secs_f64();
        let (request_throughput, token_throughput) = if wall_clock_secs > 0.0 {
            (
                completed as f64 / wall_clock_secs,
                tokens_emitted as f64 / wall_clock_secs,
            )
        } else {
            (0.0, 0.0)
        };

        Self {
            total_requests: samples.len(),
            completed,
            failed,
            cancelled,
            failure_kinds,
            wall_clock_secs,
            request_throughput,
            token_throughput,
            queue_delay: LatencyStats::from_values(queue_delays),
            time_to_first_token: LatencyStats::from_values(ttfts),
            e2e_latency: LatencyStats::from_values(e2es),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completed_sample(id: u64, submitted: u64, first: u64, done: u64, tokens: u64) -> MetricsSample {
        MetricsSample {
            id,
            input_tokens: 10,
            output_tokens: tokens,
            released_ms: submitted,
            submitted_ms: submitted,
            first_token_ms: Some(first),
            completed_ms: Some(done),
            outcome: Outcome::Completed {
                tokens_emitted: tokens,
            },
        }
    }

    #[test]
    fn percentile_selection_matches_sorted_rank() {
        let sorted: Vec<u64> = (1..=100).collect();
        assert_eq!(percentile(&sorted, 0.50), 50);
        assert_eq!(percentile(&sorted, 0.90), 90);
        assert_eq!(percentile(&sorted, 0.99), 99);
        assert_eq!(percentile(&[7], 0.99), 7);
    }

    #[test]
    fn summary_counts_partition_the_samples() {
        let mut samples = vec![
            completed_sample(0, 0, 100, 600, 32),
            completed_sample(1, 50, 120, 400, 16),
        ];
        samples.push(MetricsSample {
            id: 2,
            input_tokens: 10,
            output_tokens: 8,
            released_ms: 100,
            submitted_ms: 170,
            first_token_ms: None,
            completed_ms: None,
            outcome: Outcome::Failed {
                kind: "timeout".into(),
                message: "no data".into(),
            },
        });
        samples.push(MetricsSample {
            id: 3,
            input_tokens: 10,
            output_tokens: 8,
            released_ms: 200,
            submitted_ms: 200,
            first_token_ms: None,
            completed_ms: None,
            outcome: Outcome::Cancelled,
        });

        let summary = RunSummary::from_samples(&samples, Duration::from_secs(2));
        assert_eq!(summary.total_requests, 4);
        assert_eq!(summary.completed, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.cancelled, 1);
        assert_eq!(
            summary.completed + summary.failed + summary.cancelled,
            summary.total_requests
        );
        assert_eq!(summary.failure_kinds.get("timeout"), Some(&1));

        // 2 completions over 2 seconds, 48 tokens over 2 seconds.
        assert!((summary.request_throughput - 1.0).abs() < f64::EPSILON);
        assert!((summary.token_throughput - 24.0).abs() < f64::EPSILON);

        let e2e = summary.e2e_latency.expect("e2e stats");
        assert_eq!(e2e.max_ms, 600);
        let queue = summary.queue_delay.expect("queue stats");
        assert_eq!(queue.max_ms, 70);
    }

    #[test]
    fn zero_completion_run_is_reportable() {
        let samples = vec![MetricsSample {
            id: 0,
            input_tokens: 1,
            output_tokens: 1,
            released_ms: 0,
            submitted_ms: 0,
            first_token_ms: None,
            completed_ms: None,
            outcome: Outcome::Failed {
                kind: "connect".into(),
                message: "refused".into(),
            },
        }];
        let summary = RunSummary::from_samples(&samples, Duration::from_secs(1));
        assert_eq!(summary.completed, 0);
        assert_eq!(summary.request_throughput, 0.0);
        assert!(summary.time_to_first_token.is_none());
        assert!(summary.e2e_latency.is_none());
    }

    #[tokio::test]
    async fn collector_receives_every_sample_from_concurrent_senders() {
        let (tx, collector) = sample_channel();
        let mut tasks = Vec::new();
        for id in 0..64u64 {
            let tx = tx.clone();
            tasks.push(tokio::spawn(async move {
                tx.send(completed_sample(id, 0, 1, 2, 1)).unwrap();
            }));
        }
        drop(tx);
        for task in tasks {
            task.await.unwrap();
        }
        let samples = collector.collect(None).await;
        assert_eq!(samples.len(), 64);
        let mut ids: Vec<u64> = samples.iter().map(|s| s.id).collect();
        ids.sort_unstable();
        assert_eq!(ids, (0..64).collect::<Vec<u64>>());
    }

    #[test]
    fn sample_serializes_with_flattened_outcome() {
        let json = serde_json::to_value(completed_sample(1, 5, 30, 90, 4)).unwrap();
        assert_eq!(json["outcome"], "completed");
        assert_eq!(json["tokens_emitted"], 4);
        assert_eq!(json["submitted_ms"], 5);
    }
}
