/// Bounded-concurrency dispatch: releases requests at their scheduled
/// times, launches protocol calls, and enforces the run time limit.
use std::sync::Arc;
use std::time::Duration;

use indicatif::ProgressBar;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::{AppError, RequestError};
use crate::http::client::ProtocolClient;
use crate::trace::{RequestDescriptor, TraceSource};

use super::config::RunConfig;
use super::metrics::{sample_channel, MetricsSample, Outcome, RunSummary, SampleSender};
use super::schedule::ArrivalScheduler;

pub struct RunOutput {
    pub samples: Vec<MetricsSample>,
    pub summary: RunSummary,
    pub wall_clock: Duration,
}

pub struct Dispatcher<C> {
    config: Arc<RunConfig>,
    client: Arc<C>,
}

impl<C: ProtocolClient + 'static> Dispatcher<C> {
    pub fn new(config: Arc<RunConfig>, client: Arc<C>) -> Self {
        Self { config, client }
    }

    pub async fn run(
        &self,
        trace: &TraceSource,
        shutdown: watch::Receiver<bool>,
    ) -> Result<RunOutput, AppError> {
        self.run_with_progress(trace, shutdown, None).await
    }

    /// Drive the whole run: admit requests in scheduled-time order under
    /// the concurrency cap, stop releasing at the duration bound, then
    /// drain every in-flight request to a terminal outcome.
    pub async fn run_with_progress(
        &self,
        trace: &TraceSource,
        mut shutdown: watch::Receiver<bool>,
        progress: Option<Arc<ProgressBar>>,
    ) -> Result<RunOutput, AppError> {
        let mut scheduler = ArrivalScheduler::from_config(&self.config)?;
        let records = trace.records()?;

        let start = Instant::now();
        let deadline = start + self.config.duration;
        let grace_deadline = deadline + self.config.grace_period;

        let (sample_tx, collector) = sample_channel();
        let collector_handle = tokio::spawn(collector.collect(progress));

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let mut handles: Vec<JoinHandle<()>> = Vec::new();
        let mut admitted = 0usize;

        for record in records {
            let descriptor = record?;
            let release_offset = scheduler.release_at(&descriptor);
            let release_time = start + release_offset;
            if release_time >= deadline {
                // Scheduled past the duration bound: nothing after this
                // point may be released either, release times are
                // non-decreasing.
                break;
            }

            // Wait for the scheduled release time.
            let released = tokio::select! {
                _ = tokio::time::sleep_until(release_time) => true,
                _ = shutdown_signalled(&mut shutdown) => false,
                _ = tokio::time::sleep_until(deadline) => false,
            };
            if !released {
                break;
            }

            // Wait for a free concurrency slot (backpressure, not drop).
            let permit = tokio::select! {
                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                _ = shutdown_signalled(&mut shutdown) => break,
                _ = tokio::time::sleep_until(deadline) => break,
            };

            admitted += 1;
            tracing::debug!(
                id = descriptor.id,
                release_ms = release_offset.as_millis() as u64,
                "releasing request"
            );

            let client = Arc::clone(&self.client);
            let config = Arc::clone(&self.config);
            let worker_shutdown = shutdown.clone();
            let samples = sample_tx.clone();
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                run_request(
                    client,
                    config,
                    descriptor,
                    release_offset,
                    start,
                    grace_deadline,
                    worker_shutdown,
                    samples,
                )
                .await;
            }));
        }

        // Drain: every admitted request resolves to a terminal outcome
        // before the summary is produced.
        drop(sample_tx);
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::warn!("worker task failed: {e}");
            }
        }
        let samples = collector_handle.await.unwrap_or_default();
        let wall_clock = start.elapsed();
        let summary = RunSummary::from_samples(&samples, wall_clock);
        debug_assert_eq!(samples.len(), admitted);
        tracing::info!(
            admitted,
            completed = summary.completed,
            failed = summary.failed,
            cancelled = summary.cancelled,
            "run drained"
        );

        Ok(RunOutput {
            samples,
            summary,
            wall_clock,
        })
    }
}

enum WorkerResult {
    Finished(crate::http::client::StreamStats),
    Failed(RequestError),
    Abandoned,
}

/// Execute one admitted request to its terminal outcome. The request is
/// bounded by its SLO-derived ceiling and, past the grace deadline (or a
/// grace period after an external shutdown), forcibly abandoned.
#[allow(clippy::too_many_arguments)]
async fn run_request<C: ProtocolClient>(
    client: Arc<C>,
    config: Arc<RunConfig>,
    descriptor: RequestDescriptor,
    released: Duration,
    start: Instant,
    grace_deadline: Instant,
    shutdown: watch::Receiver<bool>,
    samples: SampleSender,
) {
    let id = descriptor.id;
    let input_tokens = descriptor.input_tokens;
    let output_tokens = descriptor.output_tokens;
    let submitted = start.elapsed();
    let ceiling = config.request_ceiling(output_tokens);

    let result = tokio::select! {
        result = tokio::time::timeout(ceiling, client.execute(&descriptor)) => match result {
            Ok(Ok(stats)) => WorkerResult::Finished(stats),
            Ok(Err(err)) => WorkerResult::Failed(err),
            Err(_) => WorkerResult::Failed(RequestError::Timeout(ceiling)),
        },
        _ = forced_cancellation(shutdown, grace_deadline, config.grace_period) => {
            WorkerResult::Abandoned
        }
    };

    let (first_token_ms, completed_ms, outcome) = match result {
        WorkerResult::Finished(stats) => (
            stats
                .first_token_offset
                .map(|d| (submitted + d).as_millis() as u64),
            Some((submitted + stats.total_duration).as_millis() as u64),
            Outcome::Completed {
                tokens_emitted: stats.tokens_emitted,
            },
        ),
        WorkerResult::Failed(err) => {
            tracing::warn!(id, error = %err, "request failed");
            (
                None,
                None,
                Outcome::Failed {
                    kind: err.kind().to_string(),
                    message: err.to_string(),
                },
            )
        }
        WorkerResult::Abandoned => (None, None, Outcome::Cancelled),
    };

    // The collector outlives every worker; a send failure means the run
    // is already tearing down and the sample would be dropped anyway.
    let _ = samples.send(MetricsSample {
        id,
        input_tokens,
        output_tokens,
        released_ms: released.as_millis() as u64,
        submitted_ms: submitted.as_millis() as u64,
        first_token_ms,
        completed_ms,
        outcome,
    });
}

/// Resolves once the shutdown flag is raised. Never resolves if the
/// controlling sender disappears without signalling.
async fn shutdown_signalled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            futures::future::pending::<()>().await;
        }
    }
}

/// In-flight requests get a bounded grace period: after an external
/// shutdown signal plus `grace`, or past the run's grace deadline,
/// whichever comes first.
async fn forced_cancellation(
    mut shutdown: watch::Receiver<bool>,
    grace_deadline: Instant,
    grace: Duration,
) {
    let after_signal = async {
        shutdown_signalled(&mut shutdown).await;
        tokio::time::sleep(grace).await;
    };
    tokio::select! {
        _ = after_signal => {}
        _ = tokio::time::sleep_until(grace_deadline) => {}
    }
}
