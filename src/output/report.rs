/// End-of-run reporting: human-readable summary, JSON summary, and the
/// per-request JSONL dump.
use std::fmt::Write as _;
use std::path::Path;

use clap::ValueEnum;
use tokio::io::AsyncWriteExt;

use crate::engine::metrics::{LatencyStats, MetricsSample, RunSummary};
use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ReportFormat {
    Text,
    Json,
}

pub fn render_json(summary: &RunSummary) -> Result<String, AppError> {
    Ok(serde_json::to_string_pretty(summary)?)
}

pub fn render_text(summary: &RunSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "\n=== Run Summary ===");
    let _ = writeln!(out, "Total requests:     {}", summary.total_requests);
    let _ = writeln!(out, "  Completed:        {}", summary.completed);
    let _ = writeln!(out, "  Failed:           {}", summary.failed);
    let _ = writeln!(out, "  Cancelled:        {}", summary.cancelled);
    if !summary.failure_kinds.is_empty() {
        let _ = writeln!(out, "Failures by kind:");
        for (kind, count) in &summary.failure_kinds {
            let _ = writeln!(out, "  {kind:<12} {count}");
        }
    }
    let _ = writeln!(out, "Wall clock:         {:.2}s", summary.wall_clock_secs);
    let _ = writeln!(
        out,
        "Request throughput: {:.2} req/s",
        summary.request_throughput
    );
    let _ = writeln!(
        out,
        "Token throughput:   {:.2} tok/s",
        summary.token_throughput
    );
    write_latency_section(&mut out, "Queue delay", summary.queue_delay.as_ref());
    write_latency_section(
        &mut out,
        "Time to first token",
        summary.time_to_first_token.as_ref(),
    );
    write_latency_section(&mut out, "End-to-end latency", summary.e2e_latency.as_ref());
    out
}

fn write_latency_section(out: &mut String, label: &str, stats: Option<&LatencyStats>) {
    match stats {
        Some(stats) => {
            let _ = writeln!(out, "{label}:");
            let _ = writeln!(
                out,
                "  mean {:.1}ms | p50 {}ms | p90 {}ms | p95 {}ms | p99 {}ms | max {}ms",
                stats.mean_ms, stats.p50_ms, stats.p90_ms, stats.p95_ms, stats.p99_ms, stats.max_ms
            );
        }
        None => {
            let _ = writeln!(out, "{label}: no data");
        }
    }
}

/// Append every sample as one JSON object per line.
pub async fn write_samples_jsonl(path: &Path, samples: &[MetricsSample]) -> Result<(), AppError> {
    let file = tokio::fs::File::create(path).await?;
    let mut writer = tokio::io::BufWriter::new(file);
    for sample in samples {
        let mut line = serde_json::to_vec(sample)?;
        line.push(b'\n');
        writer.write_all(&line).await?;
    }
    writer.flush().await?;
    Ok(())
}
