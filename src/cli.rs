/// Command-line surface: flag parsing, config assembly, and the
/// top-level run orchestration.
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::watch;

use crate::engine::config::RunConfig;
use crate::engine::dispatcher::Dispatcher;
use crate::error::AppError;
use crate::http::client::{ClientConfig, ProtocolKind};
use crate::output::report::{self, ReportFormat};
use crate::trace::{TraceKind, TraceSource};

#[derive(Parser, Debug)]
#[command(
    name = "inferload",
    about = "Load generator and latency harness for LLM inference servers",
    version
)]
pub struct Cli {
    /// Full URL the generated requests are posted to
    #[arg(long)]
    pub endpoint: String,

    /// Wire protocol spoken to the backend
    #[arg(long, value_enum, default_value = "chat")]
    pub protocol: ProtocolKind,

    /// Model name sent in chat-style request bodies
    #[arg(long, default_value = "default")]
    pub model: String,

    /// Workload trace file (JSONL for timestamped, CSV for rate)
    #[arg(long)]
    pub trace: PathBuf,

    /// How the trace file is interpreted
    #[arg(long, value_enum, default_value = "rate")]
    pub trace_kind: TraceKind,

    /// Maximum simultaneously in-flight requests
    #[arg(long, default_value_t = 64)]
    pub concurrency: usize,

    /// Target mean arrival rate in requests per second (rate mode)
    #[arg(long, default_value_t = 1.0)]
    pub request_rate: f64,

    /// Coefficient of variation of inter-arrival delays; 0 is a
    /// constant cadence, 1 is Poisson (rate mode)
    #[arg(long, default_value_t = 1.0)]
    pub cv: f64,

    /// Replay speedup: trace timestamps are divided by this factor
    /// (timestamped mode)
    #[arg(long, default_value_t = 1.0)]
    pub scale_factor: f64,

    /// Stop releasing new requests after this many seconds
    #[arg(long, default_value_t = 60)]
    pub duration_secs: u64,

    /// Extra seconds granted to in-flight requests past the duration
    /// bound before they are marked cancelled
    #[arg(long, default_value_t = 30)]
    pub grace_secs: u64,

    /// Floor for the per-request timeout and the per-chunk stall bound,
    /// in seconds
    #[arg(long, default_value_t = 15)]
    pub stall_timeout_secs: u64,

    /// Seed for reproducible arrival sampling
    #[arg(long)]
    pub seed: Option<u64>,

    /// Bearer token for the backend, if it requires one
    #[arg(long, env = "INFERLOAD_API_KEY")]
    pub api_key: Option<String>,

    /// Write every per-request sample to this JSONL file
    #[arg(long)]
    pub output_path: Option<PathBuf>,

    /// Summary format printed to stdout
    #[arg(long, value_enum, default_value = "text")]
    pub format: ReportFormat,
}

impl Cli {
    fn into_run_config(self) -> (RunConfig, Option<String>, Option<PathBuf>, ReportFormat) {
        let config = RunConfig {
            endpoint: self.endpoint,
            protocol: self.protocol,
            model: self.model,
            trace_path: self.trace,
            trace_kind: self.trace_kind,
            concurrency: self.concurrency,
            request_rate: self.request_rate,
            cv: self.cv,
            scale_factor: self.scale_factor,
            duration: Duration::from_secs(self.duration_secs),
            grace_period: Duration::from_secs(self.grace_secs),
            stall_timeout: Duration::from_secs(self.stall_timeout_secs),
            seed: self.seed,
        };
        (config, self.api_key, self.output_path, self.format)
    }

    pub fn run(self) -> Result<(), AppError> {
        let (config, api_key, output_path, format) = self.into_run_config();
        config.validate()?;

        let trace = TraceSource::open(config.trace_kind, &config.trace_path)?;
        let record_count = trace.validate()?;
        tracing::info!(
            path = %config.trace_path.display(),
            records = record_count,
            "trace validated"
        );

        let client = config.protocol.build(ClientConfig {
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            api_key,
            stall_timeout: config.stall_timeout,
            ..ClientConfig::default()
        })?;

        let runtime = tokio::runtime::Runtime::new()?;
        runtime.block_on(async move {
            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("interrupt received, draining in-flight requests");
                    let _ = shutdown_tx.send(true);
                }
            });

            let progress = match format {
                ReportFormat::Text => {
                    let pb = ProgressBar::new(record_count as u64);
                    pb.set_style(
                        ProgressStyle::default_bar()
                            .template("{spinner} [{elapsed_precise}] {bar:40} {pos}/{len} {msg}")
                            .unwrap_or_else(|_| ProgressStyle::default_bar()),
                    );
                    Some(Arc::new(pb))
                }
                ReportFormat::Json => None,
            };

            let dispatcher = Dispatcher::new(Arc::new(config), Arc::new(client));
            let output = dispatcher
                .run_with_progress(&trace, shutdown_rx, progress.clone())
                .await?;
            if let Some(pb) = progress {
                pb.finish_and_clear();
            }

            if let Some(path) = output_path {
                report::write_samples_jsonl(&path, &output.samples).await?;
                tracing::info!(path = %path.display(), samples = output.samples.len(), "wrote per-request samples");
            }

            match format {
                ReportFormat::Text => print!("{}", report::render_text(&output.summary)),
                ReportFormat::Json => println!("{}", report::render_json(&output.summary)?),
            }
            Ok(())
        })
    }
}
