/// Run configuration, immutable for the run's lifetime and shared
/// read-only by all components.
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;
use crate::http::client::ProtocolKind;
use crate::trace::TraceKind;

/// Service-level targets used to derive the per-request timeout ceiling:
/// a request that would beat these targets is given that long plus the
/// configured floor before it is declared stuck.
const TTFT_SLO_SECS: f64 = 5.0;
const TPOT_SLO_SECS: f64 = 0.06;

#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Backend base address the protocol adapter posts to.
    pub endpoint: String,
    pub protocol: ProtocolKind,
    /// Model name sent in chat-style request bodies.
    pub model: String,
    pub trace_path: PathBuf,
    pub trace_kind: TraceKind,
    /// Maximum simultaneously in-flight requests.
    pub concurrency: usize,
    /// Target mean arrival rate in requests per second (rate mode only).
    pub request_rate: f64,
    /// Coefficient of variation of inter-arrival delays (rate mode only).
    pub cv: f64,
    /// Replay speedup: trace timestamps are divided by this factor.
    pub scale_factor: f64,
    /// No new requests are released after this much wall-clock time.
    pub duration: Duration,
    /// Extra time in-flight requests get past the duration bound before
    /// they are forcibly marked cancelled.
    pub grace_period: Duration,
    /// Floor for the per-request timeout ceiling; also bounds the wait
    /// for each streamed chunk.
    pub stall_timeout: Duration,
    /// Seed for reproducible arrival sampling.
    pub seed: Option<u64>,
}

impl RunConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::InvalidConcurrency);
        }
        if self.duration.is_zero() {
            return Err(ConfigError::InvalidDuration);
        }
        if self.scale_factor <= 0.0 || !self.scale_factor.is_finite() {
            return Err(ConfigError::InvalidScaleFactor(self.scale_factor));
        }
        if self.trace_kind == TraceKind::Rate {
            if self.request_rate <= 0.0 || !self.request_rate.is_finite() {
                return Err(ConfigError::InvalidRate(self.request_rate));
            }
            if self.cv < 0.0 || !self.cv.is_finite() {
                return Err(ConfigError::InvalidCv(self.cv));
            }
        }
        Ok(())
    }

    /// SLO-derived upper bound on one request's lifetime:
    /// `max(stall_timeout, ttft + tpot * output_tokens)`.
    pub fn request_ceiling(&self, output_tokens: u64) -> Duration {
        let slo = Duration::from_secs_f64(TTFT_SLO_SECS + TPOT_SLO_SECS * output_tokens as f64);
        self.stall_timeout.max(slo)
    }
}
