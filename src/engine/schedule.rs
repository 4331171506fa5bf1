/// Arrival scheduling: turns a trace into monotonic release offsets.
///
/// Rate mode synthesizes inter-arrival delays with mean 1/rate and the
/// configured coefficient of variation; replay mode reproduces the
/// trace's own timestamps. The scheduler is a pure timing-value
/// producer, it never blocks.
use std::time::Duration;

use rand::rngs::SmallRng;
use rand::SeedableRng;
use rand_distr::Distribution;

use crate::error::ConfigError;
use crate::trace::{RequestDescriptor, TraceKind};

use super::config::RunConfig;

pub enum ArrivalScheduler {
    /// cv = 0: fixed cadence, every delay exactly 1/rate.
    Constant { period: Duration, next: Duration },
    /// cv > 0: gamma-distributed delays with shape 1/cv² and scale
    /// cv²/rate, so mean = 1/rate and variance/mean² = cv². cv = 1
    /// degenerates to exponential (Poisson arrivals).
    Gamma {
        dist: rand_distr::Gamma<f64>,
        rng: SmallRng,
        next_secs: f64,
    },
    /// Timestamped trace: release at `timestamp / scale_factor`.
    Replay { scale_factor: f64 },
}

impl ArrivalScheduler {
    pub fn from_config(config: &RunConfig) -> Result<Self, ConfigError> {
        match config.trace_kind {
            TraceKind::Timestamped => {
                if config.scale_factor <= 0.0 || !config.scale_factor.is_finite() {
                    return Err(ConfigError::InvalidScaleFactor(config.scale_factor));
                }
                Ok(Self::Replay {
                    scale_factor: config.scale_factor,
                })
            }
            TraceKind::Rate => Self::synthetic(config.request_rate, config.cv, config.seed),
        }
    }

    /// Build a synthetic-arrival scheduler for the given mean rate
    /// (requests per second) and coefficient of variation.
    pub fn synthetic(rate: f64, cv: f64, seed: Option<u64>) -> Result<Self, ConfigError> {
        if rate <= 0.0 || !rate.is_finite() {
            return Err(ConfigError::InvalidRate(rate));
        }
        if cv < 0.0 || !cv.is_finite() {
            return Err(ConfigError::InvalidCv(cv));
        }
        let mean = 1.0 / rate;
        if cv == 0.0 {
            return Ok(Self::Constant {
                period: Duration::from_secs_f64(mean),
                next: Duration::ZERO,
            });
        }
        let shape = 1.0 / (cv * cv);
        let scale = mean * cv * cv;
        let dist =
            rand_distr::Gamma::new(shape, scale).map_err(|_| ConfigError::InvalidCv(cv))?;
        let rng = match seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_entropy(),
        };
        Ok(Self::Gamma {
            dist,
            rng,
            next_secs: 0.0,
        })
    }

    /// Release offset for the next request, measured from run start.
    /// Offsets are monotonically non-decreasing in call order for
    /// synthetic mode and in dataset order for replay.
    pub fn release_at(&mut self, descriptor: &RequestDescriptor) -> Duration {
        match self {
            Self::Constant { period, next } => {
                let at = *next;
                *next += *period;
                at
            }
            Self::Gamma {
                dist,
                rng,
                next_secs,
            } => {
                let at = Duration::from_secs_f64(*next_secs);
                *next_secs += dist.sample(rng);
                at
            }
            Self::Replay { scale_factor } => {
                let ts_ms = descriptor.timestamp_ms.unwrap_or_default() as f64;
                Duration::from_secs_f64(ts_ms / 1000.0 / *scale_factor)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(timestamp_ms: Option<u64>) -> RequestDescriptor {
        RequestDescriptor {
            id: 0,
            input_tokens: 1,
            output_tokens: 1,
            prompt: String::new(),
            timestamp_ms,
        }
    }

    fn sampled_delays(rate: f64, cv: f64, n: usize) -> Vec<f64> {
        let mut scheduler = ArrivalScheduler::synthetic(rate, cv, Some(42)).expect("scheduler");
        let desc = descriptor(None);
        let offsets: Vec<f64> = (0..=n)
            .map(|_| scheduler.release_at(&desc).as_secs_f64())
            .collect();
        offsets.windows(2).map(|w| w[1] - w[0]).collect()
    }

    #[test]
    fn constant_spacing_when_cv_is_zero() {
        let mut scheduler = ArrivalScheduler::synthetic(4.0, 0.0, None).expect("scheduler");
        let desc = descriptor(None);
        for i in 0..100u32 {
            let at = scheduler.release_at(&desc);
            assert_eq!(at, Duration::from_millis(250) * i);
        }
    }

    #[test]
    fn gamma_delays_converge_to_configured_mean_and_cv() {
        let rate = 10.0;
        for &cv in &[0.5, 1.0, 2.0] {
            let delays = sampled_delays(rate, cv, 10_000);
            let n = delays.len() as f64;
            let mean = delays.iter().sum::<f64>() / n;
            let var = delays.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / n;
            let sampled_cv = var.sqrt() / mean;

            let expected_mean = 1.0 / rate;
            assert!(
                (mean - expected_mean).abs() / expected_mean < 0.05,
                "cv={cv}: mean {mean} vs expected {expected_mean}"
            );
            assert!(
                (sampled_cv - cv).abs() / cv < 0.05,
                "cv={cv}: sampled cv {sampled_cv}"
            );
        }
    }

    #[test]
    fn seeded_schedules_are_reproducible() {
        let a = sampled_delays(5.0, 1.0, 100);
        let b = sampled_delays(5.0, 1.0, 100);
        assert_eq!(a, b);
    }

    #[test]
    fn replay_scales_trace_timestamps() {
        let mut scheduler = ArrivalScheduler::Replay { scale_factor: 2.0 };
        let at = scheduler.release_at(&descriptor(Some(3000)));
        assert_eq!(at, Duration::from_millis(1500));
    }

    #[test]
    fn invalid_parameters_are_rejected() {
        assert!(matches!(
            ArrivalScheduler::synthetic(0.0, 1.0, None),
            Err(ConfigError::InvalidRate(_))
        ));
        assert!(matches!(
            ArrivalScheduler::synthetic(1.0, -1.0, None),
            Err(ConfigError::InvalidCv(_))
        ));
    }
}
