//! Target request duration
//!
//! A [`RequestDuration`] resolves the configured policy to a concrete,
//! non-negative duration once per request. Sampling takes the RNG as a
//! parameter so tests can use a seeded generator.

use std::f64::consts::PI;
use std::time::Duration;

use config_rs::{TimingConfig, TimingDistribution};
use rand::Rng;

/// How the target duration is chosen
#[derive(Debug, Clone, PartialEq)]
pub enum DurationPolicy {
    Fixed(Duration),
    Uniform { min: Duration, max: Duration },
    /// Gaussian, negative samples clamp to zero
    Normal { mean: Duration, std_dev: Duration },
    /// 50% of requests near p50, 40% near p90, 10% near p99, each with
    /// `variance` percent of uniform jitter
    Percentile {
        p50: Duration,
        p90: Duration,
        p99: Duration,
        variance: f64,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RequestDuration {
    policy: DurationPolicy,
}

impl RequestDuration {
    pub fn new(policy: DurationPolicy) -> Self {
        Self { policy }
    }

    pub fn fixed(duration: Duration) -> Self {
        Self::new(DurationPolicy::Fixed(duration))
    }

    pub fn from_config(config: &TimingConfig) -> Self {
        let p90 = if config.p90.is_zero() { config.p50 } else { config.p90 };
        let p99 = if config.p99.is_zero() { p90 } else { config.p99 };

        let policy = match config.distribution {
            TimingDistribution::Fixed => DurationPolicy::Fixed(config.p50),
            TimingDistribution::Uniform => DurationPolicy::Uniform {
                min: config.p50,
                max: p99,
            },
            TimingDistribution::Normal => DurationPolicy::Normal {
                mean: config.p50,
                std_dev: scale(config.p50, config.variance / 100.0),
            },
            TimingDistribution::Percentile => DurationPolicy::Percentile {
                p50: config.p50,
                p90,
                p99,
                variance: config.variance,
            },
        };
        Self::new(policy)
    }

    pub fn policy(&self) -> &DurationPolicy {
        &self.policy
    }

    /// Target total duration for one request
    pub fn calculate(&self) -> Duration {
        self.sample(&mut rand::thread_rng())
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        match &self.policy {
            DurationPolicy::Fixed(d) => *d,
            DurationPolicy::Uniform { min, max } => {
                let (lo, hi) = if min <= max { (*min, *max) } else { (*max, *min) };
                if lo == hi {
                    lo
                } else {
                    rng.gen_range(lo..=hi)
                }
            }
            DurationPolicy::Normal { mean, std_dev } => {
                // Box-Muller; 1 - u keeps the logarithm argument in (0, 1]
                let u1: f64 = 1.0 - rng.gen::<f64>();
                let u2: f64 = rng.gen();
                let z = (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos();
                from_secs(mean.as_secs_f64() + z * std_dev.as_secs_f64())
            }
            DurationPolicy::Percentile {
                p50,
                p90,
                p99,
                variance,
            } => {
                let base = match rng.gen_range(0..100) {
                    0..=49 => *p50,
                    50..=89 => *p90,
                    _ => *p99,
                };
                jitter(rng, base, *variance)
            }
        }
    }
}

/// Time still to wait to reach `target` after `elapsed` has passed
///
/// Zero when the work already took at least as long as the target; a request
/// is never sped up.
pub fn remaining(target: Duration, elapsed: Duration) -> Duration {
    target.saturating_sub(elapsed)
}

fn jitter<R: Rng + ?Sized>(rng: &mut R, base: Duration, variance_percent: f64) -> Duration {
    if !variance_percent.is_finite() || variance_percent <= 0.0 || base.is_zero() {
        return base;
    }
    let spread = base.as_secs_f64() * variance_percent / 100.0;
    let offset = rng.gen_range(-spread..=spread);
    from_secs(base.as_secs_f64() + offset)
}

fn scale(d: Duration, factor: f64) -> Duration {
    from_secs(d.as_secs_f64() * factor)
}

fn from_secs(secs: f64) -> Duration {
    if secs.is_finite() && secs > 0.0 {
        Duration::from_secs_f64(secs)
    } else {
        Duration::ZERO
    }
}
