//! Probabilistic fault injection
//!
//! Each request rolls once against the configured rate. A hit either
//! short-circuits the request with an [`InjectedError`] or adds a fixed delay,
//! depending on the configured [`ErrorType`].

use std::time::Duration;

use config_rs::{ErrorInjectionConfig, ErrorType};
use error_handling_rs::InjectedError;
use rand::seq::SliceRandom;
use rand::Rng;

/// One error an injected request may fail with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorDefinition {
    pub code: i32,
    pub weight: u32,
}

impl ErrorDefinition {
    pub fn new(code: i32, weight: u32) -> Self {
        Self { code, weight }
    }
}

/// Outcome of a positive injection decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InjectedFault {
    Error(InjectedError),
    Delay(Duration),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Injector {
    rate: f64,
    error_type: ErrorType,
    definitions: Vec<ErrorDefinition>,
    delay: Duration,
}

impl Injector {
    /// Inject one of `definitions` into a `rate` share of requests
    pub fn errors(rate: f64, definitions: Vec<ErrorDefinition>) -> Self {
        Self {
            rate: clamp_rate(rate),
            error_type: ErrorType::HttpError,
            definitions,
            delay: Duration::ZERO,
        }
    }

    /// Delay a `rate` share of requests by `delay`
    pub fn delays(rate: f64, delay: Duration) -> Self {
        Self {
            rate: clamp_rate(rate),
            error_type: ErrorType::Delay,
            definitions: Vec::new(),
            delay,
        }
    }

    pub fn disabled() -> Self {
        Self::errors(0.0, Vec::new())
    }

    /// Always fail with `code`; used to force a fault deterministically
    pub fn always(code: i32) -> Self {
        Self::errors(1.0, vec![ErrorDefinition::new(code, 1)])
    }

    pub fn from_config(config: &ErrorInjectionConfig) -> Self {
        match config.error_type {
            ErrorType::HttpError => Self::errors(
                config.rate,
                config
                    .codes
                    .iter()
                    .map(|code| ErrorDefinition::new(*code, 1))
                    .collect(),
            ),
            ErrorType::Delay => Self::delays(config.rate, config.delay),
        }
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn is_enabled(&self) -> bool {
        self.rate > 0.0
    }

    pub fn decide(&self) -> Option<InjectedFault> {
        self.decide_with(&mut rand::thread_rng())
    }

    pub fn decide_with<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<InjectedFault> {
        if !self.is_enabled() || !rng.gen_bool(self.rate) {
            return None;
        }

        match self.error_type {
            ErrorType::Delay => Some(InjectedFault::Delay(self.delay)),
            ErrorType::HttpError => {
                let code = self.choose_code(rng);
                log::debug!("Injecting error with code {}", code);
                Some(InjectedFault::Error(InjectedError::new(code)))
            }
        }
    }

    fn choose_code<R: Rng + ?Sized>(&self, rng: &mut R) -> i32 {
        match self.definitions.choose_weighted(rng, |d| d.weight) {
            Ok(definition) => definition.code,
            // empty list or all weights zero
            Err(_) => self.definitions.first().map(|d| d.code).unwrap_or(500),
        }
    }
}

impl Default for Injector {
    fn default() -> Self {
        Self::disabled()
    }
}

fn clamp_rate(rate: f64) -> f64 {
    if rate.is_nan() {
        0.0
    } else {
        rate.clamp(0.0, 1.0)
    }
}
