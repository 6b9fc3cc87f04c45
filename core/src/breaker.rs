//! Per-provider circuit breaker.
//!
//! Extends `agent::runtime::impls::retry::CircuitBreaker` in three ways
//! the spec requires and the teacher's single-instance version didn't
//! have: per-provider keying, doubling-and-capped retry-after on
//! repeated half-open failure, and single-probe admission in `HalfOpen`
//! (the teacher admitted every concurrent caller once the timeout
//! elapsed).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::config::BreakerConfig;
use crate::error::RlmError;
use crate::types::ProviderId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// State for one provider. `retry_after` doubles (capped at
/// `max_retry_after`) every time a `HalfOpen` probe fails.
struct ProviderBreaker {
    state: Mutex<CircuitState>,
    failures: AtomicU32,
    successes: AtomicU32,
    last_failure: Mutex<Option<Instant>>,
    retry_after: Mutex<Duration>,
    /// Guards `HalfOpen` admission so exactly one concurrent caller gets
    /// the probe; the rest see `BreakerOpen` until it resolves.
    probe_in_flight: AtomicBool,
    last_error: Mutex<Option<String>>,
}

impl ProviderBreaker {
    fn new(base_retry_after: Duration) -> Self {
        Self {
            state: Mutex::new(CircuitState::Closed),
            failures: AtomicU32::new(0),
            successes: AtomicU32::new(0),
            last_failure: Mutex::new(None),
            retry_after: Mutex::new(base_retry_after),
            probe_in_flight: AtomicBool::new(false),
            last_error: Mutex::new(None),
        }
    }
}

pub struct CircuitBreaker {
    config: BreakerConfig,
    base_retry_after: Duration,
    max_retry_after: Duration,
    providers: Mutex<HashMap<String, ProviderBreaker>>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        let base_retry_after = Duration::from_secs(config.open_duration_secs);
        Self {
            config,
            base_retry_after,
            max_retry_after: base_retry_after * 8,
            providers: Mutex::new(HashMap::new()),
        }
    }

    fn with_provider<R>(&self, provider: &ProviderId, f: impl FnOnce(&ProviderBreaker) -> R) -> R {
        let mut providers = self.providers.lock().unwrap();
        let entry = providers
            .entry(provider.as_str().to_string())
            .or_insert_with(|| ProviderBreaker::new(self.base_retry_after));
        f(entry)
    }

    pub fn state(&self, provider: &ProviderId) -> CircuitState {
        self.with_provider(provider, |p| *p.state.lock().unwrap())
    }

    /// Admits or rejects a call. `Closed` always admits. `Open` admits
    /// only once the wall clock has passed `open-until`, transitioning
    /// to `HalfOpen` and granting the single probe to the caller that
    /// observes the transition; all other callers see `BreakerOpen`.
    pub fn admit(&self, provider: &ProviderId) -> Result<(), RlmError> {
        self.with_provider(provider, |p| {
            let mut state = p.state.lock().unwrap();
            match *state {
                CircuitState::Closed => Ok(()),
                CircuitState::Open => {
                    let elapsed_ok = p
                        .last_failure
                        .lock()
                        .unwrap()
                        .map(|t| t.elapsed() >= *p.retry_after.lock().unwrap())
                        .unwrap_or(true);
                    if !elapsed_ok {
                        return Err(RlmError::BreakerOpen {
                            provider: provider.to_string(),
                        });
                    }
                    // Transition to HalfOpen and claim the probe slot.
                    *state = CircuitState::HalfOpen;
                    if p.probe_in_flight
                        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                        .is_ok()
                    {
                        Ok(())
                    } else {
                        Err(RlmError::BreakerOpen {
                            provider: provider.to_string(),
                        })
                    }
                }
                CircuitState::HalfOpen => {
                    if p.probe_in_flight
                        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                        .is_ok()
                    {
                        Ok(())
                    } else {
                        Err(RlmError::BreakerOpen {
                            provider: provider.to_string(),
                        })
                    }
                }
            }
        })
    }

    pub fn record_success(&self, provider: &ProviderId) {
        self.with_provider(provider, |p| {
            let mut state = p.state.lock().unwrap();
            match *state {
                CircuitState::HalfOpen => {
                    let successes = p.successes.fetch_add(1, Ordering::SeqCst) + 1;
                    p.probe_in_flight.store(false, Ordering::SeqCst);
                    if successes >= self.config.success_threshold {
                        *state = CircuitState::Closed;
                        p.failures.store(0, Ordering::SeqCst);
                        p.successes.store(0, Ordering::SeqCst);
                        *p.retry_after.lock().unwrap() = self.base_retry_after;
                    }
                }
                CircuitState::Closed => {
                    p.failures.store(0, Ordering::SeqCst);
                }
                CircuitState::Open => {}
            }
        })
    }

    pub fn record_failure(&self, provider: &ProviderId, error: impl Into<String>) {
        let error = error.into();
        self.with_provider(provider, |p| {
            let mut state = p.state.lock().unwrap();
            *p.last_error.lock().unwrap() = Some(error.clone());
            *p.last_failure.lock().unwrap() = Some(Instant::now());
            match *state {
                CircuitState::HalfOpen => {
                    // Probe failed: reopen and double the retry-after, capped.
                    p.probe_in_flight.store(false, Ordering::SeqCst);
                    p.successes.store(0, Ordering::SeqCst);
                    *state = CircuitState::Open;
                    let mut retry_after = p.retry_after.lock().unwrap();
                    *retry_after = (*retry_after * 2).min(self.max_retry_after);
                }
                CircuitState::Closed => {
                    let failures = p.failures.fetch_add(1, Ordering::SeqCst) + 1;
                    if failures >= self.config.max_failures {
                        *state = CircuitState::Open;
                        *p.retry_after.lock().unwrap() = self.base_retry_after;
                    }
                }
                CircuitState::Open => {}
            }
        })
    }

    pub fn last_error(&self, provider: &ProviderId) -> Option<String> {
        self.with_provider(provider, |p| p.last_error.lock().unwrap().clone())
    }
}
