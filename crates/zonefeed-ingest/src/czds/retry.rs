//! Retry classification and backoff
//!
//! A failed call is first mapped to a [`RetryAction`]. [`RetryBudget`] then
//! tracks how much of each kind of retry a single call has left:
//!
//! | Failure                         | Action           | Budget           |
//! |---------------------------------|------------------|------------------|
//! | 401 on an API call              | `Reauthenticate` | `max_retries`    |
//! | 429                             | `RetryAfter(d)`  | rate limit waits |
//! | 404, bad credentials            | `Permanent`      | none             |
//! | other HTTP, network, IO, size   | `Backoff`        | `max_retries`    |
//!
//! Reauthentication and rate limit waits do not consume backoff attempts.

use std::time::Duration;

use super::CzdsError;
use crate::config::RetryConfig;

/// What to do about a failed remote call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAction {
    /// Fetch a fresh token and retry immediately
    Reauthenticate,
    /// Sleep exactly this long, then retry
    RetryAfter(Duration),
    /// Sleep with exponential backoff, consuming one attempt
    Backoff,
    /// Do not retry
    Permanent,
}

/// Map a failure to its retry action
pub fn classify(error: &CzdsError, config: &RetryConfig) -> RetryAction {
    match error {
        CzdsError::Authentication(_) | CzdsError::NotFound(_) => RetryAction::Permanent,
        CzdsError::Http { status: 401, .. } => RetryAction::Reauthenticate,
        CzdsError::Http { status: 404, .. } => RetryAction::Permanent,
        CzdsError::RateLimited { retry_after } => RetryAction::RetryAfter(
            retry_after
                .map(Duration::from_secs)
                .unwrap_or_else(|| config.default_retry_after()),
        ),
        CzdsError::Http { .. }
        | CzdsError::Network(_)
        | CzdsError::Io(_)
        | CzdsError::SizeMismatch { .. } => RetryAction::Backoff,
    }
}

/// `min(base * 2^attempt, max)`
pub fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let factor = 2u32.saturating_pow(attempt);
    base.saturating_mul(factor).min(max)
}

/// Outcome of consulting the budget after a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Reauthenticate,
    Wait(Duration),
    GiveUp,
}

/// Per-call retry state
#[derive(Debug, Clone)]
pub struct RetryBudget {
    config: RetryConfig,
    attempts: u32,
    reauthentications: u32,
    rate_limit_waits: u32,
}

impl RetryBudget {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            attempts: 0,
            reauthentications: 0,
            rate_limit_waits: 0,
        }
    }

    /// Failed attempts that consumed a backoff
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Record a failure and decide how to continue
    pub fn next(&mut self, error: &CzdsError) -> RetryDecision {
        match classify(error, &self.config) {
            RetryAction::Permanent => RetryDecision::GiveUp,
            RetryAction::Reauthenticate => {
                if self.reauthentications >= self.config.max_retries {
                    return RetryDecision::GiveUp;
                }
                self.reauthentications += 1;
                RetryDecision::Reauthenticate
            },
            RetryAction::RetryAfter(delay) => {
                if self.rate_limit_waits >= self.config.max_rate_limit_waits {
                    return RetryDecision::GiveUp;
                }
                self.rate_limit_waits += 1;
                RetryDecision::Wait(delay)
            },
            RetryAction::Backoff => {
                self.attempts += 1;
                if self.attempts >= self.config.max_retries {
                    return RetryDecision::GiveUp;
                }
                RetryDecision::Wait(backoff_delay(
                    self.attempts - 1,
                    self.config.base_delay(),
                    self.config.max_delay(),
                ))
            },
        }
    }
}
