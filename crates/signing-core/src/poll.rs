//! Bounded polling shared by single and batch reconciliation

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

/// Fixed interval and attempt bound for one polling loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl PollPolicy {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }

    /// Upper bound on wall time spent sleeping
    pub fn budget(&self) -> Duration {
        self.interval * self.max_attempts.saturating_sub(1)
    }
}

/// How a polling loop ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    /// The predicate accepted a value
    Ready { value: T, attempts: u32 },
    /// The bound ran out; `last` is the last value successfully fetched
    Exhausted { last: Option<T>, attempts: u32 },
}

impl<T> PollOutcome<T> {
    pub fn attempts(&self) -> u32 {
        match self {
            PollOutcome::Ready { attempts, .. } | PollOutcome::Exhausted { attempts, .. } => {
                *attempts
            }
        }
    }
}

/// Call `fetch` until `is_done` accepts its value or `policy.max_attempts`
/// calls have been made, sleeping `policy.interval` between calls.
///
/// Fetch errors count as an attempt and are logged; the loop keeps going.
pub async fn poll_until<T, E, F, Fut, P>(
    policy: PollPolicy,
    mut fetch: F,
    mut is_done: P,
) -> PollOutcome<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
    P: FnMut(&T) -> bool,
{
    let mut last = None;

    for attempt in 1..=policy.max_attempts {
        match fetch(attempt).await {
            Ok(value) if is_done(&value) => {
                debug!("Poll finished after {} attempt(s)", attempt);
                return PollOutcome::Ready {
                    value,
                    attempts: attempt,
                };
            }
            Ok(value) => last = Some(value),
            Err(e) => warn!("Poll attempt {} failed: {}", attempt, e),
        }

        if attempt < policy.max_attempts {
            tokio::time::sleep(policy.interval).await;
        }
    }

    PollOutcome::Exhausted {
        last,
        attempts: policy.max_attempts,
    }
}
