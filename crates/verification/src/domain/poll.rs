use common::domain::{DomainError, DomainResult};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// How a bounded poll ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// The predicate held on the given attempt
    Satisfied { attempts: u32 },
    /// Every attempt was used without the predicate holding
    Exhausted { attempts: u32 },
}

impl PollOutcome {
    pub fn is_satisfied(&self) -> bool {
        matches!(self, Self::Satisfied { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            Self::Satisfied { attempts } | Self::Exhausted { attempts } => *attempts,
        }
    }
}

/// Wait `interval`, then evaluate `predicate`, up to `max_attempts` times.
///
/// Stops early on the first `true`. The wait comes before each check, so the
/// total time is bounded by `interval * max_attempts`. A predicate error ends
/// the poll with that error; cancelling `cancel` ends it with
/// `DomainError::Cancelled`.
pub async fn poll_until<F, Fut>(
    interval: Duration,
    max_attempts: u32,
    cancel: &CancellationToken,
    mut predicate: F,
) -> DomainResult<PollOutcome>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = DomainResult<bool>>,
{
    for attempt in 1..=max_attempts {
        tokio::select! {
            _ = cancel.cancelled() => {
                return Err(DomainError::Cancelled(format!(
                    "poll cancelled before attempt {}",
                    attempt
                )));
            }
            _ = tokio::time::sleep(interval) => {}
        }

        if predicate(attempt).await? {
            return Ok(PollOutcome::Satisfied { attempts: attempt });
        }
        trace!(attempt = attempt, max_attempts = max_attempts, "poll predicate not yet satisfied");
    }

    Ok(PollOutcome::Exhausted {
        attempts: max_attempts,
    })
}
