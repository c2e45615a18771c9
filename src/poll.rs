//! Poll-until-stable.
//!
//! The editor never reports that it finished ingesting input, so completion
//! is inferred from a cheap proxy (the buffer line count) that stops moving.
//! The first sample has nothing to compare against and always counts as a
//! change, so stability needs at least two samples.

use std::fmt::Debug;
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::PollingConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    /// Sleep before each sample.
    pub interval: Duration,
    pub max_attempts: u32,
}

impl From<&PollingConfig> for PollSettings {
    fn from(config: &PollingConfig) -> Self {
        Self {
            interval: Duration::from_millis(config.interval_millis),
            max_attempts: config.max_attempts,
        }
    }
}

/// How a poll ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PollOutcome<T> {
    /// Two consecutive samples were equal.
    Converged { value: T, attempts: u32 },
    /// `max_attempts` samples were taken without two equal in a row.
    TimedOut { last: Option<T>, attempts: u32 },
}

impl<T> PollOutcome<T> {
    pub fn converged(&self) -> bool {
        matches!(self, PollOutcome::Converged { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            PollOutcome::Converged { attempts, .. } | PollOutcome::TimedOut { attempts, .. } => {
                *attempts
            }
        }
    }
}

/// Sample until two consecutive values match or attempts run out.
///
/// Errors from `sample` abort the poll immediately.
pub fn poll_until_stable<T, F>(settings: PollSettings, mut sample: F) -> Result<PollOutcome<T>>
where
    T: PartialEq + Debug,
    F: FnMut(u32) -> Result<T>,
{
    let mut previous: Option<T> = None;

    for attempt in 1..=settings.max_attempts {
        std::thread::sleep(settings.interval);
        let current = sample(attempt)?;
        debug!(attempt, sample = ?current, "poll sample");

        if previous.as_ref() == Some(&current) {
            info!(attempts = attempt, value = ?current, "poll converged");
            return Ok(PollOutcome::Converged {
                value: current,
                attempts: attempt,
            });
        }
        previous = Some(current);
    }

    warn!(
        attempts = settings.max_attempts,
        last = ?previous,
        "poll exhausted attempts without converging"
    );
    Ok(PollOutcome::TimedOut {
        last: previous,
        attempts: settings.max_attempts,
    })
}
