//! Polling cadence for tracking a remote generation job.
//!
//! The orchestrator polls the generation service at a fixed interval while a
//! job is live, optionally spread out with jitter, and gives up after a
//! bounded number of attempts so a stuck remote job cannot be tracked
//! forever.
//!
//! All of the constructors and configuration functions are `const`.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use vidgen::poll::{Jitter, PollPolicy};
//!
//! let policy = PollPolicy::new(Duration::from_secs(3))
//!     .with_max_attempts(60)
//!     .with_jitter(Jitter::Relative(0.1));
//!
//! assert!(policy.next_delay() >= Duration::from_millis(2700));
//! assert!(policy.next_delay() <= Duration::from_millis(3300));
//! ```

use std::time::Duration;

use rand::Rng;

/// A random jitter applied to each poll delay.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Jitter {
    /// Added to the delay in the range `-delta <= jitter <= delta`.
    Absolute(Duration),
    /// Added as a proportion of the configured interval.
    Relative(f64),
}

impl Jitter {
    fn apply(&self, value: Duration) -> Duration {
        let millis = match self {
            Self::Absolute(delta) => delta.as_millis() as i64,
            Self::Relative(ratio) => (value.as_millis() as f64 * ratio).round() as i64,
        };
        let jitter = rand::thread_rng().gen_range(-millis..=millis);
        let adjusted = value.as_millis() as i64 + jitter;
        Duration::from_millis(adjusted.max(0) as u64)
    }
}

/// How often, and how long, to poll a tracked job.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollPolicy {
    interval: Duration,
    max_attempts: u32,
    jitter: Option<Jitter>,
}

impl PollPolicy {
    /// Polls with the given interval, a 60 attempt ceiling, and no jitter.
    pub const fn new(interval: Duration) -> Self {
        Self {
            interval,
            max_attempts: 60,
            jitter: None,
        }
    }

    pub const fn with_max_attempts(self, max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..self
        }
    }

    pub const fn with_jitter(self, jitter: Jitter) -> Self {
        Self {
            jitter: Some(jitter),
            ..self
        }
    }

    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Attempts after which a still-running job is failed with a timeout.
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// The delay before the next poll, with any configured jitter applied.
    pub fn next_delay(&self) -> Duration {
        match self.jitter {
            Some(jitter) => jitter.apply(self.interval),
            None => self.interval,
        }
    }
}

impl Default for PollPolicy {
    /// The reference cadence: every 3 seconds, at most 60 attempts.
    fn default() -> Self {
        Self::new(Duration::from_secs(3))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_polls_every_three_seconds_sixty_times() {
        let policy = PollPolicy::default();

        assert_eq!(policy.interval(), Duration::from_secs(3));
        assert_eq!(policy.max_attempts(), 60);
        assert_eq!(policy.next_delay(), Duration::from_secs(3));
    }

    #[test]
    fn absolute_jitter_stays_within_delta() {
        let policy = PollPolicy::new(Duration::from_secs(3))
            .with_jitter(Jitter::Absolute(Duration::from_secs(1)));

        for _ in 0..100 {
            let delay = policy.next_delay();
            assert!(delay >= Duration::from_secs(2));
            assert!(delay <= Duration::from_secs(4));
        }
    }

    #[test]
    fn relative_jitter_scales_with_interval() {
        let policy = PollPolicy::new(Duration::from_secs(10)).with_jitter(Jitter::Relative(0.5));

        for _ in 0..100 {
            let delay = policy.next_delay();
            assert!(delay >= Duration::from_secs(5));
            assert!(delay <= Duration::from_secs(15));
        }
    }
}
