//! Retry and commit policies.
//!
//! - [`RetryPolicy`]: how many times one chunk invocation is attempted and
//!   how long to wait between attempts
//! - [`CommitPolicy`]: whether a finished batch is committed given how many
//!   chunks failed
//!
//! # Example
//!
//! ```ignore
//! use datacube::executor::{CommitPolicy, RetryPolicy};
//!
//! // Two retries after the first attempt, with exponential backoff
//! let retry = RetryPolicy::from_retries(2);
//!
//! // Commit only when at least 90% of chunks came back
//! let commit = CommitPolicy::partial_success(0.9);
//! ```

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

// =============================================================================
// Retry Policy Constants
// =============================================================================

/// Default initial delay for exponential backoff (100ms).
pub const DEFAULT_INITIAL_DELAY_MS: u64 = 100;

/// Default maximum delay for exponential backoff (30 seconds).
pub const DEFAULT_MAX_DELAY_SECS: u64 = 30;

/// Default multiplier for exponential backoff.
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Default number of retries after the first attempt.
pub const DEFAULT_RETRIES: u32 = 2;

/// How a chunk invocation handles failures.
#[derive(Clone, Debug, PartialEq, Default)]
pub enum RetryPolicy {
    /// A single attempt.
    #[default]
    None,

    /// Constant delay between attempts.
    Fixed {
        /// Maximum number of attempts (including the initial attempt).
        max_attempts: u32,
        delay: Duration,
    },

    /// Delay grows by `multiplier` after each failure, capped at `max_delay`.
    ExponentialBackoff {
        /// Maximum number of attempts (including the initial attempt).
        max_attempts: u32,
        initial_delay: Duration,
        max_delay: Duration,
        multiplier: f64,
    },
}

impl RetryPolicy {
    /// Exponential backoff with the default delays.
    pub fn exponential(max_attempts: u32) -> Self {
        Self::ExponentialBackoff {
            max_attempts,
            initial_delay: Duration::from_millis(DEFAULT_INITIAL_DELAY_MS),
            max_delay: Duration::from_secs(DEFAULT_MAX_DELAY_SECS),
            multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }

    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self::Fixed {
            max_attempts,
            delay,
        }
    }

    /// Policy allowing `retries` attempts after the first one.
    pub fn from_retries(retries: u32) -> Self {
        if retries == 0 {
            Self::None
        } else {
            Self::exponential(retries.saturating_add(1))
        }
    }

    /// Same delays with a different attempt budget. `None` becomes
    /// exponential backoff when more than one attempt is requested.
    pub fn with_max_attempts(&self, max_attempts: u32) -> Self {
        match self {
            Self::None if max_attempts <= 1 => Self::None,
            Self::None => Self::exponential(max_attempts),
            Self::Fixed { delay, .. } => Self::fixed(max_attempts, *delay),
            Self::ExponentialBackoff {
                initial_delay,
                max_delay,
                multiplier,
                ..
            } => Self::ExponentialBackoff {
                max_attempts,
                initial_delay: *initial_delay,
                max_delay: *max_delay,
                multiplier: *multiplier,
            },
        }
    }

    /// Delay before retry number `attempt` (1 is the first retry), or `None`
    /// once the attempt budget is spent.
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        match self {
            Self::None => None,
            Self::Fixed {
                max_attempts,
                delay,
            } => (attempt < *max_attempts).then_some(*delay),
            Self::ExponentialBackoff {
                max_attempts,
                initial_delay,
                max_delay,
                multiplier,
            } => {
                if attempt >= *max_attempts {
                    return None;
                }
                let factor = multiplier.powi(attempt.saturating_sub(1) as i32);
                let delay_ms = initial_delay.as_millis() as f64 * factor;
                let delay =
                    Duration::from_millis(delay_ms.min(max_delay.as_millis() as f64) as u64);
                Some(delay.min(*max_delay))
            }
        }
    }

    pub fn max_attempts(&self) -> u32 {
        match self {
            Self::None => 1,
            Self::Fixed { max_attempts, .. } => *max_attempts,
            Self::ExponentialBackoff { max_attempts, .. } => *max_attempts,
        }
    }
}

// =============================================================================
// Commit Policy
// =============================================================================

/// Whether a batch is committed after dispatch.
///
/// A chunk counts as completed when it returned a result, with or without
/// data; it counts as failed when it exhausted its retries.
#[derive(Clone, Debug, PartialEq, Default)]
pub enum CommitPolicy {
    /// Commit regardless of failures.
    #[default]
    Always,

    /// Commit only when no chunk failed.
    AllSucceeded,

    /// Commit when at least `threshold` of the chunks completed.
    PartialSuccess {
        /// Minimum completed ratio (0.0 - 1.0).
        threshold: f64,
    },
}

impl CommitPolicy {
    /// # Panics
    ///
    /// Panics if threshold is not in the range 0.0..=1.0
    pub fn partial_success(threshold: f64) -> Self {
        assert!(
            (0.0..=1.0).contains(&threshold),
            "threshold must be between 0.0 and 1.0"
        );
        Self::PartialSuccess { threshold }
    }

    pub fn should_commit(&self, completed: usize, failed: usize) -> bool {
        match self {
            Self::Always => true,
            Self::AllSucceeded => failed == 0,
            Self::PartialSuccess { threshold } => {
                let total = completed + failed;
                total == 0 || completed as f64 / total as f64 >= *threshold
            }
        }
    }
}

impl fmt::Display for CommitPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Always => write!(f, "always"),
            Self::AllSucceeded => write!(f, "all-succeeded"),
            Self::PartialSuccess { threshold } => write!(f, "partial:{}", threshold),
        }
    }
}

impl FromStr for CommitPolicy {
    type Err = String;

    /// Parses `always`, `all-succeeded` or `partial:<ratio>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "always" => Ok(Self::Always),
            "all-succeeded" | "all" => Ok(Self::AllSucceeded),
            other => {
                let ratio = other
                    .strip_prefix("partial:")
                    .ok_or_else(|| format!("unknown commit policy '{s}'"))?;
                let threshold: f64 = ratio
                    .parse()
                    .map_err(|_| format!("invalid threshold '{ratio}'"))?;
                if !(0.0..=1.0).contains(&threshold) {
                    return Err(format!("threshold {threshold} is not between 0 and 1"));
                }
                Ok(Self::PartialSuccess { threshold })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_policy_none() {
        let policy = RetryPolicy::None;
        assert_eq!(policy.max_attempts(), 1);
        assert_eq!(policy.delay_for_attempt(1), None);
    }

    #[test]
    fn test_retry_policy_fixed() {
        let policy = RetryPolicy::fixed(3, Duration::from_millis(100));
        assert_eq!(policy.max_attempts(), 3);
        assert_eq!(policy.delay_for_attempt(1), Some(Duration::from_millis(100)));
        assert_eq!(policy.delay_for_attempt(2), Some(Duration::from_millis(100)));
        assert_eq!(policy.delay_for_attempt(3), None);
    }

    #[test]
    fn test_retry_policy_exponential() {
        let policy = RetryPolicy::ExponentialBackoff {
            max_attempts: 4,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
        };
        assert_eq!(policy.delay_for_attempt(1), Some(Duration::from_millis(100)));
        assert_eq!(policy.delay_for_attempt(2), Some(Duration::from_millis(200)));
        assert_eq!(policy.delay_for_attempt(3), Some(Duration::from_millis(400)));
        assert_eq!(policy.delay_for_attempt(4), None);
    }

    #[test]
    fn test_retry_policy_respects_max_delay() {
        let policy = RetryPolicy::ExponentialBackoff {
            max_attempts: 10,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
        };
        assert_eq!(policy.delay_for_attempt(8), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_from_retries_counts_first_attempt() {
        assert_eq!(RetryPolicy::from_retries(0), RetryPolicy::None);
        assert_eq!(RetryPolicy::from_retries(2).max_attempts(), 3);
    }

    #[test]
    fn test_with_max_attempts_keeps_delays() {
        let policy = RetryPolicy::fixed(2, Duration::from_millis(5)).with_max_attempts(4);
        assert_eq!(policy, RetryPolicy::fixed(4, Duration::from_millis(5)));
        assert_eq!(RetryPolicy::None.with_max_attempts(1), RetryPolicy::None);
        assert_eq!(RetryPolicy::None.with_max_attempts(3).max_attempts(), 3);
    }

    #[test]
    fn test_commit_policy_default_always() {
        assert_eq!(CommitPolicy::default(), CommitPolicy::Always);
        assert!(CommitPolicy::Always.should_commit(0, 10));
    }

    #[test]
    fn test_commit_policy_all_succeeded() {
        assert!(CommitPolicy::AllSucceeded.should_commit(4, 0));
        assert!(!CommitPolicy::AllSucceeded.should_commit(3, 1));
    }

    #[test]
    fn test_commit_policy_partial() {
        let policy = CommitPolicy::partial_success(0.75);
        assert!(policy.should_commit(3, 1));
        assert!(!policy.should_commit(2, 2));
        assert!(policy.should_commit(0, 0));
    }

    #[test]
    #[should_panic(expected = "threshold must be between 0.0 and 1.0")]
    fn test_commit_policy_invalid_threshold() {
        CommitPolicy::partial_success(1.5);
    }

    #[test]
    fn test_commit_policy_parse() {
        assert_eq!("always".parse::<CommitPolicy>(), Ok(CommitPolicy::Always));
        assert_eq!(
            "All-Succeeded".parse::<CommitPolicy>(),
            Ok(CommitPolicy::AllSucceeded)
        );
        assert_eq!(
            "partial:0.8".parse::<CommitPolicy>(),
            Ok(CommitPolicy::PartialSuccess { threshold: 0.8 })
        );
        assert!("partial:2".parse::<CommitPolicy>().is_err());
        assert!("sometimes".parse::<CommitPolicy>().is_err());
        assert_eq!(CommitPolicy::partial_success(0.5).to_string(), "partial:0.5");
    }
}
