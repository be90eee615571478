//! Retry budgeting for key-discovery requests.

// self
use crate::{_prelude::*, config::RetryPolicy};

/// Result of budgeting a retry attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttemptBudget {
	/// Another attempt is permitted with the provided per-attempt timeout.
	Granted {
		/// Timeout window allocated for the upcoming attempt.
		timeout: Duration,
	},
	/// Retry window exhausted; no further attempts allowed.
	Exhausted,
}

/// Tracks backoff progression and the overall deadline of one fetch sequence.
#[derive(Debug)]
pub struct RetryExecutor<'a> {
	policy: &'a RetryPolicy,
	deadline: Instant,
	retries_used: u32,
}
impl<'a> RetryExecutor<'a> {
	/// Start a new sequence governed by `policy`.
	pub fn new(policy: &'a RetryPolicy) -> Self {
		Self { policy, deadline: Instant::now() + policy.deadline, retries_used: 0 }
	}

	/// Budget the next attempt, returning either the permitted timeout or exhaustion.
	pub fn attempt_budget(&self) -> AttemptBudget {
		let timeout = self.remaining_budget().min(self.policy.attempt_timeout);

		if timeout.is_zero() { AttemptBudget::Exhausted } else { AttemptBudget::Granted { timeout } }
	}

	/// Whether another retry is permitted under the policy.
	pub fn can_retry(&self) -> bool {
		self.retries_used < self.policy.max_retries
	}

	/// Remaining wall-clock budget for the sequence.
	pub fn remaining_budget(&self) -> Duration {
		self.deadline.saturating_duration_since(Instant::now())
	}

	/// Consume one retry and compute its backoff, clamped to the remaining budget.
	pub fn next_backoff(&mut self) -> Option<Duration> {
		if !self.can_retry() {
			tracing::debug!(attempt = self.retries_used, "retry budget exhausted");

			return None;
		}

		let attempt = self.retries_used;

		self.retries_used += 1;

		let delay = self.policy.compute_backoff(attempt).min(self.remaining_budget());

		tracing::debug!(attempt = attempt + 1, ?delay, "retry backoff computed");

		Some(delay)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::JitterStrategy;

	#[tokio::test]
	async fn retries_are_bounded_by_policy() {
		let policy = RetryPolicy {
			max_retries: 2,
			jitter: JitterStrategy::None,
			..RetryPolicy::default()
		};
		let mut executor = RetryExecutor::new(&policy);

		assert_eq!(executor.attempt_budget(), AttemptBudget::Granted {
			timeout: policy.attempt_timeout
		});
		assert_eq!(executor.next_backoff(), Some(Duration::from_millis(250)));
		assert_eq!(executor.next_backoff(), Some(Duration::from_millis(500)));
		assert!(!executor.can_retry());
		assert_eq!(executor.next_backoff(), None);
	}
}
