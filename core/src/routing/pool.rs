use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde::Deserialize;
use tokio::sync::{Semaphore, TryAcquireError};
use tokio_util::task::TaskTracker;
use tracing::{error, warn};

/// What to do with a job when the worker slots and the queue are full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackpressurePolicy {
	/// Wait for room in the queue. Backpressure reaches the caller, which
	/// for inbound messages is the subscribe session's network task.
	#[default]
	Block,
	/// Drop the job and log it.
	Drop,
}

/// Outcome of [`DispatchPool::submit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
	/// The job was spawned on the pool
	Accepted,
	/// The pool was saturated and the job was dropped
	Dropped,
	/// The pool is shut down
	Closed,
}

/// Bounded worker pool for handler invocations.
///
/// At most `max_concurrent` jobs run at once. Up to `queue_capacity` more
/// are accepted and wait for a slot; beyond that the policy decides whether
/// the submitter waits or the job is dropped.
#[derive(Debug, Clone)]
pub struct DispatchPool {
	/// Running plus queued jobs
	admission: Arc<Semaphore>,
	/// Running jobs
	slots: Arc<Semaphore>,
	tracker: TaskTracker,
	policy: BackpressurePolicy,
	max_concurrent: usize,
	queue_capacity: usize,
}

impl DispatchPool {
	pub fn new(
		max_concurrent: usize,
		queue_capacity: usize,
		policy: BackpressurePolicy,
	) -> Self {
		let max_concurrent = max_concurrent.max(1);
		Self {
			admission: Arc::new(Semaphore::new(max_concurrent + queue_capacity)),
			slots: Arc::new(Semaphore::new(max_concurrent)),
			tracker: TaskTracker::new(),
			policy,
			max_concurrent,
			queue_capacity,
		}
	}

	pub fn policy(&self) -> BackpressurePolicy {
		self.policy
	}

	pub fn max_concurrent(&self) -> usize {
		self.max_concurrent
	}

	pub fn queue_capacity(&self) -> usize {
		self.queue_capacity
	}

	/// Number of jobs currently holding a slot.
	pub fn in_flight(&self) -> usize {
		self.max_concurrent - self.slots.available_permits()
	}

	/// Number of accepted jobs still waiting for a slot.
	pub fn queued(&self) -> usize {
		let accepted = self.max_concurrent + self.queue_capacity
			- self.admission.available_permits();
		accepted.saturating_sub(self.in_flight())
	}

	/// Accepts `job` once there is room in the queue and runs it on a free
	/// slot.
	///
	/// A panic inside the job is caught and logged; it never reaches the
	/// submitter or other jobs.
	pub async fn submit<F>(&self, label: &str, job: F) -> Submission
	where F: Future<Output = ()> + Send + 'static {
		if self.tracker.is_closed() {
			return Submission::Closed;
		}
		let admitted = match self.policy {
			| BackpressurePolicy::Block => {
				match Arc::clone(&self.admission).acquire_owned().await {
					| Ok(permit) => permit,
					| Err(_) => return Submission::Closed,
				}
			}
			| BackpressurePolicy::Drop => {
				match Arc::clone(&self.admission).try_acquire_owned() {
					| Ok(permit) => permit,
					| Err(TryAcquireError::Closed) => return Submission::Closed,
					| Err(TryAcquireError::NoPermits) => {
						warn!(
							job = label,
							max_concurrent = self.max_concurrent,
							queue_capacity = self.queue_capacity,
							"Dispatch pool saturated, job dropped"
						);
						return Submission::Dropped;
					}
				}
			}
		};

		let slots = Arc::clone(&self.slots);
		let label = label.to_owned();
		self.tracker.spawn(async move {
			let _admitted = admitted;
			let Ok(_slot) = slots.acquire_owned().await else {
				return;
			};
			if let Err(panic) = AssertUnwindSafe(job).catch_unwind().await {
				let reason = panic
					.downcast_ref::<&str>()
					.map(|s| s.to_string())
					.or_else(|| panic.downcast_ref::<String>().cloned())
					.unwrap_or_else(|| "unknown panic".to_string());
				error!(job = %label, reason = %reason, "Dispatch job panicked");
			}
		});
		Submission::Accepted
	}

	/// Stops accepting jobs and waits up to `timeout` for running and
	/// queued jobs.
	///
	/// Returns `false` if jobs were still pending when the timeout elapsed.
	pub async fn shutdown(&self, timeout: Duration) -> bool {
		self.tracker.close();
		// queued jobs still need their slots
		self.admission.close();
		let finished = tokio::time::timeout(timeout, self.tracker.wait())
			.await
			.is_ok();
		if !finished {
			warn!(
				pending = self.tracker.len(),
				timeout_ms = timeout.as_millis() as u64,
				"Dispatch pool shutdown timed out"
			);
		}
		finished
	}
}
