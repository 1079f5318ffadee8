//! Job lifecycle management.
//!
//! The manager owns the dispatch pipeline end to end: the bounded work
//! queue, the worker slots, the in-flight dispatch set, and the cancellation
//! registry. Dispatch is at-most-once per job id; the execution handle is
//! persisted on the row before the id ever reaches the queue, so a crash
//! between the two leaves a claim that startup recovery can see and clear.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::infra::db::Database;
use crate::job::worker::{worker_loop, WorkerContext};
use crate::job::{
	DispatchError, JobError, JobFilter, JobId, JobInfo, JobPage, JobResult, JobSpec, JobStats,
	JobStatus, JobStore, Pagination,
};
use crate::simulator::{LocalResultPublisher, ResultPublisher};

/// What startup recovery found and did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
	/// RUNNING rows moved to FAILED because no worker can still hold them.
	pub failed_running: u64,
	/// PENDING rows re-dispatched onto the fresh queue.
	pub requeued_pending: u64,
}

pub struct JobManager {
	store: Arc<JobStore>,
	queue_tx: mpsc::Sender<JobId>,
	/// Job ids between a successful enqueue and the end of their run.
	dispatched: Arc<RwLock<HashSet<JobId>>>,
	/// Cancel signals for runs currently claimed by a worker.
	cancellations: Arc<RwLock<HashMap<JobId, watch::Sender<bool>>>>,
	shutdown_tx: watch::Sender<bool>,
	workers: Mutex<Vec<JoinHandle<()>>>,
}

impl JobManager {
	/// Wire up the queue and spawn the worker slots. The returned manager is
	/// ready to dispatch; call [`JobManager::recover`] first when reopening
	/// an existing database.
	pub fn new(db: Arc<Database>, config: &AppConfig) -> Arc<Self> {
		let store = Arc::new(JobStore::new(db));
		let publisher: Arc<dyn ResultPublisher> =
			Arc::new(LocalResultPublisher::new(config.results_dir()));

		let (queue_tx, queue_rx) = mpsc::channel(config.execution.queue_capacity.max(1));
		let (shutdown_tx, shutdown_rx) = watch::channel(false);
		let dispatched = Arc::new(RwLock::new(HashSet::new()));
		let cancellations = Arc::new(RwLock::new(HashMap::new()));

		let ctx = Arc::new(WorkerContext {
			store: store.clone(),
			publisher,
			runs_dir: config.runs_dir(),
			hard_limit: config.execution.hard_limit(),
			soft_limit: config.execution.soft_limit(),
			checkpoint_pause: config.execution.checkpoint_pause(),
			cancellations: cancellations.clone(),
			dispatched: dispatched.clone(),
		});

		// The receiver lives only in the worker tasks. Once every slot has
		// exited, senders observe a closed queue and dispatch fails fast.
		let queue_rx = Arc::new(Mutex::new(queue_rx));
		let slots = config.execution.worker_slots.max(1);
		let mut workers = Vec::with_capacity(slots);
		for slot in 0..slots {
			workers.push(tokio::spawn(worker_loop(
				slot,
				ctx.clone(),
				queue_rx.clone(),
				shutdown_rx.clone(),
			)));
		}

		info!(
			slots,
			queue_capacity = config.execution.queue_capacity,
			"job manager started"
		);

		Arc::new(Self {
			store,
			queue_tx,
			dispatched,
			cancellations,
			shutdown_tx,
			workers: Mutex::new(workers),
		})
	}

	/// Validate and persist a new PENDING job without dispatching it.
	pub async fn create_job(&self, spec: JobSpec) -> JobResult<JobInfo> {
		let job = self.store.create(spec).await?;
		info!(job_id = %job.id, name = %job.name, simulator = %job.simulator_type, "job created");
		Ok(job)
	}

	/// Create and immediately dispatch. The job row outlives a dispatch
	/// failure: QueueFull leaves it PENDING for a retry, QueueClosed fails
	/// it, and either way the error carries the policy to the caller.
	pub async fn submit(&self, spec: JobSpec) -> JobResult<JobInfo> {
		let job = self.create_job(spec).await?;
		self.dispatch(job.id).await?;
		self.store.get(job.id).await
	}

	/// Enqueue a PENDING job for execution, at most once.
	///
	/// Repeating the call for a job that is already queued returns the
	/// persisted handle instead of enqueueing a duplicate. The handle is
	/// written to the row before the id reaches the queue, in that order, so
	/// the queue never holds an id the database does not know about.
	pub async fn dispatch(&self, id: JobId) -> JobResult<String> {
		let job = self.store.get(id).await?;
		if job.status != JobStatus::Pending {
			return Err(JobError::InvalidState {
				id,
				status: job.status,
			});
		}
		if let Some(handle) = job.execution_handle {
			debug!(job_id = %id, "dispatch repeated, returning existing handle");
			return Ok(handle);
		}

		{
			let mut dispatched = self.dispatched.write().await;
			if !dispatched.insert(id) {
				return Err(DispatchError::AlreadyDispatched(id).into());
			}
		}

		let handle = Uuid::new_v4().to_string();
		match self.claim_and_enqueue(id, &handle).await {
			Ok(handle) => Ok(handle),
			Err(e) => {
				self.dispatched.write().await.remove(&id);
				Err(e)
			}
		}
	}

	async fn claim_and_enqueue(&self, id: JobId, handle: &str) -> JobResult<String> {
		if !self.store.claim_for_dispatch(id, handle).await? {
			// The row refused the claim. Reload to find out why.
			let job = self.store.get(id).await?;
			return match (job.status, job.execution_handle) {
				// Another dispatcher finished first; its handle stands.
				(JobStatus::Pending, Some(existing)) => Ok(existing),
				(JobStatus::Pending, None) => Err(DispatchError::AlreadyDispatched(id).into()),
				(status, _) => Err(JobError::InvalidState { id, status }),
			};
		}

		match self.queue_tx.try_send(id) {
			Ok(()) => {
				info!(job_id = %id, handle, "job dispatched");
				Ok(handle.to_string())
			}
			Err(mpsc::error::TrySendError::Full(_)) => {
				// Retryable: withdraw the claim, the job stays PENDING.
				self.store.release_dispatch_claim(id, handle).await?;
				warn!(job_id = %id, "dispatch refused, work queue full");
				Err(DispatchError::QueueFull.into())
			}
			Err(mpsc::error::TrySendError::Closed(_)) => {
				// Non-retryable: the workers are gone for good.
				self.store
					.mark_failed(id, "dispatch failed: work queue closed", None)
					.await?;
				warn!(job_id = %id, "dispatch failed, work queue closed");
				Err(DispatchError::QueueClosed.into())
			}
		}
	}

	pub async fn get_job(&self, id: JobId) -> JobResult<JobInfo> {
		self.store.get(id).await
	}

	pub async fn list_jobs(
		&self,
		filter: JobFilter,
		pagination: Pagination,
	) -> JobResult<JobPage> {
		self.store.list(filter, pagination).await
	}

	/// Cancel a non-terminal job. The row moves to CANCELLED first, then the
	/// in-flight runner (if any) is signalled, so clients observe the
	/// cancellation immediately even while the run winds down.
	pub async fn cancel_job(&self, id: JobId) -> JobResult<JobInfo> {
		if self.store.mark_cancelled(id).await? {
			if let Some(signal) = self.cancellations.read().await.get(&id) {
				// Best effort; the runner may have already exited.
				let _ = signal.send(true);
			}
			info!(job_id = %id, "job cancelled");
			return self.store.get(id).await;
		}

		// NotFound surfaces from the reload; anything found here is terminal.
		let job = self.store.get(id).await?;
		Err(JobError::InvalidState {
			id,
			status: job.status,
		})
	}

	pub async fn stats(&self) -> JobResult<JobStats> {
		self.store.stats().await
	}

	/// Reconcile the database with reality after a restart.
	///
	/// RUNNING rows belong to workers that no longer exist; simulations are
	/// not resumable mid-run, so they become FAILED. PENDING rows lost their
	/// queue entries with the process, so their stale handles are cleared
	/// and they are dispatched again, oldest first.
	pub async fn recover(&self) -> JobResult<RecoveryReport> {
		let stranded = self.store.ids_with_status(JobStatus::Running).await?;
		for id in &stranded {
			warn!(job_id = %id, "failing job stranded in RUNNING by a previous process");
		}
		let failed_running = if stranded.is_empty() {
			0
		} else {
			self.store
				.fail_all_running("interrupted by engine restart before completing")
				.await?
		};

		let cleared = self.store.clear_stale_dispatch_claims().await?;
		if cleared > 0 {
			info!(cleared, "cleared dispatch claims from a previous process");
		}

		let mut requeued_pending = 0;
		for id in self.store.ids_with_status(JobStatus::Pending).await? {
			match self.dispatch(id).await {
				Ok(_) => requeued_pending += 1,
				Err(JobError::Dispatch(DispatchError::QueueFull)) => {
					warn!(job_id = %id, "queue filled during recovery, job left PENDING");
					break;
				}
				Err(e) => {
					error!(job_id = %id, error = %e, "could not requeue job during recovery");
				}
			}
		}

		Ok(RecoveryReport {
			failed_running,
			requeued_pending,
		})
	}

	/// Stop accepting work and wait for the worker slots to drain. A job
	/// mid-run finishes (bounded by the hard time limit) before its slot
	/// exits.
	pub async fn shutdown(&self) {
		let _ = self.shutdown_tx.send(true);
		let mut workers = self.workers.lock().await;
		for handle in workers.drain(..) {
			if let Err(e) = handle.await {
				error!(error = %e, "worker task did not shut down cleanly");
			}
		}
		info!("job manager stopped");
	}
}
