//! Job execution workers.
//!
//! Each worker slot pulls job ids off the shared queue, claims the row with
//! the guarded PENDING -> RUNNING update, and drives the simulation through
//! its checkpoints. All terminal writes funnel through [`finish`], so there
//! is exactly one place that decides how a run ends. A claim that affects no
//! rows means the job was cancelled while it sat in the queue; the worker
//! drops it without running anything.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::time::{sleep, sleep_until, timeout, Instant};
use tracing::{debug, error, info, warn};

use crate::job::{ExecutionError, JobId, JobInfo, JobResult, JobStore};
use crate::simulator::{self, PublishedResult, ResultPublisher, Simulator};

/// Shared state a worker slot needs to process jobs.
pub(super) struct WorkerContext {
	pub store: Arc<JobStore>,
	pub publisher: Arc<dyn ResultPublisher>,
	pub runs_dir: PathBuf,
	pub hard_limit: Duration,
	pub soft_limit: Duration,
	pub checkpoint_pause: Duration,
	pub cancellations: Arc<RwLock<HashMap<JobId, watch::Sender<bool>>>>,
	pub dispatched: Arc<RwLock<HashSet<JobId>>>,
}

/// How a run ended. Only [`finish`] consumes this.
enum RunOutcome {
	Completed(PublishedResult),
	Failed(ExecutionError),
	Cancelled,
}

pub(super) async fn worker_loop(
	slot: usize,
	ctx: Arc<WorkerContext>,
	queue: Arc<Mutex<mpsc::Receiver<JobId>>>,
	mut shutdown: watch::Receiver<bool>,
) {
	debug!(slot, "worker started");
	loop {
		// Hold the queue lock only while idle. A job in flight leaves the
		// queue free for the other slots.
		let job_id = {
			let mut rx = queue.lock().await;
			tokio::select! {
				_ = shutdown.changed() => None,
				received = rx.recv() => received,
			}
		};
		let Some(job_id) = job_id else { break };

		let result = run_one(&ctx, job_id).await;

		ctx.cancellations.write().await.remove(&job_id);
		ctx.dispatched.write().await.remove(&job_id);

		if let Err(e) = result {
			error!(job_id = %job_id, error = %e, "worker could not process job");
			// Best effort; the guard drops this if the row is already terminal.
			let _ = ctx
				.store
				.mark_failed(job_id, &format!("worker error: {e}"), None)
				.await;
		}
	}
	debug!(slot, "worker stopped");
}

async fn run_one(ctx: &WorkerContext, job_id: JobId) -> JobResult<()> {
	if !ctx.store.mark_running(job_id).await? {
		debug!(job_id = %job_id, "skipping queued job, no longer pending");
		return Ok(());
	}

	let job = ctx.store.get(job_id).await?;
	info!(
		job_id = %job_id,
		name = %job.name,
		simulator = %job.simulator_type,
		"starting simulation"
	);

	// Registered after the claim, so a cancel from here on reaches the run
	// loop directly. A cancel that slips in just before registration is
	// caught by the progress-write guard instead.
	let (cancel_tx, cancel_rx) = watch::channel(false);
	ctx.cancellations.write().await.insert(job_id, cancel_tx);

	let outcome = execute(ctx, &job, cancel_rx).await;
	finish(ctx, &job, outcome).await
}

async fn execute(
	ctx: &WorkerContext,
	job: &JobInfo,
	cancel_rx: watch::Receiver<bool>,
) -> RunOutcome {
	let sim = simulator::for_kind(job.simulator_type);
	let workdir = ctx.runs_dir.join(job.id.to_string());

	if let Err(e) = tokio::fs::create_dir_all(&workdir).await {
		return RunOutcome::Failed(ExecutionError::Workspace(e));
	}
	let rendered = match sim.render_parameter_file(job) {
		Ok(rendered) => rendered,
		Err(e) => return RunOutcome::Failed(ExecutionError::Parameters(e)),
	};
	if let Err(e) = tokio::fs::write(workdir.join(sim.parameter_file_name()), rendered).await {
		return RunOutcome::Failed(ExecutionError::Workspace(e));
	}

	match timeout(
		ctx.hard_limit,
		run_to_completion(ctx, job, sim, &workdir, cancel_rx),
	)
	.await
	{
		Ok(outcome) => outcome,
		Err(_) => RunOutcome::Failed(ExecutionError::HardTimeLimit(ctx.hard_limit.as_secs())),
	}
}

/// The checkpoint loop. Cancellation and the soft deadline are polled at
/// every pause point; the hard limit is enforced a level up by `execute`.
async fn run_to_completion(
	ctx: &WorkerContext,
	job: &JobInfo,
	sim: &'static dyn Simulator,
	workdir: &Path,
	mut cancel_rx: watch::Receiver<bool>,
) -> RunOutcome {
	let soft_deadline = Instant::now() + ctx.soft_limit;

	for &checkpoint in sim.checkpoints() {
		tokio::select! {
			_ = cancel_rx.changed() => {
				info!(job_id = %job.id, "run interrupted by cancellation");
				return RunOutcome::Cancelled;
			}
			_ = sleep_until(soft_deadline) => {
				return RunOutcome::Failed(ExecutionError::SoftTimeLimit(
					ctx.soft_limit.as_secs(),
				));
			}
			_ = sleep(ctx.checkpoint_pause) => {}
		}

		if let Err(e) = sim.advance(job, workdir, checkpoint).await {
			return RunOutcome::Failed(ExecutionError::Workspace(e));
		}

		match ctx.store.set_progress(job.id, checkpoint).await {
			Ok(true) => debug!(job_id = %job.id, progress = checkpoint, "checkpoint"),
			// The guard only fails while we hold the claim if the row moved
			// under us, and the only outside transition from RUNNING is a
			// cancel.
			Ok(false) => {
				info!(job_id = %job.id, "job no longer running, stopping");
				return RunOutcome::Cancelled;
			}
			// A flaky progress write is not worth killing the run over.
			Err(e) => warn!(job_id = %job.id, error = %e, "failed to persist progress"),
		}
	}

	match ctx.publisher.publish(job.id, workdir).await {
		Ok(result) => RunOutcome::Completed(result),
		Err(e) => RunOutcome::Failed(ExecutionError::Publish(e)),
	}
}

async fn finish(ctx: &WorkerContext, job: &JobInfo, outcome: RunOutcome) -> JobResult<()> {
	match outcome {
		RunOutcome::Completed(result) => {
			let recorded = ctx
				.store
				.mark_completed(job.id, &result.result_path, &result.output_files)
				.await?;
			if recorded {
				info!(
					job_id = %job.id,
					result_path = %result.result_path,
					files = result.output_files.len(),
					"simulation completed"
				);
				// Artifacts are published; the working area is done.
				let workdir = ctx.runs_dir.join(job.id.to_string());
				if let Err(e) = tokio::fs::remove_dir_all(&workdir).await {
					warn!(job_id = %job.id, error = %e, "could not remove working area");
				}
			} else {
				info!(job_id = %job.id, "result discarded, job cancelled at the finish");
				let _ = tokio::fs::remove_dir_all(&result.result_path).await;
			}
		}
		RunOutcome::Failed(error) => {
			let trace = format!("{error:?}");
			let recorded = ctx
				.store
				.mark_failed(job.id, &error.to_string(), Some(&trace))
				.await?;
			if recorded {
				warn!(job_id = %job.id, error = %error, "simulation failed");
			} else {
				info!(job_id = %job.id, "late failure dropped, job already terminal");
			}
			// Failed runs keep their working area for inspection.
		}
		RunOutcome::Cancelled => {
			// The cancel path already moved the row; nothing left to write.
			info!(job_id = %job.id, "simulation cancelled");
		}
	}
	Ok(())
}
