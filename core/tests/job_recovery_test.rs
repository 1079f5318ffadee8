//! Startup recovery after an unclean shutdown.

mod helpers;

use std::sync::Arc;
use std::time::Duration;

use helpers::{gadget4_spec, wait_for_status, write_config_with, write_test_config};
use redshift_core::infra::db::Database;
use redshift_core::{
	AppConfig, Core, JobError, JobFilter, JobId, JobManager, JobStatus, JobStore, Pagination,
};
use tempfile::TempDir;
use tokio::time::sleep;

/// Seed the database the way a crashed engine would leave it: one row
/// claimed and RUNNING, one PENDING with a stale dispatch claim, one plain
/// PENDING. The pool is dropped before returning, like the dead process.
async fn seed_crashed_state(
	config: &AppConfig,
) -> Result<(JobId, JobId, JobId), Box<dyn std::error::Error>> {
	let db = Arc::new(Database::create(&config.database_path()).await?);
	db.migrate().await?;
	let store = JobStore::new(db);

	let interrupted = store.create(gadget4_spec("was-running")).await?;
	assert!(store.claim_for_dispatch(interrupted.id, "dead-claim-1").await?);
	assert!(store.mark_running(interrupted.id).await?);

	let claimed = store.create(gadget4_spec("claimed-but-lost")).await?;
	assert!(store.claim_for_dispatch(claimed.id, "dead-claim-2").await?);

	let plain = store.create(gadget4_spec("plain-pending")).await?;

	Ok((interrupted.id, claimed.id, plain.id))
}

#[tokio::test]
async fn test_recovery_fails_running_and_requeues_pending() -> Result<(), Box<dyn std::error::Error>> {
	let temp_dir = TempDir::new()?;
	let config = write_test_config(temp_dir.path())?;
	let (interrupted, claimed, plain) = seed_crashed_state(&config).await?;

	// A fresh manager over the same database file.
	let db = Arc::new(Database::open(&config.database_path()).await?);
	let manager = JobManager::new(db, &config);
	let report = manager.recover().await?;
	assert_eq!(report.failed_running, 1);
	assert_eq!(report.requeued_pending, 2);

	let failed = manager.get_job(interrupted).await?;
	assert_eq!(failed.status, JobStatus::Failed);
	assert!(failed
		.error_message
		.as_deref()
		.unwrap_or_default()
		.contains("interrupted"));
	assert!(failed.completed_at.is_some());

	// The requeued jobs run to completion under the new process.
	for id in [claimed, plain] {
		let job = wait_for_status(&manager, id, JobStatus::Completed).await?;
		assert!(job.result_path.is_some());
	}

	// The stale claim was replaced, not reused.
	let handle = manager
		.get_job(claimed)
		.await?
		.execution_handle
		.expect("requeued job must have a fresh handle");
	assert_ne!(handle, "dead-claim-2");

	manager.shutdown().await;
	Ok(())
}

#[tokio::test]
async fn test_core_startup_recovers_previous_state() -> Result<(), Box<dyn std::error::Error>> {
	let temp_dir = TempDir::new()?;
	let config = write_test_config(temp_dir.path())?;
	let (interrupted, claimed, plain) = seed_crashed_state(&config).await?;

	// Bringing the core up over the same directory repairs and resumes.
	let core = Core::new_with_config(temp_dir.path().to_path_buf()).await?;

	let failed = core.jobs.get_job(interrupted).await?;
	assert_eq!(failed.status, JobStatus::Failed);

	for id in [claimed, plain] {
		wait_for_status(&core.jobs, id, JobStatus::Completed).await?;
	}
	let stats = core.status().await?;
	assert_eq!(stats.failed, 1);
	assert_eq!(stats.completed, 2);

	core.shutdown().await;
	Ok(())
}

#[tokio::test]
async fn test_recovery_requeues_in_batches_on_a_small_queue() -> Result<(), Box<dyn std::error::Error>> {
	let temp_dir = TempDir::new()?;
	let config = write_config_with(temp_dir.path(), |config| {
		config.execution.queue_capacity = 1;
		config.execution.checkpoint_pause_ms = 100;
	})?;

	// Four stranded PENDING jobs, no claims.
	{
		let db = Arc::new(Database::create(&config.database_path()).await?);
		db.migrate().await?;
		let store = JobStore::new(db);
		for i in 0..4 {
			store.create(gadget4_spec(&format!("stranded-{i}"))).await?;
		}
	}

	let db = Arc::new(Database::open(&config.database_path()).await?);
	let manager = JobManager::new(db, &config);
	let report = manager.recover().await?;
	assert_eq!(report.failed_running, 0);
	assert!(report.requeued_pending >= 1);
	assert!(
		report.requeued_pending < 4,
		"a depth-1 queue cannot absorb all four at once"
	);

	// Retry the leftovers the way a caller would, until everything drains.
	let mut retries = 0;
	while manager.stats().await?.completed < 4 {
		if retries >= 200 {
			let stats = manager.stats().await?;
			panic!("stranded jobs never drained: {stats:?}");
		}
		retries += 1;

		let pending = manager
			.list_jobs(JobFilter::status(JobStatus::Pending), Pagination::default())
			.await?;
		for job in pending.jobs {
			match manager.dispatch(job.id).await {
				Ok(_) => {}
				Err(JobError::Dispatch(e)) if e.is_retryable() => break,
				Err(JobError::InvalidState { .. }) => {}
				Err(e) => return Err(e.into()),
			}
		}
		sleep(Duration::from_millis(50)).await;
	}

	manager.shutdown().await;
	Ok(())
}
