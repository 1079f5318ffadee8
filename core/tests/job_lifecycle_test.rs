//! End to end lifecycle coverage: submit, run, complete, fail.

mod helpers;

use std::time::Duration;

use helpers::{fast_core, gadget4_spec, wait_for_status};
use redshift_core::{JobError, JobFilter, JobStatus, Pagination, ValidationError};
use serde_json::json;
use tempfile::TempDir;
use tokio::time::sleep;

#[tokio::test]
async fn test_submitted_job_runs_to_completion() -> Result<(), Box<dyn std::error::Error>> {
	let temp_dir = TempDir::new()?;
	let core = fast_core(temp_dir.path()).await?;

	let mut spec = gadget4_spec("lcdm-box");
	let mut params = serde_json::Map::new();
	params.insert("TimeMax".to_string(), json!(2.0));
	params.insert("Omega0".to_string(), json!(0.3));
	spec.parameters = Some(params);

	let job = core.jobs.submit(spec).await?;
	assert_eq!(job.name, "lcdm-box");
	assert!(
		job.execution_handle.is_some(),
		"dispatch must persist a handle before returning"
	);

	let done = wait_for_status(&core.jobs, job.id, JobStatus::Completed).await?;
	assert_eq!(done.progress, 100.0);
	assert!(done.error_message.is_none());
	assert!(done.error_trace.is_none());
	assert!(done.started_at.is_some());
	assert!(done.completed_at.is_some());

	// Artifacts were moved into the per-job results directory.
	let result_path = done.result_path.expect("completed job must have a result path");
	assert!(result_path.contains(&job.id.to_string()));
	let files = done.output_files.expect("completed job must list its artifacts");
	assert_eq!(
		files,
		vec![
			"snapshot_000.hdf5",
			"snapshot_001.hdf5",
			"snapshot_002.hdf5",
			"snapshot_003.hdf5",
		]
	);
	for name in &files {
		let artifact = std::path::Path::new(&result_path).join(name);
		assert!(artifact.exists(), "missing artifact {artifact:?}");
	}

	// The working area is gone once the results have been published.
	let workdir = temp_dir.path().join("runs").join(job.id.to_string());
	assert!(!workdir.exists(), "completed runs must clean up {workdir:?}");

	core.shutdown().await;
	Ok(())
}

#[tokio::test]
async fn test_created_job_is_pending_until_dispatched() -> Result<(), Box<dyn std::error::Error>> {
	let temp_dir = TempDir::new()?;
	let core = fast_core(temp_dir.path()).await?;

	let first = core.jobs.create_job(gadget4_spec("created-first")).await?;
	let second = core.jobs.create_job(gadget4_spec("created-second")).await?;
	assert_ne!(first.id, second.id);

	assert_eq!(first.status, JobStatus::Pending);
	assert_eq!(first.progress, 0.0);
	assert!(first.execution_handle.is_none());
	assert!(first.result_path.is_none());
	assert!(first.started_at.is_none());
	assert!(first.completed_at.is_none());

	// Nothing picks a job up without a dispatch.
	sleep(Duration::from_millis(150)).await;
	assert_eq!(core.jobs.get_job(first.id).await?.status, JobStatus::Pending);

	let stats = core.status().await?;
	assert_eq!(stats.pending, 2);
	assert_eq!(stats.total(), 2);

	core.shutdown().await;
	Ok(())
}

#[tokio::test]
async fn test_invalid_specs_are_rejected_before_persistence() -> Result<(), Box<dyn std::error::Error>> {
	let temp_dir = TempDir::new()?;
	let core = fast_core(temp_dir.path()).await?;

	let mut spec = gadget4_spec("no-particles");
	spec.num_particles = 0;
	let err = core.jobs.submit(spec).await.unwrap_err();
	assert!(matches!(
		err,
		JobError::Validation(ValidationError::NonPositiveParticles(0))
	));

	let err = core.jobs.submit(gadget4_spec("")).await.unwrap_err();
	assert!(matches!(err, JobError::Validation(ValidationError::EmptyName)));

	let mut spec = gadget4_spec("flat-box");
	spec.box_size = 0.0;
	assert!(core.jobs.create_job(spec).await.is_err());

	// None of the rejected specs reached the database.
	let page = core
		.jobs
		.list_jobs(JobFilter::default(), Pagination::default())
		.await?;
	assert_eq!(page.total, 0);
	assert!(page.jobs.is_empty());

	core.shutdown().await;
	Ok(())
}

#[tokio::test]
async fn test_unknown_parameter_fails_the_job() -> Result<(), Box<dyn std::error::Error>> {
	let temp_dir = TempDir::new()?;
	let core = fast_core(temp_dir.path()).await?;

	let mut spec = gadget4_spec("bad-params");
	let mut params = serde_json::Map::new();
	params.insert("NotAGadgetKey".to_string(), json!(1.0));
	spec.parameters = Some(params);

	let job = core.jobs.submit(spec).await?;
	let failed = wait_for_status(&core.jobs, job.id, JobStatus::Failed).await?;

	let message = failed.error_message.expect("failed job must carry a message");
	assert!(message.contains("unknown parameter"), "got: {message}");
	assert!(message.contains("NotAGadgetKey"), "got: {message}");
	assert!(failed.error_trace.is_some());
	assert!(failed.result_path.is_none());
	assert!(failed.output_files.is_none());
	assert_eq!(failed.progress, 0.0);

	// Failed runs keep their working area around for inspection.
	assert!(temp_dir.path().join("runs").join(job.id.to_string()).exists());

	core.shutdown().await;
	Ok(())
}
