//! Config, core and job builders shared by the integration tests.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use redshift_core::{
	AppConfig, Core, JobId, JobInfo, JobManager, JobSpec, JobStatus, SimulatorKind,
};
use tokio::time::sleep;

/// Write a config tuned for tests: one worker slot, near-instant checkpoints.
pub fn write_test_config(data_dir: &Path) -> anyhow::Result<AppConfig> {
	write_config_with(data_dir, |_| {})
}

/// Same, with a hook for per-test tuning of pacing and queue depth.
pub fn write_config_with(
	data_dir: &Path,
	tune: impl FnOnce(&mut AppConfig),
) -> anyhow::Result<AppConfig> {
	let mut config = AppConfig::default_with_dir(data_dir.to_path_buf());
	config.execution.checkpoint_pause_ms = 5;
	tune(&mut config);
	config.save()?;
	Ok(config)
}

/// A core over a fresh data directory with fast checkpoint pacing.
pub async fn fast_core(data_dir: &Path) -> Result<Arc<Core>, Box<dyn std::error::Error>> {
	write_test_config(data_dir)?;
	let core = Core::new_with_config(data_dir.to_path_buf()).await?;
	Ok(core)
}

/// A small but valid Gadget-4 spec.
pub fn gadget4_spec(name: &str) -> JobSpec {
	JobSpec {
		name: name.to_string(),
		description: None,
		simulator_type: SimulatorKind::Gadget4,
		num_particles: 10_000,
		box_size: 100.0,
		parameters: None,
	}
}

/// Same shape, CO*N*CEPT flavored.
pub fn concept_spec(name: &str) -> JobSpec {
	JobSpec {
		simulator_type: SimulatorKind::Concept,
		..gadget4_spec(name)
	}
}

/// Poll until the job reaches `wanted`, panicking if it settles in a
/// different terminal state or takes longer than ~5 seconds.
pub async fn wait_for_status(
	jobs: &Arc<JobManager>,
	id: JobId,
	wanted: JobStatus,
) -> Result<JobInfo, Box<dyn std::error::Error>> {
	let mut retries = 0;
	loop {
		let job = jobs.get_job(id).await?;
		if job.status == wanted {
			return Ok(job);
		}
		if job.status.is_terminal() {
			panic!(
				"job {} settled in {} while waiting for {} (error: {:?})",
				id, job.status, wanted, job.error_message
			);
		}
		if retries >= 200 {
			panic!("job {} stuck in {} while waiting for {}", id, job.status, wanted);
		}
		retries += 1;
		sleep(Duration::from_millis(25)).await;
	}
}
