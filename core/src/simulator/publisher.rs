//! Result publication.
//!
//! A completed run leaves artifacts under `<workdir>/output`. The publisher
//! stages them at their long-term location and reports the address recorded
//! on the job row. The bundled implementation moves them into a per-job
//! directory on local disk; an object-store implementation would slot in
//! behind the same trait.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

use crate::job::JobId;

#[derive(Error, Debug)]
pub enum PublishError {
	#[error("run produced no artifacts under {}", .0.display())]
	NoArtifacts(PathBuf),
	#[error("failed to stage results: {0}")]
	Io(#[from] io::Error),
}

/// Where the artifacts ended up, as recorded on the job row.
#[derive(Debug, Clone)]
pub struct PublishedResult {
	pub result_path: String,
	pub output_files: Vec<String>,
}

#[async_trait]
pub trait ResultPublisher: Send + Sync {
	async fn publish(&self, job_id: JobId, workdir: &Path)
		-> Result<PublishedResult, PublishError>;
}

pub struct LocalResultPublisher {
	results_dir: PathBuf,
}

impl LocalResultPublisher {
	pub fn new(results_dir: impl Into<PathBuf>) -> Self {
		Self {
			results_dir: results_dir.into(),
		}
	}
}

#[async_trait]
impl ResultPublisher for LocalResultPublisher {
	async fn publish(
		&self,
		job_id: JobId,
		workdir: &Path,
	) -> Result<PublishedResult, PublishError> {
		let output = workdir.join("output");
		let mut entries = match tokio::fs::read_dir(&output).await {
			Ok(entries) => entries,
			Err(e) if e.kind() == io::ErrorKind::NotFound => {
				return Err(PublishError::NoArtifacts(output));
			}
			Err(e) => return Err(e.into()),
		};

		let target = self.results_dir.join(job_id.to_string());
		tokio::fs::create_dir_all(&target).await?;

		// Runs and results share a data directory, so a rename is a move.
		let mut output_files = Vec::new();
		while let Some(entry) = entries.next_entry().await? {
			if !entry.file_type().await?.is_file() {
				continue;
			}
			let name = entry.file_name().to_string_lossy().into_owned();
			tokio::fs::rename(entry.path(), target.join(&name)).await?;
			output_files.push(name);
		}
		if output_files.is_empty() {
			return Err(PublishError::NoArtifacts(output));
		}
		output_files.sort();

		Ok(PublishedResult {
			result_path: target.to_string_lossy().into_owned(),
			output_files,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn moves_artifacts_into_per_job_directory() -> Result<(), Box<dyn std::error::Error>> {
		let data_dir = tempfile::tempdir()?;
		let workdir = data_dir.path().join("runs").join("job");
		tokio::fs::create_dir_all(workdir.join("output")).await?;
		tokio::fs::write(workdir.join("output/snapshot_001.hdf5"), b"b").await?;
		tokio::fs::write(workdir.join("output/snapshot_000.hdf5"), b"a").await?;

		let publisher = LocalResultPublisher::new(data_dir.path().join("results"));
		let job_id = JobId::new();
		let published = publisher.publish(job_id, &workdir).await?;

		assert_eq!(
			published.output_files,
			vec!["snapshot_000.hdf5", "snapshot_001.hdf5"]
		);
		let staged = data_dir
			.path()
			.join("results")
			.join(job_id.to_string())
			.join("snapshot_000.hdf5");
		assert!(staged.is_file());
		assert!(!workdir.join("output/snapshot_000.hdf5").exists());
		assert_eq!(published.result_path, staged.parent().unwrap().to_string_lossy());

		Ok(())
	}

	#[tokio::test]
	async fn empty_or_missing_output_is_an_error() -> Result<(), Box<dyn std::error::Error>> {
		let data_dir = tempfile::tempdir()?;
		let publisher = LocalResultPublisher::new(data_dir.path().join("results"));

		let missing = data_dir.path().join("runs").join("missing");
		assert!(matches!(
			publisher.publish(JobId::new(), &missing).await,
			Err(PublishError::NoArtifacts(_))
		));

		let empty = data_dir.path().join("runs").join("empty");
		tokio::fs::create_dir_all(empty.join("output")).await?;
		assert!(matches!(
			publisher.publish(JobId::new(), &empty).await,
			Err(PublishError::NoArtifacts(_))
		));

		Ok(())
	}
}
