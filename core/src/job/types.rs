//! Core types for the simulation job system

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Unique identifier for a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
	pub fn new() -> Self {
		Self(Uuid::new_v4())
	}
}

impl Default for JobId {
	fn default() -> Self {
		Self::new()
	}
}

impl fmt::Display for JobId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl From<Uuid> for JobId {
	fn from(uuid: Uuid) -> Self {
		Self(uuid)
	}
}

impl From<JobId> for Uuid {
	fn from(id: JobId) -> Self {
		id.0
	}
}

/// Current status of a job
#[derive(
	Debug,
	Clone,
	Copy,
	PartialEq,
	Eq,
	Serialize,
	Deserialize,
	strum::Display,
	strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "lowercase")]
pub enum JobStatus {
	/// Job is created and waiting for a worker slot
	Pending,
	/// Job is currently executing
	Running,
	/// Job finished all work and published its results
	Completed,
	/// Job hit an unrecoverable error
	Failed,
	/// Job was cancelled by the client
	Cancelled,
}

impl JobStatus {
	/// Terminal states are absorbing, no further transitions are permitted.
	pub fn is_terminal(&self) -> bool {
		matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
	}

	/// The legal transition edges of the lifecycle.
	///
	/// Pending may start running, fail at dispatch, or be cancelled while
	/// queued. Running may reach any terminal state. Terminal states have
	/// no outgoing edges.
	pub fn can_transition_to(&self, next: JobStatus) -> bool {
		use JobStatus::*;
		matches!(
			(self, next),
			(Pending, Running)
				| (Pending, Failed)
				| (Pending, Cancelled)
				| (Running, Completed)
				| (Running, Failed)
				| (Running, Cancelled)
		)
	}
}

/// Which simulation engine executes a job
#[derive(
	Debug,
	Clone,
	Copy,
	PartialEq,
	Eq,
	Hash,
	Serialize,
	Deserialize,
	strum::Display,
	strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "lowercase")]
pub enum SimulatorKind {
	/// Gadget-4 cosmological N-body / SPH code
	Gadget4,
	/// CO*N*CEPT N-body code
	Concept,
}

impl Default for SimulatorKind {
	fn default() -> Self {
		Self::Gadget4
	}
}

/// A validated request to run a simulation.
///
/// All fields are immutable once the job record is created; `parameters`
/// holds engine-specific overrides checked against the simulator's
/// allow-list at render time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
	pub name: String,
	#[serde(default)]
	pub description: Option<String>,
	#[serde(default)]
	pub simulator_type: SimulatorKind,
	pub num_particles: i64,
	pub box_size: f64,
	#[serde(default)]
	pub parameters: Option<serde_json::Map<String, serde_json::Value>>,
}

impl JobSpec {
	pub const MAX_NAME_LEN: usize = 255;

	/// Reject malformed specs before anything is persisted.
	pub fn validate(&self) -> Result<(), ValidationError> {
		if self.name.is_empty() {
			return Err(ValidationError::EmptyName);
		}
		if self.name.chars().count() > Self::MAX_NAME_LEN {
			return Err(ValidationError::NameTooLong(self.name.chars().count()));
		}
		if self.num_particles <= 0 {
			return Err(ValidationError::NonPositiveParticles(self.num_particles));
		}
		if !self.box_size.is_finite() || self.box_size <= 0.0 {
			return Err(ValidationError::NonPositiveBoxSize(self.box_size));
		}
		Ok(())
	}
}

/// Rejection of a malformed job spec, raised before any persistence
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
	#[error("job name must not be empty")]
	EmptyName,
	#[error("job name too long: {0} chars (max {max})", max = JobSpec::MAX_NAME_LEN)]
	NameTooLong(usize),
	#[error("num_particles must be positive, got {0}")]
	NonPositiveParticles(i64),
	#[error("box_size must be a positive finite number, got {0}")]
	NonPositiveBoxSize(f64),
}

/// Full job representation returned by queries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobInfo {
	pub id: JobId,
	pub name: String,
	pub description: Option<String>,
	pub simulator_type: SimulatorKind,
	pub status: JobStatus,
	pub progress: f64,
	pub num_particles: i64,
	pub box_size: f64,
	pub parameters: Option<serde_json::Map<String, serde_json::Value>>,
	pub result_path: Option<String>,
	pub output_files: Option<Vec<String>>,
	pub execution_handle: Option<String>,
	pub error_message: Option<String>,
	pub error_trace: Option<String>,
	pub created_at: chrono::DateTime<chrono::Utc>,
	pub started_at: Option<chrono::DateTime<chrono::Utc>>,
	pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Filter criteria for job listings
#[derive(Debug, Clone, Copy, Default)]
pub struct JobFilter {
	pub status: Option<JobStatus>,
	pub simulator: Option<SimulatorKind>,
}

impl JobFilter {
	pub fn status(status: JobStatus) -> Self {
		Self {
			status: Some(status),
			..Default::default()
		}
	}

	pub fn simulator(simulator: SimulatorKind) -> Self {
		Self {
			simulator: Some(simulator),
			..Default::default()
		}
	}
}

/// Offset-based pagination window
#[derive(Debug, Clone, Copy)]
pub struct Pagination {
	pub skip: u64,
	pub limit: u64,
}

impl Pagination {
	pub fn new(skip: u64, limit: u64) -> Self {
		Self { skip, limit }
	}

	/// 1-based page number for this window. A zero limit is defined to be
	/// page 1 rather than a division by zero.
	pub fn page_number(&self) -> u64 {
		if self.limit == 0 {
			1
		} else {
			self.skip / self.limit + 1
		}
	}
}

impl Default for Pagination {
	fn default() -> Self {
		Self {
			skip: 0,
			limit: 100,
		}
	}
}

/// One page of a job listing
#[derive(Debug, Clone, Serialize)]
pub struct JobPage {
	pub jobs: Vec<JobInfo>,
	/// Total matching count, independent of the pagination window
	pub total: u64,
	pub page: u64,
	pub page_size: u64,
}

/// Per-status job counts, the monitoring surface
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobStats {
	pub pending: u64,
	pub running: u64,
	pub completed: u64,
	pub failed: u64,
	pub cancelled: u64,
}

impl JobStats {
	pub fn total(&self) -> u64 {
		self.pending + self.running + self.completed + self.failed + self.cancelled
	}
}
