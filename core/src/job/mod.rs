//! Simulation job lifecycle engine.
//!
//! A job moves PENDING -> RUNNING -> {COMPLETED, FAILED}, with CANCELLED
//! reachable from any non-terminal state. The [`JobStore`] owns persistence
//! and the guarded status transitions, the [`JobManager`] owns the bounded
//! work queue and the at-most-once dispatch contract, and the worker drives
//! one job at a time to a terminal state.

use thiserror::Error;

use crate::simulator::{PublishError, SimulatorError};

pub mod manager;
pub mod store;
pub mod types;
pub mod worker;

pub use manager::{JobManager, RecoveryReport};
pub use store::JobStore;
pub use types::{
	JobFilter, JobId, JobInfo, JobPage, JobSpec, JobStats, JobStatus, Pagination, SimulatorKind,
	ValidationError,
};

#[derive(Error, Debug)]
pub enum JobError {
	// Client-facing errors, produced with no job mutation
	#[error("invalid job spec: {0}")]
	Validation(#[from] ValidationError),
	#[error("job not found: {0}")]
	NotFound(JobId),
	#[error("job {id} is {status}, transition not permitted")]
	InvalidState { id: JobId, status: JobStatus },

	// Dispatch and execution failures
	#[error("dispatch failed: {0}")]
	Dispatch(#[from] DispatchError),
	#[error("execution failed: {0}")]
	Execution(#[from] ExecutionError),

	// Infrastructure
	#[error("database error: {0}")]
	Database(#[from] sea_orm::DbErr),
	#[error("invalid job status stored in database: {0}")]
	InvalidStoredStatus(String),
	#[error("invalid simulator type stored in database: {0}")]
	InvalidStoredSimulator(String),
}

pub type JobResult<T> = Result<T, JobError>;

/// Enqueue failure, classified so the caller knows whether a retry can help.
#[derive(Error, Debug)]
pub enum DispatchError {
	/// The bounded work queue is at capacity. The job stays PENDING with no
	/// execution handle; a later `dispatch` may succeed.
	#[error("work queue is full, job left pending")]
	QueueFull,
	/// The work queue is shut down. The job is transitioned to FAILED.
	#[error("work queue is closed")]
	QueueClosed,
	/// Another dispatch for the same job id is in flight right now.
	#[error("job {0} already has a dispatch in flight")]
	AlreadyDispatched(JobId),
}

impl DispatchError {
	pub fn is_retryable(&self) -> bool {
		matches!(self, Self::QueueFull | Self::AlreadyDispatched(_))
	}
}

/// Failure during a run. Always terminal: the worker persists it as the
/// job's FAILED state and never retries.
#[derive(Error, Debug)]
pub enum ExecutionError {
	#[error("parameter file generation failed: {0}")]
	Parameters(#[from] SimulatorError),
	#[error("result publishing failed: {0}")]
	Publish(#[from] PublishError),
	#[error("working area error: {0}")]
	Workspace(#[from] std::io::Error),
	#[error("exceeded soft time limit of {0}s, terminating run")]
	SoftTimeLimit(u64),
	#[error("exceeded hard time limit of {0}s")]
	HardTimeLimit(u64),
	#[error("cancelled by client request")]
	Cancelled,
}
