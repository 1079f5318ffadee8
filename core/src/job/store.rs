//! Job persistence.
//!
//! Every lifecycle write is a guarded update: the WHERE clause carries the
//! states the transition is allowed from, so of two racing writers exactly
//! one sees `rows_affected == 1`. The loser gets `false` back and the caller
//! decides whether that means not-found, an illegal transition, or a late
//! write to drop.

use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use sea_orm::{
	ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter,
	QueryOrder, QuerySelect,
};
use uuid::Uuid;

use crate::infra::db::entities::job;
use crate::infra::db::Database;
use crate::job::{
	JobError, JobFilter, JobId, JobInfo, JobPage, JobResult, JobSpec, JobStats, JobStatus,
	Pagination, SimulatorKind,
};

pub struct JobStore {
	db: Arc<Database>,
}

impl JobStore {
	pub fn new(db: Arc<Database>) -> Self {
		Self { db }
	}

	/// Validate and persist a new job in PENDING.
	pub async fn create(&self, spec: JobSpec) -> JobResult<JobInfo> {
		spec.validate()?;

		let active = job::ActiveModel {
			id: Set(Uuid::new_v4()),
			name: Set(spec.name),
			description: Set(spec.description),
			simulator_type: Set(spec.simulator_type.to_string()),
			status: Set(JobStatus::Pending.to_string()),
			progress: Set(0.0),
			num_particles: Set(spec.num_particles),
			box_size: Set(spec.box_size),
			parameters: Set(spec.parameters.map(serde_json::Value::Object)),
			result_path: Set(None),
			output_files: Set(None),
			execution_handle: Set(None),
			error_message: Set(None),
			error_trace: Set(None),
			created_at: Set(Utc::now()),
			started_at: Set(None),
			completed_at: Set(None),
		};

		let model = active.insert(self.db.conn()).await?;
		to_info(model)
	}

	pub async fn get(&self, id: JobId) -> JobResult<JobInfo> {
		let model = job::Entity::find_by_id(id.0)
			.one(self.db.conn())
			.await?
			.ok_or(JobError::NotFound(id))?;
		to_info(model)
	}

	/// One page of jobs, newest first. The id tie-break keeps the order
	/// stable when rows share a creation timestamp.
	pub async fn list(&self, filter: JobFilter, pagination: Pagination) -> JobResult<JobPage> {
		let mut query = job::Entity::find();
		if let Some(status) = filter.status {
			query = query.filter(job::Column::Status.eq(status.to_string()));
		}
		if let Some(simulator) = filter.simulator {
			query = query.filter(job::Column::SimulatorType.eq(simulator.to_string()));
		}

		let total = query.clone().count(self.db.conn()).await?;

		let models = query
			.order_by_desc(job::Column::CreatedAt)
			.order_by_asc(job::Column::Id)
			.offset(pagination.skip)
			.limit(pagination.limit)
			.all(self.db.conn())
			.await?;

		let jobs = models
			.into_iter()
			.map(to_info)
			.collect::<JobResult<Vec<_>>>()?;

		Ok(JobPage {
			jobs,
			total,
			page: pagination.page_number(),
			page_size: pagination.limit,
		})
	}

	/// Record the execution handle on a still-undispatched PENDING job.
	/// Returns false when the row was already claimed or has moved on.
	pub async fn claim_for_dispatch(&self, id: JobId, handle: &str) -> JobResult<bool> {
		let result = job::Entity::update_many()
			.filter(job::Column::Id.eq(id.0))
			.filter(job::Column::Status.eq(JobStatus::Pending.to_string()))
			.filter(job::Column::ExecutionHandle.is_null())
			.set(job::ActiveModel {
				execution_handle: Set(Some(handle.to_string())),
				..Default::default()
			})
			.exec(self.db.conn())
			.await?;
		Ok(result.rows_affected == 1)
	}

	/// Undo a dispatch claim after the queue refused the job. Guarded on the
	/// same handle so a newer claim is never wiped.
	pub async fn release_dispatch_claim(&self, id: JobId, handle: &str) -> JobResult<()> {
		job::Entity::update_many()
			.filter(job::Column::Id.eq(id.0))
			.filter(job::Column::Status.eq(JobStatus::Pending.to_string()))
			.filter(job::Column::ExecutionHandle.eq(handle))
			.set(job::ActiveModel {
				execution_handle: Set(None),
				..Default::default()
			})
			.exec(self.db.conn())
			.await?;
		Ok(())
	}

	/// PENDING -> RUNNING, the worker's claim on a queued job. Returns false
	/// when the job was cancelled while it sat in the queue.
	pub async fn mark_running(&self, id: JobId) -> JobResult<bool> {
		let result = job::Entity::update_many()
			.filter(job::Column::Id.eq(id.0))
			.filter(job::Column::Status.eq(JobStatus::Pending.to_string()))
			.set(job::ActiveModel {
				status: Set(JobStatus::Running.to_string()),
				started_at: Set(Some(Utc::now())),
				..Default::default()
			})
			.exec(self.db.conn())
			.await?;
		Ok(result.rows_affected == 1)
	}

	/// RUNNING -> COMPLETED with the published result. A false return means
	/// a cancel won the race and this result is discarded.
	pub async fn mark_completed(
		&self,
		id: JobId,
		result_path: &str,
		output_files: &[String],
	) -> JobResult<bool> {
		let files = serde_json::to_value(output_files).map_err(|e| {
			JobError::Database(sea_orm::DbErr::Custom(format!(
				"output_files not serializable: {e}"
			)))
		})?;
		let result = job::Entity::update_many()
			.filter(job::Column::Id.eq(id.0))
			.filter(job::Column::Status.eq(JobStatus::Running.to_string()))
			.set(job::ActiveModel {
				status: Set(JobStatus::Completed.to_string()),
				progress: Set(100.0),
				result_path: Set(Some(result_path.to_string())),
				output_files: Set(Some(files)),
				completed_at: Set(Some(Utc::now())),
				..Default::default()
			})
			.exec(self.db.conn())
			.await?;
		Ok(result.rows_affected == 1)
	}

	/// PENDING or RUNNING -> FAILED. PENDING is allowed so a job refused by
	/// a closed queue can be failed without ever starting.
	pub async fn mark_failed(
		&self,
		id: JobId,
		message: &str,
		trace: Option<&str>,
	) -> JobResult<bool> {
		let result = job::Entity::update_many()
			.filter(job::Column::Id.eq(id.0))
			.filter(job::Column::Status.is_in(non_terminal_statuses()))
			.set(job::ActiveModel {
				status: Set(JobStatus::Failed.to_string()),
				error_message: Set(Some(message.to_string())),
				error_trace: Set(trace.map(str::to_string)),
				completed_at: Set(Some(Utc::now())),
				..Default::default()
			})
			.exec(self.db.conn())
			.await?;
		Ok(result.rows_affected == 1)
	}

	/// PENDING or RUNNING -> CANCELLED.
	pub async fn mark_cancelled(&self, id: JobId) -> JobResult<bool> {
		let result = job::Entity::update_many()
			.filter(job::Column::Id.eq(id.0))
			.filter(job::Column::Status.is_in(non_terminal_statuses()))
			.set(job::ActiveModel {
				status: Set(JobStatus::Cancelled.to_string()),
				completed_at: Set(Some(Utc::now())),
				..Default::default()
			})
			.exec(self.db.conn())
			.await?;
		Ok(result.rows_affected == 1)
	}

	/// Checkpoint progress write. The `progress <= value` guard keeps the
	/// column monotonic even if checkpoint writes land out of order.
	pub async fn set_progress(&self, id: JobId, value: f64) -> JobResult<bool> {
		let result = job::Entity::update_many()
			.filter(job::Column::Id.eq(id.0))
			.filter(job::Column::Status.eq(JobStatus::Running.to_string()))
			.filter(job::Column::Progress.lte(value))
			.set(job::ActiveModel {
				progress: Set(value),
				..Default::default()
			})
			.exec(self.db.conn())
			.await?;
		Ok(result.rows_affected == 1)
	}

	/// Drop execution handles left on PENDING rows by a dead process. The
	/// queue they pointed at no longer exists, so the claims mean nothing.
	pub async fn clear_stale_dispatch_claims(&self) -> JobResult<u64> {
		let result = job::Entity::update_many()
			.filter(job::Column::Status.eq(JobStatus::Pending.to_string()))
			.filter(job::Column::ExecutionHandle.is_not_null())
			.set(job::ActiveModel {
				execution_handle: Set(None),
				..Default::default()
			})
			.exec(self.db.conn())
			.await?;
		Ok(result.rows_affected)
	}

	pub async fn ids_with_status(&self, status: JobStatus) -> JobResult<Vec<JobId>> {
		let models = job::Entity::find()
			.filter(job::Column::Status.eq(status.to_string()))
			.order_by_asc(job::Column::CreatedAt)
			.all(self.db.conn())
			.await?;
		Ok(models.into_iter().map(|m| JobId(m.id)).collect())
	}

	/// Fail every RUNNING job in one sweep. Startup recovery uses this when
	/// rows claim to be running but no worker holds them.
	pub async fn fail_all_running(&self, message: &str) -> JobResult<u64> {
		let result = job::Entity::update_many()
			.filter(job::Column::Status.eq(JobStatus::Running.to_string()))
			.set(job::ActiveModel {
				status: Set(JobStatus::Failed.to_string()),
				error_message: Set(Some(message.to_string())),
				completed_at: Set(Some(Utc::now())),
				..Default::default()
			})
			.exec(self.db.conn())
			.await?;
		Ok(result.rows_affected)
	}

	pub async fn stats(&self) -> JobResult<JobStats> {
		let count = |status: JobStatus| {
			job::Entity::find()
				.filter(job::Column::Status.eq(status.to_string()))
				.count(self.db.conn())
		};
		Ok(JobStats {
			pending: count(JobStatus::Pending).await?,
			running: count(JobStatus::Running).await?,
			completed: count(JobStatus::Completed).await?,
			failed: count(JobStatus::Failed).await?,
			cancelled: count(JobStatus::Cancelled).await?,
		})
	}
}

fn non_terminal_statuses() -> Vec<String> {
	vec![
		JobStatus::Pending.to_string(),
		JobStatus::Running.to_string(),
	]
}

fn to_info(model: job::Model) -> JobResult<JobInfo> {
	let status = JobStatus::from_str(&model.status)
		.map_err(|_| JobError::InvalidStoredStatus(model.status.clone()))?;
	let simulator_type = SimulatorKind::from_str(&model.simulator_type)
		.map_err(|_| JobError::InvalidStoredSimulator(model.simulator_type.clone()))?;

	let parameters = model.parameters.and_then(|value| match value {
		serde_json::Value::Object(map) => Some(map),
		_ => None,
	});
	let output_files = model
		.output_files
		.and_then(|value| serde_json::from_value(value).ok());

	Ok(JobInfo {
		id: JobId(model.id),
		name: model.name,
		description: model.description,
		simulator_type,
		status,
		progress: model.progress,
		num_particles: model.num_particles,
		box_size: model.box_size,
		parameters,
		result_path: model.result_path,
		output_files,
		execution_handle: model.execution_handle,
		error_message: model.error_message,
		error_trace: model.error_trace,
		created_at: model.created_at,
		started_at: model.started_at,
		completed_at: model.completed_at,
	})
}
