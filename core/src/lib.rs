//! Redshift core, a lifecycle engine for large cosmological simulation jobs.
//!
//! A job is one request to run a simulation (Gadget-4 or CO*N*CEPT). The
//! engine persists every job in SQLite, dispatches it at most once onto a
//! bounded in-process work queue, drives it through
//! PENDING -> RUNNING -> {COMPLETED, FAILED, CANCELLED} with monotonic
//! progress checkpoints, and publishes the run's artifacts into a per-job
//! results directory. Embedders construct a [`Core`] and do everything else
//! through [`JobManager`].

use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;
use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{
	filter::{Directive, LevelFilter},
	fmt::{self, Layer},
	prelude::*,
	EnvFilter,
};

pub mod config;
pub mod infra;
pub mod job;
pub mod simulator;

pub use config::AppConfig;
pub use job::{
	DispatchError, ExecutionError, JobError, JobFilter, JobId, JobInfo, JobManager, JobPage,
	JobResult, JobSpec, JobStats, JobStatus, JobStore, Pagination, RecoveryReport, SimulatorKind,
	ValidationError,
};

use crate::infra::db::Database;

#[cfg(debug_assertions)]
const CONSOLE_LOG_FILTER: LevelFilter = LevelFilter::DEBUG;

#[cfg(not(debug_assertions))]
const CONSOLE_LOG_FILTER: LevelFilter = LevelFilter::INFO;

/// Failure while bringing the engine up.
#[derive(thiserror::Error, Debug)]
pub enum CoreError {
	#[error("configuration error: {0}")]
	Config(#[from] anyhow::Error),
	#[error("database error: {0}")]
	Database(#[from] sea_orm::DbErr),
	#[error(transparent)]
	Jobs(#[from] JobError),
}

/// The running engine. One instance owns the configuration, the job
/// database and the worker slots; it is cheap to share behind an `Arc`.
pub struct Core {
	config: Arc<AppConfig>,
	db: Arc<Database>,
	/// Job lifecycle manager, the primary API surface
	pub jobs: Arc<JobManager>,
}

impl Core {
	/// Bring the engine up in the platform default data directory.
	pub async fn new() -> Result<Arc<Core>, CoreError> {
		let data_dir = config::default_data_dir()?;
		Self::new_with_config(data_dir).await
	}

	/// Bring the engine up in a caller-chosen data directory.
	///
	/// First run creates the directory layout, config file and database.
	/// Recovery runs before the instance is handed out: jobs left RUNNING
	/// by an unclean shutdown are failed and queued PENDING jobs are
	/// re-dispatched, so callers never observe stale in-flight state.
	pub async fn new_with_config(data_dir: PathBuf) -> Result<Arc<Core>, CoreError> {
		info!("Initializing Redshift core at {:?}", data_dir);

		// 1. Load or create the app config
		let config = AppConfig::load_from(&data_dir)?;
		config.ensure_directories()?;
		let config = Arc::new(config);

		// 2. Open the job database, creating and migrating it on first run
		let db = Arc::new(Database::create(&config.database_path()).await?);
		db.migrate().await?;

		// 3. Start the job manager and its worker slots
		let jobs = JobManager::new(db.clone(), &config);

		// 4. Repair whatever a previous process left behind
		let report = jobs.recover().await?;
		if report.failed_running > 0 || report.requeued_pending > 0 {
			info!(
				"Recovered from unclean shutdown: {} interrupted run(s) failed, {} pending job(s) requeued",
				report.failed_running, report.requeued_pending
			);
		}

		info!("Redshift core ready");
		Ok(Arc::new(Core { config, db, jobs }))
	}

	/// Get the application configuration
	pub fn config(&self) -> Arc<AppConfig> {
		self.config.clone()
	}

	/// Get the shared database handle
	pub fn db(&self) -> Arc<Database> {
		self.db.clone()
	}

	/// Engine version, from the crate metadata
	pub fn version() -> &'static str {
		env!("CARGO_PKG_VERSION")
	}

	/// Per-status job counts, the monitoring surface
	pub async fn status(&self) -> JobResult<JobStats> {
		self.jobs.stats().await
	}

	/// Shut the engine down gracefully: stop intake, signal the workers
	/// and wait for the in-flight run to reach a terminal state.
	pub async fn shutdown(&self) {
		info!("Redshift core shutting down...");
		self.jobs.shutdown().await;
		info!("Shutdown complete.");
	}
}

/// Install the global tracing subscriber: console output plus a daily
/// rolling file under `data_dir/logs`.
///
/// Never invoked implicitly. Embedding binaries call this once at process
/// start; tests skip it so they can build as many cores as they like. The
/// returned guard must be held for the life of the process, dropping it
/// loses buffered log lines.
pub fn init_logging(config: &AppConfig) -> anyhow::Result<WorkerGuard> {
	std::fs::create_dir_all(config.logs_dir())?;

	let (non_blocking, guard) =
		tracing_appender::non_blocking(rolling::daily(config.logs_dir(), "redshift.log"));

	// The configured level applies to this crate; everything else stays at warn.
	let crate_directive: Directive = format!("redshift_core={}", config.log_level)
		.parse()
		.unwrap_or_else(|_| {
			"redshift_core=debug"
				.parse()
				.expect("Error invalid tracing directive!")
		});

	tracing_subscriber::registry()
		.with(
			EnvFilter::from_default_env()
				.add_directive("warn".parse().expect("Error invalid tracing directive!"))
				.add_directive(crate_directive),
		)
		.with(fmt::layer().with_filter(CONSOLE_LOG_FILTER))
		.with(
			Layer::default()
				.with_writer(non_blocking)
				.with_ansi(false)
				.with_filter(LevelFilter::DEBUG),
		)
		.init();

	Ok(guard)
}
