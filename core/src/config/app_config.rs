//! Application configuration

use super::default_data_dir;
use crate::config::migration::Migrate;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
	/// Config schema version
	pub version: u32,

	/// Data directory path
	pub data_dir: PathBuf,

	/// Logging level
	pub log_level: String,

	/// Job execution configuration
	#[serde(default)]
	pub execution: ExecutionConfig,

	/// On-disk layout for runs and results
	#[serde(default)]
	pub storage: StorageConfig,
}

/// Configuration for the execution pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
	/// Worker slots pulling jobs off the queue
	pub worker_slots: usize,

	/// Bounded queue depth; dispatch refuses jobs beyond it
	pub queue_capacity: usize,

	/// Hard wall-clock limit for a single run, in seconds
	pub hard_time_limit_secs: u64,

	/// Soft limit, after which a run is failed cleanly at the next
	/// checkpoint boundary
	pub soft_time_limit_secs: u64,

	/// Pause between checkpoints of the bundled engines, in milliseconds
	pub checkpoint_pause_ms: u64,
}

impl Default for ExecutionConfig {
	fn default() -> Self {
		Self {
			worker_slots: 1,
			queue_capacity: 16,
			hard_time_limit_secs: 3600,
			soft_time_limit_secs: 3540,
			checkpoint_pause_ms: 250,
		}
	}
}

impl ExecutionConfig {
	pub fn hard_limit(&self) -> Duration {
		Duration::from_secs(self.hard_time_limit_secs)
	}

	pub fn soft_limit(&self) -> Duration {
		Duration::from_secs(self.soft_time_limit_secs)
	}

	pub fn checkpoint_pause(&self) -> Duration {
		Duration::from_millis(self.checkpoint_pause_ms)
	}
}

/// Directory names under `data_dir` for in-flight runs and published results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
	pub runs_directory: String,
	pub results_directory: String,
}

impl Default for StorageConfig {
	fn default() -> Self {
		Self {
			runs_directory: "runs".to_string(),
			results_directory: "results".to_string(),
		}
	}
}

impl AppConfig {
	/// Load configuration from the default location
	pub fn load() -> Result<Self> {
		let data_dir = default_data_dir()?;
		Self::load_from(&data_dir)
	}

	/// Load configuration from a specific data directory
	pub fn load_from(data_dir: &PathBuf) -> Result<Self> {
		let config_path = data_dir.join("redshift.json");

		if config_path.exists() {
			info!("Loading config from {:?}", config_path);
			let json = fs::read_to_string(&config_path)?;
			let mut config: AppConfig = serde_json::from_str(&json)?;

			// Apply migrations if needed
			if config.version < Self::target_version() {
				info!(
					"Migrating config from v{} to v{}",
					config.version,
					Self::target_version()
				);
				config.migrate()?;
				config.save()?;
			}

			Ok(config)
		} else {
			warn!("No config found, creating default at {:?}", config_path);
			let config = Self::default_with_dir(data_dir.clone());
			config.save()?;
			Ok(config)
		}
	}

	/// Create default configuration with specific data directory
	pub fn default_with_dir(data_dir: PathBuf) -> Self {
		Self {
			version: Self::target_version(),
			data_dir,
			log_level: "info".to_string(),
			execution: ExecutionConfig::default(),
			storage: StorageConfig::default(),
		}
	}

	/// Save configuration to disk
	pub fn save(&self) -> Result<()> {
		// Ensure directory exists
		fs::create_dir_all(&self.data_dir)?;

		let config_path = self.data_dir.join("redshift.json");
		let json = serde_json::to_string_pretty(self)?;
		fs::write(&config_path, json)?;
		info!("Saved config to {:?}", config_path);
		Ok(())
	}

	/// Path of the SQLite database file
	pub fn database_path(&self) -> PathBuf {
		self.data_dir.join("redshift.db")
	}

	/// Get the path for logs directory
	pub fn logs_dir(&self) -> PathBuf {
		self.data_dir.join("logs")
	}

	/// Working areas of in-flight runs
	pub fn runs_dir(&self) -> PathBuf {
		self.data_dir.join(&self.storage.runs_directory)
	}

	/// Published results, one directory per completed job
	pub fn results_dir(&self) -> PathBuf {
		self.data_dir.join(&self.storage.results_directory)
	}

	/// Ensure all required directories exist
	pub fn ensure_directories(&self) -> Result<()> {
		fs::create_dir_all(&self.data_dir)?;
		fs::create_dir_all(self.logs_dir())?;
		fs::create_dir_all(self.runs_dir())?;
		fs::create_dir_all(self.results_dir())?;
		Ok(())
	}
}

impl Default for AppConfig {
	fn default() -> Self {
		let data_dir = default_data_dir().unwrap_or_else(|_| PathBuf::from("."));
		Self::default_with_dir(data_dir)
	}
}

impl Migrate for AppConfig {
	fn current_version(&self) -> u32 {
		self.version
	}

	fn target_version() -> u32 {
		2 // Storage layout split out of the execution block
	}

	fn migrate(&mut self) -> Result<()> {
		match self.version {
			1 => {
				// Migration from v1 to v2: storage locations get their own
				// section with the historical defaults
				self.storage = StorageConfig::default();
				self.version = 2;
				Ok(())
			}
			2 => Ok(()), // Already at target version
			v => Err(anyhow!("Unknown config version: {}", v)),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn save_and_reload_round_trips() -> Result<()> {
		let dir = tempfile::tempdir()?;
		let mut config = AppConfig::default_with_dir(dir.path().to_path_buf());
		config.execution.worker_slots = 4;
		config.save()?;

		let reloaded = AppConfig::load_from(&dir.path().to_path_buf())?;
		assert_eq!(reloaded.version, AppConfig::target_version());
		assert_eq!(reloaded.execution.worker_slots, 4);
		assert_eq!(reloaded.storage.runs_directory, "runs");
		Ok(())
	}

	#[test]
	fn v1_config_migrates_on_load() -> Result<()> {
		let dir = tempfile::tempdir()?;
		let legacy = serde_json::json!({
			"version": 1,
			"data_dir": dir.path(),
			"log_level": "info",
			"execution": {
				"worker_slots": 2,
				"queue_capacity": 8,
				"hard_time_limit_secs": 60,
				"soft_time_limit_secs": 50,
				"checkpoint_pause_ms": 10
			}
		});
		fs::create_dir_all(dir.path())?;
		fs::write(
			dir.path().join("redshift.json"),
			serde_json::to_string_pretty(&legacy)?,
		)?;

		let config = AppConfig::load_from(&dir.path().to_path_buf())?;
		assert_eq!(config.version, 2);
		assert_eq!(config.execution.worker_slots, 2);
		assert_eq!(config.storage.results_directory, "results");
		Ok(())
	}

	#[test]
	fn unknown_version_is_rejected() {
		let dir = std::env::temp_dir();
		let mut config = AppConfig::default_with_dir(dir);
		config.version = 99;
		assert!(config.migrate().is_err());
	}
}
