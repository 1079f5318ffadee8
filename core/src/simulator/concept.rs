//! CONCEPT integration.
//!
//! CONCEPT takes a Python-syntax parameter file (`name = value` lines). The
//! renderer derives `boxsize` and the initial-condition particle count from
//! the job record and accepts overrides only for the cosmology knobs below.

use std::fmt::Write as _;
use std::path::Path;

use async_trait::async_trait;
use serde_json::Value;

use super::{render_scalar, Simulator, SimulatorError};
use crate::job::{JobInfo, SimulatorKind};

/// Derived from the job record or fixed by the working-area layout.
const RESERVED_KEYS: &[&str] = &["boxsize", "initial_conditions", "output_dirs"];

const DEFAULTS: &[(&str, &str)] = &[("a_begin", "0.02"), ("a_end", "1.0")];

const ALLOWED_KEYS: &[&str] = &["H0", "Ωcdm", "Ωb", "a_begin", "a_end"];

const CHECKPOINTS: &[f64] = &[25.0, 50.0, 75.0, 100.0];

pub struct Concept;

/// Scalars in CONCEPT's input are Python literals, so strings get quoted.
fn python_literal(key: &str, value: &Value) -> Result<String, SimulatorError> {
	match value {
		Value::String(s) => Ok(format!("'{s}'")),
		other => render_scalar(key, other),
	}
}

#[async_trait]
impl Simulator for Concept {
	fn kind(&self) -> SimulatorKind {
		SimulatorKind::Concept
	}

	fn parameter_file_name(&self) -> &'static str {
		"job.param"
	}

	fn checkpoints(&self) -> &'static [f64] {
		CHECKPOINTS
	}

	fn render_parameter_file(&self, job: &JobInfo) -> Result<String, SimulatorError> {
		let overrides = job.parameters.as_ref();
		if let Some(map) = overrides {
			for key in map.keys() {
				if RESERVED_KEYS.contains(&key.as_str()) {
					return Err(SimulatorError::ReservedParameter { key: key.clone() });
				}
				if !ALLOWED_KEYS.contains(&key.as_str()) {
					return Err(SimulatorError::UnknownParameter {
						kind: SimulatorKind::Concept,
						key: key.clone(),
					});
				}
			}
		}

		let mut out = format!("# CONCEPT parameter file for job {}\n", job.id);
		let _ = writeln!(
			out,
			"initial_conditions = {{'species': 'matter', 'N': {}}}",
			job.num_particles
		);
		let _ = writeln!(out, "boxsize = {}*Mpc", job.box_size);
		let _ = writeln!(out, "output_dirs = {{'snapshot': './output'}}");
		for (key, default) in DEFAULTS {
			let value = match overrides.and_then(|map| map.get(*key)) {
				Some(value) => python_literal(key, value)?,
				None => (*default).to_string(),
			};
			let _ = writeln!(out, "{key} = {value}");
		}
		if let Some(map) = overrides {
			for (key, value) in map {
				if DEFAULTS.iter().any(|(k, _)| *k == key.as_str()) {
					continue;
				}
				let _ = writeln!(out, "{key} = {}", python_literal(key, value)?);
			}
		}

		Ok(out)
	}

	async fn advance(
		&self,
		job: &JobInfo,
		workdir: &Path,
		checkpoint: f64,
	) -> Result<(), std::io::Error> {
		let output = workdir.join("output");
		tokio::fs::create_dir_all(&output).await?;

		// CONCEPT names snapshots by scale factor rather than sequence.
		let scale_factor = checkpoint / 100.0;
		let snapshot = output.join(format!("snapshot_a={scale_factor:.2}"));
		let body = format!(
			"placeholder concept snapshot for job {} at a={scale_factor:.2}\n",
			job.id
		);
		tokio::fs::write(snapshot, body).await
	}
}

#[cfg(test)]
mod tests {
	use chrono::Utc;
	use serde_json::json;

	use super::*;
	use crate::job::{JobId, JobStatus};

	fn job_with_parameters(parameters: Option<serde_json::Value>) -> JobInfo {
		JobInfo {
			id: JobId::new(),
			name: "concept run".to_string(),
			description: None,
			simulator_type: SimulatorKind::Concept,
			status: JobStatus::Pending,
			progress: 0.0,
			num_particles: 128,
			box_size: 512.0,
			parameters: parameters.map(|v| v.as_object().cloned().unwrap_or_default()),
			result_path: None,
			output_files: None,
			execution_handle: None,
			error_message: None,
			error_trace: None,
			created_at: Utc::now(),
			started_at: None,
			completed_at: None,
		}
	}

	#[test]
	fn renders_python_syntax_from_job_fields() {
		let rendered = Concept
			.render_parameter_file(&job_with_parameters(None))
			.unwrap();

		assert!(rendered.contains("initial_conditions = {'species': 'matter', 'N': 128}"));
		assert!(rendered.contains("boxsize = 512*Mpc"));
		assert!(rendered.contains("a_begin = 0.02"));
		assert!(rendered.contains("a_end = 1.0"));
	}

	#[test]
	fn cosmology_overrides_are_accepted_and_quoted_when_strings() {
		let job = job_with_parameters(Some(json!({ "Ωcdm": 0.27, "H0": "67*km/(s*Mpc)" })));
		let rendered = Concept.render_parameter_file(&job).unwrap();

		assert!(rendered.contains("Ωcdm = 0.27"));
		assert!(rendered.contains("H0 = '67*km/(s*Mpc)'"));
	}

	#[test]
	fn reserved_and_unknown_keys_are_rejected() {
		let reserved = job_with_parameters(Some(json!({ "boxsize": 1024 })));
		assert!(matches!(
			Concept.render_parameter_file(&reserved),
			Err(SimulatorError::ReservedParameter { .. })
		));

		let unknown = job_with_parameters(Some(json!({ "Sigma8": 0.8 })));
		assert!(matches!(
			Concept.render_parameter_file(&unknown),
			Err(SimulatorError::UnknownParameter { .. })
		));
	}
}
