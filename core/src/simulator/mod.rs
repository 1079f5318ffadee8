//! Simulation engine integrations.
//!
//! Each supported engine implements [`Simulator`]: rendering the engine's
//! native parameter file from a job record and advancing a run through its
//! progress checkpoints. The bundled implementations stand in for the real
//! binaries and write placeholder snapshots so the result pipeline has
//! something to move.

use std::path::Path;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::job::{JobInfo, SimulatorKind};

pub mod concept;
pub mod gadget4;
pub mod publisher;

pub use concept::Concept;
pub use gadget4::Gadget4;
pub use publisher::{LocalResultPublisher, PublishError, PublishedResult, ResultPublisher};

#[derive(Error, Debug)]
pub enum SimulatorError {
	#[error("unknown parameter '{key}' for {kind}")]
	UnknownParameter { kind: SimulatorKind, key: String },
	#[error("parameter '{key}' is derived from the job record and cannot be overridden")]
	ReservedParameter { key: String },
	#[error("parameter '{key}' must be a number or a string, got {found}")]
	NonScalarParameter { key: String, found: &'static str },
}

#[async_trait]
pub trait Simulator: Send + Sync {
	/// Engine this implementation drives.
	fn kind(&self) -> SimulatorKind;

	/// File name of the rendered parameter file inside the working area.
	fn parameter_file_name(&self) -> &'static str;

	/// Progress checkpoints a run reports, strictly increasing and ending
	/// at 100. The runner persists progress after each one.
	fn checkpoints(&self) -> &'static [f64];

	/// Render the engine's parameter file from the job's immutable fields
	/// and its validated overrides.
	fn render_parameter_file(&self, job: &JobInfo) -> Result<String, SimulatorError>;

	/// Advance the run to `checkpoint`, leaving any artifacts under
	/// `workdir/output`. Real engine invocation belongs here; the bundled
	/// engines write placeholder snapshots instead.
	async fn advance(&self, job: &JobInfo, workdir: &Path, checkpoint: f64)
		-> Result<(), std::io::Error>;
}

/// Static dispatch table for the engines this build knows about.
pub fn for_kind(kind: SimulatorKind) -> &'static dyn Simulator {
	match kind {
		SimulatorKind::Gadget4 => &Gadget4,
		SimulatorKind::Concept => &Concept,
	}
}

/// Renders a scalar override value the way it appears in a parameter file.
/// Structured values are rejected rather than serialized blind.
pub(crate) fn render_scalar(key: &str, value: &Value) -> Result<String, SimulatorError> {
	match value {
		Value::Number(n) => Ok(n.to_string()),
		Value::String(s) => Ok(s.clone()),
		other => Err(SimulatorError::NonScalarParameter {
			key: key.to_string(),
			found: json_type_name(other),
		}),
	}
}

fn json_type_name(value: &Value) -> &'static str {
	match value {
		Value::Null => "null",
		Value::Bool(_) => "a boolean",
		Value::Number(_) => "a number",
		Value::String(_) => "a string",
		Value::Array(_) => "an array",
		Value::Object(_) => "an object",
	}
}
