//! Simulation job entity

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "jobs")]
pub struct Model {
	#[sea_orm(primary_key, auto_increment = false)]
	pub id: Uuid,
	pub name: String,
	pub description: Option<String>,
	pub simulator_type: String, // "gadget4", "concept"
	pub status: String, // "pending", "running", "completed", "failed", "cancelled"
	pub progress: f64,
	pub num_particles: i64,
	pub box_size: f64,
	#[sea_orm(column_type = "Json", nullable)]
	pub parameters: Option<Json>,
	pub result_path: Option<String>,
	#[sea_orm(column_type = "Json", nullable)]
	pub output_files: Option<Json>,
	pub execution_handle: Option<String>,
	pub error_message: Option<String>,
	pub error_trace: Option<String>,
	pub created_at: DateTimeUtc,
	pub started_at: Option<DateTimeUtc>,
	pub completed_at: Option<DateTimeUtc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
