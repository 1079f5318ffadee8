//! Initial schema: the jobs table.
//!
//! One row per simulation job, carrying the full lifecycle state. Status and
//! simulator type are stored as lowercase text so guarded updates can filter
//! on them directly.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
	async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
		manager
			.create_table(
				Table::create()
					.table(Jobs::Table)
					.if_not_exists()
					.col(ColumnDef::new(Jobs::Id).uuid().not_null().primary_key())
					.col(ColumnDef::new(Jobs::Name).string().not_null())
					.col(ColumnDef::new(Jobs::Description).string())
					.col(ColumnDef::new(Jobs::SimulatorType).string().not_null())
					.col(ColumnDef::new(Jobs::Status).string().not_null())
					.col(ColumnDef::new(Jobs::Progress).double().not_null())
					.col(ColumnDef::new(Jobs::NumParticles).big_integer().not_null())
					.col(ColumnDef::new(Jobs::BoxSize).double().not_null())
					.col(ColumnDef::new(Jobs::Parameters).json())
					.col(ColumnDef::new(Jobs::ResultPath).string())
					.col(ColumnDef::new(Jobs::OutputFiles).json())
					.col(ColumnDef::new(Jobs::ExecutionHandle).string())
					.col(ColumnDef::new(Jobs::ErrorMessage).string())
					.col(ColumnDef::new(Jobs::ErrorTrace).string())
					.col(
						ColumnDef::new(Jobs::CreatedAt)
							.timestamp_with_time_zone()
							.not_null(),
					)
					.col(ColumnDef::new(Jobs::StartedAt).timestamp_with_time_zone())
					.col(ColumnDef::new(Jobs::CompletedAt).timestamp_with_time_zone())
					.to_owned(),
			)
			.await?;

		// Listing filters on status and simulator type, orders by creation.
		manager
			.create_index(
				Index::create()
					.name("idx_jobs_status")
					.table(Jobs::Table)
					.col(Jobs::Status)
					.to_owned(),
			)
			.await?;

		manager
			.create_index(
				Index::create()
					.name("idx_jobs_simulator_type")
					.table(Jobs::Table)
					.col(Jobs::SimulatorType)
					.to_owned(),
			)
			.await?;

		manager
			.create_index(
				Index::create()
					.name("idx_jobs_created_at")
					.table(Jobs::Table)
					.col(Jobs::CreatedAt)
					.to_owned(),
			)
			.await?;

		Ok(())
	}

	async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
		manager
			.drop_table(Table::drop().table(Jobs::Table).to_owned())
			.await
	}
}

#[derive(DeriveIden)]
enum Jobs {
	Table,
	Id,
	Name,
	Description,
	SimulatorType,
	Status,
	Progress,
	NumParticles,
	BoxSize,
	Parameters,
	ResultPath,
	OutputFiles,
	ExecutionHandle,
	ErrorMessage,
	ErrorTrace,
	CreatedAt,
	StartedAt,
	CompletedAt,
}
