//! Config schema migration

use anyhow::Result;

/// Versioned on-disk config. Files written by older builds walk the
/// migration chain one version at a time until they reach the target.
pub trait Migrate {
	fn current_version(&self) -> u32;

	fn target_version() -> u32;

	/// Advance `self` toward the target version. Implementations recurse
	/// until `current_version` reaches `target_version`.
	fn migrate(&mut self) -> Result<()>;
}
