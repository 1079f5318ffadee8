//! Sea-ORM entity definitions
//!
//! These map the job lifecycle records to database tables.

pub mod job;

pub use job::Entity as Job;
