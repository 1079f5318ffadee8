//! Infrastructure layer - database access and schema management

pub mod db;
