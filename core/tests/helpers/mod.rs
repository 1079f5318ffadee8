//! Shared helpers for the job engine integration tests.

// Each test binary compiles its own copy of this module and none of them
// uses every helper.
#![allow(dead_code)]

pub mod jobs;

pub use jobs::*;
