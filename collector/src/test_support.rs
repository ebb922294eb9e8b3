//! Test utilities for the collector crate.
//!
//! This module provides shared doubles for both unit tests (in `src/`) and
//! integration tests (in `tests/`). It is only compiled for tests or with the
//! `test-support` feature.

pub mod api;
pub mod clock;
pub mod observations;
pub mod stores;
pub mod workspace;
