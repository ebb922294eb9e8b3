//! Biodiversity campaign dataset collector.
//!
//! Pulls observation data for citizen-science campaigns from a rate-limited
//! observation API and republishes it as CSV tables.

pub mod campaign_registry;
pub mod domain;
pub mod outbound;
pub mod settings;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
