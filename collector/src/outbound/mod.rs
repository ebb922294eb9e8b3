//! Outbound adapters implementing domain ports for external infrastructure.
//!
//! This module follows the hexagonal architecture pattern, providing concrete
//! implementations of domain port traits:
//!
//! - **minka**: reqwest-backed observation API source and OAuth token request
//! - **cache**: filesystem response cache (or a disabled cache)
//! - **taxonomy**: taxon-tree marine reference with a local mirror
//! - **persistence**: CSV dataset repository
//!
//! Adapters are thin translators that convert between domain types and
//! infrastructure-specific representations. They contain no business logic.

pub mod cache;
pub mod minka;
pub mod persistence;
pub mod taxonomy;
