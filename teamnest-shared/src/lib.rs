//! # TeamNest Shared Library
//!
//! Team membership and hierarchy engine for courses and assignments.
//!
//! ## Module Organization
//!
//! - `models`: users, owners, participant links, teams and memberships
//! - `store`: datastore traits with in-memory and PostgreSQL backends
//! - `graph`: node mirror of the team hierarchy
//! - `membership`: add/remove members under eligibility and capacity rules
//! - `hierarchy`: team creation, lookup, rename and deletion
//! - `transfer`: roster import and lazy export
//! - `copy`: copy a team and its members under another owner
//! - `db`: connection pool and embedded migrations
//! - `error`: error types

pub mod copy;
pub mod db;
pub mod error;
pub mod graph;
pub mod hierarchy;
pub mod membership;
pub mod models;
pub mod store;
pub mod transfer;

pub use error::{MembershipError, MembershipResult};

/// Current version of the TeamNest shared library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
