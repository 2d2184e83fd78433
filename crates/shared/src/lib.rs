//! Clubboard shared types
//!
//! Package tiers with their static entitlement table, subscription and
//! upgrade-request statuses, and the Postgres pool helpers used by every
//! binary in the workspace.

pub mod db;
pub mod types;

pub use db::{create_pool, run_migrations};
pub use types::{
    Limit, Package, PackageDefinition, ParseTagError, SubscriptionStatus, UpgradeRequestStatus,
};
