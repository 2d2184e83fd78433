//! Core domain types shared by the engine, the API and the worker

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Error returned when a tag string does not name a known variant
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} '{value}'")]
pub struct ParseTagError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseTagError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

// =============================================================================
// Packages
// =============================================================================

/// Pricing tier of a club.
///
/// Variant order is the upgrade order: `Basic < Plus < Pro < Unlimited`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Package {
    Basic,
    Plus,
    Pro,
    Unlimited,
}

impl Package {
    pub const ALL: [Package; 4] = [
        Package::Basic,
        Package::Plus,
        Package::Pro,
        Package::Unlimited,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Package::Basic => "basic",
            Package::Plus => "plus",
            Package::Pro => "pro",
            Package::Unlimited => "unlimited",
        }
    }

    /// Static limits and price for this package
    pub fn definition(&self) -> PackageDefinition {
        match self {
            Package::Basic => PackageDefinition {
                package: *self,
                label: "Basic",
                advertisement_slots: Limit::Finite(0),
                vacancy_slots: Limit::Finite(3),
                yearly_price_cents: 0,
            },
            Package::Plus => PackageDefinition {
                package: *self,
                label: "Plus",
                advertisement_slots: Limit::Finite(1),
                vacancy_slots: Limit::Finite(10),
                yearly_price_cents: 49_000,
            },
            Package::Pro => PackageDefinition {
                package: *self,
                label: "Pro",
                advertisement_slots: Limit::Finite(3),
                vacancy_slots: Limit::Finite(25),
                yearly_price_cents: 99_000,
            },
            Package::Unlimited => PackageDefinition {
                package: *self,
                label: "Unlimited",
                advertisement_slots: Limit::Unlimited,
                vacancy_slots: Limit::Unlimited,
                yearly_price_cents: 199_000,
            },
        }
    }
}

impl fmt::Display for Package {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Package {
    type Err = ParseTagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "basic" => Ok(Package::Basic),
            "plus" => Ok(Package::Plus),
            "pro" => Ok(Package::Pro),
            "unlimited" => Ok(Package::Unlimited),
            _ => Err(ParseTagError::new("package", s)),
        }
    }
}

/// A resource limit. `Unlimited` is the sentinel that always allows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Limit {
    Finite(u32),
    Unlimited,
}

impl Limit {
    /// Whether one more unit may be consumed when `current_usage` are in use
    pub fn allows(&self, current_usage: u64) -> bool {
        match self {
            Limit::Finite(max) => current_usage < u64::from(*max),
            Limit::Unlimited => true,
        }
    }

    pub fn as_option(&self) -> Option<u32> {
        match self {
            Limit::Finite(max) => Some(*max),
            Limit::Unlimited => None,
        }
    }
}

/// Static package configuration (not persisted per club)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PackageDefinition {
    pub package: Package,
    pub label: &'static str,
    pub advertisement_slots: Limit,
    pub vacancy_slots: Limit,
    pub yearly_price_cents: i64,
}

// =============================================================================
// Statuses
// =============================================================================

/// Commercial state of a club
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Trial,
    PendingUpgrade,
    AwaitingPayment,
    Active,
    Cancelled,
    Expired,
    Blocked,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Trial => "trial",
            SubscriptionStatus::PendingUpgrade => "pending_upgrade",
            SubscriptionStatus::AwaitingPayment => "awaiting_payment",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Cancelled => "cancelled",
            SubscriptionStatus::Expired => "expired",
            SubscriptionStatus::Blocked => "blocked",
        }
    }

    /// Blocked and expired clubs cannot act on their own; only an admin can recover them
    pub fn is_locked_for_self_service(&self) -> bool {
        matches!(
            self,
            SubscriptionStatus::Blocked | SubscriptionStatus::Expired
        )
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionStatus {
    type Err = ParseTagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "trial" => Ok(SubscriptionStatus::Trial),
            "pending_upgrade" => Ok(SubscriptionStatus::PendingUpgrade),
            "awaiting_payment" => Ok(SubscriptionStatus::AwaitingPayment),
            "active" => Ok(SubscriptionStatus::Active),
            "cancelled" => Ok(SubscriptionStatus::Cancelled),
            "expired" => Ok(SubscriptionStatus::Expired),
            "blocked" => Ok(SubscriptionStatus::Blocked),
            _ => Err(ParseTagError::new("subscription status", s)),
        }
    }
}

/// Review state of an upgrade request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpgradeRequestStatus {
    Pending,
    Approved,
    Rejected,
    Completed,
}

impl UpgradeRequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpgradeRequestStatus::Pending => "pending",
            UpgradeRequestStatus::Approved => "approved",
            UpgradeRequestStatus::Rejected => "rejected",
            UpgradeRequestStatus::Completed => "completed",
        }
    }

    /// Rejected and completed requests never change again
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            UpgradeRequestStatus::Rejected | UpgradeRequestStatus::Completed
        )
    }
}

impl fmt::Display for UpgradeRequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UpgradeRequestStatus {
    type Err = ParseTagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(UpgradeRequestStatus::Pending),
            "approved" => Ok(UpgradeRequestStatus::Approved),
            "rejected" => Ok(UpgradeRequestStatus::Rejected),
            "completed" => Ok(UpgradeRequestStatus::Completed),
            _ => Err(ParseTagError::new("upgrade request status", s)),
        }
    }
}
