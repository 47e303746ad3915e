//! Record types that can be indexed and the audience tiers allowed to see them.

use std::{fmt, str::FromStr};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The kind of domain record an embedding was computed from.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    JsonSchema,
)]
pub enum SourceType {
    Product,
    Sale,
    Category,
    Customer,
    City,
    Neighborhood,
    Unit,
    Payment,
}

impl SourceType {
    pub const ALL: [SourceType; 8] = [
        SourceType::Product,
        SourceType::Sale,
        SourceType::Category,
        SourceType::Customer,
        SourceType::City,
        SourceType::Neighborhood,
        SourceType::Unit,
        SourceType::Payment,
    ];

    /// Source types rebuilt by a reindex, in the order they are stored.
    pub const INDEXED: [SourceType; 4] = [
        SourceType::Product,
        SourceType::Category,
        SourceType::Sale,
        SourceType::Customer,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SourceType::Product => "Product",
            SourceType::Sale => "Sale",
            SourceType::Category => "Category",
            SourceType::Customer => "Customer",
            SourceType::City => "City",
            SourceType::Neighborhood => "Neighborhood",
            SourceType::Unit => "Unit",
            SourceType::Payment => "Payment",
        }
    }

    /// One-byte tag used in the on-disk vector header.
    pub(crate) fn tag(self) -> u8 {
        match self {
            SourceType::Product => 1,
            SourceType::Sale => 2,
            SourceType::Category => 3,
            SourceType::Customer => 4,
            SourceType::City => 5,
            SourceType::Neighborhood => 6,
            SourceType::Unit => 7,
            SourceType::Payment => 8,
        }
    }

    pub(crate) fn from_tag(tag: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.tag() == tag)
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Access level of the caller asking questions.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    JsonSchema,
    clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum AudienceTier {
    #[default]
    Customer,
    Owner,
}

impl AudienceTier {
    /// Source types this tier may retrieve.
    ///
    /// Sales, customers and payments are owner-only.
    pub fn allowed_sources(self) -> &'static [SourceType] {
        match self {
            AudienceTier::Owner => &SourceType::ALL,
            AudienceTier::Customer => &[
                SourceType::Product,
                SourceType::Category,
                SourceType::City,
                SourceType::Neighborhood,
                SourceType::Unit,
            ],
        }
    }

    pub fn allows(self, source: SourceType) -> bool {
        match (self, source) {
            (AudienceTier::Owner, _) => true,
            (
                AudienceTier::Customer,
                SourceType::Product
                | SourceType::Category
                | SourceType::City
                | SourceType::Neighborhood
                | SourceType::Unit,
            ) => true,
            (
                AudienceTier::Customer,
                SourceType::Sale | SourceType::Customer | SourceType::Payment,
            ) => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AudienceTier::Customer => "customer",
            AudienceTier::Owner => "owner",
        }
    }
}

impl fmt::Display for AudienceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AudienceTier {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "customer" => Ok(AudienceTier::Customer),
            "owner" => Ok(AudienceTier::Owner),
            other => Err(crate::error::Error::Config(format!(
                "unknown audience tier '{other}'"
            ))),
        }
    }
}
