//! Routing targets
//!
//! `AgentKind` is the closed set of downstream handlers a query can be routed
//! to. Every place that branches on the target matches on this enum, so adding
//! a handler is a compile-time checked change.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Downstream handler a query is routed to
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    /// Everyday questions and explicit commands (ping, key echo)
    General,
    /// Find one specific product
    SpecificItem,
    /// Attributes of a product (size, material, resolution, ...)
    ItemFeature,
    /// Sellers, shops, availability and price across stores
    SellerInfo,
    /// Multi-turn guided search when the user does not know the product yet
    Exploration,
    /// Compare two or more products
    Comparison,
    /// Out-of-domain requests
    Other,
}

impl AgentKind {
    /// All kinds, in tie-break priority order (most specific first)
    pub const PRIORITY: [AgentKind; 7] = [
        AgentKind::Comparison,
        AgentKind::SpecificItem,
        AgentKind::ItemFeature,
        AgentKind::SellerInfo,
        AgentKind::Exploration,
        AgentKind::General,
        AgentKind::Other,
    ];

    /// Canonical snake_case label
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::General => "general",
            AgentKind::SpecificItem => "specific_item",
            AgentKind::ItemFeature => "item_feature",
            AgentKind::SellerInfo => "seller_info",
            AgentKind::Exploration => "exploration",
            AgentKind::Comparison => "comparison",
            AgentKind::Other => "other",
        }
    }

    /// Position in the tie-break order; lower wins
    pub fn priority(&self) -> usize {
        Self::PRIORITY
            .iter()
            .position(|kind| kind == self)
            .unwrap_or(Self::PRIORITY.len())
    }

    /// Parse a label produced by an extractor or written in a config file.
    ///
    /// Accepts the canonical names plus the legacy scenario and intent labels
    /// (`specific_product`, `find_product`, `feature_product`, `shop`,
    /// `explore`, `compare`, ...) and is case-insensitive.
    pub fn from_label(label: &str) -> Option<Self> {
        let normalized = label.trim().to_lowercase().replace(['-', ' '], "_");
        let kind = match normalized.as_str() {
            "general" | "general_inquiry" => AgentKind::General,
            "specific_item" | "specific_product" | "find_product" => AgentKind::SpecificItem,
            "item_feature" | "feature_product" | "product_feature" | "feature" => {
                AgentKind::ItemFeature
            }
            "seller_info" | "shop" | "seller" => AgentKind::SellerInfo,
            "exploration" | "explore" => AgentKind::Exploration,
            "comparison" | "compare" => AgentKind::Comparison,
            "other" => AgentKind::Other,
            _ => return None,
        };
        Some(kind)
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AgentKind::from_label(s).ok_or_else(|| format!("Unknown agent kind: '{s}'"))
    }
}
