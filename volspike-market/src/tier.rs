//! Subscription tiers and their market-table visibility limits.

use serde::{Deserialize, Serialize};

/// Subscription tier of the active user session.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    #[default]
    Free,
    Pro,
    Elite,
}

impl Tier {
    /// Maximum number of non-watchlist rows visible to the tier.
    ///
    /// `None` means unbounded. The cap never applies to watchlist symbols.
    pub fn visible_limit(&self) -> Option<usize> {
        match self {
            Tier::Free => Some(50),
            Tier::Pro => Some(100),
            Tier::Elite => None,
        }
    }

    /// Parse a tier name as delivered by the session layer.
    ///
    /// Unknown names fall back to the most restrictive tier.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "pro" => Tier::Pro,
            "elite" => Tier::Elite,
            _ => Tier::Free,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Pro => "pro",
            Tier::Elite => "elite",
        }
    }
}
