//! Listing candidate filter.
//!
//! Three ordered layers over every (platform, account) pair: hard platform
//! constraints, user strategy rules, then scoring. Each layer returns a new
//! candidate set; excluded candidates stay in the audit trail with a reason.

pub mod constraints;
pub mod rules;
pub mod scoring;

pub use constraints::PlatformConstraints;
pub use rules::{RuleError, RuleKind, StrategyRule};
pub use scoring::{AccountPerformance, CompetitionLevel, ScoreBreakdown, ScoringConfig};

use crate::{
    pricing::SolverConfig,
    rating::Condition,
    zones::{ZoneConfig, ZoneListingTerms, ZoneValidation},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketplaceAccount {
    pub platform: String,
    pub account: String,
    #[serde(default = "default_active")]
    pub active: bool,
    /// Destination zones a listing on this account ships to.
    #[serde(default)]
    pub zones: Vec<ZoneConfig>,
}

fn default_active() -> bool {
    true
}

/// Why a candidate was removed. Serialized with a `code` tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExclusionReason {
    AccountInactive,
    CategoryBlocked { category: String },
    CategoryNotAllowed { category: Option<String> },
    ConditionNotAllowed { condition: Condition },
    BelowPlatformMinPrice { min: f64 },
    AbovePlatformMaxPrice { max: f64 },
    UnprofitableZones { zones: Vec<String> },
    Blacklisted { rule_id: String },
    NotWhitelisted,
    BelowRuleMinPrice { rule_id: String, min: f64 },
    AboveRuleMaxPrice { rule_id: String, max: f64 },
    CategoryPinned { rule_id: String, account: String },
}

impl fmt::Display for ExclusionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExclusionReason::AccountInactive => write!(f, "account is inactive"),
            ExclusionReason::CategoryBlocked { category } => {
                write!(f, "category `{category}` is blocked on this platform")
            }
            ExclusionReason::CategoryNotAllowed { category: Some(category) } => {
                write!(f, "category `{category}` is not allowed on this platform")
            }
            ExclusionReason::CategoryNotAllowed { category: None } => {
                write!(f, "platform requires a listed category")
            }
            ExclusionReason::ConditionNotAllowed { condition } => {
                write!(f, "condition {condition:?} is not allowed on this platform")
            }
            ExclusionReason::BelowPlatformMinPrice { min } => {
                write!(f, "price below platform minimum {min:.2}")
            }
            ExclusionReason::AbovePlatformMaxPrice { max } => {
                write!(f, "price above platform maximum {max:.2}")
            }
            ExclusionReason::UnprofitableZones { zones } => {
                write!(f, "unprofitable zones: {}", zones.join(", "))
            }
            ExclusionReason::Blacklisted { rule_id } => write!(f, "blacklisted by rule {rule_id}"),
            ExclusionReason::NotWhitelisted => write!(f, "not covered by any whitelist rule"),
            ExclusionReason::BelowRuleMinPrice { rule_id, min } => {
                write!(f, "price below {min:.2} required by rule {rule_id}")
            }
            ExclusionReason::AboveRuleMaxPrice { rule_id, max } => {
                write!(f, "price above {max:.2} allowed by rule {rule_id}")
            }
            ExclusionReason::CategoryPinned { rule_id, account } => {
                write!(f, "category pinned to account {account} by rule {rule_id}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingCandidate {
    pub platform: String,
    pub account: String,
    pub is_excluded: bool,
    pub exclusion_reason: Option<ExclusionReason>,
    /// Product of the multipliers of every strategy rule that matched.
    pub rule_multiplier: f64,
    pub strategy_score: Option<f64>,
    pub score_breakdown: Option<ScoreBreakdown>,
    pub zone_validation: Option<ZoneValidation>,
}

impl ListingCandidate {
    pub fn new(platform: &str, account: &str) -> Self {
        Self {
            platform: platform.to_string(),
            account: account.to_string(),
            is_excluded: false,
            exclusion_reason: None,
            rule_multiplier: 1.0,
            strategy_score: None,
            score_breakdown: None,
            zone_validation: None,
        }
    }

    pub fn excluded(mut self, reason: ExclusionReason) -> Self {
        self.is_excluded = true;
        self.exclusion_reason = Some(reason);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionStatus {
    Success,
    NoCandidates,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingDecision {
    pub status: DecisionStatus,
    pub recommended: Option<ListingCandidate>,
    pub candidates: Vec<ListingCandidate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub decided_at: DateTime<Utc>,
}

/// What the filter needs to know about the product being placed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductContext {
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub condition: Condition,
    /// Listing price in destination currency.
    pub price: f64,
    /// Cost terms for the per-account zone check. Without them zones are
    /// not evaluated.
    #[serde(default)]
    pub economics: Option<ZoneListingTerms>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    pub accounts: Vec<MarketplaceAccount>,
    pub platforms: Vec<PlatformConstraints>,
    pub rules: Vec<StrategyRule>,
    pub scoring: ScoringConfig,
}

pub fn decide(
    product: &ProductContext,
    config: &StrategyConfig,
    solver: &SolverConfig,
) -> ListingDecision {
    decide_at(product, config, solver, Utc::now())
}

/// Same as [`decide`] with an explicit decision time, so identical inputs
/// give identical decisions.
pub fn decide_at(
    product: &ProductContext,
    config: &StrategyConfig,
    solver: &SolverConfig,
    now: DateTime<Utc>,
) -> ListingDecision {
    let initial: Vec<ListingCandidate> = config
        .accounts
        .iter()
        .map(|acct| ListingCandidate::new(&acct.platform, &acct.account))
        .collect();

    if !(product.price.is_finite() && product.price >= 0.0) {
        return failed(initial, format!("invalid product price {}", product.price), now);
    }
    if let Err(err) = rules::validate_rules(&config.rules) {
        return failed(initial, err.to_string(), now);
    }

    let constrained = constraints::apply_constraints(&initial, product, config, solver);
    let ruled = rules::apply_rules(&constrained, product, &config.rules);
    let scored = scoring::score_candidates(&ruled, product, &config.scoring);

    let recommended = scored.iter().find(|c| !c.is_excluded).cloned();
    ListingDecision {
        status: if recommended.is_some() {
            DecisionStatus::Success
        } else {
            DecisionStatus::NoCandidates
        },
        recommended,
        candidates: scored,
        error: None,
        decided_at: now,
    }
}

fn failed(candidates: Vec<ListingCandidate>, error: String, now: DateTime<Utc>) -> ListingDecision {
    ListingDecision {
        status: DecisionStatus::Error,
        recommended: None,
        candidates,
        error: Some(error),
        decided_at: now,
    }
}

pub(crate) fn same(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}
