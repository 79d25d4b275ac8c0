use super::{ExclusionReason, ListingCandidate, ProductContext, StrategyConfig, same};
use crate::{pricing::SolverConfig, rating::Condition, zones::validate_zones};
use serde::{Deserialize, Serialize};

/// Hard eligibility rules of one platform. Empty allow-lists allow all.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConstraints {
    pub platform: String,
    pub allowed_categories: Vec<String>,
    pub blocked_categories: Vec<String>,
    pub allowed_conditions: Vec<Condition>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
}

impl PlatformConstraints {
    fn violation(&self, product: &ProductContext) -> Option<ExclusionReason> {
        if let Some(category) = &product.category
            && self.blocked_categories.iter().any(|c| same(c, category))
        {
            return Some(ExclusionReason::CategoryBlocked {
                category: category.clone(),
            });
        }
        if !self.allowed_categories.is_empty() {
            let allowed = product
                .category
                .as_deref()
                .is_some_and(|category| self.allowed_categories.iter().any(|c| same(c, category)));
            if !allowed {
                return Some(ExclusionReason::CategoryNotAllowed {
                    category: product.category.clone(),
                });
            }
        }
        if !self.allowed_conditions.is_empty()
            && !self.allowed_conditions.contains(&product.condition)
        {
            return Some(ExclusionReason::ConditionNotAllowed {
                condition: product.condition,
            });
        }
        if let Some(min) = self.min_price.filter(|min| product.price < *min) {
            return Some(ExclusionReason::BelowPlatformMinPrice { min });
        }
        if let Some(max) = self.max_price.filter(|max| product.price > *max) {
            return Some(ExclusionReason::AbovePlatformMaxPrice { max });
        }
        None
    }
}

/// Layer 1. Inactive accounts, platform constraint violations and losing
/// destination zones exclude a candidate.
pub fn apply_constraints(
    candidates: &[ListingCandidate],
    product: &ProductContext,
    config: &StrategyConfig,
    solver: &SolverConfig,
) -> Vec<ListingCandidate> {
    candidates
        .iter()
        .map(|candidate| {
            let mut next = candidate.clone();
            if next.is_excluded {
                return next;
            }

            let account = config
                .accounts
                .iter()
                .find(|a| same(&a.platform, &next.platform) && same(&a.account, &next.account));
            if account.is_some_and(|a| !a.active) {
                return next.excluded(ExclusionReason::AccountInactive);
            }

            let violation = config
                .platforms
                .iter()
                .filter(|p| same(&p.platform, &next.platform))
                .find_map(|p| p.violation(product));
            if let Some(reason) = violation {
                return next.excluded(reason);
            }

            if let (Some(account), Some(terms)) = (account, product.economics.as_ref())
                && !account.zones.is_empty()
            {
                let validation = validate_zones(terms, &account.zones, solver);
                let losing = validation.unprofitable_zones.clone();
                next.zone_validation = Some(validation);
                if !losing.is_empty() {
                    return next.excluded(ExclusionReason::UnprofitableZones { zones: losing });
                }
            }
            next
        })
        .collect()
}
