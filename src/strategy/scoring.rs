use super::{ListingCandidate, ProductContext, same};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompetitionLevel {
    Low,
    #[default]
    Medium,
    High,
}

impl CompetitionLevel {
    pub fn multiplier(self) -> f64 {
        match self {
            CompetitionLevel::Low => 1.2,
            CompetitionLevel::Medium => 1.0,
            CompetitionLevel::High => 0.8,
        }
    }
}

/// Historical sell-through of one account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountPerformance {
    pub platform: String,
    pub account: String,
    pub sell_through_rate: f64,
    pub listings: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompetitionEntry {
    pub platform: String,
    #[serde(default)]
    pub category: Option<String>,
    pub level: CompetitionLevel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryFit {
    pub platform: String,
    pub category: String,
    pub multiplier: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub base_score: f64,
    /// Listings needed before sell-through is trusted.
    pub min_sample: u32,
    pub performance: Vec<AccountPerformance>,
    pub competition: Vec<CompetitionEntry>,
    pub category_fit: Vec<CategoryFit>,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            base_score: 100.0,
            min_sample: 10,
            performance: Vec::new(),
            competition: Vec::new(),
            category_fit: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub performance: f64,
    pub competition: f64,
    pub category_fit: f64,
    pub rule: f64,
    pub total: f64,
}

impl ScoringConfig {
    fn performance_multiplier(&self, candidate: &ListingCandidate) -> f64 {
        self.performance
            .iter()
            .find(|p| same(&p.platform, &candidate.platform) && same(&p.account, &candidate.account))
            .filter(|p| p.listings >= self.min_sample && p.sell_through_rate.is_finite())
            .map(|p| (0.5 + p.sell_through_rate).clamp(0.5, 1.5))
            .unwrap_or(1.0)
    }

    // A category-specific entry beats a platform-wide one.
    fn competition_multiplier(&self, candidate: &ListingCandidate, product: &ProductContext) -> f64 {
        let for_platform = || {
            self.competition
                .iter()
                .filter(|c| same(&c.platform, &candidate.platform))
        };
        let specific = for_platform().find(|c| {
            matches!((&c.category, &product.category), (Some(a), Some(b)) if same(a, b))
        });
        let general = || for_platform().find(|c| c.category.is_none());
        specific
            .or_else(general)
            .map(|c| c.level)
            .unwrap_or_default()
            .multiplier()
    }

    fn category_fit_multiplier(&self, candidate: &ListingCandidate, product: &ProductContext) -> f64 {
        let Some(category) = product.category.as_deref() else {
            return 1.0;
        };
        self.category_fit
            .iter()
            .find(|f| same(&f.platform, &candidate.platform) && same(&f.category, category))
            .map(|f| f.multiplier)
            .filter(|m| m.is_finite() && *m >= 0.0)
            .unwrap_or(1.0)
    }
}

/// Layer 3. Scores surviving candidates and orders them best first, ties
/// broken by platform then account. Excluded candidates follow unscored in
/// their incoming order.
pub fn score_candidates(
    candidates: &[ListingCandidate],
    product: &ProductContext,
    config: &ScoringConfig,
) -> Vec<ListingCandidate> {
    let (mut survivors, excluded): (Vec<ListingCandidate>, Vec<ListingCandidate>) =
        candidates.iter().cloned().partition(|c| !c.is_excluded);

    for candidate in &mut survivors {
        let performance = config.performance_multiplier(candidate);
        let competition = config.competition_multiplier(candidate, product);
        let category_fit = config.category_fit_multiplier(candidate, product);
        let rule = candidate.rule_multiplier;
        let total = config.base_score * performance * competition * category_fit * rule;
        candidate.strategy_score = Some(total);
        candidate.score_breakdown = Some(ScoreBreakdown {
            performance,
            competition,
            category_fit,
            rule,
            total,
        });
    }

    survivors.sort_by(|a, b| {
        let (sa, sb) = (a.strategy_score.unwrap_or(0.0), b.strategy_score.unwrap_or(0.0));
        sb.partial_cmp(&sa)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.platform.cmp(&b.platform))
            .then_with(|| a.account.cmp(&b.account))
    });
    survivors.extend(excluded);
    survivors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{rating::Condition, strategy::ExclusionReason};

    fn product(category: Option<&str>) -> ProductContext {
        ProductContext {
            sku: None,
            category: category.map(str::to_string),
            condition: Condition::New,
            price: 100.0,
            economics: None,
        }
    }

    fn perf(platform: &str, account: &str, rate: f64, listings: u32) -> AccountPerformance {
        AccountPerformance {
            platform: platform.into(),
            account: account.into(),
            sell_through_rate: rate,
            listings,
        }
    }

    #[test]
    fn factors_multiply() {
        let config = ScoringConfig {
            performance: vec![perf("ebay", "main", 0.3, 50)],
            competition: vec![CompetitionEntry {
                platform: "ebay".into(),
                category: None,
                level: CompetitionLevel::High,
            }],
            category_fit: vec![CategoryFit {
                platform: "ebay".into(),
                category: "toys".into(),
                multiplier: 1.25,
            }],
            ..ScoringConfig::default()
        };
        let mut candidate = ListingCandidate::new("ebay", "main");
        candidate.rule_multiplier = 1.1;
        let scored = score_candidates(&[candidate], &product(Some("toys")), &config);
        let breakdown = scored[0].score_breakdown.unwrap();
        assert!((breakdown.performance - 0.8).abs() < 1e-12);
        assert_eq!(breakdown.competition, 0.8);
        assert_eq!(breakdown.category_fit, 1.25);
        assert!((breakdown.total - 100.0 * 0.8 * 0.8 * 1.25 * 1.1).abs() < 1e-9);
    }

    #[test]
    fn small_samples_are_neutral_and_rates_clamped() {
        let config = ScoringConfig {
            performance: vec![perf("ebay", "new", 0.9, 3), perf("ebay", "star", 2.0, 100)],
            ..ScoringConfig::default()
        };
        let scored = score_candidates(
            &[ListingCandidate::new("ebay", "new"), ListingCandidate::new("ebay", "star")],
            &product(None),
            &config,
        );
        assert_eq!(scored[0].account, "star");
        assert_eq!(scored[0].strategy_score, Some(150.0));
        assert_eq!(scored[1].strategy_score, Some(100.0));
    }

    #[test]
    fn category_competition_overrides_platform_default() {
        let config = ScoringConfig {
            competition: vec![
                CompetitionEntry {
                    platform: "ebay".into(),
                    category: None,
                    level: CompetitionLevel::High,
                },
                CompetitionEntry {
                    platform: "ebay".into(),
                    category: Some("cards".into()),
                    level: CompetitionLevel::Low,
                },
            ],
            ..ScoringConfig::default()
        };
        let scored = score_candidates(&[ListingCandidate::new("ebay", "a")], &product(Some("cards")), &config);
        assert_eq!(scored[0].strategy_score, Some(120.0));
        let other = score_candidates(&[ListingCandidate::new("ebay", "a")], &product(Some("toys")), &config);
        assert_eq!(other[0].strategy_score, Some(80.0));
    }

    #[test]
    fn ties_break_by_platform_then_account_and_excluded_trail() {
        let input = vec![
            ListingCandidate::new("shopee", "b"),
            ListingCandidate::new("ebay", "z").excluded(ExclusionReason::AccountInactive),
            ListingCandidate::new("ebay", "b"),
            ListingCandidate::new("ebay", "a"),
        ];
        let scored = score_candidates(&input, &product(None), &ScoringConfig::default());
        let order: Vec<(&str, &str)> = scored
            .iter()
            .map(|c| (c.platform.as_str(), c.account.as_str()))
            .collect();
        assert_eq!(order, vec![("ebay", "a"), ("ebay", "b"), ("shopee", "b"), ("ebay", "z")]);
        assert!(scored[3].strategy_score.is_none());
    }
}
