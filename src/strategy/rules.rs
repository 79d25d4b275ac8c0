use super::{ExclusionReason, ListingCandidate, ProductContext, same};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleKind {
    Whitelist,
    Blacklist,
    PriceMin {
        min_price: f64,
    },
    PriceMax {
        max_price: f64,
    },
    /// Products in the rule's `category` may only go to its `account`
    /// (on its `platform`, when set).
    CategoryAccountSpecific,
}

/// A user strategy rule. `platform`, `account` and `category` narrow the
/// candidates and products the rule applies to; unset means any. A category
/// pin reads them as the pin target instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyRule {
    pub id: String,
    #[serde(flatten)]
    pub kind: RuleKind,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub account: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_multiplier() -> f64 {
    1.0
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Error, PartialEq)]
pub enum RuleError {
    #[error("rule with empty id")]
    MissingId,
    #[error("duplicate rule id `{0}`")]
    DuplicateId(String),
    #[error("rule `{id}`: {message}")]
    Malformed { id: String, message: String },
}

impl StrategyRule {
    fn validate(&self) -> Result<(), RuleError> {
        let malformed = |message: &str| RuleError::Malformed {
            id: self.id.clone(),
            message: message.to_string(),
        };
        if !(self.multiplier.is_finite() && self.multiplier >= 0.0) {
            return Err(malformed("multiplier must be finite and non-negative"));
        }
        match &self.kind {
            RuleKind::PriceMin { min_price: bound } | RuleKind::PriceMax { max_price: bound }
                if !(bound.is_finite() && *bound >= 0.0) =>
            {
                Err(malformed("price bound must be finite and non-negative"))
            }
            RuleKind::CategoryAccountSpecific
                if is_blank(&self.category) || is_blank(&self.account) =>
            {
                Err(malformed("category pin needs both category and account"))
            }
            _ => Ok(()),
        }
    }

    /// Scope check against the candidate and the product.
    fn applies(&self, candidate: &ListingCandidate, product: &ProductContext) -> bool {
        self.enabled
            && self.platform.as_deref().is_none_or(|p| same(p, &candidate.platform))
            && self.account.as_deref().is_none_or(|a| same(a, &candidate.account))
            && self.category_matches(product)
    }

    fn category_matches(&self, product: &ProductContext) -> bool {
        match (&self.category, &product.category) {
            (None, _) => true,
            (Some(rule), Some(category)) => same(rule, category),
            (Some(_), None) => false,
        }
    }
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().is_none_or(|v| v.trim().is_empty())
}

pub fn validate_rules(rules: &[StrategyRule]) -> Result<(), RuleError> {
    let mut seen = HashSet::new();
    for rule in rules {
        if rule.id.trim().is_empty() {
            return Err(RuleError::MissingId);
        }
        if !seen.insert(rule.id.as_str()) {
            return Err(RuleError::DuplicateId(rule.id.clone()));
        }
        rule.validate()?;
    }
    Ok(())
}

/// Layer 2. Rules run in configured order and the first exclusion wins.
/// Rules that match without excluding multiply into `rule_multiplier`.
/// When a whitelist covers the product, candidates it does not name are
/// excluded.
pub fn apply_rules(
    candidates: &[ListingCandidate],
    product: &ProductContext,
    rules: &[StrategyRule],
) -> Vec<ListingCandidate> {
    let whitelists: Vec<&StrategyRule> = rules
        .iter()
        .filter(|r| r.enabled && r.kind == RuleKind::Whitelist && r.category_matches(product))
        .collect();

    candidates
        .iter()
        .map(|candidate| {
            let mut next = candidate.clone();
            if next.is_excluded {
                return next;
            }

            let mut whitelisted = false;
            for rule in rules.iter().filter(|r| r.enabled) {
                match outcome(rule, &next, product) {
                    Outcome::Exclude(reason) => return next.excluded(reason),
                    Outcome::Boost => {
                        if rule.kind == RuleKind::Whitelist {
                            whitelisted = true;
                        }
                        next.rule_multiplier *= rule.multiplier;
                    }
                    Outcome::Skip => {}
                }
            }

            if !whitelists.is_empty() && !whitelisted {
                return next.excluded(ExclusionReason::NotWhitelisted);
            }
            next
        })
        .collect()
}

enum Outcome {
    Exclude(ExclusionReason),
    Boost,
    Skip,
}

fn outcome(rule: &StrategyRule, candidate: &ListingCandidate, product: &ProductContext) -> Outcome {
    if rule.kind == RuleKind::CategoryAccountSpecific {
        let (Some(category), Some(account)) = (rule.category.as_deref(), rule.account.as_deref())
        else {
            return Outcome::Skip;
        };
        if !product.category.as_deref().is_some_and(|c| same(c, category)) {
            return Outcome::Skip;
        }
        let on_pinned = same(account, &candidate.account)
            && rule.platform.as_deref().is_none_or(|p| same(p, &candidate.platform));
        return if on_pinned {
            Outcome::Boost
        } else {
            Outcome::Exclude(ExclusionReason::CategoryPinned {
                rule_id: rule.id.clone(),
                account: account.to_string(),
            })
        };
    }

    if !rule.applies(candidate, product) {
        return Outcome::Skip;
    }
    match &rule.kind {
        RuleKind::Whitelist => Outcome::Boost,
        RuleKind::Blacklist => Outcome::Exclude(ExclusionReason::Blacklisted {
            rule_id: rule.id.clone(),
        }),
        RuleKind::PriceMin { min_price } if product.price < *min_price => {
            Outcome::Exclude(ExclusionReason::BelowRuleMinPrice {
                rule_id: rule.id.clone(),
                min: *min_price,
            })
        }
        RuleKind::PriceMax { max_price } if product.price > *max_price => {
            Outcome::Exclude(ExclusionReason::AboveRuleMaxPrice {
                rule_id: rule.id.clone(),
                max: *max_price,
            })
        }
        RuleKind::PriceMin { .. } | RuleKind::PriceMax { .. } => Outcome::Boost,
        RuleKind::CategoryAccountSpecific => Outcome::Skip,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rating::Condition;

    fn rule(id: &str, kind: RuleKind) -> StrategyRule {
        StrategyRule {
            id: id.into(),
            kind,
            platform: None,
            account: None,
            category: None,
            multiplier: 1.0,
            enabled: true,
        }
    }

    fn product(category: &str, price: f64) -> ProductContext {
        ProductContext {
            sku: None,
            category: Some(category.into()),
            condition: Condition::New,
            price,
            economics: None,
        }
    }

    fn candidates() -> Vec<ListingCandidate> {
        vec![
            ListingCandidate::new("ebay", "main"),
            ListingCandidate::new("ebay", "outlet"),
            ListingCandidate::new("amazon", "jp"),
        ]
    }

    fn reasons(out: &[ListingCandidate]) -> Vec<Option<ExclusionReason>> {
        out.iter().map(|c| c.exclusion_reason.clone()).collect()
    }

    #[test]
    fn whitelist_excludes_unnamed_candidates() {
        let mut allow = rule("w1", RuleKind::Whitelist);
        allow.platform = Some("ebay".into());
        allow.multiplier = 1.2;
        let out = apply_rules(&candidates(), &product("toys", 50.0), &[allow]);
        assert!(!out[0].is_excluded && !out[1].is_excluded);
        assert_eq!(out[0].rule_multiplier, 1.2);
        assert_eq!(out[2].exclusion_reason, Some(ExclusionReason::NotWhitelisted));
    }

    #[test]
    fn whitelist_for_other_category_is_irrelevant() {
        let mut allow = rule("w1", RuleKind::Whitelist);
        allow.platform = Some("ebay".into());
        allow.category = Some("cameras".into());
        let out = apply_rules(&candidates(), &product("toys", 50.0), &[allow]);
        assert!(out.iter().all(|c| !c.is_excluded));
    }

    #[test]
    fn first_exclusion_wins() {
        let mut block = rule("b1", RuleKind::Blacklist);
        block.account = Some("outlet".into());
        let floor = rule("p1", RuleKind::PriceMin { min_price: 100.0 });
        let out = apply_rules(&candidates(), &product("toys", 50.0), &[block, floor]);
        assert_eq!(
            reasons(&out),
            vec![
                Some(ExclusionReason::BelowRuleMinPrice {
                    rule_id: "p1".into(),
                    min: 100.0
                }),
                Some(ExclusionReason::Blacklisted {
                    rule_id: "b1".into()
                }),
                Some(ExclusionReason::BelowRuleMinPrice {
                    rule_id: "p1".into(),
                    min: 100.0
                }),
            ]
        );
    }

    #[test]
    fn price_max_and_multipliers_compound() {
        let mut cap = rule("p-max", RuleKind::PriceMax { max_price: 80.0 });
        cap.multiplier = 1.5;
        let mut floor = rule("p-min", RuleKind::PriceMin { min_price: 10.0 });
        floor.multiplier = 2.0;
        let ok = apply_rules(&candidates(), &product("toys", 50.0), &[cap.clone(), floor]);
        assert!(ok.iter().all(|c| c.rule_multiplier == 3.0));

        let over = apply_rules(&candidates(), &product("toys", 90.0), &[cap]);
        assert!(over.iter().all(|c| c.is_excluded));
    }

    #[test]
    fn category_pin_keeps_only_pinned_account() {
        let mut pin = rule("pin", RuleKind::CategoryAccountSpecific);
        pin.category = Some("cards".into());
        pin.account = Some("outlet".into());
        pin.platform = Some("ebay".into());
        let out = apply_rules(&candidates(), &product("Cards", 50.0), std::slice::from_ref(&pin));
        assert!(out[0].is_excluded);
        assert!(!out[1].is_excluded);
        assert!(matches!(
            out[2].exclusion_reason,
            Some(ExclusionReason::CategoryPinned { .. })
        ));

        let other = apply_rules(&candidates(), &product("toys", 50.0), &[pin]);
        assert!(other.iter().all(|c| !c.is_excluded));
    }

    #[test]
    fn disabled_rules_are_ignored() {
        let mut block = rule("b1", RuleKind::Blacklist);
        block.enabled = false;
        let out = apply_rules(&candidates(), &product("toys", 50.0), &[block]);
        assert!(out.iter().all(|c| !c.is_excluded));
    }

    #[test]
    fn already_excluded_candidates_pass_through() {
        let mut input = candidates();
        input[0] = input[0].clone().excluded(ExclusionReason::AccountInactive);
        let out = apply_rules(&input, &product("toys", 50.0), &[rule("b", RuleKind::Blacklist)]);
        assert_eq!(out[0].exclusion_reason, Some(ExclusionReason::AccountInactive));
    }

    #[test]
    fn validation_catches_malformed_rules() {
        assert_eq!(validate_rules(&[rule(" ", RuleKind::Whitelist)]), Err(RuleError::MissingId));
        assert_eq!(
            validate_rules(&[rule("a", RuleKind::Whitelist), rule("a", RuleKind::Blacklist)]),
            Err(RuleError::DuplicateId("a".into()))
        );
        let bad = rule("neg", RuleKind::PriceMin { min_price: -1.0 });
        assert!(matches!(validate_rules(&[bad]), Err(RuleError::Malformed { .. })));
        let mut pin = rule("pin", RuleKind::CategoryAccountSpecific);
        pin.category = Some(" ".into());
        pin.account = Some("x".into());
        assert!(validate_rules(&[pin]).is_err());
    }

    #[test]
    fn rules_deserialize_flat() {
        let yaml = r#"
- id: r1
  type: PRICE_MIN
  min_price: 25
  platform: ebay
  multiplier: 1.1
- id: r2
  type: CATEGORY_ACCOUNT_SPECIFIC
  category: cards
  account: outlet
- id: r3
  type: BLACKLIST
  account: old
  enabled: false
"#;
        let rules: Vec<StrategyRule> = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(rules[0].kind, RuleKind::PriceMin { min_price: 25.0 });
        assert_eq!(rules[0].platform.as_deref(), Some("ebay"));
        assert_eq!(rules[0].multiplier, 1.1);
        assert_eq!(rules[1].kind, RuleKind::CategoryAccountSpecific);
        assert_eq!(rules[1].account.as_deref(), Some("outlet"));
        assert_eq!(rules[1].multiplier, 1.0);
        assert!(!rules[2].enabled);
    }
}
