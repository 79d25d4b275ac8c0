use crate::pricing::PricingResult;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Condition {
    #[default]
    New,
    Used,
    Refurbished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Rank {
    S,
    A,
    B,
    C,
    D,
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Rank::S => "S",
            Rank::A => "A",
            Rank::B => "B",
            Rank::C => "C",
            Rank::D => "D",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConditionThresholds {
    pub s_margin: f64,
    pub a_margin: f64,
    pub standard_margin: f64,
    /// Origin-currency profit (refund included) below which the item is D.
    pub min_profit: f64,
}

/// Per-condition thresholds plus the used-goods C-rank cut-offs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RatingThresholds {
    pub new: ConditionThresholds,
    pub used: ConditionThresholds,
    pub refurbished: ConditionThresholds,
    pub used_low_margin: f64,
    pub used_low_profit_floor: f64,
}

impl Default for RatingThresholds {
    fn default() -> Self {
        Self {
            new: ConditionThresholds {
                s_margin: 0.25,
                a_margin: 0.20,
                standard_margin: 0.15,
                min_profit: 1_000.0,
            },
            used: ConditionThresholds {
                s_margin: 0.35,
                a_margin: 0.28,
                standard_margin: 0.22,
                min_profit: 1_500.0,
            },
            refurbished: ConditionThresholds {
                s_margin: 0.30,
                a_margin: 0.25,
                standard_margin: 0.18,
                min_profit: 1_200.0,
            },
            used_low_margin: 0.20,
            used_low_profit_floor: 3_000.0,
        }
    }
}

impl RatingThresholds {
    pub fn for_condition(&self, condition: Condition) -> &ConditionThresholds {
        match condition {
            Condition::New => &self.new,
            Condition::Used => &self.used,
            Condition::Refurbished => &self.refurbished,
        }
    }
}

/// Profit figures in origin currency, margins as fractions of revenue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingInput {
    pub condition: Condition,
    pub profit_no_refund: f64,
    pub margin_no_refund: f64,
    pub profit_with_refund: f64,
    pub margin_with_refund: f64,
    pub cost: f64,
}

impl RatingInput {
    pub fn from_pricing(condition: Condition, result: &PricingResult) -> Self {
        Self {
            condition,
            profit_no_refund: result.profit_origin,
            margin_no_refund: result.profit_rate,
            profit_with_refund: result.profit_with_refund_origin,
            margin_with_refund: result.margin_with_refund,
            cost: result.input.item_cost,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingResult {
    pub rank: Rank,
    pub score: u8,
    pub reason: String,
    pub warnings: Vec<String>,
    pub recommendations: Vec<String>,
}

struct Ctx<'a> {
    input: &'a RatingInput,
    limits: &'a ConditionThresholds,
    config: &'a RatingThresholds,
}

struct RatingRule {
    rank: Rank,
    score: u8,
    shortfall: bool,
    matches: fn(&Ctx<'_>) -> bool,
    reason: fn(&Ctx<'_>) -> String,
}

// Evaluated top to bottom; the first match wins.
static RULES: [RatingRule; 7] = [
    RatingRule {
        rank: Rank::S,
        score: 100,
        shortfall: false,
        matches: |c| c.input.margin_no_refund >= c.limits.s_margin,
        reason: |c| format!("margin {} reaches S threshold {}", pct(c.input.margin_no_refund), pct(c.limits.s_margin)),
    },
    RatingRule {
        rank: Rank::A,
        score: 80,
        shortfall: false,
        matches: |c| c.input.margin_no_refund >= c.limits.a_margin,
        reason: |c| format!("margin {} reaches A threshold {}", pct(c.input.margin_no_refund), pct(c.limits.a_margin)),
    },
    RatingRule {
        rank: Rank::B,
        score: 60,
        shortfall: false,
        matches: |c| c.input.margin_no_refund >= c.limits.standard_margin,
        reason: |c| format!("margin {} meets standard {}", pct(c.input.margin_no_refund), pct(c.limits.standard_margin)),
    },
    RatingRule {
        rank: Rank::C,
        score: 40,
        shortfall: false,
        matches: |c| {
            c.input.condition == Condition::Used
                && c.input.margin_no_refund < c.config.used_low_margin
                && c.input.profit_no_refund <= c.config.used_low_profit_floor
        },
        reason: |c| {
            format!(
                "used item with margin {} under {} and profit {:.0} at or under {:.0}",
                pct(c.input.margin_no_refund),
                pct(c.config.used_low_margin),
                c.input.profit_no_refund,
                c.config.used_low_profit_floor
            )
        },
    },
    RatingRule {
        rank: Rank::D,
        score: 10,
        shortfall: false,
        matches: |c| c.input.profit_with_refund < c.limits.min_profit,
        reason: |c| format!("profit {:.0} below minimum {:.0}", c.input.profit_with_refund, c.limits.min_profit),
    },
    RatingRule {
        rank: Rank::B,
        score: 50,
        shortfall: true,
        matches: |c| c.input.profit_with_refund > 0.0,
        reason: |c| format!("profitable ({:.0}) but below standard margin", c.input.profit_with_refund),
    },
    RatingRule {
        rank: Rank::D,
        score: 10,
        shortfall: false,
        matches: |_| true,
        reason: |_| "no profit".to_string(),
    },
];

/// Classifies a product. Pure function of its arguments.
pub fn rate_product(input: &RatingInput, thresholds: &RatingThresholds) -> RatingResult {
    let ctx = Ctx {
        input,
        limits: thresholds.for_condition(input.condition),
        config: thresholds,
    };
    let rule = RULES
        .iter()
        .find(|rule| (rule.matches)(&ctx))
        .unwrap_or(&RULES[RULES.len() - 1]);

    let mut warnings = Vec::new();
    let mut recommendations = Vec::new();

    if rule.shortfall {
        warnings.push(format!(
            "margin {} short of standard {}",
            pct(input.margin_no_refund),
            pct(ctx.limits.standard_margin)
        ));
    }
    if input.profit_no_refund <= 0.0 && input.profit_with_refund > 0.0 {
        warnings.push("profitable only with the tax refund".to_string());
    }

    let refund_gain = input.profit_with_refund - input.profit_no_refund;
    if refund_gain > 0.0 {
        recommendations.push(format!("tax refund improves profit by {refund_gain:.0}"));
    }
    if input.margin_no_refund < ctx.limits.standard_margin
        && input.margin_with_refund >= ctx.limits.standard_margin
    {
        recommendations.push("claim the export tax refund to reach the standard margin".to_string());
    }
    if matches!(rule.rank, Rank::C | Rank::D) {
        recommendations.push("raise the price or source at lower cost before listing".to_string());
    }

    RatingResult {
        rank: rule.rank,
        score: rule.score,
        reason: (rule.reason)(&ctx),
        warnings,
        recommendations,
    }
}

fn pct(value: f64) -> String {
    format!("{:.1}%", value * 100.0)
}
