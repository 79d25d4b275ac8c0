use super::{
    landed::{DestinationMode, LandedCost, LandedCostConfig, landed_cost},
    refund::{DEFAULT_CONSUMPTION_TAX_RATE, refund_amount},
};
use crate::rates::DutyRates;
use serde::{Deserialize, Serialize};

const EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ProfitTarget {
    /// Profit as a share of revenue.
    Margin(f64),
    /// Absolute profit in destination currency.
    Amount(f64),
}

impl Default for ProfitTarget {
    fn default() -> Self {
        Self::Margin(0.15)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreTier {
    #[default]
    None,
    Basic,
    Premium,
    Anchor,
}

impl StoreTier {
    /// Points taken off the marketplace final-value fee.
    pub fn fee_discount(self) -> f64 {
        match self {
            StoreTier::None => 0.0,
            StoreTier::Basic => 0.04,
            StoreTier::Premium => 0.06,
            StoreTier::Anchor => 0.08,
        }
    }
}

/// Marketplace and payment fees charged on revenue.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FeeSchedule {
    pub marketplace_fee_rate: f64,
    pub store_tier: StoreTier,
    pub payment_fee_rate: f64,
    pub advertising_fee_rate: f64,
    pub fx_loss_rate: f64,
    pub international_fee_rate: f64,
    /// Per-order fee in destination currency (insertion fee and the like).
    pub fixed_fee: f64,
}

impl FeeSchedule {
    pub fn effective_marketplace_rate(&self) -> f64 {
        (self.marketplace_fee_rate - self.store_tier.fee_discount()).max(0.0)
    }

    pub fn other_rate(&self) -> f64 {
        self.advertising_fee_rate + self.fx_loss_rate + self.international_fee_rate
    }

    pub fn variable_rate(&self) -> f64 {
        self.effective_marketplace_rate() + self.payment_fee_rate + self.other_rate()
    }

    fn is_valid(&self) -> bool {
        [
            self.marketplace_fee_rate,
            self.payment_fee_rate,
            self.advertising_fee_rate,
            self.fx_loss_rate,
            self.international_fee_rate,
            self.fixed_fee,
        ]
        .iter()
        .all(|v| v.is_finite() && *v >= 0.0)
    }
}

/// Destination-currency shipping assumptions.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ShippingTerms {
    /// What the carrier charges the seller before fuel surcharge.
    pub actual_cost: f64,
    pub fuel_surcharge_rate: f64,
    /// Shipping price shown to, and paid by, the buyer.
    pub display_price: f64,
    pub handling_fee: f64,
}

impl ShippingTerms {
    pub fn carrier_cost(&self) -> f64 {
        self.actual_cost * (1.0 + self.fuel_surcharge_rate)
    }

    fn is_valid(&self) -> bool {
        [
            self.actual_cost,
            self.fuel_surcharge_rate,
            self.display_price,
            self.handling_fee,
        ]
        .iter()
        .all(|v| v.is_finite() && *v >= 0.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingInput {
    #[serde(default)]
    pub sku: Option<String>,
    /// Purchase cost in origin currency.
    pub item_cost: f64,
    /// Origin-currency units per destination unit.
    pub exchange_rate: f64,
    #[serde(default)]
    pub weight_kg: f64,
    #[serde(default)]
    pub hs_code: Option<String>,
    #[serde(default)]
    pub origin_country: Option<String>,
    pub duty: DutyRates,
    #[serde(default)]
    pub fees: FeeSchedule,
    #[serde(default)]
    pub shipping: ShippingTerms,
    #[serde(default)]
    pub target: ProfitTarget,
    #[serde(default)]
    pub mode: DestinationMode,
}

impl PricingInput {
    pub fn item_cost_destination(&self) -> f64 {
        self.item_cost / self.exchange_rate
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundingDirection {
    #[default]
    Up,
    Nearest,
}

/// Smallest price increment the marketplace accepts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriceRounding {
    pub step: f64,
    pub direction: RoundingDirection,
}

impl Default for PriceRounding {
    fn default() -> Self {
        Self {
            step: 0.01,
            direction: RoundingDirection::Up,
        }
    }
}

impl PriceRounding {
    pub fn apply(&self, value: f64) -> f64 {
        if !(self.step.is_finite() && self.step > 0.0) {
            return round_cents(value);
        }
        let units = value / self.step;
        let units = match self.direction {
            RoundingDirection::Up => (units - EPSILON).ceil(),
            RoundingDirection::Nearest => units.round(),
        };
        round_cents(units * self.step)
    }

    fn minimum(&self) -> f64 {
        if self.step.is_finite() && self.step > 0.0 {
            self.step
        } else {
            0.01
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    pub landed: LandedCostConfig,
    pub rounding: PriceRounding,
    pub consumption_tax_rate: f64,
    pub low_margin_warning: f64,
    /// Origin-currency profit under which a warning is raised.
    pub low_profit_floor: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            landed: LandedCostConfig::default(),
            rounding: PriceRounding::default(),
            consumption_tax_rate: DEFAULT_CONSUMPTION_TAX_RATE,
            low_margin_warning: 0.10,
            low_profit_floor: 500.0,
        }
    }
}

/// Every cost line in destination currency.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub item_cost: f64,
    pub shipping_cost: f64,
    pub handling_fee: f64,
    pub landed: Option<LandedCost>,
    pub marketplace_fee: f64,
    pub payment_fee: f64,
    pub other_fees: f64,
    pub fixed_fee: f64,
    pub total_fees: f64,
    pub total_cost: f64,
}

impl CostBreakdown {
    pub fn landed_total(&self) -> f64 {
        self.landed.as_ref().map(|l| l.total).unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingResult {
    pub input: PricingInput,
    pub feasible: bool,
    /// Item price, excluding the buyer-paid shipping.
    pub price: f64,
    /// Item price plus buyer-paid shipping.
    pub revenue: f64,
    pub breakdown: CostBreakdown,
    pub profit: f64,
    pub profit_rate: f64,
    pub refund_origin: f64,
    pub profit_origin: f64,
    pub profit_with_refund_origin: f64,
    pub margin_with_refund: f64,
    pub warnings: Vec<String>,
}

impl PricingResult {
    pub fn is_profitable(&self) -> bool {
        self.feasible && self.profit > 0.0
    }

    fn infeasible(input: &PricingInput, warning: String) -> Self {
        Self {
            input: input.clone(),
            feasible: false,
            price: 0.0,
            revenue: 0.0,
            breakdown: CostBreakdown::default(),
            profit: 0.0,
            profit_rate: 0.0,
            refund_origin: 0.0,
            profit_origin: 0.0,
            profit_with_refund_origin: 0.0,
            margin_with_refund: 0.0,
            warnings: vec![warning],
        }
    }
}

/// Back-solves the listing price that meets `input.target`.
///
/// The raw solution is rounded once, then profit is re-derived from the
/// rounded price so the reported figures always agree with `price`.
pub fn solve(input: &PricingInput, config: &SolverConfig) -> PricingResult {
    if let Some(problem) = validate(input) {
        return PricingResult::infeasible(input, problem);
    }

    let costs = fixed_costs(input, config);
    let fee_rate = input.fees.variable_rate();
    let numerator = costs.sum() + input.fees.fixed_fee;

    let fee_share = 1.0 - fee_rate;
    if !(fee_share > EPSILON) {
        return PricingResult::infeasible(
            input,
            format!("infeasible: fee rate reaches {:.2}% of revenue", fee_rate * 100.0),
        );
    }

    let (denominator, numerator, label) = match input.target {
        ProfitTarget::Margin(margin) => (1.0 - fee_rate - margin, numerator, "fee rate + target margin"),
        ProfitTarget::Amount(amount) => (1.0 - fee_rate, numerator + amount, "fee rate"),
    };

    if !(denominator > EPSILON) {
        return PricingResult::infeasible(
            input,
            format!(
                "infeasible: {label} reaches {:.2}% of revenue",
                (1.0 - denominator) * 100.0
            ),
        );
    }

    let revenue = numerator / denominator;
    let mut price = config.rounding.apply(revenue - input.shipping.display_price);
    let mut warnings = Vec::new();
    if price <= 0.0 {
        price = config.rounding.minimum();
        warnings.push(format!(
            "buyer shipping covers all costs; price set to minimum {price:.2}"
        ));
    }

    let mut result = price_at(input, price, config);
    warnings.append(&mut result.warnings);
    result.warnings = warnings;
    result
}

/// Full cost accounting at a given item price. Used by the solver after
/// rounding and by callers evaluating an existing listing price.
pub fn price_at(input: &PricingInput, price: f64, config: &SolverConfig) -> PricingResult {
    if let Some(problem) = validate(input) {
        return PricingResult::infeasible(input, problem);
    }

    let costs = fixed_costs(input, config);
    let fees = &input.fees;
    let revenue = price + input.shipping.display_price;

    let marketplace_fee = revenue * fees.effective_marketplace_rate();
    let payment_fee = revenue * fees.payment_fee_rate;
    let other_fees = revenue * fees.other_rate();
    let total_fees = marketplace_fee + payment_fee + other_fees + fees.fixed_fee;
    let total_cost = costs.sum() + total_fees;
    let profit = revenue - total_cost;
    let profit_rate = if revenue > 0.0 { profit / revenue } else { 0.0 };

    let fx = input.exchange_rate;
    let refund_origin = refund_amount(
        input.item_cost + (marketplace_fee + fees.fixed_fee) * fx,
        config.consumption_tax_rate,
    );
    let profit_origin = profit * fx;
    let profit_with_refund_origin = profit_origin + refund_origin;
    let margin_with_refund = if revenue > 0.0 {
        (profit + refund_origin / fx) / revenue
    } else {
        0.0
    };

    let mut warnings = Vec::new();
    if profit <= 0.0 {
        warnings.push(format!("loss at price {price:.2}: profit {profit:.2}"));
    } else {
        if profit_rate < config.low_margin_warning {
            warnings.push(format!(
                "low margin {:.1}% (under {:.1}%)",
                profit_rate * 100.0,
                config.low_margin_warning * 100.0
            ));
        }
        if profit_origin < config.low_profit_floor {
            warnings.push(format!(
                "low profit {profit_origin:.0} in origin currency (under {:.0})",
                config.low_profit_floor
            ));
        }
    }
    if let Some(buyer_duty) = costs.landed.buyer_duty_estimate.filter(|d| *d > 0.0) {
        warnings.push(format!("DDU: buyer pays an estimated {buyer_duty:.2} in duty"));
    }

    PricingResult {
        input: input.clone(),
        feasible: true,
        price,
        revenue,
        breakdown: CostBreakdown {
            item_cost: costs.item,
            shipping_cost: costs.shipping,
            handling_fee: costs.handling,
            landed: Some(costs.landed),
            marketplace_fee,
            payment_fee,
            other_fees,
            fixed_fee: fees.fixed_fee,
            total_fees,
            total_cost,
        },
        profit,
        profit_rate,
        refund_origin,
        profit_origin,
        profit_with_refund_origin,
        margin_with_refund,
        warnings,
    }
}

struct FixedCosts {
    item: f64,
    shipping: f64,
    handling: f64,
    landed: LandedCost,
}

impl FixedCosts {
    fn sum(&self) -> f64 {
        self.item + self.shipping + self.handling + self.landed.total
    }
}

fn fixed_costs(input: &PricingInput, config: &SolverConfig) -> FixedCosts {
    let item = input.item_cost_destination();
    FixedCosts {
        item,
        shipping: input.shipping.carrier_cost(),
        handling: input.shipping.handling_fee,
        landed: landed_cost(item, &input.duty, input.mode, &config.landed),
    }
}

fn validate(input: &PricingInput) -> Option<String> {
    if !(input.exchange_rate.is_finite() && input.exchange_rate > 0.0) {
        return Some(format!("invalid exchange rate {}", input.exchange_rate));
    }
    if !(input.item_cost.is_finite() && input.item_cost >= 0.0) {
        return Some(format!("invalid item cost {}", input.item_cost));
    }
    if !input.duty.is_valid() {
        return Some("invalid duty rates".into());
    }
    if !input.fees.is_valid() {
        return Some("fee rates must be finite and non-negative".into());
    }
    if !input.shipping.is_valid() {
        return Some("shipping terms must be finite and non-negative".into());
    }
    let target_ok = match input.target {
        ProfitTarget::Margin(m) | ProfitTarget::Amount(m) => m.is_finite(),
    };
    if !target_ok {
        return Some("profit target must be finite".into());
    }
    None
}

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    /// ¥15,000 item shipped DDP with a 25% origin surcharge, basic store.
    fn example_input() -> PricingInput {
        PricingInput {
            sku: Some("SKU-1".into()),
            item_cost: 15_000.0,
            exchange_rate: 154.0,
            weight_kg: 1.5,
            hs_code: Some("9504.40".into()),
            origin_country: Some("CN".into()),
            duty: DutyRates::new(0.0, 0.25),
            fees: FeeSchedule {
                marketplace_fee_rate: 0.1315,
                store_tier: StoreTier::Basic,
                payment_fee_rate: 0.02,
                advertising_fee_rate: 0.02,
                ..FeeSchedule::default()
            },
            shipping: ShippingTerms {
                actual_cost: 30.0,
                fuel_surcharge_rate: 0.05,
                display_price: 35.0,
                handling_fee: 12.0,
            },
            target: ProfitTarget::Margin(0.30),
            mode: DestinationMode::Ddp,
        }
    }

    fn step_five() -> SolverConfig {
        SolverConfig {
            rounding: PriceRounding {
                step: 5.0,
                direction: RoundingDirection::Up,
            },
            ..SolverConfig::default()
        }
    }

    fn assert_consistent(result: &PricingResult) {
        let b = &result.breakdown;
        let recomputed = result.revenue
            - (b.item_cost + b.shipping_cost + b.handling_fee + b.landed_total() + b.total_fees);
        assert!((recomputed - result.profit).abs() <= 0.01);
        assert!((result.profit / result.revenue - result.profit_rate).abs() < 1e-9);
    }

    #[test]
    fn example_scenario_rounds_up_to_five() {
        let result = solve(&example_input(), &step_five());
        assert!(result.feasible);
        assert_eq!(result.price, 290.0);
        assert_eq!(result.revenue, 325.0);

        let landed = result.breakdown.landed.as_ref().unwrap();
        assert_eq!(landed.processing_fee, 2.69);
        assert!(landed.duty > landed.processing_fee + landed.service_fee);
        assert!((result.breakdown.shipping_cost - 31.5).abs() < 1e-9);

        assert!(result.profit_rate >= 0.30);
        assert!((result.profit - 99.32).abs() < 0.01);
        assert_consistent(&result);
    }

    #[test]
    fn absolute_target_meets_amount() {
        let input = PricingInput {
            target: ProfitTarget::Amount(50.0),
            ..example_input()
        };
        let result = solve(&input, &SolverConfig::default());
        assert!(result.feasible);
        assert!(result.profit >= 50.0 - 0.01);
        assert_consistent(&result);
    }

    #[test]
    fn fees_plus_margin_at_hundred_percent_is_infeasible() {
        let input = PricingInput {
            target: ProfitTarget::Margin(0.8685),
            ..example_input()
        };
        let result = solve(&input, &SolverConfig::default());
        assert!(!result.feasible);
        assert_eq!(result.price, 0.0);
        assert!(result.warnings[0].starts_with("infeasible"));

        let over = PricingInput {
            target: ProfitTarget::Margin(0.95),
            ..example_input()
        };
        assert!(!solve(&over, &SolverConfig::default()).feasible);
    }

    #[test]
    fn fee_rate_alone_can_be_infeasible() {
        let mut input = example_input();
        input.fees.marketplace_fee_rate = 1.5;
        input.target = ProfitTarget::Amount(10.0);
        let result = solve(&input, &SolverConfig::default());
        assert!(!result.feasible);
        assert!(result.profit.is_finite());
    }

    #[test]
    fn negative_margin_cannot_rescue_fees_over_revenue() {
        let mut input = example_input();
        input.fees.marketplace_fee_rate = 1.2;
        input.target = ProfitTarget::Margin(-0.5);
        let result = solve(&input, &SolverConfig::default());
        assert!(!result.feasible);
        assert_eq!(result.price, 0.0);
        assert!(result.warnings[0].starts_with("infeasible: fee rate"));
    }

    #[test]
    fn bad_exchange_rate_is_reported_not_divided() {
        let input = PricingInput {
            exchange_rate: 0.0,
            ..example_input()
        };
        let result = solve(&input, &SolverConfig::default());
        assert!(!result.feasible);
        assert!(result.warnings[0].contains("exchange rate"));
    }

    #[test]
    fn consistency_holds_across_steps_and_targets() {
        for step in [0.01, 0.99, 1.0, 5.0, 10.0] {
            for margin in [0.0, 0.05, 0.2, 0.45] {
                let config = SolverConfig {
                    rounding: PriceRounding {
                        step,
                        direction: RoundingDirection::Nearest,
                    },
                    ..SolverConfig::default()
                };
                let input = PricingInput {
                    target: ProfitTarget::Margin(margin),
                    ..example_input()
                };
                let result = solve(&input, &config);
                assert!(result.feasible);
                assert_consistent(&result);
            }
        }
    }

    #[test]
    fn store_discount_never_goes_negative() {
        let fees = FeeSchedule {
            marketplace_fee_rate: 0.03,
            store_tier: StoreTier::Anchor,
            ..FeeSchedule::default()
        };
        assert_eq!(fees.effective_marketplace_rate(), 0.0);
    }

    #[test]
    fn refund_raises_profit_with_refund() {
        let result = solve(&example_input(), &step_five());
        assert!(result.refund_origin > 15_000.0 * 0.1 / 1.1);
        assert!(result.profit_with_refund_origin > result.profit_origin);
        assert!(result.margin_with_refund > result.profit_rate);
    }

    #[test]
    fn ddu_drops_landed_cost_and_warns() {
        let input = PricingInput {
            mode: DestinationMode::Ddu,
            ..example_input()
        };
        let ddu = solve(&input, &step_five());
        let ddp = solve(&example_input(), &step_five());
        assert!(ddu.price < ddp.price);
        assert_eq!(ddu.breakdown.landed_total(), 0.0);
        assert!(ddu.warnings.iter().any(|w| w.starts_with("DDU")));
    }

    #[test]
    fn loss_at_fixed_price_is_flagged() {
        let result = price_at(&example_input(), 50.0, &SolverConfig::default());
        assert!(result.feasible);
        assert!(result.profit < 0.0);
        assert!(!result.is_profitable());
        assert!(result.warnings[0].starts_with("loss"));
    }

    #[test]
    fn low_margin_is_advisory() {
        let input = PricingInput {
            target: ProfitTarget::Margin(0.05),
            ..example_input()
        };
        let result = solve(&input, &SolverConfig::default());
        assert!(result.is_profitable());
        assert!(result.warnings.iter().any(|w| w.starts_with("low margin")));
    }

    #[test]
    fn rounding_directions() {
        let up = PriceRounding {
            step: 5.0,
            direction: RoundingDirection::Up,
        };
        assert_eq!(up.apply(286.8), 290.0);
        assert_eq!(up.apply(290.0), 290.0);
        let nearest = PriceRounding {
            step: 5.0,
            direction: RoundingDirection::Nearest,
        };
        assert_eq!(nearest.apply(286.8), 285.0);
        assert_eq!(PriceRounding::default().apply(12.341), 12.35);
    }
}
