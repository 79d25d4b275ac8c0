use super::{
    landed::DestinationMode,
    solver::{FeeSchedule, PriceRounding, PricingInput, PricingResult, ShippingTerms, SolverConfig, solve},
};
use serde::{Deserialize, Serialize};

/// Fee profile of one marketplace the product could be listed on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketplaceProfile {
    pub id: String,
    pub fees: FeeSchedule,
    #[serde(default)]
    pub shipping: Option<ShippingTerms>,
    #[serde(default)]
    pub rounding: Option<PriceRounding>,
    #[serde(default)]
    pub mode: Option<DestinationMode>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MarketplaceQuote {
    pub marketplace: String,
    pub result: PricingResult,
}

#[derive(Debug, Clone, Serialize)]
pub struct MarketplaceComparison {
    pub quotes: Vec<MarketplaceQuote>,
    pub best: Option<String>,
    pub profitable_count: usize,
    pub average_profit: f64,
}

/// Solves the same product against every profile. The best marketplace is
/// the profitable quote with the highest profit; first profile wins ties.
pub fn compare_marketplaces(
    input: &PricingInput,
    profiles: &[MarketplaceProfile],
    config: &SolverConfig,
) -> MarketplaceComparison {
    let quotes: Vec<MarketplaceQuote> = profiles
        .iter()
        .map(|profile| {
            let mut scoped = input.clone();
            scoped.fees = profile.fees.clone();
            if let Some(shipping) = &profile.shipping {
                scoped.shipping = shipping.clone();
            }
            if let Some(mode) = profile.mode {
                scoped.mode = mode;
            }
            let config = match profile.rounding {
                Some(rounding) => SolverConfig {
                    rounding,
                    ..config.clone()
                },
                None => config.clone(),
            };
            MarketplaceQuote {
                marketplace: profile.id.clone(),
                result: solve(&scoped, &config),
            }
        })
        .collect();

    let profitable: Vec<&MarketplaceQuote> =
        quotes.iter().filter(|q| q.result.is_profitable()).collect();
    let best = profitable
        .iter()
        .fold(None::<&&MarketplaceQuote>, |best, quote| match best {
            Some(current) if current.result.profit >= quote.result.profit => Some(current),
            _ => Some(quote),
        })
        .map(|quote| quote.marketplace.clone());
    let average_profit = if profitable.is_empty() {
        0.0
    } else {
        profitable.iter().map(|q| q.result.profit).sum::<f64>() / profitable.len() as f64
    };

    MarketplaceComparison {
        profitable_count: profitable.len(),
        best,
        average_profit,
        quotes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{pricing::solver::ProfitTarget, rates::DutyRates};

    fn input() -> PricingInput {
        PricingInput {
            sku: None,
            item_cost: 10_000.0,
            exchange_rate: 150.0,
            weight_kg: 1.0,
            hs_code: None,
            origin_country: None,
            duty: DutyRates::new(0.05, 0.0),
            fees: FeeSchedule::default(),
            shipping: ShippingTerms {
                actual_cost: 20.0,
                display_price: 20.0,
                ..ShippingTerms::default()
            },
            target: ProfitTarget::Amount(20.0),
            mode: DestinationMode::Ddp,
        }
    }

    fn profile(id: &str, rate: f64) -> MarketplaceProfile {
        MarketplaceProfile {
            id: id.into(),
            fees: FeeSchedule {
                marketplace_fee_rate: rate,
                ..FeeSchedule::default()
            },
            shipping: None,
            rounding: None,
            mode: None,
        }
    }

    #[test]
    fn picks_highest_profit_and_skips_infeasible() {
        let profiles = [
            profile("ebay_us", 0.13),
            profile("broken", 1.2),
            profile("shopee_sg", 0.08),
        ];
        let comparison = compare_marketplaces(&input(), &profiles, &SolverConfig::default());
        assert_eq!(comparison.quotes.len(), 3);
        assert_eq!(comparison.profitable_count, 2);
        assert!(!comparison.quotes[1].result.feasible);
        assert!(comparison.best.is_some());
        assert_ne!(comparison.best.as_deref(), Some("broken"));
        assert!(comparison.average_profit >= 19.99);
    }

    #[test]
    fn margin_target_favors_cheaper_fees() {
        let margin_input = PricingInput {
            target: ProfitTarget::Margin(0.2),
            ..input()
        };
        let profiles = [profile("expensive", 0.15), profile("cheap", 0.05)];
        let comparison = compare_marketplaces(&margin_input, &profiles, &SolverConfig::default());
        // Same margin on a higher price means more absolute profit.
        assert_eq!(comparison.best.as_deref(), Some("expensive"));
    }

    #[test]
    fn nothing_profitable_means_no_best() {
        let comparison =
            compare_marketplaces(&input(), &[profile("broken", 1.5)], &SolverConfig::default());
        assert_eq!(comparison.best, None);
        assert_eq!(comparison.profitable_count, 0);
        assert_eq!(comparison.average_profit, 0.0);
    }
}
