use crate::{
    pricing::{DestinationMode, FeeSchedule, PricingInput, ProfitTarget, ShippingTerms, SolverConfig, price_at},
    rates::{DutyRates, DutySource},
};
use serde::{Deserialize, Serialize};

/// Shipping and duty assumptions for one destination zone. Amounts are in
/// the listing currency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneConfig {
    pub name: String,
    pub shipping_cost: f64,
    #[serde(default)]
    pub duty_rate: f64,
    #[serde(default)]
    pub shipping_price: f64,
    #[serde(default)]
    pub handling_fee_ddp: f64,
    #[serde(default)]
    pub handling_fee_ddu: f64,
    #[serde(default)]
    pub mode: DestinationMode,
    #[serde(default)]
    pub assumed_margin: Option<f64>,
}

impl ZoneConfig {
    pub fn handling_fee(&self) -> f64 {
        match self.mode {
            DestinationMode::Ddp => self.handling_fee_ddp,
            DestinationMode::Ddu => self.handling_fee_ddu,
        }
    }
}

/// The part of a listing that does not vary by zone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneListingTerms {
    /// Purchase cost in origin currency.
    pub item_cost: f64,
    pub exchange_rate: f64,
    /// Item price the listing is published at.
    pub price: f64,
    #[serde(default)]
    pub fees: FeeSchedule,
    #[serde(default)]
    pub fuel_surcharge_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneProfit {
    pub name: String,
    pub mode: DestinationMode,
    pub revenue: f64,
    pub shipping_cost: f64,
    pub landed_cost: f64,
    pub handling_fee: f64,
    pub fees: f64,
    pub profit: f64,
    pub margin: f64,
    pub has_profit: bool,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneValidation {
    pub can_list: bool,
    pub zones: Vec<ZoneProfit>,
    pub unprofitable_zones: Vec<String>,
}

/// Re-prices the listing for each zone. One zone without strictly positive
/// profit blocks the listing; an empty zone set blocks nothing.
pub fn validate_zones(
    terms: &ZoneListingTerms,
    zones: &[ZoneConfig],
    config: &SolverConfig,
) -> ZoneValidation {
    let zones: Vec<ZoneProfit> = zones.iter().map(|zone| zone_profit(terms, zone, config)).collect();
    let unprofitable_zones: Vec<String> = zones
        .iter()
        .filter(|zone| !zone.has_profit)
        .map(|zone| zone.name.clone())
        .collect();
    ZoneValidation {
        can_list: unprofitable_zones.is_empty(),
        zones,
        unprofitable_zones,
    }
}

fn zone_profit(terms: &ZoneListingTerms, zone: &ZoneConfig, config: &SolverConfig) -> ZoneProfit {
    let input = PricingInput {
        sku: None,
        item_cost: terms.item_cost,
        exchange_rate: terms.exchange_rate,
        weight_kg: 0.0,
        hs_code: None,
        origin_country: None,
        duty: DutyRates {
            hs_rate: zone.duty_rate,
            origin_rate: 0.0,
            source: DutySource::Zone {
                zone: zone.name.clone(),
            },
        },
        fees: terms.fees.clone(),
        shipping: ShippingTerms {
            actual_cost: zone.shipping_cost,
            fuel_surcharge_rate: terms.fuel_surcharge_rate,
            display_price: zone.shipping_price,
            handling_fee: zone.handling_fee(),
        },
        target: ProfitTarget::Margin(zone.assumed_margin.unwrap_or(0.0)),
        mode: zone.mode,
    };
    let mut result = price_at(&input, terms.price, config);
    let has_profit = result.is_profitable();

    let mut warnings = std::mem::take(&mut result.warnings);
    if let Some(assumed) = zone.assumed_margin.filter(|m| result.feasible && result.profit_rate < *m) {
        warnings.push(format!(
            "margin {:.1}% below assumed {:.1}%",
            result.profit_rate * 100.0,
            assumed * 100.0
        ));
    }

    ZoneProfit {
        name: zone.name.clone(),
        mode: zone.mode,
        revenue: result.revenue,
        shipping_cost: result.breakdown.shipping_cost,
        landed_cost: result.breakdown.landed_total(),
        handling_fee: result.breakdown.handling_fee,
        fees: result.breakdown.total_fees,
        profit: result.profit,
        margin: result.profit_rate,
        has_profit,
        warnings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn terms() -> ZoneListingTerms {
        ZoneListingTerms {
            item_cost: 15_000.0,
            exchange_rate: 150.0,
            price: 250.0,
            fees: FeeSchedule {
                marketplace_fee_rate: 0.13,
                payment_fee_rate: 0.02,
                ..FeeSchedule::default()
            },
            fuel_surcharge_rate: 0.05,
        }
    }

    fn zone(name: &str, shipping_cost: f64, duty_rate: f64) -> ZoneConfig {
        ZoneConfig {
            name: name.into(),
            shipping_cost,
            duty_rate,
            shipping_price: 30.0,
            handling_fee_ddp: 10.0,
            handling_fee_ddu: 5.0,
            mode: DestinationMode::Ddp,
            assumed_margin: None,
        }
    }

    #[test]
    fn all_profitable_zones_can_list() {
        let zones = [zone("US", 30.0, 0.0), zone("EU", 40.0, 0.04)];
        let result = validate_zones(&terms(), &zones, &SolverConfig::default());
        assert!(result.can_list);
        assert!(result.unprofitable_zones.is_empty());
        assert!(result.zones.iter().all(|z| z.profit > 0.0));
    }

    #[test]
    fn single_losing_zone_vetoes_and_recovers() {
        let mut zones = vec![zone("US", 30.0, 0.0), zone("EU", 40.0, 0.04), zone("AU", 35.0, 0.05)];
        let config = SolverConfig::default();
        assert!(validate_zones(&terms(), &zones, &config).can_list);

        zones[1].shipping_cost = 400.0;
        let vetoed = validate_zones(&terms(), &zones, &config);
        assert!(!vetoed.can_list);
        assert_eq!(vetoed.unprofitable_zones, vec!["EU".to_string()]);

        zones[1].shipping_cost = 40.0;
        assert!(validate_zones(&terms(), &zones, &config).can_list);
    }

    #[test]
    fn zero_profit_is_not_profit() {
        let config = SolverConfig {
            landed: crate::pricing::LandedCostConfig {
                processing_fee_floor: 0.0,
                processing_fee_rate: 0.0,
                ddp_service_fee: 0.0,
                ..Default::default()
            },
            ..SolverConfig::default()
        };
        let even = ZoneListingTerms {
            item_cost: 100.0,
            exchange_rate: 1.0,
            price: 100.0,
            fees: FeeSchedule::default(),
            fuel_surcharge_rate: 0.0,
        };
        let zones = [ZoneConfig {
            shipping_price: 0.0,
            handling_fee_ddp: 0.0,
            ..zone("JP", 0.0, 0.0)
        }];
        let result = validate_zones(&even, &zones, &config);
        assert_eq!(result.zones[0].profit, 0.0);
        assert!(!result.can_list);
    }

    #[test]
    fn empty_zone_set_can_list() {
        let result = validate_zones(&terms(), &[], &SolverConfig::default());
        assert!(result.can_list);
        assert!(result.zones.is_empty());
    }

    #[test]
    fn ddu_zone_uses_ddu_handling_and_skips_landed() {
        let zones = [ZoneConfig {
            mode: DestinationMode::Ddu,
            ..zone("UK", 30.0, 0.2)
        }];
        let result = validate_zones(&terms(), &zones, &SolverConfig::default());
        assert_eq!(result.zones[0].handling_fee, 5.0);
        assert_eq!(result.zones[0].landed_cost, 0.0);
    }

    #[test]
    fn assumed_margin_shortfall_warns() {
        let zones = [ZoneConfig {
            assumed_margin: Some(0.9),
            ..zone("US", 30.0, 0.0)
        }];
        let result = validate_zones(&terms(), &zones, &SolverConfig::default());
        assert!(result.can_list);
        assert!(result.zones[0].warnings.iter().any(|w| w.contains("below assumed")));
    }
}
