use crate::rates::DutyRates;
use serde::{Deserialize, Serialize};

/// Who clears the goods at the destination border.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DestinationMode {
    /// Seller pays duty, processing fee and the carrier's service fee.
    #[default]
    Ddp,
    /// Buyer pays at delivery.
    Ddu,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LandedCostConfig {
    pub processing_fee_rate: f64,
    pub processing_fee_floor: f64,
    pub processing_fee_ceiling: f64,
    pub ddp_service_fee: f64,
}

impl Default for LandedCostConfig {
    fn default() -> Self {
        Self {
            processing_fee_rate: 0.003464,
            processing_fee_floor: 2.69,
            processing_fee_ceiling: 634.62,
            ddp_service_fee: 15.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LandedCost {
    pub mode: DestinationMode,
    pub duty_base: f64,
    pub duty_rate: f64,
    pub duty: f64,
    pub processing_fee: f64,
    pub service_fee: f64,
    /// Seller-borne import cost.
    pub total: f64,
    /// Duty the buyer is expected to pay at delivery (DDU only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buyer_duty_estimate: Option<f64>,
}

/// Import cost for an item valued at `item_value` in destination currency.
///
/// Shipping and insurance never enter the duty base.
pub fn landed_cost(
    item_value: f64,
    rates: &DutyRates,
    mode: DestinationMode,
    config: &LandedCostConfig,
) -> LandedCost {
    let duty_base = item_value.max(0.0);
    let duty_rate = rates.combined().max(0.0);
    let duty = duty_base * duty_rate;

    match mode {
        DestinationMode::Ddp => {
            let processing_fee = clamp_fee(
                (duty_base + duty) * config.processing_fee_rate,
                config.processing_fee_floor,
                config.processing_fee_ceiling,
            );
            let service_fee = config.ddp_service_fee;
            LandedCost {
                mode,
                duty_base,
                duty_rate,
                duty,
                processing_fee,
                service_fee,
                total: duty + processing_fee + service_fee,
                buyer_duty_estimate: None,
            }
        }
        DestinationMode::Ddu => LandedCost {
            mode,
            duty_base,
            duty_rate,
            duty: 0.0,
            processing_fee: 0.0,
            service_fee: 0.0,
            total: 0.0,
            buyer_duty_estimate: Some(duty),
        },
    }
}

// A floor above the ceiling resolves to the ceiling.
fn clamp_fee(value: f64, floor: f64, ceiling: f64) -> f64 {
    value.max(floor).min(ceiling)
}
