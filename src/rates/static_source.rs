use super::{RateError, RateSource, tariff::normalize_hs_code};
use async_trait::async_trait;
use std::collections::HashMap;

/// In-memory rate table. Used for the demo service and for deterministic
/// rates in tests.
#[derive(Debug, Clone, Default)]
pub struct StaticRateSource {
    exchange: HashMap<String, f64>,
    hs_rates: HashMap<String, f64>,
    origin_surcharges: HashMap<String, f64>,
}

impl StaticRateSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn demo() -> Self {
        Self::new()
            .with_exchange_rate("USD", 154.32)
            .with_exchange_rate("EUR", 163.0)
            .with_exchange_rate("GBP", 190.0)
            .with_exchange_rate("AUD", 98.0)
            .with_hs_rate("9504.40.00.00", 0.0)
            .with_hs_rate("9503.00.00", 0.0)
            .with_hs_rate("8471.30", 0.0)
            .with_hs_rate("6109.10", 0.165)
            .with_hs_rate("4202", 0.08)
            .with_origin_surcharge("CN", 0.25)
            .with_origin_surcharge("JP", 0.15)
            .with_origin_surcharge("VN", 0.20)
    }

    pub fn with_exchange_rate(mut self, currency: &str, rate: f64) -> Self {
        self.exchange.insert(currency.trim().to_uppercase(), rate);
        self
    }

    pub fn with_hs_rate(mut self, code: &str, rate: f64) -> Self {
        if let Some(normalized) = normalize_hs_code(code) {
            self.hs_rates.insert(normalized, rate);
        }
        self
    }

    pub fn with_origin_surcharge(mut self, country: &str, rate: f64) -> Self {
        self.origin_surcharges
            .insert(country.trim().to_uppercase(), rate);
        self
    }
}

#[async_trait]
impl RateSource for StaticRateSource {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn exchange_rate(&self, currency: &str) -> Result<Option<f64>, RateError> {
        Ok(self.exchange.get(currency).copied())
    }

    async fn hs_duty_rate(&self, hs_code: &str) -> Result<Option<f64>, RateError> {
        Ok(self.hs_rates.get(hs_code).copied())
    }

    async fn origin_surcharge(&self, country: &str) -> Result<Option<f64>, RateError> {
        Ok(self.origin_surcharges.get(country).copied())
    }
}
