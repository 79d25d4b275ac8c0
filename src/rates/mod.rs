pub mod cache;
pub mod static_source;
pub mod tariff;

pub use cache::TtlCache;
pub use static_source::StaticRateSource;
pub use tariff::{DEFAULT_DUTY_RATE, DutyRates, DutySource};

use async_trait::async_trait;
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tracing::{debug, warn};

/// Origin-currency units per one unit of the listed currency. Served only
/// when the configured source cannot answer.
const DEFAULT_EXCHANGE_RATES: &[(&str, f64)] = &[
    ("USD", 150.0),
    ("EUR", 163.0),
    ("GBP", 190.0),
    ("AUD", 98.0),
    ("CAD", 110.0),
    ("SGD", 112.0),
];

#[derive(Debug, Error)]
pub enum RateError {
    #[error("rate source `{source_name}` failed: {message}")]
    Source {
        source_name: &'static str,
        message: String,
    },
    #[error("no exchange rate available for {0}")]
    UnknownCurrency(String),
}

/// External collaborator that owns exchange rates and tariff tables.
///
/// Every lookup answers `Ok(None)` when the key is simply unknown; `Err` is
/// reserved for transport or decoding failures.
#[async_trait]
pub trait RateSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// Origin-currency units per one unit of `currency` (e.g. JPY per USD).
    async fn exchange_rate(&self, currency: &str) -> Result<Option<f64>, RateError>;

    /// General duty rate for a digits-only HS code.
    async fn hs_duty_rate(&self, hs_code: &str) -> Result<Option<f64>, RateError>;

    /// Additional origin-country duty such as a trade-remedy surcharge.
    async fn origin_surcharge(&self, country: &str) -> Result<Option<f64>, RateError>;
}

/// Label reported for rates served from [`DEFAULT_EXCHANGE_RATES`].
pub const DEFAULT_TABLE_SOURCE: &str = "default_table";

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRate {
    pub rate: f64,
    pub source: &'static str,
    /// Set when the rate is a default-table substitute.
    pub warning: Option<String>,
}

impl ResolvedRate {
    fn live(rate: f64, source: &'static str) -> Self {
        Self {
            rate,
            source,
            warning: None,
        }
    }

    fn fallback(currency: String, reason: &str) -> Result<Self, RateError> {
        let Some(rate) = default_exchange_rate(&currency) else {
            return Err(RateError::UnknownCurrency(currency));
        };
        Ok(Self {
            rate,
            source: DEFAULT_TABLE_SOURCE,
            warning: Some(format!("{reason}; default table rate {rate} used for {currency}")),
        })
    }

    pub fn is_fallback(&self) -> bool {
        self.warning.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedDuty {
    pub rates: DutyRates,
    pub warnings: Vec<String>,
}

/// Currency & duty lookups in front of a [`RateSource`], each kind cached
/// for a short TTL.
pub struct RateResolver {
    source: Arc<dyn RateSource>,
    exchange: TtlCache<String, f64>,
    hs_rates: TtlCache<String, Option<f64>>,
    surcharges: TtlCache<String, Option<f64>>,
}

impl RateResolver {
    pub fn new(source: Arc<dyn RateSource>, ttl: Duration) -> Self {
        Self {
            source,
            exchange: TtlCache::new(ttl),
            hs_rates: TtlCache::new(ttl),
            surcharges: TtlCache::new(ttl),
        }
    }

    pub fn source_name(&self) -> &'static str {
        self.source.name()
    }

    /// Rates the source cannot supply come from the built-in default table
    /// and carry a warning naming the substitution.
    pub async fn exchange_rate(&self, currency: &str) -> Result<ResolvedRate, RateError> {
        let key = currency.trim().to_uppercase();
        if let Some(rate) = self.exchange.get(&key).await {
            return Ok(ResolvedRate::live(rate, self.source.name()));
        }

        match self.source.exchange_rate(&key).await {
            Ok(Some(rate)) if rate.is_finite() && rate > 0.0 => {
                self.exchange.insert(key, rate).await;
                Ok(ResolvedRate::live(rate, self.source.name()))
            }
            Ok(Some(rate)) => {
                warn!(target = "arbitrage.rates", currency = %key, rate, "source returned unusable exchange rate");
                ResolvedRate::fallback(key, "exchange rate source returned an unusable rate")
            }
            Ok(None) => ResolvedRate::fallback(key, "exchange rate source has no rate"),
            Err(err) => {
                warn!(target = "arbitrage.rates", currency = %key, error = %err, "exchange rate lookup failed; using default table");
                ResolvedRate::fallback(key, "exchange rate source unavailable")
            }
        }
    }

    /// Resolves HS and origin duty rates. Never fails: gaps fall back to
    /// prefixes, then to [`DEFAULT_DUTY_RATE`], and each fallback is reported
    /// as a warning.
    pub async fn resolve_duty(
        &self,
        hs_code: Option<&str>,
        origin_country: Option<&str>,
    ) -> ResolvedDuty {
        let mut warnings = Vec::new();

        let Some(normalized) = hs_code.and_then(tariff::normalize_hs_code) else {
            warnings.push(format!(
                "HS code missing; default combined duty rate {:.1}% applied",
                DEFAULT_DUTY_RATE * 100.0
            ));
            return ResolvedDuty {
                rates: DutyRates::fallback(),
                warnings,
            };
        };

        let mut hs_match = None;
        for key in tariff::hs_lookup_keys(&normalized) {
            match self.cached_hs_rate(&key).await {
                Ok(Some(rate)) => {
                    hs_match = Some((key, rate));
                    break;
                }
                Ok(None) => continue,
                Err(err) => {
                    warnings.push(format!("duty lookup for HS {normalized} failed: {err}"));
                    break;
                }
            }
        }

        let origin_rate = match origin_country.map(|c| c.trim().to_uppercase()) {
            Some(country) if !country.is_empty() => match self.cached_surcharge(&country).await {
                Ok(rate) => rate.unwrap_or(0.0),
                Err(err) => {
                    warnings.push(format!("origin surcharge lookup for {country} failed: {err}"));
                    0.0
                }
            },
            _ => 0.0,
        };

        let rates = match hs_match {
            Some((key, rate)) if key == normalized => DutyRates {
                hs_rate: rate,
                origin_rate,
                source: DutySource::Exact { code: key },
            },
            Some((prefix, rate)) => {
                warnings.push(format!(
                    "HS {normalized} not found; using rate of prefix {prefix}"
                ));
                DutyRates {
                    hs_rate: rate,
                    origin_rate,
                    source: DutySource::Prefix { prefix },
                }
            }
            None => {
                warnings.push(format!(
                    "HS {normalized} unresolved; default combined duty rate {:.1}% applied",
                    DEFAULT_DUTY_RATE * 100.0
                ));
                DutyRates::fallback()
            }
        };

        debug!(
            target = "arbitrage.rates",
            hs_code = %normalized,
            hs_rate = rates.hs_rate,
            origin_rate = rates.origin_rate,
            "duty resolved"
        );
        ResolvedDuty { rates, warnings }
    }

    /// Drops every cached lookup.
    pub async fn invalidate(&self) {
        self.exchange.clear().await;
        self.hs_rates.clear().await;
        self.surcharges.clear().await;
    }

    async fn cached_hs_rate(&self, key: &str) -> Result<Option<f64>, RateError> {
        let key = key.to_string();
        if let Some(hit) = self.hs_rates.get(&key).await {
            return Ok(hit);
        }
        let rate = self
            .source
            .hs_duty_rate(&key)
            .await?
            .filter(|r| r.is_finite() && *r >= 0.0);
        self.hs_rates.insert(key, rate).await;
        Ok(rate)
    }

    async fn cached_surcharge(&self, country: &str) -> Result<Option<f64>, RateError> {
        let key = country.to_string();
        if let Some(hit) = self.surcharges.get(&key).await {
            return Ok(hit);
        }
        let rate = self
            .source
            .origin_surcharge(&key)
            .await?
            .filter(|r| r.is_finite() && *r >= 0.0);
        self.surcharges.insert(key, rate).await;
        Ok(rate)
    }
}

pub fn default_exchange_rate(currency: &str) -> Option<f64> {
    DEFAULT_EXCHANGE_RATES
        .iter()
        .find(|(code, _)| code.eq_ignore_ascii_case(currency))
        .map(|(_, rate)| *rate)
}
