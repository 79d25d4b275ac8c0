use crate::{
    batch::{BatchReport, BatchStats},
    pricing::{
        ChargeableWeight, DestinationMode, Dimensions, FeeSchedule, MarketplaceComparison,
        PricingResult, ProfitTarget, ShippingTerms,
    },
    rating::{Condition, RatingResult},
    zones::{ZoneConfig, ZoneListingTerms, ZoneValidation},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

fn default_currency() -> String {
    "USD".to_string()
}

/// One product to price, as handed over by the catalog collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteRequest {
    #[serde(default)]
    pub sku: Option<String>,
    /// Purchase cost in origin currency.
    pub item_cost: f64,
    /// Listing currency.
    #[serde(default = "default_currency")]
    pub currency: String,
    /// Skips the exchange-rate lookup when set.
    #[serde(default)]
    pub exchange_rate: Option<f64>,
    #[serde(default)]
    pub weight_kg: f64,
    #[serde(default)]
    pub dimensions: Option<Dimensions>,
    #[serde(default)]
    pub hs_code: Option<String>,
    #[serde(default)]
    pub origin_country: Option<String>,
    /// Caller-supplied duty rates; both must be present to skip the lookup.
    #[serde(default)]
    pub hs_rate: Option<f64>,
    #[serde(default)]
    pub origin_rate: Option<f64>,
    #[serde(default)]
    pub condition: Condition,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub fees: FeeSchedule,
    #[serde(default)]
    pub shipping: ShippingTerms,
    #[serde(default)]
    pub target: ProfitTarget,
    #[serde(default)]
    pub mode: DestinationMode,
    /// Overrides the configured zone set.
    #[serde(default)]
    pub zones: Option<Vec<ZoneConfig>>,
    /// Also price against every configured marketplace profile.
    #[serde(default)]
    pub compare: bool,
    #[serde(default)]
    pub priority: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuoteReport {
    pub quote_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sku: Option<String>,
    pub currency: String,
    pub weight: ChargeableWeight,
    pub pricing: PricingResult,
    pub rating: RatingResult,
    pub zones: ZoneValidation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comparison: Option<MarketplaceComparison>,
    pub stages: Vec<StageReport>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ZoneCheckRequest {
    pub terms: ZoneListingTerms,
    #[serde(default)]
    pub zones: Option<Vec<ZoneConfig>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchQuoteRequest {
    pub items: Vec<QuoteRequest>,
    /// Worker limit for this batch only; capped at the configured concurrency.
    #[serde(default)]
    pub concurrency: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchItemSummary {
    pub task_id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<QuoteReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub execution_time_ms: u64,
    pub retries_used: u32,
    pub timed_out: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchQuoteResponse {
    pub results: Vec<BatchItemSummary>,
    pub stats: BatchStats,
}

impl From<BatchReport<QuoteReport>> for BatchQuoteResponse {
    fn from(report: BatchReport<QuoteReport>) -> Self {
        let results = report
            .results
            .into_iter()
            .map(|r| BatchItemSummary {
                task_id: r.task_id,
                success: r.success,
                report: r.output,
                error: r.error,
                execution_time_ms: r.execution_time_ms,
                retries_used: r.retries_used,
                timed_out: r.timed_out,
            })
            .collect();
        Self {
            results,
            stats: report.stats,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StageReport {
    pub name: String,
    pub elapsed_ms: u128,
    pub timestamp: DateTime<Utc>,
    pub output: Value,
}

impl StageReport {
    pub fn new(name: &str, elapsed_ms: u128, output: Value) -> Self {
        Self {
            name: name.to_string(),
            elapsed_ms,
            timestamp: Utc::now(),
            output,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}
