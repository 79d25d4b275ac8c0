use crate::{
    batch::{BatchConfig, BatchController, BatchHooks, BatchReport, BatchTask},
    config::{ConfigError, EngineSettings, RulesConfig, RulesStore},
    models::{QuoteReport, QuoteRequest, StageReport},
    pricing::{
        ChargeableWeight, PricingInput, PricingResult, chargeable_weight, compare_marketplaces, solve,
    },
    rates::{DutyRates, DutySource, RateError, RateResolver, RateSource, ResolvedRate, StaticRateSource},
    rating::{RatingInput, RatingResult, rate_product},
    strategy::{ListingDecision, ProductContext, decide},
    supabase::SupabaseRateSource,
    zones::{ZoneConfig, ZoneListingTerms, ZoneValidation, validate_zones},
};
use serde_json::{Value, json};
use std::{future::Future, sync::Arc, time::Instant};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

/// Facade chaining resolver, solver, rating and zone checks for one product,
/// recording a timed transcript of each stage.
#[derive(Clone)]
pub struct Engine {
    rates: Arc<RateResolver>,
    rules: RulesStore,
    batch: Arc<BatchController>,
}

impl Engine {
    pub fn new(rates: Arc<RateResolver>, rules: RulesStore, batch: Arc<BatchController>) -> Self {
        Self { rates, rules, batch }
    }

    /// In-memory rates and built-in rules.
    pub fn demo() -> Self {
        let source: Arc<dyn RateSource> = Arc::new(StaticRateSource::demo());
        Self::new(
            Arc::new(RateResolver::new(source, std::time::Duration::from_secs(300))),
            RulesStore::from_config(RulesConfig::default()),
            Arc::new(BatchController::new(BatchConfig::default())),
        )
    }

    /// Supabase rates when credentials are present, the static table otherwise.
    pub fn from_settings(settings: &EngineSettings) -> Result<Self, ConfigError> {
        let source: Arc<dyn RateSource> = match SupabaseRateSource::from_env() {
            Some(client) => Arc::new(client),
            None => {
                warn!(target = "arbitrage.engine", "SUPABASE_URL not set; serving static demo rates");
                Arc::new(StaticRateSource::demo())
            }
        };
        let rules = RulesStore::from_settings(settings)?;
        Ok(Self::new(
            Arc::new(RateResolver::new(source, settings.rate_cache_ttl)),
            rules,
            Arc::new(BatchController::new(settings.batch.clone())),
        ))
    }

    pub fn rates(&self) -> &RateResolver {
        &self.rates
    }

    pub fn rules(&self) -> &RulesStore {
        &self.rules
    }

    pub fn batch(&self) -> &BatchController {
        &self.batch
    }

    pub async fn quote(&self, request: QuoteRequest) -> Result<QuoteReport, EngineError> {
        validate_request(&request)?;
        let rules = self.rules.snapshot();
        let mut stages = Vec::new();
        let currency = request.currency.trim().to_uppercase();

        let fx = capture_stage("resolve_exchange_rate", &mut stages, async {
            let resolved = match request.exchange_rate {
                Some(rate) => Ok(ResolvedRate {
                    rate,
                    source: "request",
                    warning: None,
                }),
                None => self.rates.exchange_rate(&currency).await.map_err(rate_error),
            };
            resolved.map(|fx| {
                let output = json!({
                    "currency": currency,
                    "rate": fx.rate,
                    "source": fx.source,
                    "warning": fx.warning,
                });
                StageOutcome::new(fx, output)
            })
        })
        .await?;
        let exchange_rate = fx.rate;

        let (duty, duty_warnings) = capture_stage("resolve_duty", &mut stages, async {
            let (duty, warnings) = self.duty_for(&request).await;
            if duty.is_valid() {
                let output = json!({
                    "hs_rate": duty.hs_rate,
                    "origin_rate": duty.origin_rate,
                    "source": duty.source,
                    "warnings": warnings,
                });
                Ok(StageOutcome::new((duty, warnings), output))
            } else {
                Err(EngineError::invalid_input(
                    "resolve_duty",
                    "duty rates must be finite and non-negative",
                ))
            }
        })
        .await?;

        let weight = capture_stage("chargeable_weight", &mut stages, async {
            let weight = chargeable_weight(request.weight_kg, request.dimensions.as_ref());
            let output = serde_json::to_value(&weight).unwrap_or(Value::Null);
            Ok(StageOutcome::new(weight, output))
        })
        .await?;

        let pricing = capture_stage("solve_price", &mut stages, async {
            let input = PricingInput {
                sku: request.sku.clone(),
                item_cost: request.item_cost,
                exchange_rate,
                weight_kg: weight.chargeable_kg,
                hs_code: request.hs_code.clone(),
                origin_country: request.origin_country.clone(),
                duty: duty.clone(),
                fees: request.fees.clone(),
                shipping: request.shipping.clone(),
                target: request.target,
                mode: request.mode,
            };
            let mut result = solve(&input, &rules.pricing);
            result.warnings.extend(fx.warning.iter().cloned());
            result.warnings.extend(duty_warnings.iter().cloned());
            result.warnings.extend(weight_warning(&weight));
            let output = json!({
                "feasible": result.feasible,
                "price": result.price,
                "revenue": result.revenue,
                "profit": result.profit,
                "profit_rate": result.profit_rate,
                "landed_cost": result.breakdown.landed_total(),
                "warnings": result.warnings,
            });
            Ok(StageOutcome::new(result, output))
        })
        .await?;

        let rating = capture_stage("rate_product", &mut stages, async {
            let rating = rate_product(
                &RatingInput::from_pricing(request.condition, &pricing),
                &rules.rating,
            );
            let output = json!({ "rank": rating.rank, "score": rating.score, "reason": rating.reason });
            Ok(StageOutcome::new(rating, output))
        })
        .await?;

        let zones = capture_stage("validate_zones", &mut stages, async {
            let zone_set = request.zones.as_deref().unwrap_or(&rules.zones);
            let validation = validate_zones(&listing_terms(&pricing), zone_set, &rules.pricing);
            let output = json!({
                "can_list": validation.can_list,
                "checked": validation.zones.len(),
                "unprofitable_zones": validation.unprofitable_zones,
            });
            Ok(StageOutcome::new(validation, output))
        })
        .await?;

        let comparison = if request.compare && !rules.marketplaces.is_empty() {
            let comparison = capture_stage("compare_marketplaces", &mut stages, async {
                let comparison = compare_marketplaces(&pricing.input, &rules.marketplaces, &rules.pricing);
                let output = json!({
                    "best": comparison.best,
                    "profitable_count": comparison.profitable_count,
                    "average_profit": comparison.average_profit,
                });
                Ok(StageOutcome::new(comparison, output))
            })
            .await?;
            Some(comparison)
        } else {
            None
        };

        info!(
            target = "arbitrage.engine",
            sku = request.sku.as_deref().unwrap_or("-"),
            feasible = pricing.feasible,
            price = pricing.price,
            profit = pricing.profit,
            rank = %rating.rank,
            can_list = zones.can_list,
            "quote computed"
        );

        Ok(QuoteReport {
            quote_id: Uuid::new_v4().to_string(),
            sku: request.sku,
            currency,
            weight,
            pricing,
            rating,
            zones,
            comparison,
            stages,
        })
    }

    pub fn rate(&self, input: &RatingInput) -> RatingResult {
        rate_product(input, &self.rules.snapshot().rating)
    }

    pub fn check_zones(&self, terms: &ZoneListingTerms, zones: Option<&[ZoneConfig]>) -> ZoneValidation {
        let rules = self.rules.snapshot();
        validate_zones(terms, zones.unwrap_or(&rules.zones), &rules.pricing)
    }

    /// Runs the candidate filter against one rules snapshot.
    pub fn decide(&self, product: &ProductContext) -> ListingDecision {
        let rules = self.rules.snapshot();
        let decision = decide(product, &rules.strategy, &rules.pricing);
        info!(
            target = "arbitrage.engine",
            sku = product.sku.as_deref().unwrap_or("-"),
            status = ?decision.status,
            candidates = decision.candidates.len(),
            recommended = %decision
                .recommended
                .as_ref()
                .map(|c| format!("{}/{}", c.platform, c.account))
                .unwrap_or_default(),
            "listing decided"
        );
        decision
    }

    /// Prices every item through the batch controller. Items without a SKU
    /// get positional task ids. `limit` can lower the worker count for this
    /// batch only.
    pub async fn quote_batch(
        &self,
        items: Vec<QuoteRequest>,
        limit: Option<usize>,
        hooks: &BatchHooks<QuoteReport>,
    ) -> BatchReport<QuoteReport> {
        let tasks = items
            .into_iter()
            .enumerate()
            .map(|(idx, item)| {
                let id = item
                    .sku
                    .clone()
                    .filter(|s| !s.trim().is_empty())
                    .unwrap_or_else(|| format!("item-{}", idx + 1));
                let priority = item.priority;
                BatchTask::new(id, item).with_priority(priority)
            })
            .collect();
        let engine = self.clone();
        let report = self
            .batch
            .process_batch_limited(
                tasks,
                limit,
                move |request: QuoteRequest| {
                    let engine = engine.clone();
                    async move { engine.quote(request).await }
                },
                hooks,
            )
            .await;
        crate::metrics::batch_finished(report.stats.total, report.stats.failed, report.stats.elapsed_ms);
        report
    }

    async fn duty_for(&self, request: &QuoteRequest) -> (DutyRates, Vec<String>) {
        if let (Some(hs_rate), Some(origin_rate)) = (request.hs_rate, request.origin_rate) {
            return (DutyRates::new(hs_rate, origin_rate), Vec::new());
        }
        let resolved = self
            .rates
            .resolve_duty(request.hs_code.as_deref(), request.origin_country.as_deref())
            .await;
        let mut rates = resolved.rates;
        let mut warnings = resolved.warnings;
        if let Some(hs_rate) = request.hs_rate {
            rates.hs_rate = hs_rate;
            rates.source = DutySource::Supplied;
            warnings.retain(|w| !w.starts_with("HS"));
        }
        if let Some(origin_rate) = request.origin_rate {
            rates.origin_rate = origin_rate;
        }
        (rates, warnings)
    }
}

fn validate_request(request: &QuoteRequest) -> Result<(), EngineError> {
    if !(request.item_cost.is_finite() && request.item_cost > 0.0) {
        return Err(EngineError::invalid_input("validate_input", "item_cost must be positive"));
    }
    if request.currency.trim().is_empty() {
        return Err(EngineError::invalid_input("validate_input", "currency is required"));
    }
    if let Some(rate) = request.exchange_rate
        && !(rate.is_finite() && rate > 0.0)
    {
        return Err(EngineError::invalid_input("validate_input", "exchange_rate must be positive"));
    }
    if !(request.weight_kg.is_finite() && request.weight_kg >= 0.0) {
        return Err(EngineError::invalid_input("validate_input", "weight_kg must be non-negative"));
    }
    Ok(())
}

fn rate_error(err: RateError) -> EngineError {
    match err {
        RateError::UnknownCurrency(_) => EngineError::invalid_input("resolve_exchange_rate", err.to_string()),
        RateError::Source { .. } => EngineError::internal("resolve_exchange_rate", err.to_string()),
    }
}

fn weight_warning(weight: &ChargeableWeight) -> Option<String> {
    weight.volumetric_applied.then(|| {
        format!(
            "volumetric weight {:.2}kg exceeds actual {:.2}kg",
            weight.chargeable_kg, weight.actual_kg
        )
    })
}

fn listing_terms(pricing: &PricingResult) -> ZoneListingTerms {
    ZoneListingTerms {
        item_cost: pricing.input.item_cost,
        exchange_rate: pricing.input.exchange_rate,
        price: pricing.price,
        fees: pricing.input.fees.clone(),
        fuel_surcharge_rate: pricing.input.shipping.fuel_surcharge_rate,
    }
}

async fn capture_stage<T, Fut>(
    name: &'static str,
    stages: &mut Vec<StageReport>,
    fut: Fut,
) -> Result<T, EngineError>
where
    Fut: Future<Output = Result<StageOutcome<T>, EngineError>>,
{
    let started = Instant::now();
    let outcome = fut.await?;
    let elapsed_ms = started.elapsed().as_millis();
    crate::metrics::stage_elapsed(name, elapsed_ms);
    stages.push(StageReport::new(name, elapsed_ms, outcome.output));
    Ok(outcome.value)
}

#[derive(Debug, Error)]
#[error("stage `{stage}` failed: {message}")]
pub struct EngineError {
    stage: &'static str,
    message: String,
    kind: EngineErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineErrorKind {
    InvalidInput,
    Internal,
}

impl EngineError {
    pub fn invalid_input(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind: EngineErrorKind::InvalidInput,
        }
    }

    pub fn internal(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind: EngineErrorKind::Internal,
        }
    }

    pub fn stage(&self) -> &'static str {
        self.stage
    }

    pub fn kind(&self) -> EngineErrorKind {
        self.kind
    }

    pub fn detail(&self) -> &str {
        &self.message
    }
}

#[derive(Debug)]
pub struct StageOutcome<T> {
    pub value: T,
    pub output: Value,
}

impl<T> StageOutcome<T> {
    fn new(value: T, output: Value) -> Self {
        Self { value, output }
    }
}
