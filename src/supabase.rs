use crate::{
    http::build_client,
    rates::{
        RateError, RateSource,
        tariff::{dotted_hs_code, parse_rate_text},
    },
};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, de::DeserializeOwned};
use serde_with::{DisplayFromStr, PickFirst, serde_as};
use tracing::debug;

const SOURCE_NAME: &str = "supabase";
const ORIGIN_CURRENCY: &str = "JPY";

/// Rate source backed by the PostgREST tables `exchange_rates`,
/// `hts_codes_details` and `country_additional_tariffs`.
#[derive(Debug, Clone)]
pub struct SupabaseRateSource {
    base_url: String,
    service_key: String,
    http: Client,
}

// PostgREST renders `numeric` columns as strings or numbers depending on the
// column definition.
#[serde_as]
#[derive(Debug, Deserialize)]
struct ExchangeRateRow {
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    #[serde(default)]
    safe_rate: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct HtsRow {
    general_rate: Option<String>,
}

#[serde_as]
#[derive(Debug, Deserialize)]
struct SurchargeRow {
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    #[serde(default)]
    additional_rate: Option<f64>,
}

impl SupabaseRateSource {
    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var("SUPABASE_URL").ok()?;
        let service_key = std::env::var("SUPABASE_SERVICE_ROLE_KEY")
            .or_else(|_| std::env::var("SUPABASE_SERVICE_KEY"))
            .or_else(|_| std::env::var("SUPABASE_KEY"))
            .ok()?;
        Some(Self::new(&base_url, service_key))
    }

    pub fn new(base_url: &str, service_key: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            service_key,
            http: build_client(),
        }
    }

    async fn select<T: DeserializeOwned>(&self, table: &str, query: &str) -> Result<Vec<T>, RateError> {
        let url = format!("{}/rest/v1/{table}?{query}", self.base_url);
        let response = self
            .http
            .get(url)
            .header("apikey", &self.service_key)
            .header("Authorization", format!("Bearer {}", self.service_key))
            .send()
            .await
            .map_err(|err| source_error(format!("{table}: {err}")))?;

        if !response.status().is_success() {
            return Err(source_error(format!("{table}: HTTP {}", response.status())));
        }

        response
            .json()
            .await
            .map_err(|err| source_error(format!("{table}: invalid response: {err}")))
    }
}

fn source_error(message: String) -> RateError {
    RateError::Source {
        source_name: SOURCE_NAME,
        message,
    }
}

#[async_trait]
impl RateSource for SupabaseRateSource {
    fn name(&self) -> &'static str {
        SOURCE_NAME
    }

    /// Rows store destination units per yen, so the answer is inverted.
    async fn exchange_rate(&self, currency: &str) -> Result<Option<f64>, RateError> {
        let query = format!(
            "currency_from=eq.{ORIGIN_CURRENCY}&currency_to=eq.{currency}&select=safe_rate&limit=1"
        );
        let rows: Vec<ExchangeRateRow> = self.select("exchange_rates", &query).await?;
        let per_yen = rows
            .into_iter()
            .next()
            .and_then(|row| row.safe_rate)
            .filter(|r| r.is_finite() && *r > 0.0);
        Ok(per_yen.map(|r| 1.0 / r))
    }

    async fn hs_duty_rate(&self, hs_code: &str) -> Result<Option<f64>, RateError> {
        let dotted = dotted_hs_code(hs_code);
        let query = format!(
            "or=(hts_number.eq.{hs_code},hts_number.eq.{dotted})&select=general_rate&limit=1"
        );
        let rows: Vec<HtsRow> = self.select("hts_codes_details", &query).await?;
        let rate = rows
            .into_iter()
            .next()
            .and_then(|row| row.general_rate)
            .and_then(|text| parse_rate_text(&text));
        debug!(target = "arbitrage.rates", hs_code, ?rate, "hts lookup");
        Ok(rate)
    }

    async fn origin_surcharge(&self, country: &str) -> Result<Option<f64>, RateError> {
        let query = format!(
            "country_code=eq.{country}&is_active=eq.true&select=additional_rate&limit=1"
        );
        let rows: Vec<SurchargeRow> = self.select("country_additional_tariffs", &query).await?;
        Ok(rows.into_iter().next().and_then(|row| row.additional_rate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_columns_accept_strings_and_numbers() {
        let rows: Vec<SurchargeRow> =
            serde_json::from_str(r#"[{"additional_rate":"0.25"},{"additional_rate":0.15},{}]"#)
                .unwrap();
        let rates: Vec<_> = rows.into_iter().map(|r| r.additional_rate).collect();
        assert_eq!(rates, vec![Some(0.25), Some(0.15), None]);

        let fx: Vec<ExchangeRateRow> =
            serde_json::from_str(r#"[{"safe_rate":"0.0065"}]"#).unwrap();
        assert_eq!(fx[0].safe_rate, Some(0.0065));
    }

    #[test]
    fn base_url_is_trimmed() {
        let source = SupabaseRateSource::new("https://example.supabase.co/", "key".into());
        assert_eq!(source.base_url, "https://example.supabase.co");
        assert_eq!(source.name(), "supabase");
    }
}
