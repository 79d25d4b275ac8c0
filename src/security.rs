use arbitrage_engine::models::ApiError;
use axum::{
    Json,
    body::Body,
    extract::State,
    http::{self, Request, StatusCode, header::HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::{collections::HashMap, convert::Infallible, env, sync::Arc, time::Instant};
use tokio::sync::Mutex;
use tracing::{info, warn};

const KEY_HEADER: &str = "X-Engine-Key";
const DEFAULT_KEYS: &str = "demo-org:demo-key";

#[derive(Clone)]
pub struct AuthState {
    keys: Arc<HashMap<String, AuthContext>>,
    limiter: Arc<TokenBuckets>,
}

/// Caller identity attached to authenticated requests.
#[derive(Clone, Debug)]
pub struct AuthContext {
    pub org_id: String,
    pub api_key_id: String,
}

impl AuthState {
    pub fn from_env() -> Self {
        let raw = env::var("ENGINE_API_KEYS").unwrap_or_else(|_| DEFAULT_KEYS.to_string());
        let rate = env_f64("RATE_LIMIT_PER_SEC").filter(|v| *v > 0.0).unwrap_or(5.0);
        let capacity = env_f64("RATE_LIMIT_CAPACITY").filter(|v| *v >= 1.0).unwrap_or(10.0);
        Self::new(&raw, rate, capacity)
    }

    pub fn new(raw_keys: &str, rate_per_sec: f64, capacity: f64) -> Self {
        let mut keys = parse_api_keys(raw_keys);
        if keys.is_empty() {
            warn!(target = "arbitrage.api", "ENGINE_API_KEYS produced no keys; using demo credentials");
            keys = parse_api_keys(DEFAULT_KEYS);
        } else {
            info!(target = "arbitrage.api", key_count = keys.len(), "loaded API keys");
        }
        Self {
            keys: Arc::new(keys),
            limiter: Arc::new(TokenBuckets::new(rate_per_sec, capacity)),
        }
    }
}

pub async fn require_api_auth(
    State(state): State<AuthState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, Infallible> {
    let Some(presented) = extract_api_key(request.headers()) else {
        return Ok(reject(
            StatusCode::UNAUTHORIZED,
            "missing_api_key",
            "Provide X-Engine-Key or Bearer token",
        ));
    };
    let Some(context) = state.keys.get(&presented).cloned() else {
        return Ok(reject(StatusCode::UNAUTHORIZED, "invalid_api_key", "Key not recognized"));
    };

    match state.limiter.consume(&context.org_id, Instant::now()).await {
        Ok(quota) => {
            request.extensions_mut().insert(context);
            let mut response = next.run(request).await;
            quota.apply_headers(response.headers_mut());
            Ok(response)
        }
        Err(quota) => {
            warn!(target = "arbitrage.api", org_id = %context.org_id, "rate limited");
            let mut response = reject(StatusCode::TOO_MANY_REQUESTS, "rate_limited", "Too many requests");
            quota.apply_headers(response.headers_mut());
            Ok(response)
        }
    }
}

fn extract_api_key(headers: &http::HeaderMap) -> Option<String> {
    let bearer = headers
        .get(http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|raw| raw.split_once(' '))
        .filter(|(scheme, _)| scheme.eq_ignore_ascii_case("bearer"))
        .map(|(_, token)| token.trim().to_string());
    bearer
        .or_else(|| {
            headers
                .get(KEY_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.trim().to_string())
        })
        .filter(|v| !v.is_empty())
}

fn reject(status: StatusCode, code: &str, message: &str) -> Response {
    let payload = ApiError {
        error: code.to_string(),
        detail: Some(message.to_string()),
    };
    (status, Json(payload)).into_response()
}

/// Parses `org:key,org:key`. Malformed entries are skipped.
fn parse_api_keys(raw: &str) -> HashMap<String, AuthContext> {
    let mut keys = HashMap::new();
    for (idx, entry) in raw.split(',').map(str::trim).filter(|e| !e.is_empty()).enumerate() {
        match entry.split_once(':').map(|(org, key)| (org.trim(), key.trim())) {
            Some((org, key)) if !org.is_empty() && !key.is_empty() => {
                keys.insert(
                    key.to_string(),
                    AuthContext {
                        org_id: org.to_string(),
                        api_key_id: format!("key-{:02}", idx + 1),
                    },
                );
            }
            _ => warn!(target = "arbitrage.api", "ignored malformed ENGINE_API_KEYS entry: {entry}"),
        }
    }
    keys
}

fn env_f64(key: &str) -> Option<f64> {
    env::var(key).ok().and_then(|v| v.trim().parse::<f64>().ok())
}

/// Per-org token buckets refilled continuously.
struct TokenBuckets {
    rate_per_sec: f64,
    capacity: f64,
    buckets: Mutex<HashMap<String, Bucket>>,
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBuckets {
    fn new(rate_per_sec: f64, capacity: f64) -> Self {
        Self {
            rate_per_sec,
            capacity,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    async fn consume(&self, org: &str, now: Instant) -> Result<Quota, Quota> {
        let mut guard = self.buckets.lock().await;
        let bucket = guard.entry(org.to_string()).or_insert_with(|| Bucket {
            tokens: self.capacity,
            last_refill: now,
        });
        let elapsed = now.saturating_duration_since(bucket.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            bucket.tokens = (bucket.tokens + elapsed * self.rate_per_sec).min(self.capacity);
            bucket.last_refill = now;
        }

        let granted = bucket.tokens >= 1.0;
        if granted {
            bucket.tokens -= 1.0;
        }
        let quota = Quota {
            limit: self.capacity,
            remaining: bucket.tokens,
            reset_secs: (self.capacity - bucket.tokens) / self.rate_per_sec,
            retry_after_secs: (!granted).then(|| (1.0 - bucket.tokens) / self.rate_per_sec),
        };
        if granted { Ok(quota) } else { Err(quota) }
    }
}

#[derive(Debug, Clone)]
struct Quota {
    limit: f64,
    remaining: f64,
    reset_secs: f64,
    retry_after_secs: Option<f64>,
}

impl Quota {
    fn apply_headers(&self, headers: &mut http::HeaderMap) {
        let mut put = |name: &'static str, value: u64| {
            headers.insert(name, HeaderValue::from(value));
        };
        put("X-RateLimit-Limit", self.limit as u64);
        put("X-RateLimit-Remaining", self.remaining.max(0.0).floor() as u64);
        put("X-RateLimit-Reset", self.reset_secs.ceil().max(0.0) as u64);
        if let Some(retry) = self.retry_after_secs {
            put("Retry-After", retry.ceil().max(1.0) as u64);
        }
    }
}
