use crate::{
    batch::BatchConfig,
    pricing::{MarketplaceProfile, SolverConfig},
    rating::RatingThresholds,
    strategy::{RuleError, StrategyConfig, rules::validate_rules},
    zones::ZoneConfig,
};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::{
    path::{Path, PathBuf},
    str::FromStr,
    sync::{Arc, RwLock},
    time::Duration,
};
use thiserror::Error;
use tracing::{info, warn};

/// Process settings read once from the environment.
pub static SETTINGS: Lazy<EngineSettings> = Lazy::new(EngineSettings::from_env);

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub port: u16,
    pub batch: BatchConfig,
    pub rate_cache_ttl: Duration,
    pub rules_path: Option<PathBuf>,
    pub queue_capacity: usize,
    pub request_max_bytes: usize,
    pub idempotency_ttl_secs: u64,
    /// How long finished batch jobs stay queryable.
    pub job_ttl: Duration,
}

impl EngineSettings {
    pub fn from_env() -> Self {
        let defaults = BatchConfig::default();
        Self {
            port: env_or("PORT", 8000),
            batch: BatchConfig {
                concurrency: env_positive("BATCH_CONCURRENCY", defaults.concurrency),
                task_timeout: Duration::from_secs(env_positive("BATCH_TASK_TIMEOUT_SECS", 120)),
                max_retries: env_or("BATCH_MAX_RETRIES", defaults.max_retries),
                retry_delay: Duration::from_millis(env_or("BATCH_RETRY_DELAY_MS", 2_000)),
                min_free_memory_bytes: env_or("BATCH_MIN_FREE_MEMORY_MB", 256u64) * 1024 * 1024,
            },
            rate_cache_ttl: Duration::from_secs(env_positive("RATE_CACHE_TTL_SECS", 300)),
            rules_path: std::env::var("RULES_PATH")
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
            queue_capacity: env_positive("QUEUE_CAPACITY", 64),
            request_max_bytes: env_positive("REQUEST_MAX_BYTES", 256 * 1024),
            idempotency_ttl_secs: env_positive("IDEMPOTENCY_TTL_SECS", 3_600),
            job_ttl: Duration::from_secs(env_positive("JOB_TTL_SECS", 3_600)),
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

fn env_positive<T: FromStr + PartialOrd + Default>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .filter(|v| *v > T::default())
        .unwrap_or(default)
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid rules file {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
    #[error("invalid strategy rules: {0}")]
    Rules(#[from] RuleError),
    #[error("no rules file configured")]
    NoPath,
}

/// Tunable business configuration. Every section falls back to built-in
/// defaults when omitted.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RulesConfig {
    pub pricing: SolverConfig,
    pub rating: RatingThresholds,
    pub strategy: StrategyConfig,
    pub marketplaces: Vec<MarketplaceProfile>,
    /// Zones checked when a quote does not bring its own.
    pub zones: Vec<ZoneConfig>,
}

impl RulesConfig {
    pub fn from_yaml(raw: &str, origin: &str) -> Result<Self, ConfigError> {
        let config: RulesConfig = serde_yaml::from_str(raw).map_err(|source| ConfigError::Parse {
            path: origin.to_string(),
            source,
        })?;
        validate_rules(&config.strategy.rules)?;
        Ok(config)
    }
}

/// Hot-swappable rules snapshot. Readers take an `Arc` and keep working on
/// it while a reload swaps in the next one.
#[derive(Debug, Clone)]
pub struct RulesStore {
    path: Option<PathBuf>,
    current: Arc<RwLock<Arc<RulesConfig>>>,
}

impl RulesStore {
    pub fn from_config(config: RulesConfig) -> Self {
        Self {
            path: None,
            current: Arc::new(RwLock::new(Arc::new(config))),
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref().to_path_buf();
        let config = read_rules(&path)?;
        Ok(Self {
            path: Some(path),
            current: Arc::new(RwLock::new(Arc::new(config))),
        })
    }

    /// Loads `path` when given, built-in defaults otherwise.
    pub fn from_settings(settings: &EngineSettings) -> Result<Self, ConfigError> {
        match &settings.rules_path {
            Some(path) => Self::load(path),
            None => Ok(Self::from_config(RulesConfig::default())),
        }
    }

    pub fn snapshot(&self) -> Arc<RulesConfig> {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn replace(&self, config: RulesConfig) {
        let next = Arc::new(config);
        match self.current.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }

    /// Re-reads the rules file. On failure the current snapshot stays.
    pub fn reload(&self) -> Result<Arc<RulesConfig>, ConfigError> {
        let path = self.path.as_ref().ok_or(ConfigError::NoPath)?;
        match read_rules(path) {
            Ok(config) => {
                self.replace(config);
                info!(target = "arbitrage.engine", path = %path.display(), "rules reloaded");
                Ok(self.snapshot())
            }
            Err(err) => {
                warn!(target = "arbitrage.engine", path = %path.display(), error = %err, "rules reload rejected");
                Err(err)
            }
        }
    }
}

fn read_rules(path: &Path) -> Result<RulesConfig, ConfigError> {
    let origin = path.display().to_string();
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: origin.clone(),
        source,
    })?;
    RulesConfig::from_yaml(&raw, &origin)
}
