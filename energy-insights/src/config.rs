use serde::Deserialize;
use std::fs;

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub uri: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

/// What to do with a service entry whose duration is negative.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DurationPolicy {
    /// Keep the value; a negative duration subtracts from the estimate.
    #[default]
    PassThrough,
    ClampToZero,
    /// Reject the whole usage event.
    Reject,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    /// Profiles trained on fewer samples are ignored.
    pub min_samples: u32,
    pub duration_policy: DurationPolicy,
    /// Load every profile of the tenant once instead of querying per event.
    pub preload_profiles: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnomalyConfig {
    pub min_deviation_pct: f64,
    pub std_dev_multiplier: f64,
    pub min_margin_ratio: f64,
    /// Sessions whose real length differs from the profiled length by more
    /// than this percentage are flagged.
    pub max_duration_deviation_pct: f64,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            min_deviation_pct: 25.0,
            std_dev_multiplier: 2.0,
            min_margin_ratio: 0.25,
            max_duration_deviation_pct: 20.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    pub lookback_days: i64,
    pub batch_size: usize,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            lookback_days: 30,
            batch_size: 500,
            max_retries: 3,
            retry_backoff_ms: 200,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub bind_addr: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub estimator: EstimatorConfig,
    #[serde(default)]
    pub anomaly: AnomalyConfig,
    #[serde(default)]
    pub evaluation: EvaluationConfig,
    pub metrics: Option<MetricsConfig>,
}

fn default_max_connections() -> u32 {
    5
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        use std::env;

        let path = env::var("ENERGY_INSIGHTS_CONFIG").unwrap_or_else(|_| "energy-insights.toml".to_string());
        let contents = fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("failed to read config {path}: {e}"))?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> anyhow::Result<Self> {
        let cfg: AppConfig = toml::from_str(contents)?;
        if cfg.evaluation.batch_size == 0 {
            anyhow::bail!("evaluation.batch_size must be at least 1");
        }
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_fills_defaults() {
        let cfg = AppConfig::from_toml_str(
            r#"
            [database]
            uri = "postgres://localhost/clinic"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.database.max_connections, 5);
        assert_eq!(cfg.estimator.min_samples, 0);
        assert_eq!(cfg.estimator.duration_policy, DurationPolicy::PassThrough);
        assert!(!cfg.estimator.preload_profiles);
        assert_eq!(cfg.anomaly.min_deviation_pct, 25.0);
        assert_eq!(cfg.anomaly.max_duration_deviation_pct, 20.0);
        assert_eq!(cfg.evaluation.lookback_days, 30);
        assert!(cfg.metrics.is_none());
    }

    #[test]
    fn duration_policy_uses_snake_case() {
        let cfg = AppConfig::from_toml_str(
            r#"
            [database]
            uri = "postgres://localhost/clinic"

            [estimator]
            duration_policy = "clamp_to_zero"
            min_samples = 5
            "#,
        )
        .unwrap();

        assert_eq!(cfg.estimator.duration_policy, DurationPolicy::ClampToZero);
        assert_eq!(cfg.estimator.min_samples, 5);
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let res = AppConfig::from_toml_str(
            r#"
            [database]
            uri = "postgres://localhost/clinic"

            [evaluation]
            batch_size = 0
            "#,
        );
        assert!(res.is_err());
    }
}
