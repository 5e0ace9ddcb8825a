use anyhow::{bail, Result};
use energy_client::domain::UsageEvent;
use energy_insights::{
    anomaly::InsightRules,
    config::AppConfig,
    metrics_server, observability,
    pipeline::Pipeline,
    sinks::{InsightSink, PgInsightWriter},
    sources::CompletedUsageSource,
    store::ConfiguredProfileStore,
    transform::UsageEventValidation,
    ExpectedEnergyEstimator,
};
use sqlx::postgres::PgPoolOptions;
use std::{env, sync::Arc, time::Duration};

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        bail!("usage: energy-insights <system_id>");
    }
    let system_id = &args[1];

    let cfg = AppConfig::load()?;

    if let Some(metrics_cfg) = &cfg.metrics {
        metrics_server::init(&metrics_cfg.bind_addr)?;
    }

    let pool = PgPoolOptions::new()
        .max_connections(cfg.database.max_connections)
        .connect(&cfg.database.uri)
        .await?;

    let store = ConfiguredProfileStore::connect(pool.clone(), system_id, cfg.estimator.preload_profiles).await?;
    let estimator = ExpectedEnergyEstimator::new(store).with_min_samples(cfg.estimator.min_samples);

    let eval = &cfg.evaluation;
    let sink = InsightSink::new(
        estimator,
        InsightRules::from(&cfg.anomaly),
        PgInsightWriter::new(pool.clone()),
        eval.batch_size,
        eval.max_retries,
        Duration::from_millis(eval.retry_backoff_ms),
    );

    tracing::info!(system_id = %system_id, lookback_days = eval.lookback_days, "evaluating completed usages");

    let pipeline: Pipeline<_, UsageEvent, _> = Pipeline {
        source: CompletedUsageSource::last_days(pool, system_id.clone(), eval.lookback_days),
        transforms: vec![Arc::new(UsageEventValidation::new(cfg.estimator.duration_policy))],
        sink,
    };

    pipeline.run().await?;

    Ok(())
}
