use anyhow::{bail, Result};
use energy_client::domain::UsageEvent;
use energy_insights::{
    anomaly::InsightRules,
    config::AppConfig,
    observability,
    pipeline::Pipeline,
    sinks::{InsightSink, NdjsonInsightWriter},
    sources::UsageNdjsonFileSource,
    store::PgProfileStore,
    transform::UsageEventValidation,
    ExpectedEnergyEstimator,
};
use sqlx::postgres::PgPoolOptions;
use std::{env, sync::Arc, time::Duration};

/// Evaluates an NDJSON export of device usages against the stored profiles
/// and prints detected insights to stdout, one JSON object per line.
#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        bail!("usage: replay_usage_file <ndjson_file_path>");
    }
    let file_path = &args[1];

    let cfg = AppConfig::load()?;

    let pool = PgPoolOptions::new()
        .max_connections(cfg.database.max_connections)
        .connect(&cfg.database.uri)
        .await?;

    let estimator =
        ExpectedEnergyEstimator::new(PgProfileStore::new(pool)).with_min_samples(cfg.estimator.min_samples);

    // Replays are small; flush every insight as soon as it is found.
    let sink = InsightSink::new(
        estimator,
        InsightRules::from(&cfg.anomaly),
        NdjsonInsightWriter::stdout(),
        1,
        cfg.evaluation.max_retries,
        Duration::from_millis(cfg.evaluation.retry_backoff_ms),
    );

    let pipeline: Pipeline<_, UsageEvent, _> = Pipeline {
        source: UsageNdjsonFileSource::new(file_path),
        transforms: vec![Arc::new(UsageEventValidation::new(cfg.estimator.duration_policy))],
        sink,
    };

    pipeline.run().await?;

    Ok(())
}
