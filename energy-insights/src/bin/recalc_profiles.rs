use anyhow::{bail, Result};
use energy_client::db::{profile_queries, usage_queries};
use energy_insights::{
    config::AppConfig,
    observability,
    profiles::{self, ProfileTrainer},
    transform,
};
use sqlx::postgres::PgPoolOptions;
use std::env;
use time::OffsetDateTime;

/// Rebuilds a tenant's energy profiles from its completed sessions.
///
/// Trains on the whole history unless RFC 3339 bounds are given.
#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        bail!("usage: recalc_profiles <system_id> [start_rfc3339] [end_rfc3339]");
    }
    let system_id = &args[1];
    let (start, end) = profiles::training_window(
        args.get(2).map(String::as_str),
        args.get(3).map(String::as_str),
        OffsetDateTime::now_utc(),
    )?;

    let cfg = AppConfig::load()?;

    let pool = PgPoolOptions::new()
        .max_connections(cfg.database.max_connections)
        .connect(&cfg.database.uri)
        .await?;

    tracing::info!(system_id = %system_id, %start, %end, "training energy profiles");
    let rows = usage_queries::completed_usages(&pool, system_id, start, end).await?;

    // Profiles are rebuilt from scratch over the window, never extended.
    let mut trainer = ProfileTrainer::new(system_id.as_str());
    let (mut usages, mut skipped, mut samples) = (0usize, 0usize, 0usize);
    for row in rows {
        let usage_id = row.id.clone();
        let event = match transform::usage_event_from_row(row)
            .and_then(|e| transform::apply_duration_policy(e, cfg.estimator.duration_policy))
        {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(usage_id = %usage_id, error = %e, "usage skipped");
                skipped += 1;
                continue;
            }
        };
        usages += 1;
        samples += trainer.observe(&event);
    }

    let profiles = trainer.finish();
    for profile in &profiles {
        profile_queries::upsert_profile(&pool, profile).await?;
        tracing::debug!(
            equipment_id = %profile.equipment_id,
            service_id = %profile.service_id,
            sample_count = profile.sample_count,
            avg_kwh_per_min = profile.avg_kwh_per_min,
            "profile updated"
        );
    }

    tracing::info!(
        system_id = %system_id,
        usages,
        skipped,
        samples,
        profiles = profiles.len(),
        "energy profiles recalculated"
    );

    Ok(())
}
