use anyhow::Result;
use sqlx::PgPool;

use crate::domain::EnergyProfile;

const PROFILE_COLUMNS: &str = r#"
    system_id,
    equipment_id,
    service_id,
    avg_kwh_per_min,
    std_dev_kwh_per_min,
    avg_minutes,
    std_dev_minutes,
    sample_count,
    m2_kwh_per_min,
    m2_minutes
"#;

/// Fetch the profiles of `service_ids` on one piece of equipment in a single round trip.
pub async fn find_profiles(
    pool: &PgPool,
    system_id: &str,
    equipment_id: &str,
    service_ids: &[String],
) -> Result<Vec<EnergyProfile>> {
    if service_ids.is_empty() {
        return Ok(Vec::new());
    }

    let sql = format!(
        r#"
        SELECT {PROFILE_COLUMNS}
        FROM service_energy_profiles
        WHERE system_id = $1
          AND equipment_id = $2
          AND service_id = ANY($3)
        "#
    );

    let rows = sqlx::query_as::<_, EnergyProfile>(&sql)
        .bind(system_id)
        .bind(equipment_id)
        .bind(service_ids)
        .fetch_all(pool)
        .await?;

    Ok(rows)
}

/// Every profile of a tenant, for preloading an in-memory snapshot.
pub async fn load_profiles(pool: &PgPool, system_id: &str) -> Result<Vec<EnergyProfile>> {
    let sql = format!(
        r#"
        SELECT {PROFILE_COLUMNS}
        FROM service_energy_profiles
        WHERE system_id = $1
        ORDER BY equipment_id, service_id
        "#
    );

    let rows = sqlx::query_as::<_, EnergyProfile>(&sql)
        .bind(system_id)
        .fetch_all(pool)
        .await?;

    Ok(rows)
}

/// Insert or fully replace the profile stored under the same key.
pub async fn upsert_profile(pool: &PgPool, profile: &EnergyProfile) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO service_energy_profiles (
            system_id,
            equipment_id,
            service_id,
            avg_kwh_per_min,
            std_dev_kwh_per_min,
            avg_minutes,
            std_dev_minutes,
            sample_count,
            m2_kwh_per_min,
            m2_minutes,
            updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, NOW())
        ON CONFLICT (system_id, equipment_id, service_id) DO UPDATE SET
            avg_kwh_per_min     = EXCLUDED.avg_kwh_per_min,
            std_dev_kwh_per_min = EXCLUDED.std_dev_kwh_per_min,
            avg_minutes         = EXCLUDED.avg_minutes,
            std_dev_minutes     = EXCLUDED.std_dev_minutes,
            sample_count        = EXCLUDED.sample_count,
            m2_kwh_per_min      = EXCLUDED.m2_kwh_per_min,
            m2_minutes          = EXCLUDED.m2_minutes,
            updated_at          = NOW()
        "#,
    )
    .bind(&profile.system_id)
    .bind(&profile.equipment_id)
    .bind(&profile.service_id)
    .bind(profile.avg_kwh_per_min)
    .bind(profile.std_dev_kwh_per_min)
    .bind(profile.avg_minutes)
    .bind(profile.std_dev_minutes)
    .bind(profile.sample_count)
    .bind(profile.m2_kwh_per_min)
    .bind(profile.m2_minutes)
    .execute(pool)
    .await?;

    Ok(())
}
