use anyhow::Result;
use sqlx::PgPool;
use time::OffsetDateTime;

use crate::domain::DeviceUsageRow;

/// Completed equipment sessions of one tenant that ended in `[start, end)`.
pub async fn completed_usages(
    pool: &PgPool,
    system_id: &str,
    start: OffsetDateTime,
    end: OffsetDateTime,
) -> Result<Vec<DeviceUsageRow>> {
    let rows = sqlx::query_as::<_, DeviceUsageRow>(
        r#"
        SELECT
            id,
            system_id,
            equipment_id,
            device_data,
            energy_consumption,
            actual_minutes,
            ended_at
        FROM appointment_device_usages
        WHERE system_id = $1
          AND current_status = 'COMPLETED'
          AND ended_at >= $2
          AND ended_at <  $3
        ORDER BY ended_at
        "#,
    )
    .bind(system_id)
    .bind(start)
    .bind(end)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
