use anyhow::Result;
use sqlx::{PgPool, Postgres, QueryBuilder};

use crate::domain::UsageInsight;

const ON_OPEN_CONFLICT: &str = " ON CONFLICT (device_usage_id, insight_type) WHERE resolved = FALSE DO NOTHING";

/// Insert a batch of insights.
///
/// A usage keeps at most one unresolved insight per type; rows that collide
/// with an existing one are dropped. Returns the number of rows written.
pub async fn insert_insights(pool: &PgPool, insights: &[UsageInsight]) -> Result<u64> {
    if insights.is_empty() {
        return Ok(0);
    }

    let result = build_insert(insights).build().execute(pool).await?;
    Ok(result.rows_affected())
}

fn build_insert(insights: &[UsageInsight]) -> QueryBuilder<'_, Postgres> {
    let mut builder = QueryBuilder::<Postgres>::new(
        "INSERT INTO device_usage_insights (system_id, device_usage_id, equipment_id, insight_type, \
         actual_kwh, expected_kwh, std_dev_sum, actual_minutes, expected_minutes, deviation_pct, \
         confidence, detected_at) ",
    );

    builder.push_values(insights, |mut b, i| {
        b.push_bind(&i.system_id)
            .push_bind(&i.device_usage_id)
            .push_bind(&i.equipment_id)
            .push_bind(&i.insight_type)
            .push_bind(i.actual_kwh)
            .push_bind(i.expected_kwh)
            .push_bind(i.std_dev_sum)
            .push_bind(i.actual_minutes)
            .push_bind(i.expected_minutes)
            .push_bind(i.deviation_pct)
            .push_bind(&i.confidence)
            .push_bind(i.detected_at);
    });
    builder.push(ON_OPEN_CONFLICT);
    builder
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn insight(usage_id: &str, insight_type: &str) -> UsageInsight {
        UsageInsight {
            system_id: "sys-1".to_string(),
            device_usage_id: usage_id.to_string(),
            equipment_id: "eq-1".to_string(),
            insight_type: insight_type.to_string(),
            actual_kwh: Some(9.0),
            expected_kwh: 5.0,
            std_dev_sum: 1.0,
            actual_minutes: Some(10.0),
            expected_minutes: 10.0,
            deviation_pct: 80.0,
            confidence: "high".to_string(),
            detected_at: datetime!(2024-05-01 10:00:00 UTC),
        }
    }

    #[test]
    fn duplicate_open_insights_are_ignored_by_the_insert() {
        let rows = vec![insight("u-1", "OVER_CONSUMPTION"), insight("u-1", "OVER_DURATION")];
        let builder = build_insert(&rows);
        let sql = builder.sql().to_string();

        assert!(sql.ends_with(ON_OPEN_CONFLICT));
        assert!(sql.contains("($13, $14, $15, $16, $17, $18, $19, $20, $21, $22, $23, $24)"));
        assert!(!sql.contains("$25"));
    }
}
