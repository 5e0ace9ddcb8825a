use serde::Serialize;
use time::OffsetDateTime;

/// An open finding about one device usage.
///
/// `actual_kwh` is absent for duration findings on sessions without a meter
/// reading; `actual_minutes` is absent for energy findings on sessions
/// without a recorded duration.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize)]
pub struct UsageInsight {
    pub system_id: String,
    pub device_usage_id: String,
    pub equipment_id: String,
    pub insight_type: String,
    pub actual_kwh: Option<f64>,
    pub expected_kwh: f64,
    pub std_dev_sum: f64,
    pub actual_minutes: Option<f64>,
    pub expected_minutes: f64,
    pub deviation_pct: f64,
    pub confidence: String,
    #[serde(with = "time::serde::rfc3339")]
    pub detected_at: OffsetDateTime,
}
