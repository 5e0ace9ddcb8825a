use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use time::OffsetDateTime;

/// Raw equipment session as persisted by the appointment subsystem.
///
/// `device_data` is free-form JSON; the services performed live under its
/// `servicesDetails` key. Use the validation layer to turn a row into a
/// [`UsageEvent`].
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct DeviceUsageRow {
    pub id: String,
    pub system_id: String,
    pub equipment_id: Option<String>,
    pub device_data: Json<serde_json::Value>,
    pub energy_consumption: Option<f64>,
    pub actual_minutes: Option<f64>,
    #[serde(with = "time::serde::rfc3339")]
    pub ended_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceUsage {
    pub service_id: String,
    pub duration_minutes: f64,
}

/// A validated equipment session.
#[derive(Debug, Clone, PartialEq)]
pub struct UsageEvent {
    pub id: String,
    pub system_id: String,
    pub equipment_id: String,
    pub services: Vec<ServiceUsage>,
    pub measured_kwh: Option<f64>,
    pub actual_minutes: Option<f64>,
    pub recorded_at: OffsetDateTime,
}
