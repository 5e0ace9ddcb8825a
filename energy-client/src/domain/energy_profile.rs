use serde::{Deserialize, Serialize};

/// Per-service energy rate for one piece of equipment within a tenant.
///
/// At most one row exists per `(system_id, equipment_id, service_id)`. The
/// `m2_*` columns hold the running sum of squared deviations so a profile can
/// be rebuilt or extended without replaying its samples.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize, Deserialize)]
pub struct EnergyProfile {
    pub system_id: String,
    pub equipment_id: String,
    pub service_id: String,
    pub avg_kwh_per_min: f64,
    pub std_dev_kwh_per_min: f64,
    pub avg_minutes: f64,
    pub std_dev_minutes: f64,
    pub sample_count: i64,
    pub m2_kwh_per_min: f64,
    pub m2_minutes: f64,
}

impl EnergyProfile {
    /// A profile carrying only the rate statistics, with no training history.
    pub fn with_rate(
        system_id: impl Into<String>,
        equipment_id: impl Into<String>,
        service_id: impl Into<String>,
        avg_kwh_per_min: f64,
        std_dev_kwh_per_min: f64,
    ) -> Self {
        Self {
            system_id: system_id.into(),
            equipment_id: equipment_id.into(),
            service_id: service_id.into(),
            avg_kwh_per_min,
            std_dev_kwh_per_min,
            avg_minutes: 0.0,
            std_dev_minutes: 0.0,
            sample_count: 0,
            m2_kwh_per_min: 0.0,
            m2_minutes: 0.0,
        }
    }
}
