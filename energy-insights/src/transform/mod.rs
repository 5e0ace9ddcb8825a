use crate::config::DurationPolicy;
use crate::pipeline::{Envelope, PipelineError, Transform};
use energy_client::domain::{DeviceUsageRow, ServiceUsage, UsageEvent};
use serde_json::Value;

/// Why a persisted usage record could not become a [`UsageEvent`].
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum PayloadError {
    #[error("usage {0} has no equipment")]
    MissingEquipment(String),
    #[error("device data must be a JSON object")]
    NotAnObject,
    #[error("servicesDetails must be an array")]
    NotAnArray,
    #[error("servicesDetails[{index}]: {reason}")]
    InvalidEntry { index: usize, reason: String },
    #[error("service {service_id} has negative duration {duration_minutes}")]
    NegativeDuration { service_id: String, duration_minutes: f64 },
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawServiceDetail {
    service_id: String,
    duration_minutes: f64,
}

/// Extract the service list from a `device_data` payload.
///
/// A null payload, or a missing or null `servicesDetails`, is an empty list.
/// Anything else that does not match `[{serviceId, durationMinutes}, ...]`
/// is rejected. Extra keys on an entry are ignored.
pub fn parse_service_details(device_data: &Value) -> Result<Vec<ServiceUsage>, PayloadError> {
    let details = match device_data {
        Value::Null => return Ok(Vec::new()),
        Value::Object(map) => match map.get("servicesDetails") {
            None | Some(Value::Null) => return Ok(Vec::new()),
            Some(Value::Array(items)) => items,
            Some(_) => return Err(PayloadError::NotAnArray),
        },
        _ => return Err(PayloadError::NotAnObject),
    };

    details
        .iter()
        .enumerate()
        .map(|(index, item)| {
            let raw: RawServiceDetail = serde_json::from_value(item.clone()).map_err(|e| PayloadError::InvalidEntry {
                index,
                reason: e.to_string(),
            })?;
            if raw.service_id.trim().is_empty() {
                return Err(PayloadError::InvalidEntry {
                    index,
                    reason: "serviceId is empty".to_string(),
                });
            }
            Ok(ServiceUsage {
                service_id: raw.service_id,
                duration_minutes: raw.duration_minutes,
            })
        })
        .collect()
}

/// Convert a persisted row into a validated event.
pub fn usage_event_from_row(row: DeviceUsageRow) -> Result<UsageEvent, PayloadError> {
    let equipment_id = row
        .equipment_id
        .filter(|e| !e.is_empty())
        .ok_or_else(|| PayloadError::MissingEquipment(row.id.clone()))?;
    let services = parse_service_details(&row.device_data.0)?;

    Ok(UsageEvent {
        id: row.id,
        system_id: row.system_id,
        equipment_id,
        services,
        measured_kwh: row.energy_consumption,
        actual_minutes: row.actual_minutes,
        recorded_at: row.ended_at,
    })
}

/// Apply `policy` to every negative service duration of `event`.
pub fn apply_duration_policy(mut event: UsageEvent, policy: DurationPolicy) -> Result<UsageEvent, PayloadError> {
    match policy {
        DurationPolicy::PassThrough => {}
        DurationPolicy::ClampToZero => {
            for svc in event.services.iter_mut().filter(|s| s.duration_minutes < 0.0) {
                metrics::counter!("usage_negative_durations_clamped_total").increment(1);
                svc.duration_minutes = 0.0;
            }
        }
        DurationPolicy::Reject => {
            if let Some(svc) = event.services.iter().find(|s| s.duration_minutes < 0.0) {
                return Err(PayloadError::NegativeDuration {
                    service_id: svc.service_id.clone(),
                    duration_minutes: svc.duration_minutes,
                });
            }
        }
    }
    Ok(event)
}

#[derive(Clone, Default)]
pub struct UsageEventValidation {
    pub policy: DurationPolicy,
}

impl UsageEventValidation {
    pub fn new(policy: DurationPolicy) -> Self {
        Self { policy }
    }
}

#[async_trait::async_trait]
impl Transform<UsageEvent, UsageEvent> for UsageEventValidation {
    async fn apply(&self, input: Envelope<UsageEvent>) -> Result<Envelope<UsageEvent>, PipelineError> {
        let Envelope { payload, received_at } = input;
        let usage_id = payload.id.clone();
        match apply_duration_policy(payload, self.policy) {
            Ok(payload) => Ok(Envelope { payload, received_at }),
            Err(e) => {
                metrics::counter!("usage_validation_rejected_total").increment(1);
                Err(PipelineError::Transform(format!("usage {usage_id}: {e}")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sqlx::types::Json;
    use time::macros::datetime;

    fn row(equipment_id: Option<&str>, device_data: Value) -> DeviceUsageRow {
        DeviceUsageRow {
            id: "usage-1".to_string(),
            system_id: "sys-1".to_string(),
            equipment_id: equipment_id.map(str::to_string),
            device_data: Json(device_data),
            energy_consumption: Some(4.2),
            actual_minutes: Some(35.0),
            ended_at: datetime!(2024-05-01 10:00:00 UTC),
        }
    }

    #[test]
    fn parses_service_details_ignoring_extra_keys() {
        let data = json!({
            "servicesDetails": [
                {"serviceId": "laser", "durationMinutes": 20, "serviceName": "Laser"},
                {"serviceId": "peel", "durationMinutes": 12.5}
            ],
            "plugId": "shelly-1"
        });

        let services = parse_service_details(&data).unwrap();

        assert_eq!(services.len(), 2);
        assert_eq!(services[0].service_id, "laser");
        assert_eq!(services[0].duration_minutes, 20.0);
        assert_eq!(services[1].duration_minutes, 12.5);
    }

    #[test]
    fn absent_service_list_is_empty() {
        assert!(parse_service_details(&Value::Null).unwrap().is_empty());
        assert!(parse_service_details(&json!({})).unwrap().is_empty());
        assert!(parse_service_details(&json!({"servicesDetails": null})).unwrap().is_empty());
    }

    #[test]
    fn malformed_payloads_are_rejected() {
        assert_eq!(parse_service_details(&json!("laser")), Err(PayloadError::NotAnObject));
        assert_eq!(
            parse_service_details(&json!({"servicesDetails": {"serviceId": "laser"}})),
            Err(PayloadError::NotAnArray)
        );
        assert!(matches!(
            parse_service_details(&json!({"servicesDetails": [{"serviceId": "laser", "durationMinutes": "ten"}]})),
            Err(PayloadError::InvalidEntry { index: 0, .. })
        ));
        assert!(matches!(
            parse_service_details(&json!({"servicesDetails": [
                {"serviceId": "laser", "durationMinutes": 10},
                {"durationMinutes": 10}
            ]})),
            Err(PayloadError::InvalidEntry { index: 1, .. })
        ));
        assert!(matches!(
            parse_service_details(&json!({"servicesDetails": [{"serviceId": " ", "durationMinutes": 10}]})),
            Err(PayloadError::InvalidEntry { index: 0, .. })
        ));
    }

    #[test]
    fn row_without_equipment_is_rejected() {
        let res = usage_event_from_row(row(None, json!({})));
        assert_eq!(res, Err(PayloadError::MissingEquipment("usage-1".to_string())));
    }

    #[test]
    fn row_converts_to_event() {
        let data = json!({"servicesDetails": [{"serviceId": "laser", "durationMinutes": 10}]});

        let event = usage_event_from_row(row(Some("eq-1"), data)).unwrap();

        assert_eq!(event.equipment_id, "eq-1");
        assert_eq!(event.measured_kwh, Some(4.2));
        assert_eq!(event.services.len(), 1);
    }

    #[test]
    fn duration_policies() {
        let data = json!({"servicesDetails": [
            {"serviceId": "laser", "durationMinutes": 10},
            {"serviceId": "peel", "durationMinutes": -3}
        ]});
        let event = usage_event_from_row(row(Some("eq-1"), data)).unwrap();

        let kept = apply_duration_policy(event.clone(), DurationPolicy::PassThrough).unwrap();
        assert_eq!(kept.services[1].duration_minutes, -3.0);

        let clamped = apply_duration_policy(event.clone(), DurationPolicy::ClampToZero).unwrap();
        assert_eq!(clamped.services[1].duration_minutes, 0.0);
        assert_eq!(clamped.services[0].duration_minutes, 10.0);

        let rejected = apply_duration_policy(event, DurationPolicy::Reject);
        assert!(matches!(rejected, Err(PayloadError::NegativeDuration { .. })));
    }

    #[tokio::test]
    async fn validation_transform_maps_rejection_to_pipeline_error() {
        let data = json!({"servicesDetails": [{"serviceId": "peel", "durationMinutes": -3}]});
        let event = usage_event_from_row(row(Some("eq-1"), data)).unwrap();
        let env = Envelope {
            payload: event,
            received_at: std::time::SystemTime::now(),
        };

        let res = UsageEventValidation::new(DurationPolicy::Reject).apply(env).await;

        assert!(matches!(res, Err(PipelineError::Transform(_))));
    }
}
