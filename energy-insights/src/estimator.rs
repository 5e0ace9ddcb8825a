//! Expected energy of a usage event from per-service energy profiles.
//!
//! Each service performed during a session contributes
//! `duration_minutes * avg_kwh_per_min` to the expected energy and
//! `duration_minutes * std_dev_kwh_per_min` to the summed standard deviation.
//! Its profile's `avg_minutes` is added to the expected session length.
//! Services without a usable profile contribute nothing; they are reported in
//! [`EstimationResult::missing_services`] and lower the [`Confidence`].

use std::collections::HashMap;

use energy_client::domain::{EnergyProfile, UsageEvent};

use crate::store::ProfileStore;

#[derive(thiserror::Error, Debug)]
pub enum EstimateError {
    #[error("energy profile lookup failed: {0}")]
    Lookup(#[source] anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confidence {
    High,
    Medium,
    Low,
    InsufficientData,
}

impl Confidence {
    /// Grade from the share of service entries that had a profile.
    pub fn from_coverage(profiled: usize, total: usize) -> Self {
        if profiled == 0 || total == 0 {
            return Self::InsufficientData;
        }
        let coverage = profiled as f64 / total as f64;
        if coverage >= 0.8 {
            Self::High
        } else if coverage >= 0.5 {
            Self::Medium
        } else {
            Self::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
            Self::InsufficientData => "insufficient_data",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EstimationResult {
    pub expected_kwh: f64,
    pub std_dev_sum: f64,
    /// Sum of the profiled services' average real minutes.
    pub expected_minutes: f64,
    /// Service entries that had a usable profile.
    pub profiled_services: usize,
    pub total_services: usize,
    /// Service ids skipped for lack of a usable profile, in event order.
    pub missing_services: Vec<String>,
    pub confidence: Confidence,
}

impl EstimationResult {
    fn empty() -> Self {
        Self {
            expected_kwh: 0.0,
            std_dev_sum: 0.0,
            expected_minutes: 0.0,
            profiled_services: 0,
            total_services: 0,
            missing_services: Vec::new(),
            confidence: Confidence::InsufficientData,
        }
    }
}

pub struct ExpectedEnergyEstimator<S> {
    store: S,
    min_samples: u32,
}

impl<S: ProfileStore> ExpectedEnergyEstimator<S> {
    pub fn new(store: S) -> Self {
        Self { store, min_samples: 0 }
    }

    /// Treat profiles trained on fewer than `min_samples` samples as missing.
    pub fn with_min_samples(mut self, min_samples: u32) -> Self {
        self.min_samples = min_samples;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Estimate the energy `event` should have used.
    ///
    /// Issues at most one profile lookup. The only error is that lookup
    /// failing; missing profiles and an empty service list are not errors.
    pub async fn estimate(&self, event: &UsageEvent) -> Result<EstimationResult, EstimateError> {
        if event.services.is_empty() {
            return Ok(EstimationResult::empty());
        }

        let mut service_ids: Vec<String> = event.services.iter().map(|s| s.service_id.clone()).collect();
        service_ids.sort_unstable();
        service_ids.dedup();

        let profiles = self
            .store
            .find_profiles(&event.system_id, &event.equipment_id, &service_ids)
            .await
            .map_err(|e| {
                metrics::counter!("estimator_lookup_errors_total").increment(1);
                EstimateError::Lookup(e)
            })?;

        let min_samples = i64::from(self.min_samples);
        let by_service: HashMap<&str, &EnergyProfile> = profiles
            .iter()
            .filter(|p| p.sample_count >= min_samples)
            .map(|p| (p.service_id.as_str(), p))
            .collect();

        let mut result = EstimationResult {
            total_services: event.services.len(),
            ..EstimationResult::empty()
        };

        for svc in &event.services {
            match by_service.get(svc.service_id.as_str()) {
                Some(profile) => {
                    result.expected_kwh += svc.duration_minutes * profile.avg_kwh_per_min;
                    result.std_dev_sum += svc.duration_minutes * profile.std_dev_kwh_per_min;
                    result.expected_minutes += profile.avg_minutes;
                    result.profiled_services += 1;
                }
                None => {
                    tracing::debug!(
                        usage_id = %event.id,
                        equipment_id = %event.equipment_id,
                        service_id = %svc.service_id,
                        "no usable energy profile, service skipped"
                    );
                    result.missing_services.push(svc.service_id.clone());
                }
            }
        }

        if !result.missing_services.is_empty() {
            metrics::counter!("estimator_missing_profiles_total").increment(result.missing_services.len() as u64);
        }
        result.confidence = Confidence::from_coverage(result.profiled_services, result.total_services);
        metrics::counter!("estimator_estimates_total").increment(1);

        Ok(result)
    }
}
