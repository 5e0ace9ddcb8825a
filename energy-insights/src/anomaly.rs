use energy_client::domain::{UsageEvent, UsageInsight};
use time::OffsetDateTime;

use crate::{
    config::AnomalyConfig,
    estimator::{Confidence, EstimationResult},
};

pub const OVER_CONSUMPTION: &str = "OVER_CONSUMPTION";
pub const OVER_DURATION: &str = "OVER_DURATION";
pub const UNDER_DURATION: &str = "UNDER_DURATION";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverConsumption {
    /// Absolute deviation from the expected energy, in percent.
    pub deviation_pct: f64,
    /// Measured energy had to exceed this to be flagged.
    pub threshold_kwh: f64,
}

/// Flags sessions that used markedly more energy than their profiles predict.
///
/// A session is flagged when it deviates from the estimate by more than
/// `min_deviation_pct` percent and also exceeds the estimate by more than the
/// larger of `std_dev_multiplier` summed standard deviations and
/// `min_margin_ratio` of the estimate.
#[derive(Debug, Clone, Copy)]
pub struct OverConsumptionRule {
    pub min_deviation_pct: f64,
    pub std_dev_multiplier: f64,
    pub min_margin_ratio: f64,
}

impl Default for OverConsumptionRule {
    fn default() -> Self {
        Self::from(&AnomalyConfig::default())
    }
}

impl From<&AnomalyConfig> for OverConsumptionRule {
    fn from(cfg: &AnomalyConfig) -> Self {
        Self {
            min_deviation_pct: cfg.min_deviation_pct,
            std_dev_multiplier: cfg.std_dev_multiplier,
            min_margin_ratio: cfg.min_margin_ratio,
        }
    }
}

impl OverConsumptionRule {
    pub fn evaluate(&self, actual_kwh: f64, estimate: &EstimationResult) -> Option<OverConsumption> {
        let expected = estimate.expected_kwh;
        if expected <= 0.0 || estimate.confidence == Confidence::InsufficientData {
            return None;
        }

        let deviation_pct = (actual_kwh - expected) / expected * 100.0;
        let margin = (estimate.std_dev_sum * self.std_dev_multiplier).max(expected * self.min_margin_ratio);
        let threshold_kwh = expected + margin;

        if deviation_pct.abs() > self.min_deviation_pct && actual_kwh > threshold_kwh {
            Some(OverConsumption {
                deviation_pct: deviation_pct.abs(),
                threshold_kwh,
            })
        } else {
            None
        }
    }

    /// Evaluate a measured session and build the insight row to store, if any.
    pub fn insight_for(&self, event: &UsageEvent, estimate: &EstimationResult) -> Option<UsageInsight> {
        let finding = self.evaluate(event.measured_kwh?, estimate)?;
        Some(insight(event, estimate, OVER_CONSUMPTION, finding.deviation_pct))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DurationDeviation {
    /// [`OVER_DURATION`] or [`UNDER_DURATION`].
    pub insight_type: &'static str,
    pub deviation_pct: f64,
}

/// Flags sessions whose real length strays from the profiled length.
///
/// Only sessions whose every service has a profile are judged, since a
/// missing profile leaves its minutes out of the expectation.
#[derive(Debug, Clone, Copy)]
pub struct DurationRule {
    pub max_deviation_pct: f64,
}

impl Default for DurationRule {
    fn default() -> Self {
        Self::from(&AnomalyConfig::default())
    }
}

impl From<&AnomalyConfig> for DurationRule {
    fn from(cfg: &AnomalyConfig) -> Self {
        Self {
            max_deviation_pct: cfg.max_duration_deviation_pct,
        }
    }
}

impl DurationRule {
    pub fn evaluate(&self, actual_minutes: f64, estimate: &EstimationResult) -> Option<DurationDeviation> {
        let expected = estimate.expected_minutes;
        let fully_profiled = estimate.profiled_services > 0 && estimate.missing_services.is_empty();
        if !fully_profiled || expected <= 0.0 || actual_minutes <= 0.0 {
            return None;
        }

        let deviation_pct = (actual_minutes - expected) / expected * 100.0;
        if deviation_pct.abs() <= self.max_deviation_pct {
            return None;
        }

        Some(DurationDeviation {
            insight_type: if deviation_pct > 0.0 { OVER_DURATION } else { UNDER_DURATION },
            deviation_pct: deviation_pct.abs(),
        })
    }

    pub fn insight_for(&self, event: &UsageEvent, estimate: &EstimationResult) -> Option<UsageInsight> {
        let finding = self.evaluate(event.actual_minutes?, estimate)?;
        Some(insight(event, estimate, finding.insight_type, finding.deviation_pct))
    }
}

/// Every rule a completed session is checked against.
#[derive(Debug, Clone, Copy, Default)]
pub struct InsightRules {
    pub consumption: OverConsumptionRule,
    pub duration: DurationRule,
}

impl From<&AnomalyConfig> for InsightRules {
    fn from(cfg: &AnomalyConfig) -> Self {
        Self {
            consumption: OverConsumptionRule::from(cfg),
            duration: DurationRule::from(cfg),
        }
    }
}

impl InsightRules {
    /// Energy finding first, then duration finding.
    pub fn insights_for(&self, event: &UsageEvent, estimate: &EstimationResult) -> Vec<UsageInsight> {
        self.consumption
            .insight_for(event, estimate)
            .into_iter()
            .chain(self.duration.insight_for(event, estimate))
            .collect()
    }
}

fn insight(event: &UsageEvent, estimate: &EstimationResult, insight_type: &str, deviation_pct: f64) -> UsageInsight {
    UsageInsight {
        system_id: event.system_id.clone(),
        device_usage_id: event.id.clone(),
        equipment_id: event.equipment_id.clone(),
        insight_type: insight_type.to_string(),
        actual_kwh: event.measured_kwh,
        expected_kwh: estimate.expected_kwh,
        std_dev_sum: estimate.std_dev_sum,
        actual_minutes: event.actual_minutes,
        expected_minutes: estimate.expected_minutes,
        deviation_pct,
        confidence: estimate.confidence.as_str().to_string(),
        detected_at: OffsetDateTime::now_utc(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn estimate(expected_kwh: f64, std_dev_sum: f64, confidence: Confidence) -> EstimationResult {
        EstimationResult {
            expected_kwh,
            std_dev_sum,
            expected_minutes: 10.0,
            profiled_services: 1,
            total_services: 1,
            missing_services: Vec::new(),
            confidence,
        }
    }

    #[test]
    fn flags_consumption_beyond_both_margins() {
        let rule = OverConsumptionRule::default();

        // margin = max(2 * 1.0, 0.25 * 5.0) = 2.0 -> threshold 7.0
        let hit = rule.evaluate(7.5, &estimate(5.0, 1.0, Confidence::High)).unwrap();

        assert!((hit.deviation_pct - 50.0).abs() < 1e-9);
        assert!((hit.threshold_kwh - 7.0).abs() < 1e-9);
    }

    #[test]
    fn wide_std_dev_suppresses_flag() {
        let rule = OverConsumptionRule::default();

        // 40% over, but within two summed standard deviations.
        assert!(rule.evaluate(7.0, &estimate(5.0, 1.5, Confidence::High)).is_none());
    }

    #[test]
    fn small_deviation_is_not_flagged() {
        let rule = OverConsumptionRule::default();

        assert!(rule.evaluate(6.0, &estimate(5.0, 0.0, Confidence::High)).is_none());
    }

    #[test]
    fn under_consumption_is_not_flagged() {
        let rule = OverConsumptionRule::default();

        assert!(rule.evaluate(1.0, &estimate(5.0, 0.1, Confidence::High)).is_none());
    }

    #[test]
    fn zero_expectation_or_missing_profiles_are_skipped() {
        let rule = OverConsumptionRule::default();

        assert!(rule.evaluate(10.0, &estimate(0.0, 0.0, Confidence::High)).is_none());
        assert!(rule.evaluate(10.0, &estimate(5.0, 0.0, Confidence::InsufficientData)).is_none());
    }

    #[test]
    fn insight_requires_measured_energy() {
        let rule = OverConsumptionRule::default();
        let mut event = UsageEvent {
            id: "usage-9".to_string(),
            system_id: "sys-1".to_string(),
            equipment_id: "eq-1".to_string(),
            services: Vec::new(),
            measured_kwh: None,
            actual_minutes: Some(30.0),
            recorded_at: datetime!(2024-05-01 10:00:00 UTC),
        };
        let est = estimate(5.0, 0.5, Confidence::Medium);

        assert!(rule.insight_for(&event, &est).is_none());

        event.measured_kwh = Some(9.0);
        let insight = rule.insight_for(&event, &est).unwrap();
        assert_eq!(insight.insight_type, OVER_CONSUMPTION);
        assert_eq!(insight.device_usage_id, "usage-9");
        assert_eq!(insight.confidence, "medium");
        assert!((insight.deviation_pct - 80.0).abs() < 1e-9);
        assert_eq!(insight.actual_kwh, Some(9.0));
        assert_eq!(insight.actual_minutes, Some(30.0));
    }

    fn session(measured_kwh: Option<f64>, actual_minutes: Option<f64>) -> UsageEvent {
        UsageEvent {
            id: "usage-7".to_string(),
            system_id: "sys-1".to_string(),
            equipment_id: "eq-1".to_string(),
            services: Vec::new(),
            measured_kwh,
            actual_minutes,
            recorded_at: datetime!(2024-05-01 10:00:00 UTC),
        }
    }

    #[test]
    fn long_and_short_sessions_are_flagged_by_direction() {
        let rule = DurationRule::default();
        let est = estimate(5.0, 0.5, Confidence::High);

        let over = rule.evaluate(12.5, &est).unwrap();
        assert_eq!(over.insight_type, OVER_DURATION);
        assert!((over.deviation_pct - 25.0).abs() < 1e-9);

        let under = rule.evaluate(7.0, &est).unwrap();
        assert_eq!(under.insight_type, UNDER_DURATION);
        assert!((under.deviation_pct - 30.0).abs() < 1e-9);
    }

    #[test]
    fn duration_within_tolerance_is_not_flagged() {
        let rule = DurationRule::default();
        let est = estimate(5.0, 0.5, Confidence::High);

        assert!(rule.evaluate(12.0, &est).is_none());
        assert!(rule.evaluate(8.0, &est).is_none());
    }

    #[test]
    fn duration_needs_every_service_profiled() {
        let rule = DurationRule::default();
        let mut partial = estimate(5.0, 0.5, Confidence::Medium);
        partial.total_services = 2;
        partial.missing_services = vec!["massage".to_string()];
        let mut untrained = estimate(5.0, 0.5, Confidence::High);
        untrained.expected_minutes = 0.0;

        assert!(rule.evaluate(30.0, &partial).is_none());
        assert!(rule.evaluate(30.0, &untrained).is_none());
        assert!(rule.evaluate(0.0, &estimate(5.0, 0.5, Confidence::High)).is_none());
    }

    #[test]
    fn duration_insight_without_meter_reading() {
        let rule = DurationRule::default();

        let insight = rule
            .insight_for(&session(None, Some(18.0)), &estimate(5.0, 0.5, Confidence::High))
            .unwrap();

        assert_eq!(insight.insight_type, OVER_DURATION);
        assert_eq!(insight.actual_kwh, None);
        assert_eq!(insight.actual_minutes, Some(18.0));
        assert_eq!(insight.expected_minutes, 10.0);
        assert!((insight.deviation_pct - 80.0).abs() < 1e-9);
    }

    #[test]
    fn rules_report_energy_and_duration_separately() {
        let rules = InsightRules::default();
        let est = estimate(5.0, 0.5, Confidence::High);

        let both = rules.insights_for(&session(Some(9.0), Some(15.0)), &est);
        let types: Vec<_> = both.iter().map(|i| i.insight_type.as_str()).collect();
        assert_eq!(types, vec![OVER_CONSUMPTION, OVER_DURATION]);

        assert!(rules.insights_for(&session(Some(5.0), Some(10.0)), &est).is_empty());
    }
}
