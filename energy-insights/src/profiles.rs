//! Rebuilding energy profiles from completed sessions.
//!
//! A session's measured energy and minutes are allocated to its services in
//! proportion to their durations, then accumulated per
//! `(equipment, service)` with Welford's online mean and variance.

use std::collections::BTreeMap;

use anyhow::{bail, Context};
use energy_client::domain::{EnergyProfile, UsageEvent};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

/// Running mean and sum of squared deviations.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Welford {
    count: i64,
    mean: f64,
    m2: f64,
}

impl Welford {
    pub fn push(&mut self, x: f64) {
        self.count += 1;
        let delta = x - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (x - self.mean);
    }

    pub fn count(&self) -> i64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn m2(&self) -> f64 {
        self.m2
    }

    /// Sample standard deviation; zero until two samples have been seen.
    pub fn std_dev(&self) -> f64 {
        if self.count > 1 {
            (self.m2 / (self.count - 1) as f64).sqrt()
        } else {
            0.0
        }
    }
}

/// One service's share of a measured session.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceSample {
    pub service_id: String,
    pub allocated_kwh: f64,
    pub real_minutes: f64,
}

/// Split a session's measured energy and minutes across its services.
///
/// Only services with a positive duration take part. A lone eligible service
/// receives the whole measurement. Returns nothing unless the session has a
/// positive meter reading and a positive real duration.
pub fn allocate(event: &UsageEvent) -> Vec<ServiceSample> {
    let (Some(kwh), Some(minutes)) = (event.measured_kwh, event.actual_minutes) else {
        return Vec::new();
    };
    if kwh <= 0.0 || minutes <= 0.0 {
        return Vec::new();
    }

    let eligible: Vec<_> = event.services.iter().filter(|s| s.duration_minutes > 0.0).collect();
    match eligible.as_slice() {
        [] => Vec::new(),
        [only] => vec![ServiceSample {
            service_id: only.service_id.clone(),
            allocated_kwh: kwh,
            real_minutes: minutes,
        }],
        many => {
            let total: f64 = many.iter().map(|s| s.duration_minutes).sum();
            many.iter()
                .map(|s| {
                    let ratio = s.duration_minutes / total;
                    ServiceSample {
                        service_id: s.service_id.clone(),
                        allocated_kwh: kwh * ratio,
                        real_minutes: minutes * ratio,
                    }
                })
                .collect()
        }
    }
}

#[derive(Debug, Default)]
struct Accumulator {
    kwh_per_min: Welford,
    minutes: Welford,
}

/// Accumulates samples for one tenant and emits fresh profiles.
#[derive(Debug)]
pub struct ProfileTrainer {
    system_id: String,
    groups: BTreeMap<(String, String), Accumulator>,
}

impl ProfileTrainer {
    pub fn new(system_id: impl Into<String>) -> Self {
        Self {
            system_id: system_id.into(),
            groups: BTreeMap::new(),
        }
    }

    /// Add the samples of one session. Returns how many were accepted.
    pub fn observe(&mut self, event: &UsageEvent) -> usize {
        if event.system_id != self.system_id {
            tracing::warn!(usage_id = %event.id, system_id = %event.system_id, "usage from another tenant ignored");
            return 0;
        }

        let samples = allocate(event);
        if samples.is_empty() {
            tracing::debug!(usage_id = %event.id, "usage without a usable measurement skipped");
        }

        let mut accepted = 0;
        for sample in samples {
            let acc = self
                .groups
                .entry((event.equipment_id.clone(), sample.service_id))
                .or_default();
            acc.kwh_per_min.push(sample.allocated_kwh / sample.real_minutes);
            acc.minutes.push(sample.real_minutes);
            accepted += 1;
        }
        accepted
    }

    pub fn finish(self) -> Vec<EnergyProfile> {
        let system_id = self.system_id;
        self.groups
            .into_iter()
            .map(|((equipment_id, service_id), acc)| EnergyProfile {
                system_id: system_id.clone(),
                equipment_id,
                service_id,
                avg_kwh_per_min: acc.kwh_per_min.mean(),
                std_dev_kwh_per_min: acc.kwh_per_min.std_dev(),
                avg_minutes: acc.minutes.mean(),
                std_dev_minutes: acc.minutes.std_dev(),
                sample_count: acc.kwh_per_min.count(),
                m2_kwh_per_min: acc.kwh_per_min.m2(),
                m2_minutes: acc.minutes.m2(),
            })
            .collect()
    }
}

/// Resolve the `[start, end)` range sessions are trained on.
///
/// Bounds are RFC 3339 timestamps. Without a start, training covers the whole
/// history; without an end, it runs up to `now`.
pub fn training_window(
    start: Option<&str>,
    end: Option<&str>,
    now: OffsetDateTime,
) -> anyhow::Result<(OffsetDateTime, OffsetDateTime)> {
    let parse = |raw: &str| OffsetDateTime::parse(raw, &Rfc3339).with_context(|| format!("invalid timestamp {raw}"));

    let start = start.map(parse).transpose()?.unwrap_or(OffsetDateTime::UNIX_EPOCH);
    let end = end.map(parse).transpose()?.unwrap_or(now);
    if start >= end {
        bail!("training window is empty: {start} is not before {end}");
    }
    Ok((start, end))
}
