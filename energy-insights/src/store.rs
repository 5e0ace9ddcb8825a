//! Profile lookup seam for the estimator.

use std::collections::HashMap;

use energy_client::{db::profile_queries, domain::EnergyProfile};
use sqlx::PgPool;

/// Keyed read access to stored energy profiles.
///
/// Implementations return zero or more profiles matching `system_id`,
/// `equipment_id` and any of `service_ids`; an `Err` means the store itself
/// could not be read.
#[async_trait::async_trait]
pub trait ProfileStore: Send + Sync {
    async fn find_profiles(
        &self,
        system_id: &str,
        equipment_id: &str,
        service_ids: &[String],
    ) -> anyhow::Result<Vec<EnergyProfile>>;
}

#[derive(Clone)]
pub struct PgProfileStore {
    pool: PgPool,
}

impl PgProfileStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ProfileStore for PgProfileStore {
    async fn find_profiles(
        &self,
        system_id: &str,
        equipment_id: &str,
        service_ids: &[String],
    ) -> anyhow::Result<Vec<EnergyProfile>> {
        let started = std::time::Instant::now();
        let rows = profile_queries::find_profiles(&self.pool, system_id, equipment_id, service_ids).await?;
        metrics::histogram!("profile_store_query_seconds").record(started.elapsed().as_secs_f64());
        Ok(rows)
    }
}

type ProfileKey = (String, String, String);

/// Immutable snapshot of profiles, keyed by `(system, equipment, service)`.
///
/// A later profile with the same key replaces an earlier one.
#[derive(Debug, Clone, Default)]
pub struct InMemoryProfileStore {
    profiles: HashMap<ProfileKey, EnergyProfile>,
}

impl InMemoryProfileStore {
    pub fn from_profiles<I>(profiles: I) -> Self
    where
        I: IntoIterator<Item = EnergyProfile>,
    {
        let profiles = profiles
            .into_iter()
            .map(|p| {
                let key = (p.system_id.clone(), p.equipment_id.clone(), p.service_id.clone());
                (key, p)
            })
            .collect();
        Self { profiles }
    }

    /// Snapshot every profile of `system_id` from PostgreSQL.
    pub async fn preload(pool: &PgPool, system_id: &str) -> anyhow::Result<Self> {
        let rows = profile_queries::load_profiles(pool, system_id).await?;
        tracing::info!(system_id, profiles = rows.len(), "energy profiles preloaded");
        Ok(Self::from_profiles(rows))
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

#[async_trait::async_trait]
impl ProfileStore for InMemoryProfileStore {
    async fn find_profiles(
        &self,
        system_id: &str,
        equipment_id: &str,
        service_ids: &[String],
    ) -> anyhow::Result<Vec<EnergyProfile>> {
        let found = service_ids
            .iter()
            .filter_map(|service_id| {
                let key = (system_id.to_string(), equipment_id.to_string(), service_id.clone());
                self.profiles.get(&key).cloned()
            })
            .collect();
        Ok(found)
    }
}

/// Either a live PostgreSQL store or a preloaded snapshot, chosen by config.
pub enum ConfiguredProfileStore {
    Pg(PgProfileStore),
    Snapshot(InMemoryProfileStore),
}

impl ConfiguredProfileStore {
    pub async fn connect(pool: PgPool, system_id: &str, preload: bool) -> anyhow::Result<Self> {
        if preload {
            Ok(Self::Snapshot(InMemoryProfileStore::preload(&pool, system_id).await?))
        } else {
            Ok(Self::Pg(PgProfileStore::new(pool)))
        }
    }
}

#[async_trait::async_trait]
impl ProfileStore for ConfiguredProfileStore {
    async fn find_profiles(
        &self,
        system_id: &str,
        equipment_id: &str,
        service_ids: &[String],
    ) -> anyhow::Result<Vec<EnergyProfile>> {
        match self {
            Self::Pg(s) => s.find_profiles(system_id, equipment_id, service_ids).await,
            Self::Snapshot(s) => s.find_profiles(system_id, equipment_id, service_ids).await,
        }
    }
}
