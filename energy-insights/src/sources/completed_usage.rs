use energy_client::{db::usage_queries, domain::UsageEvent};
use sqlx::PgPool;
use time::{Duration, OffsetDateTime};

use crate::pipeline::{EnvelopeStream, PipelineError, Source};

/// Completed sessions of one tenant that ended within a lookback window.
pub struct CompletedUsageSource {
    pool: PgPool,
    system_id: String,
    start: OffsetDateTime,
    end: OffsetDateTime,
}

impl CompletedUsageSource {
    pub fn new(pool: PgPool, system_id: impl Into<String>, start: OffsetDateTime, end: OffsetDateTime) -> Self {
        Self {
            pool,
            system_id: system_id.into(),
            start,
            end,
        }
    }

    /// Window ending now and reaching back `days` days.
    pub fn last_days(pool: PgPool, system_id: impl Into<String>, days: i64) -> Self {
        let end = OffsetDateTime::now_utc();
        Self::new(pool, system_id, end - Duration::days(days), end)
    }
}

#[async_trait::async_trait]
impl Source<UsageEvent> for CompletedUsageSource {
    async fn stream(&self) -> EnvelopeStream<UsageEvent> {
        let pool = self.pool.clone();
        let system_id = self.system_id.clone();
        let (start, end) = (self.start, self.end);

        let s = async_stream::stream! {
            match usage_queries::completed_usages(&pool, &system_id, start, end).await {
                Ok(rows) => {
                    tracing::info!(system_id = %system_id, usages = rows.len(), "completed usages loaded");
                    for row in rows {
                        yield super::row_to_envelope(row);
                    }
                }
                Err(e) => {
                    yield Err(PipelineError::SourceUnavailable(format!("failed to load completed usages: {e}")));
                }
            }
        };

        Box::pin(s)
    }
}
