use energy_client::{db::insight_queries, domain::UsageInsight};
use sqlx::PgPool;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

/// Destination for detected insights. Returns the number of rows written.
#[async_trait::async_trait]
pub trait InsightWriter: Send + Sync {
    async fn write(&self, insights: &[UsageInsight]) -> anyhow::Result<u64>;
}

pub struct PgInsightWriter {
    pool: PgPool,
}

impl PgInsightWriter {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl InsightWriter for PgInsightWriter {
    async fn write(&self, insights: &[UsageInsight]) -> anyhow::Result<u64> {
        insight_queries::insert_insights(&self.pool, insights).await
    }
}

/// Writes one JSON object per insight, newline terminated.
pub struct NdjsonInsightWriter<W> {
    out: Mutex<W>,
}

impl<W> NdjsonInsightWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out: Mutex::new(out) }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner()
    }
}

impl NdjsonInsightWriter<tokio::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout())
    }
}

#[async_trait::async_trait]
impl<W> InsightWriter for NdjsonInsightWriter<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn write(&self, insights: &[UsageInsight]) -> anyhow::Result<u64> {
        let mut buf = Vec::with_capacity(insights.len() * 256);
        for insight in insights {
            serde_json::to_writer(&mut buf, insight)?;
            buf.push(b'\n');
        }

        let mut out = self.out.lock().await;
        out.write_all(&buf).await?;
        out.flush().await?;
        Ok(insights.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[tokio::test]
    async fn ndjson_writer_emits_one_line_per_insight() {
        let insight = UsageInsight {
            system_id: "sys-1".to_string(),
            device_usage_id: "u-1".to_string(),
            equipment_id: "eq-1".to_string(),
            insight_type: "OVER_CONSUMPTION".to_string(),
            actual_kwh: Some(9.0),
            expected_kwh: 5.0,
            std_dev_sum: 0.5,
            actual_minutes: None,
            expected_minutes: 10.0,
            deviation_pct: 80.0,
            confidence: "high".to_string(),
            detected_at: datetime!(2024-05-01 10:00:00 UTC),
        };
        let writer = NdjsonInsightWriter::new(Vec::<u8>::new());

        let written = writer.write(&[insight.clone(), insight]).await.unwrap();
        let out = String::from_utf8(writer.into_inner()).unwrap();

        assert_eq!(written, 2);
        assert_eq!(out.lines().count(), 2);
        let first: serde_json::Value = serde_json::from_str(out.lines().next().unwrap()).unwrap();
        assert_eq!(first["device_usage_id"], "u-1");
        assert_eq!(first["detected_at"], "2024-05-01T10:00:00Z");
        assert!(first["actual_minutes"].is_null());
    }
}
