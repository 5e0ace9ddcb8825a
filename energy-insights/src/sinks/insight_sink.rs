use std::time::{Duration, SystemTime};

use energy_client::domain::{UsageEvent, UsageInsight};
use futures::StreamExt;

use crate::{
    anomaly::InsightRules,
    estimator::ExpectedEnergyEstimator,
    pipeline::{Envelope, PipelineError, Sink},
    sinks::writers::InsightWriter,
    store::ProfileStore,
};

/// Counters for one evaluation run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub evaluated: u64,
    pub unmeasured: u64,
    pub rejected: u64,
    pub insights: u64,
}

/// Estimates each incoming event, applies the energy and duration rules and
/// writes the resulting insights in batches.
pub struct InsightSink<P, W> {
    estimator: ExpectedEnergyEstimator<P>,
    rules: InsightRules,
    writer: W,
    batch_size: usize,
    max_retries: u32,
    retry_backoff: Duration,
}

impl<P, W> InsightSink<P, W>
where
    P: ProfileStore,
    W: InsightWriter,
{
    pub fn new(
        estimator: ExpectedEnergyEstimator<P>,
        rules: InsightRules,
        writer: W,
        batch_size: usize,
        max_retries: u32,
        retry_backoff: Duration,
    ) -> Self {
        Self {
            estimator,
            rules,
            writer,
            batch_size: batch_size.max(1),
            max_retries,
            retry_backoff,
        }
    }

    pub fn writer(&self) -> &W {
        &self.writer
    }

    async fn flush_batch(&self, batch: &[Envelope<UsageInsight>]) -> Result<u64, PipelineError> {
        if batch.is_empty() {
            return Ok(0);
        }
        let rows: Vec<UsageInsight> = batch.iter().map(|e| e.payload.clone()).collect();

        let mut attempt: u32 = 0;
        loop {
            match self.writer.write(&rows).await {
                Ok(written) => {
                    metrics::counter!("insight_written_total").increment(written);

                    if let Some(min_received) = batch.iter().map(|e| e.received_at).min() {
                        if let Ok(dur) = SystemTime::now().duration_since(min_received) {
                            metrics::histogram!("insight_end_to_end_latency_seconds").record(dur.as_secs_f64());
                        }
                    }

                    return Ok(written);
                }
                Err(e) if attempt < self.max_retries => {
                    attempt += 1;
                    let sleep_for = self.retry_backoff * attempt;
                    tracing::warn!(error = %e, attempt, "insight flush failed, retrying with backoff");
                    tokio::time::sleep(sleep_for).await;
                }
                Err(e) => {
                    tracing::error!(error = %e, "insight flush failed, giving up");
                    metrics::counter!("insight_sink_errors_total").increment(1);
                    return Err(PipelineError::Sink(e.to_string()));
                }
            }
        }
    }

    /// Drain `input`, returning the run counters.
    ///
    /// Per-record errors are counted and skipped; a fatal error ends the run.
    pub async fn evaluate<S>(&self, mut input: S) -> Result<RunSummary, PipelineError>
    where
        S: futures::Stream<Item = Result<Envelope<UsageEvent>, PipelineError>> + Send + Unpin,
    {
        let mut summary = RunSummary::default();
        let mut buffer: Vec<Envelope<UsageInsight>> = Vec::with_capacity(self.batch_size);

        while let Some(item) = input.next().await {
            let env = match item {
                Ok(env) => env,
                Err(e) if e.is_fatal() => {
                    tracing::error!(error = %e, "usage source failed, aborting run");
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "usage event skipped");
                    summary.rejected += 1;
                    continue;
                }
            };

            let event = &env.payload;
            if event.measured_kwh.is_none() && event.actual_minutes.is_none() {
                summary.unmeasured += 1;
                continue;
            }

            let estimate = self.estimator.estimate(event).await?;
            summary.evaluated += 1;

            for insight in self.rules.insights_for(event, &estimate) {
                tracing::info!(
                    usage_id = %event.id,
                    equipment_id = %event.equipment_id,
                    insight_type = %insight.insight_type,
                    deviation_pct = insight.deviation_pct,
                    "usage insight detected"
                );
                buffer.push(Envelope {
                    payload: insight,
                    received_at: env.received_at,
                });
            }

            if buffer.len() >= self.batch_size {
                summary.insights += self.flush_batch(&buffer).await?;
                buffer.clear();
            }
        }

        if !buffer.is_empty() {
            summary.insights += self.flush_batch(&buffer).await?;
        }

        tracing::info!(
            evaluated = summary.evaluated,
            unmeasured = summary.unmeasured,
            rejected = summary.rejected,
            insights = summary.insights,
            "usage evaluation finished"
        );
        Ok(summary)
    }
}

#[async_trait::async_trait]
impl<P, W> Sink<UsageEvent> for InsightSink<P, W>
where
    P: ProfileStore,
    W: InsightWriter,
{
    async fn run<S>(&self, input: S) -> Result<(), PipelineError>
    where
        S: futures::Stream<Item = Result<Envelope<UsageEvent>, PipelineError>> + Send + Unpin + 'static,
    {
        self.evaluate(input).await.map(|_| ())
    }
}
