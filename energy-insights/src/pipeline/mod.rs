//! Source -> transforms -> sink plumbing for usage evaluation runs.
//!
//! Errors travel down the stream as `Err` items. A sink logs and skips
//! per-record errors and aborts on [`PipelineError::is_fatal`] ones; an `Err`
//! returned from [`Sink::run`] ends the run with that error.

use std::{pin::Pin, sync::Arc, time::SystemTime};

use futures::{Stream, StreamExt};

use crate::estimator::EstimateError;

#[derive(Debug, Clone)]
pub struct Envelope<T> {
    pub payload: T,
    pub received_at: SystemTime,
}

impl<T> Envelope<T> {
    pub fn now(payload: T) -> Self {
        Self {
            payload,
            received_at: SystemTime::now(),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("source error: {0}")]
    Source(String),
    /// The source as a whole could not be read.
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),
    #[error("transform error: {0}")]
    Transform(String),
    #[error("sink error: {0}")]
    Sink(String),
    #[error(transparent)]
    Estimate(#[from] EstimateError),
}

impl PipelineError {
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Source(_) | Self::Transform(_))
    }
}

pub type EnvelopeStream<T> = Pin<Box<dyn Stream<Item = Result<Envelope<T>, PipelineError>> + Send>>;

#[async_trait::async_trait]
pub trait Source<T>: Send + Sync {
    async fn stream(&self) -> EnvelopeStream<T>;
}

#[async_trait::async_trait]
pub trait Transform<I, O>: Send + Sync {
    async fn apply(&self, input: Envelope<I>) -> Result<Envelope<O>, PipelineError>;
}

#[async_trait::async_trait]
pub trait Sink<T>: Send + Sync {
    async fn run<S>(&self, input: S) -> Result<(), PipelineError>
    where
        S: Stream<Item = Result<Envelope<T>, PipelineError>> + Send + Unpin + 'static;
}

pub struct Pipeline<S, T, K> {
    pub source: S,
    pub transforms: Vec<Arc<dyn Transform<T, T> + Send + Sync>>, // same-type transforms chain
    pub sink: K,
}

impl<T, S, K> Pipeline<S, T, K>
where
    T: Send + 'static,
    S: Source<T> + Send + Sync + 'static,
    K: Sink<T> + Send + Sync + 'static,
{
    pub async fn run(self) -> Result<(), PipelineError> {
        let mut stream = self.source.stream().await;

        for t in self.transforms {
            stream = Box::pin(stream.then(move |item| {
                let t = t.clone();
                async move {
                    match item {
                        Ok(env) => t.apply(env).await,
                        Err(e) => Err(e),
                    }
                }
            }));
        }

        let outcome = self.sink.run(stream).await;
        match &outcome {
            Ok(()) => metrics::counter!("pipeline_runs_total", "outcome" => "ok").increment(1),
            Err(e) => {
                tracing::error!(error = %e, fatal = e.is_fatal(), "pipeline run failed");
                metrics::counter!("pipeline_runs_total", "outcome" => "failed").increment(1);
            }
        }
        outcome
    }
}
