use std::path::PathBuf;

use energy_client::domain::{DeviceUsageRow, UsageEvent};
use tokio::{
    fs::File,
    io::{AsyncBufReadExt, BufReader},
};

use crate::pipeline::{EnvelopeStream, PipelineError, Source};

/// Replays an NDJSON export of device usage records.
///
/// Each non-blank line is one `DeviceUsageRow` object (`ended_at` as RFC 3339,
/// `device_data` as the raw JSON payload). Unparseable lines are reported as
/// stream errors and skipped; an unreadable file yields a single
/// [`PipelineError::SourceUnavailable`] and ends the stream.
pub struct UsageNdjsonFileSource {
    path: PathBuf,
}

impl UsageNdjsonFileSource {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait::async_trait]
impl Source<UsageEvent> for UsageNdjsonFileSource {
    async fn stream(&self) -> EnvelopeStream<UsageEvent> {
        let path = self.path.clone();
        let s = async_stream::stream! {
            let mut lines = match File::open(&path).await {
                Ok(f) => Some(BufReader::new(f).lines()),
                Err(e) => {
                    yield Err(PipelineError::SourceUnavailable(format!("failed to open {}: {e}", path.display())));
                    None
                }
            };
            let mut line_no = 0usize;

            while let Some(reader) = lines.as_mut() {
                let line = match reader.next_line().await {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        yield Err(PipelineError::SourceUnavailable(format!("failed to read line {}: {e}", line_no + 1)));
                        break;
                    }
                };
                line_no += 1;
                if line.trim().is_empty() {
                    continue;
                }

                match serde_json::from_str::<DeviceUsageRow>(&line) {
                    Ok(row) => {
                        yield super::row_to_envelope(row);
                    }
                    Err(e) => {
                        metrics::counter!("usage_replay_parse_errors_total").increment(1);
                        yield Err(PipelineError::Source(format!("line {line_no}: {e}")));
                    }
                }
            }
        };

        Box::pin(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn replays_valid_lines_and_reports_bad_ones() {
        let path = std::env::temp_dir().join(format!("usage-replay-{}.ndjson", std::process::id()));
        let contents = concat!(
            r#"{"id":"u-1","system_id":"sys-1","equipment_id":"eq-1","device_data":{"servicesDetails":[{"serviceId":"laser","durationMinutes":10}]},"energy_consumption":6.0,"actual_minutes":11.0,"ended_at":"2024-05-01T10:00:00Z"}"#,
            "\n",
            "\n",
            "not json\n",
            r#"{"id":"u-2","system_id":"sys-1","equipment_id":null,"device_data":{},"energy_consumption":null,"actual_minutes":null,"ended_at":"2024-05-01T11:00:00Z"}"#,
            "\n",
        );
        tokio::fs::write(&path, contents).await.unwrap();

        let items: Vec<_> = UsageNdjsonFileSource::new(&path).stream().await.collect().await;
        let _ = tokio::fs::remove_file(&path).await;

        assert_eq!(items.len(), 3);
        let first = items[0].as_ref().unwrap();
        assert_eq!(first.payload.id, "u-1");
        assert_eq!(first.payload.services[0].service_id, "laser");
        assert_eq!(first.payload.measured_kwh, Some(6.0));
        assert!(matches!(items[1], Err(PipelineError::Source(_))));
        assert!(matches!(items[2], Err(PipelineError::Source(_))));
    }

    #[tokio::test]
    async fn missing_file_yields_single_error() {
        let items: Vec<_> = UsageNdjsonFileSource::new("/nonexistent/usages.ndjson")
            .stream()
            .await
            .collect()
            .await;

        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(PipelineError::SourceUnavailable(_))));
    }
}
