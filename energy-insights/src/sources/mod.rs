pub mod completed_usage;
pub mod usage_ndjson_file;

pub use completed_usage::CompletedUsageSource;
pub use usage_ndjson_file::UsageNdjsonFileSource;

use energy_client::domain::{DeviceUsageRow, UsageEvent};

use crate::{
    pipeline::{Envelope, PipelineError},
    transform,
};

/// Boundary conversion shared by the sources; rejected rows become stream errors.
fn row_to_envelope(row: DeviceUsageRow) -> Result<Envelope<UsageEvent>, PipelineError> {
    let usage_id = row.id.clone();
    match transform::usage_event_from_row(row) {
        Ok(event) => Ok(Envelope::now(event)),
        Err(e) => {
            metrics::counter!("usage_payload_rejected_total").increment(1);
            Err(PipelineError::Source(format!("usage {usage_id}: {e}")))
        }
    }
}
