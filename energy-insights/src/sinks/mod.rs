pub mod insight_sink;
pub mod writers;

pub use insight_sink::InsightSink;
pub use writers::{InsightWriter, NdjsonInsightWriter, PgInsightWriter};
