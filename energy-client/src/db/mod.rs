pub mod insight_queries;
pub mod profile_queries;
pub mod usage_queries;
