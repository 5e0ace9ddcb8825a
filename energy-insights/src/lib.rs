pub mod anomaly;
pub mod config;
pub mod estimator;
pub mod metrics_server;
pub mod observability;
pub mod pipeline;
pub mod profiles;
pub mod sinks;
pub mod sources;
pub mod store;
pub mod transform;

pub use estimator::{Confidence, EstimationResult, ExpectedEnergyEstimator};
pub use pipeline::{Envelope, Pipeline};
pub use store::ProfileStore;
