mod device_usage;
mod energy_profile;
mod usage_insight;

pub use device_usage::{DeviceUsageRow, ServiceUsage, UsageEvent};
pub use energy_profile::EnergyProfile;
pub use usage_insight::UsageInsight;
