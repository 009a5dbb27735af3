pub mod cluster_status;
pub mod errors;
pub mod hash;
pub mod metrics;
pub mod quantity;
pub mod status;
pub mod telemetry;
