pub mod collector;
pub mod exporter;

pub use collector::{Metrics, MetricsCollector};
pub use exporter::MetricsExporter;
