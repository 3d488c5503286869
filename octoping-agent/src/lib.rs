//! octoping node agent
//!
//! Runs the ICMP and DNS probe loops of one node under a listener
//! supervisor and exposes their statistics on a status endpoint.

pub mod config;
pub mod monitor;
pub mod prober;
pub mod probes;
pub mod server;
pub mod statistics;
pub mod status;
pub mod targets;

pub use monitor::{Monitor, PrometheusMonitor, Scope};
pub use prober::{CycleReport, Prober, ProberSettings};
pub use server::{Listener, Server, ServerError};
pub use statistics::{Statistics, StatisticsKind};
