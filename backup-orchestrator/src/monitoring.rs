//! Fire-and-forget metric emission.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub trait Monitoring: Send + Sync {
    fn send(&self, tags: &[&str], value: f64);
}

/// Emits metrics as structured log events.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogMonitoring;

impl Monitoring for LogMonitoring {
    fn send(&self, tags: &[&str], value: f64) {
        tracing::info!(target: "metrics", tags = %tags.join(","), value, "metric");
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoMonitoring;

impl Monitoring for NoMonitoring {
    fn send(&self, _tags: &[&str], _value: f64) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitoringProvider {
    #[default]
    Log,
    None,
}

impl MonitoringProvider {
    pub fn build(&self) -> Arc<dyn Monitoring> {
        match self {
            MonitoringProvider::Log => Arc::new(LogMonitoring),
            MonitoringProvider::None => Arc::new(NoMonitoring),
        }
    }
}
