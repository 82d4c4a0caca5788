use std::time::SystemTime;
use serde::{Serialize, Deserialize};
use crate::query::cache::CacheStats;

/// Database statistics for monitoring
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseStats {
    // General info
    pub uptime_secs: u64,
    pub start_time: SystemTime,

    // Storage metrics
    pub total_documents: usize,
    pub store_sequence: u64,
    pub log_entries: usize,

    // Index metrics
    pub index_count: usize,
    pub stale_indexes: usize,
    pub indexing_errors: usize,

    // Query metrics
    pub cache_stats: Option<CacheStats>,
}

/// Health check status
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum HealthStatus {
    Healthy,
    Degraded(String),
    Unhealthy(String),
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }
}

/// Health check result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub status: HealthStatus,
    pub checks: Vec<HealthCheck>,
    pub timestamp: SystemTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    pub name: String,
    pub status: HealthStatus,
    pub message: Option<String>,
    pub latency_ms: u64,
}

impl HealthCheckResult {
    /// Worst status among `checks`.
    pub fn from_checks(checks: Vec<HealthCheck>) -> Self {
        let status = checks
            .iter()
            .map(|check| &check.status)
            .fold(HealthStatus::Healthy, |worst, status| match (&worst, status) {
                (HealthStatus::Unhealthy(_), _) => worst,
                (_, HealthStatus::Unhealthy(_)) => status.clone(),
                (HealthStatus::Degraded(_), _) => worst,
                (_, HealthStatus::Degraded(_)) => status.clone(),
                _ => worst,
            });

        HealthCheckResult {
            status,
            checks,
            timestamp: SystemTime::now(),
        }
    }
}
