//! Health status levels.

use serde::{Deserialize, Serialize};

/// Component health level. Declaration order gives `Red < Yellow < Green`,
/// so the aggregate over a registry is simply the minimum.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthStatus {
    /// Critical failure.
    Red = 0,
    /// Degraded: temporary issues, retrying.
    Yellow = 1,
    /// Healthy.
    Green = 2,
}

impl HealthStatus {
    /// Numeric value exposed through the `health_status` gauge.
    pub fn as_gauge(self) -> i64 {
        self as i64
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            HealthStatus::Red => "RED",
            HealthStatus::Yellow => "YELLOW",
            HealthStatus::Green => "GREEN",
        };
        f.write_str(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering_supports_min_aggregation() {
        assert!(HealthStatus::Red < HealthStatus::Yellow);
        assert!(HealthStatus::Yellow < HealthStatus::Green);
        let worst = [HealthStatus::Green, HealthStatus::Red, HealthStatus::Yellow]
            .into_iter()
            .min()
            .unwrap();
        assert_eq!(worst, HealthStatus::Red);
    }

    #[test]
    fn test_serialization_labels() {
        assert_eq!(serde_json::to_string(&HealthStatus::Green).unwrap(), "\"GREEN\"");
        assert_eq!(serde_json::to_string(&HealthStatus::Red).unwrap(), "\"RED\"");
    }

    #[test]
    fn test_gauge_values() {
        assert_eq!(HealthStatus::Red.as_gauge(), 0);
        assert_eq!(HealthStatus::Yellow.as_gauge(), 1);
        assert_eq!(HealthStatus::Green.as_gauge(), 2);
    }
}
