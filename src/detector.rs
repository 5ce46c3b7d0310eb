use crate::status::StatusRecord;

/// Flags elapsed times no real command of this class can produce.
///
/// The predicate (negative, or above a ceiling) matches the signature of a
/// completion timestamp read before it was written; it says nothing about
/// genuinely slow commands below the ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnomalyDetector {
    threshold_ms: i64,
}

impl AnomalyDetector {
    pub fn new(threshold_ms: i64) -> Self {
        Self { threshold_ms }
    }

    pub fn threshold_ms(&self) -> i64 {
        self.threshold_ms
    }

    pub fn is_anomalous(&self, elapsed_ms: i64) -> bool {
        elapsed_ms < 0 || elapsed_ms > self.threshold_ms
    }

    /// Returns the offending elapsed value, or `None` for plausible records
    /// and records that carry no timing at all.
    pub fn inspect(&self, record: &StatusRecord) -> Option<i64> {
        record.elapsed_ms.filter(|&elapsed| self.is_anomalous(elapsed))
    }
}

impl Default for AnomalyDetector {
    fn default() -> Self {
        Self::new(crate::config::HarnessConfig::default().anomaly_threshold_ms)
    }
}
