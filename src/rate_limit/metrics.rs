//! Request outcome samples and the performance metrics derived from them.

use serde::{Deserialize, Serialize};

use crate::error::LimiterError;
use crate::rate_limit::limits::adaptive::LATENCY_TREND_DEADBAND_MS;

/// Outcome of one piece of guarded work, as reported by the caller.
///
/// # Example
///
/// ```rust
/// use adaptive_rate_limit::rate_limit::RequestOutcome;
///
/// let outcome = RequestOutcome::failure(850.0)
///     .with_error_type("timeout")
///     .with_status_code(504);
/// assert!(!outcome.success);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestOutcome {
    /// Whether the work succeeded.
    pub success: bool,
    /// How long the work took, in milliseconds.
    pub latency_ms: f64,
    /// Error classification, if any.
    pub error_type: Option<String>,
    /// HTTP status code, if any.
    pub status_code: Option<u16>,
}

impl RequestOutcome {
    /// A successful outcome.
    pub fn success(latency_ms: f64) -> Self {
        Self {
            success: true,
            latency_ms,
            error_type: None,
            status_code: None,
        }
    }

    /// A failed outcome.
    pub fn failure(latency_ms: f64) -> Self {
        Self {
            success: false,
            latency_ms,
            error_type: None,
            status_code: None,
        }
    }

    /// Attach an error classification.
    pub fn with_error_type(mut self, error_type: impl Into<String>) -> Self {
        self.error_type = Some(error_type.into());
        self
    }

    /// Attach an HTTP status code.
    pub fn with_status_code(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }

    /// Check latency and status code bounds.
    pub fn validate(&self) -> Result<(), LimiterError> {
        if !self.latency_ms.is_finite() || self.latency_ms < 0.0 {
            return Err(LimiterError::InvalidLatency(self.latency_ms));
        }
        if let Some(code) = self.status_code {
            if !(100..=599).contains(&code) {
                return Err(LimiterError::InvalidStatusCode(code));
            }
        }
        Ok(())
    }
}

/// A recorded outcome with the time it was reported.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestSample {
    /// Clock time of the report in milliseconds.
    pub timestamp_ms: u64,
    /// Whether the work succeeded.
    pub success: bool,
    /// Latency in milliseconds.
    pub latency_ms: f64,
    /// Error classification, if any.
    pub error_type: Option<String>,
    /// HTTP status code, if any.
    pub status_code: Option<u16>,
}

impl RequestSample {
    pub(crate) fn new(timestamp_ms: u64, outcome: RequestOutcome) -> Self {
        Self {
            timestamp_ms,
            success: outcome.success,
            latency_ms: outcome.latency_ms,
            error_type: outcome.error_type,
            status_code: outcome.status_code,
        }
    }

    /// Whether this sample counts towards the error rate.
    pub fn is_error(&self) -> bool {
        self.error_type.is_some() || self.status_code.is_some_and(|code| code >= 500)
    }
}

/// Direction latency is moving in across the measurement window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LatencyTrend {
    /// Later samples are slower
    Increasing,
    /// Later samples are faster
    Decreasing,
    /// No change beyond the deadband
    Stable,
}

/// Aggregates computed over the samples in one measurement window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceMetrics {
    /// Number of samples considered.
    pub sample_count: usize,
    /// Share of successful samples.
    pub success_rate: f64,
    /// Share of samples carrying an error type or a 5xx status.
    pub error_rate: f64,
    /// Mean latency in milliseconds.
    pub average_latency_ms: f64,
    /// 95th percentile latency in milliseconds.
    pub p95_latency_ms: f64,
    /// Mean latency of the newer half compared with the older half.
    pub latency_trend: LatencyTrend,
}

impl PerformanceMetrics {
    /// Compute metrics over samples given in chronological order.
    ///
    /// Returns `None` when there are no samples.
    pub fn from_samples<'a, I>(samples: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a RequestSample>,
    {
        let samples: Vec<&RequestSample> = samples.into_iter().collect();
        if samples.is_empty() {
            return None;
        }

        let n = samples.len() as f64;
        let successes = samples.iter().filter(|s| s.success).count() as f64;
        let errors = samples.iter().filter(|s| s.is_error()).count() as f64;
        let latencies: Vec<f64> = samples.iter().map(|s| s.latency_ms).collect();

        Some(Self {
            sample_count: samples.len(),
            success_rate: successes / n,
            error_rate: errors / n,
            average_latency_ms: mean(&latencies),
            p95_latency_ms: percentile(&latencies, 0.95),
            latency_trend: trend(&latencies),
        })
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn percentile(values: &[f64], quantile: f64) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let rank = ((sorted.len() as f64 * quantile).ceil() as usize).clamp(1, sorted.len());
    sorted[rank - 1]
}

fn trend(latencies: &[f64]) -> LatencyTrend {
    if latencies.len() < 2 {
        return LatencyTrend::Stable;
    }
    let (older, newer) = latencies.split_at(latencies.len() / 2);
    let delta = mean(newer) - mean(older);

    if delta > LATENCY_TREND_DEADBAND_MS {
        LatencyTrend::Increasing
    } else if delta < -LATENCY_TREND_DEADBAND_MS {
        LatencyTrend::Decreasing
    } else {
        LatencyTrend::Stable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(ts: u64, success: bool, latency: f64) -> RequestSample {
        let outcome = if success {
            RequestOutcome::success(latency)
        } else {
            RequestOutcome::failure(latency)
        };
        RequestSample::new(ts, outcome)
    }

    #[test]
    fn test_outcome_validation() {
        assert!(RequestOutcome::success(0.0).validate().is_ok());
        assert!(matches!(
            RequestOutcome::success(-1.0).validate(),
            Err(LimiterError::InvalidLatency(_))
        ));
        assert!(RequestOutcome::success(f64::INFINITY).validate().is_err());
        assert!(matches!(
            RequestOutcome::success(5.0).with_status_code(600).validate(),
            Err(LimiterError::InvalidStatusCode(600))
        ));
        assert!(RequestOutcome::success(5.0).with_status_code(99).validate().is_err());
        assert!(RequestOutcome::success(5.0).with_status_code(204).validate().is_ok());
    }

    #[test]
    fn test_metrics_rates() {
        let samples = vec![
            sample(0, true, 100.0),
            sample(1, true, 100.0),
            sample(2, true, 100.0),
            RequestSample::new(
                3,
                RequestOutcome::failure(100.0).with_status_code(503),
            ),
        ];
        let metrics = PerformanceMetrics::from_samples(&samples).unwrap();

        assert_eq!(metrics.sample_count, 4);
        assert_eq!(metrics.success_rate, 0.75);
        assert_eq!(metrics.error_rate, 0.25);
        assert_eq!(metrics.average_latency_ms, 100.0);
        assert_eq!(metrics.latency_trend, LatencyTrend::Stable);
    }

    #[test]
    fn test_failure_without_error_details_is_not_an_error() {
        let samples = vec![sample(0, false, 10.0), sample(1, true, 10.0)];
        let metrics = PerformanceMetrics::from_samples(&samples).unwrap();
        assert_eq!(metrics.success_rate, 0.5);
        assert_eq!(metrics.error_rate, 0.0);
    }

    #[test]
    fn test_latency_trend_deadband() {
        let rising: Vec<_> = [100.0, 100.0, 160.0, 160.0]
            .iter()
            .enumerate()
            .map(|(i, &l)| sample(i as u64, true, l))
            .collect();
        assert_eq!(
            PerformanceMetrics::from_samples(&rising).unwrap().latency_trend,
            LatencyTrend::Increasing
        );

        let flat: Vec<_> = [100.0, 100.0, 140.0, 140.0]
            .iter()
            .enumerate()
            .map(|(i, &l)| sample(i as u64, true, l))
            .collect();
        assert_eq!(
            PerformanceMetrics::from_samples(&flat).unwrap().latency_trend,
            LatencyTrend::Stable
        );

        let falling: Vec<_> = [300.0, 300.0, 100.0, 100.0]
            .iter()
            .enumerate()
            .map(|(i, &l)| sample(i as u64, true, l))
            .collect();
        assert_eq!(
            PerformanceMetrics::from_samples(&falling).unwrap().latency_trend,
            LatencyTrend::Decreasing
        );
    }

    #[test]
    fn test_p95_latency() {
        let samples: Vec<_> = (1..=100).map(|i| sample(i, true, i as f64)).collect();
        let metrics = PerformanceMetrics::from_samples(&samples).unwrap();
        assert_eq!(metrics.p95_latency_ms, 95.0);
        assert!(PerformanceMetrics::from_samples(Vec::<RequestSample>::new().iter()).is_none());
    }
}
