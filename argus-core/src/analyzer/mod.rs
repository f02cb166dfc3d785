//! The four-pronged detection stack: adaptive baseline, per-cycle rule
//! heuristics, streaming time-series patterns, and batch correlation.

pub mod baseline;
pub mod correlation;
pub mod rules;
pub mod timeseries;

pub use baseline::{AdaptiveBaseline, BaselineSlot, BaselineSummary, MetricStats};
pub use correlation::CorrelationEngine;
pub use rules::RuleDetector;
pub use timeseries::{TimeSeriesAnalyzer, TimeSeriesSnapshot};

pub(crate) fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation (n − 1 denominator); 0 for fewer than two points.
pub(crate) fn sample_stddev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let variance =
        values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_and_stddev() {
        assert_eq!(mean(&[]), 0.0);
        assert_eq!(mean(&[2.0, 4.0, 6.0]), 4.0);
        assert_eq!(sample_stddev(&[5.0]), 0.0);
        let sd = sample_stddev(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert!((sd - 2.138089935).abs() < 1e-6);
    }
}
