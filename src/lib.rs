//! Forecasting accumulation curves, and scoring those forecasts against history.
//!
//! Every surveyed location has cumulative counts (e.g. species found) against cumulative effort
//! (days, visits or person-visits). This crate
//!
//! 1. fits `y = A * x^P + B` to such a curve to predict the gain of the next unit of effort
//!    ([`power`]),
//! 2. replays history with recent points hidden to score how well those predictions ranked the
//!    locations ([`backtest`], [`species`], [`taxa`]), and
//! 3. aggregates the scores per cluster of locations and across clusters ([`cluster`]).
//!
//! Everything is synchronous and deterministic; equal input gives equal output.

pub mod averaging;
pub mod backtest;
pub mod cluster;
pub mod config;
pub mod error;
pub mod power;
pub mod regression;
pub mod series;
pub mod species;
pub mod taxa;

pub use averaging::ModelAverager;
pub use backtest::{BacktestTarget, PredictionStatsGenerator, PredictionTierStat};
pub use cluster::{analyze, analyze_cluster, AnalysisReport, AnalysisRequest, ClusterSummaryStats};
pub use config::ClusteringConfig;
pub use error::{Error, Result};
pub use power::{PowerFitModel, PowerFitOptions};
pub use regression::{FittedModel, Predictive, Regression};
pub use series::{EffortUnit, LocationGraphData, Point, PointSeries, PointSliceSpec, PredictionUnit};

/// F64 wrapper that implements [`Ord`].
///
/// When [`PartialOrd`] returns [`None`], we return [`std::cmp::Ordering::Equal`] for two NaNs
/// and sort NaN below every number otherwise.
#[derive(Debug, Copy, Clone)]
#[repr(transparent)]
pub struct F64Ord(pub f64);
impl PartialEq for F64Ord {
    fn eq(&self, other: &F64Ord) -> bool {
        self.cmp(other) == std::cmp::Ordering::Equal
    }
}
impl Eq for F64Ord {}
impl PartialOrd for F64Ord {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for F64Ord {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0
            .partial_cmp(&other.0)
            .unwrap_or_else(|| match (self.0.is_nan(), other.0.is_nan()) {
                (true, true) | (false, false) => std::cmp::Ordering::Equal,
                (true, false) => std::cmp::Ordering::Less,
                (false, true) => std::cmp::Ordering::Greater,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nan_sorts_below_numbers() {
        let mut values = [F64Ord(1.0), F64Ord(f64::NAN), F64Ord(-3.0)];
        values.sort();
        assert!(values[0].0.is_nan());
        assert_eq!(values[1].0, -3.0);
        assert_eq!(F64Ord(0.0), F64Ord(-0.0));
    }
}
