//! Predicting the species gain of a location's next unit of effort from its accumulation curve.

use crate::backtest::{BacktestTarget, PredictionStatsGenerator};
use crate::config::ClusteringConfig;
use crate::power::{PowerFitModel, PowerFitOptions};
use crate::series::{LocationGraphData, PointSeries, PointSliceSpec, PredictionUnit};

/// Predicted gain in `y` for one more unit of `x` after hiding the most recent `points_elided`
/// points and keeping at most `max_points_to_regress` of the rest.
///
/// - 0 or 1 remaining points: [`None`].
/// - 2 remaining points: the slope between the first and last point of the whole `series`
///   (`0.0` if they share an `x`).
/// - 3 or more: a power curve is fit and the prediction is `fitted_y(last_x + 1) - last_y`,
///   never below `0.0`. If the fit fails, [`None`].
pub fn predict_delta_species(
    series: &PointSeries,
    points_elided: usize,
    max_points_to_regress: Option<usize>,
    options: &PowerFitOptions,
) -> Option<f64> {
    let spec = PointSliceSpec {
        min_point_count: 0,
        max_point_count: max_points_to_regress,
        recent_points_to_ignore: points_elided,
    };
    let points = series.slice(&spec);
    match points.len() {
        0 | 1 => None,
        2 => {
            let (first, last) = (series.first()?, series.last()?);
            let dx = last.x - first.x;
            Some(if dx == 0.0 { 0.0 } else { (last.y - first.y) / dx })
        }
        _ => {
            let model = match PowerFitModel::fit_with(points, options) {
                Ok(model) => model,
                Err(err) => {
                    tracing::warn!(%err, points_elided, "power fit failed, no prediction");
                    return None;
                }
            };
            let last = points[points.len() - 1];
            let delta = model.fitted_y(last.x + 1.0) - last.y;
            // A curve dipping under its last point must not predict a loss.
            Some(delta.max(0.0))
        }
    }
}

/// Sorts locations by their predicted delta for `unit`: descending, locations without a
/// prediction last.
pub fn sort_location_graph_data_set(items: &mut [LocationGraphData], unit: PredictionUnit) {
    crate::backtest::sort_by_predicted_delta(items, |item| item.predicted_diff(unit));
}

/// Backtests species-count curves of locations for one effort unit.
#[derive(Debug, Clone)]
pub struct SpeciesCountTarget {
    unit: PredictionUnit,
    max_points_to_regress: Option<usize>,
    power_fit: PowerFitOptions,
}
impl SpeciesCountTarget {
    pub fn new(unit: PredictionUnit, config: &ClusteringConfig) -> Self {
        Self {
            unit,
            max_points_to_regress: config.max_points_to_regress,
            power_fit: config.power_fit,
        }
    }
    fn series<'a>(&self, item: &'a LocationGraphData) -> &'a PointSeries {
        item.series(self.unit.effort_unit())
    }
}
impl BacktestTarget for SpeciesCountTarget {
    type Item = LocationGraphData;

    fn key<'a>(&self, item: &'a LocationGraphData) -> &'a str {
        &item.key
    }
    fn predicted_delta(&self, item: &LocationGraphData) -> Option<f64> {
        item.predicted_diff(self.unit)
    }
    fn set_predicted_delta(&self, item: &mut LocationGraphData, delta: Option<f64>) {
        item.set_predicted_diff(self.unit, delta);
    }
    fn put_predictions(&self, items: &mut [LocationGraphData], points_elided: usize) {
        for item in items {
            let delta = predict_delta_species(
                self.series(item),
                points_elided,
                self.max_points_to_regress,
                &self.power_fit,
            );
            self.set_predicted_delta(item, delta);
        }
    }
    fn actual_delta(&self, item: &LocationGraphData, points_elided: usize) -> Option<f64> {
        self.series(item).gain_after(points_elided)
    }
}

/// A generator backtesting `dataset` per visit or per person-visit.
pub fn species_generator<'a>(
    dataset: &'a mut [LocationGraphData],
    unit: PredictionUnit,
    config: &ClusteringConfig,
) -> PredictionStatsGenerator<'a, SpeciesCountTarget> {
    PredictionStatsGenerator::new(SpeciesCountTarget::new(unit, config), dataset, config)
}
