//! Scoring predictions against history.
//!
//! A backtest hides the most recent `n` points of every item, predicts the next gain of each item
//! from what's left, and compares the predicted ranking to the ranking of the gains that actually
//! followed. This is repeated for `n` from the configured sample depth down to `1` and the
//! per-tier accuracies are averaged, weighted by how many items each tier covered.
//!
//! What an item is and how it's predicted is up to the [`BacktestTarget`]; the scoring is shared.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::config::ClusteringConfig;
use crate::F64Ord;

/// Accuracy of the top-k ranking, for one `k` (the tier).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredictionTierStat {
    /// Share of the `k` best predicted items that also were among the `k` best actual items.
    pub fraction_correct: f64,
    /// Items the fraction is taken over; `k` for every reported tier.
    pub contributing_locations: usize,
}

/// The operations a backtest needs from a dataset.
///
/// The target owns the prediction strategy. Items only carry a key and a predicted-delta slot,
/// which the target overwrites.
pub trait BacktestTarget {
    type Item;

    /// Stable, unique identity of `item`.
    fn key<'a>(&self, item: &'a Self::Item) -> &'a str;
    fn predicted_delta(&self, item: &Self::Item) -> Option<f64>;
    fn set_predicted_delta(&self, item: &mut Self::Item, delta: Option<f64>);
    /// Recomputes the predicted delta of every item as if the most recent `points_elided` points
    /// didn't exist yet. Items without enough remaining history get [`None`].
    fn put_predictions(&self, items: &mut [Self::Item], points_elided: usize);
    /// The gain that actually followed the visible history at `points_elided`.
    fn actual_delta(&self, item: &Self::Item, points_elided: usize) -> Option<f64>;

    /// Sorts by predicted delta, see [`sort_by_predicted_delta`].
    fn sort_dataset(&self, items: &mut [Self::Item]) {
        sort_by_predicted_delta(items, |item| self.predicted_delta(item));
    }
}

/// Descending with [`None`] after every value. Stable, so ties keep their order.
pub fn cmp_descending_nones_last(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => F64Ord(b).cmp(&F64Ord(a)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Sorts `items` by descending `delta`, items without one last.
pub fn sort_by_predicted_delta<I>(items: &mut [I], delta: impl Fn(&I) -> Option<f64>) {
    items.sort_by(|a, b| cmp_descending_nones_last(delta(a), delta(b)));
}

/// Per-tier accuracy of one trial.
///
/// The item at predicted rank `i` found at actual rank `a` counts as correct for every tier
/// `j >= max(i, a)`: from that cutoff on it's in the top of both rankings. Items missing from
/// `actual` are never correct. The result has one entry per predicted item.
pub fn compare_rankings(predicted: &[&str], actual: &[&str]) -> Vec<PredictionTierStat> {
    let tiers = predicted.len();
    let mut newly_correct = vec![0_usize; tiers];
    for (i, key) in predicted.iter().enumerate() {
        if let Some(a) = actual.iter().position(|k| k == key) {
            let tier = i.max(a);
            if tier < tiers {
                newly_correct[tier] += 1;
            }
        }
    }
    let mut correct = 0;
    newly_correct
        .into_iter()
        .enumerate()
        .map(|(j, n)| {
            correct += n;
            let k = j + 1;
            PredictionTierStat {
                fraction_correct: correct as f64 / k as f64,
                contributing_locations: k,
            }
        })
        .collect()
}

/// Runs backtests of a [`BacktestTarget`] over a dataset it has exclusive access to.
pub struct PredictionStatsGenerator<'a, T: BacktestTarget> {
    target: T,
    dataset: &'a mut [T::Item],
    sample_depth: usize,
    max_tiers: usize,
}
impl<'a, T: BacktestTarget> PredictionStatsGenerator<'a, T> {
    pub fn new(target: T, dataset: &'a mut [T::Item], config: &ClusteringConfig) -> Self {
        Self {
            target,
            dataset,
            sample_depth: config.prediction_history_sample_depth,
            max_tiers: config.max_prediction_tiers,
        }
    }

    /// Backtests at every depth from the sample depth down to `1` and returns the weighted mean
    /// accuracy per tier.
    ///
    /// Tiers past the deepest one any trial populated aren't returned, so the result is empty
    /// when no trial produced a single prediction. Afterwards, every item holds its
    /// forward-looking prediction (nothing elided) and the dataset is sorted by it.
    pub fn compute_average_stats(&mut self) -> Vec<PredictionTierStat> {
        let mut weighted_fractions = vec![0.0; self.max_tiers];
        let mut weights = vec![0_usize; self.max_tiers];
        let mut populated = 0;

        for points_elided in (1..=self.sample_depth).rev() {
            let Some(trial) = self.run_trial(points_elided) else {
                tracing::debug!(points_elided, "no predictions in trial");
                continue;
            };
            tracing::debug!(points_elided, tiers = trial.len(), "scored trial");
            populated = populated.max(trial.len());
            for (tier, stat) in trial.iter().enumerate() {
                let contributing = stat.contributing_locations;
                weighted_fractions[tier] += stat.fraction_correct * contributing as f64;
                weights[tier] += contributing;
            }
        }

        self.target.put_predictions(self.dataset, 0);
        self.target.sort_dataset(self.dataset);

        // Every tier below `populated` was filled by the trial that reached `populated`, so none
        // of the kept weights is zero.
        weighted_fractions
            .iter()
            .zip(&weights)
            .take(populated)
            .enumerate()
            .map(|(tier, (&sum, &weight))| PredictionTierStat {
                fraction_correct: sum / weight as f64,
                contributing_locations: tier + 1,
            })
            .collect()
    }

    /// [`None`] if no item got a prediction.
    fn run_trial(&mut self, points_elided: usize) -> Option<Vec<PredictionTierStat>> {
        let target = &self.target;
        target.put_predictions(self.dataset, points_elided);
        target.sort_dataset(self.dataset);

        let ranked: Vec<&T::Item> = self
            .dataset
            .iter()
            .filter(|item| target.predicted_delta(item).is_some())
            .collect();
        if ranked.is_empty() {
            return None;
        }
        let predicted: Vec<&str> = ranked
            .iter()
            .take(self.max_tiers)
            .map(|&item| target.key(item))
            .collect();

        let mut by_actual = ranked;
        by_actual.sort_by(|a, b| {
            cmp_descending_nones_last(
                target.actual_delta(a, points_elided),
                target.actual_delta(b, points_elided),
            )
        });
        let actual: Vec<&str> = by_actual
            .iter()
            .take(self.max_tiers)
            .map(|&item| target.key(item))
            .collect();

        Some(compare_rankings(&predicted, &actual))
    }
}
