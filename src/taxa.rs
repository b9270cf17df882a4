//! Predicting which taxa the next visits of a cluster will record.
//!
//! Unlike the species curves, this model is discrete: a taxon's prediction is how many visits in
//! the visible history recorded it. Hiding visits replays each location's history backwards and
//! removes the hidden visits' records from a cluster-wide pool.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::backtest::{BacktestTarget, PredictionStatsGenerator};
use crate::config::ClusteringConfig;

/// Survey history of one location. Each visit lists the taxa it recorded, oldest visit first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationVisitHistory {
    pub location_key: String,
    #[serde(default)]
    pub visits: Vec<Vec<String>>,
}
impl LocationVisitHistory {
    /// The visit that comes right after the visible history when `visits_elided` are hidden.
    fn first_hidden(&self, visits_elided: usize) -> Option<&[String]> {
        if visits_elided == 0 || visits_elided > self.visits.len() {
            return None;
        }
        Some(&self.visits[self.visits.len() - visits_elided])
    }
}

/// A taxon of a cluster, ranked by predicted recurrence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxonGraphData {
    pub key: String,
    /// Visible visits that recorded the taxon; [`None`] if there are none.
    #[serde(default, skip_deserializing)]
    pub predicted_diff: Option<f64>,
}
impl TaxonGraphData {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            predicted_diff: None,
        }
    }
    /// Every taxon recorded in `histories`, in order of first record.
    pub fn from_histories(histories: &[LocationVisitHistory]) -> Vec<Self> {
        let mut seen = HashSet::new();
        histories
            .iter()
            .flat_map(|h| h.visits.iter().flatten())
            .filter(|taxon| seen.insert(taxon.as_str()))
            .map(|taxon| Self::new(taxon.clone()))
            .collect()
    }
}

type Pool = HashMap<String, usize>;

/// Backtests taxon recurrence over the visit histories of one cluster.
#[derive(Debug, Clone)]
pub struct TaxonOccurrenceTarget<'h> {
    histories: &'h [LocationVisitHistory],
    /// `pools[n]` holds the remaining occurrence counts with `n` visits hidden per location.
    pools: Vec<Pool>,
}
impl<'h> TaxonOccurrenceTarget<'h> {
    /// Prepares remaining-occurrence pools for hiding up to `max_visits_elided` visits.
    pub fn new(histories: &'h [LocationVisitHistory], max_visits_elided: usize) -> Self {
        let mut pool = Pool::new();
        for visit in histories.iter().flat_map(|h| &h.visits) {
            for taxon in distinct(visit) {
                *pool.entry(taxon.to_owned()).or_insert(0) += 1;
            }
        }
        let mut pools = Vec::with_capacity(max_visits_elided + 1);
        pools.push(pool);
        for visits_elided in 1..=max_visits_elided {
            let mut pool = pools[visits_elided - 1].clone();
            for history in histories {
                if let Some(visit) = history.first_hidden(visits_elided) {
                    remove_visit(&mut pool, visit);
                }
            }
            pools.push(pool);
        }
        Self { histories, pools }
    }

    /// Visible occurrences of `taxon` with `visits_elided` visits hidden per location.
    pub fn remaining_occurrences(&self, taxon: &str, visits_elided: usize) -> usize {
        if let Some(pool) = self.pools.get(visits_elided) {
            return pool.get(taxon).copied().unwrap_or(0);
        }
        self.histories
            .iter()
            .map(|h| {
                let visible = h.visits.len().saturating_sub(visits_elided);
                h.visits[..visible]
                    .iter()
                    .filter(|visit| visit.iter().any(|t| t == taxon))
                    .count()
            })
            .sum()
    }
}
impl BacktestTarget for TaxonOccurrenceTarget<'_> {
    type Item = TaxonGraphData;

    fn key<'a>(&self, item: &'a TaxonGraphData) -> &'a str {
        &item.key
    }
    fn predicted_delta(&self, item: &TaxonGraphData) -> Option<f64> {
        item.predicted_diff
    }
    fn set_predicted_delta(&self, item: &mut TaxonGraphData, delta: Option<f64>) {
        item.predicted_diff = delta;
    }
    fn put_predictions(&self, items: &mut [TaxonGraphData], points_elided: usize) {
        for item in items {
            let remaining = self.remaining_occurrences(&item.key, points_elided);
            let delta = (remaining > 0).then_some(remaining as f64);
            self.set_predicted_delta(item, delta);
        }
    }
    /// Locations whose first hidden visit recorded the taxon.
    fn actual_delta(&self, item: &TaxonGraphData, points_elided: usize) -> Option<f64> {
        if points_elided == 0 {
            return None;
        }
        let found = self
            .histories
            .iter()
            .filter_map(|h| h.first_hidden(points_elided))
            .filter(|visit| visit.iter().any(|t| *t == item.key))
            .count();
        Some(found as f64)
    }
}

/// A generator backtesting taxon recurrence in the cluster described by `histories`.
pub fn taxon_generator<'a, 'h>(
    dataset: &'a mut [TaxonGraphData],
    histories: &'h [LocationVisitHistory],
    config: &ClusteringConfig,
) -> PredictionStatsGenerator<'a, TaxonOccurrenceTarget<'h>> {
    let target = TaxonOccurrenceTarget::new(histories, config.prediction_history_sample_depth);
    PredictionStatsGenerator::new(target, dataset, config)
}

fn distinct(visit: &[String]) -> impl Iterator<Item = &str> {
    let mut seen = HashSet::new();
    visit
        .iter()
        .map(String::as_str)
        .filter(move |taxon| seen.insert(*taxon))
}

fn remove_visit(pool: &mut Pool, visit: &[String]) {
    for taxon in distinct(visit) {
        if let Some(count) = pool.get_mut(taxon) {
            *count = count.saturating_sub(1);
        }
    }
}
