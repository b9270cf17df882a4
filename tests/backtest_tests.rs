//! Tests for backtesting species-count and taxon-occurrence predictions.
//!
//! ## Test Organization
//!
//! 1. **Species Predictions** - Next-gain predictions of single series
//! 2. **Species Backtests** - Tier accuracy over whole datasets
//! 3. **Taxon Backtests** - Occurrence rankings over visit histories
//! 4. **Properties** - Sorting and slicing invariants

use approx::assert_relative_eq;
use proptest::prelude::*;

use effort_curve::backtest::{cmp_descending_nones_last, sort_by_predicted_delta};
use effort_curve::species::{predict_delta_species, sort_location_graph_data_set, species_generator};
use effort_curve::taxa::{taxon_generator, LocationVisitHistory, TaxonGraphData};
use effort_curve::{
    ClusteringConfig, EffortUnit, LocationGraphData, Point, PointSeries, PointSliceSpec,
    PowerFitOptions, PredictionTierStat, PredictionUnit,
};

fn series(f: impl Fn(f64) -> f64, n: usize) -> PointSeries {
    PointSeries::new((1..=n).map(|x| Point::new(x as f64, f(x as f64))).collect())
}

fn location(key: &str, points: PointSeries) -> LocationGraphData {
    LocationGraphData::new(key).with_series(EffortUnit::Visits, points)
}

fn config(depth: usize) -> ClusteringConfig {
    ClusteringConfig {
        prediction_history_sample_depth: depth,
        ..ClusteringConfig::default()
    }
}

fn fractions(stats: &[PredictionTierStat]) -> Vec<f64> {
    stats.iter().map(|s| s.fraction_correct).collect()
}

fn contributing(stats: &[PredictionTierStat]) -> Vec<usize> {
    stats.iter().map(|s| s.contributing_locations).collect()
}

fn keys(locations: &[LocationGraphData]) -> Vec<&str> {
    locations.iter().map(|l| l.key.as_str()).collect()
}

// ============================================================================
// Species Prediction Tests
// ============================================================================

/// Two remaining points predict the slope between them.
#[test]
fn test_two_points_predict_slope() {
    let two = PointSeries::from_pairs(&[[1.0, 1.0], [2.0, 2.0]]);
    let options = PowerFitOptions::default();
    assert_eq!(predict_delta_species(&two, 0, None, &options), Some(1.0));

    let shared_x = PointSeries::from_pairs(&[[1.0, 1.0], [1.0, 4.0]]);
    assert_eq!(predict_delta_species(&shared_x, 0, None, &options), Some(0.0));
}

/// With two points left after slicing, the slope spans the whole series.
#[test]
fn test_two_remaining_points_use_series_endpoints() {
    let options = PowerFitOptions::default();
    // Visible slope 2, whole series (11 - 1) / 4.
    let elided = PointSeries::from_pairs(&[[1.0, 1.0], [2.0, 3.0], [3.0, 4.0], [4.0, 8.0], [5.0, 11.0]]);
    assert_eq!(predict_delta_species(&elided, 3, None, &options), Some(2.5));

    // Last two points have slope 5, whole series 15 / 5.
    let capped = PointSeries::from_pairs(&[
        [1.0, 0.0],
        [2.0, 1.0],
        [3.0, 3.0],
        [4.0, 6.0],
        [5.0, 10.0],
        [6.0, 15.0],
    ]);
    assert_eq!(predict_delta_species(&capped, 0, Some(2), &options), Some(3.0));
}

/// Fewer than two remaining points give no prediction.
#[test]
fn test_too_few_points_predict_nothing() {
    let options = PowerFitOptions::default();
    let one = PointSeries::from_pairs(&[[1.0, 1.0]]);
    assert_eq!(predict_delta_species(&one, 0, None, &options), None);
    assert_eq!(predict_delta_species(&PointSeries::default(), 0, None, &options), None);

    let three = series(|x| x, 3);
    assert_eq!(predict_delta_species(&three, 2, None, &options), None);
    assert_eq!(predict_delta_species(&three, 5, None, &options), None);
}

/// Straight lines predict their slope.
#[test]
fn test_linear_series_predicts_slope() {
    let options = PowerFitOptions::default();
    for slope in [1.0, 3.0, 5.0] {
        let delta = predict_delta_species(&series(|x| slope * x, 4), 0, None, &options).unwrap();
        assert_eq!(delta.round(), slope);
    }
}

/// Hiding points predicts from the visible history only.
#[test]
fn test_elided_points_are_ignored() {
    let options = PowerFitOptions::default();
    // Ends in a jump that a fit of the first five points can't know about.
    let mut points = series(|x| x, 5).points().to_vec();
    points.push(Point::new(6.0, 50.0));
    let jumpy = PointSeries::new(points);

    let visible = predict_delta_species(&jumpy, 1, None, &options).unwrap();
    assert_relative_eq!(visible, 1.0, max_relative = 0.01);
    let forward = predict_delta_species(&jumpy, 0, None, &options).unwrap();
    assert!(forward > 1.0, "{forward}");
}

/// Gains never predict a loss.
#[test]
fn test_prediction_never_negative() {
    let saturating = PointSeries::from_pairs(&[[1.0, 5.0], [2.0, 9.0], [3.0, 10.0], [4.0, 10.0]]);
    let delta = predict_delta_species(&saturating, 0, None, &PowerFitOptions::default()).unwrap();
    assert!(delta >= 0.0, "{delta}");
}

// ============================================================================
// Species Backtest Tests
// ============================================================================

/// Curves with clearly separated gains rank perfectly at every tier.
#[test]
fn test_separated_curves_rank_perfectly() {
    let mut dataset = vec![
        location("flat", series(|_| 0.0, 6)),
        location("three", series(|x| 3.0 * x, 6)),
        location("square", series(|x| x * x, 6)),
    ];
    let stats = species_generator(&mut dataset, PredictionUnit::PerVisit, &config(3))
        .compute_average_stats();

    assert_eq!(fractions(&stats), [1.0, 1.0, 1.0]);
    assert_eq!(contributing(&stats), [1, 2, 3]);
    assert_eq!(keys(&dataset), ["square", "three", "flat"]);
}

/// Tiers are capped by the configured maximum.
#[test]
fn test_tiers_capped() {
    let mut dataset = vec![
        location("flat", series(|_| 0.0, 6)),
        location("three", series(|x| 3.0 * x, 6)),
        location("square", series(|x| x * x, 6)),
    ];
    let config = ClusteringConfig {
        max_prediction_tiers: 2,
        ..config(3)
    };
    let stats = species_generator(&mut dataset, PredictionUnit::PerVisit, &config)
        .compute_average_stats();

    assert_eq!(contributing(&stats), [1, 2]);
    // Every item still gets its forward prediction.
    assert!(dataset.iter().all(|l| l.predicted_per_visit_diff.is_some()));
}

/// Mis-ranked trials lower the averaged fractions.
///
/// With three points hidden, `c` is predicted first but gains least; with one or two hidden,
/// `b` and `c` swap places.
#[test]
fn test_mixed_rankings() {
    let mut dataset = vec![
        location("a", series(|x| 3.0 * x, 6)),
        location(
            "b",
            PointSeries::from_pairs(&[
                [1.0, 1.0],
                [2.0, 3.0],
                [3.0, 4.0],
                [4.0, 7.0],
                [5.0, 8.0],
                [6.0, 8.0],
            ]),
        ),
        location(
            "c",
            PointSeries::from_pairs(&[
                [1.0, 2.0],
                [2.0, 3.0],
                [3.0, 6.0],
                [4.0, 6.0],
                [5.0, 9.0],
                [6.0, 12.0],
            ]),
        ),
    ];
    let stats = species_generator(&mut dataset, PredictionUnit::PerVisit, &config(3))
        .compute_average_stats();

    let got = fractions(&stats);
    assert_eq!(got.len(), 3);
    assert_relative_eq!(got[0], 2.0 / 3.0, epsilon = 1e-12);
    assert_relative_eq!(got[1], 0.5, epsilon = 1e-12);
    assert_relative_eq!(got[2], 1.0, epsilon = 1e-12);
    assert_eq!(keys(&dataset), ["a", "c", "b"]);
}

/// A dataset that can't produce a single backtest prediction has no stats.
#[test]
fn test_unpredictable_dataset_is_empty() {
    for n in [1, 2] {
        let mut dataset = vec![location("only", series(|x| x, n))];
        let stats = species_generator(&mut dataset, PredictionUnit::PerVisit, &config(3))
            .compute_average_stats();
        assert!(stats.is_empty(), "{n} points: {stats:?}");
    }
}

/// The forward prediction of a two point series survives the backtest.
#[test]
fn test_forward_prediction_after_backtest() {
    let mut dataset = vec![location(
        "one",
        PointSeries::from_pairs(&[[1.0, 1.0], [2.0, 2.0]]),
    )];
    let stats = species_generator(&mut dataset, PredictionUnit::PerVisit, &config(3))
        .compute_average_stats();

    assert!(stats.is_empty());
    assert_eq!(dataset[0].predicted_diff(PredictionUnit::PerVisit), Some(1.0));
    assert_eq!(dataset[0].predicted_diff(PredictionUnit::PerPersonVisit), None);
}

/// Running a backtest twice gives the same stats and ordering.
#[test]
fn test_backtest_is_idempotent() {
    let mut dataset = vec![
        location("a", series(|x| 3.0 * x, 6)),
        location("b", series(|x| x.sqrt(), 6)),
        location("c", series(|x| 2.0 * x * x, 5)),
        location("d", series(|x| x, 2)),
    ];
    let config = config(4);
    let first = species_generator(&mut dataset, PredictionUnit::PerVisit, &config)
        .compute_average_stats();
    let snapshot = dataset.clone();
    let second = species_generator(&mut dataset, PredictionUnit::PerVisit, &config)
        .compute_average_stats();

    assert_eq!(first, second);
    assert_eq!(snapshot, dataset);
}

/// Location sorting follows the requested unit.
#[test]
fn test_sort_location_graph_data_set() {
    let mut items = vec![
        LocationGraphData::new("a"),
        LocationGraphData::new("b"),
        LocationGraphData::new("c"),
    ];
    items[0].set_predicted_diff(PredictionUnit::PerVisit, Some(1.0));
    items[2].set_predicted_diff(PredictionUnit::PerVisit, Some(2.0));
    items[1].set_predicted_diff(PredictionUnit::PerPersonVisit, Some(9.0));

    sort_location_graph_data_set(&mut items, PredictionUnit::PerVisit);
    assert_eq!(keys(&items), ["c", "a", "b"]);
    sort_location_graph_data_set(&mut items, PredictionUnit::PerPersonVisit);
    assert_eq!(keys(&items), ["b", "c", "a"]);
}

// ============================================================================
// Taxon Backtest Tests
// ============================================================================

fn history(key: &str, visits: &[&[&str]]) -> LocationVisitHistory {
    LocationVisitHistory {
        location_key: key.to_owned(),
        visits: visits
            .iter()
            .map(|visit| visit.iter().map(|t| (*t).to_owned()).collect())
            .collect(),
    }
}

/// Taxa recorded often early but never late are ranked wrongly.
#[test]
fn test_taxon_backtest() {
    let histories = [
        history("north", &[&["x"], &["x"], &["y"], &["y"]]),
        history("south", &[&["x"], &["x"], &["z"], &["z"]]),
    ];
    let mut taxa = TaxonGraphData::from_histories(&histories);
    let stats = taxon_generator(&mut taxa, &histories, &config(2)).compute_average_stats();

    assert_eq!(fractions(&stats), [0.5, 0.5, 1.0]);
    assert_eq!(contributing(&stats), [1, 2, 3]);
    let ranked: Vec<(&str, Option<f64>)> = taxa
        .iter()
        .map(|t| (t.key.as_str(), t.predicted_diff))
        .collect();
    assert_eq!(ranked, [("x", Some(4.0)), ("y", Some(2.0)), ("z", Some(2.0))]);
}

/// Taxa without remaining occurrences get no prediction.
#[test]
fn test_taxon_without_history_unpredicted() {
    let histories = [history("north", &[&["x"]])];
    let mut taxa = vec![TaxonGraphData::new("x"), TaxonGraphData::new("ghost")];
    let stats = taxon_generator(&mut taxa, &histories, &config(1)).compute_average_stats();

    assert!(stats.is_empty());
    assert_eq!(taxa[0].predicted_diff, Some(1.0));
    assert_eq!(taxa[1].predicted_diff, None);
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    /// Sorting puts values first, descending, and keeps ties in order.
    #[test]
    fn prop_sort_descending_nones_last(
        deltas in prop::collection::vec(prop::option::of(0.0..100.0_f64), 0..40)
    ) {
        let mut indexed: Vec<(usize, Option<f64>)> = deltas.iter().copied().enumerate().collect();
        sort_by_predicted_delta(&mut indexed, |(_, d)| *d);

        for pair in indexed.windows(2) {
            let (ia, a) = pair[0];
            let (ib, b) = pair[1];
            prop_assert_ne!(cmp_descending_nones_last(a, b), std::cmp::Ordering::Greater);
            if a == b {
                prop_assert!(ia < ib);
            }
        }
        let some = deltas.iter().filter(|d| d.is_some()).count();
        prop_assert!(indexed[..some].iter().all(|(_, d)| d.is_some()));
    }

    /// Slices are recent, capped and either empty or at least the minimum.
    #[test]
    fn prop_slice_invariants(
        len in 0..30_usize,
        ignore in 0..35_usize,
        max in prop::option::of(0..30_usize),
        min in 0..10_usize,
    ) {
        let points: Vec<Point> = (0..len).map(|i| Point::new(i as f64, i as f64)).collect();
        let spec = PointSliceSpec {
            min_point_count: min,
            max_point_count: max,
            recent_points_to_ignore: ignore,
        };
        let slice = spec.slice(&points);
        let visible = len.saturating_sub(ignore);

        prop_assert!(slice.len() <= visible);
        if let Some(max) = max {
            prop_assert!(slice.len() <= max);
        }
        prop_assert!(slice.is_empty() || slice.len() >= min);
        if let Some(last) = slice.last() {
            prop_assert_eq!(last.x, (visible - 1) as f64);
        }
    }
}
