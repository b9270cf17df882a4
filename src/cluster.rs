//! Running every backtest of a cluster, and summarising accuracy across clusters.

use serde::{Deserialize, Serialize};

use crate::averaging::{average_power_models, ModelAverager};
use crate::backtest::PredictionTierStat;
use crate::config::{ClusteringConfig, HeadlineRange};
use crate::error::Result;
use crate::power::{PowerFitModel, MIN_POWER_FIT_POINTS};
use crate::series::{EffortUnit, LocationGraphData, Point, PredictionUnit};
use crate::species::species_generator;
use crate::taxa::{taxon_generator, LocationVisitHistory, TaxonGraphData};

/// One cluster of locations as supplied by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterInput {
    #[serde(default)]
    pub key: String,
    pub locations: Vec<LocationGraphData>,
    #[serde(default)]
    pub visit_histories: Vec<LocationVisitHistory>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub clusters: Vec<ClusterInput>,
}
impl AnalysisRequest {
    /// Parses a JSON request and validates every location series in it.
    ///
    /// # Errors
    ///
    /// [`crate::Error::InputParse`] for malformed JSON, otherwise see [`Self::validate`].
    pub fn from_json(s: &str) -> Result<Self> {
        let request: Self = serde_json::from_str(s)?;
        request.validate()?;
        Ok(request)
    }

    /// # Errors
    ///
    /// [`crate::Error::InvalidSeries`] for the first location with a series that isn't ordered
    /// by strictly increasing `x` and non-decreasing `y`, or that holds a non-finite value.
    pub fn validate(&self) -> Result<()> {
        self.clusters
            .iter()
            .flat_map(|c| &c.locations)
            .try_for_each(LocationGraphData::validate)
    }
}

/// Parameters of a power curve, without its residuals.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CurveSummary {
    pub unit: EffortUnit,
    pub exponent: f64,
    pub scale: f64,
    pub offset: f64,
    pub rmse: f64,
    pub lowest_x: f64,
    pub highest_x: f64,
}
impl CurveSummary {
    fn new(unit: EffortUnit, model: &PowerFitModel) -> Self {
        Self {
            unit,
            exponent: model.exponent(),
            scale: model.scale(),
            offset: model.offset(),
            rmse: model.rmse(),
            lowest_x: model.lowest_x(),
            highest_x: model.highest_x(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterAnalysis {
    pub key: String,
    /// Sorted by forward-looking per-visit prediction.
    pub locations: Vec<LocationGraphData>,
    /// Sorted by forward-looking occurrence prediction.
    pub taxa: Vec<TaxonGraphData>,
    pub per_visit_stats: Vec<PredictionTierStat>,
    pub per_person_visit_stats: Vec<PredictionTierStat>,
    pub taxon_stats: Vec<PredictionTierStat>,
    pub per_visit_ranking: Vec<String>,
    pub per_person_visit_ranking: Vec<String>,
    /// Averaged per-location curves, for the effort units enough locations could be fit for.
    pub pooled_curves: Vec<CurveSummary>,
}
impl ClusterAnalysis {
    pub fn stats(&self, target: PredictionTarget) -> &[PredictionTierStat] {
        match target {
            PredictionTarget::PerVisit => &self.per_visit_stats,
            PredictionTarget::PerPersonVisit => &self.per_person_visit_stats,
            PredictionTarget::Taxa => &self.taxon_stats,
        }
    }
    /// Items the stats of `target` were ranked over.
    pub fn item_count(&self, target: PredictionTarget) -> usize {
        match target {
            PredictionTarget::PerVisit | PredictionTarget::PerPersonVisit => self.locations.len(),
            PredictionTarget::Taxa => self.taxa.len(),
        }
    }
}

/// Everything a cluster's tier stats are kept for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PredictionTarget {
    PerVisit,
    PerPersonVisit,
    Taxa,
}
impl PredictionTarget {
    pub const ALL: [Self; 3] = [Self::PerVisit, Self::PerPersonVisit, Self::Taxa];
}

/// Runs the per-person-visit, per-visit and taxon backtests of one cluster.
pub fn analyze_cluster(input: ClusterInput, config: &ClusteringConfig) -> ClusterAnalysis {
    let ClusterInput {
        key,
        mut locations,
        visit_histories,
    } = input;
    let _span = tracing::debug_span!("cluster", key = %key, locations = locations.len()).entered();

    let mut run = |unit: PredictionUnit| {
        let mut generator = species_generator(&mut locations, unit, config);
        let stats = generator.compute_average_stats();
        drop(generator);
        let ranking = locations.iter().map(|l| l.key.clone()).collect::<Vec<_>>();
        (stats, ranking)
    };
    // Per visit last, so the locations end up in that order.
    let (per_person_visit_stats, per_person_visit_ranking) = run(PredictionUnit::PerPersonVisit);
    let (per_visit_stats, per_visit_ranking) = run(PredictionUnit::PerVisit);

    let mut taxa = TaxonGraphData::from_histories(&visit_histories);
    let taxon_stats = taxon_generator(&mut taxa, &visit_histories, config).compute_average_stats();

    let pooled_curves = PredictionUnit::ALL
        .into_iter()
        .map(PredictionUnit::effort_unit)
        .filter_map(|unit| pooled_curve(&locations, unit, config))
        .collect();

    ClusterAnalysis {
        key,
        locations,
        taxa,
        per_visit_stats,
        per_person_visit_stats,
        taxon_stats,
        per_visit_ranking,
        per_person_visit_ranking,
        pooled_curves,
    }
}

fn pooled_curve(
    locations: &[LocationGraphData],
    unit: EffortUnit,
    config: &ClusteringConfig,
) -> Option<CurveSummary> {
    let mut models = Vec::new();
    let mut pooled: Vec<Point> = Vec::new();
    for location in locations {
        let points = location.series(unit).points();
        if points.len() < MIN_POWER_FIT_POINTS {
            continue;
        }
        match PowerFitModel::fit_with(points, &config.power_fit) {
            Ok(model) => {
                models.push(model);
                pooled.extend_from_slice(points);
            }
            Err(err) => tracing::debug!(%err, location = %location.key, "skipping location curve"),
        }
    }
    if models.is_empty() {
        return None;
    }
    let averager = ModelAverager::new(config.weight_power);
    match average_power_models(&averager, &models, &pooled, &config.power_fit) {
        Ok(model) => Some(CurveSummary::new(unit, &model)),
        Err(err) => {
            tracing::warn!(%err, ?unit, "failed to average location curves");
            None
        }
    }
}

/// The `fraction_correct` of the deepest tier in `range` the stats reach.
///
/// [`None`] if the stats don't reach `range.min_tier`.
pub fn headline_fraction(stats: &[PredictionTierStat], range: HeadlineRange) -> Option<f64> {
    let tier = range.max_tier.min(stats.len());
    if tier == 0 || tier < range.min_tier {
        return None;
    }
    Some(stats[tier - 1].fraction_correct)
}

/// Cross-cluster headline percentages for one [`HeadlineRange`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeadlineStat {
    pub range: HeadlineRange,
    pub per_visit_percent: Option<f64>,
    pub per_person_visit_percent: Option<f64>,
    pub taxon_percent: Option<f64>,
}
impl HeadlineStat {
    pub fn percent(&self, target: PredictionTarget) -> Option<f64> {
        match target {
            PredictionTarget::PerVisit => self.per_visit_percent,
            PredictionTarget::PerPersonVisit => self.per_person_visit_percent,
            PredictionTarget::Taxa => self.taxon_percent,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterSummaryStats {
    pub cluster_count: usize,
    pub location_count: usize,
    pub taxon_count: usize,
    pub headlines: Vec<HeadlineStat>,
}

/// Mean of each cluster's headline fraction, weighted by the cluster's item count, as a
/// percentage. Clusters without a headline for `range` don't count.
pub fn cross_cluster_percent(
    clusters: &[ClusterAnalysis],
    target: PredictionTarget,
    range: HeadlineRange,
) -> Option<f64> {
    let (sum, weight) = clusters
        .iter()
        .filter_map(|c| {
            let fraction = headline_fraction(c.stats(target), range)?;
            Some((fraction, c.item_count(target)))
        })
        .fold((0.0, 0_usize), |(sum, weight), (fraction, count)| {
            (sum + fraction * count as f64, weight + count)
        });
    (weight > 0).then(|| 100.0 * sum / weight as f64)
}

pub fn summarize(clusters: &[ClusterAnalysis], ranges: &[HeadlineRange]) -> ClusterSummaryStats {
    let headlines = ranges
        .iter()
        .map(|&range| HeadlineStat {
            range,
            per_visit_percent: cross_cluster_percent(clusters, PredictionTarget::PerVisit, range),
            per_person_visit_percent: cross_cluster_percent(
                clusters,
                PredictionTarget::PerPersonVisit,
                range,
            ),
            taxon_percent: cross_cluster_percent(clusters, PredictionTarget::Taxa, range),
        })
        .collect();
    ClusterSummaryStats {
        cluster_count: clusters.len(),
        location_count: clusters.iter().map(|c| c.locations.len()).sum(),
        taxon_count: clusters.iter().map(|c| c.taxa.len()).sum(),
        headlines,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub clusters: Vec<ClusterAnalysis>,
    pub summary: ClusterSummaryStats,
}

/// Analyses up to `config.max_clusters` clusters of `request` and summarises them.
pub fn analyze(request: AnalysisRequest, config: &ClusteringConfig) -> AnalysisReport {
    let mut inputs = request.clusters;
    if inputs.len() > config.max_clusters {
        tracing::warn!(
            clusters = inputs.len(),
            max_clusters = config.max_clusters,
            "dropping clusters beyond the configured maximum"
        );
        inputs.truncate(config.max_clusters);
    }
    let clusters: Vec<ClusterAnalysis> = inputs
        .into_iter()
        .map(|input| analyze_cluster(input, config))
        .collect();
    let summary = summarize(&clusters, &config.headline_ranges);
    AnalysisReport { clusters, summary }
}
