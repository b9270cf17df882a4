//! Analysis configuration, usually read from a TOML file.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::power::PowerFitOptions;

/// A "top N..top M" window for headline statistics, in 1-indexed tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeadlineRange {
    pub min_tier: usize,
    pub max_tier: usize,
}
impl HeadlineRange {
    pub const fn new(min_tier: usize, max_tier: usize) -> Self {
        Self { min_tier, max_tier }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusteringConfig {
    /// Clusters beyond this count aren't analysed.
    #[serde(default = "default_max_clusters")]
    pub max_clusters: usize,
    /// Caps how many of the most recent points feed a fit. [`None`] is unbounded.
    #[serde(default)]
    pub max_points_to_regress: Option<usize>,
    /// How many trailing points are replayed when backtesting.
    #[serde(default = "default_prediction_history_sample_depth")]
    pub prediction_history_sample_depth: usize,
    #[serde(default = "default_max_prediction_tiers")]
    pub max_prediction_tiers: usize,
    /// Exponent of the last x value when weighting models for averaging.
    #[serde(default = "default_weight_power")]
    pub weight_power: f64,
    #[serde(default = "default_headline_ranges")]
    pub headline_ranges: Vec<HeadlineRange>,
    #[serde(default)]
    pub power_fit: PowerFitOptions,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            max_clusters: default_max_clusters(),
            max_points_to_regress: None,
            prediction_history_sample_depth: default_prediction_history_sample_depth(),
            max_prediction_tiers: default_max_prediction_tiers(),
            weight_power: default_weight_power(),
            headline_ranges: default_headline_ranges(),
            power_fit: PowerFitOptions::default(),
        }
    }
}

fn default_max_clusters() -> usize {
    8
}
fn default_prediction_history_sample_depth() -> usize {
    8
}
fn default_max_prediction_tiers() -> usize {
    10
}
fn default_weight_power() -> f64 {
    1.0
}
fn default_headline_ranges() -> Vec<HeadlineRange> {
    vec![
        HeadlineRange::new(1, 1),
        HeadlineRange::new(1, 3),
        HeadlineRange::new(1, 5),
        HeadlineRange::new(1, 10),
    ]
}

impl ClusteringConfig {
    /// Parses and validates a TOML document. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// [`Error::ConfigParse`] for malformed TOML, otherwise see [`Self::validate`].
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads [`Self::from_toml_str`] from a file.
    ///
    /// # Errors
    ///
    /// [`Error::Io`] if the file can't be read, otherwise see [`Self::from_toml_str`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// # Errors
    ///
    /// [`Error::InvalidConfig`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(Error::InvalidConfig(msg.to_owned()));
        if self.max_clusters == 0 {
            return invalid("max_clusters must be at least 1");
        }
        if self.max_points_to_regress == Some(0) {
            return invalid("max_points_to_regress must be at least 1 when set");
        }
        if self.prediction_history_sample_depth == 0 {
            return invalid("prediction_history_sample_depth must be at least 1");
        }
        if self.max_prediction_tiers == 0 {
            return invalid("max_prediction_tiers must be at least 1");
        }
        if !self.weight_power.is_finite() {
            return invalid("weight_power must be finite");
        }
        if self
            .headline_ranges
            .iter()
            .any(|r| r.min_tier == 0 || r.min_tier > r.max_tier)
        {
            return invalid("headline ranges need 1 <= min_tier <= max_tier");
        }
        let fit = &self.power_fit;
        if !(fit.lower_bound.is_finite() && fit.upper_bound.is_finite())
            || fit.lower_bound >= fit.upper_bound
        {
            return invalid("power_fit bounds must be finite with lower_bound < upper_bound");
        }
        if fit.partitions == 0 {
            return invalid("power_fit.partitions must be at least 1");
        }
        Ok(())
    }
}
