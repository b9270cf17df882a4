//! Accumulation series: cumulative counts against cumulative effort.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// `x` is cumulative effort, `y` the cumulative count.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct Point {
    pub x: f64,
    pub y: f64,
}
impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}
impl From<[f64; 2]> for Point {
    fn from([x, y]: [f64; 2]) -> Self {
        Self { x, y }
    }
}
impl From<Point> for [f64; 2] {
    fn from(p: Point) -> Self {
        [p.x, p.y]
    }
}

/// Windowing policy applied before fitting.
///
/// The last `recent_points_to_ignore` points are dropped, then at most `max_point_count` of the
/// most recent remaining points are kept. If fewer than `min_point_count` remain, the slice is
/// empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointSliceSpec {
    pub min_point_count: usize,
    pub max_point_count: Option<usize>,
    pub recent_points_to_ignore: usize,
}
impl PointSliceSpec {
    pub fn slice<'a>(&self, points: &'a [Point]) -> &'a [Point] {
        let end = points.len().saturating_sub(self.recent_points_to_ignore);
        let start = self
            .max_point_count
            .map_or(0, |max| end.saturating_sub(max));
        let remaining = &points[start..end];
        if remaining.len() < self.min_point_count {
            &[]
        } else {
            remaining
        }
    }
}

/// The x-axis of an accumulation curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EffortUnit {
    Days,
    Visits,
    PersonVisits,
}

/// Which predicted-delta slot of a [`LocationGraphData`] a prediction targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PredictionUnit {
    PerVisit,
    PerPersonVisit,
}
impl PredictionUnit {
    pub const ALL: [Self; 2] = [Self::PerVisit, Self::PerPersonVisit];

    /// The series predictions for this slot are made from.
    pub fn effort_unit(self) -> EffortUnit {
        match self {
            Self::PerVisit => EffortUnit::Visits,
            Self::PerPersonVisit => EffortUnit::PersonVisits,
        }
    }
}

/// An ordered series of points for one item and one effort unit.
///
/// Points are assumed sorted with strictly increasing `x` and non-decreasing `y`. Slicing is
/// positional, so a series violating that gives meaningless predictions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PointSeries {
    points: Vec<Point>,
}
impl PointSeries {
    pub fn new(points: Vec<Point>) -> Self {
        Self { points }
    }
    /// Builds a series from raw `[x, y]` pairs without checking them.
    pub fn from_pairs(pairs: &[[f64; 2]]) -> Self {
        Self::new(pairs.iter().copied().map(Point::from).collect())
    }
    /// Like [`Self::new`], but verifies the ordering invariants.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSeries`] naming `key` if a value isn't finite, `x` doesn't
    /// strictly increase, or `y` decreases.
    pub fn checked(key: &str, points: Vec<Point>) -> Result<Self> {
        let series = Self { points };
        series.validate(key)?;
        Ok(series)
    }
    /// Verifies the ordering invariants of an existing series, see [`Self::checked`].
    ///
    /// # Errors
    ///
    /// [`Error::InvalidSeries`] naming `key`.
    pub fn validate(&self, key: &str) -> Result<()> {
        let invalid = |reason: String| Error::InvalidSeries {
            key: key.to_owned(),
            reason,
        };
        let points = &self.points;
        if let Some(p) = points.iter().find(|p| !p.x.is_finite() || !p.y.is_finite()) {
            return Err(invalid(format!("non-finite point ({}, {})", p.x, p.y)));
        }
        for pair in points.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            if b.x <= a.x {
                return Err(invalid(format!("x must increase, {} follows {}", b.x, a.x)));
            }
            if b.y < a.y {
                return Err(invalid(format!("y must not decrease, {} follows {}", b.y, a.y)));
            }
        }
        Ok(())
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }
    pub fn len(&self) -> usize {
        self.points.len()
    }
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
    pub fn first(&self) -> Option<&Point> {
        self.points.first()
    }
    pub fn last(&self) -> Option<&Point> {
        self.points.last()
    }
    pub fn slice(&self, spec: &PointSliceSpec) -> &[Point] {
        spec.slice(&self.points)
    }
    /// The gain in `y` from the last visible point to the first hidden one when the most recent
    /// `points_elided` points are hidden.
    ///
    /// [`None`] when nothing is hidden or nothing stays visible.
    pub fn gain_after(&self, points_elided: usize) -> Option<f64> {
        if points_elided == 0 || points_elided >= self.points.len() {
            return None;
        }
        let next = self.points.len() - points_elided;
        Some(self.points[next].y - self.points[next - 1].y)
    }
}
impl From<Vec<Point>> for PointSeries {
    fn from(points: Vec<Point>) -> Self {
        Self::new(points)
    }
}

/// Per-location record fed to the location generators.
///
/// The predicted-delta slots are written only by the prediction engine: once per backtest trial
/// and a final time with nothing elided, which leaves a forward-looking prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationGraphData {
    pub key: String,
    #[serde(default)]
    pub per_day_points: PointSeries,
    #[serde(default)]
    pub per_visit_points: PointSeries,
    #[serde(default)]
    pub per_person_visit_points: PointSeries,
    #[serde(default, skip_deserializing)]
    pub predicted_per_visit_diff: Option<f64>,
    #[serde(default, skip_deserializing)]
    pub predicted_per_person_visit_diff: Option<f64>,
}
impl LocationGraphData {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            per_day_points: PointSeries::default(),
            per_visit_points: PointSeries::default(),
            per_person_visit_points: PointSeries::default(),
            predicted_per_visit_diff: None,
            predicted_per_person_visit_diff: None,
        }
    }
    #[must_use]
    pub fn with_series(mut self, unit: EffortUnit, series: impl Into<PointSeries>) -> Self {
        *self.series_mut(unit) = series.into();
        self
    }
    pub fn series(&self, unit: EffortUnit) -> &PointSeries {
        match unit {
            EffortUnit::Days => &self.per_day_points,
            EffortUnit::Visits => &self.per_visit_points,
            EffortUnit::PersonVisits => &self.per_person_visit_points,
        }
    }
    /// Validates every series of the location, see [`PointSeries::validate`].
    ///
    /// # Errors
    ///
    /// [`Error::InvalidSeries`] naming the location key and the effort unit.
    pub fn validate(&self) -> Result<()> {
        for unit in [EffortUnit::Days, EffortUnit::Visits, EffortUnit::PersonVisits] {
            self.series(unit)
                .validate(&format!("{} ({unit:?})", self.key))?;
        }
        Ok(())
    }
    pub fn series_mut(&mut self, unit: EffortUnit) -> &mut PointSeries {
        match unit {
            EffortUnit::Days => &mut self.per_day_points,
            EffortUnit::Visits => &mut self.per_visit_points,
            EffortUnit::PersonVisits => &mut self.per_person_visit_points,
        }
    }
    pub fn predicted_diff(&self, unit: PredictionUnit) -> Option<f64> {
        match unit {
            PredictionUnit::PerVisit => self.predicted_per_visit_diff,
            PredictionUnit::PerPersonVisit => self.predicted_per_person_visit_diff,
        }
    }
    pub fn set_predicted_diff(&mut self, unit: PredictionUnit, diff: Option<f64>) {
        match unit {
            PredictionUnit::PerVisit => self.predicted_per_visit_diff = diff,
            PredictionUnit::PerPersonVisit => self.predicted_per_person_visit_diff = diff,
        }
    }
}
