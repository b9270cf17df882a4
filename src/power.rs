//! Power curves `y = A * x^P + B`, fit by searching over `P`.
//!
//! For any fixed `P` the curve is an ordinary least squares problem (see
//! [`PowerBasis`]). The exponent is found in two phases:
//!
//! 1. an n-ary scan over `[lower_bound, upper_bound]` to find the neighbourhood of the best
//!    exponent, then
//! 2. a fixed number of bisection steps inside that neighbourhood, each moving whichever bound
//!    fits worse to the midpoint.
//!
//! Both phases have fixed iteration counts, so fitting cost is bounded and the result is
//! deterministic.

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::regression::{FittedModel, PowerBasis, Predictive, Regression};
use crate::series::Point;

/// Fewest points a power fit accepts.
pub const MIN_POWER_FIT_POINTS: usize = 3;

/// Search settings for [`PowerFitModel::fit`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PowerFitOptions {
    #[serde(default = "default_lower_bound")]
    pub lower_bound: f64,
    #[serde(default = "default_upper_bound")]
    pub upper_bound: f64,
    /// Count of equal steps in the coarse scan. The scan fits `partitions + 1` exponents.
    #[serde(default = "default_partitions")]
    pub partitions: usize,
    /// Count of bisection steps after the scan.
    #[serde(default = "default_refinement_depth")]
    pub refinement_depth: usize,
}
impl Default for PowerFitOptions {
    fn default() -> Self {
        Self {
            lower_bound: default_lower_bound(),
            upper_bound: default_upper_bound(),
            partitions: default_partitions(),
            refinement_depth: default_refinement_depth(),
        }
    }
}
fn default_lower_bound() -> f64 {
    0.001
}
fn default_upper_bound() -> f64 {
    3.0
}
fn default_partitions() -> usize {
    8
}
fn default_refinement_depth() -> usize {
    8
}

#[derive(Debug, Clone)]
pub struct PowerFitModel {
    regression: Regression<PowerBasis>,
}
impl PowerFitModel {
    /// Fits with [`PowerFitOptions::default`].
    ///
    /// # Errors
    ///
    /// See [`Self::fit_with`].
    pub fn fit(points: &[Point]) -> Result<Self> {
        Self::fit_with(points, &PowerFitOptions::default())
    }
    /// Finds the exponent minimising RMSE within the bounds of `options`.
    ///
    /// # Errors
    ///
    /// [`Error::InsufficientPoints`] for fewer than [`MIN_POWER_FIT_POINTS`] points and
    /// [`Error::SingularDesign`] if not a single candidate exponent could be fit.
    pub fn fit_with(points: &[Point], options: &PowerFitOptions) -> Result<Self> {
        if points.len() < MIN_POWER_FIT_POINTS {
            return Err(Error::InsufficientPoints {
                required: MIN_POWER_FIT_POINTS,
                found: points.len(),
            });
        }
        let partitions = options.partitions.max(1);
        let step = (options.upper_bound - options.lower_bound) / partitions as f64;
        let candidates: Vec<Candidate> = (0..=partitions)
            .map(|i| Candidate::new(points, options.lower_bound + step * i as f64))
            .collect();
        for candidate in &candidates {
            tracing::trace!(
                exponent = candidate.exponent,
                rmse = candidate.rmse(),
                "scanned power exponent"
            );
        }

        let best = candidates
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| a.rmse().total_cmp(&b.rmse()))
            .map_or(0, |(idx, _)| idx);
        if candidates[best].regression.is_none() {
            return Err(Error::SingularDesign);
        }

        let (mut low, mut high) = if best == 0 {
            (candidates[0].clone(), candidates[1].clone())
        } else if best == partitions {
            (candidates[best - 1].clone(), candidates[best].clone())
        } else if candidates[best - 1].rmse() <= candidates[best + 1].rmse() {
            (candidates[best - 1].clone(), candidates[best].clone())
        } else {
            (candidates[best].clone(), candidates[best + 1].clone())
        };

        let mut mid = Candidate::new(points, (low.exponent + high.exponent) / 2.0);
        for _ in 0..options.refinement_depth {
            if low.rmse() > high.rmse() {
                low = mid;
            } else {
                high = mid;
            }
            mid = Candidate::new(points, (low.exponent + high.exponent) / 2.0);
        }

        let regression = match mid.regression {
            Some(regression) => regression,
            // Degenerate midpoint; fall back to the better bound.
            None => [low, high]
                .into_iter()
                .filter_map(|c| c.regression)
                .min_by(|a, b| a.rmse().total_cmp(&b.rmse()))
                .ok_or(Error::SingularDesign)?,
        };
        tracing::debug!(
            exponent = regression.basis().exponent,
            rmse = regression.rmse(),
            points = points.len(),
            "fit power curve"
        );
        Ok(Self { regression })
    }

    pub fn exponent(&self) -> f64 {
        self.regression.basis().exponent
    }
    /// `A` of `A * x^P + B`.
    pub fn scale(&self) -> f64 {
        self.regression.coefficients()[0]
    }
    /// `B` of `A * x^P + B`.
    pub fn offset(&self) -> f64 {
        self.regression.coefficients()[1]
    }
    pub fn regression(&self) -> &Regression<PowerBasis> {
        &self.regression
    }
    pub fn fitted_y(&self, x: f64) -> f64 {
        self.regression.fitted_y(x)
    }
    /// `dy/dx = P * A * x^(P - 1)`.
    pub fn first_derivative(&self, x: f64) -> f64 {
        let p = self.exponent();
        p * self.scale() * x.powf(p - 1.0)
    }
    pub fn residuals(&self) -> &[f64] {
        self.regression.residuals()
    }
    pub fn rmse(&self) -> f64 {
        self.regression.rmse()
    }
    pub fn lowest_x(&self) -> f64 {
        self.regression.lowest_x()
    }
    pub fn highest_x(&self) -> f64 {
        self.regression.highest_x()
    }
    /// `count` evenly spaced samples over `[lowest_x, highest_x]`.
    ///
    /// Samples with a negative fitted value are left out; the curve can dip below zero near the
    /// origin and those values aren't counts.
    pub fn model_points(&self, count: usize) -> Vec<Point> {
        let (lo, hi) = (self.lowest_x(), self.highest_x());
        sample_xs(lo, hi, count)
            .map(|x| Point::new(x, self.fitted_y(x)))
            .filter(|p| p.y >= 0.0)
            .collect()
    }
}
impl Predictive for PowerFitModel {
    fn predict_outcome(&self, predictor: f64) -> f64 {
        self.fitted_y(predictor)
    }
}
impl FittedModel for PowerFitModel {
    fn lowest_x(&self) -> f64 {
        self.regression.lowest_x()
    }
    fn highest_x(&self) -> f64 {
        self.regression.highest_x()
    }
    fn evaluate(&mut self, points: &[Point]) {
        self.regression.evaluate(points)
    }
    fn rmse(&self) -> f64 {
        self.regression.rmse()
    }
}
impl Display for PowerFitModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.regression, f)
    }
}

/// `count` evenly spaced values from `lo` to `hi`, both included.
pub(crate) fn sample_xs(lo: f64, hi: f64, count: usize) -> impl Iterator<Item = f64> {
    let span = hi - lo;
    (0..count).map(move |i| {
        if count == 1 {
            lo
        } else {
            lo + span * i as f64 / (count - 1) as f64
        }
    })
}

#[derive(Debug, Clone)]
struct Candidate {
    exponent: f64,
    regression: Option<Regression<PowerBasis>>,
}
impl Candidate {
    fn new(points: &[Point], exponent: f64) -> Self {
        let regression = match Regression::fit(PowerBasis { exponent }, points) {
            Ok(regression) => Some(regression),
            Err(err) => {
                tracing::trace!(exponent, %err, "power candidate not fit");
                None
            }
        };
        Self {
            exponent,
            regression,
        }
    }
    /// Failed fits rank last.
    fn rmse(&self) -> f64 {
        self.regression
            .as_ref()
            .map(Regression::rmse)
            .filter(|rmse| !rmse.is_nan())
            .unwrap_or(f64::INFINITY)
    }
}
