//! Combining per-item fits into one representative model.
//!
//! Every model is weighted by `last_x^weight_power`, where `last_x` is the highest predictor it
//! was fit to. A positive power favours items with longer observed histories; `0.0` weights all
//! models equally.
//!
//! Two strategies exist:
//!
//! - [`ModelAverager::average_coefficients`] takes the weighted mean of each coefficient. This is
//!   only meaningful when all models share one fixed basis, e.g. straight lines.
//! - [`ModelAverager::average_by_sampling`] samples every model over a common range, averages the
//!   sampled values and fits a new model to them. Power fits need this, as their exponents differ
//!   and their coefficients can't be compared.

use crate::error::{Error, Result};
use crate::power::{sample_xs, PowerFitModel, PowerFitOptions};
use crate::regression::{Basis, FittedModel, Regression};
use crate::series::Point;

pub const DEFAULT_SAMPLES: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelAverager {
    pub weight_power: f64,
    /// Count of x samples used by [`Self::average_by_sampling`].
    pub samples: usize,
}
impl ModelAverager {
    pub fn new(weight_power: f64) -> Self {
        Self {
            weight_power,
            samples: DEFAULT_SAMPLES,
        }
    }

    /// Normalised weights of `models`, in order.
    ///
    /// # Errors
    ///
    /// [`Error::EmptyModelSet`] if `models` is empty and [`Error::ZeroTotalWeight`] if the raw
    /// weights don't sum to a positive, finite value.
    pub fn weights<M: FittedModel>(&self, models: &[M]) -> Result<Vec<f64>> {
        if models.is_empty() {
            return Err(Error::EmptyModelSet);
        }
        let raw: Vec<f64> = models
            .iter()
            .map(|m| m.highest_x().powf(self.weight_power))
            .collect();
        let total: f64 = raw.iter().sum();
        if !(total.is_finite() && total > 0.0) {
            return Err(Error::ZeroTotalWeight);
        }
        Ok(raw.into_iter().map(|w| w / total).collect())
    }

    /// Weighted mean of each coefficient, placed in a copy of the first model whose range is
    /// replaced by `[lowest_x, highest_x]`.
    ///
    /// The returned model has no residuals; call [`Regression::evaluate`] on it.
    ///
    /// # Errors
    ///
    /// See [`Self::weights`].
    pub fn average_coefficients<B: Basis + Clone>(
        &self,
        models: &[Regression<B>],
        lowest_x: f64,
        highest_x: f64,
    ) -> Result<Regression<B>> {
        let weights = self.weights(models)?;
        let base = &models[0];
        let mut coefficients = vec![0.0; base.coefficients().len()];
        for (model, weight) in models.iter().zip(&weights) {
            debug_assert_eq!(
                model.coefficients().len(),
                coefficients.len(),
                "coefficient averaging needs a shared basis"
            );
            for (sum, coefficient) in coefficients.iter_mut().zip(model.coefficients()) {
                *sum += coefficient * weight;
            }
        }
        Ok(Regression::from_coefficients(
            base.basis().clone(),
            coefficients,
            lowest_x,
            highest_x,
        ))
    }

    /// Samples every model at [`Self::samples`] evenly spaced points in
    /// `[lowest_x, highest_x]`, takes the weighted mean at each, and passes the averaged points
    /// to `factory` to fit the representative model.
    ///
    /// The residuals of the returned model describe the averaged cloud, not the raw data; call
    /// [`FittedModel::evaluate`] with the pooled raw points afterwards.
    ///
    /// # Errors
    ///
    /// See [`Self::weights`]. Errors from `factory` are passed through.
    pub fn average_by_sampling<M, F>(
        &self,
        models: &[M],
        lowest_x: f64,
        highest_x: f64,
        factory: F,
    ) -> Result<M>
    where
        M: FittedModel,
        F: FnOnce(&[Point]) -> Result<M>,
    {
        let weights = self.weights(models)?;
        let averaged: Vec<Point> = sample_xs(lowest_x, highest_x, self.samples)
            .map(|x| {
                let y = models
                    .iter()
                    .zip(&weights)
                    .map(|(model, weight)| model.predict_outcome(x) * weight)
                    .sum();
                Point::new(x, y)
            })
            .collect();
        factory(&averaged)
    }
}
impl Default for ModelAverager {
    fn default() -> Self {
        Self::new(1.0)
    }
}

/// Averages power fits over the union of their ranges and scores the result against `pooled`,
/// the raw points of every contributing item.
///
/// # Errors
///
/// See [`ModelAverager::average_by_sampling`].
pub fn average_power_models(
    averager: &ModelAverager,
    models: &[PowerFitModel],
    pooled: &[Point],
    options: &PowerFitOptions,
) -> Result<PowerFitModel> {
    let (lowest_x, highest_x) = models.iter().fold(
        (f64::INFINITY, f64::NEG_INFINITY),
        |(lo, hi), m| (lo.min(m.lowest_x()), hi.max(m.highest_x())),
    );
    let mut model = averager.average_by_sampling(models, lowest_x, highest_x, |points| {
        PowerFitModel::fit_with(points, options)
    })?;
    FittedModel::evaluate(&mut model, pooled);
    Ok(model)
}
