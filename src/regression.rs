//! Ordinary least squares over a caller-chosen feature expansion.
//!
//! A [`Basis`] maps every predictor `x` to a row of features. [`Regression::fit`] solves the
//! normal equations for the coefficients of that row, and the basis turns the coefficients back
//! into a fitted value.
//!
//! # Info on implementation
//!
//! [Linear regression](https://towardsdatascience.com/implementing-linear-and-polynomial-regression-from-scratch-f1e3d422e6b4)
//! [How the linear algebra works](https://medium.com/@andrew.chamberlain/the-linear-algebra-view-of-least-squares-regression-f67044b7f39b)
//!
//! ## Power with offset
//!
//! y = A * x^P + B
//!
//! For a fixed P this is linear in A and B with the features `[x^P, 1]`, so it's solved exactly
//! like a line. Finding P is left to [`crate::power`], which searches over it.

use std::fmt::{self, Display};

use crate::error::{Error, Result};
use crate::series::Point;

pub trait Predictive {
    /// Calculates the predicted outcome of `predictor`.
    fn predict_outcome(&self, predictor: f64) -> f64;

    /// Calculates the R² (coefficient of determination), the proportion of variation in predicted
    /// model.
    ///
    /// `predictors` are the x values (input to the function).
    /// `outcomes` are the observed dependant variable.
    /// `len` is the count of data points.
    ///
    /// If `predictors` and `outcomes` have different lengths, the result might be unexpected.
    ///
    /// O(n)
    // For implementation, see https://en.wikipedia.org/wiki/Coefficient_of_determination#Definitions
    fn determination(
        &self,
        predictors: impl Iterator<Item = f64>,
        outcomes: impl Iterator<Item = f64> + Clone,
        len: usize,
    ) -> f64 {
        let outcomes_mean = outcomes.clone().sum::<f64>() / len as f64;
        let residuals = predictors
            .zip(outcomes.clone())
            .map(|(pred, out)| out - self.predict_outcome(pred));
        // Sum of the square of the residuals
        let res: f64 = residuals.map(|residual| residual * residual).sum();
        let tot: f64 = outcomes
            .map(|out| {
                let diff = out - outcomes_mean;
                diff * diff
            })
            .sum();

        1.0 - (res / tot)
    }
}

/// A model that has been fit to (or constructed for) a range of predictors and can be rescored
/// against any point set.
pub trait FittedModel: Predictive {
    fn lowest_x(&self) -> f64;
    fn highest_x(&self) -> f64;
    /// Recomputes residuals and RMSE against `points`, keeping the coefficients.
    fn evaluate(&mut self, points: &[Point]);
    fn rmse(&self) -> f64;
}

/// Feature expansion used by [`Regression`].
pub trait Basis {
    /// Count of features, and therefore of coefficients.
    fn dimension(&self) -> usize;
    /// Writes the features of `x` to `out`, which has the length [`Self::dimension`].
    fn expand(&self, x: f64, out: &mut [f64]);
    /// Reconstructs the fitted value of `x` from `coefficients`.
    ///
    /// The default is the dot product of the coefficients and the features.
    fn reconstruct(&self, coefficients: &[f64], x: f64) -> f64 {
        let mut features = vec![0.0; self.dimension()];
        self.expand(x, &mut features);
        features
            .iter()
            .zip(coefficients)
            .map(|(feature, coefficient)| feature * coefficient)
            .sum()
    }
    fn fmt_equation(&self, coefficients: &[f64], f: &mut fmt::Formatter<'_>) -> fmt::Result;
}

/// `[1, x, x², ...]`. The coefficients are in order of smallest exponent to largest:
/// `[0, 2, 1]` means `y = 1x² + 2x + 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolynomialBasis {
    pub degree: usize,
}
impl PolynomialBasis {
    pub const LINEAR: Self = Self { degree: 1 };
}
impl Basis for PolynomialBasis {
    fn dimension(&self) -> usize {
        self.degree + 1
    }
    fn expand(&self, x: f64, out: &mut [f64]) {
        for (order, feature) in out.iter_mut().enumerate() {
            *feature = match order {
                0 => 1.0,
                1 => x,
                _ => x.powi(order as i32),
            };
        }
    }
    fn fmt_equation(&self, coefficients: &[f64], f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (order, mut coefficient) in coefficients.iter().copied().enumerate().rev() {
            if !first {
                if coefficient.is_sign_positive() {
                    write!(f, " + ")?;
                } else {
                    write!(f, " - ")?;
                    coefficient = -coefficient;
                }
            }

            match (order, f.precision()) {
                (0, Some(p)) => write!(f, "{coefficient:.p$}")?,
                (0, None) => write!(f, "{coefficient}")?,
                (1, Some(p)) => write!(f, "{coefficient:.p$}x")?,
                (1, None) => write!(f, "{coefficient}x")?,
                (_, Some(p)) => write!(f, "{coefficient:.p$}x^({order})")?,
                (_, None) => write!(f, "{coefficient}x^({order})")?,
            }

            first = false;
        }
        Ok(())
    }
}

/// `[x^P, 1]` for a fixed exponent `P`. Coefficients are `[A, B]` of `y = A * x^P + B`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PowerBasis {
    pub exponent: f64,
}
impl Basis for PowerBasis {
    fn dimension(&self) -> usize {
        2
    }
    fn expand(&self, x: f64, out: &mut [f64]) {
        out[0] = x.powf(self.exponent);
        out[1] = 1.0;
    }
    fn reconstruct(&self, coefficients: &[f64], x: f64) -> f64 {
        coefficients[0] * x.powf(self.exponent) + coefficients[1]
    }
    fn fmt_equation(&self, coefficients: &[f64], f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (k, mut b) = (coefficients[0], coefficients[1]);
        let sign = if b.is_sign_negative() {
            b = -b;
            '-'
        } else {
            '+'
        };
        if let Some(p) = f.precision() {
            write!(f, "{k:.p$} * x^{:.p$} {sign} {b:.p$}", self.exponent)
        } else {
            write!(f, "{k} * x^{} {sign} {b}", self.exponent)
        }
    }
}

/// A least squares fit. The coefficients never change after construction; residuals and RMSE
/// are replaced by [`Self::evaluate`].
#[derive(Debug, Clone)]
pub struct Regression<B> {
    basis: B,
    coefficients: Vec<f64>,
    residuals: Vec<f64>,
    rmse: f64,
    lowest_x: f64,
    highest_x: f64,
}
impl<B: Basis> Regression<B> {
    /// Fits `basis` to `points` and scores the fit against the same points.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InsufficientPoints`] if there are fewer points than features and
    /// [`Error::SingularDesign`] if the normal matrix can't be inverted.
    pub fn fit(basis: B, points: &[Point]) -> Result<Self> {
        let coefficients = ordinary_least_squares(&basis, points)?;
        let (lowest_x, highest_x) = x_range(points);
        let mut me = Self {
            basis,
            coefficients,
            residuals: Vec::new(),
            rmse: f64::NAN,
            lowest_x,
            highest_x,
        };
        me.evaluate(points);
        Ok(me)
    }
    /// Builds a regression from known coefficients, for example averaged ones.
    ///
    /// The residuals are empty and the RMSE is NaN until [`Self::evaluate`] is called.
    pub fn from_coefficients(
        basis: B,
        coefficients: Vec<f64>,
        lowest_x: f64,
        highest_x: f64,
    ) -> Self {
        debug_assert_eq!(coefficients.len(), basis.dimension());
        Self {
            basis,
            coefficients,
            residuals: Vec::new(),
            rmse: f64::NAN,
            lowest_x,
            highest_x,
        }
    }

    pub fn fitted_y(&self, x: f64) -> f64 {
        self.basis.reconstruct(&self.coefficients, x)
    }
    /// Recomputes residuals `y - fitted_y(x)` and their RMSE against `points`.
    ///
    /// An empty point set leaves no residuals and a NaN RMSE.
    pub fn evaluate(&mut self, points: &[Point]) {
        self.residuals = points.iter().map(|p| p.y - self.fitted_y(p.x)).collect();
        self.rmse = root_mean_square(&self.residuals);
    }

    pub fn basis(&self) -> &B {
        &self.basis
    }
    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }
    pub fn residuals(&self) -> &[f64] {
        &self.residuals
    }
    pub fn rmse(&self) -> f64 {
        self.rmse
    }
    pub fn lowest_x(&self) -> f64 {
        self.lowest_x
    }
    pub fn highest_x(&self) -> f64 {
        self.highest_x
    }
    /// Replaces the predictor range the model claims to cover.
    #[must_use]
    pub fn with_x_range(mut self, lowest_x: f64, highest_x: f64) -> Self {
        self.lowest_x = lowest_x;
        self.highest_x = highest_x;
        self
    }
}
impl<B: Basis> Predictive for Regression<B> {
    fn predict_outcome(&self, predictor: f64) -> f64 {
        self.fitted_y(predictor)
    }
}
impl<B: Basis> FittedModel for Regression<B> {
    fn lowest_x(&self) -> f64 {
        self.lowest_x
    }
    fn highest_x(&self) -> f64 {
        self.highest_x
    }
    fn evaluate(&mut self, points: &[Point]) {
        Regression::evaluate(self, points)
    }
    fn rmse(&self) -> f64 {
        self.rmse
    }
}
impl<B: Basis> Display for Regression<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.basis.fmt_equation(&self.coefficients, f)
    }
}

/// Solves `(XᵀX)β = Xᵀy` where the rows of `X` are the features of each point.
fn ordinary_least_squares(basis: &impl Basis, points: &[Point]) -> Result<Vec<f64>> {
    let dimension = basis.dimension();
    let len = points.len();
    if dimension == 0 || len < dimension {
        return Err(Error::InsufficientPoints {
            required: dimension.max(1),
            found: len,
        });
    }
    let mut features = vec![0.0; len * dimension];
    for (row, point) in features.chunks_exact_mut(dimension).zip(points) {
        basis.expand(point.x, row);
    }
    let design = nalgebra::DMatrix::from_row_slice(len, dimension, &features);

    let t = design.transpose();
    let y = nalgebra::DMatrix::from_iterator(len, 1, points.iter().map(|p| p.y));
    let inverse = (&t * &design)
        .try_inverse()
        .ok_or(Error::SingularDesign)?;
    let result = (inverse * &t) * y;

    let coefficients: Vec<f64> = result.iter().copied().collect();
    if coefficients.iter().any(|c| !c.is_finite()) {
        return Err(Error::SingularDesign);
    }
    Ok(coefficients)
}

pub(crate) fn root_mean_square(values: &[f64]) -> f64 {
    (values.iter().map(|v| v * v).sum::<f64>() / values.len() as f64).sqrt()
}

pub(crate) fn x_range(points: &[Point]) -> (f64, f64) {
    points.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), p| {
        (lo.min(p.x), hi.max(p.x))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn points(pairs: &[(f64, f64)]) -> Vec<Point> {
        pairs.iter().map(|&(x, y)| Point::new(x, y)).collect()
    }

    #[test]
    fn polynomial_features_are_ascending() {
        let mut out = [0.0; 4];
        PolynomialBasis { degree: 3 }.expand(2.0, &mut out);
        assert_eq!(out, [1.0, 2.0, 4.0, 8.0]);
    }

    #[test]
    fn too_few_points_is_an_error() {
        let err = Regression::fit(PolynomialBasis { degree: 2 }, &points(&[(1.0, 1.0), (2.0, 3.0)]))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::InsufficientPoints {
                required: 3,
                found: 2
            }
        ));
    }

    #[test]
    fn repeated_x_is_singular() {
        let err = Regression::fit(
            PolynomialBasis::LINEAR,
            &points(&[(1.0, 1.0), (1.0, 2.0), (1.0, 3.0)]),
        )
        .unwrap_err();
        assert!(matches!(err, Error::SingularDesign));
    }

    #[test]
    fn rms_of_empty_is_nan() {
        assert!(root_mean_square(&[]).is_nan());
    }

    #[test]
    fn power_equation_display() {
        let r = Regression::from_coefficients(PowerBasis { exponent: 0.5 }, vec![2.0, -1.0], 1.0, 4.0);
        assert_eq!(format!("{r:.1}"), "2.0 * x^0.5 - 1.0");
    }
}
