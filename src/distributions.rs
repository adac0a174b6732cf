/*!
Reference targets with closed-form moments.

These are the densities the sampler is validated against: every one implements
[`LogDensity`] with an analytic gradient, and the Gaussians also implement
[`Normalized`] so diagnostics can compare against the exact log-density.

## Examples

```rust
use extreme_hmc::density::LogDensity;
use extreme_hmc::distributions::{DiagGaussian, Normalized};
use ndarray::{arr1, Array1};

let target = DiagGaussian::new(arr1(&[0.0, 1.0]), arr1(&[1.0, 4.0])).unwrap();
let mut grad = Array1::zeros(2);
let logp = target.logp_and_grad(&arr1(&[0.5, -0.5]), &mut grad);
println!("unnormalized log-density: {logp}, gradient: {grad}");
println!("normalized log-density: {}", target.logp(&[0.5, -0.5]));
```
*/

use crate::density::LogDensity;
use crate::error::{Result, SamplerError};
use ndarray::{Array1, Zip};
use std::f64::consts::PI;

/// A distribution that can report its fully normalized log-density.
pub trait Normalized {
    fn logp(&self, position: &[f64]) -> f64;
}

/// Standard normal in `dim` dimensions, optionally scaled by a common standard deviation.
#[derive(Debug, Clone, PartialEq)]
pub struct IsotropicGaussian {
    pub dim: usize,
    pub std: f64,
}

impl IsotropicGaussian {
    pub fn new(dim: usize) -> Self {
        Self { dim, std: 1.0 }
    }

    pub fn with_std(mut self, std: f64) -> Self {
        self.std = std;
        self
    }
}

impl LogDensity for IsotropicGaussian {
    fn dim(&self) -> usize {
        self.dim
    }

    fn logp_and_grad(&self, position: &Array1<f64>, grad: &mut Array1<f64>) -> f64 {
        let inv_var = 1.0 / (self.std * self.std);
        Zip::from(grad)
            .and(position)
            .for_each(|g, x| *g = -x * inv_var);
        -0.5 * position.dot(position) * inv_var
    }
}

impl Normalized for IsotropicGaussian {
    fn logp(&self, position: &[f64]) -> f64 {
        let var = self.std * self.std;
        let sq: f64 = position.iter().map(|x| x * x).sum();
        -0.5 * (self.dim as f64) * (2.0 * PI * var).ln() - 0.5 * sq / var
    }
}

/// Gaussian with independent coordinates: `x_i ~ N(mean_i, var_i)`.
#[derive(Debug, Clone, PartialEq)]
pub struct DiagGaussian {
    pub mean: Array1<f64>,
    pub var: Array1<f64>,
}

impl DiagGaussian {
    pub fn new(mean: Array1<f64>, var: Array1<f64>) -> Result<Self> {
        if mean.len() != var.len() {
            return Err(SamplerError::Dimension {
                expected: mean.len(),
                got: var.len(),
            });
        }
        if var.iter().any(|v| !v.is_finite() || *v <= 0.0) {
            return Err(SamplerError::Model(
                "variances must be strictly positive and finite".to_string(),
            ));
        }
        Ok(Self { mean, var })
    }
}

impl LogDensity for DiagGaussian {
    fn dim(&self) -> usize {
        self.mean.len()
    }

    fn logp_and_grad(&self, position: &Array1<f64>, grad: &mut Array1<f64>) -> f64 {
        let mut quad = 0.0;
        Zip::from(grad)
            .and(position)
            .and(&self.mean)
            .and(&self.var)
            .for_each(|g, x, m, v| {
                let d = x - m;
                *g = -d / v;
                quad += d * d / v;
            });
        -0.5 * quad
    }
}

impl Normalized for DiagGaussian {
    fn logp(&self, position: &[f64]) -> f64 {
        position
            .iter()
            .zip(self.mean.iter().zip(self.var.iter()))
            .map(|(x, (m, v))| -0.5 * (2.0 * PI * v).ln() - 0.5 * (x - m).powi(2) / v)
            .sum()
    }
}

/// Restricts another target to an axis-aligned box; outside the box the log-density is `-inf`.
///
/// Useful for exercising the sampler's handling of hard support boundaries.
#[derive(Debug, Clone, PartialEq)]
pub struct Bounded<T> {
    pub inner: T,
    pub lower: Array1<f64>,
    pub upper: Array1<f64>,
}

impl<T: LogDensity> Bounded<T> {
    pub fn new(inner: T, lower: Array1<f64>, upper: Array1<f64>) -> Result<Self> {
        let dim = inner.dim();
        for bound in [&lower, &upper] {
            if bound.len() != dim {
                return Err(SamplerError::Dimension {
                    expected: dim,
                    got: bound.len(),
                });
            }
        }
        if lower.iter().zip(upper.iter()).any(|(l, u)| l >= u) {
            return Err(SamplerError::Model(
                "lower bounds must be below upper bounds".to_string(),
            ));
        }
        Ok(Self {
            inner,
            lower,
            upper,
        })
    }
}

impl<T: LogDensity> LogDensity for Bounded<T> {
    fn dim(&self) -> usize {
        self.inner.dim()
    }

    fn param_names(&self) -> Vec<String> {
        self.inner.param_names()
    }

    fn logp_and_grad(&self, position: &Array1<f64>, grad: &mut Array1<f64>) -> f64 {
        let inside = position
            .iter()
            .zip(self.lower.iter().zip(self.upper.iter()))
            .all(|(x, (l, u))| x > l && x < u);
        if !inside {
            return f64::NEG_INFINITY;
        }
        self.inner.logp_and_grad(position, grad)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::arr1;

    #[test]
    fn diag_gaussian_gradient_matches_closed_form() {
        let target = DiagGaussian::new(arr1(&[1.0, -1.0]), arr1(&[2.0, 0.5])).unwrap();
        let mut grad = Array1::zeros(2);
        let logp = target.logp_and_grad(&arr1(&[2.0, 0.0]), &mut grad);
        assert_abs_diff_eq!(logp, -0.5 * (0.5 + 2.0), epsilon = 1e-12);
        assert_abs_diff_eq!(grad, arr1(&[-0.5, -2.0]), epsilon = 1e-12);
    }

    #[test]
    fn normalized_gaussians_agree() {
        let iso = IsotropicGaussian::new(3).with_std(2.0);
        let diag = DiagGaussian::new(Array1::zeros(3), Array1::from_elem(3, 4.0)).unwrap();
        let x = [0.3, -1.2, 2.0];
        assert_abs_diff_eq!(iso.logp(&x), diag.logp(&x), epsilon = 1e-12);
    }

    #[test]
    fn bounded_rejects_outside_box() {
        let target = Bounded::new(
            IsotropicGaussian::new(2),
            arr1(&[-1.0, 0.0]),
            arr1(&[1.0, 10.0]),
        )
        .unwrap();
        let mut grad = Array1::zeros(2);
        assert!(target.logp_and_grad(&arr1(&[0.0, 5.0]), &mut grad).is_finite());
        assert_eq!(
            target.logp_and_grad(&arr1(&[0.0, 10.5]), &mut grad),
            f64::NEG_INFINITY
        );
        assert!(!target.is_in_domain(&arr1(&[-2.0, 1.0])));
    }

    #[test]
    fn invalid_construction() {
        assert!(DiagGaussian::new(arr1(&[0.0]), arr1(&[1.0, 1.0])).is_err());
        assert!(DiagGaussian::new(arr1(&[0.0]), arr1(&[-1.0])).is_err());
        assert!(Bounded::new(IsotropicGaussian::new(1), arr1(&[1.0]), arr1(&[0.0])).is_err());
    }
}
