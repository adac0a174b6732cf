//! The log-density interface consumed by the sampler.
//!
//! A target writes its gradient into a caller-owned buffer so the integrator can run
//! without allocating per leapfrog step. Points outside the support are signalled by
//! returning `f64::NEG_INFINITY`; the sampler turns that into a rejected (divergent)
//! transition instead of an error.

use ndarray::Array1;
use std::fmt;

/// An unnormalized log-posterior with an analytic gradient.
pub trait LogDensity {
    /// Dimension of the parameter vector.
    fn dim(&self) -> usize;

    /// Human readable parameter names, in position order.
    fn param_names(&self) -> Vec<String> {
        (0..self.dim()).map(|i| format!("theta[{i}]")).collect()
    }

    /// Returns the log-density at `position` and writes the gradient into `grad`.
    ///
    /// Must return `f64::NEG_INFINITY` (gradient contents unspecified) when `position`
    /// violates a domain constraint.
    fn logp_and_grad(&self, position: &Array1<f64>, grad: &mut Array1<f64>) -> f64;

    /// Whether `position` lies inside the support of the target.
    fn is_in_domain(&self, position: &Array1<f64>) -> bool {
        let mut grad = Array1::zeros(position.len());
        self.logp_and_grad(position, &mut grad).is_finite()
    }
}

impl<T: LogDensity + ?Sized> LogDensity for &T {
    fn dim(&self) -> usize {
        (**self).dim()
    }

    fn param_names(&self) -> Vec<String> {
        (**self).param_names()
    }

    fn logp_and_grad(&self, position: &Array1<f64>, grad: &mut Array1<f64>) -> f64 {
        (**self).logp_and_grad(position, grad)
    }

    fn is_in_domain(&self, position: &Array1<f64>) -> bool {
        (**self).is_in_domain(position)
    }
}

impl<T: LogDensity + ?Sized> LogDensity for std::sync::Arc<T> {
    fn dim(&self) -> usize {
        (**self).dim()
    }

    fn param_names(&self) -> Vec<String> {
        (**self).param_names()
    }

    fn logp_and_grad(&self, position: &Array1<f64>, grad: &mut Array1<f64>) -> f64 {
        (**self).logp_and_grad(position, grad)
    }

    fn is_in_domain(&self, position: &Array1<f64>) -> bool {
        (**self).is_in_domain(position)
    }
}

/// Why a point could not be used by the integrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Infeasible {
    /// The log-density is `-inf` or NaN: the point is outside the support.
    OutOfDomain,
    /// The log-density is finite but the gradient contains NaN or infinity.
    NonFiniteGradient,
}

impl fmt::Display for Infeasible {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Infeasible::OutOfDomain => write!(f, "point outside the support"),
            Infeasible::NonFiniteGradient => write!(f, "non-finite gradient"),
        }
    }
}

/// Evaluates `target` at `position` and classifies the result.
///
/// On success the gradient is left in `grad` and the finite log-density is returned.
pub fn evaluate<T>(
    target: &T,
    position: &Array1<f64>,
    grad: &mut Array1<f64>,
) -> Result<f64, Infeasible>
where
    T: LogDensity + ?Sized,
{
    let logp = target.logp_and_grad(position, grad);
    if !logp.is_finite() {
        return Err(Infeasible::OutOfDomain);
    }
    if grad.iter().any(|g| !g.is_finite()) {
        return Err(Infeasible::NonFiniteGradient);
    }
    Ok(logp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr1;

    struct HalfLine;

    impl LogDensity for HalfLine {
        fn dim(&self) -> usize {
            1
        }

        fn logp_and_grad(&self, position: &Array1<f64>, grad: &mut Array1<f64>) -> f64 {
            let x = position[0];
            if x <= 0.0 {
                return f64::NEG_INFINITY;
            }
            grad[0] = 1.0 / x - 1.0;
            x.ln() - x
        }
    }

    struct NanGradient;

    impl LogDensity for NanGradient {
        fn dim(&self) -> usize {
            1
        }

        fn logp_and_grad(&self, _position: &Array1<f64>, grad: &mut Array1<f64>) -> f64 {
            grad[0] = f64::NAN;
            0.0
        }
    }

    #[test]
    fn evaluate_classifies_points() {
        let mut grad = Array1::zeros(1);
        let logp = evaluate(&HalfLine, &arr1(&[1.0]), &mut grad).unwrap();
        assert_eq!(logp, -1.0);
        assert_eq!(grad[0], 0.0);

        assert_eq!(
            evaluate(&HalfLine, &arr1(&[-1.0]), &mut grad),
            Err(Infeasible::OutOfDomain)
        );
        assert_eq!(
            evaluate(&NanGradient, &arr1(&[0.0]), &mut grad),
            Err(Infeasible::NonFiniteGradient)
        );
    }

    #[test]
    fn default_names_and_domain() {
        assert_eq!(HalfLine.param_names(), vec!["theta[0]".to_string()]);
        assert!(HalfLine.is_in_domain(&arr1(&[0.5])));
        assert!(!HalfLine.is_in_domain(&arr1(&[0.0])));
        let by_ref = &HalfLine;
        assert_eq!(by_ref.dim(), 1);
    }
}
