//! Euclidean metrics (inverse mass matrices) for the kinetic energy.
//!
//! The sampler stores the *inverse* mass matrix `M⁻¹` because that is what the
//! position update and the kinetic energy consume. For momentum draws `p ~ N(0, M)`
//! we keep a square root of `M` next to it.

use crate::error::{Result, SamplerError};
use nalgebra::DMatrix;
use ndarray::{Array1, Array2, Zip};
use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

/// Shape of the mass matrix estimated during warm-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MetricKind {
    /// One variance per parameter.
    #[default]
    Diagonal,
    /// Full covariance (with Cholesky factor for momentum draws).
    Dense,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Metric {
    Diagonal {
        inv_mass: Array1<f64>,
        /// `sqrt(1 / inv_mass)`, the per-coordinate momentum scale.
        mass_sqrt: Array1<f64>,
    },
    Dense {
        inv_mass: Array2<f64>,
        /// Lower Cholesky factor `L` of the mass matrix, `M = L Lᵀ`.
        mass_chol: Array2<f64>,
    },
}

impl Metric {
    /// Unit metric of dimension `dim`.
    pub fn identity(dim: usize) -> Self {
        Metric::Diagonal {
            inv_mass: Array1::ones(dim),
            mass_sqrt: Array1::ones(dim),
        }
    }

    /// Unit metric of the given shape.
    pub fn unit(kind: MetricKind, dim: usize) -> Self {
        match kind {
            MetricKind::Diagonal => Self::identity(dim),
            MetricKind::Dense => Metric::Dense {
                inv_mass: Array2::eye(dim),
                mass_chol: Array2::eye(dim),
            },
        }
    }

    /// Diagonal metric from the inverse mass (parameter variances).
    pub fn diagonal(inv_mass: Array1<f64>) -> Result<Self> {
        if inv_mass.iter().any(|v| !v.is_finite() || *v <= 0.0) {
            return Err(SamplerError::Config(
                "inverse mass must be strictly positive and finite".to_string(),
            ));
        }
        let mass_sqrt = inv_mass.mapv(|v| (1.0 / v).sqrt());
        Ok(Metric::Diagonal {
            inv_mass,
            mass_sqrt,
        })
    }

    /// Dense metric from a symmetric positive definite inverse mass (parameter covariance).
    pub fn dense(inv_mass: Array2<f64>) -> Result<Self> {
        let (n, m) = inv_mass.dim();
        if n != m {
            return Err(SamplerError::Dimension {
                expected: n,
                got: m,
            });
        }
        let scale = inv_mass.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));
        for i in 0..n {
            for j in 0..i {
                if (inv_mass[(i, j)] - inv_mass[(j, i)]).abs() > 1e-10 * scale.max(1.0) {
                    return Err(SamplerError::Config(
                        "dense inverse mass must be symmetric".to_string(),
                    ));
                }
            }
        }

        let cov = DMatrix::from_row_iterator(n, n, inv_mass.iter().copied());
        let mass = cov
            .cholesky()
            .ok_or_else(|| {
                SamplerError::Config("dense inverse mass is not positive definite".to_string())
            })?
            .inverse();
        let l = mass
            .cholesky()
            .ok_or_else(|| SamplerError::Config("mass matrix is not positive definite".to_string()))?
            .l();
        let mass_chol = Array2::from_shape_fn((n, n), |(i, j)| l[(i, j)]);

        Ok(Metric::Dense {
            inv_mass,
            mass_chol,
        })
    }

    pub fn dim(&self) -> usize {
        match self {
            Metric::Diagonal { inv_mass, .. } => inv_mass.len(),
            Metric::Dense { inv_mass, .. } => inv_mass.nrows(),
        }
    }

    pub fn kind(&self) -> MetricKind {
        match self {
            Metric::Diagonal { .. } => MetricKind::Diagonal,
            Metric::Dense { .. } => MetricKind::Dense,
        }
    }

    /// Diagonal of the inverse mass matrix.
    pub fn inv_mass_diagonal(&self) -> Array1<f64> {
        match self {
            Metric::Diagonal { inv_mass, .. } => inv_mass.clone(),
            Metric::Dense { inv_mass, .. } => inv_mass.diag().to_owned(),
        }
    }

    /// Overwrites `momentum` with a draw from `N(0, M)`.
    pub fn sample_momentum<R: Rng>(&self, momentum: &mut Array1<f64>, rng: &mut R) {
        match self {
            Metric::Diagonal { mass_sqrt, .. } => {
                Zip::from(momentum).and(mass_sqrt).for_each(|p, s| {
                    let z: f64 = rng.sample(StandardNormal);
                    *p = z * s;
                });
            }
            Metric::Dense { mass_chol, .. } => {
                let z: Array1<f64> = (0..mass_chol.nrows())
                    .map(|_| rng.sample::<f64, _>(StandardNormal))
                    .collect();
                momentum.assign(&mass_chol.dot(&z));
            }
        }
    }

    /// Writes `M⁻¹ p` into `out`.
    pub fn velocity(&self, momentum: &Array1<f64>, out: &mut Array1<f64>) {
        match self {
            Metric::Diagonal { inv_mass, .. } => {
                Zip::from(out)
                    .and(momentum)
                    .and(inv_mass)
                    .for_each(|v, p, m| *v = p * m);
            }
            Metric::Dense { inv_mass, .. } => out.assign(&inv_mass.dot(momentum)),
        }
    }

    /// Kinetic energy `½ pᵀ M⁻¹ p`.
    pub fn kinetic_energy(&self, momentum: &Array1<f64>) -> f64 {
        match self {
            Metric::Diagonal { inv_mass, .. } => {
                0.5 * Zip::from(momentum)
                    .and(inv_mass)
                    .fold(0.0, |acc, p, m| acc + p * p * m)
            }
            Metric::Dense { inv_mass, .. } => 0.5 * momentum.dot(&inv_mass.dot(momentum)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{arr1, arr2};
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    #[test]
    fn diagonal_kinetic_energy() {
        let metric = Metric::diagonal(arr1(&[1.0, 4.0])).unwrap();
        let p = arr1(&[2.0, 1.0]);
        // 0.5 * (4 * 1 + 1 * 4)
        assert_abs_diff_eq!(metric.kinetic_energy(&p), 4.0, epsilon = 1e-12);

        let mut v = Array1::zeros(2);
        metric.velocity(&p, &mut v);
        assert_abs_diff_eq!(v, arr1(&[2.0, 4.0]), epsilon = 1e-12);
    }

    #[test]
    fn rejects_invalid_inverse_mass() {
        assert!(Metric::diagonal(arr1(&[1.0, 0.0])).is_err());
        assert!(Metric::diagonal(arr1(&[1.0, f64::NAN])).is_err());
        assert!(Metric::dense(arr2(&[[1.0, 0.5], [0.0, 1.0]])).is_err());
        assert!(Metric::dense(arr2(&[[1.0, 2.0], [2.0, 1.0]])).is_err());
    }

    #[test]
    fn dense_factor_reproduces_mass() {
        let cov = arr2(&[[2.0, 0.6], [0.6, 1.0]]);
        let metric = Metric::dense(cov.clone()).unwrap();
        let Metric::Dense { mass_chol, .. } = &metric else {
            panic!("expected dense metric");
        };
        // L Lᵀ · Σ = I
        let product = mass_chol.dot(&mass_chol.t()).dot(&cov);
        assert_abs_diff_eq!(product, Array2::eye(2), epsilon = 1e-10);
        assert_eq!(metric.kind(), MetricKind::Dense);
        assert_abs_diff_eq!(metric.inv_mass_diagonal(), arr1(&[2.0, 1.0]), epsilon = 1e-12);
    }

    #[test]
    fn diagonal_momentum_has_mass_variance() {
        let metric = Metric::diagonal(arr1(&[0.25, 4.0])).unwrap();
        let mut rng = SmallRng::seed_from_u64(7);
        let mut p = Array1::zeros(2);
        let n = 20_000;
        let mut sum_sq = Array1::<f64>::zeros(2);
        for _ in 0..n {
            metric.sample_momentum(&mut p, &mut rng);
            sum_sq = sum_sq + p.mapv(|x| x * x);
        }
        let var = sum_sq / n as f64;
        // M = diag(4, 0.25)
        assert!((var[0] - 4.0).abs() < 0.2, "var[0] = {}", var[0]);
        assert!((var[1] - 0.25).abs() < 0.0125, "var[1] = {}", var[1]);
    }
}
