//! Leapfrog (Störmer–Verlet) integration of Hamiltonian dynamics.

use crate::density::{evaluate, Infeasible, LogDensity};
use crate::metric::Metric;
use ndarray::Array1;

/// A point in phase space together with the cached log-density and gradient at its
/// position.
#[derive(Debug, Clone, PartialEq)]
pub struct PhasePoint {
    pub position: Array1<f64>,
    pub momentum: Array1<f64>,
    pub grad: Array1<f64>,
    pub logp: f64,
}

impl PhasePoint {
    /// Evaluates `target` at `position` and builds a point with zero momentum.
    pub fn new<T>(target: &T, position: Array1<f64>) -> Result<Self, Infeasible>
    where
        T: LogDensity + ?Sized,
    {
        let mut grad = Array1::zeros(position.len());
        let logp = evaluate(target, &position, &mut grad)?;
        let momentum = Array1::zeros(position.len());
        Ok(Self {
            position,
            momentum,
            grad,
            logp,
        })
    }

    /// Total energy `H = -log p(q) + ½ pᵀ M⁻¹ p`.
    pub fn hamiltonian(&self, metric: &Metric) -> f64 {
        -self.logp + metric.kinetic_energy(&self.momentum)
    }
}

/// Result of a leapfrog trajectory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Integration {
    /// All requested steps were taken.
    Completed { steps: usize },
    /// The trajectory entered an infeasible point after `steps` position updates.
    /// The phase point is left at the last state reached and must not be accepted.
    Halted { steps: usize, reason: Infeasible },
}

impl Integration {
    pub fn steps(&self) -> usize {
        match self {
            Integration::Completed { steps } | Integration::Halted { steps, .. } => *steps,
        }
    }

    pub fn is_halted(&self) -> bool {
        matches!(self, Integration::Halted { .. })
    }
}

/// Runs `n_steps` leapfrog steps of size `step_size` starting from `point`, in place.
///
/// Half momentum step, then alternating full position and momentum steps, closing with
/// a half momentum step. `point.grad` must hold the gradient at `point.position` on entry
/// and holds the gradient at the final position on exit.
pub fn leapfrog<T>(
    target: &T,
    point: &mut PhasePoint,
    step_size: f64,
    n_steps: usize,
    metric: &Metric,
) -> Integration
where
    T: LogDensity + ?Sized,
{
    if n_steps == 0 {
        return Integration::Completed { steps: 0 };
    }
    let half = 0.5 * step_size;
    let mut velocity = Array1::zeros(point.position.len());

    point.momentum.scaled_add(half, &point.grad);
    for step in 0..n_steps {
        metric.velocity(&point.momentum, &mut velocity);
        point.position.scaled_add(step_size, &velocity);

        match evaluate(target, &point.position, &mut point.grad) {
            Ok(logp) => point.logp = logp,
            Err(reason) => {
                point.logp = f64::NEG_INFINITY;
                return Integration::Halted {
                    steps: step + 1,
                    reason,
                };
            }
        }

        let scale = if step + 1 == n_steps { half } else { step_size };
        point.momentum.scaled_add(scale, &point.grad);
    }
    Integration::Completed { steps: n_steps }
}
