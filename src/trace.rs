//! Recorded draws and per-iteration diagnostics of one chain.

use crate::density::Infeasible;
use crate::error::{Result, SamplerError};
use crate::metric::Metric;
use crate::stats::ess_single_chain;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use std::fmt;

/// Why a transition was classified as divergent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Divergence {
    /// `|H₁ - H₀|` exceeded the configured divergence threshold.
    EnergyError,
    /// The final Hamiltonian was NaN or infinite.
    NonFiniteEnergy,
    /// The trajectory reached an infeasible point and was halted.
    Infeasible(Infeasible),
}

impl fmt::Display for Divergence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Divergence::EnergyError => write!(f, "energy error above threshold"),
            Divergence::NonFiniteEnergy => write!(f, "non-finite energy"),
            Divergence::Infeasible(reason) => write!(f, "trajectory halted: {reason}"),
        }
    }
}

/// Diagnostics of a single transition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransitionStats {
    /// Metropolis acceptance probability `min(1, exp(H₀ - H₁))`; 0 for halted trajectories.
    pub accept_prob: f64,
    pub accepted: bool,
    pub divergence: Option<Divergence>,
    /// Leapfrog steps actually taken.
    pub n_leapfrog: usize,
    /// Hamiltonian of the state the chain ends the transition in.
    pub energy: f64,
    /// `H₁ - H₀`; infinite for halted trajectories.
    pub energy_error: f64,
    /// Step size used, after jitter.
    pub step_size: f64,
}

impl TransitionStats {
    pub fn is_divergent(&self) -> bool {
        self.divergence.is_some()
    }
}

/// What happened during warm-up.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WarmupStats {
    pub iterations: usize,
    /// Acceptance probability of every warm-up transition, in order.
    pub accept_probs: Vec<f64>,
    pub divergences: usize,
    /// Mass matrix windows that produced a new metric.
    pub metric_updates: usize,
    /// Mass matrix windows that were too short and kept the previous metric.
    pub skipped_windows: usize,
}

impl WarmupStats {
    /// Mean acceptance probability over the last `n` warm-up transitions.
    pub fn mean_accept_prob_last(&self, n: usize) -> f64 {
        let tail = &self.accept_probs[self.accept_probs.len().saturating_sub(n)..];
        if tail.is_empty() {
            return f64::NAN;
        }
        tail.iter().sum::<f64>() / tail.len() as f64
    }
}

/// Append-only record of a chain's sampling phase.
#[derive(Debug, Clone, PartialEq)]
pub struct Trace {
    param_names: Vec<String>,
    draws: Array2<f64>,
    transitions: Vec<TransitionStats>,
    step_size: f64,
    metric: Metric,
    warmup: WarmupStats,
    max_divergence_fraction: f64,
    pub(crate) stopped_early: bool,
}

impl Trace {
    pub(crate) fn new(
        param_names: Vec<String>,
        metric: Metric,
        max_divergence_fraction: f64,
    ) -> Self {
        let dim = param_names.len();
        Self {
            param_names,
            draws: Array2::zeros((0, dim)),
            transitions: Vec::new(),
            step_size: f64::NAN,
            metric,
            warmup: WarmupStats::default(),
            max_divergence_fraction,
            stopped_early: false,
        }
    }

    pub(crate) fn push(&mut self, position: &Array1<f64>, stats: TransitionStats) -> Result<()> {
        self.draws
            .push_row(position.view())
            .map_err(|_| SamplerError::Dimension {
                expected: self.draws.ncols(),
                got: position.len(),
            })?;
        self.transitions.push(stats);
        Ok(())
    }

    pub(crate) fn set_adaptation(&mut self, step_size: f64, metric: Metric) {
        self.step_size = step_size;
        self.metric = metric;
    }

    pub(crate) fn warmup_mut(&mut self) -> &mut WarmupStats {
        &mut self.warmup
    }

    pub fn len(&self) -> usize {
        self.transitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }

    pub fn dim(&self) -> usize {
        self.draws.ncols()
    }

    pub fn param_names(&self) -> &[String] {
        &self.param_names
    }

    /// Draws as an (iterations × parameters) view.
    pub fn draws(&self) -> ArrayView2<'_, f64> {
        self.draws.view()
    }

    pub fn column(&self, param: usize) -> ArrayView1<'_, f64> {
        self.draws.column(param)
    }

    pub fn transitions(&self) -> &[TransitionStats] {
        &self.transitions
    }

    /// Step size frozen at the end of warm-up (before per-transition jitter).
    pub fn step_size(&self) -> f64 {
        self.step_size
    }

    /// Metric frozen at the end of warm-up.
    pub fn metric(&self) -> &Metric {
        &self.metric
    }

    pub fn warmup(&self) -> &WarmupStats {
        &self.warmup
    }

    /// Whether the run was cancelled or ran out of time before completing.
    pub fn stopped_early(&self) -> bool {
        self.stopped_early
    }

    pub fn last_position(&self) -> Option<ArrayView1<'_, f64>> {
        self.len().checked_sub(1).map(|i| self.draws.row(i))
    }

    pub fn mean(&self) -> Array1<f64> {
        self.draws
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::from_elem(self.dim(), f64::NAN))
    }

    /// Unbiased per-parameter variance; NaN with fewer than two draws.
    pub fn variance(&self) -> Array1<f64> {
        if self.len() < 2 {
            return Array1::from_elem(self.dim(), f64::NAN);
        }
        self.draws.var_axis(Axis(0), 1.0)
    }

    pub fn std_dev(&self) -> Array1<f64> {
        self.variance().mapv(f64::sqrt)
    }

    /// Linearly interpolated `q`-quantile of one parameter.
    ///
    /// `None` for an empty trace, an unknown parameter or `q` outside `[0, 1]`.
    pub fn quantile(&self, param: usize, q: f64) -> Option<f64> {
        if self.is_empty() || param >= self.dim() || !(0.0..=1.0).contains(&q) {
            return None;
        }
        let mut sorted = self.column(param).to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let h = (sorted.len() - 1) as f64 * q;
        let lo = h.floor() as usize;
        let hi = h.ceil() as usize;
        Some(sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo]))
    }

    /// Per-parameter effective sample size.
    pub fn ess(&self) -> Array1<f64> {
        ess_single_chain(self.draws.view())
    }

    /// Mean acceptance probability over the sampling phase.
    pub fn acceptance_rate(&self) -> f64 {
        self.mean_of(|t| t.accept_prob)
    }

    /// Fraction of transitions that moved the chain.
    pub fn accepted_fraction(&self) -> f64 {
        self.mean_of(|t| if t.accepted { 1.0 } else { 0.0 })
    }

    pub fn divergence_count(&self) -> usize {
        self.transitions.iter().filter(|t| t.is_divergent()).count()
    }

    pub fn divergence_fraction(&self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        self.divergence_count() as f64 / self.len() as f64
    }

    pub fn has_excessive_divergences(&self) -> bool {
        self.divergence_fraction() > self.max_divergence_fraction
    }

    pub fn mean_leapfrog_steps(&self) -> f64 {
        self.mean_of(|t| t.n_leapfrog as f64)
    }

    pub fn energies(&self) -> Array1<f64> {
        self.transitions.iter().map(|t| t.energy).collect()
    }

    /// Energy Bayesian fraction of missing information,
    /// `Σ (E_t - E_{t-1})² / Σ (E_t - Ē)²`. Values well below 0.3 indicate that
    /// momentum resampling explores the energy distribution poorly.
    pub fn bfmi(&self) -> f64 {
        let energies = self.energies();
        if energies.len() < 2 {
            return f64::NAN;
        }
        let mean = energies.mean().unwrap_or(f64::NAN);
        let num: f64 = energies
            .windows(2)
            .into_iter()
            .map(|w| (w[1] - w[0]).powi(2))
            .sum();
        let den: f64 = energies.iter().map(|e| (e - mean).powi(2)).sum();
        num / den
    }

    pub fn summary(&self) -> TraceSummary {
        let mean = self.mean();
        let sd = self.std_dev();
        let ess = self.ess();
        let params = self
            .param_names
            .iter()
            .enumerate()
            .map(|(i, name)| ParamSummary {
                name: name.clone(),
                mean: mean[i],
                sd: sd[i],
                q05: self.quantile(i, 0.05).unwrap_or(f64::NAN),
                median: self.quantile(i, 0.5).unwrap_or(f64::NAN),
                q95: self.quantile(i, 0.95).unwrap_or(f64::NAN),
                ess: ess[i],
            })
            .collect();
        TraceSummary {
            params,
            draws: self.len(),
            acceptance_rate: self.acceptance_rate(),
            divergences: self.divergence_count(),
            step_size: self.step_size,
            bfmi: self.bfmi(),
            stopped_early: self.stopped_early,
        }
    }

    fn mean_of(&self, f: impl Fn(&TransitionStats) -> f64) -> f64 {
        if self.is_empty() {
            return f64::NAN;
        }
        self.transitions.iter().map(f).sum::<f64>() / self.len() as f64
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParamSummary {
    pub name: String,
    pub mean: f64,
    pub sd: f64,
    pub q05: f64,
    pub median: f64,
    pub q95: f64,
    pub ess: f64,
}

/// Posterior summary table of a trace.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceSummary {
    pub params: Vec<ParamSummary>,
    pub draws: usize,
    pub acceptance_rate: f64,
    pub divergences: usize,
    pub step_size: f64,
    pub bfmi: f64,
    pub stopped_early: bool,
}

impl fmt::Display for TraceSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:>12} {:>10} {:>10} {:>10} {:>10} {:>10} {:>8}",
            "param", "mean", "sd", "5%", "50%", "95%", "ess"
        )?;
        for p in &self.params {
            writeln!(
                f,
                "{:>12} {:>10.4} {:>10.4} {:>10.4} {:>10.4} {:>10.4} {:>8.0}",
                p.name, p.mean, p.sd, p.q05, p.median, p.q95, p.ess
            )?;
        }
        write!(
            f,
            "draws: {}, p(accept): {:.3}, divergences: {}, step size: {:.4}, E-BFMI: {:.3}",
            self.draws, self.acceptance_rate, self.divergences, self.step_size, self.bfmi
        )?;
        if self.stopped_early {
            write!(f, " (stopped early)")?;
        }
        Ok(())
    }
}
