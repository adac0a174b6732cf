//! Sampler configuration.
//!
//! Configurations are plain data: they serialize with `serde` so callers can keep them
//! next to the model definition in JSON or TOML, and they are checked by
//! [`HmcConfig::validate`] before any iteration runs.

use crate::adapt::{default_initial_buffer, default_mass_matrix_windows, MIN_WINDOW_DRAWS};
use crate::error::{Result, SamplerError};
use crate::metric::MetricKind;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Settings of a single HMC chain.
///
/// # Examples
///
/// ```rust
/// use extreme_hmc::config::HmcConfig;
///
/// let config = HmcConfig::default()
///     .with_warmup_iterations(500)
///     .with_sampling_iterations(2000)
///     .with_trajectory_length(16);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HmcConfig {
    /// Iterations spent tuning the step size and the mass matrix. Not recorded; at least 1.
    pub warmup_iterations: usize,
    /// Iterations recorded in the trace.
    pub sampling_iterations: usize,
    /// Leapfrog steps per transition.
    pub trajectory_length: usize,
    /// Mean acceptance probability targeted by dual averaging, in (0, 1).
    pub target_acceptance: f64,
    /// Warm-up iterations after which the mass matrix is re-estimated.
    /// `None` selects [`default_mass_matrix_windows`]; an empty list disables
    /// mass-matrix adaptation.
    pub mass_matrix_windows: Option<Vec<usize>>,
    /// Leading warm-up iterations whose draws are not used for the mass matrix.
    /// `None` uses [`default_initial_buffer`], shortened when needed so the first window
    /// keeps at least `MIN_WINDOW_DRAWS` draws.
    pub mass_matrix_buffer: Option<usize>,
    /// Energy error above which a transition is divergent.
    pub divergence_threshold: f64,
    /// Starting step size; `None` searches for one from the initial position.
    pub initial_step_size: Option<f64>,
    /// Each transition draws its step size uniformly from `ε · [1 - j, 1 + j]`.
    pub step_size_jitter: f64,
    pub metric: MetricKind,
    /// Divergence fraction above which the trace is flagged and a warning is logged.
    pub max_divergence_fraction: f64,
}

impl Default for HmcConfig {
    fn default() -> Self {
        Self {
            warmup_iterations: 1000,
            sampling_iterations: 1000,
            trajectory_length: 10,
            target_acceptance: 0.8,
            mass_matrix_windows: None,
            mass_matrix_buffer: None,
            divergence_threshold: 1000.0,
            initial_step_size: None,
            step_size_jitter: 0.2,
            metric: MetricKind::Diagonal,
            max_divergence_fraction: 0.01,
        }
    }
}

impl HmcConfig {
    pub fn with_warmup_iterations(mut self, n: usize) -> Self {
        self.warmup_iterations = n;
        self
    }

    pub fn with_sampling_iterations(mut self, n: usize) -> Self {
        self.sampling_iterations = n;
        self
    }

    pub fn with_trajectory_length(mut self, n_steps: usize) -> Self {
        self.trajectory_length = n_steps;
        self
    }

    pub fn with_target_acceptance(mut self, target: f64) -> Self {
        self.target_acceptance = target;
        self
    }

    pub fn with_mass_matrix_windows(mut self, windows: Vec<usize>) -> Self {
        self.mass_matrix_windows = Some(windows);
        self
    }

    pub fn with_mass_matrix_buffer(mut self, buffer: usize) -> Self {
        self.mass_matrix_buffer = Some(buffer);
        self
    }

    pub fn with_divergence_threshold(mut self, threshold: f64) -> Self {
        self.divergence_threshold = threshold;
        self
    }

    pub fn with_initial_step_size(mut self, step_size: f64) -> Self {
        self.initial_step_size = Some(step_size);
        self
    }

    pub fn with_step_size_jitter(mut self, jitter: f64) -> Self {
        self.step_size_jitter = jitter;
        self
    }

    pub fn with_metric(mut self, metric: MetricKind) -> Self {
        self.metric = metric;
        self
    }

    pub fn with_max_divergence_fraction(mut self, fraction: f64) -> Self {
        self.max_divergence_fraction = fraction;
        self
    }

    /// Window boundaries that will actually be used.
    pub fn resolved_windows(&self) -> Vec<usize> {
        match &self.mass_matrix_windows {
            Some(windows) => windows.clone(),
            None => default_mass_matrix_windows(self.warmup_iterations),
        }
    }

    /// Number of leading warm-up iterations kept out of the mass matrix estimate.
    pub fn resolved_buffer(&self) -> usize {
        if let Some(buffer) = self.mass_matrix_buffer {
            return buffer;
        }
        let buffer = default_initial_buffer(self.warmup_iterations);
        match self.resolved_windows().first() {
            Some(&first) => buffer.min(first.saturating_sub(MIN_WINDOW_DRAWS)),
            None => buffer,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(SamplerError::Config(msg));

        if self.warmup_iterations == 0 {
            return fail("warmup_iterations must be at least 1".to_string());
        }
        if self.sampling_iterations == 0 {
            return fail("sampling_iterations must be at least 1".to_string());
        }
        if self.trajectory_length == 0 {
            return fail("trajectory_length must be at least 1".to_string());
        }
        if !(self.target_acceptance > 0.0 && self.target_acceptance < 1.0) {
            return fail(format!(
                "target_acceptance must be in (0, 1), got {}",
                self.target_acceptance
            ));
        }
        if !(self.divergence_threshold > 0.0) {
            return fail(format!(
                "divergence_threshold must be positive, got {}",
                self.divergence_threshold
            ));
        }
        if let Some(eps) = self.initial_step_size {
            if !(eps > 0.0 && eps.is_finite()) {
                return fail(format!("initial_step_size must be positive, got {eps}"));
            }
        }
        if !(0.0..1.0).contains(&self.step_size_jitter) {
            return fail(format!(
                "step_size_jitter must be in [0, 1), got {}",
                self.step_size_jitter
            ));
        }
        if !(0.0..=1.0).contains(&self.max_divergence_fraction) {
            return fail(format!(
                "max_divergence_fraction must be in [0, 1], got {}",
                self.max_divergence_fraction
            ));
        }
        if let Some(windows) = &self.mass_matrix_windows {
            if windows.windows(2).any(|w| w[0] >= w[1]) {
                return fail(format!(
                    "mass_matrix_windows must be strictly increasing, got {windows:?}"
                ));
            }
            if let Some(&first) = windows.first() {
                if first == 0 {
                    return fail("mass_matrix_windows boundaries must be positive".to_string());
                }
            }
            if let Some(&last) = windows.last() {
                if last > self.warmup_iterations {
                    return fail(format!(
                        "mass matrix window boundary {last} exceeds warmup_iterations {}",
                        self.warmup_iterations
                    ));
                }
            }
        }
        if let Some(buffer) = self.mass_matrix_buffer {
            if let Some(&first) = self.resolved_windows().first() {
                if buffer >= first {
                    return fail(format!(
                        "mass_matrix_buffer {buffer} leaves no draws for the window ending at {first}"
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Settings of a parallel multi-chain run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MultiChainConfig {
    pub n_chains: usize,
    /// Chain `i` is seeded with `seed + i + 1`, wrapping on overflow.
    pub seed: u64,
    pub hmc: HmcConfig,
}

impl Default for MultiChainConfig {
    fn default() -> Self {
        Self {
            n_chains: 4,
            seed: 42,
            hmc: HmcConfig::default(),
        }
    }
}

impl MultiChainConfig {
    pub fn validate(&self) -> Result<()> {
        if self.n_chains == 0 {
            return Err(SamplerError::Config(
                "n_chains must be at least 1".to_string(),
            ));
        }
        self.hmc.validate()
    }
}

/// Cooperative stop signal shared by running chains.
///
/// Chains check it between iterations, so a stop never tears an iteration apart.
#[derive(Debug, Clone, Default)]
pub struct RunControl {
    cancel: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl RunControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stops the run once `budget` of wall-clock time has elapsed from now.
    pub fn with_time_budget(mut self, budget: Duration) -> Self {
        self.deadline = Some(Instant::now() + budget);
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Requests every chain sharing this control to stop after its current iteration.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    pub fn should_stop(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
            || self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}
