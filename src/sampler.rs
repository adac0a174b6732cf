/*!
Fixed-trajectory Hamiltonian Monte Carlo for a single chain.

[`HmcSampler`] walks through three phases:

- **Warmup**: every transition feeds its acceptance probability to dual averaging and its
  position to the mass-matrix estimator. At each configured window boundary the metric is
  replaced and the step size is searched again. Warm-up draws are not recorded.
- **Sampling**: step size and metric are frozen; every position (new or repeated) is
  appended to the [`Trace`].
- **Done**: further transitions are refused.

## Example

```rust
use extreme_hmc::config::HmcConfig;
use extreme_hmc::distributions::IsotropicGaussian;
use extreme_hmc::sampler::HmcSampler;
use ndarray::arr1;

let config = HmcConfig::default()
    .with_warmup_iterations(200)
    .with_sampling_iterations(500);
let sampler = HmcSampler::new(IsotropicGaussian::new(2), arr1(&[1.0, -1.0]), config)
    .unwrap()
    .set_seed(42);
let trace = sampler.run().unwrap();
assert_eq!(trace.len(), 500);
println!("{}", trace.summary());
```
*/

use crate::adapt::{find_reasonable_step_size, DualAveraging, MassMatrixEstimator, MIN_WINDOW_DRAWS};
use crate::config::{HmcConfig, RunControl};
use crate::density::LogDensity;
use crate::error::{Result, SamplerError};
use crate::integrator::{leapfrog, Integration, PhasePoint};
use crate::metric::Metric;
use crate::trace::{Divergence, Trace, TransitionStats};
use ndarray::Array1;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// Step size tried first when searching for a reasonable one.
const STEP_SIZE_SEARCH_START: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Warmup,
    Sampling,
    Done,
}

/// A single HMC chain over `target`.
#[derive(Debug)]
pub struct HmcSampler<T> {
    target: T,
    config: HmcConfig,
    windows: Vec<usize>,
    next_window: usize,
    /// Warm-up iterations skipped by the mass matrix estimator.
    buffer: usize,
    phase: Phase,
    /// Iterations completed in the current phase.
    iteration: usize,
    current: PhasePoint,
    metric: Metric,
    /// `None` until the first transition decides on a starting value.
    step_size: Option<f64>,
    dual_averaging: DualAveraging,
    estimator: MassMatrixEstimator,
    trace: Trace,
    rng: SmallRng,
}

impl<T: LogDensity> HmcSampler<T> {
    /// Validates `config` and `initial_position` and prepares a chain.
    ///
    /// The chain draws its random stream from the thread RNG; use [`Self::set_seed`] for
    /// reproducible runs.
    pub fn new(target: T, initial_position: Array1<f64>, config: HmcConfig) -> Result<Self> {
        config.validate()?;
        let dim = target.dim();
        if initial_position.len() != dim {
            return Err(SamplerError::Dimension {
                expected: dim,
                got: initial_position.len(),
            });
        }
        if initial_position.iter().any(|x| !x.is_finite()) {
            return Err(SamplerError::InitialPosition(format!(
                "initial position {initial_position} has non-finite entries"
            )));
        }
        let current = PhasePoint::new(&target, initial_position).map_err(|reason| {
            SamplerError::InitialPosition(format!("initial position is infeasible: {reason}"))
        })?;

        let metric = Metric::unit(config.metric, dim);
        let windows = config.resolved_windows();
        let buffer = config.resolved_buffer();
        let step_size = config.initial_step_size;
        let trace = Trace::new(
            target.param_names(),
            metric.clone(),
            config.max_divergence_fraction,
        );

        Ok(Self {
            dual_averaging: DualAveraging::new(
                config.target_acceptance,
                step_size.unwrap_or(STEP_SIZE_SEARCH_START),
            ),
            estimator: MassMatrixEstimator::for_metric(&metric),
            target,
            config,
            windows,
            next_window: 0,
            buffer,
            phase: Phase::Warmup,
            iteration: 0,
            current,
            metric,
            step_size,
            trace,
            rng: SmallRng::from_rng(&mut rand::rng()),
        })
    }

    pub fn set_seed(mut self, seed: u64) -> Self {
        self.rng = SmallRng::seed_from_u64(seed);
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn config(&self) -> &HmcConfig {
        &self.config
    }

    pub fn target(&self) -> &T {
        &self.target
    }

    /// Current position of the chain.
    pub fn position(&self) -> &Array1<f64> {
        &self.current.position
    }

    /// Log-density at the current position.
    pub fn logp(&self) -> f64 {
        self.current.logp
    }

    /// Nominal step size of the next transition, if already chosen.
    pub fn step_size(&self) -> Option<f64> {
        self.step_size
    }

    pub fn metric(&self) -> &Metric {
        &self.metric
    }

    /// Draws recorded so far.
    pub fn trace(&self) -> &Trace {
        &self.trace
    }

    /// Performs one transition and advances the state machine.
    ///
    /// Returns `Ok(None)` once the chain is done.
    pub fn transition(&mut self) -> Result<Option<TransitionStats>> {
        if self.phase == Phase::Done {
            return Ok(None);
        }
        let nominal = self.nominal_step_size();
        let stats = self.hmc_step(nominal);

        if self.phase == Phase::Warmup {
            self.adapt(&stats);
        } else {
            self.trace.push(&self.current.position, stats)?;
            self.iteration += 1;
            if self.iteration == self.config.sampling_iterations {
                self.finish();
            }
        }
        Ok(Some(stats))
    }

    /// Runs the chain to completion.
    pub fn run(self) -> Result<Trace> {
        self.run_with(&RunControl::new())
    }

    /// Runs the chain until it completes or `control` asks it to stop.
    pub fn run_with(self, control: &RunControl) -> Result<Trace> {
        self.run_observed(control, |_, _| {})
    }

    /// Like [`Self::run_with`], calling `observer` with the position and diagnostics after
    /// every transition, warm-up included.
    pub fn run_observed<F>(mut self, control: &RunControl, mut observer: F) -> Result<Trace>
    where
        F: FnMut(&Array1<f64>, &TransitionStats),
    {
        while self.phase != Phase::Done {
            if control.should_stop() {
                log::debug!(
                    "stop requested during {:?} after {} iterations",
                    self.phase,
                    self.iteration
                );
                self.trace.stopped_early = true;
                break;
            }
            if let Some(stats) = self.transition()? {
                observer(&self.current.position, &stats);
            }
        }
        Ok(self.into_trace())
    }

    /// Consumes the sampler and returns what it recorded.
    pub fn into_trace(mut self) -> Trace {
        // Without a completed warm-up the trace still reports the step size in use.
        if self.phase == Phase::Warmup {
            let step_size = self.nominal_step_size();
            self.trace.set_adaptation(step_size, self.metric.clone());
        }
        self.trace
    }

    fn nominal_step_size(&mut self) -> f64 {
        if let Some(eps) = self.step_size {
            return eps;
        }
        let eps = find_reasonable_step_size(
            &self.target,
            &self.current,
            &self.metric,
            STEP_SIZE_SEARCH_START,
            &mut self.rng,
        );
        log::debug!("initial step size {eps:.4e}");
        self.dual_averaging.restart(eps);
        self.step_size = Some(eps);
        eps
    }

    /// Draws momentum, integrates and applies the Metropolis correction.
    fn hmc_step(&mut self, nominal: f64) -> TransitionStats {
        let jitter = self.config.step_size_jitter;
        let step_size = if jitter > 0.0 {
            nominal * (1.0 + jitter * (2.0 * self.rng.random::<f64>() - 1.0))
        } else {
            nominal
        };

        let mut proposal = self.current.clone();
        self.metric.sample_momentum(&mut proposal.momentum, &mut self.rng);
        let h0 = proposal.hamiltonian(&self.metric);

        let integration = leapfrog(
            &self.target,
            &mut proposal,
            step_size,
            self.config.trajectory_length,
            &self.metric,
        );

        let (accept_prob, energy_error, divergence) = match integration {
            Integration::Halted { reason, .. } => {
                (0.0, f64::INFINITY, Some(Divergence::Infeasible(reason)))
            }
            Integration::Completed { .. } => {
                let h1 = proposal.hamiltonian(&self.metric);
                let delta = h1 - h0;
                if !h1.is_finite() {
                    (0.0, delta, Some(Divergence::NonFiniteEnergy))
                } else {
                    let accept_prob = (-delta).exp().min(1.0);
                    let divergence = (delta.abs() > self.config.divergence_threshold)
                        .then_some(Divergence::EnergyError);
                    (accept_prob, delta, divergence)
                }
            }
        };

        let u: f64 = self.rng.random();
        let accepted = divergence.is_none() && u < accept_prob;
        let energy = if accepted { h0 + energy_error } else { h0 };
        if accepted {
            self.current = proposal;
        }

        TransitionStats {
            accept_prob,
            accepted,
            divergence,
            n_leapfrog: integration.steps(),
            energy,
            energy_error,
            step_size,
        }
    }

    fn adapt(&mut self, stats: &TransitionStats) {
        let warmup = self.trace.warmup_mut();
        warmup.iterations += 1;
        warmup.accept_probs.push(stats.accept_prob);
        if stats.is_divergent() {
            warmup.divergences += 1;
        }

        self.dual_averaging.update(stats.accept_prob);
        self.step_size = Some(self.dual_averaging.current_step_size());
        if self.iteration >= self.buffer {
            self.estimator.update(&self.current.position);
        }
        self.iteration += 1;

        if self.windows.get(self.next_window) == Some(&self.iteration) {
            self.next_window += 1;
            self.update_metric();
        }

        if self.iteration == self.config.warmup_iterations {
            let eps = self.dual_averaging.adapted_step_size();
            self.step_size = Some(eps);
            self.trace.set_adaptation(eps, self.metric.clone());
            let warmup = self.trace.warmup();
            log::debug!(
                "warm-up finished after {} iterations: step size {:.4e}, {} metric updates, {} divergences",
                warmup.iterations,
                eps,
                warmup.metric_updates,
                warmup.divergences
            );
            self.phase = Phase::Sampling;
            self.iteration = 0;
        }
    }

    fn update_metric(&mut self) {
        let draws = self.estimator.count();
        match self.estimator.metric() {
            Some(metric) => {
                self.metric = metric;
                let init = self.step_size.unwrap_or(STEP_SIZE_SEARCH_START);
                let eps = find_reasonable_step_size(
                    &self.target,
                    &self.current,
                    &self.metric,
                    init,
                    &mut self.rng,
                );
                self.dual_averaging.restart(eps);
                self.step_size = Some(eps);
                self.trace.warmup_mut().metric_updates += 1;
                log::debug!(
                    "mass matrix updated at warm-up iteration {} from {draws} draws, inverse mass diagonal {}, step size {eps:.4e}",
                    self.iteration,
                    self.metric.inv_mass_diagonal()
                );
            }
            None => {
                self.trace.warmup_mut().skipped_windows += 1;
                log::warn!(
                    "mass matrix window ending at warm-up iteration {} has {draws} usable draws (minimum {MIN_WINDOW_DRAWS}); keeping the previous metric",
                    self.iteration
                );
            }
        }
        self.estimator.reset();
    }

    fn finish(&mut self) {
        self.phase = Phase::Done;
        if self.trace.has_excessive_divergences() {
            log::warn!(
                "{} of {} sampling transitions diverged ({:.1}%); the posterior may be poorly explored",
                self.trace.divergence_count(),
                self.trace.len(),
                100.0 * self.trace.divergence_fraction()
            );
        }
        log::info!("chain finished\n{}", self.trace.summary());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributions::{Bounded, DiagGaussian, IsotropicGaussian};
    use crate::metric::MetricKind;
    use ndarray::arr1;

    fn quick_config() -> HmcConfig {
        HmcConfig::default()
            .with_warmup_iterations(300)
            .with_sampling_iterations(400)
    }

    #[test]
    fn phases_advance_in_order() {
        let config = HmcConfig::default()
            .with_warmup_iterations(3)
            .with_sampling_iterations(2)
            .with_initial_step_size(0.5);
        let mut sampler = HmcSampler::new(IsotropicGaussian::new(2), arr1(&[0.0, 0.0]), config)
            .unwrap()
            .set_seed(1);
        assert_eq!(sampler.phase(), Phase::Warmup);
        for _ in 0..3 {
            sampler.transition().unwrap().unwrap();
        }
        assert_eq!(sampler.phase(), Phase::Sampling);
        assert!(sampler.trace().is_empty());
        sampler.transition().unwrap().unwrap();
        sampler.transition().unwrap().unwrap();
        assert_eq!(sampler.phase(), Phase::Done);
        assert!(sampler.transition().unwrap().is_none());
        assert_eq!(sampler.trace().len(), 2);
        assert_eq!(sampler.trace().warmup().iterations, 3);
    }

    #[test]
    fn zero_warmup_is_rejected() {
        let config = HmcConfig::default()
            .with_warmup_iterations(0)
            .with_sampling_iterations(5);
        assert!(matches!(
            HmcSampler::new(IsotropicGaussian::new(1), arr1(&[0.0]), config),
            Err(SamplerError::Config(_))
        ));
    }

    #[test]
    fn single_warmup_iteration_without_windows() {
        let config = HmcConfig::default()
            .with_warmup_iterations(1)
            .with_sampling_iterations(5)
            .with_mass_matrix_windows(vec![]);
        let mut sampler = HmcSampler::new(IsotropicGaussian::new(1), arr1(&[0.0]), config)
            .unwrap()
            .set_seed(3);
        assert_eq!(sampler.phase(), Phase::Warmup);
        sampler.transition().unwrap().unwrap();
        assert_eq!(sampler.phase(), Phase::Sampling);
        let trace = sampler.run().unwrap();
        assert_eq!(trace.len(), 5);
        assert_eq!(trace.warmup().metric_updates, 0);
        assert!(trace.step_size() > 0.0);
    }

    #[test]
    fn initial_buffer_discards_transient_from_distant_start() {
        // Default windows for 200 warm-up iterations: buffer 30, first window ends at 55.
        let config = HmcConfig::default()
            .with_warmup_iterations(200)
            .with_sampling_iterations(10);
        assert_eq!(config.resolved_buffer(), 30);
        assert_eq!(config.resolved_windows()[0], 55);
        let mut sampler = HmcSampler::new(IsotropicGaussian::new(1), arr1(&[20.0]), config)
            .unwrap()
            .set_seed(21);
        for _ in 0..55 {
            sampler.transition().unwrap().unwrap();
        }
        assert_eq!(sampler.trace().warmup().metric_updates, 1);
        let inv_mass = sampler.metric().inv_mass_diagonal()[0];
        assert!(inv_mass > 0.1 && inv_mass < 5.0, "inverse mass {inv_mass}");
    }

    #[test]
    fn rejects_bad_initial_positions() {
        let target = Bounded::new(IsotropicGaussian::new(1), arr1(&[0.0]), arr1(&[1.0])).unwrap();
        assert!(matches!(
            HmcSampler::new(&target, arr1(&[2.0]), HmcConfig::default()),
            Err(SamplerError::InitialPosition(_))
        ));
        assert!(matches!(
            HmcSampler::new(&target, arr1(&[f64::NAN]), HmcConfig::default()),
            Err(SamplerError::InitialPosition(_))
        ));
        assert!(matches!(
            HmcSampler::new(&target, arr1(&[0.5, 0.5]), HmcConfig::default()),
            Err(SamplerError::Dimension { expected: 1, got: 2 })
        ));
        assert!(matches!(
            HmcSampler::new(
                &target,
                arr1(&[0.5]),
                HmcConfig::default().with_trajectory_length(0)
            ),
            Err(SamplerError::Config(_))
        ));
    }

    #[test]
    fn seeded_runs_are_reproducible() {
        let run = || {
            HmcSampler::new(IsotropicGaussian::new(3), arr1(&[1.0, 0.0, -1.0]), quick_config())
                .unwrap()
                .set_seed(99)
                .run()
                .unwrap()
        };
        assert_eq!(run().draws(), run().draws());
    }

    #[test]
    fn warmup_adapts_mass_to_scales() {
        let target = DiagGaussian::new(arr1(&[0.0, 0.0]), arr1(&[100.0, 0.01])).unwrap();
        let config = HmcConfig::default()
            .with_warmup_iterations(1000)
            .with_sampling_iterations(10);
        let trace = HmcSampler::new(&target, arr1(&[1.0, 0.0]), config)
            .unwrap()
            .set_seed(5)
            .run()
            .unwrap();
        let inv_mass = trace.metric().inv_mass_diagonal();
        assert!(inv_mass[0] > 20.0, "inverse mass {inv_mass}");
        assert!(inv_mass[1] < 0.05, "inverse mass {inv_mass}");
        assert!(trace.warmup().metric_updates > 0);
    }

    #[test]
    fn short_windows_keep_metric() {
        let config = HmcConfig::default()
            .with_warmup_iterations(50)
            .with_sampling_iterations(10)
            .with_mass_matrix_windows(vec![5, 40]);
        let trace = HmcSampler::new(IsotropicGaussian::new(2), arr1(&[0.0, 0.0]), config)
            .unwrap()
            .set_seed(8)
            .run()
            .unwrap();
        assert_eq!(trace.warmup().skipped_windows, 1);
        assert_eq!(trace.warmup().metric_updates, 1);
    }

    #[test]
    fn dense_metric_runs() {
        let config = quick_config().with_metric(MetricKind::Dense);
        let trace = HmcSampler::new(IsotropicGaussian::new(2), arr1(&[0.5, 0.5]), config)
            .unwrap()
            .set_seed(13)
            .run()
            .unwrap();
        assert_eq!(trace.metric().kind(), MetricKind::Dense);
        assert_eq!(trace.len(), 400);
    }

    #[test]
    fn cancelled_run_is_shorter_and_flagged() {
        let control = RunControl::new();
        let config = HmcConfig::default()
            .with_warmup_iterations(10)
            .with_sampling_iterations(1000)
            .with_initial_step_size(0.3);
        let sampler = HmcSampler::new(IsotropicGaussian::new(2), arr1(&[0.0, 0.0]), config)
            .unwrap()
            .set_seed(21);
        let mut seen = 0;
        let trace = sampler
            .run_observed(&control, |_, _| {
                seen += 1;
                if seen == 60 {
                    control.cancel();
                }
            })
            .unwrap();
        assert!(trace.stopped_early());
        assert_eq!(trace.len(), 50);
        assert!(trace.draws().iter().all(|x| x.is_finite()));
    }
}
