//! Warm-up adaptation: dual-averaging step size and windowed mass-matrix estimation.

use crate::density::LogDensity;
use crate::integrator::{leapfrog, Integration, PhasePoint};
use crate::metric::Metric;
use ndarray::{Array1, Array2, Zip};
use rand::Rng;

/// Windows with fewer draws than this keep the previous metric.
pub const MIN_WINDOW_DRAWS: usize = 10;

/// Dual averaging for step size adaptation (Nesterov 2009, Hoffman & Gelman 2014).
///
/// Drives the mean acceptance probability towards `target_accept`.
#[derive(Debug, Clone, PartialEq)]
pub struct DualAveraging {
    target_accept: f64,
    log_eps: f64,
    log_eps_bar: f64,
    h_bar: f64,
    mu: f64,
    gamma: f64,
    t0: f64,
    kappa: f64,
    step: usize,
}

impl DualAveraging {
    pub fn new(target_accept: f64, init_eps: f64) -> Self {
        let log_eps = init_eps.ln();
        Self {
            target_accept,
            log_eps,
            log_eps_bar: log_eps,
            h_bar: 0.0,
            mu: (10.0 * init_eps).ln(),
            gamma: 0.05,
            t0: 10.0,
            kappa: 0.75,
            step: 0,
        }
    }

    /// Feeds the acceptance probability of one warm-up transition.
    pub fn update(&mut self, accept_prob: f64) {
        self.step += 1;
        let m = self.step as f64;
        let w = 1.0 / (m + self.t0);
        self.h_bar = (1.0 - w) * self.h_bar + w * (self.target_accept - accept_prob);

        self.log_eps = self.mu - (m.sqrt() / self.gamma) * self.h_bar;
        let m_kappa = m.powf(-self.kappa);
        self.log_eps_bar = m_kappa * self.log_eps + (1.0 - m_kappa) * self.log_eps_bar;
    }

    /// Step size to use for the next warm-up transition.
    pub fn current_step_size(&self) -> f64 {
        self.log_eps.exp()
    }

    /// Smoothed step size, frozen for sampling.
    pub fn adapted_step_size(&self) -> f64 {
        self.log_eps_bar.exp()
    }

    pub fn target_accept(&self) -> f64 {
        self.target_accept
    }

    /// Re-centres the adaptation on `init_eps` and forgets the accumulated statistics.
    pub fn restart(&mut self, init_eps: f64) {
        *self = Self::new(self.target_accept, init_eps);
    }
}

/// Stan's shrinkage of a window estimate towards `1e-3 · I`.
fn shrink(count: usize) -> (f64, f64) {
    let n = count as f64;
    (n / (n + 5.0), 1e-3 * 5.0 / (n + 5.0))
}

/// Online Welford variance estimator for a diagonal mass matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct WelfordVariance {
    mean: Array1<f64>,
    m2: Array1<f64>,
    count: usize,
}

impl WelfordVariance {
    pub fn new(dim: usize) -> Self {
        Self {
            mean: Array1::zeros(dim),
            m2: Array1::zeros(dim),
            count: 0,
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn update(&mut self, x: &Array1<f64>) {
        self.count += 1;
        let n = self.count as f64;
        Zip::from(&mut self.mean)
            .and(&mut self.m2)
            .and(x)
            .for_each(|mean, m2, &xi| {
                let delta = xi - *mean;
                *mean += delta / n;
                *m2 += delta * (xi - *mean);
            });
    }

    /// Sample variance, or `None` with fewer than two draws.
    pub fn variance(&self) -> Option<Array1<f64>> {
        if self.count < 2 {
            return None;
        }
        let denom = self.count as f64 - 1.0;
        Some(self.m2.mapv(|m| m / denom))
    }

    /// Variance shrunk towards `1e-3`: `n/(n+5) · var + 1e-3 · 5/(n+5)`.
    pub fn regularized_variance(&self) -> Option<Array1<f64>> {
        let (weight, jitter) = shrink(self.count);
        self.variance().map(|var| var.mapv(|v| weight * v + jitter))
    }

    pub fn reset(&mut self) {
        self.mean.fill(0.0);
        self.m2.fill(0.0);
        self.count = 0;
    }
}

/// Online Welford covariance estimator for a dense mass matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct WelfordCovariance {
    mean: Array1<f64>,
    m2: Array2<f64>,
    delta: Array1<f64>,
    count: usize,
}

impl WelfordCovariance {
    pub fn new(dim: usize) -> Self {
        Self {
            mean: Array1::zeros(dim),
            m2: Array2::zeros((dim, dim)),
            delta: Array1::zeros(dim),
            count: 0,
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn update(&mut self, x: &Array1<f64>) {
        self.count += 1;
        let n = self.count as f64;
        // delta = x - old mean; m2 += delta (x - new mean)ᵀ
        Zip::from(&mut self.delta)
            .and(&mut self.mean)
            .and(x)
            .for_each(|d, mean, &xi| {
                *d = xi - *mean;
                *mean += *d / n;
            });
        for ((i, j), m2) in self.m2.indexed_iter_mut() {
            *m2 += self.delta[i] * (x[j] - self.mean[j]);
        }
    }

    pub fn covariance(&self) -> Option<Array2<f64>> {
        if self.count < 2 {
            return None;
        }
        let denom = self.count as f64 - 1.0;
        Some(self.m2.mapv(|m| m / denom))
    }

    /// Covariance shrunk towards `1e-3 · I`.
    pub fn regularized_covariance(&self) -> Option<Array2<f64>> {
        let (weight, jitter) = shrink(self.count);
        self.covariance().map(|cov| {
            let mut reg = cov * weight;
            reg.diag_mut().mapv_inplace(|v| v + jitter);
            reg
        })
    }

    pub fn reset(&mut self) {
        self.mean.fill(0.0);
        self.m2.fill(0.0);
        self.count = 0;
    }
}

/// Accumulates draws for whichever metric shape is being adapted.
#[derive(Debug, Clone, PartialEq)]
pub enum MassMatrixEstimator {
    Diagonal(WelfordVariance),
    Dense(WelfordCovariance),
}

impl MassMatrixEstimator {
    pub fn for_metric(metric: &Metric) -> Self {
        match metric {
            Metric::Diagonal { .. } => Self::Diagonal(WelfordVariance::new(metric.dim())),
            Metric::Dense { .. } => Self::Dense(WelfordCovariance::new(metric.dim())),
        }
    }

    pub fn count(&self) -> usize {
        match self {
            Self::Diagonal(w) => w.count(),
            Self::Dense(w) => w.count(),
        }
    }

    pub fn update(&mut self, x: &Array1<f64>) {
        match self {
            Self::Diagonal(w) => w.update(x),
            Self::Dense(w) => w.update(x),
        }
    }

    /// Regularized metric from the current window, or `None` when the window is too
    /// short or the estimate is not usable.
    pub fn metric(&self) -> Option<Metric> {
        if self.count() < MIN_WINDOW_DRAWS {
            return None;
        }
        match self {
            Self::Diagonal(w) => w
                .regularized_variance()
                .and_then(|var| Metric::diagonal(var).ok()),
            Self::Dense(w) => w
                .regularized_covariance()
                .and_then(|cov| Metric::dense(cov).ok()),
        }
    }

    pub fn reset(&mut self) {
        match self {
            Self::Diagonal(w) => w.reset(),
            Self::Dense(w) => w.reset(),
        }
    }
}

/// Stan-like initial buffer: warm-up iterations (75, or 15 % of warm-up) whose draws never
/// reach the mass matrix estimator, so the transient from the starting point is discarded.
/// Zero for warm-ups shorter than 20 iterations.
pub fn default_initial_buffer(n_warmup: usize) -> usize {
    if n_warmup < 20 {
        return 0;
    }
    75.min(n_warmup * 15 / 100)
}

/// Stan-like mass matrix window boundaries for a warm-up of `n_warmup` iterations.
///
/// A boundary `b` closes a window after `b` warm-up iterations. The first window opens after
/// the [`default_initial_buffer`] and is 25 iterations long; each later one doubles, and the
/// last is stretched to the start of the terminal buffer (50 iterations or 10 %).
/// Warm-ups shorter than 20 iterations get no windows.
pub fn default_mass_matrix_windows(n_warmup: usize) -> Vec<usize> {
    if n_warmup < 20 {
        return Vec::new();
    }
    let init_buffer = default_initial_buffer(n_warmup);
    let term_buffer = 50.min(n_warmup / 10);
    let end_slow = n_warmup - term_buffer;

    let mut boundaries = Vec::new();
    let mut start = init_buffer;
    let mut size = 25;
    while start < end_slow {
        let mut end = (start + size).min(end_slow);
        if end + 2 * size > end_slow {
            end = end_slow;
        }
        boundaries.push(end);
        start = end;
        size *= 2;
    }
    boundaries
}

/// Finds a step size whose single-step acceptance probability is close to 0.5
/// (Hoffman & Gelman 2014, Algorithm 4).
///
/// Starting from `init_eps`, doubles while the acceptance probability stays above 0.5 or
/// halves while it stays below. Infeasible trial points count as zero acceptance.
pub fn find_reasonable_step_size<T, R>(
    target: &T,
    point: &PhasePoint,
    metric: &Metric,
    init_eps: f64,
    rng: &mut R,
) -> f64
where
    T: LogDensity + ?Sized,
    R: Rng,
{
    const MAX_ROUNDS: usize = 100;

    let mut start = point.clone();
    metric.sample_momentum(&mut start.momentum, rng);
    let h0 = start.hamiltonian(metric);

    let accept_prob = |eps: f64| -> f64 {
        let mut trial = start.clone();
        match leapfrog(target, &mut trial, eps, 1, metric) {
            Integration::Completed { .. } => {
                let a = (h0 - trial.hamiltonian(metric)).exp();
                if a.is_nan() {
                    0.0
                } else {
                    a.min(1.0)
                }
            }
            Integration::Halted { .. } => 0.0,
        }
    };

    let mut eps = init_eps;
    let grow = accept_prob(eps) > 0.5;
    for _ in 0..MAX_ROUNDS {
        let next = if grow { eps * 2.0 } else { eps * 0.5 };
        let a = accept_prob(next);
        if grow && a <= 0.5 {
            break;
        }
        eps = next;
        if !grow && a > 0.5 {
            break;
        }
    }
    eps.clamp(1e-10, 1e5)
}
