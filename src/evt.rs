//! Extreme value models: GEV for block maxima, GPD for threshold exceedances.
//!
//! Both posteriors are parameterized on the natural scale, so σ is a raw coordinate of the
//! position and the sampler sees a hard boundary at σ = 0. Points with σ ≤ 0, points
//! outside the support of the likelihood (`1 + ξ·z ≤ 0` for some observation) and points
//! outside the support of a prior all evaluate to `-inf`.
//!
//! - GEV position: `[mu, sigma, xi]`
//! - GPD position: `[sigma, xi]`
//!
//! Gradients are analytic. For |ξ| below [`XI_SERIES_CUTOFF`] the closed form cancels
//! catastrophically, so the log-likelihood and its derivatives are taken from a
//! second-order expansion in ξ around the Gumbel / exponential limit.

use crate::density::LogDensity;
use crate::error::{Result, SamplerError};
use crate::trace::Trace;
use ndarray::Array1;
use serde::{Deserialize, Serialize};

/// Below this |ξ| the shape derivatives come from the series expansion.
pub const XI_SERIES_CUTOFF: f64 = 1e-6;

/// Euler–Mascheroni constant, the mean of a standard Gumbel variable.
const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// Univariate prior on one model parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Prior {
    /// Improper constant density.
    Flat,
    Normal { mean: f64, sd: f64 },
    /// Normal folded at zero; support `x > 0`.
    HalfNormal { sd: f64 },
    /// Support `lower < x < upper`.
    Uniform { lower: f64, upper: f64 },
    /// Support `x > 0`.
    Exponential { rate: f64 },
}

impl Prior {
    pub fn validate(&self) -> Result<()> {
        let ok = match *self {
            Prior::Flat => true,
            Prior::Normal { mean, sd } => mean.is_finite() && sd.is_finite() && sd > 0.0,
            Prior::HalfNormal { sd } => sd.is_finite() && sd > 0.0,
            Prior::Uniform { lower, upper } => {
                lower.is_finite() && upper.is_finite() && lower < upper
            }
            Prior::Exponential { rate } => rate.is_finite() && rate > 0.0,
        };
        if ok {
            Ok(())
        } else {
            Err(SamplerError::Model(format!("invalid prior {self:?}")))
        }
    }

    /// Unnormalized log-density and its derivative at `x`; `(-inf, 0)` outside the support.
    pub fn logp_and_grad(&self, x: f64) -> (f64, f64) {
        match *self {
            Prior::Flat => (0.0, 0.0),
            Prior::Normal { mean, sd } => {
                let z = (x - mean) / sd;
                (-0.5 * z * z - sd.ln(), -z / sd)
            }
            Prior::HalfNormal { sd } => {
                if x <= 0.0 {
                    return (f64::NEG_INFINITY, 0.0);
                }
                let z = x / sd;
                (-0.5 * z * z - sd.ln(), -z / sd)
            }
            Prior::Uniform { lower, upper } => {
                if x <= lower || x >= upper {
                    return (f64::NEG_INFINITY, 0.0);
                }
                (-(upper - lower).ln(), 0.0)
            }
            Prior::Exponential { rate } => {
                if x <= 0.0 {
                    return (f64::NEG_INFINITY, 0.0);
                }
                (rate.ln() - rate * x, -rate)
            }
        }
    }
}

fn validate_data(name: &str, data: &[f64]) -> Result<()> {
    if data.is_empty() {
        return Err(SamplerError::Model(format!("{name} must be non-empty")));
    }
    if data.iter().any(|x| !x.is_finite()) {
        return Err(SamplerError::Model(format!("{name} must be finite")));
    }
    Ok(())
}

fn mean_and_std(data: &[f64]) -> (f64, f64) {
    let n = data.len() as f64;
    let mean = data.iter().sum::<f64>() / n;
    let var = data.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

/// GEV log-likelihood and gradient with respect to `(mu, sigma, xi)`.
///
/// Returns `None` when `sigma <= 0` or an observation lies outside the support.
pub fn gev_loglik(data: &[f64], mu: f64, sigma: f64, xi: f64) -> Option<(f64, [f64; 3])> {
    if !(sigma > 0.0) || !sigma.is_finite() || !mu.is_finite() || !xi.is_finite() {
        return None;
    }
    let log_sigma = sigma.ln();
    let mut ll = 0.0;
    let (mut d_mu, mut d_sigma, mut d_xi) = (0.0, 0.0, 0.0);

    for &x in data {
        let z = (x - mu) / sigma;
        let t = 1.0 + xi * z;
        if t <= 0.0 {
            return None;
        }
        let (ll_i, u, d_xi_i) = if xi.abs() < XI_SERIES_CUTOFF {
            let e = (-z).exp();
            let z2 = z * z;
            let z3 = z2 * z;
            let a = 0.5 * z2 - z - 0.5 * e * z2;
            let b = 0.5 * z2 - z3 / 3.0 - e * (0.125 * z2 * z2 - z3 / 3.0);
            let u = e * (1.0 + 0.5 * xi * z2);
            (-z - e + xi * a + xi * xi * b, u, a + 2.0 * xi * b)
        } else {
            let log_t = (xi * z).ln_1p();
            let u = (-log_t / xi).exp();
            let ll_i = -(1.0 + 1.0 / xi) * log_t - u;
            let d_xi_i = (1.0 - u) * log_t / (xi * xi) - (1.0 + 1.0 / xi) * z / t
                + u * z / (xi * t);
            (ll_i, u, d_xi_i)
        };
        let c = ((1.0 + xi) - u) / (sigma * t);
        ll += ll_i - log_sigma;
        d_mu += c;
        d_sigma += c * z - 1.0 / sigma;
        d_xi += d_xi_i;
    }
    Some((ll, [d_mu, d_sigma, d_xi]))
}

/// GPD log-likelihood of exceedances and gradient with respect to `(sigma, xi)`.
///
/// Returns `None` when `sigma <= 0` or an exceedance lies outside the support.
pub fn gpd_loglik(exceedances: &[f64], sigma: f64, xi: f64) -> Option<(f64, [f64; 2])> {
    if !(sigma > 0.0) || !sigma.is_finite() || !xi.is_finite() {
        return None;
    }
    let log_sigma = sigma.ln();
    let mut ll = 0.0;
    let (mut d_sigma, mut d_xi) = (0.0, 0.0);

    for &y in exceedances {
        let w = y / sigma;
        let t = 1.0 + xi * w;
        if t <= 0.0 {
            return None;
        }
        let (ll_i, d_xi_i) = if xi.abs() < XI_SERIES_CUTOFF {
            let w2 = w * w;
            let a = 0.5 * w2 - w;
            let b = 0.5 * w2 - w2 * w / 3.0;
            (-w + xi * a + xi * xi * b, a + 2.0 * xi * b)
        } else {
            let log_t = (xi * w).ln_1p();
            (
                -(1.0 + 1.0 / xi) * log_t,
                log_t / (xi * xi) - (1.0 + xi) * w / (xi * t),
            )
        };
        ll += ll_i - log_sigma;
        d_sigma += (1.0 + xi) * w / (sigma * t) - 1.0 / sigma;
        d_xi += d_xi_i;
    }
    Some((ll, [d_sigma, d_xi]))
}

/// Level exceeded on average once every `period` blocks under GEV `[mu, sigma, xi]`.
pub fn gev_return_level(params: &[f64], period: f64) -> Result<f64> {
    let [mu, sigma, xi] = params else {
        return Err(SamplerError::Dimension {
            expected: 3,
            got: params.len(),
        });
    };
    if !(period > 1.0) {
        return Err(SamplerError::Model("return period must be > 1".to_string()));
    }
    // y = -log(1 - 1/T)
    let log_y = (-(-1.0 / period).ln_1p()).ln();
    if xi.abs() < 1e-12 {
        Ok(mu - sigma * log_y)
    } else {
        Ok(mu + sigma * (-xi * log_y).exp_m1() / xi)
    }
}

/// Level exceeded on average once every `period` observations under a GPD
/// `[sigma, xi]` fitted above `threshold`, where a fraction `exceedance_rate` of
/// observations exceeds the threshold.
pub fn gpd_return_level(
    params: &[f64],
    threshold: f64,
    exceedance_rate: f64,
    period: f64,
) -> Result<f64> {
    let [sigma, xi] = params else {
        return Err(SamplerError::Dimension {
            expected: 2,
            got: params.len(),
        });
    };
    if !(exceedance_rate > 0.0 && exceedance_rate <= 1.0) {
        return Err(SamplerError::Model(
            "exceedance rate must be in (0, 1]".to_string(),
        ));
    }
    if !(period * exceedance_rate > 1.0) {
        return Err(SamplerError::Model(
            "return period must exceed the mean spacing of exceedances".to_string(),
        ));
    }
    let log_m = (period * exceedance_rate).ln();
    if xi.abs() < 1e-12 {
        Ok(threshold + sigma * log_m)
    } else {
        Ok(threshold + sigma * (xi * log_m).exp_m1() / xi)
    }
}

/// Maxima of consecutive blocks of `block_size` observations.
///
/// A trailing incomplete block is dropped.
pub fn block_maxima(series: &[f64], block_size: usize) -> Result<Vec<f64>> {
    if block_size == 0 {
        return Err(SamplerError::Model("block size must be positive".to_string()));
    }
    validate_data("series", series)?;
    let maxima: Vec<f64> = series
        .chunks_exact(block_size)
        .map(|block| block.iter().copied().fold(f64::NEG_INFINITY, f64::max))
        .collect();
    if maxima.is_empty() {
        return Err(SamplerError::Model(format!(
            "series of length {} has no complete block of size {block_size}",
            series.len()
        )));
    }
    Ok(maxima)
}

/// Exceedances of a series over a threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct PeaksOverThreshold {
    pub threshold: f64,
    /// `x - threshold` for every `x > threshold`, in series order.
    pub exceedances: Vec<f64>,
    /// Fraction of observations above the threshold.
    pub rate: f64,
}

pub fn peaks_over_threshold(series: &[f64], threshold: f64) -> Result<PeaksOverThreshold> {
    validate_data("series", series)?;
    let exceedances: Vec<f64> = series
        .iter()
        .filter(|&&x| x > threshold)
        .map(|x| x - threshold)
        .collect();
    if exceedances.is_empty() {
        return Err(SamplerError::Model(format!(
            "no observation exceeds the threshold {threshold}"
        )));
    }
    let rate = exceedances.len() as f64 / series.len() as f64;
    Ok(PeaksOverThreshold {
        threshold,
        exceedances,
        rate,
    })
}

/// Priors for the GEV parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GevPriors {
    pub mu: Prior,
    pub sigma: Prior,
    pub xi: Prior,
}

impl Default for GevPriors {
    fn default() -> Self {
        Self {
            mu: Prior::Flat,
            sigma: Prior::Flat,
            xi: Prior::Normal { mean: 0.0, sd: 0.5 },
        }
    }
}

/// Posterior of GEV parameters given block maxima.
#[derive(Debug, Clone, PartialEq)]
pub struct GevPosterior {
    data: Vec<f64>,
    priors: GevPriors,
}

impl GevPosterior {
    pub fn new(data: Vec<f64>) -> Result<Self> {
        validate_data("block maxima", &data)?;
        Ok(Self {
            data,
            priors: GevPriors::default(),
        })
    }

    pub fn with_priors(mut self, priors: GevPriors) -> Result<Self> {
        priors.mu.validate()?;
        priors.sigma.validate()?;
        priors.xi.validate()?;
        self.priors = priors;
        Ok(self)
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn priors(&self) -> &GevPriors {
        &self.priors
    }

    /// Gumbel method-of-moments starting point `[mu, sigma, 0]`.
    pub fn initial_position(&self) -> Array1<f64> {
        let (mean, std) = mean_and_std(&self.data);
        let sigma = (std * 6.0_f64.sqrt() / std::f64::consts::PI).max(1e-6);
        Array1::from(vec![mean - EULER_GAMMA * sigma, sigma, 0.0])
    }
}

impl LogDensity for GevPosterior {
    fn dim(&self) -> usize {
        3
    }

    fn param_names(&self) -> Vec<String> {
        vec!["mu".to_string(), "sigma".to_string(), "xi".to_string()]
    }

    fn logp_and_grad(&self, position: &Array1<f64>, grad: &mut Array1<f64>) -> f64 {
        let (mu, sigma, xi) = (position[0], position[1], position[2]);
        let (lp_mu, g_mu) = self.priors.mu.logp_and_grad(mu);
        let (lp_sigma, g_sigma) = self.priors.sigma.logp_and_grad(sigma);
        let (lp_xi, g_xi) = self.priors.xi.logp_and_grad(xi);
        let log_prior = lp_mu + lp_sigma + lp_xi;
        if !log_prior.is_finite() {
            return f64::NEG_INFINITY;
        }
        let Some((ll, [d_mu, d_sigma, d_xi])) = gev_loglik(&self.data, mu, sigma, xi) else {
            return f64::NEG_INFINITY;
        };
        grad[0] = d_mu + g_mu;
        grad[1] = d_sigma + g_sigma;
        grad[2] = d_xi + g_xi;
        ll + log_prior
    }
}

/// Priors for the GPD parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpdPriors {
    pub sigma: Prior,
    pub xi: Prior,
}

impl Default for GpdPriors {
    fn default() -> Self {
        Self {
            sigma: Prior::Flat,
            xi: Prior::Normal { mean: 0.0, sd: 0.5 },
        }
    }
}

/// Posterior of GPD parameters given exceedances over a threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct GpdPosterior {
    exceedances: Vec<f64>,
    priors: GpdPriors,
}

impl GpdPosterior {
    /// `exceedances[i] = x[i] - threshold`, all strictly positive.
    pub fn new(exceedances: Vec<f64>) -> Result<Self> {
        validate_data("exceedances", &exceedances)?;
        if exceedances.iter().any(|&y| y <= 0.0) {
            return Err(SamplerError::Model(
                "exceedances must be strictly positive".to_string(),
            ));
        }
        Ok(Self {
            exceedances,
            priors: GpdPriors::default(),
        })
    }

    pub fn from_peaks(peaks: &PeaksOverThreshold) -> Result<Self> {
        Self::new(peaks.exceedances.clone())
    }

    pub fn with_priors(mut self, priors: GpdPriors) -> Result<Self> {
        priors.sigma.validate()?;
        priors.xi.validate()?;
        self.priors = priors;
        Ok(self)
    }

    pub fn exceedances(&self) -> &[f64] {
        &self.exceedances
    }

    /// Exponential starting point `[mean excess, 0]`.
    pub fn initial_position(&self) -> Array1<f64> {
        let (mean, _) = mean_and_std(&self.exceedances);
        Array1::from(vec![mean.max(1e-6), 0.0])
    }
}

impl LogDensity for GpdPosterior {
    fn dim(&self) -> usize {
        2
    }

    fn param_names(&self) -> Vec<String> {
        vec!["sigma".to_string(), "xi".to_string()]
    }

    fn logp_and_grad(&self, position: &Array1<f64>, grad: &mut Array1<f64>) -> f64 {
        let (sigma, xi) = (position[0], position[1]);
        let (lp_sigma, g_sigma) = self.priors.sigma.logp_and_grad(sigma);
        let (lp_xi, g_xi) = self.priors.xi.logp_and_grad(xi);
        let log_prior = lp_sigma + lp_xi;
        if !log_prior.is_finite() {
            return f64::NEG_INFINITY;
        }
        let Some((ll, [d_sigma, d_xi])) = gpd_loglik(&self.exceedances, sigma, xi) else {
            return f64::NEG_INFINITY;
        };
        grad[0] = d_sigma + g_sigma;
        grad[1] = d_xi + g_xi;
        ll + log_prior
    }
}

/// Posterior draws of the GEV `period`-block return level, one per trace iteration.
pub fn gev_return_level_draws(trace: &Trace, period: f64) -> Result<Array1<f64>> {
    let draws = trace.draws();
    if draws.ncols() != 3 {
        return Err(SamplerError::Dimension {
            expected: 3,
            got: draws.ncols(),
        });
    }
    draws
        .rows()
        .into_iter()
        .map(|row| gev_return_level(&[row[0], row[1], row[2]], period))
        .collect::<Result<Vec<f64>>>()
        .map(Array1::from)
}

/// Posterior draws of the GPD return level, one per trace iteration.
pub fn gpd_return_level_draws(
    trace: &Trace,
    peaks: &PeaksOverThreshold,
    period: f64,
) -> Result<Array1<f64>> {
    let draws = trace.draws();
    if draws.ncols() != 2 {
        return Err(SamplerError::Dimension {
            expected: 2,
            got: draws.ncols(),
        });
    }
    draws
        .rows()
        .into_iter()
        .map(|row| gpd_return_level(&[row[0], row[1]], peaks.threshold, peaks.rate, period))
        .collect::<Result<Vec<f64>>>()
        .map(Array1::from)
}
