//! Computation and tracking of MCMC statistics like acceptance probability, effective sample
//! size and Potential Scale Reduction.

use core::fmt;
use ndarray::{concatenate, prelude::*, Zip};
use num_traits::ToPrimitive;
use rayon::prelude::*;
use rustfft::{num_complex::Complex, FftPlanner};

const ALPHA: f64 = 0.01;

/// Tracks running statistics of a single chain for progress reporting.
///
/// # Fields
/// - `n_params`: Number of parameters in the chain.
/// - `n`: Number of iterations seen.
/// - `p_accept`: Exponential moving average of the acceptance probability.
/// - `mean`: Mean of the parameters.
/// - `mean_sq`: Mean of the squared parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainTracker {
    n_params: usize,
    n: u64,
    p_accept: f64,
    mean: Array1<f64>,    // n_params
    mean_sq: Array1<f64>, // n_params
}

/// Snapshot of a [`ChainTracker`].
///
/// # Fields
/// - `n`: Number of iterations seen.
/// - `p_accept`: Smoothed acceptance probability.
/// - `mean`: Mean of the parameters.
/// - `sm2`: Variance of the parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainStats {
    pub n: u64,
    pub p_accept: f64,
    pub mean: Array1<f64>, // n_params
    pub sm2: Array1<f64>,  // n_params
}

impl ChainTracker {
    pub fn new(n_params: usize) -> Self {
        Self {
            n_params,
            n: 0,
            p_accept: -1.0,
            mean: Array1::zeros(n_params),
            mean_sq: Array1::zeros(n_params),
        }
    }

    /// Records one iteration: the chain's position after the transition and the
    /// transition's acceptance probability.
    pub fn step(&mut self, x: &Array1<f64>, accept_prob: f64) {
        debug_assert_eq!(x.len(), self.n_params);
        self.n += 1;
        let n = self.n as f64;

        Zip::from(&mut self.mean)
            .and(&mut self.mean_sq)
            .and(x)
            .for_each(|m, m2, &xi| {
                *m += (xi - *m) / n;
                *m2 += (xi * xi - *m2) / n;
            });

        // The first observation seeds the moving average.
        self.p_accept = if self.p_accept >= 0.0 {
            (1.0 - ALPHA) * self.p_accept + ALPHA * accept_prob
        } else {
            accept_prob
        };
    }

    /// Current snapshot. The variance is NaN until two iterations have been seen.
    pub fn stats(&self) -> ChainStats {
        let sm2 = if self.n < 2 {
            Array1::from_elem(self.n_params, f64::NAN)
        } else {
            let n = self.n as f64;
            (&self.mean_sq - &self.mean.pow2()) * n / (n - 1.0)
        };
        ChainStats {
            n: self.n,
            p_accept: self.p_accept,
            mean: self.mean.clone(),
            sm2,
        }
    }
}

/// Computes the Potential Scale Reduction Factor (R-hat) from running chain statistics.
///
/// Returns NaN entries when fewer than two chains are given.
pub fn collect_rhat(chain_stats: &[&ChainStats]) -> Array1<f64> {
    let Some(first) = chain_stats.first() else {
        return Array1::zeros(0);
    };
    let m = chain_stats.len() as f64;
    let p = first.mean.len();
    let n = chain_stats.iter().map(|x| x.n as f64).sum::<f64>() / m;

    let mut within = Array1::<f64>::zeros(p);
    let mut global_mean = Array1::<f64>::zeros(p);
    for cs in chain_stats {
        within += &cs.sm2;
        global_mean += &cs.mean;
    }
    within /= m;
    global_mean /= m;

    let mut between = Array1::<f64>::zeros(p);
    for cs in chain_stats {
        between += &(&cs.mean - &global_mean).pow2();
    }
    between /= m - 1.0;

    let var = between + &within * ((n - 1.0) / n);
    (var / within).sqrt()
}

/// Computes basic statistics (min, median, max, mean, standard deviation) of `data`.
///
/// NaN entries sort last; an empty input yields NaN everywhere.
pub fn basic_stats(name: &str, data: Array1<f64>) -> BasicStats {
    let mut sorted = data.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let (min, median, max) = match (sorted.first(), sorted.last()) {
        (Some(&min), Some(&max)) => (min, sorted[sorted.len() / 2], max),
        _ => (f64::NAN, f64::NAN, f64::NAN),
    };
    let mean = data.mean().unwrap_or(f64::NAN);
    let std = if data.len() > 1 { data.std(1.0) } else { f64::NAN };
    BasicStats {
        name: name.to_string(),
        min,
        median,
        max,
        mean,
        std,
    }
}

/// Convergence diagnostics across chains.
#[derive(Clone, Debug, PartialEq, PartialOrd)]
pub struct RunStats {
    pub ess: BasicStats,
    pub rhat: BasicStats,
}

impl fmt::Display for RunStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\n{}", self.ess, self.rhat)
    }
}

impl<T> From<ArrayView3<'_, T>> for RunStats
where
    T: ToPrimitive + Clone,
{
    fn from(sample: ArrayView3<T>) -> Self {
        let (rhat, ess) = split_rhat_mean_ess(sample);
        let ess = basic_stats("ESS", ess);
        let rhat = basic_stats("Split R-hat", rhat);
        RunStats { ess, rhat }
    }
}

#[derive(Clone, Debug, PartialEq, PartialOrd)]
pub struct BasicStats {
    pub name: String,
    pub min: f64,
    pub median: f64,
    pub max: f64,
    pub mean: f64,
    pub std: f64,
}

impl fmt::Display for BasicStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} in [{:.2}, {:.2}], median: {:.2}, mean: {:.2} ± {:.2}",
            self.name, self.min, self.max, self.median, self.mean, self.std
        )
    }
}

/// Takes a (chains, observations, parameters) view and returns a new
/// (2*chains, observations/2, parameters) array by splitting each chain in half.
/// With an odd number of observations the middle one is dropped.
fn splitcat(sample: ArrayView3<f64>) -> Array3<f64> {
    let n = sample.shape()[1];
    let half = n / 2;
    let first = sample.slice(s![.., ..half, ..]);
    let second = sample.slice(s![.., n - half.., ..]);
    // Both halves share every axis length except the first.
    concatenate(Axis(0), &[first, second]).unwrap_or_else(|_| Array3::zeros((0, half, 0)))
}

/// Computes both split-R-hat and ESS following Stan's methodology.
///
/// # Arguments
/// - `sample`: 3D array of observations with shape (chains, observations, parameters).
///
/// # Returns
/// A tuple of per-parameter split-R-hat values and per-parameter ESS values. Both are NaN
/// when there are fewer than four observations per chain.
///
/// # References
/// - Stan Reference Manual, sections on R-hat and Effective Sample Size
pub fn split_rhat_mean_ess<T>(sample: ArrayView3<T>) -> (Array1<f64>, Array1<f64>)
where
    T: ToPrimitive + Clone,
{
    let sample = sample.mapv(|x| x.to_f64().unwrap_or(f64::NAN));
    let n_params = sample.shape()[2];
    if sample.shape()[1] < 4 || sample.shape()[0] == 0 {
        return (
            Array1::from_elem(n_params, f64::NAN),
            Array1::from_elem(n_params, f64::NAN),
        );
    }
    let splitted = splitcat(sample.view()); // shape: (2c, n/2, p)
    let (within, var) = withinvar(splitted.view());
    (
        rhat(within.view(), var.view()),
        ess(splitted.view(), within.view(), var.view()),
    )
}

/// Per-parameter ESS of a single chain of shape (observations, parameters), without splitting.
pub fn ess_single_chain(sample: ArrayView2<f64>) -> Array1<f64> {
    let (n, p) = sample.dim();
    if n < 4 {
        return Array1::from_elem(p, f64::NAN);
    }
    let sample3 = sample.insert_axis(Axis(0));
    let (within, _) = withinvar(sample3);
    // With one chain the between-chain term vanishes, so the autocorrelation is
    // normalized by the within-chain variance alone.
    ess(sample3, within.view(), within.view())
}

fn rhat(within: ArrayView1<f64>, var: ArrayView1<f64>) -> Array1<f64> {
    (var.to_owned() / within).sqrt()
}

fn withinvar(sample: ArrayView3<f64>) -> (Array1<f64>, Array1<f64>) {
    let c = sample.shape()[0];
    let n = sample.shape()[1] as f64;
    let p = sample.shape()[2];

    let (within, var): (Vec<f64>, Vec<f64>) = (0..p)
        .into_par_iter()
        .map(|param_idx| {
            let data_p = sample.slice(s![.., .., param_idx]);
            let chain_means: Array1<f64> = data_p
                .rows()
                .into_iter()
                .map(|row| row.sum() / n)
                .collect();
            let overall_mean = chain_means.sum() / c as f64;

            // Between-chain variance, n / (c - 1) * sum (chain_mean - overall_mean)^2.
            let b = if c > 1 {
                (&chain_means - overall_mean).pow2().sum() * n / (c - 1) as f64
            } else {
                0.0
            };

            let w = data_p
                .rows()
                .into_iter()
                .zip(chain_means.iter())
                .map(|(row, &cm)| row.iter().map(|v| (v - cm) * (v - cm)).sum::<f64>() / n)
                .sum::<f64>()
                / c as f64;
            let v = ((n - 1.0) / n) * w + b / n;
            (w, v)
        })
        .unzip();
    (Array1::from_vec(within), Array1::from_vec(var))
}

/// Computes the Effective Sample Size (ESS) for each parameter.
///
/// Autocorrelations are combined across chains and truncated with Geyer's initial
/// monotone sequence estimator.
///
/// # References
/// - Stan Reference Manual, section on Effective Sample Size
///   (https://mc-stan.org/docs/2_18/reference-manual/effective-sample-size-section.html)
fn ess(sample: ArrayView3<f64>, within: ArrayView1<f64>, var: ArrayView1<f64>) -> Array1<f64> {
    let (n_chains, n_steps, n_params) = sample.dim();
    let mut avg_acov = Array2::<f64>::zeros((n_steps, n_params));
    for c in 0..n_chains {
        avg_acov += &autocov(sample.index_axis(Axis(0), c));
    }
    avg_acov /= n_chains as f64;

    let tau: Vec<f64> = (0..n_params)
        .into_par_iter()
        .map(|d| {
            let rho_d: Array1<f64> = avg_acov
                .column(d)
                .mapv(|acov| 1.0 - (within[d] - acov) / var[d]);
            if rho_d.iter().any(|r| !r.is_finite()) {
                return f64::NAN;
            }

            let mut min = if rho_d.len() >= 2 {
                rho_d[0] + rho_d[1]
            } else {
                0.0
            };

            let mut out = 0.0;
            for rho_t in rho_d.windows_with_stride(2, 2) {
                let mut p_t = rho_t[0] + rho_t[1];
                if p_t <= 0.0 {
                    break;
                }
                if p_t > min {
                    p_t = min;
                }
                min = p_t;
                out += p_t;
            }
            -1.0 + 2.0 * out
        })
        .collect();
    Array1::from_vec(tau).recip() * n_chains as f64 * n_steps as f64
}

fn autocov(sample: ArrayView2<f64>) -> Array2<f64> {
    if sample.nrows() <= 100 {
        autocov_bf(sample)
    } else {
        autocov_fft(sample)
    }
}

/// Autocovariance of each column of an `(n, d)` array using FFT.
///
/// Zero-pads to the next power of two at or above `2n - 1` to avoid wrap-around, and
/// normalizes explicitly since `rustfft` leaves transforms unscaled. Columns are processed
/// in parallel.
fn autocov_fft(sample: ArrayView2<f64>) -> Array2<f64> {
    let (n, d) = sample.dim();
    let mut planner = FftPlanner::new();
    let n_padded = (2 * n - 1).next_power_of_two();
    let fft = planner.plan_fft_forward(n_padded);
    let ffti = planner.plan_fft_inverse(n_padded);

    let mut out = Array2::<f64>::zeros((n, d));
    out.axis_iter_mut(Axis(1))
        .into_par_iter()
        .zip(sample.axis_iter(Axis(1)).into_par_iter())
        .for_each(|(mut out_col, traj)| {
            let traj_mean = traj.sum() / n as f64;
            let mut x: Vec<Complex<f64>> = traj
                .iter()
                .map(|xi| Complex::new(xi - traj_mean, 0.0))
                .chain(std::iter::repeat(Complex::new(0.0, 0.0)).take(n_padded - n))
                .collect();
            fft.process(&mut x);
            x.iter_mut().for_each(|xi| *xi *= xi.conj());
            ffti.process(&mut x);
            out_col
                .iter_mut()
                .zip(x.iter())
                .for_each(|(o, xi)| *o = xi.re / n_padded as f64 / n as f64);
        });
    out
}

/// Brute force autocovariance of each column of an `(n, d)` array:
/// `out[lag, col] = 1/n * sum_{t < n - lag} (x[t] - x̄)(x[t + lag] - x̄)`.
fn autocov_bf(data: ArrayView2<f64>) -> Array2<f64> {
    let (n, d) = data.dim();
    let mut out = Array2::<f64>::zeros((n, d));

    out.axis_iter_mut(Axis(1))
        .into_par_iter()
        .enumerate()
        .for_each(|(col_idx, mut out_col)| {
            let col = data.column(col_idx);
            let mean = col.sum() / n as f64;
            let centered = col.mapv(|x| x - mean);
            for lag in 0..n {
                let sum_lag: f64 = (0..n - lag).map(|t| centered[t] * centered[t + lag]).sum();
                out_col[lag] = sum_lag / n as f64;
            }
        });
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};
    use rand_distr::StandardNormal;

    fn run_test_case(
        autocov_func: &dyn Fn(ArrayView2<f64>) -> Array2<f64>,
        data: &Array2<f64>,
        expected: &Array2<f64>,
    ) {
        let result = autocov_func(data.view());
        assert_eq!(result.dim(), expected.dim());
        assert_abs_diff_eq!(result, *expected, epsilon = 1e-9);
    }

    #[test]
    fn autocov_single_param() {
        let data = array![[1.0], [2.0], [3.0], [4.0]];
        let expected = array![[1.25], [0.3125], [-0.375], [-0.5625]];
        run_test_case(&autocov_bf, &data, &expected);
        run_test_case(&autocov_fft, &data, &expected);
    }

    #[test]
    fn autocov_two_params() {
        let data = array![[1.0, 0.3], [2.0, 2.0], [3.0, -2.0], [4.0, 5.0]];
        let expected = array![
            [1.25, 6.516875],
            [0.3125, -3.78890625],
            [-0.375, 1.4721875],
            [-0.5625, -0.94171875],
        ];
        run_test_case(&autocov_bf, &data, &expected);
        run_test_case(&autocov_fft, &data, &expected);
    }

    #[test]
    fn autocov_fft_matches_brute_force_on_long_series() {
        let mut rng = SmallRng::seed_from_u64(3);
        let data = Array2::from_shape_fn((300, 2), |_| rng.random::<f64>());
        let bf = autocov_bf(data.view());
        let fft = autocov_fft(data.view());
        assert_abs_diff_eq!(bf, fft, epsilon = 1e-10);
    }

    #[test]
    fn chain_tracker_rhat() {
        let steps = [
            arr2(&[[0.0, 1.0], [1.0, 2.0], [0.0, 0.0]]),
            arr2(&[[1.0, 2.0], [1.0, 1.0], [0.0, 1.0]]),
            arr2(&[[2.0, 0.0], [0.0, 1.0], [1.0, 2.0]]),
        ];
        let mut trackers: Vec<ChainTracker> = (0..3).map(|_| ChainTracker::new(2)).collect();
        for step in &steps {
            for (tracker, row) in trackers.iter_mut().zip(step.rows()) {
                tracker.step(&row.to_owned(), 1.0);
            }
        }
        let stats: Vec<ChainStats> = trackers.iter().map(|t| t.stats()).collect();
        let refs: Vec<&ChainStats> = stats.iter().collect();
        let rhat = collect_rhat(&refs);

        // Parameter 0: chain means 1, 2/3, 1/3; within = 5/9; between = 1/9;
        // var = 1/9 + 5/9 * 2/3 = 13/27; rhat = sqrt(13/15).
        assert_abs_diff_eq!(rhat[0], (13.0_f64 / 15.0).sqrt(), epsilon = 1e-12);
        assert_eq!(stats[0].n, 3);
        assert_abs_diff_eq!(stats[0].p_accept, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn chain_tracker_single_step_has_undefined_variance() {
        let mut tracker = ChainTracker::new(2);
        assert!(tracker.stats().sm2.iter().all(|v| v.is_nan()));
        tracker.step(&arr1(&[1.0, -2.0]), 0.5);
        let stats = tracker.stats();
        assert_eq!(stats.n, 1);
        assert_eq!(stats.mean, arr1(&[1.0, -2.0]));
        assert!(stats.sm2.iter().all(|v| v.is_nan()));
        assert!(stats.sm2.iter().all(|v| !v.is_infinite()));

        tracker.step(&arr1(&[3.0, -2.0]), 0.5);
        assert_abs_diff_eq!(tracker.stats().sm2, arr1(&[2.0, 0.0]), epsilon = 1e-12);
    }

    #[test]
    fn independent_draws_have_full_ess() {
        let (m, n) = (4, 1000);
        let mut rng = SmallRng::seed_from_u64(42);
        let data = Array3::from_shape_fn((m, n, 1), |_| rng.random::<f64>());
        let run_stats = RunStats::from(data.view());

        assert!(run_stats.ess.min > 3500.0, "{run_stats}");
        assert!(run_stats.rhat.max < 1.01, "{run_stats}");
    }

    #[test]
    fn shifted_chains_have_large_rhat() {
        let mut rng = SmallRng::seed_from_u64(5);
        let data = Array3::from_shape_fn((2, 500, 1), |(c, _, _)| {
            rng.sample::<f64, _>(StandardNormal) + 3.0 * c as f64
        });
        let (rhat, _) = split_rhat_mean_ess(data.view());
        assert!(rhat[0] > 1.5, "rhat = {rhat}");
    }

    #[test]
    fn autocorrelated_chain_has_reduced_ess() {
        // AR(1) with coefficient 0.9: integrated autocorrelation time (1 + 0.9) / (1 - 0.9) = 19.
        let mut rng = SmallRng::seed_from_u64(11);
        let n = 20_000;
        let mut x = 0.0;
        let chain = Array2::from_shape_fn((n, 1), |_| {
            x = 0.9 * x + rng.sample::<f64, _>(StandardNormal);
            x
        });
        let ess = ess_single_chain(chain.view());
        let expected = n as f64 / 19.0;
        assert!(
            (ess[0] - expected).abs() < 0.3 * expected,
            "ess = {}, expected about {expected}",
            ess[0]
        );
    }

    #[test]
    fn short_chains_give_nan() {
        let data = Array3::<f64>::zeros((2, 3, 2));
        let (rhat, ess) = split_rhat_mean_ess(data.view());
        assert!(rhat.iter().all(|x| x.is_nan()));
        assert!(ess.iter().all(|x| x.is_nan()));
    }

    #[test]
    fn basic_stats_of_small_array() {
        let stats = basic_stats("x", arr1(&[3.0, 1.0, 2.0]));
        assert_eq!((stats.min, stats.median, stats.max), (1.0, 2.0, 3.0));
        assert_abs_diff_eq!(stats.mean, 2.0);
        assert_abs_diff_eq!(stats.std, 1.0);
        assert!(basic_stats("empty", Array1::zeros(0)).mean.is_nan());
    }
}
