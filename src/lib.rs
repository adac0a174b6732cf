//! # Extreme HMC
//!
//! Bayesian inference for **extreme value distributions** with **Hamiltonian Monte Carlo**.
//!
//! The crate pairs a fixed-trajectory HMC sampler (dual-averaging step size, windowed
//! mass-matrix adaptation, divergence detection) with posteriors for the two workhorse
//! models of extreme value analysis:
//!
//! - **GEV** (generalized extreme value) for block maxima, parameters `[mu, sigma, xi]`;
//! - **GPD** (generalized Pareto) for exceedances over a threshold, parameters `[sigma, xi]`.
//!
//! Any other posterior can be sampled by implementing [`density::LogDensity`].
//!
//! ## Getting Started
//!
//! ```bash
//! cargo add extreme-hmc
//! ```
//!
//! 1. Build a target: [`evt::GevPosterior`], [`evt::GpdPosterior`] or your own
//!    [`density::LogDensity`].
//! 2. Configure the run with [`config::HmcConfig`].
//! 3. Run one chain with [`sampler::HmcSampler`] or several in parallel with
//!    [`chains::run_chains`].
//! 4. Read draws and diagnostics off the returned [`trace::Trace`] /
//!    [`chains::MultiChainTrace`].
//!
//! ## Example 1: GEV fit to annual maxima
//!
//! ```rust
//! use extreme_hmc::config::HmcConfig;
//! use extreme_hmc::evt::{gev_return_level_draws, GevPosterior};
//! use extreme_hmc::sampler::HmcSampler;
//!
//! let maxima = vec![
//!     4.31, 4.52, 4.18, 4.77, 4.95, 4.40, 5.12, 4.63, 4.88, 5.41,
//!     4.59, 4.70, 5.03, 4.49, 4.84, 5.27, 4.66, 4.92, 4.55, 5.08,
//! ];
//! let posterior = GevPosterior::new(maxima).unwrap();
//! let init = posterior.initial_position();
//!
//! let config = HmcConfig::default()
//!     .with_warmup_iterations(500)
//!     .with_sampling_iterations(500);
//! let trace = HmcSampler::new(&posterior, init, config)
//!     .unwrap()
//!     .set_seed(42)
//!     .run()
//!     .unwrap();
//!
//! assert!(trace.column(1).iter().all(|&sigma| sigma > 0.0));
//! let level_50 = gev_return_level_draws(&trace, 50.0).unwrap();
//! println!("{}", trace.summary());
//! println!("50-year return level: {:.3}", level_50.mean().unwrap());
//! ```
//!
//! ## Example 2: Several chains on a custom target
//!
//! ```rust
//! use extreme_hmc::chains::run_chains;
//! use extreme_hmc::config::{HmcConfig, MultiChainConfig};
//! use extreme_hmc::density::LogDensity;
//! use ndarray::{arr1, Array1};
//!
//! /// Correlated 2-D Gaussian with precision [[2, -1], [-1, 2]].
//! struct Correlated;
//!
//! impl LogDensity for Correlated {
//!     fn dim(&self) -> usize {
//!         2
//!     }
//!
//!     fn logp_and_grad(&self, x: &Array1<f64>, grad: &mut Array1<f64>) -> f64 {
//!         grad[0] = -2.0 * x[0] + x[1];
//!         grad[1] = x[0] - 2.0 * x[1];
//!         -(x[0] * x[0] - x[0] * x[1] + x[1] * x[1])
//!     }
//! }
//!
//! let config = MultiChainConfig {
//!     n_chains: 4,
//!     seed: 7,
//!     hmc: HmcConfig::default()
//!         .with_warmup_iterations(300)
//!         .with_sampling_iterations(300),
//! };
//! let inits = vec![arr1(&[1.0, 1.0]), arr1(&[-1.0, 1.0]), arr1(&[1.0, -1.0]), arr1(&[0.0, 0.0])];
//! let result = run_chains(Correlated, &inits, &config).unwrap();
//! println!("{}", result.run_stats());
//! ```
//!
//! ## Logging
//!
//! The crate logs through the [`log`](https://docs.rs/log) facade: phase transitions and
//! mass-matrix updates at `debug`, skipped adaptation windows and excessive divergences at
//! `warn`, and a summary per finished chain at `info`. Install any logger to see them.
//!
//! ## Feature Flags
//!
//! - `csv` (default): save draws with [`io::csv`].

pub mod adapt;
pub mod chains;
pub mod config;
pub mod density;
pub mod distributions;
pub mod error;
pub mod evt;
pub mod integrator;
pub mod io;
pub mod metric;
pub mod sampler;
pub mod stats;
pub mod trace;

pub use config::{HmcConfig, MultiChainConfig, RunControl};
pub use density::LogDensity;
pub use error::{Result, SamplerError};
pub use sampler::HmcSampler;
pub use trace::Trace;
