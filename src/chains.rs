/*!
Parallel multi-chain runs.

Each chain is an independent [`HmcSampler`] over a shared, read-only target (`Arc<T>`), seeded
with `seed + i + 1` (wrapping). Chains run in parallel with Rayon ([`run_chains`]) or on
scoped threads with a live progress display ([`run_chains_progress`]). Convergence diagnostics
(split R-hat and multi-chain ESS) are computed once all chains have returned.
*/

use crate::config::{MultiChainConfig, RunControl};
use crate::density::LogDensity;
use crate::error::{Result, SamplerError};
use crate::sampler::HmcSampler;
use crate::stats::{collect_rhat, ChainStats, ChainTracker, RunStats};
use crate::trace::Trace;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use ndarray::{Array1, Array2, Array3};
use ndarray_stats::QuantileExt;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use rayon::prelude::*;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Traces of several chains of the same target.
#[derive(Debug, Clone, PartialEq)]
pub struct MultiChainTrace {
    chains: Vec<Trace>,
    run_stats: RunStats,
}

impl MultiChainTrace {
    pub fn new(chains: Vec<Trace>) -> Self {
        let sample = stack_draws(&chains);
        let run_stats = RunStats::from(sample.view());
        Self { chains, run_stats }
    }

    pub fn chains(&self) -> &[Trace] {
        &self.chains
    }

    pub fn n_chains(&self) -> usize {
        self.chains.len()
    }

    pub fn param_names(&self) -> &[String] {
        self.chains
            .first()
            .map(|c| c.param_names())
            .unwrap_or_default()
    }

    /// Split R-hat and ESS across chains.
    pub fn run_stats(&self) -> &RunStats {
        &self.run_stats
    }

    /// Draws as a (chains × iterations × parameters) array, truncated to the shortest chain.
    pub fn sample(&self) -> Array3<f64> {
        stack_draws(&self.chains)
    }

    /// All chains' draws concatenated into one (draws × parameters) array.
    pub fn pooled_draws(&self) -> Array2<f64> {
        let dim = self.chains.first().map_or(0, |c| c.dim());
        let mut pooled = Array2::zeros((0, dim));
        for chain in &self.chains {
            for row in chain.draws().rows() {
                // Every chain of a run shares the target's dimension.
                if pooled.push_row(row).is_err() {
                    break;
                }
            }
        }
        pooled
    }

    /// Posterior mean over all chains.
    pub fn mean(&self) -> Array1<f64> {
        let pooled = self.pooled_draws();
        pooled
            .mean_axis(ndarray::Axis(0))
            .unwrap_or_else(|| Array1::from_elem(pooled.ncols(), f64::NAN))
    }

    pub fn divergence_count(&self) -> usize {
        self.chains.iter().map(Trace::divergence_count).sum()
    }

    pub fn stopped_early(&self) -> bool {
        self.chains.iter().any(Trace::stopped_early)
    }
}

fn stack_draws(chains: &[Trace]) -> Array3<f64> {
    let n = chains.iter().map(Trace::len).min().unwrap_or(0);
    let dim = chains.first().map_or(0, |c| c.dim());
    Array3::from_shape_fn((chains.len(), n, dim), |(c, t, d)| chains[c].draws()[[t, d]])
}

fn build_samplers<T>(
    target: T,
    initial_positions: &[Array1<f64>],
    config: &MultiChainConfig,
) -> Result<Vec<HmcSampler<Arc<T>>>>
where
    T: LogDensity,
{
    config.validate()?;
    if initial_positions.len() != config.n_chains {
        return Err(SamplerError::Config(format!(
            "expected {} initial positions, got {}",
            config.n_chains,
            initial_positions.len()
        )));
    }
    let target = Arc::new(target);
    initial_positions
        .iter()
        .enumerate()
        .map(|(i, init)| {
            HmcSampler::new(Arc::clone(&target), init.clone(), config.hmc.clone())
                .map(|s| s.set_seed(config.seed.wrapping_add(i as u64 + 1)))
        })
        .collect()
}

/// Maximum number of perturbations tried per chain before falling back to `center`.
const MAX_INIT_TRIES: usize = 100;

/// Generates `n` starting points by perturbing `center` with `scale`-sized standard normal
/// noise, deterministically from `seed`.
///
/// Perturbations that land outside the target's support are redrawn; a chain whose
/// perturbations all fail starts at `center` itself, which must be feasible.
pub fn jittered_inits<T>(
    target: &T,
    center: &Array1<f64>,
    n: usize,
    scale: f64,
    seed: u64,
) -> Result<Vec<Array1<f64>>>
where
    T: LogDensity,
{
    if center.len() != target.dim() {
        return Err(SamplerError::Dimension {
            expected: target.dim(),
            got: center.len(),
        });
    }
    if !target.is_in_domain(center) {
        return Err(SamplerError::InitialPosition(format!(
            "center {center} is outside the support of the target"
        )));
    }
    let mut rng = SmallRng::seed_from_u64(seed);
    Ok((0..n)
        .map(|_| {
            (0..MAX_INIT_TRIES)
                .map(|_| center.mapv(|c| c + scale * rng.sample::<f64, _>(StandardNormal)))
                .find(|candidate| target.is_in_domain(candidate))
                .unwrap_or_else(|| center.clone())
        })
        .collect())
}

/// Runs `config.n_chains` chains in parallel, one per initial position.
pub fn run_chains<T>(
    target: T,
    initial_positions: &[Array1<f64>],
    config: &MultiChainConfig,
) -> Result<MultiChainTrace>
where
    T: LogDensity + Send + Sync,
{
    run_chains_with(target, initial_positions, config, &RunControl::new())
}

/// Like [`run_chains`], stopping every chain when `control` says so.
pub fn run_chains_with<T>(
    target: T,
    initial_positions: &[Array1<f64>],
    config: &MultiChainConfig,
    control: &RunControl,
) -> Result<MultiChainTrace>
where
    T: LogDensity + Send + Sync,
{
    let samplers = build_samplers(target, initial_positions, config)?;
    let traces = samplers
        .into_par_iter()
        .map(|sampler| sampler.run_with(control))
        .collect::<Result<Vec<Trace>>>()?;
    let multi = MultiChainTrace::new(traces);
    log::info!("{} chains finished\n{}", multi.n_chains(), multi.run_stats());
    Ok(multi)
}

/// Runs the chains on scoped threads while displaying one progress bar per chain (at most
/// five at a time) and a global bar with the mean acceptance probability and the largest
/// running R-hat.
pub fn run_chains_progress<T>(
    target: T,
    initial_positions: &[Array1<f64>],
    config: &MultiChainConfig,
    control: &RunControl,
) -> Result<MultiChainTrace>
where
    T: LogDensity + Send + Sync,
{
    let samplers = build_samplers(target, initial_positions, config)?;
    let total = (config.hmc.warmup_iterations + config.hmc.sampling_iterations) as u64;

    let mut rxs: Vec<Receiver<ChainStats>> = vec![];
    let mut txs: Vec<Sender<ChainStats>> = vec![];
    (0..samplers.len()).for_each(|_| {
        let (tx, rx) = mpsc::channel();
        rxs.push(rx);
        txs.push(tx);
    });

    let progress_handle = thread::spawn(move || show_progress(rxs, total));

    let traces: Vec<Result<Trace>> = thread::scope(|s| {
        let handles: Vec<thread::ScopedJoinHandle<Result<Trace>>> = samplers
            .into_iter()
            .zip(txs)
            .map(|(sampler, tx)| s.spawn(move || run_reporting(sampler, control, tx)))
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap_or_else(|e| std::panic::resume_unwind(e)))
            .collect()
    });

    if let Err(e) = progress_handle.join() {
        log::warn!("progress display thread panicked: {e:?}");
    }

    let multi = MultiChainTrace::new(traces.into_iter().collect::<Result<Vec<Trace>>>()?);
    log::info!("{} chains finished\n{}", multi.n_chains(), multi.run_stats());
    Ok(multi)
}

/// Runs one chain, sending its running statistics at most once per second and once at the end.
/// Dropping `tx` on return tells the display thread that the chain is finished.
fn run_reporting<T: LogDensity>(
    sampler: HmcSampler<T>,
    control: &RunControl,
    tx: Sender<ChainStats>,
) -> Result<Trace> {
    let mut tracker = ChainTracker::new(sampler.position().len());
    let mut last = Instant::now();
    let freq = Duration::from_secs(1);

    let trace = sampler.run_observed(control, |position, stats| {
        tracker.step(position, stats.accept_prob);
        if last.elapsed() >= freq {
            // The display thread may already be gone; sampling goes on regardless.
            let _ = tx.send(tracker.stats());
            last = Instant::now();
        }
    });
    let _ = tx.send(tracker.stats());
    trace
}

fn show_progress(rxs: Vec<Receiver<ChainStats>>, total: u64) {
    let sleep = Duration::from_millis(250);
    let multi = MultiProgress::new();
    let pb_style = ProgressStyle::with_template(
        "{prefix:8} {bar:40.cyan/blue} {pos}/{len} ({eta}) | {msg}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("=>-");
    let new_bar = |len: u64, prefix: String| {
        let pb = multi.add(ProgressBar::new(len));
        pb.set_style(pb_style.clone());
        pb.set_prefix(prefix);
        pb
    };

    let global_pb = new_bar(rxs.len() as u64 * total, "Global".to_string());
    let mut active: Vec<(usize, ProgressBar)> = (0..rxs.len().min(5))
        .map(|i| (i, new_bar(total, format!("Chain {i}"))))
        .collect();
    let mut next_active = active.len();
    let mut most_recent: Vec<Option<ChainStats>> = vec![None; rxs.len()];
    let mut finished = vec![false; rxs.len()];

    loop {
        for (i, rx) in rxs.iter().enumerate() {
            loop {
                match rx.try_recv() {
                    Ok(stats) => most_recent[i] = Some(stats),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        finished[i] = true;
                        break;
                    }
                }
            }
        }

        let mut avg_p_accept = 0.0;
        let mut n_available = 0.0;
        for (i, pb) in &active {
            if let Some(stats) = &most_recent[*i] {
                pb.set_position(stats.n);
                pb.set_message(format!("p(accept)≈{:.2}", stats.p_accept));
                avg_p_accept += stats.p_accept;
                n_available += 1.0;
            }
        }
        if n_available > 0.0 {
            avg_p_accept /= n_available;
        }

        global_pb.set_position(most_recent.iter().flatten().map(|s| s.n).sum());
        let valid: Vec<&ChainStats> = most_recent.iter().flatten().collect();
        if valid.len() >= 2 {
            let rhats = collect_rhat(&valid);
            let max = rhats.max_skipnan();
            global_pb.set_message(format!(
                "p(accept)≈{avg_p_accept:.2} max(rhat)≈{max:.2}"
            ));
        }

        // Finished chains hand their bar over to the next chain waiting for one.
        let mut kept = Vec::with_capacity(active.len());
        for (i, pb) in active.drain(..) {
            if !finished[i] {
                kept.push((i, pb));
                continue;
            }
            pb.finish();
            if next_active < rxs.len() {
                kept.push((next_active, new_bar(total, format!("Chain {next_active}"))));
                next_active += 1;
            }
        }
        active = kept;

        if finished.iter().all(|&f| f) {
            global_pb.finish();
            break;
        }
        thread::sleep(sleep);
    }
}
