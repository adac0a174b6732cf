//! GEV and GPD fits to the extremes of a simulated weekly fuel price series.
//!
//! Weekly log-returns are drawn from a Student-t so that their tails are heavy, then the
//! quarterly maxima are fitted with a GEV posterior on four parallel chains and the
//! exceedances over the 95th percentile with a GPD posterior.

use extreme_hmc::chains::{jittered_inits, run_chains_progress};
use extreme_hmc::config::{HmcConfig, MultiChainConfig, RunControl};
use extreme_hmc::evt::{
    block_maxima, gev_return_level_draws, gpd_return_level_draws, peaks_over_threshold,
    GevPosterior, GpdPosterior,
};
use extreme_hmc::sampler::HmcSampler;
use extreme_hmc::stats::basic_stats;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use rand_distr::{Distribution, StudentT};
use std::error::Error;
use std::time::Duration;

const WEEKS_PER_QUARTER: usize = 13;
const N_QUARTERS: usize = 80;

/// Weekly log-returns of a fuel price, in percent.
fn simulated_weekly_returns(seed: u64) -> Result<Vec<f64>, Box<dyn Error>> {
    let mut rng = SmallRng::seed_from_u64(seed);
    let t = StudentT::<f64>::new(4.0)?;
    Ok((0..WEEKS_PER_QUARTER * N_QUARTERS)
        .map(|_| 1.5 * t.sample(&mut rng))
        .collect())
}

fn main() -> Result<(), Box<dyn Error>> {
    let returns = simulated_weekly_returns(2024)?;

    // Quarterly maxima with a GEV posterior.
    let maxima = block_maxima(&returns, WEEKS_PER_QUARTER)?;
    let gev = GevPosterior::new(maxima)?;
    let center = gev.initial_position();
    let config = MultiChainConfig {
        n_chains: 4,
        seed: 42,
        hmc: HmcConfig::default()
            .with_warmup_iterations(500)
            .with_sampling_iterations(1000),
    };
    let inits = jittered_inits(&gev, &center, config.n_chains, 0.05, config.seed)?;
    let control = RunControl::new().with_time_budget(Duration::from_secs(120));
    let result = run_chains_progress(gev, &inits, &config, &control)?;

    println!("GEV fit to {N_QUARTERS} quarterly maxima");
    println!("{}", result.run_stats());
    println!("{}", result.chains()[0].summary());
    let levels = gev_return_level_draws(&result.chains()[0], 40.0)?;
    println!("{}", basic_stats("10-year level (%)", levels));

    #[cfg(feature = "csv")]
    {
        let path = std::env::temp_dir().join("gev_fuel_maxima.csv");
        extreme_hmc::io::csv::save_chains_csv(&result, &path)?;
        println!("draws written to {}", path.display());
    }

    // Exceedances over the 95th percentile with a GPD posterior.
    let mut sorted = returns.clone();
    sorted.sort_by(f64::total_cmp);
    let threshold = sorted[(0.95 * sorted.len() as f64) as usize];
    let peaks = peaks_over_threshold(&returns, threshold)?;
    let gpd = GpdPosterior::from_peaks(&peaks)?;
    let init = gpd.initial_position();
    let trace = HmcSampler::new(&gpd, init, config.hmc.clone())?
        .set_seed(7)
        .run()?;

    println!(
        "GPD fit to {} exceedances over {threshold:.2}%",
        peaks.exceedances.len()
    );
    println!("{}", trace.summary());
    // 520 weeks is ten years of weekly observations.
    let levels = gpd_return_level_draws(&trace, &peaks, 520.0)?;
    println!("{}", basic_stats("10-year level (%)", levels));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::main;

    #[test]
    fn test_main() {
        main().unwrap();
    }
}
