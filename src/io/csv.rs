/*!
# Saving posterior draws to CSV

Enable via the `csv` feature (on by default).
*/

use crate::chains::MultiChainTrace;
use crate::error::Result;
use crate::trace::Trace;
use csv::Writer;
use ndarray::{Array3, Axis};
use std::fmt::Display;
use std::fs::File;
use std::path::Path;

fn column_names(names: &[String], n_dims: usize) -> impl Iterator<Item = String> + '_ {
    (0..n_dims).map(move |i| names.get(i).cloned().unwrap_or_else(|| format!("dim_{i}")))
}

/**
Saves a **chain × iteration × parameter** array as a CSV file.

The header row is `chain`, `iteration` and one column per parameter, named after `names`
(falling back to `dim_<i>` for parameters without a name). Each following row is one draw of
one chain.

# Examples

```rust
use extreme_hmc::io::csv::save_csv;
use ndarray::arr3;

let data = arr3(&[[[1.0, 2.0], [3.0, 4.0]]]);
let path = std::env::temp_dir().join("extreme_hmc_doc_draws.csv");
save_csv(&data, &["mu".to_string(), "sigma".to_string()], &path)?;
# Ok::<(), extreme_hmc::error::SamplerError>(())
```
*/
pub fn save_csv<T: Display>(
    data: &Array3<T>,
    names: &[String],
    path: impl AsRef<Path>,
) -> Result<()> {
    let mut wtr = Writer::from_writer(File::create(path)?);
    let n_dims = data.shape()[2];

    let mut header = vec!["chain".to_string(), "iteration".to_string()];
    header.extend(column_names(names, n_dims));
    wtr.write_record(&header)?;

    for (chain_idx, chain) in data.axis_iter(Axis(0)).enumerate() {
        for (iter_idx, draw) in chain.axis_iter(Axis(0)).enumerate() {
            let mut row = vec![chain_idx.to_string(), iter_idx.to_string()];
            row.extend(draw.iter().map(|v| v.to_string()));
            wtr.write_record(&row)?;
        }
    }

    wtr.flush()?;
    Ok(())
}

/// Saves the draws of every chain of a multi-chain run.
pub fn save_chains_csv(chains: &MultiChainTrace, path: impl AsRef<Path>) -> Result<()> {
    save_csv(&chains.sample(), chains.param_names(), path)
}

/// Saves one chain's draws together with its per-iteration diagnostics.
///
/// Columns: `iteration`, one per parameter, then `accept_prob`, `accepted`, `divergent`,
/// `n_leapfrog`, `energy` and `step_size`.
pub fn save_trace_csv(trace: &Trace, path: impl AsRef<Path>) -> Result<()> {
    let mut wtr = Writer::from_writer(File::create(path)?);

    let mut header = vec!["iteration".to_string()];
    header.extend(column_names(trace.param_names(), trace.dim()));
    header.extend(
        ["accept_prob", "accepted", "divergent", "n_leapfrog", "energy", "step_size"]
            .map(String::from),
    );
    wtr.write_record(&header)?;

    for (i, (draw, stats)) in trace
        .draws()
        .rows()
        .into_iter()
        .zip(trace.transitions())
        .enumerate()
    {
        let mut row = vec![i.to_string()];
        row.extend(draw.iter().map(|v| v.to_string()));
        row.extend([
            stats.accept_prob.to_string(),
            u8::from(stats.accepted).to_string(),
            u8::from(stats.is_divergent()).to_string(),
            stats.n_leapfrog.to_string(),
            stats.energy.to_string(),
            stats.step_size.to_string(),
        ]);
        wtr.write_record(&row)?;
    }

    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HmcConfig;
    use crate::distributions::IsotropicGaussian;
    use crate::sampler::HmcSampler;
    use csv::Reader;
    use ndarray::{arr1, arr3};
    use std::fs;
    use tempfile::NamedTempFile;

    #[test]
    fn save_csv_empty_data() {
        let data = Array3::<f64>::zeros((0, 0, 0));
        let file = NamedTempFile::new().expect("Could not create temp file");

        save_csv(&data, &[], file.path()).unwrap();
        let contents = fs::read_to_string(file.path()).unwrap();
        assert_eq!(contents.trim(), "chain,iteration");
    }

    #[test]
    fn save_csv_multi_chain() {
        let data = arr3(&[[[1, 2], [3, 4]], [[10, 20], [30, 40]]]);
        let file = NamedTempFile::new().expect("Could not create temp file");

        save_csv(&data, &["mu".to_string()], file.path()).unwrap();
        let contents = fs::read_to_string(file.path()).unwrap();
        let expected = "\
chain,iteration,mu,dim_1
0,0,1,2
0,1,3,4
1,0,10,20
1,1,30,40";
        assert_eq!(contents.trim(), expected);
    }

    #[test]
    fn save_trace_with_diagnostics() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let config = HmcConfig::default()
            .with_warmup_iterations(50)
            .with_sampling_iterations(20);
        let trace = HmcSampler::new(IsotropicGaussian::new(2), arr1(&[0.0, 0.0]), config)?
            .set_seed(4)
            .run()?;
        let file = NamedTempFile::new()?;
        save_trace_csv(&trace, file.path())?;

        let mut rdr = Reader::from_path(file.path())?;
        let headers = rdr.headers()?.clone();
        assert_eq!(&headers[0], "iteration");
        assert_eq!(&headers[1], "theta[0]");
        assert_eq!(&headers[3], "accept_prob");
        assert_eq!(headers.len(), 9);

        let records: Vec<csv::StringRecord> = rdr.records().collect::<std::result::Result<_, _>>()?;
        assert_eq!(records.len(), 20);
        for (record, draw) in records.iter().zip(trace.draws().rows()) {
            let x0: f64 = record[1].parse()?;
            assert_eq!(x0, draw[0]);
            let accept_prob: f64 = record[3].parse()?;
            assert!((0.0..=1.0).contains(&accept_prob));
        }
        Ok(())
    }
}
