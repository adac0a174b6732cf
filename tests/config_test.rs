//! Configuration parsing and validation as seen by a caller.

#[cfg(test)]
mod tests {
    use extreme_hmc::config::{HmcConfig, MultiChainConfig};
    use extreme_hmc::distributions::IsotropicGaussian;
    use extreme_hmc::error::SamplerError;
    use extreme_hmc::metric::MetricKind;
    use extreme_hmc::sampler::HmcSampler;
    use ndarray::{arr1, Array1};

    #[test]
    fn test_json_round_trip() {
        let config = HmcConfig::default()
            .with_warmup_iterations(400)
            .with_mass_matrix_windows(vec![50, 150, 350])
            .with_metric(MetricKind::Dense)
            .with_initial_step_size(0.25);
        let json = serde_json::to_string(&config).unwrap();
        let parsed: HmcConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let parsed: MultiChainConfig =
            serde_json::from_str(r#"{"n_chains": 2, "hmc": {"trajectory_length": 25}}"#).unwrap();
        assert_eq!(parsed.n_chains, 2);
        assert_eq!(parsed.seed, MultiChainConfig::default().seed);
        assert_eq!(parsed.hmc.trajectory_length, 25);
        assert_eq!(parsed.hmc.warmup_iterations, 1000);
        assert_eq!(parsed.hmc.target_acceptance, 0.8);
        assert!(parsed.validate().is_ok());
    }

    #[test]
    fn test_invalid_configs_are_rejected_before_sampling() {
        let bad = [
            HmcConfig::default().with_warmup_iterations(0),
            HmcConfig::default().with_target_acceptance(1.0),
            HmcConfig::default().with_trajectory_length(0),
            HmcConfig::default().with_sampling_iterations(0),
            HmcConfig::default().with_initial_step_size(-0.1),
            HmcConfig::default().with_step_size_jitter(1.0),
            HmcConfig::default().with_mass_matrix_windows(vec![100, 50]),
            HmcConfig::default()
                .with_warmup_iterations(100)
                .with_mass_matrix_windows(vec![50, 200]),
        ];
        for config in bad {
            let result = HmcSampler::new(IsotropicGaussian::new(2), arr1(&[0.0, 0.0]), config);
            assert!(matches!(result, Err(SamplerError::Config(_))));
        }
    }

    #[test]
    fn test_dimension_mismatch() {
        let result = HmcSampler::new(IsotropicGaussian::new(3), Array1::zeros(2), HmcConfig::default());
        assert!(matches!(
            result,
            Err(SamplerError::Dimension { expected: 3, got: 2 })
        ));
    }
}
