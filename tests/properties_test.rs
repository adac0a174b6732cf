//! Property-based checks of the integrator and the Metropolis correction.

use extreme_hmc::config::HmcConfig;
use extreme_hmc::distributions::{Bounded, DiagGaussian};
use extreme_hmc::evt::GevPosterior;
use extreme_hmc::integrator::{leapfrog, Integration, PhasePoint};
use extreme_hmc::metric::Metric;
use extreme_hmc::sampler::HmcSampler;
use ndarray::{arr1, Array1};
use proptest::prelude::*;

fn diag_target() -> DiagGaussian {
    DiagGaussian::new(arr1(&[0.5, -1.0, 2.0]), arr1(&[1.0, 0.3, 4.0])).unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Integrating forward, flipping the momentum and integrating again returns to the start.
    #[test]
    fn leapfrog_is_reversible(
        q in prop::array::uniform3(-3.0f64..3.0),
        p in prop::array::uniform3(-2.0f64..2.0),
        inv_mass in prop::array::uniform3(0.2f64..5.0),
        step_size in 0.01f64..0.4,
        n_steps in 1usize..30,
    ) {
        let target = diag_target();
        let metric = Metric::diagonal(Array1::from(inv_mass.to_vec())).unwrap();
        let mut point = PhasePoint::new(&target, Array1::from(q.to_vec())).unwrap();
        point.momentum = Array1::from(p.to_vec());
        let start = point.clone();

        let forward = leapfrog(&target, &mut point, step_size, n_steps, &metric);
        prop_assert_eq!(forward, Integration::Completed { steps: n_steps });
        point.momentum.mapv_inplace(|m| -m);
        leapfrog(&target, &mut point, step_size, n_steps, &metric);
        point.momentum.mapv_inplace(|m| -m);

        for (a, b) in point.position.iter().zip(start.position.iter()) {
            prop_assert!((a - b).abs() < 1e-8, "position {} vs {}", a, b);
        }
        for (a, b) in point.momentum.iter().zip(start.momentum.iter()) {
            prop_assert!((a - b).abs() < 1e-8, "momentum {} vs {}", a, b);
        }
    }

    /// Whatever the step size and however often trajectories leave the support, every
    /// acceptance probability is a probability and divergent proposals are never taken.
    #[test]
    fn acceptance_probability_is_a_probability(
        step_size in 1e-3f64..5.0,
        n_steps in 1usize..20,
        x0 in -0.9f64..0.9,
        var in prop::array::uniform3(0.05f64..20.0),
        seed in any::<u64>(),
    ) {
        let gaussian = DiagGaussian::new(arr1(&[0.5, -1.0, 2.0]), Array1::from(var.to_vec())).unwrap();
        let target = Bounded::new(
            gaussian,
            arr1(&[-1.0, -2.0, -1.0]),
            arr1(&[1.0, 1.0, 3.0]),
        ).unwrap();
        let config = HmcConfig::default()
            .with_warmup_iterations(1)
            .with_mass_matrix_windows(vec![])
            .with_sampling_iterations(20)
            .with_trajectory_length(n_steps)
            .with_initial_step_size(step_size);
        let trace = HmcSampler::new(&target, arr1(&[x0, 0.0, 0.0]), config)
            .unwrap()
            .set_seed(seed)
            .run()
            .unwrap();

        for stats in trace.transitions() {
            prop_assert!((0.0..=1.0).contains(&stats.accept_prob));
            prop_assert!(!(stats.is_divergent() && stats.accepted));
        }
    }

    /// The GEV posterior never yields a draw with non-positive scale.
    #[test]
    fn gev_draws_keep_positive_scale(seed in any::<u64>()) {
        let data = vec![1.2, 0.4, 2.9, 1.7, 0.8, 3.5, 1.1, 2.2, 0.6, 1.9, 4.1, 1.4];
        let posterior = GevPosterior::new(data).unwrap();
        let init = posterior.initial_position();
        let config = HmcConfig::default()
            .with_warmup_iterations(100)
            .with_sampling_iterations(100);
        let trace = HmcSampler::new(&posterior, init, config)
            .unwrap()
            .set_seed(seed)
            .run()
            .unwrap();
        prop_assert!(trace.column(1).iter().all(|&sigma| sigma > 0.0));
    }
}
