use extreme_hmc::config::HmcConfig;
use extreme_hmc::density::LogDensity;
use extreme_hmc::sampler::HmcSampler;
use ndarray::{arr1, Array1};

/// The 2D Rosenbrock ("banana") distribution.
///
/// For a point x = (x₁, x₂) the log probability is
///
///   log p(x) = -(a - x₁)² / 20 - (x₂ - x₁²)² / 2
///
/// with a = 1, a mildly curved target that a fixed-trajectory sampler handles well.
struct Banana {
    a: f64,
}

impl LogDensity for Banana {
    fn dim(&self) -> usize {
        2
    }

    fn logp_and_grad(&self, x: &Array1<f64>, grad: &mut Array1<f64>) -> f64 {
        let bend = x[1] - x[0] * x[0];
        grad[0] = (self.a - x[0]) / 10.0 + 2.0 * x[0] * bend;
        grad[1] = -bend;
        -(self.a - x[0]).powi(2) / 20.0 - bend * bend / 2.0
    }
}

fn main() {
    let config = HmcConfig::default()
        .with_warmup_iterations(500)
        .with_sampling_iterations(2000)
        .with_trajectory_length(20);
    let sampler = HmcSampler::new(Banana { a: 1.0 }, arr1(&[0.0, 0.0]), config)
        .expect("the origin is a valid starting point")
        .set_seed(42);
    let trace = sampler.run().expect("sampling should succeed");

    println!("Collected sample with shape: {:?}", trace.draws().dim());
    println!("{}", trace.summary());
}
