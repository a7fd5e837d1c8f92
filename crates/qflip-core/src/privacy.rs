//! Differential-privacy noise for aggregate counts
//!
//! Counts are perturbed with Laplace noise of scale `sensitivity / epsilon`
//! (sensitivity 1: one user's trial moves a count by at most one), sampled
//! with the inverse-CDF method, then rounded and clamped at zero.

use rand::Rng;

use crate::error::{CoreError, Result};

/// Sensitivity of a heads/tails count
pub const COUNT_SENSITIVITY: f64 = 1.0;

/// Epsilon used when none is configured
pub const DEFAULT_EPSILON: f64 = 0.1;

/// Largest |u| fed to the inverse CDF; keeps `ln(1 - 2|u|)` finite
const MAX_ABS_UNIFORM: f64 = 0.5 - f64::EPSILON;

/// Adds calibrated Laplace noise to non-negative counts
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrivacyNoiseInjector {
    epsilon: f64,
}

impl PrivacyNoiseInjector {
    pub fn new(epsilon: f64) -> Result<Self> {
        if !epsilon.is_finite() || epsilon <= 0.0 {
            return Err(CoreError::InvalidEpsilon(epsilon));
        }
        Ok(Self { epsilon })
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    /// Budget reported alongside a noised aggregate
    pub fn privacy_budget_used(&self) -> f64 {
        self.epsilon.clamp(0.0, 1.0)
    }

    /// Noise `value` using the thread RNG
    pub fn add_noise(&self, value: u64) -> u64 {
        self.add_noise_with(value, &mut rand::thread_rng())
    }

    pub fn add_noise_with<R: Rng + ?Sized>(&self, value: u64, rng: &mut R) -> u64 {
        add_noise(value, self.epsilon, rng)
    }
}

impl Default for PrivacyNoiseInjector {
    fn default() -> Self {
        Self {
            epsilon: DEFAULT_EPSILON,
        }
    }
}

/// `max(0, round(value + Laplace(1/epsilon)))`. `epsilon` must be positive.
pub fn add_noise<R: Rng + ?Sized>(value: u64, epsilon: f64, rng: &mut R) -> u64 {
    let scale = COUNT_SENSITIVITY / epsilon;
    let noised = (value as f64 + laplace_noise(scale, rng)).round();
    if noised <= 0.0 {
        0
    } else {
        noised as u64
    }
}

/// Draw from Laplace(0, scale)
pub fn laplace_noise<R: Rng + ?Sized>(scale: f64, rng: &mut R) -> f64 {
    let u = (rng.gen::<f64>() - 0.5).clamp(-MAX_ABS_UNIFORM, MAX_ABS_UNIFORM);
    -scale * u.signum() * (1.0 - 2.0 * u.abs()).ln()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    /// RNG stuck at one value, for exercising the domain boundary
    struct FixedRng(u64);

    impl rand::RngCore for FixedRng {
        fn next_u32(&mut self) -> u32 {
            self.0 as u32
        }
        fn next_u64(&mut self) -> u64 {
            self.0
        }
        fn fill_bytes(&mut self, dest: &mut [u8]) {
            dest.fill(self.0 as u8);
        }
        fn try_fill_bytes(&mut self, dest: &mut [u8]) -> std::result::Result<(), rand::Error> {
            self.fill_bytes(dest);
            Ok(())
        }
    }

    fn sample_variance(samples: &[f64]) -> f64 {
        let n = samples.len() as f64;
        let mean = samples.iter().sum::<f64>() / n;
        samples.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / (n - 1.0)
    }

    #[test]
    fn test_rejects_invalid_epsilon() {
        assert!(PrivacyNoiseInjector::new(0.0).is_err());
        assert!(PrivacyNoiseInjector::new(-1.0).is_err());
        assert!(PrivacyNoiseInjector::new(f64::NAN).is_err());
        assert!(PrivacyNoiseInjector::new(f64::INFINITY).is_err());
        assert!(PrivacyNoiseInjector::new(0.5).is_ok());
    }

    #[test]
    fn test_boundary_draw_is_finite() {
        // A zero draw maps to u = -0.5, where the unclamped CDF is ln(0).
        let noise = laplace_noise(10.0, &mut FixedRng(0));
        assert!(noise.is_finite());
        assert!(noise < 0.0);
    }

    #[test]
    fn test_large_epsilon_converges_to_value() {
        let mut rng = StdRng::seed_from_u64(7);
        for value in [0u64, 1, 50, 10_000] {
            for _ in 0..100 {
                assert_eq!(add_noise(value, 1e9, &mut rng), value);
            }
        }
    }

    #[test]
    fn test_variance_grows_as_epsilon_shrinks() {
        let mut rng = StdRng::seed_from_u64(42);
        let value = 1_000_000u64;
        let variances: Vec<f64> = [1.0, 0.1, 0.01]
            .iter()
            .map(|&eps| {
                let samples: Vec<f64> = (0..2_000)
                    .map(|_| add_noise(value, eps, &mut rng) as f64)
                    .collect();
                sample_variance(&samples)
            })
            .collect();

        assert!(variances[0] < variances[1]);
        assert!(variances[1] < variances[2]);
    }

    #[test]
    fn test_noise_calibration_at_default_epsilon() {
        let injector = PrivacyNoiseInjector::default();
        let mut rng = StdRng::seed_from_u64(1234);
        let runs = 1_000;
        let total: u64 = (0..runs).map(|_| injector.add_noise_with(50, &mut rng)).sum();
        let mean = total as f64 / runs as f64;
        assert!((mean - 50.0).abs() <= 5.0, "mean {} not near 50", mean);
    }

    #[test]
    fn test_budget_is_clamped() {
        assert_eq!(PrivacyNoiseInjector::default().privacy_budget_used(), 0.1);
        assert_eq!(PrivacyNoiseInjector::new(3.0).unwrap().privacy_budget_used(), 1.0);
    }

    proptest! {
        #[test]
        fn proptest_noise_clamps_at_zero(value in 0u64..1_000, epsilon in 0.001f64..100.0, seed in any::<u64>()) {
            let noise = laplace_noise(COUNT_SENSITIVITY / epsilon, &mut StdRng::seed_from_u64(seed));
            let noised = add_noise(value, epsilon, &mut StdRng::seed_from_u64(seed));
            prop_assert!(noise.is_finite());
            let expected = (value as f64 + noise).round().max(0.0);
            prop_assert_eq!(noised as f64, expected);
        }
    }
}
