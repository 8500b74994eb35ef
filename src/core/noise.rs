// Gaussian sampling and dispersion helpers

use rand::Rng;

/// Standard normal sample via the Box–Muller transform, scaled to
/// `mean + std_dev * z`
pub fn gaussian<R: Rng + ?Sized>(rng: &mut R, mean: f64, std_dev: f64) -> f64 {
    let u1: f64 = rng.gen();
    let u2: f64 = rng.gen();
    let z = (2.0 * std::f64::consts::PI * u1).cos() * (-2.0 * u2.ln()).sqrt();
    mean + std_dev * z
}

/// Uniform sample from [min, max)
pub fn uniform<R: Rng + ?Sized>(rng: &mut R, min: f64, max: f64) -> f64 {
    rng.gen::<f64>() * (max - min) + min
}

/// Sample standard deviation with Bessel's correction (n - 1)
pub fn sample_std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let avg = values.iter().sum::<f64>() / values.len() as f64;
    let sum_sq: f64 = values.iter().map(|v| (v - avg) * (v - avg)).sum();
    (sum_sq / (values.len() - 1) as f64).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_gaussian_zero_std_dev_returns_mean() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..10 {
            assert_eq!(gaussian(&mut rng, 3.5, 0.0), 3.5);
        }
    }

    #[test]
    fn test_gaussian_sample_statistics() {
        let mut rng = StdRng::seed_from_u64(42);
        let samples: Vec<f64> = (0..20_000).map(|_| gaussian(&mut rng, 2.0, 1.5)).collect();
        let mean = samples.iter().sum::<f64>() / samples.len() as f64;
        let std = sample_std_dev(&samples);
        assert!((mean - 2.0).abs() < 0.05, "mean drifted: {}", mean);
        assert!((std - 1.5).abs() < 0.05, "std drifted: {}", std);
    }

    #[test]
    fn test_sample_std_dev_bessel() {
        // variance of [2, 4, 4, 4, 5, 5, 7, 9] with n-1 is 32/7
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let expected = (32.0f64 / 7.0).sqrt();
        assert!((sample_std_dev(&values) - expected).abs() < 1e-12);
    }

    #[test]
    fn test_sample_std_dev_degenerate() {
        assert_eq!(sample_std_dev(&[]), 0.0);
        assert_eq!(sample_std_dev(&[1.0]), 0.0);
    }

    #[test]
    fn test_uniform_range() {
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..1000 {
            let v = uniform(&mut rng, 2.0, 6.0);
            assert!((2.0..6.0).contains(&v));
        }
    }
}
