// Outlier perturbation of emitted values
//
// Perturbation applies to the emitted value only; the series history keeps
// the raw model output so later lagged reads stay undistorted.

use rand::rngs::StdRng;
use tracing::debug;

use crate::core::history::HistoryStore;
use crate::core::noise;
use crate::types::Channel;

/// Injects occasional outliers into a series based on two cumulative
/// probability thresholds. `ratio_2s` gates the stronger (2-sigma) outlier
/// and is checked first; `ratio_1s` gates the 1-sigma outlier.
#[derive(Debug, Clone, Copy)]
pub struct OutlierInjector {
    ratio_1s: f64,
    ratio_2s: f64,
}

impl OutlierInjector {
    pub fn new(ratio_1s: f64, ratio_2s: f64) -> Self {
        Self { ratio_1s, ratio_2s }
    }

    pub fn is_enabled(&self) -> bool {
        self.ratio_1s > 0.0 || self.ratio_2s > 0.0
    }

    /// Rolls the outlier dice for one emission. Returns the perturbed value,
    /// or the input unchanged when no outlier fires or fewer than two
    /// history values exist for the series.
    pub fn apply(&self, rng: &mut StdRng, store: &HistoryStore, id: &str, value: f64) -> f64 {
        if !self.is_enabled() {
            return value;
        }

        let draw = noise::uniform(rng, 0.0, 1.0);
        let factor = if draw < self.ratio_2s {
            2.0
        } else if draw < self.ratio_1s {
            1.0
        } else {
            return value;
        };

        let recent = store.values(id, Channel::X);
        if recent.len() < 2 {
            return value;
        }

        let std_dev = noise::sample_std_dev(&recent);
        let magnitude = factor * std_dev + noise::gaussian(rng, 0.0, std_dev / 2.0).abs();

        // Push the outlier in the direction the series last moved.
        let last = recent[recent.len() - 1];
        let previous = recent[recent.len() - 2];
        let direction = if last - previous >= 0.0 { 1.0 } else { -1.0 };

        let perturbed = value + direction * magnitude;
        debug!(
            "💥 Outlier on '{}': factor {}, {} -> {}",
            id, factor, value, perturbed
        );
        perturbed
    }
}
