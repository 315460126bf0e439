//! Fixed-capacity rolling window of TRSI stability samples.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One week of hourly samples.
pub const DEFAULT_WINDOW_CAPACITY: usize = 168;

/// One day of hourly samples before the window reports a measured value.
pub const DEFAULT_MIN_SAMPLES: usize = 24;

/// Value reported while the window is still warming up.
pub const NEUTRAL_STABILITY: f64 = 0.5;

/// Stability as reported by the window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Stability {
    /// Fewer than the minimum number of samples; the value is the neutral default.
    ColdStart { samples: usize, required: usize },
    /// `clamp(mean − stdev, 0, 1)` over the current samples.
    Measured(f64),
    /// Sampling is switched off; the value is the neutral default.
    Disabled,
}

impl Stability {
    /// Numeric value, substituting the neutral default during cold start.
    pub fn value(&self) -> f64 {
        match self {
            Stability::ColdStart { .. } | Stability::Disabled => NEUTRAL_STABILITY,
            Stability::Measured(v) => *v,
        }
    }

    pub fn is_cold(&self) -> bool {
        matches!(self, Stability::ColdStart { .. })
    }
}

/// Rolling FIFO buffer of TRSI samples.
///
/// Kept purely in memory: after a restart the window warms up again and
/// reports [`NEUTRAL_STABILITY`] until `min_samples` have arrived.
#[derive(Debug, Clone)]
pub struct MemoryResonanceWindow {
    samples: VecDeque<f64>,
    capacity: usize,
    min_samples: usize,
}

impl Default for MemoryResonanceWindow {
    fn default() -> Self {
        Self {
            samples: VecDeque::with_capacity(DEFAULT_WINDOW_CAPACITY),
            capacity: DEFAULT_WINDOW_CAPACITY,
            min_samples: DEFAULT_MIN_SAMPLES,
        }
    }
}

impl MemoryResonanceWindow {
    /// Create a window with a custom horizon and cold-start threshold.
    pub fn new(capacity: usize, min_samples: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::InvalidConfig("capacity must be positive".into()));
        }
        if min_samples > capacity {
            return Err(Error::InvalidConfig(format!(
                "min_samples {} exceeds capacity {}",
                min_samples, capacity
            )));
        }
        Ok(Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            min_samples,
        })
    }

    /// Append a sample, evicting the oldest one first when full.
    pub fn add_sample(&mut self, value: f64) -> Result<()> {
        if !value.is_finite() {
            return Err(Error::NonFiniteSample(value));
        }
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn min_samples(&self) -> usize {
        self.min_samples
    }

    /// Samples in insertion order, oldest first.
    pub fn samples(&self) -> impl Iterator<Item = f64> + '_ {
        self.samples.iter().copied()
    }

    /// Stability with the cold-start case made explicit.
    pub fn stability(&self) -> Stability {
        let n = self.samples.len();
        if n < self.min_samples || n == 0 {
            return Stability::ColdStart {
                samples: n,
                required: self.min_samples,
            };
        }

        let count = n as f64;
        let mean = self.samples.iter().sum::<f64>() / count;
        // Population variance: the window is the whole population we judge.
        let variance = self
            .samples
            .iter()
            .map(|s| (s - mean).powi(2))
            .sum::<f64>()
            / count;

        Stability::Measured((mean - variance.sqrt()).clamp(0.0, 1.0))
    }

    /// `clamp(mean − stdev, 0, 1)`, or the neutral default during cold start.
    pub fn compute_stability(&self) -> f64 {
        self.stability().value()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn filled(values: &[f64]) -> MemoryResonanceWindow {
        let mut window = MemoryResonanceWindow::default();
        for v in values {
            window.add_sample(*v).unwrap();
        }
        window
    }

    #[test]
    fn cold_start_returns_neutral() {
        let window = filled(&[0.9; 23]);
        assert!(window.stability().is_cold());
        assert_eq!(window.compute_stability(), NEUTRAL_STABILITY);

        let window = filled(&[0.9; 24]);
        assert!(!window.stability().is_cold());
        assert!((window.compute_stability() - 0.9).abs() < 1e-12);
    }

    #[test]
    fn disabled_reports_neutral() {
        assert_eq!(Stability::Disabled.value(), NEUTRAL_STABILITY);
        assert!(!Stability::Disabled.is_cold());
    }

    #[test]
    fn mean_minus_stdev() {
        // Alternating 0.85 / 0.95: mean 0.9, population stdev 0.05.
        let values: Vec<f64> = (0..48).map(|i| if i % 2 == 0 { 0.85 } else { 0.95 }).collect();
        let window = filled(&values);
        assert!((window.compute_stability() - 0.85).abs() < 1e-9);
    }

    #[test]
    fn high_variance_clamps_to_zero() {
        // Alternating -0.1 / 1.1: mean 0.5, population stdev 0.6.
        let values: Vec<f64> = (0..48).map(|i| if i % 2 == 0 { -0.1 } else { 1.1 }).collect();
        let window = filled(&values);
        assert_eq!(window.compute_stability(), 0.0);
    }

    #[test]
    fn evicts_oldest_first() {
        let mut window = MemoryResonanceWindow::new(3, 1).unwrap();
        for v in [0.1, 0.2, 0.3, 0.4] {
            window.add_sample(v).unwrap();
        }
        assert_eq!(window.samples().collect::<Vec<_>>(), vec![0.2, 0.3, 0.4]);
    }

    #[test]
    fn rejects_non_finite() {
        let mut window = MemoryResonanceWindow::default();
        assert_eq!(
            window.add_sample(f64::NAN).unwrap_err().to_string(),
            "non-finite stability sample: NaN"
        );
        assert!(window.add_sample(f64::INFINITY).is_err());
        assert!(window.is_empty());
    }

    #[test]
    fn invalid_config() {
        assert!(MemoryResonanceWindow::new(0, 0).is_err());
        assert!(MemoryResonanceWindow::new(10, 11).is_err());
    }

    proptest! {
        #[test]
        fn never_exceeds_capacity_and_keeps_newest(values in prop::collection::vec(-2.0f64..2.0, 0..400)) {
            let window = filled(&values);
            prop_assert!(window.len() <= DEFAULT_WINDOW_CAPACITY);

            let start = values.len().saturating_sub(DEFAULT_WINDOW_CAPACITY);
            let kept: Vec<f64> = window.samples().collect();
            prop_assert_eq!(kept, values[start..].to_vec());
        }

        #[test]
        fn stability_is_bounded_and_deterministic(values in prop::collection::vec(-2.0f64..2.0, 0..200)) {
            let a = filled(&values).compute_stability();
            let b = filled(&values).compute_stability();
            prop_assert!((0.0..=1.0).contains(&a));
            prop_assert_eq!(a.to_bits(), b.to_bits());
        }
    }
}
