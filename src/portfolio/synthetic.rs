use ndarray::Array2;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use rand_distr::{Distribution, Normal, Uniform};

use crate::error::{Error, Result};
use crate::portfolio::MadStatement;

/// Generator of reproducible random markets for tests, demos and benchmarks.
///
/// Each asset gets a drift drawn once and then per-period returns with
/// Gaussian noise around it. Prices are uniform in `price_range` and
/// traded in single-share lots.
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticMarket {
    pub assets: usize,
    pub periods: usize,
    pub capital: f64,
    pub price_range: (f64, f64),
    pub drift_mean: f64,
    pub drift_spread: f64,
    pub volatility: f64,
    pub max_weight: f64,
    pub min_size: f64,
}

impl Default for SyntheticMarket {
    fn default() -> Self {
        Self {
            assets: 6,
            periods: 24,
            capital: 1000.0,
            price_range: (50.0, 150.0),
            drift_mean: 0.002,
            drift_spread: 0.004,
            volatility: 0.03,
            max_weight: 0.4,
            min_size: 0.5,
        }
    }
}

impl SyntheticMarket {
    pub fn new(assets: usize, periods: usize) -> Self {
        Self {
            assets,
            periods,
            ..Self::default()
        }
    }

    /// Draws a statement from the ChaCha stream seeded with `seed`.
    pub fn statement(&self, seed: u64) -> Result<MadStatement> {
        let (low, high) = self.price_range;
        if !(low > 0.0) || !(high > low) {
            return Err(Error::invalid_input("price range must be positive and non-empty"));
        }
        for (name, value) in [("volatility", self.volatility), ("drift_spread", self.drift_spread)] {
            if !value.is_finite() || value < 0.0 {
                return Err(Error::invalid_input(format!(
                    "{} must be finite and non-negative, got {}",
                    name, value
                )));
            }
        }
        let drift = Normal::new(self.drift_mean, self.drift_spread)
            .map_err(|e| Error::invalid_input(e.to_string()))?;
        let noise =
            Normal::new(0.0, self.volatility).map_err(|e| Error::invalid_input(e.to_string()))?;
        let price = Uniform::new(low, high);

        let mut rng = ChaCha20Rng::seed_from_u64(seed);
        let drifts: Vec<f64> = (0..self.assets).map(|_| drift.sample(&mut rng)).collect();
        let time_rate = Array2::from_shape_fn((self.assets, self.periods), |(asset, _)| {
            drifts[asset] + noise.sample(&mut rng)
        });
        let close: Vec<f64> = (0..self.assets).map(|_| price.sample(&mut rng)).collect();
        // a shared market factor keeps the assets correlated
        let factor: Vec<f64> = (0..self.periods)
            .map(|_| rng.gen_range(-0.5..0.5) * self.volatility)
            .collect();
        let time_rate = time_rate + &Array2::from_shape_fn((1, self.periods), |(_, t)| factor[t]);

        Ok(
            MadStatement::new(time_rate, close, vec![1.0; self.assets], self.capital)
                .with_max_weight(vec![self.max_weight; self.assets])
                .with_min_size(self.min_size),
        )
    }
}
