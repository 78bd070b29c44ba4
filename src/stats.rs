use serde::{Deserialize, Serialize};

/// Running mean and variance of unweighted values (Welford).
#[derive(Debug, Clone, Default)]
pub struct Accumulator {
    n_vals: usize,
    mean: f64,
    diff_2_sum: f64,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct AccumulatorReport {
    pub n_vals: usize,
    pub mean: f64,
    pub std_dev: f64,
}

impl Accumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, val: f64) {
        self.n_vals += 1;

        let diff_a = val - self.mean;
        self.mean += diff_a / self.n_vals as f64;

        let diff_b = val - self.mean;
        self.diff_2_sum += diff_a * diff_b;
    }

    pub fn report(&self) -> AccumulatorReport {
        AccumulatorReport {
            n_vals: self.n_vals,
            mean: if self.n_vals > 0 { self.mean } else { f64::NAN },
            std_dev: if self.n_vals > 1 {
                (self.diff_2_sum / (self.n_vals as f64 - 1.0)).sqrt()
            } else {
                f64::NAN
            },
        }
    }
}

/// Running mean and variance of weighted values (West).
///
/// Weights are treated as probabilities, so the variance is not bias-corrected.
#[derive(Debug, Clone, Default)]
pub struct WeightedAccumulator {
    weight_sum: f64,
    mean: f64,
    diff_2_sum: f64,
}

impl WeightedAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, val: f64, weight: f64) {
        if weight <= 0.0 {
            return;
        }
        self.weight_sum += weight;

        let diff_a = val - self.mean;
        self.mean += diff_a * weight / self.weight_sum;

        let diff_b = val - self.mean;
        self.diff_2_sum += weight * diff_a * diff_b;
    }

    pub fn mean(&self) -> f64 {
        if self.weight_sum > 0.0 {
            self.mean
        } else {
            f64::NAN
        }
    }

    pub fn std_dev(&self) -> f64 {
        if self.weight_sum > 0.0 {
            (self.diff_2_sum / self.weight_sum).max(0.0).sqrt()
        } else {
            f64::NAN
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulator_matches_direct_formulas() {
        let vals = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let mut acc = Accumulator::new();
        vals.iter().for_each(|&val| acc.add(val));
        let report = acc.report();
        assert_eq!(report.n_vals, 8);
        assert!((report.mean - 5.0).abs() < 1e-12);
        assert!((report.std_dev - (32.0f64 / 7.0).sqrt()).abs() < 1e-12);

        let mut single = Accumulator::new();
        assert!(single.report().mean.is_nan());
        single.add(1.0);
        assert!(single.report().std_dev.is_nan());
    }

    #[test]
    fn weighted_accumulator_matches_direct_formulas() {
        let vals = [1.0, 2.0, 6.0];
        let weights = [0.5, 0.25, 0.25];
        let mut acc = WeightedAccumulator::new();
        for (&val, &weight) in vals.iter().zip(&weights) {
            acc.add(val, weight);
        }
        let mean = 0.5 + 0.5 + 1.5;
        let var = 0.5 * (1.0 - mean) * (1.0 - mean)
            + 0.25 * (2.0 - mean) * (2.0 - mean)
            + 0.25 * (6.0 - mean) * (6.0 - mean);
        assert!((acc.mean() - mean).abs() < 1e-12);
        assert!((acc.std_dev() - f64::sqrt(var)).abs() < 1e-12);

        acc.add(100.0, 0.0);
        assert!((acc.mean() - mean).abs() < 1e-12);
        assert!(WeightedAccumulator::new().mean().is_nan());
    }
}
