use ndarray::Array1;

use crate::portfolio::{Goal, ProblemParameters};

/// An integer point found by [`integer_local_improve`].
#[derive(Debug, Clone, PartialEq)]
pub struct Improved {
    pub nu: Array1<f64>,
    pub value: f64,
}

/// Local search over single-lot moves starting from an integer point.
///
/// Returns `None` when the start violates a box, weight or return
/// constraint. When minimising risk, takes the move with the smallest
/// resulting deviation while that strictly improves. Under a risk cap the
/// same descent first brings the point under the cap, giving up if it
/// stalls above it, and then raises the return one lot at a time on the
/// asset with the largest mean return that stays feasible. Every
/// constraint holds within `tolerance` throughout.
pub fn integer_local_improve(
    params: &ProblemParameters,
    start: &Array1<f64>,
    tolerance: f64,
) -> Option<Improved> {
    if !params.satisfies_linear(start, tolerance) {
        return None;
    }
    let mut walk = Walk::new(params, start, tolerance);
    match params.goal {
        Goal::MinRisk => walk.reduce_deviation(f64::NEG_INFINITY),
        Goal::MaxReturn { gamma } => {
            let cap = 0.5 * (gamma + tolerance) * params.periods as f64;
            walk.reduce_deviation(cap);
            if walk.half_deviation > cap {
                return None;
            }
            walk.raise_return(cap);
        }
    }

    // recompute to drop the drift of the incremental updates
    let nu = walk.nu;
    let value = params.objective(&nu);
    Some(Improved { nu, value })
}

/// Current point of the search with its constraint slacks.
struct Walk<'a> {
    params: &'a ProblemParameters,
    tolerance: f64,
    nu: Array1<f64>,
    deviation: Array1<f64>,
    /// Half of `sum |m nu|`.
    half_deviation: f64,
    return_slack: f64,
    upper_slack: f64,
    lower_slack: f64,
}

impl<'a> Walk<'a> {
    fn new(params: &'a ProblemParameters, start: &Array1<f64>, tolerance: f64) -> Self {
        let deviation = params.deviation(start);
        let weight = params.weight(start);
        Self {
            params,
            tolerance,
            nu: start.clone(),
            half_deviation: 0.5 * deviation.mapv(f64::abs).sum(),
            deviation,
            return_slack: params.expected_return(start) - params.mu0,
            upper_slack: 1.0 - weight,
            lower_slack: weight - params.wmin,
        }
    }

    /// Whether one lot more (`step = 1`) or less (`step = -1`) of asset `i`
    /// keeps the box, weight and return constraints.
    fn allows(&self, i: usize, step: f64) -> bool {
        let (g, rb, tol) = (self.params.gr[i], self.params.rbar[i], self.tolerance);
        if step > 0.0 {
            self.nu[i] + 1.0 <= self.params.numax[i]
                && self.return_slack + rb >= -tol
                && self.upper_slack - g >= -tol
        } else {
            self.nu[i] >= 1.0 && self.return_slack - rb >= -tol && self.lower_slack - g >= -tol
        }
    }

    fn half_deviation_after(&self, i: usize, step: f64) -> f64 {
        0.5 * self
            .deviation
            .iter()
            .zip(self.params.m.column(i).iter())
            .map(|(d, c)| (d + step * c).abs())
            .sum::<f64>()
    }

    fn apply(&mut self, i: usize, step: f64, half_deviation: f64) {
        self.nu[i] += step;
        self.deviation.scaled_add(step, &self.params.m.column(i));
        self.half_deviation = half_deviation;
        self.return_slack += step * self.params.rbar[i];
        self.upper_slack -= step * self.params.gr[i];
        self.lower_slack += step * self.params.gr[i];
    }

    /// Steepest descent on the deviation until it reaches `target` or no
    /// move improves it.
    fn reduce_deviation(&mut self, target: f64) {
        while self.half_deviation > target {
            let mut best: Option<(usize, f64, f64)> = None;
            for i in 0..self.params.assets {
                for step in [1.0, -1.0] {
                    if !self.allows(i, step) {
                        continue;
                    }
                    let candidate = self.half_deviation_after(i, step);
                    if best.map_or(true, |(_, _, v)| candidate < v) {
                        best = Some((i, step, candidate));
                    }
                }
            }
            match best {
                Some((i, step, candidate)) if candidate < self.half_deviation => {
                    self.apply(i, step, candidate)
                }
                _ => break,
            }
        }
    }

    /// Moves one lot towards the sign of `rbar` on the asset with the
    /// largest `|rbar|`, as long as some move keeps the deviation under
    /// `cap`.
    fn raise_return(&mut self, cap: f64) {
        loop {
            let mut best: Option<(usize, f64, f64)> = None;
            for i in 0..self.params.assets {
                let rb = self.params.rbar[i];
                if rb == 0.0 {
                    continue;
                }
                let step = rb.signum();
                if !self.allows(i, step) {
                    continue;
                }
                let candidate = self.half_deviation_after(i, step);
                if candidate > cap {
                    continue;
                }
                if best.map_or(true, |(b, _, _)| rb.abs() > self.params.rbar[b].abs()) {
                    best = Some((i, step, candidate));
                }
            }
            match best {
                Some((i, step, candidate)) => self.apply(i, step, candidate),
                None => break,
            }
        }
    }
}
