use ndarray::Array1;

use crate::portfolio::ProblemParameters;

/// Result of [`tighten_bounds`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tightening {
    Feasible,
    /// Some upper bound fell below its lower bound.
    Crossed,
}

/// Tightens integer lot bounds against the weight and return constraints
/// until nothing changes.
///
/// Each pass first bounds every coordinate by the room left under
/// `gr . nu <= 1` and above `gr . nu >= wmin`, then by the return that can
/// still be given up before `rbar . nu` drops below `mu0`. Only the bound
/// vectors are modified.
pub fn tighten_bounds(
    params: &ProblemParameters,
    lower: &mut Array1<f64>,
    upper: &mut Array1<f64>,
    slack: f64,
) -> Tightening {
    let floor = |x: f64| (x + slack).floor();
    loop {
        let mut changed = false;

        let room_up = 1.0 - params.gr.dot(lower);
        let room_down = params.gr.dot(upper) - params.wmin;
        for i in 0..params.assets {
            let g = params.gr[i];
            let cap = lower[i] + floor(room_up / g);
            if cap < upper[i] {
                upper[i] = cap;
                changed = true;
            }
            let base = upper[i] - floor(room_down / g);
            if base > lower[i] {
                lower[i] = base;
                changed = true;
            }
        }

        let best_return: f64 = params
            .rbar
            .iter()
            .zip(lower.iter().zip(upper.iter()))
            .map(|(&rb, (&l, &u))| if rb > 0.0 { rb * u } else { rb * l })
            .sum();
        let spare = best_return - params.mu0;
        for i in 0..params.assets {
            let rb = params.rbar[i];
            if rb > 0.0 {
                let base = upper[i] - floor(spare / rb);
                if base > lower[i] {
                    lower[i] = base;
                    changed = true;
                }
            } else if rb < 0.0 {
                let cap = lower[i] + floor(spare / -rb);
                if cap < upper[i] {
                    upper[i] = cap;
                    changed = true;
                }
            }
        }

        if lower.iter().zip(upper.iter()).any(|(l, u)| u < l) {
            return Tightening::Crossed;
        }
        if !changed {
            return Tightening::Feasible;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn params(mu0: f64, wmin: f64) -> ProblemParameters {
        params_with(array![0.4, 0.25, 0.2], mu0, wmin)
    }

    fn params_with(gr: Array1<f64>, mu0: f64, wmin: f64) -> ProblemParameters {
        // rbar = [0.02, 0.01, -0.01]
        let r = array![[0.03, 0.0, 0.0], [0.01, 0.02, -0.02]];
        let numax = array![5.0, 5.0, 5.0];
        ProblemParameters::new(r, gr, numax, mu0, wmin, 1.0).unwrap()
    }

    #[test]
    fn test_weight_caps_upper_bounds() {
        let p = params(-1.0, 0.0);
        let mut lower = array![0.0, 0.0, 0.0];
        let mut upper = p.numax.clone();
        assert_eq!(tighten_bounds(&p, &mut lower, &mut upper, 1e-9), Tightening::Feasible);
        assert_eq!(upper, array![2.0, 4.0, 5.0]);
        assert_eq!(lower, array![0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_minimum_weight_raises_lower_bounds() {
        let p = params(-1.0, 0.75);
        let mut lower = array![0.0, 0.0, 0.0];
        let mut upper = array![1.0, 2.0, 1.0];
        assert_eq!(tighten_bounds(&p, &mut lower, &mut upper, 1e-9), Tightening::Feasible);
        // 1.1 - 0.75 leaves 0.35 to give up
        assert_eq!(lower, array![1.0, 1.0, 0.0]);
        assert_eq!(upper, array![1.0, 2.0, 1.0]);
    }

    #[test]
    fn test_return_floor_splits_by_sign() {
        let p = params_with(array![0.1, 0.1, 0.1], 0.05, 0.0);
        let mut lower = array![0.0, 0.0, 0.0];
        let mut upper = array![2.0, 4.0, 5.0];
        assert_eq!(tighten_bounds(&p, &mut lower, &mut upper, 1e-9), Tightening::Feasible);
        // best return 0.08 leaves 0.03 to give up
        assert_eq!(lower, array![1.0, 1.0, 0.0]);
        assert_eq!(upper, array![2.0, 4.0, 3.0]);
    }

    #[test]
    fn test_unreachable_return_crosses() {
        // at most 0.04 fits under the weight cap
        let p = params(0.05, 0.0);
        let mut lower = array![0.0, 0.0, 0.0];
        let mut upper = p.numax.clone();
        assert_eq!(tighten_bounds(&p, &mut lower, &mut upper, 1e-9), Tightening::Crossed);
    }

    #[test]
    fn test_crossed_bounds() {
        let p = params(-1.0, 0.9);
        let mut lower = array![0.0, 0.0, 0.0];
        let mut upper = array![1.0, 1.0, 0.0];
        assert_eq!(tighten_bounds(&p, &mut lower, &mut upper, 1e-9), Tightening::Crossed);
    }

    #[test]
    fn test_fixed_point_is_stable() {
        let p = params(0.015, 0.3);
        let mut lower = array![0.0, 0.0, 0.0];
        let mut upper = p.numax.clone();
        assert_eq!(tighten_bounds(&p, &mut lower, &mut upper, 1e-9), Tightening::Feasible);
        let (l, u) = (lower.clone(), upper.clone());
        assert_eq!(tighten_bounds(&p, &mut lower, &mut upper, 1e-9), Tightening::Feasible);
        assert_eq!((lower, upper), (l, u));
    }
}
