use ndarray::Array1;

use crate::portfolio::ProblemParameters;

/// Which side of `wmin <= gr . nu <= 1` the cube maximiser ends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveWeight {
    /// Neither side is tight.
    None,
    /// `gr . nu = 1`.
    Upper,
    /// `gr . nu = wmin`.
    Lower,
}

/// The single coordinate left strictly between its bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fractional {
    pub index: usize,
    /// Position of `index` in the priority order.
    pub position: usize,
}

#[derive(Debug, Clone)]
pub struct CubeSolution {
    pub nu: Array1<f64>,
    /// `rbar . nu`
    pub value: f64,
    pub active: ActiveWeight,
    pub fractional: Option<Fractional>,
    /// `nu` with the fractional coordinate rounded down.
    pub nu_low: Array1<f64>,
    /// `nu_low` with the fractional coordinate one lot higher.
    pub nu_upp: Array1<f64>,
}

/// Maximises `rbar . nu` over the box `[lower, upper]` subject to
/// `wmin <= gr . nu <= 1`, ignoring the risk rows.
///
/// The problem is a continuous knapsack, solved greedily along the priority
/// order. Returns `None` when the weight interval misses the box.
pub fn maximize_return_on_cube(
    params: &ProblemParameters,
    lower: &Array1<f64>,
    upper: &Array1<f64>,
) -> Option<CubeSolution> {
    let gr = &params.gr;
    if gr.dot(lower) > 1.0 || gr.dot(upper) < params.wmin {
        return None;
    }

    let corner: Array1<f64> = params
        .rbar
        .iter()
        .zip(lower.iter().zip(upper.iter()))
        .map(|(&rb, (&l, &u))| if rb > 0.0 { u } else { l })
        .collect();
    let weight = gr.dot(&corner);

    let (nu, active, fractional) = if weight > 1.0 {
        // fill the budget from the best ratio down
        let mut nu = lower.clone();
        let mut used = gr.dot(lower);
        let mut fractional = None;
        for (position, &i) in params.priority.iter().enumerate() {
            let next = used + (upper[i] - lower[i]) * gr[i];
            if next <= 1.0 {
                nu[i] = upper[i];
                used = next;
            } else {
                nu[i] = lower[i] + (1.0 - used) / gr[i];
                fractional = Some(Fractional { index: i, position });
                break;
            }
        }
        (nu, ActiveWeight::Upper, fractional)
    } else if weight < params.wmin {
        // shed the worst ratios until only wmin is left
        let mut nu = upper.clone();
        let mut used = gr.dot(upper);
        let mut fractional = None;
        for (position, &i) in params.priority.iter().enumerate().rev() {
            let next = used - (upper[i] - lower[i]) * gr[i];
            if next >= params.wmin {
                nu[i] = lower[i];
                used = next;
            } else {
                nu[i] = upper[i] - (used - params.wmin) / gr[i];
                fractional = Some(Fractional { index: i, position });
                break;
            }
        }
        (nu, ActiveWeight::Lower, fractional)
    } else {
        (corner, ActiveWeight::None, None)
    };

    let mut nu_low = nu.clone();
    let mut nu_upp = nu.clone();
    if let Some(f) = fractional {
        nu_low[f.index] = nu[f.index].floor();
        nu_upp[f.index] = nu_low[f.index] + 1.0;
    }

    Some(CubeSolution {
        value: params.rbar.dot(&nu),
        nu,
        active,
        fractional,
        nu_low,
        nu_upp,
    })
}
