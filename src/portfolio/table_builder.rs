use log::trace;
use ndarray::{s, Array1};

use crate::error::Result;
use crate::optimization::matrix;
use crate::optimization::{Repair, SolverSettings, Tableau};
use crate::portfolio::cube::{maximize_return_on_cube, ActiveWeight};
use crate::portfolio::ProblemParameters;

/// Column layout of a node tableau once the lot variables are eliminated:
/// `s_l (free) | s_u (free) | s_wmin | s_one | s_lim | a (periods) | b (periods) | rhs`.
///
/// `k` indexes the node's free assets in increasing asset order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlackLayout {
    pub free: usize,
    pub periods: usize,
}

impl SlackLayout {
    pub fn new(free: usize, periods: usize) -> Self {
        Self { free, periods }
    }

    pub fn s_lower(&self, k: usize) -> usize {
        k
    }

    pub fn s_upper(&self, k: usize) -> usize {
        self.free + k
    }

    pub fn s_wmin(&self) -> usize {
        2 * self.free
    }

    pub fn s_one(&self) -> usize {
        2 * self.free + 1
    }

    /// Slack of the return floor, or of the risk cap.
    pub fn s_limit(&self) -> usize {
        2 * self.free + 2
    }

    pub fn a(&self, period: usize) -> usize {
        2 * self.free + 3 + period
    }

    pub fn b(&self, period: usize) -> usize {
        2 * self.free + 3 + self.periods + period
    }

    /// Number of columns, right-hand side included.
    pub fn cols(&self) -> usize {
        2 * self.free + 2 * self.periods + 4
    }

    /// Number of rows, objective included.
    pub fn rows(&self) -> usize {
        self.free + self.periods + 4
    }
}

/// Builds the tableau of the box `[lower, upper]` from the template.
///
/// The starting basis is the vertex found by the cube maximiser, so the
/// result is primal feasible but not yet optimal. A vertex over the risk cap
/// is moved back under it by a phase one. Returns `None` when the cube
/// maximiser or that phase one proves the box infeasible.
pub fn build_table(
    params: &ProblemParameters,
    lower: &Array1<f64>,
    upper: &Array1<f64>,
    settings: &SolverSettings,
) -> Result<Option<Tableau>> {
    let cube = match maximize_return_on_cube(params, lower, upper) {
        Some(cube) if cube.value >= params.mu0 => cube,
        _ => return Ok(None),
    };
    let (w, periods) = (params.assets, params.periods);
    let (free, fixed): (Vec<usize>, Vec<usize>) = (0..w).partition(|&i| lower[i] < upper[i]);
    let n = free.len();

    let mut table = params.zero_tableau.clone();
    let rhs = table.ncols() - 1;
    for i in 0..w {
        table[[1 + i, rhs]] = lower[i];
        table[[1 + w + i, rhs]] = upper[i];
    }
    for &i in &fixed {
        let column = table.column(i).to_owned();
        table.column_mut(rhs).scaled_add(-lower[i], &column);
    }
    let rows: Vec<usize> = fixed.iter().flat_map(|&i| [1 + i, 1 + w + i]).collect();
    let cols: Vec<usize> = fixed.iter().flat_map(|&i| [i, w + i, 2 * w + i]).collect();
    let table = matrix::remove_cols(&matrix::remove_rows(&table, &rows), &cols);

    // the lot columns come first, so every slack index is shifted by n
    let layout = SlackLayout::new(n, periods);
    let fractional = cube
        .fractional
        .map(|f| f.index)
        .filter(|&i| lower[i] < upper[i]);
    let mut basis: Vec<usize> = (0..n).collect();
    for (k, &i) in free.iter().enumerate() {
        if fractional == Some(i) {
            basis.push(n + layout.s_lower(k));
            basis.push(n + layout.s_upper(k));
        } else if cube.nu[i] >= upper[i] {
            basis.push(n + layout.s_lower(k));
        } else {
            basis.push(n + layout.s_upper(k));
        }
    }
    match (fractional, cube.active) {
        (Some(_), ActiveWeight::Upper) => basis.push(n + layout.s_wmin()),
        (Some(_), _) => basis.push(n + layout.s_one()),
        (None, _) => {
            basis.push(n + layout.s_wmin());
            basis.push(n + layout.s_one());
        }
    }
    basis.push(n + layout.s_limit());
    for (period, x) in params.deviation(&cube.nu).iter().enumerate() {
        if *x > 0.0 {
            basis.push(n + layout.a(period));
        } else {
            basis.push(n + layout.b(period));
        }
    }

    let mut tableau = Tableau::new(table, basis);
    tableau.canonicalize(&settings.tolerances)?;

    let lot_rows: Vec<usize> = (1..=n).collect();
    let table = matrix::remove_rows(&tableau.table, &lot_rows)
        .slice(s![.., n..])
        .to_owned();
    let basis = tableau.basis[n..].iter().map(|b| b - n).collect();
    trace!("built tableau {:?} for {} free assets", table.dim(), n);

    let mut tableau = Tableau::new(table, basis);
    if let Some(p) = tableau.position(layout.s_limit()) {
        if tableau.basic_value(p) < -settings.tolerances.feasibility
            && tableau.quick_return_to_feasibility(p, 0.0, settings)? == Repair::Infeasible
        {
            trace!("risk cap unreachable on the box");
            return Ok(None);
        }
    }
    Ok(Some(tableau))
}

/// Reads the lot vector of a node tableau: a free asset sits at its lower
/// bound unless its lower slack is basic, at its upper bound when the upper
/// slack is not basic as well, and strictly inside otherwise.
pub fn relaxed_lots(
    tableau: &Tableau,
    free: &[usize],
    lower: &Array1<f64>,
    upper: &Array1<f64>,
    periods: usize,
) -> Array1<f64> {
    let layout = SlackLayout::new(free.len(), periods);
    let mut nu = lower.clone();
    for (k, &i) in free.iter().enumerate() {
        if let Some(p) = tableau.position(layout.s_lower(k)) {
            nu[i] = match tableau.position(layout.s_upper(k)) {
                Some(_) => lower[i] + tableau.basic_value(p),
                None => upper[i],
            };
        }
    }
    nu
}
