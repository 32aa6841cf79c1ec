use log::trace;
use ndarray::{s, Array1, Array2, Axis};

use crate::error::{Error, Result};
use crate::optimization::matrix;
use crate::optimization::{SolverSettings, Tolerances};

/// Which simplex phase a pivot belongs to.
///
/// In phase two row 0 holds the reduced costs of the objective and the
/// constraint rows start at row 1. In phase one an auxiliary cost row is put
/// on top, the true objective moves to row 1 and is updated like any other
/// row, and the constraint rows start at row 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    One,
    Two,
}

impl Phase {
    /// Index of the first constraint row.
    pub fn first_row(self) -> usize {
        match self {
            Phase::One => 2,
            Phase::Two => 1,
        }
    }
}

/// Outcome of a single call to [`Tableau::advance`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Pivoted { row: usize, col: usize },
    Optimal,
}

/// Outcome of restoring primal feasibility after a right-hand side change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Repair {
    Feasible,
    Infeasible,
}

/// A dense simplex tableau in canonical form.
///
/// The last column is the right-hand side. Constraint row `k + first_row`
/// has `basis[k]` as its basic variable, and the objective value is stored
/// negated in the top right corner.
#[derive(Debug, Clone)]
pub struct Tableau {
    pub table: Array2<f64>,
    pub basis: Vec<usize>,
    pivots: usize,
}

impl Tableau {
    pub fn new(table: Array2<f64>, basis: Vec<usize>) -> Self {
        Self {
            table,
            basis,
            pivots: 0,
        }
    }

    pub fn rhs_col(&self) -> usize {
        self.table.ncols() - 1
    }

    /// Objective value of the current basic solution.
    pub fn value(&self) -> f64 {
        -self.table[[0, self.rhs_col()]]
    }

    /// Number of pivots performed since the last call to `take_pivots`.
    pub fn pivots(&self) -> usize {
        self.pivots
    }

    pub fn take_pivots(&mut self) -> usize {
        std::mem::take(&mut self.pivots)
    }

    /// Position of `col` in the basis, if it is basic.
    pub fn position(&self, col: usize) -> Option<usize> {
        self.basis.iter().position(|&b| b == col)
    }

    /// Value of the basic variable at `position` (phase two layout).
    pub fn basic_value(&self, position: usize) -> f64 {
        self.table[[position + 1, self.rhs_col()]]
    }

    /// Performs one pivot of the simplex method.
    ///
    /// The entering column is the first column with the most negative reduced
    /// cost; the leaving row is the first row attaining the minimum ratio
    /// among rows with a strictly positive entry in that column.
    ///
    /// # Errors
    ///
    /// Returns `Error::Unbounded` if no row qualifies for the ratio test.
    pub fn advance(&mut self, phase: Phase, tolerances: &Tolerances) -> Result<Step> {
        let rhs = self.rhs_col();
        let first = phase.first_row();

        let (col, reduced) = self
            .table
            .slice(s![0, ..rhs])
            .iter()
            .enumerate()
            .fold((0, f64::INFINITY), |(best_j, best), (j, &v)| {
                if v < best {
                    (j, v)
                } else {
                    (best_j, best)
                }
            });
        if reduced >= -tolerances.pivot_optimality {
            return Ok(Step::Optimal);
        }

        let mut leaving = None;
        let mut min_ratio = f64::INFINITY;
        for i in first..self.table.nrows() {
            let entry = self.table[[i, col]];
            if entry > tolerances.pivot_entry {
                let ratio = self.table[[i, rhs]] / entry;
                if ratio < min_ratio {
                    min_ratio = ratio;
                    leaving = Some(i);
                }
            }
        }
        let row = leaving.ok_or(Error::Unbounded)?;

        pivot(&mut self.table, row, col);
        self.basis[row - first] = col;
        self.pivots += 1;
        Ok(Step::Pivoted { row, col })
    }

    /// Pivots until optimal and returns the number of pivots taken.
    pub fn optimize(&mut self, phase: Phase, settings: &SolverSettings) -> Result<usize> {
        let mut count = 0;
        loop {
            match self.advance(phase, &settings.tolerances)? {
                Step::Optimal => return Ok(count),
                Step::Pivoted { row, col } => {
                    trace!("pivot {} on row {} column {}", count, row, col);
                    count += 1;
                    if count > settings.max_pivots {
                        return Err(Error::PivotLimit(settings.max_pivots));
                    }
                }
            }
        }
    }

    /// Brings the tableau into canonical form for the current basis.
    ///
    /// Equivalent to left-multiplying by the inverse of `[e1 | T(:, basis)]`,
    /// computed by Gauss-Jordan elimination with partial pivoting. Rows are
    /// reordered so that `basis[k]` ends up basic in row `k + 1`; the
    /// objective row is reduced as well.
    pub fn canonicalize(&mut self, tolerances: &Tolerances) -> Result<()> {
        let m = self.basis.len();
        if self.table.nrows() != m + 1 {
            return Err(Error::invalid_input(format!(
                "tableau has {} constraint rows for a basis of {}",
                self.table.nrows() - 1,
                m
            )));
        }
        for k in 0..m {
            let col = self.basis[k];
            let target = k + 1;
            let (best_row, best_abs) = (target..=m)
                .map(|r| (r, self.table[[r, col]].abs()))
                .fold((target, 0.0), |acc, cur| if cur.1 > acc.1 { cur } else { acc });
            if best_abs <= tolerances.pivot_entry {
                return Err(Error::SingularBasis(k));
            }
            matrix::swap_rows(&mut self.table, target, best_row);
            pivot(&mut self.table, target, col);
        }
        Ok(())
    }

    /// Sets negative right-hand sides of the constraint rows to zero.
    pub fn clamp_basic_values(&mut self) {
        let rhs = self.rhs_col();
        self.table
            .slice_mut(s![1.., rhs])
            .mapv_inplace(|v| v.max(0.0));
    }

    /// Shifts the basic variable at `position` by `delta` and restores
    /// feasibility if it became negative.
    ///
    /// A negative value is repaired by a phase one that minimises the
    /// negated variable; the problem is infeasible if that minimum stays
    /// positive.
    pub fn quick_return_to_feasibility(
        &mut self,
        position: usize,
        delta: f64,
        settings: &SolverSettings,
    ) -> Result<Repair> {
        let rhs = self.rhs_col();
        let row = position + 1;
        let col = self.basis[position];

        self.table[[row, rhs]] += delta;
        if self.table[[row, rhs]] >= 0.0 {
            return Ok(Repair::Feasible);
        }

        self.table.row_mut(row).mapv_inplace(|v| -v);
        self.table.column_mut(col).mapv_inplace(|v| -v);
        let mut cost = self.table.row(row).mapv(|v| -v);
        cost[col] = 0.0;

        let mut phase_one = Tableau::new(
            matrix::prepend_row(&self.table, cost.view())?,
            self.basis.clone(),
        );
        let outcome = phase_one.optimize(Phase::One, settings);
        self.pivots += phase_one.pivots;
        outcome?;
        if phase_one.table[[0, rhs]] < -settings.tolerances.phase_one_feasibility {
            return Ok(Repair::Infeasible);
        }

        self.table = matrix::remove_row(&phase_one.table, 0);
        self.basis = phase_one.basis;
        self.table.column_mut(col).mapv_inplace(|v| -v);
        if let Some(p) = self.position(col) {
            let r = p + 1;
            self.table.row_mut(r).mapv_inplace(|v| -v);
            self.table[[r, rhs]] = 0.0;
        }
        Ok(Repair::Feasible)
    }

    /// Restores feasibility after every variable `j` is shifted by `delta[j]`.
    ///
    /// Two auxiliary columns are appended: a progress variable `y` carrying
    /// the change of the right-hand side and a slack `z` with `y + z = 1`.
    /// Starting from the old basis plus `z`, phase one drives `z` to zero; at
    /// `y = 1` the tableau describes the shifted problem and both columns,
    /// the row of `y` and the auxiliary cost row are dropped.
    pub fn return_to_feasibility(
        &mut self,
        delta: &Array1<f64>,
        settings: &SolverSettings,
    ) -> Result<Repair> {
        let n = self.rhs_col();
        if delta.len() != n {
            return Err(Error::invalid_input(format!(
                "shift of length {} for a tableau with {} columns",
                delta.len(),
                n
            )));
        }
        let tolerances = &settings.tolerances;
        let (y, z, rhs) = (n, n + 1, n + 2);
        let rows = self.table.nrows();

        let body = self.table.slice(s![.., ..n]);
        let progress = body.dot(delta).mapv(|v| -v);
        let mut table: Array2<f64> = Array2::zeros((rows + 2, n + 3));
        table[[0, y]] = -1.0;
        table[[0, rhs]] = -1.0;
        table.slice_mut(s![1..=rows, ..n]).assign(&body);
        table.slice_mut(s![1..=rows, y]).assign(&progress);
        table
            .slice_mut(s![1..=rows, rhs])
            .assign(&self.table.column(n));
        table[[rows + 1, y]] = 1.0;
        table[[rows + 1, z]] = 1.0;
        table[[rows + 1, rhs]] = 1.0;

        let mut basis = self.basis.clone();
        basis.push(z);
        let mut phase_one = Tableau::new(table, basis);
        let outcome = phase_one.optimize(Phase::One, settings);
        self.pivots += phase_one.pivots;
        outcome?;

        if let Some(qz) = phase_one.position(z) {
            if phase_one.table[[0, rhs]] < -tolerances.phase_one_feasibility {
                return Ok(Repair::Infeasible);
            }
            // z is basic at zero: swap it out degenerately
            let row = qz + 2;
            let entering = (0..=n)
                .filter(|j| !phase_one.basis.contains(j))
                .map(|j| (j, phase_one.table[[row, j]].abs()))
                .fold(None, |best: Option<(usize, f64)>, cur| match best {
                    Some(b) if b.1 >= cur.1 => Some(b),
                    _ => Some(cur),
                });
            match entering {
                Some((j, magnitude)) if magnitude > tolerances.pivot_entry => {
                    pivot(&mut phase_one.table, row, j);
                    phase_one.basis[qz] = j;
                }
                _ => return Ok(Repair::Infeasible),
            }
        }

        let qy = phase_one.position(y).ok_or(Error::SingularBasis(y))?;
        let table = matrix::remove_rows(&phase_one.table, &[0, qy + 2]);
        self.table = matrix::remove_cols(&table, &[y, z]);
        phase_one.basis.remove(qy);
        self.basis = phase_one.basis;
        Ok(Repair::Feasible)
    }

    /// Pivots the basic variable at `position` out of the basis on the
    /// non-basic column with the largest entry in its row.
    ///
    /// Returns false when the row has no usable entry.
    pub fn drive_out(&mut self, position: usize, tolerances: &Tolerances) -> bool {
        let row = position + 1;
        let entering = (0..self.rhs_col())
            .filter(|j| !self.basis.contains(j))
            .map(|j| (j, self.table[[row, j]].abs()))
            .fold(None, |best: Option<(usize, f64)>, cur| match best {
                Some(b) if b.1 >= cur.1 => Some(b),
                _ => Some(cur),
            });
        match entering {
            Some((j, magnitude)) if magnitude > tolerances.pivot_entry => {
                pivot(&mut self.table, row, j);
                self.basis[position] = j;
                self.pivots += 1;
                true
            }
            _ => false,
        }
    }

    /// Drops the constraint row owned by the basic variable at `position`.
    pub fn remove_basic_row(&mut self, position: usize) {
        self.table = matrix::remove_row(&self.table, position + 1);
        self.basis.remove(position);
    }

    /// Drops a non-basic column and renumbers the basis.
    pub fn remove_column(&mut self, col: usize) {
        self.table = matrix::remove_col(&self.table, col);
        for b in self.basis.iter_mut() {
            if *b > col {
                *b -= 1;
            }
        }
    }
}

/// Pivots `table` on (`row`, `col`): normalises the row and eliminates the
/// column from every other row, the objective rows included.
pub fn pivot(table: &mut Array2<f64>, row: usize, col: usize) {
    let p = table[[row, col]];
    table.row_mut(row).mapv_inplace(|v| v / p);
    let pivot_row = table.row(row).to_owned();
    for (i, mut current) in table.axis_iter_mut(Axis(0)).enumerate() {
        if i == row {
            continue;
        }
        let factor = current[col];
        if factor != 0.0 {
            current.scaled_add(-factor, &pivot_row);
            current[col] = 0.0;
        }
    }
    table[[row, col]] = 1.0;
}
