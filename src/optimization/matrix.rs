//! Index-compaction helpers for the dense row-major tableaus.
//!
//! Removing a row or a column always produces a new, densely packed
//! matrix; positions after the removed index shift down by one.

use ndarray::{concatenate, Array1, Array2, ArrayView1, Axis};

use crate::error::Result;

/// Returns a copy of `matrix` without the given row.
pub fn remove_row(matrix: &Array2<f64>, row: usize) -> Array2<f64> {
    let keep: Vec<usize> = (0..matrix.nrows()).filter(|&i| i != row).collect();
    matrix.select(Axis(0), &keep)
}

/// Returns a copy of `matrix` without the given column.
pub fn remove_col(matrix: &Array2<f64>, col: usize) -> Array2<f64> {
    let keep: Vec<usize> = (0..matrix.ncols()).filter(|&j| j != col).collect();
    matrix.select(Axis(1), &keep)
}

/// Removes every row listed in `rows`; duplicates and order do not matter.
pub fn remove_rows(matrix: &Array2<f64>, rows: &[usize]) -> Array2<f64> {
    let keep: Vec<usize> = (0..matrix.nrows()).filter(|i| !rows.contains(i)).collect();
    matrix.select(Axis(0), &keep)
}

/// Removes every column listed in `cols`; duplicates and order do not matter.
pub fn remove_cols(matrix: &Array2<f64>, cols: &[usize]) -> Array2<f64> {
    let keep: Vec<usize> = (0..matrix.ncols()).filter(|j| !cols.contains(j)).collect();
    matrix.select(Axis(1), &keep)
}

/// Puts `row` on top of `matrix`.
pub fn prepend_row<'a>(matrix: &'a Array2<f64>, row: ArrayView1<'a, f64>) -> Result<Array2<f64>> {
    let top = row.insert_axis(Axis(0));
    Ok(concatenate(Axis(0), &[top, matrix.view()])?)
}

/// Swaps two rows in place.
pub fn swap_rows(matrix: &mut Array2<f64>, a: usize, b: usize) {
    if a == b {
        return;
    }
    for j in 0..matrix.ncols() {
        matrix.swap((a, j), (b, j));
    }
}

/// Element-wise sign, with zero mapped to zero.
pub fn signum(values: &Array1<f64>) -> Array1<f64> {
    values.mapv(|v| {
        if v > 0.0 {
            1.0
        } else if v < 0.0 {
            -1.0
        } else {
            0.0
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array};

    fn sample() -> Array2<f64> {
        Array::from_shape_vec((3, 4), (0..12).map(f64::from).collect()).unwrap()
    }

    #[test]
    fn test_remove_row_and_col() {
        let m = sample();
        assert_eq!(remove_row(&m, 1), array![[0.0, 1.0, 2.0, 3.0], [8.0, 9.0, 10.0, 11.0]]);
        assert_eq!(
            remove_col(&m, 0),
            array![[1.0, 2.0, 3.0], [5.0, 6.0, 7.0], [9.0, 10.0, 11.0]]
        );
    }

    #[test]
    fn test_remove_many_ignores_order() {
        let m = sample();
        assert_eq!(remove_cols(&m, &[3, 1]), remove_cols(&m, &[1, 3]));
        assert_eq!(remove_rows(&m, &[0, 2]), array![[4.0, 5.0, 6.0, 7.0]]);
    }

    #[test]
    fn test_prepend_row() {
        let m = array![[1.0, 2.0], [3.0, 4.0]];
        let row = array![9.0, 9.0];
        let grown = prepend_row(&m, row.view()).unwrap();
        assert_eq!(grown.row(0), row);
        assert_eq!(grown.row(2), m.row(1));
    }

    #[test]
    fn test_swap_rows_and_signum() {
        let mut m = array![[1.0, 2.0], [3.0, 4.0]];
        swap_rows(&mut m, 0, 1);
        assert_eq!(m, array![[3.0, 4.0], [1.0, 2.0]]);
        assert_eq!(signum(&array![-2.0, 0.0, 0.5]), array![-1.0, 0.0, 1.0]);
    }
}
