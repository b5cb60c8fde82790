//! Row-oriented helpers over `nalgebra::DMatrix`.
//!
//! Tables grow and shrink along the epoch axis only; the channel axis is fixed by the
//! wavelength grid of the dataset.
use nalgebra::{DMatrix, Scalar};

/// Stack `bottom` under `top`. An empty `top` adopts the width of `bottom`.
pub fn vstack<T: Scalar>(top: &DMatrix<T>, bottom: &DMatrix<T>) -> DMatrix<T> {
    if top.nrows() == 0 {
        return bottom.clone();
    }
    if bottom.nrows() == 0 {
        return top.clone();
    }
    let n = top.nrows();
    DMatrix::from_fn(n + bottom.nrows(), top.ncols(), |i, j| {
        if i < n {
            top[(i, j)].clone()
        } else {
            bottom[(i - n, j)].clone()
        }
    })
}

/// Rows `rows` of `m`, in the given order.
pub fn take_rows<T: Scalar>(m: &DMatrix<T>, rows: &[usize]) -> DMatrix<T> {
    DMatrix::from_fn(rows.len(), m.ncols(), |i, j| m[(rows[i], j)].clone())
}

/// `(values.len(), wl.len())` matrix of `values[i] / wl[j]`.
pub fn per_channel(values: &[f64], wl: &[f64]) -> DMatrix<f64> {
    DMatrix::from_fn(values.len(), wl.len(), |i, j| values[i] / wl[j])
}

/// Element-wise map of two same-shape matrices.
pub fn zip_map(
    a: &DMatrix<f64>,
    b: &DMatrix<f64>,
    f: impl Fn(f64, f64) -> f64,
) -> DMatrix<f64> {
    DMatrix::from_fn(a.nrows(), a.ncols(), |i, j| f(a[(i, j)], b[(i, j)]))
}

/// Spatial-frequency quantities of a baseline on a wavelength grid.
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    pub u_wl: DMatrix<f64>,
    pub v_wl: DMatrix<f64>,
    pub b_wl: DMatrix<f64>,
    /// Position angle in degrees, `atan2(u, v)`.
    pub pa: DMatrix<f64>,
}

impl Projection {
    pub fn new(u: &[f64], v: &[f64], wl: &[f64]) -> Self {
        let u_wl = per_channel(u, wl);
        let v_wl = per_channel(v, wl);
        let b_wl = zip_map(&u_wl, &v_wl, f64::hypot);
        let pa = zip_map(&u_wl, &v_wl, |x, y| x.atan2(y).to_degrees());
        Projection {
            u_wl,
            v_wl,
            b_wl,
            pa,
        }
    }

    pub fn empty(n_rows: usize, n_channels: usize) -> Self {
        Projection {
            u_wl: DMatrix::zeros(n_rows, n_channels),
            v_wl: DMatrix::zeros(n_rows, n_channels),
            b_wl: DMatrix::zeros(n_rows, n_channels),
            pa: DMatrix::zeros(n_rows, n_channels),
        }
    }
}

/// Rows of `src` selected by `rows`, appended to a vector.
pub fn take<T: Clone>(src: &[T], rows: &[usize]) -> Vec<T> {
    rows.iter().map(|&i| src[i].clone()).collect()
}
