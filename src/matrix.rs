use std::ops::{Index, IndexMut};

use crate::{Error, Result, ShortVec};

/// Dense matrix of small dimensionality, e.g. the linear part of an affine transform
/// or a 4x4 homogeneous matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    /// Row-major / C-ordered matrix data.
    data: Vec<f64>,
    nrows: usize,
    ncols: usize,
}

impl AsRef<Matrix> for Matrix {
    fn as_ref(&self) -> &Matrix {
        self
    }
}

impl Index<(usize, usize)> for Matrix {
    type Output = f64;

    fn index(&self, index: (usize, usize)) -> &Self::Output {
        self.get(index.0, index.1)
            .expect("index should be in bounds")
    }
}

impl IndexMut<(usize, usize)> for Matrix {
    fn index_mut(&mut self, index: (usize, usize)) -> &mut Self::Output {
        let ncols = self.ncols;
        assert!(index.1 < ncols, "index should be in bounds");
        &mut self.data[index.0 * ncols + index.1]
    }
}

impl Matrix {
    /// Row-major/ C order data
    pub fn try_new(data: Vec<f64>, ncols: usize) -> Result<Self> {
        if ncols == 0 || data.len() % ncols != 0 {
            return Err(Error::dimension(format!(
                "matrix data length {} is not divisible by ncols {}",
                data.len(),
                ncols
            )));
        }
        let nrows = data.len() / ncols;
        Ok(Self { data, nrows, ncols })
    }

    /// Column-major/ Fortran order data, as R and most linear algebra libraries store it.
    pub fn try_new_colmaj(data: Vec<f64>, nrows: usize) -> Result<Self> {
        if nrows == 0 || data.len() % nrows != 0 {
            return Err(Error::dimension(format!(
                "matrix data length {} is not divisible by nrows {}",
                data.len(),
                nrows
            )));
        }
        let ncols = data.len() / nrows;
        let transposed = Self {
            data,
            nrows: ncols,
            ncols: nrows,
        };
        Ok(transposed.transpose())
    }

    pub fn from_rows<const N: usize>(rows: &[[f64; N]]) -> Self {
        Self {
            data: rows.iter().flat_map(|r| r.iter().copied()).collect(),
            nrows: rows.len(),
            ncols: N,
        }
    }

    pub fn identity(ndim: usize) -> Self {
        let mut data = vec![0.0; ndim * ndim];
        for idx in 0..ndim {
            data[idx * ndim + idx] = 1.0;
        }
        Self {
            data,
            nrows: ndim,
            ncols: ndim,
        }
    }

    pub fn transpose(&self) -> Matrix {
        let mut data = vec![0.0; self.data.len()];
        for r in 0..self.nrows {
            for c in 0..self.ncols {
                data[c * self.nrows + r] = self[(r, c)];
            }
        }
        Matrix {
            data,
            nrows: self.ncols,
            ncols: self.nrows,
        }
    }

    pub fn matmul(&self, coord: &[f64]) -> ShortVec<f64> {
        let mut result = smallvec::smallvec![f64::NAN; self.nrows];
        self.matmul_into(coord, &mut result);
        result
    }

    pub fn matmul_into(&self, coord: &[f64], buf: &mut [f64]) {
        buf.fill(0.0);
        for (idx, d) in self.data.iter().enumerate() {
            let r = idx / self.ncols;
            let c = idx % self.ncols;
            buf[r] += d * coord[c];
        }
    }

    /// N.B. Coordinate "columns" are the _rows_ of the input and output matrices.
    pub fn matmul_transposed_into(&self, coord_cols: &[&[f64]], buf: &mut [&mut [f64]]) {
        for (out_dim_idx, buf_col) in buf.iter_mut().enumerate() {
            buf_col.fill(0.0);
            let row_start = out_dim_idx * self.ncols;
            let row = &self.data[row_start..(row_start + self.ncols)];
            for (mat_val, coord_col) in row.iter().zip(coord_cols.iter()) {
                // our hottest loop is iterating over long arrays in lock step
                for (c, b) in coord_col.iter().zip(buf_col.iter_mut()) {
                    *b += c * mat_val;
                }
            }
        }
    }

    /// Matrix product `self * other`.
    pub fn mul(&self, other: &Matrix) -> Result<Matrix> {
        if self.ncols != other.nrows {
            return Err(Error::dimension(format!(
                "cannot multiply {}x{} by {}x{} matrix",
                self.nrows, self.ncols, other.nrows, other.ncols
            )));
        }
        let mut out = vec![0.0; self.nrows * other.ncols];
        for r in 0..self.nrows {
            for k in 0..self.ncols {
                let a = self[(r, k)];
                for c in 0..other.ncols {
                    out[r * other.ncols + c] += a * other[(k, c)];
                }
            }
        }
        Ok(Matrix {
            data: out,
            nrows: self.nrows,
            ncols: other.ncols,
        })
    }

    pub fn get(&self, row: usize, col: usize) -> Option<&f64> {
        if col >= self.ncols {
            return None;
        }
        self.data.get(row * self.ncols + col)
    }

    pub fn row(&self, row: usize) -> &[f64] {
        &self.data[row * self.ncols..(row + 1) * self.ncols]
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    pub fn is_square(&self) -> bool {
        self.nrows == self.ncols
    }

    pub fn is_identity(&self) -> bool {
        if !self.is_square() {
            return false;
        }
        self.data.iter().enumerate().all(|(idx, v)| {
            let expected = if idx / self.ncols == idx % self.ncols {
                1.0
            } else {
                0.0
            };
            *v == expected
        })
    }

    /// Row-major copy of the data.
    pub fn to_vec(&self) -> Vec<f64> {
        self.data.clone()
    }

    fn require_square(&self, op: &str) -> Result<()> {
        if !self.is_square() {
            return Err(Error::dimension(format!(
                "{op} only defined for square matrices, got {}x{}",
                self.nrows, self.ncols
            )));
        }
        Ok(())
    }

    /// Determinant by LU decomposition with partial pivoting.
    pub fn determinant(&self) -> Result<f64> {
        self.require_square("determinant")?;
        let n = self.nrows;
        let mut lu = self.data.clone();
        let mut det = 1.0;
        for col in 0..n {
            let pivot_row = (col..n)
                .max_by(|a, b| lu[a * n + col].abs().total_cmp(&lu[b * n + col].abs()))
                .unwrap_or(col);
            let pivot = lu[pivot_row * n + col];
            if pivot == 0.0 {
                return Ok(0.0);
            }
            if pivot_row != col {
                swap_rows(&mut lu, n, pivot_row, col);
                det = -det;
            }
            det *= pivot;
            for r in (col + 1)..n {
                let factor = lu[r * n + col] / pivot;
                for c in col..n {
                    lu[r * n + c] -= factor * lu[col * n + c];
                }
            }
        }
        Ok(det)
    }

    /// Inverse by Gauss-Jordan elimination with partial pivoting.
    ///
    /// Pivots which are negligible relative to the largest matrix entry
    /// are treated as exact zeros.
    pub fn inverse(&self) -> Result<Matrix> {
        self.require_square("inverse")?;
        let n = self.nrows;
        let scale = self.data.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
        if scale == 0.0 || !scale.is_finite() {
            return Err(Error::singular(format!("{n}x{n} matrix has no finite non-zero entry")));
        }
        let tolerance = scale * n as f64 * f64::EPSILON;

        let mut work = self.data.clone();
        let mut inv = Matrix::identity(n).data;
        for col in 0..n {
            let pivot_row = (col..n)
                .max_by(|a, b| work[a * n + col].abs().total_cmp(&work[b * n + col].abs()))
                .unwrap_or(col);
            let pivot = work[pivot_row * n + col];
            if pivot.abs() <= tolerance {
                return Err(Error::singular(format!(
                    "{n}x{n} matrix has no usable pivot in column {col}"
                )));
            }
            swap_rows(&mut work, n, pivot_row, col);
            swap_rows(&mut inv, n, pivot_row, col);

            for c in 0..n {
                work[col * n + c] /= pivot;
                inv[col * n + c] /= pivot;
            }
            for r in 0..n {
                if r == col {
                    continue;
                }
                let factor = work[r * n + col];
                if factor == 0.0 {
                    continue;
                }
                for c in 0..n {
                    work[r * n + c] -= factor * work[col * n + c];
                    inv[r * n + c] -= factor * inv[col * n + c];
                }
            }
        }
        Ok(Matrix {
            data: inv,
            nrows: n,
            ncols: n,
        })
    }

    /// QR decomposition of a square matrix by modified Gram-Schmidt.
    ///
    /// Returns `(Q, R)` where `Q` has orthonormal columns
    /// and `R` is upper triangular with a positive diagonal.
    pub fn qr(&self) -> Result<(Matrix, Matrix)> {
        self.require_square("QR decomposition")?;
        let n = self.nrows;
        let scale = self.data.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
        let tolerance = scale * n as f64 * f64::EPSILON;

        let mut q = self.clone();
        let mut r = Matrix {
            data: vec![0.0; n * n],
            nrows: n,
            ncols: n,
        };
        for k in 0..n {
            let norm = (0..n).map(|i| q[(i, k)] * q[(i, k)]).sum::<f64>().sqrt();
            if norm.is_nan() || norm <= tolerance {
                return Err(Error::singular(format!(
                    "column {k} of {n}x{n} matrix is linearly dependent"
                )));
            }
            r[(k, k)] = norm;
            for i in 0..n {
                q[(i, k)] /= norm;
            }
            for j in (k + 1)..n {
                let dot: f64 = (0..n).map(|i| q[(i, k)] * q[(i, j)]).sum();
                r[(k, j)] = dot;
                for i in 0..n {
                    let qik = q[(i, k)];
                    q[(i, j)] -= dot * qik;
                }
            }
        }
        Ok((q, r))
    }
}

fn swap_rows(data: &mut [f64], ncols: usize, a: usize, b: usize) {
    if a == b {
        return;
    }
    for c in 0..ncols {
        data.swap(a * ncols + c, b * ncols + c);
    }
}
