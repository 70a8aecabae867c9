use std::sync::Arc;

use smallvec::ToSmallVec;

use crate::{Error, Result, ShortVec, Transformation, matrix::Matrix};

/// An affine transformation `x -> Mx + t`.
#[derive(Debug, Clone, PartialEq)]
pub struct Affine {
    /// For a transform from N to M dimensions,
    /// this has M rows and N columns
    unaugmented: Matrix,
    translation: ShortVec<f64>,
}

impl Affine {
    pub fn try_new(unaugmented: Matrix, translation: &[f64]) -> Result<Self> {
        if unaugmented.nrows() != translation.len() {
            return Err(Error::dimension(format!(
                "affine matrix has {} rows but translation has {} elements",
                unaugmented.nrows(),
                translation.len()
            )));
        }
        Ok(Self {
            unaugmented,
            translation: translation.to_smallvec(),
        })
    }

    /// A 3D transform from the rows of its linear part and its translation.
    pub fn from_linear(linear: &[[f64; 3]; 3], translation: [f64; 3]) -> Self {
        Self {
            unaugmented: Matrix::from_rows(linear),
            translation: translation.to_smallvec(),
        }
    }

    pub fn identity(ndim: usize) -> Self {
        Self {
            unaugmented: Matrix::identity(ndim),
            translation: smallvec::smallvec![0.0; ndim],
        }
    }

    /// Create an Affine transform from an augmented matrix,
    /// i.e. which includes the translation as the last column
    /// and a bottom row of [0, 0, ..., 1].
    pub fn try_from_augmented(augmented: &Matrix) -> Result<Self> {
        if augmented.nrows() < 2 || augmented.ncols() < 2 {
            return Err(Error::dimension(format!(
                "augmented matrix must be at least 2x2, got {}x{}",
                augmented.nrows(),
                augmented.ncols()
            )));
        }
        let nrows = augmented.nrows() - 1;
        let ncols = augmented.ncols() - 1;

        for c in 0..=ncols {
            let expected = if c == ncols { 1.0 } else { 0.0 };
            if augmented[(nrows, c)] != expected {
                return Err(Error::dimension(
                    "bottom row of augmented matrix must be [0, ..., 0, 1]",
                ));
            }
        }

        let mut unaugmented_data = Vec::with_capacity(nrows * ncols);
        let mut translation = ShortVec::with_capacity(nrows);

        for r in 0..nrows {
            for c in 0..ncols {
                unaugmented_data.push(augmented[(r, c)]);
            }
            translation.push(augmented[(r, ncols)]);
        }

        let unaugmented = Matrix::try_new(unaugmented_data, ncols)?;

        Ok(Self {
            unaugmented,
            translation,
        })
    }

    /// The augmented matrix, with the translation as the last column
    /// and a bottom row of [0, 0, ..., 1].
    pub fn to_augmented(&self) -> Matrix {
        let nrows = self.unaugmented.nrows();
        let ncols = self.unaugmented.ncols();
        let mut data = Vec::with_capacity((nrows + 1) * (ncols + 1));
        for r in 0..nrows {
            data.extend_from_slice(self.unaugmented.row(r));
            data.push(self.translation[r]);
        }
        data.extend(std::iter::repeat_n(0.0, ncols));
        data.push(1.0);
        Matrix::try_new(data, ncols + 1).expect("augmented data has a whole number of rows")
    }

    pub fn matrix(&self) -> &Matrix {
        &self.unaugmented
    }

    pub fn translation(&self) -> &[f64] {
        &self.translation
    }

    /// Closed-form inverse; fails if the linear part is singular.
    pub fn try_invert(&self) -> Result<Affine> {
        let inv = self.unaugmented.inverse()?;
        let mut translation = inv.matmul(&self.translation);
        for t in translation.iter_mut() {
            *t = -*t;
        }
        Ok(Self {
            unaugmented: inv,
            translation,
        })
    }

    /// The transformation which applies `self` and then `next`.
    pub fn then(&self, next: &Affine) -> Result<Affine> {
        let unaugmented = next.unaugmented.mul(&self.unaugmented)?;
        let mut translation = next.unaugmented.matmul(&self.translation);
        for (t, n) in translation.iter_mut().zip(next.translation.iter()) {
            *t += n;
        }
        Ok(Self {
            unaugmented,
            translation,
        })
    }
}

impl Transformation for Affine {
    fn transform_into(&self, pt: &[f64], buf: &mut [f64]) -> bool {
        self.unaugmented.matmul_into(pt, buf);
        for (o, t) in buf.iter_mut().zip(self.translation.iter()) {
            *o += t;
        }
        true
    }

    fn input_ndim(&self) -> usize {
        self.unaugmented.ncols()
    }

    fn output_ndim(&self) -> usize {
        self.unaugmented.nrows()
    }

    fn invert(&self) -> Option<Arc<dyn Transformation>> {
        let inv = self.try_invert().ok()?;
        Some(Arc::new(inv))
    }

    fn is_identity(&self) -> bool {
        if self.translation.iter().any(|t| *t != 0.0) {
            return false;
        }
        self.unaugmented.is_identity()
    }

    fn column_transform_into(
        &self,
        columns: &[&[f64]],
        bufs: &mut [&mut [f64]],
        valid: &mut [bool],
    ) {
        self.unaugmented.matmul_transposed_into(columns, bufs);
        for (col, t) in bufs.iter_mut().zip(self.translation.iter()) {
            for c in col.iter_mut() {
                *c += t;
            }
        }
        valid.fill(true);
    }
}
