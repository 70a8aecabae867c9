//! Flat buffers of 3D points, as handed over by array-oriented callers.
use crate::{Error, Result};

/// How an N x 3 matrix of points is laid out in a flat buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Layout {
    /// Each point's coordinates are contiguous.
    #[default]
    RowMajor,
    /// Each coordinate's values are contiguous (e.g. R and Fortran matrices).
    ColumnMajor,
}

impl Layout {
    pub fn linear_idx(&self, nrows: usize, row: usize, col: usize) -> usize {
        match self {
            Self::RowMajor => row * 3 + col,
            Self::ColumnMajor => col * nrows + row,
        }
    }
}

/// A borrowed N x 3 matrix of points.
#[derive(Debug, Clone, Copy)]
pub struct Points<'a> {
    data: &'a [f64],
    nrows: usize,
    layout: Layout,
}

impl<'a> Points<'a> {
    pub fn try_new(data: &'a [f64], nrows: usize, ncols: usize, layout: Layout) -> Result<Self> {
        if ncols != 3 {
            return Err(Error::dimension(format!(
                "points must have 3 columns, got {ncols}"
            )));
        }
        if data.len() != nrows * ncols {
            return Err(Error::dimension(format!(
                "{nrows}x{ncols} points need {} values, got {}",
                nrows * ncols,
                data.len()
            )));
        }
        Ok(Self {
            data,
            nrows,
            layout,
        })
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn get(&self, row: usize) -> [f64; 3] {
        std::array::from_fn(|col| self.data[self.layout.linear_idx(self.nrows, row, col)])
    }

    pub fn to_vec(&self) -> Vec<[f64; 3]> {
        match self.layout {
            Layout::RowMajor => self
                .data
                .chunks_exact(3)
                .map(|c| [c[0], c[1], c[2]])
                .collect(),
            Layout::ColumnMajor => (0..self.nrows).map(|r| self.get(r)).collect(),
        }
    }
}

/// Flatten rows into a buffer with the given layout.
pub fn flatten(rows: &[[f64; 3]], layout: Layout) -> Vec<f64> {
    match layout {
        Layout::RowMajor => rows.iter().flatten().copied().collect(),
        Layout::ColumnMajor => (0..3)
            .flat_map(|col| rows.iter().map(move |r| r[col]))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROWS: [[f64; 3]; 2] = [[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]];

    #[test]
    fn test_layouts() {
        let rowmaj = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let colmaj = [1.0, 4.0, 2.0, 5.0, 3.0, 6.0];
        let a = Points::try_new(&rowmaj, 2, 3, Layout::RowMajor).unwrap();
        let b = Points::try_new(&colmaj, 2, 3, Layout::ColumnMajor).unwrap();
        assert_eq!(a.to_vec(), ROWS.to_vec());
        assert_eq!(b.to_vec(), ROWS.to_vec());
        assert_eq!(b.get(1), ROWS[1]);
        assert_eq!(flatten(&ROWS, Layout::RowMajor), rowmaj.to_vec());
        assert_eq!(flatten(&ROWS, Layout::ColumnMajor), colmaj.to_vec());
    }

    #[test]
    fn test_bad_shapes() {
        assert!(matches!(
            Points::try_new(&[0.0; 4], 2, 2, Layout::RowMajor),
            Err(Error::Dimension(_))
        ));
        assert!(matches!(
            Points::try_new(&[0.0; 5], 2, 3, Layout::ColumnMajor),
            Err(Error::Dimension(_))
        ));
        assert!(Points::try_new(&[], 0, 3, Layout::RowMajor).unwrap().to_vec().is_empty());
    }
}
