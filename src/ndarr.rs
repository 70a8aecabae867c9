//! Entry point for points held in an [ndarray] array of shape (N, 3).
use ndarray::{Array2, ArrayView2, Axis};

use crate::{Error, Loader, Result, StreamOptions, stream_xform};

/// Map each row of `points` through the chain described by `reglist`.
///
/// Rows which cannot be mapped are filled with [crate::MISSING].
pub fn stream_xform_array<S: AsRef<str>, L: Loader>(
    points: ArrayView2<f64>,
    reglist: &[S],
    options: &StreamOptions,
    loader: &L,
) -> Result<Array2<f64>> {
    if points.ncols() != 3 {
        return Err(Error::dimension(format!(
            "points must have 3 columns, got {}",
            points.ncols()
        )));
    }
    let rows: Vec<[f64; 3]> = points
        .axis_iter(Axis(0))
        .map(|r| [r[0], r[1], r[2]])
        .collect();
    let mapped = stream_xform(&rows, reglist, options, loader)?;
    Ok(Array2::from(mapped))
}
