use std::sync::Arc;

/// Core spatial transformation interface.
///
/// Implementations may not perform any bounds checks on the input,
/// as these transformations generally happen in performance-critical hot loops.
/// Therefore, they may panic if coordinates or output buffers of incorrect length are given.
///
/// Mapping a point can fail, e.g. because it lies outside the domain of a deformation
/// or because a numerical inversion did not converge.
/// Failure is reported through the returned validity flag rather than an error;
/// the contents of the output buffer are then unspecified.
pub trait Transformation: std::fmt::Debug + Send + Sync {
    /// Transform a single point from the input space to the output space.
    /// Writes to a pre-allocated output buffer and returns whether the mapping is valid.
    fn transform_into(&self, pt: &[f64], buf: &mut [f64]) -> bool;

    /// Transform multiple points from the input space into the output space.
    /// Writes to pre-allocated output buffers and validity flags.
    ///
    /// The trait default implementation simply calls [Transformation::transform_into] in turn;
    /// specific transforms may override it.
    fn bulk_transform_into(&self, pts: &[&[f64]], bufs: &mut [&mut [f64]], valid: &mut [bool]) {
        for ((pt, buf), v) in pts.iter().zip(bufs.iter_mut()).zip(valid.iter_mut()) {
            *v = self.transform_into(pt, buf);
        }
    }

    /// Transform multiple points given in columnar format.
    /// Writes to pre-allocated output buffers and validity flags.
    ///
    /// The trait implementation is inefficient,
    /// simply wrapping [Transformation::transform_into],
    /// and should be overridden by implementors where optimisations are available.
    fn column_transform_into(
        &self,
        columns: &[&[f64]],
        bufs: &mut [&mut [f64]],
        valid: &mut [bool],
    ) {
        let Some(n_pts) = columns.first().map(|c| c.len()) else {
            return;
        };
        let mut in_pt = vec![f64::NAN; self.input_ndim()];
        let mut out_pt = vec![f64::NAN; self.output_ndim()];
        for (pt_idx, v) in valid.iter_mut().enumerate().take(n_pts) {
            for (idx, col) in columns.iter().enumerate() {
                in_pt[idx] = col[pt_idx];
            }
            *v = self.transform_into(&in_pt, &mut out_pt);
            for (out_col, p) in bufs.iter_mut().zip(out_pt.iter()) {
                out_col[pt_idx] = *p;
            }
        }
    }

    /// Return the inverse transformation, if it exists.
    ///
    /// Inverses need not be closed-form:
    /// a deformation's inverse may be solved numerically per point.
    fn invert(&self) -> Option<Arc<dyn Transformation>>;

    /// Whether this transformation represents the identity,
    /// i.e. input and output are the same number of dimensions
    /// and the coordinate values (and positions) are not changed.
    ///
    /// `true` means it definitely is an identity.
    /// For certain transformations, checking for identity may be very expensive;
    /// these should return `false` and users should be aware that a `false` value is not definitive.
    fn is_identity(&self) -> bool;

    fn input_ndim(&self) -> usize;

    fn output_ndim(&self) -> usize;
}
