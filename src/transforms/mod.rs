mod affine;
pub use affine::Affine;

mod params;
pub use params::{AffineParams, N_PARAMS};

mod spline_warp;
pub use spline_warp::{InverseSplineWarp, MAX_INVERSION_ITERATIONS, SplineWarp};
