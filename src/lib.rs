//! Map 3D points through chains of CMTK registrations.
//!
//! A [Chain] is an ordered list of transformations,
//! each an [Affine] or a cubic B-spline [SplineWarp],
//! applied either forward or inverted.
//! Transformations are read from CMTK's typedstream files by a [Loader].
//! Points which cannot be mapped (outside a warp's domain,
//! or where a numerical inversion does not converge)
//! are reported as missing rather than failing the whole batch.
use smallvec::SmallVec;

#[cfg(test)]
mod tests;

mod error;
pub use error::{Error, Result};

mod traits;
pub use traits::Transformation;

mod matrix;
pub use matrix::Matrix;

mod transforms;
pub use transforms::{
    Affine, AffineParams, InverseSplineWarp, MAX_INVERSION_ITERATIONS, N_PARAMS, SplineWarp,
};

mod xform;
pub use xform::{InvertibleXform, Xform};

mod chain;
pub use chain::{Chain, ChainBuilder, ChainEntry};

pub mod batch;
pub use batch::{MISSING, MappedPoints, PointMapper, map_points};

pub mod points;

pub mod io;
pub use io::{FileLoader, LoadedXform, Loader, MemoryLoader, affine_from_path};

mod stream;
pub use stream::{StreamOptions, build_chain, parse_reglist, stream_xform, stream_xform_flat};

pub mod handle;
pub use handle::{ChainHandle, ChainRegistry, chain_apply, chain_create, chain_release};

#[cfg(feature = "ndarray")]
mod ndarr;
#[cfg(feature = "ndarray")]
pub use ndarr::stream_xform_array;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default residual tolerance when numerically inverting warps.
pub const DEFAULT_EPSILON: f64 = 1e-8;

pub const COORD_SIZE: usize = 6;

/// A short vector type alias for convenience,
/// which may be replaced by arrayvec/smallvec/tinyvec in future
/// as an optimisation.
type ShortVec<T> = SmallVec<[T; COORD_SIZE]>;
