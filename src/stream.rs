//! One-call mapping of point batches through a chain described by string tokens.
//!
//! A registration list is a sequence of specifiers,
//! each optionally preceded by `--inverse` (or `-i`).
//! The first specifier is applied first.
use crate::{
    Chain, ChainEntry, DEFAULT_EPSILON, Error, Result,
    batch::PointMapper,
    io::{Loader, xform_list},
    points::{Layout, Points, flatten},
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamOptions {
    /// Residual tolerance for numerically-inverted warps.
    pub epsilon: f64,
    /// Replace every transformation by its affine component.
    pub affine_only: bool,
    /// Map points on the rayon thread pool (with the `rayon` feature).
    pub parallel: bool,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            epsilon: DEFAULT_EPSILON,
            affine_only: false,
            parallel: cfg!(feature = "rayon"),
        }
    }
}

impl StreamOptions {
    pub fn with_epsilon(mut self, epsilon: f64) -> Self {
        self.epsilon = epsilon;
        self
    }

    pub fn with_affine_only(mut self, affine_only: bool) -> Self {
        self.affine_only = affine_only;
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }
}

/// Pair each specifier with its inversion marker.
///
/// A trailing marker with nothing to invert is an [Error::Load].
pub fn parse_reglist<S: AsRef<str>>(reglist: &[S]) -> Result<Vec<ChainEntry>> {
    xform_list::parse_tokens(reglist.iter().map(|s| s.as_ref())).map_err(|reason| {
        let specifier = reglist.last().map(|s| s.as_ref()).unwrap_or_default();
        Error::load(specifier, reason)
    })
}

/// Parse, load, and configure a chain.
pub fn build_chain<S: AsRef<str>, L: Loader>(
    reglist: &[S],
    options: &StreamOptions,
    loader: &L,
) -> Result<Chain> {
    let entries = parse_reglist(reglist)?;
    let mut builder = Chain::builder();
    builder.set_epsilon(options.epsilon)?;
    for entry in entries.iter() {
        builder.add_specifier(&entry.specifier, entry.inverse, loader)?;
    }
    let chain = builder.build();
    if options.affine_only {
        chain.reduce_to_affine_only()
    } else {
        Ok(chain)
    }
}

/// Map points through the chain described by `reglist`.
///
/// Rows which cannot be mapped are filled with [crate::MISSING].
pub fn stream_xform<S: AsRef<str>, L: Loader>(
    points: &[[f64; 3]],
    reglist: &[S],
    options: &StreamOptions,
    loader: &L,
) -> Result<Vec<[f64; 3]>> {
    let chain = build_chain(reglist, options, loader)?;
    let mapped = PointMapper::new(&chain)
        .parallel(options.parallel)
        .map_points(points);
    log::debug!(
        "mapped {} points through {} transformations, {} invalid",
        mapped.len(),
        chain.len(),
        mapped.n_invalid()
    );
    Ok(mapped.to_rows())
}

/// As [stream_xform], for a flat `nrows` x `ncols` buffer.
/// The output has the same shape and layout.
///
/// The shape is checked before anything is loaded.
pub fn stream_xform_flat<S: AsRef<str>, L: Loader>(
    data: &[f64],
    nrows: usize,
    ncols: usize,
    layout: Layout,
    reglist: &[S],
    options: &StreamOptions,
    loader: &L,
) -> Result<Vec<f64>> {
    let points = Points::try_new(data, nrows, ncols, layout)?;
    let rows = stream_xform(&points.to_vec(), reglist, options, loader)?;
    Ok(flatten(&rows, layout))
}
