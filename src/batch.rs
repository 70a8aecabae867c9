//! Mapping batches of points through a chain.
//!
//! Points are independent: a point whose mapping fails is reported as missing
//! without affecting any other point.
use crate::Chain;

/// Fills every coordinate of a point which could not be mapped.
pub const MISSING: f64 = f64::NAN;

/// Below this many points, parallel mapping is not worth the overhead.
#[cfg(feature = "rayon")]
const MIN_PARALLEL_POINTS: usize = 64;

/// Map every point through the chain, with default settings.
pub fn map_points(chain: &Chain, points: &[[f64; 3]]) -> Vec<Option<[f64; 3]>> {
    PointMapper::new(chain).map_points(points).into_inner()
}

#[derive(Debug, Clone, Copy)]
pub struct PointMapper<'a> {
    chain: &'a Chain,
    parallel: bool,
}

impl<'a> PointMapper<'a> {
    /// Parallel if the `rayon` feature is enabled.
    pub fn new(chain: &'a Chain) -> Self {
        Self {
            chain,
            parallel: cfg!(feature = "rayon"),
        }
    }

    /// Has no effect without the `rayon` feature.
    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn chain(&self) -> &Chain {
        self.chain
    }

    /// Results are in input order.
    pub fn map_points(&self, points: &[[f64; 3]]) -> MappedPoints {
        #[cfg(feature = "rayon")]
        if self.parallel && points.len() >= MIN_PARALLEL_POINTS {
            use rayon::prelude::*;

            return MappedPoints(
                points
                    .par_iter()
                    .map(|p| self.chain.map_point(p))
                    .collect(),
            );
        }
        MappedPoints(points.iter().map(|p| self.chain.map_point(p)).collect())
    }
}

/// Mapped points in input order; `None` where mapping failed.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MappedPoints(Vec<Option<[f64; 3]>>);

impl MappedPoints {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn n_invalid(&self) -> usize {
        self.0.iter().filter(|p| p.is_none()).count()
    }

    pub fn as_slice(&self) -> &[Option<[f64; 3]>] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<Option<[f64; 3]>> {
        self.0
    }

    /// One row per point, with [MISSING] in every coordinate of failed points.
    pub fn to_rows(&self) -> Vec<[f64; 3]> {
        self.0.iter().map(|p| p.unwrap_or([MISSING; 3])).collect()
    }
}

impl From<Vec<Option<[f64; 3]>>> for MappedPoints {
    fn from(value: Vec<Option<[f64; 3]>>) -> Self {
        Self(value)
    }
}

impl IntoIterator for MappedPoints {
    type Item = Option<[f64; 3]>;
    type IntoIter = std::vec::IntoIter<Option<[f64; 3]>>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}
