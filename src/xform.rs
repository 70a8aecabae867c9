//! The kinds of transformation a chain can hold,
//! and the adapter which fixes the direction each one is applied in.
use std::sync::Arc;

use crate::{Affine, Result, SplineWarp, Transformation};

/// A transformation as read from a CMTK registration.
#[derive(Debug, Clone)]
pub enum Xform {
    Affine(Affine),
    Warp(SplineWarp),
}

impl Xform {
    pub fn is_affine(&self) -> bool {
        matches!(self, Self::Affine(_))
    }

    /// The affine component: the transform itself for affines,
    /// or the warp's initial/fitted affine.
    pub fn linear_part(&self) -> &Affine {
        match self {
            Self::Affine(a) => a,
            Self::Warp(w) => w.linear_part(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Affine(_) => "affine",
            Self::Warp(_) => "spline warp",
        }
    }
}

impl From<Affine> for Xform {
    fn from(value: Affine) -> Self {
        Self::Affine(value)
    }
}

impl From<SplineWarp> for Xform {
    fn from(value: SplineWarp) -> Self {
        Self::Warp(value)
    }
}

impl Transformation for Xform {
    fn transform_into(&self, pt: &[f64], buf: &mut [f64]) -> bool {
        match self {
            Self::Affine(a) => a.transform_into(pt, buf),
            Self::Warp(w) => w.transform_into(pt, buf),
        }
    }

    fn column_transform_into(
        &self,
        columns: &[&[f64]],
        bufs: &mut [&mut [f64]],
        valid: &mut [bool],
    ) {
        match self {
            Self::Affine(a) => a.column_transform_into(columns, bufs, valid),
            Self::Warp(w) => w.column_transform_into(columns, bufs, valid),
        }
    }

    fn invert(&self) -> Option<Arc<dyn Transformation>> {
        match self {
            Self::Affine(a) => a.invert(),
            Self::Warp(w) => w.invert(),
        }
    }

    fn is_identity(&self) -> bool {
        match self {
            Self::Affine(a) => a.is_identity(),
            Self::Warp(w) => w.is_identity(),
        }
    }

    fn input_ndim(&self) -> usize {
        3
    }

    fn output_ndim(&self) -> usize {
        3
    }
}

/// How an adapter maps points, resolved once at construction.
#[derive(Debug, Clone)]
enum Mapping {
    /// Forward affine, or the precomputed inverse of one.
    Affine(Affine),
    Forward(SplineWarp),
    Inverse(SplineWarp),
}

/// A transform together with the direction it is applied in.
#[derive(Debug, Clone)]
pub struct InvertibleXform {
    xform: Xform,
    inverse: bool,
    mapping: Mapping,
}

impl InvertibleXform {
    /// Fails with [crate::Error::SingularMatrix] if an inverted affine cannot be inverted.
    pub fn new(xform: Xform, inverse: bool) -> Result<Self> {
        let mapping = match (&xform, inverse) {
            (Xform::Affine(a), false) => Mapping::Affine(a.clone()),
            (Xform::Affine(a), true) => Mapping::Affine(a.try_invert()?),
            (Xform::Warp(w), false) => Mapping::Forward(w.clone()),
            (Xform::Warp(w), true) => Mapping::Inverse(w.clone()),
        };
        Ok(Self {
            xform,
            inverse,
            mapping,
        })
    }

    /// Forward application never fails to construct.
    pub fn forward(xform: Xform) -> Self {
        let mapping = match &xform {
            Xform::Affine(a) => Mapping::Affine(a.clone()),
            Xform::Warp(w) => Mapping::Forward(w.clone()),
        };
        Self {
            xform,
            inverse: false,
            mapping,
        }
    }

    pub fn xform(&self) -> &Xform {
        &self.xform
    }

    pub fn is_inverse(&self) -> bool {
        self.inverse
    }

    /// Map one point in the configured direction.
    ///
    /// Returns whether the mapping is valid;
    /// `epsilon` is only used by numerically-inverted warps.
    pub fn map_into(&self, pt: &[f64], buf: &mut [f64], epsilon: f64) -> bool {
        match &self.mapping {
            Mapping::Affine(a) => a.transform_into(pt, buf),
            Mapping::Forward(w) => w.transform_into(pt, buf),
            Mapping::Inverse(w) => match w.apply_inverse(pt, epsilon) {
                Some(x) => {
                    buf.copy_from_slice(&x);
                    true
                }
                None => false,
            },
        }
    }

    /// The affine actually applied, if this adapter's mapping is affine
    /// (already inverted for inverse adapters).
    pub fn effective_affine(&self) -> Option<&Affine> {
        match &self.mapping {
            Mapping::Affine(a) => Some(a),
            _ => None,
        }
    }

    /// The same transform applied in the other direction.
    pub fn flipped(&self) -> Result<Self> {
        Self::new(self.xform.clone(), !self.inverse)
    }

    /// The transform's linear part, applied in the same direction.
    pub fn to_affine_only(&self) -> Result<Self> {
        Self::new(Xform::Affine(self.xform.linear_part().clone()), self.inverse)
    }
}
