//! Error types for building chains and converting transformations.
//!
//! Per-point mapping failures are not errors:
//! they are reported as missing points in the mapped output.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// A transformation specifier could not be resolved.
    #[error("could not load transformation `{specifier}`: {reason}")]
    Load { specifier: String, reason: String },

    /// A matrix which must be inverted (or decomposed) is singular.
    #[error("singular matrix: {0}")]
    SingularMatrix(String),

    /// Caller-supplied points or parameters have the wrong shape.
    #[error("dimension mismatch: {0}")]
    Dimension(String),

    /// A retained chain handle is null, released, or unknown.
    #[error("invalid chain handle {0}")]
    InvalidHandle(u64),

    /// Inversion tolerances must be positive and finite.
    #[error("inversion tolerance must be positive and finite, got {0}")]
    InvalidEpsilon(f64),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn load(specifier: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Load {
            specifier: specifier.into(),
            reason: reason.into(),
        }
    }

    pub fn singular(msg: impl Into<String>) -> Self {
        Self::SingularMatrix(msg.into())
    }

    pub fn dimension(msg: impl Into<String>) -> Self {
        Self::Dimension(msg.into())
    }
}
