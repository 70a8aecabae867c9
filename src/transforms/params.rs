//! The 15-parameter decomposition of a 3D affine transformation,
//! in the convention of CMTK registration files.
//!
//! Parameters are grouped in triples, in this order:
//! translation, rotation (degrees), scale, shear, and centre.
//!
//! CMTK composes its matrix for row vectors (`x' = x L + t'`) as `L = S · R · H`,
//! where `S = diag(scale)` scales the rows of the rotation `R`
//! and `H` is upper unitriangular with
//! `H[0][1] = shear[0]`, `H[0][2] = shear[1]`, `H[1][2] = shear[2]`.
//! Rotation, scale and shear act about the centre `c`.
//! [Affine] acts on column vectors, so its linear part is `L^T`
//! and a point maps as `x -> L^T (x - c) + c + translation`.
use super::spline_warp::solve;
use crate::{Affine, Error, Matrix, Result};

pub const N_PARAMS: usize = 15;

/// Below this, `cos(rotation[1])` is treated as zero when extracting angles.
const GIMBAL_LOCK: f64 = 1e-9;

/// Newton iterations allowed when separating shear from rotation and scale.
const MAX_SHEAR_ITERATIONS: usize = 50;

/// Relative tolerance on the row products of the unsheared matrix.
const ORTHOGONALITY_TOLERANCE: f64 = 1e-13;

const ROW_PAIRS: [(usize, usize); 3] = [(0, 1), (0, 2), (1, 2)];

type Mat3 = [[f64; 3]; 3];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineParams {
    pub translation: [f64; 3],
    pub rotation: [f64; 3],
    pub scale: [f64; 3],
    pub shear: [f64; 3],
    pub center: [f64; 3],
}

impl Default for AffineParams {
    /// The identity transformation.
    fn default() -> Self {
        Self {
            translation: [0.0; 3],
            rotation: [0.0; 3],
            scale: [1.0; 3],
            shear: [0.0; 3],
            center: [0.0; 3],
        }
    }
}

impl AffineParams {
    pub fn from_array(params: [f64; N_PARAMS]) -> Self {
        let triple = |i: usize| [params[3 * i], params[3 * i + 1], params[3 * i + 2]];
        Self {
            translation: triple(0),
            rotation: triple(1),
            scale: triple(2),
            shear: triple(3),
            center: triple(4),
        }
    }

    pub fn from_slice(params: &[f64]) -> Result<Self> {
        let arr: [f64; N_PARAMS] = params.try_into().map_err(|_| {
            Error::dimension(format!(
                "expected {N_PARAMS} affine parameters, got {}",
                params.len()
            ))
        })?;
        Ok(Self::from_array(arr))
    }

    pub fn to_array(&self) -> [f64; N_PARAMS] {
        let mut out = [0.0; N_PARAMS];
        for (idx, triple) in self.to_rows().iter().enumerate() {
            out[3 * idx..3 * idx + 3].copy_from_slice(triple);
        }
        out
    }

    /// One row per parameter group.
    pub fn to_rows(&self) -> [[f64; 3]; 5] {
        [
            self.translation,
            self.rotation,
            self.scale,
            self.shear,
            self.center,
        ]
    }

    /// CMTK's row-vector linear part, `S · R · H`.
    fn row_vector_linear(&self) -> Mat3 {
        let mut scaled = rotation_matrix(self.rotation);
        for (row, s) in scaled.iter_mut().zip(self.scale) {
            row.iter_mut().for_each(|v| *v *= s);
        }
        matmul3(&scaled, &shear_matrix(self.shear))
    }

    fn column_vector_parts(&self) -> (Mat3, [f64; 3]) {
        let linear = transpose3(&self.row_vector_linear());
        let rotated_center = apply3(&linear, &self.center);
        let translation =
            std::array::from_fn(|i| self.translation[i] + self.center[i] - rotated_center[i]);
        (linear, translation)
    }

    /// The upper-left 3x3 block of the homogeneous matrix.
    pub fn linear_matrix(&self) -> Matrix {
        Matrix::from_rows(&transpose3(&self.row_vector_linear()))
    }

    /// 4x4 homogeneous matrix, acting on column vectors.
    pub fn to_matrix(&self) -> Matrix {
        let (linear, translation) = self.column_vector_parts();
        let mut rows = [[0.0; 4]; 4];
        for (r, row) in rows.iter_mut().take(3).enumerate() {
            row[..3].copy_from_slice(&linear[r]);
            row[3] = translation[r];
        }
        rows[3][3] = 1.0;
        Matrix::from_rows(&rows)
    }

    pub fn to_affine(&self) -> Affine {
        let (linear, translation) = self.column_vector_parts();
        Affine::from_linear(&linear, translation)
    }

    /// Decompose a 4x4 homogeneous matrix (acting on column vectors),
    /// about the given centre (origin by default).
    pub fn from_matrix(matrix: &Matrix, center: Option<[f64; 3]>) -> Result<Self> {
        if matrix.nrows() != 4 || matrix.ncols() != 4 {
            return Err(Error::dimension(format!(
                "expected a 4x4 homogeneous affine matrix, got {}x{}",
                matrix.nrows(),
                matrix.ncols()
            )));
        }
        Self::from_affine(&Affine::try_from_augmented(matrix)?, center)
    }

    pub fn from_affine(affine: &Affine, center: Option<[f64; 3]>) -> Result<Self> {
        let linear = affine.matrix();
        if linear.nrows() != 3 || linear.ncols() != 3 {
            return Err(Error::dimension(format!(
                "expected a 3D affine transformation, got {}x{} linear part",
                linear.nrows(),
                linear.ncols()
            )));
        }
        let row_linear = linear.transpose();
        // exact for isotropic scale; refined below otherwise
        let (_, r) = row_linear.qr().map_err(|_| {
            Error::singular("singular affine matrix cannot be decomposed into parameters")
        })?;
        let initial_shear = [
            r[(0, 1)] / r[(0, 0)],
            r[(0, 2)] / r[(0, 0)],
            r[(1, 2)] / r[(1, 1)],
        ];
        let row_linear: Mat3 =
            std::array::from_fn(|i| std::array::from_fn(|j| row_linear[(i, j)]));
        let shear = separate_shear(&row_linear, initial_shear).ok_or_else(|| {
            Error::singular("affine matrix cannot be separated into rotation, scale and shear")
        })?;

        let unsheared = matmul3(&row_linear, &inverse_shear_matrix(shear));
        let mut scale = unsheared.map(|row| row.iter().map(|v| v * v).sum::<f64>().sqrt());
        let mut rotation: Mat3 = std::array::from_fn(|i| unsheared[i].map(|v| v / scale[i]));

        // fold a reflection into the last scale factor
        if det3(&rotation) < 0.0 {
            scale[2] = -scale[2];
            rotation[2] = rotation[2].map(|v| -v);
        }

        let center = center.unwrap_or([0.0; 3]);
        let rotated_center = linear.matmul(&center);
        let translation =
            std::array::from_fn(|i| affine.translation()[i] - center[i] + rotated_center[i]);

        Ok(Self {
            translation,
            rotation: rotation_angles(&rotation),
            scale,
            shear,
            center,
        })
    }
}

/// CMTK's rotation for row vectors, from angles in degrees.
fn rotation_matrix(degrees: [f64; 3]) -> Mat3 {
    let [(s0, c0), (s1, c1), (s2, c2)] = degrees.map(|d| d.to_radians().sin_cos());
    #[rustfmt::skip]
    let out = [
        [c1 * c2,                -c1 * s2,                -s1],
        [s0 * s1 * c2 + c0 * s2, -s0 * s1 * s2 + c0 * c2, s0 * c1],
        [c0 * s1 * c2 - s0 * s2, -c0 * s1 * s2 - s0 * c2, c0 * c1],
    ];
    out
}

/// Angles in degrees of a proper rotation built by [rotation_matrix].
fn rotation_angles(rotation: &Mat3) -> [f64; 3] {
    let theta = (-rotation[0][2]).clamp(-1.0, 1.0).asin();
    let (alpha, gamma) = if theta.cos().abs() > GIMBAL_LOCK {
        (
            rotation[1][2].atan2(rotation[2][2]),
            (-rotation[0][1]).atan2(rotation[0][0]),
        )
    } else {
        let sin_theta = theta.sin().signum();
        ((rotation[1][0] * sin_theta).atan2(rotation[1][1]), 0.0)
    };
    [alpha, theta, gamma].map(f64::to_degrees)
}

fn shear_matrix([s0, s1, s2]: [f64; 3]) -> Mat3 {
    [[1.0, s0, s1], [0.0, 1.0, s2], [0.0, 0.0, 1.0]]
}

fn inverse_shear_matrix([s0, s1, s2]: [f64; 3]) -> Mat3 {
    [[1.0, -s0, s0 * s2 - s1], [0.0, 1.0, -s2], [0.0, 0.0, 1.0]]
}

/// Derivative of [inverse_shear_matrix] with respect to one shear.
fn inverse_shear_derivative([s0, _, s2]: [f64; 3], param: usize) -> Mat3 {
    match param {
        0 => [[0.0, -1.0, s2], [0.0; 3], [0.0; 3]],
        1 => [[0.0, 0.0, -1.0], [0.0; 3], [0.0; 3]],
        _ => [[0.0, 0.0, s0], [0.0, 0.0, -1.0], [0.0; 3]],
    }
}

/// Find the shears `s` for which `linear · H(s)^-1` has orthogonal rows,
/// by Newton's method from `initial`.
fn separate_shear(linear: &Mat3, initial: [f64; 3]) -> Option<[f64; 3]> {
    let mut shear = initial;
    for _ in 0..MAX_SHEAR_ITERATIONS {
        let unsheared = matmul3(linear, &inverse_shear_matrix(shear));
        let norms = unsheared.map(|row| dot3(&row, &row).sqrt());
        let residual = ROW_PAIRS.map(|(i, j)| dot3(&unsheared[i], &unsheared[j]));
        let converged = ROW_PAIRS
            .into_iter()
            .zip(residual)
            .all(|((i, j), r)| r.abs() <= ORTHOGONALITY_TOLERANCE * norms[i] * norms[j]);
        if converged {
            return Some(shear);
        }

        let mut jacobian = [[0.0; 3]; 3];
        for param in 0..3 {
            let d = matmul3(linear, &inverse_shear_derivative(shear, param));
            for (row, (i, j)) in jacobian.iter_mut().zip(ROW_PAIRS) {
                row[param] = dot3(&d[i], &unsheared[j]) + dot3(&unsheared[i], &d[j]);
            }
        }
        let step = solve(&jacobian, &residual)?;
        for (s, ds) in shear.iter_mut().zip(step) {
            *s -= ds;
        }
        if shear.iter().any(|s| !s.is_finite()) {
            return None;
        }
    }
    None
}

fn dot3(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn apply3(m: &Mat3, v: &[f64; 3]) -> [f64; 3] {
    m.map(|row| dot3(&row, v))
}

fn matmul3(a: &Mat3, b: &Mat3) -> Mat3 {
    std::array::from_fn(|r| std::array::from_fn(|c| (0..3).map(|k| a[r][k] * b[k][c]).sum()))
}

fn transpose3(m: &Mat3) -> Mat3 {
    std::array::from_fn(|r| std::array::from_fn(|c| m[c][r]))
}

fn det3(m: &Mat3) -> f64 {
    let cross = [
        m[1][1] * m[2][2] - m[1][2] * m[2][1],
        m[1][2] * m[2][0] - m[1][0] * m[2][2],
        m[1][0] * m[2][1] - m[1][1] * m[2][0],
    ];
    dot3(&m[0], &cross)
}

impl From<&AffineParams> for Affine {
    fn from(params: &AffineParams) -> Self {
        params.to_affine()
    }
}
