//! Cubic B-spline free-form deformation over a regular 3D control-point grid.
//!
//! Control point `i` along an axis sits at `origin + (i - 1) * spacing`,
//! with `spacing = domain / (dims - 3)`,
//! so the grid extends one cell beyond the domain on either side.
//! Coefficients are absolute control-point positions in the output space,
//! stored `xyz` interleaved with the x index varying fastest.
use std::sync::Arc;

use crate::{Affine, DEFAULT_EPSILON, Error, Matrix, Result, Transformation};

/// Upper bound on Newton iterations when inverting a warp.
pub const MAX_INVERSION_ITERATIONS: usize = 100;

/// Line search gives up once the step fraction falls below this.
const MIN_STEP: f64 = 1e-3;

type Vec3 = [f64; 3];
type Mat3 = [[f64; 3]; 3];

#[derive(Debug, Clone)]
pub struct SplineWarp {
    dims: [usize; 3],
    domain: Vec3,
    origin: Vec3,
    spacing: Vec3,
    coefficients: Arc<[f64]>,
    initial_affine: Option<Affine>,
    /// Global linear approximation: the initial affine if known,
    /// otherwise a least-squares fit to the control points.
    linear: Affine,
    linear_inverse: Option<Affine>,
}

impl SplineWarp {
    /// `coefficients` holds 3 absolute output coordinates per control point.
    pub fn try_new(
        dims: [usize; 3],
        domain: Vec3,
        origin: Vec3,
        coefficients: Vec<f64>,
        initial_affine: Option<Affine>,
    ) -> Result<Self> {
        if let Some(d) = dims.iter().find(|d| **d < 4) {
            return Err(Error::dimension(format!(
                "spline warp needs at least 4 control points per axis, got {d}"
            )));
        }
        if domain.iter().any(|d| !d.is_finite() || *d <= 0.0) {
            return Err(Error::dimension(format!(
                "spline warp domain must be positive and finite, got {domain:?}"
            )));
        }
        if origin.iter().any(|o| !o.is_finite()) {
            return Err(Error::dimension(format!(
                "spline warp origin must be finite, got {origin:?}"
            )));
        }
        let n_coefficients = coefficient_count(&dims)?;
        if coefficients.len() != n_coefficients {
            return Err(Error::dimension(format!(
                "{}x{}x{} control point grid needs {} coefficients, got {}",
                dims[0],
                dims[1],
                dims[2],
                n_coefficients,
                coefficients.len()
            )));
        }
        if let Some(aff) = initial_affine.as_ref() {
            if aff.input_ndim() != 3 || aff.output_ndim() != 3 {
                return Err(Error::dimension("initial affine of a warp must be 3D"));
            }
        }

        let spacing = std::array::from_fn(|d| domain[d] / (dims[d] - 3) as f64);
        let mut warp = Self {
            dims,
            domain,
            origin,
            spacing,
            coefficients: coefficients.into(),
            linear: Affine::identity(3),
            linear_inverse: None,
            initial_affine: None,
        };
        warp.linear = match initial_affine.as_ref() {
            Some(aff) => aff.clone(),
            None => warp.fit_linear()?,
        };
        warp.linear_inverse = warp.linear.try_invert().ok();
        warp.initial_affine = initial_affine;
        Ok(warp)
    }

    /// A warp whose control points sit on the undeformed grid, i.e. the identity on its domain.
    pub fn identity(dims: [usize; 3], domain: Vec3, origin: Vec3) -> Result<Self> {
        let n_coefficients = coefficient_count(&dims)?;
        Self::from_displacements(dims, domain, origin, vec![0.0; n_coefficients], None)
    }

    /// `displacements` are offsets of each control point from its undeformed grid position.
    pub fn from_displacements(
        dims: [usize; 3],
        domain: Vec3,
        origin: Vec3,
        mut displacements: Vec<f64>,
        initial_affine: Option<Affine>,
    ) -> Result<Self> {
        if let Some(d) = dims.iter().find(|d| **d < 4) {
            return Err(Error::dimension(format!(
                "spline warp needs at least 4 control points per axis, got {d}"
            )));
        }
        if displacements.len() == coefficient_count(&dims)? {
            let spacing: Vec3 = std::array::from_fn(|d| domain[d] / (dims[d] - 3) as f64);
            for (idx, disp) in displacements.chunks_exact_mut(3).enumerate() {
                let pos = grid_position(&dims, &spacing, &origin, idx);
                for (d, p) in disp.iter_mut().zip(pos.iter()) {
                    *d += p;
                }
            }
        }
        Self::try_new(dims, domain, origin, displacements, initial_affine)
    }

    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    pub fn domain(&self) -> Vec3 {
        self.domain
    }

    pub fn origin(&self) -> Vec3 {
        self.origin
    }

    pub fn spacing(&self) -> Vec3 {
        self.spacing
    }

    pub fn initial_affine(&self) -> Option<&Affine> {
        self.initial_affine.as_ref()
    }

    /// The affine part of this warp.
    pub fn linear_part(&self) -> &Affine {
        &self.linear
    }

    pub fn in_domain(&self, pt: &[f64]) -> bool {
        (0..3).all(|d| {
            let rel = pt[d] - self.origin[d];
            (0.0..=self.domain[d]).contains(&rel)
        })
    }

    fn clamp_to_domain(&self, pt: Vec3) -> Vec3 {
        std::array::from_fn(|d| pt[d].clamp(self.origin[d], self.origin[d] + self.domain[d]))
    }

    /// Index of the first of the 4 supporting control points along `axis`,
    /// and the fractional position within its cell.
    fn locate(&self, x: f64, axis: usize) -> (usize, f64) {
        let f = (x - self.origin[axis]) / self.spacing[axis];
        let max_cell = (self.dims[axis] - 4) as f64;
        let cell = f.floor().clamp(0.0, max_cell);
        (cell as usize, f - cell)
    }

    fn coefficient(&self, i: usize, j: usize, k: usize) -> &[f64] {
        let idx = 3 * (i + self.dims[0] * (j + self.dims[1] * k));
        &self.coefficients[idx..idx + 3]
    }

    /// Forward mapping, without checking the domain.
    pub fn apply(&self, pt: &[f64]) -> Vec3 {
        let (cx, ux) = self.locate(pt[0], 0);
        let (cy, uy) = self.locate(pt[1], 1);
        let (cz, uz) = self.locate(pt[2], 2);
        let (bx, by, bz) = (basis(ux), basis(uy), basis(uz));

        let mut out = [0.0; 3];
        for (k, wz) in bz.iter().enumerate() {
            for (j, wy) in by.iter().enumerate() {
                let wyz = wy * wz;
                for (i, wx) in bx.iter().enumerate() {
                    let w = wx * wyz;
                    let c = self.coefficient(cx + i, cy + j, cz + k);
                    for (o, v) in out.iter_mut().zip(c.iter()) {
                        *o += w * v;
                    }
                }
            }
        }
        out
    }

    /// `J[r][c]` is the derivative of output coordinate `r` with respect to input coordinate `c`.
    pub fn jacobian(&self, pt: &[f64]) -> Mat3 {
        let (cx, ux) = self.locate(pt[0], 0);
        let (cy, uy) = self.locate(pt[1], 1);
        let (cz, uz) = self.locate(pt[2], 2);
        let (bx, by, bz) = (basis(ux), basis(uy), basis(uz));
        let (dbx, dby, dbz) = (
            basis_derivative(ux).map(|b| b / self.spacing[0]),
            basis_derivative(uy).map(|b| b / self.spacing[1]),
            basis_derivative(uz).map(|b| b / self.spacing[2]),
        );

        let mut jac = [[0.0; 3]; 3];
        for k in 0..4 {
            for j in 0..4 {
                for i in 0..4 {
                    let w = [
                        dbx[i] * by[j] * bz[k],
                        bx[i] * dby[j] * bz[k],
                        bx[i] * by[j] * dbz[k],
                    ];
                    let c = self.coefficient(cx + i, cy + j, cz + k);
                    for (row, v) in jac.iter_mut().zip(c.iter()) {
                        for (cell, wc) in row.iter_mut().zip(w.iter()) {
                            *cell += v * wc;
                        }
                    }
                }
            }
        }
        jac
    }

    fn initial_inverse_guess(&self, target: &Vec3) -> Vec3 {
        let guess = match self.linear_inverse.as_ref() {
            Some(inv) => {
                let mut out = [f64::NAN; 3];
                inv.transform_into(target, &mut out);
                out
            }
            None => *target,
        };
        self.clamp_to_domain(guess)
    }

    /// Find the point in the domain which this warp maps to `target`,
    /// to within `epsilon` (Euclidean distance in the output space).
    ///
    /// Uses Newton's method with a backtracking line search,
    /// seeded by the inverse of the warp's linear part.
    /// Returns `None` if the target is not reached,
    /// e.g. because it has no preimage in the domain or the warp folds nearby.
    pub fn apply_inverse(&self, target: &[f64], epsilon: f64) -> Option<Vec3> {
        let target: Vec3 = [target[0], target[1], target[2]];
        if target.iter().any(|t| !t.is_finite()) {
            return None;
        }

        let mut x = self.initial_inverse_guess(&target);
        let mut delta = sub(&self.apply(&x), &target);
        let mut error = norm(&delta);

        for _ in 0..MAX_INVERSION_ITERATIONS {
            if error <= epsilon {
                return Some(x);
            }
            let Some(dx) = solve(&self.jacobian(&x), &delta) else {
                log::trace!("singular warp jacobian at {x:?} while inverting {target:?}");
                return None;
            };

            let mut step = 1.0;
            let mut improved = false;
            while step >= MIN_STEP {
                let candidate =
                    self.clamp_to_domain(std::array::from_fn(|d| x[d] - step * dx[d]));
                let candidate_delta = sub(&self.apply(&candidate), &target);
                let candidate_error = norm(&candidate_delta);
                if candidate_error < error {
                    x = candidate;
                    delta = candidate_delta;
                    error = candidate_error;
                    improved = true;
                    break;
                }
                step *= 0.5;
            }
            if !improved {
                log::trace!("warp inversion stalled at residual {error} for {target:?}");
                return None;
            }
        }
        (error <= epsilon).then_some(x)
    }

    /// An inverse which solves numerically for each point.
    pub fn inverse(&self, epsilon: f64) -> InverseSplineWarp {
        InverseSplineWarp {
            warp: self.clone(),
            epsilon,
        }
    }

    /// Least-squares affine fit mapping undeformed grid positions to control points.
    fn fit_linear(&self) -> Result<Affine> {
        let mut xtx = Matrix::try_new(vec![0.0; 16], 4)?;
        let mut xtc = [[0.0; 3]; 4];
        for (idx, c) in self.coefficients.chunks_exact(3).enumerate() {
            let g = grid_position(&self.dims, &self.spacing, &self.origin, idx);
            let x = [g[0], g[1], g[2], 1.0];
            for r in 0..4 {
                for col in 0..4 {
                    xtx[(r, col)] += x[r] * x[col];
                }
                for (out, v) in xtc[r].iter_mut().zip(c.iter()) {
                    *out += x[r] * v;
                }
            }
        }
        let inv = xtx.inverse()?;

        let mut linear = [[0.0; 3]; 3];
        let mut translation = [0.0; 3];
        for out_dim in 0..3 {
            for row in 0..4 {
                let w: f64 = (0..4).map(|k| inv[(row, k)] * xtc[k][out_dim]).sum();
                if row < 3 {
                    linear[out_dim][row] = w;
                } else {
                    translation[out_dim] = w;
                }
            }
        }
        Affine::try_new(Matrix::from_rows(&linear), &translation)
    }
}

impl Transformation for SplineWarp {
    fn transform_into(&self, pt: &[f64], buf: &mut [f64]) -> bool {
        if !self.in_domain(pt) {
            return false;
        }
        buf.copy_from_slice(&self.apply(pt));
        true
    }

    fn invert(&self) -> Option<Arc<dyn Transformation>> {
        Some(Arc::new(self.inverse(DEFAULT_EPSILON)))
    }

    fn is_identity(&self) -> bool {
        false
    }

    fn input_ndim(&self) -> usize {
        3
    }

    fn output_ndim(&self) -> usize {
        3
    }
}

/// The numerically-solved inverse of a [SplineWarp].
#[derive(Debug, Clone)]
pub struct InverseSplineWarp {
    warp: SplineWarp,
    epsilon: f64,
}

impl InverseSplineWarp {
    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }
}

impl Transformation for InverseSplineWarp {
    fn transform_into(&self, pt: &[f64], buf: &mut [f64]) -> bool {
        match self.warp.apply_inverse(pt, self.epsilon) {
            Some(x) => {
                buf.copy_from_slice(&x);
                true
            }
            None => false,
        }
    }

    fn invert(&self) -> Option<Arc<dyn Transformation>> {
        Some(Arc::new(self.warp.clone()))
    }

    fn is_identity(&self) -> bool {
        false
    }

    fn input_ndim(&self) -> usize {
        3
    }

    fn output_ndim(&self) -> usize {
        3
    }
}

fn grid_position(dims: &[usize; 3], spacing: &Vec3, origin: &Vec3, linear_idx: usize) -> Vec3 {
    let i = linear_idx % dims[0];
    let j = (linear_idx / dims[0]) % dims[1];
    let k = linear_idx / (dims[0] * dims[1]);
    [
        origin[0] + (i as f64 - 1.0) * spacing[0],
        origin[1] + (j as f64 - 1.0) * spacing[1],
        origin[2] + (k as f64 - 1.0) * spacing[2],
    ]
}

/// Uniform cubic B-spline basis functions at `u` in `[0, 1]`.
fn basis(u: f64) -> [f64; 4] {
    let u2 = u * u;
    let u3 = u2 * u;
    let v = 1.0 - u;
    [
        v * v * v / 6.0,
        (3.0 * u3 - 6.0 * u2 + 4.0) / 6.0,
        (-3.0 * u3 + 3.0 * u2 + 3.0 * u + 1.0) / 6.0,
        u3 / 6.0,
    ]
}

fn basis_derivative(u: f64) -> [f64; 4] {
    let u2 = u * u;
    let v = 1.0 - u;
    [
        -0.5 * v * v,
        1.5 * u2 - 2.0 * u,
        -1.5 * u2 + u + 0.5,
        0.5 * u2,
    ]
}

/// Three coefficients per control point.
fn coefficient_count(dims: &[usize; 3]) -> Result<usize> {
    dims.iter()
        .try_fold(3_usize, |acc, d| acc.checked_mul(*d))
        .ok_or_else(|| {
            Error::dimension(format!(
                "{}x{}x{} control point grid has too many coefficients",
                dims[0], dims[1], dims[2]
            ))
        })
}

fn sub(a: &Vec3, b: &Vec3) -> Vec3 {
    std::array::from_fn(|d| a[d] - b[d])
}

fn norm(v: &Vec3) -> f64 {
    v.iter().map(|x| x * x).sum::<f64>().sqrt()
}

/// Solve `a x = b` by Cramer's rule; `None` if `a` is (numerically) singular.
pub(super) fn solve(a: &Mat3, b: &Vec3) -> Option<Vec3> {
    let det3 = |m: &Mat3| {
        m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
            - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
            + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
    };
    let det = det3(a);
    let scale = a.iter().flatten().fold(0.0_f64, |m, v| m.max(v.abs()));
    if !det.is_finite() || det.abs() <= 1e3 * f64::EPSILON * scale * scale * scale {
        return None;
    }
    let mut x = [0.0; 3];
    for (col, xc) in x.iter_mut().enumerate() {
        let mut m = *a;
        for row in 0..3 {
            m[row][col] = b[row];
        }
        *xc = det3(&m) / det;
    }
    Some(x)
}
