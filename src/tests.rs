use std::{
    fs, iter,
    path::{Path, PathBuf},
    sync::LazyLock,
};

use crate::{SplineWarp, Transformation};
use faer::rand::{Rng, SeedableRng, rngs::SmallRng};

pub const SMALL_NUMBER: f64 = 1e-10;
pub static COORDS_3D_1000: LazyLock<Vec<Vec<f64>>> = LazyLock::new(|| make_coords(1000, 3));
pub static COORDS_3D_1000_COLS: LazyLock<Vec<Vec<f64>>> =
    LazyLock::new(|| transpose(COORDS_3D_1000.as_ref()));

pub const IDENTITY_TYPEDSTREAM: &str = "! TYPEDSTREAM 2.4

registration {
\taffine_xform {
\t\txlate 0 0 0
\t\trotate 0 0 0
\t\tscale 1 1 1
\t\tshear 0 0 0
\t\tcenter 0 0 0
\t}
}
";

pub const AFFINE_TYPEDSTREAM: &str = "! TYPEDSTREAM 2.4

registration {
\treference_study \"ref.nrrd\"
\tfloating_study \"flo.nrrd\"
\taffine_xform {
\t\txlate 10 -5 2
\t\trotate 0 0 0
\t\tscale 1 1 1
\t\tshear 0 0 0
\t\tcenter 25 25 25
\t}
}
";

/// A quarter turn about z, which CMTK applies as x -> -y.
pub const ROTATED_TYPEDSTREAM: &str = "! TYPEDSTREAM 2.4

registration {
\taffine_xform {
\t\txlate 0 0 0
\t\trotate 0 0 90
\t\tscale 1 1 1
\t\tshear 0 0 0
\t\tcenter 0 0 0
\t}
}
";

pub fn init_logger() {
    #[allow(unused_must_use)]
    env_logger::try_init();
}

fn make_coords(n_pts: usize, ndim: usize) -> Vec<Vec<f64>> {
    let mut rng = SmallRng::seed_from_u64(1991);

    iter::repeat_with(|| {
        iter::repeat_with(|| rng.random::<f64>() * 100.0)
            .take(ndim)
            .collect()
    })
    .take(n_pts)
    .collect()
}

fn transpose(coords: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let npoints = coords.len();
    let ndim = coords[0].len();
    let mut columns = vec![vec![f64::NAN; npoints]; ndim];
    for (i, pt) in coords.iter().enumerate() {
        for (j, &v) in pt.iter().enumerate() {
            columns[j][i] = v;
        }
    }
    columns
}

/// Convenience function for turning a slice of sliceables into a vec of slices.
pub fn as_refs<T, Inner: AsRef<[T]>>(input: &[Inner]) -> Vec<&[T]> {
    input.iter().map(|v| v.as_ref()).collect()
}

/// Convenience function for turning a mut slice of sliceables into a vec of mut slices.
pub fn as_muts<T, Inner: AsMut<[T]>>(input: &mut [Inner]) -> Vec<&mut [T]> {
    input.iter_mut().map(|v| v.as_mut()).collect()
}

pub fn vec_of_vec<T: Copy>(outer_len: usize, inner_len: usize, val: T) -> Vec<Vec<T>> {
    vec![vec![val; inner_len]; outer_len]
}

/// A smooth, invertible deformation of the box `[0, 100]^3`.
pub fn wavy_warp() -> SplineWarp {
    let dims = [8, 8, 8];
    let domain = [100.0; 3];
    let spacing = 20.0;
    let mut displacements = Vec::with_capacity(3 * 512);
    for k in 0..dims[2] {
        for j in 0..dims[1] {
            for i in 0..dims[0] {
                let [x, y, z] = [i, j, k].map(|v| (v as f64 - 1.0) * spacing);
                displacements.push(2.0 * (y / 15.0).sin());
                displacements.push(1.5 * (z / 20.0).cos());
                displacements.push(2.0 * (x / 25.0).sin() + 0.5);
            }
        }
    }
    SplineWarp::from_displacements(dims, domain, [0.0; 3], displacements, None).unwrap()
}

/// A 4x4x4 identity warp over `[0, 10]^3`, with an identity initial affine.
///
/// Coefficients are written one control point per line,
/// exercising continuation lines.
pub fn identity_warp_typedstream(relative: bool) -> String {
    let mut coefficients = String::new();
    for k in 0..4 {
        for j in 0..4 {
            for i in 0..4 {
                let pos = [i, j, k].map(|v| {
                    if relative {
                        0.0
                    } else {
                        (v as f64 - 1.0) * 10.0
                    }
                });
                coefficients.push_str(&format!("\t\t{} {} {}\n", pos[0], pos[1], pos[2]));
            }
        }
    }
    let absolute = if relative { "no" } else { "yes" };
    format!(
        "! TYPEDSTREAM 2.4

registration {{
\treference_study \"ref.nrrd\"
\tspline_warp {{
\t\taffine_xform {{
\t\t\txlate 0 0 0
\t\t\trotate 0 0 0
\t\t\tscale 1 1 1
\t\t\tshear 0 0 0
\t\t\tcenter 5 5 5
\t\t}}
\t\tabsolute {absolute}
\t\tdims 4 4 4
\t\tdomain 10 10 10
\t\torigin 0 0 0
\t\tcoefficients
{coefficients}\t\tactive 1 1 1
\t}}
}}
"
    )
}

pub fn write_fixture(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    path
}

fn transform<T: Transformation + ?Sized>(t: &T, coord: &[f64]) -> Option<Vec<f64>> {
    let mut out = vec![f64::NAN; t.output_ndim()];
    t.transform_into(coord, &mut out).then_some(out)
}

fn bulk_transform<T: Transformation + ?Sized, C: AsRef<[f64]>>(
    t: &T,
    coords: &[C],
) -> (Vec<Vec<f64>>, Vec<bool>) {
    let refs = as_refs(coords);
    let mut out = vec_of_vec(coords.len(), t.output_ndim(), f64::NAN);
    let mut valid = vec![false; coords.len()];
    t.bulk_transform_into(&refs, &mut as_muts(&mut out), &mut valid);
    (out, valid)
}

fn column_transform<T: Transformation + ?Sized, C: AsRef<[f64]>>(
    t: &T,
    columns: &[C],
) -> (Vec<Vec<f64>>, Vec<bool>) {
    let refs = as_refs(columns);
    let n_pts = refs[0].len();
    let mut out = vec_of_vec(t.output_ndim(), n_pts, f64::NAN);
    let mut valid = vec![false; n_pts];
    t.column_transform_into(&refs, &mut as_muts(&mut out), &mut valid);
    (out, valid)
}

/// Assert that transforming coordinates in bulk matches transforming them one by one.
pub fn check_transform_bulk<T: Transformation>(t: T) {
    init_logger();
    let coords: &[Vec<f64>] = COORDS_3D_1000.as_ref();

    let (results_many, valid) = bulk_transform(&t, coords);
    for ((orig, many_transformed), v) in coords.iter().zip(results_many.iter()).zip(valid) {
        let result_single = transform(&t, orig);
        assert_eq!(result_single.is_some(), v);
        if let Some(single) = result_single {
            approx::assert_ulps_eq!(
                single.as_slice(),
                many_transformed.as_slice(),
                epsilon = SMALL_NUMBER
            );
        }
    }
}

/// Assert that transforming the coordinates by column matches transforming them one-by-one.
pub fn check_transform_col<T: Transformation>(t: T) {
    init_logger();
    let coords: &[Vec<f64>] = COORDS_3D_1000.as_ref();
    let columns: &[Vec<f64>] = COORDS_3D_1000_COLS.as_ref();

    let (transformed_columns, valid) = column_transform(&t, columns);

    for (coord_idx, pt) in coords.iter().enumerate() {
        let transformed_pt = transform(&t, pt);
        assert_eq!(transformed_pt.is_some(), valid[coord_idx]);
        let Some(transformed_pt) = transformed_pt else {
            continue;
        };
        let col_transformed_pt: Vec<_> = (0..columns.len())
            .map(|dim_idx| transformed_columns[dim_idx][coord_idx])
            .collect();
        approx::assert_ulps_eq!(
            transformed_pt.as_slice(),
            col_transformed_pt.as_slice(),
            epsilon = SMALL_NUMBER
        );
    }
}

/// Assert that inverting a transformation recovers the original coordinate (more or less).
pub fn check_inverse_transform_coord<T: Transformation>(t: T) {
    check_inverse_transform_coord_within(t, SMALL_NUMBER);
}

/// As [check_inverse_transform_coord], for inverses solved numerically.
///
/// Every point which maps forward must map back.
pub fn check_inverse_transform_coord_within<T: Transformation>(t: T, tolerance: f64) {
    init_logger();
    let Some(inv_t) = t.invert() else {
        return;
    };

    let coords: &[Vec<f64>] = COORDS_3D_1000.as_ref();
    for pt in coords.iter() {
        let Some(transformed) = transform(&t, pt) else {
            continue;
        };
        let inverted = transform(inv_t.as_ref(), &transformed)
            .unwrap_or_else(|| panic!("could not invert {transformed:?} (from {pt:?})"));
        approx::assert_ulps_eq!(pt.as_slice(), inverted.as_slice(), epsilon = tolerance);
    }
}

/// Assert that inverting a bulk transformation recovers the original coordinates (more or less).
pub fn check_inverse_transform_bulk<T: Transformation>(t: T) {
    init_logger();
    let Some(inv_t) = t.invert() else {
        return;
    };

    let coords: &[Vec<f64>] = COORDS_3D_1000.as_ref();
    let (transformed, valid) = bulk_transform(&t, coords);
    assert!(valid.iter().all(|v| *v));

    let mut inverted = vec_of_vec(coords.len(), inv_t.output_ndim(), f64::NAN);
    let mut inv_valid = vec![false; coords.len()];
    inv_t.bulk_transform_into(
        &as_refs(&transformed),
        &mut as_muts(&mut inverted),
        &mut inv_valid,
    );
    assert!(inv_valid.iter().all(|v| *v));

    for (orig, invert) in coords.iter().zip(inverted.iter()) {
        approx::assert_ulps_eq!(orig.as_slice(), invert.as_slice(), epsilon = SMALL_NUMBER);
    }
}

/// Assert that inverting a columnar transformation recovers the original columns (more or less).
pub fn check_inverse_transform_col<T: Transformation>(t: T) {
    init_logger();

    let Some(inv_t) = t.invert() else {
        return;
    };

    let columns: &[Vec<f64>] = COORDS_3D_1000_COLS.as_ref();
    let n_pts = columns[0].len();

    let (transformed_columns, valid) = column_transform(&t, columns);
    assert!(valid.iter().all(|v| *v));
    let (inverted_columns, inv_valid) = column_transform(inv_t.as_ref(), &transformed_columns);
    assert!(inv_valid.iter().all(|v| *v));

    for idx in 0..n_pts {
        let orig: Vec<_> = columns.iter().map(|c| c[idx]).collect();
        let inverted: Vec<_> = inverted_columns.iter().map(|c| c[idx]).collect();

        approx::assert_ulps_eq!(orig.as_slice(), inverted.as_slice(), epsilon = SMALL_NUMBER);
    }
}
