use cmtk_transformations::{
    Affine, AffineParams, Chain, PointMapper, SplineWarp, Transformation,
};
use criterion::{Criterion, criterion_group, criterion_main};
use faer::rand::{Rng, SeedableRng, rngs::SmallRng};
use std::{hint::black_box, sync::Arc};

/// An implementation of the identity transform which uses the trait default implementations
/// for as many methods as possible, to determine the overhead of those implementations.
#[derive(Default, Debug, Copy, Clone)]
struct DefaultIdentity(usize);

impl Transformation for DefaultIdentity {
    fn transform_into(&self, pt: &[f64], buf: &mut [f64]) -> bool {
        buf.copy_from_slice(pt);
        true
    }

    fn input_ndim(&self) -> usize {
        self.0
    }

    fn output_ndim(&self) -> usize {
        self.0
    }

    fn invert(&self) -> Option<Arc<dyn Transformation>> {
        Some(Arc::new(*self))
    }

    fn is_identity(&self) -> bool {
        true
    }
}

fn coords(n_rows: usize, n_cols: usize) -> Vec<Vec<f64>> {
    let mut rng = SmallRng::seed_from_u64(1991);
    let mut pts = Vec::with_capacity(n_rows);
    for _ in 0..n_rows {
        let mut pt = Vec::with_capacity(n_cols);
        for _ in 0..n_cols {
            pt.push(rng.random::<f64>() * 100.0);
        }
        pts.push(pt);
    }
    pts
}

fn points(n: usize) -> Vec<[f64; 3]> {
    coords(n, 3).iter().map(|c| [c[0], c[1], c[2]]).collect()
}

fn transpose(coords: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let mut out = vec![Vec::with_capacity(coords.len()); coords[0].len()];
    for coord in coords.iter() {
        for (&val, tgt) in coord.iter().zip(out.iter_mut()) {
            tgt.push(val);
        }
    }
    out
}

fn example_affine() -> Affine {
    AffineParams {
        translation: [10.0, -5.0, 2.5],
        rotation: [12.0, -20.0, 33.0],
        scale: [1.1, 0.9, 1.3],
        shear: [0.05, -0.02, 0.1],
        center: [50.0, 50.0, 50.0],
    }
    .to_affine()
}

fn example_warp() -> SplineWarp {
    let dims = [12, 12, 12];
    let spacing = 100.0 / 9.0;
    let mut displacements = Vec::with_capacity(3 * 12 * 12 * 12);
    for k in 0..dims[2] {
        for j in 0..dims[1] {
            for i in 0..dims[0] {
                let [x, y, z] = [i, j, k].map(|v| (v as f64 - 1.0) * spacing);
                displacements.extend([
                    2.0 * (y / 15.0).sin(),
                    1.5 * (z / 20.0).cos(),
                    2.0 * (x / 25.0).sin(),
                ]);
            }
        }
    }
    SplineWarp::from_displacements(dims, [100.0; 3], [0.0; 3], displacements, None).unwrap()
}

fn example_chain() -> Chain {
    let mut builder = Chain::builder();
    builder.add_xform(example_affine(), false).unwrap();
    builder.add_xform(example_warp(), true).unwrap();
    builder.add_xform(example_affine(), true).unwrap();
    builder.build()
}

struct Bencher<'c> {
    name: String,
    criterion: &'c mut Criterion,
}

impl<'c> Bencher<'c> {
    fn new<S: Into<String>>(name: S, criterion: &'c mut Criterion) -> Self {
        Self {
            name: name.into(),
            criterion,
        }
    }

    fn coords<T: Transformation>(&mut self, t: &T) {
        let coords = coords(1000, 3);
        let mut out = vec![f64::NAN; t.output_ndim()];
        self.criterion
            .bench_function(&format!("{}[coord]", self.name), |b| {
                b.iter(|| {
                    for pt in coords.iter() {
                        black_box(t.transform_into(pt, &mut out));
                    }
                })
            });

        let mut bulk = vec![vec![f64::NAN; t.output_ndim()]; coords.len()];
        let mut valid = vec![false; coords.len()];
        let coord_refs: Vec<&[_]> = coords.iter().map(|c| c.as_ref()).collect();
        let mut bulk_refs: Vec<&mut [_]> = bulk.iter_mut().map(|c| c.as_mut()).collect();
        self.criterion
            .bench_function(&format!("{}[bulk]", self.name), |b| {
                b.iter(|| {
                    black_box(t.bulk_transform_into(&coord_refs, &mut bulk_refs, &mut valid));
                })
            });

        let n_coords = coords.len();
        let cols = transpose(&coords);
        let col_refs: Vec<&[_]> = cols.iter().map(|c| c.as_ref()).collect();
        let mut out = vec![vec![f64::NAN; n_coords]; t.output_ndim()];
        let mut out_refs: Vec<&mut [_]> = out.iter_mut().map(|v| v.as_mut()).collect();
        let mut valid = vec![false; n_coords];
        self.criterion
            .bench_function(&format!("{}[column]", self.name), |b| {
                b.iter(|| {
                    black_box(t.column_transform_into(&col_refs, &mut out_refs, &mut valid));
                })
            });
    }
}

fn default_identity(c: &mut Criterion) {
    let mut bencher = Bencher::new(stringify!(DefaultIdentity), c);
    let t = DefaultIdentity(3);
    bencher.coords(&t);
}

fn identity_affine(c: &mut Criterion) {
    let mut bencher = Bencher::new("IdentityAffine", c);
    bencher.coords(&Affine::identity(3));
}

fn affine(c: &mut Criterion) {
    let mut bencher = Bencher::new(stringify!(Affine), c);
    bencher.coords(&example_affine());
}

fn empty_chain(c: &mut Criterion) {
    let mut bencher = Bencher::new("EmptyChain", c);
    bencher.coords(&Chain::default());
}

fn spline_warp(c: &mut Criterion) {
    let mut bencher = Bencher::new(stringify!(SplineWarp), c);
    bencher.coords(&example_warp());
}

fn inverse_spline_warp(c: &mut Criterion) {
    let mut bencher = Bencher::new(stringify!(InverseSplineWarp), c);
    bencher.coords(&example_warp().inverse(1e-8));
}

fn chain(c: &mut Criterion) {
    let mut bencher = Bencher::new(stringify!(Chain), c);
    bencher.coords(&example_chain());
}

fn batch(c: &mut Criterion) {
    let chain = example_chain();
    let pts = points(10_000);
    for parallel in [false, true] {
        let mapper = PointMapper::new(&chain).parallel(parallel);
        c.bench_function(&format!("PointMapper[parallel={parallel}]"), |b| {
            b.iter(|| black_box(mapper.map_points(&pts)))
        });
    }
}

criterion_group!(
    atoms,
    default_identity,
    identity_affine,
    affine,
    empty_chain,
    spline_warp,
    inverse_spline_warp,
    chain
);
criterion_group!(batches, batch);
criterion_main!(atoms, batches);
