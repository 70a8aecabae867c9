//! Ordered chains of transformations, each applied forward or inverted.
use std::sync::Arc;

use crate::{
    Affine, DEFAULT_EPSILON, Error, InvertibleXform, Result, Transformation, Xform,
    io::{LoadedXform, Loader, orient},
};

/// One requested link of a chain: a specifier for the loader, and its direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainEntry {
    pub specifier: String,
    pub inverse: bool,
}

impl ChainEntry {
    pub fn new(specifier: impl Into<String>, inverse: bool) -> Self {
        Self {
            specifier: specifier.into(),
            inverse,
        }
    }
}

fn validate_epsilon(epsilon: f64) -> Result<f64> {
    if epsilon.is_finite() && epsilon > 0.0 {
        Ok(epsilon)
    } else {
        Err(Error::InvalidEpsilon(epsilon))
    }
}

/// Apply a sequence of transforms in order,
/// from the sample space of the first to the reference space of the last.
///
/// An empty chain is the identity.
#[derive(Debug, Clone)]
pub struct Chain {
    links: Vec<InvertibleXform>,
    /// Residual tolerance for numerically-inverted warps.
    epsilon: f64,
}

impl Default for Chain {
    fn default() -> Self {
        Self {
            links: Vec::new(),
            epsilon: DEFAULT_EPSILON,
        }
    }
}

impl Chain {
    pub fn builder() -> ChainBuilder {
        ChainBuilder::default()
    }

    /// Resolve every entry through the loader.
    ///
    /// Fails on the first entry which cannot be loaded (or inverted),
    /// in which case no chain is produced.
    pub fn build<L: Loader>(entries: &[ChainEntry], loader: &L) -> Result<Self> {
        let mut builder = ChainBuilder::with_capacity(entries.len());
        for entry in entries {
            builder.add_specifier(&entry.specifier, entry.inverse, loader)?;
        }
        let chain = builder.build();
        log::debug!(
            "built chain of {} transformations from {} entries",
            chain.len(),
            entries.len()
        );
        Ok(chain)
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn links(&self) -> &[InvertibleXform] {
        &self.links
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    /// Must be positive and finite; applies to subsequent mappings.
    pub fn set_epsilon(&mut self, epsilon: f64) -> Result<()> {
        self.epsilon = validate_epsilon(epsilon)?;
        Ok(())
    }

    pub fn with_epsilon(mut self, epsilon: f64) -> Result<Self> {
        self.set_epsilon(epsilon)?;
        Ok(self)
    }

    /// A chain of the same length where every transform is replaced by its linear part,
    /// keeping each direction.
    pub fn reduce_to_affine_only(&self) -> Result<Self> {
        let links = self
            .links
            .iter()
            .map(InvertibleXform::to_affine_only)
            .collect::<Result<Vec<_>>>()?;
        log::debug!("reduced chain of {} transformations to affine", links.len());
        Ok(Self {
            links,
            epsilon: self.epsilon,
        })
    }

    /// The single affine transformation equivalent to [Chain::reduce_to_affine_only].
    pub fn to_affine(&self) -> Result<Affine> {
        let mut out = Affine::identity(3);
        for link in self.reduce_to_affine_only()?.links() {
            if let Some(affine) = link.effective_affine() {
                out = out.then(affine)?;
            }
        }
        Ok(out)
    }

    /// The chain mapping the other way: reversed, with every direction flipped.
    pub fn inverted(&self) -> Result<Self> {
        let links = self
            .links
            .iter()
            .rev()
            .map(InvertibleXform::flipped)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            links,
            epsilon: self.epsilon,
        })
    }

    /// Map one point through every link in order;
    /// `None` as soon as any link fails.
    pub fn map_point(&self, pt: &[f64; 3]) -> Option<[f64; 3]> {
        let mut current = *pt;
        let mut next = [f64::NAN; 3];
        for link in self.links.iter() {
            if !link.map_into(&current, &mut next, self.epsilon) {
                return None;
            }
            (current, next) = (next, current);
        }
        Some(current)
    }
}

impl Transformation for Chain {
    fn transform_into(&self, pt: &[f64], buf: &mut [f64]) -> bool {
        match self.map_point(&[pt[0], pt[1], pt[2]]) {
            Some(out) => {
                buf.copy_from_slice(&out);
                true
            }
            None => false,
        }
    }

    fn invert(&self) -> Option<Arc<dyn Transformation>> {
        let inv = self.inverted().ok()?;
        Some(Arc::new(inv))
    }

    fn is_identity(&self) -> bool {
        self.links.iter().all(|l| l.xform().is_identity())
    }

    fn input_ndim(&self) -> usize {
        3
    }

    fn output_ndim(&self) -> usize {
        3
    }
}

#[derive(Debug)]
pub struct ChainBuilder {
    links: Vec<InvertibleXform>,
    epsilon: f64,
}

impl Default for ChainBuilder {
    fn default() -> Self {
        Self {
            links: Vec::new(),
            epsilon: DEFAULT_EPSILON,
        }
    }
}

impl ChainBuilder {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            links: Vec::with_capacity(capacity),
            ..Default::default()
        }
    }

    /// Fails if an inverted affine is singular.
    pub fn add_xform(&mut self, xform: impl Into<Xform>, inverse: bool) -> Result<()> {
        self.links.push(InvertibleXform::new(xform.into(), inverse)?);
        Ok(())
    }

    /// Add everything a specifier resolves to;
    /// if inverted, those transforms are added in reverse order with each direction flipped.
    ///
    /// Nothing is added if any of them fails.
    pub fn add_specifier<L: Loader>(
        &mut self,
        specifier: &str,
        inverse: bool,
        loader: &L,
    ) -> Result<()> {
        let loaded = loader.load(specifier)?;
        let links = orient(loaded, inverse)
            .into_iter()
            .map(|LoadedXform { xform, inverse }| InvertibleXform::new(xform, inverse))
            .collect::<Result<Vec<_>>>()?;
        self.links.extend(links);
        Ok(())
    }

    pub fn set_epsilon(&mut self, epsilon: f64) -> Result<()> {
        self.epsilon = validate_epsilon(epsilon)?;
        Ok(())
    }

    pub fn build(self) -> Chain {
        Chain {
            links: self.links,
            epsilon: self.epsilon,
        }
    }
}
