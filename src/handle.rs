//! Chains retained between calls, referred to by opaque handles.
//!
//! Handles are never reused, so a stale handle cannot refer to a newer chain.
use std::{
    collections::HashMap,
    sync::{
        Arc, LazyLock, RwLock,
        atomic::{AtomicU64, Ordering},
    },
};

use crate::{
    Chain, Error, Result,
    batch::PointMapper,
    io::Loader,
    stream::{StreamOptions, build_chain},
};

/// Opaque reference to a chain held by a [ChainRegistry]; `0` is never valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChainHandle(u64);

impl ChainHandle {
    pub const NULL: Self = Self(0);

    pub fn from_raw(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

/// A chain, and whether batches through it use the thread pool.
#[derive(Debug, Clone)]
struct Retained {
    chain: Arc<Chain>,
    parallel: bool,
}

#[derive(Debug)]
pub struct ChainRegistry {
    chains: RwLock<HashMap<u64, Retained>>,
    next_id: AtomicU64,
}

impl Default for ChainRegistry {
    fn default() -> Self {
        Self {
            chains: Default::default(),
            next_id: AtomicU64::new(1),
        }
    }
}

impl ChainRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Retain a chain, mapping in parallel where the `rayon` feature allows.
    pub fn insert(&self, chain: Chain) -> ChainHandle {
        self.insert_with(chain, cfg!(feature = "rayon"))
    }

    pub fn insert_with(&self, chain: Chain, parallel: bool) -> ChainHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let retained = Retained {
            chain: Arc::new(chain),
            parallel,
        };
        self.chains
            .write()
            .expect("should not be poisoned")
            .insert(id, retained);
        log::debug!("retained chain {id} (parallel: {parallel})");
        ChainHandle(id)
    }

    /// Build a chain as [crate::stream_xform] would, and retain it
    /// along with the `parallel` option.
    pub fn create<S: AsRef<str>, L: Loader>(
        &self,
        reglist: &[S],
        options: &StreamOptions,
        loader: &L,
    ) -> Result<ChainHandle> {
        let chain = build_chain(reglist, options, loader)?;
        Ok(self.insert_with(chain, options.parallel))
    }

    fn retained(&self, handle: ChainHandle) -> Result<Retained> {
        self.chains
            .read()
            .expect("should not be poisoned")
            .get(&handle.0)
            .cloned()
            .ok_or(Error::InvalidHandle(handle.0))
    }

    pub fn get(&self, handle: ChainHandle) -> Result<Arc<Chain>> {
        Ok(self.retained(handle)?.chain)
    }

    pub fn is_parallel(&self, handle: ChainHandle) -> Result<bool> {
        Ok(self.retained(handle)?.parallel)
    }

    /// Map points through a retained chain;
    /// rows which cannot be mapped are filled with [crate::MISSING].
    pub fn apply(&self, handle: ChainHandle, points: &[[f64; 3]]) -> Result<Vec<[f64; 3]>> {
        let Retained { chain, parallel } = self.retained(handle)?;
        Ok(PointMapper::new(&chain)
            .parallel(parallel)
            .map_points(points)
            .to_rows())
    }

    /// Each handle can be released once.
    pub fn release(&self, handle: ChainHandle) -> Result<()> {
        self.chains
            .write()
            .expect("should not be poisoned")
            .remove(&handle.0)
            .ok_or(Error::InvalidHandle(handle.0))?;
        log::debug!("released chain {}", handle.0);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.chains.read().expect("should not be poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

static REGISTRY: LazyLock<ChainRegistry> = LazyLock::new(ChainRegistry::new);

/// The process-wide registry used by [chain_create], [chain_apply] and [chain_release].
pub fn registry() -> &'static ChainRegistry {
    &REGISTRY
}

pub fn chain_create<S: AsRef<str>, L: Loader>(
    reglist: &[S],
    options: &StreamOptions,
    loader: &L,
) -> Result<ChainHandle> {
    registry().create(reglist, options, loader)
}

pub fn chain_apply(handle: ChainHandle, points: &[[f64; 3]]) -> Result<Vec<[f64; 3]>> {
    registry().apply(handle, points)
}

pub fn chain_release(handle: ChainHandle) -> Result<()> {
    registry().release(handle)
}
