//! Execution backend for the per-marker and per-voxel hot loops.
//!
//! Algorithm code receives a [`ComputeBackend`] chosen once at startup and
//! calls [`ComputeBackend::map_indexed`]; it never inspects which backend is
//! active. Both backends return results in index order, so outputs are
//! bit-identical regardless of the choice.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Backend selector stored in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Single-threaded execution on the calling thread.
    Serial,
    /// Work-stealing thread pool (rayon global pool).
    #[default]
    Parallel,
}

/// Runs independent, read-only computations over an index range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComputeBackend {
    kind: BackendKind,
}

impl ComputeBackend {
    pub fn new(kind: BackendKind) -> Self {
        Self { kind }
    }

    pub fn serial() -> Self {
        Self::new(BackendKind::Serial)
    }

    pub fn parallel() -> Self {
        Self::new(BackendKind::Parallel)
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    /// Evaluate `f(i)` for `i in 0..n`, returning results in index order.
    pub fn map_indexed<R, F>(&self, n: usize, f: F) -> Vec<R>
    where
        R: Send,
        F: Fn(usize) -> R + Sync + Send,
    {
        match self.kind {
            BackendKind::Serial => (0..n).map(f).collect(),
            BackendKind::Parallel => (0..n).into_par_iter().map(f).collect(),
        }
    }

    /// Evaluate `f` on every element of `items`, returning results in order.
    pub fn map_slice<T, R, F>(&self, items: &[T], f: F) -> Vec<R>
    where
        T: Sync,
        R: Send,
        F: Fn(&T) -> R + Sync + Send,
    {
        self.map_indexed(items.len(), |i| f(&items[i]))
    }
}

impl Default for ComputeBackend {
    fn default() -> Self {
        Self::new(BackendKind::default())
    }
}

impl From<BackendKind> for ComputeBackend {
    fn from(kind: BackendKind) -> Self {
        Self::new(kind)
    }
}
