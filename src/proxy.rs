// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Shared handle to a surface.

use crate::{
    error::{Error, Result},
    pool::{ObjectPool, Pooled},
    provider::{ObjectId, SurfaceObject},
};
use std::{fmt, sync::Arc};

enum SurfaceBacking<S> {
    Pooled(Pooled<S>),
    Owned(S),
}

/// Reference-counted handle to a surface.
///
/// Clones share the surface. When the last clone is dropped a pooled
/// surface returns to its pool and an owned surface is destroyed.
pub struct SurfaceProxy<S> {
    backing: Arc<SurfaceBacking<S>>,
}

impl<S> Clone for SurfaceProxy<S> {
    fn clone(&self) -> Self {
        Self {
            backing: self.backing.clone(),
        }
    }
}

impl<S: SurfaceObject> SurfaceProxy<S> {
    /// Wrap a standalone surface.
    pub fn new(surface: S) -> Self {
        Self {
            backing: Arc::new(SurfaceBacking::Owned(surface)),
        }
    }

    /// Wrap a surface taken from `pool`.
    pub fn from_pool(pool: &ObjectPool<S>) -> Result<Self> {
        let surface = pool.try_acquire().map_err(|err| match err {
            Error::ResourceExhausted(_) => err,
            other => Error::AcquireFailed(format!("surface from {} pool: {other}", pool.name())),
        })?;
        Ok(Self {
            backing: Arc::new(SurfaceBacking::Pooled(surface)),
        })
    }

    pub fn surface(&self) -> &S {
        match self.backing.as_ref() {
            SurfaceBacking::Pooled(surface) => &**surface,
            SurfaceBacking::Owned(surface) => surface,
        }
    }

    pub fn surface_id(&self) -> ObjectId {
        self.surface().id()
    }

    pub fn is_pooled(&self) -> bool {
        matches!(self.backing.as_ref(), SurfaceBacking::Pooled(_))
    }

    /// Number of live handles to the surface.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.backing)
    }

    /// True if both handles refer to the same surface.
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.backing, &b.backing)
    }
}

impl<S: SurfaceObject> fmt::Debug for SurfaceProxy<S> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SurfaceProxy")
            .field("surface", &self.surface_id())
            .field("pooled", &self.is_pooled())
            .field("refs", &self.ref_count())
            .finish()
    }
}
