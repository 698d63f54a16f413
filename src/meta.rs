// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Per-buffer video metadata.

use crate::{
    provider::{ObjectId, SurfaceObject},
    proxy::SurfaceProxy,
};
use parking_lot::Mutex;
use std::fmt;

struct MetaState<S> {
    proxy: Option<SurfaceProxy<S>>,
    image: Option<ObjectId>,
}

/// Metadata travelling with a buffer: the surface bound to it and the
/// image currently associated with its memory.
///
/// A memory adopts the meta's surface proxy instead of acquiring a new
/// surface, which is how soft copies and exported buffers share surfaces.
pub struct VideoMeta<S> {
    state: Mutex<MetaState<S>>,
}

impl<S> Default for VideoMeta<S> {
    fn default() -> Self {
        Self {
            state: Mutex::new(MetaState {
                proxy: None,
                image: None,
            }),
        }
    }
}

impl<S: SurfaceObject> VideoMeta<S> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_surface_proxy(proxy: SurfaceProxy<S>) -> Self {
        let meta = Self::default();
        meta.set_surface_proxy(Some(proxy));
        meta
    }

    pub fn surface_proxy(&self) -> Option<SurfaceProxy<S>> {
        self.state.lock().proxy.clone()
    }

    pub fn set_surface_proxy(&self, proxy: Option<SurfaceProxy<S>>) {
        self.state.lock().proxy = proxy;
    }

    pub fn image_id(&self) -> Option<ObjectId> {
        self.state.lock().image
    }

    pub fn set_image_id(&self, image: Option<ObjectId>) {
        self.state.lock().image = image;
    }

    /// Duplicate the metadata, sharing the surface proxy. The image stays
    /// with the source memory.
    pub fn copy(&self) -> Self {
        let state = self.state.lock();
        Self {
            state: Mutex::new(MetaState {
                proxy: state.proxy.clone(),
                image: None,
            }),
        }
    }
}

impl<S: SurfaceObject> fmt::Debug for VideoMeta<S> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("VideoMeta")
            .field("proxy", &state.proxy)
            .field("image", &state.image)
            .finish()
    }
}
