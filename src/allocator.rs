// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Video allocator: format descriptors, usage strategy and object pools.

use crate::{
    error::Result,
    format::VideoInfo,
    memory::VideoMemory,
    meta::VideoMeta,
    pool::ObjectPool,
    provider::{ImageObject, SurfaceAllocFlags, SurfaceProvider},
    strategy::{select_strategy, UsageStrategy},
};
use std::{fmt, sync::Arc};
use tracing::{debug, info, warn};

/// Default number of objects in each pool.
pub const DEFAULT_POOL_CAPACITY: usize = 16;

/// Pool sizing of a [`VideoAllocator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocatorConfig {
    pub surface_pool_capacity: usize,
    pub image_pool_capacity: usize,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            surface_pool_capacity: DEFAULT_POOL_CAPACITY,
            image_pool_capacity: DEFAULT_POOL_CAPACITY,
        }
    }
}

impl AllocatorConfig {
    pub fn with_surface_pool_capacity(mut self, capacity: usize) -> Self {
        self.surface_pool_capacity = capacity;
        self
    }

    pub fn with_image_pool_capacity(mut self, capacity: usize) -> Self {
        self.image_pool_capacity = capacity;
        self
    }
}

struct AllocatorInner<P: SurfaceProvider> {
    provider: Arc<P>,
    video_info: VideoInfo,
    surface_info: VideoInfo,
    image_info: VideoInfo,
    usage_flag: UsageStrategy,
    surface_flags: SurfaceAllocFlags,
    surface_pool: ObjectPool<P::Surface>,
    image_pool: ObjectPool<P::Image>,
}

/// Mints [`VideoMemory`] objects for one format and size.
///
/// Clones share the descriptors and pools.
pub struct VideoAllocator<P: SurfaceProvider> {
    inner: Arc<AllocatorInner<P>>,
}

impl<P: SurfaceProvider> Clone for VideoAllocator<P> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// Layout of the CPU-visible images under [`UsageStrategy::NativeFormats`],
/// measured on a scratch image. Falls back to the default layout.
fn measure_image_info<P: SurfaceProvider>(provider: &P, info: &VideoInfo) -> VideoInfo {
    let mut image_info = *info;
    image_info.force_nv12_if_encoded();
    if image_info.width() == 0 || image_info.height() == 0 {
        return image_info;
    }

    let mut image = match provider.create_image(
        image_info.format(),
        image_info.width(),
        image_info.height(),
    ) {
        Ok(image) => image,
        Err(err) => {
            warn!("cannot measure {image_info}: {err}");
            return image_info;
        }
    };
    if let Err(err) = provider.map_image(&mut image) {
        warn!("cannot map image {} for measurement: {err}", image.id());
        return image_info;
    }

    let mut measured = image_info;
    if measured.update_from_layout(image.layout()) {
        image_info = measured;
    } else {
        warn!("image {} layout is unusable, keeping {image_info}", image.id());
    }
    if let Err(err) = provider.unmap_image(&mut image) {
        warn!("failed to unmap image {}: {err}", image.id());
    }
    image_info
}

impl<P: SurfaceProvider> VideoAllocator<P> {
    /// Configure an allocator for frames described by `info`.
    ///
    /// Runs usage strategy selection, measures the image layout and creates
    /// both pools. Objects are only allocated once memories are mapped.
    pub fn new(
        provider: Arc<P>,
        info: &VideoInfo,
        surface_flags: SurfaceAllocFlags,
        requested: UsageStrategy,
        config: &AllocatorConfig,
    ) -> Result<Self> {
        let (usage_flag, surface_info) = select_strategy(provider.as_ref(), info, requested)?;

        let image_info = if usage_flag.is_direct() {
            surface_info
        } else {
            measure_image_info(provider.as_ref(), info)
        };

        let surface_pool = {
            let provider = provider.clone();
            ObjectPool::new("surface", config.surface_pool_capacity, move || {
                provider.create_surface_full(&surface_info, surface_flags)
            })?
        };
        let image_pool = {
            let provider = provider.clone();
            ObjectPool::new("image", config.image_pool_capacity, move || {
                provider.create_image(image_info.format(), image_info.width(), image_info.height())
            })?
        };

        info!(
            usage = %usage_flag,
            requested = %requested,
            "allocator {} surface:{} image:{}",
            info, surface_info, image_info
        );

        Ok(Self {
            inner: Arc::new(AllocatorInner {
                provider,
                video_info: *info,
                surface_info,
                image_info,
                usage_flag,
                surface_flags,
                surface_pool,
                image_pool,
            }),
        })
    }

    /// New memory with fresh metadata. Nothing is allocated until mapped.
    pub fn alloc(&self) -> VideoMemory<P> {
        self.alloc_with_meta(Arc::new(VideoMeta::new()))
    }

    /// New memory bound to existing metadata; its surface proxy, if any, is
    /// adopted instead of acquiring a surface from the pool.
    pub fn alloc_with_meta(&self, meta: Arc<VideoMeta<P::Surface>>) -> VideoMemory<P> {
        debug!("alloc {} bytes", self.image_size());
        VideoMemory::new(self.clone(), meta)
    }

    pub fn provider(&self) -> &P {
        &self.inner.provider
    }

    /// Descriptor the allocator was configured with.
    pub fn video_info(&self) -> &VideoInfo {
        &self.inner.video_info
    }

    pub fn surface_info(&self) -> &VideoInfo {
        &self.inner.surface_info
    }

    pub fn image_info(&self) -> &VideoInfo {
        &self.inner.image_info
    }

    pub fn usage_flag(&self) -> UsageStrategy {
        self.inner.usage_flag
    }

    pub fn surface_alloc_flags(&self) -> SurfaceAllocFlags {
        self.inner.surface_flags
    }

    /// Size in bytes of a CPU-visible frame.
    pub fn image_size(&self) -> usize {
        self.inner.image_info.size()
    }

    pub fn surface_pool(&self) -> &ObjectPool<P::Surface> {
        &self.inner.surface_pool
    }

    pub fn image_pool(&self) -> &ObjectPool<P::Image> {
        &self.inner.image_pool
    }
}

impl<P: SurfaceProvider> fmt::Debug for VideoAllocator<P> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("VideoAllocator")
            .field("usage", &self.inner.usage_flag)
            .field("video_info", &self.inner.video_info)
            .field("surface_info", &self.inner.surface_info)
            .field("image_info", &self.inner.image_info)
            .field("surface_pool", &self.inner.surface_pool)
            .field("image_pool", &self.inner.image_pool)
            .finish()
    }
}
