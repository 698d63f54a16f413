// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Video memory: one frame's worth of accelerator-backed pixels.
//!
//! A [`VideoMemory`] binds a surface and, lazily, a CPU-visible image. Its
//! map operations hand out [`MemoryMap`] guards that unmap on drop:
//!
//! - [`VideoMemory::map`] with no flags returns the surface proxy itself,
//!   after pushing any pending CPU edits onto the surface.
//! - [`VideoMemory::map`] with `READ` and/or `WRITE` maps the image
//!   linearly; reads pull the surface pixels into the image first.
//! - [`VideoMemory::map_plane`] maps the image and returns one plane.
//!
//! Overlapping maps must use the same map type and share one underlying
//! mapping; only the last unmap releases it.

use crate::{
    allocator::VideoAllocator,
    coherency::Coherency,
    error::{Error, Result},
    meta::VideoMeta,
    pool::Pooled,
    provider::{ImageObject, ObjectId, SurfaceProvider},
    proxy::SurfaceProxy,
    strategy::UsageStrategy,
};
use bitflags::bitflags;
use parking_lot::Mutex;
use std::{
    fmt,
    ptr::NonNull,
    slice::{from_raw_parts, from_raw_parts_mut},
    sync::Arc,
};
use tracing::{debug, error, info, trace, warn};

bitflags! {
    /// Access requested by a map operation.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MapFlags: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const READWRITE = Self::READ.bits() | Self::WRITE.bits();
    }
}

/// Kind of the outstanding mapping of a memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapType {
    None,
    /// Opaque surface handle access.
    Surface,
    /// The whole image as one byte range.
    Linear,
    /// A single image plane.
    Planar,
}

enum ImageSlot<I> {
    /// Aliases the surface memory.
    Derived(I),
    /// Copy buffer on loan from the image pool.
    Pooled(Pooled<I>),
}

impl<I> ImageSlot<I> {
    fn get(&self) -> &I {
        match self {
            ImageSlot::Derived(image) => image,
            ImageSlot::Pooled(image) => &**image,
        }
    }

    fn get_mut(&mut self) -> &mut I {
        match self {
            ImageSlot::Derived(image) => image,
            ImageSlot::Pooled(image) => &mut **image,
        }
    }
}

struct MemoryState<P: SurfaceProvider> {
    proxy: Option<SurfaceProxy<P::Surface>>,
    image: Option<ImageSlot<P::Image>>,
    /// Base address of the mapped image, if mapped.
    data: Option<NonNull<u8>>,
    coherency: Coherency,
    map_type: MapType,
    map_count: usize,
    /// Union of the flags of all outstanding maps.
    map_flags: MapFlags,
    /// A guard handed out mutable bytes; no further maps until it is gone.
    exclusive: bool,
    usage_flag: UsageStrategy,
}

// SAFETY: `data` points into the image owned by the same state and is only
// dereferenced through map guards, which hold a borrow of the memory.
unsafe impl<P: SurfaceProvider> Send for MemoryState<P> {}

/// Accelerator-backed frame memory with lazily bound surface and image.
pub struct VideoMemory<P: SurfaceProvider> {
    allocator: VideoAllocator<P>,
    meta: Arc<VideoMeta<P::Surface>>,
    size: usize,
    state: Mutex<MemoryState<P>>,
}

impl<P: SurfaceProvider> VideoMemory<P> {
    pub(crate) fn new(allocator: VideoAllocator<P>, meta: Arc<VideoMeta<P::Surface>>) -> Self {
        let size = allocator.image_size();
        let usage_flag = allocator.usage_flag();
        Self {
            allocator,
            meta,
            size,
            state: Mutex::new(MemoryState {
                proxy: None,
                image: None,
                data: None,
                coherency: Coherency::default(),
                map_type: MapType::None,
                map_count: 0,
                map_flags: MapFlags::empty(),
                exclusive: false,
                usage_flag,
            }),
        }
    }

    pub fn allocator(&self) -> &VideoAllocator<P> {
        &self.allocator
    }

    pub fn meta(&self) -> &Arc<VideoMeta<P::Surface>> {
        &self.meta
    }

    /// Size in bytes of the CPU-visible frame.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Strategy of this memory; starts as the allocator's and may only
    /// degrade to [`UsageStrategy::NativeFormats`].
    pub fn usage_flag(&self) -> UsageStrategy {
        self.state.lock().usage_flag
    }

    pub fn map_type(&self) -> MapType {
        self.state.lock().map_type
    }

    pub fn map_count(&self) -> usize {
        self.state.lock().map_count
    }

    pub fn coherency(&self) -> Coherency {
        self.state.lock().coherency
    }

    /// Surface currently held by this memory.
    pub fn surface_proxy(&self) -> Option<SurfaceProxy<P::Surface>> {
        self.state.lock().proxy.clone()
    }

    /// Image currently bound to this memory.
    pub fn image_id(&self) -> Option<ObjectId> {
        self.state.lock().image.as_ref().map(|slot| slot.get().id())
    }

    fn provider(&self) -> &P {
        self.allocator.provider()
    }

    fn ensure_surface(&self, st: &mut MemoryState<P>) -> Result<()> {
        if st.proxy.is_some() {
            return Ok(());
        }

        let proxy = match self.meta.surface_proxy() {
            Some(proxy) => proxy,
            None => {
                let proxy = SurfaceProxy::from_pool(self.allocator.surface_pool())
                    .inspect_err(|err| error!("failed to acquire surface: {err}"))?;
                self.meta.set_surface_proxy(Some(proxy.clone()));
                proxy
            }
        };
        trace!("memory bound to surface {}", proxy.surface_id());
        st.proxy = Some(proxy);
        Ok(())
    }

    fn ensure_image(&self, st: &mut MemoryState<P>) -> Result<()> {
        if st.image.is_none() && st.usage_flag.is_direct() {
            let proxy = st
                .proxy
                .as_ref()
                .ok_or_else(|| Error::AcquireFailed("image before surface".to_owned()))?;
            let expected = self.allocator.image_info().format();
            let derived = match self.provider().derive_image(proxy.surface()) {
                Ok(image) if image.format() == expected => Some(image),
                Ok(image) => {
                    info!(
                        target: "performance",
                        "derived image is {}, expected {expected}, falling back to copies",
                        image.format()
                    );
                    None
                }
                Err(err) => {
                    info!(
                        target: "performance",
                        "failed to derive image ({err}), falling back to copies"
                    );
                    None
                }
            };
            match derived {
                Some(image) => st.image = Some(ImageSlot::Derived(image)),
                None => st.usage_flag = UsageStrategy::NativeFormats,
            }
        }

        if st.image.is_none() {
            let pool = self.allocator.image_pool();
            let image = pool
                .try_acquire()
                .map_err(|err| match err {
                    Error::ResourceExhausted(_) => err,
                    other => Error::AcquireFailed(format!("image from {} pool: {other}", pool.name())),
                })
                .inspect_err(|err| error!("failed to acquire image: {err}"))?;
            st.image = Some(ImageSlot::Pooled(image));
        }

        self.meta
            .set_image_id(st.image.as_ref().map(|slot| slot.get().id()));
        Ok(())
    }

    fn ensure_image_is_current(&self, st: &mut MemoryState<P>) -> Result<()> {
        if st.usage_flag.is_direct() || st.coherency.image_is_current() {
            return Ok(());
        }

        let (Some(proxy), Some(slot)) = (st.proxy.as_ref(), st.image.as_mut()) else {
            return Err(Error::SyncFailed("image without a surface".to_owned()));
        };
        self.provider()
            .get_image(proxy.surface(), slot.get_mut())
            .map_err(|err| {
                Error::SyncFailed(format!("surface {} to image: {err}", proxy.surface_id()))
            })?;
        st.coherency.image_pulled();
        Ok(())
    }

    fn ensure_surface_is_current(&self, st: &mut MemoryState<P>) -> Result<()> {
        if st.usage_flag.is_direct() || st.coherency.surface_is_current() {
            return Ok(());
        }
        // an outstanding writer may still change the image
        if st.map_count > 0 && st.map_flags.contains(MapFlags::WRITE) {
            debug!("surface push deferred until the write map is released");
            return Ok(());
        }

        if st.coherency.image_is_current() {
            let slot = st
                .image
                .as_ref()
                .ok_or_else(|| Error::SyncFailed("no image to push".to_owned()))?;
            let proxy = st
                .proxy
                .clone()
                .or_else(|| self.meta.surface_proxy())
                .ok_or_else(|| Error::SyncFailed("no surface to push onto".to_owned()))?;
            self.provider()
                .put_image(proxy.surface(), slot.get())
                .map_err(|err| {
                    Error::SyncFailed(format!("image to surface {}: {err}", proxy.surface_id()))
                })?;
            trace!("image pushed to surface {}", proxy.surface_id());
        }
        st.coherency.surface_pushed();
        Ok(())
    }

    fn map_image_memory(&self, st: &mut MemoryState<P>, flags: MapFlags) -> Result<()> {
        self.ensure_surface(st)?;
        self.ensure_image(st)?;
        if flags.contains(MapFlags::READ) {
            self.ensure_image_is_current(st)?;
        }

        let provider = self.provider();
        let slot = st
            .image
            .as_mut()
            .ok_or_else(|| Error::AcquireFailed("image".to_owned()))?;
        let id = slot.get().id();
        let data = provider.map_image(slot.get_mut()).map_err(|err| {
            error!("failed to map image {id}: {err}");
            Error::AcquireFailed(format!("mapping of image {id}: {err}"))
        })?;
        st.data = Some(data);

        if flags.contains(MapFlags::WRITE) {
            st.coherency.write_begun();
        }
        Ok(())
    }

    fn unmap_image_memory(&self, st: &mut MemoryState<P>, flags: MapFlags) {
        if let (Some(slot), Some(_)) = (st.image.as_mut(), st.data.take()) {
            if let Err(err) = self.provider().unmap_image(slot.get_mut()) {
                warn!("failed to unmap image {}: {err}", slot.get().id());
            }
        }

        if flags.contains(MapFlags::WRITE) {
            st.coherency.image_written();
        }

        if st.usage_flag.is_direct() {
            self.meta.set_image_id(None);
            Self::release_image(self.provider(), st);
        }
    }

    fn release_image(provider: &P, st: &mut MemoryState<P>) {
        if let Some(mut slot) = st.image.take() {
            if st.data.take().is_some() {
                if let Err(err) = provider.unmap_image(slot.get_mut()) {
                    warn!("failed to unmap image {}: {err}", slot.get().id());
                }
            }
            // derived images are destroyed, pooled ones return to the pool
            drop(slot);
        }
        st.coherency.image_released();
    }

    fn check_compatible(st: &MemoryState<P>, requested: MapType) -> Result<()> {
        if st.exclusive {
            return Err(Error::UnsupportedOperation(
                "memory is held by an exclusive writer".to_owned(),
            ));
        }
        if st.map_count > 0 && st.map_type != requested {
            return Err(Error::IncompatibleMap {
                current: st.map_type,
                requested,
            });
        }
        Ok(())
    }

    fn image_data(st: &MemoryState<P>) -> Result<(NonNull<u8>, &P::Image)> {
        match (st.data, st.image.as_ref()) {
            (Some(data), Some(slot)) => Ok((data, slot.get())),
            _ => Err(Error::AcquireFailed("image mapping".to_owned())),
        }
    }

    /// Map the memory.
    ///
    /// With no flags the surface proxy is returned for accelerator-aware
    /// consumers, once the surface holds the latest pixels. With `READ`
    /// and/or `WRITE` the image is mapped as one byte range.
    pub fn map(&self, flags: MapFlags) -> Result<MemoryMap<'_, P>> {
        let requested = if flags.intersects(MapFlags::READWRITE) {
            MapType::Linear
        } else {
            MapType::Surface
        };

        let mut guard = self.state.lock();
        let st = &mut *guard;
        Self::check_compatible(st, requested)?;

        if st.map_count == 0 {
            match requested {
                MapType::Surface => {
                    self.ensure_surface(st)?;
                    self.ensure_surface_is_current(st).inspect_err(|err| {
                        error!("failed to make surface current: {err}");
                    })?;
                }
                _ => self.map_image_memory(st, flags)?,
            }
            st.map_type = requested;
        } else if flags.contains(MapFlags::WRITE) && requested == MapType::Linear {
            st.coherency.write_begun();
        }

        let data = match requested {
            MapType::Surface => st
                .proxy
                .clone()
                .map(MapData::Surface)
                .ok_or_else(|| Error::AcquireFailed("surface".to_owned()))?,
            _ => {
                let (ptr, image) = Self::image_data(st)?;
                MapData::Linear {
                    ptr,
                    len: image.layout().data_size,
                }
            }
        };

        st.map_count += 1;
        st.map_flags |= flags;
        trace!("mapped {requested:?} count:{}", st.map_count);

        Ok(MemoryMap {
            memory: self,
            flags,
            data,
        })
    }

    /// Map one plane of the image.
    pub fn map_plane(&self, plane: usize, flags: MapFlags) -> Result<MemoryMap<'_, P>> {
        let n_planes = self.allocator.image_info().n_planes();
        if plane >= n_planes {
            return Err(Error::UnsupportedOperation(format!(
                "plane {plane} of a {n_planes} plane image"
            )));
        }

        let mut guard = self.state.lock();
        let st = &mut *guard;
        Self::check_compatible(st, MapType::Planar)?;

        if st.map_count == 0 {
            self.map_image_memory(st, flags)?;
            st.map_type = MapType::Planar;
        } else if flags.contains(MapFlags::WRITE) {
            st.coherency.write_begun();
        }

        let (base, image) = Self::image_data(st)?;
        let layout = image.layout();
        let stride = layout.pitches[plane];
        let len = stride * layout.format.plane_height(plane, layout.height);
        // SAFETY: plane offsets lie within the mapped image data.
        let ptr = unsafe { NonNull::new_unchecked(base.as_ptr().add(layout.offsets[plane])) };

        st.map_count += 1;
        st.map_flags |= flags;
        trace!("mapped plane {plane} count:{}", st.map_count);

        Ok(MemoryMap {
            memory: self,
            flags,
            data: MapData::Plane {
                plane,
                ptr,
                stride,
                len,
            },
        })
    }

    fn unmap_one(&self) {
        let mut guard = self.state.lock();
        let st = &mut *guard;
        if st.map_count == 0 {
            warn!("unmap without an outstanding map");
            return;
        }

        st.map_count -= 1;
        if st.map_count > 0 {
            return;
        }

        let flags = std::mem::replace(&mut st.map_flags, MapFlags::empty());
        match st.map_type {
            MapType::Surface => st.proxy = None,
            MapType::Linear | MapType::Planar => self.unmap_image_memory(st, flags),
            MapType::None => {}
        }
        st.map_type = MapType::None;
        st.exclusive = false;
        trace!("unmapped {flags:?}");
    }

    /// Make the surface hold the latest pixels, pushing pending image edits.
    ///
    /// A no-op when the surface is already current or the memory aliases
    /// the surface directly. While a write map is outstanding the push is
    /// deferred; the surface stays stale until the next sync after unmap.
    pub fn sync(&self) -> Result<()> {
        let mut guard = self.state.lock();
        self.ensure_surface_is_current(&mut guard)
    }

    /// Soft copy: a new memory sharing this memory's surface.
    ///
    /// Only whole-memory copies are supported; `size` of `None` means the
    /// full size.
    pub fn copy(&self, offset: usize, size: Option<usize>) -> Result<VideoMemory<P>> {
        if offset != 0 || size.is_some_and(|size| size != self.size) {
            return Err(Error::UnsupportedOperation(format!(
                "partial copy of {size:?} bytes at offset {offset}"
            )));
        }

        {
            let mut guard = self.state.lock();
            let st = &mut *guard;
            self.ensure_surface(st)?;
            self.ensure_surface_is_current(st)
                .inspect_err(|err| error!("failed to synchronise surface for copy: {err}"))?;
        }

        let meta = Arc::new(self.meta.copy());
        Ok(self.allocator.alloc_with_meta(meta))
    }

    /// Discard the image without synchronising it.
    pub fn reset_image(&self) -> Result<()> {
        let mut guard = self.state.lock();
        let st = &mut *guard;
        if st.map_count > 0 {
            return Err(Error::UnsupportedOperation(
                "reset of a mapped image".to_owned(),
            ));
        }
        self.meta.set_image_id(None);
        Self::release_image(self.provider(), st);
        Ok(())
    }

    /// Discard both the image and the surface, unbinding the metadata.
    pub fn reset_surface(&self) -> Result<()> {
        let mut guard = self.state.lock();
        let st = &mut *guard;
        if st.map_count > 0 {
            return Err(Error::UnsupportedOperation(
                "reset of a mapped surface".to_owned(),
            ));
        }
        self.meta.set_image_id(None);
        Self::release_image(self.provider(), st);
        st.proxy = None;
        self.meta.set_surface_proxy(None);
        st.coherency.surface_released();
        Ok(())
    }
}

impl<P: SurfaceProvider> Drop for VideoMemory<P> {
    fn drop(&mut self) {
        let provider = self.allocator.provider();
        let st = self.state.get_mut();
        st.proxy = None;
        Self::release_image(provider, st);
        debug!("video memory freed");
    }
}

impl<P: SurfaceProvider> fmt::Debug for VideoMemory<P> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let st = self.state.lock();
        f.debug_struct("VideoMemory")
            .field("size", &self.size)
            .field("usage", &st.usage_flag)
            .field("map_type", &st.map_type)
            .field("map_count", &st.map_count)
            .field("coherency", &st.coherency)
            .finish()
    }
}

/// What a map operation returned.
pub enum MapData<S> {
    /// The surface itself.
    Surface(SurfaceProxy<S>),
    /// The whole image.
    Linear { ptr: NonNull<u8>, len: usize },
    /// One image plane.
    Plane {
        plane: usize,
        ptr: NonNull<u8>,
        stride: usize,
        len: usize,
    },
}

/// Outstanding mapping of a [`VideoMemory`], unmapped on drop.
///
/// Overlapping maps of the same memory share the same bytes read-only.
/// Mutable access is only granted to the sole outstanding map, which then
/// holds the memory exclusively until it is dropped.
pub struct MemoryMap<'a, P: SurfaceProvider> {
    memory: &'a VideoMemory<P>,
    flags: MapFlags,
    data: MapData<P::Surface>,
}

impl<P: SurfaceProvider> MemoryMap<'_, P> {
    pub fn flags(&self) -> MapFlags {
        self.flags
    }

    pub fn map_type(&self) -> MapType {
        match self.data {
            MapData::Surface(_) => MapType::Surface,
            MapData::Linear { .. } => MapType::Linear,
            MapData::Plane { .. } => MapType::Planar,
        }
    }

    pub fn data(&self) -> &MapData<P::Surface> {
        &self.data
    }

    pub fn surface_proxy(&self) -> Option<&SurfaceProxy<P::Surface>> {
        match &self.data {
            MapData::Surface(proxy) => Some(proxy),
            _ => None,
        }
    }

    /// Row stride of a plane map.
    pub fn stride(&self) -> Option<usize> {
        match self.data {
            MapData::Plane { stride, .. } => Some(stride),
            _ => None,
        }
    }

    fn raw(&self) -> Option<(NonNull<u8>, usize)> {
        match self.data {
            MapData::Surface(_) => None,
            MapData::Linear { ptr, len } | MapData::Plane { ptr, len, .. } => Some((ptr, len)),
        }
    }

    /// Mapped bytes; empty for surface maps.
    pub fn as_slice(&self) -> &[u8] {
        match self.raw() {
            Some((ptr, len)) => unsafe { from_raw_parts(ptr.as_ptr(), len) },
            None => &[],
        }
    }

    /// Mapped bytes for writing.
    ///
    /// Requires a `WRITE` map that is the only outstanding map of its
    /// memory. Further maps are refused until this guard is dropped.
    pub fn as_mut_slice(&mut self) -> Result<&mut [u8]> {
        if !self.flags.contains(MapFlags::WRITE) {
            return Err(Error::UnsupportedOperation(
                "write access to a map without WRITE".to_owned(),
            ));
        }
        let (ptr, len) = self.raw().ok_or_else(|| {
            Error::UnsupportedOperation("byte access to a surface map".to_owned())
        })?;

        let mut st = self.memory.state.lock();
        if st.map_count != 1 {
            return Err(Error::UnsupportedOperation(format!(
                "write access shared with {} other maps",
                st.map_count - 1
            )));
        }
        st.exclusive = true;
        drop(st);

        // SAFETY: this guard is the only map, later maps are refused while
        // it lives and the slice borrows the guard mutably.
        Ok(unsafe { from_raw_parts_mut(ptr.as_ptr(), len) })
    }

    /// Release the mapping. Equivalent to dropping the guard.
    pub fn unmap(self) {
        drop(self)
    }
}

impl<P: SurfaceProvider> Drop for MemoryMap<'_, P> {
    fn drop(&mut self) {
        self.memory.unmap_one();
    }
}

impl<P: SurfaceProvider> fmt::Debug for MemoryMap<'_, P> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("MemoryMap")
            .field("map_type", &self.map_type())
            .field("flags", &self.flags)
            .field("len", &self.raw().map(|(_, len)| len))
            .finish()
    }
}
