// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Software surface provider backed by shareable CPU memory.
//!
//! Surfaces live in a `memfd` or in a Linux DMA heap so they can be
//! exported as file descriptors. Images are either derived (aliasing the
//! surface memory) or allocated separately, in which case pixels are moved
//! with row copies that honour both layouts.
//!
//! Copies never convert pixels: [`SurfaceProvider::get_image`] and
//! [`SurfaceProvider::put_image`] fail with [`Error::Provider`] when the
//! image and surface formats differ. An allocator for a format the provider
//! lacks (I420 over NV12 surfaces, say) can be built, but its memories
//! cannot be read back or synchronised with this provider.
//!
//! # Example
//!
//! ```no_run
//! use edgefirst_video_memory::provider::cpu::{Backend, CpuProvider};
//! use edgefirst_video_memory::PixelFormat;
//!
//! let provider = CpuProvider::builder()
//!     .backend(Backend::CmaHeap)
//!     .native_formats([PixelFormat::Nv12, PixelFormat::Yuy2])
//!     .pitch_alignment(64)
//!     .build();
//! assert!(provider.supports(PixelFormat::Nv12));
//! ```

use super::{
    BufferProxy, ImageObject, ObjectId, SurfaceAllocFlags, SurfaceObject, SurfaceProvider,
};
use crate::{
    error::{Error, Result},
    format::{ChromaType, ImageLayout, PixelFormat, VideoInfo},
};
use dma_heap::{Heap, HeapKind};
use libc::{
    dup, ftruncate, memfd_create, mmap, munmap, MAP_FAILED, MAP_SHARED, MFD_CLOEXEC, PROT_READ,
    PROT_WRITE,
};
use std::{
    ffi::c_void,
    fmt, io,
    os::fd::{AsRawFd, FromRawFd, OwnedFd},
    ptr::{copy_nonoverlapping, null_mut, NonNull},
    sync::{
        atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering},
        Arc,
    },
};
use tracing::{debug, warn};

/// Where surface memory is allocated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    /// Anonymous shared memory, available everywhere.
    #[default]
    Memfd,
    /// Physically contiguous DMA heap (`/dev/dma_heap/linux,cma`).
    CmaHeap,
    /// System DMA heap (`/dev/dma_heap/system`).
    SystemHeap,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Backend::Memfd => f.write_str("memfd"),
            Backend::CmaHeap => f.write_str("cma"),
            Backend::SystemHeap => f.write_str("system"),
        }
    }
}

/// Shareable memory mapped into this process for its whole lifetime.
struct SharedMemory {
    fd: OwnedFd,
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: the mapping is owned by this value and only unmapped on drop;
// concurrent access to the pixels is coordinated by the video memory layer.
unsafe impl Send for SharedMemory {}
unsafe impl Sync for SharedMemory {}

impl SharedMemory {
    fn allocate(backend: Backend, len: usize) -> Result<Self> {
        let len = len.max(1);
        let fd = match backend {
            Backend::Memfd => memfd(len)?,
            Backend::CmaHeap => heap_allocate(HeapKind::Cma, len)?,
            Backend::SystemHeap => heap_allocate(HeapKind::System, len)?,
        };

        let ptr = unsafe {
            mmap(
                null_mut(),
                len,
                PROT_READ | PROT_WRITE,
                MAP_SHARED,
                fd.as_raw_fd(),
                0,
            )
        };
        if ptr == MAP_FAILED {
            return Err(io::Error::last_os_error().into());
        }
        let ptr = NonNull::new(ptr.cast::<u8>())
            .ok_or_else(|| Error::Provider("mmap returned a null mapping".to_owned()))?;
        Ok(Self { fd, ptr, len })
    }

    fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    fn dup_fd(&self) -> Result<OwnedFd> {
        let fd = unsafe { dup(self.fd.as_raw_fd()) };
        if fd < 0 {
            return Err(io::Error::last_os_error().into());
        }
        Ok(unsafe { OwnedFd::from_raw_fd(fd) })
    }
}

impl Drop for SharedMemory {
    fn drop(&mut self) {
        if unsafe { munmap(self.ptr.as_ptr().cast::<c_void>(), self.len) } != 0 {
            warn!("unmap failed: {}", io::Error::last_os_error());
        }
    }
}

fn memfd(len: usize) -> Result<OwnedFd> {
    let fd = unsafe { memfd_create(c"edgefirst-surface".as_ptr(), MFD_CLOEXEC) };
    if fd < 0 {
        return Err(io::Error::last_os_error().into());
    }
    let fd = unsafe { OwnedFd::from_raw_fd(fd) };
    let size = libc::off_t::try_from(len)
        .map_err(|_| Error::Provider(format!("surface size {len} overflows off_t")))?;
    if unsafe { ftruncate(fd.as_raw_fd(), size) } != 0 {
        return Err(io::Error::last_os_error().into());
    }
    Ok(fd)
}

fn heap_allocate(kind: HeapKind, len: usize) -> Result<OwnedFd> {
    let heap = Heap::new(kind).map_err(|e| Error::Provider(format!("dma heap: {e}")))?;
    heap.allocate(len)
        .map_err(|e| Error::Provider(format!("dma heap allocation of {len} bytes: {e}")))
}

/// Surface allocated by a [`CpuProvider`].
pub struct CpuSurface {
    id: ObjectId,
    layout: ImageLayout,
    memory: Arc<SharedMemory>,
}

impl CpuSurface {
    pub fn layout(&self) -> &ImageLayout {
        &self.layout
    }

    /// Size in bytes of the backing memory.
    pub fn size(&self) -> usize {
        self.memory.len
    }
}

impl SurfaceObject for CpuSurface {
    fn id(&self) -> ObjectId {
        self.id
    }

    fn format(&self) -> PixelFormat {
        self.layout.format
    }

    fn width(&self) -> u32 {
        self.layout.width
    }

    fn height(&self) -> u32 {
        self.layout.height
    }
}

impl fmt::Debug for CpuSurface {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("CpuSurface")
            .field("id", &self.id)
            .field("format", &self.layout.format)
            .field("size", &self.memory.len)
            .finish()
    }
}

/// Image allocated or derived by a [`CpuProvider`].
pub struct CpuImage {
    id: ObjectId,
    layout: ImageLayout,
    memory: Arc<SharedMemory>,
    derived: bool,
    mapped: bool,
}

impl CpuImage {
    /// True if the image aliases the memory of a surface.
    pub fn is_derived(&self) -> bool {
        self.derived
    }

    pub fn is_mapped(&self) -> bool {
        self.mapped
    }
}

impl ImageObject for CpuImage {
    fn id(&self) -> ObjectId {
        self.id
    }

    fn layout(&self) -> &ImageLayout {
        &self.layout
    }
}

impl fmt::Debug for CpuImage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("CpuImage")
            .field("id", &self.id)
            .field("format", &self.layout.format)
            .field("derived", &self.derived)
            .field("mapped", &self.mapped)
            .finish()
    }
}

/// Operation counters of a [`CpuProvider`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuProviderStats {
    pub surfaces: usize,
    pub images: usize,
    pub derived: usize,
    /// Surface to image copies.
    pub downloads: usize,
    /// Image to surface copies.
    pub uploads: usize,
    pub exports: usize,
}

#[derive(Default)]
struct Counters {
    surfaces: AtomicUsize,
    images: AtomicUsize,
    derived: AtomicUsize,
    downloads: AtomicUsize,
    uploads: AtomicUsize,
    exports: AtomicUsize,
}

impl Counters {
    fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Builder for [`CpuProvider`].
#[derive(Debug, Clone)]
pub struct CpuProviderBuilder {
    backend: Backend,
    native_formats: Vec<PixelFormat>,
    pitch_alignment: usize,
    derive_images: bool,
}

impl Default for CpuProviderBuilder {
    fn default() -> Self {
        Self {
            backend: Backend::Memfd,
            native_formats: vec![
                PixelFormat::Nv12,
                PixelFormat::P010,
                PixelFormat::Yuy2,
                PixelFormat::Gray8,
                PixelFormat::Rgba,
                PixelFormat::Bgra,
            ],
            pitch_alignment: 64,
            derive_images: true,
        }
    }
}

impl CpuProviderBuilder {
    pub fn backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    /// Formats surfaces can be allocated in. The first format of each
    /// chroma class is used when only the class is requested.
    pub fn native_formats(mut self, formats: impl IntoIterator<Item = PixelFormat>) -> Self {
        self.native_formats = formats
            .into_iter()
            .filter(|format| *format != PixelFormat::Encoded)
            .collect();
        self
    }

    /// Row pitch alignment in bytes of surfaces and images.
    pub fn pitch_alignment(mut self, alignment: usize) -> Self {
        self.pitch_alignment = alignment.max(1);
        self
    }

    /// Whether images can be derived from surfaces.
    pub fn derive_images(mut self, enabled: bool) -> Self {
        self.derive_images = enabled;
        self
    }

    pub fn build(self) -> CpuProvider {
        debug!(
            "cpu provider backend:{} formats:{:?} alignment:{} derive:{}",
            self.backend, self.native_formats, self.pitch_alignment, self.derive_images
        );
        CpuProvider {
            backend: self.backend,
            native_formats: self.native_formats,
            pitch_alignment: self.pitch_alignment,
            derive_images: AtomicBool::new(self.derive_images),
            next_id: AtomicU32::new(1),
            counters: Counters::default(),
        }
    }
}

/// Surface provider allocating surfaces in CPU-mappable shared memory.
pub struct CpuProvider {
    backend: Backend,
    native_formats: Vec<PixelFormat>,
    pitch_alignment: usize,
    derive_images: AtomicBool,
    next_id: AtomicU32,
    counters: Counters,
}

impl Default for CpuProvider {
    fn default() -> Self {
        CpuProviderBuilder::default().build()
    }
}

impl CpuProvider {
    pub fn builder() -> CpuProviderBuilder {
        CpuProviderBuilder::default()
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub fn native_formats(&self) -> &[PixelFormat] {
        &self.native_formats
    }

    pub fn supports(&self, format: PixelFormat) -> bool {
        self.native_formats.contains(&format)
    }

    /// Toggle image derivation. Memories created afterwards under a direct
    /// strategy fall back to copies when derivation is disabled.
    pub fn set_derive_images(&self, enabled: bool) {
        self.derive_images.store(enabled, Ordering::Release);
    }

    pub fn stats(&self) -> CpuProviderStats {
        let c = &self.counters;
        CpuProviderStats {
            surfaces: c.surfaces.load(Ordering::Relaxed),
            images: c.images.load(Ordering::Relaxed),
            derived: c.derived.load(Ordering::Relaxed),
            downloads: c.downloads.load(Ordering::Relaxed),
            uploads: c.uploads.load(Ordering::Relaxed),
            exports: c.exports.load(Ordering::Relaxed),
        }
    }

    fn next_id(&self) -> ObjectId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn allocate_surface(&self, layout: ImageLayout) -> Result<CpuSurface> {
        let memory = SharedMemory::allocate(self.backend, layout.data_size)?;
        let surface = CpuSurface {
            id: self.next_id(),
            layout,
            memory: Arc::new(memory),
        };
        Counters::bump(&self.counters.surfaces);
        debug!("surface {surface:?} allocated");
        Ok(surface)
    }
}

/// Copy every plane of `src` into `dst`, row by row.
///
/// # Safety
///
/// Both pointers must address at least `data_size` bytes of their layouts
/// and the two regions must not overlap.
unsafe fn copy_planes(
    src: *const u8,
    src_layout: &ImageLayout,
    dst: *mut u8,
    dst_layout: &ImageLayout,
) {
    let format = src_layout.format;
    for plane in 0..src_layout.num_planes {
        let row_bytes = format
            .plane_row_bytes(plane, src_layout.width)
            .min(src_layout.pitches[plane])
            .min(dst_layout.pitches[plane]);
        for row in 0..format.plane_height(plane, src_layout.height) {
            let s = src.add(src_layout.offsets[plane] + row * src_layout.pitches[plane]);
            let d = dst.add(dst_layout.offsets[plane] + row * dst_layout.pitches[plane]);
            copy_nonoverlapping(s, d, row_bytes);
        }
    }
}

fn check_compatible(surface: &CpuSurface, image: &CpuImage) -> Result<()> {
    let (s, i) = (&surface.layout, &image.layout);
    if s.format != i.format || s.width != i.width || s.height != i.height {
        return Err(Error::Provider(format!(
            "cannot convert surface {} {}x{} {} to image {} {}x{} {}",
            surface.id, s.width, s.height, s.format, image.id, i.width, i.height, i.format
        )));
    }
    Ok(())
}

impl SurfaceProvider for CpuProvider {
    type Surface = CpuSurface;
    type Image = CpuImage;

    fn create_surface_with_format(
        &self,
        format: PixelFormat,
        width: u32,
        height: u32,
    ) -> Result<CpuSurface> {
        if !self.supports(format) {
            return Err(Error::Provider(format!(
                "surface format {format} is not supported"
            )));
        }
        self.allocate_surface(ImageLayout::packed(
            format,
            width,
            height,
            self.pitch_alignment,
        ))
    }

    fn create_surface(&self, chroma: ChromaType, width: u32, height: u32) -> Result<CpuSurface> {
        let format = self
            .native_formats
            .iter()
            .copied()
            .find(|format| format.chroma_type() == Some(chroma))
            .ok_or_else(|| Error::Provider(format!("no native format for chroma {chroma:?}")))?;
        self.create_surface_with_format(format, width, height)
    }

    fn create_surface_full(
        &self,
        info: &VideoInfo,
        flags: SurfaceAllocFlags,
    ) -> Result<CpuSurface> {
        let format = info.format();
        if !self.supports(format) {
            return Err(Error::Provider(format!(
                "surface format {format} is not supported"
            )));
        }

        let alignment = if flags.contains(SurfaceAllocFlags::LINEAR_STORAGE) {
            1
        } else {
            self.pitch_alignment
        };
        let mut layout = ImageLayout::packed(format, info.width(), info.height(), alignment);

        if flags.intersects(SurfaceAllocFlags::FIXED_STRIDES | SurfaceAllocFlags::FIXED_OFFSETS) {
            let mut offset = 0;
            let mut end = 0;
            for plane in 0..layout.num_planes {
                if flags.contains(SurfaceAllocFlags::FIXED_STRIDES) {
                    let row_bytes = format.plane_row_bytes(plane, info.width());
                    if info.stride(plane) < row_bytes {
                        return Err(Error::Provider(format!(
                            "stride {} of plane {plane} is below {row_bytes}",
                            info.stride(plane)
                        )));
                    }
                    layout.pitches[plane] = info.stride(plane);
                }
                layout.offsets[plane] = if flags.contains(SurfaceAllocFlags::FIXED_OFFSETS) {
                    info.offset(plane)
                } else {
                    offset
                };
                let plane_end = layout.offsets[plane]
                    + layout.pitches[plane] * format.plane_height(plane, info.height());
                offset = plane_end;
                end = end.max(plane_end);
            }
            layout.data_size = end.max(info.size());
        }

        self.allocate_surface(layout)
    }

    fn create_image(&self, format: PixelFormat, width: u32, height: u32) -> Result<CpuImage> {
        if format == PixelFormat::Encoded || width == 0 || height == 0 {
            return Err(Error::Provider(format!(
                "cannot create {width}x{height} {format} image"
            )));
        }
        let layout = ImageLayout::packed(format, width, height, self.pitch_alignment);
        let memory = SharedMemory::allocate(Backend::Memfd, layout.data_size)?;
        Counters::bump(&self.counters.images);
        Ok(CpuImage {
            id: self.next_id(),
            layout,
            memory: Arc::new(memory),
            derived: false,
            mapped: false,
        })
    }

    fn derive_image(&self, surface: &CpuSurface) -> Result<CpuImage> {
        if !self.derive_images.load(Ordering::Acquire) {
            return Err(Error::Provider(format!(
                "surface {} cannot be derived",
                surface.id
            )));
        }
        Counters::bump(&self.counters.derived);
        Ok(CpuImage {
            id: self.next_id(),
            layout: surface.layout,
            memory: surface.memory.clone(),
            derived: true,
            mapped: false,
        })
    }

    fn map_image(&self, image: &mut CpuImage) -> Result<NonNull<u8>> {
        image.mapped = true;
        Ok(image.memory.ptr)
    }

    fn unmap_image(&self, image: &mut CpuImage) -> Result<()> {
        image.mapped = false;
        Ok(())
    }

    fn get_image(&self, surface: &CpuSurface, image: &mut CpuImage) -> Result<()> {
        check_compatible(surface, image)?;
        if Arc::ptr_eq(&surface.memory, &image.memory) {
            return Ok(());
        }
        // SAFETY: both mappings cover their layouts and are distinct objects.
        unsafe {
            copy_planes(
                surface.memory.as_ptr(),
                &surface.layout,
                image.memory.as_ptr(),
                &image.layout,
            );
        }
        Counters::bump(&self.counters.downloads);
        Ok(())
    }

    fn put_image(&self, surface: &CpuSurface, image: &CpuImage) -> Result<()> {
        check_compatible(surface, image)?;
        if Arc::ptr_eq(&surface.memory, &image.memory) {
            return Ok(());
        }
        // SAFETY: both mappings cover their layouts and are distinct objects.
        unsafe {
            copy_planes(
                image.memory.as_ptr(),
                &image.layout,
                surface.memory.as_ptr(),
                &surface.layout,
            );
        }
        Counters::bump(&self.counters.uploads);
        Ok(())
    }

    fn export_dma_buf(&self, surface: &CpuSurface) -> Result<BufferProxy> {
        let fd = surface.memory.dup_fd()?;
        Counters::bump(&self.counters.exports);
        Ok(BufferProxy::new(fd, surface.memory.len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chroma_fallback_picks_native_format() {
        let provider = CpuProvider::builder()
            .native_formats([PixelFormat::Yuy2, PixelFormat::Nv12])
            .build();
        assert!(provider
            .create_surface_with_format(PixelFormat::I420, 64, 64)
            .is_err());
        let surface = provider
            .create_surface(ChromaType::Yuv420, 64, 64)
            .unwrap();
        assert_eq!(surface.format(), PixelFormat::Nv12);
    }

    #[test]
    fn derived_image_aliases_surface() {
        let provider = CpuProvider::default();
        let surface = provider
            .create_surface_with_format(PixelFormat::Nv12, 128, 64)
            .unwrap();
        let mut image = provider.derive_image(&surface).unwrap();
        assert!(image.is_derived());
        assert_eq!(image.layout(), surface.layout());

        let ptr = provider.map_image(&mut image).unwrap();
        unsafe { ptr.as_ptr().write(0x5a) };
        assert_eq!(unsafe { surface.memory.as_ptr().read() }, 0x5a);
        provider.unmap_image(&mut image).unwrap();
        assert!(!image.is_mapped());
    }

    #[test]
    fn copies_between_layouts() {
        let provider = CpuProvider::builder().pitch_alignment(256).build();
        let surface = provider
            .create_surface_with_format(PixelFormat::Gray8, 100, 4)
            .unwrap();
        let mut image = CpuProvider::builder()
            .pitch_alignment(1)
            .build()
            .create_image(PixelFormat::Gray8, 100, 4)
            .unwrap();
        assert_eq!(surface.layout().pitches[0], 256);
        assert_eq!(image.layout().pitches[0], 100);

        let ptr = provider.map_image(&mut image).unwrap();
        unsafe { std::ptr::write_bytes(ptr.as_ptr(), 7, 400) };
        provider.put_image(&surface, &image).unwrap();

        unsafe { std::ptr::write_bytes(ptr.as_ptr(), 0, 400) };
        provider.get_image(&surface, &mut image).unwrap();
        let data = unsafe { std::slice::from_raw_parts(ptr.as_ptr(), 400) };
        assert!(data.iter().all(|&b| b == 7));

        let stats = provider.stats();
        assert_eq!(stats.uploads, 1);
        assert_eq!(stats.downloads, 1);
    }

    #[test]
    fn rejects_conversion() {
        let provider = CpuProvider::default();
        let surface = provider
            .create_surface_with_format(PixelFormat::Nv12, 64, 64)
            .unwrap();
        let mut image = provider.create_image(PixelFormat::I420, 64, 64).unwrap();
        assert!(matches!(
            provider.get_image(&surface, &mut image),
            Err(Error::Provider(_))
        ));
    }

    #[test]
    fn fixed_strides_are_honoured() {
        let provider = CpuProvider::default();
        let info = VideoInfo::new(PixelFormat::Yuy2, 100, 10);
        let surface = provider
            .create_surface_full(&info, SurfaceAllocFlags::FIXED_STRIDES)
            .unwrap();
        assert_eq!(surface.layout().pitches[0], info.stride(0));
        assert_eq!(surface.size(), info.size());
    }
}
