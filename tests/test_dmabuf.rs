// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use edgefirst_video_memory::{
    provider::cpu::{Backend, CpuImage, CpuProvider, CpuSurface},
    BufferProxy, ChromaType, DmaBufAllocator, Error as MemoryError, ExportStage, PixelFormat,
    Result as MemoryResult, SurfaceAllocFlags, SurfaceProvider, VideoInfo,
};
use serial_test::serial;
use std::{
    error::Error,
    os::fd::RawFd,
    ptr::NonNull,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

/// CPU provider whose surface creation and export can be made to fail.
#[derive(Default)]
struct FlakyProvider {
    inner: CpuProvider,
    fail_create: AtomicBool,
    fail_export: AtomicBool,
}

impl FlakyProvider {
    fn injected(what: &str) -> MemoryError {
        MemoryError::Provider(format!("injected {what} failure"))
    }
}

impl SurfaceProvider for FlakyProvider {
    type Surface = CpuSurface;
    type Image = CpuImage;

    fn create_surface_with_format(
        &self,
        format: PixelFormat,
        width: u32,
        height: u32,
    ) -> MemoryResult<CpuSurface> {
        self.inner.create_surface_with_format(format, width, height)
    }

    fn create_surface(
        &self,
        chroma: ChromaType,
        width: u32,
        height: u32,
    ) -> MemoryResult<CpuSurface> {
        self.inner.create_surface(chroma, width, height)
    }

    fn create_surface_full(
        &self,
        info: &VideoInfo,
        flags: SurfaceAllocFlags,
    ) -> MemoryResult<CpuSurface> {
        if self.fail_create.load(Ordering::Relaxed) {
            return Err(Self::injected("surface creation"));
        }
        self.inner.create_surface_full(info, flags)
    }

    fn create_image(
        &self,
        format: PixelFormat,
        width: u32,
        height: u32,
    ) -> MemoryResult<CpuImage> {
        self.inner.create_image(format, width, height)
    }

    fn derive_image(&self, surface: &CpuSurface) -> MemoryResult<CpuImage> {
        self.inner.derive_image(surface)
    }

    fn map_image(&self, image: &mut CpuImage) -> MemoryResult<NonNull<u8>> {
        self.inner.map_image(image)
    }

    fn unmap_image(&self, image: &mut CpuImage) -> MemoryResult<()> {
        self.inner.unmap_image(image)
    }

    fn get_image(&self, surface: &CpuSurface, image: &mut CpuImage) -> MemoryResult<()> {
        self.inner.get_image(surface, image)
    }

    fn put_image(&self, surface: &CpuSurface, image: &CpuImage) -> MemoryResult<()> {
        self.inner.put_image(surface, image)
    }

    fn export_dma_buf(&self, surface: &CpuSurface) -> MemoryResult<BufferProxy> {
        if self.fail_export.load(Ordering::Relaxed) {
            return Err(Self::injected("export"));
        }
        self.inner.export_dma_buf(surface)
    }
}

fn fd_size(fd: RawFd) -> Result<usize, Box<dyn Error>> {
    let mut stat: libc::stat = unsafe { std::mem::zeroed() };
    if unsafe { libc::fstat(fd, &mut stat) } != 0 {
        return Err(Box::new(std::io::Error::last_os_error()));
    }
    Ok(stat.st_size as usize)
}

fn is_open(fd: RawFd) -> bool {
    unsafe { libc::fcntl(fd, libc::F_GETFD) != -1 }
}

#[test]
fn test_export_distinct_fds() -> Result<(), Box<dyn Error>> {
    let provider = Arc::new(CpuProvider::default());
    let info = VideoInfo::new(PixelFormat::Nv12, 1920, 1080);
    let allocator = DmaBufAllocator::new(provider.clone(), &info, SurfaceAllocFlags::empty())?;
    assert_eq!(allocator.video_info().size(), 3110400);

    let a = allocator.alloc()?;
    let b = allocator.alloc()?;
    println!("{a} {b}");

    assert_ne!(a.raw_fd(), b.raw_fd());
    assert_ne!(a.raw_fd(), a.buffer_proxy().raw_handle());
    assert_eq!(a.size(), a.buffer_proxy().size());
    assert_eq!(a.size(), allocator.video_info().size());
    assert_eq!(fd_size(a.raw_fd())?, a.size());
    assert_eq!(fd_size(b.raw_fd())?, b.size());

    assert!(a.meta().surface_proxy().is_some());
    assert_eq!(provider.stats().exports, 2);
    Ok(())
}

#[test]
fn test_independent_close() -> Result<(), Box<dyn Error>> {
    let provider = Arc::new(CpuProvider::default());
    let info = VideoInfo::new(PixelFormat::Yuy2, 640, 480);
    let allocator = DmaBufAllocator::new(provider, &info, SurfaceAllocFlags::empty())?;

    let a = allocator.alloc()?;
    let b = allocator.alloc()?;
    let handle = b.buffer_proxy().raw_handle();

    let fd = a.into_fd();
    drop(fd);
    assert!(is_open(b.raw_fd()));
    assert!(is_open(handle));

    let dmabuf = b.dmabuf()?;
    drop(dmabuf);
    assert!(is_open(b.raw_fd()));
    Ok(())
}

#[test]
fn test_measured_layout() -> Result<(), Box<dyn Error>> {
    let provider = Arc::new(CpuProvider::builder().pitch_alignment(256).build());
    let info = VideoInfo::new(PixelFormat::Rgba, 100, 8);
    let allocator = DmaBufAllocator::new(provider, &info, SurfaceAllocFlags::empty())?;
    assert_eq!(allocator.video_info().stride(0), 512);
    assert_eq!(allocator.alloc()?.size(), 512 * 8);

    let provider = Arc::new(CpuProvider::builder().pitch_alignment(256).build());
    let allocator = DmaBufAllocator::new(provider, &info, SurfaceAllocFlags::FIXED_STRIDES)?;
    assert_eq!(allocator.flags(), SurfaceAllocFlags::FIXED_STRIDES);
    assert_eq!(allocator.video_info().stride(0), 400);
    Ok(())
}

#[test]
fn test_unsupported_format() -> Result<(), Box<dyn Error>> {
    let provider = Arc::new(
        CpuProvider::builder()
            .native_formats([PixelFormat::Nv12])
            .build(),
    );
    let info = VideoInfo::new(PixelFormat::Bgrx, 64, 64);
    let result = DmaBufAllocator::new(provider, &info, SurfaceAllocFlags::empty());
    assert!(matches!(result, Err(MemoryError::ProbeFailed(_))));
    Ok(())
}

#[test]
fn test_export_stage_errors() -> Result<(), Box<dyn Error>> {
    let provider = Arc::new(FlakyProvider::default());
    let info = VideoInfo::new(PixelFormat::Nv12, 320, 240);
    let allocator = DmaBufAllocator::new(provider.clone(), &info, SurfaceAllocFlags::empty())?;

    provider.fail_export.store(true, Ordering::Relaxed);
    let err = allocator.alloc().unwrap_err();
    assert!(
        matches!(
            err,
            MemoryError::ExportFailed {
                stage: ExportStage::Export,
                ..
            }
        ),
        "{err}"
    );
    assert_eq!(provider.inner.stats().exports, 0);

    provider.fail_export.store(false, Ordering::Relaxed);
    provider.fail_create.store(true, Ordering::Relaxed);
    let err = allocator.alloc().unwrap_err();
    assert!(
        matches!(
            err,
            MemoryError::ExportFailed {
                stage: ExportStage::CreateSurface,
                ..
            }
        ),
        "{err}"
    );

    provider.fail_create.store(false, Ordering::Relaxed);
    let memory = allocator.alloc()?;
    assert!(memory.meta().surface_proxy().is_some());
    assert_eq!(provider.inner.stats().exports, 1);
    Ok(())
}

#[test]
#[serial]
#[ignore = "requires /dev/dma_heap/linux,cma"]
fn test_cma_export() -> Result<(), Box<dyn Error>> {
    let provider = Arc::new(CpuProvider::builder().backend(Backend::CmaHeap).build());
    let info = VideoInfo::new(PixelFormat::Nv12, 1920, 1080);
    let allocator = DmaBufAllocator::new(provider, &info, SurfaceAllocFlags::empty())?;

    let memory = allocator.alloc()?;
    println!("{memory}");
    assert!(fd_size(memory.raw_fd())? >= memory.size());
    let _dmabuf = memory.dmabuf()?;
    Ok(())
}
