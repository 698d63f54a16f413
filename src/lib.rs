// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! # EdgeFirst Video Memory
//!
//! This library allocates video frame memory backed by hardware video
//! surfaces and keeps a CPU-visible image of each frame coherent with its
//! surface. It lets decoders, encoders and post-processors exchange frames
//! without copying whenever the hardware allows it, and falls back to
//! explicit copies when it does not.
//!
//! ## Features
//!
//! - **Usage Strategy Selection**: Probes the accelerator once per
//!   allocator to decide whether CPU access can alias surface memory
//!   (direct render, direct upload) or needs a separate image
//!   (native formats).
//! - **Lazy Binding**: Surfaces and images are taken from bounded pools only
//!   when a memory is first mapped.
//! - **Coherency Tracking**: Pixels move between image and surface only when
//!   the other side is stale.
//! - **DMA Export**: Surfaces can be exported as DMA-BUF file descriptors.
//!
//! ## Example
//!
//! ```no_run
//! use edgefirst_video_memory::{
//!     provider::cpu::CpuProvider, AllocatorConfig, MapFlags, PixelFormat, SurfaceAllocFlags,
//!     UsageStrategy, VideoAllocator, VideoInfo,
//! };
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let provider = Arc::new(CpuProvider::default());
//! let info = VideoInfo::new(PixelFormat::Nv12, 1920, 1080);
//! let allocator = VideoAllocator::new(
//!     provider,
//!     &info,
//!     SurfaceAllocFlags::empty(),
//!     UsageStrategy::DirectRender,
//!     &AllocatorConfig::default(),
//! )?;
//!
//! let memory = allocator.alloc();
//! {
//!     let mut map = memory.map(MapFlags::WRITE)?;
//!     map.as_mut_slice()?.fill(0x80);
//! }
//! memory.sync()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Safety
//!
//! Surface memory is reached through raw mappings. All unsafe operations are
//! isolated to the provider and the map guards and wrapped with safe APIs.
//! Overlapping maps share bytes read-only; a map only writes while it is
//! the sole outstanding map of its memory.

pub mod allocator;
pub mod coherency;
pub mod dmabuf;
pub mod error;
pub mod format;
pub mod memory;
pub mod meta;
pub mod pool;
pub mod provider;
pub mod proxy;
pub mod strategy;

pub use allocator::{AllocatorConfig, VideoAllocator};
pub use dmabuf::{DmaBufAllocator, DmaBufMemory};
pub use error::{Error, ExportStage, Result};
pub use format::{ChromaType, ImageLayout, PixelFormat, VideoInfo};
pub use memory::{MapData, MapFlags, MapType, MemoryMap, VideoMemory};
pub use meta::VideoMeta;
pub use provider::{BufferProxy, SurfaceAllocFlags, SurfaceProvider};
pub use proxy::SurfaceProxy;
pub use strategy::UsageStrategy;
