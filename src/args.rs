// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use clap::Parser;
use edgefirst_video_memory::{
    provider::cpu::Backend, AllocatorConfig, PixelFormat, UsageStrategy, VideoInfo,
};

/// Preferred usage strategy.
#[derive(clap::ValueEnum, Clone, Debug, PartialEq, Copy)]
pub enum Strategy {
    /// Separate images and explicit copies
    Native,
    /// CPU reads surfaces the accelerator renders into
    DirectRender,
    /// CPU writes surfaces the accelerator consumes
    DirectUpload,
}

impl From<Strategy> for UsageStrategy {
    fn from(strategy: Strategy) -> Self {
        match strategy {
            Strategy::Native => UsageStrategy::NativeFormats,
            Strategy::DirectRender => UsageStrategy::DirectRender,
            Strategy::DirectUpload => UsageStrategy::DirectUpload,
        }
    }
}

/// Surface memory backend.
#[derive(clap::ValueEnum, Clone, Debug, PartialEq, Copy)]
pub enum MemoryBackend {
    /// Anonymous shared memory
    Memfd,
    /// Contiguous DMA heap
    Cma,
    /// System DMA heap
    System,
}

impl From<MemoryBackend> for Backend {
    fn from(backend: MemoryBackend) -> Self {
        match backend {
            MemoryBackend::Memfd => Backend::Memfd,
            MemoryBackend::Cma => Backend::CmaHeap,
            MemoryBackend::System => Backend::SystemHeap,
        }
    }
}

/// Command-line arguments for the video memory probe.
///
/// Every option can also be given through the environment.
///
/// # Example
///
/// ```bash
/// edgefirst-video-memory --format YUY2 --strategy direct-upload --round-trips 4
///
/// export VIDEO_SIZE="3840 2160"
/// export BACKEND=cma
/// edgefirst-video-memory --json
/// ```
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Frame resolution in pixels (width height)
    #[arg(
        long,
        env = "VIDEO_SIZE",
        default_value = "1920 1080",
        value_delimiter = ' ',
        num_args = 2
    )]
    pub size: Vec<u32>,

    /// Frame pixel format (fourcc, or ENCODED). Round trips need a format
    /// the provider supports natively, the CPU provider does not convert
    #[arg(short, long, env = "FORMAT", default_value = "NV12")]
    pub format: PixelFormat,

    /// Preferred usage strategy
    #[arg(long, env = "STRATEGY", default_value = "direct-render", value_enum)]
    pub strategy: Strategy,

    /// Surface memory backend
    #[arg(long, env = "BACKEND", default_value = "memfd", value_enum)]
    pub backend: MemoryBackend,

    /// Surface formats the provider supports natively
    #[arg(
        long,
        env = "NATIVE_FORMATS",
        default_value = "NV12 P010 YUY2 GREY RGBA BGRA",
        value_delimiter = ' '
    )]
    pub native_formats: Vec<PixelFormat>,

    /// Row pitch alignment of surfaces and images in bytes
    #[arg(long, env = "PITCH_ALIGNMENT", default_value = "64")]
    pub pitch_alignment: usize,

    /// Emulate a provider that cannot derive images from surfaces
    #[arg(long, env = "NO_DERIVE")]
    pub no_derive: bool,

    /// Capacity of the surface pool
    #[arg(long, env = "SURFACE_POOL", default_value = "16")]
    pub surface_pool: usize,

    /// Capacity of the image pool
    #[arg(long, env = "IMAGE_POOL", default_value = "16")]
    pub image_pool: usize,

    /// Write, sync and read back this many frames
    #[arg(long, env = "ROUND_TRIPS", default_value = "0")]
    pub round_trips: usize,

    /// Export this many surfaces as DMA-BUF descriptors
    #[arg(long, env = "DMA_EXPORTS", default_value = "0")]
    pub dma_exports: usize,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,

    /// Enable verbose debug logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Send logs to the systemd journal
    #[arg(long, env = "JOURNALD")]
    pub journald: bool,

    /// Enable Tracy profiler for performance analysis
    #[arg(long, env = "TRACY")]
    pub tracy: bool,
}

impl Args {
    pub fn video_info(&self) -> Result<VideoInfo, String> {
        match self.size.as_slice() {
            [width, height] => Ok(VideoInfo::new(self.format, *width, *height)),
            size => Err(format!("expected frame size as WIDTH HEIGHT, got {size:?}")),
        }
    }
}

impl From<&Args> for AllocatorConfig {
    fn from(args: &Args) -> Self {
        AllocatorConfig::default()
            .with_surface_pool_capacity(args.surface_pool)
            .with_image_pool_capacity(args.image_pool)
    }
}
