// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Usage strategy selection.
//!
//! Decides once per allocator whether CPU access can go straight to the
//! surface memory or needs a separate image and explicit copies.

use crate::{
    error::{Error, Result},
    format::VideoInfo,
    provider::{ImageObject, SurfaceProvider},
};
use std::fmt;
use tracing::{debug, info, warn};

/// How CPU-visible pixels relate to the accelerator surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UsageStrategy {
    /// Surfaces use their best native format; CPU access goes through a
    /// separate image and explicit copies.
    NativeFormats,
    /// Images derived from the surface alias its memory; the accelerator
    /// renders into memory the CPU reads directly.
    DirectRender,
    /// Images derived from the surface alias its memory; the CPU writes
    /// pixels the accelerator consumes directly.
    DirectUpload,
}

impl UsageStrategy {
    /// True for the strategies where images alias surface memory.
    pub fn is_direct(self) -> bool {
        !matches!(self, UsageStrategy::NativeFormats)
    }
}

impl fmt::Display for UsageStrategy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            UsageStrategy::NativeFormats => "native-formats",
            UsageStrategy::DirectRender => "direct-render",
            UsageStrategy::DirectUpload => "direct-upload",
        };
        f.write_str(name)
    }
}

/// Create a scratch surface in the format of `info`, falling back to any
/// native format of the same chroma class.
fn scratch_surface<P: SurfaceProvider>(provider: &P, info: &VideoInfo) -> Result<P::Surface> {
    let (width, height) = (info.width(), info.height());
    match provider.create_surface_with_format(info.format(), width, height) {
        Ok(surface) => Ok(surface),
        Err(err) => {
            debug!("no {} surface ({err}), trying chroma class", info.format());
            let chroma = info.format().chroma_type().ok_or_else(|| {
                Error::ProbeFailed(format!("{} has no chroma class", info.format()))
            })?;
            provider
                .create_surface(chroma, width, height)
                .map_err(|err| Error::ProbeFailed(format!("scratch surface: {err}")))
        }
    }
}

/// Derive and map an image from `surface` and measure its real layout
/// into `info`. Returns whether the image layout could be recorded.
pub(crate) fn measure_surface<P: SurfaceProvider>(
    provider: &P,
    surface: &P::Surface,
    info: &mut VideoInfo,
) -> Result<bool> {
    let mut image = provider
        .derive_image(surface)
        .map_err(|err| Error::ProbeFailed(format!("derive image: {err}")))?;
    provider
        .map_image(&mut image)
        .map_err(|err| Error::ProbeFailed(format!("map derived image: {err}")))?;
    let measured = info.update_from_layout(image.layout());
    if let Err(err) = provider.unmap_image(&mut image) {
        warn!("failed to unmap probe image: {err}");
    }
    Ok(measured)
}

/// Resolve the strategy for `info` and the surface descriptor to allocate
/// with.
///
/// `NativeFormats` and encoded content skip probing. Otherwise a scratch
/// surface is created and an image derived from it; the direct strategy is
/// granted only when the derived image has the requested format, else the
/// request degrades to `NativeFormats`.
pub fn select_strategy<P: SurfaceProvider>(
    provider: &P,
    info: &VideoInfo,
    requested: UsageStrategy,
) -> Result<(UsageStrategy, VideoInfo)> {
    let native = provider
        .best_native_format(info.format())
        .unwrap_or(info.format());
    let mut surface_info = info.with_format(native);

    if requested == UsageStrategy::NativeFormats || info.is_encoded() {
        debug!("usage {requested} for {info}: probing skipped");
        return Ok((UsageStrategy::NativeFormats, surface_info));
    }

    let surface = scratch_surface(provider, info)?;
    let measured = measure_surface(provider, &surface, &mut surface_info)?;
    drop(surface);

    let matches = measured && surface_info.format() == info.format();
    let strategy = if matches {
        requested
    } else {
        info!(
            target: "performance",
            "{requested} unavailable for {}: derived {}, falling back to copies",
            info.format(),
            surface_info.format()
        );
        UsageStrategy::NativeFormats
    };

    debug!("usage {strategy} surface info {surface_info}");
    Ok((strategy, surface_info))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{format::PixelFormat, provider::cpu::CpuProvider};

    #[test]
    fn native_request_skips_probe() {
        let provider = CpuProvider::default();
        let info = VideoInfo::new(PixelFormat::I420, 320, 240);
        let (strategy, surface_info) =
            select_strategy(&provider, &info, UsageStrategy::NativeFormats).unwrap();
        assert_eq!(strategy, UsageStrategy::NativeFormats);
        assert_eq!(surface_info.format(), PixelFormat::Nv12);
        assert_eq!(provider.stats().surfaces, 0);
    }

    #[test]
    fn encoded_forces_native() {
        let provider = CpuProvider::default();
        let info = VideoInfo::new(PixelFormat::Encoded, 320, 240);
        let (strategy, surface_info) =
            select_strategy(&provider, &info, UsageStrategy::DirectRender).unwrap();
        assert_eq!(strategy, UsageStrategy::NativeFormats);
        assert_eq!(surface_info.format(), PixelFormat::Nv12);
    }

    #[test]
    fn direct_upload_granted_on_match() {
        let provider = CpuProvider::builder().pitch_alignment(128).build();
        let info = VideoInfo::new(PixelFormat::Yuy2, 100, 20);
        let (strategy, surface_info) =
            select_strategy(&provider, &info, UsageStrategy::DirectUpload).unwrap();
        assert_eq!(strategy, UsageStrategy::DirectUpload);
        assert_eq!(surface_info.stride(0), 256);
    }

    #[test]
    fn probe_without_derive_fails() {
        let provider = CpuProvider::builder().derive_images(false).build();
        let info = VideoInfo::new(PixelFormat::Nv12, 64, 64);
        assert!(matches!(
            select_strategy(&provider, &info, UsageStrategy::DirectRender),
            Err(Error::ProbeFailed(_))
        ));
    }
}
