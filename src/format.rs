// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Pixel formats and plane layout descriptors.

use core::fmt;
use std::str::FromStr;

/// Maximum number of planes tracked by a [`VideoInfo`].
pub const MAX_PLANES: usize = 4;

/// Pixel formats understood by the allocator.
///
/// `Encoded` is the opaque sentinel used by decoders whose output format is
/// only known to the accelerator; it skips usage probing entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// Opaque accelerator-native content
    Encoded,
    /// YUV 4:2:0 semi-planar, interleaved UV
    Nv12,
    /// YUV 4:2:0 planar, U before V
    I420,
    /// YUV 4:2:0 planar, V before U
    Yv12,
    /// YUV 4:2:0 semi-planar, 16 bits per sample (10 significant)
    P010,
    /// YUV 4:2:2 packed, Y0 U Y1 V
    Yuy2,
    /// YUV 4:2:2 packed, U Y0 V Y1
    Uyvy,
    /// Luma only
    Gray8,
    /// RGBA 32-bit
    Rgba,
    /// BGRA 32-bit
    Bgra,
    /// RGBX 32-bit, unused alpha
    Rgbx,
    /// BGRX 32-bit, unused alpha
    Bgrx,
}

/// Chroma sampling class of a surface.
///
/// Accelerators that cannot allocate a surface in an exact pixel format can
/// usually allocate one of the same chroma class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChromaType {
    Yuv420,
    Yuv420_10,
    Yuv422,
    Yuv400,
    Rgb32,
}

impl PixelFormat {
    /// All formats with a concrete memory layout.
    pub const RAW: [PixelFormat; 11] = [
        PixelFormat::Nv12,
        PixelFormat::I420,
        PixelFormat::Yv12,
        PixelFormat::P010,
        PixelFormat::Yuy2,
        PixelFormat::Uyvy,
        PixelFormat::Gray8,
        PixelFormat::Rgba,
        PixelFormat::Bgra,
        PixelFormat::Rgbx,
        PixelFormat::Bgrx,
    ];

    pub const fn fourcc(self) -> Option<[u8; 4]> {
        match self {
            PixelFormat::Encoded => None,
            PixelFormat::Nv12 => Some(*b"NV12"),
            PixelFormat::I420 => Some(*b"I420"),
            PixelFormat::Yv12 => Some(*b"YV12"),
            PixelFormat::P010 => Some(*b"P010"),
            PixelFormat::Yuy2 => Some(*b"YUY2"),
            PixelFormat::Uyvy => Some(*b"UYVY"),
            PixelFormat::Gray8 => Some(*b"GREY"),
            PixelFormat::Rgba => Some(*b"RGBA"),
            PixelFormat::Bgra => Some(*b"BGRA"),
            PixelFormat::Rgbx => Some(*b"RGBX"),
            PixelFormat::Bgrx => Some(*b"BGRX"),
        }
    }

    pub fn from_fourcc(fourcc: &[u8; 4]) -> Option<Self> {
        // YUYV is the V4L2 spelling of YUY2
        if fourcc == b"YUYV" {
            return Some(PixelFormat::Yuy2);
        }
        Self::RAW
            .into_iter()
            .find(|format| format.fourcc().as_ref() == Some(fourcc))
    }

    pub const fn chroma_type(self) -> Option<ChromaType> {
        match self {
            PixelFormat::Encoded => None,
            PixelFormat::Nv12 | PixelFormat::I420 | PixelFormat::Yv12 => Some(ChromaType::Yuv420),
            PixelFormat::P010 => Some(ChromaType::Yuv420_10),
            PixelFormat::Yuy2 | PixelFormat::Uyvy => Some(ChromaType::Yuv422),
            PixelFormat::Gray8 => Some(ChromaType::Yuv400),
            PixelFormat::Rgba | PixelFormat::Bgra | PixelFormat::Rgbx | PixelFormat::Bgrx => {
                Some(ChromaType::Rgb32)
            }
        }
    }

    pub const fn num_planes(self) -> usize {
        match self {
            PixelFormat::Encoded => 0,
            PixelFormat::Nv12 | PixelFormat::P010 => 2,
            PixelFormat::I420 | PixelFormat::Yv12 => 3,
            _ => 1,
        }
    }

    /// Number of meaningful bytes in one row of `plane`.
    pub const fn plane_row_bytes(self, plane: usize, width: u32) -> usize {
        let width = width as usize;
        let half = width.div_ceil(2);
        match (self, plane) {
            (PixelFormat::Nv12, 0) | (PixelFormat::Gray8, 0) => width,
            (PixelFormat::Nv12, 1) => 2 * half,
            (PixelFormat::I420, 0) | (PixelFormat::Yv12, 0) => width,
            (PixelFormat::I420, 1..=2) | (PixelFormat::Yv12, 1..=2) => half,
            (PixelFormat::P010, 0) => 2 * width,
            (PixelFormat::P010, 1) => 4 * half,
            (PixelFormat::Yuy2, 0) | (PixelFormat::Uyvy, 0) => 4 * half,
            (PixelFormat::Rgba, 0)
            | (PixelFormat::Bgra, 0)
            | (PixelFormat::Rgbx, 0)
            | (PixelFormat::Bgrx, 0) => 4 * width,
            _ => 0,
        }
    }

    /// Number of rows in `plane`.
    pub const fn plane_height(self, plane: usize, height: u32) -> usize {
        let height = height as usize;
        match (self.chroma_type(), plane) {
            (None, _) => 0,
            (Some(ChromaType::Yuv420), 1..) | (Some(ChromaType::Yuv420_10), 1..) => {
                height.div_ceil(2)
            }
            _ if plane < self.num_planes() => height,
            _ => 0,
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.fourcc() {
            Some(fourcc) => f.write_str(&String::from_utf8_lossy(&fourcc)),
            None => f.write_str("ENCODED"),
        }
    }
}

impl FromStr for PixelFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.to_ascii_uppercase();
        if upper == "ENCODED" {
            return Ok(PixelFormat::Encoded);
        }
        let bytes: [u8; 4] = upper
            .as_bytes()
            .try_into()
            .map_err(|_| format!("invalid fourcc: {s}"))?;
        PixelFormat::from_fourcc(&bytes).ok_or_else(|| format!("unsupported pixel format: {s}"))
    }
}

/// Real plane layout of a mapped image, as reported by the accelerator.
///
/// Offsets are relative to the start of the image data and pitches may
/// include row padding that a naive computation would not predict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageLayout {
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    pub num_planes: usize,
    pub offsets: [usize; MAX_PLANES],
    pub pitches: [usize; MAX_PLANES],
    pub data_size: usize,
}

const fn align_up(value: usize, alignment: usize) -> usize {
    if alignment <= 1 {
        value
    } else {
        value.div_ceil(alignment) * alignment
    }
}

impl ImageLayout {
    /// Contiguous layout with every pitch rounded up to `pitch_alignment`.
    pub fn packed(format: PixelFormat, width: u32, height: u32, pitch_alignment: usize) -> Self {
        let num_planes = format.num_planes();
        let mut offsets = [0; MAX_PLANES];
        let mut pitches = [0; MAX_PLANES];
        let mut offset = 0;
        for plane in 0..num_planes {
            let pitch = align_up(format.plane_row_bytes(plane, width), pitch_alignment);
            offsets[plane] = offset;
            pitches[plane] = pitch;
            offset += pitch * format.plane_height(plane, height);
        }
        Self {
            format,
            width,
            height,
            num_planes,
            offsets,
            pitches,
            data_size: offset,
        }
    }
}

/// Format descriptor: pixel format, dimensions and plane layout.
///
/// Each allocator keeps one of these for its surfaces and one for its CPU
/// visible images. Both are fixed once the allocator is constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoInfo {
    format: PixelFormat,
    width: u32,
    height: u32,
    n_planes: usize,
    offsets: [usize; MAX_PLANES],
    strides: [usize; MAX_PLANES],
    size: usize,
}

impl VideoInfo {
    /// Descriptor with the default layout for `format`: rows padded to four
    /// bytes and planes packed back to back.
    pub fn new(format: PixelFormat, width: u32, height: u32) -> Self {
        let layout = ImageLayout::packed(format, width, height, 4);
        Self {
            format,
            width,
            height,
            n_planes: layout.num_planes,
            offsets: layout.offsets,
            strides: layout.pitches,
            size: layout.data_size,
        }
    }

    /// Same dimensions in another format, default layout.
    pub fn with_format(&self, format: PixelFormat) -> Self {
        Self::new(format, self.width, self.height)
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn n_planes(&self) -> usize {
        self.n_planes
    }

    pub fn offset(&self, plane: usize) -> usize {
        self.offsets.get(plane).copied().unwrap_or(0)
    }

    pub fn stride(&self, plane: usize) -> usize {
        self.strides.get(plane).copied().unwrap_or(0)
    }

    /// Total size in bytes of one frame.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_encoded(&self) -> bool {
        self.format == PixelFormat::Encoded
    }

    /// The layout this descriptor describes, for providers asked to honour
    /// fixed strides or offsets.
    pub fn layout(&self) -> ImageLayout {
        ImageLayout {
            format: self.format,
            width: self.width,
            height: self.height,
            num_planes: self.n_planes,
            offsets: self.offsets,
            pitches: self.strides,
            data_size: self.size,
        }
    }

    /// Replace `Encoded` by NV12, the default decodable format.
    pub fn force_nv12_if_encoded(&mut self) {
        if self.is_encoded() {
            *self = self.with_format(PixelFormat::Nv12);
        }
    }

    /// Re-measure this descriptor from the layout of a mapped image.
    ///
    /// Format and dimensions are reset from the image first. Returns `false`
    /// when the image has a different plane count or disjoint planes, in
    /// which case the offsets and strides are left at their defaults.
    pub fn update_from_layout(&mut self, layout: &ImageLayout) -> bool {
        *self = VideoInfo::new(layout.format, layout.width, layout.height);

        if layout.num_planes != self.n_planes {
            return false;
        }

        if layout.offsets[..layout.num_planes]
            .iter()
            .any(|&offset| offset > layout.data_size)
        {
            return false;
        }

        for plane in 0..layout.num_planes {
            self.offsets[plane] = layout.offsets[plane];
            self.strides[plane] = layout.pitches[plane];
        }
        self.size = layout.data_size;
        true
    }
}

impl fmt::Display for VideoInfo {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}x{} {} size:{}",
            self.width, self.height, self.format, self.size
        )?;
        for plane in 0..self.n_planes {
            write!(
                f,
                " [{}: offset:{} stride:{}]",
                plane, self.offsets[plane], self.strides[plane]
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_sizes() {
        assert_eq!(VideoInfo::new(PixelFormat::Nv12, 1920, 1080).size(), 3110400);
        assert_eq!(VideoInfo::new(PixelFormat::Yuy2, 1920, 1080).size(), 4147200);
        assert_eq!(VideoInfo::new(PixelFormat::Rgba, 1920, 1080).size(), 8294400);
        assert_eq!(VideoInfo::new(PixelFormat::Encoded, 1920, 1080).size(), 0);
    }

    #[test]
    fn i420_planes() {
        let info = VideoInfo::new(PixelFormat::I420, 640, 480);
        assert_eq!(info.n_planes(), 3);
        assert_eq!(info.stride(1), 320);
        assert_eq!(info.offset(1), 640 * 480);
        assert_eq!(info.offset(2), 640 * 480 + 320 * 240);
        assert_eq!(info.size(), 640 * 480 * 3 / 2);
    }

    #[test]
    fn update_from_padded_layout() {
        let layout = ImageLayout::packed(PixelFormat::Nv12, 1000, 100, 256);
        let mut info = VideoInfo::new(PixelFormat::I420, 1000, 100);
        assert!(info.update_from_layout(&layout));
        assert_eq!(info.format(), PixelFormat::Nv12);
        assert_eq!(info.stride(0), 1024);
        assert_eq!(info.offset(1), 1024 * 100);
        assert_eq!(info.size(), layout.data_size);
    }

    #[test]
    fn update_rejects_disjoint_planes() {
        let mut layout = ImageLayout::packed(PixelFormat::Nv12, 64, 64, 1);
        layout.offsets[1] = layout.data_size + 1;
        let mut info = VideoInfo::new(PixelFormat::Nv12, 64, 64);
        assert!(!info.update_from_layout(&layout));
        assert_eq!(info, VideoInfo::new(PixelFormat::Nv12, 64, 64));
    }

    #[test]
    fn fourcc_round_trip() {
        assert_eq!("nv12".parse::<PixelFormat>(), Ok(PixelFormat::Nv12));
        assert_eq!("YUYV".parse::<PixelFormat>(), Ok(PixelFormat::Yuy2));
        assert_eq!(PixelFormat::Gray8.to_string(), "GREY");
        assert!("XXXX".parse::<PixelFormat>().is_err());
    }
}
