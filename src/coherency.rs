// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Coherency tracking between a surface and its CPU image.
//!
//! Only memories in copy mode ([`crate::UsageStrategy::NativeFormats`])
//! consult this state; with derived images both sides alias the same bytes.
//! Each side is either holding the latest pixels or stale, and the state
//! only changes through the named transitions below.

/// Whether one side of a memory holds the latest pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Stale,
    Current,
}

impl Freshness {
    pub fn is_current(self) -> bool {
        self == Freshness::Current
    }
}

/// Surface and image freshness of one video memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Coherency {
    surface: Freshness,
    image: Freshness,
}

impl Default for Coherency {
    /// A fresh memory: the surface is authoritative, no image yet.
    fn default() -> Self {
        Self {
            surface: Freshness::Current,
            image: Freshness::Stale,
        }
    }
}

impl Coherency {
    pub fn surface(&self) -> Freshness {
        self.surface
    }

    pub fn image(&self) -> Freshness {
        self.image
    }

    pub fn surface_is_current(&self) -> bool {
        self.surface.is_current()
    }

    pub fn image_is_current(&self) -> bool {
        self.image.is_current()
    }

    /// Surface pixels were copied into the image.
    pub(crate) fn image_pulled(&mut self) {
        self.image = Freshness::Current;
    }

    /// A write mapping of the image started.
    pub(crate) fn write_begun(&mut self) {
        self.surface = Freshness::Stale;
    }

    /// A write mapping of the image ended; the surface is stale until the
    /// next push.
    pub(crate) fn image_written(&mut self) {
        self.image = Freshness::Current;
        self.surface = Freshness::Stale;
    }

    /// Image pixels were copied onto the surface.
    pub(crate) fn surface_pushed(&mut self) {
        self.surface = Freshness::Current;
    }

    pub(crate) fn image_released(&mut self) {
        self.image = Freshness::Stale;
    }

    pub(crate) fn surface_released(&mut self) {
        self.surface = Freshness::Stale;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_push() {
        let mut c = Coherency::default();
        assert!(c.surface_is_current());
        assert!(!c.image_is_current());

        c.write_begun();
        assert_eq!(c.surface(), Freshness::Stale);
        c.image_written();
        assert!(c.image_is_current());
        assert_eq!(c.surface(), Freshness::Stale);
        c.surface_pushed();
        assert!(c.surface_is_current() && c.image_is_current());
    }

    #[test]
    fn push_during_write_does_not_survive_the_unmap() {
        let mut c = Coherency::default();
        c.write_begun();
        c.surface_pushed();
        c.image_written();
        assert_eq!(c.surface(), Freshness::Stale);
    }

    #[test]
    fn releasing_the_image_makes_it_stale() {
        let mut c = Coherency::default();
        c.image_pulled();
        c.image_released();
        assert_eq!(c.image(), Freshness::Stale);
        c.surface_released();
        assert_eq!(c.surface(), Freshness::Stale);
    }
}
