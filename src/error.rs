// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Error types for video memory allocation.

use crate::memory::MapType;
use std::{fmt, io};
use thiserror::Error;

/// Result type alias using the crate's [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Step of the DMA export path that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportStage {
    /// The standalone surface could not be created.
    CreateSurface,
    /// The accelerator refused to export the surface.
    Export,
    /// The exported descriptor could not be duplicated.
    Duplicate,
}

impl fmt::Display for ExportStage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            ExportStage::CreateSurface => "create surface",
            ExportStage::Export => "export surface",
            ExportStage::Duplicate => "duplicate handle",
        };
        f.write_str(name)
    }
}

/// Errors raised by pools, allocators and video memory.
///
/// All failures are returned synchronously to the immediate caller and are
/// never retried internally.
#[derive(Error, Debug)]
pub enum Error {
    /// The pool has no free object and has reached its capacity.
    #[error("pool exhausted: {0} objects in use")]
    ResourceExhausted(usize),

    /// Usage strategy selection could not probe the accelerator.
    #[error("usage probe failed: {0}")]
    ProbeFailed(String),

    /// A surface or image could not be obtained from any source.
    #[error("failed to acquire {0}")]
    AcquireFailed(String),

    /// Pixels could not be moved between the surface and its image.
    #[error("failed to synchronise {0}")]
    SyncFailed(String),

    /// A map request conflicts with the outstanding map type.
    #[error("incompatible map type: {requested:?} requested while {current:?} is mapped")]
    IncompatibleMap { current: MapType, requested: MapType },

    /// The operation is not supported by this memory.
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// The surface could not be turned into a shareable descriptor.
    #[error("DMA export failed at {stage}: {reason}")]
    ExportFailed { stage: ExportStage, reason: String },

    /// The surface provider rejected a request.
    #[error("surface provider: {0}")]
    Provider(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    pub(crate) fn export(stage: ExportStage, reason: impl fmt::Display) -> Self {
        Error::ExportFailed {
            stage,
            reason: reason.to_string(),
        }
    }
}
