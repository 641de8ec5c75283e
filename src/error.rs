//! Crate-level error types.

use std::fmt;

use crate::gpu::device::DeviceError;
use crate::gpu::render_context::RenderContextError;
use crate::gpu::resource_table::TableError;

/// Errors produced by the voxray crate.
#[derive(Debug)]
pub enum VoxrayError {
    /// A device primitive failed.
    Device(DeviceError),
    /// A resource table operation failed.
    Table(TableError),
    /// GPU context initialization failure.
    Gpu(RenderContextError),
    /// Generic I/O failure.
    Io(std::io::Error),
    /// TOML options parsing/serialization failure.
    OptionsParse(String),
    /// An imported volume is internally inconsistent.
    InvalidVolume(String),
}

impl fmt::Display for VoxrayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Device(e) => write!(f, "device error: {e}"),
            Self::Table(e) => write!(f, "{e}"),
            Self::Gpu(e) => write!(f, "GPU error: {e}"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::OptionsParse(msg) => {
                write!(f, "options parse error: {msg}")
            }
            Self::InvalidVolume(msg) => write!(f, "invalid volume: {msg}"),
        }
    }
}

impl std::error::Error for VoxrayError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Device(e) => Some(e),
            Self::Table(e) => Some(e),
            Self::Gpu(e) => Some(e),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<DeviceError> for VoxrayError {
    fn from(e: DeviceError) -> Self {
        Self::Device(e)
    }
}

impl From<TableError> for VoxrayError {
    fn from(e: TableError) -> Self {
        Self::Table(e)
    }
}

impl From<RenderContextError> for VoxrayError {
    fn from(e: RenderContextError) -> Self {
        Self::Gpu(e)
    }
}

impl From<std::io::Error> for VoxrayError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}
