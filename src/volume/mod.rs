//! Imported volumes and their device-side binding.
//!
//! A [`VoxelVolume`] is the host-side import record. [`VolumeBinding`]
//! uploads it once per session as two 3D textures and keeps the derived
//! [`VolumeMetadata`] that kernels read from the `volume_info` symbol.

/// Device binding session for one volume.
pub mod binding;
/// Host-side voxel grids.
pub mod import;
/// Spatial and rendering metadata and its device layout.
pub mod metadata;

pub use binding::{
    VolumeBinding, GRADIENT_MAGNITUDE_TEXTURE, INTENSITY_TEXTURE, VOLUME_SYMBOL,
};
pub use import::{Aabb, VoxelVolume};
pub use metadata::{safe_inverse, safe_inverse3, VolumeMetadata, VolumeUniform};
