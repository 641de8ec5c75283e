use glam::Vec3;

use crate::options::{ShadingType, VolumeProperty};
use crate::volume::import::VoxelVolume;

/// `1 / value`, or zero for a zero value.
#[must_use]
pub fn safe_inverse(value: f32) -> f32 {
    if value == 0.0 {
        0.0
    } else {
        1.0 / value
    }
}

/// Component-wise [`safe_inverse`].
#[must_use]
pub fn safe_inverse3(value: Vec3) -> Vec3 {
    Vec3::new(
        safe_inverse(value.x),
        safe_inverse(value.y),
        safe_inverse(value.z),
    )
}

/// Spatial and rendering description of a bound volume.
///
/// The spatial half is derived from the imported volume; the rendering
/// half from the property source. Each half is recomputed as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VolumeMetadata {
    /// Physical size of the bounds.
    pub extent: Vec3,
    /// Per-axis inverse of `extent`, zero where `extent` is zero.
    pub inv_extent: Vec3,
    /// Physical size of one voxel.
    pub spacing: Vec3,
    /// Per-axis inverse of `spacing`, zero where `spacing` is zero.
    pub inv_spacing: Vec3,
    /// Lowest intensity.
    pub intensity_min: f32,
    /// Highest intensity.
    pub intensity_max: f32,
    /// `intensity_max - intensity_min`.
    pub intensity_range: f32,
    /// Inverse of `intensity_range`, zero for a flat volume.
    pub intensity_inv_range: f32,
    /// Minimum corner of the bounds.
    pub min_aabb: Vec3,
    /// Per-axis inverse of `min_aabb`, zero where it is zero.
    pub inv_min_aabb: Vec3,
    /// Maximum corner of the bounds.
    pub max_aabb: Vec3,
    /// Per-axis inverse of `max_aabb`, zero where it is zero.
    pub inv_max_aabb: Vec3,
    /// Finite-difference offset.
    pub gradient_delta: f32,
    /// Inverse of `gradient_delta`.
    pub inv_gradient_delta: f32,
    /// `gradient_delta` along x.
    pub gradient_delta_x: Vec3,
    /// `gradient_delta` along y.
    pub gradient_delta_y: Vec3,
    /// `gradient_delta` along z.
    pub gradient_delta_z: Vec3,
    /// Extinction scale.
    pub density_scale: f32,
    /// Primary ray step.
    pub step_size: f32,
    /// Shadow ray step.
    pub step_size_shadow: f32,
    /// Gradient magnitude weight for hybrid shading.
    pub gradient_factor: f32,
    /// Shading model.
    pub shading_type: ShadingType,
}

impl VolumeMetadata {
    /// Spatial metadata of an imported volume, with a unit gradient delta.
    #[must_use]
    pub fn from_volume(volume: &VoxelVolume) -> Self {
        let bounds = volume.bounds();
        let range = volume.intensity_range();
        let extent = bounds.size();
        let mut metadata = Self {
            extent,
            inv_extent: safe_inverse3(extent),
            spacing: volume.spacing(),
            inv_spacing: safe_inverse3(volume.spacing()),
            intensity_min: range.min,
            intensity_max: range.max,
            intensity_range: range.span(),
            intensity_inv_range: safe_inverse(range.span()),
            min_aabb: bounds.min,
            inv_min_aabb: safe_inverse3(bounds.min),
            max_aabb: bounds.max,
            inv_max_aabb: safe_inverse3(bounds.max),
            ..Self::default()
        };
        metadata.set_gradient_delta(1.0);
        metadata
    }

    /// Refresh the rendering half from `property`, or from the documented
    /// defaults when there is no property source.
    ///
    /// Step sizes are `factor * max_aabb.x / extent.x`; a zero extent gives
    /// a zero step.
    pub fn apply_properties(&mut self, property: Option<&VolumeProperty>) {
        let defaults = VolumeProperty::default();
        let property = property.unwrap_or(&defaults);

        self.density_scale = property.density_scale;
        let ratio = if self.extent.x == 0.0 {
            0.0
        } else {
            self.max_aabb.x / self.extent.x
        };
        self.step_size = property.step_size_factor_primary * ratio;
        self.step_size_shadow = self.step_size * property.step_size_factor_secondary;
        self.set_gradient_delta(property.gradient_delta_factor * self.spacing.x);
        self.gradient_factor = property.gradient_factor;
        self.shading_type = property.shading_type;
    }

    fn set_gradient_delta(&mut self, delta: f32) {
        self.gradient_delta = delta;
        self.inv_gradient_delta = safe_inverse(delta);
        self.gradient_delta_x = Vec3::X * delta;
        self.gradient_delta_y = Vec3::Y * delta;
        self.gradient_delta_z = Vec3::Z * delta;
    }

    /// Device layout of the metadata.
    #[must_use]
    pub fn to_uniform(&self) -> VolumeUniform {
        VolumeUniform {
            extent: self.extent.to_array(),
            intensity_min: self.intensity_min,
            inv_extent: self.inv_extent.to_array(),
            intensity_max: self.intensity_max,
            spacing: self.spacing.to_array(),
            intensity_range: self.intensity_range,
            inv_spacing: self.inv_spacing.to_array(),
            intensity_inv_range: self.intensity_inv_range,
            min_aabb: self.min_aabb.to_array(),
            gradient_delta: self.gradient_delta,
            inv_min_aabb: self.inv_min_aabb.to_array(),
            inv_gradient_delta: self.inv_gradient_delta,
            max_aabb: self.max_aabb.to_array(),
            density_scale: self.density_scale,
            inv_max_aabb: self.inv_max_aabb.to_array(),
            step_size: self.step_size,
            gradient_delta_x: self.gradient_delta_x.to_array(),
            step_size_shadow: self.step_size_shadow,
            gradient_delta_y: self.gradient_delta_y.to_array(),
            gradient_factor: self.gradient_factor,
            gradient_delta_z: self.gradient_delta_z.to_array(),
            shading_type: self.shading_type.as_u32(),
        }
    }
}

/// Volume metadata as kernels read it from the `volume_info` symbol.
///
/// WGSL layout (every vec3 shares its 16-byte slot with a scalar):
///   extent: vec3<f32>             (offset 0,   align 16)
///   intensity_min: f32            (offset 12)
///   inv_extent: vec3<f32>         (offset 16)
///   intensity_max: f32            (offset 28)
///   spacing: vec3<f32>            (offset 32)
///   intensity_range: f32          (offset 44)
///   inv_spacing: vec3<f32>        (offset 48)
///   intensity_inv_range: f32      (offset 60)
///   min_aabb: vec3<f32>           (offset 64)
///   gradient_delta: f32           (offset 76)
///   inv_min_aabb: vec3<f32>       (offset 80)
///   inv_gradient_delta: f32       (offset 92)
///   max_aabb: vec3<f32>           (offset 96)
///   density_scale: f32            (offset 108)
///   inv_max_aabb: vec3<f32>       (offset 112)
///   step_size: f32                (offset 124)
///   gradient_delta_x: vec3<f32>   (offset 128)
///   step_size_shadow: f32         (offset 140)
///   gradient_delta_y: vec3<f32>   (offset 144)
///   gradient_factor: f32          (offset 156)
///   gradient_delta_z: vec3<f32>   (offset 160)
///   shading_type: u32             (offset 172)
///   Total: 176 bytes
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
#[allow(missing_docs)]
pub struct VolumeUniform {
    pub extent: [f32; 3],
    pub intensity_min: f32,
    pub inv_extent: [f32; 3],
    pub intensity_max: f32,
    pub spacing: [f32; 3],
    pub intensity_range: f32,
    pub inv_spacing: [f32; 3],
    pub intensity_inv_range: f32,
    pub min_aabb: [f32; 3],
    pub gradient_delta: f32,
    pub inv_min_aabb: [f32; 3],
    pub inv_gradient_delta: f32,
    pub max_aabb: [f32; 3],
    pub density_scale: f32,
    pub inv_max_aabb: [f32; 3],
    pub step_size: f32,
    pub gradient_delta_x: [f32; 3],
    pub step_size_shadow: f32,
    pub gradient_delta_y: [f32; 3],
    pub gradient_factor: f32,
    pub gradient_delta_z: [f32; 3],
    pub shading_type: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::import::Aabb;

    fn volume(bounds: Aabb) -> VoxelVolume {
        VoxelVolume::new([2, 2, 2], bounds, Vec3::ONE, vec![0, 1, 2, 3, 4, 5, 6, 7], vec![0; 8])
            .unwrap()
    }

    #[test]
    fn zero_components_invert_to_zero() {
        assert_eq!(safe_inverse(0.0), 0.0);
        assert_eq!(safe_inverse(4.0), 0.25);
        assert_eq!(
            safe_inverse3(Vec3::new(0.0, 2.0, -0.5)),
            Vec3::new(0.0, 0.5, -2.0)
        );
    }

    #[test]
    fn spatial_fields_follow_the_bounds() {
        let metadata = VolumeMetadata::from_volume(&volume(Aabb::new(
            Vec3::new(-2.0, 0.0, 1.0),
            Vec3::new(2.0, 8.0, 1.0),
        )));
        assert_eq!(metadata.extent, Vec3::new(4.0, 8.0, 0.0));
        assert_eq!(metadata.inv_extent, Vec3::new(0.25, 0.125, 0.0));
        assert_eq!(metadata.inv_min_aabb, Vec3::new(-0.5, 0.0, 1.0));
        assert_eq!(metadata.intensity_range, 7.0);
        assert_eq!(metadata.gradient_delta_y, Vec3::Y);
        assert_eq!(metadata.inv_gradient_delta, 1.0);
    }

    #[test]
    fn properties_drive_steps_and_gradient_delta() {
        let mut metadata = VolumeMetadata::from_volume(&volume(Aabb::new(
            Vec3::ZERO,
            Vec3::new(10.0, 5.0, 5.0),
        )));
        let property = VolumeProperty {
            density_scale: 2.0,
            step_size_factor_primary: 0.5,
            step_size_factor_secondary: 4.0,
            gradient_delta_factor: 2.0,
            gradient_factor: 0.25,
            shading_type: ShadingType::Brdf,
        };
        metadata.apply_properties(Some(&property));
        assert_eq!(metadata.step_size, 0.5);
        assert_eq!(metadata.step_size_shadow, 2.0);
        assert_eq!(metadata.gradient_delta, 2.0);
        assert_eq!(metadata.inv_gradient_delta, 0.5);
        assert_eq!(metadata.gradient_delta_z, Vec3::new(0.0, 0.0, 2.0));
        assert_eq!(metadata.shading_type, ShadingType::Brdf);
    }

    #[test]
    fn zero_extent_gives_zero_step() {
        let mut metadata = VolumeMetadata::from_volume(&volume(Aabb::default()));
        metadata.apply_properties(None);
        assert_eq!(metadata.step_size, 0.0);
        assert_eq!(metadata.density_scale, 100.0);
    }

    #[test]
    fn uniform_matches_the_documented_layout() {
        assert_eq!(size_of::<VolumeUniform>(), 176);
        let mut metadata = VolumeMetadata::from_volume(&volume(Aabb::new(
            Vec3::ZERO,
            Vec3::splat(4.0),
        )));
        metadata.apply_properties(None);
        let uniform = metadata.to_uniform();
        assert_eq!(uniform.extent, [4.0; 3]);
        assert_eq!(uniform.shading_type, 2);
        let words: &[f32] = bytemuck::cast_slice(std::slice::from_ref(&uniform));
        assert_eq!(words[31], metadata.step_size);
    }
}
