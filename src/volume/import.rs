use glam::Vec3;

use crate::error::VoxrayError;
use crate::options::IntensityRange;

/// Axis-aligned bounding box in physical units.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Aabb {
    /// Minimum corner.
    pub min: Vec3,
    /// Maximum corner.
    pub max: Vec3,
}

impl Aabb {
    /// Box spanning `min..max`.
    #[must_use]
    pub const fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Edge lengths.
    #[must_use]
    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }
}

/// An imported scalar volume and its derived gradient-magnitude field.
///
/// Voxels are stored x fastest, then y, then z.
#[derive(Debug, Clone, PartialEq)]
pub struct VoxelVolume {
    dimensions: [usize; 3],
    bounds: Aabb,
    spacing: Vec3,
    intensity_range: IntensityRange,
    intensity: Vec<i16>,
    gradient_magnitude: Vec<i16>,
}

impl VoxelVolume {
    /// Assemble an import record. The intensity range is taken from the
    /// data.
    ///
    /// # Errors
    ///
    /// Returns [`VoxrayError::InvalidVolume`] if either field does not hold
    /// exactly one value per voxel.
    pub fn new(
        dimensions: [usize; 3],
        bounds: Aabb,
        spacing: Vec3,
        intensity: Vec<i16>,
        gradient_magnitude: Vec<i16>,
    ) -> Result<Self, VoxrayError> {
        let voxels = voxel_count(dimensions)?;
        for (name, len) in [
            ("intensity", intensity.len()),
            ("gradient magnitude", gradient_magnitude.len()),
        ] {
            if len != voxels {
                return Err(VoxrayError::InvalidVolume(format!(
                    "{name} field has {len} values for {voxels} voxels"
                )));
            }
        }
        Ok(Self {
            dimensions,
            bounds,
            spacing,
            intensity_range: scalar_range(&intensity),
            intensity,
            gradient_magnitude,
        })
    }

    /// Build an import record from a bare intensity field sampled on a
    /// regular grid starting at `origin`.
    ///
    /// Bounds run from `origin` to the centre of the last voxel. The
    /// gradient magnitude is estimated with central differences, clamped at
    /// the borders.
    ///
    /// # Errors
    ///
    /// See [`VoxelVolume::new`].
    #[allow(clippy::cast_precision_loss)]
    pub fn from_intensity(
        dimensions: [usize; 3],
        origin: Vec3,
        spacing: Vec3,
        intensity: Vec<i16>,
    ) -> Result<Self, VoxrayError> {
        let voxels = voxel_count(dimensions)?;
        if intensity.len() != voxels {
            return Err(VoxrayError::InvalidVolume(format!(
                "intensity field has {} values for {voxels} voxels",
                intensity.len()
            )));
        }
        let last = Vec3::new(
            dimensions[0].saturating_sub(1) as f32,
            dimensions[1].saturating_sub(1) as f32,
            dimensions[2].saturating_sub(1) as f32,
        );
        let bounds = Aabb::new(origin, origin + last * spacing);
        let gradient_magnitude = gradient_magnitude(dimensions, spacing, &intensity);
        Self::new(dimensions, bounds, spacing, intensity, gradient_magnitude)
    }

    /// Voxel counts per axis.
    #[must_use]
    pub const fn dimensions(&self) -> [usize; 3] {
        self.dimensions
    }

    /// Physical bounds.
    #[must_use]
    pub const fn bounds(&self) -> Aabb {
        self.bounds
    }

    /// Physical size of one voxel.
    #[must_use]
    pub const fn spacing(&self) -> Vec3 {
        self.spacing
    }

    /// Lowest and highest intensity.
    #[must_use]
    pub const fn intensity_range(&self) -> IntensityRange {
        self.intensity_range
    }

    /// Intensity field.
    #[must_use]
    pub fn intensity(&self) -> &[i16] {
        &self.intensity
    }

    /// Gradient-magnitude field.
    #[must_use]
    pub fn gradient_magnitude(&self) -> &[i16] {
        &self.gradient_magnitude
    }
}

fn voxel_count(dimensions: [usize; 3]) -> Result<usize, VoxrayError> {
    dimensions
        .iter()
        .try_fold(1usize, |acc, &n| acc.checked_mul(n))
        .ok_or_else(|| VoxrayError::InvalidVolume(String::from("voxel count overflows")))
}

fn scalar_range(values: &[i16]) -> IntensityRange {
    let (min, max) = values
        .iter()
        .fold(None, |range: Option<(i16, i16)>, &v| match range {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
        .unwrap_or((0, 0));
    IntensityRange {
        min: f32::from(min),
        max: f32::from(max),
    }
}

/// Central-difference gradient magnitude, one voxel step per axis, with
/// indices clamped at the borders.
#[allow(clippy::cast_possible_truncation)]
fn gradient_magnitude(dimensions: [usize; 3], spacing: Vec3, values: &[i16]) -> Vec<i16> {
    let [nx, ny, nz] = dimensions;
    let at = |x: usize, y: usize, z: usize| f32::from(values[x + nx * (y + ny * z)]);
    let half_inv = |s: f32| if s == 0.0 { 0.0 } else { 0.5 / s };
    let scale = Vec3::new(half_inv(spacing.x), half_inv(spacing.y), half_inv(spacing.z));

    let mut out = Vec::with_capacity(values.len());
    for z in 0..nz {
        for y in 0..ny {
            for x in 0..nx {
                let d = Vec3::new(
                    at((x + 1).min(nx - 1), y, z) - at(x.saturating_sub(1), y, z),
                    at(x, (y + 1).min(ny - 1), z) - at(x, y.saturating_sub(1), z),
                    at(x, y, (z + 1).min(nz - 1)) - at(x, y, z.saturating_sub(1)),
                ) * scale;
                out.push(d.length().round().min(f32::from(i16::MAX)) as i16);
            }
        }
    }
    out
}
