use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Shading model selected for the ray marcher.
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    Default,
    JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum ShadingType {
    /// Surface reflectance only.
    Brdf,
    /// Participating-medium phase function only.
    Phase,
    /// Blend between the two driven by gradient magnitude.
    #[default]
    Hybrid,
}

impl ShadingType {
    /// Selector value kernels switch on.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        match self {
            Self::Brdf => 0,
            Self::Phase => 1,
            Self::Hybrid => 2,
        }
    }
}

/// Rendering properties of a volume, read once per update.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
#[schemars(title = "Volume", inline)]
#[serde(default)]
pub struct VolumeProperty {
    /// Extinction scale applied to opacity.
    #[schemars(title = "Density Scale", range(min = 0.001, max = 1000.0), extend("step" = 1.0))]
    pub density_scale: f32,
    /// Primary ray step, in voxels.
    #[schemars(title = "Primary Step", range(min = 0.1, max = 10.0), extend("step" = 0.1))]
    pub step_size_factor_primary: f32,
    /// Shadow ray step, as a multiple of the primary step.
    #[schemars(title = "Shadow Step", range(min = 0.1, max = 10.0), extend("step" = 0.1))]
    pub step_size_factor_secondary: f32,
    /// Finite-difference offset, in voxels.
    #[schemars(title = "Gradient Delta", range(min = 0.1, max = 10.0), extend("step" = 0.1))]
    pub gradient_delta_factor: f32,
    /// Gradient magnitude weight for hybrid shading.
    #[schemars(title = "Gradient Factor", range(min = 0.0, max = 100.0), extend("step" = 0.1))]
    pub gradient_factor: f32,
    /// Shading model.
    #[schemars(title = "Shading")]
    pub shading_type: ShadingType,
}

impl Default for VolumeProperty {
    fn default() -> Self {
        Self {
            density_scale: 100.0,
            step_size_factor_primary: 3.0,
            step_size_factor_secondary: 3.0,
            gradient_delta_factor: 4.0,
            gradient_factor: 4.0,
            shading_type: ShadingType::Hybrid,
        }
    }
}
