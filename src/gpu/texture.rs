//! Texture bindings: sampled views over device-resident arrays.

use crate::gpu::backend::{ChannelFormat, DeviceBackend};
use crate::gpu::device::DeviceArray;

/// Texel filtering applied when a kernel samples a texture.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum FilterMode {
    /// Nearest-texel lookup.
    Nearest,
    /// Trilinear interpolation between neighbouring texels.
    #[default]
    Linear,
}

/// Out-of-range coordinate handling along one axis.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum AddressMode {
    /// Clamp to the edge texel.
    #[default]
    Clamp,
    /// Repeat the texture.
    Wrap,
    /// Repeat, mirroring every other tile.
    Mirror,
    /// Return zero outside the texture.
    Border,
}

/// Sampling state of a texture reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureParams {
    /// Whether kernels address the texture with coordinates in `[0, 1]`.
    pub normalized: bool,
    /// Filtering mode.
    pub filter: FilterMode,
    /// Address mode per axis (x, y, z).
    pub address: [AddressMode; 3],
}

impl Default for TextureParams {
    fn default() -> Self {
        Self {
            normalized: true,
            filter: FilterMode::Linear,
            address: [AddressMode::Clamp; 3],
        }
    }
}

/// A plain-old-data scalar that can be stored as a texel.
pub trait Texel: bytemuck::Pod {
    /// Channel format matching `Self`.
    const FORMAT: ChannelFormat;
}

impl Texel for u8 {
    const FORMAT: ChannelFormat = ChannelFormat::U8;
}

impl Texel for i8 {
    const FORMAT: ChannelFormat = ChannelFormat::I8;
}

impl Texel for u16 {
    const FORMAT: ChannelFormat = ChannelFormat::U16;
}

impl Texel for i16 {
    const FORMAT: ChannelFormat = ChannelFormat::I16;
}

impl Texel for u32 {
    const FORMAT: ChannelFormat = ChannelFormat::U32;
}

impl Texel for i32 {
    const FORMAT: ChannelFormat = ChannelFormat::I32;
}

impl Texel for half::f16 {
    const FORMAT: ChannelFormat = ChannelFormat::F16;
}

impl Texel for f32 {
    const FORMAT: ChannelFormat = ChannelFormat::F32;
}

/// A named texture reference and the array currently bound to it.
///
/// At most one array is bound at a time. Rebinding through
/// [`crate::gpu::device::Device::bind_texture_1d`] or
/// [`crate::gpu::device::Device::bind_texture_3d`] unbinds and frees the
/// previous array before the new one is allocated.
pub struct TextureBinding<B: DeviceBackend> {
    name: String,
    /// Whether kernels use normalized coordinates.
    pub normalized: bool,
    /// Filtering applied on sampling.
    pub filter: FilterMode,
    /// Address mode applied to every bound axis.
    pub address_mode: AddressMode,
    pub(crate) array: Option<DeviceArray<B>>,
}

impl<B: DeviceBackend> TextureBinding<B> {
    /// An unbound texture reference with linear filtering, clamped
    /// addressing and normalized coordinates.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            normalized: true,
            filter: FilterMode::Linear,
            address_mode: AddressMode::Clamp,
            array: None,
        }
    }

    /// Set the filtering mode.
    #[must_use]
    pub fn with_filter(mut self, filter: FilterMode) -> Self {
        self.filter = filter;
        self
    }

    /// Set the address mode.
    #[must_use]
    pub fn with_address_mode(mut self, address_mode: AddressMode) -> Self {
        self.address_mode = address_mode;
        self
    }

    /// Set whether kernels use normalized coordinates.
    #[must_use]
    pub fn with_normalized(mut self, normalized: bool) -> Self {
        self.normalized = normalized;
        self
    }

    /// Name of the texture reference kernels sample from.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The bound array, if any.
    pub fn array(&self) -> Option<&DeviceArray<B>> {
        self.array.as_ref()
    }

    /// Returns `true` if an array is bound.
    pub fn is_bound(&self) -> bool {
        self.array.is_some()
    }

    /// Sampling state for a binding of `axes` dimensions. Axes beyond the
    /// bound dimensionality keep the default address mode.
    pub(crate) fn params(&self, axes: usize) -> TextureParams {
        let mut address = [AddressMode::default(); 3];
        for mode in address.iter_mut().take(axes) {
            *mode = self.address_mode;
        }
        TextureParams {
            normalized: self.normalized,
            filter: self.filter,
            address,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::backend::HostBackend;

    #[test]
    fn one_dimensional_params_only_set_first_axis() {
        let texture = TextureBinding::<HostBackend>::new("tf")
            .with_address_mode(AddressMode::Wrap)
            .with_filter(FilterMode::Nearest)
            .with_normalized(false);
        let params = texture.params(1);
        assert_eq!(
            params.address,
            [AddressMode::Wrap, AddressMode::Clamp, AddressMode::Clamp]
        );
        assert_eq!(params.filter, FilterMode::Nearest);
        assert!(!params.normalized);
    }

    #[test]
    fn volumetric_params_set_every_axis() {
        let texture = TextureBinding::<HostBackend>::new("volume")
            .with_address_mode(AddressMode::Mirror);
        assert_eq!(texture.params(3).address, [AddressMode::Mirror; 3]);
        assert!(!texture.is_bound());
    }

    #[test]
    fn texel_formats_match_sizes() {
        assert_eq!(<i16 as Texel>::FORMAT.bytes_per_texel(), 2);
        assert_eq!(<half::f16 as Texel>::FORMAT.bytes_per_texel(), 2);
        assert_eq!(<f32 as Texel>::FORMAT.bytes_per_texel(), 4);
        assert_eq!(<u8 as Texel>::FORMAT.bytes_per_texel(), 1);
    }
}
