use crate::gpu::backend::{DeviceBackend, Extent3};
use crate::gpu::device::{Device, DeviceError};
use crate::gpu::texture::TextureBinding;
use crate::options::VolumeProperty;
use crate::volume::import::VoxelVolume;
use crate::volume::metadata::{VolumeMetadata, VolumeUniform};

/// Texture reference kernels sample intensity from.
pub const INTENSITY_TEXTURE: &str = "tex_intensity";
/// Texture reference kernels sample gradient magnitude from.
pub const GRADIENT_MAGNITUDE_TEXTURE: &str = "tex_gradient_magnitude";
/// Symbol holding the published [`VolumeUniform`].
pub const VOLUME_SYMBOL: &str = "volume_info";

enum State {
    Unbound,
    Bound(VolumeMetadata),
}

/// Binds one imported volume to the device for the lifetime of a session.
///
/// The first non-empty input moves the binding from unbound to bound:
/// metadata is derived and both voxel fields are uploaded as 3D textures.
/// Later inputs are ignored; a new volume needs a new binding.
pub struct VolumeBinding<B: DeviceBackend> {
    device: Device<B>,
    intensity: TextureBinding<B>,
    gradient_magnitude: TextureBinding<B>,
    state: State,
}

impl<B: DeviceBackend> VolumeBinding<B> {
    /// An unbound session. Declares the metadata symbol.
    ///
    /// # Errors
    ///
    /// Fails if the symbol cannot be declared.
    pub fn new(device: &Device<B>) -> Result<Self, DeviceError> {
        device.declare_symbol::<VolumeUniform>(VOLUME_SYMBOL, 1)?;
        Ok(Self {
            device: device.clone(),
            intensity: TextureBinding::new(INTENSITY_TEXTURE),
            gradient_magnitude: TextureBinding::new(GRADIENT_MAGNITUDE_TEXTURE),
            state: State::Unbound,
        })
    }

    /// Offer an input volume. Returns `true` if it was bound.
    ///
    /// `None` leaves the session unbound, and any input after the first is
    /// ignored. If a texture upload fails the session stays unbound, but
    /// the textures may be partially bound and must not be sampled.
    ///
    /// # Errors
    ///
    /// Fails if either texture bind fails.
    pub fn set_input(&mut self, volume: Option<&VoxelVolume>) -> Result<bool, DeviceError> {
        if matches!(self.state, State::Bound(_)) {
            log::warn!("volume already bound, ignoring new input");
            return Ok(false);
        }
        let Some(volume) = volume else {
            return Ok(false);
        };

        let metadata = VolumeMetadata::from_volume(volume);
        let [width, height, depth] = volume.dimensions();
        let extent = Extent3::new(width, height, depth);
        self.device
            .bind_texture_3d(&mut self.intensity, extent, volume.intensity())?;
        self.device.bind_texture_3d(
            &mut self.gradient_magnitude,
            extent,
            volume.gradient_magnitude(),
        )?;

        log::info!(
            "bound {width}x{height}x{depth} volume, extent {:?}, intensity {}..{}",
            metadata.extent,
            metadata.intensity_min,
            metadata.intensity_max
        );
        self.state = State::Bound(metadata);
        Ok(true)
    }

    /// Refresh the rendering parameters from `property`, or from the
    /// documented defaults when there is no property source. Does nothing
    /// while unbound.
    pub fn update(&mut self, property: Option<&VolumeProperty>) {
        if let State::Bound(metadata) = &mut self.state {
            metadata.apply_properties(property);
        }
    }

    /// Copy the current metadata into [`VOLUME_SYMBOL`]. Returns `false`
    /// without touching the device while unbound.
    ///
    /// # Errors
    ///
    /// Fails if the copy fails.
    pub fn publish(&self) -> Result<bool, DeviceError> {
        let State::Bound(metadata) = &self.state else {
            return Ok(false);
        };
        self.device
            .copy_host_to_constant(&[metadata.to_uniform()], VOLUME_SYMBOL)?;
        Ok(true)
    }

    /// Returns `true` once a volume is bound.
    pub fn is_bound(&self) -> bool {
        matches!(self.state, State::Bound(_))
    }

    /// Metadata of the bound volume.
    pub fn metadata(&self) -> Option<&VolumeMetadata> {
        match &self.state {
            State::Bound(metadata) => Some(metadata),
            State::Unbound => None,
        }
    }

    /// Intensity texture.
    pub fn intensity_texture(&self) -> &TextureBinding<B> {
        &self.intensity
    }

    /// Gradient-magnitude texture.
    pub fn gradient_magnitude_texture(&self) -> &TextureBinding<B> {
        &self.gradient_magnitude
    }
}
