use std::fmt;

/// Errors that can occur during GPU context initialization.
#[derive(Debug)]
pub enum RenderContextError {
    /// No compatible GPU adapter found.
    AdapterRequest(wgpu::RequestAdapterError),
    /// GPU device request failed (limits or features not met).
    DeviceRequest(wgpu::RequestDeviceError),
}

impl fmt::Display for RenderContextError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AdapterRequest(e) => {
                write!(f, "no compatible GPU adapter found: {e}")
            }
            Self::DeviceRequest(e) => write!(f, "device request failed: {e}"),
        }
    }
}

impl std::error::Error for RenderContextError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::AdapterRequest(e) => Some(e),
            Self::DeviceRequest(e) => Some(e),
        }
    }
}

/// Features requested whenever the adapter offers them: border addressing,
/// and filterable 16-bit norm and 32-bit float volume textures.
pub const OPTIONAL_FEATURES: wgpu::Features = wgpu::Features::ADDRESS_MODE_CLAMP_TO_BORDER
    .union(wgpu::Features::TEXTURE_FORMAT_16BIT_NORM)
    .union(wgpu::Features::FLOAT32_FILTERABLE);

/// The subset of [`OPTIONAL_FEATURES`] an adapter offering `available`
/// can be asked for.
#[must_use]
pub fn requested_features(available: wgpu::Features) -> wgpu::Features {
    available & OPTIONAL_FEATURES
}

/// Owns the core wgpu resources used for compute and volume sampling.
pub struct RenderContext {
    /// The wgpu logical device.
    pub device: wgpu::Device,
    /// The wgpu command queue.
    pub queue: wgpu::Queue,
    /// Name of the selected adapter, for logging.
    pub adapter_name: String,
}

impl RenderContext {
    /// Create a headless context on the highest-performance adapter.
    ///
    /// # Errors
    ///
    /// Returns `RenderContextError` if the adapter or device request fails.
    pub async fn new_headless() -> Result<Self, RenderContextError> {
        let instance = wgpu::Instance::default();

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                compatible_surface: None,
                power_preference: wgpu::PowerPreference::HighPerformance,
                ..Default::default()
            })
            .await
            .map_err(RenderContextError::AdapterRequest)?;
        let adapter_name = adapter.get_info().name;
        let required_features = requested_features(adapter.features());

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("Volume Device"),
                required_features,
                required_limits: wgpu::Limits::default(),
                ..Default::default()
            })
            .await
            .map_err(RenderContextError::DeviceRequest)?;

        log::info!("using adapter '{adapter_name}' with {required_features:?}");
        Ok(Self {
            device,
            queue,
            adapter_name,
        })
    }

    /// Create a context from an externally-owned device and queue.
    #[must_use]
    pub fn from_device(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        Self {
            device,
            queue,
            adapter_name: String::from("external"),
        }
    }

    /// Largest 3D texture edge the device accepts.
    pub fn max_texture_dimension_3d(&self) -> u32 {
        self.device.limits().max_texture_dimension_3d
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_offered_optional_features_are_requested() {
        let offered = wgpu::Features::TEXTURE_FORMAT_16BIT_NORM
            | wgpu::Features::TIMESTAMP_QUERY
            | wgpu::Features::ADDRESS_MODE_CLAMP_TO_BORDER;
        assert_eq!(
            requested_features(offered),
            wgpu::Features::TEXTURE_FORMAT_16BIT_NORM
                | wgpu::Features::ADDRESS_MODE_CLAMP_TO_BORDER
        );
        assert_eq!(requested_features(wgpu::Features::empty()), wgpu::Features::empty());
        assert_eq!(requested_features(wgpu::Features::all()), OPTIONAL_FEATURES);
    }
}
