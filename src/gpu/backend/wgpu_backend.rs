//! wgpu implementation of the device primitives.
//!
//! Linear allocations are storage buffers placed in a synthetic address
//! space so [`DevicePtr`] arithmetic works the same way it does on the host
//! emulation. Symbols are uniform-capable buffers in the same space. A
//! texture binding is a view and sampler pair registered under the texture
//! name, for pipelines to fetch when they build their bind groups.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use rustc_hash::{FxHashMap, FxHashSet};
use web_time::Instant;

use super::{
    ArrayDimension, ArrayId, BackendError, BackendErrorKind, BackendResult,
    ChannelFormat, DeviceBackend, DevicePtr, EventId, Extent3, PitchedHost,
};
use crate::gpu::render_context::RenderContext;
use crate::gpu::texture::{AddressMode, FilterMode, TextureParams};

const BASE_ADDRESS: u64 = 0x1_0000;
const ALIGNMENT: u64 = 256;
const PITCH_ALIGNMENT: usize = 256;
const COPY_ALIGNMENT: usize = wgpu::COPY_BUFFER_ALIGNMENT as usize;

/// Uniform buffers are bound in 16-byte units.
const SYMBOL_ALIGNMENT: usize = 16;

struct Allocation {
    buffer: wgpu::Buffer,
    /// Requested size; the buffer itself is padded to the copy alignment.
    len: usize,
}

struct WgpuArray {
    texture: wgpu::Texture,
    dimension: ArrayDimension,
    narrowing: Option<Narrowing>,
}

/// Conversion applied to host texels the adapter cannot store as they are.
/// Every variant produces half floats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Narrowing {
    /// `i16` rescaled to `[-1, 1]`, as `R16Snorm` reads it.
    Snorm16,
    /// `u16` rescaled to `[0, 1]`, as `R16Unorm` reads it.
    Unorm16,
    /// `f32` rounded to the nearest half float.
    Float32,
}

impl Narrowing {
    const fn source_bytes(self) -> usize {
        match self {
            Self::Snorm16 | Self::Unorm16 => 2,
            Self::Float32 => 4,
        }
    }

    fn to_half(self, texel: &[u8]) -> half::f16 {
        let value = match self {
            Self::Snorm16 => {
                let v: i16 = bytemuck::pod_read_unaligned(texel);
                (f32::from(v) / f32::from(i16::MAX)).max(-1.0)
            }
            Self::Unorm16 => {
                let v: u16 = bytemuck::pod_read_unaligned(texel);
                f32::from(v) / f32::from(u16::MAX)
            }
            Self::Float32 => bytemuck::pod_read_unaligned(texel),
        };
        half::f16::from_f32(value)
    }
}

/// A texture name bound to an array: what a pipeline needs to sample it.
pub struct WgpuTextureBinding {
    /// Array the view was created from.
    pub array: ArrayId,
    /// View over the whole array.
    pub view: wgpu::TextureView,
    /// Sampler built from the binding's sampling state.
    pub sampler: wgpu::Sampler,
    /// Sampling state captured at bind time. Unnormalized coordinates are
    /// not a sampler property on wgpu; kernels honour them with texel loads.
    pub params: TextureParams,
}

/// Device primitives on a wgpu device and queue.
pub struct WgpuBackend {
    context: RenderContext,
    allocations: BTreeMap<u64, Allocation>,
    next_address: u64,
    symbols: FxHashMap<String, DevicePtr>,
    symbol_bases: FxHashSet<u64>,
    arrays: FxHashMap<ArrayId, WgpuArray>,
    next_array: u64,
    textures: FxHashMap<String, WgpuTextureBinding>,
    events: FxHashMap<EventId, Option<Instant>>,
    next_event: u64,
    uncaptured: Arc<Mutex<Option<BackendError>>>,
}

impl WgpuBackend {
    /// Take over a context. Uncaptured device errors are latched and
    /// reported by the next synchronize.
    pub fn new(context: RenderContext) -> Self {
        let uncaptured = Arc::new(Mutex::new(None));
        let latch = Arc::clone(&uncaptured);
        context
            .device
            .on_uncaptured_error(Box::new(move |error: wgpu::Error| {
                if let Ok(mut slot) = latch.lock() {
                    if slot.is_none() {
                        *slot = Some(backend_error(&error));
                    }
                }
            }));
        Self {
            context,
            allocations: BTreeMap::new(),
            next_address: BASE_ADDRESS,
            symbols: FxHashMap::default(),
            symbol_bases: FxHashSet::default(),
            arrays: FxHashMap::default(),
            next_array: 0,
            textures: FxHashMap::default(),
            events: FxHashMap::default(),
            next_event: 0,
            uncaptured,
        }
    }

    /// The wgpu device.
    pub fn device(&self) -> &wgpu::Device {
        &self.context.device
    }

    /// The wgpu queue.
    pub fn queue(&self) -> &wgpu::Queue {
        &self.context.queue
    }

    /// Buffer containing `ptr` and the byte offset of `ptr` inside it.
    pub fn buffer_at(&self, ptr: DevicePtr) -> Option<(&wgpu::Buffer, u64)> {
        let (base, allocation) = self.allocations.range(..=ptr.0).next_back()?;
        let offset = ptr.0 - base;
        (offset < allocation.buffer.size()).then_some((&allocation.buffer, offset))
    }

    /// Buffer backing a declared symbol.
    pub fn symbol_buffer(&self, name: &str) -> Option<&wgpu::Buffer> {
        let ptr = self.symbols.get(name)?;
        self.allocations.get(&ptr.0).map(|a| &a.buffer)
    }

    /// View and sampler bound to a texture name.
    pub fn texture_binding(&self, name: &str) -> Option<&WgpuTextureBinding> {
        self.textures.get(name)
    }

    fn poll(&self) -> BackendResult<()> {
        self.context
            .device
            .poll(wgpu::PollType::Wait)
            .map(drop)
            .map_err(|e| BackendError::new(BackendErrorKind::Unknown, e.to_string()))
    }

    fn take_uncaptured(&self) -> BackendResult<()> {
        let pending = self
            .uncaptured
            .lock()
            .map_or(None, |mut slot| slot.take());
        pending.map_or(Ok(()), Err)
    }

    /// Run `create` inside validation and out-of-memory error scopes.
    fn scoped<T>(&self, create: impl FnOnce(&wgpu::Device) -> T) -> BackendResult<T> {
        let device = &self.context.device;
        device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = create(device);
        let validation = pollster::block_on(device.pop_error_scope());
        let memory = pollster::block_on(device.pop_error_scope());
        match memory.or(validation) {
            Some(error) => Err(backend_error(&error)),
            None => Ok(value),
        }
    }

    fn place(&mut self, buffer: wgpu::Buffer, len: usize) -> DevicePtr {
        let base = self.next_address;
        self.next_address += buffer.size().max(1).next_multiple_of(ALIGNMENT);
        let _ = self.allocations.insert(base, Allocation { buffer, len });
        DevicePtr(base)
    }

    fn create_buffer(
        &mut self,
        bytes: usize,
        usage: wgpu::BufferUsages,
        label: &str,
    ) -> BackendResult<DevicePtr> {
        let size = bytes.max(1).next_multiple_of(COPY_ALIGNMENT) as u64;
        let buffer = self.scoped(|device| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size,
                usage,
                mapped_at_creation: false,
            })
        })?;
        Ok(self.place(buffer, bytes))
    }

    /// Resolve `[ptr, ptr + bytes)` to a buffer, offset and the copy size
    /// padded to the copy alignment.
    ///
    /// Unaligned offsets are rejected. An unaligned size is only padded when
    /// the range ends at the end of the allocation, where the padding is
    /// unused.
    fn locate(
        &self,
        ptr: DevicePtr,
        bytes: usize,
    ) -> BackendResult<(&wgpu::Buffer, u64, u64)> {
        let invalid =
            || BackendError::from_kind(BackendErrorKind::InvalidDevicePointer);
        if ptr.is_null() {
            return Err(invalid());
        }
        let (&base, allocation) =
            self.allocations.range(..=ptr.0).next_back().ok_or_else(invalid)?;
        let offset = (ptr.0 - base) as usize;
        if offset + bytes > allocation.len {
            return Err(BackendError::new(
                BackendErrorKind::InvalidValue,
                format!("{bytes} bytes at {ptr} exceed the allocation"),
            ));
        }
        let padded = bytes.next_multiple_of(COPY_ALIGNMENT);
        if offset % COPY_ALIGNMENT != 0
            || (padded != bytes && offset + bytes != allocation.len)
        {
            return Err(BackendError::new(
                BackendErrorKind::InvalidValue,
                format!(
                    "{bytes} bytes at {ptr} are not {COPY_ALIGNMENT}-byte aligned"
                ),
            ));
        }
        Ok((&allocation.buffer, offset as u64, padded as u64))
    }

    fn write(&self, dst: DevicePtr, src: &[u8]) -> BackendResult<()> {
        if src.is_empty() {
            return Ok(());
        }
        let (buffer, offset, padded) = self.locate(dst, src.len())?;
        if padded as usize == src.len() {
            self.context.queue.write_buffer(buffer, offset, src);
        } else {
            let mut staged = src.to_vec();
            staged.resize(padded as usize, 0);
            self.context.queue.write_buffer(buffer, offset, &staged);
        }
        Ok(())
    }

    fn copy(&self, dst: DevicePtr, src: DevicePtr, bytes: usize) -> BackendResult<()> {
        if bytes == 0 {
            return Ok(());
        }
        let (src_buffer, src_offset, _) = self.locate(src, bytes)?;
        let (dst_buffer, dst_offset, padded) = self.locate(dst, bytes)?;
        if src_offset + padded > src_buffer.size() {
            return Err(BackendError::new(
                BackendErrorKind::InvalidValue,
                "source range is not copy aligned",
            ));
        }
        let mut encoder =
            self.context
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("Device Copy Encoder"),
                });
        encoder.copy_buffer_to_buffer(src_buffer, src_offset, dst_buffer, dst_offset, padded);
        let _ = self.context.queue.submit(Some(encoder.finish()));
        Ok(())
    }

    fn read(&self, dst: &mut [u8], src: DevicePtr) -> BackendResult<()> {
        if dst.is_empty() {
            return Ok(());
        }
        let (buffer, offset, padded) = self.locate(src, dst.len())?;
        let staging = self.context.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Readback Staging Buffer"),
            size: padded,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder =
            self.context
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("Readback Encoder"),
                });
        encoder.copy_buffer_to_buffer(buffer, offset, &staging, 0, padded);
        let _ = self.context.queue.submit(Some(encoder.finish()));

        let slice = staging.slice(..);
        let (sender, receiver) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.poll()?;
        receiver
            .recv()
            .map_err(|_| {
                BackendError::new(BackendErrorKind::Unknown, "readback channel closed")
            })?
            .map_err(|e| BackendError::new(BackendErrorKind::Unknown, e.to_string()))?;
        {
            let data = slice.get_mapped_range();
            dst.copy_from_slice(&data[..dst.len()]);
        }
        staging.unmap();
        staging.destroy();
        Ok(())
    }

    fn symbol(&self, name: &str) -> BackendResult<DevicePtr> {
        self.symbols.get(name).copied().ok_or_else(|| {
            BackendError::new(
                BackendErrorKind::InvalidSymbol,
                format!("invalid device symbol '{name}'"),
            )
        })
    }

    fn event_time(&self, event: EventId) -> BackendResult<Instant> {
        match self.events.get(&event) {
            Some(Some(at)) => Ok(*at),
            Some(None) => Err(BackendError::from_kind(BackendErrorKind::NotReady)),
            None => Err(BackendError::from_kind(
                BackendErrorKind::InvalidResourceHandle,
            )),
        }
    }

    fn create_sampler(&self, params: &TextureParams, filterable: bool) -> wgpu::Sampler {
        let border_supported = self
            .context
            .device
            .features()
            .contains(wgpu::Features::ADDRESS_MODE_CLAMP_TO_BORDER);
        let address = params.address.map(|mode| address_mode(mode, border_supported));
        let filter = match params.filter {
            FilterMode::Linear if filterable => wgpu::FilterMode::Linear,
            FilterMode::Linear => {
                log::warn!("integer texels cannot be filtered, sampling nearest");
                wgpu::FilterMode::Nearest
            }
            FilterMode::Nearest => wgpu::FilterMode::Nearest,
        };
        self.context.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Volume Sampler"),
            address_mode_u: address[0],
            address_mode_v: address[1],
            address_mode_w: address[2],
            mag_filter: filter,
            min_filter: filter,
            border_color: border_supported
                .then_some(wgpu::SamplerBorderColor::TransparentBlack),
            ..Default::default()
        })
    }
}

fn backend_error(error: &wgpu::Error) -> BackendError {
    let kind = match error {
        wgpu::Error::OutOfMemory { .. } => BackendErrorKind::MemoryAllocation,
        wgpu::Error::Validation { .. } => BackendErrorKind::InvalidValue,
        wgpu::Error::Internal { .. } => BackendErrorKind::Unknown,
    };
    BackendError::new(kind, error.to_string())
}

fn address_mode(mode: AddressMode, border_supported: bool) -> wgpu::AddressMode {
    match mode {
        AddressMode::Clamp => wgpu::AddressMode::ClampToEdge,
        AddressMode::Wrap => wgpu::AddressMode::Repeat,
        AddressMode::Mirror => wgpu::AddressMode::MirrorRepeat,
        AddressMode::Border if border_supported => wgpu::AddressMode::ClampToBorder,
        AddressMode::Border => {
            log::warn!("border addressing unsupported by the adapter, clamping");
            wgpu::AddressMode::ClampToEdge
        }
    }
}

/// Texture format for a channel format, and the conversion its texels need
/// on upload.
///
/// Every format except the 32-bit integers lands in a filterable texture.
/// 16-bit integers are normalized the same way on either path, so kernels
/// read identical values whether or not the adapter has 16-bit norm
/// formats.
fn texel_layout(
    format: ChannelFormat,
    features: wgpu::Features,
) -> (wgpu::TextureFormat, Option<Narrowing>) {
    let norm16 = features.contains(wgpu::Features::TEXTURE_FORMAT_16BIT_NORM);
    let float32 = features.contains(wgpu::Features::FLOAT32_FILTERABLE);
    match format {
        ChannelFormat::U8 => (wgpu::TextureFormat::R8Unorm, None),
        ChannelFormat::I8 => (wgpu::TextureFormat::R8Snorm, None),
        ChannelFormat::U16 if norm16 => (wgpu::TextureFormat::R16Unorm, None),
        ChannelFormat::U16 => (wgpu::TextureFormat::R16Float, Some(Narrowing::Unorm16)),
        ChannelFormat::I16 if norm16 => (wgpu::TextureFormat::R16Snorm, None),
        ChannelFormat::I16 => (wgpu::TextureFormat::R16Float, Some(Narrowing::Snorm16)),
        ChannelFormat::U32 => (wgpu::TextureFormat::R32Uint, None),
        ChannelFormat::I32 => (wgpu::TextureFormat::R32Sint, None),
        ChannelFormat::F16 => (wgpu::TextureFormat::R16Float, None),
        ChannelFormat::F32 if float32 => (wgpu::TextureFormat::R32Float, None),
        ChannelFormat::F32 => (wgpu::TextureFormat::R16Float, Some(Narrowing::Float32)),
    }
}

fn is_filterable(format: wgpu::TextureFormat, features: wgpu::Features) -> bool {
    matches!(
        format.sample_type(None, Some(features)),
        Some(wgpu::TextureSampleType::Float { filterable: true })
    )
}

/// Repack a pitched host source into tightly packed half floats.
fn narrow_texels(
    narrowing: Narrowing,
    src: &PitchedHost<'_>,
    extent: Extent3,
) -> BackendResult<Vec<u8>> {
    let row_bytes = extent.width * narrowing.source_bytes();
    let mut out = Vec::with_capacity(extent.volume());
    for row in 0..extent.height * extent.depth {
        let start = row * src.pitch;
        let bytes = src.data.get(start..start + row_bytes).ok_or_else(|| {
            BackendError::new(
                BackendErrorKind::InvalidValue,
                "pitched source does not cover the copy extent",
            )
        })?;
        out.extend(
            bytes
                .chunks_exact(narrowing.source_bytes())
                .map(|texel| narrowing.to_half(texel)),
        );
    }
    Ok(bytemuck::cast_slice(&out).to_vec())
}

fn extent3d(extent: Extent3) -> BackendResult<wgpu::Extent3d> {
    let axis = |n: usize| {
        u32::try_from(n).map_err(|_| {
            BackendError::new(BackendErrorKind::InvalidValue, "extent exceeds u32")
        })
    };
    Ok(wgpu::Extent3d {
        width: axis(extent.width)?,
        height: axis(extent.height)?,
        depth_or_array_layers: axis(extent.depth)?,
    })
}

impl DeviceBackend for WgpuBackend {
    fn synchronize(&mut self) -> BackendResult<()> {
        self.poll()?;
        self.take_uncaptured()
    }

    fn last_error(&mut self) -> BackendResult<()> {
        self.take_uncaptured()
    }

    fn malloc(&mut self, bytes: usize) -> BackendResult<DevicePtr> {
        self.create_buffer(
            bytes,
            wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
            "Device Allocation",
        )
    }

    fn malloc_pitch(
        &mut self,
        width_bytes: usize,
        height: usize,
    ) -> BackendResult<(DevicePtr, usize)> {
        let pitch = width_bytes.max(1).next_multiple_of(PITCH_ALIGNMENT);
        let ptr = self.malloc(pitch * height)?;
        Ok((ptr, pitch))
    }

    fn memset(
        &mut self,
        dst: DevicePtr,
        value: u8,
        bytes: usize,
    ) -> BackendResult<()> {
        if value == 0 && bytes > 0 {
            let (buffer, offset, padded) = self.locate(dst, bytes)?;
            let mut encoder = self.context.device.create_command_encoder(
                &wgpu::CommandEncoderDescriptor {
                    label: Some("Memset Encoder"),
                },
            );
            encoder.clear_buffer(buffer, offset, Some(padded));
            let _ = self.context.queue.submit(Some(encoder.finish()));
            return Ok(());
        }
        self.write(dst, &vec![value; bytes])
    }

    fn memcpy_host_to_device(
        &mut self,
        dst: DevicePtr,
        src: &[u8],
    ) -> BackendResult<()> {
        self.write(dst, src)
    }

    fn memcpy_device_to_host(
        &mut self,
        dst: &mut [u8],
        src: DevicePtr,
    ) -> BackendResult<()> {
        self.read(dst, src)
    }

    fn memcpy_device_to_device(
        &mut self,
        dst: DevicePtr,
        src: DevicePtr,
        bytes: usize,
    ) -> BackendResult<()> {
        self.copy(dst, src, bytes)
    }

    fn free(&mut self, ptr: DevicePtr) -> BackendResult<()> {
        if ptr.is_null() {
            return Ok(());
        }
        if self.symbol_bases.contains(&ptr.0) {
            return Err(BackendError::new(
                BackendErrorKind::InvalidDevicePointer,
                "symbol storage cannot be freed",
            ));
        }
        let allocation = self.allocations.remove(&ptr.0).ok_or_else(|| {
            BackendError::from_kind(BackendErrorKind::InvalidDevicePointer)
        })?;
        allocation.buffer.destroy();
        Ok(())
    }

    fn declare_symbol(&mut self, name: &str, bytes: usize) -> BackendResult<()> {
        if let Some(existing) = self.symbols.get(name) {
            let size = self.allocations.get(&existing.0).map_or(0, |a| a.len);
            return if size == bytes {
                Ok(())
            } else {
                Err(BackendError::new(
                    BackendErrorKind::InvalidValue,
                    format!("symbol '{name}' already declared with {size} bytes"),
                ))
            };
        }
        let size = bytes.max(1).next_multiple_of(SYMBOL_ALIGNMENT) as u64;
        let label = format!("Symbol {name}");
        let buffer = self.scoped(|device| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(&label),
                size,
                usage: wgpu::BufferUsages::UNIFORM
                    | wgpu::BufferUsages::STORAGE
                    | wgpu::BufferUsages::COPY_SRC
                    | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        })?;
        let ptr = self.place(buffer, bytes);
        let _ = self.symbol_bases.insert(ptr.0);
        let _ = self.symbols.insert(name.to_owned(), ptr);
        Ok(())
    }

    fn memcpy_host_to_symbol(
        &mut self,
        symbol: &str,
        src: &[u8],
    ) -> BackendResult<()> {
        let base = self.symbol(symbol)?;
        self.write(base, src)
    }

    fn memcpy_device_to_symbol(
        &mut self,
        symbol: &str,
        src: DevicePtr,
        bytes: usize,
    ) -> BackendResult<()> {
        let base = self.symbol(symbol)?;
        self.copy(base, src, bytes)
    }

    fn symbol_address(&mut self, symbol: &str) -> BackendResult<DevicePtr> {
        self.symbol(symbol)
    }

    fn malloc_array(
        &mut self,
        format: ChannelFormat,
        extent: Extent3,
        dimension: ArrayDimension,
    ) -> BackendResult<ArrayId> {
        if extent.is_empty() {
            return Err(BackendError::new(
                BackendErrorKind::InvalidValue,
                "wgpu textures cannot be empty",
            ));
        }
        let size = extent3d(extent)?;
        let (wgpu_dimension, label) = match dimension {
            ArrayDimension::D1 if size.height > 1 || size.depth_or_array_layers > 1 => {
                return Err(BackendError::new(
                    BackendErrorKind::InvalidValue,
                    "1D arrays have a single row",
                ));
            }
            ArrayDimension::D1 => (wgpu::TextureDimension::D1, "Lookup Array"),
            ArrayDimension::D3 => (wgpu::TextureDimension::D3, "Volume Array"),
        };
        let (texture_format, narrowing) =
            texel_layout(format, self.context.device.features());
        let texture = self.scoped(|device| {
            device.create_texture(&wgpu::TextureDescriptor {
                label: Some(label),
                size,
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu_dimension,
                format: texture_format,
                usage: wgpu::TextureUsages::TEXTURE_BINDING
                    | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            })
        })?;
        self.next_array += 1;
        let id = ArrayId(self.next_array);
        let _ = self.arrays.insert(
            id,
            WgpuArray {
                texture,
                dimension,
                narrowing,
            },
        );
        Ok(id)
    }

    fn memcpy_to_array(
        &mut self,
        array: ArrayId,
        src: PitchedHost<'_>,
        extent: Extent3,
    ) -> BackendResult<()> {
        let target = self.arrays.get(&array).ok_or_else(|| {
            BackendError::from_kind(BackendErrorKind::InvalidResourceHandle)
        })?;
        let size = extent3d(extent)?;
        if target.texture.size() != size || src.width != extent.width {
            return Err(BackendError::new(
                BackendErrorKind::InvalidValue,
                "copy extent does not match the array extent",
            ));
        }
        let (data, pitch) = match target.narrowing {
            Some(narrowing) => (
                Cow::Owned(narrow_texels(narrowing, &src, extent)?),
                extent.width * size_of::<half::f16>(),
            ),
            None => (Cow::Borrowed(src.data), src.pitch),
        };
        let pitch = u32::try_from(pitch).map_err(|_| {
            BackendError::new(BackendErrorKind::InvalidValue, "pitch exceeds u32")
        })?;
        self.context.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &target.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(pitch),
                rows_per_image: Some(size.height),
            },
            size,
        );
        Ok(())
    }

    fn free_array(&mut self, array: ArrayId) -> BackendResult<()> {
        self.textures.retain(|_, binding| binding.array != array);
        let removed = self.arrays.remove(&array).ok_or_else(|| {
            BackendError::from_kind(BackendErrorKind::InvalidResourceHandle)
        })?;
        removed.texture.destroy();
        Ok(())
    }

    fn bind_texture_to_array(
        &mut self,
        texture: &str,
        params: &TextureParams,
        array: ArrayId,
    ) -> BackendResult<()> {
        let target = self.arrays.get(&array).ok_or_else(|| {
            BackendError::from_kind(BackendErrorKind::InvalidResourceHandle)
        })?;
        let view_dimension = match target.dimension {
            ArrayDimension::D1 => wgpu::TextureViewDimension::D1,
            ArrayDimension::D3 => wgpu::TextureViewDimension::D3,
        };
        let view = target.texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some(texture),
            dimension: Some(view_dimension),
            ..Default::default()
        });
        let filterable =
            is_filterable(target.texture.format(), self.context.device.features());
        let sampler = self.create_sampler(params, filterable);
        let _ = self.textures.insert(
            texture.to_owned(),
            WgpuTextureBinding {
                array,
                view,
                sampler,
                params: *params,
            },
        );
        Ok(())
    }

    fn unbind_texture(&mut self, texture: &str) -> BackendResult<()> {
        let _ = self.textures.remove(texture);
        Ok(())
    }

    fn create_event(&mut self) -> BackendResult<EventId> {
        self.next_event += 1;
        let id = EventId(self.next_event);
        let _ = self.events.insert(id, None);
        Ok(id)
    }

    fn record_event(&mut self, event: EventId) -> BackendResult<()> {
        if !self.events.contains_key(&event) {
            return Err(BackendError::from_kind(
                BackendErrorKind::InvalidResourceHandle,
            ));
        }
        self.poll()?;
        let _ = self.events.insert(event, Some(Instant::now()));
        Ok(())
    }

    fn synchronize_event(&mut self, event: EventId) -> BackendResult<()> {
        let _ = self.event_time(event)?;
        self.poll()
    }

    fn elapsed_ms(
        &mut self,
        start: EventId,
        stop: EventId,
    ) -> BackendResult<f32> {
        let start = self.event_time(start)?;
        let stop = self.event_time(stop)?;
        Ok(stop.saturating_duration_since(start).as_secs_f32() * 1000.0)
    }

    fn destroy_event(&mut self, event: EventId) -> BackendResult<()> {
        self.events.remove(&event).map(drop).ok_or_else(|| {
            BackendError::from_kind(BackendErrorKind::InvalidResourceHandle)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FILTERED_FORMATS: [ChannelFormat; 6] = [
        ChannelFormat::U8,
        ChannelFormat::I8,
        ChannelFormat::U16,
        ChannelFormat::I16,
        ChannelFormat::F16,
        ChannelFormat::F32,
    ];

    #[test]
    fn volume_formats_are_filterable_with_or_without_optional_features() {
        let full = wgpu::Features::TEXTURE_FORMAT_16BIT_NORM
            | wgpu::Features::FLOAT32_FILTERABLE;
        for features in [wgpu::Features::empty(), full] {
            for format in FILTERED_FORMATS {
                let (texture_format, _) = texel_layout(format, features);
                assert_eq!(
                    texture_format.sample_type(None, Some(features)),
                    Some(wgpu::TextureSampleType::Float { filterable: true }),
                    "{format:?} -> {texture_format:?} with {features:?}"
                );
            }
        }
    }

    #[test]
    fn sixteen_bit_norm_formats_are_used_when_available() {
        let features = wgpu::Features::TEXTURE_FORMAT_16BIT_NORM;
        assert_eq!(
            texel_layout(ChannelFormat::I16, features),
            (wgpu::TextureFormat::R16Snorm, None)
        );
        assert_eq!(
            texel_layout(ChannelFormat::I16, wgpu::Features::empty()),
            (wgpu::TextureFormat::R16Float, Some(Narrowing::Snorm16))
        );
        assert!(!is_filterable(
            texel_layout(ChannelFormat::I32, features).0,
            features
        ));
    }

    #[test]
    fn narrowed_texels_match_normalized_reads() {
        let values: [i16; 4] = [i16::MIN, -16384, 0, i16::MAX];
        let bytes: &[u8] = bytemuck::cast_slice(&values);
        let mut padded = bytes[..4].to_vec();
        padded.extend([0xaa; 4]);
        padded.extend(&bytes[4..]);
        let src = PitchedHost {
            data: &padded,
            pitch: 8,
            width: 2,
            height: 2,
        };
        let out = narrow_texels(Narrowing::Snorm16, &src, Extent3::new(2, 2, 1)).unwrap();
        let halves: &[half::f16] = bytemuck::cast_slice(&out);
        let floats: Vec<f32> = halves.iter().map(|h| h.to_f32()).collect();
        assert_eq!(floats[0], -1.0);
        assert!((floats[1] + 0.5).abs() < 1e-3);
        assert_eq!(floats[2], 0.0);
        assert_eq!(floats[3], 1.0);
    }

    #[test]
    fn short_pitched_source_is_rejected() {
        let src = PitchedHost {
            data: &[0; 6],
            pitch: 4,
            width: 1,
            height: 2,
        };
        let err = narrow_texels(Narrowing::Float32, &src, Extent3::new(1, 2, 1)).unwrap_err();
        assert_eq!(err.kind, BackendErrorKind::InvalidValue);
    }

    #[test]
    fn border_addressing_falls_back_to_clamp() {
        assert_eq!(
            address_mode(AddressMode::Border, false),
            wgpu::AddressMode::ClampToEdge
        );
        assert_eq!(
            address_mode(AddressMode::Border, true),
            wgpu::AddressMode::ClampToBorder
        );
        assert_eq!(address_mode(AddressMode::Wrap, false), wgpu::AddressMode::Repeat);
    }

    #[test]
    fn oversized_extent_is_rejected() {
        let extent = Extent3::new(usize::MAX, 1, 1);
        assert!(extent3d(extent).is_err());
        let ok = extent3d(Extent3::new(4, 5, 6)).unwrap();
        assert_eq!(ok.depth_or_array_layers, 6);
    }
}
