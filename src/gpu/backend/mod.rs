//! Accelerator primitive seam.
//!
//! A [`DeviceBackend`] exposes the raw memory, transfer, texture, symbol and
//! event primitives of an accelerator. Every primitive reports a raw
//! [`BackendError`] status; nothing here synchronizes on its own. The
//! fail-fast discipline (synchronize, call, synchronize, check) lives one
//! layer up in [`crate::gpu::device::Device`].

mod host;
mod wgpu_backend;

use std::fmt;

pub use host::{HostArray, HostBackend, HostTexture};
pub use wgpu_backend::{WgpuBackend, WgpuTextureBinding};

use crate::gpu::texture::TextureParams;

/// Address in the accelerator's linear address space.
///
/// Zero is the null address; freeing it is always a no-op.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
pub struct DevicePtr(pub u64);

impl DevicePtr {
    /// The null device address.
    pub const NULL: Self = Self(0);

    /// Returns `true` for the null address.
    #[must_use]
    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Address `bytes` past this one.
    #[must_use]
    pub fn offset(self, bytes: usize) -> Self {
        Self(self.0 + bytes as u64)
    }
}

impl fmt::Display for DevicePtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Identifier of a device-resident array backing a texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArrayId(pub u64);

/// Identifier of a timing event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventId(pub u64);

/// Per-axis element counts of an array.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Extent3 {
    /// Elements along x.
    pub width: usize,
    /// Elements along y.
    pub height: usize,
    /// Elements along z.
    pub depth: usize,
}

impl Extent3 {
    /// Extent with the given per-axis counts.
    #[must_use]
    pub const fn new(width: usize, height: usize, depth: usize) -> Self {
        Self {
            width,
            height,
            depth,
        }
    }

    /// A one-dimensional extent of `len` elements.
    #[must_use]
    pub const fn linear(len: usize) -> Self {
        Self::new(len, 1, 1)
    }

    /// Total element count.
    #[must_use]
    pub const fn volume(&self) -> usize {
        self.width * self.height * self.depth
    }

    /// Returns `true` when any axis is empty.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.volume() == 0
    }
}

/// Dimensionality of a texture array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArrayDimension {
    /// A 1D array (lookup tables).
    D1,
    /// A 3D array (voxel fields).
    D3,
}

/// Channel format of a single-component texel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelFormat {
    /// Unsigned 8-bit integer.
    U8,
    /// Signed 8-bit integer.
    I8,
    /// Unsigned 16-bit integer.
    U16,
    /// Signed 16-bit integer.
    I16,
    /// Unsigned 32-bit integer.
    U32,
    /// Signed 32-bit integer.
    I32,
    /// IEEE half-precision float.
    F16,
    /// IEEE single-precision float.
    F32,
}

impl ChannelFormat {
    /// Size of one texel in bytes.
    #[must_use]
    pub const fn bytes_per_texel(self) -> usize {
        match self {
            Self::U8 | Self::I8 => 1,
            Self::U16 | Self::I16 | Self::F16 => 2,
            Self::U32 | Self::I32 | Self::F32 => 4,
        }
    }
}

/// Host memory laid out in pitched rows, the source of a 3D array copy.
#[derive(Debug, Clone, Copy)]
pub struct PitchedHost<'a> {
    /// Raw texel bytes.
    pub data: &'a [u8],
    /// Bytes between the starts of consecutive rows.
    pub pitch: usize,
    /// Texels per row.
    pub width: usize,
    /// Rows per slice.
    pub height: usize,
}

/// Names a backend primitive. Used as the operation title of failures and
/// as the target of injected faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    /// Full-queue barrier.
    Synchronize,
    /// Linear allocation.
    Malloc,
    /// Pitched 2D allocation.
    MallocPitch,
    /// Byte fill.
    Memset,
    /// Host to device copy.
    MemcpyHostToDevice,
    /// Device to host copy.
    MemcpyDeviceToHost,
    /// Device to device copy.
    MemcpyDeviceToDevice,
    /// Host to device-symbol copy.
    MemcpyHostToSymbol,
    /// Device to device-symbol copy.
    MemcpyDeviceToSymbol,
    /// Linear free.
    Free,
    /// Symbol declaration.
    DeclareSymbol,
    /// Symbol address lookup.
    SymbolAddress,
    /// Texture array allocation.
    MallocArray,
    /// Host to array copy.
    MemcpyToArray,
    /// Texture array free.
    FreeArray,
    /// Texture bind.
    BindTexture,
    /// Texture unbind.
    UnbindTexture,
    /// Event creation.
    CreateEvent,
    /// Event record.
    RecordEvent,
    /// Event wait.
    SynchronizeEvent,
    /// Event elapsed time.
    ElapsedTime,
    /// Event destruction.
    DestroyEvent,
    /// Last-error query after a kernel launch.
    LastError,
}

impl Primitive {
    /// Human-readable operation title.
    #[must_use]
    pub const fn title(self) -> &'static str {
        match self {
            Self::Synchronize => "synchronize",
            Self::Malloc => "malloc",
            Self::MallocPitch => "malloc pitch",
            Self::Memset => "memset",
            Self::MemcpyHostToDevice => "memcpy host to device",
            Self::MemcpyDeviceToHost => "memcpy device to host",
            Self::MemcpyDeviceToDevice => "memcpy device to device",
            Self::MemcpyHostToSymbol => "memcpy host to symbol",
            Self::MemcpyDeviceToSymbol => "memcpy device to symbol",
            Self::Free => "free",
            Self::DeclareSymbol => "declare symbol",
            Self::SymbolAddress => "get symbol address",
            Self::MallocArray => "malloc array",
            Self::MemcpyToArray => "memcpy 3d to array",
            Self::FreeArray => "free array",
            Self::BindTexture => "bind texture to array",
            Self::UnbindTexture => "unbind texture",
            Self::CreateEvent => "event create",
            Self::RecordEvent => "event record",
            Self::SynchronizeEvent => "event synchronize",
            Self::ElapsedTime => "event elapsed time",
            Self::DestroyEvent => "event destroy",
            Self::LastError => "get last error",
        }
    }
}

impl fmt::Display for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.title())
    }
}

/// Category of a non-success backend status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendErrorKind {
    /// An argument was out of range or inconsistent.
    InvalidValue,
    /// The address does not belong to a live allocation.
    InvalidDevicePointer,
    /// An array or event identifier is unknown.
    InvalidResourceHandle,
    /// The named device symbol was never declared.
    InvalidSymbol,
    /// The device ran out of memory.
    MemoryAllocation,
    /// An event has not completed yet.
    NotReady,
    /// A kernel failed after launch.
    LaunchFailure,
    /// Any other device failure.
    Unknown,
}

impl BackendErrorKind {
    /// Generic description of the status.
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::InvalidValue => "invalid argument",
            Self::InvalidDevicePointer => "invalid device pointer",
            Self::InvalidResourceHandle => "invalid resource handle",
            Self::InvalidSymbol => "invalid device symbol",
            Self::MemoryAllocation => "out of memory",
            Self::NotReady => "device not ready",
            Self::LaunchFailure => "unspecified launch failure",
            Self::Unknown => "unknown error",
        }
    }
}

/// Raw non-success status returned by a backend primitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendError {
    /// Status category.
    pub kind: BackendErrorKind,
    /// Backend message.
    pub message: String,
}

impl BackendError {
    /// Status with a specific message.
    pub fn new(kind: BackendErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Status carrying only the generic description of `kind`.
    #[must_use]
    pub fn from_kind(kind: BackendErrorKind) -> Self {
        Self::new(kind, kind.description())
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for BackendError {}

/// Result of a backend primitive.
pub type BackendResult<T> = Result<T, BackendError>;

/// Raw accelerator primitives.
///
/// Implementations report statuses and nothing more: they never synchronize
/// implicitly and never log failures. Errors raised asynchronously by earlier
/// work surface from [`DeviceBackend::synchronize`] and
/// [`DeviceBackend::last_error`].
pub trait DeviceBackend {
    /// Block until all queued device work has completed.
    fn synchronize(&mut self) -> BackendResult<()>;

    /// Return and clear the status latched by the most recent launch.
    fn last_error(&mut self) -> BackendResult<()>;

    /// Allocate `bytes` of linear device memory.
    fn malloc(&mut self, bytes: usize) -> BackendResult<DevicePtr>;

    /// Allocate `height` rows of at least `width_bytes` each. Returns the
    /// base address and the row pitch in bytes.
    fn malloc_pitch(
        &mut self,
        width_bytes: usize,
        height: usize,
    ) -> BackendResult<(DevicePtr, usize)>;

    /// Fill `bytes` bytes at `dst` with `value`.
    fn memset(
        &mut self,
        dst: DevicePtr,
        value: u8,
        bytes: usize,
    ) -> BackendResult<()>;

    /// Copy host bytes to device memory.
    fn memcpy_host_to_device(
        &mut self,
        dst: DevicePtr,
        src: &[u8],
    ) -> BackendResult<()>;

    /// Copy device memory to host bytes.
    fn memcpy_device_to_host(
        &mut self,
        dst: &mut [u8],
        src: DevicePtr,
    ) -> BackendResult<()>;

    /// Copy `bytes` bytes between device allocations.
    fn memcpy_device_to_device(
        &mut self,
        dst: DevicePtr,
        src: DevicePtr,
        bytes: usize,
    ) -> BackendResult<()>;

    /// Release a linear allocation. Freeing [`DevicePtr::NULL`] succeeds.
    fn free(&mut self, ptr: DevicePtr) -> BackendResult<()>;

    /// Declare a device-global symbol of `bytes` bytes.
    ///
    /// Redeclaring an existing symbol with the same size succeeds.
    fn declare_symbol(&mut self, name: &str, bytes: usize) -> BackendResult<()>;

    /// Copy host bytes into a device symbol.
    fn memcpy_host_to_symbol(
        &mut self,
        symbol: &str,
        src: &[u8],
    ) -> BackendResult<()>;

    /// Copy `bytes` bytes of device memory into a device symbol.
    fn memcpy_device_to_symbol(
        &mut self,
        symbol: &str,
        src: DevicePtr,
        bytes: usize,
    ) -> BackendResult<()>;

    /// Device address of a symbol's storage.
    fn symbol_address(&mut self, symbol: &str) -> BackendResult<DevicePtr>;

    /// Allocate a texture array.
    fn malloc_array(
        &mut self,
        format: ChannelFormat,
        extent: Extent3,
        dimension: ArrayDimension,
    ) -> BackendResult<ArrayId>;

    /// Copy pitched host memory into the whole of an array.
    fn memcpy_to_array(
        &mut self,
        array: ArrayId,
        src: PitchedHost<'_>,
        extent: Extent3,
    ) -> BackendResult<()>;

    /// Release a texture array.
    fn free_array(&mut self, array: ArrayId) -> BackendResult<()>;

    /// Bind an array to the named texture reference with the given sampling
    /// state, superseding any previous binding.
    fn bind_texture_to_array(
        &mut self,
        texture: &str,
        params: &TextureParams,
        array: ArrayId,
    ) -> BackendResult<()>;

    /// Detach the named texture reference. Unbinding an unbound texture
    /// succeeds.
    fn unbind_texture(&mut self, texture: &str) -> BackendResult<()>;

    /// Create a timing event.
    fn create_event(&mut self) -> BackendResult<EventId>;

    /// Record an event at the current queue position.
    fn record_event(&mut self, event: EventId) -> BackendResult<()>;

    /// Block until a recorded event has completed.
    fn synchronize_event(&mut self, event: EventId) -> BackendResult<()>;

    /// Milliseconds between two completed events.
    fn elapsed_ms(
        &mut self,
        start: EventId,
        stop: EventId,
    ) -> BackendResult<f32>;

    /// Destroy an event.
    fn destroy_event(&mut self, event: EventId) -> BackendResult<()>;
}
