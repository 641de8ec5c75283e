//! Host-memory emulation of an accelerator.
//!
//! Linear allocations live in a single flat address space so pointer
//! arithmetic, symbol addresses and device-to-device copies behave like
//! they do on a real device. Errors raised by emulated kernels are latched
//! and surface on the next synchronize, which is the behaviour the
//! synchronize-before/after discipline exists to catch.

use std::collections::BTreeMap;

use rustc_hash::{FxHashMap, FxHashSet};
use web_time::Instant;

use super::{
    ArrayDimension, ArrayId, BackendError, BackendErrorKind, BackendResult,
    ChannelFormat, DeviceBackend, DevicePtr, EventId, Extent3, PitchedHost,
    Primitive,
};
use crate::gpu::texture::TextureParams;

/// First address handed out; keeps small integers from looking valid.
const BASE_ADDRESS: u64 = 0x1_0000;

/// Allocation alignment in bytes.
const ALIGNMENT: u64 = 256;

/// Row pitch alignment for pitched allocations.
const PITCH_ALIGNMENT: usize = 512;

/// A texture array held in host memory.
#[derive(Debug, Clone)]
pub struct HostArray {
    /// Texel format.
    pub format: ChannelFormat,
    /// Per-axis texel counts.
    pub extent: Extent3,
    /// 1D or 3D.
    pub dimension: ArrayDimension,
    /// Tightly packed texel bytes, x fastest.
    pub data: Vec<u8>,
}

/// The state of a bound texture reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostTexture {
    /// Array the texture samples from.
    pub array: ArrayId,
    /// Sampling state captured at bind time.
    pub params: TextureParams,
}

/// A failure armed against a primitive.
#[derive(Debug)]
struct Fault {
    primitive: Primitive,
    /// Matching calls to let through before failing.
    skip: usize,
    error: BackendError,
}

/// Accelerator emulated in host memory.
#[derive(Debug)]
pub struct HostBackend {
    next_address: u64,
    allocations: BTreeMap<u64, Vec<u8>>,
    symbols: FxHashMap<String, DevicePtr>,
    symbol_bases: FxHashSet<u64>,
    arrays: FxHashMap<ArrayId, HostArray>,
    next_array: u64,
    textures: FxHashMap<String, HostTexture>,
    events: FxHashMap<EventId, Option<Instant>>,
    next_event: u64,
    memory_limit: Option<usize>,
    pending_error: Option<BackendError>,
    faults: Vec<Fault>,
    synchronize_count: usize,
}

impl HostBackend {
    /// An empty device with unlimited memory.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_address: BASE_ADDRESS,
            allocations: BTreeMap::new(),
            symbols: FxHashMap::default(),
            symbol_bases: FxHashSet::default(),
            arrays: FxHashMap::default(),
            next_array: 0,
            textures: FxHashMap::default(),
            events: FxHashMap::default(),
            next_event: 0,
            memory_limit: None,
            pending_error: None,
            faults: Vec::new(),
            synchronize_count: 0,
        }
    }

    /// An empty device whose linear allocations may not exceed `bytes` in
    /// total.
    #[must_use]
    pub fn with_memory_limit(bytes: usize) -> Self {
        Self {
            memory_limit: Some(bytes),
            ..Self::new()
        }
    }

    /// Make the next call to `primitive` fail with `kind`.
    pub fn fail_next(&mut self, primitive: Primitive, kind: BackendErrorKind) {
        self.fail_nth(primitive, 0, kind);
    }

    /// Let `skip` calls to `primitive` succeed, then fail the following one
    /// with `kind`.
    pub fn fail_nth(
        &mut self,
        primitive: Primitive,
        skip: usize,
        kind: BackendErrorKind,
    ) {
        self.faults.push(Fault {
            primitive,
            skip,
            error: BackendError::from_kind(kind),
        });
    }

    /// Latch an asynchronous error, as a faulting kernel would. It is
    /// reported by the next synchronize or last-error query.
    pub fn raise_async_error(&mut self, kind: BackendErrorKind, message: &str) {
        if self.pending_error.is_none() {
            self.pending_error = Some(BackendError::new(kind, message));
        }
    }

    /// Number of completed full-queue barriers.
    #[must_use]
    pub fn synchronize_count(&self) -> usize {
        self.synchronize_count
    }

    /// Number of live linear allocations, excluding symbol storage.
    #[must_use]
    pub fn live_allocations(&self) -> usize {
        self.allocations.len() - self.symbol_bases.len()
    }

    /// Bytes held by live linear allocations, excluding symbol storage.
    #[must_use]
    pub fn allocated_bytes(&self) -> usize {
        self.allocations
            .iter()
            .filter(|(base, _)| !self.symbol_bases.contains(base))
            .map(|(_, bytes)| bytes.len())
            .sum()
    }

    /// Number of live texture arrays.
    #[must_use]
    pub fn live_arrays(&self) -> usize {
        self.arrays.len()
    }

    /// Number of live events.
    #[must_use]
    pub fn live_events(&self) -> usize {
        self.events.len()
    }

    /// A live array.
    #[must_use]
    pub fn array(&self, id: ArrayId) -> Option<&HostArray> {
        self.arrays.get(&id)
    }

    /// The binding of a texture reference.
    #[must_use]
    pub fn texture(&self, name: &str) -> Option<&HostTexture> {
        self.textures.get(name)
    }

    /// Current contents of a symbol.
    #[must_use]
    pub fn symbol_bytes(&self, name: &str) -> Option<&[u8]> {
        let base = self.symbols.get(name)?;
        self.allocations.get(&base.0).map(Vec::as_slice)
    }

    /// Interpret the first eight bytes of a symbol as a device address.
    #[must_use]
    pub fn symbol_pointer(&self, name: &str) -> Option<DevicePtr> {
        let bytes = self.symbol_bytes(name)?;
        let word: [u8; 8] = bytes.get(..8)?.try_into().ok()?;
        Some(DevicePtr(u64::from_le_bytes(word)))
    }

    fn check_fault(&mut self, primitive: Primitive) -> BackendResult<()> {
        let Some(index) =
            self.faults.iter().position(|f| f.primitive == primitive)
        else {
            return Ok(());
        };
        if self.faults[index].skip > 0 {
            self.faults[index].skip -= 1;
            return Ok(());
        }
        Err(self.faults.remove(index).error)
    }

    fn reserve(&mut self, bytes: usize) -> BackendResult<DevicePtr> {
        if let Some(limit) = self.memory_limit {
            if self.allocated_bytes() + bytes > limit {
                return Err(BackendError::from_kind(
                    BackendErrorKind::MemoryAllocation,
                ));
            }
        }
        let base = self.next_address;
        let span = (bytes as u64).max(1).next_multiple_of(ALIGNMENT);
        self.next_address += span;
        let _ = self.allocations.insert(base, vec![0; bytes]);
        Ok(DevicePtr(base))
    }

    /// Allocation containing `[ptr, ptr + bytes)`: base and offset.
    fn locate(&self, ptr: DevicePtr, bytes: usize) -> BackendResult<(u64, usize)> {
        let invalid =
            || BackendError::from_kind(BackendErrorKind::InvalidDevicePointer);
        if ptr.is_null() {
            return Err(invalid());
        }
        let (&base, data) =
            self.allocations.range(..=ptr.0).next_back().ok_or_else(invalid)?;
        let offset = (ptr.0 - base) as usize;
        if offset + bytes > data.len() {
            return Err(BackendError::new(
                BackendErrorKind::InvalidValue,
                format!("{bytes} bytes at {ptr} exceed the allocation"),
            ));
        }
        Ok((base, offset))
    }

    fn slice_mut(
        &mut self,
        ptr: DevicePtr,
        bytes: usize,
    ) -> BackendResult<&mut [u8]> {
        let (base, offset) = self.locate(ptr, bytes)?;
        self.allocations
            .get_mut(&base)
            .map(|data| &mut data[offset..offset + bytes])
            .ok_or_else(|| {
                BackendError::from_kind(BackendErrorKind::InvalidDevicePointer)
            })
    }

    fn slice(&self, ptr: DevicePtr, bytes: usize) -> BackendResult<&[u8]> {
        let (base, offset) = self.locate(ptr, bytes)?;
        self.allocations
            .get(&base)
            .map(|data| &data[offset..offset + bytes])
            .ok_or_else(|| {
                BackendError::from_kind(BackendErrorKind::InvalidDevicePointer)
            })
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
}

impl Default for HostBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceBackend for HostBackend {
    fn synchronize(&mut self) -> BackendResult<()> {
        self.check_fault(Primitive::Synchronize)?;
        self.synchronize_count += 1;
        self.pending_error.take().map_or(Ok(()), Err)
    }

    fn last_error(&mut self) -> BackendResult<()> {
        self.check_fault(Primitive::LastError)?;
        self.pending_error.take().map_or(Ok(()), Err)
    }

    fn malloc(&mut self, bytes: usize) -> BackendResult<DevicePtr> {
        self.check_fault(Primitive::Malloc)?;
        self.reserve(bytes)
    }

    fn malloc_pitch(
        &mut self,
        width_bytes: usize,
        height: usize,
    ) -> BackendResult<(DevicePtr, usize)> {
        self.check_fault(Primitive::MallocPitch)?;
        let pitch = width_bytes.max(1).next_multiple_of(PITCH_ALIGNMENT);
        let ptr = self.reserve(pitch * height)?;
        Ok((ptr, pitch))
    }

    fn memset(
        &mut self,
        dst: DevicePtr,
        value: u8,
        bytes: usize,
    ) -> BackendResult<()> {
        self.check_fault(Primitive::Memset)?;
        self.slice_mut(dst, bytes)?.fill(value);
        Ok(())
    }

    fn memcpy_host_to_device(
        &mut self,
        dst: DevicePtr,
        src: &[u8],
    ) -> BackendResult<()> {
        self.check_fault(Primitive::MemcpyHostToDevice)?;
        self.slice_mut(dst, src.len())?.copy_from_slice(src);
        Ok(())
    }

    fn memcpy_device_to_host(
        &mut self,
        dst: &mut [u8],
        src: DevicePtr,
    ) -> BackendResult<()> {
        self.check_fault(Primitive::MemcpyDeviceToHost)?;
        dst.copy_from_slice(self.slice(src, dst.len())?);
        Ok(())
    }

    fn memcpy_device_to_device(
        &mut self,
        dst: DevicePtr,
        src: DevicePtr,
        bytes: usize,
    ) -> BackendResult<()> {
        self.check_fault(Primitive::MemcpyDeviceToDevice)?;
        let staged = self.slice(src, bytes)?.to_vec();
        self.slice_mut(dst, bytes)?.copy_from_slice(&staged);
        Ok(())
    }

    fn free(&mut self, ptr: DevicePtr) -> BackendResult<()> {
        self.check_fault(Primitive::Free)?;
        if ptr.is_null() {
            return Ok(());
        }
        if self.symbol_bases.contains(&ptr.0) {
            return Err(BackendError::new(
                BackendErrorKind::InvalidDevicePointer,
                "symbol storage cannot be freed",
            ));
        }
        self.allocations.remove(&ptr.0).map(drop).ok_or_else(|| {
            BackendError::from_kind(BackendErrorKind::InvalidDevicePointer)
        })
    }

    fn declare_symbol(&mut self, name: &str, bytes: usize) -> BackendResult<()> {
        self.check_fault(Primitive::DeclareSymbol)?;
        if let Some(existing) = self.symbols.get(name) {
            let size = self.allocations.get(&existing.0).map_or(0, Vec::len);
            return if size == bytes {
                Ok(())
            } else {
                Err(BackendError::new(
                    BackendErrorKind::InvalidValue,
                    format!(
                        "symbol '{name}' already declared with {size} bytes"
                    ),
                ))
            };
        }
        let base = self.next_address;
        self.next_address += (bytes as u64).max(1).next_multiple_of(ALIGNMENT);
        let _ = self.allocations.insert(base, vec![0; bytes]);
        let _ = self.symbol_bases.insert(base);
        let _ = self.symbols.insert(name.to_owned(), DevicePtr(base));
        Ok(())
    }

    fn memcpy_host_to_symbol(
        &mut self,
        symbol: &str,
        src: &[u8],
    ) -> BackendResult<()> {
        self.check_fault(Primitive::MemcpyHostToSymbol)?;
        let base = self.symbol(symbol)?;
        self.slice_mut(base, src.len())?.copy_from_slice(src);
        Ok(())
    }

    fn memcpy_device_to_symbol(
        &mut self,
        symbol: &str,
        src: DevicePtr,
        bytes: usize,
    ) -> BackendResult<()> {
        self.check_fault(Primitive::MemcpyDeviceToSymbol)?;
        let base = self.symbol(symbol)?;
        let staged = self.slice(src, bytes)?.to_vec();
        self.slice_mut(base, bytes)?.copy_from_slice(&staged);
        Ok(())
    }

    fn symbol_address(&mut self, symbol: &str) -> BackendResult<DevicePtr> {
        self.check_fault(Primitive::SymbolAddress)?;
        self.symbol(symbol)
    }

    fn malloc_array(
        &mut self,
        format: ChannelFormat,
        extent: Extent3,
        dimension: ArrayDimension,
    ) -> BackendResult<ArrayId> {
        self.check_fault(Primitive::MallocArray)?;
        if dimension == ArrayDimension::D1 && (extent.height > 1 || extent.depth > 1)
        {
            return Err(BackendError::new(
                BackendErrorKind::InvalidValue,
                "1D arrays have a single row",
            ));
        }
        let bytes = extent.volume() * format.bytes_per_texel();
        if let Some(limit) = self.memory_limit {
            if self.allocated_bytes() + bytes > limit {
                return Err(BackendError::from_kind(
                    BackendErrorKind::MemoryAllocation,
                ));
            }
        }
        self.next_array += 1;
        let id = ArrayId(self.next_array);
        let _ = self.arrays.insert(
            id,
            HostArray {
                format,
                extent,
                dimension,
                data: vec![0; bytes],
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
        self.check_fault(Primitive::MemcpyToArray)?;
        let target = self.arrays.get_mut(&array).ok_or_else(|| {
            BackendError::from_kind(BackendErrorKind::InvalidResourceHandle)
        })?;
        if target.extent != extent {
            return Err(BackendError::new(
                BackendErrorKind::InvalidValue,
                "copy extent does not match the array extent",
            ));
        }
        let row_bytes = extent.width * target.format.bytes_per_texel();
        let rows = extent.height * extent.depth;
        if src.width != extent.width
            || src.height != extent.height
            || src.pitch < row_bytes
            || (rows > 0 && src.data.len() < src.pitch * (rows - 1) + row_bytes)
        {
            return Err(BackendError::new(
                BackendErrorKind::InvalidValue,
                "pitched source does not cover the copy extent",
            ));
        }
        for row in 0..rows {
            let from = row * src.pitch;
            let to = row * row_bytes;
            target.data[to..to + row_bytes]
                .copy_from_slice(&src.data[from..from + row_bytes]);
        }
        Ok(())
    }

    fn free_array(&mut self, array: ArrayId) -> BackendResult<()> {
        self.check_fault(Primitive::FreeArray)?;
        self.textures.retain(|_, texture| texture.array != array);
        self.arrays.remove(&array).map(drop).ok_or_else(|| {
            BackendError::from_kind(BackendErrorKind::InvalidResourceHandle)
        })
    }

    fn bind_texture_to_array(
        &mut self,
        texture: &str,
        params: &TextureParams,
        array: ArrayId,
    ) -> BackendResult<()> {
        self.check_fault(Primitive::BindTexture)?;
        if !self.arrays.contains_key(&array) {
            return Err(BackendError::from_kind(
                BackendErrorKind::InvalidResourceHandle,
            ));
        }
        let _ = self.textures.insert(
            texture.to_owned(),
            HostTexture {
                array,
                params: *params,
            },
        );
        Ok(())
    }

    fn unbind_texture(&mut self, texture: &str) -> BackendResult<()> {
        self.check_fault(Primitive::UnbindTexture)?;
        let _ = self.textures.remove(texture);
        Ok(())
    }

    fn create_event(&mut self) -> BackendResult<EventId> {
        self.check_fault(Primitive::CreateEvent)?;
        self.next_event += 1;
        let id = EventId(self.next_event);
        let _ = self.events.insert(id, None);
        Ok(id)
    }

    fn record_event(&mut self, event: EventId) -> BackendResult<()> {
        self.check_fault(Primitive::RecordEvent)?;
        let slot = self.events.get_mut(&event).ok_or_else(|| {
            BackendError::from_kind(BackendErrorKind::InvalidResourceHandle)
        })?;
        *slot = Some(Instant::now());
        Ok(())
    }

    fn synchronize_event(&mut self, event: EventId) -> BackendResult<()> {
        self.check_fault(Primitive::SynchronizeEvent)?;
        if self.events.contains_key(&event) {
            Ok(())
        } else {
            Err(BackendError::from_kind(BackendErrorKind::InvalidResourceHandle))
        }
    }

    fn elapsed_ms(
        &mut self,
        start: EventId,
        stop: EventId,
    ) -> BackendResult<f32> {
        self.check_fault(Primitive::ElapsedTime)?;
        let start = self.event_time(start)?;
        let stop = self.event_time(stop)?;
        Ok(stop.saturating_duration_since(start).as_secs_f32() * 1000.0)
    }

    fn destroy_event(&mut self, event: EventId) -> BackendResult<()> {
        self.check_fault(Primitive::DestroyEvent)?;
        self.events.remove(&event).map(drop).ok_or_else(|| {
            BackendError::from_kind(BackendErrorKind::InvalidResourceHandle)
        })
    }
}
