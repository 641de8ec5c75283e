//! Fail-fast wrapper around every accelerator primitive.
//!
//! Each operation is sandwiched between two full-queue barriers and its
//! status is checked immediately, so an asynchronous fault is reported by
//! the operation that caused it rather than by some unrelated later call.
//! Device memory is held by scoped owners ([`DeviceBuffer`],
//! [`DeviceArray`]) that release it exactly once, on every exit path.

use std::cell::RefCell;
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;

use bytemuck::Pod;

use crate::gpu::backend::{
    ArrayDimension, ArrayId, BackendError, BackendErrorKind, BackendResult,
    ChannelFormat, DeviceBackend, DevicePtr, Extent3, PitchedHost,
    Primitive,
};
use crate::gpu::texture::{Texel, TextureBinding};

/// A device primitive returned a non-success status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceError {
    /// Title of the failing operation.
    pub title: &'static str,
    /// Status category reported by the backend.
    pub kind: BackendErrorKind,
    /// Human-readable backend message.
    pub message: String,
}

impl DeviceError {
    /// Attach an operation title to a raw backend status.
    #[must_use]
    pub fn new(title: &'static str, error: BackendError) -> Self {
        Self {
            title,
            kind: error.kind,
            message: error.message,
        }
    }

    fn invalid(title: &'static str, message: impl Into<String>) -> Self {
        Self::new(
            title,
            BackendError::new(BackendErrorKind::InvalidValue, message),
        )
    }
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.title)
    }
}

impl std::error::Error for DeviceError {}

/// Shared handle to an accelerator.
///
/// Cloning is cheap and every clone drives the same backend. The handle is
/// deliberately `!Send`: all operations on one device are issued from one
/// host thread.
pub struct Device<B: DeviceBackend> {
    backend: Rc<RefCell<B>>,
}

impl<B: DeviceBackend> Clone for Device<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Rc::clone(&self.backend),
        }
    }
}

impl<B: DeviceBackend> Device<B> {
    /// Wrap a backend.
    pub fn new(backend: B) -> Self {
        Self {
            backend: Rc::new(RefCell::new(backend)),
        }
    }

    /// Run `f` with direct access to the backend.
    ///
    /// Kernel launches use this to record work; tests use it to inspect
    /// device state. Device handles must not be dropped inside `f`.
    ///
    /// # Panics
    ///
    /// Panics if `f` reaches the backend again through this device or a
    /// clone of it, for example by calling another device operation.
    pub fn with_backend<R>(&self, f: impl FnOnce(&mut B) -> R) -> R {
        f(&mut *self.backend.borrow_mut())
    }

    /// Full-queue barrier.
    ///
    /// # Errors
    ///
    /// Returns the status of any asynchronous failure that was pending.
    pub fn synchronize(&self) -> Result<(), DeviceError> {
        self.with_backend(B::synchronize)
            .map_err(|e| DeviceError::new(Primitive::Synchronize.title(), e))
    }

    /// Check the status latched by the most recent kernel launch.
    ///
    /// # Errors
    ///
    /// Returns the latched launch failure, tagged with `title`.
    pub fn check_last_error(&self, title: &'static str) -> Result<(), DeviceError> {
        self.with_backend(B::last_error)
            .map_err(|e| DeviceError::new(title, e))
    }

    /// Synchronize, run `op`, synchronize again.
    fn guarded<T>(
        &self,
        primitive: Primitive,
        op: impl FnOnce(&mut B) -> BackendResult<T>,
    ) -> Result<T, DeviceError> {
        let value = self.issue(primitive, op)?;
        self.synchronize()?;
        Ok(value)
    }

    /// Synchronize and run `op`, without the trailing barrier.
    fn issue<T>(
        &self,
        primitive: Primitive,
        op: impl FnOnce(&mut B) -> BackendResult<T>,
    ) -> Result<T, DeviceError> {
        self.synchronize()?;
        log::debug!("device: {primitive}");
        self.with_backend(op)
            .map_err(|e| DeviceError::new(primitive.title(), e))
    }

    /// Run an event primitive; events are not sandwiched.
    pub(crate) fn event_op<T>(
        &self,
        primitive: Primitive,
        op: impl FnOnce(&mut B) -> BackendResult<T>,
    ) -> Result<T, DeviceError> {
        self.with_backend(op)
            .map_err(|e| DeviceError::new(primitive.title(), e))
    }

    /// Allocate room for `count` elements of `T`.
    ///
    /// # Errors
    ///
    /// Fails if the allocation or either barrier fails; nothing leaks.
    pub fn allocate<T: Pod>(
        &self,
        count: usize,
    ) -> Result<DeviceBuffer<B, T>, DeviceError> {
        let ptr = self.issue(Primitive::Malloc, |b| {
            b.malloc(count * size_of::<T>())
        })?;
        let buffer = DeviceBuffer::from_raw(self.clone(), ptr, count);
        self.synchronize()?;
        Ok(buffer)
    }

    /// Allocate `height` rows of `width` elements with device-chosen row
    /// alignment. Returns the buffer and its pitch in bytes.
    ///
    /// # Errors
    ///
    /// Fails if the allocation or either barrier fails; nothing leaks.
    pub fn allocate_pitched<T: Pod>(
        &self,
        width: usize,
        height: usize,
    ) -> Result<(DeviceBuffer<B, T>, usize), DeviceError> {
        let (ptr, pitch) = self.issue(Primitive::MallocPitch, |b| {
            b.malloc_pitch(width * size_of::<T>(), height)
        })?;
        let count = (pitch * height) / size_of::<T>().max(1);
        let buffer = DeviceBuffer::from_raw(self.clone(), ptr, count);
        self.synchronize()?;
        Ok((buffer, pitch))
    }

    /// Fill the first `count` elements of `buffer` with the byte `value`.
    ///
    /// # Errors
    ///
    /// Fails on a null buffer or when `count` exceeds its length.
    pub fn memset<T: Pod>(
        &self,
        buffer: &DeviceBuffer<B, T>,
        value: u8,
        count: usize,
    ) -> Result<(), DeviceError> {
        self.guarded(Primitive::Memset, |b| {
            b.memset(buffer.ptr(), value, count * size_of::<T>())
        })
    }

    /// Copy `src` into the start of `dst`.
    ///
    /// # Errors
    ///
    /// Fails on a null destination or when `src` does not fit.
    pub fn copy_host_to_device<T: Pod>(
        &self,
        src: &[T],
        dst: &DeviceBuffer<B, T>,
    ) -> Result<(), DeviceError> {
        self.guarded(Primitive::MemcpyHostToDevice, |b| {
            b.memcpy_host_to_device(dst.ptr(), bytemuck::cast_slice(src))
        })
    }

    /// Fill `dst` from the start of `src`.
    ///
    /// # Errors
    ///
    /// Fails on a null source or when `dst` is longer than `src`.
    pub fn copy_device_to_host<T: Pod>(
        &self,
        src: &DeviceBuffer<B, T>,
        dst: &mut [T],
    ) -> Result<(), DeviceError> {
        self.guarded(Primitive::MemcpyDeviceToHost, |b| {
            b.memcpy_device_to_host(bytemuck::cast_slice_mut(dst), src.ptr())
        })
    }

    /// Copy the first `count` elements of `src` into `dst`.
    ///
    /// # Errors
    ///
    /// Fails on null buffers or out-of-range counts.
    pub fn copy_device_to_device<T: Pod>(
        &self,
        src: &DeviceBuffer<B, T>,
        dst: &DeviceBuffer<B, T>,
        count: usize,
    ) -> Result<(), DeviceError> {
        self.guarded(Primitive::MemcpyDeviceToDevice, |b| {
            b.memcpy_device_to_device(
                dst.ptr(),
                src.ptr(),
                count * size_of::<T>(),
            )
        })
    }

    /// Declare a device-global symbol large enough for `count` values of
    /// `T`.
    ///
    /// # Errors
    ///
    /// Fails if the symbol exists with a different size.
    pub fn declare_symbol<T: Pod>(
        &self,
        symbol: &str,
        count: usize,
    ) -> Result<(), DeviceError> {
        self.guarded(Primitive::DeclareSymbol, |b| {
            b.declare_symbol(symbol, count * size_of::<T>())
        })
    }

    /// Copy host values into a device symbol.
    ///
    /// # Errors
    ///
    /// Fails for undeclared symbols or values larger than the symbol.
    pub fn copy_host_to_symbol<T: Pod>(
        &self,
        src: &[T],
        symbol: &str,
    ) -> Result<(), DeviceError> {
        self.guarded(Primitive::MemcpyHostToSymbol, |b| {
            b.memcpy_host_to_symbol(symbol, bytemuck::cast_slice(src))
        })
    }

    /// Copy host values into constant memory. Constant memory is a device
    /// symbol; this is [`Device::copy_host_to_symbol`] under the name
    /// kernels authors expect.
    ///
    /// # Errors
    ///
    /// See [`Device::copy_host_to_symbol`].
    pub fn copy_host_to_constant<T: Pod>(
        &self,
        src: &[T],
        symbol: &str,
    ) -> Result<(), DeviceError> {
        self.copy_host_to_symbol(src, symbol)
    }

    /// Copy the first `count` elements of a device buffer into a symbol.
    ///
    /// # Errors
    ///
    /// Fails for undeclared symbols, null buffers or out-of-range counts.
    pub fn copy_device_to_symbol<T: Pod>(
        &self,
        src: &DeviceBuffer<B, T>,
        symbol: &str,
        count: usize,
    ) -> Result<(), DeviceError> {
        self.guarded(Primitive::MemcpyDeviceToSymbol, |b| {
            b.memcpy_device_to_symbol(symbol, src.ptr(), count * size_of::<T>())
        })
    }

    /// Device address of a symbol's storage.
    ///
    /// # Errors
    ///
    /// Fails for undeclared symbols.
    pub fn symbol_address(&self, symbol: &str) -> Result<DevicePtr, DeviceError> {
        self.guarded(Primitive::SymbolAddress, |b| b.symbol_address(symbol))
    }

    /// Release a buffer. Freeing a null buffer is a no-op.
    ///
    /// # Errors
    ///
    /// Fails if the backend rejects the free; the handle is left untouched.
    pub fn free<T: Pod>(
        &self,
        buffer: &mut DeviceBuffer<B, T>,
    ) -> Result<(), DeviceError> {
        buffer.free()
    }

    /// Release an array. Freeing an already released array is a no-op.
    ///
    /// # Errors
    ///
    /// Fails if the backend rejects the free.
    pub fn free_array(&self, array: &mut DeviceArray<B>) -> Result<(), DeviceError> {
        array.free()
    }

    /// Detach a texture reference from its array and release the array.
    ///
    /// # Errors
    ///
    /// Fails if the unbind or the free fails.
    pub fn unbind_texture(
        &self,
        texture: &mut TextureBinding<B>,
    ) -> Result<(), DeviceError> {
        self.guarded(Primitive::UnbindTexture, |b| {
            b.unbind_texture(texture.name())
        })?;
        if let Some(mut array) = texture.array.take() {
            array.free()?;
        }
        Ok(())
    }

    /// Upload `data` into a fresh 1D array and bind it to `texture`.
    ///
    /// Any previously bound array is unbound and freed first. On failure the
    /// texture is left unbound or partially bound and must not be sampled.
    ///
    /// # Errors
    ///
    /// Fails if any step of the sequence fails.
    pub fn bind_texture_1d<T: Texel>(
        &self,
        texture: &mut TextureBinding<B>,
        data: &[T],
    ) -> Result<(), DeviceError> {
        self.bind_texture(
            texture,
            data,
            Extent3::linear(data.len()),
            ArrayDimension::D1,
        )
    }

    /// Upload a volume of `extent` texels into a fresh 3D array and bind it
    /// to `texture`.
    ///
    /// Any previously bound array is unbound and freed first. On failure the
    /// texture is left unbound or partially bound and must not be sampled.
    ///
    /// # Errors
    ///
    /// Fails if `data` does not hold exactly `extent` texels or if any step
    /// of the sequence fails.
    pub fn bind_texture_3d<T: Texel>(
        &self,
        texture: &mut TextureBinding<B>,
        extent: Extent3,
        data: &[T],
    ) -> Result<(), DeviceError> {
        if data.len() != extent.volume() {
            return Err(DeviceError::invalid(
                "bind texture 3d",
                format!(
                    "{} texels supplied for a {}x{}x{} volume",
                    data.len(),
                    extent.width,
                    extent.height,
                    extent.depth
                ),
            ));
        }
        self.bind_texture(texture, data, extent, ArrayDimension::D3)
    }

    fn bind_texture<T: Texel>(
        &self,
        texture: &mut TextureBinding<B>,
        data: &[T],
        extent: Extent3,
        dimension: ArrayDimension,
    ) -> Result<(), DeviceError> {
        if texture.is_bound() {
            self.unbind_texture(texture)?;
        }

        let mut array = self.allocate_array(T::FORMAT, extent, dimension)?;
        let pitch = extent.width * size_of::<T>();
        let src = PitchedHost {
            data: bytemuck::cast_slice(data),
            pitch,
            width: extent.width,
            height: extent.height,
        };
        self.guarded(Primitive::MemcpyToArray, |b| {
            b.memcpy_to_array(array.id_or_invalid()?, src, extent)
        })?;

        let axes = match dimension {
            ArrayDimension::D1 => 1,
            ArrayDimension::D3 => 3,
        };
        let params = texture.params(axes);
        self.guarded(Primitive::BindTexture, |b| {
            b.bind_texture_to_array(texture.name(), &params, array.id_or_invalid()?)
        })?;
        array.bound = true;
        log::debug!(
            "bound {}x{}x{} {:?} array to texture '{}'",
            extent.width,
            extent.height,
            extent.depth,
            T::FORMAT,
            texture.name()
        );
        texture.array = Some(array);
        Ok(())
    }

    fn allocate_array(
        &self,
        format: ChannelFormat,
        extent: Extent3,
        dimension: ArrayDimension,
    ) -> Result<DeviceArray<B>, DeviceError> {
        let id = self.issue(Primitive::MallocArray, |b| {
            b.malloc_array(format, extent, dimension)
        })?;
        let array = DeviceArray {
            device: self.clone(),
            id: Some(id),
            format,
            extent,
            dimension,
            bound: false,
        };
        self.synchronize()?;
        Ok(array)
    }
}

/// Exclusively owned linear device allocation of `T` elements.
///
/// Released on drop. A freed buffer is reset to the null address, so a
/// second free is a no-op.
pub struct DeviceBuffer<B: DeviceBackend, T: Pod> {
    device: Device<B>,
    ptr: DevicePtr,
    len: usize,
    _marker: PhantomData<T>,
}

impl<B: DeviceBackend, T: Pod> DeviceBuffer<B, T> {
    /// A null buffer that owns nothing.
    pub fn null(device: &Device<B>) -> Self {
        Self::from_raw(device.clone(), DevicePtr::NULL, 0)
    }

    fn from_raw(device: Device<B>, ptr: DevicePtr, len: usize) -> Self {
        Self {
            device,
            ptr,
            len,
            _marker: PhantomData,
        }
    }

    /// Device address of the first element, or null.
    pub fn ptr(&self) -> DevicePtr {
        self.ptr
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the buffer holds no elements.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns `true` if the buffer owns no allocation.
    pub fn is_null(&self) -> bool {
        self.ptr.is_null()
    }

    /// Size in bytes.
    pub fn size_bytes(&self) -> usize {
        self.len * size_of::<T>()
    }

    /// Release the allocation and reset to null. No-op when already null.
    ///
    /// # Errors
    ///
    /// Fails if the backend rejects the free; the handle is left untouched.
    pub fn free(&mut self) -> Result<(), DeviceError> {
        if self.ptr.is_null() {
            return Ok(());
        }
        let ptr = self.ptr;
        self.device.guarded(Primitive::Free, |b| b.free(ptr))?;
        self.ptr = DevicePtr::NULL;
        self.len = 0;
        Ok(())
    }
}

impl<B: DeviceBackend, T: Pod> fmt::Debug for DeviceBuffer<B, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("ptr", &self.ptr)
            .field("len", &self.len)
            .finish()
    }
}

impl<B: DeviceBackend, T: Pod> Drop for DeviceBuffer<B, T> {
    fn drop(&mut self) {
        if self.ptr.is_null() {
            return;
        }
        if self.device.backend.try_borrow_mut().is_err() {
            log::error!("device buffer {} dropped while the device was busy", self.ptr);
            return;
        }
        if let Err(e) = self.free() {
            log::error!("failed to release device buffer: {e}");
        }
    }
}

/// Exclusively owned device array backing a texture binding.
///
/// Released on drop; a released array is a no-op to free again.
pub struct DeviceArray<B: DeviceBackend> {
    device: Device<B>,
    id: Option<ArrayId>,
    format: ChannelFormat,
    extent: Extent3,
    dimension: ArrayDimension,
    bound: bool,
}

impl<B: DeviceBackend> DeviceArray<B> {
    /// Backend identifier, or `None` once released.
    pub fn id(&self) -> Option<ArrayId> {
        self.id
    }

    /// Texel format.
    pub fn format(&self) -> ChannelFormat {
        self.format
    }

    /// Per-axis texel counts.
    pub fn extent(&self) -> Extent3 {
        self.extent
    }

    /// 1D or 3D.
    pub fn dimension(&self) -> ArrayDimension {
        self.dimension
    }

    /// Returns `true` once the array has been bound to a texture.
    pub fn is_bound(&self) -> bool {
        self.bound
    }

    fn id_or_invalid(&self) -> BackendResult<ArrayId> {
        self.id.ok_or_else(|| {
            BackendError::from_kind(BackendErrorKind::InvalidResourceHandle)
        })
    }

    /// Release the array. No-op when already released.
    ///
    /// # Errors
    ///
    /// Fails if the backend rejects the free.
    pub fn free(&mut self) -> Result<(), DeviceError> {
        let Some(id) = self.id else {
            return Ok(());
        };
        self.device.guarded(Primitive::FreeArray, |b| b.free_array(id))?;
        self.id = None;
        self.bound = false;
        Ok(())
    }
}

impl<B: DeviceBackend> fmt::Debug for DeviceArray<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceArray")
            .field("id", &self.id)
            .field("format", &self.format)
            .field("extent", &self.extent)
            .finish()
    }
}

impl<B: DeviceBackend> Drop for DeviceArray<B> {
    fn drop(&mut self) {
        if self.id.is_none() {
            return;
        }
        if self.device.backend.try_borrow_mut().is_err() {
            log::error!("device array dropped while the device was busy");
            return;
        }
        if let Err(e) = self.free() {
            log::error!("failed to release device array: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::backend::HostBackend;
    use crate::gpu::texture::{AddressMode, FilterMode};

    fn device() -> Device<HostBackend> {
        Device::new(HostBackend::new())
    }

    #[test]
    fn every_operation_is_sandwiched_by_barriers() {
        let device = device();
        let before = device.with_backend(|b| b.synchronize_count());
        let buffer = device.allocate::<u32>(4).unwrap();
        device.copy_host_to_device(&[1, 2, 3, 4], &buffer).unwrap();
        let after = device.with_backend(|b| b.synchronize_count());
        assert_eq!(after - before, 4);

        device.declare_symbol::<u32>("sandwiched", 1).unwrap();
        let before = device.with_backend(|b| b.synchronize_count());
        let _ = device.symbol_address("sandwiched").unwrap();
        let after = device.with_backend(|b| b.synchronize_count());
        assert_eq!(after - before, 2);
    }

    #[test]
    #[should_panic]
    fn nested_backend_access_panics() {
        let device = device();
        let inner = device.clone();
        device.with_backend(|_| {
            let _ = inner.synchronize();
        });
    }

    #[test]
    fn round_trip_through_device_memory() {
        let device = device();
        let a = device.allocate::<f32>(3).unwrap();
        let b = device.allocate::<f32>(3).unwrap();
        device.copy_host_to_device(&[1.5, -2.0, 8.25], &a).unwrap();
        device.copy_device_to_device(&a, &b, 3).unwrap();
        let mut out = [0.0f32; 3];
        device.copy_device_to_host(&b, &mut out).unwrap();
        assert_eq!(out, [1.5, -2.0, 8.25]);
    }

    #[test]
    fn memset_fills_bytes() {
        let device = device();
        let buffer = device.allocate::<u16>(2).unwrap();
        device.memset(&buffer, 0xff, 2).unwrap();
        let mut out = [0u16; 2];
        device.copy_device_to_host(&buffer, &mut out).unwrap();
        assert_eq!(out, [u16::MAX; 2]);
    }

    #[test]
    fn pitched_allocation_reports_pitch() {
        let device = device();
        let (buffer, pitch) = device.allocate_pitched::<f32>(10, 4).unwrap();
        assert!(pitch >= 40);
        assert_eq!(buffer.size_bytes(), pitch * 4);
    }

    #[test]
    fn freeing_a_null_buffer_twice_is_a_no_op() {
        let device = device();
        let mut buffer = DeviceBuffer::<HostBackend, u8>::null(&device);
        device.free(&mut buffer).unwrap();
        assert!(buffer.is_null());
        device.free(&mut buffer).unwrap();
        assert!(buffer.is_null());
    }

    #[test]
    fn freed_buffer_resets_to_null() {
        let device = device();
        let mut buffer = device.allocate::<u8>(16).unwrap();
        buffer.free().unwrap();
        assert!(buffer.is_null());
        buffer.free().unwrap();
        assert_eq!(device.with_backend(|b| b.live_allocations()), 0);
    }

    #[test]
    fn dropping_a_buffer_releases_it() {
        let device = device();
        {
            let _buffer = device.allocate::<u64>(8).unwrap();
            assert_eq!(device.with_backend(|b| b.live_allocations()), 1);
        }
        assert_eq!(device.with_backend(|b| b.live_allocations()), 0);
    }

    #[test]
    fn failure_carries_title_and_backend_message() {
        let device = device();
        device.with_backend(|b| {
            b.fail_next(Primitive::Malloc, BackendErrorKind::MemoryAllocation);
        });
        let err = device.allocate::<u8>(4).unwrap_err();
        assert_eq!(err.title, "malloc");
        assert_eq!(err.kind, BackendErrorKind::MemoryAllocation);
        assert_eq!(err.to_string(), "out of memory (malloc)");
    }

    #[test]
    fn asynchronous_fault_is_reported_before_the_next_operation() {
        let device = device();
        device.with_backend(|b| {
            b.raise_async_error(BackendErrorKind::LaunchFailure, "kernel fault");
        });
        let err = device.allocate::<u8>(4).unwrap_err();
        assert_eq!(err.title, "synchronize");
        assert_eq!(err.kind, BackendErrorKind::LaunchFailure);
        assert_eq!(device.with_backend(|b| b.live_allocations()), 0);
    }

    #[test]
    fn failing_trailing_barrier_does_not_leak_the_allocation() {
        let device = device();
        device.with_backend(|b| {
            b.fail_nth(Primitive::Synchronize, 1, BackendErrorKind::Unknown);
        });
        let err = device.allocate::<u8>(4).unwrap_err();
        assert_eq!(err.title, "synchronize");
        assert_eq!(device.with_backend(|b| b.live_allocations()), 0);
    }

    #[test]
    fn symbols_receive_host_and_device_values() {
        let device = device();
        device.declare_symbol::<u32>("params", 2).unwrap();
        device.copy_host_to_symbol(&[7u32, 9], "params").unwrap();
        assert_eq!(
            device.with_backend(|b| b.symbol_bytes("params").unwrap().to_vec()),
            bytemuck::cast_slice::<u32, u8>(&[7, 9]).to_vec()
        );

        let buffer = device.allocate::<u32>(2).unwrap();
        device.copy_host_to_device(&[3, 4], &buffer).unwrap();
        device.copy_device_to_symbol(&buffer, "params", 2).unwrap();
        let address = device.symbol_address("params").unwrap();
        assert!(!address.is_null());
        assert_eq!(
            device.with_backend(|b| b.symbol_bytes("params").unwrap().to_vec()),
            bytemuck::cast_slice::<u32, u8>(&[3, 4]).to_vec()
        );
    }

    #[test]
    fn binding_a_3d_texture_uploads_and_sets_sampling_state() {
        let device = device();
        let mut texture = TextureBinding::new("volume")
            .with_filter(FilterMode::Nearest)
            .with_address_mode(AddressMode::Wrap);
        let data: Vec<i16> = (0..24).collect();
        device
            .bind_texture_3d(&mut texture, Extent3::new(2, 3, 4), &data)
            .unwrap();

        let id = texture.array().unwrap().id().unwrap();
        device.with_backend(|b| {
            let bound = b.texture("volume").unwrap();
            assert_eq!(bound.array, id);
            assert_eq!(bound.params.filter, FilterMode::Nearest);
            assert_eq!(bound.params.address, [AddressMode::Wrap; 3]);
            assert!(bound.params.normalized);
            let array = b.array(id).unwrap();
            assert_eq!(array.format, ChannelFormat::I16);
            assert_eq!(array.data, bytemuck::cast_slice::<i16, u8>(&data));
        });
    }

    #[test]
    fn rebinding_frees_the_previous_array() {
        let device = device();
        let mut texture = TextureBinding::new("lut");
        device.bind_texture_1d(&mut texture, &[0.0f32, 0.5, 1.0]).unwrap();
        let first = texture.array().unwrap().id().unwrap();
        device.bind_texture_1d(&mut texture, &[1.0f32; 8]).unwrap();
        let second = texture.array().unwrap().id().unwrap();

        assert_ne!(first, second);
        device.with_backend(|b| {
            assert!(b.array(first).is_none());
            assert_eq!(b.live_arrays(), 1);
            assert_eq!(b.texture("lut").unwrap().array, second);
            assert_eq!(b.array(second).unwrap().extent, Extent3::linear(8));
        });
    }

    #[test]
    fn zero_extent_volume_binds_without_error() {
        let device = device();
        let mut texture = TextureBinding::new("empty");
        device
            .bind_texture_3d::<i16>(&mut texture, Extent3::new(0, 0, 0), &[])
            .unwrap();
        assert!(texture.is_bound());
    }

    #[test]
    fn mismatched_volume_is_rejected_before_touching_the_device() {
        let device = device();
        let mut texture = TextureBinding::new("volume");
        let err = device
            .bind_texture_3d(&mut texture, Extent3::new(2, 2, 2), &[0i16; 7])
            .unwrap_err();
        assert_eq!(err.kind, BackendErrorKind::InvalidValue);
        assert_eq!(device.with_backend(|b| b.live_arrays()), 0);
    }

    #[test]
    fn failed_bind_releases_the_new_array() {
        let device = device();
        let mut texture = TextureBinding::new("volume");
        device.with_backend(|b| {
            b.fail_next(Primitive::BindTexture, BackendErrorKind::Unknown);
        });
        let err = device
            .bind_texture_3d(&mut texture, Extent3::new(1, 1, 2), &[1i16, 2])
            .unwrap_err();
        assert_eq!(err.title, "bind texture to array");
        assert!(!texture.is_bound());
        assert_eq!(device.with_backend(|b| b.live_arrays()), 0);
    }

    #[test]
    fn unbinding_releases_the_array() {
        let device = device();
        let mut texture = TextureBinding::new("lut");
        device.bind_texture_1d(&mut texture, &[1u8, 2, 3]).unwrap();
        device.unbind_texture(&mut texture).unwrap();
        assert!(!texture.is_bound());
        device.with_backend(|b| {
            assert!(b.texture("lut").is_none());
            assert_eq!(b.live_arrays(), 0);
        });
    }
}
