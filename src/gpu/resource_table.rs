//! Bounded, handle-indexed tables of device-resident records.
//!
//! The host side owns every entry. Each mutation rebuilds the dense device
//! array from scratch and republishes its address into the table's device
//! symbol, so kernels never observe a half-updated table.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Index;

use bytemuck::Pod;
use rustc_hash::FxHashMap;

use crate::gpu::backend::DeviceBackend;
use crate::gpu::device::{Device, DeviceBuffer, DeviceError};

/// Default maximum number of live entries in a table.
pub const DEFAULT_CAPACITY: usize = 256;

/// A record that can live in a device resource table.
pub trait DeviceResource: Pod {
    /// Host-side representation the record is converted from.
    type Host;

    /// Convert the host representation into the device layout.
    fn from_host(host: &Self::Host) -> Self;
}

/// Stable identifier of a table entry.
///
/// Handles are assigned from a counter that only ever grows, so a removed
/// handle is retired rather than reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Handle(pub i32);

impl Handle {
    /// Requests a new handle when passed to [`ResourceTable::bind`].
    pub const NONE: Self = Self(-1);

    /// Returns `true` for non-negative handles.
    pub const fn is_valid(self) -> bool {
        self.0 >= 0
    }
}

impl Default for Handle {
    fn default() -> Self {
        Self::NONE
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Errors raised by resource table operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableError {
    /// A new entry was requested while the table was full.
    CapacityExceeded {
        /// Symbol of the full table.
        symbol: String,
        /// Maximum number of entries.
        capacity: usize,
    },
    /// No entry exists for the handle.
    NotFound(Handle),
    /// The handle counter cannot grow any further.
    HandlesExhausted,
    /// Rebuilding the device array failed.
    Device(DeviceError),
}

impl fmt::Display for TableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CapacityExceeded { symbol, capacity } => write!(
                f,
                "resource table '{symbol}' is full ({capacity} entries)"
            ),
            Self::NotFound(handle) => write!(f, "resource {handle} does not exist"),
            Self::HandlesExhausted => write!(f, "resource handles exhausted"),
            Self::Device(e) => write!(f, "resource table synchronize failed: {e}"),
        }
    }
}

impl std::error::Error for TableError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Device(e) => Some(e),
            _ => None,
        }
    }
}

impl From<DeviceError> for TableError {
    fn from(e: DeviceError) -> Self {
        Self::Device(e)
    }
}

/// Host-owned table of at most `CAPACITY` records mirrored into a dense
/// device array whose address is published in a device symbol.
pub struct ResourceTable<B, T, const CAPACITY: usize = DEFAULT_CAPACITY>
where
    B: DeviceBackend,
    T: DeviceResource,
{
    device: Device<B>,
    symbol: String,
    entries: BTreeMap<Handle, T>,
    /// Handle to dense position, valid as of the last synchronize.
    remap: FxHashMap<Handle, usize>,
    counter: i32,
    buffer: DeviceBuffer<B, T>,
}

impl<B, T, const CAPACITY: usize> ResourceTable<B, T, CAPACITY>
where
    B: DeviceBackend,
    T: DeviceResource,
{
    /// An empty table publishing into `symbol`. The symbol is declared to
    /// hold one device address.
    ///
    /// # Errors
    ///
    /// Fails if the symbol cannot be declared.
    pub fn new(device: &Device<B>, symbol: impl Into<String>) -> Result<Self, DeviceError> {
        let symbol = symbol.into();
        device.declare_symbol::<u64>(&symbol, 1)?;
        Ok(Self {
            device: device.clone(),
            symbol,
            entries: BTreeMap::new(),
            remap: FxHashMap::default(),
            counter: 0,
            buffer: DeviceBuffer::null(device),
        })
    }

    /// Returns `true` if `handle` names a live entry. Negative handles never
    /// do.
    pub fn exists(&self, handle: Handle) -> bool {
        handle.is_valid() && self.entries.contains_key(&handle)
    }

    /// Insert or overwrite an entry, then synchronize.
    ///
    /// An existing `handle` is overwritten in place. Anything else gets the
    /// next handle from the counter. The returned handle identifies the
    /// entry.
    ///
    /// # Errors
    ///
    /// [`TableError::CapacityExceeded`] if a new entry is requested on a
    /// full table, which is left unchanged. Synchronize failures are passed
    /// through; the host entry is kept in that case.
    pub fn bind(&mut self, resource: &T::Host, handle: Handle) -> Result<Handle, TableError> {
        let record = T::from_host(resource);
        let handle = if let Some(entry) = self.entries.get_mut(&handle) {
            *entry = record;
            handle
        } else {
            if self.entries.len() >= CAPACITY {
                return Err(TableError::CapacityExceeded {
                    symbol: self.symbol.clone(),
                    capacity: CAPACITY,
                });
            }
            let handle = Handle(self.counter);
            self.counter = self
                .counter
                .checked_add(1)
                .ok_or(TableError::HandlesExhausted)?;
            let _ = self.entries.insert(handle, record);
            handle
        };
        self.synchronize()?;
        Ok(handle)
    }

    /// Remove an entry, then synchronize. Absent handles are ignored.
    ///
    /// # Errors
    ///
    /// Passes through synchronize failures.
    pub fn unbind(&mut self, handle: Handle) -> Result<(), TableError> {
        if !self.exists(handle) {
            return Ok(());
        }
        let _ = self.entries.remove(&handle);
        let _ = self.remap.remove(&handle);
        self.synchronize()
    }

    /// Rebuild the dense device array from every live entry in handle order
    /// and publish its address.
    ///
    /// An empty table leaves device memory untouched.
    ///
    /// # Errors
    ///
    /// Fails if any device step fails. The previous array is already freed
    /// by then, so the published address must be treated as stale.
    pub fn synchronize(&mut self) -> Result<(), TableError> {
        self.remap.clear();
        if self.entries.is_empty() {
            return Ok(());
        }

        let mut dense = Vec::with_capacity(self.entries.len());
        for (position, (handle, record)) in self.entries.iter().enumerate() {
            dense.push(*record);
            let _ = self.remap.insert(*handle, position);
        }

        self.buffer.free()?;
        self.buffer = self.device.allocate::<T>(dense.len())?;
        self.device.copy_host_to_device(&dense, &self.buffer)?;
        self.device
            .copy_host_to_symbol(&[self.buffer.ptr().0], &self.symbol)?;

        log::debug!(
            "resource table '{}' synchronized with {} entries at {}",
            self.symbol,
            dense.len(),
            self.buffer.ptr()
        );
        Ok(())
    }

    /// The entry for `handle`.
    ///
    /// # Errors
    ///
    /// [`TableError::NotFound`] if there is none.
    pub fn get(&self, handle: Handle) -> Result<&T, TableError> {
        self.entries.get(&handle).ok_or(TableError::NotFound(handle))
    }

    /// Position of `handle` in the device array as of the last synchronize.
    pub fn dense_position(&self, handle: Handle) -> Option<usize> {
        self.remap.get(&handle).copied()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if there are no live entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of live entries.
    pub const fn capacity(&self) -> usize {
        CAPACITY
    }

    /// Symbol the device array address is published into.
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// The current dense device array.
    pub fn device_buffer(&self) -> &DeviceBuffer<B, T> {
        &self.buffer
    }

    /// Live entries in handle order.
    pub fn iter(&self) -> impl Iterator<Item = (Handle, &T)> {
        self.entries.iter().map(|(handle, record)| (*handle, record))
    }
}

impl<B, T, const CAPACITY: usize> Index<Handle> for ResourceTable<B, T, CAPACITY>
where
    B: DeviceBackend,
    T: DeviceResource,
{
    type Output = T;

    /// # Panics
    ///
    /// Panics if `handle` has no entry. Callers check [`ResourceTable::exists`]
    /// first; use [`ResourceTable::get`] otherwise.
    #[allow(clippy::panic)]
    fn index(&self, handle: Handle) -> &T {
        match self.entries.get(&handle) {
            Some(record) => record,
            None => panic!("resource {handle} does not exist"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::backend::{BackendErrorKind, HostBackend, Primitive};

    #[repr(C)]
    #[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
    struct Light {
        power: f32,
        radius: f32,
    }

    impl DeviceResource for Light {
        type Host = (f32, f32);

        fn from_host(host: &Self::Host) -> Self {
            Self {
                power: host.0,
                radius: host.1,
            }
        }
    }

    type Table = ResourceTable<HostBackend, Light>;
    type SmallTable = ResourceTable<HostBackend, Light, 4>;

    fn device() -> Device<HostBackend> {
        Device::new(HostBackend::new())
    }

    fn published(table: &SmallTable) -> Vec<Light> {
        table.device.with_backend(|b| {
            let ptr = b.symbol_pointer(table.symbol()).unwrap();
            let mut bytes = vec![0u8; table.len() * size_of::<Light>()];
            b.memcpy_device_to_host(&mut bytes, ptr).unwrap();
            bytemuck::pod_collect_to_vec(&bytes)
        })
    }

    #[test]
    fn never_inserted_handles_do_not_exist() {
        let device = device();
        let table = Table::new(&device, "lights").unwrap();
        for id in [-5, -1, 0, 1, 200] {
            assert!(!table.exists(Handle(id)));
        }
    }

    #[test]
    fn bound_entries_are_readable() {
        let device = device();
        let mut table = Table::new(&device, "lights").unwrap();
        let handle = table.bind(&(2.0, 0.5), Handle::NONE).unwrap();
        assert_eq!(handle, Handle(0));
        assert!(table.exists(handle));
        assert_eq!(table[handle], Light { power: 2.0, radius: 0.5 });
    }

    #[test]
    fn existing_handle_is_overwritten_in_place() {
        let device = device();
        let mut table = Table::new(&device, "lights").unwrap();
        let handle = table.bind(&(1.0, 1.0), Handle::NONE).unwrap();
        let again = table.bind(&(3.0, 1.0), handle).unwrap();
        assert_eq!(again, handle);
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(handle).unwrap().power, 3.0);
    }

    #[test]
    fn unknown_non_negative_handle_gets_a_fresh_one() {
        let device = device();
        let mut table = Table::new(&device, "lights").unwrap();
        let handle = table.bind(&(1.0, 1.0), Handle(42)).unwrap();
        assert_eq!(handle, Handle(0));
        assert!(!table.exists(Handle(42)));
    }

    #[test]
    fn full_table_rejects_new_entries_unchanged() {
        let device = device();
        let mut table = SmallTable::new(&device, "lights").unwrap();
        for i in 0..4 {
            let _ = table.bind(&(i as f32, 0.0), Handle::NONE).unwrap();
        }
        let err = table.bind(&(9.0, 0.0), Handle::NONE).unwrap_err();
        assert!(matches!(err, TableError::CapacityExceeded { capacity: 4, .. }));
        assert_eq!(table.len(), 4);
        assert!(!table.exists(Handle(4)));

        let overwrite = table.bind(&(7.0, 0.0), Handle(2));
        assert_eq!(overwrite.unwrap(), Handle(2));
    }

    #[test]
    fn unbind_removes_and_ignores_absent_handles() {
        let device = device();
        let mut table = Table::new(&device, "lights").unwrap();
        let handle = table.bind(&(1.0, 2.0), Handle::NONE).unwrap();
        let snapshot = |table: &Table| {
            device.with_backend(|b| {
                (
                    b.synchronize_count(),
                    b.symbol_pointer(table.symbol()),
                    table.device_buffer().ptr(),
                )
            })
        };
        let before = snapshot(&table);
        table.unbind(Handle(17)).unwrap();
        assert_eq!(snapshot(&table), before);
        assert_eq!(table.len(), 1);
        table.unbind(handle).unwrap();
        assert!(!table.exists(handle));
        assert!(table.dense_position(handle).is_none());
    }

    #[test]
    fn removed_handles_are_never_reused() {
        let device = device();
        let mut table = Table::new(&device, "lights").unwrap();
        let first = table.bind(&(1.0, 0.0), Handle::NONE).unwrap();
        table.unbind(first).unwrap();
        let second = table.bind(&(2.0, 0.0), Handle::NONE).unwrap();
        assert_ne!(first, second);
        assert_eq!(second, Handle(1));
    }

    #[test]
    fn synchronize_publishes_a_dense_permuted_array() {
        let device = device();
        let mut table = SmallTable::new(&device, "lights").unwrap();
        let handles: Vec<_> = (0..4)
            .map(|i| table.bind(&(i as f32, 0.0), Handle::NONE).unwrap())
            .collect();
        table.unbind(handles[1]).unwrap();

        assert_eq!(table.device_buffer().len(), table.len());
        let mut positions: Vec<_> = table
            .iter()
            .map(|(handle, _)| table.dense_position(handle).unwrap())
            .collect();
        positions.sort_unstable();
        assert_eq!(positions, vec![0, 1, 2]);

        let dense = published(&table);
        for (handle, record) in table.iter() {
            assert_eq!(dense[table.dense_position(handle).unwrap()], *record);
        }
    }

    #[test]
    fn symbol_holds_the_current_buffer_address() {
        let device = device();
        let mut table = Table::new(&device, "lights").unwrap();
        let _ = table.bind(&(1.0, 1.0), Handle::NONE).unwrap();
        let _ = table.bind(&(2.0, 1.0), Handle::NONE).unwrap();
        let ptr = device.with_backend(|b| b.symbol_pointer("lights").unwrap());
        assert_eq!(ptr, table.device_buffer().ptr());
        assert_eq!(device.with_backend(|b| b.live_allocations()), 1);
    }

    #[test]
    fn emptied_table_keeps_the_last_array() {
        let device = device();
        let mut table = Table::new(&device, "lights").unwrap();
        let handle = table.bind(&(1.0, 1.0), Handle::NONE).unwrap();
        table.unbind(handle).unwrap();
        assert!(table.is_empty());
        assert!(!table.device_buffer().is_null());
    }

    #[test]
    fn dropping_the_table_releases_its_array() {
        let device = device();
        {
            let mut table = Table::new(&device, "lights").unwrap();
            let _ = table.bind(&(1.0, 1.0), Handle::NONE).unwrap();
        }
        assert_eq!(device.with_backend(|b| b.live_allocations()), 0);
    }

    #[test]
    fn device_failure_keeps_the_host_entry() {
        let device = device();
        let mut table = Table::new(&device, "lights").unwrap();
        device.with_backend(|b| {
            b.fail_next(Primitive::MemcpyHostToSymbol, BackendErrorKind::InvalidSymbol);
        });
        let err = table.bind(&(1.0, 1.0), Handle::NONE).unwrap_err();
        let e = match err {
            TableError::Device(e) => e,
            other => panic!("expected a device error, got {other:?}"),
        };
        assert_eq!(e.kind, BackendErrorKind::InvalidSymbol);
        assert!(table.exists(Handle(0)));
    }

    #[test]
    fn get_reports_missing_handles() {
        let device = device();
        let table = Table::new(&device, "lights").unwrap();
        assert_eq!(table.get(Handle(3)), Err(TableError::NotFound(Handle(3))));
    }

    #[test]
    #[should_panic(expected = "does not exist")]
    fn indexing_a_missing_handle_panics() {
        let device = device();
        let table = Table::new(&device, "lights").unwrap();
        let _light: Light = table[Handle(0)];
    }
}
