//! Device abstraction for compute-driven volume rendering.
//!
//! Every device primitive goes through [`device::Device`], which brackets it
//! with barriers and turns backend failures into titled errors. Two
//! backends implement [`backend::DeviceBackend`]: a wgpu one for real
//! hardware and a host emulation used by tests and headless fallbacks.

/// Backend trait, handle types and the wgpu and host implementations.
pub mod backend;
/// Synchronized device primitives and scoped device allocations.
pub mod device;
/// Kernel launch geometry, checked launches and event timing.
pub mod launch;
/// Headless wgpu adapter, device and queue initialization.
pub mod render_context;
/// Handle-addressed host tables mirrored to dense device arrays.
pub mod resource_table;
/// Texture references and their sampling state.
pub mod texture;
