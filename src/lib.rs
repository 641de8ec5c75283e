// -- Lint policy ---------------------------------------------------------
// This is the single source of truth for crate-wide lints.

// Broad lint groups
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![deny(clippy::nursery)]
// Documentation
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(rustdoc::private_intra_doc_links)]
#![deny(rustdoc::bare_urls)]
// No panicking in library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]
// No debug/print artifacts
#![deny(clippy::dbg_macro)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]
// Import hygiene
#![deny(clippy::wildcard_imports)]
// Complexity limits (thresholds in clippy.toml)
#![deny(clippy::cognitive_complexity)]
#![deny(clippy::too_many_lines)]
#![deny(clippy::excessive_nesting)]
// Function signature hygiene
#![deny(clippy::too_many_arguments)]
#![deny(clippy::fn_params_excessive_bools)]
// Clone / pass-by-value hygiene
#![deny(clippy::needless_pass_by_value)]
#![deny(clippy::implicit_clone)]
// String hygiene
#![deny(clippy::inefficient_to_string)]
#![deny(clippy::redundant_closure_for_method_calls)]
#![deny(clippy::manual_string_new)]
#![deny(clippy::str_to_string)]
// Cargo lints (warn, not deny since cargo lints can be noisy)
#![warn(clippy::cargo)]
// Unused / redundant code
#![deny(unused_results)]
#![deny(unused_qualifications)]
// Cast hygiene
#![deny(trivial_casts)]
#![deny(trivial_numeric_casts)]

//! Device-side plumbing for GPU volume ray casting.
//!
//! Voxray binds an imported voxel volume to the device as 3D textures,
//! publishes its metadata for kernels, mirrors handle-addressed resources
//! such as transfer-function nodes into dense device arrays, and times
//! kernel launches.
//!
//! # Key entry points
//!
//! - [`gpu::device::Device`] - synchronized device primitives with titled
//!   errors
//! - [`gpu::resource_table::ResourceTable`] - sparse host table mirrored to
//!   a device symbol
//! - [`volume::VolumeBinding`] - one-shot volume upload and metadata
//! - [`options::Options`] - volume properties and transfer-function presets
//!
//! # Backends
//!
//! [`gpu::backend::WgpuBackend`] runs on any wgpu adapter;
//! [`gpu::backend::HostBackend`] emulates the same primitives in host
//! memory and is what the tests run against.

pub mod error;
pub mod gpu;
pub mod options;
pub mod volume;

pub use error::VoxrayError;
pub use gpu::device::{Device, DeviceError};
