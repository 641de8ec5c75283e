//! Headless smoke run of the voxray device layer.
//!
//! Binds a synthetic volume, publishes its metadata, mirrors the transfer
//! function into a device table and times a copy kernel. Runs on the first
//! wgpu adapter available and falls back to host emulation otherwise.
//!
//! Usage: `voxray [preset.toml]`

use std::path::Path;

use bytemuck::Zeroable;
use glam::Vec3;
use voxray::gpu::backend::{DeviceBackend, HostBackend, WgpuBackend};
use voxray::gpu::device::Device;
use voxray::gpu::launch::KernelTimings;
use voxray::gpu::render_context::RenderContext;
use voxray::gpu::resource_table::{Handle, ResourceTable};
use voxray::options::{GpuNode, Options};
use voxray::volume::{VolumeBinding, VoxelVolume};
use voxray::VoxrayError;

const TRANSFER_FUNCTION_SYMBOL: &str = "transfer_function_nodes";
const GRID: usize = 32;

fn main() {
    env_logger::init();

    let options = match std::env::args().nth(1) {
        Some(path) => match Options::load(Path::new(&path)) {
            Ok(options) => options,
            Err(e) => {
                log::error!("failed to load preset '{path}': {e}");
                return;
            }
        },
        None => Options::default(),
    };

    let result = match pollster::block_on(RenderContext::new_headless()) {
        Ok(context) => run(&Device::new(WgpuBackend::new(context)), &options),
        Err(e) => {
            log::warn!("no wgpu device ({e}), using host emulation");
            run(&Device::new(HostBackend::new()), &options)
        }
    };
    if let Err(e) = result {
        log::error!("{e}");
    }
}

fn run<B: DeviceBackend>(device: &Device<B>, options: &Options) -> Result<(), VoxrayError> {
    let volume = sphere_volume()?;
    let mut binding = VolumeBinding::new(device)?;
    let _ = binding.set_input(Some(&volume))?;
    binding.update(Some(&options.volume));
    let _ = binding.publish()?;

    let mut nodes: ResourceTable<B, GpuNode> =
        ResourceTable::new(device, TRANSFER_FUNCTION_SYMBOL)?;
    for record in options.transfer_function.records() {
        let _ = nodes.bind(&record, Handle::NONE)?;
    }
    if nodes.is_empty() {
        log::warn!("transfer function has no nodes, skipping the copy kernel");
        return Ok(());
    }
    log::info!("{} transfer function nodes on device", nodes.len());

    let mut timings = KernelTimings::new();
    let staging = device.allocate::<GpuNode>(nodes.len())?;
    for _ in 0..4 {
        timings.launch(device, "copy nodes", |device| {
            device.copy_device_to_device(nodes.device_buffer(), &staging, nodes.len())
        })??;
    }

    let mut readback = vec![GpuNode::zeroed(); nodes.len()];
    device.copy_device_to_host(&staging, &mut readback)?;
    log::info!(
        "first node opacity {}, last node opacity {}",
        readback.first().map_or(0.0, |n| n.opacity),
        readback.last().map_or(0.0, |n| n.opacity)
    );
    for (title, timing) in timings.by_total() {
        log::info!(
            "{title}: {} launches, {:.3} ms average",
            timing.launches,
            timing.average_ms()
        );
    }
    Ok(())
}

/// A ball of bright voxels in a dark grid.
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn sphere_volume() -> Result<VoxelVolume, VoxrayError> {
    let centre = Vec3::splat((GRID - 1) as f32 * 0.5);
    let radius = GRID as f32 * 0.35;
    let mut intensity = Vec::with_capacity(GRID * GRID * GRID);
    for z in 0..GRID {
        for y in 0..GRID {
            for x in 0..GRID {
                let p = Vec3::new(x as f32, y as f32, z as f32);
                let falloff = (1.0 - p.distance(centre) / radius).clamp(0.0, 1.0);
                intensity.push((falloff * 255.0) as i16);
            }
        }
    }
    VoxelVolume::from_intensity([GRID; 3], Vec3::ZERO, Vec3::ONE, intensity)
}

#[cfg(test)]
mod tests {
    use voxray::gpu::backend::{BackendErrorKind, Primitive};

    use super::*;

    #[test]
    fn default_options_run_on_host_emulation() {
        run(&Device::new(HostBackend::new()), &Options::default()).unwrap();
    }

    #[test]
    fn empty_transfer_function_skips_the_copy_kernel() {
        let device = Device::new(HostBackend::new());
        device.with_backend(|b| {
            b.fail_next(Primitive::MemcpyDeviceToDevice, BackendErrorKind::InvalidValue);
        });
        let mut options = Options::default();
        options.transfer_function.nodes.clear();
        run(&device, &options).unwrap();
    }
}
