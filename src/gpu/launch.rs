//! Kernel launch harness with event-based timing.

use rustc_hash::FxHashMap;

use crate::gpu::backend::{
    BackendError, BackendErrorKind, DeviceBackend, EventId, Primitive,
};
use crate::gpu::device::{Device, DeviceError};

/// Grid and block dimensions of a kernel launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchDimensions {
    /// Threads per block along x, y, z.
    pub block: [u32; 3],
    /// Blocks along x, y, z.
    pub grid: [u32; 3],
}

impl LaunchDimensions {
    /// Enough blocks of `block` threads to cover `extent` on every axis.
    /// Zero block sizes are treated as one.
    #[must_use]
    pub fn new(extent: [u32; 3], block: [u32; 3]) -> Self {
        let block = block.map(|b| b.max(1));
        let grid = [
            extent[0].div_ceil(block[0]),
            extent[1].div_ceil(block[1]),
            extent[2].div_ceil(block[2]),
        ];
        Self { block, grid }
    }

    /// 1D launch over `width` elements.
    #[must_use]
    pub fn linear(width: u32, block_width: u32) -> Self {
        Self::new([width, 1, 1], [block_width, 1, 1])
    }

    /// 2D launch over an image.
    #[must_use]
    pub fn planar(width: u32, height: u32, block: [u32; 2]) -> Self {
        Self::new([width, height, 1], [block[0], block[1], 1])
    }

    /// 3D launch over a volume.
    #[must_use]
    pub fn volumetric(extent: [u32; 3], block: [u32; 3]) -> Self {
        Self::new(extent, block)
    }

    /// Total threads launched, including those past the extent.
    #[must_use]
    pub fn thread_count(&self) -> u64 {
        (0..3)
            .map(|axis| u64::from(self.block[axis]) * u64::from(self.grid[axis]))
            .product()
    }
}

/// Measures device time between two recorded events.
///
/// Events are created by [`KernelTimer::start`] and destroyed once the
/// elapsed time has been read, or when the timer is dropped.
pub struct KernelTimer<B: DeviceBackend> {
    device: Device<B>,
    events: Option<(EventId, EventId)>,
    elapsed: Option<f32>,
}

impl<B: DeviceBackend> KernelTimer<B> {
    /// An idle timer.
    pub fn new(device: &Device<B>) -> Self {
        Self {
            device: device.clone(),
            events: None,
            elapsed: None,
        }
    }

    /// Create the event pair and record the start event. Restarting a
    /// running timer discards the previous measurement.
    ///
    /// # Errors
    ///
    /// Fails if event creation or recording fails.
    pub fn start(&mut self) -> Result<(), DeviceError> {
        self.release();
        self.elapsed = None;
        let start = self
            .device
            .event_op(Primitive::CreateEvent, B::create_event)?;
        let stop = match self.device.event_op(Primitive::CreateEvent, B::create_event) {
            Ok(stop) => stop,
            Err(e) => {
                self.destroy(start);
                return Err(e);
            }
        };
        self.events = Some((start, stop));
        self.device
            .event_op(Primitive::RecordEvent, |b| b.record_event(start))
    }

    /// Record the stop event, wait for it and return the elapsed
    /// milliseconds. The events are destroyed on success and on failure.
    ///
    /// # Errors
    ///
    /// Fails if the timer was never started or an event primitive fails.
    pub fn stop(&mut self) -> Result<f32, DeviceError> {
        let Some((start, stop)) = self.events else {
            return Err(DeviceError::new(
                Primitive::RecordEvent.title(),
                BackendError::new(
                    BackendErrorKind::InvalidResourceHandle,
                    "timer was not started",
                ),
            ));
        };
        let result = self.measure(start, stop);
        self.release();
        let elapsed = result?;
        self.elapsed = Some(elapsed);
        Ok(elapsed)
    }

    /// Milliseconds measured by the last successful [`KernelTimer::stop`].
    pub fn elapsed(&self) -> Option<f32> {
        self.elapsed
    }

    fn measure(&self, start: EventId, stop: EventId) -> Result<f32, DeviceError> {
        self.device
            .event_op(Primitive::RecordEvent, |b| b.record_event(stop))?;
        self.device
            .event_op(Primitive::SynchronizeEvent, |b| b.synchronize_event(stop))?;
        self.device
            .event_op(Primitive::ElapsedTime, |b| b.elapsed_ms(start, stop))
    }

    fn release(&mut self) {
        if let Some((start, stop)) = self.events.take() {
            self.destroy(start);
            self.destroy(stop);
        }
    }

    fn destroy(&self, event: EventId) {
        if let Err(e) = self
            .device
            .event_op(Primitive::DestroyEvent, |b| b.destroy_event(event))
        {
            log::error!("failed to destroy timing event: {e}");
        }
    }
}

impl<B: DeviceBackend> Drop for KernelTimer<B> {
    fn drop(&mut self) {
        self.release();
    }
}

/// Launch a kernel and check for launch and execution failures.
///
/// `kernel` records its work through the device; the latched launch status
/// and a full synchronize are checked right after it returns.
///
/// # Errors
///
/// Returns the launch or execution failure, tagged with `title`.
pub fn launch<B, R>(
    device: &Device<B>,
    title: &'static str,
    kernel: impl FnOnce(&Device<B>) -> R,
) -> Result<R, DeviceError>
where
    B: DeviceBackend,
{
    let output = kernel(device);
    check_launch(device, title)?;
    Ok(output)
}

/// Result of a timed launch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timed<R> {
    /// Whatever the kernel closure returned.
    pub output: R,
    /// Device time in milliseconds.
    pub millis: f32,
}

/// Launch a kernel between a pair of timing events.
///
/// # Errors
///
/// Returns the launch, execution or timing failure. Timing events are
/// released on every path.
pub fn launch_timed<B, R>(
    device: &Device<B>,
    title: &'static str,
    kernel: impl FnOnce(&Device<B>) -> R,
) -> Result<Timed<R>, DeviceError>
where
    B: DeviceBackend,
{
    let mut timer = KernelTimer::new(device);
    timer.start()?;
    let output = kernel(device);
    check_launch(device, title)?;
    let millis = timer.stop()?;
    log::debug!("kernel '{title}' took {millis:.3} ms");
    Ok(Timed { output, millis })
}

fn check_launch<B: DeviceBackend>(
    device: &Device<B>,
    title: &'static str,
) -> Result<(), DeviceError> {
    device.check_last_error(title)?;
    device
        .with_backend(B::synchronize)
        .map_err(|e| DeviceError::new(title, e))
}

/// Accumulated timing of one kernel.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct KernelTiming {
    /// Number of timed launches.
    pub launches: u32,
    /// Most recent launch in milliseconds.
    pub last_ms: f32,
    /// Sum over all launches in milliseconds.
    pub total_ms: f32,
}

impl KernelTiming {
    /// Mean launch time in milliseconds.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn average_ms(&self) -> f32 {
        if self.launches == 0 {
            0.0
        } else {
            self.total_ms / self.launches as f32
        }
    }
}

/// Per-kernel timing log.
#[derive(Debug, Clone, Default)]
pub struct KernelTimings {
    timings: FxHashMap<&'static str, KernelTiming>,
}

impl KernelTimings {
    /// An empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one measurement.
    pub fn record(&mut self, title: &'static str, millis: f32) {
        let timing = self.timings.entry(title).or_default();
        timing.launches += 1;
        timing.last_ms = millis;
        timing.total_ms += millis;
    }

    /// Timed launch whose measurement is added to the log.
    ///
    /// # Errors
    ///
    /// See [`launch_timed`].
    pub fn launch<B, R>(
        &mut self,
        device: &Device<B>,
        title: &'static str,
        kernel: impl FnOnce(&Device<B>) -> R,
    ) -> Result<R, DeviceError>
    where
        B: DeviceBackend,
    {
        let timed = launch_timed(device, title, kernel)?;
        self.record(title, timed.millis);
        Ok(timed.output)
    }

    /// Timing of a kernel, if it was ever launched.
    #[must_use]
    pub fn get(&self, title: &str) -> Option<&KernelTiming> {
        self.timings.get(title)
    }

    /// All kernels, slowest total first.
    #[must_use]
    pub fn by_total(&self) -> Vec<(&'static str, KernelTiming)> {
        let mut all: Vec<_> = self.timings.iter().map(|(k, v)| (*k, *v)).collect();
        all.sort_by(|a, b| b.1.total_ms.total_cmp(&a.1.total_ms));
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::backend::HostBackend;

    fn device() -> Device<HostBackend> {
        Device::new(HostBackend::new())
    }

    #[test]
    fn grid_covers_extent() {
        let dims = LaunchDimensions::volumetric([100, 33, 1], [8, 8, 4]);
        assert_eq!(dims.grid, [13, 5, 1]);
        assert!(dims.thread_count() >= 100 * 33);
    }

    #[test]
    fn zero_block_is_clamped() {
        let dims = LaunchDimensions::linear(10, 0);
        assert_eq!(dims.block, [1, 1, 1]);
        assert_eq!(dims.grid, [10, 1, 1]);
    }

    #[test]
    fn planar_launch_has_single_depth_block() {
        let dims = LaunchDimensions::planar(640, 480, [16, 8]);
        assert_eq!(dims.grid, [40, 60, 1]);
    }

    #[test]
    fn launch_returns_kernel_output() {
        let device = device();
        let value = launch(&device, "noop", |_| 42).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn launch_reports_asynchronous_kernel_fault() {
        let device = device();
        let err = launch(&device, "shade", |d| {
            d.with_backend(|b| {
                b.raise_async_error(BackendErrorKind::LaunchFailure, "bad access");
            });
        })
        .unwrap_err();
        assert_eq!(err.title, "shade");
        assert_eq!(err.message, "bad access");
    }

    #[test]
    fn timed_launch_measures_and_releases_events() {
        let device = device();
        let timed = launch_timed(&device, "integrate", |_| "done").unwrap();
        assert_eq!(timed.output, "done");
        assert!(timed.millis >= 0.0);
        assert_eq!(device.with_backend(|b| b.live_events()), 0);
    }

    #[test]
    fn failed_timed_launch_releases_events() {
        let device = device();
        let result = launch_timed(&device, "integrate", |d| {
            d.with_backend(|b| {
                b.raise_async_error(BackendErrorKind::LaunchFailure, "fault");
            });
        });
        assert!(result.is_err());
        assert_eq!(device.with_backend(|b| b.live_events()), 0);
    }

    #[test]
    fn timer_failure_on_elapsed_still_destroys_events() {
        let device = device();
        let mut timer = KernelTimer::new(&device);
        timer.start().unwrap();
        device.with_backend(|b| {
            b.fail_next(Primitive::ElapsedTime, BackendErrorKind::NotReady);
        });
        assert!(timer.stop().is_err());
        assert!(timer.elapsed().is_none());
        assert_eq!(device.with_backend(|b| b.live_events()), 0);
    }

    #[test]
    fn stopping_an_idle_timer_fails() {
        let device = device();
        let mut timer = KernelTimer::new(&device);
        assert!(timer.stop().is_err());
    }

    #[test]
    fn timings_accumulate_per_kernel() {
        let device = device();
        let mut timings = KernelTimings::new();
        for _ in 0..3 {
            timings.launch(&device, "march", |_| ()).unwrap();
        }
        timings.record("blur", 5.0);
        let march = timings.get("march").unwrap();
        assert_eq!(march.launches, 3);
        assert_eq!(timings.by_total()[0].0, "blur");
        assert_eq!(timings.get("blur").unwrap().average_ms(), 5.0);
    }
}
