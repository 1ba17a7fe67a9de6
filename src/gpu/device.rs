// gpu/device.rs — the wgpu context every gpu/ module runs against.
//
// One `GpuDevice` per process: a Vulkan instance, the adapter picked from it,
// and the device/queue pair requested with the limits of a `DeviceProfile`.
// It is also the crate's `ComputeBackend` (see gpu/mod.rs).
//
// PICKING AN ADAPTER
// ───────────────────
// Adapters are enumerated explicitly rather than through `request_adapter`,
// whose power-preference heuristic happily returns a software rasterizer
// (llvmpipe) when one is listed next to a real GPU. Each adapter is ranked
// by device type and the best one wins:
//
//   DiscreteGpu > IntegratedGpu > VirtualGpu / Other > Cpu
//
// Non-conformant adapters (dzn on WSL2) are enumerated too, so they can beat
// the software fallback.
//
// PROFILES
// ─────────
// `RaspberryPi` requests the V3DV driver's limits even on a bigger GPU.
// wgpu then rejects anything the Pi could not run (too many invocations per
// workgroup, oversized textures) while developing on a laptop. A V3D adapter
// switches to that profile on its own.
//
// ERROR SCOPES
// ─────────────
// wgpu reports validation and out-of-memory errors asynchronously through an
// uncaptured-error handler that panics by default. Every device call that can
// fail runs inside `scoped`, which pushes both scopes, pops them and turns
// the first error into a `DeviceError`.
//
// NEW RUST CONCEPTS:
// - `pollster::block_on` — drives a future to completion on this thread.
//   Adapter, device and error-scope APIs are async for the web backend;
//   natively they resolve immediately or after a driver round trip.
// - Field drop order — struct fields drop top to bottom, so the instance is
//   declared last and outlives the device created from it.

use std::fmt;

use thiserror::Error;
use tracing::info;

use crate::error::{DeviceError, DeviceErrorKind};

/// Device limits to request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceProfile {
    /// wgpu's default limits.
    #[default]
    Native,
    /// Limits of a Raspberry Pi 4/5 (VideoCore VI/VII through V3DV).
    RaspberryPi,
}

impl DeviceProfile {
    pub fn limits(self) -> wgpu::Limits {
        let defaults = wgpu::Limits::default();
        match self {
            DeviceProfile::Native => defaults,
            DeviceProfile::RaspberryPi => wgpu::Limits {
                max_compute_invocations_per_workgroup: 256,
                max_compute_workgroup_size_x: 256,
                max_compute_workgroup_size_y: 256,
                max_compute_workgroup_size_z: 64,
                max_texture_dimension_1d: 4096,
                max_texture_dimension_2d: 4096,
                // Shared 4 GiB of system memory.
                max_storage_buffer_binding_size: 128 << 20,
                ..defaults
            },
        }
    }
}

impl fmt::Display for DeviceProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DeviceProfile::Native => "native",
            DeviceProfile::RaspberryPi => "raspberry-pi",
        })
    }
}

/// Preference of an adapter type; higher wins.
fn adapter_rank(device_type: wgpu::DeviceType) -> u8 {
    match device_type {
        wgpu::DeviceType::DiscreteGpu => 3,
        wgpu::DeviceType::IntegratedGpu => 2,
        wgpu::DeviceType::VirtualGpu | wgpu::DeviceType::Other => 1,
        wgpu::DeviceType::Cpu => 0,
    }
}

/// Index of the best-ranked adapter; ties go to the first listed.
fn pick_adapter(types: &[wgpu::DeviceType]) -> Option<usize> {
    types
        .iter()
        .enumerate()
        .max_by_key(|&(i, &t)| (adapter_rank(t), std::cmp::Reverse(i)))
        .map(|(i, _)| i)
}

/// Adapter, device, queue and the profile they were requested with.
pub struct GpuDevice {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub profile: DeviceProfile,
    pub adapter: wgpu::AdapterInfo,
    _instance: wgpu::Instance,
}

impl GpuDevice {
    pub fn new() -> Result<Self, GpuInitError> {
        Self::new_with_profile(DeviceProfile::Native)
    }

    pub fn new_with_profile(profile: DeviceProfile) -> Result<Self, GpuInitError> {
        pollster::block_on(Self::open(profile))
    }

    async fn open(requested: DeviceProfile) -> Result<Self, GpuInitError> {
        let mut flags = wgpu::InstanceFlags::ALLOW_UNDERLYING_NONCOMPLIANT_ADAPTER;
        if cfg!(debug_assertions) {
            flags |= wgpu::InstanceFlags::VALIDATION;
        }
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::VULKAN,
            flags,
            ..Default::default()
        });

        let mut adapters = instance.enumerate_adapters(wgpu::Backends::VULKAN);
        let types: Vec<wgpu::DeviceType> = adapters.iter().map(|a| a.get_info().device_type).collect();
        for adapter in &adapters {
            let info = adapter.get_info();
            info!(name = %info.name, device_type = ?info.device_type, driver = %info.driver, "Vulkan adapter");
        }
        let chosen = pick_adapter(&types).ok_or(GpuInitError::NoAdapter)?;
        let adapter = adapters.swap_remove(chosen);
        let adapter_info = adapter.get_info();

        let profile = if requested == DeviceProfile::Native && adapter_info.name.to_ascii_lowercase().contains("v3d") {
            info!(adapter = %adapter_info.name, "V3D adapter, applying raspberry-pi limits");
            DeviceProfile::RaspberryPi
        } else {
            requested
        };

        let (device, queue): (wgpu::Device, wgpu::Queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("plugboard"),
                    required_features: wgpu::Features::empty(),
                    required_limits: profile.limits(),
                    memory_hints: wgpu::MemoryHints::Performance,
                },
                None,
            )
            .await?;

        info!(adapter = %adapter_info.name, backend = ?adapter_info.backend, %profile, "device ready");
        Ok(GpuDevice { device, queue, profile, adapter: adapter_info, _instance: instance })
    }

    /// Largest workgroup (x·y·z invocations) a kernel may declare.
    pub fn max_invocations(&self) -> u32 {
        self.profile.limits().max_compute_invocations_per_workgroup
    }

    /// Run `f` and report anything the device rejected during it as a
    /// `DeviceError` for `operation`.
    pub(crate) fn scoped<T>(&self, operation: &str, f: impl FnOnce() -> T) -> Result<T, DeviceError> {
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = f();
        let validation = pollster::block_on(self.device.pop_error_scope());
        let oom = pollster::block_on(self.device.pop_error_scope());
        match (oom, validation) {
            (Some(e), _) => Err(DeviceError::new(operation, DeviceErrorKind::OutOfMemory, e.to_string())),
            (None, Some(e)) => Err(DeviceError::validation(operation, e.to_string())),
            (None, None) => Ok(value),
        }
    }
}

impl fmt::Display for GpuDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?}, {} profile)", self.adapter.name, self.adapter.device_type, self.profile)
    }
}

/// Failure to open a device.
#[derive(Error, Debug)]
pub enum GpuInitError {
    #[error("no Vulkan adapter found (check that `vulkaninfo` lists a device)")]
    NoAdapter,
    #[error("device request failed: {0}")]
    DeviceRequest(#[from] wgpu::RequestDeviceError),
}

impl From<GpuInitError> for DeviceError {
    fn from(e: GpuInitError) -> Self {
        DeviceError::new("open device", DeviceErrorKind::Other, e.to_string())
    }
}
