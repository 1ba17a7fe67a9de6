// gpu/mod.rs — wgpu backend.
//
// `GpuDevice` implements `ComputeBackend`, so the device-independent
// pipeline (manifest → sizes → inference → allocation → binding → run) drives
// Vulkan through wgpu without knowing about it:
//
//   Unit     CompiledUnit   naga-parsed and validated WGSL file
//   Program  GpuProgram     every unit, with a program-wide entry table
//   Kernel   GpuKernel      compute pipeline + reflected params + slots
//   Memory   GpuMemory      texture or storage buffer
//
// A single `wgpu::Queue` executes submissions in order, which is the
// ordering guarantee the stages rely on.

pub mod device;
pub mod kernel;
pub mod memory;
pub mod program;

use crate::backend::{ComputeBackend, KernelParam, MemoryDesc};
use crate::error::DeviceError;
use crate::size::Size3D;

pub use device::{DeviceProfile, GpuDevice, GpuInitError};
pub use kernel::GpuKernel;
pub use memory::GpuMemory;
pub use program::{CompiledUnit, GpuProgram};

impl ComputeBackend for GpuDevice {
    type Unit = CompiledUnit;
    type Program = GpuProgram;
    type Kernel = GpuKernel;
    type Memory = GpuMemory;

    fn compile(&self, unit_name: &str, source: &str) -> Result<CompiledUnit, String> {
        program::compile_wgsl(unit_name, source)
    }

    fn link(&self, units: Vec<CompiledUnit>) -> Result<GpuProgram, String> {
        program::link(self, units)
    }

    fn create_kernel(&self, program: &GpuProgram, name: &str) -> Result<GpuKernel, DeviceError> {
        GpuKernel::create(self, program, name)
    }

    fn kernel_params(&self, kernel: &GpuKernel) -> Result<Vec<KernelParam>, DeviceError> {
        Ok(kernel.params().to_vec())
    }

    fn create_memory(&self, desc: &MemoryDesc, data: Option<&[u8]>) -> Result<GpuMemory, DeviceError> {
        GpuMemory::create(self, desc, data)
    }

    fn set_arg(&self, kernel: &mut GpuKernel, slot: usize, memory: &GpuMemory) -> Result<(), DeviceError> {
        kernel.set_arg(slot, memory)
    }

    fn enqueue(&self, kernel: &GpuKernel, range: Size3D) -> Result<(), DeviceError> {
        kernel.enqueue(self, range)
    }

    fn read_memory(&self, memory: &GpuMemory) -> Result<Vec<u8>, DeviceError> {
        memory.readback(self)
    }
}
