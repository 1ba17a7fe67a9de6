// backend.rs — the compute device seam.
//
// Everything above this trait (manifest, sizes, inference, allocation,
// binding) is device independent. A backend supplies five capabilities:
//
//   compile/link        source units → one program object
//   create_kernel       named entry point of the program
//   kernel_params       reflected formal parameters of a kernel
//   create_memory       typed device memory object, optionally initialised
//   set_arg/enqueue/    bind memory to parameter slots, run a kernel over a
//   read_memory         3-D range, copy a memory object back to the host
//
// Handles are released by dropping them; the lifecycle ledger wraps each one
// in a `Tracked<T>` so releases are counted exactly once.
//
// PRECONDITION: work enqueued through one backend executes in submission
// order. Stages rely on this instead of explicit events or barriers.

use crate::error::DeviceError;
use crate::format::{ArgKind, ChannelFormat, TypeDescriptor};
use crate::size::Size3D;

/// Read/write role of a kernel parameter or memory object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Access {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl Access {
    pub fn reads(&self) -> bool {
        !matches!(self, Access::WriteOnly)
    }

    pub fn writes(&self) -> bool {
        !matches!(self, Access::ReadOnly)
    }

    /// Combine observed reads and writes. Neither (an unused argument) is
    /// treated as read-write.
    pub fn from_usage(reads: bool, writes: bool) -> Access {
        match (reads, writes) {
            (true, false) => Access::ReadOnly,
            (false, true) => Access::WriteOnly,
            _ => Access::ReadWrite,
        }
    }
}

/// How a kernel parameter is bound on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamBinding {
    SampledImage,
    StorageImage,
    StorageBuffer,
    UniformBuffer,
}

/// One reflected formal parameter of a kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelParam {
    /// Slot index (parameter order).
    pub index: usize,
    /// Identifier in the kernel source; may carry a type-hint suffix.
    pub name: String,
    pub binding: ParamBinding,
    pub access: Access,
    /// Memory-object kind the parameter expects.
    pub kind: ArgKind,
    /// Declared type as written in the kernel source.
    pub type_name: String,
    /// What the declared type says about element storage, if anything.
    pub descriptor: Option<TypeDescriptor>,
}

/// Which binding styles a memory object must support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BindingUsage {
    pub sampled: bool,
    pub storage: bool,
    pub uniform: bool,
}

impl BindingUsage {
    pub fn add(&mut self, binding: ParamBinding) {
        match binding {
            ParamBinding::SampledImage => self.sampled = true,
            ParamBinding::StorageImage | ParamBinding::StorageBuffer => self.storage = true,
            ParamBinding::UniformBuffer => self.uniform = true,
        }
    }
}

/// Everything needed to create one device memory object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryDesc {
    pub label: String,
    pub kind: ArgKind,
    /// Device-side element format (already widened, see
    /// [`ChannelFormat::device_format`]).
    pub format: ChannelFormat,
    pub size: Size3D,
    /// Inferred role across all stages. Backends with per-object access
    /// flags apply it; wgpu derives access from the kernels' bindings.
    pub access: Access,
    pub usage: BindingUsage,
    pub host_readable: bool,
}

impl MemoryDesc {
    /// Tightly packed size in bytes, `None` if it overflows `usize`.
    pub fn byte_len(&self) -> Option<usize> {
        self.size.volume()?.checked_mul(self.format.bytes_per_element())
    }
}

/// A compute device capable of running pipeline stages.
pub trait ComputeBackend {
    /// One compiled translation unit.
    type Unit;
    /// Linked program holding every kernel entry point.
    type Program;
    type Kernel;
    type Memory;

    /// Compile one source unit. `Err` carries the verbatim diagnostic log.
    fn compile(&self, unit_name: &str, source: &str) -> Result<Self::Unit, String>;

    /// Link compiled units into one program. `Err` carries the link log.
    fn link(&self, units: Vec<Self::Unit>) -> Result<Self::Program, String>;

    fn create_kernel(&self, program: &Self::Program, name: &str) -> Result<Self::Kernel, DeviceError>;

    /// Formal parameters of `kernel`, ordered by slot.
    fn kernel_params(&self, kernel: &Self::Kernel) -> Result<Vec<KernelParam>, DeviceError>;

    /// Create a memory object; `data` (exactly `desc.byte_len()` bytes)
    /// initialises it when present.
    fn create_memory(&self, desc: &MemoryDesc, data: Option<&[u8]>) -> Result<Self::Memory, DeviceError>;

    fn set_arg(&self, kernel: &mut Self::Kernel, slot: usize, memory: &Self::Memory) -> Result<(), DeviceError>;

    /// Submit `kernel` over `range` invocations.
    fn enqueue(&self, kernel: &Self::Kernel, range: Size3D) -> Result<(), DeviceError>;

    /// Block until prior work is done and copy `memory` to the host, tightly
    /// packed.
    fn read_memory(&self, memory: &Self::Memory) -> Result<Vec<u8>, DeviceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_from_usage() {
        assert_eq!(Access::from_usage(true, false), Access::ReadOnly);
        assert_eq!(Access::from_usage(false, true), Access::WriteOnly);
        assert_eq!(Access::from_usage(true, true), Access::ReadWrite);
        assert_eq!(Access::from_usage(false, false), Access::ReadWrite);
        assert!(Access::ReadWrite.reads() && Access::ReadWrite.writes());
        assert!(!Access::WriteOnly.reads());
    }

    #[test]
    fn test_binding_usage() {
        let mut usage = BindingUsage::default();
        usage.add(ParamBinding::SampledImage);
        usage.add(ParamBinding::StorageImage);
        assert!(usage.sampled && usage.storage && !usage.uniform);
    }
}
