// tests/common/mod.rs — recording mock of the compute device.
//
// `MockBackend` implements `ComputeBackend` entirely on the host:
//   - kernels are declared up front as name → parameter list,
//   - memory objects are plain byte vectors (inputs keep their data),
//   - every compile, allocation, bind and enqueue is recorded,
//   - failures can be injected at a given compile unit, allocation or slot.
//
// Memory objects count their own drops so tests can check the ledger against
// what the "device" actually released.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use plugboard::backend::{Access, ComputeBackend, KernelParam, MemoryDesc, ParamBinding};
use plugboard::error::{DeviceError, DeviceErrorKind};
use plugboard::format::{ArgKind, ChannelFormat, ChannelType, ReadDomain, TypeDescriptor};
use plugboard::size::Size3D;
use plugboard::staging::HostInput;

pub struct MockUnit {
    pub name: String,
    pub source: String,
}

pub struct MockProgram {
    pub units: Vec<String>,
}

pub struct MockKernel {
    pub name: String,
    pub bound: Vec<Option<usize>>,
}

pub struct MockMemory {
    pub id: usize,
    pub desc: MemoryDesc,
    pub data: Vec<u8>,
    drops: Rc<Cell<usize>>,
}

impl Drop for MockMemory {
    fn drop(&mut self) {
        self.drops.set(self.drops.get() + 1);
    }
}

#[derive(Default)]
pub struct Record {
    /// (unit name, preprocessed source) in compile order.
    pub compiled: Vec<(String, String)>,
    pub linked: usize,
    pub kernels: Vec<String>,
    /// Descriptions of every successfully created memory object.
    pub memories: Vec<MemoryDesc>,
    pub allocation_attempts: usize,
    /// (kernel, slot, memory id)
    pub binds: Vec<(String, usize, usize)>,
    /// (kernel, range)
    pub enqueued: Vec<(String, Size3D)>,
}

#[derive(Default)]
pub struct MockBackend {
    signatures: HashMap<String, Vec<KernelParam>>,
    pub fail_compile: Option<String>,
    pub fail_link: Option<String>,
    /// 0-based allocation attempt that fails with out-of-memory.
    pub fail_allocation: Option<usize>,
    /// (kernel, slot) whose `set_arg` fails.
    pub fail_bind: Option<(String, usize)>,
    pub record: RefCell<Record>,
    drops: Rc<Cell<usize>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare kernel `name` with `params` (slot indices assigned in order).
    pub fn with_kernel(mut self, name: &str, params: Vec<KernelParam>) -> Self {
        let params = params
            .into_iter()
            .enumerate()
            .map(|(index, p)| KernelParam { index, ..p })
            .collect();
        self.signatures.insert(name.to_owned(), params);
        self
    }

    /// Memory objects released so far.
    pub fn memory_drops(&self) -> usize {
        self.drops.get()
    }
}

impl ComputeBackend for MockBackend {
    type Unit = MockUnit;
    type Program = MockProgram;
    type Kernel = MockKernel;
    type Memory = MockMemory;

    fn compile(&self, unit_name: &str, source: &str) -> Result<MockUnit, String> {
        if self.fail_compile.as_deref() == Some(unit_name) {
            return Err(format!("{unit_name}:1:1: error: unexpected token"));
        }
        self.record.borrow_mut().compiled.push((unit_name.to_owned(), source.to_owned()));
        Ok(MockUnit { name: unit_name.to_owned(), source: source.to_owned() })
    }

    fn link(&self, units: Vec<MockUnit>) -> Result<MockProgram, String> {
        if let Some(log) = &self.fail_link {
            return Err(log.clone());
        }
        self.record.borrow_mut().linked += 1;
        Ok(MockProgram { units: units.into_iter().map(|u| u.name).collect() })
    }

    fn create_kernel(&self, _program: &MockProgram, name: &str) -> Result<MockKernel, DeviceError> {
        let params = self
            .signatures
            .get(name)
            .ok_or_else(|| DeviceError::validation("create_kernel", format!("no kernel `{name}`")))?;
        self.record.borrow_mut().kernels.push(name.to_owned());
        Ok(MockKernel { name: name.to_owned(), bound: vec![None; params.len()] })
    }

    fn kernel_params(&self, kernel: &MockKernel) -> Result<Vec<KernelParam>, DeviceError> {
        Ok(self.signatures[&kernel.name].clone())
    }

    fn create_memory(&self, desc: &MemoryDesc, data: Option<&[u8]>) -> Result<MockMemory, DeviceError> {
        let mut record = self.record.borrow_mut();
        let attempt = record.allocation_attempts;
        record.allocation_attempts += 1;
        if self.fail_allocation == Some(attempt) {
            return Err(DeviceError::new("create_memory", DeviceErrorKind::OutOfMemory, "mock heap exhausted"));
        }
        let id = record.memories.len();
        record.memories.push(desc.clone());
        let data = match data {
            Some(bytes) => bytes.to_vec(),
            None => vec![0; desc.byte_len().unwrap_or(0)],
        };
        Ok(MockMemory { id, desc: desc.clone(), data, drops: Rc::clone(&self.drops) })
    }

    fn set_arg(&self, kernel: &mut MockKernel, slot: usize, memory: &MockMemory) -> Result<(), DeviceError> {
        if let Some((name, bad)) = &self.fail_bind {
            if *name == kernel.name && *bad == slot {
                return Err(DeviceError::validation("set_arg", "mock rejects this slot"));
            }
        }
        kernel.bound[slot] = Some(memory.id);
        self.record.borrow_mut().binds.push((kernel.name.clone(), slot, memory.id));
        Ok(())
    }

    fn enqueue(&self, kernel: &MockKernel, range: Size3D) -> Result<(), DeviceError> {
        if kernel.bound.iter().any(Option::is_none) {
            return Err(DeviceError::validation("enqueue", "unbound slot"));
        }
        self.record.borrow_mut().enqueued.push((kernel.name.clone(), range));
        Ok(())
    }

    fn read_memory(&self, memory: &MockMemory) -> Result<Vec<u8>, DeviceError> {
        Ok(memory.data.clone())
    }
}

// ============================================================
// Parameter helpers
// ============================================================

/// `texture_2d<f32>` parameter.
pub fn sampled(name: &str) -> KernelParam {
    KernelParam {
        index: 0,
        name: name.to_owned(),
        binding: ParamBinding::SampledImage,
        access: Access::ReadOnly,
        kind: ArgKind::Image2D,
        type_name: "texture_2d<f32>".to_owned(),
        descriptor: Some(TypeDescriptor::domain_only(ReadDomain::Float)),
    }
}

/// Write-only storage image parameter with no declared descriptor.
pub fn storage_out(name: &str) -> KernelParam {
    KernelParam {
        index: 0,
        name: name.to_owned(),
        binding: ParamBinding::StorageImage,
        access: Access::WriteOnly,
        kind: ArgKind::Image2D,
        type_name: "texture_storage_2d".to_owned(),
        descriptor: None,
    }
}

/// Storage buffer parameter.
pub fn buffer(name: &str, access: Access) -> KernelParam {
    KernelParam {
        index: 0,
        name: name.to_owned(),
        binding: ParamBinding::StorageBuffer,
        access,
        kind: ArgKind::Buffer,
        type_name: "array<f32>".to_owned(),
        descriptor: None,
    }
}

/// Grayscale 8-bit image input of `width`×`height`.
pub fn gray_input(width: usize, height: usize) -> HostInput {
    HostInput::new(
        "input",
        ArgKind::Image2D,
        ChannelFormat::new(ChannelType::UnormInt8, 1),
        Size3D::new(width, height, 1),
        vec![7; width * height],
    )
}
