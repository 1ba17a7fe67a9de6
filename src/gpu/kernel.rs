// gpu/kernel.rs — kernel objects: reflection, argument slots, dispatch.
//
// A kernel is one compute entry point of a linked program. Its formal
// parameters are the `@group(0)` resources the entry point actually uses,
// ordered by `@binding`; slot N of a stage's argument list binds to the
// N-th of those.
//
// REFLECTION (naga IR → KernelParam)
// ───────────────────────────────────
//   texture_2d<f32>                    SampledImage  read-only   domain f32
//   texture_storage_2d<rgba8unorm, w>  StorageImage  from access full descriptor
//   var<storage, read_write> array<T>  StorageBuffer from use    T's domain/channels
//   var<uniform> T                     UniformBuffer read-only   T's domain/channels
//
// Pipelines use wgpu's automatic layout (`layout: None`), which derives the
// bind group layout from exactly these globals. The bind group itself is
// built at dispatch time from the memory objects set into the slots.
//
// DISPATCH:
// The execution range counts invocations; wgpu dispatches workgroups. The
// range is divided by the entry point's `@workgroup_size`, rounding up, so
// kernels must bounds-check against the dimensions of their output.

use naga::valid::GlobalUse;
use naga::{AddressSpace, ImageClass, ImageDimension, ScalarKind, StorageAccess, StorageFormat, TypeInner};

use crate::backend::{Access, KernelParam, ParamBinding};
use crate::error::DeviceError;
use crate::format::{ArgKind, HintWidth, ReadDomain, TypeDescriptor};
use crate::gpu::device::GpuDevice;
use crate::gpu::memory::GpuMemory;
use crate::gpu::program::GpuProgram;
use crate::size::Size3D;

/// One instantiated compute entry point.
pub struct GpuKernel {
    pub name: String,
    pipeline: wgpu::ComputePipeline,
    pub workgroup_size: [u32; 3],
    params: Vec<KernelParam>,
    /// `@binding` number of each slot.
    bindings: Vec<u32>,
    /// Required texture format of storage-image slots, when known.
    storage_formats: Vec<Option<wgpu::TextureFormat>>,
    bound: Vec<Option<GpuMemory>>,
}

impl GpuKernel {
    /// Instantiate entry point `name` of `program`.
    pub fn create(gpu: &GpuDevice, program: &GpuProgram, name: &str) -> Result<Self, DeviceError> {
        let entry = program
            .entry(name)
            .ok_or_else(|| DeviceError::validation("create_kernel", format!("no compute entry point `{name}`")))?;
        let unit = &program.units[entry.unit];
        let ep = &unit.module.entry_points[entry.entry];

        let invocations: u32 = ep.workgroup_size.iter().product();
        if invocations > gpu.max_invocations() {
            return Err(DeviceError::unsupported(
                "create_kernel",
                format!(
                    "`{name}` declares {invocations} invocations per workgroup, {} allows {}",
                    gpu.profile,
                    gpu.max_invocations()
                ),
            ));
        }

        let reflected = reflect(&unit.module, &unit.info, entry.entry, name)?;
        let pipeline = gpu.scoped("create_kernel", || {
            gpu.device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(name),
                layout: None,
                module: &unit.shader,
                entry_point: name,
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                cache: None,
            })
        })?;

        let slots = reflected.len();
        let mut bindings = Vec::with_capacity(slots);
        let mut storage_formats = Vec::with_capacity(slots);
        let mut params = Vec::with_capacity(slots);
        for r in reflected {
            bindings.push(r.binding);
            storage_formats.push(r.storage_format);
            params.push(r.param);
        }
        Ok(GpuKernel {
            name: name.to_owned(),
            pipeline,
            workgroup_size: ep.workgroup_size,
            params,
            bindings,
            storage_formats,
            bound: vec![None; slots],
        })
    }

    pub fn params(&self) -> &[KernelParam] {
        &self.params
    }

    /// Bind `memory` to parameter `slot`.
    pub fn set_arg(&mut self, slot: usize, memory: &GpuMemory) -> Result<(), DeviceError> {
        let param = self.params.get(slot).ok_or_else(|| {
            DeviceError::validation(
                "set_arg",
                format!("`{}` has {} parameters, no slot {slot}", self.name, self.params.len()),
            )
        })?;
        let desc = memory.desc();
        if param.kind != desc.kind {
            return Err(DeviceError::validation(
                "set_arg",
                format!("{} expects {}, {:?} is {}", param.name, param.kind, desc.label, desc.kind),
            ));
        }
        if let (Some(want), Some(have)) = (self.storage_formats[slot], memory.texture_format()) {
            if want != have {
                return Err(DeviceError::validation(
                    "set_arg",
                    format!("{} is a {want:?} storage image, {:?} is {have:?}", param.name, desc.label),
                ));
            }
        }
        self.bound[slot] = Some(memory.clone());
        Ok(())
    }

    /// Dispatch the kernel over `range` invocations.
    pub fn enqueue(&self, gpu: &GpuDevice, range: Size3D) -> Result<(), DeviceError> {
        let mut entries = Vec::with_capacity(self.bound.len());
        for ((slot, memory), &binding) in self.bound.iter().enumerate().zip(&self.bindings) {
            let memory = memory.as_ref().ok_or_else(|| {
                DeviceError::validation("enqueue", format!("`{}` slot {slot} has nothing bound", self.name))
            })?;
            entries.push(wgpu::BindGroupEntry { binding, resource: memory.binding_resource() });
        }

        let [wg_x, wg_y, wg_z] = dispatch_size(range, self.workgroup_size)?;
        gpu.scoped("enqueue", || {
            let layout = self.pipeline.get_bind_group_layout(0);
            let bind_group = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(&self.name),
                layout: &layout,
                entries: &entries,
            });
            let mut encoder = gpu
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(&self.name) });
            {
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some(&self.name),
                    timestamp_writes: None,
                });
                pass.set_pipeline(&self.pipeline);
                pass.set_bind_group(0, &bind_group, &[]);
                pass.dispatch_workgroups(wg_x, wg_y, wg_z);
            }
            gpu.queue.submit(std::iter::once(encoder.finish()));
        })
    }
}

/// Workgroups needed to cover `range` invocations.
///
/// Each axis rounds up; an empty axis still dispatches nothing. A range
/// needing more than `u32::MAX` workgroups on an axis is `Unsupported`.
pub fn dispatch_size(range: Size3D, workgroup: [u32; 3]) -> Result<[u32; 3], DeviceError> {
    let axis = |n: usize, wg: u32| {
        let groups = n.div_ceil(wg.max(1) as usize);
        u32::try_from(groups)
            .map_err(|_| DeviceError::unsupported("enqueue", format!("range {range} needs {groups} workgroups on one axis")))
    };
    Ok([axis(range.x, workgroup[0])?, axis(range.y, workgroup[1])?, axis(range.z, workgroup[2])?])
}

// ============================================================
// Reflection
// ============================================================

struct Reflected {
    binding: u32,
    storage_format: Option<wgpu::TextureFormat>,
    param: KernelParam,
}

fn reflect(
    module: &naga::Module,
    info: &naga::valid::ModuleInfo,
    entry: usize,
    kernel: &str,
) -> Result<Vec<Reflected>, DeviceError> {
    let uses = info.get_entry_point(entry);
    let unsupported = |what: String| DeviceError::unsupported("kernel_params", format!("`{kernel}`: {what}"));

    let mut found = Vec::new();
    for (handle, global) in module.global_variables.iter() {
        let used = uses[handle];
        if used.is_empty() {
            continue;
        }
        let Some(rb) = &global.binding else { continue };
        let name = global.name.clone().unwrap_or_else(|| format!("binding{}", rb.binding));
        if rb.group != 0 {
            return Err(unsupported(format!("{name} is in bind group {}", rb.group)));
        }

        let inner = &module.types[global.ty].inner;
        let (binding, access, kind, descriptor, texture_format) = match (global.space, inner) {
            (AddressSpace::Handle, TypeInner::Image { dim, arrayed, class }) => {
                let kind = image_kind(*dim, *arrayed).ok_or_else(|| unsupported(format!("{name} is a cube texture")))?;
                match class {
                    ImageClass::Sampled { kind: scalar, .. } => (
                        ParamBinding::SampledImage,
                        Access::ReadOnly,
                        kind,
                        scalar_domain(*scalar, 4).map(TypeDescriptor::domain_only),
                        None,
                    ),
                    ImageClass::Storage { format, access } => {
                        let (texture, descriptor) = storage_format(*format).unzip();
                        (
                            ParamBinding::StorageImage,
                            Access::from_usage(access.contains(StorageAccess::LOAD), access.contains(StorageAccess::STORE)),
                            kind,
                            descriptor,
                            texture,
                        )
                    }
                    ImageClass::Depth { .. } => return Err(unsupported(format!("{name} is a depth texture"))),
                }
            }
            (AddressSpace::Storage { access }, _) => (
                ParamBinding::StorageBuffer,
                buffer_access(access, used),
                ArgKind::Buffer,
                element_descriptor(module, inner),
                None,
            ),
            (AddressSpace::Uniform, _) => (
                ParamBinding::UniformBuffer,
                Access::ReadOnly,
                ArgKind::Buffer,
                element_descriptor(module, inner),
                None,
            ),
            _ => return Err(unsupported(format!("{name} cannot be bound to a memory object"))),
        };

        found.push(Reflected {
            binding: rb.binding,
            storage_format: texture_format,
            param: KernelParam {
                index: 0,
                type_name: type_name(module, inner),
                name,
                binding,
                access,
                kind,
                descriptor,
            },
        });
    }

    found.sort_by_key(|r| r.binding);
    for (i, r) in found.iter_mut().enumerate() {
        r.param.index = i;
    }
    Ok(found)
}

fn image_kind(dim: ImageDimension, arrayed: bool) -> Option<ArgKind> {
    match (dim, arrayed) {
        (ImageDimension::D1, false) => Some(ArgKind::Image1D),
        (ImageDimension::D1, true) => Some(ArgKind::Image1DArray),
        (ImageDimension::D2, false) => Some(ArgKind::Image2D),
        (ImageDimension::D2, true) => Some(ArgKind::Image2DArray),
        (ImageDimension::D3, _) => Some(ArgKind::Image3D),
        (ImageDimension::Cube, _) => None,
    }
}

fn scalar_domain(kind: ScalarKind, width: u8) -> Option<ReadDomain> {
    match kind {
        ScalarKind::Uint => Some(ReadDomain::Unsigned),
        ScalarKind::Sint => Some(ReadDomain::Signed),
        ScalarKind::Float if width == 2 => Some(ReadDomain::Half),
        ScalarKind::Float => Some(ReadDomain::Float),
        _ => None,
    }
}

/// Declared buffer access narrowed to what the entry point actually does.
fn buffer_access(declared: StorageAccess, used: GlobalUse) -> Access {
    let reads = declared.contains(StorageAccess::LOAD) && used.contains(GlobalUse::READ);
    let writes = declared.contains(StorageAccess::STORE) && used.contains(GlobalUse::WRITE);
    if reads || writes {
        Access::from_usage(reads, writes)
    } else {
        Access::from_usage(declared.contains(StorageAccess::LOAD), declared.contains(StorageAccess::STORE))
    }
}

/// Descriptor of a buffer's element type: `array<vec2<f32>>` is Float/Full/2.
fn element_descriptor(module: &naga::Module, inner: &TypeInner) -> Option<TypeDescriptor> {
    let element = match inner {
        TypeInner::Array { base, .. } => &module.types[*base].inner,
        other => other,
    };
    let (scalar, channels) = match element {
        TypeInner::Scalar(s) => (*s, 1),
        TypeInner::Vector { size, scalar } => (*scalar, *size as u8),
        _ => return None,
    };
    let domain = scalar_domain(scalar.kind, scalar.width)?;
    let width = match domain {
        ReadDomain::Unsigned | ReadDomain::Signed => HintWidth::Int,
        ReadDomain::Float | ReadDomain::Half => HintWidth::Full,
    };
    Some(TypeDescriptor { domain, width: Some(width), channels: Some(channels) })
}

/// Texture format and descriptor of a WGSL storage texel format.
fn storage_format(format: StorageFormat) -> Option<(wgpu::TextureFormat, TypeDescriptor)> {
    use wgpu::TextureFormat as F;
    use HintWidth as W;
    use ReadDomain as D;
    let (texture, domain, width, channels) = match format {
        StorageFormat::R32Float => (F::R32Float, D::Float, W::Full, 1),
        StorageFormat::Rg32Float => (F::Rg32Float, D::Float, W::Full, 2),
        StorageFormat::Rgba32Float => (F::Rgba32Float, D::Float, W::Full, 4),
        StorageFormat::Rgba16Float => (F::Rgba16Float, D::Half, W::Full, 4),
        StorageFormat::R32Uint => (F::R32Uint, D::Unsigned, W::Int, 1),
        StorageFormat::Rg32Uint => (F::Rg32Uint, D::Unsigned, W::Int, 2),
        StorageFormat::Rgba32Uint => (F::Rgba32Uint, D::Unsigned, W::Int, 4),
        StorageFormat::Rgba16Uint => (F::Rgba16Uint, D::Unsigned, W::Short, 4),
        StorageFormat::Rgba8Uint => (F::Rgba8Uint, D::Unsigned, W::Char, 4),
        StorageFormat::R32Sint => (F::R32Sint, D::Signed, W::Int, 1),
        StorageFormat::Rg32Sint => (F::Rg32Sint, D::Signed, W::Int, 2),
        StorageFormat::Rgba32Sint => (F::Rgba32Sint, D::Signed, W::Int, 4),
        StorageFormat::Rgba16Sint => (F::Rgba16Sint, D::Signed, W::Short, 4),
        StorageFormat::Rgba8Sint => (F::Rgba8Sint, D::Signed, W::Char, 4),
        StorageFormat::Rgba8Unorm => (F::Rgba8Unorm, D::Float, W::UnsignedNorm, 4),
        StorageFormat::Rgba8Snorm => (F::Rgba8Snorm, D::Float, W::SignedNorm, 4),
        StorageFormat::Bgra8Unorm => (F::Bgra8Unorm, D::Float, W::UnsignedNorm, 4),
        _ => return None,
    };
    Some((texture, TypeDescriptor { domain, width: Some(width), channels: Some(channels) }))
}

/// WGSL-ish spelling of a resource type, for diagnostics.
fn type_name(module: &naga::Module, inner: &TypeInner) -> String {
    match inner {
        TypeInner::Image { dim, arrayed, class } => {
            let dim = match dim {
                ImageDimension::D1 => "1d",
                ImageDimension::D2 => "2d",
                ImageDimension::D3 => "3d",
                ImageDimension::Cube => "cube",
            };
            let array = if *arrayed { "_array" } else { "" };
            match class {
                ImageClass::Sampled { kind, .. } => format!("texture_{dim}{array}<{kind:?}>"),
                ImageClass::Depth { .. } => format!("texture_depth_{dim}{array}"),
                ImageClass::Storage { format, .. } => format!("texture_storage_{dim}{array}<{format:?}>"),
            }
        }
        TypeInner::Array { base, .. } => format!("array<{}>", type_name(module, &module.types[*base].inner)),
        TypeInner::Scalar(s) => format!("{:?}{}", s.kind, s.width * 8),
        TypeInner::Vector { size, scalar } => format!("vec{}<{:?}{}>", *size as u8, scalar.kind, scalar.width * 8),
        other => format!("{other:?}"),
    }
}

// ============================================================
// Tests
// ============================================================
