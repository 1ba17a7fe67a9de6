// allocate.rs — device memory allocation and argument binding.
//
// Memory objects are created in dependency order: host inputs first (their
// data copied in at creation), then every derived argument in declaration
// order, created empty. Each object's flags come from inference:
//
//   access         read-only if only ever read, write-only if only ever
//                  written, otherwise read-write
//   usage          union of the binding styles of every parameter it meets
//   host_readable  written by the final stage, forced in the manifest, or
//                  the argument read back after the run
//
// Binding walks each stage's argument list and sets the memory objects into
// the kernel's parameter slots in order.

use tracing::debug;

use crate::backend::{Access, ComputeBackend, MemoryDesc};
use crate::error::{DeviceError, PipelineError, Result};
use crate::instantiate::Inference;
use crate::lifecycle::{ResourceClass, ResourceLedger, Tracked};
use crate::size::{InvalidSize, Size3D};
use crate::staging::{ArgOrigin, HostInput, StagingModel};

/// Device description of argument `index`.
///
/// `sizes` is indexed like the model's arguments.
pub fn memory_desc(model: &StagingModel, sizes: &[Size3D], inference: &Inference, index: usize) -> Result<MemoryDesc> {
    let (Some(decl), Some(&size)) = (model.arguments().get(index), sizes.get(index)) else {
        return Err(PipelineError::InvalidArgsTable {
            detail: format!(
                "argument {index} out of range ({} declared, {} sizes)",
                model.arguments().len(),
                sizes.len()
            ),
        });
    };
    let usage = inference.args.get(index).copied().unwrap_or_default();
    Ok(MemoryDesc {
        label: decl.name.clone(),
        kind: decl.kind,
        format: decl.format.device_format(decl.kind),
        size,
        access: Access::from_usage(usage.reads, usage.writes),
        usage: usage.usage,
        host_readable: usage.host_readable
            || decl.force_host_readable
            || model.output_index() == Some(index),
    })
}

/// Byte length of `desc`, or `InvalidSize` when it cannot be addressed.
fn byte_len(desc: &MemoryDesc) -> Result<usize> {
    desc.byte_len().ok_or_else(|| PipelineError::InvalidSize {
        owner: format!("argument {:?}", desc.label),
        source: InvalidSize::TooLarge { size: desc.size },
    })
}

/// Create one memory object per argument, indexed like the model's
/// arguments.
///
/// `inputs` pair with the model's host inputs by order. On failure every
/// object created so far is released before the error is returned.
pub fn allocate<B: ComputeBackend>(
    backend: &B,
    model: &StagingModel,
    sizes: &[Size3D],
    inference: &Inference,
    inputs: &[HostInput],
    ledger: &ResourceLedger,
) -> Result<Vec<Tracked<B::Memory>>> {
    let expected = model.input_count();
    if inputs.len() != expected {
        return Err(PipelineError::InvalidHardcodedArgsArray { expected });
    }
    if sizes.len() != model.arguments().len() {
        return Err(PipelineError::InvalidArgsTable {
            detail: format!("{} sizes given for {} arguments", sizes.len(), model.arguments().len()),
        });
    }

    let mut slots: Vec<Option<Tracked<B::Memory>>> = Vec::new();
    slots.resize_with(model.arguments().len(), || None);

    let input_indices: Vec<usize> = model.input_indices().collect();
    for (&index, input) in input_indices.iter().zip(inputs) {
        let desc = memory_desc(model, sizes, inference, index)?;
        let needed = byte_len(&desc)?;
        if input.data.len() != needed {
            return Err(DeviceError::validation(
                "create_memory",
                format!(
                    "host input {:?} holds {} bytes, {} {} needs {}",
                    desc.label,
                    input.data.len(),
                    desc.size,
                    desc.format,
                    needed
                ),
            )
            .into());
        }
        slots[index] = Some(create(backend, ledger, &desc, Some(&input.data))?);
    }

    for (index, decl) in model.arguments().iter().enumerate() {
        if decl.origin == ArgOrigin::Derived {
            let desc = memory_desc(model, sizes, inference, index)?;
            slots[index] = Some(create(backend, ledger, &desc, None)?);
        }
    }

    slots
        .into_iter()
        .enumerate()
        .map(|(index, slot)| {
            slot.ok_or_else(|| {
                PipelineError::from(DeviceError::validation(
                    "create_memory",
                    format!("argument {index} was never allocated"),
                ))
            })
        })
        .collect()
}

fn create<B: ComputeBackend>(
    backend: &B,
    ledger: &ResourceLedger,
    desc: &MemoryDesc,
    data: Option<&[u8]>,
) -> Result<Tracked<B::Memory>> {
    debug!(
        arg = %desc.label,
        kind = %desc.kind,
        size = %desc.size,
        format = %desc.format,
        access = ?desc.access,
        host_readable = desc.host_readable,
        "creating memory object"
    );
    byte_len(desc)?;
    let memory = backend.create_memory(desc, data)?;
    Ok(ledger.track(ResourceClass::Memory, desc.label.clone(), memory))
}

/// Set every stage's arguments into its kernel's parameter slots.
pub fn bind<B: ComputeBackend>(
    backend: &B,
    kernels: &mut [Tracked<B::Kernel>],
    model: &StagingModel,
    buffers: &[Tracked<B::Memory>],
) -> Result<()> {
    if kernels.len() != model.stages().len() {
        return Err(PipelineError::InvalidStagesArray {
            detail: format!("{} kernels given for {} stages", kernels.len(), model.stages().len()),
        });
    }
    if buffers.len() != model.arguments().len() {
        return Err(PipelineError::InvalidArgsTable {
            detail: format!("{} memory objects given for {} arguments", buffers.len(), model.arguments().len()),
        });
    }
    for (stage, (decl, kernel)) in model.stages().iter().zip(kernels.iter_mut()).enumerate() {
        for (slot, &arg) in decl.argument_refs.iter().enumerate() {
            backend.set_arg(kernel, slot, &buffers[arg]).map_err(|source| PipelineError::BindFailed {
                stage,
                kernel: model.stage_kernel(stage).to_owned(),
                slot,
                arg: model.arguments()[arg].name.clone(),
                source,
            })?;
        }
    }
    Ok(())
}
