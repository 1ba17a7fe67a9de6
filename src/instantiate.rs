// instantiate.rs — kernel instantiation, argument inference and verification.
//
// After the program is linked, one kernel object is created per stage. The
// kernels' reflected parameters then drive everything the manifest does not
// say explicitly:
//
//   access      read-only / write-only / read-write per argument, from the
//               union of every parameter it is bound to
//   usage       which binding styles (sampled, storage, uniform) each
//               argument's memory object must support
//   readback    arguments written by the final stage are host readable
//
// Verification runs in the same walk. Hard errors: the stage binds a
// different number of arguments than the kernel has parameters, or a
// parameter expects another memory-object kind. Everything else is a
// `Warning`: reading an argument nothing has written yet, element types or
// channel counts that disagree with the parameter's declared type or its
// identifier type hint, and a "fresh" output bound to an already written
// argument.
//
// Writes become visible only after the whole stage has been walked, so a
// stage reading and writing different parameters bound to the same argument
// does not count as its own producer.

use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};

use crate::backend::{BindingUsage, ComputeBackend, KernelParam};
use crate::error::{HintSource, ParamSite, PipelineError, Result, Warning};
use crate::format::TypeHint;
use crate::lifecycle::{ResourceClass, ResourceLedger, Tracked};
use crate::staging::{ArgOrigin, StagingModel};

/// Create one kernel per stage from the linked program.
pub fn instantiate_kernels<B: ComputeBackend>(
    backend: &B,
    program: &B::Program,
    model: &StagingModel,
    ledger: &ResourceLedger,
) -> Result<Vec<Tracked<B::Kernel>>> {
    let mut kernels = Vec::with_capacity(model.stages().len());
    for stage in 0..model.stages().len() {
        let name = model.stage_kernel(stage);
        let kernel = backend.create_kernel(program, name)?;
        kernels.push(ledger.track(ResourceClass::Kernel, format!("stage {stage} ({name})"), kernel));
    }
    debug!(kernels = kernels.len(), "kernels instantiated");
    Ok(kernels)
}

/// What the stages do with one argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ArgUsage {
    pub reads: bool,
    pub writes: bool,
    pub usage: BindingUsage,
    /// Written by the final stage.
    pub host_readable: bool,
}

/// Result of [`infer_and_verify`].
#[derive(Debug, Clone, Default)]
pub struct Inference {
    /// One entry per argument, by index.
    pub args: Vec<ArgUsage>,
    /// Deduplicated, in first-seen order.
    pub warnings: Vec<Warning>,
}

#[derive(Default)]
struct WarningSet {
    seen: HashSet<Warning>,
    list: Vec<Warning>,
}

impl WarningSet {
    fn push(&mut self, w: Warning) {
        if self.seen.insert(w.clone()) {
            warn!("{w}");
            self.list.push(w);
        }
    }
}

/// Infer argument roles from the kernels' parameters and check every binding.
pub fn infer_and_verify<B: ComputeBackend>(
    backend: &B,
    kernels: &[Tracked<B::Kernel>],
    model: &StagingModel,
) -> Result<Inference> {
    if kernels.len() != model.stages().len() {
        return Err(PipelineError::InvalidStagesArray {
            detail: format!("{} kernels given for {} stages", kernels.len(), model.stages().len()),
        });
    }
    let args = model.arguments();
    let mut usage = vec![ArgUsage::default(); args.len()];
    let mut written = vec![false; args.len()];
    let mut warnings = WarningSet::default();
    let mut param_cache: HashMap<usize, Vec<KernelParam>> = HashMap::new();
    let last_stage = model.stages().len().saturating_sub(1);

    for (stage, (decl, kernel)) in model.stages().iter().zip(kernels).enumerate() {
        let kernel_name = model.stage_kernel(stage);
        if !param_cache.contains_key(&decl.kernel_index) {
            let params = backend.kernel_params(kernel)?;
            debug!(kernel = kernel_name, params = params.len(), "parameters reflected");
            param_cache.insert(decl.kernel_index, params);
        }
        let params = &param_cache[&decl.kernel_index];

        let mismatch = |detail: String| PipelineError::KernelSignatureMismatch {
            stage,
            kernel: kernel_name.to_owned(),
            detail,
        };
        if params.len() != decl.argument_refs.len() {
            return Err(mismatch(format!(
                "kernel has {} parameters, stage binds {} arguments",
                params.len(),
                decl.argument_refs.len()
            )));
        }

        let mut stage_writes = Vec::new();
        for (param, &arg_index) in params.iter().zip(&decl.argument_refs) {
            let arg = &args[arg_index];
            if param.kind != arg.kind {
                return Err(mismatch(format!(
                    "parameter {:?} expects {}, argument {:?} is {}",
                    param.name, param.kind, arg.name, arg.kind
                )));
            }

            let site = || ParamSite {
                stage,
                kernel: kernel_name.to_owned(),
                param: param.name.clone(),
                arg: arg.name.clone(),
            };
            let entry = &mut usage[arg_index];
            entry.usage.add(param.binding);

            if param.access.reads() {
                entry.reads = true;
                if !param.access.writes() && !written[arg_index] && arg.origin != ArgOrigin::HostInput {
                    warnings.push(Warning::ReadBeforeWrite { site: site() });
                }
            }
            if param.access.writes() {
                entry.writes = true;
                if stage == last_stage {
                    entry.host_readable = true;
                }
                stage_writes.push(arg_index);
            }

            let device_format = arg.format.device_format(arg.kind);
            if let Some(declared) = param.descriptor {
                if !declared.accepts(device_format.channel_type) {
                    warnings.push(Warning::TypeHintMismatch {
                        site: site(),
                        source: HintSource::Declared,
                        expected: declared,
                        found: device_format,
                    });
                }
                if let Some(missing) = declared.channel_shortfall(&device_format) {
                    warnings.push(Warning::ChannelShortfall {
                        site: site(),
                        expected: device_format.channels + missing,
                        found: device_format.channels,
                    });
                }
            }
            if let Some(hint) = TypeHint::parse(&param.name) {
                if !hint.descriptor.accepts(device_format.channel_type) {
                    warnings.push(Warning::TypeHintMismatch {
                        site: site(),
                        source: HintSource::Identifier,
                        expected: hint.descriptor,
                        found: device_format,
                    });
                }
                if let Some(missing) = hint.descriptor.channel_shortfall(&device_format) {
                    warnings.push(Warning::ChannelShortfall {
                        site: site(),
                        expected: device_format.channels + missing,
                        found: device_format.channels,
                    });
                }
                if hint.fresh && param.access.writes() && written[arg_index] {
                    warnings.push(Warning::OutputReused { site: site() });
                }
            }
        }

        for arg_index in stage_writes {
            written[arg_index] = true;
        }
    }

    Ok(Inference { args: usage, warnings: warnings.list })
}
