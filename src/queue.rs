// queue.rs — the runtime queue: everything needed to run a pipeline.
//
// `RuntimeQueue::assemble` turns a staging model plus host data into live
// device objects, in this order:
//
//   1. resolve argument sizes          (size calculus over the model)
//   2. instantiate one kernel per stage
//   3. infer access roles, verify bindings
//   4. resolve stage execution ranges
//   5. allocate memory objects          (inputs first, then derived)
//   6. bind arguments to kernel slots
//
// Any failure drops whatever was created so far; every handle is a
// `Tracked<T>`, so the ledger sees each release exactly once.
//
// `run` enqueues the stages in order and reads back the output argument (the
// last one declared). It relies on the backend executing submissions in
// order; there are no explicit barriers between stages.

use tracing::{debug, info};

use crate::allocate::{allocate, bind};
use crate::backend::ComputeBackend;
use crate::error::{PipelineError, Result, Warning};
use crate::format::{ArgKind, ChannelFormat};
use crate::instantiate::{infer_and_verify, instantiate_kernels};
use crate::lifecycle::{ResourceLedger, Tracked};
use crate::size::Size3D;
use crate::staging::{HostInput, StagingModel};

/// Data read back from the output argument after a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Output {
    pub size: Size3D,
    /// Device-side format of `bytes`.
    pub format: ChannelFormat,
    pub kind: ArgKind,
    /// Tightly packed elements.
    pub bytes: Vec<u8>,
}

/// Owner of every runtime handle of one assembled pipeline.
pub struct RuntimeQueue<B: ComputeBackend> {
    // Kernels hold references to bound memory; dropped first.
    kernels: Vec<Tracked<B::Kernel>>,
    buffers: Vec<Tracked<B::Memory>>,
    sizes: Vec<Size3D>,
    ranges: Vec<Size3D>,
    labels: Vec<String>,
    output: usize,
    output_format: ChannelFormat,
    output_kind: ArgKind,
    warnings: Vec<Warning>,
}

impl<B: ComputeBackend> RuntimeQueue<B> {
    /// Build every device object the pipeline needs.
    pub fn assemble(
        backend: &B,
        program: &B::Program,
        model: &StagingModel,
        inputs: &[HostInput],
        ledger: &ResourceLedger,
    ) -> Result<Self> {
        let output = model.output_index().ok_or_else(|| PipelineError::InvalidArgsTable {
            detail: "pipeline declares no arguments".into(),
        })?;
        if model.stages().is_empty() {
            return Err(PipelineError::InvalidStagesArray { detail: "pipeline has no stages".into() });
        }

        let sizes = model.resolve_sizes(inputs)?;
        let mut kernels = instantiate_kernels(backend, program, model, ledger)?;
        let inference = infer_and_verify(backend, &kernels, model)?;
        let ranges = model.resolve_ranges(&sizes)?;
        let buffers = allocate(backend, model, &sizes, &inference, inputs, ledger)?;
        bind(backend, &mut kernels, model, &buffers)?;

        let labels = (0..model.stages().len())
            .map(|i| format!("stage {i} ({})", model.stage_kernel(i)))
            .collect();
        let out_decl = &model.arguments()[output];

        info!(
            stages = kernels.len(),
            buffers = buffers.len(),
            warnings = inference.warnings.len(),
            output = %out_decl.name,
            "pipeline assembled"
        );
        Ok(RuntimeQueue {
            kernels,
            buffers,
            sizes,
            ranges,
            labels,
            output,
            output_format: out_decl.format.device_format(out_decl.kind),
            output_kind: out_decl.kind,
            warnings: inference.warnings,
        })
    }

    /// Enqueue every stage in order, then block on reading back the output.
    pub fn run(&self, backend: &B) -> Result<Output> {
        for ((kernel, range), label) in self.kernels.iter().zip(&self.ranges).zip(&self.labels) {
            debug!(stage = %label, range = %range, "enqueue");
            backend.enqueue(kernel, *range)?;
        }
        let bytes = backend.read_memory(&self.buffers[self.output])?;
        info!(bytes = bytes.len(), size = %self.sizes[self.output], "output read back");
        Ok(Output {
            size: self.sizes[self.output],
            format: self.output_format,
            kind: self.output_kind,
            bytes,
        })
    }

    /// Resolved size of every argument.
    pub fn sizes(&self) -> &[Size3D] {
        &self.sizes
    }

    /// Resolved execution range of every stage.
    pub fn ranges(&self) -> &[Size3D] {
        &self.ranges
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    pub fn output_index(&self) -> usize {
        self.output
    }

    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }
}
