// staging.rs — the staging model: ordered arguments and ordered stages.
//
// A pipeline is declared left to right. Each argument is created exactly once
// (first mention wins) and each stage names a kernel plus the arguments bound
// to its parameters, in parameter order. Because the model is built in a
// single forward scan, every index stored here points strictly backwards:
//
//   args:    0:input  1:blurred  2:gradient  3:colour
//                ▲        │ ref=0     │ ref=1     │ ref=2
//                └────────┘───────────┘───────────┘
//   stages:  blur(0,1)  sobel(1,2)  colorize(2,3)
//
// The model owns every string it keeps and is read-only once built. Sizes are
// not stored in the model; `resolve_sizes` produces them on demand from the
// host input data, so one model can be re-run over differently sized inputs.

use tracing::debug;

use crate::error::{PipelineError, Result};
use crate::format::{ArgKind, ChannelFormat};
use crate::registry::Registry;
use crate::size::{self, RangeSpec, Size3D};

/// Whether an argument's contents come from the host or from a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgOrigin {
    /// Filled from host data before the first stage runs; size taken from the
    /// data, `size` spec ignored.
    HostInput,
    /// Created empty on the device and sized through its `RangeSpec`.
    Derived,
}

/// One pipeline argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgumentDecl {
    pub name: String,
    pub kind: ArgKind,
    pub format: ChannelFormat,
    pub size: RangeSpec,
    pub force_host_readable: bool,
    pub origin: ArgOrigin,
}

/// One pipeline stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageDecl {
    pub kernel_index: usize,
    /// Argument indices bound to the kernel parameters, in parameter order.
    pub argument_refs: Vec<usize>,
    pub range: RangeSpec,
}

/// Host-side data for one input argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostInput {
    pub name: String,
    pub kind: ArgKind,
    pub format: ChannelFormat,
    pub size: Size3D,
    /// Tightly packed elements in the device layout of `format`
    /// (see [`ChannelFormat::device_format`]).
    pub data: Vec<u8>,
}

impl HostInput {
    pub fn new(
        name: impl Into<String>,
        kind: ArgKind,
        format: ChannelFormat,
        size: Size3D,
        data: Vec<u8>,
    ) -> Self {
        HostInput { name: name.into(), kind, format, size, data }
    }

    /// Number of bytes `data` must hold for `size` elements, `None` if that
    /// overflows `usize`.
    pub fn expected_len(&self) -> Option<usize> {
        self.size.volume()?.checked_mul(self.format.device_format(self.kind).bytes_per_element())
    }
}

/// Ordered stages and ordered argument declarations.
#[derive(Debug, Clone, Default)]
pub struct StagingModel {
    kernel_names: Registry,
    arg_names: Registry,
    args: Vec<ArgumentDecl>,
    stages: Vec<StageDecl>,
}

impl StagingModel {
    pub fn new() -> Self {
        Self::default()
    }

    // ---- Construction ---------------------------------------------------

    /// Register a host input argument. Returns its index.
    pub fn add_input(&mut self, name: &str, kind: ArgKind, format: ChannelFormat) -> Result<usize> {
        self.push_arg(ArgumentDecl {
            name: name.to_owned(),
            kind,
            format,
            size: RangeSpec::exact([1, 1, 1]),
            force_host_readable: false,
            origin: ArgOrigin::HostInput,
        })
    }

    /// Register a derived argument sized by `size`. Returns its index.
    pub fn add_argument(
        &mut self,
        name: &str,
        kind: ArgKind,
        format: ChannelFormat,
        size: RangeSpec,
        force_host_readable: bool,
    ) -> Result<usize> {
        self.check_ref(&size, || format!("argument {name:?}"))?;
        self.push_arg(ArgumentDecl {
            name: name.to_owned(),
            kind,
            format,
            size,
            force_host_readable,
            origin: ArgOrigin::Derived,
        })
    }

    /// Append a stage running `kernel_name` over `argument_refs` with
    /// execution range `range`. Returns the stage index.
    pub fn add_stage(
        &mut self,
        kernel_name: &str,
        argument_refs: Vec<usize>,
        range: RangeSpec,
    ) -> Result<usize> {
        let stage = self.stages.len();
        if kernel_name.is_empty() {
            return Err(PipelineError::MissingStageName { stage });
        }
        if argument_refs.is_empty() {
            return Err(PipelineError::InvalidStageArgsArray {
                stage,
                detail: "no arguments".into(),
            });
        }
        if let Some(&bad) = argument_refs.iter().find(|&&i| i >= self.args.len()) {
            return Err(PipelineError::InvalidStageArgsArray {
                stage,
                detail: format!("argument index {bad} has not been staged"),
            });
        }
        self.check_ref(&range, || format!("stage {stage} ({kernel_name})"))?;

        let (kernel_index, _) = self.kernel_names.insert(kernel_name);
        debug!(stage, kernel = kernel_name, args = ?argument_refs, "staged");
        self.stages.push(StageDecl { kernel_index, argument_refs, range });
        Ok(stage)
    }

    fn push_arg(&mut self, decl: ArgumentDecl) -> Result<usize> {
        let index = self.args.len();
        if decl.name.is_empty() || self.arg_names.index_of(&decl.name).is_some() {
            return Err(PipelineError::InvalidArgName { index, name: decl.name });
        }
        self.arg_names.insert(&decl.name);
        debug!(index, name = %decl.name, kind = %decl.kind, format = %decl.format, "argument declared");
        self.args.push(decl);
        Ok(index)
    }

    fn check_ref(&self, spec: &RangeSpec, owner: impl FnOnce() -> String) -> Result<()> {
        if spec.mode.uses_reference() && usize::from(spec.ref_index) >= self.args.len() {
            return Err(PipelineError::RefArgNotYetStaged {
                owner: owner(),
                reference: format!("#{}", spec.ref_index),
            });
        }
        Ok(())
    }

    // ---- Queries --------------------------------------------------------

    pub fn arguments(&self) -> &[ArgumentDecl] {
        &self.args
    }

    pub fn stages(&self) -> &[StageDecl] {
        &self.stages
    }

    pub fn kernel_names(&self) -> &Registry {
        &self.kernel_names
    }

    pub fn arg_index(&self, name: &str) -> Option<usize> {
        self.arg_names.index_of(name)
    }

    /// Kernel name run by `stage`.
    pub fn stage_kernel(&self, stage: usize) -> &str {
        self.stages
            .get(stage)
            .and_then(|s| self.kernel_names.name(s.kernel_index))
            .unwrap_or("?")
    }

    /// Indices of host input arguments, in declaration order.
    pub fn input_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.args
            .iter()
            .enumerate()
            .filter(|(_, a)| a.origin == ArgOrigin::HostInput)
            .map(|(i, _)| i)
    }

    pub fn input_count(&self) -> usize {
        self.input_indices().count()
    }

    /// The argument read back after a run: the last one declared.
    pub fn output_index(&self) -> Option<usize> {
        self.args.len().checked_sub(1)
    }

    // ---- Size resolution ------------------------------------------------

    /// Concrete size of every argument.
    ///
    /// Host inputs take the size of their paired `inputs` entry (paired by
    /// order); `Exact` arguments are resolved next, then every remaining
    /// argument in declaration order against already-final sizes.
    pub fn resolve_sizes(&self, inputs: &[HostInput]) -> Result<Vec<Size3D>> {
        let expected = self.input_count();
        if inputs.len() != expected {
            return Err(PipelineError::InvalidHardcodedArgsArray { expected });
        }

        let mut sizes: Vec<Option<Size3D>> = vec![None; self.args.len()];
        for (index, input) in self.input_indices().zip(inputs) {
            sizes[index] = Some(input.size);
        }

        let owner = |i: usize| format!("argument {:?}", self.args[i].name);
        let invalid = |i: usize, source| PipelineError::InvalidSize { owner: owner(i), source };

        for (i, decl) in self.args.iter().enumerate() {
            if decl.origin == ArgOrigin::Derived && !decl.size.mode.uses_reference() {
                sizes[i] = Some(size::resolve(Size3D::default(), &decl.size).map_err(|e| invalid(i, e))?);
            }
        }
        for (i, decl) in self.args.iter().enumerate() {
            if sizes[i].is_some() {
                continue;
            }
            let reference = sizes
                .get(usize::from(decl.size.ref_index))
                .copied()
                .flatten()
                .ok_or_else(|| PipelineError::RefArgNotYetStaged {
                    owner: owner(i),
                    reference: format!("#{}", decl.size.ref_index),
                })?;
            let resolved = size::resolve(reference, &decl.size).map_err(|e| invalid(i, e))?;
            debug!(arg = %decl.name, size = %resolved, "size resolved");
            sizes[i] = Some(resolved);
        }

        // Every slot was filled by one of the passes above.
        Ok(sizes.into_iter().map(|s| s.unwrap_or_default()).collect())
    }

    /// Execution range of every stage, against finalised argument sizes.
    pub fn resolve_ranges(&self, sizes: &[Size3D]) -> Result<Vec<Size3D>> {
        self.stages
            .iter()
            .enumerate()
            .map(|(i, stage)| {
                let owner = || format!("stage {i} ({})", self.stage_kernel(i));
                let reference = if stage.range.mode.uses_reference() {
                    *sizes.get(usize::from(stage.range.ref_index)).ok_or_else(|| {
                        PipelineError::RefArgNotYetStaged {
                            owner: owner(),
                            reference: format!("#{}", stage.range.ref_index),
                        }
                    })?
                } else {
                    Size3D::default()
                };
                size::resolve(reference, &stage.range)
                    .map_err(|source| PipelineError::InvalidSize { owner: owner(), source })
            })
            .collect()
    }
}
