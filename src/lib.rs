// plugboard: manifest-driven pipelines of GPU compute kernels
//
// A TOML manifest names the stages of a pipeline, the kernel each one runs
// and the arguments it binds. Argument sizes are derived from earlier
// arguments by a small size calculus; access roles and element types are
// inferred from the compiled kernels and checked against the manifest.
//
// Leaf modules first:
//   size, registry, format, error     pure data and rules
//   staging, manifest                 the declarative model and its reader
//   backend, lifecycle                device seam and resource accounting
//   builder, instantiate, allocate    construction phases
//   queue                             assembly and execution
//   gpu                               wgpu/WGSL backend
//   raster, config                    PNG I/O and run configuration

pub mod size;
pub mod registry;
pub mod format;
pub mod error;
pub mod staging;
pub mod manifest;
pub mod backend;
pub mod lifecycle;
pub mod builder;
pub mod instantiate;
pub mod allocate;
pub mod queue;
pub mod gpu;
pub mod raster;
pub mod config;

pub use backend::ComputeBackend;
pub use builder::{build_program, BuildOptions};
pub use config::PlugboardConfig;
pub use error::{DeviceError, ErrorKind, PipelineError, Result, Warning};
pub use format::{ArgKind, ChannelFormat, ChannelType};
pub use lifecycle::{ResourceClass, ResourceLedger, Tracked};
pub use manifest::Manifest;
pub use queue::{Output, RuntimeQueue};
pub use size::{Mode, RangeSpec, Size3D};
pub use staging::{HostInput, StagingModel};
