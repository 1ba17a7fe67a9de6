// gpu/program.rs — WGSL compilation and linking.
//
// COMPILE:
// Each kernel file is parsed and validated by naga on the host. This gives
// per-file diagnostics (rendered with source spans, the way a compiler
// would print them) before anything reaches the driver, and keeps the naga
// IR around for parameter reflection later.
//
// LINK:
// WGSL has no separate linking step, so "linking" here means:
//   1. building the program-wide entry-point table (kernel name → unit),
//      rejecting duplicate compute entry points across units, and
//   2. creating one `wgpu::ShaderModule` per unit inside a validation error
//      scope, so driver-side rejection is reported as a link failure
//      instead of a panic in wgpu's default error handler.
//
// NEW RUST CONCEPTS:
// - `naga::Handle<T>` — typed index into a naga arena (`module.types`,
//   `module.global_variables`). Cheap to copy, only meaningful for the
//   module that produced it.

use std::borrow::Cow;
use std::collections::HashMap;

use naga::valid::{Capabilities, ModuleInfo, ValidationFlags, Validator};

use crate::gpu::device::GpuDevice;

/// One parsed and validated WGSL unit.
pub struct CompiledUnit {
    pub name: String,
    pub source: String,
    pub module: naga::Module,
    pub info: ModuleInfo,
}

/// A linked unit: naga IR plus the device shader module.
pub struct LinkedUnit {
    pub name: String,
    pub module: naga::Module,
    pub info: ModuleInfo,
    pub shader: wgpu::ShaderModule,
}

/// Location of a compute entry point inside a [`GpuProgram`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryRef {
    pub unit: usize,
    /// Index into `module.entry_points`.
    pub entry: usize,
}

/// Every kernel unit of a pipeline, linked into one program.
pub struct GpuProgram {
    pub units: Vec<LinkedUnit>,
    entries: HashMap<String, EntryRef>,
}

impl GpuProgram {
    pub fn entry(&self, name: &str) -> Option<EntryRef> {
        self.entries.get(name).copied()
    }

    /// Names of every compute entry point, sorted.
    pub fn entry_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Parse and validate one WGSL unit. `Err` is the rendered diagnostic.
pub fn compile_wgsl(unit_name: &str, source: &str) -> Result<CompiledUnit, String> {
    let module = naga::front::wgsl::parse_str(source)
        .map_err(|e| e.emit_to_string_with_path(source, unit_name))?;
    let info = Validator::new(ValidationFlags::all(), Capabilities::all())
        .validate(&module)
        .map_err(|e| e.emit_to_string(source))?;
    Ok(CompiledUnit { name: unit_name.to_owned(), source: source.to_owned(), module, info })
}

/// Link compiled units on `gpu`. `Err` is the link log.
pub fn link(gpu: &GpuDevice, units: Vec<CompiledUnit>) -> Result<GpuProgram, String> {
    let entries = entry_table(&units)?;

    let mut linked = Vec::with_capacity(units.len());
    for unit in units {
        let shader = gpu
            .scoped("create_shader_module", || {
                gpu.device.create_shader_module(wgpu::ShaderModuleDescriptor {
                    label: Some(unit.name.as_str()),
                    source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(unit.source.as_str())),
                })
            })
            .map_err(|e| format!("{}: {}", unit.name, e.detail))?;
        linked.push(LinkedUnit { name: unit.name, module: unit.module, info: unit.info, shader });
    }
    Ok(GpuProgram { units: linked, entries })
}

/// Program-wide table of compute entry points.
fn entry_table(units: &[CompiledUnit]) -> Result<HashMap<String, EntryRef>, String> {
    let mut entries: HashMap<String, EntryRef> = HashMap::new();
    let mut log = Vec::new();
    for (u, unit) in units.iter().enumerate() {
        for (e, ep) in unit.module.entry_points.iter().enumerate() {
            if ep.stage != naga::ShaderStage::Compute {
                continue;
            }
            if let Some(prev) = entries.get(&ep.name) {
                log.push(format!(
                    "duplicate entry point `{}` in {} (first defined in {})",
                    ep.name, unit.name, units[prev.unit].name
                ));
                continue;
            }
            entries.insert(ep.name.clone(), EntryRef { unit: u, entry: e });
        }
    }
    if log.is_empty() {
        Ok(entries)
    } else {
        Err(log.join("\n"))
    }
}
