// builder.rs — kernel sources → one linked program.
//
// Each kernel named by the pipeline lives in its own file,
// `<source_dir>/<name>.<extension>`, and is compiled as an independent
// translation unit. Compiling per file keeps diagnostics attributable: a
// failure names the file and carries the compiler's log verbatim. Once every
// unit compiles they are linked into a single program from which all kernels
// are created by name.
//
// PREPROCESSING:
// WGSL has no preprocessor, so the builder provides the two features kernel
// sources rely on:
//
//   #include "hsv.wgsl"        replaced by the file's (preprocessed) text,
//                              searched in the unit's directory, then each
//                              include dir in order
//   defines (NAME, VALUE)      emitted as `const NAME = VALUE;` lines ahead
//                              of the unit's source
//
// Includes nest up to `MAX_INCLUDE_DEPTH`; deeper chains (usually a cycle)
// are a build failure for the unit.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::backend::ComputeBackend;
use crate::error::{PipelineError, Result};
use crate::lifecycle::{ResourceClass, ResourceLedger, Tracked};

const MAX_INCLUDE_DEPTH: usize = 8;

/// Compile-time options applied to every unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOptions {
    /// Source file extension, without the dot.
    pub extension: String,
    pub include_dirs: Vec<PathBuf>,
    pub defines: Vec<(String, String)>,
}

impl Default for BuildOptions {
    fn default() -> Self {
        BuildOptions {
            extension: "wgsl".to_owned(),
            include_dirs: Vec::new(),
            defines: Vec::new(),
        }
    }
}

/// Compile every named kernel's source file and link the results.
pub fn build_program<B, I, S>(
    backend: &B,
    source_dir: &Path,
    kernel_names: I,
    options: &BuildOptions,
    ledger: &ResourceLedger,
) -> Result<Tracked<B::Program>>
where
    B: ComputeBackend,
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut units = Vec::new();
    for name in kernel_names {
        let file_name = format!("{}.{}", name.as_ref(), options.extension);
        let path = source_dir.join(&file_name);
        let source = preprocess(&path, options)?;
        debug!(unit = %file_name, bytes = source.len(), "compiling");
        let unit = backend
            .compile(&file_name, &source)
            .map_err(|log| PipelineError::KernelBuildFailed { unit: file_name.clone(), log })?;
        units.push(unit);
    }

    let count = units.len();
    let program = backend
        .link(units)
        .map_err(|log| PipelineError::KernelBuildFailed { unit: "<link>".to_owned(), log })?;
    info!(units = count, "program linked");
    Ok(ledger.track(ResourceClass::Program, "program", program))
}

/// Read `path` and apply defines and includes.
pub fn preprocess(path: &Path, options: &BuildOptions) -> Result<String> {
    let mut out = String::new();
    for (name, value) in &options.defines {
        out.push_str(&format!("const {name} = {value};\n"));
    }
    expand(path, options, 0, &mut out)?;
    Ok(out)
}

fn expand(path: &Path, options: &BuildOptions, depth: usize, out: &mut String) -> Result<()> {
    let text = std::fs::read_to_string(path).map_err(|e| PipelineError::file(path, e))?;
    let dir = path.parent().unwrap_or(Path::new("."));

    for line in text.lines() {
        let Some(target) = include_target(line) else {
            out.push_str(line);
            out.push('\n');
            continue;
        };
        if depth + 1 >= MAX_INCLUDE_DEPTH {
            return Err(PipelineError::KernelBuildFailed {
                unit: path.display().to_string(),
                log: format!("#include \"{target}\" nested deeper than {MAX_INCLUDE_DEPTH} levels"),
            });
        }
        let found = std::iter::once(dir)
            .chain(options.include_dirs.iter().map(PathBuf::as_path))
            .map(|d| d.join(target))
            .find(|p| p.is_file());
        match found {
            Some(included) => expand(&included, options, depth + 1, out)?,
            None => {
                let missing = dir.join(target);
                return Err(PipelineError::file(
                    missing,
                    std::io::Error::new(std::io::ErrorKind::NotFound, "include not found in any include dir"),
                ));
            }
        }
    }
    Ok(())
}

/// `#include "name"` → `Some("name")`.
fn include_target(line: &str) -> Option<&str> {
    line.trim()
        .strip_prefix("#include")?
        .trim()
        .strip_prefix('"')?
        .strip_suffix('"')
}
