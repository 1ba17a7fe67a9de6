// config.rs — everything one pipeline run needs, with defaults.
//
// The binary fills a `PlugboardConfig` from its command line; library users
// can build one directly. Defaults describe the repository layout:
//
//   images/input.png  →  MANIFEST.toml (kernels from kernel/src,
//                        includes from kernel/inc)  →  images/output.png

use std::path::PathBuf;

use crate::builder::BuildOptions;
use crate::gpu::DeviceProfile;

/// Configuration of one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlugboardConfig {
    /// PNG decoded into the pipeline's host input.
    pub input: PathBuf,
    /// PNG the output argument is written to.
    pub output: PathBuf,
    pub manifest: PathBuf,
    /// Directory holding `<kernel>.<extension>` sources.
    pub kernel_dir: PathBuf,
    pub build: BuildOptions,
    /// Channels the input image is decoded to (1..=4).
    pub input_channels: u8,
    pub profile: DeviceProfile,
}

impl Default for PlugboardConfig {
    fn default() -> Self {
        PlugboardConfig {
            input: PathBuf::from("images/input.png"),
            output: PathBuf::from("images/output.png"),
            manifest: PathBuf::from("MANIFEST.toml"),
            kernel_dir: PathBuf::from("kernel/src"),
            build: BuildOptions {
                include_dirs: vec![PathBuf::from("kernel/inc")],
                ..BuildOptions::default()
            },
            input_channels: 1,
            profile: DeviceProfile::Native,
        }
    }
}

/// Split a `NAME=VALUE` define. A bare `NAME` defines it as `1`.
pub fn parse_define(text: &str) -> Result<(String, String), String> {
    let (name, value) = text.split_once('=').unwrap_or((text, "1"));
    let name = name.trim();
    let valid = name
        .chars()
        .enumerate()
        .all(|(i, c)| c == '_' || c.is_ascii_alphabetic() || (i > 0 && c.is_ascii_digit()));
    if name.is_empty() || !valid {
        return Err(format!("invalid define name {name:?}"));
    }
    let value = value.trim();
    if value.is_empty() {
        return Err(format!("define {name} has an empty value"));
    }
    Ok((name.to_owned(), value.to_owned()))
}
