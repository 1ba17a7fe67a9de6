// main.rs — run one manifest-described pipeline over a PNG.
//
// Usage:
//   cargo run --release -- [INPUT] [OUTPUT] [--manifest PATH] [--kernel-dir DIR]
//                          [--include-dir DIR]... [--define NAME=VALUE]...
//                          [--channels N] [--profile native|raspberry-pi]
//
// Defaults: images/input.png → images/output.png, MANIFEST.toml, kernels
// from kernel/src, includes from kernel/inc, grayscale input.
//
// Exit code 0 on success; otherwise the failing `ErrorKind`'s ordinal, with
// the message on stderr. Logging goes to stderr, filtered by RUST_LOG
// (default `plugboard=info`).

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use plugboard::config::parse_define;
use plugboard::gpu::{DeviceProfile, GpuDevice};
use plugboard::{build_program, raster, Manifest, PipelineError, PlugboardConfig, ResourceLedger, RuntimeQueue};

#[derive(Parser)]
#[command(name = "plugboard")]
#[command(version, about = "Run a manifest-described pipeline of GPU compute kernels over a PNG")]
struct Cli {
    /// Input PNG.
    #[arg(value_name = "INPUT")]
    input: Option<PathBuf>,

    /// Output PNG.
    #[arg(value_name = "OUTPUT")]
    output: Option<PathBuf>,

    /// Pipeline manifest.
    #[arg(long, value_name = "PATH")]
    manifest: Option<PathBuf>,

    /// Directory holding <kernel>.wgsl sources.
    #[arg(long = "kernel-dir", value_name = "DIR")]
    kernel_dir: Option<PathBuf>,

    /// Extra directory searched by #include (repeatable).
    #[arg(long = "include-dir", value_name = "DIR")]
    include_dirs: Vec<PathBuf>,

    /// Constant visible to every kernel (repeatable).
    #[arg(long = "define", value_name = "NAME=VALUE", value_parser = parse_define)]
    defines: Vec<(String, String)>,

    /// Channels the input image is decoded to.
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=4))]
    channels: Option<u8>,

    /// Device limits to run under.
    #[arg(long, value_enum, default_value_t = Profile::Native)]
    profile: Profile,
}

#[derive(Clone, Copy, ValueEnum)]
enum Profile {
    Native,
    RaspberryPi,
}

impl Cli {
    fn into_config(self) -> PlugboardConfig {
        let mut config = PlugboardConfig::default();
        if let Some(input) = self.input {
            config.input = input;
        }
        if let Some(output) = self.output {
            config.output = output;
        }
        if let Some(manifest) = self.manifest {
            config.manifest = manifest;
        }
        if let Some(dir) = self.kernel_dir {
            config.kernel_dir = dir;
        }
        if let Some(channels) = self.channels {
            config.input_channels = channels;
        }
        config.build.include_dirs.extend(self.include_dirs);
        config.build.defines = self.defines;
        config.profile = match self.profile {
            Profile::Native => DeviceProfile::Native,
            Profile::RaspberryPi => DeviceProfile::RaspberryPi,
        };
        config
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("plugboard=info")))
        .with_writer(std::io::stderr)
        .init();

    let config = Cli::parse().into_config();
    match run(&config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(e.kind().code())
        }
    }
}

fn run(config: &PlugboardConfig) -> Result<(), PipelineError> {
    let input = raster::load_png(&config.input, config.input_channels)?;
    let inputs = [input];
    let manifest = Manifest::load(&config.manifest, &inputs)?;
    let model = &manifest.model;

    let gpu = GpuDevice::new_with_profile(config.profile).map_err(plugboard::DeviceError::from)?;
    let ledger = ResourceLedger::default();
    {
        let program = build_program(&gpu, &config.kernel_dir, model.kernel_names().iter(), &config.build, &ledger)?;
        let queue = RuntimeQueue::assemble(&gpu, &program, model, &inputs, &ledger)?;
        let output = queue.run(&gpu)?;
        raster::save_png(&config.output, &output)?;
        info!(
            output = %config.output.display(),
            size = %output.size,
            warnings = manifest.warnings.len() + queue.warnings().len(),
            "done"
        );
    }
    info!(live = ledger.live_total(), "resources released");
    Ok(())
}
