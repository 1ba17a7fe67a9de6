// raster.rs — PNG files in and out of the pipeline.
//
// The command-line driver feeds one PNG in as the pipeline's host input and
// writes the output argument back out as a PNG. Everything in between is
// format-agnostic; this is the only place pixels meet the file system.
//
// LOADING: the file is decoded to 8-bit samples and declared as an
// IMAGE2D of UNORM_INT8 with 1, 2, 3 or 4 channels. 3-channel data is
// stored as RGBA on the device, so it is decoded straight to RGBA8.
//
// SAVING: output elements are converted to 8-bit display values:
//
//   UNORM_INT8 / UNSIGNED_INT8       as is
//   UNORM_INT16                      high byte
//   SNORM_*                          negative → 0, [0, 1] → [0, 255]
//   FLOAT                            [0, 1] → [0, 255], clamped
//   (UN)SIGNED_INT16/32              raw value clamped to [0, 255]
//
// Half floats and the packed 16/32-bit layouts have no conversion and are
// rejected.

use std::path::Path;

use bytemuck::pod_read_unaligned;
use image::{ColorType, GenericImageView, ImageError, ImageFormat};
use tracing::debug;

use crate::error::{PipelineError, Result};
use crate::format::{ArgKind, ChannelFormat, ChannelType};
use crate::queue::Output;
use crate::size::Size3D;
use crate::staging::HostInput;

/// Name of the host input argument created by [`load_png`].
pub const INPUT_NAME: &str = "input";

/// Decode `path` into a host input with `channels` channels (clamped to
/// 1..=4).
pub fn load_png(path: &Path, channels: u8) -> Result<HostInput> {
    let decoded = image::open(path).map_err(|e| image_error(path, e))?;
    let (width, height) = decoded.dimensions();
    let (width, height) = (width as usize, height as usize);
    let channels = channels.clamp(1, 4);
    let data = match channels {
        1 => decoded.into_luma8().into_raw(),
        2 => decoded.into_luma_alpha8().into_raw(),
        _ => decoded.into_rgba8().into_raw(),
    };
    debug!(path = %path.display(), width, height, channels, "input decoded");
    Ok(HostInput::new(
        INPUT_NAME,
        ArgKind::Image2D,
        ChannelFormat::new(ChannelType::UnormInt8, channels),
        Size3D::new(width, height, 1),
        data,
    ))
}

/// Encode `output` as an 8-bit PNG at `path`.
pub fn save_png(path: &Path, output: &Output) -> Result<()> {
    let raster = |message: String| PipelineError::Raster { path: path.to_path_buf(), message };
    if output.size.z != 1 {
        return Err(raster(format!("cannot write a {} output as a 2D image", output.size)));
    }
    let color = match output.format.channels {
        1 => ColorType::L8,
        2 => ColorType::La8,
        3 => ColorType::Rgb8,
        4 => ColorType::Rgba8,
        n => return Err(raster(format!("no 8-bit color type with {n} channels"))),
    };
    let (Ok(width), Ok(height)) = (u32::try_from(output.size.x), u32::try_from(output.size.y)) else {
        return Err(raster(format!("{} exceeds the PNG dimension limit", output.size)));
    };
    let pixels = to_display(output).map_err(raster)?;
    image::save_buffer_with_format(
        path,
        &pixels,
        width,
        height,
        color,
        ImageFormat::Png,
    )
    .map_err(|e| image_error(path, e))?;
    debug!(path = %path.display(), size = %output.size, format = %output.format, "output written");
    Ok(())
}

/// Convert every sample of `output` to an 8-bit display value.
pub fn to_display(output: &Output) -> std::result::Result<Vec<u8>, String> {
    let ty = output.format.channel_type;
    if matches!(ty, ChannelType::HalfFloat) || ty.is_packed() {
        return Err(format!("no 8-bit conversion for {}", ty.name()));
    }
    let expected = output
        .size
        .volume()
        .and_then(|n| n.checked_mul(output.format.bytes_per_element()));
    match expected {
        Some(n) if n == output.bytes.len() => {}
        Some(n) => {
            return Err(format!(
                "{} bytes read back, {} {} needs {n}",
                output.bytes.len(),
                output.size,
                output.format
            ))
        }
        None => return Err(format!("{} {} is too large to convert", output.size, output.format)),
    }
    Ok(output.bytes.chunks_exact(ty.unit_bytes()).map(|b| sample_to_u8(ty, b)).collect())
}

fn sample_to_u8(ty: ChannelType, b: &[u8]) -> u8 {
    match ty {
        ChannelType::UnormInt8 | ChannelType::UnsignedInt8 => b[0],
        ChannelType::SignedInt8 => clamp_raw(i64::from(b[0] as i8)),
        ChannelType::SnormInt8 => unorm(f32::from(b[0] as i8) / 127.0),
        ChannelType::UnormInt16 => (pod_read_unaligned::<u16>(b) >> 8) as u8,
        ChannelType::SnormInt16 => unorm(f32::from(pod_read_unaligned::<i16>(b)) / 32767.0),
        ChannelType::UnsignedInt16 => clamp_raw(i64::from(pod_read_unaligned::<u16>(b))),
        ChannelType::SignedInt16 => clamp_raw(i64::from(pod_read_unaligned::<i16>(b))),
        ChannelType::UnsignedInt32 => clamp_raw(i64::from(pod_read_unaligned::<u32>(b))),
        ChannelType::SignedInt32 => clamp_raw(i64::from(pod_read_unaligned::<i32>(b))),
        ChannelType::Float => unorm(pod_read_unaligned::<f32>(b)),
        // Rejected by `to_display`.
        _ => 0,
    }
}

/// [0, 1] → [0, 255], clamped and rounded.
fn unorm(v: f32) -> u8 {
    (v * 255.0).clamp(0.0, 255.0).round() as u8
}

fn clamp_raw(v: i64) -> u8 {
    v.clamp(0, 255) as u8
}

fn image_error(path: &Path, e: ImageError) -> PipelineError {
    match e {
        ImageError::IoError(io) => PipelineError::file(path, io),
        other => PipelineError::Raster { path: path.to_path_buf(), message: other.to_string() },
    }
}
