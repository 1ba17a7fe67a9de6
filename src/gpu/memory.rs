// gpu/memory.rs — device memory objects: textures and storage buffers.
//
// RESPONSIBILITIES
// ─────────────────
// 1. Map a pipeline argument (`MemoryDesc`: kind × channel format × size ×
//    usage) onto a `wgpu::Texture` or `wgpu::Buffer`.
// 2. Upload host data at creation through a staging buffer.
// 3. Read a memory object back to tightly packed host bytes.
//
// `MemoryDesc::access` is not consulted here. wgpu has no per-object access
// flag: read/write roles live in each kernel's binding declarations
// (`texture_storage_2d<_, write>`, `var<storage, read>`), and the object only
// needs the matching usage bits (`desc.usage`).
//
//
// FORMATS
// ────────
//   channel type        1 ch        2 ch        4 ch
//   UNORM_INT8          R8Unorm     Rg8Unorm    Rgba8Unorm
//   SNORM_INT8          R8Snorm     Rg8Snorm    Rgba8Snorm
//   UNORM_INT16         R16Unorm    Rg16Unorm   Rgba16Unorm
//   SNORM_INT16         R16Snorm    Rg16Snorm   Rgba16Snorm
//   (UN)SIGNED_INTn     R/Rg/Rgba n-bit Sint/Uint
//   HALF_FLOAT          R16Float    Rg16Float   Rgba16Float
//   FLOAT               R32Float    Rg32Float   Rgba32Float
//   UNORM_INT_101010_2              —           Rgb10a2Unorm
//
// 3-channel images never reach this table (they are widened to 4 before
// allocation). The 565/555/101010 packed types, IMAGE1D_ARRAY and PIPE have
// no wgpu counterpart and fail with an `Unsupported` device error.
//
//
// THE ROW-ALIGNMENT PROBLEM
// ──────────────────────────
// wgpu's buffer↔texture copies require `bytes_per_row` to be a multiple of
// 256. Host data is tightly packed, so uploads spread each row into a
// 256-aligned staging row and readbacks strip the padding again:
//
//   host (row = 12 bytes):   [r0........][r1........]
//   staging (row = 256):     [r0........ pad...][r1........ pad...]
//
//
// NEW RUST CONCEPTS
// ──────────────────
// - `Arc<T>` — kernels keep a clone of every memory object bound to them so
//   the bind group can be built at dispatch time. The device object is
//   released when the last clone is dropped.
// - `map_async` + `poll(Maintain::Wait)` — mapping a buffer for reading is
//   a request; the callback fires while the device is polled, and sends the
//   outcome through a channel to the waiting caller.

use std::sync::Arc;

use wgpu::util::DeviceExt;

use crate::backend::MemoryDesc;
use crate::error::{DeviceError, DeviceErrorKind};
use crate::format::{ArgKind, ChannelFormat, ChannelType};
use crate::gpu::device::GpuDevice;

/// Bytes-per-row alignment for buffer↔texture copies.
const COPY_ALIGNMENT: u32 = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;

// ---------------------------------------------------------------------------
// GpuMemory
// ---------------------------------------------------------------------------

pub(crate) enum Storage {
    Texture {
        texture: wgpu::Texture,
        view: wgpu::TextureView,
        format: wgpu::TextureFormat,
    },
    Buffer {
        buffer: wgpu::Buffer,
    },
}

pub(crate) struct MemoryObject {
    pub desc: MemoryDesc,
    pub storage: Storage,
}

/// A pipeline argument resident on the device. Cheap to clone.
#[derive(Clone)]
pub struct GpuMemory {
    pub(crate) inner: Arc<MemoryObject>,
}

impl GpuMemory {
    pub fn desc(&self) -> &MemoryDesc {
        &self.inner.desc
    }

    /// Texture format, `None` for buffers.
    pub fn texture_format(&self) -> Option<wgpu::TextureFormat> {
        match &self.inner.storage {
            Storage::Texture { format, .. } => Some(*format),
            Storage::Buffer { .. } => None,
        }
    }

    pub(crate) fn binding_resource(&self) -> wgpu::BindingResource<'_> {
        match &self.inner.storage {
            Storage::Texture { view, .. } => wgpu::BindingResource::TextureView(view),
            Storage::Buffer { buffer } => buffer.as_entire_binding(),
        }
    }

    // -----------------------------------------------------------------------
    // Creation
    // -----------------------------------------------------------------------

    /// Create the memory object described by `desc`, initialised from
    /// `data` when given (`data.len()` must equal `desc.byte_len()`).
    pub fn create(gpu: &GpuDevice, desc: &MemoryDesc, data: Option<&[u8]>) -> Result<Self, DeviceError> {
        let len = byte_len(desc)?;
        if let Some(bytes) = data {
            if bytes.len() != len {
                return Err(DeviceError::validation(
                    "create_memory",
                    format!("{}: {} bytes supplied, {len} expected", desc.label, bytes.len()),
                ));
            }
        }
        let storage = match desc.kind {
            ArgKind::Buffer => create_buffer(gpu, desc, data)?,
            ArgKind::Image1D | ArgKind::Image2D | ArgKind::Image3D | ArgKind::Image2DArray => {
                create_texture(gpu, desc, data)?
            }
            ArgKind::Image1DArray | ArgKind::Pipe => {
                return Err(DeviceError::unsupported(
                    "create_memory",
                    format!("{}: {} has no wgpu counterpart", desc.label, desc.kind),
                ))
            }
        };
        Ok(GpuMemory { inner: Arc::new(MemoryObject { desc: desc.clone(), storage }) })
    }

    // -----------------------------------------------------------------------
    // Readback
    // -----------------------------------------------------------------------

    /// Copy the object back to the host, tightly packed.
    ///
    /// Expensive and synchronous: waits for all previously submitted work.
    pub fn readback(&self, gpu: &GpuDevice) -> Result<Vec<u8>, DeviceError> {
        let desc = &self.inner.desc;
        let mut encoder = gpu.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("GpuMemory::readback"),
        });

        let (readback_buf, layout) = match &self.inner.storage {
            Storage::Buffer { buffer } => {
                let size = buffer.size();
                let readback_buf = readback_buffer(gpu, size);
                encoder.copy_buffer_to_buffer(buffer, 0, &readback_buf, 0, size);
                (readback_buf, None)
            }
            Storage::Texture { texture, .. } => {
                let layout = RowLayout::for_desc(desc)?;
                let readback_buf = readback_buffer(gpu, layout.staging_len() as u64);
                encoder.copy_texture_to_buffer(
                    wgpu::ImageCopyTexture {
                        texture,
                        mip_level: 0,
                        origin: wgpu::Origin3d::ZERO,
                        aspect: wgpu::TextureAspect::All,
                    },
                    wgpu::ImageCopyBuffer {
                        buffer: &readback_buf,
                        layout: layout.data_layout(),
                    },
                    texture.size(),
                );
                (readback_buf, Some(layout))
            }
        };
        gpu.queue.submit(std::iter::once(encoder.finish()));

        // Map the buffer — async in wgpu's API, we block via poll(Wait).
        let buf_slice = readback_buf.slice(..);
        let (sender, receiver) = std::sync::mpsc::channel();
        buf_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        gpu.device.poll(wgpu::Maintain::Wait);
        receiver
            .recv()
            .map_err(|_| DeviceError::new("read_memory", DeviceErrorKind::Other, "map callback never fired"))?
            .map_err(|e| DeviceError::new("read_memory", DeviceErrorKind::Other, e.to_string()))?;

        let mapped = buf_slice.get_mapped_range();
        let out = match layout {
            Some(layout) => layout.strip(&mapped),
            None => mapped
                .get(..byte_len(desc)?)
                .ok_or_else(|| DeviceError::validation("read_memory", format!("{}: buffer shorter than its extent", desc.label)))?
                .to_vec(),
        };
        drop(mapped);
        readback_buf.unmap();
        Ok(out)
    }
}

fn byte_len(desc: &MemoryDesc) -> Result<usize, DeviceError> {
    desc.byte_len()
        .ok_or_else(|| DeviceError::unsupported("create_memory", format!("{}: {} is too large", desc.label, desc.size)))
}

/// Narrow one extent axis to the `u32` wgpu takes.
fn axis_u32(desc: &MemoryDesc, n: usize) -> Result<u32, DeviceError> {
    u32::try_from(n)
        .map_err(|_| DeviceError::unsupported("create_memory", format!("{}: {} exceeds u32 extents", desc.label, desc.size)))
}

fn readback_buffer(gpu: &GpuDevice, size: u64) -> wgpu::Buffer {
    gpu.device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("GpuMemory::readback"),
        size,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

fn create_buffer(gpu: &GpuDevice, desc: &MemoryDesc, data: Option<&[u8]>) -> Result<Storage, DeviceError> {
    let mut usage = wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST;
    if desc.host_readable {
        usage |= wgpu::BufferUsages::COPY_SRC;
    }
    if desc.usage.uniform {
        usage |= wgpu::BufferUsages::UNIFORM;
    }
    let size = u64::try_from(byte_len(desc)?)
        .map_err(|_| DeviceError::unsupported("create_memory", format!("{}: buffer too large", desc.label)))?
        .next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT);
    let buffer = gpu.scoped("create_buffer", || match data {
        Some(contents) => gpu.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(&desc.label),
            contents,
            usage,
        }),
        None => gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(&desc.label),
            size,
            usage,
            mapped_at_creation: false,
        }),
    })?;
    Ok(Storage::Buffer { buffer })
}

fn create_texture(gpu: &GpuDevice, desc: &MemoryDesc, data: Option<&[u8]>) -> Result<Storage, DeviceError> {
    let format = texture_format(desc.format).ok_or_else(|| {
        DeviceError::unsupported(
            "create_memory",
            format!("{}: no texture format for {}", desc.label, desc.format),
        )
    })?;
    let (dimension, view_dimension) = dimensions(desc)?;
    let extent = wgpu::Extent3d {
        width: axis_u32(desc, desc.size.x)?,
        height: axis_u32(desc, desc.size.y)?,
        depth_or_array_layers: axis_u32(desc, desc.size.z)?,
    };

    // COPY_DST always: uploads need it, and wgpu rejects an empty usage set.
    let mut usage = wgpu::TextureUsages::COPY_DST;
    if desc.usage.sampled {
        usage |= wgpu::TextureUsages::TEXTURE_BINDING;
    }
    if desc.usage.storage {
        usage |= wgpu::TextureUsages::STORAGE_BINDING;
    }
    if desc.host_readable {
        usage |= wgpu::TextureUsages::COPY_SRC;
    }

    let texture = gpu.scoped("create_texture", || {
        gpu.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(&desc.label),
            size: extent,
            mip_level_count: 1,
            sample_count: 1,
            dimension,
            format,
            usage,
            view_formats: &[],
        })
    })?;
    let view = texture.create_view(&wgpu::TextureViewDescriptor {
        label: Some(&desc.label),
        dimension: Some(view_dimension),
        ..Default::default()
    });

    if let Some(bytes) = data {
        let layout = RowLayout::for_desc(desc)?;
        let staging = layout.pad(bytes);
        let staging_buf = gpu.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("GpuMemory::staging"),
            contents: &staging,
            usage: wgpu::BufferUsages::COPY_SRC,
        });
        let mut encoder = gpu.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("GpuMemory::upload"),
        });
        encoder.copy_buffer_to_texture(
            wgpu::ImageCopyBuffer { buffer: &staging_buf, layout: layout.data_layout() },
            wgpu::ImageCopyTexture {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            extent,
        );
        gpu.queue.submit(std::iter::once(encoder.finish()));
    }

    Ok(Storage::Texture { texture, view, format })
}

fn dimensions(desc: &MemoryDesc) -> Result<(wgpu::TextureDimension, wgpu::TextureViewDimension), DeviceError> {
    use wgpu::{TextureDimension as D, TextureViewDimension as V};
    let s = desc.size;
    let flat = |ok: bool| {
        if ok {
            Ok(())
        } else {
            Err(DeviceError::unsupported(
                "create_memory",
                format!("{}: {} cannot hold a {} extent", desc.label, desc.kind, s),
            ))
        }
    };
    match desc.kind {
        ArgKind::Image1D => flat(s.y == 1 && s.z == 1).map(|_| (D::D1, V::D1)),
        ArgKind::Image2D => flat(s.z == 1).map(|_| (D::D2, V::D2)),
        ArgKind::Image3D => Ok((D::D3, V::D3)),
        ArgKind::Image2DArray => Ok((D::D2, V::D2Array)),
        _ => flat(false).map(|_| (D::D1, V::D1)),
    }
}

// ---------------------------------------------------------------------------
// Formats
// ---------------------------------------------------------------------------

/// Texture format for a (device-side) channel format.
pub fn texture_format(format: ChannelFormat) -> Option<wgpu::TextureFormat> {
    use wgpu::TextureFormat as F;
    use ChannelType as T;
    let pick = |one, two, four| match format.channels {
        1 => Some(one),
        2 => Some(two),
        4 => Some(four),
        _ => None,
    };
    match format.channel_type {
        T::UnormInt8 => pick(F::R8Unorm, F::Rg8Unorm, F::Rgba8Unorm),
        T::SnormInt8 => pick(F::R8Snorm, F::Rg8Snorm, F::Rgba8Snorm),
        T::UnormInt16 => pick(F::R16Unorm, F::Rg16Unorm, F::Rgba16Unorm),
        T::SnormInt16 => pick(F::R16Snorm, F::Rg16Snorm, F::Rgba16Snorm),
        T::UnsignedInt8 => pick(F::R8Uint, F::Rg8Uint, F::Rgba8Uint),
        T::UnsignedInt16 => pick(F::R16Uint, F::Rg16Uint, F::Rgba16Uint),
        T::UnsignedInt32 => pick(F::R32Uint, F::Rg32Uint, F::Rgba32Uint),
        T::SignedInt8 => pick(F::R8Sint, F::Rg8Sint, F::Rgba8Sint),
        T::SignedInt16 => pick(F::R16Sint, F::Rg16Sint, F::Rgba16Sint),
        T::SignedInt32 => pick(F::R32Sint, F::Rg32Sint, F::Rgba32Sint),
        T::HalfFloat => pick(F::R16Float, F::Rg16Float, F::Rgba16Float),
        T::Float => pick(F::R32Float, F::Rg32Float, F::Rgba32Float),
        T::UnormInt101010_2 if format.channels == 4 => Some(F::Rgb10a2Unorm),
        T::UnormInt101010_2 | T::UnormShort565 | T::UnormShort555 | T::UnormInt101010 => None,
    }
}

// ---------------------------------------------------------------------------
// Row layout
// ---------------------------------------------------------------------------

/// Packed host rows vs 256-aligned staging rows for one texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RowLayout {
    row_bytes: u32,
    padded_row: u32,
    rows: u32,
    /// Depth slices or array layers.
    images: u32,
}

impl RowLayout {
    fn new(row_bytes: u32, rows: u32, images: u32) -> Self {
        RowLayout { row_bytes, padded_row: align_to(row_bytes, COPY_ALIGNMENT), rows, images }
    }

    fn for_desc(desc: &MemoryDesc) -> Result<Self, DeviceError> {
        let row_bytes = desc
            .size
            .x
            .checked_mul(desc.format.bytes_per_element())
            .and_then(|n| u32::try_from(n).ok())
            .filter(|&n| n <= u32::MAX - COPY_ALIGNMENT)
            .ok_or_else(|| DeviceError::unsupported("create_memory", format!("{}: row too wide", desc.label)))?;
        Ok(Self::new(row_bytes, axis_u32(desc, desc.size.y)?, axis_u32(desc, desc.size.z)?))
    }

    fn staging_len(&self) -> usize {
        self.padded_row as usize * self.rows as usize * self.images as usize
    }

    fn data_layout(&self) -> wgpu::ImageDataLayout {
        wgpu::ImageDataLayout {
            offset: 0,
            bytes_per_row: Some(self.padded_row),
            rows_per_image: Some(self.rows),
        }
    }

    /// Spread packed rows into aligned staging rows.
    fn pad(&self, packed: &[u8]) -> Vec<u8> {
        let row = self.row_bytes as usize;
        let padded = self.padded_row as usize;
        let mut staging = vec![0u8; self.staging_len()];
        for (src, dst) in packed.chunks_exact(row).zip(staging.chunks_exact_mut(padded)) {
            dst[..row].copy_from_slice(src);
        }
        staging
    }

    /// Collect the packed rows back out of aligned staging rows.
    fn strip(&self, staging: &[u8]) -> Vec<u8> {
        let row = self.row_bytes as usize;
        let padded = self.padded_row as usize;
        let mut packed = Vec::with_capacity(row * self.rows as usize * self.images as usize);
        for src in staging.chunks_exact(padded) {
            packed.extend_from_slice(&src[..row]);
        }
        packed
    }
}

/// Smallest multiple of `alignment` that is `>= value`.
pub(crate) fn align_to(value: u32, alignment: u32) -> u32 {
    value.div_ceil(alignment) * alignment
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
