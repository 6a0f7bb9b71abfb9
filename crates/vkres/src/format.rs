//! Pixel formats, unpack state and the load functions that convert client
//! pixel data into the storage layout of a texture.

use ash::vk;
use byteorder::{ByteOrder, NativeEndian};
use half::f16;

use crate::error::{overflow, Result};

/// Byte distance between consecutive rows and consecutive depth slices.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Pitch {
    pub row: usize,
    pub depth: usize,
}

pub type LoadImageFunction =
    fn(extent: vk::Extent3D, input: &[u8], input_pitch: Pitch, output: &mut [u8], output_pitch: Pitch);

#[derive(Debug, Clone, Copy)]
pub struct LoadImageFunctionInfo {
    pub function: LoadImageFunction,
    /// The stored texel differs from the client texel.
    pub requires_conversion: bool,
}

/// A client-visible format and how it is stored on the device.
#[derive(Debug, Clone, Copy)]
pub struct Format {
    pub name: &'static str,
    pub texture_format: vk::Format,
    pub buffer_format: vk::Format,
    /// Bytes per texel in device storage.
    pub pixel_bytes: u32,
    /// Bytes per texel in client memory.
    pub source_pixel_bytes: u32,
    pub aspect: vk::ImageAspectFlags,
    pub load: LoadImageFunctionInfo,
}

impl PartialEq for Format {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.texture_format == other.texture_format
            && self.buffer_format == other.buffer_format
    }
}

impl Eq for Format {}

impl Format {
    pub const RGBA8: Format = Format {
        name: "RGBA8",
        texture_format: vk::Format::R8G8B8A8_UNORM,
        buffer_format: vk::Format::R8G8B8A8_UNORM,
        pixel_bytes: 4,
        source_pixel_bytes: 4,
        aspect: vk::ImageAspectFlags::COLOR,
        load: LoadImageFunctionInfo {
            function: load_copy::<4>,
            requires_conversion: false,
        },
    };

    /// Three-channel client data, stored with an opaque alpha channel.
    pub const RGB8: Format = Format {
        name: "RGB8",
        texture_format: vk::Format::R8G8B8A8_UNORM,
        buffer_format: vk::Format::R8G8B8_UNORM,
        pixel_bytes: 4,
        source_pixel_bytes: 3,
        aspect: vk::ImageAspectFlags::COLOR,
        load: LoadImageFunctionInfo {
            function: load_rgb8_to_rgba8,
            requires_conversion: true,
        },
    };

    pub const RGBA32F: Format = Format {
        name: "RGBA32F",
        texture_format: vk::Format::R32G32B32A32_SFLOAT,
        buffer_format: vk::Format::R32G32B32A32_SFLOAT,
        pixel_bytes: 16,
        source_pixel_bytes: 16,
        aspect: vk::ImageAspectFlags::COLOR,
        load: LoadImageFunctionInfo {
            function: load_copy::<16>,
            requires_conversion: false,
        },
    };

    /// Full-precision client floats stored as half floats.
    pub const RGBA16F_FROM_32F: Format = Format {
        name: "RGBA16F",
        texture_format: vk::Format::R16G16B16A16_SFLOAT,
        buffer_format: vk::Format::R16G16B16A16_SFLOAT,
        pixel_bytes: 8,
        source_pixel_bytes: 16,
        aspect: vk::ImageAspectFlags::COLOR,
        load: LoadImageFunctionInfo {
            function: load_rgba32f_to_rgba16f,
            requires_conversion: true,
        },
    };

    pub const D24S8: Format = Format {
        name: "D24S8",
        texture_format: vk::Format::D24_UNORM_S8_UINT,
        buffer_format: vk::Format::UNDEFINED,
        pixel_bytes: 4,
        source_pixel_bytes: 4,
        aspect: vk::ImageAspectFlags::from_raw(
            vk::ImageAspectFlags::DEPTH.as_raw() | vk::ImageAspectFlags::STENCIL.as_raw(),
        ),
        load: LoadImageFunctionInfo {
            function: load_copy::<4>,
            requires_conversion: false,
        },
    };

    pub const R16_UINT: Format = Format {
        name: "R16UI",
        texture_format: vk::Format::R16_UINT,
        buffer_format: vk::Format::R16_UINT,
        pixel_bytes: 2,
        source_pixel_bytes: 2,
        aspect: vk::ImageAspectFlags::COLOR,
        load: LoadImageFunctionInfo {
            function: load_copy::<2>,
            requires_conversion: false,
        },
    };

    pub const R32_UINT: Format = Format {
        name: "R32UI",
        texture_format: vk::Format::R32_UINT,
        buffer_format: vk::Format::R32_UINT,
        pixel_bytes: 4,
        source_pixel_bytes: 4,
        aspect: vk::ImageAspectFlags::COLOR,
        load: LoadImageFunctionInfo {
            function: load_copy::<4>,
            requires_conversion: false,
        },
    };

    pub fn has_depth_or_stencil(&self) -> bool {
        self.aspect
            .intersects(vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL)
    }
}

/// Client-side pixel unpack parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelUnpackState {
    pub alignment: u32,
    pub row_length: u32,
    pub image_height: u32,
    pub skip_rows: u32,
    pub skip_pixels: u32,
    pub skip_images: u32,
}

impl Default for PixelUnpackState {
    fn default() -> Self {
        Self {
            alignment: 4,
            row_length: 0,
            image_height: 0,
            skip_rows: 0,
            skip_pixels: 0,
            skip_images: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }
}

/// How a readback should lay pixels out in the destination memory.
#[derive(Debug, Clone, Copy)]
pub struct PackPixelsParams {
    pub area: Rect,
    pub format: Format,
    pub output_pitch: u32,
    /// Rows are written bottom-up.
    pub reverse_row_order: bool,
    pub offset: usize,
}

/// Intersects `source` with `clip`. Returns `None` when nothing is left.
pub fn clip_rectangle(source: Rect, clip: Rect) -> Option<Rect> {
    let x0 = source.x.max(clip.x);
    let y0 = source.y.max(clip.y);
    let x1 = source
        .x
        .saturating_add(source.width)
        .min(clip.x.saturating_add(clip.width));
    let y1 = source
        .y
        .saturating_add(source.height)
        .min(clip.y.saturating_add(clip.height));

    let clipped = Rect::new(x0, y0, x1 - x0, y1 - y0);
    (!clipped.is_empty()).then_some(clipped)
}

fn round_up(value: u32, alignment: u32) -> Option<u32> {
    if alignment <= 1 {
        return Some(value);
    }
    let rem = value % alignment;
    if rem == 0 {
        Some(value)
    } else {
        value.checked_add(alignment - rem)
    }
}

/// Bytes from one client row to the next.
pub fn compute_row_pitch(
    pixel_bytes: u32,
    width: u32,
    alignment: u32,
    row_length: u32,
) -> Result<u32> {
    let texels = if row_length > 0 { row_length } else { width };
    texels
        .checked_mul(pixel_bytes)
        .and_then(|bytes| round_up(bytes, alignment))
        .ok_or_else(|| overflow("row pitch"))
}

/// Bytes from one client image to the next.
pub fn compute_depth_pitch(height: u32, image_height: u32, row_pitch: u32) -> Result<u32> {
    let rows = if image_height > 0 { image_height } else { height };
    rows.checked_mul(row_pitch)
        .ok_or_else(|| overflow("depth pitch"))
}

/// Offset of the first texel selected by the skip parameters.
pub fn compute_skip_bytes(
    pixel_bytes: u32,
    row_pitch: u32,
    depth_pitch: u32,
    unpack: &PixelUnpackState,
    apply_skip_images: bool,
) -> Result<u32> {
    let images = if apply_skip_images {
        depth_pitch.checked_mul(unpack.skip_images)
    } else {
        Some(0)
    };
    images
        .and_then(|bytes| bytes.checked_add(row_pitch.checked_mul(unpack.skip_rows)?))
        .and_then(|bytes| bytes.checked_add(pixel_bytes.checked_mul(unpack.skip_pixels)?))
        .ok_or_else(|| overflow("skip bytes"))
}

#[allow(clippy::too_many_arguments)]
fn for_each_row(
    extent: vk::Extent3D,
    input: &[u8],
    input_pitch: Pitch,
    input_row_bytes: usize,
    output: &mut [u8],
    output_pitch: Pitch,
    output_row_bytes: usize,
    mut convert: impl FnMut(&[u8], &mut [u8]),
) {
    for z in 0..extent.depth as usize {
        for y in 0..extent.height as usize {
            let src = z * input_pitch.depth + y * input_pitch.row;
            let dst = z * output_pitch.depth + y * output_pitch.row;
            convert(
                &input[src..src + input_row_bytes],
                &mut output[dst..dst + output_row_bytes],
            );
        }
    }
}

/// Row-by-row copy of texels that need no conversion.
pub fn load_copy<const PIXEL_BYTES: usize>(
    extent: vk::Extent3D,
    input: &[u8],
    input_pitch: Pitch,
    output: &mut [u8],
    output_pitch: Pitch,
) {
    let row_bytes = extent.width as usize * PIXEL_BYTES;
    for_each_row(
        extent,
        input,
        input_pitch,
        row_bytes,
        output,
        output_pitch,
        row_bytes,
        |src, dst| dst.copy_from_slice(src),
    );
}

pub fn load_rgb8_to_rgba8(
    extent: vk::Extent3D,
    input: &[u8],
    input_pitch: Pitch,
    output: &mut [u8],
    output_pitch: Pitch,
) {
    let width = extent.width as usize;
    for_each_row(
        extent,
        input,
        input_pitch,
        width * 3,
        output,
        output_pitch,
        width * 4,
        |src, dst| {
            for (rgb, rgba) in src.chunks_exact(3).zip(dst.chunks_exact_mut(4)) {
                rgba[..3].copy_from_slice(rgb);
                rgba[3] = u8::MAX;
            }
        },
    );
}

pub fn load_rgba32f_to_rgba16f(
    extent: vk::Extent3D,
    input: &[u8],
    input_pitch: Pitch,
    output: &mut [u8],
    output_pitch: Pitch,
) {
    let width = extent.width as usize;
    for_each_row(
        extent,
        input,
        input_pitch,
        width * 16,
        output,
        output_pitch,
        width * 8,
        |src, dst| {
            for (channel, out) in src.chunks_exact(4).zip(dst.chunks_exact_mut(2)) {
                let value: f32 = bytemuck::pod_read_unaligned(channel);
                NativeEndian::write_u16(out, f16::from_f32(value).to_bits());
            }
        },
    );
}
