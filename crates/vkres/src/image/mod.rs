//! Images, their layout state and the queue of staged subresource uploads.

pub mod layout;
pub mod update;

pub use layout::{ImageLayout, ImageMemoryBarrierData};
pub use update::SubresourceUpdate;

use ash::vk;
use tracing::{debug, warn};

use crate::buffer::{DynamicAllocation, DynamicBuffer};
use crate::command::{CommandRecorder, ImageBarrier};
use crate::context::{Context, Device, GarbageObject};
use crate::error::{overflow, ResourceError, Result};
use crate::format::{
    clip_rectangle, compute_depth_pitch, compute_row_pitch, compute_skip_bytes, Format,
    PackPixelsParams, Pitch, PixelUnpackState, Rect,
};
use crate::memory::allocate_image_memory;
use crate::serial::{ResourceUse, Serial};

/// `vkCmdCopyBufferToImage` needs buffer offsets that are a multiple of 4.
const STAGING_ALIGNMENT: usize = 4;

const CUBE_FACE_COUNT: u32 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureType {
    TwoD,
    TwoDArray,
    ThreeD,
    CubeMap,
    External,
    Rectangle,
}

impl TextureType {
    pub fn image_type(self) -> vk::ImageType {
        match self {
            TextureType::ThreeD => vk::ImageType::TYPE_3D,
            _ => vk::ImageType::TYPE_2D,
        }
    }

    pub fn view_type(self) -> vk::ImageViewType {
        match self {
            TextureType::TwoD | TextureType::External | TextureType::Rectangle => {
                vk::ImageViewType::TYPE_2D
            }
            TextureType::TwoDArray => vk::ImageViewType::TYPE_2D_ARRAY,
            TextureType::ThreeD => vk::ImageViewType::TYPE_3D,
            TextureType::CubeMap => vk::ImageViewType::CUBE,
        }
    }

    pub fn create_flags(self) -> vk::ImageCreateFlags {
        match self {
            TextureType::CubeMap => vk::ImageCreateFlags::CUBE_COMPATIBLE,
            _ => vk::ImageCreateFlags::empty(),
        }
    }

    pub fn accepts_layer_count(self, layer_count: u32) -> bool {
        match self {
            TextureType::CubeMap => layer_count == CUBE_FACE_COUNT,
            TextureType::ThreeD | TextureType::External | TextureType::Rectangle => {
                layer_count == 1
            }
            TextureType::TwoD | TextureType::TwoDArray => layer_count >= 1,
        }
    }
}

/// Addresses one mip level and, for layered images, a run of layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageIndex {
    pub level: u32,
    pub layer: Option<u32>,
    pub layer_count: u32,
}

impl ImageIndex {
    pub fn level(level: u32) -> Self {
        Self {
            level,
            layer: None,
            layer_count: 1,
        }
    }

    pub fn layers(level: u32, layer: u32, layer_count: u32) -> Self {
        Self {
            level,
            layer: Some(layer),
            layer_count,
        }
    }

    fn dst_subresource(&self) -> vk::ImageSubresourceLayers {
        vk::ImageSubresourceLayers {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            mip_level: self.level,
            base_array_layer: self.layer.unwrap_or(0),
            layer_count: self.layer_count,
        }
    }
}

/// Something a framebuffer copy can read pixels back from.
pub trait ReadbackSource {
    fn read_extents(&self) -> vk::Extent2D;

    /// Rows are stored bottom-up relative to the client's view.
    fn is_viewport_flipped(&self) -> bool;

    /// Reads `area` into `dest` laid out per `params`. May block on the device.
    fn read_pixels(
        &mut self,
        ctx: &mut dyn Context,
        area: Rect,
        params: &PackPixelsParams,
        dest: &mut [u8],
    ) -> Result<()>;
}

/// An image with its memory, the layout it was last transitioned to, and the
/// uploads waiting to be recorded into it.
#[derive(Debug)]
pub struct ImageHelper {
    image: vk::Image,
    memory: vk::DeviceMemory,
    extent: vk::Extent3D,
    format: Option<Format>,
    samples: vk::SampleCountFlags,
    current_layout: ImageLayout,
    layer_count: u32,
    level_count: u32,
    staging_buffer: DynamicBuffer,
    subresource_updates: Vec<SubresourceUpdate>,
    resource_use: ResourceUse,
    undrained_flushes: usize,
}

impl ImageHelper {
    pub fn new(ctx: &dyn Context) -> Self {
        let mut staging_buffer = DynamicBuffer::new(
            vk::BufferUsageFlags::TRANSFER_SRC | vk::BufferUsageFlags::TRANSFER_DST,
            ctx.config().staging_buffer_size,
            true,
        );
        staging_buffer.init(STAGING_ALIGNMENT, ctx.device().limits());

        Self {
            image: vk::Image::null(),
            memory: vk::DeviceMemory::null(),
            extent: vk::Extent3D::default(),
            format: None,
            samples: vk::SampleCountFlags::TYPE_1,
            current_layout: ImageLayout::Undefined,
            layer_count: 0,
            level_count: 0,
            staging_buffer,
            subresource_updates: Vec::new(),
            resource_use: ResourceUse::default(),
            undrained_flushes: 0,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn init(
        &mut self,
        device: &dyn Device,
        texture_type: TextureType,
        extent: vk::Extent3D,
        format: &Format,
        samples: vk::SampleCountFlags,
        usage: vk::ImageUsageFlags,
        mip_levels: u32,
        layer_count: u32,
    ) -> Result<()> {
        debug_assert!(!self.valid(), "image initialized twice");
        debug_assert!(
            texture_type.accepts_layer_count(layer_count),
            "{texture_type:?} with {layer_count} layers"
        );

        let image_info = vk::ImageCreateInfo::default()
            .flags(texture_type.create_flags())
            .image_type(texture_type.image_type())
            .format(format.texture_format)
            .extent(vk::Extent3D {
                depth: if texture_type == TextureType::ThreeD {
                    extent.depth
                } else {
                    1
                },
                ..extent
            })
            .mip_levels(mip_levels)
            .array_layers(layer_count)
            .samples(samples)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        self.image = device.create_image(&image_info)?;

        self.extent = extent;
        self.format = Some(*format);
        self.samples = samples;
        self.layer_count = layer_count;
        self.level_count = mip_levels;
        self.current_layout = ImageLayout::Undefined;
        Ok(())
    }

    /// Allocates and binds memory with at least `flags`.
    pub fn init_memory(
        &mut self,
        device: &dyn Device,
        flags: vk::MemoryPropertyFlags,
    ) -> Result<vk::MemoryPropertyFlags> {
        match allocate_image_memory(device, flags, self.image) {
            Ok((memory, obtained)) => {
                self.memory = memory;
                Ok(obtained)
            }
            Err(err) => {
                // An image without memory is unusable.
                device.destroy_image(self.image);
                self.image = vk::Image::null();
                self.layer_count = 0;
                self.level_count = 0;
                Err(err)
            }
        }
    }

    pub fn init_image_view(
        &self,
        device: &dyn Device,
        texture_type: TextureType,
        aspect_mask: vk::ImageAspectFlags,
        swizzle: vk::ComponentMapping,
        base_mip_level: u32,
        level_count: u32,
    ) -> Result<vk::ImageView> {
        self.init_layer_image_view(
            device,
            texture_type,
            aspect_mask,
            swizzle,
            base_mip_level,
            level_count,
            0,
            self.layer_count,
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn init_layer_image_view(
        &self,
        device: &dyn Device,
        texture_type: TextureType,
        aspect_mask: vk::ImageAspectFlags,
        swizzle: vk::ComponentMapping,
        base_mip_level: u32,
        level_count: u32,
        base_array_layer: u32,
        layer_count: u32,
    ) -> Result<vk::ImageView> {
        let format = self.format.map_or(vk::Format::UNDEFINED, |f| f.texture_format);
        let view_info = vk::ImageViewCreateInfo::default()
            .image(self.image)
            .view_type(texture_type.view_type())
            .format(format)
            .components(swizzle)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask,
                base_mip_level,
                level_count,
                base_array_layer,
                layer_count,
            });
        device.create_image_view(&view_info)
    }

    /// Wraps an image owned elsewhere, such as a swapchain image.
    ///
    /// Call [`reset_image_weak_reference`](Self::reset_image_weak_reference)
    /// before releasing or destroying the helper.
    pub fn init_2d_weak_reference(
        &mut self,
        handle: vk::Image,
        extent: vk::Extent3D,
        format: &Format,
    ) {
        debug_assert!(!self.valid());
        self.image = handle;
        self.extent = extent;
        self.format = Some(*format);
        self.samples = vk::SampleCountFlags::TYPE_1;
        self.current_layout = ImageLayout::Undefined;
        self.layer_count = 1;
        self.level_count = 1;
    }

    pub fn reset_image_weak_reference(&mut self) {
        self.image = vk::Image::null();
    }

    /// Creates a single-level device-local 2D image used as a copy source.
    pub fn init_2d_staging(
        &mut self,
        device: &dyn Device,
        extent: vk::Extent3D,
        format: &Format,
        usage: vk::ImageUsageFlags,
        layer_count: u32,
    ) -> Result<()> {
        self.init(
            device,
            TextureType::TwoD,
            extent,
            format,
            vk::SampleCountFlags::TYPE_1,
            usage,
            1,
            layer_count,
        )?;
        self.init_memory(device, vk::MemoryPropertyFlags::DEVICE_LOCAL)?;
        Ok(())
    }

    pub fn valid(&self) -> bool {
        self.image != vk::Image::null()
    }

    pub fn image(&self) -> vk::Image {
        self.image
    }

    pub fn memory(&self) -> vk::DeviceMemory {
        self.memory
    }

    pub fn extent(&self) -> vk::Extent3D {
        self.extent
    }

    pub fn format(&self) -> Option<&Format> {
        self.format.as_ref()
    }

    pub fn samples(&self) -> vk::SampleCountFlags {
        self.samples
    }

    pub fn layer_count(&self) -> u32 {
        self.layer_count
    }

    pub fn level_count(&self) -> u32 {
        self.level_count
    }

    pub fn current_layout(&self) -> ImageLayout {
        self.current_layout
    }

    pub fn aspect_flags(&self) -> vk::ImageAspectFlags {
        self.format
            .map_or(vk::ImageAspectFlags::COLOR, |format| format.aspect)
    }

    /// Extent of mip `level`; each level halves the one above, down to 1.
    pub fn size(&self, level: u32) -> vk::Extent3D {
        debug_assert_eq!(self.extent.depth, 1);
        vk::Extent3D {
            width: self.extent.width.checked_shr(level).unwrap_or(0).max(1),
            height: self.extent.height.checked_shr(level).unwrap_or(0).max(1),
            depth: self.extent.depth,
        }
    }

    pub fn queue_serial(&self) -> Serial {
        self.resource_use.serial()
    }

    fn record_use(&mut self, cmd: &dyn CommandRecorder) {
        self.resource_use.update(cmd.queue_serial());
    }

    /// Transitions every level and layer to `new_layout`.
    pub fn change_layout(
        &mut self,
        aspect_mask: vk::ImageAspectFlags,
        new_layout: ImageLayout,
        cmd: &mut dyn CommandRecorder,
    ) {
        let range = vk::ImageSubresourceRange {
            aspect_mask,
            base_mip_level: 0,
            level_count: self.level_count,
            base_array_layer: 0,
            layer_count: self.layer_count,
        };
        self.change_layout_range(range, new_layout, cmd);
    }

    /// Transitions `range` to `new_layout`. Read-after-read in the same layout
    /// records nothing.
    pub fn change_layout_range(
        &mut self,
        range: vk::ImageSubresourceRange,
        new_layout: ImageLayout,
        cmd: &mut dyn CommandRecorder,
    ) {
        if !self.current_layout.needs_transition_to(new_layout) {
            return;
        }

        let from = self.current_layout.data();
        let to = new_layout.data();
        cmd.pipeline_barrier(
            from.src_stage_mask,
            to.dst_stage_mask,
            &[],
            &[ImageBarrier {
                src_access_mask: from.src_access_mask,
                dst_access_mask: to.dst_access_mask,
                old_layout: from.layout,
                new_layout: to.layout,
                image: self.image,
                subresource_range: range,
            }],
        );

        self.current_layout = new_layout;
        self.record_use(cmd);
    }

    pub fn clear_color(
        &mut self,
        color: &vk::ClearColorValue,
        base_mip_level: u32,
        level_count: u32,
        cmd: &mut dyn CommandRecorder,
    ) {
        let layer_count = self.layer_count;
        self.clear_color_layer(color, base_mip_level, level_count, 0, layer_count, cmd);
    }

    pub fn clear_color_layer(
        &mut self,
        color: &vk::ClearColorValue,
        base_mip_level: u32,
        level_count: u32,
        base_array_layer: u32,
        layer_count: u32,
        cmd: &mut dyn CommandRecorder,
    ) {
        debug_assert!(self.valid());
        self.change_layout(vk::ImageAspectFlags::COLOR, ImageLayout::TransferDst, cmd);

        let range = vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level,
            level_count,
            base_array_layer,
            layer_count,
        };
        cmd.clear_color_image(self.image, self.current_layout.vk_layout(), color, &[range]);
        self.record_use(cmd);
    }

    /// Clears `clear_aspect_flags` of the first level and layer.
    pub fn clear_depth_stencil(
        &mut self,
        image_aspect_flags: vk::ImageAspectFlags,
        clear_aspect_flags: vk::ImageAspectFlags,
        value: &vk::ClearDepthStencilValue,
        cmd: &mut dyn CommandRecorder,
    ) {
        debug_assert!(self.valid());
        self.change_layout(image_aspect_flags, ImageLayout::TransferDst, cmd);

        let range = vk::ImageSubresourceRange {
            aspect_mask: clear_aspect_flags,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        };
        cmd.clear_depth_stencil_image(self.image, self.current_layout.vk_layout(), value, &[range]);
        self.record_use(cmd);
    }

    /// Copies a region of the first level and layer of `src` into `dst`.
    #[allow(clippy::too_many_arguments)]
    pub fn copy(
        src: &mut ImageHelper,
        dst: &mut ImageHelper,
        src_offset: vk::Offset3D,
        dst_offset: vk::Offset3D,
        extent: vk::Extent3D,
        aspect_mask: vk::ImageAspectFlags,
        cmd: &mut dyn CommandRecorder,
    ) {
        debug_assert!(src.valid() && dst.valid());

        src.change_layout(src.aspect_flags(), ImageLayout::TransferSrc, cmd);
        dst.change_layout(dst.aspect_flags(), ImageLayout::TransferDst, cmd);

        let layers = vk::ImageSubresourceLayers {
            aspect_mask,
            mip_level: 0,
            base_array_layer: 0,
            layer_count: 1,
        };
        let region = vk::ImageCopy {
            src_subresource: layers,
            src_offset,
            dst_subresource: layers,
            dst_offset,
            extent,
        };
        cmd.copy_image(
            src.image,
            src.current_layout.vk_layout(),
            dst.image,
            dst.current_layout.vk_layout(),
            &[region],
        );
        src.record_use(cmd);
        dst.record_use(cmd);
    }

    /// Fills levels `1..=max_level` by successive linear blits from the level
    /// above. Leaves every level in `TransferSrc`.
    pub fn generate_mipmaps_with_blit(&mut self, max_level: u32, cmd: &mut dyn CommandRecorder) {
        self.change_layout(vk::ImageAspectFlags::COLOR, ImageLayout::TransferDst, cmd);

        let level_barrier = |level: u32| ImageBarrier {
            src_access_mask: vk::AccessFlags::TRANSFER_WRITE,
            dst_access_mask: vk::AccessFlags::TRANSFER_READ,
            old_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            new_layout: vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            image: self.image,
            subresource_range: vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: level,
                level_count: 1,
                base_array_layer: 0,
                layer_count: self.layer_count,
            },
        };
        let subresource = |level: u32| vk::ImageSubresourceLayers {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            mip_level: level,
            base_array_layer: 0,
            layer_count: self.layer_count,
        };

        let mut width = self.extent.width as i32;
        let mut height = self.extent.height as i32;
        for level in 1..=max_level {
            let next_width = (width >> 1).max(1);
            let next_height = (height >> 1).max(1);

            cmd.pipeline_barrier(
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::TRANSFER,
                &[],
                &[level_barrier(level - 1)],
            );

            let blit = vk::ImageBlit {
                src_subresource: subresource(level - 1),
                src_offsets: [
                    vk::Offset3D::default(),
                    vk::Offset3D {
                        x: width,
                        y: height,
                        z: 1,
                    },
                ],
                dst_subresource: subresource(level),
                dst_offsets: [
                    vk::Offset3D::default(),
                    vk::Offset3D {
                        x: next_width,
                        y: next_height,
                        z: 1,
                    },
                ],
            };
            cmd.blit_image(
                self.image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                self.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[blit],
                vk::Filter::LINEAR,
            );

            width = next_width;
            height = next_height;
        }

        // The last level was only written; bring it in line with the others.
        cmd.pipeline_barrier(
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::TRANSFER,
            &[],
            &[level_barrier(max_level)],
        );
        self.current_layout = ImageLayout::TransferSrc;
        self.record_use(cmd);
    }

    /// Hands the image and its memory to deferred destruction.
    pub fn release_image(&mut self, ctx: &mut dyn Context) {
        let serial = self.resource_use.serial();
        if self.image != vk::Image::null() {
            ctx.release_object(serial, GarbageObject::Image(self.image));
        }
        if self.memory != vk::DeviceMemory::null() {
            ctx.release_object(serial, GarbageObject::DeviceMemory(self.memory));
        }
        self.image = vk::Image::null();
        self.memory = vk::DeviceMemory::null();
    }

    /// Drops updates that never reached the image and releases staging memory.
    pub fn release_staging_buffer(&mut self, ctx: &mut dyn Context) {
        for update in self.subresource_updates.drain(..) {
            update.release(ctx);
        }
        self.staging_buffer.release(ctx);
    }

    /// Immediate teardown of everything the helper owns.
    pub fn destroy(&mut self, device: &dyn Device) {
        if self.image != vk::Image::null() {
            device.destroy_image(self.image);
        }
        if self.memory != vk::DeviceMemory::null() {
            device.free_memory(self.memory);
        }
        self.image = vk::Image::null();
        self.memory = vk::DeviceMemory::null();
        self.current_layout = ImageLayout::Undefined;
        self.layer_count = 0;
        self.level_count = 0;

        for update in self.subresource_updates.drain(..) {
            if let SubresourceUpdate::Image { mut image, .. } = update {
                image.destroy(device);
            }
        }
        self.staging_buffer.destroy(device);
    }

    /// Discards staged updates aimed at exactly `index`'s level and first layer.
    pub fn remove_staged_updates(&mut self, ctx: &mut dyn Context, index: &ImageIndex) {
        let layer = index.layer.unwrap_or(0);
        let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.subresource_updates)
            .into_iter()
            .partition(|update| update.is_update_to_layer_level(layer, index.level));
        self.subresource_updates = kept;
        for update in removed {
            update.release(ctx);
        }
    }

    /// Converts client pixels into staging memory and queues the copy.
    #[allow(clippy::too_many_arguments)]
    pub fn stage_subresource_update(
        &mut self,
        ctx: &dyn Context,
        index: &ImageIndex,
        extent: vk::Extent3D,
        offset: vk::Offset3D,
        format: &Format,
        unpack: &PixelUnpackState,
        pixels: &[u8],
    ) -> Result<()> {
        let input_row_pitch = compute_row_pitch(
            format.source_pixel_bytes,
            extent.width,
            unpack.alignment,
            unpack.row_length,
        )?;
        let input_depth_pitch =
            compute_depth_pitch(extent.height, unpack.image_height, input_row_pitch)?;
        let skip_bytes = compute_skip_bytes(
            format.source_pixel_bytes,
            input_row_pitch,
            input_depth_pitch,
            unpack,
            false,
        )? as usize;

        let needed = required_input_bytes(
            extent,
            format.source_pixel_bytes as usize,
            input_row_pitch as usize,
            input_depth_pitch as usize,
        )
        .and_then(|bytes| bytes.checked_add(skip_bytes))
        .ok_or_else(|| overflow("pixel upload size"))?;
        if pixels.len() < needed {
            return Err(ResourceError::PixelDataTooSmall {
                needed,
                provided: pixels.len(),
            });
        }

        let output_row_pitch = (format.pixel_bytes as usize)
            .checked_mul(extent.width as usize)
            .ok_or_else(|| overflow("staging row pitch"))?;
        let output_depth_pitch = output_row_pitch
            .checked_mul(extent.height as usize)
            .ok_or_else(|| overflow("staging depth pitch"))?;
        let allocation_size = output_depth_pitch
            .checked_mul(extent.depth as usize)
            .ok_or_else(|| overflow("staging allocation size"))?;

        let allocation = self.staging_buffer.allocate(ctx, allocation_size)?;
        let (buffer, buffer_offset) = (allocation.buffer, allocation.offset);
        (format.load.function)(
            extent,
            &pixels[skip_bytes..],
            Pitch {
                row: input_row_pitch as usize,
                depth: input_depth_pitch as usize,
            },
            staging_slice(allocation.data)?,
            Pitch {
                row: output_row_pitch,
                depth: output_depth_pitch,
            },
        );

        let copy_region = vk::BufferImageCopy {
            buffer_offset,
            buffer_row_length: extent.width,
            buffer_image_height: extent.height,
            image_subresource: index.dst_subresource(),
            image_offset: offset,
            image_extent: extent,
        };
        self.subresource_updates
            .push(SubresourceUpdate::Buffer { buffer, copy_region });
        Ok(())
    }

    /// Queues a copy from `allocation_size` staging bytes and hands the caller
    /// the memory to fill in.
    pub fn stage_subresource_update_and_get_data(
        &mut self,
        ctx: &dyn Context,
        allocation_size: usize,
        index: &ImageIndex,
        extent: vk::Extent3D,
        offset: vk::Offset3D,
    ) -> Result<&mut [u8]> {
        let allocation = self.staging_buffer.allocate(ctx, allocation_size)?;
        let copy_region = vk::BufferImageCopy {
            buffer_offset: allocation.offset,
            buffer_row_length: extent.width,
            buffer_image_height: extent.height,
            image_subresource: index.dst_subresource(),
            image_offset: offset,
            image_extent: extent,
        };
        self.subresource_updates.push(SubresourceUpdate::Buffer {
            buffer: allocation.buffer,
            copy_region,
        });
        staging_slice(allocation.data)
    }

    /// Reads `source_area` of a framebuffer back into staging memory and
    /// queues its upload. Areas entirely outside the framebuffer are ignored.
    #[allow(clippy::too_many_arguments)]
    pub fn stage_subresource_update_from_framebuffer(
        &mut self,
        ctx: &mut dyn Context,
        index: &ImageIndex,
        source_area: Rect,
        dst_offset: vk::Offset3D,
        dst_extent: vk::Extent3D,
        format: &Format,
        source: &mut dyn ReadbackSource,
    ) -> Result<()> {
        let read_extents = source.read_extents();
        let bounds = Rect::new(
            0,
            0,
            read_extents.width as i32,
            read_extents.height as i32,
        );
        let Some(mut clipped) = clip_rectangle(source_area, bounds) else {
            debug!(?source_area, "framebuffer copy clipped away");
            return Ok(());
        };

        let flipped = source.is_viewport_flipped();
        if flipped {
            clipped.y = bounds.height - clipped.y - clipped.height;
        }

        let output_row_pitch = format.pixel_bytes as usize * clipped.width as usize;
        let allocation_size = output_row_pitch * clipped.height as usize;

        let allocation = self.staging_buffer.allocate(&*ctx, allocation_size)?;
        let (buffer, buffer_offset) = (allocation.buffer, allocation.offset);
        let staging = staging_slice(allocation.data)?;

        let params = PackPixelsParams {
            area: clipped,
            format: *format,
            output_pitch: output_row_pitch as u32,
            reverse_row_order: flipped,
            offset: 0,
        };

        if format.load.requires_conversion {
            let mut scratch = vec![0u8; allocation_size];
            source.read_pixels(ctx, clipped, &params, &mut scratch)?;
            let pitch = Pitch {
                row: output_row_pitch,
                depth: 0,
            };
            (format.load.function)(
                vk::Extent3D {
                    width: clipped.width as u32,
                    height: clipped.height as u32,
                    depth: 1,
                },
                &scratch,
                pitch,
                staging,
                pitch,
            );
        } else {
            source.read_pixels(ctx, clipped, &params, staging)?;
        }

        let copy_region = vk::BufferImageCopy {
            buffer_offset,
            // Tightly packed.
            buffer_row_length: 0,
            buffer_image_height: clipped.height as u32,
            image_subresource: index.dst_subresource(),
            image_offset: dst_offset,
            image_extent: dst_extent,
        };
        self.subresource_updates
            .push(SubresourceUpdate::Buffer { buffer, copy_region });
        Ok(())
    }

    /// Queues a copy out of `image`, which the update now owns.
    pub fn stage_subresource_update_from_image(
        &mut self,
        image: Box<ImageHelper>,
        index: &ImageIndex,
        dst_offset: vk::Offset3D,
        extent: vk::Extent3D,
    ) {
        let copy_region = vk::ImageCopy {
            src_subresource: vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: index.layer_count,
            },
            src_offset: vk::Offset3D::default(),
            dst_subresource: index.dst_subresource(),
            dst_offset,
            extent,
        };
        self.subresource_updates
            .push(SubresourceUpdate::Image { image, copy_region });
    }

    pub fn allocate_staging_memory(
        &mut self,
        ctx: &dyn Context,
        size_in_bytes: usize,
    ) -> Result<DynamicAllocation<'_>> {
        self.staging_buffer.allocate(ctx, size_in_bytes)
    }

    /// Records every staged update whose mip level lies in
    /// `base_level..base_level + level_count`, in the order they were staged.
    /// Updates outside the range stay queued.
    pub fn flush_staged_updates(
        &mut self,
        ctx: &mut dyn Context,
        base_level: u32,
        level_count: u32,
        cmd: &mut dyn CommandRecorder,
    ) -> Result<()> {
        if self.subresource_updates.is_empty() {
            return Ok(());
        }

        self.staging_buffer.flush(ctx.device())?;
        self.staging_buffer.update_queue_serial(cmd.queue_serial());

        let levels = base_level..base_level.saturating_add(level_count);
        let mut updates_to_keep = Vec::new();
        for mut update in std::mem::take(&mut self.subresource_updates) {
            if !levels.contains(&update.dst_subresource().mip_level) {
                updates_to_keep.push(update);
                continue;
            }

            // Per update, so consecutive copies into one level are ordered.
            self.change_layout(vk::ImageAspectFlags::COLOR, ImageLayout::TransferDst, cmd);
            let dst_layout = self.current_layout.vk_layout();

            match &mut update {
                SubresourceUpdate::Buffer { buffer, copy_region } => {
                    cmd.copy_buffer_to_image(
                        *buffer,
                        self.image,
                        dst_layout,
                        std::slice::from_ref(copy_region),
                    );
                }
                SubresourceUpdate::Image { image, copy_region } => {
                    image.change_layout(
                        vk::ImageAspectFlags::COLOR,
                        ImageLayout::TransferSrc,
                        cmd,
                    );
                    image.record_use(cmd);
                    cmd.copy_image(
                        image.image,
                        image.current_layout.vk_layout(),
                        self.image,
                        dst_layout,
                        std::slice::from_ref(copy_region),
                    );
                }
            }
            self.record_use(cmd);
            update.release(ctx);
        }

        self.subresource_updates = updates_to_keep;
        if self.subresource_updates.is_empty() {
            self.staging_buffer.release_retained_buffers(ctx);
        } else {
            self.undrained_flushes += 1;
            warn!(
                remaining = self.subresource_updates.len(),
                ?levels,
                "staged image updates outside the flushed levels; staging memory stays alive"
            );
        }
        Ok(())
    }

    pub fn has_staged_updates(&self) -> bool {
        !self.subresource_updates.is_empty()
    }

    pub fn staged_update_count(&self) -> usize {
        self.subresource_updates.len()
    }

    /// Number of flushes that left updates behind.
    pub fn undrained_flush_count(&self) -> usize {
        self.undrained_flushes
    }
}

fn required_input_bytes(
    extent: vk::Extent3D,
    pixel_bytes: usize,
    row_pitch: usize,
    depth_pitch: usize,
) -> Option<usize> {
    if extent.width == 0 || extent.height == 0 || extent.depth == 0 {
        return Some(0);
    }
    let last_image = (extent.depth as usize - 1).checked_mul(depth_pitch)?;
    let last_row = (extent.height as usize - 1).checked_mul(row_pitch)?;
    let row = (extent.width as usize).checked_mul(pixel_bytes)?;
    last_image.checked_add(last_row)?.checked_add(row)
}

fn staging_slice(data: Option<&mut [u8]>) -> Result<&mut [u8]> {
    data.ok_or(ResourceError::Vulkan {
        call: "vkMapMemory",
        result: vk::Result::ERROR_MEMORY_MAP_FAILED,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Command, MockContext, RecordingCommandBuffer};
    use ash::vk::Handle;

    fn extent(width: u32, height: u32) -> vk::Extent3D {
        vk::Extent3D {
            width,
            height,
            depth: 1,
        }
    }

    fn color_image(ctx: &MockContext, levels: u32) -> ImageHelper {
        let mut image = ImageHelper::new(ctx);
        image
            .init(
                &ctx.device,
                TextureType::TwoD,
                extent(16, 16),
                &Format::RGBA8,
                vk::SampleCountFlags::TYPE_1,
                vk::ImageUsageFlags::SAMPLED
                    | vk::ImageUsageFlags::TRANSFER_DST
                    | vk::ImageUsageFlags::TRANSFER_SRC,
                levels,
                1,
            )
            .unwrap();
        image
            .init_memory(&ctx.device, vk::MemoryPropertyFlags::DEVICE_LOCAL)
            .unwrap();
        image
    }

    fn copied_levels(cmd: &RecordingCommandBuffer) -> Vec<u32> {
        cmd.commands
            .iter()
            .filter_map(|command| match command {
                Command::CopyBufferToImage { regions, .. } => {
                    Some(regions[0].image_subresource.mip_level)
                }
                Command::CopyImage { regions, .. } => Some(regions[0].dst_subresource.mip_level),
                _ => None,
            })
            .collect()
    }

    fn stage_level(ctx: &MockContext, image: &mut ImageHelper, level: u32) {
        let size = image.size(level);
        let pixels = vec![level as u8; (size.width * size.height * 4) as usize];
        image
            .stage_subresource_update(
                ctx,
                &ImageIndex::level(level),
                size,
                vk::Offset3D::default(),
                &Format::RGBA8,
                &PixelUnpackState::default(),
                &pixels,
            )
            .unwrap();
    }

    #[test]
    fn read_after_read_records_no_barrier() {
        let ctx = MockContext::default();
        let mut image = color_image(&ctx, 1);
        let mut cmd = ctx.command_buffer();

        image.change_layout(
            vk::ImageAspectFlags::COLOR,
            ImageLayout::FragmentShaderReadOnly,
            &mut cmd,
        );
        cmd.clear();
        image.change_layout(
            vk::ImageAspectFlags::COLOR,
            ImageLayout::FragmentShaderReadOnly,
            &mut cmd,
        );
        assert!(cmd.commands.is_empty());

        image.change_layout(
            vk::ImageAspectFlags::COLOR,
            ImageLayout::ColorAttachment,
            &mut cmd,
        );
        let barriers = cmd.image_barriers();
        assert_eq!(barriers.len(), 1);
        let barrier = barriers[0];
        assert!(barrier.src_access_mask.is_empty());
        assert_eq!(
            barrier.dst_access_mask,
            vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE
        );
        assert_eq!(barrier.old_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert_eq!(barrier.new_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert!(matches!(
            cmd.commands[0],
            Command::Barrier {
                src_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
                dst_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                ..
            }
        ));
        assert_eq!(image.current_layout(), ImageLayout::ColorAttachment);

        image.destroy(&ctx.device);
        assert_eq!(ctx.device.live_objects(), 0);
    }

    #[test]
    fn write_layouts_always_transition() {
        let ctx = MockContext::default();
        let mut image = color_image(&ctx, 3);
        let mut cmd = ctx.command_buffer();

        image.change_layout(vk::ImageAspectFlags::COLOR, ImageLayout::TransferDst, &mut cmd);
        image.change_layout(vk::ImageAspectFlags::COLOR, ImageLayout::TransferDst, &mut cmd);
        let barriers = cmd.image_barriers();
        assert_eq!(barriers.len(), 2);
        assert_eq!(barriers[1].src_access_mask, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(barriers[0].subresource_range.level_count, 3);
        assert_eq!(barriers[0].old_layout, vk::ImageLayout::UNDEFINED);

        image.destroy(&ctx.device);
    }

    #[test]
    fn flush_applies_only_levels_in_range() {
        let mut ctx = MockContext::default();
        let mut image = color_image(&ctx, 3);
        for level in 0..3 {
            stage_level(&ctx, &mut image, level);
        }

        let mut cmd = ctx.command_buffer();
        image.flush_staged_updates(&mut ctx, 1, 1, &mut cmd).unwrap();

        assert_eq!(copied_levels(&cmd), vec![1]);
        assert_eq!(image.staged_update_count(), 2);
        assert_eq!(image.undrained_flush_count(), 1);
        assert_eq!(image.current_layout(), ImageLayout::TransferDst);

        let mut cmd = ctx.command_buffer();
        image.flush_staged_updates(&mut ctx, 0, 3, &mut cmd).unwrap();
        assert_eq!(copied_levels(&cmd), vec![0, 2]);
        assert!(!image.has_staged_updates());
        assert_eq!(image.undrained_flush_count(), 1);

        image.destroy(&ctx.device);
        assert_eq!(ctx.device.live_objects(), 0);
    }

    #[test]
    fn every_applied_update_is_preceded_by_a_transition() {
        let mut ctx = MockContext::default();
        let mut image = color_image(&ctx, 1);
        stage_level(&ctx, &mut image, 0);
        stage_level(&ctx, &mut image, 0);

        let mut cmd = ctx.command_buffer();
        image.flush_staged_updates(&mut ctx, 0, 1, &mut cmd).unwrap();
        let kinds: Vec<&str> = cmd
            .commands
            .iter()
            .map(|command| match command {
                Command::Barrier { .. } => "barrier",
                Command::CopyBufferToImage { .. } => "copy",
                _ => "other",
            })
            .collect();
        assert_eq!(kinds, vec!["barrier", "copy", "barrier", "copy"]);

        image.destroy(&ctx.device);
    }

    #[test]
    fn staged_pixels_are_converted_into_staging_memory() {
        let mut ctx = MockContext::default();
        let mut image = color_image(&ctx, 1);
        // 2x2 RGB rows padded to the default 4 byte alignment.
        let pixels = [1, 2, 3, 4, 5, 6, 0, 0, 7, 8, 9, 10, 11, 12, 0, 0];
        image
            .stage_subresource_update(
                &ctx,
                &ImageIndex::level(0),
                extent(2, 2),
                vk::Offset3D { x: 4, y: 4, z: 0 },
                &Format::RGB8,
                &PixelUnpackState::default(),
                &pixels,
            )
            .unwrap();

        let memory = image.staging_buffer.current_buffer().unwrap().memory();
        assert_eq!(
            &ctx.device.memory_contents(memory)[..16],
            &[1, 2, 3, 255, 4, 5, 6, 255, 7, 8, 9, 255, 10, 11, 12, 255]
        );

        let mut cmd = ctx.command_buffer();
        image.flush_staged_updates(&mut ctx, 0, 1, &mut cmd).unwrap();
        let region = cmd
            .commands
            .iter()
            .find_map(|command| match command {
                Command::CopyBufferToImage { regions, layout, .. } => {
                    assert_eq!(*layout, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
                    Some(regions[0])
                }
                _ => None,
            })
            .unwrap();
        assert_eq!(region.buffer_offset, 0);
        assert_eq!(region.buffer_row_length, 2);
        assert_eq!(region.buffer_image_height, 2);
        assert_eq!(region.image_offset.x, 4);
        assert_eq!(region.image_subresource.aspect_mask, vk::ImageAspectFlags::COLOR);

        image.destroy(&ctx.device);
    }

    #[test]
    fn short_pixel_data_is_rejected() {
        let ctx = MockContext::default();
        let mut image = color_image(&ctx, 1);
        let unpack = PixelUnpackState {
            skip_rows: 1,
            ..Default::default()
        };
        let err = image
            .stage_subresource_update(
                &ctx,
                &ImageIndex::level(0),
                extent(2, 2),
                vk::Offset3D::default(),
                &Format::RGBA8,
                &unpack,
                &[0u8; 16],
            )
            .unwrap_err();
        assert!(matches!(
            err,
            ResourceError::PixelDataTooSmall {
                needed: 24,
                provided: 16
            }
        ));
        assert!(!image.has_staged_updates());
        image.destroy(&ctx.device);
    }

    #[test]
    fn image_sourced_update_moves_source_to_transfer_src() {
        let mut ctx = MockContext::default();
        let mut image = color_image(&ctx, 1);

        let mut source = Box::new(ImageHelper::new(&ctx));
        source
            .init_2d_staging(
                &ctx.device,
                extent(8, 8),
                &Format::RGBA8,
                vk::ImageUsageFlags::TRANSFER_SRC,
                1,
            )
            .unwrap();
        let source_handle = source.image();
        image.stage_subresource_update_from_image(
            source,
            &ImageIndex::level(0),
            vk::Offset3D::default(),
            extent(8, 8),
        );

        let mut cmd = ctx.command_buffer();
        image.flush_staged_updates(&mut ctx, 0, 1, &mut cmd).unwrap();

        let barriers = cmd.image_barriers();
        assert!(barriers.iter().any(|barrier| barrier.image == source_handle
            && barrier.new_layout == vk::ImageLayout::TRANSFER_SRC_OPTIMAL));
        assert!(cmd.commands.iter().any(|command| matches!(
            command,
            Command::CopyImage {
                src,
                src_layout: vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                dst_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                ..
            } if *src == source_handle
        )));

        // The source stays alive until the copy's serial completes.
        assert!(ctx.device.is_live(source_handle));
        ctx.submit();
        ctx.complete_all();
        assert!(!ctx.device.is_live(source_handle));

        image.destroy(&ctx.device);
        assert_eq!(ctx.device.live_objects(), 0);
    }

    #[test]
    fn removing_updates_releases_only_matching_ones() {
        let mut ctx = MockContext::default();
        let mut image = color_image(&ctx, 2);
        stage_level(&ctx, &mut image, 0);
        stage_level(&ctx, &mut image, 1);
        stage_level(&ctx, &mut image, 0);

        image.remove_staged_updates(&mut ctx, &ImageIndex::level(0));
        assert_eq!(image.staged_update_count(), 1);

        let mut cmd = ctx.command_buffer();
        image.flush_staged_updates(&mut ctx, 0, 2, &mut cmd).unwrap();
        assert_eq!(copied_levels(&cmd), vec![1]);
        image.destroy(&ctx.device);
    }

    #[test]
    fn mipmaps_blit_each_level_from_the_one_above() {
        let ctx = MockContext::default();
        let mut image = color_image(&ctx, 4);
        let mut cmd = ctx.command_buffer();

        image.generate_mipmaps_with_blit(3, &mut cmd);

        let blits: Vec<vk::ImageBlit> = cmd
            .commands
            .iter()
            .filter_map(|command| match command {
                Command::BlitImage { regions, filter, .. } => {
                    assert_eq!(*filter, vk::Filter::LINEAR);
                    Some(regions[0])
                }
                _ => None,
            })
            .collect();
        assert_eq!(blits.len(), 3);
        assert_eq!(blits[0].src_offsets[1].x, 16);
        assert_eq!(blits[0].dst_offsets[1].x, 8);
        assert_eq!(blits[2].src_subresource.mip_level, 2);
        assert_eq!(blits[2].dst_offsets[1].y, 2);

        // Initial transition, one per source level, then the last level.
        let barriers = cmd.image_barriers();
        assert_eq!(barriers.len(), 5);
        let last = barriers[4];
        assert_eq!(last.subresource_range.base_mip_level, 3);
        assert_eq!(last.new_layout, vk::ImageLayout::TRANSFER_SRC_OPTIMAL);
        assert_eq!(image.current_layout(), ImageLayout::TransferSrc);

        image.destroy(&ctx.device);
    }

    #[test]
    fn clears_transition_to_transfer_dst_first() {
        let ctx = MockContext::default();
        let mut image = color_image(&ctx, 2);
        let mut cmd = ctx.command_buffer();

        image.clear_color(&vk::ClearColorValue::default(), 1, 1, &mut cmd);
        assert!(matches!(cmd.commands[0], Command::Barrier { .. }));
        match &cmd.commands[1] {
            Command::ClearColor { layout, ranges, .. } => {
                assert_eq!(*layout, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
                assert_eq!(ranges[0].base_mip_level, 1);
                assert_eq!(ranges[0].layer_count, 1);
            }
            other => panic!("unexpected {other:?}"),
        }
        image.destroy(&ctx.device);
    }

    #[test]
    fn copy_between_images_orders_both_layouts() {
        let ctx = MockContext::default();
        let mut src = color_image(&ctx, 1);
        let mut dst = color_image(&ctx, 1);
        let mut cmd = ctx.command_buffer();

        ImageHelper::copy(
            &mut src,
            &mut dst,
            vk::Offset3D { x: 1, y: 2, z: 0 },
            vk::Offset3D::default(),
            extent(4, 4),
            vk::ImageAspectFlags::COLOR,
            &mut cmd,
        );
        assert_eq!(src.current_layout(), ImageLayout::TransferSrc);
        assert_eq!(dst.current_layout(), ImageLayout::TransferDst);
        assert!(matches!(
            cmd.commands.last(),
            Some(Command::CopyImage { regions, .. }) if regions[0].src_offset.y == 2
        ));
        assert_eq!(src.queue_serial(), cmd.queue_serial());

        src.destroy(&ctx.device);
        dst.destroy(&ctx.device);
    }

    struct FakeFramebuffer {
        extent: vk::Extent2D,
        flipped: bool,
        reads: Vec<(Rect, bool)>,
    }

    impl ReadbackSource for FakeFramebuffer {
        fn read_extents(&self) -> vk::Extent2D {
            self.extent
        }

        fn is_viewport_flipped(&self) -> bool {
            self.flipped
        }

        fn read_pixels(
            &mut self,
            ctx: &mut dyn Context,
            area: Rect,
            params: &PackPixelsParams,
            dest: &mut [u8],
        ) -> Result<()> {
            ctx.finish()?;
            self.reads.push((area, params.reverse_row_order));
            dest.fill(0xab);
            Ok(())
        }
    }

    #[test]
    fn framebuffer_copy_is_clipped_and_flipped() {
        let mut ctx = MockContext::default();
        let mut image = color_image(&ctx, 1);
        let mut framebuffer = FakeFramebuffer {
            extent: vk::Extent2D {
                width: 32,
                height: 32,
            },
            flipped: true,
            reads: Vec::new(),
        };

        image
            .stage_subresource_update_from_framebuffer(
                &mut ctx,
                &ImageIndex::level(0),
                Rect::new(28, 4, 8, 8),
                vk::Offset3D::default(),
                extent(4, 8),
                &Format::RGBA8,
                &mut framebuffer,
            )
            .unwrap();

        assert_eq!(framebuffer.reads, vec![(Rect::new(28, 20, 4, 8), true)]);
        assert_eq!(ctx.finish_count, 1);
        let memory = image.staging_buffer.current_buffer().unwrap().memory();
        assert!(ctx.device.memory_contents(memory)[..128]
            .iter()
            .all(|&b| b == 0xab));

        let mut cmd = ctx.command_buffer();
        image.flush_staged_updates(&mut ctx, 0, 1, &mut cmd).unwrap();
        let region = cmd
            .commands
            .iter()
            .find_map(|command| match command {
                Command::CopyBufferToImage { regions, .. } => Some(regions[0]),
                _ => None,
            })
            .unwrap();
        assert_eq!(region.buffer_row_length, 0);
        assert_eq!(region.buffer_image_height, 8);

        // Entirely outside the framebuffer: nothing happens.
        image
            .stage_subresource_update_from_framebuffer(
                &mut ctx,
                &ImageIndex::level(0),
                Rect::new(40, 40, 4, 4),
                vk::Offset3D::default(),
                extent(4, 4),
                &Format::RGBA8,
                &mut framebuffer,
            )
            .unwrap();
        assert!(!image.has_staged_updates());
        assert_eq!(framebuffer.reads.len(), 1);

        image.destroy(&ctx.device);
    }

    #[test]
    fn converting_framebuffer_copy_goes_through_load_function() {
        let mut ctx = MockContext::default();
        let mut image = color_image(&ctx, 1);
        let mut framebuffer = FakeFramebuffer {
            extent: vk::Extent2D {
                width: 4,
                height: 4,
            },
            flipped: false,
            reads: Vec::new(),
        };

        image
            .stage_subresource_update_from_framebuffer(
                &mut ctx,
                &ImageIndex::level(0),
                Rect::new(0, 0, 1, 1),
                vk::Offset3D::default(),
                extent(1, 1),
                &Format::RGB8,
                &mut framebuffer,
            )
            .unwrap();

        let memory = image.staging_buffer.current_buffer().unwrap().memory();
        assert_eq!(
            &ctx.device.memory_contents(memory)[..4],
            &[0xab, 0xab, 0xab, 0xff]
        );
        image.destroy(&ctx.device);
    }

    #[test]
    fn get_data_hands_out_staging_memory() {
        let mut ctx = MockContext::default();
        let mut image = color_image(&ctx, 1);

        let data = image
            .stage_subresource_update_and_get_data(
                &ctx,
                64,
                &ImageIndex::level(0),
                extent(4, 4),
                vk::Offset3D::default(),
            )
            .unwrap();
        assert_eq!(data.len(), 64);
        data.fill(7);
        assert!(image.has_staged_updates());

        image.release_staging_buffer(&mut ctx);
        image.release_image(&mut ctx);
        assert!(!image.valid());
        ctx.submit();
        ctx.complete_all();
        assert_eq!(ctx.device.live_objects(), 0);
    }

    #[test]
    fn failed_creation_leaves_image_invalid() {
        let ctx = MockContext::default();
        ctx.device.fail_on("vkCreateImage");
        let mut image = ImageHelper::new(&ctx);
        let result = image.init(
            &ctx.device,
            TextureType::CubeMap,
            extent(8, 8),
            &Format::RGBA8,
            vk::SampleCountFlags::TYPE_1,
            vk::ImageUsageFlags::SAMPLED,
            1,
            6,
        );
        assert!(result.is_err());
        assert!(!image.valid());
        assert_eq!(image.layer_count(), 0);
    }

    #[test]
    fn failed_memory_allocation_destroys_the_image() {
        let ctx = MockContext::default();
        ctx.device.fail_on("vkAllocateMemory");
        let mut image = ImageHelper::new(&ctx);
        let result = image.init_2d_staging(
            &ctx.device,
            extent(16, 16),
            &Format::RGBA8,
            vk::ImageUsageFlags::TRANSFER_SRC,
            1,
        );
        assert!(result.is_err());
        assert!(!image.valid());
        assert_eq!(image.layer_count(), 0);
        assert_eq!(ctx.device.live_objects(), 0);
    }

    #[test]
    fn weak_reference_is_never_destroyed() {
        let ctx = MockContext::default();
        let mut image = ImageHelper::new(&ctx);
        image.init_2d_weak_reference(
            vk::Image::from_raw(0xdead),
            extent(64, 64),
            &Format::RGBA8,
        );
        assert!(image.valid());
        assert_eq!(image.size(2), extent(16, 16));
        assert_eq!(image.size(9), extent(1, 1));
        image.reset_image_weak_reference();
        image.destroy(&ctx.device);
        assert_eq!(ctx.device.live_objects(), 0);
    }

    #[test]
    fn views_cover_the_requested_range() {
        let ctx = MockContext::default();
        let image = color_image(&ctx, 3);
        let full = image
            .init_image_view(
                &ctx.device,
                TextureType::TwoD,
                vk::ImageAspectFlags::COLOR,
                vk::ComponentMapping::default(),
                0,
                3,
            )
            .unwrap();
        let swizzled = image
            .init_layer_image_view(
                &ctx.device,
                TextureType::TwoD,
                vk::ImageAspectFlags::COLOR,
                vk::ComponentMapping {
                    r: vk::ComponentSwizzle::B,
                    b: vk::ComponentSwizzle::R,
                    ..Default::default()
                },
                1,
                1,
                0,
                1,
            )
            .unwrap();
        assert_ne!(full, swizzled);

        let mut image = image;
        ctx.device.destroy_image_view(full);
        ctx.device.destroy_image_view(swizzled);
        image.destroy(&ctx.device);
        assert_eq!(ctx.device.live_objects(), 0);
    }

    #[test]
    fn texture_types_constrain_layers() {
        assert!(TextureType::CubeMap.accepts_layer_count(6));
        assert!(!TextureType::CubeMap.accepts_layer_count(1));
        assert!(!TextureType::ThreeD.accepts_layer_count(2));
        assert!(TextureType::TwoDArray.accepts_layer_count(8));
        assert_eq!(
            TextureType::CubeMap.create_flags(),
            vk::ImageCreateFlags::CUBE_COMPATIBLE
        );
        assert_eq!(TextureType::ThreeD.image_type(), vk::ImageType::TYPE_3D);
    }
}
