use ash::vk;

use crate::command::{CommandRecorder, ImageBarrier, MemoryBarrier};
use crate::serial::Serial;

/// A primary command buffer in the recording state.
///
/// Obtained from [`VulkanContext::begin_command_buffer`] and handed back to
/// [`VulkanContext::submit`], which ends and submits it.
///
/// [`VulkanContext::begin_command_buffer`]: super::VulkanContext::begin_command_buffer
/// [`VulkanContext::submit`]: super::VulkanContext::submit
pub struct VulkanCommandBuffer {
    device: ash::Device,
    pub(crate) handle: vk::CommandBuffer,
    serial: Serial,
}

impl VulkanCommandBuffer {
    pub(crate) fn new(device: ash::Device, handle: vk::CommandBuffer, serial: Serial) -> Self {
        Self {
            device,
            handle,
            serial,
        }
    }

    pub fn handle(&self) -> vk::CommandBuffer {
        self.handle
    }
}

fn memory_barrier(barrier: &MemoryBarrier) -> vk::MemoryBarrier<'static> {
    vk::MemoryBarrier::default()
        .src_access_mask(barrier.src_access_mask)
        .dst_access_mask(barrier.dst_access_mask)
}

fn image_memory_barrier(barrier: &ImageBarrier) -> vk::ImageMemoryBarrier<'static> {
    vk::ImageMemoryBarrier::default()
        .src_access_mask(barrier.src_access_mask)
        .dst_access_mask(barrier.dst_access_mask)
        .old_layout(barrier.old_layout)
        .new_layout(barrier.new_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(barrier.image)
        .subresource_range(barrier.subresource_range)
}

// SAFETY: `handle` is recording and every handle recorded belongs to `device`.
impl CommandRecorder for VulkanCommandBuffer {
    fn queue_serial(&self) -> Serial {
        self.serial
    }

    fn pipeline_barrier(
        &mut self,
        src_stage_mask: vk::PipelineStageFlags,
        dst_stage_mask: vk::PipelineStageFlags,
        memory_barriers: &[MemoryBarrier],
        image_barriers: &[ImageBarrier],
    ) {
        let memory: Vec<_> = memory_barriers.iter().map(memory_barrier).collect();
        let images: Vec<_> = image_barriers.iter().map(image_memory_barrier).collect();
        unsafe {
            self.device.cmd_pipeline_barrier(
                self.handle,
                src_stage_mask,
                dst_stage_mask,
                vk::DependencyFlags::empty(),
                &memory,
                &[],
                &images,
            )
        }
    }

    fn copy_buffer(&mut self, src: vk::Buffer, dst: vk::Buffer, regions: &[vk::BufferCopy]) {
        unsafe { self.device.cmd_copy_buffer(self.handle, src, dst, regions) }
    }

    fn copy_buffer_to_image(
        &mut self,
        src: vk::Buffer,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::BufferImageCopy],
    ) {
        unsafe {
            self.device
                .cmd_copy_buffer_to_image(self.handle, src, dst, dst_layout, regions)
        }
    }

    fn copy_image(
        &mut self,
        src: vk::Image,
        src_layout: vk::ImageLayout,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::ImageCopy],
    ) {
        unsafe {
            self.device
                .cmd_copy_image(self.handle, src, src_layout, dst, dst_layout, regions)
        }
    }

    fn blit_image(
        &mut self,
        src: vk::Image,
        src_layout: vk::ImageLayout,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::ImageBlit],
        filter: vk::Filter,
    ) {
        unsafe {
            self.device.cmd_blit_image(
                self.handle,
                src,
                src_layout,
                dst,
                dst_layout,
                regions,
                filter,
            )
        }
    }

    fn clear_color_image(
        &mut self,
        image: vk::Image,
        layout: vk::ImageLayout,
        color: &vk::ClearColorValue,
        ranges: &[vk::ImageSubresourceRange],
    ) {
        unsafe {
            self.device
                .cmd_clear_color_image(self.handle, image, layout, color, ranges)
        }
    }

    fn clear_depth_stencil_image(
        &mut self,
        image: vk::Image,
        layout: vk::ImageLayout,
        value: &vk::ClearDepthStencilValue,
        ranges: &[vk::ImageSubresourceRange],
    ) {
        unsafe {
            self.device
                .cmd_clear_depth_stencil_image(self.handle, image, layout, value, ranges)
        }
    }

    fn reset_query_pool(&mut self, pool: vk::QueryPool, first_query: u32, query_count: u32) {
        unsafe {
            self.device
                .cmd_reset_query_pool(self.handle, pool, first_query, query_count)
        }
    }

    fn begin_query(&mut self, pool: vk::QueryPool, query: u32) {
        unsafe {
            self.device
                .cmd_begin_query(self.handle, pool, query, vk::QueryControlFlags::empty())
        }
    }

    fn end_query(&mut self, pool: vk::QueryPool, query: u32) {
        unsafe { self.device.cmd_end_query(self.handle, pool, query) }
    }

    fn write_timestamp(&mut self, stage: vk::PipelineStageFlags, pool: vk::QueryPool, query: u32) {
        unsafe {
            self.device
                .cmd_write_timestamp(self.handle, stage, pool, query)
        }
    }

    fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        unsafe {
            self.device.cmd_draw_indexed(
                self.handle,
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            )
        }
    }
}
