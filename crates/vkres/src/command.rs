use ash::vk;

use crate::serial::Serial;

/// Global memory barrier between two access scopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryBarrier {
    pub src_access_mask: vk::AccessFlags,
    pub dst_access_mask: vk::AccessFlags,
}

/// Image layout transition plus memory dependency.
#[derive(Debug, Clone, Copy)]
pub struct ImageBarrier {
    pub src_access_mask: vk::AccessFlags,
    pub dst_access_mask: vk::AccessFlags,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub image: vk::Image,
    pub subresource_range: vk::ImageSubresourceRange,
}

/// A command stream being recorded for one queue submission.
///
/// Commands execute in recording order. Anything beyond that ordering has to
/// be expressed with explicit barriers.
pub trait CommandRecorder {
    /// Serial the recorded work will be submitted under.
    fn queue_serial(&self) -> Serial;

    fn pipeline_barrier(
        &mut self,
        src_stage_mask: vk::PipelineStageFlags,
        dst_stage_mask: vk::PipelineStageFlags,
        memory_barriers: &[MemoryBarrier],
        image_barriers: &[ImageBarrier],
    );

    fn copy_buffer(&mut self, src: vk::Buffer, dst: vk::Buffer, regions: &[vk::BufferCopy]);

    fn copy_buffer_to_image(
        &mut self,
        src: vk::Buffer,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::BufferImageCopy],
    );

    fn copy_image(
        &mut self,
        src: vk::Image,
        src_layout: vk::ImageLayout,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::ImageCopy],
    );

    fn blit_image(
        &mut self,
        src: vk::Image,
        src_layout: vk::ImageLayout,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::ImageBlit],
        filter: vk::Filter,
    );

    fn clear_color_image(
        &mut self,
        image: vk::Image,
        layout: vk::ImageLayout,
        color: &vk::ClearColorValue,
        ranges: &[vk::ImageSubresourceRange],
    );

    fn clear_depth_stencil_image(
        &mut self,
        image: vk::Image,
        layout: vk::ImageLayout,
        value: &vk::ClearDepthStencilValue,
        ranges: &[vk::ImageSubresourceRange],
    );

    fn reset_query_pool(&mut self, pool: vk::QueryPool, first_query: u32, query_count: u32);
    fn begin_query(&mut self, pool: vk::QueryPool, query: u32);
    fn end_query(&mut self, pool: vk::QueryPool, query: u32);
    fn write_timestamp(&mut self, stage: vk::PipelineStageFlags, pool: vk::QueryPool, query: u32);

    fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    );
}
