//! Index buffers that close a line strip back onto its first vertex.

use ash::vk;
use byteorder::{ByteOrder, NativeEndian};
use tracing::debug_span;

use crate::buffer::{BufferHelper, DynamicBuffer};
use crate::command::CommandRecorder;
use crate::context::{Context, Device};
use crate::error::{overflow, ResourceError, Result};

/// Four byte alignment suits every index type a loop can be bound with.
const INDEX_ALIGNMENT: usize = std::mem::size_of::<u32>();

/// Client index types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexType {
    U8,
    U16,
    U32,
}

impl IndexType {
    pub fn size(self) -> usize {
        match self {
            IndexType::U8 => 1,
            IndexType::U16 => 2,
            IndexType::U32 => 4,
        }
    }

    /// The type the synthesized indices are bound as. 8-bit indices are
    /// widened since Vulkan cannot index with them.
    pub fn vk_index_type(self) -> vk::IndexType {
        match self {
            IndexType::U8 | IndexType::U16 => vk::IndexType::UINT16,
            IndexType::U32 => vk::IndexType::UINT32,
        }
    }

    fn stored_size(self) -> usize {
        match self {
            IndexType::U8 | IndexType::U16 => 2,
            IndexType::U32 => 4,
        }
    }
}

/// Location of a synthesized loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineLoopIndices {
    pub buffer: vk::Buffer,
    pub offset: vk::DeviceSize,
    pub index_type: vk::IndexType,
}

#[derive(Debug)]
pub struct LineLoopHelper {
    dynamic_index_buffer: DynamicBuffer,
}

impl LineLoopHelper {
    pub fn new(ctx: &dyn Context) -> Self {
        let mut dynamic_index_buffer = DynamicBuffer::new(
            vk::BufferUsageFlags::INDEX_BUFFER
                | vk::BufferUsageFlags::TRANSFER_DST
                | vk::BufferUsageFlags::UNIFORM_TEXEL_BUFFER
                | vk::BufferUsageFlags::STORAGE_TEXEL_BUFFER,
            ctx.config().line_loop_buffer_min_size,
            true,
        );
        dynamic_index_buffer.init(INDEX_ALIGNMENT, ctx.device().limits());
        Self {
            dynamic_index_buffer,
        }
    }

    /// Writes `first_vertex..first_vertex + vertex_count` followed by
    /// `first_vertex` as 32-bit indices.
    pub fn index_buffer_for_draw_arrays(
        &mut self,
        ctx: &mut dyn Context,
        vertex_count: u32,
        first_vertex: u32,
    ) -> Result<LineLoopIndices> {
        let allocate_bytes = (vertex_count as usize)
            .checked_add(1)
            .and_then(|count| count.checked_mul(std::mem::size_of::<u32>()))
            .ok_or_else(|| overflow("line loop index count"))?;

        self.dynamic_index_buffer.release_retained_buffers(ctx);
        let allocation = self.dynamic_index_buffer.allocate(&*ctx, allocate_bytes)?;
        let (buffer, offset) = (allocation.buffer, allocation.offset);

        if let Some(indices) = allocation.data {
            let (body, wrap) = indices.split_at_mut(vertex_count as usize * 4);
            for (i, slot) in body.chunks_exact_mut(4).enumerate() {
                // Wraps like the 32-bit index it stands for.
                NativeEndian::write_u32(slot, first_vertex.wrapping_add(i as u32));
            }
            NativeEndian::write_u32(wrap, first_vertex);
        }

        self.dynamic_index_buffer.flush(ctx.device())?;
        Ok(LineLoopIndices {
            buffer,
            offset,
            index_type: vk::IndexType::UINT32,
        })
    }

    /// Builds a loop from `index_count` indices stored in `element_array_buffer`
    /// at `element_array_offset`.
    ///
    /// 8-bit indices are read back on the host and widened, which waits for
    /// the device to go idle. Wider indices are copied on the device.
    #[allow(clippy::too_many_arguments)]
    pub fn index_buffer_for_element_array_buffer(
        &mut self,
        ctx: &mut dyn Context,
        element_array_buffer: &mut BufferHelper,
        index_type: IndexType,
        index_count: u32,
        element_array_offset: vk::DeviceSize,
        cmd: &mut dyn CommandRecorder,
    ) -> Result<LineLoopIndices> {
        let unit = index_type.size() as u64;
        let read_bytes = u64::from(index_count.max(1))
            .checked_mul(unit)
            .and_then(|bytes| bytes.checked_add(element_array_offset))
            .ok_or_else(|| overflow("element array range"))?;
        if read_bytes > element_array_buffer.size() {
            return Err(ResourceError::IndexDataOutOfRange {
                end: read_bytes,
                size: element_array_buffer.size(),
            });
        }

        if index_type == IndexType::U8 {
            let _span = debug_span!("line_loop_u8_readback", index_count).entered();
            // Anything still in flight could be writing the indices.
            ctx.finish()?;

            let device = ctx.device();
            debug_assert!(element_array_buffer.is_host_visible());
            element_array_buffer.invalidate(device, 0, element_array_buffer.size())?;
            let was_mapped = element_array_buffer.is_mapped();
            let mapped = element_array_buffer.map(device)?;
            let source = &mapped[element_array_offset as usize..read_bytes as usize];
            let result = self.stream_indices(&*ctx, index_type, index_count, source);
            if !was_mapped {
                element_array_buffer.unmap(ctx.device());
            }
            return result;
        }

        let count = u64::from(index_count);
        let allocate_bytes = (count + 1)
            .checked_mul(unit)
            .and_then(|bytes| bytes.checked_add(1))
            .ok_or_else(|| overflow("line loop allocation"))?;

        self.dynamic_index_buffer.release_retained_buffers(ctx);
        let allocation = self
            .dynamic_index_buffer
            .allocate(&*ctx, allocate_bytes as usize)?;
        let (buffer, offset) = (allocation.buffer, allocation.offset);

        let mut copies = Vec::with_capacity(3);
        if count > 0 {
            copies.push(vk::BufferCopy {
                src_offset: element_array_offset,
                dst_offset: offset,
                size: count * unit,
            });
        }
        copies.push(vk::BufferCopy {
            src_offset: element_array_offset,
            dst_offset: offset + count * unit,
            size: unit,
        });
        if ctx.config().extra_copy_buffer_region {
            copies.push(vk::BufferCopy {
                src_offset: element_array_offset,
                dst_offset: offset + (count + 1) * unit,
                size: 1,
            });
        }

        if let Some(dst) = self.dynamic_index_buffer.current_buffer_mut() {
            element_array_buffer.copy_to_buffer(cmd, dst, &copies);
        }
        self.dynamic_index_buffer.flush(ctx.device())?;

        Ok(LineLoopIndices {
            buffer,
            offset,
            index_type: index_type.vk_index_type(),
        })
    }

    /// Copies `index_count` client indices from host memory plus the first
    /// one again, widening 8-bit indices to 16 bits.
    pub fn stream_indices(
        &mut self,
        ctx: &dyn Context,
        index_type: IndexType,
        index_count: u32,
        source: &[u8],
    ) -> Result<LineLoopIndices> {
        let count = index_count as usize;
        let unit = index_type.size();
        let needed = count.max(1) * unit;
        if source.len() < needed {
            return Err(ResourceError::IndexDataOutOfRange {
                end: needed as u64,
                size: source.len() as u64,
            });
        }

        let stored = index_type.stored_size();
        let allocate_bytes = (count + 1)
            .checked_mul(stored)
            .ok_or_else(|| overflow("line loop allocation"))?;
        let allocation = self.dynamic_index_buffer.allocate(ctx, allocate_bytes)?;
        let (buffer, offset) = (allocation.buffer, allocation.offset);

        if let Some(indices) = allocation.data {
            match index_type {
                IndexType::U8 => {
                    for (slot, &index) in indices.chunks_exact_mut(2).zip(&source[..count]) {
                        NativeEndian::write_u16(slot, u16::from(index));
                    }
                    NativeEndian::write_u16(&mut indices[count * 2..], u16::from(source[0]));
                }
                IndexType::U16 | IndexType::U32 => {
                    let body = count * unit;
                    indices[..body].copy_from_slice(&source[..body]);
                    indices[body..body + unit].copy_from_slice(&source[..unit]);
                }
            }
        }

        self.dynamic_index_buffer.flush(ctx.device())?;
        Ok(LineLoopIndices {
            buffer,
            offset,
            index_type: index_type.vk_index_type(),
        })
    }

    pub fn release(&mut self, ctx: &mut dyn Context) {
        self.dynamic_index_buffer.release(ctx);
    }

    pub fn destroy(&mut self, device: &dyn Device) {
        self.dynamic_index_buffer.destroy(device);
    }

    /// Draws a loop of `count` vertices from indices built by this helper.
    pub fn draw(count: u32, cmd: &mut dyn CommandRecorder) {
        // The loop's extra index always sits right after the `count` others.
        cmd.draw_indexed(count.wrapping_add(1), 1, 0, 0, 0);
    }
}
