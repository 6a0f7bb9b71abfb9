pub mod dynamic;

pub use dynamic::{DynamicAllocation, DynamicBuffer};

use std::ptr::NonNull;

use ash::vk;
use tracing::trace;

use crate::command::{CommandRecorder, MemoryBarrier};
use crate::context::{Context, Device, GarbageObject};
use crate::error::{ResourceError, Result};
use crate::format::Format;
use crate::memory::allocate_buffer_memory;
use crate::serial::{ResourceUse, Serial};

/// A device buffer with its memory, an optional typed view and the access
/// state needed to place barriers.
#[derive(Debug, Default)]
pub struct BufferHelper {
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    buffer_view: vk::BufferView,
    view_format: Option<vk::Format>,
    memory_property_flags: vk::MemoryPropertyFlags,
    size: vk::DeviceSize,
    mapped_memory: Option<NonNull<u8>>,
    current_read_access: vk::AccessFlags,
    current_write_access: vk::AccessFlags,
    resource_use: ResourceUse,
}

impl BufferHelper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the buffer and binds memory with at least `memory_property_flags`.
    ///
    /// On failure nothing is left allocated and the helper stays invalid.
    pub fn init(
        &mut self,
        device: &dyn Device,
        create_info: &vk::BufferCreateInfo<'_>,
        memory_property_flags: vk::MemoryPropertyFlags,
    ) -> Result<()> {
        debug_assert!(!self.valid(), "buffer initialized twice");

        let buffer = device.create_buffer(create_info)?;
        let (memory, flags) = match allocate_buffer_memory(device, memory_property_flags, buffer) {
            Ok(allocation) => allocation,
            Err(err) => {
                device.destroy_buffer(buffer);
                return Err(err);
            }
        };

        self.buffer = buffer;
        self.memory = memory;
        self.memory_property_flags = flags;
        self.size = create_info.size;
        Ok(())
    }

    pub fn valid(&self) -> bool {
        self.buffer != vk::Buffer::null()
    }

    pub fn buffer(&self) -> vk::Buffer {
        self.buffer
    }

    pub fn memory(&self) -> vk::DeviceMemory {
        self.memory
    }

    pub fn buffer_view(&self) -> vk::BufferView {
        self.buffer_view
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    pub fn memory_property_flags(&self) -> vk::MemoryPropertyFlags {
        self.memory_property_flags
    }

    pub fn is_host_visible(&self) -> bool {
        self.memory_property_flags
            .contains(vk::MemoryPropertyFlags::HOST_VISIBLE)
    }

    fn needs_cache_maintenance(&self) -> bool {
        self.is_host_visible()
            && !self
                .memory_property_flags
                .contains(vk::MemoryPropertyFlags::HOST_COHERENT)
    }

    pub fn current_read_access(&self) -> vk::AccessFlags {
        self.current_read_access
    }

    pub fn current_write_access(&self) -> vk::AccessFlags {
        self.current_write_access
    }

    /// Maps the whole buffer. The mapping is cached until `unmap`.
    pub fn map(&mut self, device: &dyn Device) -> Result<&mut [u8]> {
        let ptr = match self.mapped_memory {
            Some(ptr) => ptr,
            None => {
                let raw = device.map_memory(self.memory, 0, self.size)?;
                let ptr = NonNull::new(raw).ok_or(ResourceError::Vulkan {
                    call: "vkMapMemory",
                    result: vk::Result::ERROR_MEMORY_MAP_FAILED,
                })?;
                self.mapped_memory = Some(ptr);
                ptr
            }
        };
        // SAFETY: the mapping covers `size` bytes and stays valid until `unmap`,
        // which needs `&mut self` and so cannot run while the slice is alive.
        Ok(unsafe { std::slice::from_raw_parts_mut(ptr.as_ptr(), self.size as usize) })
    }

    pub fn is_mapped(&self) -> bool {
        self.mapped_memory.is_some()
    }

    pub fn unmap(&mut self, device: &dyn Device) {
        if self.mapped_memory.take().is_some() {
            device.unmap_memory(self.memory);
        }
    }

    /// Makes host writes in the range visible to the device.
    pub fn flush(
        &self,
        device: &dyn Device,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
    ) -> Result<()> {
        if self.needs_cache_maintenance() {
            device.flush_mapped_memory(self.memory, offset, size)?;
        }
        Ok(())
    }

    /// Makes device writes in the range visible to the host.
    pub fn invalidate(
        &self,
        device: &dyn Device,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
    ) -> Result<()> {
        if self.needs_cache_maintenance() {
            device.invalidate_mapped_memory(self.memory, offset, size)?;
        }
        Ok(())
    }

    /// Creates the typed view on first use; later calls must ask for the same format.
    pub fn init_buffer_view(&mut self, device: &dyn Device, format: &Format) -> Result<()> {
        if self.buffer_view != vk::BufferView::null() {
            debug_assert_eq!(self.view_format, Some(format.buffer_format));
            return Ok(());
        }

        let view_info = vk::BufferViewCreateInfo::default()
            .buffer(self.buffer)
            .format(format.buffer_format)
            .offset(0)
            .range(self.size);
        self.buffer_view = device.create_buffer_view(&view_info)?;
        self.view_format = Some(format.buffer_format);
        Ok(())
    }

    /// Records a read. A barrier is only needed against an outstanding write
    /// that this kind of read has not already waited for.
    pub fn on_read(&mut self, cmd: &mut dyn CommandRecorder, read_access: vk::AccessFlags) {
        if !self.current_write_access.is_empty() && !self.current_read_access.contains(read_access)
        {
            add_global_memory_barrier(cmd, self.current_write_access, read_access);
        }
        self.current_read_access |= read_access;
        self.resource_use.update(cmd.queue_serial());
    }

    /// Records a write, which starts a new access epoch.
    pub fn on_write(&mut self, cmd: &mut dyn CommandRecorder, write_access: vk::AccessFlags) {
        let outstanding = self.current_read_access | self.current_write_access;
        if !outstanding.is_empty() {
            add_global_memory_barrier(cmd, outstanding, write_access);
        }
        self.current_write_access = write_access;
        self.current_read_access = vk::AccessFlags::empty();
        self.resource_use.update(cmd.queue_serial());
    }

    /// Copies `region` of `src` into this buffer.
    pub fn copy_from_buffer(
        &mut self,
        cmd: &mut dyn CommandRecorder,
        src: vk::Buffer,
        region: &vk::BufferCopy,
    ) {
        let outstanding = self.current_read_access | self.current_write_access;
        if !outstanding.is_empty() {
            cmd.pipeline_barrier(
                vk::PipelineStageFlags::ALL_COMMANDS,
                vk::PipelineStageFlags::TRANSFER,
                &[MemoryBarrier {
                    src_access_mask: outstanding,
                    dst_access_mask: vk::AccessFlags::TRANSFER_WRITE,
                }],
                &[],
            );
        }
        self.current_write_access = vk::AccessFlags::TRANSFER_WRITE;
        self.current_read_access = vk::AccessFlags::empty();

        cmd.copy_buffer(src, self.buffer, std::slice::from_ref(region));
        self.resource_use.update(cmd.queue_serial());
    }

    /// Copies `regions` of this buffer into `dst`.
    pub fn copy_to_buffer(
        &mut self,
        cmd: &mut dyn CommandRecorder,
        dst: &mut BufferHelper,
        regions: &[vk::BufferCopy],
    ) {
        self.on_read(cmd, vk::AccessFlags::TRANSFER_READ);
        dst.on_write(cmd, vk::AccessFlags::TRANSFER_WRITE);
        cmd.copy_buffer(self.buffer, dst.buffer, regions);
    }

    pub fn update_queue_serial(&mut self, serial: Serial) {
        self.resource_use.update(serial);
    }

    pub fn queue_serial(&self) -> Serial {
        self.resource_use.serial()
    }

    /// Hands the native objects to deferred destruction after the last recorded use.
    pub fn release(&mut self, ctx: &mut dyn Context) {
        self.unmap(ctx.device());
        let serial = self.resource_use.serial();
        trace!(buffer = ?self.buffer, %serial, "releasing buffer");

        let Self {
            buffer,
            memory,
            buffer_view,
            ..
        } = std::mem::take(self);
        if buffer_view != vk::BufferView::null() {
            ctx.release_object(serial, GarbageObject::BufferView(buffer_view));
        }
        if buffer != vk::Buffer::null() {
            ctx.release_object(serial, GarbageObject::Buffer(buffer));
        }
        if memory != vk::DeviceMemory::null() {
            ctx.release_object(serial, GarbageObject::DeviceMemory(memory));
        }
    }

    /// Destroys everything immediately. The device must not be using the buffer.
    pub fn destroy(&mut self, device: &dyn Device) {
        self.unmap(device);
        let Self {
            buffer,
            memory,
            buffer_view,
            ..
        } = std::mem::take(self);
        if buffer_view != vk::BufferView::null() {
            device.destroy_buffer_view(buffer_view);
        }
        if buffer != vk::Buffer::null() {
            device.destroy_buffer(buffer);
        }
        if memory != vk::DeviceMemory::null() {
            device.free_memory(memory);
        }
    }
}

fn add_global_memory_barrier(
    cmd: &mut dyn CommandRecorder,
    src_access_mask: vk::AccessFlags,
    dst_access_mask: vk::AccessFlags,
) {
    cmd.pipeline_barrier(
        vk::PipelineStageFlags::ALL_COMMANDS,
        vk::PipelineStageFlags::ALL_COMMANDS,
        &[MemoryBarrier {
            src_access_mask,
            dst_access_mask,
        }],
        &[],
    );
}
