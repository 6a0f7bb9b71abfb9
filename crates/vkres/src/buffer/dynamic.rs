use ash::vk;
use tracing::debug;

use super::BufferHelper;
use crate::config::DeviceLimits;
use crate::context::{Context, Device};
use crate::error::{overflow, Result};
use crate::serial::Serial;

/// One region handed out by [`DynamicBuffer::allocate`].
#[derive(Debug)]
pub struct DynamicAllocation<'a> {
    /// Host pointer to the region when the buffer is host visible.
    pub data: Option<&'a mut [u8]>,
    pub buffer: vk::Buffer,
    pub offset: vk::DeviceSize,
    /// A fresh backing buffer was created to satisfy this request.
    pub new_buffer_allocated: bool,
}

/// Linear suballocator over one large buffer.
///
/// Allocations bump a cursor. When a request does not fit, the current buffer
/// is flushed and retained until its serial retires, and a new buffer of at
/// least `min_size` bytes takes its place.
#[derive(Debug)]
pub struct DynamicBuffer {
    usage: vk::BufferUsageFlags,
    host_visible: bool,
    min_size: usize,
    alignment: usize,
    buffer: Option<BufferHelper>,
    next_allocation_offset: usize,
    last_flush_or_invalidate_offset: usize,
    size: usize,
    retained_buffers: Vec<BufferHelper>,
}

impl DynamicBuffer {
    pub fn new(usage: vk::BufferUsageFlags, min_size: usize, host_visible: bool) -> Self {
        Self {
            usage,
            host_visible,
            min_size,
            alignment: 0,
            buffer: None,
            next_allocation_offset: 0,
            last_flush_or_invalidate_offset: 0,
            size: 0,
            retained_buffers: Vec::new(),
        }
    }

    /// Sets the allocation alignment, never below the device's non-coherent atom.
    pub fn init(&mut self, alignment: usize, limits: &DeviceLimits) {
        debug_assert!(alignment > 0);
        self.alignment = alignment.max(limits.non_coherent_atom_size as usize);
    }

    pub fn alignment(&self) -> usize {
        self.alignment
    }

    pub fn current_buffer(&self) -> Option<&BufferHelper> {
        self.buffer.as_ref()
    }

    pub fn current_buffer_mut(&mut self) -> Option<&mut BufferHelper> {
        self.buffer.as_mut()
    }

    pub fn retained_buffer_count(&self) -> usize {
        self.retained_buffers.len()
    }

    /// Hands out `size_in_bytes` bytes at an aligned offset.
    pub fn allocate(
        &mut self,
        ctx: &dyn Context,
        size_in_bytes: usize,
    ) -> Result<DynamicAllocation<'_>> {
        debug_assert!(size_in_bytes > 0);
        debug_assert!(self.alignment > 0, "allocate before init");

        let device = ctx.device();
        let size_to_allocate = round_up(size_in_bytes, self.alignment)
            .ok_or_else(|| overflow("dynamic buffer allocation size"))?;
        let fits = self.buffer.is_some()
            && self
                .next_allocation_offset
                .checked_add(size_to_allocate)
                .is_some_and(|end| end <= self.size);

        let buffer = match self.buffer.take() {
            Some(buffer) if fits => self.buffer.insert(buffer),
            retired => {
                if let Some(mut buffer) = retired {
                    if let Err(err) = self.flush_buffer(device, &buffer) {
                        self.buffer = Some(buffer);
                        return Err(err);
                    }
                    buffer.unmap(device);
                    buffer.update_queue_serial(ctx.current_queue_serial());
                    self.retained_buffers.push(buffer);
                }

                let new_size = size_to_allocate.max(self.min_size);
                debug!(
                    size = new_size,
                    retained = self.retained_buffers.len(),
                    "dynamic buffer growing"
                );

                let create_info = vk::BufferCreateInfo::default()
                    .size(new_size as vk::DeviceSize)
                    .usage(self.usage)
                    .sharing_mode(vk::SharingMode::EXCLUSIVE);
                let memory_flags = if self.host_visible {
                    vk::MemoryPropertyFlags::HOST_VISIBLE
                } else {
                    vk::MemoryPropertyFlags::DEVICE_LOCAL
                };

                let mut buffer = BufferHelper::new();
                buffer.init(device, &create_info, memory_flags)?;
                self.size = new_size;
                self.next_allocation_offset = 0;
                self.last_flush_or_invalidate_offset = 0;
                self.buffer.insert(buffer)
            }
        };

        let offset = self.next_allocation_offset;
        self.next_allocation_offset += size_to_allocate;

        let handle = buffer.buffer();
        let data = if self.host_visible {
            let mapped = buffer.map(device)?;
            Some(&mut mapped[offset..offset + size_in_bytes])
        } else {
            None
        };

        Ok(DynamicAllocation {
            data,
            buffer: handle,
            offset: offset as vk::DeviceSize,
            new_buffer_allocated: !fits,
        })
    }

    fn flush_buffer(&mut self, device: &dyn Device, buffer: &BufferHelper) -> Result<()> {
        if self.host_visible && self.next_allocation_offset > self.last_flush_or_invalidate_offset {
            let start = self.last_flush_or_invalidate_offset;
            buffer.flush(
                device,
                start as vk::DeviceSize,
                (self.next_allocation_offset - start) as vk::DeviceSize,
            )?;
            self.last_flush_or_invalidate_offset = self.next_allocation_offset;
        }
        Ok(())
    }

    /// Flushes the bytes written since the last flush or invalidate.
    pub fn flush(&mut self, device: &dyn Device) -> Result<()> {
        if let Some(buffer) = self.buffer.take() {
            let result = self.flush_buffer(device, &buffer);
            self.buffer = Some(buffer);
            result?;
        }
        Ok(())
    }

    /// Invalidates the bytes allocated since the last flush or invalidate.
    pub fn invalidate(&mut self, device: &dyn Device) -> Result<()> {
        if !self.host_visible || self.next_allocation_offset <= self.last_flush_or_invalidate_offset {
            return Ok(());
        }
        if let Some(buffer) = &self.buffer {
            let start = self.last_flush_or_invalidate_offset;
            buffer.invalidate(
                device,
                start as vk::DeviceSize,
                (self.next_allocation_offset - start) as vk::DeviceSize,
            )?;
            self.last_flush_or_invalidate_offset = self.next_allocation_offset;
        }
        Ok(())
    }

    /// Marks every backing as read by work recorded under `serial`.
    pub fn update_queue_serial(&mut self, serial: Serial) {
        for buffer in self.retained_buffers.iter_mut().chain(self.buffer.as_mut()) {
            buffer.update_queue_serial(serial);
        }
    }

    /// Releases retired backings under the current serial; the current one
    /// keeps serving allocations.
    pub fn release_retained_buffers(&mut self, ctx: &mut dyn Context) {
        let serial = ctx.current_queue_serial();
        for mut buffer in self.retained_buffers.drain(..) {
            buffer.update_queue_serial(serial);
            buffer.release(ctx);
        }
    }

    /// Hands every backing to deferred destruction tagged with the current serial.
    pub fn release(&mut self, ctx: &mut dyn Context) {
        self.reset();
        self.release_retained_buffers(ctx);
        if let Some(mut buffer) = self.buffer.take() {
            buffer.update_queue_serial(ctx.current_queue_serial());
            buffer.release(ctx);
        }
    }

    /// Immediate teardown; only valid once the device is idle.
    pub fn destroy(&mut self, device: &dyn Device) {
        self.reset();
        for mut buffer in self.retained_buffers.drain(..) {
            buffer.destroy(device);
        }
        if let Some(mut buffer) = self.buffer.take() {
            buffer.destroy(device);
        }
    }

    /// Forces a new backing of at least `min_size` bytes on the next allocation.
    pub fn set_minimum_size_for_testing(&mut self, min_size: usize) {
        self.min_size = min_size;
        self.next_allocation_offset = self.size;
    }

    fn reset(&mut self) {
        self.size = 0;
        self.next_allocation_offset = 0;
        self.last_flush_or_invalidate_offset = 0;
    }
}

fn round_up(value: usize, alignment: usize) -> Option<usize> {
    Some(value.checked_add(alignment - 1)? / alignment * alignment)
}
