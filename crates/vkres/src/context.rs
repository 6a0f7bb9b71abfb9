//! Contracts the helpers consume from the device/context layer.
//!
//! Helpers never own a device or a clock. They receive a [`Context`] (or just
//! the [`Device`] when no serial is involved) for every operation, which keeps
//! the serial bookkeeping explicit and lets tests drive the clock by hand.

use ash::vk;
use tracing::trace;

use crate::config::{DeviceLimits, ResourceConfig};
use crate::error::Result;
use crate::serial::{Serial, SerialClock};

/// Native object operations used by the helpers.
///
/// All handles passed back in must have been created by the same device.
pub trait Device {
    fn limits(&self) -> &DeviceLimits;
    fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties;

    fn create_buffer(&self, info: &vk::BufferCreateInfo<'_>) -> Result<vk::Buffer>;
    fn destroy_buffer(&self, buffer: vk::Buffer);
    fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements;
    fn bind_buffer_memory(&self, buffer: vk::Buffer, memory: vk::DeviceMemory) -> Result<()>;

    fn create_buffer_view(&self, info: &vk::BufferViewCreateInfo<'_>) -> Result<vk::BufferView>;
    fn destroy_buffer_view(&self, view: vk::BufferView);

    fn create_image(&self, info: &vk::ImageCreateInfo<'_>) -> Result<vk::Image>;
    fn destroy_image(&self, image: vk::Image);
    fn image_memory_requirements(&self, image: vk::Image) -> vk::MemoryRequirements;
    fn bind_image_memory(&self, image: vk::Image, memory: vk::DeviceMemory) -> Result<()>;

    fn create_image_view(&self, info: &vk::ImageViewCreateInfo<'_>) -> Result<vk::ImageView>;
    fn destroy_image_view(&self, view: vk::ImageView);

    fn allocate_memory(&self, size: vk::DeviceSize, memory_type_index: u32)
        -> Result<vk::DeviceMemory>;
    fn free_memory(&self, memory: vk::DeviceMemory);
    /// Maps `size` bytes starting at `offset`; the pointer stays valid until unmapped.
    fn map_memory(
        &self,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
    ) -> Result<*mut u8>;
    fn unmap_memory(&self, memory: vk::DeviceMemory);
    fn flush_mapped_memory(
        &self,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
    ) -> Result<()>;
    fn invalidate_mapped_memory(
        &self,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
    ) -> Result<()>;

    fn create_descriptor_pool(
        &self,
        info: &vk::DescriptorPoolCreateInfo<'_>,
    ) -> Result<vk::DescriptorPool>;
    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool);
    fn allocate_descriptor_sets(
        &self,
        pool: vk::DescriptorPool,
        layouts: &[vk::DescriptorSetLayout],
    ) -> Result<Vec<vk::DescriptorSet>>;

    fn create_query_pool(&self, info: &vk::QueryPoolCreateInfo<'_>) -> Result<vk::QueryPool>;
    fn destroy_query_pool(&self, pool: vk::QueryPool);

    fn create_semaphore(&self) -> Result<vk::Semaphore>;
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);
}

/// A native object waiting for its serial to retire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GarbageObject {
    Buffer(vk::Buffer),
    BufferView(vk::BufferView),
    DeviceMemory(vk::DeviceMemory),
    Image(vk::Image),
    ImageView(vk::ImageView),
    DescriptorPool(vk::DescriptorPool),
    QueryPool(vk::QueryPool),
    Semaphore(vk::Semaphore),
}

impl GarbageObject {
    pub fn destroy(self, device: &dyn Device) {
        trace!("destroying {:?}", self);
        match self {
            GarbageObject::Buffer(buffer) => device.destroy_buffer(buffer),
            GarbageObject::BufferView(view) => device.destroy_buffer_view(view),
            GarbageObject::DeviceMemory(memory) => device.free_memory(memory),
            GarbageObject::Image(image) => device.destroy_image(image),
            GarbageObject::ImageView(view) => device.destroy_image_view(view),
            GarbageObject::DescriptorPool(pool) => device.destroy_descriptor_pool(pool),
            GarbageObject::QueryPool(pool) => device.destroy_query_pool(pool),
            GarbageObject::Semaphore(semaphore) => device.destroy_semaphore(semaphore),
        }
    }
}

/// The context every helper operation runs under.
pub trait Context {
    fn device(&self) -> &dyn Device;
    fn clock(&self) -> &SerialClock;
    fn config(&self) -> &ResourceConfig;

    /// Blocks until all submitted work has finished executing.
    fn finish(&mut self) -> Result<()>;

    /// Destroys `object` once `serial` has completed.
    fn release_object(&mut self, serial: Serial, object: GarbageObject);

    fn current_queue_serial(&self) -> Serial {
        self.clock().current()
    }

    fn last_completed_queue_serial(&self) -> Serial {
        self.clock().last_completed()
    }

    fn is_serial_in_use(&self, serial: Serial) -> bool {
        self.clock().is_in_use(serial)
    }
}
