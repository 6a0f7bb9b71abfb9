use ash::vk;
use tracing::debug;

use crate::config::DeviceLimits;
use crate::context::Device;
use crate::error::{ResourceError, Result, VkResultExt};

/// A logical device plus the physical-device facts the helpers read.
pub struct VulkanDevice {
    pub(crate) device: ash::Device,
    limits: DeviceLimits,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
}

/// Picks a device with a graphics queue, preferring discrete GPUs.
pub(crate) fn select_physical_device(
    instance: &ash::Instance,
) -> Result<(vk::PhysicalDevice, u32)> {
    let physical_devices =
        unsafe { instance.enumerate_physical_devices() }.vk_context("vkEnumeratePhysicalDevices")?;

    let mut candidates = physical_devices
        .into_iter()
        .filter_map(|physical_device| {
            let families =
                unsafe { instance.get_physical_device_queue_family_properties(physical_device) };
            let family = families
                .iter()
                .position(|family| family.queue_flags.contains(vk::QueueFlags::GRAPHICS))?;
            let properties = unsafe { instance.get_physical_device_properties(physical_device) };
            Some((physical_device, family as u32, properties))
        })
        .collect::<Vec<_>>();
    candidates.sort_by_key(|(_, _, properties)| {
        properties.device_type != vk::PhysicalDeviceType::DISCRETE_GPU
    });

    let (physical_device, family, properties) =
        candidates.into_iter().next().ok_or(ResourceError::NoAdapter)?;
    let name = properties
        .device_name_as_c_str()
        .unwrap_or(c"unknown")
        .to_string_lossy();
    debug!(device = %name, queue_family = family, "selected physical device");
    Ok((physical_device, family))
}

impl VulkanDevice {
    pub(crate) fn new(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        queue_family_index: u32,
    ) -> Result<Self> {
        let priorities = [1.0f32];
        let queue_info = vk::DeviceQueueCreateInfo::default()
            .queue_family_index(queue_family_index)
            .queue_priorities(&priorities);
        let device_info =
            vk::DeviceCreateInfo::default().queue_create_infos(std::slice::from_ref(&queue_info));
        let device = unsafe { instance.create_device(physical_device, &device_info, None) }
            .vk_context("vkCreateDevice")?;

        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let memory_properties =
            unsafe { instance.get_physical_device_memory_properties(physical_device) };

        Ok(Self {
            device,
            limits: DeviceLimits::from(&properties.limits),
            memory_properties,
        })
    }

    pub fn raw(&self) -> &ash::Device {
        &self.device
    }
}

fn mapped_range(
    memory: vk::DeviceMemory,
    offset: vk::DeviceSize,
    size: vk::DeviceSize,
) -> vk::MappedMemoryRange<'static> {
    vk::MappedMemoryRange::default()
        .memory(memory)
        .offset(offset)
        .size(size)
}

// SAFETY (all blocks below): handles come from this device and the helpers
// only destroy objects the device is no longer using.
impl Device for VulkanDevice {
    fn limits(&self) -> &DeviceLimits {
        &self.limits
    }

    fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.memory_properties
    }

    fn create_buffer(&self, info: &vk::BufferCreateInfo<'_>) -> Result<vk::Buffer> {
        unsafe { self.device.create_buffer(info, None) }.vk_context("vkCreateBuffer")
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        unsafe { self.device.destroy_buffer(buffer, None) }
    }

    fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements {
        unsafe { self.device.get_buffer_memory_requirements(buffer) }
    }

    fn bind_buffer_memory(&self, buffer: vk::Buffer, memory: vk::DeviceMemory) -> Result<()> {
        unsafe { self.device.bind_buffer_memory(buffer, memory, 0) }
            .vk_context("vkBindBufferMemory")
    }

    fn create_buffer_view(&self, info: &vk::BufferViewCreateInfo<'_>) -> Result<vk::BufferView> {
        unsafe { self.device.create_buffer_view(info, None) }.vk_context("vkCreateBufferView")
    }

    fn destroy_buffer_view(&self, view: vk::BufferView) {
        unsafe { self.device.destroy_buffer_view(view, None) }
    }

    fn create_image(&self, info: &vk::ImageCreateInfo<'_>) -> Result<vk::Image> {
        unsafe { self.device.create_image(info, None) }.vk_context("vkCreateImage")
    }

    fn destroy_image(&self, image: vk::Image) {
        unsafe { self.device.destroy_image(image, None) }
    }

    fn image_memory_requirements(&self, image: vk::Image) -> vk::MemoryRequirements {
        unsafe { self.device.get_image_memory_requirements(image) }
    }

    fn bind_image_memory(&self, image: vk::Image, memory: vk::DeviceMemory) -> Result<()> {
        unsafe { self.device.bind_image_memory(image, memory, 0) }.vk_context("vkBindImageMemory")
    }

    fn create_image_view(&self, info: &vk::ImageViewCreateInfo<'_>) -> Result<vk::ImageView> {
        unsafe { self.device.create_image_view(info, None) }.vk_context("vkCreateImageView")
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        unsafe { self.device.destroy_image_view(view, None) }
    }

    fn allocate_memory(
        &self,
        size: vk::DeviceSize,
        memory_type_index: u32,
    ) -> Result<vk::DeviceMemory> {
        let info = vk::MemoryAllocateInfo::default()
            .allocation_size(size)
            .memory_type_index(memory_type_index);
        unsafe { self.device.allocate_memory(&info, None) }.vk_context("vkAllocateMemory")
    }

    fn free_memory(&self, memory: vk::DeviceMemory) {
        unsafe { self.device.free_memory(memory, None) }
    }

    fn map_memory(
        &self,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
    ) -> Result<*mut u8> {
        unsafe {
            self.device
                .map_memory(memory, offset, size, vk::MemoryMapFlags::empty())
        }
        .vk_context("vkMapMemory")
        .map(|ptr| ptr.cast())
    }

    fn unmap_memory(&self, memory: vk::DeviceMemory) {
        unsafe { self.device.unmap_memory(memory) }
    }

    fn flush_mapped_memory(
        &self,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
    ) -> Result<()> {
        let range = mapped_range(memory, offset, size);
        unsafe { self.device.flush_mapped_memory_ranges(&[range]) }
            .vk_context("vkFlushMappedMemoryRanges")
    }

    fn invalidate_mapped_memory(
        &self,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
    ) -> Result<()> {
        let range = mapped_range(memory, offset, size);
        unsafe { self.device.invalidate_mapped_memory_ranges(&[range]) }
            .vk_context("vkInvalidateMappedMemoryRanges")
    }

    fn create_descriptor_pool(
        &self,
        info: &vk::DescriptorPoolCreateInfo<'_>,
    ) -> Result<vk::DescriptorPool> {
        unsafe { self.device.create_descriptor_pool(info, None) }
            .vk_context("vkCreateDescriptorPool")
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        unsafe { self.device.destroy_descriptor_pool(pool, None) }
    }

    fn allocate_descriptor_sets(
        &self,
        pool: vk::DescriptorPool,
        layouts: &[vk::DescriptorSetLayout],
    ) -> Result<Vec<vk::DescriptorSet>> {
        let info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(pool)
            .set_layouts(layouts);
        unsafe { self.device.allocate_descriptor_sets(&info) }
            .vk_context("vkAllocateDescriptorSets")
    }

    fn create_query_pool(&self, info: &vk::QueryPoolCreateInfo<'_>) -> Result<vk::QueryPool> {
        unsafe { self.device.create_query_pool(info, None) }.vk_context("vkCreateQueryPool")
    }

    fn destroy_query_pool(&self, pool: vk::QueryPool) {
        unsafe { self.device.destroy_query_pool(pool, None) }
    }

    fn create_semaphore(&self) -> Result<vk::Semaphore> {
        let info = vk::SemaphoreCreateInfo::default();
        unsafe { self.device.create_semaphore(&info, None) }.vk_context("vkCreateSemaphore")
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.device.destroy_semaphore(semaphore, None) }
    }
}
