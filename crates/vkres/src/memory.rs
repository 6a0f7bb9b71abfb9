use ash::vk;
use tracing::trace;

use crate::context::Device;
use crate::error::{ResourceError, Result};

/// Finds the first memory type allowed by `type_bits` that has all `required` flags.
pub fn find_memory_type(
    properties: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
) -> Option<(u32, vk::MemoryPropertyFlags)> {
    let count = (properties.memory_type_count as usize).min(properties.memory_types.len());
    properties.memory_types[..count]
        .iter()
        .enumerate()
        .find(|(index, memory_type)| {
            type_bits & (1 << index) != 0 && memory_type.property_flags.contains(required)
        })
        .map(|(index, memory_type)| (index as u32, memory_type.property_flags))
}

fn allocate_for_requirements(
    device: &dyn Device,
    requirements: vk::MemoryRequirements,
    required: vk::MemoryPropertyFlags,
) -> Result<(vk::DeviceMemory, vk::MemoryPropertyFlags)> {
    let (type_index, flags) = find_memory_type(
        device.memory_properties(),
        requirements.memory_type_bits,
        required,
    )
    .ok_or(ResourceError::NoMemoryType(required))?;

    trace!(
        size = requirements.size,
        type_index,
        ?flags,
        "allocating device memory"
    );
    let memory = device.allocate_memory(requirements.size, type_index)?;
    Ok((memory, flags))
}

/// Allocates and binds memory for `buffer`.
///
/// Returns the memory and the property flags actually obtained, which may be
/// a superset of `required` (for example host-coherent on top of host-visible).
pub fn allocate_buffer_memory(
    device: &dyn Device,
    required: vk::MemoryPropertyFlags,
    buffer: vk::Buffer,
) -> Result<(vk::DeviceMemory, vk::MemoryPropertyFlags)> {
    let requirements = device.buffer_memory_requirements(buffer);
    let (memory, flags) = allocate_for_requirements(device, requirements, required)?;
    if let Err(err) = device.bind_buffer_memory(buffer, memory) {
        device.free_memory(memory);
        return Err(err);
    }
    Ok((memory, flags))
}

pub fn allocate_image_memory(
    device: &dyn Device,
    required: vk::MemoryPropertyFlags,
    image: vk::Image,
) -> Result<(vk::DeviceMemory, vk::MemoryPropertyFlags)> {
    let requirements = device.image_memory_requirements(image);
    let (memory, flags) = allocate_for_requirements(device, requirements, required)?;
    if let Err(err) = device.bind_image_memory(image, memory) {
        device.free_memory(memory);
        return Err(err);
    }
    Ok((memory, flags))
}
