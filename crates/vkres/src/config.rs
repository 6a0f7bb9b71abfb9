use ash::vk;

/// Minimum backing size of the line-loop index suballocator.
pub const LINE_LOOP_BUFFER_MIN_SIZE: usize = 1024 * 1024;

/// Minimum backing size of an image's staging suballocator.
pub const STAGING_BUFFER_SIZE: usize = 1024 * 16;

/// Descriptor sets per descriptor pool instance.
pub const DESCRIPTOR_POOL_MAX_SETS: u32 = 128;

/// Hard ceiling on backing instances in any growable pool.
pub const MAX_POOL_INSTANCES: usize = 99_999;

/// Tunables shared by all helpers created under one context.
#[derive(Debug, Clone)]
pub struct ResourceConfig {
    pub line_loop_buffer_min_size: usize,
    pub staging_buffer_size: usize,
    pub descriptor_pool_max_sets: u32,
    pub max_pool_instances: usize,
    /// Driver workaround: append a one byte region to line-loop index copies.
    pub extra_copy_buffer_region: bool,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            line_loop_buffer_min_size: LINE_LOOP_BUFFER_MIN_SIZE,
            staging_buffer_size: STAGING_BUFFER_SIZE,
            descriptor_pool_max_sets: DESCRIPTOR_POOL_MAX_SETS,
            max_pool_instances: MAX_POOL_INSTANCES,
            extra_copy_buffer_region: false,
        }
    }
}

/// The subset of physical-device limits the helpers depend on.
#[derive(Debug, Clone, Copy)]
pub struct DeviceLimits {
    pub non_coherent_atom_size: u64,
    pub optimal_buffer_copy_offset_alignment: u64,
    pub timestamp_period: f32,
}

impl Default for DeviceLimits {
    fn default() -> Self {
        Self {
            non_coherent_atom_size: 1,
            optimal_buffer_copy_offset_alignment: 1,
            timestamp_period: 1.0,
        }
    }
}

impl From<&vk::PhysicalDeviceLimits> for DeviceLimits {
    fn from(limits: &vk::PhysicalDeviceLimits) -> Self {
        Self {
            non_coherent_atom_size: limits.non_coherent_atom_size,
            optimal_buffer_copy_offset_alignment: limits.optimal_buffer_copy_offset_alignment,
            timestamp_period: limits.timestamp_period,
        }
    }
}
