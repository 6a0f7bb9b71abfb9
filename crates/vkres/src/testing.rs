//! In-memory stand-ins for the device, context and command stream.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};

use ash::vk::{self, Handle};
use tracing_subscriber::EnvFilter;

use crate::command::{CommandRecorder, ImageBarrier, MemoryBarrier};
use crate::config::{DeviceLimits, ResourceConfig};
use crate::context::{Context, Device, GarbageObject};
use crate::error::{ResourceError, Result};
use crate::serial::{Serial, SerialClock};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub const DEVICE_LOCAL_TYPE: u32 = 0;
pub const HOST_CACHED_TYPE: u32 = 1;
pub const HOST_COHERENT_TYPE: u32 = 2;

const IMAGE_MEMORY_SIZE: u64 = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRange {
    pub memory: vk::DeviceMemory,
    pub offset: u64,
    pub size: u64,
}

/// Device with host-backed memory and integer handles.
pub struct MockDevice {
    limits: DeviceLimits,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    next_handle: Cell<u64>,
    live: RefCell<HashSet<u64>>,
    memory: RefCell<HashMap<u64, Box<[u8]>>>,
    buffer_sizes: RefCell<HashMap<u64, u64>>,
    descriptor_pools: RefCell<HashMap<u64, (u32, u32)>>,
    failure: Cell<Option<(&'static str, usize)>>,
    pub flushes: RefCell<Vec<MemoryRange>>,
    pub invalidates: RefCell<Vec<MemoryRange>>,
    pub created_descriptor_pools: Cell<usize>,
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new(DeviceLimits::default())
    }
}

impl MockDevice {
    pub fn new(limits: DeviceLimits) -> Self {
        let mut memory_properties = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: 3,
            ..Default::default()
        };
        memory_properties.memory_types[DEVICE_LOCAL_TYPE as usize].property_flags =
            vk::MemoryPropertyFlags::DEVICE_LOCAL;
        memory_properties.memory_types[HOST_CACHED_TYPE as usize].property_flags =
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_CACHED;
        memory_properties.memory_types[HOST_COHERENT_TYPE as usize].property_flags =
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;

        Self {
            limits,
            memory_properties,
            next_handle: Cell::new(1),
            live: RefCell::default(),
            memory: RefCell::default(),
            buffer_sizes: RefCell::default(),
            descriptor_pools: RefCell::default(),
            failure: Cell::new(None),
            flushes: RefCell::default(),
            invalidates: RefCell::default(),
            created_descriptor_pools: Cell::new(0),
        }
    }

    /// Makes the call named `call` fail after `skip` successful calls.
    pub fn fail_on_nth(&self, call: &'static str, skip: usize) {
        self.failure.set(Some((call, skip)));
    }

    pub fn fail_on(&self, call: &'static str) {
        self.fail_on_nth(call, 0);
    }

    pub fn live_objects(&self) -> usize {
        self.live.borrow().len()
    }

    pub fn is_live(&self, handle: impl Handle) -> bool {
        self.live.borrow().contains(&handle.as_raw())
    }

    pub fn memory_contents(&self, memory: vk::DeviceMemory) -> Vec<u8> {
        self.memory
            .borrow()
            .get(&memory.as_raw())
            .map(|bytes| bytes.to_vec())
            .unwrap_or_default()
    }

    pub fn write_memory(&self, memory: vk::DeviceMemory, offset: usize, data: &[u8]) {
        let mut allocations = self.memory.borrow_mut();
        let bytes = allocations
            .get_mut(&memory.as_raw())
            .expect("unknown memory");
        bytes[offset..offset + data.len()].copy_from_slice(data);
    }

    fn check(&self, call: &'static str) -> Result<()> {
        if let Some((name, remaining)) = self.failure.get() {
            if name == call {
                if remaining == 0 {
                    self.failure.set(None);
                    return Err(ResourceError::Vulkan {
                        call,
                        result: vk::Result::ERROR_OUT_OF_DEVICE_MEMORY,
                    });
                }
                self.failure.set(Some((name, remaining - 1)));
            }
        }
        Ok(())
    }

    fn create<H: Handle>(&self, call: &'static str) -> Result<H> {
        self.check(call)?;
        let raw = self.next_handle.get();
        self.next_handle.set(raw + 1);
        self.live.borrow_mut().insert(raw);
        Ok(H::from_raw(raw))
    }

    fn destroy(&self, handle: impl Handle) {
        let raw = handle.as_raw();
        assert!(
            self.live.borrow_mut().remove(&raw),
            "destroying unknown or already destroyed handle {raw}"
        );
    }
}

impl Device for MockDevice {
    fn limits(&self) -> &DeviceLimits {
        &self.limits
    }

    fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.memory_properties
    }

    fn create_buffer(&self, info: &vk::BufferCreateInfo<'_>) -> Result<vk::Buffer> {
        let buffer: vk::Buffer = self.create("vkCreateBuffer")?;
        self.buffer_sizes
            .borrow_mut()
            .insert(buffer.as_raw(), info.size);
        Ok(buffer)
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        self.buffer_sizes.borrow_mut().remove(&buffer.as_raw());
        self.destroy(buffer);
    }

    fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements {
        vk::MemoryRequirements {
            size: self.buffer_sizes.borrow()[&buffer.as_raw()],
            alignment: 1,
            memory_type_bits: 0b111,
        }
    }

    fn bind_buffer_memory(&self, _buffer: vk::Buffer, _memory: vk::DeviceMemory) -> Result<()> {
        self.check("vkBindBufferMemory")
    }

    fn create_buffer_view(&self, _info: &vk::BufferViewCreateInfo<'_>) -> Result<vk::BufferView> {
        self.create("vkCreateBufferView")
    }

    fn destroy_buffer_view(&self, view: vk::BufferView) {
        self.destroy(view);
    }

    fn create_image(&self, _info: &vk::ImageCreateInfo<'_>) -> Result<vk::Image> {
        self.create("vkCreateImage")
    }

    fn destroy_image(&self, image: vk::Image) {
        self.destroy(image);
    }

    fn image_memory_requirements(&self, _image: vk::Image) -> vk::MemoryRequirements {
        vk::MemoryRequirements {
            size: IMAGE_MEMORY_SIZE,
            alignment: 1,
            memory_type_bits: 0b111,
        }
    }

    fn bind_image_memory(&self, _image: vk::Image, _memory: vk::DeviceMemory) -> Result<()> {
        self.check("vkBindImageMemory")
    }

    fn create_image_view(&self, _info: &vk::ImageViewCreateInfo<'_>) -> Result<vk::ImageView> {
        self.create("vkCreateImageView")
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        self.destroy(view);
    }

    fn allocate_memory(
        &self,
        size: vk::DeviceSize,
        _memory_type_index: u32,
    ) -> Result<vk::DeviceMemory> {
        let memory: vk::DeviceMemory = self.create("vkAllocateMemory")?;
        self.memory
            .borrow_mut()
            .insert(memory.as_raw(), vec![0u8; size as usize].into_boxed_slice());
        Ok(memory)
    }

    fn free_memory(&self, memory: vk::DeviceMemory) {
        self.memory.borrow_mut().remove(&memory.as_raw());
        self.destroy(memory);
    }

    fn map_memory(
        &self,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
    ) -> Result<*mut u8> {
        self.check("vkMapMemory")?;
        let mut allocations = self.memory.borrow_mut();
        let bytes = allocations
            .get_mut(&memory.as_raw())
            .ok_or(ResourceError::Vulkan {
                call: "vkMapMemory",
                result: vk::Result::ERROR_MEMORY_MAP_FAILED,
            })?;
        if size != vk::WHOLE_SIZE {
            assert!(offset + size <= bytes.len() as u64, "mapping past the allocation");
        }
        Ok(bytes[offset as usize..].as_mut_ptr())
    }

    fn unmap_memory(&self, _memory: vk::DeviceMemory) {}

    fn flush_mapped_memory(
        &self,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
    ) -> Result<()> {
        self.check("vkFlushMappedMemoryRanges")?;
        self.flushes.borrow_mut().push(MemoryRange {
            memory,
            offset,
            size,
        });
        Ok(())
    }

    fn invalidate_mapped_memory(
        &self,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
    ) -> Result<()> {
        self.check("vkInvalidateMappedMemoryRanges")?;
        self.invalidates.borrow_mut().push(MemoryRange {
            memory,
            offset,
            size,
        });
        Ok(())
    }

    fn create_descriptor_pool(
        &self,
        info: &vk::DescriptorPoolCreateInfo<'_>,
    ) -> Result<vk::DescriptorPool> {
        let pool: vk::DescriptorPool = self.create("vkCreateDescriptorPool")?;
        self.descriptor_pools
            .borrow_mut()
            .insert(pool.as_raw(), (info.max_sets, 0));
        self.created_descriptor_pools
            .set(self.created_descriptor_pools.get() + 1);
        Ok(pool)
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        self.descriptor_pools.borrow_mut().remove(&pool.as_raw());
        self.destroy(pool);
    }

    fn allocate_descriptor_sets(
        &self,
        pool: vk::DescriptorPool,
        layouts: &[vk::DescriptorSetLayout],
    ) -> Result<Vec<vk::DescriptorSet>> {
        self.check("vkAllocateDescriptorSets")?;
        {
            let mut pools = self.descriptor_pools.borrow_mut();
            let (max_sets, allocated) = pools
                .get_mut(&pool.as_raw())
                .ok_or(ResourceError::Vulkan {
                    call: "vkAllocateDescriptorSets",
                    result: vk::Result::ERROR_UNKNOWN,
                })?;
            if *allocated + layouts.len() as u32 > *max_sets {
                return Err(ResourceError::Vulkan {
                    call: "vkAllocateDescriptorSets",
                    result: vk::Result::ERROR_OUT_OF_POOL_MEMORY,
                });
            }
            *allocated += layouts.len() as u32;
        }
        // Sets are owned by their pool; they are not tracked as live objects.
        Ok(layouts
            .iter()
            .map(|_| {
                let raw = self.next_handle.get();
                self.next_handle.set(raw + 1);
                vk::DescriptorSet::from_raw(raw)
            })
            .collect())
    }

    fn create_query_pool(&self, _info: &vk::QueryPoolCreateInfo<'_>) -> Result<vk::QueryPool> {
        self.create("vkCreateQueryPool")
    }

    fn destroy_query_pool(&self, pool: vk::QueryPool) {
        self.destroy(pool);
    }

    fn create_semaphore(&self) -> Result<vk::Semaphore> {
        self.create("vkCreateSemaphore")
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        self.destroy(semaphore);
    }
}

/// Context driven by hand: tests submit and complete serials explicitly.
pub struct MockContext {
    pub device: MockDevice,
    pub clock: SerialClock,
    pub config: ResourceConfig,
    pub garbage: Vec<(Serial, GarbageObject)>,
    pub finish_count: usize,
}

impl Default for MockContext {
    fn default() -> Self {
        Self::new(ResourceConfig::default())
    }
}

impl MockContext {
    pub fn new(config: ResourceConfig) -> Self {
        init_tracing();
        Self {
            device: MockDevice::default(),
            clock: SerialClock::new(),
            config,
            garbage: Vec::new(),
            finish_count: 0,
        }
    }

    pub fn with_limits(limits: DeviceLimits) -> Self {
        Self {
            device: MockDevice::new(limits),
            ..Self::default()
        }
    }

    pub fn command_buffer(&self) -> RecordingCommandBuffer {
        RecordingCommandBuffer::new(self.clock.current())
    }

    pub fn submit(&mut self) -> Serial {
        self.clock.submit()
    }

    pub fn complete_all(&mut self) {
        self.clock.complete_all();
        self.collect_garbage();
    }

    /// Destroys every garbage object whose serial has completed.
    pub fn collect_garbage(&mut self) {
        let last_completed = self.clock.last_completed();
        let device = &self.device;
        self.garbage.retain(|(serial, object)| {
            if *serial <= last_completed {
                object.destroy(device);
                false
            } else {
                true
            }
        });
    }
}

impl Context for MockContext {
    fn device(&self) -> &dyn Device {
        &self.device
    }

    fn clock(&self) -> &SerialClock {
        &self.clock
    }

    fn config(&self) -> &ResourceConfig {
        &self.config
    }

    fn finish(&mut self) -> Result<()> {
        self.finish_count += 1;
        self.complete_all();
        Ok(())
    }

    fn release_object(&mut self, serial: Serial, object: GarbageObject) {
        self.garbage.push((serial, object));
    }
}

#[derive(Debug, Clone)]
pub enum Command {
    Barrier {
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        memory: Vec<MemoryBarrier>,
        images: Vec<ImageBarrier>,
    },
    CopyBuffer {
        src: vk::Buffer,
        dst: vk::Buffer,
        regions: Vec<vk::BufferCopy>,
    },
    CopyBufferToImage {
        src: vk::Buffer,
        dst: vk::Image,
        layout: vk::ImageLayout,
        regions: Vec<vk::BufferImageCopy>,
    },
    CopyImage {
        src: vk::Image,
        src_layout: vk::ImageLayout,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: Vec<vk::ImageCopy>,
    },
    BlitImage {
        src: vk::Image,
        dst: vk::Image,
        regions: Vec<vk::ImageBlit>,
        filter: vk::Filter,
    },
    ClearColor {
        image: vk::Image,
        layout: vk::ImageLayout,
        ranges: Vec<vk::ImageSubresourceRange>,
    },
    ClearDepthStencil {
        image: vk::Image,
        layout: vk::ImageLayout,
        value: vk::ClearDepthStencilValue,
        ranges: Vec<vk::ImageSubresourceRange>,
    },
    ResetQueryPool {
        pool: vk::QueryPool,
        first: u32,
        count: u32,
    },
    BeginQuery {
        pool: vk::QueryPool,
        query: u32,
    },
    EndQuery {
        pool: vk::QueryPool,
        query: u32,
    },
    WriteTimestamp {
        stage: vk::PipelineStageFlags,
        pool: vk::QueryPool,
        query: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    },
}

/// Captures commands instead of executing them.
#[derive(Debug, Default)]
pub struct RecordingCommandBuffer {
    serial: Serial,
    pub commands: Vec<Command>,
}

impl RecordingCommandBuffer {
    pub fn new(serial: Serial) -> Self {
        Self {
            serial,
            commands: Vec::new(),
        }
    }

    pub fn barriers(&self) -> impl Iterator<Item = &Command> {
        self.commands
            .iter()
            .filter(|command| matches!(command, Command::Barrier { .. }))
    }

    pub fn image_barriers(&self) -> Vec<ImageBarrier> {
        self.commands
            .iter()
            .filter_map(|command| match command {
                Command::Barrier { images, .. } => Some(images.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    pub fn clear(&mut self) {
        self.commands.clear();
    }
}

impl CommandRecorder for RecordingCommandBuffer {
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
        self.commands.push(Command::Barrier {
            src_stage: src_stage_mask,
            dst_stage: dst_stage_mask,
            memory: memory_barriers.to_vec(),
            images: image_barriers.to_vec(),
        });
    }

    fn copy_buffer(&mut self, src: vk::Buffer, dst: vk::Buffer, regions: &[vk::BufferCopy]) {
        self.commands.push(Command::CopyBuffer {
            src,
            dst,
            regions: regions.to_vec(),
        });
    }

    fn copy_buffer_to_image(
        &mut self,
        src: vk::Buffer,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::BufferImageCopy],
    ) {
        self.commands.push(Command::CopyBufferToImage {
            src,
            dst,
            layout: dst_layout,
            regions: regions.to_vec(),
        });
    }

    fn copy_image(
        &mut self,
        src: vk::Image,
        src_layout: vk::ImageLayout,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::ImageCopy],
    ) {
        self.commands.push(Command::CopyImage {
            src,
            src_layout,
            dst,
            dst_layout,
            regions: regions.to_vec(),
        });
    }

    fn blit_image(
        &mut self,
        src: vk::Image,
        _src_layout: vk::ImageLayout,
        dst: vk::Image,
        _dst_layout: vk::ImageLayout,
        regions: &[vk::ImageBlit],
        filter: vk::Filter,
    ) {
        self.commands.push(Command::BlitImage {
            src,
            dst,
            regions: regions.to_vec(),
            filter,
        });
    }

    fn clear_color_image(
        &mut self,
        image: vk::Image,
        layout: vk::ImageLayout,
        _color: &vk::ClearColorValue,
        ranges: &[vk::ImageSubresourceRange],
    ) {
        self.commands.push(Command::ClearColor {
            image,
            layout,
            ranges: ranges.to_vec(),
        });
    }

    fn clear_depth_stencil_image(
        &mut self,
        image: vk::Image,
        layout: vk::ImageLayout,
        value: &vk::ClearDepthStencilValue,
        ranges: &[vk::ImageSubresourceRange],
    ) {
        self.commands.push(Command::ClearDepthStencil {
            image,
            layout,
            value: *value,
            ranges: ranges.to_vec(),
        });
    }

    fn reset_query_pool(&mut self, pool: vk::QueryPool, first_query: u32, query_count: u32) {
        self.commands.push(Command::ResetQueryPool {
            pool,
            first: first_query,
            count: query_count,
        });
    }

    fn begin_query(&mut self, pool: vk::QueryPool, query: u32) {
        self.commands.push(Command::BeginQuery { pool, query });
    }

    fn end_query(&mut self, pool: vk::QueryPool, query: u32) {
        self.commands.push(Command::EndQuery { pool, query });
    }

    fn write_timestamp(&mut self, stage: vk::PipelineStageFlags, pool: vk::QueryPool, query: u32) {
        self.commands
            .push(Command::WriteTimestamp { stage, pool, query });
    }

    fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        self.commands.push(Command::DrawIndexed {
            index_count,
            instance_count,
            first_index,
            vertex_offset,
            first_instance,
        });
    }
}
