use std::collections::VecDeque;

use ash::vk;
use tracing::{debug, trace, warn};

use super::command::VulkanCommandBuffer;
use super::device::{select_physical_device, VulkanDevice};
use crate::command::CommandRecorder;
use crate::config::ResourceConfig;
use crate::context::{Context, Device, GarbageObject};
use crate::error::{Result, VkResultExt};
use crate::serial::{Serial, SerialClock};

struct InFlight {
    serial: Serial,
    fence: vk::Fence,
    command_buffer: vk::CommandBuffer,
}

/// A headless Vulkan device with one graphics queue.
///
/// Every submission gets its own fence. Polling the fences advances the
/// serial clock, and garbage is destroyed once its serial has completed.
pub struct VulkanContext {
    _entry: ash::Entry,
    instance: ash::Instance,
    device: VulkanDevice,
    queue: vk::Queue,
    command_pool: vk::CommandPool,
    clock: SerialClock,
    config: ResourceConfig,
    in_flight: VecDeque<InFlight>,
    garbage: Vec<(Serial, GarbageObject)>,
}

impl VulkanContext {
    pub fn new(config: ResourceConfig) -> Result<Self> {
        let entry = unsafe { ash::Entry::load() }?;

        let app_info = vk::ApplicationInfo::default()
            .application_name(c"vkres")
            .api_version(vk::API_VERSION_1_0);
        let instance_info = vk::InstanceCreateInfo::default().application_info(&app_info);
        let instance = unsafe { entry.create_instance(&instance_info, None) }
            .vk_context("vkCreateInstance")?;

        let (device, queue_family_index) = match select_physical_device(&instance)
            .and_then(|(physical, family)| {
                VulkanDevice::new(&instance, physical, family).map(|device| (device, family))
            }) {
            Ok(found) => found,
            Err(err) => {
                unsafe { instance.destroy_instance(None) };
                return Err(err);
            }
        };

        let queue = unsafe { device.device.get_device_queue(queue_family_index, 0) };
        let pool_info = vk::CommandPoolCreateInfo::default()
            .flags(vk::CommandPoolCreateFlags::TRANSIENT)
            .queue_family_index(queue_family_index);
        let command_pool = match unsafe { device.device.create_command_pool(&pool_info, None) }
            .vk_context("vkCreateCommandPool")
        {
            Ok(pool) => pool,
            Err(err) => {
                unsafe {
                    device.device.destroy_device(None);
                    instance.destroy_instance(None);
                }
                return Err(err);
            }
        };

        debug!(queue_family_index, "Vulkan context ready");
        Ok(Self {
            _entry: entry,
            instance,
            device,
            queue,
            command_pool,
            clock: SerialClock::new(),
            config,
            in_flight: VecDeque::new(),
            garbage: Vec::new(),
        })
    }

    pub fn vulkan_device(&self) -> &VulkanDevice {
        &self.device
    }

    /// Starts recording work tagged with the current serial.
    pub fn begin_command_buffer(&mut self) -> Result<VulkanCommandBuffer> {
        let raw = &self.device.device;
        let allocate_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let handle = unsafe { raw.allocate_command_buffers(&allocate_info) }
            .vk_context("vkAllocateCommandBuffers")?
            .into_iter()
            .next()
            .unwrap_or_default();

        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        if let Err(err) =
            unsafe { raw.begin_command_buffer(handle, &begin_info) }.vk_context("vkBeginCommandBuffer")
        {
            unsafe { raw.free_command_buffers(self.command_pool, &[handle]) };
            return Err(err);
        }

        Ok(VulkanCommandBuffer::new(
            raw.clone(),
            handle,
            self.clock.current(),
        ))
    }

    /// Ends and submits `cmd`, closing the current serial.
    pub fn submit(&mut self, cmd: VulkanCommandBuffer) -> Result<Serial> {
        debug_assert_eq!(cmd.queue_serial(), self.clock.current());
        let raw = &self.device.device;
        let handle = cmd.handle;

        let submitted = (|| {
            unsafe { raw.end_command_buffer(handle) }.vk_context("vkEndCommandBuffer")?;
            let fence = unsafe { raw.create_fence(&vk::FenceCreateInfo::default(), None) }
                .vk_context("vkCreateFence")?;
            let submit_info =
                vk::SubmitInfo::default().command_buffers(std::slice::from_ref(&handle));
            if let Err(err) = unsafe { raw.queue_submit(self.queue, &[submit_info], fence) }
                .vk_context("vkQueueSubmit")
            {
                unsafe { raw.destroy_fence(fence, None) };
                return Err(err);
            }
            Ok(fence)
        })();

        let fence = match submitted {
            Ok(fence) => fence,
            Err(err) => {
                unsafe { raw.free_command_buffers(self.command_pool, &[handle]) };
                return Err(err);
            }
        };

        let serial = self.clock.submit();
        trace!(%serial, "submitted command buffer");
        self.in_flight.push_back(InFlight {
            serial,
            fence,
            command_buffer: handle,
        });
        Ok(serial)
    }

    /// Retires every submission whose fence has signaled, then collects garbage.
    pub fn check_completed_commands(&mut self) -> Result<()> {
        while let Some(front) = self.in_flight.front() {
            let signaled = unsafe { self.device.device.get_fence_status(front.fence) }
                .vk_context("vkGetFenceStatus")?;
            if !signaled {
                break;
            }
            if let Some(done) = self.in_flight.pop_front() {
                self.retire(done);
            }
        }
        self.collect_garbage();
        Ok(())
    }

    /// Destroys every garbage object whose serial has completed.
    pub fn collect_garbage(&mut self) {
        let last_completed = self.clock.last_completed();
        let device = &self.device;
        let before = self.garbage.len();
        self.garbage.retain(|(serial, object)| {
            if *serial <= last_completed {
                object.destroy(device);
                false
            } else {
                true
            }
        });
        let collected = before - self.garbage.len();
        if collected > 0 {
            debug!(collected, pending = self.garbage.len(), "collected garbage");
        }
    }

    pub fn pending_garbage(&self) -> usize {
        self.garbage.len()
    }

    fn retire(&mut self, done: InFlight) {
        let raw = &self.device.device;
        unsafe {
            raw.destroy_fence(done.fence, None);
            raw.free_command_buffers(self.command_pool, &[done.command_buffer]);
        }
        self.clock.complete(done.serial);
    }
}

impl Context for VulkanContext {
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
        let fences: Vec<_> = self.in_flight.iter().map(|work| work.fence).collect();
        if !fences.is_empty() {
            unsafe { self.device.device.wait_for_fences(&fences, true, u64::MAX) }
                .vk_context("vkWaitForFences")?;
        }
        self.check_completed_commands()
    }

    fn release_object(&mut self, serial: Serial, object: GarbageObject) {
        self.garbage.push((serial, object));
    }
}

impl Drop for VulkanContext {
    fn drop(&mut self) {
        if let Err(err) =
            unsafe { self.device.device.device_wait_idle() }.vk_context("vkDeviceWaitIdle")
        {
            warn!("tearing down a device that failed to idle: {err}");
        }
        while let Some(done) = self.in_flight.pop_front() {
            self.retire(done);
        }
        self.clock.complete_all();
        self.collect_garbage();

        unsafe {
            self.device
                .device
                .destroy_command_pool(self.command_pool, None);
            self.device.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
    }
}
