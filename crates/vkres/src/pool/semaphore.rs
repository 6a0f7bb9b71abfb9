use ash::vk;

use super::DynamicallyGrowingPool;
use crate::config::ResourceConfig;
use crate::context::{Context, Device};
use crate::error::Result;

/// Growable set of binary semaphores, created a whole instance at a time.
#[derive(Debug)]
pub struct DynamicSemaphorePool {
    pool: DynamicallyGrowingPool<Vec<vk::Semaphore>>,
}

impl DynamicSemaphorePool {
    pub fn new(config: &ResourceConfig, pool_size: u32) -> Self {
        Self {
            pool: DynamicallyGrowingPool::new("semaphore", pool_size, config.max_pool_instances),
        }
    }

    pub fn pool_count(&self) -> usize {
        self.pool.pool_count()
    }

    pub fn allocate_semaphore(&mut self, ctx: &dyn Context) -> Result<SemaphoreHelper> {
        let device = ctx.device();
        let (pool_index, entry) = self
            .pool
            .allocate_entry(ctx.last_completed_queue_serial(), |count| {
                create_semaphores(device, count)
            })?;

        Ok(SemaphoreHelper {
            pool_index,
            semaphore: self.pool.pool(pool_index)[entry as usize],
        })
    }

    pub fn free_semaphore(&mut self, ctx: &dyn Context, semaphore: SemaphoreHelper) {
        self.pool
            .free_entry(ctx.current_queue_serial(), semaphore.pool_index);
    }

    pub fn destroy(&mut self, device: &dyn Device) {
        for semaphore in self.pool.take_pools().into_iter().flatten() {
            device.destroy_semaphore(semaphore);
        }
    }
}

fn create_semaphores(device: &dyn Device, count: u32) -> Result<Vec<vk::Semaphore>> {
    let mut semaphores = Vec::with_capacity(count as usize);
    for _ in 0..count {
        match device.create_semaphore() {
            Ok(semaphore) => semaphores.push(semaphore),
            Err(err) => {
                for semaphore in semaphores {
                    device.destroy_semaphore(semaphore);
                }
                return Err(err);
            }
        }
    }
    Ok(semaphores)
}

/// One semaphore handed out by a [`DynamicSemaphorePool`].
#[derive(Debug)]
pub struct SemaphoreHelper {
    pool_index: usize,
    semaphore: vk::Semaphore,
}

impl SemaphoreHelper {
    pub fn semaphore(&self) -> vk::Semaphore {
        self.semaphore
    }

    pub fn pool_index(&self) -> usize {
        self.pool_index
    }
}
