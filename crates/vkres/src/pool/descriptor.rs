//! Descriptor set allocation from shared, growable descriptor pools.
//!
//! Pools live in a registry owned by [`DynamicDescriptorPool`]. Callers hold a
//! [`DescriptorPoolBinding`], an index into that registry. Each pool counts the
//! bindings pointing at it and is only recycled once that count is zero and its
//! last use has completed.

use ash::vk;
use tracing::{debug, trace};

use crate::config::ResourceConfig;
use crate::context::{Context, Device};
use crate::error::{overflow, ResourceError, Result};
use crate::serial::Serial;

#[derive(Debug, Default)]
pub struct DescriptorPoolHelper {
    pool: vk::DescriptorPool,
    free_descriptor_sets: u32,
    serial: Serial,
    ref_count: u32,
}

impl DescriptorPoolHelper {
    pub fn valid(&self) -> bool {
        self.pool != vk::DescriptorPool::null()
    }

    pub fn handle(&self) -> vk::DescriptorPool {
        self.pool
    }

    pub fn has_capacity(&self, descriptor_set_count: u32) -> bool {
        self.free_descriptor_sets >= descriptor_set_count
    }

    pub fn serial(&self) -> Serial {
        self.serial
    }

    pub fn update_serial(&mut self, serial: Serial) {
        self.serial = self.serial.max(serial);
    }

    pub fn is_referenced(&self) -> bool {
        self.ref_count > 0
    }

    /// (Re)creates the native pool with room for `max_sets` sets.
    pub fn init(
        &mut self,
        device: &dyn Device,
        pool_sizes: &[vk::DescriptorPoolSize],
        max_sets: u32,
    ) -> Result<()> {
        if self.valid() {
            device.destroy_descriptor_pool(std::mem::take(&mut self.pool));
        }
        self.free_descriptor_sets = 0;

        let info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(max_sets)
            .pool_sizes(pool_sizes);
        self.pool = device.create_descriptor_pool(&info)?;
        self.free_descriptor_sets = max_sets;
        Ok(())
    }

    pub fn allocate_sets(
        &mut self,
        device: &dyn Device,
        layouts: &[vk::DescriptorSetLayout],
    ) -> Result<Vec<vk::DescriptorSet>> {
        let count = set_count(layouts)?;
        self.free_descriptor_sets = self
            .free_descriptor_sets
            .checked_sub(count)
            .ok_or(ResourceError::TooManyDescriptorSets {
                requested: count,
                limit: self.free_descriptor_sets,
            })?;
        device.allocate_descriptor_sets(self.pool, layouts)
    }

    pub fn destroy(&mut self, device: &dyn Device) {
        if self.valid() {
            device.destroy_descriptor_pool(std::mem::take(&mut self.pool));
        }
        self.free_descriptor_sets = 0;
    }
}

/// A counted reference to one pool in a [`DynamicDescriptorPool`].
///
/// Bindings are not `Clone`; use [`DynamicDescriptorPool::share_binding`] so
/// the count stays right, and give them back with `release_binding` or
/// `retire_binding`.
#[derive(Debug, Default)]
pub struct DescriptorPoolBinding {
    pool_index: Option<usize>,
}

impl DescriptorPoolBinding {
    pub fn valid(&self) -> bool {
        self.pool_index.is_some()
    }

    pub fn pool_index(&self) -> Option<usize> {
        self.pool_index
    }
}

#[derive(Debug)]
pub struct DynamicDescriptorPool {
    max_sets_per_pool: u32,
    max_pools: usize,
    set_sizes: Vec<vk::DescriptorPoolSize>,
    pools: Vec<DescriptorPoolHelper>,
    current_pool_index: usize,
}

impl DynamicDescriptorPool {
    pub fn new(config: &ResourceConfig) -> Self {
        Self {
            max_sets_per_pool: config.descriptor_pool_max_sets,
            max_pools: config.max_pool_instances,
            set_sizes: Vec::new(),
            pools: Vec::new(),
            current_pool_index: 0,
        }
    }

    /// Records the descriptor counts of one set. Every pool is created with
    /// room for `max_sets_per_pool` such sets.
    pub fn init(&mut self, set_sizes: &[vk::DescriptorPoolSize]) {
        debug_assert!(self.pools.is_empty());
        self.set_sizes = set_sizes.to_vec();
    }

    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }

    pub fn pool(&self, index: usize) -> &DescriptorPoolHelper {
        &self.pools[index]
    }

    pub fn is_referenced(&self, binding: &DescriptorPoolBinding) -> bool {
        binding
            .pool_index
            .is_some_and(|index| self.pools[index].is_referenced())
    }

    pub fn set_max_sets_per_pool_for_testing(&mut self, max_sets_per_pool: u32) {
        self.max_sets_per_pool = max_sets_per_pool;
    }

    /// Allocates one set per layout, moving `binding` to a pool with room when needed.
    pub fn allocate_sets(
        &mut self,
        ctx: &dyn Context,
        layouts: &[vk::DescriptorSetLayout],
        binding: &mut DescriptorPoolBinding,
    ) -> Result<Vec<vk::DescriptorSet>> {
        let count = set_count(layouts)?;
        if count > self.max_sets_per_pool {
            return Err(ResourceError::TooManyDescriptorSets {
                requested: count,
                limit: self.max_sets_per_pool,
            });
        }
        let binding_has_room = binding
            .pool_index
            .is_some_and(|index| self.pools[index].has_capacity(count));

        if !binding_has_room {
            let current_has_room = self
                .pools
                .get(self.current_pool_index)
                .is_some_and(|pool| pool.has_capacity(count));
            if !current_has_room {
                self.allocate_new_pool(ctx)?;
            }

            // Sets from the old pool may still be in flight.
            if let Some(old) = binding.pool_index {
                self.pools[old].update_serial(ctx.current_queue_serial());
            }
            self.bind(binding, self.current_pool_index);
        }

        let index = binding
            .pool_index
            .unwrap_or(self.current_pool_index);
        self.pools[index].allocate_sets(ctx.device(), layouts)
    }

    fn allocate_new_pool(&mut self, ctx: &dyn Context) -> Result<()> {
        let pool_sizes = self.pool_sizes()?;
        let reusable = self
            .pools
            .iter()
            .position(|pool| !pool.is_referenced() && !ctx.is_serial_in_use(pool.serial()));

        let index = match reusable {
            Some(index) => {
                debug!(index, "reusing descriptor pool");
                index
            }
            None => {
                if self.pools.len() >= self.max_pools {
                    return Err(ResourceError::TooManyPools {
                        kind: "descriptor",
                        limit: self.max_pools,
                    });
                }
                self.pools.push(DescriptorPoolHelper::default());
                debug!(count = self.pools.len(), "allocated descriptor pool");
                self.pools.len() - 1
            }
        };

        self.current_pool_index = index;
        self.pools[index].init(ctx.device(), &pool_sizes, self.max_sets_per_pool)
    }

    fn pool_sizes(&self) -> Result<Vec<vk::DescriptorPoolSize>> {
        self.set_sizes
            .iter()
            .map(|size| {
                let descriptor_count = size
                    .descriptor_count
                    .checked_mul(self.max_sets_per_pool)
                    .ok_or_else(|| overflow("descriptor pool size"))?;
                Ok(vk::DescriptorPoolSize {
                    ty: size.ty,
                    descriptor_count,
                })
            })
            .collect()
    }

    fn bind(&mut self, binding: &mut DescriptorPoolBinding, index: usize) {
        self.release_binding(binding);
        self.pools[index].ref_count += 1;
        binding.pool_index = Some(index);
    }

    /// Returns a second binding to the same pool.
    pub fn share_binding(&mut self, binding: &DescriptorPoolBinding) -> DescriptorPoolBinding {
        if let Some(index) = binding.pool_index {
            self.pools[index].ref_count += 1;
        }
        DescriptorPoolBinding {
            pool_index: binding.pool_index,
        }
    }

    pub fn release_binding(&mut self, binding: &mut DescriptorPoolBinding) {
        if let Some(index) = binding.pool_index.take() {
            let pool = &mut self.pools[index];
            debug_assert!(pool.ref_count > 0);
            pool.ref_count -= 1;
        }
    }

    /// Notes that the binding's sets are used by work tagged `serial`.
    pub fn update_binding_serial(&mut self, binding: &DescriptorPoolBinding, serial: Serial) {
        if let Some(index) = binding.pool_index {
            self.pools[index].update_serial(serial);
        }
    }

    /// Drops the binding after its last use at `serial`.
    pub fn retire_binding(&mut self, binding: &mut DescriptorPoolBinding, serial: Serial) {
        self.update_binding_serial(binding, serial);
        trace!(pool = ?binding.pool_index, %serial, "retiring descriptor pool binding");
        self.release_binding(binding);
    }

    pub fn destroy(&mut self, device: &dyn Device) {
        for mut pool in self.pools.drain(..) {
            debug_assert!(!pool.is_referenced(), "destroying a referenced descriptor pool");
            pool.destroy(device);
        }
        self.current_pool_index = 0;
    }
}

fn set_count(layouts: &[vk::DescriptorSetLayout]) -> Result<u32> {
    u32::try_from(layouts.len()).map_err(|_| overflow("descriptor set count"))
}
