//! Pools that grow by appending fixed-capacity backing instances.

pub mod descriptor;
pub mod query;
pub mod semaphore;

pub use descriptor::{DescriptorPoolBinding, DescriptorPoolHelper, DynamicDescriptorPool};
pub use query::{DynamicQueryPool, QueryHelper};
pub use semaphore::{DynamicSemaphorePool, SemaphoreHelper};

use tracing::debug;

use crate::error::{ResourceError, Result};
use crate::serial::Serial;

#[derive(Debug, Clone, Copy, Default)]
struct PoolStats {
    freed_count: u32,
    serial: Serial,
}

/// Hands out `(pool_index, entry_index)` pairs from a list of backing
/// instances holding `pool_size` entries each.
///
/// Entries are never reused one by one. An instance is recycled only after
/// every entry in it has been freed and the last free has completed on the
/// device.
#[derive(Debug)]
pub struct DynamicallyGrowingPool<P> {
    kind: &'static str,
    pool_size: u32,
    max_pools: usize,
    pools: Vec<P>,
    stats: Vec<PoolStats>,
    current_pool: usize,
    current_free_entry: u32,
}

impl<P> DynamicallyGrowingPool<P> {
    pub fn new(kind: &'static str, pool_size: u32, max_pools: usize) -> Self {
        debug_assert!(pool_size > 0);
        Self {
            kind,
            pool_size,
            max_pools,
            pools: Vec::new(),
            stats: Vec::new(),
            current_pool: 0,
            // No instance yet: the first allocation creates one.
            current_free_entry: pool_size,
        }
    }

    pub fn pool_size(&self) -> u32 {
        self.pool_size
    }

    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }

    pub fn pool(&self, index: usize) -> &P {
        &self.pools[index]
    }

    pub fn freed_count(&self, index: usize) -> u32 {
        self.stats[index].freed_count
    }

    /// Bumps the cursor, moving to a drained or new instance when the current
    /// one is exhausted. `create` builds a new instance of `pool_size` entries.
    pub fn allocate_entry(
        &mut self,
        last_completed: Serial,
        create: impl FnOnce(u32) -> Result<P>,
    ) -> Result<(usize, u32)> {
        if self.current_free_entry >= self.pool_size && !self.find_free_entry_pool(last_completed)
        {
            self.allocate_new_entry_pool(create)?;
        }

        let entry = (self.current_pool, self.current_free_entry);
        self.current_free_entry += 1;
        Ok(entry)
    }

    fn find_free_entry_pool(&mut self, last_completed: Serial) -> bool {
        let pool_size = self.pool_size;
        let found = self
            .stats
            .iter()
            .position(|stats| stats.freed_count == pool_size && stats.serial <= last_completed);

        if let Some(index) = found {
            debug!(kind = self.kind, index, "reusing drained pool");
            self.current_pool = index;
            self.current_free_entry = 0;
            self.stats[index].freed_count = 0;
        }
        found.is_some()
    }

    fn allocate_new_entry_pool(&mut self, create: impl FnOnce(u32) -> Result<P>) -> Result<()> {
        if self.pools.len() >= self.max_pools {
            return Err(ResourceError::TooManyPools {
                kind: self.kind,
                limit: self.max_pools,
            });
        }

        let pool = create(self.pool_size)?;
        self.pools.push(pool);
        self.stats.push(PoolStats::default());
        self.current_pool = self.pools.len() - 1;
        self.current_free_entry = 0;
        debug!(kind = self.kind, count = self.pools.len(), "allocated pool");
        Ok(())
    }

    /// Records that one entry of `pool_index` is no longer used after `current_serial`.
    pub fn free_entry(&mut self, current_serial: Serial, pool_index: usize) {
        let stats = &mut self.stats[pool_index];
        debug_assert!(stats.freed_count < self.pool_size);
        stats.serial = current_serial;
        stats.freed_count += 1;
    }

    /// Removes every instance, leaving the pool empty.
    pub fn take_pools(&mut self) -> Vec<P> {
        self.stats.clear();
        self.current_pool = 0;
        self.current_free_entry = self.pool_size;
        std::mem::take(&mut self.pools)
    }
}
