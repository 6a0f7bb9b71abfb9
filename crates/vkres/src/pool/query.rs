use ash::vk;

use super::DynamicallyGrowingPool;
use crate::command::CommandRecorder;
use crate::config::ResourceConfig;
use crate::context::{Context, Device};
use crate::error::Result;
use crate::serial::Serial;

/// Growable set of native query pools of one query type.
#[derive(Debug)]
pub struct DynamicQueryPool {
    pool: DynamicallyGrowingPool<vk::QueryPool>,
    query_type: vk::QueryType,
}

impl DynamicQueryPool {
    pub fn new(config: &ResourceConfig, query_type: vk::QueryType, pool_size: u32) -> Self {
        Self {
            pool: DynamicallyGrowingPool::new("query", pool_size, config.max_pool_instances),
            query_type,
        }
    }

    pub fn query_type(&self) -> vk::QueryType {
        self.query_type
    }

    pub fn pool_count(&self) -> usize {
        self.pool.pool_count()
    }

    pub fn allocate_query(&mut self, ctx: &dyn Context) -> Result<QueryHelper> {
        let device = ctx.device();
        let query_type = self.query_type;
        let (pool_index, query) = self
            .pool
            .allocate_entry(ctx.last_completed_queue_serial(), |query_count| {
                let info = vk::QueryPoolCreateInfo::default()
                    .query_type(query_type)
                    .query_count(query_count);
                device.create_query_pool(&info)
            })?;

        Ok(QueryHelper {
            query_pool: *self.pool.pool(pool_index),
            pool_index,
            query,
            most_recent_serial: Serial::ZERO,
        })
    }

    pub fn free_query(&mut self, ctx: &dyn Context, query: QueryHelper) {
        self.pool
            .free_entry(ctx.current_queue_serial(), query.pool_index);
    }

    pub fn destroy(&mut self, device: &dyn Device) {
        for pool in self.pool.take_pools() {
            device.destroy_query_pool(pool);
        }
    }
}

/// One query slot handed out by a [`DynamicQueryPool`].
#[derive(Debug)]
pub struct QueryHelper {
    query_pool: vk::QueryPool,
    pool_index: usize,
    query: u32,
    most_recent_serial: Serial,
}

impl QueryHelper {
    pub fn query_pool(&self) -> vk::QueryPool {
        self.query_pool
    }

    pub fn pool_index(&self) -> usize {
        self.pool_index
    }

    pub fn query(&self) -> u32 {
        self.query
    }

    /// Resets the slot and starts the query.
    pub fn begin_query(&mut self, cmd: &mut dyn CommandRecorder) {
        cmd.reset_query_pool(self.query_pool, self.query, 1);
        cmd.begin_query(self.query_pool, self.query);
        self.most_recent_serial = cmd.queue_serial();
    }

    pub fn end_query(&mut self, cmd: &mut dyn CommandRecorder) {
        cmd.end_query(self.query_pool, self.query);
        self.most_recent_serial = cmd.queue_serial();
    }

    pub fn write_timestamp(&mut self, cmd: &mut dyn CommandRecorder) {
        cmd.reset_query_pool(self.query_pool, self.query, 1);
        cmd.write_timestamp(
            vk::PipelineStageFlags::BOTTOM_OF_PIPE,
            self.query_pool,
            self.query,
        );
        self.most_recent_serial = cmd.queue_serial();
    }

    /// True while the commands touching this query have not been submitted.
    pub fn has_pending_work(&self, ctx: &dyn Context) -> bool {
        self.most_recent_serial == ctx.current_queue_serial()
    }
}
