//! Descriptor pool arena.
//!
//! Pools have a fixed capacity. Allocation goes to the first pool with room
//! left and a new pool is appended once every existing one is exhausted.
//! Pools are never reset or freed individually; they all go away together
//! when the device is torn down.

use std::sync::{Mutex, MutexGuard};

use ash::vk;

use crate::error::{DeviceError, Result};

pub const TEXTURE_DESCRIPTORS: u32 = 2048 * 16;
pub const UNIFORM_BUFFER_DESCRIPTORS: u32 = 2048;
pub const INPUT_ATTACHMENT_DESCRIPTORS: u32 = 32;

/// Per-type capacity of every pool the arena creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorPoolSizes {
    pub combined_image_samplers: u32,
    pub uniform_buffers: u32,
    pub dynamic_uniform_buffers: u32,
    pub input_attachments: u32,
}

impl Default for DescriptorPoolSizes {
    fn default() -> Self {
        Self {
            combined_image_samplers: TEXTURE_DESCRIPTORS,
            uniform_buffers: UNIFORM_BUFFER_DESCRIPTORS,
            dynamic_uniform_buffers: UNIFORM_BUFFER_DESCRIPTORS,
            input_attachments: INPUT_ATTACHMENT_DESCRIPTORS,
        }
    }
}

impl DescriptorPoolSizes {
    /// Total descriptors across all types, saturating at `u32::MAX`.
    pub fn max_sets(&self) -> u32 {
        self.uniform_buffers
            .saturating_add(self.dynamic_uniform_buffers)
            .saturating_add(self.input_attachments)
            .saturating_add(self.combined_image_samplers)
    }

    pub fn pool_sizes(&self) -> [vk::DescriptorPoolSize; 4] {
        [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                descriptor_count: self.combined_image_samplers,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: self.uniform_buffers,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
                descriptor_count: self.dynamic_uniform_buffers,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::INPUT_ATTACHMENT,
                descriptor_count: self.input_attachments,
            },
        ]
    }
}

/// Creates and destroys the raw pools backing the arena.
pub trait PoolFactory {
    fn create_pool(&self, sizes: &DescriptorPoolSizes) -> Result<vk::DescriptorPool, vk::Result>;

    /// # Safety
    /// No descriptor set allocated from `pool` may still be in use.
    unsafe fn destroy_pool(&self, pool: vk::DescriptorPool);
}

impl PoolFactory for ash::Device {
    fn create_pool(&self, sizes: &DescriptorPoolSizes) -> Result<vk::DescriptorPool, vk::Result> {
        let pool_sizes = sizes.pool_sizes();
        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .pool_sizes(&pool_sizes)
            .max_sets(sizes.max_sets())
            .build();

        unsafe { self.create_descriptor_pool(&pool_info, None) }
    }

    unsafe fn destroy_pool(&self, pool: vk::DescriptorPool) {
        self.destroy_descriptor_pool(pool, None);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DescriptorPool {
    pub handle: vk::DescriptorPool,
    pub free: u32,
}

pub struct DescriptorPools<F: PoolFactory> {
    factory: F,
    sizes: DescriptorPoolSizes,
    pools: Mutex<Vec<DescriptorPool>>,
}

impl<F: PoolFactory> DescriptorPools<F> {
    pub fn new(factory: F, sizes: DescriptorPoolSizes) -> Self {
        Self {
            factory,
            sizes,
            pools: Mutex::new(Vec::new()),
        }
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    pub fn sizes(&self) -> &DescriptorPoolSizes {
        &self.sizes
    }

    /// Runs `allocate` against a pool with at least `required_sets` free
    /// slots, creating one if needed, and charges one slot to that pool when
    /// `allocate` succeeds.
    ///
    /// The arena stays locked for the whole call, so concurrent callers never
    /// create redundant pools or overdraw the same pool.
    pub fn allocate<T>(
        &self,
        required_sets: u32,
        allocate: impl FnOnce(vk::DescriptorPool) -> Result<T, vk::Result>,
    ) -> Result<T> {
        let required_sets = required_sets.max(1);
        let capacity = self.sizes.max_sets();
        if required_sets > capacity {
            return Err(DeviceError::DescriptorRequestTooLarge {
                requested: required_sets,
                capacity,
            });
        }

        let mut pools = self.lock();
        let index = match find_available(&pools, required_sets) {
            Some(index) => index,
            None => {
                let handle = self
                    .factory
                    .create_pool(&self.sizes)
                    .map_err(DeviceError::DeviceCreationFailed)?;
                log::debug!(
                    "Created descriptor pool #{} ({handle:?}) with {capacity} sets",
                    pools.len()
                );
                pools.push(DescriptorPool {
                    handle,
                    free: capacity,
                });
                pools.len() - 1
            }
        };

        let value = allocate(pools[index].handle).map_err(DeviceError::Vulkan)?;
        pools[index].free -= 1;

        Ok(value)
    }

    pub fn pool_count(&self) -> usize {
        self.lock().len()
    }

    pub fn free_counts(&self) -> Vec<u32> {
        self.lock().iter().map(|pool| pool.free).collect()
    }

    pub fn total_free(&self) -> u64 {
        self.lock().iter().map(|pool| u64::from(pool.free)).sum()
    }

    /// # Safety
    /// The device must be idle and no allocated set may be used afterwards.
    pub unsafe fn destroy_all(&self) {
        let mut pools = self.lock();
        for pool in pools.drain(..) {
            self.factory.destroy_pool(pool.handle);
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<DescriptorPool>> {
        // Counters are only changed after a successful allocation, so a
        // poisoned list is still consistent.
        self.pools.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn find_available(pools: &[DescriptorPool], required_sets: u32) -> Option<usize> {
    pools.iter().position(|pool| pool.free >= required_sets)
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};

    use ash::vk::Handle;

    use super::*;

    #[derive(Default)]
    pub(crate) struct CountingFactory {
        pub created: AtomicU64,
        pub destroyed: AtomicU64,
    }

    impl PoolFactory for CountingFactory {
        fn create_pool(&self, _: &DescriptorPoolSizes) -> Result<vk::DescriptorPool, vk::Result> {
            let id = self.created.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(vk::DescriptorPool::from_raw(id))
        }

        unsafe fn destroy_pool(&self, _: vk::DescriptorPool) {
            self.destroyed.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct FailingFactory;

    impl PoolFactory for FailingFactory {
        fn create_pool(&self, _: &DescriptorPoolSizes) -> Result<vk::DescriptorPool, vk::Result> {
            Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY)
        }

        unsafe fn destroy_pool(&self, _: vk::DescriptorPool) {}
    }

    pub(crate) fn small_sizes() -> DescriptorPoolSizes {
        DescriptorPoolSizes {
            combined_image_samplers: 2,
            uniform_buffers: 1,
            dynamic_uniform_buffers: 1,
            input_attachments: 0,
        }
    }

    #[test]
    fn default_capacity_matches_pool_sizes() {
        let sizes = DescriptorPoolSizes::default();
        assert_eq!(sizes.max_sets(), 2 * 2048 + 32 + 2048 * 16);
        assert_eq!(sizes.pool_sizes()[0].descriptor_count, 32768);
        assert_eq!(sizes.pool_sizes()[3].ty, vk::DescriptorType::INPUT_ATTACHMENT);
    }

    #[test]
    fn huge_pool_sizes_saturate_capacity() {
        let sizes = DescriptorPoolSizes {
            combined_image_samplers: u32::MAX - 1,
            uniform_buffers: 2,
            dynamic_uniform_buffers: 2,
            input_attachments: 0,
        };
        assert_eq!(sizes.max_sets(), u32::MAX);

        let pools = DescriptorPools::new(CountingFactory::default(), sizes);
        assert_eq!(pools.allocate(4, Ok).unwrap().as_raw(), 1);
        assert_eq!(pools.free_counts(), vec![u32::MAX - 1]);
    }

    #[test]
    fn first_allocation_creates_a_pool() {
        let pools = DescriptorPools::new(CountingFactory::default(), small_sizes());
        assert_eq!(pools.pool_count(), 0);
        assert_eq!(*pools.sizes(), small_sizes());

        let pool = pools.allocate(1, Ok).unwrap();

        assert_eq!(pool.as_raw(), 1);
        assert_eq!(pools.free_counts(), vec![3]);
    }

    #[test]
    fn exhausting_a_pool_appends_another() {
        let pools = DescriptorPools::new(CountingFactory::default(), small_sizes());
        let mut previous = vec![];

        for _ in 0..10 {
            pools.allocate(1, Ok).unwrap();

            let free = pools.free_counts();
            for (before, after) in previous.iter().zip(&free) {
                assert!(after <= before, "free counts must never grow");
            }
            previous = free;
        }

        assert_eq!(pools.pool_count(), 3);
        assert_eq!(pools.free_counts(), vec![0, 0, 2]);
        assert_eq!(pools.factory().created.load(Ordering::SeqCst), 3);
        assert_eq!(pools.total_free(), 2);
    }

    #[test]
    fn pools_without_enough_room_are_skipped() {
        let pools = DescriptorPools::new(CountingFactory::default(), small_sizes());
        pools.allocate(1, Ok).unwrap();
        pools.allocate(1, Ok).unwrap();
        assert_eq!(pools.free_counts(), vec![2]);

        let pool = pools.allocate(3, Ok).unwrap();
        assert_eq!(pool.as_raw(), 2);
        assert_eq!(pools.free_counts(), vec![2, 3]);

        // The first pool still has room for a single set.
        let pool = pools.allocate(1, Ok).unwrap();
        assert_eq!(pool.as_raw(), 1);
        assert_eq!(pools.free_counts(), vec![1, 3]);
    }

    #[test]
    fn failed_allocation_leaves_counters_alone() {
        let pools = DescriptorPools::new(CountingFactory::default(), small_sizes());
        let result: Result<()> = pools.allocate(1, |_| Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY));

        assert!(matches!(
            result,
            Err(DeviceError::Vulkan(vk::Result::ERROR_OUT_OF_POOL_MEMORY))
        ));
        assert_eq!(pools.free_counts(), vec![4]);
    }

    #[test]
    fn oversized_requests_are_rejected() {
        let pools = DescriptorPools::new(CountingFactory::default(), small_sizes());
        let result = pools.allocate(5, Ok);

        assert!(matches!(
            result,
            Err(DeviceError::DescriptorRequestTooLarge {
                requested: 5,
                capacity: 4
            })
        ));
        assert_eq!(pools.pool_count(), 0);
    }

    #[test]
    fn pool_creation_failure_carries_native_code() {
        let pools = DescriptorPools::new(FailingFactory, small_sizes());
        let result = pools.allocate(1, Ok);

        assert!(matches!(
            result,
            Err(DeviceError::DeviceCreationFailed(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY))
        ));
        assert_eq!(pools.pool_count(), 0);
    }

    #[test]
    fn destroy_all_releases_every_pool() {
        let pools = DescriptorPools::new(CountingFactory::default(), small_sizes());
        for _ in 0..9 {
            pools.allocate(1, Ok).unwrap();
        }

        unsafe { pools.destroy_all() };

        assert_eq!(pools.factory().destroyed.load(Ordering::SeqCst), 3);
        assert_eq!(pools.pool_count(), 0);
    }
}
