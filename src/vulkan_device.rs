//! The logical device and everything the renderer consumes from it.
//!
//! [`VulkanDevice::new`] runs the whole bring-up: probe the physical devices,
//! select one, apply workarounds, pick queue families and create the logical
//! device. Afterwards the device hands out memory types, descriptor set
//! layouts, descriptor sets and command pools. Descriptor sets come from a
//! shared pool arena and may be requested from several threads at once.

use ash::vk;

use crate::config::DeviceConfig;
use crate::descriptor_data::{DescriptorPoolSizes, DescriptorPools};
use crate::environment::Environment;
use crate::error::{DeviceError, Result};
use crate::instance_data::InstanceData;
use crate::logical_device::{no_extensions, DevicePlan, ExtensionProvider};
use crate::physical_device_data::{probe_physical_devices, select_device, DeviceData, DeviceFilter};
use crate::queue_data::{QueueGroup, QueueRole, Queues};
use crate::surface_data::SurfaceData;
use crate::workarounds::WorkaroundRegistry;

/// What the caller wants from device bring-up.
pub struct DeviceRequest {
    pub filter: Box<dyn DeviceFilter>,
    pub extensions: Box<dyn ExtensionProvider>,
    pub validation_layers: Vec<String>,
    pub headless: bool,
}

impl Default for DeviceRequest {
    fn default() -> Self {
        Self {
            filter: Box::new(|_: usize, _: &DeviceData| true),
            extensions: Box::new(no_extensions),
            validation_layers: Vec::new(),
            headless: false,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct QueueHandles {
    pub present: vk::Queue,
    pub transfer: vk::Queue,
    pub graphics: vk::Queue,
    pub compute: vk::Queue,
}

/// A buffer range bound to one descriptor binding.
#[derive(Debug, Clone, Copy)]
pub struct DescriptorBuffer {
    pub buffer: vk::Buffer,
    pub offset: vk::DeviceSize,
    pub range: vk::DeviceSize,
}

pub struct VulkanDevice {
    device: ash::Device,
    physical_device: vk::PhysicalDevice,
    device_data: DeviceData,
    queues: Queues,
    queue_groups: Vec<QueueGroup>,
    queue_handles: QueueHandles,
    extensions: Vec<String>,
    memory_properties: Option<Box<vk::PhysicalDeviceMemoryProperties>>,
    descriptor_pools: DescriptorPools<ash::Device>,
    closed: bool,
}

impl VulkanDevice {
    /// # Safety
    /// `instance_data` and `surface` must outlive the device.
    pub unsafe fn new(
        instance_data: &InstanceData,
        surface: Option<&SurfaceData>,
        request: &DeviceRequest,
        registry: &WorkaroundRegistry,
        config: &DeviceConfig,
        env: &mut dyn Environment,
    ) -> Result<Self> {
        let instance = &instance_data.instance;
        let probe = probe_physical_devices(instance, instance_data.api_version)?;
        let mut devices = probe.devices;

        log::info!("Physical devices:");
        let selected = select_device(&mut devices, request.filter.as_ref())?;
        let physical_device = probe.handles[selected];
        let device_data = devices.swap_remove(selected);
        drop(devices);

        registry.apply_configured(config, &device_data, env)?;

        let families = instance.get_physical_device_queue_family_properties(physical_device);
        let queues = match surface {
            Some(surface) => {
                let supports = |family: u32| -> Result<bool> {
                    unsafe { surface.supports_present(physical_device, family) }
                };
                Queues::select(&families, Some(&supports))?
            }
            None => Queues::select(&families, None)?,
        };

        let headless = request.headless || config.headless;
        let requested = request.extensions.extensions(physical_device);
        let plan = DevicePlan::new(&queues, &requested, &request.validation_layers, headless)?;
        let device = plan.create(instance, physical_device)?;

        let queue_handles = fetch_queues(&device, &plan.queue_groups);
        let memory_properties = instance.get_physical_device_memory_properties(physical_device);

        log::info!(
            "Created logical device on {} (graphics family {}, transfer {}, compute {}, present {})",
            device_data.name,
            queues.graphics.index,
            queues.transfer.index,
            queues.compute.index,
            queues.present.index
        );

        Ok(Self {
            descriptor_pools: DescriptorPools::new(device.clone(), DescriptorPoolSizes::default()),
            device,
            physical_device,
            device_data,
            queues,
            queue_groups: plan.queue_groups.clone(),
            queue_handles,
            extensions: plan.extension_names(),
            memory_properties: Some(Box::new(memory_properties)),
            closed: false,
        })
    }

    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub fn device_data(&self) -> &DeviceData {
        &self.device_data
    }

    pub fn queues(&self) -> &Queues {
        &self.queues
    }

    pub fn queue_groups(&self) -> &[QueueGroup] {
        &self.queue_groups
    }

    pub fn queue(&self, role: QueueRole) -> vk::Queue {
        match role {
            QueueRole::Present => self.queue_handles.present,
            QueueRole::Transfer => self.queue_handles.transfer,
            QueueRole::Graphics => self.queue_handles.graphics,
            QueueRole::Compute => self.queue_handles.compute,
        }
    }

    pub fn enabled_extensions(&self) -> &[String] {
        &self.extensions
    }

    pub fn descriptor_pools(&self) -> &DescriptorPools<ash::Device> {
        &self.descriptor_pools
    }

    pub fn memory_properties(&self) -> Option<&vk::PhysicalDeviceMemoryProperties> {
        self.memory_properties.as_deref()
    }

    /// Every memory type index allowed by `type_bits` that has all of
    /// `flags`. An empty list is logged, and left for the caller to handle.
    pub fn memory_types(&self, type_bits: u32, flags: vk::MemoryPropertyFlags) -> Vec<u32> {
        let types = self
            .memory_properties()
            .map(|properties| memory_type_indices(properties, type_bits, flags))
            .unwrap_or_default();

        if types.is_empty() {
            log::warn!("{}", DeviceError::MemoryTypeNotFound { type_bits, flags });
        }

        types
    }

    pub fn find_memory_type_index(
        &self,
        memory_req: &vk::MemoryRequirements,
        flags: vk::MemoryPropertyFlags,
    ) -> Result<u32> {
        self.memory_types(memory_req.memory_type_bits, flags)
            .first()
            .copied()
            .ok_or(DeviceError::MemoryTypeNotFound {
                type_bits: memory_req.memory_type_bits,
                flags,
            })
    }

    /// Creates a layout with one binding per `(type, count)` entry, numbered
    /// from `binding_offset`.
    pub fn create_descriptor_set_layout(
        &self,
        types: &[(vk::DescriptorType, u32)],
        binding_offset: u32,
        stages: vk::ShaderStageFlags,
    ) -> Result<vk::DescriptorSetLayout> {
        let bindings: Vec<vk::DescriptorSetLayoutBinding> = types
            .iter()
            .enumerate()
            .map(|(i, &(ty, count))| {
                vk::DescriptorSetLayoutBinding::builder()
                    .binding(binding_offset + i as u32)
                    .descriptor_type(ty)
                    .descriptor_count(count)
                    .stage_flags(stages)
                    .build()
            })
            .collect();

        let layout_info = vk::DescriptorSetLayoutCreateInfo::builder()
            .bindings(&bindings)
            .build();

        unsafe { self.device.create_descriptor_set_layout(&layout_info, None) }
            .map_err(DeviceError::DeviceCreationFailed)
    }

    /// # Safety
    /// No descriptor set using `layout` may be allocated afterwards.
    pub unsafe fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        self.device.destroy_descriptor_set_layout(layout, None);
    }

    pub fn allocate_descriptor_set(&self, layout: vk::DescriptorSetLayout) -> Result<vk::DescriptorSet> {
        self.descriptor_pools.allocate(1, |pool| {
            let layouts = [layout];
            let alloc_info = vk::DescriptorSetAllocateInfo::builder()
                .descriptor_pool(pool)
                .set_layouts(&layouts)
                .build();

            let sets = unsafe { self.device.allocate_descriptor_sets(&alloc_info) }?;
            sets.first()
                .copied()
                .ok_or(vk::Result::ERROR_OUT_OF_POOL_MEMORY)
        })
    }

    /// Allocates a set for `layout` and binds `buffers[i]` to binding `i`.
    pub fn create_descriptor_set(
        &self,
        layout: vk::DescriptorSetLayout,
        buffers: &[DescriptorBuffer],
        ty: vk::DescriptorType,
    ) -> Result<vk::DescriptorSet> {
        let set = self.allocate_descriptor_set(layout)?;

        let buffer_infos: Vec<[vk::DescriptorBufferInfo; 1]> = buffers
            .iter()
            .map(|b| {
                [vk::DescriptorBufferInfo {
                    buffer: b.buffer,
                    offset: b.offset,
                    range: b.range,
                }]
            })
            .collect();

        let writes: Vec<vk::WriteDescriptorSet> = buffer_infos
            .iter()
            .enumerate()
            .map(|(binding, info)| {
                vk::WriteDescriptorSet::builder()
                    .dst_set(set)
                    .dst_binding(binding as u32)
                    .descriptor_type(ty)
                    .buffer_info(info)
                    .build()
            })
            .collect();

        unsafe { self.device.update_descriptor_sets(&writes, &[]) };

        Ok(set)
    }

    pub fn create_descriptor_set_dynamic(
        &self,
        layout: vk::DescriptorSetLayout,
        buffers: &[DescriptorBuffer],
    ) -> Result<vk::DescriptorSet> {
        self.create_descriptor_set(layout, buffers, vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC)
    }

    pub fn create_command_pool(&self, queue_family_index: u32) -> Result<vk::CommandPool> {
        let pool_create_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(queue_family_index)
            .build();

        unsafe { self.device.create_command_pool(&pool_create_info, None) }
            .map_err(DeviceError::DeviceCreationFailed)
    }

    /// # Safety
    /// No command buffer from `pool` may be pending execution.
    pub unsafe fn destroy_command_pool(&self, pool: vk::CommandPool) {
        self.device.destroy_command_pool(pool, None);
    }

    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }.map_err(DeviceError::Vulkan)
    }

    /// Waits for the device to go idle, then releases everything it owns.
    /// Calling it again does nothing.
    pub fn close(&mut self) {
        if !self.closed {
            log::debug!("Closing device {}", self.device_data.name);
        }
        unsafe { close_device(self) };
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        self.close();
    }
}

/// The steps of device teardown, run by [`close_device`] in a fixed order.
pub(crate) trait DeviceTeardown {
    fn is_closed(&self) -> bool;
    fn mark_closed(&mut self);
    fn wait_idle(&self) -> Result<()>;
    fn release_device_data(&mut self);
    unsafe fn destroy_descriptor_pools(&mut self);
    unsafe fn destroy_device(&mut self);
    fn free_memory_properties(&mut self);
}

impl DeviceTeardown for VulkanDevice {
    fn is_closed(&self) -> bool {
        self.closed
    }

    fn mark_closed(&mut self) {
        self.closed = true;
    }

    fn wait_idle(&self) -> Result<()> {
        VulkanDevice::wait_idle(self)
    }

    fn release_device_data(&mut self) {
        self.device_data.release();
    }

    unsafe fn destroy_descriptor_pools(&mut self) {
        self.descriptor_pools.destroy_all();
    }

    unsafe fn destroy_device(&mut self) {
        self.device.destroy_device(None);
    }

    fn free_memory_properties(&mut self) {
        self.memory_properties = None;
    }
}

/// Idle barrier, then property block, pools, device and memory properties.
/// Returns `false` when `target` was already closed.
///
/// # Safety
/// No other thread may use the device while this runs.
pub(crate) unsafe fn close_device(target: &mut dyn DeviceTeardown) -> bool {
    if target.is_closed() {
        return false;
    }
    target.mark_closed();

    if let Err(err) = target.wait_idle() {
        log::error!("Waiting for device idle failed during teardown: {err}");
    }

    target.release_device_data();
    target.destroy_descriptor_pools();
    target.destroy_device();
    target.free_memory_properties();

    true
}

unsafe fn fetch_queues(device: &ash::Device, groups: &[QueueGroup]) -> QueueHandles {
    let mut handles = QueueHandles {
        present: vk::Queue::null(),
        transfer: vk::Queue::null(),
        graphics: vk::Queue::null(),
        compute: vk::Queue::null(),
    };

    for group in groups {
        for &role in &group.roles {
            let Some(queue_index) = group.queue_index(role) else {
                continue;
            };
            let queue = device.get_device_queue(group.family_index, queue_index);
            match role {
                QueueRole::Present => handles.present = queue,
                QueueRole::Transfer => handles.transfer = queue,
                QueueRole::Graphics => handles.graphics = queue,
                QueueRole::Compute => handles.compute = queue,
            }
        }
    }

    handles
}

pub fn memory_type_indices(
    properties: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    flags: vk::MemoryPropertyFlags,
) -> Vec<u32> {
    properties.memory_types[..properties.memory_type_count as _]
        .iter()
        .enumerate()
        .filter(|(index, memory_type)| {
            (1 << index) & type_bits != 0 && memory_type.property_flags.contains(flags)
        })
        .map(|(index, _memory_type)| index as u32)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_properties(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut properties = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: types.len() as u32,
            ..Default::default()
        };
        for (slot, &flags) in properties.memory_types.iter_mut().zip(types) {
            slot.property_flags = flags;
        }
        properties
    }

    #[test]
    fn finds_every_matching_memory_type() {
        let properties = memory_properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            vk::MemoryPropertyFlags::HOST_VISIBLE
                | vk::MemoryPropertyFlags::HOST_COHERENT
                | vk::MemoryPropertyFlags::HOST_CACHED,
        ]);

        let host = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        assert_eq!(memory_type_indices(&properties, 0b111, host), vec![1, 2]);
        assert_eq!(memory_type_indices(&properties, 0b011, host), vec![1]);
        assert_eq!(
            memory_type_indices(&properties, 0b111, vk::MemoryPropertyFlags::DEVICE_LOCAL),
            vec![0]
        );
    }

    #[test]
    fn unsupported_combination_yields_nothing() {
        let properties = memory_properties(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);

        assert!(memory_type_indices(
            &properties,
            u32::MAX,
            vk::MemoryPropertyFlags::LAZILY_ALLOCATED
        )
        .is_empty());
        assert!(memory_type_indices(&properties, 0, vk::MemoryPropertyFlags::empty()).is_empty());
    }

    #[test]
    fn types_past_the_reported_count_are_ignored() {
        let mut properties = memory_properties(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);
        properties.memory_types[1].property_flags = vk::MemoryPropertyFlags::DEVICE_LOCAL;

        assert_eq!(
            memory_type_indices(&properties, u32::MAX, vk::MemoryPropertyFlags::DEVICE_LOCAL),
            vec![0]
        );
    }

    #[test]
    fn device_can_be_shared_between_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<VulkanDevice>();
    }

    #[derive(Default)]
    struct RecordingTeardown {
        closed: bool,
        fail_idle: bool,
        steps: Vec<&'static str>,
    }

    impl DeviceTeardown for RecordingTeardown {
        fn is_closed(&self) -> bool {
            self.closed
        }

        fn mark_closed(&mut self) {
            self.closed = true;
        }

        fn wait_idle(&self) -> Result<()> {
            if self.fail_idle {
                Err(DeviceError::Vulkan(vk::Result::ERROR_DEVICE_LOST))
            } else {
                Ok(())
            }
        }

        fn release_device_data(&mut self) {
            self.steps.push("release device data");
        }

        unsafe fn destroy_descriptor_pools(&mut self) {
            self.steps.push("destroy pools");
        }

        unsafe fn destroy_device(&mut self) {
            self.steps.push("destroy device");
        }

        fn free_memory_properties(&mut self) {
            self.steps.push("free memory properties");
        }
    }

    const TEARDOWN_ORDER: [&str; 4] = [
        "release device data",
        "destroy pools",
        "destroy device",
        "free memory properties",
    ];

    #[test]
    fn teardown_runs_in_order_exactly_once() {
        let mut target = RecordingTeardown::default();

        assert!(unsafe { close_device(&mut target) });
        assert_eq!(target.steps, TEARDOWN_ORDER);

        assert!(!unsafe { close_device(&mut target) });
        assert_eq!(target.steps.len(), TEARDOWN_ORDER.len());
    }

    #[test]
    fn teardown_continues_after_failed_idle_wait() {
        let mut target = RecordingTeardown {
            fail_idle: true,
            ..Default::default()
        };

        assert!(unsafe { close_device(&mut target) });
        assert_eq!(target.steps, TEARDOWN_ORDER);
    }

    #[test]
    fn default_request_accepts_everything() {
        let request = DeviceRequest::default();
        let device = crate::physical_device_data::tests::device(
            "Radeon",
            0x1002,
            vk::PhysicalDeviceType::DISCRETE_GPU,
        );

        assert!(request.filter.accepts(4, &device));
        assert!(request.extensions.extensions(vk::PhysicalDevice::null()).is_empty());
        assert!(!request.headless);
    }
}
