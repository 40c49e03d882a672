use std::sync::Arc;

use ash::vk;

use crate::error::{DeviceError, Result};
use crate::queue_data::QueueRole;
use crate::vulkan_device::VulkanDevice;

/// A command pool for one queue role, with a setup and a draw buffer.
pub struct CommandData {
    device: Arc<VulkanDevice>,
    pub role: QueueRole,
    pub pool: vk::CommandPool,
    pub draw_buffer: vk::CommandBuffer,
    pub setup_buffer: vk::CommandBuffer,
}

impl CommandData {
    pub fn new(device: Arc<VulkanDevice>, role: QueueRole) -> Result<Self> {
        let family_index = device.queues().family(role).index;
        let pool = device.create_command_pool(family_index)?;

        let command_buffer_allocate_info = vk::CommandBufferAllocateInfo::builder()
            .command_buffer_count(2)
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .build();

        let command_buffers =
            match unsafe { device.device().allocate_command_buffers(&command_buffer_allocate_info) } {
                Ok(buffers) => buffers,
                Err(err) => {
                    unsafe { device.destroy_command_pool(pool) };
                    return Err(DeviceError::DeviceCreationFailed(err));
                }
            };

        Ok(Self {
            device,
            role,
            pool,
            setup_buffer: command_buffers[0],
            draw_buffer: command_buffers[1],
        })
    }
}

impl Drop for CommandData {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_command_pool(self.pool);
        }
    }
}
