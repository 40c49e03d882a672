use ash::vk;
use thiserror::Error;

pub type Result<T, E = DeviceError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("No Vulkan-capable physical devices found")]
    NoDevicesFound,

    #[error("Failed to create device object: {0}")]
    DeviceCreationFailed(vk::Result),

    #[error("No memory type matching bits {type_bits:#b} with flags {flags:?}")]
    MemoryTypeNotFound {
        type_bits: u32,
        flags: vk::MemoryPropertyFlags,
    },

    #[error("No queue family on the selected device can present to the surface")]
    NoPresentQueue,

    #[error("Invalid extension or layer name (contains interior NUL): {0}")]
    InvalidName(String),

    #[error("Requested {requested} descriptor sets, but a fresh pool only holds {capacity}")]
    DescriptorRequestTooLarge { requested: u32, capacity: u32 },

    #[error("Device workaround \"{description}\" aborted startup: {reason}")]
    WorkaroundAbort { description: String, reason: String },

    #[error("Unknown platform {0}, no environment rules known")]
    UnknownPlatform(String),

    #[error("Vulkan error: {0}")]
    Vulkan(vk::Result),
}
