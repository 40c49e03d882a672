//! Vulkan device core for the scene renderer.
//!
//! ```text
//! InstanceData
//! ├── SurfaceData
//! └── VulkanDevice
//!     ├── DeviceData (selected physical device)
//!     ├── Queues → QueueGroup
//!     ├── DescriptorPools → descriptor sets
//!     └── CommandData
//! ```
//!
//! Bring-up goes probe → select → workarounds → queue families → logical
//! device, all inside [`VulkanDevice::new`].

pub mod command_data;
pub mod config;
pub mod descriptor_data;
pub mod environment;
pub mod error;
pub mod formats;
pub mod instance_data;
pub mod logging;
pub mod logical_device;
pub mod physical_device_data;
pub mod queue_data;
pub mod surface_data;
pub mod version;
pub mod vulkan_device;
pub mod workarounds;

pub use config::DeviceConfig;
pub use error::{DeviceError, Result};
pub use physical_device_data::{DeviceData, DeviceFilter, DeviceType};
pub use queue_data::{QueueRole, Queues};
pub use vulkan_device::{DeviceRequest, VulkanDevice};
pub use workarounds::{DeviceWorkaround, WorkaroundOutcome, WorkaroundRegistry};

pub use ash;
