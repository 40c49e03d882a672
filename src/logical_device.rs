//! Logical device construction.
//!
//! [`DevicePlan::new`] resolves everything `vkCreateDevice` needs without
//! touching the driver, so the extension and queue policy can be checked on
//! its own. [`DevicePlan::create`] performs the call.

use std::ffi::{c_char, CString};

use ash::extensions::khr;
use ash::vk;

use crate::error::{DeviceError, Result};
use crate::queue_data::{QueueGroup, Queues};

/// Supplies extra device extensions for a physical device.
pub trait ExtensionProvider {
    fn extensions(&self, physical_device: vk::PhysicalDevice) -> Vec<String>;
}

impl<F> ExtensionProvider for F
where
    F: Fn(vk::PhysicalDevice) -> Vec<String>,
{
    fn extensions(&self, physical_device: vk::PhysicalDevice) -> Vec<String> {
        self(physical_device)
    }
}

pub fn no_extensions(_: vk::PhysicalDevice) -> Vec<String> {
    Vec::new()
}

pub fn required_features() -> vk::PhysicalDeviceFeatures {
    vk::PhysicalDeviceFeatures {
        sampler_anisotropy: vk::TRUE,
        large_points: vk::TRUE,
        geometry_shader: vk::TRUE,
        ..Default::default()
    }
}

#[derive(Debug)]
pub struct DevicePlan {
    pub queue_groups: Vec<QueueGroup>,
    pub extensions: Vec<CString>,
    pub validation_layers: Vec<CString>,
    pub features: vk::PhysicalDeviceFeatures,
}

impl DevicePlan {
    pub fn new(
        queues: &Queues,
        requested_extensions: &[String],
        validation_layers: &[String],
        headless: bool,
    ) -> Result<Self> {
        let mut extensions: Vec<CString> = Vec::new();
        for name in requested_extensions {
            let name = c_string(name)?;
            if !extensions.contains(&name) {
                extensions.push(name);
            }
        }

        if !headless {
            let swapchain = khr::Swapchain::name().to_owned();
            if !extensions.contains(&swapchain) {
                extensions.push(swapchain);
            }
        }

        let validation_layers = validation_layers
            .iter()
            .map(|name| c_string(name))
            .collect::<Result<Vec<_>>>()?;

        if !validation_layers.is_empty() {
            log::warn!(
                "Enabled Vulkan validation layers ({}), this will reduce performance",
                validation_layers
                    .iter()
                    .map(|layer| layer.to_string_lossy())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }

        Ok(Self {
            queue_groups: queues.groups(),
            extensions,
            validation_layers,
            features: required_features(),
        })
    }

    pub fn extension_names(&self) -> Vec<String> {
        self.extensions
            .iter()
            .map(|name| name.to_string_lossy().into_owned())
            .collect()
    }

    /// # Safety
    /// `physical_device` must belong to `instance`.
    pub unsafe fn create(
        &self,
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
    ) -> Result<ash::Device> {
        let priorities: Vec<Vec<f32>> = self
            .queue_groups
            .iter()
            .map(QueueGroup::priorities)
            .collect();

        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = self
            .queue_groups
            .iter()
            .zip(&priorities)
            .map(|(group, priorities)| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(group.family_index)
                    .queue_priorities(priorities)
                    .build()
            })
            .collect();

        let extensions_raw: Vec<*const c_char> =
            self.extensions.iter().map(|name| name.as_ptr()).collect();
        let layers_raw: Vec<*const c_char> = self
            .validation_layers
            .iter()
            .map(|name| name.as_ptr())
            .collect();

        let device_create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extensions_raw)
            .enabled_layer_names(&layers_raw)
            .enabled_features(&self.features)
            .build();

        log::debug!(
            "Creating logical device with {} queue group(s), extensions: {}",
            queue_infos.len(),
            self.extension_names().join(", ")
        );

        instance
            .create_device(physical_device, &device_create_info, None)
            .map_err(DeviceError::DeviceCreationFailed)
    }
}

fn c_string(name: &str) -> Result<CString> {
    CString::new(name).map_err(|_| DeviceError::InvalidName(name.to_owned()))
}
