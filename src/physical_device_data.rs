//! Physical device probing and selection.
//!
//! [`probe_physical_devices`] builds one [`DeviceData`] per physical device
//! the instance reports. [`select_device`] then picks one of them with a
//! caller-supplied [`DeviceFilter`] and releases the property blocks of all
//! the others.

use std::collections::HashMap;
use std::fmt;

use ash::vk;

use crate::error::{DeviceError, Result};
use crate::formats::{self, FormatSupport};
use crate::version::{version_to_string, Version};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceType {
    Unknown,
    Other,
    IntegratedGpu,
    DiscreteGpu,
    VirtualGpu,
    Cpu,
}

impl From<vk::PhysicalDeviceType> for DeviceType {
    fn from(ty: vk::PhysicalDeviceType) -> Self {
        match ty {
            vk::PhysicalDeviceType::OTHER => Self::Other,
            vk::PhysicalDeviceType::INTEGRATED_GPU => Self::IntegratedGpu,
            vk::PhysicalDeviceType::DISCRETE_GPU => Self::DiscreteGpu,
            vk::PhysicalDeviceType::VIRTUAL_GPU => Self::VirtualGpu,
            vk::PhysicalDeviceType::CPU => Self::Cpu,
            _ => Self::Unknown,
        }
    }
}

pub fn vendor_name(vendor_id: u32) -> String {
    let name = match vendor_id {
        0x1002 => "AMD",
        0x10de => "Nvidia",
        0x8086 => "Intel",
        0x13b5 => "ARM",
        0x5143 => "Qualcomm",
        0x1010 => "ImgTec",
        0x106b => "Apple",
        0x10005 => "Mesa",
        _ => return format!("Unknown (0x{vendor_id:04x})"),
    };

    name.to_owned()
}

/// Capabilities of one physical device.
///
/// The raw property block and the format table are owned by the record and
/// dropped by [`DeviceData::release`]; the descriptive strings stay behind so
/// the device can still be named in logs afterwards.
#[derive(Debug, Clone)]
pub struct DeviceData {
    pub vendor: String,
    pub name: String,
    pub driver_version: String,
    pub api_version: String,
    pub device_type: DeviceType,
    pub vendor_id: u32,
    pub device_id: u32,
    pub raw_api_version: u32,
    properties: Option<Box<vk::PhysicalDeviceProperties>>,
    formats: Option<HashMap<vk::Format, FormatSupport>>,
}

impl DeviceData {
    /// Builds the record from a property block, asking `query_format` for
    /// every format that is core in the device's API version. Formats without
    /// any supported feature are left out of the table.
    pub fn new<F>(properties: vk::PhysicalDeviceProperties, query_format: F) -> Self
    where
        F: FnMut(vk::Format) -> vk::FormatProperties,
    {
        Self::with_instance_version(properties, u32::MAX, query_format)
    }

    /// Like [`DeviceData::new`], but only queries formats that are core in
    /// the lower of the device and instance API versions.
    pub fn with_instance_version<F>(
        properties: vk::PhysicalDeviceProperties,
        instance_version: u32,
        mut query_format: F,
    ) -> Self
    where
        F: FnMut(vk::Format) -> vk::FormatProperties,
    {
        let api = Version::decode(properties.api_version);
        let usable = Version::decode(properties.api_version.min(instance_version));
        let formats = formats::core_formats(usable.minor)
            .filter_map(|format| {
                let support = FormatSupport::from(query_format(format));
                (!support.is_empty()).then_some((format, support))
            })
            .collect();

        let name_bytes: Vec<u8> = properties
            .device_name
            .iter()
            .take_while(|&&c| c != 0)
            .map(|&c| c as u8)
            .collect();

        Self {
            vendor: vendor_name(properties.vendor_id),
            name: String::from_utf8_lossy(&name_bytes).into_owned(),
            driver_version: version_to_string(properties.driver_version),
            api_version: api.to_string(),
            device_type: properties.device_type.into(),
            vendor_id: properties.vendor_id,
            device_id: properties.device_id,
            raw_api_version: properties.api_version,
            properties: Some(Box::new(properties)),
            formats: Some(formats),
        }
    }

    pub fn api(&self) -> Version {
        Version::decode(self.raw_api_version)
    }

    pub fn driver(&self) -> Option<Version> {
        self.properties
            .as_ref()
            .map(|properties| Version::decode(properties.driver_version))
    }

    pub fn properties(&self) -> Option<&vk::PhysicalDeviceProperties> {
        self.properties.as_deref()
    }

    pub fn limits(&self) -> Option<&vk::PhysicalDeviceLimits> {
        self.properties.as_deref().map(|properties| &properties.limits)
    }

    pub fn format_support(&self, format: vk::Format) -> Option<FormatSupport> {
        self.formats.as_ref()?.get(&format).copied()
    }

    pub fn supports_format(
        &self,
        format: vk::Format,
        tiling: vk::ImageTiling,
        features: vk::FormatFeatureFlags,
    ) -> bool {
        self.format_support(format)
            .map_or(false, |support| support.supports(tiling, features))
    }

    pub fn format_count(&self) -> usize {
        self.formats.as_ref().map_or(0, HashMap::len)
    }

    pub fn release(&mut self) {
        self.properties = None;
        self.formats = None;
    }

    pub fn is_released(&self) -> bool {
        self.properties.is_none() && self.formats.is_none()
    }
}

impl fmt::Display for DeviceData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} ({:?}, driver version {}, Vulkan API {})",
            self.vendor, self.name, self.device_type, self.driver_version, self.api_version
        )
    }
}

/// Decides which physical devices are acceptable.
pub trait DeviceFilter {
    fn accepts(&self, index: usize, device: &DeviceData) -> bool;
}

impl<F> DeviceFilter for F
where
    F: Fn(usize, &DeviceData) -> bool,
{
    fn accepts(&self, index: usize, device: &DeviceData) -> bool {
        self(index, device)
    }
}

pub struct DeviceProbe {
    pub handles: Vec<vk::PhysicalDevice>,
    pub devices: Vec<DeviceData>,
}

/// # Safety
/// `instance` must be a live instance created with `instance_version`.
pub unsafe fn probe_physical_devices(
    instance: &ash::Instance,
    instance_version: u32,
) -> Result<DeviceProbe> {
    let handles = instance
        .enumerate_physical_devices()
        .map_err(DeviceError::Vulkan)?;

    if handles.is_empty() {
        return Err(DeviceError::NoDevicesFound);
    }

    let devices = handles
        .iter()
        .map(|&physical_device| {
            let properties = unsafe { instance.get_physical_device_properties(physical_device) };
            DeviceData::with_instance_version(properties, instance_version, |format| unsafe {
                instance.get_physical_device_format_properties(physical_device, format)
            })
        })
        .collect();

    Ok(DeviceProbe { handles, devices })
}

/// Picks the *last* device accepted by `filter`, logs every candidate and
/// releases the property blocks of all devices that were not picked.
///
/// When no device is accepted the first one is used.
pub fn select_device(devices: &mut [DeviceData], filter: &dyn DeviceFilter) -> Result<usize> {
    if devices.is_empty() {
        return Err(DeviceError::NoDevicesFound);
    }

    let matched = devices
        .iter()
        .enumerate()
        .filter(|(index, device)| filter.accepts(*index, device))
        .map(|(index, _)| index)
        .last();

    let selected = matched.unwrap_or_else(|| {
        log::warn!("No physical device matched the device filter, falling back to device #0");
        0
    });

    for (index, device) in devices.iter_mut().enumerate() {
        if index == selected {
            log::info!("  Device #{index}: {device} (selected)");
        } else {
            log::info!("  Device #{index}: {device}");
            device.release();
        }
    }

    Ok(selected)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn properties(
        name: &str,
        vendor_id: u32,
        device_type: vk::PhysicalDeviceType,
        driver_version: u32,
    ) -> vk::PhysicalDeviceProperties {
        let mut properties = vk::PhysicalDeviceProperties {
            api_version: Version::new(1, 1, 70).encode(),
            driver_version,
            vendor_id,
            device_id: 0x1b80,
            device_type,
            ..Default::default()
        };
        for (dst, src) in properties.device_name.iter_mut().zip(name.bytes()) {
            *dst = src as std::os::raw::c_char;
        }
        properties
    }

    pub(crate) fn device(name: &str, vendor_id: u32, device_type: vk::PhysicalDeviceType) -> DeviceData {
        DeviceData::new(
            properties(name, vendor_id, device_type, 0x5A40_1000),
            |format| match format {
                vk::Format::R8G8B8A8_UNORM => vk::FormatProperties {
                    optimal_tiling_features: vk::FormatFeatureFlags::SAMPLED_IMAGE
                        | vk::FormatFeatureFlags::COLOR_ATTACHMENT,
                    linear_tiling_features: vk::FormatFeatureFlags::TRANSFER_DST,
                    ..Default::default()
                },
                vk::Format::D32_SFLOAT => vk::FormatProperties {
                    optimal_tiling_features: vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
                    ..Default::default()
                },
                _ => vk::FormatProperties::default(),
            },
        )
    }

    #[test]
    fn builds_readable_record() {
        let device = device("GeForce GTX 1080", 0x10de, vk::PhysicalDeviceType::DISCRETE_GPU);

        assert_eq!(device.vendor, "Nvidia");
        assert_eq!(device.name, "GeForce GTX 1080");
        assert_eq!(device.driver_version, "361.1.0");
        assert_eq!(device.api_version, "1.1.70");
        assert_eq!(device.device_type, DeviceType::DiscreteGpu);
        assert_eq!(device.format_count(), 2);
        assert!(device.supports_format(
            vk::Format::R8G8B8A8_UNORM,
            vk::ImageTiling::OPTIMAL,
            vk::FormatFeatureFlags::SAMPLED_IMAGE,
        ));
        assert!(!device.supports_format(
            vk::Format::D32_SFLOAT,
            vk::ImageTiling::LINEAR,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
        ));
        assert_eq!(device.format_support(vk::Format::R16_UNORM), None);
        assert_eq!(
            device.to_string(),
            "Nvidia GeForce GTX 1080 (DiscreteGpu, driver version 361.1.0, Vulkan API 1.1.70)"
        );
    }

    #[test]
    fn only_queries_formats_of_the_device_api_version() {
        let mut queried = Vec::new();
        let properties = properties("llvmpipe", 0x10005, vk::PhysicalDeviceType::CPU, 0);
        DeviceData::new(
            vk::PhysicalDeviceProperties {
                api_version: Version::new(1, 0, 0).encode(),
                ..properties
            },
            |format| {
                queried.push(format);
                vk::FormatProperties::default()
            },
        );

        assert_eq!(queried.len(), 185);
        assert!(queried.iter().all(|format| format.as_raw() <= 184));
    }

    #[test]
    fn formats_are_limited_by_the_instance_version() {
        let mut queried = Vec::new();
        let properties = vk::PhysicalDeviceProperties {
            api_version: Version::new(1, 3, 250).encode(),
            ..properties("Arc A770", 0x8086, vk::PhysicalDeviceType::DISCRETE_GPU, 0)
        };
        let device = DeviceData::with_instance_version(
            properties,
            Version::new(1, 1, 0).encode(),
            |format| {
                queried.push(format);
                vk::FormatProperties::default()
            },
        );

        assert_eq!(device.api_version, "1.3.250");
        assert_eq!(queried.len(), 185 + 34);
        assert!(queried.contains(&vk::Format::G8_B8R8_2PLANE_420_UNORM));
        assert!(!queried.contains(&vk::Format::A4R4G4B4_UNORM_PACK16));
        assert!(!queried.contains(&vk::Format::ASTC_4X4_SFLOAT_BLOCK));
    }

    #[test]
    fn record_details_are_dropped_on_release() {
        let mut device = device("Radeon RX 580", 0x1002, vk::PhysicalDeviceType::DISCRETE_GPU);
        assert_eq!(device.api(), Version::new(1, 1, 70));
        assert_eq!(device.driver(), Some(Version::new(361, 1, 0)));
        assert!(device.limits().is_some());

        device.release();

        assert!(device.is_released());
        assert_eq!(device.driver(), None);
        assert!(device.limits().is_none());
        assert_eq!(device.format_count(), 0);
        assert_eq!(device.api(), Version::new(1, 1, 70));
        assert_eq!(device.name, "Radeon RX 580");
    }

    #[test]
    fn unknown_vendor_keeps_its_id() {
        assert_eq!(vendor_name(0xabcd), "Unknown (0xabcd)");
        assert_eq!(vendor_name(0x1002), "AMD");
    }

    #[test]
    fn last_matching_device_wins_and_others_are_released() {
        let mut devices: Vec<_> = (0..5)
            .map(|i| device(&format!("GPU {i}"), 0x1002, vk::PhysicalDeviceType::DISCRETE_GPU))
            .collect();

        let filter = |index: usize, _: &DeviceData| index == 1 || index == 3;
        let selected = select_device(&mut devices, &filter).unwrap();

        assert_eq!(selected, 3);
        for (index, device) in devices.iter().enumerate() {
            assert_eq!(device.is_released(), index != 3, "device #{index}");
        }
        assert!(devices[3].properties().is_some());
        assert_eq!(devices[1].name, "GPU 1");
    }

    #[test]
    fn falls_back_to_first_device_when_nothing_matches() {
        let mut devices = vec![
            device("A", 0x8086, vk::PhysicalDeviceType::INTEGRATED_GPU),
            device("B", 0x10de, vk::PhysicalDeviceType::DISCRETE_GPU),
        ];

        let selected = select_device(&mut devices, &|_: usize, _: &DeviceData| false).unwrap();

        assert_eq!(selected, 0);
        assert!(!devices[0].is_released());
        assert!(devices[1].is_released());
    }

    #[test]
    fn selecting_from_nothing_fails() {
        let result = select_device(&mut [], &|_: usize, _: &DeviceData| true);
        assert!(matches!(result, Err(DeviceError::NoDevicesFound)));
    }
}
