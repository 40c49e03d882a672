use std::borrow::Cow;
use std::ffi::{c_char, CStr, CString};

use ash::extensions::ext;
use ash::vk;
use raw_window_handle::RawDisplayHandle;

use crate::error::{DeviceError, Result};
use crate::version::version_to_string;

#[cfg(any(target_os = "macos", target_os = "ios"))]
use ash::vk::{KhrGetPhysicalDeviceProperties2Fn, KhrPortabilityEnumerationFn};

pub const VALIDATION_LAYER: &str = "VK_LAYER_KHRONOS_validation";

/// Newest API version the instance asks for, whatever the loader offers.
pub const MAX_API_VERSION: u32 = vk::API_VERSION_1_3;

unsafe extern "system" fn vulkan_debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::os::raw::c_void,
) -> vk::Bool32 {
    let callback_data = *p_callback_data;
    let message_id_number = callback_data.message_id_number;

    let message_id_name = if callback_data.p_message_id_name.is_null() {
        Cow::from("")
    } else {
        CStr::from_ptr(callback_data.p_message_id_name).to_string_lossy()
    };

    let message = if callback_data.p_message.is_null() {
        Cow::from("")
    } else {
        CStr::from_ptr(callback_data.p_message).to_string_lossy()
    };

    let level = if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        log::Level::Error
    } else if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        log::Level::Warn
    } else if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        log::Level::Info
    } else {
        log::Level::Debug
    };

    log::log!(
        level,
        "{message_type:?} [{message_id_name} ({message_id_number})] : {message}"
    );

    vk::FALSE
}

struct DebugMessenger {
    loader: ext::DebugUtils,
    messenger: vk::DebugUtilsMessengerEXT,
}

/// The Vulkan instance the device core runs on.
///
/// Windowed instances enable the surface extensions for `display`; headless
/// ones enable none. With validation on, the Khronos layer and a debug
/// messenger forwarding to `log` are installed when available.
pub struct InstanceData {
    pub instance: ash::Instance,
    pub entry: ash::Entry,
    /// Version the instance was created with. Devices are used at most at
    /// this version.
    pub api_version: u32,
    pub validation_layers: Vec<String>,
    debug: Option<DebugMessenger>,
}

impl InstanceData {
    /// # Safety
    /// Loads the system Vulkan library.
    pub unsafe fn new(display: Option<RawDisplayHandle>, validation: bool) -> Result<Self> {
        let entry = ash::Entry::linked();

        let app_name = CStr::from_bytes_with_nul_unchecked(b"scene_vk\0");

        let api_version = match entry
            .try_enumerate_instance_version()
            .map_err(DeviceError::Vulkan)?
        {
            Some(loader_version) => loader_version.min(MAX_API_VERSION),
            None => vk::API_VERSION_1_0,
        };
        log::debug!("Requesting Vulkan instance version {}", version_to_string(api_version));

        let app_info = vk::ApplicationInfo::builder()
            .application_name(app_name)
            .application_version(0)
            .engine_name(app_name)
            .engine_version(0)
            .api_version(api_version)
            .build();

        let create_flags = if cfg!(any(target_os = "macos", target_os = "ios")) {
            vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR
        } else {
            vk::InstanceCreateFlags::default()
        };

        let validation_layers = if validation {
            available_layers(&entry, &[VALIDATION_LAYER])?
        } else {
            Vec::new()
        };
        let layer_names = validation_layers
            .iter()
            .map(|name| CString::new(name.as_str()).map_err(|_| DeviceError::InvalidName(name.clone())))
            .collect::<Result<Vec<_>>>()?;
        let layers_names_raw: Vec<*const c_char> =
            layer_names.iter().map(|name| name.as_ptr()).collect();

        let mut extension_names = match display {
            Some(display) => ash_window::enumerate_required_extensions(display)
                .map_err(DeviceError::Vulkan)?
                .to_vec(),
            None => Vec::new(),
        };
        let debug_enabled = !validation_layers.is_empty();
        if debug_enabled {
            extension_names.push(ext::DebugUtils::name().as_ptr());
        }

        #[cfg(any(target_os = "macos", target_os = "ios"))]
        {
            extension_names.push(KhrPortabilityEnumerationFn::NAME.as_ptr());
            // Enabling this extension is a requirement when using `VK_KHR_portability_subset`
            extension_names.push(KhrGetPhysicalDeviceProperties2Fn::NAME.as_ptr());
        }

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_layer_names(&layers_names_raw)
            .enabled_extension_names(&extension_names)
            .flags(create_flags)
            .build();

        let instance = entry
            .create_instance(&create_info, None)
            .map_err(DeviceError::Vulkan)?;

        let debug = if debug_enabled {
            let debug_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
                .message_severity(
                    vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                        | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                        | vk::DebugUtilsMessageSeverityFlagsEXT::INFO,
                )
                .message_type(
                    vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                        | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                        | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
                )
                .pfn_user_callback(Some(vulkan_debug_callback))
                .build();

            let loader = ext::DebugUtils::new(&entry, &instance);
            match loader.create_debug_utils_messenger(&debug_info, None) {
                Ok(messenger) => Some(DebugMessenger { loader, messenger }),
                Err(err) => {
                    log::warn!("Could not install Vulkan debug messenger: {err}");
                    None
                }
            }
        } else {
            None
        };

        Ok(Self {
            instance,
            entry,
            api_version,
            validation_layers,
            debug,
        })
    }
}

unsafe fn available_layers(entry: &ash::Entry, wanted: &[&str]) -> Result<Vec<String>> {
    let available: Vec<String> = entry
        .enumerate_instance_layer_properties()
        .map_err(DeviceError::Vulkan)?
        .iter()
        .map(|layer| unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) }.to_string_lossy().into_owned())
        .collect();

    Ok(wanted
        .iter()
        .filter(|name| {
            let found = available.iter().any(|layer| layer == *name);
            if !found {
                log::warn!("Validation layer {name} is not installed, continuing without it");
            }
            found
        })
        .map(|name| (*name).to_owned())
        .collect())
}

impl Drop for InstanceData {
    fn drop(&mut self) {
        unsafe {
            if let Some(debug) = self.debug.take() {
                debug
                    .loader
                    .destroy_debug_utils_messenger(debug.messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}
