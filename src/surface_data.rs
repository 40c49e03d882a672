use ash::{extensions::khr, vk};

use crate::error::{DeviceError, Result};
use crate::instance_data::InstanceData;

use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};

pub struct SurfaceData {
    pub loader: khr::Surface,
    pub surface: vk::SurfaceKHR,
    pub format: Option<vk::SurfaceFormatKHR>,
    pub resolution: vk::Extent2D,
}

impl SurfaceData {
    /// # Safety
    /// The surface must be dropped before `instance_data`.
    pub unsafe fn new(window: &winit::window::Window, instance_data: &InstanceData) -> Result<Self> {
        let surface = ash_window::create_surface(
            &instance_data.entry,
            &instance_data.instance,
            window.raw_display_handle(),
            window.raw_window_handle(),
            None,
        )
        .map_err(DeviceError::Vulkan)?;

        let surface_loader = khr::Surface::new(&instance_data.entry, &instance_data.instance);

        let window_size = window.inner_size();

        Ok(Self {
            loader: surface_loader,
            surface,
            format: None,
            resolution: vk::Extent2D {
                width: window_size.width,
                height: window_size.height,
            },
        })
    }

    /// # Safety
    /// `physical_device` must come from the instance this surface was created on.
    pub unsafe fn supports_present(
        &self,
        physical_device: vk::PhysicalDevice,
        queue_family_index: u32,
    ) -> Result<bool> {
        self.loader
            .get_physical_device_surface_support(physical_device, queue_family_index, self.surface)
            .map_err(DeviceError::Vulkan)
    }

    /// # Safety
    /// `physical_device` must come from the instance this surface was created on.
    pub unsafe fn update_surface_format(&mut self, physical_device: vk::PhysicalDevice) -> Result<()> {
        let formats = self
            .loader
            .get_physical_device_surface_formats(physical_device, self.surface)
            .map_err(DeviceError::Vulkan)?;

        self.format = formats.first().copied();
        if self.format.is_none() {
            log::warn!("Surface reports no supported formats");
        }

        Ok(())
    }
}

impl Drop for SurfaceData {
    fn drop(&mut self) {
        unsafe {
            self.loader.destroy_surface(self.surface, None);
        }
    }
}
