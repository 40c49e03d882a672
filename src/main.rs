use std::error::Error;
use std::sync::Arc;
use std::thread;

use ash::vk;
use raw_window_handle::HasRawDisplayHandle;
use scene_vk::command_data::CommandData;
use scene_vk::environment::Platform;
use scene_vk::instance_data::InstanceData;
use scene_vk::logging::init_logging;
use scene_vk::surface_data::SurfaceData;
use scene_vk::vulkan_device::DescriptorBuffer;
use scene_vk::{
    DeviceConfig, DeviceData, DeviceError, DeviceRequest, DeviceType, QueueRole, VulkanDevice,
    WorkaroundRegistry,
};
use winit::{
    event::{ElementState, Event, KeyboardInput, VirtualKeyCode, WindowEvent},
    event_loop::EventLoop,
    platform::run_return::EventLoopExtRunReturn,
    window::WindowBuilder,
};

const UPLOAD_THREADS: usize = 4;
const SETS_PER_THREAD: usize = 64;
const UNIFORM_SIZE: vk::DeviceSize = 256;

fn main() -> Result<(), Box<dyn Error>> {
    let platform = Platform::current()?;
    let mut env = platform.environment();
    let config = DeviceConfig::from_environment(&*env);

    init_logging(&config, &*env);

    let registry = WorkaroundRegistry::with_defaults();

    if config.headless {
        let instance_data = unsafe { InstanceData::new(None, config.validation)? };
        let request = device_request(&instance_data, true);
        let device = Arc::new(unsafe {
            VulkanDevice::new(
                &instance_data,
                None,
                &request,
                &registry,
                &config,
                &mut *env,
            )?
        });
        return exercise(&device);
    }

    let mut event_loop = EventLoop::new();
    let window = WindowBuilder::new()
        .with_title("scene_vk")
        .with_inner_size(winit::dpi::LogicalSize::new(640.0, 480.0))
        .build(&event_loop)?;

    let instance_data =
        unsafe { InstanceData::new(Some(window.raw_display_handle()), config.validation)? };
    let mut surface_data = unsafe { SurfaceData::new(&window, &instance_data)? };
    let request = device_request(&instance_data, false);
    let device = Arc::new(unsafe {
        VulkanDevice::new(
            &instance_data,
            Some(&surface_data),
            &request,
            &registry,
            &config,
            &mut *env,
        )?
    });
    unsafe { surface_data.update_surface_format(device.physical_device())? };

    exercise(&device)?;
    render_loop(&window, &mut event_loop);

    Ok(())
}

fn device_request(instance_data: &InstanceData, headless: bool) -> DeviceRequest {
    DeviceRequest {
        filter: Box::new(|_: usize, device: &DeviceData| device.device_type != DeviceType::Cpu),
        validation_layers: instance_data.validation_layers.clone(),
        headless,
        ..Default::default()
    }
}

/// Allocates descriptor sets from several threads at once and sets up a
/// command pool per queue role.
fn exercise(device: &Arc<VulkanDevice>) -> Result<(), Box<dyn Error>> {
    let device_data = device.device_data();
    log::info!(
        "Using {} with Vulkan {} (driver {:?}), up to {} bound descriptor sets",
        device_data.name,
        device_data.api(),
        device_data.driver(),
        device_data
            .limits()
            .map_or(0, |limits| limits.max_bound_descriptor_sets)
    );
    for group in device.queue_groups() {
        log::info!(
            "Queue family {}: {} queue(s) for {:?}",
            group.family_index,
            group.queue_count(),
            group.roles
        );
    }

    let layout = device.create_descriptor_set_layout(
        &[(vk::DescriptorType::UNIFORM_BUFFER, 1)],
        0,
        vk::ShaderStageFlags::ALL_GRAPHICS,
    )?;
    let (buffer, memory) = create_uniform_buffer(device, UNIFORM_SIZE)?;

    let workers: Vec<_> = (0..UPLOAD_THREADS)
        .map(|_| {
            let device = Arc::clone(device);
            thread::spawn(move || -> scene_vk::Result<usize> {
                let binding = DescriptorBuffer {
                    buffer,
                    offset: 0,
                    range: UNIFORM_SIZE,
                };
                for _ in 0..SETS_PER_THREAD {
                    device.create_descriptor_set(
                        layout,
                        std::slice::from_ref(&binding),
                        vk::DescriptorType::UNIFORM_BUFFER,
                    )?;
                }
                Ok(SETS_PER_THREAD)
            })
        })
        .collect();

    let mut allocated = 0;
    for worker in workers {
        allocated += worker
            .join()
            .map_err(|_| "descriptor upload thread panicked")??;
    }

    log::info!(
        "Allocated {allocated} descriptor sets from {} pool(s), {} sets left",
        device.descriptor_pools().pool_count(),
        device.descriptor_pools().total_free()
    );

    for role in [QueueRole::Graphics, QueueRole::Transfer, QueueRole::Compute] {
        let command_data = CommandData::new(Arc::clone(device), role)?;
        log::info!(
            "Command pool for {role:?} on family {}: {:?}",
            device.queues().family(role).index,
            command_data.pool
        );
    }

    device.wait_idle()?;
    unsafe {
        device.device().free_memory(memory, None);
        device.device().destroy_buffer(buffer, None);
        device.destroy_descriptor_set_layout(layout);
    }

    Ok(())
}

fn create_uniform_buffer(
    device: &VulkanDevice,
    size: vk::DeviceSize,
) -> scene_vk::Result<(vk::Buffer, vk::DeviceMemory)> {
    let buffer_info = vk::BufferCreateInfo {
        size,
        usage: vk::BufferUsageFlags::UNIFORM_BUFFER,
        sharing_mode: vk::SharingMode::EXCLUSIVE,
        ..Default::default()
    };

    unsafe {
        let buffer = device
            .device()
            .create_buffer(&buffer_info, None)
            .map_err(DeviceError::DeviceCreationFailed)?;
        let requirements = device.device().get_buffer_memory_requirements(buffer);

        let memory = device
            .find_memory_type_index(
                &requirements,
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            )
            .and_then(|memory_type_index| {
                let allocate_info = vk::MemoryAllocateInfo {
                    allocation_size: requirements.size,
                    memory_type_index,
                    ..Default::default()
                };
                device
                    .device()
                    .allocate_memory(&allocate_info, None)
                    .map_err(DeviceError::DeviceCreationFailed)
            });

        let memory = match memory {
            Ok(memory) => memory,
            Err(err) => {
                device.device().destroy_buffer(buffer, None);
                return Err(err);
            }
        };

        if let Err(err) = device.device().bind_buffer_memory(buffer, memory, 0) {
            device.device().free_memory(memory, None);
            device.device().destroy_buffer(buffer, None);
            return Err(DeviceError::Vulkan(err));
        }

        Ok((buffer, memory))
    }
}

fn render_loop(window: &winit::window::Window, event_loop: &mut EventLoop<()>) {
    event_loop.run_return(|event, _, control_flow| match event {
        Event::WindowEvent {
            event:
                WindowEvent::CloseRequested
                | WindowEvent::KeyboardInput {
                    input:
                        KeyboardInput {
                            state: ElementState::Pressed,
                            virtual_keycode: Some(VirtualKeyCode::Escape),
                            ..
                        },
                    ..
                },
            ..
        } => control_flow.set_exit(),
        Event::MainEventsCleared => {
            let window_size = window.inner_size();
            if window_size.width == 0 || window_size.height == 0 {
                control_flow.set_wait();
            } else {
                control_flow.set_poll();
                window.request_redraw();
            }
        }
        _ => (),
    });
}
