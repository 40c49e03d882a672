//! Known driver and vendor defects, and what to do about them.
//!
//! A [`WorkaroundRegistry`] is an ordered table of rules. After a physical
//! device has been selected, every rule whose predicate matches runs its
//! action once, in table order.

use crate::config::DeviceConfig;
use crate::environment::Environment;
use crate::error::{DeviceError, Result};
use crate::physical_device_data::{DeviceData, DeviceType};

pub const NVIDIA_NEXT_GEN_COMPILER_VAR: &str = "__GL_NextGenCompiler";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkaroundOutcome {
    Continue,
    /// The device cannot be used safely; startup stops with this reason.
    Abort(String),
}

type Predicate = Box<dyn Fn(&DeviceData) -> bool + Send + Sync>;
type Action = Box<dyn Fn(&DeviceData, &mut dyn Environment) -> WorkaroundOutcome + Send + Sync>;

pub struct DeviceWorkaround {
    predicate: Predicate,
    description: String,
    action: Action,
}

impl DeviceWorkaround {
    pub fn new<P, A>(predicate: P, description: impl Into<String>, action: A) -> Self
    where
        P: Fn(&DeviceData) -> bool + Send + Sync + 'static,
        A: Fn(&DeviceData, &mut dyn Environment) -> WorkaroundOutcome + Send + Sync + 'static,
    {
        Self {
            predicate: Box::new(predicate),
            description: description.into(),
            action: Box::new(action),
        }
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn matches(&self, device: &DeviceData) -> bool {
        (self.predicate)(device)
    }
}

#[derive(Default)]
pub struct WorkaroundRegistry {
    workarounds: Vec<DeviceWorkaround>,
}

impl WorkaroundRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.push(nvidia_396_compiler());
        registry.push(software_rasterizer());
        registry
    }

    pub fn push(&mut self, workaround: DeviceWorkaround) -> &mut Self {
        self.workarounds.push(workaround);
        self
    }

    pub fn len(&self) -> usize {
        self.workarounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workarounds.is_empty()
    }

    /// Runs every matching workaround against `device` and returns how many
    /// fired. An aborting workaround stops the remaining ones.
    pub fn apply(&self, device: &DeviceData, env: &mut dyn Environment) -> Result<usize> {
        let mut applied = 0;

        for workaround in self.workarounds.iter().filter(|w| w.matches(device)) {
            log::info!("Applying device workaround: {}", workaround.description);
            applied += 1;

            if let WorkaroundOutcome::Abort(reason) = (workaround.action)(device, env) {
                return Err(DeviceError::WorkaroundAbort {
                    description: workaround.description.clone(),
                    reason,
                });
            }
        }

        Ok(applied)
    }

    /// [`apply`](Self::apply), unless `config` disables workarounds, in
    /// which case nothing runs and no rule counts as fired.
    pub fn apply_configured(
        &self,
        config: &DeviceConfig,
        device: &DeviceData,
        env: &mut dyn Environment,
    ) -> Result<usize> {
        if config.disable_workarounds {
            log::info!("Device-specific workarounds are disabled");
            return Ok(0);
        }

        self.apply(device, env)
    }
}

fn nvidia_396_compiler() -> DeviceWorkaround {
    DeviceWorkaround::new(
        |device| {
            device.vendor_id == 0x10de && device.driver_version.split('.').next() == Some("396")
        },
        "Nvidia 396.xx drivers miscompile shaders unless the next-gen compiler is disabled",
        |device, env| {
            if env.get_variable(NVIDIA_NEXT_GEN_COMPILER_VAR).is_some() {
                return WorkaroundOutcome::Continue;
            }

            log::warn!(
                "The graphics driver version you are using ({}) contains a bug that breaks the Vulkan renderer.",
                device.driver_version
            );
            log::warn!(
                "Set the environment variable {NVIDIA_NEXT_GEN_COMPILER_VAR}=0 and restart to work around it."
            );
            WorkaroundOutcome::Abort(format!(
                "driver {} requires {NVIDIA_NEXT_GEN_COMPILER_VAR}=0, fall back to another backend",
                device.driver_version
            ))
        },
    )
}

fn software_rasterizer() -> DeviceWorkaround {
    DeviceWorkaround::new(
        |device| device.device_type == DeviceType::Cpu,
        "Software rasterizer selected",
        |device, _| {
            log::warn!(
                "{} is a CPU implementation, expect very low performance",
                device.name
            );
            WorkaroundOutcome::Continue
        },
    )
}
