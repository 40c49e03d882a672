use crate::environment::Environment;

pub const DISABLE_WORKAROUNDS_VAR: &str = "SCENE_VK_DISABLE_WORKAROUNDS";
pub const HEADLESS_VAR: &str = "SCENE_VK_HEADLESS";
pub const VALIDATION_VAR: &str = "SCENE_VK_VALIDATION";
pub const LOG_VAR: &str = "SCENE_VK_LOG";
pub const LOG_STYLE_VAR: &str = "SCENE_VK_LOG_STYLE";

/// Process-wide settings, read once at startup and passed by reference to
/// whatever needs them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceConfig {
    pub disable_workarounds: bool,
    pub headless: bool,
    pub validation: bool,
    pub log_filter: Option<String>,
    pub log_style: Option<String>,
}

impl DeviceConfig {
    pub fn from_environment(env: &dyn Environment) -> Self {
        Self {
            disable_workarounds: flag(env, DISABLE_WORKAROUNDS_VAR),
            headless: flag(env, HEADLESS_VAR),
            validation: flag(env, VALIDATION_VAR),
            log_filter: non_empty(env, LOG_VAR),
            log_style: non_empty(env, LOG_STYLE_VAR),
        }
    }
}

fn non_empty(env: &dyn Environment, key: &str) -> Option<String> {
    env.get_variable(key).filter(|value| !value.trim().is_empty())
}

fn flag(env: &dyn Environment, key: &str) -> bool {
    env.get_variable(key).map_or(false, |value| {
        matches!(
            value.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}
