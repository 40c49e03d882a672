//! `env_logger` setup driven by [`DeviceConfig`].
//!
//! The filter comes from `SCENE_VK_LOG` when set, then `RUST_LOG`, and
//! defaults to `info`. `SCENE_VK_LOG_STYLE` takes the usual
//! `auto`/`always`/`never` values.

use std::sync::Once;

use crate::config::DeviceConfig;
use crate::environment::Environment;

pub const RUST_LOG_VAR: &str = "RUST_LOG";

static INIT: Once = Once::new();

fn logger_builder(config: &DeviceConfig, env: &dyn Environment) -> env_logger::Builder {
    let mut builder = env_logger::Builder::new();

    match config
        .log_filter
        .clone()
        .or_else(|| env.get_variable(RUST_LOG_VAR))
    {
        Some(filter) => builder.parse_filters(&filter),
        None => builder.filter_level(log::LevelFilter::Info),
    };

    if let Some(style) = &config.log_style {
        builder.parse_write_style(style);
    }

    builder
}

/// Installs the global logger. Only the first call has any effect, and a
/// logger installed by someone else is left in place.
pub fn init_logging(config: &DeviceConfig, env: &dyn Environment) {
    INIT.call_once(|| {
        if logger_builder(config, env).try_init().is_err() {
            log::warn!("A logger was already installed, keeping it");
            return;
        }

        log::debug!("logging initialized");
    });
}
