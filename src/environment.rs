//! Process environment access.
//!
//! Workarounds and configuration read and write environment variables
//! through the [`Environment`] trait so they can be exercised against an
//! in-memory map in tests.

use std::collections::HashMap;

use crate::error::{DeviceError, Result};

pub trait Environment {
    fn get_variable(&self, key: &str) -> Option<String>;
    fn set_variable(&mut self, key: &str, value: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Posix,
    Windows,
}

impl Platform {
    pub fn current() -> Result<Self> {
        if cfg!(unix) {
            Ok(Self::Posix)
        } else if cfg!(windows) {
            Ok(Self::Windows)
        } else {
            Err(DeviceError::UnknownPlatform(std::env::consts::OS.to_owned()))
        }
    }

    pub fn environment(self) -> Box<dyn Environment> {
        match self {
            Self::Posix => Box::new(PosixEnvironment),
            Self::Windows => Box::new(WindowsEnvironment),
        }
    }
}

/// The live process environment on Unix-like systems.
#[derive(Debug, Default, Clone, Copy)]
pub struct PosixEnvironment;

impl Environment for PosixEnvironment {
    fn get_variable(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }

    fn set_variable(&mut self, key: &str, value: &str) {
        std::env::set_var(key, value);
    }
}

/// The live process environment on Windows. The environment block already
/// matches keys case-insensitively, so names are stored as given.
#[derive(Debug, Default, Clone, Copy)]
pub struct WindowsEnvironment;

impl Environment for WindowsEnvironment {
    fn get_variable(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }

    fn set_variable(&mut self, key: &str, value: &str) {
        std::env::set_var(key, value);
    }
}

#[derive(Debug, Default, Clone)]
pub struct MemoryEnvironment {
    variables: HashMap<String, String>,
}

impl MemoryEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.set_variable(key, value);
        self
    }
}

impl Environment for MemoryEnvironment {
    fn get_variable(&self, key: &str) -> Option<String> {
        self.variables.get(key).cloned()
    }

    fn set_variable(&mut self, key: &str, value: &str) {
        self.variables.insert(key.to_owned(), value.to_owned());
    }
}
