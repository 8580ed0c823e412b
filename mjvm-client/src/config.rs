// Session configuration

use crate::symbols::ClassPaths;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

pub const SDK_CLASS_PATH_ENV: &str = "MJVM_SDK_CLASS_PATH";
pub const SDK_SOURCE_PATH_ENV: &str = "MJVM_SDK_SOURCE_PATH";

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionConfig {
    pub host: String,
    pub port: u16,
    pub command_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub install_chunk_size: usize,
    pub workspace: PathBuf,
    pub sdk_class_path: Option<PathBuf>,
    pub sdk_source_path: Option<PathBuf>,
    pub max_hierarchy_depth: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5555,
            command_timeout_ms: 500,
            poll_interval_ms: 100,
            install_chunk_size: 512,
            workspace: std::env::current_dir().unwrap_or_default(),
            sdk_class_path: None,
            sdk_source_path: None,
            max_hierarchy_depth: 64,
        }
    }
}

impl SessionConfig {
    /// Fill unset SDK paths from the environment
    pub fn with_env_fallbacks(mut self) -> Self {
        if self.sdk_class_path.is_none() {
            self.sdk_class_path = std::env::var_os(SDK_CLASS_PATH_ENV).map(PathBuf::from);
        }
        if self.sdk_source_path.is_none() {
            self.sdk_source_path = std::env::var_os(SDK_SOURCE_PATH_ENV).map(PathBuf::from);
        }
        self
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn class_paths(&self) -> ClassPaths {
        ClassPaths {
            workspace: self.workspace.clone(),
            sdk_class_path: self.sdk_class_path.clone(),
            sdk_source_path: self.sdk_source_path.clone(),
        }
    }
}
