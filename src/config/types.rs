use serde::Deserialize;
use std::collections::HashMap;

use crate::config::settings::SettingsConfig;
use crate::utils::constants::DEFAULT_HTTP_TIMEOUT_MS;

/// ================================
/// Full service configuration
/// ================================
#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    #[serde(default)]
    pub settings: SettingsConfig,
    pub backend: BackendConfig,
    pub session: SessionConfig,
}

/// ================================
/// Authentication backend
/// ================================
#[derive(Debug, Deserialize, Clone)]
pub struct BackendConfig {
    /// e.g. https://clerk.example.com
    pub base_url: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    pub headers: Option<HashMap<String, GenericSourceValue>>,
}

/// Header value sources
#[derive(Debug, Deserialize, Clone)]
#[serde(untagged)]
pub enum GenericSourceValue {
    Literal { value: String },
    FromEnv { from_env: String },
    FromFile { path: String },
}

/// ================================
/// Session whose tokens are cached
/// ================================
#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    pub session_id: String,
    /// active organization, if any
    pub organization_id: Option<String>,
    /// templates fetched at start-up besides the plain session token
    #[serde(default)]
    pub templates: Vec<String>,
}

fn default_timeout_ms() -> u64 {
    DEFAULT_HTTP_TIMEOUT_MS
}
