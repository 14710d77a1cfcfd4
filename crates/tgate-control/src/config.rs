//! Control API configuration.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Basic auth username (empty = disabled).
    #[serde(default)]
    pub username: String,
    /// Basic auth password (empty = disabled).
    #[serde(default)]
    pub password: String,
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8090
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_address: default_bind_address(),
            port: default_port(),
            username: String::new(),
            password: String::new(),
        }
    }
}

impl ControlConfig {
    pub fn auth_enabled(&self) -> bool {
        !self.username.is_empty() && !self.password.is_empty()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.enabled && self.port == 0 {
            return Err("control port must be non-zero".to_string());
        }
        if self.username.is_empty() != self.password.is_empty() {
            return Err("control username and password must be set together".to_string());
        }
        Ok(())
    }
}
