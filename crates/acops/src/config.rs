use crate::error::{CloudError, CloudResult};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const ACCESS_KEY_ID_ENV: &str = "ALIBABA_CLOUD_ACCESS_KEY_ID";
pub const ACCESS_KEY_SECRET_ENV: &str = "ALIBABA_CLOUD_ACCESS_KEY_SECRET";
pub const SECURITY_TOKEN_ENV: &str = "ALIBABA_CLOUD_SECURITY_TOKEN";
pub const CONFIG_ENV: &str = "ACOPS_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Settings {
    #[serde(default = "default_region")]
    pub default_region: String,

    /// Region whose orchestration endpoint receives application/group calls.
    #[serde(default = "default_region")]
    pub management_region: String,

    #[serde(default = "default_region")]
    pub oss_region: String,

    #[serde(default = "default_endpoint_suffix")]
    pub endpoint_suffix: String,

    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
}

fn default_region() -> String {
    "cn-hangzhou".to_string()
}
fn default_endpoint_suffix() -> String {
    "aliyuncs.com".to_string()
}
fn default_http_timeout_secs() -> u64 {
    30
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_region: default_region(),
            management_region: default_region(),
            oss_region: default_region(),
            endpoint_suffix: default_endpoint_suffix(),
            http_timeout_secs: default_http_timeout_secs(),
        }
    }
}

impl Settings {
    /// Explicit path, then `$ACOPS_CONFIG`, then `~/.acops/config.yaml`.
    /// A missing file means defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(p) = explicit {
            return load_yaml(p);
        }
        if let Ok(p) = std::env::var(CONFIG_ENV) {
            if !p.trim().is_empty() {
                return load_yaml(Path::new(&p));
            }
        }
        match default_config_path() {
            Some(p) if p.is_file() => load_yaml(&p),
            _ => Ok(Self::default()),
        }
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".acops").join("config.yaml"))
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key_id: String,
    pub access_key_secret: String,
    pub security_token: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("access_key_secret", &"***")
            .field("security_token", &self.security_token.as_ref().map(|_| "***"))
            .finish()
    }
}

impl Credentials {
    pub fn from_env() -> CloudResult<Self> {
        let id = non_empty_env(ACCESS_KEY_ID_ENV)
            .ok_or_else(|| CloudError::Credentials(format!("{ACCESS_KEY_ID_ENV} is not set")))?;
        let secret = non_empty_env(ACCESS_KEY_SECRET_ENV).ok_or_else(|| {
            CloudError::Credentials(format!("{ACCESS_KEY_SECRET_ENV} is not set"))
        })?;
        Ok(Self {
            access_key_id: id,
            access_key_secret: secret,
            security_token: non_empty_env(SECURITY_TOKEN_ENV),
        })
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

pub fn load_yaml<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let data = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_yaml::from_str(&data).with_context(|| format!("parse yaml {}", path.display()))
}
