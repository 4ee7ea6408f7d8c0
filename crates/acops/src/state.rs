use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Contents of `.code_deploy/application.json`.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ApplicationFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_deployment: Option<LastDeployment>,
}

/// Snapshot of the most recent successful deploy. Overwritten each time.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct LastDeployment {
    pub application_name: String,
    pub application_group_name: String,
    pub deploy_region_id: String,
    pub port: u16,
    #[serde(default)]
    pub instance_ids: Vec<String>,
    /// Local time, `YYYY-MM-DD HH:MM:SS`.
    pub deploy_time: String,
}

pub fn now_timestamp() -> String {
    let fmt = time::macros::format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    let now = time::OffsetDateTime::now_local().unwrap_or_else(|_| time::OffsetDateTime::now_utc());
    now.format(&fmt).unwrap_or_default()
}

pub fn load_json<T: for<'de> Deserialize<'de> + Default>(path: &Path) -> Result<T> {
    if !path.exists() {
        return Ok(T::default());
    }
    let data = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("parse json {}", path.display()))
}

pub fn save_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create dir {}", parent.display()))?;
    }
    let s = serde_json::to_string_pretty(value).context("serialize json")?;
    fs::write(path, s).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_roundtrip_application_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".code_deploy").join("application.json");

        let st = ApplicationFile {
            last_deployment: Some(LastDeployment {
                application_name: "shop".to_string(),
                application_group_name: "prod".to_string(),
                deploy_region_id: "cn-hangzhou".to_string(),
                port: 8080,
                instance_ids: vec!["i-1".to_string()],
                deploy_time: "2026-01-02 03:04:05".to_string(),
            }),
        };

        save_json(&path, &st).unwrap();
        let loaded: ApplicationFile = load_json(&path).unwrap();
        assert_eq!(loaded, st);

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["last_deployment"]["port"], 8080);
    }

    #[test]
    fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let loaded: ApplicationFile = load_json(&dir.path().join("nope.json")).unwrap();
        assert!(loaded.last_deployment.is_none());
    }

    #[test]
    fn timestamp_shape() {
        let ts = now_timestamp();
        assert_eq!(ts.len(), 19);
        assert_eq!(&ts[4..5], "-");
        assert_eq!(&ts[10..11], " ");
        assert_eq!(&ts[13..14], ":");
    }
}
