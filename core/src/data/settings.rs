use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::convergence::retry::RetryPolicy;
use crate::derive::CloudEnvironment;
use crate::errors::SettingsError;
use crate::types::config::{PollSettings, Settings};
use crate::types::params::{RawParameters, Target};

pub const CONFIG_ENV: &str = "FLEXPROV_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "flexprov.yaml";

/// Environment keys that override settings, in the order they are applied.
pub const OVERRIDE_KEYS: &[&str] = &[
    "RESOURCE_BASE_NAME",
    "AZURE_LOCATION",
    "FUNCTION_TIER",
    "FUNCTION_INSTANCE_MEMORY_MB",
    "FUNCTION_MAX_INSTANCES",
    "AZURE_SUBSCRIPTION_ID",
    "AZURE_RESOURCE_GROUP_NAME",
    "AZURE_CLOUD",
];

/// Returns sensible defaults for all settings fields.
pub fn default_settings() -> Settings {
    Settings {
        parameters: RawParameters {
            tier: "FC1".into(),
            instance_memory_mb: "2048".into(),
            max_instance_count: "40".into(),
            ..RawParameters::default()
        },
        target: Target::default(),
        cloud: CloudEnvironment::AzureCloud,
        retry: RetryPolicy::default(),
        poll: PollSettings::default(),
        az_cli: "az".into(),
        state_file: PathBuf::from(".flexprov/state.json"),
        env_file: PathBuf::from(".env"),
    }
}

/// `--config` if given, else `$FLEXPROV_CONFIG`, else `./flexprov.yaml`.
pub fn resolve_config_path(flag: Option<&Path>, env_value: Option<&str>) -> PathBuf {
    if let Some(p) = flag {
        return p.to_path_buf();
    }
    match env_value {
        Some(v) if !v.trim().is_empty() => PathBuf::from(v.trim()),
        _ => PathBuf::from(DEFAULT_CONFIG_FILE),
    }
}

/// Load `Settings` from a YAML file. Absent keys take their defaults.
pub fn load(path: &Path) -> Result<Settings, SettingsError> {
    let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse(path, &content)
}

/// Like `load`, but a missing file yields the defaults.
pub fn load_or_default(path: &Path) -> Result<Settings, SettingsError> {
    match std::fs::read_to_string(path) {
        Ok(content) => parse(path, &content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(default_settings()),
        Err(source) => Err(SettingsError::Read {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn parse(path: &Path, content: &str) -> Result<Settings, SettingsError> {
    if content.trim().is_empty() {
        return Ok(default_settings());
    }
    serde_yaml::from_str(content).map_err(|source| SettingsError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Save `Settings` as YAML.
pub fn save(path: &Path, settings: &Settings) -> Result<(), SettingsError> {
    let content = serde_yaml::to_string(settings)?;
    std::fs::write(path, content).map_err(|source| SettingsError::Write {
        path: path.to_path_buf(),
        source,
    })
}

/// Overlay values from an environment map (env file or process env). Empty
/// values are ignored so a blank line in an env file cannot erase a setting.
pub fn apply_overrides(
    settings: &mut Settings,
    vars: &HashMap<String, String>,
) -> Result<usize, SettingsError> {
    let mut applied = 0;
    for key in OVERRIDE_KEYS {
        let value = match vars.get(*key).map(|v| v.trim()) {
            Some(v) if !v.is_empty() => v.to_string(),
            _ => continue,
        };
        match *key {
            "RESOURCE_BASE_NAME" => settings.parameters.base_name = value,
            "AZURE_LOCATION" => settings.parameters.location = value,
            "FUNCTION_TIER" => settings.parameters.tier = value,
            "FUNCTION_INSTANCE_MEMORY_MB" => settings.parameters.instance_memory_mb = value,
            "FUNCTION_MAX_INSTANCES" => settings.parameters.max_instance_count = value,
            "AZURE_SUBSCRIPTION_ID" => settings.target.subscription_id = value,
            "AZURE_RESOURCE_GROUP_NAME" => settings.target.resource_group = value,
            "AZURE_CLOUD" => {
                settings.cloud = value
                    .parse::<CloudEnvironment>()
                    .map_err(SettingsError::UnknownCloud)?;
            }
            _ => continue,
        }
        applied += 1;
    }
    Ok(applied)
}
