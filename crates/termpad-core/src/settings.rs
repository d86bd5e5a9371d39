use crate::ai::RemoteRoute;
use anyhow::{Context as _, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HostSettings {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    #[serde(default)]
    pub plugins: PluginSettings,
    #[serde(default)]
    pub ai: Option<RemoteRoute>,
    #[serde(default)]
    pub keybindings: KeybindingSettings,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PluginSettings {
    #[serde(default)]
    pub enabled: HashMap<String, bool>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct KeybindingSettings {
    #[serde(default)]
    pub store_path: Option<PathBuf>,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            schema_version: default_schema_version(),
            plugins: PluginSettings::default(),
            ai: None,
            keybindings: KeybindingSettings::default(),
        }
    }
}

impl HostSettings {
    pub fn merge_overlay(&self, overlay: &HostSettings) -> HostSettings {
        let mut merged = self.clone();
        merged.schema_version = self.schema_version.max(overlay.schema_version);

        for (plugin_id, enabled) in &overlay.plugins.enabled {
            merged.plugins.enabled.insert(plugin_id.clone(), *enabled);
        }
        if overlay.ai.is_some() {
            merged.ai = overlay.ai.clone();
        }
        if overlay.keybindings.store_path.is_some() {
            merged.keybindings.store_path = overlay.keybindings.store_path.clone();
        }
        merged
    }

    pub fn keybinding_store_path(&self, config_dir: &Path) -> PathBuf {
        self.keybindings
            .store_path
            .clone()
            .unwrap_or_else(|| config_dir.join("keybindings.json"))
    }
}

pub fn settings_path(config_dir: &Path) -> PathBuf {
    config_dir.join("settings.json")
}

pub fn project_settings_path(project_root: &Path) -> PathBuf {
    project_root.join(".termpad").join("settings.json")
}

pub fn load_settings(config_dir: &Path) -> Result<HostSettings> {
    load_settings_from_path(&settings_path(config_dir))
}

pub fn load_project_settings(project_root: &Path) -> Result<Option<HostSettings>> {
    let path = project_settings_path(project_root);
    if !path.exists() {
        return Ok(None);
    }
    let settings = load_settings_from_path(&path)?;
    Ok(Some(settings))
}

pub fn load_effective_settings(
    config_dir: &Path,
    project_root: Option<&Path>,
) -> Result<HostSettings> {
    let user = load_settings(config_dir).unwrap_or_default();
    if let Some(project_root) = project_root {
        if let Some(project) = load_project_settings(project_root)? {
            return Ok(user.merge_overlay(&project));
        }
    }
    Ok(user)
}

pub fn save_settings(config_dir: &Path, settings: &HostSettings) -> Result<()> {
    save_settings_to_path(&settings_path(config_dir), settings)
}

pub fn save_project_settings(project_root: &Path, settings: &HostSettings) -> Result<()> {
    save_settings_to_path(&project_settings_path(project_root), settings)
}

pub fn load_settings_from_path(path: &Path) -> Result<HostSettings> {
    if !path.exists() {
        return Ok(HostSettings::default());
    }

    let raw = fs::read_to_string(path)
        .with_context(|| format!("read settings file: {}", path.display()))?;
    let settings: HostSettings = serde_json::from_str(&raw)
        .with_context(|| format!("parse settings file: {}", path.display()))?;
    Ok(settings)
}

fn save_settings_to_path(path: &Path, settings: &HostSettings) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create config dir: {}", parent.display()))?;
    }

    let json = serde_json::to_string_pretty(settings)?;
    fs::write(path, json).with_context(|| format!("write settings file: {}", path.display()))?;
    Ok(())
}

const fn default_schema_version() -> u32 {
    1
}
