use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub vsync: bool,
    pub fullscreen: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Shrike Inspector".to_string(),
            width: 1280,
            height: 720,
            vsync: true,
            fullscreen: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PreviewConfig {
    pub asset: Option<PathBuf>,
    pub environment_dir: Option<PathBuf>,
    pub auto_reload: bool,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self { asset: None, environment_dir: None, auto_reload: true }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub manifest: PathBuf,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self { manifest: PathBuf::from("tools.json") }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    pub retry_interval_ms: u64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self { retry_interval_ms: 250 }
    }
}

/// Top-level configuration. Every section may be omitted from the JSON file;
/// sections and fields fall back to their defaults independently.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub window: WindowConfig,
    pub preview: PreviewConfig,
    pub tools: ToolsConfig,
    pub extraction: ExtractionConfig,
}

#[derive(Debug, Clone, Default)]
pub struct AppConfigOverrides {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub vsync: Option<bool>,
    pub asset: Option<PathBuf>,
    pub tools_manifest: Option<PathBuf>,
}

impl AppConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text =
            fs::read_to_string(path).with_context(|| format!("reading config {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(path).unwrap_or_else(|err| {
            eprintln!("Config unusable ({err:#}); starting with defaults.");
            Self::default()
        })
    }

    pub fn apply_overrides(&mut self, overrides: &AppConfigOverrides) {
        let AppConfigOverrides { width, height, vsync, asset, tools_manifest } = overrides;
        if let Some(width) = width {
            self.window.width = *width;
        }
        if let Some(height) = height {
            self.window.height = *height;
        }
        if let Some(vsync) = vsync {
            self.window.vsync = *vsync;
        }
        if let Some(asset) = asset {
            self.preview.asset = Some(asset.clone());
        }
        if let Some(manifest) = tools_manifest {
            self.tools.manifest = manifest.clone();
        }
    }
}

impl AppConfigOverrides {
    pub fn is_empty(&self) -> bool {
        self.applied_fields().is_empty()
    }

    pub fn applied_fields(&self) -> Vec<&'static str> {
        [
            ("width", self.width.is_some()),
            ("height", self.height.is_some()),
            ("vsync", self.vsync.is_some()),
            ("asset", self.asset.is_some()),
            ("tools", self.tools_manifest.is_some()),
        ]
        .into_iter()
        .filter_map(|(name, set)| set.then_some(name))
        .collect()
    }
}
