use std::{
    env, fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    cache::{DEFAULT_CHUNK_SHIFT, MAX_CHUNK_SHIFT, MIN_CHUNK_SHIFT},
    surface::FrameSize,
    timeline::{DEFAULT_OPACITY_EPSILON, TimelineOptions},
};

pub const CONFIG_FILE_NAME: &str = "cutline.config.toml";
pub const CONFIG_PATH_ENV: &str = "CUTLINE_CONFIG_PATH";
pub const DEFAULT_LOG_FILTER: &str = "info,cutline_core=trace";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub cache: CacheConfig,
    pub render: RenderConfig,
    pub diagnostics: DiagnosticsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CacheConfig {
    pub chunk_shift: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RenderConfig {
    pub opacity_epsilon: f64,
    pub frame_width: u32,
    pub frame_height: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DiagnosticsConfig {
    pub log_filter: String,
    pub file_prefix: String,
    pub log_dir: PathBuf,
    /// Mirror log lines to stdout next to the JSON file.
    pub stdout: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            chunk_shift: DEFAULT_CHUNK_SHIFT,
        }
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        let size = FrameSize::default();
        Self {
            opacity_epsilon: DEFAULT_OPACITY_EPSILON,
            frame_width: size.width,
            frame_height: size.height,
        }
    }
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            file_prefix: "cutline".to_string(),
            log_dir: PathBuf::from("logs"),
            stdout: true,
        }
    }
}

impl EngineConfig {
    /// Loads the discovered config file, or the defaults when there is none.
    /// A file that exists but does not parse is still an error.
    pub fn load_or_default() -> Result<Self> {
        match discover_config_path() {
            Ok(path) => Self::load_from(&path),
            Err(error) => {
                debug!(%error, "no config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_toml(&content)
            .with_context(|| format!("failed to load config from {}", path.display()))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).context("failed to parse config TOML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let shift = self.cache.chunk_shift;
        if !(MIN_CHUNK_SHIFT..=MAX_CHUNK_SHIFT).contains(&shift) {
            bail!(
                "cache.chunk_shift must be within {MIN_CHUNK_SHIFT}..={MAX_CHUNK_SHIFT}, got {shift}"
            );
        }
        let epsilon = self.render.opacity_epsilon;
        if !(0.0..1.0).contains(&epsilon) {
            bail!("render.opacity_epsilon must be within [0, 1), got {epsilon}");
        }
        if self.render.frame_width == 0 || self.render.frame_height == 0 {
            warn!(
                width = self.render.frame_width,
                height = self.render.frame_height,
                "render frame size has a zero dimension"
            );
        }
        Ok(())
    }

    #[must_use]
    pub const fn timeline_options(&self) -> TimelineOptions {
        TimelineOptions {
            chunk_shift: self.cache.chunk_shift,
            opacity_epsilon: self.render.opacity_epsilon,
        }
    }

    #[must_use]
    pub const fn frame_size(&self) -> FrameSize {
        FrameSize::new(self.render.frame_width, self.render.frame_height)
    }
}

fn discover_config_path() -> Result<PathBuf> {
    if let Some(path) = env::var_os(CONFIG_PATH_ENV) {
        let path = PathBuf::from(path);
        if path.is_file() {
            return Ok(path);
        }
        warn!(path = %path.display(), "{CONFIG_PATH_ENV} does not point at a file");
    }

    let cwd = env::current_dir().context("failed to resolve current directory")?;
    let candidates = [
        cwd.join(CONFIG_FILE_NAME),
        cwd.join("..").join(CONFIG_FILE_NAME),
    ];

    candidates
        .into_iter()
        .find(|path| path.is_file())
        .ok_or_else(|| anyhow::anyhow!("{CONFIG_FILE_NAME} not found"))
}
