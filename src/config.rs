use crate::error::{PipelineError, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Structured on-disk configuration document (spec.md §6).
///
/// Loaded once at startup and treated as read-only for the lifetime of the
/// process (spec.md §3, Configuration lifecycle).
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub music_dir: PathBuf,
    pub clips_dir: PathBuf,
    pub bumpers_dir: PathBuf,
    pub hls_dir: PathBuf,
    pub bug_path: Option<PathBuf>,

    pub video: VideoConfig,
    pub audio: AudioConfig,
    pub hls: HlsConfig,
    pub mixing: MixingConfig,
    pub bumpers: BumperConfig,

    pub dayparts: Vec<DaypartConfig>,

    #[serde(default)]
    pub clips_dayparts: HashMap<String, PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VideoConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub codec: String,
    pub preset: String,
    pub bitrate: String,
    pub pix_fmt: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AudioConfig {
    pub codec: String,
    pub bitrate: String,
    pub sample_rate: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HlsConfig {
    pub segment_duration: u32,
    pub list_size: u32,
    pub flags: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MixingConfig {
    pub clip_min_duration: f64,
    pub clip_max_duration: f64,
    pub effects_per_clip_min: u32,
    pub effects_per_clip_max: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BumperConfig {
    pub min_interval_minutes: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DaypartConfig {
    pub name: String,
    pub start_hour: u32,
    pub end_hour: u32,
    pub subdir: String,
}

impl Config {
    /// Load and validate the configuration document at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(PipelineError::Io)?;
        let config: Config =
            toml::from_str(&raw).map_err(|source| PipelineError::ConfigParse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.dayparts.is_empty() {
            return Err(PipelineError::Config(
                "at least one daypart must be configured".into(),
            ));
        }
        for dp in &self.dayparts {
            if dp.start_hour >= 24 || dp.end_hour >= 24 {
                return Err(PipelineError::Config(format!(
                    "daypart '{}' has an hour outside 0..24",
                    dp.name
                )));
            }
        }
        if self.mixing.clip_min_duration > self.mixing.clip_max_duration {
            return Err(PipelineError::Config(
                "mixing.clip_min_duration must be <= clip_max_duration".into(),
            ));
        }
        if self.mixing.effects_per_clip_min > self.mixing.effects_per_clip_max {
            return Err(PipelineError::Config(
                "mixing.effects_per_clip_min must be <= effects_per_clip_max".into(),
            ));
        }
        Ok(())
    }
}
