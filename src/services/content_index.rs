//! Content Index (spec.md §4.1).
//!
//! Scans on-disk directories, probes durations via `ffprobe`, and returns
//! `(path, duration)` tables for clips, bumpers, and audio tracks,
//! partitioned by daypart.
use crate::config::DaypartConfig;
use crate::models::MediaEntry;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, warn};

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "avi", "mov", "webm", "flv", "ts", "m4v"];
const AUDIO_EXTENSIONS: &[&str] = &["mp3", "flac", "ogg", "m4a", "wav", "aac", "opus", "wma"];

/// Cached clip set keyed by the daypart name it was scanned for (spec.md
/// §9: owned explicitly by the Content Index, never hidden module state).
struct ClipCache {
    daypart: Option<String>,
    files: Vec<MediaEntry>,
}

pub struct ContentIndex {
    music_dir: PathBuf,
    clips_dir: PathBuf,
    bumpers_dir: PathBuf,
    dayparts: Vec<DaypartConfig>,
    clips_dayparts: HashMap<String, PathBuf>,
    clip_cache: Option<ClipCache>,
}

impl ContentIndex {
    pub fn new(
        music_dir: PathBuf,
        clips_dir: PathBuf,
        bumpers_dir: PathBuf,
        dayparts: Vec<DaypartConfig>,
        clips_dayparts: HashMap<String, PathBuf>,
    ) -> Self {
        Self {
            music_dir,
            clips_dir,
            bumpers_dir,
            dayparts,
            clips_dayparts,
            clip_cache: None,
        }
    }

    /// Recursively scan `dir` for files with one of `extensions`, probing
    /// each file's duration and discarding unreadable or non-positive
    /// entries. Results are sorted by path for determinism (spec.md §4.1).
    pub async fn scan_media_files(dir: &Path, extensions: &[&str]) -> Vec<MediaEntry> {
        if !dir.exists() {
            warn!("directory does not exist: {:?}", dir);
            return Vec::new();
        }

        let mut paths = Vec::new();
        collect_files(dir, &mut paths);
        paths.sort();

        let mut entries = Vec::with_capacity(paths.len());
        for path in paths {
            let ext_matches = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| extensions.iter().any(|allowed| allowed.eq_ignore_ascii_case(e)))
                .unwrap_or(false);
            if !ext_matches {
                continue;
            }
            match probe_duration(&path).await {
                Some(duration) if duration > 0.0 => {
                    debug!("found: {:?} ({:.1}s)", path, duration);
                    entries.push(MediaEntry::new(path, duration));
                }
                _ => {
                    warn!("could not probe duration of {:?}, skipping", path);
                }
            }
        }
        entries
    }

    /// Return the daypart whose hour interval contains `hour`, handling
    /// midnight wrap-around (spec.md §4.1: `start >= end` means the
    /// interval is `[start, 24) U [0, end)`).
    pub fn daypart_for_hour(&self, hour: u32) -> Option<&DaypartConfig> {
        self.dayparts.iter().find(|dp| {
            if dp.start_hour < dp.end_hour {
                hour >= dp.start_hour && hour < dp.end_hour
            } else {
                hour >= dp.start_hour || hour < dp.end_hour
            }
        })
    }

    /// Scan the current daypart's audio library, falling back to the root
    /// music directory (reported as daypart `"all"`) if the subdir is
    /// missing or empty (spec.md §4.1).
    pub async fn music_for_daypart(&self, hour: u32) -> (Vec<MediaEntry>, String) {
        if let Some(dp) = self.daypart_for_hour(hour) {
            let subdir = self.music_dir.join(&dp.subdir);
            let files = Self::scan_media_files(&subdir, AUDIO_EXTENSIONS).await;
            if !files.is_empty() {
                return (files, dp.name.clone());
            }
            warn!("daypart '{}' music subdir empty, falling back to all music", dp.name);
        }
        let files = Self::scan_media_files(&self.music_dir, AUDIO_EXTENSIONS).await;
        (files, "all".to_string())
    }

    /// Scan bumpers once; bumpers are not daypart-partitioned (spec.md §4).
    pub async fn scan_bumpers(&self) -> Vec<MediaEntry> {
        Self::scan_media_files(&self.bumpers_dir, VIDEO_EXTENSIONS).await
    }

    /// Scan the default (non-daypart) clip library.
    pub async fn scan_default_clips(&self) -> Vec<MediaEntry> {
        Self::scan_media_files(&self.clips_dir, VIDEO_EXTENSIONS).await
    }

    /// Return the clip set for the current hour, consulting the
    /// `clips_dayparts` override map and caching the scan result keyed by
    /// daypart name so repeated calls each main-loop iteration do not
    /// re-probe every clip (spec.md §4.1).
    pub async fn clips_for_daypart(
        &mut self,
        hour: u32,
        default_clips: &[MediaEntry],
    ) -> (Vec<MediaEntry>, String) {
        let dp = self.daypart_for_hour(hour);
        let dp_name = dp.map(|d| d.name.clone());

        if let Some(cache) = &self.clip_cache {
            if cache.daypart == dp_name {
                return (cache.files.clone(), dp_name.unwrap_or_else(|| "default".to_string()));
            }
        }

        if let Some(dp) = dp {
            if let Some(override_dir) = self.clips_dayparts.get(&dp.name) {
                let files = Self::scan_media_files(override_dir, VIDEO_EXTENSIONS).await;
                if !files.is_empty() {
                    self.clip_cache = Some(ClipCache {
                        daypart: dp_name.clone(),
                        files: files.clone(),
                    });
                    return (files, dp.name.clone());
                }
                warn!("clips daypart '{}' override dir empty, falling back to default", dp.name);
            }
        }

        self.clip_cache = Some(ClipCache {
            daypart: dp_name,
            files: default_clips.to_vec(),
        });
        (default_clips.to_vec(), "default".to_string())
    }

    /// Explicitly invalidate the clip cache. The Conductor calls this at
    /// daypart transitions it detects out-of-band (e.g. after recovery),
    /// per spec.md §9's preference for explicit refresh over hidden state.
    pub fn refresh(&mut self) {
        self.clip_cache = None;
    }
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) => {
            warn!("failed to read directory {:?}: {}", dir, e);
            return;
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_files(&path, out);
        } else if path.is_file() {
            out.push(path);
        }
    }
}

/// Probe a media file's duration in seconds using `ffprobe` (spec.md §4.1).
async fn probe_duration(path: &Path) -> Option<f64> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
        ])
        .arg(path)
        .output()
        .await
        .ok()?;

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).ok()?;
    json.get("format")?
        .get("duration")?
        .as_str()?
        .parse::<f64>()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DaypartConfig;

    fn dp(name: &str, start: u32, end: u32) -> DaypartConfig {
        DaypartConfig {
            name: name.to_string(),
            start_hour: start,
            end_hour: end,
            subdir: name.to_string(),
        }
    }

    #[test]
    fn daypart_routing_handles_wraparound() {
        let index = ContentIndex::new(
            PathBuf::new(),
            PathBuf::new(),
            PathBuf::new(),
            vec![dp("daytime", 10, 18), dp("overnight", 18, 10)],
            HashMap::new(),
        );
        assert_eq!(index.daypart_for_hour(12).unwrap().name, "daytime");
        assert_eq!(index.daypart_for_hour(23).unwrap().name, "overnight");
        assert_eq!(index.daypart_for_hour(3).unwrap().name, "overnight");
    }

    #[test]
    fn daypart_routing_returns_none_outside_any_interval() {
        let index = ContentIndex::new(
            PathBuf::new(),
            PathBuf::new(),
            PathBuf::new(),
            vec![dp("daytime", 10, 18)],
            HashMap::new(),
        );
        assert!(index.daypart_for_hour(20).is_none());
    }
}
