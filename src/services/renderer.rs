//! Renderer (spec.md §4.2).
//!
//! Pure, stateless wrapper around the external encoder that produces
//! self-contained MPEG-TS fragments from clip selections. Holds no state
//! between calls.
use crate::config::VideoConfig;
use crate::error::{PipelineError, Result};
use crate::models::ClipSelection;
use crate::services::effects::{build_filter_string, effect_names, Effect};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{error, info};

const CLIP_RENDER_TIMEOUT: Duration = Duration::from_secs(300);
const OVERLAY_RENDER_TIMEOUT: Duration = Duration::from_secs(600);

pub struct Renderer {
    video: VideoConfig,
    bug_path: Option<PathBuf>,
}

impl Renderer {
    pub fn new(video: VideoConfig, bug_path: Option<PathBuf>) -> Self {
        Self { video, bug_path }
    }

    fn scale_filter(&self) -> String {
        format!(
            "scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2,setsar=1",
            w = self.video.width,
            h = self.video.height,
        )
    }

    fn active_bug(&self) -> Option<&Path> {
        self.bug_path.as_deref().filter(|p| p.exists())
    }

    /// Render a single clip with its effect chain and optional logo
    /// overlay to a video-only MPEG-TS fragment (spec.md §4.2).
    pub async fn render_clip(
        &self,
        clip: &ClipSelection,
        effects: &[Effect],
        speed: f64,
        out_path: &Path,
        pts_offset: f64,
    ) -> Result<()> {
        let scale = self.scale_filter();
        let effect_str = build_filter_string(effects);
        let bug = self.active_bug();

        let mut cmd = Command::new("ffmpeg");
        cmd.args(["-y", "-hide_banner", "-loglevel", "warning"]);
        if clip.loop_if_shorter {
            cmd.args(["-stream_loop", "-1"]);
        }
        cmd.args([
            "-ss",
            &format!("{:.2}", clip.seek_start),
            "-t",
            &format!("{:.2}", clip.use_duration),
            "-i",
        ]);
        cmd.arg(&clip.path);

        let mut vf = format!("{scale},setpts={speed}*PTS,fps={fps}", fps = self.video.fps);
        if !effect_str.is_empty() {
            vf.push(',');
            vf.push_str(&effect_str);
        }

        if let Some(bug) = bug {
            cmd.arg("-i").arg(bug);
            let filter_complex = format!(
                "[0:v]{vf}[vid];[1:v]colorchannelmixer=aa=0.5[bug];[vid][bug]overlay=W-w-45:H-h-40[out]"
            );
            cmd.args(["-filter_complex", &filter_complex, "-map", "[out]"]);
        } else {
            cmd.args(["-vf", &vf]);
        }

        self.apply_output_args(&mut cmd, out_path, pts_offset, true);

        info!(
            clip = %clip.path.display(),
            duration = clip.use_duration,
            speed,
            fx = ?effect_names(effects),
            "rendering clip"
        );
        run_render(cmd, out_path, CLIP_RENDER_TIMEOUT).await
    }

    /// Render two clips composited via a blend mode: the base clip carries
    /// the effect chain, the top clip stays unfiltered, and the optional
    /// logo overlay is applied to the blended result (spec.md §4.2).
    #[allow(clippy::too_many_arguments)]
    pub async fn render_overlay(
        &self,
        base: &ClipSelection,
        top: &ClipSelection,
        effects: &[Effect],
        blend_mode: &str,
        speed: f64,
        out_path: &Path,
        pts_offset: f64,
    ) -> Result<()> {
        let scale = self.scale_filter();
        let effect_str = build_filter_string(effects);
        let bug = self.active_bug();

        let mut base_filters = format!("{scale},setpts={speed}*PTS,fps={fps}", fps = self.video.fps);
        if !effect_str.is_empty() {
            base_filters.push(',');
            base_filters.push_str(&effect_str);
        }
        let top_filters = format!("{scale},setpts={speed}*PTS,fps={fps}", fps = self.video.fps);

        let filter_complex = if let Some(_bug) = bug {
            format!(
                "[0:v]{base_filters}[base];[1:v]{top_filters}[top];[base][top]blend=all_mode={blend_mode}[blended];[2:v]colorchannelmixer=aa=0.5[bug];[blended][bug]overlay=W-w-45:H-h-40[out]"
            )
        } else {
            format!(
                "[0:v]{base_filters}[base];[1:v]{top_filters}[top];[base][top]blend=all_mode={blend_mode}[out]"
            )
        };

        let mut cmd = Command::new("ffmpeg");
        cmd.args(["-y", "-hide_banner", "-loglevel", "warning"]);
        cmd.args([
            "-ss",
            &format!("{:.2}", base.seek_start),
            "-t",
            &format!("{:.2}", base.use_duration),
            "-i",
        ])
        .arg(&base.path);
        cmd.args([
            "-ss",
            &format!("{:.2}", top.seek_start),
            "-t",
            &format!("{:.2}", base.use_duration),
            "-i",
        ])
        .arg(&top.path);
        if let Some(bug) = bug {
            cmd.arg("-i").arg(bug);
        }
        cmd.args(["-filter_complex", &filter_complex, "-map", "[out]"]);

        self.apply_output_args(&mut cmd, out_path, pts_offset, false);

        info!(
            base = %base.path.display(),
            top = %top.path.display(),
            blend_mode,
            speed,
            "rendering overlay"
        );
        run_render(cmd, out_path, OVERLAY_RENDER_TIMEOUT).await
    }

    /// Render a bumper: scale + fps only, no effects, no logo (spec.md
    /// §4.2).
    pub async fn render_bumper(&self, bumper_path: &Path, out_path: &Path, pts_offset: f64) -> Result<()> {
        let scale = self.scale_filter();
        let mut cmd = Command::new("ffmpeg");
        cmd.args(["-y", "-hide_banner", "-loglevel", "warning", "-i"]).arg(bumper_path);
        cmd.args(["-vf", &format!("{scale},fps={}", self.video.fps)]);
        self.apply_output_args(&mut cmd, out_path, pts_offset, true);

        info!(bumper = %bumper_path.display(), "rendering bumper");
        run_render(cmd, out_path, CLIP_RENDER_TIMEOUT).await
    }

    fn apply_output_args(&self, cmd: &mut Command, out_path: &Path, pts_offset: f64, with_gop: bool) {
        cmd.arg("-an");
        cmd.args(["-c:v", &self.video.codec]);
        cmd.args(["-preset", &self.video.preset]);
        cmd.args(["-b:v", &self.video.bitrate]);
        if with_gop {
            cmd.args(["-g", &(self.video.fps * 4).to_string()]);
        }
        cmd.args(["-pix_fmt", &self.video.pix_fmt]);
        cmd.args(["-output_ts_offset", &format!("{:.3}", pts_offset)]);
        cmd.args(["-f", "mpegts"]);
        cmd.arg(out_path);
        cmd.stdout(std::process::Stdio::null());
        cmd.stderr(std::process::Stdio::piped());
    }
}

async fn run_render(mut cmd: Command, out_path: &Path, render_timeout: Duration) -> Result<()> {
    // wait_with_output() below takes ownership of the Child, so a timeout
    // drops the future (and the Child) without an explicit kill; kill_on_drop
    // makes that drop reap the ffmpeg process instead of orphaning it.
    cmd.kill_on_drop(true);
    let child = cmd.spawn().map_err(PipelineError::Io)?;
    let output = match timeout(render_timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            cleanup_partial(out_path).await;
            return Err(PipelineError::Io(e));
        }
        Err(_) => {
            cleanup_partial(out_path).await;
            return Err(PipelineError::Render(format!(
                "render timed out after {:?}",
                render_timeout
            )));
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let tail: String = stderr.chars().rev().take(500).collect::<String>().chars().rev().collect();
        error!(rc = ?output.status.code(), stderr = %tail, "render failed");
        cleanup_partial(out_path).await;
        return Err(PipelineError::Render(format!(
            "ffmpeg exited with {:?}",
            output.status.code()
        )));
    }

    Ok(())
}

async fn cleanup_partial(path: &Path) {
    // best effort: output may not exist if ffmpeg failed before writing
    let _ = tokio::fs::remove_file(path).await;
}
