//! Conductor (spec.md §4.5, §4.6).
//!
//! Owns the main loop: daypart-aware clip/bumper selection, pre-buffer to
//! live transition, back-pressure against the Feeder's queue, the PTS
//! accounting that keeps the encoder's MPEG-TS stream continuous, and the
//! watchdog/recovery state machine that tears down and restarts a stuck
//! encoder.
use crate::config::Config;
use crate::error::{PipelineError, Result};
use crate::models::{ClipPlan, Fragment, MediaEntry, Mode, PipelineState};
use crate::services::content_index::ContentIndex;
use crate::services::effects::{self, Effect};
use crate::services::feeder::{EncoderSink, FeedItem, Feeder};
use crate::services::music_worker::MusicWorker;
use crate::services::renderer::Renderer;
use chrono::Timelike;
use rand::seq::SliceRandom;
use rand::Rng;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncWrite;
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{error, info, warn};

const WATCHDOG_TIMEOUT: Duration = Duration::from_secs(90);
const MIN_FREE_BYTES: u64 = 1024 * 1024 * 1024;
const MAX_STAGING_FILES: usize = 30;
const DISK_CHECK_INTERVAL: Duration = Duration::from_secs(30);
const PREBUFFER_SIZE: usize = 4;
const BROADCAST_START_HOUR: u32 = 10;
const BROADCAST_END_HOUR: u32 = 2;
const FEED_QUEUE_CAPACITY: usize = 20;

struct StreamerHandle {
    child: Child,
    stdin: EncoderSink,
}

pub struct Conductor {
    config: Config,
    renderer: Renderer,
    content_index: Arc<RwLock<ContentIndex>>,
    clip_files: Vec<MediaEntry>,
    bumper_files: Vec<MediaEntry>,
    staging_dir: PathBuf,
    audio_fifo_path: PathBuf,
    state: PipelineState,
    streamer: Option<StreamerHandle>,
    feed_tx: Option<mpsc::Sender<FeedItem>>,
    music_stop: Option<watch::Sender<bool>>,
    music_handle: Option<JoinHandle<()>>,
}

impl Conductor {
    pub async fn new(config: Config, staging_dir: PathBuf, audio_fifo_path: PathBuf) -> Result<Self> {
        let index = ContentIndex::new(
            config.music_dir.clone(),
            config.clips_dir.clone(),
            config.bumpers_dir.clone(),
            config.dayparts.clone(),
            config.clips_dayparts.clone(),
        );

        info!("scanning video clips...");
        let clip_files = index.scan_default_clips().await;
        if clip_files.is_empty() {
            return Err(PipelineError::NoClips(config.clips_dir.clone()));
        }
        info!(count = clip_files.len(), "found video clips");

        info!("scanning bumpers...");
        let bumper_files = index.scan_bumpers().await;
        if bumper_files.is_empty() {
            warn!("no bumpers found — bumper insertion disabled");
        } else {
            info!(count = bumper_files.len(), "found bumpers");
        }

        let renderer = Renderer::new(config.video.clone(), config.bug_path.clone());

        Ok(Self {
            renderer,
            content_index: Arc::new(RwLock::new(index)),
            clip_files,
            bumper_files,
            staging_dir,
            audio_fifo_path,
            state: PipelineState::new(),
            streamer: None,
            feed_tx: None,
            music_stop: None,
            music_handle: None,
            config,
        })
    }

    /// Prepare the on-disk layout: HLS output dir, staging dir, and a
    /// fresh audio FIFO, discarding anything left over from a previous run
    /// (spec.md §4.5).
    pub async fn prepare(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.config.hls_dir).await?;
        clean_glob(&self.config.hls_dir, "ts").await;
        clean_glob(&self.config.hls_dir, "m3u8").await;
        for leftover in ["video", "audio"] {
            let path = self.config.hls_dir.join(leftover);
            if path.is_dir() {
                let _ = tokio::fs::remove_dir_all(&path).await;
            }
        }
        tokio::fs::create_dir_all(&self.staging_dir).await?;
        recreate_fifo(&self.audio_fifo_path)?;
        Ok(())
    }

    /// Run the main loop until `shutdown` is signalled.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        loop {
            if *shutdown.borrow() {
                break;
            }

            if !is_on_air() {
                info!("sign off — stopping pipeline");
                self.sign_off().await;
                tokio::select! {
                    _ = wait_for_broadcast() => {}
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                }
                info!("sign on — resuming broadcast");
                self.state.mode = Mode::Prebuffer;
                continue;
            }

            if self.streamer.is_some() && self.state.heartbeat.age_secs() > WATCHDOG_TIMEOUT.as_secs_f64() {
                self.recover_streamer().await;
                continue;
            }

            self.wait_for_disk_space().await;
            self.throttle_for_staging_backlog().await;

            if let Err(e) = self.maybe_render_bumper().await {
                warn!("bumper render failed: {e}");
            }

            if let Err(e) = self.render_and_queue_clip().await {
                error!("unhandled error in main loop iteration, attempting recovery: {e}");
                self.recover_streamer().await;
            }
        }

        self.shutdown().await;
        Ok(())
    }

    async fn sign_off(&mut self) {
        self.state.mode = Mode::OffAir;
        self.stop_music().await;
        self.feed_tx = None;
        if let Some(mut handle) = self.streamer.take() {
            let _ = handle.child.start_kill();
            let _ = tokio::time::timeout(Duration::from_secs(10), handle.child.wait()).await;
        }
        self.state.cumulative_ts = 0.0;
        if let Err(e) = recreate_fifo(&self.audio_fifo_path) {
            error!("failed to recreate audio FIFO for next broadcast: {e}");
        }
        self.content_index.write().await.refresh();
    }

    async fn maybe_render_bumper(&mut self) -> Result<()> {
        if self.bumper_files.is_empty() {
            return Ok(());
        }
        let Some(last) = self.state.last_bumper_time else {
            self.state.last_bumper_time = Some(Instant::now());
            return Ok(());
        };
        let interval = Duration::from_secs_f64(self.config.bumpers.min_interval_minutes * 60.0);
        if !bumper_interval_elapsed(last, interval) {
            return Ok(());
        }

        let bumper = self
            .bumper_files
            .choose(&mut rand::thread_rng())
            .expect("bumper_files checked non-empty above")
            .clone();
        let seq = self.state.next_sequence();
        let ts_path = self.staging_dir.join(format!("clip_{seq:06}.ts"));
        let pts_offset = self.state.cumulative_ts;
        let plan = ClipPlan::Bumper {
            path: bumper.path.clone(),
            pts_offset,
        };

        self.render_plan(&plan, &ts_path).await?;
        self.state.cumulative_ts += bumper.duration;
        self.state.last_bumper_time = Some(Instant::now());
        self.queue_clip(ts_path, pts_offset, bumper.duration).await;
        Ok(())
    }

    async fn render_plan(&self, plan: &ClipPlan, out_path: &Path) -> Result<()> {
        info!(pts_offset = plan.pts_offset(), out = %out_path.display(), "rendering fragment");
        match plan {
            ClipPlan::Bumper { path, pts_offset } => {
                self.renderer.render_bumper(path, out_path, *pts_offset).await
            }
            ClipPlan::Single {
                clip,
                effects,
                speed,
                pts_offset,
            } => {
                self.renderer
                    .render_clip(clip, effects, *speed, out_path, *pts_offset)
                    .await
            }
            ClipPlan::Overlay {
                base,
                top,
                effects,
                blend_mode,
                speed,
                pts_offset,
            } => {
                self.renderer
                    .render_overlay(base, top, effects, blend_mode, *speed, out_path, *pts_offset)
                    .await
            }
        }
    }

    async fn render_and_queue_clip(&mut self) -> Result<()> {
        let hour = chrono::Local::now().hour();
        let (active_clips, _clips_daypart) = {
            let mut index = self.content_index.write().await;
            index.clips_for_daypart(hour, &self.clip_files).await
        };
        let daypart_name = {
            let index = self.content_index.read().await;
            index.daypart_for_hour(hour).map(|dp| dp.name.clone())
        };

        let mut rng = rand::thread_rng();
        let speed = effects::pick_speed(&mut rng, daypart_name.as_deref());
        let clip = pick_clip(
            &mut rng,
            &active_clips,
            self.config.mixing.clip_min_duration,
            self.config.mixing.clip_max_duration,
        );
        let output_duration = clip.use_duration * speed;

        let seq = self.state.next_sequence();
        let ts_path = self.staging_dir.join(format!("clip_{seq:06}.ts"));

        let pts_offset = self.state.cumulative_ts;

        if effects::should_overlay(&mut rng, daypart_name.as_deref()) && active_clips.len() >= 2 {
            let top = pick_clip(
                &mut rng,
                &active_clips,
                self.config.mixing.clip_min_duration,
                self.config.mixing.clip_max_duration,
            );
            let blend_mode = effects::pick_blend_mode(&mut rng, daypart_name.as_deref());
            let overlay_effects: Vec<Effect> = effects::pick_overlay_effects(
                &mut rng,
                self.config.mixing.effects_per_clip_min,
                self.config.mixing.effects_per_clip_max,
                daypart_name.as_deref(),
            );
            let plan = ClipPlan::Overlay {
                base: clip,
                top,
                effects: overlay_effects,
                blend_mode,
                speed,
                pts_offset,
            };
            match self.render_plan(&plan, &ts_path).await {
                Ok(()) => {
                    self.state.cumulative_ts += output_duration;
                    self.queue_clip(ts_path, pts_offset, output_duration).await;
                }
                Err(e) => warn!("overlay render failed, skipping: {e}"),
            }
            return Ok(());
        }

        let clip_effects: Vec<Effect> = effects::pick_effects(
            &mut rng,
            self.config.mixing.effects_per_clip_min,
            self.config.mixing.effects_per_clip_max,
            daypart_name.as_deref(),
        );
        let plan = ClipPlan::Single {
            clip,
            effects: clip_effects,
            speed,
            pts_offset,
        };
        match self.render_plan(&plan, &ts_path).await {
            Ok(()) => {
                self.state.cumulative_ts += output_duration;
                self.queue_clip(ts_path, pts_offset, output_duration).await;
            }
            Err(e) => warn!("clip render failed, skipping: {e}"),
        }
        Ok(())
    }

    /// Queue a rendered fragment for delivery, pre-buffering until the
    /// streamer is up (spec.md §4.5, §4.6).
    async fn queue_clip(&mut self, ts_path: PathBuf, pts_offset: f64, duration: f64) {
        if self.streamer.is_none() {
            self.state.prebuffer.push(Fragment {
                staging_path: ts_path,
                pts_offset,
                duration,
            });
            info!(
                count = self.state.prebuffer.len(),
                target = PREBUFFER_SIZE,
                "pre-buffering clip"
            );
            if self.state.prebuffer.len() >= PREBUFFER_SIZE {
                if let Err(e) = self.start_streamer_and_flush().await {
                    error!("failed to start streamer: {e}");
                }
            }
            return;
        }

        let stdin = self.streamer.as_ref().unwrap().stdin.clone();
        let tx = self.feed_tx.clone().expect("feed_tx set whenever streamer is set");
        let item = FeedItem { ts_path, stdin };

        match tokio::time::timeout(WATCHDOG_TIMEOUT, tx.send(item)).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => warn!("feeder channel closed unexpectedly"),
            Err(_) => {
                warn!(
                    "WATCHDOG: queue full for {}s, triggering recovery",
                    WATCHDOG_TIMEOUT.as_secs()
                );
                self.recover_streamer().await;
            }
        }
    }

    async fn start_streamer_and_flush(&mut self) -> Result<()> {
        info!(count = self.state.prebuffer.len(), "pre-buffer full, starting streamer...");
        self.start_music();
        sleep(Duration::from_millis(500)).await;

        let handle = self.start_streamer().await?;
        let stdin = handle.stdin.clone();
        self.streamer = Some(handle);
        self.state.heartbeat.touch();

        let (tx, rx) = mpsc::channel(FEED_QUEUE_CAPACITY);
        let feeder = Feeder::new(self.state.heartbeat.clone());
        tokio::spawn(feeder.run(rx));
        self.feed_tx = Some(tx.clone());

        let prebuffer = std::mem::take(&mut self.state.prebuffer);
        flush_prebuffer(prebuffer, &tx, stdin).await;

        self.state.mode = Mode::Live;
        info!("pre-buffer flushed, streaming live");
        Ok(())
    }

    async fn start_streamer(&self) -> Result<StreamerHandle> {
        let hls_output = self.config.hls_dir.join("index.m3u8");
        let segment_pattern = self.config.hls_dir.join("segment_%05d.ts");

        let mut cmd = Command::new("ffmpeg");
        cmd.args(["-y", "-hide_banner", "-loglevel", "warning"]);
        cmd.args(["-re", "-fflags", "+genpts", "-f", "mpegts", "-i", "pipe:0"]);
        cmd.args([
            "-f",
            "s16le",
            "-ar",
            &self.config.audio.sample_rate.to_string(),
            "-ac",
            "2",
            "-thread_queue_size",
            "4096",
            "-i",
        ])
        .arg(&self.audio_fifo_path);
        cmd.args(["-map", "0:v", "-map", "1:a"]);
        cmd.args(["-c:v", "copy"]);
        cmd.args(["-af", "loudnorm=I=-16:TP=-1.5:LRA=11"]);
        cmd.args([
            "-c:a",
            &self.config.audio.codec,
            "-b:a",
            &self.config.audio.bitrate,
            "-ar",
            &self.config.audio.sample_rate.to_string(),
        ]);
        cmd.args([
            "-f",
            "hls",
            "-hls_time",
            &self.config.hls.segment_duration.to_string(),
            "-hls_list_size",
            &self.config.hls.list_size.to_string(),
            "-hls_flags",
            &self.config.hls.flags,
            "-hls_segment_filename",
        ])
        .arg(&segment_pattern);
        cmd.arg(&hls_output);
        cmd.stdin(Stdio::piped()).stdout(Stdio::null()).stderr(Stdio::null());

        info!("starting HLS streamer (video pipe + audio FIFO -> HLS)");
        let mut child = cmd.spawn().map_err(PipelineError::Io)?;
        let stdin = child.stdin.take().expect("stdin is piped");
        Ok(StreamerHandle {
            child,
            stdin: Arc::new(Mutex::new(Box::new(stdin) as Box<dyn AsyncWrite + Send + Unpin>)),
        })
    }

    fn start_music(&mut self) {
        let (tx, rx) = watch::channel(false);
        let worker = MusicWorker::new(self.content_index.clone(), self.audio_fifo_path.clone());
        self.music_handle = Some(tokio::spawn(worker.run(rx)));
        self.music_stop = Some(tx);
    }

    async fn stop_music(&mut self) {
        if let Some(tx) = self.music_stop.take() {
            let _ = tx.send(true);
        }
        if let Some(handle) = self.music_handle.take() {
            if tokio::time::timeout(Duration::from_secs(10), handle).await.is_err() {
                warn!("music worker did not stop within 10s");
            }
        }
    }

    /// Watchdog recovery: tear down a stuck streamer and reset state so
    /// the main loop re-enters pre-buffer mode (spec.md §4.6).
    async fn recover_streamer(&mut self) {
        warn!(
            "WATCHDOG: no feed in {}s — recovering streamer",
            WATCHDOG_TIMEOUT.as_secs()
        );
        self.state.mode = Mode::Recovering;

        if let Some(mut handle) = self.streamer.take() {
            let _ = handle.child.start_kill();
            if tokio::time::timeout(Duration::from_secs(15), handle.child.wait())
                .await
                .is_err()
            {
                warn!("WATCHDOG: streamer didn't exit after SIGKILL, moving on");
            }
        }

        self.stop_music().await;
        // Dropping the sender ends the old Feeder task once its buffered
        // items drain (or immediately if idle); any fragment already
        // in-flight fails its write against the dead process and is
        // cleaned up by the Feeder itself, the same end state as the
        // original's explicit queue drain.
        self.feed_tx = None;

        sleep(Duration::from_secs(1)).await;
        clean_glob(&self.staging_dir, "ts").await;

        if let Err(e) = recreate_fifo(&self.audio_fifo_path) {
            error!("WATCHDOG: error during recovery: {e}");
        }

        self.content_index.write().await.refresh();
        self.state.reset_for_recovery();
        info!("WATCHDOG: recovery complete, re-entering prebuffer phase");
    }

    async fn wait_for_disk_space(&self) {
        loop {
            let mut low = Vec::new();
            for path in [&self.staging_dir, &self.config.hls_dir] {
                match fs2::available_space(path) {
                    Ok(free) if free < MIN_FREE_BYTES => low.push((path.clone(), free)),
                    Ok(_) => {}
                    Err(e) => warn!("could not check disk usage for {:?}: {e}", path),
                }
            }
            if low.is_empty() {
                return;
            }
            for (path, free) in &low {
                warn!(
                    "low disk space on {:?}: {:.1} MB free (need {:.0} MB) — pausing",
                    path,
                    *free as f64 / (1024.0 * 1024.0),
                    MIN_FREE_BYTES as f64 / (1024.0 * 1024.0),
                );
            }
            sleep(DISK_CHECK_INTERVAL).await;
        }
    }

    async fn throttle_for_staging_backlog(&self) {
        while count_staging_files(&self.staging_dir) >= MAX_STAGING_FILES {
            warn!(
                "staging has {} .ts files (max {}) — waiting for feeder",
                count_staging_files(&self.staging_dir),
                MAX_STAGING_FILES
            );
            sleep(Duration::from_secs(5)).await;
        }
    }

    async fn shutdown(&mut self) {
        info!("shutting down...");
        self.stop_music().await;
        self.feed_tx = None;
        if let Some(mut handle) = self.streamer.take() {
            let _ = handle.child.start_kill();
            let _ = tokio::time::timeout(Duration::from_secs(10), handle.child.wait()).await;
        }
        clean_glob(&self.staging_dir, "ts").await;
        let _ = std::fs::remove_file(&self.audio_fifo_path);
        info!("shutdown complete");
    }
}

/// Hand every pre-buffered fragment to the feeder queue in the order it
/// was captured, bound to the streamer's stdin so delivery order matches
/// capture order (spec.md §4.5: pre-buffer flushes in FIFO order once the
/// streamer comes up).
async fn flush_prebuffer(prebuffer: Vec<Fragment>, tx: &mpsc::Sender<FeedItem>, stdin: EncoderSink) {
    for fragment in prebuffer {
        let item = FeedItem {
            ts_path: fragment.staging_path,
            stdin: stdin.clone(),
        };
        let _ = tx.send(item).await;
    }
}

fn is_on_air() -> bool {
    let hour = chrono::Local::now().hour();
    hour >= BROADCAST_START_HOUR || hour < BROADCAST_END_HOUR
}

async fn wait_for_broadcast() {
    let now = chrono::Local::now();
    let mut sign_on = now
        .with_hour(BROADCAST_START_HOUR)
        .and_then(|t| t.with_minute(0))
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .expect("broadcast start hour is a valid hour");
    if now.hour() < BROADCAST_END_HOUR {
        sign_on += chrono::Duration::days(1);
    }

    let wait = sign_on.signed_duration_since(now);
    let wait_secs = wait.num_milliseconds() as f64 / 1000.0;
    if wait_secs > 0.0 {
        info!(
            "off air until {} (sleeping {:.0} minutes)",
            sign_on.format("%I:%M %p"),
            wait_secs / 60.0
        );
        sleep(Duration::from_secs_f64(wait_secs)).await;
    }
}

fn pick_clip(
    rng: &mut impl Rng,
    clips: &[MediaEntry],
    min_dur: f64,
    max_dur: f64,
) -> crate::models::ClipSelection {
    let clip = clips.choose(rng).expect("active clip list is non-empty");
    let use_duration = rng.gen_range(min_dur..=max_dur);

    if clip.duration <= use_duration {
        return crate::models::ClipSelection {
            path: clip.path.clone(),
            seek_start: 0.0,
            use_duration: clip.duration,
            loop_if_shorter: true,
        };
    }

    let max_start = clip.duration - use_duration;
    let seek_start = if max_start > 1.0 { rng.gen_range(0.0..max_start) } else { 0.0 };
    crate::models::ClipSelection {
        path: clip.path.clone(),
        seek_start,
        use_duration,
        loop_if_shorter: false,
    }
}

/// Has at least `interval` of wall time passed since `last`? (spec.md §8,
/// bumper cadence: no two consecutive bumpers closer than `I * 60` seconds.)
fn bumper_interval_elapsed(last: Instant, interval: Duration) -> bool {
    last.elapsed() >= interval
}

fn count_staging_files(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .flatten()
                .filter(|e| e.path().extension().map(|ext| ext == "ts").unwrap_or(false))
                .count()
        })
        .unwrap_or(0)
}

async fn clean_glob(dir: &Path, extension: &str) {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(e) => e,
        Err(_) => return,
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        if path.extension().map(|e| e == extension).unwrap_or(false) {
            let _ = tokio::fs::remove_file(&path).await;
        }
    }
}

fn recreate_fifo(path: &Path) -> Result<()> {
    if path.exists() {
        let _ = std::fs::remove_file(path);
    }
    nix::unistd::mkfifo(path, nix::sys::stat::Mode::from_bits_truncate(0o644)).map_err(|source| {
        PipelineError::Fifo {
            path: path.to_path_buf(),
            source,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use serial_test::serial;

    #[test]
    fn pick_clip_loops_when_clip_shorter_than_requested_duration() {
        let clips = vec![MediaEntry::new(PathBuf::from("short.mp4"), 5.0)];
        let mut rng = StdRng::seed_from_u64(1);
        let selection = pick_clip(&mut rng, &clips, 10.0, 20.0);
        assert!(selection.loop_if_shorter);
        assert_eq!(selection.use_duration, 5.0);
        assert_eq!(selection.seek_start, 0.0);
    }

    #[test]
    fn pick_clip_seeks_within_bounds_when_clip_longer() {
        let clips = vec![MediaEntry::new(PathBuf::from("long.mp4"), 120.0)];
        let mut rng = StdRng::seed_from_u64(2);
        let selection = pick_clip(&mut rng, &clips, 10.0, 20.0);
        assert!(!selection.loop_if_shorter);
        assert!(selection.use_duration >= 10.0 && selection.use_duration <= 20.0);
        assert!(selection.seek_start >= 0.0 && selection.seek_start <= 120.0 - selection.use_duration);
    }

    #[test]
    fn bumper_cadence_respects_minimum_interval() {
        let interval = Duration::from_secs(60);
        let just_fired = Instant::now();
        assert!(!bumper_interval_elapsed(just_fired, interval));

        let long_ago = Instant::now()
            .checked_sub(Duration::from_secs(120))
            .expect("instant arithmetic within range");
        assert!(bumper_interval_elapsed(long_ago, interval));
    }

    #[test]
    fn count_staging_files_counts_only_ts_extension() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("clip_000001.ts"), b"").unwrap();
        std::fs::write(dir.path().join("clip_000002.ts"), b"").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"").unwrap();
        assert_eq!(count_staging_files(dir.path()), 2);
    }

    /// spec.md §8, pre-buffer ordering: fragments must reach the encoder in
    /// the order they were captured, even though they sit in `state.prebuffer`
    /// until the streamer comes up.
    #[tokio::test]
    async fn flush_prebuffer_delivers_fragments_in_capture_order() {
        let sink = crate::test_support::RecordingSink::new();
        let stdin: EncoderSink = Arc::new(Mutex::new(Box::new(sink) as Box<dyn AsyncWrite + Send + Unpin>));
        let tmp = tempfile::tempdir().expect("tempdir");

        let mut prebuffer = Vec::new();
        let mut expected_paths = Vec::new();
        for (i, byte) in [b'a', b'b', b'c'].into_iter().enumerate() {
            let path = tmp.path().join(format!("clip_{i:06}.ts"));
            std::fs::write(&path, [byte; 4]).unwrap();
            expected_paths.push(path.clone());
            prebuffer.push(Fragment {
                staging_path: path,
                pts_offset: i as f64,
                duration: 1.0,
            });
        }

        let (tx, mut rx) = mpsc::channel::<FeedItem>(FEED_QUEUE_CAPACITY);
        flush_prebuffer(prebuffer, &tx, stdin).await;
        drop(tx);

        let mut delivered_paths = Vec::new();
        while let Some(item) = rx.recv().await {
            delivered_paths.push(item.ts_path);
        }
        assert_eq!(delivered_paths, expected_paths, "delivery order must match capture order");
    }

    fn test_config(dirs: &TestDirs) -> Config {
        Config {
            music_dir: dirs.music.clone(),
            clips_dir: dirs.clips.clone(),
            bumpers_dir: dirs.bumpers.clone(),
            hls_dir: dirs.hls.clone(),
            bug_path: None,
            video: crate::config::VideoConfig {
                width: 640,
                height: 360,
                fps: 24,
                codec: "libx264".to_string(),
                preset: "veryfast".to_string(),
                bitrate: "1M".to_string(),
                pix_fmt: "yuv420p".to_string(),
            },
            audio: crate::config::AudioConfig {
                codec: "aac".to_string(),
                bitrate: "128k".to_string(),
                sample_rate: 48000,
            },
            hls: crate::config::HlsConfig {
                segment_duration: 6,
                list_size: 6,
                flags: "delete_segments".to_string(),
            },
            mixing: crate::config::MixingConfig {
                clip_min_duration: 5.0,
                clip_max_duration: 10.0,
                effects_per_clip_min: 0,
                effects_per_clip_max: 1,
            },
            bumpers: crate::config::BumperConfig {
                min_interval_minutes: 10.0,
            },
            dayparts: vec![crate::config::DaypartConfig {
                name: "all".to_string(),
                start_hour: 0,
                end_hour: 24,
                subdir: "all".to_string(),
            }],
            clips_dayparts: std::collections::HashMap::new(),
        }
    }

    struct TestDirs {
        _root: tempfile::TempDir,
        music: PathBuf,
        clips: PathBuf,
        bumpers: PathBuf,
        hls: PathBuf,
    }

    fn make_test_dirs() -> TestDirs {
        let root = tempfile::tempdir().expect("tempdir");
        let music = root.path().join("music");
        let clips = root.path().join("clips");
        let bumpers = root.path().join("bumpers");
        let hls = root.path().join("hls");
        std::fs::create_dir_all(&music).unwrap();
        std::fs::create_dir_all(&clips).unwrap();
        std::fs::create_dir_all(&bumpers).unwrap();
        std::fs::write(clips.join("clip1.mp4"), b"fake clip").unwrap();
        TestDirs {
            _root: root,
            music,
            clips,
            bumpers,
            hls,
        }
    }

    /// spec.md §8, idempotent cleanup: recovering from a stuck streamer
    /// twice in a row must leave the pipeline in the same reset state both
    /// times, never panicking on an already-torn-down streamer/feeder.
    #[tokio::test]
    #[serial(fake_ffmpeg_path)]
    async fn recover_streamer_is_idempotent() {
        let toolchain_dir = tempfile::tempdir().expect("tempdir");
        crate::test_support::write_fake_ffmpeg_toolchain(toolchain_dir.path()).expect("write fake ffmpeg");
        let _path_guard = crate::test_support::PathGuard::prepend(toolchain_dir.path());

        let dirs = make_test_dirs();
        let staging_dir = dirs.hls.join("staging");
        let fifo_path = staging_dir.join("audio_pipe");
        let config = test_config(&dirs);

        let mut conductor = Conductor::new(config, staging_dir, fifo_path)
            .await
            .expect("conductor constructs with one clip present");
        conductor.prepare().await.expect("prepare succeeds");

        conductor.recover_streamer().await;
        assert!(matches!(conductor.state.mode, Mode::Prebuffer));
        assert!(conductor.streamer.is_none());
        assert!(conductor.feed_tx.is_none());
        assert!(conductor.state.prebuffer.is_empty());

        conductor.recover_streamer().await;
        assert!(matches!(conductor.state.mode, Mode::Prebuffer));
        assert!(conductor.streamer.is_none());
        assert!(conductor.feed_tx.is_none());
        assert!(conductor.state.prebuffer.is_empty());
    }
}
