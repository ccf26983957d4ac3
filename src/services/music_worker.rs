//! Music Worker (spec.md §4.3).
//!
//! Decodes music tracks to raw PCM and writes them into the audio FIFO.
//! Runs as a background task for the lifetime of the pipeline. Plays
//! tracks sequentially from the current daypart's playlist, reshuffling
//! whenever the playlist is exhausted or the daypart changes. The FIFO is
//! opened once and held open for the task's whole lifetime so the encoder
//! sees one continuous audio stream with no EOF between tracks.
use crate::services::content_index::ContentIndex;
use chrono::Timelike;
use rand::seq::SliceRandom;
use rand::thread_rng;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::{watch, RwLock};
use tracing::{info, warn};

const EMPTY_PLAYLIST_RETRY: std::time::Duration = std::time::Duration::from_secs(30);
const CHUNK_SIZE: usize = 65536;
/// Decode target: 44.1kHz signed-16-bit stereo PCM, fixed regardless of
/// `audio.sample_rate` (spec.md §4.3 step 4; that config value instead
/// feeds the Encoder's FIFO-read args in conductor.rs).
const DECODE_SAMPLE_RATE: &str = "44100";

pub struct MusicWorker {
    index: Arc<RwLock<ContentIndex>>,
    fifo_path: PathBuf,
}

impl MusicWorker {
    pub fn new(index: Arc<RwLock<ContentIndex>>, fifo_path: PathBuf) -> Self {
        Self { index, fifo_path }
    }

    /// Run until `stop` is signalled. Never returns an error on normal
    /// shutdown; the FIFO write end breaking (no reader left) ends the
    /// task early, mirroring the original's "FIFO broken, stopping" exit.
    pub async fn run(self, mut stop: watch::Receiver<bool>) {
        info!("opening audio FIFO (waiting for encoder)...");
        let fifo_path = self.fifo_path.clone();
        let file = match tokio::task::spawn_blocking(move || {
            std::fs::OpenOptions::new().write(true).open(&fifo_path)
        })
        .await
        {
            Ok(Ok(f)) => f,
            Ok(Err(e)) => {
                warn!("failed to open audio FIFO: {e}");
                return;
            }
            Err(e) => {
                warn!("FIFO open task panicked: {e}");
                return;
            }
        };
        let mut fifo = File::from_std(file);
        info!("audio FIFO connected");

        let mut current_daypart: Option<String> = None;

        'outer: loop {
            if *stop.borrow() {
                break;
            }

            let (music_files, daypart_name) = {
                let index = self.index.read().await;
                index.music_for_daypart(current_hour()).await
            };
            if music_files.is_empty() {
                warn!("no music files, sleeping {:?}", EMPTY_PLAYLIST_RETRY);
                tokio::select! {
                    _ = tokio::time::sleep(EMPTY_PLAYLIST_RETRY) => continue,
                    _ = stop.changed() => { if *stop.borrow() { break; } }
                }
                continue;
            }

            if Some(&daypart_name) != current_daypart.as_ref() {
                info!(daypart = %daypart_name, "daypart changed");
                current_daypart = Some(daypart_name.clone());
            }

            let mut playlist = music_files;
            playlist.shuffle(&mut thread_rng());
            info!(tracks = playlist.len(), daypart = %daypart_name, "shuffled playlist");

            for (track_idx, track) in playlist.iter().enumerate() {
                if *stop.borrow() {
                    break 'outer;
                }

                let (_, new_daypart) = {
                    let index = self.index.read().await;
                    index.music_for_daypart(current_hour()).await
                };
                if Some(&new_daypart) != current_daypart.as_ref() {
                    info!("daypart changed mid-playlist, reshuffling");
                    break;
                }

                let track_name = track
                    .path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default();
                info!(
                    index = track_idx + 1,
                    total = playlist.len(),
                    track = %track_name,
                    duration = track.duration,
                    "playing track"
                );

                if !self.decode_track_into_fifo(&track.path, &mut fifo, &mut stop).await {
                    break 'outer;
                }
            }

            info!("playlist exhausted, reshuffling");
        }

        info!("music worker stopped");
    }

    /// Spawn ffmpeg to decode one track to raw PCM and stream the output
    /// into the FIFO in bounded chunks. Returns `false` if the FIFO broke
    /// and the caller should stop entirely.
    async fn decode_track_into_fifo(
        &self,
        track_path: &std::path::Path,
        fifo: &mut (impl AsyncWrite + Unpin),
        stop: &mut watch::Receiver<bool>,
    ) -> bool {
        let mut child = match Command::new("ffmpeg")
            .args(["-v", "quiet", "-i"])
            .arg(track_path)
            .args(["-f", "s16le", "-ar", DECODE_SAMPLE_RATE, "-ac", "2", "pipe:1"])
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
        {
            Ok(c) => c,
            Err(e) => {
                warn!("failed to spawn ffmpeg decoder for {:?}: {e}", track_path);
                return true;
            }
        };

        let mut stdout = match child.stdout.take() {
            Some(s) => s,
            None => return true,
        };

        let mut buf = vec![0u8; CHUNK_SIZE];
        loop {
            if *stop.borrow() {
                let _ = child.kill().await;
                return false;
            }
            let n = tokio::select! {
                res = stdout.read(&mut buf) => match res {
                    Ok(n) => n,
                    Err(_) => 0,
                },
                _ = stop.changed() => {
                    let _ = child.kill().await;
                    return false;
                }
            };
            if n == 0 {
                break;
            }
            if let Err(e) = fifo.write_all(&buf[..n]).await {
                warn!("audio FIFO broken, stopping: {e}");
                let _ = child.kill().await;
                return false;
            }
            if let Err(e) = fifo.flush().await {
                warn!("audio FIFO flush failed, stopping: {e}");
                let _ = child.kill().await;
                return false;
            }
        }

        let _ = child.wait().await;
        true
    }
}

fn current_hour() -> u32 {
    chrono::Local::now().hour()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::content_index::ContentIndex;
    use crate::test_support::{write_fake_ffmpeg_toolchain, PathGuard, RecordingSink};
    use serial_test::serial;
    use std::collections::HashMap;
    use tokio::sync::RwLock;

    /// spec.md §8, FIFO continuity: decoding two tracks back to back must
    /// never close the FIFO write end between them — the encoder sees one
    /// continuous audio stream, not one per track.
    #[tokio::test]
    #[serial(fake_ffmpeg_path)]
    async fn decoding_two_tracks_never_closes_the_fifo_between_them() {
        let tmp = tempfile::tempdir().expect("tempdir");
        write_fake_ffmpeg_toolchain(tmp.path()).expect("write fake ffmpeg");
        let _path_guard = PathGuard::prepend(tmp.path());

        let track_path = tmp.path().join("track.mp3");
        std::fs::write(&track_path, b"fake source").expect("write fake track");

        let index = Arc::new(RwLock::new(ContentIndex::new(
            tmp.path().to_path_buf(),
            tmp.path().to_path_buf(),
            tmp.path().to_path_buf(),
            Vec::new(),
            HashMap::new(),
        )));
        let worker = MusicWorker::new(index, tmp.path().join("audio_pipe"));
        let (_stop_tx, mut stop_rx) = watch::channel(false);

        let mut sink = RecordingSink::new();
        let ok_first = worker.decode_track_into_fifo(&track_path, &mut sink, &mut stop_rx).await;
        assert!(ok_first, "first decode must succeed");
        assert_eq!(sink.shutdown_count(), 0, "FIFO must stay open after the first track");

        let ok_second = worker.decode_track_into_fifo(&track_path, &mut sink, &mut stop_rx).await;
        assert!(ok_second, "second decode must succeed");
        assert_eq!(sink.shutdown_count(), 0, "FIFO must stay open after the second track too");

        assert!(!sink.contents().is_empty(), "decoded PCM bytes must reach the FIFO");
    }
}
