//! Test-only helpers shared across unit test modules: an in-memory
//! stand-in for the encoder's stdin pipe, and a fake ffmpeg/ffprobe
//! toolchain that tests needing a subprocess put on `$PATH` (spec.md §9:
//! "parameterize... so tests can fix selections" applied to the external
//! encoder collaborator rather than the effects oracle).
#![cfg(test)]

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::task::{Context, Poll};
use tokio::io::AsyncWrite;

/// An in-memory sink that records every byte written and how many times
/// `shutdown` (close) was called, so tests can assert a writer was never
/// closed mid-stream (spec.md §8, FIFO continuity).
#[derive(Clone, Default)]
pub struct RecordingSink {
    buf: Arc<StdMutex<Vec<u8>>>,
    shutdown_count: Arc<AtomicUsize>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> Vec<u8> {
        self.buf.lock().unwrap().clone()
    }

    pub fn shutdown_count(&self) -> usize {
        self.shutdown_count.load(Ordering::SeqCst)
    }
}

impl AsyncWrite for RecordingSink {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        self.buf.lock().unwrap().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.shutdown_count.fetch_add(1, Ordering::SeqCst);
        Poll::Ready(Ok(()))
    }
}

/// RAII guard that prepends `dir` to `PATH` and restores the previous
/// value on drop, so a test's fake ffmpeg/ffprobe only shadow the real
/// binaries for the duration of that test.
pub struct PathGuard {
    old: String,
}

impl PathGuard {
    pub fn prepend(dir: &std::path::Path) -> Self {
        let old = std::env::var("PATH").unwrap_or_default();
        std::env::set_var("PATH", format!("{}:{}", dir.display(), old));
        Self { old }
    }
}

impl Drop for PathGuard {
    fn drop(&mut self) {
        std::env::set_var("PATH", &self.old);
    }
}

/// Write a fake `ffmpeg` and `ffprobe` into `dir`, standing in for the
/// real media toolchain (SPEC_FULL.md §6.1 / §8): `ffprobe` always reports
/// a fixed duration; `ffmpeg` writes a handful of dummy PCM bytes to
/// stdout when invoked as a decoder (`pipe:1` among its args), and
/// otherwise just creates its output file (the last positional argument)
/// so a render call succeeds. If `FAKE_FFMPEG_LOG` is set in the
/// environment, every invocation's argv is appended to it (one arg per
/// line, `---` between invocations) so a test can inspect what ffmpeg was
/// actually called with.
pub fn write_fake_ffmpeg_toolchain(dir: &std::path::Path) -> io::Result<()> {
    let ffprobe = dir.join("ffprobe");
    std::fs::write(
        &ffprobe,
        "#!/bin/sh\necho '{\"format\":{\"duration\":\"12.0\"}}'\nexit 0\n",
    )?;
    make_executable(&ffprobe)?;

    let ffmpeg = dir.join("ffmpeg");
    std::fs::write(
        &ffmpeg,
        r#"#!/bin/sh
if [ -n "$FAKE_FFMPEG_LOG" ]; then
  printf '%s\n' "$@" >> "$FAKE_FFMPEG_LOG"
  printf -- '---\n' >> "$FAKE_FFMPEG_LOG"
fi
last=""
for arg in "$@"; do
  if [ "$arg" = "pipe:1" ]; then
    dd if=/dev/zero bs=1024 count=4 2>/dev/null
    exit 0
  fi
  last="$arg"
done
: > "$last"
exit 0
"#,
    )?;
    make_executable(&ffmpeg)?;
    Ok(())
}

fn make_executable(path: &std::path::Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = std::fs::metadata(path)?.permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(path, perms)
}
