//! Logging setup (spec.md §6: "log rotation at 10 MiB x 3 files", mirrored
//! from `logging.handlers.RotatingFileHandler`).
//!
//! `tracing-appender` only rotates on a time interval, not on size, so the
//! size-based rotation the original pipeline relies on is implemented here
//! as a small custom [`MakeWriter`].
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::fmt::MakeWriter;

const MAX_BYTES: u64 = 10 * 1024 * 1024;
const BACKUP_COUNT: u32 = 3;

struct RotatingFile {
    path: PathBuf,
    file: File,
    written: u64,
}

impl RotatingFile {
    fn open(path: PathBuf) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let written = file.metadata()?.len();
        Ok(Self { path, file, written })
    }

    fn rotate(&mut self) -> io::Result<()> {
        for idx in (1..BACKUP_COUNT).rev() {
            let src = backup_path(&self.path, idx);
            let dst = backup_path(&self.path, idx + 1);
            if src.exists() {
                let _ = std::fs::rename(&src, &dst);
            }
        }
        let first_backup = backup_path(&self.path, 1);
        let _ = std::fs::rename(&self.path, &first_backup);
        self.file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        self.written = 0;
        Ok(())
    }
}

fn backup_path(base: &Path, idx: u32) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(format!(".{idx}"));
    PathBuf::from(name)
}

impl Write for RotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written >= MAX_BYTES {
            self.rotate()?;
        }
        let n = self.file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

/// A `tracing_subscriber::fmt::MakeWriter` that rotates its backing file at
/// [`MAX_BYTES`], keeping [`BACKUP_COUNT`] old logs (`pipeline.log.1` ..
/// `.3`), same shape as the Python `RotatingFileHandler` this replaces.
#[derive(Clone)]
pub struct RotatingFileWriter {
    inner: std::sync::Arc<Mutex<RotatingFile>>,
}

impl RotatingFileWriter {
    pub fn new(path: impl Into<PathBuf>) -> io::Result<Self> {
        let file = RotatingFile::open(path.into())?;
        Ok(Self {
            inner: std::sync::Arc::new(Mutex::new(file)),
        })
    }
}

impl<'a> MakeWriter<'a> for RotatingFileWriter {
    type Writer = RotatingFileWriterGuard;

    fn make_writer(&'a self) -> Self::Writer {
        RotatingFileWriterGuard {
            inner: self.inner.clone(),
        }
    }
}

pub struct RotatingFileWriterGuard {
    inner: std::sync::Arc<Mutex<RotatingFile>>,
}

impl Write for RotatingFileWriterGuard {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .flush()
    }
}

/// Install the global tracing subscriber: stderr (so nohup/journald
/// capture it, spec.md §6) plus a size-rotated file under `log_path`.
pub fn init(log_path: &Path, verbose: bool) -> anyhow::Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let default_filter = if verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    let file_writer = RotatingFileWriter::new(log_path)?;

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(file_writer))
        .init();

    Ok(())
}
