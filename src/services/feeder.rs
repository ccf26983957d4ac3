//! Feeder (spec.md §4.4).
//!
//! Drains a bounded queue of rendered staging fragments into the active
//! encoder process's stdin pipe, then deletes the staging file. Runs as a
//! single task for the life of the pipeline; each queued item carries the
//! stdin handle of whichever encoder process was current when it was
//! queued, so a mid-flight recovery never hands a fragment to the wrong
//! process.
use crate::models::Heartbeat;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};

/// The encoder's stdin pipe, type-erased so the Feeder (and tests) can
/// target anything that accepts bytes — a real `ChildStdin` in production,
/// an in-memory sink in tests (spec.md §9: "model them as byte-oriented
/// writers guarded by owning tasks").
pub type EncoderSink = Arc<Mutex<Box<dyn AsyncWrite + Send + Unpin>>>;

/// One rendered fragment queued for delivery, bound to the encoder stdin
/// that was active at queue time (spec.md §4.4, §4.6 recovery protocol).
pub struct FeedItem {
    pub ts_path: PathBuf,
    pub stdin: EncoderSink,
}

pub struct Feeder {
    heartbeat: Heartbeat,
}

impl Feeder {
    pub fn new(heartbeat: Heartbeat) -> Self {
        Self { heartbeat }
    }

    /// Run until the channel closes (shutdown) or yields `None` via a
    /// sentinel — mirrors the original's `feed_queue.put(None)` stop
    /// signal, modeled here as the sender being dropped.
    pub async fn run(self, mut rx: mpsc::Receiver<FeedItem>) {
        while let Some(item) = rx.recv().await {
            match feed_one(&item).await {
                Ok(bytes) => {
                    self.heartbeat.touch();
                    info!(mb = bytes as f64 / (1024.0 * 1024.0), "fed encoder");
                }
                Err(e) => {
                    warn!("encoder pipe broken: {e}");
                }
            }
            // best effort: the file may already be gone after a recovery drain
            let _ = tokio::fs::remove_file(&item.ts_path).await;
        }
        info!("feeder stopped");
    }
}

async fn feed_one(item: &FeedItem) -> std::io::Result<usize> {
    let data = tokio::fs::read(&item.ts_path).await?;
    let mut stdin = item.stdin.lock().await;
    stdin.write_all(&data).await?;
    stdin.flush().await?;
    Ok(data.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::RecordingSink;

    fn sink_as_encoder(sink: RecordingSink) -> EncoderSink {
        Arc::new(Mutex::new(Box::new(sink) as Box<dyn AsyncWrite + Send + Unpin>))
    }

    #[tokio::test]
    async fn run_delivers_queued_fragments_in_order_and_deletes_staging_files() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let sink = RecordingSink::new();
        let stdin = sink_as_encoder(sink.clone());

        let path_a = tmp.path().join("clip_000001.ts");
        let path_b = tmp.path().join("clip_000002.ts");
        std::fs::write(&path_a, b"AAAA").unwrap();
        std::fs::write(&path_b, b"BBBB").unwrap();

        let heartbeat = crate::models::Heartbeat::new();
        let feeder = Feeder::new(heartbeat);
        let (tx, rx) = mpsc::channel(4);
        let task = tokio::spawn(feeder.run(rx));

        tx.send(FeedItem {
            ts_path: path_a.clone(),
            stdin: stdin.clone(),
        })
        .await
        .unwrap();
        tx.send(FeedItem {
            ts_path: path_b.clone(),
            stdin: stdin.clone(),
        })
        .await
        .unwrap();
        drop(tx);
        task.await.expect("feeder task completes");

        assert_eq!(sink.contents(), b"AAAABBBB", "fragments must arrive in send order");
        assert!(!path_a.exists(), "staging file must be deleted after delivery");
        assert!(!path_b.exists(), "staging file must be deleted after delivery");
    }

    #[tokio::test]
    async fn a_broken_pipe_does_not_stop_the_feeder_or_skip_cleanup() {
        struct BrokenSink;
        impl AsyncWrite for BrokenSink {
            fn poll_write(
                self: std::pin::Pin<&mut Self>,
                _cx: &mut std::task::Context<'_>,
                _buf: &[u8],
            ) -> std::task::Poll<std::io::Result<usize>> {
                std::task::Poll::Ready(Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "broken")))
            }
            fn poll_flush(
                self: std::pin::Pin<&mut Self>,
                _cx: &mut std::task::Context<'_>,
            ) -> std::task::Poll<std::io::Result<()>> {
                std::task::Poll::Ready(Ok(()))
            }
            fn poll_shutdown(
                self: std::pin::Pin<&mut Self>,
                _cx: &mut std::task::Context<'_>,
            ) -> std::task::Poll<std::io::Result<()>> {
                std::task::Poll::Ready(Ok(()))
            }
        }

        let tmp = tempfile::tempdir().expect("tempdir");
        let stdin: EncoderSink = Arc::new(Mutex::new(Box::new(BrokenSink) as Box<dyn AsyncWrite + Send + Unpin>));
        let path = tmp.path().join("clip_000001.ts");
        std::fs::write(&path, b"data").unwrap();

        let heartbeat = crate::models::Heartbeat::new();
        let feeder = Feeder::new(heartbeat);
        let (tx, rx) = mpsc::channel(4);
        let task = tokio::spawn(feeder.run(rx));

        tx.send(FeedItem {
            ts_path: path.clone(),
            stdin,
        })
        .await
        .unwrap();
        drop(tx);
        task.await.expect("feeder task completes despite the broken pipe");

        assert!(!path.exists(), "staging file must still be cleaned up after a failed write");
    }
}
