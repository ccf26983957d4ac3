use crate::models::fragment::Fragment;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Lifecycle mode of the pipeline (spec.md §3, PipelineState.current mode).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Prebuffer,
    Live,
    OffAir,
    Recovering,
}

/// Shared last-feed heartbeat cell. Written by the Feeder on every
/// successful write, read by the Conductor's watchdog check (spec.md §5,
/// "last_feed_time is touched by Feeder (write) and Conductor (read); both
/// must use an atomic or mutex-protected cell").
#[derive(Debug, Clone)]
pub struct Heartbeat(Arc<AtomicI64>);

impl Heartbeat {
    pub fn new() -> Self {
        let h = Self(Arc::new(AtomicI64::new(0)));
        h.touch();
        h
    }

    pub fn touch(&self) {
        self.0.store(now_millis(), Ordering::SeqCst);
    }

    /// Seconds elapsed since the last touch.
    pub fn age_secs(&self) -> f64 {
        let then = self.0.load(Ordering::SeqCst);
        (now_millis() - then) as f64 / 1000.0
    }
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self::new()
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_millis() as i64
}

/// Conductor-owned pipeline state, mutated only on the main loop except for
/// the heartbeat (spec.md §3, PipelineState).
pub struct PipelineState {
    /// Monotonic fragment sequence number. Survives recovery (spec.md §9,
    /// Open Question: sequence counter is never reset, only PTS is).
    pub sequence: u64,
    pub cumulative_ts: f64,
    pub last_bumper_time: Option<std::time::Instant>,
    pub prebuffer: Vec<Fragment>,
    pub mode: Mode,
    pub heartbeat: Heartbeat,
}

impl PipelineState {
    pub fn new() -> Self {
        Self {
            sequence: 0,
            cumulative_ts: 0.0,
            last_bumper_time: None,
            prebuffer: Vec::new(),
            mode: Mode::Prebuffer,
            heartbeat: Heartbeat::new(),
        }
    }

    /// Reset everything the watchdog/recovery path owns, per spec.md §4.6
    /// step 7: cumulative_ts -> 0, prebuffer cleared, heartbeat touched,
    /// mode -> Prebuffer. `sequence` is deliberately left untouched.
    pub fn reset_for_recovery(&mut self) {
        self.cumulative_ts = 0.0;
        self.prebuffer.clear();
        self.heartbeat.touch();
        self.mode = Mode::Prebuffer;
    }

    pub fn next_sequence(&mut self) -> u64 {
        self.sequence += 1;
        self.sequence
    }
}

impl Default for PipelineState {
    fn default() -> Self {
        Self::new()
    }
}
