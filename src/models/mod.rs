pub mod fragment;
pub mod media;
pub mod state;

pub use fragment::{ClipPlan, ClipSelection, Fragment};
pub use media::MediaEntry;
pub use state::{Heartbeat, Mode, PipelineState};
