pub mod conductor;
pub mod content_index;
pub mod effects;
pub mod feeder;
pub mod music_worker;
pub mod renderer;

pub use conductor::Conductor;
pub use content_index::ContentIndex;
pub use feeder::{FeedItem, Feeder};
pub use music_worker::MusicWorker;
pub use renderer::Renderer;
