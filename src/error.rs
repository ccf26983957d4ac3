use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config at {path:?}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("config error: {0}")]
    Config(String),

    #[error("render failed: {0}")]
    Render(String),

    #[error("no video clips found in {0:?}")]
    NoClips(PathBuf),

    #[error("failed to create FIFO at {path:?}: {source}")]
    Fifo {
        path: PathBuf,
        #[source]
        source: nix::Error,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
