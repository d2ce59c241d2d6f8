use std::path::PathBuf;
use crate::event::SketchEvent;

/// Shape of a pixel buffer as `(height, width, channels)`.
pub type Shape = (usize, usize, usize);

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("Sketch failed to start: {0}")]
    Startup(String),

    #[error("Pixel buffer shape {actual:?} does not match sketch shape {expected:?}")]
    ShapeMismatch { expected: Shape, actual: Shape },

    #[error("Cannot decode image {}: {message}", path.display())]
    Decode { path: PathBuf, message: String },

    #[error("Cannot convert image source: {0}")]
    Conversion(String),

    #[error("Host call failed: {0}")]
    HostCall(#[source] anyhow::Error),

    #[error("Callback '{event}' failed: {source}")]
    Callback {
        event: SketchEvent,
        #[source]
        source: anyhow::Error,
    },

    #[error("Callback adapter has been released")]
    AdapterReleased,

    #[error("Cannot encode image {}: {message}", path.display())]
    Encode { path: PathBuf, message: String },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BridgeError {
    pub(crate) fn host(err: anyhow::Error) -> Self {
        BridgeError::HostCall(err)
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        BridgeError::Io { path: path.into(), source }
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
