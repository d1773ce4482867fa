use std::num::ParseIntError;
use std::path::PathBuf;

use thiserror::Error;

use crate::engine::EngineError;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("channel record {content_id} not found")]
    NotFound { content_id: String },
    #[error("metadata store path not configured")]
    MissingStore,
    #[error("failed to open database at {path}: {source}")]
    OpenDatabase {
        path: PathBuf,
        source: rusqlite::Error,
    },
    #[error("inconsistent channel record {content_id}: {reason}")]
    InconsistentRecord { content_id: String, reason: String },
}

pub type ChannelResult<T> = std::result::Result<T, ChannelError>;

#[derive(Debug, Error)]
pub enum PresetError {
    #[error("abr preset entry {entry:?} must be name|resolution|bitrate")]
    Shape { entry: String },
    #[error("empty token in abr preset entry {entry:?}")]
    EmptyToken { entry: String },
    #[error("invalid bitrate in abr preset entry {entry:?}: {source}")]
    Bitrate {
        entry: String,
        source: ParseIntError,
    },
}

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("store error: {0}")]
    Store(#[from] ChannelError),
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),
    #[error("preset error: {0}")]
    Preset(#[from] PresetError),
    #[error("cannot resolve playback url from {value}: {source}")]
    PlaybackUrl {
        value: String,
        source: url::ParseError,
    },
}

pub type ProvisionResult<T> = std::result::Result<T, ProvisionError>;
