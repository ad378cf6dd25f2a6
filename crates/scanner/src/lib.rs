use std::fmt;

use library::LibraryError;

mod config;
mod pipeline;
mod walker;

pub use config::{
    config_path_from_env, load_or_create_config, resolve_library_root, resolve_path, save_config,
    ConfigError, ProviderSourceConfig, ScannerConfig, CONFIG_VERSION,
};
pub use pipeline::{FolderOutcome, FolderPipeline, PipelineSettings};
pub use walker::{remove_empty_folders, FolderWalker, ScanReport, WalkControl};

#[derive(Debug)]
pub enum ScanError {
    Library(LibraryError),
    /// A blocking task panicked or was cancelled.
    Join(String),
}

impl fmt::Display for ScanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanError::Library(err) => write!(f, "{}", err),
            ScanError::Join(err) => write!(f, "task failed: {}", err),
        }
    }
}

impl std::error::Error for ScanError {}

impl From<LibraryError> for ScanError {
    fn from(err: LibraryError) -> Self {
        ScanError::Library(err)
    }
}

impl From<tokio::task::JoinError> for ScanError {
    fn from(err: tokio::task::JoinError) -> Self {
        ScanError::Join(err.to_string())
    }
}
