//! Tag reader double for tests: the "audio" file body is the JSON encoding of
//! an [`AudioMetadata`], so tests can create, edit and move tagged files with
//! plain filesystem calls.

use std::fs;
use std::path::Path;

use crate::{AudioMetadata, MetadataError, TagReader};

#[derive(Clone, Copy, Debug, Default)]
pub struct JsonTagReader;

impl TagReader for JsonTagReader {
    fn read_tags(&self, path: &Path) -> Result<AudioMetadata, MetadataError> {
        let bytes = fs::read(path)?;
        serde_json::from_slice(&bytes).map_err(|err| MetadataError::Decode(err.to_string()))
    }

    fn write_tags(&self, path: &Path, metadata: &AudioMetadata) -> Result<(), MetadataError> {
        write_json_file(path, metadata)
    }
}

pub fn write_json_file(path: &Path, metadata: &AudioMetadata) -> Result<(), MetadataError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let bytes =
        serde_json::to_vec_pretty(metadata).map_err(|err| MetadataError::Decode(err.to_string()))?;
    fs::write(path, bytes)?;
    Ok(())
}

pub fn track_tags(artist: &str, release: &str, number: u16, total: u16) -> AudioMetadata {
    AudioMetadata {
        artist: Some(artist.to_string()),
        release_artist: Some(artist.to_string()),
        release: Some(release.to_string()),
        title: Some(format!("Track {}", number)),
        track_number: Some(number),
        total_tracks: Some(total),
        disc: Some(1),
        duration_ms: Some(180_000),
        ..AudioMetadata::default()
    }
}
