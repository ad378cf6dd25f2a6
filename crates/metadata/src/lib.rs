use std::fmt;
use std::path::Path;

use lofty::config::WriteOptions;
use lofty::error::LoftyError;
use lofty::picture::{Picture, PictureType};
use lofty::prelude::{AudioFile, ItemKey, TagExt, TaggedFileExt};
use lofty::tag::Tag;
use serde::{Deserialize, Serialize};

#[cfg(feature = "test-util")]
pub mod testing;

/// Canonical record of the tags read from one audio file.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioMetadata {
    pub artist: Option<String>,
    pub release_artist: Option<String>,
    pub release: Option<String>,
    pub title: Option<String>,
    pub track_number: Option<u16>,
    pub total_tracks: Option<u16>,
    pub disc: Option<u16>,
    pub total_discs: Option<u16>,
    pub year: Option<i32>,
    pub duration_ms: Option<u32>,
    pub genres: Vec<String>,
    pub comment: Option<String>,
    pub musicbrainz_artist_id: Option<String>,
    pub musicbrainz_release_id: Option<String>,
    pub musicbrainz_track_id: Option<String>,
    #[serde(skip)]
    pub images: Vec<EmbeddedImage>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddedImage {
    pub data: Vec<u8>,
    pub mime: Option<String>,
    pub front_cover: bool,
}

impl AudioMetadata {
    /// Artist the release is filed under: the album artist when tagged,
    /// otherwise the track artist.
    pub fn release_artist_name(&self) -> Option<&str> {
        self.release_artist
            .as_deref()
            .or(self.artist.as_deref())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    /// Track artist when it differs from the release artist (compilations).
    pub fn track_artist_override(&self) -> Option<&str> {
        let artist = self.artist.as_deref()?.trim();
        let release_artist = self.release_artist_name()?;
        if artist.is_empty() || artist.eq_ignore_ascii_case(release_artist) {
            None
        } else {
            Some(artist)
        }
    }

    pub fn disc_or_default(&self) -> u16 {
        self.disc.filter(|disc| *disc > 0).unwrap_or(1)
    }

    pub fn is_valid(&self) -> bool {
        self.release_artist_name().is_some()
            && has_text(&self.release)
            && has_text(&self.title)
            && self.track_number.map(|n| n > 0).unwrap_or(false)
    }

    pub fn cover_image(&self) -> Option<&EmbeddedImage> {
        self.images
            .iter()
            .find(|image| image.front_cover)
            .or_else(|| self.images.first())
    }

    /// Hash over every tag that feeds the catalog. Embedded image bytes are
    /// represented by their count only.
    pub fn digest(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        for value in [
            &self.artist,
            &self.release_artist,
            &self.release,
            &self.title,
            &self.comment,
            &self.musicbrainz_artist_id,
            &self.musicbrainz_release_id,
            &self.musicbrainz_track_id,
        ] {
            hash_text(&mut hasher, value.as_deref());
        }
        for value in [
            self.track_number,
            self.total_tracks,
            self.disc,
            self.total_discs,
        ] {
            hasher.update(&value.map(i64::from).unwrap_or(-1).to_le_bytes());
        }
        hasher.update(&self.year.map(i64::from).unwrap_or(-1).to_le_bytes());
        hasher.update(&self.duration_ms.map(i64::from).unwrap_or(-1).to_le_bytes());
        for genre in &self.genres {
            hash_text(&mut hasher, Some(genre));
        }
        hasher.update(&(self.images.len() as u64).to_le_bytes());
        hasher.finalize().to_hex().to_string()
    }
}

fn hash_text(hasher: &mut blake3::Hasher, value: Option<&str>) {
    match value {
        Some(text) => {
            hasher.update(&[1u8]);
            hasher.update(text.as_bytes());
            hasher.update(&[0u8]);
        }
        None => {
            hasher.update(&[0u8]);
        }
    }
}

fn has_text(value: &Option<String>) -> bool {
    value
        .as_ref()
        .map(|text| !text.trim().is_empty())
        .unwrap_or(false)
}

#[derive(Debug)]
pub enum MetadataError {
    Io(std::io::Error),
    Lofty(LoftyError),
    Unsupported(String),
    Decode(String),
}

impl fmt::Display for MetadataError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataError::Io(err) => write!(f, "io error: {}", err),
            MetadataError::Lofty(err) => write!(f, "tag error: {}", err),
            MetadataError::Unsupported(value) => write!(f, "unsupported file: {}", value),
            MetadataError::Decode(value) => write!(f, "decode error: {}", value),
        }
    }
}

impl std::error::Error for MetadataError {}

impl From<std::io::Error> for MetadataError {
    fn from(err: std::io::Error) -> Self {
        MetadataError::Io(err)
    }
}

impl From<LoftyError> for MetadataError {
    fn from(err: LoftyError) -> Self {
        MetadataError::Lofty(err)
    }
}

/// Reads and rewrites the tags embedded in audio files.
pub trait TagReader: Send + Sync {
    fn read_tags(&self, path: &Path) -> Result<AudioMetadata, MetadataError>;

    fn write_tags(&self, path: &Path, metadata: &AudioMetadata) -> Result<(), MetadataError>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct LoftyTagReader;

impl TagReader for LoftyTagReader {
    fn read_tags(&self, path: &Path) -> Result<AudioMetadata, MetadataError> {
        read_tags(path)
    }

    fn write_tags(&self, path: &Path, metadata: &AudioMetadata) -> Result<(), MetadataError> {
        write_tags(path, metadata)
    }
}

pub fn read_tags(path: &Path) -> Result<AudioMetadata, MetadataError> {
    let tagged_file = lofty::read_from_path(path)?;
    let properties = tagged_file.properties();

    let mut info = AudioMetadata::default();

    let duration_ms = properties.duration().as_millis();
    if duration_ms > 0 {
        let clamped = duration_ms.min(u128::from(u32::MAX)) as u32;
        info.duration_ms = Some(clamped);
    }

    if let Some(tag) = tagged_file.primary_tag().or_else(|| tagged_file.first_tag()) {
        info.title = tag_text(tag, &ItemKey::TrackTitle);
        info.release = tag_text(tag, &ItemKey::AlbumTitle);
        info.release_artist = tag_text(tag, &ItemKey::AlbumArtist);
        info.artist = tag_text(tag, &ItemKey::TrackArtist).or_else(|| info.release_artist.clone());

        let track_text = tag.get_string(&ItemKey::TrackNumber);
        info.track_number = track_text.and_then(parse_u16);
        info.total_tracks = tag
            .get_string(&ItemKey::TrackTotal)
            .and_then(parse_u16)
            .or_else(|| track_text.and_then(parse_total));

        let disc_text = tag.get_string(&ItemKey::DiscNumber);
        info.disc = disc_text.and_then(parse_u16);
        info.total_discs = tag
            .get_string(&ItemKey::DiscTotal)
            .and_then(parse_u16)
            .or_else(|| disc_text.and_then(parse_total));

        info.year = tag
            .get_string(&ItemKey::Year)
            .or_else(|| tag.get_string(&ItemKey::RecordingDate))
            .and_then(parse_year);
        if let Some(value) = tag.get_string(&ItemKey::Genre) {
            info.genres = parse_genres(value);
        }
        info.comment = tag_text(tag, &ItemKey::Comment);
        info.musicbrainz_artist_id = tag_text(tag, &ItemKey::MusicBrainzArtistId);
        info.musicbrainz_release_id = tag_text(tag, &ItemKey::MusicBrainzReleaseId);
        info.musicbrainz_track_id = tag_text(tag, &ItemKey::MusicBrainzRecordingId);
        info.images = collect_images(tag.pictures());
    }

    Ok(info)
}

pub fn write_tags(path: &Path, metadata: &AudioMetadata) -> Result<(), MetadataError> {
    let mut tagged_file = lofty::read_from_path(path)?;
    if tagged_file.primary_tag().is_none() {
        let tag_type = tagged_file.primary_tag_type();
        tagged_file.insert_tag(Tag::new(tag_type));
    }
    let tag = tagged_file
        .primary_tag_mut()
        .ok_or_else(|| MetadataError::Unsupported(path.display().to_string()))?;

    set_text(tag, ItemKey::TrackTitle, &metadata.title);
    set_text(tag, ItemKey::AlbumTitle, &metadata.release);
    set_text(tag, ItemKey::AlbumArtist, &metadata.release_artist);
    set_text(tag, ItemKey::TrackArtist, &metadata.artist);
    set_number(tag, ItemKey::TrackNumber, metadata.track_number);
    set_number(tag, ItemKey::TrackTotal, metadata.total_tracks);
    set_number(tag, ItemKey::DiscNumber, metadata.disc);
    set_number(tag, ItemKey::DiscTotal, metadata.total_discs);
    if let Some(year) = metadata.year {
        tag.insert_text(ItemKey::Year, year.to_string());
    }
    if !metadata.genres.is_empty() {
        tag.insert_text(ItemKey::Genre, metadata.genres.join("; "));
    }

    tag.save_to_path(path, WriteOptions::default())?;
    Ok(())
}

fn tag_text(tag: &Tag, key: &ItemKey) -> Option<String> {
    tag.get_string(key)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn set_text(tag: &mut Tag, key: ItemKey, value: &Option<String>) {
    if let Some(value) = value.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
        tag.insert_text(key, value.to_string());
    }
}

fn set_number(tag: &mut Tag, key: ItemKey, value: Option<u16>) {
    if let Some(value) = value {
        tag.insert_text(key, value.to_string());
    }
}

fn parse_u16(text: &str) -> Option<u16> {
    let head = text.split('/').next().unwrap_or(text).trim();
    head.parse().ok()
}

fn parse_total(text: &str) -> Option<u16> {
    let (_, total) = text.split_once('/')?;
    total.trim().parse().ok()
}

fn parse_year(text: &str) -> Option<i32> {
    let mut digits = String::new();
    for ch in text.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
            if digits.len() == 4 {
                break;
            }
        } else if !digits.is_empty() {
            break;
        }
    }
    if digits.len() != 4 {
        None
    } else {
        digits.parse().ok()
    }
}

pub fn parse_genres(text: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for part in text.split(&[';', ',', '/', '|', '\0'][..]) {
        let trimmed = part.trim();
        if trimmed.is_empty() {
            continue;
        }
        if out.iter().any(|existing| existing.eq_ignore_ascii_case(trimmed)) {
            continue;
        }
        out.push(trimmed.to_string());
    }
    out
}

fn collect_images(pictures: &[Picture]) -> Vec<EmbeddedImage> {
    pictures
        .iter()
        .map(|picture| {
            let data = picture.data().to_vec();
            let mime = guess_mime(&data);
            EmbeddedImage {
                data,
                mime,
                front_cover: picture.pic_type() == PictureType::CoverFront,
            }
        })
        .collect()
}

pub fn guess_mime(bytes: &[u8]) -> Option<String> {
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("image/jpeg".to_string())
    } else if bytes.starts_with(&[0x89, 0x50, 0x4E, 0x47]) {
        Some("image/png".to_string())
    } else {
        None
    }
}
