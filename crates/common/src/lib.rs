use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use time::{Date, Month};
use uuid::Uuid;

mod list;

pub use list::NameList;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Artist,
    Release,
    Media,
    Track,
    Genre,
    Label,
    Image,
    ArtistGenre,
    ReleaseGenre,
    ReleaseLabel,
    ArtistAssociation,
    UserRating,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Artist => "artist",
            EntityKind::Release => "release",
            EntityKind::Media => "media",
            EntityKind::Track => "track",
            EntityKind::Genre => "genre",
            EntityKind::Label => "label",
            EntityKind::Image => "image",
            EntityKind::ArtistGenre => "artist_genre",
            EntityKind::ReleaseGenre => "release_genre",
            EntityKind::ReleaseLabel => "release_label",
            EntityKind::ArtistAssociation => "artist_association",
            EntityKind::UserRating => "user_rating",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    New,
    Incomplete,
    Ok,
    Updated,
    Missing,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LibraryStatus {
    #[default]
    Incomplete,
    Complete,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtistType {
    Person,
    Group,
    Orchestra,
    Choir,
    Character,
    Other,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReleaseType {
    Album,
    Single,
    Ep,
    Compilation,
    Live,
    Soundtrack,
    Broadcast,
    Other,
}

/// Cross-reference ids at the external metadata sources.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderIds {
    pub musicbrainz: Option<String>,
    pub itunes: Option<String>,
    pub discogs: Option<String>,
    pub spotify: Option<String>,
    pub amg: Option<String>,
    pub lastfm: Option<String>,
}

impl ProviderIds {
    /// Copies every id that is set on `other` but empty here. Returns true when
    /// anything changed.
    pub fn fill_missing(&mut self, other: &ProviderIds) -> bool {
        let mut changed = false;
        changed |= fill_text(&mut self.musicbrainz, &other.musicbrainz);
        changed |= fill_text(&mut self.itunes, &other.itunes);
        changed |= fill_text(&mut self.discogs, &other.discogs);
        changed |= fill_text(&mut self.spotify, &other.spotify);
        changed |= fill_text(&mut self.amg, &other.amg);
        changed |= fill_text(&mut self.lastfm, &other.lastfm);
        changed
    }

    pub fn is_empty(&self) -> bool {
        self.musicbrainz.is_none()
            && self.itunes.is_none()
            && self.discogs.is_none()
            && self.spotify.is_none()
            && self.amg.is_none()
            && self.lastfm.is_none()
    }
}

/// Sets `target` from `source` only when `target` holds no non-blank text.
pub fn fill_text(target: &mut Option<String>, source: &Option<String>) -> bool {
    if has_text(target) {
        return false;
    }
    match source {
        Some(value) if !value.trim().is_empty() => {
            *target = Some(value.trim().to_string());
            true
        }
        _ => false,
    }
}

pub fn fill_option<T: Clone>(target: &mut Option<T>, source: &Option<T>) -> bool {
    if target.is_some() || source.is_none() {
        return false;
    }
    *target = source.clone();
    true
}

pub fn has_text(value: &Option<String>) -> bool {
    value
        .as_ref()
        .map(|text| !text.trim().is_empty())
        .unwrap_or(false)
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Artist {
    pub id: u64,
    pub api_key: Uuid,
    pub name: String,
    pub sort_name: Option<String>,
    pub alternate_names: NameList,
    pub tags: NameList,
    pub urls: NameList,
    pub isni_list: NameList,
    pub ids: ProviderIds,
    pub artist_type: Option<ArtistType>,
    pub begin_date: Option<Date>,
    pub end_date: Option<Date>,
    pub profile: Option<String>,
    pub bio: Option<String>,
    pub thumbnail: Option<Vec<u8>>,
    pub status: Status,
    pub created: u64,
    pub last_updated: u64,
}

impl Artist {
    pub fn new(name: &str) -> Self {
        Self {
            id: 0,
            api_key: Uuid::new_v4(),
            name: name.trim().to_string(),
            sort_name: None,
            alternate_names: NameList::default(),
            tags: NameList::default(),
            urls: NameList::default(),
            isni_list: NameList::default(),
            ids: ProviderIds::default(),
            artist_type: None,
            begin_date: None,
            end_date: None,
            profile: None,
            bio: None,
            thumbnail: None,
            status: Status::New,
            created: 0,
            last_updated: 0,
        }
    }

    pub fn cache_region(&self) -> String {
        cache_region(EntityKind::Artist, self.id)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Release {
    pub id: u64,
    pub api_key: Uuid,
    pub artist_id: u64,
    pub title: String,
    pub alternate_names: NameList,
    pub tags: NameList,
    pub urls: NameList,
    pub release_date: Option<Date>,
    pub release_type: Option<ReleaseType>,
    pub profile: Option<String>,
    pub track_count: u32,
    pub media_count: u32,
    pub status: Status,
    pub library_status: LibraryStatus,
    pub ids: ProviderIds,
    pub thumbnail: Option<Vec<u8>>,
    pub created: u64,
    pub last_updated: u64,
}

impl Release {
    pub fn new(artist_id: u64, title: &str) -> Self {
        Self {
            id: 0,
            api_key: Uuid::new_v4(),
            artist_id,
            title: title.trim().to_string(),
            alternate_names: NameList::default(),
            tags: NameList::default(),
            urls: NameList::default(),
            release_date: None,
            release_type: None,
            profile: None,
            track_count: 0,
            media_count: 0,
            status: Status::New,
            library_status: LibraryStatus::Incomplete,
            ids: ProviderIds::default(),
            thumbnail: None,
            created: 0,
            last_updated: 0,
        }
    }

    pub fn year(&self) -> Option<i32> {
        self.release_date.map(|date| date.year())
    }

    pub fn cache_region(&self) -> String {
        cache_region(EntityKind::Release, self.id)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Media {
    pub id: u64,
    pub release_id: u64,
    pub media_number: u16,
    pub subtitle: Option<String>,
    pub track_count: u32,
    pub status: Status,
    pub created: u64,
    pub last_updated: u64,
}

impl Media {
    pub fn new(release_id: u64, media_number: u16) -> Self {
        Self {
            id: 0,
            release_id,
            media_number,
            subtitle: None,
            track_count: 0,
            status: Status::New,
            created: 0,
            last_updated: 0,
        }
    }

    pub fn cache_region(&self) -> String {
        cache_region(EntityKind::Media, self.id)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Track {
    pub id: u64,
    pub api_key: Uuid,
    pub media_id: u64,
    pub track_number: u16,
    pub title: String,
    pub duration_ms: u32,
    /// Folder holding the file, relative to the library root, `/` separated.
    pub file_path: String,
    pub file_name: String,
    pub file_size: u64,
    pub hash: Option<String>,
    /// Track-level artist override, set for compilations.
    pub artist_id: Option<u64>,
    pub ids: ProviderIds,
    pub status: Status,
    pub created: u64,
    pub last_updated: u64,
}

impl Track {
    pub fn new(media_id: u64, track_number: u16) -> Self {
        Self {
            id: 0,
            api_key: Uuid::new_v4(),
            media_id,
            track_number,
            title: String::new(),
            duration_ms: 0,
            file_path: String::new(),
            file_name: String::new(),
            file_size: 0,
            hash: None,
            artist_id: None,
            ids: ProviderIds::default(),
            status: Status::New,
            created: 0,
            last_updated: 0,
        }
    }

    pub fn relpath(&self) -> String {
        if self.file_path.is_empty() {
            self.file_name.clone()
        } else {
            format!("{}/{}", self.file_path.trim_end_matches('/'), self.file_name)
        }
    }

    pub fn full_path(&self, root: &Path) -> PathBuf {
        join_relpath(root, &self.relpath())
    }

    pub fn cache_region(&self) -> String {
        cache_region(EntityKind::Track, self.id)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Genre {
    pub id: u64,
    pub name: String,
    pub created: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Label {
    pub id: u64,
    pub name: String,
    pub ids: ProviderIds,
    pub created: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtistGenre {
    pub id: u64,
    pub artist_id: u64,
    pub genre_id: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseGenre {
    pub id: u64,
    pub release_id: u64,
    pub genre_id: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseLabel {
    pub id: u64,
    pub release_id: u64,
    pub label_id: u64,
    pub catalog_number: Option<String>,
    pub begin_date: Option<Date>,
    pub end_date: Option<Date>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImageOwner {
    Artist(u64),
    Release(u64),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Image {
    pub id: u64,
    pub owner: ImageOwner,
    pub url: Option<String>,
    pub bytes: Option<Vec<u8>>,
    pub caption: Option<String>,
    pub sort_order: u32,
    pub created: u64,
}

impl Image {
    pub fn from_url(owner: ImageOwner, url: &str, sort_order: u32) -> Self {
        Self {
            id: 0,
            owner,
            url: Some(url.trim().to_string()),
            bytes: None,
            caption: None,
            sort_order,
            created: 0,
        }
    }

    pub fn from_bytes(owner: ImageOwner, bytes: Vec<u8>, sort_order: u32) -> Self {
        Self {
            id: 0,
            owner,
            url: None,
            bytes: Some(bytes),
            caption: None,
            sort_order,
            created: 0,
        }
    }

    /// Identity used to detect the same image attached twice.
    pub fn signature(&self) -> String {
        match (&self.url, &self.bytes) {
            (Some(url), _) => format!("url:{}", url.trim().to_lowercase()),
            (None, Some(bytes)) => format!("bytes:{}", stable_id_bytes(bytes)),
            (None, None) => format!("id:{}", self.id),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtistAssociation {
    pub id: u64,
    pub artist_id: u64,
    pub associated_artist_id: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RatingTarget {
    Artist(u64),
    Release(u64),
    Track(u64),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRating {
    pub id: u64,
    pub user_id: u64,
    pub target: RatingTarget,
    pub rating: u8,
    pub is_favorite: bool,
    pub played_count: u32,
    pub last_played: Option<u64>,
}

pub fn cache_region(kind: EntityKind, id: u64) -> String {
    format!("urn:{}_by_id:{}", kind.as_str(), id)
}

pub fn stable_id(input: &str) -> String {
    blake3::hash(input.as_bytes()).to_hex().to_string()
}

pub fn stable_id_bytes(input: &[u8]) -> String {
    blake3::hash(input).to_hex().to_string()
}

/// Parses `YYYY`, `YYYY-MM`, `YYYY-MM-DD` and timestamps starting with a date.
/// Missing month or day default to the first.
pub fn parse_partial_date(text: &str) -> Option<Date> {
    let head = text.trim().split(['T', ' ']).next()?;
    let mut parts = head.split(['-', '/', '.']);
    let year: i32 = parts.next()?.trim().parse().ok()?;
    if !(1..=9999).contains(&year) {
        return None;
    }
    let month = match parts.next() {
        Some(value) => value.trim().parse::<u8>().ok()?,
        None => 1,
    };
    let day = match parts.next() {
        Some(value) => value.trim().parse::<u8>().ok()?,
        None => 1,
    };
    let month = Month::try_from(month.max(1)).ok()?;
    Date::from_calendar_date(year, month, day.max(1)).ok()
}

pub fn relpath_from(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    Some(path_to_slash_string(rel))
}

pub fn join_relpath(root: &Path, relpath: &str) -> PathBuf {
    let mut out = PathBuf::from(root);
    for part in relpath.split('/') {
        if part.is_empty() {
            continue;
        }
        out.push(part);
    }
    out
}

/// Makes `name` safe to use as a single path component.
pub fn sanitize_path_component(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_space = false;
    for ch in name.chars() {
        let mapped = match ch {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        };
        if mapped.is_whitespace() {
            if !last_space {
                out.push(' ');
            }
            last_space = true;
        } else {
            out.push(mapped);
            last_space = false;
        }
    }
    let trimmed = out.trim().trim_end_matches(['.', ' ']).to_string();
    if trimmed.is_empty() {
        "_".to_string()
    } else {
        trimmed
    }
}

fn path_to_slash_string(path: &Path) -> String {
    let parts: Vec<String> = path
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect();
    parts.join("/")
}

#[cfg(test)]
mod tests {
    use super::{
        cache_region, parse_partial_date, sanitize_path_component, stable_id, EntityKind,
        ProviderIds, Track,
    };
    use time::Month;

    #[test]
    fn stable_id_is_deterministic() {
        let first = stable_id("Artist/Album/Track.mp3");
        let second = stable_id("Artist/Album/Track.mp3");
        assert_eq!(first, second);
        assert_ne!(first, stable_id("Artist/Album/Track2.mp3"));
    }

    #[test]
    fn parses_partial_dates() {
        let year = parse_partial_date("1994").unwrap();
        assert_eq!((year.year(), year.month(), year.day()), (1994, Month::January, 1));
        let month = parse_partial_date("1994-07").unwrap();
        assert_eq!(month.month(), Month::July);
        let full = parse_partial_date("1994-07-21T00:00:00Z").unwrap();
        assert_eq!(full.day(), 21);
        assert!(parse_partial_date("").is_none());
        assert!(parse_partial_date("unknown").is_none());
        assert!(parse_partial_date("1994-13-01").is_none());
    }

    #[test]
    fn sanitizes_path_components() {
        assert_eq!(sanitize_path_component("AC/DC"), "AC_DC");
        assert_eq!(sanitize_path_component("What?  Now..."), "What_ Now");
        assert_eq!(sanitize_path_component("   "), "_");
    }

    #[test]
    fn provider_ids_fill_only_missing() {
        let mut ids = ProviderIds {
            musicbrainz: Some("mb-1".to_string()),
            ..ProviderIds::default()
        };
        let other = ProviderIds {
            musicbrainz: Some("mb-2".to_string()),
            spotify: Some("sp-1".to_string()),
            ..ProviderIds::default()
        };
        assert!(ids.fill_missing(&other));
        assert_eq!(ids.musicbrainz.as_deref(), Some("mb-1"));
        assert_eq!(ids.spotify.as_deref(), Some("sp-1"));
        assert!(!ids.fill_missing(&other));
    }

    #[test]
    fn track_relpath_joins_folder_and_name() {
        let mut track = Track::new(1, 1);
        track.file_path = "Artist/Release".to_string();
        track.file_name = "01 Song.mp3".to_string();
        assert_eq!(track.relpath(), "Artist/Release/01 Song.mp3");
        assert_eq!(cache_region(EntityKind::Release, 7), "urn:release_by_id:7");
    }
}
