use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::ProviderIds;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use time::Date;

mod aggregate;
mod discogs;
mod http;
mod images;
mod itunes;
mod kinds;
mod lastfm;
mod musicbrainz;
mod spotify;
mod wikipedia;

pub use aggregate::{
    merge_artist_results, merge_release_results, AggregateSettings, Aggregator,
    ArtistEnrichment, ReleaseEnrichment,
};
pub use discogs::DiscogsProvider;
pub use images::{
    convert_to_standard_format, prepare_thumbnail, resize, HttpImageFetcher, ImageFetcher,
};
pub use itunes::ItunesProvider;
pub use kinds::{canonical_artist_type, canonical_release_type};
pub use lastfm::LastFmProvider;
pub use musicbrainz::MusicBrainzProvider;
pub use spotify::SpotifyProvider;
pub use wikipedia::WikipediaProvider;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Itunes,
    MusicBrainz,
    LastFm,
    Spotify,
    Discogs,
    Wikipedia,
}

impl ProviderKind {
    /// Merge precedence, best first.
    pub const PRIORITY: [ProviderKind; 6] = [
        ProviderKind::Itunes,
        ProviderKind::MusicBrainz,
        ProviderKind::LastFm,
        ProviderKind::Spotify,
        ProviderKind::Discogs,
        ProviderKind::Wikipedia,
    ];

    pub fn priority(self) -> usize {
        Self::PRIORITY
            .iter()
            .position(|kind| *kind == self)
            .unwrap_or(Self::PRIORITY.len())
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::Itunes => "itunes",
            ProviderKind::MusicBrainz => "musicbrainz",
            ProviderKind::LastFm => "lastfm",
            ProviderKind::Spotify => "spotify",
            ProviderKind::Discogs => "discogs",
            ProviderKind::Wikipedia => "wikipedia",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn provider_from_str(value: &str) -> Option<ProviderKind> {
    match value.trim().to_ascii_lowercase().as_str() {
        "itunes" | "apple" => Some(ProviderKind::Itunes),
        "musicbrainz" | "music_brainz" | "mb" => Some(ProviderKind::MusicBrainz),
        "lastfm" | "last_fm" | "last.fm" => Some(ProviderKind::LastFm),
        "spotify" => Some(ProviderKind::Spotify),
        "discogs" => Some(ProviderKind::Discogs),
        "wikipedia" | "wiki" => Some(ProviderKind::Wikipedia),
        _ => None,
    }
}

#[derive(Clone, Debug)]
pub struct ProviderSettings {
    pub kind: ProviderKind,
    pub enabled: bool,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub user_agent: Option<String>,
    pub timeout: Duration,
}

impl ProviderSettings {
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            enabled: true,
            api_key: None,
            api_secret: None,
            user_agent: None,
            timeout: Duration::from_secs(8),
        }
    }

    pub(crate) fn api_key(&self) -> Option<&str> {
        non_blank(&self.api_key)
    }

    pub(crate) fn api_secret(&self) -> Option<&str> {
        non_blank(&self.api_secret)
    }

    pub(crate) fn user_agent(&self) -> Option<&str> {
        non_blank(&self.user_agent)
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

#[derive(Debug)]
pub enum ProviderError {
    Disabled,
    Http(String),
    Status(u16),
    Decode(String),
    Timeout,
    Image(String),
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderError::Disabled => write!(f, "provider is disabled"),
            ProviderError::Http(err) => write!(f, "http error: {}", err),
            ProviderError::Status(code) => write!(f, "http {}", code),
            ProviderError::Decode(err) => write!(f, "decode error: {}", err),
            ProviderError::Timeout => write!(f, "timed out"),
            ProviderError::Image(err) => write!(f, "image error: {}", err),
        }
    }
}

impl std::error::Error for ProviderError {}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout
        } else if err.is_decode() {
            ProviderError::Decode(err.to_string())
        } else {
            ProviderError::Http(err.to_string())
        }
    }
}

impl From<image::ImageError> for ProviderError {
    fn from(err: image::ImageError) -> Self {
        ProviderError::Image(err.to_string())
    }
}

/// A provider call that failed; kept next to whatever the others returned.
#[derive(Debug)]
pub struct ProviderFailure {
    pub provider: ProviderKind,
    pub error: ProviderError,
}

impl fmt::Display for ProviderFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.provider, self.error)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ArtistSearchResult {
    pub name: Option<String>,
    pub sort_name: Option<String>,
    /// Free text as the provider reports it; canonicalised when merged.
    pub artist_type: Option<String>,
    pub begin_date: Option<Date>,
    pub end_date: Option<Date>,
    pub profile: Option<String>,
    pub bio: Option<String>,
    pub ids: ProviderIds,
    pub thumbnail_url: Option<String>,
    pub alternate_names: Vec<String>,
    pub tags: Vec<String>,
    pub urls: Vec<String>,
    pub isni_list: Vec<String>,
    pub image_urls: Vec<String>,
    pub genres: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LabelResult {
    pub name: String,
    pub catalog_number: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReleaseSearchResult {
    pub title: Option<String>,
    pub release_type: Option<String>,
    pub release_date: Option<Date>,
    pub profile: Option<String>,
    pub ids: ProviderIds,
    pub thumbnail_url: Option<String>,
    pub alternate_names: Vec<String>,
    pub tags: Vec<String>,
    pub urls: Vec<String>,
    pub image_urls: Vec<String>,
    pub genres: Vec<String>,
    pub labels: Vec<LabelResult>,
    pub track_count: Option<u32>,
}

/// One external metadata source.
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    fn is_enabled(&self) -> bool;

    async fn search_artist(
        &self,
        name: &str,
        max_results: usize,
    ) -> Result<Vec<ArtistSearchResult>, ProviderError>;

    async fn search_release(
        &self,
        artist: &str,
        title: &str,
        max_results: usize,
    ) -> Result<Vec<ReleaseSearchResult>, ProviderError>;
}

/// Builds one client per configured source, sharing one HTTP client.
pub fn build_providers(
    client: &Client,
    settings: &[ProviderSettings],
) -> Vec<Arc<dyn MetadataProvider>> {
    settings
        .iter()
        .map(|source| -> Arc<dyn MetadataProvider> {
            let client = client.clone();
            let source = source.clone();
            match source.kind {
                ProviderKind::Itunes => Arc::new(ItunesProvider::new(client, source)),
                ProviderKind::MusicBrainz => Arc::new(MusicBrainzProvider::new(client, source)),
                ProviderKind::LastFm => Arc::new(LastFmProvider::new(client, source)),
                ProviderKind::Spotify => Arc::new(SpotifyProvider::new(client, source)),
                ProviderKind::Discogs => Arc::new(DiscogsProvider::new(client, source)),
                ProviderKind::Wikipedia => Arc::new(WikipediaProvider::new(client, source)),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{provider_from_str, ProviderKind};

    #[test]
    fn priority_follows_fixed_order() {
        assert_eq!(ProviderKind::Itunes.priority(), 0);
        assert_eq!(ProviderKind::Wikipedia.priority(), 5);
        assert!(ProviderKind::MusicBrainz.priority() < ProviderKind::Discogs.priority());
    }

    #[test]
    fn parses_provider_names() {
        assert_eq!(provider_from_str(" Last.fm "), Some(ProviderKind::LastFm));
        assert_eq!(provider_from_str("mb"), Some(ProviderKind::MusicBrainz));
        assert_eq!(provider_from_str("theaudiodb"), None);
    }
}
