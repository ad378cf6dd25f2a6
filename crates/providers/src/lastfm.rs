use std::time::Duration;

use async_trait::async_trait;
use common::ProviderIds;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;

use crate::http::{clean_text, get_json, push_unique, strip_html, url_escape, RateLimiter};
use crate::{
    ArtistSearchResult, MetadataProvider, ProviderError, ProviderKind, ProviderSettings,
    ReleaseSearchResult,
};

const API_URL: &str = "https://ws.audioscrobbler.com/2.0/";
/// Last.fm answers lookups for unknown names with this code.
const NOT_FOUND: i64 = 6;

pub struct LastFmProvider {
    client: Client,
    settings: ProviderSettings,
    limiter: RateLimiter,
}

impl LastFmProvider {
    pub fn new(client: Client, settings: ProviderSettings) -> Self {
        Self {
            client,
            settings,
            limiter: RateLimiter::new(Duration::from_millis(200)),
        }
    }

    async fn call(&self, method: &str, params: &[(&str, &str)]) -> Result<Envelope, ProviderError> {
        let api_key = self.settings.api_key().ok_or(ProviderError::Disabled)?;
        let mut url = format!(
            "{}?method={}&api_key={}&format=json&autocorrect=1",
            API_URL,
            method,
            url_escape(api_key)
        );
        for (name, value) in params {
            url.push_str(&format!("&{}={}", name, url_escape(value)));
        }
        self.limiter.wait().await;
        get_json(self.client.get(&url).timeout(self.settings.timeout)).await
    }
}

#[derive(Deserialize)]
struct Envelope {
    error: Option<i64>,
    message: Option<String>,
    artist: Option<LfArtist>,
    album: Option<LfAlbum>,
}

impl Envelope {
    /// Service errors arrive with a 200 status; "not found" is just no result.
    fn check(&self) -> Result<bool, ProviderError> {
        match self.error {
            None => Ok(true),
            Some(NOT_FOUND) => Ok(false),
            Some(code) => Err(ProviderError::Decode(format!(
                "last.fm error {}: {}",
                code,
                self.message.as_deref().unwrap_or("")
            ))),
        }
    }
}

#[derive(Deserialize)]
struct LfArtist {
    name: Option<String>,
    mbid: Option<String>,
    url: Option<String>,
    #[serde(default)]
    image: Vec<LfImage>,
    #[serde(default)]
    tags: Value,
    bio: Option<LfText>,
}

#[derive(Deserialize)]
struct LfAlbum {
    name: Option<String>,
    mbid: Option<String>,
    url: Option<String>,
    #[serde(default)]
    image: Vec<LfImage>,
    #[serde(default)]
    tags: Value,
    #[serde(default)]
    tracks: Value,
    wiki: Option<LfText>,
}

#[derive(Deserialize)]
struct LfImage {
    #[serde(rename = "#text")]
    url: Option<String>,
    size: Option<String>,
}

#[derive(Deserialize)]
struct LfText {
    summary: Option<String>,
    content: Option<String>,
}

/// `{"tag": [..]}`, `{"tag": {..}}` or `""` when there are none.
fn tag_names(tags: &Value) -> Vec<String> {
    let mut out = Vec::new();
    for tag in one_or_many(tags.get("tag")) {
        if let Some(name) = tag.get("name").and_then(Value::as_str) {
            push_unique(&mut out, name);
        }
    }
    out
}

fn track_count(tracks: &Value) -> Option<u32> {
    let count = one_or_many(tracks.get("track")).len();
    u32::try_from(count).ok().filter(|count| *count > 0)
}

fn one_or_many(value: Option<&Value>) -> Vec<&Value> {
    match value {
        Some(Value::Array(items)) => items.iter().collect(),
        Some(item) if item.is_object() => vec![item],
        _ => Vec::new(),
    }
}

/// Largest rendition first; Last.fm lists them small to large.
fn image_urls(images: &[LfImage]) -> Vec<String> {
    let mut out = Vec::new();
    for image in images.iter().rev() {
        if image.size.as_deref() == Some("small") {
            continue;
        }
        if let Some(url) = image.url.as_deref() {
            push_unique(&mut out, url);
        }
    }
    out
}

fn text(body: Option<&LfText>) -> Option<String> {
    let body = body?;
    let raw = clean_text(body.content.clone()).or_else(|| clean_text(body.summary.clone()))?;
    clean_text(Some(strip_html(&raw)))
}

fn artist_result(item: LfArtist) -> ArtistSearchResult {
    let tags = tag_names(&item.tags);
    ArtistSearchResult {
        name: clean_text(item.name),
        bio: text(item.bio.as_ref()),
        ids: ProviderIds {
            musicbrainz: clean_text(item.mbid),
            lastfm: clean_text(item.url.clone()),
            ..ProviderIds::default()
        },
        urls: clean_text(item.url).into_iter().collect(),
        image_urls: image_urls(&item.image),
        genres: tags.clone(),
        tags,
        ..ArtistSearchResult::default()
    }
}

fn release_result(item: LfAlbum) -> ReleaseSearchResult {
    let tags = tag_names(&item.tags);
    ReleaseSearchResult {
        title: clean_text(item.name),
        profile: text(item.wiki.as_ref()),
        ids: ProviderIds {
            musicbrainz: clean_text(item.mbid),
            lastfm: clean_text(item.url.clone()),
            ..ProviderIds::default()
        },
        urls: clean_text(item.url).into_iter().collect(),
        image_urls: image_urls(&item.image),
        track_count: track_count(&item.tracks),
        genres: tags.clone(),
        tags,
        ..ReleaseSearchResult::default()
    }
}

#[async_trait]
impl MetadataProvider for LastFmProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::LastFm
    }

    fn is_enabled(&self) -> bool {
        self.settings.enabled && self.settings.api_key().is_some()
    }

    /// `getinfo` returns a single best match, so `max_results` is moot.
    async fn search_artist(
        &self,
        name: &str,
        _max_results: usize,
    ) -> Result<Vec<ArtistSearchResult>, ProviderError> {
        let envelope = self.call("artist.getinfo", &[("artist", name)]).await?;
        if !envelope.check()? {
            return Ok(Vec::new());
        }
        Ok(envelope.artist.map(artist_result).into_iter().collect())
    }

    async fn search_release(
        &self,
        artist: &str,
        title: &str,
        _max_results: usize,
    ) -> Result<Vec<ReleaseSearchResult>, ProviderError> {
        let envelope = self
            .call("album.getinfo", &[("artist", artist), ("album", title)])
            .await?;
        if !envelope.check()? {
            return Ok(Vec::new());
        }
        Ok(envelope.album.map(release_result).into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{artist_result, release_result, Envelope};
    use crate::ProviderError;

    #[test]
    fn parses_artist_info() {
        let payload = json!({
            "artist": {
                "name": "Portishead",
                "mbid": "8f6bd1e4-fbe1-4f50-aa9b-94c450ec0f11",
                "url": "https://www.last.fm/music/Portishead",
                "image": [
                    { "#text": "https://img/s.png", "size": "small" },
                    { "#text": "https://img/m.png", "size": "medium" },
                    { "#text": "https://img/xl.png", "size": "extralarge" }
                ],
                "tags": { "tag": [{ "name": "trip-hop" }, { "name": "electronic" }] },
                "bio": {
                    "summary": "short",
                    "content": "Portishead are a band from <b>Bristol</b>. <a href=\"https://www.last.fm\">Read more on Last.fm</a>"
                }
            }
        });
        let envelope: Envelope = serde_json::from_value(payload).unwrap();
        assert!(envelope.check().unwrap());
        let artist = artist_result(envelope.artist.unwrap());
        assert_eq!(
            artist.bio.as_deref(),
            Some("Portishead are a band from Bristol. Read more on Last.fm")
        );
        assert_eq!(artist.image_urls, vec!["https://img/xl.png", "https://img/m.png"]);
        assert_eq!(artist.tags, vec!["trip-hop", "electronic"]);
        assert_eq!(
            artist.ids.musicbrainz.as_deref(),
            Some("8f6bd1e4-fbe1-4f50-aa9b-94c450ec0f11")
        );
    }

    #[test]
    fn tolerates_empty_tags_and_single_track() {
        let payload = json!({
            "album": {
                "name": "Single Thing",
                "artist": "Someone",
                "mbid": "",
                "tags": "",
                "tracks": { "track": { "name": "Only", "duration": 200 } },
                "wiki": { "summary": "  " }
            }
        });
        let envelope: Envelope = serde_json::from_value(payload).unwrap();
        let album = release_result(envelope.album.unwrap());
        assert!(album.tags.is_empty());
        assert_eq!(album.track_count, Some(1));
        assert!(album.profile.is_none());
        assert!(album.ids.musicbrainz.is_none());
    }

    #[test]
    fn not_found_is_an_empty_result_and_other_errors_fail() {
        let missing: Envelope = serde_json::from_value(json!({
            "error": 6,
            "message": "The artist you supplied could not be found"
        }))
        .unwrap();
        assert!(!missing.check().unwrap());

        let bad_key: Envelope =
            serde_json::from_value(json!({ "error": 10, "message": "Invalid API key" })).unwrap();
        assert!(matches!(bad_key.check(), Err(ProviderError::Decode(_))));
    }
}
