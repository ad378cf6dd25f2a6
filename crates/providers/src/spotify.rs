use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use common::{parse_partial_date, ProviderIds};
use parking_lot::Mutex;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::http::{clean_text, get_json, push_unique, url_escape};
use crate::{
    ArtistSearchResult, MetadataProvider, ProviderError, ProviderKind, ProviderSettings,
    ReleaseSearchResult,
};

const TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
const SEARCH_URL: &str = "https://api.spotify.com/v1/search";
/// Renew this long before the service would expire the token.
const TOKEN_SLACK: Duration = Duration::from_secs(60);

struct CachedToken {
    value: String,
    expires_at: Instant,
}

/// Spotify Web API with the client-credentials flow; needs key and secret.
pub struct SpotifyProvider {
    client: Client,
    settings: ProviderSettings,
    token: Mutex<Option<CachedToken>>,
}

impl SpotifyProvider {
    pub fn new(client: Client, settings: ProviderSettings) -> Self {
        Self {
            client,
            settings,
            token: Mutex::new(None),
        }
    }

    async fn access_token(&self) -> Result<String, ProviderError> {
        let cached = self
            .token
            .lock()
            .as_ref()
            .filter(|cached| cached.expires_at > Instant::now())
            .map(|cached| cached.value.clone());
        if let Some(value) = cached {
            return Ok(value);
        }
        let key = self.settings.api_key().ok_or(ProviderError::Disabled)?;
        let secret = self.settings.api_secret().ok_or(ProviderError::Disabled)?;
        let token: TokenResponse = get_json(
            self.client
                .post(TOKEN_URL)
                .timeout(self.settings.timeout)
                .basic_auth(key, Some(secret))
                .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body("grant_type=client_credentials"),
        )
        .await?;
        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(TOKEN_SLACK);
        debug!("Spotify token renewed for {}s", lifetime.as_secs());
        *self.token.lock() = Some(CachedToken {
            value: token.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });
        Ok(token.access_token)
    }

    async fn search<T: for<'de> Deserialize<'de>>(
        &self,
        kind: &str,
        query: &str,
        limit: usize,
    ) -> Result<T, ProviderError> {
        let token = self.access_token().await?;
        let url = format!(
            "{}?q={}&type={}&limit={}",
            SEARCH_URL,
            url_escape(query),
            kind,
            limit.clamp(1, 50)
        );
        get_json(
            self.client
                .get(&url)
                .timeout(self.settings.timeout)
                .bearer_auth(token),
        )
        .await
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expiry")]
    expires_in: u64,
}

fn default_expiry() -> u64 {
    3600
}

#[derive(Deserialize)]
struct ArtistSearch {
    artists: Option<Page<SpArtist>>,
}

#[derive(Deserialize)]
struct AlbumSearch {
    albums: Option<Page<SpAlbum>>,
}

#[derive(Deserialize)]
struct Page<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

#[derive(Deserialize)]
struct SpArtist {
    id: String,
    name: Option<String>,
    #[serde(default)]
    genres: Vec<String>,
    #[serde(default)]
    images: Vec<SpImage>,
    #[serde(default)]
    external_urls: HashMap<String, String>,
}

#[derive(Deserialize)]
struct SpAlbum {
    id: String,
    name: Option<String>,
    album_type: Option<String>,
    release_date: Option<String>,
    total_tracks: Option<u32>,
    #[serde(default)]
    images: Vec<SpImage>,
    #[serde(default)]
    external_urls: HashMap<String, String>,
}

#[derive(Deserialize)]
struct SpImage {
    url: String,
    width: Option<u32>,
}

/// Widest first.
fn image_urls(images: &[SpImage]) -> Vec<String> {
    let mut sorted: Vec<&SpImage> = images.iter().collect();
    sorted.sort_by(|a, b| b.width.unwrap_or(0).cmp(&a.width.unwrap_or(0)));
    let mut out = Vec::new();
    for image in sorted {
        push_unique(&mut out, &image.url);
    }
    out
}

fn artist_result(item: SpArtist) -> ArtistSearchResult {
    let images = image_urls(&item.images);
    let mut genres = Vec::new();
    for genre in &item.genres {
        push_unique(&mut genres, genre);
    }
    ArtistSearchResult {
        name: clean_text(item.name),
        ids: ProviderIds {
            spotify: Some(item.id),
            ..ProviderIds::default()
        },
        thumbnail_url: images.first().cloned(),
        image_urls: images,
        urls: item.external_urls.into_values().collect(),
        genres,
        ..ArtistSearchResult::default()
    }
}

fn release_result(item: SpAlbum) -> ReleaseSearchResult {
    let images = image_urls(&item.images);
    ReleaseSearchResult {
        title: clean_text(item.name),
        release_type: clean_text(item.album_type),
        release_date: item.release_date.as_deref().and_then(parse_partial_date),
        ids: ProviderIds {
            spotify: Some(item.id),
            ..ProviderIds::default()
        },
        thumbnail_url: images.first().cloned(),
        image_urls: images,
        urls: item.external_urls.into_values().collect(),
        track_count: item.total_tracks.filter(|count| *count > 0),
        ..ReleaseSearchResult::default()
    }
}

#[async_trait]
impl MetadataProvider for SpotifyProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Spotify
    }

    fn is_enabled(&self) -> bool {
        self.settings.enabled
            && self.settings.api_key().is_some()
            && self.settings.api_secret().is_some()
    }

    async fn search_artist(
        &self,
        name: &str,
        max_results: usize,
    ) -> Result<Vec<ArtistSearchResult>, ProviderError> {
        let response: ArtistSearch = self.search("artist", name, max_results).await?;
        Ok(response
            .artists
            .map(|page| page.items)
            .unwrap_or_default()
            .into_iter()
            .map(artist_result)
            .collect())
    }

    async fn search_release(
        &self,
        artist: &str,
        title: &str,
        max_results: usize,
    ) -> Result<Vec<ReleaseSearchResult>, ProviderError> {
        let query = format!("album:{} artist:{}", title, artist);
        let response: AlbumSearch = self.search("album", &query, max_results).await?;
        Ok(response
            .albums
            .map(|page| page.items)
            .unwrap_or_default()
            .into_iter()
            .map(release_result)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use reqwest::Client;
    use serde_json::json;

    use super::{artist_result, release_result, AlbumSearch, ArtistSearch, SpotifyProvider};
    use crate::{MetadataProvider, ProviderKind, ProviderSettings};

    #[test]
    fn parses_artist_search() {
        let payload = json!({
            "artists": {
                "href": "https://api.spotify.com/v1/search?query=low",
                "items": [{
                    "id": "3k6OKZ7zFCLdWS4QQq9ZPF",
                    "name": "Low",
                    "type": "artist",
                    "genres": ["slowcore", "Slowcore", "indie rock"],
                    "images": [
                        { "url": "https://i.scdn.co/small", "width": 160, "height": 160 },
                        { "url": "https://i.scdn.co/large", "width": 640, "height": 640 }
                    ],
                    "external_urls": { "spotify": "https://open.spotify.com/artist/3k6OKZ7zFCLdWS4QQq9ZPF" }
                }]
            }
        });
        let response: ArtistSearch = serde_json::from_value(payload).unwrap();
        let artist = artist_result(response.artists.unwrap().items.remove(0));
        assert_eq!(artist.genres, vec!["slowcore", "indie rock"]);
        assert_eq!(artist.thumbnail_url.as_deref(), Some("https://i.scdn.co/large"));
        assert_eq!(artist.image_urls.len(), 2);
        assert_eq!(artist.ids.spotify.as_deref(), Some("3k6OKZ7zFCLdWS4QQq9ZPF"));
        assert!(artist.artist_type.is_none());
    }

    #[test]
    fn parses_album_search_with_partial_dates() {
        let payload = json!({
            "albums": {
                "items": [{
                    "id": "1",
                    "name": "Things We Lost in the Fire",
                    "album_type": "album",
                    "release_date": "2001",
                    "release_date_precision": "year",
                    "total_tracks": 13
                }]
            }
        });
        let response: AlbumSearch = serde_json::from_value(payload).unwrap();
        let album = release_result(response.albums.unwrap().items.remove(0));
        assert_eq!(album.release_type.as_deref(), Some("album"));
        assert_eq!(album.release_date.map(|d| d.year()), Some(2001));
        assert_eq!(album.track_count, Some(13));
        assert!(album.thumbnail_url.is_none());
    }

    #[test]
    fn needs_key_and_secret() {
        let mut settings = ProviderSettings::new(ProviderKind::Spotify);
        settings.api_key = Some("id".to_string());
        assert!(!SpotifyProvider::new(Client::new(), settings.clone()).is_enabled());
        settings.api_secret = Some("secret".to_string());
        assert!(SpotifyProvider::new(Client::new(), settings).is_enabled());
    }
}
