use async_trait::async_trait;
use common::{parse_partial_date, ProviderIds};
use reqwest::Client;
use serde::Deserialize;

use crate::http::{clean_text, collect_genres, get_json, url_escape};
use crate::{
    ArtistSearchResult, MetadataProvider, ProviderError, ProviderKind, ProviderSettings,
    ReleaseSearchResult,
};

const SEARCH_URL: &str = "https://itunes.apple.com/search";

/// Apple's public search API. Needs no credentials.
pub struct ItunesProvider {
    client: Client,
    settings: ProviderSettings,
}

impl ItunesProvider {
    pub fn new(client: Client, settings: ProviderSettings) -> Self {
        Self { client, settings }
    }

    async fn search<T: for<'de> Deserialize<'de>>(
        &self,
        entity: &str,
        term: &str,
        limit: usize,
    ) -> Result<ItunesResponse<T>, ProviderError> {
        let url = format!(
            "{}?term={}&media=music&entity={}&limit={}",
            SEARCH_URL,
            url_escape(term),
            entity,
            limit.max(1)
        );
        get_json(self.client.get(&url).timeout(self.settings.timeout)).await
    }
}

#[derive(Deserialize)]
struct ItunesResponse<T> {
    #[serde(default = "Vec::new")]
    results: Vec<T>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItunesArtist {
    artist_id: Option<u64>,
    artist_name: Option<String>,
    artist_link_url: Option<String>,
    primary_genre_name: Option<String>,
    amg_artist_id: Option<u64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItunesAlbum {
    collection_id: Option<u64>,
    collection_name: Option<String>,
    artist_name: Option<String>,
    collection_type: Option<String>,
    release_date: Option<String>,
    primary_genre_name: Option<String>,
    track_count: Option<u32>,
    artwork_url100: Option<String>,
    collection_view_url: Option<String>,
    copyright: Option<String>,
}

fn artist_result(item: ItunesArtist) -> Option<ArtistSearchResult> {
    let name = clean_text(item.artist_name)?;
    Some(ArtistSearchResult {
        name: Some(name),
        ids: ProviderIds {
            itunes: item.artist_id.map(|id| id.to_string()),
            amg: item.amg_artist_id.map(|id| id.to_string()),
            ..ProviderIds::default()
        },
        urls: clean_text(item.artist_link_url).into_iter().collect(),
        genres: collect_genres(&[item.primary_genre_name]),
        ..ArtistSearchResult::default()
    })
}

/// Artwork URLs carry their size; ask for a larger rendition.
fn large_artwork(url: &str) -> String {
    url.replace("100x100", "600x600")
}

fn release_result(item: ItunesAlbum) -> Option<ReleaseSearchResult> {
    let title = clean_text(item.collection_name)?;
    let artwork = clean_text(item.artwork_url100).map(|url| large_artwork(&url));
    Some(ReleaseSearchResult {
        title: Some(title),
        release_type: clean_text(item.collection_type),
        release_date: item.release_date.as_deref().and_then(parse_partial_date),
        profile: clean_text(item.copyright),
        ids: ProviderIds {
            itunes: item.collection_id.map(|id| id.to_string()),
            ..ProviderIds::default()
        },
        thumbnail_url: artwork.clone(),
        image_urls: artwork.into_iter().collect(),
        urls: clean_text(item.collection_view_url).into_iter().collect(),
        genres: collect_genres(&[item.primary_genre_name]),
        track_count: item.track_count.filter(|count| *count > 0),
        ..ReleaseSearchResult::default()
    })
}

/// Albums by the requested artist first, keeping the service's order otherwise.
fn releases_for_artist(artist: &str, items: Vec<ItunesAlbum>) -> Vec<ReleaseSearchResult> {
    let (mut matching, others): (Vec<_>, Vec<_>) = items.into_iter().partition(|item| {
        item.artist_name
            .as_deref()
            .map(|name| name.trim().eq_ignore_ascii_case(artist.trim()))
            .unwrap_or(false)
    });
    matching.extend(others);
    matching.into_iter().filter_map(release_result).collect()
}

#[async_trait]
impl MetadataProvider for ItunesProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Itunes
    }

    fn is_enabled(&self) -> bool {
        self.settings.enabled
    }

    async fn search_artist(
        &self,
        name: &str,
        max_results: usize,
    ) -> Result<Vec<ArtistSearchResult>, ProviderError> {
        let response: ItunesResponse<ItunesArtist> =
            self.search("musicArtist", name, max_results).await?;
        Ok(response
            .results
            .into_iter()
            .filter_map(artist_result)
            .collect())
    }

    async fn search_release(
        &self,
        artist: &str,
        title: &str,
        max_results: usize,
    ) -> Result<Vec<ReleaseSearchResult>, ProviderError> {
        let term = format!("{} {}", artist, title);
        let response: ItunesResponse<ItunesAlbum> =
            self.search("album", &term, max_results).await?;
        Ok(releases_for_artist(artist, response.results))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{artist_result, releases_for_artist, ItunesAlbum, ItunesArtist, ItunesResponse};

    #[test]
    fn parses_artist_payload() {
        let payload = json!({
            "resultCount": 1,
            "results": [{
                "wrapperType": "artist",
                "artistName": "Radiohead",
                "artistLinkUrl": "https://music.apple.com/us/artist/radiohead/657515",
                "artistId": 657515,
                "amgArtistId": 41092,
                "primaryGenreName": "Alternative"
            }]
        });
        let response: ItunesResponse<ItunesArtist> = serde_json::from_value(payload).unwrap();
        let results: Vec<_> = response.results.into_iter().filter_map(artist_result).collect();
        assert_eq!(results.len(), 1);
        let artist = &results[0];
        assert_eq!(artist.name.as_deref(), Some("Radiohead"));
        assert_eq!(artist.ids.itunes.as_deref(), Some("657515"));
        assert_eq!(artist.ids.amg.as_deref(), Some("41092"));
        assert_eq!(artist.genres, vec!["Alternative"]);
        assert_eq!(artist.urls.len(), 1);
    }

    #[test]
    fn parses_album_payload_and_prefers_matching_artist() {
        let payload = json!({
            "results": [
                {
                    "collectionId": 1,
                    "collectionName": "OK Computer (Tribute)",
                    "artistName": "Various Artists",
                    "collectionType": "Album"
                },
                {
                    "collectionId": 1097861387,
                    "collectionName": "OK Computer",
                    "artistName": "Radiohead",
                    "collectionType": "Album",
                    "releaseDate": "1997-05-21T07:00:00Z",
                    "primaryGenreName": "Alternative",
                    "trackCount": 12,
                    "artworkUrl100": "https://is1.mzstatic.com/image/100x100bb.jpg",
                    "copyright": "℗ 1997 XL Recordings"
                }
            ]
        });
        let response: ItunesResponse<ItunesAlbum> = serde_json::from_value(payload).unwrap();
        let results = releases_for_artist("radiohead", response.results);
        assert_eq!(results.len(), 2);
        let album = &results[0];
        assert_eq!(album.title.as_deref(), Some("OK Computer"));
        assert_eq!(album.track_count, Some(12));
        assert_eq!(album.release_date.map(|d| d.year()), Some(1997));
        assert_eq!(
            album.thumbnail_url.as_deref(),
            Some("https://is1.mzstatic.com/image/600x600bb.jpg")
        );
        assert_eq!(album.ids.itunes.as_deref(), Some("1097861387"));
    }

    #[test]
    fn empty_payload_has_no_results() {
        let response: ItunesResponse<ItunesArtist> =
            serde_json::from_value(json!({ "resultCount": 0 })).unwrap();
        assert!(response.results.is_empty());
    }
}
