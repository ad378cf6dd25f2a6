use std::time::Duration;

use async_trait::async_trait;
use common::{parse_partial_date, ProviderIds};
use reqwest::Client;
use serde::Deserialize;

use crate::http::{clean_text, get_json, push_unique, url_escape, RateLimiter};
use crate::{
    ArtistSearchResult, MetadataProvider, ProviderError, ProviderKind, ProviderSettings,
    ReleaseSearchResult,
};

const BASE_URL: &str = "https://musicbrainz.org/ws/2";
const COVER_ART_URL: &str = "https://coverartarchive.org/release-group";

/// MusicBrainz refuses anonymous clients, so a user agent is required.
pub struct MusicBrainzProvider {
    client: Client,
    settings: ProviderSettings,
    limiter: RateLimiter,
}

impl MusicBrainzProvider {
    pub fn new(client: Client, settings: ProviderSettings) -> Self {
        Self {
            client,
            settings,
            limiter: RateLimiter::new(Duration::from_millis(1000)),
        }
    }

    async fn query<T: for<'de> Deserialize<'de>>(
        &self,
        entity: &str,
        query: &str,
        limit: usize,
    ) -> Result<T, ProviderError> {
        let user_agent = self.settings.user_agent().ok_or(ProviderError::Disabled)?;
        let url = format!(
            "{}/{}/?query={}&fmt=json&limit={}",
            BASE_URL,
            entity,
            url_escape(query),
            limit.max(1)
        );
        self.limiter.wait().await;
        get_json(
            self.client
                .get(&url)
                .timeout(self.settings.timeout)
                .header("User-Agent", user_agent),
        )
        .await
    }
}

#[derive(Deserialize)]
struct ArtistResponse {
    #[serde(default)]
    artists: Vec<MbArtist>,
}

#[derive(Deserialize)]
#[serde(rename_all = "kebab-case")]
struct MbArtist {
    id: String,
    name: Option<String>,
    sort_name: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    disambiguation: Option<String>,
    life_span: Option<LifeSpan>,
    #[serde(default)]
    isnis: Vec<String>,
    #[serde(default)]
    aliases: Vec<Alias>,
    #[serde(default)]
    tags: Vec<Tag>,
}

#[derive(Deserialize)]
struct LifeSpan {
    begin: Option<String>,
    end: Option<String>,
}

#[derive(Deserialize)]
struct Alias {
    name: String,
}

#[derive(Deserialize)]
struct Tag {
    name: String,
}

#[derive(Deserialize)]
struct ReleaseGroupResponse {
    #[serde(default, rename = "release-groups")]
    release_groups: Vec<MbReleaseGroup>,
}

#[derive(Deserialize)]
#[serde(rename_all = "kebab-case")]
struct MbReleaseGroup {
    id: String,
    title: Option<String>,
    primary_type: Option<String>,
    #[serde(default)]
    secondary_types: Vec<String>,
    first_release_date: Option<String>,
    disambiguation: Option<String>,
    #[serde(default)]
    tags: Vec<Tag>,
}

fn tag_names(tags: &[Tag]) -> Vec<String> {
    let mut out = Vec::new();
    for tag in tags {
        push_unique(&mut out, &tag.name);
    }
    out
}

fn artist_result(item: MbArtist) -> ArtistSearchResult {
    let (begin, end) = match &item.life_span {
        Some(span) => (span.begin.as_deref(), span.end.as_deref()),
        None => (None, None),
    };
    let mut alternates = Vec::new();
    for alias in &item.aliases {
        push_unique(&mut alternates, &alias.name);
    }
    let tags = tag_names(&item.tags);
    ArtistSearchResult {
        name: clean_text(item.name),
        sort_name: clean_text(item.sort_name),
        artist_type: clean_text(item.kind),
        begin_date: begin.and_then(parse_partial_date),
        end_date: end.and_then(parse_partial_date),
        profile: clean_text(item.disambiguation),
        ids: ProviderIds {
            musicbrainz: Some(item.id),
            ..ProviderIds::default()
        },
        alternate_names: alternates,
        isni_list: item.isnis,
        genres: tags.clone(),
        tags,
        ..ArtistSearchResult::default()
    }
}

fn release_result(item: MbReleaseGroup) -> ReleaseSearchResult {
    // Secondary types ("Live", "Compilation") say more than the primary one.
    let release_type = item
        .secondary_types
        .first()
        .cloned()
        .or(item.primary_type);
    let cover = format!("{}/{}/front-500", COVER_ART_URL, item.id);
    let tags = tag_names(&item.tags);
    ReleaseSearchResult {
        title: clean_text(item.title),
        release_type: clean_text(release_type),
        release_date: item.first_release_date.as_deref().and_then(parse_partial_date),
        profile: clean_text(item.disambiguation),
        ids: ProviderIds {
            musicbrainz: Some(item.id),
            ..ProviderIds::default()
        },
        image_urls: vec![cover],
        genres: tags.clone(),
        tags,
        ..ReleaseSearchResult::default()
    }
}

/// Lucene query syntax; quotes inside the value are dropped.
fn phrase(value: &str) -> String {
    format!("\"{}\"", value.replace('"', " ").trim())
}

#[async_trait]
impl MetadataProvider for MusicBrainzProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::MusicBrainz
    }

    fn is_enabled(&self) -> bool {
        self.settings.enabled && self.settings.user_agent().is_some()
    }

    async fn search_artist(
        &self,
        name: &str,
        max_results: usize,
    ) -> Result<Vec<ArtistSearchResult>, ProviderError> {
        let query = format!("artist:{}", phrase(name));
        let response: ArtistResponse = self.query("artist", &query, max_results).await?;
        Ok(response.artists.into_iter().map(artist_result).collect())
    }

    async fn search_release(
        &self,
        artist: &str,
        title: &str,
        max_results: usize,
    ) -> Result<Vec<ReleaseSearchResult>, ProviderError> {
        let query = format!("artist:{} AND releasegroup:{}", phrase(artist), phrase(title));
        let response: ReleaseGroupResponse =
            self.query("release-group", &query, max_results).await?;
        Ok(response
            .release_groups
            .into_iter()
            .map(release_result)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use reqwest::Client;
    use serde_json::json;

    use super::{artist_result, phrase, release_result, ArtistResponse, MusicBrainzProvider, ReleaseGroupResponse};
    use crate::{MetadataProvider, ProviderKind, ProviderSettings};

    #[test]
    fn parses_artist_search() {
        let payload = json!({
            "created": "2024-01-01T00:00:00.000Z",
            "count": 1,
            "artists": [{
                "id": "a74b1b7f-71a5-4011-9441-d0b5e4122711",
                "type": "Group",
                "score": 100,
                "name": "Radiohead",
                "sort-name": "Radiohead",
                "country": "GB",
                "life-span": { "begin": "1991", "ended": null },
                "isnis": ["0000000115475162"],
                "aliases": [{ "name": "On a Friday", "sort-name": "On a Friday" }],
                "tags": [{ "count": 5, "name": "rock" }, { "count": 3, "name": "Rock" }]
            }]
        });
        let response: ArtistResponse = serde_json::from_value(payload).unwrap();
        let artist = artist_result(response.artists.into_iter().next().unwrap());
        assert_eq!(artist.artist_type.as_deref(), Some("Group"));
        assert_eq!(artist.begin_date.map(|d| d.year()), Some(1991));
        assert!(artist.end_date.is_none());
        assert_eq!(artist.isni_list, vec!["0000000115475162"]);
        assert_eq!(artist.alternate_names, vec!["On a Friday"]);
        assert_eq!(artist.tags, vec!["rock"]);
        assert_eq!(
            artist.ids.musicbrainz.as_deref(),
            Some("a74b1b7f-71a5-4011-9441-d0b5e4122711")
        );
    }

    #[test]
    fn parses_release_group_search() {
        let payload = json!({
            "release-groups": [{
                "id": "b1392450-e666-3926-a536-22c65f834433",
                "title": "OK Computer",
                "primary-type": "Album",
                "secondary-types": [],
                "first-release-date": "1997-05-21",
                "tags": [{ "count": 1, "name": "alternative rock" }]
            }, {
                "id": "c0000000-0000-0000-0000-000000000000",
                "title": "OK Computer Live",
                "primary-type": "Album",
                "secondary-types": ["Live"]
            }]
        });
        let response: ReleaseGroupResponse = serde_json::from_value(payload).unwrap();
        let results: Vec<_> = response.release_groups.into_iter().map(release_result).collect();
        assert_eq!(results[0].release_type.as_deref(), Some("Album"));
        assert_eq!(results[0].release_date.map(|d| d.day()), Some(21));
        assert_eq!(
            results[0].image_urls,
            vec!["https://coverartarchive.org/release-group/b1392450-e666-3926-a536-22c65f834433/front-500"]
        );
        assert_eq!(results[1].release_type.as_deref(), Some("Live"));
    }

    #[test]
    fn needs_a_user_agent() {
        let provider = MusicBrainzProvider::new(Client::new(), ProviderSettings::new(ProviderKind::MusicBrainz));
        assert!(!provider.is_enabled());
        let mut settings = ProviderSettings::new(ProviderKind::MusicBrainz);
        settings.user_agent = Some("roadie/0.1 (ops@example.com)".to_string());
        assert!(MusicBrainzProvider::new(Client::new(), settings).is_enabled());
    }

    #[test]
    fn quotes_search_phrases() {
        assert_eq!(phrase("Guns N' Roses"), "\"Guns N' Roses\"");
        assert_eq!(phrase("say \"hi\""), "\"say  hi\"");
    }
}
