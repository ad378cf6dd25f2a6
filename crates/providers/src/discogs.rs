use std::time::Duration;

use async_trait::async_trait;
use common::{parse_partial_date, ProviderIds};
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use tracing::warn;

use crate::http::{clean_text, collect_genres, get_json, push_unique, url_escape, RateLimiter};
use crate::{
    ArtistSearchResult, LabelResult, MetadataProvider, ProviderError, ProviderKind,
    ProviderSettings, ReleaseSearchResult,
};

const SEARCH_URL: &str = "https://api.discogs.com/database/search";
const DEFAULT_USER_AGENT: &str = "roadie-scanner/0.1";

/// Discogs database search with a personal access token.
pub struct DiscogsProvider {
    client: Client,
    settings: ProviderSettings,
    limiter: RateLimiter,
}

impl DiscogsProvider {
    pub fn new(client: Client, settings: ProviderSettings) -> Self {
        Self {
            client,
            settings,
            limiter: RateLimiter::new(Duration::from_millis(1000)),
        }
    }

    fn request(&self, url: &str) -> Result<RequestBuilder, ProviderError> {
        let token = self.settings.api_key().ok_or(ProviderError::Disabled)?;
        let user_agent = self.settings.user_agent().unwrap_or(DEFAULT_USER_AGENT);
        Ok(self
            .client
            .get(url)
            .timeout(self.settings.timeout)
            .header("User-Agent", user_agent)
            .header("Authorization", format!("Discogs token={}", token)))
    }

    async fn search(&self, params: &[(&str, &str)], limit: usize) -> Result<SearchResponse, ProviderError> {
        let mut url = format!("{}?per_page={}", SEARCH_URL, limit.clamp(1, 100));
        for (name, value) in params {
            url.push_str(&format!("&{}={}", name, url_escape(value)));
        }
        let request = self.request(&url)?;
        self.limiter.wait().await;
        get_json(request).await
    }
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

#[derive(Deserialize)]
struct SearchHit {
    id: u64,
    title: Option<String>,
    year: Option<String>,
    #[serde(default)]
    genre: Vec<String>,
    #[serde(default)]
    style: Vec<String>,
    #[serde(default)]
    label: Vec<String>,
    catno: Option<String>,
    #[serde(default)]
    format: Vec<String>,
    cover_image: Option<String>,
    thumb: Option<String>,
    resource_url: Option<String>,
    uri: Option<String>,
}

#[derive(Deserialize)]
struct ArtistResource {
    name: Option<String>,
    realname: Option<String>,
    profile: Option<String>,
    #[serde(default)]
    urls: Vec<String>,
    #[serde(default)]
    namevariations: Vec<String>,
    #[serde(default)]
    members: Vec<serde_json::Value>,
    #[serde(default)]
    images: Vec<ResourceImage>,
}

#[derive(Deserialize)]
struct ResourceImage {
    uri: Option<String>,
}

/// Turns `[a=Name]` and `[l=Label]` links into their text and drops other
/// `[..]` markup.
fn clean_profile(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(start) = rest.find('[') {
        out.push_str(&rest[..start]);
        match rest[start..].find(']') {
            Some(len) => {
                let inner = &rest[start + 1..start + len];
                if let Some((_, text)) = inner.split_once('=') {
                    out.push_str(text);
                }
                rest = &rest[start + len + 1..];
            }
            None => {
                rest = &rest[start..];
                break;
            }
        }
    }
    out.push_str(rest);
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn artist_result(hit: SearchHit) -> ArtistSearchResult {
    let mut images = Vec::new();
    if let Some(url) = clean_text(hit.cover_image) {
        push_unique(&mut images, &url);
    }
    ArtistSearchResult {
        name: clean_text(hit.title),
        ids: ProviderIds {
            discogs: Some(hit.id.to_string()),
            ..ProviderIds::default()
        },
        thumbnail_url: clean_text(hit.thumb),
        image_urls: images,
        urls: clean_text(hit.uri)
            .map(|uri| format!("https://www.discogs.com{}", uri))
            .into_iter()
            .collect(),
        ..ArtistSearchResult::default()
    }
}

fn apply_artist_resource(result: &mut ArtistSearchResult, resource: ArtistResource) {
    if result.name.is_none() {
        result.name = clean_text(resource.name);
    }
    result.profile = clean_text(resource.profile.as_deref().map(clean_profile));
    result.artist_type = if !resource.members.is_empty() {
        Some("Group".to_string())
    } else if clean_text(resource.realname).is_some() {
        Some("Person".to_string())
    } else {
        None
    };
    for url in &resource.urls {
        push_unique(&mut result.urls, url);
    }
    for name in &resource.namevariations {
        push_unique(&mut result.alternate_names, name);
    }
    for image in resource.images {
        if let Some(uri) = clean_text(image.uri) {
            push_unique(&mut result.image_urls, &uri);
        }
    }
}

/// Search titles read `Artist - Title`.
fn release_title(raw: &str, artist: &str) -> String {
    match raw.split_once(" - ") {
        Some((prefix, title)) if prefix.trim().eq_ignore_ascii_case(artist.trim()) => {
            title.trim().to_string()
        }
        _ => raw.trim().to_string(),
    }
}

fn release_result(hit: SearchHit, artist: &str) -> ReleaseSearchResult {
    let genres = collect_genres(
        &hit.genre
            .iter()
            .chain(hit.style.iter())
            .map(|value| Some(value.clone()))
            .collect::<Vec<_>>(),
    );
    let mut labels: Vec<LabelResult> = Vec::new();
    for (idx, name) in hit.label.iter().enumerate() {
        let name = name.trim();
        if name.is_empty() || labels.iter().any(|l| l.name.eq_ignore_ascii_case(name)) {
            continue;
        }
        labels.push(LabelResult {
            name: name.to_string(),
            catalog_number: if idx == 0 { clean_text(hit.catno.clone()) } else { None },
        });
    }
    let mut images = Vec::new();
    if let Some(url) = clean_text(hit.cover_image) {
        push_unique(&mut images, &url);
    }
    ReleaseSearchResult {
        title: hit.title.as_deref().map(|title| release_title(title, artist)),
        release_type: hit.format.first().cloned(),
        release_date: hit.year.as_deref().and_then(parse_partial_date),
        ids: ProviderIds {
            discogs: Some(hit.id.to_string()),
            ..ProviderIds::default()
        },
        thumbnail_url: clean_text(hit.thumb),
        image_urls: images,
        urls: clean_text(hit.uri)
            .map(|uri| format!("https://www.discogs.com{}", uri))
            .into_iter()
            .collect(),
        tags: hit.style,
        genres,
        labels,
        ..ReleaseSearchResult::default()
    }
}

#[async_trait]
impl MetadataProvider for DiscogsProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Discogs
    }

    fn is_enabled(&self) -> bool {
        self.settings.enabled && self.settings.api_key().is_some()
    }

    async fn search_artist(
        &self,
        name: &str,
        max_results: usize,
    ) -> Result<Vec<ArtistSearchResult>, ProviderError> {
        let response = self
            .search(&[("type", "artist"), ("q", name)], max_results)
            .await?;
        let mut hits = response.results.into_iter();
        let Some(first) = hits.next() else {
            return Ok(Vec::new());
        };
        let resource_url = clean_text(first.resource_url.clone());
        let mut best = artist_result(first);
        // Only the best match is worth the extra request for its profile.
        if let Some(url) = resource_url {
            let request = self.request(&url)?;
            self.limiter.wait().await;
            match get_json::<ArtistResource>(request).await {
                Ok(resource) => apply_artist_resource(&mut best, resource),
                Err(err) => warn!("Discogs artist details for '{}' failed: {}", name, err),
            }
        }
        let mut out = vec![best];
        out.extend(hits.map(artist_result));
        Ok(out)
    }

    async fn search_release(
        &self,
        artist: &str,
        title: &str,
        max_results: usize,
    ) -> Result<Vec<ReleaseSearchResult>, ProviderError> {
        let response = self
            .search(
                &[("type", "master"), ("artist", artist), ("release_title", title)],
                max_results,
            )
            .await?;
        Ok(response
            .results
            .into_iter()
            .map(|hit| release_result(hit, artist))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{
        apply_artist_resource, artist_result, clean_profile, release_result, ArtistResource,
        SearchResponse,
    };

    #[test]
    fn cleans_profile_markup() {
        assert_eq!(
            clean_profile("Founded by [a=Thom Yorke] and\n signed to [l=Parlophone]. [b]Bold[/b]"),
            "Founded by Thom Yorke and signed to Parlophone. Bold"
        );
        assert_eq!(clean_profile("unterminated [a=x"), "unterminated [a=x");
    }

    #[test]
    fn artist_hit_is_completed_from_resource() {
        let search: SearchResponse = serde_json::from_value(json!({
            "results": [{
                "id": 3840,
                "type": "artist",
                "title": "Radiohead",
                "thumb": "https://i.discogs.com/thumb.jpg",
                "cover_image": "https://i.discogs.com/cover.jpg",
                "resource_url": "https://api.discogs.com/artists/3840",
                "uri": "/artist/3840-Radiohead"
            }]
        }))
        .unwrap();
        let mut result = artist_result(search.results.into_iter().next().unwrap());
        let resource: ArtistResource = serde_json::from_value(json!({
            "name": "Radiohead",
            "profile": "English rock band from [a=Abingdon].",
            "urls": ["https://www.radiohead.com"],
            "namevariations": ["Radio Head"],
            "members": [{ "id": 1, "name": "Thom Yorke" }],
            "images": [{ "type": "primary", "uri": "https://i.discogs.com/primary.jpg" }]
        }))
        .unwrap();
        apply_artist_resource(&mut result, resource);
        assert_eq!(result.ids.discogs.as_deref(), Some("3840"));
        assert_eq!(result.artist_type.as_deref(), Some("Group"));
        assert_eq!(result.profile.as_deref(), Some("English rock band from Abingdon."));
        assert_eq!(result.alternate_names, vec!["Radio Head"]);
        assert_eq!(
            result.urls,
            vec!["https://www.discogs.com/artist/3840-Radiohead", "https://www.radiohead.com"]
        );
        assert_eq!(result.image_urls.len(), 2);
    }

    #[test]
    fn master_hit_becomes_release() {
        let search: SearchResponse = serde_json::from_value(json!({
            "results": [{
                "id": 21491,
                "type": "master",
                "title": "Radiohead - OK Computer",
                "year": "1997",
                "genre": ["Electronic", "Rock"],
                "style": ["Alternative Rock", "rock"],
                "label": ["Parlophone", "Parlophone", "Capitol Records"],
                "catno": "NODATA 02",
                "format": ["Album", "LP"]
            }]
        }))
        .unwrap();
        let release = release_result(search.results.into_iter().next().unwrap(), "radiohead");
        assert_eq!(release.title.as_deref(), Some("OK Computer"));
        assert_eq!(release.release_date.map(|d| d.year()), Some(1997));
        assert_eq!(release.release_type.as_deref(), Some("Album"));
        assert_eq!(release.genres, vec!["Electronic", "Rock", "Alternative Rock"]);
        assert_eq!(release.labels.len(), 2);
        assert_eq!(release.labels[0].catalog_number.as_deref(), Some("NODATA 02"));
        assert!(release.labels[1].catalog_number.is_none());
    }
}
