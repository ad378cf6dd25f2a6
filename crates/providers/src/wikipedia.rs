use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::http::{clean_text, get_json, url_escape};
use crate::{
    ArtistSearchResult, MetadataProvider, ProviderError, ProviderKind, ProviderSettings,
    ReleaseSearchResult,
};

const SUMMARY_URL: &str = "https://en.wikipedia.org/api/rest_v1/page/summary";
const DEFAULT_USER_AGENT: &str = "roadie-scanner/0.1";

/// Page summaries from the Wikipedia REST API, used for biographies only.
pub struct WikipediaProvider {
    client: Client,
    settings: ProviderSettings,
}

impl WikipediaProvider {
    pub fn new(client: Client, settings: ProviderSettings) -> Self {
        Self { client, settings }
    }

    /// First candidate title with a real article; 404s and disambiguation
    /// pages move on to the next one.
    async fn first_summary(&self, candidates: &[String]) -> Result<Option<Summary>, ProviderError> {
        let user_agent = self.settings.user_agent().unwrap_or(DEFAULT_USER_AGENT);
        for title in candidates {
            let url = format!("{}/{}", SUMMARY_URL, url_escape(&page_title(title)));
            let request = self
                .client
                .get(&url)
                .timeout(self.settings.timeout)
                .header("User-Agent", user_agent);
            match get_json::<Summary>(request).await {
                Ok(summary) if summary.is_article() => return Ok(Some(summary)),
                Ok(_) => debug!("Wikipedia page '{}' is not an article", title),
                Err(ProviderError::Status(404)) => debug!("No Wikipedia page '{}'", title),
                Err(err) => return Err(err),
            }
        }
        Ok(None)
    }
}

#[derive(Deserialize)]
struct Summary {
    #[serde(rename = "type")]
    kind: Option<String>,
    title: Option<String>,
    extract: Option<String>,
    content_urls: Option<ContentUrls>,
    thumbnail: Option<Thumbnail>,
}

impl Summary {
    fn is_article(&self) -> bool {
        self.kind.as_deref() != Some("disambiguation") && clean_text(self.extract.clone()).is_some()
    }

    fn page_url(&self) -> Option<String> {
        let page = self.content_urls.as_ref()?.desktop.as_ref()?.page.clone();
        clean_text(page)
    }
}

#[derive(Deserialize)]
struct ContentUrls {
    desktop: Option<PageUrl>,
}

#[derive(Deserialize)]
struct PageUrl {
    page: Option<String>,
}

#[derive(Deserialize)]
struct Thumbnail {
    source: Option<String>,
}

/// Article titles use underscores for spaces.
fn page_title(title: &str) -> String {
    title.split_whitespace().collect::<Vec<_>>().join("_")
}

fn artist_candidates(name: &str) -> Vec<String> {
    vec![
        name.trim().to_string(),
        format!("{} (band)", name.trim()),
        format!("{} (musician)", name.trim()),
    ]
}

fn release_candidates(artist: &str, title: &str) -> Vec<String> {
    vec![
        format!("{} ({} album)", title.trim(), artist.trim()),
        format!("{} (album)", title.trim()),
        title.trim().to_string(),
    ]
}

fn artist_result(summary: Summary) -> ArtistSearchResult {
    let url = summary.page_url();
    ArtistSearchResult {
        name: clean_text(summary.title),
        bio: clean_text(summary.extract),
        urls: url.into_iter().collect(),
        image_urls: summary
            .thumbnail
            .and_then(|thumb| clean_text(thumb.source))
            .into_iter()
            .collect(),
        ..ArtistSearchResult::default()
    }
}

fn release_result(summary: Summary) -> ReleaseSearchResult {
    let url = summary.page_url();
    ReleaseSearchResult {
        title: clean_text(summary.title),
        profile: clean_text(summary.extract),
        urls: url.into_iter().collect(),
        ..ReleaseSearchResult::default()
    }
}

#[async_trait]
impl MetadataProvider for WikipediaProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Wikipedia
    }

    fn is_enabled(&self) -> bool {
        self.settings.enabled
    }

    async fn search_artist(
        &self,
        name: &str,
        _max_results: usize,
    ) -> Result<Vec<ArtistSearchResult>, ProviderError> {
        let summary = self.first_summary(&artist_candidates(name)).await?;
        Ok(summary.map(artist_result).into_iter().collect())
    }

    async fn search_release(
        &self,
        artist: &str,
        title: &str,
        _max_results: usize,
    ) -> Result<Vec<ReleaseSearchResult>, ProviderError> {
        let summary = self
            .first_summary(&release_candidates(artist, title))
            .await?;
        Ok(summary.map(release_result).into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{artist_result, page_title, release_candidates, Summary};

    #[test]
    fn parses_page_summary() {
        let summary: Summary = serde_json::from_value(json!({
            "type": "standard",
            "title": "Portishead (band)",
            "extract": "Portishead are an English band formed in 1991 in Bristol.",
            "content_urls": { "desktop": { "page": "https://en.wikipedia.org/wiki/Portishead_(band)" } },
            "thumbnail": { "source": "https://upload.wikimedia.org/p.jpg", "width": 320 }
        }))
        .unwrap();
        assert!(summary.is_article());
        let artist = artist_result(summary);
        assert_eq!(
            artist.bio.as_deref(),
            Some("Portishead are an English band formed in 1991 in Bristol.")
        );
        assert_eq!(artist.urls, vec!["https://en.wikipedia.org/wiki/Portishead_(band)"]);
    }

    #[test]
    fn disambiguation_pages_are_not_articles() {
        let summary: Summary = serde_json::from_value(json!({
            "type": "disambiguation",
            "title": "Low",
            "extract": "Low may refer to:"
        }))
        .unwrap();
        assert!(!summary.is_article());
    }

    #[test]
    fn builds_page_titles() {
        assert_eq!(page_title("  OK  Computer "), "OK_Computer");
        assert_eq!(
            release_candidates("Radiohead", "OK Computer")[0],
            "OK Computer (Radiohead album)"
        );
    }
}
