use std::sync::Arc;
use std::time::Duration;

use common::{
    fill_option, fill_text, Artist, ArtistType, NameList, ProviderIds, Release, ReleaseType,
};
use futures::future::join_all;
use time::Date;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::images::{prepare_thumbnail, ImageFetcher};
use crate::kinds::{canonical_artist_type, canonical_release_type};
use crate::{
    ArtistSearchResult, LabelResult, MetadataProvider, ProviderError, ProviderFailure,
    ProviderKind, ReleaseSearchResult,
};

#[derive(Clone, Debug)]
pub struct AggregateSettings {
    /// Budget for each provider call; a slow provider only loses its own result.
    pub timeout: Duration,
    pub max_results: usize,
    pub thumbnail_width: u32,
    pub thumbnail_height: u32,
}

impl Default for AggregateSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(8),
            max_results: 5,
            thumbnail_width: 160,
            thumbnail_height: 160,
        }
    }
}

/// Artist data merged from every provider that answered.
#[derive(Debug, Default)]
pub struct ArtistEnrichment {
    pub name: String,
    pub sort_name: Option<String>,
    pub artist_type: Option<ArtistType>,
    pub begin_date: Option<Date>,
    pub end_date: Option<Date>,
    pub profile: Option<String>,
    pub bio: Option<String>,
    pub ids: ProviderIds,
    pub thumbnail_url: Option<String>,
    pub thumbnail: Option<Vec<u8>>,
    pub alternate_names: NameList,
    pub tags: NameList,
    pub urls: NameList,
    pub isni_list: NameList,
    pub image_urls: NameList,
    pub genres: NameList,
    /// Providers that contributed, in merge order.
    pub sources: Vec<ProviderKind>,
    pub errors: Vec<ProviderFailure>,
}

impl ArtistEnrichment {
    /// Fills what the artist lacks; values already on the artist win.
    pub fn apply_to(&self, artist: &mut Artist) -> bool {
        let mut changed = false;
        changed |= fill_text(&mut artist.sort_name, &self.sort_name);
        changed |= fill_option(&mut artist.artist_type, &self.artist_type);
        changed |= fill_option(&mut artist.begin_date, &self.begin_date);
        changed |= fill_option(&mut artist.end_date, &self.end_date);
        changed |= fill_text(&mut artist.profile, &self.profile);
        changed |= fill_text(&mut artist.bio, &self.bio);
        changed |= fill_option(&mut artist.thumbnail, &self.thumbnail);
        changed |= artist.ids.fill_missing(&self.ids);
        changed |= artist.tags.union(&self.tags);
        changed |= artist.urls.union(&self.urls);
        changed |= artist.isni_list.union(&self.isni_list);
        for alternate in self.alternate_names.iter() {
            if !alternate.eq_ignore_ascii_case(artist.name.trim()) {
                changed |= artist.alternate_names.insert(alternate);
            }
        }
        changed
    }
}

#[derive(Debug, Default)]
pub struct ReleaseEnrichment {
    pub title: String,
    pub release_type: Option<ReleaseType>,
    pub release_date: Option<Date>,
    pub profile: Option<String>,
    pub ids: ProviderIds,
    pub thumbnail_url: Option<String>,
    pub thumbnail: Option<Vec<u8>>,
    pub alternate_names: NameList,
    pub tags: NameList,
    pub urls: NameList,
    pub image_urls: NameList,
    pub genres: NameList,
    pub labels: Vec<LabelResult>,
    pub track_count: Option<u32>,
    pub sources: Vec<ProviderKind>,
    pub errors: Vec<ProviderFailure>,
}

impl ReleaseEnrichment {
    pub fn apply_to(&self, release: &mut Release) -> bool {
        let mut changed = false;
        changed |= fill_option(&mut release.release_type, &self.release_type);
        changed |= fill_option(&mut release.release_date, &self.release_date);
        changed |= fill_text(&mut release.profile, &self.profile);
        changed |= fill_option(&mut release.thumbnail, &self.thumbnail);
        changed |= release.ids.fill_missing(&self.ids);
        changed |= release.tags.union(&self.tags);
        changed |= release.urls.union(&self.urls);
        for alternate in self.alternate_names.iter() {
            if !alternate.eq_ignore_ascii_case(release.title.trim()) {
                changed |= release.alternate_names.insert(alternate);
            }
        }
        changed
    }
}

/// Merges provider answers for one artist. Responses are taken in provider
/// priority order: the first non-empty value of each scalar wins, list fields
/// are unioned. Wikipedia only contributes the bio.
pub fn merge_artist_results(
    name: &str,
    mut responses: Vec<(ProviderKind, ArtistSearchResult)>,
) -> ArtistEnrichment {
    responses.sort_by_key(|(kind, _)| kind.priority());
    let mut merged = ArtistEnrichment {
        name: name.trim().to_string(),
        ..ArtistEnrichment::default()
    };
    let mut raw_type: Option<String> = None;
    for (kind, result) in responses {
        merged.sources.push(kind);
        if kind == ProviderKind::Wikipedia {
            fill_text(&mut merged.bio, &result.bio);
            continue;
        }
        fill_text(&mut merged.sort_name, &result.sort_name);
        fill_text(&mut raw_type, &result.artist_type);
        fill_option(&mut merged.begin_date, &result.begin_date);
        fill_option(&mut merged.end_date, &result.end_date);
        fill_text(&mut merged.profile, &result.profile);
        fill_text(&mut merged.bio, &result.bio);
        fill_text(&mut merged.thumbnail_url, &result.thumbnail_url);
        merged.ids.fill_missing(&result.ids);

        if let Some(found) = result.name.as_deref() {
            if !found.trim().eq_ignore_ascii_case(&merged.name) {
                merged.alternate_names.insert(found);
            }
        }
        merged.alternate_names.extend(result.alternate_names.iter());
        merged.tags.extend(result.tags.iter());
        merged.urls.extend(result.urls.iter());
        merged.isni_list.extend(result.isni_list.iter());
        merged.image_urls.extend(result.image_urls.iter());
        merged.genres.extend(result.genres.iter());
    }
    merged.alternate_names.remove(&merged.name);
    merged.artist_type = raw_type.as_deref().map(canonical_artist_type);
    merged
}

/// Same policy as [`merge_artist_results`]; Wikipedia only contributes the
/// description.
pub fn merge_release_results(
    title: &str,
    mut responses: Vec<(ProviderKind, ReleaseSearchResult)>,
) -> ReleaseEnrichment {
    responses.sort_by_key(|(kind, _)| kind.priority());
    let mut merged = ReleaseEnrichment {
        title: title.trim().to_string(),
        ..ReleaseEnrichment::default()
    };
    let mut raw_type: Option<String> = None;
    for (kind, result) in responses {
        merged.sources.push(kind);
        if kind == ProviderKind::Wikipedia {
            fill_text(&mut merged.profile, &result.profile);
            continue;
        }
        fill_text(&mut raw_type, &result.release_type);
        fill_option(&mut merged.release_date, &result.release_date);
        fill_text(&mut merged.profile, &result.profile);
        fill_text(&mut merged.thumbnail_url, &result.thumbnail_url);
        fill_option(&mut merged.track_count, &result.track_count);
        merged.ids.fill_missing(&result.ids);

        if let Some(found) = result.title.as_deref() {
            if !found.trim().eq_ignore_ascii_case(&merged.title) {
                merged.alternate_names.insert(found);
            }
        }
        merged.alternate_names.extend(result.alternate_names.iter());
        merged.tags.extend(result.tags.iter());
        merged.urls.extend(result.urls.iter());
        merged.image_urls.extend(result.image_urls.iter());
        merged.genres.extend(result.genres.iter());
        for label in result.labels {
            let known = merged
                .labels
                .iter()
                .any(|existing| existing.name.eq_ignore_ascii_case(label.name.trim()));
            if !known && !label.name.trim().is_empty() {
                merged.labels.push(label);
            }
        }
    }
    merged.alternate_names.remove(&merged.title);
    merged
        .labels
        .sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
    merged.release_type = raw_type.as_deref().map(canonical_release_type);
    merged
}

/// Fans a search out to every enabled provider at once and merges what comes
/// back. Provider failures never fail the search; they are returned in
/// `errors`.
#[derive(Clone)]
pub struct Aggregator {
    providers: Vec<Arc<dyn MetadataProvider>>,
    images: Arc<dyn ImageFetcher>,
    settings: AggregateSettings,
}

impl Aggregator {
    pub fn new(
        providers: Vec<Arc<dyn MetadataProvider>>,
        images: Arc<dyn ImageFetcher>,
        settings: AggregateSettings,
    ) -> Self {
        Self {
            providers,
            images,
            settings,
        }
    }

    pub fn enabled_count(&self) -> usize {
        self.enabled().count()
    }

    pub async fn search_artist(&self, name: &str) -> ArtistEnrichment {
        let calls = self.enabled().map(|provider| async move {
            let outcome = match timeout(
                self.settings.timeout,
                provider.search_artist(name, self.settings.max_results),
            )
            .await
            {
                Ok(outcome) => outcome,
                Err(_) => Err(ProviderError::Timeout),
            };
            (provider.kind(), outcome)
        });
        let (found, errors) = first_results(join_all(calls).await, name);
        let mut merged = merge_artist_results(name, found);
        merged.thumbnail = self
            .fetch_thumbnail(merged.thumbnail_url.as_deref(), &merged.image_urls)
            .await;
        merged.errors = errors;
        info!(
            "Artist '{}' enriched from {} providers ({} failed)",
            name,
            merged.sources.len(),
            merged.errors.len()
        );
        merged
    }

    pub async fn search_release(&self, artist: &str, title: &str) -> ReleaseEnrichment {
        let calls = self.enabled().map(|provider| async move {
            let outcome = match timeout(
                self.settings.timeout,
                provider.search_release(artist, title, self.settings.max_results),
            )
            .await
            {
                Ok(outcome) => outcome,
                Err(_) => Err(ProviderError::Timeout),
            };
            (provider.kind(), outcome)
        });
        let what = format!("{} - {}", artist, title);
        let (found, errors) = first_results(join_all(calls).await, &what);
        let mut merged = merge_release_results(title, found);
        merged.thumbnail = self
            .fetch_thumbnail(merged.thumbnail_url.as_deref(), &merged.image_urls)
            .await;
        merged.errors = errors;
        info!(
            "Release '{}' enriched from {} providers ({} failed)",
            what,
            merged.sources.len(),
            merged.errors.len()
        );
        merged
    }

    fn enabled(&self) -> impl Iterator<Item = &Arc<dyn MetadataProvider>> {
        self.providers.iter().filter(|provider| provider.is_enabled())
    }

    /// The scalar thumbnail URL first, then the image list; the first image
    /// that downloads and decodes wins.
    async fn fetch_thumbnail(&self, preferred: Option<&str>, candidates: &NameList) -> Option<Vec<u8>> {
        let urls = preferred
            .into_iter()
            .chain(candidates.iter().map(String::as_str));
        for url in urls {
            let bytes = match self.images.fetch_bytes(url).await {
                Ok(bytes) => bytes,
                Err(err) => {
                    warn!("Failed to fetch image {}: {}", url, err);
                    continue;
                }
            };
            let (width, height) = (self.settings.thumbnail_width, self.settings.thumbnail_height);
            match tokio::task::spawn_blocking(move || prepare_thumbnail(&bytes, width, height)).await {
                Ok(Ok(thumbnail)) => return Some(thumbnail),
                Ok(Err(err)) => warn!("Image {} is unusable: {}", url, err),
                Err(err) => warn!("Thumbnail task for {} failed: {}", url, err),
            }
        }
        None
    }
}

/// Keeps the best-ranked result of each provider and collects failures.
fn first_results<T>(
    responses: Vec<(ProviderKind, Result<Vec<T>, ProviderError>)>,
    what: &str,
) -> (Vec<(ProviderKind, T)>, Vec<ProviderFailure>) {
    let mut found = Vec::new();
    let mut errors = Vec::new();
    for (kind, outcome) in responses {
        match outcome {
            Ok(results) => match results.into_iter().next() {
                Some(first) => found.push((kind, first)),
                None => debug!("{} has nothing for '{}'", kind, what),
            },
            Err(err) => {
                warn!("Provider {} failed for '{}': {}", kind, what, err);
                errors.push(ProviderFailure {
                    provider: kind,
                    error: err,
                });
            }
        }
    }
    (found, errors)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use common::{Artist, ArtistType, ReleaseType};

    use super::{merge_artist_results, merge_release_results, AggregateSettings, Aggregator};
    use crate::images::tests::png;
    use crate::images::ImageFetcher;
    use crate::{
        ArtistSearchResult, LabelResult, MetadataProvider, ProviderError, ProviderKind,
        ReleaseSearchResult,
    };

    enum Behaviour {
        Answer(ArtistSearchResult),
        Fail,
        Hang,
    }

    struct FakeProvider {
        kind: ProviderKind,
        enabled: bool,
        behaviour: Behaviour,
        calls: AtomicUsize,
    }

    impl FakeProvider {
        fn new(kind: ProviderKind, behaviour: Behaviour) -> Arc<Self> {
            Arc::new(Self {
                kind,
                enabled: true,
                behaviour,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl MetadataProvider for FakeProvider {
        fn kind(&self) -> ProviderKind {
            self.kind
        }

        fn is_enabled(&self) -> bool {
            self.enabled
        }

        async fn search_artist(
            &self,
            _name: &str,
            _max_results: usize,
        ) -> Result<Vec<ArtistSearchResult>, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.behaviour {
                Behaviour::Answer(result) => Ok(vec![result.clone()]),
                Behaviour::Fail => Err(ProviderError::Status(503)),
                Behaviour::Hang => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(Vec::new())
                }
            }
        }

        async fn search_release(
            &self,
            _artist: &str,
            _title: &str,
            _max_results: usize,
        ) -> Result<Vec<ReleaseSearchResult>, ProviderError> {
            Ok(Vec::new())
        }
    }

    #[derive(Default)]
    struct FakeImages {
        images: HashMap<String, Vec<u8>>,
    }

    #[async_trait]
    impl ImageFetcher for FakeImages {
        async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, ProviderError> {
            self.images
                .get(url)
                .cloned()
                .ok_or(ProviderError::Status(404))
        }
    }

    fn artist_result(name: &str) -> ArtistSearchResult {
        ArtistSearchResult {
            name: Some(name.to_string()),
            ..ArtistSearchResult::default()
        }
    }

    fn settings() -> AggregateSettings {
        AggregateSettings {
            timeout: Duration::from_millis(200),
            max_results: 3,
            thumbnail_width: 20,
            thumbnail_height: 20,
        }
    }

    #[test]
    fn earlier_provider_wins_scalars_and_lists_are_unioned() {
        let mut itunes = artist_result("Radiohead");
        itunes.profile = Some("a".to_string());
        itunes.tags = vec!["p".to_string()];
        let mut musicbrainz = artist_result("Radiohead");
        musicbrainz.profile = Some("b".to_string());
        musicbrainz.sort_name = Some("Radiohead".to_string());
        musicbrainz.tags = vec!["q".to_string(), "P".to_string()];

        let merged = merge_artist_results(
            "Radiohead",
            vec![
                (ProviderKind::MusicBrainz, musicbrainz),
                (ProviderKind::Itunes, itunes),
            ],
        );
        assert_eq!(merged.profile.as_deref(), Some("a"));
        assert_eq!(merged.sort_name.as_deref(), Some("Radiohead"));
        assert_eq!(merged.tags.as_slice(), ["p", "q"]);
        assert_eq!(
            merged.sources,
            vec![ProviderKind::Itunes, ProviderKind::MusicBrainz]
        );
    }

    #[test]
    fn empty_values_do_not_block_later_providers() {
        let mut itunes = artist_result("Low");
        itunes.bio = Some("   ".to_string());
        let mut lastfm = artist_result("Low");
        lastfm.bio = Some("Duluth trio".to_string());
        let merged = merge_artist_results(
            "Low",
            vec![(ProviderKind::Itunes, itunes), (ProviderKind::LastFm, lastfm)],
        );
        assert_eq!(merged.bio.as_deref(), Some("Duluth trio"));
    }

    #[test]
    fn wikipedia_only_contributes_the_bio() {
        let mut wiki = artist_result("Björk Guðmundsdóttir");
        wiki.bio = Some("Icelandic singer".to_string());
        wiki.profile = Some("ignored".to_string());
        wiki.tags = vec!["ignored".to_string()];
        let merged = merge_artist_results("Björk", vec![(ProviderKind::Wikipedia, wiki)]);
        assert_eq!(merged.bio.as_deref(), Some("Icelandic singer"));
        assert!(merged.profile.is_none());
        assert!(merged.tags.is_empty());
        assert!(merged.alternate_names.is_empty());
    }

    #[test]
    fn differing_provider_names_become_alternates_and_types_are_canonical() {
        let mut spotify = artist_result("The Beatles");
        spotify.artist_type = Some("band".to_string());
        let mut discogs = artist_result("Beatles, The");
        discogs.artist_type = Some("Person".to_string());
        discogs.alternate_names = vec!["Fab Four".to_string()];
        let merged = merge_artist_results(
            "the beatles",
            vec![
                (ProviderKind::Discogs, discogs),
                (ProviderKind::Spotify, spotify),
            ],
        );
        assert_eq!(merged.artist_type, Some(ArtistType::Group));
        assert_eq!(merged.alternate_names.as_slice(), ["Beatles, The", "Fab Four"]);
    }

    #[test]
    fn release_merge_unions_labels_and_canonicalises_type() {
        let itunes = ReleaseSearchResult {
            title: Some("OK Computer".to_string()),
            release_type: Some("Album".to_string()),
            labels: vec![LabelResult {
                name: "Parlophone".to_string(),
                catalog_number: None,
            }],
            ..ReleaseSearchResult::default()
        };
        let discogs = ReleaseSearchResult {
            title: Some("OK Computer".to_string()),
            release_type: Some("Single".to_string()),
            labels: vec![
                LabelResult {
                    name: "parlophone".to_string(),
                    catalog_number: Some("NODATA 02".to_string()),
                },
                LabelResult {
                    name: "Capitol".to_string(),
                    catalog_number: None,
                },
            ],
            ..ReleaseSearchResult::default()
        };
        let merged = merge_release_results(
            "OK Computer",
            vec![(ProviderKind::Discogs, discogs), (ProviderKind::Itunes, itunes)],
        );
        assert_eq!(merged.release_type, Some(ReleaseType::Album));
        let names: Vec<&str> = merged.labels.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, vec!["Capitol", "Parlophone"]);
        assert!(merged.alternate_names.is_empty());
    }

    #[tokio::test]
    async fn failures_and_timeouts_do_not_block_other_providers() {
        let mut good = artist_result("Portishead");
        good.genres = vec!["Trip Hop".to_string()];
        let disabled = Arc::new(FakeProvider {
            kind: ProviderKind::Discogs,
            enabled: false,
            behaviour: Behaviour::Fail,
            calls: AtomicUsize::new(0),
        });
        let providers: Vec<Arc<dyn MetadataProvider>> = vec![
            FakeProvider::new(ProviderKind::Itunes, Behaviour::Fail),
            FakeProvider::new(ProviderKind::LastFm, Behaviour::Answer(good)),
            FakeProvider::new(ProviderKind::Spotify, Behaviour::Hang),
            disabled.clone(),
        ];
        let aggregator = Aggregator::new(providers, Arc::new(FakeImages::default()), settings());
        assert_eq!(aggregator.enabled_count(), 3);

        let merged = aggregator.search_artist("Portishead").await;
        assert_eq!(merged.genres.as_slice(), ["Trip Hop"]);
        assert_eq!(merged.sources, vec![ProviderKind::LastFm]);
        let mut failed: Vec<ProviderKind> = merged.errors.iter().map(|f| f.provider).collect();
        failed.sort();
        assert_eq!(failed, vec![ProviderKind::Itunes, ProviderKind::Spotify]);
        assert!(merged
            .errors
            .iter()
            .any(|f| matches!(f.error, ProviderError::Timeout)));
        assert_eq!(disabled.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn thumbnail_falls_back_to_image_list() {
        let mut result = artist_result("Massive Attack");
        result.thumbnail_url = Some("http://img/broken".to_string());
        result.image_urls = vec!["http://img/good".to_string()];
        let mut images = FakeImages::default();
        images
            .images
            .insert("http://img/good".to_string(), png(80, 40));
        let providers: Vec<Arc<dyn MetadataProvider>> = vec![FakeProvider::new(
            ProviderKind::MusicBrainz,
            Behaviour::Answer(result),
        )];
        let aggregator = Aggregator::new(providers, Arc::new(images), settings());

        let merged = aggregator.search_artist("Massive Attack").await;
        let thumbnail = merged.thumbnail.clone().unwrap();
        let decoded = image::load_from_memory(&thumbnail).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (20, 10));

        let mut artist = Artist::new("Massive Attack");
        assert!(merged.apply_to(&mut artist));
        assert!(artist.thumbnail.is_some());
    }

    #[tokio::test]
    async fn no_providers_still_returns_the_search_name() {
        let aggregator = Aggregator::new(Vec::new(), Arc::new(FakeImages::default()), settings());
        let merged = aggregator.search_artist("Nobody").await;
        assert_eq!(merged.name, "Nobody");
        assert!(merged.sources.is_empty());
        assert!(merged.thumbnail.is_none());
    }
}
