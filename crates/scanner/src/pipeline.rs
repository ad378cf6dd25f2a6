use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use common::{parse_partial_date, Artist, Image, ImageOwner, NameList, Release};
use library::{
    audio_files_in_dir, find_folder_cover, split_title_year, ArtistDraft, Catalog, CatalogCache,
    ChangeScanner, LabelDraft, LibraryError, Matcher, ReleaseDraft, ReleaseScanReport, Upserter,
};
use metadata::TagReader;
use providers::{prepare_thumbnail, Aggregator};
use tracing::{debug, info, warn};

use crate::ScanError;

#[derive(Clone, Debug)]
pub struct PipelineSettings {
    /// Ask the providers about artists and releases the scan creates.
    pub enrich_new_entities: bool,
    pub thumbnail_width: u32,
    pub thumbnail_height: u32,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            enrich_new_entities: true,
            thumbnail_width: 160,
            thumbnail_height: 160,
        }
    }
}

/// What one release folder contributed to the catalog.
#[derive(Clone, Debug)]
pub struct FolderOutcome {
    pub folder: PathBuf,
    pub artist_id: u64,
    pub release_id: u64,
    pub artist_created: bool,
    pub release_created: bool,
    pub scan: ReleaseScanReport,
    pub errors: Vec<String>,
}

/// Names and artwork a folder's tags agree on, with folder-name fallbacks.
#[derive(Clone, Debug, Default)]
struct FolderIdentity {
    artist: String,
    release: String,
    year: Option<i32>,
    genres: Vec<String>,
    musicbrainz_artist_id: Option<String>,
    musicbrainz_release_id: Option<String>,
    embedded_cover: Option<Vec<u8>>,
    errors: Vec<String>,
}

/// Per-folder ingest: identify the folder, match or create its artist and
/// release, then synchronize tracks with the change scanner.
#[derive(Clone)]
pub struct FolderPipeline {
    upserter: Upserter,
    matcher: Matcher,
    scanner: ChangeScanner,
    reader: Arc<dyn TagReader>,
    aggregator: Option<Aggregator>,
    settings: PipelineSettings,
    root: PathBuf,
}

impl FolderPipeline {
    pub fn new(
        catalog: Catalog,
        cache: Arc<CatalogCache>,
        reader: Arc<dyn TagReader>,
        root: PathBuf,
        aggregator: Option<Aggregator>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            upserter: Upserter::new(catalog.clone(), cache.clone()),
            matcher: Matcher::new(catalog.clone(), cache.clone()),
            scanner: ChangeScanner::new(catalog, cache, reader.clone(), root.clone()),
            reader,
            aggregator,
            settings,
            root,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn process_folder(&self, folder: &Path) -> Result<FolderOutcome, ScanError> {
        let identity = {
            let reader = self.reader.clone();
            let root = self.root.clone();
            let folder = folder.to_path_buf();
            blocking(move || identify_folder(reader.as_ref(), &root, &folder)).await?
        };
        info!(
            "Processing {:?} as '{}' by '{}'",
            folder, identity.release, identity.artist
        );
        let mut errors = identity.errors.clone();

        let (artist, artist_created) = self.ensure_artist(&identity, &mut errors).await?;
        let (release, release_created) = self
            .ensure_release(&artist, &identity, folder, &mut errors)
            .await?;

        let scanner = self.scanner.clone();
        let release_id = release.id;
        let release_folder = folder.to_path_buf();
        let scan = blocking(move || scanner.scan_release(release_id, &release_folder)).await?;
        errors.extend(scan.errors.iter().cloned());

        Ok(FolderOutcome {
            folder: folder.to_path_buf(),
            artist_id: artist.id,
            release_id: release.id,
            artist_created,
            release_created,
            scan,
            errors,
        })
    }

    fn enrichment_enabled(&self) -> Option<&Aggregator> {
        if !self.settings.enrich_new_entities {
            return None;
        }
        self.aggregator
            .as_ref()
            .filter(|aggregator| aggregator.enabled_count() > 0)
    }

    async fn ensure_artist(
        &self,
        identity: &FolderIdentity,
        errors: &mut Vec<String>,
    ) -> Result<(Artist, bool), ScanError> {
        let matcher = self.matcher.clone();
        let name = identity.artist.clone();
        if let Some(artist) = blocking(move || matcher.find_artist(&name)).await? {
            debug!("Matched artist '{}' to {}", identity.artist, artist.id);
            return Ok((artist, false));
        }

        let mut draft = ArtistDraft::new(Artist::new(&identity.artist));
        draft.artist.ids.musicbrainz = identity.musicbrainz_artist_id.clone();
        if let Some(aggregator) = self.enrichment_enabled() {
            let enrichment = aggregator.search_artist(&identity.artist).await;
            enrichment.apply_to(&mut draft.artist);
            draft.genres = enrichment.genres.iter().cloned().collect();
            draft.images = url_images(ImageOwner::Artist(0), &enrichment.image_urls);
            errors.extend(enrichment.errors.iter().map(|failure| failure.to_string()));
        }

        let upserter = self.upserter.clone();
        let draft = blocking(move || {
            upserter.save_artist(&mut draft)?;
            Ok(draft)
        })
        .await?;
        info!("Created artist {} '{}'", draft.artist.id, draft.artist.name);
        Ok((draft.artist, true))
    }

    async fn ensure_release(
        &self,
        artist: &Artist,
        identity: &FolderIdentity,
        folder: &Path,
        errors: &mut Vec<String>,
    ) -> Result<(Release, bool), ScanError> {
        let matcher = self.matcher.clone();
        let artist_id = artist.id;
        let title = identity.release.clone();
        let existing = blocking(move || matcher.find_release(artist_id, &title)).await?;

        if let Some(release) = existing {
            debug!("Matched release '{}' to {}", identity.release, release.id);
            if release.thumbnail.is_some() {
                return Ok((release, false));
            }
            // Artwork may have been added to the folder since the last scan.
            let Some(thumbnail) = self.local_thumbnail(identity, folder).await else {
                return Ok((release, false));
            };
            let upserter = self.upserter.clone();
            let release_id = release.id;
            let release = blocking(move || {
                let mut draft = upserter.load_release(release_id)?;
                draft.release.thumbnail = Some(thumbnail);
                upserter.save_release(&mut draft)?;
                Ok(draft.release)
            })
            .await?;
            return Ok((release, false));
        }

        let mut draft = ReleaseDraft::new(Release::new(artist.id, &identity.release));
        draft.release.release_date = identity
            .year
            .and_then(|year| parse_partial_date(&format!("{:04}", year)));
        draft.release.ids.musicbrainz = identity.musicbrainz_release_id.clone();
        draft.genres = identity.genres.clone();
        if let Some(aggregator) = self.enrichment_enabled() {
            let enrichment = aggregator
                .search_release(&artist.name, &identity.release)
                .await;
            enrichment.apply_to(&mut draft.release);
            draft.genres.extend(enrichment.genres.iter().cloned());
            draft.labels = enrichment
                .labels
                .iter()
                .map(|label| LabelDraft {
                    name: label.name.clone(),
                    catalog_number: label.catalog_number.clone(),
                    ..LabelDraft::default()
                })
                .collect();
            draft.images = url_images(ImageOwner::Release(0), &enrichment.image_urls);
            errors.extend(enrichment.errors.iter().map(|failure| failure.to_string()));
        }
        if draft.release.thumbnail.is_none() {
            draft.release.thumbnail = self.local_thumbnail(identity, folder).await;
        }

        let upserter = self.upserter.clone();
        let draft = blocking(move || {
            upserter.save_release(&mut draft)?;
            Ok(draft)
        })
        .await?;
        info!(
            "Created release {} '{}' for artist {}",
            draft.release.id, draft.release.title, artist.id
        );
        Ok((draft.release, true))
    }

    /// Embedded tag artwork first, then a cover file in the folder.
    async fn local_thumbnail(&self, identity: &FolderIdentity, folder: &Path) -> Option<Vec<u8>> {
        let embedded = identity.embedded_cover.clone();
        let folder = folder.to_path_buf();
        let (width, height) = (self.settings.thumbnail_width, self.settings.thumbnail_height);
        let result = tokio::task::spawn_blocking(move || {
            if let Some(bytes) = embedded {
                match prepare_thumbnail(&bytes, width, height) {
                    Ok(thumbnail) => return Some(thumbnail),
                    Err(err) => warn!("Embedded artwork in {:?} is unusable: {}", folder, err),
                }
            }
            let cover = find_folder_cover(&folder)?;
            let bytes = match fs::read(&cover) {
                Ok(bytes) => bytes,
                Err(err) => {
                    warn!("Failed to read {:?}: {}", cover, err);
                    return None;
                }
            };
            match prepare_thumbnail(&bytes, width, height) {
                Ok(thumbnail) => Some(thumbnail),
                Err(err) => {
                    warn!("Cover {:?} is unusable: {}", cover, err);
                    None
                }
            }
        })
        .await;
        match result {
            Ok(thumbnail) => thumbnail,
            Err(err) => {
                warn!("Thumbnail task failed: {}", err);
                None
            }
        }
    }
}

async fn blocking<T, F>(task: F) -> Result<T, ScanError>
where
    F: FnOnce() -> Result<T, LibraryError> + Send + 'static,
    T: Send + 'static,
{
    Ok(tokio::task::spawn_blocking(task).await??)
}

fn url_images(owner: ImageOwner, urls: &NameList) -> Vec<Image> {
    urls.iter()
        .enumerate()
        .map(|(idx, url)| Image::from_url(owner, url, idx as u32))
        .collect()
}

/// Reads tags until one file names both the release and its artist. Missing
/// names fall back to the folder (`Title (YYYY)`) and its parent (artist).
fn identify_folder(
    reader: &dyn TagReader,
    root: &Path,
    folder: &Path,
) -> Result<FolderIdentity, LibraryError> {
    let mut identity = FolderIdentity::default();
    for file in audio_files_in_dir(folder) {
        let tags = match reader.read_tags(&file) {
            Ok(tags) => tags,
            Err(err) => {
                let message = format!("Failed to read tags from {:?}: {}", file, err);
                warn!("{}", message);
                identity.errors.push(message);
                continue;
            }
        };
        if identity.embedded_cover.is_none() {
            identity.embedded_cover = tags.cover_image().map(|image| image.data.clone());
        }
        let (Some(artist), Some(release)) = (
            tags.release_artist_name(),
            tags.release.as_deref().map(str::trim).filter(|v| !v.is_empty()),
        ) else {
            continue;
        };
        identity.artist = artist.to_string();
        identity.release = release.to_string();
        identity.year = tags.year;
        identity.genres = tags.genres.clone();
        identity.musicbrainz_artist_id = tags.musicbrainz_artist_id.clone();
        identity.musicbrainz_release_id = tags.musicbrainz_release_id.clone();
        return Ok(identity);
    }

    let folder_name = folder
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    let (title, year) = split_title_year(&folder_name);
    let parent_name = folder
        .parent()
        .filter(|parent| *parent != root && parent.starts_with(root))
        .and_then(|parent| parent.file_name())
        .map(|name| name.to_string_lossy().trim().to_string())
        .unwrap_or_default();
    if title.trim().is_empty() || parent_name.is_empty() {
        return Err(LibraryError::Validation(format!(
            "cannot tell artist and release for {:?}",
            folder
        )));
    }
    debug!("Using folder names for {:?}", folder);
    identity.artist = parent_name;
    identity.release = title;
    identity.year = year;
    Ok(identity)
}
