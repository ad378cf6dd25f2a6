use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use library::{collect_release_dirs, LibraryError, TrackScanState};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::pipeline::{FolderOutcome, FolderPipeline};
use crate::ScanError;

/// Cooperative cancellation, checked before each folder.
#[derive(Clone, Debug, Default)]
pub struct WalkControl {
    cancelled: Arc<AtomicBool>,
}

impl WalkControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub folders: usize,
    pub artists_created: usize,
    pub releases_created: usize,
    pub tracks_new: usize,
    pub tracks_updated: usize,
    pub tracks_unchanged: usize,
    pub tracks_missing: usize,
    pub tracks_incomplete: usize,
    pub removed_folders: usize,
    pub cancelled: bool,
    pub errors: Vec<String>,
}

impl ScanReport {
    fn absorb(&mut self, outcome: FolderOutcome) {
        self.folders += 1;
        self.artists_created += usize::from(outcome.artist_created);
        self.releases_created += usize::from(outcome.release_created);
        self.tracks_new += outcome.scan.count(TrackScanState::New);
        self.tracks_updated += outcome.scan.count(TrackScanState::Updated);
        self.tracks_unchanged += outcome.scan.count(TrackScanState::Unchanged);
        self.tracks_missing += outcome.scan.count(TrackScanState::Missing);
        self.tracks_incomplete += outcome.scan.incomplete;
        self.errors.extend(outcome.errors);
    }
}

/// Runs the pipeline over every release folder under the library root, one
/// folder at a time.
#[derive(Clone)]
pub struct FolderWalker {
    pipeline: FolderPipeline,
    delete_empty_folders: bool,
}

impl FolderWalker {
    pub fn new(pipeline: FolderPipeline, delete_empty_folders: bool) -> Self {
        Self {
            pipeline,
            delete_empty_folders,
        }
    }

    pub fn root(&self) -> &Path {
        self.pipeline.root()
    }

    pub async fn walk(&self, control: &WalkControl) -> Result<ScanReport, ScanError> {
        let root = self.root().to_path_buf();
        check_root(&root)?;
        let folders = {
            let root = root.clone();
            tokio::task::spawn_blocking(move || collect_release_dirs(&root)).await?
        };
        info!("Found {} release folders under {:?}", folders.len(), root);

        let mut report = ScanReport::default();
        for folder in folders {
            if control.is_cancelled() {
                info!("Scan cancelled before {:?}", folder);
                report.cancelled = true;
                break;
            }
            match self.pipeline.process_folder(&folder).await {
                Ok(outcome) => report.absorb(outcome),
                Err(err) => {
                    let message = format!("Failed to process {:?}: {}", folder, err);
                    warn!("{}", message);
                    report.errors.push(message);
                }
            }
        }

        if self.delete_empty_folders && !report.cancelled {
            let removed = {
                let root = root.clone();
                tokio::task::spawn_blocking(move || remove_empty_folders(&root)).await?
            };
            report.removed_folders = removed.len();
        }
        info!(
            "Scan of {:?} done: {} folders, {} new, {} updated, {} unchanged, {} missing, {} errors",
            root,
            report.folders,
            report.tracks_new,
            report.tracks_updated,
            report.tracks_unchanged,
            report.tracks_missing,
            report.errors.len()
        );
        Ok(report)
    }
}

fn check_root(root: &Path) -> Result<(), LibraryError> {
    if !root.exists() {
        return Err(LibraryError::Config(format!(
            "library root {:?} does not exist",
            root
        )));
    }
    if !root.is_dir() {
        return Err(LibraryError::Config(format!(
            "library root {:?} is not a directory",
            root
        )));
    }
    fs::read_dir(root)
        .map(|_| ())
        .map_err(|err| LibraryError::Config(format!("cannot read library root {:?}: {}", root, err)))
}

/// Deletes every directory under `root` that is empty, deepest first, so
/// parents emptied along the way go too. `root` itself is kept.
pub fn remove_empty_folders(root: &Path) -> Vec<PathBuf> {
    let mut removed = Vec::new();
    for entry in WalkDir::new(root)
        .follow_links(false)
        .min_depth(1)
        .contents_first(true)
        .into_iter()
        .filter_map(Result::ok)
    {
        if !entry.file_type().is_dir() {
            continue;
        }
        let path = entry.path();
        let empty = fs::read_dir(path)
            .map(|mut entries| entries.next().is_none())
            .unwrap_or(false);
        if !empty {
            continue;
        }
        match fs::remove_dir(path) {
            Ok(()) => removed.push(path.to_path_buf()),
            Err(err) => warn!("Failed to remove empty folder {:?}: {}", path, err),
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;
    use std::sync::Arc;

    use common::{Artist, EntityKind, LibraryStatus, Media, Release, Status, Track};
    use library::{Catalog, CatalogCache, LibraryError, ParentRef};
    use metadata::testing::{track_tags, write_json_file, JsonTagReader};

    use super::{remove_empty_folders, FolderWalker, ScanReport, WalkControl};
    use crate::pipeline::{FolderPipeline, PipelineSettings};
    use crate::ScanError;

    fn walker(root: &Path, catalog: &Catalog, delete_empty_folders: bool) -> FolderWalker {
        let pipeline = FolderPipeline::new(
            catalog.clone(),
            Arc::new(CatalogCache::new()),
            Arc::new(JsonTagReader),
            root.to_path_buf(),
            None,
            PipelineSettings::default(),
        );
        FolderWalker::new(pipeline, delete_empty_folders)
    }

    fn write_release(root: &Path, artist: &str, release: &str, total: u16) {
        for n in 1..=total {
            let path = root
                .join(artist)
                .join(release)
                .join(format!("{:02} Track {}.mp3", n, n));
            write_json_file(&path, &track_tags(artist, release, n, total)).unwrap();
        }
    }

    fn release_tracks(catalog: &Catalog, release: &Release) -> Vec<Track> {
        let mut tracks = Vec::new();
        for media in catalog
            .children::<Media>(ParentRef::new(EntityKind::Release, release.id))
            .unwrap()
        {
            tracks.extend(
                catalog
                    .children::<Track>(ParentRef::new(EntityKind::Media, media.id))
                    .unwrap(),
            );
        }
        tracks.sort_by_key(|track| track.track_number);
        tracks
    }

    #[tokio::test]
    async fn scans_a_new_release_folder() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("music");
        write_release(&root, "ArtistX", "ReleaseY", 3);
        let catalog = Catalog::open(&dir.path().join("catalog.redb")).unwrap();
        let walker = walker(&root, &catalog, true);

        let report = walker.walk(&WalkControl::new()).await.unwrap();
        assert_eq!(report.folders, 1);
        assert_eq!(report.artists_created, 1);
        assert_eq!(report.releases_created, 1);
        assert_eq!(report.tracks_new, 3);
        assert!(report.errors.is_empty());

        let artists = catalog.all::<Artist>().unwrap();
        assert_eq!(artists.len(), 1);
        assert_eq!(artists[0].name, "ArtistX");
        let releases = catalog.all::<Release>().unwrap();
        assert_eq!(releases.len(), 1);
        let release = &releases[0];
        assert_eq!(release.title, "ReleaseY");
        assert_eq!(release.artist_id, artists[0].id);
        assert_eq!(release.media_count, 1);
        assert_eq!(release.track_count, 3);
        assert_eq!(release.status, Status::Ok);
        assert_eq!(release.library_status, LibraryStatus::Complete);
    }

    #[tokio::test]
    async fn second_walk_of_unchanged_library_changes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("music");
        write_release(&root, "ArtistX", "ReleaseY", 3);
        write_release(&root, "ArtistX", "Other", 2);
        let catalog = Catalog::open(&dir.path().join("catalog.redb")).unwrap();
        let walker = walker(&root, &catalog, true);

        let first = walker.walk(&WalkControl::new()).await.unwrap();
        assert_eq!(first.artists_created, 1);
        assert_eq!(first.releases_created, 2);

        let second = walker.walk(&WalkControl::new()).await.unwrap();
        assert_eq!(
            second,
            ScanReport {
                folders: 2,
                tracks_unchanged: 5,
                ..ScanReport::default()
            }
        );
    }

    #[tokio::test]
    async fn removed_track_becomes_missing() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("music");
        write_release(&root, "ArtistX", "ReleaseY", 3);
        let catalog = Catalog::open(&dir.path().join("catalog.redb")).unwrap();
        let walker = walker(&root, &catalog, true);
        walker.walk(&WalkControl::new()).await.unwrap();

        fs::remove_file(root.join("ArtistX").join("ReleaseY").join("02 Track 2.mp3")).unwrap();
        let report = walker.walk(&WalkControl::new()).await.unwrap();
        assert_eq!(report.tracks_missing, 1);
        assert_eq!(report.tracks_unchanged, 2);

        let release = catalog.all::<Release>().unwrap().remove(0);
        assert_eq!(release.track_count, 2);
        assert_eq!(release.status, Status::Incomplete);
        let tracks = release_tracks(&catalog, &release);
        assert_eq!(tracks.len(), 3);
        assert_eq!(tracks[1].status, Status::Missing);
        assert!(tracks[1].hash.is_none());
    }

    #[tokio::test]
    async fn missing_root_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::open(&dir.path().join("catalog.redb")).unwrap();
        let walker = walker(&dir.path().join("nowhere"), &catalog, true);
        let err = walker.walk(&WalkControl::new()).await.unwrap_err();
        assert!(matches!(err, ScanError::Library(LibraryError::Config(_))));

        let file = dir.path().join("file.txt");
        fs::write(&file, b"x").unwrap();
        let walker = super::FolderWalker::new(
            FolderPipeline::new(
                catalog.clone(),
                Arc::new(CatalogCache::new()),
                Arc::new(JsonTagReader),
                file,
                None,
                PipelineSettings::default(),
            ),
            false,
        );
        assert!(walker.walk(&WalkControl::new()).await.is_err());
    }

    #[tokio::test]
    async fn cancelled_walk_stops_before_the_next_folder() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("music");
        write_release(&root, "ArtistX", "ReleaseY", 1);
        fs::create_dir_all(root.join("Empty").join("Nothing")).unwrap();
        let catalog = Catalog::open(&dir.path().join("catalog.redb")).unwrap();
        let walker = walker(&root, &catalog, true);
        let control = WalkControl::new();
        control.cancel();

        let report = walker.walk(&control).await.unwrap();
        assert!(report.cancelled);
        assert_eq!(report.folders, 0);
        assert!(catalog.all::<Release>().unwrap().is_empty());
        assert!(root.join("Empty").exists());
    }

    #[tokio::test]
    async fn bad_folder_is_reported_and_the_walk_continues() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("music");
        fs::create_dir_all(root.join("Stray")).unwrap();
        fs::write(root.join("Stray").join("x.mp3"), b"garbage").unwrap();
        write_release(&root, "ArtistX", "ReleaseY", 2);
        let catalog = Catalog::open(&dir.path().join("catalog.redb")).unwrap();
        let walker = walker(&root, &catalog, false);

        let report = walker.walk(&WalkControl::new()).await.unwrap();
        assert_eq!(report.folders, 1);
        assert_eq!(report.tracks_new, 2);
        assert!(report
            .errors
            .iter()
            .any(|message| message.contains("Stray")));
    }

    #[test]
    fn removes_nested_empty_folders_only() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("a").join("b").join("c")).unwrap();
        fs::create_dir_all(root.join("keep")).unwrap();
        fs::write(root.join("keep").join("song.mp3"), b"x").unwrap();

        let removed = remove_empty_folders(root);
        assert_eq!(removed.len(), 3);
        assert!(!root.join("a").exists());
        assert!(root.join("keep").join("song.mp3").exists());
        assert!(root.exists());
    }
}
