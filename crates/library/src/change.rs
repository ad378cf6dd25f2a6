use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use common::{
    relpath_from, stable_id, Artist, EntityKind, LibraryStatus, Media, Release, Status, Track,
};
use metadata::{AudioMetadata, TagReader};
use tracing::{debug, info, warn};

use crate::cache::CatalogCache;
use crate::folders::{audio_files_in_dir, disc_number_from_path, track_number_from_file_name};
use crate::matcher::Matcher;
use crate::store::{Catalog, ParentRef};
use crate::upsert::{ArtistDraft, Upserter};
use crate::LibraryError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackScanState {
    Unknown,
    Missing,
    Unchanged,
    New,
    Updated,
}

#[derive(Clone, Debug, Default)]
pub struct ReleaseScanReport {
    pub release_id: u64,
    pub folder_missing: bool,
    /// Final state of every track row touched by the scan, by track id.
    pub tracks: BTreeMap<u64, TrackScanState>,
    pub incomplete: usize,
    pub changed: bool,
    pub errors: Vec<String>,
}

impl ReleaseScanReport {
    pub fn count(&self, state: TrackScanState) -> usize {
        self.tracks.values().filter(|value| **value == state).count()
    }
}

/// Synchronizes one release's media and tracks with the files in its folder.
#[derive(Clone)]
pub struct ChangeScanner {
    catalog: Catalog,
    cache: Arc<CatalogCache>,
    upserter: Upserter,
    matcher: Matcher,
    reader: Arc<dyn TagReader>,
    root: PathBuf,
}

struct FileFacts {
    file_path: String,
    file_name: String,
    file_size: u64,
    fingerprint: String,
    artist_override: Option<u64>,
}

impl ChangeScanner {
    pub fn new(
        catalog: Catalog,
        cache: Arc<CatalogCache>,
        reader: Arc<dyn TagReader>,
        root: PathBuf,
    ) -> Self {
        Self {
            upserter: Upserter::new(catalog.clone(), cache.clone()),
            matcher: Matcher::new(catalog.clone(), cache.clone()),
            catalog,
            cache,
            reader,
            root,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn scan_release(
        &self,
        release_id: u64,
        folder: &Path,
    ) -> Result<ReleaseScanReport, LibraryError> {
        let release: Release = self.catalog.require(release_id)?;
        let mut report = ReleaseScanReport {
            release_id,
            ..ReleaseScanReport::default()
        };
        if !folder.is_dir() {
            warn!("Release folder {:?} is missing; nothing to scan", folder);
            report.folder_missing = true;
            return Ok(report);
        }
        info!("Scanning release {} '{}' in {:?}", release.id, release.title, folder);

        let mut media_rows: Vec<Media> = self
            .catalog
            .children(ParentRef::new(EntityKind::Release, release_id))?;
        let mut tracks: BTreeMap<u64, Track> = BTreeMap::new();
        for media in &media_rows {
            for track in self
                .catalog
                .children::<Track>(ParentRef::new(EntityKind::Media, media.id))?
            {
                tracks.insert(track.id, track);
            }
        }

        for track in tracks.values_mut() {
            if track.full_path(&self.root).exists() {
                continue;
            }
            report.tracks.insert(track.id, TrackScanState::Missing);
            if track.hash.is_some() || track.status != Status::Missing {
                debug!("Track file {} is missing", track.relpath());
                track.hash = None;
                track.status = Status::Missing;
                report.changed |= self.upserter.save_track(track)?.changed();
            }
        }

        let mut found: HashMap<u64, Vec<u16>> = HashMap::new();
        let mut seen: HashSet<(u64, u16)> = HashSet::new();
        let mut claimed: HashSet<u64> = HashSet::new();
        let mut reported_totals: Vec<u16> = Vec::new();
        for file in audio_files_in_dir(folder) {
            let Some(relpath) = relpath_from(&self.root, &file) else {
                let message = format!("{:?} is outside the library root", file);
                warn!("{}", message);
                report.errors.push(message);
                continue;
            };
            let (file_path, file_name) = match relpath.rsplit_once('/') {
                Some((dir, name)) => (dir.to_string(), name.to_string()),
                None => (String::new(), relpath.clone()),
            };
            let existing = tracks
                .values()
                .find(|track| {
                    !claimed.contains(&track.id)
                        && track.file_path == file_path
                        && track.file_name == file_name
                })
                .map(|track| track.id);

            let tags = match self.reader.read_tags(&file) {
                Ok(tags) => tags,
                Err(err) => {
                    let message = format!("Failed to read tags from {:?}: {}", file, err);
                    self.mark_incomplete(existing, &mut tracks, &mut report, message)?;
                    continue;
                }
            };
            let number = tags
                .track_number
                .filter(|n| *n > 0)
                .or_else(|| track_number_from_file_name(&file_name));
            let Some(number) = number else {
                let message = format!("No track number for {:?}", file);
                self.mark_incomplete(existing, &mut tracks, &mut report, message)?;
                continue;
            };
            let file_size = match fs::metadata(&file) {
                Ok(meta) => meta.len(),
                Err(err) => {
                    let message = format!("Failed to stat {:?}: {}", file, err);
                    self.mark_incomplete(existing, &mut tracks, &mut report, message)?;
                    continue;
                }
            };
            let disc = tags
                .disc
                .filter(|d| *d > 0)
                .or_else(|| disc_number_from_path(&file, folder))
                .unwrap_or(1);

            let media_id = match media_rows.iter().find(|media| media.media_number == disc) {
                Some(media) => media.id,
                None => {
                    let mut media = Media::new(release_id, disc);
                    self.upserter.save_media(&mut media)?;
                    report.changed = true;
                    let id = media.id;
                    media_rows.push(media);
                    id
                }
            };
            if !seen.insert((media_id, number)) {
                // Another file already holds this number; this one keeps its
                // row but loses its hash until the clash is resolved on disk.
                let message = format!(
                    "Duplicate track {} on media {} at {:?}; ignored",
                    number, disc, file
                );
                self.mark_incomplete(existing, &mut tracks, &mut report, message)?;
                continue;
            }
            found.entry(media_id).or_default().push(number);
            if let Some(total) = tags.total_tracks {
                reported_totals.push(total);
            }

            let artist_override = self.track_artist(release.artist_id, &tags, &mut report);
            let facts = FileFacts {
                fingerprint: fingerprint(release.artist_id, &file, &tags),
                file_path,
                file_name,
                file_size,
                artist_override,
            };

            // A row follows its file; failing that, a row for the same number
            // whose file is gone is taken over.
            let row_id = existing.or_else(|| {
                tracks
                    .values()
                    .find(|track| {
                        !claimed.contains(&track.id)
                            && track.media_id == media_id
                            && track.track_number == number
                            && !track.full_path(&self.root).exists()
                    })
                    .map(|track| track.id)
            });
            match row_id.and_then(|id| tracks.get_mut(&id)) {
                Some(track) => {
                    claimed.insert(track.id);
                    let same_slot = track.media_id == media_id && track.track_number == number;
                    let unchanged = same_slot
                        && track.hash.as_deref() == Some(facts.fingerprint.as_str())
                        && track.file_path == facts.file_path
                        && track.file_name == facts.file_name;
                    if unchanged {
                        report.tracks.insert(track.id, TrackScanState::Unchanged);
                        continue;
                    }
                    if !same_slot {
                        debug!(
                            "Track {} moves from {}/{} to {}/{}",
                            track.id, track.media_id, track.track_number, media_id, number
                        );
                        track.media_id = media_id;
                        track.track_number = number;
                    }
                    apply_file(track, &tags, facts);
                    track.status = Status::Updated;
                    self.upserter.save_track(track)?;
                    report.changed = true;
                    report.tracks.insert(track.id, TrackScanState::Updated);
                }
                None => {
                    let mut track = Track::new(media_id, number);
                    apply_file(&mut track, &tags, facts);
                    track.status = Status::New;
                    self.upserter.save_track(&mut track)?;
                    report.changed = true;
                    report.tracks.insert(track.id, TrackScanState::New);
                    claimed.insert(track.id);
                    tracks.insert(track.id, track);
                }
            }
        }

        // Tracks read with a hash this scan are settled.
        let settled: Vec<u64> = claimed
            .iter()
            .copied()
            .filter(|id| {
                tracks.get(id).is_some_and(|track| {
                    track.hash.is_some() && matches!(track.status, Status::New | Status::Updated)
                })
            })
            .collect();
        if !settled.is_empty() {
            self.catalog.write(|txn| {
                for id in &settled {
                    if let Some(track) = tracks.get_mut(id) {
                        track.status = Status::Ok;
                        txn.save(track)?;
                    }
                }
                Ok(())
            })?;
            report.changed = true;
        }

        let mut release_tracks = 0u32;
        let mut media_with_tracks = 0u32;
        let mut all_sequential = !media_rows.is_empty();
        for media in media_rows.iter_mut() {
            let mut numbers = found.remove(&media.id).unwrap_or_default();
            numbers.sort_unstable();
            numbers.dedup();
            let count = numbers.len() as u32;
            let sequential = is_sequential(&numbers);
            all_sequential &= sequential;
            if count > 0 {
                media_with_tracks += 1;
                release_tracks += count;
            }
            let status = if sequential {
                Status::Ok
            } else {
                Status::Incomplete
            };
            if media.track_count != count || media.status != status {
                media.track_count = count;
                media.status = status;
                report.changed |= self.upserter.save_media(media)?.changed();
            }
        }

        let mut release: Release = self.catalog.require(release_id)?;
        let status = if all_sequential {
            Status::Ok
        } else {
            Status::Incomplete
        };
        // Weak heuristic: one file's reported total is enough.
        let library_status = if release_tracks > 0
            && reported_totals
                .iter()
                .any(|total| u32::from(*total) == release_tracks)
        {
            LibraryStatus::Complete
        } else {
            LibraryStatus::Incomplete
        };
        if release.track_count != release_tracks
            || release.media_count != media_with_tracks
            || release.status != status
            || release.library_status != library_status
        {
            release.track_count = release_tracks;
            release.media_count = media_with_tracks;
            release.status = status;
            release.library_status = library_status;
            report.changed |= self.catalog.save(&mut release)?.changed();
        }
        report.changed |= self.refresh_artist_status(release.artist_id)?;

        if report.changed {
            self.cache.invalidate_region(&release.cache_region());
            self.cache
                .invalidate_region(&common::cache_region(EntityKind::Artist, release.artist_id));
        }
        info!(
            "Release {}: {} new, {} updated, {} unchanged, {} missing, {} incomplete",
            release_id,
            report.count(TrackScanState::New),
            report.count(TrackScanState::Updated),
            report.count(TrackScanState::Unchanged),
            report.count(TrackScanState::Missing),
            report.incomplete
        );
        Ok(report)
    }

    /// A file that exists but could not be read keeps its row, without a hash.
    fn mark_incomplete(
        &self,
        existing: Option<u64>,
        tracks: &mut BTreeMap<u64, Track>,
        report: &mut ReleaseScanReport,
        message: String,
    ) -> Result<(), LibraryError> {
        warn!("{}", message);
        report.errors.push(message);
        report.incomplete += 1;
        let Some(track) = existing.and_then(|id| tracks.get_mut(&id)) else {
            return Ok(());
        };
        if track.hash.is_some() || track.status != Status::Incomplete {
            track.hash = None;
            track.status = Status::Incomplete;
            report.changed |= self.upserter.save_track(track)?.changed();
        }
        Ok(())
    }

    /// Compilation tracks name their own artist; one not yet in the catalog
    /// is created so the override is never lost.
    fn track_artist(
        &self,
        release_artist_id: u64,
        tags: &AudioMetadata,
        report: &mut ReleaseScanReport,
    ) -> Option<u64> {
        let name = tags.track_artist_override()?;
        let found = match self.matcher.find_artist(name) {
            Ok(found) => found.map(|artist| artist.id),
            Err(err) => {
                let message = format!("Failed to look up track artist '{}': {}", name, err);
                warn!("{}", message);
                report.errors.push(message);
                return None;
            }
        };
        let artist_id = match found {
            Some(id) => id,
            None => {
                let mut draft = ArtistDraft::new(Artist::new(name));
                match self.upserter.save_artist(&mut draft) {
                    Ok(_) => {
                        info!("Created track artist {} '{}'", draft.artist.id, name);
                        draft.artist.id
                    }
                    Err(err) => {
                        let message = format!("Failed to create track artist '{}': {}", name, err);
                        warn!("{}", message);
                        report.errors.push(message);
                        return None;
                    }
                }
            }
        };
        Some(artist_id).filter(|id| *id != release_artist_id)
    }

    /// Ok once every release is Ok; Incomplete as soon as a scanned release
    /// is not. Artists with unscanned releases otherwise keep their status.
    fn refresh_artist_status(&self, artist_id: u64) -> Result<bool, LibraryError> {
        let releases: Vec<Release> = self
            .catalog
            .children(ParentRef::new(EntityKind::Artist, artist_id))?;
        let status = if releases
            .iter()
            .any(|release| !matches!(release.status, Status::New | Status::Ok))
        {
            Status::Incomplete
        } else if !releases.is_empty() && releases.iter().all(|release| release.status == Status::Ok)
        {
            Status::Ok
        } else {
            return Ok(false);
        };
        let mut artist: Artist = self.catalog.require(artist_id)?;
        if artist.status == status {
            return Ok(false);
        }
        artist.status = status;
        Ok(self.catalog.save(&mut artist)?.changed())
    }
}

/// Change signal for a file: release artist, modification time and tags.
fn fingerprint(artist_id: u64, file: &Path, tags: &AudioMetadata) -> String {
    let mtime = fs::metadata(file)
        .and_then(|meta| meta.modified())
        .ok()
        .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
        .map(|duration| duration.as_secs())
        .unwrap_or(0);
    stable_id(&format!("{}|{}|{}", artist_id, mtime, tags.digest()))
}

fn apply_file(track: &mut Track, tags: &AudioMetadata, facts: FileFacts) {
    track.title = tags
        .title
        .as_deref()
        .map(str::trim)
        .filter(|title| !title.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| file_stem(&facts.file_name));
    track.duration_ms = tags.duration_ms.unwrap_or(0);
    track.file_path = facts.file_path;
    track.file_name = facts.file_name;
    track.file_size = facts.file_size;
    track.hash = Some(facts.fingerprint);
    track.artist_id = facts.artist_override;
    track.ids.musicbrainz = tags.musicbrainz_track_id.clone();
}

fn file_stem(name: &str) -> String {
    Path::new(name)
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_else(|| name.to_string())
}

fn is_sequential(numbers: &[u16]) -> bool {
    !numbers.is_empty()
        && numbers
            .iter()
            .enumerate()
            .all(|(index, number)| usize::from(*number) == index + 1)
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;
    use std::sync::Arc;

    use common::{Artist, EntityKind, LibraryStatus, Media, Release, Status, Track};
    use metadata::testing::{track_tags, write_json_file, JsonTagReader};

    use super::{is_sequential, ChangeScanner, TrackScanState};
    use crate::store::ParentRef;
    use crate::test_support::{fixture, Fixture};

    fn seeded(fx: &Fixture) -> (Artist, Release) {
        let mut artist = Artist::new("ArtistX");
        fx.catalog.save(&mut artist).unwrap();
        let mut release = Release::new(artist.id, "ReleaseY");
        fx.catalog.save(&mut release).unwrap();
        (artist, release)
    }

    fn write_tracks(folder: &Path, numbers: &[u16], total: u16) {
        for number in numbers {
            let path = folder.join(format!("{:02} Track {}.mp3", number, number));
            write_json_file(&path, &track_tags("ArtistX", "ReleaseY", *number, total)).unwrap();
        }
    }

    fn scanner(fx: &Fixture) -> ChangeScanner {
        ChangeScanner::new(
            fx.catalog.clone(),
            fx.cache.clone(),
            Arc::new(JsonTagReader),
            fx.root().to_path_buf(),
        )
    }

    #[test]
    fn sequential_numbering() {
        assert!(is_sequential(&[1, 2, 3]));
        assert!(!is_sequential(&[1, 3]));
        assert!(!is_sequential(&[2, 3]));
        assert!(!is_sequential(&[]));
    }

    #[test]
    fn first_scan_creates_media_and_tracks() {
        let fx = fixture();
        let (_, release) = seeded(&fx);
        let folder = fx.root().join("ArtistX").join("ReleaseY");
        write_tracks(&folder, &[1, 2, 3], 3);

        let report = scanner(&fx).scan_release(release.id, &folder).unwrap();
        assert_eq!(report.count(TrackScanState::New), 3);
        assert!(report.changed);

        let release: Release = fx.catalog.require(release.id).unwrap();
        assert_eq!(release.media_count, 1);
        assert_eq!(release.track_count, 3);
        assert_eq!(release.status, Status::Ok);
        assert_eq!(release.library_status, LibraryStatus::Complete);
        let media: Vec<Media> = fx
            .catalog
            .children(ParentRef::new(EntityKind::Release, release.id))
            .unwrap();
        assert_eq!(media.len(), 1);
        assert_eq!(media[0].status, Status::Ok);
    }

    #[test]
    fn second_scan_of_unchanged_folder_writes_nothing() {
        let fx = fixture();
        let (_, release) = seeded(&fx);
        let folder = fx.root().join("ArtistX").join("ReleaseY");
        write_tracks(&folder, &[1, 2, 3], 3);
        let scanner = scanner(&fx);
        scanner.scan_release(release.id, &folder).unwrap();
        let before: Release = fx.catalog.require(release.id).unwrap();
        let invalidations = fx.cache.invalidation_count();

        let report = scanner.scan_release(release.id, &folder).unwrap();
        assert!(!report.changed);
        assert_eq!(report.count(TrackScanState::Unchanged), 3);
        assert_eq!(fx.cache.invalidation_count(), invalidations);
        let after: Release = fx.catalog.require(release.id).unwrap();
        assert_eq!(after.last_updated, before.last_updated);
    }

    #[test]
    fn removed_file_marks_track_missing() {
        let fx = fixture();
        let (_, release) = seeded(&fx);
        let folder = fx.root().join("ArtistX").join("ReleaseY");
        write_tracks(&folder, &[1, 2, 3], 3);
        let scanner = scanner(&fx);
        scanner.scan_release(release.id, &folder).unwrap();

        fs::remove_file(folder.join("02 Track 2.mp3")).unwrap();
        let report = scanner.scan_release(release.id, &folder).unwrap();
        assert_eq!(report.count(TrackScanState::Missing), 1);

        let tracks: Vec<Track> = fx.catalog.all().unwrap();
        assert_eq!(tracks.len(), 3);
        let missing = tracks.iter().find(|t| t.track_number == 2).unwrap();
        assert_eq!(missing.status, Status::Missing);
        assert!(missing.hash.is_none());

        let release: Release = fx.catalog.require(release.id).unwrap();
        assert_eq!(release.track_count, 2);
        assert_eq!(release.status, Status::Incomplete);
    }

    #[test]
    fn unreadable_file_keeps_its_track_row() {
        let fx = fixture();
        let (_, release) = seeded(&fx);
        let folder = fx.root().join("ArtistX").join("ReleaseY");
        write_tracks(&folder, &[1, 2], 2);
        let scanner = scanner(&fx);
        scanner.scan_release(release.id, &folder).unwrap();

        fs::write(folder.join("02 Track 2.mp3"), b"not json").unwrap();
        let report = scanner.scan_release(release.id, &folder).unwrap();
        assert_eq!(report.incomplete, 1);
        assert_eq!(report.errors.len(), 1);

        let tracks: Vec<Track> = fx.catalog.all().unwrap();
        assert_eq!(tracks.len(), 2);
        let broken = tracks.iter().find(|t| t.track_number == 2).unwrap();
        assert_eq!(broken.status, Status::Incomplete);
        assert!(broken.hash.is_none());
    }

    #[test]
    fn retagged_file_is_updated_and_discs_get_media() {
        let fx = fixture();
        let (_, release) = seeded(&fx);
        let folder = fx.root().join("ArtistX").join("ReleaseY");
        write_tracks(&folder.join("CD1"), &[1], 1);
        let mut second = track_tags("ArtistX", "ReleaseY", 1, 1);
        second.disc = None;
        write_json_file(&folder.join("CD2").join("01 Other.mp3"), &second).unwrap();
        let scanner = scanner(&fx);
        scanner.scan_release(release.id, &folder).unwrap();
        let media: Vec<Media> = fx
            .catalog
            .children(ParentRef::new(EntityKind::Release, release.id))
            .unwrap();
        assert_eq!(media.len(), 2);

        second.title = Some("Renamed".to_string());
        write_json_file(&folder.join("CD2").join("01 Other.mp3"), &second).unwrap();
        let report = scanner.scan_release(release.id, &folder).unwrap();
        assert_eq!(report.count(TrackScanState::Updated), 1);
        assert_eq!(report.count(TrackScanState::Unchanged), 1);
        let tracks: Vec<Track> = fx.catalog.all().unwrap();
        assert!(tracks.iter().any(|t| t.title == "Renamed"));
    }

    #[test]
    fn scanned_tracks_and_artist_are_promoted() {
        let fx = fixture();
        let (artist, release) = seeded(&fx);
        assert_eq!(artist.status, Status::New);
        let folder = fx.root().join("ArtistX").join("ReleaseY");
        write_tracks(&folder, &[1, 2], 2);
        scanner(&fx).scan_release(release.id, &folder).unwrap();

        let tracks: Vec<Track> = fx.catalog.all().unwrap();
        assert!(tracks.iter().all(|t| t.status == Status::Ok && t.hash.is_some()));
        let artist: Artist = fx.catalog.require(artist.id).unwrap();
        assert_eq!(artist.status, Status::Ok);

        fs::remove_file(folder.join("02 Track 2.mp3")).unwrap();
        write_tracks(&folder, &[3], 2);
        scanner(&fx).scan_release(release.id, &folder).unwrap();
        let artist: Artist = fx.catalog.require(artist.id).unwrap();
        assert_eq!(artist.status, Status::Incomplete);
    }

    #[test]
    fn renumbered_file_keeps_its_row() {
        let fx = fixture();
        let (_, release) = seeded(&fx);
        let folder = fx.root().join("ArtistX").join("ReleaseY");
        write_tracks(&folder, &[1, 2], 2);
        let scanner = scanner(&fx);
        scanner.scan_release(release.id, &folder).unwrap();
        let before: Vec<Track> = fx.catalog.all().unwrap();
        let second_id = before.iter().find(|t| t.track_number == 2).unwrap().id;

        let file = folder.join("02 Track 2.mp3");
        write_json_file(&file, &track_tags("ArtistX", "ReleaseY", 4, 2)).unwrap();
        let report = scanner.scan_release(release.id, &folder).unwrap();
        assert_eq!(report.count(TrackScanState::Updated), 1);
        assert_eq!(report.count(TrackScanState::New), 0);

        let tracks: Vec<Track> = fx.catalog.all().unwrap();
        let rows: Vec<&Track> = tracks
            .iter()
            .filter(|t| t.file_name == "02 Track 2.mp3")
            .collect();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, second_id);
        assert_eq!(rows[0].track_number, 4);
        assert_eq!(rows[0].status, Status::Ok);

        let release: Release = fx.catalog.require(release.id).unwrap();
        assert_eq!(release.track_count, 2);
        assert_eq!(release.status, Status::Incomplete);
    }

    #[test]
    fn swapped_track_numbers_follow_their_files() {
        let fx = fixture();
        let (_, release) = seeded(&fx);
        let folder = fx.root().join("ArtistX").join("ReleaseY");
        write_tracks(&folder, &[1, 2], 2);
        let scanner = scanner(&fx);
        scanner.scan_release(release.id, &folder).unwrap();
        let ids: Vec<(String, u64)> = fx
            .catalog
            .all::<Track>()
            .unwrap()
            .into_iter()
            .map(|t| (t.file_name, t.id))
            .collect();

        write_json_file(
            &folder.join("01 Track 1.mp3"),
            &track_tags("ArtistX", "ReleaseY", 2, 2),
        )
        .unwrap();
        write_json_file(
            &folder.join("02 Track 2.mp3"),
            &track_tags("ArtistX", "ReleaseY", 1, 2),
        )
        .unwrap();
        let report = scanner.scan_release(release.id, &folder).unwrap();
        assert_eq!(report.count(TrackScanState::Updated), 2);
        assert!(report.errors.is_empty(), "{:?}", report.errors);

        let tracks: Vec<Track> = fx.catalog.all().unwrap();
        assert_eq!(tracks.len(), 2);
        for (name, id) in ids {
            let track = tracks.iter().find(|t| t.id == id).unwrap();
            assert_eq!(track.file_name, name);
            let expected = if name.starts_with("01") { 2 } else { 1 };
            assert_eq!(track.track_number, expected);
        }
        let release: Release = fx.catalog.require(release.id).unwrap();
        assert_eq!(release.status, Status::Ok);
    }

    #[test]
    fn unknown_compilation_artist_is_created() {
        let fx = fixture();
        let (artist, release) = seeded(&fx);
        let folder = fx.root().join("ArtistX").join("ReleaseY");
        let mut tags = track_tags("ArtistX", "ReleaseY", 1, 1);
        tags.artist = Some("Guest Singer".to_string());
        write_json_file(&folder.join("01 Duet.mp3"), &tags).unwrap();
        let scanner = scanner(&fx);
        scanner.scan_release(release.id, &folder).unwrap();

        let artists: Vec<Artist> = fx.catalog.all().unwrap();
        assert_eq!(artists.len(), 2);
        let guest = artists.iter().find(|a| a.name == "Guest Singer").unwrap();
        assert_ne!(guest.id, artist.id);
        let tracks: Vec<Track> = fx.catalog.all().unwrap();
        assert_eq!(tracks[0].artist_id, Some(guest.id));

        let report = scanner.scan_release(release.id, &folder).unwrap();
        assert!(!report.changed);
        assert_eq!(fx.catalog.all::<Artist>().unwrap().len(), 2);
    }

    #[test]
    fn absent_folder_is_not_an_error() {
        let fx = fixture();
        let (_, release) = seeded(&fx);
        let report = scanner(&fx)
            .scan_release(release.id, &fx.root().join("nowhere"))
            .unwrap();
        assert!(report.folder_missing);
        assert!(!report.changed);
    }
}
