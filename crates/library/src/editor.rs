use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use common::{
    cache_region, fill_option, fill_text, join_relpath, Artist, ArtistAssociation, ArtistGenre,
    EntityKind, Image, ImageOwner, LibraryStatus, Media, RatingTarget, Release, ReleaseGenre,
    ReleaseLabel, Status, Track, UserRating,
};
use metadata::TagReader;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::cache::CatalogCache;
use crate::folders::{
    artist_folder_name, audio_files_in_dir, move_file, parse_disc_number, release_relpath,
    remove_empty_dirs, track_file_name,
};
use crate::normalize::normalize_name;
use crate::records::{image_parent, rating_parent};
use crate::store::{Catalog, CatalogTxn, NameField, ParentRef};
use crate::upsert::Upserter;
use crate::LibraryError;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MediaMergeMode {
    /// The loser's media are renumbered after the survivor's last one.
    #[default]
    AppendAsNewMedia,
    /// Media with the same number are merged track by track.
    MergeByMediaNumber,
}

#[derive(Clone, Debug)]
pub struct MergeOptions {
    pub media_mode: MediaMergeMode,
    /// Move the merged files under the survivor's folder.
    pub relocate_files: bool,
    /// Remove the loser's copy of a track the survivor already has.
    pub delete_duplicate_files: bool,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            media_mode: MediaMergeMode::AppendAsNewMedia,
            relocate_files: true,
            delete_duplicate_files: false,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct RenameReport {
    /// Derived folder, relative to the library root.
    pub new_folder: String,
    pub retagged: usize,
    pub moved: usize,
    pub removed_folders: Vec<PathBuf>,
    pub errors: Vec<String>,
}

impl RenameReport {
    fn absorb(&mut self, other: RenameReport) {
        self.retagged += other.retagged;
        self.moved += other.moved;
        self.removed_folders.extend(other.removed_folders);
        self.errors.extend(other.errors);
    }
}

#[derive(Clone, Debug, Default)]
pub struct MergeReport {
    pub survivor_id: u64,
    /// Dependent rows moved (or folded) onto the survivor.
    pub repointed: usize,
    /// Loser files whose track the survivor already had.
    pub duplicate_files: Vec<PathBuf>,
    pub deleted_files: Vec<PathBuf>,
    pub loser_deleted: bool,
    pub errors: Vec<String>,
}

#[derive(Clone, Debug, Default)]
pub struct DeleteReport {
    pub tracks_removed: usize,
    pub deleted_files: Vec<PathBuf>,
    pub removed_folders: Vec<PathBuf>,
    pub errors: Vec<String>,
}

/// Renames, merges and deletes catalog entities, keeping files and folders
/// in step with the catalog.
#[derive(Clone)]
pub struct Editor {
    catalog: Catalog,
    cache: Arc<CatalogCache>,
    upserter: Upserter,
    reader: Arc<dyn TagReader>,
    root: PathBuf,
}

impl Editor {
    pub fn new(
        catalog: Catalog,
        cache: Arc<CatalogCache>,
        reader: Arc<dyn TagReader>,
        root: PathBuf,
    ) -> Self {
        Self {
            upserter: Upserter::new(catalog.clone(), cache.clone()),
            catalog,
            cache,
            reader,
            root,
        }
    }

    pub fn rename_release(
        &self,
        release_id: u64,
        title: &str,
    ) -> Result<RenameReport, LibraryError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(LibraryError::Validation("release title is empty".to_string()));
        }
        let mut draft = self.upserter.load_release(release_id)?;
        let artist_id = draft.release.artist_id;
        if let Some(other) =
            self.catalog
                .find_by_name::<Release>(artist_id, NameField::Name, &normalize_name(title))?
        {
            if other.id != release_id {
                return Err(LibraryError::Validation(format!(
                    "artist {} already has release {} named '{}'",
                    artist_id, other.id, other.title
                )));
            }
        }
        info!(
            "Renaming release {} '{}' -> '{}'",
            release_id, draft.release.title, title
        );
        draft.release.title = title.to_string();
        self.upserter.save_release(&mut draft)?;
        self.relocate_release(release_id)
    }

    pub fn rename_artist(&self, artist_id: u64, name: &str) -> Result<RenameReport, LibraryError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(LibraryError::Validation("artist name is empty".to_string()));
        }
        let mut draft = self.upserter.load_artist(artist_id)?;
        if let Some(other) =
            self.catalog
                .find_by_name::<Artist>(0, NameField::Name, &normalize_name(name))?
        {
            if other.id != artist_id {
                return Err(LibraryError::Validation(format!(
                    "artist {} is already named '{}'",
                    other.id, other.name
                )));
            }
        }
        info!("Renaming artist {} '{}' -> '{}'", artist_id, draft.artist.name, name);
        draft.artist.name = name.to_string();
        self.upserter.save_artist(&mut draft)?;

        let mut report = RenameReport {
            new_folder: artist_folder_name(&draft.artist),
            ..RenameReport::default()
        };
        let releases: Vec<Release> = self
            .catalog
            .children(ParentRef::new(EntityKind::Artist, artist_id))?;
        for release in releases {
            match self.relocate_release(release.id) {
                Ok(moved) => report.absorb(moved),
                Err(err) => {
                    let message = format!("Failed to relocate release {}: {}", release.id, err);
                    warn!("{}", message);
                    report.errors.push(message);
                }
            }
        }
        Ok(report)
    }

    /// Moves every track of a release to its derived folder. Each file is
    /// retagged at its old path before it is moved; a file that cannot be
    /// retagged stays where it is.
    pub fn relocate_release(&self, release_id: u64) -> Result<RenameReport, LibraryError> {
        let release: Release = self.catalog.require(release_id)?;
        let artist: Artist = self.catalog.require(release.artist_id)?;
        let new_rel = release_relpath(&artist, &release);
        let new_dir = join_relpath(&self.root, &new_rel);
        let mut report = RenameReport {
            new_folder: new_rel.clone(),
            ..RenameReport::default()
        };

        let media_rows: Vec<Media> = self
            .catalog
            .children(ParentRef::new(EntityKind::Release, release_id))?;
        let multi_media = media_rows.len() > 1;
        let mut tracks: Vec<(u16, Track)> = Vec::new();
        for media in &media_rows {
            for track in self
                .catalog
                .children::<Track>(ParentRef::new(EntityKind::Media, media.id))?
            {
                tracks.push((media.media_number, track));
            }
        }
        let mut prefix = common_folder(tracks.iter().map(|(_, track)| track.file_path.as_str()));
        // A single disc folder is the common prefix itself; keep it as a sub-folder.
        if prefix.len() > 1
            && prefix
                .last()
                .is_some_and(|last| parse_disc_number(last).is_some())
        {
            prefix.pop();
        }

        let mut old_dirs = BTreeSet::new();
        for (media_number, mut track) in tracks {
            let (target_rel, old_release_rel) = placement(&new_rel, &prefix, &track.file_path);
            if track.file_path == target_rel {
                continue;
            }
            let old_path = track.full_path(&self.root);
            if !old_path.is_file() {
                track.file_path = target_rel;
                self.catalog.save(&mut track)?;
                continue;
            }
            if !old_release_rel.is_empty() {
                old_dirs.insert(join_relpath(&self.root, &old_release_rel));
            }

            if let Err(err) = self.retag(&old_path, &artist, &release, media_number, &track) {
                let message = format!("Failed to retag {:?}: {}", old_path, err);
                warn!("{}", message);
                report.errors.push(message);
                continue;
            }
            report.retagged += 1;

            let target_dir = join_relpath(&self.root, &target_rel);
            let mut file_name = track.file_name.clone();
            let mut new_path = target_dir.join(&file_name);
            if new_path.exists() {
                let ext = Path::new(&file_name)
                    .extension()
                    .map(|ext| ext.to_string_lossy().to_string())
                    .unwrap_or_default();
                file_name = track_file_name(&track, media_number, multi_media, &ext);
                new_path = target_dir.join(&file_name);
            }
            if new_path.exists() {
                let message = format!("{:?} already exists; {:?} not moved", new_path, old_path);
                warn!("{}", message);
                report.errors.push(message);
                continue;
            }
            if let Err(err) = move_file(&old_path, &new_path) {
                let message = format!("Failed to move {:?} -> {:?}: {}", old_path, new_path, err);
                warn!("{}", message);
                report.errors.push(message);
                continue;
            }
            report.moved += 1;
            track.file_path = target_rel;
            track.file_name = file_name;
            self.catalog.save(&mut track)?;
        }

        for old_dir in old_dirs {
            self.clear_old_folder(&old_dir, &new_dir, &mut report);
        }
        if report.moved > 0 {
            self.cache.invalidate_region(&release.cache_region());
        }
        info!(
            "Release {} now in '{}': {} moved, {} errors",
            release_id,
            new_rel,
            report.moved,
            report.errors.len()
        );
        Ok(report)
    }

    /// Folds `loser_id` into `survivor_id` and deletes the loser. Each repoint
    /// step runs in its own transaction; a failed step is reported and the
    /// rest still run.
    pub fn merge_artists(
        &self,
        loser_id: u64,
        survivor_id: u64,
        options: &MergeOptions,
    ) -> Result<MergeReport, LibraryError> {
        if loser_id == survivor_id {
            return Err(LibraryError::Validation(format!(
                "cannot merge artist {} into itself",
                loser_id
            )));
        }
        let loser: Artist = self.catalog.require(loser_id)?;
        let mut draft = self.upserter.load_artist(survivor_id)?;
        info!(
            "Merging artist {} '{}' into {} '{}'",
            loser_id, loser.name, survivor_id, draft.artist.name
        );
        merge_artist_fields(&mut draft.artist, &loser);
        self.upserter.save_artist(&mut draft)?;

        let mut report = MergeReport {
            survivor_id,
            ..MergeReport::default()
        };
        let loser_ref = ParentRef::new(EntityKind::Artist, loser_id);
        let survivor_ref = ParentRef::new(EntityKind::Artist, survivor_id);

        let moved_releases: Vec<u64> = self
            .attempt(&mut report.errors, "releases", || {
                self.catalog.write(|txn| {
                    let mut moved = Vec::new();
                    for mut release in txn.children::<Release>(loser_ref)? {
                        release.artist_id = survivor_id;
                        txn.save(&mut release)?;
                        moved.push(release.id);
                    }
                    Ok(moved)
                })
            })
            .unwrap_or_default();
        let steps: [(&str, Option<usize>); 6] = [
            ("releases", Some(moved_releases.len())),
            (
                "genres",
                self.attempt(&mut report.errors, "genres", || {
                    self.catalog.write(|txn| {
                        let mut kept: HashSet<u64> = txn
                            .children::<ArtistGenre>(survivor_ref)?
                            .into_iter()
                            .map(|row| row.genre_id)
                            .collect();
                        let mut count = 0;
                        for mut row in txn.children::<ArtistGenre>(loser_ref)? {
                            if kept.insert(row.genre_id) {
                                row.artist_id = survivor_id;
                                txn.save(&mut row)?;
                            } else {
                                txn.delete::<ArtistGenre>(row.id)?;
                            }
                            count += 1;
                        }
                        Ok(count)
                    })
                }),
            ),
            (
                "images",
                self.attempt(&mut report.errors, "images", || {
                    self.catalog.write(|txn| {
                        repoint_images(
                            txn,
                            ImageOwner::Artist(loser_id),
                            ImageOwner::Artist(survivor_id),
                        )
                    })
                }),
            ),
            (
                "associations",
                self.attempt(&mut report.errors, "associations", || {
                    self.catalog
                        .write(|txn| repoint_associations(txn, loser_id, survivor_id))
                }),
            ),
            (
                "ratings",
                self.attempt(&mut report.errors, "ratings", || {
                    self.catalog.write(|txn| {
                        repoint_ratings(
                            txn,
                            RatingTarget::Artist(loser_id),
                            RatingTarget::Artist(survivor_id),
                        )
                    })
                }),
            ),
            (
                "track artists",
                self.attempt(&mut report.errors, "track artists", || {
                    self.catalog.update_where::<Track>(|track| {
                        if track.artist_id == Some(loser_id) {
                            track.artist_id = Some(survivor_id);
                            true
                        } else {
                            false
                        }
                    })
                }),
            ),
        ];
        for (step, count) in steps {
            if let Some(count) = count {
                info!("Merge artist {} -> {}: {} {} repointed", loser_id, survivor_id, count, step);
                report.repointed += count;
            }
        }

        if options.relocate_files {
            for release_id in &moved_releases {
                self.relocate_into(&mut report, *release_id);
            }
        }

        let deleted = self.attempt(&mut report.errors, "delete loser", || {
            self.catalog.write(|txn| {
                let remaining = txn.children::<Release>(loser_ref)?.len();
                if remaining > 0 {
                    return Err(LibraryError::Validation(format!(
                        "artist {} still owns {} releases",
                        loser_id, remaining
                    )));
                }
                delete_artist_rows(txn, loser_id)
            })
        });
        report.loser_deleted = deleted.is_some();

        self.cache.invalidate_region(&loser.cache_region());
        self.cache.invalidate_region(&draft.artist.cache_region());
        for release_id in &moved_releases {
            self.cache
                .invalidate_region(&cache_region(EntityKind::Release, *release_id));
        }
        info!(
            "Merged artist {} into {}: {} rows repointed, {} errors",
            loser_id,
            survivor_id,
            report.repointed,
            report.errors.len()
        );
        Ok(report)
    }

    pub fn merge_releases(
        &self,
        loser_id: u64,
        survivor_id: u64,
        options: &MergeOptions,
    ) -> Result<MergeReport, LibraryError> {
        if loser_id == survivor_id {
            return Err(LibraryError::Validation(format!(
                "cannot merge release {} into itself",
                loser_id
            )));
        }
        let loser: Release = self.catalog.require(loser_id)?;
        let mut draft = self.upserter.load_release(survivor_id)?;
        info!(
            "Merging release {} '{}' into {} '{}' ({:?})",
            loser_id, loser.title, survivor_id, draft.release.title, options.media_mode
        );
        merge_release_fields(&mut draft.release, &loser);
        self.upserter.save_release(&mut draft)?;

        let mut report = MergeReport {
            survivor_id,
            ..MergeReport::default()
        };
        let loser_ref = ParentRef::new(EntityKind::Release, loser_id);
        let survivor_ref = ParentRef::new(EntityKind::Release, survivor_id);

        let side_steps = [
            self.attempt(&mut report.errors, "genres", || {
                self.catalog.write(|txn| {
                    let mut kept: HashSet<u64> = txn
                        .children::<ReleaseGenre>(survivor_ref)?
                        .into_iter()
                        .map(|row| row.genre_id)
                        .collect();
                    let mut count = 0;
                    for mut row in txn.children::<ReleaseGenre>(loser_ref)? {
                        if kept.insert(row.genre_id) {
                            row.release_id = survivor_id;
                            txn.save(&mut row)?;
                        } else {
                            txn.delete::<ReleaseGenre>(row.id)?;
                        }
                        count += 1;
                    }
                    Ok(count)
                })
            }),
            self.attempt(&mut report.errors, "labels", || {
                self.catalog.write(|txn| {
                    let mut kept: HashSet<(u64, Option<String>)> = txn
                        .children::<ReleaseLabel>(survivor_ref)?
                        .into_iter()
                        .map(|row| (row.label_id, row.catalog_number))
                        .collect();
                    let mut count = 0;
                    for mut row in txn.children::<ReleaseLabel>(loser_ref)? {
                        if kept.insert((row.label_id, row.catalog_number.clone())) {
                            row.release_id = survivor_id;
                            txn.save(&mut row)?;
                        } else {
                            txn.delete::<ReleaseLabel>(row.id)?;
                        }
                        count += 1;
                    }
                    Ok(count)
                })
            }),
            self.attempt(&mut report.errors, "images", || {
                self.catalog.write(|txn| {
                    repoint_images(
                        txn,
                        ImageOwner::Release(loser_id),
                        ImageOwner::Release(survivor_id),
                    )
                })
            }),
            self.attempt(&mut report.errors, "ratings", || {
                self.catalog.write(|txn| {
                    repoint_ratings(
                        txn,
                        RatingTarget::Release(loser_id),
                        RatingTarget::Release(survivor_id),
                    )
                })
            }),
        ];
        report.repointed += side_steps.iter().flatten().sum::<usize>();

        let mut duplicates: Vec<(PathBuf, PathBuf)> = Vec::new();
        match options.media_mode {
            MediaMergeMode::AppendAsNewMedia => {
                let moved = self.attempt(&mut report.errors, "media", || {
                    self.catalog.write(|txn| {
                        let mut next = txn
                            .children::<Media>(survivor_ref)?
                            .iter()
                            .map(|media| media.media_number)
                            .max()
                            .unwrap_or(0);
                        let mut media_rows: Vec<Media> = txn.children(loser_ref)?;
                        media_rows.sort_by_key(|media| media.media_number);
                        let count = media_rows.len();
                        for mut media in media_rows {
                            next += 1;
                            media.release_id = survivor_id;
                            media.media_number = next;
                            txn.save(&mut media)?;
                        }
                        Ok(count)
                    })
                });
                report.repointed += moved.unwrap_or(0);
            }
            MediaMergeMode::MergeByMediaNumber => {
                let media_rows: Vec<Media> = self.catalog.children(loser_ref)?;
                for media in media_rows {
                    let step = format!("media {}", media.media_number);
                    let merged = self.attempt(&mut report.errors, &step, || {
                        self.catalog
                            .write(|txn| merge_media(txn, &media, survivor_id, &self.root))
                    });
                    if let Some((count, pairs)) = merged {
                        report.repointed += count;
                        duplicates.extend(pairs);
                    }
                }
            }
        }

        for (duplicate, kept) in duplicates {
            if !duplicate.is_file() || duplicate == kept {
                continue;
            }
            warn!("{:?} duplicates {:?}", duplicate, kept);
            report.duplicate_files.push(duplicate.clone());
            if options.delete_duplicate_files && kept.is_file() {
                match fs::remove_file(&duplicate) {
                    Ok(()) => report.deleted_files.push(duplicate),
                    Err(err) => {
                        let message = format!("Failed to delete {:?}: {}", duplicate, err);
                        warn!("{}", message);
                        report.errors.push(message);
                    }
                }
            }
        }

        self.attempt(&mut report.errors, "counts", || {
            self.catalog.write(|txn| recount_release(txn, survivor_id))
        });
        if options.relocate_files {
            self.relocate_into(&mut report, survivor_id);
        }

        let root = self.root.clone();
        let deleted = self.attempt(&mut report.errors, "delete loser", || {
            self.catalog.write(|txn| {
                let remaining = txn.children::<Media>(loser_ref)?.len();
                if remaining > 0 {
                    return Err(LibraryError::Validation(format!(
                        "release {} still owns {} media",
                        loser_id, remaining
                    )));
                }
                delete_release_rows(txn, loser_id, &root).map(|_| ())
            })
        });
        report.loser_deleted = deleted.is_some();
        if report.loser_deleted {
            let dirs: BTreeSet<PathBuf> = report
                .deleted_files
                .iter()
                .filter_map(|file| file.parent().map(Path::to_path_buf))
                .collect();
            for dir in dirs {
                remove_empty_dirs(&dir, &self.root);
            }
        }

        self.cache.invalidate_region(&loser.cache_region());
        self.cache.invalidate_region(&draft.release.cache_region());
        self.cache
            .invalidate_region(&cache_region(EntityKind::Artist, loser.artist_id));
        self.cache
            .invalidate_region(&cache_region(EntityKind::Artist, draft.release.artist_id));
        info!(
            "Merged release {} into {}: {} rows repointed, {} duplicate files, {} errors",
            loser_id,
            survivor_id,
            report.repointed,
            report.duplicate_files.len(),
            report.errors.len()
        );
        Ok(report)
    }

    pub fn delete_track(&self, track_id: u64, delete_file: bool) -> Result<DeleteReport, LibraryError> {
        let track: Track = self.catalog.require(track_id)?;
        let media: Option<Media> = self.catalog.get(track.media_id)?;
        self.catalog.write(|txn| {
            delete_ratings(txn, RatingTarget::Track(track_id))?;
            txn.delete::<Track>(track_id)
        })?;
        let mut report = DeleteReport {
            tracks_removed: 1,
            ..DeleteReport::default()
        };
        if delete_file {
            self.remove_files(vec![track.full_path(&self.root)], &mut report);
        }
        self.cache.invalidate_region(&track.cache_region());
        if let Some(media) = media {
            self.cache.invalidate_region(&media.cache_region());
            self.cache
                .invalidate_region(&cache_region(EntityKind::Release, media.release_id));
        }
        info!("Deleted track {} '{}'", track_id, track.title);
        Ok(report)
    }

    pub fn delete_release(
        &self,
        release_id: u64,
        delete_files: bool,
    ) -> Result<DeleteReport, LibraryError> {
        let release: Release = self.catalog.require(release_id)?;
        let root = self.root.clone();
        let files = self
            .catalog
            .write(|txn| delete_release_rows(txn, release_id, &root))?;
        let mut report = DeleteReport {
            tracks_removed: files.len(),
            ..DeleteReport::default()
        };
        if delete_files {
            self.remove_files(files, &mut report);
        }
        self.cache.invalidate_region(&release.cache_region());
        self.cache
            .invalidate_region(&cache_region(EntityKind::Artist, release.artist_id));
        info!(
            "Deleted release {} '{}' with {} tracks",
            release_id, release.title, report.tracks_removed
        );
        Ok(report)
    }

    /// Deletes an artist. Refused while the artist still owns releases unless
    /// `cascade` is set.
    pub fn delete_artist(
        &self,
        artist_id: u64,
        cascade: bool,
        delete_files: bool,
    ) -> Result<DeleteReport, LibraryError> {
        let artist: Artist = self.catalog.require(artist_id)?;
        let releases: Vec<Release> = self
            .catalog
            .children(ParentRef::new(EntityKind::Artist, artist_id))?;
        if !releases.is_empty() && !cascade {
            return Err(LibraryError::Validation(format!(
                "artist {} '{}' still owns {} releases",
                artist_id,
                artist.name,
                releases.len()
            )));
        }
        let root = self.root.clone();
        let files = self.catalog.write(|txn| {
            let mut files = Vec::new();
            for release in &releases {
                files.extend(delete_release_rows(txn, release.id, &root)?);
            }
            for mut track in txn.all::<Track>()? {
                if track.artist_id == Some(artist_id) {
                    track.artist_id = None;
                    txn.save(&mut track)?;
                }
            }
            delete_artist_rows(txn, artist_id)?;
            Ok(files)
        })?;
        let mut report = DeleteReport {
            tracks_removed: files.len(),
            ..DeleteReport::default()
        };
        if delete_files {
            self.remove_files(files, &mut report);
        }
        self.cache.invalidate_region(&artist.cache_region());
        for release in &releases {
            self.cache.invalidate_region(&release.cache_region());
        }
        info!(
            "Deleted artist {} '{}' with {} releases",
            artist_id,
            artist.name,
            releases.len()
        );
        Ok(report)
    }

    fn retag(
        &self,
        path: &Path,
        artist: &Artist,
        release: &Release,
        media_number: u16,
        track: &Track,
    ) -> Result<(), LibraryError> {
        let mut tags = self.reader.read_tags(path)?;
        tags.release = Some(release.title.clone());
        tags.release_artist = Some(artist.name.clone());
        if track.artist_id.is_none() {
            tags.artist = Some(artist.name.clone());
        }
        tags.disc = Some(media_number);
        tags.track_number = Some(track.track_number);
        self.reader.write_tags(path, &tags)?;
        Ok(())
    }

    /// Moves what is left in an old release folder once no audio remains, then
    /// removes the emptied folders.
    fn clear_old_folder(&self, old_dir: &Path, new_dir: &Path, report: &mut RenameReport) {
        if old_dir == self.root || old_dir == new_dir || new_dir.starts_with(old_dir) {
            return;
        }
        if !old_dir.is_dir() {
            return;
        }
        if !audio_files_in_dir(old_dir).is_empty() {
            warn!("{:?} still holds audio files; left in place", old_dir);
            return;
        }
        let leftovers: Vec<PathBuf> = WalkDir::new(old_dir)
            .min_depth(1)
            .follow_links(false)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .collect();
        for file in leftovers {
            let Ok(rel) = file.strip_prefix(old_dir) else {
                continue;
            };
            let target = new_dir.join(rel);
            if target.exists() {
                warn!("{:?} already exists; leaving {:?}", target, file);
                continue;
            }
            if let Err(err) = move_file(&file, &target) {
                let message = format!("Failed to move {:?} -> {:?}: {}", file, target, err);
                warn!("{}", message);
                report.errors.push(message);
            }
        }
        report
            .removed_folders
            .extend(remove_empty_dirs(old_dir, &self.root));
    }

    fn relocate_into(&self, report: &mut MergeReport, release_id: u64) {
        match self.relocate_release(release_id) {
            Ok(moved) => report.errors.extend(moved.errors),
            Err(err) => {
                let message = format!("Failed to relocate release {}: {}", release_id, err);
                warn!("{}", message);
                report.errors.push(message);
            }
        }
    }

    fn remove_files(&self, files: Vec<PathBuf>, report: &mut DeleteReport) {
        let mut dirs = BTreeSet::new();
        for file in files {
            if !file.exists() {
                continue;
            }
            match fs::remove_file(&file) {
                Ok(()) => {
                    if let Some(parent) = file.parent() {
                        dirs.insert(parent.to_path_buf());
                    }
                    report.deleted_files.push(file);
                }
                Err(err) => {
                    let message = format!("Failed to delete {:?}: {}", file, err);
                    warn!("{}", message);
                    report.errors.push(message);
                }
            }
        }
        for dir in dirs.into_iter().rev() {
            report
                .removed_folders
                .extend(remove_empty_dirs(&dir, &self.root));
        }
    }

    fn attempt<R>(
        &self,
        errors: &mut Vec<String>,
        step: &str,
        f: impl FnOnce() -> Result<R, LibraryError>,
    ) -> Option<R> {
        match f() {
            Ok(value) => Some(value),
            Err(err) => {
                let message = format!("Merge step '{}' failed: {}", step, err);
                warn!("{}", message);
                errors.push(message);
                None
            }
        }
    }
}

/// Fills the survivor's empty scalars from the loser and unions the lists.
/// The loser's name becomes an alternate name of the survivor.
pub fn merge_artist_fields(survivor: &mut Artist, loser: &Artist) -> bool {
    let mut changed = false;
    changed |= fill_text(&mut survivor.sort_name, &loser.sort_name);
    changed |= fill_option(&mut survivor.artist_type, &loser.artist_type);
    changed |= fill_option(&mut survivor.begin_date, &loser.begin_date);
    changed |= fill_option(&mut survivor.end_date, &loser.end_date);
    changed |= fill_text(&mut survivor.profile, &loser.profile);
    changed |= fill_text(&mut survivor.bio, &loser.bio);
    changed |= fill_option(&mut survivor.thumbnail, &loser.thumbnail);
    changed |= survivor.ids.fill_missing(&loser.ids);
    changed |= survivor.tags.union(&loser.tags);
    changed |= survivor.urls.union(&loser.urls);
    changed |= survivor.isni_list.union(&loser.isni_list);
    changed |= survivor.alternate_names.union(&loser.alternate_names);
    if normalize_name(&loser.name) != normalize_name(&survivor.name) {
        changed |= survivor.alternate_names.insert(&loser.name);
    }
    changed
}

pub fn merge_release_fields(survivor: &mut Release, loser: &Release) -> bool {
    let mut changed = false;
    changed |= fill_option(&mut survivor.release_date, &loser.release_date);
    changed |= fill_option(&mut survivor.release_type, &loser.release_type);
    changed |= fill_text(&mut survivor.profile, &loser.profile);
    changed |= fill_option(&mut survivor.thumbnail, &loser.thumbnail);
    changed |= survivor.ids.fill_missing(&loser.ids);
    changed |= survivor.tags.union(&loser.tags);
    changed |= survivor.urls.union(&loser.urls);
    changed |= survivor.alternate_names.union(&loser.alternate_names);
    if normalize_name(&loser.title) != normalize_name(&survivor.title) {
        changed |= survivor.alternate_names.insert(&loser.title);
    }
    changed
}

fn common_folder<'a>(paths: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut prefix: Option<Vec<&str>> = None;
    for path in paths {
        let parts: Vec<&str> = path.split('/').filter(|part| !part.is_empty()).collect();
        prefix = Some(match prefix {
            None => parts,
            Some(mut current) => {
                let shared = current
                    .iter()
                    .zip(parts.iter())
                    .take_while(|(a, b)| a == b)
                    .count();
                current.truncate(shared);
                current
            }
        });
    }
    prefix
        .unwrap_or_default()
        .into_iter()
        .map(str::to_string)
        .collect()
}

/// Target folder for a track and the old release folder it comes from. A
/// disc sub-folder directly under the shared prefix is kept; anything else is
/// flattened into the release folder.
fn placement(new_rel: &str, prefix: &[String], file_path: &str) -> (String, String) {
    let parts: Vec<&str> = file_path.split('/').filter(|part| !part.is_empty()).collect();
    let suffix = &parts[prefix.len().min(parts.len())..];
    match suffix {
        [disc] if parse_disc_number(disc).is_some() => {
            (format!("{}/{}", new_rel, disc), prefix.join("/"))
        }
        _ => (new_rel.to_string(), parts.join("/")),
    }
}

fn repoint_images(
    txn: &mut CatalogTxn,
    from: ImageOwner,
    to: ImageOwner,
) -> Result<usize, LibraryError> {
    let existing: Vec<Image> = txn.children(image_parent(to))?;
    let mut signatures: HashSet<String> = existing.iter().map(Image::signature).collect();
    let mut next_order = existing
        .iter()
        .map(|image| image.sort_order + 1)
        .max()
        .unwrap_or(0);
    let mut count = 0;
    for mut image in txn.children::<Image>(image_parent(from))? {
        if signatures.insert(image.signature()) {
            image.owner = to;
            image.sort_order = next_order;
            next_order += 1;
            txn.save(&mut image)?;
        } else {
            txn.delete::<Image>(image.id)?;
        }
        count += 1;
    }
    Ok(count)
}

fn repoint_associations(
    txn: &mut CatalogTxn,
    loser_id: u64,
    survivor_id: u64,
) -> Result<usize, LibraryError> {
    let mut pairs: HashSet<(u64, u64)> = txn
        .all::<ArtistAssociation>()?
        .into_iter()
        .filter(|row| row.artist_id != loser_id && row.associated_artist_id != loser_id)
        .map(|row| (row.artist_id, row.associated_artist_id))
        .collect();
    let mut count = 0;
    for mut row in txn.all::<ArtistAssociation>()? {
        if row.artist_id != loser_id && row.associated_artist_id != loser_id {
            continue;
        }
        if row.artist_id == loser_id {
            row.artist_id = survivor_id;
        }
        if row.associated_artist_id == loser_id {
            row.associated_artist_id = survivor_id;
        }
        let pair = (row.artist_id, row.associated_artist_id);
        if row.artist_id != row.associated_artist_id && pairs.insert(pair) {
            txn.save(&mut row)?;
        } else {
            txn.delete::<ArtistAssociation>(row.id)?;
        }
        count += 1;
    }
    Ok(count)
}

/// Moves ratings to another target. When the same user rated both, the
/// ratings are folded into the survivor's row.
fn repoint_ratings(
    txn: &mut CatalogTxn,
    from: RatingTarget,
    to: RatingTarget,
) -> Result<usize, LibraryError> {
    let mut kept: HashMap<u64, UserRating> = txn
        .children::<UserRating>(rating_parent(to))?
        .into_iter()
        .map(|row| (row.user_id, row))
        .collect();
    let mut count = 0;
    for mut row in txn.children::<UserRating>(rating_parent(from))? {
        match kept.get_mut(&row.user_id) {
            Some(target) => {
                combine_ratings(target, &row);
                txn.save(target)?;
                txn.delete::<UserRating>(row.id)?;
            }
            None => {
                row.target = to;
                txn.save(&mut row)?;
                kept.insert(row.user_id, row);
            }
        }
        count += 1;
    }
    Ok(count)
}

fn combine_ratings(target: &mut UserRating, other: &UserRating) {
    target.rating = target.rating.max(other.rating);
    target.is_favorite |= other.is_favorite;
    target.played_count = target.played_count.saturating_add(other.played_count);
    target.last_played = target.last_played.max(other.last_played);
}

fn delete_ratings(txn: &mut CatalogTxn, target: RatingTarget) -> Result<(), LibraryError> {
    for row in txn.children::<UserRating>(rating_parent(target))? {
        txn.delete::<UserRating>(row.id)?;
    }
    Ok(())
}

/// Merges one loser media into the survivor's media with the same number.
/// Returns the rows moved and the (duplicate, kept) file pairs.
fn merge_media(
    txn: &mut CatalogTxn,
    media: &Media,
    survivor_id: u64,
    root: &Path,
) -> Result<(usize, Vec<(PathBuf, PathBuf)>), LibraryError> {
    let target = txn
        .children::<Media>(ParentRef::new(EntityKind::Release, survivor_id))?
        .into_iter()
        .find(|row| row.media_number == media.media_number);
    let Some(target) = target else {
        let mut moved = media.clone();
        moved.release_id = survivor_id;
        txn.save(&mut moved)?;
        return Ok((1, Vec::new()));
    };

    let mut existing: HashMap<u16, Track> = txn
        .children::<Track>(ParentRef::new(EntityKind::Media, target.id))?
        .into_iter()
        .map(|track| (track.track_number, track))
        .collect();
    let mut count = 0;
    let mut duplicates = Vec::new();
    for mut track in txn.children::<Track>(ParentRef::new(EntityKind::Media, media.id))? {
        match existing.get_mut(&track.track_number) {
            Some(kept) => {
                count += repoint_ratings(
                    txn,
                    RatingTarget::Track(track.id),
                    RatingTarget::Track(kept.id),
                )?;
                let mut dirty = fill_option(&mut kept.artist_id, &track.artist_id);
                if kept.status == Status::Missing && track.hash.is_some() {
                    // The kept row lost its file; it takes over the loser's copy.
                    adopt_file(kept, &track);
                    dirty = true;
                } else {
                    duplicates.push((track.full_path(root), kept.full_path(root)));
                }
                if dirty {
                    txn.save(kept)?;
                }
                txn.delete::<Track>(track.id)?;
            }
            None => {
                track.media_id = target.id;
                txn.save(&mut track)?;
                existing.insert(track.track_number, track);
                count += 1;
            }
        }
    }
    txn.delete::<Media>(media.id)?;
    Ok((count, duplicates))
}

fn adopt_file(kept: &mut Track, donor: &Track) {
    kept.file_path = donor.file_path.clone();
    kept.file_name = donor.file_name.clone();
    kept.file_size = donor.file_size;
    kept.hash = donor.hash.clone();
    if kept.duration_ms == 0 {
        kept.duration_ms = donor.duration_ms;
    }
    kept.status = Status::Ok;
}

/// Recomputes media and release counts from the rows now attached.
fn recount_release(txn: &mut CatalogTxn, release_id: u64) -> Result<(), LibraryError> {
    let mut release: Release = txn.require(release_id)?;
    let mut release_tracks = 0u32;
    let mut media_with_tracks = 0u32;
    let mut all_sequential = true;
    for mut media in txn.children::<Media>(ParentRef::new(EntityKind::Release, release_id))? {
        let mut numbers: Vec<u16> = txn
            .children::<Track>(ParentRef::new(EntityKind::Media, media.id))?
            .into_iter()
            .filter(|track| track.status != Status::Missing)
            .map(|track| track.track_number)
            .collect();
        numbers.sort_unstable();
        numbers.dedup();
        let sequential = !numbers.is_empty()
            && numbers
                .iter()
                .enumerate()
                .all(|(index, number)| usize::from(*number) == index + 1);
        all_sequential &= sequential;
        let count = numbers.len() as u32;
        if count > 0 {
            media_with_tracks += 1;
            release_tracks += count;
        }
        media.track_count = count;
        media.status = if sequential {
            Status::Ok
        } else {
            Status::Incomplete
        };
        txn.save(&mut media)?;
    }
    release.track_count = release_tracks;
    release.media_count = media_with_tracks;
    release.status = if all_sequential && media_with_tracks > 0 {
        Status::Ok
    } else {
        Status::Incomplete
    };
    if release.status != Status::Ok {
        release.library_status = LibraryStatus::Incomplete;
    }
    txn.save(&mut release)?;
    Ok(())
}

/// Deletes a release with its media, tracks and side rows. Returns the track
/// file paths that were attached.
fn delete_release_rows(
    txn: &mut CatalogTxn,
    release_id: u64,
    root: &Path,
) -> Result<Vec<PathBuf>, LibraryError> {
    let release_ref = ParentRef::new(EntityKind::Release, release_id);
    let mut files = Vec::new();
    for media in txn.children::<Media>(release_ref)? {
        for track in txn.children::<Track>(ParentRef::new(EntityKind::Media, media.id))? {
            delete_ratings(txn, RatingTarget::Track(track.id))?;
            files.push(track.full_path(root));
            txn.delete::<Track>(track.id)?;
        }
        txn.delete::<Media>(media.id)?;
    }
    for row in txn.children::<ReleaseGenre>(release_ref)? {
        txn.delete::<ReleaseGenre>(row.id)?;
    }
    for row in txn.children::<ReleaseLabel>(release_ref)? {
        txn.delete::<ReleaseLabel>(row.id)?;
    }
    for image in txn.children::<Image>(image_parent(ImageOwner::Release(release_id)))? {
        txn.delete::<Image>(image.id)?;
    }
    delete_ratings(txn, RatingTarget::Release(release_id))?;
    txn.delete::<Release>(release_id)?;
    Ok(files)
}

fn delete_artist_rows(txn: &mut CatalogTxn, artist_id: u64) -> Result<(), LibraryError> {
    let artist_ref = ParentRef::new(EntityKind::Artist, artist_id);
    for row in txn.children::<ArtistGenre>(artist_ref)? {
        txn.delete::<ArtistGenre>(row.id)?;
    }
    for image in txn.children::<Image>(image_parent(ImageOwner::Artist(artist_id)))? {
        txn.delete::<Image>(image.id)?;
    }
    for row in txn.all::<ArtistAssociation>()? {
        if row.artist_id == artist_id || row.associated_artist_id == artist_id {
            txn.delete::<ArtistAssociation>(row.id)?;
        }
    }
    delete_ratings(txn, RatingTarget::Artist(artist_id))?;
    txn.delete::<Artist>(artist_id)?;
    Ok(())
}
