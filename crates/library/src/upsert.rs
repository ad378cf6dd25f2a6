use std::collections::HashSet;
use std::sync::Arc;

use common::{
    Artist, ArtistAssociation, ArtistGenre, EntityKind, Genre, Image, ImageOwner, Label, Media,
    ProviderIds, Release, ReleaseGenre, ReleaseLabel, Track,
};
use time::Date;
use tracing::warn;

use crate::cache::CatalogCache;
use crate::normalize::{canonical_genres, normalize_name};
use crate::records::image_parent;
use crate::store::{Catalog, CatalogTxn, NameField, ParentRef, SaveOutcome};
use crate::LibraryError;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LabelDraft {
    pub name: String,
    pub catalog_number: Option<String>,
    pub begin_date: Option<Date>,
    pub end_date: Option<Date>,
}

/// An artist with its side collections detached.
#[derive(Clone, Debug)]
pub struct ArtistDraft {
    pub artist: Artist,
    pub genres: Vec<String>,
    pub images: Vec<Image>,
    pub associated_artist_ids: Vec<u64>,
}

impl ArtistDraft {
    pub fn new(artist: Artist) -> Self {
        Self {
            artist,
            genres: Vec::new(),
            images: Vec::new(),
            associated_artist_ids: Vec::new(),
        }
    }
}

/// A release with its side collections detached.
#[derive(Clone, Debug)]
pub struct ReleaseDraft {
    pub release: Release,
    pub genres: Vec<String>,
    pub labels: Vec<LabelDraft>,
    pub images: Vec<Image>,
}

impl ReleaseDraft {
    pub fn new(release: Release) -> Self {
        Self {
            release,
            genres: Vec::new(),
            labels: Vec::new(),
            images: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub id: u64,
    pub created: bool,
    pub row_changed: bool,
    pub side_rows_added: usize,
    pub side_rows_removed: usize,
}

impl UpsertOutcome {
    pub fn changed(&self) -> bool {
        self.row_changed || self.side_rows_added > 0 || self.side_rows_removed > 0
    }

    fn absorb(&mut self, (added, removed): (usize, usize)) {
        self.side_rows_added += added;
        self.side_rows_removed += removed;
    }
}

/// Persists drafts: parent row first, then side rows diffed against what is
/// stored. Each call is one catalog transaction.
#[derive(Clone)]
pub struct Upserter {
    catalog: Catalog,
    cache: Arc<CatalogCache>,
}

impl Upserter {
    pub fn new(catalog: Catalog, cache: Arc<CatalogCache>) -> Self {
        Self { catalog, cache }
    }

    pub fn load_artist(&self, artist_id: u64) -> Result<ArtistDraft, LibraryError> {
        let artist: Artist = self.catalog.require(artist_id)?;
        let owner = ParentRef::new(EntityKind::Artist, artist_id);
        let mut draft = ArtistDraft::new(artist);
        for row in self.catalog.children::<ArtistGenre>(owner)? {
            if let Some(genre) = self.catalog.get::<Genre>(row.genre_id)? {
                draft.genres.push(genre.name);
            }
        }
        draft.images = self.catalog.children(owner)?;
        draft.associated_artist_ids = self
            .catalog
            .children::<ArtistAssociation>(owner)?
            .into_iter()
            .map(|row| row.associated_artist_id)
            .collect();
        Ok(draft)
    }

    pub fn load_release(&self, release_id: u64) -> Result<ReleaseDraft, LibraryError> {
        let release: Release = self.catalog.require(release_id)?;
        let owner = ParentRef::new(EntityKind::Release, release_id);
        let mut draft = ReleaseDraft::new(release);
        for row in self.catalog.children::<ReleaseGenre>(owner)? {
            if let Some(genre) = self.catalog.get::<Genre>(row.genre_id)? {
                draft.genres.push(genre.name);
            }
        }
        for row in self.catalog.children::<ReleaseLabel>(owner)? {
            if let Some(label) = self.catalog.get::<Label>(row.label_id)? {
                draft.labels.push(LabelDraft {
                    name: label.name,
                    catalog_number: row.catalog_number,
                    begin_date: row.begin_date,
                    end_date: row.end_date,
                });
            }
        }
        draft.images = self.catalog.children(owner)?;
        Ok(draft)
    }

    pub fn save_artist(&self, draft: &mut ArtistDraft) -> Result<UpsertOutcome, LibraryError> {
        if draft.artist.name.trim().is_empty() {
            return Err(LibraryError::Validation("artist name is empty".to_string()));
        }
        let was_new = draft.artist.id == 0;
        let result = self.catalog.write(|txn| {
            let created = draft.artist.id == 0;
            let saved = txn.save(&mut draft.artist)?;
            let artist_id = draft.artist.id;
            let mut outcome = UpsertOutcome {
                id: artist_id,
                created,
                row_changed: saved.changed(),
                ..UpsertOutcome::default()
            };
            let genre_ids = resolve_genres(txn, &draft.genres)?;
            outcome.absorb(sync_artist_genres(txn, artist_id, &genre_ids, created)?);
            outcome.absorb(sync_images(
                txn,
                ImageOwner::Artist(artist_id),
                &mut draft.images,
                created,
            )?);
            outcome.absorb(sync_associations(
                txn,
                artist_id,
                &draft.associated_artist_ids,
                created,
            )?);
            Ok(outcome)
        });
        if result.is_err() && was_new {
            draft.artist.id = 0;
        }
        self.finish(result, &draft.artist.cache_region(), &draft.artist.name)
    }

    pub fn save_release(&self, draft: &mut ReleaseDraft) -> Result<UpsertOutcome, LibraryError> {
        if draft.release.title.trim().is_empty() {
            return Err(LibraryError::Validation("release title is empty".to_string()));
        }
        if draft.release.artist_id == 0 {
            return Err(LibraryError::Validation(format!(
                "release '{}' has no artist",
                draft.release.title
            )));
        }
        let was_new = draft.release.id == 0;
        let result = self.catalog.write(|txn| {
            txn.require::<Artist>(draft.release.artist_id)?;
            let created = draft.release.id == 0;
            let saved = txn.save(&mut draft.release)?;
            let release_id = draft.release.id;
            let mut outcome = UpsertOutcome {
                id: release_id,
                created,
                row_changed: saved.changed(),
                ..UpsertOutcome::default()
            };
            let genre_ids = resolve_genres(txn, &draft.genres)?;
            outcome.absorb(sync_release_genres(txn, release_id, &genre_ids, created)?);
            outcome.absorb(sync_labels(txn, release_id, &draft.labels, created)?);
            outcome.absorb(sync_images(
                txn,
                ImageOwner::Release(release_id),
                &mut draft.images,
                created,
            )?);
            Ok(outcome)
        });
        if result.is_err() && was_new {
            draft.release.id = 0;
        }
        self.finish(result, &draft.release.cache_region(), &draft.release.title)
    }

    pub fn save_media(&self, media: &mut Media) -> Result<SaveOutcome, LibraryError> {
        if media.media_number == 0 || media.release_id == 0 {
            return Err(LibraryError::Validation(format!(
                "media {} of release {} is not valid",
                media.media_number, media.release_id
            )));
        }
        self.catalog.save(media)
    }

    pub fn save_track(&self, track: &mut Track) -> Result<SaveOutcome, LibraryError> {
        if track.track_number == 0 || track.media_id == 0 {
            return Err(LibraryError::Validation(format!(
                "track {} of media {} is not valid",
                track.track_number, track.media_id
            )));
        }
        self.catalog.save(track)
    }

    fn finish(
        &self,
        result: Result<UpsertOutcome, LibraryError>,
        region: &str,
        name: &str,
    ) -> Result<UpsertOutcome, LibraryError> {
        match result {
            Ok(outcome) => {
                if outcome.changed() {
                    self.cache.invalidate_region(region);
                }
                Ok(outcome)
            }
            Err(err) => {
                warn!("Failed to save '{}': {}", name, err);
                Err(err)
            }
        }
    }
}

/// Genre ids for `names`, creating genre rows for names not seen before.
fn resolve_genres(txn: &mut CatalogTxn, names: &[String]) -> Result<Vec<u64>, LibraryError> {
    let mut ids = Vec::new();
    for label in canonical_genres(names) {
        let key = normalize_name(&label);
        let id = match txn.find_by_name::<Genre>(0, NameField::Name, &key)? {
            Some(genre) => genre.id,
            None => {
                let mut genre = Genre {
                    id: 0,
                    name: label,
                    created: 0,
                };
                txn.save(&mut genre)?;
                genre.id
            }
        };
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    Ok(ids)
}

fn sync_artist_genres(
    txn: &mut CatalogTxn,
    artist_id: u64,
    genre_ids: &[u64],
    created: bool,
) -> Result<(usize, usize), LibraryError> {
    let existing: Vec<ArtistGenre> = if created {
        Vec::new()
    } else {
        txn.children(ParentRef::new(EntityKind::Artist, artist_id))?
    };
    let mut kept = HashSet::new();
    let mut removed = 0;
    for row in existing {
        if genre_ids.contains(&row.genre_id) && kept.insert(row.genre_id) {
            continue;
        }
        txn.delete::<ArtistGenre>(row.id)?;
        removed += 1;
    }
    let mut added = 0;
    for genre_id in genre_ids.iter().filter(|id| !kept.contains(*id)) {
        let mut row = ArtistGenre {
            id: 0,
            artist_id,
            genre_id: *genre_id,
        };
        txn.save(&mut row)?;
        added += 1;
    }
    Ok((added, removed))
}

fn sync_release_genres(
    txn: &mut CatalogTxn,
    release_id: u64,
    genre_ids: &[u64],
    created: bool,
) -> Result<(usize, usize), LibraryError> {
    let existing: Vec<ReleaseGenre> = if created {
        Vec::new()
    } else {
        txn.children(ParentRef::new(EntityKind::Release, release_id))?
    };
    let mut kept = HashSet::new();
    let mut removed = 0;
    for row in existing {
        if genre_ids.contains(&row.genre_id) && kept.insert(row.genre_id) {
            continue;
        }
        txn.delete::<ReleaseGenre>(row.id)?;
        removed += 1;
    }
    let mut added = 0;
    for genre_id in genre_ids.iter().filter(|id| !kept.contains(*id)) {
        let mut row = ReleaseGenre {
            id: 0,
            release_id,
            genre_id: *genre_id,
        };
        txn.save(&mut row)?;
        added += 1;
    }
    Ok((added, removed))
}

fn sync_labels(
    txn: &mut CatalogTxn,
    release_id: u64,
    labels: &[LabelDraft],
    created: bool,
) -> Result<(usize, usize), LibraryError> {
    let mut desired: Vec<ReleaseLabel> = Vec::new();
    for draft in labels {
        let name = draft.name.trim();
        if name.is_empty() {
            continue;
        }
        let key = normalize_name(name);
        let label_id = match txn.find_by_name::<Label>(0, NameField::Name, &key)? {
            Some(label) => label.id,
            None => {
                let mut label = Label {
                    id: 0,
                    name: name.to_string(),
                    ids: ProviderIds::default(),
                    created: 0,
                };
                txn.save(&mut label)?;
                label.id
            }
        };
        let catalog_number = draft
            .catalog_number
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string);
        if desired
            .iter()
            .any(|row| row.label_id == label_id && row.catalog_number == catalog_number)
        {
            continue;
        }
        desired.push(ReleaseLabel {
            id: 0,
            release_id,
            label_id,
            catalog_number,
            begin_date: draft.begin_date,
            end_date: draft.end_date,
        });
    }

    let existing: Vec<ReleaseLabel> = if created {
        Vec::new()
    } else {
        txn.children(ParentRef::new(EntityKind::Release, release_id))?
    };
    let mut added = 0;
    let mut removed = 0;
    let mut matched = HashSet::new();
    for mut row in existing {
        let wanted = desired.iter().position(|want| {
            want.label_id == row.label_id && want.catalog_number == row.catalog_number
        });
        match wanted {
            Some(index) if matched.insert(index) => {
                row.begin_date = desired[index].begin_date;
                row.end_date = desired[index].end_date;
                txn.save(&mut row)?;
            }
            _ => {
                txn.delete::<ReleaseLabel>(row.id)?;
                removed += 1;
            }
        }
    }
    for (index, mut row) in desired.into_iter().enumerate() {
        if matched.contains(&index) {
            continue;
        }
        txn.save(&mut row)?;
        added += 1;
    }
    Ok((added, removed))
}

/// New images (id 0) are inserted unless the same image is already stored;
/// persisted images are left untouched; stored images missing from the draft
/// are removed.
fn sync_images(
    txn: &mut CatalogTxn,
    owner: ImageOwner,
    images: &mut [Image],
    created: bool,
) -> Result<(usize, usize), LibraryError> {
    let existing: Vec<Image> = if created {
        Vec::new()
    } else {
        txn.children(image_parent(owner))?
    };
    let mut kept = HashSet::new();
    let mut signatures = HashSet::new();
    let mut added = 0;
    for image in images.iter_mut() {
        if image.id != 0 {
            kept.insert(image.id);
            signatures.insert(image.signature());
            continue;
        }
        if image.url.is_none() && image.bytes.is_none() {
            continue;
        }
        image.owner = owner;
        let signature = image.signature();
        if let Some(same) = existing.iter().find(|old| old.signature() == signature) {
            image.id = same.id;
            kept.insert(same.id);
            continue;
        }
        if !signatures.insert(signature) {
            continue;
        }
        txn.save(image)?;
        kept.insert(image.id);
        added += 1;
    }
    let mut removed = 0;
    for old in existing {
        if !kept.contains(&old.id) {
            txn.delete::<Image>(old.id)?;
            removed += 1;
        }
    }
    Ok((added, removed))
}

fn sync_associations(
    txn: &mut CatalogTxn,
    artist_id: u64,
    associated: &[u64],
    created: bool,
) -> Result<(usize, usize), LibraryError> {
    let desired: Vec<u64> = associated
        .iter()
        .copied()
        .filter(|id| *id != 0 && *id != artist_id)
        .collect();
    let existing: Vec<ArtistAssociation> = if created {
        Vec::new()
    } else {
        txn.children(ParentRef::new(EntityKind::Artist, artist_id))?
    };
    let mut kept = HashSet::new();
    let mut removed = 0;
    for row in existing {
        if desired.contains(&row.associated_artist_id) && kept.insert(row.associated_artist_id) {
            continue;
        }
        txn.delete::<ArtistAssociation>(row.id)?;
        removed += 1;
    }
    let mut added = 0;
    for associated_artist_id in desired {
        if !kept.insert(associated_artist_id) {
            continue;
        }
        let mut row = ArtistAssociation {
            id: 0,
            artist_id,
            associated_artist_id,
        };
        txn.save(&mut row)?;
        added += 1;
    }
    Ok((added, removed))
}
