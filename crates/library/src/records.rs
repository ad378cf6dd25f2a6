use common::{
    Artist, ArtistAssociation, ArtistGenre, EntityKind, Genre, Image, ImageOwner, Label, Media,
    RatingTarget, Release, ReleaseGenre, ReleaseLabel, Track, UserRating,
};
use redb::TableDefinition;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::normalize::{alphanumeric_key, normalize_name};
use crate::store::{NameField, NameKey, ParentRef};

type RowTable = TableDefinition<'static, u64, &'static [u8]>;

const ARTISTS_TABLE: RowTable = TableDefinition::new("artists");
const RELEASES_TABLE: RowTable = TableDefinition::new("releases");
const MEDIA_TABLE: RowTable = TableDefinition::new("media");
const TRACKS_TABLE: RowTable = TableDefinition::new("tracks");
const GENRES_TABLE: RowTable = TableDefinition::new("genres");
const LABELS_TABLE: RowTable = TableDefinition::new("labels");
const IMAGES_TABLE: RowTable = TableDefinition::new("images");
const ARTIST_GENRES_TABLE: RowTable = TableDefinition::new("artist_genres");
const RELEASE_GENRES_TABLE: RowTable = TableDefinition::new("release_genres");
const RELEASE_LABELS_TABLE: RowTable = TableDefinition::new("release_labels");
const ARTIST_ASSOCIATIONS_TABLE: RowTable = TableDefinition::new("artist_associations");
const USER_RATINGS_TABLE: RowTable = TableDefinition::new("user_ratings");

pub(crate) const ROW_TABLES: &[RowTable] = &[
    ARTISTS_TABLE,
    RELEASES_TABLE,
    MEDIA_TABLE,
    TRACKS_TABLE,
    GENRES_TABLE,
    LABELS_TABLE,
    IMAGES_TABLE,
    ARTIST_GENRES_TABLE,
    RELEASE_GENRES_TABLE,
    RELEASE_LABELS_TABLE,
    ARTIST_ASSOCIATIONS_TABLE,
    USER_RATINGS_TABLE,
];

/// A row type stored in the catalog.
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const KIND: EntityKind;
    const TABLE: RowTable;

    fn id(&self) -> u64;

    fn set_id(&mut self, id: u64);

    fn parent(&self) -> Option<ParentRef> {
        None
    }

    fn name_keys(&self) -> Vec<NameKey> {
        Vec::new()
    }

    /// (created, last_updated) for rows that carry timestamps.
    fn stamps(&self) -> (u64, u64) {
        (0, 0)
    }

    fn touch(&mut self, _created: u64, _updated: u64) {}
}

fn scoped_names(
    scope: u64,
    primary: &str,
    sort: Option<&str>,
    alternates: &[String],
) -> Vec<NameKey> {
    let mut keys = vec![NameKey {
        field: NameField::Name,
        scope,
        key: normalize_name(primary),
    }];
    if let Some(sort) = sort {
        keys.push(NameKey {
            field: NameField::SortName,
            scope,
            key: normalize_name(sort),
        });
    }
    for alternate in alternates {
        keys.push(NameKey {
            field: NameField::Alternate,
            scope,
            key: normalize_name(alternate),
        });
        keys.push(NameKey {
            field: NameField::AlternateAlnum,
            scope,
            key: alphanumeric_key(alternate),
        });
    }
    keys.retain(|key| !key.key.is_empty());
    keys.sort_by(|a, b| (a.field as u8, &a.key).cmp(&(b.field as u8, &b.key)));
    keys.dedup();
    keys
}

impl Record for Artist {
    const KIND: EntityKind = EntityKind::Artist;
    const TABLE: RowTable = ARTISTS_TABLE;

    fn id(&self) -> u64 {
        self.id
    }

    fn set_id(&mut self, id: u64) {
        self.id = id;
    }

    fn name_keys(&self) -> Vec<NameKey> {
        scoped_names(
            0,
            &self.name,
            self.sort_name.as_deref(),
            self.alternate_names.as_slice(),
        )
    }

    fn stamps(&self) -> (u64, u64) {
        (self.created, self.last_updated)
    }

    fn touch(&mut self, created: u64, updated: u64) {
        self.created = created;
        self.last_updated = updated;
    }
}

impl Record for Release {
    const KIND: EntityKind = EntityKind::Release;
    const TABLE: RowTable = RELEASES_TABLE;

    fn id(&self) -> u64 {
        self.id
    }

    fn set_id(&mut self, id: u64) {
        self.id = id;
    }

    fn parent(&self) -> Option<ParentRef> {
        Some(ParentRef::new(EntityKind::Artist, self.artist_id))
    }

    fn name_keys(&self) -> Vec<NameKey> {
        scoped_names(
            self.artist_id,
            &self.title,
            None,
            self.alternate_names.as_slice(),
        )
    }

    fn stamps(&self) -> (u64, u64) {
        (self.created, self.last_updated)
    }

    fn touch(&mut self, created: u64, updated: u64) {
        self.created = created;
        self.last_updated = updated;
    }
}

impl Record for Media {
    const KIND: EntityKind = EntityKind::Media;
    const TABLE: RowTable = MEDIA_TABLE;

    fn id(&self) -> u64 {
        self.id
    }

    fn set_id(&mut self, id: u64) {
        self.id = id;
    }

    fn parent(&self) -> Option<ParentRef> {
        Some(ParentRef::new(EntityKind::Release, self.release_id))
    }

    fn stamps(&self) -> (u64, u64) {
        (self.created, self.last_updated)
    }

    fn touch(&mut self, created: u64, updated: u64) {
        self.created = created;
        self.last_updated = updated;
    }
}

impl Record for Track {
    const KIND: EntityKind = EntityKind::Track;
    const TABLE: RowTable = TRACKS_TABLE;

    fn id(&self) -> u64 {
        self.id
    }

    fn set_id(&mut self, id: u64) {
        self.id = id;
    }

    fn parent(&self) -> Option<ParentRef> {
        Some(ParentRef::new(EntityKind::Media, self.media_id))
    }

    fn stamps(&self) -> (u64, u64) {
        (self.created, self.last_updated)
    }

    fn touch(&mut self, created: u64, updated: u64) {
        self.created = created;
        self.last_updated = updated;
    }
}

impl Record for Genre {
    const KIND: EntityKind = EntityKind::Genre;
    const TABLE: RowTable = GENRES_TABLE;

    fn id(&self) -> u64 {
        self.id
    }

    fn set_id(&mut self, id: u64) {
        self.id = id;
    }

    fn name_keys(&self) -> Vec<NameKey> {
        scoped_names(0, &self.name, None, &[])
    }

    fn stamps(&self) -> (u64, u64) {
        (self.created, self.created)
    }

    fn touch(&mut self, created: u64, _updated: u64) {
        self.created = created;
    }
}

impl Record for Label {
    const KIND: EntityKind = EntityKind::Label;
    const TABLE: RowTable = LABELS_TABLE;

    fn id(&self) -> u64 {
        self.id
    }

    fn set_id(&mut self, id: u64) {
        self.id = id;
    }

    fn name_keys(&self) -> Vec<NameKey> {
        scoped_names(0, &self.name, None, &[])
    }

    fn stamps(&self) -> (u64, u64) {
        (self.created, self.created)
    }

    fn touch(&mut self, created: u64, _updated: u64) {
        self.created = created;
    }
}

impl Record for Image {
    const KIND: EntityKind = EntityKind::Image;
    const TABLE: RowTable = IMAGES_TABLE;

    fn id(&self) -> u64 {
        self.id
    }

    fn set_id(&mut self, id: u64) {
        self.id = id;
    }

    fn parent(&self) -> Option<ParentRef> {
        Some(image_parent(self.owner))
    }

    fn stamps(&self) -> (u64, u64) {
        (self.created, self.created)
    }

    fn touch(&mut self, created: u64, _updated: u64) {
        self.created = created;
    }
}

impl Record for ArtistGenre {
    const KIND: EntityKind = EntityKind::ArtistGenre;
    const TABLE: RowTable = ARTIST_GENRES_TABLE;

    fn id(&self) -> u64 {
        self.id
    }

    fn set_id(&mut self, id: u64) {
        self.id = id;
    }

    fn parent(&self) -> Option<ParentRef> {
        Some(ParentRef::new(EntityKind::Artist, self.artist_id))
    }
}

impl Record for ReleaseGenre {
    const KIND: EntityKind = EntityKind::ReleaseGenre;
    const TABLE: RowTable = RELEASE_GENRES_TABLE;

    fn id(&self) -> u64 {
        self.id
    }

    fn set_id(&mut self, id: u64) {
        self.id = id;
    }

    fn parent(&self) -> Option<ParentRef> {
        Some(ParentRef::new(EntityKind::Release, self.release_id))
    }
}

impl Record for ReleaseLabel {
    const KIND: EntityKind = EntityKind::ReleaseLabel;
    const TABLE: RowTable = RELEASE_LABELS_TABLE;

    fn id(&self) -> u64 {
        self.id
    }

    fn set_id(&mut self, id: u64) {
        self.id = id;
    }

    fn parent(&self) -> Option<ParentRef> {
        Some(ParentRef::new(EntityKind::Release, self.release_id))
    }
}

impl Record for ArtistAssociation {
    const KIND: EntityKind = EntityKind::ArtistAssociation;
    const TABLE: RowTable = ARTIST_ASSOCIATIONS_TABLE;

    fn id(&self) -> u64 {
        self.id
    }

    fn set_id(&mut self, id: u64) {
        self.id = id;
    }

    fn parent(&self) -> Option<ParentRef> {
        Some(ParentRef::new(EntityKind::Artist, self.artist_id))
    }
}

impl Record for UserRating {
    const KIND: EntityKind = EntityKind::UserRating;
    const TABLE: RowTable = USER_RATINGS_TABLE;

    fn id(&self) -> u64 {
        self.id
    }

    fn set_id(&mut self, id: u64) {
        self.id = id;
    }

    fn parent(&self) -> Option<ParentRef> {
        Some(rating_parent(self.target))
    }
}

pub(crate) fn rating_parent(target: RatingTarget) -> ParentRef {
    match target {
        RatingTarget::Artist(id) => ParentRef::new(EntityKind::Artist, id),
        RatingTarget::Release(id) => ParentRef::new(EntityKind::Release, id),
        RatingTarget::Track(id) => ParentRef::new(EntityKind::Track, id),
    }
}

pub(crate) fn image_parent(owner: ImageOwner) -> ParentRef {
    match owner {
        ImageOwner::Artist(id) => ParentRef::new(EntityKind::Artist, id),
        ImageOwner::Release(id) => ParentRef::new(EntityKind::Release, id),
    }
}
