use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use common::EntityKind;
use metadata::MetadataError;
use redb::{CommitError, DatabaseError, StorageError, TableError, TransactionError};

mod cache;
mod change;
mod editor;
mod folders;
mod matcher;
mod normalize;
mod records;
mod store;
mod upsert;

pub use cache::{name_cache_key, CatalogCache};
pub use change::{ChangeScanner, ReleaseScanReport, TrackScanState};
pub use editor::{
    merge_artist_fields, merge_release_fields, DeleteReport, Editor, MediaMergeMode, MergeOptions,
    MergeReport, RenameReport,
};
pub use folders::{
    artist_folder_name, audio_files_in_dir, collect_release_dirs, disc_number_from_path,
    find_folder_cover, is_audio_file, move_file, release_folder_name, release_relpath,
    remove_empty_dirs, split_title_year, track_file_name, track_number_from_file_name,
};
pub use matcher::Matcher;
pub use normalize::{alphanumeric_key, canonical_genre_label, canonical_genres, normalize_name};
pub use records::Record;
pub use store::{Catalog, CatalogStats, CatalogTxn, NameField, NameKey, ParentRef, SaveOutcome};
pub use upsert::{ArtistDraft, LabelDraft, ReleaseDraft, UpsertOutcome, Upserter};

#[derive(Debug)]
pub enum LibraryError {
    Io(std::io::Error),
    Metadata(MetadataError),
    Redb(redb::Error),
    Bincode(Box<bincode::ErrorKind>),
    NotFound { kind: EntityKind, id: u64 },
    Validation(String),
    Config(String),
}

impl fmt::Display for LibraryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LibraryError::Io(err) => write!(f, "io error: {}", err),
            LibraryError::Metadata(err) => write!(f, "metadata error: {}", err),
            LibraryError::Redb(err) => write!(f, "db error: {}", err),
            LibraryError::Bincode(err) => write!(f, "bincode error: {}", err),
            LibraryError::NotFound { kind, id } => write!(f, "{} {} not found", kind, id),
            LibraryError::Validation(value) => write!(f, "validation failed: {}", value),
            LibraryError::Config(value) => write!(f, "configuration error: {}", value),
        }
    }
}

impl std::error::Error for LibraryError {}

impl LibraryError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, LibraryError::NotFound { .. })
    }
}

impl From<std::io::Error> for LibraryError {
    fn from(err: std::io::Error) -> Self {
        LibraryError::Io(err)
    }
}

impl From<MetadataError> for LibraryError {
    fn from(err: MetadataError) -> Self {
        LibraryError::Metadata(err)
    }
}

impl From<redb::Error> for LibraryError {
    fn from(err: redb::Error) -> Self {
        LibraryError::Redb(err)
    }
}

impl From<DatabaseError> for LibraryError {
    fn from(err: DatabaseError) -> Self {
        LibraryError::Redb(err.into())
    }
}

impl From<TableError> for LibraryError {
    fn from(err: TableError) -> Self {
        LibraryError::Redb(err.into())
    }
}

impl From<TransactionError> for LibraryError {
    fn from(err: TransactionError) -> Self {
        LibraryError::Redb(err.into())
    }
}

impl From<StorageError> for LibraryError {
    fn from(err: StorageError) -> Self {
        LibraryError::Redb(err.into())
    }
}

impl From<CommitError> for LibraryError {
    fn from(err: CommitError) -> Self {
        LibraryError::Redb(err.into())
    }
}

impl From<Box<bincode::ErrorKind>> for LibraryError {
    fn from(err: Box<bincode::ErrorKind>) -> Self {
        LibraryError::Bincode(err)
    }
}

pub(crate) fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_secs()
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::path::Path;
    use std::sync::Arc;

    use tempfile::TempDir;

    use crate::{Catalog, CatalogCache};

    pub struct Fixture {
        pub dir: TempDir,
        pub catalog: Catalog,
        pub cache: Arc<CatalogCache>,
    }

    impl Fixture {
        pub fn root(&self) -> &Path {
            self.dir.path()
        }
    }

    pub fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join(".catalog").join("catalog.redb");
        let catalog = Catalog::open(&db_path).unwrap();
        Fixture {
            dir,
            catalog,
            cache: Arc::new(CatalogCache::new()),
        }
    }
}
