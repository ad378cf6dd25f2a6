use std::fs;
use std::path::Path;
use std::sync::Arc;

use common::EntityKind;
use redb::{
    Database, ReadableTable, ReadableTableMetadata, TableDefinition, TableError, WriteTransaction,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::records::{Record, ROW_TABLES};
use crate::{now_secs, LibraryError};

const SCHEMA_VERSION: u32 = 1;
const KEY_SEP: char = '\x1f';

const META_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("meta");
const PARENT_INDEX_TABLE: TableDefinition<&str, u64> = TableDefinition::new("parent_index");
const NAME_INDEX_TABLE: TableDefinition<&str, u64> = TableDefinition::new("name_index");

const META_VERSION_KEY: &str = "version";

/// Which name column a lookup key was derived from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NameField {
    Name,
    SortName,
    Alternate,
    AlternateAlnum,
}

impl NameField {
    fn as_str(&self) -> &'static str {
        match self {
            NameField::Name => "name",
            NameField::SortName => "sort",
            NameField::Alternate => "alt",
            NameField::AlternateAlnum => "alnum",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NameKey {
    pub field: NameField,
    /// Owning row for scoped names (release titles are unique per artist).
    pub scope: u64,
    pub key: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ParentRef {
    pub kind: EntityKind,
    pub id: u64,
}

impl ParentRef {
    pub fn new(kind: EntityKind, id: u64) -> Self {
        Self { kind, id }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SaveOutcome {
    Created,
    Updated,
    Unchanged,
}

impl SaveOutcome {
    pub fn changed(&self) -> bool {
        !matches!(self, SaveOutcome::Unchanged)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogStats {
    pub artists: u64,
    pub releases: u64,
    pub media: u64,
    pub tracks: u64,
    pub genres: u64,
    pub labels: u64,
    pub images: u64,
}

/// Persistent catalog of artists, releases, media, tracks and their side rows.
#[derive(Clone)]
pub struct Catalog {
    db: Arc<Database>,
}

impl Catalog {
    pub fn open(path: &Path) -> Result<Self, LibraryError> {
        let db = open_or_create_db(path)?;
        info!("Opened catalog at {:?}", path);
        Self::with_db(Arc::new(db))
    }

    pub fn with_db(db: Arc<Database>) -> Result<Self, LibraryError> {
        let catalog = Self { db };
        match read_version(&catalog.db)? {
            Some(version) if version == SCHEMA_VERSION => {}
            Some(version) => {
                return Err(LibraryError::Config(format!(
                    "catalog schema version {} is not supported (expected {})",
                    version, SCHEMA_VERSION
                )));
            }
            None => {
                warn!("Catalog tables missing; initializing");
                catalog.init()?;
            }
        }
        Ok(catalog)
    }

    pub fn db(&self) -> Arc<Database> {
        Arc::clone(&self.db)
    }

    pub fn get<T: Record>(&self, id: u64) -> Result<Option<T>, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(T::TABLE)?;
        load_row(&table, id)
    }

    pub fn require<T: Record>(&self, id: u64) -> Result<T, LibraryError> {
        self.get(id)?.ok_or(LibraryError::NotFound { kind: T::KIND, id })
    }

    /// Rows of kind `T` whose parent is `parent`, in id order.
    pub fn children<T: Record>(&self, parent: ParentRef) -> Result<Vec<T>, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let index = read_txn.open_table(PARENT_INDEX_TABLE)?;
        let table = read_txn.open_table(T::TABLE)?;
        let ids = scan_index(&index, &parent_prefix(T::KIND, parent))?;
        load_rows(&table, &ids)
    }

    /// First row (lowest id) indexed under the exact normalized key.
    pub fn find_by_name<T: Record>(
        &self,
        scope: u64,
        field: NameField,
        key: &str,
    ) -> Result<Option<T>, LibraryError> {
        if key.is_empty() {
            return Ok(None);
        }
        let read_txn = self.db.begin_read()?;
        let index = read_txn.open_table(NAME_INDEX_TABLE)?;
        let table = read_txn.open_table(T::TABLE)?;
        match first_in_index(&index, &name_prefix(T::KIND, scope, field, key))? {
            Some(id) => load_row(&table, id),
            None => Ok(None),
        }
    }

    pub fn all<T: Record>(&self) -> Result<Vec<T>, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(T::TABLE)?;
        load_all(&table)
    }

    pub fn stats(&self) -> Result<CatalogStats, LibraryError> {
        use common::{Artist, Genre, Image, Label, Media, Release, Track};

        let read_txn = self.db.begin_read()?;
        Ok(CatalogStats {
            artists: read_txn.open_table(<Artist as Record>::TABLE)?.len()?,
            releases: read_txn.open_table(<Release as Record>::TABLE)?.len()?,
            media: read_txn.open_table(<Media as Record>::TABLE)?.len()?,
            tracks: read_txn.open_table(<Track as Record>::TABLE)?.len()?,
            genres: read_txn.open_table(<Genre as Record>::TABLE)?.len()?,
            labels: read_txn.open_table(<Label as Record>::TABLE)?.len()?,
            images: read_txn.open_table(<Image as Record>::TABLE)?.len()?,
        })
    }

    pub fn save<T: Record>(&self, row: &mut T) -> Result<SaveOutcome, LibraryError> {
        self.write(|txn| txn.save(row))
    }

    pub fn delete<T: Record>(&self, id: u64) -> Result<bool, LibraryError> {
        self.write(|txn| txn.delete::<T>(id))
    }

    /// Runs `apply` on every row of kind `T` in one transaction and persists
    /// the rows it reports as changed. Returns the number of changed rows.
    pub fn update_where<T: Record>(
        &self,
        mut apply: impl FnMut(&mut T) -> bool,
    ) -> Result<usize, LibraryError> {
        self.write(|txn| {
            let mut changed = 0usize;
            for mut row in txn.all::<T>()? {
                if apply(&mut row) && txn.save(&mut row)?.changed() {
                    changed += 1;
                }
            }
            Ok(changed)
        })
    }

    /// Runs `f` inside one write transaction. Any error aborts every write
    /// made by `f`.
    pub fn write<R>(
        &self,
        f: impl FnOnce(&mut CatalogTxn) -> Result<R, LibraryError>,
    ) -> Result<R, LibraryError> {
        let mut txn = CatalogTxn {
            txn: self.db.begin_write()?,
            now: now_secs(),
        };
        match f(&mut txn) {
            Ok(value) => {
                txn.txn.commit()?;
                Ok(value)
            }
            Err(err) => {
                if let Err(abort_err) = txn.txn.abort() {
                    warn!("Failed to abort catalog transaction: {}", abort_err);
                }
                Err(err)
            }
        }
    }

    fn init(&self) -> Result<(), LibraryError> {
        let write_txn = self.db.begin_write()?;
        {
            let mut meta = write_txn.open_table(META_TABLE)?;
            write_txn.open_table(PARENT_INDEX_TABLE)?;
            write_txn.open_table(NAME_INDEX_TABLE)?;
            for table in ROW_TABLES {
                write_txn.open_table(*table)?;
            }
            let version = encode_value(&SCHEMA_VERSION)?;
            meta.insert(META_VERSION_KEY, version.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }
}

/// Write access to the catalog inside a single transaction.
pub struct CatalogTxn {
    txn: WriteTransaction,
    now: u64,
}

impl CatalogTxn {
    pub fn get<T: Record>(&self, id: u64) -> Result<Option<T>, LibraryError> {
        let table = self.txn.open_table(T::TABLE)?;
        load_row(&table, id)
    }

    pub fn require<T: Record>(&self, id: u64) -> Result<T, LibraryError> {
        self.get(id)?.ok_or(LibraryError::NotFound { kind: T::KIND, id })
    }

    pub fn children<T: Record>(&self, parent: ParentRef) -> Result<Vec<T>, LibraryError> {
        let ids = {
            let index = self.txn.open_table(PARENT_INDEX_TABLE)?;
            scan_index(&index, &parent_prefix(T::KIND, parent))?
        };
        let table = self.txn.open_table(T::TABLE)?;
        load_rows(&table, &ids)
    }

    pub fn find_by_name<T: Record>(
        &self,
        scope: u64,
        field: NameField,
        key: &str,
    ) -> Result<Option<T>, LibraryError> {
        if key.is_empty() {
            return Ok(None);
        }
        let id = {
            let index = self.txn.open_table(NAME_INDEX_TABLE)?;
            first_in_index(&index, &name_prefix(T::KIND, scope, field, key))?
        };
        match id {
            Some(id) => self.get(id),
            None => Ok(None),
        }
    }

    pub fn all<T: Record>(&self) -> Result<Vec<T>, LibraryError> {
        let table = self.txn.open_table(T::TABLE)?;
        load_all(&table)
    }

    /// Inserts `row` when its id is zero, otherwise replaces the stored row.
    /// Rows whose encoding did not change are left alone.
    pub fn save<T: Record>(&mut self, row: &mut T) -> Result<SaveOutcome, LibraryError> {
        let previous: Option<(T, Vec<u8>)> = if row.id() == 0 {
            None
        } else {
            let table = self.txn.open_table(T::TABLE)?;
            let bytes = table.get(row.id())?.map(|value| value.value().to_vec());
            match bytes {
                Some(bytes) => Some((decode_value(&bytes)?, bytes)),
                None => {
                    return Err(LibraryError::NotFound {
                        kind: T::KIND,
                        id: row.id(),
                    })
                }
            }
        };

        let outcome = match &previous {
            None => {
                let id = self.next_id(T::KIND)?;
                row.set_id(id);
                row.touch(self.now, self.now);
                SaveOutcome::Created
            }
            Some((old, old_bytes)) => {
                let (created, updated) = old.stamps();
                row.touch(created, updated);
                if encode_value(row)? == *old_bytes {
                    return Ok(SaveOutcome::Unchanged);
                }
                row.touch(created, self.now);
                SaveOutcome::Updated
            }
        };

        if let Some((old, _)) = &previous {
            self.unindex(old)?;
        }
        {
            let mut table = self.txn.open_table(T::TABLE)?;
            let bytes = encode_value(row)?;
            table.insert(row.id(), bytes.as_slice())?;
        }
        self.index(row)?;
        Ok(outcome)
    }

    pub fn delete<T: Record>(&mut self, id: u64) -> Result<bool, LibraryError> {
        let existing: Option<T> = self.get(id)?;
        let Some(existing) = existing else {
            return Ok(false);
        };
        self.unindex(&existing)?;
        let mut table = self.txn.open_table(T::TABLE)?;
        table.remove(id)?;
        Ok(true)
    }

    fn next_id(&mut self, kind: EntityKind) -> Result<u64, LibraryError> {
        let key = format!("seq:{}", kind.as_str());
        let mut meta = self.txn.open_table(META_TABLE)?;
        let current: u64 = match meta.get(key.as_str())? {
            Some(value) => decode_value(value.value())?,
            None => 0,
        };
        let next = current + 1;
        let bytes = encode_value(&next)?;
        meta.insert(key.as_str(), bytes.as_slice())?;
        Ok(next)
    }

    fn index<T: Record>(&mut self, row: &T) -> Result<(), LibraryError> {
        if let Some(parent) = row.parent() {
            let mut index = self.txn.open_table(PARENT_INDEX_TABLE)?;
            let key = parent_key(T::KIND, parent, row.id());
            index.insert(key.as_str(), row.id())?;
        }
        let names = row.name_keys();
        if !names.is_empty() {
            let mut index = self.txn.open_table(NAME_INDEX_TABLE)?;
            for name in names.iter().filter(|name| !name.key.is_empty()) {
                let key = name_key(T::KIND, name, row.id());
                index.insert(key.as_str(), row.id())?;
            }
        }
        Ok(())
    }

    fn unindex<T: Record>(&mut self, row: &T) -> Result<(), LibraryError> {
        if let Some(parent) = row.parent() {
            let mut index = self.txn.open_table(PARENT_INDEX_TABLE)?;
            let key = parent_key(T::KIND, parent, row.id());
            index.remove(key.as_str())?;
        }
        let names = row.name_keys();
        if !names.is_empty() {
            let mut index = self.txn.open_table(NAME_INDEX_TABLE)?;
            for name in &names {
                let key = name_key(T::KIND, name, row.id());
                index.remove(key.as_str())?;
            }
        }
        Ok(())
    }
}

fn open_or_create_db(path: &Path) -> Result<Database, LibraryError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    if path.exists() {
        Ok(Database::open(path)?)
    } else {
        Ok(Database::create(path)?)
    }
}

fn read_version(db: &Database) -> Result<Option<u32>, LibraryError> {
    let read_txn = db.begin_read()?;
    let table = match read_txn.open_table(META_TABLE) {
        Ok(table) => table,
        Err(TableError::TableDoesNotExist(_)) => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let version = match table.get(META_VERSION_KEY)? {
        Some(value) => Some(decode_value(value.value())?),
        None => None,
    };
    Ok(version)
}

fn load_row<T: Record>(
    table: &impl ReadableTable<u64, &'static [u8]>,
    id: u64,
) -> Result<Option<T>, LibraryError> {
    match table.get(id)? {
        Some(value) => Ok(Some(decode_value(value.value())?)),
        None => Ok(None),
    }
}

fn load_rows<T: Record>(
    table: &impl ReadableTable<u64, &'static [u8]>,
    ids: &[u64],
) -> Result<Vec<T>, LibraryError> {
    let mut rows = Vec::with_capacity(ids.len());
    for id in ids {
        match load_row(table, *id)? {
            Some(row) => rows.push(row),
            None => warn!("Index points at missing {} {}", T::KIND, id),
        }
    }
    Ok(rows)
}

fn load_all<T: Record>(
    table: &impl ReadableTable<u64, &'static [u8]>,
) -> Result<Vec<T>, LibraryError> {
    let mut rows = Vec::new();
    for entry in table.iter()? {
        let (_, value) = entry?;
        rows.push(decode_value(value.value())?);
    }
    Ok(rows)
}

fn scan_index(
    index: &impl ReadableTable<&'static str, u64>,
    prefix: &str,
) -> Result<Vec<u64>, LibraryError> {
    let end = prefix_end(prefix);
    let mut ids = Vec::new();
    for entry in index.range(prefix..end.as_str())? {
        let (_, value) = entry?;
        ids.push(value.value());
    }
    Ok(ids)
}

fn first_in_index(
    index: &impl ReadableTable<&'static str, u64>,
    prefix: &str,
) -> Result<Option<u64>, LibraryError> {
    let end = prefix_end(prefix);
    let mut range = index.range(prefix..end.as_str())?;
    match range.next() {
        Some(entry) => {
            let (_, value) = entry?;
            Ok(Some(value.value()))
        }
        None => Ok(None),
    }
}

fn parent_prefix(kind: EntityKind, parent: ParentRef) -> String {
    let mut out = String::new();
    out.push_str(kind.as_str());
    out.push(KEY_SEP);
    out.push_str(parent.kind.as_str());
    out.push(KEY_SEP);
    out.push_str(&format!("{:020}", parent.id));
    out.push(KEY_SEP);
    out
}

fn parent_key(kind: EntityKind, parent: ParentRef, id: u64) -> String {
    let mut out = parent_prefix(kind, parent);
    out.push_str(&format!("{:020}", id));
    out
}

fn name_prefix(kind: EntityKind, scope: u64, field: NameField, key: &str) -> String {
    let mut out = String::new();
    out.push_str(kind.as_str());
    out.push(KEY_SEP);
    out.push_str(&format!("{:020}", scope));
    out.push(KEY_SEP);
    out.push_str(field.as_str());
    out.push(KEY_SEP);
    out.push_str(key);
    out.push(KEY_SEP);
    out
}

fn name_key(kind: EntityKind, name: &NameKey, id: u64) -> String {
    let mut out = name_prefix(kind, name.scope, name.field, &name.key);
    out.push_str(&format!("{:020}", id));
    out
}

fn prefix_end(prefix: &str) -> String {
    let mut out = prefix.to_string();
    out.push('\u{10ffff}');
    out
}

pub(crate) fn encode_value<T: Serialize>(value: &T) -> Result<Vec<u8>, LibraryError> {
    Ok(bincode::serialize(value)?)
}

pub(crate) fn decode_value<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, LibraryError> {
    Ok(bincode::deserialize(bytes)?)
}
