use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{Connection, OpenFlags, OptionalExtension, TransactionBehavior};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use iocat_core::{ChangeEntry, ContentHash, Hlc, VectorClock, WriterId};

use crate::error::StorageError;
use crate::schema::{self, FORMAT_VERSION, META_FORMAT_VERSION, META_VECTOR_CLOCK};
use crate::traits::{CachedClassification, CatalogSnapshot, LogStore, WriterRecord};

/// Convert Vec<u8> to fixed-size array with proper error handling.
fn to_array<const N: usize>(v: Vec<u8>, label: &str) -> Result<[u8; N], StorageError> {
    v.try_into()
        .map_err(|_| StorageError::Serialization(format!("invalid {label} length")))
}

fn ser_err(e: impl std::fmt::Display) -> StorageError {
    StorageError::Serialization(e.to_string())
}

/// Tunnel a StorageError through a query_map closure that must return rusqlite::Error.
fn tunnel(e: StorageError) -> rusqlite::Error {
    match e {
        StorageError::Sqlite(sq) => sq,
        other => rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Blob,
            Box::new(OpaqueStorageError(other.to_string())),
        ),
    }
}

/// A `.iocat` catalog file.
pub struct SqliteStorage {
    conn: Connection,
    path: PathBuf,
    read_only: bool,
    clock: VectorClock,
}

/// A fully written replacement catalog waiting beside the original.
///
/// Dropping it deletes the temporary file.
pub struct StagedCatalog {
    file: NamedTempFile,
}

impl StagedCatalog {
    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

impl SqliteStorage {
    /// Create a new, empty catalog. Fails if `path` already exists.
    pub fn create(path: &Path) -> Result<Self, StorageError> {
        if path.exists() {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("{} already exists", path.display()),
            )));
        }
        let mut conn = Connection::open(path)?;
        schema::init_schema(&conn)?;
        let version = rmp_serde::to_vec(&FORMAT_VERSION).map_err(ser_err)?;
        let clock = VectorClock::new().to_msgpack()?;
        let tx = conn.transaction()?;
        for (key, value) in [(META_FORMAT_VERSION, version), (META_VECTOR_CLOCK, clock)] {
            tx.execute(
                "INSERT INTO meta (key, value) VALUES (?1, ?2)",
                rusqlite::params![key, value],
            )?;
        }
        tx.commit()?;
        info!(path = %path.display(), "created catalog");
        Self::from_connection(conn, path, false)
    }

    /// Open an existing catalog for reading and writing.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let conn = Self::connect(path, false)?;
        let storage = Self::from_connection(conn, path, false)?;
        info!(
            path = %path.display(),
            entries = storage.entry_count()?,
            "opened catalog"
        );
        Ok(storage)
    }

    /// Open another copy of a catalog without taking write access to it.
    pub fn open_read_only(path: &Path) -> Result<Self, StorageError> {
        let conn = Self::connect(path, true)?;
        Self::from_connection(conn, path, true)
    }

    fn connect(path: &Path, read_only: bool) -> Result<Connection, StorageError> {
        if !path.is_file() {
            return Err(StorageError::NotFound(path.display().to_string()));
        }
        let mode = if read_only {
            OpenFlags::SQLITE_OPEN_READ_ONLY
        } else {
            OpenFlags::SQLITE_OPEN_READ_WRITE
        };
        let conn = Connection::open_with_flags(
            path,
            mode | OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(Duration::from_secs(5))?;
        if !schema::is_catalog(&conn)? {
            return Err(StorageError::NotACatalog(path.display().to_string()));
        }
        if !read_only {
            schema::init_schema(&conn)?;
        }
        Ok(conn)
    }

    fn from_connection(conn: Connection, path: &Path, read_only: bool) -> Result<Self, StorageError> {
        let mut storage = Self {
            conn,
            path: path.to_path_buf(),
            read_only,
            clock: VectorClock::new(),
        };
        if let Some(version) = storage.format_version()?
            && version > FORMAT_VERSION
        {
            warn!(
                path = %path.display(),
                file_version = version,
                supported = FORMAT_VERSION,
                "catalog written by a newer version; unknown data will be preserved"
            );
        }
        storage.clock = storage.read_clock()?;
        Ok(storage)
    }

    fn read_clock(&self) -> Result<VectorClock, StorageError> {
        match self.get_meta(META_VECTOR_CLOCK)? {
            Some(bytes) => Ok(VectorClock::from_msgpack(&bytes)?),
            None => Ok(VectorClock::from_log(&self.load_entries()?)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn format_version(&self) -> Result<Option<u32>, StorageError> {
        self.get_meta(META_FORMAT_VERSION)?
            .map(|bytes| rmp_serde::from_slice(&bytes).map_err(ser_err))
            .transpose()
    }

    /// Write `snapshot` into a temporary file in this catalog's directory.
    ///
    /// Entries are written with the `seq` they carry. The vector clock is
    /// recomputed from them and the format version never moves backwards.
    pub fn stage(&self, snapshot: &CatalogSnapshot) -> Result<StagedCatalog, StorageError> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        let file = tempfile::Builder::new()
            .prefix(".iocat-staged-")
            .suffix(".tmp")
            .tempfile_in(dir)?;

        let mut meta = snapshot.meta.clone();
        let staged_version = match meta.get(META_FORMAT_VERSION) {
            Some(bytes) => rmp_serde::from_slice::<u32>(bytes)
                .map_err(ser_err)?
                .max(FORMAT_VERSION),
            None => FORMAT_VERSION,
        };
        meta.insert(
            META_FORMAT_VERSION.to_string(),
            rmp_serde::to_vec(&staged_version).map_err(ser_err)?,
        );
        meta.insert(
            META_VECTOR_CLOCK.to_string(),
            VectorClock::from_log(&snapshot.entries).to_msgpack()?,
        );

        let mut conn = Connection::open(file.path())?;
        schema::init_schema(&conn)?;
        {
            let tx = conn.transaction()?;
            for (key, value) in &meta {
                tx.execute(
                    "INSERT INTO meta (key, value) VALUES (?1, ?2)",
                    rusqlite::params![key, value],
                )?;
            }
            for writer in &snapshot.writers {
                tx.execute(
                    "INSERT OR IGNORE INTO writers (writer_id, display_name, first_seen_hlc) VALUES (?1, ?2, ?3)",
                    rusqlite::params![
                        writer.writer.as_bytes().as_slice(),
                        writer.display_name,
                        &writer.first_seen.to_bytes()[..],
                    ],
                )?;
            }
            for entry in &snapshot.entries {
                insert_entry(&tx, entry)?;
            }
            for record in &snapshot.classifications {
                insert_classification(&tx, record)?;
            }
            tx.commit()?;
        }
        conn.close().map_err(|(_, e)| StorageError::Sqlite(e))?;

        debug!(
            staged = %file.path().display(),
            entries = snapshot.entries.len(),
            "staged catalog rewrite"
        );
        Ok(StagedCatalog { file })
    }

    /// Atomically replace this catalog file with `staged`.
    ///
    /// The connection is closed for the rename and reopened afterwards. If the
    /// rename fails the original file is reopened unchanged. If the rename
    /// succeeds but the new file cannot be reopened, `StorageError::Reopen` is
    /// returned and this handle refuses further writes.
    pub fn replace_with(&mut self, staged: StagedCatalog) -> Result<(), StorageError> {
        if self.read_only {
            return Err(StorageError::Persist(format!(
                "{} is open read-only",
                self.path.display()
            )));
        }
        let placeholder = Connection::open_in_memory()?;
        let conn = std::mem::replace(&mut self.conn, placeholder);
        if let Err((conn, e)) = conn.close() {
            self.conn = conn;
            return Err(StorageError::Sqlite(e));
        }

        let persisted = staged.file.persist(&self.path);
        match (persisted, Self::connect(&self.path, false)) {
            (Ok(_), Ok(conn)) => self.conn = conn,
            (Err(e), Ok(conn)) => {
                self.conn = conn;
                return Err(e.into());
            }
            (Ok(_), Err(e)) => {
                self.read_only = true;
                warn!(path = %self.path.display(), error = %e, "catalog replaced but not reopened");
                return Err(StorageError::Reopen(e.to_string()));
            }
            (Err(e), Err(reopen)) => {
                self.read_only = true;
                warn!(path = %self.path.display(), error = %reopen, "catalog not reopened");
                return Err(e.into());
            }
        }

        self.clock = self
            .read_clock()
            .map_err(|e| StorageError::Reopen(e.to_string()))?;
        info!(path = %self.path.display(), "replaced catalog file");
        Ok(())
    }
}

fn insert_entry(conn: &Connection, entry: &ChangeEntry) -> Result<(), StorageError> {
    let body = entry.to_body()?;
    conn.execute(
        "INSERT INTO entries (seq, entry_id, image_key, field, hlc, writer_id, body) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        rusqlite::params![
            entry.seq as i64,
            entry.entry_id.as_bytes().as_slice(),
            entry.image.as_str(),
            entry.field.as_str(),
            &entry.hlc.to_bytes()[..],
            entry.writer.as_bytes().as_slice(),
            body,
        ],
    )?;
    Ok(())
}

fn insert_classification(
    conn: &Connection,
    record: &CachedClassification,
) -> Result<(), StorageError> {
    let suggestions = rmp_serde::to_vec(&record.suggestions).map_err(ser_err)?;
    conn.execute(
        "INSERT INTO classifications (content_hash, suggestions, classifier, recorded_at) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(content_hash) DO UPDATE SET suggestions = excluded.suggestions, classifier = excluded.classifier, recorded_at = excluded.recorded_at",
        rusqlite::params![
            record.content_hash.as_bytes().as_slice(),
            suggestions,
            record.classifier,
            record.recorded_at,
        ],
    )?;
    Ok(())
}

fn read_entry(row: &rusqlite::Row) -> Result<ChangeEntry, StorageError> {
    let seq: i64 = row.get(0)?;
    let body: Vec<u8> = row.get(1)?;
    Ok(ChangeEntry::from_body(seq as u64, &body)?)
}

fn read_classification(row: &rusqlite::Row) -> Result<CachedClassification, StorageError> {
    let hash_bytes: Vec<u8> = row.get(0)?;
    let suggestion_bytes: Vec<u8> = row.get(1)?;
    Ok(CachedClassification {
        content_hash: ContentHash::from_bytes(to_array::<32>(hash_bytes, "content_hash")?),
        suggestions: rmp_serde::from_slice(&suggestion_bytes).map_err(ser_err)?,
        classifier: row.get(2)?,
        recorded_at: row.get(3)?,
    })
}

impl LogStore for SqliteStorage {
    fn append_entry(&mut self, entry: &ChangeEntry) -> Result<(), StorageError> {
        let mut clock = self.clock.clone();
        clock.observe(entry.writer, entry.hlc);
        let clock_bytes = clock.to_msgpack()?;

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        insert_entry(&tx, entry)?;
        tx.execute(
            "INSERT OR IGNORE INTO writers (writer_id, display_name, first_seen_hlc) VALUES (?1, NULL, ?2)",
            rusqlite::params![entry.writer.as_bytes().as_slice(), &entry.hlc.to_bytes()[..]],
        )?;
        tx.execute(
            "INSERT INTO meta (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            rusqlite::params![META_VECTOR_CLOCK, clock_bytes],
        )?;
        tx.commit()?;

        self.clock = clock;
        debug!(
            seq = entry.seq,
            entry_id = %entry.entry_id,
            image = %entry.image,
            field = %entry.field,
            "appended entry"
        );
        Ok(())
    }

    fn load_entries(&self) -> Result<Vec<ChangeEntry>, StorageError> {
        let mut stmt = self
            .conn
            .prepare("SELECT seq, body FROM entries ORDER BY seq")?;
        let entries = stmt
            .query_map([], |row| read_entry(row).map_err(tunnel))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    fn entry_count(&self) -> Result<u64, StorageError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM entries", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn vector_clock(&self) -> &VectorClock {
        &self.clock
    }

    fn register_writer(
        &mut self,
        writer: WriterId,
        display_name: &str,
        first_seen: Hlc,
    ) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT INTO writers (writer_id, display_name, first_seen_hlc) VALUES (?1, ?2, ?3)
             ON CONFLICT(writer_id) DO UPDATE SET display_name = excluded.display_name",
            rusqlite::params![
                writer.as_bytes().as_slice(),
                display_name,
                &first_seen.to_bytes()[..],
            ],
        )?;
        Ok(())
    }

    fn writers(&self) -> Result<Vec<WriterRecord>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT writer_id, display_name, first_seen_hlc FROM writers ORDER BY first_seen_hlc, writer_id",
        )?;
        let rows = stmt.query_map([], |row| {
            let writer_bytes: Vec<u8> = row.get(0)?;
            let display_name: Option<String> = row.get(1)?;
            let hlc_bytes: Vec<u8> = row.get(2)?;
            Ok((writer_bytes, display_name, hlc_bytes))
        })?;

        let mut result = Vec::new();
        for row in rows {
            let (writer_bytes, display_name, hlc_bytes) = row?;
            result.push(WriterRecord {
                writer: WriterId::from_bytes(to_array::<32>(writer_bytes, "writer_id")?),
                display_name,
                first_seen: Hlc::from_bytes(&to_array::<12>(hlc_bytes, "first_seen_hlc")?),
            });
        }
        Ok(result)
    }

    fn get_meta(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self
            .conn
            .query_row(
                "SELECT value FROM meta WHERE key = ?1",
                rusqlite::params![key],
                |row| row.get(0),
            )
            .optional()?)
    }

    fn set_meta(&mut self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT INTO meta (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            rusqlite::params![key, value],
        )?;
        Ok(())
    }

    fn all_meta(&self) -> Result<BTreeMap<String, Vec<u8>>, StorageError> {
        let mut stmt = self.conn.prepare("SELECT key, value FROM meta")?;
        let meta = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<BTreeMap<_, _>, _>>()?;
        Ok(meta)
    }

    fn cached_classification(
        &self,
        content_hash: &ContentHash,
    ) -> Result<Option<CachedClassification>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT content_hash, suggestions, classifier, recorded_at FROM classifications WHERE content_hash = ?1",
        )?;
        let record = stmt
            .query_row(rusqlite::params![content_hash.as_bytes().as_slice()], |row| {
                read_classification(row).map_err(tunnel)
            })
            .optional()?;
        Ok(record)
    }

    fn cache_classification(&mut self, record: &CachedClassification) -> Result<(), StorageError> {
        insert_classification(&self.conn, record)
    }

    fn classifications(&self) -> Result<Vec<CachedClassification>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT content_hash, suggestions, classifier, recorded_at FROM classifications ORDER BY content_hash",
        )?;
        let records = stmt
            .query_map([], |row| read_classification(row).map_err(tunnel))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }
}

/// Wrapper error type used to tunnel StorageError through rusqlite's error system
/// in query_map closures that must return rusqlite::Error.
#[derive(Debug)]
struct OpaqueStorageError(String);

impl std::fmt::Display for OpaqueStorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for OpaqueStorageError {}

#[cfg(test)]
mod tests {
    use super::*;
    use iocat_core::{FieldValue, ImageKey, Origin, WriterIdentity};

    fn entry(identity: &WriterIdentity, seq: u64, wall_ms: u64, tag: &str) -> ChangeEntry {
        let mut entry = ChangeEntry::new_signed(
            identity,
            Hlc::new(wall_ms, 0),
            ImageKey::new("img1.jpg").unwrap(),
            FieldValue::Tags(Default::default()),
            FieldValue::Tags([tag.to_string()].into()),
            Origin::Edit,
        )
        .unwrap();
        entry.seq = seq;
        entry
    }

    #[test]
    fn create_append_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lib.iocat");
        let ana = WriterIdentity::generate("ana");

        {
            let mut storage = SqliteStorage::create(&path).unwrap();
            storage.append_entry(&entry(&ana, 1, 10, "beach")).unwrap();
            storage.append_entry(&entry(&ana, 2, 20, "sunset")).unwrap();
            assert_eq!(storage.vector_clock().get(&ana.writer_id()), Some(Hlc::new(20, 0)));
        }

        let storage = SqliteStorage::open(&path).unwrap();
        let entries = storage.load_entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].seq, 1);
        assert_eq!(entries[1].seq, 2);
        assert!(entries.iter().all(|e| e.verify_signature().is_ok()));
        assert_eq!(storage.format_version().unwrap(), Some(FORMAT_VERSION));
        assert_eq!(storage.vector_clock().get(&ana.writer_id()), Some(Hlc::new(20, 0)));
        assert_eq!(storage.writers().unwrap().len(), 1);
    }

    #[test]
    fn create_refuses_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lib.iocat");
        SqliteStorage::create(&path).unwrap();
        assert!(matches!(SqliteStorage::create(&path), Err(StorageError::Io(_))));
    }

    #[test]
    fn open_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let result = SqliteStorage::open(&dir.path().join("absent.iocat"));
        assert!(matches!(result, Err(StorageError::NotFound(_))));
    }

    #[test]
    fn open_garbage_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk.iocat");
        std::fs::write(&path, b"this is not a database, just some bytes padding it out").unwrap();
        assert!(SqliteStorage::open_read_only(&path).is_err());
    }

    #[test]
    fn duplicate_seq_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let mut storage = SqliteStorage::create(&dir.path().join("lib.iocat")).unwrap();
        let ana = WriterIdentity::generate("ana");
        storage.append_entry(&entry(&ana, 1, 10, "beach")).unwrap();
        let clock_before = storage.vector_clock().clone();

        assert!(storage.append_entry(&entry(&ana, 1, 30, "dup")).is_err());
        assert_eq!(storage.entry_count().unwrap(), 1);
        assert_eq!(storage.vector_clock(), &clock_before);
    }

    #[test]
    fn stage_and_replace_preserves_meta() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lib.iocat");
        let ana = WriterIdentity::generate("ana");
        let mut storage = SqliteStorage::create(&path).unwrap();
        storage.set_meta("library_root", b"/photos").unwrap();
        storage.append_entry(&entry(&ana, 1, 10, "beach")).unwrap();

        let mut snapshot = storage.snapshot().unwrap();
        snapshot.entries.push(entry(&ana, 2, 20, "sunset"));
        let staged = storage.stage(&snapshot).unwrap();
        let staged_path = staged.path().to_path_buf();
        assert_eq!(staged_path.parent(), path.parent());

        storage.replace_with(staged).unwrap();
        assert!(!staged_path.exists());
        assert_eq!(storage.entry_count().unwrap(), 2);
        assert_eq!(storage.get_meta("library_root").unwrap(), Some(b"/photos".to_vec()));
        assert_eq!(storage.vector_clock().get(&ana.writer_id()), Some(Hlc::new(20, 0)));
    }

    #[test]
    fn unreadable_replacement_leaves_handle_read_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lib.iocat");
        let ana = WriterIdentity::generate("ana");
        let mut storage = SqliteStorage::create(&path).unwrap();
        storage.append_entry(&entry(&ana, 1, 10, "beach")).unwrap();

        let staged = storage.stage(&storage.snapshot().unwrap()).unwrap();
        std::fs::write(staged.path(), b"not a catalog".repeat(64)).unwrap();
        let err = storage.replace_with(staged).unwrap_err();
        assert!(matches!(err, StorageError::Reopen(_)), "{err}");
        assert!(storage.is_read_only());
        assert!(storage.append_entry(&entry(&ana, 2, 20, "sunset")).is_err());

        let again = storage.stage(&CatalogSnapshot::default()).unwrap();
        assert!(matches!(storage.replace_with(again), Err(StorageError::Persist(_))));
    }

    #[test]
    fn dropped_stage_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lib.iocat");
        let storage = SqliteStorage::create(&path).unwrap();
        let staged = storage.stage(&storage.snapshot().unwrap()).unwrap();
        let staged_path = staged.path().to_path_buf();
        drop(staged);
        assert!(!staged_path.exists());
        assert!(path.exists());
    }

    #[test]
    fn classification_cache_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut storage = SqliteStorage::create(&dir.path().join("lib.iocat")).unwrap();
        let hash = ContentHash::from_bytes([3; 32]);
        assert!(storage.cached_classification(&hash).unwrap().is_none());

        let record = CachedClassification {
            content_hash: hash,
            classifier: "scenes".into(),
            suggestions: vec![("beach".into(), 0.75), ("sky".into(), 0.25)],
            recorded_at: 1_700_000_000_000,
        };
        storage.cache_classification(&record).unwrap();
        assert_eq!(storage.cached_classification(&hash).unwrap(), Some(record));
    }
}
