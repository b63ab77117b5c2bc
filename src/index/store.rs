//! Persistent first-occurrence index backed by SQLite.
//!
//! Each stream identity gets its own table (`pi_10_txt`, ...) mapping a
//! substring to the 1-based position where it first occurs. Rows are only
//! ever inserted with `INSERT OR IGNORE`, so the first recorded offset for
//! a substring is permanent.
//!
//! All writes go through one connection behind a mutex. Lookups use a
//! small pool of read-only connections and never wait on a writer; WAL
//! mode lets them see committed data while a write transaction is open.

use crate::error::{Error, Result};
use crate::stream::types::{KeyEncoding, Position, StorageFormat, StreamIdentity};
use log::debug;
use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, ToSql};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

/// Summary of one namespace, for stats output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceInfo {
    pub identity: StreamIdentity,
    pub key_encoding: KeyEncoding,
    pub records: u64,
}

/// A pattern key bound with the namespace's column type
enum Key<'a> {
    Text(&'a str),
    Blob(&'a [u8]),
}

impl<'a> Key<'a> {
    fn new(encoding: KeyEncoding, pattern: &'a [u8]) -> Result<Self> {
        match encoding {
            KeyEncoding::Blob => Ok(Key::Blob(pattern)),
            KeyEncoding::Text => std::str::from_utf8(pattern)
                .map(Key::Text)
                .map_err(|_| Error::InvalidPattern("text namespace needs UTF-8 patterns".into())),
        }
    }
}

impl ToSql for Key<'_> {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Key::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Key::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
        })
    }
}

/// Durable `(stream, substring) -> first offset` cache
pub struct PatternIndex {
    path: PathBuf,
    writer: Mutex<Connection>,
    readers: Mutex<Vec<Connection>>,
}

impl PatternIndex {
    /// Open or create the index at `path`
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;

            CREATE TABLE IF NOT EXISTS namespaces (
                namespace TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                base INTEGER NOT NULL,
                format TEXT NOT NULL,
                key_encoding TEXT NOT NULL
            );
            ",
        )?;

        debug!("opened pattern index at {}", path.display());

        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(conn),
            readers: Mutex::new(Vec::new()),
        })
    }

    /// Delete an index and its WAL side files
    pub fn remove(path: &Path) -> Result<()> {
        for suffix in ["", "-wal", "-shm"] {
            let mut file = path.as_os_str().to_owned();
            file.push(suffix);
            match fs::remove_file(PathBuf::from(file)) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a namespace exists for this stream
    pub fn exists(&self, identity: &StreamIdentity) -> Result<bool> {
        self.with_reader(|conn| Ok(namespace_encoding(conn, identity)?.is_some()))
    }

    /// Create the namespace if it is missing. An existing namespace keeps
    /// its original key encoding.
    pub fn create_namespace(&self, identity: &StreamIdentity, encoding: KeyEncoding) -> Result<()> {
        let mut conn = self.writer();
        let tx = conn.transaction()?;
        ensure_namespace(&tx, identity, encoding)?;
        tx.commit()?;
        Ok(())
    }

    /// First recorded offset of `pattern`. `None` means "not recorded yet",
    /// not "absent from the stream".
    pub fn lookup(&self, identity: &StreamIdentity, pattern: &[u8]) -> Result<Option<Position>> {
        self.with_reader(|conn| {
            let Some(encoding) = namespace_encoding(conn, identity)? else {
                return Ok(None);
            };
            let Ok(key) = Key::new(encoding, pattern) else {
                return Ok(None);
            };

            let sql = format!(
                "SELECT first_offset FROM {} WHERE substring = ?1",
                quote(&identity.namespace())
            );
            let offset: Option<i64> = conn
                .prepare_cached(&sql)?
                .query_row(params![key], |row| row.get(0))
                .optional()?;
            Ok(offset.map(|o| o as Position))
        })
    }

    /// Record `pattern` at `offset` unless it is already recorded.
    ///
    /// Returns true if a row was written. Creates the namespace on demand.
    pub fn insert_if_absent(
        &self,
        identity: &StreamIdentity,
        pattern: &[u8],
        offset: Position,
    ) -> Result<bool> {
        let inserted = self.bulk_insert(identity, std::iter::once((pattern, offset)))?;
        Ok(inserted == 1)
    }

    /// Insert many pairs in a single transaction, skipping ones already
    /// present. Returns the number of new rows.
    pub fn bulk_insert<'p, I>(&self, identity: &StreamIdentity, pairs: I) -> Result<usize>
    where
        I: IntoIterator<Item = (&'p [u8], Position)>,
    {
        let mut conn = self.writer();
        let tx = conn.transaction()?;
        let encoding = ensure_namespace(&tx, identity, identity.format.key_encoding())?;

        let mut inserted = 0;
        {
            let sql = format!(
                "INSERT OR IGNORE INTO {} (substring, first_offset) VALUES (?1, ?2)",
                quote(&identity.namespace())
            );
            let mut stmt = tx.prepare_cached(&sql)?;
            for (pattern, offset) in pairs {
                let key = Key::new(encoding, pattern)?;
                inserted += stmt.execute(params![key, offset as i64])?;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    /// Number of recorded substrings for a stream
    pub fn count(&self, identity: &StreamIdentity) -> Result<u64> {
        self.with_reader(|conn| count_in(conn, identity))
    }

    /// Every recorded `(substring, offset)` pair of a stream, sorted by substring
    pub fn entries(&self, identity: &StreamIdentity) -> Result<Vec<(Vec<u8>, Position)>> {
        self.with_reader(|conn| {
            if namespace_encoding(conn, identity)?.is_none() {
                return Ok(Vec::new());
            }
            let sql = format!(
                "SELECT substring, first_offset FROM {} ORDER BY substring",
                quote(&identity.namespace())
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map([], |row| {
                let key = match row.get_ref(0)? {
                    ValueRef::Text(bytes) | ValueRef::Blob(bytes) => bytes.to_vec(),
                    _ => Vec::new(),
                };
                let offset: i64 = row.get(1)?;
                Ok((key, offset as Position))
            })?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    /// All namespaces with their record counts
    pub fn namespaces(&self) -> Result<Vec<NamespaceInfo>> {
        self.with_reader(|conn| {
            let listed: Vec<(String, i64, String, String)> = {
                let mut stmt = conn.prepare(
                    "SELECT name, base, format, key_encoding FROM namespaces ORDER BY namespace",
                )?;
                let rows = stmt.query_map([], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
                })?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            };

            let mut infos = Vec::with_capacity(listed.len());
            for (name, base, format, encoding) in listed {
                let (Some(format), Some(key_encoding)) = (
                    StorageFormat::from_extension(&format),
                    KeyEncoding::parse(&encoding),
                ) else {
                    debug!("skipping malformed namespace row for {}", name);
                    continue;
                };
                let identity = StreamIdentity::new(name, base as u32, format);
                let records = count_in(conn, &identity)?;
                infos.push(NamespaceInfo {
                    identity,
                    key_encoding,
                    records,
                });
            }
            Ok(infos)
        })
    }

    fn writer(&self) -> MutexGuard<'_, Connection> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` on a pooled read-only connection
    fn with_reader<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let pooled = self
            .readers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();

        let conn = match pooled {
            Some(conn) => conn,
            None => {
                let conn = Connection::open_with_flags(
                    &self.path,
                    OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
                )?;
                conn.busy_timeout(BUSY_TIMEOUT)?;
                conn
            }
        };

        let result = f(&conn);
        self.readers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(conn);
        result
    }
}

fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn count_in(conn: &Connection, identity: &StreamIdentity) -> Result<u64> {
    if namespace_encoding(conn, identity)?.is_none() {
        return Ok(0);
    }
    let sql = format!("SELECT COUNT(*) FROM {}", quote(&identity.namespace()));
    let count: i64 = conn.query_row(&sql, [], |row| row.get(0))?;
    Ok(count as u64)
}

fn namespace_encoding(conn: &Connection, identity: &StreamIdentity) -> Result<Option<KeyEncoding>> {
    let encoding: Option<String> = conn
        .prepare_cached("SELECT key_encoding FROM namespaces WHERE namespace = ?1")?
        .query_row(params![identity.namespace()], |row| row.get(0))
        .optional()?;
    Ok(encoding.as_deref().and_then(KeyEncoding::parse))
}

fn ensure_namespace(
    conn: &Connection,
    identity: &StreamIdentity,
    encoding: KeyEncoding,
) -> Result<KeyEncoding> {
    if let Some(existing) = namespace_encoding(conn, identity)? {
        return Ok(existing);
    }

    let namespace = identity.namespace();
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {} (
            substring {} PRIMARY KEY,
            first_offset INTEGER NOT NULL
        ) WITHOUT ROWID;",
        quote(&namespace),
        encoding.sql_type()
    ))?;
    conn.execute(
        "INSERT OR IGNORE INTO namespaces (namespace, name, base, format, key_encoding)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            namespace,
            identity.name,
            identity.base,
            identity.format.as_str(),
            encoding.sql_type()
        ],
    )?;
    debug!("created namespace {} ({})", namespace, encoding.sql_type());
    Ok(encoding)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn pi() -> StreamIdentity {
        StreamIdentity::new("pi", 10, StorageFormat::PlainText)
    }

    #[test]
    fn test_lookup_before_namespace_exists() {
        let dir = tempdir().unwrap();
        let index = PatternIndex::open(&dir.path().join("idx.sqlite")).unwrap();

        assert!(!index.exists(&pi()).unwrap());
        assert_eq!(index.lookup(&pi(), b"265").unwrap(), None);
        assert_eq!(index.count(&pi()).unwrap(), 0);
    }

    #[test]
    fn test_create_namespace_is_idempotent() {
        let dir = tempdir().unwrap();
        let index = PatternIndex::open(&dir.path().join("idx.sqlite")).unwrap();

        index.create_namespace(&pi(), KeyEncoding::Text).unwrap();
        index.create_namespace(&pi(), KeyEncoding::Text).unwrap();
        // A later request with another encoding keeps the original
        index.create_namespace(&pi(), KeyEncoding::Blob).unwrap();

        let namespaces = index.namespaces().unwrap();
        assert_eq!(namespaces.len(), 1);
        assert_eq!(namespaces[0].identity, pi());
        assert_eq!(namespaces[0].key_encoding, KeyEncoding::Text);
    }

    #[test]
    fn test_first_writer_wins() {
        let dir = tempdir().unwrap();
        let index = PatternIndex::open(&dir.path().join("idx.sqlite")).unwrap();

        assert!(index.insert_if_absent(&pi(), b"265", 6).unwrap());
        assert!(!index.insert_if_absent(&pi(), b"265", 6).unwrap());
        assert!(!index.insert_if_absent(&pi(), b"265", 900).unwrap());

        assert_eq!(index.lookup(&pi(), b"265").unwrap(), Some(6));
        assert_eq!(index.count(&pi()).unwrap(), 1);
    }

    #[test]
    fn test_bulk_insert_rerun_is_noop() {
        let dir = tempdir().unwrap();
        let index = PatternIndex::open(&dir.path().join("idx.sqlite")).unwrap();

        let pairs: Vec<(&[u8], Position)> = vec![(b"1", 1), (b"14", 1), (b"4", 2), (b"1", 3)];
        assert_eq!(index.bulk_insert(&pi(), pairs.iter().copied()).unwrap(), 3);
        let before = index.entries(&pi()).unwrap();

        assert_eq!(index.bulk_insert(&pi(), pairs.iter().copied()).unwrap(), 0);
        assert_eq!(index.entries(&pi()).unwrap(), before);
        assert_eq!(index.lookup(&pi(), b"1").unwrap(), Some(1));
    }

    #[test]
    fn test_blob_namespace_for_compressed_streams() {
        let dir = tempdir().unwrap();
        let index = PatternIndex::open(&dir.path().join("idx.sqlite")).unwrap();
        let id = StreamIdentity::new("pi", 10, StorageFormat::CompressedBlock);

        index.insert_if_absent(&id, &[0xff, 0x00, 0x7f], 42).unwrap();
        assert_eq!(index.lookup(&id, &[0xff, 0x00, 0x7f]).unwrap(), Some(42));
        assert_eq!(index.namespaces().unwrap()[0].key_encoding, KeyEncoding::Blob);

        // Namespaces are isolated per identity
        assert_eq!(index.lookup(&pi(), &[0xff, 0x00, 0x7f]).unwrap(), None);
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("idx.sqlite");
        {
            let index = PatternIndex::open(&path).unwrap();
            index.insert_if_absent(&pi(), b"3238", 15).unwrap();
        }

        let index = PatternIndex::open(&path).unwrap();
        assert_eq!(index.lookup(&pi(), b"3238").unwrap(), Some(15));

        drop(index);
        PatternIndex::remove(&path).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_concurrent_writers_serialize() {
        let dir = tempdir().unwrap();
        let index = PatternIndex::open(&dir.path().join("idx.sqlite")).unwrap();

        std::thread::scope(|s| {
            for worker in 0..4u64 {
                let index = &index;
                s.spawn(move || {
                    for i in 0..50u64 {
                        let key = format!("{}", i);
                        index
                            .insert_if_absent(&pi(), key.as_bytes(), worker * 1000 + i + 1)
                            .unwrap();
                        index.lookup(&pi(), key.as_bytes()).unwrap();
                    }
                });
            }
        });

        assert_eq!(index.count(&pi()).unwrap(), 50);
    }
}
