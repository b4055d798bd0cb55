//! Narrative segment corpus access.
//!
//! The corpus is produced by the extraction pipeline and read here in two
//! ways: a single streaming scan over every segment (used to build the
//! co-occurrence index), and a direct per-pair count that re-scans the
//! store. The direct count exists so the index can be checked against it;
//! analysis code never calls it per pair.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum CorpusError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed corpus file {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("corpus database {path} is missing table {table}")]
    MissingTable { path: PathBuf, table: &'static str },
}

/// Read-only view over narrative segments.
pub trait SegmentCorpus {
    /// Visit every segment exactly once with the distinct entity names it
    /// mentions.
    fn scan_segments(&self, visit: &mut dyn FnMut(&[String])) -> Result<(), CorpusError>;

    /// Count segments mentioning both entities without any index.
    fn count_together(&self, entity_a: &str, entity_b: &str) -> Result<u64, CorpusError>;
}

// =============================================================================
// In-memory corpus
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub id: String,
    pub entities: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryCorpus {
    pub segments: Vec<Segment>,
}

impl MemoryCorpus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, id: impl Into<String>, entities: &[&str]) {
        self.segments.push(Segment {
            id: id.into(),
            entities: entities.iter().map(|e| e.to_string()).collect(),
        });
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, CorpusError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| CorpusError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| CorpusError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

impl SegmentCorpus for MemoryCorpus {
    fn scan_segments(&self, visit: &mut dyn FnMut(&[String])) -> Result<(), CorpusError> {
        for segment in &self.segments {
            let distinct = distinct_names(&segment.entities);
            visit(&distinct);
        }
        Ok(())
    }

    fn count_together(&self, entity_a: &str, entity_b: &str) -> Result<u64, CorpusError> {
        let count = self
            .segments
            .iter()
            .filter(|segment| {
                segment.entities.iter().any(|e| e == entity_a)
                    && segment.entities.iter().any(|e| e == entity_b)
            })
            .count();
        Ok(count as u64)
    }
}

fn distinct_names(names: &[String]) -> Vec<String> {
    let mut seen = HashSet::with_capacity(names.len());
    names
        .iter()
        .filter(|name| seen.insert(name.as_str()))
        .cloned()
        .collect()
}

// =============================================================================
// SQLite corpus
// =============================================================================

const REQUIRED_TABLES: [&str; 3] = ["entities", "segments", "entity_mentions"];

pub struct SqliteCorpus {
    conn: Connection,
}

impl SqliteCorpus {
    /// Open an existing corpus database read-only.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CorpusError> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(CorpusError::Io {
                path: path.clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "corpus not found"),
            });
        }
        let conn = Connection::open_with_flags(
            &path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        for table in REQUIRED_TABLES {
            let found: Option<String> = conn
                .query_row(
                    "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
                    params![table],
                    |row| row.get(0),
                )
                .optional()?;
            if found.is_none() {
                return Err(CorpusError::MissingTable {
                    path: path.clone(),
                    table,
                });
            }
        }
        Ok(Self { conn })
    }

    /// Create (or reuse) a writable corpus database with the expected schema.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, CorpusError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| CorpusError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let conn = Connection::open(&path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS entities (\
               id INTEGER PRIMARY KEY,\
               name TEXT NOT NULL UNIQUE\
             );\
             CREATE TABLE IF NOT EXISTS segments (\
               id INTEGER PRIMARY KEY,\
               source TEXT\
             );\
             CREATE TABLE IF NOT EXISTS entity_mentions (\
               entity_id INTEGER NOT NULL REFERENCES entities(id),\
               segment_id INTEGER NOT NULL REFERENCES segments(id)\
             );\
             CREATE INDEX IF NOT EXISTS idx_mentions_segment ON entity_mentions(segment_id);\
             CREATE INDEX IF NOT EXISTS idx_mentions_entity ON entity_mentions(entity_id);",
        )?;
        Ok(Self { conn })
    }

    /// Copy every segment of another corpus into this database in a single
    /// transaction.
    pub fn import(&mut self, corpus: &MemoryCorpus) -> Result<usize, CorpusError> {
        let tx = self.conn.transaction()?;
        for segment in &corpus.segments {
            let names: Vec<&str> = segment.entities.iter().map(String::as_str).collect();
            insert_segment(&tx, &segment.id, &names)?;
        }
        tx.commit()?;
        Ok(corpus.len())
    }
}

fn insert_segment(conn: &Connection, source: &str, entities: &[&str]) -> Result<(), CorpusError> {
    conn.execute("INSERT INTO segments (source) VALUES (?1)", params![source])?;
    let segment_id = conn.last_insert_rowid();
    for name in entities {
        conn.execute(
            "INSERT INTO entities (name) VALUES (?1) ON CONFLICT(name) DO NOTHING",
            params![name],
        )?;
        let entity_id: i64 = conn.query_row(
            "SELECT id FROM entities WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )?;
        conn.execute(
            "INSERT INTO entity_mentions (entity_id, segment_id) VALUES (?1, ?2)",
            params![entity_id, segment_id],
        )?;
    }
    Ok(())
}

impl SegmentCorpus for SqliteCorpus {
    fn scan_segments(&self, visit: &mut dyn FnMut(&[String])) -> Result<(), CorpusError> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT m.segment_id, e.name \
             FROM entity_mentions m JOIN entities e ON e.id = m.entity_id \
             ORDER BY m.segment_id",
        )?;
        let mut rows = stmt.query([])?;
        let mut current: Option<i64> = None;
        let mut names: Vec<String> = Vec::new();
        while let Some(row) = rows.next()? {
            let segment_id: i64 = row.get(0)?;
            let name: String = row.get(1)?;
            if current != Some(segment_id) {
                if current.is_some() {
                    visit(&names);
                }
                names.clear();
                current = Some(segment_id);
            }
            names.push(name);
        }
        if current.is_some() {
            visit(&names);
        }
        Ok(())
    }

    fn count_together(&self, entity_a: &str, entity_b: &str) -> Result<u64, CorpusError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(DISTINCT ma.segment_id) \
             FROM entity_mentions ma \
             JOIN entities ea ON ea.id = ma.entity_id \
             JOIN entity_mentions mb ON mb.segment_id = ma.segment_id \
             JOIN entities eb ON eb.id = mb.entity_id \
             WHERE ea.name = ?1 AND eb.name = ?2",
            params![entity_a, entity_b],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }
}

/// Open a corpus by file extension: `.sqlite`, `.sqlite3` and `.db` are
/// read as SQLite, anything else as JSON.
pub fn open_corpus(path: impl AsRef<Path>) -> Result<Box<dyn SegmentCorpus>, CorpusError> {
    let path = path.as_ref();
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("sqlite") | Some("sqlite3") | Some("db") => Ok(Box::new(SqliteCorpus::open(path)?)),
        _ => Ok(Box::new(MemoryCorpus::load(path)?)),
    }
}
