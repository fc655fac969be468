//! SQLite database management with migrations
//!
//! Persists fragments, lexical postings and embeddings so a corpus can be
//! reloaded without re-tokenizing or re-embedding.

use crate::embedding::Posting;
use crate::error::{EarshotError, Result};
use crate::fragment::{Fragment, FragmentStoreError};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension, Row};
use std::path::Path;

/// Database connection pool
pub type DbPool = Pool<SqliteConnectionManager>;

/// zstd level for embedding blobs
const VECTOR_COMPRESSION_LEVEL: i32 = 3;

/// Database manager with migration support
pub struct Database {
    pool: DbPool,
}

/// One persisted embedding
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEmbedding {
    pub fragment_id: String,
    pub model: String,
    pub vector: Vec<f32>,
}

impl Database {
    /// Create a new database connection
    pub fn new(db_path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| EarshotError::Io {
                source: e,
                context: format!("Failed to create database directory: {:?}", parent),
            })?;
        }

        let manager = SqliteConnectionManager::file(db_path).with_init(|conn| {
            conn.execute_batch(
                "
                PRAGMA journal_mode = WAL;
                PRAGMA synchronous = NORMAL;
                PRAGMA foreign_keys = ON;
                PRAGMA busy_timeout = 5000;
                ",
            )
        });

        let pool = Pool::builder().max_size(8).build(manager)?;
        let db = Self { pool };

        // Run migrations
        db.migrate()?;

        Ok(db)
    }

    /// Get a connection from the pool
    pub fn get_conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    /// Run database migrations
    fn migrate(&self) -> Result<()> {
        let conn = self.get_conn()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            )",
            [],
        )?;

        let current_version: i32 = conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM _migrations",
            [],
            |row| row.get(0),
        )?;

        for (version, migration) in MIGRATIONS.iter().enumerate() {
            let version = version as i32 + 1;

            if version > current_version {
                tracing::info!("Applying migration {}", version);

                conn.execute_batch(migration)?;
                conn.execute(
                    "INSERT INTO _migrations (version, applied_at) VALUES (?1, datetime('now'))",
                    params![version],
                )?;
            }
        }

        Ok(())
    }

    /// Insert fragments not yet stored
    ///
    /// A fragment already stored with the same content hash is skipped; one
    /// stored with a different hash aborts the whole write.
    ///
    /// # Returns
    /// Number of newly inserted fragments
    pub fn insert_fragments<'a>(
        &self,
        fragments: impl IntoIterator<Item = &'a Fragment>,
    ) -> Result<usize> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        let mut inserted = 0;

        {
            let mut existing_hash =
                tx.prepare("SELECT content_hash FROM fragments WHERE fragment_id = ?1")?;
            let mut insert = tx.prepare(
                "INSERT INTO fragments (
                    fragment_id, document_id, speaker_id, start_time, end_time,
                    normalized_text, verbatim_text, token_count, position,
                    source_path, metadata, content_hash
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            )?;

            for fragment in fragments {
                let hash = fragment.content_hash();
                let stored: Option<String> = existing_hash
                    .query_row(params![fragment.fragment_id()], |row| row.get(0))
                    .optional()?;

                match stored {
                    Some(stored) if stored == hash => continue,
                    Some(_) => {
                        return Err(
                            FragmentStoreError::Immutable(fragment.fragment_id().to_string()).into(),
                        )
                    }
                    None => {}
                }

                let metadata = serde_json::to_string(fragment.metadata()).map_err(|e| {
                    EarshotError::Json {
                        source: e,
                        context: format!("Failed to encode metadata of {}", fragment.fragment_id()),
                    }
                })?;

                insert.execute(params![
                    fragment.fragment_id(),
                    fragment.document_id(),
                    fragment.speaker_id(),
                    fragment.start_time(),
                    fragment.end_time(),
                    fragment.normalized_text(),
                    fragment.verbatim_text(),
                    fragment.token_count() as i64,
                    fragment.position_in_document(),
                    fragment.source_path(),
                    metadata,
                    hash,
                ])?;
                inserted += 1;
            }
        }

        tx.commit()?;
        Ok(inserted)
    }

    /// All stored fragments, ordered by document and position
    pub fn load_fragments(&self) -> Result<Vec<Fragment>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT fragment_id, document_id, speaker_id, start_time, end_time,
                    normalized_text, verbatim_text, token_count, position,
                    source_path, metadata
             FROM fragments
             ORDER BY document_id, position",
        )?;

        let rows = stmt.query_map([], FragmentRow::from_row)?;

        let mut fragments = Vec::new();
        for row in rows {
            fragments.push(row?.into_fragment()?);
        }
        Ok(fragments)
    }

    /// Replace all lexical index data
    pub fn replace_lexical<'a>(
        &self,
        lengths: impl IntoIterator<Item = (&'a str, u32)>,
        postings: impl IntoIterator<Item = (&'a str, &'a str, u32)>,
    ) -> Result<(usize, usize)> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        let (mut doc_count, mut posting_count) = (0, 0);

        tx.execute("DELETE FROM postings", [])?;
        tx.execute("DELETE FROM lexical_docs", [])?;

        {
            let mut insert_doc = tx.prepare(
                "INSERT INTO lexical_docs (fragment_id, ordinal, length) VALUES (?1, ?2, ?3)",
            )?;
            for (ordinal, (fragment_id, length)) in lengths.into_iter().enumerate() {
                insert_doc.execute(params![fragment_id, ordinal as i64, length])?;
                doc_count += 1;
            }

            let mut insert_posting = tx.prepare(
                "INSERT INTO postings (term, fragment_id, term_frequency) VALUES (?1, ?2, ?3)",
            )?;
            for (term, fragment_id, tf) in postings {
                insert_posting.execute(params![term, fragment_id, tf])?;
                posting_count += 1;
            }
        }

        tx.commit()?;
        Ok((doc_count, posting_count))
    }

    /// Lexical document lengths (in indexing order) and postings
    pub fn load_lexical(&self) -> Result<(Vec<(String, u32)>, Vec<Posting>)> {
        let conn = self.get_conn()?;

        let mut stmt =
            conn.prepare("SELECT fragment_id, length FROM lexical_docs ORDER BY ordinal")?;
        let lengths = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<(String, u32)>>>()?;

        let mut stmt = conn.prepare("SELECT term, fragment_id, term_frequency FROM postings")?;
        let postings = stmt
            .query_map([], |row| {
                Ok(Posting {
                    term: row.get(0)?,
                    fragment_id: row.get(1)?,
                    term_frequency: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<Posting>>>()?;

        Ok((lengths, postings))
    }

    /// Replace all embeddings
    pub fn replace_embeddings<'a>(
        &self,
        entries: impl IntoIterator<Item = (&'a str, &'a [f32])>,
        model: &str,
    ) -> Result<usize> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        let mut count = 0;

        tx.execute("DELETE FROM embeddings", [])?;

        {
            let mut insert = tx.prepare(
                "INSERT INTO embeddings (fragment_id, ordinal, dimension, model, vector, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, datetime('now'))",
            )?;
            for (ordinal, (fragment_id, vector)) in entries.into_iter().enumerate() {
                let blob = encode_vector(vector)?;
                insert.execute(params![
                    fragment_id,
                    ordinal as i64,
                    vector.len() as i64,
                    model,
                    blob
                ])?;
                count += 1;
            }
        }

        tx.commit()?;
        Ok(count)
    }

    /// Stored embeddings in insertion order
    pub fn load_embeddings(&self) -> Result<Vec<StoredEmbedding>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT fragment_id, model, dimension, vector FROM embeddings ORDER BY ordinal",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, Vec<u8>>(3)?,
            ))
        })?;

        let mut embeddings = Vec::new();
        for row in rows {
            let (fragment_id, model, dimension, blob) = row?;
            let vector = decode_vector(&blob, dimension as usize).map_err(|reason| {
                EarshotError::Corrupt(format!("embedding of {}: {}", fragment_id, reason))
            })?;
            embeddings.push(StoredEmbedding {
                fragment_id,
                model,
                vector,
            });
        }
        Ok(embeddings)
    }

    /// Get database statistics
    pub fn stats(&self) -> Result<DbStats> {
        let conn = self.get_conn()?;
        let count = |table: &str| -> Result<usize> {
            let n: i64 =
                conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))?;
            Ok(n as usize)
        };

        Ok(DbStats {
            fragment_count: count("fragments")?,
            document_count: conn.query_row(
                "SELECT COUNT(DISTINCT document_id) FROM fragments",
                [],
                |row| row.get::<_, i64>(0),
            )? as usize,
            lexical_doc_count: count("lexical_docs")?,
            posting_count: count("postings")?,
            embedding_count: count("embeddings")?,
        })
    }
}

/// Database statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbStats {
    pub fragment_count: usize,
    pub document_count: usize,
    pub lexical_doc_count: usize,
    pub posting_count: usize,
    pub embedding_count: usize,
}

struct FragmentRow {
    fragment_id: String,
    document_id: String,
    speaker_id: Option<String>,
    start_time: Option<f64>,
    end_time: Option<f64>,
    normalized_text: String,
    verbatim_text: String,
    token_count: i64,
    position: u32,
    source_path: String,
    metadata: String,
}

impl FragmentRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            fragment_id: row.get(0)?,
            document_id: row.get(1)?,
            speaker_id: row.get(2)?,
            start_time: row.get(3)?,
            end_time: row.get(4)?,
            normalized_text: row.get(5)?,
            verbatim_text: row.get(6)?,
            token_count: row.get(7)?,
            position: row.get(8)?,
            source_path: row.get(9)?,
            metadata: row.get(10)?,
        })
    }

    fn into_fragment(self) -> Result<Fragment> {
        let metadata = serde_json::from_str(&self.metadata).map_err(|e| EarshotError::Json {
            source: e,
            context: format!("Failed to decode metadata of {}", self.fragment_id),
        })?;

        let fragment = Fragment::builder(self.fragment_id, self.document_id, self.normalized_text)
            .maybe_speaker(self.speaker_id)
            .start_time(self.start_time)
            .end_time(self.end_time)
            .verbatim(self.verbatim_text)
            .token_count(self.token_count.max(0) as usize)
            .position(self.position)
            .source_path(self.source_path)
            .metadata(metadata)
            .build()?;

        Ok(fragment)
    }
}

/// Little-endian f32 bytes, zstd-compressed
pub fn encode_vector(vector: &[f32]) -> Result<Vec<u8>> {
    let bytes: Vec<u8> = vector.iter().flat_map(|v| v.to_le_bytes()).collect();
    zstd::encode_all(&bytes[..], VECTOR_COMPRESSION_LEVEL).map_err(|e| EarshotError::Io {
        source: e,
        context: "Failed to compress embedding".to_string(),
    })
}

/// Inverse of [`encode_vector`]; checks the decoded length against `dimension`
pub fn decode_vector(blob: &[u8], dimension: usize) -> std::result::Result<Vec<f32>, String> {
    let bytes = zstd::decode_all(blob).map_err(|e| e.to_string())?;
    if bytes.len() != dimension * 4 {
        return Err(format!(
            "expected {} bytes for {} dimensions, got {}",
            dimension * 4,
            dimension,
            bytes.len()
        ));
    }

    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

/// Database migrations (each string is one migration)
const MIGRATIONS: &[&str] = &[
    // Migration 1: Initial schema
    r#"
    -- Immutable transcript fragments
    CREATE TABLE fragments (
        fragment_id TEXT PRIMARY KEY,
        document_id TEXT NOT NULL,
        speaker_id TEXT,
        start_time REAL,
        end_time REAL,
        normalized_text TEXT NOT NULL,
        verbatim_text TEXT NOT NULL,
        token_count INTEGER NOT NULL,
        position INTEGER NOT NULL,
        source_path TEXT NOT NULL DEFAULT '',
        metadata TEXT NOT NULL DEFAULT 'null',  -- JSON metadata
        content_hash TEXT NOT NULL,
        UNIQUE (document_id, position)
    );

    CREATE INDEX idx_fragments_document ON fragments(document_id);
    CREATE INDEX idx_fragments_speaker ON fragments(speaker_id);

    -- BM25 document lengths
    CREATE TABLE lexical_docs (
        fragment_id TEXT PRIMARY KEY,
        ordinal INTEGER NOT NULL,
        length INTEGER NOT NULL,
        FOREIGN KEY (fragment_id) REFERENCES fragments(fragment_id) ON DELETE CASCADE
    );

    -- BM25 postings
    CREATE TABLE postings (
        term TEXT NOT NULL,
        fragment_id TEXT NOT NULL,
        term_frequency INTEGER NOT NULL,
        PRIMARY KEY (term, fragment_id),
        FOREIGN KEY (fragment_id) REFERENCES lexical_docs(fragment_id) ON DELETE CASCADE
    );

    CREATE INDEX idx_postings_fragment ON postings(fragment_id);

    -- Normalized embeddings
    CREATE TABLE embeddings (
        fragment_id TEXT PRIMARY KEY,
        ordinal INTEGER NOT NULL,
        dimension INTEGER NOT NULL,
        model TEXT NOT NULL,
        vector BLOB NOT NULL,
        created_at TEXT NOT NULL,
        FOREIGN KEY (fragment_id) REFERENCES fragments(fragment_id) ON DELETE CASCADE
    );

    CREATE INDEX idx_embeddings_model ON embeddings(model);
    "#,
];
