//! # Meshferry Store
//!
//! Content-addressed bookkeeping of file knowledge, scoped per source
//! peer, so already-possessed content is never ferried twice.
//!
//! One ordered table of [`ContentRecord`] rows per known source, backed
//! by a JSON index on disk; content blobs live under a source-scoped
//! directory as `{hash}_{name}`. Rows for the same (hash, size) under
//! different sources are distinct knowledge, never collapsed: dedup is
//! per source table, and cross-peer knowledge arrives through explicit
//! [`ContentStore::merge`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;

pub use error::StoreError;

use std::path::{Path, PathBuf};

use meshferry_proto::FileHash;
use serde::{Deserialize, Serialize};
use tokio::fs;

/// One row of file knowledge within a source's table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentRecord {
    /// Content hash
    pub hash: FileHash,
    /// File size in bytes (dedup key together with the hash)
    pub size: u32,
    /// File name the content was announced under
    pub path: String,
    /// Whether the blob is cached locally
    pub has_content: bool,
}

/// Serializable view of every source table, in insertion order.
///
/// This is both the on-disk index format and the unit peers exchange
/// when merging knowledge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    /// Per-source tables, oldest source first
    pub sources: Vec<SourceTable>,
}

/// One source's ordered records
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceTable {
    /// Peer identifier the knowledge came from
    pub source: String,
    /// Rows in insertion order
    pub records: Vec<ContentRecord>,
}

/// A successful lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lookup {
    /// Source whose table matched
    pub source: String,
    /// Stored file name
    pub path: String,
    /// Blob bytes when cached locally, `None` for known-but-not-cached
    pub content: Option<Vec<u8>>,
}

/// Content-addressed store: per-source metadata tables plus on-disk
/// blobs.
#[derive(Debug)]
pub struct ContentStore {
    index_path: PathBuf,
    blob_root: PathBuf,
    tables: Vec<SourceTable>,
}

impl ContentStore {
    /// Open (or create) a store rooted at `root`.
    ///
    /// # Errors
    ///
    /// I/O failure creating the directories or reading a corrupt index.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        let blob_root = root.join("blobs");
        fs::create_dir_all(&blob_root).await?;

        let index_path = root.join("index.json");
        let tables = match fs::read_to_string(&index_path).await {
            Ok(json) => serde_json::from_str::<StoreSnapshot>(&json)?.sources,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        tracing::debug!(
            root = %root.display(),
            sources = tables.len(),
            "content store opened"
        );

        Ok(Self {
            index_path,
            blob_root,
            tables,
        })
    }

    /// Record knowledge of a file from `source`, persisting the blob
    /// when content is supplied.
    ///
    /// The metadata row is upserted into the source's table; an
    /// exact-duplicate prior row (same hash, size, path and cached flag)
    /// is discarded rather than repeated.
    ///
    /// # Errors
    ///
    /// I/O failure writing the blob or committing the index.
    pub async fn record(
        &mut self,
        source: &str,
        hash: FileHash,
        size: u32,
        path: &str,
        content: Option<&[u8]>,
    ) -> Result<(), StoreError> {
        let path = sanitize_name(path);

        if let Some(bytes) = content {
            let dir = self.source_dir(source);
            fs::create_dir_all(&dir).await?;
            // fs::write flushes and closes on every exit path, so a
            // failed transfer never leaves a half-written blob behind
            fs::write(dir.join(blob_name(hash, &path)), bytes).await?;
        }

        let row = ContentRecord {
            hash,
            size,
            path: path.clone(),
            has_content: content.is_some(),
        };

        let table = self.table_mut(source);
        if table.records.contains(&row) {
            tracing::debug!(%hash, source, "duplicate row discarded");
        } else {
            table.records.push(row);
        }

        self.save_index().await
    }

    /// Find content by (hash, size), scanning source tables in
    /// insertion order.
    ///
    /// Within a source, a cached row is preferred over a metadata-only
    /// one. `content` is `None` for known-but-not-cached knowledge.
    ///
    /// # Errors
    ///
    /// [`StoreError::MissingBlob`] when a cached row's blob file is
    /// absent from disk; plain I/O errors otherwise.
    pub async fn lookup(&self, hash: FileHash, size: u32) -> Result<Option<Lookup>, StoreError> {
        for table in &self.tables {
            let matches: Vec<&ContentRecord> = table
                .records
                .iter()
                .filter(|r| r.hash == hash && r.size == size)
                .collect();

            let Some(&first) = matches.first() else {
                continue;
            };
            let row = matches.iter().find(|r| r.has_content).unwrap_or(&first);

            if !row.has_content {
                return Ok(Some(Lookup {
                    source: table.source.clone(),
                    path: row.path.clone(),
                    content: None,
                }));
            }

            let blob = self.source_dir(&table.source).join(blob_name(hash, &row.path));
            return match fs::read(&blob).await {
                Ok(bytes) => Ok(Some(Lookup {
                    source: table.source.clone(),
                    path: row.path.clone(),
                    content: Some(bytes),
                })),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    Err(StoreError::MissingBlob {
                        hash,
                        path: row.path.clone(),
                    })
                }
                Err(e) => Err(e.into()),
            };
        }

        Ok(None)
    }

    /// Fetch cached content by hash alone, for serving retransmission
    /// requests (which carry no size field). First cached row wins.
    ///
    /// # Errors
    ///
    /// [`StoreError::MissingBlob`] when the matching row's blob file is
    /// absent from disk.
    pub async fn find_content(&self, hash: FileHash) -> Result<Option<Vec<u8>>, StoreError> {
        for table in &self.tables {
            let Some(row) = table
                .records
                .iter()
                .find(|r| r.hash == hash && r.has_content)
            else {
                continue;
            };

            let blob = self.source_dir(&table.source).join(blob_name(hash, &row.path));
            return match fs::read(&blob).await {
                Ok(bytes) => Ok(Some(bytes)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    Err(StoreError::MissingBlob {
                        hash,
                        path: row.path.clone(),
                    })
                }
                Err(e) => Err(e.into()),
            };
        }
        Ok(None)
    }

    /// Serializable view of all tables, for persistence or exchange
    #[must_use]
    pub fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            sources: self.tables.clone(),
        }
    }

    /// Union a snapshot of another store into this one, per source
    /// table, dropping exact-duplicate rows, then commit.
    ///
    /// Snapshots carry metadata, not blobs: an incoming cached row whose
    /// blob is not already on local disk is downgraded to
    /// known-but-not-cached so lookups stay honest.
    ///
    /// # Errors
    ///
    /// I/O failure probing blobs or committing the index.
    pub async fn merge(&mut self, snapshot: StoreSnapshot) -> Result<(), StoreError> {
        for SourceTable { source, records } in snapshot.sources {
            for mut row in records {
                if row.has_content {
                    let blob = self.source_dir(&source).join(blob_name(row.hash, &row.path));
                    if !fs::try_exists(&blob).await? {
                        row.has_content = false;
                    }
                }
                let table = self.table_mut(&source);
                if !table.records.contains(&row) {
                    table.records.push(row);
                }
            }
        }
        self.save_index().await
    }

    /// Number of known sources
    #[must_use]
    pub fn source_count(&self) -> usize {
        self.tables.len()
    }

    /// Rows recorded for one source, if known
    #[must_use]
    pub fn records(&self, source: &str) -> Option<&[ContentRecord]> {
        self.tables
            .iter()
            .find(|t| t.source == source)
            .map(|t| t.records.as_slice())
    }

    /// Blob directory for one source. The source name comes off the wire
    /// (peer announce), so it gets the same final-component sanitization
    /// as file names before touching the filesystem.
    fn source_dir(&self, source: &str) -> PathBuf {
        self.blob_root.join(sanitize_name(source))
    }

    fn table_mut(&mut self, source: &str) -> &mut SourceTable {
        let i = match self.tables.iter().position(|t| t.source == source) {
            Some(i) => i,
            None => {
                self.tables.push(SourceTable {
                    source: source.to_owned(),
                    records: Vec::new(),
                });
                self.tables.len() - 1
            }
        };
        &mut self.tables[i]
    }

    async fn save_index(&self) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(&self.snapshot())?;
        fs::write(&self.index_path, json).await?;
        Ok(())
    }
}

/// Blob file name: `{hash}_{name}`, hash in fixed-width hex
fn blob_name(hash: FileHash, path: &str) -> String {
    format!("{hash}_{path}")
}

/// Keep only the final path component so a hostile announce name cannot
/// escape the source directory
fn sanitize_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "unnamed".to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store(dir: &Path) -> ContentStore {
        ContentStore::open(dir).await.unwrap()
    }

    #[tokio::test]
    async fn records_and_looks_up_cached_content() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = store(dir.path()).await;

        let hash = FileHash::of(b"content");
        s.record("s123456", hash, 7, "Test_File.txt", Some(b"content"))
            .await
            .unwrap();

        let found = s.lookup(hash, 7).await.unwrap().unwrap();
        assert_eq!(found.source, "s123456");
        assert_eq!(found.path, "Test_File.txt");
        assert_eq!(found.content.as_deref(), Some(&b"content"[..]));
    }

    #[tokio::test]
    async fn metadata_only_rows_return_null_content() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = store(dir.path()).await;

        let hash = FileHash::from_raw(54321);
        s.record("s54321", hash, 10_000, "Test_File.txt", None)
            .await
            .unwrap();

        let found = s.lookup(hash, 10_000).await.unwrap().unwrap();
        assert_eq!(found.content, None);

        // Same hash, wrong size: not a match
        assert!(s.lookup(hash, 9_999).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn exact_duplicates_collapse_within_a_source() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = store(dir.path()).await;

        let hash = FileHash::of(b"dup");
        for _ in 0..2 {
            s.record("peer-a", hash, 3, "dup.bin", Some(b"dup"))
                .await
                .unwrap();
        }
        assert_eq!(s.records("peer-a").unwrap().len(), 1);

        // Same knowledge from a different source is a distinct row
        s.record("peer-b", hash, 3, "dup.bin", None).await.unwrap();
        assert_eq!(s.records("peer-b").unwrap().len(), 1);
        assert_eq!(s.source_count(), 2);
    }

    #[tokio::test]
    async fn cached_row_preferred_over_metadata_only() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = store(dir.path()).await;

        let hash = FileHash::of(b"best");
        s.record("peer-a", hash, 4, "best.txt", None).await.unwrap();
        s.record("peer-a", hash, 4, "best.txt", Some(b"best"))
            .await
            .unwrap();

        let found = s.lookup(hash, 4).await.unwrap().unwrap();
        assert_eq!(found.content.as_deref(), Some(&b"best"[..]));
    }

    #[tokio::test]
    async fn missing_blob_is_an_integrity_error_not_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = store(dir.path()).await;

        let hash = FileHash::of(b"gone");
        s.record("peer-a", hash, 4, "gone.txt", Some(b"gone"))
            .await
            .unwrap();

        let blob = dir
            .path()
            .join("blobs/peer-a")
            .join(format!("{hash}_gone.txt"));
        std::fs::remove_file(blob).unwrap();

        assert!(matches!(
            s.lookup(hash, 4).await,
            Err(StoreError::MissingBlob { .. })
        ));
    }

    #[tokio::test]
    async fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let hash = FileHash::of(b"persist");
        {
            let mut s = store(dir.path()).await;
            s.record("peer-a", hash, 7, "p.bin", Some(b"persist"))
                .await
                .unwrap();
        }

        let s = store(dir.path()).await;
        let found = s.lookup(hash, 7).await.unwrap().unwrap();
        assert_eq!(found.content.as_deref(), Some(&b"persist"[..]));
    }

    #[tokio::test]
    async fn merge_unions_per_source_dropping_duplicates() {
        let dir_a = tempfile::tempdir().unwrap();
        let dir_b = tempfile::tempdir().unwrap();

        let mut a = store(dir_a.path()).await;
        let mut b = store(dir_b.path()).await;

        let shared = FileHash::from_raw(1);
        let only_b = FileHash::from_raw(2);

        a.record("peer-x", shared, 10, "s.txt", None).await.unwrap();
        b.record("peer-x", shared, 10, "s.txt", None).await.unwrap();
        b.record("peer-y", only_b, 20, "y.txt", None).await.unwrap();

        a.merge(b.snapshot()).await.unwrap();

        assert_eq!(a.records("peer-x").unwrap().len(), 1);
        assert_eq!(a.records("peer-y").unwrap().len(), 1);
        assert_eq!(a.source_count(), 2);
    }

    #[tokio::test]
    async fn merged_cached_rows_without_local_blobs_downgrade() {
        let dir_a = tempfile::tempdir().unwrap();
        let dir_b = tempfile::tempdir().unwrap();

        let mut a = store(dir_a.path()).await;
        let mut b = store(dir_b.path()).await;

        let hash = FileHash::of(b"remote");
        b.record("peer-z", hash, 6, "r.bin", Some(b"remote"))
            .await
            .unwrap();

        a.merge(b.snapshot()).await.unwrap();

        // Knowledge transferred; the blob did not, so no integrity error
        let found = a.lookup(hash, 6).await.unwrap().unwrap();
        assert_eq!(found.content, None);
    }

    #[tokio::test]
    async fn hostile_source_names_stay_inside_the_blob_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("store");
        let mut s = store(&root).await;

        // The source name arrives over the wire, so it is just as
        // hostile as a file name
        let hash = FileHash::of(b"evil");
        s.record("../../planted", hash, 4, "x.txt", Some(b"evil"))
            .await
            .unwrap();

        assert!(!dir.path().join(format!("planted/{hash}_x.txt")).exists());
        assert!(root
            .join("blobs/planted")
            .join(format!("{hash}_x.txt"))
            .exists());

        // Reads go through the same mapping, so the blob is found
        let found = s.lookup(hash, 4).await.unwrap().unwrap();
        assert_eq!(found.source, "../../planted");
        assert_eq!(found.content.as_deref(), Some(&b"evil"[..]));
    }

    #[tokio::test]
    async fn hostile_names_stay_inside_the_source_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = store(dir.path()).await;

        let hash = FileHash::of(b"evil");
        s.record("peer-a", hash, 4, "../../escape.txt", Some(b"evil"))
            .await
            .unwrap();

        let found = s.lookup(hash, 4).await.unwrap().unwrap();
        assert_eq!(found.path, "escape.txt");
        assert!(dir
            .path()
            .join("blobs/peer-a")
            .join(format!("{hash}_escape.txt"))
            .exists());
    }
}
