use std::collections::BTreeMap;

use iocat_core::{ChangeEntry, ContentHash, Hlc, VectorClock, WriterId};

use crate::error::StorageError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriterRecord {
    pub writer: WriterId,
    pub display_name: Option<String>,
    pub first_seen: Hlc,
}

/// Classifier output cached per image content hash.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedClassification {
    pub content_hash: ContentHash,
    pub classifier: String,
    /// `(tag, confidence)` in the order the classifier returned them.
    pub suggestions: Vec<(String, f32)>,
    /// Milliseconds since the Unix epoch.
    pub recorded_at: i64,
}

/// Everything a catalog file holds, read in one pass.
#[derive(Debug, Clone, Default)]
pub struct CatalogSnapshot {
    pub meta: BTreeMap<String, Vec<u8>>,
    pub writers: Vec<WriterRecord>,
    pub entries: Vec<ChangeEntry>,
    pub classifications: Vec<CachedClassification>,
}

pub trait LogStore {
    /// Append one entry. The entry's `seq` must be the next free position.
    fn append_entry(&mut self, entry: &ChangeEntry) -> Result<(), StorageError>;

    /// All entries in `seq` order.
    fn load_entries(&self) -> Result<Vec<ChangeEntry>, StorageError>;

    fn entry_count(&self) -> Result<u64, StorageError>;

    fn vector_clock(&self) -> &VectorClock;

    fn register_writer(
        &mut self,
        writer: WriterId,
        display_name: &str,
        first_seen: Hlc,
    ) -> Result<(), StorageError>;

    fn writers(&self) -> Result<Vec<WriterRecord>, StorageError>;

    fn get_meta(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    fn set_meta(&mut self, key: &str, value: &[u8]) -> Result<(), StorageError>;

    fn all_meta(&self) -> Result<BTreeMap<String, Vec<u8>>, StorageError>;

    fn cached_classification(
        &self,
        content_hash: &ContentHash,
    ) -> Result<Option<CachedClassification>, StorageError>;

    fn cache_classification(&mut self, record: &CachedClassification) -> Result<(), StorageError>;

    fn classifications(&self) -> Result<Vec<CachedClassification>, StorageError>;

    fn snapshot(&self) -> Result<CatalogSnapshot, StorageError> {
        Ok(CatalogSnapshot {
            meta: self.all_meta()?,
            writers: self.writers()?,
            entries: self.load_entries()?,
            classifications: self.classifications()?,
        })
    }
}
