pub mod classify;
pub mod config;
pub mod error;
pub mod projection;
pub mod sync;
pub mod undo;

pub use classify::{Classifier, ClassifierError, TagSuggestion};
pub use config::{CatalogConfig, ClassifierConfig};
pub use error::EngineError;
pub use projection::{FieldStamp, ImageRecord, Projection};
pub use sync::{ConflictKind, ConflictNotice, ConflictReport, MergeOutcome};

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use tracing::{debug, info, warn};

use iocat_core::{
    ChangeEntry, EntryId, Field, FieldValue, Hlc, HlcClock, ImageKey, Mutation, Origin,
    ValidationError, WriterId, WriterIdentity, hlc::physical_now,
};
use iocat_storage::{
    CatalogSnapshot, LogStore, SqliteStorage, StagedCatalog, StorageError, WriterRecord,
};

use crate::undo::UndoStack;

/// Meta key holding the library root that image keys are relative to.
pub const META_LIBRARY_ROOT: &str = "library_root";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogState {
    Clean,
    /// A merge has been staged and awaits commit or cancel; writes are rejected.
    Merging,
}

#[derive(Debug)]
pub enum UndoOutcome {
    Applied(ChangeEntry),
    Skipped(UndoConflict),
    Empty,
}

/// An undo step that was dropped because another writer changed the field later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UndoConflict {
    pub entry_id: EntryId,
    pub image: ImageKey,
    pub field: Field,
    pub modified_by: WriterId,
    pub modified_at: Hlc,
}

struct MergeTicket;

/// A merge staged beside the catalog file, waiting for `Catalog::commit_merge`.
///
/// Dropping it (or calling `cancel`) deletes the staged file and returns the
/// catalog to `Clean`.
pub struct PendingMerge {
    ticket: Arc<MergeTicket>,
    staged: StagedCatalog,
    entries: Vec<ChangeEntry>,
    projection: Projection,
    report: ConflictReport,
    clock: HlcClock,
    imported: usize,
    source: PathBuf,
}

impl PendingMerge {
    pub fn report(&self) -> &ConflictReport {
        &self.report
    }

    /// What the catalog will look like once committed.
    pub fn projection(&self) -> &Projection {
        &self.projection
    }

    pub fn entries(&self) -> &[ChangeEntry] {
        &self.entries
    }

    /// Number of entries that come from the other copy.
    pub fn imported(&self) -> usize {
        self.imported
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn cancel(self) {
        info!(source = %self.source.display(), "merge cancelled");
    }
}

pub struct Catalog {
    identity: WriterIdentity,
    clock: HlcClock,
    storage: SqliteStorage,
    log: Vec<ChangeEntry>,
    projection: Projection,
    undo_stack: UndoStack,
    config: CatalogConfig,
    merge: Weak<MergeTicket>,
}

impl Catalog {
    pub fn create(
        path: &Path,
        identity: WriterIdentity,
        config: CatalogConfig,
    ) -> Result<Self, EngineError> {
        let storage = SqliteStorage::create(path)?;
        Self::from_storage(storage, identity, config)
    }

    pub fn open(
        path: &Path,
        identity: WriterIdentity,
        config: CatalogConfig,
    ) -> Result<Self, EngineError> {
        let storage = SqliteStorage::open(path)?;
        Self::from_storage(storage, identity, config)
    }

    fn from_storage(
        mut storage: SqliteStorage,
        identity: WriterIdentity,
        config: CatalogConfig,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let log = storage.load_entries()?;
        let projection = Projection::replay(&log);

        let mut clock = HlcClock::with_max_drift(config.max_clock_drift_ms);
        if let Some(newest) = storage.vector_clock().max_hlc() {
            clock.seed(newest);
        }
        if let Some(last) = log.last() {
            clock.seed(last.hlc);
        }
        let first_seen = clock.tick()?;
        storage.register_writer(identity.writer_id(), identity.display_name(), first_seen)?;

        debug!(
            writer = %identity.writer_id(),
            entries = log.len(),
            images = projection.len(),
            "catalog loaded"
        );

        Ok(Self {
            identity,
            clock,
            storage,
            log,
            projection,
            undo_stack: UndoStack::new(config.undo_depth),
            config,
            merge: Weak::new(),
        })
    }

    pub fn writer_id(&self) -> WriterId {
        self.identity.writer_id()
    }

    pub fn identity(&self) -> &WriterIdentity {
        &self.identity
    }

    pub fn config(&self) -> &CatalogConfig {
        &self.config
    }

    pub fn path(&self) -> &Path {
        self.storage.path()
    }

    pub fn storage(&self) -> &SqliteStorage {
        &self.storage
    }

    pub fn state(&self) -> CatalogState {
        if self.merge.strong_count() > 0 {
            CatalogState::Merging
        } else {
            CatalogState::Clean
        }
    }

    fn ensure_clean(&self) -> Result<(), EngineError> {
        match self.state() {
            CatalogState::Clean => Ok(()),
            CatalogState::Merging => Err(EngineError::MergeInProgress),
        }
    }

    /// Sign, persist, then project one new entry.
    ///
    /// The projection and log are only touched once the append has committed.
    fn record_entry(
        &mut self,
        image: ImageKey,
        old: FieldValue,
        new: FieldValue,
        origin: Origin,
    ) -> Result<ChangeEntry, EngineError> {
        let hlc = self.clock.tick()?;
        let mut entry = ChangeEntry::new_signed(&self.identity, hlc, image, old, new, origin)?;
        entry.seq = self.log.last().map_or(1, |e| e.seq + 1);
        self.storage.append_entry(&entry)?;
        self.projection.apply(&entry);
        self.log.push(entry.clone());
        Ok(entry)
    }

    // ========================================================================
    // Catalog Store
    // ========================================================================

    /// Validate and record one edit.
    pub fn apply(&mut self, mutation: Mutation) -> Result<ChangeEntry, EngineError> {
        self.ensure_clean()?;
        let image = mutation.image();
        if !self.projection.contains(image) {
            return Err(ValidationError::UnknownImage(image.to_string()).into());
        }
        let current = self.projection.current_value(image, &mutation.field());
        let new = mutation.resolve(&current)?;
        let entry = self.record_entry(image.clone(), current, new, Origin::Edit)?;
        self.undo_stack.push(entry.entry_id);
        Ok(entry)
    }

    /// Add an image to the catalog. A previously removed key is revived with
    /// its metadata.
    pub fn add_image(&mut self, key: ImageKey) -> Result<ChangeEntry, EngineError> {
        self.ensure_clean()?;
        if self.projection.contains(&key) {
            return Err(ValidationError::ImageAlreadyPresent(key.to_string()).into());
        }
        let entry = self.record_entry(
            key,
            FieldValue::Presence(false),
            FieldValue::Presence(true),
            Origin::Edit,
        )?;
        self.undo_stack.push(entry.entry_id);
        Ok(entry)
    }

    pub fn remove_image(&mut self, key: &ImageKey) -> Result<ChangeEntry, EngineError> {
        self.ensure_clean()?;
        if !self.projection.contains(key) {
            return Err(ValidationError::UnknownImage(key.to_string()).into());
        }
        let entry = self.record_entry(
            key.clone(),
            FieldValue::Presence(true),
            FieldValue::Presence(false),
            Origin::Edit,
        )?;
        self.undo_stack.push(entry.entry_id);
        Ok(entry)
    }

    pub fn record(&self, key: &ImageKey) -> Option<&ImageRecord> {
        self.projection.get(key)
    }

    /// Live images matching `predicate`, in key order.
    pub fn query<'a, P>(&'a self, predicate: P) -> impl Iterator<Item = &'a ImageRecord> + 'a
    where
        P: Fn(&ImageRecord) -> bool + 'a,
    {
        self.projection.live().filter(move |r| predicate(*r))
    }

    /// Case-insensitive substring search over key, custom filename and tags.
    /// Blank text matches every image.
    pub fn search<'a>(&'a self, text: &str) -> impl Iterator<Item = &'a ImageRecord> + 'a {
        let needle = text.trim().to_lowercase();
        self.projection
            .live()
            .filter(move |r| needle.is_empty() || r.matches(&needle))
    }

    pub fn tag_counts(&self) -> BTreeMap<String, usize> {
        self.projection.tag_counts()
    }

    pub fn len(&self) -> usize {
        self.projection.len()
    }

    pub fn is_empty(&self) -> bool {
        self.projection.is_empty()
    }

    pub fn projection(&self) -> &Projection {
        &self.projection
    }

    /// The full change log in `seq` order.
    pub fn history(&self) -> &[ChangeEntry] {
        &self.log
    }

    pub fn history_by(&self, writer: WriterId) -> impl Iterator<Item = &ChangeEntry> {
        self.log.iter().filter(move |e| e.writer == writer)
    }

    pub fn writers(&self) -> Result<Vec<WriterRecord>, EngineError> {
        Ok(self.storage.writers()?)
    }

    pub fn library_root(&self) -> Result<Option<PathBuf>, EngineError> {
        Ok(self
            .storage
            .get_meta(META_LIBRARY_ROOT)?
            .map(|bytes| PathBuf::from(String::from_utf8_lossy(&bytes).into_owned())))
    }

    pub fn set_library_root(&mut self, root: &Path) -> Result<(), EngineError> {
        self.ensure_clean()?;
        let root = root.to_string_lossy();
        self.storage.set_meta(META_LIBRARY_ROOT, root.as_bytes())?;
        Ok(())
    }

    /// Image key for a file on disk, relative to the library root when one is set.
    pub fn key_for(&self, path: &Path) -> Result<ImageKey, EngineError> {
        let key = match self.library_root()? {
            Some(root) => ImageKey::relative_to(&root, path)?,
            None => ImageKey::relative_to(Path::new(""), path)?,
        };
        Ok(key)
    }

    /// Check every entry's signature.
    pub fn verify_log(&self) -> Result<(), EngineError> {
        for entry in &self.log {
            entry.verify_signature()?;
        }
        Ok(())
    }

    // ========================================================================
    // Undo / Redo
    // ========================================================================

    fn find_entry(&self, entry_id: EntryId) -> Result<&ChangeEntry, EngineError> {
        self.log
            .iter()
            .rev()
            .find(|e| e.entry_id == entry_id)
            .ok_or_else(|| EngineError::EntryNotFound(entry_id.to_string()))
    }

    pub fn can_undo(&self) -> bool {
        self.undo_stack.undo_target().is_some()
    }

    pub fn can_redo(&self) -> bool {
        self.undo_stack.redo_target().is_some()
    }

    /// Revert this session's most recent edit.
    /// Returns `Skipped` if another writer changed the same field afterwards
    /// (skip-and-advance: the step is consumed).
    pub fn undo(&mut self) -> Result<UndoOutcome, EngineError> {
        self.ensure_clean()?;
        let Some(target_id) = self.undo_stack.undo_target() else {
            return Ok(UndoOutcome::Empty);
        };
        let target = self.find_entry(target_id)?.clone();

        let my_writer = self.writer_id();
        if let Some(stamp) = self
            .projection
            .get_any(&target.image)
            .and_then(|r| r.stamp(&target.field))
            && stamp.writer != my_writer
            && stamp.hlc > target.hlc
        {
            self.undo_stack.skip_undo();
            warn!(
                image = %target.image,
                field = %target.field,
                modified_by = %stamp.writer,
                "undo skipped: field changed by another writer"
            );
            return Ok(UndoOutcome::Skipped(UndoConflict {
                entry_id: target.entry_id,
                image: target.image,
                field: target.field,
                modified_by: stamp.writer,
                modified_at: stamp.hlc,
            }));
        }

        let current = self.projection.current_value(&target.image, &target.field);
        let entry = self.record_entry(
            target.image.clone(),
            current,
            target.old.clone(),
            Origin::Undo {
                of: target.entry_id,
            },
        )?;
        self.undo_stack.mark_undone();
        Ok(UndoOutcome::Applied(entry))
    }

    /// Re-apply the most recently undone edit.
    pub fn redo(&mut self) -> Result<UndoOutcome, EngineError> {
        self.ensure_clean()?;
        let Some(target_id) = self.undo_stack.redo_target() else {
            return Ok(UndoOutcome::Empty);
        };
        let target = self.find_entry(target_id)?.clone();

        let current = self.projection.current_value(&target.image, &target.field);
        let entry = self.record_entry(
            target.image.clone(),
            current,
            target.new.clone(),
            Origin::Redo {
                of: target.entry_id,
            },
        )?;
        self.undo_stack.mark_redone();
        Ok(UndoOutcome::Applied(entry))
    }

    // ========================================================================
    // Sync
    // ========================================================================

    /// Merge the copy at `other` into a staged file beside this catalog.
    ///
    /// Nothing on disk or in memory changes until `commit_merge`. The other file
    /// is only read.
    pub fn begin_merge(&mut self, other: &Path) -> Result<PendingMerge, EngineError> {
        self.ensure_clean()?;
        info!(source = %other.display(), "merge started");

        let remote = SqliteStorage::open_read_only(other)?.snapshot()?;
        let local = self.storage.snapshot()?;

        let mut clock = self.clock.clone();
        let outcome = sync::merge_logs(&self.log, &remote.entries, &self.identity, &mut clock)?;

        let merged = CatalogSnapshot {
            meta: merge_meta(local.meta, remote.meta),
            writers: union_by(local.writers, remote.writers, |w| w.writer),
            entries: outcome.entries,
            classifications: union_by(local.classifications, remote.classifications, |c| {
                c.content_hash
            }),
        };
        let staged = self.storage.stage(&merged)?;
        let projection = Projection::replay(&merged.entries);

        let ticket = Arc::new(MergeTicket);
        self.merge = Arc::downgrade(&ticket);

        info!(
            source = %other.display(),
            imported = outcome.imported,
            conflicts = outcome.report.len(),
            "merge staged"
        );
        Ok(PendingMerge {
            ticket,
            staged,
            entries: merged.entries,
            projection,
            report: outcome.report,
            clock,
            imported: outcome.imported,
            source: other.to_path_buf(),
        })
    }

    /// Atomically replace the catalog file with the staged merge and adopt its
    /// log. On failure the catalog stays as it was before `begin_merge`.
    pub fn commit_merge(&mut self, pending: PendingMerge) -> Result<ConflictReport, EngineError> {
        let owned = self
            .merge
            .upgrade()
            .is_some_and(|current| Arc::ptr_eq(&current, &pending.ticket));
        if !owned {
            return Err(EngineError::StaleMerge);
        }

        let PendingMerge {
            ticket,
            staged,
            entries,
            projection,
            report,
            clock,
            imported,
            source,
        } = pending;
        match self.storage.replace_with(staged) {
            Ok(()) => {}
            Err(StorageError::Reopen(reason)) => {
                // The file on disk already holds the merged log.
                self.log = entries;
                self.projection = projection;
                self.clock = clock;
                warn!(source = %source.display(), %reason, "merge written but catalog not reopened");
                return Err(StorageError::Reopen(reason).into());
            }
            Err(e) => return Err(e.into()),
        }

        self.log = entries;
        self.projection = projection;
        self.clock = clock;
        drop(ticket);

        info!(
            source = %source.display(),
            imported,
            entries = self.log.len(),
            conflicts = report.len(),
            "merge committed"
        );
        Ok(report)
    }

    /// Merge `other` into this catalog in one step.
    pub fn sync_with(&mut self, other: &Path) -> Result<ConflictReport, EngineError> {
        let pending = self.begin_merge(other)?;
        self.commit_merge(pending)
    }

    // ========================================================================
    // Auto-tagging
    // ========================================================================

    /// Classify the image file and add the confident tags as one edit.
    ///
    /// Results are cached in the catalog by content hash, so an unchanged file
    /// is never classified twice. Returns `None` when no suggestion passes the
    /// configured threshold.
    pub fn auto_tag(
        &mut self,
        key: &ImageKey,
        image_path: &Path,
        classifier: &dyn Classifier,
    ) -> Result<Option<ChangeEntry>, EngineError> {
        self.ensure_clean()?;
        if !self.projection.contains(key) {
            return Err(ValidationError::UnknownImage(key.to_string()).into());
        }

        let bytes = std::fs::read(image_path)?;
        let hash = classify::content_hash(&bytes);
        let suggestions = match self.storage.cached_classification(&hash)? {
            Some(cached) if cached.classifier == classifier.name() => {
                debug!(image = %key, hash = %hash, "classification cache hit");
                classify::from_cache_record(&cached)
            }
            _ => {
                let suggestions = classifier.classify(image_path)?;
                let record = classify::to_cache_record(
                    hash,
                    classifier.name(),
                    &suggestions,
                    physical_now()? as i64,
                );
                self.storage.cache_classification(&record)?;
                suggestions
            }
        };

        let tags = classify::select_tags(
            &suggestions,
            self.config.classifier.threshold,
            self.config.classifier.max_tags,
        );
        if tags.is_empty() {
            return Ok(None);
        }
        self.apply(Mutation::add_tags(key.clone(), tags)).map(Some)
    }
}

/// Local values win; keys only the other copy has are carried over.
fn merge_meta(
    mut local: BTreeMap<String, Vec<u8>>,
    remote: BTreeMap<String, Vec<u8>>,
) -> BTreeMap<String, Vec<u8>> {
    for (key, value) in remote {
        local.entry(key).or_insert(value);
    }
    local
}

fn union_by<T, K, F>(local: Vec<T>, remote: Vec<T>, key: F) -> Vec<T>
where
    K: Eq + std::hash::Hash,
    F: Fn(&T) -> K,
{
    let mut seen: HashSet<K> = local.iter().map(&key).collect();
    let mut out = local;
    for item in remote {
        if seen.insert(key(&item)) {
            out.push(item);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog(dir: &Path, name: &str) -> Catalog {
        Catalog::create(
            &dir.join(format!("{name}.iocat")),
            WriterIdentity::generate(name),
            CatalogConfig::default(),
        )
        .unwrap()
    }

    fn key(s: &str) -> ImageKey {
        ImageKey::new(s).unwrap()
    }

    #[test]
    fn apply_requires_present_image() {
        let dir = tempfile::tempdir().unwrap();
        let mut cat = catalog(dir.path(), "ana");
        let err = cat
            .apply(Mutation::add_tags(key("a.jpg"), ["beach"]))
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(ValidationError::UnknownImage(_))));
        assert!(cat.history().is_empty());
    }

    #[test]
    fn invalid_tag_leaves_catalog_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let mut cat = catalog(dir.path(), "ana");
        cat.add_image(key("a.jpg")).unwrap();
        let before = cat.projection().clone();
        let err = cat.apply(Mutation::add_tags(key("a.jpg"), [" "])).unwrap_err();
        assert!(matches!(err, EngineError::Validation(ValidationError::InvalidTag(_))));
        assert_eq!(cat.projection(), &before);
        assert_eq!(cat.history().len(), 1);
    }

    #[test]
    fn add_twice_rejected_and_readd_revives() {
        let dir = tempfile::tempdir().unwrap();
        let mut cat = catalog(dir.path(), "ana");
        cat.add_image(key("a.jpg")).unwrap();
        cat.apply(Mutation::add_tags(key("a.jpg"), ["cat"])).unwrap();
        assert!(matches!(
            cat.add_image(key("a.jpg")),
            Err(EngineError::Validation(ValidationError::ImageAlreadyPresent(_)))
        ));

        cat.remove_image(&key("a.jpg")).unwrap();
        assert!(cat.record(&key("a.jpg")).is_none());
        assert!(matches!(
            cat.remove_image(&key("a.jpg")),
            Err(EngineError::Validation(ValidationError::UnknownImage(_)))
        ));

        cat.add_image(key("a.jpg")).unwrap();
        assert!(cat.record(&key("a.jpg")).unwrap().tags.contains("cat"));
    }

    #[test]
    fn sequence_numbers_are_contiguous() {
        let dir = tempfile::tempdir().unwrap();
        let mut cat = catalog(dir.path(), "ana");
        cat.add_image(key("a.jpg")).unwrap();
        cat.apply(Mutation::set_tags(key("a.jpg"), ["x", "y"])).unwrap();
        cat.undo().unwrap();
        let seqs: Vec<u64> = cat.history().iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }

    #[test]
    fn undo_of_add_image_removes_it() {
        let dir = tempfile::tempdir().unwrap();
        let mut cat = catalog(dir.path(), "ana");
        cat.add_image(key("a.jpg")).unwrap();
        assert!(matches!(cat.undo().unwrap(), UndoOutcome::Applied(_)));
        assert!(cat.is_empty());
        assert!(matches!(cat.undo().unwrap(), UndoOutcome::Empty));
        assert!(matches!(cat.redo().unwrap(), UndoOutcome::Applied(_)));
        assert_eq!(cat.len(), 1);
    }

    #[test]
    fn new_edit_truncates_redo() {
        let dir = tempfile::tempdir().unwrap();
        let mut cat = catalog(dir.path(), "ana");
        cat.add_image(key("a.jpg")).unwrap();
        cat.apply(Mutation::add_tags(key("a.jpg"), ["one"])).unwrap();
        cat.undo().unwrap();
        assert!(cat.can_redo());
        cat.apply(Mutation::add_tags(key("a.jpg"), ["two"])).unwrap();
        assert!(!cat.can_redo());
        assert!(matches!(cat.redo().unwrap(), UndoOutcome::Empty));
    }

    #[test]
    fn search_and_query() {
        let dir = tempfile::tempdir().unwrap();
        let mut cat = catalog(dir.path(), "ana");
        for name in ["trips/beach.jpg", "home/cat.png", "trips/hills.jpg"] {
            cat.add_image(key(name)).unwrap();
        }
        cat.apply(Mutation::add_tags(key("home/cat.png"), ["Sunset"])).unwrap();
        cat.apply(Mutation::set_filename(key("trips/hills.jpg"), Some("Sunset Ridge"))).unwrap();

        let found: Vec<&str> = cat.search("SUNSET").map(|r| r.key.as_str()).collect();
        assert_eq!(found, vec!["home/cat.png", "trips/hills.jpg"]);
        assert_eq!(cat.search("").count(), 3);
        assert_eq!(cat.query(|r| r.key.as_str().starts_with("trips/")).count(), 2);
        assert_eq!(cat.tag_counts().get("Sunset"), Some(&1));
    }

    #[test]
    fn library_root_drives_keys() {
        let dir = tempfile::tempdir().unwrap();
        let mut cat = catalog(dir.path(), "ana");
        cat.set_library_root(Path::new("/photos")).unwrap();
        let key = cat.key_for(Path::new("/photos/trips/a.jpg")).unwrap();
        assert_eq!(key.as_str(), "trips/a.jpg");

        let outside = cat.key_for(Path::new("/trips/a.jpg")).unwrap();
        assert_eq!(outside.as_str(), "/trips/a.jpg");
        assert_ne!(outside, key);
    }

    #[test]
    fn commit_adopts_merge_when_file_cannot_be_reopened() {
        let dir = tempfile::tempdir().unwrap();
        let mut ana = catalog(dir.path(), "ana");
        ana.add_image(key("a.jpg")).unwrap();
        let copy = dir.path().join("copy.iocat");
        std::fs::copy(ana.path(), &copy).unwrap();
        let mut ben =
            Catalog::open(&copy, WriterIdentity::generate("ben"), CatalogConfig::default()).unwrap();
        ben.apply(Mutation::add_tags(key("a.jpg"), ["kite"])).unwrap();
        drop(ben);

        let pending = ana.begin_merge(&copy).unwrap();
        std::fs::write(pending.staged.path(), b"not a catalog".repeat(64)).unwrap();
        let err = ana.commit_merge(pending).unwrap_err();
        assert!(matches!(err, EngineError::Storage(StorageError::Reopen(_))), "{err}");
        assert!(!err.is_retryable());

        assert_eq!(ana.state(), CatalogState::Clean);
        assert_eq!(ana.history().len(), 2);
        let record = ana.record(&key("a.jpg")).unwrap();
        assert!(record.tags.contains("kite"));
        assert!(ana.apply(Mutation::add_tags(key("a.jpg"), ["sea"])).is_err());
    }

    struct FixedClassifier(Vec<TagSuggestion>, std::cell::Cell<usize>);

    impl Classifier for FixedClassifier {
        fn name(&self) -> &str {
            "fixed"
        }

        fn classify(&self, _path: &Path) -> Result<Vec<TagSuggestion>, ClassifierError> {
            self.1.set(self.1.get() + 1);
            Ok(self.0.clone())
        }
    }

    #[test]
    fn auto_tag_uses_cache_and_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let mut cat = catalog(dir.path(), "ana");
        let image = dir.path().join("a.jpg");
        std::fs::write(&image, b"fake pixels").unwrap();
        cat.add_image(key("a.jpg")).unwrap();

        let classifier = FixedClassifier(
            vec![TagSuggestion::new("beach", 0.9), TagSuggestion::new("sky", 0.2)],
            std::cell::Cell::new(0),
        );
        let entry = cat.auto_tag(&key("a.jpg"), &image, &classifier).unwrap().unwrap();
        assert_eq!(entry.new, FieldValue::Tags(["beach".to_string()].into()));

        cat.auto_tag(&key("a.jpg"), &image, &classifier).unwrap();
        assert_eq!(classifier.1.get(), 1);
    }

    #[test]
    fn auto_tag_below_threshold_records_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut cat = catalog(dir.path(), "ana");
        let image = dir.path().join("a.jpg");
        std::fs::write(&image, b"fake pixels").unwrap();
        cat.add_image(key("a.jpg")).unwrap();

        let classifier = FixedClassifier(vec![TagSuggestion::new("sky", 0.1)], Default::default());
        assert!(cat.auto_tag(&key("a.jpg"), &image, &classifier).unwrap().is_none());
        assert_eq!(cat.history().len(), 1);
    }
}
