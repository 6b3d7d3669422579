use std::collections::BTreeMap;

use iocat_core::{ChangeEntry, EntryId, Field, FieldValue, Hlc, ImageKey, TagSet, WriterId};

/// Who last wrote a field, and when.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldStamp {
    pub writer: WriterId,
    pub hlc: Hlc,
    pub entry_id: EntryId,
}

/// Current metadata of one image, derived from the change log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRecord {
    pub key: ImageKey,
    pub tags: TagSet,
    pub custom_filename: Option<String>,
    pub modified: Hlc,
    pub last_writer: WriterId,
    present: bool,
    stamps: BTreeMap<Field, FieldStamp>,
}

impl ImageRecord {
    fn new(key: ImageKey, writer: WriterId, hlc: Hlc) -> Self {
        Self {
            key,
            tags: TagSet::new(),
            custom_filename: None,
            modified: hlc,
            last_writer: writer,
            present: false,
            stamps: BTreeMap::new(),
        }
    }

    /// Custom filename if set, else the file stem of the key.
    pub fn display_name(&self) -> &str {
        self.custom_filename
            .as_deref()
            .unwrap_or_else(|| self.key.stem())
    }

    pub fn is_present(&self) -> bool {
        self.present
    }

    pub fn stamp(&self, field: &Field) -> Option<&FieldStamp> {
        self.stamps.get(field)
    }

    pub fn value(&self, field: &Field) -> FieldValue {
        match field {
            Field::Tags => FieldValue::Tags(self.tags.clone()),
            Field::CustomFilename => FieldValue::Filename(self.custom_filename.clone()),
            Field::Presence => FieldValue::Presence(self.present),
            Field::Unknown(_) => FieldValue::initial(field),
        }
    }

    /// Case-insensitive substring match over key, custom filename and tags.
    /// `needle` must already be lowercase.
    pub fn matches(&self, needle: &str) -> bool {
        self.key.as_str().to_lowercase().contains(needle)
            || self
                .custom_filename
                .as_deref()
                .is_some_and(|name| name.to_lowercase().contains(needle))
            || self.tags.iter().any(|tag| tag.to_lowercase().contains(needle))
    }
}

/// Image key → record, built by replaying entries in log order.
///
/// Removed images stay as tombstones so undo and merges can revive them with
/// their metadata intact; they are hidden from every read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Projection {
    records: BTreeMap<ImageKey, ImageRecord>,
}

impl Projection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replay<'a>(log: impl IntoIterator<Item = &'a ChangeEntry>) -> Self {
        let mut projection = Self::new();
        for entry in log {
            projection.apply(entry);
        }
        projection
    }

    /// Fold one entry into the view. Entries for fields this version does not
    /// know stay in the log but leave the view unchanged.
    pub fn apply(&mut self, entry: &ChangeEntry) {
        if !entry.field.is_known() {
            return;
        }
        let record = self
            .records
            .entry(entry.image.clone())
            .or_insert_with(|| ImageRecord::new(entry.image.clone(), entry.writer, entry.hlc));

        match &entry.new {
            FieldValue::Tags(tags) => record.tags = tags.clone(),
            FieldValue::Filename(name) => record.custom_filename = name.clone(),
            FieldValue::Presence(present) => record.present = *present,
            FieldValue::Opaque { .. } => return,
        }
        record.stamps.insert(
            entry.field.clone(),
            FieldStamp {
                writer: entry.writer,
                hlc: entry.hlc,
                entry_id: entry.entry_id,
            },
        );
        record.modified = entry.hlc;
        record.last_writer = entry.writer;
    }

    /// Live record for `key`.
    pub fn get(&self, key: &ImageKey) -> Option<&ImageRecord> {
        self.records.get(key).filter(|r| r.present)
    }

    /// Record for `key` including removed images.
    pub fn get_any(&self, key: &ImageKey) -> Option<&ImageRecord> {
        self.records.get(key)
    }

    pub fn contains(&self, key: &ImageKey) -> bool {
        self.get(key).is_some()
    }

    /// Current value of a field; never-written fields report their initial value.
    pub fn current_value(&self, key: &ImageKey, field: &Field) -> FieldValue {
        self.records
            .get(key)
            .map(|r| r.value(field))
            .unwrap_or_else(|| FieldValue::initial(field))
    }

    /// Live records in key order.
    pub fn live(&self) -> impl Iterator<Item = &ImageRecord> {
        self.records.values().filter(|r| r.present)
    }

    pub fn len(&self) -> usize {
        self.live().count()
    }

    pub fn is_empty(&self) -> bool {
        self.live().next().is_none()
    }

    /// Tag → number of live images carrying it.
    pub fn tag_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for tag in self.live().flat_map(|r| r.tags.iter()) {
            *counts.entry(tag.clone()).or_insert(0) += 1;
        }
        counts
    }
}
