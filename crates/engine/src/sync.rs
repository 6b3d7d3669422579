//! Reconciling two copies of a catalog's change log.

use std::collections::{BTreeMap, HashSet};

use tracing::{debug, warn};

use iocat_core::{
    ChangeEntry, CoreError, EntryId, Field, FieldValue, HlcClock, ImageKey, Origin, VectorClock,
    WriterIdentity,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    /// Both copies changed the field; the losing copy's latest change was overwritten.
    Discarded,
    /// One copy removed the image while the other edited it; the image was kept.
    DeletionOverridden,
}

/// One field-level conflict resolved during a merge. Advisory only.
#[derive(Debug, Clone, PartialEq)]
pub struct ConflictNotice {
    pub image: ImageKey,
    pub field: Field,
    pub kind: ConflictKind,
    /// The change that lost.
    pub discarded: ChangeEntry,
    /// The entry whose value stands: the winning edit, or the restore entry.
    pub kept: EntryId,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConflictReport {
    notices: Vec<ConflictNotice>,
}

impl ConflictReport {
    pub fn notices(&self) -> &[ConflictNotice] {
        &self.notices
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConflictNotice> {
        self.notices.iter()
    }

    pub fn len(&self) -> usize {
        self.notices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notices.is_empty()
    }

    pub fn for_image<'a>(&'a self, image: &'a ImageKey) -> impl Iterator<Item = &'a ConflictNotice> {
        self.notices.iter().filter(move |n| &n.image == image)
    }

    fn push(&mut self, notice: ConflictNotice) {
        warn!(
            image = %notice.image,
            field = %notice.field,
            kind = ?notice.kind,
            discarded = %notice.discarded.entry_id,
            writer = %notice.discarded.writer,
            "merge conflict resolved"
        );
        self.notices.push(notice);
    }
}

#[derive(Debug, Clone)]
pub struct MergeOutcome {
    /// The merged log in canonical order, sequenced from 1.
    pub entries: Vec<ChangeEntry>,
    pub report: ConflictReport,
    /// Number of entries taken from the other copy.
    pub imported: usize,
    /// Entries written by the merge itself (image restores).
    pub written: Vec<ChangeEntry>,
}

impl MergeOutcome {
    pub fn is_unchanged(&self) -> bool {
        self.imported == 0 && self.written.is_empty()
    }
}

#[derive(Default)]
struct Divergence<'a> {
    local: Vec<&'a ChangeEntry>,
    remote: Vec<&'a ChangeEntry>,
}

fn latest<'a>(entries: &[&'a ChangeEntry]) -> Option<&'a ChangeEntry> {
    entries.iter().copied().max_by(|a, b| a.canonical_cmp(b))
}

fn is_removal(entry: &ChangeEntry) -> bool {
    matches!(entry.new, FieldValue::Presence(false))
}

/// Merge `remote` into `local` with field-level last-write-wins.
///
/// Entries are unioned by id and never dropped. For every field both copies
/// changed since they diverged, the latest change by `(hlc, writer)` wins and the
/// other copy's latest change is reported. An image removed on one side and
/// edited on the other is kept: a signed restore entry from `identity` is added.
///
/// Fails without side effects other than on `clock` if a remote entry's
/// signature is invalid or its timestamp is too far in the future.
pub fn merge_logs(
    local: &[ChangeEntry],
    remote: &[ChangeEntry],
    identity: &WriterIdentity,
    clock: &mut HlcClock,
) -> Result<MergeOutcome, CoreError> {
    let local_ids: HashSet<EntryId> = local.iter().map(|e| e.entry_id).collect();
    let remote_ids: HashSet<EntryId> = remote.iter().map(|e| e.entry_id).collect();

    if VectorClock::from_log(local).covers(&VectorClock::from_log(remote))
        && remote_ids.is_subset(&local_ids)
    {
        debug!(entries = local.len(), "remote log already contained in local log");
        return Ok(MergeOutcome {
            entries: local.to_vec(),
            report: ConflictReport::default(),
            imported: 0,
            written: Vec::new(),
        });
    }

    let remote_only: Vec<&ChangeEntry> = remote
        .iter()
        .filter(|e| !local_ids.contains(&e.entry_id))
        .collect();
    let local_only: Vec<&ChangeEntry> = local
        .iter()
        .filter(|e| !remote_ids.contains(&e.entry_id))
        .collect();

    for entry in &remote_only {
        entry.verify_signature()?;
    }
    if let Some(newest) = remote_only.iter().map(|e| e.hlc).max() {
        clock.observe(newest)?;
    }

    let mut divergent: BTreeMap<(ImageKey, Field), Divergence<'_>> = BTreeMap::new();
    for &entry in &local_only {
        divergent
            .entry((entry.image.clone(), entry.field.clone()))
            .or_default()
            .local
            .push(entry);
    }
    for &entry in &remote_only {
        divergent
            .entry((entry.image.clone(), entry.field.clone()))
            .or_default()
            .remote
            .push(entry);
    }

    let mut report = ConflictReport::default();
    for ((image, field), sides) in &divergent {
        let (Some(ours), Some(theirs)) = (latest(&sides.local), latest(&sides.remote)) else {
            continue;
        };
        // Both copies arrived at the same value; nothing was lost.
        if ours.new == theirs.new {
            continue;
        }
        let (winner, loser) = if ours.canonical_cmp(theirs).is_gt() {
            (ours, theirs)
        } else {
            (theirs, ours)
        };
        report.push(ConflictNotice {
            image: image.clone(),
            field: field.clone(),
            kind: ConflictKind::Discarded,
            discarded: loser.clone(),
            kept: winner.entry_id,
        });
    }

    let mut merged: Vec<ChangeEntry> = local
        .iter()
        .cloned()
        .chain(remote_only.iter().map(|e| (*e).clone()))
        .collect();
    merged.sort_by(|a, b| a.canonical_cmp(b));

    // Edit wins over delete.
    let mut written = Vec::new();
    let images: Vec<&ImageKey> = {
        let mut keys: Vec<&ImageKey> = divergent.keys().map(|(image, _)| image).collect();
        keys.dedup();
        keys
    };
    for image in images {
        let presence = divergent.get(&(image.clone(), Field::Presence));
        let local_removal = presence.and_then(|d| latest(&d.local)).filter(|e| is_removal(e));
        let remote_removal = presence.and_then(|d| latest(&d.remote)).filter(|e| is_removal(e));
        let edited = |remote: bool| {
            [Field::Tags, Field::CustomFilename].into_iter().any(|field| {
                divergent.get(&(image.clone(), field)).is_some_and(|d| {
                    if remote { !d.remote.is_empty() } else { !d.local.is_empty() }
                })
            })
        };

        let removal = match (local_removal, remote_removal) {
            (Some(removed), None) if edited(true) => removed,
            (None, Some(removed)) if edited(false) => removed,
            _ => continue,
        };

        let final_presence = merged
            .iter()
            .rev()
            .find(|e| &e.image == image && e.field == Field::Presence);
        if !final_presence.is_some_and(is_removal) {
            continue;
        }

        let restore = ChangeEntry::new_signed(
            identity,
            clock.tick()?,
            image.clone(),
            FieldValue::Presence(false),
            FieldValue::Presence(true),
            Origin::MergeRestore,
        )?;
        report.push(ConflictNotice {
            image: image.clone(),
            field: Field::Presence,
            kind: ConflictKind::DeletionOverridden,
            discarded: removal.clone(),
            kept: restore.entry_id,
        });
        written.push(restore);
    }

    merged.extend(written.iter().cloned());
    merged.sort_by(|a, b| a.canonical_cmp(b));
    for (i, entry) in merged.iter_mut().enumerate() {
        entry.seq = i as u64 + 1;
    }
    for entry in &mut written {
        if let Some(placed) = merged.iter().find(|e| e.entry_id == entry.entry_id) {
            entry.seq = placed.seq;
        }
    }

    debug!(
        local_only = local_only.len(),
        imported = remote_only.len(),
        conflicts = report.len(),
        "merged change logs"
    );

    Ok(MergeOutcome {
        entries: merged,
        report,
        imported: remote_only.len(),
        written,
    })
}
